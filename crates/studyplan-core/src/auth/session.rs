use std::sync::Arc;

use chrono::{DateTime, Duration, Utc};
use serde::{Deserialize, Serialize};
use tracing::debug;

use crate::storage::{load_json, save_json, KeyValueStore, StorageError};

/// Store key for the persisted session
const SESSION_KEY: &str = "auth_session";

/// Access tokens issued by the hosted auth service live for an hour.
const TOKEN_EXPIRY_MINUTES: i64 = 60;

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SessionData {
    pub user_id: String,
    pub email: Option<String>,
    pub created_at: DateTime<Utc>,
}

impl SessionData {
    pub fn new(user_id: impl Into<String>, email: Option<String>) -> Self {
        Self {
            user_id: user_id.into(),
            email,
            created_at: Utc::now(),
        }
    }

    pub fn is_expired(&self) -> bool {
        let expiry = self.created_at + Duration::minutes(TOKEN_EXPIRY_MINUTES);
        Utc::now() > expiry
    }
}

pub struct Session {
    store: Arc<dyn KeyValueStore>,
    pub data: Option<SessionData>,
}

impl Session {
    pub fn new(store: Arc<dyn KeyValueStore>) -> Self {
        Self { store, data: None }
    }

    /// Load the persisted session. Returns false when there is none.
    ///
    /// An expired session is still loaded: the user id stays known (cached
    /// settings and navigation ownership depend on it) while `is_valid`
    /// reports false until the token is renewed.
    pub async fn load(&mut self) -> Result<bool, StorageError> {
        self.data = load_json(self.store.as_ref(), SESSION_KEY).await?;
        if let Some(ref data) = self.data {
            debug!(user_id = %data.user_id, expired = data.is_expired(), "Loaded session");
        }
        Ok(self.data.is_some())
    }

    pub async fn save(&self) -> Result<(), StorageError> {
        if let Some(ref data) = self.data {
            save_json(self.store.as_ref(), SESSION_KEY, data).await?;
        }
        Ok(())
    }

    pub async fn clear(&mut self) -> Result<(), StorageError> {
        self.data = None;
        self.store.remove_item(SESSION_KEY).await
    }

    pub fn update(&mut self, data: SessionData) {
        self.data = Some(data);
    }

    pub fn user_id(&self) -> Option<&str> {
        self.data.as_ref().map(|d| d.user_id.as_str())
    }

    /// Check if session is valid (exists and not expired)
    pub fn is_valid(&self) -> bool {
        self.data.as_ref().map(|d| !d.is_expired()).unwrap_or(false)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::storage::MemoryStore;

    #[test]
    fn test_session_expiry() {
        let fresh = SessionData::new("u1", None);
        assert!(!fresh.is_expired());

        let mut old = SessionData::new("u1", None);
        old.created_at = Utc::now() - Duration::minutes(59);
        assert!(!old.is_expired());

        old.created_at = Utc::now() - Duration::minutes(61);
        assert!(old.is_expired());
    }

    #[tokio::test]
    async fn test_session_persist_and_clear() {
        let store: Arc<dyn KeyValueStore> = Arc::new(MemoryStore::new());

        let mut session = Session::new(store.clone());
        assert!(!session.load().await.unwrap());
        assert!(!session.is_valid());

        session.update(SessionData::new("u1", Some("ada@example.edu".to_string())));
        session.save().await.unwrap();

        let mut reloaded = Session::new(store.clone());
        assert!(reloaded.load().await.unwrap());
        assert_eq!(reloaded.user_id(), Some("u1"));
        assert!(reloaded.is_valid());

        reloaded.clear().await.unwrap();
        let mut after_clear = Session::new(store);
        assert!(!after_clear.load().await.unwrap());
    }

    #[tokio::test]
    async fn test_expired_session_keeps_user_but_is_invalid() {
        let store: Arc<dyn KeyValueStore> = Arc::new(MemoryStore::new());
        let mut data = SessionData::new("u1", None);
        data.created_at = Utc::now() - Duration::hours(3);

        let mut session = Session::new(store.clone());
        session.update(data);
        session.save().await.unwrap();

        let mut reloaded = Session::new(store);
        assert!(reloaded.load().await.unwrap());
        assert_eq!(reloaded.user_id(), Some("u1"));
        assert!(!reloaded.is_valid());
    }
}
