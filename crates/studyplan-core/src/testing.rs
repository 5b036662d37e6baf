//! Test doubles shared by the service tests.

use std::collections::HashSet;
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::sync::Mutex;
use std::time::Duration;

use async_trait::async_trait;
use serde_json::{Map, Value};

use crate::api::{ApiError, SettingsRemote};
use crate::models::{ChangeType, NotificationPreferences, ProfileRow};
use crate::storage::{KeyValueStore, MemoryStore, StorageError};

/// Scripted in-memory backend.
///
/// Rows are plain JSON maps so tests can seed arbitrary columns. Successful
/// updates are applied to the rows, the way the real backend would.
#[derive(Default)]
pub struct MockRemote {
    profile: Mutex<Map<String, Value>>,
    notifications: Mutex<Option<Map<String, Value>>>,
    failing_types: Mutex<HashSet<ChangeType>>,
    fail_fetch: AtomicBool,
    updates: Mutex<Vec<(ChangeType, Map<String, Value>)>>,
    profile_fetches: AtomicUsize,
    gate: tokio::sync::Mutex<()>,
}

impl MockRemote {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn set_profile_column(&self, column: &str, value: Value) {
        self.profile.lock().unwrap().insert(column.to_string(), value);
    }

    pub fn set_notification_column(&self, column: &str, value: Value) {
        self.notifications
            .lock()
            .unwrap()
            .get_or_insert_with(Map::new)
            .insert(column.to_string(), value);
    }

    pub fn fail_updates_for(&self, change_type: ChangeType) {
        self.failing_types.lock().unwrap().insert(change_type);
    }

    pub fn fail_fetches(&self) {
        self.fail_fetch.store(true, Ordering::SeqCst);
    }

    pub fn update_calls(&self) -> Vec<(ChangeType, Map<String, Value>)> {
        self.updates.lock().unwrap().clone()
    }

    pub fn profile_fetches(&self) -> usize {
        self.profile_fetches.load(Ordering::SeqCst)
    }

    /// Block every `update_fields` call (after it is recorded) until the
    /// returned guard is dropped.
    pub async fn hold_updates(&self) -> tokio::sync::MutexGuard<'_, ()> {
        self.gate.lock().await
    }

    pub async fn wait_for_update_calls(&self, count: usize) {
        while self.updates.lock().unwrap().len() < count {
            tokio::time::sleep(Duration::from_millis(5)).await;
        }
    }

    fn apply(&self, change_type: ChangeType, fields: Map<String, Value>) {
        match change_type {
            ChangeType::Profile => self.profile.lock().unwrap().extend(fields),
            ChangeType::NotificationPreferences => self
                .notifications
                .lock()
                .unwrap()
                .get_or_insert_with(Map::new)
                .extend(fields),
            ChangeType::SrsPreferences => {
                let mut profile = self.profile.lock().unwrap();
                let preferences = profile
                    .entry("preferences")
                    .or_insert_with(|| Value::Object(Map::new()));
                if !preferences.is_object() {
                    *preferences = Value::Object(Map::new());
                }
                if let Some(preferences) = preferences.as_object_mut() {
                    let srs = preferences
                        .entry("srs")
                        .or_insert_with(|| Value::Object(Map::new()));
                    if let Some(srs) = srs.as_object_mut() {
                        srs.extend(fields);
                    }
                }
            }
        }
    }
}

#[async_trait]
impl SettingsRemote for MockRemote {
    async fn fetch_profile(&self, user_id: &str) -> Result<ProfileRow, ApiError> {
        self.profile_fetches.fetch_add(1, Ordering::SeqCst);
        if self.fail_fetch.load(Ordering::SeqCst) {
            return Err(ApiError::ServerError("scripted fetch failure".to_string()));
        }
        let mut row = self.profile.lock().unwrap().clone();
        row.entry("id").or_insert_with(|| Value::String(user_id.to_string()));
        serde_json::from_value(Value::Object(row))
            .map_err(|e| ApiError::InvalidResponse(e.to_string()))
    }

    async fn fetch_notification_preferences(
        &self,
        _user_id: &str,
    ) -> Result<Option<NotificationPreferences>, ApiError> {
        if self.fail_fetch.load(Ordering::SeqCst) {
            return Err(ApiError::ServerError("scripted fetch failure".to_string()));
        }
        let row = self.notifications.lock().unwrap().clone();
        match row {
            Some(row) => serde_json::from_value(Value::Object(row))
                .map(Some)
                .map_err(|e| ApiError::InvalidResponse(e.to_string())),
            None => Err(ApiError::NotFound("notification_preferences".to_string())),
        }
    }

    async fn update_fields(
        &self,
        _user_id: &str,
        change_type: ChangeType,
        fields: Map<String, Value>,
    ) -> Result<(), ApiError> {
        self.updates.lock().unwrap().push((change_type, fields.clone()));
        drop(self.gate.lock().await);

        if self.failing_types.lock().unwrap().contains(&change_type) {
            return Err(ApiError::ServerError(format!("scripted {} failure", change_type)));
        }
        self.apply(change_type, fields);
        Ok(())
    }
}

fn scripted_io_error(key: &str) -> StorageError {
    StorageError::Io {
        key: key.to_string(),
        source: std::io::Error::new(std::io::ErrorKind::Other, "scripted storage failure"),
    }
}

/// Store whose every operation fails.
pub struct FailingStore;

#[async_trait]
impl KeyValueStore for FailingStore {
    async fn get_item(&self, key: &str) -> Result<Option<String>, StorageError> {
        Err(scripted_io_error(key))
    }

    async fn set_item(&self, key: &str, _value: &str) -> Result<(), StorageError> {
        Err(scripted_io_error(key))
    }

    async fn remove_item(&self, key: &str) -> Result<(), StorageError> {
        Err(scripted_io_error(key))
    }
}

/// `MemoryStore` whose reads can be switched to fail.
#[derive(Default)]
pub struct FlakyStore {
    pub inner: MemoryStore,
    fail_reads: AtomicBool,
}

impl FlakyStore {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn fail_reads(&self, fail: bool) {
        self.fail_reads.store(fail, Ordering::SeqCst);
    }
}

#[async_trait]
impl KeyValueStore for FlakyStore {
    async fn get_item(&self, key: &str) -> Result<Option<String>, StorageError> {
        if self.fail_reads.load(Ordering::SeqCst) {
            return Err(scripted_io_error(key));
        }
        self.inner.get_item(key).await
    }

    async fn set_item(&self, key: &str, value: &str) -> Result<(), StorageError> {
        self.inner.set_item(key, value).await
    }

    async fn remove_item(&self, key: &str) -> Result<(), StorageError> {
        self.inner.remove_item(key).await
    }
}
