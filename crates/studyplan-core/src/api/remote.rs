use std::sync::Arc;

use async_trait::async_trait;
use serde_json::{Map, Value};
use tracing::{info, warn};

use super::{ApiClient, ApiError};
use crate::config::Config;
use crate::models::{ChangeType, NotificationPreferences, ProfileRow};

/// Server side of the settings sync.
#[async_trait]
pub trait SettingsRemote: Send + Sync {
    /// Profile row for `user_id`, including its nested `preferences` column.
    async fn fetch_profile(&self, user_id: &str) -> Result<ProfileRow, ApiError>;

    /// Notification preference row, `None` if the user never saved one.
    async fn fetch_notification_preferences(
        &self,
        user_id: &str,
    ) -> Result<Option<NotificationPreferences>, ApiError>;

    /// Apply every field of one entity type in a single request.
    async fn update_fields(
        &self,
        user_id: &str,
        change_type: ChangeType,
        fields: Map<String, Value>,
    ) -> Result<(), ApiError>;
}

/// Null-object remote for builds or sessions without a backend.
/// Every call fails as unavailable, so writes stay queued locally.
#[derive(Debug, Clone, Default)]
pub struct OfflineRemote;

const OFFLINE_REASON: &str = "no backend configured";

#[async_trait]
impl SettingsRemote for OfflineRemote {
    async fn fetch_profile(&self, _user_id: &str) -> Result<ProfileRow, ApiError> {
        Err(ApiError::Unavailable(OFFLINE_REASON.to_string()))
    }

    async fn fetch_notification_preferences(
        &self,
        _user_id: &str,
    ) -> Result<Option<NotificationPreferences>, ApiError> {
        Err(ApiError::Unavailable(OFFLINE_REASON.to_string()))
    }

    async fn update_fields(
        &self,
        _user_id: &str,
        _change_type: ChangeType,
        _fields: Map<String, Value>,
    ) -> Result<(), ApiError> {
        Err(ApiError::Unavailable(OFFLINE_REASON.to_string()))
    }
}

/// Pick the remote implementation for this run.
///
/// A configured backend gets the HTTP client (optionally carrying the user's
/// access token); anything else, including a client that fails to build,
/// gets `OfflineRemote`.
pub fn remote_from_config(config: &Config, access_token: Option<String>) -> Arc<dyn SettingsRemote> {
    let (Some(url), Some(key)) = (config.backend_url.as_deref(), config.anon_key.as_deref()) else {
        info!("No backend configured, running offline");
        return Arc::new(OfflineRemote);
    };
    if !config.has_backend() {
        info!("Backend configuration incomplete, running offline");
        return Arc::new(OfflineRemote);
    }

    match ApiClient::new(url, key) {
        Ok(client) => {
            let client = match access_token {
                Some(token) => client.with_token(token),
                None => client,
            };
            Arc::new(client)
        }
        Err(e) => {
            warn!(error = %e, "Failed to build API client, running offline");
            Arc::new(OfflineRemote)
        }
    }
}
