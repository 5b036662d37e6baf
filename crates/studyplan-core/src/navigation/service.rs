use std::sync::Arc;

use chrono::{Duration, Utc};
use thiserror::Error;
use tracing::{debug, info, warn};

use super::RouteCatalog;
use crate::config::{NavigationConfig, DEFAULT_NAVIGATION_MAX_AGE_DAYS};
use crate::models::{NavigationSnapshot, NavigationState};
use crate::storage::{load_json, save_json, KeyValueStore, StorageError};

/// Schema tag written with every snapshot.
pub const NAVIGATION_STATE_VERSION: &str = "1";

const STATE_KEY_PREFIX: &str = "navigation_state";

/// Why a stored snapshot was discarded.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum SnapshotRejection {
    #[error("Unreadable snapshot: {0}")]
    Corrupt(String),

    #[error("Snapshot version {found} does not match {expected}")]
    VersionMismatch { found: String, expected: String },

    #[error("Snapshot is {age_days} days old")]
    Expired { age_days: i64 },

    #[error("Snapshot belongs to another user")]
    UserMismatch,

    #[error("Unknown route '{name}' (parent: {parent:?})")]
    UnknownRoute { parent: Option<String>, name: String },
}

#[derive(Error, Debug)]
pub enum NavigationError {
    #[error(transparent)]
    Storage(#[from] StorageError),

    #[error("Snapshot discarded: {0}")]
    Rejected(SnapshotRejection),
}

/// Persists the navigation tree and gates its restoration.
pub struct NavigationSyncService {
    store: Arc<dyn KeyValueStore>,
    catalog: RouteCatalog,
    state_key: String,
    user_key: String,
    max_age: Duration,
}

impl NavigationSyncService {
    pub fn new(store: Arc<dyn KeyValueStore>, catalog: RouteCatalog, config: &NavigationConfig) -> Self {
        let state_key = format!("{}:{}", STATE_KEY_PREFIX, config.namespace);
        let user_key = format!("{}:current_user", state_key);
        let max_age = Duration::try_days(config.max_age_days).unwrap_or_else(|| {
            warn!(max_age_days = config.max_age_days, "Navigation max age out of range, using default");
            Duration::days(DEFAULT_NAVIGATION_MAX_AGE_DAYS)
        });
        Self {
            store,
            catalog,
            state_key,
            user_key,
            max_age,
        }
    }

    pub fn catalog(&self) -> &RouteCatalog {
        &self.catalog
    }

    pub async fn try_save_state(
        &self,
        state: &NavigationState,
        user_id: Option<&str>,
    ) -> Result<(), NavigationError> {
        let snapshot = NavigationSnapshot {
            state: state.clone(),
            version: NAVIGATION_STATE_VERSION.to_string(),
            saved_at: Utc::now(),
            user_id: user_id.map(str::to_string),
        };
        save_json(self.store.as_ref(), &self.state_key, &snapshot).await?;

        match user_id {
            Some(user_id) => self.store.set_item(&self.user_key, user_id).await?,
            None => self.store.remove_item(&self.user_key).await?,
        }
        Ok(())
    }

    /// Persist the tree. Failures are logged; navigation never waits on storage.
    pub async fn save_state(&self, state: &NavigationState, user_id: Option<&str>) {
        if let Err(e) = self.try_save_state(state, user_id).await {
            warn!(error = %e, "Failed to save navigation state");
        }
    }

    /// Load and validate the stored snapshot.
    ///
    /// `Ok(None)` means nothing is stored. A snapshot failing any check is
    /// removed before `NavigationError::Rejected` is returned.
    pub async fn try_load_state(
        &self,
        user_id: Option<&str>,
    ) -> Result<Option<NavigationSnapshot>, NavigationError> {
        let snapshot = match load_json::<NavigationSnapshot>(self.store.as_ref(), &self.state_key).await {
            Ok(Some(snapshot)) => snapshot,
            Ok(None) => return Ok(None),
            Err(StorageError::Corrupt { source, .. }) => {
                return Err(self.reject(SnapshotRejection::Corrupt(source.to_string())).await)
            }
            Err(e) => return Err(e.into()),
        };

        match self.check(&snapshot, user_id) {
            Ok(()) => Ok(Some(snapshot)),
            Err(rejection) => Err(self.reject(rejection).await),
        }
    }

    /// Validated tree, or `None` when absent or discarded.
    pub async fn load_state(&self, user_id: Option<&str>) -> Option<NavigationState> {
        match self.try_load_state(user_id).await {
            Ok(snapshot) => snapshot.map(|s| s.state),
            Err(NavigationError::Rejected(rejection)) => {
                info!(reason = %rejection, "Discarded saved navigation state");
                None
            }
            Err(e) => {
                warn!(error = %e, "Failed to load navigation state");
                None
            }
        }
    }

    /// Decide what the navigation container starts from. `None` means a fresh start.
    ///
    /// Waiting on auth leaves the snapshot alone. A tree that cannot be
    /// restored (auth-only route while signed out, ephemeral leaf) is cleared.
    pub async fn get_safe_initial_state(
        &self,
        is_authenticated: bool,
        is_loading: bool,
        user_id: Option<&str>,
    ) -> Option<NavigationState> {
        if is_loading {
            return None;
        }

        let state = self.load_state(user_id).await?;
        let path = state.active_path();

        if !is_authenticated {
            if let Some(route) = path.iter().find(|r| self.catalog.requires_auth(&r.name)) {
                debug!(route = %route.name, "Saved route requires authentication, starting fresh");
                self.clear_state().await;
                return None;
            }
        }

        if let Some(leaf) = path.last() {
            if self.catalog.is_ephemeral(&leaf.name) {
                debug!(route = %leaf.name, "Saved route is not restorable, starting fresh");
                self.clear_state().await;
                return None;
            }
        }

        Some(state)
    }

    pub async fn try_clear_state(&self) -> Result<(), NavigationError> {
        self.store
            .multi_remove(&[self.state_key.clone(), self.user_key.clone()])
            .await?;
        Ok(())
    }

    /// Remove the snapshot and the tracked user association.
    pub async fn clear_state(&self) {
        if let Err(e) = self.try_clear_state().await {
            warn!(error = %e, "Failed to clear navigation state");
        }
    }

    /// Clear the snapshot when the signed-in user differs from the one it was saved for.
    /// Returns true if state was cleared.
    pub async fn handle_user_change(&self, user_id: Option<&str>) -> bool {
        let tracked = match self.store.get_item(&self.user_key).await {
            Ok(tracked) => tracked,
            Err(e) => {
                warn!(error = %e, "Failed to read tracked navigation user");
                return false;
            }
        };

        if tracked.as_deref() == user_id || tracked.is_none() {
            return false;
        }

        info!("Signed-in user changed, clearing navigation state");
        self.clear_state().await;
        true
    }

    fn check(&self, snapshot: &NavigationSnapshot, user_id: Option<&str>) -> Result<(), SnapshotRejection> {
        if snapshot.version != NAVIGATION_STATE_VERSION {
            return Err(SnapshotRejection::VersionMismatch {
                found: snapshot.version.clone(),
                expected: NAVIGATION_STATE_VERSION.to_string(),
            });
        }

        let age = Utc::now() - snapshot.saved_at;
        if age > self.max_age {
            return Err(SnapshotRejection::Expired { age_days: age.num_days() });
        }

        // A snapshot saved signed out may be picked up by whoever signs in
        if snapshot.user_id.is_some() && snapshot.user_id.as_deref() != user_id {
            return Err(SnapshotRejection::UserMismatch);
        }

        self.catalog.validate(&snapshot.state)
    }

    async fn reject(&self, rejection: SnapshotRejection) -> NavigationError {
        self.clear_state().await;
        NavigationError::Rejected(rejection)
    }
}
