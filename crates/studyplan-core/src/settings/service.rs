use std::collections::{HashMap, HashSet};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex, PoisonError};

use serde_json::Value;
use tokio::sync::RwLock;
use tokio::task::JoinHandle;
use tracing::{debug, info, warn};

use super::listeners::{SettingsListeners, Subscription};
use super::queue;
use super::SettingsError;
use crate::api::{ApiError, SettingsRemote};
use crate::config::SyncConfig;
use crate::models::{ChangeType, PendingChange, SettingsCache, SyncOutcome};
use crate::storage::{load_json, save_json, KeyValueStore, StorageError};

const CACHE_KEY_PREFIX: &str = "settings_cache";
const QUEUE_KEY_PREFIX: &str = "pending_changes";

fn cache_key(user_id: &str) -> String {
    format!("{}:{}", CACHE_KEY_PREFIX, user_id)
}

fn queue_key(user_id: &str) -> String {
    format!("{}:{}", QUEUE_KEY_PREFIX, user_id)
}

/// Holds the in-flight flag for one sync pass; clears it on every exit path.
struct SyncGuard<'a>(&'a AtomicBool);

impl<'a> SyncGuard<'a> {
    fn acquire(flag: &'a AtomicBool) -> Option<Self> {
        flag.compare_exchange(false, true, Ordering::AcqRel, Ordering::Acquire)
            .ok()
            .map(|_| Self(flag))
    }
}

impl Drop for SyncGuard<'_> {
    fn drop(&mut self) {
        self.0.store(false, Ordering::Release);
    }
}

/// Settings cache, pending-change queue and sync engine for one device.
///
/// Construct one per process at the composition root and share it through
/// an `Arc`; the spawning entry points (`update_setting`, `load_from_cache`,
/// `get_settings`) take `self: &Arc<Self>`.
pub struct SettingsSyncService {
    store: Arc<dyn KeyValueStore>,
    remote: Arc<dyn SettingsRemote>,
    config: SyncConfig,
    memory: RwLock<HashMap<String, SettingsCache>>,
    /// Serializes read-modify-write of the persisted cache and queue
    write_lock: tokio::sync::Mutex<()>,
    is_syncing: AtomicBool,
    /// Users with a background refresh in flight
    refreshing: Mutex<HashSet<String>>,
    background: Mutex<Vec<JoinHandle<()>>>,
    listeners: SettingsListeners,
}

impl SettingsSyncService {
    pub fn new(store: Arc<dyn KeyValueStore>, remote: Arc<dyn SettingsRemote>, config: SyncConfig) -> Self {
        Self {
            store,
            remote,
            config,
            memory: RwLock::new(HashMap::new()),
            write_lock: tokio::sync::Mutex::new(()),
            is_syncing: AtomicBool::new(false),
            refreshing: Mutex::new(HashSet::new()),
            background: Mutex::new(Vec::new()),
            listeners: SettingsListeners::new(),
        }
    }

    pub fn config(&self) -> &SyncConfig {
        &self.config
    }

    /// Register a listener for every cache change.
    pub fn subscribe<F>(&self, listener: F) -> Subscription
    where
        F: Fn(&SettingsCache) + Send + Sync + 'static,
    {
        self.listeners.subscribe(listener)
    }

    pub fn is_syncing(&self) -> bool {
        self.is_syncing.load(Ordering::Acquire)
    }

    /// In-memory copy only; never touches storage.
    pub async fn cached(&self, user_id: &str) -> Option<SettingsCache> {
        self.memory.read().await.get(user_id).cloned()
    }

    // ===== Writes =====

    /// Write one field locally and queue it for the server.
    ///
    /// The cache and subscribers see the new value before this returns.
    /// Sync runs in the background when `auto_sync` is on; its failures are
    /// never reported here. Errors mean the value did not fit the field or
    /// local storage failed.
    pub async fn update_setting(
        self: &Arc<Self>,
        user_id: &str,
        change_type: ChangeType,
        field: &str,
        value: Value,
    ) -> Result<(), SettingsError> {
        let cache = {
            let _write = self.write_lock.lock().await;

            let mut cache = match self.current_cache(user_id).await? {
                Some(cache) => cache,
                None => SettingsCache::empty(user_id),
            };
            cache
                .apply_change(change_type, field, value.clone())
                .map_err(|source| SettingsError::InvalidValue {
                    change_type,
                    field: field.to_string(),
                    source,
                })?;
            self.write_cache(&cache).await?;

            let mut pending = self.read_queue(user_id).await?;
            queue::upsert(&mut pending, change_type, field, value, self.config.max_retries);
            self.write_queue(user_id, &pending).await?;

            cache
        };

        debug!(user_id = user_id, change_type = %change_type, field = field, "Queued setting change");
        self.listeners.notify(&cache);

        if self.config.auto_sync {
            self.spawn_sync(user_id);
        }
        Ok(())
    }

    /// Push every queued change to the server, one request per entity type.
    ///
    /// Returns immediately with an empty outcome if another pass is running.
    /// A failed type-group charges one retry to each of its changes; changes
    /// that reach `max_retries` are dropped and counted in `failed`. When any
    /// group succeeds the cache is refreshed from the server afterwards.
    pub async fn sync_pending_changes(&self, user_id: &str) -> SyncOutcome {
        let Some(_guard) = SyncGuard::acquire(&self.is_syncing) else {
            debug!(user_id = user_id, "Sync already in progress, skipping");
            return SyncOutcome::default();
        };

        let sent = {
            let _write = self.write_lock.lock().await;
            match self.read_queue(user_id).await {
                Ok(pending) => pending,
                Err(e) => {
                    warn!(user_id = user_id, error = %e, "Failed to read pending changes");
                    return SyncOutcome::default();
                }
            }
        };
        if sent.is_empty() {
            return SyncOutcome::default();
        }

        let mut succeeded = HashSet::new();
        for (change_type, changes) in queue::group_by_type(&sent) {
            let payload = queue::batch_payload(&changes);
            match self.remote.update_fields(user_id, change_type, payload).await {
                Ok(()) => {
                    debug!(user_id = user_id, change_type = %change_type, count = changes.len(), "Synced change group");
                    succeeded.insert(change_type);
                }
                Err(e) => {
                    warn!(user_id = user_id, change_type = %change_type, count = changes.len(), error = %e, "Failed to sync change group");
                }
            }
        }

        let outcome = {
            let _write = self.write_lock.lock().await;
            match self.read_queue(user_id).await {
                Ok(current) => {
                    let (survivors, outcome) =
                        queue::reconcile(current, &sent, |t| succeeded.contains(&t));
                    if let Err(e) = self.write_queue(user_id, &survivors).await {
                        warn!(user_id = user_id, error = %e, "Failed to persist pending changes");
                    }
                    outcome
                }
                Err(e) => {
                    // Stored queue stays as is; synced entries are sent again next pass
                    warn!(user_id = user_id, error = %e, "Failed to re-read pending changes");
                    SyncOutcome {
                        synced: sent.iter().filter(|c| succeeded.contains(&c.change_type)).count(),
                        failed: 0,
                    }
                }
            }
        };

        if outcome.failed > 0 {
            warn!(user_id = user_id, failed = outcome.failed, "Dropped changes after exhausting retries");
        }
        info!(user_id = user_id, synced = outcome.synced, failed = outcome.failed, "Sync pass complete");

        if !succeeded.is_empty() {
            if let Err(e) = self.refresh_settings(user_id).await {
                warn!(user_id = user_id, error = %e, "Failed to refresh settings after sync");
            }
        }

        outcome
    }

    /// Unconditional server fetch; overwrites the cache and notifies subscribers.
    pub async fn refresh_settings(&self, user_id: &str) -> Result<SettingsCache, SettingsError> {
        self.load_from_server(user_id).await
    }

    // ===== Reads =====

    /// Fast local read with stale-while-revalidate.
    ///
    /// Entries with a foreign schema version, another owner, or an unreadable
    /// payload are removed and yield `None`. A stale entry is returned as is
    /// while one background refresh is started.
    pub async fn load_from_cache(self: &Arc<Self>, user_id: &str) -> Option<SettingsCache> {
        let cache = match self.read_stored_cache(user_id).await {
            Ok(Some(cache)) => cache,
            Ok(None) => return None,
            Err(e) => {
                warn!(user_id = user_id, error = %e, "Failed to read settings cache");
                return None;
            }
        };

        self.memory
            .write()
            .await
            .insert(user_id.to_string(), cache.clone());

        if cache.is_stale(self.config.stale_after_minutes) {
            debug!(user_id = user_id, age = %cache.age_display(), "Settings cache is stale, refreshing in background");
            self.spawn_refresh(user_id);
        }
        Some(cache)
    }

    /// Authoritative read: fetch profile and preferences, merge, persist.
    ///
    /// Changes still waiting in the queue are applied on top of the server
    /// data so the cache keeps showing the user's latest edits.
    pub async fn load_from_server(&self, user_id: &str) -> Result<SettingsCache, SettingsError> {
        let (row, notifications) = futures::future::join(
            self.remote.fetch_profile(user_id),
            self.remote.fetch_notification_preferences(user_id),
        )
        .await;
        let row = row?;
        let notifications = match notifications {
            Ok(prefs) => prefs,
            Err(ApiError::NotFound(_)) => None,
            Err(e) => return Err(e.into()),
        };
        let srs = row.srs_preferences();

        let cache = {
            let _write = self.write_lock.lock().await;
            let mut cache = SettingsCache::from_server(user_id, row.profile, notifications, srs);
            let pending = self.read_queue(user_id).await?;
            let overlaid = cache.overlay_pending(&pending);
            if overlaid > 0 {
                debug!(user_id = user_id, overlaid = overlaid, "Re-applied pending changes over server data");
            }
            self.write_cache(&cache).await?;
            cache
        };

        info!(user_id = user_id, "Loaded settings from server");
        self.listeners.notify(&cache);
        Ok(cache)
    }

    /// Memory, then local cache, then server.
    pub async fn get_settings(self: &Arc<Self>, user_id: &str) -> Result<SettingsCache, SettingsError> {
        if let Some(cache) = self.cached(user_id).await {
            return Ok(cache);
        }
        if let Some(cache) = self.load_from_cache(user_id).await {
            return Ok(cache);
        }
        self.load_from_server(user_id).await
    }

    pub async fn pending_changes(&self, user_id: &str) -> Result<Vec<PendingChange>, SettingsError> {
        Ok(self.read_queue(user_id).await?)
    }

    pub async fn has_pending_changes(&self, user_id: &str) -> bool {
        self.read_queue(user_id)
            .await
            .map(|pending| !pending.is_empty())
            .unwrap_or(false)
    }

    /// Forget everything stored for `user_id` (logout).
    pub async fn clear_cache(&self, user_id: &str) -> Result<(), SettingsError> {
        let _write = self.write_lock.lock().await;
        self.memory.write().await.remove(user_id);
        self.store
            .multi_remove(&[cache_key(user_id), queue_key(user_id)])
            .await?;
        info!(user_id = user_id, "Cleared settings cache and pending changes");
        Ok(())
    }

    /// Await every background sync and refresh started so far.
    pub async fn wait_for_background(&self) {
        loop {
            let handles: Vec<JoinHandle<()>> = std::mem::take(
                &mut *self.background.lock().unwrap_or_else(PoisonError::into_inner),
            );
            if handles.is_empty() {
                return;
            }
            for handle in handles {
                if let Err(e) = handle.await {
                    warn!(error = %e, "Background settings task failed");
                }
            }
        }
    }

    // ===== Background tasks =====

    fn track(&self, handle: JoinHandle<()>) {
        let mut background = self.background.lock().unwrap_or_else(PoisonError::into_inner);
        background.retain(|h| !h.is_finished());
        background.push(handle);
    }

    fn spawn_sync(self: &Arc<Self>, user_id: &str) {
        let this = Arc::clone(self);
        let user_id = user_id.to_string();
        let handle = tokio::spawn(async move {
            this.sync_pending_changes(&user_id).await;
        });
        self.track(handle);
    }

    fn spawn_refresh(self: &Arc<Self>, user_id: &str) {
        {
            let mut refreshing = self.refreshing.lock().unwrap_or_else(PoisonError::into_inner);
            if !refreshing.insert(user_id.to_string()) {
                debug!(user_id = user_id, "Background refresh already running");
                return;
            }
        }

        let this = Arc::clone(self);
        let user_id = user_id.to_string();
        let handle = tokio::spawn(async move {
            if let Err(e) = this.load_from_server(&user_id).await {
                warn!(user_id = %user_id, error = %e, "Background settings refresh failed");
            }
            this.refreshing
                .lock()
                .unwrap_or_else(PoisonError::into_inner)
                .remove(&user_id);
        });
        self.track(handle);
    }

    // ===== Storage helpers =====

    /// Memory first, then the validated persisted entry.
    async fn current_cache(&self, user_id: &str) -> Result<Option<SettingsCache>, StorageError> {
        if let Some(cache) = self.cached(user_id).await {
            return Ok(Some(cache));
        }
        self.read_stored_cache(user_id).await
    }

    async fn read_stored_cache(&self, user_id: &str) -> Result<Option<SettingsCache>, StorageError> {
        let key = cache_key(user_id);
        let cache = match load_json::<SettingsCache>(self.store.as_ref(), &key).await {
            Ok(Some(cache)) => cache,
            Ok(None) => return Ok(None),
            Err(StorageError::Corrupt { source, .. }) => {
                info!(user_id = user_id, error = %source, "Discarding unreadable settings cache");
                self.store.remove_item(&key).await?;
                return Ok(None);
            }
            Err(e) => return Err(e),
        };

        if !cache.is_current_version() {
            info!(user_id = user_id, version = %cache.version, "Discarding settings cache from another schema version");
            self.store.remove_item(&key).await?;
            return Ok(None);
        }
        if cache.user_id != user_id {
            info!(user_id = user_id, "Discarding settings cache owned by another user");
            self.store.remove_item(&key).await?;
            return Ok(None);
        }
        Ok(Some(cache))
    }

    async fn write_cache(&self, cache: &SettingsCache) -> Result<(), StorageError> {
        save_json(self.store.as_ref(), &cache_key(&cache.user_id), cache).await?;
        self.memory
            .write()
            .await
            .insert(cache.user_id.clone(), cache.clone());
        Ok(())
    }

    async fn read_queue(&self, user_id: &str) -> Result<Vec<PendingChange>, StorageError> {
        Ok(load_json(self.store.as_ref(), &queue_key(user_id))
            .await?
            .unwrap_or_default())
    }

    async fn write_queue(&self, user_id: &str, pending: &[PendingChange]) -> Result<(), StorageError> {
        let key = queue_key(user_id);
        if pending.is_empty() {
            self.store.remove_item(&key).await
        } else {
            save_json(self.store.as_ref(), &key, pending).await
        }
    }
}
