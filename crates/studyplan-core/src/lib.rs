//! studyplan-core - Client-side coordination for the student planner.
//!
//! This crate contains the offline-first logic shared by every front end:
//!
//! - `settings`: settings cache with stale-while-revalidate reads, plus the
//!   pending-change queue and the sync engine that drains it
//! - `navigation`: navigation snapshot persistence with route allowlists and
//!   auth-aware restore
//! - `api`: the remote backend seam and its HTTP implementation
//! - `storage`: the async key-value store everything persists through
//! - `auth`, `config`, `models`, `utils`: supporting types
//!
//! Services are plain values built by the caller and shared through `Arc`;
//! nothing in this crate is a global.

pub mod api;
pub mod auth;
pub mod config;
pub mod models;
pub mod navigation;
pub mod settings;
pub mod storage;
pub mod utils;

#[cfg(test)]
mod testing;

pub use api::{remote_from_config, ApiClient, ApiError, OfflineRemote, SettingsRemote};
pub use config::Config;
pub use models::{ChangeType, NavigationState, PendingChange, SettingsCache, SyncOutcome};
pub use navigation::{NavigationSyncService, RouteCatalog, SnapshotRejection};
pub use settings::{SettingsError, SettingsSyncService, Subscription};
pub use storage::{FileStore, KeyValueStore, MemoryStore, StorageError};
