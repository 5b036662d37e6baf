//! Local-first settings cache with an offline mutation queue.
//!
//! `SettingsSyncService` owns a user's profile, notification preferences and
//! SRS preferences. Reads come from the local cache (stale entries are
//! refreshed in the background); writes land in the cache at once and are
//! queued as field-level `PendingChange`s that a sync pass pushes to the
//! server, one batch per entity type.

pub mod error;
pub mod listeners;
pub mod queue;
pub mod service;

pub use error::SettingsError;
pub use listeners::{SettingsListeners, Subscription};
pub use service::SettingsSyncService;
