//! Data models for settings sync and navigation persistence.
//!
//! - `UserProfile`, `NotificationPreferences`, `SrsPreferences`: remote rows
//! - `SettingsCache`: the merged local copy of all three
//! - `PendingChange`, `ChangeType`: queued field-level edits
//! - `NavigationState`, `Route`, `NavigationSnapshot`: persisted navigation tree

pub mod navigation;
pub mod pending;
pub mod profile;
pub mod settings;

pub use navigation::{NavigationSnapshot, NavigationState, Route};
pub use pending::{ChangeType, ParseChangeTypeError, PendingChange, SyncOutcome};
pub use profile::{NotificationPreferences, ProfileRow, SrsPreferences, UserProfile};
pub use settings::{SettingsCache, SETTINGS_CACHE_VERSION};
