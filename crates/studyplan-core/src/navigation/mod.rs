//! Navigation state persistence with validation on restore.
//!
//! The navigation container hands over its full route tree on every change;
//! `NavigationSyncService` persists it and, at cold start, decides whether
//! the saved tree may be restored. A snapshot is restorable only if it was
//! written by the current schema version, for the current user, within the
//! maximum age, and every route in it is known to the `RouteCatalog`.
//! Anything else discards the snapshot outright.

pub mod catalog;
pub mod service;

pub use catalog::RouteCatalog;
pub use service::{NavigationError, NavigationSyncService, SnapshotRejection, NAVIGATION_STATE_VERSION};
