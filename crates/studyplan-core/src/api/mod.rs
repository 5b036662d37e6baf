//! Remote API module for the hosted backend.
//!
//! This module provides:
//! - `SettingsRemote`: the trait the sync services talk to
//! - `ApiClient`: reqwest implementation against the PostgREST endpoints
//! - `OfflineRemote`: null-object used when no backend is configured
//!
//! `remote_from_config` picks between the two at startup.

pub mod client;
pub mod error;
pub mod remote;

pub use client::ApiClient;
pub use error::ApiError;
pub use remote::{remote_from_config, OfflineRemote, SettingsRemote};
