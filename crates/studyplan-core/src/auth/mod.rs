//! Authentication session tracking.
//!
//! `Session` remembers which user is signed in and when their access token
//! expires. The token itself is kept by the caller (the CLI stores it in the
//! OS keychain); only the non-secret metadata is persisted here.

pub mod session;

pub use session::{Session, SessionData};
