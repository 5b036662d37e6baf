use std::fmt;
use std::str::FromStr;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::Value;
use thiserror::Error;

/// Entity kind a pending change targets. Each kind is submitted as one batch.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
#[cfg_attr(feature = "ts", derive(ts_rs::TS))]
pub enum ChangeType {
    Profile,
    NotificationPreferences,
    SrsPreferences,
}

impl ChangeType {
    pub const ALL: [ChangeType; 3] = [
        ChangeType::Profile,
        ChangeType::NotificationPreferences,
        ChangeType::SrsPreferences,
    ];

    pub fn as_str(&self) -> &'static str {
        match self {
            ChangeType::Profile => "profile",
            ChangeType::NotificationPreferences => "notification_preferences",
            ChangeType::SrsPreferences => "srs_preferences",
        }
    }
}

impl fmt::Display for ChangeType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

#[derive(Error, Debug, PartialEq, Eq)]
#[error("Unknown change type '{0}' (expected profile, notification_preferences or srs_preferences)")]
pub struct ParseChangeTypeError(pub String);

impl FromStr for ChangeType {
    type Err = ParseChangeTypeError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        ChangeType::ALL
            .into_iter()
            .find(|t| t.as_str() == s)
            .ok_or_else(|| ParseChangeTypeError(s.to_string()))
    }
}

/// A local edit to one field that the server has not confirmed yet.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct PendingChange {
    pub id: String,
    #[serde(rename = "type")]
    pub change_type: ChangeType,
    pub field: String,
    pub value: Value,
    pub timestamp: DateTime<Utc>,
    pub retry_count: u32,
    pub max_retries: u32,
}

impl PendingChange {
    pub fn new(change_type: ChangeType, field: impl Into<String>, value: Value, max_retries: u32) -> Self {
        let field = field.into();
        let timestamp = Utc::now();
        Self {
            id: Self::make_id(change_type, &field, timestamp),
            change_type,
            field,
            value,
            timestamp,
            retry_count: 0,
            max_retries,
        }
    }

    fn make_id(change_type: ChangeType, field: &str, timestamp: DateTime<Utc>) -> String {
        format!("{}_{}_{}", change_type, field, timestamp.timestamp_millis())
    }

    pub fn targets(&self, change_type: ChangeType, field: &str) -> bool {
        self.change_type == change_type && self.field == field
    }

    /// Replace the queued value with a newer write. The retry count carries over.
    pub fn supersede(&mut self, value: Value) {
        self.timestamp = Utc::now();
        self.id = Self::make_id(self.change_type, &self.field, self.timestamp);
        self.value = value;
    }

    /// Count one failed submission. Returns true once the retry budget is spent.
    pub fn record_failure(&mut self) -> bool {
        self.retry_count = self.retry_count.saturating_add(1);
        self.is_exhausted()
    }

    pub fn is_exhausted(&self) -> bool {
        self.retry_count >= self.max_retries
    }
}

/// Result of one drain of the pending queue, in individual field changes.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[cfg_attr(feature = "ts", derive(ts_rs::TS))]
pub struct SyncOutcome {
    pub synced: usize,
    pub failed: usize,
}

impl SyncOutcome {
    pub fn is_empty(&self) -> bool {
        self.synced == 0 && self.failed == 0
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn test_change_type_parse_and_display() {
        for t in ChangeType::ALL {
            assert_eq!(t.to_string().parse::<ChangeType>(), Ok(t));
        }
        assert_eq!(
            "courses".parse::<ChangeType>(),
            Err(ParseChangeTypeError("courses".to_string()))
        );
    }

    #[test]
    fn test_pending_change_id_derived_from_type_field_time() {
        let change = PendingChange::new(ChangeType::Profile, "full_name", json!("Ada"), 3);
        let expected = format!("profile_full_name_{}", change.timestamp.timestamp_millis());
        assert_eq!(change.id, expected);
        assert_eq!(change.retry_count, 0);
    }

    #[test]
    fn test_supersede_keeps_retry_count() {
        let mut change = PendingChange::new(ChangeType::Profile, "timezone", json!("UTC"), 3);
        change.record_failure();
        change.supersede(json!("Europe/Berlin"));
        assert_eq!(change.value, json!("Europe/Berlin"));
        assert_eq!(change.retry_count, 1);
    }

    #[test]
    fn test_record_failure_exhausts_at_max() {
        let mut change = PendingChange::new(ChangeType::SrsPreferences, "daily_review_limit", json!(50), 2);
        assert!(!change.record_failure());
        assert!(change.record_failure());
        assert!(change.is_exhausted());
    }

    #[test]
    fn test_pending_change_wire_shape() {
        let change = PendingChange::new(ChangeType::NotificationPreferences, "enabled", json!(false), 3);
        let value = serde_json::to_value(&change).unwrap();
        assert_eq!(value["type"], json!("notification_preferences"));
        assert_eq!(value["retryCount"], json!(0));
        assert_eq!(value["maxRetries"], json!(3));
    }
}
