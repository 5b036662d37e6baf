use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};

/// Partial `profiles` row. Columns this crate does not model are kept in `extra`
/// so a field written by name always survives a round trip.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct UserProfile {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub id: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub full_name: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub email: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub university: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub major: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub timezone: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub avatar_url: Option<String>,
    #[serde(flatten)]
    pub extra: Map<String, Value>,
}

impl UserProfile {
    pub fn display_name(&self) -> &str {
        self.full_name
            .as_deref()
            .or(self.email.as_deref())
            .unwrap_or("Student")
    }
}

/// Profile as returned by the backend: the row itself plus its nested
/// `preferences` JSON column, which carries the SRS settings under `srs`.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct ProfileRow {
    #[serde(default)]
    pub preferences: Option<Value>,
    #[serde(flatten)]
    pub profile: UserProfile,
}

impl ProfileRow {
    /// SRS preferences nested under `preferences.srs`, if present and well formed.
    pub fn srs_preferences(&self) -> Option<SrsPreferences> {
        let srs = self.preferences.as_ref()?.get("srs")?;
        serde_json::from_value(srs.clone()).ok()
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct NotificationPreferences {
    pub enabled: bool,
    pub assignment_reminders: bool,
    pub lecture_reminders: bool,
    pub study_session_reminders: bool,
    /// Minutes before an event that its reminder fires
    pub reminder_lead_minutes: u32,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub quiet_hours_start: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub quiet_hours_end: Option<String>,
    #[serde(flatten)]
    pub extra: Map<String, Value>,
}

impl Default for NotificationPreferences {
    fn default() -> Self {
        Self {
            enabled: true,
            assignment_reminders: true,
            lecture_reminders: true,
            study_session_reminders: true,
            reminder_lead_minutes: 30,
            quiet_hours_start: None,
            quiet_hours_end: None,
            extra: Map::new(),
        }
    }
}

/// Spaced-repetition review settings.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct SrsPreferences {
    pub daily_review_limit: u32,
    pub new_cards_per_day: u32,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub review_reminder_time: Option<String>,
    #[serde(flatten)]
    pub extra: Map<String, Value>,
}

impl Default for SrsPreferences {
    fn default() -> Self {
        Self {
            daily_review_limit: 100,
            new_cards_per_day: 20,
            review_reminder_time: None,
            extra: Map::new(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn test_profile_row_splits_preferences_from_columns() {
        let row: ProfileRow = serde_json::from_value(json!({
            "id": "u1",
            "full_name": "Ada Lovelace",
            "graduation_year": 2027,
            "preferences": { "srs": { "daily_review_limit": 40 }, "theme": "dark" }
        }))
        .unwrap();

        assert_eq!(row.profile.full_name.as_deref(), Some("Ada Lovelace"));
        assert_eq!(row.profile.extra.get("graduation_year"), Some(&json!(2027)));
        assert!(!row.profile.extra.contains_key("preferences"));

        let srs = row.srs_preferences().unwrap();
        assert_eq!(srs.daily_review_limit, 40);
        assert_eq!(srs.new_cards_per_day, 20);
    }

    #[test]
    fn test_profile_row_without_srs() {
        let row: ProfileRow = serde_json::from_value(json!({ "id": "u1" })).unwrap();
        assert!(row.srs_preferences().is_none());
    }

    #[test]
    fn test_display_name_fallbacks() {
        let mut profile = UserProfile::default();
        assert_eq!(profile.display_name(), "Student");
        profile.email = Some("ada@example.edu".to_string());
        assert_eq!(profile.display_name(), "ada@example.edu");
        profile.full_name = Some("Ada".to_string());
        assert_eq!(profile.display_name(), "Ada");
    }

    #[test]
    fn test_notification_preferences_defaults_fill_missing_columns() {
        let prefs: NotificationPreferences =
            serde_json::from_value(json!({ "enabled": false, "user_id": "u1" })).unwrap();
        assert!(!prefs.enabled);
        assert!(prefs.assignment_reminders);
        assert_eq!(prefs.reminder_lead_minutes, 30);
        assert_eq!(prefs.extra.get("user_id"), Some(&json!("u1")));
    }
}
