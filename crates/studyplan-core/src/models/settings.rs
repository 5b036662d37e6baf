use chrono::{DateTime, Utc};
use serde::{de::DeserializeOwned, Deserialize, Serialize};
use serde_json::Value;

use super::{ChangeType, NotificationPreferences, PendingChange, SrsPreferences, UserProfile};
use crate::utils::age_display;

/// Schema tag of the persisted `SettingsCache`. Entries with any other tag are discarded.
pub const SETTINGS_CACHE_VERSION: &str = "2";

/// Merged local copy of a user's profile and preference rows.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct SettingsCache {
    pub user_id: String,
    pub profile: UserProfile,
    pub notification_preferences: Option<NotificationPreferences>,
    pub srs_preferences: Option<SrsPreferences>,
    /// `None` until the server has confirmed this record at least once
    pub last_synced_at: Option<DateTime<Utc>>,
    pub version: String,
}

impl SettingsCache {
    /// Record for a user the server has not been asked about yet.
    pub fn empty(user_id: impl Into<String>) -> Self {
        Self {
            user_id: user_id.into(),
            profile: UserProfile::default(),
            notification_preferences: None,
            srs_preferences: None,
            last_synced_at: None,
            version: SETTINGS_CACHE_VERSION.to_string(),
        }
    }

    pub fn from_server(
        user_id: impl Into<String>,
        profile: UserProfile,
        notification_preferences: Option<NotificationPreferences>,
        srs_preferences: Option<SrsPreferences>,
    ) -> Self {
        Self {
            user_id: user_id.into(),
            profile,
            notification_preferences,
            srs_preferences,
            last_synced_at: Some(Utc::now()),
            version: SETTINGS_CACHE_VERSION.to_string(),
        }
    }

    pub fn is_current_version(&self) -> bool {
        self.version == SETTINGS_CACHE_VERSION
    }

    pub fn age_minutes(&self) -> Option<i64> {
        self.last_synced_at
            .map(|synced| (Utc::now() - synced).num_minutes())
    }

    /// Never-synced records are always stale.
    pub fn is_stale(&self, stale_after_minutes: i64) -> bool {
        self.age_minutes()
            .map(|age| age > stale_after_minutes)
            .unwrap_or(true)
    }

    pub fn age_display(&self) -> String {
        self.age_minutes()
            .map(age_display)
            .unwrap_or_else(|| "never".to_string())
    }

    /// Write one field into the section `change_type` names.
    ///
    /// The section is rebuilt through its serde representation, so the value
    /// must fit the field's type. Unknown field names land in the section's
    /// `extra` map. On error the record is left untouched.
    pub fn apply_change(
        &mut self,
        change_type: ChangeType,
        field: &str,
        value: Value,
    ) -> Result<(), serde_json::Error> {
        match change_type {
            ChangeType::Profile => set_field(&mut self.profile, field, value),
            ChangeType::NotificationPreferences => {
                let mut prefs = self.notification_preferences.clone().unwrap_or_default();
                set_field(&mut prefs, field, value)?;
                self.notification_preferences = Some(prefs);
                Ok(())
            }
            ChangeType::SrsPreferences => {
                let mut prefs = self.srs_preferences.clone().unwrap_or_default();
                set_field(&mut prefs, field, value)?;
                self.srs_preferences = Some(prefs);
                Ok(())
            }
        }
    }

    /// Re-apply queued local edits on top of freshly fetched server data.
    /// Edits that no longer fit their field are skipped.
    pub fn overlay_pending(&mut self, pending: &[PendingChange]) -> usize {
        pending
            .iter()
            .filter(|change| {
                self.apply_change(change.change_type, &change.field, change.value.clone())
                    .is_ok()
            })
            .count()
    }
}

fn set_field<T>(target: &mut T, field: &str, value: Value) -> Result<(), serde_json::Error>
where
    T: Serialize + DeserializeOwned,
{
    let mut repr = serde_json::to_value(&*target)?;
    if let Value::Object(map) = &mut repr {
        map.insert(field.to_string(), value);
    }
    *target = serde_json::from_value(repr)?;
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::Duration;
    use serde_json::json;

    #[test]
    fn test_empty_cache_is_stale_and_never_synced() {
        let cache = SettingsCache::empty("u1");
        assert!(cache.is_current_version());
        assert!(cache.is_stale(60));
        assert_eq!(cache.age_display(), "never");
    }

    #[test]
    fn test_staleness_threshold() {
        let mut cache = SettingsCache::from_server("u1", UserProfile::default(), None, None);
        assert!(!cache.is_stale(60));
        assert_eq!(cache.age_display(), "just now");

        cache.last_synced_at = Some(Utc::now() - Duration::minutes(120));
        assert!(cache.is_stale(60));
        assert_eq!(cache.age_display(), "2h ago");
    }

    #[test]
    fn test_apply_change_known_and_unknown_profile_fields() {
        let mut cache = SettingsCache::empty("u1");
        cache.apply_change(ChangeType::Profile, "full_name", json!("Grace Hopper")).unwrap();
        cache.apply_change(ChangeType::Profile, "semester", json!("Fall")).unwrap();

        assert_eq!(cache.profile.full_name.as_deref(), Some("Grace Hopper"));
        assert_eq!(cache.profile.extra.get("semester"), Some(&json!("Fall")));
    }

    #[test]
    fn test_apply_change_creates_missing_preference_section() {
        let mut cache = SettingsCache::empty("u1");
        cache
            .apply_change(ChangeType::NotificationPreferences, "lecture_reminders", json!(false))
            .unwrap();
        cache
            .apply_change(ChangeType::SrsPreferences, "new_cards_per_day", json!(5))
            .unwrap();

        let notifications = cache.notification_preferences.unwrap();
        assert!(!notifications.lecture_reminders);
        assert!(notifications.enabled);
        assert_eq!(cache.srs_preferences.unwrap().new_cards_per_day, 5);
    }

    #[test]
    fn test_apply_change_rejects_mistyped_value() {
        let mut cache = SettingsCache::empty("u1");
        let before = cache.clone();
        let result = cache.apply_change(ChangeType::SrsPreferences, "daily_review_limit", json!("lots"));
        assert!(result.is_err());
        assert_eq!(cache, before);
    }

    #[test]
    fn test_overlay_pending() {
        let mut cache = SettingsCache::from_server("u1", UserProfile::default(), None, None);
        let pending = vec![
            PendingChange::new(ChangeType::Profile, "timezone", json!("Asia/Tokyo"), 3),
            PendingChange::new(ChangeType::SrsPreferences, "daily_review_limit", json!("bad"), 3),
        ];
        assert_eq!(cache.overlay_pending(&pending), 1);
        assert_eq!(cache.profile.timezone.as_deref(), Some("Asia/Tokyo"));
    }
}
