//! Pure operations on the pending-change list.

use serde_json::{Map, Value};

use crate::models::{ChangeType, PendingChange, SyncOutcome};

/// Queue a write, replacing any queued change to the same field.
pub fn upsert(
    queue: &mut Vec<PendingChange>,
    change_type: ChangeType,
    field: &str,
    value: Value,
    max_retries: u32,
) {
    match queue.iter_mut().find(|c| c.targets(change_type, field)) {
        Some(existing) => existing.supersede(value),
        None => queue.push(PendingChange::new(change_type, field, value, max_retries)),
    }
}

/// Changes grouped by type, groups in order of first appearance.
pub fn group_by_type(queue: &[PendingChange]) -> Vec<(ChangeType, Vec<&PendingChange>)> {
    let mut groups: Vec<(ChangeType, Vec<&PendingChange>)> = Vec::new();
    for change in queue {
        match groups.iter_mut().find(|(t, _)| *t == change.change_type) {
            Some((_, changes)) => changes.push(change),
            None => groups.push((change.change_type, vec![change])),
        }
    }
    groups
}

/// One update payload: field name to value.
pub fn batch_payload(changes: &[&PendingChange]) -> Map<String, Value> {
    changes
        .iter()
        .map(|c| (c.field.clone(), c.value.clone()))
        .collect()
}

/// Fold the results of a sync pass into the queue as it is now.
///
/// `sent` is the queue as it was read before submitting. Entries of `current`
/// identical to a sent entry are resolved: removed when their type-group
/// succeeded, otherwise charged one retry and removed once exhausted. Entries
/// written after the read (new fields, or superseded values) are kept as is.
pub fn reconcile(
    current: Vec<PendingChange>,
    sent: &[PendingChange],
    succeeded: impl Fn(ChangeType) -> bool,
) -> (Vec<PendingChange>, SyncOutcome) {
    let mut outcome = SyncOutcome {
        synced: sent.iter().filter(|c| succeeded(c.change_type)).count(),
        failed: 0,
    };

    let mut survivors = Vec::with_capacity(current.len());
    for mut change in current {
        if !sent.contains(&change) {
            survivors.push(change);
            continue;
        }
        if succeeded(change.change_type) {
            continue;
        }
        if change.record_failure() {
            outcome.failed += 1;
        } else {
            survivors.push(change);
        }
    }

    (survivors, outcome)
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn test_upsert_collapses_writes_to_same_field() {
        let mut queue = Vec::new();
        upsert(&mut queue, ChangeType::Profile, "major", json!("Physics"), 3);
        upsert(&mut queue, ChangeType::Profile, "timezone", json!("UTC"), 3);
        upsert(&mut queue, ChangeType::Profile, "major", json!("Mathematics"), 3);

        assert_eq!(queue.len(), 2);
        assert_eq!(queue[0].field, "major");
        assert_eq!(queue[0].value, json!("Mathematics"));
    }

    #[test]
    fn test_same_field_name_in_different_types_is_distinct() {
        let mut queue = Vec::new();
        upsert(&mut queue, ChangeType::NotificationPreferences, "enabled", json!(true), 3);
        upsert(&mut queue, ChangeType::SrsPreferences, "enabled", json!(false), 3);
        assert_eq!(queue.len(), 2);
    }

    #[test]
    fn test_group_by_type_preserves_first_appearance() {
        let mut queue = Vec::new();
        upsert(&mut queue, ChangeType::SrsPreferences, "new_cards_per_day", json!(10), 3);
        upsert(&mut queue, ChangeType::Profile, "major", json!("Biology"), 3);
        upsert(&mut queue, ChangeType::SrsPreferences, "daily_review_limit", json!(80), 3);

        let groups = group_by_type(&queue);
        assert_eq!(groups.len(), 2);
        assert_eq!(groups[0].0, ChangeType::SrsPreferences);
        assert_eq!(groups[0].1.len(), 2);
        assert_eq!(groups[1].0, ChangeType::Profile);

        let payload = batch_payload(&groups[0].1);
        assert_eq!(payload.get("new_cards_per_day"), Some(&json!(10)));
        assert_eq!(payload.get("daily_review_limit"), Some(&json!(80)));
    }

    #[test]
    fn test_reconcile_success_and_failure() {
        let mut queue = Vec::new();
        upsert(&mut queue, ChangeType::Profile, "major", json!("Biology"), 2);
        upsert(&mut queue, ChangeType::SrsPreferences, "new_cards_per_day", json!(10), 2);
        let sent = queue.clone();

        let (survivors, outcome) =
            reconcile(queue, &sent, |t| t == ChangeType::Profile);
        assert_eq!(outcome, SyncOutcome { synced: 1, failed: 0 });
        assert_eq!(survivors.len(), 1);
        assert_eq!(survivors[0].retry_count, 1);

        let sent = survivors.clone();
        let (survivors, outcome) = reconcile(survivors, &sent, |_| false);
        assert_eq!(outcome, SyncOutcome { synced: 0, failed: 1 });
        assert!(survivors.is_empty());
    }

    #[test]
    fn test_reconcile_keeps_writes_made_during_flight() {
        let mut queue = Vec::new();
        upsert(&mut queue, ChangeType::Profile, "major", json!("Biology"), 3);
        let sent = queue.clone();

        // Newer value for the in-flight field plus a brand new field
        queue[0].supersede(json!("Chemistry"));
        upsert(&mut queue, ChangeType::Profile, "timezone", json!("UTC"), 3);

        let (survivors, outcome) = reconcile(queue, &sent, |_| true);
        assert_eq!(outcome.synced, 1);
        assert_eq!(survivors.len(), 2);
        assert_eq!(survivors[0].value, json!("Chemistry"));
        assert_eq!(survivors[0].retry_count, 0);
    }
}
