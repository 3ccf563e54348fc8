use std::collections::BTreeSet;

use galbi::memory::{Call, MemoryTracker};
use galbi::{migrate, Convention, Key, MigrationReport, Store, MIGRATED_LABEL};
use serde_json::json;

#[test]
fn test_last_comment_becomes_body() {
    let tracker = MemoryTracker::new();
    let issue = tracker.seed_issue("k", &["k"], &["a", "b", "c"]);

    let report = migrate(&tracker).unwrap();

    assert_eq!(
        report,
        MigrationReport {
            scanned: 1,
            migrated: 1,
            skipped: 0
        }
    );
    let migrated = &tracker.issues()[0];
    assert_eq!(migrated.number, issue.number);
    assert_eq!(migrated.body.as_deref(), Some("c"));
    assert_eq!(migrated.convention(), Convention::Migrated);
    // history is untouched
    assert_eq!(tracker.comment_bodies(issue.number), vec!["a", "b", "c"]);
}

#[test]
fn test_running_twice_is_idempotent() {
    let tracker = MemoryTracker::new();
    tracker.seed_issue("k", &["k"], &["a", "b", "c"]);

    migrate(&tracker).unwrap();
    let once = tracker.issues();
    migrate(&tracker).unwrap();
    let twice = tracker.issues();

    assert_eq!(once, twice);
    assert_eq!(twice[0].body.as_deref(), Some("c"));
    let tags = twice[0]
        .labels
        .iter()
        .filter(|l| l.name == MIGRATED_LABEL)
        .count();
    assert_eq!(tags, 1);
}

#[test]
fn test_issue_without_comments_is_skipped() {
    let tracker = MemoryTracker::new();
    let empty = tracker.seed_issue("empty", &["empty"], &[]);
    tracker.seed_issue("full", &["full"], &["1"]);

    let report = migrate(&tracker).unwrap();

    assert_eq!((report.scanned, report.migrated, report.skipped), (2, 1, 1));
    assert!(!tracker.calls().contains(&Call::PatchIssue(empty.number)));
    assert_eq!(tracker.issues()[0].body.as_deref(), Some("seeded"));
}

#[test]
fn test_walks_every_comment_page() {
    let tracker = MemoryTracker::new();
    let bodies: Vec<String> = (0..120).map(|i| i.to_string()).collect();
    let refs: Vec<&str> = bodies.iter().map(String::as_str).collect();
    tracker.seed_issue("k", &["k"], &refs);

    migrate(&tracker).unwrap();

    assert_eq!(tracker.issues()[0].body.as_deref(), Some("119"));
}

#[test]
fn test_migrated_issues_read_from_body() {
    let tracker = MemoryTracker::new();
    let store = Store::new(&tracker);
    let key = Key::parse("k").unwrap();
    store.upsert(&key, &json!("old")).unwrap();
    store.upsert(&key, &json!("new")).unwrap();

    migrate(&tracker).unwrap();
    tracker.clear_calls();

    let found = store.get(&BTreeSet::from([key.clone()])).unwrap();
    assert_eq!(found[&key], json!("new"));
    assert!(tracker
        .calls()
        .iter()
        .all(|call| !matches!(call, Call::ListComments { .. })));
    // revisions still come from comments
    assert_eq!(store.get_revision(&key, 0).unwrap(), json!("old"));
}
