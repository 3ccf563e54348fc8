//! Maps a key to its backing issue, creating the label and issue on first use.
//!
//! Uniqueness rests on the label: an existing label means the issue is
//! looked up, a missing label means both are created. Two writers racing on
//! a brand-new key can each see the label missing and end up with two
//! issues of the same title. Nothing here reconciles that; readers take
//! the oldest matching issue.

use tracing::{debug, info, warn};

use crate::error::Result;
use crate::model::{Issue, IssueQuery, Key, NewIssue};
use crate::tracker::{self, Tracker};

/// Origin recorded in the body of issues created by single-key writes.
pub const DEFAULT_ORIGIN: &str = "galbi";

pub struct Directory<'a, T: ?Sized> {
    tracker: &'a T,
}

impl<'a, T: Tracker + ?Sized> Directory<'a, T> {
    pub fn new(tracker: &'a T) -> Self {
        Self { tracker }
    }

    /// Oldest open issue labeled and titled `key`.
    fn find_labeled(&self, key: &Key) -> Result<Option<Issue>> {
        let mut found: Option<Issue> = None;
        let mut extra = 0usize;
        for issue in tracker::issues(self.tracker, IssueQuery::labeled(key.as_str())) {
            let issue = issue?;
            if issue.title != key.as_str() {
                continue;
            }
            if found.is_none() {
                found = Some(issue);
            } else {
                extra += 1;
            }
        }
        if extra > 0 {
            warn!(key = %key, duplicates = extra, "key is backed by more than one issue, using the oldest");
        }
        Ok(found)
    }

    /// Resolves `key` to its issue, creating what is missing.
    ///
    /// `origin` is recorded in the body of a newly created issue.
    pub fn resolve_or_create(&self, key: &Key, origin: &str) -> Result<Issue> {
        if self.tracker.label_exists(key.as_str())? {
            if let Some(issue) = self.find_labeled(key)? {
                debug!(key = %key, issue = issue.number, "resolved existing issue");
                return Ok(issue);
            }
        } else {
            self.tracker.create_label(key.as_str())?;
            info!(key = %key, "created label");
        }

        let issue = self.tracker.create_issue(&NewIssue {
            title: key.to_string(),
            body: format!("created from {origin}"),
            labels: vec![key.to_string()],
        })?;
        info!(key = %key, issue = issue.number, "created issue");
        Ok(issue)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::memory::{Call, MemoryTracker};

    fn key(s: &str) -> Key {
        Key::parse(s).unwrap()
    }

    #[test]
    fn test_resolve_twice_creates_once() {
        let tracker = MemoryTracker::new();
        let directory = Directory::new(&tracker);

        let first = directory.resolve_or_create(&key("db.url"), "galbi").unwrap();
        let second = directory.resolve_or_create(&key("db.url"), "galbi").unwrap();

        assert_eq!(first.issue_ref(), second.issue_ref());
        let calls = tracker.calls();
        let label_creations = calls
            .iter()
            .filter(|c| matches!(c, Call::CreateLabel(_)))
            .count();
        let issue_creations = calls
            .iter()
            .filter(|c| matches!(c, Call::CreateIssue(_)))
            .count();
        assert_eq!((label_creations, issue_creations), (1, 1));
        assert_eq!(tracker.labels(), vec!["db.url".to_string()]);
    }

    #[test]
    fn test_new_issue_records_origin() {
        let tracker = MemoryTracker::new();
        let issue = Directory::new(&tracker)
            .resolve_or_create(&key("k"), "settings.json")
            .unwrap();
        assert_eq!(issue.body.as_deref(), Some("created from settings.json"));
        assert!(issue.has_label("k"));
    }

    #[test]
    fn test_existing_label_without_issue_creates_issue_only() {
        let tracker = MemoryTracker::new();
        tracker.create_label("orphan").unwrap();
        tracker.clear_calls();

        Directory::new(&tracker)
            .resolve_or_create(&key("orphan"), "galbi")
            .unwrap();

        assert_eq!(
            tracker.calls(),
            vec![
                Call::LabelExists("orphan".into()),
                Call::ListIssues {
                    label: Some("orphan".into()),
                    page: 1
                },
                Call::CreateIssue("orphan".into()),
            ]
        );
    }

    #[test]
    fn test_title_must_match_exactly() {
        let tracker = MemoryTracker::new();
        // shares the label but not the title
        tracker.seed_issue("k-notes", &["k"], &[]);
        let real = tracker.seed_issue("k", &["k"], &[]);

        tracker.clear_calls();

        let found = Directory::new(&tracker)
            .resolve_or_create(&key("k"), "galbi")
            .unwrap();
        assert_eq!(found.number, real.number);
        assert!(!tracker
            .calls()
            .iter()
            .any(|c| matches!(c, Call::CreateIssue(_))));
    }

    #[test]
    fn test_duplicates_resolve_to_oldest() {
        let tracker = MemoryTracker::new();
        let oldest = tracker.seed_issue("k", &["k"], &[]);
        tracker.seed_issue("k", &["k"], &[]);

        let issue = Directory::new(&tracker)
            .resolve_or_create(&key("k"), "galbi")
            .unwrap();
        assert_eq!(issue.number, oldest.number);
    }
}
