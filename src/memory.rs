//! In-memory [`Tracker`] with the same ordering and paging rules as the
//! remote one. Every call is journaled so callers can see which pages were
//! requested and what was created.

use std::collections::BTreeSet;
use std::sync::{Mutex, MutexGuard};

use chrono::{DateTime, Utc};

use crate::error::{Error, Result};
use crate::model::{Comment, Issue, IssuePatch, IssueQuery, IssueRef, Label, NewIssue};
use crate::tracker::Tracker;

/// A call made against a [`MemoryTracker`].
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Call {
    LabelExists(String),
    CreateLabel(String),
    ListIssues { label: Option<String>, page: u32 },
    CreateIssue(String),
    PatchIssue(u64),
    ListComments { issue: u64, page: u32, per_page: u32 },
    CreateComment(u64),
}

struct StoredIssue {
    issue: Issue,
    comments: Vec<Comment>,
}

#[derive(Default)]
struct State {
    labels: BTreeSet<String>,
    issues: Vec<StoredIssue>,
    next_comment_id: u64,
    calls: Vec<Call>,
}

impl State {
    fn issue_mut(&mut self, number: u64) -> Result<&mut StoredIssue> {
        self.issues
            .iter_mut()
            .find(|s| s.issue.number == number)
            .ok_or_else(|| not_found("issues", number))
    }

    fn snapshot(stored: &StoredIssue) -> Issue {
        let mut issue = stored.issue.clone();
        issue.comments = stored.comments.len() as u64;
        issue
    }

    fn push_issue(
        &mut self,
        title: &str,
        body: &str,
        labels: &[String],
        comments: Vec<Comment>,
    ) -> Issue {
        for label in labels {
            self.labels.insert(label.clone());
        }
        let number = self.issues.len() as u64 + 1;
        let issue = Issue {
            number,
            title: title.to_string(),
            body: Some(body.to_string()),
            url: format!("memory://issues/{number}"),
            comments_url: format!("memory://issues/{number}/comments"),
            comments: comments.len() as u64,
            labels: labels
                .iter()
                .map(|name| Label { name: name.clone() })
                .collect(),
        };
        self.issues.push(StoredIssue {
            issue: issue.clone(),
            comments,
        });
        issue
    }

    fn next_comment(&mut self, body: &str) -> Comment {
        self.next_comment_id += 1;
        Comment {
            id: self.next_comment_id,
            body: body.to_string(),
            created_at: timestamp(self.next_comment_id),
        }
    }

    fn push_comment(&mut self, number: u64, body: &str) -> Result<Comment> {
        // a missing issue must not consume an id
        self.issue_mut(number)?;
        let comment = self.next_comment(body);
        self.issue_mut(number)?.comments.push(comment.clone());
        Ok(comment)
    }
}

/// Comment timestamps advance one second per comment so ordering is strict.
fn timestamp(seq: u64) -> DateTime<Utc> {
    // 2024-01-01T00:00:00Z
    DateTime::from_timestamp(1_704_067_200 + seq as i64, 0).unwrap_or_default()
}

fn not_found(collection: &str, number: u64) -> Error {
    Error::Transport {
        method: "GET",
        url: format!("memory://{collection}/{number}"),
        status: 404,
        body: "Not Found".into(),
    }
}

fn page_of<T: Clone>(items: &[T], page: u32, per_page: u32) -> Vec<T> {
    let start = (page.max(1) as usize - 1) * per_page as usize;
    items
        .iter()
        .skip(start)
        .take(per_page as usize)
        .cloned()
        .collect()
}

#[derive(Default)]
pub struct MemoryTracker {
    state: Mutex<State>,
}

impl MemoryTracker {
    pub fn new() -> Self {
        Self::default()
    }

    fn state(&self) -> MutexGuard<'_, State> {
        // a panic while holding the lock leaves the journal usable
        self.state.lock().unwrap_or_else(|e| e.into_inner())
    }

    /// Adds an issue with pre-existing comments, bypassing the journal.
    pub fn seed_issue(&self, title: &str, labels: &[&str], comments: &[&str]) -> Issue {
        let mut state = self.state();
        let labels: Vec<String> = labels.iter().map(|l| l.to_string()).collect();
        let comments = comments.iter().map(|body| state.next_comment(body)).collect();
        state.push_issue(title, "seeded", &labels, comments)
    }

    pub fn calls(&self) -> Vec<Call> {
        self.state().calls.clone()
    }

    pub fn clear_calls(&self) {
        self.state().calls.clear();
    }

    pub fn labels(&self) -> Vec<String> {
        self.state().labels.iter().cloned().collect()
    }

    /// Current state of every issue, oldest first.
    pub fn issues(&self) -> Vec<Issue> {
        self.state().issues.iter().map(State::snapshot).collect()
    }

    pub fn comment_bodies(&self, number: u64) -> Vec<String> {
        self.state()
            .issues
            .iter()
            .find(|s| s.issue.number == number)
            .map(|s| s.comments.iter().map(|c| c.body.clone()).collect())
            .unwrap_or_default()
    }
}

impl Tracker for MemoryTracker {
    fn label_exists(&self, name: &str) -> Result<bool> {
        let mut state = self.state();
        state.calls.push(Call::LabelExists(name.to_string()));
        Ok(state.labels.contains(name))
    }

    fn create_label(&self, name: &str) -> Result<()> {
        let mut state = self.state();
        state.calls.push(Call::CreateLabel(name.to_string()));
        if !state.labels.insert(name.to_string()) {
            return Err(Error::Transport {
                method: "POST",
                url: "memory://labels".into(),
                status: 422,
                body: format!("label '{name}' already exists"),
            });
        }
        Ok(())
    }

    fn list_issues(&self, query: &IssueQuery, page: u32, per_page: u32) -> Result<Vec<Issue>> {
        let mut state = self.state();
        state.calls.push(Call::ListIssues {
            label: query.label.clone(),
            page,
        });
        let matching: Vec<Issue> = state
            .issues
            .iter()
            .filter(|s| match &query.label {
                Some(label) => s.issue.has_label(label),
                None => true,
            })
            .map(State::snapshot)
            .collect();
        Ok(page_of(&matching, page, per_page))
    }

    fn create_issue(&self, issue: &NewIssue) -> Result<Issue> {
        let mut state = self.state();
        state.calls.push(Call::CreateIssue(issue.title.clone()));
        Ok(state.push_issue(
            &issue.title,
            &issue.body,
            &issue.labels,
            Vec::new(),
        ))
    }

    fn patch_issue(&self, issue: &IssueRef, patch: &IssuePatch) -> Result<Issue> {
        let mut state = self.state();
        state.calls.push(Call::PatchIssue(issue.number));
        let mut new_labels = Vec::new();
        let stored = state.issue_mut(issue.number)?;
        if let Some(body) = &patch.body {
            stored.issue.body = Some(body.clone());
        }
        if let Some(labels) = &patch.labels {
            stored.issue.labels = labels
                .iter()
                .map(|name| Label { name: name.clone() })
                .collect();
            new_labels = labels.clone();
        }
        let updated = State::snapshot(stored);
        // the tracker creates labels named in a patch on the fly
        state.labels.extend(new_labels);
        Ok(updated)
    }

    fn list_comments(&self, issue: &IssueRef, page: u32, per_page: u32) -> Result<Vec<Comment>> {
        let mut state = self.state();
        state.calls.push(Call::ListComments {
            issue: issue.number,
            page,
            per_page,
        });
        let stored = state.issue_mut(issue.number)?;
        Ok(page_of(&stored.comments, page, per_page))
    }

    fn create_comment(&self, issue: &IssueRef, body: &str) -> Result<Comment> {
        let mut state = self.state();
        state.calls.push(Call::CreateComment(issue.number));
        state.push_comment(issue.number, body)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_seeded_comments_share_id_sequence() {
        let tracker = MemoryTracker::new();
        let first = tracker.seed_issue("a", &["a"], &["1", "2"]);
        let second = tracker.seed_issue("b", &["b"], &["3"]);

        assert_eq!((first.comments, second.comments), (2, 1));
        let seeded = tracker.list_comments(&second.issue_ref(), 1, 100).unwrap();
        assert_eq!(seeded[0].id, 3);

        let missing = IssueRef {
            number: 9,
            url: "memory://issues/9".into(),
            comments_url: "memory://issues/9/comments".into(),
        };
        assert!(tracker.create_comment(&missing, "lost").is_err());
        let next = tracker.create_comment(&first.issue_ref(), "4").unwrap();
        assert_eq!(next.id, 4);
        assert_eq!(tracker.comment_bodies(first.number), vec!["1", "2", "4"]);
    }

    #[test]
    fn test_comment_pages_follow_creation_order() {
        let tracker = MemoryTracker::new();
        let bodies: Vec<String> = (0..150).map(|i| i.to_string()).collect();
        let refs: Vec<&str> = bodies.iter().map(String::as_str).collect();
        let issue = tracker.seed_issue("k", &["k"], &refs);

        assert_eq!(issue.comments, 150);
        let page2 = tracker.list_comments(&issue.issue_ref(), 2, 100).unwrap();
        assert_eq!(page2.len(), 50);
        assert_eq!(page2[0].body, "100");
        assert!(page2[0].created_at < page2[1].created_at);

        // one comment per page addresses the n-th comment directly
        let last = tracker.list_comments(&issue.issue_ref(), 150, 1).unwrap();
        assert_eq!(last[0].body, "149");
    }

    #[test]
    fn test_label_filter_and_duplicate_label() {
        let tracker = MemoryTracker::new();
        tracker.seed_issue("a", &["a"], &[]);
        tracker.seed_issue("b", &["b"], &[]);

        let only_b = tracker.list_issues(&IssueQuery::labeled("b"), 1, 100).unwrap();
        assert_eq!(only_b.len(), 1);
        assert_eq!(only_b[0].title, "b");

        assert!(matches!(
            tracker.create_label("a"),
            Err(Error::Transport { status: 422, .. })
        ));
    }

    #[test]
    fn test_unknown_issue_is_a_transport_error() {
        let tracker = MemoryTracker::new();
        let missing = IssueRef {
            number: 9,
            url: "memory://issues/9".into(),
            comments_url: "memory://issues/9/comments".into(),
        };
        assert!(matches!(
            tracker.create_comment(&missing, "x"),
            Err(Error::Transport { status: 404, .. })
        ));
    }
}
