//! One-shot switch from "latest comment is the value" to "issue body is the
//! value".
//!
//! Every open issue gets its body overwritten with its last comment and is
//! tagged [`MIGRATED_LABEL`](crate::model::MIGRATED_LABEL). Issues without
//! comments are left alone. Running it again rewrites the same bodies.

use serde::Serialize;
use tracing::{debug, info};

use crate::error::Result;
use crate::model::{Comment, IssuePatch, IssueQuery};
use crate::tracker::{self, Tracker};

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct MigrationReport {
    /// Open issues visited.
    pub scanned: usize,
    /// Issues whose body now holds their last comment.
    pub migrated: usize,
    /// Issues without comments.
    pub skipped: usize,
}

pub fn migrate<T: Tracker + ?Sized>(tracker: &T) -> Result<MigrationReport> {
    let mut report = MigrationReport::default();

    for issue in tracker::issues(tracker, IssueQuery::all()) {
        let issue = issue?;
        report.scanned += 1;

        let mut last: Option<Comment> = None;
        for comment in tracker::comments(tracker, issue.issue_ref()) {
            last = Some(comment?);
        }

        let Some(last) = last else {
            debug!(issue = issue.number, title = %issue.title, "no comments, skipping");
            report.skipped += 1;
            continue;
        };

        tracker.patch_issue(
            &issue.issue_ref(),
            &IssuePatch::canonical_body(&issue, last.body),
        )?;
        debug!(issue = issue.number, title = %issue.title, comment = last.id, "moved last comment into body");
        report.migrated += 1;
    }

    info!(
        scanned = report.scanned,
        migrated = report.migrated,
        skipped = report.skipped,
        "migration finished"
    );
    Ok(report)
}
