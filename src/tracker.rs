use crate::error::Result;
use crate::model::{Comment, Issue, IssuePatch, IssueQuery, IssueRef, NewIssue};
use crate::pager::Pager;

/// The slice of an issue tracker's REST surface the store depends on.
///
/// Every call is blocking and reports any non-success response as an
/// error. Listings are ordered oldest first and pages are numbered from 1.
pub trait Tracker {
    fn label_exists(&self, name: &str) -> Result<bool>;

    fn create_label(&self, name: &str) -> Result<()>;

    /// One page of open issues matching `query`.
    fn list_issues(&self, query: &IssueQuery, page: u32, per_page: u32) -> Result<Vec<Issue>>;

    fn create_issue(&self, issue: &NewIssue) -> Result<Issue>;

    fn patch_issue(&self, issue: &IssueRef, patch: &IssuePatch) -> Result<Issue>;

    /// One page of an issue's comments in creation order.
    fn list_comments(&self, issue: &IssueRef, page: u32, per_page: u32) -> Result<Vec<Comment>>;

    fn create_comment(&self, issue: &IssueRef, body: &str) -> Result<Comment>;
}

impl<T: Tracker + ?Sized> Tracker for &T {
    fn label_exists(&self, name: &str) -> Result<bool> {
        (**self).label_exists(name)
    }

    fn create_label(&self, name: &str) -> Result<()> {
        (**self).create_label(name)
    }

    fn list_issues(&self, query: &IssueQuery, page: u32, per_page: u32) -> Result<Vec<Issue>> {
        (**self).list_issues(query, page, per_page)
    }

    fn create_issue(&self, issue: &NewIssue) -> Result<Issue> {
        (**self).create_issue(issue)
    }

    fn patch_issue(&self, issue: &IssueRef, patch: &IssuePatch) -> Result<Issue> {
        (**self).patch_issue(issue, patch)
    }

    fn list_comments(&self, issue: &IssueRef, page: u32, per_page: u32) -> Result<Vec<Comment>> {
        (**self).list_comments(issue, page, per_page)
    }

    fn create_comment(&self, issue: &IssueRef, body: &str) -> Result<Comment> {
        (**self).create_comment(issue, body)
    }
}

/// Every open issue matching `query`, fetched page by page.
pub fn issues<'a, T: Tracker + ?Sized>(
    tracker: &'a T,
    query: IssueQuery,
) -> Pager<Issue, impl FnMut(u32, u32) -> Result<Vec<Issue>> + 'a> {
    Pager::new(move |page, per_page| tracker.list_issues(&query, page, per_page))
}

/// Every comment of `issue`, oldest first, fetched page by page.
pub fn comments<'a, T: Tracker + ?Sized>(
    tracker: &'a T,
    issue: IssueRef,
) -> Pager<Comment, impl FnMut(u32, u32) -> Result<Vec<Comment>> + 'a> {
    Pager::new(move |page, per_page| tracker.list_comments(&issue, page, per_page))
}
