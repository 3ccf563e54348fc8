//! Versioned key-value operations on top of a [`Tracker`].
//!
//! Every write appends a comment holding the JSON value, so a key's comments
//! are its revision history. Revision `rev` is the `rev`-th comment in
//! creation order. Which comment or body holds the current value depends on
//! the issue's [`Convention`].

use std::collections::{BTreeMap, BTreeSet};

use serde_json::Value;
use tracing::{debug, info};

use crate::directory::{Directory, DEFAULT_ORIGIN};
use crate::error::{Error, Result};
use crate::model::{Convention, Issue, IssuePatch, IssueQuery, Key, Revision, WriteMode};
use crate::pager::{FIRST_PAGE, PAGE_SIZE};
use crate::tracker::{self, Tracker};

pub struct Store<T> {
    tracker: T,
    mode: WriteMode,
}

impl<T: Tracker> Store<T> {
    pub fn new(tracker: T) -> Self {
        Self {
            tracker,
            mode: WriteMode::default(),
        }
    }

    pub fn with_mode(mut self, mode: WriteMode) -> Self {
        self.mode = mode;
        self
    }

    pub fn tracker(&self) -> &T {
        &self.tracker
    }

    /// Writes `value` as the newest revision of `key`.
    pub fn upsert(&self, key: &Key, value: &Value) -> Result<()> {
        self.upsert_from(key, value, DEFAULT_ORIGIN)
    }

    /// Like [`Store::upsert`], recording `origin` if the key's issue is new.
    pub fn upsert_from(&self, key: &Key, value: &Value, origin: &str) -> Result<()> {
        let issue = Directory::new(&self.tracker).resolve_or_create(key, origin)?;
        let body = serde_json::to_string(value)?;

        // a migrated body is read back, so it has to follow every write
        let patch_body = match issue.convention() {
            Convention::Migrated => true,
            Convention::Legacy => self.mode == WriteMode::Mirror && issue.comments > 0,
        };
        if patch_body {
            self.tracker.patch_issue(
                &issue.issue_ref(),
                &IssuePatch::canonical_body(&issue, body.clone()),
            )?;
            debug!(key = %key, issue = issue.number, "mirrored value into issue body");
        }

        let comment = self.tracker.create_comment(&issue.issue_ref(), &body)?;
        debug!(key = %key, comment = comment.id, "appended revision");
        Ok(())
    }

    /// Upserts every entry of `entries`, in key order.
    ///
    /// Stops at the first failure; entries written before it stay written.
    pub fn deploy(&self, entries: &BTreeMap<Key, Value>, origin: &str) -> Result<usize> {
        for (key, value) in entries {
            self.upsert_from(key, value, origin)?;
        }
        info!(count = entries.len(), origin, "deployed entries");
        Ok(entries.len())
    }

    /// Current values of the requested keys. Keys without a value are left
    /// out of the result.
    ///
    /// Open issues are walked page by page; no further page is requested
    /// once every key has been found.
    pub fn get(&self, keys: &BTreeSet<Key>) -> Result<BTreeMap<Key, Value>> {
        let mut pending: BTreeSet<&str> = keys.iter().map(Key::as_str).collect();
        let mut found = BTreeMap::new();
        if pending.is_empty() {
            return Ok(found);
        }

        for issue in tracker::issues(&self.tracker, IssueQuery::all()) {
            let issue = issue?;
            let Some(key) = keys.get(issue.title.as_str()) else {
                continue;
            };
            if !pending.contains(key.as_str()) {
                continue;
            }
            let Some(value) = self.current_value(&issue)? else {
                continue;
            };
            pending.remove(key.as_str());
            found.insert(key.clone(), value);
            if pending.is_empty() {
                break;
            }
        }

        Ok(found)
    }

    /// Current value of a single key.
    pub fn get_one(&self, key: &Key) -> Result<Value> {
        let keys = BTreeSet::from([key.clone()]);
        self.get(&keys)?
            .remove(key)
            .ok_or_else(|| Error::KeyNotFound {
                key: key.to_string(),
            })
    }

    /// The value an issue currently holds, `None` for a legacy issue without
    /// comments.
    fn current_value(&self, issue: &Issue) -> Result<Option<Value>> {
        let body = match issue.convention() {
            Convention::Migrated => issue.body.clone().unwrap_or_default(),
            Convention::Legacy => {
                if issue.comments == 0 {
                    return Ok(None);
                }
                // with one comment per page, page N is the N-th comment
                let page = u32::try_from(issue.comments).unwrap_or(u32::MAX);
                let latest = self.tracker.list_comments(&issue.issue_ref(), page, 1)?;
                match latest.into_iter().next() {
                    Some(comment) => comment.body,
                    None => return Ok(None),
                }
            }
        };
        decode(&issue.title, &body).map(Some)
    }

    /// Value of revision `rev` (0 = first write) of `key`.
    pub fn get_revision(&self, key: &Key, rev: u64) -> Result<Value> {
        let issue = self.single_issue(key)?;

        let page = u32::try_from(rev / u64::from(PAGE_SIZE))
            .ok()
            .and_then(|p| p.checked_add(FIRST_PAGE))
            .ok_or_else(|| revision_not_found(key, rev))?;
        let offset = (rev % u64::from(PAGE_SIZE)) as usize;

        let comments = self
            .tracker
            .list_comments(&issue.issue_ref(), page, PAGE_SIZE)?;
        let comment = comments
            .get(offset)
            .ok_or_else(|| revision_not_found(key, rev))?;
        decode(key.as_str(), &comment.body)
    }

    /// Every revision of `key`, oldest first.
    pub fn history(&self, key: &Key) -> Result<Vec<Revision>> {
        let issue = self.single_issue(key)?;
        tracker::comments(&self.tracker, issue.issue_ref())
            .zip(0u64..)
            .map(|(comment, rev)| {
                let comment = comment?;
                Ok(Revision {
                    rev,
                    created_at: comment.created_at,
                    value: decode(key.as_str(), &comment.body)?,
                })
            })
            .collect()
    }

    /// The one open issue labeled and titled `key`.
    fn single_issue(&self, key: &Key) -> Result<Issue> {
        let mut matching = self
            .tracker
            .list_issues(&IssueQuery::labeled(key.as_str()), FIRST_PAGE, PAGE_SIZE)?
            .into_iter()
            .filter(|issue| issue.title == key.as_str())
            .collect::<Vec<_>>();
        match matching.len() {
            0 => Err(Error::KeyNotFound {
                key: key.to_string(),
            }),
            1 => Ok(matching.remove(0)),
            count => Err(Error::DuplicateIssues {
                key: key.to_string(),
                count,
            }),
        }
    }
}

fn revision_not_found(key: &Key, rev: u64) -> Error {
    Error::RevisionNotFound {
        key: key.to_string(),
        rev,
    }
}

fn decode(key: &str, body: &str) -> Result<Value> {
    serde_json::from_str(body).map_err(|source| Error::Decode {
        key: key.to_string(),
        source,
    })
}
