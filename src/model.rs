use std::borrow::Borrow;
use std::fmt;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::error::{Error, Result};

/// Label that marks an issue whose body holds the canonical value.
pub const MIGRATED_LABEL: &str = "galbi:migrated";

/// Longest label name the tracker accepts.
pub const MAX_KEY_LEN: usize = 50;

/// A store key. Backed 1:1 by a label and an issue titled with the key.
#[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(try_from = "String", into = "String")]
pub struct Key(String);

impl Key {
    /// Validates that `value` can be used as a label name and issue title.
    pub fn parse(value: impl Into<String>) -> Result<Self> {
        let value = value.into();
        let reason = if value.trim().is_empty() {
            Some("key is empty")
        } else if value.trim() != value {
            Some("key has leading or trailing whitespace")
        } else if value.chars().count() > MAX_KEY_LEN {
            Some("key is longer than 50 characters")
        } else if value.contains(',') {
            // label filters are comma separated
            Some("key contains a comma")
        } else if value == MIGRATED_LABEL {
            Some("key is reserved")
        } else {
            None
        };
        match reason {
            Some(reason) => Err(Error::InvalidKey { key: value, reason }),
            None => Ok(Self(value)),
        }
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for Key {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

impl Borrow<str> for Key {
    fn borrow(&self) -> &str {
        &self.0
    }
}

impl TryFrom<String> for Key {
    type Error = Error;

    fn try_from(value: String) -> Result<Self> {
        Key::parse(value)
    }
}

impl From<Key> for String {
    fn from(key: Key) -> Self {
        key.0
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Label {
    pub name: String,
}

/// Where an issue keeps its current value.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Convention {
    /// The latest comment is the current value.
    Legacy,
    /// The issue body is the current value; comments are history.
    Migrated,
}

/// How `upsert` writes a new value.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum WriteMode {
    /// Append a comment and nothing else.
    #[default]
    Append,
    /// Append a comment and keep the issue body in sync once history exists.
    Mirror,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Issue {
    pub number: u64,
    pub title: String,
    #[serde(default)]
    pub body: Option<String>,
    pub url: String,
    pub comments_url: String,
    /// Number of comments at the time the issue was fetched.
    #[serde(default)]
    pub comments: u64,
    #[serde(default)]
    pub labels: Vec<Label>,
}

impl Issue {
    pub fn convention(&self) -> Convention {
        if self.has_label(MIGRATED_LABEL) {
            Convention::Migrated
        } else {
            Convention::Legacy
        }
    }

    pub fn has_label(&self, name: &str) -> bool {
        self.labels.iter().any(|l| l.name == name)
    }

    pub fn label_names(&self) -> Vec<String> {
        self.labels.iter().map(|l| l.name.clone()).collect()
    }

    pub fn issue_ref(&self) -> IssueRef {
        IssueRef {
            number: self.number,
            url: self.url.clone(),
            comments_url: self.comments_url.clone(),
        }
    }
}

/// Endpoints needed to write to an issue once it has been resolved.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct IssueRef {
    pub number: u64,
    /// Patch endpoint.
    pub url: String,
    pub comments_url: String,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Comment {
    pub id: u64,
    pub body: String,
    pub created_at: DateTime<Utc>,
}

#[derive(Debug, Clone, Serialize)]
pub struct NewIssue {
    pub title: String,
    pub body: String,
    pub labels: Vec<String>,
}

/// Partial update of an issue. `None` fields are left untouched.
#[derive(Debug, Clone, Default, Serialize)]
pub struct IssuePatch {
    #[serde(skip_serializing_if = "Option::is_none")]
    pub body: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub labels: Option<Vec<String>>,
}

impl IssuePatch {
    /// Body overwrite that also tags the issue as migrated.
    pub fn canonical_body(issue: &Issue, body: String) -> Self {
        let mut labels = issue.label_names();
        if !issue.has_label(MIGRATED_LABEL) {
            labels.push(MIGRATED_LABEL.to_string());
        }
        Self {
            body: Some(body),
            labels: Some(labels),
        }
    }
}

/// Filter for listing open issues.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct IssueQuery {
    pub label: Option<String>,
}

impl IssueQuery {
    pub fn all() -> Self {
        Self::default()
    }

    pub fn labeled(label: &str) -> Self {
        Self {
            label: Some(label.to_string()),
        }
    }
}

/// One entry of a key's history.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct Revision {
    pub rev: u64,
    pub created_at: DateTime<Utc>,
    pub value: serde_json::Value,
}
