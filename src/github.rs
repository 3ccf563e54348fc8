//! [`Tracker`] backed by the GitHub REST API.

use reqwest::blocking::{Client, RequestBuilder, Response};
use reqwest::header::{HeaderMap, HeaderValue, ACCEPT};
use reqwest::{StatusCode, Url};
use serde::de::DeserializeOwned;
use tracing::debug;

use crate::error::{Error, Result};
use crate::model::{Comment, Issue, IssuePatch, IssueQuery, IssueRef, NewIssue};
use crate::tracker::Tracker;

pub const DEFAULT_API_URL: &str = "https://api.github.com";

pub struct GithubTracker {
    client: Client,
    api_url: Url,
    repo: String,
    token: String,
}

impl GithubTracker {
    /// `repo` is `owner/name`.
    pub fn new(api_url: &str, repo: &str, token: &str) -> Result<Self> {
        let api_url = Url::parse(api_url)
            .map_err(|e| Error::Configuration(format!("invalid api url '{api_url}': {e}")))?;
        let well_formed = matches!(
            repo.split_once('/'),
            Some((owner, name)) if !owner.is_empty() && !name.is_empty() && !name.contains('/')
        );
        if !well_formed {
            return Err(Error::Configuration(format!(
                "repo must look like owner/name, got '{repo}'"
            )));
        }

        let mut headers = HeaderMap::new();
        headers.insert(
            ACCEPT,
            HeaderValue::from_static("application/vnd.github+json"),
        );
        let client = Client::builder()
            .user_agent(concat!("galbi/", env!("CARGO_PKG_VERSION")))
            .default_headers(headers)
            .build()?;

        Ok(Self {
            client,
            api_url,
            repo: repo.to_string(),
            token: token.to_string(),
        })
    }

    /// `{api}/repos/{owner}/{name}/{segments...}` with each segment escaped.
    fn repo_url(&self, segments: &[&str]) -> Result<Url> {
        let mut url = self.api_url.clone();
        {
            let mut path = url.path_segments_mut().map_err(|_| {
                Error::Configuration(format!("api url '{}' cannot be a base", self.api_url))
            })?;
            path.pop_if_empty().push("repos");
            path.extend(self.repo.split('/'));
            path.extend(segments);
        }
        Ok(url)
    }

    fn endpoint(raw: &str) -> Result<Url> {
        Url::parse(raw).map_err(|e| Error::Configuration(format!("invalid endpoint '{raw}': {e}")))
    }

    fn send(&self, method: &'static str, url: Url, request: RequestBuilder) -> Result<Response> {
        debug!(method, url = %url, "tracker request");
        let response = request.bearer_auth(&self.token).send()?;
        let status = response.status();
        if !status.is_success() {
            return Err(Error::Transport {
                method,
                url: url.to_string(),
                status: status.as_u16(),
                body: response.text().unwrap_or_default(),
            });
        }
        Ok(response)
    }

    fn get_json<T: DeserializeOwned>(&self, url: Url) -> Result<T> {
        Ok(self.send("GET", url.clone(), self.client.get(url))?.json()?)
    }
}

impl Tracker for GithubTracker {
    fn label_exists(&self, name: &str) -> Result<bool> {
        let url = self.repo_url(&["labels", name])?;
        debug!(url = %url, "tracker request");
        let response = self
            .client
            .get(url.clone())
            .bearer_auth(&self.token)
            .send()?;
        match response.status() {
            status if status.is_success() => Ok(true),
            StatusCode::NOT_FOUND => Ok(false),
            status => Err(Error::Transport {
                method: "GET",
                url: url.to_string(),
                status: status.as_u16(),
                body: response.text().unwrap_or_default(),
            }),
        }
    }

    fn create_label(&self, name: &str) -> Result<()> {
        let url = self.repo_url(&["labels"])?;
        let request = self
            .client
            .post(url.clone())
            .json(&serde_json::json!({ "name": name }));
        self.send("POST", url, request)?;
        Ok(())
    }

    fn list_issues(&self, query: &IssueQuery, page: u32, per_page: u32) -> Result<Vec<Issue>> {
        let mut url = self.repo_url(&["issues"])?;
        {
            let mut pairs = url.query_pairs_mut();
            pairs
                .append_pair("state", "open")
                .append_pair("sort", "created")
                .append_pair("direction", "asc")
                .append_pair("page", &page.to_string())
                .append_pair("per_page", &per_page.to_string());
            if let Some(label) = &query.label {
                pairs.append_pair("labels", label);
            }
        }
        self.get_json(url)
    }

    fn create_issue(&self, issue: &NewIssue) -> Result<Issue> {
        let url = self.repo_url(&["issues"])?;
        let request = self.client.post(url.clone()).json(issue);
        Ok(self.send("POST", url, request)?.json()?)
    }

    fn patch_issue(&self, issue: &IssueRef, patch: &IssuePatch) -> Result<Issue> {
        let url = Self::endpoint(&issue.url)?;
        let request = self.client.patch(url.clone()).json(patch);
        Ok(self.send("PATCH", url, request)?.json()?)
    }

    fn list_comments(&self, issue: &IssueRef, page: u32, per_page: u32) -> Result<Vec<Comment>> {
        let mut url = Self::endpoint(&issue.comments_url)?;
        url.query_pairs_mut()
            .append_pair("sort", "created")
            .append_pair("direction", "asc")
            .append_pair("page", &page.to_string())
            .append_pair("per_page", &per_page.to_string());
        self.get_json(url)
    }

    fn create_comment(&self, issue: &IssueRef, body: &str) -> Result<Comment> {
        let url = Self::endpoint(&issue.comments_url)?;
        let request = self
            .client
            .post(url.clone())
            .json(&serde_json::json!({ "body": body }));
        Ok(self.send("POST", url, request)?.json()?)
    }
}
