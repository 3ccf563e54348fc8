//! HTTP client for the secret proxy.
//!
//! The proxy stores opaque strings under `{url}/values/{key}` and never sees
//! plaintext.

use reqwest::blocking::Client;
use reqwest::{StatusCode, Url};
use serde::{Deserialize, Serialize};
use tracing::debug;

use crate::error::{Error, Result};
use crate::model::Key;
use crate::secret::SecretBackend;

#[derive(Serialize, Deserialize)]
struct Envelope {
    value: String,
}

pub struct ProxyClient {
    client: Client,
    base_url: Url,
    token: String,
}

impl ProxyClient {
    pub fn new(base_url: &str, token: &str) -> Result<Self> {
        let base_url = Url::parse(base_url)
            .map_err(|e| Error::Configuration(format!("invalid proxy url '{base_url}': {e}")))?;
        let client = Client::builder()
            .user_agent(concat!("galbi/", env!("CARGO_PKG_VERSION")))
            .build()?;
        Ok(Self {
            client,
            base_url,
            token: token.to_string(),
        })
    }

    fn value_url(&self, key: &Key) -> Result<Url> {
        let mut url = self.base_url.clone();
        url.path_segments_mut()
            .map_err(|_| {
                Error::Configuration(format!("proxy url '{}' cannot be a base", self.base_url))
            })?
            .pop_if_empty()
            .push("values")
            .push(key.as_str());
        Ok(url)
    }
}

impl SecretBackend for ProxyClient {
    fn put(&self, key: &Key, ciphertext: &str) -> Result<()> {
        let url = self.value_url(key)?;
        debug!(url = %url, "proxy request");
        let response = self
            .client
            .put(url.clone())
            .bearer_auth(&self.token)
            .json(&Envelope {
                value: ciphertext.to_string(),
            })
            .send()?;
        let status = response.status();
        if !status.is_success() {
            return Err(Error::Transport {
                method: "PUT",
                url: url.to_string(),
                status: status.as_u16(),
                body: response.text().unwrap_or_default(),
            });
        }
        Ok(())
    }

    fn get(&self, key: &Key) -> Result<Option<String>> {
        let url = self.value_url(key)?;
        debug!(url = %url, "proxy request");
        let response = self
            .client
            .get(url.clone())
            .bearer_auth(&self.token)
            .send()?;
        match response.status() {
            StatusCode::NOT_FOUND => Ok(None),
            status if status.is_success() => Ok(Some(response.json::<Envelope>()?.value)),
            status => Err(Error::Transport {
                method: "GET",
                url: url.to_string(),
                status: status.as_u16(),
                body: response.text().unwrap_or_default(),
            }),
        }
    }
}
