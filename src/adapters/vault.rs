//! Minimal Vault HTTP client
//!
//! Only the two calls role management needs: write a JSON body to a path and
//! delete a path. The token is used as given.

use std::fmt;
use std::time::Duration;

use reqwest::{Response, StatusCode};
use serde::Deserialize;
use tracing::debug;

use crate::error::{Error, Result};

const TOKEN_HEADER: &str = "X-Vault-Token";
const REQUEST_TIMEOUT: Duration = Duration::from_secs(30);

/// Vault API client
#[derive(Clone)]
pub struct VaultClient {
    http: reqwest::Client,
    addr: String,
    token: String,
}

impl fmt::Debug for VaultClient {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("VaultClient")
            .field("addr", &self.addr)
            .finish_non_exhaustive()
    }
}

#[derive(Deserialize)]
struct ErrorBody {
    #[serde(default)]
    errors: Vec<String>,
}

impl VaultClient {
    pub fn new(addr: impl Into<String>, token: impl Into<String>) -> Result<Self> {
        let http = reqwest::Client::builder().timeout(REQUEST_TIMEOUT).build()?;
        Ok(Self {
            http,
            addr: addr.into(),
            token: token.into(),
        })
    }

    /// Full URL for an API path, e.g. `gcp/roleset/x` -> `<addr>/v1/gcp/roleset/x`
    pub fn url(&self, path: &str) -> String {
        format!(
            "{}/v1/{}",
            self.addr.trim_end_matches('/'),
            path.trim_start_matches('/')
        )
    }

    /// Write `body` to `path` (create or overwrite)
    pub async fn write(&self, path: &str, body: &serde_json::Value) -> Result<()> {
        debug!(path, "Vault write");
        let resp = self
            .http
            .post(self.url(path))
            .header(TOKEN_HEADER, &self.token)
            .json(body)
            .send()
            .await?;
        check(resp).await
    }

    /// Delete `path`; a missing path is reported as [`Error::NotFound`]
    pub async fn delete(&self, path: &str) -> Result<()> {
        debug!(path, "Vault delete");
        let resp = self
            .http
            .delete(self.url(path))
            .header(TOKEN_HEADER, &self.token)
            .send()
            .await?;
        check(resp).await
    }
}

async fn check(resp: Response) -> Result<()> {
    let status = resp.status();
    if status.is_success() {
        return Ok(());
    }

    let url = resp.url().to_string();
    let body = resp.text().await.unwrap_or_default();
    if status == StatusCode::NOT_FOUND {
        return Err(Error::NotFound(url));
    }
    Err(Error::Vault {
        status: status.as_u16(),
        message: error_message(&body, status),
    })
}

fn error_message(body: &str, status: StatusCode) -> String {
    match serde_json::from_str::<ErrorBody>(body) {
        Ok(parsed) if !parsed.errors.is_empty() => parsed.errors.join("; "),
        _ if !body.trim().is_empty() => body.trim().to_string(),
        _ => status
            .canonical_reason()
            .unwrap_or("unexpected status")
            .to_string(),
    }
}
