//! HTTP transport with bounded retry
//!
//! Every component talks to the backing system through the [`Transport`]
//! trait; [`HttpTransport`] is the production implementation with basic-auth,
//! bounded retries and exponential backoff plus jitter. Paths are relative to
//! the API base (`https://{fqdn}:{port}/api/v2`), which matches the relative
//! href handles the API returns for async jobs and rule sets.

use std::time::Duration;

use async_trait::async_trait;
use rand::Rng;
use reqwest::header::{ACCEPT, CONTENT_TYPE};
use reqwest::{Client, Method};
use serde_json::Value;
use thiserror::Error;
use tokio::time::sleep;
use tracing::{debug, warn};

/// Attempts per request before giving up.
pub const DEFAULT_RETRIES: u32 = 3;

const REQUEST_TIMEOUT: Duration = Duration::from_secs(30);
const MAX_JITTER_MS: u64 = 500;

#[derive(Debug, Error)]
pub enum TransportError {
    #[error("http {status}: {body}")]
    Status { status: u16, body: String },

    #[error(transparent)]
    Http(#[from] reqwest::Error),

    /// Terminal error after exhausting the retry budget.
    #[error("{method} {path} failed after {attempts} attempts: {last}")]
    RetriesExhausted {
        method: String,
        path: String,
        attempts: u32,
        last: String,
    },
}

/// Authenticated request/response capability with retry layered beneath it.
///
/// Callers receive either the raw payload of a 2xx response or a terminal
/// error once retries are exhausted.
#[async_trait]
pub trait Transport: Send + Sync {
    async fn request(
        &self,
        method: Method,
        path: &str,
        body: Option<Value>,
    ) -> Result<Vec<u8>, TransportError>;
}

/// Production transport over reqwest.
pub struct HttpTransport {
    client: Client,
    base_url: String,
    user: String,
    secret: String,
    retries: u32,
}

impl HttpTransport {
    pub fn new(fqdn: &str, port: u16, user: &str, secret: &str) -> Result<Self, TransportError> {
        let client = Client::builder().timeout(REQUEST_TIMEOUT).build()?;

        Ok(Self {
            client,
            base_url: format!("https://{fqdn}:{port}/api/v2"),
            user: user.to_string(),
            secret: secret.to_string(),
            retries: DEFAULT_RETRIES,
        })
    }

    async fn attempt(
        &self,
        method: &Method,
        url: &str,
        body: Option<&Value>,
    ) -> Result<Vec<u8>, TransportError> {
        let mut req = self
            .client
            .request(method.clone(), url)
            .basic_auth(&self.user, Some(&self.secret))
            .header(ACCEPT, "application/json")
            .header(CONTENT_TYPE, "application/json");
        if let Some(body) = body {
            req = req.json(body);
        }

        let resp = req.send().await?;
        let status = resp.status();
        let bytes = resp.bytes().await?;
        debug!("response status {status} ({} bytes)", bytes.len());

        if status.is_success() {
            Ok(bytes.to_vec())
        } else {
            Err(TransportError::Status {
                status: status.as_u16(),
                body: String::from_utf8_lossy(&bytes).into_owned(),
            })
        }
    }
}

#[async_trait]
impl Transport for HttpTransport {
    async fn request(
        &self,
        method: Method,
        path: &str,
        body: Option<Value>,
    ) -> Result<Vec<u8>, TransportError> {
        let url = format!("{}{}", self.base_url, path);
        if let Some(body) = &body {
            debug!("{method} {path} payload: {body}");
        }

        let mut last = String::new();
        for attempt in 0..self.retries {
            if attempt > 0 {
                let backoff = Duration::from_secs(1 << (attempt - 1));
                let jitter = Duration::from_millis(rand::thread_rng().gen_range(0..MAX_JITTER_MS));
                sleep(backoff + jitter).await;
            }

            match self.attempt(&method, &url, body.as_ref()).await {
                Ok(bytes) => return Ok(bytes),
                Err(e) => {
                    warn!("{method} {path} attempt {} failed: {e}", attempt + 1);
                    last = e.to_string();
                }
            }
        }

        Err(TransportError::RetriesExhausted {
            method: method.to_string(),
            path: path.to_string(),
            attempts: self.retries,
            last,
        })
    }
}
