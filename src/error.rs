//! Error taxonomy
//!
//! Catalog and target-resolution failures are fatal to a run; verification
//! and rule-creation failures are contained to their unit of work by the
//! caller and reported via logging plus the run's failure tallies.

use std::time::Duration;

use thiserror::Error;

use crate::transport::TransportError;

#[derive(Debug, Error)]
pub enum Error {
    /// A catalog listing call failed. No catalog, nothing to verify.
    #[error("catalog: {0}")]
    Catalog(String),

    #[error(transparent)]
    Transport(#[from] TransportError),

    /// An async query job never reached `completed` before the local deadline.
    /// Absence of evidence is not evidence of absence: the caller must treat
    /// the application as "has traffic".
    #[error("traffic query timed out after {0:?}")]
    QueryTimeout(Duration),

    /// The backing system reported the query job as terminally failed.
    #[error("traffic query job ended in status {0:?}")]
    QueryFailed(String),

    /// Zero or ambiguous matches while resolving a shared reference.
    #[error("{kind} {name:?}: expected exactly one match, got {matches}")]
    NotFound {
        kind: &'static str,
        name: String,
        matches: usize,
    },

    /// A response was missing a required field or failed to decode.
    #[error("malformed response from {endpoint}: {detail}")]
    Malformed { endpoint: String, detail: String },

    #[error(transparent)]
    Json(#[from] serde_json::Error),

    /// Deny-rule submission failed for one finding; remaining findings are
    /// still attempted.
    #[error("deny rule creation for env {env:?} service {service:?} failed: {source}")]
    RuleCreation {
        env: String,
        service: String,
        #[source]
        source: Box<Error>,
    },
}

impl Error {
    pub(crate) fn malformed(endpoint: impl Into<String>, detail: impl Into<String>) -> Self {
        Error::Malformed {
            endpoint: endpoint.into(),
            detail: detail.into(),
        }
    }
}

pub type Result<T> = std::result::Result<T, Error>;
