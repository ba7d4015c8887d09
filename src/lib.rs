//! Auto Deny Rules Agent
//!
//! Scans a segmented workload estate for (environment, application, service)
//! combinations with zero observed traffic over two lookback windows and
//! creates deny rules for them in a freshly created rule set.
//!
//! The pipeline is strictly downward: the catalog loader fetches labels,
//! risky services and per-environment app sets; the orchestrator fans out
//! traffic verifications with a global concurrency cap; the rule synthesizer
//! turns each aggregated no-traffic finding into one deny rule.

pub mod catalog;
pub mod error;
pub mod orchestrator;
pub mod rules;
pub mod transport;
pub mod types;
pub mod verifier;

pub use error::{Error, Result};
