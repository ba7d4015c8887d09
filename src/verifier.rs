//! Traffic verifier
//!
//! Decides whether one (environment, application, service) triple has seen
//! any traffic. Two-phase: a 24-hour window is queried first, and the 89-day
//! window is only queried when the short window was silent, so the expensive
//! long query is skipped whenever recent traffic already disqualifies the
//! triple. Each phase submits an async query job and polls it to completion.

use std::sync::Arc;
use std::time::Duration;

use chrono::{DateTime, SecondsFormat, Utc};
use reqwest::Method;
use serde::{Deserialize, Serialize};
use tracing::debug;

use crate::error::{Error, Result};
use crate::transport::Transport;
use crate::types::{Actor, Label, Service};

const SHORT_WINDOW_HOURS: i64 = 24;
const LONG_WINDOW_DAYS: i64 = 89;

const DEFAULT_POLL_INTERVAL: Duration = Duration::from_secs(5);
const DEFAULT_POLL_DEADLINE: Duration = Duration::from_secs(5 * 60);

/// Destination transmission types excluded from the query, passed through
/// unmodified into both phase payloads.
#[derive(Debug, Clone, Copy, Default)]
pub struct Exclusions {
    pub broadcast: bool,
    pub multicast: bool,
}

/// Lifecycle of one async query job as seen by the poller.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum JobStatus {
    Pending,
    Completed,
    Failed,
    /// Terminal local state surfaced to callers as [`Error::QueryTimeout`]:
    /// the poll deadline elapsed before the backend reported completion.
    /// Never parsed from a response — the backend has no such status — and
    /// the remote job is abandoned, not cancelled.
    TimedOut,
}

fn job_status(raw: &str) -> JobStatus {
    match raw {
        "completed" => JobStatus::Completed,
        "failed" | "killed" => JobStatus::Failed,
        _ => JobStatus::Pending,
    }
}

// ============================================================
// Query payload
// ============================================================

#[derive(Debug, Serialize)]
#[serde(rename_all = "lowercase")]
enum Transmission {
    Broadcast,
    Multicast,
}

#[derive(Debug, Serialize)]
struct TransmissionExclusion {
    transmission: Transmission,
}

#[derive(Debug, Serialize)]
struct ActorQuery {
    include: Vec<Vec<Actor>>,
    exclude: Vec<TransmissionExclusion>,
}

#[derive(Debug, Serialize)]
struct PortFilter {
    port: u16,
    proto: u8,
    #[serde(skip_serializing_if = "Option::is_none")]
    to_port: Option<u16>,
}

#[derive(Debug, Serialize)]
struct ServiceQuery {
    include: Vec<PortFilter>,
    exclude: Vec<PortFilter>,
}

#[derive(Debug, Serialize)]
struct TrafficQuery {
    sources: ActorQuery,
    destinations: ActorQuery,
    services: ServiceQuery,
    sources_destinations_query_op: &'static str,
    start_date: String,
    end_date: String,
    policy_decisions: Vec<String>,
    boundary_decisions: Vec<String>,
    query_name: String,
    exclude_workloads_from_ip_list_query: bool,
    max_results: u32,
}

fn build_query(
    env: &Label,
    app: &Label,
    service: &Service,
    start: DateTime<Utc>,
    end: DateTime<Utc>,
    exclusions: Exclusions,
) -> TrafficQuery {
    let mut dest_exclude = Vec::new();
    if exclusions.broadcast {
        dest_exclude.push(TransmissionExclusion {
            transmission: Transmission::Broadcast,
        });
    }
    if exclusions.multicast {
        dest_exclude.push(TransmissionExclusion {
            transmission: Transmission::Multicast,
        });
    }

    // a to_port of zero means "no range" and is omitted from the filter
    let ports = service
        .service_ports
        .iter()
        .map(|sp| PortFilter {
            port: sp.port,
            proto: sp.proto,
            to_port: sp.to_port.filter(|&p| p != 0),
        })
        .collect();

    TrafficQuery {
        sources: ActorQuery {
            include: vec![vec![]],
            exclude: Vec::new(),
        },
        destinations: ActorQuery {
            include: vec![vec![Actor::label(&env.href), Actor::label(&app.href)]],
            exclude: dest_exclude,
        },
        services: ServiceQuery {
            include: ports,
            exclude: Vec::new(),
        },
        sources_destinations_query_op: "and",
        start_date: start.to_rfc3339_opts(SecondsFormat::Secs, true),
        end_date: end.to_rfc3339_opts(SecondsFormat::Secs, true),
        policy_decisions: Vec::new(),
        boundary_decisions: Vec::new(),
        query_name: format!("Query Env: {} App: {}", env.href, app.href),
        exclude_workloads_from_ip_list_query: true,
        max_results: 1,
    }
}

// ============================================================
// Responses
// ============================================================

#[derive(Debug, Deserialize)]
struct QueryJobRef {
    #[serde(default)]
    href: String,
}

#[derive(Debug, Deserialize)]
struct JobPoll {
    status: String,
    #[serde(default)]
    flows_count: Option<u64>,
}

// ============================================================
// Verifier
// ============================================================

pub struct TrafficVerifier {
    transport: Arc<dyn Transport>,
    org: String,
    exclusions: Exclusions,
    poll_interval: Duration,
    poll_deadline: Duration,
}

impl TrafficVerifier {
    pub fn new(transport: Arc<dyn Transport>, org: impl Into<String>, exclusions: Exclusions) -> Self {
        Self {
            transport,
            org: org.into(),
            exclusions,
            poll_interval: DEFAULT_POLL_INTERVAL,
            poll_deadline: DEFAULT_POLL_DEADLINE,
        }
    }

    /// Override the polling cadence and deadline.
    pub fn with_poll_timing(mut self, interval: Duration, deadline: Duration) -> Self {
        self.poll_interval = interval;
        self.poll_deadline = deadline;
        self
    }

    /// True when the triple shows zero flows in both lookback windows.
    ///
    /// Errors abort the check for this triple and must not be read as
    /// "no traffic" by the caller.
    pub async fn has_no_traffic(&self, env: &Label, app: &Label, service: &Service) -> Result<bool> {
        let end = Utc::now();

        let start = end - chrono::Duration::hours(SHORT_WINDOW_HOURS);
        if self.window_has_flows(env, app, service, start, end).await? {
            return Ok(false);
        }

        // only reached when the last 24 hours were silent
        let start = end - chrono::Duration::days(LONG_WINDOW_DAYS);
        let long = self.window_has_flows(env, app, service, start, end).await?;
        Ok(!long)
    }

    async fn window_has_flows(
        &self,
        env: &Label,
        app: &Label,
        service: &Service,
        start: DateTime<Utc>,
        end: DateTime<Utc>,
    ) -> Result<bool> {
        let query = build_query(env, app, service, start, end, self.exclusions);
        let path = format!("/orgs/{}/traffic_flows/async_queries", self.org);

        let bytes = self
            .transport
            .request(Method::POST, &path, Some(serde_json::to_value(&query)?))
            .await?;
        let job: QueryJobRef = serde_json::from_slice(&bytes)
            .map_err(|e| Error::malformed(&path, e.to_string()))?;
        if job.href.is_empty() {
            return Err(Error::malformed(&path, "query submission returned no href"));
        }

        let flows = self.poll_job(&job.href).await?;
        Ok(flows > 0)
    }

    /// Poll the job href until it completes, fails, or the deadline elapses.
    async fn poll_job(&self, href: &str) -> Result<u64> {
        debug!("polling query job {href}");
        match tokio::time::timeout(self.poll_deadline, self.poll_loop(href)).await {
            Ok(result) => result,
            // the remote job keeps running; only local waiting is abandoned
            Err(_) => Err(Error::QueryTimeout(self.poll_deadline)),
        }
    }

    async fn poll_loop(&self, href: &str) -> Result<u64> {
        loop {
            tokio::time::sleep(self.poll_interval).await;

            let bytes = self.transport.request(Method::GET, href, None).await?;
            let poll: JobPoll = serde_json::from_slice(&bytes)
                .map_err(|e| Error::malformed(href, e.to_string()))?;

            match job_status(&poll.status) {
                JobStatus::Completed => {
                    return poll.flows_count.ok_or_else(|| {
                        Error::malformed(href, "completed job reported no flows_count")
                    });
                }
                JobStatus::Failed => return Err(Error::QueryFailed(poll.status)),
                JobStatus::Pending | JobStatus::TimedOut => {}
            }
        }
    }
}
