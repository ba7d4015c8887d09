//! Verification orchestrator
//!
//! Fans traffic verifications out over every (environment, service, app)
//! triple with a global concurrency cap and aggregates per-(environment,
//! service) no-traffic findings. Groups are processed sequentially and each
//! group is fully joined before its finding is finalized, so rule synthesis
//! never sees a partially-verified application set.

use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;

use futures::future::join_all;
use tokio::sync::{Mutex, Semaphore};
use tracing::{error, info, warn};

use crate::types::{EnvApps, Label, NoTrafficFinding, Service};
use crate::verifier::TrafficVerifier;

/// Default global cap on in-flight verifications, matching the backing
/// system's query-rate guidance.
pub const DEFAULT_CONCURRENCY: usize = 2;

/// Outcome of one orchestrator run.
#[derive(Debug)]
pub struct RunOutcome {
    pub findings: Vec<NoTrafficFinding>,
    /// Completed verification calls, successes and failures alike.
    pub queries_run: u64,
    /// Verification calls that errored; their apps were conservatively
    /// treated as "has traffic".
    pub failures: u64,
}

pub struct Orchestrator {
    verifier: Arc<TrafficVerifier>,
    limit: Arc<Semaphore>,
}

impl Orchestrator {
    pub fn new(verifier: TrafficVerifier, concurrency: usize) -> Self {
        Self {
            verifier: Arc::new(verifier),
            limit: Arc::new(Semaphore::new(concurrency.max(1))),
        }
    }

    /// The fixed run total: Σ over non-empty environments of
    /// appCount × serviceCount. Computed before fan-out and never revised.
    pub fn total_queries(env_apps: &[EnvApps], services: &[Service]) -> u64 {
        env_apps
            .iter()
            .filter(|ea| !ea.apps.is_empty())
            .map(|ea| (ea.apps.len() * services.len()) as u64)
            .sum()
    }

    /// Verify every triple and aggregate no-traffic findings.
    ///
    /// Per-call failures are logged and excluded from the finding; they never
    /// abort the group or the run.
    pub async fn verify_all(&self, env_apps: &[EnvApps], services: &[Service]) -> RunOutcome {
        let total = Self::total_queries(env_apps, services);
        let done = Arc::new(AtomicU64::new(0));
        let failures = Arc::new(AtomicU64::new(0));
        let mut findings = Vec::new();

        if total == 0 {
            return RunOutcome { findings, queries_run: 0, failures: 0 };
        }

        for ea in env_apps.iter().filter(|ea| !ea.apps.is_empty()) {
            for service in services {
                let silent: Arc<Mutex<Vec<Label>>> = Arc::new(Mutex::new(Vec::new()));

                let mut tasks = Vec::with_capacity(ea.apps.len());
                for app in &ea.apps {
                    let verifier = Arc::clone(&self.verifier);
                    let limit = Arc::clone(&self.limit);
                    let silent = Arc::clone(&silent);
                    let done = Arc::clone(&done);
                    let failures = Arc::clone(&failures);
                    let env = ea.env.clone();
                    let app = app.clone();
                    let service = service.clone();

                    tasks.push(tokio::spawn(async move {
                        let _permit = limit.acquire_owned().await.expect("semaphore closed");

                        match verifier.has_no_traffic(&env, &app, &service).await {
                            Ok(true) => silent.lock().await.push(app.clone()),
                            Ok(false) => {}
                            Err(e) => {
                                // never deny on missing evidence: a failed
                                // check counts as "has traffic"
                                failures.fetch_add(1, Ordering::Relaxed);
                                warn!(
                                    "query failed for env {} app {} service {}: {e}",
                                    env.value, app.value, service.name
                                );
                            }
                        }

                        let n = done.fetch_add(1, Ordering::Relaxed) + 1;
                        let percent = n as f64 / total as f64 * 100.0;
                        info!(
                            "[query] env:{} app:{} service:{} progress: {percent:.1}% ({n}/{total})",
                            env.value, app.value, service.name
                        );
                    }));
                }

                // group barrier: every app must land before the finding exists
                for joined in join_all(tasks).await {
                    if let Err(e) = joined {
                        failures.fetch_add(1, Ordering::Relaxed);
                        error!("verification task panicked: {e}");
                    }
                }

                let apps = std::mem::take(&mut *silent.lock().await);
                if !apps.is_empty() {
                    findings.push(NoTrafficFinding {
                        env: ea.env.clone(),
                        service: service.clone(),
                        apps,
                    });
                }
            }
        }

        RunOutcome {
            findings,
            queries_run: done.load(Ordering::Relaxed),
            failures: failures.load(Ordering::Relaxed),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn label(href: &str, key: &str, value: &str) -> Label {
        Label {
            href: href.to_string(),
            key: key.to_string(),
            value: value.to_string(),
        }
    }

    fn service(href: &str, name: &str) -> Service {
        Service {
            href: href.to_string(),
            name: name.to_string(),
            service_ports: Vec::new(),
        }
    }

    #[test]
    fn empty_app_sets_do_not_contribute_to_the_total() {
        let env_apps = vec![
            EnvApps {
                env: label("/e1", "env", "PROD"),
                apps: vec![label("/a1", "app", "web"), label("/a2", "app", "db")],
            },
            EnvApps {
                env: label("/e2", "env", "DEV"),
                apps: Vec::new(),
            },
        ];
        let services = vec![service("/s1", "RDP"), service("/s2", "SMB")];

        assert_eq!(Orchestrator::total_queries(&env_apps, &services), 4);
    }

    #[test]
    fn no_groups_means_zero_total() {
        let services = vec![service("/s1", "RDP")];
        assert_eq!(Orchestrator::total_queries(&[], &services), 0);
    }
}
