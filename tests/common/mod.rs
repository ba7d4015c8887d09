//! Shared scripted transport for integration tests.
//!
//! Answers the agent's API calls from in-memory fixtures, records every
//! submitted traffic query and deny rule, and tracks in-flight request
//! concurrency.

#![allow(dead_code)]

use std::collections::{HashMap, HashSet};
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Mutex;
use std::time::Duration;

use async_trait::async_trait;
use chrono::DateTime;
use reqwest::Method;
use serde_json::{json, Value};

use auto_deny_rules::transport::{Transport, TransportError};
use auto_deny_rules::types::{EnvApps, Label, Service, ServicePort};

/// Which lookback window a submitted traffic query covers.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Window {
    Short,
    Long,
}

#[derive(Debug, Clone)]
pub struct Submitted {
    pub app: String,
    pub window: Window,
}

#[derive(Default)]
pub struct MockTransport {
    pub envs: Vec<Label>,
    pub services: Vec<Service>,
    /// env href -> each workload's label set
    pub workloads_by_env: HashMap<String, Vec<Vec<Label>>>,
    /// (href, name) pairs returned by the ip-list listing
    pub ip_lists: Vec<(String, String)>,
    /// (app href, window) -> flows_count; unlisted pairs report zero flows
    pub flows: HashMap<(String, Window), u64>,
    /// app hrefs whose query jobs never leave "working"
    pub stalled_apps: HashSet<String>,
    /// number of upcoming deny-rule POSTs answered with a 500
    pub fail_next_deny_rules: AtomicUsize,
    pub request_delay: Duration,

    pub submitted: Mutex<Vec<Submitted>>,
    pub deny_rules: Mutex<Vec<Value>>,
    pub rule_sets: Mutex<Vec<Value>>,
    in_flight: AtomicUsize,
    pub max_in_flight: AtomicUsize,
}

impl MockTransport {
    pub fn submissions_for(&self, app: &str) -> Vec<Window> {
        self.submitted
            .lock()
            .unwrap()
            .iter()
            .filter(|s| s.app == app)
            .map(|s| s.window)
            .collect()
    }

    fn respond(&self, method: &Method, path: &str, body: Option<&Value>) -> Result<Value, TransportError> {
        if *method == Method::POST && path.ends_with("/traffic_flows/async_queries") {
            let body = body.expect("query submission has a payload");
            let app = body["destinations"]["include"][0][1]["label"]["href"]
                .as_str()
                .expect("destination app href")
                .to_string();
            let start = DateTime::parse_from_rfc3339(body["start_date"].as_str().unwrap()).unwrap();
            let end = DateTime::parse_from_rfc3339(body["end_date"].as_str().unwrap()).unwrap();
            let window = if end.signed_duration_since(start) > chrono::Duration::days(2) {
                Window::Long
            } else {
                Window::Short
            };

            let mut submitted = self.submitted.lock().unwrap();
            submitted.push(Submitted { app, window });
            let idx = submitted.len() - 1;
            return Ok(json!({"href": format!("/orgs/1/traffic_flows/async_queries/{idx}")}));
        }

        if *method == Method::GET && path.contains("/traffic_flows/async_queries/") {
            let idx: usize = path.rsplit('/').next().unwrap().parse().unwrap();
            let sub = self.submitted.lock().unwrap()[idx].clone();
            if self.stalled_apps.contains(&sub.app) {
                return Ok(json!({"status": "working"}));
            }
            let flows = self.flows.get(&(sub.app.clone(), sub.window)).copied().unwrap_or(0);
            return Ok(json!({"status": "completed", "flows_count": flows}));
        }

        if *method == Method::GET && path.contains("/labels?key=env") {
            return Ok(serde_json::to_value(&self.envs).unwrap());
        }

        if *method == Method::GET && path.contains("/sec_policy/draft/services") {
            return Ok(serde_json::to_value(&self.services).unwrap());
        }

        if *method == Method::GET && path.contains("/workloads?") {
            for (href, workloads) in &self.workloads_by_env {
                let scope = urlencoding::encode(&format!("[[\"{href}\"]]")).into_owned();
                if path.contains(&scope) {
                    let body: Vec<Value> = workloads
                        .iter()
                        .map(|labels| json!({"labels": labels}))
                        .collect();
                    return Ok(Value::Array(body));
                }
            }
            return Ok(json!([]));
        }

        if *method == Method::GET && path.contains("/sec_policy/draft/ip_lists") {
            let body: Vec<Value> = self
                .ip_lists
                .iter()
                .map(|(href, name)| json!({"href": href, "name": name}))
                .collect();
            return Ok(Value::Array(body));
        }

        if *method == Method::POST && path.ends_with("/sec_policy/draft/rule_sets") {
            self.rule_sets.lock().unwrap().push(body.cloned().unwrap_or(Value::Null));
            return Ok(json!({"href": "/orgs/1/sec_policy/draft/rule_sets/77"}));
        }

        if *method == Method::POST && path.ends_with("/deny_rules") {
            if self.fail_next_deny_rules.load(Ordering::SeqCst) > 0 {
                self.fail_next_deny_rules.fetch_sub(1, Ordering::SeqCst);
                return Err(TransportError::Status {
                    status: 500,
                    body: "internal server error".to_string(),
                });
            }
            self.deny_rules.lock().unwrap().push(body.cloned().unwrap_or(Value::Null));
            return Ok(json!({"href": "/orgs/1/sec_policy/draft/rule_sets/77/sec_rules/1"}));
        }

        Err(TransportError::Status {
            status: 404,
            body: format!("unexpected {method} {path}"),
        })
    }
}

#[async_trait]
impl Transport for MockTransport {
    async fn request(
        &self,
        method: Method,
        path: &str,
        body: Option<Value>,
    ) -> Result<Vec<u8>, TransportError> {
        let now = self.in_flight.fetch_add(1, Ordering::SeqCst) + 1;
        self.max_in_flight.fetch_max(now, Ordering::SeqCst);
        if !self.request_delay.is_zero() {
            tokio::time::sleep(self.request_delay).await;
        }
        let result = self.respond(&method, path, body.as_ref());
        self.in_flight.fetch_sub(1, Ordering::SeqCst);
        result.map(|v| serde_json::to_vec(&v).unwrap())
    }
}

// ============================================================
// Fixtures
// ============================================================

pub fn label(href: &str, key: &str, value: &str) -> Label {
    Label {
        href: href.to_string(),
        key: key.to_string(),
        value: value.to_string(),
    }
}

pub fn rdp() -> Service {
    Service {
        href: "/s1".to_string(),
        name: "RDP".to_string(),
        service_ports: vec![ServicePort { port: 3389, proto: 6, to_port: None }],
    }
}

/// PROD environment with two apps, web and db.
pub fn prod() -> EnvApps {
    EnvApps {
        env: label("/e1", "env", "PROD"),
        apps: vec![label("/a1", "app", "web"), label("/a2", "app", "db")],
    }
}
