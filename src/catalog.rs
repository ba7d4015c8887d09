//! Catalog loader
//!
//! Read-only lookups against the policy catalog: environment labels, risky
//! service definitions, per-environment application sets, and the shared
//! "any address" ip-list used as the deny-rule consumer.

use std::collections::BTreeMap;
use std::sync::Arc;

use reqwest::Method;
use serde::de::DeserializeOwned;
use serde::Deserialize;
use tracing::debug;

use crate::error::{Error, Result};
use crate::transport::Transport;
use crate::types::{Href, Label, Service};

/// Enforcement modes whose workloads are eligible for deny-rule scoping.
const ELIGIBLE_ENFORCEMENT_MODES: &str = r#"["idle","selective","visibility_only"]"#;

#[derive(Debug, Deserialize)]
struct Workload {
    #[serde(default)]
    labels: Vec<Label>,
}

#[derive(Debug, Deserialize)]
struct IpList {
    href: String,
    name: String,
}

pub struct CatalogLoader {
    transport: Arc<dyn Transport>,
    org: String,
}

impl CatalogLoader {
    pub fn new(transport: Arc<dyn Transport>, org: impl Into<String>) -> Self {
        Self {
            transport,
            org: org.into(),
        }
    }

    async fn get_catalog<T: DeserializeOwned>(&self, path: &str, what: &str) -> Result<T> {
        let bytes = self
            .transport
            .request(Method::GET, path, None)
            .await
            .map_err(|e| Error::Catalog(format!("listing {what}: {e}")))?;
        serde_json::from_slice(&bytes).map_err(|e| Error::Catalog(format!("decoding {what}: {e}")))
    }

    /// All environment labels of the org.
    pub async fn load_environments(&self) -> Result<Vec<Label>> {
        let path = format!("/orgs/{}/labels?key=env", self.org);
        self.get_catalog(&path, "environment labels").await
    }

    /// All service definitions flagged as ransomware-risky.
    pub async fn load_risky_services(&self) -> Result<Vec<Service>> {
        let path = format!(
            "/orgs/{}/sec_policy/draft/services?is_ransomware=true",
            self.org
        );
        self.get_catalog(&path, "risky services").await
    }

    /// The deduplicated `app` labels among the environment's online, managed,
    /// enforcement-eligible workloads. Empty when no eligible workloads exist;
    /// callers skip such environments.
    pub async fn load_app_set(&self, env: &Label) -> Result<Vec<Label>> {
        let label_scope = format!("[[\"{}\"]]", env.href);
        let path = format!(
            "/orgs/{}/workloads?managed=true&online=true&labels={}&enforcement_modes={}",
            self.org,
            urlencoding::encode(&label_scope),
            urlencoding::encode(ELIGIBLE_ENFORCEMENT_MODES),
        );
        debug!("fetching workloads for env {}", env.value);

        let workloads: Vec<Workload> = self
            .get_catalog(&path, &format!("workloads for env {}", env.value))
            .await?;
        Ok(dedup_app_labels(workloads))
    }

    /// Resolve the shared "any address" ip-list by name.
    ///
    /// The name lookup is a substring match on the API side, so the result is
    /// filtered to exact matches and must be unambiguous: anything other than
    /// exactly one match is an error, since every deny rule references this
    /// single consumer.
    pub async fn resolve_any_address_target(&self, name: &str) -> Result<Href> {
        let path = format!(
            "/orgs/{}/sec_policy/draft/ip_lists?max_results=500&name={}",
            self.org,
            urlencoding::encode(name),
        );
        let lists: Vec<IpList> = self.get_catalog(&path, "ip lists").await?;

        let mut matches: Vec<IpList> = lists.into_iter().filter(|l| l.name == name).collect();
        if matches.len() == 1 {
            Ok(Href::new(matches.remove(0).href))
        } else {
            Err(Error::NotFound {
                kind: "ip list",
                name: name.to_string(),
                matches: matches.len(),
            })
        }
    }
}

/// Extract `app` labels and deduplicate by href (not by name), with
/// deterministic ordering.
fn dedup_app_labels(workloads: Vec<Workload>) -> Vec<Label> {
    let mut unique = BTreeMap::new();
    for workload in workloads {
        for label in workload.labels {
            if label.key == "app" {
                unique.entry(label.href.clone()).or_insert(label);
            }
        }
    }
    unique.into_values().collect()
}
