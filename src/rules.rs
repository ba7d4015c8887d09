//! Rule synthesizer
//!
//! Turns finalized no-traffic findings into deny rules: one rule set per run,
//! one deny rule per finding with providers = environment + silent apps and
//! the shared "any address" ip-list as the consumer.

use std::sync::Arc;

use reqwest::Method;
use serde::{Deserialize, Serialize};
use tracing::info;

use crate::error::{Error, Result};
use crate::transport::Transport;
use crate::types::{Actor, Href, NoTrafficFinding};

#[derive(Debug, Serialize)]
struct RuleSetCreate<'a> {
    name: &'a str,
    description: &'static str,
    scopes: Vec<Vec<Actor>>,
}

#[derive(Debug, Serialize)]
struct DenyRuleCreate {
    providers: Vec<Actor>,
    consumers: Vec<Actor>,
    enabled: bool,
    ingress_services: Vec<Href>,
    egress_services: Vec<Href>,
    network_type: &'static str,
    description: &'static str,
}

#[derive(Debug, Deserialize)]
struct CreatedRef {
    #[serde(default)]
    href: String,
}

pub struct RuleSynthesizer {
    transport: Arc<dyn Transport>,
    org: String,
}

impl RuleSynthesizer {
    pub fn new(transport: Arc<dyn Transport>, org: impl Into<String>) -> Self {
        Self {
            transport,
            org: org.into(),
        }
    }

    /// Create the rule set that will own this run's deny rules.
    pub async fn create_rule_set(&self, name: &str) -> Result<Href> {
        let path = format!("/orgs/{}/sec_policy/draft/rule_sets", self.org);
        let body = RuleSetCreate {
            name,
            description: "Created by the auto deny rules agent.",
            scopes: vec![vec![]],
        };

        let bytes = self
            .transport
            .request(Method::POST, &path, Some(serde_json::to_value(&body)?))
            .await?;
        let created: CreatedRef = serde_json::from_slice(&bytes)
            .map_err(|e| Error::malformed(&path, e.to_string()))?;
        if created.href.is_empty() {
            return Err(Error::malformed(&path, "rule set creation returned no href"));
        }

        info!("created rule set {}", created.href);
        Ok(Href::new(created.href))
    }

    /// Submit one deny rule for a finalized finding.
    ///
    /// Submitted once; retry is the transport's concern. Failure is reported
    /// per finding and must not abort the remaining findings.
    pub async fn create_deny_rule(
        &self,
        rule_set: &Href,
        finding: &NoTrafficFinding,
        target: &Href,
    ) -> Result<()> {
        let mut providers = Vec::with_capacity(finding.apps.len() + 1);
        providers.push(Actor::label(&finding.env.href));
        providers.extend(finding.apps.iter().map(|app| Actor::label(&app.href)));

        let body = DenyRuleCreate {
            providers,
            consumers: vec![Actor::ip_list(&target.href)],
            enabled: true,
            ingress_services: vec![Href::new(&finding.service.href)],
            egress_services: Vec::new(),
            network_type: "brn",
            description: "",
        };

        let path = format!("{}/deny_rules", rule_set.href);
        let payload = serde_json::to_value(&body)?;
        self.transport
            .request(Method::POST, &path, Some(payload))
            .await
            .map_err(|e| Error::RuleCreation {
                env: finding.env.value.clone(),
                service: finding.service.name.clone(),
                source: Box::new(Error::Transport(e)),
            })?;

        Ok(())
    }
}
