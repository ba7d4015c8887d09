//! Core domain types
//!
//! Labels, risky service definitions, and the findings produced by the
//! orchestrator. Also the typed reference shapes shared by query and
//! rule payloads.

use serde::{Deserialize, Serialize};

/// A categorical tag attached to workloads (e.g. key `env` or `app`).
///
/// The href is the opaque API reference; labels are immutable once fetched.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Label {
    pub href: String,
    pub key: String,
    pub value: String,
}

/// One port/protocol entry of a service definition.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ServicePort {
    pub port: u16,
    pub proto: u8,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub to_port: Option<u16>,
}

/// A named service definition flagged as high-risk (e.g. ransomware-associated).
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Service {
    pub href: String,
    pub name: String,
    #[serde(default)]
    pub service_ports: Vec<ServicePort>,
}

/// One environment label plus the deduplicated application labels observed
/// among its online, managed, enforcement-eligible workloads.
#[derive(Debug, Clone)]
pub struct EnvApps {
    pub env: Label,
    pub apps: Vec<Label>,
}

/// All applications under one (environment, service) pairing that showed
/// zero traffic in both lookback windows.
///
/// Finalized only after every application in the environment's app set has a
/// verification outcome for the service.
#[derive(Debug, Clone)]
pub struct NoTrafficFinding {
    pub env: Label,
    pub service: Service,
    pub apps: Vec<Label>,
}

/// Opaque reference to an API object.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Href {
    pub href: String,
}

impl Href {
    pub fn new(href: impl Into<String>) -> Self {
        Self { href: href.into() }
    }
}

/// A query or rule actor, tagged by the kind of object it references.
///
/// Serializes to the wire shape `{"label": {"href": ...}}` /
/// `{"ip_list": {"href": ...}}`.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum Actor {
    Label(Href),
    IpList(Href),
}

impl Actor {
    pub fn label(href: impl Into<String>) -> Self {
        Actor::Label(Href::new(href))
    }

    pub fn ip_list(href: impl Into<String>) -> Self {
        Actor::IpList(Href::new(href))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn actor_serializes_to_tagged_href() {
        let actor = Actor::label("/orgs/1/labels/9");
        let json = serde_json::to_value(&actor).unwrap();
        assert_eq!(json, serde_json::json!({"label": {"href": "/orgs/1/labels/9"}}));

        let actor = Actor::ip_list("/orgs/1/sec_policy/draft/ip_lists/3");
        let json = serde_json::to_value(&actor).unwrap();
        assert_eq!(
            json,
            serde_json::json!({"ip_list": {"href": "/orgs/1/sec_policy/draft/ip_lists/3"}})
        );
    }

    #[test]
    fn service_port_omits_absent_range_end() {
        let port = ServicePort { port: 3389, proto: 6, to_port: None };
        let json = serde_json::to_value(&port).unwrap();
        assert_eq!(json, serde_json::json!({"port": 3389, "proto": 6}));
    }
}
