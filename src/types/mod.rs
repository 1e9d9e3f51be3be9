//! The unified routing configuration every provider produces.
//!
//! [`Configuration`] is the output unit: a set of [`Backend`]s (named
//! groups of [`Server`]s plus optional health-check, circuit-breaker,
//! load-balancer and connection-limit settings) and a set of
//! [`Frontend`]s (entry points, route rules and the backend they forward
//! to). Maps are `BTreeMap` so two equal configurations always serialize
//! to the same bytes.

pub mod constraint;
pub mod message;

use std::collections::BTreeMap;

use serde::{Deserialize, Serialize};

pub use constraint::Constraint;
pub use message::ConfigMessage;

/// Merged view: the latest [`Configuration`] per provider name.
pub type Configurations = BTreeMap<String, Configuration>;

const fn default_true() -> bool {
    true
}

const fn default_weight() -> i32 {
    1
}

fn default_lb_method() -> String {
    "wrr".to_string()
}

fn default_extractor_func() -> String {
    "request.host".to_string()
}

fn default_health_interval() -> String {
    "30s".to_string()
}

fn is_true(v: &bool) -> bool {
    *v
}

fn is_false(v: &bool) -> bool {
    !*v
}

fn is_zero(v: &i32) -> bool {
    *v == 0
}

fn is_default_weight(v: &i32) -> bool {
    *v == default_weight()
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Deserialize, Serialize)]
#[serde(deny_unknown_fields)]
pub struct Configuration {
    #[serde(default, skip_serializing_if = "BTreeMap::is_empty")]
    pub backends: BTreeMap<String, Backend>,

    #[serde(default, skip_serializing_if = "BTreeMap::is_empty")]
    pub frontends: BTreeMap<String, Frontend>,
}

impl Configuration {
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.backends.is_empty() && self.frontends.is_empty()
    }

    #[must_use]
    pub fn total_servers(&self) -> usize {
        self.backends.values().map(|b| b.servers.len()).sum()
    }

    /// Fold `other` into `self`. Entries already present win, so merging
    /// several documents in a fixed order is deterministic.
    pub fn merge(&mut self, other: Self) {
        for (name, backend) in other.backends {
            self.backends.entry(name).or_insert(backend);
        }
        for (name, frontend) in other.frontends {
            self.frontends.entry(name).or_insert(frontend);
        }
    }

    /// Frontends whose `backend` does not name an existing backend.
    #[must_use]
    pub fn dangling_frontends(&self) -> Vec<(&str, &str)> {
        self.frontends
            .iter()
            .filter(|(_, f)| !self.backends.contains_key(&f.backend))
            .map(|(name, f)| (name.as_str(), f.backend.as_str()))
            .collect()
    }
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Deserialize, Serialize)]
#[serde(deny_unknown_fields)]
pub struct Backend {
    #[serde(default, skip_serializing_if = "BTreeMap::is_empty")]
    pub servers: BTreeMap<String, Server>,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub health_check: Option<HealthCheck>,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub circuit_breaker: Option<CircuitBreaker>,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub load_balancer: Option<LoadBalancer>,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub max_conn: Option<MaxConn>,
}

#[derive(Debug, Clone, PartialEq, Eq, Deserialize, Serialize)]
#[serde(deny_unknown_fields)]
pub struct Server {
    pub url: String,

    #[serde(default = "default_weight", skip_serializing_if = "is_default_weight")]
    pub weight: i32,
}

#[derive(Debug, Clone, PartialEq, Eq, Deserialize, Serialize)]
#[serde(deny_unknown_fields)]
pub struct HealthCheck {
    pub path: String,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub port: Option<u16>,

    #[serde(default = "default_health_interval")]
    pub interval: String,
}

#[derive(Debug, Clone, PartialEq, Eq, Deserialize, Serialize)]
#[serde(deny_unknown_fields)]
pub struct CircuitBreaker {
    pub expression: String,
}

#[derive(Debug, Clone, PartialEq, Eq, Deserialize, Serialize)]
#[serde(deny_unknown_fields)]
pub struct LoadBalancer {
    #[serde(default = "default_lb_method")]
    pub method: String,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub stickiness: Option<Stickiness>,
}

impl Default for LoadBalancer {
    fn default() -> Self {
        Self {
            method: default_lb_method(),
            stickiness: None,
        }
    }
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Deserialize, Serialize)]
#[serde(deny_unknown_fields)]
pub struct Stickiness {
    #[serde(default, skip_serializing_if = "String::is_empty")]
    pub cookie_name: String,
}

#[derive(Debug, Clone, PartialEq, Eq, Deserialize, Serialize)]
#[serde(deny_unknown_fields)]
pub struct MaxConn {
    pub amount: i64,

    #[serde(default = "default_extractor_func")]
    pub extractor_func: String,
}

#[derive(Debug, Clone, PartialEq, Eq, Deserialize, Serialize)]
#[serde(deny_unknown_fields)]
pub struct Frontend {
    pub backend: String,

    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub entry_points: Vec<String>,

    #[serde(default, skip_serializing_if = "BTreeMap::is_empty")]
    pub routes: BTreeMap<String, Route>,

    #[serde(default = "default_true", skip_serializing_if = "is_true")]
    pub pass_host_header: bool,

    #[serde(default, skip_serializing_if = "is_zero")]
    pub priority: i32,

    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub basic_auth: Vec<String>,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub redirect: Option<Redirect>,

    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub whitelist_source_range: Vec<String>,
}

impl Frontend {
    #[must_use]
    pub fn new(backend: impl Into<String>) -> Self {
        Self {
            backend: backend.into(),
            entry_points: Vec::new(),
            routes: BTreeMap::new(),
            pass_host_header: true,
            priority: 0,
            basic_auth: Vec::new(),
            redirect: None,
            whitelist_source_range: Vec::new(),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Deserialize, Serialize)]
#[serde(deny_unknown_fields)]
pub struct Route {
    pub rule: String,
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Deserialize, Serialize)]
#[serde(deny_unknown_fields)]
pub struct Redirect {
    #[serde(default, skip_serializing_if = "String::is_empty")]
    pub entry_point: String,

    #[serde(default, skip_serializing_if = "String::is_empty")]
    pub regex: String,

    #[serde(default, skip_serializing_if = "String::is_empty")]
    pub replacement: String,

    #[serde(default, skip_serializing_if = "is_false")]
    pub permanent: bool,
}
