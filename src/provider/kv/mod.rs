//! Polling provider over a flat key/value tree.
//!
//! The store is listed under `<prefix>/` on every tick and the keys are
//! folded into a [`Configuration`]:
//!
//! ```text
//! <prefix>/tags                                         comma list, checked against constraints
//! <prefix>/backends/<b>/servers/<s>/url                 required per server
//! <prefix>/backends/<b>/servers/<s>/weight
//! <prefix>/backends/<b>/circuitbreaker/expression
//! <prefix>/backends/<b>/loadbalancer/method
//! <prefix>/backends/<b>/loadbalancer/sticky
//! <prefix>/backends/<b>/loadbalancer/stickiness/cookiename
//! <prefix>/backends/<b>/maxconn/amount
//! <prefix>/backends/<b>/maxconn/extractorfunc
//! <prefix>/backends/<b>/healthcheck/{path,port,interval}
//! <prefix>/frontends/<f>/backend                        required per frontend
//! <prefix>/frontends/<f>/{entrypoints,basicauth,whitelistsourcerange}   comma lists
//! <prefix>/frontends/<f>/{passhostheader,priority}
//! <prefix>/frontends/<f>/routes/<r>/rule
//! <prefix>/frontends/<f>/redirect/{entrypoint,regex,replacement,permanent}
//! ```
//!
//! The store itself is passed in explicitly; [`redis_store`] provides the
//! Redis implementation.

#[cfg(feature = "redis")]
pub mod redis_store;

use std::collections::BTreeMap;
use std::fmt;
use std::str::FromStr;
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use tokio::sync::mpsc;

use super::harness::{self, Source};
use super::label::split_and_trim;
use super::{BaseProvider, Provider, WatchStrategy};
use crate::error::ProviderError;
use crate::safe::Pool;
use crate::types::{
    constraint, Backend, CircuitBreaker, ConfigMessage, Configuration, Constraint, Frontend,
    HealthCheck, LoadBalancer, MaxConn, Redirect, Route, Server, Stickiness,
};

const PROVIDER_NAME: &str = "redis";

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct KvPair {
    pub key: String,
    pub value: String,
}

impl KvPair {
    #[must_use]
    pub fn new(key: impl Into<String>, value: impl Into<String>) -> Self {
        Self {
            key: key.into(),
            value: value.into(),
        }
    }
}

// async_trait is required because stores are held as Arc<dyn KvStore>.
#[async_trait]
pub trait KvStore: Send + Sync + fmt::Debug {
    /// Every pair whose key starts with `prefix`.
    async fn list(&self, prefix: &str) -> Result<Vec<KvPair>, ProviderError>;
}

fn default_endpoint() -> String {
    "redis://127.0.0.1:6379".to_string()
}

fn default_prefix() -> String {
    "traefik".to_string()
}

const fn default_refresh_seconds() -> u64 {
    10
}

#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct KvProvider {
    #[serde(flatten)]
    pub base: BaseProvider,

    #[serde(default = "default_endpoint")]
    pub endpoint: String,

    #[serde(default = "default_prefix")]
    pub prefix: String,

    #[serde(default = "default_refresh_seconds")]
    pub refresh_seconds: u64,

    #[serde(skip)]
    store: Option<Arc<dyn KvStore>>,
}

impl Default for KvProvider {
    fn default() -> Self {
        Self {
            base: BaseProvider::default(),
            endpoint: default_endpoint(),
            prefix: default_prefix(),
            refresh_seconds: default_refresh_seconds(),
            store: None,
        }
    }
}

impl KvProvider {
    #[must_use]
    pub fn with_store(mut self, store: Arc<dyn KvStore>) -> Self {
        self.store = Some(store);
        self
    }

    fn root(&self) -> String {
        format!("{}/", self.prefix.trim_end_matches('/'))
    }

    /// Build the configuration from one listing. `None` when the tree's
    /// tags fail the constraints.
    #[must_use]
    pub fn render(&self, pairs: &[KvPair]) -> Option<Configuration> {
        let root = self.root();
        let tree: BTreeMap<&str, &str> = pairs
            .iter()
            .filter_map(|p| Some((p.key.strip_prefix(&root)?, p.value.as_str())))
            .collect();

        let tags = tree.get("tags").map(|t| split_and_trim(t)).unwrap_or_default();
        if let Some(failing) = constraint::first_failing(self.base.constraints(), &tags) {
            tracing::debug!(
                provider = PROVIDER_NAME,
                constraint = %failing,
                "key tree rejected by constraint"
            );
            return None;
        }

        Some(Configuration {
            backends: backends(&tree),
            frontends: frontends(&tree),
        })
    }
}

/// Group `<kind>/<name>/<rest>` keys by name.
fn group<'a>(tree: &BTreeMap<&'a str, &'a str>, kind: &str) -> BTreeMap<&'a str, BTreeMap<&'a str, &'a str>> {
    let mut groups: BTreeMap<&str, BTreeMap<&str, &str>> = BTreeMap::new();
    for (&key, &value) in tree {
        let Some(rest) = key.strip_prefix(kind).and_then(|r| r.strip_prefix('/')) else {
            continue;
        };
        if let Some((name, field)) = rest.split_once('/') {
            groups.entry(name).or_default().insert(field, value);
        }
    }
    groups
}

fn parsed<T: FromStr>(fields: &BTreeMap<&str, &str>, key: &str) -> Option<T> {
    let raw = fields.get(key)?;
    raw.trim().parse().map_or_else(
        |_| {
            tracing::debug!(provider = PROVIDER_NAME, key, value = *raw, "ignoring malformed value");
            None
        },
        Some,
    )
}

fn text(fields: &BTreeMap<&str, &str>, key: &str) -> Option<String> {
    fields
        .get(key)
        .map(|v| v.trim())
        .filter(|v| !v.is_empty())
        .map(ToString::to_string)
}

fn list(fields: &BTreeMap<&str, &str>, key: &str) -> Vec<String> {
    fields.get(key).map(|v| split_and_trim(v)).unwrap_or_default()
}

fn backends(tree: &BTreeMap<&str, &str>) -> BTreeMap<String, Backend> {
    let mut out = BTreeMap::new();
    for (name, fields) in group(tree, "backends") {
        let mut backend = Backend::default();

        for (server, server_fields) in group(&fields, "servers") {
            let Some(url) = text(&server_fields, "url") else {
                tracing::warn!(provider = PROVIDER_NAME, backend = name, server, "server has no url, skipping");
                continue;
            };
            backend.servers.insert(
                server.to_string(),
                Server {
                    url,
                    weight: parsed(&server_fields, "weight").unwrap_or(1),
                },
            );
        }

        backend.circuit_breaker =
            text(&fields, "circuitbreaker/expression").map(|expression| CircuitBreaker { expression });

        let method = text(&fields, "loadbalancer/method");
        let sticky = parsed::<bool>(&fields, "loadbalancer/sticky").unwrap_or(false);
        let cookie = text(&fields, "loadbalancer/stickiness/cookiename");
        if method.is_some() || sticky || cookie.is_some() {
            let mut lb = LoadBalancer::default();
            if let Some(method) = method {
                lb.method = method;
            }
            if sticky || cookie.is_some() {
                lb.stickiness = Some(Stickiness {
                    cookie_name: cookie.unwrap_or_default(),
                });
            }
            backend.load_balancer = Some(lb);
        }

        if let Some(amount) = parsed::<i64>(&fields, "maxconn/amount") {
            backend.max_conn = Some(MaxConn {
                amount,
                extractor_func: text(&fields, "maxconn/extractorfunc")
                    .unwrap_or_else(|| super::label::DEFAULT_MAXCONN_EXTRACTORFUNC.to_string()),
            });
        }

        if let Some(path) = text(&fields, "healthcheck/path") {
            backend.health_check = Some(HealthCheck {
                path,
                port: parsed(&fields, "healthcheck/port"),
                interval: text(&fields, "healthcheck/interval")
                    .unwrap_or_else(|| super::label::DEFAULT_HEALTHCHECK_INTERVAL.to_string()),
            });
        }

        out.insert(name.to_string(), backend);
    }
    out
}

fn frontends(tree: &BTreeMap<&str, &str>) -> BTreeMap<String, Frontend> {
    let mut out = BTreeMap::new();
    for (name, fields) in group(tree, "frontends") {
        let Some(backend) = text(&fields, "backend") else {
            tracing::warn!(provider = PROVIDER_NAME, frontend = name, "frontend has no backend, skipping");
            continue;
        };
        let mut frontend = Frontend::new(backend);
        frontend.entry_points = list(&fields, "entrypoints");
        frontend.basic_auth = list(&fields, "basicauth");
        frontend.whitelist_source_range = list(&fields, "whitelistsourcerange");
        frontend.pass_host_header = parsed(&fields, "passhostheader").unwrap_or(true);
        frontend.priority = parsed(&fields, "priority").unwrap_or(0);

        for (route, route_fields) in group(&fields, "routes") {
            if let Some(rule) = text(&route_fields, "rule") {
                frontend.routes.insert(route.to_string(), Route { rule });
            }
        }

        let redirect = Redirect {
            entry_point: text(&fields, "redirect/entrypoint").unwrap_or_default(),
            regex: text(&fields, "redirect/regex").unwrap_or_default(),
            replacement: text(&fields, "redirect/replacement").unwrap_or_default(),
            permanent: parsed(&fields, "redirect/permanent").unwrap_or(false),
        };
        if !redirect.entry_point.is_empty() || !redirect.regex.is_empty() {
            frontend.redirect = Some(redirect);
        }

        out.insert(name.to_string(), frontend);
    }
    out
}

#[async_trait]
impl Source for KvProvider {
    type Session = Arc<dyn KvStore>;

    fn provider_name(&self) -> &'static str {
        PROVIDER_NAME
    }

    async fn connect(&self) -> Result<Arc<dyn KvStore>, ProviderError> {
        self.store.clone().ok_or(ProviderError::MissingField {
            provider: PROVIDER_NAME,
            field: "endpoint",
        })
    }

    async fn fetch(&self, store: &mut Arc<dyn KvStore>) -> Result<Option<Configuration>, ProviderError> {
        let pairs = store.list(&self.root()).await?;
        Ok(self.render(&pairs))
    }

    fn debug_log_configuration(&self) -> bool {
        self.base.debug_log_generated_configuration
    }
}

#[async_trait]
impl Provider for KvProvider {
    fn name(&self) -> &'static str {
        PROVIDER_NAME
    }

    fn init(&mut self, constraints: &[Constraint]) -> Result<(), ProviderError> {
        if self.store.is_none() {
            return Err(ProviderError::MissingField {
                provider: PROVIDER_NAME,
                field: "endpoint",
            });
        }
        self.base.init_constraints(constraints)
    }

    async fn provide(
        self: Arc<Self>,
        sink: mpsc::Sender<ConfigMessage>,
        pool: Pool,
    ) -> Result<(), ProviderError> {
        let options = self
            .base
            .watch_options(WatchStrategy::Poll, Duration::from_secs(self.refresh_seconds));
        pool.go("provider-kv", move |token| async move {
            harness::run(&*self, &options, &self.base.retry, &sink, &token).await;
        });
        Ok(())
    }
}
