//! Long-polling provider over the Consul catalog HTTP API.
//!
//! A fetch lists `/v1/catalog/services`, then reads each service's
//! instances from `/v1/health/service/<name>` (only passing instances
//! unless `only_passing = false`). Tags shaped `<prefix>.<key>=<value>`
//! become `traefik.<key>` labels and every tag takes part in constraint
//! matching. The records are rendered through the template engine.
//!
//! Watching uses Consul blocking queries: the catalog listing is re-issued
//! with the last `X-Consul-Index` and returns once the index moves or
//! `wait_seconds` elapse.

use std::collections::BTreeMap;
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use hyper::header::{HeaderName, HeaderValue};
use serde::{Deserialize, Serialize};
use tokio::sync::mpsc;
use url::Url;

use super::harness::{self, Change, Source};
use super::label::{self, Labels};
use super::rule::{RuleTemplate, DEFAULT_FRONTEND_RULE};
use super::template::{self, Endpoint, LabelFuncs, ServiceRecord, TemplateContext};
use super::{BaseProvider, Provider, WatchStrategy};
use crate::error::{BoxError, ProviderError};
use crate::http_client::{self, HttpClient};
use crate::safe::Pool;
use crate::types::{ConfigMessage, Configuration, Constraint};

const PROVIDER_NAME: &str = "consul_catalog";
const INDEX_HEADER: &str = "x-consul-index";
const TOKEN_HEADER: &str = "x-consul-token";
const REQUEST_TIMEOUT: Duration = Duration::from_secs(10);
/// Shortest spacing between blocking queries whose index did not move.
const MIN_REQUERY_INTERVAL: Duration = Duration::from_secs(1);

const fn default_true() -> bool {
    true
}

fn default_endpoint() -> String {
    "http://127.0.0.1:8500".to_string()
}

fn default_prefix() -> String {
    label::PREFIX.to_string()
}

fn default_frontend_rule() -> String {
    DEFAULT_FRONTEND_RULE.to_string()
}

const fn default_wait_seconds() -> u64 {
    30
}

const fn default_refresh_seconds() -> u64 {
    15
}

#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct ConsulCatalogProvider {
    #[serde(flatten)]
    pub base: BaseProvider,

    #[serde(default = "default_endpoint")]
    pub endpoint: String,

    #[serde(default)]
    pub domain: String,

    #[serde(default = "default_true")]
    pub exposed_by_default: bool,

    /// Tag prefix marking label tags (`<prefix>.port=80`).
    #[serde(default = "default_prefix")]
    pub prefix: String,

    #[serde(default = "default_frontend_rule")]
    pub frontend_rule: String,

    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub entry_points: Vec<String>,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub token: Option<String>,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub datacenter: Option<String>,

    #[serde(default = "default_true")]
    pub only_passing: bool,

    /// Longest a blocking query is held open by Consul.
    #[serde(default = "default_wait_seconds")]
    pub wait_seconds: u64,

    /// Polling interval when `watch_strategy = "poll"`.
    #[serde(default = "default_refresh_seconds")]
    pub refresh_seconds: u64,

    #[serde(skip)]
    context: TemplateContext,
}

impl Default for ConsulCatalogProvider {
    fn default() -> Self {
        Self {
            base: BaseProvider::default(),
            endpoint: default_endpoint(),
            domain: String::new(),
            exposed_by_default: true,
            prefix: default_prefix(),
            frontend_rule: default_frontend_rule(),
            entry_points: Vec::new(),
            token: None,
            datacenter: None,
            only_passing: true,
            wait_seconds: default_wait_seconds(),
            refresh_seconds: default_refresh_seconds(),
            context: TemplateContext::default(),
        }
    }
}

pub struct ConsulSession {
    client: HttpClient,
    index: u64,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "PascalCase")]
struct HealthEntry {
    node: Node,
    service: AgentService,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "PascalCase")]
struct Node {
    #[serde(default)]
    address: String,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "PascalCase")]
struct AgentService {
    #[serde(default)]
    address: String,
    #[serde(default)]
    port: u16,
    #[serde(default)]
    tags: Option<Vec<String>>,
}

/// Turn `<prefix>.<key>=<value>` tags into `traefik.<key>` labels.
#[must_use]
pub fn tags_to_labels(prefix: &str, tags: &[String]) -> Labels {
    let marker = format!("{prefix}.");
    tags.iter()
        .filter_map(|tag| {
            let (key, value) = tag.strip_prefix(&marker)?.split_once('=')?;
            Some((format!("{}.{}", label::PREFIX, key.trim()), value.trim().to_string()))
        })
        .collect()
}

fn fetch_error(source: BoxError) -> ProviderError {
    ProviderError::Fetch {
        provider: PROVIDER_NAME,
        source,
    }
}

impl ConsulCatalogProvider {
    fn url(&self, segments: &[&str], params: &[(&str, String)]) -> Result<String, ProviderError> {
        let mut url = Url::parse(&self.endpoint).map_err(|e| ProviderError::Connection {
            provider: PROVIDER_NAME,
            source: Box::new(e),
        })?;
        url.path_segments_mut()
            .map_err(|()| ProviderError::Connection {
                provider: PROVIDER_NAME,
                source: format!("'{}' cannot be used as a base URL", self.endpoint).into(),
            })?
            .pop_if_empty()
            .extend(segments);

        let mut query: Vec<(&str, String)> = params.to_vec();
        if let Some(dc) = &self.datacenter {
            query.push(("dc", dc.clone()));
        }
        if !query.is_empty() {
            let mut pairs = url.query_pairs_mut();
            for (k, v) in &query {
                pairs.append_pair(k, v);
            }
        }
        Ok(url.into())
    }

    fn headers(&self) -> Vec<(HeaderName, HeaderValue)> {
        self.token
            .as_deref()
            .and_then(|t| HeaderValue::from_str(t).ok())
            .map(|v| vec![(HeaderName::from_static(TOKEN_HEADER), v)])
            .unwrap_or_default()
    }

    /// List services and their tags. `blocking` carries the index to wait on.
    async fn services(
        &self,
        client: &HttpClient,
        blocking: Option<u64>,
    ) -> Result<(BTreeMap<String, Vec<String>>, u64), ProviderError> {
        let (params, timeout) = match blocking {
            Some(index) => (
                vec![
                    ("index", index.to_string()),
                    ("wait", format!("{}s", self.wait_seconds)),
                ],
                // Consul adds up to wait/16 of jitter to the hold time.
                Duration::from_secs(self.wait_seconds + self.wait_seconds / 16) + REQUEST_TIMEOUT,
            ),
            None => (Vec::new(), REQUEST_TIMEOUT),
        };
        let uri = self.url(&["v1", "catalog", "services"], &params)?;

        let response = http_client::get(client, &uri, &self.headers(), timeout)
            .await
            .map_err(fetch_error)?;
        if !response.status.is_success() {
            return Err(fetch_error(format!("{uri} returned {}", response.status).into()));
        }

        let index = parse_index(response.headers.get(INDEX_HEADER));
        let services = serde_json::from_slice(&response.body).map_err(|e| ProviderError::Decode {
            provider: PROVIDER_NAME,
            what: "catalog services".into(),
            source: Box::new(e),
        })?;
        Ok((services, index))
    }

    /// Instances of one service; `None` when the service vanished meanwhile
    /// or its listing could not be decoded.
    async fn instances(
        &self,
        client: &HttpClient,
        service: &str,
    ) -> Result<Option<Vec<HealthEntry>>, ProviderError> {
        let params = if self.only_passing {
            vec![("passing", "1".to_string())]
        } else {
            Vec::new()
        };
        let uri = self.url(&["v1", "health", "service", service], &params)?;

        let response = http_client::get(client, &uri, &self.headers(), REQUEST_TIMEOUT)
            .await
            .map_err(fetch_error)?;
        if !response.status.is_success() {
            tracing::warn!(provider = PROVIDER_NAME, service, status = %response.status, "skipping service");
            return Ok(None);
        }

        match serde_json::from_slice(&response.body) {
            Ok(entries) => Ok(Some(entries)),
            Err(e) => {
                tracing::warn!(provider = PROVIDER_NAME, service, error = %e, "skipping service with malformed health listing");
                Ok(None)
            }
        }
    }

    fn record(&self, name: String, catalog_tags: Vec<String>, entries: &[HealthEntry]) -> ServiceRecord {
        let mut tags = catalog_tags;
        for entry in entries {
            for tag in entry.service.tags.iter().flatten() {
                if !tags.contains(tag) {
                    tags.push(tag.clone());
                }
            }
        }

        let endpoints = entries
            .iter()
            .map(|e| {
                let address = if e.service.address.is_empty() {
                    e.node.address.clone()
                } else {
                    e.service.address.clone()
                };
                Endpoint::new(address, (e.service.port > 0).then_some(e.service.port))
            })
            .collect();

        ServiceRecord {
            labels: tags_to_labels(&self.prefix, &tags),
            name,
            endpoints,
            tags,
            health: None,
            state: None,
        }
    }
}

/// The blocking index from a response. Missing, malformed and zero values
/// become 1 so the next query never waits on index 0.
fn parse_index(value: Option<&HeaderValue>) -> u64 {
    value
        .and_then(|v| v.to_str().ok())
        .and_then(|v| v.parse::<u64>().ok())
        .filter(|&i| i > 0)
        .unwrap_or(1)
}

#[async_trait]
impl Source for ConsulCatalogProvider {
    type Session = ConsulSession;

    fn provider_name(&self) -> &'static str {
        PROVIDER_NAME
    }

    async fn connect(&self) -> Result<ConsulSession, ProviderError> {
        Ok(ConsulSession {
            client: http_client::build_http_client(),
            index: 0,
        })
    }

    async fn fetch(&self, session: &mut ConsulSession) -> Result<Option<Configuration>, ProviderError> {
        let (services, index) = self.services(&session.client, None).await?;
        session.index = index;

        let mut records = Vec::with_capacity(services.len());
        for (name, tags) in services {
            if name == "consul" {
                continue;
            }
            if let Some(entries) = self.instances(&session.client, &name).await? {
                records.push(self.record(name, tags, &entries));
            }
        }

        let rendered = template::render(&LabelFuncs, &self.context, &records);
        if rendered.configuration.is_empty() && !rendered.errors.is_empty() {
            tracing::warn!(
                provider = PROVIDER_NAME,
                errors = rendered.errors.len(),
                "no service could be rendered, keeping previous configuration"
            );
            return Ok(None);
        }
        Ok(Some(rendered.configuration))
    }

    async fn wait_for_change(&self, session: &mut ConsulSession) -> Result<Change, ProviderError> {
        loop {
            let started = tokio::time::Instant::now();
            let (_, index) = self.services(&session.client, Some(session.index)).await?;
            if index == session.index {
                // An agent that ignores the index answers at once.
                tokio::time::sleep_until(started + MIN_REQUERY_INTERVAL).await;
                continue;
            }
            if index < session.index {
                tracing::debug!(provider = PROVIDER_NAME, from = session.index, to = index, "consul index went backwards, resetting");
            }
            session.index = index;
            return Ok(Change::Changed);
        }
    }

    fn debug_log_configuration(&self) -> bool {
        self.base.debug_log_generated_configuration
    }
}

#[async_trait]
impl Provider for ConsulCatalogProvider {
    fn name(&self) -> &'static str {
        PROVIDER_NAME
    }

    fn init(&mut self, constraints: &[Constraint]) -> Result<(), ProviderError> {
        Url::parse(&self.endpoint).map_err(|e| ProviderError::Connection {
            provider: PROVIDER_NAME,
            source: Box::new(e),
        })?;
        let frontend_rule = RuleTemplate::parse(&self.frontend_rule).map_err(|source| {
            ProviderError::Template {
                provider: PROVIDER_NAME,
                source,
            }
        })?;
        self.base.init_constraints(constraints)?;

        self.context = TemplateContext {
            domain: self.domain.clone(),
            exposed_by_default: self.exposed_by_default,
            entry_points: self.entry_points.clone(),
            filter_unhealthy: false,
            frontend_rule,
            constraints: self.base.constraints().to_vec(),
        };
        Ok(())
    }

    async fn provide(
        self: Arc<Self>,
        sink: mpsc::Sender<ConfigMessage>,
        pool: Pool,
    ) -> Result<(), ProviderError> {
        let options = self.base.watch_options(
            WatchStrategy::LongPoll,
            Duration::from_secs(self.refresh_seconds),
        );
        pool.go("provider-consul-catalog", move |token| async move {
            harness::run(&*self, &options, &self.base.retry, &sink, &token).await;
        });
        Ok(())
    }
}
