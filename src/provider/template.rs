//! Render labelled service records into a [`Configuration`].
//!
//! Adapters that discover services (rather than reading a ready-made
//! configuration) translate what they see into [`ServiceRecord`]s and
//! hand them to [`render`] together with a [`TemplateContext`] and a
//! [`TemplateFuncs`] implementation. `TemplateFuncs` is the function map:
//! each method derives one value from a record, by default through the
//! accessors in [`label`](super::label), and an adapter overrides only
//! the entries that differ for its backend.
//!
//! Rendering is deterministic: records are processed in name order and
//! every name is a pure function of the record's labels and name.

use std::collections::BTreeMap;

use super::label::{self, Labels};
use super::normalize;
use super::rule::{validate_rule, RuleInput, RuleTemplate};
use crate::error::TemplateError;
use crate::types::{constraint, Backend, Configuration, Constraint, Frontend, Route, Server};

const HEALTHY_STATES: &[&str] = &["healthy", "passing", "updating-healthy"];
const ACTIVE_STATES: &[&str] = &["active", "running", "updating-active", "upgraded", "upgrading"];

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Endpoint {
    pub address: String,
    /// Port advertised by the backend itself; `traefik.port` overrides it.
    pub port: Option<u16>,
}

impl Endpoint {
    #[must_use]
    pub fn new(address: impl Into<String>, port: Option<u16>) -> Self {
        Self {
            address: address.into(),
            port,
        }
    }
}

/// One discovered service, as the adapter saw it this tick.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ServiceRecord {
    pub name: String,
    pub labels: Labels,
    pub endpoints: Vec<Endpoint>,
    /// Tags matched against constraints (in addition to `traefik.tags`).
    pub tags: Vec<String>,
    pub health: Option<String>,
    pub state: Option<String>,
}

/// Shared rendering context, built once per provider.
#[derive(Debug, Clone)]
pub struct TemplateContext {
    pub domain: String,
    pub exposed_by_default: bool,
    pub entry_points: Vec<String>,
    /// Drop records whose health/state is known and not healthy/active.
    pub filter_unhealthy: bool,
    pub frontend_rule: RuleTemplate,
    pub constraints: Vec<Constraint>,
}

impl Default for TemplateContext {
    fn default() -> Self {
        Self {
            domain: String::new(),
            exposed_by_default: true,
            entry_points: Vec::new(),
            filter_unhealthy: false,
            frontend_rule: RuleTemplate::default(),
            constraints: Vec::new(),
        }
    }
}

/// Why a record was left out without being an error.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Exclusion {
    Disabled,
    NoPort,
    Constraint,
    Unhealthy,
    /// Another record already owns the frontend name for a different backend.
    DuplicateFrontend,
}

/// The function map. Every method has the label-driven default.
pub trait TemplateFuncs {
    fn is_enabled(&self, record: &ServiceRecord, ctx: &TemplateContext) -> bool {
        label::is_enabled(&record.labels, ctx.exposed_by_default)
    }

    fn port(&self, record: &ServiceRecord, endpoint: &Endpoint) -> Option<u16> {
        label::get_port(&record.labels).or(endpoint.port)
    }

    fn constraint_tags(&self, record: &ServiceRecord) -> Vec<String> {
        let mut tags = record.tags.clone();
        tags.extend(label::get_tags(&record.labels));
        tags
    }

    fn is_healthy(&self, record: &ServiceRecord) -> bool {
        let healthy = record
            .health
            .as_deref()
            .map_or(true, |h| HEALTHY_STATES.contains(&h));
        let active = record
            .state
            .as_deref()
            .map_or(true, |s| ACTIVE_STATES.contains(&s));
        healthy && active
    }

    fn frontend_rule(&self, record: &ServiceRecord, ctx: &TemplateContext) -> String {
        label::get_frontend_rule(&record.labels).unwrap_or_else(|| {
            let domain = label::get_domain(&record.labels, &ctx.domain);
            ctx.frontend_rule.render(&RuleInput {
                name: &record.name,
                domain: &domain,
                labels: &record.labels,
            })
        })
    }

    fn frontend_name(&self, rule: &str) -> String {
        format!("frontend-{}", normalize(rule))
    }

    fn backend_name(&self, record: &ServiceRecord) -> String {
        let base = label::get_backend_name(&record.labels).unwrap_or_else(|| record.name.clone());
        format!("backend-{}", normalize(&base))
    }

    fn server_url(&self, record: &ServiceRecord, endpoint: &Endpoint, port: u16) -> String {
        let protocol = label::get_protocol(&record.labels);
        if endpoint.address.contains(':') && !endpoint.address.starts_with('[') {
            // Bare IPv6 literal.
            format!("{protocol}://[{}]:{port}", endpoint.address)
        } else {
            format!("{protocol}://{}:{port}", endpoint.address)
        }
    }

    fn weight(&self, record: &ServiceRecord) -> i32 {
        label::get_weight(&record.labels)
    }

    fn entry_points(&self, record: &ServiceRecord, ctx: &TemplateContext) -> Vec<String> {
        label::get_entry_points(&record.labels, &ctx.entry_points)
    }

    fn decorate_backend(&self, record: &ServiceRecord, backend: &mut Backend) {
        backend.health_check = label::get_health_check(&record.labels);
        backend.circuit_breaker = label::get_circuit_breaker(&record.labels);
        backend.load_balancer = label::get_load_balancer(&record.labels);
        backend.max_conn = label::get_max_conn(&record.labels);
    }

    fn decorate_frontend(&self, record: &ServiceRecord, frontend: &mut Frontend) {
        frontend.pass_host_header = label::get_pass_host_header(&record.labels);
        frontend.priority = label::get_priority(&record.labels);
        frontend.basic_auth = label::get_basic_auth(&record.labels);
        frontend.redirect = label::get_redirect(&record.labels);
        frontend.whitelist_source_range = label::get_whitelist_source_range(&record.labels);
    }
}

/// The stock function map: labels only.
#[derive(Debug, Clone, Copy, Default)]
pub struct LabelFuncs;

impl TemplateFuncs for LabelFuncs {}

#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct Rendered {
    pub configuration: Configuration,
    pub errors: Vec<TemplateError>,
    pub excluded: Vec<(String, Exclusion)>,
}

/// Decide whether `record` takes part in rendering at all.
pub fn filter<F: TemplateFuncs + ?Sized>(
    funcs: &F,
    ctx: &TemplateContext,
    record: &ServiceRecord,
) -> Result<(), Exclusion> {
    if !funcs.is_enabled(record, ctx) {
        return Err(Exclusion::Disabled);
    }
    if record.endpoints.is_empty()
        || !record.endpoints.iter().any(|e| funcs.port(record, e).is_some())
    {
        return Err(Exclusion::NoPort);
    }
    let tags = funcs.constraint_tags(record);
    if let Some(failing) = constraint::first_failing(&ctx.constraints, &tags) {
        tracing::debug!(service = %record.name, constraint = %failing, "service rejected by constraint");
        return Err(Exclusion::Constraint);
    }
    if ctx.filter_unhealthy && !funcs.is_healthy(record) {
        return Err(Exclusion::Unhealthy);
    }
    Ok(())
}

/// Render `records` into one configuration.
///
/// Excluded records and records that fail to render are left out; the
/// rest are rendered regardless.
pub fn render<F: TemplateFuncs + ?Sized>(
    funcs: &F,
    ctx: &TemplateContext,
    records: &[ServiceRecord],
) -> Rendered {
    let mut sorted: Vec<&ServiceRecord> = records.iter().collect();
    sorted.sort_by(|a, b| a.name.cmp(&b.name));

    let mut out = Rendered::default();
    let mut frontend_owners: BTreeMap<String, &str> = BTreeMap::new();

    for record in sorted {
        if let Err(reason) = filter(funcs, ctx, record) {
            tracing::debug!(service = %record.name, reason = ?reason, "service excluded");
            out.excluded.push((record.name.clone(), reason));
            continue;
        }

        match render_record(funcs, ctx, record, &out.configuration) {
            Ok((backend_name, servers, frontend_name, frontend, backend_template)) => {
                if let Some(existing) = out.configuration.frontends.get(&frontend_name) {
                    if existing.backend != backend_name {
                        tracing::warn!(
                            service = %record.name,
                            owner = frontend_owners.get(&frontend_name).copied().unwrap_or_default(),
                            frontend = %frontend_name,
                            "frontend already defined for another backend, skipping service"
                        );
                        out.excluded.push((record.name.clone(), Exclusion::DuplicateFrontend));
                        continue;
                    }
                }
                frontend_owners.entry(frontend_name.clone()).or_insert(&record.name);
                let backend = out
                    .configuration
                    .backends
                    .entry(backend_name)
                    .or_insert(backend_template);
                let offset = backend.servers.len();
                for (i, server) in servers.into_iter().enumerate() {
                    backend.servers.insert(format!("server-{}", offset + i), server);
                }
                out.configuration
                    .frontends
                    .entry(frontend_name)
                    .or_insert(frontend);
            }
            Err(e) => {
                tracing::warn!(service = %record.name, error = %e, "skipping service");
                out.errors.push(e);
            }
        }
    }

    out
}

type RecordParts = (String, Vec<Server>, String, Frontend, Backend);

fn render_record<F: TemplateFuncs + ?Sized>(
    funcs: &F,
    ctx: &TemplateContext,
    record: &ServiceRecord,
    so_far: &Configuration,
) -> Result<RecordParts, TemplateError> {
    let rule = funcs.frontend_rule(record, ctx);
    validate_rule(&rule).map_err(|reason| TemplateError::InvalidRule {
        record: record.name.clone(),
        rule: rule.clone(),
        reason,
    })?;

    let weight = funcs.weight(record);
    let mut servers = Vec::with_capacity(record.endpoints.len());
    for endpoint in &record.endpoints {
        let Some(port) = funcs.port(record, endpoint) else {
            continue;
        };
        let server_url = funcs.server_url(record, endpoint, port);
        if url::Url::parse(&server_url).map_or(true, |u| u.host_str().is_none()) {
            return Err(TemplateError::InvalidServerUrl {
                record: record.name.clone(),
                url: server_url,
            });
        }
        servers.push(Server {
            url: server_url,
            weight,
        });
    }

    let backend_name = funcs.backend_name(record);
    let mut backend = Backend::default();
    if !so_far.backends.contains_key(&backend_name) {
        funcs.decorate_backend(record, &mut backend);
    }

    let frontend_name = funcs.frontend_name(&rule);
    let mut frontend = Frontend::new(backend_name.clone());
    frontend.entry_points = funcs.entry_points(record, ctx);
    frontend.routes = BTreeMap::from([(
        format!("route-{frontend_name}"),
        Route { rule },
    )]);
    funcs.decorate_frontend(record, &mut frontend);

    Ok((backend_name, servers, frontend_name, frontend, backend))
}
