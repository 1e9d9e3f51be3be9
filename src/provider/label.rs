//! The `traefik.*` label convention.
//!
//! Operators annotate services with a flat string map; these accessors
//! turn it into typed values. Each accessor documents the default it
//! returns when its label is absent. Malformed values fall back to the
//! default as well (and are logged at debug), so one bad label never
//! hides a whole service.

use std::collections::BTreeMap;
use std::str::FromStr;

use crate::types::{CircuitBreaker, HealthCheck, LoadBalancer, MaxConn, Redirect, Stickiness};

pub type Labels = BTreeMap<String, String>;

pub const PREFIX: &str = "traefik";

pub const ENABLE: &str = "traefik.enable";
pub const PORT: &str = "traefik.port";
pub const PROTOCOL: &str = "traefik.protocol";
pub const WEIGHT: &str = "traefik.weight";
pub const DOMAIN: &str = "traefik.domain";
pub const TAGS: &str = "traefik.tags";

pub const BACKEND: &str = "traefik.backend";
pub const BACKEND_HEALTHCHECK_PATH: &str = "traefik.backend.healthcheck.path";
pub const BACKEND_HEALTHCHECK_PORT: &str = "traefik.backend.healthcheck.port";
pub const BACKEND_HEALTHCHECK_INTERVAL: &str = "traefik.backend.healthcheck.interval";
pub const BACKEND_CIRCUITBREAKER_EXPRESSION: &str = "traefik.backend.circuitbreaker.expression";
pub const BACKEND_LOADBALANCER_METHOD: &str = "traefik.backend.loadbalancer.method";
pub const BACKEND_LOADBALANCER_STICKINESS: &str = "traefik.backend.loadbalancer.stickiness";
pub const BACKEND_LOADBALANCER_STICKINESS_COOKIE_NAME: &str =
    "traefik.backend.loadbalancer.stickiness.cookieName";
pub const BACKEND_MAXCONN_AMOUNT: &str = "traefik.backend.maxconn.amount";
pub const BACKEND_MAXCONN_EXTRACTORFUNC: &str = "traefik.backend.maxconn.extractorfunc";

pub const FRONTEND_RULE: &str = "traefik.frontend.rule";
pub const FRONTEND_ENTRY_POINTS: &str = "traefik.frontend.entryPoints";
pub const FRONTEND_PASS_HOST_HEADER: &str = "traefik.frontend.passHostHeader";
pub const FRONTEND_PRIORITY: &str = "traefik.frontend.priority";
pub const FRONTEND_AUTH_BASIC: &str = "traefik.frontend.auth.basic";
pub const FRONTEND_WHITELIST_SOURCE_RANGE: &str = "traefik.frontend.whitelistSourceRange";
pub const FRONTEND_REDIRECT_ENTRY_POINT: &str = "traefik.frontend.redirect.entryPoint";
pub const FRONTEND_REDIRECT_REGEX: &str = "traefik.frontend.redirect.regex";
pub const FRONTEND_REDIRECT_REPLACEMENT: &str = "traefik.frontend.redirect.replacement";
pub const FRONTEND_REDIRECT_PERMANENT: &str = "traefik.frontend.redirect.permanent";

pub const DEFAULT_PROTOCOL: &str = "http";
pub const DEFAULT_WEIGHT: i32 = 1;
pub const DEFAULT_PASS_HOST_HEADER: bool = true;
pub const DEFAULT_PRIORITY: i32 = 0;
pub const DEFAULT_HEALTHCHECK_INTERVAL: &str = "30s";
pub const DEFAULT_LOADBALANCER_METHOD: &str = "wrr";
pub const DEFAULT_MAXCONN_EXTRACTORFUNC: &str = "request.host";

fn non_empty<'a>(labels: &'a Labels, key: &str) -> Option<&'a str> {
    labels
        .get(key)
        .map(|v| v.trim())
        .filter(|v| !v.is_empty())
}

#[must_use]
pub fn has(labels: &Labels, key: &str) -> bool {
    non_empty(labels, key).is_some()
}

#[must_use]
pub fn get_string(labels: &Labels, key: &str, default: &str) -> String {
    non_empty(labels, key).unwrap_or(default).to_string()
}

/// Parse a label into `T`, falling back to `default` when absent or invalid.
#[must_use]
pub fn get_parsed<T: FromStr + Copy>(labels: &Labels, key: &str, default: T) -> T {
    match non_empty(labels, key) {
        None => default,
        Some(raw) => raw.parse().unwrap_or_else(|_| {
            tracing::debug!(label = key, value = raw, "unable to parse label value, using default");
            default
        }),
    }
}

/// Boolean label accepting `1`/`t`/`true` and `0`/`f`/`false` in any case.
#[must_use]
pub fn get_bool(labels: &Labels, key: &str, default: bool) -> bool {
    let Some(raw) = non_empty(labels, key) else {
        return default;
    };
    match raw.trim().to_ascii_lowercase().as_str() {
        "1" | "t" | "true" => true,
        "0" | "f" | "false" => false,
        _ => {
            tracing::debug!(label = key, value = raw, "unable to parse label value, using default");
            default
        }
    }
}

/// Comma-separated list, trimmed, empty items dropped.
#[must_use]
pub fn get_slice(labels: &Labels, key: &str) -> Vec<String> {
    non_empty(labels, key)
        .map(split_and_trim)
        .unwrap_or_default()
}

#[must_use]
pub fn split_and_trim(value: &str) -> Vec<String> {
    value
        .split(',')
        .map(str::trim)
        .filter(|s| !s.is_empty())
        .map(String::from)
        .collect()
}

/// `traefik.enable`; absent means `exposed_by_default`.
#[must_use]
pub fn is_enabled(labels: &Labels, exposed_by_default: bool) -> bool {
    get_bool(labels, ENABLE, exposed_by_default)
}

/// `traefik.port`; `None` when absent or not a valid port.
#[must_use]
pub fn get_port(labels: &Labels) -> Option<u16> {
    non_empty(labels, PORT).and_then(|raw| match raw.parse::<u16>() {
        Ok(0) | Err(_) => {
            tracing::debug!(label = PORT, value = raw, "ignoring invalid port label");
            None
        }
        Ok(port) => Some(port),
    })
}

/// `traefik.protocol`, default `http`.
#[must_use]
pub fn get_protocol(labels: &Labels) -> String {
    get_string(labels, PROTOCOL, DEFAULT_PROTOCOL)
}

/// `traefik.weight`, default 1.
#[must_use]
pub fn get_weight(labels: &Labels) -> i32 {
    get_parsed(labels, WEIGHT, DEFAULT_WEIGHT)
}

/// `traefik.domain`, default the provider's domain.
#[must_use]
pub fn get_domain(labels: &Labels, default: &str) -> String {
    get_string(labels, DOMAIN, default)
}

/// `traefik.backend`: explicit backend name override.
#[must_use]
pub fn get_backend_name(labels: &Labels) -> Option<String> {
    non_empty(labels, BACKEND).map(String::from)
}

/// `traefik.tags`: extra constraint tags.
#[must_use]
pub fn get_tags(labels: &Labels) -> Vec<String> {
    get_slice(labels, TAGS)
}

/// `traefik.frontend.rule`: explicit rule override.
#[must_use]
pub fn get_frontend_rule(labels: &Labels) -> Option<String> {
    non_empty(labels, FRONTEND_RULE).map(String::from)
}

/// `traefik.frontend.entryPoints`, default `defaults`.
#[must_use]
pub fn get_entry_points(labels: &Labels, defaults: &[String]) -> Vec<String> {
    let explicit = get_slice(labels, FRONTEND_ENTRY_POINTS);
    if explicit.is_empty() {
        defaults.to_vec()
    } else {
        explicit
    }
}

/// `traefik.frontend.passHostHeader`, default true.
#[must_use]
pub fn get_pass_host_header(labels: &Labels) -> bool {
    get_bool(labels, FRONTEND_PASS_HOST_HEADER, DEFAULT_PASS_HOST_HEADER)
}

/// `traefik.frontend.priority`, default 0.
#[must_use]
pub fn get_priority(labels: &Labels) -> i32 {
    get_parsed(labels, FRONTEND_PRIORITY, DEFAULT_PRIORITY)
}

/// `traefik.frontend.auth.basic`: `user:hash` list.
#[must_use]
pub fn get_basic_auth(labels: &Labels) -> Vec<String> {
    get_slice(labels, FRONTEND_AUTH_BASIC)
}

/// `traefik.frontend.whitelistSourceRange`: CIDR list.
#[must_use]
pub fn get_whitelist_source_range(labels: &Labels) -> Vec<String> {
    get_slice(labels, FRONTEND_WHITELIST_SOURCE_RANGE)
}

/// `traefik.frontend.redirect.*`. An entry point wins over a regex pair;
/// a regex without its replacement is ignored.
#[must_use]
pub fn get_redirect(labels: &Labels) -> Option<Redirect> {
    let permanent = get_bool(labels, FRONTEND_REDIRECT_PERMANENT, false);

    if let Some(entry_point) = non_empty(labels, FRONTEND_REDIRECT_ENTRY_POINT) {
        return Some(Redirect {
            entry_point: entry_point.to_string(),
            permanent,
            ..Redirect::default()
        });
    }

    match (
        non_empty(labels, FRONTEND_REDIRECT_REGEX),
        non_empty(labels, FRONTEND_REDIRECT_REPLACEMENT),
    ) {
        (Some(regex), Some(replacement)) => Some(Redirect {
            regex: regex.to_string(),
            replacement: replacement.to_string(),
            permanent,
            ..Redirect::default()
        }),
        _ => None,
    }
}

/// `traefik.backend.healthcheck.*`; present when a path is set.
#[must_use]
pub fn get_health_check(labels: &Labels) -> Option<HealthCheck> {
    let path = non_empty(labels, BACKEND_HEALTHCHECK_PATH)?;
    Some(HealthCheck {
        path: path.to_string(),
        port: non_empty(labels, BACKEND_HEALTHCHECK_PORT).and_then(|p| p.parse().ok()),
        interval: get_string(labels, BACKEND_HEALTHCHECK_INTERVAL, DEFAULT_HEALTHCHECK_INTERVAL),
    })
}

/// `traefik.backend.circuitbreaker.expression`.
#[must_use]
pub fn get_circuit_breaker(labels: &Labels) -> Option<CircuitBreaker> {
    non_empty(labels, BACKEND_CIRCUITBREAKER_EXPRESSION).map(|expression| CircuitBreaker {
        expression: expression.to_string(),
    })
}

/// `traefik.backend.loadbalancer.*`; present when any of its labels is.
#[must_use]
pub fn get_load_balancer(labels: &Labels) -> Option<LoadBalancer> {
    let sticky = get_bool(labels, BACKEND_LOADBALANCER_STICKINESS, false)
        || has(labels, BACKEND_LOADBALANCER_STICKINESS_COOKIE_NAME);
    if !has(labels, BACKEND_LOADBALANCER_METHOD) && !sticky {
        return None;
    }

    Some(LoadBalancer {
        method: get_string(labels, BACKEND_LOADBALANCER_METHOD, DEFAULT_LOADBALANCER_METHOD),
        stickiness: sticky.then(|| Stickiness {
            cookie_name: get_string(labels, BACKEND_LOADBALANCER_STICKINESS_COOKIE_NAME, ""),
        }),
    })
}

/// `traefik.backend.maxconn.*`; present when a positive amount is set.
#[must_use]
pub fn get_max_conn(labels: &Labels) -> Option<MaxConn> {
    let amount: i64 = get_parsed(labels, BACKEND_MAXCONN_AMOUNT, 0);
    (amount > 0).then(|| MaxConn {
        amount,
        extractor_func: get_string(
            labels,
            BACKEND_MAXCONN_EXTRACTORFUNC,
            DEFAULT_MAXCONN_EXTRACTORFUNC,
        ),
    })
}
