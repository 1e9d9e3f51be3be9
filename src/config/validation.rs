//! Configuration validation with detailed error reporting.
//!
//! [`validate`] checks a parsed [`GlobalConfiguration`] before anything is
//! started. [`validate_dynamic`] checks a routing [`Configuration`]
//! document (what the file and REST providers accept) for broken
//! references, bad rules and malformed server URLs. Both return every
//! problem found, not just the first.

use std::net::SocketAddr;

use url::Url;

use super::model::GlobalConfiguration;
use crate::error::ValidationError;
use crate::provider::rule::{validate_rule, RuleTemplate};
use crate::types::{constraint, Configuration};

fn err(location: &str, field: &str, message: impl Into<String>) -> ValidationError {
    ValidationError {
        location: location.to_string(),
        field: field.to_string(),
        message: message.into(),
        suggestion: None,
    }
}

/// Validate a backend server URL. Returns `Ok(())` or a human-readable error.
pub fn validate_server_url(url: &str) -> Result<(), String> {
    match Url::parse(url) {
        Ok(parsed) => {
            let scheme = parsed.scheme();
            if scheme != "http" && scheme != "https" {
                Err(format!(
                    "unsupported scheme '{scheme}' (expected http or https)"
                ))
            } else if parsed.host_str().is_none() {
                Err(format!("'{url}' has no host"))
            } else {
                Ok(())
            }
        }
        Err(_) => Err(format!("'{url}' is not a valid URL")),
    }
}

fn check_refresh(location: &str, refresh_seconds: u64, errors: &mut Vec<ValidationError>) {
    if refresh_seconds == 0 {
        errors.push(err(location, "refresh_seconds", "must be greater than 0"));
    }
}

fn check_constraints(location: &str, expressions: &[String], errors: &mut Vec<ValidationError>) {
    for expression in expressions {
        if let Err(e) = constraint::parse_all(std::slice::from_ref(expression)) {
            errors.push(ValidationError {
                suggestion: Some("use 'tag==<glob>' or 'tag!=<glob>'".into()),
                ..err(location, "constraints", e.to_string())
            });
        }
    }
}

pub fn validate(config: &GlobalConfiguration) -> Result<(), Vec<ValidationError>> {
    let mut errors = Vec::new();

    if config.api.address.parse::<SocketAddr>().is_err() {
        errors.push(ValidationError {
            suggestion: Some("e.g. '0.0.0.0:8080'".into()),
            ..err(
                "api",
                "address",
                format!("'{}' is not a socket address", config.api.address),
            )
        });
    }
    if config.api.max_body == 0 {
        errors.push(err("api", "max_body", "must be greater than 0"));
    }
    if config.providers_channel_capacity == 0 {
        errors.push(err(
            "(root)",
            "providers_channel_capacity",
            "must be greater than 0",
        ));
    }
    check_constraints("(root)", &config.constraints, &mut errors);

    let backoff = &config.backoff;
    if backoff.initial_interval_ms == 0 {
        errors.push(err("backoff", "initial_interval_ms", "must be greater than 0"));
    }
    if backoff.multiplier < 1.0 {
        errors.push(err("backoff", "multiplier", "must be at least 1.0"));
    }
    if !(0.0..=1.0).contains(&backoff.randomization_factor) {
        errors.push(err(
            "backoff",
            "randomization_factor",
            "must be between 0.0 and 1.0",
        ));
    }
    if backoff.max_interval_ms < backoff.initial_interval_ms {
        errors.push(err(
            "backoff",
            "max_interval_ms",
            "must not be smaller than initial_interval_ms",
        ));
    }

    if let Some(file) = &config.file {
        if file.filename.is_none() && file.directory.is_none() {
            errors.push(ValidationError {
                suggestion: Some("set 'filename' or 'directory'".into()),
                ..err("file", "filename", "no file or directory to watch")
            });
        }
        check_refresh("file", file.refresh_seconds, &mut errors);
        check_constraints("file", &file.base.constraints, &mut errors);
    }

    if let Some(rest) = &config.rest {
        check_constraints("rest", &rest.base.constraints, &mut errors);
    }

    if let Some(consul) = &config.consul_catalog {
        if Url::parse(&consul.endpoint).is_err() {
            errors.push(ValidationError {
                suggestion: Some("e.g. 'http://127.0.0.1:8500'".into()),
                ..err(
                    "consul_catalog",
                    "endpoint",
                    format!("'{}' is not a valid URL", consul.endpoint),
                )
            });
        }
        if let Err(e) = RuleTemplate::parse(&consul.frontend_rule) {
            errors.push(err("consul_catalog", "frontend_rule", e.to_string()));
        }
        if consul.wait_seconds == 0 {
            errors.push(err("consul_catalog", "wait_seconds", "must be greater than 0"));
        }
        check_refresh("consul_catalog", consul.refresh_seconds, &mut errors);
        check_constraints("consul_catalog", &consul.base.constraints, &mut errors);
    }

    if let Some(redis) = &config.redis {
        if redis.endpoint.is_empty() {
            errors.push(err("redis", "endpoint", "cannot be empty"));
        }
        if redis.prefix.is_empty() {
            errors.push(err("redis", "prefix", "cannot be empty"));
        }
        check_refresh("redis", redis.refresh_seconds, &mut errors);
        check_constraints("redis", &redis.base.constraints, &mut errors);
    }

    if let Some(dynamodb) = &config.dynamodb {
        if dynamodb.table_name.is_empty() {
            errors.push(err("dynamodb", "table_name", "cannot be empty"));
        }
        check_refresh("dynamodb", dynamodb.refresh_seconds, &mut errors);
        check_constraints("dynamodb", &dynamodb.base.constraints, &mut errors);
    }

    if errors.is_empty() {
        Ok(())
    } else {
        Err(errors)
    }
}

/// Validate a dynamic routing document.
pub fn validate_dynamic(config: &Configuration) -> Result<(), Vec<ValidationError>> {
    let mut errors = Vec::new();

    for (name, backend) in &config.backends {
        let location = format!("backends.{name}");
        for (server_name, server) in &backend.servers {
            if let Err(msg) = validate_server_url(&server.url) {
                errors.push(err(&location, &format!("servers.{server_name}.url"), msg));
            }
            if server.weight < 0 {
                errors.push(err(
                    &location,
                    &format!("servers.{server_name}.weight"),
                    "cannot be negative",
                ));
            }
        }
    }

    for (name, frontend) in &config.frontends {
        let location = format!("frontends.{name}");
        if !config.backends.contains_key(&frontend.backend) {
            let suggestion = config
                .backends
                .keys()
                .find(|b| b.ends_with(&frontend.backend) || frontend.backend.ends_with(b.as_str()))
                .map(|b| format!("did you mean '{b}'?"));
            errors.push(ValidationError {
                suggestion,
                ..err(
                    &location,
                    "backend",
                    format!("backend '{}' is not defined", frontend.backend),
                )
            });
        }
        if frontend.routes.is_empty() {
            errors.push(err(&location, "routes", "at least one route must be defined"));
        }
        for (route_name, route) in &frontend.routes {
            if let Err(msg) = validate_rule(&route.rule) {
                errors.push(err(&location, &format!("routes.{route_name}.rule"), msg));
            }
        }
    }

    if errors.is_empty() {
        Ok(())
    } else {
        Err(errors)
    }
}

#[must_use]
pub fn format_validation_report(path: &str, config: &GlobalConfiguration) -> String {
    let providers = config.configured_providers();
    let mut lines = vec![format!(
        "  {} providers, api on {}\n",
        providers.len(),
        config.api.address
    )];
    for name in providers {
        lines.push(format!("  {name}"));
    }
    if !config.constraints.is_empty() {
        lines.push(format!("  constraints: {}", config.constraints.join(", ")));
    }
    format!("{} is valid\n{}", path, lines.join("\n"))
}

#[must_use]
pub fn format_dynamic_report(path: &str, config: &Configuration) -> String {
    let mut lines = vec![format!(
        "  {} frontends, {} backends, {} servers\n",
        config.frontends.len(),
        config.backends.len(),
        config.total_servers()
    )];
    for (name, frontend) in &config.frontends {
        let rules: Vec<&str> = frontend.routes.values().map(|r| r.rule.as_str()).collect();
        lines.push(format!("  {name}  -> {}", frontend.backend));
        lines.push(format!("    rules: {}", rules.join(", ")));
    }
    format!("{} is valid\n{}", path, lines.join("\n"))
}

#[cfg(test)]
mod tests {
    use std::collections::BTreeMap;

    use super::*;
    use crate::types::{Backend, Frontend, Route, Server};

    fn dynamic() -> Configuration {
        let mut config = Configuration::default();
        let mut backend = Backend::default();
        backend.servers.insert(
            "server-0".into(),
            Server {
                url: "http://10.0.0.1:80".into(),
                weight: 1,
            },
        );
        config.backends.insert("backend-web".into(), backend);
        let mut frontend = Frontend::new("backend-web");
        frontend.routes = BTreeMap::from([(
            "route-frontend-web".into(),
            Route {
                rule: "Host:web.example.com".into(),
            },
        )]);
        config.frontends.insert("frontend-web".into(), frontend);
        config
    }

    #[test]
    fn defaults_are_valid() {
        assert!(validate(&GlobalConfiguration::default()).is_ok());
    }

    #[test]
    fn bad_address_and_capacity_are_reported_together() {
        let mut config = GlobalConfiguration::default();
        config.api.address = "localhost".into();
        config.providers_channel_capacity = 0;
        let errors = validate(&config).unwrap_err();
        assert_eq!(errors.len(), 2);
    }

    #[test]
    fn bad_global_constraint_is_reported() {
        let config = GlobalConfiguration {
            constraints: vec!["label==x".into()],
            ..GlobalConfiguration::default()
        };
        let errors = validate(&config).unwrap_err();
        assert_eq!(errors[0].field, "constraints");
        assert!(errors[0].suggestion.is_some());
    }

    #[test]
    fn file_provider_needs_a_target() {
        let config: GlobalConfiguration = serde_json::from_str(r#"{"file": {}}"#).unwrap();
        let errors = validate(&config).unwrap_err();
        assert_eq!(errors[0].location, "file");
    }

    #[test]
    fn zero_refresh_interval_is_rejected_for_every_poller() {
        let config: GlobalConfiguration = serde_json::from_str(
            r#"{
                "file": {"filename": "dynamic.json", "refresh_seconds": 0},
                "consul_catalog": {"refresh_seconds": 0},
                "redis": {"refresh_seconds": 0},
                "dynamodb": {"table_name": "routes", "refresh_seconds": 0}
            }"#,
        )
        .unwrap();
        let errors = validate(&config).unwrap_err();
        let flagged: Vec<&str> = errors
            .iter()
            .filter(|e| e.field == "refresh_seconds")
            .map(|e| e.location.as_str())
            .collect();
        assert_eq!(flagged, vec!["file", "consul_catalog", "redis", "dynamodb"]);
    }

    #[test]
    fn valid_dynamic_document_passes() {
        assert!(validate_dynamic(&dynamic()).is_ok());
    }

    #[test]
    fn dangling_backend_is_reported_with_hint() {
        let mut config = dynamic();
        config.frontends.get_mut("frontend-web").unwrap().backend = "web".into();
        let errors = validate_dynamic(&config).unwrap_err();
        assert_eq!(errors.len(), 1);
        assert_eq!(errors[0].field, "backend");
        assert_eq!(
            errors[0].suggestion.as_deref(),
            Some("did you mean 'backend-web'?")
        );
    }

    #[test]
    fn bad_rule_and_url_are_reported() {
        let mut config = dynamic();
        config
            .backends
            .get_mut("backend-web")
            .unwrap()
            .servers
            .get_mut("server-0")
            .unwrap()
            .url = "ftp://10.0.0.1".into();
        config
            .frontends
            .get_mut("frontend-web")
            .unwrap()
            .routes
            .get_mut("route-frontend-web")
            .unwrap()
            .rule = "Hots:web".into();
        let errors = validate_dynamic(&config).unwrap_err();
        assert_eq!(errors.len(), 2);
    }
}
