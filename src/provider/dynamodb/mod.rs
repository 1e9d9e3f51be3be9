//! Polling provider over a `DynamoDB` table.
//!
//! Every tick scans `table_name`. Each item carries an `id`, a `name` and
//! exactly one of `backend` or `frontend`: a JSON string holding a
//! [`Backend`] or [`Frontend`], stored under `name`. Items that do not fit
//! this shape are logged and skipped; the rest of the scan still renders.
//!
//! The AWS client lives in [`client`] behind the `dynamodb` feature.

#[cfg(feature = "dynamodb")]
pub mod client;

use serde::{Deserialize, Serialize};

use super::BaseProvider;
use crate::types::{Backend, Configuration, Frontend};

#[cfg(feature = "dynamodb")]
pub(crate) const PROVIDER_NAME: &str = "dynamodb";

fn default_region() -> String {
    "us-east-1".to_string()
}

const fn default_refresh_seconds() -> u64 {
    15
}

#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct DynamoDbProvider {
    #[serde(flatten)]
    pub base: BaseProvider,

    #[serde(default)]
    pub table_name: String,

    #[serde(default = "default_region")]
    pub region: String,

    /// Override for local `DynamoDB` (`http://localhost:8000`).
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub endpoint: Option<String>,

    /// Static credentials; the default AWS chain is used when unset.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub access_key_id: Option<String>,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub secret_access_key: Option<String>,

    #[serde(default = "default_refresh_seconds")]
    pub refresh_seconds: u64,
}

impl Default for DynamoDbProvider {
    fn default() -> Self {
        Self {
            base: BaseProvider::default(),
            table_name: String::new(),
            region: default_region(),
            endpoint: None,
            access_key_id: None,
            secret_access_key: None,
            refresh_seconds: default_refresh_seconds(),
        }
    }
}

/// One table row, attributes already extracted as strings.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct Item {
    pub id: String,
    pub name: String,
    pub backend: Option<String>,
    pub frontend: Option<String>,
}

/// Fold scanned items into a configuration, skipping malformed ones.
#[must_use]
pub fn build_configuration(items: &[Item]) -> Configuration {
    let mut configuration = Configuration::default();

    for item in items {
        match (&item.backend, &item.frontend) {
            (Some(json), None) => match serde_json::from_str::<Backend>(json) {
                Ok(backend) => {
                    configuration.backends.insert(item.name.clone(), backend);
                }
                Err(e) => {
                    tracing::warn!(provider = "dynamodb", id = %item.id, error = %e, "skipping item with malformed backend");
                }
            },
            (None, Some(json)) => match serde_json::from_str::<Frontend>(json) {
                Ok(frontend) => {
                    configuration.frontends.insert(item.name.clone(), frontend);
                }
                Err(e) => {
                    tracing::warn!(provider = "dynamodb", id = %item.id, error = %e, "skipping item with malformed frontend");
                }
            },
            _ => {
                tracing::warn!(
                    provider = "dynamodb",
                    id = %item.id,
                    "skipping item: expected exactly one of 'backend' or 'frontend'"
                );
            }
        }
    }

    configuration
}

#[cfg(test)]
mod tests {
    use super::*;

    fn item(id: &str, name: &str, backend: Option<&str>, frontend: Option<&str>) -> Item {
        Item {
            id: id.into(),
            name: name.into(),
            backend: backend.map(Into::into),
            frontend: frontend.map(Into::into),
        }
    }

    #[test]
    fn builds_backends_and_frontends() {
        let items = vec![
            item(
                "1",
                "backend-api",
                Some(r#"{"servers": {"server-0": {"url": "http://10.0.0.1:80", "weight": 2}}}"#),
                None,
            ),
            item(
                "2",
                "frontend-api",
                None,
                Some(r#"{"backend": "backend-api", "routes": {"r": {"rule": "Host:api.example.com"}}}"#),
            ),
        ];
        let config = build_configuration(&items);
        assert_eq!(config.backends["backend-api"].servers["server-0"].weight, 2);
        assert_eq!(config.frontends["frontend-api"].backend, "backend-api");
    }

    #[test]
    fn malformed_items_are_skipped() {
        let items = vec![
            item("1", "broken", Some("{"), None),
            item("2", "both", Some("{}"), Some("{}")),
            item("3", "neither", None, None),
            item("4", "backend-ok", Some("{}"), None),
        ];
        let config = build_configuration(&items);
        assert_eq!(config.backends.keys().collect::<Vec<_>>(), vec!["backend-ok"]);
        assert!(config.frontends.is_empty());
    }
}
