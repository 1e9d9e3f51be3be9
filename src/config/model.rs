//! Serde data structures for the static configuration file.
//!
//! [`GlobalConfiguration`] is the root. Each provider section is the
//! provider itself: its settings deserialize straight into the adapter
//! type, which the aggregator clones and initializes. The root rejects
//! unknown keys; provider sections flatten the shared
//! [`BaseProvider`](crate::provider::BaseProvider) settings and so cannot.

use serde::{Deserialize, Serialize};

use crate::provider::backoff::RetryPolicy;
use crate::provider::consul_catalog::ConsulCatalogProvider;
use crate::provider::dynamodb::DynamoDbProvider;
use crate::provider::file::FileProvider;
use crate::provider::kv::KvProvider;
use crate::provider::rest::RestProvider;

fn default_entry_points() -> Vec<String> {
    vec!["http".to_string()]
}

const fn default_throttle_ms() -> u64 {
    2_000
}

const fn default_channel_capacity() -> usize {
    100
}

fn default_address() -> String {
    "0.0.0.0:8080".to_string()
}

const fn default_max_body() -> usize {
    1_048_576
}

fn is_default_api(v: &ApiConfig) -> bool {
    v.address == default_address() && v.max_body == default_max_body()
}

fn is_default_backoff(v: &RetryPolicy) -> bool {
    *v == RetryPolicy::default()
}

#[derive(Debug, Clone, Deserialize, Serialize)]
#[serde(deny_unknown_fields)]
pub struct GlobalConfiguration {
    /// Entry points given to frontends that name none.
    #[serde(default = "default_entry_points")]
    pub default_entry_points: Vec<String>,

    /// Constraints appended to every provider's own.
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub constraints: Vec<String>,

    #[serde(default = "default_throttle_ms")]
    pub providers_throttle_ms: u64,

    #[serde(default = "default_channel_capacity")]
    pub providers_channel_capacity: usize,

    #[serde(default, skip_serializing_if = "is_default_api")]
    pub api: ApiConfig,

    #[serde(default, skip_serializing_if = "is_default_backoff")]
    pub backoff: RetryPolicy,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub file: Option<FileProvider>,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub rest: Option<RestProvider>,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub consul_catalog: Option<ConsulCatalogProvider>,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub redis: Option<KvProvider>,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub dynamodb: Option<DynamoDbProvider>,
}

impl Default for GlobalConfiguration {
    fn default() -> Self {
        Self {
            default_entry_points: default_entry_points(),
            constraints: Vec::new(),
            providers_throttle_ms: default_throttle_ms(),
            providers_channel_capacity: default_channel_capacity(),
            api: ApiConfig::default(),
            backoff: RetryPolicy::default(),
            file: None,
            rest: None,
            consul_catalog: None,
            redis: None,
            dynamodb: None,
        }
    }
}

impl GlobalConfiguration {
    /// Names of the configured provider sections, in start order.
    #[must_use]
    pub fn configured_providers(&self) -> Vec<&'static str> {
        [
            ("file", self.file.is_some()),
            ("rest", self.rest.is_some()),
            ("consul_catalog", self.consul_catalog.is_some()),
            ("redis", self.redis.is_some()),
            ("dynamodb", self.dynamodb.is_some()),
        ]
        .into_iter()
        .filter_map(|(name, on)| on.then_some(name))
        .collect()
    }
}

#[derive(Debug, Clone, Deserialize, Serialize)]
#[serde(deny_unknown_fields)]
pub struct ApiConfig {
    #[serde(default = "default_address")]
    pub address: String,

    /// Largest accepted request body, in bytes.
    #[serde(default = "default_max_body")]
    pub max_body: usize,
}

impl Default for ApiConfig {
    fn default() -> Self {
        Self {
            address: default_address(),
            max_body: default_max_body(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn empty_document_uses_defaults() {
        let config: GlobalConfiguration = serde_json::from_str("{}").unwrap();
        assert_eq!(config.default_entry_points, vec!["http"]);
        assert_eq!(config.providers_throttle_ms, 2_000);
        assert_eq!(config.providers_channel_capacity, 100);
        assert_eq!(config.api.address, "0.0.0.0:8080");
        assert!(config.configured_providers().is_empty());
    }

    #[test]
    fn unknown_root_key_is_rejected() {
        let result: Result<GlobalConfiguration, _> = serde_json::from_str(r#"{"docker": {}}"#);
        assert!(result.is_err());
    }

    #[test]
    fn provider_sections_keep_field_order() {
        let config: GlobalConfiguration = serde_json::from_str(
            r#"{"dynamodb": {"table_name": "t"}, "rest": {}, "file": {"filename": "a.toml"}}"#,
        )
        .unwrap();
        assert_eq!(config.configured_providers(), vec!["file", "rest", "dynamodb"]);
    }
}
