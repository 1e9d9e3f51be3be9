//! Service discovery providers and the machinery they share.
//!
//! Every backend adapter implements [`Provider`]: `init` merges the
//! global constraints and checks the adapter's own settings, `provide`
//! schedules the adapter's work on a [`Pool`] and returns. From then on
//! an adapter only talks to the rest of the system by sending
//! [`ConfigMessage`]s on the shared channel.
//!
//! Submodules:
//!
//! - [`aggregator`] -- owns the enabled adapters and starts them.
//! - [`harness`] / [`backoff`] -- the connect, fetch, publish, watch loop
//!   with retry.
//! - [`template`] / [`label`] / [`rule`] -- turn labelled service records
//!   into a [`Configuration`](crate::types::Configuration).
//! - [`file`], [`rest`], [`consul_catalog`], [`kv`], [`dynamodb`] -- the
//!   adapters.

pub mod aggregator;
pub mod backoff;
pub mod consul_catalog;
pub mod dynamodb;
pub mod file;
pub mod harness;
pub mod kv;
pub mod label;
pub mod rest;
pub mod rule;
pub mod template;

use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use tokio::sync::mpsc;

use crate::error::ProviderError;
use backoff::RetryPolicy;
use crate::safe::Pool;
use crate::types::{constraint, ConfigMessage, Constraint};

pub use aggregator::ProviderAggregator;
pub use harness::{Change, Source, WatchOptions};

// async_trait is required here because Provider is used as Arc<dyn Provider>
// and native async fn in traits does not support dyn dispatch.
#[async_trait]
pub trait Provider: Send + Sync {
    /// Name stamped on every [`ConfigMessage`] this provider sends.
    fn name(&self) -> &'static str;

    /// Merge global `constraints` into this provider's own and validate its
    /// static settings. Called once, before [`Provider::provide`].
    fn init(&mut self, constraints: &[Constraint]) -> Result<(), ProviderError>;

    /// Arrange for all further work to happen on `pool` and return.
    async fn provide(
        self: Arc<Self>,
        sink: mpsc::Sender<ConfigMessage>,
        pool: Pool,
    ) -> Result<(), ProviderError>;
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Deserialize, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum WatchStrategy {
    /// Re-fetch on a fixed interval.
    Poll,
    /// Block on the backend's change notification, then re-fetch.
    LongPoll,
}

/// Settings every provider accepts, flattened into its config table.
#[derive(Debug, Clone, Default, PartialEq, Deserialize, Serialize)]
pub struct BaseProvider {
    #[serde(default)]
    pub watch: bool,

    /// Unset means the provider's own default strategy.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub watch_strategy: Option<WatchStrategy>,

    /// Provider-local constraint expressions (`tag==api*`).
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub constraints: Vec<String>,

    #[serde(default)]
    pub debug_log_generated_configuration: bool,

    #[serde(skip)]
    parsed: Vec<Constraint>,

    /// Set by the aggregator from `[backoff]`.
    #[serde(skip)]
    pub retry: RetryPolicy,
}

impl BaseProvider {
    /// Parse own constraints and append the global ones after them.
    pub fn init_constraints(&mut self, global: &[Constraint]) -> Result<(), ProviderError> {
        let mut parsed = constraint::parse_all(&self.constraints)?;
        parsed.extend(global.iter().cloned());
        self.parsed = parsed;
        Ok(())
    }

    #[must_use]
    pub fn constraints(&self) -> &[Constraint] {
        &self.parsed
    }

    #[must_use]
    pub fn watch_options(&self, default: WatchStrategy, interval: Duration) -> WatchOptions {
        WatchOptions {
            watch: self.watch,
            strategy: self.watch_strategy.unwrap_or(default),
            interval,
        }
    }
}

/// Reduce `name` to a routing-table-safe key: runs of letters and digits
/// joined by `-`.
#[must_use]
pub fn normalize(name: &str) -> String {
    name.split(|c: char| !c.is_alphanumeric())
        .filter(|s| !s.is_empty())
        .collect::<Vec<_>>()
        .join("-")
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn normalize_strips_unsafe_characters() {
        assert_eq!(normalize("Host:svc1.example.com"), "Host-svc1-example-com");
        assert_eq!(normalize("my_service--v2"), "my-service-v2");
        assert_eq!(normalize("/api/"), "api");
        assert_eq!(normalize("plain"), "plain");
    }

    #[test]
    fn init_constraints_appends_global() {
        let mut base = BaseProvider {
            constraints: vec!["tag==api".into()],
            ..BaseProvider::default()
        };
        let global = constraint::parse_all(&["tag!=canary"]).unwrap();
        base.init_constraints(&global).unwrap();

        let rendered: Vec<String> = base.constraints().iter().map(ToString::to_string).collect();
        assert_eq!(rendered, vec!["tag==api", "tag!=canary"]);
    }

    #[test]
    fn init_constraints_rejects_bad_expression() {
        let mut base = BaseProvider {
            constraints: vec!["nonsense".into()],
            ..BaseProvider::default()
        };
        assert!(base.init_constraints(&[]).is_err());
    }

    #[test]
    fn watch_strategy_defaults_per_provider() {
        let base = BaseProvider {
            watch: true,
            ..BaseProvider::default()
        };
        let opts = base.watch_options(WatchStrategy::LongPoll, Duration::from_secs(5));
        assert_eq!(opts.strategy, WatchStrategy::LongPoll);

        let base = BaseProvider {
            watch_strategy: Some(WatchStrategy::Poll),
            ..base
        };
        let opts = base.watch_options(WatchStrategy::LongPoll, Duration::from_secs(5));
        assert_eq!(opts.strategy, WatchStrategy::Poll);
    }
}
