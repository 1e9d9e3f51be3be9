//! Owns the enabled providers and starts them.
//!
//! The active set is built once, before any provider runs, and is
//! read-only afterwards. A provider whose `init` fails is never added;
//! a provider whose `provide` fails or panics is logged and forgotten.

use std::sync::Arc;

use tokio::sync::mpsc;

use super::backoff::RetryPolicy;
use super::rest::RestEndpoint;
use super::Provider;
use crate::config::model::GlobalConfiguration;
use crate::error::ProviderError;
use crate::safe::{self, Pool};
use crate::types::{constraint, ConfigMessage, Constraint};

#[derive(Default)]
pub struct ProviderAggregator {
    providers: Vec<Arc<dyn Provider>>,
    constraints: Vec<Constraint>,
}

impl ProviderAggregator {
    #[must_use]
    pub fn new(constraints: Vec<Constraint>) -> Self {
        Self {
            providers: Vec::new(),
            constraints,
        }
    }

    /// Build the active set from the static configuration.
    ///
    /// Providers are added in field order: file, rest, consul_catalog,
    /// redis, dynamodb. Only an unparseable global constraint is fatal;
    /// each provider's own `init` failure is logged and that provider is
    /// skipped. Returns the REST endpoint when the rest provider is active.
    pub fn from_global(
        global: &GlobalConfiguration,
        policy: &RetryPolicy,
    ) -> Result<(Self, Option<Arc<RestEndpoint>>), ProviderError> {
        let mut aggregator = Self::new(constraint::parse_all(&global.constraints)?);
        let mut rest_endpoint = None;

        if let Some(file) = &global.file {
            let mut p = file.clone();
            p.base.retry = policy.clone();
            aggregator.quiet_add_provider(Box::new(p));
        }

        if let Some(rest) = &global.rest {
            let endpoint = rest.endpoint();
            if aggregator.quiet_add_provider(Box::new(rest.clone())) {
                rest_endpoint = Some(endpoint);
            }
        }

        if let Some(consul) = &global.consul_catalog {
            let mut p = consul.clone();
            p.base.retry = policy.clone();
            aggregator.quiet_add_provider(Box::new(p));
        }

        if let Some(redis) = &global.redis {
            #[cfg(feature = "redis")]
            {
                let mut p = redis.clone();
                p.base.retry = policy.clone();
                match super::kv::redis_store::RedisStore::open(&p.endpoint) {
                    Ok(store) => {
                        aggregator
                            .quiet_add_provider(Box::new(p.with_store(Arc::new(store))));
                    }
                    Err(e) => {
                        tracing::error!(provider = "redis", error = %e, "error initializing provider");
                    }
                }
            }
            #[cfg(not(feature = "redis"))]
            {
                let _ = redis;
                tracing::warn!(
                    provider = "redis",
                    "provider configured but the 'redis' feature is not compiled in, skipping"
                );
            }
        }

        if let Some(dynamodb) = &global.dynamodb {
            #[cfg(feature = "dynamodb")]
            {
                let mut p = dynamodb.clone();
                p.base.retry = policy.clone();
                aggregator.quiet_add_provider(Box::new(p));
            }
            #[cfg(not(feature = "dynamodb"))]
            {
                let _ = dynamodb;
                tracing::warn!(
                    provider = "dynamodb",
                    "provider configured but the 'dynamodb' feature is not compiled in, skipping"
                );
            }
        }

        Ok((aggregator, rest_endpoint))
    }

    /// Initialize `provider` with the global constraints and activate it.
    pub fn add_provider(&mut self, mut provider: Box<dyn Provider>) -> Result<(), ProviderError> {
        provider.init(&self.constraints)?;
        self.providers.push(Arc::from(provider));
        Ok(())
    }

    /// [`add_provider`](Self::add_provider), logging instead of returning
    /// the error. Returns whether the provider was activated.
    pub fn quiet_add_provider(&mut self, provider: Box<dyn Provider>) -> bool {
        let name = provider.name();
        match self.add_provider(provider) {
            Ok(()) => {
                tracing::info!(provider = name, "provider enabled");
                true
            }
            Err(e) => {
                tracing::error!(provider = name, error = %e, "error initializing provider");
                false
            }
        }
    }

    /// Start every active provider on its own supervised task.
    pub fn provide(&self, sink: &mpsc::Sender<ConfigMessage>, pool: &Pool) {
        for provider in &self.providers {
            let provider = Arc::clone(provider);
            let name = provider.name();
            let sink = sink.clone();
            let pool = pool.clone();
            tracing::info!(provider = name, "starting provider");
            safe::go(name, async move {
                if let Err(e) = provider.provide(sink, pool).await {
                    tracing::error!(provider = name, error = %e, "error starting provider");
                }
            });
        }
    }

    #[must_use]
    pub fn names(&self) -> Vec<&'static str> {
        self.providers.iter().map(|p| p.name()).collect()
    }

    #[must_use]
    pub fn len(&self) -> usize {
        self.providers.len()
    }

    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.providers.is_empty()
    }
}
