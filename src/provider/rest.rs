//! Push-style provider fed by `PUT /api/providers/rest`.
//!
//! Nothing is polled. `provide` hands the shared channel to a
//! [`RestEndpoint`], and the HTTP handler publishes every configuration
//! it successfully decodes.

use std::sync::{Arc, OnceLock};

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use tokio::sync::mpsc;

use super::{BaseProvider, Provider};
use crate::error::ProviderError;
use crate::safe::Pool;
use crate::types::{ConfigMessage, Configuration, Constraint};

pub const PROVIDER_NAME: &str = "rest";

#[derive(Debug, thiserror::Error)]
pub enum PublishError {
    #[error("rest provider is not started")]
    NotStarted,

    #[error("configuration channel is closed")]
    Closed,
}

/// The handle the HTTP layer uses to publish configurations.
#[derive(Debug, Default)]
pub struct RestEndpoint {
    sink: OnceLock<mpsc::Sender<ConfigMessage>>,
}

impl RestEndpoint {
    #[must_use]
    pub fn is_started(&self) -> bool {
        self.sink.get().is_some()
    }

    /// Send `configuration` as one [`ConfigMessage`], waiting for channel
    /// capacity if the consumer is behind.
    pub async fn publish(&self, configuration: Configuration) -> Result<(), PublishError> {
        let sink = self.sink.get().ok_or(PublishError::NotStarted)?;
        sink.send(ConfigMessage::new(PROVIDER_NAME, configuration))
            .await
            .map_err(|_| PublishError::Closed)
    }
}

#[derive(Debug, Clone, Default, Deserialize, Serialize)]
pub struct RestProvider {
    #[serde(flatten)]
    pub base: BaseProvider,

    #[serde(skip)]
    endpoint: Arc<RestEndpoint>,
}

impl RestProvider {
    #[must_use]
    pub fn endpoint(&self) -> Arc<RestEndpoint> {
        Arc::clone(&self.endpoint)
    }
}

#[async_trait]
impl Provider for RestProvider {
    fn name(&self) -> &'static str {
        PROVIDER_NAME
    }

    fn init(&mut self, constraints: &[Constraint]) -> Result<(), ProviderError> {
        self.base.init_constraints(constraints)
    }

    async fn provide(
        self: Arc<Self>,
        sink: mpsc::Sender<ConfigMessage>,
        _pool: Pool,
    ) -> Result<(), ProviderError> {
        if self.endpoint.sink.set(sink).is_err() {
            tracing::warn!(provider = PROVIDER_NAME, "provider already started");
        }
        Ok(())
    }
}
