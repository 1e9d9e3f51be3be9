//! AWS SDK client and the [`Source`]/[`Provider`] wiring for `DynamoDB`.

use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use aws_sdk_dynamodb::config::Credentials;
use aws_sdk_dynamodb::types::AttributeValue;
use aws_sdk_dynamodb::Client;
use tokio::sync::mpsc;

use super::{build_configuration, DynamoDbProvider, Item, PROVIDER_NAME};
use crate::error::ProviderError;
use crate::provider::harness::{self, Source};
use crate::provider::{Provider, WatchStrategy};
use crate::safe::Pool;
use crate::types::{ConfigMessage, Configuration, Constraint};

pub struct DynamoDbClient {
    client: Client,
    table: String,
}

impl DynamoDbClient {
    pub async fn new(provider: &DynamoDbProvider) -> Self {
        let mut loader = aws_config::defaults(aws_config::BehaviorVersion::latest())
            .region(aws_config::Region::new(provider.region.clone()));

        if let Some(endpoint) = &provider.endpoint {
            loader = loader.endpoint_url(endpoint);
        }
        if let (Some(key), Some(secret)) = (&provider.access_key_id, &provider.secret_access_key) {
            loader = loader.credentials_provider(Credentials::new(
                key.clone(),
                secret.clone(),
                None,
                None,
                "signpost",
            ));
        }

        let sdk_config = loader.load().await;
        Self {
            client: Client::new(&sdk_config),
            table: provider.table_name.clone(),
        }
    }

    /// Scan the whole table, following pagination.
    pub async fn scan_items(&self) -> Result<Vec<Item>, ProviderError> {
        let mut items = Vec::new();
        let mut start_key = None;

        loop {
            let output = self
                .client
                .scan()
                .table_name(&self.table)
                .set_exclusive_start_key(start_key)
                .send()
                .await
                .map_err(|e| ProviderError::Database {
                    backend: PROVIDER_NAME,
                    source: Box::new(e),
                })?;

            for raw in output.items.unwrap_or_default() {
                match to_item(&raw) {
                    Some(item) => items.push(item),
                    None => tracing::warn!(
                        provider = PROVIDER_NAME,
                        table = %self.table,
                        "skipping item without string 'id' and 'name' attributes"
                    ),
                }
            }

            match output.last_evaluated_key {
                Some(key) if !key.is_empty() => start_key = Some(key),
                _ => break,
            }
        }

        Ok(items)
    }
}

fn string_attr(raw: &HashMap<String, AttributeValue>, name: &str) -> Option<String> {
    raw.get(name).and_then(|v| v.as_s().ok()).cloned()
}

fn to_item(raw: &HashMap<String, AttributeValue>) -> Option<Item> {
    Some(Item {
        id: string_attr(raw, "id")?,
        name: string_attr(raw, "name")?,
        backend: string_attr(raw, "backend"),
        frontend: string_attr(raw, "frontend"),
    })
}

#[async_trait]
impl Source for DynamoDbProvider {
    type Session = DynamoDbClient;

    fn provider_name(&self) -> &'static str {
        PROVIDER_NAME
    }

    async fn connect(&self) -> Result<DynamoDbClient, ProviderError> {
        Ok(DynamoDbClient::new(self).await)
    }

    async fn fetch(&self, client: &mut DynamoDbClient) -> Result<Option<Configuration>, ProviderError> {
        let items = client.scan_items().await?;
        Ok(Some(build_configuration(&items)))
    }

    fn debug_log_configuration(&self) -> bool {
        self.base.debug_log_generated_configuration
    }
}

#[async_trait]
impl Provider for DynamoDbProvider {
    fn name(&self) -> &'static str {
        PROVIDER_NAME
    }

    fn init(&mut self, constraints: &[Constraint]) -> Result<(), ProviderError> {
        if self.table_name.is_empty() {
            return Err(ProviderError::MissingField {
                provider: PROVIDER_NAME,
                field: "table_name",
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
        pool.go("provider-dynamodb", move |token| async move {
            harness::run(&*self, &options, &self.base.retry, &sink, &token).await;
        });
        Ok(())
    }
}
