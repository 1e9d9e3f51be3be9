//! Redis-backed [`KvStore`].
//!
//! Keys are plain strings (`traefik/backends/...`) holding string values.
//! A listing is a cursor `SCAN MATCH <prefix>*` followed by one `MGET` per
//! batch over a multiplexed Tokio connection. The connection is opened on
//! first use and dropped after any error, so the next poll reconnects.

use std::fmt;

use async_trait::async_trait;
use redis::AsyncCommands;
use tokio::sync::Mutex;

use super::{KvPair, KvStore};
use crate::error::ProviderError;

const SCAN_COUNT: usize = 200;

pub struct RedisStore {
    client: redis::Client,
    connection: Mutex<Option<redis::aio::MultiplexedConnection>>,
}

impl fmt::Debug for RedisStore {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("RedisStore")
            .field("client", &self.client)
            .finish_non_exhaustive()
    }
}

fn db_error(e: redis::RedisError) -> ProviderError {
    ProviderError::Database {
        backend: "redis",
        source: Box::new(e),
    }
}

impl RedisStore {
    /// Validate `url`; no connection is made until the first listing.
    pub fn open(url: &str) -> Result<Self, ProviderError> {
        let client = redis::Client::open(url).map_err(|e| ProviderError::Connection {
            provider: "redis",
            source: Box::new(e),
        })?;
        Ok(Self {
            client,
            connection: Mutex::new(None),
        })
    }

    async fn scan(
        conn: &mut redis::aio::MultiplexedConnection,
        prefix: &str,
    ) -> Result<Vec<KvPair>, redis::RedisError> {
        let pattern = format!("{prefix}*");
        let mut cursor: u64 = 0;
        let mut pairs = Vec::new();

        loop {
            let (next, keys): (u64, Vec<String>) = redis::cmd("SCAN")
                .arg(cursor)
                .arg("MATCH")
                .arg(&pattern)
                .arg("COUNT")
                .arg(SCAN_COUNT)
                .query_async(conn)
                .await?;

            if !keys.is_empty() {
                let values: Vec<Option<String>> = conn.mget(&keys).await?;
                pairs.extend(
                    keys.into_iter()
                        .zip(values)
                        .filter_map(|(key, value)| Some(KvPair { key, value: value? })),
                );
            }

            if next == 0 {
                break;
            }
            cursor = next;
        }

        pairs.sort_by(|a, b| a.key.cmp(&b.key));
        pairs.dedup_by(|a, b| a.key == b.key);
        Ok(pairs)
    }
}

#[async_trait]
impl KvStore for RedisStore {
    #[allow(clippy::significant_drop_tightening)]
    async fn list(&self, prefix: &str) -> Result<Vec<KvPair>, ProviderError> {
        let mut guard = self.connection.lock().await;

        let mut conn = match guard.take() {
            Some(conn) => conn,
            None => self
                .client
                .get_multiplexed_async_connection()
                .await
                .map_err(db_error)?,
        };

        let pairs = Self::scan(&mut conn, prefix).await.map_err(db_error)?;
        *guard = Some(conn);
        Ok(pairs)
    }
}
