//! The single consumer of the provider channel.
//!
//! [`Watcher::run`] reads [`ConfigMessage`]s one at a time. A message equal
//! to the last one received from the same provider is dropped. Anything
//! else goes into that provider's throttle slot: a `watch` channel holding
//! only the newest pending configuration. One throttle task per provider
//! forwards the slot's value for application, then sleeps
//! `providers_throttle_ms`, so a burst collapses into at most one update
//! per period and the last value always wins.
//!
//! Application replaces the provider's whole entry in the merged
//! [`Configurations`] and publishes an immutable [`Snapshot`] for readers.

use std::collections::HashMap;
use std::sync::Arc;
use std::time::{Duration, Instant};

use tokio::sync::{mpsc, watch};
use tokio_util::sync::CancellationToken;

use crate::config::sha256_hex;
use crate::safe;
use crate::types::{ConfigMessage, Configuration, Configurations};

/// Merged state as last published.
#[derive(Debug, Clone)]
pub struct Snapshot {
    pub configurations: Configurations,
    /// SHA-256 of the JSON form of `configurations`.
    pub version: String,
    pub loaded_at: Instant,
    /// Updates applied since start.
    pub reloads: u64,
}

impl Snapshot {
    fn new(configurations: Configurations, reloads: u64) -> Self {
        let version = serde_json::to_vec(&configurations)
            .map(|bytes| sha256_hex(&bytes))
            .unwrap_or_default();
        Self {
            configurations,
            version,
            loaded_at: Instant::now(),
            reloads,
        }
    }

    #[must_use]
    pub fn frontend_count(&self) -> usize {
        self.configurations.values().map(|c| c.frontends.len()).sum()
    }

    #[must_use]
    pub fn backend_count(&self) -> usize {
        self.configurations.values().map(|c| c.backends.len()).sum()
    }
}

impl Default for Snapshot {
    fn default() -> Self {
        Self::new(Configurations::new(), 0)
    }
}

pub struct Watcher {
    default_entry_points: Vec<String>,
    throttle: Duration,
    snapshot: watch::Sender<Arc<Snapshot>>,
}

impl Watcher {
    #[must_use]
    pub fn new(default_entry_points: Vec<String>, throttle: Duration) -> Self {
        let (snapshot, _) = watch::channel(Arc::new(Snapshot::default()));
        Self {
            default_entry_points,
            throttle,
            snapshot,
        }
    }

    #[must_use]
    pub fn subscribe(&self) -> watch::Receiver<Arc<Snapshot>> {
        self.snapshot.subscribe()
    }

    /// Consume `inbound` until it closes or `cancel` fires.
    ///
    /// When every sender is gone, updates still waiting in a throttle slot
    /// are applied before returning.
    pub async fn run(self, mut inbound: mpsc::Receiver<ConfigMessage>, cancel: CancellationToken) {
        let (apply_tx, mut apply_rx) = mpsc::channel::<ConfigMessage>(16);
        let mut apply_tx = Some(apply_tx);
        let mut last: HashMap<String, Configuration> = HashMap::new();
        let mut slots: HashMap<String, watch::Sender<Option<Configuration>>> = HashMap::new();
        let mut configurations = Configurations::new();
        let mut reloads = 0u64;
        let mut open = true;

        loop {
            tokio::select! {
                biased;
                () = cancel.cancelled() => break,
                Some(msg) = apply_rx.recv() => {
                    reloads += 1;
                    self.apply(&mut configurations, reloads, msg);
                }
                received = inbound.recv(), if open => {
                    let Some(ConfigMessage { provider_name, configuration }) = received else {
                        tracing::debug!("provider channel closed, flushing pending updates");
                        open = false;
                        slots.clear();
                        apply_tx = None;
                        continue;
                    };
                    if last.get(&provider_name) == Some(&configuration) {
                        tracing::debug!(provider = %provider_name, "skipping unchanged configuration");
                        continue;
                    }
                    last.insert(provider_name.clone(), configuration.clone());

                    let Some(tx) = apply_tx.as_ref() else { continue };
                    let slot = slots.entry(provider_name.clone()).or_insert_with(|| {
                        let (slot, rx) = watch::channel(None);
                        safe::go(
                            "watcher-throttle",
                            throttle(provider_name, rx, tx.clone(), self.throttle, cancel.child_token()),
                        );
                        slot
                    });
                    slot.send_replace(Some(configuration));
                }
                else => break,
            }
        }

        tracing::debug!(reloads, "configuration watcher stopped");
    }

    fn apply(&self, configurations: &mut Configurations, reloads: u64, msg: ConfigMessage) {
        let ConfigMessage {
            provider_name,
            mut configuration,
        } = msg;

        for frontend in configuration.frontends.values_mut() {
            if frontend.entry_points.is_empty() {
                frontend.entry_points.clone_from(&self.default_entry_points);
            }
        }
        for (frontend, backend) in configuration.dangling_frontends() {
            tracing::warn!(
                provider = %provider_name,
                frontend,
                backend,
                "frontend references an unknown backend"
            );
        }

        tracing::info!(
            provider = %provider_name,
            frontends = configuration.frontends.len(),
            backends = configuration.backends.len(),
            servers = configuration.total_servers(),
            "applying configuration"
        );
        configurations.insert(provider_name, configuration);

        let snapshot = Snapshot::new(configurations.clone(), reloads);
        tracing::debug!(version = %snapshot.version, "publishing configuration snapshot");
        self.snapshot.send_replace(Arc::new(snapshot));
    }
}

/// Forward the newest value of `slot` at most once per `period`.
async fn throttle(
    provider: String,
    mut slot: watch::Receiver<Option<Configuration>>,
    out: mpsc::Sender<ConfigMessage>,
    period: Duration,
    cancel: CancellationToken,
) {
    loop {
        tokio::select! {
            () = cancel.cancelled() => return,
            changed = slot.changed() => {
                if changed.is_err() {
                    return;
                }
            }
        }

        let pending = slot.borrow_and_update().clone();
        if let Some(configuration) = pending {
            tokio::select! {
                () = cancel.cancelled() => return,
                sent = out.send(ConfigMessage::new(provider.clone(), configuration)) => {
                    if sent.is_err() {
                        return;
                    }
                }
            }
        }

        tokio::select! {
            () = cancel.cancelled() => return,
            () = tokio::time::sleep(period) => {}
        }
    }
}
