//! `signpost run`: start the providers, the watcher and the API.
//!
//! Loads the static configuration, applies CLI overrides, builds the
//! provider set, and wires everything to one cancellation root: providers
//! feed the bounded channel, the watcher consumes it and publishes
//! snapshots, and the Axum server reads them. Ctrl+C / SIGTERM stops the
//! server, then the provider pool, then the watcher.

use std::net::SocketAddr;
use std::sync::Arc;
use std::time::{Duration, Instant};

use tokio::sync::mpsc;
use tokio_util::sync::CancellationToken;

use crate::cli::RunArgs;
use crate::config;
use crate::error::SignpostError;
use crate::logging;
use crate::provider::ProviderAggregator;
use crate::safe::{self, Pool};
use crate::server::{self, AppState};
use crate::watcher::Watcher;

pub async fn execute(args: RunArgs) -> Result<(), SignpostError> {
    let log_format = logging::resolve_format(args.pretty, args.json);
    logging::init(&args.log_level, log_format);

    let path = config::resolve_config_file(args.config.as_deref()).await?;
    let mut global = config::load(&path).await?;
    tracing::info!(path = %path.display(), "configuration loaded");

    if let Some(address) = args.address {
        global.api.address = address;
    }
    if let Some(ms) = args.throttle_ms {
        global.providers_throttle_ms = ms;
    }
    let addr: SocketAddr = global.api.address.parse()?;

    let (aggregator, rest) = ProviderAggregator::from_global(&global, &global.backoff)?;
    if aggregator.is_empty() {
        tracing::warn!("no provider enabled, serving an empty configuration");
    }

    let listener = tokio::net::TcpListener::bind(addr).await?;

    let root = CancellationToken::new();
    let pool = Pool::new(&root);
    let (sink, inbound) = mpsc::channel(global.providers_channel_capacity);

    let watcher = Watcher::new(
        global.default_entry_points.clone(),
        Duration::from_millis(global.providers_throttle_ms),
    );
    let snapshot = watcher.subscribe();
    let watcher_handle = safe::go("watcher", watcher.run(inbound, root.child_token()));

    aggregator.provide(&sink, &pool);
    // Providers hold their own clones; the watcher sees the channel close
    // once all of them are gone.
    drop(sink);

    let state = Arc::new(AppState {
        snapshot,
        rest,
        start_time: Instant::now(),
        providers: aggregator.names(),
    });
    let router = server::build_router(state, global.api.max_body);

    tracing::info!(
        addr = %addr,
        providers = ?aggregator.names(),
        throttle_ms = global.providers_throttle_ms,
        "signpost started"
    );

    let shutdown = root.clone();
    axum::serve(listener, router)
        .with_graceful_shutdown(async move {
            tokio::select! {
                () = server::shutdown_signal() => {}
                () = shutdown.cancelled() => {}
            }
        })
        .await?;

    pool.stop().await;
    root.cancel();
    if let Err(e) = watcher_handle.await {
        tracing::error!(error = %e, "watcher task failed");
    }

    tracing::info!("signpost stopped");
    Ok(())
}
