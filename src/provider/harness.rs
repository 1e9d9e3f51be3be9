//! The connect, fetch, publish, watch loop every pulling provider runs.
//!
//! A provider describes *how* to reach its backend by implementing
//! [`Source`]; [`run`] supplies the rest:
//!
//! ```text
//! Connecting -> Fetching -> Publishing -> Idle                 (watch = false)
//!                  ^             |
//!                  +-- Watching -+                             (watch = true)
//! ```
//!
//! `Watching` either sleeps for the refresh interval ([`WatchStrategy::Poll`])
//! or blocks on [`Source::wait_for_change`] ([`WatchStrategy::LongPoll`]).
//! A source without native notifications reports [`Change::Unsupported`]
//! and the loop falls back to polling. Any error tears the session down
//! and goes back to `Connecting` through [`retry_notify`]; only
//! cancellation ends the loop.

use std::time::Duration;

use async_trait::async_trait;
use tokio::sync::mpsc;
use tokio_util::sync::CancellationToken;

use super::backoff::{retry_notify, RetryPolicy};
use super::WatchStrategy;
use crate::error::ProviderError;
use crate::safe;
use crate::types::{ConfigMessage, Configuration};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Change {
    /// Something changed (or may have); fetch again.
    Changed,
    /// The backend has no change notification.
    Unsupported,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct WatchOptions {
    pub watch: bool,
    pub strategy: WatchStrategy,
    pub interval: Duration,
}

// async_trait keeps Source usable behind Arc without spelling out the
// future types of every adapter.
#[async_trait]
pub trait Source: Send + Sync {
    /// Per-connection state, owned exclusively by one session.
    type Session: Send;

    fn provider_name(&self) -> &'static str;

    async fn connect(&self) -> Result<Self::Session, ProviderError>;

    /// Read the full current state. `Ok(None)` means this cycle produced
    /// nothing worth publishing.
    async fn fetch(
        &self,
        session: &mut Self::Session,
    ) -> Result<Option<Configuration>, ProviderError>;

    /// Block until the backend reports a change.
    async fn wait_for_change(&self, _session: &mut Self::Session) -> Result<Change, ProviderError> {
        Ok(Change::Unsupported)
    }

    /// Whether to log rendered configurations at debug level.
    fn debug_log_configuration(&self) -> bool {
        false
    }
}

enum SessionEnd {
    Stopped,
    Failed(ProviderError),
}

/// Drive `source` until `cancel` fires.
pub async fn run<S: Source>(
    source: &S,
    options: &WatchOptions,
    policy: &RetryPolicy,
    sink: &mpsc::Sender<ConfigMessage>,
    cancel: &CancellationToken,
) {
    let provider = source.provider_name();
    let started = tokio::time::Instant::now();

    retry_notify(
        policy,
        cancel,
        move || async move {
            match safe::catch(session(source, options, sink, cancel)).await {
                Ok(SessionEnd::Stopped) => Ok(()),
                Ok(SessionEnd::Failed(e)) => Err(e),
                Err(message) => Err(ProviderError::Panic { provider, message }),
            }
        },
        |err, delay| {
            tracing::error!(
                provider,
                error = %err,
                retry_in_ms = u64::try_from(delay.as_millis()).unwrap_or(u64::MAX),
                elapsed_ms = u64::try_from(started.elapsed().as_millis()).unwrap_or(u64::MAX),
                "provider connection error, retrying"
            );
        },
    )
    .await;

    tracing::debug!(provider, "provider loop stopped");
}

async fn session<S: Source>(
    source: &S,
    options: &WatchOptions,
    sink: &mpsc::Sender<ConfigMessage>,
    cancel: &CancellationToken,
) -> SessionEnd {
    let provider = source.provider_name();

    let mut conn = match source.connect().await {
        Ok(c) => c,
        Err(e) => return SessionEnd::Failed(e),
    };
    tracing::debug!(provider, "provider connected");

    let mut strategy = options.strategy;

    loop {
        match source.fetch(&mut conn).await {
            Ok(Some(configuration)) => {
                if source.debug_log_configuration() {
                    tracing::debug!(
                        provider,
                        configuration = %serde_json::to_string(&configuration).unwrap_or_default(),
                        "generated configuration"
                    );
                }
                let message = ConfigMessage::new(provider, configuration);
                tokio::select! {
                    sent = sink.send(message) => {
                        if sent.is_err() {
                            tracing::debug!(provider, "configuration channel closed");
                            return SessionEnd::Stopped;
                        }
                    }
                    () = cancel.cancelled() => return SessionEnd::Stopped,
                }
            }
            Ok(None) => tracing::debug!(provider, "no configuration to publish this cycle"),
            Err(e) => return SessionEnd::Failed(e),
        }

        if !options.watch {
            return SessionEnd::Stopped;
        }

        if strategy == WatchStrategy::LongPoll {
            let changed = tokio::select! {
                r = source.wait_for_change(&mut conn) => r,
                () = cancel.cancelled() => return SessionEnd::Stopped,
            };
            match changed {
                Ok(Change::Changed) => continue,
                Ok(Change::Unsupported) => {
                    tracing::warn!(
                        provider,
                        interval_ms = u64::try_from(options.interval.as_millis()).unwrap_or(u64::MAX),
                        "long-poll not supported, falling back to polling"
                    );
                    strategy = WatchStrategy::Poll;
                }
                Err(e) => return SessionEnd::Failed(e),
            }
        }

        tokio::select! {
            () = tokio::time::sleep(options.interval) => {}
            () = cancel.cancelled() => return SessionEnd::Stopped,
        }
    }
}

#[cfg(test)]
mod tests {
    use std::collections::VecDeque;
    use std::sync::Mutex;

    use super::*;
    use crate::types::{Backend, Server};

    fn config(url: &str) -> Configuration {
        let mut c = Configuration::default();
        let mut b = Backend::default();
        b.servers.insert(
            "server-0".into(),
            Server {
                url: url.into(),
                weight: 1,
            },
        );
        c.backends.insert("backend-test".into(), b);
        c
    }

    fn policy() -> RetryPolicy {
        RetryPolicy {
            initial_interval_ms: 100,
            multiplier: 2.0,
            randomization_factor: 0.0,
            max_interval_ms: 1_000,
            reset_after_ms: 60_000,
        }
    }

    /// Scripted source: each fetch pops the next result.
    struct Scripted {
        fetches: Mutex<VecDeque<Result<Option<Configuration>, ProviderError>>>,
        long_poll: bool,
    }

    impl Scripted {
        fn new(
            fetches: Vec<Result<Option<Configuration>, ProviderError>>,
            long_poll: bool,
        ) -> Self {
            Self {
                fetches: Mutex::new(fetches.into()),
                long_poll,
            }
        }
    }

    #[async_trait]
    impl Source for Scripted {
        type Session = ();

        fn provider_name(&self) -> &'static str {
            "scripted"
        }

        async fn connect(&self) -> Result<(), ProviderError> {
            Ok(())
        }

        async fn fetch(&self, _: &mut ()) -> Result<Option<Configuration>, ProviderError> {
            let next = self.fetches.lock().unwrap().pop_front();
            match next {
                Some(r) => r,
                None => std::future::pending().await,
            }
        }

        async fn wait_for_change(&self, _: &mut ()) -> Result<Change, ProviderError> {
            if self.long_poll {
                tokio::time::sleep(Duration::from_millis(1)).await;
                Ok(Change::Changed)
            } else {
                Ok(Change::Unsupported)
            }
        }
    }

    fn down() -> Result<Option<Configuration>, ProviderError> {
        Err(ProviderError::Io(std::io::Error::other("backend down")))
    }

    #[tokio::test(start_paused = true)]
    async fn publishes_once_without_watch() {
        let source = Scripted::new(vec![Ok(Some(config("http://a:80")))], false);
        let (tx, mut rx) = mpsc::channel(4);
        let options = WatchOptions {
            watch: false,
            strategy: WatchStrategy::Poll,
            interval: Duration::from_secs(10),
        };
        run(&source, &options, &policy(), &tx, &CancellationToken::new()).await;

        let msg = rx.try_recv().unwrap();
        assert_eq!(msg.provider_name, "scripted");
        assert_eq!(msg.configuration, config("http://a:80"));
        assert!(rx.try_recv().is_err());
    }

    #[tokio::test(start_paused = true)]
    async fn failures_route_back_through_backoff() {
        let source = Scripted::new(
            vec![down(), down(), down(), Ok(Some(config("http://ok:80")))],
            false,
        );
        let (tx, mut rx) = mpsc::channel(4);
        let options = WatchOptions {
            watch: false,
            strategy: WatchStrategy::Poll,
            interval: Duration::from_secs(10),
        };

        let before = tokio::time::Instant::now();
        run(&source, &options, &policy(), &tx, &CancellationToken::new()).await;

        // 100 + 200 + 400 ms of backoff before the fourth attempt.
        assert_eq!(before.elapsed(), Duration::from_millis(700));
        let msg = rx.try_recv().unwrap();
        assert_eq!(msg.configuration, config("http://ok:80"));
        assert!(rx.try_recv().is_err());
    }

    #[tokio::test(start_paused = true)]
    async fn empty_cycle_publishes_nothing() {
        let source = Scripted::new(vec![Ok(None)], false);
        let (tx, mut rx) = mpsc::channel(4);
        let options = WatchOptions {
            watch: false,
            strategy: WatchStrategy::Poll,
            interval: Duration::from_secs(10),
        };
        run(&source, &options, &policy(), &tx, &CancellationToken::new()).await;
        assert!(rx.try_recv().is_err());
    }

    #[tokio::test(start_paused = true)]
    async fn polling_refetches_on_interval_in_order() {
        let source = Scripted::new(
            vec![
                Ok(Some(config("http://one:80"))),
                Ok(Some(config("http://two:80"))),
                Ok(Some(config("http://three:80"))),
            ],
            false,
        );
        let (tx, mut rx) = mpsc::channel(8);
        let cancel = CancellationToken::new();
        let options = WatchOptions {
            watch: true,
            strategy: WatchStrategy::LongPoll,
            interval: Duration::from_secs(5),
        };

        let task = {
            let cancel = cancel.clone();
            tokio::spawn(async move { run(&source, &options, &policy(), &tx, &cancel).await })
        };

        for expected in ["http://one:80", "http://two:80", "http://three:80"] {
            let msg = rx.recv().await.unwrap();
            assert_eq!(msg.configuration, config(expected));
        }

        cancel.cancel();
        task.await.unwrap();
    }

    #[tokio::test(start_paused = true)]
    async fn long_poll_refetches_on_change() {
        let source = Scripted::new(
            vec![
                Ok(Some(config("http://one:80"))),
                Ok(Some(config("http://two:80"))),
            ],
            true,
        );
        let (tx, mut rx) = mpsc::channel(8);
        let cancel = CancellationToken::new();
        let options = WatchOptions {
            watch: true,
            strategy: WatchStrategy::LongPoll,
            interval: Duration::from_secs(3600),
        };

        let task = {
            let cancel = cancel.clone();
            tokio::spawn(async move { run(&source, &options, &policy(), &tx, &cancel).await })
        };

        let before = tokio::time::Instant::now();
        assert_eq!(rx.recv().await.unwrap().configuration, config("http://one:80"));
        assert_eq!(rx.recv().await.unwrap().configuration, config("http://two:80"));
        assert!(before.elapsed() < Duration::from_secs(1));

        cancel.cancel();
        task.await.unwrap();
    }

    #[tokio::test(start_paused = true)]
    async fn cancellation_unblocks_pending_send() {
        let source = Scripted::new(
            vec![
                Ok(Some(config("http://one:80"))),
                Ok(Some(config("http://two:80"))),
            ],
            true,
        );
        let (tx, mut rx) = mpsc::channel(1);
        let cancel = CancellationToken::new();
        let options = WatchOptions {
            watch: true,
            strategy: WatchStrategy::LongPoll,
            interval: Duration::from_secs(1),
        };

        let task = {
            let cancel = cancel.clone();
            tokio::spawn(async move { run(&source, &options, &policy(), &tx, &cancel).await })
        };

        // Let the first message fill the channel and the second block.
        tokio::time::sleep(Duration::from_millis(50)).await;
        cancel.cancel();
        tokio::time::timeout(Duration::from_secs(1), task)
            .await
            .unwrap()
            .unwrap();

        assert_eq!(rx.recv().await.unwrap().configuration, config("http://one:80"));
        assert!(rx.recv().await.is_none());
    }
}
