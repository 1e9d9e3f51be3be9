//! Supervised background tasks.
//!
//! [`go`] spawns a future behind a panic barrier: a panic is caught,
//! logged with the task name, and goes no further, so one misbehaving
//! provider cannot take down its siblings. [`Pool`] groups such tasks
//! under one cancellation token so shutdown can stop and join them all.

use std::any::Any;
use std::future::Future;
use std::panic::AssertUnwindSafe;
use std::sync::{Arc, Mutex, PoisonError};

use futures::FutureExt;
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;

/// Render a panic payload as text.
#[must_use]
pub fn panic_message(payload: &(dyn Any + Send)) -> String {
    if let Some(s) = payload.downcast_ref::<&str>() {
        (*s).to_string()
    } else if let Some(s) = payload.downcast_ref::<String>() {
        s.clone()
    } else {
        "unknown panic payload".to_string()
    }
}

/// Run `fut` to completion, converting a panic into `Err(message)`.
pub async fn catch<F, T>(fut: F) -> Result<T, String>
where
    F: Future<Output = T>,
{
    AssertUnwindSafe(fut)
        .catch_unwind()
        .await
        .map_err(|payload| panic_message(&*payload))
}

/// Spawn `fut` on the runtime with panic recovery.
pub fn go<F>(name: &'static str, fut: F) -> JoinHandle<()>
where
    F: Future<Output = ()> + Send + 'static,
{
    tokio::spawn(async move {
        if let Err(message) = catch(fut).await {
            tracing::error!(task = name, panic = %message, "recovered from panic in background task");
        }
    })
}

/// A set of supervised routines sharing one stop signal.
#[derive(Clone)]
pub struct Pool {
    inner: Arc<PoolInner>,
}

struct PoolInner {
    token: CancellationToken,
    handles: Mutex<Vec<JoinHandle<()>>>,
}

impl Pool {
    /// Create a pool stopped whenever `parent` is cancelled.
    #[must_use]
    pub fn new(parent: &CancellationToken) -> Self {
        Self {
            inner: Arc::new(PoolInner {
                token: parent.child_token(),
                handles: Mutex::new(Vec::new()),
            }),
        }
    }

    /// Spawn a routine. It receives a token that fires on [`Pool::stop`]
    /// and must return promptly once it does.
    pub fn go<F, Fut>(&self, name: &'static str, routine: F)
    where
        F: FnOnce(CancellationToken) -> Fut,
        Fut: Future<Output = ()> + Send + 'static,
    {
        let handle = go(name, routine(self.inner.token.child_token()));
        let mut handles = self
            .inner
            .handles
            .lock()
            .unwrap_or_else(PoisonError::into_inner);
        handles.retain(|h| !h.is_finished());
        handles.push(handle);
    }

    #[must_use]
    pub fn token(&self) -> CancellationToken {
        self.inner.token.clone()
    }

    #[must_use]
    pub fn running(&self) -> usize {
        self.inner
            .handles
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .iter()
            .filter(|h| !h.is_finished())
            .count()
    }

    /// Signal every routine to stop and wait for them to exit.
    pub async fn stop(&self) {
        self.inner.token.cancel();
        let handles = std::mem::take(
            &mut *self
                .inner
                .handles
                .lock()
                .unwrap_or_else(PoisonError::into_inner),
        );
        for handle in handles {
            if let Err(e) = handle.await {
                tracing::error!(error = %e, "pool routine failed to join");
            }
        }
    }
}
