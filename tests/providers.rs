//! Integration tests for the provider side: isolation between providers,
//! channel backpressure, the template scenarios, and the file provider
//! feeding the watcher end to end.

use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use tokio::sync::mpsc;
use tokio_util::sync::CancellationToken;

use signpost::error::ProviderError;
use signpost::provider::file::FileProvider;
use signpost::provider::label;
use signpost::provider::template::{render, Endpoint, LabelFuncs, ServiceRecord, TemplateContext};
use signpost::provider::{Provider, ProviderAggregator};
use signpost::safe::Pool;
use signpost::types::{ConfigMessage, Configuration, Constraint};
use signpost::watcher::Watcher;

enum Behavior {
    /// Send one empty configuration.
    SendOnce,
    /// Panic inside the pooled routine.
    PanicInRoutine,
    /// Panic in `provide` itself.
    PanicInProvide,
    /// Send `n` configurations, counting completed sends.
    Burst(usize, Arc<AtomicUsize>),
}

struct Fake {
    name: &'static str,
    behavior: Behavior,
}

#[async_trait]
impl Provider for Fake {
    fn name(&self) -> &'static str {
        self.name
    }

    fn init(&mut self, _: &[Constraint]) -> Result<(), ProviderError> {
        Ok(())
    }

    async fn provide(
        self: Arc<Self>,
        sink: mpsc::Sender<ConfigMessage>,
        pool: Pool,
    ) -> Result<(), ProviderError> {
        match &self.behavior {
            Behavior::PanicInProvide => panic!("{} exploded while starting", self.name),
            Behavior::PanicInRoutine => {
                let name = self.name;
                pool.go("fake-panic", move |_token| async move {
                    panic!("{name} exploded while running");
                });
            }
            Behavior::SendOnce => {
                let name = self.name;
                pool.go("fake-once", move |_token| async move {
                    let _ = sink.send(ConfigMessage::new(name, Configuration::default())).await;
                });
            }
            Behavior::Burst(n, sent) => {
                let (name, n, sent) = (self.name, *n, Arc::clone(sent));
                pool.go("fake-burst", move |token| async move {
                    for i in 0..n {
                        let mut configuration = Configuration::default();
                        configuration
                            .frontends
                            .insert(format!("frontend-{i}"), signpost::types::Frontend::new("b"));
                        tokio::select! {
                            () = token.cancelled() => return,
                            r = sink.send(ConfigMessage::new(name, configuration)) => {
                                if r.is_err() {
                                    return;
                                }
                            }
                        }
                        sent.fetch_add(1, Ordering::SeqCst);
                    }
                });
            }
        }
        Ok(())
    }
}

fn fake(name: &'static str, behavior: Behavior) -> Box<dyn Provider> {
    Box::new(Fake { name, behavior })
}

#[tokio::test]
async fn panicking_providers_do_not_affect_siblings() {
    let mut aggregator = ProviderAggregator::default();
    aggregator.add_provider(fake("boom-start", Behavior::PanicInProvide)).unwrap();
    aggregator.add_provider(fake("boom-run", Behavior::PanicInRoutine)).unwrap();
    aggregator.add_provider(fake("healthy", Behavior::SendOnce)).unwrap();

    let cancel = CancellationToken::new();
    let pool = Pool::new(&cancel);
    let (tx, mut rx) = mpsc::channel(4);
    aggregator.provide(&tx, &pool);
    drop(tx);

    let msg = tokio::time::timeout(Duration::from_secs(5), rx.recv())
        .await
        .unwrap()
        .unwrap();
    assert_eq!(msg.provider_name, "healthy");

    pool.stop().await;
}

#[tokio::test]
async fn full_channel_blocks_the_sender_without_dropping() {
    let sent = Arc::new(AtomicUsize::new(0));
    let mut aggregator = ProviderAggregator::default();
    aggregator
        .add_provider(fake("burst", Behavior::Burst(5, Arc::clone(&sent))))
        .unwrap();

    let cancel = CancellationToken::new();
    let pool = Pool::new(&cancel);
    let (tx, mut rx) = mpsc::channel(1);
    aggregator.provide(&tx, &pool);
    drop(tx);

    // Consumer is paused: one message fits, the second send is parked.
    tokio::time::sleep(Duration::from_millis(100)).await;
    assert_eq!(sent.load(Ordering::SeqCst), 1);

    for i in 0..5 {
        let msg = tokio::time::timeout(Duration::from_secs(5), rx.recv())
            .await
            .unwrap()
            .unwrap();
        assert!(msg.configuration.frontends.contains_key(&format!("frontend-{i}")));
    }
    assert_eq!(sent.load(Ordering::SeqCst), 5);

    pool.stop().await;
}

#[tokio::test]
async fn cancellation_releases_a_blocked_sender() {
    let sent = Arc::new(AtomicUsize::new(0));
    let mut aggregator = ProviderAggregator::default();
    aggregator
        .add_provider(fake("burst", Behavior::Burst(5, Arc::clone(&sent))))
        .unwrap();

    let cancel = CancellationToken::new();
    let pool = Pool::new(&cancel);
    let (tx, _rx) = mpsc::channel(1);
    aggregator.provide(&tx, &pool);
    tokio::time::sleep(Duration::from_millis(50)).await;

    tokio::time::timeout(Duration::from_secs(5), pool.stop())
        .await
        .unwrap();
    assert_eq!(pool.running(), 0);
}

fn svc1(labels: &[(&str, &str)]) -> ServiceRecord {
    ServiceRecord {
        name: "svc1".into(),
        labels: labels
            .iter()
            .map(|(k, v)| ((*k).to_string(), (*v).to_string()))
            .collect(),
        endpoints: vec![Endpoint::new("10.0.0.1", None)],
        ..ServiceRecord::default()
    }
}

fn example_context() -> TemplateContext {
    TemplateContext {
        domain: "example.com".into(),
        ..TemplateContext::default()
    }
}

#[test]
fn labelled_record_renders_backend_and_frontend() {
    let out = render(&LabelFuncs, &example_context(), &[svc1(&[(label::PORT, "80")])]);
    let configuration = out.configuration;

    let backend = &configuration.backends["backend-svc1"];
    assert_eq!(backend.servers["server-0"].url, "http://10.0.0.1:80");
    assert_eq!(backend.servers["server-0"].weight, 1);

    assert_eq!(configuration.frontends.len(), 1);
    let frontend = configuration.frontends.values().next().unwrap();
    assert_eq!(frontend.backend, "backend-svc1");
    assert_eq!(
        frontend.routes.values().next().unwrap().rule,
        "Host:svc1.example.com"
    );
    assert!(out.errors.is_empty());
}

#[test]
fn disabled_record_renders_nothing() {
    let out = render(
        &LabelFuncs,
        &example_context(),
        &[svc1(&[(label::PORT, "80"), (label::ENABLE, "false")])],
    );
    assert!(out.configuration.backends.is_empty());
    assert!(out.configuration.frontends.is_empty());
}

#[test]
fn rendering_is_deterministic() {
    let records = vec![
        svc1(&[(label::PORT, "80")]),
        ServiceRecord {
            name: "api".into(),
            ..svc1(&[(label::PORT, "8080")])
        },
    ];
    let mut reversed = records.clone();
    reversed.reverse();

    let a = render(&LabelFuncs, &example_context(), &records).configuration;
    let b = render(&LabelFuncs, &example_context(), &reversed).configuration;
    assert_eq!(a, b);
    assert_eq!(
        serde_json::to_string(&a).unwrap(),
        serde_json::to_string(&b).unwrap()
    );
}

#[tokio::test]
async fn file_provider_feeds_the_watcher() {
    let dir = tempfile::tempdir().unwrap();
    let path = dir.path().join("dynamic.json");
    std::fs::write(
        &path,
        r#"{
            "backends": {"backend-svc1": {"servers": {"server-0": {"url": "http://10.0.0.1:80"}}}},
            "frontends": {"frontend-svc1": {"backend": "backend-svc1", "routes": {"r": {"rule": "Host:svc1.example.com"}}}}
        }"#,
    )
    .unwrap();

    let mut aggregator = ProviderAggregator::default();
    aggregator
        .add_provider(Box::new(FileProvider {
            filename: Some(path),
            ..FileProvider::default()
        }))
        .unwrap();

    let cancel = CancellationToken::new();
    let pool = Pool::new(&cancel);
    let (tx, rx) = mpsc::channel(8);
    let watcher = Watcher::new(vec!["https".into()], Duration::from_millis(10));
    let mut snapshots = watcher.subscribe();
    let watcher_task = tokio::spawn(watcher.run(rx, cancel.child_token()));

    aggregator.provide(&tx, &pool);
    drop(tx);

    tokio::time::timeout(Duration::from_secs(5), snapshots.changed())
        .await
        .unwrap()
        .unwrap();
    let snapshot = snapshots.borrow_and_update().clone();
    let file = &snapshot.configurations["file"];
    assert_eq!(file.frontends["frontend-svc1"].entry_points, vec!["https"]);
    assert_eq!(
        file.backends["backend-svc1"].servers["server-0"].url,
        "http://10.0.0.1:80"
    );

    pool.stop().await;
    cancel.cancel();
    watcher_task.await.unwrap();
}
