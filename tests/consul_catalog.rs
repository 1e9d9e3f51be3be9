//! Consul catalog provider against a fake Consul agent served by axum.

use std::collections::{BTreeMap, HashMap};
use std::net::SocketAddr;
use std::sync::atomic::{AtomicBool, AtomicU64, AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;

use axum::extract::{Path, State};
use axum::http::{HeaderMap, Uri};
use axum::response::{IntoResponse, Response};
use axum::routing::get;
use axum::{Json, Router};
use serde_json::{json, Value};
use tokio::sync::mpsc;
use tokio_util::sync::CancellationToken;

use signpost::provider::consul_catalog::ConsulCatalogProvider;
use signpost::provider::{Change, Provider, Source};
use signpost::safe::Pool;

#[derive(Default)]
struct FakeConsul {
    index: AtomicU64,
    services: Mutex<BTreeMap<String, Vec<String>>>,
    instances: Mutex<HashMap<String, Value>>,
    blocking_calls: AtomicUsize,
    catalog_calls: AtomicUsize,
    omit_index: AtomicBool,
    saw_token: AtomicBool,
    saw_passing: AtomicBool,
    saw_datacenter: AtomicBool,
}

impl FakeConsul {
    fn set_service(&self, name: &str, tags: &[&str], instances: Value) {
        self.services
            .lock()
            .unwrap()
            .insert(name.into(), tags.iter().map(ToString::to_string).collect());
        self.instances.lock().unwrap().insert(name.into(), instances);
        self.index.fetch_add(1, Ordering::SeqCst);
    }
}

fn query(uri: &Uri) -> HashMap<String, String> {
    url::form_urlencoded::parse(uri.query().unwrap_or("").as_bytes())
        .into_owned()
        .collect()
}

async fn catalog_services(
    State(fake): State<Arc<FakeConsul>>,
    uri: Uri,
    headers: HeaderMap,
) -> Response {
    fake.catalog_calls.fetch_add(1, Ordering::SeqCst);
    let params = query(&uri);
    if headers.get("x-consul-token").is_some_and(|v| v == "secret") {
        fake.saw_token.store(true, Ordering::SeqCst);
    }
    if params.get("dc").is_some_and(|dc| dc == "dc1") {
        fake.saw_datacenter.store(true, Ordering::SeqCst);
    }
    if let Some(waiting_on) = params.get("index").and_then(|i| i.parse::<u64>().ok()) {
        fake.blocking_calls.fetch_add(1, Ordering::SeqCst);
        if waiting_on == fake.index.load(Ordering::SeqCst) {
            // Stand-in for the agent holding the query until `wait` expires.
            tokio::time::sleep(Duration::from_millis(20)).await;
        }
    }

    let services = fake.services.lock().unwrap().clone();
    if fake.omit_index.load(Ordering::SeqCst) {
        return Json(services).into_response();
    }
    (
        [("x-consul-index", fake.index.load(Ordering::SeqCst).to_string())],
        Json(services),
    )
        .into_response()
}

async fn health_service(
    State(fake): State<Arc<FakeConsul>>,
    Path(name): Path<String>,
    uri: Uri,
) -> Json<Value> {
    if query(&uri).get("passing").is_some() {
        fake.saw_passing.store(true, Ordering::SeqCst);
    }
    Json(
        fake.instances
            .lock()
            .unwrap()
            .get(&name)
            .cloned()
            .unwrap_or_else(|| json!([])),
    )
}

async fn start_fake_consul(fake: Arc<FakeConsul>) -> SocketAddr {
    let router = Router::new()
        .route("/v1/catalog/services", get(catalog_services))
        .route("/v1/health/service/{name}", get(health_service))
        .with_state(fake);
    let listener = tokio::net::TcpListener::bind("127.0.0.1:0").await.unwrap();
    let addr = listener.local_addr().unwrap();
    tokio::spawn(async move {
        axum::serve(listener, router).await.unwrap();
    });
    addr
}

fn instance(node: &str, address: &str, port: u16) -> Value {
    json!({
        "Node": {"Node": format!("node-{node}"), "Address": node},
        "Service": {"ID": format!("web-{node}"), "Service": "web", "Address": address, "Port": port, "Tags": []},
        "Checks": [{"Status": "passing"}]
    })
}

fn seeded() -> Arc<FakeConsul> {
    let fake = Arc::new(FakeConsul::default());
    fake.set_service("consul", &[], json!([]));
    fake.set_service(
        "web",
        &["traefik.weight=3", "blue"],
        json!([instance("10.0.0.1", "", 80), instance("10.0.0.2", "192.168.1.2", 80)]),
    );
    fake.set_service(
        "db",
        &["traefik.enable=false"],
        json!([instance("10.0.0.3", "", 5432)]),
    );
    fake
}

fn provider(addr: SocketAddr) -> ConsulCatalogProvider {
    let mut provider = ConsulCatalogProvider::default();
    provider.endpoint = format!("http://{addr}");
    provider.domain = "example.com".into();
    provider.token = Some("secret".into());
    provider.datacenter = Some("dc1".into());
    provider.init(&[]).unwrap();
    provider
}

#[tokio::test]
async fn fetch_renders_catalog_services() {
    let fake = seeded();
    let addr = start_fake_consul(Arc::clone(&fake)).await;
    let provider = provider(addr);

    let mut session = provider.connect().await.unwrap();
    let configuration = provider.fetch(&mut session).await.unwrap().unwrap();

    let backend = &configuration.backends["backend-web"];
    assert_eq!(backend.servers.len(), 2);
    assert_eq!(backend.servers["server-0"].url, "http://10.0.0.1:80");
    assert_eq!(backend.servers["server-1"].url, "http://192.168.1.2:80");
    assert_eq!(backend.servers["server-0"].weight, 3);

    let frontend = &configuration.frontends["frontend-Host-web-example-com"];
    assert_eq!(frontend.backend, "backend-web");
    assert_eq!(frontend.routes.values().next().unwrap().rule, "Host:web.example.com");

    // `consul` is skipped and `db` is disabled by its tag.
    assert_eq!(configuration.backends.len(), 1);

    assert!(fake.saw_token.load(Ordering::SeqCst));
    assert!(fake.saw_passing.load(Ordering::SeqCst));
    assert!(fake.saw_datacenter.load(Ordering::SeqCst));
}

#[tokio::test]
async fn constraints_filter_on_consul_tags() {
    let fake = seeded();
    let addr = start_fake_consul(fake).await;
    let mut provider = ConsulCatalogProvider::default();
    provider.endpoint = format!("http://{addr}");
    provider.domain = "example.com".into();
    provider.base.constraints = vec!["tag==green".into()];
    provider.init(&[]).unwrap();

    let mut session = provider.connect().await.unwrap();
    let configuration = provider.fetch(&mut session).await.unwrap().unwrap();
    assert!(configuration.is_empty());
}

#[tokio::test]
async fn wait_for_change_returns_when_index_moves() {
    let fake = seeded();
    let addr = start_fake_consul(Arc::clone(&fake)).await;
    let provider = provider(addr);

    let mut session = provider.connect().await.unwrap();
    provider.fetch(&mut session).await.unwrap();

    let bump = Arc::clone(&fake);
    tokio::spawn(async move {
        tokio::time::sleep(Duration::from_millis(100)).await;
        bump.set_service("api", &[], json!([instance("10.0.0.9", "", 9000)]));
    });

    let change = tokio::time::timeout(Duration::from_secs(5), provider.wait_for_change(&mut session))
        .await
        .unwrap()
        .unwrap();
    assert_eq!(change, Change::Changed);
    // The unchanged index was re-polled at least once before the bump.
    assert!(fake.blocking_calls.load(Ordering::SeqCst) >= 2);
}

#[tokio::test]
async fn agent_without_index_header_is_not_hammered() {
    let fake = seeded();
    fake.omit_index.store(true, Ordering::SeqCst);
    let addr = start_fake_consul(Arc::clone(&fake)).await;
    let provider = provider(addr);

    let mut session = provider.connect().await.unwrap();
    provider.fetch(&mut session).await.unwrap();
    let before = fake.catalog_calls.load(Ordering::SeqCst);

    let waited =
        tokio::time::timeout(Duration::from_millis(1500), provider.wait_for_change(&mut session)).await;
    assert!(waited.is_err(), "no change should be reported");

    let issued = fake.catalog_calls.load(Ordering::SeqCst) - before;
    assert!(issued >= 1, "blocking query was never issued");
    assert!(issued <= 3, "issued {issued} catalog queries in 1.5s");
}

#[tokio::test]
async fn watching_provider_publishes_each_catalog_change() {
    let fake = seeded();
    let addr = start_fake_consul(Arc::clone(&fake)).await;
    let mut provider = provider(addr);
    provider.base.watch = true;

    let cancel = CancellationToken::new();
    let pool = Pool::new(&cancel);
    let (tx, mut rx) = mpsc::channel(4);
    Arc::new(provider).provide(tx, pool.clone()).await.unwrap();

    let first = tokio::time::timeout(Duration::from_secs(5), rx.recv())
        .await
        .unwrap()
        .unwrap();
    assert_eq!(first.provider_name, "consul_catalog");
    assert!(!first.configuration.backends.contains_key("backend-api"));

    fake.set_service("api", &[], json!([instance("10.0.0.9", "", 9000)]));

    let second = tokio::time::timeout(Duration::from_secs(5), rx.recv())
        .await
        .unwrap()
        .unwrap();
    assert_eq!(
        second.configuration.backends["backend-api"].servers["server-0"].url,
        "http://10.0.0.9:9000"
    );

    pool.stop().await;
}
