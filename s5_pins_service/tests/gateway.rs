use axum::Router;
use axum::extract::Path;
use axum::http::StatusCode;
use axum::routing::get;
use s5_pins_core::{Cid, ContentPins, Datastore, PinLedger};
use s5_pins_service::gateway::GatewayPins;
use s5_pins_store_memory::MemoryDatastore;
use std::sync::Arc;
use std::time::{Duration, Instant};
use tokio::net::TcpListener;
use tokio_util::sync::CancellationToken;

const HELLO: &str = "bafkreibm6jg3ux5qumhcn2b3flc3tyu6dmlb4xa7u5bf44yegnrjhc4yeq";
const SLOW: &str = "bafkreicin2sgejgrxnh3nahtj56jvwlkr4sozcf6opvi4wtmmuta5hfyu4";
const MISSING: &str = "bafkqabaaaebag";

async fn serve_car(Path(cid): Path<String>) -> Result<Vec<u8>, StatusCode> {
    match cid.as_str() {
        HELLO => Ok(b"car:hello".to_vec()),
        SLOW => {
            tokio::time::sleep(Duration::from_secs(30)).await;
            Ok(b"car:slow".to_vec())
        }
        _ => Err(StatusCode::NOT_FOUND),
    }
}

async fn gateway() -> String {
    let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
    let addr = listener.local_addr().unwrap();
    let app = Router::new().route("/ipfs/{cid}", get(serve_car));
    tokio::spawn(async move {
        axum::serve(listener, app).await.unwrap();
    });
    format!("http://{addr}/")
}

fn pins(gateway: String, dir: &tempfile::TempDir) -> GatewayPins {
    GatewayPins::create(
        gateway,
        dir.path().join("blobs"),
        Arc::new(MemoryDatastore::new()),
        "local-pins",
        Duration::from_secs(60),
    )
    .unwrap()
}

fn leftover_tmp_files(dir: &tempfile::TempDir) -> usize {
    std::fs::read_dir(dir.path().join("blobs"))
        .unwrap()
        .filter_map(Result::ok)
        .filter(|e| e.file_name().to_string_lossy().ends_with(".tmp"))
        .count()
}

#[tokio::test]
async fn fetch_count_and_remove() {
    let dir = tempfile::tempdir().unwrap();
    let pins = pins(gateway().await, &dir);
    let cid = Cid::parse(HELLO).unwrap();

    assert!(pins.get(&cid).await.unwrap().is_none());
    assert!(pins.set_ref_count(&cid, 2).await.is_err());

    pins.add(&cid, 1, &CancellationToken::new()).await.unwrap();
    assert_eq!(std::fs::read(pins.blob_path(&cid)).unwrap(), b"car:hello");
    assert_eq!(pins.get(&cid).await.unwrap().unwrap().ref_count, 1);

    pins.set_ref_count(&cid, 3).await.unwrap();
    assert_eq!(pins.get(&cid).await.unwrap().unwrap().ref_count, 3);

    pins.rm(&cid).await.unwrap();
    assert!(!pins.blob_path(&cid).exists());
    assert!(pins.get(&cid).await.unwrap().is_none());
    pins.rm(&cid).await.unwrap();
}

#[tokio::test]
async fn missing_content_fails_cleanly() {
    let dir = tempfile::tempdir().unwrap();
    let pins = pins(gateway().await, &dir);
    let cid = Cid::parse(MISSING).unwrap();

    let err = pins.add(&cid, 1, &CancellationToken::new()).await.unwrap_err();
    assert!(err.to_string().contains("404"), "{err}");
    assert!(pins.get(&cid).await.unwrap().is_none());
    assert_eq!(leftover_tmp_files(&dir), 0);
}

#[tokio::test]
async fn cancel_aborts_download() {
    let dir = tempfile::tempdir().unwrap();
    let pins = pins(gateway().await, &dir);
    let cid = Cid::parse(SLOW).unwrap();

    let cancel = CancellationToken::new();
    let trigger = cancel.clone();
    tokio::spawn(async move {
        tokio::time::sleep(Duration::from_millis(100)).await;
        trigger.cancel();
    });

    let started = Instant::now();
    assert!(pins.add(&cid, 1, &cancel).await.is_err());
    assert!(started.elapsed() < Duration::from_secs(10));
    assert!(pins.get(&cid).await.unwrap().is_none());
    assert!(!pins.blob_path(&cid).exists());
    assert_eq!(leftover_tmp_files(&dir), 0);
}

#[tokio::test]
async fn index_stays_out_of_the_ledger() {
    let dir = tempfile::tempdir().unwrap();
    let datastore = Arc::new(MemoryDatastore::new());
    let pins = GatewayPins::create(
        gateway().await,
        dir.path().join("blobs"),
        datastore.clone(),
        "content-index",
        Duration::from_secs(60),
    )
    .unwrap();
    let cid = Cid::parse(HELLO).unwrap();
    pins.add(&cid, 1, &CancellationToken::new()).await.unwrap();

    assert!(
        datastore
            .get(&format!("/content-index/{HELLO}"))
            .await
            .unwrap()
            .is_some()
    );
    let ledger = PinLedger::new(datastore, "local-pins");
    assert!(ledger.all().await.unwrap().is_empty());

    assert!(
        GatewayPins::create(
            "http://127.0.0.1:1",
            dir.path().join("blobs"),
            Arc::new(MemoryDatastore::new()),
            "a/b",
            Duration::from_secs(60),
        )
        .is_err()
    );
}
