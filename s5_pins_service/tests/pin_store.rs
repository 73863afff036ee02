use s5_pins_core::testutil::{MemoryContentPins, MemoryNetwork};
use s5_pins_core::{
    Cid, ConnectFailurePolicy, ListQuery, Pin, PinLedger, PinRecord, PinningError, Status,
    TextMatchingStrategy,
};
use s5_pins_service::PinStore;
use s5_pins_service::config::PinStoreConfig;
use s5_pins_store_memory::MemoryDatastore;
use std::sync::Arc;
use std::time::Duration;

const HELLO: &str = "bafkreibm6jg3ux5qumhcn2b3flc3tyu6dmlb4xa7u5bf44yegnrjhc4yeq";
const WORLD: &str = "bafkreicin2sgejgrxnh3nahtj56jvwlkr4sozcf6opvi4wtmmuta5hfyu4";

struct Harness {
    store: PinStore,
    datastore: Arc<MemoryDatastore>,
    content: Arc<MemoryContentPins>,
    network: Arc<MemoryNetwork>,
}

fn harness(config: PinStoreConfig) -> Harness {
    let datastore = Arc::new(MemoryDatastore::new());
    let content = Arc::new(MemoryContentPins::new());
    let network = Arc::new(MemoryNetwork::new(vec![
        "/ip4/10.0.0.1/tcp/4001/p2p/QmService".to_string(),
    ]));
    let store = PinStore::new(datastore.clone(), content.clone(), network.clone(), config);
    Harness {
        store,
        datastore,
        content,
        network,
    }
}

fn cid(s: &str) -> Cid {
    Cid::parse(s).unwrap()
}

fn numbered_cid(i: u32) -> Cid {
    Cid::new_v1(0x55, 0x00, &i.to_be_bytes())
}

async fn wait_for_status(store: &PinStore, owner: &str, id: &str, status: Status) -> PinRecord {
    tokio::time::timeout(Duration::from_secs(5), async {
        loop {
            if let Some(record) = store.get(owner, id).await.unwrap()
                && record.status == status
            {
                return record;
            }
            tokio::time::sleep(Duration::from_millis(5)).await;
        }
    })
    .await
    .unwrap_or_else(|_| panic!("{id} never reached {status}"))
}

#[tokio::test]
async fn pin_is_visible_immediately_and_completes() {
    let h = harness(PinStoreConfig::default());
    h.store.start().await.unwrap();

    let record = h.store.pin("alice", Pin::new(cid(HELLO))).await.unwrap();
    assert_eq!(record.status, Status::Queued);
    let stored = h.store.get("alice", &record.id).await.unwrap();
    assert!(stored.is_some(), "queued record must be persisted before pin returns");

    wait_for_status(&h.store, "alice", &record.id, Status::Pinned).await;
    assert_eq!(h.content.ref_count(&cid(HELLO)), Some(1));
    assert_eq!(h.content.fetch_count(), 1);
    h.store.stop().await;
}

#[tokio::test]
async fn cancel_during_fetch_leaves_no_trace() {
    let h = harness(PinStoreConfig::default());
    h.content.set_fetch_delay(Duration::from_secs(30));
    h.store.start().await.unwrap();

    let record = h.store.pin("alice", Pin::new(cid(HELLO))).await.unwrap();
    wait_for_status(&h.store, "alice", &record.id, Status::Pinning).await;

    tokio::time::timeout(Duration::from_secs(2), h.store.cancel("alice", &record.id))
        .await
        .expect("cancel must abort the fetch promptly")
        .unwrap();

    assert!(h.store.get("alice", &record.id).await.unwrap().is_none());
    assert_eq!(h.content.ref_count(&cid(HELLO)), None);
    assert_eq!(h.content.removal_count(&cid(HELLO)), 0);
    h.store.stop().await;
}

#[tokio::test]
async fn cancel_of_queued_job_does_not_wait_for_the_queue() {
    let h = harness(PinStoreConfig {
        concurrency: 1,
        ..Default::default()
    });
    h.content.set_fetch_delay(Duration::from_secs(30));
    h.store.start().await.unwrap();

    let running = h.store.pin("alice", Pin::new(cid(HELLO))).await.unwrap();
    wait_for_status(&h.store, "alice", &running.id, Status::Pinning).await;
    let waiting = h.store.pin("alice", Pin::new(cid(WORLD))).await.unwrap();

    tokio::time::timeout(Duration::from_secs(1), h.store.cancel("alice", &waiting.id))
        .await
        .expect("queued job should be dropped without waiting")
        .unwrap();
    assert!(h.store.get("alice", &waiting.id).await.unwrap().is_none());
    assert_eq!(
        h.store.get("alice", &running.id).await.unwrap().unwrap().status,
        Status::Pinning
    );
    assert_eq!(h.content.fetch_count(), 1);
    h.store.stop().await;
}

#[tokio::test]
async fn cancel_of_duplicate_does_not_wait_for_the_fetch() {
    let h = harness(PinStoreConfig::default());
    h.content.set_fetch_delay(Duration::from_secs(30));
    h.store.start().await.unwrap();

    let fetching = h.store.pin("alice", Pin::new(cid(HELLO))).await.unwrap();
    wait_for_status(&h.store, "alice", &fetching.id, Status::Pinning).await;
    let duplicate = h.store.pin("bob", Pin::new(cid(HELLO))).await.unwrap();

    tokio::time::timeout(Duration::from_secs(2), h.store.cancel("bob", &duplicate.id))
        .await
        .expect("cancel must not wait for another request's fetch")
        .unwrap();
    assert!(h.store.get("bob", &duplicate.id).await.unwrap().is_none());

    // replacing the CID of a waiting duplicate cancels it the same way
    let duplicate = h.store.pin("bob", Pin::new(cid(HELLO))).await.unwrap();
    let replaced = tokio::time::timeout(
        Duration::from_secs(2),
        h.store.update("bob", &duplicate.id, Pin::new(cid(WORLD))),
    )
    .await
    .expect("update must not wait for another request's fetch")
    .unwrap();
    assert_ne!(replaced.id, duplicate.id);
    assert!(h.store.get("bob", &duplicate.id).await.unwrap().is_none());

    assert_eq!(
        h.store.get("alice", &fetching.id).await.unwrap().unwrap().status,
        Status::Pinning
    );
    h.store.stop().await;
}

#[tokio::test]
async fn duplicates_do_not_hold_worker_slots() {
    let h = harness(PinStoreConfig {
        concurrency: 2,
        ..Default::default()
    });
    h.content.set_fetch_delay(Duration::from_secs(30));
    h.store.start().await.unwrap();

    let alice = h.store.pin("alice", Pin::new(cid(HELLO))).await.unwrap();
    wait_for_status(&h.store, "alice", &alice.id, Status::Pinning).await;
    let bob = h.store.pin("bob", Pin::new(cid(HELLO))).await.unwrap();
    let carol = h.store.pin("carol", Pin::new(cid(WORLD))).await.unwrap();

    wait_for_status(&h.store, "carol", &carol.id, Status::Pinning).await;
    assert_eq!(h.content.fetch_count(), 2);
    assert_eq!(
        h.store.get("bob", &bob.id).await.unwrap().unwrap().status,
        Status::Queued
    );
    h.store.stop().await;
}

#[tokio::test]
async fn shared_content_is_reference_counted() {
    let h = harness(PinStoreConfig::default());
    h.store.start().await.unwrap();

    let first = h.store.pin("alice", Pin::new(cid(HELLO))).await.unwrap();
    wait_for_status(&h.store, "alice", &first.id, Status::Pinned).await;
    let second = h.store.pin("bob", Pin::new(cid(HELLO))).await.unwrap();
    wait_for_status(&h.store, "bob", &second.id, Status::Pinned).await;

    assert_eq!(h.content.fetch_count(), 1, "duplicate must not fetch again");
    assert_eq!(h.content.ref_count(&cid(HELLO)), Some(2));

    h.store.cancel("alice", &first.id).await.unwrap();
    assert_eq!(h.content.ref_count(&cid(HELLO)), Some(1));
    assert_eq!(h.content.removal_count(&cid(HELLO)), 0);

    h.store.cancel("bob", &second.id).await.unwrap();
    assert_eq!(h.content.ref_count(&cid(HELLO)), None);
    assert_eq!(h.content.removal_count(&cid(HELLO)), 1);

    h.store.cancel("bob", &second.id).await.unwrap();
    assert_eq!(h.content.removal_count(&cid(HELLO)), 1);
    h.store.stop().await;
}

#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
async fn concurrent_requests_for_one_cid_fetch_once() {
    let h = harness(PinStoreConfig::default());
    h.content.set_fetch_delay(Duration::from_millis(50));
    h.store.start().await.unwrap();

    let mut ids = Vec::new();
    for owner in ["a", "b", "c", "d"] {
        ids.push((owner, h.store.pin(owner, Pin::new(cid(HELLO))).await.unwrap().id));
    }
    for (owner, id) in &ids {
        wait_for_status(&h.store, owner, id, Status::Pinned).await;
    }
    assert_eq!(h.content.fetch_count(), 1);
    assert_eq!(h.content.ref_count(&cid(HELLO)), Some(4));

    let cancels = ids
        .iter()
        .map(|(owner, id)| {
            let store = h.store.clone();
            let (owner, id) = (owner.to_string(), id.clone());
            tokio::spawn(async move { store.cancel(&owner, &id).await })
        })
        .collect::<Vec<_>>();
    for cancel in cancels {
        cancel.await.unwrap().unwrap();
    }
    assert_eq!(h.content.ref_count(&cid(HELLO)), None);
    assert_eq!(h.content.removal_count(&cid(HELLO)), 1);
    h.store.stop().await;
}

#[tokio::test]
async fn unpin_failure_still_removes_the_record() {
    let h = harness(PinStoreConfig::default());
    h.store.start().await.unwrap();
    let record = h.store.pin("alice", Pin::new(cid(HELLO))).await.unwrap();
    wait_for_status(&h.store, "alice", &record.id, Status::Pinned).await;

    h.content.fail_rm(true);
    h.store.cancel("alice", &record.id).await.unwrap();
    assert!(h.store.get("alice", &record.id).await.unwrap().is_none());
    h.store.stop().await;
}

#[tokio::test]
async fn failed_fetch_is_recorded() {
    let h = harness(PinStoreConfig::default());
    h.content.fail_fetch(cid(WORLD));
    h.store.start().await.unwrap();

    let record = h.store.pin("alice", Pin::new(cid(WORLD))).await.unwrap();
    let failed = wait_for_status(&h.store, "alice", &record.id, Status::Failed).await;
    assert!(failed.info.get("error").is_some());
    assert_eq!(h.content.ref_count(&cid(WORLD)), None);

    h.store.cancel("alice", &record.id).await.unwrap();
    assert_eq!(h.content.removal_count(&cid(WORLD)), 0);
    h.store.stop().await;
}

#[tokio::test]
async fn cancel_of_unknown_id_is_a_noop() {
    let h = harness(PinStoreConfig::default());
    h.store.start().await.unwrap();
    h.store.cancel("alice", "does-not-exist").await.unwrap();
    h.store.cancel("alice", "does-not-exist").await.unwrap();
    assert!(h.datastore.is_empty());
    h.store.stop().await;
}

#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
async fn concurrency_is_bounded() {
    let h = harness(PinStoreConfig {
        concurrency: 2,
        ..Default::default()
    });
    h.content.set_fetch_delay(Duration::from_millis(30));
    h.store.start().await.unwrap();

    let mut ids = Vec::new();
    for i in 0..6 {
        ids.push(h.store.pin("alice", Pin::new(numbered_cid(i))).await.unwrap().id);
    }
    for id in &ids {
        wait_for_status(&h.store, "alice", id, Status::Pinned).await;
    }
    assert_eq!(h.content.fetch_count(), 6);
    assert!(h.content.max_in_flight() <= 2);
    h.store.stop().await;
}

#[tokio::test]
async fn unfinished_jobs_resume_after_restart() {
    let datastore = Arc::new(MemoryDatastore::new());
    let content = Arc::new(MemoryContentPins::new());
    let network = Arc::new(MemoryNetwork::default());

    // a process that accepted pins but died before running them
    let crashed = PinStore::new(
        datastore.clone(),
        content.clone(),
        network.clone(),
        PinStoreConfig::default(),
    );
    let queued = crashed.pin("alice", Pin::new(cid(HELLO))).await.unwrap();
    drop(crashed);

    // and one that was interrupted mid-fetch
    let ledger = PinLedger::new(datastore.clone(), "pinning-service");
    let mut pinning = PinRecord::new("interrupted".into(), "bob".into(), 1, Pin::new(cid(WORLD)));
    pinning.status = Status::Pinning;
    ledger.put(&pinning).await.unwrap();

    let store = PinStore::new(datastore, content.clone(), network, PinStoreConfig::default());
    store.start().await.unwrap();
    wait_for_status(&store, "alice", &queued.id, Status::Pinned).await;
    wait_for_status(&store, "bob", "interrupted", Status::Pinned).await;
    assert_eq!(content.fetch_count(), 2);

    // new records sort after everything already in the ledger
    let newer = store.pin("alice", Pin::new(numbered_cid(1))).await.unwrap();
    assert!(newer.created > queued.created);
    store.stop().await;
}

#[tokio::test]
async fn stop_keeps_records_for_the_next_start() {
    let h = harness(PinStoreConfig::default());
    h.content.set_fetch_delay(Duration::from_secs(30));
    h.store.start().await.unwrap();
    let record = h.store.pin("alice", Pin::new(cid(HELLO))).await.unwrap();
    wait_for_status(&h.store, "alice", &record.id, Status::Pinning).await;

    h.store.stop().await;
    assert_eq!(
        h.store.get("alice", &record.id).await.unwrap().unwrap().status,
        Status::Pinning
    );
    assert!(h.store.pin("alice", Pin::new(cid(WORLD))).await.is_err());

    h.content.set_fetch_delay(Duration::ZERO);
    let restarted = PinStore::new(
        h.datastore.clone(),
        h.content.clone(),
        h.network.clone(),
        PinStoreConfig::default(),
    );
    restarted.start().await.unwrap();
    wait_for_status(&restarted, "alice", &record.id, Status::Pinned).await;
    restarted.stop().await;
}

#[tokio::test]
async fn start_after_stop_is_rejected() {
    let h = harness(PinStoreConfig::default());
    h.store.start().await.unwrap();
    h.store.start().await.unwrap();
    h.store.stop().await;

    match h.store.start().await {
        Err(PinningError::Internal(_)) => {}
        other => panic!("expected an error, got {other:?}"),
    }
    assert!(h.store.pin("alice", Pin::new(cid(HELLO))).await.is_err());
}

#[tokio::test]
async fn update_in_place_or_replace() {
    let h = harness(PinStoreConfig::default());
    h.store.start().await.unwrap();
    let record = h
        .store
        .pin("alice", Pin::new(cid(HELLO)).with_name("old"))
        .await
        .unwrap();
    wait_for_status(&h.store, "alice", &record.id, Status::Pinned).await;

    let updated = h
        .store
        .update("alice", &record.id, Pin::new(cid(HELLO)).with_name("new"))
        .await
        .unwrap();
    assert_eq!(updated.id, record.id);
    assert_eq!(updated.status, Status::Pinned);
    assert_eq!(updated.pin.name.as_deref(), Some("new"));

    let replaced = h
        .store
        .update("alice", &record.id, Pin::new(cid(WORLD)))
        .await
        .unwrap();
    assert_ne!(replaced.id, record.id);
    assert!(h.store.get("alice", &record.id).await.unwrap().is_none());
    assert_eq!(h.content.ref_count(&cid(HELLO)), None);
    wait_for_status(&h.store, "alice", &replaced.id, Status::Pinned).await;

    assert!(matches!(
        h.store.update("alice", "missing", Pin::new(cid(HELLO))).await,
        Err(PinningError::NotFound)
    ));
    h.store.stop().await;
}

#[tokio::test]
async fn origins_are_dialed_per_peer() {
    let h = harness(PinStoreConfig::default());
    h.network.make_reachable("/ip4/1.1.1.1/tcp/1/p2p/QmA");
    h.store.start().await.unwrap();

    let origins = vec![
        "/ip4/1.1.1.1/tcp/1/p2p/QmA".to_string(),
        "/ip4/1.1.1.2/tcp/1/p2p/QmA".to_string(),
    ];
    let record = h
        .store
        .pin("alice", Pin::new(cid(HELLO)).with_origins(origins.clone()))
        .await
        .unwrap();
    wait_for_status(&h.store, "alice", &record.id, Status::Pinned).await;
    assert_eq!(h.network.dials(), vec![origins]);
    h.store.stop().await;
}

#[tokio::test]
async fn unreachable_origins_follow_the_policy() {
    let origins = vec!["/ip4/9.9.9.9/tcp/1/p2p/QmGone".to_string()];

    let lenient = harness(PinStoreConfig::default());
    lenient.store.start().await.unwrap();
    let record = lenient
        .store
        .pin("alice", Pin::new(cid(HELLO)).with_origins(origins.clone()))
        .await
        .unwrap();
    wait_for_status(&lenient.store, "alice", &record.id, Status::Pinned).await;
    lenient.store.stop().await;

    let strict = harness(PinStoreConfig {
        on_connect_failure: ConnectFailurePolicy::Fail,
        ..Default::default()
    });
    strict.store.start().await.unwrap();
    let record = strict
        .store
        .pin("alice", Pin::new(cid(HELLO)).with_origins(origins))
        .await
        .unwrap();
    wait_for_status(&strict.store, "alice", &record.id, Status::Failed).await;
    assert_eq!(strict.content.fetch_count(), 0);
    strict.store.stop().await;
}

#[tokio::test]
async fn listing_is_partitioned_and_pages_without_gaps() {
    // not started: records stay queued, only the ledger is exercised
    let h = harness(PinStoreConfig::default());
    for i in 0..1100 {
        h.store
            .pin("alice", Pin::new(numbered_cid(i)))
            .await
            .unwrap();
    }
    h.store.pin("bob", Pin::new(cid(HELLO))).await.unwrap();

    let bob = h.store.list("bob", &ListQuery::default()).await.unwrap();
    assert_eq!(bob.count, 1);

    let mut seen = Vec::new();
    let mut query = ListQuery::default().with_limit(1000);
    loop {
        let page = h.store.list("alice", &query).await.unwrap();
        assert_eq!(page.count + seen.len(), 1100);
        let Some(last) = page.results.last() else {
            break;
        };
        query.before = Some(last.created);
        seen.extend(page.results.into_iter().map(|r| (r.created, r.id)));
    }
    assert_eq!(seen.len(), 1100);
    assert!(seen.windows(2).all(|w| w[0].0 > w[1].0));
    let mut ids: Vec<_> = seen.iter().map(|(_, id)| id.clone()).collect();
    ids.sort();
    ids.dedup();
    assert_eq!(ids.len(), 1100);
}

#[tokio::test]
async fn name_filters() {
    let h = harness(PinStoreConfig::default());
    h.store
        .pin("alice", Pin::new(cid(HELLO)).with_name("abc"))
        .await
        .unwrap();

    let count = |q: ListQuery| {
        let store = h.store.clone();
        async move { store.list("alice", &q).await.unwrap().count }
    };
    let by_name = |name: &str, strategy| ListQuery::default().with_name(name, strategy);
    assert_eq!(count(by_name("ABC", TextMatchingStrategy::IExact)).await, 1);
    assert_eq!(count(by_name("a", TextMatchingStrategy::Partial)).await, 1);
    assert_eq!(count(by_name("x", TextMatchingStrategy::Exact)).await, 0);
    assert_eq!(count(by_name("B", TextMatchingStrategy::IPartial)).await, 1);
}
