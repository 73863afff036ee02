use s5_pins_core::testutil::DatastoreTests;
use s5_pins_core::{Cid, Pin, PinLedger, PinRecord, Status};
use s5_pins_store_memory::MemoryDatastore;
use std::sync::Arc;

#[tokio::test]
async fn test_memory_datastore() {
    let store = MemoryDatastore::new();
    DatastoreTests::new(&store).run_all().await.unwrap();
    assert!(store.is_empty());
}

fn record(owner: &str, id: &str, created: i64) -> PinRecord {
    let cid = Cid::parse("bafkreibm6jg3ux5qumhcn2b3flc3tyu6dmlb4xa7u5bf44yegnrjhc4yeq").unwrap();
    PinRecord::new(id.into(), owner.into(), created, Pin::new(cid))
}

#[tokio::test]
async fn ledger_partitions_by_owner() {
    let store = Arc::new(MemoryDatastore::new());
    let ledger = PinLedger::new(store.clone(), "pinning-service");

    ledger.put(&record("alice", "a1", 1)).await.unwrap();
    ledger.put(&record("alice", "a2", 2)).await.unwrap();
    ledger.put(&record("bob", "b1", 3)).await.unwrap();
    // an owner whose id is a prefix of another owner's id
    ledger.put(&record("ali", "x1", 4)).await.unwrap();

    assert_eq!(ledger.list_owner("alice").await.unwrap().len(), 2);
    assert_eq!(ledger.list_owner("ali").await.unwrap().len(), 1);
    assert_eq!(ledger.all().await.unwrap().len(), 4);
    assert!(ledger.get("bob", "a1").await.unwrap().is_none());

    let mut updated = ledger.get("alice", "a1").await.unwrap().unwrap();
    updated.status = Status::Pinned;
    ledger.put(&updated).await.unwrap();
    assert_eq!(
        ledger.get("alice", "a1").await.unwrap().unwrap().status,
        Status::Pinned
    );

    ledger.delete("alice", "a1").await.unwrap();
    ledger.delete("alice", "a1").await.unwrap();
    assert!(ledger.get("alice", "a1").await.unwrap().is_none());
    assert_eq!(store.len(), 3);
}

#[tokio::test]
async fn ledger_rejects_keys_that_escape_the_partition() {
    let ledger = PinLedger::new(Arc::new(MemoryDatastore::new()), "pinning-service");
    assert!(ledger.put(&record("a/b", "id", 1)).await.is_err());
    assert!(ledger.get("alice", "../x").await.unwrap().is_none());
    assert!(ledger.list_owner("").await.is_err());
}
