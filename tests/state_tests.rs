mod common;

use chrono::Utc;
use common::{attach, eventually, widget};
use rustmutant::definition::{AttributeDraft, DefinitionId, DefinitionStore};
use rustmutant::state::{
    Broker, CacheStateHandler, InMemoryBroker, LruSharedCache, PubSubStateHandler, SharedCache,
    StateHandler, StateMessage, StateServices,
};
use rustmutant::storage::InMemoryStorage;
use rustmutant::{CacheConfig, PubSubConfig, StateConfig};
use std::sync::Arc;
use std::time::Duration;
use uuid::Uuid;

fn pubsub_config() -> PubSubConfig {
    PubSubConfig {
        ready_timeout_ms: 1_000,
        retry_base_ms: 5,
        retry_max_ms: 20,
        ..PubSubConfig::default()
    }
    .channel("state-tests")
}

async fn connected_pair(broker: &Arc<InMemoryBroker>) -> (Arc<PubSubStateHandler>, Arc<PubSubStateHandler>) {
    let first = PubSubStateHandler::connect(broker.clone(), pubsub_config()).await.unwrap();
    let second = PubSubStateHandler::connect(broker.clone(), pubsub_config()).await.unwrap();
    (Arc::new(first), Arc::new(second))
}

async fn sees(handler: &PubSubStateHandler, id: DefinitionId, expected: Option<&str>) -> bool {
    eventually(|| async move {
        handler.get_checksum(id).await.unwrap().as_deref() == expected
    })
    .await
}

#[tokio::test]
async fn test_pubsub_propagates_set_and_clear() {
    let broker = Arc::new(InMemoryBroker::new());
    let (first, second) = connected_pair(&broker).await;
    assert!(first.is_connected());
    assert_ne!(first.sender_id(), second.sender_id());
    let id = DefinitionId(7);

    first.set_checksum(id, "abc").await.unwrap();
    assert!(sees(&second, id, Some("abc")).await);

    first.clear_checksum(id).await.unwrap();
    assert!(sees(&second, id, None).await);
}

#[tokio::test]
async fn test_pubsub_last_writer_wins() {
    let broker = Arc::new(InMemoryBroker::new());
    let (first, second) = connected_pair(&broker).await;
    let id = DefinitionId(7);

    first.set_checksum(id, "new").await.unwrap();
    assert!(sees(&second, id, Some("new")).await);

    // a delayed message from a third process, written before "new"
    let stale = StateMessage {
        sender: Uuid::new_v4(),
        definition: id,
        checksum: Some("old".into()),
        timestamp: Utc::now() - chrono::Duration::seconds(10),
    };
    broker.publish("state-tests", stale.encode().unwrap()).await.unwrap();
    // a later marker proves the stale message was processed
    let marker = StateMessage {
        definition: DefinitionId(8),
        checksum: Some("marker".into()),
        timestamp: Utc::now(),
        ..stale.clone()
    };
    broker.publish("state-tests", marker.encode().unwrap()).await.unwrap();

    assert!(sees(&second, DefinitionId(8), Some("marker")).await);
    assert_eq!(second.get_checksum(id).await.unwrap().as_deref(), Some("new"));
}

#[tokio::test]
async fn test_pubsub_resubscribes_after_disconnect() {
    let broker = Arc::new(InMemoryBroker::new());
    let (first, second) = connected_pair(&broker).await;
    assert_eq!(broker.subscriber_count("state-tests"), 2);

    broker.fail_next_subscribes(2);
    broker.disconnect_all();

    let reconnected = {
        let second = &second;
        eventually(|| async move { second.reconnects() >= 1 && second.is_connected() }).await
    };
    assert!(reconnected);

    let id = DefinitionId(3);
    first.set_checksum(id, "after").await.unwrap();
    assert!(sees(&second, id, Some("after")).await);
}

#[tokio::test]
async fn test_pubsub_connect_fails_without_subscription() {
    let broker = Arc::new(InMemoryBroker::new());
    broker.fail_next_subscribes(usize::MAX);
    let config = PubSubConfig {
        ready_timeout_ms: 50,
        ..pubsub_config()
    };
    let err = PubSubStateHandler::connect(broker, config).await.err().unwrap();
    assert!(matches!(err, rustmutant::DbError::Propagation(_)));
}

#[tokio::test]
async fn test_cache_handler_eviction() {
    let cache = Arc::new(LruSharedCache::new(2).unwrap());
    let handler = CacheStateHandler::new(cache.clone(), "t:", None);

    handler.set_checksum(DefinitionId(1), "a").await.unwrap();
    handler.set_checksum(DefinitionId(2), "b").await.unwrap();
    handler.set_checksum(DefinitionId(3), "c").await.unwrap();

    // an evicted entry reads as absent, which means stale
    assert_eq!(handler.get_checksum(DefinitionId(1)).await.unwrap(), None);
    assert_eq!(handler.get_checksum(DefinitionId(3)).await.unwrap().as_deref(), Some("c"));
    assert_eq!(cache.len().await, 2);
    assert_eq!(cache.get("t:3").await.unwrap().as_deref(), Some("c"));
}

#[tokio::test]
async fn test_cache_entries_expire() {
    let cache = Arc::new(LruSharedCache::new(8).unwrap());
    let handler = CacheStateHandler::new(cache, "t:", Some(Duration::from_millis(20)));
    handler.set_checksum(DefinitionId(1), "a").await.unwrap();
    assert!(handler.get_checksum(DefinitionId(1)).await.unwrap().is_some());

    tokio::time::sleep(Duration::from_millis(40)).await;
    assert_eq!(handler.get_checksum(DefinitionId(1)).await.unwrap(), None);
}

#[tokio::test]
async fn test_engines_share_checksums_through_cache() {
    let store = Arc::new(DefinitionStore::new());
    let storage = Arc::new(InMemoryStorage::new());
    let cache: Arc<dyn SharedCache> = Arc::new(LruSharedCache::new(64).unwrap());
    let config = StateConfig::Cache(CacheConfig::default());
    let services = StateServices::new().with_cache(cache);

    // one handler per engine, as separate processes would build them
    let mut engines = Vec::new();
    for _ in 0..2 {
        let handler = config.build(&services).await.unwrap();
        assert_eq!(handler.backend(), "cache");
        engines.push(attach(store.clone(), storage.clone(), handler).await);
    }
    let (first, second) = (&engines[0], &engines[1]);

    let id = first.create_type(widget()).await.unwrap();
    let seen = second.get_type(id).await.unwrap();
    assert_eq!(seen.checksum(), first.checksum(id).await.unwrap());

    first.add_attribute(id, AttributeDraft::new("note", "text")).await.unwrap();
    let rebuilt = second.get_type(id).await.unwrap();
    assert!(seen.is_obsolete());
    assert!(rebuilt.field("note").is_ok());
}

#[tokio::test]
async fn test_engines_share_checksums_through_pubsub() {
    let broker = Arc::new(InMemoryBroker::new());
    let (first_state, second_state) = connected_pair(&broker).await;
    let store = Arc::new(DefinitionStore::new());
    let storage = Arc::new(InMemoryStorage::new());
    let first = attach(store.clone(), storage.clone(), first_state).await;
    let second = attach(store, storage, second_state.clone()).await;

    let id = first.create_type(widget()).await.unwrap();
    let seen = second.get_type(id).await.unwrap();

    first.add_attribute(id, AttributeDraft::new("note", "text")).await.unwrap();
    let expected = first.checksum(id).await.unwrap();
    assert!(sees(&second_state, id, Some(expected.as_str())).await);

    let rebuilt = second.get_type(id).await.unwrap();
    assert_eq!(rebuilt.checksum(), expected);
    assert!(seen.is_obsolete());
    assert!(rebuilt.field("note").is_ok());
}

#[test]
fn test_state_config_builds_memory_handler() {
    let handler = tokio_test::block_on(StateConfig::Memory.build(&StateServices::new())).unwrap();
    assert_eq!(handler.backend(), "memory");
}
