mod common;

use common::{harness, widget};
use rustmutant::definition::AttributeDraft;
use rustmutant::{TypeReference, Value};
use serde_json::json;
use std::sync::Arc;

#[tokio::test]
async fn test_proxy_follows_rebuilds() {
    let h = harness().await;
    let id = h.engine.create_type(widget()).await.unwrap();
    let proxy = h.engine.proxy(id).await.unwrap();
    let first = proxy.resolve().await.unwrap();
    assert!(proxy.is_type(&first).await.unwrap());

    // nothing changed, same type
    assert!(Arc::ptr_eq(&first, &proxy.resolve().await.unwrap()));

    h.engine
        .add_attribute(id, AttributeDraft::new("stock", "integer").default_value(3))
        .await
        .unwrap();

    let second = proxy.resolve().await.unwrap();
    assert!(!Arc::ptr_eq(&first, &second));
    assert!(first.is_obsolete());
    assert!(second.field("stock").is_ok());
    assert!(Arc::ptr_eq(&second, &proxy.peek().unwrap()));
}

#[tokio::test]
async fn test_equality_follows_resolved_type() {
    let h = harness().await;
    let id = h.engine.create_type(widget()).await.unwrap();
    let proxy = h.engine.proxy(id).await.unwrap();
    let other = h.engine.proxy(id).await.unwrap();
    let old = proxy.resolve().await.unwrap();
    assert!(proxy.is_type(&old).await.unwrap());
    assert!(proxy.same_type(&other).await.unwrap());

    h.engine
        .add_attribute(id, AttributeDraft::new("note", "text"))
        .await
        .unwrap();
    let fresh = h.engine.get_type(id).await.unwrap();

    assert!(old.is_obsolete());
    assert!(*old != *fresh);
    assert!(!proxy.is_type(&old).await.unwrap());
    assert!(proxy.is_type(&fresh).await.unwrap());
    assert!(proxy.same_type(&other).await.unwrap());
}

#[tokio::test]
async fn test_rebind_moves_record_to_current_type() {
    let h = harness().await;
    let id = h.engine.create_type(widget()).await.unwrap();
    let ty = h.engine.get_type(id).await.unwrap();
    let record = ty
        .create(&*h.storage, vec![("name", Value::from("bolt"))])
        .await
        .unwrap();

    h.engine
        .add_attribute(id, AttributeDraft::new("stock", "integer").default_value(3))
        .await
        .unwrap();

    let mut stale = record.clone();
    stale.set("name", "nut").unwrap();
    assert!(stale.save(&*h.storage).await.unwrap_err().is_obsolete());

    let mut rebound = h.engine.rebind(&record).await.unwrap();
    assert_eq!(rebound.get("name").unwrap(), &Value::from("bolt"));
    assert_eq!(rebound.get("stock").unwrap(), &Value::Integer(3));
    assert!(rebound.is_saved());

    rebound.set("stock", 9).unwrap();
    rebound.save(&*h.storage).await.unwrap();
    let current = h.engine.get_type(id).await.unwrap();
    let loaded = current.get(&*h.storage, record.pk()).await.unwrap().unwrap();
    assert_eq!(loaded.get("stock").unwrap(), &Value::Integer(9));
    assert_eq!(current.count(&*h.storage).await.unwrap(), 1);
}

#[tokio::test]
async fn test_deleted_definition_is_obsolete() {
    let h = harness().await;
    let id = h.engine.create_type(widget()).await.unwrap();
    let proxy = h.engine.proxy(id).await.unwrap();
    let record = proxy
        .resolve()
        .await
        .unwrap()
        .create(&*h.storage, vec![("name", Value::from("bolt"))])
        .await
        .unwrap();

    h.engine.delete_type(id).await.unwrap();

    assert!(proxy.resolve().await.unwrap_err().is_obsolete());
    assert!(h.engine.rebind(&record).await.unwrap_err().is_obsolete());
    assert!(!proxy.is_refreshing());
}

#[tokio::test]
async fn test_proxy_serializes_as_reference() {
    let h = harness().await;
    let id = h.engine.create_type(widget()).await.unwrap();
    let proxy = h.engine.proxy(id).await.unwrap();

    let encoded = serde_json::to_value(&proxy).unwrap();
    assert_eq!(encoded, json!({"kind": "type_definition", "id": id.raw()}));

    let reference: TypeReference = serde_json::from_value(encoded).unwrap();
    assert_eq!(reference, proxy.reference());
    let again = h.engine.proxy_from_reference(reference).await.unwrap();
    assert!(again.same_type(&proxy).await.unwrap());
    assert_eq!(again.definition(), id);
}
