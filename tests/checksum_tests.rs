mod common;

use common::{harness, widget};
use rustmutant::definition::{AttributeDraft, BaseRef, TypeDraft, TypePatch};
use rustmutant::state::StateHandler;
use rustmutant::storage::DdlEntry;

#[tokio::test]
async fn test_checksum_is_deterministic() {
    let first = harness().await;
    let second = harness().await;
    let a = first.engine.create_type(widget()).await.unwrap();
    let b = second.engine.create_type(widget()).await.unwrap();

    let sum = first.engine.checksum(a).await.unwrap();
    assert_eq!(sum, second.engine.checksum(b).await.unwrap());
    assert_eq!(sum.len(), 64);
    assert_eq!(first.engine.get_type(a).await.unwrap().checksum(), sum);
    assert_eq!(
        first.engine.state().get_checksum(a).await.unwrap().as_deref(),
        Some(sum.as_str())
    );
}

#[tokio::test]
async fn test_add_then_remove_restores_checksum() {
    let h = harness().await;
    let id = h.engine.create_type(widget()).await.unwrap();
    let original = h.engine.checksum(id).await.unwrap();
    h.storage.clear_journal();

    let note = h
        .engine
        .add_attribute(id, AttributeDraft::new("note", "text"))
        .await
        .unwrap();
    let with_note = h.engine.checksum(id).await.unwrap();
    assert_ne!(original, with_note);

    h.engine.delete_attribute(note).await.unwrap();
    assert_eq!(h.engine.checksum(id).await.unwrap(), original);

    // two structural changes happened even though the checksum came back
    assert_eq!(
        h.ddl(),
        vec![
            DdlEntry::AddColumn {
                table: "shop_widget".into(),
                column: "note".into()
            },
            DdlEntry::DeleteColumn {
                table: "shop_widget".into(),
                column: "note".into()
            },
        ]
    );
}

#[tokio::test]
async fn test_base_change_rebuilds_dependents() {
    let h = harness().await;
    let base = h.engine.create_type(widget()).await.unwrap();
    let child = h
        .engine
        .create_type(
            TypeDraft::new("shop", "Gizmo")
                .base(BaseRef::Dynamic(base))
                .attribute(AttributeDraft::new("power", "integer")),
        )
        .await
        .unwrap();

    let child_before = h.engine.get_type(child).await.unwrap();
    assert_eq!(child_before.field("widget_ptr").unwrap().column, "widget_ptr_id");
    h.storage.clear_journal();

    h.engine
        .add_attribute(base, AttributeDraft::new("weight", "float"))
        .await
        .unwrap();

    let child_after = h.engine.get_type(child).await.unwrap();
    assert!(child_before.is_obsolete());
    assert_ne!(child_before.checksum(), child_after.checksum());
    // only the base table changes shape
    assert!(h.ddl().iter().all(|entry| entry.table() == Some("shop_widget")));
}

#[tokio::test]
async fn test_cosmetic_change_on_relation_target_keeps_dependent() {
    let h = harness().await;
    let category = h
        .engine
        .create_type(TypeDraft::new("shop", "Category").attribute(AttributeDraft::new("title", "text")))
        .await
        .unwrap();
    let id = h
        .engine
        .create_type(widget().attribute(AttributeDraft::new("category", "foreign_key").to_dynamic(category)))
        .await
        .unwrap();
    let widgets = h.engine.get_type(id).await.unwrap();

    h.engine
        .update_type(category, TypePatch::new().verbose_name(Some("kind".into())))
        .await
        .unwrap();

    let again = h.engine.get_type(id).await.unwrap();
    assert!(!widgets.is_obsolete());
    assert_eq!(widgets.checksum(), again.checksum());
    assert_eq!(h.engine.get_type(category).await.unwrap().verbose_name(), "kind");
}

#[tokio::test]
async fn test_referenced_type_cannot_be_deleted() {
    let h = harness().await;
    let category = h
        .engine
        .create_type(TypeDraft::new("shop", "Category").attribute(AttributeDraft::new("title", "text")))
        .await
        .unwrap();
    h.engine
        .create_type(widget().attribute(AttributeDraft::new("category", "foreign_key").to_dynamic(category)))
        .await
        .unwrap();

    let err = h.engine.delete_type(category).await.unwrap_err();
    assert!(err.is_configuration());
    assert!(h.engine.get_type(category).await.is_ok());
}

#[tokio::test]
async fn test_inheritance_cycle_rejected() {
    let h = harness().await;
    let a = h.engine.create_type(widget()).await.unwrap();
    let b = h
        .engine
        .create_type(TypeDraft::new("shop", "Gizmo").base(BaseRef::Dynamic(a)))
        .await
        .unwrap();

    let err = h.engine.add_base(a, BaseRef::Dynamic(b), None).await.unwrap_err();
    assert!(err.is_configuration());
    assert!(h.engine.definitions().snapshot().await.bases_of(a).is_empty());
}
