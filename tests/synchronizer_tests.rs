mod common;

use common::{Harness, harness, harness_without_uniques, widget};
use rustmutant::definition::{AttributeDraft, AttributeId, AttributePatch, DefinitionId};
use rustmutant::storage::{DdlEntry, RowStore};
use rustmutant::{DbError, Value};

async fn attribute(h: &Harness, owner: DefinitionId, name: &str) -> AttributeId {
    h.engine
        .definitions()
        .read(|set| {
            set.attributes_of(owner)
                .into_iter()
                .find(|a| a.name == name)
                .map(|a| a.id)
        })
        .await
        .unwrap()
}

fn colored_widget() -> rustmutant::definition::TypeDraft {
    widget().attribute(AttributeDraft::new("color", "char").option("max_length", 10))
}

#[tokio::test]
async fn test_delete_type_is_one_drop() {
    let h = harness().await;
    let id = h.engine.create_type(colored_widget()).await.unwrap();
    let name = attribute(&h, id, "name").await;
    let color = attribute(&h, id, "color").await;
    h.engine.add_uniqueness(id, vec![name, color]).await.unwrap();
    let ty = h.engine.get_type(id).await.unwrap();
    h.storage.clear_journal();

    h.engine.delete_type(id).await.unwrap();

    assert_eq!(
        h.ddl(),
        vec![DdlEntry::DeleteTable {
            name: "shop_widget".into()
        }]
    );
    assert!(!h.storage.table_exists("shop_widget").await);
    assert!(ty.is_obsolete());
    assert!(matches!(
        h.engine.get_type(id).await.unwrap_err(),
        DbError::DefinitionNotFound(_)
    ));
}

#[tokio::test]
async fn test_attribute_rename_keeps_data() {
    let h = harness().await;
    let id = h.engine.create_type(widget()).await.unwrap();
    let ty = h.engine.get_type(id).await.unwrap();
    let saved = ty
        .create(&*h.storage, vec![("name", Value::from("bolt"))])
        .await
        .unwrap();
    h.storage.clear_journal();

    let name = attribute(&h, id, "name").await;
    h.engine
        .update_attribute(name, AttributePatch::new().rename("title"))
        .await
        .unwrap();

    assert_eq!(
        h.ddl(),
        vec![DdlEntry::RenameColumn {
            table: "shop_widget".into(),
            from: "name".into(),
            to: "title".into()
        }]
    );
    let ty = h.engine.get_type(id).await.unwrap();
    let loaded = ty.get(&*h.storage, saved.pk()).await.unwrap().unwrap();
    assert_eq!(loaded.get("title").unwrap(), &Value::from("bolt"));
    assert!(loaded.get("name").is_err());
}

#[tokio::test]
async fn test_uniqueness_enforced_then_released() {
    let h = harness().await;
    let id = h.engine.create_type(colored_widget()).await.unwrap();
    let name = attribute(&h, id, "name").await;
    let color = attribute(&h, id, "color").await;
    let uniqueness = h.engine.add_uniqueness(id, vec![name, color]).await.unwrap();

    let ty = h.engine.get_type(id).await.unwrap();
    let values = || vec![("name", Value::from("bolt")), ("color", Value::from("red"))];
    ty.create(&*h.storage, values()).await.unwrap();
    let err = ty.create(&*h.storage, values()).await.unwrap_err();
    assert!(matches!(err, DbError::ConstraintViolation(_)));
    // a partial match is fine
    ty.create(&*h.storage, vec![("name", Value::from("bolt")), ("color", Value::from("blue"))])
        .await
        .unwrap();

    h.storage.clear_journal();
    h.engine.clear_uniqueness(uniqueness).await.unwrap();
    assert!(matches!(h.ddl()[..], [DdlEntry::DeleteUnique { .. }]));

    let ty = h.engine.get_type(id).await.unwrap();
    ty.create(&*h.storage, values()).await.unwrap();
    assert_eq!(ty.count(&*h.storage).await.unwrap(), 3);
}

#[tokio::test]
async fn test_member_change_drops_before_and_creates_after() {
    let h = harness().await;
    let id = h.engine.create_type(colored_widget()).await.unwrap();
    let name = attribute(&h, id, "name").await;
    let color = attribute(&h, id, "color").await;
    let uniqueness = h.engine.add_uniqueness(id, vec![name, color]).await.unwrap();

    let ty = h.engine.get_type(id).await.unwrap();
    ty.create(&*h.storage, vec![("name", Value::from("bolt")), ("color", Value::from("red"))])
        .await
        .unwrap();
    ty.create(&*h.storage, vec![("name", Value::from("bolt")), ("color", Value::from("blue"))])
        .await
        .unwrap();
    h.storage.clear_journal();

    h.engine.remove_uniqueness_member(uniqueness, name).await.unwrap();

    match &h.ddl()[..] {
        [DdlEntry::DeleteUnique { name: dropped, .. }, DdlEntry::CreateUnique { name: created, columns, .. }] => {
            assert_eq!(dropped, created);
            assert_eq!(columns, &vec!["color".to_string()]);
        }
        other => panic!("unexpected statements {:?}", other),
    }

    let ty = h.engine.get_type(id).await.unwrap();
    let err = ty
        .create(&*h.storage, vec![("name", Value::from("nut")), ("color", Value::from("red"))])
        .await
        .unwrap_err();
    assert!(matches!(err, DbError::ConstraintViolation(_)));
}

#[tokio::test]
async fn test_member_change_rolls_back_on_duplicates() {
    let h = harness().await;
    let id = h.engine.create_type(colored_widget()).await.unwrap();
    let name = attribute(&h, id, "name").await;
    let color = attribute(&h, id, "color").await;
    let uniqueness = h.engine.add_uniqueness(id, vec![name, color]).await.unwrap();

    let ty = h.engine.get_type(id).await.unwrap();
    ty.create(&*h.storage, vec![("name", Value::from("bolt")), ("color", Value::from("red"))])
        .await
        .unwrap();
    ty.create(&*h.storage, vec![("name", Value::from("nut")), ("color", Value::from("red"))])
        .await
        .unwrap();

    // the remaining member alone is not unique over the stored rows
    h.engine.remove_uniqueness_member(uniqueness, name).await.unwrap_err();

    let schema = h.storage.describe("shop_widget").await.unwrap();
    assert_eq!(schema.uniques.len(), 1);
    assert_eq!(schema.uniques[0].columns, vec!["name".to_string(), "color".to_string()]);
    let members = h
        .engine
        .definitions()
        .read(|set| set.uniqueness(uniqueness).map(|u| u.attributes.len()))
        .await
        .unwrap();
    assert_eq!(members, 2);
}

#[tokio::test]
async fn test_null_to_not_null_uses_default() {
    let h = harness().await;
    let id = h
        .engine
        .create_type(widget().attribute(AttributeDraft::new("qty", "integer")))
        .await
        .unwrap();
    let ty = h.engine.get_type(id).await.unwrap();
    let saved = ty
        .create(&*h.storage, vec![("name", Value::from("bolt"))])
        .await
        .unwrap();
    assert!(saved.get("qty").unwrap().is_null());
    h.storage.clear_journal();

    let qty = attribute(&h, id, "qty").await;
    h.engine
        .update_attribute(
            qty,
            AttributePatch::new().null(false).default_value(Some(Value::Integer(0))),
        )
        .await
        .unwrap();

    assert_eq!(
        h.ddl(),
        vec![DdlEntry::AlterColumn {
            table: "shop_widget".into(),
            column: "qty".into()
        }]
    );
    let ty = h.engine.get_type(id).await.unwrap();
    let loaded = ty.get(&*h.storage, saved.pk()).await.unwrap().unwrap();
    assert_eq!(loaded.get("qty").unwrap(), &Value::Integer(0));
}

#[tokio::test]
async fn test_unique_operations_skipped_without_support() {
    let h = harness_without_uniques().await;
    let id = h.engine.create_type(colored_widget()).await.unwrap();
    let name = attribute(&h, id, "name").await;
    let color = attribute(&h, id, "color").await;
    h.storage.clear_journal();

    h.engine.add_uniqueness(id, vec![name, color]).await.unwrap();
    assert!(h.ddl().is_empty());

    let ty = h.engine.get_type(id).await.unwrap();
    let values = || vec![("name", Value::from("bolt")), ("color", Value::from("red"))];
    ty.create(&*h.storage, values()).await.unwrap();
    ty.create(&*h.storage, values()).await.unwrap();
}

#[tokio::test]
async fn test_primary_key_replaces_synthetic_key() {
    let h = harness().await;
    let id = h.engine.create_type(widget()).await.unwrap();
    h.storage.clear_journal();

    h.engine
        .add_attribute(
            id,
            AttributeDraft::new("code", "char")
                .option("max_length", 8)
                .primary_key(),
        )
        .await
        .unwrap();

    assert_eq!(
        h.ddl(),
        vec![
            DdlEntry::DeleteColumn {
                table: "shop_widget".into(),
                column: "id".into()
            },
            DdlEntry::AddColumn {
                table: "shop_widget".into(),
                column: "code".into()
            },
        ]
    );

    let ty = h.engine.get_type(id).await.unwrap();
    assert_eq!(ty.primary_key().name, "code");
    ty.create(&*h.storage, vec![("code", Value::from("A1")), ("name", Value::from("bolt"))])
        .await
        .unwrap();
    let loaded = ty.get(&*h.storage, &Value::from("A1")).await.unwrap().unwrap();
    assert_eq!(loaded.get("name").unwrap(), &Value::from("bolt"));
}

#[tokio::test]
async fn test_failed_migration_rolls_back() {
    let h = harness().await;
    let id = h.engine.create_type(widget()).await.unwrap();
    let ty = h.engine.get_type(id).await.unwrap();
    for name in ["bolt", "nut"] {
        ty.create(&*h.storage, vec![("name", Value::from(name))]).await.unwrap();
    }
    let original = ty.checksum().to_string();
    h.storage.clear_journal();

    // a required column without default cannot be added over existing rows
    let err = h
        .engine
        .add_attribute(id, AttributeDraft::new("sku", "char").option("max_length", 10).not_null())
        .await
        .unwrap_err();
    assert!(err.is_structural_conflict());

    assert!(h.storage.journal().contains(&DdlEntry::Rollback));
    let schema = h.storage.describe("shop_widget").await.unwrap();
    assert!(schema.schema().get_column("sku").is_none());
    assert!(h
        .engine
        .definitions()
        .read(|set| set.attributes_of(id).iter().all(|a| a.name != "sku"))
        .await);

    let ty = h.engine.get_type(id).await.unwrap();
    assert_eq!(ty.checksum(), original);
    assert_eq!(ty.count(&*h.storage).await.unwrap(), 2);
}

#[tokio::test]
async fn test_deleting_sole_primary_key_restores_synthetic_key() {
    let h = harness().await;
    let id = h.engine.create_type(widget()).await.unwrap();
    h.engine
        .add_attribute(
            id,
            AttributeDraft::new("code", "char")
                .option("max_length", 8)
                .primary_key(),
        )
        .await
        .unwrap();
    let ty = h.engine.get_type(id).await.unwrap();
    for (code, name) in [("A1", "bolt"), ("B2", "nut")] {
        ty.create(&*h.storage, vec![("code", Value::from(code)), ("name", Value::from(name))])
            .await
            .unwrap();
    }
    let code = attribute(&h, id, "code").await;
    h.storage.clear_journal();

    h.engine.delete_attribute(code).await.unwrap();

    assert_eq!(
        h.ddl(),
        vec![
            DdlEntry::DeleteColumn {
                table: "shop_widget".into(),
                column: "code".into()
            },
            DdlEntry::AddColumn {
                table: "shop_widget".into(),
                column: "id".into()
            },
        ]
    );

    let ty = h.engine.get_type(id).await.unwrap();
    assert_eq!(ty.primary_key().name, "id");
    assert_eq!(ty.count(&*h.storage).await.unwrap(), 2);
    let first = ty.get(&*h.storage, &Value::Integer(1)).await.unwrap().unwrap();
    assert!(matches!(first.get("name").unwrap(), Value::Text(_)));
    assert!(ty.get(&*h.storage, &Value::Integer(2)).await.unwrap().is_some());
    let next = ty.create(&*h.storage, vec![("name", Value::from("washer"))]).await.unwrap();
    assert_eq!(next.pk(), &Value::Integer(3));
}
