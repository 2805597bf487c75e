use super::{Layout, MigrationPlan, Operation};
use crate::core::Column;

fn same_definition(old: &Column, new: &Column) -> bool {
    let mut renamed = old.clone();
    renamed.name = new.name.clone();
    &renamed == new
}

/// Computes the operations turning `old` into `new`.
///
/// `None` on either side means the type does not exist there. Columns are
/// matched by attribute identity, so a renamed attribute yields a column
/// rename and keeps its data. A managed layout owns no storage and yields
/// nothing, including on managed/unmanaged transitions.
pub fn plan(old: Option<&Layout>, new: Option<&Layout>) -> MigrationPlan {
    let mut plan = MigrationPlan::default();
    if old.is_some_and(|l| l.managed) || new.is_some_and(|l| l.managed) {
        return plan;
    }

    match (old, new) {
        (None, None) => {}
        (None, Some(new)) => {
            plan.post.push(Operation::CreateTable { schema: new.table_schema() });
            for unique in &new.uniques {
                plan.post.push(Operation::CreateUnique {
                    table: new.table.clone(),
                    name: unique.name.clone(),
                    columns: unique.columns.clone(),
                });
            }
        }
        // one drop covers every column and constraint
        (Some(old), None) => {
            plan.pre.push(Operation::DeleteTable { table: old.table.clone() });
        }
        (Some(old), Some(new)) => diff(old, new, &mut plan),
    }
    plan
}

fn diff(old: &Layout, new: &Layout, plan: &mut MigrationPlan) {
    let table = new.table.clone();

    for unique in &old.uniques {
        let kept = new.unique(&unique.name).is_some_and(|u| u.members == unique.members);
        if !kept {
            plan.pre.push(Operation::DeleteUnique {
                table: old.table.clone(),
                name: unique.name.clone(),
            });
        }
    }

    if old.table != new.table {
        plan.post.push(Operation::RenameTable {
            from: old.table.clone(),
            to: table.clone(),
        });
    }

    for gone in old.columns.iter().filter(|c| new.column(&c.key).is_none()) {
        plan.post.push(Operation::DeleteColumn {
            table: table.clone(),
            column: gone.column.name.clone(),
        });
    }

    let mut renames = Vec::new();
    let mut clears_key = Vec::new();
    let mut alters = Vec::new();
    for current in &new.columns {
        let Some(previous) = old.column(&current.key) else {
            continue;
        };
        if previous.column.name != current.column.name {
            renames.push(Operation::RenameColumn {
                table: table.clone(),
                from: previous.column.name.clone(),
                to: current.column.name.clone(),
            });
        }
        if !same_definition(&previous.column, &current.column) {
            let op = Operation::AlterColumn {
                table: table.clone(),
                column: current.column.clone(),
            };
            // a replaced key must be released before its successor is added
            if previous.column.primary_key && !current.column.primary_key {
                clears_key.push(op);
            } else {
                alters.push(op);
            }
        }
    }
    plan.post.extend(renames);
    plan.post.extend(clears_key);
    plan.post.extend(alters);

    for added in new.columns.iter().filter(|c| old.column(&c.key).is_none()) {
        plan.post.push(Operation::AddColumn {
            table: table.clone(),
            column: added.column.clone(),
        });
    }

    for unique in &new.uniques {
        let existed = old.unique(&unique.name).is_some_and(|u| u.members == unique.members);
        if !existed {
            plan.post.push(Operation::CreateUnique {
                table: table.clone(),
                name: unique.name.clone(),
                columns: unique.columns.clone(),
            });
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::core::DataType;
    use crate::definition::AttributeId;
    use crate::shape::{AttributeKey, LayoutColumn, LayoutUnique};

    fn col(id: u64, column: Column) -> LayoutColumn {
        LayoutColumn { key: AttributeKey::Explicit(AttributeId(id)), column }
    }

    fn widget(columns: Vec<LayoutColumn>) -> Layout {
        let mut all = vec![LayoutColumn {
            key: AttributeKey::SyntheticKey,
            column: Column::auto_key("id"),
        }];
        all.extend(columns);
        Layout {
            table: "app_widget".into(),
            managed: false,
            columns: all,
            uniques: vec![],
        }
    }

    #[test]
    fn test_create_and_delete() {
        let layout = widget(vec![col(1, Column::new("name", DataType::Varchar(50)))]);
        let created = plan(None, Some(&layout));
        assert!(created.pre.is_empty());
        assert!(matches!(created.post[..], [Operation::CreateTable { .. }]));

        let deleted = plan(Some(&layout), None);
        assert_eq!(deleted.pre, vec![Operation::DeleteTable { table: "app_widget".into() }]);
        assert!(deleted.post.is_empty());
    }

    #[test]
    fn test_rename_is_not_drop_and_add() {
        let old = widget(vec![col(1, Column::new("name", DataType::Text))]);
        let new = widget(vec![col(1, Column::new("title", DataType::Text))]);
        let plan = plan(Some(&old), Some(&new));
        assert_eq!(
            plan.post,
            vec![Operation::RenameColumn {
                table: "app_widget".into(),
                from: "name".into(),
                to: "title".into(),
            }]
        );
    }

    #[test]
    fn test_unique_membership_change_is_split() {
        let mut old = widget(vec![
            col(1, Column::new("a", DataType::Integer)),
            col(2, Column::new("b", DataType::Integer)),
            col(3, Column::new("c", DataType::Integer)),
        ]);
        let mut new = old.clone();
        old.uniques.push(LayoutUnique {
            name: "uniq_1_1".into(),
            members: vec![AttributeKey::Explicit(AttributeId(1)), AttributeKey::Explicit(AttributeId(2))],
            columns: vec!["a".into(), "b".into()],
        });
        new.uniques.push(LayoutUnique {
            name: "uniq_1_1".into(),
            members: vec![AttributeKey::Explicit(AttributeId(1)), AttributeKey::Explicit(AttributeId(3))],
            columns: vec!["a".into(), "c".into()],
        });

        let plan = plan(Some(&old), Some(&new));
        assert!(matches!(plan.pre[..], [Operation::DeleteUnique { .. }]));
        assert!(matches!(plan.post[..], [Operation::CreateUnique { .. }]));
    }

    #[test]
    fn test_key_release_precedes_synthetic_key() {
        let old = Layout {
            table: "app_code".into(),
            managed: false,
            columns: vec![col(1, Column::new("code", DataType::Text).primary_key())],
            uniques: vec![],
        };
        let new = widget(vec![col(1, Column::new("code", DataType::Text).not_null())]);
        let new = Layout { table: "app_code".into(), ..new };

        let plan = plan(Some(&old), Some(&new));
        assert!(matches!(plan.post[0], Operation::AlterColumn { .. }));
        assert!(matches!(&plan.post[1], Operation::AddColumn { column, .. } if column.primary_key));
    }

    #[test]
    fn test_managed_is_left_alone() {
        let old = widget(vec![]);
        let new = Layout { managed: true, ..widget(vec![col(1, Column::new("x", DataType::Text))]) };
        assert!(plan(Some(&old), Some(&new)).is_empty());
        assert!(plan(Some(&new), None).is_empty());
    }
}
