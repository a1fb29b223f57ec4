// ABOUTME: Partition planner - expands resolved tables into sync units
// ABOUTME: One unit per partition value (master and slave), or one per whole table

use mysql_async::Value;
use std::collections::HashSet;

use super::database::Database;
use super::hasher::canonical_bytes;
use super::policy::TablePolicy;
use super::types::{SyncUnit, UnitMode};
use crate::error::Result;

/// Build the ordered unit list: table declaration order, then partition
/// enumeration order within a table.
pub async fn plan_units(
    master: &dyn Database,
    slave: &dyn Database,
    policies: &[TablePolicy],
) -> Result<Vec<SyncUnit>> {
    let mut units = Vec::new();

    for policy in policies {
        match policy {
            TablePolicy::Ignored { .. } | TablePolicy::Skipped { .. } => {}
            TablePolicy::FullReplace(table) => {
                units.push(SyncUnit::whole_table(table.clone(), UnitMode::FullReplace));
            }
            TablePolicy::HashDiff(table) => match &table.partition_column {
                None => units.push(SyncUnit::whole_table(table.clone(), UnitMode::HashDiff)),
                Some(column) => {
                    let values = partition_values(master, slave, &table.name, column).await?;
                    tracing::debug!(
                        "Table {} has {} partitions on `{}`",
                        table.name,
                        values.len(),
                        column
                    );
                    let definition = table.column(column);
                    units.extend(values.into_iter().map(|value| {
                        let value = match (definition, value) {
                            (Some(definition), Some(value)) => Some(definition.typed_value(value)),
                            (_, value) => value,
                        };
                        SyncUnit::partition(table.clone(), value)
                    }));
                }
            },
        }
    }

    Ok(units)
}

/// Distinct partition values present on either side, master values first.
///
/// Values equal in canonical form are the same partition even if the
/// driver returned them as different `Value` variants.
async fn partition_values(
    master: &dyn Database,
    slave: &dyn Database,
    table: &str,
    column: &str,
) -> Result<Vec<Option<Value>>> {
    let mut seen: HashSet<Option<Vec<u8>>> = HashSet::new();
    let mut values = Vec::new();

    let master_values = master.distinct_values(table, column).await?;
    let slave_values = slave.distinct_values(table, column).await?;

    for value in master_values.into_iter().chain(slave_values) {
        let canonical = value.as_ref().and_then(canonical_bytes);
        if seen.insert(canonical) {
            values.push(value);
        }
    }
    Ok(values)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::syncer::memory::MemoryDatabase;
    use crate::syncer::types::{ColumnDefinition, TableDefinition, UnitScope};
    use std::sync::Arc;

    fn text(s: &str) -> Value {
        Value::Bytes(s.as_bytes().to_vec())
    }

    fn orders() -> TableDefinition {
        TableDefinition::new(
            "orders",
            vec![
                ColumnDefinition::new("id", "int"),
                ColumnDefinition::new("site", "varchar"),
            ],
            vec!["id".to_string()],
        )
    }

    #[tokio::test]
    async fn test_partitions_from_both_sides() {
        let master = MemoryDatabase::new("master");
        let slave = MemoryDatabase::new("slave");
        master.create_table(orders());
        slave.create_table(orders());
        master.insert_rows(
            "orders",
            vec![
                vec![Value::Int(1), text("eu")],
                vec![Value::Int(2), Value::NULL],
                vec![Value::Int(3), text("us")],
            ],
        );
        slave.insert_rows(
            "orders",
            vec![
                vec![Value::Int(1), text("eu")],
                vec![Value::Int(9), text("apac")],
            ],
        );

        let mut def = orders();
        def.partition_column = Some("site".to_string());
        let policies = vec![TablePolicy::HashDiff(Arc::new(def))];

        let units = plan_units(&master, &slave, &policies).await.unwrap();
        let scopes: Vec<UnitScope> = units.iter().map(|u| u.scope.clone()).collect();
        assert_eq!(
            scopes,
            vec![
                UnitScope::Partition(None),
                UnitScope::Partition(Some(text("eu"))),
                UnitScope::Partition(Some(text("us"))),
                UnitScope::Partition(Some(text("apac"))),
            ]
        );
    }

    #[tokio::test]
    async fn test_unpartitioned_and_full_replace_tables_get_one_unit() {
        let master = MemoryDatabase::new("master");
        let slave = MemoryDatabase::new("slave");
        let audit = TableDefinition::new("audit", vec![ColumnDefinition::new("v", "text")], vec![]);
        let policies = vec![
            TablePolicy::Ignored {
                table: "tmp".to_string(),
                pattern: "^tmp".to_string(),
            },
            TablePolicy::HashDiff(Arc::new(orders())),
            TablePolicy::FullReplace(Arc::new(audit)),
        ];

        let units = plan_units(&master, &slave, &policies).await.unwrap();
        assert_eq!(units.len(), 2);
        assert_eq!(units[0].mode, UnitMode::HashDiff);
        assert_eq!(units[0].scope, UnitScope::WholeTable);
        assert_eq!(units[1].mode, UnitMode::FullReplace);
    }
}
