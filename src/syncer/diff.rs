// ABOUTME: Diff calculator - compares master and slave hash sets for one unit
// ABOUTME: Produces ordered insert, update and delete key sets

use std::cmp::Ordering;
use std::collections::HashMap;

use super::hasher::decode_key;
use super::types::{Diff, HashRecord, RowKey, TableDefinition};
use crate::error::Result;

/// Compute the diff between one unit's master and slave hash records.
///
/// - key only on master: insert
/// - key on both sides, different hash: update
/// - key only on slave: delete
/// - key on both sides, same hash: nothing
///
/// Keys are matched byte-exact first. A master-only key that the key
/// columns' collation treats as equal to a slave-only key (`'ABC'` and
/// `'abc'` under a `_ci` collation) is the same row on the server, so the
/// pair becomes one update under the master's key instead of an insert and
/// a delete that would hit the same row.
///
/// Each sequence is sorted by primary key using the key columns' native
/// ordering so apply order and log output are reproducible.
pub fn compute_diff(
    table: &TableDefinition,
    master: &[HashRecord],
    slave: &[HashRecord],
) -> Result<Diff> {
    let slave_hashes: HashMap<&str, &str> = slave
        .iter()
        .map(|r| (r.primary_key_value.as_str(), r.hash.as_str()))
        .collect();
    let master_keys: HashMap<&str, &str> = master
        .iter()
        .map(|r| (r.primary_key_value.as_str(), r.hash.as_str()))
        .collect();

    let mut diff = Diff::default();

    for (key, master_hash) in &master_keys {
        match slave_hashes.get(key) {
            None => diff.to_insert.push(row_key(table, key)?),
            Some(slave_hash) if slave_hash != master_hash => {
                diff.to_update.push(row_key(table, key)?)
            }
            Some(_) => {}
        }
    }

    for key in slave_hashes.keys() {
        if !master_keys.contains_key(key) {
            diff.to_delete.push(row_key(table, key)?);
        }
    }

    for keys in [&mut diff.to_insert, &mut diff.to_update, &mut diff.to_delete] {
        keys.sort_by(|a, b| compare_row_keys(table, a, b));
    }
    pair_collation_equal_keys(table, &mut diff);

    Ok(diff)
}

fn compare_row_keys(table: &TableDefinition, a: &RowKey, b: &RowKey) -> Ordering {
    table
        .compare_keys(&a.values, &b.values)
        .then_with(|| a.encoded.cmp(&b.encoded))
}

/// Move insert/delete pairs naming the same server-side row into updates.
/// Both lists must already be sorted by [`compare_row_keys`].
fn pair_collation_equal_keys(table: &TableDefinition, diff: &mut Diff) {
    if diff.to_insert.is_empty() || diff.to_delete.is_empty() {
        return;
    }

    let inserts = std::mem::take(&mut diff.to_insert);
    let deletes = std::mem::take(&mut diff.to_delete);
    let mut paired = Vec::new();
    let mut deletes = deletes.into_iter().peekable();

    for insert in inserts {
        while let Some(delete) = deletes.peek() {
            if table.compare_keys(&delete.values, &insert.values) == Ordering::Less {
                diff.to_delete.extend(deletes.next());
            } else {
                break;
            }
        }
        let collides = deletes
            .peek()
            .is_some_and(|delete| table.compare_keys(&delete.values, &insert.values) == Ordering::Equal);
        if collides {
            if let Some(delete) = deletes.next() {
                tracing::debug!(
                    "Key {} of {} matches slave key {} under its collation",
                    insert.encoded,
                    table.name,
                    delete.encoded
                );
            }
            paired.push(insert);
        } else {
            diff.to_insert.push(insert);
        }
    }
    diff.to_delete.extend(deletes);

    if !paired.is_empty() {
        diff.to_update.extend(paired);
        diff.to_update.sort_by(|a, b| compare_row_keys(table, a, b));
    }
}

fn row_key(table: &TableDefinition, encoded: &str) -> Result<RowKey> {
    Ok(RowKey {
        encoded: encoded.to_string(),
        values: table.typed_key(decode_key(encoded)?),
    })
}
