use std::collections::{BTreeMap, HashSet};
use std::ops::Bound::Included;

use serde::{Deserialize, Serialize};

use crate::errors::DatabaseError;
use crate::rid::RID;

/// Per-column ordered maps from value to the set of base RIDs whose latest
/// value in that column equals it. The key column's index always exists;
/// secondary indexes are created and dropped on demand.
#[derive(Clone, Serialize, Deserialize)]
pub struct Index {
    /// If `enabled[i]` is `false`, the index for column `i` is not maintained.
    enabled: Vec<bool>,

    /// B-tree maps for every user column.
    trees: Vec<BTreeMap<i64, HashSet<RID>>>,

    key_column: usize,
}

impl Index {
    /// Initialize an indexer with only the key column enabled.
    pub fn new(num_columns: usize, key_column: usize) -> Self {
        let mut enabled = vec![false; num_columns];
        enabled[key_column] = true;

        Index {
            enabled,
            trees: vec![BTreeMap::new(); num_columns],
            key_column,
        }
    }

    pub fn is_enabled(&self, column: usize) -> bool {
        self.enabled.get(column).copied().unwrap_or(false)
    }

    fn check_column(&self, column: usize) -> Result<(), DatabaseError> {
        if column >= self.trees.len() {
            return Err(DatabaseError::Argument(format!("column {column} out of bounds")));
        }
        Ok(())
    }

    /// Enable the index on `column`. The caller backfills it afterwards via
    /// [`Index::insert`]. Enabling an already enabled column is a no-op.
    pub fn enable(&mut self, column: usize) -> Result<(), DatabaseError> {
        self.check_column(column)?;
        self.enabled[column] = true;
        Ok(())
    }

    /// Drop the index on `column`. The key column's index cannot be dropped.
    pub fn disable(&mut self, column: usize) -> Result<(), DatabaseError> {
        self.check_column(column)?;
        if column == self.key_column {
            return Err(DatabaseError::Argument("cannot drop the key column index".into()));
        }

        self.enabled[column] = false;
        self.trees[column].clear();
        Ok(())
    }

    /// Map `value` to `rid` in the index of `column`.
    pub fn insert(&mut self, column: usize, value: i64, rid: RID) {
        self.trees[column].entry(value).or_default().insert(rid);
    }

    /// Remove the `value` to `rid` mapping from the index of `column`.
    pub fn remove(&mut self, column: usize, value: i64, rid: RID) {
        if let Some(set) = self.trees[column].get_mut(&value) {
            set.remove(&rid);
            if set.is_empty() {
                self.trees[column].remove(&value);
            }
        }
    }

    /// Move `rid` from `old` to `new` in the index of `column`.
    pub fn update(&mut self, column: usize, old: i64, new: i64, rid: RID) {
        self.remove(column, old, rid);
        self.insert(column, new, rid);
    }

    /// Add a full row to every enabled index.
    pub fn insert_row(&mut self, values: &[i64], rid: RID) {
        for (column, value) in values.iter().enumerate() {
            if self.enabled[column] {
                self.insert(column, *value, rid);
            }
        }
    }

    /// Remove a full row from every enabled index, returning the pairs that
    /// were actually removed so a rollback can reinsert them.
    pub fn remove_row(&mut self, values: &[i64], rid: RID) -> Vec<(usize, i64)> {
        let mut removed = Vec::new();

        for (column, value) in values.iter().enumerate() {
            if self.enabled[column] {
                self.remove(column, *value, rid);
                removed.push((column, *value));
            }
        }

        removed
    }

    /// RIDs whose latest value in `column` equals `value`, in sorted order.
    pub fn locate(&self, column: usize, value: i64) -> Vec<RID> {
        let mut result: Vec<RID> = self.trees[column]
            .get(&value)
            .map(|set| set.iter().copied().collect())
            .unwrap_or_default();
        result.sort();
        result
    }

    /// RIDs whose latest value in `column` falls in `[start, end]` inclusive,
    /// in sorted order.
    pub fn locate_range(&self, column: usize, start: i64, end: i64) -> Vec<RID> {
        let mut result = Vec::new();
        for (_, set) in self.trees[column].range((Included(&start), Included(&end))) {
            result.extend(set.iter().copied());
        }
        result.sort();
        result
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn locate_and_range_lookup() {
        let mut index = Index::new(3, 0);
        let a = RID::base(0, 0, 0);
        let b = RID::base(0, 0, 1);
        let c = RID::base(0, 0, 2);

        index.insert(0, 5, a);
        index.insert(0, 7, b);
        index.insert(0, 9, c);

        assert_eq!(index.locate(0, 7), vec![b]);
        assert_eq!(index.locate(0, 8), vec![]);
        assert_eq!(index.locate_range(0, 5, 8), vec![a, b]);
        assert_eq!(index.locate_range(0, 0, 100), vec![a, b, c]);
    }

    #[test]
    fn update_moves_mapping() {
        let mut index = Index::new(2, 0);
        let rid = RID::base(0, 0, 0);

        index.insert(1, 10, rid);
        index.update(1, 10, 20, rid);

        assert_eq!(index.locate(1, 10), vec![]);
        assert_eq!(index.locate(1, 20), vec![rid]);
    }

    #[test]
    fn remove_row_reports_removed_pairs() {
        let mut index = Index::new(3, 0);
        index.enable(2).unwrap();
        let rid = RID::base(0, 0, 0);

        index.insert_row(&[1, 2, 3], rid);
        let removed = index.remove_row(&[1, 2, 3], rid);

        assert_eq!(removed, vec![(0, 1), (2, 3)]);
        assert_eq!(index.locate(0, 1), vec![]);
        assert_eq!(index.locate(2, 3), vec![]);
    }

    #[test]
    fn key_index_cannot_be_dropped() {
        let mut index = Index::new(2, 0);
        assert!(index.disable(0).is_err());
        assert!(index.disable(1).is_ok());
    }
}
