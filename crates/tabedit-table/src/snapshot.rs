//! Bounded version history for one thread's table
//!
//! [`SnapshotStore`] keeps the committed table plus earlier versions so a
//! thread can roll back. Versions increase monotonically, also across
//! rollbacks; the oldest snapshots are evicted once the limit is reached.

use crate::error::SnapshotError;
use crate::fingerprint::TableFingerprint;
use crate::table::Table;
use std::collections::VecDeque;

/// One committed table version
#[derive(Debug, Clone, PartialEq)]
pub struct Snapshot {
    /// Monotonic version number
    pub version: u64,
    /// Table content
    pub table: Table,
    /// Content fingerprint
    pub fingerprint: TableFingerprint,
    /// What produced this version
    pub label: String,
}

/// Snapshot history, newest last
#[derive(Debug, Clone)]
pub struct SnapshotStore {
    history: VecDeque<Snapshot>,
    limit: usize,
    /// Highest version ever issued
    latest: u64,
}

impl SnapshotStore {
    /// Start a history at `version` with the given table
    ///
    /// A `limit` of zero is treated as one.
    #[must_use]
    pub fn new(table: Table, version: u64, limit: usize) -> Self {
        let mut history = VecDeque::new();
        history.push_back(Snapshot {
            version,
            fingerprint: TableFingerprint::of(&table),
            table,
            label: "initial".to_string(),
        });
        Self {
            history,
            limit: limit.max(1),
            latest: version,
        }
    }

    /// Current (newest) snapshot
    #[must_use]
    pub fn current(&self) -> &Snapshot {
        // history is never empty: new() seeds it and eviction keeps one
        &self.history[self.history.len() - 1]
    }

    /// Current version number
    #[inline]
    #[must_use]
    pub fn version(&self) -> u64 {
        self.current().version
    }

    /// Commit a new version and return its number
    pub fn commit(&mut self, table: Table, label: impl Into<String>) -> u64 {
        let version = self.latest + 1;
        self.latest = version;
        self.history.push_back(Snapshot {
            version,
            fingerprint: TableFingerprint::of(&table),
            table,
            label: label.into(),
        });
        while self.history.len() > self.limit {
            self.history.pop_front();
        }
        version
    }

    /// Replace the history head when the caller supplies an edited table
    ///
    /// Returns the version the table is now known by. An unchanged table
    /// keeps its version.
    pub fn sync(&mut self, table: &Table) -> u64 {
        if TableFingerprint::of(table) == self.current().fingerprint {
            return self.version();
        }
        self.commit(table.clone(), "external edit")
    }

    /// Look up a retained version
    #[must_use]
    pub fn get(&self, version: u64) -> Option<&Snapshot> {
        self.history.iter().find(|s| s.version == version)
    }

    /// Roll back to `version`, discarding every newer snapshot
    ///
    /// # Errors
    /// Returns `SnapshotError::UnknownVersion` if the version is not retained
    pub fn rollback(&mut self, version: u64) -> Result<&Snapshot, SnapshotError> {
        let position = self
            .history
            .iter()
            .position(|s| s.version == version)
            .ok_or(SnapshotError::UnknownVersion(version))?;
        self.history.truncate(position + 1);
        Ok(self.current())
    }

    /// Roll back one version
    ///
    /// # Errors
    /// Returns `SnapshotError::NothingToUndo` when only one version is retained
    pub fn undo(&mut self) -> Result<&Snapshot, SnapshotError> {
        if self.history.len() < 2 {
            return Err(SnapshotError::NothingToUndo);
        }
        self.history.pop_back();
        Ok(self.current())
    }

    /// Retained version numbers, oldest first
    #[must_use]
    pub fn versions(&self) -> Vec<u64> {
        self.history.iter().map(|s| s.version).collect()
    }

    /// Number of retained snapshots
    #[inline]
    #[must_use]
    pub fn len(&self) -> usize {
        self.history.len()
    }

    /// Always false; a store holds at least one snapshot
    #[inline]
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.history.is_empty()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::table::row;
    use crate::value::Value;

    fn table(n: f64) -> Table {
        Table::from_rows(["A"], [row([("A", Value::Number(n))])]).unwrap()
    }

    #[test]
    fn commit_bumps_version() {
        let mut store = SnapshotStore::new(table(1.0), 0, 5);
        assert_eq!(store.commit(table(2.0), "edit"), 1);
        assert_eq!(store.version(), 1);
        assert_eq!(store.current().table, table(2.0));
    }

    #[test]
    fn eviction_keeps_limit() {
        let mut store = SnapshotStore::new(table(0.0), 0, 2);
        store.commit(table(1.0), "a");
        store.commit(table(2.0), "b");
        assert_eq!(store.versions(), vec![1, 2]);
        assert!(store.get(0).is_none());
    }

    #[test]
    fn rollback_truncates_newer() {
        let mut store = SnapshotStore::new(table(0.0), 0, 10);
        store.commit(table(1.0), "a");
        store.commit(table(2.0), "b");
        let snap = store.rollback(1).unwrap();
        assert_eq!(snap.table, table(1.0));
        assert_eq!(store.versions(), vec![0, 1]);
        assert_eq!(store.rollback(7), Err(SnapshotError::UnknownVersion(7)));
        assert_eq!(store.commit(table(3.0), "c"), 3);
    }

    #[test]
    fn undo_stops_at_oldest() {
        let mut store = SnapshotStore::new(table(0.0), 3, 10);
        store.commit(table(1.0), "a");
        assert_eq!(store.undo().unwrap().version, 3);
        assert_eq!(store.undo(), Err(SnapshotError::NothingToUndo));
    }

    #[test]
    fn sync_detects_external_edits() {
        let mut store = SnapshotStore::new(table(0.0), 0, 10);
        assert_eq!(store.sync(&table(0.0)), 0);
        assert_eq!(store.sync(&table(5.0)), 1);
        assert_eq!(store.current().label, "external edit");
    }
}
