// Copyright 2026 Silo Team
//
// Licensed under the Apache License, Version 2.0 (the "License");
// you may not use this file except in compliance with the License.
// You may obtain a copy of the License at
//
//     http://www.apache.org/licenses/LICENSE-2.0
//
// Unless required by applicable law or agreed to in writing, software
// distributed under the License is distributed on an "AS IS" BASIS,
// WITHOUT WARRANTIES OR CONDITIONS OF ANY KIND, either express or implied.
// See the License for the specific language governing permissions and
// limitations under the License.

//! Needle maps: `needle_id -> (offset, size)` within one volume.
//!
//! Two implementations share one contract: an in-memory map rebuilt from the
//! `.idx` file at open, and a redb-backed map for volumes too large to keep
//! in RAM. Offsets are stored in units of 8 bytes so a u32 addresses 32 GiB.

use crate::error::StorageError;
use crate::needle::codec::frame_size;
use crate::types::NeedleId;
use redb::{Database, ReadableTable, TableDefinition};
use std::collections::HashMap;
use std::path::Path;

/// Location and size of one needle inside a volume.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct NeedleValue {
    /// Offset of the frame in 8-byte units.
    pub offset: u32,
    /// Body size from the frame header.
    pub size: u32,
}

impl NeedleValue {
    /// Byte offset of the frame in the `.dat` file.
    pub fn byte_offset(&self) -> u64 {
        self.offset as u64 * 8
    }

    /// Padded length of the whole frame in bytes.
    pub fn frame_bytes(&self) -> u64 {
        frame_size(self.size)
    }
}

/// The shared contract of all needle map implementations.
///
/// `deleted_bytes` accounts whole frames (including overhead and padding) of
/// deleted or overwritten needles, so it measures reclaimable `.dat` bytes.
pub trait NeedleMap: Send + Sync {
    /// Inserts or overwrites an entry. An overwrite counts the previous
    /// frame as garbage and returns it.
    fn put(&mut self, id: NeedleId, value: NeedleValue)
        -> Result<Option<NeedleValue>, StorageError>;

    /// Looks up an entry.
    fn get(&self, id: NeedleId) -> Result<Option<NeedleValue>, StorageError>;

    /// Removes an entry, counting its frame as garbage. Deleting an absent
    /// id is a no-op, so double deletes never double-count.
    fn delete(&mut self, id: NeedleId) -> Result<Option<NeedleValue>, StorageError>;

    /// Visits live entries in insertion order (compaction relies on this).
    fn visit(
        &self,
        f: &mut dyn FnMut(NeedleId, NeedleValue) -> Result<(), StorageError>,
    ) -> Result<(), StorageError>;

    /// Number of live entries.
    fn live_count(&self) -> u64;

    /// Number of deletions and overwrites recorded.
    fn deleted_count(&self) -> u64;

    /// Reclaimable bytes from deletions and overwrites.
    fn deleted_bytes(&self) -> u64;
}

/// In-memory needle map: a hash map plus an insertion-order journal.
#[derive(Default)]
pub struct MemoryNeedleMap {
    entries: HashMap<NeedleId, NeedleValue>,
    journal: Vec<(NeedleId, NeedleValue)>,
    deleted_count: u64,
    deleted_bytes: u64,
}

impl MemoryNeedleMap {
    /// Creates an empty map.
    pub fn new() -> Self {
        Self::default()
    }
}

impl NeedleMap for MemoryNeedleMap {
    fn put(
        &mut self,
        id: NeedleId,
        value: NeedleValue,
    ) -> Result<Option<NeedleValue>, StorageError> {
        let prev = self.entries.insert(id, value);
        self.journal.push((id, value));
        if let Some(prev) = prev {
            self.deleted_count += 1;
            self.deleted_bytes += prev.frame_bytes();
        }
        Ok(prev)
    }

    fn get(&self, id: NeedleId) -> Result<Option<NeedleValue>, StorageError> {
        Ok(self.entries.get(&id).copied())
    }

    fn delete(&mut self, id: NeedleId) -> Result<Option<NeedleValue>, StorageError> {
        let prev = self.entries.remove(&id);
        if let Some(prev) = prev {
            self.deleted_count += 1;
            self.deleted_bytes += prev.frame_bytes();
        }
        Ok(prev)
    }

    fn visit(
        &self,
        f: &mut dyn FnMut(NeedleId, NeedleValue) -> Result<(), StorageError>,
    ) -> Result<(), StorageError> {
        for (id, value) in &self.journal {
            // Only the journal entry that is still current is live.
            if self.entries.get(id) == Some(value) {
                f(*id, *value)?;
            }
        }
        Ok(())
    }

    fn live_count(&self) -> u64 {
        self.entries.len() as u64
    }

    fn deleted_count(&self) -> u64 {
        self.deleted_count
    }

    fn deleted_bytes(&self) -> u64 {
        self.deleted_bytes
    }
}

const NEEDLE_TABLE: TableDefinition<u64, (u32, u32)> = TableDefinition::new("needles");
const JOURNAL_TABLE: TableDefinition<u64, (u64, u32, u32)> = TableDefinition::new("journal");

/// redb-backed needle map for volumes whose index exceeds RAM.
///
/// The journal table keeps insertion order for `visit`; counters are
/// recomputed from the `.idx` replay at open, so they live in memory only.
pub struct RedbNeedleMap {
    db: Database,
    next_seq: u64,
    live: u64,
    deleted_count: u64,
    deleted_bytes: u64,
}

impl RedbNeedleMap {
    /// Creates or opens the map database at `path`.
    pub fn open(path: &Path) -> Result<Self, StorageError> {
        let db = Database::create(path).map_err(|e| StorageError::NeedleMap(e.to_string()))?;
        let txn = db
            .begin_write()
            .map_err(|e| StorageError::NeedleMap(e.to_string()))?;
        {
            txn.open_table(NEEDLE_TABLE)
                .map_err(|e| StorageError::NeedleMap(e.to_string()))?;
            txn.open_table(JOURNAL_TABLE)
                .map_err(|e| StorageError::NeedleMap(e.to_string()))?;
        }
        txn.commit()
            .map_err(|e| StorageError::NeedleMap(e.to_string()))?;
        Ok(Self {
            db,
            next_seq: 0,
            live: 0,
            deleted_count: 0,
            deleted_bytes: 0,
        })
    }
}

fn map_err<E: std::fmt::Display>(e: E) -> StorageError {
    StorageError::NeedleMap(e.to_string())
}

impl NeedleMap for RedbNeedleMap {
    fn put(
        &mut self,
        id: NeedleId,
        value: NeedleValue,
    ) -> Result<Option<NeedleValue>, StorageError> {
        let txn = self.db.begin_write().map_err(map_err)?;
        let prev = {
            let mut table = txn.open_table(NEEDLE_TABLE).map_err(map_err)?;
            let prev = table
                .insert(id, (value.offset, value.size))
                .map_err(map_err)?
                .map(|guard| {
                    let (offset, size) = guard.value();
                    NeedleValue { offset, size }
                });
            let mut journal = txn.open_table(JOURNAL_TABLE).map_err(map_err)?;
            journal
                .insert(self.next_seq, (id, value.offset, value.size))
                .map_err(map_err)?;
            prev
        };
        txn.commit().map_err(map_err)?;
        self.next_seq += 1;
        match prev {
            Some(prev) => {
                self.deleted_count += 1;
                self.deleted_bytes += prev.frame_bytes();
            }
            None => self.live += 1,
        }
        Ok(prev)
    }

    fn get(&self, id: NeedleId) -> Result<Option<NeedleValue>, StorageError> {
        let txn = self.db.begin_read().map_err(map_err)?;
        let table = txn.open_table(NEEDLE_TABLE).map_err(map_err)?;
        Ok(table.get(id).map_err(map_err)?.map(|guard| {
            let (offset, size) = guard.value();
            NeedleValue { offset, size }
        }))
    }

    fn delete(&mut self, id: NeedleId) -> Result<Option<NeedleValue>, StorageError> {
        let txn = self.db.begin_write().map_err(map_err)?;
        let prev = {
            let mut table = txn.open_table(NEEDLE_TABLE).map_err(map_err)?;
            let removed = table.remove(id).map_err(map_err)?.map(|guard| {
                let (offset, size) = guard.value();
                NeedleValue { offset, size }
            });
            removed
        };
        txn.commit().map_err(map_err)?;
        if let Some(prev) = prev {
            self.live = self.live.saturating_sub(1);
            self.deleted_count += 1;
            self.deleted_bytes += prev.frame_bytes();
        }
        Ok(prev)
    }

    fn visit(
        &self,
        f: &mut dyn FnMut(NeedleId, NeedleValue) -> Result<(), StorageError>,
    ) -> Result<(), StorageError> {
        let txn = self.db.begin_read().map_err(map_err)?;
        let journal = txn.open_table(JOURNAL_TABLE).map_err(map_err)?;
        let table = txn.open_table(NEEDLE_TABLE).map_err(map_err)?;
        for item in journal.iter().map_err(map_err)? {
            let (_, entry) = item.map_err(map_err)?;
            let (id, offset, size) = entry.value();
            let value = NeedleValue { offset, size };
            let current = table.get(id).map_err(map_err)?.map(|guard| {
                let (offset, size) = guard.value();
                NeedleValue { offset, size }
            });
            if current == Some(value) {
                f(id, value)?;
            }
        }
        Ok(())
    }

    fn live_count(&self) -> u64 {
        self.live
    }

    fn deleted_count(&self) -> u64 {
        self.deleted_count
    }

    fn deleted_bytes(&self) -> u64 {
        self.deleted_bytes
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;

    fn value(offset: u32, size: u32) -> NeedleValue {
        NeedleValue { offset, size }
    }

    fn exercise_contract(map: &mut dyn NeedleMap) {
        assert_eq!(map.get(1).unwrap(), None);

        assert_eq!(map.put(1, value(1, 100)).unwrap(), None);
        assert_eq!(map.put(2, value(20, 50)).unwrap(), None);
        assert_eq!(map.get(1).unwrap(), Some(value(1, 100)));
        assert_eq!(map.live_count(), 2);
        assert_eq!(map.deleted_bytes(), 0);

        // Overwrite counts the old frame as garbage.
        let prev = map.put(1, value(40, 100)).unwrap().unwrap();
        assert_eq!(prev, value(1, 100));
        assert_eq!(map.deleted_count(), 1);
        assert_eq!(map.deleted_bytes(), frame_size(100));
        assert_eq!(map.live_count(), 2);

        // Delete, then a second delete is a no-op.
        let prev = map.delete(2).unwrap().unwrap();
        assert_eq!(prev, value(20, 50));
        let bytes_after_delete = map.deleted_bytes();
        assert_eq!(map.delete(2).unwrap(), None);
        assert_eq!(map.deleted_bytes(), bytes_after_delete);
        assert_eq!(map.deleted_count(), 2);
        assert_eq!(map.live_count(), 1);

        // Visit sees only the live, current entry.
        let mut seen = Vec::new();
        map.visit(&mut |id, v| {
            seen.push((id, v));
            Ok(())
        })
        .unwrap();
        assert_eq!(seen, vec![(1, value(40, 100))]);
    }

    #[test]
    fn test_memory_map_contract() {
        let mut map = MemoryNeedleMap::new();
        exercise_contract(&mut map);
    }

    #[test]
    fn test_redb_map_contract() {
        let dir = TempDir::new().unwrap();
        let mut map = RedbNeedleMap::open(&dir.path().join("map.redb")).unwrap();
        exercise_contract(&mut map);
    }

    #[test]
    fn test_visit_insertion_order() {
        let mut map = MemoryNeedleMap::new();
        for (i, id) in [5u64, 3, 9, 1].iter().enumerate() {
            map.put(*id, value(i as u32 + 1, 10)).unwrap();
        }
        let mut order = Vec::new();
        map.visit(&mut |id, _| {
            order.push(id);
            Ok(())
        })
        .unwrap();
        assert_eq!(order, vec![5, 3, 9, 1]);
    }
}
