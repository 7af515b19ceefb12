use std::collections::HashSet;
use std::sync::{Mutex, MutexGuard};

use tracing::{debug, error, info, warn};

use crate::db::KeyValueStore;
use crate::error::StoreError;
use crate::models::ReceiptRecord;
use crate::utils::now_millis;

pub const STORAGE_KEY: &str = "savedReceipts";

/// In-memory receipt collection mirrored to a key-value backend.
///
/// Every mutation runs under one lock over the whole collection and ends
/// with a full rewrite of the persisted array. Persistence is best effort:
/// a failed write is logged and the in-memory collection stays
/// authoritative for the rest of the session.
pub struct ReceiptStore {
    inner: Mutex<StoreInner>,
}

struct StoreInner {
    records: Vec<ReceiptRecord>,
    backend: Box<dyn KeyValueStore>,
    last_id: i64,
}

impl StoreInner {
    fn persist(&mut self) {
        match save(self.backend.as_mut(), &self.records) {
            Ok(()) => debug!(count = self.records.len(), "Saved receipts"),
            Err(err) => error!(error = %err, "Failed to save receipts"),
        }
    }
}

impl ReceiptStore {
    pub fn open(backend: Box<dyn KeyValueStore>) -> Self {
        let mut records = load(backend.as_ref());
        let mut seen = HashSet::new();
        records.retain(|record| {
            let fresh = seen.insert(record.id);
            if !fresh {
                warn!(id = record.id, "Dropping receipt with duplicate id");
            }
            fresh
        });
        let last_id = records.iter().map(|r| r.id).max().unwrap_or(0);
        info!(count = records.len(), "Loaded receipts");

        ReceiptStore {
            inner: Mutex::new(StoreInner {
                records,
                backend,
                last_id,
            }),
        }
    }

    fn lock(&self) -> Result<MutexGuard<'_, StoreInner>, StoreError> {
        self.inner.lock().map_err(|_| StoreError::LockPoisoned)
    }

    pub fn records(&self) -> Result<Vec<ReceiptRecord>, StoreError> {
        Ok(self.lock()?.records.clone())
    }

    pub fn pending(&self) -> Result<Vec<ReceiptRecord>, StoreError> {
        Ok(self
            .lock()?
            .records
            .iter()
            .filter(|r| r.is_pending())
            .cloned()
            .collect())
    }

    pub fn get(&self, id: i64) -> Result<Option<ReceiptRecord>, StoreError> {
        Ok(self.lock()?.records.iter().find(|r| r.id == id).cloned())
    }

    pub fn len(&self) -> Result<usize, StoreError> {
        Ok(self.lock()?.records.len())
    }

    pub fn is_empty(&self) -> Result<bool, StoreError> {
        Ok(self.len()? == 0)
    }

    /// Applies `f` to a working copy of the collection, then swaps it in and
    /// writes it out once. A change that would leave two records sharing an
    /// id is rejected and nothing is written.
    pub fn mutate<R>(&self, f: impl FnOnce(&mut Vec<ReceiptRecord>) -> R) -> Result<R, StoreError> {
        let mut inner = self.lock()?;
        let mut working = inner.records.clone();
        let result = f(&mut working);

        let mut seen = HashSet::with_capacity(working.len());
        if let Some(dup) = working.iter().find(|r| !seen.insert(r.id)) {
            return Err(StoreError::DuplicateId(dup.id));
        }

        if let Some(max_id) = working.iter().map(|r| r.id).max() {
            inner.last_id = inner.last_id.max(max_id);
        }
        inner.records = working;
        inner.persist();
        Ok(result)
    }

    pub fn add(&self, record: ReceiptRecord) -> Result<(), StoreError> {
        self.mutate(|records| records.push(record))
    }

    /// Removes the record with `id` in either state. Returns whether one existed.
    pub fn delete(&self, id: i64) -> Result<bool, StoreError> {
        self.mutate(|records| {
            let before = records.len();
            records.retain(|r| r.id != id);
            records.len() != before
        })
    }

    /// Hands out a creation id: the current timestamp in milliseconds plus
    /// `offset`, bumped past every id already issued so ids stay unique
    /// when several are taken within the same millisecond.
    pub fn allocate_id(&self, offset: i64) -> Result<i64, StoreError> {
        let mut inner = self.lock()?;
        let id = (now_millis() + offset).max(inner.last_id + 1);
        inner.last_id = id;
        Ok(id)
    }
}

/// Reads the persisted collection. Missing data, backend errors and
/// unparsable payloads all yield an empty collection.
pub fn load(backend: &dyn KeyValueStore) -> Vec<ReceiptRecord> {
    match backend.get_item(STORAGE_KEY) {
        Ok(Some(raw)) => match serde_json::from_str::<Vec<ReceiptRecord>>(&raw) {
            Ok(records) => records,
            Err(err) => {
                error!(error = %err, "Failed to parse stored receipts");
                Vec::new()
            }
        },
        Ok(None) => Vec::new(),
        Err(err) => {
            error!(error = %err, "Failed to load receipts");
            Vec::new()
        }
    }
}

/// Overwrites the persisted collection wholesale.
pub fn save(backend: &mut dyn KeyValueStore, records: &[ReceiptRecord]) -> Result<(), StoreError> {
    let payload = serde_json::to_string(records)?;
    backend.set_item(STORAGE_KEY, &payload)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::db::{Database, MemoryKeyValueStore};
    use crate::models::{Currency, EncodedImage, LineItem, ReceiptData};

    fn data(merchant: &str, total: f64) -> ReceiptData {
        ReceiptData {
            merchant_name: merchant.to_string(),
            transaction_date: "2024-05-01".to_string(),
            currency: Currency::USD,
            total_amount: total,
            tax_amount: 0.75,
            line_items: vec![LineItem {
                description: "Item".to_string(),
                amount: total,
            }],
        }
    }

    fn pending(id: i64) -> ReceiptRecord {
        ReceiptRecord::pending(
            id,
            "Pending Sync".to_string(),
            "2024-05-01".to_string(),
            Currency::INR,
            EncodedImage {
                data: "iVBORw0KGgo=".to_string(),
                mime_type: "image/png".to_string(),
            },
        )
    }

    #[test]
    fn empty_backend_loads_empty() {
        let store = ReceiptStore::open(Box::new(MemoryKeyValueStore::new()));
        assert!(store.is_empty().unwrap());
    }

    #[test]
    fn corrupt_payload_loads_empty() {
        let backend = MemoryKeyValueStore::new();
        backend.insert_raw(STORAGE_KEY, "{not json");
        let store = ReceiptStore::open(Box::new(backend.clone()));
        assert!(store.is_empty().unwrap());
        assert_eq!(backend.writes(), 0);
    }

    #[test]
    fn every_mutation_rewrites_the_collection() {
        let backend = MemoryKeyValueStore::new();
        let store = ReceiptStore::open(Box::new(backend.clone()));
        store.add(ReceiptRecord::synced(1, data("A", 10.0))).unwrap();
        store.add(pending(2)).unwrap();
        assert_eq!(backend.writes(), 2);

        let reloaded = load(&backend);
        assert_eq!(reloaded, store.records().unwrap());
    }

    #[test]
    fn save_of_load_is_a_fixed_point() {
        let backend = MemoryKeyValueStore::new();
        let store = ReceiptStore::open(Box::new(backend.clone()));
        store.add(ReceiptRecord::synced(1, data("Grocer", 41.37))).unwrap();
        store.add(pending(2)).unwrap();
        let before = backend.raw(STORAGE_KEY).unwrap();

        let mut writer = backend.clone();
        save(&mut writer, &load(&backend)).unwrap();
        assert_eq!(backend.raw(STORAGE_KEY).unwrap(), before);
    }

    #[test]
    fn duplicate_ids_are_rejected() {
        let backend = MemoryKeyValueStore::new();
        let store = ReceiptStore::open(Box::new(backend.clone()));
        store.add(pending(5)).unwrap();
        let err = store.add(ReceiptRecord::synced(5, data("B", 1.0))).unwrap_err();
        assert!(matches!(err, StoreError::DuplicateId(5)));
        assert_eq!(store.len().unwrap(), 1);
        assert_eq!(backend.writes(), 1);
    }

    #[test]
    fn write_failure_keeps_memory_state() {
        let backend = MemoryKeyValueStore::new();
        let store = ReceiptStore::open(Box::new(backend.clone()));
        backend.set_fail_writes(true);
        store.add(pending(9)).unwrap();
        assert_eq!(store.len().unwrap(), 1);
        assert_eq!(backend.raw(STORAGE_KEY), None);
    }

    #[test]
    fn delete_removes_either_state() {
        let store = ReceiptStore::open(Box::new(MemoryKeyValueStore::new()));
        store.add(ReceiptRecord::synced(1, data("A", 3.0))).unwrap();
        store.add(pending(2)).unwrap();
        assert!(store.delete(2).unwrap());
        assert!(store.delete(1).unwrap());
        assert!(!store.delete(1).unwrap());
        assert!(store.is_empty().unwrap());
    }

    #[test]
    fn allocated_ids_are_distinct_and_above_existing() {
        let backend = MemoryKeyValueStore::new();
        let far_future = now_millis() + 1_000_000;
        let mut seeded = backend.clone();
        save(&mut seeded, &[pending(far_future)]).unwrap();

        let store = ReceiptStore::open(Box::new(backend));
        let ids: Vec<i64> = (0..50).map(|_| store.allocate_id(0).unwrap()).collect();
        let unique: HashSet<i64> = ids.iter().copied().collect();
        assert_eq!(unique.len(), ids.len());
        assert!(ids.iter().all(|id| *id > far_future));
    }

    #[test]
    fn duplicate_ids_in_storage_are_dropped_on_open() {
        let backend = MemoryKeyValueStore::new();
        let mut seeded = backend.clone();
        save(&mut seeded, &[pending(3), pending(3), pending(4)]).unwrap();
        let store = ReceiptStore::open(Box::new(backend));
        assert_eq!(store.len().unwrap(), 2);
    }

    #[test]
    fn sqlite_backend_survives_reopen() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("receipts.sqlite");
        {
            let store = ReceiptStore::open(Box::new(Database::new(path.clone()).unwrap()));
            store.add(ReceiptRecord::synced(11, data("Bakery", 8.2))).unwrap();
        }
        let store = ReceiptStore::open(Box::new(Database::new(path).unwrap()));
        let record = store.get(11).unwrap().unwrap();
        assert_eq!(record.data.merchant_name, "Bakery");
    }
}
