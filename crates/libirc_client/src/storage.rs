//! Per-key JSON document storage with commit-on-drop dirty checking, grounded on `pyaib/db.py`'s
//! `Persist`/`PersistentStorage`.
//!
//! `pyaib` ships a concrete flat-file (`shelve`) backend; this crate doesn't (the Non-goal in §1
//! is explicit: no bundled storage driver). Callers instead implement [`StorageDriver`] against
//! whatever they already use — sqlite, redis, a flat file, an in-memory map for tests — and hand
//! it to [`Storage::new`].
//!
//! An [`Item`] is a handle to one bucket's worth of JSON state (`pyaib`'s per-plugin `self.db`
//! namespace). It tracks a SHA-256 hash of the value as last read; [`Item::commit`] only writes
//! back to the driver if that hash has changed, which is cheap because `serde_json`'s default
//! `Map` (no `preserve_order` feature) is `BTreeMap`-backed and so always serializes keys in
//! sorted order — the same determinism `pyaib`'s `json.dumps(..., sort_keys=True)` gets on
//! purpose, here for free.

use sha2::{Digest, Sha256};
use std::rc::Rc;

use crate::error::StorageError;

/// Implemented by the embedding application over whatever storage medium it actually uses.
/// `bucket` is a storage namespace (`pyaib`'s `db['bucket_name']`); `key` is a document within it.
pub trait StorageDriver {
    fn load(&self, bucket: &str, key: &str) -> Result<Option<serde_json::Value>, StorageError>;
    fn save(&self, bucket: &str, key: &str, value: &serde_json::Value) -> Result<(), StorageError>;
    /// Rename a bucket or a key within one, used when [`Item::commit`] observes the caller moved
    /// the value to a different bucket/key since it was loaded.
    fn rename(
        &self,
        old_bucket: &str,
        old_key: &str,
        new_bucket: &str,
        new_key: &str,
    ) -> Result<(), StorageError>;
    /// Remove a document. Used by [`Item::commit`] to clean up the old slot when a value is
    /// written to a new bucket/key rather than merely renamed.
    fn delete(&self, bucket: &str, key: &str) -> Result<(), StorageError>;
    /// Every `(key, value)` pair currently stored in `bucket`. `pyaib`'s `getAllObjects` hands
    /// back a lazy generator; drivers here return a fully materialized `Vec` instead, since the
    /// trait needs to stay object-safe (`dyn StorageDriver`) and an associated iterator type
    /// would rule that out.
    fn load_all(&self, bucket: &str) -> Result<Vec<(String, serde_json::Value)>, StorageError>;
}

fn hash_value(value: &serde_json::Value) -> Result<[u8; 32], StorageError> {
    let serialized = serde_json::to_string(value).map_err(StorageError::Serialize)?;
    let mut hasher = Sha256::new();
    hasher.update(serialized.as_bytes());
    Ok(hasher.finalize().into())
}

/// A handle to one document, checked out of [`Storage`]. Mutate `value` freely; call
/// [`Item::commit`] (or let it run automatically via [`Storage::with_item`]) to persist changes.
pub struct Item {
    driver: Rc<dyn StorageDriver>,
    bucket: String,
    key: String,
    baseline_hash: Option<[u8; 32]>,
    pub value: serde_json::Value,
}

impl Item {
    /// Write the current `value` back if it differs from what was loaded, or relocate the
    /// driver-side record if `bucket`/`key` were changed on this handle since it was checked out.
    /// Mirrors `pyaib/db.py`'s precedence: a changed value wins over a pending rename, a bucket
    /// rename wins over a bare key rename, and an unchanged value in its original slot is a no-op.
    pub fn commit(&mut self, new_bucket: &str, new_key: &str) -> Result<(), StorageError> {
        let current_hash = hash_value(&self.value)?;
        let value_changed = self.baseline_hash != Some(current_hash);
        let falsy = self.value.is_null();
        let moved = (new_bucket, new_key) != (self.bucket.as_str(), self.key.as_str());

        if value_changed {
            if falsy {
                self.driver.delete(&self.bucket, &self.key)?;
            } else {
                self.driver.save(new_bucket, new_key, &self.value)?;
                if moved {
                    self.driver.delete(&self.bucket, &self.key)?;
                }
            }
        } else if moved {
            if falsy {
                self.driver.delete(&self.bucket, &self.key)?;
            } else {
                self.driver
                    .rename(&self.bucket, &self.key, new_bucket, new_key)?;
            }
        } else {
            return Ok(());
        }

        self.bucket = new_bucket.to_owned();
        self.key = new_key.to_owned();
        self.baseline_hash = Some(hash_value(&self.value)?);
        Ok(())
    }

    pub fn bucket(&self) -> &str {
        &self.bucket
    }

    pub fn key(&self) -> &str {
        &self.key
    }
}

/// The facade every component/plugin goes through to read and write its own JSON state.
pub struct Storage {
    driver: Rc<dyn StorageDriver>,
}

impl Storage {
    pub fn new(driver: Rc<dyn StorageDriver>) -> Storage {
        Storage { driver }
    }

    /// Load `bucket`/`key`, defaulting to `serde_json::Value::Null` if nothing is stored there
    /// yet (matching `pyaib`'s behavior of handing back an empty dict for a never-seen key).
    pub fn item(&self, bucket: &str, key: &str) -> Result<Item, StorageError> {
        let value = self
            .driver
            .load(bucket, key)?
            .unwrap_or(serde_json::Value::Null);
        let baseline_hash = Some(hash_value(&value)?);
        Ok(Item {
            driver: self.driver.clone(),
            bucket: bucket.to_owned(),
            key: key.to_owned(),
            baseline_hash,
            value,
        })
    }

    /// Every document currently stored in `bucket`.
    pub fn all(&self, bucket: &str) -> Result<Vec<(String, serde_json::Value)>, StorageError> {
        self.driver.load_all(bucket)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::cell::RefCell as StdRefCell;
    use std::collections::HashMap;

    #[derive(Default)]
    struct MemoryDriver {
        data: StdRefCell<HashMap<(String, String), serde_json::Value>>,
    }

    impl StorageDriver for MemoryDriver {
        fn load(&self, bucket: &str, key: &str) -> Result<Option<serde_json::Value>, StorageError> {
            Ok(self
                .data
                .borrow()
                .get(&(bucket.to_owned(), key.to_owned()))
                .cloned())
        }

        fn save(
            &self,
            bucket: &str,
            key: &str,
            value: &serde_json::Value,
        ) -> Result<(), StorageError> {
            self.data
                .borrow_mut()
                .insert((bucket.to_owned(), key.to_owned()), value.clone());
            Ok(())
        }

        fn rename(
            &self,
            old_bucket: &str,
            old_key: &str,
            new_bucket: &str,
            new_key: &str,
        ) -> Result<(), StorageError> {
            let mut data = self.data.borrow_mut();
            if let Some(value) = data.remove(&(old_bucket.to_owned(), old_key.to_owned())) {
                data.insert((new_bucket.to_owned(), new_key.to_owned()), value);
            }
            Ok(())
        }

        fn delete(&self, bucket: &str, key: &str) -> Result<(), StorageError> {
            self.data
                .borrow_mut()
                .remove(&(bucket.to_owned(), key.to_owned()));
            Ok(())
        }

        fn load_all(&self, bucket: &str) -> Result<Vec<(String, serde_json::Value)>, StorageError> {
            Ok(self
                .data
                .borrow()
                .iter()
                .filter(|((b, _), _)| b == bucket)
                .map(|((_, k), v)| (k.clone(), v.clone()))
                .collect())
        }
    }

    #[test]
    fn commit_is_a_no_op_when_value_and_slot_are_unchanged() {
        let driver = Rc::new(MemoryDriver::default());
        driver
            .save("karma", "alice", &serde_json::json!({"score": 3}))
            .unwrap();
        let storage = Storage::new(driver.clone());

        let mut item = storage.item("karma", "alice").unwrap();
        item.commit("karma", "alice").unwrap();

        assert_eq!(driver.data.borrow().len(), 1);
    }

    #[test]
    fn commit_writes_back_when_value_changed() {
        let driver = Rc::new(MemoryDriver::default());
        let storage = Storage::new(driver.clone());

        let mut item = storage.item("karma", "alice").unwrap();
        item.value = serde_json::json!({"score": 1});
        item.commit("karma", "alice").unwrap();

        let stored = driver.load("karma", "alice").unwrap().unwrap();
        assert_eq!(stored, serde_json::json!({"score": 1}));
    }

    #[test]
    fn commit_renames_the_driver_record_when_only_the_key_moved() {
        let driver = Rc::new(MemoryDriver::default());
        driver
            .save("karma", "alice", &serde_json::json!({"score": 3}))
            .unwrap();
        let storage = Storage::new(driver.clone());

        let mut item = storage.item("karma", "alice").unwrap();
        item.commit("karma", "alice_renamed").unwrap();

        assert!(driver.load("karma", "alice").unwrap().is_none());
        assert_eq!(
            driver.load("karma", "alice_renamed").unwrap().unwrap(),
            serde_json::json!({"score": 3})
        );
    }

    #[test]
    fn commit_deletes_the_record_when_the_value_is_set_to_null() {
        let driver = Rc::new(MemoryDriver::default());
        driver
            .save("karma", "alice", &serde_json::json!({"score": 3}))
            .unwrap();
        let storage = Storage::new(driver.clone());

        let mut item = storage.item("karma", "alice").unwrap();
        item.value = serde_json::Value::Null;
        item.commit("karma", "alice").unwrap();

        assert!(driver.load("karma", "alice").unwrap().is_none());
    }

    #[test]
    fn commit_deletes_the_old_slot_when_a_null_value_is_also_moved() {
        let driver = Rc::new(MemoryDriver::default());
        driver
            .save("karma", "alice", &serde_json::json!(null))
            .unwrap();
        let storage = Storage::new(driver.clone());

        let mut item = storage.item("karma", "alice").unwrap();
        item.commit("karma", "bob").unwrap();

        assert!(driver.load("karma", "alice").unwrap().is_none());
        assert!(driver.load("karma", "bob").unwrap().is_none());
    }

    #[test]
    fn missing_key_loads_as_null() {
        let driver = Rc::new(MemoryDriver::default());
        let storage = Storage::new(driver);
        let item = storage.item("karma", "nobody").unwrap();
        assert_eq!(item.value, serde_json::Value::Null);
    }
}
