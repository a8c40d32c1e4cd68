//! In-memory store used by reconciler tests.
use super::ManifestStore;
use crate::error::SyncError;
use std::cell::{Cell, RefCell};
use std::collections::{BTreeMap, BTreeSet};

#[derive(Default)]
pub struct MemoryStore {
    objects: RefCell<BTreeMap<String, Vec<u8>>>,
    failing: RefCell<BTreeSet<String>>,
    writes: Cell<usize>,
    deletes: Cell<usize>,
}

impl MemoryStore {
    pub fn insert(&self, name: &str, bytes: Vec<u8>) {
        self.objects.borrow_mut().insert(name.to_string(), bytes);
    }

    /// Make every operation on `name` (or listing `name` as a prefix) fail.
    pub fn fail_on(&self, name: &str) {
        self.failing.borrow_mut().insert(name.to_string());
    }

    pub fn object(&self, name: &str) -> Option<Vec<u8>> {
        self.objects.borrow().get(name).cloned()
    }

    pub fn writes(&self) -> usize {
        self.writes.get()
    }

    pub fn deletes(&self) -> usize {
        self.deletes.get()
    }

    fn check(&self, name: &str) -> Result<(), SyncError> {
        if self.failing.borrow().contains(name) {
            return Err(SyncError::request(name, 503, "unavailable"));
        }
        Ok(())
    }
}

impl ManifestStore for MemoryStore {
    fn list_names(&self, prefix: &str) -> Result<Vec<String>, SyncError> {
        self.check(prefix)?;
        Ok(self
            .objects
            .borrow()
            .keys()
            .filter(|name| name.starts_with(prefix))
            .cloned()
            .collect())
    }

    fn get(&self, name: &str) -> Result<Vec<u8>, SyncError> {
        self.check(name)?;
        self.objects
            .borrow()
            .get(name)
            .cloned()
            .ok_or_else(|| SyncError::NotFound(name.to_string()))
    }

    fn put(&self, name: &str, bytes: &[u8], overwrite: bool) -> Result<(), SyncError> {
        self.check(name)?;
        let mut objects = self.objects.borrow_mut();
        if !overwrite && objects.contains_key(name) {
            return Err(SyncError::AlreadyExists(name.to_string()));
        }
        objects.insert(name.to_string(), bytes.to_vec());
        self.writes.set(self.writes.get() + 1);
        Ok(())
    }

    fn delete(&self, name: &str) -> Result<(), SyncError> {
        self.check(name)?;
        self.objects.borrow_mut().remove(name);
        self.deletes.set(self.deletes.get() + 1);
        Ok(())
    }
}
