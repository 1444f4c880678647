//! Ordered table of records guarded by one async lock per identifier.
//!
//! The outer lock is held only to find, add or drop a slot and never across
//! an `.await`. Work on a record happens under that record's own mutex, so
//! writers to the same ID are serialised while other IDs proceed.

use std::collections::BTreeMap;
use std::sync::{Arc, PoisonError, RwLock};

use tokio::sync::{Mutex, OwnedMutexGuard};

use crate::error::{Result, StorageError};

type Slot<T> = Arc<Mutex<Option<T>>>;

/// Records in insertion order, each behind its own mutex.
#[derive(Debug)]
pub struct LockTable<T> {
    resource: &'static str,
    slots: RwLock<Vec<(String, Slot<T>)>>,
}

impl<T: Clone + Send> LockTable<T> {
    /// Creates an empty table. `resource` names the record family in
    /// not-found errors.
    #[must_use]
    pub const fn new(resource: &'static str) -> Self {
        Self {
            resource,
            slots: RwLock::new(Vec::new()),
        }
    }

    /// Adds a record. Returns `false` when the ID is already present.
    pub fn insert(&self, id: impl Into<String>, value: T) -> bool {
        let key = id.into();
        let mut slots = self.slots.write().unwrap_or_else(PoisonError::into_inner);
        if slots.iter().any(|(existing, _)| *existing == key) {
            return false;
        }
        slots.push((key, Arc::new(Mutex::new(Some(value)))));
        true
    }

    fn slot(&self, id: &str) -> Option<Slot<T>> {
        self.slots
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .iter()
            .find(|(key, _)| key == id)
            .map(|(_, slot)| Arc::clone(slot))
    }

    /// Number of records.
    #[must_use]
    pub fn len(&self) -> usize {
        self.slots.read().unwrap_or_else(PoisonError::into_inner).len()
    }

    /// Whether the table has no records.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Returns a copy of one record.
    ///
    /// # Errors
    ///
    /// Returns [`StorageError::NotFound`] for unknown IDs.
    pub async fn get(&self, id: &str) -> Result<T> {
        self.with(id, |record| Ok(record.clone())).await
    }

    /// Returns copies of every record in insertion order.
    pub async fn values(&self) -> Vec<T> {
        let slots: Vec<Slot<T>> = self
            .slots
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .iter()
            .map(|(_, slot)| Arc::clone(slot))
            .collect();
        let mut values = Vec::with_capacity(slots.len());
        for slot in slots {
            if let Some(record) = slot.lock().await.as_ref() {
                values.push(record.clone());
            }
        }
        values
    }

    /// Runs `f` on one record while holding its lock.
    ///
    /// # Errors
    ///
    /// Returns [`StorageError::NotFound`] for unknown or concurrently
    /// removed IDs, or whatever `f` returns.
    pub async fn with<R>(&self, id: &str, f: impl FnOnce(&mut T) -> Result<R> + Send) -> Result<R> {
        let slot = self.slot(id).ok_or_else(|| self.not_found(id))?;
        let mut guard = slot.lock().await;
        let record = guard.as_mut().ok_or_else(|| self.not_found(id))?;
        f(record)
    }

    /// Removes one record after `check` approves it.
    ///
    /// # Errors
    ///
    /// Returns [`StorageError::NotFound`] for unknown IDs, or the error
    /// `check` returns, in which case the record stays.
    pub async fn remove_if(&self, id: &str, check: impl FnOnce(&T) -> Result<()> + Send) -> Result<T> {
        let slot = self.slot(id).ok_or_else(|| self.not_found(id))?;
        let mut guard = slot.lock().await;
        let record = guard.as_ref().ok_or_else(|| self.not_found(id))?;
        check(record)?;
        let removed = guard.take().ok_or_else(|| self.not_found(id))?;
        self.slots
            .write()
            .unwrap_or_else(PoisonError::into_inner)
            .retain(|(_, candidate)| !Arc::ptr_eq(candidate, &slot));
        Ok(removed)
    }

    fn not_found(&self, id: &str) -> StorageError {
        StorageError::not_found(self.resource, id)
    }
}

/// Per-identifier mutexes for drivers whose records live in the backend.
///
/// An entry lives only while some caller holds or waits on it.
#[derive(Debug, Default)]
pub struct IdLocks {
    slots: std::sync::Mutex<BTreeMap<String, Arc<Mutex<()>>>>,
}

impl IdLocks {
    /// Creates an empty lock set.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Waits for exclusive access to `id`.
    pub async fn lock(&self, id: &str) -> IdGuard<'_> {
        let slot = {
            let mut slots = self.slots.lock().unwrap_or_else(PoisonError::into_inner);
            Arc::clone(slots.entry(id.to_owned()).or_default())
        };
        IdGuard {
            locks: self,
            id: id.to_owned(),
            guard: Some(slot.lock_owned().await),
        }
    }

    /// Number of IDs currently held or awaited.
    #[must_use]
    pub fn len(&self) -> usize {
        self.slots.lock().unwrap_or_else(PoisonError::into_inner).len()
    }

    /// Whether no ID is held or awaited.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    fn release(&self, id: &str) {
        let mut slots = self.slots.lock().unwrap_or_else(PoisonError::into_inner);
        if slots.get(id).is_some_and(|slot| Arc::strong_count(slot) == 1) {
            slots.remove(id);
        }
    }
}

/// Exclusive access to one ID; dropping it frees the ID and forgets it
/// when nobody else is waiting.
#[derive(Debug)]
#[must_use = "the ID is unlocked as soon as the guard is dropped"]
pub struct IdGuard<'a> {
    locks: &'a IdLocks,
    id: String,
    guard: Option<OwnedMutexGuard<()>>,
}

impl Drop for IdGuard<'_> {
    fn drop(&mut self) {
        drop(self.guard.take());
        self.locks.release(&self.id);
    }
}
