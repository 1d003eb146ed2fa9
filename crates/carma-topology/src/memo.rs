//! Install-once cells for derived values.
//!
//! A cell is read with a short lock held only long enough to clone a
//! pointer. Derivation runs with no lock held; the result is installed
//! only if the cell is still empty, otherwise it is dropped and the
//! installed value is returned. Derivations are pure, so a lost race
//! costs only the wasted computation.

use std::fmt;
use std::sync::atomic::{AtomicU32, Ordering};
use std::sync::Arc;

use parking_lot::RwLock;

/// A lazily derived, shareable value that can be cleared.
pub struct Memo<T> {
    slot: RwLock<Option<Arc<T>>>,
}

impl<T> Memo<T> {
    pub fn new() -> Self {
        Self {
            slot: RwLock::new(None),
        }
    }

    /// A cell that starts out holding `value`.
    pub fn with(value: T) -> Self {
        Self {
            slot: RwLock::new(Some(Arc::new(value))),
        }
    }

    pub fn get(&self) -> Option<Arc<T>> {
        self.slot.read().clone()
    }

    pub fn is_set(&self) -> bool {
        self.slot.read().is_some()
    }

    /// Return the installed value, deriving and installing it if needed.
    pub fn get_or_try_init<E>(&self, derive: impl FnOnce() -> Result<T, E>) -> Result<Arc<T>, E> {
        if let Some(value) = self.get() {
            return Ok(value);
        }
        let fresh = Arc::new(derive()?);
        Ok(self.install(fresh))
    }

    /// Install `fresh` unless the cell is already set. Returns the value
    /// that ended up installed.
    pub fn install(&self, fresh: Arc<T>) -> Arc<T> {
        let mut slot = self.slot.write();
        match slot.as_ref() {
            Some(winner) => Arc::clone(winner),
            None => {
                *slot = Some(Arc::clone(&fresh));
                fresh
            }
        }
    }

    /// Overwrite unconditionally. Used by parsing and explicit setters.
    pub fn set(&self, value: T) {
        *self.slot.write() = Some(Arc::new(value));
    }

    pub fn clear(&self) {
        *self.slot.write() = None;
    }
}

impl<T> Default for Memo<T> {
    fn default() -> Self {
        Self::new()
    }
}

impl<T> Clone for Memo<T> {
    fn clone(&self) -> Self {
        Self {
            slot: RwLock::new(self.get()),
        }
    }
}

impl<T: fmt::Debug> fmt::Debug for Memo<T> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self.get() {
            Some(value) => f.debug_tuple("Memo").field(&value).finish(),
            None => f.write_str("Memo(<unset>)"),
        }
    }
}

/// Bucket cell: an atomic node count with `u32::MAX` meaning unset.
pub struct BucketCell(AtomicU32);

const UNSET: u32 = u32::MAX;

impl BucketCell {
    pub fn new() -> Self {
        Self(AtomicU32::new(UNSET))
    }

    pub fn get(&self) -> Option<u32> {
        match self.0.load(Ordering::Acquire) {
            UNSET => None,
            value => Some(value),
        }
    }

    /// Return the stored bucket, deriving it if unset. Concurrent derivers
    /// agree on the result; the first compare-and-swap wins.
    pub fn get_or_try_init<E>(&self, derive: impl FnOnce() -> Result<u32, E>) -> Result<u32, E> {
        if let Some(value) = self.get() {
            return Ok(value);
        }
        let fresh = derive()?;
        debug_assert!(fresh != UNSET);
        match self.0.compare_exchange(UNSET, fresh, Ordering::AcqRel, Ordering::Acquire) {
            Ok(_) => Ok(fresh),
            Err(winner) => Ok(winner),
        }
    }

    pub fn set(&self, value: u32) {
        self.0.store(value, Ordering::Release);
    }

    pub fn clear(&self) {
        self.0.store(UNSET, Ordering::Release);
    }
}

impl Default for BucketCell {
    fn default() -> Self {
        Self::new()
    }
}

impl Clone for BucketCell {
    fn clone(&self) -> Self {
        Self(AtomicU32::new(self.0.load(Ordering::Acquire)))
    }
}

impl fmt::Debug for BucketCell {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self.get() {
            Some(value) => write!(f, "BucketCell({value})"),
            None => f.write_str("BucketCell(<unset>)"),
        }
    }
}
