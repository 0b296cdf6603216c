//! Thread-safe ID-keyed collection shared between the hub, sessions and
//! background tasks.
//!
//! Every mutation goes through one mutex. Iteration copies the entries out
//! under that lock and runs the callback afterwards, so callbacks are free to
//! add or remove entries on the same registry.

use hashbrown::HashMap;
use parking_lot::Mutex;
use std::sync::atomic::{AtomicUsize, Ordering};

/// First ID handed out by a fresh registry. Zero is reserved for "no sender"
pub const FIRST_ID: u64 = 1;

struct Inner<T> {
    objects: HashMap<u64, T>,
    next_id: u64,
}

/// Concurrent map from monotonically assigned `u64` IDs to values
pub struct Registry<T> {
    inner: Mutex<Inner<T>>,
    /// Mirrors `objects.len()`; readable without taking the lock
    len: AtomicUsize,
}

impl<T: Clone> Registry<T> {
    pub fn new() -> Self {
        Self::with_capacity(0)
    }

    pub fn with_capacity(capacity: usize) -> Self {
        Self {
            inner: Mutex::new(Inner {
                objects: HashMap::with_capacity(capacity),
                next_id: FIRST_ID,
            }),
            len: AtomicUsize::new(0),
        }
    }

    /// Insert under the next auto-assigned ID
    pub fn add(&self, value: T) -> u64 {
        let mut inner = self.inner.lock();
        let id = inner.next_id;
        inner.objects.insert(id, value);
        inner.next_id += 1;
        self.len.store(inner.objects.len(), Ordering::Relaxed);
        id
    }

    /// Insert under an explicit ID, replacing any existing entry.
    ///
    /// The counter still advances, and never ends up at or below `id`, so a
    /// later [`Registry::add`] cannot hand out an ID that was used explicitly.
    pub fn add_with_id(&self, value: T, id: u64) -> u64 {
        let mut inner = self.inner.lock();
        inner.objects.insert(id, value);
        inner.next_id = inner.next_id.max(id).saturating_add(1);
        self.len.store(inner.objects.len(), Ordering::Relaxed);
        id
    }

    /// Insert under an explicit ID unless an existing entry `conflicts` with
    /// it. The scan and the insert happen under one lock, so of two racing
    /// callers with conflicting values only one succeeds
    pub fn add_with_id_unless<F>(&self, value: T, id: u64, conflicts: F) -> bool
    where
        F: Fn(&T) -> bool,
    {
        let mut inner = self.inner.lock();
        if inner.objects.values().any(|existing| conflicts(existing)) {
            return false;
        }
        inner.objects.insert(id, value);
        inner.next_id = inner.next_id.max(id).saturating_add(1);
        self.len.store(inner.objects.len(), Ordering::Relaxed);
        true
    }

    /// Remove an entry. Absent IDs are ignored
    pub fn remove(&self, id: u64) -> Option<T> {
        let mut inner = self.inner.lock();
        let removed = inner.objects.remove(&id);
        self.len.store(inner.objects.len(), Ordering::Relaxed);
        removed
    }

    pub fn get(&self, id: u64) -> Option<T> {
        self.inner.lock().objects.get(&id).cloned()
    }

    pub fn contains(&self, id: u64) -> bool {
        self.inner.lock().objects.contains_key(&id)
    }

    /// Point-in-time copy of every entry
    pub fn snapshot(&self) -> Vec<(u64, T)> {
        let inner = self.inner.lock();
        inner
            .objects
            .iter()
            .map(|(id, value)| (*id, value.clone()))
            .collect()
    }

    /// Run `callback` for every entry of a snapshot, without holding the lock.
    ///
    /// Entries added or removed while iterating are not reflected.
    pub fn for_each<F>(&self, mut callback: F)
    where
        F: FnMut(u64, T),
    {
        for (id, value) in self.snapshot() {
            callback(id, value);
        }
    }

    /// Advisory size, not synchronised with in-flight mutations
    pub fn len(&self) -> usize {
        self.len.load(Ordering::Relaxed)
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

impl<T: Clone> Default for Registry<T> {
    fn default() -> Self {
        Self::new()
    }
}
