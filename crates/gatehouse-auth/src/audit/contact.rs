//! Identity → contact lookups for audit records.
//!
//! [`ContactCache`] is a bounded LRU kept in a slot arena: entries live in a
//! `Vec`, recency is an intrusive doubly-linked list of slot indices, and
//! evicted or removed slots are recycled through a free list. The lock is
//! only held for the in-memory mutation, never across a store call.

use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use parking_lot::Mutex;

use crate::error::StoreResult;

/// Capacity used when none (or zero) is configured.
pub const DEFAULT_CONTACT_CAPACITY: usize = 1000;

const NIL: usize = usize::MAX;

struct Slot {
    identity_id: u32,
    contact: String,
    prev: usize,
    next: usize,
}

struct Lru {
    slots: Vec<Slot>,
    free: Vec<usize>,
    index: HashMap<u32, usize>,
    /// Most recently used.
    head: usize,
    /// Least recently used.
    tail: usize,
    capacity: usize,
    hits: u64,
    misses: u64,
    evictions: u64,
}

impl Lru {
    fn new(capacity: usize) -> Self {
        Self {
            slots: Vec::new(),
            free: Vec::new(),
            index: HashMap::with_capacity(capacity),
            head: NIL,
            tail: NIL,
            capacity,
            hits: 0,
            misses: 0,
            evictions: 0,
        }
    }

    fn detach(&mut self, idx: usize) {
        let (prev, next) = (self.slots[idx].prev, self.slots[idx].next);
        if prev == NIL {
            self.head = next;
        } else {
            self.slots[prev].next = next;
        }
        if next == NIL {
            self.tail = prev;
        } else {
            self.slots[next].prev = prev;
        }
        self.slots[idx].prev = NIL;
        self.slots[idx].next = NIL;
    }

    fn push_front(&mut self, idx: usize) {
        self.slots[idx].prev = NIL;
        self.slots[idx].next = self.head;
        if self.head != NIL {
            self.slots[self.head].prev = idx;
        }
        self.head = idx;
        if self.tail == NIL {
            self.tail = idx;
        }
    }

    fn touch(&mut self, idx: usize) {
        if self.head != idx {
            self.detach(idx);
            self.push_front(idx);
        }
    }

    fn release(&mut self, idx: usize) {
        self.detach(idx);
        self.slots[idx].contact = String::new();
        self.free.push(idx);
    }

    fn get(&mut self, identity_id: u32) -> Option<String> {
        let Some(&idx) = self.index.get(&identity_id) else {
            self.misses += 1;
            return None;
        };
        self.hits += 1;
        self.touch(idx);
        Some(self.slots[idx].contact.clone())
    }

    fn set(&mut self, identity_id: u32, contact: String) {
        if let Some(&idx) = self.index.get(&identity_id) {
            self.slots[idx].contact = contact;
            self.touch(idx);
            return;
        }

        if self.index.len() >= self.capacity && self.tail != NIL {
            let victim = self.tail;
            self.index.remove(&self.slots[victim].identity_id);
            self.release(victim);
            self.evictions += 1;
        }

        let slot = Slot {
            identity_id,
            contact,
            prev: NIL,
            next: NIL,
        };
        let idx = match self.free.pop() {
            Some(idx) => {
                self.slots[idx] = slot;
                idx
            }
            None => {
                self.slots.push(slot);
                self.slots.len() - 1
            }
        };
        self.push_front(idx);
        self.index.insert(identity_id, idx);
    }

    fn remove(&mut self, identity_id: u32) -> bool {
        match self.index.remove(&identity_id) {
            Some(idx) => {
                self.release(idx);
                true
            }
            None => false,
        }
    }
}

/// Contact cache statistics.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct ContactCacheStats {
    pub size: usize,
    pub capacity: usize,
    pub hits: u64,
    pub misses: u64,
    pub evictions: u64,
}

/// Bounded LRU of identity contacts.
///
/// A disabled cache answers every `get` with `None` and ignores `set`.
pub struct ContactCache {
    inner: Option<Mutex<Lru>>,
}

impl ContactCache {
    /// Creates a cache holding at most `capacity` entries (zero selects
    /// [`DEFAULT_CONTACT_CAPACITY`]).
    pub fn new(capacity: usize) -> Self {
        let capacity = if capacity == 0 {
            DEFAULT_CONTACT_CAPACITY
        } else {
            capacity
        };
        Self {
            inner: Some(Mutex::new(Lru::new(capacity))),
        }
    }

    pub fn disabled() -> Self {
        Self { inner: None }
    }

    pub fn is_enabled(&self) -> bool {
        self.inner.is_some()
    }

    pub fn get(&self, identity_id: u32) -> Option<String> {
        self.inner.as_ref()?.lock().get(identity_id)
    }

    pub fn set(&self, identity_id: u32, contact: impl Into<String>) {
        if let Some(inner) = &self.inner {
            inner.lock().set(identity_id, contact.into());
        }
    }

    /// Drops the entry, e.g. after the identity's contact changed.
    pub fn remove(&self, identity_id: u32) -> bool {
        self.inner
            .as_ref()
            .is_some_and(|inner| inner.lock().remove(identity_id))
    }

    pub fn len(&self) -> usize {
        self.inner.as_ref().map_or(0, |inner| inner.lock().index.len())
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Zero when disabled.
    pub fn capacity(&self) -> usize {
        self.inner.as_ref().map_or(0, |inner| inner.lock().capacity)
    }

    pub fn stats(&self) -> ContactCacheStats {
        let Some(inner) = &self.inner else {
            return ContactCacheStats::default();
        };
        let lru = inner.lock();
        ContactCacheStats {
            size: lru.index.len(),
            capacity: lru.capacity,
            hits: lru.hits,
            misses: lru.misses,
            evictions: lru.evictions,
        }
    }
}

impl Default for ContactCache {
    fn default() -> Self {
        Self::disabled()
    }
}

/// Durable-store lookup of an identity's contact (e.g. email).
#[async_trait]
pub trait ContactStore: Send + Sync {
    async fn find_contact(&self, identity_id: u32) -> StoreResult<Option<String>>;
}

/// Resolves contacts through the cache, then the durable store.
pub struct ContactResolver {
    cache: ContactCache,
    store: Option<Arc<dyn ContactStore>>,
    timeout: Duration,
}

impl ContactResolver {
    pub fn new(
        cache: ContactCache,
        store: Option<Arc<dyn ContactStore>>,
        timeout: Duration,
    ) -> Self {
        Self {
            cache,
            store,
            timeout,
        }
    }

    /// A resolver that never finds anything.
    pub fn disabled() -> Self {
        Self::new(ContactCache::disabled(), None, Duration::ZERO)
    }

    pub fn cache(&self) -> &ContactCache {
        &self.cache
    }

    /// Looks up the contact of `identity_id`; `None` when unknown or the
    /// store fails. Successful store lookups are cached.
    pub async fn resolve(&self, identity_id: u32) -> Option<String> {
        if identity_id == 0 {
            return None;
        }
        if let Some(contact) = self.cache.get(identity_id) {
            return Some(contact);
        }
        let store = self.store.as_ref()?;

        match tokio::time::timeout(self.timeout, store.find_contact(identity_id)).await {
            Ok(Ok(Some(contact))) if !contact.is_empty() => {
                self.cache.set(identity_id, contact.clone());
                Some(contact)
            }
            Ok(Ok(_)) => None,
            Ok(Err(e)) => {
                tracing::debug!(identity_id, error = %e, "Contact lookup failed");
                None
            }
            Err(_) => {
                tracing::debug!(identity_id, "Contact lookup timed out");
                None
            }
        }
    }
}
