use std::cmp::Ordering;
use std::collections::{BinaryHeap, HashMap};
use std::sync::atomic::{AtomicU64, Ordering as AtomicOrdering};
use std::sync::{Arc, Mutex};
use std::time::{Duration, Instant};

use tracing::trace;

use crate::context::Context;

/// Floor applied to every session timeout.
const MIN_TIMEOUT_MS: u64 = 1_000;
/// Heap size below which the backing storage is never shrunk.
const MIN_SHRINK_LEN: usize = 256;
/// Expired entries popped per amortized cleanup pass.
const SHORT_CLEAN_BUDGET: usize = 8;
/// Sliding timeout applied to sessions unless configured otherwise.
const DEFAULT_TIMEOUT_MS: u64 = 30 * 60 * 1_000;

/// Heap entry ordered so the earliest expiry pops first. Stale entries
/// (whose expiry no longer matches the live session) are filtered at pop
/// time.
struct ExpiryEntry {
    expiry: Instant,
    id: String,
}

impl PartialEq for ExpiryEntry {
    fn eq(&self, other: &Self) -> bool {
        self.expiry == other.expiry
    }
}

impl Eq for ExpiryEntry {}

impl PartialOrd for ExpiryEntry {
    fn partial_cmp(&self, other: &Self) -> Option<Ordering> {
        Some(self.cmp(other))
    }
}

impl Ord for ExpiryEntry {
    fn cmp(&self, other: &Self) -> Ordering {
        // Reversed: BinaryHeap is a max-heap, we need earliest-first.
        other.expiry.cmp(&self.expiry)
    }
}

struct SessionEntry {
    context: Arc<Context>,
    expiry: Instant,
}

#[derive(Default)]
struct Store {
    live: HashMap<String, SessionEntry>,
    heap: BinaryHeap<ExpiryEntry>,
}

impl Store {
    /// Pop up to `budget` expired heap entries, reaping sessions whose
    /// live expiry matches the popped one. Uncapped when `budget` is
    /// `None`.
    fn reap(&mut self, now: Instant, budget: Option<usize>) {
        let mut popped = 0usize;
        while self
            .heap
            .peek()
            .is_some_and(|top| top.expiry <= now)
        {
            if budget.is_some_and(|b| popped >= b) {
                break;
            }
            let entry = self.heap.pop().unwrap();
            popped += 1;
            let current = self
                .live
                .get(&entry.id)
                .is_some_and(|live| live.expiry == entry.expiry);
            if current {
                trace!(session_id = %entry.id, "session expired");
                self.live.remove(&entry.id);
            }
        }
    }

    fn maybe_shrink(&mut self) {
        if self.heap.len() > MIN_SHRINK_LEN && self.heap.capacity() > self.heap.len() * 8 {
            self.heap.shrink_to_fit();
        }
    }

    /// Amortized cleanup: only bothers when the heap has outgrown the
    /// live map by 2x.
    fn short_clean(&mut self, now: Instant) {
        if self.heap.len() > self.live.len() * 2 {
            self.reap(now, Some(SHORT_CLEAN_BUDGET));
            self.maybe_shrink();
        }
    }

    fn thorough_clean(&mut self, now: Instant) {
        self.reap(now, None);
        self.maybe_shrink();
    }
}

/// Session storage: one mutex around the map and its expiry heap.
///
/// Lookups are not the hot path; a handler touching its session pays a
/// single lock acquisition.
pub struct SessionMap {
    store: Mutex<Store>,
    default_timeout_ms: AtomicU64,
}

impl Default for SessionMap {
    fn default() -> Self {
        Self::new()
    }
}

impl SessionMap {
    pub fn new() -> Self {
        Self {
            store: Mutex::new(Store::default()),
            default_timeout_ms: AtomicU64::new(DEFAULT_TIMEOUT_MS),
        }
    }

    pub fn set_default_timeout(&self, timeout_ms: u64) {
        self.default_timeout_ms
            .store(timeout_ms, AtomicOrdering::Relaxed);
    }

    pub fn default_timeout(&self) -> u64 {
        self.default_timeout_ms.load(AtomicOrdering::Relaxed)
    }

    /// Fetch the session context for `id`, creating it when unknown or
    /// expired. A live hit slides the expiry forward to
    /// `max(existing, now + default timeout)`.
    pub fn get(&self, id: &str) -> Arc<Context> {
        let default_ms = self.default_timeout();
        let now = Instant::now();
        let mut store = self.store.lock().unwrap();
        let Store { live, heap } = &mut *store;

        let context = match live.get_mut(id) {
            Some(entry) if entry.expiry > now => {
                let candidate = now + Duration::from_millis(default_ms);
                let new_expiry = candidate.max(entry.expiry);
                let context = entry.context.clone();
                if new_expiry != entry.expiry {
                    entry.expiry = new_expiry;
                    heap.push(ExpiryEntry {
                        expiry: new_expiry,
                        id: id.to_string(),
                    });
                }
                context
            }
            _ => {
                let context = Arc::new(Context::new());
                let expiry = now + Duration::from_millis(default_ms.max(MIN_TIMEOUT_MS));
                live.insert(
                    id.to_string(),
                    SessionEntry {
                        context: context.clone(),
                        expiry,
                    },
                );
                heap.push(ExpiryEntry {
                    expiry,
                    id: id.to_string(),
                });
                context
            }
        };

        store.short_clean(now);
        context
    }

    /// Extend (never shorten) the expiry of `id` to `now + max(timeout,
    /// 1s)`. Unknown ids get a fresh entry with that expiry.
    pub fn set_timeout(&self, id: &str, timeout_ms: u64) {
        let now = Instant::now();
        let candidate = now + Duration::from_millis(timeout_ms.max(MIN_TIMEOUT_MS));
        let mut store = self.store.lock().unwrap();
        let Store { live, heap } = &mut *store;

        match live.get_mut(id) {
            Some(entry) => {
                if candidate > entry.expiry {
                    entry.expiry = candidate;
                    heap.push(ExpiryEntry {
                        expiry: candidate,
                        id: id.to_string(),
                    });
                }
            }
            None => {
                live.insert(
                    id.to_string(),
                    SessionEntry {
                        context: Arc::new(Context::new()),
                        expiry: candidate,
                    },
                );
                heap.push(ExpiryEntry {
                    expiry: candidate,
                    id: id.to_string(),
                });
            }
        }

        store.short_clean(now);
    }

    /// Drop the session outright. Heap entries for it become stale and
    /// are filtered at pop time. Returns whether the session existed.
    pub fn remove(&self, id: &str) -> bool {
        let mut store = self.store.lock().unwrap();
        let existed = store.live.remove(id).is_some();
        store.short_clean(Instant::now());
        existed
    }

    /// Background sweep entry point: thorough when the heap has badly
    /// outgrown the live map, amortized otherwise.
    pub fn sweep(&self) {
        let now = Instant::now();
        let mut store = self.store.lock().unwrap();
        if store.heap.len() > store.live.len() * 8 {
            store.thorough_clean(now);
        } else {
            store.short_clean(now);
        }
    }

    /// Live session count (primarily for observability and tests).
    pub fn len(&self) -> usize {
        self.store.lock().unwrap().live.len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}
