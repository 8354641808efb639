//! Size-bounded in-memory response store.

// crates.io
use bytes::Bytes;
use lru::LruCache;
use parking_lot::Mutex;
// self
use crate::{_prelude::*, transport::cache::Cache};

/// Bytes accounted per entry on top of its value.
pub const ENTRY_OVERHEAD: usize = 350;
/// Lifetime of a stored entry.
pub const ENTRY_TTL: Duration = Duration::from_secs(60 * 60);

const MIB: usize = 1024 * 1024;

/// LRU [`Cache`] keeping its accounted size below a MiB budget.
///
/// Every entry costs its value length plus [`ENTRY_OVERHEAD`] bytes and expires [`ENTRY_TTL`]
/// after it was written. Values larger than the whole budget are not stored.
pub struct MemoryCache {
	store: Mutex<Store>,
}
impl MemoryCache {
	/// Create a cache holding at most `max_size_mib` MiB.
	pub fn new(max_size_mib: usize) -> Self {
		Self::with_capacity_bytes(max_size_mib.saturating_mul(MIB))
	}

	fn with_capacity_bytes(capacity: usize) -> Self {
		Self { store: Mutex::new(Store { entries: LruCache::unbounded(), size: 0, capacity }) }
	}

	/// Number of stored entries, expired ones included until they are touched.
	pub fn len(&self) -> usize {
		self.store.lock().entries.len()
	}

	/// Whether nothing is stored.
	pub fn is_empty(&self) -> bool {
		self.len() == 0
	}

	/// Accounted size in bytes.
	pub fn size_bytes(&self) -> usize {
		self.store.lock().size
	}
}
impl Cache for MemoryCache {
	fn get(&self, key: &str) -> Option<Bytes> {
		let mut store = self.store.lock();
		let expired = store.entries.peek(key)?.expires_at <= Instant::now();

		if expired {
			store.remove(key);

			return None;
		}

		store.entries.get(key).map(|entry| entry.value.clone())
	}

	fn set(&self, key: &str, value: Bytes) {
		let mut store = self.store.lock();
		let cost = value.len() + ENTRY_OVERHEAD;

		store.remove(key);

		if cost > store.capacity {
			tracing::debug!(%key, cost, "value exceeds cache capacity");

			return;
		}

		store.size += cost;
		store.entries.put(key.to_owned(), Entry { value, expires_at: Instant::now() + ENTRY_TTL });

		while store.size > store.capacity {
			let Some((_, evicted)) = store.entries.pop_lru() else { break };

			store.size -= evicted.cost();
		}
	}

	fn delete(&self, key: &str) {
		self.store.lock().remove(key);
	}
}

struct Store {
	entries: LruCache<String, Entry>,
	size: usize,
	capacity: usize,
}
impl Store {
	fn remove(&mut self, key: &str) {
		if let Some(entry) = self.entries.pop(key) {
			self.size -= entry.cost();
		}
	}
}

struct Entry {
	value: Bytes,
	expires_at: Instant,
}
impl Entry {
	fn cost(&self) -> usize {
		self.value.len() + ENTRY_OVERHEAD
	}
}
