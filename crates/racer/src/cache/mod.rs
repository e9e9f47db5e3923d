// SPDX-License-Identifier: Apache-2.0 OR MIT

//! Remote access cache: per-requester memoization of `(peer, offset)`
//! scalar reads, keyed so that at most one request is ever in flight for
//! a given key.

use dashmap::mapref::entry::Entry;
use dashmap::DashMap;

/// Cached state for one `(peer, offset)` key.
#[derive(Debug, Clone)]
enum CacheState {
    /// A request has been issued; no value yet.
    Pending,
    /// The scalar's raw bytes, exactly `element_size` long.
    Valid(Vec<u8>),
}

/// Outcome of a [`RemoteAccessCache::lookup`].
#[derive(Debug, Clone)]
pub enum Lookup {
    /// Already cached; the caller can use `value` without issuing a
    /// request.
    Hit(Vec<u8>),
    /// Not seen before; the cache has recorded this key as `Pending` and
    /// the caller is now responsible for issuing the request and calling
    /// [`RemoteAccessCache::install`] once it resolves.
    Miss,
    /// Seen before and still pending another caller's request; the
    /// caller should poll again rather than issue a duplicate request.
    InFlight,
}

/// Per-requester `(peer, offset) -> scalar` cache.
///
/// Sharded internally ([`DashMap`]), so concurrent device-worker threads
/// touching different keys do not contend.
#[derive(Default)]
pub struct RemoteAccessCache {
    entries: DashMap<(u32, u64), CacheState>,
}

impl RemoteAccessCache {
    #[must_use]
    pub fn new() -> Self {
        Self {
            entries: DashMap::new(),
        }
    }

    /// Look up `(peer, offset)`. A `Miss` atomically transitions the key
    /// to `Pending` so no other caller observes a second `Miss` for the
    /// same key until [`install`](Self::install) or
    /// [`invalidate_all`](Self::invalidate_all) runs.
    pub fn lookup(&self, peer: u32, offset: u64) -> Lookup {
        match self.entries.entry((peer, offset)) {
            Entry::Occupied(occupied) => match occupied.get() {
                CacheState::Pending => Lookup::InFlight,
                CacheState::Valid(bytes) => Lookup::Hit(bytes.clone()),
            },
            Entry::Vacant(vacant) => {
                vacant.insert(CacheState::Pending);
                Lookup::Miss
            }
        }
    }

    /// Install a resolved value, transitioning `Pending -> Valid` (or
    /// simply overwriting a prior `Valid` entry on a re-request after
    /// invalidation).
    pub fn install(&self, peer: u32, offset: u64, value: Vec<u8>) {
        self.entries.insert((peer, offset), CacheState::Valid(value));
    }

    /// Drop every cached entry. Called at fence boundaries, after which
    /// no stale pre-fence value may be observed.
    pub fn invalidate_all(&self) {
        self.entries.clear();
    }

    #[cfg(test)]
    fn len(&self) -> usize {
        self.entries.len()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn first_lookup_is_a_miss_and_marks_pending() {
        let cache = RemoteAccessCache::new();
        assert!(matches!(cache.lookup(1, 7), Lookup::Miss));
        assert!(matches!(cache.lookup(1, 7), Lookup::InFlight));
    }

    #[test]
    fn install_resolves_pending_to_hit() {
        let cache = RemoteAccessCache::new();
        cache.lookup(1, 7);
        cache.install(1, 7, vec![1, 2, 3, 4]);
        match cache.lookup(1, 7) {
            Lookup::Hit(bytes) => assert_eq!(bytes, vec![1, 2, 3, 4]),
            other => panic!("expected Hit, got {other:?}"),
        }
    }

    #[test]
    fn invalidate_all_clears_every_key() {
        let cache = RemoteAccessCache::new();
        cache.install(1, 7, vec![9]);
        cache.install(2, 3, vec![8]);
        assert_eq!(cache.len(), 2);
        cache.invalidate_all();
        assert_eq!(cache.len(), 0);
        assert!(matches!(cache.lookup(1, 7), Lookup::Miss));
    }
}
