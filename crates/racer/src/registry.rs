// SPDX-License-Identifier: Apache-2.0 OR MIT

//! Process-wide registry of live engines, so `fence_all()` can be called
//! without every caller threading an explicit list of engines through.
//!
//! The original keeps a global `std::set<Engine*>` of raw pointers,
//! pruned by the engine's destructor. We keep the same "register on
//! construction, deregister on teardown" shape but hold `Weak` handles in
//! a `Mutex<Vec<_>>` behind a `OnceLock`, so a leaked or forgotten engine
//! can never dangle the registry.

use std::sync::{Mutex, OnceLock, Weak};

use crate::facade::EngineInner;

fn registry() -> &'static Mutex<Vec<Weak<EngineInner>>> {
    static REGISTRY: OnceLock<Mutex<Vec<Weak<EngineInner>>>> = OnceLock::new();
    REGISTRY.get_or_init(|| Mutex::new(Vec::new()))
}

/// Register a newly constructed engine so it participates in `fence_all`.
pub(crate) fn register(inner: &std::sync::Arc<EngineInner>) {
    let weak = std::sync::Arc::downgrade(inner);
    registry().lock().unwrap().push(weak);
}

/// Fence every engine still alive in this process, pruning dead entries
/// as it goes.
pub fn fence_all() {
    let mut guard = registry().lock().unwrap();
    guard.retain(|weak| {
        if let Some(inner) = weak.upgrade() {
            inner.fence();
            true
        } else {
            false
        }
    });
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn empty_registry_fences_cleanly() {
        fence_all();
        assert!(registry().lock().unwrap().is_empty());
    }
}
