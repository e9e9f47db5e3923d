// SPDX-License-Identifier: Apache-2.0 OR MIT

//! Remote window handshake: the per-peer binding exchanged once at
//! engine construction between a local reply-tx buffer and a peer's
//! reply-rx buffer.

use std::sync::atomic::{AtomicU32, AtomicU64, Ordering};

use arc_swap::ArcSwapOption;

/// Addresses and keys exchanged with one peer at bind time. Shared-host
/// peers additionally get a `direct_ptrs` entry installed alongside this
/// handshake (see [`crate::facade::RacerEngine::bind`]); that shortcut is
/// carried on `EngineInner.direct_ptrs`, not on this struct, since it is
/// keyed on the peer's actual shard handle rather than a wire-exchanged
/// address.
#[derive(Debug, Clone)]
pub struct WindowHandshake {
    pub tx_addr: u64,
    pub tx_rkey: u32,
    pub rx_addr: u64,
    pub rx_rkey: u32,
}

/// Per-peer remote window: the mutable half of the handshake (current
/// epoch/token and in-flight `{offset, num_entries}`) layered over the
/// handshake tuple installed once at bind time.
///
/// The handshake itself is published through an [`ArcSwapOption`] so
/// every device-worker thread reads it lock-free once bind completes;
/// the small per-block counters are plain atomics.
pub struct RemoteWindow {
    peer: u32,
    element_size: usize,
    handshake: ArcSwapOption<WindowHandshake>,
    epoch: AtomicU64,
    next_token: AtomicU32,
    current_offset: AtomicU64,
    current_num_entries: AtomicU32,
}

impl RemoteWindow {
    #[must_use]
    pub fn new(peer: u32, element_size: usize) -> Self {
        Self {
            peer,
            element_size,
            handshake: ArcSwapOption::from(None),
            epoch: AtomicU64::new(0),
            next_token: AtomicU32::new(0),
            current_offset: AtomicU64::new(0),
            current_num_entries: AtomicU32::new(0),
        }
    }

    #[must_use]
    pub fn peer(&self) -> u32 {
        self.peer
    }

    #[must_use]
    pub fn element_size(&self) -> usize {
        self.element_size
    }

    /// Install the handshake tuple received from this peer. Called once,
    /// from the bind-time collective in [`crate::facade`].
    pub fn install_handshake(&self, handshake: WindowHandshake) {
        self.handshake.store(Some(std::sync::Arc::new(handshake)));
    }

    /// Whether the bind-time handshake has completed for this peer.
    #[must_use]
    pub fn is_bound(&self) -> bool {
        self.handshake.load().is_some()
    }

    /// The current handshake tuple, if bind has completed.
    #[must_use]
    pub fn handshake(&self) -> Option<std::sync::Arc<WindowHandshake>> {
        self.handshake.load_full()
    }

    /// Allocate the next block-request token and bump the epoch.
    pub fn next_token(&self) -> u32 {
        self.epoch.fetch_add(1, Ordering::Relaxed);
        self.next_token.fetch_add(1, Ordering::Relaxed)
    }

    /// Record the `{offset, num_entries}` of the block currently in
    /// flight to this peer, so a handshake re-run (not otherwise
    /// supported) would know where to resume.
    pub fn set_in_flight(&self, offset: u64, num_entries: u32) {
        self.current_offset.store(offset, Ordering::Relaxed);
        self.current_num_entries.store(num_entries, Ordering::Relaxed);
    }

    #[must_use]
    pub fn in_flight(&self) -> (u64, u32) {
        (
            self.current_offset.load(Ordering::Relaxed),
            self.current_num_entries.load(Ordering::Relaxed),
        )
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn unbound_window_reports_no_handshake() {
        let window = RemoteWindow::new(3, 8);
        assert!(!window.is_bound());
        assert!(window.handshake().is_none());
    }

    #[test]
    fn install_handshake_makes_it_visible() {
        let window = RemoteWindow::new(3, 8);
        window.install_handshake(WindowHandshake {
            tx_addr: 0x1000,
            tx_rkey: 7,
            rx_addr: 0x2000,
            rx_rkey: 9,
        });
        assert!(window.is_bound());
        let handshake = window.handshake().unwrap();
        assert_eq!(handshake.tx_addr, 0x1000);
        assert_eq!(handshake.rx_rkey, 9);
    }

    #[test]
    fn tokens_are_monotonically_increasing() {
        let window = RemoteWindow::new(0, 8);
        assert_eq!(window.next_token(), 0);
        assert_eq!(window.next_token(), 1);
        assert_eq!(window.next_token(), 2);
    }
}
