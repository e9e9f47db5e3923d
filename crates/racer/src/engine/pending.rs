// SPDX-License-Identifier: Apache-2.0 OR MIT

//! Tracking table for in-flight block requests, owned by the ack-pump.
//!
//! Completions can arrive out of `start_idx` order (the transport makes
//! no ordering guarantee between independent SENDs). Entries that arrive
//! early are buffered in a `BTreeMap` keyed by `(peer, start_idx)`,
//! mirroring the merge/compact discipline a gap-tracking reassembly
//! buffer uses for out-of-order ranges: retire the contiguous prefix,
//! leave the rest parked until their predecessor shows up.

use std::collections::{BTreeMap, HashMap};
use std::sync::Mutex;

use crate::protocol::BlockRequestState;

/// One block request's host-side bookkeeping, from the moment the
/// request-pump posts its SEND to the moment the ack-pump retires it.
#[derive(Debug, Clone)]
pub struct PendingRdmaRequest {
    pub start_idx: u64,
    pub num_entries: u32,
    pub peer: u32,
    pub token: u32,
    pub state: BlockRequestState,
}

#[derive(Default)]
struct PendingTableInner {
    by_token: HashMap<u32, PendingRdmaRequest>,
    reorder: BTreeMap<(u32, u64), PendingRdmaRequest>,
    next_start_idx: HashMap<u32, u64>,
}

/// Per-engine table of in-flight block requests.
#[derive(Default)]
pub struct PendingTable {
    inner: Mutex<PendingTableInner>,
}

impl PendingTable {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Record a newly posted request (state `Sent`). Called by the
    /// request-pump right after `Transport::post_send` succeeds.
    pub fn insert(&self, req: PendingRdmaRequest) {
        self.inner.lock().unwrap().by_token.insert(req.token, req);
    }

    /// Record the reply for `token`. Returns every `PendingRdmaRequest`
    /// now retireable in `start_idx` order — the completed request
    /// itself if it was next in line, plus any previously buffered
    /// successors that are now contiguous. Returns an empty `Vec` if the
    /// completion arrived out of order and had to be buffered.
    pub fn complete(&self, peer: u32, token: u32) -> Vec<PendingRdmaRequest> {
        let mut inner = self.inner.lock().unwrap();
        let Some(mut req) = inner.by_token.remove(&token) else {
            return Vec::new();
        };
        debug_assert_eq!(req.peer, peer);

        let expected = *inner.next_start_idx.get(&peer).unwrap_or(&0);
        if req.start_idx != expected {
            req.state = BlockRequestState::Buffered;
            inner.reorder.insert((peer, req.start_idx), req);
            return Vec::new();
        }

        req.state = BlockRequestState::AckedInOrder;
        let mut cursor = expected + u64::from(req.num_entries);
        let mut ready = vec![req];
        while let Some(mut next) = inner.reorder.remove(&(peer, cursor)) {
            next.state = BlockRequestState::AckedInOrder;
            cursor += u64::from(next.num_entries);
            ready.push(next);
        }
        inner.next_start_idx.insert(peer, cursor);
        ready
    }

    /// Non-removing lookup of a request still in flight, used by the
    /// response-pump to recover `{start_idx, num_entries, peer}` for a
    /// reply without retiring the entry — retirement happens later,
    /// through [`complete`](Self::complete), once the ack-pump has
    /// actually advanced `ack_host`.
    #[must_use]
    pub fn peek(&self, token: u32) -> Option<PendingRdmaRequest> {
        self.inner.lock().unwrap().by_token.get(&token).cloned()
    }

    /// Whether every posted request has reached `Released` — no tokens
    /// outstanding and nothing parked in the reorder buffer. Consulted
    /// by `fence()`.
    #[must_use]
    pub fn is_quiescent(&self) -> bool {
        let inner = self.inner.lock().unwrap();
        inner.by_token.is_empty() && inner.reorder.is_empty()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn req(start_idx: u64, num_entries: u32, peer: u32, token: u32) -> PendingRdmaRequest {
        PendingRdmaRequest {
            start_idx,
            num_entries,
            peer,
            token,
            state: BlockRequestState::Sent,
        }
    }

    #[test]
    fn in_order_completion_retires_immediately() {
        let table = PendingTable::new();
        table.insert(req(0, 100, 0, 1));
        let ready = table.complete(0, 1);
        assert_eq!(ready.len(), 1);
        assert_eq!(ready[0].start_idx, 0);
        assert!(table.is_quiescent());
    }

    #[test]
    fn out_of_order_completion_buffers_until_predecessor_arrives() {
        let table = PendingTable::new();
        table.insert(req(0, 100, 0, 1));
        table.insert(req(100, 50, 0, 2));

        // B (token 2, start_idx 100) completes first: buffered, nothing retireable.
        assert!(table.complete(0, 2).is_empty());
        assert!(!table.is_quiescent());

        // A (token 1, start_idx 0) completes: both A and the buffered B retire.
        let ready = table.complete(0, 1);
        assert_eq!(ready.len(), 2);
        assert_eq!(ready[0].start_idx, 0);
        assert_eq!(ready[1].start_idx, 100);
        assert!(table.is_quiescent());
    }

    #[test]
    fn independent_peers_do_not_block_each_other() {
        let table = PendingTable::new();
        table.insert(req(0, 10, 0, 1));
        table.insert(req(0, 10, 1, 2));
        assert_eq!(table.complete(1, 2).len(), 1);
        assert_eq!(table.complete(0, 1).len(), 1);
    }
}
