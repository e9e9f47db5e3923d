// SPDX-License-Identifier: Apache-2.0 OR MIT

//! Default transport back-end: an in-process loopback usable for
//! single-host multi-rank tests and the bundled benchmark, with no
//! hardware dependency.
//!
//! Peers are simulated as handles sharing a full mesh of
//! [`SpscPool`]-backed mailboxes — the same ring primitive used
//! everywhere else in the engine, per the design's note that the
//! loopback back-end reuses those primitives rather than reaching for a
//! generic channel type.

use std::collections::VecDeque;
use std::sync::atomic::{AtomicU32, AtomicU64, Ordering};
use std::sync::{Arc, Mutex};

use arc_swap::ArcSwapOption;
use dashmap::DashMap;
use log::warn;

use crate::error::Result;
use crate::queue::SpscPool;
use crate::shard::ShardBuffer;
use crate::transport::{Completion, CompletionKind, MemoryRegion, Transport};

const MAILBOX_CAPACITY: usize = 4096;

/// One rank's handle into an in-process loopback mesh built by
/// [`InProcessTransport::team`].
pub struct InProcessTransport {
    rank: u32,
    /// `inboxes[peer]` carries messages sent by `peer` to this rank.
    inboxes: Vec<Arc<SpscPool<Vec<u8>>>>,
    /// `outboxes[peer]` carries messages sent by this rank to `peer`.
    outboxes: Vec<Arc<SpscPool<Vec<u8>>>>,
    next_rkey: AtomicU32,
    send_completions: Mutex<VecDeque<Completion>>,
    pending_recvs: Mutex<VecDeque<(u32, u64)>>,
    received: DashMap<u64, Vec<u8>>,
    /// `shards[rank]` holds that rank's shard once published — every
    /// loopback peer shares this same host, so `shared_shard` always has
    /// an answer once the owning rank has called `publish_local_shard`.
    shards: Arc<Vec<ArcSwapOption<ShardBuffer>>>,
}

impl InProcessTransport {
    /// Build `size` loopback transport handles sharing a full mailbox
    /// mesh, one per simulated rank.
    pub fn team(size: u32) -> Vec<Self> {
        assert!(size >= 1, "a league needs at least one rank");
        let size = size as usize;
        let mut mesh: Vec<Vec<Arc<SpscPool<Vec<u8>>>>> = Vec::with_capacity(size);
        for _ in 0..size {
            let row = (0..size)
                .map(|_| Arc::new(SpscPool::fill_empty(MAILBOX_CAPACITY, Vec::new())))
                .collect();
            mesh.push(row);
        }
        let shards = Arc::new((0..size).map(|_| ArcSwapOption::from(None)).collect());
        (0..size)
            .map(|rank| {
                let inboxes = (0..size).map(|src| mesh[src][rank].clone()).collect();
                let outboxes = (0..size).map(|dst| mesh[rank][dst].clone()).collect();
                Self {
                    rank: rank as u32,
                    inboxes,
                    outboxes,
                    next_rkey: AtomicU32::new(1),
                    send_completions: Mutex::new(VecDeque::new()),
                    pending_recvs: Mutex::new(VecDeque::new()),
                    received: DashMap::new(),
                    shards: shards.clone(),
                }
            })
            .collect()
    }

    /// A single-rank loopback, for tests that exercise the `num_pes==1`
    /// direct-pointer path and never actually send.
    pub fn solo() -> Self {
        Self::team(1).pop().expect("team(1) yields one transport")
    }

    #[must_use]
    pub fn rank(&self) -> u32 {
        self.rank
    }
}

impl Transport for InProcessTransport {
    fn register(&self, buf: &[u8]) -> Result<MemoryRegion> {
        Ok(MemoryRegion {
            addr: buf.as_ptr() as u64,
            rkey: self.next_rkey.fetch_add(1, Ordering::Relaxed),
            len: buf.len(),
        })
    }

    fn post_send(&self, peer: u32, payload: &[u8], wr_id: u64) -> Result<()> {
        self.outboxes[peer as usize].append(payload.to_vec());
        // Loopback delivery is synchronous: the send is "complete" the
        // instant its payload lands in the peer's mailbox.
        self.send_completions.lock().unwrap().push_back(Completion {
            wr_id,
            peer,
            kind: CompletionKind::Send,
            ok: true,
        });
        Ok(())
    }

    fn post_recv(&self, peer: u32, wr_id: u64) -> Result<()> {
        self.pending_recvs.lock().unwrap().push_back((peer, wr_id));
        Ok(())
    }

    fn poll(&self, max: usize) -> Vec<Completion> {
        let mut out = Vec::with_capacity(max.min(MAILBOX_CAPACITY));

        {
            let mut sends = self.send_completions.lock().unwrap();
            while out.len() < max {
                match sends.pop_front() {
                    Some(completion) => out.push(completion),
                    None => break,
                }
            }
        }

        if out.len() >= max {
            return out;
        }

        let mut pending = self.pending_recvs.lock().unwrap();
        let mut still_pending = VecDeque::with_capacity(pending.len());
        while let Some((peer, wr_id)) = pending.pop_front() {
            if out.len() >= max {
                still_pending.push_back((peer, wr_id));
                continue;
            }
            match self.inboxes[peer as usize].try_pop() {
                Some(bytes) => {
                    self.received.insert(wr_id, bytes);
                    out.push(Completion {
                        wr_id,
                        peer,
                        kind: CompletionKind::Recv,
                        ok: true,
                    });
                }
                None => still_pending.push_back((peer, wr_id)),
            }
        }
        *pending = still_pending;
        out
    }

    fn take_received(&self, wr_id: u64) -> Option<Vec<u8>> {
        self.received.remove(&wr_id).map(|(_, bytes)| bytes)
    }

    fn exchange(&self, peer: u32, blob: &[u8]) -> Result<Vec<u8>> {
        static EXCHANGE_WR_ID: AtomicU64 = AtomicU64::new(u64::MAX / 2);
        let wr_id = EXCHANGE_WR_ID.fetch_add(1, Ordering::Relaxed);
        self.outboxes[peer as usize].append(blob.to_vec());
        // The handshake runs before any data-plane traffic, so claiming
        // the next inbox entry unconditionally is safe.
        let reply = self.inboxes[peer as usize].pop();
        if reply.is_empty() {
            warn!("handshake exchange with peer {peer} returned an empty blob");
        }
        let _ = wr_id;
        Ok(reply)
    }

    fn publish_local_shard(&self, shard: Arc<ShardBuffer>) {
        self.shards[self.rank as usize].store(Some(shard));
    }

    fn shared_shard(&self, peer: u32) -> Option<Arc<ShardBuffer>> {
        self.shards[peer as usize].load_full()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::thread;

    #[test]
    fn send_then_recv_round_trips_payload() {
        let mut team = InProcessTransport::team(2);
        let peer1 = team.pop().unwrap();
        let peer0 = team.pop().unwrap();

        peer0.post_send(1, b"hello", 42).unwrap();
        peer1.post_recv(0, 42).unwrap();

        let completions = peer1.poll(8);
        assert_eq!(completions.len(), 1);
        assert_eq!(completions[0].wr_id, 42);
        assert!(completions[0].ok);
        assert_eq!(peer1.take_received(42), Some(b"hello".to_vec()));
    }

    #[test]
    fn exchange_is_symmetric_across_threads() {
        let mut team = InProcessTransport::team(2);
        let peer1 = team.pop().unwrap();
        let peer0 = team.pop().unwrap();

        let h0 = thread::spawn(move || peer0.exchange(1, b"from-0"));
        let h1 = thread::spawn(move || peer1.exchange(0, b"from-1"));

        assert_eq!(h0.join().unwrap().unwrap(), b"from-1");
        assert_eq!(h1.join().unwrap().unwrap(), b"from-0");
    }

    #[test]
    fn register_reports_buffer_length() {
        let transport = InProcessTransport::solo();
        let buf = vec![0u8; 128];
        let region = transport.register(&buf).unwrap();
        assert_eq!(region.len, 128);
    }
}
