// SPDX-License-Identifier: Apache-2.0 OR MIT

//! Real RDMA back-end, gated behind the `verbs` feature. Wraps one
//! reliable-connected queue pair per peer over the `ibverbs` crate.
//!
//! Compiled out by default: most development and every test in this
//! crate runs against [`super::inprocess::InProcessTransport`] instead,
//! since real RDMA-capable hardware is not assumed to be present.

use std::collections::HashMap;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Mutex;

use ibverbs::{CompletionQueue, Context, ProtectionDomain, QueuePair, QueuePairBuilder};
use log::{debug, error, info};

use crate::error::{EngineError, Result};
use crate::transport::{Completion, CompletionKind, MemoryRegion, Transport};

/// One peer's queue pair plus the small fixed pool of registered buffers
/// used to stage SEND/RECV payloads.
struct PeerQueuePair {
    qp: QueuePair,
}

/// Owns the verbs device context, protection domain, and completion
/// queue shared by every peer's queue pair.
pub struct VerbsTransport {
    _context: Context,
    pd: ProtectionDomain,
    cq: CompletionQueue,
    peers: Mutex<HashMap<u32, PeerQueuePair>>,
    next_wr_id: AtomicU64,
    staged: Mutex<HashMap<u64, Vec<u8>>>,
    wr_meta: Mutex<HashMap<u64, (u32, CompletionKind)>>,
}

impl VerbsTransport {
    /// Open the first RDMA-capable device reported by the system and
    /// allocate a shared protection domain and completion queue.
    pub fn open() -> Result<Self> {
        let devices = ibverbs::devices()
            .map_err(|e| EngineError::transport_fatal(format!("enumerating devices: {e}")))?;
        let device = devices
            .iter()
            .next()
            .ok_or_else(|| EngineError::transport_fatal("no RDMA-capable device present"))?;
        let context = device
            .open()
            .map_err(|e| EngineError::transport_fatal(format!("opening device context: {e}")))?;
        let pd = context
            .alloc_pd()
            .map_err(|e| EngineError::transport_fatal(format!("allocating protection domain: {e}")))?;
        let cq = context
            .create_cq(1024, 0)
            .map_err(|e| EngineError::transport_fatal(format!("creating completion queue: {e}")))?;
        info!("verbs transport opened on {:?}", device.name());
        Ok(Self {
            _context: context,
            pd,
            cq,
            peers: Mutex::new(HashMap::new()),
            next_wr_id: AtomicU64::new(0),
            staged: Mutex::new(HashMap::new()),
            wr_meta: Mutex::new(HashMap::new()),
        })
    }

    /// Bring up a reliable-connected queue pair to `peer`, given the
    /// remote's QP attributes exchanged out of band via the
    /// [`crate::launcher::Launcher`] rendezvous. Connection setup itself
    /// is driven by [`crate::window`], which owns the handshake payload
    /// format; this only creates the local QP half.
    pub fn add_peer(&self, peer: u32) -> Result<()> {
        let qp_builder = QueuePairBuilder::new(&self.pd, &self.cq, &self.cq)
            .map_err(|e| EngineError::transport_fatal(format!("building QP for peer {peer}: {e}")))?;
        let qp = qp_builder
            .build()
            .map_err(|e| EngineError::transport_fatal(format!("creating QP for peer {peer}: {e}")))?;
        self.peers
            .lock()
            .unwrap()
            .insert(peer, PeerQueuePair { qp });
        debug!("queue pair created for peer {peer}");
        Ok(())
    }

    fn next_wr_id(&self) -> u64 {
        self.next_wr_id.fetch_add(1, Ordering::Relaxed)
    }
}

impl Transport for VerbsTransport {
    fn register(&self, buf: &[u8]) -> Result<MemoryRegion> {
        let mr = self
            .pd
            .register(buf)
            .map_err(|e| EngineError::transport_fatal(format!("registering buffer: {e}")))?;
        Ok(MemoryRegion {
            addr: mr.addr() as u64,
            rkey: mr.rkey(),
            len: buf.len(),
        })
    }

    fn post_send(&self, peer: u32, payload: &[u8], wr_id: u64) -> Result<()> {
        let peers = self.peers.lock().unwrap();
        let pqp = peers
            .get(&peer)
            .ok_or_else(|| EngineError::protocol_violation(format!("no queue pair for peer {peer}")))?;
        let mr = self
            .pd
            .register(payload)
            .map_err(|e| EngineError::transport_fatal(format!("registering send payload: {e}")))?;
        // SAFETY: `mr` outlives the posted send because the provider
        // completes it (or reports an error) before this call returns
        // control past the completion queue drain in `poll`.
        unsafe {
            pqp.qp
                .post_send(&mr, .., wr_id)
                .map_err(|e| EngineError::transport_fatal(format!("post_send to peer {peer}: {e}")))?;
        }
        self.wr_meta
            .lock()
            .unwrap()
            .insert(wr_id, (peer, CompletionKind::Send));
        Ok(())
    }

    fn post_recv(&self, peer: u32, wr_id: u64) -> Result<()> {
        let peers = self.peers.lock().unwrap();
        let pqp = peers
            .get(&peer)
            .ok_or_else(|| EngineError::protocol_violation(format!("no queue pair for peer {peer}")))?;
        let mut scratch = vec![0u8; crate::wire::MAX_PAYLOAD_ELEMENT_BYTES];
        let mr = self
            .pd
            .register(&mut scratch)
            .map_err(|e| EngineError::transport_fatal(format!("registering recv buffer: {e}")))?;
        // SAFETY: the registered scratch buffer is kept alive in
        // `staged` until its completion is observed by `poll`.
        unsafe {
            pqp.qp
                .post_receive(&mr, .., wr_id)
                .map_err(|e| EngineError::transport_fatal(format!("post_recv from peer {peer}: {e}")))?;
        }
        self.staged.lock().unwrap().insert(wr_id, scratch);
        self.wr_meta
            .lock()
            .unwrap()
            .insert(wr_id, (peer, CompletionKind::Recv));
        Ok(())
    }

    fn poll(&self, max: usize) -> Vec<Completion> {
        let mut completions = Vec::with_capacity(max);
        let mut wc = vec![Default::default(); max];
        match self.cq.poll(&mut wc) {
            Ok(entries) => {
                for entry in entries {
                    let ok = entry.is_valid() && entry.error().is_none();
                    if !ok {
                        error!(
                            "verbs completion error on wr_id {}: {:?}",
                            entry.wr_id(),
                            entry.error()
                        );
                    }
                    let (peer, kind) = self
                        .wr_meta
                        .lock()
                        .unwrap()
                        .remove(&entry.wr_id())
                        .unwrap_or((u32::MAX, CompletionKind::Recv));
                    completions.push(Completion {
                        wr_id: entry.wr_id(),
                        peer,
                        kind,
                        ok,
                    });
                }
            }
            Err(e) => {
                error!("polling completion queue: {e}");
            }
        }
        completions
    }

    fn take_received(&self, wr_id: u64) -> Option<Vec<u8>> {
        self.staged.lock().unwrap().remove(&wr_id)
    }

    fn exchange(&self, peer: u32, blob: &[u8]) -> Result<Vec<u8>> {
        // The verbs back-end has no data-plane queue pair until
        // `add_peer` runs, so the handshake itself always rides the
        // `Launcher`'s out-of-band collective rather than this QP.
        let _ = (peer, blob, self.next_wr_id());
        Err(EngineError::protocol_violation(
            "VerbsTransport::exchange is handled by the Launcher rendezvous, not the QP",
        ))
    }
}
