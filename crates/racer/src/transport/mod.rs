// SPDX-License-Identifier: Apache-2.0 OR MIT

//! Transport abstraction: a thin, runtime-polymorphic wrapper over
//! whatever RDMA verbs provider (or loopback stand-in) moves bytes
//! between peers.
//!
//! The original picks its back-end at compile time via a template
//! parameter; here that becomes a trait object chosen by the `verbs`
//! Cargo feature, so the host engine's progress threads never know
//! which back-end they are driving.

pub mod inprocess;
#[cfg(feature = "verbs")]
pub mod verbs;

pub use inprocess::InProcessTransport;

use std::sync::Arc;

use crate::error::Result;
use crate::shard::ShardBuffer;

/// A registered, peer-addressable memory descriptor.
#[derive(Debug, Clone, Copy)]
pub struct MemoryRegion {
    pub addr: u64,
    pub rkey: u32,
    pub len: usize,
}

/// Which side of the wire a completion reports on.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CompletionKind {
    Send,
    Recv,
}

/// One entry drained from a transport's completion queue.
#[derive(Debug, Clone, Copy)]
pub struct Completion {
    pub wr_id: u64,
    /// For `Send`, the destination; for `Recv`, the source.
    pub peer: u32,
    pub kind: CompletionKind,
    pub ok: bool,
}

/// Capability set a back-end must provide. Mirrors the original's
/// template parameter surface: register/post_send/post_recv/poll, plus
/// `exchange` for the bind-time out-of-band rendezvous.
pub trait Transport: Send + Sync {
    /// Register `buf` for RDMA access, returning the descriptor peers use
    /// to target it.
    fn register(&self, buf: &[u8]) -> Result<MemoryRegion>;

    /// Post a SEND of `payload` to `peer`, tagged with `wr_id` for later
    /// completion matching.
    fn post_send(&self, peer: u32, payload: &[u8], wr_id: u64) -> Result<()>;

    /// Reserve a receive slot from `peer`, tagged with `wr_id`. The
    /// payload becomes available via [`take_received`](Self::take_received)
    /// once `poll` reports `wr_id` complete.
    fn post_recv(&self, peer: u32, wr_id: u64) -> Result<()>;

    /// Non-blocking drain of up to `max` completions.
    fn poll(&self, max: usize) -> Vec<Completion>;

    /// Retrieve and remove the payload delivered for a completed receive.
    fn take_received(&self, wr_id: u64) -> Option<Vec<u8>>;

    /// Bootstrap exchange of a small out-of-band blob with `peer` (used
    /// only for the handshake in [`crate::window`]), layered over the
    /// `Launcher`'s rendezvous rather than the data-plane rings.
    fn exchange(&self, peer: u32, blob: &[u8]) -> Result<Vec<u8>>;

    /// Publish this rank's shard so shared-host peers can resolve it
    /// through [`shared_shard`](Self::shared_shard) during the handshake.
    /// A no-op for back-ends with no notion of shared host memory.
    fn publish_local_shard(&self, _shard: Arc<ShardBuffer>) {}

    /// Returns `peer`'s shard handle when this back-end and `peer` share
    /// host memory (so the device worker can bypass the RDMA path
    /// entirely for that peer). Always `None` for a back-end with no
    /// shared-host notion, such as the real verbs transport.
    fn shared_shard(&self, _peer: u32) -> Option<Arc<ShardBuffer>> {
        None
    }
}
