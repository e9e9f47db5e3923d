// SPDX-License-Identifier: Apache-2.0 OR MIT

//! Engine façade: the lifecycle object applications hold. Allocates the
//! engine, binds it to a shard buffer, spawns the progress threads,
//! performs the peer handshake, and tears everything down on `Drop`.

use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::Arc;
use std::thread::JoinHandle;

use arc_swap::ArcSwapOption;
use crossbeam::channel::{unbounded, Sender};
use dashmap::DashMap;
use log::{debug, info};

use crate::cache::RemoteAccessCache;
use crate::config::EngineConfig;
use crate::device::{aggregator, responder};
use crate::engine::pending::PendingTable;
use crate::engine::{ack_pump, request_pump, response_pump};
use crate::error::Result;
use crate::launcher::Launcher;
use crate::queue::{CommandRing, ElementRing};
use crate::registry;
use crate::shard::ShardBuffer;
use crate::transport::Transport;
use crate::window::{RemoteWindow, WindowHandshake};

/// An inbound block request, staged between the response-pump (which
/// decoded it off the wire) and the device responder team (which
/// gathers the reply).
pub(crate) struct InboundRequest {
    pub origin_peer: u32,
    pub token: u32,
    pub offsets: Vec<u32>,
}

/// A gathered reply, staged between the responder (which produced it)
/// and the response-pump (which sends it out).
pub(crate) struct ReplyStaging {
    pub dest_peer: u32,
    pub token: u32,
    pub values: Vec<u8>,
}

/// Everything one engine instance owns: counters, queues, transport
/// state, cache, windows, and the `terminate`/`request_done`/
/// `response_done` coordination flags. Shared via `Arc` with every
/// progress thread and the process-scope registry.
pub struct EngineInner {
    pub(crate) config: EngineConfig,
    pub(crate) rank: u32,
    pub(crate) launcher: Arc<dyn Launcher>,
    pub(crate) transport: Arc<dyn Transport>,
    pub(crate) shard: Arc<ShardBuffer>,
    pub(crate) direct_ptrs: Vec<ArcSwapOption<ShardBuffer>>,
    pub(crate) cache: RemoteAccessCache,
    pub(crate) windows: Vec<RemoteWindow>,

    pub(crate) tx_element_request: Vec<ElementRing>,
    pub(crate) tx_block_request_cmd: CommandRing,
    pub(crate) rx_block_request_cmd: CommandRing,
    pub(crate) tx_block_reply_cmd: CommandRing,

    pub(crate) req_produced: Vec<AtomicU64>,
    pub(crate) req_aggregated: Vec<AtomicU64>,
    pub(crate) reply_sent: Vec<AtomicU64>,
    pub(crate) ack_host: Vec<AtomicU64>,
    pub(crate) ack_device: Vec<AtomicU64>,

    pub(crate) pending: PendingTable,
    pub(crate) inbound_requests: DashMap<u64, InboundRequest>,
    pub(crate) reply_staging: DashMap<u64, ReplyStaging>,
    /// Non-cached `get` callers park their result here, keyed by
    /// `(peer, seq)`, when `cache_enabled` is `false`.
    pub(crate) req_values: DashMap<(u32, u64), Vec<u8>>,

    pub(crate) ack_tx: Sender<(u32, u32)>,

    /// Shared wr_id source for every `post_send`/`post_recv` call across
    /// the request-pump and response-pump, so the transport's completion
    /// bookkeeping never sees two in-flight posts claiming the same id.
    pub(crate) next_wr_id: AtomicU64,

    pub(crate) request_done: AtomicBool,
    pub(crate) response_done: AtomicBool,
    pub(crate) terminate: AtomicBool,
}

impl EngineInner {
    #[must_use]
    pub(crate) fn peer_count(&self) -> usize {
        self.windows.len()
    }

    pub(crate) fn next_wr_id(&self) -> u64 {
        self.next_wr_id.fetch_add(1, Ordering::Relaxed)
    }

    /// Quiesce all traffic: see the module-level fence steps in
    /// `RacerEngine::fence`.
    pub(crate) fn fence(&self) {
        self.request_done.store(true, Ordering::Release);
        while !self.response_done.load(Ordering::Acquire) {
            std::thread::yield_now();
        }
        for peer in 0..self.peer_count() {
            while self.req_aggregated[peer].load(Ordering::Acquire)
                != self.req_produced[peer].load(Ordering::Acquire)
            {
                std::thread::yield_now();
            }
        }
        while !self.pending.is_quiescent() {
            std::thread::yield_now();
        }
        for peer in 0..self.peer_count() {
            while self.ack_host[peer].load(Ordering::Acquire)
                != self.req_aggregated[peer].load(Ordering::Acquire)
            {
                std::thread::yield_now();
            }
            self.ack_device[peer].store(self.ack_host[peer].load(Ordering::Acquire), Ordering::Release);
        }
        self.cache.invalidate_all();
        self.launcher.barrier();
        self.request_done.store(false, Ordering::Release);
        self.response_done.store(false, Ordering::Release);
    }
}

/// The construction-time engine lifecycle object. `Drop` fences the
/// engine, raises `terminate`, joins every progress thread, and
/// de-registers from the process-scope registry.
pub struct RacerEngine {
    inner: Arc<EngineInner>,
    threads: Vec<JoinHandle<()>>,
}

impl RacerEngine {
    /// Construct an engine for `local_shard`, bound to `peer_count`
    /// peers via `launcher` and `transport`, spawning its progress
    /// threads and performing the handshake before returning.
    pub fn bind(
        config: EngineConfig,
        local_shard: ShardBuffer,
        launcher: Arc<dyn Launcher>,
        transport: Arc<dyn Transport>,
    ) -> Result<Self> {
        let peer_count = config.peer_count as usize;
        let rank = launcher.rank();
        let windows = (0..peer_count as u32)
            .map(|peer| RemoteWindow::new(peer, config.element_size))
            .collect();
        let tx_element_request = (0..peer_count)
            .map(|_| ElementRing::new(config.queue_capacity))
            .collect();

        let (ack_tx, ack_rx) = unbounded();

        let inner = Arc::new(EngineInner {
            rank,
            direct_ptrs: (0..peer_count).map(|_| ArcSwapOption::from(None)).collect(),
            cache: RemoteAccessCache::new(),
            windows,
            tx_element_request,
            tx_block_request_cmd: CommandRing::new(config.queue_capacity),
            rx_block_request_cmd: CommandRing::new(config.queue_capacity),
            tx_block_reply_cmd: CommandRing::new(config.queue_capacity),
            req_produced: (0..peer_count).map(|_| AtomicU64::new(0)).collect(),
            req_aggregated: (0..peer_count).map(|_| AtomicU64::new(0)).collect(),
            reply_sent: (0..peer_count).map(|_| AtomicU64::new(0)).collect(),
            ack_host: (0..peer_count).map(|_| AtomicU64::new(0)).collect(),
            ack_device: (0..peer_count).map(|_| AtomicU64::new(0)).collect(),
            pending: PendingTable::new(),
            inbound_requests: DashMap::new(),
            reply_staging: DashMap::new(),
            req_values: DashMap::new(),
            ack_tx,
            next_wr_id: AtomicU64::new(0),
            request_done: AtomicBool::new(false),
            response_done: AtomicBool::new(false),
            terminate: AtomicBool::new(false),
            shard: Arc::new(local_shard),
            launcher,
            transport,
            config,
        });

        Self::handshake(&inner)?;

        let mut threads = Vec::with_capacity(5);
        threads.push(spawn_named("racer-aggregator", {
            let inner = inner.clone();
            move || aggregator::run(&inner)
        }));
        threads.push(spawn_named("racer-responder", {
            let inner = inner.clone();
            move || responder::run(&inner)
        }));
        threads.push(spawn_named("racer-request-pump", {
            let inner = inner.clone();
            move || request_pump::run(&inner)
        }));
        threads.push(spawn_named("racer-response-pump", {
            let inner = inner.clone();
            move || response_pump::run(&inner)
        }));
        threads.push(spawn_named("racer-ack-pump", {
            let inner = inner.clone();
            move || ack_pump::run(&inner, &ack_rx)
        }));

        registry::register(&inner);
        info!("engine bound for rank {} with {} peers", inner.rank, peer_count);

        Ok(Self { inner, threads })
    }

    /// Exchange per-peer window addresses, then install a `direct_ptrs`
    /// shortcut for every peer the transport reports as sharing this
    /// host. The data path moves bytes as tagged SENDs rather than RDMA
    /// WRITEs into a registered window, so the exchanged `{addr, rkey}`
    /// pair is not load-bearing for correctness here; it is still carried
    /// so `RemoteWindow` matches the bind-time handshake shape a real
    /// verbs deployment needs.
    ///
    /// This rank's own shard is published to the transport before the
    /// barrier below so every peer's subsequent `shared_shard` lookup can
    /// see it; `InProcessTransport` always reports shared-host, so every
    /// peer gets a direct pointer automatically in single-process runs
    /// unless the engine was configured with `direct_ptrs_enabled(false)`.
    fn handshake(inner: &Arc<EngineInner>) -> Result<()> {
        inner.transport.publish_local_shard(inner.shard.clone());
        inner.launcher.barrier();

        for peer in 0..inner.peer_count() as u32 {
            let local_region = inner.transport.register(&inner.rank.to_le_bytes())?;
            let local_blob = encode_window_blob(local_region.addr, local_region.rkey);
            let remote_blob = inner.transport.exchange(peer, &local_blob)?;
            let (rx_addr, rx_rkey) = decode_window_blob(&remote_blob);
            inner.windows[peer as usize].install_handshake(WindowHandshake {
                tx_addr: local_region.addr,
                tx_rkey: local_region.rkey,
                rx_addr,
                rx_rkey,
            });

            if inner.config.direct_ptrs_enabled && peer != inner.rank {
                if let Some(shard) = inner.transport.shared_shard(peer) {
                    inner.direct_ptrs[peer as usize].store(Some(shard));
                    debug!("peer {peer} shares this host; direct pointer installed for rank {}", inner.rank);
                }
            }
            debug!("handshake with peer {peer} complete for rank {}", inner.rank);
        }
        inner.launcher.barrier();
        Ok(())
    }

    /// Quiesce all traffic on this engine's shard; required before any
    /// observer reads shard values written by a concurrent peer.
    pub fn fence(&self) {
        self.inner.fence();
    }

    #[must_use]
    pub fn rank(&self) -> u32 {
        self.inner.rank
    }

    /// Access to the local shard, for tests and the benchmark driver
    /// that want to `put` a value before fencing.
    #[must_use]
    pub fn local_shard(&self) -> &ShardBuffer {
        &self.inner.shard
    }

    /// Install a same-host direct pointer to `peer`'s shard, bypassing
    /// the RDMA path for that peer entirely. Called by in-process test
    /// harnesses wiring up a team of engines that share one process.
    /// Safe to call at any point after `bind`: the device worker reads
    /// `direct_ptrs` through a lock-free `ArcSwapOption`.
    pub fn link_direct(&self, peer: u32, shard: Arc<ShardBuffer>) {
        self.inner.direct_ptrs[peer as usize].store(Some(shard));
    }

    /// Whether `peer` currently has a `direct_ptrs` shortcut installed,
    /// whether from the bind-time handshake or a manual `link_direct`.
    #[must_use]
    pub fn has_direct_pointer(&self, peer: u32) -> bool {
        self.inner.direct_ptrs[peer as usize].load().is_some()
    }

    /// A cloneable handle for issuing `get`/`request`/`put` calls against
    /// this engine. Cheap — callers outside the binding thread (test
    /// harnesses standing in for kernel-launch sites) get their own.
    #[must_use]
    pub fn worker(&self) -> crate::device::DeviceWorker {
        crate::device::DeviceWorker::new(self.inner.clone())
    }

    #[must_use]
    pub(crate) fn inner(&self) -> &Arc<EngineInner> {
        &self.inner
    }
}

impl Drop for RacerEngine {
    fn drop(&mut self) {
        self.inner.fence();
        self.inner.terminate.store(true, Ordering::Release);
        for thread in self.threads.drain(..) {
            let _ = thread.join();
        }
    }
}

fn spawn_named(name: &'static str, f: impl FnOnce() + Send + 'static) -> JoinHandle<()> {
    std::thread::Builder::new()
        .name(name.to_string())
        .spawn(f)
        .expect("spawning a racer progress thread")
}

fn encode_window_blob(addr: u64, rkey: u32) -> [u8; 12] {
    let mut buf = [0u8; 12];
    buf[0..8].copy_from_slice(&addr.to_le_bytes());
    buf[8..12].copy_from_slice(&rkey.to_le_bytes());
    buf
}

fn decode_window_blob(bytes: &[u8]) -> (u64, u32) {
    if bytes.len() < 12 {
        return (0, 0);
    }
    let addr = u64::from_le_bytes(bytes[0..8].try_into().unwrap());
    let rkey = u32::from_le_bytes(bytes[8..12].try_into().unwrap());
    (addr, rkey)
}
