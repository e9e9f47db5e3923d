// SPDX-License-Identifier: Apache-2.0 OR MIT

//! Engine configuration — single source of truth for the constants that
//! govern queue sizing, batching, and back-pressure.
//!
//! Two levels, same split the rest of the ambient stack uses elsewhere in
//! this kind of system: compile-time defaults matching the original
//! design, and a runtime `EngineConfig` that tests shrink so that wrap and
//! stall scenarios finish in milliseconds instead of requiring 2^20
//! requests.

use crate::error::{EngineError, Result};

/// Default per-peer element-request ring capacity (`Q` in the design doc).
pub const DEFAULT_QUEUE_CAPACITY: u32 = 1 << 20;
/// Default minimum batch size the aggregator tries to reach before a
/// stall counts as "enough" to force a flush.
pub const DEFAULT_MTU: u32 = 16_384;
/// Default number of stall polls the aggregator tolerates below `mtu`
/// before flushing anyway.
pub const DEFAULT_STALL_THRESHOLD: u32 = 4;
/// Default back-pressure margin: a device worker throttles once
/// `req_produced - ack_device >= queue_capacity - margin`.
pub const DEFAULT_BACKPRESSURE_MARGIN: u32 = 1024;

/// Construction-time configuration for one [`crate::facade::RacerEngine`].
#[derive(Debug, Clone)]
pub struct EngineConfig {
    /// Per-peer element-request ring capacity. Must be a power of two.
    pub queue_capacity: u32,
    /// Aggregator batching threshold.
    pub mtu: u32,
    /// Stall polls tolerated below `mtu` before forcing a flush.
    pub stall_threshold: u32,
    /// Back-pressure margin applied against `queue_capacity`.
    pub backpressure_margin: u32,
    /// Size in bytes of one shard element. Must fit in a single block
    /// reply payload entry; large-object transfer is out of scope.
    pub element_size: usize,
    /// Number of peers (ranks) participating in this run.
    pub peer_count: u32,
    /// Whether the remote access cache is consulted. When `false`, every
    /// `get` issues a request and waits on the reply queue directly.
    pub cache_enabled: bool,
    /// Whether the bind-time handshake may install a `direct_ptrs`
    /// shortcut for peers the transport reports as sharing this host
    /// (always true for `InProcessTransport`). Tests that specifically
    /// exercise the RDMA ring pipeline set this to `false` so a
    /// same-process peer doesn't bypass it.
    pub direct_ptrs_enabled: bool,
}

impl EngineConfig {
    /// Construct and validate a configuration for `peer_count` peers and
    /// shard elements of `element_size` bytes, using the module defaults
    /// for everything else.
    pub fn new(peer_count: u32, element_size: usize) -> Result<Self> {
        Self {
            queue_capacity: DEFAULT_QUEUE_CAPACITY,
            mtu: DEFAULT_MTU,
            stall_threshold: DEFAULT_STALL_THRESHOLD,
            backpressure_margin: DEFAULT_BACKPRESSURE_MARGIN,
            element_size,
            peer_count,
            cache_enabled: true,
            direct_ptrs_enabled: true,
        }
        .validate()
    }

    /// A configuration with a much smaller ring, intended for tests that
    /// want to exercise wrap-around and MTU-stall behavior without issuing
    /// a million requests.
    pub fn for_tests(peer_count: u32, element_size: usize, queue_capacity: u32) -> Result<Self> {
        Self {
            queue_capacity,
            mtu: DEFAULT_MTU,
            stall_threshold: DEFAULT_STALL_THRESHOLD,
            backpressure_margin: queue_capacity.min(DEFAULT_BACKPRESSURE_MARGIN) / 4,
            element_size,
            peer_count,
            cache_enabled: true,
            direct_ptrs_enabled: true,
        }
        .validate()
    }

    pub fn with_mtu(mut self, mtu: u32) -> Self {
        self.mtu = mtu;
        self
    }

    pub fn with_stall_threshold(mut self, stall_threshold: u32) -> Self {
        self.stall_threshold = stall_threshold;
        self
    }

    pub fn with_cache_enabled(mut self, enabled: bool) -> Self {
        self.cache_enabled = enabled;
        self
    }

    pub fn with_direct_ptrs_enabled(mut self, enabled: bool) -> Self {
        self.direct_ptrs_enabled = enabled;
        self
    }

    fn validate(self) -> Result<Self> {
        if !self.queue_capacity.is_power_of_two() {
            return Err(EngineError::configuration(format!(
                "queue_capacity {} is not a power of two",
                self.queue_capacity
            )));
        }
        if self.peer_count == 0 {
            return Err(EngineError::configuration(
                "peer_count must be at least 1",
            ));
        }
        if self.element_size == 0 || self.element_size > crate::wire::MAX_PAYLOAD_ELEMENT_BYTES {
            return Err(EngineError::configuration(format!(
                "element_size {} does not fit in one block-reply payload (max {})",
                self.element_size,
                crate::wire::MAX_PAYLOAD_ELEMENT_BYTES
            )));
        }
        if self.backpressure_margin >= self.queue_capacity {
            return Err(EngineError::configuration(
                "backpressure_margin must be smaller than queue_capacity",
            ));
        }
        Ok(self)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn rejects_non_power_of_two_capacity() {
        let err = EngineConfig::for_tests(2, 8, 100).unwrap_err();
        assert!(matches!(err, EngineError::Configuration(_)));
    }

    #[test]
    fn rejects_zero_peers() {
        let err = EngineConfig::new(0, 8).unwrap_err();
        assert!(matches!(err, EngineError::Configuration(_)));
    }

    #[test]
    fn accepts_spec_defaults() {
        let cfg = EngineConfig::new(4, 8).unwrap();
        assert_eq!(cfg.queue_capacity, DEFAULT_QUEUE_CAPACITY);
        assert_eq!(cfg.mtu, DEFAULT_MTU);
    }
}
