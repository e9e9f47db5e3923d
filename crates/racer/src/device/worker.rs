// SPDX-License-Identifier: Apache-2.0 OR MIT

//! `DeviceWorker`: the handle application threads (standing in for
//! accelerator kernel threads) use to issue remote reads.

use std::sync::atomic::Ordering;
use std::sync::Arc;

use crate::cache::Lookup;
use crate::facade::EngineInner;

/// A cloneable handle for issuing `get`/`request` calls against one
/// engine. Cheap to clone (an `Arc` bump) — every kernel-thread
/// equivalent gets its own.
#[derive(Clone)]
pub struct DeviceWorker {
    inner: Arc<EngineInner>,
}

impl DeviceWorker {
    pub(crate) fn new(inner: Arc<EngineInner>) -> Self {
        Self { inner }
    }

    /// Load the scalar at `(peer, offset)`, blocking (busy-wait) until it
    /// resolves.
    ///
    /// `T` must be exactly `element_size` bytes — enforced at
    /// [`EngineConfig`](crate::config::EngineConfig) construction time,
    /// not per call.
    pub fn get<T: Copy>(&self, peer: u32, offset: u32) -> T {
        if let Some(direct) = self.inner.direct_ptrs[peer as usize].load_full() {
            return bytes_to_value(&direct.read_element(u64::from(offset)));
        }

        if self.inner.config.cache_enabled {
            loop {
                match self.inner.cache.lookup(peer, u64::from(offset)) {
                    Lookup::Hit(bytes) => return bytes_to_value(&bytes),
                    Lookup::Miss => {
                        self.issue(peer, offset);
                    }
                    Lookup::InFlight => std::hint::spin_loop(),
                }
            }
        } else {
            let seq = self.issue(peer, offset);
            loop {
                if let Some((_, bytes)) = self.inner.req_values.remove(&(peer, seq)) {
                    return bytes_to_value(&bytes);
                }
                std::hint::spin_loop();
            }
        }
    }

    /// Fire-and-forget variant of `get`: issues the request (if not
    /// already cached or in flight) without waiting for the reply. A
    /// later `get` for the same key observes the cache once it resolves.
    pub fn request<T: Copy>(&self, peer: u32, offset: u32) {
        if self.inner.direct_ptrs[peer as usize].load().is_some() {
            return;
        }
        if self.inner.config.cache_enabled {
            if matches!(self.inner.cache.lookup(peer, u64::from(offset)), Lookup::Miss) {
                self.issue(peer, offset);
            }
        } else {
            self.issue(peer, offset);
        }
        let _ = std::marker::PhantomData::<T>;
    }

    /// Write a local value directly into this rank's own shard. Not
    /// part of the accelerator read path; used by tests and the
    /// benchmark driver to seed values before a remote `get`.
    pub fn put<T: Copy>(&self, offset: u32, value: T) {
        self.inner.shard.write_element(u64::from(offset), bytes_of(&value));
    }

    fn issue(&self, peer: u32, offset: u32) -> u64 {
        let seq = self.inner.req_produced[peer as usize].fetch_add(1, Ordering::AcqRel);

        let capacity = u64::from(self.inner.config.queue_capacity);
        let margin = u64::from(self.inner.config.backpressure_margin);
        while seq.saturating_sub(self.inner.ack_device[peer as usize].load(Ordering::Acquire))
            >= capacity - margin
        {
            let host_ack = self.inner.ack_host[peer as usize].load(Ordering::Acquire);
            self.inner.ack_device[peer as usize].store(host_ack, Ordering::Release);
            std::hint::spin_loop();
        }

        self.inner.tx_element_request[peer as usize].publish(seq, offset);
        seq
    }
}

fn bytes_of<T: Copy>(value: &T) -> &[u8] {
    // SAFETY: `T: Copy` guarantees no interior padding assumptions are
    // violated by reading its raw bytes; the slice never outlives `value`.
    unsafe { std::slice::from_raw_parts((value as *const T).cast::<u8>(), std::mem::size_of::<T>()) }
}

fn bytes_to_value<T: Copy>(bytes: &[u8]) -> T {
    assert_eq!(bytes.len(), std::mem::size_of::<T>(), "element size mismatch");
    // SAFETY: length checked above; `T: Copy` means no drop glue to worry
    // about and an unaligned read is sound for any bit pattern.
    unsafe { std::ptr::read_unaligned(bytes.as_ptr().cast::<T>()) }
}
