// SPDX-License-Identifier: Apache-2.0 OR MIT

//! Aggregator team: one of the two resident "device teams", reimplemented
//! as a persistent OS thread since this host-only port has no
//! persistent-kernel launch to map it onto.
//!
//! Per peer, batches `tx_element_request` slots into a single
//! block-request command once either the MTU threshold is reached, the
//! stall-poll budget runs out, or a fence is in progress and everything
//! outstanding must flush regardless of size.

use std::sync::atomic::Ordering;
use std::sync::Arc;

use crate::facade::EngineInner;

/// Runs until `terminate` is observed. Toggles `response_done` once per
/// fence episode rather than exiting: `request_done` is raised and
/// lowered by every `fence()` call, not just the final one.
pub fn run(inner: &Arc<EngineInner>) {
    let peer_count = inner.peer_count();
    let mut stall_counts = vec![0u32; peer_count];
    let mut next_cmd_seq: u64 = 0;

    loop {
        if inner.terminate.load(Ordering::Acquire) {
            return;
        }

        let request_done = inner.request_done.load(Ordering::Acquire);
        flush_ready_peers(inner, &mut stall_counts, &mut next_cmd_seq, request_done);

        if request_done {
            inner.response_done.store(true, Ordering::Release);
            while inner.request_done.load(Ordering::Acquire) {
                if inner.terminate.load(Ordering::Acquire) {
                    return;
                }
                std::thread::yield_now();
            }
        } else {
            std::thread::yield_now();
        }
    }
}

fn flush_ready_peers(
    inner: &Arc<EngineInner>,
    stall_counts: &mut [u32],
    next_cmd_seq: &mut u64,
    force: bool,
) {
    for peer in 0..inner.peer_count() {
        let head = inner.req_aggregated[peer].load(Ordering::Acquire);
        let tail = inner.req_produced[peer].load(Ordering::Acquire);
        let outstanding = tail - head;
        if outstanding == 0 {
            continue;
        }

        let should_flush =
            force || outstanding >= u64::from(inner.config.mtu) || stall_counts[peer] >= inner.config.stall_threshold;
        if !should_flush {
            stall_counts[peer] += 1;
            continue;
        }
        stall_counts[peer] = 0;

        for seq in head..tail {
            inner.tx_element_request[peer].spin_read(seq);
            inner.tx_element_request[peer].republish(seq);
        }

        inner
            .tx_block_request_cmd
            .push(*next_cmd_seq, peer as u32, 0, outstanding as u32);
        *next_cmd_seq += 1;
        inner.req_aggregated[peer].store(tail, Ordering::Release);
    }
}
