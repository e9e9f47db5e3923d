// SPDX-License-Identifier: Apache-2.0 OR MIT

//! Responder team: the second resident device team. Gathers scalars for
//! inbound requests and stages the reply for the response-pump to send.
//!
//! The original reads inbound offsets back out of a shared
//! `rx_element_request_queue` keyed by `window`; here the response-pump
//! already holds the decoded offsets (they arrived as a wire payload, not
//! a device-memory write), so the two sides agree on them through
//! `inbound_requests`, keyed by the same sequence number both sides use
//! to drive `rx_block_request_cmd`.

use std::sync::atomic::Ordering;
use std::sync::Arc;

use crate::facade::{EngineInner, ReplyStaging};

pub fn run(inner: &Arc<EngineInner>) {
    let mut next_rx_seq: u64 = 0;
    let mut next_reply_seq: u64 = 0;

    loop {
        if inner.terminate.load(Ordering::Acquire) {
            return;
        }

        let Some(cmd) = inner.rx_block_request_cmd.try_pop(next_rx_seq) else {
            std::thread::yield_now();
            continue;
        };

        let Some((_, inbound)) = inner.inbound_requests.remove(&next_rx_seq) else {
            // The matching side-channel entry is installed by the
            // response-pump before the command word becomes ready, so
            // this should never miss; skip defensively rather than wedge.
            next_rx_seq += 1;
            continue;
        };
        next_rx_seq += 1;

        let element_size = inner.shard.element_size();
        let mut values = Vec::with_capacity(inbound.offsets.len() * element_size);
        for &offset in &inbound.offsets {
            values.extend_from_slice(&inner.shard.read_element(u64::from(offset)));
        }

        inner.reply_sent[cmd.peer as usize].fetch_add(u64::from(cmd.size), Ordering::Relaxed);

        inner.reply_staging.insert(
            next_reply_seq,
            ReplyStaging {
                dest_peer: inbound.origin_peer,
                token: inbound.token,
                values,
            },
        );
        inner
            .tx_block_reply_cmd
            .push(next_reply_seq, inbound.origin_peer, cmd.window, cmd.size);
        next_reply_seq += 1;
    }
}
