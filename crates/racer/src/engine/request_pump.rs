// SPDX-License-Identifier: Apache-2.0 OR MIT

//! Request-pump: turns each aggregator-produced block-request command
//! into one RDMA SEND, recovering its offsets from the same
//! `tx_element_request` ring the aggregator already republished.

use std::sync::atomic::Ordering;
use std::sync::Arc;

use log::error;

use crate::engine::pending::PendingRdmaRequest;
use crate::facade::EngineInner;
use crate::protocol::BlockRequestState;
use crate::wire::{BlockRequestHeader, WireMessage};

pub fn run(inner: &Arc<EngineInner>) {
    let peer_count = inner.peer_count();
    let mut next_cmd_seq: u64 = 0;
    let mut next_start_idx = vec![0u64; peer_count];

    loop {
        if inner.terminate.load(Ordering::Acquire) {
            return;
        }

        let Some(cmd) = inner.tx_block_request_cmd.try_pop(next_cmd_seq) else {
            std::thread::yield_now();
            continue;
        };
        next_cmd_seq += 1;

        let peer = cmd.peer as usize;
        let start_idx = next_start_idx[peer];
        next_start_idx[peer] = start_idx + u64::from(cmd.size);

        let offsets: Vec<u32> = (0..u64::from(cmd.size))
            .map(|i| inner.tx_element_request[peer].spin_read(start_idx + i))
            .collect();

        let token = inner.windows[peer].next_token();
        let header = BlockRequestHeader {
            size: cmd.size,
            peer_origin: inner.rank,
            token,
            trip_flag: 0,
        };
        let payload = WireMessage::encode_request(header, &offsets);
        let wr_id = inner.next_wr_id();

        if let Err(e) = inner.transport.post_send(cmd.peer, &payload, wr_id) {
            error!("posting block-request send to peer {}: {e}", cmd.peer);
            continue;
        }

        inner.windows[peer].set_in_flight(start_idx, cmd.size);
        inner.pending.insert(PendingRdmaRequest {
            start_idx,
            num_entries: cmd.size,
            peer: cmd.peer,
            token,
            state: BlockRequestState::Sent,
        });
    }
}
