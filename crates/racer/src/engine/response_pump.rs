// SPDX-License-Identifier: Apache-2.0 OR MIT

//! Response-pump: the busiest of the three host threads. It drains the
//! transport completion queue (dispatching inbound requests to the
//! responder team and inbound replies into the cache / ack channel), and
//! separately drains the responder's outbound reply staging area to post
//! the matching SEND.
//!
//! Keeping both responsibilities on one thread means a reply we are
//! staging to send and a reply we just received can never be reordered
//! relative to each other by scheduling two threads against the same
//! transport handle.

use std::sync::atomic::Ordering;
use std::sync::Arc;

use log::{error, warn};

use crate::facade::EngineInner;
use crate::transport::CompletionKind;
use crate::wire::{BlockReplyHeader, WireMessage};

const POLL_BATCH: usize = 64;

pub fn run(inner: &Arc<EngineInner>) {
    let peer_count = inner.peer_count();
    let mut next_rx_seq: u64 = 0;
    let mut next_reply_send_seq: u64 = 0;

    for peer in 0..peer_count as u32 {
        post_recv(inner, peer);
    }

    loop {
        if inner.terminate.load(Ordering::Acquire) {
            return;
        }

        let mut did_work = false;

        for completion in inner.transport.poll(POLL_BATCH) {
            did_work = true;
            if completion.kind != CompletionKind::Recv {
                continue;
            }
            if !completion.ok {
                warn!("dropping failed receive completion from peer {}", completion.peer);
                post_recv(inner, completion.peer);
                continue;
            }
            let Some(bytes) = inner.transport.take_received(completion.wr_id) else {
                continue;
            };
            match WireMessage::decode(&bytes) {
                Some(WireMessage::BlockRequest { header, offsets }) => {
                    inner.inbound_requests.insert(
                        next_rx_seq,
                        crate::facade::InboundRequest {
                            origin_peer: header.peer_origin,
                            token: header.token,
                            offsets,
                        },
                    );
                    inner
                        .rx_block_request_cmd
                        .push(next_rx_seq, completion.peer, 0, header.size);
                    next_rx_seq += 1;
                }
                Some(WireMessage::BlockReply { header, values }) => {
                    handle_reply(inner, completion.peer, header, &values);
                }
                None => {
                    error!("malformed wire message from peer {}", completion.peer);
                }
            }
            post_recv(inner, completion.peer);
        }

        if drain_staged_replies(inner, &mut next_reply_send_seq) {
            did_work = true;
        }

        if !did_work {
            std::thread::yield_now();
        }
    }
}

fn handle_reply(inner: &Arc<EngineInner>, peer: u32, header: BlockReplyHeader, values: &[u8]) {
    let Some(req) = inner.pending.peek(header.token) else {
        warn!("reply for unknown token {} from peer {peer}", header.token);
        return;
    };
    let element_size = inner.shard.element_size();
    if values.len() != req.num_entries as usize * element_size {
        error!(
            "reply for token {} carries {} bytes, expected {}",
            header.token,
            values.len(),
            req.num_entries as usize * element_size
        );
        return;
    }

    for i in 0..u64::from(req.num_entries) {
        let seq = req.start_idx + i;
        let Some(offset) = inner.tx_element_request[peer as usize].try_read(seq) else {
            error!("originating element slot for seq {seq} on peer {peer} is no longer readable");
            continue;
        };
        let start = i as usize * element_size;
        let value = values[start..start + element_size].to_vec();
        if inner.config.cache_enabled {
            inner.cache.install(peer, u64::from(offset), value);
        } else {
            inner.req_values.insert((peer, seq), value);
        }
    }

    if inner.ack_tx.send((peer, header.token)).is_err() {
        error!("ack-pump channel closed while retiring token {}", header.token);
    }
}

fn drain_staged_replies(inner: &Arc<EngineInner>, next_reply_send_seq: &mut u64) -> bool {
    let Some(cmd) = inner.tx_block_reply_cmd.try_pop(*next_reply_send_seq) else {
        return false;
    };
    let Some((_, staged)) = inner.reply_staging.remove(next_reply_send_seq) else {
        *next_reply_send_seq += 1;
        return true;
    };
    *next_reply_send_seq += 1;

    let header = BlockReplyHeader {
        token: staged.token,
        size: cmd.size,
    };
    let payload = WireMessage::encode_reply(header, &staged.values);
    let wr_id = inner.next_wr_id();
    if let Err(e) = inner.transport.post_send(staged.dest_peer, &payload, wr_id) {
        error!("posting block-reply send to peer {}: {e}", staged.dest_peer);
    }
    true
}

fn post_recv(inner: &Arc<EngineInner>, peer: u32) {
    let wr_id = inner.next_wr_id();
    if let Err(e) = inner.transport.post_recv(peer, wr_id) {
        error!("posting receive buffer for peer {peer}: {e}");
    }
}
