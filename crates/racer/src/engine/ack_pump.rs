// SPDX-License-Identifier: Apache-2.0 OR MIT

//! Ack-pump: the third host thread. Retires `PendingRdmaRequest`s in
//! `start_idx` order and advances `ack_host` for each one, so device
//! workers throttled on back-pressure observe progress.

use std::sync::atomic::Ordering;
use std::sync::Arc;
use std::time::Duration;

use crossbeam::channel::{Receiver, RecvTimeoutError};

use crate::facade::EngineInner;

const RECV_TIMEOUT: Duration = Duration::from_millis(10);

pub fn run(inner: &Arc<EngineInner>, ack_rx: &Receiver<(u32, u32)>) {
    loop {
        if inner.terminate.load(Ordering::Acquire) {
            return;
        }

        match ack_rx.recv_timeout(RECV_TIMEOUT) {
            Ok((peer, token)) => {
                for req in inner.pending.complete(peer, token) {
                    inner.ack_host[req.peer as usize].fetch_add(u64::from(req.num_entries), Ordering::Release);
                }
            }
            Err(RecvTimeoutError::Timeout) => {}
            Err(RecvTimeoutError::Disconnected) => return,
        }
    }
}
