// SPDX-License-Identifier: Apache-2.0 OR MIT

//! Integration tests exercising the engine end to end over the in-process
//! loopback transport.

use std::sync::Arc;
use std::time::Duration;

use racer::{EngineConfig, InProcessTransport, LoopbackLauncher, RacerEngine, ShardBuffer};

fn identity_shard(num_elements: usize) -> ShardBuffer {
    ShardBuffer::from_fn(num_elements, 8, |i| (i as f64).to_le_bytes().to_vec())
}

/// Scenario 1: two ranks, `nx = 4` (`view_size = 64`), one remote request
/// for `offset = 7` on peer 1 returns `7.0` from peer 1's identity shard.
#[test]
fn two_ranks_identity_shard_remote_get() {
    let config = EngineConfig::new(2, 8).unwrap();
    let launchers = LoopbackLauncher::team(2);
    let transports = InProcessTransport::team(2);

    std::thread::scope(|scope| {
        let mut handles = Vec::new();
        for (rank, (launcher, transport)) in launchers.into_iter().zip(transports).enumerate() {
            let config = config.clone();
            handles.push(scope.spawn(move || {
                let engine = RacerEngine::bind(config, identity_shard(64), Arc::new(launcher), Arc::new(transport))
                    .expect("bind succeeds");
                let worker = engine.worker();
                if rank == 0 {
                    let value: f64 = worker.get(1, 7);
                    assert_eq!(value, 7.0);
                } else {
                    // Peer 1 just needs its responder thread alive long
                    // enough to answer rank 0's request.
                    std::thread::sleep(Duration::from_millis(200));
                }
                engine.fence();
            }));
        }
        for handle in handles {
            handle.join().unwrap();
        }
    });
}

/// `InProcessTransport` always reports shared-host, so the bind-time
/// handshake must install a `direct_ptrs` entry for every peer on its
/// own, without any caller calling `link_direct`.
#[test]
fn shared_host_transport_links_direct_pointers_automatically() {
    let config = EngineConfig::new(2, 8).unwrap();
    let launchers = LoopbackLauncher::team(2);
    let transports = InProcessTransport::team(2);

    std::thread::scope(|scope| {
        let mut handles = Vec::new();
        for (rank, (launcher, transport)) in launchers.into_iter().zip(transports).enumerate() {
            let config = config.clone();
            handles.push(scope.spawn(move || {
                let engine = RacerEngine::bind(config, identity_shard(64), Arc::new(launcher), Arc::new(transport))
                    .expect("bind succeeds");
                assert!(
                    engine.has_direct_pointer(1 - rank as u32),
                    "shared-host peer should be linked automatically after bind"
                );
                engine.fence();
            }));
        }
        for handle in handles {
            handle.join().unwrap();
        }
    });
}

/// Scenario 3: a single-rank run never touches the transport; every `get`
/// resolves through the `direct_ptrs` shortcut installed by `link_direct`.
#[test]
fn single_rank_resolves_through_direct_pointer() {
    let config = EngineConfig::new(1, 8).unwrap();
    let launcher = LoopbackLauncher::solo();
    let transport = InProcessTransport::solo();

    let engine = RacerEngine::bind(config, identity_shard(64), Arc::new(launcher), Arc::new(transport))
        .expect("bind succeeds");

    let remote = Arc::new(identity_shard(64));
    engine.link_direct(0, remote);

    let worker = engine.worker();
    let value: f64 = worker.get(0, 13);
    assert_eq!(value, 13.0);

    engine.fence();
}

/// Scenario 5 (queue wrap): a tiny ring still drains correctly once the
/// number of issued requests exceeds its capacity, proving the device
/// worker's back-pressure loop does not deadlock against the host pumps.
#[test]
fn wrap_around_small_queue_does_not_deadlock() {
    const CAPACITY: u32 = 16;
    // Same-process peers would otherwise get an automatic `direct_ptrs`
    // shortcut, bypassing the very ring this test means to exercise.
    let config = EngineConfig::for_tests(2, 8, CAPACITY).unwrap().with_direct_ptrs_enabled(false);
    let launchers = LoopbackLauncher::team(2);
    let transports = InProcessTransport::team(2);

    std::thread::scope(|scope| {
        let mut handles = Vec::new();
        for (rank, (launcher, transport)) in launchers.into_iter().zip(transports).enumerate() {
            let config = config.clone();
            handles.push(scope.spawn(move || {
                let engine = RacerEngine::bind(config, identity_shard(64), Arc::new(launcher), Arc::new(transport))
                    .expect("bind succeeds");
                let worker = engine.worker();
                if rank == 0 {
                    for i in 0..(CAPACITY as u64 + 8) {
                        let offset = (i % 64) as u32;
                        let value: f64 = worker.get(1, offset);
                        assert_eq!(value, offset as f64);
                    }
                } else {
                    std::thread::sleep(Duration::from_millis(500));
                }
                engine.fence();
            }));
        }
        for handle in handles {
            handle.join().unwrap();
        }
    });
}

/// Scenario 4 (MTU stall): fewer than `mtu` requests still drain within a
/// bounded number of stall polls rather than waiting for the ring to fill.
#[test]
fn sub_mtu_batch_still_flushes_on_stall() {
    // Same-process peers would otherwise get an automatic `direct_ptrs`
    // shortcut, bypassing the stall-poll flush this test means to exercise.
    let config = EngineConfig::for_tests(2, 8, 1 << 14)
        .unwrap()
        .with_mtu(16_384)
        .with_stall_threshold(4)
        .with_direct_ptrs_enabled(false);
    let launchers = LoopbackLauncher::team(2);
    let transports = InProcessTransport::team(2);

    std::thread::scope(|scope| {
        let mut handles = Vec::new();
        for (rank, (launcher, transport)) in launchers.into_iter().zip(transports).enumerate() {
            let config = config.clone();
            handles.push(scope.spawn(move || {
                let engine = RacerEngine::bind(config, identity_shard(64), Arc::new(launcher), Arc::new(transport))
                    .expect("bind succeeds");
                let worker = engine.worker();
                if rank == 0 {
                    // Well under `mtu`; correctness here depends on the
                    // aggregator's stall-poll flush, not a full batch.
                    for offset in 0..50u32 {
                        let value: f64 = worker.get(1, offset % 64);
                        assert_eq!(value, (offset % 64) as f64);
                    }
                } else {
                    std::thread::sleep(Duration::from_millis(500));
                }
                engine.fence();
            }));
        }
        for handle in handles {
            handle.join().unwrap();
        }
    });
}

/// Scenario 2 (byte accounting, shrunk from four ranks to keep the test
/// fast): every rank fetches one element from every other rank; each
/// fetch must observe that peer's identity value.
#[test]
fn four_ranks_cross_fetch_observes_identity_values() {
    const RANKS: u32 = 4;
    let config = EngineConfig::new(RANKS, 8).unwrap();
    let launchers = LoopbackLauncher::team(RANKS);
    let transports = InProcessTransport::team(RANKS);

    std::thread::scope(|scope| {
        let mut handles = Vec::new();
        for (rank, (launcher, transport)) in launchers.into_iter().zip(transports).enumerate() {
            let config = config.clone();
            handles.push(scope.spawn(move || {
                let engine = RacerEngine::bind(config, identity_shard(16), Arc::new(launcher), Arc::new(transport))
                    .expect("bind succeeds");
                let worker = engine.worker();
                for peer in 0..RANKS {
                    if peer as usize == rank {
                        continue;
                    }
                    let value: f64 = worker.get(peer, 3);
                    assert_eq!(value, 3.0);
                }
                engine.fence();
            }));
        }
        for handle in handles {
            handle.join().unwrap();
        }
    });
}

/// Round-trip law: a locally written value survives a fence and is
/// observed by a remote `get`.
#[test]
fn put_then_fence_then_remote_get_round_trips() {
    let config = EngineConfig::new(2, 8).unwrap();
    let launchers = LoopbackLauncher::team(2);
    let transports = InProcessTransport::team(2);

    std::thread::scope(|scope| {
        let mut handles = Vec::new();
        for (rank, (launcher, transport)) in launchers.into_iter().zip(transports).enumerate() {
            let config = config.clone();
            handles.push(scope.spawn(move || {
                let engine = RacerEngine::bind(
                    config,
                    ShardBuffer::allocate_symmetric(8, 8),
                    Arc::new(launcher),
                    Arc::new(transport),
                )
                .expect("bind succeeds");
                let worker = engine.worker();
                if rank == 1 {
                    worker.put(2, 99.5f64);
                }
                engine.fence();
                if rank == 0 {
                    let value: f64 = worker.get(1, 2);
                    assert_eq!(value, 99.5);
                }
                engine.fence();
            }));
        }
        for handle in handles {
            handle.join().unwrap();
        }
    });
}

/// Idempotence of fence: a second `fence()` with no intervening traffic
/// must not hang or change observed state.
#[test]
fn fence_is_idempotent_with_no_traffic() {
    let config = EngineConfig::new(1, 8).unwrap();
    let engine = RacerEngine::bind(
        config,
        identity_shard(4),
        Arc::new(LoopbackLauncher::solo()),
        Arc::new(InProcessTransport::solo()),
    )
    .expect("bind succeeds");
    engine.fence();
    engine.fence();
}
