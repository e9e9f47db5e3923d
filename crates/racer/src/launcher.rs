// SPDX-License-Identifier: Apache-2.0 OR MIT

//! Boundary abstraction standing in for the process launcher (MPI, or an
//! equivalent rank/size/collective runtime) that the engine is embedded
//! in but does not own.
//!
//! Real deployments plug in whatever collaborator their launch mechanism
//! provides; this crate ships [`LoopbackLauncher`] so a single process
//! can stand in for a whole league of ranks in tests and the bundled
//! benchmark.

use std::sync::{Arc, Barrier, Mutex};

/// Minimal collective-operations surface the engine needs from its host
/// launcher: who am I, how many peers are there, and two blocking
/// collectives used only during setup and teardown.
pub trait Launcher: Send + Sync {
    /// This process's rank within the league, `0..size()`.
    fn rank(&self) -> u32;
    /// Total number of ranks (peers) in the league.
    fn size(&self) -> u32;
    /// Block until every rank has called `barrier`.
    fn barrier(&self);
    /// Exchange `blob` with every rank; returns each rank's blob indexed
    /// by rank, including this rank's own.
    fn allgather(&self, blob: &[u8]) -> Vec<Vec<u8>>;
}

/// An in-process stand-in for a real launcher: every "rank" is a handle
/// into shared state, so tests and the benchmark binary can run a
/// multi-rank scenario on one machine without an external launcher.
pub struct LoopbackLauncher {
    rank: u32,
    size: u32,
    barrier: Arc<Barrier>,
    gather_slots: Arc<Mutex<Vec<Option<Vec<u8>>>>>,
    gather_barrier: Arc<Barrier>,
}

impl LoopbackLauncher {
    /// Build `size` launcher handles, one per simulated rank, sharing the
    /// barrier and gather state needed to implement the trait's
    /// collectives in-process.
    pub fn team(size: u32) -> Vec<Self> {
        assert!(size >= 1, "a league needs at least one rank");
        let barrier = Arc::new(Barrier::new(size as usize));
        let gather_barrier = Arc::new(Barrier::new(size as usize));
        let gather_slots = Arc::new(Mutex::new(vec![None; size as usize]));
        (0..size)
            .map(|rank| Self {
                rank,
                size,
                barrier: barrier.clone(),
                gather_slots: gather_slots.clone(),
                gather_barrier: gather_barrier.clone(),
            })
            .collect()
    }

    /// A single-rank league, for tests that don't care about multi-peer
    /// collectives.
    pub fn solo() -> Self {
        Self::team(1).pop().expect("team(1) yields one launcher")
    }
}

impl Launcher for LoopbackLauncher {
    fn rank(&self) -> u32 {
        self.rank
    }

    fn size(&self) -> u32 {
        self.size
    }

    fn barrier(&self) {
        self.barrier.wait();
    }

    fn allgather(&self, blob: &[u8]) -> Vec<Vec<u8>> {
        {
            let mut slots = self.gather_slots.lock().unwrap();
            slots[self.rank as usize] = Some(blob.to_vec());
        }
        self.gather_barrier.wait();
        let result = self
            .gather_slots
            .lock()
            .unwrap()
            .iter()
            .map(|slot| slot.clone().expect("every rank published before the barrier released"))
            .collect();
        self.gather_barrier.wait();
        result
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::thread;

    #[test]
    fn solo_launcher_reports_single_rank() {
        let launcher = LoopbackLauncher::solo();
        assert_eq!(launcher.rank(), 0);
        assert_eq!(launcher.size(), 1);
        launcher.barrier();
        assert_eq!(launcher.allgather(&[7]), vec![vec![7]]);
    }

    #[test]
    fn team_allgather_exchanges_every_rank() {
        let launchers = LoopbackLauncher::team(4);
        let handles: Vec<_> = launchers
            .into_iter()
            .map(|launcher| {
                thread::spawn(move || {
                    let payload = vec![launcher.rank() as u8];
                    launcher.allgather(&payload)
                })
            })
            .collect();
        for handle in handles {
            let gathered = handle.join().unwrap();
            assert_eq!(gathered, vec![vec![0], vec![1], vec![2], vec![3]]);
        }
    }
}
