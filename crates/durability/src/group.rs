//! Process group capability.
//!
//! Cross-process coordination is limited to three collectives: a barrier, a
//! broadcast from a root rank, and an all-gather. [`SingleProcess`] covers
//! the common case of one process; [`LocalCluster`] simulates several ranks
//! with threads of one process, which is what the multi-process tests use.

use parking_lot::{Condvar, Mutex};
use std::sync::Arc;
use std::time::{Duration, Instant};

/// Default timeout for a local collective to complete
pub const DEFAULT_GROUP_TIMEOUT: Duration = Duration::from_secs(60);

/// Process group errors.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum GroupError {
    /// Not every rank arrived in time
    #[error("Group {operation} timed out with {arrived} of {expected} ranks")]
    Timeout {
        /// Collective that timed out
        operation: &'static str,
        /// Ranks that arrived
        arrived: u32,
        /// Ranks expected
        expected: u32,
    },

    /// Broadcast root outside the group
    #[error("Broadcast root {root} outside group of {size}")]
    InvalidRoot {
        /// Requested root
        root: u32,
        /// Group size
        size: u32,
    },

    /// An earlier failure left the group unusable
    #[error("Group aborted: {0}")]
    Aborted(String),
}

/// Group of cooperating processes.
///
/// Every rank must call the collectives in the same order.
pub trait ProcessGroup: Send + Sync {
    /// Rank of the calling process.
    fn rank(&self) -> u32;

    /// Number of processes in the group.
    fn size(&self) -> u32;

    /// Wait until every rank arrives.
    fn barrier(&self) -> Result<(), GroupError>;

    /// Return the root's `data` on every rank.
    fn broadcast(&self, root: u32, data: Vec<u8>) -> Result<Vec<u8>, GroupError>;

    /// Gather one payload from every rank, indexed by rank.
    fn all_gather(&self, data: Vec<u8>) -> Result<Vec<Vec<u8>>, GroupError>;
}

/// The trivial group of one process.
#[derive(Debug, Clone, Copy, Default)]
pub struct SingleProcess;

impl ProcessGroup for SingleProcess {
    fn rank(&self) -> u32 {
        0
    }

    fn size(&self) -> u32 {
        1
    }

    fn barrier(&self) -> Result<(), GroupError> {
        Ok(())
    }

    fn broadcast(&self, root: u32, data: Vec<u8>) -> Result<Vec<u8>, GroupError> {
        if root != 0 {
            return Err(GroupError::InvalidRoot { root, size: 1 });
        }
        Ok(data)
    }

    fn all_gather(&self, data: Vec<u8>) -> Result<Vec<Vec<u8>>, GroupError> {
        Ok(vec![data])
    }
}

/// Factory for a group of simulated ranks sharing one exchange.
pub struct LocalCluster;

impl LocalCluster {
    /// Create `size` ranks with the default timeout.
    #[allow(clippy::new_ret_no_self)]
    pub fn new(size: u32) -> Vec<LocalProcess> {
        Self::with_timeout(size, DEFAULT_GROUP_TIMEOUT)
    }

    /// Create `size` ranks with an explicit collective timeout.
    pub fn with_timeout(size: u32, timeout: Duration) -> Vec<LocalProcess> {
        let exchange = Arc::new(Exchange {
            size,
            timeout,
            state: Mutex::new(ExchangeState {
                slots: vec![None; size as usize],
                arrived: 0,
                generation: 0,
                results: Arc::new(Vec::new()),
                failure: None,
            }),
            arrivals: Condvar::new(),
        });

        (0..size)
            .map(|rank| LocalProcess {
                rank,
                exchange: Arc::clone(&exchange),
            })
            .collect()
    }
}

/// One simulated rank of a [`LocalCluster`].
#[derive(Clone)]
pub struct LocalProcess {
    rank: u32,
    exchange: Arc<Exchange>,
}

struct Exchange {
    size: u32,
    timeout: Duration,
    state: Mutex<ExchangeState>,
    arrivals: Condvar,
}

struct ExchangeState {
    slots: Vec<Option<Vec<u8>>>,
    arrived: u32,
    generation: u64,
    results: Arc<Vec<Vec<u8>>>,
    failure: Option<String>,
}

impl Exchange {
    fn gather(
        &self,
        rank: u32,
        data: Vec<u8>,
        operation: &'static str,
    ) -> Result<Vec<Vec<u8>>, GroupError> {
        let mut state = self.state.lock();
        if let Some(failure) = &state.failure {
            return Err(GroupError::Aborted(failure.clone()));
        }

        let generation = state.generation;
        state.slots[rank as usize] = Some(data);
        state.arrived += 1;

        if state.arrived == self.size {
            let results: Vec<Vec<u8>> = state
                .slots
                .iter_mut()
                .map(|slot| slot.take().unwrap_or_default())
                .collect();
            state.results = Arc::new(results);
            state.arrived = 0;
            state.generation += 1;
            self.arrivals.notify_all();
            return Ok(state.results.as_ref().clone());
        }

        let deadline = Instant::now() + self.timeout;
        while state.generation == generation {
            if let Some(failure) = &state.failure {
                return Err(GroupError::Aborted(failure.clone()));
            }
            if self.arrivals.wait_until(&mut state, deadline).timed_out()
                && state.generation == generation
            {
                let arrived = state.arrived;
                state.failure = Some(format!("{} timed out on rank {}", operation, rank));
                self.arrivals.notify_all();
                return Err(GroupError::Timeout {
                    operation,
                    arrived,
                    expected: self.size,
                });
            }
        }
        Ok(state.results.as_ref().clone())
    }
}

impl ProcessGroup for LocalProcess {
    fn rank(&self) -> u32 {
        self.rank
    }

    fn size(&self) -> u32 {
        self.exchange.size
    }

    fn barrier(&self) -> Result<(), GroupError> {
        self.exchange.gather(self.rank, Vec::new(), "barrier").map(|_| ())
    }

    fn broadcast(&self, root: u32, data: Vec<u8>) -> Result<Vec<u8>, GroupError> {
        let size = self.exchange.size;
        if root >= size {
            return Err(GroupError::InvalidRoot { root, size });
        }
        let payload = if self.rank == root { data } else { Vec::new() };
        let mut gathered = self.exchange.gather(self.rank, payload, "broadcast")?;
        Ok(std::mem::take(&mut gathered[root as usize]))
    }

    fn all_gather(&self, data: Vec<u8>) -> Result<Vec<Vec<u8>>, GroupError> {
        self.exchange.gather(self.rank, data, "all_gather")
    }
}
