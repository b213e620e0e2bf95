//! Memory allocation capability consumed by the engine.
//!
//! The engine never allocates directly: it asks a [`MemoryPool`] for
//! element buffers at a (kind, device) locality, verifies placement, and
//! hands raw pointers to execution agents. The default implementation backs
//! every kind with host memory so the whole engine runs and is tested
//! without hardware; locality then only influences bookkeeping and peer
//! access tracking.

use std::collections::{HashMap, HashSet};
use std::sync::Mutex;

use serde::{Deserialize, Serialize};

use crate::core::transfer::ElemPtr;
use crate::core::types::MemKind;
use crate::error::{EngineError, Result};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct BufferId(pub u64);

pub trait MemoryPool: Send + Sync {
    /// Allocate `num_elems` f32 elements of `kind` memory on physical device
    /// `index`, zero-initialized.
    fn allocate(&self, kind: MemKind, index: usize, num_elems: usize) -> Result<BufferId>;

    fn deallocate(&self, id: BufferId) -> Result<()>;

    /// Base pointer of the allocation. Valid until `deallocate`.
    fn base_ptr(&self, id: BufferId) -> Result<ElemPtr>;

    fn len(&self, id: BufferId) -> Result<usize>;

    /// Best-effort check that the allocation's pages actually landed on the
    /// requested device.
    fn verify_placement(&self, id: BufferId) -> Result<()>;

    /// Make `peer`'s memory directly addressable from `device`. Must be
    /// idempotent; never revoked during a run.
    fn enable_peer_access(&self, device: usize, peer: usize) -> Result<()>;
}

struct Allocation {
    data: Box<[f32]>,
    kind: MemKind,
    index: usize,
}

/// Host-backed pool used for simulation and tests.
pub struct SimMemoryPool {
    allocations: Mutex<HashMap<BufferId, Allocation>>,
    next_id: Mutex<u64>,
    peer_pairs: Mutex<HashSet<(usize, usize)>>,
    /// Peer pairs configured as unreachable, for exercising the failure path.
    denied_peers: HashSet<(usize, usize)>,
}

impl SimMemoryPool {
    pub fn new() -> Self {
        Self {
            allocations: Mutex::new(HashMap::new()),
            next_id: Mutex::new(0),
            peer_pairs: Mutex::new(HashSet::new()),
            denied_peers: HashSet::new(),
        }
    }

    pub fn with_denied_peers(pairs: impl IntoIterator<Item = (usize, usize)>) -> Self {
        let mut pool = Self::new();
        pool.denied_peers = pairs.into_iter().collect();
        pool
    }

    /// Peer pairs enabled so far, for assertions in tests.
    pub fn enabled_peer_pairs(&self) -> Vec<(usize, usize)> {
        let guard = self.peer_pairs.lock().expect("peer lock");
        let mut pairs: Vec<_> = guard.iter().copied().collect();
        pairs.sort_unstable();
        pairs
    }

    pub fn live_allocations(&self) -> usize {
        self.allocations.lock().expect("alloc lock").len()
    }
}

impl Default for SimMemoryPool {
    fn default() -> Self {
        Self::new()
    }
}

impl MemoryPool for SimMemoryPool {
    fn allocate(&self, kind: MemKind, index: usize, num_elems: usize) -> Result<BufferId> {
        if num_elems == 0 {
            return Err(EngineError::ZeroAllocation);
        }
        if kind == MemKind::Null {
            return Err(EngineError::AllocFailed {
                kind,
                index,
                bytes: num_elems * 4,
            });
        }
        let mut next = self
            .next_id
            .lock()
            .map_err(|_| EngineError::Launch("pool id lock poisoned".to_string()))?;
        *next += 1;
        let id = BufferId(*next);
        let data = vec![0.0f32; num_elems].into_boxed_slice();
        self.allocations
            .lock()
            .map_err(|_| EngineError::Launch("pool lock poisoned".to_string()))?
            .insert(id, Allocation { data, kind, index });
        Ok(id)
    }

    fn deallocate(&self, id: BufferId) -> Result<()> {
        self.allocations
            .lock()
            .map_err(|_| EngineError::Launch("pool lock poisoned".to_string()))?
            .remove(&id)
            .map(|_| ())
            .ok_or(EngineError::UnknownBuffer(id.0))
    }

    fn base_ptr(&self, id: BufferId) -> Result<ElemPtr> {
        let allocs = self
            .allocations
            .lock()
            .map_err(|_| EngineError::Launch("pool lock poisoned".to_string()))?;
        let alloc = allocs.get(&id).ok_or(EngineError::UnknownBuffer(id.0))?;
        Ok(ElemPtr(alloc.data.as_ptr() as *mut f32))
    }

    fn len(&self, id: BufferId) -> Result<usize> {
        let allocs = self
            .allocations
            .lock()
            .map_err(|_| EngineError::Launch("pool lock poisoned".to_string()))?;
        allocs
            .get(&id)
            .map(|a| a.data.len())
            .ok_or(EngineError::UnknownBuffer(id.0))
    }

    fn verify_placement(&self, id: BufferId) -> Result<()> {
        let allocs = self
            .allocations
            .lock()
            .map_err(|_| EngineError::Launch("pool lock poisoned".to_string()))?;
        let alloc = allocs.get(&id).ok_or(EngineError::UnknownBuffer(id.0))?;
        // Host-backed simulation: everything is resident where it was asked
        // for. The check still refuses kinds that can never be placed.
        match alloc.kind {
            MemKind::Null => Err(EngineError::PlacementMismatch {
                index: alloc.index,
                failed: alloc.data.len(),
                total: alloc.data.len(),
            }),
            _ => Ok(()),
        }
    }

    fn enable_peer_access(&self, device: usize, peer: usize) -> Result<()> {
        if self.denied_peers.contains(&(device, peer)) {
            return Err(EngineError::PeerAccessUnsupported {
                from: device,
                to: peer,
            });
        }
        let mut pairs = self
            .peer_pairs
            .lock()
            .map_err(|_| EngineError::Launch("peer lock poisoned".to_string()))?;
        if pairs.insert((device, peer)) {
            println!("[Memory] Peer access enabled: GPU {} -> GPU {}", device, peer);
        }
        Ok(())
    }
}
