use std::collections::BTreeSet;

use serde::{Deserialize, Serialize};

use crate::core::types::{fmt_mem_list, ExeKey, ExeKind, MemLoc};
use crate::error::{EngineError, Result};
use crate::runtime::memory::BufferId;

/// Raw element pointer handed to execution agents. The engine guarantees the
/// backing allocation outlives the launch and that concurrent units touch
/// disjoint ranges, so it is safe to move across threads.
#[derive(Debug, Clone, Copy)]
pub struct ElemPtr(pub *mut f32);

unsafe impl Send for ElemPtr {}
unsafe impl Sync for ElemPtr {}

impl ElemPtr {
    /// Pointer advanced by `elems` elements.
    pub fn offset(self, elems: usize) -> Self {
        ElemPtr(unsafe { self.0.add(elems) })
    }
}

/// One work unit: the slice of a transfer's element range assigned to a
/// single sub-executor (CPU thread or device compute partition).
///
/// `start_cycle` / `stop_cycle` / `die_id` / `slot_id` are written back by
/// the execution agent at run time and read by the dispatcher to
/// reconstruct per-transfer timing inside a folded launch.
#[derive(Debug, Clone)]
pub struct SubExecParam {
    pub num_elems: usize,
    pub srcs: Vec<ElemPtr>,
    pub dsts: Vec<ElemPtr>,
    /// Preferred die on a multi-die device, -1 for no preference.
    pub preferred_die: i32,
    pub start_cycle: u64,
    pub stop_cycle: u64,
    /// Physical die the unit actually ran on.
    pub die_id: u32,
    /// Physical execution slot within the die.
    pub slot_id: u32,
}

impl SubExecParam {
    pub fn new(num_elems: usize, srcs: Vec<ElemPtr>, dsts: Vec<ElemPtr>) -> Self {
        Self {
            num_elems,
            srcs,
            dsts,
            preferred_die: -1,
            start_cycle: 0,
            stop_cycle: 0,
            die_id: 0,
            slot_id: 0,
        }
    }
}

/// One declarative unit of benchmark work: copy (or fill, or reduce) from N
/// sources into M destinations, driven by one executing agent split across
/// `num_sub_execs` sub-executors.
///
/// The shape invariants are enforced at construction so unsupported
/// combinations surface as configuration errors before any allocation:
/// a DMA engine moves exactly one source to one destination (or fills one
/// destination when it has no source); a transfer with neither sources nor
/// destinations is meaningless.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Transfer {
    pub srcs: Vec<MemLoc>,
    pub dsts: Vec<MemLoc>,
    pub exe: ExeKey,
    pub num_sub_execs: usize,
    /// Requested byte count; 0 means "use the N supplied at execution time".
    pub requested_bytes: usize,

    // Per-run state, reset by the engine at the start of every execution.
    #[serde(skip)]
    pub index: usize,
    #[serde(skip)]
    pub resolved_bytes: usize,
    #[serde(skip)]
    pub src_bufs: Vec<BufferId>,
    #[serde(skip)]
    pub dst_bufs: Vec<BufferId>,
    #[serde(skip)]
    pub src_addrs: Vec<u64>,
    #[serde(skip)]
    pub dst_addrs: Vec<u64>,
    #[serde(skip)]
    pub units: Vec<SubExecParam>,
    #[serde(skip)]
    pub total_time_ms: f64,
    #[serde(skip)]
    pub per_iteration_ms: Vec<f64>,
    /// (die, slot) pairs that executed this transfer, one set per timed
    /// iteration, collected only when iteration diagnostics are on.
    #[serde(skip)]
    pub per_iteration_slots: Vec<BTreeSet<(u32, u32)>>,
}

impl Transfer {
    pub fn new(
        srcs: Vec<MemLoc>,
        exe: ExeKey,
        dsts: Vec<MemLoc>,
        num_sub_execs: usize,
    ) -> Result<Self> {
        if srcs.is_empty() && dsts.is_empty() {
            return Err(EngineError::EmptyTransfer);
        }
        if num_sub_execs == 0 {
            return Err(EngineError::Config(
                "number of sub-executors must be greater than 0".to_string(),
            ));
        }
        if exe.kind == ExeKind::GpuDma && (srcs.len() > 1 || dsts.len() != 1) {
            return Err(EngineError::UnsupportedShape {
                exe: exe.kind,
                src_count: srcs.len(),
                dst_count: dsts.len(),
            });
        }
        Ok(Self {
            srcs,
            dsts,
            exe,
            num_sub_execs,
            requested_bytes: 0,
            index: 0,
            resolved_bytes: 0,
            src_bufs: Vec::new(),
            dst_bufs: Vec::new(),
            src_addrs: Vec::new(),
            dst_addrs: Vec::new(),
            units: Vec::new(),
            total_time_ms: 0.0,
            per_iteration_ms: Vec::new(),
            per_iteration_slots: Vec::new(),
        })
    }

    pub fn with_bytes(mut self, bytes: usize) -> Self {
        self.requested_bytes = bytes;
        self
    }

    /// A pure fill: no sources, destinations written with the fill byte.
    pub fn is_fill(&self) -> bool {
        self.srcs.is_empty()
    }

    pub fn src_desc(&self) -> String {
        fmt_mem_list(&self.srcs)
    }

    pub fn dst_desc(&self) -> String {
        fmt_mem_list(&self.dsts)
    }

    /// Full human-readable descriptor, e.g. `C0 -> G00:004 -> G1`.
    pub fn descriptor(&self) -> String {
        format!(
            "{} -> {}{:02}:{:03} -> {}",
            self.src_desc(),
            self.exe.kind.to_char(),
            self.exe.index,
            self.num_sub_execs,
            self.dst_desc()
        )
    }

    /// Reset all per-run state before a fresh execution.
    pub fn reset_run_state(&mut self) {
        self.resolved_bytes = 0;
        self.src_bufs.clear();
        self.dst_bufs.clear();
        self.src_addrs.clear();
        self.dst_addrs.clear();
        self.units.clear();
        self.total_time_ms = 0.0;
        self.per_iteration_ms.clear();
        self.per_iteration_slots.clear();
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::core::types::MemKind;

    fn loc(kind: MemKind, index: usize) -> MemLoc {
        MemLoc::new(kind, index)
    }

    #[test]
    fn test_dma_shape_invariant() {
        let dma = ExeKey::new(ExeKind::GpuDma, 0);
        // one src, one dst: fine
        assert!(Transfer::new(
            vec![loc(MemKind::Device, 0)],
            dma,
            vec![loc(MemKind::Device, 1)],
            1
        )
        .is_ok());
        // fill: zero srcs, one dst
        assert!(Transfer::new(vec![], dma, vec![loc(MemKind::Device, 1)], 1).is_ok());
        // two srcs: rejected
        assert!(Transfer::new(
            vec![loc(MemKind::Device, 0), loc(MemKind::Device, 1)],
            dma,
            vec![loc(MemKind::Device, 1)],
            1
        )
        .is_err());
        // two dsts: rejected
        assert!(Transfer::new(
            vec![loc(MemKind::Device, 0)],
            dma,
            vec![loc(MemKind::Device, 1), loc(MemKind::Device, 2)],
            1
        )
        .is_err());
    }

    #[test]
    fn test_empty_transfer_rejected() {
        let gfx = ExeKey::new(ExeKind::GpuGfx, 0);
        assert!(matches!(
            Transfer::new(vec![], gfx, vec![], 4),
            Err(EngineError::EmptyTransfer)
        ));
    }

    #[test]
    fn test_gfx_accepts_multi_src_multi_dst() {
        let gfx = ExeKey::new(ExeKind::GpuGfx, 0);
        let t = Transfer::new(
            vec![loc(MemKind::HostPinned, 0), loc(MemKind::Device, 1)],
            gfx,
            vec![loc(MemKind::Device, 0), loc(MemKind::Device, 1)],
            8,
        )
        .unwrap();
        assert_eq!(t.descriptor(), "C0G1 -> G00:008 -> G0G1");
    }

    #[test]
    fn test_zero_sub_execs_rejected() {
        let cpu = ExeKey::new(ExeKind::Cpu, 0);
        assert!(Transfer::new(
            vec![loc(MemKind::HostPinned, 0)],
            cpu,
            vec![loc(MemKind::HostPinned, 1)],
            0
        )
        .is_err());
    }
}
