use std::fmt;

use serde::{Deserialize, Serialize};

use crate::error::{EngineError, Result};

/// Kind of a memory resource a Transfer reads from or writes to.
///
/// `Null` is a parser placeholder ("no buffer here") and never reaches the
/// allocation layer.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum MemKind {
    /// Coarse-grained pinned host memory on a NUMA node.
    HostPinned,
    /// Fine-grained pinned host memory on a NUMA node.
    HostPinnedFine,
    /// Unpinned (pageable) host memory on a NUMA node.
    HostUnpinned,
    /// Coarse-grained device memory.
    Device,
    /// Fine-grained device memory.
    DeviceFine,
    Null,
}

impl MemKind {
    pub fn from_char(c: char) -> Result<Self> {
        match c.to_ascii_uppercase() {
            'C' => Ok(MemKind::HostPinned),
            'B' => Ok(MemKind::HostPinnedFine),
            'U' => Ok(MemKind::HostUnpinned),
            'G' => Ok(MemKind::Device),
            'F' => Ok(MemKind::DeviceFine),
            'N' => Ok(MemKind::Null),
            _ => Err(EngineError::BadToken {
                what: "memory kind",
                token: c.to_string(),
            }),
        }
    }

    pub fn to_char(self) -> char {
        match self {
            MemKind::HostPinned => 'C',
            MemKind::HostPinnedFine => 'B',
            MemKind::HostUnpinned => 'U',
            MemKind::Device => 'G',
            MemKind::DeviceFine => 'F',
            MemKind::Null => 'N',
        }
    }

    pub fn is_cpu(self) -> bool {
        matches!(
            self,
            MemKind::HostPinned | MemKind::HostPinnedFine | MemKind::HostUnpinned
        )
    }

    pub fn is_gpu(self) -> bool {
        matches!(self, MemKind::Device | MemKind::DeviceFine)
    }
}

/// Kind of an execution agent: a CPU thread pool on a NUMA node, the compute
/// units of a GPU, or a GPU DMA engine.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub enum ExeKind {
    Cpu,
    GpuGfx,
    GpuDma,
}

impl ExeKind {
    pub fn from_char(c: char) -> Result<Self> {
        match c.to_ascii_uppercase() {
            'C' => Ok(ExeKind::Cpu),
            'G' => Ok(ExeKind::GpuGfx),
            'D' => Ok(ExeKind::GpuDma),
            _ => Err(EngineError::BadToken {
                what: "executor kind",
                token: c.to_string(),
            }),
        }
    }

    pub fn to_char(self) -> char {
        match self {
            ExeKind::Cpu => 'C',
            ExeKind::GpuGfx => 'G',
            ExeKind::GpuDma => 'D',
        }
    }

    pub fn is_cpu(self) -> bool {
        matches!(self, ExeKind::Cpu)
    }

    pub fn is_gpu(self) -> bool {
        matches!(self, ExeKind::GpuGfx | ExeKind::GpuDma)
    }
}

/// One memory resource: kind plus logical device index.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct MemLoc {
    pub kind: MemKind,
    pub index: usize,
}

impl MemLoc {
    pub fn new(kind: MemKind, index: usize) -> Self {
        Self { kind, index }
    }
}

impl fmt::Display for MemLoc {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}{}", self.kind.to_char(), self.index)
    }
}

/// Identity of one physical execution resource. Transfers sharing an ExeKey
/// are scheduled together as one executor group. `Ord` so group iteration
/// order is deterministic.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct ExeKey {
    pub kind: ExeKind,
    pub index: usize,
}

impl ExeKey {
    pub fn new(kind: ExeKind, index: usize) -> Self {
        Self { kind, index }
    }
}

impl fmt::Display for ExeKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}{}", self.kind.to_char(), self.index)
    }
}

/// Render a source/destination list the way reports and replay logs expect:
/// concatenated `<kind><index>` pairs, or "N" when the list is empty.
pub fn fmt_mem_list(locs: &[MemLoc]) -> String {
    if locs.is_empty() {
        return "N".to_string();
    }
    locs.iter().map(|l| l.to_string()).collect()
}
