//! Execution context: topology oracle, logical-to-physical index map,
//! memory pool and one agent per physical execution resource.
//!
//! Built once at startup and passed by reference into everything that needs
//! index translation or device access, so no component carries hidden
//! process-wide state and tests can inject arbitrary machines.

use crate::core::types::{ExeKey, ExeKind, MemLoc};
use crate::error::{EngineError, Result};
use crate::runtime::agent::{CopyAgent, CpuAgent, SimDmaAgent, SimGfxAgent};
use crate::runtime::memory::{MemoryPool, SimMemoryPool};
use crate::topology::{DeviceMap, SimTopology, TopologyOracle};

pub struct DeviceContext {
    pub topology: Box<dyn TopologyOracle>,
    pub map: DeviceMap,
    pub pool: Box<dyn MemoryPool>,
    gfx: Vec<Box<dyn CopyAgent>>,
    dma: Vec<Box<dyn CopyAgent>>,
    cpu: Vec<Box<dyn CopyAgent>>,
}

impl DeviceContext {
    /// Fully software-simulated context over the given topology: host-backed
    /// memory pool and simulated GFX / DMA / CPU agents for every device.
    pub fn simulated(topology: SimTopology, use_bus_order: bool) -> Self {
        let map = DeviceMap::new(&topology, use_bus_order);
        let num_gpus = topology.num_gpus();
        let num_nodes = topology.num_cpu_nodes();
        let gfx: Vec<Box<dyn CopyAgent>> = (0..num_gpus)
            .map(|d| Box::new(SimGfxAgent::new(d, 1)) as Box<dyn CopyAgent>)
            .collect();
        let dma: Vec<Box<dyn CopyAgent>> = (0..num_gpus)
            .map(|d| Box::new(SimDmaAgent::new(d)) as Box<dyn CopyAgent>)
            .collect();
        let cpu: Vec<Box<dyn CopyAgent>> = (0..num_nodes)
            .map(|n| Box::new(CpuAgent::new(n)) as Box<dyn CopyAgent>)
            .collect();
        Self {
            topology: Box::new(topology),
            map,
            pool: Box::new(SimMemoryPool::new()),
            gfx,
            dma,
            cpu,
        }
    }

    /// Context with injected collaborators, for tests that need a custom
    /// pool or agents.
    pub fn with_parts(
        topology: Box<dyn TopologyOracle>,
        pool: Box<dyn MemoryPool>,
        gfx: Vec<Box<dyn CopyAgent>>,
        dma: Vec<Box<dyn CopyAgent>>,
        cpu: Vec<Box<dyn CopyAgent>>,
        use_bus_order: bool,
    ) -> Self {
        let map = DeviceMap::new(topology.as_ref(), use_bus_order);
        Self {
            topology,
            map,
            pool,
            gfx,
            dma,
            cpu,
        }
    }

    /// Visible CPU NUMA devices (configured nodes only).
    pub fn num_cpu_devices(&self) -> usize {
        self.map.num_cpus()
    }

    pub fn num_gpu_devices(&self) -> usize {
        self.map.num_gpus()
    }

    /// Physical device index backing a memory location.
    pub fn physical_mem(&self, loc: &MemLoc) -> Result<usize> {
        if loc.kind.is_cpu() {
            if loc.index >= self.map.num_cpus() {
                return Err(EngineError::IndexOutOfRange {
                    device: "CPU",
                    got: loc.index as i64,
                    max: self.map.num_cpus() as i64 - 1,
                });
            }
            Ok(self.map.cpu(loc.index))
        } else {
            if loc.index >= self.map.num_gpus() {
                return Err(EngineError::IndexOutOfRange {
                    device: "GPU",
                    got: loc.index as i64,
                    max: self.map.num_gpus() as i64 - 1,
                });
            }
            Ok(self.map.gpu(loc.index))
        }
    }

    /// Physical device index backing an executor key.
    pub fn physical_exe(&self, key: ExeKey) -> Result<usize> {
        match key.kind {
            ExeKind::Cpu => {
                if key.index >= self.map.num_cpus() {
                    return Err(EngineError::IndexOutOfRange {
                        device: "CPU",
                        got: key.index as i64,
                        max: self.map.num_cpus() as i64 - 1,
                    });
                }
                Ok(self.map.cpu(key.index))
            }
            ExeKind::GpuGfx | ExeKind::GpuDma => {
                if key.index >= self.map.num_gpus() {
                    return Err(EngineError::IndexOutOfRange {
                        device: "GPU",
                        got: key.index as i64,
                        max: self.map.num_gpus() as i64 - 1,
                    });
                }
                Ok(self.map.gpu(key.index))
            }
        }
    }

    /// The agent driving a physical execution resource.
    pub fn agent(&self, kind: ExeKind, phys: usize) -> Result<&dyn CopyAgent> {
        let pool = match kind {
            ExeKind::Cpu => &self.cpu,
            ExeKind::GpuGfx => &self.gfx,
            ExeKind::GpuDma => &self.dma,
        };
        pool.get(phys)
            .map(|a| a.as_ref())
            .ok_or(EngineError::NoAgent { kind, index: phys })
    }
}
