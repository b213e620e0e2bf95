//! Device topology: the oracle the engine queries for link and NUMA
//! information, a software-described topology for simulation and tests, and
//! the logical-to-physical index remapping context.

use std::fs;
use std::path::Path;

use serde::{Deserialize, Serialize};

use crate::error::{EngineError, Result};

/// Interconnect link classification between two GPUs.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum LinkKind {
    /// Direct GPU fabric (the fast path; hop count is fabric hops).
    Fabric,
    /// Host bus (PCIe or similar).
    Bus,
}

impl LinkKind {
    pub fn label(self) -> &'static str {
        match self {
            LinkKind::Fabric => "FAB",
            LinkKind::Bus => "BUS",
        }
    }
}

/// Read-only view of the machine's device topology. The engine consumes
/// this; it never owns or mutates it. All indices here are physical.
pub trait TopologyOracle: Send + Sync {
    fn num_cpu_nodes(&self) -> usize;
    fn num_gpus(&self) -> usize;
    /// Link kind and hop count between two distinct GPUs.
    fn gpu_link(&self, a: usize, b: usize) -> (LinkKind, u32);
    fn numa_distance(&self, a: usize, b: usize) -> u32;
    fn cpus_on_node(&self, node: usize) -> usize;
    /// NUMA nodes that actually have memory configured, in index order.
    fn configured_nodes(&self) -> Vec<usize>;
    /// GPU indices ordered by bus address.
    fn gpus_by_bus_order(&self) -> Vec<usize>;
    fn closest_node_to_gpu(&self, gpu: usize) -> usize;
    fn gpu_cu_count(&self, gpu: usize) -> usize;
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CpuNodeDesc {
    pub cpus: usize,
    /// Distance to every node, self included.
    pub distances: Vec<u32>,
    /// Nodes without configured memory are skipped by the remapper.
    #[serde(default = "default_true")]
    pub configured: bool,
}

fn default_true() -> bool {
    true
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct GpuDesc {
    pub bus_id: String,
    pub cu_count: usize,
    pub closest_node: usize,
}

#[derive(Debug, Clone, Copy, Serialize, Deserialize)]
pub struct LinkDesc {
    pub kind: LinkKind,
    pub hops: u32,
}

/// A fully software-described topology, loadable from JSON so tests and
/// offline runs can inject arbitrary machines.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SimTopology {
    pub cpu_nodes: Vec<CpuNodeDesc>,
    pub gpus: Vec<GpuDesc>,
    /// links[a][b] for a != b.
    pub links: Vec<Vec<LinkDesc>>,
}

impl SimTopology {
    /// Uniform machine: `nodes` NUMA nodes with `cpus_per_node` CPUs each,
    /// `gpus` devices connected pairwise by fabric with hop count 1.
    pub fn fully_connected(nodes: usize, cpus_per_node: usize, gpus: usize) -> Self {
        let cpu_nodes = (0..nodes)
            .map(|i| CpuNodeDesc {
                cpus: cpus_per_node,
                distances: (0..nodes).map(|j| if i == j { 10 } else { 20 }).collect(),
                configured: true,
            })
            .collect();
        let gpu_descs = (0..gpus)
            .map(|i| GpuDesc {
                bus_id: format!("0000:{:02x}:00.0", 0x10 + i),
                cu_count: 64,
                closest_node: if nodes == 0 { 0 } else { i % nodes },
            })
            .collect();
        let links = (0..gpus)
            .map(|_| {
                (0..gpus)
                    .map(|_| LinkDesc {
                        kind: LinkKind::Fabric,
                        hops: 1,
                    })
                    .collect()
            })
            .collect();
        Self {
            cpu_nodes,
            gpus: gpu_descs,
            links,
        }
    }

    pub fn from_json(json: &str) -> Result<Self> {
        serde_json::from_str(json)
            .map_err(|e| EngineError::Config(format!("bad topology JSON: {}", e)))
    }

    pub fn from_json_file(path: &Path) -> Result<Self> {
        Self::from_json(&fs::read_to_string(path)?)
    }
}

impl Default for SimTopology {
    /// Two-node, four-GPU machine with two fabric hives: GPUs {0,1} and
    /// {2,3} are one hop apart internally, two hops across hives.
    fn default() -> Self {
        let mut topo = Self::fully_connected(2, 8, 4);
        for a in 0..4 {
            for b in 0..4 {
                if a / 2 != b / 2 {
                    topo.links[a][b].hops = 2;
                }
            }
        }
        topo
    }
}

impl TopologyOracle for SimTopology {
    fn num_cpu_nodes(&self) -> usize {
        self.cpu_nodes.len()
    }

    fn num_gpus(&self) -> usize {
        self.gpus.len()
    }

    fn gpu_link(&self, a: usize, b: usize) -> (LinkKind, u32) {
        if a == b {
            return (LinkKind::Fabric, 0);
        }
        let l = self.links[a][b];
        (l.kind, l.hops)
    }

    fn numa_distance(&self, a: usize, b: usize) -> u32 {
        self.cpu_nodes[a].distances[b]
    }

    fn cpus_on_node(&self, node: usize) -> usize {
        self.cpu_nodes[node].cpus
    }

    fn configured_nodes(&self) -> Vec<usize> {
        self.cpu_nodes
            .iter()
            .enumerate()
            .filter(|(_, n)| n.configured)
            .map(|(i, _)| i)
            .collect()
    }

    fn gpus_by_bus_order(&self) -> Vec<usize> {
        let mut order: Vec<usize> = (0..self.gpus.len()).collect();
        order.sort_by(|&a, &b| self.gpus[a].bus_id.cmp(&self.gpus[b].bus_id));
        order
    }

    fn closest_node_to_gpu(&self, gpu: usize) -> usize {
        self.gpus[gpu].closest_node
    }

    fn gpu_cu_count(&self, gpu: usize) -> usize {
        self.gpus[gpu].cu_count
    }
}

/// Logical-to-physical index translation, built exactly once at startup and
/// then read without synchronization. Logical CPU indices skip NUMA nodes
/// with no configured memory; logical GPU indices optionally follow bus
/// address order.
#[derive(Debug, Clone)]
pub struct DeviceMap {
    cpu_remap: Vec<usize>,
    gpu_remap: Vec<usize>,
}

impl DeviceMap {
    pub fn new(topo: &dyn TopologyOracle, use_bus_order: bool) -> Self {
        let cpu_remap = topo.configured_nodes();
        let gpu_remap = if use_bus_order {
            topo.gpus_by_bus_order()
        } else {
            (0..topo.num_gpus()).collect()
        };
        Self {
            cpu_remap,
            gpu_remap,
        }
    }

    pub fn num_cpus(&self) -> usize {
        self.cpu_remap.len()
    }

    pub fn num_gpus(&self) -> usize {
        self.gpu_remap.len()
    }

    pub fn cpu(&self, logical: usize) -> usize {
        self.cpu_remap[logical]
    }

    pub fn gpu(&self, logical: usize) -> usize {
        self.gpu_remap[logical]
    }
}
