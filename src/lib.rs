//! # Crossflow: Concurrent Memory-Copy Bandwidth Benchmark Engine
//!
//! Crossflow measures achievable copy bandwidth between heterogeneous
//! memory and compute resources (host memory on NUMA nodes, accelerator
//! devices) by executing many concurrent, independently-parameterized
//! Transfers and timing them precisely.
//!
//! ## Core Modules
//!
//! - **[`core`]**: Transfer data model, run configuration, transfer-list parser.
//! - **[`topology`]**: Topology oracle, injectable simulated machines, index remapping.
//! - **[`runtime`]**: Partitioner, executor groups, concurrent dispatcher, validator, stats.
//! - **[`campaign`]**: P2P / Scaling / All-to-All / Sweep benchmark generators.
//! - **[`report`]**: Human-readable and CSV result rendering.
//!
//! Device execution and memory placement are consumed through traits
//! ([`runtime::CopyAgent`], [`runtime::MemoryPool`]) with software-simulated
//! implementations, so the engine runs and is tested without hardware.

pub mod campaign;
pub mod core;
pub mod error;
pub mod report;
pub mod runtime;
pub mod topology;

pub use crate::core::config::{P2pMode, RunConfig, SweepConfig, UnitOrder, ValidatePolicy};
pub use crate::core::parse::{is_echo_comment, parse_byte_count, parse_transfer_line};
pub use crate::core::transfer::{SubExecParam, Transfer};
pub use crate::core::types::{ExeKey, ExeKind, MemKind, MemLoc};
pub use crate::error::{EngineError, Result};
pub use crate::runtime::{DeviceContext, Engine, TestResult};
pub use crate::topology::{DeviceMap, SimTopology, TopologyOracle};
