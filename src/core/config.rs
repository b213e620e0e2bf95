use std::path::PathBuf;

use serde::{Deserialize, Serialize};

use crate::core::types::{ExeKind, MemKind};
use crate::error::{EngineError, Result};

pub const DEFAULT_BYTES_PER_TRANSFER: usize = 1 << 26;

/// Where each transfer's work units land inside a folded launch. Affects
/// only which physical execution slot runs a unit, never correctness.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum UnitOrder {
    Sequential,
    Interleaved,
    Random,
}

/// When destination buffers are checked against the expected reference.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum ValidatePolicy {
    AtEnd,
    EveryIteration,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum P2pMode {
    Both,
    UnidirectionalOnly,
    BidirectionalOnly,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SweepConfig {
    /// Memory kinds eligible as sources / destinations.
    pub src_kinds: Vec<MemKind>,
    pub dst_kinds: Vec<MemKind>,
    /// Executor kinds eligible to drive a transfer.
    pub exe_kinds: Vec<ExeKind>,
    /// Smallest subset size to run.
    pub min: usize,
    /// Largest subset size (0 = universe size).
    pub max: usize,
    /// Stop after this many tests (0 = unlimited).
    pub test_limit: usize,
    /// Stop after this many seconds of wall time (0.0 = unlimited).
    pub time_limit_secs: f64,
    /// Randomize each transfer's byte count instead of using N.
    pub rand_bytes: bool,
    /// Floor on summed fabric hops exe<->src + exe<->dst (0 = none).
    /// A nonzero floor or ceiling restricts the universe to fabric links.
    pub link_hops_min: u32,
    /// Ceiling on summed fabric hops (-1 = none).
    pub link_hops_max: i32,
    /// Replay log destination; every generated test is appended here in the
    /// advanced transfer-list format so it can be re-run exactly.
    pub log_path: Option<PathBuf>,
}

impl Default for SweepConfig {
    fn default() -> Self {
        Self {
            src_kinds: vec![MemKind::HostPinned, MemKind::Device],
            dst_kinds: vec![MemKind::HostPinned, MemKind::Device],
            exe_kinds: vec![ExeKind::Cpu, ExeKind::GpuGfx],
            min: 1,
            max: 0,
            test_limit: 0,
            time_limit_secs: 0.0,
            rand_bytes: false,
            link_hops_min: 0,
            link_hops_max: -1,
            log_path: Some(PathBuf::from("lastSweep.cfg")),
        }
    }
}

/// Full run configuration. Defaults match a plain benchmark run; every knob
/// can be overridden from the environment via [`RunConfig::from_env`].
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RunConfig {
    /// Untimed iterations executed before measurement starts.
    pub num_warmups: usize,
    /// Positive: timed iteration count. Negative: run timed iterations until
    /// at least that many seconds of cumulative wall time have elapsed.
    pub num_iterations: i32,
    /// Partition granularity in bytes; every non-final nonzero work unit is
    /// a multiple of this.
    pub block_bytes: usize,
    /// Offset added to every buffer base address, for probing misaligned
    /// base behavior. Must be a multiple of 4.
    pub byte_offset: usize,
    /// Fold each GFX executor's transfers into a single combined launch.
    pub use_single_launch: bool,
    pub unit_order: UnitOrder,
    pub validate: ValidatePolicy,
    /// Log validation mismatches and keep going instead of aborting.
    pub continue_on_error: bool,
    /// Repeating source fill pattern; empty means an index-derived value
    /// unique per source slot.
    pub fill_pattern: Vec<f32>,
    /// Collect and report per-iteration timing / placement diagnostics.
    pub show_iterations: bool,
    /// Pause for operator inspection before the first timed iteration and
    /// after the last.
    pub interactive: bool,
    pub output_csv: bool,
    pub num_gpu_sub_execs: usize,
    pub num_cpu_sub_execs: usize,
    /// P2P / A2A: the destination side executes the transfer (remote read)
    /// instead of the source side (remote write).
    pub use_remote_read: bool,
    /// P2P: drive GPU transfers with the DMA engine instead of compute units.
    pub use_dma_copy: bool,
    /// P2P / A2A: allocate fine-grained memory variants.
    pub use_fine_grain: bool,
    pub p2p_mode: P2pMode,
    /// A2A: only benchmark directly-connected pairs (fabric hop count 1).
    pub a2a_direct: bool,
    /// Order logical GPU indices by bus address instead of runtime order.
    pub use_bus_order: bool,
    /// Seed for the run-scoped random generator (layout shuffles, sweeps).
    pub seed: u64,
    /// Sample density for the byte-range mode (N = 0).
    pub sampling_factor: usize,
    /// Optional (executing GPU x destination GPU) -> preferred die table for
    /// routing work units on multi-die devices.
    pub preferred_die: Option<Vec<Vec<u32>>>,
    pub sweep: SweepConfig,
}

impl Default for RunConfig {
    fn default() -> Self {
        Self {
            num_warmups: 3,
            num_iterations: 10,
            block_bytes: 256,
            byte_offset: 0,
            use_single_launch: false,
            unit_order: UnitOrder::Sequential,
            validate: ValidatePolicy::AtEnd,
            continue_on_error: false,
            fill_pattern: Vec::new(),
            show_iterations: false,
            interactive: false,
            output_csv: false,
            num_gpu_sub_execs: 4,
            num_cpu_sub_execs: 4,
            use_remote_read: false,
            use_dma_copy: false,
            use_fine_grain: false,
            p2p_mode: P2pMode::Both,
            a2a_direct: false,
            use_bus_order: false,
            seed: 0x5eed,
            sampling_factor: 1,
            preferred_die: None,
            sweep: SweepConfig::default(),
        }
    }
}

fn env_usize(name: &str, default: usize) -> usize {
    std::env::var(name)
        .ok()
        .and_then(|v| v.parse().ok())
        .unwrap_or(default)
}

fn env_i32(name: &str, default: i32) -> i32 {
    std::env::var(name)
        .ok()
        .and_then(|v| v.parse().ok())
        .unwrap_or(default)
}

fn env_bool(name: &str, default: bool) -> bool {
    std::env::var(name)
        .ok()
        .and_then(|v| v.parse::<i64>().ok())
        .map(|v| v != 0)
        .unwrap_or(default)
}

impl RunConfig {
    /// Build a configuration from environment variables, falling back to
    /// defaults for anything unset.
    pub fn from_env() -> Result<Self> {
        let d = Self::default();
        let mut cfg = Self {
            num_warmups: env_usize("NUM_WARMUPS", d.num_warmups),
            num_iterations: env_i32("NUM_ITERATIONS", d.num_iterations),
            block_bytes: env_usize("BLOCK_BYTES", d.block_bytes),
            byte_offset: env_usize("BYTE_OFFSET", d.byte_offset),
            use_single_launch: env_bool("USE_SINGLE_LAUNCH", d.use_single_launch),
            unit_order: match env_usize("UNIT_ORDER", 0) {
                1 => UnitOrder::Interleaved,
                2 => UnitOrder::Random,
                _ => UnitOrder::Sequential,
            },
            validate: if env_bool("ALWAYS_VALIDATE", false) {
                ValidatePolicy::EveryIteration
            } else {
                ValidatePolicy::AtEnd
            },
            continue_on_error: env_bool("CONTINUE_ON_ERROR", d.continue_on_error),
            fill_pattern: match std::env::var("FILL_PATTERN") {
                Ok(s) => parse_fill_pattern(&s)?,
                Err(_) => Vec::new(),
            },
            show_iterations: env_bool("SHOW_ITERATIONS", d.show_iterations),
            interactive: env_bool("USE_INTERACTIVE", d.interactive),
            output_csv: env_bool("OUTPUT_TO_CSV", d.output_csv),
            num_gpu_sub_execs: env_usize("NUM_GPU_SE", d.num_gpu_sub_execs),
            num_cpu_sub_execs: env_usize("NUM_CPU_SE", d.num_cpu_sub_execs),
            use_remote_read: env_bool("USE_REMOTE_READ", d.use_remote_read),
            use_dma_copy: env_bool("USE_GPU_DMA", d.use_dma_copy),
            use_fine_grain: env_bool("USE_FINE_GRAIN", d.use_fine_grain),
            p2p_mode: match env_usize("P2P_MODE", 0) {
                1 => P2pMode::UnidirectionalOnly,
                2 => P2pMode::BidirectionalOnly,
                _ => P2pMode::Both,
            },
            a2a_direct: env_bool("A2A_DIRECT", d.a2a_direct),
            use_bus_order: env_bool("USE_BUS_INDEX", d.use_bus_order),
            seed: env_usize("RAND_SEED", d.seed as usize) as u64,
            sampling_factor: env_usize("SAMPLING_FACTOR", d.sampling_factor).max(1),
            preferred_die: None,
            sweep: SweepConfig {
                min: env_usize("SWEEP_MIN", d.sweep.min).max(1),
                max: env_usize("SWEEP_MAX", d.sweep.max),
                test_limit: env_usize("SWEEP_TEST_LIMIT", d.sweep.test_limit),
                time_limit_secs: env_usize("SWEEP_TIME_LIMIT", 0) as f64,
                rand_bytes: env_bool("SWEEP_RAND_BYTES", d.sweep.rand_bytes),
                link_hops_min: env_usize("SWEEP_HOPS_MIN", 0) as u32,
                link_hops_max: env_i32("SWEEP_HOPS_MAX", -1),
                src_kinds: match std::env::var("SWEEP_SRC") {
                    Ok(s) => parse_kind_set(&s)?,
                    Err(_) => d.sweep.src_kinds,
                },
                dst_kinds: match std::env::var("SWEEP_DST") {
                    Ok(s) => parse_kind_set(&s)?,
                    Err(_) => d.sweep.dst_kinds,
                },
                exe_kinds: match std::env::var("SWEEP_EXE") {
                    Ok(s) => parse_exe_set(&s)?,
                    Err(_) => d.sweep.exe_kinds,
                },
                log_path: d.sweep.log_path,
            },
        };
        if cfg.byte_offset % 4 != 0 {
            return Err(EngineError::Config(format!(
                "BYTE_OFFSET ({}) must be a multiple of 4",
                cfg.byte_offset
            )));
        }
        if cfg.block_bytes == 0 || cfg.block_bytes % 4 != 0 {
            return Err(EngineError::Config(format!(
                "BLOCK_BYTES ({}) must be a positive multiple of 4",
                cfg.block_bytes
            )));
        }
        if cfg.num_iterations == 0 {
            cfg.num_iterations = d.num_iterations;
        }
        Ok(cfg)
    }

    pub fn block_elems(&self) -> usize {
        self.block_bytes / 4
    }

    pub fn init_offset_elems(&self) -> usize {
        self.byte_offset / 4
    }
}

fn parse_fill_pattern(s: &str) -> Result<Vec<f32>> {
    s.split(',')
        .filter(|t| !t.trim().is_empty())
        .map(|t| {
            t.trim().parse::<f32>().map_err(|_| EngineError::BadToken {
                what: "fill pattern element",
                token: t.to_string(),
            })
        })
        .collect()
}

fn parse_kind_set(s: &str) -> Result<Vec<MemKind>> {
    s.chars()
        .filter(|c| !c.is_whitespace())
        .map(MemKind::from_char)
        .collect()
}

fn parse_exe_set(s: &str) -> Result<Vec<ExeKind>> {
    s.chars()
        .filter(|c| !c.is_whitespace())
        .map(ExeKind::from_char)
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_defaults_are_consistent() {
        let cfg = RunConfig::default();
        assert_eq!(cfg.block_elems(), 64);
        assert_eq!(cfg.init_offset_elems(), 0);
        assert!(cfg.num_iterations > 0);
    }

    #[test]
    fn test_parse_fill_pattern() {
        assert_eq!(
            parse_fill_pattern("1.0, 2.5,3").unwrap(),
            vec![1.0, 2.5, 3.0]
        );
        assert!(parse_fill_pattern("1.0,x").is_err());
    }

    #[test]
    fn test_parse_kind_sets() {
        assert_eq!(
            parse_kind_set("CG").unwrap(),
            vec![MemKind::HostPinned, MemKind::Device]
        );
        assert_eq!(
            parse_exe_set("GD").unwrap(),
            vec![ExeKind::GpuGfx, ExeKind::GpuDma]
        );
    }
}
