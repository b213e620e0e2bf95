//! Execution agents: the opaque "run one launch, stamp start/stop, report
//! elapsed" capability the dispatcher schedules against.
//!
//! The engine never looks inside a launch. It hands an agent a slice of
//! work units, gets back a start/stop timestamp pair in the agent's clock
//! domain, and reads the per-unit stamps the agent wrote. The simulated
//! agents below perform real host-memory copies so timings and validation
//! are meaningful without hardware; a HIP/CUDA agent would slot in behind
//! the same trait.

use std::time::Instant;

use rayon::prelude::*;

use crate::core::transfer::SubExecParam;
use crate::error::{EngineError, Result};

/// Fill byte used when a transfer has no sources (pure fill / memset).
pub const FILL_BYTE: u8 = 0x75;

/// The fill byte replicated across one f32 element.
pub fn fill_value() -> f32 {
    f32::from_bits(u32::from_ne_bytes([FILL_BYTE; 4]))
}

/// Start/stop pair recorded around one launch, in agent clock cycles.
#[derive(Debug, Clone, Copy)]
pub struct LaunchTiming {
    pub start_cycle: u64,
    pub stop_cycle: u64,
}

impl LaunchTiming {
    pub fn elapsed_ms(&self, clock_khz: u64) -> f64 {
        (self.stop_cycle.saturating_sub(self.start_cycle)) as f64 / clock_khz as f64
    }
}

pub trait CopyAgent: Send + Sync {
    /// Upload the laid-out work-unit descriptors to the agent before the
    /// first iteration. Synchronous; a device-backed agent copies the
    /// descriptor array into device-resident memory here.
    fn prepare(&self, _units: &[SubExecParam]) -> Result<()> {
        Ok(())
    }

    /// Execute one launch over `units`, stamping each unit's start/stop
    /// cycles and execution location, and return the launch-wide pair.
    fn run(&self, units: &mut [SubExecParam]) -> Result<LaunchTiming>;

    /// Cycles per millisecond of the clock `run` stamps with.
    fn clock_khz(&self) -> u64;
}

/// The single-threaded copy/reduce routine every sub-executor runs: sum all
/// sources elementwise into every destination, fill with the fill byte when
/// there are no sources, or read-and-discard when there are no destinations.
///
/// Safety: callers guarantee pointers are valid for `num_elems` elements and
/// that concurrently-running units cover disjoint destination ranges.
pub fn copy_reduce(p: &SubExecParam) {
    let n = p.num_elems;
    if n == 0 {
        return;
    }
    unsafe {
        match (p.srcs.len(), p.dsts.len()) {
            (0, _) => {
                let fill = fill_value();
                for d in &p.dsts {
                    for i in 0..n {
                        *d.0.add(i) = fill;
                    }
                }
            }
            (1, 1) => {
                std::ptr::copy_nonoverlapping(p.srcs[0].0 as *const f32, p.dsts[0].0, n);
            }
            (_, 0) => {
                // Read-only benchmark: consume the sources without storing.
                let mut acc = 0.0f32;
                for s in &p.srcs {
                    for i in 0..n {
                        acc += *s.0.add(i);
                    }
                }
                std::hint::black_box(acc);
            }
            _ => {
                for i in 0..n {
                    let mut sum = *p.srcs[0].0.add(i);
                    for s in &p.srcs[1..] {
                        sum += *s.0.add(i);
                    }
                    for d in &p.dsts {
                        *d.0.add(i) = sum;
                    }
                }
            }
        }
    }
}

/// Simulated GPU compute-unit agent. Work units execute in parallel so
/// their timestamps overlap within the device clock domain, which is what
/// the folded-launch per-transfer reconstruction relies on.
pub struct SimGfxAgent {
    pub device: usize,
    pub num_dies: u32,
    clock_khz: u64,
    epoch: Instant,
}

impl SimGfxAgent {
    pub fn new(device: usize, num_dies: u32) -> Self {
        Self {
            device,
            num_dies: num_dies.max(1),
            clock_khz: 25_000,
            epoch: Instant::now(),
        }
    }

    fn now_cycles(&self) -> u64 {
        self.epoch.elapsed().as_micros() as u64 * self.clock_khz / 1000
    }
}

impl CopyAgent for SimGfxAgent {
    fn run(&self, units: &mut [SubExecParam]) -> Result<LaunchTiming> {
        let start_cycle = self.now_cycles();
        units.par_iter_mut().enumerate().for_each(|(i, unit)| {
            unit.start_cycle = self.now_cycles();
            copy_reduce(unit);
            unit.stop_cycle = self.now_cycles();
            unit.die_id = if unit.preferred_die >= 0 {
                unit.preferred_die as u32 % self.num_dies
            } else {
                i as u32 % self.num_dies
            };
            unit.slot_id = rayon::current_thread_index().unwrap_or(0) as u32;
        });
        Ok(LaunchTiming {
            start_cycle,
            stop_cycle: self.now_cycles(),
        })
    }

    fn clock_khz(&self) -> u64 {
        self.clock_khz
    }
}

/// Simulated GPU DMA engine: one engine, so units run back to back.
pub struct SimDmaAgent {
    pub device: usize,
    clock_khz: u64,
    epoch: Instant,
}

impl SimDmaAgent {
    pub fn new(device: usize) -> Self {
        Self {
            device,
            clock_khz: 25_000,
            epoch: Instant::now(),
        }
    }

    fn now_cycles(&self) -> u64 {
        self.epoch.elapsed().as_micros() as u64 * self.clock_khz / 1000
    }
}

impl CopyAgent for SimDmaAgent {
    fn run(&self, units: &mut [SubExecParam]) -> Result<LaunchTiming> {
        let start_cycle = self.now_cycles();
        for unit in units.iter_mut() {
            unit.start_cycle = self.now_cycles();
            copy_reduce(unit);
            unit.stop_cycle = self.now_cycles();
            unit.die_id = 0;
            unit.slot_id = 0;
        }
        Ok(LaunchTiming {
            start_cycle,
            stop_cycle: self.now_cycles(),
        })
    }

    fn clock_khz(&self) -> u64 {
        self.clock_khz
    }
}

/// CPU thread-pool agent for one NUMA node: one OS thread per sub-executor,
/// wall-clock timed around spawn and join. The clock stamps nanoseconds, so
/// cycles-per-millisecond is one million.
pub struct CpuAgent {
    pub node: usize,
    epoch: Instant,
}

impl CpuAgent {
    pub fn new(node: usize) -> Self {
        Self {
            node,
            epoch: Instant::now(),
        }
    }

    fn now_cycles(&self) -> u64 {
        self.epoch.elapsed().as_nanos() as u64
    }
}

impl CopyAgent for CpuAgent {
    fn run(&self, units: &mut [SubExecParam]) -> Result<LaunchTiming> {
        let epoch = self.epoch;
        let start_cycle = self.now_cycles();
        let spawn_failed = std::thread::scope(|s| {
            let mut handles = Vec::with_capacity(units.len());
            for (i, unit) in units.iter_mut().enumerate() {
                handles.push(s.spawn(move || {
                    unit.start_cycle = epoch.elapsed().as_nanos() as u64;
                    copy_reduce(unit);
                    unit.stop_cycle = epoch.elapsed().as_nanos() as u64;
                    unit.die_id = 0;
                    unit.slot_id = i as u32;
                }));
            }
            handles.into_iter().any(|h| h.join().is_err())
        });
        if spawn_failed {
            return Err(EngineError::Launch(format!(
                "CPU sub-executor thread panicked on node {}",
                self.node
            )));
        }
        Ok(LaunchTiming {
            start_cycle,
            stop_cycle: self.now_cycles(),
        })
    }

    fn clock_khz(&self) -> u64 {
        1_000_000
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::core::transfer::ElemPtr;

    fn unit_from(src: &mut [f32], dst: &mut [f32]) -> SubExecParam {
        SubExecParam::new(
            src.len(),
            vec![ElemPtr(src.as_mut_ptr())],
            vec![ElemPtr(dst.as_mut_ptr())],
        )
    }

    #[test]
    fn test_copy_reduce_single_pair() {
        let mut src: Vec<f32> = (0..64).map(|i| i as f32).collect();
        let mut dst = vec![0.0f32; 64];
        copy_reduce(&unit_from(&mut src, &mut dst));
        assert_eq!(src, dst);
    }

    #[test]
    fn test_copy_reduce_sums_sources() {
        let mut a = vec![1.0f32; 16];
        let mut b = vec![2.5f32; 16];
        let mut dst = vec![0.0f32; 16];
        let unit = SubExecParam::new(
            16,
            vec![ElemPtr(a.as_mut_ptr()), ElemPtr(b.as_mut_ptr())],
            vec![ElemPtr(dst.as_mut_ptr())],
        );
        copy_reduce(&unit);
        assert!(dst.iter().all(|&v| v == 3.5));
    }

    #[test]
    fn test_copy_reduce_fill() {
        let mut dst = vec![0.0f32; 8];
        let unit = SubExecParam::new(8, vec![], vec![ElemPtr(dst.as_mut_ptr())]);
        copy_reduce(&unit);
        assert!(dst.iter().all(|&v| v.to_bits() == fill_value().to_bits()));
    }

    #[test]
    fn test_zero_length_unit_is_noop() {
        let unit = SubExecParam::new(0, vec![], vec![]);
        copy_reduce(&unit);
    }

    #[test]
    fn test_gfx_agent_stamps_units() {
        let agent = SimGfxAgent::new(0, 2);
        let mut src = vec![1.0f32; 4096];
        let mut dst = vec![0.0f32; 4096];
        let mut units = vec![unit_from(&mut src, &mut dst)];
        let timing = agent.run(&mut units).unwrap();
        assert!(timing.stop_cycle >= timing.start_cycle);
        assert!(units[0].stop_cycle >= units[0].start_cycle);
        assert!(units[0].start_cycle >= timing.start_cycle);
        assert_eq!(dst, src);
    }

    #[test]
    fn test_cpu_agent_copies_and_times() {
        let agent = CpuAgent::new(0);
        let mut src = vec![2.0f32; 1 << 16];
        let mut dst = vec![0.0f32; 1 << 16];
        let half = 1 << 15;
        let (s0, s1) = src.split_at_mut(half);
        let (d0, d1) = dst.split_at_mut(half);
        let mut units = vec![unit_from(s0, d0), unit_from(s1, d1)];
        let timing = agent.run(&mut units).unwrap();
        assert!(timing.elapsed_ms(agent.clock_khz()) > 0.0);
        assert!(dst.iter().all(|&v| v == 2.0));
    }
}
