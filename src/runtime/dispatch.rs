//! Concurrent dispatcher: runs one benchmark test over a set of transfers.
//!
//! A test is warmup iterations followed by timed iterations. Every
//! iteration issues one launch per (executor group x transfer) — or one per
//! group when the group is folded — each on its own thread of control, then
//! joins them all before the next iteration begins. No ordering exists
//! between groups; within a group the layout policy decides slot placement
//! only.

use std::collections::{BTreeMap, BTreeSet};
use std::io::BufRead;
use std::time::Instant;

use rand::rngs::StdRng;
use rand::SeedableRng;
use serde::Serialize;

use crate::core::config::{RunConfig, ValidatePolicy};
use crate::core::transfer::{SubExecParam, Transfer};
use crate::core::types::ExeKey;
use crate::error::{EngineError, Result};
use crate::runtime::agent::{CopyAgent, LaunchTiming};
use crate::runtime::context::DeviceContext;
use crate::runtime::group::{build_groups, ExecutorGroup};
use crate::runtime::memory::{BufferId, MemoryPool};
use crate::runtime::partition::partition_transfer;
use crate::runtime::stats::bandwidth_gbs;
use crate::runtime::validate::{prepare_src, validate_dst};

#[derive(Debug, Clone, Serialize)]
pub struct TransferReport {
    pub index: usize,
    pub num_bytes: usize,
    pub src: String,
    pub exe: String,
    pub dst: String,
    pub num_sub_execs: usize,
    pub mean_ms: f64,
    pub bandwidth_gbs: f64,
    pub per_iteration_ms: Vec<f64>,
    pub per_iteration_slots: Vec<Vec<(u32, u32)>>,
    pub src_addrs: Vec<u64>,
    pub dst_addrs: Vec<u64>,
}

#[derive(Debug, Clone, Serialize)]
pub struct AgentReport {
    pub key: String,
    pub folded: bool,
    pub total_bytes: usize,
    pub total_sub_execs: usize,
    pub mean_ms: f64,
    pub bandwidth_gbs: f64,
    pub transfer_indices: Vec<usize>,
}

#[derive(Debug, Clone, Serialize)]
pub struct TestResult {
    pub test_num: usize,
    pub num_timed_iterations: usize,
    /// Mean wall-clock time of one whole iteration, measured outside the
    /// devices. Upper-bounds every agent's own timing; the gap is launch
    /// and scheduling overhead.
    pub cpu_time_ms: f64,
    pub total_bytes: usize,
    pub cpu_bandwidth_gbs: f64,
    pub max_agent_ms: f64,
    pub overhead_ms: f64,
    pub agents: Vec<AgentReport>,
    pub transfers: Vec<TransferReport>,
    pub validation_failed: bool,
}

/// Deallocates every buffer the run allocated, also on early error returns.
struct AllocGuard<'p> {
    pool: &'p dyn MemoryPool,
    ids: Vec<BufferId>,
}

impl Drop for AllocGuard<'_> {
    fn drop(&mut self) {
        for id in self.ids.drain(..) {
            let _ = self.pool.deallocate(id);
        }
    }
}

struct GroupSummary {
    key: ExeKey,
    folded: bool,
    total_bytes: usize,
    total_sub_execs: usize,
    total_time_ms: f64,
    transfer_indices: Vec<usize>,
}

pub struct Engine<'a> {
    cfg: &'a RunConfig,
    ctx: &'a DeviceContext,
    verbose: bool,
}

impl<'a> Engine<'a> {
    pub fn new(cfg: &'a RunConfig, ctx: &'a DeviceContext) -> Self {
        Self {
            cfg,
            ctx,
            verbose: true,
        }
    }

    /// Engine variant for campaign inner loops: no interactive pauses.
    pub fn quiet(cfg: &'a RunConfig, ctx: &'a DeviceContext) -> Self {
        Self {
            cfg,
            ctx,
            verbose: false,
        }
    }

    /// Run one test: allocate, partition, group, iterate, validate, reduce.
    /// `n_elems` is the element count for transfers that did not request an
    /// explicit byte count.
    pub fn execute_transfers(
        &self,
        test_num: usize,
        n_elems: usize,
        transfers: &mut [Transfer],
    ) -> Result<TestResult> {
        if transfers.is_empty() {
            return Err(EngineError::Config("no transfers to execute".to_string()));
        }
        let cfg = self.cfg;
        let pool = self.ctx.pool.as_ref();
        let mut guard = AllocGuard {
            pool,
            ids: Vec::new(),
        };

        // Resolve sizes, allocate buffers, enable peer access, partition.
        for (i, transfer) in transfers.iter_mut().enumerate() {
            transfer.reset_run_state();
            transfer.index = i;
            transfer.resolved_bytes = if transfer.requested_bytes != 0 {
                transfer.requested_bytes
            } else {
                n_elems * 4
            };
            if transfer.resolved_bytes == 0 || transfer.resolved_bytes % 4 != 0 {
                return Err(EngineError::Config(format!(
                    "transfer {} byte count ({}) must be a positive multiple of 4",
                    i, transfer.resolved_bytes
                )));
            }
            let elems = transfer.resolved_bytes / 4 + cfg.init_offset_elems();
            let exe_phys = self.ctx.physical_exe(transfer.exe)?;
            let exe_is_gpu = transfer.exe.kind.is_gpu();

            for loc in transfer.srcs.clone() {
                let phys = self.ctx.physical_mem(&loc)?;
                if exe_is_gpu && loc.kind.is_gpu() && phys != exe_phys {
                    pool.enable_peer_access(exe_phys, phys)?;
                }
                let id = pool.allocate(loc.kind, phys, elems)?;
                guard.ids.push(id);
                pool.verify_placement(id)?;
                transfer.src_bufs.push(id);
                transfer
                    .src_addrs
                    .push(pool.base_ptr(id)?.0 as u64 + cfg.byte_offset as u64);
            }
            for loc in transfer.dsts.clone() {
                let phys = self.ctx.physical_mem(&loc)?;
                if exe_is_gpu && loc.kind.is_gpu() && phys != exe_phys {
                    pool.enable_peer_access(exe_phys, phys)?;
                }
                let id = pool.allocate(loc.kind, phys, elems)?;
                guard.ids.push(id);
                pool.verify_placement(id)?;
                transfer.dst_bufs.push(id);
                transfer
                    .dst_addrs
                    .push(pool.base_ptr(id)?.0 as u64 + cfg.byte_offset as u64);
            }
            transfer.units = partition_transfer(cfg, transfer, pool)?;
        }

        // Prime sources and confirm placement before anything is timed.
        let mut src_ok = true;
        for transfer in transfers.iter() {
            match prepare_src(cfg, transfer, pool) {
                Ok(()) => {}
                Err(e) if e.is_validation() && cfg.continue_on_error => {
                    println!("[ERROR] {}", e);
                    src_ok = false;
                }
                Err(e) => return Err(e),
            }
        }

        let mut rng = StdRng::seed_from_u64(cfg.seed ^ test_num as u64);
        let mut groups = build_groups(cfg, &self.ctx.map, transfers, &mut rng)?;

        // Synchronous descriptor upload point before iteration 0.
        for group in groups.values() {
            let agent = self.ctx.agent(group.key.kind, group.phys)?;
            agent.prepare(&group.units)?;
        }

        let mut total_cpu_ms = 0.0f64;
        let mut num_timed = 0usize;
        let mut validation_failed = !src_ok;
        let mut iteration: i64 = -(cfg.num_warmups as i64);

        while src_ok {
            if cfg.num_iterations > 0 && iteration >= cfg.num_iterations as i64 {
                break;
            }
            if cfg.num_iterations < 0 && total_cpu_ms / 1000.0 > (-cfg.num_iterations) as f64 {
                break;
            }

            if self.verbose && cfg.interactive && iteration == 0 {
                self.pause_for_inspection(&groups);
            }

            let iter_start = Instant::now();
            let launch_results = self.run_one_iteration(&mut groups)?;
            let delta_ms = iter_start.elapsed().as_secs_f64() * 1000.0;

            self.apply_launch_results(&mut groups, launch_results, iteration)?;

            if cfg.validate == ValidatePolicy::EveryIteration {
                self.validate_destinations(&groups, &mut validation_failed)?;
            }

            if iteration >= 0 {
                num_timed += 1;
                total_cpu_ms += delta_ms;
            }
            iteration += 1;
        }

        if src_ok {
            self.validate_destinations(&groups, &mut validation_failed)?;
        }

        if self.verbose && cfg.interactive && src_ok {
            println!("Transfers complete. Hit <Enter> to continue: ");
            wait_for_enter();
        }

        let summaries: Vec<GroupSummary> = groups
            .values()
            .map(|g| GroupSummary {
                key: g.key,
                folded: g.folded,
                total_bytes: g.total_bytes,
                total_sub_execs: g.total_sub_execs,
                total_time_ms: g.total_time_ms,
                transfer_indices: g.transfers.iter().map(|t| t.index).collect(),
            })
            .collect();
        drop(groups);

        Ok(self.assemble_result(test_num, transfers, summaries, num_timed, total_cpu_ms, validation_failed))
    }

    /// Fan out one launch per schedulable unit across every group, each on
    /// its own thread, and join them all. Returns (group, launch, timing).
    fn run_one_iteration(
        &self,
        groups: &mut BTreeMap<ExeKey, ExecutorGroup<'_>>,
    ) -> Result<Vec<(usize, usize, std::result::Result<LaunchTiming, EngineError>)>> {
        struct LaunchWork<'w> {
            gi: usize,
            li: usize,
            agent: &'w dyn CopyAgent,
            units: &'w mut [SubExecParam],
        }

        let mut work: Vec<LaunchWork> = Vec::new();
        for (gi, group) in groups.values_mut().enumerate() {
            let agent = self.ctx.agent(group.key.kind, group.phys)?;
            if group.folded {
                work.push(LaunchWork {
                    gi,
                    li: 0,
                    agent,
                    units: &mut group.units[..],
                });
            } else {
                let mut rest: &mut [SubExecParam] = &mut group.units[..];
                let mut consumed = 0usize;
                for (li, range) in group.ranges.iter().enumerate() {
                    let (head, tail) = rest.split_at_mut(range.end - consumed);
                    work.push(LaunchWork {
                        gi,
                        li,
                        agent,
                        units: head,
                    });
                    rest = tail;
                    consumed = range.end;
                }
            }
        }

        let results = std::thread::scope(|s| {
            let handles: Vec<_> = work
                .into_iter()
                .map(|w| {
                    let (gi, li) = (w.gi, w.li);
                    (gi, li, s.spawn(move || w.agent.run(w.units)))
                })
                .collect();
            handles
                .into_iter()
                .map(|(gi, li, h)| {
                    let outcome = match h.join() {
                        Ok(r) => r,
                        Err(_) => Err(EngineError::Launch(
                            "launch thread panicked".to_string(),
                        )),
                    };
                    (gi, li, outcome)
                })
                .collect()
        });
        Ok(results)
    }

    fn apply_launch_results(
        &self,
        groups: &mut BTreeMap<ExeKey, ExecutorGroup<'_>>,
        results: Vec<(usize, usize, std::result::Result<LaunchTiming, EngineError>)>,
        iteration: i64,
    ) -> Result<()> {
        let cfg = self.cfg;
        let mut fatal: Option<EngineError> = None;
        let mut glist: Vec<&mut ExecutorGroup<'_>> = groups.values_mut().collect();

        for (gi, li, outcome) in results {
            let timing = match outcome {
                Ok(t) => t,
                Err(e) => {
                    fatal = Some(e);
                    continue;
                }
            };
            let group = &mut *glist[gi];
            group.slots[li].last = Some(timing);
            if iteration < 0 {
                continue;
            }
            let clock = self.ctx.agent(group.key.kind, group.phys)?.clock_khz();
            let elapsed = timing.elapsed_ms(clock);

            if group.folded {
                group.total_time_ms += elapsed;
                // A single combined launch: recover each transfer's elapsed
                // time from the earliest start and latest stop its own units
                // stamped. This assumes units overlap in the device clock
                // domain; it is a measurement approximation, not exact.
                for ti in 0..group.transfers.len() {
                    let mut min_start = u64::MAX;
                    let mut max_stop = 0u64;
                    let mut slot_set = BTreeSet::new();
                    for &ui in &group.unit_map[ti] {
                        let unit = &group.units[ui];
                        min_start = min_start.min(unit.start_cycle);
                        max_stop = max_stop.max(unit.stop_cycle);
                        if cfg.show_iterations {
                            slot_set.insert((unit.die_id, unit.slot_id));
                        }
                    }
                    let t_ms = if max_stop > min_start {
                        (max_stop - min_start) as f64 / clock as f64
                    } else {
                        0.0
                    };
                    let transfer = &mut *group.transfers[ti];
                    transfer.total_time_ms += t_ms;
                    if cfg.show_iterations {
                        transfer.per_iteration_ms.push(t_ms);
                        transfer.per_iteration_slots.push(slot_set);
                    }
                }
            } else {
                let range = group.ranges[li].clone();
                let mut slot_set = BTreeSet::new();
                if cfg.show_iterations {
                    for unit in &group.units[range] {
                        slot_set.insert((unit.die_id, unit.slot_id));
                    }
                }
                let transfer = &mut *group.transfers[li];
                transfer.total_time_ms += elapsed;
                if cfg.show_iterations {
                    transfer.per_iteration_ms.push(elapsed);
                    transfer.per_iteration_slots.push(slot_set);
                }
            }
        }

        match fatal {
            Some(e) => Err(e),
            None => Ok(()),
        }
    }

    fn validate_destinations(
        &self,
        groups: &BTreeMap<ExeKey, ExecutorGroup<'_>>,
        validation_failed: &mut bool,
    ) -> Result<()> {
        for group in groups.values() {
            for transfer in group.transfers.iter() {
                match validate_dst(self.cfg, transfer, self.ctx.pool.as_ref()) {
                    Ok(()) => {}
                    Err(e) if e.is_validation() && self.cfg.continue_on_error => {
                        println!("[ERROR] {}", e);
                        *validation_failed = true;
                    }
                    Err(e) => return Err(e),
                }
            }
        }
        Ok(())
    }

    fn assemble_result(
        &self,
        test_num: usize,
        transfers: &[Transfer],
        summaries: Vec<GroupSummary>,
        num_timed: usize,
        total_cpu_ms: f64,
        validation_failed: bool,
    ) -> TestResult {
        let mean_of = |total: f64| {
            if num_timed > 0 {
                total / num_timed as f64
            } else {
                0.0
            }
        };

        let mut total_bytes = 0usize;
        let reports: Vec<TransferReport> = transfers
            .iter()
            .map(|t| {
                total_bytes += t.resolved_bytes;
                let mean_ms = mean_of(t.total_time_ms);
                TransferReport {
                    index: t.index,
                    num_bytes: t.resolved_bytes,
                    src: t.src_desc(),
                    exe: t.exe.to_string(),
                    dst: t.dst_desc(),
                    num_sub_execs: t.num_sub_execs,
                    mean_ms,
                    bandwidth_gbs: bandwidth_gbs(t.resolved_bytes, mean_ms),
                    per_iteration_ms: t.per_iteration_ms.clone(),
                    per_iteration_slots: t
                        .per_iteration_slots
                        .iter()
                        .map(|s| s.iter().copied().collect())
                        .collect(),
                    src_addrs: t.src_addrs.clone(),
                    dst_addrs: t.dst_addrs.clone(),
                }
            })
            .collect();

        let mut max_agent_ms = 0.0f64;
        let agents: Vec<AgentReport> = summaries
            .into_iter()
            .map(|s| {
                let mean_ms = if s.folded {
                    mean_of(s.total_time_ms)
                } else {
                    s.transfer_indices
                        .iter()
                        .map(|&i| reports[i].mean_ms)
                        .fold(0.0, f64::max)
                };
                max_agent_ms = max_agent_ms.max(mean_ms);
                AgentReport {
                    key: s.key.to_string(),
                    folded: s.folded,
                    total_bytes: s.total_bytes,
                    total_sub_execs: s.total_sub_execs,
                    mean_ms,
                    bandwidth_gbs: bandwidth_gbs(s.total_bytes, mean_ms),
                    transfer_indices: s.transfer_indices,
                }
            })
            .collect();

        let cpu_time_ms = mean_of(total_cpu_ms);
        TestResult {
            test_num,
            num_timed_iterations: num_timed,
            cpu_time_ms,
            total_bytes,
            cpu_bandwidth_gbs: bandwidth_gbs(total_bytes, cpu_time_ms),
            max_agent_ms,
            overhead_ms: cpu_time_ms - max_agent_ms,
            agents,
            transfers: reports,
            validation_failed,
        }
    }

    fn pause_for_inspection(&self, groups: &BTreeMap<ExeKey, ExecutorGroup<'_>>) {
        println!("Memory prepared:");
        for group in groups.values() {
            for transfer in group.transfers.iter() {
                println!("Transfer {:03}:", transfer.index);
                for (i, addr) in transfer.src_addrs.iter().enumerate() {
                    println!("  SRC {}: {:#x}", i, addr);
                }
                for (i, addr) in transfer.dst_addrs.iter().enumerate() {
                    println!("  DST {}: {:#x}", i, addr);
                }
            }
        }
        println!("Hit <Enter> to continue: ");
        wait_for_enter();
    }
}

fn wait_for_enter() {
    let mut line = String::new();
    let _ = std::io::stdin().lock().read_line(&mut line);
}
