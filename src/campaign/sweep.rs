//! Sweep campaign: enumerate or sample subsets of the topology-constrained
//! universe of (source, executor, destination) triplets and execute each
//! subset as one test.

use std::fs::File;
use std::io::Write;
use std::time::Instant;

use rand::rngs::StdRng;
use rand::{Rng, SeedableRng};

use crate::core::config::RunConfig;
use crate::core::transfer::Transfer;
use crate::core::types::{ExeKey, ExeKind, MemLoc};
use crate::error::Result;
use crate::report;
use crate::runtime::{DeviceContext, Engine};
use crate::topology::LinkKind;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Triplet {
    pub src: MemLoc,
    pub exe: ExeKey,
    pub dst: MemLoc,
}

/// All (src, exe, dst) triplets permitted by the configured participant
/// kinds and link constraints. A nonzero hop floor or ceiling restricts the
/// universe to executor/memory pairs joined by fabric links.
pub fn build_universe(cfg: &RunConfig, ctx: &DeviceContext) -> Vec<Triplet> {
    let sweep = &cfg.sweep;
    let fabric_only = sweep.link_hops_min > 0 || sweep.link_hops_max > 0;

    let mut exe_list: Vec<ExeKey> = Vec::new();
    for &kind in &sweep.exe_kinds {
        match kind {
            ExeKind::GpuGfx | ExeKind::GpuDma => {
                for i in 0..ctx.num_gpu_devices() {
                    exe_list.push(ExeKey::new(kind, i));
                }
            }
            ExeKind::Cpu => {
                for i in 0..ctx.num_cpu_devices() {
                    // NUMA nodes without CPUs (e.g. memory-only expanders)
                    // cannot execute anything.
                    if ctx.topology.cpus_on_node(ctx.map.cpu(i)) == 0 {
                        continue;
                    }
                    exe_list.push(ExeKey::new(kind, i));
                }
            }
        }
    }

    let mem_list = |kinds: &[crate::core::types::MemKind]| -> Vec<MemLoc> {
        let mut list = Vec::new();
        for &kind in kinds {
            let count = if kind.is_gpu() {
                ctx.num_gpu_devices()
            } else {
                ctx.num_cpu_devices()
            };
            for i in 0..count {
                list.push(MemLoc::new(kind, i));
            }
        }
        list
    };
    let src_list = mem_list(&sweep.src_kinds);
    let dst_list = mem_list(&sweep.dst_kinds);

    // Fabric reach between the executor and one memory location: None if the
    // pair is not joined by fabric, Some(hops) otherwise.
    let fabric_hops = |exe: ExeKey, loc: &MemLoc| -> Option<u32> {
        if !(exe.kind.is_gpu() && loc.kind.is_gpu()) {
            return None;
        }
        if exe.index == loc.index {
            return Some(0);
        }
        let (kind, hops) = ctx
            .topology
            .gpu_link(ctx.map.gpu(exe.index), ctx.map.gpu(loc.index));
        match kind {
            LinkKind::Fabric => Some(hops),
            LinkKind::Bus => None,
        }
    };

    let mut universe = Vec::new();
    for &exe in &exe_list {
        if fabric_only && !exe.kind.is_gpu() {
            continue;
        }
        for src in &src_list {
            let hops_src = fabric_hops(exe, src);
            if fabric_only && hops_src.is_none() {
                continue;
            }
            if sweep.link_hops_max >= 0 {
                if let Some(h) = hops_src {
                    if h > sweep.link_hops_max as u32 {
                        continue;
                    }
                }
            }
            for dst in &dst_list {
                let hops_dst = fabric_hops(exe, dst);
                if fabric_only && hops_dst.is_none() {
                    continue;
                }
                let total = hops_src.unwrap_or(0) + hops_dst.unwrap_or(0);
                if sweep.link_hops_min > 0 && total < sweep.link_hops_min {
                    continue;
                }
                if sweep.link_hops_max >= 0 && total > sweep.link_hops_max as u32 {
                    continue;
                }
                universe.push(Triplet {
                    src: *src,
                    exe,
                    dst: *dst,
                });
            }
        }
    }
    universe
}

/// Step `mask` to the previous lexicographic permutation. Mirrors the C++
/// `std::prev_permutation`: returns false (and leaves the slice re-sorted
/// descending) once the sequence is exhausted.
pub fn prev_permutation<T: Ord>(a: &mut [T]) -> bool {
    if a.len() < 2 {
        return false;
    }
    let mut i = a.len() - 1;
    loop {
        let next = i;
        i -= 1;
        if a[i] > a[next] {
            let mut j = a.len() - 1;
            while a[j] >= a[i] {
                j -= 1;
            }
            a.swap(i, j);
            a[next..].reverse();
            return true;
        }
        if i == 0 {
            a.reverse();
            return false;
        }
    }
}

/// Deterministic subset enumeration: every C(P, M) subset in lexicographic
/// order, M incrementing from `min_m` to `max_m` as each size is exhausted.
pub struct SubsetEnumerator {
    mask: Vec<u8>,
    m: usize,
    max_m: usize,
    p: usize,
    pending_first: bool,
    exhausted: bool,
}

impl SubsetEnumerator {
    pub fn new(p: usize, min_m: usize, max_m: usize) -> Self {
        let min_m = min_m.max(1);
        let max_m = if max_m == 0 { p } else { max_m.min(p) };
        let mut mask = vec![1u8; min_m.min(p)];
        mask.resize(p, 0);
        Self {
            mask,
            m: min_m,
            max_m,
            p,
            pending_first: true,
            exhausted: min_m > p,
        }
    }

    fn selection(&self) -> Vec<usize> {
        self.mask
            .iter()
            .enumerate()
            .filter(|(_, &bit)| bit == 1)
            .map(|(i, _)| i)
            .collect()
    }
}

impl Iterator for SubsetEnumerator {
    type Item = Vec<usize>;

    fn next(&mut self) -> Option<Vec<usize>> {
        if self.exhausted {
            return None;
        }
        if self.pending_first {
            self.pending_first = false;
            return Some(self.selection());
        }
        if !prev_permutation(&mut self.mask) {
            self.m += 1;
            if self.m > self.max_m {
                self.exhausted = true;
                return None;
            }
            for (i, bit) in self.mask.iter_mut().enumerate() {
                *bit = u8::from(i < self.m);
            }
        }
        Some(self.selection())
    }
}

#[derive(Debug, Clone, Copy)]
pub struct SweepOutcome {
    pub tests_run: usize,
    /// Deterministic enumeration ran out of subsets.
    pub exhausted: bool,
}

fn transfers_for_selection(
    cfg: &RunConfig,
    universe: &[Triplet],
    selection: &[usize],
    num_gpu_se: usize,
    num_cpu_se: usize,
    n_elems: usize,
    rng: &mut StdRng,
) -> Result<Vec<Transfer>> {
    let mut transfers = Vec::with_capacity(selection.len());
    for &idx in selection {
        let t = universe[idx];
        let sub_execs = if t.exe.kind.is_gpu() {
            num_gpu_se
        } else {
            num_cpu_se
        };
        let mut transfer = Transfer::new(vec![t.src], t.exe, vec![t.dst], sub_execs)?;
        if cfg.sweep.rand_bytes {
            transfer.requested_bytes = rng.gen_range(1..=n_elems) * 4;
        }
        transfers.push(transfer);
    }
    Ok(transfers)
}

fn log_test(log: &mut Option<File>, test_num: usize, transfers: &[Transfer]) -> Result<()> {
    let file = match log {
        Some(f) => f,
        None => return Ok(()),
    };
    writeln!(file, "# Test {}", test_num)?;
    write!(file, "{}", -(transfers.len() as i64))?;
    for t in transfers {
        write!(
            file,
            " ({}->{}->{} {} {})",
            t.src_desc(),
            t.exe,
            t.dst_desc(),
            t.num_sub_execs,
            t.requested_bytes
        )?;
    }
    writeln!(file)?;
    file.flush()?;
    Ok(())
}

/// Run the sweep campaign. `random` draws subset sizes and members from the
/// run RNG; otherwise subsets are enumerated deterministically until
/// exhaustion. Terminates on the configured test count or time budget.
pub fn run_sweep(
    cfg: &RunConfig,
    ctx: &DeviceContext,
    n_elems: usize,
    num_gpu_se: usize,
    num_cpu_se: usize,
    random: bool,
) -> Result<SweepOutcome> {
    let universe = build_universe(cfg, ctx);
    let p = universe.len();
    let max_m = if cfg.sweep.max == 0 {
        p
    } else {
        cfg.sweep.max.min(p)
    };

    println!(
        "[Sweep] {} valid (src, exe, dst) triplets, subset sizes {}..={}{}",
        p,
        cfg.sweep.min,
        max_m,
        if random { " (random)" } else { "" }
    );
    if cfg.sweep.min > max_m {
        println!("[Sweep] No valid test configurations exist");
        return Ok(SweepOutcome {
            tests_run: 0,
            exhausted: true,
        });
    }

    let mut log = match &cfg.sweep.log_path {
        Some(path) => Some(File::create(path)?),
        None => None,
    };
    let mut rng = StdRng::seed_from_u64(cfg.seed);
    let mut enumerator = SubsetEnumerator::new(p, cfg.sweep.min, max_m);
    let engine = Engine::new(cfg, ctx);
    let start = Instant::now();

    let mut tests_run = 0usize;
    let mut exhausted = false;
    loop {
        let selection: Vec<usize> = if random {
            let m = rng.gen_range(cfg.sweep.min..=max_m);
            let mut selected = rand::seq::index::sample(&mut rng, p, m).into_vec();
            selected.sort_unstable();
            selected
        } else {
            match enumerator.next() {
                Some(s) => s,
                None => {
                    println!("[Sweep] Sweep complete");
                    exhausted = true;
                    break;
                }
            }
        };

        let mut transfers = transfers_for_selection(
            cfg,
            &universe,
            &selection,
            num_gpu_se,
            num_cpu_se,
            n_elems,
            &mut rng,
        )?;
        tests_run += 1;
        log_test(&mut log, tests_run, &transfers)?;
        let result = engine.execute_transfers(tests_run, n_elems, &mut transfers)?;
        report::print_test_result(cfg, &result);

        if cfg.sweep.test_limit != 0 && tests_run >= cfg.sweep.test_limit {
            println!("[Sweep] Test limit reached");
            break;
        }
        if cfg.sweep.time_limit_secs > 0.0
            && start.elapsed().as_secs_f64() > cfg.sweep.time_limit_secs
        {
            println!("[Sweep] Time limit exceeded");
            break;
        }
    }

    Ok(SweepOutcome {
        tests_run,
        exhausted,
    })
}
