//! Peer-to-peer campaign: unidirectional and bidirectional copy bandwidth
//! between every ordered pair of devices (CPU NUMA nodes and GPUs alike).

use crate::core::config::{P2pMode, RunConfig};
use crate::core::transfer::Transfer;
use crate::core::types::{ExeKey, ExeKind, MemKind, MemLoc};
use crate::error::Result;
use crate::runtime::stats::{iteration_spread, IterationSpread};
use crate::runtime::{DeviceContext, Engine};

/// One endpoint of a pair: a CPU NUMA node or a GPU.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Endpoint {
    pub is_gpu: bool,
    pub index: usize,
}

impl Endpoint {
    fn mem_loc(&self, fine_grain: bool) -> MemLoc {
        let kind = match (self.is_gpu, fine_grain) {
            (true, false) => MemKind::Device,
            (true, true) => MemKind::DeviceFine,
            (false, false) => MemKind::HostPinned,
            (false, true) => MemKind::HostPinnedFine,
        };
        MemLoc::new(kind, self.index)
    }

    fn label(&self) -> String {
        format!("{} {:02}", if self.is_gpu { "GPU" } else { "CPU" }, self.index)
    }
}

/// All pairable devices: CPU nodes first, then GPUs.
pub fn enumerate_endpoints(ctx: &DeviceContext) -> Vec<Endpoint> {
    let mut endpoints = Vec::new();
    for i in 0..ctx.num_cpu_devices() {
        endpoints.push(Endpoint {
            is_gpu: false,
            index: i,
        });
    }
    for i in 0..ctx.num_gpu_devices() {
        endpoints.push(Endpoint {
            is_gpu: true,
            index: i,
        });
    }
    endpoints
}

fn direction_transfer(cfg: &RunConfig, from: Endpoint, to: Endpoint) -> Result<Transfer> {
    // The executing side is the reader under remote-read, the writer
    // otherwise; GPU executors use the DMA engine when configured.
    let exe_side = if cfg.use_remote_read { to } else { from };
    let exe = if exe_side.is_gpu {
        ExeKey::new(
            if cfg.use_dma_copy {
                ExeKind::GpuDma
            } else {
                ExeKind::GpuGfx
            },
            exe_side.index,
        )
    } else {
        ExeKey::new(ExeKind::Cpu, exe_side.index)
    };
    let sub_execs = if exe.kind.is_gpu() {
        cfg.num_gpu_sub_execs
    } else {
        cfg.num_cpu_sub_execs
    };
    Transfer::new(
        vec![from.mem_loc(cfg.use_fine_grain)],
        exe,
        vec![to.mem_loc(cfg.use_fine_grain)],
        sub_execs,
    )
}

/// Build the transfers for one (src, dst) cell: one forward transfer, plus
/// the reverse when bidirectional. Returns None when the pair is skipped
/// (CPU executor on a node with no CPUs, or src == dst in bidirectional
/// mode).
pub fn build_pair(
    cfg: &RunConfig,
    ctx: &DeviceContext,
    src: Endpoint,
    dst: Endpoint,
    bidirectional: bool,
) -> Result<Option<Vec<Transfer>>> {
    if bidirectional && src == dst {
        return Ok(None);
    }
    let mut transfers = vec![direction_transfer(cfg, src, dst)?];
    if bidirectional {
        transfers.push(direction_transfer(cfg, dst, src)?);
    }
    for t in &transfers {
        if t.exe.kind == ExeKind::Cpu
            && ctx.topology.cpus_on_node(ctx.map.cpu(t.exe.index)) == 0
        {
            return Ok(None);
        }
    }
    Ok(Some(transfers))
}

fn print_matrix_row(label: &str, row: &[f64], num_cpus: usize, csv: bool) {
    print!("{:>12}", label);
    if csv {
        print!(",");
    }
    for (i, &bw) in row.iter().enumerate() {
        if i == num_cpus && i != 0 {
            print!("   ");
        }
        if bw == 0.0 {
            print!("{:>10}", "N/A");
        } else {
            print!("{:>10.2}", bw);
        }
        if csv {
            print!(",");
        }
    }
    println!();
}

/// Run the P2P campaign over every ordered device pair.
pub fn run_p2p(cfg: &RunConfig, ctx: &DeviceContext, n_elems: usize) -> Result<()> {
    let endpoints = enumerate_endpoints(ctx);
    let num_cpus = ctx.num_cpu_devices();
    let engine = Engine::quiet(cfg, ctx);

    println!("Bytes Per Direction{}{}", sep(cfg), n_elems * 4);

    for bidirectional in [false, true] {
        match cfg.p2p_mode {
            P2pMode::UnidirectionalOnly if bidirectional => continue,
            P2pMode::BidirectionalOnly if !bidirectional => continue,
            _ => {}
        }

        println!(
            "{}directional copy peak bandwidth GB/s [{} read / {} write] (GPU-Executor: {})",
            if bidirectional { "Bi" } else { "Uni" },
            if cfg.use_remote_read { "Remote" } else { "Local" },
            if cfg.use_remote_read { "Local" } else { "Remote" },
            if cfg.use_dma_copy { "DMA" } else { "GFX" },
        );
        print!("{:>12}", if bidirectional { "SRC\\DST" } else { "SRC+EXE\\DST" });
        if cfg.output_csv {
            print!(",");
        }
        for e in &endpoints {
            print!("{:>10}", e.label());
            if cfg.output_csv {
                print!(",");
            }
        }
        println!();

        // Category sums over (cpu|gpu) x (cpu|gpu), diagonal excluded.
        let mut bw_sum = [[0.0f64; 2]; 2];
        let mut bw_count = [[0usize; 2]; 2];

        for &src in &endpoints {
            let dirs = if bidirectional { 2 } else { 1 };
            let mut avg = vec![vec![0.0f64; endpoints.len()]; dirs];
            let mut spreads: Vec<Vec<Option<IterationSpread>>> =
                vec![vec![None; endpoints.len()]; dirs];

            for (d, &dst) in endpoints.iter().enumerate() {
                let pair = build_pair(cfg, ctx, src, dst, bidirectional)?;
                let mut transfers = match pair {
                    Some(t) => t,
                    None => continue,
                };
                let result = engine.execute_transfers(0, n_elems, &mut transfers)?;
                for dir in 0..dirs {
                    let report = &result.transfers[dir];
                    avg[dir][d] = report.bandwidth_gbs;
                    if src != dst {
                        bw_sum[src.is_gpu as usize][dst.is_gpu as usize] += report.bandwidth_gbs;
                        bw_count[src.is_gpu as usize][dst.is_gpu as usize] += 1;
                    }
                    if cfg.show_iterations {
                        spreads[dir][d] =
                            Some(iteration_spread(report.num_bytes, &report.per_iteration_ms));
                    }
                }
            }

            for dir in 0..dirs {
                let arrow = if dir == 1 { "<- " } else { " ->" };
                print_matrix_row(
                    &format!("{} {}", src.label(), arrow),
                    &avg[dir],
                    num_cpus,
                    cfg.output_csv,
                );
                if cfg.show_iterations {
                    let collect = |f: fn(&IterationSpread) -> f64| {
                        spreads[dir]
                            .iter()
                            .map(|s| s.as_ref().map(f).unwrap_or(0.0))
                            .collect::<Vec<f64>>()
                    };
                    print_matrix_row(
                        &format!("{} min", src.label()),
                        &collect(|s| s.bandwidth.min),
                        num_cpus,
                        cfg.output_csv,
                    );
                    print_matrix_row(
                        &format!("{} max", src.label()),
                        &collect(|s| s.bandwidth.max),
                        num_cpus,
                        cfg.output_csv,
                    );
                    print_matrix_row(
                        &format!("{} sd", src.label()),
                        &collect(|s| s.bandwidth.std_dev),
                        num_cpus,
                        cfg.output_csv,
                    );
                }
            }

            if bidirectional {
                let sums: Vec<f64> = (0..endpoints.len())
                    .map(|d| avg[0][d] + avg[1][d])
                    .collect();
                print_matrix_row(
                    &format!("{} <->", src.label()),
                    &sums,
                    num_cpus,
                    cfg.output_csv,
                );
            }
        }

        if !cfg.output_csv {
            print!("{:>25}", "");
            for s in ["CPU->CPU", "CPU->GPU", "GPU->CPU", "GPU->GPU"] {
                print!("{:>10}", s);
            }
            println!();
            print!(
                "Averages (During {}):",
                if bidirectional { " BiDir" } else { "UniDir" }
            );
            for s in 0..2 {
                for d in 0..2 {
                    if bw_count[s][d] > 0 {
                        print!("{:>10.2}", bw_sum[s][d] / bw_count[s][d] as f64);
                    } else {
                        print!("{:>10}", "N/A");
                    }
                }
            }
            println!();
            println!();
        }
    }
    Ok(())
}

fn sep(cfg: &RunConfig) -> char {
    if cfg.output_csv {
        ','
    } else {
        ' '
    }
}
