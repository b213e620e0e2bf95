//! All-to-all campaign: one GFX transfer per ordered GPU pair, all executed
//! simultaneously as folded launches, with an optional restriction to
//! directly-connected pairs.

use crate::core::config::RunConfig;
use crate::core::transfer::Transfer;
use crate::core::types::{ExeKey, ExeKind, MemKind, MemLoc};
use crate::error::Result;
use crate::report;
use crate::runtime::{DeviceContext, Engine};

/// Build the transfer set: every ordered (src, dst) GPU pair, skipping
/// self-pairs and pairs farther than one fabric hop when direct-only is on.
pub fn build_a2a_transfers(
    cfg: &RunConfig,
    ctx: &DeviceContext,
    num_sub_execs: usize,
) -> Result<Vec<Transfer>> {
    let num_gpus = ctx.num_gpu_devices();
    let kind = if cfg.use_fine_grain {
        MemKind::DeviceFine
    } else {
        MemKind::Device
    };

    let mut transfers = Vec::new();
    for src in 0..num_gpus {
        for dst in 0..num_gpus {
            if cfg.a2a_direct {
                if src == dst {
                    continue;
                }
                let (_, hops) = ctx.topology.gpu_link(ctx.map.gpu(src), ctx.map.gpu(dst));
                if hops != 1 {
                    continue;
                }
            }
            let exe_index = if cfg.use_remote_read { dst } else { src };
            transfers.push(Transfer::new(
                vec![MemLoc::new(kind, src)],
                ExeKey::new(ExeKind::GpuGfx, exe_index),
                vec![MemLoc::new(kind, dst)],
                num_sub_execs,
            )?);
        }
    }
    Ok(transfers)
}

pub fn run_a2a(
    cfg: &RunConfig,
    ctx: &DeviceContext,
    n_elems: usize,
    num_sub_execs: usize,
) -> Result<()> {
    // All-to-all always folds each GPU's transfers into one launch.
    let mut cfg = cfg.clone();
    cfg.use_single_launch = true;

    let transfers = build_a2a_transfers(&cfg, ctx, num_sub_execs)?;
    let num_gpus = ctx.num_gpu_devices();
    let sep = if cfg.output_csv { ',' } else { ' ' };

    println!("GPU-GFX All-To-All benchmark:");
    println!("==========================");
    println!(
        "- Copying {} bytes between {} pairs of GPUs using {} sub-executors ({} Transfers)",
        n_elems * 4,
        if cfg.a2a_direct {
            "directly connected"
        } else {
            "all"
        },
        num_sub_execs,
        transfers.len()
    );
    if transfers.is_empty() {
        return Ok(());
    }

    let mut transfers = transfers;
    let engine = Engine::new(&cfg, ctx);
    let result = engine.execute_transfers(0, n_elems, &mut transfers)?;
    report::print_test_result(&cfg, &result);

    // Per-pair bandwidth matrix with row/column totals.
    println!("\nSummary:");
    println!("==========================================================");
    print!("SRC\\DST");
    for dst in 0..num_gpus {
        print!("{}GPU {:02}   ", sep, dst);
    }
    println!("   {}STotal", sep);

    let bw_of = |src: usize, dst: usize| -> Option<f64> {
        transfers
            .iter()
            .position(|t| t.srcs[0].index == src && t.dsts[0].index == dst)
            .map(|i| result.transfers[i].bandwidth_gbs)
    };

    let mut col_totals = vec![0.0f64; num_gpus];
    let mut grand_total = 0.0f64;
    for src in 0..num_gpus {
        print!("GPU {:02}", src);
        let mut row_total = 0.0;
        for (dst, col_total) in col_totals.iter_mut().enumerate() {
            match bw_of(src, dst) {
                Some(bw) => {
                    row_total += bw;
                    *col_total += bw;
                    grand_total += bw;
                    print!("{}{:7.2}  ", sep, bw);
                }
                None => print!("{}{:>7}  ", sep, "N/A"),
            }
        }
        println!("   {}{:7.2}", sep, row_total);
    }
    print!("\nRTotal");
    for total in &col_totals {
        print!("{}{:7.2}  ", sep, total);
    }
    println!("   {}{:7.2}\n", sep, grand_total);

    println!(
        "Average   bandwidth (GPU Timed): {:7.2} GB/s",
        grand_total / transfers.len() as f64
    );
    println!("Aggregate bandwidth (GPU Timed): {:7.2} GB/s", grand_total);
    println!(
        "Aggregate bandwidth (CPU Timed): {:7.2} GB/s",
        result.cpu_bandwidth_gbs
    );
    Ok(())
}
