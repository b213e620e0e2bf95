//! Scaling campaign: fix the source and executing GPU, sweep the
//! sub-executor count from 1 to a maximum against every destination, and
//! track the best bandwidth (and the count that achieved it) per
//! destination.

use crate::core::config::RunConfig;
use crate::core::transfer::Transfer;
use crate::core::types::{ExeKey, ExeKind, MemKind, MemLoc};
use crate::error::{EngineError, Result};
use crate::runtime::{DeviceContext, Engine};

use super::p2p::{enumerate_endpoints, Endpoint};

#[derive(Debug, Clone)]
pub struct ScalingOutcome {
    /// Per destination: (best bandwidth, sub-executor count that reached it).
    pub best: Vec<(f64, usize)>,
    /// bandwidth[count - 1][destination].
    pub bandwidth: Vec<Vec<f64>>,
    pub destinations: Vec<Endpoint>,
}

pub fn run_scaling(
    cfg: &RunConfig,
    ctx: &DeviceContext,
    n_elems: usize,
    exe_index: usize,
    max_sub_execs: usize,
) -> Result<ScalingOutcome> {
    if exe_index >= ctx.num_gpu_devices() {
        return Err(EngineError::IndexOutOfRange {
            device: "GPU",
            got: exe_index as i64,
            max: ctx.num_gpu_devices() as i64 - 1,
        });
    }
    if max_sub_execs == 0 {
        return Err(EngineError::Config(
            "scaling requires at least one sub-executor".to_string(),
        ));
    }

    let destinations = enumerate_endpoints(ctx);
    let engine = Engine::quiet(cfg, ctx);
    let sep = if cfg.output_csv { ',' } else { ' ' };

    println!("GPU-GFX Scaling benchmark:");
    println!("==========================");
    println!(
        "- Copying {} bytes from GPU {} to other devices",
        n_elems * 4,
        exe_index
    );
    println!("- All numbers reported as GB/sec\n");

    print!("NumSE ");
    for e in &destinations {
        print!("{}  {}     ", sep, e.label_short());
    }
    println!();

    let mut best = vec![(0.0f64, 0usize); destinations.len()];
    let mut bandwidth = Vec::with_capacity(max_sub_execs);

    for count in 1..=max_sub_execs {
        print!("{:4}  ", count);
        let mut row = Vec::with_capacity(destinations.len());
        for (d, dst) in destinations.iter().enumerate() {
            let dst_loc = if dst.is_gpu {
                MemLoc::new(MemKind::Device, dst.index)
            } else {
                MemLoc::new(MemKind::HostPinned, dst.index)
            };
            let mut transfers = vec![Transfer::new(
                vec![MemLoc::new(MemKind::Device, exe_index)],
                ExeKey::new(ExeKind::GpuGfx, exe_index),
                vec![dst_loc],
                count,
            )?];
            let result = engine.execute_transfers(0, n_elems, &mut transfers)?;
            let bw = result.transfers[0].bandwidth_gbs;
            print!("{}{:7.2}     ", sep, bw);
            row.push(bw);
            if bw > best[d].0 {
                best[d] = (bw, count);
            }
        }
        println!();
        bandwidth.push(row);
    }

    print!(" Best ");
    for &(bw, count) in &best {
        print!("{}{:7.2}({:3})", sep, bw, count);
    }
    println!();

    Ok(ScalingOutcome {
        best,
        bandwidth,
        destinations,
    })
}

impl Endpoint {
    fn label_short(&self) -> String {
        format!("{}{:02}", if self.is_gpu { "GPU" } else { "CPU" }, self.index)
    }
}
