//! Validator round-trips: reference priming, destination checking, injected
//! corruption, and the abort-or-continue policy under a broken agent.

use crossflow::core::transfer::SubExecParam;
use crossflow::core::types::{ExeKey, ExeKind, MemKind, MemLoc};
use crossflow::error::EngineError;
use crossflow::runtime::agent::{copy_reduce, CopyAgent, LaunchTiming};
use crossflow::runtime::memory::{MemoryPool, SimMemoryPool};
use crossflow::runtime::validate::{prepare_src, validate_dst};
use crossflow::runtime::{CpuAgent, DeviceContext, Engine, SimDmaAgent};
use crossflow::{RunConfig, SimTopology, Transfer};

fn primed_transfer(pool: &SimMemoryPool, num_srcs: usize, n: usize) -> Transfer {
    let mut t = Transfer::new(
        vec![MemLoc::new(MemKind::HostPinned, 0); num_srcs],
        ExeKey::new(ExeKind::Cpu, 0),
        vec![MemLoc::new(MemKind::HostPinned, 0)],
        1,
    )
    .unwrap();
    t.resolved_bytes = n * 4;
    for _ in 0..num_srcs {
        t.src_bufs
            .push(pool.allocate(MemKind::HostPinned, 0, n).unwrap());
    }
    t.dst_bufs
        .push(pool.allocate(MemKind::HostPinned, 0, n).unwrap());
    t
}

fn run_units(pool: &SimMemoryPool, t: &Transfer, n: usize) {
    let srcs = t
        .src_bufs
        .iter()
        .map(|&b| pool.base_ptr(b).unwrap())
        .collect();
    let dsts = t
        .dst_bufs
        .iter()
        .map(|&b| pool.base_ptr(b).unwrap())
        .collect();
    copy_reduce(&SubExecParam::new(n, srcs, dsts));
}

#[test]
fn test_round_trip_passes_without_corruption() {
    let cfg = RunConfig::default();
    let pool = SimMemoryPool::new();
    let n = 4096;
    let t = primed_transfer(&pool, 2, n);

    prepare_src(&cfg, &t, &pool).unwrap();
    run_units(&pool, &t, n);
    validate_dst(&cfg, &t, &pool).unwrap();
}

#[test]
fn test_corruption_reported_at_exact_index() {
    let cfg = RunConfig::default();
    let pool = SimMemoryPool::new();
    let n = 4096;
    let t = primed_transfer(&pool, 1, n);

    prepare_src(&cfg, &t, &pool).unwrap();
    run_units(&pool, &t, n);

    // Flip one destination element.
    let corrupted_index = 1234usize;
    unsafe {
        let ptr = pool.base_ptr(t.dst_bufs[0]).unwrap().0;
        *ptr.add(corrupted_index) += 1.0;
    }

    let err = validate_dst(&cfg, &t, &pool).unwrap_err();
    assert!(err.is_validation());
    let msg = err.to_string();
    assert!(
        msg.contains("index 1234"),
        "mismatch must name the corrupted index, got: {}",
        msg
    );
    assert!(msg.contains(&t.descriptor()));
}

#[test]
fn test_fill_transfer_validates_against_fill_byte() {
    let cfg = RunConfig::default();
    let pool = SimMemoryPool::new();
    let n = 512;
    let mut t = Transfer::new(
        vec![],
        ExeKey::new(ExeKind::GpuDma, 0),
        vec![MemLoc::new(MemKind::Device, 0)],
        1,
    )
    .unwrap();
    t.resolved_bytes = n * 4;
    t.dst_bufs
        .push(pool.allocate(MemKind::Device, 0, n).unwrap());

    // Not yet filled: all zeroes cannot match the fill pattern.
    assert!(validate_dst(&cfg, &t, &pool).is_err());
    run_units(&pool, &t, n);
    validate_dst(&cfg, &t, &pool).unwrap();
}

#[test]
fn test_user_fill_pattern_round_trip() {
    let cfg = RunConfig {
        fill_pattern: vec![4.0, 8.0, 15.0, 16.0, 23.0, 42.0],
        ..RunConfig::default()
    };
    let pool = SimMemoryPool::new();
    let n = 1000;
    let t = primed_transfer(&pool, 1, n);
    prepare_src(&cfg, &t, &pool).unwrap();
    run_units(&pool, &t, n);
    validate_dst(&cfg, &t, &pool).unwrap();
}

/// Agent that stamps timings but never moves any data.
struct BrokenAgent;

impl CopyAgent for BrokenAgent {
    fn run(&self, units: &mut [SubExecParam]) -> crossflow::Result<LaunchTiming> {
        for u in units.iter_mut() {
            u.start_cycle = 0;
            u.stop_cycle = 1;
        }
        Ok(LaunchTiming {
            start_cycle: 0,
            stop_cycle: 1,
        })
    }
    fn clock_khz(&self) -> u64 {
        25_000
    }
}

fn broken_ctx() -> DeviceContext {
    let topo = SimTopology::fully_connected(1, 4, 1);
    DeviceContext::with_parts(
        Box::new(topo),
        Box::new(SimMemoryPool::new()),
        vec![Box::new(BrokenAgent)],
        vec![Box::new(SimDmaAgent::new(0))],
        vec![Box::new(CpuAgent::new(0))],
        false,
    )
}

#[test]
fn test_validation_mismatch_is_fatal_by_default() {
    let cfg = RunConfig {
        num_warmups: 0,
        num_iterations: 1,
        ..RunConfig::default()
    };
    let ctx = broken_ctx();
    let mut transfers = vec![Transfer::new(
        vec![MemLoc::new(MemKind::Device, 0)],
        ExeKey::new(ExeKind::GpuGfx, 0),
        vec![MemLoc::new(MemKind::HostPinned, 0)],
        2,
    )
    .unwrap()];
    let err = Engine::quiet(&cfg, &ctx)
        .execute_transfers(1, 4096, &mut transfers)
        .unwrap_err();
    assert!(matches!(err, EngineError::Validation(_)));
}

#[test]
fn test_continue_on_error_marks_run_failed_but_completes() {
    let cfg = RunConfig {
        num_warmups: 0,
        num_iterations: 2,
        continue_on_error: true,
        ..RunConfig::default()
    };
    let ctx = broken_ctx();
    let mut transfers = vec![Transfer::new(
        vec![MemLoc::new(MemKind::Device, 0)],
        ExeKey::new(ExeKind::GpuGfx, 0),
        vec![MemLoc::new(MemKind::HostPinned, 0)],
        2,
    )
    .unwrap()];
    let result = Engine::quiet(&cfg, &ctx)
        .execute_transfers(1, 4096, &mut transfers)
        .unwrap();
    // Timing was still collected for the completed iterations; the run as a
    // whole is reported failed.
    assert!(result.validation_failed);
    assert_eq!(result.num_timed_iterations, 2);
}
