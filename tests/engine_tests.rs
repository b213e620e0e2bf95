//! End-to-end engine scenarios over the fully simulated context.

use std::sync::Arc;

use crossflow::core::transfer::ElemPtr;
use crossflow::core::types::{ExeKey, ExeKind, MemKind, MemLoc};
use crossflow::runtime::memory::{BufferId, MemoryPool, SimMemoryPool};
use crossflow::runtime::{CpuAgent, DeviceContext, Engine, SimDmaAgent, SimGfxAgent};
use crossflow::{RunConfig, SimTopology, Transfer, UnitOrder, ValidatePolicy};

fn quick_cfg() -> RunConfig {
    RunConfig {
        num_warmups: 1,
        num_iterations: 3,
        ..RunConfig::default()
    }
}

fn sim_ctx() -> DeviceContext {
    DeviceContext::simulated(SimTopology::default(), false)
}

fn transfer(
    srcs: Vec<MemLoc>,
    exe: ExeKey,
    dsts: Vec<MemLoc>,
    sub_execs: usize,
) -> Transfer {
    Transfer::new(srcs, exe, dsts, sub_execs).unwrap()
}

#[test]
fn test_single_cpu_to_gpu_copy() {
    // One transfer, CPU node 0 -> GPU 0, executed by GPU 0 with 4
    // sub-executors over 1 MiB. Validation runs in-engine: the destination
    // must match the source reference exactly.
    let cfg = quick_cfg();
    let ctx = sim_ctx();
    let mut transfers = vec![transfer(
        vec![MemLoc::new(MemKind::HostPinned, 0)],
        ExeKey::new(ExeKind::GpuGfx, 0),
        vec![MemLoc::new(MemKind::Device, 0)],
        4,
    )];
    let result = Engine::quiet(&cfg, &ctx)
        .execute_transfers(1, 1_048_576 / 4, &mut transfers)
        .unwrap();

    assert!(!result.validation_failed);
    assert_eq!(result.num_timed_iterations, 3);
    assert_eq!(result.transfers.len(), 1);
    assert_eq!(result.transfers[0].num_bytes, 1_048_576);
    assert!(result.transfers[0].bandwidth_gbs > 0.0);
    assert!(result.transfers[0].mean_ms > 0.0);
    assert!(result.cpu_bandwidth_gbs > 0.0);
}

#[test]
fn test_cpu_executor_copy() {
    let cfg = quick_cfg();
    let ctx = sim_ctx();
    let mut transfers = vec![transfer(
        vec![MemLoc::new(MemKind::HostPinned, 0)],
        ExeKey::new(ExeKind::Cpu, 1),
        vec![MemLoc::new(MemKind::HostPinned, 1)],
        4,
    )];
    let result = Engine::quiet(&cfg, &ctx)
        .execute_transfers(1, 1 << 16, &mut transfers)
        .unwrap();
    assert!(!result.validation_failed);
    assert!(result.transfers[0].bandwidth_gbs > 0.0);
}

#[test]
fn test_dma_copy_and_fill() {
    let cfg = quick_cfg();
    let ctx = sim_ctx();
    let mut transfers = vec![
        transfer(
            vec![MemLoc::new(MemKind::Device, 0)],
            ExeKey::new(ExeKind::GpuDma, 0),
            vec![MemLoc::new(MemKind::Device, 1)],
            1,
        ),
        // Fill: no source, destination written with the fill byte.
        transfer(
            vec![],
            ExeKey::new(ExeKind::GpuDma, 1),
            vec![MemLoc::new(MemKind::Device, 1)],
            1,
        ),
    ];
    let result = Engine::quiet(&cfg, &ctx)
        .execute_transfers(1, 1 << 18, &mut transfers)
        .unwrap();
    assert!(!result.validation_failed);
    assert_eq!(result.transfers.len(), 2);
    assert!(result.transfers.iter().all(|t| t.bandwidth_gbs > 0.0));
}

#[test]
fn test_multi_source_reduction() {
    // Two sources summed into one destination; the validator checks the
    // elementwise sum, so a pass proves the reduction ran.
    let cfg = quick_cfg();
    let ctx = sim_ctx();
    let mut transfers = vec![transfer(
        vec![
            MemLoc::new(MemKind::HostPinned, 0),
            MemLoc::new(MemKind::Device, 1),
        ],
        ExeKey::new(ExeKind::GpuGfx, 0),
        vec![MemLoc::new(MemKind::Device, 0)],
        4,
    )];
    let result = Engine::quiet(&cfg, &ctx)
        .execute_transfers(1, 1 << 14, &mut transfers)
        .unwrap();
    assert!(!result.validation_failed);
}

#[test]
fn test_folded_launch_reconstructs_per_transfer_timing() {
    let cfg = RunConfig {
        use_single_launch: true,
        unit_order: UnitOrder::Interleaved,
        ..quick_cfg()
    };
    let ctx = sim_ctx();
    let mut transfers = vec![
        transfer(
            vec![MemLoc::new(MemKind::Device, 0)],
            ExeKey::new(ExeKind::GpuGfx, 0),
            vec![MemLoc::new(MemKind::Device, 1)],
            4,
        ),
        transfer(
            vec![MemLoc::new(MemKind::Device, 0)],
            ExeKey::new(ExeKind::GpuGfx, 0),
            vec![MemLoc::new(MemKind::Device, 2)],
            2,
        ),
    ];
    let result = Engine::quiet(&cfg, &ctx)
        .execute_transfers(1, 1 << 18, &mut transfers)
        .unwrap();

    assert!(!result.validation_failed);
    assert_eq!(result.agents.len(), 1);
    assert!(result.agents[0].folded);
    assert!(result.agents[0].mean_ms > 0.0);
    // Each transfer's time is recovered from its own units' stamps and can
    // never exceed the combined launch time.
    for t in &result.transfers {
        assert!(t.mean_ms > 0.0);
        assert!(t.mean_ms <= result.agents[0].mean_ms + 1e-9);
    }
}

#[test]
fn test_random_unit_order_still_validates() {
    let cfg = RunConfig {
        use_single_launch: true,
        unit_order: UnitOrder::Random,
        validate: ValidatePolicy::EveryIteration,
        ..quick_cfg()
    };
    let ctx = sim_ctx();
    let mut transfers = vec![
        transfer(
            vec![MemLoc::new(MemKind::Device, 0)],
            ExeKey::new(ExeKind::GpuGfx, 0),
            vec![MemLoc::new(MemKind::Device, 1)],
            3,
        ),
        transfer(
            vec![MemLoc::new(MemKind::Device, 1)],
            ExeKey::new(ExeKind::GpuGfx, 0),
            vec![MemLoc::new(MemKind::Device, 3)],
            5,
        ),
    ];
    let result = Engine::quiet(&cfg, &ctx)
        .execute_transfers(1, 1 << 16, &mut transfers)
        .unwrap();
    assert!(!result.validation_failed);
}

#[test]
fn test_requested_bytes_override() {
    let cfg = quick_cfg();
    let ctx = sim_ctx();
    let mut transfers = vec![transfer(
        vec![MemLoc::new(MemKind::Device, 0)],
        ExeKey::new(ExeKind::GpuGfx, 0),
        vec![MemLoc::new(MemKind::Device, 1)],
        2,
    )
    .with_bytes(64 << 10)];
    let result = Engine::quiet(&cfg, &ctx)
        .execute_transfers(1, 1 << 20, &mut transfers)
        .unwrap();
    assert_eq!(result.transfers[0].num_bytes, 64 << 10);
}

#[test]
fn test_misaligned_byte_offset() {
    let cfg = RunConfig {
        byte_offset: 128,
        ..quick_cfg()
    };
    let ctx = sim_ctx();
    let mut transfers = vec![transfer(
        vec![MemLoc::new(MemKind::HostPinned, 0)],
        ExeKey::new(ExeKind::GpuGfx, 0),
        vec![MemLoc::new(MemKind::Device, 0)],
        4,
    )];
    let result = Engine::quiet(&cfg, &ctx)
        .execute_transfers(1, 1 << 14, &mut transfers)
        .unwrap();
    assert!(!result.validation_failed);
}

#[test]
fn test_show_iterations_collects_samples() {
    let cfg = RunConfig {
        show_iterations: true,
        ..quick_cfg()
    };
    let ctx = sim_ctx();
    let mut transfers = vec![transfer(
        vec![MemLoc::new(MemKind::Device, 0)],
        ExeKey::new(ExeKind::GpuGfx, 0),
        vec![MemLoc::new(MemKind::Device, 1)],
        2,
    )];
    let result = Engine::quiet(&cfg, &ctx)
        .execute_transfers(1, 1 << 14, &mut transfers)
        .unwrap();
    assert_eq!(result.transfers[0].per_iteration_ms.len(), 3);
    assert_eq!(result.transfers[0].per_iteration_slots.len(), 3);
}

#[test]
fn test_time_budget_iterations() {
    // Negative iteration count: run timed iterations until the cumulative
    // wall time passes the budget.
    let cfg = RunConfig {
        num_warmups: 0,
        num_iterations: -1,
        ..RunConfig::default()
    };
    let ctx = sim_ctx();
    let mut transfers = vec![transfer(
        vec![MemLoc::new(MemKind::Device, 0)],
        ExeKey::new(ExeKind::GpuGfx, 0),
        vec![MemLoc::new(MemKind::Device, 1)],
        2,
    )];
    let result = Engine::quiet(&cfg, &ctx)
        .execute_transfers(1, 1 << 16, &mut transfers)
        .unwrap();
    assert!(result.num_timed_iterations >= 1);
    let total_ms = result.cpu_time_ms * result.num_timed_iterations as f64;
    assert!(total_ms > 1000.0);
}

#[test]
fn test_empty_transfer_set_is_config_error() {
    let cfg = quick_cfg();
    let ctx = sim_ctx();
    let mut transfers: Vec<Transfer> = Vec::new();
    assert!(Engine::quiet(&cfg, &ctx)
        .execute_transfers(1, 1024, &mut transfers)
        .is_err());
}

/// Shares one SimMemoryPool between the test and the context so peer-access
/// bookkeeping can be observed after the run.
struct SharedPool(Arc<SimMemoryPool>);

impl MemoryPool for SharedPool {
    fn allocate(
        &self,
        kind: MemKind,
        index: usize,
        num_elems: usize,
    ) -> crossflow::Result<BufferId> {
        self.0.allocate(kind, index, num_elems)
    }
    fn deallocate(&self, id: BufferId) -> crossflow::Result<()> {
        self.0.deallocate(id)
    }
    fn base_ptr(&self, id: BufferId) -> crossflow::Result<ElemPtr> {
        self.0.base_ptr(id)
    }
    fn len(&self, id: BufferId) -> crossflow::Result<usize> {
        self.0.len(id)
    }
    fn verify_placement(&self, id: BufferId) -> crossflow::Result<()> {
        self.0.verify_placement(id)
    }
    fn enable_peer_access(&self, device: usize, peer: usize) -> crossflow::Result<()> {
        self.0.enable_peer_access(device, peer)
    }
}

fn ctx_with_pool(topology: SimTopology, pool: Box<dyn MemoryPool>) -> DeviceContext {
    let gpus = topology.gpus.len();
    let nodes = topology.cpu_nodes.len();
    DeviceContext::with_parts(
        Box::new(topology),
        pool,
        (0..gpus)
            .map(|d| Box::new(SimGfxAgent::new(d, 1)) as _)
            .collect(),
        (0..gpus)
            .map(|d| Box::new(SimDmaAgent::new(d)) as _)
            .collect(),
        (0..nodes).map(|n| Box::new(CpuAgent::new(n)) as _).collect(),
        false,
    )
}

#[test]
fn test_peer_access_enabled_lazily_for_remote_gpu_memory() {
    let pool = Arc::new(SimMemoryPool::new());
    let ctx = ctx_with_pool(SimTopology::default(), Box::new(SharedPool(pool.clone())));
    let cfg = quick_cfg();

    // GPU 0 executes a copy touching GPU 2's memory on both ends.
    let mut transfers = vec![transfer(
        vec![MemLoc::new(MemKind::Device, 2)],
        ExeKey::new(ExeKind::GpuGfx, 0),
        vec![MemLoc::new(MemKind::Device, 2)],
        2,
    )];
    Engine::quiet(&cfg, &ctx)
        .execute_transfers(1, 1 << 12, &mut transfers)
        .unwrap();
    assert_eq!(pool.enabled_peer_pairs(), vec![(0, 2)]);

    // Buffers were all released at the end of the call.
    assert_eq!(pool.live_allocations(), 0);
}

#[test]
fn test_buffers_released_even_on_failure() {
    let pool = Arc::new(SimMemoryPool::new());
    let ctx = ctx_with_pool(SimTopology::default(), Box::new(SharedPool(pool.clone())));
    let cfg = RunConfig {
        // Odd byte counts are rejected after some allocation has happened.
        ..quick_cfg()
    };
    let mut transfers = vec![
        transfer(
            vec![MemLoc::new(MemKind::Device, 0)],
            ExeKey::new(ExeKind::GpuGfx, 0),
            vec![MemLoc::new(MemKind::Device, 1)],
            2,
        ),
        transfer(
            vec![MemLoc::new(MemKind::Device, 0)],
            ExeKey::new(ExeKind::GpuGfx, 0),
            vec![MemLoc::new(MemKind::Device, 1)],
            2,
        )
        .with_bytes(6), // not a multiple of 4
    ];
    assert!(Engine::quiet(&cfg, &ctx)
        .execute_transfers(1, 1 << 12, &mut transfers)
        .is_err());
    assert_eq!(pool.live_allocations(), 0);
}
