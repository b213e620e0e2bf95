//! Executor groups: all transfers sharing one executing agent, plus the
//! laid-out work-unit buffer and launch slots the dispatcher drives.

use std::collections::BTreeMap;
use std::ops::Range;

use rand::rngs::StdRng;
use rand::seq::SliceRandom;

use crate::core::config::{RunConfig, UnitOrder};
use crate::core::transfer::{SubExecParam, Transfer};
use crate::core::types::{ExeKey, ExeKind};
use crate::error::Result;
use crate::runtime::agent::LaunchTiming;
use crate::topology::DeviceMap;

/// Analog of one stream + start/stop event pair: the dispatcher records the
/// launch timing of each schedulable unit here every iteration.
#[derive(Debug, Default, Clone, Copy)]
pub struct LaunchSlot {
    pub last: Option<LaunchTiming>,
}

pub struct ExecutorGroup<'t> {
    pub key: ExeKey,
    /// Physical device index after remapping.
    pub phys: usize,
    pub transfers: Vec<&'t mut Transfer>,
    pub total_sub_execs: usize,
    pub total_bytes: usize,
    /// One slot per transfer, or exactly one when folded.
    pub slots: Vec<LaunchSlot>,
    /// The group's contiguous work-unit buffer (the device-resident
    /// descriptor array of a GFX agent).
    pub units: Vec<SubExecParam>,
    /// Per-transfer contiguous range into `units`; only meaningful for the
    /// sequential layout used by per-transfer launches.
    pub ranges: Vec<Range<usize>>,
    /// Per-transfer indices into `units`, valid for every layout; used to
    /// reconstruct per-transfer timing inside a folded launch.
    pub unit_map: Vec<Vec<usize>>,
    /// All transfers issued as one combined launch.
    pub folded: bool,
    /// Accumulated event time of the folded launch across timed iterations.
    pub total_time_ms: f64,
}

impl<'t> ExecutorGroup<'t> {
    pub fn num_launches(&self) -> usize {
        if self.folded {
            1
        } else {
            self.transfers.len()
        }
    }
}

/// Place every transfer's units into one shared buffer. Returns the buffer
/// and, per transfer, the buffer indices its units landed on. The layout is
/// a bijection: each (transfer, unit) pair appears exactly once.
pub fn layout_units(
    per_transfer: &[Vec<SubExecParam>],
    order: UnitOrder,
    rng: &mut StdRng,
) -> (Vec<SubExecParam>, Vec<Vec<usize>>) {
    let total: usize = per_transfer.iter().map(|u| u.len()).sum();
    let mut buffer = Vec::with_capacity(total);
    let mut map: Vec<Vec<usize>> = per_transfer.iter().map(|u| Vec::with_capacity(u.len())).collect();

    match order {
        UnitOrder::Sequential => {
            for (t, units) in per_transfer.iter().enumerate() {
                for unit in units {
                    map[t].push(buffer.len());
                    buffer.push(unit.clone());
                }
            }
        }
        UnitOrder::Interleaved => {
            let mut round = 0usize;
            while buffer.len() < total {
                for (t, units) in per_transfer.iter().enumerate() {
                    if let Some(unit) = units.get(round) {
                        map[t].push(buffer.len());
                        buffer.push(unit.clone());
                    }
                }
                round += 1;
            }
        }
        UnitOrder::Random => {
            let mut pairs: Vec<(usize, usize)> = Vec::with_capacity(total);
            for (t, units) in per_transfer.iter().enumerate() {
                for u in 0..units.len() {
                    pairs.push((t, u));
                }
            }
            pairs.shuffle(rng);
            for (t, u) in pairs {
                map[t].push(buffer.len());
                buffer.push(per_transfer[t][u].clone());
            }
        }
    }
    (buffer, map)
}

/// Group transfers by remapped executor key and build each group's derived
/// state. Transfers must already be partitioned (`Transfer::units` filled).
///
/// Folding applies only to GFX groups and forces no particular unit order;
/// per-transfer launches always use the sequential layout so each launch
/// covers one contiguous range of the shared buffer.
pub fn build_groups<'t>(
    cfg: &RunConfig,
    map: &DeviceMap,
    transfers: &'t mut [Transfer],
    rng: &mut StdRng,
) -> Result<BTreeMap<ExeKey, ExecutorGroup<'t>>> {
    let mut groups: BTreeMap<ExeKey, ExecutorGroup<'t>> = BTreeMap::new();
    for transfer in transfers.iter_mut() {
        let key = transfer.exe;
        let phys = match key.kind {
            ExeKind::Cpu => map.cpu(key.index),
            ExeKind::GpuGfx | ExeKind::GpuDma => map.gpu(key.index),
        };
        let group = groups.entry(key).or_insert_with(|| ExecutorGroup {
            key,
            phys,
            transfers: Vec::new(),
            total_sub_execs: 0,
            total_bytes: 0,
            slots: Vec::new(),
            units: Vec::new(),
            ranges: Vec::new(),
            unit_map: Vec::new(),
            folded: false,
            total_time_ms: 0.0,
        });
        group.total_sub_execs += transfer.num_sub_execs;
        group.total_bytes += transfer.resolved_bytes;
        group.transfers.push(transfer);
    }

    for group in groups.values_mut() {
        group.folded = cfg.use_single_launch && group.key.kind == ExeKind::GpuGfx;

        let order = if group.folded {
            cfg.unit_order
        } else {
            UnitOrder::Sequential
        };
        let per_transfer: Vec<Vec<SubExecParam>> =
            group.transfers.iter().map(|t| t.units.clone()).collect();
        let (units, unit_map) = layout_units(&per_transfer, order, rng);

        group.ranges = {
            let mut ranges = Vec::with_capacity(per_transfer.len());
            let mut cursor = 0usize;
            for t in &per_transfer {
                ranges.push(cursor..cursor + t.len());
                cursor += t.len();
            }
            ranges
        };
        group.units = units;
        group.unit_map = unit_map;
        group.slots = vec![LaunchSlot::default(); group.num_launches()];
    }
    Ok(groups)
}

#[cfg(test)]
mod tests {
    use super::*;
    use rand::SeedableRng;

    fn fake_units(counts: &[usize]) -> Vec<Vec<SubExecParam>> {
        counts
            .iter()
            .enumerate()
            .map(|(t, &n)| {
                (0..n)
                    // Encode (transfer, unit) into num_elems so the bijection
                    // is checkable after layout.
                    .map(|u| SubExecParam::new(t * 1000 + u, vec![], vec![]))
                    .collect()
            })
            .collect()
    }

    fn check_bijection(per_transfer: &[Vec<SubExecParam>], order: UnitOrder) {
        let mut rng = StdRng::seed_from_u64(7);
        let (buffer, map) = layout_units(per_transfer, order, &mut rng);
        let total: usize = per_transfer.iter().map(|u| u.len()).sum();
        assert_eq!(buffer.len(), total);

        let mut seen = std::collections::BTreeSet::new();
        for (t, indices) in map.iter().enumerate() {
            assert_eq!(indices.len(), per_transfer[t].len());
            for (u, &slot) in indices.iter().enumerate() {
                assert!(seen.insert(slot), "slot {} assigned twice", slot);
                assert_eq!(buffer[slot].num_elems, t * 1000 + u);
            }
        }
        assert_eq!(seen.len(), total);
    }

    #[test]
    fn test_layout_bijection_all_orders() {
        let per_transfer = fake_units(&[4, 1, 3, 0, 2]);
        for order in [UnitOrder::Sequential, UnitOrder::Interleaved, UnitOrder::Random] {
            check_bijection(&per_transfer, order);
        }
    }

    #[test]
    fn test_sequential_layout_is_contiguous() {
        let per_transfer = fake_units(&[2, 3]);
        let mut rng = StdRng::seed_from_u64(0);
        let (_, map) = layout_units(&per_transfer, UnitOrder::Sequential, &mut rng);
        assert_eq!(map[0], vec![0, 1]);
        assert_eq!(map[1], vec![2, 3, 4]);
    }

    #[test]
    fn test_interleaved_layout_round_robins() {
        let per_transfer = fake_units(&[3, 1, 2]);
        let mut rng = StdRng::seed_from_u64(0);
        let (buffer, _) = layout_units(&per_transfer, UnitOrder::Interleaved, &mut rng);
        // Round 0: unit 0 of each transfer; round 1: transfers 0 and 2;
        // round 2: transfer 0 only.
        let ids: Vec<usize> = buffer.iter().map(|u| u.num_elems).collect();
        assert_eq!(ids, vec![0, 1000, 2000, 1, 2001, 2]);
    }

    #[test]
    fn test_random_layout_is_seed_deterministic() {
        let per_transfer = fake_units(&[4, 4]);
        let mut rng_a = StdRng::seed_from_u64(42);
        let mut rng_b = StdRng::seed_from_u64(42);
        let (buf_a, map_a) = layout_units(&per_transfer, UnitOrder::Random, &mut rng_a);
        let (buf_b, map_b) = layout_units(&per_transfer, UnitOrder::Random, &mut rng_b);
        let ids_a: Vec<usize> = buf_a.iter().map(|u| u.num_elems).collect();
        let ids_b: Vec<usize> = buf_b.iter().map(|u| u.num_elems).collect();
        assert_eq!(ids_a, ids_b);
        assert_eq!(map_a, map_b);
    }
}
