//! Partitioner: split a transfer's element range into balanced,
//! granularity-aligned work units.

use crate::core::config::RunConfig;
use crate::core::transfer::{SubExecParam, Transfer};
use crate::error::Result;
use crate::runtime::memory::MemoryPool;

/// Split `n` elements over `num_units` units. Each step divides the
/// remaining elements by the remaining units still eligible for work,
/// rounded up to `granularity`; units past the point where the transfer
/// runs out of granules receive zero elements. Returned ranges are
/// contiguous `(offset, len)` pairs that exactly cover `0..n`.
pub fn split_elements(n: usize, num_units: usize, granularity: usize) -> Vec<(usize, usize)> {
    let granularity = granularity.max(1);
    let eligible = ((n + granularity - 1) / granularity).min(num_units);

    let mut ranges = Vec::with_capacity(num_units);
    let mut assigned = 0usize;
    for i in 0..num_units {
        let left = eligible.saturating_sub(i);
        let leftover = n - assigned;
        let len = if left == 0 {
            0
        } else {
            let granules = (leftover + granularity - 1) / granularity;
            leftover.min(granules / left * granularity)
        };
        ranges.push((assigned, len));
        assigned += len;
    }
    ranges
}

/// Build the work units for one transfer from its allocated buffers. Every
/// pointer is offset by the run's initial byte offset plus the unit's
/// cumulative element offset.
pub fn partition_transfer(
    cfg: &RunConfig,
    transfer: &Transfer,
    pool: &dyn MemoryPool,
) -> Result<Vec<SubExecParam>> {
    let n = transfer.resolved_bytes / 4;
    let init_offset = cfg.init_offset_elems();
    let ranges = split_elements(n, transfer.num_sub_execs, cfg.block_elems());

    let src_bases = transfer
        .src_bufs
        .iter()
        .map(|&id| pool.base_ptr(id))
        .collect::<Result<Vec<_>>>()?;
    let dst_bases = transfer
        .dst_bufs
        .iter()
        .map(|&id| pool.base_ptr(id))
        .collect::<Result<Vec<_>>>()?;

    let preferred = preferred_die_for(cfg, transfer);

    let mut units = Vec::with_capacity(ranges.len());
    for (offset, len) in ranges {
        let srcs = src_bases
            .iter()
            .map(|p| p.offset(init_offset + offset))
            .collect();
        let dsts = dst_bases
            .iter()
            .map(|p| p.offset(init_offset + offset))
            .collect();
        let mut unit = SubExecParam::new(len, srcs, dsts);
        unit.preferred_die = preferred;
        units.push(unit);
    }
    Ok(units)
}

/// Die routing applies only to GFX transfers with a single GPU destination.
fn preferred_die_for(cfg: &RunConfig, transfer: &Transfer) -> i32 {
    let table = match &cfg.preferred_die {
        Some(t) => t,
        None => return -1,
    };
    if transfer.exe.kind != crate::core::types::ExeKind::GpuGfx {
        return -1;
    }
    if transfer.dsts.len() != 1 || !transfer.dsts[0].kind.is_gpu() {
        return -1;
    }
    table
        .get(transfer.exe.index)
        .and_then(|row| row.get(transfer.dsts[0].index))
        .map(|&d| d as i32)
        .unwrap_or(-1)
}

#[cfg(test)]
mod tests {
    use super::*;

    fn check_invariants(n: usize, num_units: usize, granularity: usize) {
        let ranges = split_elements(n, num_units, granularity);
        assert_eq!(ranges.len(), num_units);
        // Units cover 0..n contiguously with no overlap.
        let mut cursor = 0usize;
        for &(offset, len) in &ranges {
            assert_eq!(offset, cursor, "gap or overlap at n={} units={}", n, num_units);
            cursor += len;
        }
        assert_eq!(cursor, n, "lost elements at n={} units={}", n, num_units);
        // Every nonzero unit except the last nonzero one is granularity-aligned.
        let last_nonzero = ranges.iter().rposition(|&(_, len)| len > 0);
        if let Some(last) = last_nonzero {
            for (i, &(_, len)) in ranges.iter().enumerate() {
                if len > 0 && i != last {
                    assert_eq!(len % granularity, 0, "unaligned unit {} for n={}", i, n);
                }
            }
        }
        // Zero units only trail nonzero ones.
        if let Some(last) = last_nonzero {
            assert!(ranges[..last].iter().all(|&(_, len)| len > 0));
        }
    }

    #[test]
    fn test_split_invariants_over_grid() {
        for &granularity in &[1usize, 16, 64, 256] {
            for &num_units in &[1usize, 2, 3, 4, 7, 8, 32] {
                for &n in &[
                    0usize,
                    1,
                    63,
                    64,
                    65,
                    255,
                    256,
                    1000,
                    4096,
                    1 << 18,
                    (1 << 18) + 52,
                ] {
                    check_invariants(n, num_units, granularity);
                }
            }
        }
    }

    #[test]
    fn test_small_transfer_leaves_trailing_zero_units() {
        // 64 elements over 4 units at granularity 64: only unit 0 works.
        let ranges = split_elements(64, 4, 64);
        assert_eq!(ranges[0], (0, 64));
        assert!(ranges[1..].iter().all(|&(_, len)| len == 0));
    }

    #[test]
    fn test_even_split() {
        let ranges = split_elements(1024, 4, 64);
        assert!(ranges.iter().all(|&(_, len)| len == 256));
    }

    #[test]
    fn test_uneven_tail_absorbed_by_last_unit() {
        let ranges = split_elements(130, 2, 64);
        assert_eq!(ranges[0].1 + ranges[1].1, 130);
        assert_eq!(ranges[0].1 % 64, 0);
    }
}
