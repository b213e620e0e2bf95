//! Validator: reference patterns, source priming, destination checking.
//!
//! Sources are filled with a deterministic reference (a user-supplied
//! repeating pattern, or an index-derived value unique per source slot) and
//! immediately re-read to catch placement failures before any timing. The
//! expected destination content is the elementwise sum of all source
//! references, or the fill byte pattern for a source-less transfer.

use rayon::prelude::*;

use crate::core::config::RunConfig;
use crate::core::transfer::Transfer;
use crate::error::{EngineError, Result};
use crate::runtime::agent::fill_value;
use crate::runtime::memory::MemoryPool;

/// Index-derived reference value, unique per source slot.
pub fn src_value(src_idx: usize, elem_idx: usize) -> f32 {
    ((elem_idx + 31 * src_idx) % 383) as f32
}

/// Reference content for source slot `src_idx` of a transfer.
pub fn build_src_reference(cfg: &RunConfig, src_idx: usize, n: usize) -> Vec<f32> {
    if cfg.fill_pattern.is_empty() {
        (0..n).map(|i| src_value(src_idx, i)).collect()
    } else {
        let pattern = &cfg.fill_pattern;
        (0..n).map(|i| pattern[i % pattern.len()]).collect()
    }
}

/// Expected destination content: sum of all source references, or the fill
/// value for a pure fill.
pub fn build_dst_reference(cfg: &RunConfig, num_srcs: usize, n: usize) -> Vec<f32> {
    if num_srcs == 0 {
        return vec![fill_value(); n];
    }
    let mut expected = build_src_reference(cfg, 0, n);
    for src_idx in 1..num_srcs {
        let next = build_src_reference(cfg, src_idx, n);
        expected
            .par_iter_mut()
            .zip(next.par_iter())
            .for_each(|(e, v)| *e += v);
    }
    expected
}

unsafe fn buffer_slice<'a>(
    pool: &dyn MemoryPool,
    id: crate::runtime::memory::BufferId,
    offset: usize,
    n: usize,
) -> Result<&'a mut [f32]> {
    let base = pool.base_ptr(id)?;
    Ok(std::slice::from_raw_parts_mut(base.0.add(offset), n))
}

fn mismatch_error(
    transfer: &Transfer,
    side: &str,
    buf_idx: usize,
    elem_idx: usize,
    actual: f32,
    expected: f32,
) -> EngineError {
    EngineError::Validation(format!(
        "unexpected mismatch at index {} of {} array {}: \
         actual {:.5} [{:08X}] expected {:.5} [{:08X}] | transfer #{}: {}",
        elem_idx,
        side,
        buf_idx,
        actual,
        actual.to_bits(),
        expected,
        expected.to_bits(),
        transfer.index,
        transfer.descriptor()
    ))
}

/// Fill every source buffer with its reference pattern and re-read it to
/// confirm the data actually landed, before any iteration is timed.
pub fn prepare_src(cfg: &RunConfig, transfer: &Transfer, pool: &dyn MemoryPool) -> Result<()> {
    let n = transfer.resolved_bytes / 4;
    let offset = cfg.init_offset_elems();
    for (src_idx, &buf) in transfer.src_bufs.iter().enumerate() {
        let reference = build_src_reference(cfg, src_idx, n);
        let slice = unsafe { buffer_slice(pool, buf, offset, n)? };
        slice.copy_from_slice(&reference);

        let readback = unsafe { buffer_slice(pool, buf, offset, n)? };
        for (i, (&actual, &expected)) in readback.iter().zip(reference.iter()).enumerate() {
            if actual.to_bits() != expected.to_bits() {
                return Err(mismatch_error(
                    transfer, "source", src_idx, i, actual, expected,
                ));
            }
        }
    }
    Ok(())
}

/// Compare every destination buffer against the expected reference.
pub fn validate_dst(cfg: &RunConfig, transfer: &Transfer, pool: &dyn MemoryPool) -> Result<()> {
    if transfer.dst_bufs.is_empty() {
        return Ok(());
    }
    let n = transfer.resolved_bytes / 4;
    let offset = cfg.init_offset_elems();
    let expected = build_dst_reference(cfg, transfer.srcs.len(), n);
    for (dst_idx, &buf) in transfer.dst_bufs.iter().enumerate() {
        let actual = unsafe { buffer_slice(pool, buf, offset, n)? };
        for (i, (&got, &want)) in actual.iter().zip(expected.iter()).enumerate() {
            if got.to_bits() != want.to_bits() {
                return Err(mismatch_error(
                    transfer, "destination", dst_idx, i, got, want,
                ));
            }
        }
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_src_value_unique_per_slot() {
        assert_ne!(src_value(0, 5), src_value(1, 5));
        assert_eq!(src_value(2, 7), src_value(2, 7));
    }

    #[test]
    fn test_dst_reference_sums_sources() {
        let cfg = RunConfig::default();
        let a = build_src_reference(&cfg, 0, 100);
        let b = build_src_reference(&cfg, 1, 100);
        let sum = build_dst_reference(&cfg, 2, 100);
        for i in 0..100 {
            assert_eq!(sum[i], a[i] + b[i]);
        }
    }

    #[test]
    fn test_dst_reference_for_fill() {
        let cfg = RunConfig::default();
        let expected = build_dst_reference(&cfg, 0, 16);
        assert!(expected
            .iter()
            .all(|v| v.to_bits() == fill_value().to_bits()));
    }

    #[test]
    fn test_user_pattern_repeats() {
        let cfg = RunConfig {
            fill_pattern: vec![1.0, 2.0, 3.0],
            ..RunConfig::default()
        };
        let r = build_src_reference(&cfg, 0, 7);
        assert_eq!(r, vec![1.0, 2.0, 3.0, 1.0, 2.0, 3.0, 1.0]);
    }
}
