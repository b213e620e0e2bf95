//! Parser for the transfer-list text format.
//!
//! One line describes one test: `T (SRC EXE DST #SubExecs) ...` with `T`
//! groups following. A negative `T` switches to advanced mode, where each
//! group carries an explicit byte count with an optional K/M/G suffix:
//! `-T (SRC EXE DST #SubExecs #Bytes) ...`. Round brackets and `->` arrows
//! are cosmetic. SRC/DST are one or more `<kind-char><index>` pairs
//! (multiple sources are summed into the destination); `N` marks an absent
//! side. Lines whose first token is not a number (comments, blanks) yield an
//! empty list.

use crate::core::types::{ExeKey, ExeKind, MemKind, MemLoc};
use crate::core::transfer::Transfer;
use crate::error::{EngineError, Result};

/// Parse a byte count with an optional K/M/G suffix.
pub fn parse_byte_count(token: &str) -> Result<usize> {
    let token = token.trim();
    let (digits, mult) = match token.chars().last() {
        Some('K') | Some('k') => (&token[..token.len() - 1], 1usize << 10),
        Some('M') | Some('m') => (&token[..token.len() - 1], 1 << 20),
        Some('G') | Some('g') => (&token[..token.len() - 1], 1 << 30),
        _ => (token, 1),
    };
    let value: usize = digits.parse().map_err(|_| EngineError::BadToken {
        what: "byte count",
        token: token.to_string(),
    })?;
    Ok(value * mult)
}

fn check_index(kind_is_cpu: bool, index: usize, num_cpus: usize, num_gpus: usize) -> Result<()> {
    let (device, max) = if kind_is_cpu {
        ("CPU", num_cpus)
    } else {
        ("GPU", num_gpus)
    };
    if index >= max {
        return Err(EngineError::IndexOutOfRange {
            device,
            got: index as i64,
            max: max as i64 - 1,
        });
    }
    Ok(())
}

/// Parse a memory token such as `C0`, `G1G2` or `N0` into its locations.
/// `Null` entries are consumed but produce no location.
fn parse_mem_list(token: &str, num_cpus: usize, num_gpus: usize) -> Result<Vec<MemLoc>> {
    let mut locs = Vec::new();
    let mut chars = token.chars().peekable();
    let mut found = false;
    while let Some(c) = chars.next() {
        if c.is_whitespace() {
            continue;
        }
        let kind = MemKind::from_char(c).map_err(|_| EngineError::BadToken {
            what: "memory",
            token: token.to_string(),
        })?;
        let mut digits = String::new();
        while let Some(d) = chars.peek() {
            if d.is_ascii_digit() {
                digits.push(*d);
                chars.next();
            } else {
                break;
            }
        }
        let index: usize = digits.parse().map_err(|_| EngineError::BadToken {
            what: "memory",
            token: token.to_string(),
        })?;
        found = true;
        if kind == MemKind::Null {
            continue;
        }
        check_index(kind.is_cpu(), index, num_cpus, num_gpus)?;
        locs.push(MemLoc::new(kind, index));
    }
    if !found {
        return Err(EngineError::BadToken {
            what: "memory",
            token: token.to_string(),
        });
    }
    Ok(locs)
}

fn parse_exe(token: &str, num_cpus: usize, num_gpus: usize) -> Result<ExeKey> {
    let token = token.trim();
    let mut chars = token.chars();
    let kind = chars
        .next()
        .ok_or(EngineError::BadToken {
            what: "executor",
            token: token.to_string(),
        })
        .and_then(ExeKind::from_char)
        .map_err(|_| EngineError::BadToken {
            what: "executor",
            token: token.to_string(),
        })?;
    let index: usize = chars.as_str().parse().map_err(|_| EngineError::BadToken {
        what: "executor",
        token: token.to_string(),
    })?;
    check_index(kind.is_cpu(), index, num_cpus, num_gpus)?;
    Ok(ExeKey::new(kind, index))
}

/// Parse one line of the transfer-list format. Comment and blank lines
/// return an empty list; malformed transfer groups are configuration errors.
pub fn parse_transfer_line(
    line: &str,
    num_cpus: usize,
    num_gpus: usize,
) -> Result<Vec<Transfer>> {
    // Strip cosmetic brackets and arrows, preserving a leading minus sign.
    let mut cleaned = String::with_capacity(line.len());
    for (i, c) in line.chars().enumerate() {
        if i > 0 && matches!(c, '(' | ')' | '-' | '>') {
            cleaned.push(' ');
        } else {
            cleaned.push(c);
        }
    }

    let mut tokens = cleaned.split_whitespace();
    let count: i64 = match tokens.next().and_then(|t| t.parse().ok()) {
        Some(v) => v,
        None => return Ok(Vec::new()),
    };
    let advanced = count < 0;
    let count = count.unsigned_abs() as usize;

    let mut transfers = Vec::with_capacity(count);
    for group in 0..count {
        let mut next = |what: &'static str| {
            tokens.next().ok_or(EngineError::BadToken {
                what,
                token: format!("transfer {} of line '{}'", group + 1, line.trim()),
            })
        };
        let src_tok = next("source")?;
        let exe_tok = next("executor")?;
        let dst_tok = next("destination")?;
        let se_tok = next("sub-executor count")?;

        let num_sub_execs: usize = se_tok.parse().map_err(|_| EngineError::BadToken {
            what: "sub-executor count",
            token: se_tok.to_string(),
        })?;

        let srcs = parse_mem_list(src_tok, num_cpus, num_gpus)?;
        let exe = parse_exe(exe_tok, num_cpus, num_gpus)?;
        let dsts = parse_mem_list(dst_tok, num_cpus, num_gpus)?;

        let mut transfer = Transfer::new(srcs, exe, dsts, num_sub_execs)?;
        if advanced {
            let bytes_tok = next("byte count")?;
            transfer.requested_bytes = parse_byte_count(bytes_tok)?;
        }
        transfers.push(transfer);
    }
    Ok(transfers)
}

/// True for lines the report should echo verbatim (two comment markers).
pub fn is_echo_comment(line: &str) -> bool {
    line.trim_start().starts_with("##")
}
