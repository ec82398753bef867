//! Masked byte-pattern search.
//!
//! A pattern is a byte string plus a mask of the same length: `'x'` means
//! the byte must match exactly, any other character is a wildcard.
//! Regions smaller than the block size are read in one go; larger ones are
//! walked block by block, each read extended by the pattern length so a
//! match straddling a block boundary is still seen.

use std::str::FromStr;

use log::Level;
use thiserror::Error;

use crate::memdrv_log;

#[derive(Debug, Error, PartialEq, Eq)]
pub enum SignatureError {
    #[error("signature is empty")]
    Empty,

    #[error("invalid signature token '{0}'")]
    InvalidToken(String),
}

/// Bytes plus mask, parsed from text like `"48 8B ?? 05"`.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Signature {
    pub bytes: Vec<u8>,
    pub mask: String,
}

impl Signature {
    pub fn parse(text: &str) -> Result<Self, SignatureError> {
        let mut bytes = Vec::new();
        let mut mask = String::new();
        for token in text.split_whitespace() {
            if token.chars().all(|c| c == '?') && token.len() <= 2 {
                bytes.push(0);
                mask.push('?');
                continue;
            }
            if token.len() != 2 {
                return Err(SignatureError::InvalidToken(token.to_owned()));
            }
            let byte = u8::from_str_radix(token, 16)
                .map_err(|_| SignatureError::InvalidToken(token.to_owned()))?;
            bytes.push(byte);
            mask.push('x');
        }
        if bytes.is_empty() {
            return Err(SignatureError::Empty);
        }
        Ok(Self { bytes, mask })
    }
}

impl FromStr for Signature {
    type Err = SignatureError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Self::parse(s)
    }
}

/// Does `pattern` match `data` at `at`? Caller keeps the window in bounds.
fn matches_at(data: &[u8], at: usize, pattern: &[u8], exact: &[bool]) -> bool {
    pattern
        .iter()
        .zip(exact)
        .enumerate()
        .all(|(i, (&b, &must))| !must || data[at + i] == b)
}

/// First index in `data[..limit]` where the pattern fits and matches,
/// stepping by `step`.
fn find_in(data: &[u8], limit: usize, step: usize, pattern: &[u8], exact: &[bool]) -> Option<usize> {
    let last = data.len().checked_sub(pattern.len())?;
    (0..limit.min(last + 1))
        .step_by(step)
        .find(|&i| matches_at(data, i, pattern, exact))
}

/// Search `[start, start + size)`.
///
/// `read(address, len)` fetches bytes; `None` aborts the scan. Candidates
/// are positions where the whole pattern lies inside the region. In the
/// small regime every offset is a candidate; in the block regime each
/// block is stepped by `alignment`.
pub fn scan_region<R>(
    mut read: R,
    start: u64,
    size: u64,
    pattern: &[u8],
    mask: &str,
    alignment: usize,
    block_size: u64,
) -> Option<u64>
where
    R: FnMut(u64, usize) -> Option<Vec<u8>>,
{
    let exact: Vec<bool> = mask.chars().map(|c| c == 'x').collect();
    if exact.len() != pattern.len() {
        memdrv_log!(
            Level::Warn,
            "memory",
            "mask length {} does not match pattern length {}",
            exact.len(),
            pattern.len()
        );
        return None;
    }
    let pattern_len = pattern.len() as u64;
    if pattern.is_empty() || size < pattern_len {
        return None;
    }

    if size < block_size {
        let len = usize::try_from(size).ok()?;
        let data = read(start, len)?;
        return find_in(&data, data.len(), 1, pattern, &exact).map(|i| start + i as u64);
    }

    let step = alignment.max(1);
    let block_size = block_size.max(1);
    let mut offset = 0u64;
    while offset < size {
        let remaining = size - offset;
        let block_len = block_size.min(remaining);
        let read_len = usize::try_from((block_len + pattern_len).min(remaining)).ok()?;
        let data = read(start + offset, read_len)?;
        let limit = usize::try_from(block_len).ok()?;
        if let Some(i) = find_in(&data, limit, step, pattern, &exact) {
            return Some(start + offset + i as u64);
        }
        offset += block_len;
    }
    None
}

#[cfg(test)]
mod tests {
    use super::*;

    fn reader(base: u64, mem: &[u8]) -> impl FnMut(u64, usize) -> Option<Vec<u8>> + '_ {
        move |addr, len| {
            let from = (addr - base) as usize;
            mem.get(from..from + len).map(<[u8]>::to_vec)
        }
    }

    #[test]
    fn parses_wildcards_and_hex() {
        let sig = Signature::parse("48 8B ?? 05 ?").unwrap();
        assert_eq!(sig.bytes, vec![0x48, 0x8B, 0x00, 0x05, 0x00]);
        assert_eq!(sig.mask, "xx?x?");
        assert_eq!("".parse::<Signature>(), Err(SignatureError::Empty));
        assert_eq!(Signature::parse("4G"), Err(SignatureError::InvalidToken("4G".into())));
        assert!(Signature::parse("123").is_err());
    }

    #[test]
    fn small_region_finds_wildcard_match() {
        let mem = [0x00, 0xAA, 0xBB, 0x00];
        let hit = scan_region(reader(0x1000, &mem), 0x1000, 4, &[0xAA, 0x00], "x?", 1, 64);
        assert_eq!(hit, Some(0x1001));
    }

    #[test]
    fn small_region_never_reads_past_the_end() {
        // Only a partial match at the tail.
        let mem = [0x00, 0x00, 0x00, 0xAA];
        let hit = scan_region(reader(0x1000, &mem), 0x1000, 4, &[0xAA, 0xBB], "xx", 1, 64);
        assert_eq!(hit, None);
    }

    #[test]
    fn mask_mismatch_returns_none_without_reading() {
        let mut reads = 0;
        let hit = scan_region(
            |_, _| {
                reads += 1;
                None
            },
            0x1000,
            16,
            &[1, 2],
            "x",
            1,
            64,
        );
        assert_eq!(hit, None);
        assert_eq!(reads, 0);
    }

    #[test]
    fn block_regime_sees_matches_straddling_blocks() {
        let mut mem = vec![0u8; 64];
        mem[14..18].copy_from_slice(&[0xDE, 0xAD, 0xBE, 0xEF]);
        let hit = scan_region(reader(0x2000, &mem), 0x2000, 64, &[0xDE, 0xAD, 0xBE, 0xEF], "xxxx", 1, 16);
        assert_eq!(hit, Some(0x2000 + 14));
    }

    #[test]
    fn block_regime_honors_alignment() {
        let mut mem = vec![0u8; 64];
        mem[5] = 0x77;
        mem[40] = 0x77;
        let hit = scan_region(reader(0, &mem), 0, 64, &[0x77], "x", 8, 16);
        assert_eq!(hit, Some(40));
    }

    #[test]
    fn block_regime_aborts_on_failed_read() {
        let mut calls = 0;
        let hit = scan_region(
            |_, len| {
                calls += 1;
                (calls == 1).then(|| vec![0u8; len])
            },
            0,
            64,
            &[0x01],
            "x",
            1,
            16,
        );
        assert_eq!(hit, None);
        assert_eq!(calls, 2);
    }
}
