//! Fixed little-endian wire records for count negotiation.

use bytemuck::{Pod, Zeroable};
use static_assertions::const_assert_eq;
use std::mem::size_of;

pub fn cast_slice<T: Pod>(v: &[T]) -> &[u8] {
    bytemuck::cast_slice(v)
}

pub fn expect_exact_len(actual: usize, expected: usize) -> Result<(), String> {
    if actual == expected {
        Ok(())
    } else {
        Err(format!("expected {expected} bytes, got {actual}"))
    }
}

/// One item count. Stored pre-LE with `.to_le()`, decoded with `.from_le()`.
#[repr(transparent)]
#[derive(Copy, Clone, Debug, Pod, Zeroable, PartialEq, Eq)]
pub struct WireCount {
    pub n_le: u64,
}

impl WireCount {
    pub const SIZE: usize = 8;

    pub fn new(n: u64) -> Self {
        Self { n_le: n.to_le() }
    }
    pub fn get(&self) -> u64 {
        u64::from_le(self.n_le)
    }
}

const_assert_eq!(size_of::<WireCount>(), WireCount::SIZE);

/// Encode `counts` as a run of [`WireCount`] records.
pub fn encode_counts(counts: &[u64]) -> Vec<u8> {
    let wire: Vec<WireCount> = counts.iter().map(|&c| WireCount::new(c)).collect();
    cast_slice(&wire).to_vec()
}

/// Decode a run of [`WireCount`] records. The input buffer need not be aligned.
pub fn decode_counts(bytes: &[u8]) -> Result<Vec<u64>, String> {
    if bytes.len() % WireCount::SIZE != 0 {
        return Err(format!(
            "{} bytes is not a whole number of {}-byte counts",
            bytes.len(),
            WireCount::SIZE
        ));
    }
    Ok(bytes
        .chunks_exact(WireCount::SIZE)
        .map(|chunk| bytemuck::pod_read_unaligned::<WireCount>(chunk).get())
        .collect())
}

/// Encode `counts` behind a status word: `0` for a healthy sender,
/// `origin + 1` when the sender carries a failure that started at `origin`.
pub fn encode_status(origin: Option<usize>, counts: &[u64]) -> Vec<u8> {
    let status = origin.map_or(0, |o| o as u64 + 1);
    let mut words = Vec::with_capacity(counts.len() + 1);
    words.push(status);
    words.extend_from_slice(counts);
    encode_counts(&words)
}

/// Decode a status-prefixed run of exactly `n` counts. Returns the failure
/// origin, if any, and the counts.
pub fn decode_status(bytes: &[u8], n: usize) -> Result<(Option<usize>, Vec<u64>), String> {
    expect_exact_len(bytes.len(), (n + 1) * WireCount::SIZE)?;
    let mut words = decode_counts(bytes)?;
    let status = words.remove(0);
    let origin = match status {
        0 => None,
        s => Some(usize::try_from(s - 1).map_err(|_| format!("bad status word {s}"))?),
    };
    Ok((origin, words))
}
