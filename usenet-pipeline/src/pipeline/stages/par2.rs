//! Automatic PAR2 slice size and redundancy.
//!
//! Bigger posts get more slices but proportionally less redundancy. The raw
//! slice size is snapped to a power-of-two bucket and then rounded up to a
//! whole number of articles, so every slice maps onto complete articles.

use std::sync::LazyLock;

use regex::Regex;

use crate::{Error, Result};

const KIB: u64 = 1024;
const MIB: u64 = 1024 * KIB;
const GIB: u64 = 1024 * MIB;

/// Allowed slice sizes before article alignment.
const SLICE_BUCKETS: [u64; 8] = [
    64 * KIB,
    128 * KIB,
    256 * KIB,
    512 * KIB,
    MIB,
    2 * MIB,
    4 * MIB,
    8 * MIB,
];

/// `(exclusive upper bound, target slice count, redundancy %)`.
const TIERS: [(u64, u64, u32); 5] = [
    (2 * GIB, 8000, 18),
    (10 * GIB, 15000, 12),
    (50 * GIB, 20000, 10),
    (200 * GIB, 25000, 7),
    (500 * GIB, 20000, 5),
];
const LAST_TIER: (u64, u32) = (18000, 2);

static ARTICLE_SIZE_RE: LazyLock<Option<Regex>> =
    LazyLock::new(|| Regex::new(r"^(\d+(?:\.\d+)?)([kKmM]?)$").ok());

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ParParameters {
    pub slice_size: u64,
    pub redundancy_percent: u32,
}

impl ParParameters {
    /// `-s` value, in bytes.
    pub fn slice_arg(&self) -> String {
        format!("{}b", self.slice_size)
    }

    /// `-r` value.
    pub fn redundancy_arg(&self) -> String {
        format!("{}%", self.redundancy_percent)
    }
}

/// Parse an article size such as `700K`, `0.5M` or `768000`. Fractional
/// sizes are rounded to the nearest byte.
pub fn parse_article_size(input: &str) -> Result<u64> {
    let invalid = || Error::validation(format!("Invalid article size: {input:?}"));

    let captures = ARTICLE_SIZE_RE
        .as_ref()
        .and_then(|re| re.captures(input.trim()))
        .ok_or_else(invalid)?;
    let multiplier = match captures.get(2).map(|m| m.as_str()) {
        Some("k" | "K") => KIB,
        Some("m" | "M") => MIB,
        _ => 1,
    };

    let value: f64 = captures[1].parse().map_err(|_| invalid())?;
    let bytes = (value * multiplier as f64).round();
    if !bytes.is_finite() || bytes >= u64::MAX as f64 {
        return Err(invalid());
    }
    if bytes < 1.0 {
        return Err(Error::validation("Article size must be greater than zero"));
    }
    Ok(bytes as u64)
}

/// Target slice count and redundancy for a payload size.
pub fn tier_for(total_bytes: u64) -> (u64, u32) {
    TIERS
        .iter()
        .find(|(limit, _, _)| total_bytes < *limit)
        .map(|&(_, slices, redundancy)| (slices, redundancy))
        .unwrap_or(LAST_TIER)
}

/// Closest bucket; a tie goes to the smaller bucket.
pub fn nearest_bucket(raw_slice: u64) -> u64 {
    let mut best = SLICE_BUCKETS[0];
    for &bucket in &SLICE_BUCKETS[1..] {
        if bucket.abs_diff(raw_slice) < best.abs_diff(raw_slice) {
            best = bucket;
        }
    }
    best
}

/// Round up to a whole multiple of the article size.
pub fn align_to_article(slice: u64, article_size: u64) -> u64 {
    if article_size == 0 {
        return slice;
    }
    slice.div_ceil(article_size).max(1) * article_size
}

pub fn compute_parameters(total_bytes: u64, article_size: &str) -> Result<ParParameters> {
    let article = parse_article_size(article_size)?;
    let (target_slices, redundancy_percent) = tier_for(total_bytes);
    let raw_slice = total_bytes / target_slices;
    let slice_size = align_to_article(nearest_bucket(raw_slice), article);

    Ok(ParParameters {
        slice_size,
        redundancy_percent,
    })
}
