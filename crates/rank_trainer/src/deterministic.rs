//! Deterministic utilities for reproducible training
//!
//! A seeded LCG drives the train/test split and the YetiRank noise, and split
//! ties are broken by a total order, so a fixed seed always yields the same
//! model bytes.

use std::num::Wrapping;

/// Linear Congruential Generator for deterministic pseudo-randomness
/// Uses constants from Numerical Recipes (glibc)
#[derive(Clone, Debug)]
pub struct LcgRng {
    state: Wrapping<i64>,
}

impl LcgRng {
    const MULTIPLIER: i64 = 1103515245;
    const INCREMENT: i64 = 12345;
    const MODULUS: i64 = 1 << 31;

    pub fn new(seed: u64) -> Self {
        Self {
            state: Wrapping((seed % Self::MODULUS as u64) as i64),
        }
    }

    /// Next value in `[0, 2^31)`
    pub fn next_i64(&mut self) -> i64 {
        self.state = self.state * Wrapping(Self::MULTIPLIER) + Wrapping(Self::INCREMENT);
        self.state.0 & (Self::MODULUS - 1)
    }

    /// Next value in `[0, max)`
    pub fn next_range(&mut self, max: usize) -> usize {
        if max == 0 {
            return 0;
        }
        // multiply-shift keeps the high bits; the low bits of an LCG cycle quickly
        ((self.next_i64() as u128 * max as u128) >> 31) as usize
    }

    /// Uniform float strictly inside `(0, 1)`
    pub fn next_f64(&mut self) -> f64 {
        (self.next_i64() as f64 + 0.5) / Self::MODULUS as f64
    }

    /// Standard logistic noise
    pub fn next_logistic(&mut self) -> f64 {
        let u = self.next_f64();
        (u / (1.0 - u)).ln()
    }

    /// Fisher-Yates shuffle
    pub fn shuffle<T>(&mut self, items: &mut [T]) {
        for i in (1..items.len()).rev() {
            let j = self.next_range(i + 1);
            items.swap(i, j);
        }
    }
}

/// Deterministic tie-breaker for split selection
/// Orders candidates by (feature_idx, border_idx, node_id)
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord)]
pub struct SplitTieBreaker {
    pub feature_idx: usize,
    pub border_idx: usize,
    pub node_id: usize,
}

impl SplitTieBreaker {
    pub fn new(feature_idx: usize, border_idx: usize, node_id: usize) -> Self {
        Self {
            feature_idx,
            border_idx,
            node_id,
        }
    }
}
