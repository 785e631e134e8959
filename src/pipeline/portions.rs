//! Portion sizing. A portion is what other systems call a batch: the number of recipe sets one
//! generator job produces.
//!
//! Portions start at the minimum and grow by the growth factor each time one is handed out, so
//! loaders get work early instead of idling behind one huge first portion.

use crate::utils::config::PortionConsts;

#[derive(Clone, Debug)]
pub struct PortionGenerator {
    target: u64,
    min_batch_size: u64,
    max_batch_size: u64,
    next_batch_size: u64,
    growth_factor: f64,
    batch_size: u64,
}

impl PortionGenerator {
    pub fn new(target: u64, min_batch_size: u64, max_batch_size: u64) -> Self {
        Self::with_growth_factor(
            target,
            min_batch_size,
            max_batch_size,
            PortionConsts::GROWTH_FACTOR,
        )
    }

    pub fn with_growth_factor(
        target: u64,
        min_batch_size: u64,
        max_batch_size: u64,
        growth_factor: f64,
    ) -> Self {
        Self {
            target,
            min_batch_size,
            max_batch_size,
            next_batch_size: min_batch_size,
            growth_factor,
            batch_size: 0,
        }
    }

    pub fn target(&self) -> u64 {
        self.target
    }

    pub fn min_batch_size(&self) -> u64 {
        self.min_batch_size
    }

    pub fn max_batch_size(&self) -> u64 {
        self.max_batch_size
    }

    /// Size the next call to [`next_batch`](Self::next_batch) would use, before capping.
    pub fn next_batch_size(&self) -> u64 {
        self.next_batch_size
    }

    /// Size returned by the last call to [`next_batch`](Self::next_batch).
    pub fn batch_size(&self) -> u64 {
        self.batch_size
    }

    /// Sets still missing; negative once the target is overshot.
    pub fn gap(&self, sets_created_so_far: u64) -> i128 {
        i128::from(self.target) - i128::from(sets_created_so_far)
    }

    pub fn done(&self, sets_created_so_far: u64) -> bool {
        self.gap(sets_created_so_far) <= 0
    }

    /// `max(0, min(gap, next_batch_size, max_batch_size))`, then grow `next_batch_size`.
    ///
    /// The caller owns the count of sets created so far: it knows about failures and jobs
    /// still in flight.
    pub fn next_batch(&mut self, sets_created_so_far: u64) -> u64 {
        let gap = self.gap(sets_created_so_far).max(0);
        let capped = gap
            .min(i128::from(self.next_batch_size))
            .min(i128::from(self.max_batch_size));
        self.batch_size = u64::try_from(capped).unwrap_or(0);
        self.next_batch_size = (self.next_batch_size as f64 * self.growth_factor) as u64;
        self.batch_size
    }
}
