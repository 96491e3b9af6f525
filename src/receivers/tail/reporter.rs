// SPDX-License-Identifier: Apache-2.0

//! Throttle for repeated failure logs.
//!
//! A category is only reported once it has failed more than `threshold`
//! times in a row and at least `cooldown` has passed since it was last
//! reported. Reporting restarts the cooldown but keeps the counter, so a
//! failure that never clears keeps surfacing once per cooldown.
//!
//! Callers key categories by path as well as failure kind, so a success on
//! one file never clears the counter of another.

use std::collections::HashMap;
use std::hash::Hash;
use std::time::Duration;

use tokio::time::Instant;

#[derive(Debug, Default)]
struct CategoryState {
    failures: u64,
    last_report: Option<Instant>,
}

#[derive(Debug)]
pub struct RateLimitedReporter<C> {
    threshold: u64,
    cooldown: Duration,
    categories: HashMap<C, CategoryState>,
}

impl<C: Eq + Hash> RateLimitedReporter<C> {
    pub fn new(threshold: u64, cooldown: Duration) -> Self {
        Self {
            threshold,
            cooldown,
            categories: HashMap::new(),
        }
    }

    /// Record a failure and decide whether it should be logged.
    pub fn should_report(&mut self, category: C) -> bool {
        let now = Instant::now();
        let state = self.categories.entry(category).or_default();
        state.failures = state.failures.saturating_add(1);

        if state.failures <= self.threshold {
            return false;
        }

        let cooled_down = state
            .last_report
            .is_none_or(|last| now.duration_since(last) >= self.cooldown);
        if cooled_down {
            state.last_report = Some(now);
        }
        cooled_down
    }

    /// Clear the failure counter after a success.
    pub fn reset(&mut self, category: &C) {
        if let Some(state) = self.categories.get_mut(category) {
            state.failures = 0;
        }
    }

    /// Consecutive failures recorded for `category`
    pub fn failures(&self, category: &C) -> u64 {
        self.categories
            .get(category)
            .map(|s| s.failures)
            .unwrap_or(0)
    }
}
