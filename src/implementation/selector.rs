// Copyright 2020 Xavier Gillard
//
// Permission is hereby granted, free of charge, to any person obtaining a copy of
// this software and associated documentation files (the "Software"), to deal in
// the Software without restriction, including without limitation the rights to
// use, copy, modify, merge, publish, distribute, sublicense, and/or sell copies of
// the Software, and to permit persons to whom the Software is furnished to do so,
// subject to the following conditions:
//
// The above copyright notice and this permission notice shall be included in all
// copies or substantial portions of the Software.
//
// THE SOFTWARE IS PROVIDED "AS IS", WITHOUT WARRANTY OF ANY KIND, EXPRESS OR
// IMPLIED, INCLUDING BUT NOT LIMITED TO THE WARRANTIES OF MERCHANTABILITY, FITNESS
// FOR A PARTICULAR PURPOSE AND NONINFRINGEMENT. IN NO EVENT SHALL THE AUTHORS OR
// COPYRIGHT HOLDERS BE LIABLE FOR ANY CLAIM, DAMAGES OR OTHER LIABILITY, WHETHER
// IN AN ACTION OF CONTRACT, TORT OR OTHERWISE, ARISING FROM, OUT OF OR IN
// CONNECTION WITH THE SOFTWARE OR THE USE OR OTHER DEALINGS IN THE SOFTWARE.

//! This module provides the method selector: the policy object that picks the
//! next method from a subset of the method pool. Each scheduler owns one
//! selector per method class (construction, local improvement, shaking) and
//! -- for the parallel schedulers -- per worker.

use rand::rngs::StdRng;
use rand::Rng;

use crate::MethodStats;

/// The floor applied to adaptive selection weights so that no method ever
/// starves completely.
const MIN_WEIGHT: f64 = 1e-3;

// ----------------------------------------------------------------------------
// --- SELECTION STRATEGY -----------------------------------------------------
// ----------------------------------------------------------------------------

/// The closed set of selection strategies (the `schlisel` / `schshasel`
/// parameters).
#[derive(Debug, Clone, Copy, Eq, PartialEq, Hash)]
pub enum SelectionStrategy {
    /// Cycle through the list in order, wrapping around at the end.
    SequentialRep,
    /// Return each method once in order, then `None`.
    SequentialOnce,
    /// Uniform random selection with replacement.
    RandomRep,
    /// Uniform random selection without replacement, then `None`.
    RandomOnce,
    /// Weighted random selection; weights adapt with observed success.
    SelfAdaptive,
    /// Weighted random selection with weights inversely proportional to the
    /// time accumulated by each method, floor-clipped to avoid starvation.
    TimeAdaptive,
}

impl SelectionStrategy {
    /// Decodes the numeric parameter value {0..5}.
    pub fn from_level(level: u8) -> Option<Self> {
        match level {
            0 => Some(SelectionStrategy::SequentialRep),
            1 => Some(SelectionStrategy::SequentialOnce),
            2 => Some(SelectionStrategy::RandomRep),
            3 => Some(SelectionStrategy::RandomOnce),
            4 => Some(SelectionStrategy::SelfAdaptive),
            5 => Some(SelectionStrategy::TimeAdaptive),
            _ => None,
        }
    }

    /// The numeric parameter value of this strategy.
    pub fn level(self) -> u8 {
        match self {
            SelectionStrategy::SequentialRep => 0,
            SelectionStrategy::SequentialOnce => 1,
            SelectionStrategy::RandomRep => 2,
            SelectionStrategy::RandomOnce => 3,
            SelectionStrategy::SelfAdaptive => 4,
            SelectionStrategy::TimeAdaptive => 5,
        }
    }
}

// ----------------------------------------------------------------------------
// --- METHOD SELECTOR --------------------------------------------------------
// ----------------------------------------------------------------------------

/// A selector over an ordered subset of the method pool.
///
/// Besides picking methods according to its strategy, a selector remembers
/// which methods were flagged as unproductive for the *current* solution
/// (see [Self::do_not_reconsider_last]): those are skipped by every strategy
/// until the next full [Self::reset]. It also maintains the per-solution call
/// counter that is exposed to methods through their context.
pub struct MethodSelector {
    strategy: SelectionStrategy,
    /// the method pool indices this selector chooses from, in order
    methods: Vec<usize>,
    /// position (into `methods`) of the last selected entry
    last: Option<usize>,
    /// number of successful selections since the last rewind
    num_selected: usize,
    /// per-position flag: already returned (for the Once strategies)
    used: Vec<bool>,
    /// per-position flag: flagged unproductive for the current solution
    excluded: Vec<bool>,
    /// per-position adaptive weight (SelfAdaptive)
    weights: Vec<f64>,
    /// per-position call counter for the current solution
    calls: Vec<usize>,
}

impl MethodSelector {
    /// Creates an empty selector with the given strategy.
    pub fn new(strategy: SelectionStrategy) -> Self {
        MethodSelector {
            strategy,
            methods: vec![],
            last: None,
            num_selected: 0,
            used: vec![],
            excluded: vec![],
            weights: vec![],
            calls: vec![],
        }
    }

    /// Appends a method pool index to the selectable subset.
    pub fn add(&mut self, pool_index: usize) {
        self.methods.push(pool_index);
        self.used.push(false);
        self.excluded.push(false);
        self.weights.push(1.0);
        self.calls.push(0);
    }

    /// The strategy this selector applies.
    pub fn strategy(&self) -> SelectionStrategy {
        self.strategy
    }

    /// The number of methods in the selectable subset.
    pub fn len(&self) -> usize {
        self.methods.len()
    }

    /// True iff the selectable subset is empty.
    pub fn is_empty(&self) -> bool {
        self.methods.is_empty()
    }

    /// The method pool index selected last, if any.
    pub fn last_method(&self) -> Option<usize> {
        self.last.map(|pos| self.methods[pos])
    }

    /// True iff some method has been selected since the last rewind.
    pub fn has_last_method(&self) -> bool {
        self.last.is_some()
    }

    /// How often the last selected method had been called for the current
    /// solution *before* the ongoing call (i.e., 0 on its first call).
    pub fn call_count_of_last(&self) -> usize {
        self.last.map(|pos| self.calls[pos] - 1).unwrap_or(0)
    }

    /// Tells whether [Self::select] could return yet another method, without
    /// consuming it.
    pub fn has_further_method(&self) -> bool {
        match self.strategy {
            SelectionStrategy::SequentialOnce => {
                let from = self.last.map(|p| p + 1).unwrap_or(0);
                (from..self.methods.len()).any(|p| !self.excluded[p])
            }
            SelectionStrategy::RandomOnce => (0..self.methods.len())
                .any(|p| !self.used[p] && !self.excluded[p]),
            _ => self.excluded.iter().any(|e| !e),
        }
    }

    /// Selects the next method according to the strategy and returns its
    /// method pool index, or `None` when the selector is exhausted (or every
    /// remaining method is excluded for the current solution).
    pub fn select(&mut self, rng: &mut StdRng, stats: &MethodStats) -> Option<usize> {
        let pos = match self.strategy {
            SelectionStrategy::SequentialRep => self.select_sequential(true),
            SelectionStrategy::SequentialOnce => self.select_sequential(false),
            SelectionStrategy::RandomRep => self.select_uniform(rng),
            SelectionStrategy::RandomOnce => self.select_without_replacement(rng),
            SelectionStrategy::SelfAdaptive => {
                let weights = self.weights.clone();
                self.select_weighted(rng, &weights)
            }
            SelectionStrategy::TimeAdaptive => {
                let weights: Vec<f64> = self
                    .methods
                    .iter()
                    .map(|&m| (1.0 / (stats.total_time(m) + MIN_WEIGHT)).max(MIN_WEIGHT))
                    .collect();
                self.select_weighted(rng, &weights)
            }
        }?;
        self.last = Some(pos);
        self.used[pos] = true;
        self.num_selected += 1;
        self.calls[pos] += 1;
        Some(self.methods[pos])
    }

    /// Rewinds the sequential state so that the selection sequence starts
    /// over. A full reset additionally clears the per-solution exclusions and
    /// call counters; it is what the schedulers apply whenever the solution
    /// identity changes.
    pub fn reset(&mut self, full: bool) {
        self.last = None;
        self.num_selected = 0;
        self.used.iter_mut().for_each(|u| *u = false);
        if full {
            self.excluded.iter_mut().for_each(|e| *e = false);
            self.calls.iter_mut().for_each(|c| *c = 0);
        }
    }

    /// Excludes the last selected method until the next full reset: it was
    /// found unproductive for the current solution and reconsidering it would
    /// be wasted work.
    pub fn do_not_reconsider_last(&mut self) {
        if let Some(pos) = self.last {
            self.excluded[pos] = true;
        }
    }

    /// Rewards (or not) the last selected method; only meaningful under the
    /// [SelectionStrategy::SelfAdaptive] strategy where the selection weights
    /// track the observed success of each method.
    pub fn reward_last(&mut self, success: bool) {
        if let Some(pos) = self.last {
            if success {
                self.weights[pos] += 1.0;
            } else {
                self.weights[pos] = (self.weights[pos] * 0.95).max(MIN_WEIGHT);
            }
        }
    }

    // -- strategy internals --------------------------------------------------

    fn select_sequential(&mut self, wrap: bool) -> Option<usize> {
        if self.methods.is_empty() || self.excluded.iter().all(|e| *e) {
            return None;
        }
        let n = self.methods.len();
        let mut pos = self.last.map(|p| p + 1).unwrap_or(0);
        let mut steps = 0;
        loop {
            if pos == n {
                if !wrap {
                    return None;
                }
                pos = 0;
            }
            if !self.excluded[pos] {
                return Some(pos);
            }
            pos += 1;
            steps += 1;
            if steps > n {
                return None;
            }
        }
    }

    fn select_uniform(&mut self, rng: &mut StdRng) -> Option<usize> {
        let eligible: Vec<usize> = (0..self.methods.len())
            .filter(|&p| !self.excluded[p])
            .collect();
        if eligible.is_empty() {
            None
        } else {
            Some(eligible[rng.gen_range(0..eligible.len())])
        }
    }

    fn select_without_replacement(&mut self, rng: &mut StdRng) -> Option<usize> {
        let eligible: Vec<usize> = (0..self.methods.len())
            .filter(|&p| !self.used[p] && !self.excluded[p])
            .collect();
        if eligible.is_empty() {
            None
        } else {
            Some(eligible[rng.gen_range(0..eligible.len())])
        }
    }

    fn select_weighted(&mut self, rng: &mut StdRng, weights: &[f64]) -> Option<usize> {
        let total: f64 = (0..self.methods.len())
            .filter(|&p| !self.excluded[p])
            .map(|p| weights[p].max(MIN_WEIGHT))
            .sum();
        if total <= 0.0 {
            return None;
        }
        let mut ticket = rng.gen::<f64>() * total;
        let mut fallback = None;
        for p in (0..self.methods.len()).filter(|&p| !self.excluded[p]) {
            fallback = Some(p);
            ticket -= weights[p].max(MIN_WEIGHT);
            if ticket <= 0.0 {
                return Some(p);
            }
        }
        fallback
    }
}

// ############################################################################
// #### TESTS #################################################################
// ############################################################################

#[cfg(test)]
mod test_selector {
    use rand::rngs::StdRng;
    use rand::SeedableRng;

    use crate::{MethodSelector, MethodStats, SelectionStrategy};

    fn selector(strategy: SelectionStrategy, n: usize) -> (MethodSelector, StdRng, MethodStats) {
        let mut sel = MethodSelector::new(strategy);
        let mut stats = MethodStats::default();
        for i in 0..n {
            sel.add(i);
            stats.push_method();
        }
        (sel, StdRng::seed_from_u64(23), stats)
    }

    #[test]
    fn sequential_rep_wraps_around() {
        let (mut sel, mut rng, stats) = selector(SelectionStrategy::SequentialRep, 3);
        let picks: Vec<_> = (0..7).map(|_| sel.select(&mut rng, &stats).unwrap()).collect();
        assert_eq!(vec![0, 1, 2, 0, 1, 2, 0], picks);
    }

    #[test]
    fn sequential_once_returns_each_method_once_then_none() {
        let (mut sel, mut rng, stats) = selector(SelectionStrategy::SequentialOnce, 3);
        assert_eq!(Some(0), sel.select(&mut rng, &stats));
        assert_eq!(Some(1), sel.select(&mut rng, &stats));
        assert_eq!(Some(2), sel.select(&mut rng, &stats));
        assert_eq!(None, sel.select(&mut rng, &stats));
        assert_eq!(None, sel.select(&mut rng, &stats));

        sel.reset(true);
        assert_eq!(Some(0), sel.select(&mut rng, &stats));
    }

    #[test]
    fn random_once_never_repeats_between_resets() {
        let (mut sel, mut rng, stats) = selector(SelectionStrategy::RandomOnce, 5);
        let mut seen = vec![false; 5];
        for _ in 0..5 {
            let m = sel.select(&mut rng, &stats).unwrap();
            assert!(!seen[m], "method {m} was returned twice");
            seen[m] = true;
        }
        assert_eq!(None, sel.select(&mut rng, &stats));
        assert!(seen.iter().all(|s| *s));
    }

    #[test]
    fn excluded_methods_are_skipped_until_full_reset() {
        let (mut sel, mut rng, stats) = selector(SelectionStrategy::SequentialRep, 3);
        assert_eq!(Some(0), sel.select(&mut rng, &stats));
        sel.do_not_reconsider_last();
        let picks: Vec<_> = (0..4).map(|_| sel.select(&mut rng, &stats).unwrap()).collect();
        assert_eq!(vec![1, 2, 1, 2], picks);

        // a partial reset keeps the exclusion
        sel.reset(false);
        assert_eq!(Some(1), sel.select(&mut rng, &stats));

        // the full reset clears it
        sel.reset(true);
        assert_eq!(Some(0), sel.select(&mut rng, &stats));
    }

    #[test]
    fn excluding_everything_exhausts_the_selector() {
        let (mut sel, mut rng, stats) = selector(SelectionStrategy::RandomRep, 2);
        sel.select(&mut rng, &stats);
        sel.do_not_reconsider_last();
        while let Some(_m) = sel.select(&mut rng, &stats) {
            sel.do_not_reconsider_last();
        }
        assert!(!sel.has_further_method());
        assert_eq!(None, sel.select(&mut rng, &stats));
    }

    #[test]
    fn has_further_method_matches_select() {
        let (mut sel, mut rng, stats) = selector(SelectionStrategy::SequentialOnce, 2);
        assert!(sel.has_further_method());
        sel.select(&mut rng, &stats);
        assert!(sel.has_further_method());
        sel.select(&mut rng, &stats);
        assert!(!sel.has_further_method());
        assert_eq!(None, sel.select(&mut rng, &stats));
    }

    #[test]
    fn call_counters_track_the_current_solution() {
        let (mut sel, mut rng, stats) = selector(SelectionStrategy::SequentialRep, 2);
        sel.select(&mut rng, &stats); // method 0, first call
        assert_eq!(0, sel.call_count_of_last());
        sel.select(&mut rng, &stats); // method 1, first call
        sel.select(&mut rng, &stats); // method 0, second call
        assert_eq!(1, sel.call_count_of_last());
        sel.reset(true);
        sel.select(&mut rng, &stats); // counters start over
        assert_eq!(0, sel.call_count_of_last());
    }

    #[test]
    fn self_adaptive_prefers_rewarded_methods() {
        let (mut sel, mut rng, stats) = selector(SelectionStrategy::SelfAdaptive, 2);
        // massively reward method 1
        for _ in 0..200 {
            if sel.select(&mut rng, &stats) == Some(1) {
                sel.reward_last(true);
            } else {
                sel.reward_last(false);
            }
        }
        let ones = (0..200)
            .filter(|_| sel.select(&mut rng, &stats) == Some(1))
            .count();
        assert!(ones > 150, "expected a clear bias, got {ones}/200");
    }

    #[test]
    fn time_adaptive_prefers_cheap_methods() {
        let (mut sel, mut rng, mut stats) = selector(SelectionStrategy::TimeAdaptive, 2);
        stats.add_time(0, 100.0); // method 0 is expensive
        stats.add_time(1, 0.001); // method 1 is cheap
        let ones = (0..200)
            .filter(|_| sel.select(&mut rng, &stats) == Some(1))
            .count();
        assert!(ones > 150, "expected a clear bias, got {ones}/200");
    }
}
