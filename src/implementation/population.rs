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

//! This module provides the implementation of the population: a fixed size
//! container of candidate solutions with O(1) best-index tracking, an
//! optional worst-heap and an optional duplicate-detecting hash index. The
//! scheduler's global population and every worker's private mini population
//! are instances of this type.

use std::cmp::Ordering;
use std::io::Write;
use std::mem;

use binary_heap_plus::BinaryHeap;
use compare::Compare;
use fxhash::FxHashMap;
use rand::rngs::StdRng;
use rand::Rng;

use crate::{OptDirection, Solution};

// ----------------------------------------------------------------------------
// --- DUPLICATE ELIMINATION --------------------------------------------------
// ----------------------------------------------------------------------------

/// The duplicate elimination policy of a population (the `dupelim`
/// parameter).
#[derive(Debug, Clone, Copy, Eq, PartialEq, Hash)]
pub enum DuplicateElimination {
    /// No duplicate check at all (level 0).
    Off,
    /// Newly created candidate solutions are checked against the population
    /// before insertion (level 1).
    Children,
    /// Like `Children`, and additionally the initial population is
    /// reinitialized until it is entirely duplicate free (level 2).
    Initial,
}

impl DuplicateElimination {
    /// Decodes the numeric parameter level {0, 1, 2}.
    pub fn from_level(level: u8) -> Option<Self> {
        match level {
            0 => Some(DuplicateElimination::Off),
            1 => Some(DuplicateElimination::Children),
            2 => Some(DuplicateElimination::Initial),
            _ => None,
        }
    }

    /// The numeric parameter level of this policy.
    pub fn level(self) -> u8 {
        match self {
            DuplicateElimination::Off => 0,
            DuplicateElimination::Children => 1,
            DuplicateElimination::Initial => 2,
        }
    }

    /// True iff candidate solutions must be checked against the population.
    pub fn checks_children(self) -> bool {
        self != DuplicateElimination::Off
    }
}

// ----------------------------------------------------------------------------
// --- WORST HEAP -------------------------------------------------------------
// ----------------------------------------------------------------------------

/// An entry of the worst-heap. Entries are invalidated lazily: whenever a
/// slot changes, its stamp is bumped and stale entries are skipped when they
/// surface.
#[derive(Debug, Clone, Copy)]
struct HeapEntry {
    obj: f64,
    index: usize,
    stamp: u64,
}

/// Orders heap entries such that the *worst* objective value pops first.
#[derive(Debug, Clone, Copy)]
struct WorstFirst {
    sense: OptDirection,
}

impl Compare<HeapEntry> for WorstFirst {
    fn compare(&self, a: &HeapEntry, b: &HeapEntry) -> Ordering {
        let ord = match self.sense {
            OptDirection::Maximize => b.obj.partial_cmp(&a.obj),
            OptDirection::Minimize => a.obj.partial_cmp(&b.obj),
        };
        ord.unwrap_or(Ordering::Equal)
    }
}

// ----------------------------------------------------------------------------
// --- POPULATION -------------------------------------------------------------
// ----------------------------------------------------------------------------

/// A fixed size population of candidate solutions.
///
/// The population keeps its bookkeeping consistent through every mutation:
/// the index of the best member is tracked in O(1), the optional worst-heap
/// answers `worst_index` in O(log n), and the optional hash index answers
/// `find_duplicate` in O(1) expected time. All mutations must go through
/// [Self::replace] and [Self::update].
///
/// # Note
/// Slot 0 plays a special role by convention: the schedulers keep the
/// globally best solution there, and a worker's private population keeps its
/// incumbent at slot 0 and the pre-shaking snapshot at slot 1.
pub struct Population<S> {
    members: Vec<S>,
    index_best: usize,
    sense: OptDirection,
    dupelim: DuplicateElimination,
    hash_index: Option<FxHashMap<u64, Vec<usize>>>,
    worst_heap: Option<BinaryHeap<HeapEntry, WorstFirst>>,
    stamps: Vec<u64>,
    next_stamp: u64,
    stat_mean: f64,
    stat_dev: f64,
    stat_worst: f64,
    stat_valid: bool,
}

impl<S: Solution> Population<S> {
    /// Creates a population of `size` copies of the given template solution.
    /// The members are *not* initialized; call [Self::initialize] for that.
    /// The hash index is maintained whenever the duplicate policy requires
    /// checks; the worst-heap only when `with_worst_heap` is set (it pays off
    /// for population based schemes that replace the worst member over and
    /// over).
    pub fn new(
        template: &S,
        size: usize,
        sense: OptDirection,
        dupelim: DuplicateElimination,
        with_worst_heap: bool,
    ) -> Self {
        assert!(size > 0, "a population must hold at least one solution");
        let members: Vec<S> = (0..size).map(|_| template.clone()).collect();
        let mut pop = Population {
            members,
            index_best: 0,
            sense,
            dupelim,
            hash_index: dupelim.checks_children().then(FxHashMap::default),
            worst_heap: with_worst_heap
                .then(|| BinaryHeap::from_vec_cmp(vec![], WorstFirst { sense })),
            stamps: vec![0; size],
            next_stamp: 1,
            stat_mean: 0.0,
            stat_dev: 0.0,
            stat_worst: 0.0,
            stat_valid: false,
        };
        pop.rebuild_index();
        pop
    }

    /// The number of solutions in the population.
    pub fn len(&self) -> usize {
        self.members.len()
    }

    /// True iff the population holds no solution. (Never the case: the
    /// constructor requires at least one slot.)
    pub fn is_empty(&self) -> bool {
        self.members.is_empty()
    }

    /// The optimization direction this population sorts by.
    pub fn sense(&self) -> OptDirection {
        self.sense
    }

    /// The configured duplicate elimination policy.
    pub fn dupelim(&self) -> DuplicateElimination {
        self.dupelim
    }

    /// Borrows the i-th solution.
    pub fn at(&self, index: usize) -> &S {
        &self.members[index]
    }

    /// The index of the best solution.
    pub fn best_index(&self) -> usize {
        self.index_best
    }

    /// Borrows the best solution.
    pub fn best(&self) -> &S {
        &self.members[self.index_best]
    }

    /// The objective value of the best solution.
    pub fn best_obj(&self) -> f64 {
        self.best().obj()
    }

    /// Randomly (re)initializes every member. Under the
    /// [DuplicateElimination::Initial] policy, each member is reinitialized
    /// until it differs from all earlier ones, so that the initial population
    /// is duplicate free.
    pub fn initialize(&mut self, rng: &mut StdRng) {
        let n = self.members.len();
        for i in 0..n {
            let mut attempts = 0usize;
            loop {
                self.members[i].random_init(i, rng);
                if self.dupelim != DuplicateElimination::Initial {
                    break;
                }
                let (head, tail) = self.members.split_at(i);
                let me = &tail[0];
                if !head.iter().any(|other| other.equals(me)) {
                    break;
                }
                attempts += 1;
                assert!(
                    attempts < 100 * n.max(100),
                    "cannot build a duplicate free initial population \
                     (solution space too small for size {n}?)"
                );
            }
        }
        self.rebuild_index();
    }

    /// The index of a (the) worst solution. Guaranteed to never be the best
    /// index. O(log n) amortized when the worst-heap is active, O(n)
    /// otherwise.
    pub fn worst_index(&mut self) -> usize {
        if self.members.len() == 1 {
            return 0;
        }
        if self.worst_heap.is_some() {
            if let Some(found) = self.worst_from_heap() {
                return found;
            }
        }
        self.scan_worst()
    }

    /// The objective value of a worst solution (statistics cache).
    pub fn worst_obj(&mut self) -> f64 {
        self.validate_stat();
        self.stat_worst
    }

    /// The mean objective value of the population (statistics cache).
    pub fn mean_obj(&mut self) -> f64 {
        self.validate_stat();
        self.stat_mean
    }

    /// The standard deviation of the objective values (statistics cache).
    pub fn dev_obj(&mut self) -> f64 {
        self.validate_stat();
        self.stat_dev
    }

    /// Swaps the solution at `index` with the caller-provided one and
    /// returns the displaced solution. All bookkeeping (best index, hash
    /// index, worst-heap, statistics cache) is kept consistent.
    pub fn replace(&mut self, index: usize, mut solution: S) -> S {
        self.forget_slot(index);
        mem::swap(&mut self.members[index], &mut solution);
        self.adopt_slot(index);
        solution
    }

    /// Copies `solution` into the slot at `index`, with the same bookkeeping
    /// as [Self::replace].
    pub fn update(&mut self, index: usize, solution: &S) {
        self.forget_slot(index);
        self.members[index].copy_from(solution);
        self.adopt_slot(index);
    }

    /// Swaps the solution at `index` with the one behind `other`, with the
    /// same bookkeeping as [Self::replace]. Useful to move candidates in and
    /// out without cloning.
    pub fn swap_slot(&mut self, index: usize, other: &mut S) {
        self.forget_slot(index);
        mem::swap(&mut self.members[index], other);
        self.adopt_slot(index);
    }

    /// Copies the content of slot `from` into slot `to`.
    pub fn copy_within(&mut self, from: usize, to: usize) {
        if from == to {
            return;
        }
        let source = self.members[from].clone();
        self.update(to, &source);
    }

    /// Returns the index of a member equal to `p`, or `None`. O(1) expected
    /// when the hash index is active, O(n) otherwise.
    pub fn find_duplicate(&self, p: &S) -> Option<usize> {
        if let Some(index) = &self.hash_index {
            index
                .get(&p.hash_value())
                .and_then(|bucket| bucket.iter().copied().find(|&i| self.members[i].equals(p)))
        } else {
            self.members.iter().position(|m| m.equals(p))
        }
    }

    /// A uniformly random slot index.
    pub fn random_index(&self, rng: &mut StdRng) -> usize {
        rng.gen_range(0..self.members.len())
    }

    /// Rebuilds the hash index, the worst-heap and the best index from
    /// scratch. Required after wholesale replacement of the members (e.g.,
    /// when a whole generation is merged in).
    pub fn rebuild_index(&mut self) {
        if let Some(index) = &mut self.hash_index {
            index.clear();
        }
        if let Some(heap) = &mut self.worst_heap {
            heap.clear();
        }
        for i in 0..self.members.len() {
            self.stamps[i] = self.next_stamp;
            self.next_stamp += 1;
            let obj = self.members[i].obj();
            let hash = self.members[i].hash_value();
            if let Some(index) = &mut self.hash_index {
                index.entry(hash).or_default().push(i);
            }
            if let Some(heap) = &mut self.worst_heap {
                heap.push(HeapEntry {
                    obj,
                    index: i,
                    stamp: self.stamps[i],
                });
            }
        }
        self.determine_best();
        self.stat_valid = false;
    }

    /// Writes the whole population to the given writer (for debugging).
    pub fn write(&self, out: &mut dyn Write) -> std::io::Result<()> {
        for (i, sol) in self.members.iter().enumerate() {
            write!(out, "{i}\t{}\t", sol.obj())?;
            sol.write(out)?;
            writeln!(out)?;
        }
        Ok(())
    }

    // -- internals -----------------------------------------------------------

    /// Removes the bookkeeping entries of a slot that is about to change.
    fn forget_slot(&mut self, index: usize) {
        let hash = self.members[index].hash_value();
        if let Some(hidx) = &mut self.hash_index {
            if let Some(bucket) = hidx.get_mut(&hash) {
                bucket.retain(|&i| i != index);
                if bucket.is_empty() {
                    hidx.remove(&hash);
                }
            }
        }
        // bumping the stamp lazily invalidates any heap entry for this slot
        self.stamps[index] = self.next_stamp;
        self.next_stamp += 1;
    }

    /// (Re)creates the bookkeeping entries of a slot that just changed.
    fn adopt_slot(&mut self, index: usize) {
        let obj = self.members[index].obj();
        let hash = self.members[index].hash_value();
        if let Some(hidx) = &mut self.hash_index {
            hidx.entry(hash).or_default().push(index);
        }
        if let Some(heap) = &mut self.worst_heap {
            heap.push(HeapEntry {
                obj,
                index,
                stamp: self.stamps[index],
            });
        }
        if index == self.index_best {
            self.determine_best();
        } else if self.sense.is_better(obj, self.best_obj()) {
            self.index_best = index;
        }
        self.stat_valid = false;
    }

    /// Determines the best index with a full scan. Called when the previous
    /// best slot may have been lost.
    fn determine_best(&mut self) {
        let mut best = 0;
        for i in 1..self.members.len() {
            if self
                .sense
                .is_better(self.members[i].obj(), self.members[best].obj())
            {
                best = i;
            }
        }
        self.index_best = best;
    }

    /// Pops heap entries until a live one that is not the best index
    /// surfaces. The returned entry (and a possibly skipped live best entry)
    /// are pushed back so the heap keeps covering every slot.
    fn worst_from_heap(&mut self) -> Option<usize> {
        let heap = self.worst_heap.as_mut().expect("heap is active");
        let mut skipped_best = None;
        let mut found = None;
        while let Some(entry) = heap.pop() {
            if self.stamps[entry.index] != entry.stamp {
                continue; // stale
            }
            if entry.index == self.index_best {
                skipped_best = Some(entry);
                continue;
            }
            found = Some(entry);
            break;
        }
        if let Some(entry) = skipped_best {
            heap.push(entry);
        }
        if let Some(entry) = found {
            heap.push(entry);
            Some(entry.index)
        } else {
            None
        }
    }

    /// O(n) fallback: the worst member, never the best index.
    fn scan_worst(&self) -> usize {
        let mut worst = if self.index_best == 0 { 1 } else { 0 };
        for i in 0..self.members.len() {
            if i == self.index_best {
                continue;
            }
            if self
                .sense
                .is_worse(self.members[i].obj(), self.members[worst].obj())
            {
                worst = i;
            }
        }
        worst
    }

    fn validate_stat(&mut self) {
        if self.stat_valid {
            return;
        }
        let n = self.members.len() as f64;
        let mut sum = 0.0;
        let mut worst = self.members[0].obj();
        for m in &self.members {
            let obj = m.obj();
            sum += obj;
            if self.sense.is_worse(obj, worst) {
                worst = obj;
            }
        }
        let mean = sum / n;
        let var = self
            .members
            .iter()
            .map(|m| {
                let d = m.obj() - mean;
                d * d
            })
            .sum::<f64>()
            / n;
        self.stat_mean = mean;
        self.stat_worst = worst;
        self.stat_dev = var.sqrt();
        self.stat_valid = true;
    }
}

// ############################################################################
// #### TESTS #################################################################
// ############################################################################

#[cfg(test)]
mod test_population {
    use rand::rngs::StdRng;
    use rand::{Rng, SeedableRng};

    use crate::{DuplicateElimination, ObjectiveCache, OptDirection, Population, Solution};

    /// A tiny solution over a single integer, maximizing its value.
    #[derive(Clone)]
    struct Num {
        val: i64,
        cache: ObjectiveCache,
    }
    impl Num {
        fn new(val: i64) -> Self {
            Num {
                val,
                cache: ObjectiveCache::default(),
            }
        }
        fn set(&mut self, val: i64) {
            self.val = val;
            self.invalidate();
        }
    }
    impl Solution for Num {
        fn objective(&self) -> f64 {
            self.val as f64
        }
        fn obj_cache(&self) -> &ObjectiveCache {
            &self.cache
        }
        fn equals(&self, other: &Self) -> bool {
            self.val == other.val
        }
        fn random_init(&mut self, _slot: usize, rng: &mut StdRng) {
            self.set(rng.gen_range(0..1_000_000));
        }
        fn hash_value(&self) -> u64 {
            self.val as u64
        }
        fn write(&self, out: &mut dyn std::io::Write) -> std::io::Result<()> {
            write!(out, "{}", self.val)
        }
    }

    fn pop_of(values: &[i64], dupelim: DuplicateElimination, heap: bool) -> Population<Num> {
        let mut pop = Population::new(
            &Num::new(values[0]),
            values.len(),
            OptDirection::Maximize,
            dupelim,
            heap,
        );
        for (i, v) in values.iter().enumerate() {
            pop.update(i, &Num::new(*v));
        }
        pop
    }

    #[test]
    fn best_is_tracked_through_updates() {
        let mut pop = pop_of(&[3, 9, 1, 5], DuplicateElimination::Off, false);
        assert_eq!(1, pop.best_index());
        assert_eq!(9.0, pop.best_obj());

        pop.update(2, &Num::new(50));
        assert_eq!(2, pop.best_index());

        // losing the best slot triggers a rescan
        pop.update(2, &Num::new(0));
        assert_eq!(1, pop.best_index());
    }

    #[test]
    fn replace_returns_the_displaced_solution() {
        let mut pop = pop_of(&[3, 9, 1], DuplicateElimination::Off, false);
        let old = pop.replace(0, Num::new(100));
        assert_eq!(3, old.val);
        assert_eq!(0, pop.best_index());
    }

    #[test]
    fn worst_is_never_the_best_index() {
        for heap in [false, true] {
            let mut pop = pop_of(&[10, 2, 7], DuplicateElimination::Off, heap);
            assert_eq!(1, pop.worst_index());
            // make the best slot also carry the lowest value: worst must move
            let mut pop = pop_of(&[10, 20, 30], DuplicateElimination::Off, heap);
            pop.update(2, &Num::new(40));
            assert_eq!(2, pop.best_index());
            assert_eq!(0, pop.worst_index());
        }
    }

    #[test]
    fn heap_survives_many_replacements() {
        let mut pop = pop_of(&[5, 6, 7, 8], DuplicateElimination::Off, true);
        for v in 0..100i64 {
            let w = pop.worst_index();
            assert_ne!(w, pop.best_index());
            pop.update(w, &Num::new(100 + v));
        }
        // after inserting 100..199, the worst of the survivors is 196
        let w = pop.worst_index();
        assert_eq!(196.0, pop.at(w).obj());
    }

    #[test]
    fn duplicates_are_found_through_the_hash_index() {
        let pop = pop_of(&[3, 9, 1], DuplicateElimination::Children, false);
        assert_eq!(Some(1), pop.find_duplicate(&Num::new(9)));
        assert_eq!(None, pop.find_duplicate(&Num::new(4)));
    }

    #[test]
    fn initial_duplicate_elimination_yields_distinct_members() {
        /// A solution with a tiny domain so collisions are guaranteed to
        /// happen during initialization.
        #[derive(Clone)]
        struct Small {
            val: i64,
            cache: ObjectiveCache,
        }
        impl Solution for Small {
            fn objective(&self) -> f64 {
                self.val as f64
            }
            fn obj_cache(&self) -> &ObjectiveCache {
                &self.cache
            }
            fn equals(&self, other: &Self) -> bool {
                self.val == other.val
            }
            fn random_init(&mut self, _slot: usize, rng: &mut StdRng) {
                self.val = rng.gen_range(0..8);
                self.invalidate();
            }
            fn hash_value(&self) -> u64 {
                self.val as u64
            }
            fn write(&self, out: &mut dyn std::io::Write) -> std::io::Result<()> {
                write!(out, "{}", self.val)
            }
        }

        let template = Small {
            val: 0,
            cache: ObjectiveCache::default(),
        };
        let mut rng = StdRng::seed_from_u64(7);
        let mut pop = Population::new(
            &template,
            8,
            OptDirection::Maximize,
            DuplicateElimination::Initial,
            false,
        );
        pop.initialize(&mut rng);
        for i in 0..8 {
            for j in (i + 1)..8 {
                assert!(!pop.at(i).equals(pop.at(j)));
                assert_ne!(pop.at(i).hash_value(), pop.at(j).hash_value());
            }
        }
    }

    #[test]
    fn statistics_are_cached_and_refreshed() {
        let mut pop = pop_of(&[1, 2, 3], DuplicateElimination::Off, false);
        assert_eq!(2.0, pop.mean_obj());
        assert_eq!(1.0, pop.worst_obj());
        pop.update(0, &Num::new(4));
        assert_eq!(3.0, pop.mean_obj());
        assert_eq!(2.0, pop.worst_obj());
    }

    #[test]
    fn single_slot_population_worst_is_slot_zero() {
        let mut pop = pop_of(&[42], DuplicateElimination::Off, false);
        assert_eq!(0, pop.worst_index());
    }
}
