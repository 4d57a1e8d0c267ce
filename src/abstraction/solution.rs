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

//! This module defines the `Solution` trait: the contract between the
//! scheduler and the problem specific candidate solutions it manipulates.
//! This is the one abstraction a client *must* implement in order to use the
//! library.

use std::cell::Cell;
use std::fs::File;
use std::io::{BufWriter, Write};

use rand::rngs::StdRng;

use crate::Result;

// ----------------------------------------------------------------------------
// --- OBJECTIVE CACHE --------------------------------------------------------
// ----------------------------------------------------------------------------

/// The storage for the lazily evaluated objective value of a solution.
///
/// Evaluating an objective function can be expensive, and the scheduler
/// compares solutions much more often than it mutates them. A solution type
/// therefore embeds one `ObjectiveCache` and exposes it through
/// [Solution::obj_cache]. The framework only recomputes the objective when
/// the cache has been invalidated; every method that mutates a solution is
/// required to call [Solution::invalidate] (or to refresh the value itself).
///
/// # Example
/// ```
/// # use mhsched::ObjectiveCache;
/// let cache = ObjectiveCache::default();
/// assert_eq!(42.0, cache.value_or_else(|| 42.0));
/// // the closure is no longer consulted once a value is cached
/// assert_eq!(42.0, cache.value_or_else(|| 0.0));
/// cache.invalidate();
/// assert_eq!(7.0, cache.value_or_else(|| 7.0));
/// ```
#[derive(Debug, Clone, Default)]
pub struct ObjectiveCache {
    value: Cell<f64>,
    valid: Cell<bool>,
}

impl ObjectiveCache {
    /// Returns the cached objective value, evaluating `objective` and
    /// memoizing its result when the cache is stale.
    pub fn value_or_else(&self, objective: impl FnOnce() -> f64) -> f64 {
        if !self.valid.get() {
            self.value.set(objective());
            self.valid.set(true);
        }
        self.value.get()
    }

    /// Marks the cached value as stale. The next read will trigger a full
    /// evaluation of the objective function.
    pub fn invalidate(&self) {
        self.valid.set(false);
    }

    /// Tells whether the cache currently holds a valid value.
    pub fn is_valid(&self) -> bool {
        self.valid.get()
    }
}

// ----------------------------------------------------------------------------
// --- SOLUTION ---------------------------------------------------------------
// ----------------------------------------------------------------------------

/// This trait describes a candidate solution of the optimization problem at
/// hand. The scheduler is completely agnostic of the problem encoding: all it
/// ever does with a solution is clone it, copy it around, evaluate and
/// compare its objective value, hash it for duplicate detection, and save it
/// when the optimization is over. The *methods* (construction heuristics,
/// neighborhood searches, shakings) registered with a scheduler are the only
/// pieces of code that understand the actual payload.
pub trait Solution: Clone + Send + 'static {
    /// Fully recomputes the objective value of this solution. Client code
    /// should never call this directly but go through [Self::obj] which
    /// caches the result.
    fn objective(&self) -> f64;

    /// Grants the framework access to the embedded [ObjectiveCache].
    fn obj_cache(&self) -> &ObjectiveCache;

    /// Returns the objective value of this solution, evaluating it anew only
    /// when the cached value has been invalidated.
    fn obj(&self) -> f64 {
        self.obj_cache().value_or_else(|| self.objective())
    }

    /// Marks the cached objective value as stale. Every method that mutates
    /// the solution payload must call this (unless it updates the objective
    /// value incrementally itself).
    fn invalidate(&self) {
        self.obj_cache().invalidate();
    }

    /// Copies the content of `other` into this solution. The default simply
    /// delegates to `clone_from`; override it when a concrete type can reuse
    /// allocations more aggressively.
    fn copy_from(&mut self, other: &Self) {
        self.clone_from(other);
    }

    /// Structural equality, used for duplicate elimination. An efficient
    /// implementation first compares the objective values and only then the
    /// payload.
    fn equals(&self, other: &Self) -> bool;

    /// The (phenotypic) distance between this solution and `other`. The
    /// distance should be a metric. The default is the trivial 0/1 metric
    /// derived from [Self::equals].
    fn dist(&self, other: &Self) -> f64 {
        if self.equals(other) {
            0.0
        } else {
            1.0
        }
    }

    /// Randomly (re)initializes this solution. The `slot` argument is the
    /// index of the solution within its population (starting at 0) and only
    /// needs to be considered when not all members should be initialized in
    /// the same way.
    fn random_init(&mut self, slot: usize, rng: &mut StdRng);

    /// Returns a hash of this solution, used by the population's duplicate
    /// index. Two solutions for which [Self::equals] holds must return the
    /// same value; collisions between unequal solutions are fine. The default
    /// derives a coarse value from the objective.
    fn hash_value(&self) -> u64 {
        self.obj() as u64
    }

    /// Writes the solution in its textual form to the given writer.
    fn write(&self, out: &mut dyn Write) -> std::io::Result<()>;

    /// Saves the solution to the file at `path`. The special path `"NULL"`
    /// means "discard": nothing is written and the call succeeds.
    fn save(&self, path: &str) -> Result<()> {
        if path == "NULL" {
            return Ok(());
        }
        let mut out = BufWriter::new(File::create(path)?);
        self.write(&mut out)?;
        out.flush()?;
        Ok(())
    }

    /// Loads the solution from the file at `path`. Optional: the default
    /// implementation reports that the concrete type does not support it.
    fn load(&mut self, path: &str) -> Result<()> {
        let _ = path;
        Err(crate::Error::Setup(
            "load is not supported by this solution type".to_string(),
        ))
    }
}

// ############################################################################
// #### TESTS #################################################################
// ############################################################################

#[cfg(test)]
mod test_objective_cache {
    use crate::ObjectiveCache;

    #[test]
    fn evaluates_lazily_and_memoizes() {
        let cache = ObjectiveCache::default();
        assert!(!cache.is_valid());
        assert_eq!(3.0, cache.value_or_else(|| 3.0));
        assert!(cache.is_valid());
        // the second closure must not be consulted
        assert_eq!(3.0, cache.value_or_else(|| unreachable!()));
    }

    #[test]
    fn invalidate_forces_reevaluation() {
        let cache = ObjectiveCache::default();
        assert_eq!(1.0, cache.value_or_else(|| 1.0));
        cache.invalidate();
        assert!(!cache.is_valid());
        assert_eq!(2.0, cache.value_or_else(|| 2.0));
    }

    #[test]
    fn clones_carry_the_cached_value() {
        let cache = ObjectiveCache::default();
        let _ = cache.value_or_else(|| 5.0);
        let copy = cache.clone();
        assert_eq!(5.0, copy.value_or_else(|| unreachable!()));
    }
}
