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

//! This module provides the schedulers themselves: the data and protocol they
//! share (`SchedulerCore`), the parallel generalized variable neighborhood
//! search scheduler (`Gvns`) and the population based iterated greedy
//! scheduler (`Pbig`).

mod gvns;
mod pbig;

pub use gvns::*;
pub use pbig::*;

use std::io::Write;

use crate::{MethodStats, OptDirection, Population, Solution};

/// The user-settable cancel callback: it receives the objective value of the
/// currently best known solution after each completed method and requests
/// termination by returning true.
pub type Callback = Box<dyn Fn(f64) -> bool + Send + Sync>;

// ----------------------------------------------------------------------------
// --- SCHEDULER CORE ---------------------------------------------------------
// ----------------------------------------------------------------------------

/// The bookkeeping shared by all schedulers: the global population, the
/// per-method statistics and the iteration counters. It lives inside each
/// scheduler's critical section, so all mutation happens under the scheduler
/// mutex (or on the single thread of a sequential scheduler).
pub(crate) struct SchedulerCore<S> {
    /// The scheduler's population; slot 0 holds the globally best solution
    /// observed so far (or the template before any acceptance).
    pub pop: Population<S>,
    /// The per-method counters.
    pub stats: MethodStats,
    /// The number of completed method applications.
    pub n_iteration: u64,
    /// Iterations performed by schedulers nested inside methods.
    pub n_sub_iterations: u64,
    /// The number of duplicate candidate solutions that were eliminated.
    pub n_dup_eliminations: u64,
    /// The iteration in which the current global best was accepted.
    pub iter_best: u64,
    /// The elapsed time at which the current global best was accepted.
    pub time_best: f64,
}

impl<S: Solution> SchedulerCore<S> {
    pub fn new(pop: Population<S>) -> Self {
        SchedulerCore {
            pop,
            stats: MethodStats::default(),
            n_iteration: 0,
            n_sub_iterations: 0,
            n_dup_eliminations: 0,
            iter_best: 0,
            time_best: 0.0,
        }
    }

    /// Installs `sol` -- already known to improve on the global best -- as
    /// the new slot 0 and records when it was found.
    pub fn accept_global(&mut self, sol: &S, elapsed: f64) {
        self.pop.update(0, sol);
        self.iter_best = self.n_iteration;
        self.time_best = elapsed;
    }

    /// Rewinds the run-specific counters for an independent new run. The
    /// method statistics keep aggregating over runs.
    pub fn reset_run(&mut self) {
        self.n_iteration = 0;
        self.n_sub_iterations = 0;
        self.iter_best = 0;
        self.time_best = 0.0;
    }

    /// Prints the general statistics report shared by all schedulers: the
    /// best objective value, when it was found, the overall effort, and the
    /// per-method table.
    pub fn print_report(
        &self,
        out: &mut dyn Write,
        names: &[&str],
        elapsed: f64,
    ) -> std::io::Result<()> {
        writeln!(out, "# best solution:")?;
        writeln!(out, "best objective value:\t{}", self.pop.best_obj())?;
        writeln!(out, "best obtained in iteration:\t{}", self.iter_best)?;
        writeln!(out, "solution time for best:\t{}", self.time_best)?;
        write!(out, "best solution:\t")?;
        self.pop.best().write(out)?;
        writeln!(out)?;
        writeln!(out, "time:\t{elapsed}")?;
        writeln!(out, "iterations:\t{}", self.n_iteration)?;
        if self.n_sub_iterations > 0 {
            writeln!(out, "sub-iterations:\t{}", self.n_sub_iterations)?;
        }
        self.stats.print(out, names)?;
        Ok(())
    }
}

/// Derives the sense-aware absolute objective gain between two values.
pub(crate) fn gain_between(a: f64, b: f64) -> f64 {
    (a - b).abs()
}

/// A tiny helper shared by the schedulers: is `candidate` strictly better
/// than the current global best of `pop`?
pub(crate) fn improves_global<S: Solution>(
    sense: OptDirection,
    candidate: f64,
    pop: &Population<S>,
) -> bool {
    sense.is_better(candidate, pop.best_obj())
}
