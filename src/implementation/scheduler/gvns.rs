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

//! This module provides the implementation of the parallel generalized
//! variable neighborhood search (GVNS) scheduler: the VND-in-VNS control
//! flow driven over one or more worker threads. The same scheduler also
//! covers GRASP, plain VNS, large neighborhood search and iterated greedy
//! setups, depending on which method classes are populated.
//!
//! # Note
//! The worker coordination deliberately preserves the three condition
//! variable shape of the classical implementation: one monitor for workers
//! starving on methods, one for the synchronous-mode barrier, and one
//! enforcing the start order of the workers. The barrier semantics are what
//! makes synchronous runs deterministic.

use std::panic::{catch_unwind, AssertUnwindSafe};
use std::sync::atomic::{AtomicBool, Ordering};
use std::time::Duration;

use parking_lot::{Condvar, Mutex};
use rand::rngs::StdRng;
use rand::{Rng, SeedableRng};

use crate::implementation::scheduler::{gain_between, improves_global, Callback, SchedulerCore};
use crate::{
    Clock, ClockKind, DuplicateElimination, Error, LogEntry, LogWriter, MethodContext, MethodPool,
    MethodResult, MethodSelector, MethodStats, OptDirection, Params, Population, Result,
    SchedulerMethod, SelectionStrategy, Solution, TerminationCriteria,
};

/// How long a starving worker sleeps at most before re-checking for work.
const STARVATION_NAP: Duration = Duration::from_millis(100);

// ----------------------------------------------------------------------------
// --- PER WORKER STATE -------------------------------------------------------
// ----------------------------------------------------------------------------

/// Coordination flags of one worker that must be readable without the
/// scheduler mutex (they drive the start-order condition).
struct WorkerFlags {
    /// the worker got its first method assigned (sync mode start ordering)
    is_working: AtomicBool,
    /// this specific worker must terminate (deterministic trim near titer)
    terminate: AtomicBool,
}

/// The mutex protected part of a worker: its private population (slot 0 is
/// the incumbent, slot 1 the pre-shaking snapshot), its selectors and its
/// dispatch state. Only touched inside the scheduler's critical sections.
struct WorkerSlot<S> {
    pop: Population<S>,
    locimp: MethodSelector,
    shaking: MethodSelector,
    /// the method pool index dispatched to this worker last, if any
    current_method: Option<usize>,
    /// elapsed time at which the last shaking method was dispatched
    shake_start: f64,
}

/// The thread local part of a worker: the scratch solution methods operate
/// on, a copy of the incumbent for reference, and the worker's own RNG.
struct WorkerLocal<S> {
    id: usize,
    tmp_sol: S,
    incumbent: S,
    rng: StdRng,
    result: MethodResult,
    call_counter: usize,
}

/// The synchronous-mode barrier bookkeeping.
struct PrepPhase {
    /// number of workers having reached the barrier in the current round
    waiting: usize,
    /// incremented by the last arriver; lets waiters detect the release
    generation: u64,
}

// ----------------------------------------------------------------------------
// --- SHARED STATE -----------------------------------------------------------
// ----------------------------------------------------------------------------

/// The data shared among the worker threads. Everything mutable sits behind
/// the scheduler mutex (`critical`) or the dedicated log mutex; the method
/// pool and the configuration are immutable during a run.
struct Shared<S: Solution> {
    methods: MethodPool<S>,
    params: Params,
    sense: OptDirection,
    criteria: TerminationCriteria,
    clock_kind: ClockKind,
    callback: Option<Callback>,
    n_const: usize,
    n_locimp: usize,
    n_shake: usize,
    nb_threads: usize,
    /// synchronous barrier mode; only meaningful with more than one thread
    sync: bool,
    /// the global cooperative cancellation flag
    finish: AtomicBool,
    flags: Vec<WorkerFlags>,

    critical: Mutex<Critical<S>>,
    log: Mutex<LogWriter>,

    /// monitor for workers starving on methods (async mode)
    lock_no_method: Mutex<()>,
    cv_no_method: Condvar,
    /// barrier before the atomic global update (sync mode)
    prep: Mutex<PrepPhase>,
    cv_prep: Condvar,
    /// enforces that worker i starts only after worker i-1 (sync mode)
    lock_order: Mutex<()>,
    cv_order: Condvar,
}

/// The mutex protected critical section of the scheduler.
struct Critical<S> {
    core: SchedulerCore<S>,
    /// the shared construction selector: every construction heuristic is
    /// applied once, no matter by which worker
    constheu: MethodSelector,
    workers: Vec<WorkerSlot<S>>,
    /// has any worker published an initial solution yet?
    initial_solution_exists: bool,
    clock: Clock,
    /// generator for the deterministic global updates of sync mode
    global_rng: StdRng,
    errors: Vec<String>,
}

// ----------------------------------------------------------------------------
// --- GVNS -------------------------------------------------------------------
// ----------------------------------------------------------------------------

/// The parallel generalized variable neighborhood search scheduler.
///
/// The method pool is split into three blocks whose sizes are stated at
/// construction time: `n_const` construction heuristics first, then
/// `n_locimp` local improvement neighborhoods, then `n_shake` shaking (or
/// large neighborhood search) methods. Every worker thread performs an
/// independent VNS whose local search is a VND over the improvement
/// neighborhoods; the globally best solution is maintained in the
/// scheduler's population and migrates back into the workers with
/// probability `schpmig`.
///
/// # Example
/// ```
/// # use mhsched::*;
/// use rand::Rng;
///
/// /// ONEMAX: maximize the number of one-bits.
/// #[derive(Clone)]
/// struct OneMax { bits: Vec<bool>, cache: ObjectiveCache }
/// impl OneMax {
///     fn new(n: usize) -> Self { OneMax { bits: vec![false; n], cache: ObjectiveCache::default() } }
/// }
/// impl Solution for OneMax {
///     fn objective(&self) -> f64 { self.bits.iter().filter(|b| **b).count() as f64 }
///     fn obj_cache(&self) -> &ObjectiveCache { &self.cache }
///     fn equals(&self, o: &Self) -> bool { self.bits == o.bits }
///     fn random_init(&mut self, _: usize, rng: &mut rand::rngs::StdRng) {
///         self.bits.iter_mut().for_each(|b| *b = rng.gen());
///         self.invalidate();
///     }
///     fn write(&self, out: &mut dyn std::io::Write) -> std::io::Result<()> {
///         for b in &self.bits { write!(out, "{}", *b as u8)?; }
///         Ok(())
///     }
/// }
///
/// let params = ParamsBuilder::default()
///     .titer(Some(300))
///     .popsize(1)
///     .seed(1)
///     .oname("NULL".to_string())
///     .build()
///     .unwrap();
/// let mut gvns = Gvns::new(&OneMax::new(12), 1, 1, 2, params).unwrap();
/// gvns.add_method(Box::new(MethodFunction::new("cons", 0, 0, |sol: &mut OneMax, _, ctx, _| {
///     sol.random_init(0, ctx.rng);
/// }))).unwrap();
/// gvns.add_method(Box::new(MethodFunction::new("flip1st", 1, 0, |sol: &mut OneMax, _, _, res| {
///     match sol.bits.iter().position(|b| !b) {
///         Some(i) => { sol.bits[i] = true; sol.invalidate(); }
///         None => res.changed = false,
///     }
/// }))).unwrap();
/// for k in 1..=2 {
///     gvns.add_method(Box::new(MethodFunction::new(format!("shake{k}"), 1, k, |sol: &mut OneMax, k, ctx, _| {
///         for _ in 0..k {
///             let i = ctx.rng.gen_range(0..sol.bits.len());
///             sol.bits[i] = !sol.bits[i];
///         }
///         sol.invalidate();
///     }))).unwrap();
/// }
/// gvns.run().unwrap();
/// assert_eq!(12.0, gvns.best_objective());
/// ```
pub struct Gvns<S: Solution> {
    shared: Shared<S>,
    rng: StdRng,
}

impl<S: Solution> Gvns<S> {
    /// Creates a new GVNS scheduler for solutions modeled after `template`.
    /// The global population is created from the template but *not*
    /// initialized (see [Self::initialize_population] for setups without
    /// construction methods). The three block sizes announce how many
    /// construction, local improvement and shaking methods will be
    /// registered, in that order.
    pub fn new(
        template: &S,
        n_const: usize,
        n_locimp: usize,
        n_shake: usize,
        params: Params,
    ) -> Result<Self> {
        params.validate()?;
        let sense = params.sense();
        let nb_threads = params.effective_threads();
        let sync = params.schsync && nb_threads > 1;
        let pop = Population::new(template, params.popsize, sense, params.dupelim, false);
        let log = LogWriter::from_params(&params, sense)?;
        let mut rng = StdRng::seed_from_u64(params.derived_seed());
        let global_rng = StdRng::seed_from_u64(rng.gen());
        let clock_kind = params.clock_kind();
        let criteria = params.termination();
        Ok(Gvns {
            shared: Shared {
                methods: MethodPool::default(),
                sense,
                criteria,
                clock_kind,
                callback: None,
                n_const,
                n_locimp,
                n_shake,
                nb_threads,
                sync,
                finish: AtomicBool::new(false),
                flags: (0..nb_threads)
                    .map(|_| WorkerFlags {
                        is_working: AtomicBool::new(false),
                        terminate: AtomicBool::new(false),
                    })
                    .collect(),
                critical: Mutex::new(Critical {
                    core: SchedulerCore::new(pop),
                    constheu: MethodSelector::new(SelectionStrategy::SequentialOnce),
                    workers: vec![],
                    initial_solution_exists: false,
                    clock: Clock::start(clock_kind),
                    global_rng,
                    errors: vec![],
                }),
                log: Mutex::new(log),
                lock_no_method: Mutex::new(()),
                cv_no_method: Condvar::new(),
                prep: Mutex::new(PrepPhase {
                    waiting: 0,
                    generation: 0,
                }),
                cv_prep: Condvar::new(),
                lock_order: Mutex::new(()),
                cv_order: Condvar::new(),
                params,
            },
            rng,
        })
    }

    /// Registers the next method of the pool. Methods must be added in block
    /// order: all construction heuristics first, then the local improvement
    /// neighborhoods, then the shaking methods.
    pub fn add_method(&mut self, method: Box<dyn SchedulerMethod<S>>) -> Result<usize> {
        let total = self.shared.n_const + self.shared.n_locimp + self.shared.n_shake;
        if self.shared.methods.len() == total {
            return Err(Error::Setup(format!(
                "method pool already holds the declared {total} methods"
            )));
        }
        let idx = self.shared.methods.add(method);
        let mut crit = self.shared.critical.lock();
        crit.core.stats.push_method();
        if idx < self.shared.n_const {
            crit.constheu.add(idx);
        }
        Ok(idx)
    }

    /// Sets the cancel callback: it is invoked with the best objective value
    /// after each completed method, and a truthy return terminates the run.
    pub fn set_callback<F>(&mut self, callback: F)
    where
        F: Fn(f64) -> bool + Send + Sync + 'static,
    {
        self.shared.callback = Some(Box::new(callback));
    }

    /// Randomly initializes the global population, honoring the duplicate
    /// elimination policy. Needed for setups without construction methods
    /// (classical VNS on an externally provided starting solution).
    pub fn initialize_population(&mut self) {
        let mut crit = self.shared.critical.lock();
        crit.core.pop.initialize(&mut self.rng);
    }

    /// Replaces slot 0 of the global population by the given solution (e.g.,
    /// a known primal). Only kept when it improves the current slot 0.
    pub fn set_incumbent(&mut self, sol: &S) {
        let mut crit = self.shared.critical.lock();
        if improves_global(self.shared.sense, sol.obj(), &crit.core.pop) {
            crit.core.pop.update(0, sol);
            crit.initial_solution_exists = true;
        }
    }

    /// Requests cooperative termination: every worker exits its loop after
    /// the method it currently executes.
    pub fn terminate(&self) {
        self.shared.finish.store(true, Ordering::SeqCst);
        Self::broadcast_all(&self.shared);
    }

    /// Runs the optimization until the termination oracle fires, the
    /// callback cancels it, or no method can be scheduled anymore. Worker
    /// panics are captured and returned as [Error::Worker] after all threads
    /// have been joined.
    pub fn run(&mut self) -> Result<()> {
        let total = self.shared.n_const + self.shared.n_locimp + self.shared.n_shake;
        if self.shared.methods.len() != total {
            return Err(Error::Setup(format!(
                "{} methods registered but {} declared",
                self.shared.methods.len(),
                total
            )));
        }

        self.prepare_run();

        // write the header and the entry for iteration 0
        {
            let mut crit = self.shared.critical.lock();
            let entry = Self::log_entry_of(&mut crit);
            drop(crit);
            let mut log = self.shared.log.lock();
            log.write_header()?;
            log.write_entry(entry, true)?;
        }

        // one private rng and scratch state per worker, seeded from the main
        // generator so that runs are reproducible
        let locals: Vec<WorkerLocal<S>> = {
            let crit = self.shared.critical.lock();
            (0..self.shared.nb_threads)
                .map(|id| WorkerLocal {
                    id,
                    tmp_sol: crit.core.pop.at(0).clone(),
                    incumbent: crit.core.pop.at(0).clone(),
                    rng: StdRng::seed_from_u64(self.rng.gen()),
                    result: MethodResult::default(),
                    call_counter: 0,
                })
                .collect()
        };

        let shared = &self.shared;
        std::thread::scope(|scope| {
            for wl in locals {
                scope.spawn(move || {
                    let mut wl = wl;
                    let outcome = catch_unwind(AssertUnwindSafe(|| {
                        Self::worker_loop(shared, &mut wl)
                    }));
                    let failure = match outcome {
                        Ok(Ok(())) => None,
                        Ok(Err(e)) => Some(e.to_string()),
                        Err(payload) => Some(panic_text(payload)),
                    };
                    if let Some(msg) = failure {
                        shared
                            .critical
                            .lock()
                            .errors
                            .push(format!("worker {}: {msg}", wl.id));
                        shared.finish.store(true, Ordering::SeqCst);
                        Self::broadcast_all(shared);
                    }
                });
            }
        });

        // in sync mode the results of the last round have not been merged yet
        {
            let mut crit = self.shared.critical.lock();
            if self.shared.sync {
                Self::update_data_from_results(&self.shared, &mut crit);
            }
        }

        {
            let mut log = self.shared.log.lock();
            log.empty_entry()?;
            log.flush()?;
        }

        let errors = std::mem::take(&mut self.shared.critical.lock().errors);
        if errors.is_empty() {
            Ok(())
        } else {
            Err(Error::Worker(errors.join("; ")))
        }
    }

    /// Resets the scheduler for an independent new run. Method statistics
    /// keep aggregating over runs.
    pub fn reset(&mut self) {
        let mut crit = self.shared.critical.lock();
        crit.core.reset_run();
        crit.constheu.reset(true);
        crit.workers.clear();
        crit.initial_solution_exists = false;
        drop(crit);
        self.shared.finish.store(false, Ordering::SeqCst);
        let mut prep = self.shared.prep.lock();
        prep.waiting = 0;
        drop(prep);
        for f in &self.shared.flags {
            f.is_working.store(false, Ordering::SeqCst);
            f.terminate.store(false, Ordering::SeqCst);
        }
    }

    /// The objective value of the globally best solution.
    pub fn best_objective(&self) -> f64 {
        self.shared.critical.lock().core.pop.best_obj()
    }

    /// A copy of the globally best solution.
    pub fn best_solution(&self) -> S {
        self.shared.critical.lock().core.pop.best().clone()
    }

    /// Saves the globally best solution to `path` (`"NULL"` discards).
    pub fn save_best(&self, path: &str) -> Result<()> {
        self.shared.critical.lock().core.pop.best().save(path)
    }

    /// The number of completed method applications.
    pub fn n_iteration(&self) -> u64 {
        self.shared.critical.lock().core.n_iteration
    }

    /// The iteration in which the current global best was accepted.
    pub fn iteration_of_best(&self) -> u64 {
        self.shared.critical.lock().core.iter_best
    }

    /// Iterations spent in schedulers nested inside methods.
    pub fn n_sub_iterations(&self) -> u64 {
        self.shared.critical.lock().core.n_sub_iterations
    }

    /// A snapshot of the per-method statistics.
    pub fn statistics(&self) -> MethodStats {
        self.shared.critical.lock().core.stats.clone()
    }

    /// Prints the overall report: best solution, effort, per-method table.
    pub fn print_statistics(&self, out: &mut dyn std::io::Write) -> Result<()> {
        let names: Vec<&str> = (0..self.shared.methods.len())
            .map(|i| self.shared.methods.name(i))
            .collect();
        let crit = self.shared.critical.lock();
        let elapsed = crit.clock.elapsed();
        crit.core.print_report(out, &names, elapsed)?;
        Ok(())
    }

    // ------------------------------------------------------------------------
    // -- run preparation -----------------------------------------------------
    // ------------------------------------------------------------------------

    fn prepare_run(&mut self) {
        self.shared.finish.store(false, Ordering::SeqCst);
        for f in &self.shared.flags {
            f.is_working.store(false, Ordering::SeqCst);
            f.terminate.store(false, Ordering::SeqCst);
        }
        {
            let mut prep = self.shared.prep.lock();
            prep.waiting = 0;
        }
        let mut crit = self.shared.critical.lock();
        crit.clock = Clock::start(self.shared.clock_kind);
        let template = crit.core.pop.at(0).clone();
        let psize = self.shared.params.threadspsize;
        crit.workers = (0..self.shared.nb_threads)
            .map(|_| {
                let mut locimp = MethodSelector::new(self.shared.params.schlisel);
                let mut shaking = MethodSelector::new(self.shared.params.schshasel);
                for i in self.shared.n_const..self.shared.n_const + self.shared.n_locimp {
                    locimp.add(i);
                }
                for i in self.shared.n_const + self.shared.n_locimp..self.shared.methods.len() {
                    shaking.add(i);
                }
                WorkerSlot {
                    pop: Population::new(
                        &template,
                        psize,
                        self.shared.sense,
                        DuplicateElimination::Off,
                        false,
                    ),
                    locimp,
                    shaking,
                    current_method: None,
                    shake_start: 0.0,
                }
            })
            .collect();
    }

    // ------------------------------------------------------------------------
    // -- the worker loop -----------------------------------------------------
    // ------------------------------------------------------------------------

    fn worker_loop(shared: &Shared<S>, wl: &mut WorkerLocal<S>) -> Result<()> {
        {
            let mut crit = shared.critical.lock();
            if Self::evaluate_terminate(shared, &mut crit) {
                Self::broadcast_sync(shared);
                return Ok(());
            }
        }

        loop {
            // in sync mode, worker i may only start once worker i-1 works
            if shared.sync && wl.id > 0 {
                let mut guard = shared.lock_order.lock();
                while !shared.flags[wl.id - 1].is_working.load(Ordering::SeqCst)
                    && !shared.finish.load(Ordering::SeqCst)
                {
                    shared.cv_order.wait(&mut guard);
                }
            }

            // schedule the next method
            let mut wait = false;
            let mut method = None;
            loop {
                if wait {
                    let mut guard = shared.lock_no_method.lock();
                    if !shared.finish.load(Ordering::SeqCst) {
                        let _ = shared.cv_no_method.wait_for(&mut guard, STARVATION_NAP);
                    }
                    drop(guard);
                    if shared.finish.load(Ordering::SeqCst) {
                        break;
                    }
                }
                {
                    let mut crit = shared.critical.lock();
                    method = Self::get_next_method(shared, &mut crit, wl);
                    if method.is_some() {
                        wl.incumbent.copy_from(crit.workers[wl.id].pop.at(0));
                    }
                    if shared.sync && !shared.flags[wl.id].is_working.load(Ordering::SeqCst) {
                        let _guard = shared.lock_order.lock();
                        shared.flags[wl.id].is_working.store(true, Ordering::SeqCst);
                        shared.cv_order.notify_all();
                    }
                }
                match method {
                    Some(_) => break,
                    None => {
                        if shared.finish.load(Ordering::SeqCst) {
                            break;
                        }
                        if shared.sync {
                            break;
                        }
                        wait = true;
                    }
                }
            }

            if shared.finish.load(Ordering::SeqCst) {
                break;
            }

            // the synchronous barrier: the last worker to arrive merges the
            // round's results and releases everybody for the next round
            if shared.sync {
                let mut crit = shared.critical.lock();
                let mut prep = shared.prep.lock();
                prep.waiting += 1;
                if prep.waiting < shared.nb_threads {
                    let term = Self::evaluate_terminate(shared, &mut crit);
                    let generation = prep.generation;
                    drop(crit);
                    if !term {
                        while prep.generation == generation
                            && !shared.finish.load(Ordering::SeqCst)
                        {
                            shared.cv_prep.wait(&mut prep);
                        }
                    }
                    drop(prep);
                } else {
                    Self::update_data_from_results(shared, &mut crit);
                    // when close to the iteration cap, deterministically trim
                    // the surplus workers: keep lower ids, stop higher ids
                    if let Some(titer) = shared.criteria.max_iterations {
                        let diff = titer as i64 - crit.core.n_iteration as i64;
                        for i in 0..shared.nb_threads {
                            shared.flags[i].is_working.store(false, Ordering::SeqCst);
                            if i as i64 > diff - 1 {
                                shared.flags[i].terminate.store(true, Ordering::SeqCst);
                            }
                        }
                    }
                    prep.waiting = 0;
                    prep.generation += 1;
                    shared.cv_prep.notify_all();
                    drop(prep);
                    drop(crit);
                }
                if method.is_none() {
                    continue;
                }
                if shared.flags[wl.id].terminate.load(Ordering::SeqCst) {
                    break;
                }
            }

            let midx = match method {
                Some(m) => m,
                None => continue,
            };

            // run the scheduled method, without holding any lock
            wl.result.reset();
            let timer = Clock::start(shared.clock_kind);
            let sub_iterations;
            {
                let WorkerLocal {
                    id,
                    tmp_sol,
                    incumbent,
                    rng,
                    result,
                    call_counter,
                } = wl;
                let mut ctx = MethodContext {
                    worker: *id,
                    call_counter: *call_counter,
                    incumbent,
                    rng,
                    sub_iterations: 0,
                };
                shared.methods.get(midx).run(tmp_sol, &mut ctx, result);
                sub_iterations = ctx.sub_iterations;
            }
            let method_time = timer.elapsed();
            wl.result
                .finalize(shared.sense, wl.tmp_sol.obj(), wl.incumbent.obj());

            // merge the outcome into the worker's and the global state
            let termnow;
            let entry;
            {
                let mut crit = shared.critical.lock();
                crit.core.n_sub_iterations += sub_iterations;
                Self::update_method_statistics(shared, &mut crit, wl, midx, method_time);
                Self::update_data(shared, &mut crit, wl, !shared.sync);
                wl.incumbent.copy_from(crit.workers[wl.id].pop.at(0));
                termnow = Self::evaluate_terminate(shared, &mut crit);
                if !termnow {
                    let _guard = shared.lock_no_method.lock();
                    shared.cv_no_method.notify_all();
                }
                entry = Self::log_entry_of(&mut crit);
            }

            // the log has its own mutex; entries are written outside the
            // scheduler's critical section
            {
                let mut log = shared.log.lock();
                log.write_entry(entry, termnow)?;
            }

            if termnow {
                break;
            }
        }

        // free anybody still blocked on the sync-mode monitors
        Self::broadcast_sync(shared);
        Ok(())
    }

    // ------------------------------------------------------------------------
    // -- scheduling policy (all called under the scheduler mutex) ------------
    // ------------------------------------------------------------------------

    /// Determines the next method for the given worker according to the
    /// general VNS scheme with the VND embedded in the VNS. Returns `None`
    /// when nothing can be scheduled right now; if nothing will *ever* be
    /// schedulable again, the global termination flag is raised.
    fn get_next_method(
        shared: &Shared<S>,
        crit: &mut Critical<S>,
        wl: &mut WorkerLocal<S>,
    ) -> Option<usize> {
        let Critical {
            core,
            constheu,
            workers,
            initial_solution_exists,
            clock,
            ..
        } = crit;
        let w = &mut workers[wl.id];
        debug_assert_eq!(
            shared.methods.len(),
            constheu.len() + w.locimp.len() + w.shaking.len()
        );

        // apply a construction method, either because the worker has just
        // been created or because not all of them have been used yet
        if !constheu.is_empty() && (w.current_method.is_none() || constheu.has_further_method()) {
            if let Some(m) = constheu.select(&mut wl.rng, &core.stats) {
                wl.call_counter = constheu.call_count_of_last();
                w.current_method = Some(m);
                return Some(m);
            }
        }

        // when proceeding from construction to improvement, continue with
        // the best solution seen among all construction results
        if !w.locimp.has_last_method()
            && !w.shaking.has_last_method()
            && shared.sense.is_better(w.pop.at(0).obj(), wl.tmp_sol.obj())
        {
            wl.tmp_sol.copy_from(w.pop.at(0));
        }

        // the embedded VND
        if shared.n_locimp > 0 {
            if let Some(m) = w.locimp.select(&mut wl.rng, &core.stats) {
                wl.call_counter = w.locimp.call_count_of_last();
                w.current_method = Some(m);
                return Some(m);
            }
            // all local improvement methods were applied: the VND is done
            w.locimp.reset(true);
        }

        // the shaking loop
        if shared.n_shake > 0 {
            if w.current_method.is_none() && shared.n_locimp == 0 {
                // no construction method was scheduled for this worker: it
                // can only shake an initial solution published by somebody
                if !*initial_solution_exists && shared.n_const > 0 {
                    return None;
                }
                let global = core.pop.at(0).clone();
                w.pop.update(0, &global);
                wl.tmp_sol.copy_from(&global);
            }
            if let Some(m) = w.shaking.select(&mut wl.rng, &core.stats) {
                wl.call_counter = w.shaking.call_count_of_last();
                w.current_method = Some(m);
                w.shake_start = clock.elapsed();
                return Some(m);
            }
        }

        // no method whose scheduling would be meaningful exists anymore
        shared.finish.store(true, Ordering::SeqCst);
        w.current_method = None;
        None
    }

    /// Merges the outcome of the last method application into the worker's
    /// population and -- when `update_now` is set (asynchronous mode) -- into
    /// the scheduler's global population.
    fn update_data(
        shared: &Shared<S>,
        crit: &mut Critical<S>,
        wl: &mut WorkerLocal<S>,
        update_now: bool,
    ) {
        let Critical {
            core,
            workers,
            initial_solution_exists,
            clock,
            ..
        } = crit;
        let w = &mut workers[wl.id];
        let midx = w.current_method.expect("a method has just been run");
        let elapsed = clock.elapsed();

        if midx < shared.n_const {
            // a construction method has been applied
            if wl.result.accepted() {
                Self::copy_better(shared, core, w, &wl.tmp_sol, update_now, elapsed);
                if !shared.sync {
                    *initial_solution_exists = true;
                }
            } else if update_now {
                Self::check_global_best(shared, core, w, &mut wl.rng);
            }
            return;
        }

        if midx < shared.n_const + shared.n_locimp {
            // a local improvement neighborhood has been applied
            if wl.result.reconsider == Some(false)
                || (!wl.result.changed && wl.result.reconsider.is_none())
            {
                w.locimp.do_not_reconsider_last();
            }
            if shared.params.schlisel == SelectionStrategy::SelfAdaptive {
                w.locimp.reward_last(wl.result.improved());
            }
            if wl.result.accepted() {
                Self::copy_better(shared, core, w, &wl.tmp_sol, update_now, elapsed);
                if shared.params.schlirep {
                    // restart the VND with the first neighborhood
                    w.locimp.reset(true);
                    return;
                }
                if w.locimp.has_further_method() {
                    // advance to the next neighborhood
                    return;
                }
            } else if w.locimp.has_further_method() {
                // continue the VND with the next neighborhood
                if wl.result.changed {
                    wl.tmp_sol.copy_from(w.pop.at(0));
                }
                return;
            }
            // the embedded VND is done: settle the shaking bookkeeping
            if shared
                .sense
                .is_better(w.pop.at(0).obj(), w.pop.at(1).obj())
            {
                Self::update_shaking_statistics(shared, core, w, true, elapsed);
                w.pop.copy_within(0, 1);
                w.shaking.reset(true);
                if update_now {
                    Self::check_global_best(shared, core, w, &mut wl.rng);
                }
                wl.tmp_sol.copy_from(w.pop.at(0));
            } else {
                // go back to the best solution before the last shaking
                Self::update_shaking_statistics(shared, core, w, false, elapsed);
                wl.tmp_sol.copy_from(w.pop.at(1));
                w.pop.update(0, &wl.tmp_sol);
            }
            return;
        }

        // a shaking method has been applied
        if shared.n_locimp == 0 {
            // no VND follows: the shaking result is handled immediately
            if wl.result.reconsider == Some(false) {
                w.shaking.do_not_reconsider_last();
            }
            if wl.result.accepted() {
                w.pop.copy_within(0, 1);
                Self::copy_better(shared, core, w, &wl.tmp_sol, update_now, elapsed);
                Self::update_shaking_statistics(shared, core, w, true, elapsed);
                w.shaking.reset(true);
            } else {
                Self::update_shaking_statistics(shared, core, w, false, elapsed);
                if update_now {
                    Self::check_global_best(shared, core, w, &mut wl.rng);
                }
                wl.tmp_sol.copy_from(w.pop.at(0));
            }
        } else {
            // a VND follows: merely stage the shaken solution for it
            if wl.result.accepted() {
                Self::copy_better(shared, core, w, &wl.tmp_sol, update_now, elapsed);
            } else {
                w.pop.update(0, &wl.tmp_sol);
            }
        }
    }

    /// Saves the accepted `tmp` as the worker's new incumbent and, when
    /// asynchronous updates are allowed and it beats the global best,
    /// publishes it to the scheduler's population.
    fn copy_better(
        shared: &Shared<S>,
        core: &mut SchedulerCore<S>,
        w: &mut WorkerSlot<S>,
        tmp: &S,
        update_now: bool,
        elapsed: f64,
    ) {
        w.pop.update(0, tmp);
        if update_now && improves_global(shared.sense, w.pop.at(0).obj(), &core.pop) {
            let sol = w.pop.at(0).clone();
            core.accept_global(&sol, elapsed);
        }
    }

    /// Migration: with probability `schpmig`, a worker whose incumbent lags
    /// behind the global best replaces it by a copy of the global best.
    fn check_global_best(
        shared: &Shared<S>,
        core: &mut SchedulerCore<S>,
        w: &mut WorkerSlot<S>,
        rng: &mut StdRng,
    ) {
        if shared
            .sense
            .is_worse(w.pop.at(0).obj(), core.pop.best_obj())
            && rng.gen::<f64>() <= shared.params.schpmig
        {
            let sol = core.pop.at(0).clone();
            w.pop.update(0, &sol);
        }
    }

    /// The statistics of a shaking method cover the entire shake + VND pair;
    /// they are settled here, once the embedded VND has completed.
    fn update_shaking_statistics(
        shared: &Shared<S>,
        core: &mut SchedulerCore<S>,
        w: &mut WorkerSlot<S>,
        improved: bool,
        elapsed: f64,
    ) {
        if let Some(idx) = w.shaking.last_method() {
            core.stats.add_time(idx, elapsed - w.shake_start);
            core.stats.count_iteration(idx);
            if improved {
                let gain = gain_between(w.pop.at(0).obj(), w.pop.at(1).obj());
                core.stats.record_success(idx, gain);
            }
            if shared.params.schshasel == SelectionStrategy::SelfAdaptive {
                w.shaking.reward_last(improved);
            }
        }
    }

    /// Per-call statistics. Construction and local improvement methods are
    /// accounted immediately; for shaking methods only the iteration counter
    /// and the net time are updated here (see
    /// [Self::update_shaking_statistics]).
    fn update_method_statistics(
        shared: &Shared<S>,
        crit: &mut Critical<S>,
        wl: &WorkerLocal<S>,
        midx: usize,
        method_time: f64,
    ) {
        let Critical { core, workers, .. } = crit;
        core.n_iteration += 1;
        if midx < shared.n_const + shared.n_locimp {
            core.stats.record_invocation(midx, method_time);
            if wl.result.improved() {
                let incumbent_obj = workers[wl.id].pop.at(0).obj();
                core.stats
                    .record_success(midx, gain_between(incumbent_obj, wl.tmp_sol.obj()));
            }
        } else {
            core.stats.add_net_time(midx, method_time);
        }
    }

    /// The synchronous-mode global update: adopts the best worker incumbent
    /// into the scheduler's population and performs the migration step with
    /// the dedicated deterministic generator.
    fn update_data_from_results(shared: &Shared<S>, crit: &mut Critical<S>) {
        let Critical {
            core,
            workers,
            initial_solution_exists,
            clock,
            global_rng,
            ..
        } = crit;
        if workers.is_empty() {
            return;
        }
        let mut best_i = 0;
        for i in 1..workers.len() {
            if shared.sense.is_better(
                workers[i].pop.at(0).obj(),
                workers[best_i].pop.at(0).obj(),
            ) {
                best_i = i;
            }
        }
        if improves_global(shared.sense, workers[best_i].pop.at(0).obj(), &core.pop) {
            *initial_solution_exists = true;
            let sol = workers[best_i].pop.at(0).clone();
            core.accept_global(&sol, clock.elapsed());
        }
        if shared.params.schpmig > 0.0 {
            for w in workers.iter_mut() {
                if shared
                    .sense
                    .is_worse(w.pop.at(0).obj(), core.pop.best_obj())
                    && global_rng.gen::<f64>() <= shared.params.schpmig
                {
                    let sol = core.pop.at(0).clone();
                    w.pop.update(0, &sol);
                }
            }
        }
    }

    /// Evaluates the full termination predicate (cancel flag, callback,
    /// oracle) and latches the global finish flag when it fires.
    fn evaluate_terminate(shared: &Shared<S>, crit: &mut Critical<S>) -> bool {
        if shared.finish.load(Ordering::SeqCst) {
            return true;
        }
        let best = crit.core.pop.best_obj();
        let stop = shared
            .callback
            .as_ref()
            .map(|cb| cb(best))
            .unwrap_or(false)
            || shared.criteria.should_stop(
                crit.core.n_iteration,
                crit.core.iter_best,
                Some(best),
                crit.clock.elapsed(),
            );
        if stop {
            shared.finish.store(true, Ordering::SeqCst);
        }
        stop
    }

    fn log_entry_of(crit: &mut Critical<S>) -> LogEntry {
        let elapsed = crit.clock.elapsed();
        let core = &mut crit.core;
        LogEntry {
            iteration: core.n_iteration,
            best: core.pop.best_obj(),
            worst: core.pop.worst_obj(),
            mean: core.pop.mean_obj(),
            dev: core.pop.dev_obj(),
            dup_eliminations: core.n_dup_eliminations,
            elapsed,
        }
    }

    /// Wakes up every worker possibly blocked on one of the monitors.
    fn broadcast_all(shared: &Shared<S>) {
        {
            let _guard = shared.lock_no_method.lock();
        }
        shared.cv_no_method.notify_all();
        Self::broadcast_sync(shared);
    }

    fn broadcast_sync(shared: &Shared<S>) {
        if !shared.sync {
            return;
        }
        {
            let _guard = shared.prep.lock();
        }
        shared.cv_prep.notify_all();
        {
            let _guard = shared.lock_order.lock();
        }
        shared.cv_order.notify_all();
    }
}

/// Renders the payload of a caught panic into a printable message.
fn panic_text(payload: Box<dyn std::any::Any + Send>) -> String {
    if let Some(s) = payload.downcast_ref::<&str>() {
        s.to_string()
    } else if let Some(s) = payload.downcast_ref::<String>() {
        s.clone()
    } else {
        "panic with non-textual payload".to_string()
    }
}

// ############################################################################
// #### TESTS #################################################################
// ############################################################################

/// Unlike the rest of the library, the scheduler module is not tested in
/// depth with fine grained unit tests (the interesting behavior only shows
/// when whole optimizations run). So we solve small ONEMAX instances with
/// known optima here and validate the end-to-end scenarios in the
/// integration tests.
#[cfg(test)]
mod test_gvns {
    use std::sync::atomic::{AtomicU64, Ordering};
    use std::sync::Arc;

    use rand::rngs::StdRng;
    use rand::Rng;

    use crate::*;

    #[derive(Clone)]
    struct OneMax {
        bits: Vec<bool>,
        cache: ObjectiveCache,
    }
    impl OneMax {
        fn new(n: usize) -> Self {
            OneMax {
                bits: vec![false; n],
                cache: ObjectiveCache::default(),
            }
        }
    }
    impl Solution for OneMax {
        fn objective(&self) -> f64 {
            self.bits.iter().filter(|b| **b).count() as f64
        }
        fn obj_cache(&self) -> &ObjectiveCache {
            &self.cache
        }
        fn equals(&self, other: &Self) -> bool {
            self.bits == other.bits
        }
        fn random_init(&mut self, _slot: usize, rng: &mut StdRng) {
            self.bits.iter_mut().for_each(|b| *b = rng.gen());
            self.invalidate();
        }
        fn hash_value(&self) -> u64 {
            self.bits
                .iter()
                .fold(0u64, |acc, b| (acc << 1) | (*b as u64))
        }
        fn write(&self, out: &mut dyn std::io::Write) -> std::io::Result<()> {
            for b in &self.bits {
                write!(out, "{}", *b as u8)?;
            }
            Ok(())
        }
    }

    fn params(threads: usize, sync: bool, titer: u64) -> Params {
        ParamsBuilder::default()
            .titer(Some(titer))
            .popsize(1)
            .schthreads(threads)
            .schsync(sync)
            .seed(17)
            .oname("NULL".to_string())
            .build()
            .unwrap()
    }

    fn build(n: usize, p: Params) -> Gvns<OneMax> {
        let mut gvns = Gvns::new(&OneMax::new(n), 1, 1, 3, p).unwrap();
        gvns.add_method(Box::new(MethodFunction::new(
            "cons",
            0,
            0,
            |sol: &mut OneMax, _, ctx: &mut MethodContext<OneMax>, _: &mut MethodResult| {
                sol.random_init(0, ctx.rng);
            },
        )))
        .unwrap();
        gvns.add_method(Box::new(MethodFunction::new(
            "flip1st",
            1,
            0,
            |sol: &mut OneMax, _, _: &mut MethodContext<OneMax>, res: &mut MethodResult| {
                match sol.bits.iter().position(|b| !b) {
                    Some(i) => {
                        sol.bits[i] = true;
                        sol.invalidate();
                    }
                    None => res.changed = false,
                }
            },
        )))
        .unwrap();
        for k in 1..=3 {
            gvns.add_method(Box::new(MethodFunction::new(
                format!("shake{k}"),
                1,
                k,
                |sol: &mut OneMax, k, ctx: &mut MethodContext<OneMax>, _: &mut MethodResult| {
                    for _ in 0..k {
                        let i = ctx.rng.gen_range(0..sol.bits.len());
                        sol.bits[i] = !sol.bits[i];
                    }
                    sol.invalidate();
                },
            )))
            .unwrap();
        }
        gvns
    }

    #[test]
    fn solves_onemax_on_a_single_thread() {
        let mut gvns = build(20, params(1, false, 1000));
        gvns.run().unwrap();
        assert_eq!(20.0, gvns.best_objective());
        let best = gvns.best_solution();
        assert!(best.bits.iter().all(|b| *b));
        assert!(gvns.iteration_of_best() <= gvns.n_iteration());
    }

    #[test]
    fn the_best_objective_is_monotonically_non_worsening() {
        let mut gvns = build(16, params(2, false, 400));
        let watermark = Arc::new(AtomicU64::new(0));
        let seen = Arc::clone(&watermark);
        gvns.set_callback(move |best| {
            let prev = f64::from_bits(seen.load(Ordering::SeqCst));
            assert!(best >= prev, "best degraded from {prev} to {best}");
            seen.store(best.to_bits(), Ordering::SeqCst);
            false
        });
        gvns.run().unwrap();
    }

    #[test]
    fn registering_too_many_methods_is_a_setup_error() {
        let mut gvns: Gvns<OneMax> = Gvns::new(&OneMax::new(4), 0, 0, 1, params(1, false, 10)).unwrap();
        gvns.add_method(Box::new(MethodFunction::new(
            "shake1",
            1,
            1,
            |_: &mut OneMax, _, _: &mut MethodContext<OneMax>, _: &mut MethodResult| {},
        )))
        .unwrap();
        let err = gvns.add_method(Box::new(MethodFunction::new(
            "extra",
            1,
            1,
            |_: &mut OneMax, _, _: &mut MethodContext<OneMax>, _: &mut MethodResult| {},
        )));
        assert!(matches!(err, Err(Error::Setup(_))));
    }

    #[test]
    fn running_with_missing_methods_is_a_setup_error() {
        let mut gvns: Gvns<OneMax> = Gvns::new(&OneMax::new(4), 1, 0, 1, params(1, false, 10)).unwrap();
        assert!(matches!(gvns.run(), Err(Error::Setup(_))));
    }

    #[test]
    fn construct_and_vnd_without_shaking_terminates_by_exhaustion() {
        let p = params(1, false, 100_000);
        let mut gvns = Gvns::new(&OneMax::new(12), 1, 1, 0, p).unwrap();
        gvns.add_method(Box::new(MethodFunction::new(
            "cons",
            0,
            0,
            |sol: &mut OneMax, _, ctx: &mut MethodContext<OneMax>, _: &mut MethodResult| {
                sol.random_init(0, ctx.rng);
            },
        )))
        .unwrap();
        gvns.add_method(Box::new(MethodFunction::new(
            "flip1st",
            1,
            0,
            |sol: &mut OneMax, _, _: &mut MethodContext<OneMax>, res: &mut MethodResult| {
                match sol.bits.iter().position(|b| !b) {
                    Some(i) => {
                        sol.bits[i] = true;
                        sol.invalidate();
                    }
                    None => res.changed = false,
                }
            },
        )))
        .unwrap();
        gvns.run().unwrap();
        // far fewer iterations than the cap: the method pool ran dry
        assert!(gvns.n_iteration() < 100);
        assert_eq!(12.0, gvns.best_objective());
    }

    #[test]
    fn sync_mode_with_one_thread_matches_async_mode() {
        let mut a = build(14, params(1, false, 300));
        a.run().unwrap();
        let mut b = build(14, params(1, true, 300));
        b.run().unwrap();
        assert_eq!(a.best_objective(), b.best_objective());
        assert_eq!(a.n_iteration(), b.n_iteration());
        assert_eq!(a.iteration_of_best(), b.iteration_of_best());
    }

    #[test]
    fn worker_panics_surface_after_joining() {
        let p = params(2, false, 1000);
        let mut gvns = Gvns::new(&OneMax::new(8), 1, 1, 0, p).unwrap();
        gvns.add_method(Box::new(MethodFunction::new(
            "cons",
            0,
            0,
            |sol: &mut OneMax, _, ctx: &mut MethodContext<OneMax>, _: &mut MethodResult| {
                sol.random_init(0, ctx.rng);
            },
        )))
        .unwrap();
        gvns.add_method(Box::new(MethodFunction::new(
            "boom",
            1,
            0,
            |_: &mut OneMax, _, _: &mut MethodContext<OneMax>, _: &mut MethodResult| {
                panic!("neighborhood exploded");
            },
        )))
        .unwrap();
        match gvns.run() {
            Err(Error::Worker(msg)) => assert!(msg.contains("neighborhood exploded")),
            other => panic!("expected a worker error, got {other:?}"),
        }
    }

    #[test]
    fn shaking_alone_still_improves_an_initialized_population() {
        // no construction and no local improvement methods: the workers
        // adopt the (externally initialized) global solution and shake it,
        // accepting improvements immediately
        let p = params(2, false, 500);
        let mut gvns = Gvns::new(&OneMax::new(16), 0, 0, 2, p).unwrap();
        for k in 1..=2 {
            gvns.add_method(Box::new(MethodFunction::new(
                format!("shake{k}"),
                1,
                k,
                |sol: &mut OneMax, k, ctx: &mut MethodContext<OneMax>, _: &mut MethodResult| {
                    for _ in 0..k {
                        let i = ctx.rng.gen_range(0..sol.bits.len());
                        sol.bits[i] = !sol.bits[i];
                    }
                    sol.invalidate();
                },
            )))
            .unwrap();
        }
        gvns.initialize_population();
        let initial = gvns.best_objective();
        gvns.run().unwrap();
        assert!(gvns.best_objective() >= initial);
        assert!(gvns.best_objective() > 8.0, "500 shakes should beat a coin flip");
        // workers still executing when the cap is hit finish their method
        assert!(gvns.n_iteration() >= 500);
        assert!(gvns.n_iteration() < 500 + 2);
    }

    #[test]
    fn a_known_primal_is_kept_until_beaten() {
        let mut gvns = build(10, params(1, false, 200));
        let mut primal = OneMax::new(10);
        primal.bits.iter_mut().take(9).for_each(|b| *b = true);
        gvns.set_incumbent(&primal);
        assert_eq!(9.0, gvns.best_objective());
        gvns.run().unwrap();
        assert_eq!(10.0, gvns.best_objective());
    }

    #[test]
    fn statistics_count_every_dispatched_method() {
        let mut gvns = build(12, params(1, false, 250));
        gvns.run().unwrap();
        let stats = gvns.statistics();
        assert!(stats.total_successes() <= stats.total_iterations());
        // the construction heuristic ran exactly once
        assert_eq!(1, stats.iterations(0));
        // the improvement neighborhood did most of the work
        assert!(stats.iterations(1) > 0);
    }
}
