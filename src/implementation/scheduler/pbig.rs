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

//! This module provides the population based iterated greedy (PBIG)
//! scheduler: a deliberately single threaded scheme that applies
//! destroy-and-recreate methods to a whole population, merging each completed
//! generation back against the current worst members.

use rand::rngs::StdRng;
use rand::SeedableRng;

use crate::implementation::scheduler::{gain_between, improves_global, Callback, SchedulerCore};
use crate::{
    Clock, ClockKind, Error, LogEntry, LogWriter, MethodContext, MethodPool, MethodResult,
    MethodSelector, MethodStats, OptDirection, Params, Population, Result, SchedulerMethod,
    SelectionStrategy, Solution, TerminationCriteria,
};

// ----------------------------------------------------------------------------
// --- PBIG -------------------------------------------------------------------
// ----------------------------------------------------------------------------

/// The population based iterated greedy scheduler.
///
/// The first registered method must be a randomized construction heuristic;
/// it initializes the whole population in generation 0. All further methods
/// are destroy-and-recreate operators, conventionally ordered by increasing
/// destruction rate. Each population slot cycles through the operators with
/// its own sequential selector; after every `|P|` candidate productions the
/// candidates are merged: a candidate that beats the current worst member
/// replaces it (and that slot's operator sequence starts over).
pub struct Pbig<S: Solution> {
    methods: MethodPool<S>,
    params: Params,
    sense: OptDirection,
    criteria: TerminationCriteria,
    clock_kind: ClockKind,
    callback: Option<Callback>,
    core: SchedulerCore<S>,
    constheu: MethodSelector,
    destrec: Vec<MethodSelector>,
    /// the generation under construction, one candidate per slot
    pop2: Vec<S>,
    log: LogWriter,
    rng: StdRng,
    clock: Clock,
    finish: bool,
    n_destrec: usize,
}

impl<S: Solution> Pbig<S> {
    /// Creates a new PBIG scheduler for solutions modeled after `template`,
    /// expecting one construction method followed by `n_destrec >= 1`
    /// destroy-and-recreate methods.
    pub fn new(template: &S, n_destrec: usize, params: Params) -> Result<Self> {
        params.validate()?;
        if n_destrec == 0 {
            return Err(Error::Setup(
                "PBIG needs at least one destroy-and-recreate method".to_string(),
            ));
        }
        let sense = params.sense();
        let clock_kind = params.clock_kind();
        let criteria = params.termination();
        // the worst member is replaced over and over: keep the worst-heap
        let pop = Population::new(template, params.popsize, sense, params.dupelim, true);
        let log = LogWriter::from_params(&params, sense)?;
        let rng = StdRng::seed_from_u64(params.derived_seed());

        let mut constheu = MethodSelector::new(SelectionStrategy::SequentialRep);
        constheu.add(0);
        let destrec = (0..params.popsize)
            .map(|_| {
                let mut sel = MethodSelector::new(SelectionStrategy::SequentialRep);
                for i in 1..=n_destrec {
                    sel.add(i);
                }
                sel
            })
            .collect();
        let pop2 = (0..params.popsize).map(|_| template.clone()).collect();

        Ok(Pbig {
            methods: MethodPool::default(),
            params,
            sense,
            criteria,
            clock_kind,
            callback: None,
            core: SchedulerCore::new(pop),
            constheu,
            destrec,
            pop2,
            log,
            rng,
            clock: Clock::start(clock_kind),
            finish: false,
            n_destrec,
        })
    }

    /// Registers the next method: index 0 is the construction heuristic,
    /// indices 1..=n the destroy-and-recreate operators.
    pub fn add_method(&mut self, method: Box<dyn SchedulerMethod<S>>) -> Result<usize> {
        if self.methods.len() == 1 + self.n_destrec {
            return Err(Error::Setup(format!(
                "method pool already holds the declared {} methods",
                1 + self.n_destrec
            )));
        }
        let idx = self.methods.add(method);
        self.core.stats.push_method();
        Ok(idx)
    }

    /// Sets the cancel callback (see the GVNS counterpart).
    pub fn set_callback<F>(&mut self, callback: F)
    where
        F: Fn(f64) -> bool + Send + Sync + 'static,
    {
        self.callback = Some(Box::new(callback));
    }

    /// Requests cooperative termination.
    pub fn terminate(&mut self) {
        self.finish = true;
    }

    /// Resets the scheduler for an independent new run. Method statistics
    /// keep aggregating over runs.
    pub fn reset(&mut self) {
        self.core.reset_run();
        self.finish = false;
        self.constheu.reset(true);
        for sel in &mut self.destrec {
            sel.reset(true);
        }
    }

    /// Runs the optimization until the termination oracle fires or the
    /// callback cancels it.
    pub fn run(&mut self) -> Result<()> {
        if self.methods.len() != 1 + self.n_destrec {
            return Err(Error::Setup(format!(
                "{} methods registered but {} declared",
                self.methods.len(),
                1 + self.n_destrec
            )));
        }
        self.clock = Clock::start(self.clock_kind);
        self.log.write_header()?;
        let entry = Self::log_entry_of(&mut self.core, &self.clock);
        self.log.write_entry(entry, true)?;

        if !self.check_terminate() {
            loop {
                let termnow = self.perform_iteration()?;
                if termnow {
                    break;
                }
            }
        }

        self.log.empty_entry()?;
        self.log.flush()?;
        Ok(())
    }

    /// One PBIG iteration: select a method for the due slot, produce a
    /// candidate, and merge the generation once it is complete. Returns true
    /// when the run must stop.
    fn perform_iteration(&mut self) -> Result<bool> {
        let Pbig {
            methods,
            sense,
            core,
            constheu,
            destrec,
            pop2,
            rng,
            clock,
            ..
        } = self;
        let sense = *sense;
        let psize = core.pop.len();
        let s = (core.n_iteration as usize) % psize;

        // generation 0 is produced by the construction heuristic, every
        // later one by the slot's own destroy-and-recreate sequence
        let constructing = (core.n_iteration as usize) < psize;
        let sel = if constructing {
            &mut *constheu
        } else {
            &mut destrec[s]
        };
        let midx = sel
            .select(rng, &core.stats)
            .expect("sequential selectors never run dry");
        let call_counter = sel.call_count_of_last();

        pop2[s].copy_from(core.pop.at(s));

        let mut result = MethodResult::default();
        let timer = Clock::start(clock.kind());
        let sub_iterations;
        {
            let mut ctx = MethodContext {
                worker: 0,
                call_counter,
                incumbent: core.pop.at(s),
                rng,
                sub_iterations: 0,
            };
            methods.get(midx).run(&mut pop2[s], &mut ctx, &mut result);
            sub_iterations = ctx.sub_iterations;
        }
        let method_time = timer.elapsed();
        // candidates are judged against the globally best solution
        result.finalize(sense, pop2[s].obj(), core.pop.best_obj());

        core.n_sub_iterations += sub_iterations;
        core.n_iteration += 1;
        core.stats.record_invocation(midx, method_time);
        if result.improved() {
            let gain = gain_between(core.pop.best_obj(), pop2[s].obj());
            core.stats.record_success(midx, gain);
        }

        let termnow = self.check_terminate();
        let entry = Self::log_entry_of(&mut self.core, &self.clock);
        self.log.write_entry(entry, termnow)?;

        self.merge_generation_if_complete();

        Ok(termnow || self.check_terminate())
    }

    /// After every `|P|` candidate productions, the generation is merged into
    /// the population: generation 0 replaces it wholesale, later generations
    /// replace the current worst member whenever a candidate beats it.
    fn merge_generation_if_complete(&mut self) {
        let Pbig {
            sense,
            core,
            destrec,
            pop2,
            clock,
            ..
        } = self;
        let sense = *sense;
        let psize = core.pop.len();
        let it = core.n_iteration as usize;

        if it == psize {
            // adopt the first generation of constructed solutions
            for i in 0..psize {
                core.pop.swap_slot(i, &mut pop2[i]);
            }
            core.pop.rebuild_index();
            core.iter_best = core.n_iteration;
            core.time_best = clock.elapsed();
        } else if it > psize && it % psize == 0 {
            for i in 0..psize {
                // a candidate duplicating an existing member replaces that
                // member in place instead of the worst slot
                if core.pop.dupelim().checks_children() {
                    if let Some(d) = core.pop.find_duplicate(&pop2[i]) {
                        core.n_dup_eliminations += 1;
                        core.pop.swap_slot(d, &mut pop2[i]);
                        destrec[d].reset(false);
                        continue;
                    }
                }
                let r = core.pop.worst_index();
                if sense.is_worse(core.pop.at(r).obj(), pop2[i].obj()) {
                    let improved_best = improves_global(sense, pop2[i].obj(), &core.pop);
                    core.pop.swap_slot(r, &mut pop2[i]);
                    if improved_best {
                        core.iter_best = core.n_iteration;
                        core.time_best = clock.elapsed();
                    }
                    // the slot holds a new member: restart its sequence
                    destrec[r].reset(false);
                }
            }
        }
    }

    /// Evaluates the full termination predicate and latches the finish flag.
    fn check_terminate(&mut self) -> bool {
        if self.finish {
            return true;
        }
        let best = self.core.pop.best_obj();
        let stop = self
            .callback
            .as_ref()
            .map(|cb| cb(best))
            .unwrap_or(false)
            || self.criteria.should_stop(
                self.core.n_iteration,
                self.core.iter_best,
                Some(best),
                self.clock.elapsed(),
            );
        if stop {
            self.finish = true;
        }
        stop
    }

    fn log_entry_of(core: &mut SchedulerCore<S>, clock: &Clock) -> LogEntry {
        LogEntry {
            iteration: core.n_iteration,
            best: core.pop.best_obj(),
            worst: core.pop.worst_obj(),
            mean: core.pop.mean_obj(),
            dev: core.pop.dev_obj(),
            dup_eliminations: core.n_dup_eliminations,
            elapsed: clock.elapsed(),
        }
    }

    // ------------------------------------------------------------------------
    // -- accessors -----------------------------------------------------------
    // ------------------------------------------------------------------------

    /// The objective value of the globally best solution.
    pub fn best_objective(&self) -> f64 {
        self.core.pop.best_obj()
    }

    /// A copy of the globally best solution.
    pub fn best_solution(&self) -> S {
        self.core.pop.best().clone()
    }

    /// Saves the globally best solution to `path` (`"NULL"` discards).
    pub fn save_best(&self, path: &str) -> Result<()> {
        self.core.pop.best().save(path)
    }

    /// Borrows the scheduler's population.
    pub fn population(&self) -> &Population<S> {
        &self.core.pop
    }

    /// The number of completed method applications.
    pub fn n_iteration(&self) -> u64 {
        self.core.n_iteration
    }

    /// The iteration in which the current global best was accepted.
    pub fn iteration_of_best(&self) -> u64 {
        self.core.iter_best
    }

    /// The number of duplicate candidates eliminated during merges.
    pub fn n_dup_eliminations(&self) -> u64 {
        self.core.n_dup_eliminations
    }

    /// A snapshot of the per-method statistics.
    pub fn statistics(&self) -> MethodStats {
        self.core.stats.clone()
    }

    /// Prints the overall report: best solution, effort, per-method table.
    pub fn print_statistics(&self, out: &mut dyn std::io::Write) -> Result<()> {
        let names: Vec<&str> = (0..self.methods.len())
            .map(|i| self.methods.name(i))
            .collect();
        self.core.print_report(out, &names, self.clock.elapsed())?;
        Ok(())
    }
}

// ############################################################################
// #### TESTS #################################################################
// ############################################################################

#[cfg(test)]
mod test_pbig {
    use rand::rngs::StdRng;
    use rand::Rng;

    use crate::*;

    /// A toy problem: maximize the value of a single integer in 0..=1000.
    /// Construction draws a random value, destroy-and-recreate re-draws a
    /// part of it.
    #[derive(Clone)]
    struct Num {
        val: i64,
        cache: ObjectiveCache,
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
            self.val = rng.gen_range(0..=1000);
            self.invalidate();
        }
        fn hash_value(&self) -> u64 {
            self.val as u64
        }
        fn write(&self, out: &mut dyn std::io::Write) -> std::io::Result<()> {
            write!(out, "{}", self.val)
        }
    }

    fn build(titer: u64, popsize: usize) -> Pbig<Num> {
        let params = ParamsBuilder::default()
            .titer(Some(titer))
            .popsize(popsize)
            .seed(3)
            .oname("NULL".to_string())
            .build()
            .unwrap();
        let template = Num {
            val: -1,
            cache: ObjectiveCache::default(),
        };
        let mut pbig = Pbig::new(&template, 2, params).unwrap();
        pbig.add_method(Box::new(MethodFunction::new(
            "cons",
            0,
            0,
            |sol: &mut Num, _, ctx: &mut MethodContext<Num>, _: &mut MethodResult| {
                sol.random_init(0, ctx.rng);
            },
        )))
        .unwrap();
        for k in 1..=2i32 {
            pbig.add_method(Box::new(MethodFunction::new(
                format!("dr{k}"),
                1,
                k,
                |sol: &mut Num, k, ctx: &mut MethodContext<Num>, _: &mut MethodResult| {
                    // destroy k decimal digits and re-draw them
                    let modulus = 10i64.pow(k as u32);
                    sol.val = (sol.val / modulus) * modulus + ctx.rng.gen_range(0..modulus);
                    sol.invalidate();
                },
            )))
            .unwrap();
        }
        pbig
    }

    #[test]
    fn the_first_generation_replaces_the_whole_population() {
        let mut pbig = build(4, 4);
        pbig.run().unwrap();
        // after exactly |P| applications every member was constructed
        assert_eq!(4, pbig.n_iteration());
        for i in 0..4 {
            assert!(pbig.population().at(i).val >= 0);
        }
    }

    #[test]
    fn the_best_never_worsens_across_generations() {
        let mut pbig = build(200, 5);
        pbig.set_callback({
            let watermark = std::sync::Mutex::new(f64::NEG_INFINITY);
            move |best| {
                let mut prev = watermark.lock().unwrap();
                assert!(best >= *prev, "best degraded from {} to {best}", *prev);
                *prev = best;
                false
            }
        });
        pbig.run().unwrap();
        assert!(pbig.best_objective() >= 0.0);
        assert!(pbig.iteration_of_best() <= pbig.n_iteration());
    }

    #[test]
    fn missing_methods_are_a_setup_error() {
        let params = ParamsBuilder::default()
            .popsize(2)
            .oname("NULL".to_string())
            .build()
            .unwrap();
        let template = Num {
            val: 0,
            cache: ObjectiveCache::default(),
        };
        let mut pbig = Pbig::new(&template, 1, params).unwrap();
        assert!(matches!(pbig.run(), Err(Error::Setup(_))));
        assert!(matches!(
            Pbig::new(&template, 0, ParamsBuilder::default().build().unwrap()),
            Err(Error::Setup(_))
        ));
    }

    #[test]
    fn termination_fires_within_one_round_of_the_cap() {
        let mut pbig = build(100, 8);
        pbig.run().unwrap();
        assert_eq!(100, pbig.n_iteration());
    }
}
