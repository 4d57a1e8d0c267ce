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

//! This module defines the abstraction for the *methods* a scheduler drives:
//! construction heuristics, local improvement neighborhoods, shaking or large
//! neighborhood search moves, and destroy-and-recreate operators. A method is
//! a named, arity-tagged callable bound to a concrete solution type, carrying
//! an integer control parameter (e.g., a neighborhood size).

use rand::rngs::StdRng;

use crate::{OptDirection, Solution};

// ----------------------------------------------------------------------------
// --- METHOD CONTEXT ---------------------------------------------------------
// ----------------------------------------------------------------------------

/// The context a method receives for a single invocation. It replaces the
/// back-pointers of classical object oriented designs: everything a method
/// may want to know about its caller is passed down explicitly.
pub struct MethodContext<'a, S> {
    /// The id of the worker on whose behalf the method runs.
    pub worker: usize,
    /// How often this method has already been called for the current solution
    /// (0 on the first call). Selectors maintain this count and reset it
    /// whenever the solution identity changes.
    pub call_counter: usize,
    /// The worker's incumbent solution, for reference in cost-delta
    /// computations. The method must leave it untouched; the solution to be
    /// modified is the one passed to [SchedulerMethod::run] directly.
    pub incumbent: &'a S,
    /// The worker-owned random number generator. Using it (rather than any
    /// global source of randomness) is what keeps runs reproducible per
    /// thread.
    pub rng: &'a mut StdRng,
    /// Iterations spent in nested schedulers during this call. A method that
    /// runs a whole sub-optimization should add the sub-scheduler's iteration
    /// count here so that it shows up in the outer statistics.
    pub sub_iterations: u64,
}

// ----------------------------------------------------------------------------
// --- METHOD RESULT ----------------------------------------------------------
// ----------------------------------------------------------------------------

/// The outcome of a single method application. A method only needs to fill in
/// the fields it can answer cheaply; everything left at its sentinel value is
/// derived by the scheduler right after the call:
///
/// * `better` defaults to "compare the modified solution to the incumbent"
///   when the method reported a change, and to `false` otherwise,
/// * `accept` defaults to the value of `better`,
/// * `reconsider` stays tri-state: `None` leaves the decision to the
///   scheduler (a local improvement that did not change the solution is not
///   reconsidered), `Some(false)` bans the method for the current solution,
///   `Some(true)` keeps it schedulable.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct MethodResult {
    /// Did the method actually change the solution?
    pub changed: bool,
    /// Is the resulting solution strictly better than the incumbent?
    pub better: Option<bool>,
    /// Shall the resulting solution become the new incumbent?
    pub accept: Option<bool>,
    /// Should this method be scheduled again for the same solution?
    pub reconsider: Option<bool>,
}

impl Default for MethodResult {
    fn default() -> Self {
        MethodResult {
            changed: true,
            better: None,
            accept: None,
            reconsider: None,
        }
    }
}

impl MethodResult {
    /// Resets all fields to their sentinel values. Called before each method
    /// invocation.
    pub fn reset(&mut self) {
        *self = MethodResult::default();
    }

    /// Fills in the fields the method left unspecified, given the objective
    /// values of the modified solution and of the incumbent. `reconsider` is
    /// deliberately left untouched.
    pub fn finalize(&mut self, sense: OptDirection, sol_obj: f64, incumbent_obj: f64) {
        if self.changed {
            if self.better.is_none() {
                self.better = Some(sense.is_better(sol_obj, incumbent_obj));
            }
            if self.accept.is_none() {
                self.accept = self.better;
            }
        } else {
            self.better = Some(false);
            if self.accept.is_none() {
                self.accept = Some(false);
            }
        }
    }

    /// Convenience accessor: was the solution accepted? Only meaningful after
    /// [Self::finalize].
    pub fn accepted(&self) -> bool {
        self.accept == Some(true)
    }

    /// Convenience accessor: was the solution an improvement? Only meaningful
    /// after [Self::finalize].
    pub fn improved(&self) -> bool {
        self.better == Some(true)
    }
}

// ----------------------------------------------------------------------------
// --- SCHEDULER METHOD -------------------------------------------------------
// ----------------------------------------------------------------------------

/// A method that can be scheduled: a construction heuristic (arity 0, creates
/// a solution from scratch, overwriting whatever it is handed) or a
/// transformation of an existing solution (arity 1, e.g. a neighborhood
/// search or a destroy-and-recreate operator).
///
/// Most client code will not implement this trait directly but instantiate
/// [MethodFunction] with a closure.
pub trait SchedulerMethod<S: Solution>: Send + Sync {
    /// The method's unique name (shows up in logs and statistics).
    fn name(&self) -> &str;

    /// The number of input solutions the method consumes: 0 or 1.
    fn arity(&self) -> usize;

    /// Applies the method to `sol`. Mutating implementations must invalidate
    /// (or refresh) the solution's cached objective and report what happened
    /// through `result`.
    fn run(&self, sol: &mut S, ctx: &mut MethodContext<'_, S>, result: &mut MethodResult);
}

/// The standard way of turning a closure into a [SchedulerMethod]. The stored
/// integer parameter is passed to the closure on every call; it typically
/// controls the neighborhood size, a destruction rate, or a randomization
/// factor, and allows one function to serve as a whole family of methods.
///
/// # Example
/// ```
/// # use mhsched::*;
/// # #[derive(Clone)]
/// # struct Bits { data: Vec<bool>, cache: ObjectiveCache }
/// # impl Solution for Bits {
/// #     fn objective(&self) -> f64 { self.data.iter().filter(|b| **b).count() as f64 }
/// #     fn obj_cache(&self) -> &ObjectiveCache { &self.cache }
/// #     fn equals(&self, o: &Self) -> bool { self.data == o.data }
/// #     fn random_init(&mut self, _: usize, _: &mut rand::rngs::StdRng) {}
/// #     fn write(&self, _: &mut dyn std::io::Write) -> std::io::Result<()> { Ok(()) }
/// # }
/// use rand::Rng;
///
/// // one shaking method per perturbation strength k = 1..=5
/// let shakes = (1..=5).map(|k| {
///     MethodFunction::<Bits>::new(format!("shake{k}"), 1, k, |sol, k, ctx, _res| {
///         for _ in 0..k {
///             let i = ctx.rng.gen_range(0..sol.data.len());
///             sol.data[i] = !sol.data[i];
///         }
///         sol.invalidate();
///     })
/// });
/// assert_eq!(5, shakes.count());
/// ```
pub struct MethodFunction<S> {
    name: String,
    arity: usize,
    par: i32,
    #[allow(clippy::type_complexity)]
    body: Box<dyn Fn(&mut S, i32, &mut MethodContext<'_, S>, &mut MethodResult) + Send + Sync>,
}

impl<S: Solution> MethodFunction<S> {
    /// Creates a new named method of the given arity, remembering `par` and
    /// passing it to `body` on every invocation.
    pub fn new<F>(name: impl Into<String>, arity: usize, par: i32, body: F) -> Self
    where
        F: Fn(&mut S, i32, &mut MethodContext<'_, S>, &mut MethodResult) + Send + Sync + 'static,
    {
        debug_assert!(arity <= 1);
        MethodFunction {
            name: name.into(),
            arity,
            par,
            body: Box::new(body),
        }
    }

    /// The integer control parameter bound to this method.
    pub fn par(&self) -> i32 {
        self.par
    }
}

impl<S: Solution> SchedulerMethod<S> for MethodFunction<S> {
    fn name(&self) -> &str {
        &self.name
    }

    fn arity(&self) -> usize {
        self.arity
    }

    fn run(&self, sol: &mut S, ctx: &mut MethodContext<'_, S>, result: &mut MethodResult) {
        (self.body)(sol, self.par, ctx, result)
    }
}

// ----------------------------------------------------------------------------
// --- METHOD POOL ------------------------------------------------------------
// ----------------------------------------------------------------------------

/// The ordered collection of methods registered with a scheduler. Methods are
/// assigned dense indices in insertion order; the scheduler constructors
/// state how the pool is partitioned into blocks (construction methods first,
/// then local improvement, then shaking).
pub struct MethodPool<S> {
    methods: Vec<Box<dyn SchedulerMethod<S>>>,
}

impl<S: Solution> Default for MethodPool<S> {
    fn default() -> Self {
        MethodPool { methods: vec![] }
    }
}

impl<S: Solution> MethodPool<S> {
    /// Appends a method to the pool and returns its assigned index.
    pub fn add(&mut self, method: Box<dyn SchedulerMethod<S>>) -> usize {
        self.methods.push(method);
        self.methods.len() - 1
    }

    /// Borrows the method with the given index.
    pub fn get(&self, idx: usize) -> &dyn SchedulerMethod<S> {
        self.methods[idx].as_ref()
    }

    /// The name of the method with the given index.
    pub fn name(&self, idx: usize) -> &str {
        self.methods[idx].name()
    }

    /// The total number of registered methods.
    pub fn len(&self) -> usize {
        self.methods.len()
    }

    /// True iff no method has been registered.
    pub fn is_empty(&self) -> bool {
        self.methods.is_empty()
    }
}

// ############################################################################
// #### TESTS #################################################################
// ############################################################################
