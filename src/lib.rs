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


//! # MHSCHED
//! MHSCHED is a truly generic framework to develop scheduler based
//! metaheuristics in Rust: GRASP, variable neighborhood search (VNS) and
//! descent (VND), generalized VNS, large neighborhood search, and (population
//! based) iterated greedy approaches are all instances of one uniform model.
//! You describe your problem by implementing the [Solution] trait and by
//! registering a pool of named *methods* -- construction heuristics, local
//! improvement neighborhoods and shaking moves -- and the scheduler decides
//! which method to apply when, maintains the global best, and terminates on
//! the configured criteria.
//!
//! ## Side benefit
//! As a side benefit from using mhsched, you will be able to exploit all of
//! your hardware: the GVNS scheduler drives its workers over as many threads
//! as you request, either fully asynchronously or -- when reproducibility
//! matters more than raw speed -- in a deterministic synchronized mode.
//!
//! ## Quick Example
//! The following presents a minimalistic use of mhsched. It solves the
//! (admittedly trivial) ONEMAX problem: maximize the number of one-bits in a
//! bit vector. This example is shown for illustration purpose because
//! chances are high anybody is already comfortable with the problem
//! definition.
//!
//! #### Describe your candidate solutions
//! The first thing to do is to implement the [Solution] trait for your
//! problem specific solution type. The objective value is evaluated lazily:
//! the framework only recomputes it when a method invalidated the embedded
//! cache.
//! ```
//! use mhsched::*;
//! use rand::Rng;
//!
//! #[derive(Clone)]
//! struct OneMax {
//!     bits: Vec<bool>,
//!     cache: ObjectiveCache,
//! }
//! impl OneMax {
//!     fn new(n: usize) -> Self {
//!         OneMax { bits: vec![false; n], cache: ObjectiveCache::default() }
//!     }
//! }
//! impl Solution for OneMax {
//!     // the actual objective function counts the bits set to one
//!     fn objective(&self) -> f64 {
//!         self.bits.iter().filter(|b| **b).count() as f64
//!     }
//!     fn obj_cache(&self) -> &ObjectiveCache {
//!         &self.cache
//!     }
//!     fn equals(&self, other: &Self) -> bool {
//!         self.bits == other.bits
//!     }
//!     fn random_init(&mut self, _slot: usize, rng: &mut rand::rngs::StdRng) {
//!         self.bits.iter_mut().for_each(|b| *b = rng.gen());
//!         self.invalidate();
//!     }
//!     fn write(&self, out: &mut dyn std::io::Write) -> std::io::Result<()> {
//!         for b in &self.bits {
//!             write!(out, "{}", *b as u8)?;
//!         }
//!         Ok(())
//!     }
//! }
//! ```
//!
//! #### Register methods and run the scheduler
//! Methods are closures wrapped into [MethodFunction] values, tagged with an
//! arity (0 = creates a solution from scratch, 1 = transforms its input) and
//! an integer control parameter -- here the shaking strength. The scheduler
//! is told how many construction, local improvement and shaking methods to
//! expect, in that order.
//! ```
//! # use mhsched::*;
//! # use rand::Rng;
//! # #[derive(Clone)]
//! # struct OneMax { bits: Vec<bool>, cache: ObjectiveCache }
//! # impl OneMax {
//! #     fn new(n: usize) -> Self { OneMax { bits: vec![false; n], cache: ObjectiveCache::default() } }
//! # }
//! # impl Solution for OneMax {
//! #     fn objective(&self) -> f64 { self.bits.iter().filter(|b| **b).count() as f64 }
//! #     fn obj_cache(&self) -> &ObjectiveCache { &self.cache }
//! #     fn equals(&self, o: &Self) -> bool { self.bits == o.bits }
//! #     fn random_init(&mut self, _: usize, rng: &mut rand::rngs::StdRng) {
//! #         self.bits.iter_mut().for_each(|b| *b = rng.gen());
//! #         self.invalidate();
//! #     }
//! #     fn write(&self, out: &mut dyn std::io::Write) -> std::io::Result<()> { Ok(()) }
//! # }
//! // 1. Configure the run: 500 iterations, a single thread, quiet output.
//! let params = ParamsBuilder::default()
//!     .titer(Some(500))
//!     .popsize(1)
//!     .seed(1)
//!     .oname("NULL".to_string())
//!     .build()
//!     .unwrap();
//!
//! // 2. Create the scheduler: 1 construction + 1 improvement + 3 shakings.
//! let mut gvns = Gvns::new(&OneMax::new(20), 1, 1, 3, params).unwrap();
//!
//! // 3. Register the methods, block by block.
//! gvns.add_method(Box::new(MethodFunction::new("cons", 0, 0,
//!     |sol: &mut OneMax, _, ctx, _| sol.random_init(0, ctx.rng),
//! ))).unwrap();
//! gvns.add_method(Box::new(MethodFunction::new("flip1st", 1, 0,
//!     |sol: &mut OneMax, _, _, res| match sol.bits.iter().position(|b| !b) {
//!         Some(i) => { sol.bits[i] = true; sol.invalidate(); }
//!         None => res.changed = false,
//!     },
//! ))).unwrap();
//! for k in 1..=3 {
//!     gvns.add_method(Box::new(MethodFunction::new(format!("shake{k}"), 1, k,
//!         |sol: &mut OneMax, k, ctx, _| {
//!             for _ in 0..k {
//!                 let i = ctx.rng.gen_range(0..sol.bits.len());
//!                 sol.bits[i] = !sol.bits[i];
//!             }
//!             sol.invalidate();
//!         },
//!     ))).unwrap();
//! }
//!
//! // 4. Run and harvest the result.
//! gvns.run().unwrap();
//! assert_eq!(20.0, gvns.best_objective());
//! ```
//!
//! ## Going further / Getting a grasp on the codebase
//! The easiest way to get your way around with mhsched is probably to start
//! exploring the available APIs and then to move to the exploration of the
//! tests. For the APIs, you are encouraged to start with the [Solution]
//! trait and the [MethodFunction] wrapper, which define everything a client
//! must provide. After that, it is interesting to look at [Params] (every
//! knob of the schedulers, including the `--name value` command line
//! convention), at [Gvns] for the parallel generalized VNS, and at [Pbig]
//! for the population based iterated greedy scheme.

mod common;
mod abstraction;
mod implementation;

pub use common::*;
pub use abstraction::*;
pub use implementation::*;
