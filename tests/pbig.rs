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

//! End-to-end check of the population based iterated greedy scheduler on a
//! permutation problem: maximize the number of fixed points of a
//! permutation, with destroy-and-recreate methods of increasing destruction
//! rate. The all-zero template is not a permutation and reports the invalid
//! objective -1, which makes it easy to observe that the first generation
//! replaced the whole population.

use std::sync::Arc;

use parking_lot::Mutex;
use rand::rngs::StdRng;
use rand::seq::SliceRandom;

use mhsched::*;

const VARS: usize = 20;
const POPSIZE: usize = 8;

#[derive(Clone)]
struct PermSol {
    data: Vec<usize>,
    cache: ObjectiveCache,
}

impl PermSol {
    fn new(n: usize) -> Self {
        PermSol {
            data: vec![0; n],
            cache: ObjectiveCache::default(),
        }
    }

    fn is_permutation(&self) -> bool {
        let mut seen = vec![false; self.data.len()];
        self.data.iter().all(|&v| {
            if v >= seen.len() || seen[v] {
                false
            } else {
                seen[v] = true;
                true
            }
        })
    }

    /// Destroy-and-recreate: remove the values of k random positions and
    /// greedily reinsert each at its home position when that position was
    /// freed too, at a random freed position otherwise.
    fn destroy_and_recreate(&mut self, k: i32, rng: &mut StdRng) {
        let n = self.data.len();
        let mut positions: Vec<usize> = (0..n).collect();
        positions.shuffle(rng);
        let mut freed: Vec<usize> = positions.into_iter().take(k as usize).collect();
        let mut values: Vec<usize> = freed.iter().map(|&p| self.data[p]).collect();

        // greedy recreation: home positions first
        values.sort_unstable();
        freed.sort_unstable();
        let mut leftover_vals = vec![];
        for v in values {
            if let Ok(i) = freed.binary_search(&v) {
                let p = freed.remove(i);
                self.data[p] = v;
            } else {
                leftover_vals.push(v);
            }
        }
        leftover_vals.shuffle(rng);
        for (p, v) in freed.into_iter().zip(leftover_vals) {
            self.data[p] = v;
        }
        self.invalidate();
    }
}

impl Solution for PermSol {
    fn objective(&self) -> f64 {
        if !self.is_permutation() {
            return -1.0;
        }
        self.data
            .iter()
            .enumerate()
            .filter(|(i, v)| i == *v)
            .count() as f64
    }

    fn obj_cache(&self) -> &ObjectiveCache {
        &self.cache
    }

    fn equals(&self, other: &Self) -> bool {
        self.data == other.data
    }

    fn random_init(&mut self, _slot: usize, rng: &mut StdRng) {
        self.data = (0..self.data.len()).collect();
        self.data.shuffle(rng);
        self.invalidate();
    }

    fn hash_value(&self) -> u64 {
        self.data
            .iter()
            .fold(0u64, |acc, v| acc.rotate_left(5) ^ (*v as u64))
    }

    fn write(&self, out: &mut dyn std::io::Write) -> std::io::Result<()> {
        for (i, v) in self.data.iter().enumerate() {
            if i > 0 {
                write!(out, " ")?;
            }
            write!(out, "{v}")?;
        }
        Ok(())
    }
}

fn perm_pbig(titer: u64) -> Pbig<PermSol> {
    let params = ParamsBuilder::default()
        .titer(Some(titer))
        .popsize(POPSIZE)
        .seed(11)
        .oname("NULL".to_string())
        .build()
        .unwrap();
    let mut pbig = Pbig::new(&PermSol::new(VARS), 3, params).unwrap();
    pbig.add_method(Box::new(MethodFunction::new(
        "conh0",
        0,
        0,
        |sol: &mut PermSol, _, ctx: &mut MethodContext<PermSol>, _: &mut MethodResult| {
            sol.random_init(0, ctx.rng);
        },
    )))
    .unwrap();
    // three destroy-and-recreate methods with increasing destruction rates
    for (i, k) in [4, 8, 12].into_iter().enumerate() {
        pbig.add_method(Box::new(MethodFunction::new(
            format!("dr{}", i + 1),
            1,
            k,
            |sol: &mut PermSol, k, ctx: &mut MethodContext<PermSol>, _: &mut MethodResult| {
                sol.destroy_and_recreate(k, ctx.rng);
            },
        )))
        .unwrap();
    }
    pbig
}

#[test]
fn the_first_round_constructs_the_whole_population() {
    let mut pbig = perm_pbig(POPSIZE as u64);
    pbig.run().unwrap();

    assert_eq!(POPSIZE as u64, pbig.n_iteration());
    for i in 0..POPSIZE {
        // the invalid all-zero template is gone from every slot
        assert!(pbig.population().at(i).is_permutation());
        assert!(pbig.population().at(i).obj() >= 0.0);
    }
}

#[test]
fn the_global_best_is_non_worsening_across_batches() {
    let mut pbig = perm_pbig(500);
    let watermark = Arc::new(Mutex::new(f64::NEG_INFINITY));
    let seen = Arc::clone(&watermark);
    pbig.set_callback(move |best| {
        let mut prev = seen.lock();
        assert!(best >= *prev, "best degraded from {} to {best}", *prev);
        *prev = best;
        false
    });
    pbig.run().unwrap();

    assert_eq!(500, pbig.n_iteration());
    assert!(pbig.best_objective() >= 0.0);
    assert!(pbig.best_solution().is_permutation());
}

#[test]
fn winning_candidates_replace_the_worst_member() {
    // same seed: the short run observes the state right after generation 0,
    // the long run must have merged at least one improving candidate
    let mut young = perm_pbig(POPSIZE as u64);
    young.run().unwrap();
    let mut grown = perm_pbig(500);
    grown.run().unwrap();

    assert!(grown.best_objective() >= young.best_objective());
    let mean_young = {
        let mut sum = 0.0;
        for i in 0..POPSIZE {
            sum += young.population().at(i).obj();
        }
        sum / POPSIZE as f64
    };
    let mean_grown = {
        let mut sum = 0.0;
        for i in 0..POPSIZE {
            sum += grown.population().at(i).obj();
        }
        sum / POPSIZE as f64
    };
    // merging only ever replaces a worst member by something better
    assert!(mean_grown > mean_young);
    assert!(grown.iteration_of_best() >= POPSIZE as u64);
    assert!(grown.iteration_of_best() <= grown.n_iteration());
}
