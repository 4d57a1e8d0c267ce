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

//! A template main program for the GVNS scheduler and multithreading. It
//! solves the simple ONEMAX problem and demonstrates the whole surface: the
//! `--name value` command line convention (plus the demo specific `vars` and
//! `sfile` arguments), the scheduler setup, and the statistics report.
//!
//! Try for instance:
//! ```text
//! cargo run --example schedtest -- vars 30 titer 2000 schthreads 4 schsync 1 seed 42
//! ```

use rand::rngs::StdRng;
use rand::Rng;

use mhsched::*;

/// The solution type of the ONEMAX problem: maximize the number of one-bits.
#[derive(Clone)]
struct OneMaxSol {
    data: Vec<bool>,
    cache: ObjectiveCache,
}

impl OneMaxSol {
    fn new(n: usize) -> Self {
        OneMaxSol {
            data: vec![false; n],
            cache: ObjectiveCache::default(),
        }
    }

    /// A rather meaningless demo local improvement: "locally optimize"
    /// position k, i.e., set it to 1 if it is 0.
    fn localimp(&mut self, k: i32, res: &mut MethodResult) {
        let k = k as usize % self.data.len();
        if !self.data[k] {
            self.data[k] = true;
            self.invalidate();
        } else {
            res.changed = false;
        }
    }

    /// Flips k uniformly chosen bits.
    fn shaking(&mut self, k: i32, rng: &mut StdRng) {
        for _ in 0..k {
            let i = rng.gen_range(0..self.data.len());
            self.data[i] = !self.data[i];
        }
        self.invalidate();
    }
}

impl Solution for OneMaxSol {
    fn objective(&self) -> f64 {
        self.data.iter().filter(|b| **b).count() as f64
    }

    fn obj_cache(&self) -> &ObjectiveCache {
        &self.cache
    }

    fn equals(&self, other: &Self) -> bool {
        self.data == other.data
    }

    fn random_init(&mut self, _slot: usize, rng: &mut StdRng) {
        self.data.iter_mut().for_each(|b| *b = rng.gen());
        self.invalidate();
    }

    fn write(&self, out: &mut dyn std::io::Write) -> std::io::Result<()> {
        for b in &self.data {
            write!(out, "{}", *b as u8)?;
        }
        Ok(())
    }
}

/// The demo main: keep it small, create the top level objects, and delegate
/// the actual work to the scheduler. All failures are caught and reported
/// with a non-zero exit code.
fn main() {
    if let Err(e) = run() {
        eprintln!("{e}");
        std::process::exit(1);
    }
}

fn run() -> Result<()> {
    // split off the demo specific arguments, forward the rest
    let mut vars = 20usize;
    let mut sfile = String::new();
    let mut forwarded = vec![];
    let mut args = std::env::args().skip(1);
    while let Some(arg) = args.next() {
        match arg.trim_start_matches('-') {
            "vars" => {
                let value = args.next().unwrap_or_default();
                vars = value.parse().map_err(|_| Error::Config {
                    name: "vars".to_string(),
                    value,
                    reason: "not a valid number".to_string(),
                })?;
            }
            "sfile" => sfile = args.next().unwrap_or_default(),
            _ => forwarded.push(arg),
        }
    }
    let params = match Params::parse_args(forwarded)? {
        Some(params) => params,
        None => return Ok(()), // -h was handled
    };

    let nconstheu = 1;
    let nlocimpnh = 2;
    let nshakingnh = 5;
    let mut gvns = Gvns::new(&OneMaxSol::new(vars), nconstheu, nlocimpnh, nshakingnh, params)?;
    gvns.add_method(Box::new(MethodFunction::new(
        "conh0",
        0,
        0,
        |sol: &mut OneMaxSol, _, ctx: &mut MethodContext<OneMaxSol>, _: &mut MethodResult| {
            sol.random_init(0, ctx.rng);
        },
    )))?;
    for i in 0..nlocimpnh {
        gvns.add_method(Box::new(MethodFunction::new(
            format!("locim{i}"),
            1,
            i as i32,
            |sol: &mut OneMaxSol, k, _: &mut MethodContext<OneMaxSol>, res: &mut MethodResult| {
                sol.localimp(k, res);
            },
        )))?;
    }
    for k in 1..=nshakingnh {
        gvns.add_method(Box::new(MethodFunction::new(
            format!("shake{k}"),
            1,
            k as i32,
            |sol: &mut OneMaxSol, k, ctx: &mut MethodContext<OneMaxSol>, _: &mut MethodResult| {
                sol.shaking(k, ctx.rng);
            },
        )))?;
    }

    gvns.run()?;

    if !sfile.is_empty() {
        gvns.save_best(&sfile)?;
    }
    let mut stdout = std::io::stdout();
    gvns.print_statistics(&mut stdout)?;
    Ok(())
}
