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

//! This module provides the parameter set of the schedulers, together with
//! the small `--name value` command line convention, the `@ file` parameter
//! file indirection, and the `-h` catalogue. Rather than a global registry,
//! every scheduler instance takes its own explicit `Params` value: nested
//! schedulers simply receive a second one.

use std::collections::VecDeque;
use std::io::Write;
use std::process;
use std::time::{SystemTime, UNIX_EPOCH};

use derive_builder::Builder;

use crate::{
    ClockKind, DuplicateElimination, Error, OptDirection, Result, SelectionStrategy,
    TerminationCriteria,
};

// ----------------------------------------------------------------------------
// --- PARAMS -----------------------------------------------------------------
// ----------------------------------------------------------------------------

/// The complete configuration of a scheduler run. Every field corresponds to
/// one named parameter of the command line convention; see
/// [Params::print_catalogue] for the catalogue.
///
/// # Example
/// ```
/// # use mhsched::ParamsBuilder;
/// let params = ParamsBuilder::default()
///     .titer(Some(1000))
///     .schthreads(4)
///     .schsync(true)
///     .seed(42)
///     .build()
///     .unwrap();
/// assert_eq!(Some(1000), params.titer);
/// ```
#[derive(Debug, Clone, Builder)]
pub struct Params {
    /// Iteration cap; `None` disables (CLI value -1).
    #[builder(default = "None")]
    pub titer: Option<u64>,
    /// Convergence cap: iterations without a new best; `None` disables.
    #[builder(default = "None")]
    pub tciter: Option<u64>,
    /// Objective threshold terminating the run; `None` disables.
    #[builder(default = "None")]
    pub tobj: Option<f64>,
    /// Time limit in seconds; `None` disables.
    #[builder(default = "None")]
    pub ttime: Option<f64>,
    /// Measure time in wall-clock time (true) or process CPU time (false).
    #[builder(default = "false")]
    pub wctime: bool,
    /// Maximization (true) vs minimization (false).
    #[builder(default = "true")]
    pub maxi: bool,
    /// Size of the scheduler's population.
    #[builder(default = "100")]
    pub popsize: usize,
    /// Duplicate elimination policy.
    #[builder(default = "DuplicateElimination::Off")]
    pub dupelim: DuplicateElimination,
    /// Number of worker threads; 0 selects the number of hardware threads.
    #[builder(default = "1")]
    pub schthreads: usize,
    /// Synchronize the workers for a deterministic outcome.
    #[builder(default = "false")]
    pub schsync: bool,
    /// Probability of migrating the global best into a worker's incumbent at
    /// each major iteration.
    #[builder(default = "0.1")]
    pub schpmig: f64,
    /// Selection strategy for the local improvement neighborhoods.
    #[builder(default = "SelectionStrategy::SequentialRep")]
    pub schlisel: SelectionStrategy,
    /// Selection strategy for the shaking neighborhoods.
    #[builder(default = "SelectionStrategy::SequentialRep")]
    pub schshasel: SelectionStrategy,
    /// Repeat the local improvement neighborhoods until a local optimum is
    /// reached (classical VND) instead of applying each at most once.
    #[builder(default = "true")]
    pub schlirep: bool,
    /// Size of each worker's private population (>= 2: incumbent and
    /// pre-shaking snapshot).
    #[builder(default = "2")]
    pub threadspsize: usize,
    /// Random seed; 0 derives a seed from the time and the process id.
    #[builder(default = "0")]
    pub seed: u64,
    /// Log frequency: every k iterations; 0 disables; -1 selects the
    /// geometric schedule 1, 2, 5, 10, 20, 50, ...
    #[builder(default = "1")]
    pub lfreq: i64,
    /// Restrict log entries to improvements of the best objective (1) or any
    /// change of it (2); 0 logs unconditionally.
    #[builder(default = "0")]
    pub lchonly: u8,
    /// Number of entries the log buffers before flushing.
    #[builder(default = "100")]
    pub lbuffer: usize,
    /// Append the elapsed time to each log entry.
    #[builder(default = "false")]
    pub ltime: bool,
    /// Append the duplicate elimination count to each log entry.
    #[builder(default = "false")]
    pub ldups: bool,
    /// Basename for all output files; `"@"` is standard output, `"NULL"`
    /// discards.
    #[builder(default = "\"@\".to_string()")]
    pub oname: String,
    /// Directory for all output files; empty means the current directory.
    #[builder(default = "String::new()")]
    pub odir: String,
    /// Extension of the redirected standard output file.
    #[builder(default = "\".out\".to_string()")]
    pub outext: String,
    /// Extension of the log file.
    #[builder(default = "\".log\".to_string()")]
    pub logext: String,
}

impl Default for Params {
    fn default() -> Self {
        ParamsBuilder::default().build().expect("defaults are valid")
    }
}

/// The catalogue shown by `-h`: one (name, description) row per parameter.
const CATALOGUE: &[(&str, &str)] = &[
    ("titer", "iteration cap, -1 disables (default -1)"),
    ("tciter", "iterations without improvement cap, -1 disables (default -1)"),
    ("tobj", "objective threshold, -1 disables (default -1)"),
    ("ttime", "time limit in seconds, -1 disables (default -1)"),
    ("wctime", "measure wall-clock time instead of CPU time (default false)"),
    ("maxi", "maximize (true) or minimize (false) (default true)"),
    ("popsize", "population size, >= 1 (default 100)"),
    ("dupelim", "duplicate elimination mode 0..2 (default 0)"),
    ("schthreads", "number of worker threads 0..100, 0 = all cores (default 1)"),
    ("schsync", "synchronize threads deterministically (default false)"),
    ("schpmig", "migration probability 0..1 (default 0.1)"),
    ("schlisel", "local improvement selection strategy 0..5 (default 0)"),
    ("schshasel", "shaking selection strategy 0..5 (default 0)"),
    ("schlirep", "repeat VND until local optimum (default true)"),
    ("threadspsize", "worker population size >= 2 (default 2)"),
    ("seed", "random seed, 0 = derive from time and pid (default 0)"),
    ("lfreq", "log frequency, 0 = off, -1 = geometric (default 1)"),
    ("lchonly", "log only on improvement (1) or change (2) (default 0)"),
    ("lbuffer", "log buffer size (default 100)"),
    ("ltime", "append elapsed time to log entries (default false)"),
    ("ldups", "append duplicate count to log entries (default false)"),
    ("oname", "output basename, @ = stdout, NULL = discard (default @)"),
    ("odir", "output directory (default current)"),
    ("outext", "output file extension (default .out)"),
    ("logext", "log file extension (default .log)"),
];

impl Params {
    /// Checks the cross-field constraints of this parameter set.
    pub fn validate(&self) -> Result<()> {
        let fail = |name: &str, value: String, reason: &str| {
            Err(Error::Config {
                name: name.to_string(),
                value,
                reason: reason.to_string(),
            })
        };
        if self.popsize == 0 {
            return fail("popsize", self.popsize.to_string(), "must be at least 1");
        }
        if self.schthreads > 100 {
            return fail("schthreads", self.schthreads.to_string(), "must be in 0..=100");
        }
        if !(0.0..=1.0).contains(&self.schpmig) {
            return fail("schpmig", self.schpmig.to_string(), "must be in [0, 1]");
        }
        if self.threadspsize < 2 {
            return fail("threadspsize", self.threadspsize.to_string(), "must be at least 2");
        }
        if self.lchonly > 2 {
            return fail("lchonly", self.lchonly.to_string(), "must be in 0..=2");
        }
        if self.lfreq < -1 {
            return fail("lfreq", self.lfreq.to_string(), "must be >= -1");
        }
        Ok(())
    }

    /// The optimization direction selected by `maxi`.
    pub fn sense(&self) -> OptDirection {
        if self.maxi {
            OptDirection::Maximize
        } else {
            OptDirection::Minimize
        }
    }

    /// The notion of time selected by `wctime`.
    pub fn clock_kind(&self) -> ClockKind {
        if self.wctime {
            ClockKind::WallClock
        } else {
            ClockKind::CpuTime
        }
    }

    /// The termination oracle configured by this parameter set.
    pub fn termination(&self) -> TerminationCriteria {
        TerminationCriteria {
            max_iterations: self.titer,
            max_stagnation: self.tciter,
            target_objective: self.tobj,
            max_time: self.ttime,
            sense: self.sense(),
        }
    }

    /// The effective random seed: the configured one, or -- when it is 0 --
    /// one derived from the current time and the process id.
    pub fn derived_seed(&self) -> u64 {
        if self.seed != 0 {
            return self.seed;
        }
        let nanos = SystemTime::now()
            .duration_since(UNIX_EPOCH)
            .map(|d| d.as_nanos() as u64)
            .unwrap_or(0);
        nanos ^ ((process::id() as u64) << 32) | 1
    }

    /// The effective number of worker threads: the configured one, or -- when
    /// it is 0 -- the number of available hardware threads.
    pub fn effective_threads(&self) -> usize {
        if self.schthreads == 0 {
            num_cpus::get()
        } else {
            self.schthreads
        }
    }

    /// Prints the parameter catalogue (the `-h` output).
    pub fn print_catalogue(out: &mut dyn Write) -> std::io::Result<()> {
        writeln!(out, "parameters (pass as --name value, name value, or @ file):")?;
        for (name, desc) in CATALOGUE {
            writeln!(out, "  {name:<14} {desc}")?;
        }
        Ok(())
    }

    /// Parses command line tokens of the forms `--name value` and
    /// `name value`. A token `@` followed by a file name (or a single token
    /// `@file`) reads further `name value` pairs from that file, where lines
    /// starting with `#` are comments. A single `-h` prints the catalogue to
    /// standard output and `None` is returned. Unknown names and invalid
    /// values abort with an error.
    pub fn parse_args<I>(args: I) -> Result<Option<Params>>
    where
        I: IntoIterator<Item = String>,
    {
        let mut params = Params::default();
        let mut queue: VecDeque<String> = args.into_iter().collect();
        while let Some(token) = queue.pop_front() {
            if token == "-h" || token == "--help" {
                let mut stdout = std::io::stdout();
                Params::print_catalogue(&mut stdout)?;
                return Ok(None);
            }
            if let Some(file) = parameter_file(&token, &mut queue)? {
                let content = std::fs::read_to_string(&file)?;
                // tokens from the file are processed in place of the @ token
                let mut extra = VecDeque::new();
                for line in content.lines() {
                    let line = line.trim();
                    if line.is_empty() || line.starts_with('#') {
                        continue;
                    }
                    extra.extend(line.split_whitespace().map(String::from));
                }
                extra.extend(queue.drain(..));
                queue = extra;
                continue;
            }
            let name = token.trim_start_matches('-').to_string();
            let value = queue.pop_front().ok_or_else(|| Error::Config {
                name: name.clone(),
                value: String::new(),
                reason: "missing value".to_string(),
            })?;
            params.set(&name, &value)?;
        }
        params.validate()?;
        Ok(Some(params))
    }

    /// Assigns one parameter by name from its textual value.
    pub fn set(&mut self, name: &str, value: &str) -> Result<()> {
        match name {
            "titer" => self.titer = parse_opt_u64(name, value)?,
            "tciter" => self.tciter = parse_opt_u64(name, value)?,
            "tobj" => self.tobj = parse_opt_f64(name, value)?,
            "ttime" => self.ttime = parse_opt_f64(name, value)?,
            "wctime" => self.wctime = parse_bool(name, value)?,
            "maxi" => self.maxi = parse_bool(name, value)?,
            "popsize" => self.popsize = parse_num(name, value)?,
            "dupelim" => {
                let level: u8 = parse_num(name, value)?;
                self.dupelim = DuplicateElimination::from_level(level)
                    .ok_or_else(|| bad_value(name, value, "must be in 0..=2"))?;
            }
            "schthreads" => self.schthreads = parse_num(name, value)?,
            "schsync" => self.schsync = parse_bool(name, value)?,
            "schpmig" => self.schpmig = parse_num(name, value)?,
            "schlisel" => self.schlisel = parse_strategy(name, value)?,
            "schshasel" => self.schshasel = parse_strategy(name, value)?,
            "schlirep" => self.schlirep = parse_bool(name, value)?,
            "threadspsize" => self.threadspsize = parse_num(name, value)?,
            "seed" => self.seed = parse_num(name, value)?,
            "lfreq" => self.lfreq = parse_num(name, value)?,
            "lchonly" => self.lchonly = parse_num(name, value)?,
            "lbuffer" => self.lbuffer = parse_num(name, value)?,
            "ltime" => self.ltime = parse_bool(name, value)?,
            "ldups" => self.ldups = parse_bool(name, value)?,
            "oname" => self.oname = value.to_string(),
            "odir" => self.odir = value.to_string(),
            "outext" => self.outext = value.to_string(),
            "logext" => self.logext = value.to_string(),
            _ => return Err(Error::UnknownParameter(name.to_string())),
        }
        Ok(())
    }
}

/// Recognizes the `@ file` / `@file` indirection token and yields the file
/// name if the token is one.
fn parameter_file(token: &str, queue: &mut VecDeque<String>) -> Result<Option<String>> {
    if token == "@" {
        let file = queue.pop_front().ok_or_else(|| Error::Config {
            name: "@".to_string(),
            value: String::new(),
            reason: "missing parameter file name".to_string(),
        })?;
        Ok(Some(file))
    } else if let Some(file) = token.strip_prefix('@') {
        Ok(Some(file.to_string()))
    } else {
        Ok(None)
    }
}

fn bad_value(name: &str, value: &str, reason: &str) -> Error {
    Error::Config {
        name: name.to_string(),
        value: value.to_string(),
        reason: reason.to_string(),
    }
}

fn parse_num<T: std::str::FromStr>(name: &str, value: &str) -> Result<T> {
    value
        .parse()
        .map_err(|_| bad_value(name, value, "not a valid number"))
}

fn parse_opt_u64(name: &str, value: &str) -> Result<Option<u64>> {
    let v: i64 = parse_num(name, value)?;
    Ok((v >= 0).then_some(v as u64))
}

fn parse_opt_f64(name: &str, value: &str) -> Result<Option<f64>> {
    let v: f64 = parse_num(name, value)?;
    Ok((v >= 0.0).then_some(v))
}

fn parse_bool(name: &str, value: &str) -> Result<bool> {
    match value {
        "1" | "true" => Ok(true),
        "0" | "false" => Ok(false),
        _ => Err(bad_value(name, value, "not a boolean (use 0/1/true/false)")),
    }
}

fn parse_strategy(name: &str, value: &str) -> Result<SelectionStrategy> {
    let level: u8 = parse_num(name, value)?;
    SelectionStrategy::from_level(level)
        .ok_or_else(|| bad_value(name, value, "must be a strategy in 0..=5"))
}

// ############################################################################
// #### TESTS #################################################################
// ############################################################################
