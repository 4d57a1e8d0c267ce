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

//! This module provides the per-method statistics: for every method of the
//! pool, the number of invocations, the number of successful ones, the
//! accumulated objective gain and the accumulated running time. The counters
//! are only ever mutated under the scheduler mutex.

use std::io::Write;

// ----------------------------------------------------------------------------
// --- METHOD STATS -----------------------------------------------------------
// ----------------------------------------------------------------------------

/// The per-method counters of a scheduler.
///
/// # Note
/// For shaking methods in a GVNS, the time counter covers the *entire*
/// shake + VND pair: in the VNS model that pair is the unit of work whose
/// success is measured. This is why the plain invocation time of a shaking
/// call only lands in the "net time" counter, and the full aggregate is added
/// separately once the embedded VND completes.
#[derive(Debug, Clone, Default)]
pub struct MethodStats {
    n_iter: Vec<u64>,
    n_success: Vec<u64>,
    sum_gain: Vec<f64>,
    tot_time: Vec<f64>,
    tot_net_time: Vec<f64>,
}

impl MethodStats {
    /// Registers one more method; its counters start at zero.
    pub fn push_method(&mut self) {
        self.n_iter.push(0);
        self.n_success.push(0);
        self.sum_gain.push(0.0);
        self.tot_time.push(0.0);
        self.tot_net_time.push(0.0);
    }

    /// The number of methods being tracked.
    pub fn len(&self) -> usize {
        self.n_iter.len()
    }

    /// True iff no method is tracked yet.
    pub fn is_empty(&self) -> bool {
        self.n_iter.is_empty()
    }

    /// Counts one invocation of the given method, together with its running
    /// time (in seconds).
    pub fn record_invocation(&mut self, idx: usize, time: f64) {
        self.n_iter[idx] += 1;
        self.tot_time[idx] += time;
        self.tot_net_time[idx] += time;
    }

    /// Counts one successful invocation of the given method and the absolute
    /// objective gain it achieved.
    pub fn record_success(&mut self, idx: usize, gain: f64) {
        self.n_success[idx] += 1;
        self.sum_gain[idx] += gain.abs();
    }

    /// Adds time to the aggregate counter of a method without counting an
    /// invocation (the shake + VND aggregation path).
    pub fn add_time(&mut self, idx: usize, time: f64) {
        self.tot_time[idx] += time;
    }

    /// Counts one invocation of a method whose full statistics are deferred:
    /// only the net running time of the bare call is recorded.
    pub fn add_net_time(&mut self, idx: usize, time: f64) {
        self.tot_net_time[idx] += time;
    }

    /// Counts one deferred invocation of the given method (see
    /// [Self::add_time] for the accompanying aggregate time).
    pub fn count_iteration(&mut self, idx: usize) {
        self.n_iter[idx] += 1;
    }

    /// The number of invocations of the given method.
    pub fn iterations(&self, idx: usize) -> u64 {
        self.n_iter[idx]
    }

    /// The number of successful invocations of the given method.
    pub fn successes(&self, idx: usize) -> u64 {
        self.n_success[idx]
    }

    /// The accumulated absolute objective gain of the given method.
    pub fn gain(&self, idx: usize) -> f64 {
        self.sum_gain[idx]
    }

    /// The accumulated (aggregate) running time of the given method.
    pub fn total_time(&self, idx: usize) -> f64 {
        self.tot_time[idx]
    }

    /// The accumulated net running time of the given method.
    pub fn total_net_time(&self, idx: usize) -> f64 {
        self.tot_net_time[idx]
    }

    /// The sum of invocation counts over all methods.
    pub fn total_iterations(&self) -> u64 {
        self.n_iter.iter().sum()
    }

    /// The sum of success counts over all methods.
    pub fn total_successes(&self) -> u64 {
        self.n_success.iter().sum()
    }

    /// Prints the per-method report: invocations, successes, success rate,
    /// total and average objective gain, relative success share, total and
    /// relative time.
    pub fn print(&self, out: &mut dyn Write, names: &[&str]) -> std::io::Result<()> {
        let sum_iter = self.total_iterations();
        let sum_success = self.total_successes();
        let sum_time: f64 = self.tot_time.iter().sum();

        writeln!(out)?;
        writeln!(out, "Scheduler method statistics:")?;
        writeln!(out, "total num of iterations:\t{sum_iter}")?;
        writeln!(out, "total num of successful iterations:\t{sum_success}")?;
        writeln!(
            out,
            "method\titerations\tsuccessful\tsuccess rate\ttotal obj-gain\t\
             avg obj-gain\trel success\ttotal time\trel time"
        )?;
        let pct = |num: f64, den: f64| if den > 0.0 { num / den * 100.0 } else { 0.0 };
        for (k, name) in names.iter().enumerate() {
            let iters = self.n_iter[k] as f64;
            writeln!(
                out,
                "{:>7}\t{:>6}\t\t{:>6}\t\t{:>9.4} %\t{:>10.5}\t{:>10.5}\t{:>9.4} %\t{:>9.4}\t{:>9.4} %",
                name,
                self.n_iter[k],
                self.n_success[k],
                pct(self.n_success[k] as f64, iters),
                self.sum_gain[k],
                if iters > 0.0 { self.sum_gain[k] / iters } else { 0.0 },
                pct(self.n_success[k] as f64, sum_success as f64),
                self.tot_time[k],
                pct(self.tot_time[k], sum_time),
            )?;
        }
        writeln!(out)?;
        Ok(())
    }
}

// ############################################################################
// #### TESTS #################################################################
// ############################################################################

#[cfg(test)]
mod test_stats {
    use crate::MethodStats;

    #[test]
    fn counters_accumulate_per_method() {
        let mut stats = MethodStats::default();
        stats.push_method();
        stats.push_method();

        stats.record_invocation(0, 0.5);
        stats.record_invocation(0, 0.25);
        stats.record_success(0, -3.0);
        stats.record_invocation(1, 1.0);

        assert_eq!(2, stats.iterations(0));
        assert_eq!(1, stats.successes(0));
        assert_eq!(3.0, stats.gain(0));
        assert_eq!(0.75, stats.total_time(0));
        assert_eq!(1, stats.iterations(1));
        assert_eq!(0, stats.successes(1));
        assert_eq!(3, stats.total_iterations());
        assert_eq!(1, stats.total_successes());
    }

    #[test]
    fn deferred_counters_separate_net_and_aggregate_time() {
        let mut stats = MethodStats::default();
        stats.push_method();

        stats.add_net_time(0, 0.1);
        stats.count_iteration(0);
        stats.add_time(0, 2.0);

        assert_eq!(1, stats.iterations(0));
        assert_eq!(2.0, stats.total_time(0));
        assert_eq!(0.1, stats.total_net_time(0));
    }

    #[test]
    fn printing_an_empty_report_does_not_divide_by_zero() {
        let mut stats = MethodStats::default();
        stats.push_method();
        let mut out = Vec::new();
        stats.print(&mut out, &["noop"]).unwrap();
        let text = String::from_utf8(out).unwrap();
        assert!(text.contains("noop"));
        assert!(!text.contains("NaN"));
    }
}
