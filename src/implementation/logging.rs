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

//! This module provides the buffered per-iteration log writer. A scheduler
//! never writes progress information to stdout or a file directly: it goes
//! through one `LogWriter` whose output routing, cadence and buffering are
//! controlled by parameters. The writer is protected by its own mutex so
//! that log entries are produced outside the scheduler's critical sections.

use std::fs::File;
use std::io::{BufWriter, Write};
use std::path::PathBuf;

use crate::{OptDirection, Params, Result};

// ----------------------------------------------------------------------------
// --- OUTPUT SINK ------------------------------------------------------------
// ----------------------------------------------------------------------------

/// Where the log entries end up. Determined by the `oname` parameter: `"@"`
/// routes to standard output, `"NULL"` discards everything, any other value
/// is a file basename combined with `odir` and the extension.
pub enum LogSink {
    /// Entries go to standard output (and are never buffered for long).
    Stdout,
    /// Entries are discarded.
    Null,
    /// Entries go to the named file.
    File(BufWriter<File>),
}

impl LogSink {
    /// Opens the sink described by the output parameters and the given file
    /// extension.
    pub fn open(oname: &str, odir: &str, ext: &str) -> Result<Self> {
        match oname {
            "@" => Ok(LogSink::Stdout),
            "NULL" => Ok(LogSink::Null),
            name => {
                let mut path = PathBuf::new();
                if !odir.is_empty() {
                    path.push(odir);
                }
                path.push(format!("{name}{ext}"));
                Ok(LogSink::File(BufWriter::new(File::create(path)?)))
            }
        }
    }

    /// True iff this sink is the standard output.
    pub fn is_stdout(&self) -> bool {
        matches!(self, LogSink::Stdout)
    }

    fn write_line(&mut self, line: &str) -> std::io::Result<()> {
        match self {
            LogSink::Stdout => {
                println!("{line}");
                Ok(())
            }
            LogSink::Null => Ok(()),
            LogSink::File(f) => writeln!(f, "{line}"),
        }
    }

    fn flush(&mut self) -> std::io::Result<()> {
        match self {
            LogSink::Stdout => std::io::stdout().flush(),
            LogSink::Null => Ok(()),
            LogSink::File(f) => f.flush(),
        }
    }
}

// ----------------------------------------------------------------------------
// --- LOG WRITER -------------------------------------------------------------
// ----------------------------------------------------------------------------

/// The values of one log entry, gathered under the scheduler mutex and
/// formatted outside of it.
#[derive(Debug, Clone, Copy)]
pub struct LogEntry {
    /// the iteration number of the entry
    pub iteration: u64,
    /// the objective value of the globally best solution
    pub best: f64,
    /// the worst objective value in the population
    pub worst: f64,
    /// the mean objective value of the population
    pub mean: f64,
    /// the standard deviation of the objective values
    pub dev: f64,
    /// the number of duplicate eliminations performed so far
    pub dup_eliminations: u64,
    /// seconds elapsed on the scheduler's clock
    pub elapsed: f64,
}

/// The buffered, cadence-controlled log writer.
///
/// Cadence: with `lfreq` k > 0 every k-th iteration is logged, 0 disables the
/// log entirely, and -1 selects the geometric sequence 0, 1, 2, 5, 10, 20,
/// 50, 100, ... On top of that, `lchonly` restricts entries to iterations
/// where the best objective improved (1) or changed at all (2). The first and
/// last entries of a run are always written (except with `lfreq` 0).
pub struct LogWriter {
    sink: LogSink,
    sense: OptDirection,
    lfreq: i64,
    lchonly: u8,
    lbuffer: usize,
    ltime: bool,
    ldups: bool,
    buffer: Vec<String>,
    prev_best: Option<f64>,
    last_iter: Option<u64>,
}

impl LogWriter {
    /// Creates the writer described by the given parameter set.
    pub fn from_params(params: &Params, sense: OptDirection) -> Result<Self> {
        let sink = LogSink::open(&params.oname, &params.odir, &params.logext)?;
        Ok(Self::new(
            sink,
            sense,
            params.lfreq,
            params.lchonly,
            params.lbuffer,
            params.ltime,
            params.ldups,
        ))
    }

    /// Creates a writer with explicit settings (mostly used by tests).
    pub fn new(
        sink: LogSink,
        sense: OptDirection,
        lfreq: i64,
        lchonly: u8,
        lbuffer: usize,
        ltime: bool,
        ldups: bool,
    ) -> Self {
        LogWriter {
            sink,
            sense,
            lfreq,
            lchonly,
            lbuffer,
            ltime,
            ldups,
            buffer: vec![],
            prev_best: None,
            last_iter: None,
        }
    }

    /// The iteration number of the last buffered entry, if any.
    pub fn last_iter(&self) -> Option<u64> {
        self.last_iter
    }

    /// Writes the header line describing all columns.
    pub fn write_header(&mut self) -> Result<()> {
        if self.lfreq == 0 {
            return Ok(());
        }
        let mut line = String::from("iteration\tbest\tworst\tmean\tstddev");
        if self.ldups {
            line.push_str("\tdups");
        }
        if self.ltime {
            line.push_str("\ttime");
        }
        self.push_line(line)?;
        Ok(())
    }

    /// Decides whether an entry for the given iteration should be produced,
    /// honoring `lfreq` and `lchonly`. Entries forced by `in_any_case` (the
    /// first and last iteration of a run) bypass both gates, except when the
    /// log is disabled altogether.
    pub fn should_write(&self, iteration: u64, best: f64, in_any_case: bool) -> bool {
        if self.lfreq == 0 {
            return false;
        }
        if in_any_case {
            return true;
        }
        let freq_ok = match self.lfreq {
            -1 => is_geometric(iteration),
            k => iteration % (k as u64) == 0,
        };
        if !freq_ok {
            return false;
        }
        match self.lchonly {
            0 => true,
            1 => self
                .prev_best
                .map(|prev| self.sense.is_better(best, prev))
                .unwrap_or(true),
            _ => self.prev_best.map(|prev| prev != best).unwrap_or(true),
        }
    }

    /// Produces a log entry if the cadence allows it. Returns true when an
    /// entry was actually written.
    pub fn write_entry(&mut self, entry: LogEntry, in_any_case: bool) -> Result<bool> {
        if !self.should_write(entry.iteration, entry.best, in_any_case) {
            return Ok(false);
        }
        if self.last_iter == Some(entry.iteration) {
            // one entry per iteration number is enough
            return Ok(false);
        }
        let mut line = format!(
            "{}\t{}\t{}\t{}\t{}",
            entry.iteration, entry.best, entry.worst, entry.mean, entry.dev
        );
        if self.ldups {
            line.push_str(&format!("\t{}", entry.dup_eliminations));
        }
        if self.ltime {
            line.push_str(&format!("\t{:.3}", entry.elapsed));
        }
        self.prev_best = Some(entry.best);
        self.last_iter = Some(entry.iteration);
        self.push_line(line)?;
        Ok(true)
    }

    /// Writes an empty line, terminating the entries of one run.
    pub fn empty_entry(&mut self) -> Result<()> {
        if self.lfreq == 0 {
            return Ok(());
        }
        self.push_line(String::new())?;
        Ok(())
    }

    /// Writes all buffered entries to the sink.
    pub fn flush(&mut self) -> Result<()> {
        for line in self.buffer.drain(..) {
            self.sink.write_line(&line)?;
        }
        self.sink.flush()?;
        Ok(())
    }

    fn push_line(&mut self, line: String) -> Result<()> {
        self.buffer.push(line);
        if self.sink.is_stdout() || self.buffer.len() > self.lbuffer {
            self.flush()?;
        }
        Ok(())
    }
}

/// True iff `iteration` belongs to the geometric log schedule
/// 0, 1, 2, 5, 10, 20, 50, 100, 200, 500, ...
fn is_geometric(iteration: u64) -> bool {
    if iteration == 0 {
        return true;
    }
    let mut lead = iteration;
    while lead % 10 == 0 {
        lead /= 10;
    }
    matches!(lead, 1 | 2 | 5)
}

// ############################################################################
// #### TESTS #################################################################
// ############################################################################

#[cfg(test)]
mod test_logging {
    use crate::{LogEntry, LogSink, LogWriter, OptDirection};

    fn entry(iteration: u64, best: f64) -> LogEntry {
        LogEntry {
            iteration,
            best,
            worst: best,
            mean: best,
            dev: 0.0,
            dup_eliminations: 0,
            elapsed: 0.0,
        }
    }

    fn writer(lfreq: i64, lchonly: u8) -> LogWriter {
        LogWriter::new(
            LogSink::Null,
            OptDirection::Maximize,
            lfreq,
            lchonly,
            1_000,
            false,
            false,
        )
    }

    #[test]
    fn frequency_gate_limits_entries() {
        let mut log = writer(10, 0);
        assert!(log.write_entry(entry(0, 1.0), false).unwrap());
        assert!(!log.write_entry(entry(3, 1.0), false).unwrap());
        assert!(log.write_entry(entry(10, 1.0), false).unwrap());
        assert!(!log.write_entry(entry(15, 1.0), false).unwrap());
    }

    #[test]
    fn zero_frequency_disables_the_log_even_when_forced() {
        let mut log = writer(0, 0);
        assert!(!log.write_entry(entry(0, 1.0), true).unwrap());
        assert!(!log.should_write(0, 1.0, true));
    }

    #[test]
    fn geometric_sequence_is_1_2_5_pattern() {
        let log = writer(-1, 0);
        let expected = [0u64, 1, 2, 5, 10, 20, 50, 100, 200, 500, 1000];
        for iter in 0..=1000u64 {
            assert_eq!(
                expected.contains(&iter),
                log.should_write(iter, 1.0, false),
                "iteration {iter}"
            );
        }
    }

    #[test]
    fn change_only_gate_requires_an_improvement() {
        let mut log = writer(1, 1);
        assert!(log.write_entry(entry(0, 1.0), false).unwrap());
        assert!(!log.write_entry(entry(1, 1.0), false).unwrap());
        assert!(log.write_entry(entry(2, 2.0), false).unwrap());
        // a degradation is not an improvement
        assert!(!log.write_entry(entry(3, 1.5), false).unwrap());
        // but forcing bypasses the gate
        assert!(log.write_entry(entry(4, 1.5), true).unwrap());
    }

    #[test]
    fn one_entry_per_iteration_number() {
        let mut log = writer(1, 0);
        assert!(log.write_entry(entry(7, 1.0), true).unwrap());
        assert!(!log.write_entry(entry(7, 1.0), true).unwrap());
        assert_eq!(Some(7), log.last_iter());
    }
}
