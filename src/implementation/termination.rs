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

//! This module provides the termination oracle of the schedulers, together
//! with the clock it measures elapsed time on. Time is measured either in
//! wall-clock time or in CPU time accumulated across all threads of the
//! process, depending on the `wctime` parameter.

use std::time::Instant;

use crate::OptDirection;

// ----------------------------------------------------------------------------
// --- CLOCK ------------------------------------------------------------------
// ----------------------------------------------------------------------------

/// Which notion of time the schedulers measure elapsed time on.
#[derive(Debug, Clone, Copy, Eq, PartialEq)]
pub enum ClockKind {
    /// Wall-clock time. The natural choice for multithreaded runs.
    WallClock,
    /// CPU time accumulated over all threads of the process.
    CpuTime,
}

/// A clock anchored at the moment of its creation, counting seconds in the
/// chosen notion of time.
#[derive(Debug, Clone, Copy)]
pub struct Clock {
    kind: ClockKind,
    wall_anchor: Instant,
    cpu_anchor: f64,
}

impl Clock {
    /// Starts a new clock of the given kind.
    pub fn start(kind: ClockKind) -> Self {
        Clock {
            kind,
            wall_anchor: Instant::now(),
            cpu_anchor: cpu_seconds(),
        }
    }

    /// The kind of time this clock measures.
    pub fn kind(&self) -> ClockKind {
        self.kind
    }

    /// Seconds elapsed since the clock was started.
    pub fn elapsed(&self) -> f64 {
        match self.kind {
            ClockKind::WallClock => self.wall_anchor.elapsed().as_secs_f64(),
            ClockKind::CpuTime => cpu_seconds() - self.cpu_anchor,
        }
    }
}

/// The CPU time consumed by the whole process, in seconds.
#[cfg(unix)]
fn cpu_seconds() -> f64 {
    let mut ts = libc::timespec {
        tv_sec: 0,
        tv_nsec: 0,
    };
    let rc = unsafe { libc::clock_gettime(libc::CLOCK_PROCESS_CPUTIME_ID, &mut ts) };
    if rc == 0 {
        ts.tv_sec as f64 + ts.tv_nsec as f64 * 1e-9
    } else {
        0.0
    }
}

/// On platforms without a process CPU clock we fall back to wall time.
#[cfg(not(unix))]
fn cpu_seconds() -> f64 {
    use std::sync::OnceLock;
    static ANCHOR: OnceLock<Instant> = OnceLock::new();
    ANCHOR.get_or_init(Instant::now).elapsed().as_secs_f64()
}

// ----------------------------------------------------------------------------
// --- TERMINATION ------------------------------------------------------------
// ----------------------------------------------------------------------------

/// The configurable part of the termination decision. The oracle fires when
/// *any* of the enabled criteria holds; the external cancel flag and callback
/// are layered on top by the schedulers.
#[derive(Debug, Clone, Copy)]
pub struct TerminationCriteria {
    /// Iteration cap (`titer`); `None` disables.
    pub max_iterations: Option<u64>,
    /// Convergence cap: iterations without a new best (`tciter`); `None`
    /// disables.
    pub max_stagnation: Option<u64>,
    /// Objective threshold (`tobj`); `None` disables.
    pub target_objective: Option<f64>,
    /// Time limit in seconds (`ttime`); `None` disables.
    pub max_time: Option<f64>,
    /// The optimization direction, needed to interpret the threshold.
    pub sense: OptDirection,
}

impl TerminationCriteria {
    /// Evaluates the oracle.
    ///
    /// * `n_iteration` -- the number of iterations performed so far,
    /// * `iter_best` -- the iteration in which the current best was found,
    /// * `best_obj` -- the objective value of the current best solution, or
    ///   `None` when no solution has been accepted yet,
    /// * `elapsed` -- seconds elapsed on the scheduler's clock.
    pub fn should_stop(
        &self,
        n_iteration: u64,
        iter_best: u64,
        best_obj: Option<f64>,
        elapsed: f64,
    ) -> bool {
        if let Some(titer) = self.max_iterations {
            if n_iteration >= titer {
                return true;
            }
        }
        if let Some(tciter) = self.max_stagnation {
            if n_iteration - iter_best.min(n_iteration) >= tciter {
                return true;
            }
        }
        if let (Some(tobj), Some(best)) = (self.target_objective, best_obj) {
            if self.sense.reached(best, tobj) {
                return true;
            }
        }
        if let Some(ttime) = self.max_time {
            if elapsed >= ttime {
                return true;
            }
        }
        false
    }
}

// ############################################################################
// #### TESTS #################################################################
// ############################################################################

#[cfg(test)]
mod test_termination {
    use crate::{ClockKind, Clock, OptDirection, TerminationCriteria};

    fn criteria() -> TerminationCriteria {
        TerminationCriteria {
            max_iterations: None,
            max_stagnation: None,
            target_objective: None,
            max_time: None,
            sense: OptDirection::Maximize,
        }
    }

    #[test]
    fn no_enabled_criterion_never_stops() {
        let c = criteria();
        assert!(!c.should_stop(1_000_000, 0, Some(1e9), 1e9));
    }

    #[test]
    fn iteration_cap_fires_at_the_bound() {
        let c = TerminationCriteria {
            max_iterations: Some(100),
            ..criteria()
        };
        assert!(!c.should_stop(99, 0, None, 0.0));
        assert!(c.should_stop(100, 0, None, 0.0));
        assert!(c.should_stop(101, 0, None, 0.0));
    }

    #[test]
    fn stagnation_counts_iterations_since_the_last_best() {
        let c = TerminationCriteria {
            max_stagnation: Some(10),
            ..criteria()
        };
        assert!(!c.should_stop(15, 10, None, 0.0));
        assert!(c.should_stop(20, 10, None, 0.0));
    }

    #[test]
    fn objective_threshold_respects_the_direction() {
        let max = TerminationCriteria {
            target_objective: Some(20.0),
            ..criteria()
        };
        assert!(!max.should_stop(0, 0, Some(19.5), 0.0));
        assert!(max.should_stop(0, 0, Some(20.0), 0.0));
        assert!(!max.should_stop(0, 0, None, 0.0));

        let min = TerminationCriteria {
            target_objective: Some(20.0),
            sense: OptDirection::Minimize,
            ..criteria()
        };
        assert!(min.should_stop(0, 0, Some(19.5), 0.0));
        assert!(!min.should_stop(0, 0, Some(20.5), 0.0));
    }

    #[test]
    fn time_limit_fires_on_elapsed_time() {
        let c = TerminationCriteria {
            max_time: Some(10.0),
            ..criteria()
        };
        assert!(!c.should_stop(0, 0, None, 9.9));
        assert!(c.should_stop(0, 0, None, 10.0));
    }

    #[test]
    fn clocks_are_monotone() {
        for kind in [ClockKind::WallClock, ClockKind::CpuTime] {
            let clock = Clock::start(kind);
            let a = clock.elapsed();
            let mut x = 0u64;
            for i in 0..10_000u64 {
                x = x.wrapping_add(i * i);
            }
            std::hint::black_box(x);
            let b = clock.elapsed();
            assert!(b >= a);
            assert!(a >= 0.0);
        }
    }
}
