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

//! This module defines the most basic data types that are used throughout all
//! the code of our library (both at the abstraction and implementation levels).
//! These are also the types your client library is likely to work with.

// ----------------------------------------------------------------------------
// --- OPTIMIZATION DIRECTION -------------------------------------------------
// ----------------------------------------------------------------------------

/// The tolerance used when comparing two objective values for *strict*
/// improvement. It guards the acceptance decisions against floating point
/// noise accumulated by incremental objective updates.
pub const OBJ_EPSILON: f64 = 1e-5;

/// The direction of the optimization: are we maximizing or minimizing the
/// objective function? All comparisons between objective values go through
/// this type so that the rest of the scheduler never needs to know which of
/// the two it is actually doing.
#[derive(Debug, Clone, Copy, Eq, PartialEq, Hash)]
pub enum OptDirection {
    /// Higher objective values are preferred.
    Maximize,
    /// Lower objective values are preferred.
    Minimize,
}

impl OptDirection {
    /// Returns true iff objective value `a` is *strictly* better than `b`.
    /// The comparison is guarded by [OBJ_EPSILON] so that two values which
    /// only differ by floating point noise are not considered an improvement.
    ///
    /// # Example
    /// ```
    /// # use mhsched::OptDirection;
    /// assert!( OptDirection::Maximize.is_better(10.0, 9.0));
    /// assert!(!OptDirection::Maximize.is_better(9.0, 10.0));
    /// assert!(!OptDirection::Maximize.is_better(10.0, 10.0));
    /// assert!( OptDirection::Minimize.is_better(9.0, 10.0));
    /// ```
    pub fn is_better(self, a: f64, b: f64) -> bool {
        match self {
            OptDirection::Maximize => a > b + OBJ_EPSILON,
            OptDirection::Minimize => a < b - OBJ_EPSILON,
        }
    }

    /// Returns true iff objective value `a` is worse than `b`. Unlike
    /// [Self::is_better], this comparison is not epsilon guarded: a solution
    /// counts as worse as soon as its value falls behind at all.
    pub fn is_worse(self, a: f64, b: f64) -> bool {
        match self {
            OptDirection::Maximize => a < b,
            OptDirection::Minimize => a > b,
        }
    }

    /// Returns true iff objective value `obj` reaches the termination
    /// threshold `target` (at least as good as the target).
    pub fn reached(self, obj: f64, target: f64) -> bool {
        match self {
            OptDirection::Maximize => obj >= target,
            OptDirection::Minimize => obj <= target,
        }
    }

    /// The objective value standing for "no solution found yet": the worst
    /// representable value under this direction.
    pub fn worst_value(self) -> f64 {
        match self {
            OptDirection::Maximize => f64::NEG_INFINITY,
            OptDirection::Minimize => f64::INFINITY,
        }
    }
}

// ----------------------------------------------------------------------------
// --- ERRORS -----------------------------------------------------------------
// ----------------------------------------------------------------------------

/// The error type shared by the whole library. Configuration and setup errors
/// are reported before any worker thread starts; worker failures are captured
/// while the threads run and surface once `run` returns.
#[derive(Debug, thiserror::Error)]
pub enum Error {
    /// A parameter was given a value it cannot accept.
    #[error("invalid value '{value}' for parameter '{name}': {reason}")]
    Config {
        /// the name of the offending parameter
        name: String,
        /// the textual value that was rejected
        value: String,
        /// why the value was rejected
        reason: String,
    },
    /// A parameter name which is not part of the catalogue was used.
    #[error("unknown parameter '{0}'")]
    UnknownParameter(String),
    /// Any i/o failure (log files, solution files, parameter files).
    #[error("i/o error: {0}")]
    Io(#[from] std::io::Error),
    /// The scheduler was set up in an inconsistent way (e.g., the method pool
    /// does not match the declared block sizes). These are programmer errors;
    /// there is no attempt to recover from them.
    #[error("scheduler setup error: {0}")]
    Setup(String),
    /// A worker thread panicked. The first failure is returned; all of them
    /// are listed in the message.
    #[error("worker thread failed: {0}")]
    Worker(String),
}

/// A convenience alias for results produced by this library.
pub type Result<T> = std::result::Result<T, Error>;

// ############################################################################
// #### TESTS #################################################################
// ############################################################################

#[cfg(test)]
mod test_direction {
    use crate::{OptDirection, OBJ_EPSILON};

    #[test]
    fn better_is_strict_and_epsilon_guarded() {
        let max = OptDirection::Maximize;
        assert!(max.is_better(1.0, 0.0));
        assert!(!max.is_better(1.0, 1.0));
        assert!(!max.is_better(1.0 + OBJ_EPSILON / 2.0, 1.0));
        assert!(max.is_better(1.0 + 2.0 * OBJ_EPSILON, 1.0));

        let min = OptDirection::Minimize;
        assert!(min.is_better(0.0, 1.0));
        assert!(!min.is_better(1.0, 1.0));
        assert!(!min.is_better(1.0 - OBJ_EPSILON / 2.0, 1.0));
    }

    #[test]
    fn worse_is_not_epsilon_guarded() {
        let max = OptDirection::Maximize;
        assert!(max.is_worse(0.999999, 1.0));
        assert!(!max.is_worse(1.0, 1.0));

        let min = OptDirection::Minimize;
        assert!(min.is_worse(1.000001, 1.0));
    }

    #[test]
    fn reached_is_inclusive() {
        assert!(OptDirection::Maximize.reached(20.0, 20.0));
        assert!(OptDirection::Maximize.reached(21.0, 20.0));
        assert!(!OptDirection::Maximize.reached(19.0, 20.0));
        assert!(OptDirection::Minimize.reached(20.0, 20.0));
        assert!(OptDirection::Minimize.reached(19.0, 20.0));
    }

    #[test]
    fn worst_value_is_the_identity_of_better() {
        let max = OptDirection::Maximize;
        assert!(max.is_better(-1e300, max.worst_value()));
        let min = OptDirection::Minimize;
        assert!(min.is_better(1e300, min.worst_value()));
    }
}
