//! Error taxonomy.
//!
//! Every condition here is fatal at startup and not recoverable at runtime,
//! matching the simulator's "errors are configuration/decode problems, not
//! steady-state control flow" stance. Modeled on the sub-enum-per-concern,
//! `#[error(transparent)]`-composition idiom used for estimation errors in
//! the teacher workspace's interpreter crate.

use miette::Diagnostic;
use thiserror::Error;

/// Configuration file problems: a bad parse or a violated constraint.
#[derive(Debug, Error, Diagnostic)]
pub enum ConfigError {
    #[error("invalid configuration key `{key}`: {reason}")]
    #[diagnostic(code(gpusim::config::invalid))]
    Invalid { key: String, reason: String },

    #[error("unknown section `{section}`")]
    #[diagnostic(code(gpusim::config::unknown_section))]
    UnknownSection { section: String },

    #[error("malformed line {line}: {text}")]
    #[diagnostic(code(gpusim::config::parse))]
    Parse { line: usize, text: String },
}

/// Occupancy calculator rejected a kernel's resource shape outright.
#[derive(Debug, Error, Diagnostic)]
pub enum OccupancyError {
    #[error("no work-group fits on a compute unit: limiting resource is {limiting_resource}")]
    #[diagnostic(code(gpusim::occupancy::infeasible))]
    Infeasible { limiting_resource: &'static str },
}

/// Problems surfaced while stepping the decoded instruction stream.
#[derive(Debug, Error, Diagnostic)]
pub enum DecodeError {
    #[error("malformed instruction at pc {pc}: {reason}")]
    #[diagnostic(code(gpusim::decode::malformed))]
    Malformed { pc: usize, reason: String },

    #[error("DEC_LOOP_IDX decoded at zero loop depth")]
    #[diagnostic(code(gpusim::decode::loop_underflow))]
    LoopUnderflow,
}

/// Top-level error type returned by fallible constructors and the config
/// loader.
#[derive(Debug, Error, Diagnostic)]
pub enum Error {
    #[error(transparent)]
    #[diagnostic(transparent)]
    Config(#[from] ConfigError),

    #[error(transparent)]
    #[diagnostic(transparent)]
    Occupancy(#[from] OccupancyError),

    #[error(transparent)]
    #[diagnostic(transparent)]
    Decode(#[from] DecodeError),
}

pub type Result<T> = std::result::Result<T, Error>;

/// Why a run stopped. Not an error: `BudgetExceeded` in `spec.md` terms is a
/// normal, expected outcome of a bounded simulation.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TerminationReason {
    Completed,
    MaxCyclesReached,
    MaxInstReached,
    MaxKernelsReached,
    Halted,
}

impl std::fmt::Display for TerminationReason {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let s = match self {
            TerminationReason::Completed => "Completed",
            TerminationReason::MaxCyclesReached => "MaxCyclesReached",
            TerminationReason::MaxInstReached => "MaxInstReached",
            TerminationReason::MaxKernelsReached => "MaxKernelsReached",
            TerminationReason::Halted => "Halted",
        };
        f.write_str(s)
    }
}
