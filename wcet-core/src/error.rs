//! Error Handling
//!
//! This module provides the error taxonomy for the analysis core using `thiserror`.
//! Every public operation of the crate returns `Result<T, AnalysisError>` and
//! propagates failures explicitly to the pipeline orchestrator.
//!
//! # Error Categories
//! - **Load errors**: instruction provider failures (no code at address)
//! - **CFG errors**: disconnected CFGs, unresolved branches, irreducible loops
//! - **Domain errors**: non-monotone domains, divergence without widening
//! - **Solver errors**: infeasible or unbounded ILP systems, backend failures
//! - **Cancellation**: cooperative cancellation requested on the workspace

use crate::prog::Address;
use thiserror::Error;

/// Analysis error types.
///
/// Uses `thiserror` for zero-cost error handling with detailed error messages.
/// Errors identify the offending construct (instruction address, block id,
/// CFG label) so the caller can report the failing pass precisely.
#[derive(Error, Debug, Clone, PartialEq)]
pub enum AnalysisError {
    /// Binary loading or decoding failure surfaced from a collaborator.
    #[error("load error: {0}")]
    Load(String),

    /// No instruction exists at the given address.
    ///
    /// Raised by the instruction provider when an address falls outside any
    /// executable segment.
    #[error("no instruction at {0}")]
    UnknownInstruction(Address),

    /// Generic CFG construction or transformation failure.
    #[error("CFG error: {0}")]
    Cfg(String),

    /// A block is not co-reachable to the exit and normalization was not forced.
    #[error("CFG {cfg}: block {block} starts a dead-end")]
    DisconnectedCfg { cfg: String, block: u32 },

    /// A retreating edge whose target does not dominate its source was found
    /// where a reducible CFG is required.
    #[error("CFG {cfg}: irreducible loop entered at block {header}")]
    IrreducibleLoop { cfg: String, header: u32 },

    /// A loop header has no declared maximum iteration count.
    #[error("CFG {cfg}: no loop bound for header block {header}")]
    MissingLoopBound { cfg: String, header: u32 },

    /// Abstract domain misbehavior (programmer error, detected by debug checks).
    #[error("domain error in {pass}: {message}")]
    Domain {
        pass: &'static str,
        message: String,
    },

    /// The ILP system admits no solution.
    #[error("ILP system is infeasible")]
    Infeasible,

    /// The ILP objective is unbounded (usually a missing loop bound).
    #[error("ILP system is unbounded")]
    Unbounded,

    /// ILP solver backend failure.
    #[error("solver error: {0}")]
    Solver(String),

    /// A pass requirement was not satisfied by any prior pass.
    #[error("pass {pass} requires missing feature {feature}")]
    MissingFeature {
        pass: &'static str,
        feature: &'static str,
    },

    /// Cooperative cancellation was requested.
    #[error("analysis cancelled")]
    Cancelled,
}

/// Crate-wide result alias.
pub type Result<T> = std::result::Result<T, AnalysisError>;
