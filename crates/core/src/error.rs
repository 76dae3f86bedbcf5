//! Centralized error types for the Sentinel workspace.

use alloy_primitives::Address;
use thiserror::Error;

/// Chain Oracle failures.
///
/// A single endpoint timeout never surfaces here — only exhaustion of the
/// whole endpoint list for a chain does.
#[derive(Debug, Error)]
#[non_exhaustive]
pub enum OracleError {
    #[error("All endpoints timed out for chain {0}")]
    Timeout(u64),

    #[error("No reachable endpoint for chain {0}")]
    NotReachable(u64),

    #[error("Invalid RPC response: {0}")]
    InvalidResponse(String),

    #[error("Circuit open for endpoint {0}")]
    CircuitOpen(String),
}

/// EVM harness failures. `InvariantBroken` is fatal for the enclosing scan;
/// a revert during execution is a normal [`Outcome`](crate::types::Outcome),
/// never an error.
#[derive(Debug, Error)]
pub enum EvmError {
    #[error("EVM invariant broken: {0}")]
    InvariantBroken(String),
}

/// Proxy resolution failures. Both variants are non-fatal: the walk stops
/// and analysis continues at the last sound address.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum ResolverError {
    #[error("Proxy cycle detected at {0}")]
    CycleDetected(Address),

    #[error("Proxy chain exceeded max depth {0}")]
    DepthExceeded(usize),
}

/// Classifier oracle failures. Non-fatal — the verdict assembler proceeds
/// without an ML result.
#[derive(Debug, Error)]
pub enum ClassifierError {
    #[error("Classifier oracle unavailable: {0}")]
    Unavailable(String),

    #[error("Malformed classifier response: {0}")]
    Malformed(String),
}

/// History store failures. Non-fatal — drift analysis is omitted.
#[derive(Debug, Error)]
pub enum HistoryError {
    #[error("History store unavailable: {0}")]
    Unavailable(String),
}

/// Top-level error enum. Variants map to subsystems.
#[derive(Debug, Error)]
#[non_exhaustive]
pub enum SentinelError {
    #[error(transparent)]
    Oracle(#[from] OracleError),

    #[error(transparent)]
    Evm(#[from] EvmError),

    #[error(transparent)]
    Resolver(#[from] ResolverError),

    #[error(transparent)]
    Classifier(#[from] ClassifierError),

    #[error(transparent)]
    History(#[from] HistoryError),

    #[error("Scan deadline exceeded")]
    Deadline,

    #[error("Invalid input: {0}")]
    InvalidInput(String),

    #[error("Internal error: {0}")]
    Internal(String),
}

pub type SentinelResult<T> = Result<T, SentinelError>;
