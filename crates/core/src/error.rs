//! Error types for the Campusd domain.
//!
//! Uses `thiserror` for ergonomic error definitions.
//! Each bounded context has its own error variant.

use thiserror::Error;

/// The top-level error type for all Campusd operations.
#[derive(Debug, Error)]
pub enum Error {
    // --- Reasoning service errors ---
    #[error("Reasoner error: {0}")]
    Reasoner(#[from] ReasonerError),

    // --- Store errors ---
    #[error("Store error: {0}")]
    Store(#[from] StoreError),

    // --- Tool errors ---
    #[error("Tool error: {0}")]
    Tool(#[from] ToolError),

    // --- Configuration errors ---
    #[error("Configuration error: {message}")]
    Config { message: String },

    // --- Serialization ---
    #[error("Serialization error: {0}")]
    Serialization(#[from] serde_json::Error),

    // --- Generic ---
    #[error("Internal error: {0}")]
    Internal(String),
}

/// Result type alias using our Error.
pub type Result<T> = std::result::Result<T, Error>;

// --- Bounded context errors ---

/// Failures of the external reasoning service.
///
/// All of these are recoverable per turn — they fail the request that
/// triggered them, never the process.
#[derive(Debug, Clone, Error)]
pub enum ReasonerError {
    #[error("API request failed: {message} (status: {status_code})")]
    ApiError { status_code: u16, message: String },

    #[error("Rate limited by reasoning service, retry after {retry_after_secs}s")]
    RateLimited { retry_after_secs: u64 },

    #[error("Authentication failed: {0}")]
    AuthenticationFailed(String),

    #[error("Stream interrupted: {0}")]
    StreamInterrupted(String),

    #[error("Reasoner not configured: {0}")]
    NotConfigured(String),

    #[error("Request timed out after {0}s")]
    Timeout(u64),

    #[error("Network error: {0}")]
    Network(String),
}

#[derive(Debug, Error)]
pub enum StoreError {
    #[error("Storage error: {0}")]
    Storage(String),

    #[error("Query failed: {0}")]
    QueryFailed(String),

    #[error("Duplicate key: {0}")]
    DuplicateKey(String),

    #[error("Migration failed: {0}")]
    MigrationFailed(String),
}

/// Tool-boundary failures.
///
/// `NotFound` and `InvalidArguments` are the two distinct rejection classes
/// for untrusted tool selections; `ExecutionFailed` wraps expected domain
/// failures (missing student, duplicate key) surfaced by an implementation.
/// None of these ever cross the registry boundary as an `Err` — the registry
/// converts them into failed `ToolCallResult`s.
#[derive(Debug, Error)]
pub enum ToolError {
    #[error("unknown function: {0}")]
    NotFound(String),

    #[error("malformed arguments: {0}")]
    InvalidArguments(String),

    #[error("{tool_name} failed: {reason}")]
    ExecutionFailed { tool_name: String, reason: String },
}

impl ToolError {
    /// Wrap a store failure at a named tool's boundary.
    pub fn execution(tool_name: impl Into<String>, reason: impl std::fmt::Display) -> Self {
        Self::ExecutionFailed {
            tool_name: tool_name.into(),
            reason: reason.to_string(),
        }
    }
}
