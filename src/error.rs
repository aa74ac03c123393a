//! Error types and the non-fatal assertion macro
//!
//! Internal invariant violations go through [`sim_panic!`]; expected negative
//! outcomes are plain `Option`/`bool` returns. Only I/O-facing surfaces
//! (settings files, save streams) produce these error types.

use thiserror::Error;

/// Errors from configuration and simulation setup
#[derive(Debug, Error)]
pub enum SimError {
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),
    #[error("invalid JSON: {0}")]
    Json(#[from] serde_json::Error),
    #[error("invalid settings: {0}")]
    InvalidSettings(String),
}

/// Errors that can occur while saving or loading controller state
#[derive(Debug, Error)]
pub enum SaveError {
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),
    #[error("serialization error: {0}")]
    Bincode(#[from] Box<bincode::ErrorKind>),
    #[error("save version mismatch: expected {expected}, found {found}")]
    VersionMismatch { expected: u32, found: u32 },
    #[error("unknown move '{0}' in move set")]
    UnknownMove(String),
    #[error("move set '{0}' is not registered")]
    UnknownMoveSet(String),
    #[error("entity has no movement controller")]
    NoController,
    #[error("invalid enum value {value} for {field}")]
    InvalidEnum { field: &'static str, value: u8 },
}

/// Invariant violation: halts in debug builds, logs and continues in release.
///
/// Callers follow it with their own safe fallback (usually an early return).
#[macro_export]
macro_rules! sim_panic {
    ($($arg:tt)*) => {{
        log::error!($($arg)*);
        if cfg!(debug_assertions) {
            panic!($($arg)*);
        }
    }};
}
