//! Error types for the acquisition link.
//!
//! This module provides error handling for the temlink library. All errors
//! implement the `std::error::Error` trait and include structured context.
//!
//! ## Error Categories
//!
//! - **Transport Errors**: connect failures, timeouts, mid-session socket errors
//! - **Command Rejections**: operations issued in a state that forbids them
//! - **Persistence Errors**: sample store save/load failures
//! - **Export Errors**: CSV destination open/write failures
//!
//! Protocol-level problems (malformed JSON frames, truncated binary payloads)
//! are deliberately *not* errors: the link degrades them to dropped frames or
//! shortened arrays and counts them in [`DecodeStats`](crate::codec::DecodeStats).
//!
//! ## Helper Constructors
//!
//! ```rust
//! use temlink::LinkError;
//!
//! let err = LinkError::transport("connection refused by 192.168.1.100:8888");
//! assert!(err.is_retryable());
//!
//! let err = LinkError::rejected("start_acquisition", "device not connected");
//! assert!(!err.is_retryable());
//! ```

use std::path::PathBuf;
use std::time::Duration;
use thiserror::Error;

/// Result type alias for link operations.
pub type Result<T, E = LinkError> = std::result::Result<T, E>;

/// Main error type for acquisition link operations.
#[derive(Error, Debug)]
#[non_exhaustive]
pub enum LinkError {
    #[error("transport error: {reason}")]
    Transport {
        reason: String,
        #[source]
        source: Option<Box<dyn std::error::Error + Send + Sync>>,
    },

    #[error("connect attempt timed out after {duration:?}")]
    ConnectTimeout { duration: Duration },

    #[error("command '{command}' rejected: {reason}")]
    CommandRejected { command: &'static str, reason: String },

    #[error("persistence error: {context}")]
    Persistence {
        context: String,
        #[source]
        source: Option<Box<dyn std::error::Error + Send + Sync>>,
    },

    #[error("no sample data recorded for point {point_id}")]
    NoSampleData { point_id: i64 },

    #[error("export failed: {path}")]
    Export {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },
}

impl LinkError {
    /// Returns whether this error is potentially recoverable through retry.
    pub fn is_retryable(&self) -> bool {
        match self {
            LinkError::Transport { .. } => true,
            LinkError::ConnectTimeout { .. } => true,
            LinkError::Persistence { .. } => true,
            LinkError::CommandRejected { .. } => false,
            LinkError::NoSampleData { .. } => false,
            LinkError::Export { .. } => false,
        }
    }

    /// Helper constructor for transport errors.
    pub fn transport(reason: impl Into<String>) -> Self {
        LinkError::Transport { reason: reason.into(), source: None }
    }

    /// Helper constructor for transport errors with a source.
    pub fn transport_with_source(
        reason: impl Into<String>,
        source: Box<dyn std::error::Error + Send + Sync>,
    ) -> Self {
        LinkError::Transport { reason: reason.into(), source: Some(source) }
    }

    /// Helper constructor for command rejections.
    pub fn rejected(command: &'static str, reason: impl Into<String>) -> Self {
        LinkError::CommandRejected { command, reason: reason.into() }
    }

    /// Helper constructor for persistence errors.
    pub fn persistence(context: impl Into<String>) -> Self {
        LinkError::Persistence { context: context.into(), source: None }
    }

    /// Helper constructor for persistence errors with a source.
    pub fn persistence_with_source(
        context: impl Into<String>,
        source: Box<dyn std::error::Error + Send + Sync>,
    ) -> Self {
        LinkError::Persistence { context: context.into(), source: Some(source) }
    }

    /// Helper constructor for CSV export errors with path context.
    pub fn export(path: PathBuf, source: std::io::Error) -> Self {
        LinkError::Export { path, source }
    }
}

impl From<std::io::Error> for LinkError {
    fn from(err: std::io::Error) -> Self {
        LinkError::Transport { reason: err.to_string(), source: Some(Box::new(err)) }
    }
}
