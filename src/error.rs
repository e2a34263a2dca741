//! Defines the custom error types for the wallshop-forms service.

use crate::rate_limit::RateLimitDecision;
use std::collections::BTreeMap;
use std::io;
use thiserror::Error;

/// Per-field validation messages, keyed by the wire name of the field.
pub(crate) type FieldErrors = BTreeMap<String, String>;

/// The primary error type for the form-intake pipeline.
#[derive(Error, Debug)]
pub(crate) enum AppError {
    /// Required configuration (e.g. the mail provider API key) is missing or invalid.
    #[error("Configuration Error: {0}")]
    Config(String),

    /// The request body could not be parsed as JSON.
    #[error("Malformed Request: {0}")]
    MalformedRequest(String),

    /// The request body exceeded the configured size limit.
    #[error("Payload Too Large: {size} bytes (limit {limit})")]
    PayloadTooLarge { size: usize, limit: usize },

    /// One or more fields failed validation. Every violated rule is reported.
    #[error("Validation Error: {} field(s) invalid", .0.len())]
    Validation(FieldErrors),

    /// The caller exceeded the per-window request quota.
    #[error("Rate Limited: retry after {retry_after_secs}s")]
    RateLimited {
        retry_after_secs: u64,
        decision: RateLimitDecision,
    },

    /// Fewer outbound emails succeeded than the dispatch policy requires.
    #[error("Dispatch Error: {succeeded} of {attempted} sends succeeded (needed {required})")]
    Dispatch {
        attempted: usize,
        succeeded: usize,
        required: usize,
    },

    /// Error related to file input/output operations.
    #[error("IO Error: {0}")]
    Io(#[from] io::Error),

    /// Error during JSON serialization or deserialization.
    #[error("JSON Error: {0}")]
    Json(#[from] serde_json::Error),

    /// Error making HTTP requests via reqwest.
    #[error("HTTP Request Error: {0}")]
    Request(#[from] reqwest::Error),

    /// Anything else. Surfaced to clients only as a generic failure.
    #[error("Unexpected Error: {0}")]
    Unknown(#[from] anyhow::Error),
}

pub(crate) type Result<T> = std::result::Result<T, AppError>;

/// Failure reported by a mail provider for a single message.
#[derive(Error, Debug)]
pub(crate) enum MailError {
    /// The provider could not be reached or the connection failed mid-request.
    #[error("transport error: {0}")]
    Transport(#[from] reqwest::Error),

    /// The provider answered with a non-success status.
    #[error("provider rejected message ({status}): {body}")]
    Rejected { status: u16, body: String },

    /// The provider accepted the request but the response carried no message id.
    #[error("provider response missing message id")]
    MissingId,

    /// The send did not complete within the dispatch timeout.
    #[error("send timed out after {0:?}")]
    Timeout(std::time::Duration),
}
