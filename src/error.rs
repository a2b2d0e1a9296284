//! Error types for gate construction and configuration
//!
//! Denials are not errors: a request that lacks consent or capability produces a
//! [`Verdict`](crate::core::engine::Verdict). Everything here is a startup or
//! tooling failure.

use thiserror::Error;

/// Gate result type
pub type Result<T> = std::result::Result<T, GateError>;

/// Errors raised while building rule tables, loading configuration or running tooling
#[derive(Error, Debug)]
pub enum GateError {
    /// Rule table has no entries at all
    #[error("Rule table '{0}' is empty")]
    EmptyTable(String),

    /// Rule table does not end with a universal, method-agnostic entry
    #[error("Rule table '{0}' has no catch-all fallback entry as its last rule")]
    MissingFallback(String),

    /// A catch-all entry appears before the end of the table
    #[error("Rule table '{table}': entry {index} is a catch-all and shadows every later rule")]
    UnreachableRule { table: String, index: usize },

    /// Pattern could not be compiled
    #[error("Invalid pattern '{pattern}': {reason}")]
    InvalidPattern { pattern: String, reason: String },

    /// Method name is not a valid HTTP token
    #[error("Invalid HTTP method: {0}")]
    InvalidMethod(String),

    /// Configuration failed validation
    #[error("Invalid configuration: {0}")]
    Config(String),

    /// TOML parse failure
    #[error("Configuration parse error: {0}")]
    Toml(#[from] toml::de::Error),

    /// JSON serialization failure
    #[error("Serialization error: {0}")]
    Serialization(#[from] serde_json::Error),

    /// I/O error
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),
}

impl From<validator::ValidationErrors> for GateError {
    fn from(errors: validator::ValidationErrors) -> Self {
        GateError::Config(errors.to_string())
    }
}
