//! Common error types for Tavern

use thiserror::Error;

/// Common result type for Tavern operations
pub type Result<T> = std::result::Result<T, Error>;

/// Common error types shared by the server and the uploader
#[derive(Error, Debug)]
pub enum Error {
    /// I/O operation error (wraps std::io::Error)
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    /// Outbound HTTP request failed before a response was received
    #[error("HTTP error: {0}")]
    Http(#[from] reqwest::Error),

    /// Configuration loading or validation error
    #[error("Configuration error: {0}")]
    Config(String),

    /// GraphQL endpoint answered with errors
    #[error("GraphQL error: {0}")]
    GraphQl(String),

    /// Caller is not authenticated or the token was rejected
    #[error("Unauthorized: {0}")]
    Unauthorized(String),

    /// Optimistic-lock check failed: the stored version moved on
    #[error("Version conflict on {id}: expected version {expected}")]
    Conflict { id: String, expected: i64 },

    /// Requested resource not found
    #[error("Not found: {0}")]
    NotFound(String),

    /// Invalid user input or request parameter
    #[error("Invalid input: {0}")]
    InvalidInput(String),

    /// Internal error
    #[error("Internal error: {0}")]
    Internal(String),
}

impl Error {
    /// Network-level failures and 5xx-style upstream problems.
    ///
    /// Used by retry classifiers: these are worth another attempt,
    /// validation problems are not.
    pub fn is_transient(&self) -> bool {
        match self {
            Error::Http(e) => {
                e.is_timeout()
                    || e.is_connect()
                    || e.is_request()
                    || e.status().map(|s| s.is_server_error()).unwrap_or(false)
            }
            Error::Io(_) | Error::GraphQl(_) | Error::Conflict { .. } => true,
            _ => false,
        }
    }
}
