//! # Tavern Common Library
//!
//! Shared code for the Tavern server and uploader including:
//! - Session, campaign and upload-progress models
//! - HTTP request/response types for the upload relay
//! - Configuration loading
//! - Retry with backoff
//! - Storage file naming and size limits
//! - GraphQL client for session records

pub mod api;
pub mod config;
pub mod error;
pub mod graphql;
pub mod limits;
pub mod models;
pub mod naming;
pub mod retry;

pub use error::{Error, Result};
pub use naming::generate_file_name;
pub use retry::{retry, Backoff, RetryDecision, RetryPolicy};
