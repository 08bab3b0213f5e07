//! Error handling
//!
//! Defines error types and failure classification for the FTP client.

pub mod handlers;
pub mod types;

pub use handlers::{is_retryable, reply_to_error, transfer_reply_to_error};
pub use types::FtpError;

/// Result alias used throughout the crate.
pub type Result<T> = std::result::Result<T, FtpError>;
