//! Error handlers
//!
//! Classifies failures for the retry policy and translates server replies
//! into error values.

use crate::error::types::FtpError;
use crate::protocol::Reply;

/// Returns true when a fresh attempt on a reconnected session may succeed.
pub fn is_retryable(err: &FtpError) -> bool {
    match err {
        FtpError::Connect { .. } => true,
        FtpError::DataConnect(_) => true,
        FtpError::Transfer { .. } => true,
        FtpError::ControlIo(_) => true,
        FtpError::NotConnected => true,
        // 4xx replies are transient by definition (RFC 959 4.2)
        FtpError::RemoteOperation { code, .. } => (400..500).contains(code),
        FtpError::Auth { .. } => false,
        FtpError::Protocol(_) => false,
        FtpError::InvalidCommand(_) => false,
        FtpError::LocalIo { .. } => false,
        FtpError::RetryExhausted { .. } => false,
        FtpError::SyncFailed(_) => false,
    }
}

/// Converts a non-2xx reply to a simple command into an error.
pub fn reply_to_error(path: &str, reply: &Reply) -> FtpError {
    FtpError::RemoteOperation {
        path: path.to_string(),
        code: reply.code,
        message: reply.text(),
    }
}

/// Converts the final reply of a data transfer into an error.
///
/// 425/426/451 mean the data connection itself broke, anything else is a
/// refusal of the operation.
pub fn transfer_reply_to_error(path: &str, reply: &Reply) -> FtpError {
    match reply.code {
        425 => FtpError::DataConnect(reply.text()),
        426 | 451 => FtpError::Transfer {
            path: path.to_string(),
            reason: format!("{} {}", reply.code, reply.text()),
        },
        _ => reply_to_error(path, reply),
    }
}

impl FtpError {
    /// See [`is_retryable`].
    pub fn is_retryable(&self) -> bool {
        is_retryable(self)
    }
}
