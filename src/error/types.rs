//! Error types
//!
//! Defines the error taxonomy shared by every layer of the FTP client.

use std::fmt;
use std::io;
use std::path::Path;

use crate::sync::SyncReport;

/// Errors raised by the codec, control channel, session, retry policy and
/// synchronizer.
#[derive(Debug)]
pub enum FtpError {
    /// The control connection could not be established.
    Connect { addr: String, reason: String },
    /// Credentials were rejected by the server.
    Auth { code: u16, message: String },
    /// A reply did not follow RFC 959 framing.
    Protocol(String),
    /// Data channel negotiation or connection failed.
    DataConnect(String),
    /// A data transfer was interrupted or came up short.
    Transfer { path: String, reason: String },
    /// A command received a non-2xx reply.
    RemoteOperation {
        path: String,
        code: u16,
        message: String,
    },
    /// I/O failure or timeout on the control connection.
    ControlIo(io::Error),
    /// The session has no usable control connection.
    NotConnected,
    /// A command could not be encoded (unknown verb or unsafe argument).
    InvalidCommand(String),
    /// Failure of a local file, sink or source.
    LocalIo { context: String, source: io::Error },
    /// Retry budget spent; carries the last failure.
    RetryExhausted { attempts: u32, last: Box<FtpError> },
    /// Every planned transfer of a synchronization pass failed.
    SyncFailed(Box<SyncReport>),
}

impl fmt::Display for FtpError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            FtpError::Connect { addr, reason } => {
                write!(f, "Failed to connect to {}: {}", addr, reason)
            }
            FtpError::Auth { code, message } => {
                write!(f, "Authentication failed ({}): {}", code, message)
            }
            FtpError::Protocol(msg) => write!(f, "Protocol error: {}", msg),
            FtpError::DataConnect(msg) => write!(f, "Data connection failed: {}", msg),
            FtpError::Transfer { path, reason } => {
                write!(f, "Transfer of {} failed: {}", path, reason)
            }
            FtpError::RemoteOperation {
                path,
                code,
                message,
            } => write!(f, "Remote operation on {} failed ({}): {}", path, code, message),
            FtpError::ControlIo(e) => write!(f, "Control connection error: {}", e),
            FtpError::NotConnected => write!(f, "Session is not connected"),
            FtpError::InvalidCommand(msg) => write!(f, "Invalid command: {}", msg),
            FtpError::LocalIo { context, source } => {
                write!(f, "Local I/O error ({}): {}", context, source)
            }
            FtpError::RetryExhausted { attempts, last } => {
                write!(f, "Gave up after {} attempts: {}", attempts, last)
            }
            FtpError::SyncFailed(report) => write!(
                f,
                "Synchronization failed: all {} transfers failed",
                report.failed.len()
            ),
        }
    }
}

impl std::error::Error for FtpError {
    fn source(&self) -> Option<&(dyn std::error::Error + 'static)> {
        match self {
            FtpError::ControlIo(e) => Some(e),
            FtpError::LocalIo { source, .. } => Some(source),
            FtpError::RetryExhausted { last, .. } => Some(last.as_ref()),
            _ => None,
        }
    }
}

impl From<io::Error> for FtpError {
    fn from(error: io::Error) -> Self {
        FtpError::ControlIo(error)
    }
}

impl FtpError {
    /// Wraps a local filesystem error with the path it concerns.
    pub fn local(path: &Path, source: io::Error) -> Self {
        FtpError::LocalIo {
            context: path.display().to_string(),
            source,
        }
    }

    /// Wraps a failure of a caller-supplied sink or source.
    pub fn local_stream(context: impl Into<String>, source: io::Error) -> Self {
        FtpError::LocalIo {
            context: context.into(),
            source,
        }
    }

    /// Server reply code carried by the error, if any.
    pub fn reply_code(&self) -> Option<u16> {
        match self {
            FtpError::Auth { code, .. } | FtpError::RemoteOperation { code, .. } => Some(*code),
            FtpError::RetryExhausted { last, .. } => last.reply_code(),
            _ => None,
        }
    }
}
