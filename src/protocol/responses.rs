//! FTP reply handling
//!
//! Defines the `Reply` value, the reply codes the client reacts to, and the
//! framing parser for single- and multi-line replies.

use std::io;
use tokio::io::{AsyncBufRead, AsyncBufReadExt, AsyncReadExt};

use crate::error::{FtpError, Result};

/// Standard FTP reply codes
pub const SERVICE_READY_SOON: u16 = 120;
pub const FILE_STATUS: u16 = 213;
pub const READY: u16 = 220;
pub const PASSIVE_MODE: u16 = 227;
pub const EXTENDED_PASSIVE_MODE: u16 = 229;
pub const LOGIN_SUCCESS: u16 = 230;
pub const PATH_CREATED: u16 = 257;
pub const PASSWORD_REQUIRED: u16 = 331;
pub const ACCOUNT_REQUIRED: u16 = 332;
pub const PENDING_FURTHER_INFO: u16 = 350;

/// Longest reply line accepted before the server is deemed broken.
pub const MAX_REPLY_LINE: u64 = 8192;

/// A complete server reply.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Reply {
    pub code: u16,
    pub message: Vec<String>,
}

impl Reply {
    pub fn new(code: u16, message: Vec<String>) -> Self {
        Self { code, message }
    }

    /// 1xx: the command started, a further reply will follow.
    pub fn is_preliminary(&self) -> bool {
        (100..200).contains(&self.code)
    }

    /// 2xx
    pub fn is_success(&self) -> bool {
        (200..300).contains(&self.code)
    }

    /// 3xx: more information is needed (e.g. PASS after USER).
    pub fn is_intermediate(&self) -> bool {
        (300..400).contains(&self.code)
    }

    /// 4xx
    pub fn is_transient_failure(&self) -> bool {
        (400..500).contains(&self.code)
    }

    /// 5xx
    pub fn is_permanent_failure(&self) -> bool {
        (500..600).contains(&self.code)
    }

    /// Message lines joined with a newline.
    pub fn text(&self) -> String {
        self.message.join("\n")
    }

    /// First message line, or an empty string.
    pub fn first_line(&self) -> &str {
        self.message.first().map(String::as_str).unwrap_or("")
    }
}

/// Splits a reply line into its code and the separator that follows it.
///
/// Returns `None` when the line does not start with a valid three digit code.
fn split_code(line: &str) -> Option<(u16, Option<char>, &str)> {
    let bytes = line.as_bytes();
    if bytes.len() < 3 || !bytes[..3].iter().all(u8::is_ascii_digit) {
        return None;
    }
    if !(b'1'..=b'5').contains(&bytes[0]) {
        return None;
    }
    let code: u16 = line[..3].parse().ok()?;
    let mut rest = line[3..].chars();
    match rest.next() {
        None => Some((code, None, "")),
        Some(sep @ (' ' | '-')) => Some((code, Some(sep), &line[4..])),
        Some(_) => None,
    }
}

/// Reads one line, without its CRLF, enforcing the line length limit.
///
/// Returns `Ok(None)` on a clean end of stream.
async fn read_line<R>(reader: &mut R) -> Result<Option<String>>
where
    R: AsyncBufRead + Unpin,
{
    let mut buf = Vec::new();
    let n = (&mut *reader)
        .take(MAX_REPLY_LINE + 1)
        .read_until(b'\n', &mut buf)
        .await?;
    if n == 0 {
        return Ok(None);
    }
    if buf.last() != Some(&b'\n') {
        if n as u64 > MAX_REPLY_LINE {
            return Err(FtpError::Protocol(format!(
                "reply line exceeds {} bytes",
                MAX_REPLY_LINE
            )));
        }
        return Err(FtpError::Protocol(
            "connection closed in the middle of a reply line".into(),
        ));
    }
    while matches!(buf.last(), Some(b'\n' | b'\r')) {
        buf.pop();
    }
    Ok(Some(String::from_utf8_lossy(&buf).into_owned()))
}

/// Reads lines from `reader` until one complete reply has been assembled.
///
/// Single-line replies are `CODE text`. Multi-line replies open with
/// `CODE-text` and end at the first line starting with `CODE ` (or the bare
/// code); lines in between are kept verbatim and the terminator is dropped.
///
/// A stream that ends before the first byte of a reply is a control I/O
/// failure (the peer hung up); one that ends inside a reply is a framing
/// error.
pub async fn parse_reply<R>(reader: &mut R) -> Result<Reply>
where
    R: AsyncBufRead + Unpin,
{
    let first = read_line(reader).await?.ok_or_else(|| {
        FtpError::ControlIo(io::Error::new(
            io::ErrorKind::UnexpectedEof,
            "connection closed before a reply arrived",
        ))
    })?;

    let (code, sep, text) = split_code(&first)
        .ok_or_else(|| FtpError::Protocol(format!("malformed reply line: {:?}", first)))?;

    let mut message = vec![text.to_string()];
    if sep != Some('-') {
        return Ok(Reply::new(code, message));
    }

    loop {
        let line = read_line(reader).await?.ok_or_else(|| {
            FtpError::Protocol(format!("connection closed inside multi-line {} reply", code))
        })?;

        match split_code(&line) {
            Some((c, sep, _)) if c == code && sep != Some('-') => {
                return Ok(Reply::new(code, message));
            }
            _ => message.push(line),
        }
    }
}
