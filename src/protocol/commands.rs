//! Module `commands`
//!
//! Defines the FTP verbs this client speaks, the `Command` value sent over
//! the control connection, and the CRLF line encoding of commands.

use std::fmt;

use crate::error::{FtpError, Result};
use crate::utils::validation::is_valid_argument;

/// FTP verbs understood by the client.
///
/// The set is closed on purpose: anything outside it cannot be encoded.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Verb {
    USER,
    PASS,
    QUIT,
    CWD,
    PWD,
    TYPE,
    PASV,
    EPSV,
    PORT,
    EPRT,
    LIST,
    MLSD,
    RETR,
    STOR,
    REST,
    DELE,
    MKD,
    RMD,
    RNFR,
    RNTO,
    SIZE,
    MDTM,
    MFMT,
    FEAT,
    NOOP,
}

impl Verb {
    /// Wire spelling of the verb.
    pub fn as_str(&self) -> &'static str {
        match self {
            Verb::USER => "USER",
            Verb::PASS => "PASS",
            Verb::QUIT => "QUIT",
            Verb::CWD => "CWD",
            Verb::PWD => "PWD",
            Verb::TYPE => "TYPE",
            Verb::PASV => "PASV",
            Verb::EPSV => "EPSV",
            Verb::PORT => "PORT",
            Verb::EPRT => "EPRT",
            Verb::LIST => "LIST",
            Verb::MLSD => "MLSD",
            Verb::RETR => "RETR",
            Verb::STOR => "STOR",
            Verb::REST => "REST",
            Verb::DELE => "DELE",
            Verb::MKD => "MKD",
            Verb::RMD => "RMD",
            Verb::RNFR => "RNFR",
            Verb::RNTO => "RNTO",
            Verb::SIZE => "SIZE",
            Verb::MDTM => "MDTM",
            Verb::MFMT => "MFMT",
            Verb::FEAT => "FEAT",
            Verb::NOOP => "NOOP",
        }
    }

    /// Looks up a verb by its (case-insensitive) wire spelling.
    pub fn from_wire(raw: &str) -> Option<Verb> {
        let verb = match raw.to_ascii_uppercase().as_str() {
            "USER" => Verb::USER,
            "PASS" => Verb::PASS,
            "QUIT" => Verb::QUIT,
            "CWD" => Verb::CWD,
            "PWD" => Verb::PWD,
            "TYPE" => Verb::TYPE,
            "PASV" => Verb::PASV,
            "EPSV" => Verb::EPSV,
            "PORT" => Verb::PORT,
            "EPRT" => Verb::EPRT,
            "LIST" => Verb::LIST,
            "MLSD" => Verb::MLSD,
            "RETR" => Verb::RETR,
            "STOR" => Verb::STOR,
            "REST" => Verb::REST,
            "DELE" => Verb::DELE,
            "MKD" => Verb::MKD,
            "RMD" => Verb::RMD,
            "RNFR" => Verb::RNFR,
            "RNTO" => Verb::RNTO,
            "SIZE" => Verb::SIZE,
            "MDTM" => Verb::MDTM,
            "MFMT" => Verb::MFMT,
            "FEAT" => Verb::FEAT,
            "NOOP" => Verb::NOOP,
            _ => return None,
        };
        Some(verb)
    }

    /// Verbs whose single argument is a pathname that may contain spaces.
    pub fn takes_path(&self) -> bool {
        matches!(
            self,
            Verb::CWD
                | Verb::LIST
                | Verb::MLSD
                | Verb::RETR
                | Verb::STOR
                | Verb::DELE
                | Verb::MKD
                | Verb::RMD
                | Verb::RNFR
                | Verb::RNTO
                | Verb::SIZE
                | Verb::MDTM
        )
    }
}

impl fmt::Display for Verb {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// A command ready to be written to the control connection.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Command {
    pub verb: Verb,
    pub args: Vec<String>,
}

impl Command {
    pub fn new(verb: Verb) -> Self {
        Self {
            verb,
            args: Vec::new(),
        }
    }

    pub fn with_arg(verb: Verb, arg: impl Into<String>) -> Self {
        Self {
            verb,
            args: vec![arg.into()],
        }
    }

    /// Encodes the command as a CRLF-terminated line.
    pub fn encode(&self) -> Result<Vec<u8>> {
        let args: Vec<&str> = self.args.iter().map(String::as_str).collect();
        encode_command(self.verb, &args)
    }
}

impl fmt::Display for Command {
    /// Log-safe rendering: the PASS argument is masked.
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.verb)?;
        if self.verb == Verb::PASS {
            return write!(f, " ****");
        }
        for arg in &self.args {
            write!(f, " {}", arg)?;
        }
        Ok(())
    }
}

/// Encodes a verb and its arguments as `VERB arg1 arg2\r\n`.
pub fn encode_command(verb: Verb, args: &[&str]) -> Result<Vec<u8>> {
    let mut line = String::from(verb.as_str());
    for arg in args {
        if !is_valid_argument(arg) {
            return Err(FtpError::InvalidCommand(format!(
                "{} argument contains forbidden characters",
                verb
            )));
        }
        line.push(' ');
        line.push_str(arg);
    }
    line.push_str("\r\n");
    Ok(line.into_bytes())
}

/// Parses a raw command line the way a server would.
///
/// Path-taking verbs keep the whole remainder as their argument; other verbs
/// split their arguments on single spaces. Returns `None` for unknown verbs.
pub fn parse_command(raw: &str) -> Option<Command> {
    let line = raw.trim_end_matches(['\r', '\n']);
    let mut parts = line.splitn(2, ' ');
    let verb = Verb::from_wire(parts.next().unwrap_or(""))?;
    let rest = parts.next().unwrap_or("");

    let args = if rest.is_empty() {
        Vec::new()
    } else if verb.takes_path() {
        vec![rest.to_string()]
    } else {
        rest.split(' ').map(str::to_string).collect()
    };

    Some(Command { verb, args })
}
