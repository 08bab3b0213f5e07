//! FTP transfer modes
//!
//! Representation type (`TYPE`) and data connection mode (passive/active).

use serde::Deserialize;

/// Representation type negotiated with `TYPE`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum TransferMode {
    #[default]
    Binary,
    Ascii,
}

impl TransferMode {
    /// Argument of the `TYPE` command.
    pub fn type_code(&self) -> &'static str {
        match self {
            TransferMode::Binary => "I",
            TransferMode::Ascii => "A",
        }
    }
}

/// Who opens the data connection.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DataMode {
    /// Client connects to a server-assigned port (PASV/EPSV).
    Passive,
    /// Server connects to a client-advertised port (PORT/EPRT).
    Active,
}
