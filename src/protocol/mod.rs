//! FTP wire codec
//!
//! Encodes commands, parses replies, and parses directory listings.

pub mod commands;
pub mod listing;
pub mod responses;

pub use commands::{Command, Verb, encode_command, parse_command};
pub use listing::{EntryKind, Listing, ListingFormat, RemoteEntry};
pub use responses::{Reply, parse_reply};
