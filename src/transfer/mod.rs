//! Transfer module for the FTP client
//!
//! Data channel negotiation, transfer descriptions, and the byte pump that
//! moves data between a data connection and local I/O.

pub mod data_channel;
pub mod modes;
pub mod results;
pub(crate) mod stream;

pub use data_channel::{DataConnection, open_active, open_passive};
pub use modes::{DataMode, TransferMode};
pub use results::{Direction, ProgressCallback, TransferDescriptor, TransferProgress};
