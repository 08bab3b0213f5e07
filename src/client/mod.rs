//! FTP client session
//!
//! The session object, its server-side state, and the operations it offers.

pub mod operations;
pub mod session;
pub mod state;
pub mod transfers;

pub use session::{CancelHandle, Session, parse_pwd_reply};
pub use state::SessionState;
