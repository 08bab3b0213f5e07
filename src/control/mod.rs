//! Control connection
//!
//! Owns the persistent command connection and enforces strict
//! request/reply ordering on it.

pub mod channel;
pub mod state;

pub use channel::ControlChannel;
pub use state::ChannelState;
