pub mod client;
pub mod config;
pub mod control;
pub mod error;
pub mod protocol;
pub mod retry;
pub mod sync;
pub mod transfer;
pub mod utils;

pub use client::Session;
pub use config::{ClientConfig, ConnectionParams};
pub use error::{FtpError, Result};
pub use retry::{RetryPolicy, with_retry};
