//! Utility functions
//!
//! Provides logging, validation, network and remote path utilities.

pub mod logging;
pub mod network;
pub mod path;
pub mod validation;
