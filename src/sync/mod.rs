//! Tree synchronization
//!
//! Plans and applies the transfers that bring a local directory tree and a
//! remote one in line.

pub mod apply;
pub mod plan;
pub mod walker;

pub use apply::{SyncReport, apply, apply_parallel, download_directory, upload_directory};
pub use plan::{DiffPlan, SyncDirection, SyncOptions, diff, plan, plan_with};
pub use walker::{FsWalker, LocalEntry, LocalWalker};
