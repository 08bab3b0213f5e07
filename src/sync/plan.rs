//! Synchronization planning
//!
//! Compares a local and a remote tree by relative path and decides, per
//! file, whether to upload, download or leave it alone.

use chrono::{DateTime, Utc};
use log::{debug, info, warn};
use serde::Deserialize;
use std::collections::BTreeMap;
use std::path::{Path, PathBuf};
use std::time::Duration;

use crate::client::Session;
use crate::error::{FtpError, Result};
use crate::protocol::{EntryKind, RemoteEntry};
use crate::sync::walker::{FsWalker, LocalEntry, LocalWalker, local_path};
use crate::transfer::TransferDescriptor;
use crate::utils::path;

/// Which side is brought up to date.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum SyncDirection {
    /// Local is the source.
    Upload,
    /// Remote is the source.
    Download,
    /// The newer side wins.
    #[default]
    Both,
}

impl SyncDirection {
    fn uploads(&self) -> bool {
        matches!(self, SyncDirection::Upload | SyncDirection::Both)
    }

    fn downloads(&self) -> bool {
        matches!(self, SyncDirection::Download | SyncDirection::Both)
    }
}

/// Tuning for one planning pass.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SyncOptions {
    pub direction: SyncDirection,
    pub max_depth: usize,
    /// Modification times closer than this count as equal.
    pub mtime_tolerance: Duration,
}

impl Default for SyncOptions {
    fn default() -> Self {
        Self {
            direction: SyncDirection::Both,
            max_depth: 32,
            mtime_tolerance: Duration::from_secs(1),
        }
    }
}

/// Work needed to bring the two trees in line.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct DiffPlan {
    pub to_upload: Vec<TransferDescriptor>,
    pub to_download: Vec<TransferDescriptor>,
    /// Relative paths present and identical on both sides.
    pub to_skip: Vec<String>,
    /// Remote directories to create, parents first.
    pub remote_directories: Vec<String>,
    /// Local directories to create, parents first.
    pub local_directories: Vec<PathBuf>,
}

impl DiffPlan {
    pub fn transfer_count(&self) -> usize {
        self.to_upload.len() + self.to_download.len()
    }

    pub fn is_empty(&self) -> bool {
        self.transfer_count() == 0
            && self.remote_directories.is_empty()
            && self.local_directories.is_empty()
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Newer {
    Local,
    Remote,
    Neither,
}

fn newer_side(local: Option<DateTime<Utc>>, remote: Option<DateTime<Utc>>, tolerance: Duration) -> Newer {
    let (Some(local), Some(remote)) = (local, remote) else {
        return Newer::Neither;
    };
    let tolerance_ms = i64::try_from(tolerance.as_millis()).unwrap_or(i64::MAX);
    let diff_ms = (local - remote).num_milliseconds();
    if diff_ms > tolerance_ms {
        Newer::Local
    } else if -diff_ms > tolerance_ms {
        Newer::Remote
    } else {
        Newer::Neither
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Action {
    Upload,
    Download,
    Skip,
}

/// Decides what to do with a file present on both sides.
fn compare(local: &LocalEntry, remote: &RemoteEntry, options: &SyncOptions) -> Action {
    let sizes_differ = remote.size.is_some_and(|size| size != local.size);
    let newer = newer_side(local.modified_time, remote.modified_time, options.mtime_tolerance);

    match options.direction {
        SyncDirection::Upload if sizes_differ || newer == Newer::Local => Action::Upload,
        SyncDirection::Download if sizes_differ || newer == Newer::Remote => Action::Download,
        SyncDirection::Both => match newer {
            Newer::Local => Action::Upload,
            Newer::Remote => Action::Download,
            // No usable times: local is authoritative.
            Newer::Neither if sizes_differ => Action::Upload,
            Newer::Neither => Action::Skip,
        },
        _ => Action::Skip,
    }
}

/// Builds a plan from already collected entries of both trees.
pub fn diff(
    local_root: &Path,
    local: &[LocalEntry],
    remote_root: &str,
    remote: &[(String, RemoteEntry)],
    options: &SyncOptions,
) -> DiffPlan {
    let local_by_path: BTreeMap<&str, &LocalEntry> =
        local.iter().map(|e| (e.path.as_str(), e)).collect();
    let remote_by_path: BTreeMap<&str, &RemoteEntry> =
        remote.iter().map(|(p, e)| (p.as_str(), e)).collect();
    let direction = options.direction;
    let mut plan = DiffPlan::default();

    let upload = |relative: &str, entry: &LocalEntry| {
        TransferDescriptor::upload(local_path(local_root, relative), path::join(remote_root, relative))
            .with_expected_size(Some(entry.size))
            .with_modified_time(entry.modified_time)
            .with_relative_path(relative)
    };
    let download = |relative: &str, entry: &RemoteEntry| {
        TransferDescriptor::download(path::join(remote_root, relative), local_path(local_root, relative))
            .with_expected_size(entry.size)
            .with_modified_time(entry.modified_time)
            .with_relative_path(relative)
    };

    for (&relative, &entry) in &local_by_path {
        match (entry.is_directory, remote_by_path.get(relative).copied()) {
            (true, None) if direction.uploads() => {
                plan.remote_directories.push(path::join(remote_root, relative));
            }
            (true, Some(remote)) if !remote.is_directory() => {
                warn!("{} is a directory locally but not remotely, skipping", relative);
            }
            (true, _) => {}
            (false, None) if direction.uploads() => plan.to_upload.push(upload(relative, entry)),
            (false, None) => {}
            (false, Some(remote)) if !remote.is_file() => {
                warn!("{} is a file locally but a {:?} remotely, skipping", relative, remote.kind);
            }
            (false, Some(remote)) => match compare(entry, remote, options) {
                Action::Upload => plan.to_upload.push(upload(relative, entry)),
                Action::Download => plan.to_download.push(download(relative, remote)),
                Action::Skip => plan.to_skip.push(relative.to_string()),
            },
        }
    }

    if direction.downloads() {
        for (&relative, &entry) in &remote_by_path {
            if local_by_path.contains_key(relative) {
                continue;
            }
            match entry.kind {
                EntryKind::Directory => plan.local_directories.push(local_path(local_root, relative)),
                EntryKind::File => plan.to_download.push(download(relative, entry)),
                EntryKind::Link | EntryKind::Special => {
                    debug!("Not downloading {:?} {}", entry.kind, relative);
                }
            }
        }
    }

    plan
}

/// Walks both trees and plans the transfers between them.
pub async fn plan(local_root: &Path, remote_root: &str, session: &mut Session, options: &SyncOptions) -> Result<DiffPlan> {
    plan_with(&FsWalker, local_root, remote_root, session, options).await
}

/// [`plan`] with a caller-supplied local walker.
pub async fn plan_with<W>(
    walker: &W,
    local_root: &Path,
    remote_root: &str,
    session: &mut Session,
    options: &SyncOptions,
) -> Result<DiffPlan>
where
    W: LocalWalker + ?Sized,
{
    let local_exists = tokio::fs::try_exists(local_root)
        .await
        .map_err(|e| FtpError::local(local_root, e))?;
    let local = if local_exists {
        walker.walk(local_root, options.max_depth).await?
    } else if options.direction.uploads() {
        return Err(FtpError::local(
            local_root,
            std::io::Error::new(std::io::ErrorKind::NotFound, "local root does not exist"),
        ));
    } else {
        Vec::new()
    };

    let remote_root = path::resolve(session.current_directory(), remote_root);
    let mut missing_remote_root = false;
    let remote = match session.walk(&remote_root, options.max_depth).await {
        Ok(entries) => entries,
        Err(FtpError::RemoteOperation { code, .. }) if (500..600).contains(&code) && options.direction.uploads() => {
            debug!("Remote root {} not listable ({}), treating as empty", remote_root, code);
            missing_remote_root = true;
            Vec::new()
        }
        Err(e) => return Err(e),
    };

    let mut plan = diff(local_root, &local, &remote_root, &remote, options);
    if missing_remote_root {
        plan.remote_directories.insert(0, remote_root.clone());
    }
    if !local_exists {
        plan.local_directories.insert(0, local_root.to_path_buf());
    }

    info!(
        "Planned sync {} <-> {}: {} uploads, {} downloads, {} unchanged",
        local_root.display(),
        remote_root,
        plan.to_upload.len(),
        plan.to_download.len(),
        plan.to_skip.len()
    );
    Ok(plan)
}
