//! Synchronization execution
//!
//! Carries out a [`DiffPlan`]: directories first, then every transfer under
//! the retry policy. A failing file is recorded and the pass moves on.

use log::{error, info, warn};
use std::collections::{BTreeMap, VecDeque};
use std::path::Path;
use std::sync::Arc;
use tokio::sync::Mutex;

use crate::client::Session;
use crate::config::ConnectionParams;
use crate::error::{FtpError, Result};
use crate::retry::{RetryPolicy, with_retry};
use crate::sync::plan::{DiffPlan, SyncDirection, SyncOptions, plan};
use crate::transfer::{Direction, TransferDescriptor};

/// Outcome of a synchronization pass, keyed by path relative to the roots.
#[derive(Debug, Default)]
pub struct SyncReport {
    pub succeeded: Vec<String>,
    pub failed: BTreeMap<String, FtpError>,
    pub skipped: usize,
    pub bytes_transferred: u64,
}

impl SyncReport {
    pub fn is_complete(&self) -> bool {
        self.failed.is_empty()
    }

    fn merge(&mut self, other: SyncReport) {
        self.succeeded.extend(other.succeeded);
        self.failed.extend(other.failed);
        self.bytes_transferred += other.bytes_transferred;
    }

    fn record(&mut self, path: String, outcome: Result<u64>) {
        match outcome {
            Ok(bytes) => {
                self.bytes_transferred += bytes;
                self.succeeded.push(path);
            }
            Err(e) => {
                error!("Failed to synchronize {}: {}", path, e);
                self.failed.insert(path, e);
            }
        }
    }

    /// Fails with the report itself when nothing that was attempted worked.
    fn finish(self, attempted: usize) -> Result<SyncReport> {
        info!(
            "Sync finished: {} transferred ({} bytes), {} failed, {} unchanged",
            self.succeeded.len(),
            self.bytes_transferred,
            self.failed.len(),
            self.skipped
        );
        if attempted > 0 && self.succeeded.is_empty() {
            return Err(FtpError::SyncFailed(Box::new(self)));
        }
        Ok(self)
    }
}

/// One file transfer, in either direction.
async fn transfer(session: &mut Session, descriptor: &TransferDescriptor) -> Result<u64> {
    match descriptor.direction {
        Direction::Upload => session.upload_file(descriptor).await,
        Direction::Download => session.download_file(descriptor).await,
    }
}

async fn transfer_with_retry(session: &mut Session, policy: &RetryPolicy, descriptor: &TransferDescriptor) -> Result<u64> {
    with_retry(session, policy, |s| {
        let descriptor = descriptor.clone();
        Box::pin(async move { transfer(s, &descriptor).await })
    })
    .await
}

async fn create_directories(plan: &DiffPlan, session: &mut Session, policy: &RetryPolicy) {
    for directory in &plan.local_directories {
        if let Err(e) = tokio::fs::create_dir_all(directory).await {
            warn!("Could not create local directory {}: {}", directory.display(), e);
        }
    }
    for directory in &plan.remote_directories {
        let created = with_retry(session, policy, |s| {
            let directory = directory.clone();
            Box::pin(async move { s.make_directories(&directory).await })
        })
        .await;
        if let Err(e) = created {
            warn!("Could not create remote directory {}: {}", directory, e);
        }
    }
}

/// Applies `plan` on one session.
///
/// Returns [`FtpError::SyncFailed`] only when every planned transfer failed.
pub async fn apply(plan: &DiffPlan, session: &mut Session, policy: &RetryPolicy) -> Result<SyncReport> {
    create_directories(plan, session, policy).await;

    let mut report = SyncReport {
        skipped: plan.to_skip.len(),
        ..SyncReport::default()
    };
    for descriptor in plan.to_upload.iter().chain(&plan.to_download) {
        let outcome = transfer_with_retry(session, policy, descriptor).await;
        report.record(descriptor.report_path().to_string(), outcome);
    }
    report.finish(plan.transfer_count())
}

/// Applies `plan` with `workers` parallel sessions.
///
/// Directories are created on `session`; transfers are pulled from a shared
/// queue by worker tasks that each open their own session with `params`.
/// Whatever the workers leave behind (e.g. when they cannot connect) is
/// finished on `session`.
pub async fn apply_parallel(
    plan: &DiffPlan,
    session: &mut Session,
    params: &ConnectionParams,
    policy: &RetryPolicy,
    workers: usize,
) -> Result<SyncReport> {
    let workers = workers.min(plan.transfer_count());
    if workers <= 1 {
        return apply(plan, session, policy).await;
    }

    create_directories(plan, session, policy).await;

    let queue: Arc<Mutex<VecDeque<TransferDescriptor>>> = Arc::new(Mutex::new(
        plan.to_upload
            .iter()
            .chain(&plan.to_download)
            .cloned()
            .collect(),
    ));

    let mut handles = Vec::with_capacity(workers);
    for id in 0..workers {
        let queue = Arc::clone(&queue);
        let params = params.clone();
        let policy = policy.clone();
        handles.push(tokio::spawn(async move {
            run_worker(id, queue, params, policy).await
        }));
    }

    let mut report = SyncReport {
        skipped: plan.to_skip.len(),
        ..SyncReport::default()
    };
    for handle in handles {
        match handle.await {
            Ok(partial) => report.merge(partial),
            Err(e) => error!("Sync worker terminated abnormally: {}", e),
        }
    }

    let leftovers: Vec<TransferDescriptor> = queue.lock().await.drain(..).collect();
    if !leftovers.is_empty() {
        warn!("{} transfers left by workers, finishing on the main session", leftovers.len());
        for descriptor in &leftovers {
            let outcome = transfer_with_retry(session, policy, descriptor).await;
            report.record(descriptor.report_path().to_string(), outcome);
        }
    }

    report.finish(plan.transfer_count())
}

async fn run_worker(
    id: usize,
    queue: Arc<Mutex<VecDeque<TransferDescriptor>>>,
    params: ConnectionParams,
    policy: RetryPolicy,
) -> SyncReport {
    let mut report = SyncReport::default();
    let mut session = match policy.connect(&params).await {
        Ok(session) => session,
        Err(e) => {
            warn!("Sync worker {} could not connect: {}", id, e);
            return report;
        }
    };
    info!("Sync worker {} started", id);

    loop {
        let next = queue.lock().await.pop_front();
        let Some(descriptor) = next else {
            break;
        };
        let outcome = transfer_with_retry(&mut session, &policy, &descriptor).await;
        report.record(descriptor.report_path().to_string(), outcome);
    }

    session.quit().await;
    info!(
        "Sync worker {} finished: {} ok, {} failed",
        id,
        report.succeeded.len(),
        report.failed.len()
    );
    report
}

/// Mirrors a local directory to the server.
pub async fn upload_directory(
    local_root: &Path,
    remote_root: &str,
    session: &mut Session,
    policy: &RetryPolicy,
    options: &SyncOptions,
) -> Result<SyncReport> {
    let options = SyncOptions {
        direction: SyncDirection::Upload,
        ..options.clone()
    };
    let plan = plan(local_root, remote_root, session, &options).await?;
    apply(&plan, session, policy).await
}

/// Mirrors a remote directory to the local filesystem.
pub async fn download_directory(
    remote_root: &str,
    local_root: &Path,
    session: &mut Session,
    policy: &RetryPolicy,
    options: &SyncOptions,
) -> Result<SyncReport> {
    let options = SyncOptions {
        direction: SyncDirection::Download,
        ..options.clone()
    };
    let plan = plan(local_root, remote_root, session, &options).await?;
    apply(&plan, session, policy).await
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io;

    #[test]
    fn report_fails_only_when_nothing_succeeded() {
        let mut report = SyncReport::default();
        report.record("a".into(), Ok(3));
        report.record(
            "b".into(),
            Err(FtpError::ControlIo(io::Error::other("reset"))),
        );
        let report = report.finish(2).unwrap();
        assert_eq!(report.succeeded, vec!["a"]);
        assert!(report.failed.contains_key("b"));
        assert_eq!(report.bytes_transferred, 3);
        assert!(!report.is_complete());

        let mut all_failed = SyncReport::default();
        all_failed.record("b".into(), Err(FtpError::NotConnected));
        match all_failed.finish(1) {
            Err(FtpError::SyncFailed(report)) => assert_eq!(report.failed.len(), 1),
            other => panic!("expected SyncFailed, got {:?}", other),
        }
    }

    #[test]
    fn planned_transfers_are_reported_by_relative_path() {
        let planned = TransferDescriptor::download("/srv/pub/docs/a.txt", "/tmp/docs/a.txt")
            .with_relative_path("docs/a.txt");
        assert_eq!(planned.report_path(), "docs/a.txt");

        let ad_hoc = TransferDescriptor::download("/srv/pub/b.txt", "/tmp/b.txt");
        assert_eq!(ad_hoc.report_path(), "/srv/pub/b.txt");
    }

    #[test]
    fn empty_plan_is_not_a_failure() {
        assert!(SyncReport::default().finish(0).unwrap().is_complete());
    }
}
