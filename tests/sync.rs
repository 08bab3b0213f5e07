mod support;

use chrono::{DateTime, Duration as ChronoDuration, TimeZone, Utc};
use std::fs;
use std::path::Path;
use std::time::{Duration, SystemTime};

use rax_ftp_client::sync::{
    SyncDirection, SyncOptions, apply, apply_parallel, download_directory, plan, upload_directory,
};
use rax_ftp_client::{FtpError, RetryPolicy, Session};
use support::{Faults, MockServer};

fn t0() -> DateTime<Utc> {
    Utc.with_ymd_and_hms(2024, 3, 1, 12, 0, 0).unwrap()
}

fn write_local(root: &Path, relative: &str, data: &[u8], modified: DateTime<Utc>) {
    let path = root.join(relative);
    if let Some(parent) = path.parent() {
        fs::create_dir_all(parent).unwrap();
    }
    fs::write(&path, data).unwrap();
    let file = fs::File::options().write(true).open(&path).unwrap();
    file.set_modified(SystemTime::from(modified)).unwrap();
}

fn local_mtime(path: &Path) -> DateTime<Utc> {
    DateTime::<Utc>::from(fs::metadata(path).unwrap().modified().unwrap())
}

fn options(direction: SyncDirection) -> SyncOptions {
    SyncOptions {
        direction,
        ..SyncOptions::default()
    }
}

fn policy() -> RetryPolicy {
    RetryPolicy::new(3, Duration::from_millis(10), Duration::from_millis(40))
}

#[tokio::test]
async fn larger_newer_local_file_is_planned_for_upload() {
    let server = MockServer::start().await;
    server
        .put_file("/a.txt", b"01234", t0() - ChronoDuration::seconds(60))
        .await;
    let local = tempfile::tempdir().unwrap();
    write_local(local.path(), "a.txt", b"0123456789", t0());
    let mut session = Session::connect(server.params()).await.unwrap();

    let plan = plan(local.path(), "/", &mut session, &options(SyncDirection::Both))
        .await
        .unwrap();
    assert_eq!(plan.to_upload.len(), 1);
    assert_eq!(plan.to_upload[0].remote_path, "/a.txt");
    assert!(plan.to_download.is_empty());
    assert!(plan.to_skip.is_empty());
}

#[tokio::test]
async fn identical_files_are_skipped() {
    let server = MockServer::start().await;
    server.put_file("/a.txt", b"0123456789", t0()).await;
    let local = tempfile::tempdir().unwrap();
    write_local(local.path(), "a.txt", b"0123456789", t0());
    let mut session = Session::connect(server.params()).await.unwrap();

    let plan = plan(local.path(), "/", &mut session, &options(SyncDirection::Both))
        .await
        .unwrap();
    assert_eq!(plan.to_skip, vec!["a.txt"]);
    assert_eq!(plan.transfer_count(), 0);

    let report = apply(&plan, &mut session, &policy()).await.unwrap();
    assert!(report.is_complete());
    assert_eq!(report.skipped, 1);
    assert!(report.succeeded.is_empty());
}

#[tokio::test]
async fn two_way_sync_moves_both_directions_and_stamps_times() {
    let server = MockServer::start().await;
    let remote_time = t0() + ChronoDuration::hours(2);
    server.put_file("/data/remote-only.txt", b"from server", remote_time).await;
    server.put_file("/data/nested/deep.txt", b"deep", remote_time).await;

    let local = tempfile::tempdir().unwrap();
    write_local(local.path(), "local-only.txt", b"from client", t0());
    write_local(local.path(), "dir/inner.txt", b"inner", t0());

    let mut session = Session::connect(server.params()).await.unwrap();
    let plan = plan(local.path(), "/data", &mut session, &options(SyncDirection::Both))
        .await
        .unwrap();
    assert_eq!(plan.remote_directories, vec!["/data/dir"]);
    assert_eq!(plan.local_directories, vec![local.path().join("nested")]);

    let report = apply(&plan, &mut session, &policy()).await.unwrap();
    assert!(report.is_complete(), "failures: {:?}", report.failed);
    assert_eq!(report.succeeded.len(), 4);

    assert_eq!(server.file("/data/local-only.txt").await.unwrap(), b"from client");
    assert_eq!(server.file("/data/dir/inner.txt").await.unwrap(), b"inner");
    assert_eq!(server.modified("/data/local-only.txt").await, Some(t0()));

    let downloaded = local.path().join("remote-only.txt");
    assert_eq!(fs::read(&downloaded).unwrap(), b"from server");
    assert_eq!(local_mtime(&downloaded), remote_time);
    assert_eq!(fs::read(local.path().join("nested/deep.txt")).unwrap(), b"deep");

    let again = rax_ftp_client::sync::plan(local.path(), "/data", &mut session, &options(SyncDirection::Both))
        .await
        .unwrap();
    assert_eq!(again.transfer_count(), 0);
    assert_eq!(again.to_skip.len(), 4);
}

#[tokio::test]
async fn upload_directory_creates_the_remote_tree() {
    let server = MockServer::start().await;
    let local = tempfile::tempdir().unwrap();
    write_local(local.path(), "a.txt", b"a", t0());
    write_local(local.path(), "x/y/b.txt", b"bb", t0());
    let mut session = Session::connect(server.params()).await.unwrap();

    let report = upload_directory(
        local.path(),
        "/backup/site",
        &mut session,
        &policy(),
        &SyncOptions::default(),
    )
    .await
    .unwrap();

    assert_eq!(report.succeeded.len(), 2);
    assert!(server.has_dir("/backup/site/x/y").await);
    assert_eq!(server.file("/backup/site/x/y/b.txt").await.unwrap(), b"bb");
    assert_eq!(report.bytes_transferred, 3);
}

#[tokio::test]
async fn download_directory_into_missing_local_root() {
    let server = MockServer::start().await;
    server.put_file("/pub/a.txt", b"alpha", t0()).await;
    server.put_file("/pub/sub/b.txt", b"beta", t0()).await;
    let parent = tempfile::tempdir().unwrap();
    let local_root = parent.path().join("mirror");
    let mut session = Session::connect(server.params()).await.unwrap();

    let report = download_directory("/pub", &local_root, &mut session, &policy(), &SyncOptions::default())
        .await
        .unwrap();

    assert_eq!(report.succeeded.len(), 2);
    assert_eq!(fs::read(local_root.join("a.txt")).unwrap(), b"alpha");
    assert_eq!(fs::read(local_root.join("sub").join("b.txt")).unwrap(), b"beta");
}

#[tokio::test]
async fn transient_failures_are_retried_per_file() {
    let server = MockServer::with_faults(Faults {
        short_retrievals: 1,
        ..Faults::default()
    })
    .await;
    server.put_file("/a.txt", b"0123456789", t0()).await;
    let local = tempfile::tempdir().unwrap();
    let mut session = Session::connect(server.params()).await.unwrap();

    let plan = plan(local.path(), "/", &mut session, &options(SyncDirection::Download))
        .await
        .unwrap();
    let report = apply(&plan, &mut session, &policy()).await.unwrap();

    assert_eq!(report.succeeded, vec!["a.txt"]);
    assert_eq!(fs::read(local.path().join("a.txt")).unwrap(), b"0123456789");
    assert_eq!(server.connections().await, 2);
}

#[tokio::test]
async fn failed_download_keeps_the_existing_local_file() {
    let server = MockServer::with_faults(Faults {
        short_retrievals: 100,
        ..Faults::default()
    })
    .await;
    server.put_file("/a.txt", b"newer remote copy", t0()).await;
    let local = tempfile::tempdir().unwrap();
    write_local(local.path(), "a.txt", b"precious local", t0() - ChronoDuration::hours(1));
    let mut session = Session::connect(server.params()).await.unwrap();

    let plan = plan(local.path(), "/", &mut session, &options(SyncDirection::Both))
        .await
        .unwrap();
    assert_eq!(plan.to_download.len(), 1);
    let err = apply(&plan, &mut session, &RetryPolicy::new(2, Duration::from_millis(1), Duration::from_millis(2)))
        .await
        .unwrap_err();

    assert!(matches!(err, FtpError::SyncFailed(_)));
    assert_eq!(fs::read(local.path().join("a.txt")).unwrap(), b"precious local");
    assert!(!local.path().join("a.txt.part").exists());
}

#[tokio::test]
async fn all_transfers_failing_is_a_sync_failure() {
    let server = MockServer::with_faults(Faults {
        short_retrievals: 100,
        ..Faults::default()
    })
    .await;
    server.put_file("/a.txt", b"0123456789", t0()).await;
    server.put_file("/b.txt", b"0123456789", t0()).await;
    let local = tempfile::tempdir().unwrap();
    let mut session = Session::connect(server.params()).await.unwrap();

    let plan = plan(local.path(), "/", &mut session, &options(SyncDirection::Download))
        .await
        .unwrap();
    let err = apply(&plan, &mut session, &RetryPolicy::new(2, Duration::from_millis(1), Duration::from_millis(2)))
        .await
        .unwrap_err();

    match err {
        FtpError::SyncFailed(report) => {
            assert_eq!(report.failed.len(), 2);
            assert!(report.succeeded.is_empty());
            assert!(matches!(
                report.failed.get("a.txt"),
                Some(FtpError::RetryExhausted { attempts: 2, .. })
            ));
        }
        other => panic!("expected SyncFailed, got {:?}", other),
    }
}

#[tokio::test]
async fn parallel_workers_share_the_queue() {
    let server = MockServer::start().await;
    let local = tempfile::tempdir().unwrap();
    for i in 0..6 {
        write_local(local.path(), &format!("f{}.txt", i), format!("file {}", i).as_bytes(), t0());
    }
    let params = server.params();
    let mut session = Session::connect(params.clone()).await.unwrap();

    let plan = plan(local.path(), "/", &mut session, &options(SyncDirection::Upload))
        .await
        .unwrap();
    assert_eq!(plan.to_upload.len(), 6);

    let report = apply_parallel(&plan, &mut session, &params, &policy(), 3)
        .await
        .unwrap();
    assert_eq!(report.succeeded.len(), 6);
    for i in 0..6 {
        assert_eq!(
            server.file(&format!("/f{}.txt", i)).await.unwrap(),
            format!("file {}", i).as_bytes()
        );
    }
    assert_eq!(server.connections().await, 4);
}
