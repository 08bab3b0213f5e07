//! RAX FTP Client - Entry Point
//!
//! Runs one synchronization pass between the configured local and remote
//! directory trees. An explicit configuration file may be given as the
//! first argument.

use log::{error, info};
use std::path::Path;
use std::process::ExitCode;

use rax_ftp_client::config::ClientConfig;
use rax_ftp_client::sync::{apply_parallel, plan};
use rax_ftp_client::utils::logging::setup_logging;

#[tokio::main]
async fn main() -> ExitCode {
    setup_logging();

    let loaded = match std::env::args().nth(1) {
        Some(path) => ClientConfig::load_from(Path::new(&path)),
        None => ClientConfig::load(),
    };
    let config = match loaded {
        Ok(config) => config,
        Err(e) => {
            error!("Invalid configuration: {}", e);
            return ExitCode::FAILURE;
        }
    };

    info!(
        "Synchronizing {} with {}:{}{} ({:?})",
        config.sync.local_root,
        config.connection.host,
        config.connection.port,
        config.sync.remote_root,
        config.sync.direction
    );

    let policy = config.retry.policy();
    let mut session = match policy.connect(&config.connection).await {
        Ok(session) => session,
        Err(e) => {
            error!("Could not connect: {}", e);
            return ExitCode::FAILURE;
        }
    };

    let local_root = config.sync.local_root_path();
    let outcome = match plan(
        &local_root,
        &config.sync.remote_root,
        &mut session,
        &config.sync.options(),
    )
    .await
    {
        Ok(plan) => {
            apply_parallel(
                &plan,
                &mut session,
                &config.connection,
                &policy,
                config.sync.workers,
            )
            .await
        }
        Err(e) => Err(e),
    };

    session.quit().await;

    match outcome {
        Ok(report) if report.is_complete() => ExitCode::SUCCESS,
        Ok(report) => {
            for (path, e) in &report.failed {
                error!("{}: {}", path, e);
            }
            ExitCode::FAILURE
        }
        Err(e) => {
            error!("Synchronization failed: {}", e);
            ExitCode::FAILURE
        }
    }
}
