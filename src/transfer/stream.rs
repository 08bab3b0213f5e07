//! Byte pumping between a data connection and a local sink or source.
//!
//! Every read and write is bounded by the data-idle timeout and raced
//! against the session's cancellation signal.

use std::io;
use std::time::Duration;
use tokio::io::{AsyncRead, AsyncReadExt, AsyncWrite, AsyncWriteExt};
use tokio::sync::watch;
use tokio::time::timeout;

use crate::transfer::results::{ProgressCallback, TransferProgress};

/// Why a copy stopped early.
#[derive(Debug)]
pub(crate) enum CopyError {
    /// Reading from the source failed.
    Source(io::Error),
    /// Writing to the sink failed.
    Sink(io::Error),
    /// No bytes moved within the idle timeout.
    Idle(Duration),
    Cancelled,
}

/// Parameters of one copy.
pub(crate) struct CopyControl<'a> {
    pub remote_path: &'a str,
    pub idle_timeout: Duration,
    pub buffer_size: usize,
    pub total_expected: Option<u64>,
    pub progress: Option<&'a mut ProgressCallback>,
    pub cancel: watch::Receiver<bool>,
}

/// Resolves once cancellation has been requested; never if the sender is gone.
async fn cancelled(rx: &mut watch::Receiver<bool>) {
    if rx.wait_for(|c| *c).await.is_err() {
        std::future::pending::<()>().await;
    }
}

/// Copies `reader` into `writer` until end of stream; returns the byte count.
pub(crate) async fn copy_with_control<R, W>(
    reader: &mut R,
    writer: &mut W,
    ctl: &mut CopyControl<'_>,
) -> Result<u64, CopyError>
where
    R: AsyncRead + Unpin + ?Sized,
    W: AsyncWrite + Unpin + ?Sized,
{
    let mut buf = vec![0u8; ctl.buffer_size.max(1)];
    let mut total = 0u64;
    let idle = ctl.idle_timeout;

    loop {
        let n = tokio::select! {
            biased;
            _ = cancelled(&mut ctl.cancel) => return Err(CopyError::Cancelled),
            read = timeout(idle, reader.read(&mut buf)) => match read {
                Ok(Ok(n)) => n,
                Ok(Err(e)) => return Err(CopyError::Source(e)),
                Err(_) => return Err(CopyError::Idle(idle)),
            },
        };
        if n == 0 {
            break;
        }

        tokio::select! {
            biased;
            _ = cancelled(&mut ctl.cancel) => return Err(CopyError::Cancelled),
            written = timeout(idle, writer.write_all(&buf[..n])) => match written {
                Ok(Ok(())) => {}
                Ok(Err(e)) => return Err(CopyError::Sink(e)),
                Err(_) => return Err(CopyError::Idle(idle)),
            },
        }

        total += n as u64;
        if let Some(callback) = ctl.progress.as_mut() {
            callback(&TransferProgress {
                remote_path: ctl.remote_path.to_string(),
                bytes_transferred: total,
                total_expected: ctl.total_expected,
            });
        }
    }

    match timeout(idle, writer.flush()).await {
        Ok(Ok(())) => Ok(total),
        Ok(Err(e)) => Err(CopyError::Sink(e)),
        Err(_) => Err(CopyError::Idle(idle)),
    }
}
