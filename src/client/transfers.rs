//! Data transfers
//!
//! Listings, retrieves and stores. Each transfer opens one data connection,
//! pumps bytes while the control connection waits for the final reply, and
//! then checks that reply. Network failures, idle timeouts and cancellation
//! close the session; failures of the caller's own sink or source do not.

use log::{debug, info, warn};
use std::ffi::OsString;
use std::path::{Path, PathBuf};
use std::time::SystemTime;
use tokio::fs::{File, OpenOptions};
use tokio::io::{AsyncRead, AsyncSeekExt, AsyncWrite, AsyncWriteExt};
use tokio::net::TcpStream;

use crate::client::Session;
use crate::error::{FtpError, Result, reply_to_error, transfer_reply_to_error};
use crate::protocol::responses::PENDING_FURTHER_INFO;
use crate::protocol::{Command, Listing, ListingFormat, Reply, Verb};
use crate::transfer::stream::{CopyControl, CopyError, copy_with_control};
use crate::transfer::{
    DataConnection, Direction, ProgressCallback, TransferDescriptor, open_active, open_passive,
};

/// Outcome of issuing a transfer command.
enum TransferStart {
    /// The server opened the data connection (1xx).
    Streaming {
        stream: TcpStream,
        announced: Option<u64>,
    },
    /// The server answered with a final 2xx straight away.
    Completed(Reply),
}

/// Parses the `(N bytes)` hint many servers put in their `150` reply.
fn announced_size(text: &str) -> Option<u64> {
    let start = text.rfind('(')?;
    let inner = &text[start + 1..];
    let end = inner.find(')')?;
    let mut words = inner[..end].split_whitespace();
    let size = words.next()?.parse().ok()?;
    match words.next() {
        Some(unit) if unit.eq_ignore_ascii_case("bytes") || unit.eq_ignore_ascii_case("byte") => {
            Some(size)
        }
        _ => None,
    }
}

impl Session {
    /// Opens a data connection, passive first.
    ///
    /// When passive negotiation fails and active fallback is enabled, active
    /// mode is tried once and then used for the rest of the session.
    async fn open_data(&mut self) -> Result<DataConnection> {
        let connect_timeout = self.params.connect_timeout();

        if self.state.is_passive() {
            let passive = open_passive(&mut self.control, connect_timeout).await;
            self.sync_state();
            match passive {
                Ok(connection) => return Ok(connection),
                Err(FtpError::DataConnect(reason)) if self.params.active_fallback => {
                    warn!("Passive mode failed ({}), falling back to active mode", reason);
                    self.state.set_passive(false);
                }
                Err(e) => return Err(e),
            }
        }

        let bind_ip = self
            .params
            .active_bind_ip()
            .or_else(|| self.control.local_addr().map(|addr| addr.ip()))
            .ok_or(FtpError::NotConnected)?;
        let active = open_active(&mut self.control, bind_ip, connect_timeout).await;
        self.sync_state();
        active
    }

    /// Opens the data connection, sends `REST` when resuming, then the
    /// transfer command itself.
    async fn begin_transfer(&mut self, remote_path: &str, command: Command, offset: u64) -> Result<TransferStart> {
        self.ensure_authenticated()?;
        self.cancel.send_replace(false);

        let data = self.open_data().await?;

        if offset > 0 {
            let reply = self
                .execute(&Command::with_arg(Verb::REST, offset.to_string()))
                .await?;
            if reply.code != PENDING_FURTHER_INFO {
                return Err(reply_to_error(remote_path, &reply));
            }
        }

        let reply = self.send(&command).await?;
        if !reply.is_preliminary() {
            if reply.is_success() {
                debug!("{} completed without data: {}", command.verb, reply.text());
                return Ok(TransferStart::Completed(reply));
            }
            return Err(transfer_reply_to_error(remote_path, &reply));
        }

        let announced = announced_size(&reply.text());
        match data.into_stream().await {
            Ok(stream) => Ok(TransferStart::Streaming { stream, announced }),
            Err(e) => {
                // The server is still waiting to finish this command.
                self.invalidate();
                Err(e)
            }
        }
    }

    /// Reads the final reply of a transfer whose data connection is closed.
    async fn finish_transfer(&mut self, remote_path: &str) -> Result<Reply> {
        let reply = self.read_final().await?;
        if reply.is_success() {
            return Ok(reply);
        }
        let error = transfer_reply_to_error(remote_path, &reply);
        if matches!(error, FtpError::Transfer { .. } | FtpError::DataConnect(_)) {
            self.invalidate();
        }
        Err(error)
    }

    /// Turns a failed copy into an error, cleaning up the control connection.
    async fn abort_transfer(&mut self, remote_path: &str, direction: Direction, error: CopyError) -> FtpError {
        let local = match (direction, error) {
            (Direction::Download, CopyError::Sink(e)) | (Direction::Upload, CopyError::Source(e)) => Ok(e),
            (_, other) => Err(other),
        };

        let reason = match local {
            Ok(e) => {
                warn!("Local failure while transferring {}: {}", remote_path, e);
                match self.read_final().await {
                    Ok(reply) => debug!("Server closed aborted transfer with {} {}", reply.code, reply.text()),
                    Err(err) => debug!("No final reply for aborted transfer: {}", err),
                }
                return FtpError::local_stream(format!("local side of {}", remote_path), e);
            }
            Err(CopyError::Cancelled) => "cancelled".to_string(),
            Err(CopyError::Idle(idle)) => format!("no data for {:?}", idle),
            Err(CopyError::Source(e) | CopyError::Sink(e)) => format!("data connection failed: {}", e),
        };

        warn!("Transfer of {} aborted: {}", remote_path, reason);
        self.invalidate();
        FtpError::Transfer {
            path: remote_path.to_string(),
            reason,
        }
    }

    async fn pump<R, W>(
        &mut self,
        remote_path: &str,
        reader: &mut R,
        writer: &mut W,
        total_expected: Option<u64>,
        report_progress: bool,
    ) -> std::result::Result<u64, CopyError>
    where
        R: AsyncRead + Unpin + ?Sized,
        W: AsyncWrite + Unpin + ?Sized,
    {
        let mut progress: Option<ProgressCallback> = if report_progress {
            self.progress.take()
        } else {
            None
        };
        let outcome = {
            let mut ctl = CopyControl {
                remote_path,
                idle_timeout: self.params.data_idle_timeout(),
                buffer_size: self.params.buffer_size,
                total_expected,
                progress: progress.as_mut(),
                cancel: self.cancel.subscribe(),
            };
            copy_with_control(reader, writer, &mut ctl).await
        };
        if progress.is_some() {
            self.progress = progress;
        }
        outcome
    }

    /// Lists a remote directory (the working directory when `remote_path`
    /// is empty).
    ///
    /// Uses `MLSD` when the server advertises it, `LIST` otherwise. The
    /// payload is read completely before the listing is returned.
    pub async fn list(&mut self, remote_path: &str) -> Result<Listing> {
        let (verb, format) = if self.state.has_feature("MLSD") {
            (Verb::MLSD, ListingFormat::Mlsd)
        } else {
            (Verb::LIST, ListingFormat::List)
        };
        let command = if remote_path.is_empty() {
            Command::new(verb)
        } else {
            Command::with_arg(verb, remote_path)
        };

        let mut stream = match self.begin_transfer(remote_path, command, 0).await? {
            TransferStart::Streaming { stream, .. } => stream,
            TransferStart::Completed(_) => return Ok(Listing::new(&[], format)),
        };

        let mut payload = Vec::new();
        let copied = self
            .pump(remote_path, &mut stream, &mut payload, None, false)
            .await;
        drop(stream);
        if let Err(e) = copied {
            return Err(self.abort_transfer(remote_path, Direction::Download, e).await);
        }

        self.finish_transfer(remote_path).await?;
        debug!("Listed {} ({} bytes, {:?})", remote_path, payload.len(), format);
        Ok(Listing::new(&payload, format))
    }

    /// Downloads `remote_path` into `writer`, resuming at `offset`.
    pub async fn retrieve<W>(&mut self, remote_path: &str, writer: &mut W, offset: u64) -> Result<u64>
    where
        W: AsyncWrite + Unpin + ?Sized,
    {
        self.retrieve_expecting(remote_path, writer, offset, None).await
    }

    /// Like [`retrieve`](Self::retrieve), checking the received byte count
    /// against `expected_size` (the full file size), or the size the server
    /// announced when none is given.
    pub async fn retrieve_expecting<W>(
        &mut self,
        remote_path: &str,
        writer: &mut W,
        offset: u64,
        expected_size: Option<u64>,
    ) -> Result<u64>
    where
        W: AsyncWrite + Unpin + ?Sized,
    {
        let command = Command::with_arg(Verb::RETR, remote_path);
        let (received, announced) = match self.begin_transfer(remote_path, command, offset).await? {
            TransferStart::Completed(_) => (0, None),
            TransferStart::Streaming {
                mut stream,
                announced,
            } => {
                let expected = expected_size.or(announced);
                let copied = self
                    .pump(remote_path, &mut stream, writer, expected, true)
                    .await;
                drop(stream);
                let received = match copied {
                    Ok(n) => n,
                    Err(e) => {
                        return Err(self.abort_transfer(remote_path, Direction::Download, e).await);
                    }
                };
                self.finish_transfer(remote_path).await?;
                (received, announced)
            }
        };

        if let Some(size) = expected_size.or(announced) {
            let wanted = size.saturating_sub(offset);
            if received < wanted {
                warn!(
                    "Short transfer of {}: received {} of {} bytes",
                    remote_path, received, wanted
                );
                self.invalidate();
                return Err(FtpError::Transfer {
                    path: remote_path.to_string(),
                    reason: format!(
                        "data connection closed after {} of {} bytes",
                        received, wanted
                    ),
                });
            }
        }

        info!("Retrieved {} ({} bytes)", remote_path, received);
        Ok(received)
    }

    /// Uploads `reader` to `remote_path`. With `offset > 0` the server is
    /// asked to resume there and `reader` must already be positioned at it.
    pub async fn store<R>(&mut self, remote_path: &str, reader: &mut R, offset: u64) -> Result<u64>
    where
        R: AsyncRead + Unpin + ?Sized,
    {
        self.store_expecting(remote_path, reader, offset, None).await
    }

    /// Like [`store`](Self::store), failing when fewer than
    /// `expected_size - offset` bytes could be sent.
    pub async fn store_expecting<R>(
        &mut self,
        remote_path: &str,
        reader: &mut R,
        offset: u64,
        expected_size: Option<u64>,
    ) -> Result<u64>
    where
        R: AsyncRead + Unpin + ?Sized,
    {
        let command = Command::with_arg(Verb::STOR, remote_path);
        let mut stream = match self.begin_transfer(remote_path, command, offset).await? {
            TransferStart::Streaming { stream, .. } => stream,
            TransferStart::Completed(reply) => {
                return Err(FtpError::Protocol(format!(
                    "STOR {} completed without a data connection: {} {}",
                    remote_path,
                    reply.code,
                    reply.text()
                )));
            }
        };

        let copied = self
            .pump(remote_path, reader, &mut stream, expected_size, true)
            .await;
        let sent = match copied {
            Ok(n) => n,
            Err(e) => {
                drop(stream);
                return Err(self.abort_transfer(remote_path, Direction::Upload, e).await);
            }
        };

        // End of file is signalled by closing the data connection.
        if let Err(e) = stream.shutdown().await {
            drop(stream);
            return Err(self
                .abort_transfer(remote_path, Direction::Upload, CopyError::Sink(e))
                .await);
        }
        drop(stream);
        self.finish_transfer(remote_path).await?;

        if let Some(size) = expected_size {
            let wanted = size.saturating_sub(offset);
            if sent < wanted {
                self.invalidate();
                return Err(FtpError::Transfer {
                    path: remote_path.to_string(),
                    reason: format!("sent {} of {} bytes", sent, wanted),
                });
            }
        }

        info!("Stored {} ({} bytes)", remote_path, sent);
        Ok(sent)
    }

    /// Downloads a file described by `descriptor` to the local filesystem,
    /// stamping it with the descriptor's modification time.
    ///
    /// A fresh download is written to a `.part` sibling and only replaces
    /// the destination once it is complete; a resumed one appends in place.
    pub async fn download_file(&mut self, descriptor: &TransferDescriptor) -> Result<u64> {
        let local = descriptor.local_path.as_path();
        if let Some(parent) = local.parent().filter(|p| !p.as_os_str().is_empty()) {
            tokio::fs::create_dir_all(parent)
                .await
                .map_err(|e| FtpError::local(parent, e))?;
        }

        let target = if descriptor.offset > 0 {
            local.to_path_buf()
        } else {
            partial_path(local)
        };
        let mut file = if descriptor.offset > 0 {
            let mut file = OpenOptions::new()
                .write(true)
                .create(true)
                .truncate(false)
                .open(&target)
                .await
                .map_err(|e| FtpError::local(&target, e))?;
            file.seek(std::io::SeekFrom::Start(descriptor.offset))
                .await
                .map_err(|e| FtpError::local(&target, e))?;
            file
        } else {
            File::create(&target)
                .await
                .map_err(|e| FtpError::local(&target, e))?
        };

        let retrieved = self
            .retrieve_expecting(
                &descriptor.remote_path,
                &mut file,
                descriptor.offset,
                descriptor.expected_size,
            )
            .await;
        let received = match retrieved {
            Ok(n) => n,
            Err(e) => {
                drop(file);
                if target.as_path() != local {
                    discard_partial(&target).await;
                }
                return Err(e);
            }
        };
        if let Err(e) = file.flush().await {
            drop(file);
            if target.as_path() != local {
                discard_partial(&target).await;
            }
            return Err(FtpError::local(&target, e));
        }

        match descriptor.modified_time {
            Some(time) => stamp_local(file, &target, SystemTime::from(time)).await,
            None => drop(file),
        }
        if target.as_path() != local {
            tokio::fs::rename(&target, local)
                .await
                .map_err(|e| FtpError::local(local, e))?;
            debug!("Moved {} into place", target.display());
        }
        Ok(received)
    }

    /// Uploads a local file described by `descriptor`, then stamps the
    /// remote copy with the local modification time when the server allows.
    pub async fn upload_file(&mut self, descriptor: &TransferDescriptor) -> Result<u64> {
        let local = descriptor.local_path.as_path();
        let mut file = File::open(local)
            .await
            .map_err(|e| FtpError::local(local, e))?;
        let metadata = file
            .metadata()
            .await
            .map_err(|e| FtpError::local(local, e))?;
        if descriptor.offset > 0 {
            file.seek(std::io::SeekFrom::Start(descriptor.offset))
                .await
                .map_err(|e| FtpError::local(local, e))?;
        }

        let expected = descriptor.expected_size.or(Some(metadata.len()));
        let sent = self
            .store_expecting(&descriptor.remote_path, &mut file, descriptor.offset, expected)
            .await?;

        let modified = descriptor
            .modified_time
            .or_else(|| metadata.modified().ok().map(Into::into));
        if let Some(time) = modified {
            match self.set_modified_time(&descriptor.remote_path, time).await {
                Ok(_) => {}
                Err(e) => warn!("Could not set modification time of {}: {}", descriptor.remote_path, e),
            }
        }
        Ok(sent)
    }
}

/// Sibling of `local` that receives a download until it completes.
fn partial_path(local: &Path) -> PathBuf {
    let mut name = local.file_name().map(OsString::from).unwrap_or_default();
    name.push(".part");
    local.with_file_name(name)
}

async fn discard_partial(path: &Path) {
    if let Err(e) = tokio::fs::remove_file(path).await {
        debug!("Could not remove {}: {}", path.display(), e);
    }
}

async fn stamp_local(file: File, path: &Path, time: SystemTime) {
    let file = file.into_std().await;
    let stamped = tokio::task::spawn_blocking(move || file.set_modified(time)).await;
    match stamped {
        Ok(Ok(())) => {}
        Ok(Err(e)) => warn!("Could not set modification time of {}: {}", path.display(), e),
        Err(e) => warn!("Stamping {} did not complete: {}", path.display(), e),
    }
}
