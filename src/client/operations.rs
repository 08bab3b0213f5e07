//! Client operations
//!
//! Single-command remote operations: file and directory management,
//! metadata queries and the recursive remote walk.

use chrono::{DateTime, Utc};
use log::{debug, info, warn};
use std::collections::HashSet;

use crate::client::Session;
use crate::error::{FtpError, Result, reply_to_error};
use crate::protocol::listing::{format_mlsd_time, parse_mlsd_time};
use crate::protocol::responses::{FILE_STATUS, PENDING_FURTHER_INFO};
use crate::protocol::{Command, EntryKind, RemoteEntry, Reply, Verb};
use crate::transfer::TransferMode;
use crate::utils::path;

fn expect_success(path: &str, reply: Reply) -> Result<Reply> {
    if reply.is_success() {
        Ok(reply)
    } else {
        Err(reply_to_error(path, &reply))
    }
}

impl Session {
    /// Deletes a remote file.
    pub async fn delete(&mut self, remote_path: &str) -> Result<()> {
        self.ensure_authenticated()?;
        let reply = self
            .execute(&Command::with_arg(Verb::DELE, remote_path))
            .await?;
        expect_success(remote_path, reply)?;
        info!("Deleted {}", remote_path);
        Ok(())
    }

    /// Creates one remote directory.
    pub async fn make_directory(&mut self, remote_path: &str) -> Result<()> {
        self.ensure_authenticated()?;
        let reply = self
            .execute(&Command::with_arg(Verb::MKD, remote_path))
            .await?;
        expect_success(remote_path, reply)?;
        info!("Created directory {}", remote_path);
        Ok(())
    }

    /// Removes an empty remote directory.
    pub async fn remove_directory(&mut self, remote_path: &str) -> Result<()> {
        self.ensure_authenticated()?;
        let reply = self
            .execute(&Command::with_arg(Verb::RMD, remote_path))
            .await?;
        expect_success(remote_path, reply)?;
        info!("Removed directory {}", remote_path);
        Ok(())
    }

    /// Renames with `RNFR` (which must answer `350`) followed by `RNTO`.
    pub async fn rename(&mut self, from: &str, to: &str) -> Result<()> {
        self.ensure_authenticated()?;
        let reply = self.execute(&Command::with_arg(Verb::RNFR, from)).await?;
        if reply.code != PENDING_FURTHER_INFO {
            return Err(reply_to_error(from, &reply));
        }
        let reply = self.execute(&Command::with_arg(Verb::RNTO, to)).await?;
        expect_success(to, reply)?;
        info!("Renamed {} to {}", from, to);
        Ok(())
    }

    /// Changes the working directory.
    ///
    /// The recorded directory only moves on success, and then to whatever
    /// the server reports for `PWD` when that can be parsed.
    pub async fn change_directory(&mut self, remote_path: &str) -> Result<()> {
        self.ensure_authenticated()?;
        let reply = self
            .execute(&Command::with_arg(Verb::CWD, remote_path))
            .await?;
        expect_success(remote_path, reply)?;

        match self.print_working_directory().await {
            Ok(directory) => debug!("Working directory is now {}", directory),
            Err(FtpError::RemoteOperation { .. } | FtpError::Protocol(_)) => {
                let resolved = path::resolve(self.state.current_directory(), remote_path);
                debug!("PWD unusable, assuming {}", resolved);
                self.state.set_current_directory(resolved);
            }
            Err(e) => return Err(e),
        }
        Ok(())
    }

    /// Size in bytes, from `SIZE`.
    pub async fn size(&mut self, remote_path: &str) -> Result<u64> {
        self.ensure_authenticated()?;
        let reply = self
            .execute(&Command::with_arg(Verb::SIZE, remote_path))
            .await?;
        if reply.code != FILE_STATUS {
            return Err(reply_to_error(remote_path, &reply));
        }
        reply.first_line().trim().parse().map_err(|_| {
            FtpError::Protocol(format!("unparseable SIZE reply: {}", reply.text()))
        })
    }

    /// Modification time, from `MDTM`.
    pub async fn modified_time(&mut self, remote_path: &str) -> Result<DateTime<Utc>> {
        self.ensure_authenticated()?;
        let reply = self
            .execute(&Command::with_arg(Verb::MDTM, remote_path))
            .await?;
        if reply.code != FILE_STATUS {
            return Err(reply_to_error(remote_path, &reply));
        }
        parse_mlsd_time(reply.first_line().trim()).ok_or_else(|| {
            FtpError::Protocol(format!("unparseable MDTM reply: {}", reply.text()))
        })
    }

    /// Sets the modification time with `MFMT`.
    ///
    /// Returns `Ok(false)` without sending anything when the server does not
    /// advertise the command.
    pub async fn set_modified_time(&mut self, remote_path: &str, time: DateTime<Utc>) -> Result<bool> {
        self.ensure_authenticated()?;
        if !self.state.has_feature("MFMT") {
            debug!("MFMT not advertised, leaving {} unstamped", remote_path);
            return Ok(false);
        }
        let command = Command {
            verb: Verb::MFMT,
            args: vec![format_mlsd_time(&time), remote_path.to_string()],
        };
        let reply = self.execute(&command).await?;
        expect_success(remote_path, reply)?;
        Ok(true)
    }

    pub async fn noop(&mut self) -> Result<()> {
        self.ensure_authenticated()?;
        let reply = self.execute(&Command::new(Verb::NOOP)).await?;
        expect_success("NOOP", reply)?;
        Ok(())
    }

    /// Switches the representation type; a no-op when it is already active.
    pub async fn set_transfer_mode(&mut self, mode: TransferMode) -> Result<()> {
        self.ensure_authenticated()?;
        if self.state.transfer_mode() == mode {
            return Ok(());
        }
        self.send_type(mode).await
    }

    /// True when `CWD` into `directory` succeeds. The working directory is
    /// put back afterwards.
    async fn directory_exists(&mut self, directory: &str) -> Result<bool> {
        let reply = self
            .execute(&Command::with_arg(Verb::CWD, directory))
            .await?;
        if !reply.is_success() {
            return Ok(false);
        }
        let original = self.state.current_directory().to_string();
        let reply = self
            .execute(&Command::with_arg(Verb::CWD, original.as_str()))
            .await?;
        expect_success(&original, reply)?;
        Ok(true)
    }

    /// Creates `remote_path` and every missing parent.
    ///
    /// Returns the directories that were actually created, outermost first.
    pub async fn make_directories(&mut self, remote_path: &str) -> Result<Vec<String>> {
        self.ensure_authenticated()?;
        let target = path::resolve(self.state.current_directory(), remote_path);
        let components = path::ancestors(&target);

        let mut existing = 0;
        for (i, directory) in components.iter().enumerate().rev() {
            if self.directory_exists(directory).await? {
                existing = i + 1;
                break;
            }
        }

        let mut created = Vec::new();
        for directory in &components[existing..] {
            let reply = self
                .execute(&Command::with_arg(Verb::MKD, directory.as_str()))
                .await?;
            if reply.is_success() {
                info!("Created directory {}", directory);
                created.push(directory.clone());
            } else if self.directory_exists(directory).await? {
                // Created concurrently, e.g. by another worker.
                debug!("Directory {} already exists", directory);
            } else {
                return Err(reply_to_error(directory, &reply));
            }
        }
        Ok(created)
    }

    /// Lists `root` recursively, down to `max_depth` levels.
    ///
    /// Paths are relative to `root` and `/`-separated. Links are reported
    /// but never followed, and each directory is listed at most once.
    pub async fn walk(&mut self, root: &str, max_depth: usize) -> Result<Vec<(String, RemoteEntry)>> {
        self.ensure_authenticated()?;
        let root = path::resolve(self.state.current_directory(), root);
        let mut visited = HashSet::new();
        let mut pending = vec![(root, String::new(), 0usize)];
        let mut entries = Vec::new();

        while let Some((directory, relative, depth)) = pending.pop() {
            if !visited.insert(directory.clone()) {
                debug!("Skipping already visited {}", directory);
                continue;
            }
            for entry in self.list(&directory).await? {
                if entry.name == "." || entry.name == ".." {
                    continue;
                }
                let child = path::join(&relative, &entry.name);
                if entry.kind == EntryKind::Directory {
                    if depth + 1 < max_depth {
                        pending.push((path::join(&directory, &entry.name), child.clone(), depth + 1));
                    } else {
                        warn!("Depth limit reached at {}, not descending", child);
                    }
                }
                entries.push((child, entry));
            }
        }
        Ok(entries)
    }
}
