//! Client session management
//!
//! A `Session` owns one control connection and the server-side context that
//! goes with it. Every operation requires the authenticated state; any
//! control connection failure invalidates the session, after which only
//! [`Session::reconnect`] brings it back.

use log::{debug, info, warn};
use std::sync::Arc;
use tokio::sync::watch;

use crate::client::SessionState;
use crate::config::ConnectionParams;
use crate::control::ControlChannel;
use crate::error::{FtpError, Result};
use crate::protocol::responses::PATH_CREATED;
use crate::protocol::{Command, Reply, Verb};
use crate::retry::{BoxFuture, Reconnect};
use crate::transfer::{ProgressCallback, TransferMode};

/// An authenticated FTP session.
pub struct Session {
    pub(crate) params: ConnectionParams,
    pub(crate) control: ControlChannel,
    pub(crate) state: SessionState,
    pub(crate) progress: Option<ProgressCallback>,
    pub(crate) cancel: Arc<watch::Sender<bool>>,
}

/// Aborts the transfer running on the session it was taken from.
#[derive(Clone)]
pub struct CancelHandle {
    sender: Arc<watch::Sender<bool>>,
}

impl CancelHandle {
    /// Requests cancellation of the in-flight transfer, if any.
    pub fn cancel(&self) {
        self.sender.send_replace(true);
    }
}

impl std::fmt::Debug for Session {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Session")
            .field("host", &self.params.host)
            .field("port", &self.params.port)
            .field("user", &self.params.user)
            .field("control", &self.control.state())
            .field("state", &self.state)
            .finish()
    }
}

impl Session {
    /// Connects, authenticates, reads the working directory, queries
    /// features and sets the configured representation type.
    pub async fn connect(params: ConnectionParams) -> Result<Self> {
        let (cancel, _) = watch::channel(false);
        let mut session = Self {
            control: ControlChannel::new(params.reply_timeout()),
            state: SessionState::new(params.use_passive),
            params,
            progress: None,
            cancel: Arc::new(cancel),
        };
        session.establish().await?;
        Ok(session)
    }

    async fn establish(&mut self) -> Result<()> {
        let mut control = ControlChannel::new(self.params.reply_timeout());
        control
            .connect(&self.params.host, self.params.port, self.params.connect_timeout())
            .await?;
        if let Err(e) = control
            .authenticate(&self.params.user, &self.params.password)
            .await
        {
            control.close();
            return Err(e);
        }

        self.control = control;
        self.state.set_authenticated(true);

        let directory = self.print_working_directory().await?;
        debug!("Initial working directory: {}", directory);

        self.query_features().await?;
        self.send_type(self.params.transfer_mode).await?;

        info!(
            "Session established with {}:{} as {}",
            self.params.host, self.params.port, self.params.user
        );
        Ok(())
    }

    /// Best-effort `FEAT`; a refusal leaves the feature set empty.
    async fn query_features(&mut self) -> Result<()> {
        let reply = self.execute(&Command::new(Verb::FEAT)).await?;
        if reply.is_success() {
            self.state
                .set_features(reply.message.iter().map(String::as_str));
            debug!("Server features: {:?}", reply.message);
        } else {
            debug!("FEAT not supported: {} {}", reply.code, reply.text());
        }
        Ok(())
    }

    /// Tears the connection down and establishes a fresh one, restoring the
    /// representation type and working directory.
    pub async fn reconnect(&mut self) -> Result<()> {
        let directory = self.state.current_directory().to_string();
        let mode = self.state.transfer_mode();

        self.invalidate();
        info!("Reconnecting to {}:{}", self.params.host, self.params.port);
        self.establish().await?;

        if mode != self.state.transfer_mode() {
            self.send_type(mode).await?;
        }
        if directory != self.state.current_directory() {
            match self.change_directory(&directory).await {
                Ok(()) => {}
                Err(e @ FtpError::RemoteOperation { .. }) => {
                    warn!("Could not restore working directory {}: {}", directory, e);
                }
                Err(e) => return Err(e),
            }
        }
        Ok(())
    }

    /// Sends `QUIT` if possible and closes the session.
    pub async fn quit(&mut self) {
        self.control.quit().await;
        self.state.logout();
    }

    /// Closes the control connection without saying goodbye. Idempotent.
    pub fn close(&mut self) {
        self.invalidate();
    }

    // --------------------
    // Accessors
    // --------------------

    pub fn params(&self) -> &ConnectionParams {
        &self.params
    }

    pub fn state(&self) -> &SessionState {
        &self.state
    }

    pub fn is_authenticated(&self) -> bool {
        self.state.is_authenticated() && self.control.is_authenticated()
    }

    pub fn current_directory(&self) -> &str {
        self.state.current_directory()
    }

    /// Registers a callback invoked after every chunk of every transfer.
    pub fn set_progress(&mut self, callback: ProgressCallback) {
        self.progress = Some(callback);
    }

    pub fn clear_progress(&mut self) {
        self.progress = None;
    }

    pub fn cancel_handle(&self) -> CancelHandle {
        CancelHandle {
            sender: Arc::clone(&self.cancel),
        }
    }

    // --------------------
    // Internal helpers
    // --------------------

    pub(crate) fn ensure_authenticated(&self) -> Result<()> {
        if self.is_authenticated() {
            Ok(())
        } else {
            Err(FtpError::NotConnected)
        }
    }

    pub(crate) fn invalidate(&mut self) {
        if self.state.is_authenticated() {
            warn!(
                "Session with {}:{} invalidated",
                self.params.host, self.params.port
            );
        }
        self.control.close();
        self.state.logout();
    }

    /// Keeps the session state in line with the control channel after a
    /// failure closed it.
    pub(crate) fn sync_state(&mut self) {
        if !self.control.is_open() && self.state.is_authenticated() {
            self.invalidate();
        }
    }

    /// Sends a command and returns its reply, which may be preliminary.
    pub(crate) async fn send(&mut self, command: &Command) -> Result<Reply> {
        let result = self.control.send_command(command).await;
        self.sync_state();
        result
    }

    /// Reads replies until a final (non-1xx) one arrives.
    pub(crate) async fn read_final(&mut self) -> Result<Reply> {
        loop {
            let result = self.control.read_reply().await;
            self.sync_state();
            let reply = result?;
            if !reply.is_preliminary() {
                return Ok(reply);
            }
        }
    }

    /// Sends a command and waits for its final reply.
    pub(crate) async fn execute(&mut self, command: &Command) -> Result<Reply> {
        let reply = self.send(command).await?;
        if reply.is_preliminary() {
            return self.read_final().await;
        }
        Ok(reply)
    }

    pub(crate) async fn send_type(&mut self, mode: TransferMode) -> Result<()> {
        let reply = self
            .execute(&Command::with_arg(Verb::TYPE, mode.type_code()))
            .await?;
        if !reply.is_success() {
            return Err(crate::error::reply_to_error(mode.type_code(), &reply));
        }
        self.state.set_transfer_mode(mode);
        debug!("Transfer mode set to {:?}", mode);
        Ok(())
    }

    /// `PWD`, recording the answer as the current directory.
    pub async fn print_working_directory(&mut self) -> Result<String> {
        self.ensure_authenticated()?;
        let reply = self.execute(&Command::new(Verb::PWD)).await?;
        if reply.code != PATH_CREATED {
            return Err(crate::error::reply_to_error("PWD", &reply));
        }
        let directory = parse_pwd_reply(&reply.text()).ok_or_else(|| {
            FtpError::Protocol(format!("unparseable PWD reply: {}", reply.text()))
        })?;
        self.state.set_current_directory(directory.clone());
        Ok(directory)
    }
}

impl Reconnect for Session {
    fn reconnect(&mut self) -> BoxFuture<'_, Result<()>> {
        Box::pin(Session::reconnect(self))
    }
}

/// Extracts the quoted directory of a `257` reply.
///
/// Embedded quotes are doubled (RFC 959 appendix II).
pub fn parse_pwd_reply(text: &str) -> Option<String> {
    let start = text.find('"')?;
    let mut chars = text[start + 1..].chars().peekable();
    let mut path = String::new();
    while let Some(c) = chars.next() {
        if c == '"' {
            if chars.peek() == Some(&'"') {
                chars.next();
                path.push('"');
            } else {
                return Some(path);
            }
        } else {
            path.push(c);
        }
    }
    None
}
