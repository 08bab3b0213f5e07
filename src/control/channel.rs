//! Module `channel`
//!
//! The control connection: one TCP stream, one command in flight at a time.
//! Replies are returned as values whatever their code; only I/O failures,
//! timeouts and framing violations are errors, and each of those closes the
//! channel.

use log::{debug, info, warn};
use std::io;
use std::net::SocketAddr;
use std::time::Duration;
use tokio::io::{AsyncWriteExt, BufReader};
use tokio::net::TcpStream;
use tokio::time::timeout;

use crate::control::ChannelState;
use crate::error::{FtpError, Result};
use crate::protocol::responses::{
    ACCOUNT_REQUIRED, LOGIN_SUCCESS, PASSWORD_REQUIRED, READY, SERVICE_READY_SOON,
};
use crate::protocol::{Command, Reply, Verb, parse_reply};
use crate::utils::network::host_port;

/// A single FTP control connection.
#[derive(Debug)]
pub struct ControlChannel {
    stream: Option<BufReader<TcpStream>>,
    state: ChannelState,
    awaiting_reply: bool,
    reply_timeout: Duration,
    peer_addr: Option<SocketAddr>,
    local_addr: Option<SocketAddr>,
}

impl ControlChannel {
    pub fn new(reply_timeout: Duration) -> Self {
        Self {
            stream: None,
            state: ChannelState::NotConnected,
            awaiting_reply: false,
            reply_timeout,
            peer_addr: None,
            local_addr: None,
        }
    }

    // --- Accessors ---

    pub fn state(&self) -> ChannelState {
        self.state
    }

    pub fn is_open(&self) -> bool {
        self.state.is_open()
    }

    pub fn is_authenticated(&self) -> bool {
        self.state == ChannelState::Authenticated
    }

    /// True while a command has been sent and its final reply not yet read.
    pub fn is_awaiting_reply(&self) -> bool {
        self.awaiting_reply
    }

    pub fn peer_addr(&self) -> Option<SocketAddr> {
        self.peer_addr
    }

    pub fn local_addr(&self) -> Option<SocketAddr> {
        self.local_addr
    }

    // --- Transitions ---

    /// Opens the connection and waits for the `220` greeting.
    ///
    /// A `120` ("ready in a few minutes") is followed by waiting for the
    /// real greeting.
    pub async fn connect(&mut self, host: &str, port: u16, connect_timeout: Duration) -> Result<Reply> {
        let addr = host_port(host, port);
        if self.state != ChannelState::NotConnected {
            return Err(FtpError::Connect {
                addr,
                reason: format!("control channel is already {}", self.state),
            });
        }

        let stream = match timeout(connect_timeout, TcpStream::connect(addr.as_str())).await {
            Ok(Ok(stream)) => stream,
            Ok(Err(e)) => {
                self.state = ChannelState::Closed;
                return Err(FtpError::Connect {
                    addr,
                    reason: e.to_string(),
                });
            }
            Err(_) => {
                self.state = ChannelState::Closed;
                return Err(FtpError::Connect {
                    addr,
                    reason: format!("timed out after {:?}", connect_timeout),
                });
            }
        };

        if let Err(e) = stream.set_nodelay(true) {
            warn!("Failed to disable Nagle on control connection to {}: {}", addr, e);
        }
        self.peer_addr = stream.peer_addr().ok();
        self.local_addr = stream.local_addr().ok();
        self.stream = Some(BufReader::new(stream));
        self.state = ChannelState::Connected;
        self.awaiting_reply = true;

        loop {
            let reply = self.read_reply().await.map_err(|e| FtpError::Connect {
                addr: addr.clone(),
                reason: e.to_string(),
            })?;
            match reply.code {
                READY => {
                    info!("Connected to {}: {}", addr, reply.first_line());
                    return Ok(reply);
                }
                SERVICE_READY_SOON => {
                    debug!("Server {} not ready yet: {}", addr, reply.first_line());
                }
                code => {
                    self.close();
                    return Err(FtpError::Connect {
                        addr,
                        reason: format!("unexpected greeting {} {}", code, reply.text()),
                    });
                }
            }
        }
    }

    /// Logs in with `USER`/`PASS`.
    pub async fn authenticate(&mut self, user: &str, password: &str) -> Result<()> {
        match self.state {
            ChannelState::Authenticated => return Ok(()),
            ChannelState::Connected => {}
            _ => return Err(FtpError::NotConnected),
        }

        let mut reply = self.send_command(&Command::with_arg(Verb::USER, user)).await?;
        if reply.code == PASSWORD_REQUIRED {
            let pass = if password.is_empty() {
                Command::new(Verb::PASS)
            } else {
                Command::with_arg(Verb::PASS, password)
            };
            reply = self.send_command(&pass).await?;
        }

        match reply.code {
            code if reply.is_success() => {
                if code != LOGIN_SUCCESS {
                    debug!("Login accepted with {} {}", code, reply.first_line());
                }
                self.state = ChannelState::Authenticated;
                info!("Authenticated as {}", user);
                Ok(())
            }
            ACCOUNT_REQUIRED => Err(FtpError::Auth {
                code: reply.code,
                message: "server requires an account (ACCT), which is not supported".into(),
            }),
            _ if reply.is_permanent_failure() => {
                warn!("Login rejected for {}: {} {}", user, reply.code, reply.text());
                Err(FtpError::Auth {
                    code: reply.code,
                    message: reply.text(),
                })
            }
            _ if reply.is_transient_failure() => Err(FtpError::RemoteOperation {
                path: user.to_string(),
                code: reply.code,
                message: reply.text(),
            }),
            _ => Err(FtpError::Protocol(format!(
                "unexpected reply to login: {} {}",
                reply.code,
                reply.text()
            ))),
        }
    }

    /// Sends one command and reads its reply.
    ///
    /// When the reply is preliminary (1xx), the command is still in progress
    /// and only [`read_reply`](Self::read_reply) may follow.
    pub async fn send_command(&mut self, command: &Command) -> Result<Reply> {
        if !self.state.is_open() {
            return Err(FtpError::NotConnected);
        }
        if self.awaiting_reply {
            warn!(
                "Refusing to send {} while a reply is outstanding; closing control connection",
                command.verb
            );
            self.close();
            return Err(FtpError::ControlIo(io::Error::other(
                "reply to the previous command is still outstanding",
            )));
        }

        let bytes = command.encode()?;
        debug!(">> {}", command);

        let stream = self.stream.as_mut().ok_or(FtpError::NotConnected)?;
        self.awaiting_reply = true;
        let write = async {
            let socket = stream.get_mut();
            socket.write_all(&bytes).await?;
            socket.flush().await
        };
        let written = timeout(self.reply_timeout, write).await;
        match written {
            Ok(Ok(())) => {}
            Ok(Err(e)) => return Err(self.fail(e)),
            Err(_) => return Err(self.fail(timed_out("sending command"))),
        }

        self.read_reply().await
    }

    /// Reads the next reply of the command in flight.
    pub async fn read_reply(&mut self) -> Result<Reply> {
        if !self.awaiting_reply {
            return Err(FtpError::Protocol("no reply is outstanding".into()));
        }
        let stream = self.stream.as_mut().ok_or(FtpError::NotConnected)?;
        let parsed = timeout(self.reply_timeout, parse_reply(stream)).await;

        match parsed {
            Ok(Ok(reply)) => {
                debug!("<< {} {}", reply.code, reply.text());
                if !reply.is_preliminary() {
                    self.awaiting_reply = false;
                }
                Ok(reply)
            }
            Ok(Err(FtpError::ControlIo(e))) => Err(self.fail(e)),
            Ok(Err(e)) => {
                warn!("Closing control connection after framing error: {}", e);
                self.close();
                Err(e)
            }
            Err(_) => Err(self.fail(timed_out("waiting for reply"))),
        }
    }

    /// Sends `QUIT` when the channel is idle, then closes it.
    pub async fn quit(&mut self) {
        if self.state.is_open() && !self.awaiting_reply {
            if let Err(e) = self.send_command(&Command::new(Verb::QUIT)).await {
                debug!("QUIT failed: {}", e);
            }
        }
        self.close();
    }

    /// Drops the connection. Idempotent.
    pub fn close(&mut self) {
        if self.stream.take().is_some() {
            info!(
                "Control connection to {} closed",
                self.peer_addr
                    .map(|a| a.to_string())
                    .unwrap_or_else(|| "<unknown>".into())
            );
        }
        self.state = ChannelState::Closed;
        self.awaiting_reply = false;
    }

    fn fail(&mut self, e: io::Error) -> FtpError {
        warn!("Control connection failure: {}", e);
        self.close();
        FtpError::ControlIo(e)
    }
}

fn timed_out(what: &str) -> io::Error {
    io::Error::new(io::ErrorKind::TimedOut, format!("timed out {}", what))
}
