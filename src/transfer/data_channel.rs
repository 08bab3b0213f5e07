//! Module `data_channel`
//!
//! Negotiates the ephemeral data connection used by one transfer
//! (`LIST`, `MLSD`, `RETR`, `STOR`). Passive mode dials a server-assigned
//! endpoint; active mode listens locally and accepts exactly one inbound
//! connection from the server.

use log::{debug, info, warn};
use std::net::{IpAddr, SocketAddr, SocketAddrV4};
use std::time::Duration;
use tokio::net::{TcpListener, TcpStream};
use tokio::time::timeout;

use crate::control::ControlChannel;
use crate::error::{FtpError, Result};
use crate::protocol::responses::{EXTENDED_PASSIVE_MODE, PASSIVE_MODE};
use crate::protocol::{Command, Verb};
use crate::transfer::modes::DataMode;
use crate::utils::network::passive_target;

enum DataSocket {
    Connected(TcpStream),
    Listening {
        listener: TcpListener,
        accept_timeout: Duration,
        expected_peer: IpAddr,
    },
}

/// A data connection good for exactly one transfer.
pub struct DataConnection {
    socket: DataSocket,
    mode: DataMode,
}

impl DataConnection {
    pub fn mode(&self) -> DataMode {
        self.mode
    }

    /// Returns the connected stream.
    ///
    /// In active mode this waits for the server to connect; call it only
    /// after the transfer command has been accepted.
    pub async fn into_stream(self) -> Result<TcpStream> {
        match self.socket {
            DataSocket::Connected(stream) => Ok(stream),
            DataSocket::Listening {
                listener,
                accept_timeout,
                expected_peer,
            } => match timeout(accept_timeout, listener.accept()).await {
                Ok(Ok((stream, peer))) => {
                    if peer.ip() != expected_peer {
                        warn!(
                            "Rejected data connection from {} (expected {})",
                            peer, expected_peer
                        );
                        return Err(FtpError::DataConnect(format!(
                            "data connection from unexpected peer {}",
                            peer
                        )));
                    }
                    info!("Active data connection accepted from {}", peer);
                    Ok(stream)
                }
                Ok(Err(e)) => Err(FtpError::DataConnect(format!("accept failed: {}", e))),
                Err(_) => Err(FtpError::DataConnect(format!(
                    "server did not connect within {:?}",
                    accept_timeout
                ))),
            },
        }
    }
}

/// Enters passive mode and connects to the advertised endpoint.
///
/// IPv4 control connections use `PASV`, IPv6 ones `EPSV`.
pub async fn open_passive(control: &mut ControlChannel, connect_timeout: Duration) -> Result<DataConnection> {
    let peer = control.peer_addr().ok_or(FtpError::NotConnected)?;

    let target = if peer.is_ipv6() {
        let reply = control.send_command(&Command::new(Verb::EPSV)).await?;
        if reply.code != EXTENDED_PASSIVE_MODE {
            return Err(FtpError::DataConnect(format!(
                "EPSV refused: {} {}",
                reply.code,
                reply.text()
            )));
        }
        let port = parse_epsv_reply(&reply.text()).ok_or_else(|| {
            FtpError::DataConnect(format!("unparseable EPSV reply: {}", reply.text()))
        })?;
        SocketAddr::new(peer.ip(), port)
    } else {
        let reply = control.send_command(&Command::new(Verb::PASV)).await?;
        if reply.code != PASSIVE_MODE {
            return Err(FtpError::DataConnect(format!(
                "PASV refused: {} {}",
                reply.code,
                reply.text()
            )));
        }
        let advertised = parse_pasv_reply(&reply.text()).ok_or_else(|| {
            FtpError::DataConnect(format!("unparseable PASV reply: {}", reply.text()))
        })?;
        let ip = passive_target(IpAddr::V4(*advertised.ip()), peer.ip());
        if ip != IpAddr::V4(*advertised.ip()) {
            debug!("Server advertised {}, dialing {} instead", advertised.ip(), ip);
        }
        SocketAddr::new(ip, advertised.port())
    };

    match timeout(connect_timeout, TcpStream::connect(target)).await {
        Ok(Ok(stream)) => {
            debug!("Passive data connection established to {}", target);
            Ok(DataConnection {
                socket: DataSocket::Connected(stream),
                mode: DataMode::Passive,
            })
        }
        Ok(Err(e)) => Err(FtpError::DataConnect(format!(
            "failed to connect to {}: {}",
            target, e
        ))),
        Err(_) => Err(FtpError::DataConnect(format!(
            "timed out connecting to {}",
            target
        ))),
    }
}

/// Listens on `bind_ip` and advertises the port with `PORT` or `EPRT`.
pub async fn open_active(
    control: &mut ControlChannel,
    bind_ip: IpAddr,
    accept_timeout: Duration,
) -> Result<DataConnection> {
    let expected_peer = control.peer_addr().ok_or(FtpError::NotConnected)?.ip();

    let listener = TcpListener::bind(SocketAddr::new(bind_ip, 0))
        .await
        .map_err(|e| FtpError::DataConnect(format!("failed to bind {}: {}", bind_ip, e)))?;
    let local = listener
        .local_addr()
        .map_err(|e| FtpError::DataConnect(format!("listener has no address: {}", e)))?;

    let command = match local {
        SocketAddr::V4(v4) => Command::with_arg(Verb::PORT, format_port_argument(&v4)),
        SocketAddr::V6(_) => Command::with_arg(Verb::EPRT, format_eprt_argument(&local)),
    };

    let reply = control.send_command(&command).await?;
    if !reply.is_success() {
        return Err(FtpError::DataConnect(format!(
            "{} refused: {} {}",
            command.verb,
            reply.code,
            reply.text()
        )));
    }

    debug!("Listening for active data connection on {}", local);
    Ok(DataConnection {
        socket: DataSocket::Listening {
            listener,
            accept_timeout,
            expected_peer,
        },
        mode: DataMode::Active,
    })
}

/// Extracts `h1,h2,h3,h4,p1,p2` from a `227` reply text.
///
/// Parentheses are optional; some servers omit them.
pub fn parse_pasv_reply(text: &str) -> Option<SocketAddrV4> {
    text.split(|c: char| !(c.is_ascii_digit() || c == ','))
        .filter(|run| run.matches(',').count() == 5)
        .find_map(|run| {
            let nums: Vec<u8> = run
                .split(',')
                .map(|n| n.parse::<u8>().ok())
                .collect::<Option<Vec<u8>>>()?;
            let port = u16::from(nums[4]) << 8 | u16::from(nums[5]);
            Some(SocketAddrV4::new(
                [nums[0], nums[1], nums[2], nums[3]].into(),
                port,
            ))
        })
}

/// Extracts the port from a `229` reply text: `(|||port|)`.
pub fn parse_epsv_reply(text: &str) -> Option<u16> {
    let start = text.find('(')?;
    let end = text[start..].find(')')? + start;
    let inner = &text[start + 1..end];
    let delim = inner.chars().next()?;
    let parts: Vec<&str> = inner.split(delim).collect();
    if parts.len() != 5 {
        return None;
    }
    parts[3].parse().ok().filter(|p| *p != 0)
}

/// `PORT` argument for an IPv4 endpoint.
pub fn format_port_argument(addr: &SocketAddrV4) -> String {
    let [a, b, c, d] = addr.ip().octets();
    let port = addr.port();
    format!("{},{},{},{},{},{}", a, b, c, d, port >> 8, port & 0xff)
}

/// `EPRT` argument (RFC 2428) for any endpoint.
pub fn format_eprt_argument(addr: &SocketAddr) -> String {
    let family = if addr.is_ipv4() { 1 } else { 2 };
    format!("|{}|{}|{}|", family, addr.ip(), addr.port())
}
