//! In-process FTP server used by the integration tests.
//!
//! Serves an in-memory tree over real TCP sockets on 127.0.0.1, with a few
//! switchable faults.

#![allow(dead_code)]

use chrono::{DateTime, NaiveDateTime, TimeZone, Utc};
use log::{debug, info, warn};
use std::collections::{BTreeMap, BTreeSet};
use std::io;
use std::net::{SocketAddr, SocketAddrV4};
use std::sync::Arc;
use tokio::io::{AsyncBufReadExt, AsyncReadExt, AsyncWriteExt, BufReader};
use tokio::net::tcp::OwnedWriteHalf;
use tokio::net::{TcpListener, TcpStream};
use tokio::sync::Mutex;

use rax_ftp_client::ConnectionParams;
use rax_ftp_client::utils::path;

pub const USER: &str = "alice";
pub const PASSWORD: &str = "alice123";

/// Misbehaviours the server can be told to exhibit.
#[derive(Debug, Default)]
pub struct Faults {
    /// Answer every login with `530 Login incorrect`.
    pub reject_login: bool,
    /// Number of upcoming `RETR`s that announce the size, send nothing and
    /// still report success.
    pub short_retrievals: usize,
    /// Refuse `PASV` so clients must use `PORT`.
    pub refuse_passive: bool,
    pub hide_mlsd: bool,
    pub hide_mfmt: bool,
    /// Close the control connection without replying to the next
    /// `hang_ups` commands with this verb.
    pub hang_up_on: Option<&'static str>,
    pub hang_ups: usize,
    /// Never answer this verb; the connection stays open.
    pub silent_on: Option<&'static str>,
    /// Number of upcoming `RETR`s that open the data connection and then
    /// send nothing until the client drops it.
    pub stall_retrievals: usize,
    /// Acknowledge `PORT` but never connect to the client.
    pub ignore_port: bool,
}

struct RemoteFile {
    data: Vec<u8>,
    modified: DateTime<Utc>,
}

struct Shared {
    files: BTreeMap<String, RemoteFile>,
    dirs: BTreeSet<String>,
    faults: Faults,
    connections: usize,
    commands: Vec<String>,
}

impl Shared {
    fn is_dir(&self, path: &str) -> bool {
        self.dirs.contains(path)
    }

    fn parent_is_dir(&self, target: &str) -> bool {
        self.is_dir(path::parent(target).unwrap_or("/"))
    }

    fn children(&self, directory: &str) -> Vec<String> {
        let mut lines = Vec::new();
        let mlsd_time = |t: &DateTime<Utc>| t.format("%Y%m%d%H%M%S").to_string();
        for dir in &self.dirs {
            if dir != "/" && path::parent(dir) == Some(directory) {
                let name = dir.rsplit('/').next().unwrap_or(dir);
                lines.push(format!("type=dir;modify={}; {}", mlsd_time(&epoch()), name));
            }
        }
        for (file, entry) in &self.files {
            if path::parent(file) == Some(directory) {
                let name = file.rsplit('/').next().unwrap_or(file);
                lines.push(format!(
                    "type=file;size={};modify={}; {}",
                    entry.data.len(),
                    mlsd_time(&entry.modified),
                    name
                ));
            }
        }
        lines
    }

    fn unix_children(&self, directory: &str) -> Vec<String> {
        let mut lines = vec![format!("total {}", self.files.len())];
        for dir in &self.dirs {
            if dir != "/" && path::parent(dir) == Some(directory) {
                let name = dir.rsplit('/').next().unwrap_or(dir);
                lines.push(format!(
                    "drwxr-xr-x 2 owner group 4096 {} {}",
                    epoch().format("%b %d  %Y"),
                    name
                ));
            }
        }
        for (file, entry) in &self.files {
            if path::parent(file) == Some(directory) {
                let name = file.rsplit('/').next().unwrap_or(file);
                lines.push(format!(
                    "-rw-r--r-- 1 owner group {} {} {}",
                    entry.data.len(),
                    entry.modified.format("%b %d  %Y"),
                    name
                ));
            }
        }
        lines
    }
}

fn epoch() -> DateTime<Utc> {
    Utc.with_ymd_and_hms(2024, 1, 5, 0, 0, 0).unwrap()
}

/// A running mock server; clones share the same tree.
#[derive(Clone)]
pub struct MockServer {
    addr: SocketAddr,
    shared: Arc<Mutex<Shared>>,
}

impl MockServer {
    pub async fn start() -> Self {
        Self::with_faults(Faults::default()).await
    }

    pub async fn with_faults(faults: Faults) -> Self {
        let _ = env_logger::builder().is_test(true).try_init();

        let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let addr = listener.local_addr().unwrap();
        let shared = Arc::new(Mutex::new(Shared {
            files: BTreeMap::new(),
            dirs: BTreeSet::from(["/".to_string()]),
            faults,
            connections: 0,
            commands: Vec::new(),
        }));

        let accept_shared = Arc::clone(&shared);
        tokio::spawn(async move {
            loop {
                let (stream, peer) = match listener.accept().await {
                    Ok(accepted) => accepted,
                    Err(e) => {
                        warn!("Mock server accept failed: {}", e);
                        break;
                    }
                };
                accept_shared.lock().await.connections += 1;
                let shared = Arc::clone(&accept_shared);
                tokio::spawn(async move {
                    if let Err(e) = handle_connection(stream, shared).await {
                        debug!("Mock connection {} ended: {}", peer, e);
                    }
                });
            }
        });

        info!("Mock FTP server listening on {}", addr);
        Self { addr, shared }
    }

    /// Client parameters pointing at this server with short timeouts.
    pub fn params(&self) -> ConnectionParams {
        let mut params =
            ConnectionParams::new("127.0.0.1", self.addr.port()).with_credentials(USER, PASSWORD);
        params.timeout_secs = 5;
        params.reply_timeout_secs = 5;
        params.data_idle_timeout_secs = 5;
        params.buffer_size = 4;
        params
    }

    pub fn addr(&self) -> SocketAddr {
        self.addr
    }

    pub async fn connections(&self) -> usize {
        self.shared.lock().await.connections
    }

    /// Every command received so far, in order, as `VERB arg`.
    pub async fn commands(&self) -> Vec<String> {
        self.shared.lock().await.commands.clone()
    }

    pub async fn faults(&self, change: impl FnOnce(&mut Faults)) {
        change(&mut self.shared.lock().await.faults);
    }

    /// Adds a file, creating its parent directories.
    pub async fn put_file(&self, remote: &str, data: &[u8], modified: DateTime<Utc>) {
        let mut shared = self.shared.lock().await;
        if let Some(parent) = path::parent(remote) {
            for dir in path::ancestors(parent) {
                shared.dirs.insert(dir);
            }
        }
        shared.files.insert(
            remote.to_string(),
            RemoteFile {
                data: data.to_vec(),
                modified,
            },
        );
    }

    pub async fn mkdir(&self, remote: &str) {
        let mut shared = self.shared.lock().await;
        for dir in path::ancestors(remote) {
            shared.dirs.insert(dir);
        }
    }

    pub async fn file(&self, remote: &str) -> Option<Vec<u8>> {
        self.shared
            .lock()
            .await
            .files
            .get(remote)
            .map(|f| f.data.clone())
    }

    pub async fn modified(&self, remote: &str) -> Option<DateTime<Utc>> {
        self.shared.lock().await.files.get(remote).map(|f| f.modified)
    }

    pub async fn has_dir(&self, remote: &str) -> bool {
        self.shared.lock().await.is_dir(remote)
    }
}

enum DataEndpoint {
    Passive(TcpListener),
    Active(SocketAddr),
}

struct Connection {
    logged_in: bool,
    user: Option<String>,
    cwd: String,
    data: Option<DataEndpoint>,
    rest: u64,
    rename_from: Option<String>,
}

async fn reply(writer: &mut OwnedWriteHalf, line: &str) -> io::Result<()> {
    writer.write_all(format!("{}\r\n", line).as_bytes()).await?;
    writer.flush().await
}

async fn open_data(conn: &mut Connection) -> Option<TcpStream> {
    match conn.data.take()? {
        DataEndpoint::Passive(listener) => listener.accept().await.ok().map(|(s, _)| s),
        DataEndpoint::Active(addr) => TcpStream::connect(addr).await.ok(),
    }
}

fn parse_port(arg: &str) -> Option<SocketAddr> {
    let nums: Vec<u8> = arg
        .split(',')
        .map(|n| n.trim().parse().ok())
        .collect::<Option<Vec<u8>>>()?;
    if nums.len() != 6 {
        return None;
    }
    let port = u16::from(nums[4]) << 8 | u16::from(nums[5]);
    Some(SocketAddr::V4(SocketAddrV4::new(
        [nums[0], nums[1], nums[2], nums[3]].into(),
        port,
    )))
}

async fn handle_connection(stream: TcpStream, shared: Arc<Mutex<Shared>>) -> io::Result<()> {
    let (read, mut writer) = stream.into_split();
    let mut lines = BufReader::new(read).lines();
    reply(&mut writer, "220 Mock FTP server ready").await?;

    let mut conn = Connection {
        logged_in: false,
        user: None,
        cwd: "/".to_string(),
        data: None,
        rest: 0,
        rename_from: None,
    };

    while let Some(line) = lines.next_line().await? {
        let line = line.trim_end_matches('\r').to_string();
        let (verb, arg) = match line.split_once(' ') {
            Some((v, a)) => (v.to_ascii_uppercase(), a.to_string()),
            None => (line.to_ascii_uppercase(), String::new()),
        };
        shared.lock().await.commands.push(if arg.is_empty() {
            verb.clone()
        } else {
            format!("{} {}", verb, arg)
        });

        if verb == "QUIT" {
            reply(&mut writer, "221 Goodbye").await?;
            break;
        }

        let (hang_up, silent) = {
            let mut shared = shared.lock().await;
            let faults = &mut shared.faults;
            let hang_up = faults.hang_ups > 0 && faults.hang_up_on == Some(verb.as_str());
            if hang_up {
                faults.hang_ups -= 1;
            }
            (hang_up, faults.silent_on == Some(verb.as_str()))
        };
        if hang_up {
            debug!("Mock server hanging up on {}", verb);
            break;
        }
        if silent {
            debug!("Mock server ignoring {}", verb);
            continue;
        }
        handle_command(&mut conn, &verb, &arg, &shared, &mut writer).await?;
    }
    Ok(())
}

async fn handle_command(
    conn: &mut Connection,
    verb: &str,
    arg: &str,
    shared: &Arc<Mutex<Shared>>,
    writer: &mut OwnedWriteHalf,
) -> io::Result<()> {
    match verb {
        "USER" => {
            conn.user = Some(arg.to_string());
            return reply(writer, "331 Password required").await;
        }
        "PASS" => {
            let rejected = shared.lock().await.faults.reject_login;
            if !rejected && conn.user.as_deref() == Some(USER) && arg == PASSWORD {
                conn.logged_in = true;
                return reply(writer, "230 Login successful").await;
            }
            return reply(writer, "530 Login incorrect").await;
        }
        _ if !conn.logged_in => return reply(writer, "530 Please login with USER and PASS").await,
        _ => {}
    }

    let target = if arg.is_empty() {
        conn.cwd.clone()
    } else {
        path::resolve(&conn.cwd, arg)
    };

    match verb {
        "NOOP" => reply(writer, "200 NOOP ok").await,
        "FEAT" => {
            let (mlsd, mfmt) = {
                let shared = shared.lock().await;
                (!shared.faults.hide_mlsd, !shared.faults.hide_mfmt)
            };
            let mut text = String::from("211-Features:\r\n MDTM\r\n SIZE\r\n REST STREAM\r\n");
            if mlsd {
                text.push_str(" MLSD type*;size*;modify*;\r\n");
            }
            if mfmt {
                text.push_str(" MFMT\r\n");
            }
            text.push_str("211 End");
            reply(writer, &text).await
        }
        "PWD" => reply(writer, &format!("257 \"{}\" is the current directory", conn.cwd)).await,
        "CWD" => {
            if shared.lock().await.is_dir(&target) {
                conn.cwd = target;
                reply(writer, "250 Directory successfully changed").await
            } else {
                reply(writer, "550 Failed to change directory").await
            }
        }
        "TYPE" => match arg {
            "I" | "A" => reply(writer, &format!("200 Switching to {} mode", arg)).await,
            _ => reply(writer, "504 Unsupported type").await,
        },
        "PASV" => {
            if shared.lock().await.faults.refuse_passive {
                return reply(writer, "502 PASV not allowed").await;
            }
            let listener = TcpListener::bind("127.0.0.1:0").await?;
            let port = listener.local_addr()?.port();
            conn.data = Some(DataEndpoint::Passive(listener));
            reply(
                writer,
                &format!(
                    "227 Entering Passive Mode (127,0,0,1,{},{})",
                    port >> 8,
                    port & 0xff
                ),
            )
            .await
        }
        "PORT" => match parse_port(arg) {
            Some(addr) => {
                if !shared.lock().await.faults.ignore_port {
                    conn.data = Some(DataEndpoint::Active(addr));
                }
                reply(writer, "200 PORT command successful").await
            }
            None => reply(writer, "501 Illegal PORT command").await,
        },
        "REST" => match arg.parse::<u64>() {
            Ok(offset) => {
                conn.rest = offset;
                reply(writer, &format!("350 Restarting at {}", offset)).await
            }
            Err(_) => reply(writer, "501 Invalid offset").await,
        },
        "LIST" | "MLSD" => {
            let lines = {
                let shared = shared.lock().await;
                if !shared.is_dir(&target) {
                    None
                } else if verb == "MLSD" {
                    let mut lines = vec![format!("type=cdir;modify=20240105000000; {}", target)];
                    lines.extend(shared.children(&target));
                    Some(lines)
                } else {
                    Some(shared.unix_children(&target))
                }
            };
            let Some(lines) = lines else {
                conn.data = None;
                return reply(writer, "550 No such directory").await;
            };
            reply(writer, "150 Here comes the directory listing").await?;
            let Some(mut data) = open_data(conn).await else {
                return reply(writer, "425 Can't open data connection").await;
            };
            for line in lines {
                data.write_all(format!("{}\r\n", line).as_bytes()).await?;
            }
            data.shutdown().await?;
            reply(writer, "226 Directory send OK").await
        }
        "RETR" => {
            let offset = std::mem::take(&mut conn.rest);
            let found = {
                let mut shared = shared.lock().await;
                let exists = shared.files.contains_key(&target);
                let short = shared.faults.short_retrievals > 0;
                if short && exists {
                    shared.faults.short_retrievals -= 1;
                }
                let stall = shared.faults.stall_retrievals > 0;
                if stall && exists {
                    shared.faults.stall_retrievals -= 1;
                }
                shared.files.get(&target).map(|f| (f.data.clone(), short, stall))
            };
            let Some((content, short, stall)) = found else {
                conn.data = None;
                return reply(writer, "550 Failed to open file").await;
            };
            reply(
                writer,
                &format!(
                    "150 Opening BINARY mode data connection for {} ({} bytes)",
                    arg,
                    content.len()
                ),
            )
            .await?;
            let Some(mut data) = open_data(conn).await else {
                return reply(writer, "425 Can't open data connection").await;
            };
            if stall {
                let mut drained = [0u8; 1];
                let _ = data.read(&mut drained).await;
                return reply(writer, "426 Connection closed; transfer aborted").await;
            }
            let start = (offset as usize).min(content.len());
            let sent = if short {
                Ok(())
            } else {
                data.write_all(&content[start..]).await
            };
            let _ = data.shutdown().await;
            drop(data);
            match sent {
                Ok(()) => reply(writer, "226 Transfer complete").await,
                Err(_) => reply(writer, "426 Connection closed; transfer aborted").await,
            }
        }
        "STOR" => {
            let offset = std::mem::take(&mut conn.rest);
            if !shared.lock().await.parent_is_dir(&target) {
                conn.data = None;
                return reply(writer, "553 Could not create file").await;
            }
            reply(writer, "150 Ok to send data").await?;
            let Some(mut data) = open_data(conn).await else {
                return reply(writer, "425 Can't open data connection").await;
            };
            let mut received = Vec::new();
            if data.read_to_end(&mut received).await.is_err() {
                return reply(writer, "426 Connection closed; transfer aborted").await;
            }
            let mut shared = shared.lock().await;
            let mut content = match shared.files.get(&target) {
                Some(existing) if offset > 0 => {
                    existing.data[..(offset as usize).min(existing.data.len())].to_vec()
                }
                _ => Vec::new(),
            };
            content.extend_from_slice(&received);
            shared.files.insert(
                target,
                RemoteFile {
                    data: content,
                    modified: Utc::now(),
                },
            );
            drop(shared);
            reply(writer, "226 Transfer complete").await
        }
        "DELE" => {
            if shared.lock().await.files.remove(&target).is_some() {
                reply(writer, "250 Delete operation successful").await
            } else {
                reply(writer, "550 Delete operation failed").await
            }
        }
        "MKD" => {
            let mut shared = shared.lock().await;
            if shared.is_dir(&target) || shared.files.contains_key(&target) {
                drop(shared);
                reply(writer, "550 Create directory operation failed: exists").await
            } else if !shared.parent_is_dir(&target) {
                drop(shared);
                reply(writer, "550 Create directory operation failed").await
            } else {
                shared.dirs.insert(target.clone());
                drop(shared);
                reply(writer, &format!("257 \"{}\" created", target)).await
            }
        }
        "RMD" => {
            let mut shared = shared.lock().await;
            let prefix = format!("{}/", target);
            let empty = !shared.files.keys().any(|f| f.starts_with(&prefix))
                && !shared.dirs.iter().any(|d| d.starts_with(&prefix));
            if target != "/" && shared.is_dir(&target) && empty {
                shared.dirs.remove(&target);
                drop(shared);
                reply(writer, "250 Remove directory operation successful").await
            } else {
                drop(shared);
                reply(writer, "550 Remove directory operation failed").await
            }
        }
        "RNFR" => {
            let exists = shared.lock().await.files.contains_key(&target);
            if exists {
                conn.rename_from = Some(target);
                reply(writer, "350 Ready for RNTO").await
            } else {
                reply(writer, "550 RNFR command failed").await
            }
        }
        "RNTO" => {
            let Some(from) = conn.rename_from.take() else {
                return reply(writer, "503 RNFR required first").await;
            };
            let mut shared = shared.lock().await;
            match shared.files.remove(&from) {
                Some(file) => {
                    shared.files.insert(target, file);
                    drop(shared);
                    reply(writer, "250 Rename successful").await
                }
                None => {
                    drop(shared);
                    reply(writer, "550 Rename failed").await
                }
            }
        }
        "SIZE" => {
            let size = shared.lock().await.files.get(&target).map(|f| f.data.len());
            match size {
                Some(size) => reply(writer, &format!("213 {}", size)).await,
                None => reply(writer, "550 Could not get file size").await,
            }
        }
        "MDTM" => {
            let modified = shared.lock().await.files.get(&target).map(|f| f.modified);
            match modified {
                Some(t) => reply(writer, &format!("213 {}", t.format("%Y%m%d%H%M%S"))).await,
                None => reply(writer, "550 Could not get modification time").await,
            }
        }
        "MFMT" => {
            let Some((stamp, file)) = arg.split_once(' ') else {
                return reply(writer, "501 Syntax error").await;
            };
            let target = path::resolve(&conn.cwd, file);
            let Ok(time) = NaiveDateTime::parse_from_str(stamp, "%Y%m%d%H%M%S") else {
                return reply(writer, "501 Invalid time").await;
            };
            let mut shared = shared.lock().await;
            if shared.faults.hide_mfmt {
                drop(shared);
                return reply(writer, "502 Command not implemented").await;
            }
            match shared.files.get_mut(&target) {
                Some(entry) => {
                    entry.modified = time.and_utc();
                    drop(shared);
                    reply(writer, &format!("213 Modify={}; {}", stamp, file)).await
                }
                None => {
                    drop(shared);
                    reply(writer, "550 Could not set modification time").await
                }
            }
        }
        _ => reply(writer, "502 Command not implemented").await,
    }
}
