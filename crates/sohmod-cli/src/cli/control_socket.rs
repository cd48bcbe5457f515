//! Control socket: server (during `sohmod serve`) and client (for `sohmod handle`).
//!
//! Protocol: one request line, one reply line.
//!
//! ```text
//! install <raw>   ->  ok <request-id>   | err <exit-code> <message>
//! cancel <id>     ->  ok                | err <exit-code> <message>
//! status <id>     ->  ok <run as json>  | err <exit-code> <message>
//! root            ->  ok <mods root>
//! ```
//!
//! A client only relays an install to a server that writes into the same
//! mods root as the client would.

use anyhow::Result;
use sohmod_core::orchestrator::{Orchestrator, RequestId};
use std::path::Path;
#[cfg(unix)]
use std::time::Duration;

/// How long a client waits for the server's reply.
#[cfg(unix)]
const REPLY_TIMEOUT: Duration = Duration::from_secs(5);

/// Server reply as seen by a client.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum RelayReply {
    /// An `install` was admitted.
    Accepted(RequestId),
    /// Any other success; carries the rest of the line.
    Done(String),
    Rejected { code: i32, message: String },
}

/// Parse one reply line. `None` for lines that are not part of the protocol.
pub fn parse_reply(line: &str) -> Option<RelayReply> {
    let line = line.trim_end_matches(['\r', '\n']);
    if line == "ok" {
        return Some(RelayReply::Done(String::new()));
    }
    if let Some(rest) = line.strip_prefix("ok ") {
        return Some(match rest.trim().parse::<RequestId>() {
            Ok(id) => RelayReply::Accepted(id),
            Err(_) => RelayReply::Done(rest.to_string()),
        });
    }
    let rest = line.strip_prefix("err ")?;
    let (code, message) = rest.split_once(' ').unwrap_or((rest, ""));
    Some(RelayReply::Rejected {
        code: code.parse().ok()?,
        message: message.to_string(),
    })
}

fn err_line(code: i32, message: impl std::fmt::Display) -> String {
    // Keep the reply on one line whatever the message holds.
    let message = message.to_string().replace(['\r', '\n'], " ");
    format!("err {code} {message}")
}

/// Execute one request line against `orch` and produce the reply line.
pub fn handle_line(orch: &Orchestrator, line: &str) -> String {
    let line = line.trim();
    let (verb, arg) = line.split_once(' ').unwrap_or((line, ""));
    let arg = arg.trim();
    match verb {
        "install" => match orch.submit(arg) {
            Ok(id) => format!("ok {id}"),
            Err(e) => err_line(e.exit_code(), e),
        },
        "cancel" => match arg.parse::<RequestId>() {
            Ok(id) => match orch.cancel(id) {
                Ok(()) => "ok".to_string(),
                Err(e) => err_line(1, e),
            },
            Err(_) => err_line(1, format!("bad request id `{arg}`")),
        },
        "status" => match arg.parse::<RequestId>().ok().and_then(|id| orch.status(id)) {
            Some(run) => match serde_json::to_string(&run) {
                Ok(json) => format!("ok {json}"),
                Err(e) => err_line(1, e),
            },
            None => err_line(1, format!("unknown request `{arg}`")),
        },
        "root" => format!("ok {}", orch.layout().root().display()).replace(['\r', '\n'], " "),
        _ => err_line(1, format!("unknown command `{verb}`")),
    }
}

/// Spawns a task that listens on `path` and answers request lines with
/// [`handle_line`]. A stale socket file at `path` is replaced.
#[cfg(unix)]
pub fn spawn_control_listener(
    orch: Orchestrator,
    path: impl AsRef<Path>,
) -> Result<tokio::task::JoinHandle<()>> {
    use tokio::io::{AsyncBufReadExt, AsyncWriteExt, BufReader};
    use tokio::net::UnixListener;

    let path = path.as_ref().to_path_buf();
    let _ = std::fs::remove_file(&path);
    let listener = UnixListener::bind(&path)?;
    let handle = tokio::spawn(async move {
        loop {
            match listener.accept().await {
                Ok((stream, _)) => {
                    let orch = orch.clone();
                    tokio::spawn(async move {
                        let (read, mut write) = stream.into_split();
                        let mut reader = BufReader::new(read).lines();
                        while let Ok(Some(line)) = reader.next_line().await {
                            if line.trim().is_empty() {
                                continue;
                            }
                            tracing::debug!(line = %line, "control request");
                            let mut reply = handle_line(&orch, &line);
                            reply.push('\n');
                            if let Err(e) = write.write_all(reply.as_bytes()).await {
                                tracing::debug!("control socket write: {}", e);
                                break;
                            }
                        }
                    });
                }
                Err(e) => tracing::debug!("control socket accept: {}", e),
            }
        }
    });
    Ok(handle)
}

#[cfg(not(unix))]
pub fn spawn_control_listener(
    _orch: Orchestrator,
    _path: impl AsRef<Path>,
) -> Result<tokio::task::JoinHandle<()>> {
    anyhow::bail!("control socket is only available on unix")
}

/// Send one request line and read the reply. `Ok(None)` if nobody is
/// listening (no socket file, or a stale one).
#[cfg(unix)]
pub async fn request(socket_path: &Path, line: &str) -> Result<Option<RelayReply>> {
    use std::io::ErrorKind;
    use tokio::io::{AsyncBufReadExt, AsyncWriteExt, BufReader};

    let mut stream = match tokio::net::UnixStream::connect(socket_path).await {
        Ok(s) => s,
        Err(e) if matches!(e.kind(), ErrorKind::NotFound | ErrorKind::ConnectionRefused) => {
            return Ok(None)
        }
        Err(e) => return Err(e.into()),
    };
    stream.write_all(format!("{line}\n").as_bytes()).await?;
    let mut reply = String::new();
    tokio::time::timeout(REPLY_TIMEOUT, BufReader::new(stream).read_line(&mut reply))
        .await
        .map_err(|_| anyhow::anyhow!("no reply from {}", socket_path.display()))??;
    parse_reply(&reply)
        .map(Some)
        .ok_or_else(|| anyhow::anyhow!("malformed reply from control socket: {:?}", reply))
}

#[cfg(not(unix))]
pub async fn request(_socket_path: &Path, _line: &str) -> Result<Option<RelayReply>> {
    Ok(None)
}

/// Hand a raw invocation to a running `sohmod serve`. `Ok(None)` when no
/// server is listening or the server installs into a mods root other than
/// `mods_root`.
pub async fn relay(
    socket_path: &Path,
    mods_root: &Path,
    raw: &str,
) -> Result<Option<RelayReply>> {
    match request(socket_path, "root").await? {
        Some(RelayReply::Done(served)) if same_root(Path::new(&served), mods_root) => {}
        Some(reply) => {
            tracing::debug!(
                socket = %socket_path.display(),
                mods_root = %mods_root.display(),
                "running instance serves another mods root ({:?}); not relaying",
                reply
            );
            return Ok(None);
        }
        None => return Ok(None),
    }
    request(socket_path, &format!("install {raw}")).await
}

fn same_root(a: &Path, b: &Path) -> bool {
    match (a.canonicalize(), b.canonicalize()) {
        (Ok(a), Ok(b)) => a == b,
        _ => a == b,
    }
}
