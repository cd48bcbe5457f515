//! Minimal scripted HTTP/1.1 server for integration tests.
//!
//! Each path gets a sequence of replies; request N to a path gets reply N,
//! and the last reply repeats. Hits per path are counted so tests can assert
//! how many attempts the fetcher made.

use std::collections::HashMap;
use std::io::{Read, Write};
use std::net::{TcpListener, TcpStream};
use std::sync::{Arc, Mutex};
use std::thread;
use std::time::Duration;

#[derive(Debug, Clone)]
pub enum Reply {
    /// Bare status with an empty body.
    Status(u16),
    /// 200 with the whole body at once.
    Body(Vec<u8>),
    /// 200 with the body split into `chunks` writes, `delay` apart.
    Slow {
        body: Vec<u8>,
        chunks: usize,
        delay: Duration,
    },
    /// 200 announcing `declared` bytes but sending only `body`, then closing.
    Truncated { body: Vec<u8>, declared: u64 },
}

#[derive(Default)]
struct Route {
    replies: Vec<Reply>,
    served: usize,
}

#[derive(Default)]
struct State {
    routes: HashMap<String, Route>,
    hits: HashMap<String, usize>,
}

pub struct ArchiveServer {
    base: String,
    state: Arc<Mutex<State>>,
}

impl ArchiveServer {
    /// Bind to an ephemeral port and serve until the process exits.
    pub fn start() -> Self {
        let listener = TcpListener::bind("127.0.0.1:0").expect("bind");
        let port = listener.local_addr().unwrap().port();
        let state = Arc::new(Mutex::new(State::default()));
        let shared = Arc::clone(&state);
        thread::spawn(move || {
            for stream in listener.incoming().flatten() {
                let state = Arc::clone(&shared);
                thread::spawn(move || handle(stream, &state));
            }
        });
        Self {
            base: format!("http://127.0.0.1:{port}"),
            state,
        }
    }

    /// Script the replies for `path` (leading `/` included).
    pub fn route(&self, path: &str, replies: Vec<Reply>) {
        assert!(!replies.is_empty());
        self.state.lock().unwrap().routes.insert(
            path.to_string(),
            Route {
                replies,
                served: 0,
            },
        );
    }

    pub fn url(&self, path: &str) -> String {
        format!("{}{}", self.base, path)
    }

    pub fn hits(&self, path: &str) -> usize {
        self.state
            .lock()
            .unwrap()
            .hits
            .get(path)
            .copied()
            .unwrap_or(0)
    }
}

fn next_reply(state: &Mutex<State>, path: &str) -> Reply {
    let mut state = state.lock().unwrap();
    *state.hits.entry(path.to_string()).or_default() += 1;
    match state.routes.get_mut(path) {
        Some(route) => {
            let i = route.served.min(route.replies.len() - 1);
            route.served += 1;
            route.replies[i].clone()
        }
        None => Reply::Status(404),
    }
}

fn handle(mut stream: TcpStream, state: &Mutex<State>) {
    let _ = stream.set_read_timeout(Some(Duration::from_secs(5)));
    let mut buf = Vec::new();
    let mut chunk = [0u8; 4096];
    while !buf.windows(4).any(|w| w == b"\r\n\r\n") {
        match stream.read(&mut chunk) {
            Ok(0) | Err(_) => return,
            Ok(n) => buf.extend_from_slice(&chunk[..n]),
        }
    }
    let request = String::from_utf8_lossy(&buf);
    let path = request
        .lines()
        .next()
        .and_then(|l| l.split_whitespace().nth(1))
        .unwrap_or("/")
        .to_string();

    match next_reply(state, &path) {
        Reply::Status(code) => {
            let head = format!(
                "HTTP/1.1 {code} {}\r\nContent-Length: 0\r\nConnection: close\r\n\r\n",
                reason(code)
            );
            let _ = stream.write_all(head.as_bytes());
        }
        Reply::Body(body) => {
            let _ = stream.write_all(ok_head(body.len() as u64).as_bytes());
            let _ = stream.write_all(&body);
        }
        Reply::Slow {
            body,
            chunks,
            delay,
        } => {
            if stream.write_all(ok_head(body.len() as u64).as_bytes()).is_err() {
                return;
            }
            let size = body.len().div_ceil(chunks.max(1)).max(1);
            for part in body.chunks(size) {
                thread::sleep(delay);
                if stream.write_all(part).is_err() || stream.flush().is_err() {
                    return;
                }
            }
        }
        Reply::Truncated { body, declared } => {
            let _ = stream.write_all(ok_head(declared).as_bytes());
            let _ = stream.write_all(&body);
        }
    }
    let _ = stream.flush();
}

fn ok_head(len: u64) -> String {
    format!(
        "HTTP/1.1 200 OK\r\nContent-Type: application/zip\r\nContent-Length: {len}\r\nConnection: close\r\n\r\n"
    )
}

fn reason(code: u16) -> &'static str {
    match code {
        200 => "OK",
        404 => "Not Found",
        429 => "Too Many Requests",
        500 => "Internal Server Error",
        503 => "Service Unavailable",
        _ => "Status",
    }
}
