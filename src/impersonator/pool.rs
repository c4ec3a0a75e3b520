//! A small pool of impersonated helper processes, one per distinct OS user,
//! reused across calls instead of forked per-request (spec §4.5).

use std::collections::{HashMap, VecDeque};
use std::fmt;

use tokio::io::{AsyncBufReadExt, AsyncWriteExt, BufReader};
use tokio::process::Child;
use tokio::sync::Mutex;

use super::protocol::{Request, Response, WireResponse};

#[cfg(unix)]
use super::posix::spawn_impersonated;
#[cfg(windows)]
use super::windows::spawn_impersonated;

#[cfg(unix)]
type Channel = tokio::net::UnixStream;
#[cfg(windows)]
type Channel = tokio::net::windows::named_pipe::NamedPipeClient;

#[derive(Debug)]
pub enum PoolError {
    Spawn(std::io::Error),
    Io(std::io::Error),
    Protocol(String),
    NoSuchUser(String),
}

impl fmt::Display for PoolError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            PoolError::Spawn(e) => write!(f, "failed to spawn impersonated helper: {e}"),
            PoolError::Io(e) => write!(f, "impersonator channel I/O error: {e}"),
            PoolError::Protocol(s) => write!(f, "impersonator protocol error: {s}"),
            PoolError::NoSuchUser(u) => write!(f, "no such OS user: {u}"),
        }
    }
}

impl std::error::Error for PoolError {}

struct Caller {
    // Kept alive only so the helper process is reaped on drop; never read.
    _child: Child,
    stream: BufReader<Channel>,
}

impl Caller {
    async fn send(&mut self, req: &Request) -> Result<Response, PoolError> {
        let mut line = serde_json::to_string(req).map_err(|e| PoolError::Protocol(e.to_string()))?;
        line.push('\n');
        self.stream.write_all(line.as_bytes()).await.map_err(PoolError::Io)?;
        self.stream.flush().await.map_err(PoolError::Io)?;

        let mut buf = String::new();
        let n = self.stream.read_line(&mut buf).await.map_err(PoolError::Io)?;
        if n == 0 {
            return Err(PoolError::Protocol("helper closed the connection".to_string()));
        }

        let wire: WireResponse = serde_json::from_str(buf.trim_end()).map_err(|e| PoolError::Protocol(e.to_string()))?;
        match wire {
            WireResponse::Ok => Ok(Response::Ok),
            WireResponse::Info(i) => Ok(Response::Info(i)),
            WireResponse::Directory(d) => Ok(Response::Directory(d)),
            WireResponse::Error(e) => Ok(Response::Error(e)),
            WireResponse::FileOpened => {
                #[cfg(unix)]
                {
                    let file = super::posix::receive_fd(self.stream.get_ref()).await.map_err(PoolError::Io)?;
                    Ok(Response::File(file))
                }
                #[cfg(windows)]
                {
                    let file = super::windows::receive_handle(self.stream.get_ref()).await.map_err(PoolError::Io)?;
                    Ok(Response::File(file))
                }
            }
        }
    }
}

/// One pool per `(exe, user)` would be wasteful; instead a single pool
/// keeps separate sub-pools of idle callers keyed by the user they're
/// impersonating, up to `max_per_user` each.
pub struct Pool {
    exe: std::path::PathBuf,
    max_per_user: usize,
    idle: Mutex<HashMap<String, VecDeque<Caller>>>,
}

impl Pool {
    pub fn new(exe: impl Into<std::path::PathBuf>, max_per_user: usize) -> Self {
        Self {
            exe: exe.into(),
            max_per_user: max_per_user.max(1),
            idle: Mutex::new(HashMap::new()),
        }
    }

    pub async fn call(&self, user: &str, req: Request) -> Result<Response, PoolError> {
        let mut caller = self.acquire(user).await?;
        let result = caller.send(&req).await;
        if result.is_ok() {
            self.release(user, caller).await;
        }
        result
    }

    async fn acquire(&self, user: &str) -> Result<Caller, PoolError> {
        {
            let mut idle = self.idle.lock().await;
            if let Some(q) = idle.get_mut(user) {
                if let Some(c) = q.pop_front() {
                    return Ok(c);
                }
            }
        }

        let (child, stream) = spawn_impersonated(&self.exe, user).await?;
        Ok(Caller {
            _child: child,
            stream: BufReader::new(stream),
        })
    }

    async fn release(&self, user: &str, caller: Caller) {
        let mut idle = self.idle.lock().await;
        let q = idle.entry(user.to_string()).or_default();
        if q.len() < self.max_per_user {
            q.push_back(caller);
        }
    }
}
