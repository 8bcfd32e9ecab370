//! Socket client for the tabtrack reporter.
//!
//! One request per connection. Deferred actions answer with a `pending` line
//! first; the client keeps reading until the final line arrives.

use serde::Serialize;
use std::env;
use std::io::{self, BufRead, BufReader, Write};
use std::os::unix::net::UnixStream;
use std::path::PathBuf;
use std::time::Duration;
use tabtrack_protocol::{
    ControlRequest, ErrorInfo, PlatformNotification, Response, MAX_REQUEST_BYTES,
};

const SOCKET_ENV: &str = "TABTRACK_SOCKET";
const SOCKET_NAME: &str = "reporter.sock";
const READ_TIMEOUT_SECS: u64 = 15;
const WRITE_TIMEOUT_SECS: u64 = 2;

#[derive(Debug, thiserror::Error)]
pub enum ClientError {
    #[error("Home directory not found")]
    HomeNotFound,

    #[error("Failed to connect to reporter socket {path}: {source}")]
    Connect {
        path: PathBuf,
        #[source]
        source: io::Error,
    },

    #[error("Failed to serialize request: {0}")]
    Serialize(#[source] serde_json::Error),

    #[error("Failed to write request: {0}")]
    Write(#[source] io::Error),

    #[error("Failed to read response: {0}")]
    Read(#[source] io::Error),

    #[error("Timed out waiting for reporter response")]
    Timeout,

    #[error("Response exceeded maximum size")]
    TooLarge,

    #[error("Failed to parse response JSON: {0}")]
    Parse(#[source] serde_json::Error),

    #[error("Reporter closed the connection without answering")]
    NoResponse,

    #[error("Reporter rejected the request: {0}")]
    Rejected(ErrorInfo),
}

pub struct Client {
    socket: PathBuf,
    read_timeout: Duration,
}

impl Client {
    pub fn new(socket: PathBuf) -> Self {
        Self {
            socket,
            read_timeout: Duration::from_secs(READ_TIMEOUT_SECS),
        }
    }

    /// Uses `TABTRACK_SOCKET` when set, `~/.tabtrack/reporter.sock` otherwise.
    pub fn from_env() -> Result<Self, ClientError> {
        if let Ok(path) = env::var(SOCKET_ENV) {
            return Ok(Self::new(PathBuf::from(path)));
        }
        let home = dirs::home_dir().ok_or(ClientError::HomeNotFound)?;
        Ok(Self::new(home.join(".tabtrack").join(SOCKET_NAME)))
    }

    #[cfg(test)]
    fn with_read_timeout(mut self, timeout: Duration) -> Self {
        self.read_timeout = timeout;
        self
    }

    pub fn control(&self, request: &ControlRequest) -> Result<Response, ClientError> {
        tracing::debug!(action = %request.action, id = ?request.id, "Sending control request");
        self.send(request)
    }

    pub fn notify(&self, notification: &PlatformNotification) -> Result<Response, ClientError> {
        tracing::debug!(event = notification.kind(), "Forwarding platform notification");
        self.send(notification)
    }

    fn send<T: Serialize>(&self, message: &T) -> Result<Response, ClientError> {
        let mut payload = serde_json::to_vec(message).map_err(ClientError::Serialize)?;
        payload.push(b'\n');

        let mut stream =
            UnixStream::connect(&self.socket).map_err(|source| ClientError::Connect {
                path: self.socket.clone(),
                source,
            })?;
        let _ = stream.set_read_timeout(Some(self.read_timeout));
        let _ = stream.set_write_timeout(Some(Duration::from_secs(WRITE_TIMEOUT_SECS)));

        stream.write_all(&payload).map_err(ClientError::Write)?;
        stream.flush().map_err(ClientError::Write)?;

        let mut reader = BufReader::new(stream);
        loop {
            let response = read_response(&mut reader)?;
            if response.pending {
                tracing::debug!(id = ?response.id, "Reporter acknowledged; awaiting answer");
                continue;
            }
            if !response.ok {
                let error = response
                    .error
                    .unwrap_or_else(|| ErrorInfo::new("unknown", "reporter returned no error"));
                return Err(ClientError::Rejected(error));
            }
            return Ok(response);
        }
    }
}

fn read_response(reader: &mut BufReader<UnixStream>) -> Result<Response, ClientError> {
    let mut line = String::new();
    loop {
        line.clear();
        match reader.read_line(&mut line) {
            Ok(0) => return Err(ClientError::NoResponse),
            Ok(_) => {}
            Err(err)
                if matches!(
                    err.kind(),
                    io::ErrorKind::WouldBlock | io::ErrorKind::TimedOut
                ) =>
            {
                return Err(ClientError::Timeout);
            }
            Err(err) => return Err(ClientError::Read(err)),
        }

        if line.len() > MAX_REQUEST_BYTES {
            return Err(ClientError::TooLarge);
        }
        if !line.trim().is_empty() {
            return serde_json::from_str(line.trim()).map_err(ClientError::Parse);
        }
    }
}
