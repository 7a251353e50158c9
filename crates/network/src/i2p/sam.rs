//! SAM v3 client plumbing.
//!
//! The SAM bridge speaks a line-oriented text protocol over a local TCP
//! socket; every command is answered by a single `\n`-terminated line.

use std::collections::HashMap;
use std::time::Duration;

use tokio::io::{AsyncReadExt, AsyncWriteExt};
use tokio::net::TcpStream;
use tokio::time::timeout;

use crate::error::{NetworkError, NetworkResult};

/// Version range we negotiate
pub const HELLO: &str = "HELLO VERSION MIN=3.0 MAX=3.3\n";

/// A SAM control or data socket with its read buffer. Bytes read past a
/// reply line are kept; once a `STREAM` command succeeds they belong to
/// the peer stream and travel along via [`SamStream::into_parts`].
pub struct SamStream {
    stream: TcpStream,
    buf: Vec<u8>,
}

impl SamStream {
    /// Connects to the SAM bridge.
    pub async fn connect(host: &str, port: u16) -> NetworkResult<Self> {
        let stream = timeout(Duration::from_secs(10), TcpStream::connect((host, port)))
            .await
            .map_err(|_| NetworkError::sam("timed out connecting to the SAM bridge"))?
            .map_err(|e| NetworkError::sam(format!("cannot reach the SAM bridge: {}", e)))?;
        Ok(Self {
            stream,
            buf: Vec::new(),
        })
    }

    /// Sends one command line.
    pub async fn send_line(&mut self, line: &str) -> NetworkResult<()> {
        self.stream
            .write_all(line.as_bytes())
            .await
            .map_err(|e| NetworkError::sam(format!("write failed: {}", e)))
    }

    /// Reads one `\n`-terminated line, waiting up to `wait` for it.
    pub async fn read_line(&mut self, wait: Duration) -> NetworkResult<String> {
        let deadline = tokio::time::Instant::now() + wait;
        loop {
            if let Some(pos) = self.buf.iter().position(|&b| b == b'\n') {
                let line: Vec<u8> = self.buf.drain(..=pos).collect();
                let text = String::from_utf8_lossy(&line[..line.len() - 1]).into_owned();
                return Ok(text.trim_end_matches('\r').to_string());
            }
            let mut chunk = [0u8; 4096];
            let n = match timeout_at(deadline, self.stream.read(&mut chunk)).await {
                Some(Ok(n)) => n,
                Some(Err(e)) => return Err(NetworkError::sam(format!("read failed: {}", e))),
                None => return Err(NetworkError::sam("timed out waiting for a reply")),
            };
            if n == 0 {
                return Err(NetworkError::sam("bridge closed the connection"));
            }
            self.buf.extend_from_slice(&chunk[..n]);
        }
    }

    /// Performs the HELLO exchange.
    pub async fn hello(&mut self) -> NetworkResult<()> {
        self.send_line(HELLO).await?;
        let reply = self.read_line(Duration::from_secs(10)).await?;
        expect_ok(&reply)
    }

    /// Releases the socket and whatever bytes were buffered past the last
    /// reply line.
    pub fn into_parts(self) -> (TcpStream, Vec<u8>) {
        (self.stream, self.buf)
    }
}

async fn timeout_at<F: std::future::Future>(
    deadline: tokio::time::Instant,
    fut: F,
) -> Option<F::Output> {
    tokio::time::timeout_at(deadline, fut).await.ok()
}

/// Splits a SAM reply line into its key=value pairs.
pub fn parse_reply(line: &str) -> HashMap<String, String> {
    let mut out = HashMap::new();
    for token in line.split_whitespace() {
        if let Some((key, value)) = token.split_once('=') {
            out.insert(key.to_string(), value.to_string());
        }
    }
    out
}

/// Fails unless the reply carries `RESULT=OK`.
pub fn expect_ok(line: &str) -> NetworkResult<()> {
    let fields = parse_reply(line);
    match fields.get("RESULT").map(String::as_str) {
        Some("OK") => Ok(()),
        Some(other) => Err(NetworkError::sam(format!("bridge answered {}", other))),
        None => Err(NetworkError::sam(format!("unexpected reply: {}", line))),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_parse_reply() {
        let fields = parse_reply("SESSION STATUS RESULT=OK DESTINATION=abcd");
        assert_eq!(fields.get("RESULT").map(String::as_str), Some("OK"));
        assert_eq!(fields.get("DESTINATION").map(String::as_str), Some("abcd"));
        assert!(!fields.contains_key("SESSION"));
    }

    #[test]
    fn test_expect_ok() {
        assert!(expect_ok("HELLO REPLY RESULT=OK VERSION=3.3").is_ok());
        assert!(expect_ok("HELLO REPLY RESULT=NOVERSION").is_err());
        assert!(expect_ok("garbage").is_err());
    }
}
