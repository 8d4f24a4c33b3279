//! JSON-lines service
//!
//! One request object per line in, one response object per line out:
//!
//! ```text
//! → {"code": "pub fn Main() { println(1); }"}
//! ← {"status":200,"body":"Output: 1, Elapsed Time: 0ms, Memory Usage: 12.5 MB"}
//! ```
//!
//! Each request runs on tokio's blocking pool; connections are independent.

use std::future::Future;
use std::io;
use std::net::SocketAddr;
use std::sync::Arc;

use thiserror::Error;
use tokio::io::{AsyncBufRead, AsyncBufReadExt, AsyncReadExt, AsyncWriteExt, BufReader};
use tokio::net::{TcpListener, TcpStream};
use tracing::{debug, info, warn};

use crate::runner::format::{
    internal_fault, Response, STATUS_BAD_REQUEST, STATUS_PAYLOAD_TOO_LARGE,
};
use crate::runner::{CodeRequest, Runner};
use crate::util::config::PlaygroundConfig;

/// Service errors
#[derive(Debug, Error)]
pub enum ServiceError {
    #[error("cannot bind {addr}: {source}")]
    Bind {
        addr: String,
        #[source]
        source: io::Error,
    },

    #[error("I/O error: {0}")]
    Io(#[from] io::Error),
}

/// One line read from a connection
#[derive(Debug, PartialEq, Eq)]
pub(crate) enum RequestLine {
    Line(Vec<u8>),
    TooLong,
    Eof,
}

/// Playground service
#[derive(Debug, Clone)]
pub struct Service {
    runner: Arc<Runner>,
    max_request_bytes: usize,
}

impl Service {
    pub fn new(
        runner: Arc<Runner>,
        max_request_bytes: usize,
    ) -> Self {
        Self {
            runner,
            max_request_bytes,
        }
    }

    pub fn from_config(config: &PlaygroundConfig) -> Self {
        Self::new(
            Arc::new(Runner::from_config(config)),
            config.service.max_request_bytes,
        )
    }

    pub fn runner(&self) -> &Arc<Runner> {
        &self.runner
    }

    /// Bind a listener
    pub async fn bind(addr: &str) -> Result<TcpListener, ServiceError> {
        TcpListener::bind(addr)
            .await
            .map_err(|source| ServiceError::Bind {
                addr: addr.to_string(),
                source,
            })
    }

    /// Accept connections until `shutdown` completes
    pub async fn serve<F>(
        self,
        listener: TcpListener,
        shutdown: F,
    ) -> Result<(), ServiceError>
    where
        F: Future<Output = ()>,
    {
        info!("Listening on {}", listener.local_addr()?);
        tokio::pin!(shutdown);
        loop {
            tokio::select! {
                _ = &mut shutdown => {
                    info!("Shutting down");
                    return Ok(());
                }
                accepted = listener.accept() => {
                    let (stream, peer) = accepted?;
                    let service = self.clone();
                    tokio::spawn(async move {
                        if let Err(e) = service.handle_connection(stream, peer).await {
                            warn!("Connection {} ended with error: {}", peer, e);
                        }
                    });
                }
            }
        }
    }

    async fn handle_connection(
        &self,
        stream: TcpStream,
        peer: SocketAddr,
    ) -> Result<(), ServiceError> {
        debug!("Accepted {}", peer);
        let (read_half, mut write_half) = stream.into_split();
        let mut reader = BufReader::new(read_half);

        loop {
            let response = match read_request_line(&mut reader, self.max_request_bytes).await? {
                RequestLine::Eof => break,
                RequestLine::TooLong => Response::fault(
                    STATUS_PAYLOAD_TOO_LARGE,
                    format!("request exceeds {} bytes", self.max_request_bytes),
                ),
                RequestLine::Line(line) if line.iter().all(u8::is_ascii_whitespace) => continue,
                RequestLine::Line(line) => self.handle_request(&line).await,
            };

            let mut encoded = serde_json::to_vec(&response).map_err(io::Error::from)?;
            encoded.push(b'\n');
            write_half.write_all(&encoded).await?;
        }

        debug!("Closed {}", peer);
        Ok(())
    }

    /// Answer one raw request line
    pub async fn handle_request(
        &self,
        line: &[u8],
    ) -> Response {
        let request: CodeRequest = match serde_json::from_slice(line) {
            Ok(request) => request,
            Err(e) => {
                return Response::fault(STATUS_BAD_REQUEST, format!("malformed request: {}", e))
            }
        };

        let runner = Arc::clone(&self.runner);
        match tokio::task::spawn_blocking(move || runner.compile_and_run(&request)).await {
            Ok(response) => response,
            Err(e) => internal_fault(format!("worker failed: {}", e)),
        }
    }
}

/// Read up to and including `\n`, refusing lines longer than `max` bytes
///
/// The rest of an oversized line is discarded so the next line can be read.
pub(crate) async fn read_request_line<R>(
    reader: &mut R,
    max: usize,
) -> io::Result<RequestLine>
where
    R: AsyncBufRead + Unpin,
{
    let mut line = Vec::new();
    let n = (&mut *reader)
        .take(max as u64 + 1)
        .read_until(b'\n', &mut line)
        .await?;
    if n == 0 {
        return Ok(RequestLine::Eof);
    }
    if line.last() == Some(&b'\n') {
        line.pop();
        if line.last() == Some(&b'\r') {
            line.pop();
        }
        return Ok(RequestLine::Line(line));
    }
    if line.len() <= max {
        // Final line without a terminator
        return Ok(RequestLine::Line(line));
    }

    let mut rest = Vec::new();
    loop {
        rest.clear();
        let n = (&mut *reader)
            .take(64 * 1024)
            .read_until(b'\n', &mut rest)
            .await?;
        if n == 0 || rest.last() == Some(&b'\n') {
            break;
        }
    }
    Ok(RequestLine::TooLong)
}
