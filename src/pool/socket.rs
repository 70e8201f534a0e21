//! A single pooled TCP connection with buffered, timeout-guarded I/O.

use crate::error::{Result, TransportError};
use crate::types::Endpoint;
use std::time::Duration;
use tokio::io::{AsyncBufReadExt, AsyncReadExt, AsyncWriteExt, BufStream};
use tokio::net::TcpStream;
use tokio::time::timeout;
use tracing::{debug, trace};

/// Upper bound on a single reply line in the text dialect. Anything
/// longer is a framing violation.
const MAX_LINE_LEN: usize = 8 * 1024;

/// A TCP connection owned by one operation at a time.
///
/// Any I/O error, timeout, or framing violation marks the socket broken;
/// a broken socket is closed on release instead of returning to the pool.
pub struct PooledSocket {
    endpoint: Endpoint,
    stream: BufStream<TcpStream>,
    receive_timeout: Duration,
    broken: bool,
}

impl PooledSocket {
    /// Connect to the endpoint within `connection_timeout`. The address
    /// is resolved here, so DNS changes are picked up on reconnect.
    pub(crate) async fn connect(
        endpoint: &Endpoint,
        connection_timeout: Duration,
        receive_timeout: Duration,
    ) -> Result<Self> {
        let addr = endpoint.resolve().await?;
        let stream = timeout(connection_timeout, TcpStream::connect(addr))
            .await
            .map_err(|_| TransportError::ConnectionFailed {
                addr: endpoint.to_string(),
                reason: "connect timed out".to_string(),
            })?
            .map_err(|e| TransportError::ConnectionFailed {
                addr: endpoint.to_string(),
                reason: e.to_string(),
            })?;
        stream.set_nodelay(true).map_err(TransportError::Io)?;
        debug!(endpoint = %endpoint, "socket connected");

        Ok(Self {
            endpoint: endpoint.clone(),
            stream: BufStream::new(stream),
            receive_timeout,
            broken: false,
        })
    }

    /// The endpoint this socket is connected to.
    pub fn endpoint(&self) -> &Endpoint {
        &self.endpoint
    }

    /// Whether the socket has seen an unrecoverable I/O condition.
    pub fn is_broken(&self) -> bool {
        self.broken
    }

    /// Mark the socket unusable. Idempotent.
    pub fn mark_broken(&mut self) {
        if !self.broken {
            trace!(endpoint = %self.endpoint, "socket marked broken");
            self.broken = true;
        }
    }

    /// Buffer outgoing bytes. Call [`flush`](Self::flush) to push the
    /// request onto the wire.
    pub async fn write_all(&mut self, buf: &[u8]) -> Result<()> {
        if let Err(e) = self.stream.write_all(buf).await {
            self.mark_broken();
            return Err(TransportError::Io(e).into());
        }
        Ok(())
    }

    /// Flush buffered writes.
    pub async fn flush(&mut self) -> Result<()> {
        if let Err(e) = self.stream.flush().await {
            self.mark_broken();
            return Err(TransportError::Io(e).into());
        }
        Ok(())
    }

    /// Read exactly `buf.len()` bytes within the receive timeout.
    pub async fn read_exact(&mut self, buf: &mut [u8]) -> Result<()> {
        match timeout(self.receive_timeout, self.stream.read_exact(buf)).await {
            Ok(Ok(_)) => Ok(()),
            Ok(Err(e)) => {
                self.mark_broken();
                if e.kind() == std::io::ErrorKind::UnexpectedEof {
                    Err(TransportError::ConnectionClosed.into())
                } else {
                    Err(TransportError::Io(e).into())
                }
            }
            Err(_) => {
                self.mark_broken();
                Err(TransportError::ReceiveTimeout.into())
            }
        }
    }

    /// Read one CRLF-terminated line within the receive timeout and
    /// return it without the terminator.
    pub async fn read_line(&mut self) -> Result<String> {
        let mut line = Vec::new();
        let read = timeout(
            self.receive_timeout,
            (&mut self.stream).take(MAX_LINE_LEN as u64 + 1).read_until(b'\n', &mut line),
        )
        .await;
        match read {
            Ok(Ok(0)) => {
                self.mark_broken();
                Err(TransportError::ConnectionClosed.into())
            }
            Ok(Ok(_)) => {
                if line.last() != Some(&b'\n') {
                    self.mark_broken();
                    return Err(TransportError::Framing(format!(
                        "unterminated line ({} bytes)",
                        line.len()
                    ))
                    .into());
                }
                line.pop();
                if line.last() == Some(&b'\r') {
                    line.pop();
                }
                String::from_utf8(line).map_err(|_| {
                    self.mark_broken();
                    TransportError::Framing("reply line is not UTF-8".to_string()).into()
                })
            }
            Ok(Err(e)) => {
                self.mark_broken();
                Err(TransportError::Io(e).into())
            }
            Err(_) => {
                self.mark_broken();
                Err(TransportError::ReceiveTimeout.into())
            }
        }
    }
}

impl std::fmt::Debug for PooledSocket {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("PooledSocket")
            .field("endpoint", &self.endpoint)
            .field("broken", &self.broken)
            .finish()
    }
}
