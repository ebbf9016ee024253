//! TCP transport: newline-delimited JSON, one task per connection.

use std::net::SocketAddr;
use std::sync::Arc;

use tokio::io::{AsyncBufReadExt, AsyncReadExt, AsyncWriteExt, BufReader};
use tokio::net::{TcpListener, TcpStream};
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info, warn};

use super::methods::MethodHandler;
use super::protocol::{Request, Response};

/// Upper bound on a single request line.
const MAX_LINE_BYTES: usize = 64 * 1024;

pub struct Transport {
    bind_addr: SocketAddr,
    handler: Arc<MethodHandler>,
}

impl Transport {
    pub fn new(bind_addr: SocketAddr, handler: MethodHandler) -> Self {
        Self {
            bind_addr,
            handler: Arc::new(handler),
        }
    }

    /// Accept connections until `shutdown` is cancelled.
    pub async fn listen(&self, shutdown: CancellationToken) -> anyhow::Result<()> {
        let listener = TcpListener::bind(self.bind_addr).await?;
        info!(addr = %self.bind_addr, "RPC server listening");

        loop {
            tokio::select! {
                accept_result = listener.accept() => match accept_result {
                    Ok((stream, peer_addr)) => {
                        debug!(peer = %peer_addr, "Client connected");
                        let handler = self.handler.clone();
                        let shutdown = shutdown.clone();
                        tokio::spawn(async move {
                            tokio::select! {
                                result = handle_connection(stream, peer_addr, handler) => {
                                    if let Err(e) = result {
                                        debug!(peer = %peer_addr, error = %e, "Connection error");
                                    }
                                }
                                _ = shutdown.cancelled() => {}
                            }
                            debug!(peer = %peer_addr, "Client disconnected");
                        });
                    }
                    Err(e) => error!(error = %e, "Failed to accept connection"),
                },
                _ = shutdown.cancelled() => {
                    info!("RPC server shutting down");
                    break;
                }
            }
        }

        Ok(())
    }
}

async fn handle_connection(
    stream: TcpStream,
    peer_addr: SocketAddr,
    handler: Arc<MethodHandler>,
) -> anyhow::Result<()> {
    let (reader, mut writer) = stream.into_split();
    let mut reader = BufReader::new(reader);
    let mut line = String::new();

    loop {
        line.clear();
        // One byte past the limit is enough to know the line is too long
        let bytes_read = (&mut reader)
            .take(MAX_LINE_BYTES as u64 + 1)
            .read_line(&mut line)
            .await?;
        if bytes_read == 0 {
            break;
        }
        if line.len() > MAX_LINE_BYTES {
            warn!(peer = %peer_addr, limit = MAX_LINE_BYTES, "Request too large, closing connection");
            break;
        }

        let trimmed = line.trim();
        if trimmed.is_empty() {
            continue;
        }

        let response = match serde_json::from_str::<Request>(trimmed) {
            Ok(request) => match request.validate() {
                Err(msg) => {
                    warn!(peer = %peer_addr, error = msg, "Invalid request");
                    Response::invalid_request(request.id.clone().unwrap_or_default(), msg)
                }
                Ok(()) if request.is_notification() => {
                    debug!(peer = %peer_addr, method = %request.method, "Notification received");
                    handler.handle(request).await;
                    continue;
                }
                Ok(()) => handler.handle(request).await,
            },
            Err(e) => {
                warn!(peer = %peer_addr, error = %e, "Parse error");
                Response::parse_error()
            }
        };

        let mut response_json = serde_json::to_string(&response)?;
        response_json.push('\n');
        writer.write_all(response_json.as_bytes()).await?;
    }

    Ok(())
}
