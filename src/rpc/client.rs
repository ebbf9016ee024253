//! Client side of the daemon's RPC interface, used by the CLI.

use std::net::SocketAddr;
use std::sync::atomic::{AtomicU64, Ordering};
use std::time::Duration;

use serde::de::DeserializeOwned;
use serde_json::{Value, json};
use thiserror::Error;
use tokio::io::{AsyncBufReadExt, AsyncWriteExt, BufReader};
use tokio::net::TcpStream;
use tokio::time::timeout;

use super::methods::{DaemonStatus, JobStarted};
use super::protocol::{Request, Response, RpcError};
use crate::core::{DriveState, JobRecord};
use crate::logging::ActivityEntry;

const CALL_TIMEOUT: Duration = Duration::from_secs(5);

#[derive(Debug, Error)]
pub enum ClientError {
    #[error("failed to connect to daemon: {0}")]
    Connect(std::io::Error),
    #[error("communication error: {0}")]
    Io(#[from] std::io::Error),
    #[error("daemon did not answer within {0:?}")]
    Timeout(Duration),
    #[error("failed to encode or decode message: {0}")]
    Codec(#[from] serde_json::Error),
    #[error("daemon closed the connection")]
    Closed,
    #[error("RPC error {}: {}", .0.code, .0.message)]
    Rpc(RpcError),
}

/// RPC client for communicating with the daemon.
pub struct RpcClient {
    addr: SocketAddr,
    next_id: AtomicU64,
}

impl RpcClient {
    pub fn new(addr: SocketAddr) -> Self {
        Self {
            addr,
            next_id: AtomicU64::new(1),
        }
    }

    /// Call an RPC method and decode its result.
    pub async fn call<T: DeserializeOwned>(
        &self,
        method: &str,
        params: Option<Value>,
    ) -> Result<T, ClientError> {
        let id = self.next_id.fetch_add(1, Ordering::Relaxed);
        let request = Request::new(method, params, id);

        timeout(CALL_TIMEOUT, self.round_trip(&request))
            .await
            .map_err(|_| ClientError::Timeout(CALL_TIMEOUT))?
    }

    async fn round_trip<T: DeserializeOwned>(&self, request: &Request) -> Result<T, ClientError> {
        let mut stream = TcpStream::connect(self.addr)
            .await
            .map_err(ClientError::Connect)?;

        let mut request_json = serde_json::to_string(request)?;
        request_json.push('\n');
        stream.write_all(request_json.as_bytes()).await?;

        let mut reader = BufReader::new(stream);
        let mut response_line = String::new();
        if reader.read_line(&mut response_line).await? == 0 {
            return Err(ClientError::Closed);
        }

        let response: Response = serde_json::from_str(&response_line)?;
        if let Some(error) = response.error {
            return Err(ClientError::Rpc(error));
        }

        Ok(serde_json::from_value(response.result.unwrap_or(Value::Null))?)
    }

    pub async fn daemon_status(&self) -> Result<DaemonStatus, ClientError> {
        self.call("daemon.status", None).await
    }

    pub async fn drives(&self) -> Result<Vec<DriveState>, ClientError> {
        self.call("drives.state", None).await
    }

    pub async fn active_jobs(&self) -> Result<Vec<JobRecord>, ClientError> {
        self.call("progress.active", None).await
    }

    pub async fn recent_jobs(&self) -> Result<Vec<JobRecord>, ClientError> {
        self.call("jobs.recent", None).await
    }

    pub async fn recent_log(&self, limit: usize) -> Result<Vec<ActivityEntry>, ClientError> {
        self.call("log.recent", Some(json!({ "limit": limit }))).await
    }

    pub async fn run_export(&self, index: usize) -> Result<JobStarted, ClientError> {
        self.call("export.run", Some(json!({ "index": index }))).await
    }
}
