//! Local control interface for the daemon.
//!
//! JSON-RPC 2.0 over TCP, one request per line. The CLI uses it to show
//! daemon status, drive state, job progress and recent activity, and to
//! edit rules or trigger a manual export while the daemon is running.

pub mod client;
pub mod methods;
mod protocol;
mod transport;

use std::net::SocketAddr;

use tokio_util::sync::CancellationToken;

use crate::context::AppContext;
use transport::Transport;

pub use client::{ClientError, RpcClient};
pub use methods::{DaemonStatus, JobStarted, MethodHandler};
pub use protocol::{Request, Response, RpcError};

pub struct RpcServer {
    transport: Transport,
}

impl RpcServer {
    pub fn new(ctx: AppContext, bind_addr: SocketAddr) -> Self {
        Self {
            transport: Transport::new(bind_addr, MethodHandler::new(ctx)),
        }
    }

    /// Serve until `shutdown` is cancelled.
    pub async fn start(&self, shutdown: CancellationToken) -> anyhow::Result<()> {
        self.transport.listen(shutdown).await
    }
}
