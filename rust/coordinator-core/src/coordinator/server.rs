// rust/coordinator-core/src/coordinator/server.rs

//! TCP front end: one request frame in, at most one reply frame out, then
//! the connection is closed.

use std::future::Future;
use std::net::SocketAddr;
use std::sync::Arc;

use futures::{SinkExt, StreamExt};
use tokio::io::{AsyncRead, AsyncWrite};
use tokio::net::TcpListener;
use tokio::time::timeout;
use tokio_util::codec::Framed;
use tokio_util::task::TaskTracker;
use tracing::{debug, error, info, warn};

use super::dispatch::Dispatcher;
use super::frame::{FrameCodec, FrameError};
use super::registry::GroupRegistry;
use crate::config::{GroupConfig, ServerConfig};
use crate::error::{CoordinatorError, Result};
use crate::retry::{with_backoff, Attempt, Backoff};

/// A bound coordinator listener.
#[derive(Debug)]
pub struct CoordinatorServer {
    listener: TcpListener,
    dispatcher: Dispatcher,
    config: ServerConfig,
}

impl CoordinatorServer {
    /// Bind the listener, retrying with exponential backoff while the
    /// address is unavailable.
    pub async fn bind(server: ServerConfig, groups: &GroupConfig) -> Result<Self> {
        let address = server.bind_address();
        let policy = Backoff::for_binding(&server);

        let listener = with_backoff(&policy, |attempt| {
            let address = address.clone();
            async move {
                match TcpListener::bind(&address).await {
                    Ok(listener) => Attempt::Done(listener),
                    Err(e) => {
                        warn!(%address, attempt, error = %e, "bind failed");
                        Attempt::Again(e)
                    }
                }
            }
        })
        .await
        .map_err(|e| CoordinatorError::io_with_source(&address, "failed to bind listener", e))?;

        let registry = Arc::new(GroupRegistry::new(groups));
        Ok(Self {
            listener,
            dispatcher: Dispatcher::new(registry),
            config: server,
        })
    }

    pub fn local_addr(&self) -> Result<SocketAddr> {
        self.listener
            .local_addr()
            .map_err(|e| CoordinatorError::io_with_source("listener", "no local address", e))
    }

    pub fn registry(&self) -> Arc<GroupRegistry> {
        self.dispatcher.registry().clone()
    }

    /// Serve until the process is killed.
    pub async fn serve(self) -> Result<()> {
        self.serve_with_shutdown(std::future::pending()).await
    }

    /// Serve until `signal` resolves, then stop accepting and wait for
    /// in-flight connections to finish.
    pub async fn serve_with_shutdown<F>(self, signal: F) -> Result<()>
    where
        F: Future<Output = ()>,
    {
        let Self {
            listener,
            dispatcher,
            config,
        } = self;
        let config = Arc::new(config);
        let tracker = TaskTracker::new();

        if let Ok(addr) = listener.local_addr() {
            info!(%addr, "coordinator listening");
        }

        tokio::pin!(signal);
        loop {
            tokio::select! {
                _ = &mut signal => {
                    info!("shutdown requested, no longer accepting connections");
                    break;
                }
                accepted = listener.accept() => match accepted {
                    Ok((stream, peer)) => {
                        let dispatcher = dispatcher.clone();
                        let config = config.clone();
                        tracker.spawn(async move {
                            handle_connection(stream, peer, &dispatcher, &config).await;
                        });
                    }
                    Err(e) => {
                        error!(error = %e, "accept failed");
                    }
                },
            }
        }

        tracker.close();
        if !tracker.is_empty() {
            info!(connections = tracker.len(), "waiting for in-flight connections");
        }
        tracker.wait().await;
        info!("coordinator stopped");
        Ok(())
    }
}

/// Serve a single connection.
///
/// Framing errors and deadline misses close the connection without a
/// reply; they never affect group state.
pub async fn handle_connection<S>(
    stream: S,
    peer: SocketAddr,
    dispatcher: &Dispatcher,
    config: &ServerConfig,
) where
    S: AsyncRead + AsyncWrite + Unpin,
{
    let codec = FrameCodec::with_max_frame_bytes(config.max_frame_bytes);
    let mut framed = Framed::with_capacity(stream, codec, config.blocksize);

    let frame = match timeout(config.read_timeout(), framed.next()).await {
        Ok(Some(Ok(frame))) => frame,
        Ok(Some(Err(e))) => {
            warn!(%peer, error = %e, "dropping connection");
            return;
        }
        Ok(None) => {
            debug!(%peer, "connection closed before a request");
            return;
        }
        Err(_) => {
            warn!(%peer, error = %FrameError::Timeout, "dropping connection");
            return;
        }
    };

    let Some(reply) = dispatcher.dispatch(frame).await else {
        return;
    };

    match timeout(config.write_timeout(), framed.send(reply)).await {
        Ok(Ok(())) => {}
        Ok(Err(e)) => error!(%peer, error = %e, "failed to send reply"),
        Err(_) => warn!(%peer, "timed out sending reply"),
    }
}
