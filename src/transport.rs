//! The transport seam: how a client opens a call and how a server accepts one.
//!
//! The runtime only needs ordered, reliable frame delivery per call; [`MemoryTransport`] provides
//! that in-process over bounded queues, and other transports plug in behind [`Connection`] and
//! [`Listener`].

use std::time::Duration;

use bon::Builder;
use tokio::sync::mpsc;
use tokio::time::Instant;
use tracing::debug;

use crate::call::CallId;
use crate::channel::{self, Endpoint};
use crate::error::RpcError;

/// Metadata sent ahead of any message when a call is opened.
#[derive(Debug, Clone)]
pub struct CallHeader {
    pub call_id: CallId,
    pub operation: String,
    pub deadline: Option<Instant>,
}

/// A call as seen by the server when it is accepted.
#[derive(Debug)]
pub struct IncomingCall {
    pub header: CallHeader,
    pub endpoint: Endpoint,
}

/// A call as seen by the client once it is opened.
#[derive(Debug)]
pub struct CallHandle {
    pub header: CallHeader,
    pub endpoint: Endpoint,
}

/// Client side of a transport.
#[tonic::async_trait]
pub trait Connection: Send + Sync {
    /// Open a new call to `operation`.
    async fn open_call(
        &self,
        operation: &str,
        deadline: Option<Instant>,
    ) -> Result<CallHandle, RpcError>;
}

/// Server side of a transport.
#[tonic::async_trait]
pub trait Listener: Send {
    /// Wait for the next call. Returns `None` once no more calls can arrive.
    async fn accept(&mut self) -> Option<IncomingCall>;
}

/// Configuration for the in-process transport.
#[derive(Debug, Clone, Builder)]
pub struct TransportConfig {
    /// Frames buffered per call direction before the sender suspends.
    #[builder(default = crate::DEFAULT_CHANNEL_CAPACITY)]
    pub channel_capacity: usize,

    /// Calls waiting to be accepted before `open_call` suspends.
    #[builder(default = 64)]
    pub accept_backlog: usize,

    /// How long `open_call` waits for room in the accept backlog.
    #[builder(default = Duration::from_secs(30))]
    pub accept_timeout: Duration,
}

impl Default for TransportConfig {
    fn default() -> Self {
        Self::builder().build()
    }
}

/// In-process [`Connection`]. Cloning yields another connection to the same listener.
#[derive(Debug, Clone)]
pub struct MemoryTransport {
    incoming: mpsc::Sender<IncomingCall>,
    config: TransportConfig,
}

/// In-process [`Listener`] paired with a [`MemoryTransport`].
#[derive(Debug)]
pub struct MemoryListener {
    incoming: mpsc::Receiver<IncomingCall>,
}

/// Create a connected in-process transport and listener.
pub fn memory(config: TransportConfig) -> (MemoryTransport, MemoryListener) {
    let (tx, rx) = mpsc::channel(config.accept_backlog.max(1));
    (
        MemoryTransport {
            incoming: tx,
            config,
        },
        MemoryListener { incoming: rx },
    )
}

#[tonic::async_trait]
impl Connection for MemoryTransport {
    async fn open_call(
        &self,
        operation: &str,
        deadline: Option<Instant>,
    ) -> Result<CallHandle, RpcError> {
        let header = CallHeader {
            call_id: CallId::generate(),
            operation: operation.to_string(),
            deadline,
        };
        let (client, server) = channel::pair(self.config.channel_capacity);

        debug!(
            call_id = %header.call_id,
            operation = %header.operation,
            "Opening call"
        );

        let incoming = IncomingCall {
            header: header.clone(),
            endpoint: server,
        };
        tokio::time::timeout(self.config.accept_timeout, self.incoming.send(incoming))
            .await?
            .map_err(|_| RpcError::ServerClosed)?;

        Ok(CallHandle {
            header,
            endpoint: client,
        })
    }
}

#[tonic::async_trait]
impl Listener for MemoryListener {
    async fn accept(&mut self) -> Option<IncomingCall> {
        self.incoming.recv().await
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn test_open_call_reaches_listener() {
        let (transport, mut listener) = memory(TransportConfig::default());

        let handle = transport.open_call("test.Service/Method", None).await.unwrap();
        let incoming = listener.accept().await.unwrap();

        assert_eq!(incoming.header.call_id, handle.header.call_id);
        assert_eq!(incoming.header.operation, "test.Service/Method");
    }

    #[tokio::test]
    async fn test_call_ids_are_unique() {
        let (transport, _listener) = memory(TransportConfig::default());

        let first = transport.open_call("a/b", None).await.unwrap();
        let second = transport.open_call("a/b", None).await.unwrap();
        assert_ne!(first.header.call_id, second.header.call_id);
    }

    #[tokio::test]
    async fn test_closed_listener_rejects_calls() {
        let (transport, listener) = memory(TransportConfig::default());
        drop(listener);

        let err = transport.open_call("a/b", None).await.unwrap_err();
        assert!(matches!(err, RpcError::ServerClosed));
    }
}
