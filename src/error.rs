use thiserror::Error;

use crate::call::{CallError, ErrorKind, IllegalTransition};

/// Errors that can occur in the call runtime.
#[derive(Debug, Error)]
pub enum RpcError {
    /// The direction already emitted end-of-stream, the call already finished, or the peer went
    /// away.
    #[error("call channel closed")]
    ChannelClosed,

    /// The call finished with a failure status.
    #[error("call failed with {0}")]
    Status(#[from] CallError),

    /// A message or end-of-stream marker the call shape does not allow.
    #[error("illegal call transition")]
    Lifecycle(#[from] IllegalTransition),

    /// Failed to decode a protobuf message.
    #[error("protobuf decode error")]
    Decode(#[from] prost::DecodeError),

    /// No handler registered for the operation.
    #[error("no handler registered for '{0}'")]
    NoHandler(String),

    /// A handler is already registered for the operation.
    #[error("a handler is already registered for '{0}'")]
    DuplicateHandler(String),

    /// The server is no longer accepting calls.
    #[error("server closed")]
    ServerClosed,

    /// Timeout waiting for the server to accept a call.
    #[error("timeout waiting for the server to accept the call")]
    Timeout(#[from] tokio::time::error::Elapsed),
}

impl RpcError {
    /// The error kind this error surfaces as on a call.
    pub fn kind(&self) -> ErrorKind {
        match self {
            RpcError::Status(err) => err.kind,
            RpcError::NoHandler(_) => ErrorKind::Unimplemented,
            RpcError::Timeout(_) => ErrorKind::DeadlineExceeded,
            _ => ErrorKind::Internal,
        }
    }
}

impl From<RpcError> for CallError {
    fn from(err: RpcError) -> Self {
        match err {
            RpcError::Status(err) => err,
            other => CallError::new(other.kind(), other.to_string()),
        }
    }
}
