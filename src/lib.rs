pub mod call;
pub mod channel;
pub mod client;
pub mod codec;
pub mod error;
pub mod proto;
pub mod server;
pub mod service;
pub mod state_machine;
pub mod transport;

pub use call::{CallError, CallId, CallShape, CallState, ErrorKind};
pub use client::{CallOptions, ClientConfig, RpcClient};
pub use error::RpcError;
pub use server::{RpcServer, ServerConfig};
pub use service::ServiceConfig;

/// Frames buffered per call direction unless configured otherwise.
pub const DEFAULT_CHANNEL_CAPACITY: usize = 16;
