//! Client-side types.
//!
//! [`RpcClient`] opens calls over any [`Connection`](crate::transport::Connection) and offers one
//! helper per call shape. Streaming calls hand back a [`CallSender`] and [`CallReceiver`] pair
//! that can be driven from separate tasks.
//!
//! # Example
//!
//! ```ignore
//! let (transport, listener) = transport::memory(TransportConfig::default());
//! let client = RpcClient::new(transport, ClientConfig::default());
//!
//! let response: SumResponse = client
//!     .unary("calculator.SumService/SumData", &request, CallOptions::default())
//!     .await?;
//! ```

mod config;
mod connection;
mod rpc_client;

pub use config::{CallOptions, ClientConfig};
pub use connection::{CallReceiver, CallSender, ClientStreamingCall, RpcCall};
pub use rpc_client::RpcClient;
