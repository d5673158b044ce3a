use std::sync::Arc;

use prost::Message;
use tracing::{debug, info};

use crate::call::{CallContext, CallShape};
use crate::channel::{self, Role};
use crate::client::config::{CallOptions, ClientConfig};
use crate::client::connection::{
    CallReceiver, CallSender, ClientStreamingCall, RpcCall, single_response,
};
use crate::error::RpcError;
use crate::transport::Connection;

/// An RPC client that opens calls over a [`Connection`].
///
/// The client handles:
/// - Computing the call deadline from the configured and per-call timeouts
/// - Forwarding local cancellation and deadline expiry to the server
/// - Encoding and decoding protobuf messages
///
/// # Example
///
/// ```ignore
/// let client = RpcClient::new(transport, ClientConfig::default());
///
/// let mut call = client
///     .bidi_streaming::<FindMaximumRequest, FindMaximumResponse>(
///         "calculator.SumService/FindMaximum",
///         CallOptions::default(),
///     )
///     .await?;
///
/// let (mut sender, mut receiver) = call.split();
/// sender.send(&FindMaximumRequest { number: 3 }).await?;
/// sender.finish().await?;
///
/// while let Some(response) = receiver.message().await? {
///     println!("new maximum: {}", response.maximum);
/// }
/// ```
pub struct RpcClient<C> {
    connection: C,
    config: ClientConfig,
}

impl<C: Connection> RpcClient<C> {
    pub fn new(connection: C, config: ClientConfig) -> Self {
        Self { connection, config }
    }

    /// Open a call of the given shape without sending anything yet.
    pub async fn open<Req, Resp>(
        &self,
        operation: &str,
        shape: CallShape,
        options: &CallOptions,
    ) -> Result<RpcCall<Req, Resp>, RpcError>
    where
        Req: Message + Send + 'static,
        Resp: Message + Default + Send + 'static,
    {
        let deadline = options.deadline(&self.config);
        let handle = self.connection.open_call(operation, deadline).await?;

        let ctx = Arc::new(CallContext::new(
            handle.header.call_id,
            handle.header.operation,
            shape,
            handle.header.deadline,
        ));
        channel::propagate_failure(Arc::clone(&ctx), handle.endpoint.reset_signal());

        info!(
            client_id = %self.config.client_id,
            call_id = %ctx.call_id(),
            operation = %ctx.operation(),
            shape = %shape,
            "Opened call"
        );

        let (outbound, inbound) = handle.endpoint.bind(ctx, Role::Client);
        Ok(RpcCall::new(outbound, inbound))
    }

    /// Send one request and wait for its single response.
    pub async fn unary<Req, Resp>(
        &self,
        operation: &str,
        request: &Req,
        options: CallOptions,
    ) -> Result<Resp, RpcError>
    where
        Req: Message + Send + 'static,
        Resp: Message + Default + Send + 'static,
    {
        let call = self.open(operation, CallShape::Unary, &options).await?;
        let (mut sender, mut receiver) = call.split();

        if let Err(err) = send_only(&mut sender, request).await {
            return Err(receiver.explain(err).await);
        }

        let response = single_response(&mut receiver).await?;
        debug!(call_id = %receiver.call_id(), "Unary call completed");
        Ok(response)
    }

    /// Send one request and return the stream of responses.
    pub async fn server_streaming<Req, Resp>(
        &self,
        operation: &str,
        request: &Req,
        options: CallOptions,
    ) -> Result<CallReceiver<Resp>, RpcError>
    where
        Req: Message + Send + 'static,
        Resp: Message + Default + Send + 'static,
    {
        let call = self
            .open(operation, CallShape::ServerStream, &options)
            .await?;
        let (mut sender, mut receiver) = call.split();

        if let Err(err) = send_only(&mut sender, request).await {
            return Err(receiver.explain(err).await);
        }
        Ok(receiver)
    }

    /// Open a call that streams requests and receives a single response at the end.
    pub async fn client_streaming<Req, Resp>(
        &self,
        operation: &str,
        options: CallOptions,
    ) -> Result<ClientStreamingCall<Req, Resp>, RpcError>
    where
        Req: Message + Send + 'static,
        Resp: Message + Default + Send + 'static,
    {
        let call = self
            .open(operation, CallShape::ClientStream, &options)
            .await?;
        Ok(ClientStreamingCall::new(call))
    }

    /// Open a call where requests and responses stream independently.
    pub async fn bidi_streaming<Req, Resp>(
        &self,
        operation: &str,
        options: CallOptions,
    ) -> Result<RpcCall<Req, Resp>, RpcError>
    where
        Req: Message + Send + 'static,
        Resp: Message + Default + Send + 'static,
    {
        self.open(operation, CallShape::BidiStream, &options).await
    }

    pub fn client_id(&self) -> &str {
        &self.config.client_id
    }

    pub fn config(&self) -> &ClientConfig {
        &self.config
    }
}

async fn send_only<Req: Message + Send + 'static>(
    sender: &mut CallSender<Req>,
    request: &Req,
) -> Result<(), RpcError> {
    sender.send(request).await?;
    sender.finish().await
}
