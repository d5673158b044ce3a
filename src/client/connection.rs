use std::marker::PhantomData;
use std::sync::Arc;

use futures::Stream;
use prost::Message;

use crate::call::{CallContext, CallError, CallId, CallOutcome};
use crate::channel::{Inbound, Outbound};
use crate::codec::{decode, encode};
use crate::error::RpcError;

/// An open call with both halves held together.
///
/// Use [`split`](Self::split) to drive sending and receiving from separate tasks.
#[derive(Debug)]
pub struct RpcCall<Req, Resp> {
    sender: CallSender<Req>,
    receiver: CallReceiver<Resp>,
}

impl<Req, Resp> RpcCall<Req, Resp>
where
    Req: Message + Send + 'static,
    Resp: Message + Default + Send + 'static,
{
    pub(crate) fn new(outbound: Outbound, inbound: Inbound) -> Self {
        Self {
            sender: CallSender::new(outbound),
            receiver: CallReceiver::new(inbound),
        }
    }

    pub fn call_id(&self) -> &CallId {
        self.sender.call_id()
    }

    pub fn context(&self) -> &Arc<CallContext> {
        self.sender.context()
    }

    /// Send one request. If the server has already ended the call, the error is its status.
    pub async fn send(&mut self, request: &Req) -> Result<(), RpcError> {
        match self.sender.send(request).await {
            Ok(()) => Ok(()),
            Err(err) => Err(self.receiver.explain(err).await),
        }
    }

    pub async fn finish(&mut self) -> Result<(), RpcError> {
        match self.sender.finish().await {
            Ok(()) => Ok(()),
            Err(err) => Err(self.receiver.explain(err).await),
        }
    }

    pub async fn message(&mut self) -> Result<Option<Resp>, RpcError> {
        self.receiver.message().await
    }

    pub fn cancel(&self) -> bool {
        self.sender.cancel()
    }

    pub fn split(self) -> (CallSender<Req>, CallReceiver<Resp>) {
        (self.sender, self.receiver)
    }
}

/// The request half of a call.
#[derive(Debug)]
pub struct CallSender<Req> {
    outbound: Outbound,
    _marker: PhantomData<fn(Req)>,
}

impl<Req: Message + Send + 'static> CallSender<Req> {
    pub(crate) fn new(outbound: Outbound) -> Self {
        Self {
            outbound,
            _marker: PhantomData,
        }
    }

    pub fn call_id(&self) -> &CallId {
        self.outbound.context().call_id()
    }

    pub fn context(&self) -> &Arc<CallContext> {
        self.outbound.context()
    }

    /// Send one request, suspending while the server's buffer is full.
    ///
    /// Fails with [`RpcError::ChannelClosed`] once the server has stopped reading; the status it
    /// ended the call with is then waiting on the [`CallReceiver`].
    pub async fn send(&mut self, request: &Req) -> Result<(), RpcError> {
        self.outbound.send(encode(request)).await
    }

    /// End the request stream.
    pub async fn finish(&mut self) -> Result<(), RpcError> {
        self.outbound.finish().await
    }

    /// Cancel the whole call. Returns `true` if this moved the call to `Failed`.
    pub fn cancel(&self) -> bool {
        self.outbound.context().request_cancel()
    }
}

/// The response half of a call.
///
/// Dropping a receiver before the call has finished cancels the call.
#[derive(Debug)]
pub struct CallReceiver<Resp> {
    inbound: Inbound,
    _marker: PhantomData<fn() -> Resp>,
}

impl<Resp: Message + Default + Send + 'static> CallReceiver<Resp> {
    pub(crate) fn new(inbound: Inbound) -> Self {
        Self {
            inbound,
            _marker: PhantomData,
        }
    }

    pub fn call_id(&self) -> &CallId {
        self.inbound.context().call_id()
    }

    pub fn context(&self) -> &Arc<CallContext> {
        self.inbound.context()
    }

    /// Receive the next response.
    ///
    /// Returns `Ok(None)` once the server has finished successfully. A failed call yields its
    /// status as [`RpcError::Status`] after any responses sent before the failure.
    pub async fn message(&mut self) -> Result<Option<Resp>, RpcError> {
        match self.inbound.receive().await? {
            Some(bytes) => Ok(Some(decode(&bytes)?)),
            None => Ok(None),
        }
    }

    /// Turn the receiver into a stream of responses that ends with the call.
    pub fn into_stream(self) -> impl Stream<Item = Result<Resp, RpcError>> + Send {
        let mut receiver = self;
        async_stream::try_stream! {
            while let Some(response) = receiver.message().await? {
                yield response;
            }
        }
    }

    /// Cancel the whole call. Returns `true` if this moved the call to `Failed`.
    pub fn cancel(&self) -> bool {
        self.inbound.context().request_cancel()
    }

    /// The final status, once recorded.
    pub fn outcome(&self) -> Option<CallOutcome> {
        self.inbound.context().outcome()
    }

    /// Drain any remaining responses and return the final status of the call.
    pub async fn finished(mut self) -> CallOutcome {
        loop {
            match self.message().await {
                Ok(Some(_)) => continue,
                Ok(None) => break,
                Err(err) => return Err(CallError::from(err)),
            }
        }
        self.inbound.context().finished().await
    }

    /// Map a failed send to the status the server reported, if it reported one.
    ///
    /// A send only fails with [`RpcError::ChannelClosed`] when the server stopped reading, in
    /// which case its terminal status is waiting on this half.
    pub(crate) async fn explain(&mut self, err: RpcError) -> RpcError {
        if !matches!(err, RpcError::ChannelClosed) {
            return err;
        }

        loop {
            match self.message().await {
                Ok(Some(_)) => continue,
                Ok(None) => break,
                Err(status) => return status,
            }
        }

        // The status may already have been read by an earlier call.
        match self.inbound.context().failure() {
            Some(status) => RpcError::Status(status),
            None => err,
        }
    }
}

impl<Resp> Drop for CallReceiver<Resp> {
    fn drop(&mut self) {
        let ctx = self.inbound.context();
        if !ctx.is_finished() {
            ctx.request_cancel();
        }
    }
}

/// A call whose requests are streamed and whose single response arrives at the end.
#[derive(Debug)]
pub struct ClientStreamingCall<Req, Resp> {
    sender: CallSender<Req>,
    receiver: CallReceiver<Resp>,
}

impl<Req, Resp> ClientStreamingCall<Req, Resp>
where
    Req: Message + Send + 'static,
    Resp: Message + Default + Send + 'static,
{
    pub(crate) fn new(call: RpcCall<Req, Resp>) -> Self {
        let (sender, receiver) = call.split();
        Self { sender, receiver }
    }

    pub fn call_id(&self) -> &CallId {
        self.sender.call_id()
    }

    pub async fn send(&mut self, request: &Req) -> Result<(), RpcError> {
        match self.sender.send(request).await {
            Ok(()) => Ok(()),
            Err(err) => Err(self.receiver.explain(err).await),
        }
    }

    pub fn cancel(&self) -> bool {
        self.sender.cancel()
    }

    /// End the request stream and wait for the response.
    pub async fn close_and_receive(self) -> Result<Resp, RpcError> {
        let Self {
            mut sender,
            mut receiver,
        } = self;

        if let Err(err) = sender.finish().await {
            return Err(receiver.explain(err).await);
        }
        single_response(&mut receiver).await
    }
}

/// Read exactly one response followed by the successful end of the call.
pub(crate) async fn single_response<Resp>(
    receiver: &mut CallReceiver<Resp>,
) -> Result<Resp, RpcError>
where
    Resp: Message + Default + Send + 'static,
{
    let response = receiver
        .message()
        .await?
        .ok_or_else(|| RpcError::Status(CallError::internal("missing response message")))?;

    match receiver.message().await? {
        None => Ok(response),
        Some(_) => {
            let err = CallError::internal("expected a single response message");
            receiver.context().fail(err.clone());
            Err(RpcError::Status(err))
        }
    }
}
