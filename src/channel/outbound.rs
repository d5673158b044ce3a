use std::sync::Arc;

use bytes::Bytes;
use tokio::sync::mpsc::{self, error::TrySendError};
use tracing::debug;

use super::{Frame, Role};
use crate::call::{CallContext, CallOutcome};
use crate::error::RpcError;

/// The sending half of a call.
///
/// Messages are delivered in send order. When the peer's buffer is full, [`send`](Self::send)
/// suspends until space frees up, the call fails, or the deadline passes.
#[derive(Debug)]
pub struct Outbound {
    ctx: Arc<CallContext>,
    tx: mpsc::Sender<Frame>,
    role: Role,
    ended: bool,
}

impl Outbound {
    pub(crate) fn new(ctx: Arc<CallContext>, tx: mpsc::Sender<Frame>, role: Role) -> Self {
        Self {
            ctx,
            tx,
            role,
            ended: false,
        }
    }

    pub fn context(&self) -> &Arc<CallContext> {
        &self.ctx
    }

    pub fn is_ended(&self) -> bool {
        self.ended
    }

    /// Send one message.
    ///
    /// Fails with [`RpcError::ChannelClosed`] once this direction has ended or the call has
    /// finished, and with the recorded status if the call fails while the send is suspended.
    pub async fn send(&mut self, message: Bytes) -> Result<(), RpcError> {
        if self.ended || self.ctx.is_finished() {
            return Err(RpcError::ChannelClosed);
        }

        let lifecycle = self.ctx.advance(self.role.message_sent())?;
        let seq = match self.role {
            Role::Client => lifecycle.requests.seq,
            Role::Server => lifecycle.responses.seq,
        };

        debug!(
            call_id = %self.ctx.call_id(),
            role = ?self.role,
            seq,
            len = message.len(),
            "Sending message"
        );

        self.push(Frame::Message(message)).await
    }

    /// Mark the end of this direction.
    ///
    /// The client side emits an explicit end-of-stream frame. The server side only records the
    /// transition; its end-of-stream travels with the terminal [`close`](Self::close) frame.
    pub async fn finish(&mut self) -> Result<(), RpcError> {
        if self.ended || self.ctx.is_finished() {
            return Err(RpcError::ChannelClosed);
        }

        self.ctx.advance(self.role.end_sent())?;
        self.ended = true;

        debug!(call_id = %self.ctx.call_id(), role = ?self.role, "End of stream");

        match self.role {
            Role::Client => self.push(Frame::End).await,
            Role::Server => Ok(()),
        }
    }

    /// Deliver the terminal status of the call to the peer.
    ///
    /// A failure status is never allowed to stall the caller: if the peer's buffer is full the
    /// frame is handed to a background send.
    pub async fn close(&mut self, outcome: &CallOutcome) {
        self.ended = true;
        let frame = Frame::close(outcome);

        match outcome {
            Ok(()) => {
                let _ = self.tx.send(frame).await;
            }
            Err(_) => {
                if let Err(TrySendError::Full(frame)) = self.tx.try_send(frame) {
                    let tx = self.tx.clone();
                    tokio::spawn(async move {
                        let _ = tx.send(frame).await;
                    });
                }
            }
        }
    }

    async fn push(&mut self, frame: Frame) -> Result<(), RpcError> {
        let sent = self
            .ctx
            .guard(self.tx.send(frame))
            .await
            .map_err(RpcError::Status)?;

        sent.map_err(|_| RpcError::ChannelClosed)
    }
}

impl Drop for Outbound {
    fn drop(&mut self) {
        // A client that walks away from its request stream ends it.
        if self.role == Role::Client && !self.ended && !self.ctx.is_finished() {
            if self.ctx.advance(self.role.end_sent()).is_ok() {
                if let Err(TrySendError::Full(frame)) = self.tx.try_send(Frame::End) {
                    if let Ok(handle) = tokio::runtime::Handle::try_current() {
                        let tx = self.tx.clone();
                        handle.spawn(async move {
                            let _ = tx.send(frame).await;
                        });
                    }
                }
            }
        }
    }
}
