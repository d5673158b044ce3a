use std::sync::Arc;

use bytes::Bytes;
use tokio::sync::mpsc;
use tracing::debug;

use super::{Frame, Role};
use crate::call::{CallContext, CallError, IllegalTransition};
use crate::error::RpcError;

/// The receiving half of a call.
#[derive(Debug)]
pub struct Inbound {
    ctx: Arc<CallContext>,
    rx: mpsc::Receiver<Frame>,
    role: Role,
    ended: bool,
}

impl Inbound {
    pub(crate) fn new(ctx: Arc<CallContext>, rx: mpsc::Receiver<Frame>, role: Role) -> Self {
        Self {
            ctx,
            rx,
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

    /// Receive the next message, suspending until one arrives.
    ///
    /// Returns `Ok(None)` once the peer has ended this direction, and keeps returning it
    /// afterwards. Returns the recorded status as soon as the call fails.
    pub async fn receive(&mut self) -> Result<Option<Bytes>, RpcError> {
        if self.ended {
            return Ok(None);
        }

        let frame = self
            .ctx
            .guard(self.rx.recv())
            .await
            .map_err(RpcError::Status)?;

        match frame {
            Some(Frame::Message(message)) => {
                let lifecycle = self
                    .ctx
                    .advance(self.role.message_received())
                    .map_err(|err| self.violation(err))?;
                let seq = match self.role {
                    Role::Client => lifecycle.responses.seq,
                    Role::Server => lifecycle.requests.seq,
                };

                debug!(
                    call_id = %self.ctx.call_id(),
                    role = ?self.role,
                    seq,
                    len = message.len(),
                    "Received message"
                );
                Ok(Some(message))
            }

            Some(Frame::End) => {
                self.end()?;
                Ok(None)
            }

            Some(Frame::Close { code, message }) => match Frame::close_outcome(code, message) {
                Ok(()) => {
                    self.end()?;
                    if self.role == Role::Client {
                        let _ = self.ctx.complete();
                    }
                    Ok(None)
                }
                Err(err) => {
                    self.ended = true;
                    Err(self.fail(err))
                }
            },

            None => {
                self.ended = true;
                Err(self.fail(CallError::internal("connection closed")))
            }
        }
    }

    fn end(&mut self) -> Result<(), RpcError> {
        self.ended = true;
        debug!(call_id = %self.ctx.call_id(), role = ?self.role, "Peer ended stream");

        self.ctx
            .advance(self.role.end_received())
            .map_err(|err| self.violation(err))?;
        Ok(())
    }

    fn fail(&self, err: CallError) -> RpcError {
        self.ctx.fail(err.clone());
        RpcError::Status(self.ctx.failure().unwrap_or(err))
    }

    fn violation(&self, err: IllegalTransition) -> RpcError {
        self.ctx
            .fail(CallError::internal(format!("protocol violation: {err}")));
        RpcError::Lifecycle(err)
    }
}
