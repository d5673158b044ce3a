//! The message channel: an ordered, reliable, bounded pipe of frames in each direction of a
//! call, plus the call-scoped halves that enforce end-of-stream, failure and deadline semantics.
//!
//! A call is carried by two [`Endpoint`]s created together by [`pair`]. Each endpoint writes
//! [`Frame`]s into its peer's bounded queue, so a slow reader suspends the writer instead of
//! growing memory. Cancellation does not travel through the queues; it is signalled through a
//! shared reset slot so it is observed even while the data queues are full.

mod inbound;
mod outbound;

use std::sync::Arc;

use bytes::Bytes;
use tokio::sync::mpsc;
use tonic::Code;

pub use self::inbound::Inbound;
pub use self::outbound::Outbound;
use crate::call::{CallContext, CallError, CallEvent, CallOutcome, ErrorKind, WriteOnce};

/// A unit of traffic on one direction of a call.
#[derive(Debug, Clone, PartialEq)]
pub enum Frame {
    /// One encoded application message.
    Message(Bytes),
    /// End-of-stream marker for the direction.
    End,
    /// Terminal status of the call; implies end-of-stream.
    Close { code: Code, message: String },
}

impl Frame {
    pub fn close(outcome: &CallOutcome) -> Self {
        match outcome {
            Ok(()) => Frame::Close {
                code: Code::Ok,
                message: String::new(),
            },
            Err(err) => Frame::Close {
                code: err.kind.code(),
                message: err.message.clone(),
            },
        }
    }

    fn close_outcome(code: Code, message: String) -> CallOutcome {
        match code {
            Code::Ok => Ok(()),
            code => Err(CallError::new(ErrorKind::from_code(code), message)),
        }
    }
}

/// Which side of the call an endpoint belongs to.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Role {
    Client,
    Server,
}

impl Role {
    fn message_sent(self) -> CallEvent {
        match self {
            Role::Client => CallEvent::Request,
            Role::Server => CallEvent::Response,
        }
    }

    fn end_sent(self) -> CallEvent {
        match self {
            Role::Client => CallEvent::RequestEnd,
            Role::Server => CallEvent::ResponseEnd,
        }
    }

    fn message_received(self) -> CallEvent {
        match self {
            Role::Client => CallEvent::Response,
            Role::Server => CallEvent::Request,
        }
    }

    fn end_received(self) -> CallEvent {
        match self {
            Role::Client => CallEvent::ResponseEnd,
            Role::Server => CallEvent::RequestEnd,
        }
    }
}

/// Out-of-band reset signal shared by both endpoints of a call.
pub type ResetSignal = Arc<WriteOnce<CallError>>;

/// One end of a call's frame pipe.
#[derive(Debug)]
pub struct Endpoint {
    pub(crate) tx: mpsc::Sender<Frame>,
    pub(crate) rx: mpsc::Receiver<Frame>,
    pub(crate) reset: ResetSignal,
}

impl Endpoint {
    /// Bind this endpoint to a call context, producing the outbound and inbound halves.
    pub fn bind(self, ctx: Arc<CallContext>, role: Role) -> (Outbound, Inbound) {
        let outbound = Outbound::new(Arc::clone(&ctx), self.tx, role);
        let inbound = Inbound::new(ctx, self.rx, role);
        (outbound, inbound)
    }

    pub fn reset_signal(&self) -> ResetSignal {
        Arc::clone(&self.reset)
    }

    /// Report `outcome` and drop the endpoint without binding it to a call.
    pub fn reject(self, err: CallError) {
        let _ = self.tx.try_send(Frame::close(&Err(err)));
    }
}

/// Create the two endpoints of a call. Each direction buffers at most `capacity` frames.
pub fn pair(capacity: usize) -> (Endpoint, Endpoint) {
    let capacity = capacity.max(1);
    let (a_tx, b_rx) = mpsc::channel(capacity);
    let (b_tx, a_rx) = mpsc::channel(capacity);
    let reset = Arc::new(WriteOnce::new());

    let a = Endpoint {
        tx: a_tx,
        rx: a_rx,
        reset: Arc::clone(&reset),
    };
    let b = Endpoint {
        tx: b_tx,
        rx: b_rx,
        reset,
    };
    (a, b)
}

/// Forward any failure of the client's call context to the peer through the reset signal.
pub(crate) fn propagate_failure(ctx: Arc<CallContext>, reset: ResetSignal) {
    tokio::spawn(async move {
        if let Err(err) = ctx.finished().await {
            reset.set(err);
        }
    });
}

/// Fail the server's call context when the peer resets the call.
pub(crate) fn observe_reset(ctx: Arc<CallContext>, reset: ResetSignal) {
    tokio::spawn(async move {
        tokio::select! {
            err = reset.wait() => {
                ctx.fail(err);
            }
            _ = ctx.finished() => {}
        }
    });
}
