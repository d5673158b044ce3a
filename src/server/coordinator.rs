//! Drives one accepted call to completion according to its shape.

use std::sync::Arc;

use bytes::Bytes;
use futures::StreamExt;
use tokio::sync::mpsc;
use tokio_stream::wrappers::ReceiverStream;
use tracing::{debug, info};

use crate::call::{CallContext, CallError, CallOutcome};
use crate::channel::{Inbound, Outbound};
use crate::server::handler::{
    CallScope, ErasedBidi, ErasedClientStream, ErasedServerStream, ErasedUnary, HandlerBinding,
};

pub(crate) struct Coordinator {
    ctx: Arc<CallContext>,
    binding: HandlerBinding,
    inbound: Inbound,
    outbound: Outbound,
    outbound_queue: usize,
}

impl Coordinator {
    pub(crate) fn new(
        ctx: Arc<CallContext>,
        binding: HandlerBinding,
        inbound: Inbound,
        outbound: Outbound,
        outbound_queue: usize,
    ) -> Self {
        Self {
            ctx,
            binding,
            inbound,
            outbound,
            outbound_queue,
        }
    }

    /// Run the call, deliver its terminal status to the peer and return that status.
    pub(crate) async fn run(self) -> CallOutcome {
        let Self {
            ctx,
            binding,
            mut inbound,
            mut outbound,
            outbound_queue,
        } = self;
        let scope = CallScope::new(Arc::clone(&ctx));

        debug!(
            call_id = %ctx.call_id(),
            operation = %ctx.operation(),
            shape = %ctx.shape(),
            "Driving call"
        );

        let (outbound, result) = match binding {
            HandlerBinding::Unary(handler) => {
                let result = drive_unary(&*handler, scope, &mut inbound, &mut outbound).await;
                (Some(outbound), result)
            }
            HandlerBinding::ServerStream(handler) => {
                let result =
                    drive_server_stream(&*handler, scope, &mut inbound, &mut outbound).await;
                (Some(outbound), result)
            }
            HandlerBinding::ClientStream(handler) => {
                let result = drive_client_stream(&*handler, &mut inbound, &mut outbound).await;
                (Some(outbound), result)
            }
            HandlerBinding::BidiStream(handler) => {
                drive_bidi(&*handler, &ctx, &mut inbound, outbound, outbound_queue).await
            }
        };

        let outcome = ctx.settle(result);
        if let Some(mut outbound) = outbound {
            outbound.close(&outcome).await;
        }

        match &outcome {
            Ok(()) => info!(
                call_id = %ctx.call_id(),
                operation = %ctx.operation(),
                "Call completed"
            ),
            Err(err) => info!(
                call_id = %ctx.call_id(),
                operation = %ctx.operation(),
                kind = %err.kind,
                "Call ended with error"
            ),
        }

        outcome
    }
}

/// Receive exactly one request followed by end-of-stream.
async fn receive_single(inbound: &mut Inbound) -> Result<Bytes, CallError> {
    let request = inbound
        .receive()
        .await?
        .ok_or_else(|| CallError::internal("missing request message"))?;

    match inbound.receive().await? {
        None => Ok(request),
        Some(_) => Err(CallError::internal("expected a single request message")),
    }
}

async fn drive_unary(
    handler: &dyn ErasedUnary,
    scope: CallScope,
    inbound: &mut Inbound,
    outbound: &mut Outbound,
) -> CallOutcome {
    let request = receive_single(inbound).await?;
    let response = handler.call(scope, request).await?;

    outbound.send(response).await?;
    outbound.finish().await?;
    Ok(())
}

async fn drive_server_stream(
    handler: &dyn ErasedServerStream,
    scope: CallScope,
    inbound: &mut Inbound,
    outbound: &mut Outbound,
) -> CallOutcome {
    let ctx = Arc::clone(inbound.context());
    let request = receive_single(inbound).await?;
    let mut responses = handler.call(scope, request)?;

    // Waiting on the handler is a suspension point of the call as well.
    while let Some(response) = ctx.guard(responses.next()).await? {
        outbound.send(response?).await?;
    }

    outbound.finish().await?;
    Ok(())
}

async fn drive_client_stream(
    handler: &dyn ErasedClientStream,
    inbound: &mut Inbound,
    outbound: &mut Outbound,
) -> CallOutcome {
    let mut accumulator = handler.begin();

    while let Some(request) = inbound.receive().await? {
        accumulator.accept(request)?;
    }

    let response = accumulator.finish()?;
    outbound.send(response).await?;
    outbound.finish().await?;
    Ok(())
}

/// Run the receive loop here and the send loop as its own task, connected by a bounded queue.
///
/// Each loop ends on its own end-of-stream; the call is only settled once both have.
async fn drive_bidi(
    handler: &dyn ErasedBidi,
    ctx: &Arc<CallContext>,
    inbound: &mut Inbound,
    outbound: Outbound,
    outbound_queue: usize,
) -> (Option<Outbound>, CallOutcome) {
    let (queue_tx, queue_rx) = mpsc::channel::<Bytes>(outbound_queue.max(1));

    let send_ctx = Arc::clone(ctx);
    let send_loop = tokio::spawn(async move {
        let mut outbound = outbound;
        let mut queued = ReceiverStream::new(queue_rx);
        let sent = async {
            while let Some(response) = queued.next().await {
                outbound.send(response).await?;
            }
            outbound.finish().await
        }
        .await
        .map_err(CallError::from);

        // Unblock the receive loop if the send side gave up first.
        if let Err(err) = &sent {
            send_ctx.fail(err.clone());
        }
        (outbound, sent)
    });

    let mut session = handler.open();
    let received = async {
        while let Some(request) = inbound.receive().await? {
            if let Some(response) = session.step(request)? {
                ctx.guard(queue_tx.send(response))
                    .await?
                    .map_err(|_| CallError::internal("send loop stopped"))?;
            }
        }
        Ok::<(), CallError>(())
    }
    .await;

    if let Err(err) = &received {
        ctx.fail(err.clone());
    }
    drop(queue_tx);

    match send_loop.await {
        Ok((outbound, sent)) => (Some(outbound), received.and(sent)),
        Err(err) => (
            None,
            Err(CallError::internal(format!("send loop failed: {err}"))),
        ),
    }
}
