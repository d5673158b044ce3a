//! Per-call state shared by the send and receive halves of a single RPC invocation.

pub mod error;
mod id;
pub mod lifecycle;
pub mod status;

use std::fmt;
use std::future::Future;
use std::sync::Mutex;
use std::sync::atomic::{AtomicBool, Ordering};

use tokio::time::Instant;
use tracing::{debug, warn};

pub use self::error::IllegalTransition;
pub use self::id::CallId;
pub use self::lifecycle::{
    CallEvent, CallLifecycle, CallState, Direction, Lifecycle, LifecycleOutput, transition,
};
pub use self::status::{CallError, CallOutcome, ErrorKind, WriteOnce};
use crate::state_machine::StateMachine;
use crate::state_machine::wrappers::input::SystemInput;

/// The request/response cardinality of a call.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum CallShape {
    Unary,
    ServerStream,
    ClientStream,
    BidiStream,
}

impl CallShape {
    pub fn as_str(self) -> &'static str {
        match self {
            CallShape::Unary => "unary",
            CallShape::ServerStream => "server-stream",
            CallShape::ClientStream => "client-stream",
            CallShape::BidiStream => "bidi-stream",
        }
    }
}

impl fmt::Display for CallShape {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// The context of one call: identity, shape, deadline, cancellation flag, lifecycle and the
/// write-once final status.
///
/// Both halves of a call hold the context through an `Arc`. The final status is recorded exactly
/// once; whichever of the failure path or the normal completion path gets there first decides
/// the outcome every observer sees.
pub struct CallContext {
    call_id: CallId,
    operation: String,
    shape: CallShape,
    deadline: Option<Instant>,
    cancel_requested: AtomicBool,
    lifecycle: Mutex<CallLifecycle>,
    status: WriteOnce<CallOutcome>,
}

impl fmt::Debug for CallContext {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("CallContext")
            .field("call_id", &self.call_id)
            .field("operation", &self.operation)
            .field("shape", &self.shape)
            .field("state", &self.state())
            .finish()
    }
}

impl CallContext {
    pub fn new(
        call_id: CallId,
        operation: impl Into<String>,
        shape: CallShape,
        deadline: Option<Instant>,
    ) -> Self {
        Self {
            call_id,
            operation: operation.into(),
            shape,
            deadline,
            cancel_requested: AtomicBool::new(false),
            lifecycle: Mutex::new(CallLifecycle::new(shape, deadline)),
            status: WriteOnce::new(),
        }
    }

    pub fn call_id(&self) -> &CallId {
        &self.call_id
    }

    pub fn operation(&self) -> &str {
        &self.operation
    }

    pub fn shape(&self) -> CallShape {
        self.shape
    }

    pub fn deadline(&self) -> Option<Instant> {
        self.deadline
    }

    /// The current lifecycle snapshot.
    pub fn lifecycle(&self) -> Lifecycle {
        self.lifecycle
            .lock()
            .expect("call lifecycle lock poisoned")
            .current()
    }

    /// The current state, with the recorded final status taking precedence over the lifecycle.
    pub fn state(&self) -> CallState {
        match self.status.get() {
            Some(Ok(())) => CallState::Closed,
            Some(Err(_)) => CallState::Failed,
            None => self.lifecycle().state,
        }
    }

    pub fn is_cancel_requested(&self) -> bool {
        self.cancel_requested.load(Ordering::Acquire)
    }

    pub fn outcome(&self) -> Option<CallOutcome> {
        self.status.get().cloned()
    }

    pub fn failure(&self) -> Option<CallError> {
        match self.status.get() {
            Some(Err(err)) => Some(err.clone()),
            _ => None,
        }
    }

    pub fn is_finished(&self) -> bool {
        self.status.is_set()
    }

    fn drive(&self, input: SystemInput<CallEvent, Instant>) -> Option<LifecycleOutput> {
        let mut machine = self.lifecycle.lock().expect("call lifecycle lock poisoned");
        machine.process_input(input);
        machine.poll_output()
    }

    /// Record `event` on the lifecycle, rejecting it if the call shape does not allow it.
    pub fn advance(&self, event: CallEvent) -> Result<Lifecycle, IllegalTransition> {
        match self.drive(SystemInput::Input(event)) {
            Some(LifecycleOutput::Transitioned(next)) => Ok(next),
            Some(LifecycleOutput::Rejected(err)) => Err(err),
            // The lifecycle always answers an event with a transition or a rejection.
            _ => Err(IllegalTransition {
                shape: self.shape,
                state: self.lifecycle().state,
                event,
            }),
        }
    }

    /// Request cancellation. Only the first request has any effect.
    ///
    /// Returns `true` if this request moved the call to `Failed`.
    pub fn request_cancel(&self) -> bool {
        if self.cancel_requested.swap(true, Ordering::AcqRel) {
            return false;
        }
        self.fail(CallError::cancelled("call cancelled"))
    }

    /// Fail the call with `err` unless a final status was already recorded.
    ///
    /// Returns `true` if `err` became the final status.
    pub fn fail(&self, err: CallError) -> bool {
        let won = self.status.set(Err(err.clone()));
        if won {
            let _ = self.drive(SystemInput::Input(CallEvent::Abort));
            warn!(
                call_id = %self.call_id,
                operation = %self.operation,
                kind = %err.kind,
                message = %err.message,
                "Call failed"
            );
        }
        won
    }

    /// Record a successful completion and return the outcome that was actually recorded, which
    /// is an earlier failure if one won the race.
    pub fn complete(&self) -> CallOutcome {
        if self.status.set(Ok(())) {
            debug!(
                call_id = %self.call_id,
                operation = %self.operation,
                state = ?self.lifecycle().state,
                "Call closed"
            );
        }
        self.outcome().unwrap_or(Ok(()))
    }

    /// Record `result` as the final status and return the outcome that won.
    pub fn settle(&self, result: CallOutcome) -> CallOutcome {
        match result {
            Ok(()) => self.complete(),
            Err(err) => {
                self.fail(err.clone());
                self.outcome().unwrap_or(Err(err))
            }
        }
    }

    /// Suspension-point check: fails if the call already failed or its deadline passed.
    pub fn checkpoint(&self) -> Result<(), CallError> {
        if let Some(err) = self.failure() {
            return Err(err);
        }

        if let Some(LifecycleOutput::DeadlineExpired) = self.drive(SystemInput::sample()) {
            return Err(self.expire());
        }

        Ok(())
    }

    fn expire(&self) -> CallError {
        let err = CallError::deadline_exceeded();
        self.fail(err.clone());
        self.failure().unwrap_or(err)
    }

    /// Suspend until a final status is recorded.
    pub async fn finished(&self) -> CallOutcome {
        self.status.wait().await
    }

    /// Suspend until the call fails. Never resolves for a call that completes successfully.
    pub async fn failed(&self) -> CallError {
        match self.status.wait().await {
            Err(err) => err,
            Ok(()) => std::future::pending().await,
        }
    }

    async fn deadline_elapsed(&self) {
        match self.deadline {
            Some(deadline) => tokio::time::sleep_until(deadline).await,
            None => std::future::pending().await,
        }
    }

    /// Run `fut` as a suspension point of this call.
    ///
    /// Resolves with the recorded failure as soon as the call fails or its deadline passes,
    /// whichever happens first, dropping `fut`.
    pub async fn guard<F: Future>(&self, fut: F) -> Result<F::Output, CallError> {
        self.checkpoint()?;

        tokio::select! {
            biased;
            err = self.failed() => Err(err),
            _ = self.deadline_elapsed() => Err(self.expire()),
            output = fut => Ok(output),
        }
    }
}

#[cfg(test)]
mod tests {
    use std::sync::Arc;
    use std::time::Duration;

    use super::*;

    fn context(shape: CallShape, deadline: Option<Instant>) -> Arc<CallContext> {
        Arc::new(CallContext::new(
            CallId::generate(),
            "test.Service/Method",
            shape,
            deadline,
        ))
    }

    #[test]
    fn test_cancel_is_monotone() {
        let ctx = context(CallShape::Unary, None);

        assert!(ctx.request_cancel());
        assert!(!ctx.request_cancel());
        assert!(ctx.is_cancel_requested());
        assert_eq!(ctx.state(), CallState::Failed);
        assert_eq!(ctx.failure().unwrap().kind, ErrorKind::Cancelled);
    }

    #[test]
    fn test_completion_after_failure_is_a_noop() {
        let ctx = context(CallShape::Unary, None);

        assert!(ctx.fail(CallError::internal("boom")));
        let outcome = ctx.complete();
        assert_eq!(outcome.unwrap_err().kind, ErrorKind::Internal);
        assert_eq!(ctx.state(), CallState::Failed);
    }

    #[test]
    fn test_failure_after_completion_is_a_noop() {
        let ctx = context(CallShape::Unary, None);

        assert!(ctx.complete().is_ok());
        assert!(!ctx.request_cancel());
        assert_eq!(ctx.outcome(), Some(Ok(())));
        assert_eq!(ctx.state(), CallState::Closed);
    }

    #[test]
    fn test_advance_tracks_sequence_numbers() {
        let ctx = context(CallShape::ClientStream, None);

        ctx.advance(CallEvent::Request).unwrap();
        ctx.advance(CallEvent::Request).unwrap();
        let lifecycle = ctx.advance(CallEvent::RequestEnd).unwrap();

        assert_eq!(lifecycle.requests.seq, 2);
        assert!(lifecycle.requests.ended);
        assert_eq!(ctx.state(), CallState::ServerSending);
        assert!(ctx.advance(CallEvent::Request).is_err());
    }

    #[test]
    fn test_checkpoint_observes_deadline() {
        let ctx = context(CallShape::Unary, Some(Instant::now()));

        let err = ctx.checkpoint().unwrap_err();
        assert_eq!(err.kind, ErrorKind::DeadlineExceeded);
        assert_eq!(ctx.state(), CallState::Failed);
    }

    #[tokio::test]
    async fn test_guard_resolves_on_cancel() {
        let ctx = context(CallShape::BidiStream, None);

        let guarded = {
            let ctx = Arc::clone(&ctx);
            tokio::spawn(async move { ctx.guard(std::future::pending::<()>()).await })
        };

        tokio::task::yield_now().await;
        ctx.request_cancel();

        let err = guarded.await.unwrap().unwrap_err();
        assert_eq!(err.kind, ErrorKind::Cancelled);
    }

    #[tokio::test]
    async fn test_guard_resolves_on_deadline() {
        let ctx = context(
            CallShape::Unary,
            Some(Instant::now() + Duration::from_millis(20)),
        );

        let err = ctx
            .guard(tokio::time::sleep(Duration::from_secs(30)))
            .await
            .unwrap_err();
        assert_eq!(err.kind, ErrorKind::DeadlineExceeded);
        assert_eq!(ctx.failure(), Some(err));
    }

    #[tokio::test]
    async fn test_concurrent_cancel_and_completion_agree() {
        for _ in 0..64 {
            let ctx = context(CallShape::Unary, None);

            let cancel = {
                let ctx = Arc::clone(&ctx);
                tokio::spawn(async move { ctx.request_cancel() })
            };
            let complete = {
                let ctx = Arc::clone(&ctx);
                tokio::spawn(async move { ctx.complete() })
            };

            let cancelled = cancel.await.unwrap();
            let completed = complete.await.unwrap();

            let recorded = ctx.outcome().unwrap();
            assert_eq!(completed, recorded);
            assert_eq!(cancelled, recorded.is_err());
        }
    }
}
