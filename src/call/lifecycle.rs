//! The call lifecycle: which messages and end-of-stream markers are legal for each call shape.
//!
//! Legality is decided by [`transition`], a pure function of the call shape, the current
//! [`Lifecycle`] snapshot and the incoming [`CallEvent`]. [`CallLifecycle`] wraps it as a
//! [`StateMachine`] so the call context can feed it both events and clock readings.

use tokio::time::Instant;

use super::CallShape;
use super::error::IllegalTransition;
use crate::state_machine::StateMachine;
use crate::state_machine::wrappers::input::SystemInput;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum CallState {
    /// Nothing has moved in either direction yet.
    Open,
    /// The client may still send requests.
    ClientSending,
    /// Requests are complete and the server is producing responses.
    ServerSending,
    /// The last legal response has been produced; waiting for the end-of-stream markers.
    Draining,
    Closed,
    Failed,
}

impl CallState {
    pub fn is_terminal(self) -> bool {
        matches!(self, CallState::Closed | CallState::Failed)
    }
}

/// Something that happened on a call, named by direction rather than by endpoint so that both
/// the client and the server drive the same lifecycle.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum CallEvent {
    Request,
    RequestEnd,
    Response,
    ResponseEnd,
    Abort,
}

/// Progress of one direction of a call.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct Direction {
    /// Number of messages carried so far; doubles as the sequence number of the next message.
    pub seq: u64,
    /// Whether the end-of-stream marker has passed.
    pub ended: bool,
}

/// Snapshot of a call's lifecycle.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Lifecycle {
    pub state: CallState,
    pub requests: Direction,
    pub responses: Direction,
}

impl Lifecycle {
    pub fn new() -> Self {
        Self {
            state: CallState::Open,
            requests: Direction::default(),
            responses: Direction::default(),
        }
    }
}

impl Default for Lifecycle {
    fn default() -> Self {
        Self::new()
    }
}

/// Apply `event` to `current` for a call of the given `shape`.
pub fn transition(
    shape: CallShape,
    current: Lifecycle,
    event: CallEvent,
) -> Result<Lifecycle, IllegalTransition> {
    let reject = || IllegalTransition {
        shape,
        state: current.state,
        event,
    };

    if current.state.is_terminal() {
        return Err(reject());
    }

    let single_request = matches!(shape, CallShape::Unary | CallShape::ServerStream);
    let single_response = matches!(shape, CallShape::Unary | CallShape::ClientStream);
    let mut next = current;

    match event {
        CallEvent::Abort => {
            next.state = CallState::Failed;
            return Ok(next);
        }

        CallEvent::Request => {
            if next.requests.ended || (single_request && next.requests.seq > 0) {
                return Err(reject());
            }
            next.requests.seq += 1;
        }

        CallEvent::RequestEnd => {
            if next.requests.ended || (single_request && next.requests.seq == 0) {
                return Err(reject());
            }
            next.requests.ended = true;
        }

        CallEvent::Response => {
            let allowed = match shape {
                CallShape::Unary => next.requests.seq == 1 && next.responses.seq == 0,
                CallShape::ServerStream => next.requests.seq == 1,
                CallShape::ClientStream => next.requests.ended && next.responses.seq == 0,
                CallShape::BidiStream => true,
            };
            if next.responses.ended || !allowed {
                return Err(reject());
            }
            next.responses.seq += 1;
        }

        CallEvent::ResponseEnd => {
            let allowed = match shape {
                CallShape::Unary | CallShape::ClientStream => next.responses.seq == 1,
                CallShape::ServerStream => next.requests.seq == 1,
                CallShape::BidiStream => true,
            };
            if next.responses.ended || !allowed {
                return Err(reject());
            }
            next.responses.ended = true;
        }
    }

    next.state = if next.requests.ended && next.responses.ended {
        CallState::Closed
    } else if (single_response && next.responses.seq == 1) || next.responses.ended {
        CallState::Draining
    } else if next.requests.ended || (single_request && next.requests.seq == 1) {
        CallState::ServerSending
    } else if next.requests.seq > 0 || next.responses.seq > 0 {
        CallState::ClientSending
    } else {
        CallState::Open
    };

    Ok(next)
}

/// [`StateMachine`] over [`transition`] that additionally tracks the call deadline.
///
/// Time is never read here; the owner injects the current instant through
/// [`SystemInput::System`] at each suspension point.
#[derive(Debug)]
pub struct CallLifecycle {
    shape: CallShape,
    deadline: Option<Instant>,
    current: Lifecycle,
    pending: Option<LifecycleOutput>,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum LifecycleOutput {
    Transitioned(Lifecycle),
    Rejected(IllegalTransition),
    DeadlineExpired,
}

impl CallLifecycle {
    pub fn new(shape: CallShape, deadline: Option<Instant>) -> Self {
        Self {
            shape,
            deadline,
            current: Lifecycle::new(),
            pending: None,
        }
    }

    pub fn current(&self) -> Lifecycle {
        self.current
    }

    fn apply(&mut self, event: CallEvent) {
        let output = match transition(self.shape, self.current, event) {
            Ok(next) => {
                self.current = next;
                LifecycleOutput::Transitioned(next)
            }
            Err(err) => LifecycleOutput::Rejected(err),
        };
        self.pending = Some(output);
    }

    fn observe_clock(&mut self, now: Instant) {
        let expired = self.deadline.is_some_and(|deadline| now >= deadline);
        if expired && !self.current.state.is_terminal() {
            self.current.state = CallState::Failed;
            self.pending = Some(LifecycleOutput::DeadlineExpired);
        }
    }
}

impl StateMachine for CallLifecycle {
    type Input = SystemInput<CallEvent, Instant>;
    type Output = LifecycleOutput;

    fn process_input(&mut self, input: Self::Input) {
        match input {
            SystemInput::Input(event) => self.apply(event),
            SystemInput::System(now) => self.observe_clock(now),
        }
    }

    fn poll_output(&mut self) -> Option<Self::Output> {
        self.pending.take()
    }
}

#[cfg(test)]
mod tests {
    use std::time::Duration;

    use super::*;

    fn run(shape: CallShape, events: &[CallEvent]) -> Result<Lifecycle, IllegalTransition> {
        events
            .iter()
            .try_fold(Lifecycle::new(), |current, event| {
                transition(shape, current, *event)
            })
    }

    fn states(shape: CallShape, events: &[CallEvent]) -> Vec<CallState> {
        let mut current = Lifecycle::new();
        events
            .iter()
            .map(|event| {
                current = transition(shape, current, *event).unwrap();
                current.state
            })
            .collect()
    }

    #[test]
    fn test_unary_happy_path() {
        use CallEvent::*;
        assert_eq!(
            states(CallShape::Unary, &[Request, RequestEnd, Response, ResponseEnd]),
            vec![
                CallState::ServerSending,
                CallState::ServerSending,
                CallState::Draining,
                CallState::Closed,
            ]
        );
    }

    #[test]
    fn test_unary_rejects_cardinality_violations() {
        use CallEvent::*;
        assert!(run(CallShape::Unary, &[Request, Request]).is_err());
        assert!(run(CallShape::Unary, &[RequestEnd]).is_err());
        assert!(run(CallShape::Unary, &[Request, Response, Response]).is_err());
        assert!(run(CallShape::Unary, &[Request, ResponseEnd]).is_err());
        assert!(run(CallShape::Unary, &[Response]).is_err());
    }

    #[test]
    fn test_server_stream_allows_many_responses() {
        use CallEvent::*;
        let done = run(
            CallShape::ServerStream,
            &[Request, RequestEnd, Response, Response, Response, ResponseEnd],
        )
        .unwrap();
        assert_eq!(done.state, CallState::Closed);
        assert_eq!(done.responses.seq, 3);

        // No responses at all is a legal, empty stream.
        let empty = run(CallShape::ServerStream, &[Request, RequestEnd, ResponseEnd]).unwrap();
        assert_eq!(empty.state, CallState::Closed);
    }

    #[test]
    fn test_server_stream_drains_until_request_end() {
        use CallEvent::*;
        assert_eq!(
            states(CallShape::ServerStream, &[Request, Response, ResponseEnd, RequestEnd]),
            vec![
                CallState::ServerSending,
                CallState::ServerSending,
                CallState::Draining,
                CallState::Closed,
            ]
        );
    }

    #[test]
    fn test_client_stream_responds_once_after_request_end() {
        use CallEvent::*;
        assert_eq!(
            states(
                CallShape::ClientStream,
                &[Request, Request, RequestEnd, Response, ResponseEnd]
            ),
            vec![
                CallState::ClientSending,
                CallState::ClientSending,
                CallState::ServerSending,
                CallState::Draining,
                CallState::Closed,
            ]
        );

        assert!(run(CallShape::ClientStream, &[Request, Response]).is_err());
        assert!(run(CallShape::ClientStream, &[RequestEnd, Response, Response]).is_err());
        assert!(run(CallShape::ClientStream, &[RequestEnd, Request]).is_err());
    }

    #[test]
    fn test_bidi_directions_end_independently() {
        use CallEvent::*;
        assert_eq!(
            states(
                CallShape::BidiStream,
                &[Response, Request, Request, Response, ResponseEnd, Request, RequestEnd]
            ),
            vec![
                CallState::ClientSending,
                CallState::ClientSending,
                CallState::ClientSending,
                CallState::ClientSending,
                CallState::Draining,
                CallState::Draining,
                CallState::Closed,
            ]
        );

        assert_eq!(
            states(CallShape::BidiStream, &[Request, RequestEnd, Response, ResponseEnd]),
            vec![
                CallState::ClientSending,
                CallState::ServerSending,
                CallState::ServerSending,
                CallState::Closed,
            ]
        );
    }

    #[test]
    fn test_no_messages_after_end_of_stream() {
        use CallEvent::*;
        assert!(run(CallShape::BidiStream, &[RequestEnd, Request]).is_err());
        assert!(run(CallShape::BidiStream, &[ResponseEnd, Response]).is_err());
        assert!(run(CallShape::BidiStream, &[RequestEnd, RequestEnd]).is_err());
    }

    #[test]
    fn test_abort_from_any_live_state() {
        use CallEvent::*;
        let failed = run(CallShape::ClientStream, &[Request, Abort]).unwrap();
        assert_eq!(failed.state, CallState::Failed);

        let err = run(CallShape::ClientStream, &[Request, Abort, Request]).unwrap_err();
        assert_eq!(err.state, CallState::Failed);

        assert!(
            run(CallShape::Unary, &[Request, Response, RequestEnd, ResponseEnd, Abort]).is_err()
        );
    }

    #[test]
    fn test_machine_reports_deadline_once() {
        let start = Instant::now();
        let mut machine =
            CallLifecycle::new(CallShape::Unary, Some(start + Duration::from_secs(5)));

        machine.process_input(SystemInput::System(start));
        assert!(machine.poll_output().is_none());

        machine.process_input(SystemInput::System(start + Duration::from_secs(5)));
        assert_eq!(machine.poll_output(), Some(LifecycleOutput::DeadlineExpired));
        assert_eq!(machine.current().state, CallState::Failed);

        machine.process_input(SystemInput::System(start + Duration::from_secs(6)));
        assert!(machine.poll_output().is_none());
    }

    #[test]
    fn test_machine_without_deadline_never_expires() {
        let mut machine = CallLifecycle::new(CallShape::BidiStream, None);
        machine.process_input(SystemInput::System(Instant::now() + Duration::from_secs(3600)));
        assert!(machine.poll_output().is_none());

        machine.process_input(SystemInput::Input(CallEvent::Request));
        assert!(matches!(
            machine.poll_output(),
            Some(LifecycleOutput::Transitioned(l)) if l.state == CallState::ClientSending
        ));
    }
}
