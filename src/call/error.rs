use super::{CallEvent, CallShape, CallState};

/// Indicates that an event is not legal for a call of the given shape in its current state.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
#[error("{event:?} is not legal for a {shape} call in state {state:?}")]
pub struct IllegalTransition {
    pub shape: CallShape,
    pub state: CallState,
    pub event: CallEvent,
}
