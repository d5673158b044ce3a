//! Error types for the active-call registry.

use crate::call::CallId;

/// Indicates that a call could not be tracked because its id is already in use.
#[derive(Debug, thiserror::Error)]
#[error("call {call_id} is already active")]
pub struct CallAlreadyActive {
    pub call_id: CallId,
}

/// Indicates that no active call exists with the given id.
#[derive(Debug, thiserror::Error)]
#[error("no active call {call_id}")]
pub struct CallNotFound {
    pub call_id: CallId,
}
