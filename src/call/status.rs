use std::fmt;
use std::sync::OnceLock;

use tokio::sync::Notify;
use tonic::Code;

/// The taxonomy of ways a call can fail.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ErrorKind {
    /// The caller supplied an argument the handler refuses.
    InvalidArgument,
    /// No handler is registered for the requested operation.
    Unimplemented,
    /// Either side cancelled the call.
    Cancelled,
    /// The call deadline passed before the call finished.
    DeadlineExceeded,
    /// A handler or runtime fault.
    Internal,
}

impl ErrorKind {
    /// The wire status code carried by the terminal frame of a call.
    pub fn code(self) -> Code {
        match self {
            ErrorKind::InvalidArgument => Code::InvalidArgument,
            ErrorKind::Unimplemented => Code::Unimplemented,
            ErrorKind::Cancelled => Code::Cancelled,
            ErrorKind::DeadlineExceeded => Code::DeadlineExceeded,
            ErrorKind::Internal => Code::Internal,
        }
    }

    /// Map a wire status code back onto the taxonomy.
    ///
    /// Codes outside the taxonomy are reported as [`ErrorKind::Internal`]; `Ok` has no error
    /// kind and is also folded into `Internal` since it never describes a failure.
    pub fn from_code(code: Code) -> Self {
        match code {
            Code::InvalidArgument => ErrorKind::InvalidArgument,
            Code::Unimplemented => ErrorKind::Unimplemented,
            Code::Cancelled => ErrorKind::Cancelled,
            Code::DeadlineExceeded => ErrorKind::DeadlineExceeded,
            _ => ErrorKind::Internal,
        }
    }

    pub fn as_str(self) -> &'static str {
        match self {
            ErrorKind::InvalidArgument => "invalid argument",
            ErrorKind::Unimplemented => "unimplemented",
            ErrorKind::Cancelled => "cancelled",
            ErrorKind::DeadlineExceeded => "deadline exceeded",
            ErrorKind::Internal => "internal",
        }
    }
}

impl fmt::Display for ErrorKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// A failed call status: an [`ErrorKind`] plus a human readable message.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
#[error("{kind}: {message}")]
pub struct CallError {
    pub kind: ErrorKind,
    pub message: String,
}

impl CallError {
    pub fn new(kind: ErrorKind, message: impl Into<String>) -> Self {
        Self {
            kind,
            message: message.into(),
        }
    }

    pub fn invalid_argument(message: impl Into<String>) -> Self {
        Self::new(ErrorKind::InvalidArgument, message)
    }

    pub fn unimplemented(message: impl Into<String>) -> Self {
        Self::new(ErrorKind::Unimplemented, message)
    }

    pub fn cancelled(message: impl Into<String>) -> Self {
        Self::new(ErrorKind::Cancelled, message)
    }

    pub fn deadline_exceeded() -> Self {
        Self::new(ErrorKind::DeadlineExceeded, "call deadline exceeded")
    }

    pub fn internal(message: impl Into<String>) -> Self {
        Self::new(ErrorKind::Internal, message)
    }
}

impl From<CallError> for tonic::Status {
    fn from(err: CallError) -> Self {
        tonic::Status::new(err.kind.code(), err.message)
    }
}

impl From<tonic::Status> for CallError {
    fn from(status: tonic::Status) -> Self {
        CallError::new(ErrorKind::from_code(status.code()), status.message())
    }
}

/// The final status of a call.
pub type CallOutcome = Result<(), CallError>;

/// A single-assignment slot that suspended tasks can wait on.
///
/// The first [`set`](Self::set) wins and every later attempt is a no-op, so concurrent writers
/// racing to record a value always agree on a single result.
#[derive(Debug)]
pub struct WriteOnce<T> {
    cell: OnceLock<T>,
    notify: Notify,
}

impl<T: Clone> WriteOnce<T> {
    pub fn new() -> Self {
        Self {
            cell: OnceLock::new(),
            notify: Notify::new(),
        }
    }

    /// Record `value` if nothing was recorded yet. Returns `true` if this call won.
    pub fn set(&self, value: T) -> bool {
        let won = self.cell.set(value).is_ok();
        if won {
            self.notify.notify_waiters();
        }
        won
    }

    pub fn get(&self) -> Option<&T> {
        self.cell.get()
    }

    pub fn is_set(&self) -> bool {
        self.cell.get().is_some()
    }

    /// Suspend until a value is recorded.
    pub async fn wait(&self) -> T {
        loop {
            let notified = self.notify.notified();
            tokio::pin!(notified);
            notified.as_mut().enable();

            if let Some(value) = self.cell.get() {
                return value.clone();
            }

            notified.await;
        }
    }
}

impl<T: Clone> Default for WriteOnce<T> {
    fn default() -> Self {
        Self::new()
    }
}
