use std::fmt;
use std::sync::Arc;

use uuid::Uuid;

/// Opaque identifier for a single call, unique per connection.
#[derive(Clone, Hash, PartialEq, Eq)]
pub struct CallId(Arc<Uuid>);

impl CallId {
    pub fn generate() -> Self {
        Self(Arc::new(Uuid::new_v4()))
    }

    pub fn as_uuid(&self) -> &Uuid {
        &self.0
    }
}

impl fmt::Debug for CallId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "CallId({})", self.0)
    }
}

impl fmt::Display for CallId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}
