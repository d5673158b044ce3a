use std::sync::Arc;

use dashmap::{DashMap, Entry};
use tracing::debug;

use super::error::{CallAlreadyActive, CallNotFound};
use crate::call::{CallContext, CallId};

/// The calls a server is currently driving, keyed by call id.
#[derive(Debug, Default)]
pub struct CallRegistry {
    calls: DashMap<CallId, Arc<CallContext>, ahash::RandomState>,
}

impl CallRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Start tracking `ctx`. The call stays registered until the returned guard is dropped.
    pub fn track(
        self: &Arc<Self>,
        ctx: Arc<CallContext>,
    ) -> Result<CallGuard, CallAlreadyActive> {
        let call_id = ctx.call_id().clone();

        match self.calls.entry(call_id.clone()) {
            Entry::Occupied(_) => Err(CallAlreadyActive { call_id }),
            Entry::Vacant(slot) => {
                slot.insert(ctx);
                debug!(call_id = %call_id, "Call registered");
                Ok(CallGuard {
                    registry: Arc::clone(self),
                    call_id,
                })
            }
        }
    }

    pub fn get(&self, call_id: &CallId) -> Option<Arc<CallContext>> {
        self.calls.get(call_id).map(|entry| Arc::clone(entry.value()))
    }

    pub fn contains(&self, call_id: &CallId) -> bool {
        self.calls.contains_key(call_id)
    }

    /// Request cancellation of one active call.
    pub fn cancel(&self, call_id: &CallId) -> Result<bool, CallNotFound> {
        let ctx = self.get(call_id).ok_or_else(|| CallNotFound {
            call_id: call_id.clone(),
        })?;
        Ok(ctx.request_cancel())
    }

    /// Request cancellation of every active call and return how many were moved to `Failed`.
    pub fn cancel_all(&self) -> usize {
        // Collect first so no shard lock is held while contexts log and wake waiters.
        let active: Vec<_> = self
            .calls
            .iter()
            .map(|entry| Arc::clone(entry.value()))
            .collect();

        active.iter().filter(|ctx| ctx.request_cancel()).count()
    }

    pub fn len(&self) -> usize {
        self.calls.len()
    }

    pub fn is_empty(&self) -> bool {
        self.calls.is_empty()
    }

    fn remove(&self, call_id: &CallId) {
        if self.calls.remove(call_id).is_some() {
            debug!(call_id = %call_id, "Call unregistered");
        }
    }
}

/// Removes the call from its registry when dropped.
#[derive(Debug)]
pub struct CallGuard {
    registry: Arc<CallRegistry>,
    call_id: CallId,
}

impl CallGuard {
    pub fn call_id(&self) -> &CallId {
        &self.call_id
    }
}

impl Drop for CallGuard {
    fn drop(&mut self) {
        self.registry.remove(&self.call_id);
    }
}
