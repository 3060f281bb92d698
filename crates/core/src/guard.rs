// Scope Guard
//
// Returned by scoped creation. The guard's observation sits on top of the
// flow's parent stack until release; release ends the observation and pops
// it, on every exit path (explicit release, early return, `?`, panic unwind,
// future cancellation) through Drop.

use std::fmt;
use std::ops::Deref;
use std::sync::{Arc, Mutex};
use tracing::warn;

use crate::error::{Result, TraceError};
use crate::handle::ObservationHandle;
use crate::stack::{ParentContextStack, PopOutcome};

#[must_use = "dropping the guard immediately ends the observation"]
pub struct ScopeGuard {
    handle: ObservationHandle,
    stack: Arc<Mutex<ParentContextStack>>,
    released: bool,
}

impl fmt::Debug for ScopeGuard {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ScopeGuard")
            .field("id", &self.handle.id())
            .field("released", &self.released)
            .finish()
    }
}

impl ScopeGuard {
    pub(crate) fn new(handle: ObservationHandle, stack: Arc<Mutex<ParentContextStack>>) -> Self {
        Self {
            handle,
            stack,
            released: false,
        }
    }

    pub fn handle(&self) -> &ObservationHandle {
        &self.handle
    }

    pub fn is_released(&self) -> bool {
        self.released
    }

    /// End the observation and restore the parent stack
    ///
    /// Idempotent. Returns `StackDisciplineViolation` when the observation was
    /// not on top of the stack; the stack has already been repaired by then.
    pub fn release(&mut self) -> Result<()> {
        if self.released {
            return Ok(());
        }
        self.released = true;
        self.handle.end();

        let mut stack = self.stack.lock().unwrap_or_else(|e| e.into_inner());
        // Ended trace: the stack was cleared with it
        if stack.is_empty() {
            return Ok(());
        }

        let id = self.handle.id();
        match stack.pop_scoped(id) {
            PopOutcome::Popped => Ok(()),
            PopOutcome::Unwound { found, removed } => {
                warn!(
                    observation_id = %id,
                    stack_top = %found,
                    removed,
                    "Scope released out of order; unwound parent stack"
                );
                Err(TraceError::stack_violation(id, found))
            }
            PopOutcome::Missing { found } => {
                warn!(
                    observation_id = %id,
                    stack_top = %found,
                    "Scope released after its entry was already unwound"
                );
                Err(TraceError::stack_violation(id, found))
            }
        }
    }
}

impl Deref for ScopeGuard {
    type Target = ObservationHandle;

    fn deref(&self) -> &Self::Target {
        &self.handle
    }
}

impl Drop for ScopeGuard {
    fn drop(&mut self) {
        // Violations are already logged by release
        let _ = self.release();
    }
}
