// Parent Context Stack
//
// LIFO of the observation ids currently open in one flow of control. The
// bottom entry is the trace id while the trace is active; the top is the
// parent of the next observation created without an explicit parent.

use crate::error::{Result, TraceError};

#[derive(Debug, Clone, Default)]
pub struct ParentContextStack {
    entries: Vec<String>,
}

/// Outcome of removing a scoped entry
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum PopOutcome {
    /// The entry was on top and was popped
    Popped,
    /// The entry was buried; it and everything above it were popped
    Unwound { found: String, removed: usize },
    /// The entry was no longer on the stack; nothing was popped
    Missing { found: String },
}

impl ParentContextStack {
    /// Stack rooted at a trace id
    pub fn rooted(trace_id: impl Into<String>) -> Self {
        Self {
            entries: vec![trace_id.into()],
        }
    }

    pub fn push(&mut self, id: impl Into<String>) {
        self.entries.push(id.into());
    }

    /// Pop the top entry, if any
    pub fn pop(&mut self) -> Option<String> {
        self.entries.pop()
    }

    /// Current parent for new observations
    pub fn peek(&self) -> Result<&str> {
        self.entries
            .last()
            .map(String::as_str)
            .ok_or(TraceError::NoActiveTrace)
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    pub fn contains(&self, id: &str) -> bool {
        self.entries.iter().any(|e| e == id)
    }

    /// Bottom-to-top view of the open entries
    pub fn entries(&self) -> &[String] {
        &self.entries
    }

    /// Remove a scoped entry, tolerating out-of-order release
    ///
    /// The root (index 0) is never removed.
    pub fn pop_scoped(&mut self, id: &str) -> PopOutcome {
        let found = match self.entries.last() {
            Some(top) if top == id && self.entries.len() > 1 => {
                self.entries.pop();
                return PopOutcome::Popped;
            }
            Some(top) => top.clone(),
            None => String::new(),
        };

        match self.entries.iter().skip(1).rposition(|e| e == id) {
            Some(offset) => {
                let index = offset + 1;
                let removed = self.entries.len() - index;
                self.entries.truncate(index);
                PopOutcome::Unwound { found, removed }
            }
            None => PopOutcome::Missing { found },
        }
    }

    pub(crate) fn clear(&mut self) {
        self.entries.clear();
    }
}
