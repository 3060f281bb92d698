// Observation Sinks
//
// A sink receives each finished trace exactly once, after exclusion has been
// applied. Backend adapters (batch ingestion, span export) implement this
// trait; the core never sees their transport.

use std::collections::HashMap;
use std::sync::Mutex;

use crate::config::SkipPropagation;
use crate::error::ExportError;
use crate::observation::Observation;
use crate::trace::TraceRecord;

/// A trace and the observations eligible for export
#[derive(Debug, Clone, PartialEq)]
pub struct FinishedTrace {
    pub trace: TraceRecord,
    /// Exported observations in creation order
    pub observations: Vec<Observation>,
}

impl FinishedTrace {
    pub fn observation(&self, id: &str) -> Option<&Observation> {
        self.observations.iter().find(|o| o.id == id)
    }

    pub fn contains(&self, id: &str) -> bool {
        self.observation(id).is_some()
    }

    /// Direct children of an observation, or of the trace when given the trace id
    pub fn children_of<'a>(&'a self, parent_id: &'a str) -> impl Iterator<Item = &'a Observation> {
        self.observations
            .iter()
            .filter(move |o| o.parent_id == parent_id)
    }
}

/// Destination for finished traces
pub trait ObservationSink: Send + Sync {
    /// Name of this sink (for logging)
    fn name(&self) -> &'static str;

    /// Receive one finished trace
    fn export(&self, trace: &FinishedTrace) -> Result<(), ExportError>;
}

/// Sink that drops everything
#[derive(Debug, Clone, Copy, Default)]
pub struct NoopSink;

impl ObservationSink for NoopSink {
    fn name(&self) -> &'static str {
        "noop"
    }

    fn export(&self, _trace: &FinishedTrace) -> Result<(), ExportError> {
        Ok(())
    }
}

/// Sink that keeps every export in memory, for tests and examples
#[derive(Debug, Default)]
pub struct InMemorySink {
    exports: Mutex<Vec<FinishedTrace>>,
}

impl InMemorySink {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn exports(&self) -> Vec<FinishedTrace> {
        self.exports
            .lock()
            .unwrap_or_else(|e| e.into_inner())
            .clone()
    }

    pub fn last(&self) -> Option<FinishedTrace> {
        self.exports
            .lock()
            .unwrap_or_else(|e| e.into_inner())
            .last()
            .cloned()
    }

    pub fn len(&self) -> usize {
        self.exports.lock().unwrap_or_else(|e| e.into_inner()).len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

impl ObservationSink for InMemorySink {
    fn name(&self) -> &'static str {
        "in-memory"
    }

    fn export(&self, trace: &FinishedTrace) -> Result<(), ExportError> {
        self.exports
            .lock()
            .unwrap_or_else(|e| e.into_inner())
            .push(trace.clone());
        Ok(())
    }
}

/// Ids of observations that must not be exported
///
/// Under `Cascade`, an observation is excluded when it or any ancestor within
/// the trace is marked excluded.
pub(crate) fn excluded_ids(
    observations: &[Observation],
    policy: SkipPropagation,
) -> Vec<bool> {
    let index: HashMap<&str, usize> = observations
        .iter()
        .enumerate()
        .map(|(i, o)| (o.id.as_str(), i))
        .collect();

    observations
        .iter()
        .map(|obs| {
            if obs.excluded {
                return true;
            }
            if policy == SkipPropagation::Isolated {
                return false;
            }

            let mut parent = obs.parent_id.as_str();
            let mut hops = 0;
            while let Some(&i) = index.get(parent) {
                let ancestor = &observations[i];
                if ancestor.excluded {
                    return true;
                }
                parent = ancestor.parent_id.as_str();
                hops += 1;
                if hops > observations.len() {
                    break;
                }
            }
            false
        })
        .collect()
}

/// Build the export set for a trace; None when the whole trace is skipped
pub(crate) fn export_set(
    trace: &TraceRecord,
    observations: &[Observation],
    policy: SkipPropagation,
) -> Option<FinishedTrace> {
    if trace.excluded {
        return None;
    }

    let excluded = excluded_ids(observations, policy);
    let observations = observations
        .iter()
        .zip(excluded)
        .filter(|(_, skip)| !skip)
        .map(|(obs, _)| obs.clone())
        .collect();

    Some(FinishedTrace {
        trace: trace.clone(),
        observations,
    })
}
