// Trace Context
//
// A TraceContext is one flow of control inside one logical execution. It owns
// the flow's ParentContextStack and shares the trace state (record plus all
// observations) with its forks and with every observation handle.
//
// Lifecycle:
// - Tracer::start_trace / TraceContext::start: trace becomes active, stack = [trace id]
// - span/generation/event/...: observations created under the stack top
// - end (or drop of the root context): open observations are finalized and the
//   export set goes to every sink exactly once

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::collections::{BTreeMap, HashMap, HashSet};
use std::fmt;
use std::sync::{Arc, Mutex, MutexGuard};
use tracing::debug;

use crate::builder::{ObservationBuilder, ObservationSpec};
use crate::error::{Result, TraceError};
use crate::guard::ScopeGuard;
use crate::handle::ObservationHandle;
use crate::observation::{Level, Observation, ObservationKind, ObservationPayload};
use crate::sink::export_set;
use crate::stack::ParentContextStack;
use crate::tracer::Runtime;

/// Root record of one logical execution
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TraceRecord {
    pub id: String,
    pub name: String,
    pub start_time: DateTime<Utc>,
    pub end_time: Option<DateTime<Utc>>,
    pub user_id: Option<String>,
    pub session_id: Option<String>,
    pub tags: Vec<String>,
    pub environment: Option<String>,
    pub release: Option<String>,
    pub version: Option<String>,
    pub metadata: BTreeMap<String, serde_json::Value>,
    pub public: Option<bool>,
    pub level: Level,
    /// First input written anywhere in the trace; immutable once set
    pub input: Option<serde_json::Value>,
    /// Most recent output written anywhere in the trace
    pub output: Option<serde_json::Value>,
    pub excluded: bool,
}

impl TraceRecord {
    #[cfg(test)]
    pub(crate) fn test_record(id: &str) -> Self {
        Self {
            id: id.to_string(),
            name: id.to_string(),
            start_time: Utc::now(),
            end_time: None,
            user_id: None,
            session_id: None,
            tags: Vec::new(),
            environment: None,
            release: None,
            version: None,
            metadata: BTreeMap::new(),
            public: None,
            level: Level::Default,
            input: None,
            output: None,
            excluded: false,
        }
    }
}

/// Options for starting a trace
#[derive(Debug, Clone, Default)]
pub struct TraceOptions {
    pub name: String,
    pub user_id: Option<String>,
    pub session_id: Option<String>,
    pub tags: Vec<String>,
    pub environment: Option<String>,
    pub release: Option<String>,
    pub version: Option<String>,
    pub metadata: BTreeMap<String, serde_json::Value>,
    pub public: Option<bool>,
    pub input: Option<serde_json::Value>,
}

impl TraceOptions {
    pub fn new(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            ..Default::default()
        }
    }

    pub fn user_id(mut self, user_id: impl Into<String>) -> Self {
        self.user_id = Some(user_id.into());
        self
    }

    pub fn session_id(mut self, session_id: impl Into<String>) -> Self {
        self.session_id = Some(session_id.into());
        self
    }

    pub fn tag(mut self, tag: impl Into<String>) -> Self {
        self.tags.push(tag.into());
        self
    }

    pub fn environment(mut self, environment: impl Into<String>) -> Self {
        self.environment = Some(environment.into());
        self
    }

    pub fn release(mut self, release: impl Into<String>) -> Self {
        self.release = Some(release.into());
        self
    }

    pub fn version(mut self, version: impl Into<String>) -> Self {
        self.version = Some(version.into());
        self
    }

    pub fn metadata(mut self, key: impl Into<String>, value: impl Into<serde_json::Value>) -> Self {
        self.metadata.insert(key.into(), value.into());
        self
    }

    pub fn public(mut self, public: bool) -> Self {
        self.public = Some(public);
        self
    }

    pub fn input(mut self, input: impl Into<serde_json::Value>) -> Self {
        self.input = Some(input.into());
        self
    }
}

// ============================================================================
// Shared trace state
// ============================================================================

pub(crate) struct Entry {
    pub observation: Observation,
    pub updated: bool,
    /// Set at trace end: true if exported, false if excluded
    pub exported: Option<bool>,
}

pub(crate) struct TraceState {
    pub record: TraceRecord,
    pub entries: Vec<Entry>,
    pub index: HashMap<String, usize>,
    pub ended: bool,
}

impl TraceState {
    /// Record an observation input and seed the trace input if still unset
    pub(crate) fn propagate_input(&mut self, index: usize, value: serde_json::Value) {
        self.entries[index].observation.input = Some(value.clone());
        if self.record.input.is_none() {
            self.record.input = Some(value);
        }
    }

    /// Record an observation output on it, every ancestor and the trace
    pub(crate) fn propagate_output(&mut self, index: usize, value: serde_json::Value) {
        self.entries[index].observation.output = Some(value.clone());

        let mut parent = self.entries[index].observation.parent_id.clone();
        let mut hops = 0;
        while let Some(&i) = self.index.get(&parent) {
            if hops >= self.entries.len() {
                break;
            }
            let ancestor = &mut self.entries[i];
            ancestor.observation.output = Some(value.clone());
            ancestor.updated = true;
            parent = ancestor.observation.parent_id.clone();
            hops += 1;
        }

        self.record.output = Some(value);
    }
}

pub(crate) struct TraceShared {
    pub runtime: Arc<Runtime>,
    state: Mutex<TraceState>,
}

impl TraceShared {
    fn new(runtime: Arc<Runtime>, record: TraceRecord) -> Self {
        Self {
            runtime,
            state: Mutex::new(TraceState {
                record,
                entries: Vec::new(),
                index: HashMap::new(),
                ended: false,
            }),
        }
    }

    pub(crate) fn lock(&self) -> MutexGuard<'_, TraceState> {
        self.state.lock().unwrap_or_else(|e| e.into_inner())
    }

    pub(crate) fn is_ended(&self) -> bool {
        self.lock().ended
    }

    fn insert(&self, observation: Observation) -> Result<()> {
        let mut state = self.lock();
        if state.ended {
            return Err(TraceError::NoActiveTrace);
        }
        let index = state.entries.len();
        state.index.insert(observation.id.clone(), index);
        state.entries.push(Entry {
            observation,
            updated: false,
            exported: None,
        });
        Ok(())
    }

    /// Mutate one observation; ignored once the trace has been exported
    pub(crate) fn update<R>(
        &self,
        id: &str,
        f: impl FnOnce(&mut TraceState, usize) -> R,
    ) -> Option<R> {
        let mut state = self.lock();
        if state.ended {
            debug!(observation_id = %id, "Ignoring update on an ended trace");
            return None;
        }
        let index = *state.index.get(id)?;
        state.entries[index].updated = true;
        Some(f(&mut *state, index))
    }

    /// Mutate the trace record; ignored once the trace has been exported
    fn update_record(&self, f: impl FnOnce(&mut TraceRecord)) {
        let mut state = self.lock();
        if state.ended {
            debug!(trace_id = %state.record.id, "Ignoring trace update on an ended trace");
            return;
        }
        f(&mut state.record);
    }

    /// Finalize and export; returns false if the trace had already ended
    pub(crate) fn end(&self) -> bool {
        let finished = {
            let mut guard = self.lock();
            let state = &mut *guard;
            if state.ended {
                return false;
            }
            state.ended = true;

            let now = self.runtime.clock.now();
            for entry in state.entries.iter_mut() {
                entry.observation.finalize(now);
            }
            if state.record.end_time.is_none() {
                state.record.end_time = Some(now);
            }

            let observations: Vec<Observation> = state
                .entries
                .iter()
                .map(|e| e.observation.clone())
                .collect();
            let finished = export_set(
                &state.record,
                &observations,
                self.runtime.config.skip_propagation,
            );

            {
                let exported: HashSet<&str> = finished
                    .as_ref()
                    .map(|f| f.observations.iter().map(|o| o.id.as_str()).collect())
                    .unwrap_or_default();
                for entry in state.entries.iter_mut() {
                    entry.exported = Some(exported.contains(entry.observation.id.as_str()));
                }

                debug!(
                    trace_id = %state.record.id,
                    observations = state.entries.len(),
                    exported = exported.len(),
                    "Trace ended"
                );
            }
            finished
        };

        match finished {
            Some(finished) => self.runtime.dispatch(&finished),
            None => debug!("Trace skipped; nothing exported"),
        }
        true
    }
}

// ============================================================================
// TraceContext
// ============================================================================

#[derive(Clone)]
pub(crate) struct Flow {
    pub trace_id: String,
    pub trace: Arc<TraceShared>,
    pub stack: Arc<Mutex<ParentContextStack>>,
}

impl Flow {
    pub(crate) fn lock_stack(&self) -> MutexGuard<'_, ParentContextStack> {
        self.stack.lock().unwrap_or_else(|e| e.into_inner())
    }
}

/// One flow of control inside a trace
///
/// Not meant for uncoordinated concurrent use: the parent stack follows the
/// nesting of a single flow. Concurrent sub-tasks should either pass an
/// explicit parent id or work on a [`TraceContext::fork`].
pub struct TraceContext {
    runtime: Arc<Runtime>,
    flow: Option<Flow>,
    is_fork: bool,
}

impl fmt::Debug for TraceContext {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("TraceContext")
            .field("trace_id", &self.flow.as_ref().map(|fl| &fl.trace_id))
            .field("active", &self.is_active())
            .field("is_fork", &self.is_fork)
            .finish()
    }
}

impl TraceContext {
    pub(crate) fn inactive(runtime: Arc<Runtime>) -> Self {
        Self {
            runtime,
            flow: None,
            is_fork: false,
        }
    }

    /// Start a trace on this context
    pub fn start(&mut self, options: TraceOptions) -> Result<()> {
        if self.is_active() {
            return Err(TraceError::AlreadyActive);
        }

        let config = &self.runtime.config;
        let id = self.runtime.ids.new_id();
        let record = TraceRecord {
            id: id.clone(),
            name: options.name,
            start_time: self.runtime.clock.now(),
            end_time: None,
            user_id: options.user_id,
            session_id: options.session_id,
            tags: options.tags,
            environment: options.environment.or_else(|| config.environment.clone()),
            release: options.release.or_else(|| config.release.clone()),
            version: options.version.or_else(|| config.version.clone()),
            metadata: options.metadata,
            public: options.public,
            level: Level::Default,
            input: options.input,
            output: None,
            excluded: false,
        };

        debug!(trace_id = %id, name = %record.name, "Trace started");

        self.flow = Some(Flow {
            trace_id: id.clone(),
            trace: Arc::new(TraceShared::new(self.runtime.clone(), record)),
            stack: Arc::new(Mutex::new(ParentContextStack::rooted(id))),
        });
        self.is_fork = false;
        Ok(())
    }

    pub fn is_active(&self) -> bool {
        self.active_flow().is_ok()
    }

    pub fn is_fork(&self) -> bool {
        self.is_fork
    }

    pub(crate) fn active_flow(&self) -> Result<&Flow> {
        match &self.flow {
            Some(flow) if !flow.trace.is_ended() => Ok(flow),
            _ => Err(TraceError::NoActiveTrace),
        }
    }

    /// Id of the current (or last) trace on this context
    pub fn trace_id(&self) -> Option<&str> {
        self.flow.as_ref().map(|f| f.trace_id.as_str())
    }

    /// Parent that the next observation without an explicit parent will get
    pub fn current_parent(&self) -> Result<String> {
        let flow = self.active_flow()?;
        let stack = flow.lock_stack();
        stack.peek().map(str::to_string)
    }

    /// Number of open entries on this flow's stack, including the trace root
    pub fn stack_depth(&self) -> usize {
        self.flow
            .as_ref()
            .map(|f| f.lock_stack().len())
            .unwrap_or(0)
    }

    /// Independent flow over the same trace, starting from the current stack
    ///
    /// A fork never ends the trace: dropping it or calling `end()` on it only
    /// detaches the fork. The context that started the trace ends it.
    pub fn fork(&self) -> Result<TraceContext> {
        let flow = self.active_flow()?;
        let stack = flow.lock_stack().clone();
        Ok(TraceContext {
            runtime: self.runtime.clone(),
            flow: Some(Flow {
                trace_id: flow.trace_id.clone(),
                trace: flow.trace.clone(),
                stack: Arc::new(Mutex::new(stack)),
            }),
            is_fork: true,
        })
    }

    /// End the trace and export it; no-op if already ended or never started
    ///
    /// On a fork this only detaches the fork from the trace.
    pub fn end(&mut self) {
        if self.is_fork {
            if let Some(flow) = self.flow.take() {
                flow.lock_stack().clear();
            }
            return;
        }
        if let Some(flow) = &self.flow {
            flow.trace.end();
            flow.lock_stack().clear();
        }
    }

    /// Snapshot of the trace record
    pub fn record(&self) -> Option<TraceRecord> {
        self.flow.as_ref().map(|f| f.trace.lock().record.clone())
    }

    /// Snapshot of all observations in creation order
    pub fn observations(&self) -> Vec<Observation> {
        self.flow
            .as_ref()
            .map(|f| {
                f.trace
                    .lock()
                    .entries
                    .iter()
                    .map(|e| e.observation.clone())
                    .collect()
            })
            .unwrap_or_default()
    }

    /// Handle to an existing observation of this trace
    pub fn observation(&self, id: &str) -> Option<ObservationHandle> {
        let flow = self.flow.as_ref()?;
        let kind = {
            let state = flow.trace.lock();
            let index = *state.index.get(id)?;
            state.entries[index].observation.kind()
        };
        Some(ObservationHandle::new(
            flow.trace.clone(),
            id.to_string(),
            flow.trace_id.clone(),
            kind,
        ))
    }

    // ------------------------------------------------------------------------
    // Trace-level mutations (never fail; ignored when inactive)
    // ------------------------------------------------------------------------

    fn with_record(&self, f: impl FnOnce(&mut TraceRecord)) {
        if let Some(flow) = &self.flow {
            flow.trace.update_record(f);
        }
    }

    pub fn set_name(&self, name: impl Into<String>) {
        let name = name.into();
        self.with_record(|r| r.name = name);
    }

    pub fn set_user_id(&self, user_id: impl Into<String>) {
        let user_id = user_id.into();
        self.with_record(|r| r.user_id = Some(user_id));
    }

    pub fn set_session_id(&self, session_id: impl Into<String>) {
        let session_id = session_id.into();
        self.with_record(|r| r.session_id = Some(session_id));
    }

    pub fn add_tag(&self, tag: impl Into<String>) {
        let tag = tag.into();
        self.with_record(|r| {
            if !r.tags.contains(&tag) {
                r.tags.push(tag);
            }
        });
    }

    pub fn set_metadata(&self, key: impl Into<String>, value: impl Into<serde_json::Value>) {
        let (key, value) = (key.into(), value.into());
        self.with_record(|r| {
            r.metadata.insert(key, value);
        });
    }

    pub fn set_level(&self, level: Level) {
        self.with_record(|r| r.level = level);
    }

    /// Set the trace input unless one was already recorded
    pub fn set_input(&self, input: impl Into<serde_json::Value>) {
        let input = input.into();
        self.with_record(|r| {
            if r.input.is_none() {
                r.input = Some(input);
            }
        });
    }

    pub fn set_output(&self, output: impl Into<serde_json::Value>) {
        let output = output.into();
        self.with_record(|r| r.output = Some(output));
    }

    /// Exclude the trace and every observation in it from export
    pub fn skip_trace(&self) {
        self.with_record(|r| {
            debug!(trace_id = %r.id, "Trace marked as skipped");
            r.excluded = true;
        });
    }

    pub fn is_skipped(&self) -> bool {
        self.flow
            .as_ref()
            .map(|f| f.trace.lock().record.excluded)
            .unwrap_or(false)
    }

    // ------------------------------------------------------------------------
    // Observation factory
    // ------------------------------------------------------------------------

    pub fn create(&self, name: impl Into<String>, payload: ObservationPayload) -> ObservationBuilder<'_> {
        ObservationBuilder::new(self, name.into(), payload)
    }

    pub fn span(&self, name: impl Into<String>) -> ObservationBuilder<'_> {
        self.create(name, ObservationPayload::span())
    }

    pub fn generation(&self, name: impl Into<String>, model: impl Into<String>) -> ObservationBuilder<'_> {
        self.create(name, ObservationPayload::generation(model))
    }

    pub fn event(&self, name: impl Into<String>) -> ObservationBuilder<'_> {
        self.create(name, ObservationPayload::Event)
    }

    pub fn tool_call(&self, name: impl Into<String>, tool_name: impl Into<String>) -> ObservationBuilder<'_> {
        self.create(name, ObservationPayload::tool_call(tool_name))
    }

    pub fn embedding(&self, name: impl Into<String>, model: impl Into<String>) -> ObservationBuilder<'_> {
        self.create(name, ObservationPayload::embedding(model))
    }

    pub fn agent(&self, name: impl Into<String>, agent_id: impl Into<String>) -> ObservationBuilder<'_> {
        self.create(name, ObservationPayload::agent(agent_id))
    }

    pub(crate) fn create_handle(&self, spec: ObservationSpec) -> Result<ObservationHandle> {
        self.create_observation(spec, false).map(|(handle, _)| handle)
    }

    pub(crate) fn create_scoped(&self, spec: ObservationSpec) -> Result<ScopeGuard> {
        let (handle, stack) = self.create_observation(spec, true)?;
        Ok(ScopeGuard::new(handle, stack))
    }

    fn create_observation(
        &self,
        spec: ObservationSpec,
        scoped: bool,
    ) -> Result<(ObservationHandle, Arc<Mutex<ParentContextStack>>)> {
        let flow = self.active_flow()?;
        let runtime = &flow.trace.runtime;

        let mut stack = flow.lock_stack();
        let parent_id = match spec.parent {
            Some(parent) => parent,
            None => stack.peek()?.to_string(),
        };

        let id = runtime.ids.new_id();
        let kind = spec.payload.kind();
        let start_time = spec.start_time.unwrap_or_else(|| runtime.clock.now());
        // Unscoped events are point-in-time records
        let end_time = (kind == ObservationKind::Event && !scoped).then_some(start_time);

        flow.trace.insert(Observation {
            id: id.clone(),
            trace_id: flow.trace_id.clone(),
            parent_id: parent_id.clone(),
            name: spec.name,
            start_time,
            end_time,
            input: None,
            output: None,
            metadata: spec.metadata,
            level: spec.level,
            status_message: spec.status_message,
            version: spec.version,
            excluded: false,
            payload: spec.payload,
        })?;

        if scoped {
            stack.push(id.clone());
        }
        drop(stack);

        debug!(
            trace_id = %flow.trace_id,
            observation_id = %id,
            parent_id = %parent_id,
            kind = %kind,
            scoped,
            "Observation created"
        );

        let handle = ObservationHandle::new(flow.trace.clone(), id, flow.trace_id.clone(), kind);
        if let Some(input) = spec.input {
            handle.set_input(input);
        }
        if let Some(output) = spec.output {
            handle.set_output(output);
        }
        Ok((handle, flow.stack.clone()))
    }
}

impl Drop for TraceContext {
    fn drop(&mut self) {
        if !self.is_fork && self.is_active() {
            self.end();
        }
    }
}
