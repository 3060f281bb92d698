// Tracer
//
// Entry point: owns the injected clock, id generator, sinks and config that
// every trace started from it shares. Cloning is cheap.

use std::fmt;
use std::sync::Arc;
use tracing::{debug, warn};

use crate::clock::{Clock, IdGenerator, SystemClock, UuidIdGenerator};
use crate::config::TracerConfig;
use crate::sink::{FinishedTrace, ObservationSink};
use crate::trace::{TraceContext, TraceOptions};

pub(crate) struct Runtime {
    pub clock: Arc<dyn Clock>,
    pub ids: Arc<dyn IdGenerator>,
    pub sinks: Vec<Arc<dyn ObservationSink>>,
    pub config: TracerConfig,
}

impl Runtime {
    /// Hand a finished trace to every sink; failures are logged, never raised
    pub(crate) fn dispatch(&self, finished: &FinishedTrace) {
        for sink in &self.sinks {
            match sink.export(finished) {
                Ok(()) => debug!(
                    sink = sink.name(),
                    trace_id = %finished.trace.id,
                    observations = finished.observations.len(),
                    "Trace exported"
                ),
                Err(e) => warn!(
                    sink = sink.name(),
                    trace_id = %finished.trace.id,
                    error = %e,
                    "Failed to export trace"
                ),
            }
        }
    }
}

#[derive(Clone)]
pub struct Tracer {
    runtime: Arc<Runtime>,
}

impl fmt::Debug for Tracer {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let sinks: Vec<&str> = self.runtime.sinks.iter().map(|s| s.name()).collect();
        f.debug_struct("Tracer")
            .field("sinks", &sinks)
            .field("config", &self.runtime.config)
            .finish()
    }
}

impl Default for Tracer {
    fn default() -> Self {
        Self::new()
    }
}

impl Tracer {
    /// Tracer with the wall clock, UUID ids and no sinks
    pub fn new() -> Self {
        Self::builder().build()
    }

    pub fn builder() -> TracerBuilder {
        TracerBuilder::default()
    }

    pub fn config(&self) -> &TracerConfig {
        &self.runtime.config
    }

    /// Context for one logical flow; inactive until `start` is called
    pub fn context(&self) -> TraceContext {
        TraceContext::inactive(self.runtime.clone())
    }

    /// Context with a freshly started trace
    pub fn start_trace(&self, options: TraceOptions) -> TraceContext {
        let mut context = self.context();
        // A fresh context is never active, so start cannot fail
        let _ = context.start(options);
        context
    }
}

#[derive(Default)]
pub struct TracerBuilder {
    clock: Option<Arc<dyn Clock>>,
    ids: Option<Arc<dyn IdGenerator>>,
    sinks: Vec<Arc<dyn ObservationSink>>,
    config: TracerConfig,
}

impl TracerBuilder {
    pub fn clock(mut self, clock: impl Clock + 'static) -> Self {
        self.clock = Some(Arc::new(clock));
        self
    }

    pub fn id_generator(mut self, ids: impl IdGenerator + 'static) -> Self {
        self.ids = Some(Arc::new(ids));
        self
    }

    /// Add a sink; every finished trace goes to all sinks in order
    pub fn sink(mut self, sink: Arc<dyn ObservationSink>) -> Self {
        self.sinks.push(sink);
        self
    }

    pub fn config(mut self, config: TracerConfig) -> Self {
        self.config = config;
        self
    }

    pub fn build(self) -> Tracer {
        Tracer {
            runtime: Arc::new(Runtime {
                clock: self.clock.unwrap_or_else(|| Arc::new(SystemClock)),
                ids: self.ids.unwrap_or_else(|| Arc::new(UuidIdGenerator)),
                sinks: self.sinks,
                config: self.config,
            }),
        }
    }
}
