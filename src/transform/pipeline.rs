//! The run loop: datasource in, node tuples out
//!
//! A run is a single-pass pull over one datasource. [`Pipeline::start`]
//! gives the lazy iterator; [`Pipeline::run`] drives it into a sink.

use super::cancel::CancellationToken;
use super::context::{PipelineContext, RunTotals};
use super::dispatch::{Dispatcher, Family};
use super::graph_sink::GraphBuilder;
use super::sink::{EmitResult, GraphSink, SinkError};
use super::types::NodeTuple;
use crate::datasource::{Datasource, DatasourceError, EventStream};
use crate::graph::{Graph, GraphMetadata, Process};
use serde_json::{Map, Value};
use thiserror::Error;
use tracing::{debug, info, warn};

/// Run-level failures. Per-event problems never surface here.
#[derive(Debug, Error)]
pub enum PipelineError {
    #[error(transparent)]
    Datasource(#[from] DatasourceError),
    #[error(transparent)]
    Sink(#[from] SinkError),
}

/// What a finished run reports back
#[derive(Debug, Clone)]
pub struct RunSummary {
    pub source: String,
    pub family: Family,
    pub totals: RunTotals,
    pub emitted: EmitResult,
    /// The datasource's side-channel metadata, read once per run
    pub metadata: Map<String, Value>,
    pub cancelled: bool,
}

pub struct Pipeline {
    dispatcher: Dispatcher,
    cancel: CancellationToken,
    root_override: Option<Process>,
}

impl Pipeline {
    pub fn new(family: Family) -> Self {
        Self::with_dispatcher(Dispatcher::for_family(family))
    }

    pub fn with_dispatcher(dispatcher: Dispatcher) -> Self {
        Self {
            dispatcher,
            cancel: CancellationToken::new(),
            root_override: None,
        }
    }

    pub fn with_cancellation(mut self, cancel: CancellationToken) -> Self {
        self.cancel = cancel;
        self
    }

    /// Use this root process instead of whatever the datasource provides
    pub fn with_root_process(mut self, root: Process) -> Self {
        self.root_override = Some(root);
        self
    }

    pub fn dispatcher(&self) -> &Dispatcher {
        &self.dispatcher
    }

    pub fn cancellation(&self) -> &CancellationToken {
        &self.cancel
    }

    /// Open the datasource and return a lazy run over its events.
    ///
    /// The root process is resolved here, once, before the first event.
    pub fn start<'a>(&'a self, source: &'a dyn Datasource) -> Result<Run<'a>, PipelineError> {
        if source.family() != self.dispatcher.family() {
            warn!(
                source = source.name(),
                source_family = %source.family(),
                family = %self.dispatcher.family(),
                "datasource family differs from the pipeline's"
            );
        }

        let events = source.events()?;
        let mut ctx = PipelineContext::new();
        ctx.set_root_process(
            self.root_override
                .clone()
                .or_else(|| source.root_process()),
        );

        info!(
            source = source.name(),
            family = %self.dispatcher.family(),
            root = ctx.root_process().map(|p| p.image.as_str()),
            "starting run"
        );

        Ok(Run {
            source,
            dispatcher: &self.dispatcher,
            events,
            ctx,
            cancel: self.cancel.clone(),
            cancelled: false,
            failed: None,
        })
    }

    /// Drive a whole run into `sink`.
    ///
    /// A sink failure, or a datasource failing mid-stream, ends the run with
    /// an error. Tuples already emitted stay in the sink.
    pub async fn run(
        &self,
        source: &dyn Datasource,
        sink: &dyn GraphSink,
    ) -> Result<RunSummary, PipelineError> {
        let mut run = self.start(source)?;
        let mut emitted = EmitResult::empty();
        while let Some(tuple) = run.next() {
            emitted.accumulate(sink.emit(tuple).await?);
        }
        if let Some(err) = run.failed.take() {
            return Err(err.into());
        }
        Ok(run.finish(emitted))
    }

    /// Run into a fresh in-memory graph annotated with the run's metadata
    pub async fn build_graph(
        &self,
        source: &dyn Datasource,
    ) -> Result<(Graph, RunSummary), PipelineError> {
        let builder = GraphBuilder::new();
        let summary = self.run(source, &builder).await?;
        builder.annotate(GraphMetadata {
            created_at: None,
            source: Some(summary.source.clone()),
            family: Some(summary.family.to_string()),
            datasource: summary.metadata.clone(),
        });
        Ok((builder.into_graph(), summary))
    }
}

impl std::fmt::Debug for Pipeline {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Pipeline")
            .field("dispatcher", &self.dispatcher)
            .field("cancelled", &self.cancel.is_cancelled())
            .finish()
    }
}

/// One pass over a datasource. Yields only non-empty tuples.
pub struct Run<'a> {
    source: &'a dyn Datasource,
    dispatcher: &'a Dispatcher,
    events: EventStream<'a>,
    ctx: PipelineContext,
    cancel: CancellationToken,
    cancelled: bool,
    failed: Option<DatasourceError>,
}

impl<'a> Run<'a> {
    pub fn context(&self) -> &PipelineContext {
        &self.ctx
    }

    pub fn totals(&self) -> RunTotals {
        self.ctx.totals
    }

    pub fn is_cancelled(&self) -> bool {
        self.cancelled
    }

    /// The datasource error that stopped this run early, if any
    pub fn failure(&self) -> Option<&DatasourceError> {
        self.failed.as_ref()
    }

    /// Close the run and report what it did
    pub fn finish(self, emitted: EmitResult) -> RunSummary {
        let totals = self.ctx.totals;
        info!(
            source = self.source.name(),
            events = totals.events_seen,
            tuples = totals.tuples_emitted,
            skipped = totals.skipped(),
            filtered = totals.filtered,
            cancelled = self.cancelled,
            "run finished"
        );
        RunSummary {
            source: self.source.name().to_string(),
            family: self.dispatcher.family(),
            totals,
            emitted,
            metadata: self.source.metadata(),
            cancelled: self.cancelled,
        }
    }
}

impl Iterator for Run<'_> {
    type Item = NodeTuple;

    fn next(&mut self) -> Option<NodeTuple> {
        loop {
            if self.cancelled || self.failed.is_some() {
                return None;
            }
            if self.cancel.is_cancelled() {
                info!(source = self.source.name(), "run cancelled");
                self.cancelled = true;
                return None;
            }

            let record = match self.events.next()? {
                Ok(record) => record,
                Err(err) => {
                    self.ctx.totals.faulty_records += 1;
                    if err.is_fatal() {
                        warn!(error = %err, "datasource failed mid-run");
                        self.failed = Some(err);
                        return None;
                    }
                    debug!(error = %err, "skipping faulty record");
                    continue;
                }
            };

            let tuple = self.dispatcher.dispatch(&record, &mut self.ctx);
            if !tuple.is_empty() {
                return Some(tuple);
            }
        }
    }
}
