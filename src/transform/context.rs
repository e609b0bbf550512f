//! Per-run pipeline state
//!
//! One context per datasource run. It is threaded explicitly through every
//! handler so independent runs never share state.

use crate::graph::Process;
use serde::{Deserialize, Serialize};

/// Running counters for one run
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct RunTotals {
    /// Events pulled from the datasource
    pub events_seen: usize,
    /// Non-empty tuples handed downstream
    pub tuples_emitted: usize,
    pub nodes_emitted: usize,
    /// Events dropped for a missing required field
    pub skipped_incomplete: usize,
    /// Events whose kind no handler knows
    pub skipped_unknown: usize,
    /// Events a handler recognized but deliberately produced nothing for
    pub filtered: usize,
    /// Records the datasource could not decode
    pub faulty_records: usize,
}

impl RunTotals {
    /// Everything that did not make it into the graph
    pub fn skipped(&self) -> usize {
        self.skipped_incomplete + self.skipped_unknown + self.faulty_records
    }
}

#[derive(Debug, Clone, Default)]
pub struct PipelineContext {
    root_process: Option<Process>,
    pub totals: RunTotals,
}

impl PipelineContext {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_root_process(mut self, root: Process) -> Self {
        self.root_process = Some(root);
        self
    }

    /// Resolved once at run start; never replaced mid-run
    pub fn root_process(&self) -> Option<&Process> {
        self.root_process.as_ref()
    }

    pub(crate) fn set_root_process(&mut self, root: Option<Process>) {
        if self.root_process.is_none() {
            self.root_process = root;
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn root_process_is_resolved_once() {
        let mut ctx = PipelineContext::new().with_root_process(Process::new("a.exe", "\\"));
        ctx.set_root_process(Some(Process::new("b.exe", "\\")));
        assert_eq!(ctx.root_process().unwrap().image, "a.exe");
    }

    #[test]
    fn skipped_sums_every_drop_reason() {
        let totals = RunTotals {
            skipped_incomplete: 2,
            skipped_unknown: 3,
            faulty_records: 1,
            filtered: 7,
            ..Default::default()
        };
        assert_eq!(totals.skipped(), 6);
    }
}
