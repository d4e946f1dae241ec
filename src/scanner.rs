//! Loop-head scanner
//!
//! Finds the iteration construct's source expression in a compiled loop
//! script and watches for the moment its evaluation exits. Until then the
//! head is still resolving which collection is involved, so nothing may be
//! observed; afterwards the reads collected along the way name the storage
//! locations to watch.
//!
//! The watch is one-shot: it reports [`HeadPhase::Ready`] exactly once per
//! directive and ignores every later evaluation.

use crate::ast::{ExprId, LoopScript};
use crate::eval::{EvaluationListener, ObservableBinding};
use crate::value::Value;

/// Result of scanning one head evaluation
#[derive(Debug)]
pub enum HeadPhase {
    /// The source expression has not exited yet
    ResolvingSource,
    /// The source expression exited; these locations should be observed
    Ready(Vec<ObservableBinding>),
}

/// The node whose exit means the iterated collection is fully known
pub fn find_iteration_source(script: &LoopScript) -> ExprId {
    script.head.source.id
}

/// One-shot listener keyed to the exit of the iteration source node
#[derive(Debug)]
pub struct SourceWatch {
    target: ExprId,
    armed: bool,
    collected: Vec<ObservableBinding>,
    ready: Option<Vec<ObservableBinding>>,
}

impl SourceWatch {
    pub fn new(script: &LoopScript) -> Self {
        Self {
            target: find_iteration_source(script),
            armed: true,
            collected: Vec::new(),
            ready: None,
        }
    }

    /// Still waiting for the source node to exit
    pub fn is_armed(&self) -> bool {
        self.armed
    }

    /// Take the result of the last evaluation.
    /// Yields `Ready` once, then `ResolvingSource` forever after.
    pub fn take_phase(&mut self) -> HeadPhase {
        match self.ready.take() {
            Some(bindings) => HeadPhase::Ready(bindings),
            None => HeadPhase::ResolvingSource,
        }
    }
}

impl EvaluationListener for SourceWatch {
    fn observed(&mut self, binding: ObservableBinding) {
        if self.armed {
            self.collected.push(binding);
        }
    }

    fn exited(&mut self, node: ExprId, _value: &Value) {
        if self.armed && node == self.target {
            self.armed = false;
            self.ready = Some(std::mem::take(&mut self.collected));
        }
    }
}
