//! Directive configuration

use std::rc::Rc;

use serde::{Deserialize, Serialize};

use crate::dom::DocumentRef;
use crate::element::Interpreters;
use crate::error::LoopError;
use crate::scheduler::{Scheduler, TrampolineScheduler};

/// Attribute names and styles used by loop directives
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default, rename_all = "camelCase")]
pub struct LoopOptions {
    /// Attribute carrying the loop head, e.g. `for="item of bind(items)"`
    pub attribute: String,
    /// Name of the per-element interpreter run for every rendered element
    pub element_interpreter: String,
    /// Attribute marking elements whose text is an expression
    pub bind_attribute: String,
    /// Inline style applied to elements a check pass filtered out
    pub hidden_style: String,
}

impl Default for LoopOptions {
    fn default() -> Self {
        Self {
            attribute: "for".to_string(),
            element_interpreter: "evaluate-element".to_string(),
            bind_attribute: "bind".to_string(),
            hidden_style: "display: none".to_string(),
        }
    }
}

impl LoopOptions {
    /// Missing keys keep their defaults
    pub fn from_json(json: &serde_json::Value) -> Result<Self, LoopError> {
        serde_json::from_value(json.clone())
            .map_err(|e| LoopError::type_error(format!("invalid loop options: {}", e)))
    }
}

/// Shared context handed to every directive and per-element evaluator
#[derive(Clone)]
pub struct EvaluationConfig {
    pub document: DocumentRef,
    pub interpreters: Interpreters,
    pub scheduler: Rc<dyn Scheduler>,
    pub options: Rc<LoopOptions>,
}

impl EvaluationConfig {
    /// Default options, the built-in element interpreter and a trampoline scheduler
    pub fn new(document: DocumentRef) -> Self {
        let options = LoopOptions::default();
        Self {
            document,
            interpreters: Interpreters::with_defaults(&options),
            scheduler: TrampolineScheduler::shared(),
            options: Rc::new(options),
        }
    }

    pub fn with_scheduler(mut self, scheduler: Rc<dyn Scheduler>) -> Self {
        self.scheduler = scheduler;
        self
    }

    pub fn with_interpreters(mut self, interpreters: Interpreters) -> Self {
        self.interpreters = interpreters;
        self
    }

    /// Replace the options; the built-in interpreter is re-registered under
    /// the new `element_interpreter` name if that name is not taken yet
    pub fn with_options(mut self, options: LoopOptions) -> Self {
        self.interpreters.register_default(&options);
        self.options = Rc::new(options);
        self
    }
}

impl std::fmt::Debug for EvaluationConfig {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("EvaluationConfig")
            .field("options", &self.options)
            .field("interpreters", &self.interpreters)
            .finish_non_exhaustive()
    }
}
