//! Per-element evaluators
//!
//! A loop directive renders one clone of its template per item and hands it
//! to a named [`ElementEvaluator`]. The evaluator may finish synchronously or
//! hold on to `done` and call it later; the directive does not advance its
//! queue until `done` has been called.

use std::rc::Rc;

use tracing::{debug, trace};

use crate::config::{EvaluationConfig, LoopOptions};
use crate::dom::NodeId;
use crate::env::Environment;
use crate::error::LoopError;
use crate::eval::evaluate_expression;
use crate::parser::compile_expression;
use crate::prelude::FxHashMap;

/// Completion callback; must be called exactly once
pub type Completion = Box<dyn FnOnce(Result<(), LoopError>)>;

pub trait ElementEvaluator {
    fn evaluate(
        &self,
        element: NodeId,
        env: &Environment,
        config: &EvaluationConfig,
        done: Completion,
    );
}

/// Closures work as evaluators
impl<F> ElementEvaluator for F
where
    F: Fn(NodeId, &Environment, &EvaluationConfig, Completion),
{
    fn evaluate(
        &self,
        element: NodeId,
        env: &Environment,
        config: &EvaluationConfig,
        done: Completion,
    ) {
        self(element, env, config, done)
    }
}

/// Named evaluators available to directives
#[derive(Clone, Default)]
pub struct Interpreters {
    evaluators: FxHashMap<String, Rc<dyn ElementEvaluator>>,
}

impl Interpreters {
    pub fn new() -> Self {
        Self::default()
    }

    /// Registry holding [`BindTextEvaluator`] under the configured name
    pub fn with_defaults(options: &LoopOptions) -> Self {
        let mut interpreters = Self::new();
        interpreters.register_default(options);
        interpreters
    }

    pub(crate) fn register_default(&mut self, options: &LoopOptions) {
        if !self.evaluators.contains_key(&options.element_interpreter) {
            self.register(options.element_interpreter.clone(), BindTextEvaluator);
        }
    }

    pub fn register(&mut self, name: impl Into<String>, evaluator: impl ElementEvaluator + 'static) {
        let name = name.into();
        debug!(%name, "registering element evaluator");
        self.evaluators.insert(name, Rc::new(evaluator));
    }

    pub fn get(&self, name: &str) -> Result<Rc<dyn ElementEvaluator>, LoopError> {
        self.evaluators
            .get(name)
            .cloned()
            .ok_or_else(|| LoopError::UnknownInterpreter {
                name: name.to_string(),
            })
    }

    pub fn names(&self) -> Vec<&str> {
        let mut names: Vec<&str> = self.evaluators.keys().map(String::as_str).collect();
        names.sort_unstable();
        names
    }
}

impl std::fmt::Debug for Interpreters {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_list().entries(self.names()).finish()
    }
}

/// Fills bound text.
///
/// Every node in the element's subtree carrying the bind attribute gets its
/// text replaced by the value of an expression evaluated in the element
/// environment. The expression is the attribute value, or the node's text
/// when the attribute is empty: `<li bind="row.title"></li>` and
/// `<li bind>row.title</li>` render the same.
#[derive(Debug, Clone, Copy, Default)]
pub struct BindTextEvaluator;

impl BindTextEvaluator {
    fn render(
        &self,
        element: NodeId,
        env: &Environment,
        config: &EvaluationConfig,
    ) -> Result<(), LoopError> {
        let attribute = config.options.bind_attribute.as_str();
        let targets: Vec<(NodeId, String)> = {
            let doc = config.document.borrow();
            doc.descendants(element)
                .into_iter()
                .filter_map(|node| {
                    let source = doc.attribute(node, attribute)?;
                    let source = if source.trim().is_empty() {
                        doc.text_content(node)
                    } else {
                        source.to_string()
                    };
                    Some((node, source))
                })
                .collect()
        };

        for (node, source) in targets {
            trace!(element = %node, source = source.trim(), "binding text");
            let expression = compile_expression(source.trim())?;
            let value = evaluate_expression(&expression, env)?;
            config
                .document
                .borrow_mut()
                .set_text_content(node, &value.to_display_string())?;
        }
        Ok(())
    }
}

impl ElementEvaluator for BindTextEvaluator {
    fn evaluate(
        &self,
        element: NodeId,
        env: &Environment,
        config: &EvaluationConfig,
        done: Completion,
    ) {
        done(self.render(element, env, config));
    }
}
