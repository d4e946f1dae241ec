//! Integration tests for loop directives, organized by feature
//!
//! Every test mounts markup into a fresh document and inspects the
//! serialized output. Run with `FORBIND_TRACE=1 cargo test` to see the
//! controller's trace log.

mod mount;
mod mutation;
mod pause;
mod reference;
mod scheduling;

use std::cell::{Cell, RefCell};
use std::rc::Rc;

use forbind::{
    ArrayRef, BindTextEvaluator, Completion, Document, DocumentRef, ElementEvaluator,
    Environment, EvaluationConfig, LoopDirective, LoopError, NativeFunction, NodeId, ObjectRef,
    Value,
};

/// A mounted loop directive plus everything a test wants to poke at
pub struct Fixture {
    pub document: DocumentRef,
    pub root: NodeId,
    pub env: Environment,
    pub directive: LoopDirective,
    settled: Rc<RefCell<Vec<Result<(), LoopError>>>>,
}

impl Fixture {
    /// Serialized document
    pub fn source(&self) -> String {
        self.document.borrow().to_source(self.root)
    }

    /// Outcomes of every settled run so far
    pub fn outcomes(&self) -> Vec<Result<(), LoopError>> {
        self.settled.borrow().clone()
    }

    /// An array stored in the root environment
    pub fn array(&self, name: &str) -> ArrayRef {
        match self.env.get(name) {
            Some(Value::Array(array)) => array,
            other => panic!("{} is not an array: {:?}", name, other),
        }
    }

    /// An object stored in the root environment
    pub fn object(&self, name: &str) -> ObjectRef {
        match self.env.get(name) {
            Some(Value::Object(object)) => object,
            other => panic!("{} is not an object: {:?}", name, other),
        }
    }
}

pub fn init_tracing() {
    if std::env::var("FORBIND_TRACE").is_ok() {
        let _ = tracing_subscriber::fmt()
            .with_max_level(tracing::Level::TRACE)
            .with_test_writer()
            .try_init();
    }
}

/// Mount the first loop element of `markup` with the default configuration
pub fn mount(markup: &str, data: serde_json::Value) -> Fixture {
    mount_with(markup, data, |config| config)
}

/// Mount with a customized configuration
pub fn mount_with(
    markup: &str,
    data: serde_json::Value,
    configure: impl FnOnce(EvaluationConfig) -> EvaluationConfig,
) -> Fixture {
    mount_in(markup, Environment::from_json(&data), configure)
}

/// Mount against a prepared environment (e.g. one holding native functions)
pub fn mount_env(markup: &str, env: Environment) -> Fixture {
    mount_in(markup, env, |config| config)
}

fn mount_in(
    markup: &str,
    env: Environment,
    configure: impl FnOnce(EvaluationConfig) -> EvaluationConfig,
) -> Fixture {
    init_tracing();
    let document = Document::new().into_ref();
    let root = document
        .borrow_mut()
        .parse_fragment(markup)
        .expect("markup should parse");
    let config = configure(EvaluationConfig::new(document.clone()));
    let element = loop_element(&config, root);

    let settled = Rc::new(RefCell::new(Vec::new()));
    let sink = settled.clone();
    let directive = LoopDirective::mount(element, &env, &config, move |result| {
        sink.borrow_mut().push(result)
    })
    .expect("directive should mount");

    Fixture {
        document,
        root,
        env,
        directive,
        settled,
    }
}

pub fn loop_element(config: &EvaluationConfig, root: NodeId) -> NodeId {
    let doc = config.document.borrow();
    doc.descendants(root)
        .into_iter()
        .find(|node| doc.has_attribute(*node, &config.options.attribute))
        .expect("markup should contain a loop element")
}

/// Items as `<li bind>n</li>` elements, the most common expected output
pub fn items_source(items: &[&str]) -> String {
    items
        .iter()
        .map(|item| format!("<li bind>{}</li>", item))
        .collect()
}

pub fn json(source: &str) -> serde_json::Value {
    serde_json::from_str(source).expect("valid json")
}

/// A predicate usable from loop heads
pub fn predicate(name: &str, test: impl Fn(f64) -> bool + 'static) -> Value {
    Value::Function(NativeFunction::new(name, move |args: &[Value]| {
        let n = args.first().and_then(Value::as_number).unwrap_or(f64::NAN);
        Ok(Value::Boolean(test(n)))
    }))
}

/// Wraps the default evaluator and counts invocations
pub fn counting_evaluator(count: Rc<Cell<usize>>) -> impl ElementEvaluator + 'static {
    move |element: NodeId, env: &Environment, config: &EvaluationConfig, done: Completion| {
        count.set(count.get() + 1);
        BindTextEvaluator.evaluate(element, env, config, done);
    }
}
