//! Live for-of loop directives over an observable document
//!
//! A loop element such as `<li for="row of bind(rows)">` is rendered once per
//! element of the collection passed to `bind`. The collection stays bound:
//! pushes and splices render or remove only the affected elements, and
//! reassigning a value the loop head reads re-checks which elements the head
//! still selects.
//!
//! # Example
//!
//! ```
//! use forbind::{Document, Environment, EvaluationConfig, Value, mount_all};
//!
//! # fn main() -> Result<(), forbind::LoopError> {
//! let document = Document::new().into_ref();
//! let root = document
//!     .borrow_mut()
//!     .parse_fragment(r#"<ul><li for="n of bind(items)" bind>n</li></ul>"#)?;
//! let env = Environment::from_json(&serde_json::json!({ "items": [1, 2, 3] }));
//! let config = EvaluationConfig::new(document.clone());
//!
//! let directives = mount_all(root, &env, &config, |_, result| assert!(result.is_ok()))?;
//! assert_eq!(
//!     document.borrow().to_source(root),
//!     "<ul><li bind>1</li><li bind>2</li><li bind>3</li></ul>"
//! );
//!
//! if let Some(items) = env.get("items").and_then(|v| v.as_array().cloned()) {
//!     items.push(vec![Value::from(4)]);
//! }
//! assert_eq!(directives[0].rendered_nodes().len(), 4);
//! # Ok(())
//! # }
//! ```

pub mod ast;
pub mod config;
pub mod directive;
pub mod dom;
pub mod element;
pub mod env;
pub mod error;
pub mod eval;
pub mod lexer;
pub mod observe;
pub mod parser;
pub mod prelude;
pub mod queue;
pub mod reconcile;
pub mod scanner;
pub mod scheduler;
pub mod value;

pub use config::{EvaluationConfig, LoopOptions};
pub use directive::{LoopDirective, LoopPhase, SettleCallback, mount_all};
pub use dom::{Document, DocumentRef, NodeId};
pub use element::{BindTextEvaluator, Completion, ElementEvaluator, Interpreters};
pub use env::Environment;
pub use error::LoopError;
pub use observe::{ArrayRef, MutationEvent, ObjectRef, Subscription};
pub use scheduler::{Scheduler, TaskQueue, TrampolineScheduler};
pub use value::CheapClone;
pub use value::JsString;
pub use value::NativeFunction;
pub use value::Value;
