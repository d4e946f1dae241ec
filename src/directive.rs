//! Loop directive controller
//!
//! A [`LoopDirective`] owns one loop-annotated template element. It compiles
//! the element's loop head, runs it with `bind` and `pause` in scope, and then drives the loop body itself: one queued [`Operation`] per
//! collection index, each replayed through the head expression with the
//! captured `bind(...)` call site yielding `[item]`.
//!
//! ```text
//! Idle ─► HeadEvaluating ─► AwaitingBind ─► BodyReplay ─┬─► Finished
//!                 ▲                              ▲       └─► Paused
//!                 └──── reference changed        └──── collection mutated
//! ```
//!
//! Every entry point runs as a task on the configured scheduler, and at most
//! one loop-body execution is in flight at a time. Mutations that arrive
//! mid-run only touch the queue; a reference change waits for the run to
//! settle and then re-runs the head.

use std::cell::RefCell;
use std::collections::VecDeque;
use std::rc::{Rc, Weak};

use tracing::{debug, error, trace, warn};

use crate::ast::{ExprId, LoopScript};
use crate::config::EvaluationConfig;
use crate::dom::NodeId;
use crate::env::Environment;
use crate::error::LoopError;
use crate::eval::{Evaluator, IntrinsicHost, ObservableBinding, bind_pattern};
use crate::observe::{ArrayRef, MutationEvent, Subscription};
use crate::parser::compile_loop;
use crate::prelude::FxHashSet;
use crate::queue::{Operation, OperationQueue};
use crate::reconcile::{self, Anchors, Placement, RenderedElements};
use crate::scanner::{HeadPhase, SourceWatch};
use crate::scheduler::Scheduler;
use crate::value::{CheapClone, Intrinsic, JsString, NativeFunction, Value};

/// Called once per settled run
pub type SettleCallback = Box<dyn FnMut(Result<(), LoopError>)>;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum LoopPhase {
    /// Created, not started
    Idle,
    /// Running the loop head for the first time in this run
    HeadEvaluating,
    /// `bind` captured the collection; waiting for the queue to produce an item
    AwaitingBind,
    /// Replaying the loop body for the current operation
    BodyReplay,
    /// `pause()` ended the run; the remaining queue is kept for the next one
    Paused,
    /// The last run drained its queue (or failed)
    Finished,
    /// The watched property stopped holding a collection; all output removed
    Unbound,
    /// Torn down by the caller
    Detached,
}

impl LoopPhase {
    fn is_terminal(self) -> bool {
        matches!(self, LoopPhase::Unbound | LoopPhase::Detached)
    }
}

/// What started a run
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord)]
enum Trigger {
    /// Work was queued by an in-place mutation
    Resume,
    /// Something the head reads was reassigned
    Reference,
    /// The property holding the collection no longer holds one
    Unbind,
}

/// What a trap is attached to
#[derive(Debug, Clone)]
enum Trap {
    BoundArray,
    WatchedArray,
    Property { name: JsString, held_bound: bool },
}

#[derive(Debug, Clone, PartialEq, Eq, Hash)]
enum TrapKey {
    Array(usize),
    Property(usize, JsString),
}

enum Step {
    Body(Value),
    Replay(Value),
    Drained,
}

enum BodyOutcome {
    Continue,
    Waiting,
}

struct LoopState {
    script: Rc<LoopScript>,
    template: NodeId,
    anchors: Anchors,
    env: Environment,
    loop_env: Environment,
    config: EvaluationConfig,
    phase: LoopPhase,
    reached_body: bool,
    /// The `bind(...)` call site to resume; set while a collection is bound
    continuation: Option<ExprId>,
    bound: Option<ArrayRef>,
    rendered: RenderedElements,
    /// Elements rendered by a head pass that iterated without `bind`
    static_nodes: Vec<NodeId>,
    queue: OperationQueue,
    current: Option<Operation>,
    pass: VecDeque<Value>,
    watch: SourceWatch,
    traps: Vec<Subscription>,
    trapped: FxHashSet<TrapKey>,
    in_flight: bool,
    waiting_on: Option<NodeId>,
    pending: Option<Trigger>,
    on_settle: Option<SettleCallback>,
}

/// `bind` as seen from one head or replay evaluation
struct BindHost<'a> {
    bound: &'a mut Option<ArrayRef>,
    continuation: &'a mut Option<ExprId>,
    reached_body: bool,
    queue: &'a mut OperationQueue,
    rendered: &'a mut RenderedElements,
}

impl IntrinsicHost for BindHost<'_> {
    fn bind(&mut self, candidate: Value, site: ExprId) -> Result<Value, LoopError> {
        if self.continuation.is_some() && !self.reached_body {
            return Err(LoopError::MultipleBind);
        }
        let Value::Array(array) = candidate else {
            return Err(LoopError::NotIndexable {
                found: candidate.type_name().to_string(),
            });
        };
        match self.bound.as_ref() {
            None => {
                trace!(len = array.len(), "capturing bound collection");
                self.queue.enqueue_additions(array.to_vec(), 0);
                self.rendered.extend_placeholders(array.len());
                *self.bound = Some(array);
            }
            Some(bound) if bound.ptr_eq(&array) => {}
            Some(_) => {
                warn!("bind() called with a different collection");
                return Err(LoopError::Rebind);
            }
        }
        *self.continuation = Some(site);
        Ok(Value::Array(ArrayRef::new(Vec::new())))
    }
}

fn iterate(value: &Value) -> Result<VecDeque<Value>, LoopError> {
    match value {
        Value::Array(array) => Ok(array.to_vec().into()),
        other => Err(LoopError::type_error(format!(
            "{} is not iterable",
            other.type_name()
        ))),
    }
}

impl LoopState {
    /// Evaluate the head expression, replaying `[item]` at the continuation if given
    fn evaluate_head(&mut self, replay: Option<Value>) -> Result<Value, LoopError> {
        let env = self.loop_env.cheap_clone();
        let script = self.script.cheap_clone();
        let replay = replay.zip(self.continuation);
        let mut host = BindHost {
            bound: &mut self.bound,
            continuation: &mut self.continuation,
            reached_body: self.reached_body,
            queue: &mut self.queue,
            rendered: &mut self.rendered,
        };
        match replay {
            Some((item, site)) => Evaluator::new(env, &mut host)
                .with_replay(site, Value::Array(ArrayRef::new(vec![item])))
                .evaluate(&script.head.source),
            None => Evaluator::new(env, &mut host)
                .with_listener(&mut self.watch)
                .evaluate(&script.head.source),
        }
    }

    /// Reset per-run state and evaluate the head from scratch
    fn start_head(&mut self) -> Result<(Value, HeadPhase), LoopError> {
        self.in_flight = true;
        self.phase = LoopPhase::HeadEvaluating;
        self.reached_body = false;
        self.continuation = None;
        self.pass.clear();
        debug!(head = %self.script.head_source, "evaluating loop head");
        self.remove_static_output()?;
        let value = self.evaluate_head(None)?;
        Ok((value, self.watch.take_phase()))
    }

    fn next_step(&mut self) -> Result<Step, LoopError> {
        if let Some(item) = self.pass.pop_front() {
            return Ok(Step::Body(item));
        }
        self.finish_current()?;
        if self.continuation.is_none() {
            return Ok(Step::Drained);
        }
        match self.queue.dequeue() {
            Some(operation) => {
                let item = operation.item.clone();
                trace!(index = ?operation.index, kind = ?operation.kind, "replaying");
                self.current = Some(operation);
                self.phase = LoopPhase::BodyReplay;
                Ok(Step::Replay(item))
            }
            None => Ok(Step::Drained),
        }
    }

    /// Apply the outcome of a check pass to its element
    fn finish_current(&mut self) -> Result<(), LoopError> {
        let Some(operation) = self.current.take() else {
            return Ok(());
        };
        if !operation.is_check() {
            return Ok(());
        }
        let Some(node) = operation.index.and_then(|index| self.rendered.get(index)) else {
            return Ok(());
        };
        self.config.document.borrow_mut().set_visible(
            node,
            operation.touched_body,
            &self.config.options.hidden_style,
        )
    }

    fn remove_output(&mut self) -> Result<(), LoopError> {
        let mut nodes = self.rendered.clear();
        nodes.append(&mut self.static_nodes);
        self.discard(nodes)
    }

    fn remove_static_output(&mut self) -> Result<(), LoopError> {
        let nodes = std::mem::take(&mut self.static_nodes);
        self.discard(nodes)
    }

    /// Detach rendered elements and free them, except the one an element
    /// evaluator is still working on
    fn discard(&self, nodes: Vec<NodeId>) -> Result<(), LoopError> {
        let mut doc = self.config.document.borrow_mut();
        for node in nodes {
            doc.remove(node)?;
            if self.waiting_on != Some(node) {
                doc.release(node)?;
            }
        }
        Ok(())
    }

    /// Queue a check for every current index of the bound collection
    fn enqueue_full_check(&mut self) {
        if let Some(bound) = self.bound.as_ref() {
            let items = bound.to_vec();
            if self.rendered.len() < items.len() {
                self.rendered
                    .extend_placeholders(items.len() - self.rendered.len());
            }
            self.queue.enqueue_checks(&items);
        }
    }

    /// Keep the in-flight operation aligned with a splice of the collection
    fn splice_current(&mut self, start: usize, removed: usize, inserted: usize) {
        if let Some(operation) = self.current.as_mut() {
            if let Some(index) = operation.index {
                if index >= start + removed {
                    operation.index = Some(index - removed + inserted);
                } else if index >= start {
                    operation.index = None;
                }
            }
        }
    }

    fn handle_bound_mutation(&mut self, event: &MutationEvent) -> Result<Option<Trigger>, LoopError> {
        match event {
            MutationEvent::Push { start, items } => {
                if self.rendered.len() < *start {
                    self.rendered
                        .extend_placeholders(*start - self.rendered.len());
                }
                self.queue.enqueue_additions(items.iter().cloned(), *start);
                self.rendered.extend_placeholders(items.len());
                debug!(start, count = items.len(), "push");
                Ok(Some(Trigger::Resume))
            }
            MutationEvent::Splice {
                method,
                start,
                removed,
                inserted,
            } => {
                let detached = {
                    let mut doc = self.config.document.borrow_mut();
                    self.rendered
                        .remove_range(&mut doc, *start, removed.len(), inserted.len())?
                };
                let removed_nodes = detached.len();
                self.discard(detached)?;
                self.queue.apply_splice(*start, removed.len(), inserted.len());
                self.splice_current(*start, removed.len(), inserted.len());
                self.queue.enqueue_additions(inserted.iter().cloned(), *start);
                debug!(
                    method = method.name(),
                    start,
                    removed = removed.len(),
                    inserted = inserted.len(),
                    removed_nodes,
                    "splice"
                );
                Ok(Some(Trigger::Resume))
            }
            MutationEvent::Unshift { items } => {
                warn!(
                    head = %self.script.head_source,
                    count = items.len(),
                    "unshift on a bound collection is not supported; ignoring"
                );
                Ok(None)
            }
            MutationEvent::Write { .. } => Ok(None),
        }
    }

    fn classify(&mut self, trap: &Trap, event: &MutationEvent) -> Result<Option<Trigger>, LoopError> {
        if self.bound.is_none() {
            return Ok(Some(Trigger::Reference));
        }
        match trap {
            Trap::BoundArray => self.handle_bound_mutation(event),
            Trap::WatchedArray => {
                debug!(method = event.method_name(), "watched collection changed");
                self.enqueue_full_check();
                Ok(Some(Trigger::Resume))
            }
            Trap::Property { name, held_bound } => {
                let MutationEvent::Write { value, .. } = event else {
                    return Ok(None);
                };
                let same = match (value, self.bound.as_ref()) {
                    (Value::Array(array), Some(bound)) => array.ptr_eq(bound),
                    _ => false,
                };
                if same {
                    debug!(property = %name, "property reassigned to the bound collection");
                    self.enqueue_full_check();
                    Ok(Some(Trigger::Resume))
                } else if *held_bound && value.as_array().is_none() {
                    debug!(property = %name, "property no longer holds a collection");
                    Ok(Some(Trigger::Unbind))
                } else {
                    debug!(property = %name, "reference changed");
                    self.enqueue_full_check();
                    Ok(Some(Trigger::Reference))
                }
            }
        }
    }

    fn unbind(&mut self) -> Result<(), LoopError> {
        self.traps.clear();
        self.trapped.clear();
        self.queue.clear();
        self.pass.clear();
        self.current = None;
        self.waiting_on = None;
        self.bound = None;
        self.continuation = None;
        self.phase = LoopPhase::Unbound;
        self.remove_output()
    }

    fn log_failure(&self, err: &LoopError, element: Option<NodeId>) {
        let element_source = element
            .map(|node| self.config.document.borrow().to_source(node))
            .unwrap_or_default();
        error!(
            head = %self.script.head_source,
            loop_source = %self.script.loop_source,
            env = ?self.env,
            element = %element_source,
            error = %err,
            "for-of loop failed"
        );
    }
}

/// Handle to one loop directive; clones share the same directive
#[derive(Clone)]
pub struct LoopDirective {
    state: Rc<RefCell<LoopState>>,
}

impl LoopDirective {
    /// Prepare a directive for `element`.
    ///
    /// The element is detached and kept as the template; its loop attribute
    /// is removed so rendered copies are not picked up as loops again.
    pub fn new(
        element: NodeId,
        env: &Environment,
        config: &EvaluationConfig,
    ) -> Result<Self, LoopError> {
        let attribute = config.options.attribute.as_str();
        let head_source = config
            .document
            .borrow()
            .attribute(element, attribute)
            .map(str::to_string)
            .ok_or_else(|| LoopError::MissingAttribute {
                attribute: attribute.to_string(),
            })?;
        let script = compile_loop(&head_source)?;

        let anchors = {
            let mut doc = config.document.borrow_mut();
            let container = doc.parent(element).ok_or_else(|| {
                LoopError::document(format!("loop element {} is not attached", element))
            })?;
            let anchors = Anchors {
                container,
                previous: doc.previous_element_sibling(element),
                next: doc.next_element_sibling(element),
            };
            doc.remove_attribute(element, attribute);
            doc.remove(element)?;
            anchors
        };

        debug!(
            head = %head_source,
            nodes = script.node_count,
            template = %element,
            "loop directive created"
        );

        let watch = SourceWatch::new(&script);
        let state = Rc::new_cyclic(|weak| {
            let loop_env = env.child();
            loop_env.define(Intrinsic::Bind.name(), Value::Intrinsic(Intrinsic::Bind));
            loop_env.define(
                "pause",
                Value::Function(pause_function(
                    weak.clone(),
                    config.scheduler.cheap_clone(),
                )),
            );
            RefCell::new(LoopState {
                script: Rc::new(script),
                template: element,
                anchors,
                env: env.cheap_clone(),
                loop_env,
                config: config.clone(),
                phase: LoopPhase::Idle,
                reached_body: false,
                continuation: None,
                bound: None,
                rendered: RenderedElements::new(),
                static_nodes: Vec::new(),
                queue: OperationQueue::new(),
                current: None,
                pass: VecDeque::new(),
                watch,
                traps: Vec::new(),
                trapped: FxHashSet::default(),
                in_flight: false,
                waiting_on: None,
                pending: None,
                on_settle: None,
            })
        });
        Ok(LoopDirective { state })
    }

    /// Create a directive and schedule its first run
    pub fn mount(
        element: NodeId,
        env: &Environment,
        config: &EvaluationConfig,
        on_settle: impl FnMut(Result<(), LoopError>) + 'static,
    ) -> Result<Self, LoopError> {
        let directive = Self::new(element, env, config)?;
        directive.start(on_settle);
        Ok(directive)
    }

    /// Schedule the first run. `on_settle` fires once per settled run,
    /// including runs started later by mutations.
    pub fn start(&self, on_settle: impl FnMut(Result<(), LoopError>) + 'static) {
        let scheduler = {
            let mut state = self.state.borrow_mut();
            if state.phase != LoopPhase::Idle {
                warn!(phase = ?state.phase, "loop directive already started");
                return;
            }
            state.on_settle = Some(Box::new(on_settle));
            state.config.scheduler.cheap_clone()
        };
        let weak = Rc::downgrade(&self.state);
        scheduler.schedule(Box::new(move || {
            if let Some(state) = weak.upgrade() {
                run_head(&state);
            }
        }));
    }

    /// Continue a paused directive with its remaining queue.
    /// Does nothing unless the directive is paused.
    pub fn resume(&self) {
        let scheduler = self.state.borrow().config.scheduler.cheap_clone();
        schedule_resume(&Rc::downgrade(&self.state), &scheduler);
    }

    pub fn phase(&self) -> LoopPhase {
        self.state.borrow().phase
    }

    pub fn head_source(&self) -> String {
        self.state.borrow().script.head_source.clone()
    }

    /// The detached template element
    pub fn template(&self) -> NodeId {
        self.state.borrow().template
    }

    pub fn bound(&self) -> Option<ArrayRef> {
        self.state.borrow().bound.clone()
    }

    /// Rendered elements in collection order, followed by any elements of
    /// an unbound (static) pass
    pub fn rendered_nodes(&self) -> Vec<NodeId> {
        let state = self.state.borrow();
        let mut nodes = state.rendered.nodes();
        nodes.extend(state.static_nodes.iter().copied());
        nodes
    }

    /// Rendered element for collection index `index`, if any
    pub fn element_at(&self, index: usize) -> Option<NodeId> {
        self.state.borrow().rendered.get(index)
    }

    pub fn pending_operations(&self) -> usize {
        self.state.borrow().queue.len()
    }

    pub fn trap_count(&self) -> usize {
        self.state.borrow().traps.len()
    }

    pub fn is_running(&self) -> bool {
        self.state.borrow().in_flight
    }

    /// Drop every trap and remove all rendered elements.
    ///
    /// A run still in flight settles with [`LoopError::Detached`].
    pub fn teardown(&self) {
        let (was_in_flight, removed) = {
            let mut state = self.state.borrow_mut();
            if state.phase == LoopPhase::Detached {
                return;
            }
            state.traps.clear();
            state.trapped.clear();
            let discarded = state.queue.clear();
            state.pass.clear();
            state.current = None;
            state.waiting_on = None;
            state.pending = None;
            state.phase = LoopPhase::Detached;
            debug!(discarded, "loop directive torn down");
            (state.in_flight, state.remove_output())
        };
        if let Err(err) = removed {
            error!(error = %err, "failed to remove rendered elements");
        }
        if was_in_flight {
            settle(&self.state, Err(LoopError::Detached));
        }
    }
}

impl std::fmt::Debug for LoopDirective {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let state = self.state.borrow();
        f.debug_struct("LoopDirective")
            .field("head", &state.script.head_source)
            .field("phase", &state.phase)
            .field("rendered", &state.rendered.slots())
            .field("queued", &state.queue.len())
            .finish()
    }
}

/// Create and start a directive for every loop element under `root`.
///
/// Loop elements nested inside another loop element belong to that loop's
/// template and are left alone.
pub fn mount_all(
    root: NodeId,
    env: &Environment,
    config: &EvaluationConfig,
    on_settle: impl Fn(NodeId, Result<(), LoopError>) + Clone + 'static,
) -> Result<Vec<LoopDirective>, LoopError> {
    let elements: Vec<NodeId> = {
        let doc = config.document.borrow();
        let attribute = config.options.attribute.as_str();
        let mut found = Vec::new();
        for node in doc.descendants(root) {
            if !doc.has_attribute(node, attribute) {
                continue;
            }
            if found.iter().any(|outer| doc.contains(*outer, node)) {
                continue;
            }
            found.push(node);
        }
        found
    };

    let mut directives = Vec::with_capacity(elements.len());
    for element in elements {
        let callback = on_settle.clone();
        directives.push(LoopDirective::mount(element, env, config, move |result| {
            callback(element, result)
        })?);
    }
    Ok(directives)
}

// ═══════════════════════════════════════════════════════════════════════════════
// Runs
// ═══════════════════════════════════════════════════════════════════════════════

fn begin_run(state: &Rc<RefCell<LoopState>>, trigger: Trigger) {
    {
        let mut s = state.borrow_mut();
        if s.phase.is_terminal() {
            return;
        }
        if s.in_flight {
            if trigger != Trigger::Resume {
                s.pending = s.pending.max(Some(trigger));
                trace!(?trigger, "run in flight; deferring");
            }
            return;
        }
    }
    match trigger {
        Trigger::Resume => {
            state.borrow_mut().in_flight = true;
            drive(state);
        }
        Trigger::Reference => run_head(state),
        Trigger::Unbind => {
            let result = {
                let mut s = state.borrow_mut();
                s.in_flight = true;
                s.unbind()
            };
            settle(state, result);
        }
    }
}

/// `pause(resumer?)` ends the current run. A function argument is called
/// with a `resume` handle that continues the remaining queue later.
fn pause_function(weak: Weak<RefCell<LoopState>>, scheduler: Rc<dyn Scheduler>) -> NativeFunction {
    let resume = NativeFunction::new("resume", move |_args: &[Value]| {
        schedule_resume(&weak, &scheduler);
        Ok(Value::Undefined)
    });
    NativeFunction::new("pause", move |args: &[Value]| {
        if let Some(Value::Function(resumer)) = args.first() {
            resumer.call(&[Value::Function(resume.cheap_clone())])?;
        }
        Err(LoopError::Paused)
    })
}

fn schedule_resume(weak: &Weak<RefCell<LoopState>>, scheduler: &Rc<dyn Scheduler>) {
    let weak = weak.clone();
    scheduler.schedule(Box::new(move || {
        let Some(state) = weak.upgrade() else {
            return;
        };
        let phase = state.borrow().phase;
        if phase == LoopPhase::Paused {
            debug!("resuming paused loop");
            begin_run(&state, Trigger::Resume);
        } else {
            trace!(?phase, "resume ignored; loop is not paused");
        }
    }));
}

fn run_head(state: &Rc<RefCell<LoopState>>) {
    let outcome = {
        let mut s = state.borrow_mut();
        if s.phase.is_terminal() {
            return;
        }
        s.start_head()
    };

    let value = match outcome {
        Ok((value, phase)) => {
            if let HeadPhase::Ready(bindings) = phase {
                install_traps(state, bindings);
            }
            value
        }
        Err(err) => {
            conclude(state, Err(err), None);
            return;
        }
    };

    let items = {
        let mut s = state.borrow_mut();
        if s.continuation.is_some() {
            s.phase = LoopPhase::AwaitingBind;
        }
        iterate(&value).map(|items| s.pass = items)
    };
    match items {
        Ok(()) => drive(state),
        Err(err) => conclude(state, Err(err), None),
    }
}

fn drive(state: &Rc<RefCell<LoopState>>) {
    loop {
        let step = state.borrow_mut().next_step();
        let outcome = match step {
            Ok(Step::Body(item)) => match render_body(state, item) {
                Ok(BodyOutcome::Continue) => continue,
                Ok(BodyOutcome::Waiting) => return,
                Err(err) => Err(err),
            },
            Ok(Step::Replay(item)) => {
                let replayed = {
                    let mut s = state.borrow_mut();
                    s.evaluate_head(Some(item))
                        .and_then(|value| iterate(&value))
                        .map(|items| s.pass = items)
                };
                match replayed {
                    Ok(()) => continue,
                    Err(err) => Err(err),
                }
            }
            Ok(Step::Drained) => Ok(()),
            Err(err) => Err(err),
        };
        conclude(state, outcome, None);
        return;
    }
}

fn render_body(state: &Rc<RefCell<LoopState>>, item: Value) -> Result<BodyOutcome, LoopError> {
    let (node, env, config, evaluator) = {
        let mut guard = state.borrow_mut();
        let s = &mut *guard;
        s.reached_body = true;
        let slot = match s.current.as_mut() {
            Some(operation) if !operation.touched_body => {
                operation.touched_body = true;
                match operation.index {
                    None => return Ok(BodyOutcome::Continue),
                    Some(index) if operation.is_check() && s.rendered.get(index).is_some() => {
                        return Ok(BodyOutcome::Continue);
                    }
                    Some(index) => Some(index),
                }
            }
            _ => None,
        };

        let config = s.config.clone();
        let evaluator = config
            .interpreters
            .get(&config.options.element_interpreter)?;
        let node = {
            let mut doc = config.document.borrow_mut();
            let node = doc.clone_node(s.template, true)?;
            match slot {
                Some(index) => s.rendered.place(&mut doc, index, node, &s.anchors)?,
                None => {
                    let placement = match s.static_nodes.last() {
                        Some(last) => Placement::After(*last),
                        None => s.rendered.placement(s.rendered.len(), &s.anchors),
                    };
                    reconcile::insert(&mut doc, placement, node)?;
                    s.static_nodes.push(node);
                }
            }
            node
        };

        let env = s.loop_env.child();
        bind_pattern(&s.script.head.pattern, item, &env)?;
        s.waiting_on = Some(node);
        trace!(element = %node, index = ?slot, "rendering element");
        (node, env, config, evaluator)
    };

    let weak = Rc::downgrade(state);
    let scheduler = config.scheduler.cheap_clone();
    evaluator.evaluate(
        node,
        &env,
        &config,
        Box::new(move |result| {
            scheduler.schedule(Box::new(move || {
                if let Some(state) = weak.upgrade() {
                    element_finished(&state, node, result);
                }
            }));
        }),
    );
    Ok(BodyOutcome::Waiting)
}

fn element_finished(state: &Rc<RefCell<LoopState>>, node: NodeId, result: Result<(), LoopError>) {
    {
        let mut s = state.borrow_mut();
        if s.phase.is_terminal() || s.waiting_on != Some(node) {
            trace!(element = %node, "ignoring stale element completion");
            return;
        }
        s.waiting_on = None;
        let mut doc = s.config.document.borrow_mut();
        if doc.parent(node).is_none() {
            // spliced out while it was being evaluated
            if let Err(err) = doc.release(node) {
                trace!(element = %node, error = %err, "element already released");
            }
        }
    }
    match result {
        Ok(()) => drive(state),
        Err(err) => conclude(state, Err(err), Some(node)),
    }
}

/// End the current run: drained, paused or failed
fn conclude(state: &Rc<RefCell<LoopState>>, outcome: Result<(), LoopError>, element: Option<NodeId>) {
    let result = {
        let mut s = state.borrow_mut();
        match outcome {
            Ok(()) => {
                s.phase = LoopPhase::Finished;
                debug!(rendered = s.rendered.nodes().len(), "loop run finished");
                Ok(())
            }
            Err(err) if err.is_pause() => {
                // drop the paused operation without applying its visibility
                s.pass.clear();
                s.current = None;
                s.phase = LoopPhase::Paused;
                debug!(remaining = s.queue.len(), "loop paused");
                Ok(())
            }
            Err(err) => {
                s.log_failure(&err, element);
                s.pass.clear();
                s.current = None;
                if !err.is_configuration() {
                    let discarded = s.queue.clear();
                    if discarded > 0 {
                        debug!(discarded, "discarding queued operations");
                    }
                }
                s.phase = LoopPhase::Finished;
                Err(err)
            }
        }
    };
    settle(state, result);
}

fn settle(state: &Rc<RefCell<LoopState>>, result: Result<(), LoopError>) {
    let (callback, pending) = {
        let mut s = state.borrow_mut();
        s.in_flight = false;
        (s.on_settle.take(), s.pending.take())
    };
    if let Some(mut callback) = callback {
        callback(result);
        let mut s = state.borrow_mut();
        if s.on_settle.is_none() {
            s.on_settle = Some(callback);
        }
    }
    if let Some(trigger) = pending {
        begin_run(state, trigger);
    }
}

// ═══════════════════════════════════════════════════════════════════════════════
// Traps
// ═══════════════════════════════════════════════════════════════════════════════

fn install_traps(state: &Rc<RefCell<LoopState>>, bindings: Vec<ObservableBinding>) {
    let weak = Rc::downgrade(state);
    let mut guard = state.borrow_mut();
    let s = &mut *guard;
    let scheduler = s.config.scheduler.cheap_clone();

    if let Some(bound) = s.bound.clone() {
        watch_array(s, &bound, &weak, &scheduler);
    }

    for binding in bindings {
        match (&binding.object, binding.property) {
            (Value::Object(object), Some(name)) => {
                let current = object.get(name.as_str());
                let key = TrapKey::Property(object.id(), name.cheap_clone());
                if s.trapped.insert(key) {
                    let held_bound = match (&current, s.bound.as_ref()) {
                        (Some(Value::Array(array)), Some(bound)) => array.ptr_eq(bound),
                        _ => false,
                    };
                    trace!(property = %name, held_bound, "trapping property writes");
                    let trap = Trap::Property {
                        name: name.cheap_clone(),
                        held_bound,
                    };
                    let listener = trap_listener(weak.clone(), scheduler.cheap_clone(), trap);
                    s.traps.push(object.observe(move |event| {
                        if let MutationEvent::Write { property, .. } = event {
                            if *property == name {
                                listener(event);
                            }
                        }
                    }));
                }
                if let Some(Value::Array(array)) = current {
                    watch_array(s, &array, &weak, &scheduler);
                }
            }
            (Value::Array(array), _) => watch_array(s, array, &weak, &scheduler),
            _ => {}
        }
    }
    debug!(traps = s.traps.len(), "mutation traps installed");
}

fn watch_array(
    s: &mut LoopState,
    array: &ArrayRef,
    weak: &Weak<RefCell<LoopState>>,
    scheduler: &Rc<dyn Scheduler>,
) {
    if !s.trapped.insert(TrapKey::Array(array.id())) {
        return;
    }
    let is_bound = s.bound.as_ref().is_some_and(|bound| bound.ptr_eq(array));
    let trap = if is_bound {
        Trap::BoundArray
    } else {
        Trap::WatchedArray
    };
    trace!(?trap, len = array.len(), "trapping array mutations");
    let listener = trap_listener(weak.clone(), scheduler.cheap_clone(), trap);
    s.traps.push(array.observe(listener));
}

fn trap_listener(
    weak: Weak<RefCell<LoopState>>,
    scheduler: Rc<dyn Scheduler>,
    trap: Trap,
) -> impl Fn(&MutationEvent) + 'static {
    move |event| {
        let weak = weak.clone();
        let trap = trap.clone();
        let event = event.clone();
        scheduler.schedule(Box::new(move || {
            if let Some(state) = weak.upgrade() {
                on_mutation(&state, &trap, &event);
            }
        }));
    }
}

fn on_mutation(state: &Rc<RefCell<LoopState>>, trap: &Trap, event: &MutationEvent) {
    let trigger = {
        let mut s = state.borrow_mut();
        if s.phase.is_terminal() {
            return;
        }
        trace!(method = event.method_name(), ?trap, "mutation");
        match s.classify(trap, event) {
            Ok(trigger) => trigger,
            Err(err) => {
                s.log_failure(&err, None);
                return;
            }
        }
    };
    if let Some(trigger) = trigger {
        begin_run(state, trigger);
    }
}
