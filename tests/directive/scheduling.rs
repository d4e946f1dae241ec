//! Host-driven scheduling and asynchronous element evaluators

use std::cell::RefCell;
use std::rc::Rc;

use forbind::{
    Completion, Environment, EvaluationConfig, LoopError, LoopPhase, NodeId, TaskQueue, Value,
};

use super::{Fixture, items_source, json, mount_with};

const LIST: &str = r#"<ul><li for="n of bind(items)" bind>n</li></ul>"#;

fn queued(data: &str) -> (Fixture, TaskQueue) {
    let queue = TaskQueue::new();
    let scheduler = queue.clone();
    let fixture = mount_with(LIST, json(data), move |config| {
        config.with_scheduler(Rc::new(scheduler))
    });
    (fixture, queue)
}

type Parked = Rc<RefCell<Vec<Completion>>>;

/// Evaluator that parks its completion until the test releases it
fn parked(data: &str) -> (Fixture, Parked) {
    let parked: Parked = Rc::new(RefCell::new(Vec::new()));
    let sink = parked.clone();
    let fixture = mount_with(LIST, json(data), move |mut config| {
        config.interpreters.register(
            "evaluate-element",
            move |_element: NodeId, _env: &Environment, _config: &EvaluationConfig, done: Completion| {
                sink.borrow_mut().push(done);
            },
        );
        config
    });
    (fixture, parked)
}

fn release(parked: &Parked, result: Result<(), LoopError>) {
    let done = parked.borrow_mut().pop().expect("an element is in flight");
    done(result);
}

#[test]
fn test_nothing_runs_until_host_pumps() {
    let (fixture, queue) = queued(r#"{ "items": [1, 2] }"#);

    assert_eq!(fixture.source(), "<ul></ul>");
    assert_eq!(fixture.directive.phase(), LoopPhase::Idle);
    assert!(fixture.outcomes().is_empty());
    assert_eq!(queue.len(), 1);

    queue.run_pending();

    assert_eq!(
        fixture.source(),
        format!("<ul>{}</ul>", items_source(&["1", "2"]))
    );
    assert_eq!(fixture.outcomes(), vec![Ok(())]);
    assert!(queue.is_empty());
}

#[test]
fn test_push_during_run_joins_current_run() {
    let (fixture, queue) = queued(r#"{ "items": [1, 2, 3] }"#);

    assert!(queue.run_next());
    assert!(fixture.directive.is_running());
    assert_eq!(fixture.directive.rendered_nodes().len(), 1);

    fixture.array("items").push(vec![Value::from(4)]);
    queue.run_pending();

    assert_eq!(fixture.outcomes(), vec![Ok(())]);
    assert_eq!(
        fixture.source(),
        format!("<ul>{}</ul>", items_source(&["1", "2", "3", "4"]))
    );
    assert!(!fixture.directive.is_running());
}

#[test]
fn test_mutations_before_first_pump_are_not_lost() {
    let (fixture, queue) = queued(r#"{ "items": [1] }"#);
    fixture.array("items").push(vec![Value::from(2)]);

    queue.run_pending();

    assert_eq!(
        fixture.source(),
        format!("<ul>{}</ul>", items_source(&["1", "2"]))
    );
    assert_eq!(fixture.outcomes(), vec![Ok(())]);
}

#[test]
fn test_one_element_in_flight_at_a_time() {
    let (fixture, parked) = parked(r#"{ "items": ["a", "b", "c"] }"#);

    for rendered in 1..=3 {
        assert_eq!(parked.borrow().len(), 1);
        assert_eq!(fixture.directive.rendered_nodes().len(), rendered);
        assert!(fixture.directive.is_running());
        assert!(fixture.outcomes().is_empty());
        release(&parked, Ok(()));
    }

    assert!(parked.borrow().is_empty());
    assert_eq!(fixture.outcomes(), vec![Ok(())]);
    assert_eq!(fixture.directive.phase(), LoopPhase::Finished);
}

#[test]
fn test_async_failure_settles_run() {
    let (fixture, parked) = parked(r#"{ "items": ["a", "b"] }"#);

    release(&parked, Err(LoopError::element("render failed")));

    assert_eq!(
        fixture.outcomes(),
        vec![Err(LoopError::element("render failed"))]
    );
    assert!(parked.borrow().is_empty());
    assert_eq!(fixture.directive.pending_operations(), 0);
}

#[test]
fn test_teardown_while_in_flight() {
    let (fixture, parked) = parked(r#"{ "items": ["a", "b"] }"#);
    assert!(fixture.directive.is_running());

    fixture.directive.teardown();

    assert_eq!(fixture.outcomes(), vec![Err(LoopError::Detached)]);
    assert_eq!(fixture.directive.phase(), LoopPhase::Detached);
    assert_eq!(fixture.source(), "<ul></ul>");

    // the completion arrives after teardown and is ignored
    release(&parked, Ok(()));
    assert_eq!(fixture.outcomes(), vec![Err(LoopError::Detached)]);
    assert_eq!(fixture.source(), "<ul></ul>");
}
