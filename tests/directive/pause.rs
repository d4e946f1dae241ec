//! Voluntary suspension with pause()

use std::cell::RefCell;
use std::rc::Rc;

use forbind::{
    Completion, Environment, EvaluationConfig, LoopError, LoopPhase, NativeFunction, NodeId,
    Value,
};

use super::{Fixture, items_source, json, mount, mount_env, mount_with, predicate};

/// Evaluator that pauses the run when it reaches `n == stop`
fn pausing_at(stop: i32) -> impl Fn(EvaluationConfig) -> EvaluationConfig {
    move |mut config| {
        config.interpreters.register(
            "evaluate-element",
            move |_element: NodeId, env: &Environment, _config: &EvaluationConfig, done: Completion| {
                if env.get("n") == Some(Value::from(stop)) {
                    done(Err(LoopError::Paused));
                } else {
                    done(Ok(()));
                }
            },
        );
        config
    }
}

fn paused_fixture() -> Fixture {
    mount_with(
        r#"<ul><li for="n of bind(items)">n</li></ul>"#,
        json(r#"{ "items": [1, 2, 3, 4] }"#),
        pausing_at(2),
    )
}

#[test]
fn test_pause_settles_through_completion() {
    let fixture = paused_fixture();
    assert_eq!(fixture.outcomes(), vec![Ok(())]);
    assert_eq!(fixture.directive.phase(), LoopPhase::Paused);
    assert_eq!(fixture.directive.rendered_nodes().len(), 2);
    assert_eq!(fixture.directive.pending_operations(), 2);
}

#[test]
fn test_next_mutation_resumes_remaining_items() {
    let fixture = paused_fixture();

    fixture.array("items").push(vec![Value::from(5)]);

    assert_eq!(fixture.outcomes(), vec![Ok(()), Ok(())]);
    assert_eq!(fixture.directive.phase(), LoopPhase::Finished);
    assert_eq!(fixture.directive.rendered_nodes().len(), 5);
    assert_eq!(fixture.directive.pending_operations(), 0);
    assert_eq!(
        fixture.source(),
        "<ul><li>n</li><li>n</li><li>n</li><li>n</li><li>n</li></ul>"
    );
}

#[test]
fn test_pause_in_loop_head() {
    let fixture = mount(
        r#"<ul><li for="n of pause()" bind>n</li></ul>"#,
        json(r#"{}"#),
    );
    assert_eq!(fixture.outcomes(), vec![Ok(())]);
    assert_eq!(fixture.directive.phase(), LoopPhase::Paused);
    assert_eq!(fixture.source(), "<ul></ul>");
}

#[test]
fn test_pause_from_bound_text() {
    let fixture = mount(
        r#"<ul><li for="n of bind(items)"><b bind>n</b><i bind>pause()</i></li></ul>"#,
        json(r#"{ "items": ["a", "b"] }"#),
    );
    assert_eq!(fixture.outcomes(), vec![Ok(())]);
    assert_eq!(fixture.directive.rendered_nodes().len(), 1);
    assert_eq!(fixture.directive.pending_operations(), 1);
    assert_eq!(
        fixture.source(),
        "<ul><li><b bind>a</b><i bind>pause()</i></li></ul>"
    );
}

#[test]
fn test_resume_continues_without_mutation() {
    let fixture = paused_fixture();

    fixture.directive.resume();

    assert_eq!(fixture.outcomes(), vec![Ok(()), Ok(())]);
    assert_eq!(fixture.directive.phase(), LoopPhase::Finished);
    assert_eq!(fixture.directive.rendered_nodes().len(), 4);

    // only a paused directive resumes
    fixture.directive.resume();
    assert_eq!(fixture.outcomes().len(), 2);
}

#[test]
fn test_pause_hands_resume_function_to_callback() {
    let stored: Rc<RefCell<Option<NativeFunction>>> = Rc::default();
    let sink = stored.clone();
    let env = Environment::from_json(&json(r#"{ "items": ["a", "b"] }"#));
    env.define(
        "later",
        Value::Function(NativeFunction::new("later", move |args: &[Value]| {
            if let Some(Value::Function(resume)) = args.first() {
                *sink.borrow_mut() = Some(resume.clone());
            }
            Ok(Value::Undefined)
        })),
    );
    let fixture = mount_env(
        r#"<ul><li for="n of bind(items)"><b bind>n</b><i bind>pause(later)</i></li></ul>"#,
        env,
    );
    assert_eq!(fixture.outcomes(), vec![Ok(())]);
    assert_eq!(fixture.directive.rendered_nodes().len(), 1);

    let resume = stored.borrow().clone().expect("pause passed a resume function");
    resume.call(&[]).expect("resume");

    assert_eq!(fixture.outcomes(), vec![Ok(()), Ok(())]);
    assert_eq!(fixture.directive.rendered_nodes().len(), 2);
    assert_eq!(fixture.directive.pending_operations(), 0);

    let resume = stored.borrow().clone().expect("paused again");
    resume.call(&[]).expect("resume");
    assert_eq!(fixture.outcomes().len(), 3);
    assert_eq!(fixture.directive.phase(), LoopPhase::Finished);
}

#[test]
fn test_pause_during_check_keeps_visibility() {
    let env = Environment::from_json(&json(r#"{ "items": [1, 2, 3] }"#));
    env.define("keep", predicate("all", |_| true));
    let fixture = mount_env(
        r#"<ul><li for="n of bind(items).filter(keep)" bind>n</li></ul>"#,
        env,
    );

    fixture.env.set(
        "keep",
        Value::Function(NativeFunction::new("stopAtTwo", |args: &[Value]| {
            if args.first() == Some(&Value::from(2)) {
                Err(LoopError::Paused)
            } else {
                Ok(Value::Boolean(true))
            }
        })),
    );

    assert_eq!(fixture.outcomes(), vec![Ok(()), Ok(())]);
    assert_eq!(fixture.directive.phase(), LoopPhase::Paused);
    assert_eq!(
        fixture.source(),
        format!("<ul>{}</ul>", items_source(&["1", "2", "3"]))
    );
    assert_eq!(fixture.directive.pending_operations(), 1);

    fixture.directive.resume();

    assert_eq!(fixture.outcomes(), vec![Ok(()), Ok(()), Ok(())]);
    assert_eq!(
        fixture.source(),
        format!("<ul>{}</ul>", items_source(&["1", "2", "3"]))
    );
    assert_eq!(fixture.directive.pending_operations(), 0);
}
