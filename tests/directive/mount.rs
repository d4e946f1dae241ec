//! Discovery, options and teardown

use std::cell::RefCell;
use std::rc::Rc;

use forbind::{
    Document, Environment, EvaluationConfig, LoopDirective, LoopError, LoopOptions, LoopPhase,
    NodeId, Value, mount_all,
};

use super::{items_source, json, mount, mount_with};

#[test]
fn test_mount_all_skips_nested_loops() {
    let document = Document::new().into_ref();
    let root = document
        .borrow_mut()
        .parse_fragment(concat!(
            "<div>",
            r#"<ul><li for="a of bind(left)" bind>a</li></ul>"#,
            r#"<ol><li for="b of bind(right)"><span for="c of b">c</span></li></ol>"#,
            "</div>"
        ))
        .expect("parse");
    let config = EvaluationConfig::new(document.clone());
    let env = Environment::from_json(&json(r#"{ "left": ["x", "y"], "right": [[1], [2]] }"#));
    let settled: Rc<RefCell<Vec<(NodeId, Result<(), LoopError>)>>> = Rc::default();
    let sink = settled.clone();

    let directives = mount_all(root, &env, &config, move |element, result| {
        sink.borrow_mut().push((element, result))
    })
    .expect("mount");

    assert_eq!(directives.len(), 2);
    assert_eq!(directives[0].head_source(), "a of bind(left)");
    assert_eq!(directives[1].head_source(), "b of bind(right)");
    let templates: Vec<NodeId> = directives.iter().map(LoopDirective::template).collect();
    let reported: Vec<NodeId> = settled.borrow().iter().map(|(node, _)| *node).collect();
    assert_eq!(reported, templates);
    assert!(settled.borrow().iter().all(|(_, result)| result.is_ok()));
    assert_eq!(
        document.borrow().to_source(root),
        concat!(
            "<div>",
            "<ul><li bind>x</li><li bind>y</li></ul>",
            r#"<ol><li><span for="c of b">c</span></li><li><span for="c of b">c</span></li></ol>"#,
            "</div>"
        )
    );
}

#[test]
fn test_custom_loop_attribute() {
    let fixture = mount_with(
        r#"<ul><li each="n of bind(items)" bind>n</li><li for="ignored">z</li></ul>"#,
        json(r#"{ "items": [1, 2] }"#),
        |config| {
            let options = LoopOptions::from_json(&json(r#"{ "attribute": "each" }"#))
                .expect("options");
            config.with_options(options)
        },
    );
    assert_eq!(
        fixture.source(),
        format!(
            r#"<ul>{}<li for="ignored">z</li></ul>"#,
            items_source(&["1", "2"])
        )
    );
}

#[test]
fn test_custom_bind_attribute() {
    let fixture = mount_with(
        r#"<ul><li for="n of bind(items)" text>n</li></ul>"#,
        json(r#"{ "items": ["p", "q"] }"#),
        |config| {
            config.with_options(LoopOptions {
                bind_attribute: "text".to_string(),
                ..Default::default()
            })
        },
    );
    assert_eq!(fixture.source(), "<ul><li text>p</li><li text>q</li></ul>");
}

#[test]
fn test_teardown_removes_output_and_traps() {
    let fixture = mount(
        r#"<ul><li>keep</li><li for="n of bind(items)" bind>n</li></ul>"#,
        json(r#"{ "items": [1, 2] }"#),
    );
    assert!(fixture.directive.trap_count() > 0);

    fixture.directive.teardown();

    assert_eq!(fixture.source(), "<ul><li>keep</li></ul>");
    assert_eq!(fixture.directive.phase(), LoopPhase::Detached);
    assert_eq!(fixture.directive.trap_count(), 0);
    assert!(fixture.directive.rendered_nodes().is_empty());

    fixture.array("items").push(vec![Value::from(3)]);
    fixture.env.set("items", Value::Null);
    assert_eq!(fixture.source(), "<ul><li>keep</li></ul>");
    assert_eq!(fixture.outcomes(), vec![Ok(())]);

    // a second teardown is a no-op
    fixture.directive.teardown();
    assert_eq!(fixture.outcomes(), vec![Ok(())]);
}

#[test]
fn test_start_is_idempotent() {
    let fixture = mount(
        r#"<ul><li for="n of bind(items)" bind>n</li></ul>"#,
        json(r#"{ "items": [1] }"#),
    );
    let extra: Rc<RefCell<Vec<Result<(), LoopError>>>> = Rc::default();
    let sink = extra.clone();

    fixture
        .directive
        .start(move |result| sink.borrow_mut().push(result));
    fixture.array("items").push(vec![Value::from(2)]);

    assert!(extra.borrow().is_empty());
    assert_eq!(fixture.outcomes(), vec![Ok(()), Ok(())]);
}

#[test]
fn test_new_leaves_directive_idle() {
    let document = Document::new().into_ref();
    let root = document
        .borrow_mut()
        .parse_fragment(r#"<ul><li for="n of bind(items)" bind>n</li></ul>"#)
        .expect("parse");
    let config = EvaluationConfig::new(document.clone());
    let env = Environment::from_json(&json(r#"{ "items": [1] }"#));
    let element = super::loop_element(&config, root);

    let directive = LoopDirective::new(element, &env, &config).expect("new");
    assert_eq!(directive.phase(), LoopPhase::Idle);
    assert_eq!(document.borrow().to_source(root), "<ul></ul>");

    directive.start(|_| {});
    assert_eq!(directive.phase(), LoopPhase::Finished);
    assert_eq!(
        document.borrow().to_source(root),
        format!("<ul>{}</ul>", items_source(&["1"]))
    );
}
