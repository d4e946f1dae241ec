//! Reassignment of values the loop head reads, and check passes

use forbind::{ArrayRef, Environment, LoopError, LoopPhase, NativeFunction, Value};

use super::{Fixture, items_source, json, mount, mount_env, predicate};

const FILTERED: &str = r#"<ul><li for="n of bind(items).filter(keep)" bind>n</li></ul>"#;

fn filtered_fixture() -> Fixture {
    let data = json(r#"{ "items": [1, 2, 3, 4] }"#);
    let env = Environment::from_json(&data);
    env.define("keep", predicate("isEven", |n| n % 2.0 == 0.0));
    mount_env(FILTERED, env)
}

#[test]
fn test_filter_skips_items_at_add_time() {
    let fixture = filtered_fixture();
    assert_eq!(
        fixture.source(),
        format!("<ul>{}</ul>", items_source(&["2", "4"]))
    );
    assert_eq!(fixture.directive.element_at(0), None);
    assert!(fixture.directive.element_at(1).is_some());
}

#[test]
fn test_check_pass_toggles_visibility() {
    let fixture = filtered_fixture();

    fixture
        .env
        .set("keep", predicate("isOdd", |n| n % 2.0 == 1.0));

    assert_eq!(
        fixture.source(),
        concat!(
            "<ul>",
            "<li bind>1</li>",
            r#"<li bind style="display: none">2</li>"#,
            "<li bind>3</li>",
            r#"<li bind style="display: none">4</li>"#,
            "</ul>"
        )
    );
    assert_eq!(fixture.outcomes(), vec![Ok(()), Ok(())]);

    fixture
        .env
        .set("keep", predicate("isEven", |n| n % 2.0 == 0.0));

    assert_eq!(
        fixture.source(),
        concat!(
            "<ul>",
            r#"<li bind style="display: none">1</li>"#,
            "<li bind>2</li>",
            r#"<li bind style="display: none">3</li>"#,
            "<li bind>4</li>",
            "</ul>"
        )
    );
}

#[test]
fn test_repeated_check_is_idempotent() {
    let fixture = filtered_fixture();
    fixture
        .env
        .set("keep", predicate("isOdd", |n| n % 2.0 == 1.0));
    let once = fixture.source();
    let nodes = fixture.directive.rendered_nodes();

    fixture
        .env
        .set("keep", predicate("stillOdd", |n| n % 2.0 == 1.0));

    assert_eq!(fixture.source(), once);
    assert_eq!(fixture.directive.rendered_nodes(), nodes);
}

#[test]
fn test_reassigning_same_collection_runs_check_pass() {
    let fixture = mount(
        r#"<ul><li for="n of bind(items)" bind>n</li></ul>"#,
        json(r#"{ "items": [1, 2] }"#),
    );
    let items = fixture.array("items");
    let nodes = fixture.directive.rendered_nodes();

    fixture.env.set("items", Value::Array(items));

    assert_eq!(fixture.outcomes(), vec![Ok(()), Ok(())]);
    assert_eq!(fixture.directive.rendered_nodes(), nodes);
    assert_eq!(
        fixture.source(),
        format!("<ul>{}</ul>", items_source(&["1", "2"]))
    );
}

#[test]
fn test_rebinding_to_another_collection_is_rejected() {
    let fixture = mount(
        r#"<ul><li for="n of bind(items)" bind>n</li></ul>"#,
        json(r#"{ "items": [1, 2] }"#),
    );
    let original = fixture.array("items");

    fixture
        .env
        .set("items", Value::Array(ArrayRef::from_values([7, 8, 9])));

    assert_eq!(fixture.outcomes(), vec![Ok(()), Err(LoopError::Rebind)]);
    assert!(fixture
        .directive
        .bound()
        .is_some_and(|bound| bound.ptr_eq(&original)));
    assert_eq!(
        fixture.source(),
        format!("<ul>{}</ul>", items_source(&["1", "2"]))
    );
    // a rejected rebind keeps the checks queued for the bound collection
    assert_eq!(fixture.directive.pending_operations(), 2);
}

#[test]
fn test_non_collection_value_unbinds() {
    let fixture = mount(
        r#"<ul><li>head</li><li for="n of bind(items)" bind>n</li></ul>"#,
        json(r#"{ "items": [1, 2] }"#),
    );
    let items = fixture.array("items");
    assert!(fixture.directive.trap_count() > 0);

    fixture.env.set("items", Value::Null);

    assert_eq!(fixture.source(), "<ul><li>head</li></ul>");
    assert_eq!(fixture.directive.phase(), LoopPhase::Unbound);
    assert_eq!(fixture.directive.trap_count(), 0);
    assert_eq!(fixture.outcomes(), vec![Ok(()), Ok(())]);

    // traps are gone: the old collection no longer reaches the directive
    items.push(vec![Value::from(3)]);
    assert_eq!(fixture.source(), "<ul><li>head</li></ul>");
    assert_eq!(fixture.outcomes().len(), 2);
}

#[test]
fn test_nested_property_unbinds() {
    let fixture = mount(
        r#"<ul><li for="n of bind(state.items)" bind>n</li></ul>"#,
        json(r#"{ "state": { "items": ["a"] } }"#),
    );
    assert_eq!(fixture.source(), "<ul><li bind>a</li></ul>");

    fixture.object("state").set("items", Value::from(false));

    assert_eq!(fixture.source(), "<ul></ul>");
    assert_eq!(fixture.directive.phase(), LoopPhase::Unbound);
}

#[test]
fn test_watched_argument_array_triggers_check_pass() {
    let data = json(r#"{ "items": [1, 2, 3], "hidden": [2] }"#);
    let env = Environment::from_json(&data);
    let hidden = match env.get("hidden") {
        Some(Value::Array(array)) => array,
        other => panic!("hidden: {:?}", other),
    };
    let lookup = hidden.clone();
    env.define(
        "visible",
        Value::Function(NativeFunction::new("visible", move |args| {
            let item = args.first().cloned().unwrap_or_default();
            Ok(Value::Boolean(
                !lookup.to_vec().iter().any(|h| h.same_value(&item)),
            ))
        })),
    );
    let fixture = mount_env(
        r#"<ul><li for="n of bind(items).filter(visible, hidden)" bind>n</li></ul>"#,
        env,
    );
    assert_eq!(
        fixture.source(),
        format!("<ul>{}</ul>", items_source(&["1", "3"]))
    );

    hidden.push(vec![Value::from(3)]);

    assert_eq!(
        fixture.source(),
        concat!(
            "<ul>",
            "<li bind>1</li>",
            r#"<li bind style="display: none">3</li>"#,
            "</ul>"
        )
    );
}

#[test]
fn test_check_pass_keeps_inline_style() {
    let env = Environment::from_json(&json(r#"{ "items": [1, 2] }"#));
    env.define("keep", predicate("all", |_| true));
    let fixture = mount_env(
        r#"<ul><li for="n of bind(items).filter(keep)" style="color: red" bind>n</li></ul>"#,
        env,
    );

    fixture.env.set("keep", predicate("none", |_| false));
    assert_eq!(
        fixture.source(),
        concat!(
            "<ul>",
            r#"<li style="color: red; display: none" bind>1</li>"#,
            r#"<li style="color: red; display: none" bind>2</li>"#,
            "</ul>"
        )
    );

    fixture.env.set("keep", predicate("all", |_| true));
    assert_eq!(
        fixture.source(),
        concat!(
            "<ul>",
            r#"<li style="color: red" bind>1</li>"#,
            r#"<li style="color: red" bind>2</li>"#,
            "</ul>"
        )
    );
}
