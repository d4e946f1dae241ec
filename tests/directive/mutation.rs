//! In-place mutation of the bound collection

use std::cell::Cell;
use std::rc::Rc;

use forbind::Value;

use super::{counting_evaluator, items_source, json, mount, mount_with};

const LIST: &str = r#"<ul><li for="n of bind(items)" bind>n</li></ul>"#;

#[test]
fn test_push_appends_without_rerendering() {
    let count = Rc::new(Cell::new(0));
    let counter = count.clone();
    let fixture = mount_with(LIST, json(r#"{ "items": [1, 2, 3] }"#), move |mut config| {
        config
            .interpreters
            .register("evaluate-element", counting_evaluator(counter));
        config
    });
    let before = fixture.directive.rendered_nodes();

    fixture.array("items").push(vec![Value::from(4)]);

    assert_eq!(
        fixture.source(),
        format!("<ul>{}</ul>", items_source(&["1", "2", "3", "4"]))
    );
    let after = fixture.directive.rendered_nodes();
    assert_eq!(after.get(..3), Some(before.as_slice()));
    assert_eq!(count.get(), 4);
    assert_eq!(fixture.outcomes(), vec![Ok(()), Ok(())]);
}

#[test]
fn test_push_many_in_order() {
    let fixture = mount(LIST, json(r#"{ "items": [] }"#));
    fixture
        .array("items")
        .push(vec![Value::from("x"), Value::from("y"), Value::from("z")]);
    assert_eq!(
        fixture.source(),
        format!("<ul>{}</ul>", items_source(&["x", "y", "z"]))
    );
}

#[test]
fn test_push_keeps_trailing_sibling_last() {
    let fixture = mount(
        r#"<ul><li for="n of bind(items)" bind>n</li><li>end</li></ul>"#,
        json(r#"{ "items": [1] }"#),
    );
    fixture.array("items").push(vec![Value::from(2)]);
    assert_eq!(
        fixture.source(),
        "<ul><li bind>1</li><li bind>2</li><li>end</li></ul>"
    );
}

#[test]
fn test_splice_removes_range() {
    let fixture = mount(LIST, json(r#"{ "items": [1, 2, 3, 4] }"#));
    let before = fixture.directive.rendered_nodes();

    let removed = fixture.array("items").splice(1, 2, Vec::new());

    assert_eq!(removed, vec![Value::from(2), Value::from(3)]);
    assert_eq!(
        fixture.source(),
        format!("<ul>{}</ul>", items_source(&["1", "4"]))
    );
    assert_eq!(fixture.directive.element_at(0), before.first().copied());
    assert_eq!(fixture.directive.element_at(1), before.get(3).copied());
}

#[test]
fn test_splice_with_insertion() {
    let fixture = mount(LIST, json(r#"{ "items": [1, 2, 3] }"#));
    let before = fixture.directive.rendered_nodes();

    fixture
        .array("items")
        .splice(1, 1, vec![Value::from(8), Value::from(9)]);

    assert_eq!(
        fixture.source(),
        format!("<ul>{}</ul>", items_source(&["1", "8", "9", "3"]))
    );
    assert_eq!(fixture.directive.element_at(0), before.first().copied());
    assert_eq!(fixture.directive.element_at(3), before.get(2).copied());
}

#[test]
fn test_pop_and_shift() {
    let fixture = mount(LIST, json(r#"{ "items": [1, 2, 3] }"#));
    let items = fixture.array("items");

    assert_eq!(items.pop(), Some(Value::from(3)));
    assert_eq!(
        fixture.source(),
        format!("<ul>{}</ul>", items_source(&["1", "2"]))
    );

    assert_eq!(items.shift(), Some(Value::from(1)));
    assert_eq!(fixture.source(), format!("<ul>{}</ul>", items_source(&["2"])));
    assert_eq!(fixture.directive.rendered_nodes().len(), 1);
}

#[test]
fn test_push_after_splice_lands_at_end() {
    let fixture = mount(LIST, json(r#"{ "items": [1, 2, 3] }"#));
    let items = fixture.array("items");
    items.splice(0, 1, Vec::new());
    items.push(vec![Value::from(4)]);
    assert_eq!(
        fixture.source(),
        format!("<ul>{}</ul>", items_source(&["2", "3", "4"]))
    );
}

#[test]
fn test_unshift_is_ignored() {
    let fixture = mount(LIST, json(r#"{ "items": [1, 2] }"#));
    fixture.array("items").unshift(vec![Value::from(0)]);
    assert_eq!(
        fixture.source(),
        format!("<ul>{}</ul>", items_source(&["1", "2"]))
    );
    assert_eq!(fixture.outcomes(), vec![Ok(())]);
}

#[test]
fn test_static_loop_rerenders_on_mutation() {
    let fixture = mount(
        r#"<ul><li for="n of items" bind>n</li></ul>"#,
        json(r#"{ "items": [1, 2] }"#),
    );
    fixture.array("items").push(vec![Value::from(3)]);
    assert_eq!(
        fixture.source(),
        format!("<ul>{}</ul>", items_source(&["1", "2", "3"]))
    );
    assert_eq!(fixture.directive.rendered_nodes().len(), 3);
}

#[test]
fn test_removed_elements_are_released() {
    let fixture = mount(LIST, json(r#"{ "items": [1, 2, 3, 4] }"#));
    let live = fixture.document.borrow().node_count();
    let highest = fixture.document.borrow().descendants(fixture.root).into_iter().max();

    fixture.array("items").splice(1, 2, Vec::new());
    assert_eq!(fixture.document.borrow().node_count(), live - 4);

    fixture
        .array("items")
        .push(vec![Value::from(5), Value::from(6)]);

    assert_eq!(
        fixture.source(),
        format!("<ul>{}</ul>", items_source(&["1", "4", "5", "6"]))
    );
    assert_eq!(fixture.document.borrow().node_count(), live);
    // released ids are reused instead of growing the arena
    let doc = fixture.document.borrow();
    assert_eq!(doc.descendants(fixture.root).into_iter().max(), highest);
}
