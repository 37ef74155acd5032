//! The host boundary: global definition and readback, host-value
//! conversion fidelity, JSON round trips, and the error surface.

use lark::{Error, HostValue, Interpreter};
use pretty_assertions::assert_eq;

// =============================================================================
// 1. Globals in and out
// =============================================================================

#[test]
fn host_defined_globals_are_visible_to_script() {
    let mut interp = Interpreter::new();
    interp
        .define_global("input", HostValue::Number(20.0))
        .expect("define succeeds");
    let result = interp.run("input * 2 + 2;", "host.js").expect("script runs");
    assert_eq!(result, HostValue::Number(42.0));
}

#[test]
fn structured_globals_convert_both_ways() {
    let mut interp = Interpreter::new();
    let config = HostValue::Object(vec![
        ("name".to_owned(), HostValue::String("lark".to_owned())),
        (
            "flags".to_owned(),
            HostValue::Array(vec![HostValue::Bool(true), HostValue::Null]),
        ),
    ]);
    interp.define_global("config", config).expect("define succeeds");
    let result = interp
        .run("config.flags[0] === true && config.name === 'lark';", "host.js")
        .expect("script runs");
    assert_eq!(result, HostValue::Bool(true));

    let read_back = interp.global("config").expect("config is defined");
    assert_eq!(
        read_back,
        HostValue::Object(vec![
            ("name".to_owned(), HostValue::String("lark".to_owned())),
            (
                "flags".to_owned(),
                HostValue::Array(vec![HostValue::Bool(true), HostValue::Null]),
            ),
        ])
    );
}

#[test]
fn script_created_structures_read_back_in_order() {
    let mut interp = Interpreter::new();
    interp
        .run("var built = {z: 1, a: [2, 'x'], nested: {deep: true}};", "host.js")
        .expect("script runs");
    let value = interp.global("built").expect("built is defined");
    assert_eq!(
        value,
        HostValue::Object(vec![
            ("z".to_owned(), HostValue::Number(1.0)),
            (
                "a".to_owned(),
                HostValue::Array(vec![HostValue::Number(2.0), HostValue::String("x".to_owned())]),
            ),
            (
                "nested".to_owned(),
                HostValue::Object(vec![("deep".to_owned(), HostValue::Bool(true))]),
            ),
        ])
    );
}

#[test]
fn cyclic_structures_degrade_to_repr_instead_of_hanging() {
    let mut interp = Interpreter::new();
    interp
        .run("var cyc = {}; cyc.self = cyc;", "host.js")
        .expect("script runs");
    let value = interp.global("cyc").expect("cyc is defined");
    let HostValue::Object(entries) = value else {
        panic!("expected an object");
    };
    assert_eq!(entries[0].0, "self");
    assert_eq!(entries[0].1, HostValue::Repr("[Circular]".to_owned()));
}

#[test]
fn functions_read_back_as_repr() {
    let mut interp = Interpreter::new();
    interp.run("var f = function named() {};", "host.js").expect("script runs");
    let value = interp.global("f").expect("f is defined");
    assert_eq!(value, HostValue::Repr("[Function: named]".to_owned()));
}

// =============================================================================
// 2. JSON round trips
// =============================================================================

/// parse ∘ stringify over JSON-compatible values is structure-preserving.
#[test]
fn json_compatible_values_round_trip_through_the_engine() {
    let mut interp = Interpreter::new();
    interp
        .run(
            "var data = {list: [1, 2.5, 'three', true, null], empty: {}, label: 'ok'};",
            "host.js",
        )
        .expect("script runs");
    let value = interp.global("data").expect("data is defined");
    let text = value.to_json().expect("serializes");
    let round_tripped = HostValue::from_json(&text).expect("parses");
    // `undefined` never appears in JSON-compatible data, so equality is
    // exact (null stays null, numbers stay numbers, order is preserved).
    assert_eq!(round_tripped, value);
}

#[test]
fn json_text_feeds_back_into_script() {
    let parsed = HostValue::from_json(r#"{"n": 4, "xs": [1, 2]}"#).expect("parses");
    let mut interp = Interpreter::new();
    interp.define_global("payload", parsed).expect("define succeeds");
    let result = interp
        .run("payload.n + payload.xs[0] + payload.xs[1];", "host.js")
        .expect("script runs");
    assert_eq!(result, HostValue::Number(7.0));
}

// =============================================================================
// 3. Error surface
// =============================================================================

#[test]
fn top_level_errors_stick_until_taken() {
    let mut interp = Interpreter::new();
    let err: Error = interp.run("nope();", "host.js").expect_err("must fail");
    assert_eq!(err.name, "ReferenceError");
    assert!(interp.has_error());
    let taken = interp.take_error().expect("stored error");
    assert_eq!(taken.name, "ReferenceError");
    assert!(!interp.has_error());
}

#[test]
fn errors_from_queue_microtask_callbacks_surface_as_host_errors() {
    let mut interp = Interpreter::new();
    interp
        .run("queueMicrotask(() => { throw new Error('detached'); });", "host.js")
        .expect("the turn itself succeeds");
    let errors = interp.take_host_errors();
    assert_eq!(errors.len(), 1);
    assert_eq!(errors[0].message, "detached");
}

#[test]
fn format_with_source_draws_a_context_window() {
    let source = "function f() {\n  return g();\n}\nf();";
    let mut interp = Interpreter::new();
    let err = interp.run(source, "host.js").expect_err("g is undefined");
    let rendered = err.format_with_source(source);
    assert!(rendered.contains("ReferenceError"));
    assert!(rendered.contains('^'), "caret marker expected:\n{rendered}");
    assert!(rendered.contains("return g();"));
}

// =============================================================================
// 4. Interning observability
// =============================================================================

#[test]
fn interning_identity_holds_across_interpreters() {
    let a = lark::intern("shared-identifier");
    let b = lark::intern("shared-identifier");
    assert_eq!(a, b);
    let stats = lark::intern_stats();
    assert!(stats.unique_strings > 0);
    assert!(stats.total_bytes > 0);
}
