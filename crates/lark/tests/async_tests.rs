//! The async driver end to end: await resumption, microtask ordering,
//! promise combinators, and unhandled-rejection reporting.
//!
//! Tests stash observable state in globals, because `run` drains the
//! microtask queue before returning and globals are read *after* the drain.

use lark::{HostValue, Interpreter, PromiseState};
use pretty_assertions::assert_eq;

fn run_and_read(source: &str, global: &str) -> HostValue {
    let mut interp = Interpreter::new();
    interp
        .run(source, "async.js")
        .unwrap_or_else(|err| panic!("script failed: {err}"));
    interp
        .global(global)
        .unwrap_or_else(|| panic!("global '{global}' was never defined"))
}

/// Shorthand for asserting a fulfilled promise snapshot.
fn fulfilled(value: HostValue) -> HostValue {
    HostValue::Promise {
        state: PromiseState::Fulfilled,
        value: Some(Box::new(value)),
    }
}

// =============================================================================
// 1. async / await
// =============================================================================

/// Two awaits resume with their settled values and the promise resolves to
/// their sum.
#[test]
fn async_function_resolves_after_two_awaits() {
    let result = run_and_read(
        "async function t() { let a = await 10; let b = await 20; return a + b; }\n\
         var p = t();",
        "p",
    );
    assert_eq!(result, fulfilled(HostValue::Number(30.0)));
}

#[test]
fn async_call_returns_a_pending_promise_synchronously() {
    let mut interp = Interpreter::new();
    let script = lark::Script::parse("async function t() { await 0; return 1; } var p = t(); p;", "async.js")
        .expect("parses");
    let task = interp.evaluate(&script);
    // Before the drain the body is parked at its first await.
    let snapshot = task.into_result().expect("evaluation succeeds");
    assert_eq!(
        snapshot,
        HostValue::Promise {
            state: PromiseState::Pending,
            value: None,
        }
    );
    interp.drain_microtasks();
    let after = interp.global("p").expect("p is defined");
    assert_eq!(after, fulfilled(HostValue::Number(1.0)));
}

#[test]
fn await_rethrows_rejections_into_the_body() {
    let result = run_and_read(
        "async function t() {\n\
           try { await Promise.reject(new Error('nope')); return 'not reached'; }\n\
           catch (e) { return 'caught ' + e.message; }\n\
         }\n\
         var p = t();",
        "p",
    );
    assert_eq!(result, fulfilled(HostValue::String("caught nope".to_owned())));
}

#[test]
fn async_body_runs_synchronously_until_the_first_await() {
    let result = run_and_read(
        "var order = [];\n\
         async function t() { order.push('body'); await 0; order.push('resumed'); }\n\
         t();\n\
         order.push('after-call');",
        "order",
    );
    assert_eq!(
        result,
        HostValue::Array(vec![
            HostValue::String("body".to_owned()),
            HostValue::String("after-call".to_owned()),
            HostValue::String("resumed".to_owned()),
        ])
    );
}

#[test]
fn uncaught_throw_in_async_body_rejects_the_promise() {
    let result = run_and_read(
        "async function t() { throw new Error('async boom'); }\n\
         var state = 'unset';\n\
         t().catch((e) => { state = e.message; });",
        "state",
    );
    assert_eq!(result, HostValue::String("async boom".to_owned()));
}

// =============================================================================
// 2. Microtask ordering
// =============================================================================

/// Reactions and queueMicrotask callbacks run strictly after synchronous
/// code, in FIFO order.
#[test]
fn microtasks_run_in_fifo_order_after_sync_code() {
    let result = run_and_read(
        "var order = [];\n\
         queueMicrotask(() => order.push('m1'));\n\
         Promise.resolve().then(() => order.push('m2'));\n\
         queueMicrotask(() => order.push('m3'));\n\
         order.push('sync');",
        "order",
    );
    assert_eq!(
        result,
        HostValue::Array(vec![
            HostValue::String("sync".to_owned()),
            HostValue::String("m1".to_owned()),
            HostValue::String("m2".to_owned()),
            HostValue::String("m3".to_owned()),
        ])
    );
}

#[test]
fn microtasks_enqueued_during_drain_run_in_the_same_drain() {
    let result = run_and_read(
        "var order = [];\n\
         queueMicrotask(() => { order.push('outer'); queueMicrotask(() => order.push('inner')); });",
        "order",
    );
    assert_eq!(
        result,
        HostValue::Array(vec![
            HostValue::String("outer".to_owned()),
            HostValue::String("inner".to_owned()),
        ])
    );
}

#[test]
fn reactions_fire_in_attachment_order() {
    let result = run_and_read(
        "var order = [];\n\
         let p = Promise.resolve('v');\n\
         p.then(() => order.push(1));\n\
         p.then(() => order.push(2));\n\
         p.then(() => order.push(3));",
        "order",
    );
    assert_eq!(
        result,
        HostValue::Array(vec![
            HostValue::Number(1.0),
            HostValue::Number(2.0),
            HostValue::Number(3.0),
        ])
    );
}

// =============================================================================
// 3. Promise protocol
// =============================================================================

#[test]
fn executor_resolve_settles_once_and_stays_settled() {
    let result = run_and_read(
        "var p = new Promise((resolve, reject) => { resolve(1); resolve(2); reject(3); });",
        "p",
    );
    assert_eq!(result, fulfilled(HostValue::Number(1.0)));
}

#[test]
fn executor_throw_rejects_the_promise() {
    let result = run_and_read(
        "var got = 'unset';\n\
         new Promise(() => { throw new Error('from executor'); }).catch((e) => { got = e.message; });",
        "got",
    );
    assert_eq!(result, HostValue::String("from executor".to_owned()));
}

#[test]
fn then_chains_transform_values() {
    let result = run_and_read(
        "var p = Promise.resolve(1).then((v) => v + 1).then((v) => v * 10);",
        "p",
    );
    assert_eq!(result, fulfilled(HostValue::Number(20.0)));
}

#[test]
fn resolving_with_a_promise_adopts_its_state() {
    let result = run_and_read(
        "var p = new Promise((resolve) => { resolve(Promise.resolve('adopted')); });",
        "p",
    );
    assert_eq!(result, fulfilled(HostValue::String("adopted".to_owned())));
}

#[test]
fn finally_passes_values_through_and_runs_the_callback() {
    let result = run_and_read(
        "var ran = false;\n\
         var p = Promise.resolve(7).finally(() => { ran = true; });\n\
         var both = p.then((v) => [ran, v]);",
        "both",
    );
    assert_eq!(
        result,
        fulfilled(HostValue::Array(vec![HostValue::Bool(true), HostValue::Number(7.0)]))
    );
}

#[test]
fn catch_recovers_and_the_chain_continues_fulfilled() {
    let result = run_and_read(
        "var p = Promise.reject(new Error('x')).catch(() => 'recovered').then((v) => v + '!');",
        "p",
    );
    assert_eq!(result, fulfilled(HostValue::String("recovered!".to_owned())));
}

// =============================================================================
// 4. Combinators
// =============================================================================

#[test]
fn promise_all_collects_in_input_order() {
    let result = run_and_read(
        "var p = Promise.all([Promise.resolve(1), 2, Promise.resolve(3)]);",
        "p",
    );
    assert_eq!(
        result,
        fulfilled(HostValue::Array(vec![
            HostValue::Number(1.0),
            HostValue::Number(2.0),
            HostValue::Number(3.0),
        ]))
    );
}

#[test]
fn promise_all_rejects_on_the_first_rejection() {
    let result = run_and_read(
        "var got = 'unset';\n\
         Promise.all([Promise.resolve(1), Promise.reject('bad')]).catch((e) => { got = e; });",
        "got",
    );
    assert_eq!(result, HostValue::String("bad".to_owned()));
}

#[test]
fn promise_race_takes_the_first_settlement() {
    let result = run_and_read("var p = Promise.race([Promise.resolve('fast'), new Promise(() => {})]);", "p");
    assert_eq!(result, fulfilled(HostValue::String("fast".to_owned())));
}

#[test]
fn promise_all_settled_reports_both_outcomes() {
    let result = run_and_read(
        "var report = 'unset';\n\
         Promise.allSettled([Promise.resolve(1), Promise.reject('no')]).then((rs) => {\n\
           report = [rs[0].status, rs[0].value, rs[1].status, rs[1].reason];\n\
         });",
        "report",
    );
    assert_eq!(
        result,
        HostValue::Array(vec![
            HostValue::String("fulfilled".to_owned()),
            HostValue::Number(1.0),
            HostValue::String("rejected".to_owned()),
            HostValue::String("no".to_owned()),
        ])
    );
}

#[test]
fn promise_any_takes_the_first_fulfillment() {
    let result = run_and_read(
        "var p = Promise.any([Promise.reject('a'), Promise.resolve('winner'), Promise.reject('b')]);",
        "p",
    );
    assert_eq!(result, fulfilled(HostValue::String("winner".to_owned())));
}

// =============================================================================
// 5. Unhandled rejections
// =============================================================================

#[test]
fn unobserved_rejection_fires_the_host_callback() {
    use std::{cell::RefCell, rc::Rc};
    let seen: Rc<RefCell<Vec<String>>> = Rc::default();
    let sink = seen.clone();
    let mut interp = Interpreter::new();
    interp.set_unhandled_rejection_callback(Box::new(move |reason| {
        sink.borrow_mut().push(reason);
    }));
    interp
        .run("Promise.reject('totally ignored');", "async.js")
        .expect("script itself succeeds");
    assert_eq!(seen.borrow().as_slice(), ["totally ignored".to_owned()]);
}

#[test]
fn handled_rejection_does_not_fire_the_callback() {
    use std::{cell::RefCell, rc::Rc};
    let seen: Rc<RefCell<Vec<String>>> = Rc::default();
    let sink = seen.clone();
    let mut interp = Interpreter::new();
    interp.set_unhandled_rejection_callback(Box::new(move |reason| {
        sink.borrow_mut().push(reason);
    }));
    interp
        .run("Promise.reject('observed').catch(() => {});", "async.js")
        .expect("script succeeds");
    assert!(seen.borrow().is_empty(), "handled rejections must not report");
}

// =============================================================================
// 6. Async generators
// =============================================================================

#[test]
fn async_generator_steps_resolve_iterator_results() {
    let result = run_and_read(
        "async function* g() { yield 1; yield 2; }\n\
         var out = [];\n\
         let it = g();\n\
         it.next().then((r) => { out.push(r.value, r.done); return it.next(); })\n\
           .then((r) => { out.push(r.value, r.done); return it.next(); })\n\
           .then((r) => { out.push(r.value, r.done); });",
        "out",
    );
    assert_eq!(
        result,
        HostValue::Array(vec![
            HostValue::Number(1.0),
            HostValue::Bool(false),
            HostValue::Number(2.0),
            HostValue::Bool(false),
            HostValue::Undefined,
            HostValue::Bool(true),
        ])
    );
}

#[test]
fn async_generator_awaits_between_yields() {
    let result = run_and_read(
        "async function* g() { let v = await Promise.resolve(5); yield v * 2; }\n\
         var got = 'unset';\n\
         g().next().then((r) => { got = r.value; });",
        "got",
    );
    assert_eq!(result, HostValue::Number(10.0));
}
