//! Shapes and inline caches observed from the outside: cache hit counters
//! across repeated member access, dictionary-mode fallback behavior, and
//! the add/delete property round trip.

use lark::{HostValue, Interpreter};
use pretty_assertions::assert_eq;

// =============================================================================
// 1. Inline cache behavior
// =============================================================================

/// A hot monomorphic site hits its cache after the first miss.
#[test]
fn repeated_access_to_one_shape_is_mostly_hits() {
    let mut interp = Interpreter::new();
    interp
        .run(
            "let o = {x: 1, y: 2};\n\
             let sum = 0;\n\
             for (let i = 0; i < 1000; i++) sum += o.x;\n\
             sum;",
            "shapes.js",
        )
        .expect("script runs");
    let (hits, misses) = interp.cache_stats();
    assert!(
        hits > 900,
        "a monomorphic site must serve from the cache: hits={hits}, misses={misses}"
    );
    assert!(misses < 100, "only warmup misses expected: misses={misses}");
}

/// Objects built with the same insertion order share shapes, so one site
/// serves both from the same cache entry.
#[test]
fn same_insertion_order_objects_share_cache_entries() {
    let mut interp = Interpreter::new();
    interp
        .run(
            "function read(o) { return o.v; }\n\
             let total = 0;\n\
             for (let i = 0; i < 500; i++) { total += read({v: 1, w: 2}); total += read({v: 3, w: 4}); }\n\
             total;",
            "shapes.js",
        )
        .expect("script runs");
    let (hits, misses) = interp.cache_stats();
    assert!(
        hits > 900,
        "shared shapes must share cache entries: hits={hits}, misses={misses}"
    );
}

/// A site fed more shapes than the cache holds keeps answering, just
/// without the fast path.
#[test]
fn megamorphic_sites_still_answer_correctly() {
    let result = run(
        "function read(o) { return o.k; }\n\
         let shapes = [\n\
           {k: 1}, {k: 2, a: 0}, {k: 3, a: 0, b: 0}, {k: 4, a: 0, b: 0, c: 0},\n\
           {k: 5, a: 0, b: 0, c: 0, d: 0}, {k: 6, z: 0},\n\
         ];\n\
         let sum = 0;\n\
         for (let round = 0; round < 10; round++) for (let o of shapes) sum += read(o);\n\
         sum;",
    );
    assert_eq!(result, HostValue::Number(210.0));
}

// =============================================================================
// 2. Shape transitions & dictionary fallback
// =============================================================================

/// Adding then deleting a property returns an object equivalent in
/// property set (now in dictionary mode), and it keeps behaving.
#[test]
fn add_then_delete_round_trips_the_property_set() {
    let result = run(
        "let o = {a: 1};\n\
         o.extra = 99;\n\
         delete o.extra;\n\
         let keys = []; for (let k in o) keys.push(k);\n\
         [keys.length, keys[0], o.a];",
    );
    assert_eq!(
        result,
        HostValue::Array(vec![
            HostValue::Number(1.0),
            HostValue::String("a".to_owned()),
            HostValue::Number(1.0),
        ])
    );
}

#[test]
fn dictionary_mode_objects_keep_full_property_semantics() {
    let result = run(
        "let o = {a: 1, b: 2, c: 3};\n\
         delete o.b;          // forces dictionary mode\n\
         o.d = 4;             // adds after the fallback\n\
         o.a = 10;            // updates in place\n\
         [o.a, o.c, o.d, 'b' in o];",
    );
    assert_eq!(
        result,
        HostValue::Array(vec![
            HostValue::Number(10.0),
            HostValue::Number(3.0),
            HostValue::Number(4.0),
            HostValue::Bool(false),
        ])
    );
}

#[test]
fn symbol_keys_work_through_the_dictionary_path() {
    let result = run(
        "let key = Symbol('secret');\n\
         let o = {plain: 1};\n\
         o[key] = 'hidden';\n\
         let names = []; for (let k in o) names.push(k);\n\
         [o[key], names.length];",
    );
    assert_eq!(
        result,
        HostValue::Array(vec![HostValue::String("hidden".to_owned()), HostValue::Number(1.0)])
    );
}

/// Shaped storage keeps insertion order across many properties, and the
/// order survives the dictionary transition.
#[test]
fn enumeration_order_is_stable_across_the_fallback() {
    let result = run(
        "let o = {};\n\
         o.one = 1; o.two = 2; o.three = 3; o.four = 4;\n\
         delete o.two;\n\
         let keys = []; for (let k in o) keys.push(k); keys;",
    );
    assert_eq!(
        result,
        HostValue::Array(vec![
            HostValue::String("one".to_owned()),
            HostValue::String("three".to_owned()),
            HostValue::String("four".to_owned()),
        ])
    );
}

fn run(source: &str) -> HostValue {
    let mut interp = Interpreter::new();
    interp
        .run(source, "shapes.js")
        .unwrap_or_else(|err| panic!("script failed: {err}"))
}
