//! End-to-end language semantics: the interpreter evaluates source text and
//! the value of the trailing expression statement comes back as a
//! `HostValue`.

use lark::{HostValue, Interpreter};
use pretty_assertions::assert_eq;

fn run(source: &str) -> HostValue {
    let mut interp = Interpreter::new();
    interp
        .run(source, "test.js")
        .unwrap_or_else(|err| panic!("script failed: {err}\nsource: {source}"))
}

fn run_err(source: &str) -> lark::Error {
    let mut interp = Interpreter::new();
    interp
        .run(source, "test.js")
        .expect_err("script should have thrown")
}

// =============================================================================
// 1. Arithmetic & numbers
// =============================================================================

/// The classic accumulation loop sums to the expected large integer.
#[test]
fn arithmetic_loop_sums_to_expected_value() {
    let result = run("let s = 0; for (let i = 0; i < 100000; i++) s = s + i; s;");
    assert_eq!(result, HostValue::Number(4_999_950_000.0));
}

#[test]
fn operator_precedence_and_parentheses() {
    assert_eq!(run("1 + 2 * 3;"), HostValue::Number(7.0));
    assert_eq!(run("(1 + 2) * 3;"), HostValue::Number(9.0));
    assert_eq!(run("2 ** 10;"), HostValue::Number(1024.0));
    assert_eq!(run("7 % 3;"), HostValue::Number(1.0));
    assert_eq!(run("-7 % 3;"), HostValue::Number(-1.0));
}

#[test]
fn plus_concatenates_when_either_side_is_a_string() {
    assert_eq!(run("'a' + 1;"), HostValue::String("a1".to_owned()));
    assert_eq!(run("1 + '2';"), HostValue::String("12".to_owned()));
    assert_eq!(run("1 + 2 + '3';"), HostValue::String("33".to_owned()));
}

#[test]
fn bigint_arithmetic_stays_bigint_and_rejects_mixing() {
    assert_eq!(
        run("10000000000000000000n + 1n;"),
        HostValue::BigInt("10000000000000000001".parse().unwrap())
    );
    let err = run_err("1n + 1;");
    assert_eq!(err.name, "TypeError");
}

#[test]
fn equality_follows_the_spec_tables() {
    assert_eq!(run("NaN === NaN;"), HostValue::Bool(false));
    assert_eq!(run("0 === -0;"), HostValue::Bool(true));
    assert_eq!(run("1 == '1';"), HostValue::Bool(true));
    assert_eq!(run("1 === '1';"), HostValue::Bool(false));
    assert_eq!(run("null == undefined;"), HostValue::Bool(true));
    assert_eq!(run("null === undefined;"), HostValue::Bool(false));
    assert_eq!(run("({}) === ({});"), HostValue::Bool(false));
    assert_eq!(run("let o = {}; o === o;"), HostValue::Bool(true));
}

// =============================================================================
// 2. Bindings, closures, scope
// =============================================================================

/// Closures keep their captured counter alive across calls.
#[test]
fn closures_capture_mutable_state() {
    let result = run("function mk() { let c = 0; return () => ++c; } let f = mk(); f(); f(); f();");
    assert_eq!(result, HostValue::Number(3.0));
}

#[test]
fn child_scopes_shadow_parents() {
    let result = run("let x = 1; { let x = 2; } x;");
    assert_eq!(result, HostValue::Number(1.0));
}

#[test]
fn const_rebinding_throws_and_leaves_the_value() {
    let err = run_err("const c = 1; c = 2;");
    assert_eq!(err.name, "TypeError");
    let result = run("const c = 1; try { c = 2; } catch (e) {} c;");
    assert_eq!(result, HostValue::Number(1.0));
}

#[test]
fn tdz_read_before_declaration_is_a_reference_error() {
    let err = run_err("{ probe; let probe = 1; }");
    assert_eq!(err.name, "ReferenceError");
}

#[test]
fn var_hoists_to_the_function_scope() {
    let result = run("function f() { { var inner = 5; } return inner; } f();");
    assert_eq!(result, HostValue::Number(5.0));
}

#[test]
fn per_iteration_let_bindings_are_captured_separately() {
    let result = run(
        "let fns = []; for (let i = 0; i < 3; i++) fns.push(() => i);\n\
         fns[0]() + fns[1]() + fns[2]();",
    );
    assert_eq!(result, HostValue::Number(3.0));
}

// =============================================================================
// 3. Control flow
// =============================================================================

#[test]
fn labeled_break_exits_the_outer_loop() {
    let result = run(
        "let n = 0;\n\
         outer: for (let i = 0; i < 10; i++) {\n\
           for (let j = 0; j < 10; j++) { if (j === 2) continue outer; if (i === 3) break outer; n++; }\n\
         }\n\
         n;",
    );
    assert_eq!(result, HostValue::Number(6.0));
}

#[test]
fn switch_matches_strictly_and_falls_through() {
    let source = "function pick(x) {\n\
                    let out = '';\n\
                    switch (x) {\n\
                      case 1: out += 'one ';\n\
                      case 2: out += 'two'; break;\n\
                      default: out = 'other';\n\
                    }\n\
                    return out;\n\
                  }\n";
    assert_eq!(
        run(&format!("{source} pick(1);")),
        HostValue::String("one two".to_owned())
    );
    assert_eq!(run(&format!("{source} pick(2);")), HostValue::String("two".to_owned()));
    assert_eq!(
        run(&format!("{source} pick('1');")),
        HostValue::String("other".to_owned())
    );
}

#[test]
fn finally_runs_on_every_exit_path() {
    let result = run(
        "let log = [];\n\
         function f(mode) {\n\
           try {\n\
             if (mode === 'throw') throw new Error('boom');\n\
             if (mode === 'return') return 'early';\n\
           } catch (e) {\n\
             log.push('caught');\n\
           } finally {\n\
             log.push('finally');\n\
           }\n\
           return 'late';\n\
         }\n\
         f('throw'); f('return'); f('plain');\n\
         log;",
    );
    assert_eq!(
        result,
        HostValue::Array(vec![
            HostValue::String("caught".to_owned()),
            HostValue::String("finally".to_owned()),
            HostValue::String("finally".to_owned()),
            HostValue::String("finally".to_owned()),
        ])
    );
}

#[test]
fn finally_preserves_the_pending_return_value() {
    let result = run("function f() { try { return 1; } finally { let x = 2; } } f();");
    assert_eq!(result, HostValue::Number(1.0));
}

#[test]
fn do_while_runs_the_body_at_least_once() {
    let result = run("let n = 0; do { n++; } while (false); n;");
    assert_eq!(result, HostValue::Number(1.0));
}

// =============================================================================
// 4. Objects, arrays, destructuring
// =============================================================================

#[test]
fn object_literals_read_back_in_insertion_order() {
    let result = run("let o = {a: 1, b: 'two', c: true}; o;");
    assert_eq!(
        result,
        HostValue::Object(vec![
            ("a".to_owned(), HostValue::Number(1.0)),
            ("b".to_owned(), HostValue::String("two".to_owned())),
            ("c".to_owned(), HostValue::Bool(true)),
        ])
    );
}

#[test]
fn delete_removes_the_property_and_keeps_order() {
    let result = run("let o = {a: 1, b: 2, c: 3}; delete o.b; o;");
    assert_eq!(
        result,
        HostValue::Object(vec![
            ("a".to_owned(), HostValue::Number(1.0)),
            ("c".to_owned(), HostValue::Number(3.0)),
        ])
    );
}

#[test]
fn for_in_sees_own_and_inherited_keys_in_insertion_order() {
    let result = run(
        "function Base() {} Base.prototype.inherited = 1;\n\
         let o = new Base(); o.first = 1; o.second = 2;\n\
         let keys = []; for (let k in o) keys.push(k); keys;",
    );
    assert_eq!(
        result,
        HostValue::Array(vec![
            HostValue::String("first".to_owned()),
            HostValue::String("second".to_owned()),
            HostValue::String("inherited".to_owned()),
        ])
    );
}

#[test]
fn array_length_assignment_truncates_and_extends() {
    assert_eq!(
        run("let a = [1, 2, 3]; a.length = 1; a;"),
        HostValue::Array(vec![HostValue::Number(1.0)])
    );
    assert_eq!(
        run("let a = [1]; a.length = 3; a.length;"),
        HostValue::Number(3.0)
    );
}

#[test]
fn nested_destructuring_with_defaults_and_rest() {
    let result = run(
        "let {a, b: {c = 10} = {}, ...rest} = {a: 1, b: {}, d: 4, e: 5};\n\
         let [x, , z = 9, ...tail] = [7, 8];\n\
         [a, c, rest.d, rest.e, x, z, tail.length];",
    );
    assert_eq!(
        result,
        HostValue::Array(vec![
            HostValue::Number(1.0),
            HostValue::Number(10.0),
            HostValue::Number(4.0),
            HostValue::Number(5.0),
            HostValue::Number(7.0),
            HostValue::Number(9.0),
            HostValue::Number(0.0),
        ])
    );
}

#[test]
fn destructuring_parameter_binding_applies_defaults() {
    let result = run("function dist({x = 0, y = 0} = {}) { return x * x + y * y; } dist({x: 3, y: 4});");
    assert_eq!(result, HostValue::Number(25.0));
}

#[test]
fn spread_in_calls_and_array_literals() {
    let result = run("function add3(a, b, c) { return a + b + c; } let xs = [1, 2, 3]; add3(...xs);");
    assert_eq!(result, HostValue::Number(6.0));
    let result = run("let xs = [2, 3]; [1, ...xs, 4];");
    assert_eq!(
        result,
        HostValue::Array(vec![
            HostValue::Number(1.0),
            HostValue::Number(2.0),
            HostValue::Number(3.0),
            HostValue::Number(4.0),
        ])
    );
}

#[test]
fn getters_and_setters_run_through_the_member_protocol() {
    let result = run(
        "let backing = 0;\n\
         let o = { get x() { return backing + 1; }, set x(v) { backing = v * 2; } };\n\
         o.x = 10; o.x;",
    );
    assert_eq!(result, HostValue::Number(21.0));
}

// =============================================================================
// 5. Operators on the edge
// =============================================================================

#[test]
fn typeof_covers_the_full_table() {
    assert_eq!(run("typeof undefined;"), HostValue::String("undefined".to_owned()));
    assert_eq!(run("typeof null;"), HostValue::String("object".to_owned()));
    assert_eq!(run("typeof true;"), HostValue::String("boolean".to_owned()));
    assert_eq!(run("typeof 1;"), HostValue::String("number".to_owned()));
    assert_eq!(run("typeof 1n;"), HostValue::String("bigint".to_owned()));
    assert_eq!(run("typeof 'x';"), HostValue::String("string".to_owned()));
    assert_eq!(run("typeof (() => 0);"), HostValue::String("function".to_owned()));
    // An unresolved identifier answers instead of throwing.
    assert_eq!(run("typeof neverDeclared;"), HostValue::String("undefined".to_owned()));
}

#[test]
fn optional_chaining_short_circuits_the_whole_chain() {
    assert_eq!(run("let a = null; a?.b.c.d;"), HostValue::Undefined);
    assert_eq!(run("let a = null; a?.b();"), HostValue::Undefined);
    assert_eq!(run("let a = {b: {c: 5}}; a?.b.c;"), HostValue::Number(5.0));
    let err = run_err("let a = {}; a.b.c;");
    assert_eq!(err.name, "TypeError");
}

#[test]
fn logical_assignment_operators_short_circuit() {
    assert_eq!(run("let x = null; x ??= 5; x;"), HostValue::Number(5.0));
    assert_eq!(run("let x = 1; x ??= 5; x;"), HostValue::Number(1.0));
    assert_eq!(run("let x = 0; x ||= 7; x;"), HostValue::Number(7.0));
    assert_eq!(run("let x = 1; x &&= 9; x;"), HostValue::Number(9.0));
}

#[test]
fn in_and_instanceof_walk_the_chains() {
    assert_eq!(run("'a' in {a: 1};"), HostValue::Bool(true));
    assert_eq!(run("'b' in {a: 1};"), HostValue::Bool(false));
    assert_eq!(
        run("function F() {} let o = new F(); o instanceof F;"),
        HostValue::Bool(true)
    );
}

#[test]
fn template_literals_interpolate_expressions() {
    let result = run("let who = 'world'; `hello ${who}, ${1 + 1} times`;");
    assert_eq!(result, HostValue::String("hello world, 2 times".to_owned()));
}

// =============================================================================
// 6. Functions, classes, new
// =============================================================================

#[test]
fn new_uses_the_prototype_and_explicit_object_returns_win() {
    let result = run(
        "function Point(x, y) { this.x = x; this.y = y; }\n\
         Point.prototype.norm = function () { return this.x * this.x + this.y * this.y; };\n\
         new Point(3, 4).norm();",
    );
    assert_eq!(result, HostValue::Number(25.0));
    let result = run("function F() { return {override: true}; } new F().override;");
    assert_eq!(result, HostValue::Bool(true));
}

#[test]
fn classes_support_inheritance_and_super_calls() {
    let result = run(
        "class Animal {\n\
           constructor(name) { this.name = name; }\n\
           speak() { return this.name + ' makes a sound'; }\n\
         }\n\
         class Dog extends Animal {\n\
           constructor(name) { super(name); }\n\
           speak() { return super.speak() + ': woof'; }\n\
         }\n\
         new Dog('Rex').speak();",
    );
    assert_eq!(result, HostValue::String("Rex makes a sound: woof".to_owned()));
}

#[test]
fn class_getters_and_static_methods() {
    let result = run(
        "class Circle {\n\
           constructor(r) { this.r = r; }\n\
           get area() { return 3 * this.r * this.r; }\n\
           static of(r) { return new Circle(r); }\n\
         }\n\
         Circle.of(2).area;",
    );
    assert_eq!(result, HostValue::Number(12.0));
}

#[test]
fn arrows_capture_this_lexically() {
    let result = run(
        "let o = { n: 41, make() { return () => this.n + 1; } };\n\
         let f = o.make(); f();",
    );
    assert_eq!(result, HostValue::Number(42.0));
}

#[test]
fn rest_parameters_collect_extra_arguments() {
    let result = run("function count(first, ...rest) { return rest.length; } count(1, 2, 3, 4);");
    assert_eq!(result, HostValue::Number(3.0));
}

#[test]
fn recursion_depth_is_capped_with_a_fatal_error() {
    let mut interp = Interpreter::new();
    interp.set_max_call_depth(64);
    let err = interp
        .run("function down() { return down(); } down();", "test.js")
        .expect_err("unbounded recursion must fail");
    assert!(err.fatal, "stack overflow must be fatal, got {err:?}");
    assert_eq!(err.name, "RangeError");
}

#[test]
fn stack_overflow_is_not_catchable_in_script() {
    let mut interp = Interpreter::new();
    interp.set_max_call_depth(64);
    let err = interp
        .run(
            "function down() { return down(); } try { down(); } catch (e) { 'caught'; }",
            "test.js",
        )
        .expect_err("the overflow must bypass catch");
    assert!(err.fatal);
}

// =============================================================================
// 7. Generators
// =============================================================================

/// for..of drives the generator through the iterator protocol.
#[test]
fn generator_yields_collect_through_for_of() {
    let result = run("function* g() { yield 1; yield 2; yield 3; } let r = []; for (let x of g()) r.push(x); r;");
    assert_eq!(
        result,
        HostValue::Array(vec![
            HostValue::Number(1.0),
            HostValue::Number(2.0),
            HostValue::Number(3.0),
        ])
    );
}

#[test]
fn generator_next_sends_values_into_yields() {
    let result = run(
        "function* g() { let got = yield 'first'; yield got * 2; }\n\
         let it = g();\n\
         let a = it.next().value;\n\
         let b = it.next(21).value;\n\
         [a, b];",
    );
    assert_eq!(
        result,
        HostValue::Array(vec![HostValue::String("first".to_owned()), HostValue::Number(42.0)])
    );
}

#[test]
fn generator_completion_is_latched() {
    let result = run(
        "function* g() { yield 1; }\n\
         let it = g(); it.next(); it.next();\n\
         let after = it.next();\n\
         [after.value === undefined, after.done];",
    );
    assert_eq!(result, HostValue::Array(vec![HostValue::Bool(true), HostValue::Bool(true)]));
}

#[test]
fn generator_return_runs_finally_blocks() {
    let result = run(
        "let cleaned = false;\n\
         function* g() { try { yield 1; yield 2; } finally { cleaned = true; } }\n\
         let it = g(); it.next(); it.return(99);\n\
         cleaned;",
    );
    assert_eq!(result, HostValue::Bool(true));
}

#[test]
fn generator_throw_is_catchable_inside_the_body() {
    let result = run(
        "function* g() { try { yield 1; } catch (e) { yield 'caught:' + e.message; } }\n\
         let it = g(); it.next();\n\
         it.throw(new Error('oops')).value;",
    );
    assert_eq!(result, HostValue::String("caught:oops".to_owned()));
}

#[test]
fn yield_star_delegates_to_inner_generators() {
    let result = run(
        "function* inner() { yield 2; yield 3; return 'inner-done'; }\n\
         function* outer() { yield 1; let got = yield* inner(); yield got; }\n\
         let r = []; for (let x of outer()) r.push(x); r;",
    );
    assert_eq!(
        result,
        HostValue::Array(vec![
            HostValue::Number(1.0),
            HostValue::Number(2.0),
            HostValue::Number(3.0),
            HostValue::String("inner-done".to_owned()),
        ])
    );
}

#[test]
fn early_break_closes_the_generator() {
    let result = run(
        "let closed = false;\n\
         function* g() { try { yield 1; yield 2; } finally { closed = true; } }\n\
         for (let x of g()) break;\n\
         closed;",
    );
    assert_eq!(result, HostValue::Bool(true));
}

#[test]
fn strings_iterate_by_code_point() {
    let result = run("let r = []; for (let c of 'héŷ') r.push(c); r;");
    assert_eq!(
        result,
        HostValue::Array(vec![
            HostValue::String("h".to_owned()),
            HostValue::String("é".to_owned()),
            HostValue::String("ŷ".to_owned()),
        ])
    );
}

#[test]
fn custom_symbol_iterator_objects_work_in_for_of() {
    let result = run(
        "let iterable = {\n\
           [Symbol.iterator]() {\n\
             let n = 0;\n\
             return { next() { n++; return {value: n, done: n > 3}; } };\n\
           }\n\
         };\n\
         let sum = 0; for (let x of iterable) sum += x; sum;",
    );
    assert_eq!(result, HostValue::Number(6.0));
}

// =============================================================================
// 8. Errors & stack traces
// =============================================================================

/// The uncaught ReferenceError carries the three-deep call stack.
#[test]
fn uncaught_reference_error_lists_the_call_stack() {
    let err = run_err(
        "function outer() { return middle(); }\n\
         function middle() { return inner(); }\n\
         function inner() { return undef; }\n\
         outer();",
    );
    assert_eq!(err.name, "ReferenceError");
    assert_eq!(err.message, "undef is not defined");
    let functions: Vec<&str> = err.frames.iter().map(|f| f.function.as_str()).collect();
    assert_eq!(
        functions,
        vec!["inner", "middle", "outer"],
        "stack must list frames innermost first"
    );
    let formatted = err.format();
    assert!(formatted.starts_with("ReferenceError: undef is not defined"));
    assert!(formatted.contains("at inner (test.js:"));
}

#[test]
fn thrown_errors_expose_name_message_and_stack() {
    let result = run(
        "function boom() { throw new TypeError('bad thing'); }\n\
         let got;\n\
         try { boom(); } catch (e) { got = [e.name, e.message, typeof e.stack]; }\n\
         got;",
    );
    assert_eq!(
        result,
        HostValue::Array(vec![
            HostValue::String("TypeError".to_owned()),
            HostValue::String("bad thing".to_owned()),
            HostValue::String("string".to_owned()),
        ])
    );
}

#[test]
fn arbitrary_values_can_be_thrown_and_caught() {
    let result = run("try { throw 42; } catch (e) { e; }");
    assert_eq!(result, HostValue::Number(42.0));
}

#[test]
fn error_cause_is_carried() {
    let result = run("try { throw new Error('outer', {cause: 'root'}); } catch (e) { e.cause; }");
    assert_eq!(result, HostValue::String("root".to_owned()));
}

#[test]
fn console_log_writes_through_the_installed_sink() {
    use std::{cell::RefCell, rc::Rc};

    #[derive(Debug, Default, Clone)]
    struct SharedSink(Rc<RefCell<String>>);

    impl lark::PrintWriter for SharedSink {
        fn print(&mut self, line: &str) {
            self.0.borrow_mut().push_str(line);
            self.0.borrow_mut().push('\n');
        }
    }

    let sink = SharedSink::default();
    let mut interp = Interpreter::new();
    interp.set_print(Box::new(sink.clone()));
    interp
        .run("console.log('x =', 42, [1, 2]);", "test.js")
        .expect("script runs");
    assert_eq!(sink.0.borrow().as_str(), "x = 42 [ 1, 2 ]\n");
}

// =============================================================================
// 9. Maps, Sets, weak collections
// =============================================================================

#[test]
fn map_set_get_has_delete_round_trip() {
    let result = run(
        "let m = new Map();\n\
         m.set('k', 7).set(1, 'one');\n\
         [m.size, m.get('k'), m.get(1), m.has('k'), m.delete('k'), m.has('k')];",
    );
    assert_eq!(
        result,
        HostValue::Array(vec![
            HostValue::Number(2.0),
            HostValue::Number(7.0),
            HostValue::String("one".to_owned()),
            HostValue::Bool(true),
            HostValue::Bool(true),
            HostValue::Bool(false),
        ])
    );
}

#[test]
fn map_keys_use_same_value_zero() {
    let result = run("let m = new Map(); m.set(NaN, 'found'); m.get(NaN);");
    assert_eq!(result, HostValue::String("found".to_owned()));
}

#[test]
fn sets_deduplicate_and_iterate_in_order() {
    let result = run("let s = new Set([1, 2, 2, 3]); let r = []; for (let v of s) r.push(v); r;");
    assert_eq!(
        result,
        HostValue::Array(vec![
            HostValue::Number(1.0),
            HostValue::Number(2.0),
            HostValue::Number(3.0),
        ])
    );
}

#[test]
fn maps_iterate_as_key_value_pairs() {
    let result = run(
        "let m = new Map(); m.set('a', 1); m.set('b', 2);\n\
         let r = []; for (let pair of m) r.push(pair[0], pair[1]); r;",
    );
    assert_eq!(
        result,
        HostValue::Array(vec![
            HostValue::String("a".to_owned()),
            HostValue::Number(1.0),
            HostValue::String("b".to_owned()),
            HostValue::Number(2.0),
        ])
    );
}

#[test]
fn weakmap_rejects_primitive_keys() {
    let err = run_err("new WeakMap().set(1, 'x');");
    assert_eq!(err.name, "TypeError");
    let result = run("let wm = new WeakMap(); let k = {}; wm.set(k, 'v'); wm.get(k);");
    assert_eq!(result, HostValue::String("v".to_owned()));
}

// =============================================================================
// 10. Typed arrays
// =============================================================================

#[test]
fn typed_arrays_wrap_and_clamp_per_element_kind() {
    let result = run("let a = new Int8Array(2); a[0] = 200; a[0];");
    assert_eq!(result, HostValue::Number(-56.0));
    let result = run("let a = new Uint8ClampedArray(1); a[0] = 300; a[0];");
    assert_eq!(result, HostValue::Number(255.0));
}

#[test]
fn bigint_typed_arrays_use_the_bigint_lane() {
    let result = run("let a = new BigInt64Array(1); a[0] = -5n; a[0];");
    assert_eq!(result, HostValue::BigInt((-5).into()));
    let err = run_err("let a = new BigInt64Array(1); a[0] = 5;");
    assert_eq!(err.name, "TypeError");
}
