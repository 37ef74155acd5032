//! Module binding: the parse/instantiate/evaluate phases, live export
//! views, namespace imports, and circular imports, driven through an
//! in-memory loader.

use std::collections::HashMap;

use lark::{HostValue, Interpreter, ModuleLoader, ModuleState};
use pretty_assertions::assert_eq;

/// Loader over an in-memory map; specifiers are used as paths directly.
#[derive(Debug, Default)]
struct MapLoader {
    sources: HashMap<String, String>,
}

impl MapLoader {
    fn with(sources: &[(&str, &str)]) -> Self {
        Self {
            sources: sources
                .iter()
                .map(|(path, text)| ((*path).to_owned(), (*text).to_owned()))
                .collect(),
        }
    }
}

impl ModuleLoader for MapLoader {
    fn resolve_path(&mut self, specifier: &str, _parent: &str) -> Option<String> {
        Some(specifier.trim_start_matches("./").to_owned())
    }

    fn load_source(&mut self, path: &str) -> Option<String> {
        self.sources.get(path).cloned()
    }
}

fn load_and_run(interp: &mut Interpreter, loader: &mut MapLoader, entry: &str) -> lark::Module {
    let module = interp.load_module(entry, loader).expect("entry module loads");
    interp.instantiate_module(module, loader).expect("instantiation succeeds");
    interp.evaluate_module(module).expect("evaluation succeeds");
    module
}

// =============================================================================
// 1. Phases
// =============================================================================

/// The state machine walks forward only.
#[test]
fn module_states_progress_one_way() {
    let mut loader = MapLoader::with(&[("m.js", "export let x = 1;")]);
    let mut interp = Interpreter::new();
    let module = interp.load_module("m.js", &mut loader).expect("loads");
    assert_eq!(interp.module_state(module), ModuleState::Uninstantiated);
    interp.instantiate_module(module, &mut loader).expect("instantiates");
    assert_eq!(interp.module_state(module), ModuleState::Instantiated);
    interp.evaluate_module(module).expect("evaluates");
    assert_eq!(interp.module_state(module), ModuleState::Evaluated);
    // Re-evaluation is a no-op, not a reset.
    interp.evaluate_module(module).expect("second evaluate is fine");
    assert_eq!(interp.module_state(module), ModuleState::Evaluated);
}

#[test]
fn loading_is_cached_by_path() {
    let mut loader = MapLoader::with(&[("m.js", "export let x = 1;")]);
    let mut interp = Interpreter::new();
    let first = interp.load_module("m.js", &mut loader).expect("loads");
    let second = interp.load_module("m.js", &mut loader).expect("cached");
    assert_eq!(first, second);
    assert_eq!(interp.cached_module("m.js"), Some(first));
    assert_eq!(interp.cached_module("other.js"), None);
}

#[test]
fn missing_modules_error_at_load() {
    let mut loader = MapLoader::default();
    let mut interp = Interpreter::new();
    let err = interp.load_module("ghost.js", &mut loader).expect_err("must fail");
    assert!(err.message.contains("ghost.js"));
}

// =============================================================================
// 2. Imports & exports
// =============================================================================

#[test]
fn named_and_default_imports_wire_through() {
    let mut loader = MapLoader::with(&[
        (
            "math.js",
            "export function square(n) { return n * n; }\n\
             export const tau = 6.28;\n\
             export default 'math-module';",
        ),
        (
            "main.js",
            "import label, {square, tau} from './math.js';\n\
             export let result = square(4);\n\
             export let pi2 = tau;\n\
             export let name = label;",
        ),
    ]);
    let mut interp = Interpreter::new();
    let main = load_and_run(&mut interp, &mut loader, "main.js");
    assert_eq!(interp.module_export(main, "result"), Some(HostValue::Number(16.0)));
    assert_eq!(interp.module_export(main, "pi2"), Some(HostValue::Number(6.28)));
    assert_eq!(
        interp.module_export(main, "name"),
        Some(HostValue::String("math-module".to_owned()))
    );
}

/// `export {x}` is a live view: re-reading after a later assignment
/// observes the new value.
#[test]
fn exports_are_live_bindings_not_snapshots() {
    let mut loader = MapLoader::with(&[
        (
            "counter.js",
            "export let count = 0;\n\
             export function bump() { count = count + 1; }",
        ),
        (
            "main.js",
            "import {count, bump} from './counter.js';\n\
             export function read() { return count; }\n\
             export { bump };",
        ),
    ]);
    let mut interp = Interpreter::new();
    let counter = interp.load_module("counter.js", &mut loader).expect("loads");
    let main = load_and_run(&mut interp, &mut loader, "main.js");

    assert_eq!(interp.module_export(counter, "count"), Some(HostValue::Number(0.0)));
    // Mutate through the exporter's own function, then observe through
    // both the exporter and the importer.
    interp
        .run_module_function(main, "bump")
        .expect("bump() runs");
    assert_eq!(interp.module_export(counter, "count"), Some(HostValue::Number(1.0)));
}

#[test]
fn namespace_imports_expose_every_export() {
    let mut loader = MapLoader::with(&[
        ("lib.js", "export let a = 1; export let b = 2;"),
        (
            "main.js",
            "import * as lib from './lib.js';\n\
             export let sum = lib.a + lib.b;",
        ),
    ]);
    let mut interp = Interpreter::new();
    let main = load_and_run(&mut interp, &mut loader, "main.js");
    assert_eq!(interp.module_export(main, "sum"), Some(HostValue::Number(3.0)));
}

#[test]
fn missing_exports_resolve_to_none() {
    let mut loader = MapLoader::with(&[("m.js", "export let present = 1;")]);
    let mut interp = Interpreter::new();
    let module = load_and_run(&mut interp, &mut loader, "m.js");
    assert_eq!(interp.module_export(module, "present"), Some(HostValue::Number(1.0)));
    assert_eq!(interp.module_export(module, "absent"), None);
}

#[test]
fn module_exports_lists_all_names() {
    let mut loader = MapLoader::with(&[("m.js", "export let a = 1; export const b = 'two';")]);
    let mut interp = Interpreter::new();
    let module = load_and_run(&mut interp, &mut loader, "m.js");
    let exports = interp.module_exports(module);
    assert_eq!(
        exports,
        vec![
            ("a".to_owned(), HostValue::Number(1.0)),
            ("b".to_owned(), HostValue::String("two".to_owned())),
        ]
    );
}

// =============================================================================
// 3. Circular imports
// =============================================================================

/// A module under instantiation is visible to its importers, so the cycle
/// links without recursing forever; function hoisting makes the calls work
/// at evaluation time.
#[test]
fn circular_imports_instantiate_and_evaluate() {
    let mut loader = MapLoader::with(&[
        (
            "even.js",
            "import {odd} from './odd.js';\n\
             export function even(n) { return n === 0 ? true : odd(n - 1); }",
        ),
        (
            "odd.js",
            "import {even} from './even.js';\n\
             export function odd(n) { return n === 0 ? false : even(n - 1); }",
        ),
        (
            "main.js",
            "import {even} from './even.js';\n\
             export let answer = even(10);",
        ),
    ]);
    let mut interp = Interpreter::new();
    let main = load_and_run(&mut interp, &mut loader, "main.js");
    assert_eq!(interp.module_export(main, "answer"), Some(HostValue::Bool(true)));
}
