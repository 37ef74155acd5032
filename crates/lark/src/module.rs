//! Module binding: instantiation/evaluation phases and live import
//! resolution.
//!
//! File I/O, path resolution, and caching of *sources* belong to the host's
//! [`ModuleLoader`]; the engine owns the module records, their one-way state
//! machine, and the wiring of imports to exports. An import binding is a
//! `ModuleBinding` value — a late-bound view into the exporting module's
//! environment, resolved on every read, so `export {x}` observes later
//! assignments to `x` (live bindings, not snapshots).
//!
//! Circular imports work because a module's record is registered before its
//! dependencies are instantiated: an importer encountered mid-cycle sees
//! the in-progress module and wires bindings against it.

use std::sync::{Arc, LazyLock};

use ahash::AHashMap;

use crate::{
    ast::{ImportBinding, Program},
    env::{self, BindingKind},
    error::{Error, ErrorKind, RunError, RunResult},
    heap::{HeapData, HeapId},
    host::HostValue,
    intern::{Istr, intern, intern_unbounded},
    interp::{Interpreter, ResumeInput, TaskFlow, TaskState},
    object::{JsObject, PropKey},
    parse::Script,
    value::Value,
};

/// Internal binding name of a module's default export.
static DEFAULT_EXPORT: LazyLock<Istr> = LazyLock::new(|| intern("*default*"));

pub(crate) fn default_export_name() -> Istr {
    *DEFAULT_EXPORT
}

/// Identity of a loaded module within one interpreter.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct ModuleId(u32);

impl ModuleId {
    fn index(self) -> usize {
        self.0 as usize
    }
}

/// Host-facing module handle.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Module {
    pub(crate) id: ModuleId,
}

/// Module lifecycle; transitions are one-way, never reset.
#[derive(Debug, Clone, Copy, PartialEq, Eq, serde::Serialize)]
pub enum ModuleState {
    Uninstantiated,
    Instantiating,
    Instantiated,
    Evaluating,
    Evaluated,
}

/// Source access the engine needs from the host.
pub trait ModuleLoader {
    /// Resolves a specifier relative to the importing module's path.
    fn resolve_path(&mut self, specifier: &str, parent: &str) -> Option<String>;

    /// Reads a module's source text.
    fn load_source(&mut self, path: &str) -> Option<String>;
}

#[derive(Debug)]
pub(crate) struct ModuleRecord {
    path: Box<str>,
    program: Arc<Program>,
    state: ModuleState,
    /// Module environment; owned. `None` until instantiation.
    env: Option<HeapId>,
    deps: Vec<ModuleId>,
}

/// All modules loaded into one interpreter.
#[derive(Debug, Default)]
pub(crate) struct ModuleRegistry {
    records: Vec<ModuleRecord>,
    by_path: AHashMap<Box<str>, ModuleId>,
}

impl ModuleRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn get(&self, id: ModuleId) -> &ModuleRecord {
        &self.records[id.index()]
    }

    fn get_mut(&mut self, id: ModuleId) -> &mut ModuleRecord {
        &mut self.records[id.index()]
    }

    pub fn by_path(&self, path: &str) -> Option<ModuleId> {
        self.by_path.get(path).copied()
    }

    fn insert(&mut self, record: ModuleRecord) -> ModuleId {
        let id = ModuleId(u32::try_from(self.records.len()).expect("module registry full"));
        self.by_path.insert(record.path.clone(), id);
        self.records.push(record);
        id
    }
}

impl Interpreter {
    /// Loads and parses a module (phase 1). Idempotent per path.
    pub fn load_module(&mut self, path: &str, loader: &mut dyn ModuleLoader) -> Result<Module, Error> {
        if let Some(id) = self.modules.by_path(path) {
            return Ok(Module { id });
        }
        let Some(source) = loader.load_source(path) else {
            return Err(Error::new(
                "Error",
                format!("Cannot find module '{path}'"),
                Vec::new(),
            ));
        };
        let script = Script::parse_module(&source, path)?;
        let id = self.modules.insert(ModuleRecord {
            path: path.into(),
            program: script.program().clone(),
            state: ModuleState::Uninstantiated,
            env: None,
            deps: Vec::new(),
        });
        Ok(Module { id })
    }

    /// The cached module for `path`, if it was loaded before.
    #[must_use]
    pub fn cached_module(&self, path: &str) -> Option<Module> {
        self.modules.by_path(path).map(|id| Module { id })
    }

    /// The module's lifecycle state.
    #[must_use]
    pub fn module_state(&self, module: Module) -> ModuleState {
        self.modules.get(module.id).state
    }

    /// Instantiates a module (phase 2): allocates its environment, loads
    /// and instantiates dependencies, wires import bindings.
    pub fn instantiate_module(&mut self, module: Module, loader: &mut dyn ModuleLoader) -> Result<(), Error> {
        self.instantiate_inner(module.id, loader)
            .map_err(|err| self.error_from_run_error(err))
    }

    fn instantiate_inner(&mut self, id: ModuleId, loader: &mut dyn ModuleLoader) -> RunResult<()> {
        match self.modules.get(id).state {
            ModuleState::Uninstantiated => {}
            // In-progress (circular import) or already done: nothing to do.
            _ => return Ok(()),
        }
        self.modules.get_mut(id).state = ModuleState::Instantiating;

        let program = self.modules.get(id).program.clone();
        let module_env = env::create_child(&mut self.heap, self.global_env)?;
        self.modules.get_mut(id).env = Some(module_env);

        let parent_path = self.modules.get(id).path.to_string();
        for import in &program.imports {
            let Some(dep_path) = loader.resolve_path(&import.specifier, &parent_path) else {
                return Err(RunError::simple(
                    ErrorKind::Error,
                    format!("Cannot resolve module '{spec}'", spec = import.specifier),
                ));
            };
            let dep = self
                .load_module(&dep_path, loader)
                .map_err(|err| RunError::simple(ErrorKind::Error, err.message))?;
            self.instantiate_inner(dep.id, loader)?;
            self.modules.get_mut(id).deps.push(dep.id);

            for binding in &import.bindings {
                match binding {
                    ImportBinding::Named { imported, local } => {
                        env::define(
                            &mut self.heap,
                            module_env,
                            *local,
                            Value::ModuleBinding(dep.id, *imported),
                            BindingKind::Const,
                            true,
                        );
                    }
                    ImportBinding::Default { local } => {
                        env::define(
                            &mut self.heap,
                            module_env,
                            *local,
                            Value::ModuleBinding(dep.id, default_export_name()),
                            BindingKind::Const,
                            true,
                        );
                    }
                    ImportBinding::Namespace { local } => {
                        let namespace = self.build_namespace_object(dep.id)?;
                        env::define(&mut self.heap, module_env, *local, namespace, BindingKind::Const, true);
                    }
                }
            }
        }
        self.modules.get_mut(id).state = ModuleState::Instantiated;
        Ok(())
    }

    /// A namespace object: one live `ModuleBinding` per export.
    fn build_namespace_object(&mut self, dep: ModuleId) -> RunResult<Value> {
        let program = self.modules.get(dep).program.clone();
        let proto = self.object_proto;
        if let Some(proto) = proto {
            self.heap.inc_ref(proto);
        }
        let ns = self.alloc(HeapData::Object(JsObject::new(proto)))?;
        for export in &program.exports {
            self.object_set_raw(
                ns,
                PropKey::Str(export.exported),
                Value::ModuleBinding(dep, export.exported),
            );
        }
        Ok(Value::Ref(ns))
    }

    /// Evaluates a module's top-level code (phase 3), dependencies first.
    /// Re-evaluation is a no-op; a module seen mid-evaluation (cycle) is
    /// skipped.
    pub fn evaluate_module(&mut self, module: Module) -> Result<(), Error> {
        self.evaluate_inner(module.id)
            .map_err(|err| self.error_from_run_error(err))
    }

    fn evaluate_inner(&mut self, id: ModuleId) -> RunResult<()> {
        match self.modules.get(id).state {
            ModuleState::Instantiated => {}
            ModuleState::Evaluating | ModuleState::Evaluated => return Ok(()),
            state => {
                return Err(RunError::simple(
                    ErrorKind::Error,
                    format!("Cannot evaluate a module in state {state:?}"),
                ));
            }
        }
        self.modules.get_mut(id).state = ModuleState::Evaluating;

        let deps = self.modules.get(id).deps.clone();
        for dep in deps {
            self.evaluate_inner(dep)?;
        }

        let program = self.modules.get(id).program.clone();
        let module_env = self.modules.get(id).env.expect("instantiated module has an environment");
        let cache_base = self.ensure_caches(&program);
        self.heap.inc_ref(module_env);
        let mut task = TaskState::for_program(program, cache_base, module_env);
        let outcome = self.run_task(&mut task, ResumeInput::Start);
        task.dispose(&mut self.heap);
        match outcome {
            Ok(TaskFlow::Done(value)) => {
                value.drop_with_heap(&mut self.heap);
                self.modules.get_mut(id).state = ModuleState::Evaluated;
                Ok(())
            }
            Ok(TaskFlow::Await(value) | TaskFlow::Yield(value)) => {
                value.drop_with_heap(&mut self.heap);
                Err(RunError::syntax_error("await and yield are only valid inside functions"))
            }
            Err(err) => Err(err),
        }
    }

    /// Resolves one live export view. Chained re-exports resolve through.
    pub(crate) fn resolve_module_binding(&mut self, module: ModuleId, export: Istr) -> RunResult<Value> {
        let mut module = module;
        let mut export = export;
        // Bounded hop count guards against pathological re-export cycles.
        for _ in 0..64 {
            let record = self.modules.get(module);
            let Some(module_env) = record.env else {
                return Err(RunError::simple(
                    ErrorKind::ReferenceError,
                    format!("Cannot access '{export}' of an uninstantiated module"),
                ));
            };
            // Map the exported name to its local binding.
            let local = if export == default_export_name() {
                export
            } else {
                match record.program.exports.iter().find(|e| e.exported == export) {
                    Some(record) => record.local,
                    None => {
                        return Err(RunError::simple(
                            ErrorKind::ReferenceError,
                            format!("The requested module does not provide an export named '{export}'"),
                        ));
                    }
                }
            };
            match env::get(&self.heap, module_env, local)? {
                Some(Value::ModuleBinding(next_module, next_export)) => {
                    module = next_module;
                    export = next_export;
                }
                Some(value) => return Ok(value),
                None => {
                    return Err(RunError::simple(
                        ErrorKind::ReferenceError,
                        format!("{local} is not defined"),
                    ));
                }
            }
        }
        Err(RunError::range_error("Module re-export chain is too deep"))
    }

    /// Reads one export as a host value.
    pub fn module_export(&mut self, module: Module, name: &str) -> Option<HostValue> {
        let export = if name == "default" {
            default_export_name()
        } else {
            intern_unbounded(name)
        };
        match self.resolve_module_binding(module.id, export) {
            Ok(value) => {
                let host = self.to_host_value(&value);
                value.drop_with_heap(&mut self.heap);
                Some(host)
            }
            Err(err) => {
                // Resolution failures surface as absent exports; release
                // any partially built error state.
                let _ = self.error_from_run_error(err);
                None
            }
        }
    }

    /// Resolves an exported function and calls it with no arguments.
    ///
    /// A convenience for hosts poking module entry points; microtasks are
    /// drained afterwards like any other top-level turn.
    pub fn run_module_function(&mut self, module: Module, name: &str) -> Result<HostValue, Error> {
        let export = if name == "default" {
            default_export_name()
        } else {
            intern_unbounded(name)
        };
        let callee = self
            .resolve_module_binding(module.id, export)
            .map_err(|err| self.error_from_run_error(err))?;
        let outcome = self.call_value_sync(callee, Value::Undefined, Vec::new());
        let result = match outcome {
            Ok(value) => {
                let host = self.to_host_value(&value);
                value.drop_with_heap(&mut self.heap);
                Ok(host)
            }
            Err(err) => Err(self.error_from_run_error(err)),
        };
        self.drain_microtasks();
        result
    }

    /// All named exports as host values.
    pub fn module_exports(&mut self, module: Module) -> Vec<(String, HostValue)> {
        let program = self.modules.get(module.id).program.clone();
        let mut out = Vec::new();
        for export in &program.exports {
            let name = export.exported.to_string();
            if let Some(value) = self.module_export(module, &name) {
                out.push((name, value));
            }
        }
        out
    }
}
