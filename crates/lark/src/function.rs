//! Scripted function values.
//!
//! A function value pairs a definition in a shared [`Program`] with the
//! environment it captured at evaluation time. The captured environment is a
//! strong edge, so a closure keeps its defining scope alive for as long as
//! the function handle itself lives.

use std::sync::Arc;

use indexmap::IndexMap;

use crate::{
    ast::{FnFlags, FuncId, Program},
    heap::HeapId,
    intern::{Istr, well_known},
    value::Value,
};

/// A scripted function: definition + captured environment + wiring.
#[derive(Debug)]
pub(crate) struct JsFunction {
    program: Arc<Program>,
    func: FuncId,
    /// Captured defining environment.
    env: HeapId,
    name: Istr,
    /// `[[HomeObject]]` for `super` resolution in class methods.
    home: Option<HeapId>,
    /// The function's `.prototype` object (absent for arrows and methods).
    prototype: Option<HeapId>,
    /// Parent class constructor, for `super(...)` in derived constructors.
    parent_ctor: Option<HeapId>,
    is_class_constructor: bool,
    /// Static class members, stored on the constructor function.
    statics: IndexMap<Istr, Value>,
}

impl JsFunction {
    /// Creates a plain closure. All heap edges transfer one reference each.
    pub fn new(program: Arc<Program>, func: FuncId, env: HeapId) -> Self {
        let name = program.func(func).name.unwrap_or(*well_known::ANONYMOUS);
        Self {
            program,
            func,
            env,
            name,
            home: None,
            prototype: None,
            parent_ctor: None,
            is_class_constructor: false,
            statics: IndexMap::new(),
        }
    }

    pub fn with_name(mut self, name: Istr) -> Self {
        self.name = name;
        self
    }

    pub fn with_home(mut self, home: HeapId) -> Self {
        self.home = Some(home);
        self
    }

    pub fn mark_class_constructor(&mut self, parent_ctor: Option<HeapId>) {
        self.is_class_constructor = true;
        self.parent_ctor = parent_ctor;
    }

    #[must_use]
    pub fn program(&self) -> &Arc<Program> {
        &self.program
    }

    #[must_use]
    pub fn func_id(&self) -> FuncId {
        self.func
    }

    #[must_use]
    pub fn env(&self) -> HeapId {
        self.env
    }

    #[must_use]
    pub fn name(&self) -> Istr {
        self.name
    }

    #[must_use]
    pub fn flags(&self) -> FnFlags {
        self.program.func(self.func).flags
    }

    #[must_use]
    pub fn home(&self) -> Option<HeapId> {
        self.home
    }

    #[must_use]
    pub fn prototype(&self) -> Option<HeapId> {
        self.prototype
    }

    /// Installs the `.prototype` object; transfers one reference.
    pub fn set_prototype(&mut self, prototype: HeapId) -> Option<HeapId> {
        self.prototype.replace(prototype)
    }

    #[must_use]
    pub fn parent_ctor(&self) -> Option<HeapId> {
        self.parent_ctor
    }

    #[must_use]
    pub fn is_class_constructor(&self) -> bool {
        self.is_class_constructor
    }

    /// Stores a static member; returns the displaced value.
    pub fn set_static(&mut self, name: Istr, value: Value) -> Option<Value> {
        self.statics.insert(name, value)
    }

    #[must_use]
    pub fn get_static(&self, name: Istr) -> Option<&Value> {
        self.statics.get(&name)
    }

    pub fn trace(&self, out: &mut Vec<HeapId>) {
        out.push(self.env);
        out.extend(self.home);
        out.extend(self.prototype);
        out.extend(self.parent_ctor);
        for value in self.statics.values() {
            if let Some(id) = value.ref_id() {
                out.push(id);
            }
        }
    }

    pub fn estimate_size(&self) -> usize {
        std::mem::size_of::<Self>()
    }
}
