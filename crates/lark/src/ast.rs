//! The engine's own AST: a tagged-union tree in flat arenas.
//!
//! The external parser's output is lowered into this form (`parse.rs`).
//! Nodes are addressed by `ExprId`/`StmtId`/`FuncId` indices into per-kind
//! vectors owned by [`Program`], which keeps suspension state (`Frame`s
//! holding node ids) free of lifetimes and lets one parsed program be shared
//! by any number of interpreter instances.
//!
//! The AST is immutable after lowering. Mutable per-site state (property
//! inline caches) lives in a side table indexed by the `CacheId`s lowering
//! assigns to member expressions.

use num_bigint::BigInt;

use crate::{intern::Istr, shape::CacheId};

/// Source position (1-indexed line and column).
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub(crate) struct Pos {
    pub line: u32,
    pub column: u32,
}

macro_rules! arena_id {
    ($(#[$doc:meta])* $name:ident) => {
        $(#[$doc])*
        #[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
        pub(crate) struct $name(u32);

        impl $name {
            pub fn new(index: usize) -> Self {
                Self(u32::try_from(index).expect(concat!(stringify!($name), " arena exceeds u32")))
            }

            #[inline]
            pub fn index(self) -> usize {
                self.0 as usize
            }
        }
    };
}

arena_id!(
    /// Index into [`Program::exprs`].
    ExprId
);
arena_id!(
    /// Index into [`Program::stmts`].
    StmtId
);
arena_id!(
    /// Index into [`Program::funcs`].
    FuncId
);
arena_id!(
    /// Index into [`Program::classes`].
    ClassId
);
arena_id!(
    /// Index into [`Program::pats`].
    PatId
);

/// A whole parsed program or module body.
#[derive(Debug, Default)]
pub(crate) struct Program {
    /// Source file name, for stack frames.
    pub file: Istr,
    /// Top-level statements, in order.
    pub body: Vec<StmtId>,
    pub stmts: Vec<Stmt>,
    pub exprs: Vec<Expr>,
    pub funcs: Vec<FunctionDef>,
    pub classes: Vec<ClassDef>,
    pub pats: Vec<Pattern>,
    /// Number of property-cache slots assigned during lowering.
    pub cache_count: usize,
    /// Function-scope hoisting for the top level.
    pub hoisted: Hoisted,
    /// Import records, in source order (module evaluation wiring).
    pub imports: Vec<ImportRecord>,
    /// Export records: exported name -> local binding.
    pub exports: Vec<ExportRecord>,
}

impl Program {
    #[inline]
    pub fn expr(&self, id: ExprId) -> &Expr {
        &self.exprs[id.index()]
    }

    #[inline]
    pub fn stmt(&self, id: StmtId) -> &Stmt {
        &self.stmts[id.index()]
    }

    #[inline]
    pub fn func(&self, id: FuncId) -> &FunctionDef {
        &self.funcs[id.index()]
    }

    #[inline]
    pub fn class(&self, id: ClassId) -> &ClassDef {
        &self.classes[id.index()]
    }

    #[inline]
    pub fn pat(&self, id: PatId) -> &Pattern {
        &self.pats[id.index()]
    }
}

/// `var`-hoisting work for one function scope (or the top level): names to
/// pre-bind as `undefined`, and function declarations to pre-bind to their
/// closures, both on frame entry.
#[derive(Debug, Default)]
pub(crate) struct Hoisted {
    pub vars: Vec<Istr>,
    pub funcs: Vec<(Istr, FuncId)>,
}

// ============================================================================
// Statements
// ============================================================================

#[derive(Debug)]
pub(crate) struct Stmt {
    pub kind: StmtKind,
    pub pos: Pos,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub(crate) enum DeclKind {
    Var,
    Let,
    Const,
}

#[derive(Debug)]
pub(crate) struct Declarator {
    pub pattern: PatId,
    pub init: Option<ExprId>,
}

#[derive(Debug)]
pub(crate) enum ForInit {
    VarDecl(StmtId),
    Expr(ExprId),
}

/// Left side of `for...in` / `for...of`.
#[derive(Debug)]
pub(crate) enum ForTarget {
    Decl { kind: DeclKind, pattern: PatId },
    Pattern(PatId),
}

#[derive(Debug)]
pub(crate) struct SwitchCase {
    /// `None` for the `default:` clause.
    pub test: Option<ExprId>,
    pub body: Vec<StmtId>,
}

#[derive(Debug)]
pub(crate) enum StmtKind {
    Expr(ExprId),
    VarDecl {
        kind: DeclKind,
        decls: Vec<Declarator>,
    },
    FunctionDecl {
        name: Istr,
        func: FuncId,
    },
    ClassDecl {
        name: Istr,
        /// An `ExprKind::Class` node evaluated for the binding.
        expr: ExprId,
    },
    Return(Option<ExprId>),
    If {
        test: ExprId,
        consequent: StmtId,
        alternate: Option<StmtId>,
    },
    Block(Vec<StmtId>),
    While {
        test: ExprId,
        body: StmtId,
    },
    DoWhile {
        body: StmtId,
        test: ExprId,
    },
    For {
        init: Option<ForInit>,
        test: Option<ExprId>,
        update: Option<ExprId>,
        body: StmtId,
    },
    ForIn {
        left: ForTarget,
        object: ExprId,
        body: StmtId,
    },
    ForOf {
        left: ForTarget,
        iterable: ExprId,
        body: StmtId,
    },
    Break(Option<Istr>),
    Continue(Option<Istr>),
    Throw(ExprId),
    Try {
        block: StmtId,
        /// Catch binding; `None` for `catch {}` or when there is no handler.
        param: Option<PatId>,
        handler: Option<StmtId>,
        finalizer: Option<StmtId>,
    },
    Labeled {
        label: Istr,
        body: StmtId,
    },
    Switch {
        discriminant: ExprId,
        cases: Vec<SwitchCase>,
    },
    /// `export default <expr>`: evaluates and stores the module's default
    /// export slot.
    ExportDefault(ExprId),
    Empty,
}

// ============================================================================
// Expressions
// ============================================================================

#[derive(Debug)]
pub(crate) struct Expr {
    pub kind: ExprKind,
    pub pos: Pos,
}

#[derive(Debug)]
pub(crate) enum Literal {
    Null,
    Bool(bool),
    Number(f64),
    Str(Box<str>),
    BigInt(BigInt),
    Regex { pattern: Box<str>, flags: Box<str> },
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub(crate) enum BinaryOp {
    Add,
    Sub,
    Mul,
    Div,
    Mod,
    Exp,
    Eq,
    Ne,
    StrictEq,
    StrictNe,
    Lt,
    Le,
    Gt,
    Ge,
    BitAnd,
    BitOr,
    BitXor,
    Shl,
    Shr,
    UShr,
    In,
    Instanceof,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub(crate) enum LogicalOp {
    And,
    Or,
    Nullish,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub(crate) enum UnaryOp {
    Minus,
    Plus,
    Not,
    BitNot,
    Typeof,
    Void,
    Delete,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub(crate) enum UpdateOp {
    Increment,
    Decrement,
}

/// Compound-assignment operator; `Assign` is plain `=`. The logical forms
/// short-circuit before evaluating the right side.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub(crate) enum AssignOp {
    Assign,
    Add,
    Sub,
    Mul,
    Div,
    Mod,
    Exp,
    Shl,
    Shr,
    UShr,
    BitAnd,
    BitOr,
    BitXor,
    AndAssign,
    OrAssign,
    NullishAssign,
}

impl AssignOp {
    /// The underlying binary operator of a compound assignment.
    pub fn binary_op(self) -> Option<BinaryOp> {
        match self {
            Self::Assign | Self::AndAssign | Self::OrAssign | Self::NullishAssign => None,
            Self::Add => Some(BinaryOp::Add),
            Self::Sub => Some(BinaryOp::Sub),
            Self::Mul => Some(BinaryOp::Mul),
            Self::Div => Some(BinaryOp::Div),
            Self::Mod => Some(BinaryOp::Mod),
            Self::Exp => Some(BinaryOp::Exp),
            Self::Shl => Some(BinaryOp::Shl),
            Self::Shr => Some(BinaryOp::Shr),
            Self::UShr => Some(BinaryOp::UShr),
            Self::BitAnd => Some(BinaryOp::BitAnd),
            Self::BitOr => Some(BinaryOp::BitOr),
            Self::BitXor => Some(BinaryOp::BitXor),
        }
    }
}

#[derive(Debug)]
pub(crate) enum MemberProp {
    Ident(Istr),
    Computed(ExprId),
}

#[derive(Debug)]
pub(crate) enum Argument {
    Expr(ExprId),
    Spread(ExprId),
}

#[derive(Debug)]
pub(crate) enum ArrayElement {
    Item(ExprId),
    Spread(ExprId),
    /// Elision (`[a, , b]`), which reads back as `undefined`.
    Hole,
}

#[derive(Debug)]
pub(crate) enum PropName {
    Ident(Istr),
    Computed(ExprId),
}

#[derive(Debug)]
pub(crate) enum ObjectProp {
    KeyValue { key: PropName, value: ExprId },
    Method { key: PropName, func: FuncId },
    Getter { key: PropName, func: FuncId },
    Setter { key: PropName, func: FuncId },
    Spread(ExprId),
}

#[derive(Debug)]
pub(crate) enum AssignTarget {
    Ident(Istr),
    Member(ExprId),
    Pattern(PatId),
}

#[derive(Debug)]
pub(crate) enum ExprKind {
    Literal(Literal),
    Ident(Istr),
    This,
    /// `super`; valid only as a member base or call callee.
    SuperBase,
    Array(Vec<ArrayElement>),
    Object(Vec<ObjectProp>),
    Function(FuncId),
    Arrow(FuncId),
    Class(ClassId),
    /// Template literal: `quasis.len() == exprs.len() + 1`.
    Template {
        quasis: Vec<Box<str>>,
        exprs: Vec<ExprId>,
    },
    Unary {
        op: UnaryOp,
        expr: ExprId,
    },
    Update {
        op: UpdateOp,
        prefix: bool,
        target: ExprId,
    },
    Binary {
        op: BinaryOp,
        left: ExprId,
        right: ExprId,
    },
    Logical {
        op: LogicalOp,
        left: ExprId,
        right: ExprId,
    },
    Assign {
        op: AssignOp,
        target: AssignTarget,
        value: ExprId,
    },
    Conditional {
        test: ExprId,
        consequent: ExprId,
        alternate: ExprId,
    },
    Call {
        callee: ExprId,
        args: Vec<Argument>,
        /// `?.()` call.
        optional: bool,
    },
    New {
        callee: ExprId,
        args: Vec<Argument>,
    },
    Member {
        object: ExprId,
        prop: MemberProp,
        /// `?.` access.
        optional: bool,
        /// Inline-cache slot assigned at lowering.
        cache: CacheId,
    },
    Sequence(Vec<ExprId>),
    Await(ExprId),
    Yield {
        arg: Option<ExprId>,
        delegate: bool,
    },
    /// Optional-chain boundary: resets the short-circuit flag after the
    /// chain inside it finishes.
    Chain(ExprId),
}

// ============================================================================
// Patterns (destructuring)
// ============================================================================

#[derive(Debug)]
pub(crate) enum PatternKey {
    Named(Istr),
    Computed(ExprId),
}

#[derive(Debug)]
pub(crate) struct ObjectPatternProp {
    pub key: PatternKey,
    pub value: PatId,
}

/// A recursive binding pattern, used at declaration, parameter, and
/// assignment sites. Children live in the pattern arena so evaluator
/// frames can address them by id.
#[derive(Debug)]
pub(crate) enum Pattern {
    Ident(Istr),
    /// Assignment-site leaf writing through a member expression.
    Member(ExprId),
    Array {
        elements: Vec<Option<PatId>>,
        rest: Option<PatId>,
    },
    Object {
        props: Vec<ObjectPatternProp>,
        rest: Option<PatId>,
    },
    /// `pattern = default`.
    Default {
        inner: PatId,
        default: ExprId,
    },
}

// ============================================================================
// Functions & classes
// ============================================================================

#[derive(Debug, Clone, Copy, Default)]
pub(crate) struct FnFlags {
    pub is_async: bool,
    pub is_generator: bool,
    pub is_arrow: bool,
}

#[derive(Debug)]
pub(crate) struct ParamDef {
    pub pattern: PatId,
    pub default: Option<ExprId>,
}

#[derive(Debug)]
pub(crate) enum FunctionBody {
    Block(Vec<StmtId>),
    /// Arrow concise body.
    Expr(ExprId),
}

#[derive(Debug)]
pub(crate) struct FunctionDef {
    pub name: Option<Istr>,
    pub params: Vec<ParamDef>,
    pub rest: Option<PatId>,
    pub body: FunctionBody,
    pub flags: FnFlags,
    pub hoisted: Hoisted,
    pub pos: Pos,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub(crate) enum MethodKind {
    Method,
    Getter,
    Setter,
}

#[derive(Debug)]
pub(crate) struct MethodDef {
    pub key: PropName,
    pub func: FuncId,
    pub is_static: bool,
    pub kind: MethodKind,
}

#[derive(Debug)]
pub(crate) struct ClassDef {
    pub name: Option<Istr>,
    /// `extends` clause.
    pub parent: Option<ExprId>,
    /// Constructor body; lowering synthesizes an empty one when the class
    /// declares none.
    pub constructor: FuncId,
    pub methods: Vec<MethodDef>,
    pub pos: Pos,
}

// ============================================================================
// Module records
// ============================================================================

#[derive(Debug)]
pub(crate) enum ImportBinding {
    Named { imported: Istr, local: Istr },
    Default { local: Istr },
    Namespace { local: Istr },
}

#[derive(Debug)]
pub(crate) struct ImportRecord {
    /// The literal module specifier, resolved by the external loader.
    pub specifier: Box<str>,
    pub bindings: Vec<ImportBinding>,
    pub pos: Pos,
}

#[derive(Debug)]
pub(crate) struct ExportRecord {
    /// Name visible to importers.
    pub exported: Istr,
    /// Local binding it is a live view of.
    pub local: Istr,
}
