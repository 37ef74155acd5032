//! Front-end wiring: the external oxc parser, lowered into the engine's
//! arena AST.
//!
//! Parsing proper is an external concern; this module only drives the
//! parser and performs the lowering pass, which also does the static work
//! the evaluator relies on: `var`/function hoisting tables per function
//! scope, inline-cache slot assignment for member expressions, label
//! validation, and synthesis of missing class constructors. Anything the
//! engine does not implement (private fields, tagged templates,
//! re-exports) surfaces as a SyntaxError here, not at run time.

use std::sync::Arc;

use oxc_allocator::Allocator;
use oxc_ast::ast;
use oxc_parser::Parser;
use oxc_span::{SourceType, Span};
use oxc_syntax::operator::{
    AssignmentOperator, BinaryOperator, LogicalOperator, UnaryOperator, UpdateOperator,
};

use crate::{
    ast::{
        Argument, ArrayElement, AssignOp, AssignTarget, BinaryOp, ClassDef, ClassId, DeclKind, Declarator, Expr,
        ExprId, ExprKind, FnFlags, ForInit, ForTarget, FuncId, FunctionBody, FunctionDef, Hoisted, ImportBinding,
        ImportRecord, Literal, LogicalOp, MemberProp, MethodDef, MethodKind, ObjectPatternProp, ObjectProp, ParamDef,
        PatId, Pattern, PatternKey, Pos, Program, PropName, Stmt, StmtId, StmtKind, SwitchCase, UnaryOp, UpdateOp,
    },
    error::{Error, StackFrame},
    intern::{Istr, intern_unbounded},
    value::number_to_string,
};

/// A parsed, lowered program, shareable across interpreter instances.
#[derive(Debug, Clone)]
pub struct Script {
    program: Arc<Program>,
}

impl Script {
    /// Parses classic script source.
    pub fn parse(source: &str, file: &str) -> Result<Self, Error> {
        Self::parse_goal(source, file, SourceType::cjs())
    }

    /// Parses module source (`import`/`export` allowed).
    pub fn parse_module(source: &str, file: &str) -> Result<Self, Error> {
        Self::parse_goal(source, file, SourceType::mjs())
    }

    fn parse_goal(source: &str, file: &str, goal: SourceType) -> Result<Self, Error> {
        let allocator = Allocator::default();
        let parsed = Parser::new(&allocator, source, goal).parse();
        if let Some(diagnostic) = parsed.errors.first() {
            return Err(syntax_error(format!("{diagnostic}"), file));
        }
        let mut lowerer = Lowerer::new(source, file);
        let body = lowerer
            .lower_stmts(&parsed.program.body, true)
            .map_err(|message| syntax_error(message, file))?;
        let mut program = lowerer.finish();
        program.body = body;
        Ok(Self {
            program: Arc::new(program),
        })
    }

    pub(crate) fn program(&self) -> &Arc<Program> {
        &self.program
    }
}

fn syntax_error(message: String, file: &str) -> Error {
    Error::new(
        "SyntaxError",
        message,
        vec![StackFrame::new(
            crate::intern::intern("<parse>"),
            intern_unbounded(file),
            1,
            1,
        )],
    )
}

type Lower<T> = Result<T, String>;

struct Lowerer {
    /// Byte offset of each line start, for span -> line/column mapping.
    line_starts: Vec<usize>,
    source_len: usize,
    program: Program,
    /// Function-scope hoisting stack; the last entry is the innermost
    /// function (or the top level).
    scopes: Vec<Hoisted>,
    /// Labels in scope, for static validation of labeled break/continue.
    labels: Vec<Istr>,
}

impl Lowerer {
    fn new(source: &str, file: &str) -> Self {
        let mut line_starts = vec![0];
        for (offset, byte) in source.bytes().enumerate() {
            if byte == b'\n' {
                line_starts.push(offset + 1);
            }
        }
        let mut program = Program::default();
        program.file = intern_unbounded(file);
        Self {
            line_starts,
            source_len: source.len(),
            program,
            scopes: vec![Hoisted::default()],
            labels: Vec::new(),
        }
    }

    fn finish(mut self) -> Program {
        self.program.hoisted = self.scopes.pop().expect("top-level scope remains");
        self.program
    }

    fn pos(&self, span: Span) -> Pos {
        let offset = (span.start as usize).min(self.source_len);
        let line = match self.line_starts.binary_search(&offset) {
            Ok(index) => index,
            Err(index) => index - 1,
        };
        Pos {
            line: u32::try_from(line + 1).unwrap_or(u32::MAX),
            column: u32::try_from(offset - self.line_starts[line] + 1).unwrap_or(u32::MAX),
        }
    }

    fn name(&self, text: &str) -> Istr {
        intern_unbounded(text)
    }

    // ---- arena pushers -----------------------------------------------------

    fn push_expr(&mut self, kind: ExprKind, span: Span) -> ExprId {
        let id = ExprId::new(self.program.exprs.len());
        self.program.exprs.push(Expr {
            kind,
            pos: self.pos(span),
        });
        id
    }

    fn push_stmt(&mut self, kind: StmtKind, span: Span) -> StmtId {
        let id = StmtId::new(self.program.stmts.len());
        self.program.stmts.push(Stmt {
            kind,
            pos: self.pos(span),
        });
        id
    }

    fn push_pat(&mut self, pat: Pattern) -> PatId {
        let id = PatId::new(self.program.pats.len());
        self.program.pats.push(pat);
        id
    }

    fn push_func(&mut self, def: FunctionDef) -> FuncId {
        let id = FuncId::new(self.program.funcs.len());
        self.program.funcs.push(def);
        id
    }

    fn push_class(&mut self, def: ClassDef) -> ClassId {
        let id = ClassId::new(self.program.classes.len());
        self.program.classes.push(def);
        id
    }

    fn next_cache(&mut self) -> crate::shape::CacheId {
        let id = crate::shape::CacheId::new(self.program.cache_count);
        self.program.cache_count += 1;
        id
    }

    fn scope(&mut self) -> &mut Hoisted {
        self.scopes.last_mut().expect("scope stack is never empty")
    }

    // ---- statements --------------------------------------------------------

    /// Lowers a statement list. `function_level` statements contribute
    /// function declarations to the enclosing hoist table.
    fn lower_stmts(&mut self, stmts: &[ast::Statement<'_>], function_level: bool) -> Lower<Vec<StmtId>> {
        let mut out = Vec::with_capacity(stmts.len());
        for stmt in stmts {
            out.push(self.lower_stmt(stmt, function_level)?);
        }
        Ok(out)
    }

    fn lower_stmt(&mut self, stmt: &ast::Statement<'_>, function_level: bool) -> Lower<StmtId> {
        use ast::Statement as S;
        match stmt {
            S::ExpressionStatement(it) => {
                let expr = self.lower_expr(&it.expression)?;
                Ok(self.push_stmt(StmtKind::Expr(expr), it.span))
            }
            S::VariableDeclaration(it) => self.lower_var_decl(it),
            S::FunctionDeclaration(it) => {
                let func = self.lower_function(it)?;
                let name = it
                    .id
                    .as_ref()
                    .map(|id| self.name(&id.name))
                    .ok_or_else(|| "function declaration requires a name".to_owned())?;
                if function_level {
                    self.scope().funcs.push((name, func));
                }
                Ok(self.push_stmt(StmtKind::FunctionDecl { name, func }, it.span))
            }
            S::ClassDeclaration(it) => {
                let class = self.lower_class(it)?;
                let name = it
                    .id
                    .as_ref()
                    .map(|id| self.name(&id.name))
                    .ok_or_else(|| "class declaration requires a name".to_owned())?;
                let expr = self.push_expr(ExprKind::Class(class), it.span);
                Ok(self.push_stmt(StmtKind::ClassDecl { name, expr }, it.span))
            }
            S::ReturnStatement(it) => {
                let argument = it.argument.as_ref().map(|a| self.lower_expr(a)).transpose()?;
                Ok(self.push_stmt(StmtKind::Return(argument), it.span))
            }
            S::IfStatement(it) => {
                let test = self.lower_expr(&it.test)?;
                let consequent = self.lower_stmt(&it.consequent, false)?;
                let alternate = it.alternate.as_ref().map(|a| self.lower_stmt(a, false)).transpose()?;
                Ok(self.push_stmt(
                    StmtKind::If {
                        test,
                        consequent,
                        alternate,
                    },
                    it.span,
                ))
            }
            S::BlockStatement(it) => {
                let body = self.lower_stmts(&it.body, false)?;
                Ok(self.push_stmt(StmtKind::Block(body), it.span))
            }
            S::WhileStatement(it) => {
                let test = self.lower_expr(&it.test)?;
                let body = self.lower_stmt(&it.body, false)?;
                Ok(self.push_stmt(StmtKind::While { test, body }, it.span))
            }
            S::DoWhileStatement(it) => {
                let body = self.lower_stmt(&it.body, false)?;
                let test = self.lower_expr(&it.test)?;
                Ok(self.push_stmt(StmtKind::DoWhile { body, test }, it.span))
            }
            S::ForStatement(it) => {
                let init = match &it.init {
                    Some(ast::ForStatementInit::VariableDeclaration(decl)) => {
                        Some(ForInit::VarDecl(self.lower_var_decl(decl)?))
                    }
                    Some(other) => {
                        let expr = other
                            .as_expression()
                            .ok_or_else(|| "unsupported for-loop initializer".to_owned())?;
                        Some(ForInit::Expr(self.lower_expr(expr)?))
                    }
                    None => None,
                };
                let test = it.test.as_ref().map(|t| self.lower_expr(t)).transpose()?;
                let update = it.update.as_ref().map(|u| self.lower_expr(u)).transpose()?;
                let body = self.lower_stmt(&it.body, false)?;
                Ok(self.push_stmt(
                    StmtKind::For {
                        init,
                        test,
                        update,
                        body,
                    },
                    it.span,
                ))
            }
            S::ForInStatement(it) => {
                let left = self.lower_for_target(&it.left)?;
                let object = self.lower_expr(&it.right)?;
                let body = self.lower_stmt(&it.body, false)?;
                Ok(self.push_stmt(StmtKind::ForIn { left, object, body }, it.span))
            }
            S::ForOfStatement(it) => {
                if it.r#await {
                    return Err("for await..of is not supported".to_owned());
                }
                let left = self.lower_for_target(&it.left)?;
                let iterable = self.lower_expr(&it.right)?;
                let body = self.lower_stmt(&it.body, false)?;
                Ok(self.push_stmt(
                    StmtKind::ForOf {
                        left,
                        iterable,
                        body,
                    },
                    it.span,
                ))
            }
            S::BreakStatement(it) => {
                let label = it.label.as_ref().map(|l| self.name(&l.name));
                if let Some(label) = label
                    && !self.labels.contains(&label)
                {
                    return Err(format!("Undefined label '{label}'"));
                }
                Ok(self.push_stmt(StmtKind::Break(label), it.span))
            }
            S::ContinueStatement(it) => {
                let label = it.label.as_ref().map(|l| self.name(&l.name));
                if let Some(label) = label
                    && !self.labels.contains(&label)
                {
                    return Err(format!("Undefined label '{label}'"));
                }
                Ok(self.push_stmt(StmtKind::Continue(label), it.span))
            }
            S::ThrowStatement(it) => {
                let argument = self.lower_expr(&it.argument)?;
                Ok(self.push_stmt(StmtKind::Throw(argument), it.span))
            }
            S::TryStatement(it) => {
                let block_body = self.lower_stmts(&it.block.body, false)?;
                let block = self.push_stmt(StmtKind::Block(block_body), it.block.span);
                let (param, handler) = match &it.handler {
                    Some(catch) => {
                        let param = catch
                            .param
                            .as_ref()
                            .map(|p| self.lower_binding_pattern(&p.pattern))
                            .transpose()?;
                        let body = self.lower_stmts(&catch.body.body, false)?;
                        let handler = self.push_stmt(StmtKind::Block(body), catch.body.span);
                        (param, Some(handler))
                    }
                    None => (None, None),
                };
                let finalizer = match &it.finalizer {
                    Some(finalizer) => {
                        let body = self.lower_stmts(&finalizer.body, false)?;
                        Some(self.push_stmt(StmtKind::Block(body), finalizer.span))
                    }
                    None => None,
                };
                Ok(self.push_stmt(
                    StmtKind::Try {
                        block,
                        param,
                        handler,
                        finalizer,
                    },
                    it.span,
                ))
            }
            S::LabeledStatement(it) => {
                let label = self.name(&it.label.name);
                self.labels.push(label);
                let body = self.lower_stmt(&it.body, false);
                self.labels.pop();
                Ok(self.push_stmt(StmtKind::Labeled { label, body: body? }, it.span))
            }
            S::SwitchStatement(it) => {
                let discriminant = self.lower_expr(&it.discriminant)?;
                let mut cases = Vec::with_capacity(it.cases.len());
                for case in &it.cases {
                    let test = case.test.as_ref().map(|t| self.lower_expr(t)).transpose()?;
                    let body = self.lower_stmts(&case.consequent, false)?;
                    cases.push(SwitchCase { test, body });
                }
                Ok(self.push_stmt(StmtKind::Switch { discriminant, cases }, it.span))
            }
            S::EmptyStatement(it) => Ok(self.push_stmt(StmtKind::Empty, it.span)),
            S::DebuggerStatement(it) => Ok(self.push_stmt(StmtKind::Empty, it.span)),
            S::ImportDeclaration(it) => self.lower_import(it),
            S::ExportNamedDeclaration(it) => self.lower_export_named(it),
            S::ExportDefaultDeclaration(it) => self.lower_export_default(it),
            S::ExportAllDeclaration(_) => Err("export * re-exports are not supported".to_owned()),
            other => Err(format!("unsupported statement: {:?}", std::mem::discriminant(other))),
        }
    }

    fn lower_var_decl(&mut self, it: &ast::VariableDeclaration<'_>) -> Lower<StmtId> {
        let kind = match it.kind {
            ast::VariableDeclarationKind::Var => DeclKind::Var,
            ast::VariableDeclarationKind::Let => DeclKind::Let,
            ast::VariableDeclarationKind::Const => DeclKind::Const,
            _ => return Err("unsupported declaration kind".to_owned()),
        };
        let mut decls = Vec::with_capacity(it.declarations.len());
        for declarator in &it.declarations {
            let pattern = self.lower_binding_pattern(&declarator.id)?;
            if kind == DeclKind::Var {
                let mut names = Vec::new();
                crate::interp::collect_pattern_names(&self.program, pattern, &mut names);
                self.scope().vars.extend(names);
            }
            let init = declarator.init.as_ref().map(|i| self.lower_expr(i)).transpose()?;
            decls.push(Declarator { pattern, init });
        }
        Ok(self.push_stmt(StmtKind::VarDecl { kind, decls }, it.span))
    }

    fn lower_for_target(&mut self, left: &ast::ForStatementLeft<'_>) -> Lower<ForTarget> {
        match left {
            ast::ForStatementLeft::VariableDeclaration(decl) => {
                let kind = match decl.kind {
                    ast::VariableDeclarationKind::Var => DeclKind::Var,
                    ast::VariableDeclarationKind::Let => DeclKind::Let,
                    ast::VariableDeclarationKind::Const => DeclKind::Const,
                    _ => return Err("unsupported declaration kind".to_owned()),
                };
                let declarator = decl
                    .declarations
                    .first()
                    .ok_or_else(|| "for-loop declaration requires a binding".to_owned())?;
                let pattern = self.lower_binding_pattern(&declarator.id)?;
                if kind == DeclKind::Var {
                    let mut names = Vec::new();
                    crate::interp::collect_pattern_names(&self.program, pattern, &mut names);
                    self.scope().vars.extend(names);
                }
                Ok(ForTarget::Decl { kind, pattern })
            }
            other => {
                let target = other
                    .as_assignment_target()
                    .ok_or_else(|| "unsupported for-loop target".to_owned())?;
                let pattern = self.lower_assignment_target(target)?;
                Ok(ForTarget::Pattern(pattern))
            }
        }
    }

    // ---- module records ----------------------------------------------------

    fn lower_import(&mut self, it: &ast::ImportDeclaration<'_>) -> Lower<StmtId> {
        let mut bindings = Vec::new();
        if let Some(specifiers) = &it.specifiers {
            for specifier in specifiers {
                use ast::ImportDeclarationSpecifier as IS;
                match specifier {
                    IS::ImportSpecifier(s) => bindings.push(ImportBinding::Named {
                        imported: self.name(s.imported.name().as_str()),
                        local: self.name(&s.local.name),
                    }),
                    IS::ImportDefaultSpecifier(s) => bindings.push(ImportBinding::Default {
                        local: self.name(&s.local.name),
                    }),
                    IS::ImportNamespaceSpecifier(s) => bindings.push(ImportBinding::Namespace {
                        local: self.name(&s.local.name),
                    }),
                }
            }
        }
        let record = ImportRecord {
            specifier: it.source.value.as_str().into(),
            bindings,
            pos: self.pos(it.span),
        };
        self.program.imports.push(record);
        Ok(self.push_stmt(StmtKind::Empty, it.span))
    }

    fn lower_export_named(&mut self, it: &ast::ExportNamedDeclaration<'_>) -> Lower<StmtId> {
        if it.source.is_some() {
            return Err("re-exports are not supported".to_owned());
        }
        for specifier in &it.specifiers {
            let local = self.name(specifier.local.name().as_str());
            let exported = self.name(specifier.exported.name().as_str());
            self.program
                .exports
                .push(crate::ast::ExportRecord { exported, local });
        }
        if let Some(declaration) = &it.declaration {
            use ast::Declaration as D;
            let stmt = match declaration {
                D::VariableDeclaration(decl) => {
                    let stmt = self.lower_var_decl(decl)?;
                    for declarator in &decl.declarations {
                        let pattern = self.lower_binding_pattern(&declarator.id)?;
                        let mut names = Vec::new();
                        crate::interp::collect_pattern_names(&self.program, pattern, &mut names);
                        for name in names {
                            self.program.exports.push(crate::ast::ExportRecord {
                                exported: name,
                                local: name,
                            });
                        }
                    }
                    stmt
                }
                D::FunctionDeclaration(func) => {
                    let stmt = self.lower_stmt_function_export(func)?;
                    stmt
                }
                D::ClassDeclaration(class) => {
                    let lowered = self.lower_class(class)?;
                    let name = class
                        .id
                        .as_ref()
                        .map(|id| self.name(&id.name))
                        .ok_or_else(|| "exported class requires a name".to_owned())?;
                    self.program.exports.push(crate::ast::ExportRecord {
                        exported: name,
                        local: name,
                    });
                    let expr = self.push_expr(ExprKind::Class(lowered), class.span);
                    self.push_stmt(StmtKind::ClassDecl { name, expr }, class.span)
                }
                _ => return Err("unsupported export declaration".to_owned()),
            };
            return Ok(stmt);
        }
        Ok(self.push_stmt(StmtKind::Empty, it.span))
    }

    fn lower_stmt_function_export(&mut self, func: &ast::Function<'_>) -> Lower<StmtId> {
        let lowered = self.lower_function(func)?;
        let name = func
            .id
            .as_ref()
            .map(|id| self.name(&id.name))
            .ok_or_else(|| "exported function requires a name".to_owned())?;
        self.scope().funcs.push((name, lowered));
        self.program.exports.push(crate::ast::ExportRecord {
            exported: name,
            local: name,
        });
        Ok(self.push_stmt(StmtKind::FunctionDecl { name, func: lowered }, func.span))
    }

    fn lower_export_default(&mut self, it: &ast::ExportDefaultDeclaration<'_>) -> Lower<StmtId> {
        use ast::ExportDefaultDeclarationKind as K;
        let expr = match &it.declaration {
            K::FunctionDeclaration(func) => {
                let lowered = self.lower_function(func)?;
                self.push_expr(ExprKind::Function(lowered), func.span)
            }
            K::ClassDeclaration(class) => {
                let lowered = self.lower_class(class)?;
                self.push_expr(ExprKind::Class(lowered), class.span)
            }
            other => {
                let expression = other
                    .as_expression()
                    .ok_or_else(|| "unsupported default export".to_owned())?;
                self.lower_expr(expression)?
            }
        };
        Ok(self.push_stmt(StmtKind::ExportDefault(expr), it.span))
    }

    // ---- patterns ----------------------------------------------------------

    fn lower_binding_pattern(&mut self, pattern: &ast::BindingPattern<'_>) -> Lower<PatId> {
        use ast::BindingPatternKind as K;
        let lowered = match &pattern.kind {
            K::BindingIdentifier(id) => Pattern::Ident(self.name(&id.name)),
            K::ObjectPattern(object) => {
                let mut props = Vec::with_capacity(object.properties.len());
                for prop in &object.properties {
                    let key = self.lower_pattern_key(&prop.key, prop.computed)?;
                    let value = self.lower_binding_pattern(&prop.value)?;
                    props.push(ObjectPatternProp { key, value });
                }
                let rest = object
                    .rest
                    .as_ref()
                    .map(|r| self.lower_binding_pattern(&r.argument))
                    .transpose()?;
                Pattern::Object { props, rest }
            }
            K::ArrayPattern(array) => {
                let mut elements = Vec::with_capacity(array.elements.len());
                for element in &array.elements {
                    elements.push(
                        element
                            .as_ref()
                            .map(|e| self.lower_binding_pattern(e))
                            .transpose()?,
                    );
                }
                let rest = array
                    .rest
                    .as_ref()
                    .map(|r| self.lower_binding_pattern(&r.argument))
                    .transpose()?;
                Pattern::Array { elements, rest }
            }
            K::AssignmentPattern(assignment) => {
                let inner = self.lower_binding_pattern(&assignment.left)?;
                let default = self.lower_expr(&assignment.right)?;
                Pattern::Default { inner, default }
            }
        };
        Ok(self.push_pat(lowered))
    }

    fn lower_pattern_key(&mut self, key: &ast::PropertyKey<'_>, computed: bool) -> Lower<PatternKey> {
        if !computed
            && let Some(name) = self.static_property_name(key)
        {
            return Ok(PatternKey::Named(name));
        }
        let expression = key
            .as_expression()
            .ok_or_else(|| "unsupported property key".to_owned())?;
        Ok(PatternKey::Computed(self.lower_expr(expression)?))
    }

    /// Destructuring assignment targets (`[a, b.c] = xs`).
    fn lower_assignment_target(&mut self, target: &ast::AssignmentTarget<'_>) -> Lower<PatId> {
        use ast::AssignmentTarget as T;
        let lowered = match target {
            T::AssignmentTargetIdentifier(id) => Pattern::Ident(self.name(&id.name)),
            T::StaticMemberExpression(_) | T::ComputedMemberExpression(_) => {
                let expression = target
                    .as_simple_assignment_target()
                    .and_then(|t| t.as_member_expression())
                    .ok_or_else(|| "unsupported assignment target".to_owned())?;
                let member = self.lower_member_target(expression)?;
                Pattern::Member(member)
            }
            T::ArrayAssignmentTarget(array) => {
                let mut elements = Vec::with_capacity(array.elements.len());
                for element in &array.elements {
                    elements.push(
                        element
                            .as_ref()
                            .map(|e| self.lower_assignment_target_maybe_default(e))
                            .transpose()?,
                    );
                }
                let rest = array
                    .rest
                    .as_ref()
                    .map(|r| self.lower_assignment_target(&r.target))
                    .transpose()?;
                Pattern::Array { elements, rest }
            }
            T::ObjectAssignmentTarget(object) => {
                let mut props = Vec::with_capacity(object.properties.len());
                for prop in &object.properties {
                    use ast::AssignmentTargetProperty as P;
                    match prop {
                        P::AssignmentTargetPropertyIdentifier(p) => {
                            let name = self.name(&p.binding.name);
                            let inner = self.push_pat(Pattern::Ident(name));
                            let value = match &p.init {
                                Some(init) => {
                                    let default = self.lower_expr(init)?;
                                    self.push_pat(Pattern::Default { inner, default })
                                }
                                None => inner,
                            };
                            props.push(ObjectPatternProp {
                                key: PatternKey::Named(name),
                                value,
                            });
                        }
                        P::AssignmentTargetPropertyProperty(p) => {
                            let key = self.lower_pattern_key(&p.name, p.computed)?;
                            let value = self.lower_assignment_target_maybe_default(&p.binding)?;
                            props.push(ObjectPatternProp { key, value });
                        }
                    }
                }
                let rest = object
                    .rest
                    .as_ref()
                    .map(|r| self.lower_assignment_target(&r.target))
                    .transpose()?;
                Pattern::Object { props, rest }
            }
            _ => return Err("unsupported assignment target".to_owned()),
        };
        Ok(self.push_pat(lowered))
    }

    fn lower_assignment_target_maybe_default(
        &mut self,
        target: &ast::AssignmentTargetMaybeDefault<'_>,
    ) -> Lower<PatId> {
        use ast::AssignmentTargetMaybeDefault as T;
        match target {
            T::AssignmentTargetWithDefault(with_default) => {
                let inner = self.lower_assignment_target(&with_default.binding)?;
                let default = self.lower_expr(&with_default.init)?;
                Ok(self.push_pat(Pattern::Default { inner, default }))
            }
            other => {
                let target = other
                    .as_assignment_target()
                    .ok_or_else(|| "unsupported assignment target".to_owned())?;
                self.lower_assignment_target(target)
            }
        }
    }

    /// A member expression used as an assignment-pattern leaf.
    fn lower_member_target(&mut self, member: &ast::MemberExpression<'_>) -> Lower<ExprId> {
        use ast::MemberExpression as M;
        match member {
            M::StaticMemberExpression(it) => {
                let object = self.lower_expr(&it.object)?;
                let cache = self.next_cache();
                Ok(self.push_expr(
                    ExprKind::Member {
                        object,
                        prop: MemberProp::Ident(self.name(&it.property.name)),
                        optional: false,
                        cache,
                    },
                    it.span,
                ))
            }
            M::ComputedMemberExpression(it) => {
                let object = self.lower_expr(&it.object)?;
                let key = self.lower_expr(&it.expression)?;
                let cache = self.next_cache();
                Ok(self.push_expr(
                    ExprKind::Member {
                        object,
                        prop: MemberProp::Computed(key),
                        optional: false,
                        cache,
                    },
                    it.span,
                ))
            }
            M::PrivateFieldExpression(_) => Err("private fields are not supported".to_owned()),
        }
    }

    // ---- functions & classes ----------------------------------------------

    fn lower_function(&mut self, func: &ast::Function<'_>) -> Lower<FuncId> {
        let body = func
            .body
            .as_ref()
            .ok_or_else(|| "function requires a body".to_owned())?;
        self.scopes.push(Hoisted::default());
        let result = (|| -> Lower<(Vec<ParamDef>, Option<PatId>, Vec<StmtId>)> {
            let (params, rest) = self.lower_params(&func.params)?;
            let stmts = self.lower_stmts(&body.statements, true)?;
            Ok((params, rest, stmts))
        })();
        let hoisted = self.scopes.pop().expect("function scope pushed above");
        let (params, rest, stmts) = result?;
        Ok(self.push_func(FunctionDef {
            name: func.id.as_ref().map(|id| self.name(&id.name)),
            params,
            rest,
            body: FunctionBody::Block(stmts),
            flags: FnFlags {
                is_async: func.r#async,
                is_generator: func.generator,
                is_arrow: false,
            },
            hoisted,
            pos: self.pos(func.span),
        }))
    }

    fn lower_arrow(&mut self, arrow: &ast::ArrowFunctionExpression<'_>) -> Lower<FuncId> {
        self.scopes.push(Hoisted::default());
        let result = (|| -> Lower<(Vec<ParamDef>, Option<PatId>, FunctionBody)> {
            let (params, rest) = self.lower_params(&arrow.params)?;
            let body = if arrow.expression {
                let stmt = arrow
                    .body
                    .statements
                    .first()
                    .ok_or_else(|| "arrow body requires an expression".to_owned())?;
                let ast::Statement::ExpressionStatement(expr_stmt) = stmt else {
                    return Err("arrow body requires an expression".to_owned());
                };
                FunctionBody::Expr(self.lower_expr(&expr_stmt.expression)?)
            } else {
                FunctionBody::Block(self.lower_stmts(&arrow.body.statements, true)?)
            };
            Ok((params, rest, body))
        })();
        let hoisted = self.scopes.pop().expect("arrow scope pushed above");
        let (params, rest, body) = result?;
        Ok(self.push_func(FunctionDef {
            name: None,
            params,
            rest,
            body,
            flags: FnFlags {
                is_async: arrow.r#async,
                is_generator: false,
                is_arrow: true,
            },
            hoisted,
            pos: self.pos(arrow.span),
        }))
    }

    fn lower_params(&mut self, params: &ast::FormalParameters<'_>) -> Lower<(Vec<ParamDef>, Option<PatId>)> {
        let mut out = Vec::with_capacity(params.items.len());
        for param in &params.items {
            // Split a top-level default off the pattern so missing
            // arguments take the cheap path.
            if let ast::BindingPatternKind::AssignmentPattern(assignment) = &param.pattern.kind {
                let pattern = self.lower_binding_pattern(&assignment.left)?;
                let default = self.lower_expr(&assignment.right)?;
                out.push(ParamDef {
                    pattern,
                    default: Some(default),
                });
            } else {
                let pattern = self.lower_binding_pattern(&param.pattern)?;
                out.push(ParamDef { pattern, default: None });
            }
        }
        let rest = params
            .rest
            .as_ref()
            .map(|r| self.lower_binding_pattern(&r.argument))
            .transpose()?;
        Ok((out, rest))
    }

    fn lower_class(&mut self, class: &ast::Class<'_>) -> Lower<ClassId> {
        let parent = class
            .super_class
            .as_ref()
            .map(|s| self.lower_expr(s))
            .transpose()?;
        let mut constructor = None;
        let mut methods = Vec::new();
        for element in &class.body.body {
            use ast::ClassElement as E;
            match element {
                E::MethodDefinition(method) => {
                    let func = self.lower_function(&method.value)?;
                    match method.kind {
                        ast::MethodDefinitionKind::Constructor => constructor = Some(func),
                        kind => {
                            let key = self.lower_prop_name(&method.key, method.computed)?;
                            let method_kind = match kind {
                                ast::MethodDefinitionKind::Get => MethodKind::Getter,
                                ast::MethodDefinitionKind::Set => MethodKind::Setter,
                                _ => MethodKind::Method,
                            };
                            methods.push(MethodDef {
                                key,
                                func,
                                is_static: method.r#static,
                                kind: method_kind,
                            });
                        }
                    }
                }
                E::StaticBlock(_) | E::PropertyDefinition(_) => {
                    return Err("class fields and static blocks are not supported".to_owned());
                }
                _ => return Err("unsupported class element".to_owned()),
            }
        }
        // Synthesize an empty constructor when the class declares none; a
        // derived class's synthesized constructor forwards to its parent at
        // construction time.
        let constructor = match constructor {
            Some(func) => func,
            None => self.push_func(FunctionDef {
                name: class.id.as_ref().map(|id| self.name(&id.name)),
                params: Vec::new(),
                rest: None,
                body: FunctionBody::Block(Vec::new()),
                flags: FnFlags::default(),
                hoisted: Hoisted::default(),
                pos: self.pos(class.span),
            }),
        };
        Ok(self.push_class(ClassDef {
            name: class.id.as_ref().map(|id| self.name(&id.name)),
            parent,
            constructor,
            methods,
            pos: self.pos(class.span),
        }))
    }

    // ---- expressions -------------------------------------------------------

    fn lower_expr(&mut self, expr: &ast::Expression<'_>) -> Lower<ExprId> {
        use ast::Expression as E;
        match expr {
            E::BooleanLiteral(it) => Ok(self.push_expr(ExprKind::Literal(Literal::Bool(it.value)), it.span)),
            E::NullLiteral(it) => Ok(self.push_expr(ExprKind::Literal(Literal::Null), it.span)),
            E::NumericLiteral(it) => Ok(self.push_expr(ExprKind::Literal(Literal::Number(it.value)), it.span)),
            E::StringLiteral(it) => Ok(self.push_expr(
                ExprKind::Literal(Literal::Str(it.value.as_str().into())),
                it.span,
            )),
            E::BigIntLiteral(it) => {
                let digits = it.raw.as_ref().map_or("0", |raw| raw.as_str());
                let digits = digits.trim_end_matches('n');
                let value = parse_bigint_literal(digits)
                    .ok_or_else(|| format!("invalid BigInt literal {digits}"))?;
                Ok(self.push_expr(ExprKind::Literal(Literal::BigInt(value)), it.span))
            }
            E::RegExpLiteral(it) => Ok(self.push_expr(
                ExprKind::Literal(Literal::Regex {
                    pattern: it.regex.pattern.text.to_string().into_boxed_str(),
                    flags: it.regex.flags.to_string().into_boxed_str(),
                }),
                it.span,
            )),
            E::TemplateLiteral(it) => {
                let mut quasis = Vec::with_capacity(it.quasis.len());
                for quasi in &it.quasis {
                    let text = quasi
                        .value
                        .cooked
                        .as_ref()
                        .map_or_else(|| quasi.value.raw.as_str(), |cooked| cooked.as_str());
                    quasis.push(text.into());
                }
                let mut exprs = Vec::with_capacity(it.expressions.len());
                for expression in &it.expressions {
                    exprs.push(self.lower_expr(expression)?);
                }
                Ok(self.push_expr(ExprKind::Template { quasis, exprs }, it.span))
            }
            E::Identifier(it) => Ok(self.push_expr(ExprKind::Ident(self.name(&it.name)), it.span)),
            E::ThisExpression(it) => Ok(self.push_expr(ExprKind::This, it.span)),
            E::Super(it) => Ok(self.push_expr(ExprKind::SuperBase, it.span)),
            E::ArrayExpression(it) => {
                let mut elements = Vec::with_capacity(it.elements.len());
                for element in &it.elements {
                    use ast::ArrayExpressionElement as AE;
                    match element {
                        AE::SpreadElement(spread) => {
                            elements.push(ArrayElement::Spread(self.lower_expr(&spread.argument)?));
                        }
                        AE::Elision(_) => elements.push(ArrayElement::Hole),
                        other => {
                            let expression = other
                                .as_expression()
                                .ok_or_else(|| "unsupported array element".to_owned())?;
                            elements.push(ArrayElement::Item(self.lower_expr(expression)?));
                        }
                    }
                }
                Ok(self.push_expr(ExprKind::Array(elements), it.span))
            }
            E::ObjectExpression(it) => {
                let mut props = Vec::with_capacity(it.properties.len());
                for property in &it.properties {
                    use ast::ObjectPropertyKind as OP;
                    match property {
                        OP::ObjectProperty(p) => {
                            let key = self.lower_prop_name(&p.key, p.computed)?;
                            match p.kind {
                                ast::PropertyKind::Init => {
                                    if p.method {
                                        let func = self.lower_method_value(&p.value)?;
                                        props.push(ObjectProp::Method { key, func });
                                    } else {
                                        let value = self.lower_expr(&p.value)?;
                                        props.push(ObjectProp::KeyValue { key, value });
                                    }
                                }
                                ast::PropertyKind::Get => {
                                    let func = self.lower_method_value(&p.value)?;
                                    props.push(ObjectProp::Getter { key, func });
                                }
                                ast::PropertyKind::Set => {
                                    let func = self.lower_method_value(&p.value)?;
                                    props.push(ObjectProp::Setter { key, func });
                                }
                            }
                        }
                        OP::SpreadProperty(spread) => {
                            props.push(ObjectProp::Spread(self.lower_expr(&spread.argument)?));
                        }
                    }
                }
                Ok(self.push_expr(ExprKind::Object(props), it.span))
            }
            E::FunctionExpression(it) => {
                let func = self.lower_function(it)?;
                Ok(self.push_expr(ExprKind::Function(func), it.span))
            }
            E::ArrowFunctionExpression(it) => {
                let func = self.lower_arrow(it)?;
                Ok(self.push_expr(ExprKind::Arrow(func), it.span))
            }
            E::ClassExpression(it) => {
                let class = self.lower_class(it)?;
                Ok(self.push_expr(ExprKind::Class(class), it.span))
            }
            E::UnaryExpression(it) => {
                let op = match it.operator {
                    UnaryOperator::UnaryNegation => UnaryOp::Minus,
                    UnaryOperator::UnaryPlus => UnaryOp::Plus,
                    UnaryOperator::LogicalNot => UnaryOp::Not,
                    UnaryOperator::BitwiseNot => UnaryOp::BitNot,
                    UnaryOperator::Typeof => UnaryOp::Typeof,
                    UnaryOperator::Void => UnaryOp::Void,
                    UnaryOperator::Delete => UnaryOp::Delete,
                };
                let argument = self.lower_expr(&it.argument)?;
                Ok(self.push_expr(ExprKind::Unary { op, expr: argument }, it.span))
            }
            E::UpdateExpression(it) => {
                let op = match it.operator {
                    UpdateOperator::Increment => UpdateOp::Increment,
                    UpdateOperator::Decrement => UpdateOp::Decrement,
                };
                let target = self.lower_simple_target(&it.argument)?;
                Ok(self.push_expr(
                    ExprKind::Update {
                        op,
                        prefix: it.prefix,
                        target,
                    },
                    it.span,
                ))
            }
            E::BinaryExpression(it) => {
                let op = lower_binary_op(it.operator)?;
                let left = self.lower_expr(&it.left)?;
                let right = self.lower_expr(&it.right)?;
                Ok(self.push_expr(ExprKind::Binary { op, left, right }, it.span))
            }
            E::LogicalExpression(it) => {
                let op = match it.operator {
                    LogicalOperator::And => LogicalOp::And,
                    LogicalOperator::Or => LogicalOp::Or,
                    LogicalOperator::Coalesce => LogicalOp::Nullish,
                };
                let left = self.lower_expr(&it.left)?;
                let right = self.lower_expr(&it.right)?;
                Ok(self.push_expr(ExprKind::Logical { op, left, right }, it.span))
            }
            E::AssignmentExpression(it) => {
                let op = lower_assign_op(it.operator)?;
                let target = self.lower_assign_target_expr(&it.left, op)?;
                let value = self.lower_expr(&it.right)?;
                Ok(self.push_expr(ExprKind::Assign { op, target, value }, it.span))
            }
            E::ConditionalExpression(it) => {
                let test = self.lower_expr(&it.test)?;
                let consequent = self.lower_expr(&it.consequent)?;
                let alternate = self.lower_expr(&it.alternate)?;
                Ok(self.push_expr(
                    ExprKind::Conditional {
                        test,
                        consequent,
                        alternate,
                    },
                    it.span,
                ))
            }
            E::CallExpression(it) => self.lower_call(it),
            E::NewExpression(it) => {
                let callee = self.lower_expr(&it.callee)?;
                let args = self.lower_arguments(&it.arguments)?;
                Ok(self.push_expr(ExprKind::New { callee, args }, it.span))
            }
            E::StaticMemberExpression(it) => {
                let object = self.lower_expr(&it.object)?;
                let cache = self.next_cache();
                Ok(self.push_expr(
                    ExprKind::Member {
                        object,
                        prop: MemberProp::Ident(self.name(&it.property.name)),
                        optional: it.optional,
                        cache,
                    },
                    it.span,
                ))
            }
            E::ComputedMemberExpression(it) => {
                let object = self.lower_expr(&it.object)?;
                let key = self.lower_expr(&it.expression)?;
                let cache = self.next_cache();
                Ok(self.push_expr(
                    ExprKind::Member {
                        object,
                        prop: MemberProp::Computed(key),
                        optional: it.optional,
                        cache,
                    },
                    it.span,
                ))
            }
            E::PrivateFieldExpression(_) => Err("private fields are not supported".to_owned()),
            E::SequenceExpression(it) => {
                let mut exprs = Vec::with_capacity(it.expressions.len());
                for expression in &it.expressions {
                    exprs.push(self.lower_expr(expression)?);
                }
                Ok(self.push_expr(ExprKind::Sequence(exprs), it.span))
            }
            E::AwaitExpression(it) => {
                let argument = self.lower_expr(&it.argument)?;
                Ok(self.push_expr(ExprKind::Await(argument), it.span))
            }
            E::YieldExpression(it) => {
                let argument = it.argument.as_ref().map(|a| self.lower_expr(a)).transpose()?;
                Ok(self.push_expr(
                    ExprKind::Yield {
                        arg: argument,
                        delegate: it.delegate,
                    },
                    it.span,
                ))
            }
            E::ParenthesizedExpression(it) => self.lower_expr(&it.expression),
            E::ChainExpression(it) => {
                use ast::ChainElement as C;
                let inner = match &it.expression {
                    C::CallExpression(call) => self.lower_call(call)?,
                    C::StaticMemberExpression(member) => {
                        let object = self.lower_expr(&member.object)?;
                        let cache = self.next_cache();
                        self.push_expr(
                            ExprKind::Member {
                                object,
                                prop: MemberProp::Ident(self.name(&member.property.name)),
                                optional: member.optional,
                                cache,
                            },
                            member.span,
                        )
                    }
                    C::ComputedMemberExpression(member) => {
                        let object = self.lower_expr(&member.object)?;
                        let key = self.lower_expr(&member.expression)?;
                        let cache = self.next_cache();
                        self.push_expr(
                            ExprKind::Member {
                                object,
                                prop: MemberProp::Computed(key),
                                optional: member.optional,
                                cache,
                            },
                            member.span,
                        )
                    }
                    _ => return Err("unsupported optional chain".to_owned()),
                };
                Ok(self.push_expr(ExprKind::Chain(inner), it.span))
            }
            E::TaggedTemplateExpression(_) => Err("tagged templates are not supported".to_owned()),
            other => Err(format!(
                "unsupported expression: {:?}",
                std::mem::discriminant(other)
            )),
        }
    }

    fn lower_call(&mut self, it: &ast::CallExpression<'_>) -> Lower<ExprId> {
        let callee = self.lower_expr(&it.callee)?;
        let args = self.lower_arguments(&it.arguments)?;
        Ok(self.push_expr(
            ExprKind::Call {
                callee,
                args,
                optional: it.optional,
            },
            it.span,
        ))
    }

    fn lower_arguments(&mut self, arguments: &[ast::Argument<'_>]) -> Lower<Vec<Argument>> {
        let mut out = Vec::with_capacity(arguments.len());
        for argument in arguments {
            match argument {
                ast::Argument::SpreadElement(spread) => {
                    out.push(Argument::Spread(self.lower_expr(&spread.argument)?));
                }
                other => {
                    let expression = other
                        .as_expression()
                        .ok_or_else(|| "unsupported call argument".to_owned())?;
                    out.push(Argument::Expr(self.lower_expr(expression)?));
                }
            }
        }
        Ok(out)
    }

    fn lower_method_value(&mut self, value: &ast::Expression<'_>) -> Lower<FuncId> {
        match value {
            ast::Expression::FunctionExpression(func) => self.lower_function(func),
            ast::Expression::ArrowFunctionExpression(arrow) => self.lower_arrow(arrow),
            _ => Err("method value must be a function".to_owned()),
        }
    }

    fn lower_prop_name(&mut self, key: &ast::PropertyKey<'_>, computed: bool) -> Lower<PropName> {
        if !computed
            && let Some(name) = self.static_property_name(key)
        {
            return Ok(PropName::Ident(name));
        }
        let expression = key
            .as_expression()
            .ok_or_else(|| "unsupported property key".to_owned())?;
        Ok(PropName::Computed(self.lower_expr(expression)?))
    }

    fn static_property_name(&self, key: &ast::PropertyKey<'_>) -> Option<Istr> {
        use ast::PropertyKey as K;
        match key {
            K::StaticIdentifier(id) => Some(self.name(&id.name)),
            K::StringLiteral(lit) => Some(self.name(lit.value.as_str())),
            K::NumericLiteral(lit) => Some(self.name(&number_to_string(lit.value))),
            _ => None,
        }
    }

    /// Update-expression targets: identifier or member.
    fn lower_simple_target(&mut self, target: &ast::SimpleAssignmentTarget<'_>) -> Lower<ExprId> {
        use ast::SimpleAssignmentTarget as T;
        match target {
            T::AssignmentTargetIdentifier(id) => {
                Ok(self.push_expr(ExprKind::Ident(self.name(&id.name)), id.span))
            }
            _ => {
                let member = target
                    .as_member_expression()
                    .ok_or_else(|| "unsupported update target".to_owned())?;
                self.lower_member_target(member)
            }
        }
    }

    fn lower_assign_target_expr(
        &mut self,
        target: &ast::AssignmentTarget<'_>,
        op: AssignOp,
    ) -> Lower<AssignTarget> {
        use ast::AssignmentTarget as T;
        match target {
            T::AssignmentTargetIdentifier(id) => Ok(AssignTarget::Ident(self.name(&id.name))),
            T::StaticMemberExpression(_) | T::ComputedMemberExpression(_) => {
                let member = target
                    .as_simple_assignment_target()
                    .and_then(|t| t.as_member_expression())
                    .ok_or_else(|| "unsupported assignment target".to_owned())?;
                Ok(AssignTarget::Member(self.lower_member_target(member)?))
            }
            T::ArrayAssignmentTarget(_) | T::ObjectAssignmentTarget(_) => {
                if op != AssignOp::Assign {
                    return Err("destructuring targets require plain assignment".to_owned());
                }
                Ok(AssignTarget::Pattern(self.lower_assignment_target(target)?))
            }
            _ => Err("unsupported assignment target".to_owned()),
        }
    }
}

fn lower_binary_op(op: BinaryOperator) -> Lower<BinaryOp> {
    Ok(match op {
        BinaryOperator::Addition => BinaryOp::Add,
        BinaryOperator::Subtraction => BinaryOp::Sub,
        BinaryOperator::Multiplication => BinaryOp::Mul,
        BinaryOperator::Division => BinaryOp::Div,
        BinaryOperator::Remainder => BinaryOp::Mod,
        BinaryOperator::Exponential => BinaryOp::Exp,
        BinaryOperator::Equality => BinaryOp::Eq,
        BinaryOperator::Inequality => BinaryOp::Ne,
        BinaryOperator::StrictEquality => BinaryOp::StrictEq,
        BinaryOperator::StrictInequality => BinaryOp::StrictNe,
        BinaryOperator::LessThan => BinaryOp::Lt,
        BinaryOperator::LessEqualThan => BinaryOp::Le,
        BinaryOperator::GreaterThan => BinaryOp::Gt,
        BinaryOperator::GreaterEqualThan => BinaryOp::Ge,
        BinaryOperator::BitwiseAnd => BinaryOp::BitAnd,
        BinaryOperator::BitwiseOR => BinaryOp::BitOr,
        BinaryOperator::BitwiseXOR => BinaryOp::BitXor,
        BinaryOperator::ShiftLeft => BinaryOp::Shl,
        BinaryOperator::ShiftRight => BinaryOp::Shr,
        BinaryOperator::ShiftRightZeroFill => BinaryOp::UShr,
        BinaryOperator::In => BinaryOp::In,
        BinaryOperator::Instanceof => BinaryOp::Instanceof,
    })
}

fn lower_assign_op(op: AssignmentOperator) -> Lower<AssignOp> {
    Ok(match op {
        AssignmentOperator::Assign => AssignOp::Assign,
        AssignmentOperator::Addition => AssignOp::Add,
        AssignmentOperator::Subtraction => AssignOp::Sub,
        AssignmentOperator::Multiplication => AssignOp::Mul,
        AssignmentOperator::Division => AssignOp::Div,
        AssignmentOperator::Remainder => AssignOp::Mod,
        AssignmentOperator::Exponential => AssignOp::Exp,
        AssignmentOperator::ShiftLeft => AssignOp::Shl,
        AssignmentOperator::ShiftRight => AssignOp::Shr,
        AssignmentOperator::ShiftRightZeroFill => AssignOp::UShr,
        AssignmentOperator::BitwiseAnd => AssignOp::BitAnd,
        AssignmentOperator::BitwiseOR => AssignOp::BitOr,
        AssignmentOperator::BitwiseXOR => AssignOp::BitXor,
        AssignmentOperator::LogicalAnd => AssignOp::AndAssign,
        AssignmentOperator::LogicalOr => AssignOp::OrAssign,
        AssignmentOperator::LogicalNullish => AssignOp::NullishAssign,
    })
}

/// BigInt literal digits (`0x`/`0o`/`0b` prefixes included, no `n`).
fn parse_bigint_literal(digits: &str) -> Option<num_bigint::BigInt> {
    let digits = digits.replace('_', "");
    if let Some(rest) = digits.strip_prefix("0x").or_else(|| digits.strip_prefix("0X")) {
        num_bigint::BigInt::parse_bytes(rest.as_bytes(), 16)
    } else if let Some(rest) = digits.strip_prefix("0o").or_else(|| digits.strip_prefix("0O")) {
        num_bigint::BigInt::parse_bytes(rest.as_bytes(), 8)
    } else if let Some(rest) = digits.strip_prefix("0b").or_else(|| digits.strip_prefix("0B")) {
        num_bigint::BigInt::parse_bytes(rest.as_bytes(), 2)
    } else {
        num_bigint::BigInt::parse_bytes(digits.as_bytes(), 10)
    }
}
