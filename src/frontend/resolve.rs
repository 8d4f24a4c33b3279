//! Name resolution and static checks
//!
//! [`ProgramInfo::collect`] builds the symbol table (types, methods, imports)
//! and reports declaration-level problems. [`check_bodies`] then walks every
//! function body with lexical scopes and reports use-level problems. Code
//! generation only runs when neither produced an error, and resolves calls
//! through the same [`ProgramInfo`].

use indexmap::IndexMap;
use tracing::debug;

use crate::frontend::parser::ast::*;
use crate::middle::bytecode::MODULE_TYPE;
use crate::std::{Arity, ModuleInfo, NativeExport, ReferenceSet};
use crate::util::diagnostic::{Diagnostic, Diagnostics};
use crate::util::span::Span;

/// Type names every program can use in annotations
pub const BUILTIN_TYPES: &[&str] = &[
    "Int", "Float", "Bool", "String", "Unit", "List", "Range", "Any",
];

/// A method as seen by callers
#[derive(Debug, Clone)]
pub struct MethodInfo {
    pub index: usize,
    pub is_pub: bool,
    pub is_static: bool,
    pub arity: usize,
}

/// A type (or the implicit module type) as seen by callers
#[derive(Debug, Clone)]
pub struct TypeInfo {
    pub index: usize,
    /// Position in `Unit::types`; `None` for the module type
    pub decl_index: Option<usize>,
    pub name: String,
    pub fields: Vec<String>,
    pub methods: IndexMap<String, MethodInfo>,
}

/// Resolution target of a call
#[derive(Debug, Clone)]
pub enum Callee<'r> {
    /// A static method, by image indices
    Static {
        type_idx: usize,
        method_idx: usize,
        arity: usize,
    },
    /// A native function from the reference set
    Native(&'r NativeExport),
}

/// What a `receiver.method(...)` receiver names, when it is not a value
#[derive(Debug, Clone)]
pub enum StaticReceiver<'a, 'r> {
    Type(&'a TypeInfo),
    Module(&'r ModuleInfo),
}

/// Symbol table of one compilation unit
#[derive(Debug)]
pub struct ProgramInfo<'r> {
    pub refs: &'r ReferenceSet,
    /// Index 0 is the module type, then declared types in source order
    pub types: Vec<TypeInfo>,
    type_index: IndexMap<String, usize>,
    /// Imported modules by short name
    imports: IndexMap<&'r str, &'r ModuleInfo>,
}

impl<'r> ProgramInfo<'r> {
    /// Build the symbol table, reporting declaration problems
    pub fn collect(
        unit: &Unit,
        refs: &'r ReferenceSet,
        diagnostics: &mut Diagnostics,
    ) -> Self {
        let mut info = ProgramInfo {
            refs,
            types: Vec::new(),
            type_index: IndexMap::new(),
            imports: IndexMap::new(),
        };

        for use_decl in &unit.uses {
            let path = use_decl.qualified_name();
            match refs.module(&path) {
                Some(module) => {
                    info.imports.insert(module.short_name, module);
                }
                None => diagnostics.push(Diagnostic::error(
                    "E0210",
                    format!("unknown module `{}`", path),
                    use_decl.span,
                )),
            }
        }

        let module_methods = collect_methods(&unit.functions, true, diagnostics);
        info.types.push(TypeInfo {
            index: 0,
            decl_index: None,
            name: MODULE_TYPE.to_string(),
            fields: Vec::new(),
            methods: module_methods,
        });

        for (decl_index, decl) in unit.types.iter().enumerate() {
            let name = &decl.name.name;
            if BUILTIN_TYPES.contains(&name.as_str()) || info.type_index.contains_key(name) {
                diagnostics.push(duplicate(&decl.name));
                continue;
            }

            let mut fields: Vec<String> = Vec::new();
            for field in &decl.fields {
                if fields.contains(&field.name.name) {
                    diagnostics.push(duplicate(&field.name));
                } else {
                    fields.push(field.name.name.clone());
                }
            }

            let index = info.types.len();
            info.type_index.insert(name.clone(), index);
            info.types.push(TypeInfo {
                index,
                decl_index: Some(decl_index),
                name: name.clone(),
                fields,
                methods: collect_methods(&decl.methods, false, diagnostics),
            });
        }

        // Annotations can only be checked once every type name is known
        for decl in &unit.types {
            for field in &decl.fields {
                info.check_type_expr(&field.ty, diagnostics);
            }
        }
        for func in unit
            .functions
            .iter()
            .chain(unit.types.iter().flat_map(|t| t.methods.iter()))
        {
            for param in &func.params {
                info.check_type_expr(&param.ty, diagnostics);
            }
            if let Some(ret) = &func.ret {
                info.check_type_expr(ret, diagnostics);
            }
        }

        debug!(
            "Collected {} types, {} imports",
            info.types.len(),
            info.imports.len()
        );
        info
    }

    /// Report unknown names in an annotation
    pub fn check_type_expr(
        &self,
        ty: &TypeExpr,
        diagnostics: &mut Diagnostics,
    ) {
        let name = ty.name.name.as_str();
        if !BUILTIN_TYPES.contains(&name) && !self.type_index.contains_key(name) {
            diagnostics.push(Diagnostic::error(
                "E0206",
                format!("unknown type `{}`", name),
                ty.name.span,
            ));
        }
        if let Some(arg) = &ty.arg {
            self.check_type_expr(arg, diagnostics);
        }
    }

    /// Declared type by name
    pub fn type_named(
        &self,
        name: &str,
    ) -> Option<&TypeInfo> {
        self.type_index.get(name).map(|&i| &self.types[i])
    }

    /// Imported module by short name
    pub fn imported_module(
        &self,
        short: &str,
    ) -> Option<&'r ModuleInfo> {
        self.imports.get(short).copied()
    }

    /// Resolve `name(args)` from inside `current_type`
    ///
    /// Order: static method of the enclosing type, then top-level function,
    /// then prelude native.
    pub fn resolve_call(
        &self,
        current_type: usize,
        name: &str,
    ) -> Option<Callee<'r>> {
        let own = self.types[current_type]
            .methods
            .get(name)
            .filter(|m| m.is_static)
            .map(|m| (current_type, m));
        let top = || self.types[0].methods.get(name).map(|m| (0, m));

        if let Some((type_idx, m)) = own.or_else(top) {
            return Some(Callee::Static {
                type_idx,
                method_idx: m.index,
                arity: m.arity,
            });
        }
        self.refs.prelude(name).map(Callee::Native)
    }

    /// What a bare identifier names when used as a call receiver
    pub fn static_receiver(
        &self,
        name: &str,
    ) -> Option<StaticReceiver<'_, 'r>> {
        if let Some(ty) = self.type_named(name) {
            return Some(StaticReceiver::Type(ty));
        }
        self.imported_module(name).map(StaticReceiver::Module)
    }
}

fn duplicate(ident: &Ident) -> Diagnostic {
    Diagnostic::error(
        "E0205",
        format!("duplicate definition of `{}`", ident.name),
        ident.span,
    )
}

fn collect_methods(
    functions: &[FnDecl],
    top_level: bool,
    diagnostics: &mut Diagnostics,
) -> IndexMap<String, MethodInfo> {
    let mut methods = IndexMap::new();
    for func in functions {
        if methods.contains_key(&func.name.name) {
            diagnostics.push(duplicate(&func.name));
            continue;
        }
        if top_level && func.has_self {
            diagnostics.push(Diagnostic::error(
                "E0207",
                format!("top-level function `{}` cannot take `self`", func.name.name),
                func.name.span,
            ));
        }
        let mut seen: Vec<&str> = Vec::new();
        for param in &func.params {
            if seen.contains(&param.name.name.as_str()) {
                diagnostics.push(duplicate(&param.name));
            }
            seen.push(&param.name.name);
        }
        let index = methods.len();
        methods.insert(
            func.name.name.clone(),
            MethodInfo {
                index,
                is_pub: func.is_pub,
                is_static: top_level || func.is_static(),
                arity: func.params.len(),
            },
        );
    }
    methods
}

// ============================================================================
// Body checks
// ============================================================================

struct Local {
    mutable: bool,
    used: bool,
    /// Only `let` bindings are reported when unused
    warn_unused: bool,
    span: Span,
}

struct BodyChecker<'a, 'r> {
    info: &'a ProgramInfo<'r>,
    current_type: usize,
    has_self: bool,
    scopes: Vec<IndexMap<String, Local>>,
    loop_depth: usize,
    diagnostics: &'a mut Diagnostics,
}

/// Check every function and method body of `unit`
pub fn check_bodies(
    unit: &Unit,
    info: &ProgramInfo<'_>,
    diagnostics: &mut Diagnostics,
) {
    for func in &unit.functions {
        check_fn(info, 0, func, false, diagnostics);
    }
    // Duplicate types were never registered; their bodies are skipped
    for ty in &info.types {
        let Some(decl) = ty.decl_index.map(|i| &unit.types[i]) else {
            continue;
        };
        for method in &decl.methods {
            check_fn(info, ty.index, method, method.has_self, diagnostics);
        }
    }
}

fn check_fn(
    info: &ProgramInfo<'_>,
    current_type: usize,
    func: &FnDecl,
    has_self: bool,
    diagnostics: &mut Diagnostics,
) {
    let mut checker = BodyChecker {
        info,
        current_type,
        has_self,
        scopes: vec![IndexMap::new()],
        loop_depth: 0,
        diagnostics,
    };
    for param in &func.params {
        checker.declare(&param.name, false, false);
    }
    checker.block(&func.body);
    checker.pop_scope();
}

impl BodyChecker<'_, '_> {
    fn error(
        &mut self,
        code: &'static str,
        message: String,
        span: Span,
    ) {
        self.diagnostics.push(Diagnostic::error(code, message, span));
    }

    fn declare(
        &mut self,
        name: &Ident,
        mutable: bool,
        warn_unused: bool,
    ) {
        let local = Local {
            mutable,
            used: false,
            warn_unused: warn_unused && !name.name.starts_with('_'),
            span: name.span,
        };
        let shadowed = self
            .scopes
            .last_mut()
            .and_then(|scope| scope.insert(name.name.clone(), local));
        if let Some(old) = shadowed {
            self.report_unused(&name.name, &old);
        }
    }

    fn report_unused(
        &mut self,
        name: &str,
        local: &Local,
    ) {
        if local.warn_unused && !local.used {
            self.diagnostics.push(Diagnostic::warning(
                "W0001",
                format!("unused variable `{}`", name),
                local.span,
            ));
        }
    }

    fn pop_scope(&mut self) {
        if let Some(scope) = self.scopes.pop() {
            for (name, local) in &scope {
                self.report_unused(name, local);
            }
        }
    }

    fn lookup(
        &mut self,
        name: &str,
    ) -> Option<&mut Local> {
        self.scopes.iter_mut().rev().find_map(|s| s.get_mut(name))
    }

    fn block(
        &mut self,
        block: &Block,
    ) {
        for stmt in &block.stmts {
            self.stmt(stmt);
        }
    }

    fn scoped_block(
        &mut self,
        block: &Block,
    ) {
        self.scopes.push(IndexMap::new());
        self.block(block);
        self.pop_scope();
    }

    fn stmt(
        &mut self,
        stmt: &Stmt,
    ) {
        match stmt {
            Stmt::Let {
                name,
                mutable,
                ty,
                value,
            } => {
                if let Some(ty) = ty {
                    self.info.check_type_expr(ty, self.diagnostics);
                }
                self.expr(value);
                self.declare(name, *mutable, true);
            }
            Stmt::Assign {
                target,
                value,
                span,
            } => {
                self.expr(value);
                self.assign_target(target, *span);
            }
            Stmt::If {
                branches,
                else_block,
            } => {
                for (cond, body) in branches {
                    self.expr(cond);
                    self.scoped_block(body);
                }
                if let Some(body) = else_block {
                    self.scoped_block(body);
                }
            }
            Stmt::While { cond, body } => {
                self.expr(cond);
                self.loop_body(None, body);
            }
            Stmt::For { var, iter, body } => {
                self.expr(iter);
                self.loop_body(Some(var), body);
            }
            Stmt::Return { value, .. } => {
                if let Some(value) = value {
                    self.expr(value);
                }
            }
            Stmt::Break(span) | Stmt::Continue(span) => {
                if self.loop_depth == 0 {
                    let word = if matches!(stmt, Stmt::Break(_)) {
                        "break"
                    } else {
                        "continue"
                    };
                    self.error("E0208", format!("`{}` outside of a loop", word), *span);
                }
            }
            Stmt::Throw { value, .. } => self.expr(value),
            Stmt::Expr(expr) => self.expr(expr),
        }
    }

    fn loop_body(
        &mut self,
        var: Option<&Ident>,
        body: &Block,
    ) {
        self.loop_depth += 1;
        self.scopes.push(IndexMap::new());
        if let Some(var) = var {
            self.declare(var, false, false);
        }
        self.block(body);
        self.pop_scope();
        self.loop_depth -= 1;
    }

    fn assign_target(
        &mut self,
        target: &Expr,
        span: Span,
    ) {
        match &target.kind {
            ExprKind::Var(name) => match self.lookup(name).map(|l| l.mutable) {
                Some(true) => {}
                Some(false) => self.error(
                    "E0204",
                    format!("cannot assign to immutable variable `{}`", name),
                    target.span,
                ),
                None => self.error(
                    "E0201",
                    format!("undefined variable `{}`", name),
                    target.span,
                ),
            },
            ExprKind::Field { object, .. } => self.expr(object),
            ExprKind::Index { object, index } => {
                self.expr(object);
                self.expr(index);
            }
            _ => self.error("E0213", "invalid assignment target".to_string(), span),
        }
    }

    fn check_arity(
        &mut self,
        callee: &str,
        expected: Arity,
        found: usize,
        span: Span,
    ) {
        if !expected.accepts(found) {
            self.error(
                "E0203",
                format!(
                    "`{}` expects {} argument(s), found {}",
                    callee, expected, found
                ),
                span,
            );
        }
    }

    fn exprs(
        &mut self,
        exprs: &[Expr],
    ) {
        for e in exprs {
            self.expr(e);
        }
    }

    fn expr(
        &mut self,
        expr: &Expr,
    ) {
        match &expr.kind {
            ExprKind::Int(_) | ExprKind::Float(_) | ExprKind::Bool(_) | ExprKind::Str(_) => {}
            ExprKind::Var(name) => match self.lookup(name) {
                Some(local) => local.used = true,
                None => self.error(
                    "E0201",
                    format!("undefined variable `{}`", name),
                    expr.span,
                ),
            },
            ExprKind::SelfRef => {
                if !self.has_self {
                    self.error(
                        "E0207",
                        "`self` is only available in instance methods".to_string(),
                        expr.span,
                    );
                }
            }
            ExprKind::List(items) => self.exprs(items),
            ExprKind::Unary { operand, .. } => self.expr(operand),
            ExprKind::Binary { lhs, rhs, .. } => {
                self.expr(lhs);
                self.expr(rhs);
            }
            ExprKind::Call { callee, args } => {
                self.exprs(args);
                match self.info.resolve_call(self.current_type, &callee.name) {
                    Some(Callee::Static { arity, .. }) => {
                        self.check_arity(&callee.name, Arity::Exact(arity), args.len(), expr.span)
                    }
                    Some(Callee::Native(native)) => {
                        self.check_arity(&callee.name, native.arity, args.len(), expr.span)
                    }
                    None => self.error(
                        "E0202",
                        format!("undefined function `{}`", callee.name),
                        callee.span,
                    ),
                }
            }
            ExprKind::MethodCall {
                receiver,
                method,
                args,
            } => {
                self.exprs(args);
                self.method_call(receiver, method, args.len(), expr.span);
            }
            ExprKind::Field { object, .. } => self.expr(object),
            ExprKind::Index { object, index } => {
                self.expr(object);
                self.expr(index);
            }
            ExprKind::StructLit { ty, fields } => {
                for (_, value) in fields {
                    self.expr(value);
                }
                self.struct_literal(ty, fields, expr.span);
            }
        }
    }

    fn method_call(
        &mut self,
        receiver: &Expr,
        method: &Ident,
        argc: usize,
        span: Span,
    ) {
        let ExprKind::Var(name) = &receiver.kind else {
            self.expr(receiver);
            return;
        };
        if self.lookup(name).is_some() {
            self.expr(receiver);
            return;
        }

        let program = self.info;
        match program.static_receiver(name) {
            Some(StaticReceiver::Type(ty)) => match ty.methods.get(&method.name) {
                Some(m) if m.is_static => {
                    if !m.is_pub && ty.index != self.current_type {
                        self.error(
                            "E0209",
                            format!("static method `{}.{}` is private", ty.name, method.name),
                            method.span,
                        );
                    }
                    let callee = format!("{}.{}", ty.name, method.name);
                    self.check_arity(&callee, Arity::Exact(m.arity), argc, span);
                }
                _ => self.error(
                    "E0202",
                    format!("type `{}` has no static method `{}`", ty.name, method.name),
                    method.span,
                ),
            },
            Some(StaticReceiver::Module(module)) => match module.exports.get(method.name.as_str()) {
                Some(native) => {
                    self.check_arity(native.qualified_name, native.arity, argc, span)
                }
                None => self.error(
                    "E0202",
                    format!("module `{}` has no function `{}`", module.path, method.name),
                    method.span,
                ),
            },
            None => match program.refs.module_by_short_name(name) {
                Some(module) => self.error(
                    "E0211",
                    format!(
                        "module `{}` is not imported (add `use {};`)",
                        module.path, module.path
                    ),
                    receiver.span,
                ),
                None => self.error(
                    "E0201",
                    format!("undefined variable `{}`", name),
                    receiver.span,
                ),
            },
        }
    }

    fn struct_literal(
        &mut self,
        ty: &Ident,
        fields: &[(Ident, Expr)],
        span: Span,
    ) {
        let program = self.info;
        let Some(info) = program.type_named(&ty.name) else {
            self.error("E0202", format!("undefined type `{}`", ty.name), ty.span);
            return;
        };

        let mut seen: Vec<&str> = Vec::new();
        let mut problems = Vec::new();
        for (name, _) in fields {
            if !info.fields.contains(&name.name) {
                problems.push((
                    format!("unknown field `{}` in `{}` literal", name.name, info.name),
                    name.span,
                ));
            } else if seen.contains(&name.name.as_str()) {
                problems.push((
                    format!("field `{}` specified more than once", name.name),
                    name.span,
                ));
            } else {
                seen.push(&name.name);
            }
        }
        for field in &info.fields {
            if !seen.contains(&field.as_str()) {
                problems.push((
                    format!("missing field `{}` in `{}` literal", field, info.name),
                    span,
                ));
            }
        }
        for (message, span) in problems {
            self.error("E0212", message, span);
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::frontend::lexer::tokenize;
    use crate::frontend::parser::parse;

    fn check(source: &str) -> Diagnostics {
        let (tokens, mut diagnostics) = tokenize(source);
        let (unit, parse_diags) = parse(&tokens);
        diagnostics.extend(parse_diags);
        assert!(!diagnostics.has_errors(), "syntax errors: {}", diagnostics);
        let info = ProgramInfo::collect(&unit, ReferenceSet::standard(), &mut diagnostics);
        check_bodies(&unit, &info, &mut diagnostics);
        diagnostics.sort();
        diagnostics
    }

    fn codes(source: &str) -> Vec<&'static str> {
        check(source).iter().map(|d| d.code).collect()
    }

    #[test]
    fn test_clean_program() {
        let diags = check(
            r#"
            use std.math;
            pub type Point {
                x: Int
                y: Int
                pub fn origin() -> Point { return Point { x: 0, y: 0 }; }
                fn norm(self) -> Float { return math.sqrt(self.x * self.x + self.y * self.y); }
            }
            fn helper(n: Int) -> Int { return n + 1; }
            pub fn Main() {
                let mut p = Point.origin();
                p.x = helper(2);
                for i in 0..3 { println(i, p.norm()); }
                let items: List[Int] = [1, 2];
                items.push(len(items));
            }
            "#,
        );
        assert!(diags.is_empty(), "{}", diags);
    }

    #[test]
    fn test_undefined_names() {
        assert_eq!(codes("fn Main() { println(x); }"), ["E0201"]);
        assert_eq!(codes("fn Main() { nope(); }"), ["E0202"]);
        assert_eq!(codes("fn Main() { Missing.make(); }"), ["E0201"]);
        assert_eq!(codes("type T {} fn Main() { T.make(); }"), ["E0202"]);
    }

    #[test]
    fn test_arity() {
        assert_eq!(codes("fn f(a: Int) {} fn Main() { f(); }"), ["E0203"]);
        assert_eq!(codes("use std.math; fn Main() { math.sqrt(1, 2); }"), ["E0203"]);
        assert!(codes("fn Main() { println(1, 2, 3); }").is_empty());
    }

    #[test]
    fn test_mutability_and_targets() {
        assert_eq!(codes("fn Main() { let x = 1; x = 2; }"), ["E0204"]);
        assert!(codes("fn Main() { let mut x = 1; x = x + 1; }").is_empty());
        assert_eq!(codes("fn Main() { 1 = 2; }"), ["E0213"]);
    }

    #[test]
    fn test_duplicates() {
        assert_eq!(codes("type A {} type A {}"), ["E0205"]);
        assert_eq!(codes("type Int {}"), ["E0205"]);
        assert_eq!(codes("type A { x: Int, x: Int }"), ["E0205"]);
        assert_eq!(codes("fn f() {} fn f() {}"), ["E0205"]);
        assert_eq!(codes("fn f(a: Int, a: Int) {}"), ["E0205"]);
    }

    #[test]
    fn test_annotations() {
        assert_eq!(codes("fn f(a: Widget) {}"), ["E0206"]);
        assert_eq!(codes("fn f() -> List[Nope] { return []; }"), ["E0206"]);
        assert_eq!(codes("fn Main() { let _x: Strin = \"\"; }"), ["E0206"]);
        assert!(codes("type W {} fn f(a: List[W]) {}").is_empty());
    }

    #[test]
    fn test_self_and_loops() {
        assert_eq!(codes("type T { fn f() { println(self); } }"), ["E0207"]);
        assert_eq!(codes("fn f(self) {}"), ["E0207"]);
        assert_eq!(codes("fn Main() { break; }"), ["E0208"]);
        assert_eq!(codes("fn Main() { if true { continue; } }"), ["E0208"]);
        assert!(codes("fn Main() { while true { if true { break; } } }").is_empty());
    }

    #[test]
    fn test_private_static_method() {
        let source = "type A { fn secret() {} pub fn open() { A.secret(); } } fn Main() { A.secret(); }";
        let diags = check(source);
        assert_eq!(diags.len(), 1, "{}", diags);
        assert_eq!(diags.iter().next().unwrap().code, "E0209");
    }

    #[test]
    fn test_modules() {
        assert_eq!(codes("use std.net;"), ["E0210"]);
        assert_eq!(codes("fn Main() { println(math.sqrt(4)); }"), ["E0211"]);
        assert_eq!(codes("use std.math; fn Main() { math.nope(); }"), ["E0202"]);
        assert!(codes("use std.string; fn Main() { println(string.upper(\"a\")); }").is_empty());
    }

    #[test]
    fn test_struct_literals() {
        let base = "type P { x: Int, y: Int }";
        assert_eq!(
            codes(&format!("{} fn Main() {{ println(P {{ x: 1 }}); }}", base)),
            ["E0212"]
        );
        assert_eq!(
            codes(&format!("{} fn Main() {{ println(P {{ x: 1, y: 2, z: 3 }}); }}", base)),
            ["E0212"]
        );
        assert_eq!(
            codes(&format!("{} fn Main() {{ println(P {{ x: 1, x: 2, y: 3 }}); }}", base)),
            ["E0212"]
        );
        assert_eq!(codes("fn Main() { println(Q { a: 1 }); }"), ["E0202"]);
    }

    #[test]
    fn test_unused_variables() {
        let diags = check("fn Main() { let x = 1; let _y = 2; for i in 0..2 {} }");
        assert_eq!(diags.len(), 1);
        let d = diags.iter().next().unwrap();
        assert_eq!(d.code, "W0001");
        assert!(!d.severity.is_error());
        assert_eq!(d.message, "unused variable `x`");
    }

    #[test]
    fn test_shadowed_binding_is_checked_separately() {
        let diags = check("fn Main() { let x = 1; let x = 2; println(x); }");
        assert_eq!(diags.len(), 1);
        assert_eq!(diags.iter().next().unwrap().span.start.column, 17);
    }

    #[test]
    fn test_locals_shadow_types() {
        assert!(codes("type T { pub fn f() {} } fn Main() { let T = [1]; T.push(2); }").is_empty());
    }
}
