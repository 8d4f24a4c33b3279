//! Code generation: AST → bytecode [`Module`]
//!
//! Runs only on units that passed resolution, so every name it looks up is
//! known to exist. The remaining failure mode is exceeding an image limit
//! (65535 locals, 255 arguments, ...), reported as an `E0301` diagnostic.

use std::collections::HashMap;

use indexmap::IndexMap;
use tracing::debug;

use crate::frontend::parser::ast::*;
use crate::frontend::resolve::{Callee, ProgramInfo, StaticReceiver};
use crate::middle::bytecode::{Constant, Instr, MethodDef, Module, TypeDef};
use crate::util::diagnostic::Diagnostic;
use crate::util::span::Span;

type CgResult<T> = Result<T, Diagnostic>;

fn limit<T: TryFrom<usize>>(
    n: usize,
    what: &str,
    span: Span,
) -> CgResult<T> {
    T::try_from(n).map_err(|_| {
        Diagnostic::error("E0301", format!("too many {} ({})", what, n), span)
    })
}

/// Generate the module for a resolved unit
pub fn generate(
    unit: &Unit,
    info: &ProgramInfo<'_>,
) -> CgResult<Module> {
    let mut builder = ModuleBuilder::default();
    let mut types = Vec::with_capacity(info.types.len());

    for ty in &info.types {
        let (functions, fields) = match ty.decl_index {
            None => (&unit.functions, Vec::new()),
            Some(i) => (&unit.types[i].methods, ty.fields.clone()),
        };

        let mut methods = Vec::with_capacity(functions.len());
        for func in functions {
            let is_static = ty.decl_index.is_none() || func.is_static();
            methods.push(FnBuilder::lower(&mut builder, info, ty.index, func, is_static)?);
        }
        types.push(TypeDef {
            name: ty.name.clone(),
            fields,
            methods,
        });
    }

    let module = Module {
        constants: builder.constants,
        imports: builder.imports.keys().map(|s| s.to_string()).collect(),
        types,
    };
    debug!(
        "Generated {} types, {} constants, {} imports",
        module.types.len(),
        module.constants.len(),
        module.imports.len()
    );
    Ok(module)
}

/// Tables shared by every method of the module
#[derive(Default)]
struct ModuleBuilder {
    constants: Vec<Constant>,
    ints: HashMap<i64, u32>,
    floats: HashMap<u64, u32>,
    strs: HashMap<String, u32>,
    imports: IndexMap<&'static str, u16>,
}

impl ModuleBuilder {
    fn push_constant(
        &mut self,
        constant: Constant,
        span: Span,
    ) -> CgResult<u32> {
        let idx = limit(self.constants.len(), "constants", span)?;
        self.constants.push(constant);
        Ok(idx)
    }

    fn int(
        &mut self,
        n: i64,
        span: Span,
    ) -> CgResult<u32> {
        if let Some(&idx) = self.ints.get(&n) {
            return Ok(idx);
        }
        let idx = self.push_constant(Constant::Int(n), span)?;
        self.ints.insert(n, idx);
        Ok(idx)
    }

    fn float(
        &mut self,
        x: f64,
        span: Span,
    ) -> CgResult<u32> {
        if let Some(&idx) = self.floats.get(&x.to_bits()) {
            return Ok(idx);
        }
        let idx = self.push_constant(Constant::Float(x), span)?;
        self.floats.insert(x.to_bits(), idx);
        Ok(idx)
    }

    fn str(
        &mut self,
        s: &str,
        span: Span,
    ) -> CgResult<u32> {
        if let Some(&idx) = self.strs.get(s) {
            return Ok(idx);
        }
        let idx = self.push_constant(Constant::Str(s.to_string()), span)?;
        self.strs.insert(s.to_string(), idx);
        Ok(idx)
    }

    fn import(
        &mut self,
        qualified_name: &'static str,
        span: Span,
    ) -> CgResult<u16> {
        if let Some(&idx) = self.imports.get(qualified_name) {
            return Ok(idx);
        }
        let idx = limit(self.imports.len(), "imports", span)?;
        self.imports.insert(qualified_name, idx);
        Ok(idx)
    }
}

struct LoopCtx {
    continue_target: u32,
    breaks: Vec<usize>,
}

/// Lowers one function body
struct FnBuilder<'b, 'a, 'r> {
    module: &'b mut ModuleBuilder,
    info: &'a ProgramInfo<'r>,
    current_type: usize,
    code: Vec<Instr>,
    /// Visible bindings per lexical scope
    scopes: Vec<Vec<(String, u16)>>,
    /// Slot watermark at each scope entry
    scope_starts: Vec<usize>,
    next_slot: usize,
    max_slots: usize,
    loops: Vec<LoopCtx>,
}

impl<'b, 'a, 'r> FnBuilder<'b, 'a, 'r> {
    fn lower(
        module: &'b mut ModuleBuilder,
        info: &'a ProgramInfo<'r>,
        current_type: usize,
        func: &FnDecl,
        is_static: bool,
    ) -> CgResult<MethodDef> {
        let mut fb = FnBuilder {
            module,
            info,
            current_type,
            code: Vec::new(),
            scopes: vec![Vec::new()],
            scope_starts: vec![0],
            next_slot: 0,
            max_slots: 0,
            loops: Vec::new(),
        };

        if !is_static {
            fb.alloc_slot(Some("self"), func.span)?;
        }
        for param in &func.params {
            fb.alloc_slot(Some(&param.name.name), param.name.span)?;
        }

        fb.block(&func.body)?;
        fb.emit(Instr::Unit);
        fb.emit(Instr::Return);

        Ok(MethodDef {
            name: func.name.name.clone(),
            is_pub: func.is_pub,
            is_static,
            arity: limit(func.params.len(), "parameters", func.span)?,
            locals: limit(fb.max_slots, "local slots", func.span)?,
            code: fb.code,
        })
    }

    // ------------------------------------------------------------------
    // Emission helpers
    // ------------------------------------------------------------------

    fn emit(
        &mut self,
        instr: Instr,
    ) -> usize {
        self.code.push(instr);
        self.code.len() - 1
    }

    fn pc(&self) -> u32 {
        // Method bodies are far below u32::MAX instructions
        self.code.len() as u32
    }

    /// Point the jump at `at` to the current end of code
    fn patch_here(
        &mut self,
        at: usize,
    ) {
        let target = self.pc();
        self.code[at] = match self.code[at] {
            Instr::Jump(_) => Instr::Jump(target),
            Instr::JumpIfFalse(_) => Instr::JumpIfFalse(target),
            Instr::JumpIfTrue(_) => Instr::JumpIfTrue(target),
            Instr::IterNext { slot, .. } => Instr::IterNext { slot, exit: target },
            other => other,
        };
    }

    fn alloc_slot(
        &mut self,
        name: Option<&str>,
        span: Span,
    ) -> CgResult<u16> {
        let slot: u16 = limit(self.next_slot, "local slots", span)?;
        self.next_slot += 1;
        self.max_slots = self.max_slots.max(self.next_slot);
        if let (Some(name), Some(scope)) = (name, self.scopes.last_mut()) {
            scope.push((name.to_string(), slot));
        }
        Ok(slot)
    }

    fn push_scope(&mut self) {
        self.scopes.push(Vec::new());
        self.scope_starts.push(self.next_slot);
    }

    fn pop_scope(&mut self) {
        self.scopes.pop();
        if let Some(start) = self.scope_starts.pop() {
            self.next_slot = start;
        }
    }

    fn local(
        &self,
        name: &str,
    ) -> Option<u16> {
        self.scopes
            .iter()
            .rev()
            .find_map(|scope| scope.iter().rev().find(|(n, _)| n == name).map(|(_, s)| *s))
    }

    // ------------------------------------------------------------------
    // Statements
    // ------------------------------------------------------------------

    fn block(
        &mut self,
        block: &Block,
    ) -> CgResult<()> {
        for stmt in &block.stmts {
            self.stmt(stmt)?;
        }
        Ok(())
    }

    fn scoped_block(
        &mut self,
        block: &Block,
    ) -> CgResult<()> {
        self.push_scope();
        let result = self.block(block);
        self.pop_scope();
        result
    }

    fn stmt(
        &mut self,
        stmt: &Stmt,
    ) -> CgResult<()> {
        match stmt {
            Stmt::Let { name, value, .. } => {
                self.expr(value)?;
                let slot = self.alloc_slot(Some(&name.name), name.span)?;
                self.emit(Instr::Store(slot));
            }
            Stmt::Assign { target, value, .. } => self.assign(target, value)?,
            Stmt::If {
                branches,
                else_block,
            } => {
                let mut to_end = Vec::new();
                for (cond, body) in branches {
                    self.expr(cond)?;
                    let skip = self.emit(Instr::JumpIfFalse(0));
                    self.scoped_block(body)?;
                    to_end.push(self.emit(Instr::Jump(0)));
                    self.patch_here(skip);
                }
                if let Some(body) = else_block {
                    self.scoped_block(body)?;
                }
                for at in to_end {
                    self.patch_here(at);
                }
            }
            Stmt::While { cond, body } => {
                let start = self.pc();
                self.expr(cond)?;
                let exit = self.emit(Instr::JumpIfFalse(0));
                self.loop_body(start, body, None)?;
                self.emit(Instr::Jump(start));
                self.patch_here(exit);
                self.finish_loop();
            }
            Stmt::For { var, iter, body } => {
                self.push_scope();
                self.expr(iter)?;
                let cursor = self.alloc_slot(None, var.span)?;
                self.alloc_slot(None, var.span)?;
                self.emit(Instr::IterStart(cursor));
                let start = self.pc();
                let next = self.emit(Instr::IterNext {
                    slot: cursor,
                    exit: 0,
                });
                self.loop_body(start, body, Some(var))?;
                self.emit(Instr::Jump(start));
                self.patch_here(next);
                self.finish_loop();
                self.pop_scope();
            }
            Stmt::Return { value, .. } => {
                match value {
                    Some(value) => self.expr(value)?,
                    None => {
                        self.emit(Instr::Unit);
                    }
                }
                self.emit(Instr::Return);
            }
            Stmt::Break(_) => {
                let at = self.emit(Instr::Jump(0));
                if let Some(ctx) = self.loops.last_mut() {
                    ctx.breaks.push(at);
                }
            }
            Stmt::Continue(_) => {
                let target = self.loops.last().map(|ctx| ctx.continue_target).unwrap_or(0);
                self.emit(Instr::Jump(target));
            }
            Stmt::Throw { value, .. } => {
                self.expr(value)?;
                self.emit(Instr::Throw);
            }
            Stmt::Expr(expr) => {
                self.expr(expr)?;
                self.emit(Instr::Pop);
            }
        }
        Ok(())
    }

    /// Loop body in its own scope; a `for` variable is stored from the stack
    fn loop_body(
        &mut self,
        continue_target: u32,
        body: &Block,
        var: Option<&Ident>,
    ) -> CgResult<()> {
        self.loops.push(LoopCtx {
            continue_target,
            breaks: Vec::new(),
        });
        self.push_scope();
        if let Some(var) = var {
            let slot = self.alloc_slot(Some(&var.name), var.span)?;
            self.emit(Instr::Store(slot));
        }
        let result = self.block(body);
        self.pop_scope();
        result
    }

    fn finish_loop(&mut self) {
        if let Some(ctx) = self.loops.pop() {
            for at in ctx.breaks {
                self.patch_here(at);
            }
        }
    }

    fn assign(
        &mut self,
        target: &Expr,
        value: &Expr,
    ) -> CgResult<()> {
        match &target.kind {
            ExprKind::Var(name) => {
                self.expr(value)?;
                let slot = self.local(name).ok_or_else(|| unresolved(name, target.span))?;
                self.emit(Instr::Store(slot));
            }
            ExprKind::Field { object, field } => {
                self.expr(object)?;
                self.expr(value)?;
                let name = self.module.str(&field.name, field.span)?;
                self.emit(Instr::SetField(name));
            }
            ExprKind::Index { object, index } => {
                self.expr(object)?;
                self.expr(index)?;
                self.expr(value)?;
                self.emit(Instr::SetIndex);
            }
            _ => {
                return Err(Diagnostic::error(
                    "E0213",
                    "invalid assignment target",
                    target.span,
                ))
            }
        }
        Ok(())
    }

    // ------------------------------------------------------------------
    // Expressions
    // ------------------------------------------------------------------

    fn expr(
        &mut self,
        expr: &Expr,
    ) -> CgResult<()> {
        let span = expr.span;
        match &expr.kind {
            ExprKind::Int(n) => {
                let idx = self.module.int(*n, span)?;
                self.emit(Instr::Const(idx));
            }
            ExprKind::Float(x) => {
                let idx = self.module.float(*x, span)?;
                self.emit(Instr::Const(idx));
            }
            ExprKind::Str(s) => {
                let idx = self.module.str(s, span)?;
                self.emit(Instr::Const(idx));
            }
            ExprKind::Bool(true) => {
                self.emit(Instr::True);
            }
            ExprKind::Bool(false) => {
                self.emit(Instr::False);
            }
            ExprKind::Var(name) => {
                let slot = self.local(name).ok_or_else(|| unresolved(name, span))?;
                self.emit(Instr::Load(slot));
            }
            ExprKind::SelfRef => {
                self.emit(Instr::Load(0));
            }
            ExprKind::List(items) => {
                for item in items {
                    self.expr(item)?;
                }
                let count = limit(items.len(), "list elements", span)?;
                self.emit(Instr::NewList(count));
            }
            ExprKind::Unary { op, operand } => {
                self.expr(operand)?;
                self.emit(match op {
                    UnOp::Neg => Instr::Neg,
                    UnOp::Not => Instr::Not,
                });
            }
            ExprKind::Binary {
                op: op @ (BinOp::And | BinOp::Or),
                lhs,
                rhs,
            } => {
                // Short circuit: the deciding operand is the result
                self.expr(lhs)?;
                self.emit(Instr::Dup);
                let jump = self.emit(if *op == BinOp::And {
                    Instr::JumpIfFalse(0)
                } else {
                    Instr::JumpIfTrue(0)
                });
                self.emit(Instr::Pop);
                self.expr(rhs)?;
                self.patch_here(jump);
            }
            ExprKind::Binary { op, lhs, rhs } => {
                self.expr(lhs)?;
                self.expr(rhs)?;
                self.emit(binary_instr(*op));
            }
            ExprKind::Call { callee, args } => {
                let target = self
                    .info
                    .resolve_call(self.current_type, &callee.name)
                    .ok_or_else(|| unresolved(&callee.name, callee.span))?;
                self.args(args)?;
                let argc = limit(args.len(), "arguments", span)?;
                match target {
                    Callee::Static {
                        type_idx,
                        method_idx,
                        ..
                    } => {
                        self.emit(Instr::CallStatic {
                            type_idx: limit(type_idx, "types", span)?,
                            method_idx: limit(method_idx, "methods", span)?,
                            argc,
                        });
                    }
                    Callee::Native(native) => {
                        let import = self.module.import(native.qualified_name, span)?;
                        self.emit(Instr::CallNative { import, argc });
                    }
                }
            }
            ExprKind::MethodCall {
                receiver,
                method,
                args,
            } => self.method_call(receiver, method, args, span)?,
            ExprKind::Field { object, field } => {
                self.expr(object)?;
                let name = self.module.str(&field.name, field.span)?;
                self.emit(Instr::GetField(name));
            }
            ExprKind::Index { object, index } => {
                self.expr(object)?;
                self.expr(index)?;
                self.emit(Instr::Index);
            }
            ExprKind::StructLit { ty, fields } => self.struct_literal(ty, fields, span)?,
        }
        Ok(())
    }

    fn args(
        &mut self,
        args: &[Expr],
    ) -> CgResult<()> {
        for arg in args {
            self.expr(arg)?;
        }
        Ok(())
    }

    fn method_call(
        &mut self,
        receiver: &Expr,
        method: &Ident,
        args: &[Expr],
        span: Span,
    ) -> CgResult<()> {
        let argc: u8 = limit(args.len(), "arguments", span)?;

        if let ExprKind::Var(name) = &receiver.kind {
            if self.local(name).is_none() {
                let info = self.info;
                match info.static_receiver(name) {
                    Some(StaticReceiver::Type(ty)) => {
                        let m = ty
                            .methods
                            .get(&method.name)
                            .ok_or_else(|| unresolved(&method.name, method.span))?;
                        self.args(args)?;
                        self.emit(Instr::CallStatic {
                            type_idx: limit(ty.index, "types", span)?,
                            method_idx: limit(m.index, "methods", span)?,
                            argc,
                        });
                        return Ok(());
                    }
                    Some(StaticReceiver::Module(module)) => {
                        let native = module
                            .exports
                            .get(method.name.as_str())
                            .ok_or_else(|| unresolved(&method.name, method.span))?;
                        self.args(args)?;
                        let import = self.module.import(native.qualified_name, span)?;
                        self.emit(Instr::CallNative { import, argc });
                        return Ok(());
                    }
                    None => return Err(unresolved(name, receiver.span)),
                }
            }
        }

        self.expr(receiver)?;
        self.args(args)?;
        let name = self.module.str(&method.name, method.span)?;
        self.emit(Instr::CallMethod { name, argc });
        Ok(())
    }

    /// Field values are evaluated in source order, then stored in declared order
    fn struct_literal(
        &mut self,
        ty: &Ident,
        fields: &[(Ident, Expr)],
        span: Span,
    ) -> CgResult<()> {
        let info = self.info;
        let shape = info
            .type_named(&ty.name)
            .ok_or_else(|| unresolved(&ty.name, ty.span))?;

        self.push_scope();
        let mut temps = Vec::with_capacity(fields.len());
        for (name, value) in fields {
            self.expr(value)?;
            let slot = self.alloc_slot(None, name.span)?;
            self.emit(Instr::Store(slot));
            temps.push((name.name.as_str(), slot));
        }
        for field in &shape.fields {
            let slot = temps
                .iter()
                .find(|(n, _)| n == field)
                .map(|(_, s)| *s)
                .ok_or_else(|| unresolved(field, span))?;
            self.emit(Instr::Load(slot));
        }
        self.pop_scope();

        self.emit(Instr::NewStruct(limit(shape.index, "types", span)?));
        Ok(())
    }
}

fn binary_instr(op: BinOp) -> Instr {
    match op {
        BinOp::Add => Instr::Add,
        BinOp::Sub => Instr::Sub,
        BinOp::Mul => Instr::Mul,
        BinOp::Div => Instr::Div,
        BinOp::Rem => Instr::Rem,
        BinOp::Eq => Instr::Eq,
        BinOp::Ne => Instr::Ne,
        BinOp::Lt => Instr::Lt,
        BinOp::Le => Instr::Le,
        BinOp::Gt => Instr::Gt,
        BinOp::Ge => Instr::Ge,
        BinOp::Range => Instr::MakeRange,
        // Lowered with jumps before reaching here
        BinOp::And | BinOp::Or => Instr::Eq,
    }
}

/// A name resolution already accepted but codegen cannot find
fn unresolved(
    name: &str,
    span: Span,
) -> Diagnostic {
    Diagnostic::error("E0202", format!("cannot resolve `{}`", name), span)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::frontend::lexer::tokenize;
    use crate::frontend::parser::parse;
    use crate::frontend::resolve::check_bodies;
    use crate::middle::bytecode::MODULE_TYPE;
    use crate::std::ReferenceSet;
    use crate::util::diagnostic::Diagnostics;

    fn generate_ok(source: &str) -> Module {
        let (tokens, mut diags) = tokenize(source);
        let (unit, parse_diags) = parse(&tokens);
        diags.extend(parse_diags);
        let info = ProgramInfo::collect(&unit, ReferenceSet::standard(), &mut diags);
        check_bodies(&unit, &info, &mut diags);
        assert!(!diags.has_errors(), "{}", diags);
        let module = generate(&unit, &info).unwrap();
        module.verify().unwrap();
        module
    }

    #[test]
    fn test_module_type_comes_first() {
        let module = generate_ok("type A { pub fn Main() {} } pub fn Main() {}");
        assert_eq!(module.types[0].name, MODULE_TYPE);
        assert_eq!(module.types[1].name, "A");
        assert_eq!(module.entry_points(), vec![(0, 0), (1, 0)]);
    }

    #[test]
    fn test_constants_and_imports_are_deduplicated() {
        let module = generate_ok(r#"fn Main() { println("a"); println("a", 1, 1); print(2.5); }"#);
        assert_eq!(
            module.constants,
            vec![
                Constant::Str("a".to_string()),
                Constant::Int(1),
                Constant::Float(2.5)
            ]
        );
        assert_eq!(module.imports, vec!["std.io.println", "std.io.print"]);
    }

    #[test]
    fn test_instance_methods_reserve_self_slot() {
        let module = generate_ok("type P { x: Int fn get(self, k: Int) -> Int { let y = k; return self.x + y; } }");
        let get = &module.types[1].methods[0];
        assert!(!get.is_static);
        assert_eq!(get.arity, 1);
        assert_eq!(get.locals, 3);
        assert_eq!(get.code[0], Instr::Load(1));
        assert_eq!(get.code[1], Instr::Store(2));
    }

    #[test]
    fn test_sibling_scopes_reuse_slots() {
        let module = generate_ok(
            "fn Main() { if true { let a = 1; println(a); } else { let b = 2; println(b); } }",
        );
        assert_eq!(module.types[0].methods[0].locals, 1);
    }

    #[test]
    fn test_short_circuit_shape() {
        let module = generate_ok("fn f(a: Bool, b: Bool) -> Bool { return a && b; }");
        let code = &module.types[0].methods[0].code;
        assert_eq!(
            &code[..6],
            &[
                Instr::Load(0),
                Instr::Dup,
                Instr::JumpIfFalse(5),
                Instr::Pop,
                Instr::Load(1),
                Instr::Return
            ]
        );
    }

    #[test]
    fn test_break_and_continue_targets() {
        let module = generate_ok(
            "fn Main() { for i in 0..10 { if i == 2 { continue; } if i == 5 { break; } } }",
        );
        let code = &module.types[0].methods[0].code;
        let start = code
            .iter()
            .position(|i| matches!(i, Instr::IterNext { .. }))
            .unwrap() as u32;
        let Instr::IterNext { exit, .. } = code[start as usize] else {
            unreachable!()
        };
        let jumps: Vec<u32> = code
            .iter()
            .filter_map(|i| match i {
                Instr::Jump(t) => Some(*t),
                _ => None,
            })
            .collect();
        assert!(jumps.contains(&start), "continue jumps to the cursor");
        assert!(jumps.contains(&exit), "break jumps past the loop");
    }

    #[test]
    fn test_struct_literal_stores_in_declared_order() {
        let module = generate_ok("type P { x: Int, y: Int } fn Main() { let _p = P { y: 2, x: 1 }; }");
        let code = &module.types[0].methods[0].code;
        assert!(code
            .windows(3)
            .any(|w| w == [Instr::Load(1), Instr::Load(0), Instr::NewStruct(1)]));
    }

    #[test]
    fn test_static_and_module_calls() {
        let module = generate_ok(
            "use std.math; type T { pub fn two() -> Int { return 2; } } fn Main() { println(math.abs(T.two())); }",
        );
        let code = &module.types[0].methods[0].code;
        assert!(code.contains(&Instr::CallStatic {
            type_idx: 1,
            method_idx: 0,
            argc: 0
        }));
        assert_eq!(module.imports, vec!["std.math.abs", "std.io.println"]);
    }

    #[test]
    fn test_unused_diagnostics_type_is_available() {
        // Warnings alone never block generation
        let mut diags = Diagnostics::new();
        let (tokens, _) = tokenize("fn Main() { let x = 1; }");
        let (unit, _) = parse(&tokens);
        let info = ProgramInfo::collect(&unit, ReferenceSet::standard(), &mut diags);
        check_bodies(&unit, &info, &mut diags);
        assert_eq!(diags.len(), 1);
        assert!(generate(&unit, &info).is_ok());
    }
}
