//! Code generator — lowers a type-annotated tree to stack instructions.
//!
//! One [`Generator`] serves a whole compilation unit: it owns the alias
//! table, the method signature table and the label counter, so labels are
//! unique across every method it produces. Per-method state (emitted
//! code, the name-to-register map, the enclosing loop/switch frames)
//! lives in a [`Body`] that exists only while that method is generated.
//!
//! The source language has value semantics; the instruction set has
//! reference semantics for arrays and records. The generator reconciles
//! the two with a universal copy rule: any container flowing into a
//! store (a variable, an array slot, a record field, a call argument) is
//! cloned first. Union-typed slots hold boxed values; reading one back
//! at a concrete type goes through the two-step conversion of a kind
//! check followed by an unbox.

use crate::ast::{
    BinOp, Decl, Expr, ExprKind, MethodDecl, Program, Stmt, StmtKind, Type, UnaryOp, Value,
};
use crate::bytecode::{
    CmpOp, CompiledMethod, Constant, Instruction, Label, Repr, Signature,
};
use crate::errors::CodegenError;
use std::collections::{HashMap, HashSet};

/// An enclosing construct that `break`/`continue` may target.
enum Frame {
    Loop { continue_label: Label, exit: Label },
    Switch { exit: Label },
}

/// Per-method emission state.
struct Body {
    code: Vec<Instruction>,
    registers: HashMap<String, u16>,
    next_register: u16,
    frames: Vec<Frame>,
    ret: Repr,
}

impl Body {
    fn new(ret: Repr) -> Self {
        Self {
            code: Vec::new(),
            registers: HashMap::new(),
            next_register: 0,
            frames: Vec::new(),
            ret,
        }
    }

    fn emit(&mut self, insn: Instruction) {
        self.code.push(insn);
    }

    fn alloc(&mut self, name: &str) -> u16 {
        let reg = self.next_register;
        self.next_register += 1;
        self.registers.insert(name.to_string(), reg);
        reg
    }

    fn alloc_temp(&mut self) -> u16 {
        let reg = self.next_register;
        self.next_register += 1;
        reg
    }

    fn reg(&self, name: &str) -> Result<u16, CodegenError> {
        self.registers
            .get(name)
            .copied()
            .ok_or_else(|| CodegenError::UnallocatedVariable(name.to_string()))
    }
}

pub struct Generator {
    aliases: HashMap<String, Type>,
    signatures: HashMap<String, Signature>,
    labels: Label,
}

/// Generate every method of a checked program.
pub fn generate_program(program: &Program) -> Result<Vec<CompiledMethod>, CodegenError> {
    let mut generator = Generator::new(program)?;
    let mut methods = Vec::new();
    for decl in program {
        if let Decl::Method(md) = decl {
            methods.push(generator.generate(md)?);
        }
    }
    Ok(methods)
}

impl Generator {
    pub fn new(program: &Program) -> Result<Self, CodegenError> {
        let mut generator = Self {
            aliases: HashMap::new(),
            signatures: HashMap::new(),
            labels: 0,
        };
        for decl in program {
            if let Decl::Type(td) = decl {
                generator.aliases.insert(td.name.clone(), td.ty.clone());
            }
        }
        for decl in program {
            if let Decl::Method(md) = decl {
                let params = md
                    .params
                    .iter()
                    .map(|p| generator.repr_of(&p.ty))
                    .collect::<Result<Vec<_>, _>>()?;
                let ret = generator.repr_of(&md.ret)?;
                generator
                    .signatures
                    .insert(md.name.clone(), Signature { params, ret });
            }
        }
        Ok(generator)
    }

    pub fn generate(&mut self, method: &MethodDecl) -> Result<CompiledMethod, CodegenError> {
        let signature = self
            .signatures
            .get(&method.name)
            .cloned()
            .ok_or_else(|| CodegenError::UnknownMethod(method.name.clone()))?;
        let mut body = Body::new(signature.ret);
        for param in &method.params {
            body.alloc(&param.name);
        }
        for stmt in &method.body {
            self.gen_stmt(&mut body, stmt)?;
        }
        // Any body that is not provably returning on every path can
        // fall off its end; give it the trailing return.
        if !all_paths_return(&method.body) {
            body.emit(Instruction::Return(None));
        }
        Ok(CompiledMethod {
            name: method.name.clone(),
            signature,
            register_count: body.next_register,
            code: body.code,
        })
    }

    fn fresh_label(&mut self) -> Label {
        let label = self.labels;
        self.labels += 1;
        label
    }

    // ── Statements ───────────────────────────────────────────────────

    fn gen_stmt(&mut self, body: &mut Body, stmt: &Stmt) -> Result<(), CodegenError> {
        match &stmt.kind {
            StmtKind::VarDecl { ty, name, init } => {
                let target = self.repr_of(ty)?;
                if let Some(init) = init {
                    let got = self.gen_expr(body, init)?;
                    self.clone_as_necessary(body, got);
                    self.coerce(body, got, target);
                    let reg = body.alloc(name);
                    body.emit(Instruction::Store(reg));
                } else {
                    body.alloc(name);
                }
                Ok(())
            }
            StmtKind::Assign { lhs, rhs } => self.gen_assign(body, lhs, rhs),
            StmtKind::IfElse {
                cond,
                then_blk,
                else_blk,
            } => {
                let l_then = self.fresh_label();
                let l_end = self.fresh_label();
                self.gen_condition(body, cond)?;
                body.emit(Instruction::BranchIfTrue(l_then));
                for s in else_blk {
                    self.gen_stmt(body, s)?;
                }
                // No jump over the then branch when the else branch
                // cannot reach it anyway.
                if !all_paths_return(else_blk) {
                    body.emit(Instruction::Goto(l_end));
                }
                body.emit(Instruction::Mark(l_then));
                for s in then_blk {
                    self.gen_stmt(body, s)?;
                }
                body.emit(Instruction::Mark(l_end));
                Ok(())
            }
            StmtKind::While { cond, body: blk } => {
                let l_head = self.fresh_label();
                let l_body = self.fresh_label();
                let l_exit = self.fresh_label();
                body.emit(Instruction::Mark(l_head));
                self.gen_condition(body, cond)?;
                body.emit(Instruction::BranchIfTrue(l_body));
                body.emit(Instruction::Goto(l_exit));
                body.emit(Instruction::Mark(l_body));
                body.frames.push(Frame::Loop {
                    continue_label: l_head,
                    exit: l_exit,
                });
                for s in blk {
                    self.gen_stmt(body, s)?;
                }
                body.frames.pop();
                body.emit(Instruction::Goto(l_head));
                body.emit(Instruction::Mark(l_exit));
                Ok(())
            }
            StmtKind::For {
                decl,
                cond,
                step,
                body: blk,
            } => {
                let l_head = self.fresh_label();
                let l_body = self.fresh_label();
                let l_step = self.fresh_label();
                let l_exit = self.fresh_label();
                self.gen_stmt(body, decl)?;
                body.emit(Instruction::Mark(l_head));
                self.gen_condition(body, cond)?;
                body.emit(Instruction::BranchIfTrue(l_body));
                body.emit(Instruction::Goto(l_exit));
                body.emit(Instruction::Mark(l_body));
                // `continue` must still run the step, so it targets the
                // step label rather than the head.
                body.frames.push(Frame::Loop {
                    continue_label: l_step,
                    exit: l_exit,
                });
                for s in blk {
                    self.gen_stmt(body, s)?;
                }
                body.frames.pop();
                body.emit(Instruction::Mark(l_step));
                self.gen_stmt(body, step)?;
                body.emit(Instruction::Goto(l_head));
                body.emit(Instruction::Mark(l_exit));
                Ok(())
            }
            StmtKind::Switch { subject, cases } => self.gen_switch(body, subject, cases),
            StmtKind::Break => {
                let target = body
                    .frames
                    .last()
                    .map(|f| match f {
                        Frame::Loop { exit, .. } | Frame::Switch { exit } => *exit,
                    })
                    .ok_or(CodegenError::NoEnclosingFrame)?;
                body.emit(Instruction::Goto(target));
                Ok(())
            }
            StmtKind::Continue => {
                // Skip over switch frames: continue belongs to the
                // nearest enclosing loop.
                let target = body
                    .frames
                    .iter()
                    .rev()
                    .find_map(|f| match f {
                        Frame::Loop { continue_label, .. } => Some(*continue_label),
                        Frame::Switch { .. } => None,
                    })
                    .ok_or(CodegenError::NoEnclosingFrame)?;
                body.emit(Instruction::Goto(target));
                Ok(())
            }
            StmtKind::Return(value) => {
                let ret = body.ret;
                match value {
                    Some(expr) => {
                        let got = self.gen_expr(body, expr)?;
                        self.coerce(body, got, ret);
                        body.emit(Instruction::Return(Some(ret)));
                    }
                    None => body.emit(Instruction::Return(None)),
                }
                Ok(())
            }
            StmtKind::Assert(expr) => {
                let l_ok = self.fresh_label();
                self.gen_condition(body, expr)?;
                body.emit(Instruction::BranchIfTrue(l_ok));
                body.emit(Instruction::Fail);
                body.emit(Instruction::Mark(l_ok));
                Ok(())
            }
            StmtKind::Print(expr) => {
                let repr = self.gen_expr(body, expr)?;
                body.emit(Instruction::Print(repr));
                Ok(())
            }
            StmtKind::Invoke(expr) => {
                let repr = self.gen_expr(body, expr)?;
                if repr != Repr::Void {
                    body.emit(Instruction::Pop);
                }
                Ok(())
            }
        }
    }

    fn gen_assign(&mut self, body: &mut Body, lhs: &Expr, rhs: &Expr) -> Result<(), CodegenError> {
        match &lhs.kind {
            ExprKind::Variable(name) => {
                let target = self.expr_repr(lhs)?;
                let got = self.gen_expr(body, rhs)?;
                self.clone_as_necessary(body, got);
                self.coerce(body, got, target);
                let reg = body.reg(name)?;
                body.emit(Instruction::Store(reg));
                Ok(())
            }
            ExprKind::IndexOf { src, index } => {
                let sr = self.gen_expr(body, src)?;
                self.coerce(body, sr, Repr::Array);
                let ir = self.gen_expr(body, index)?;
                self.coerce(body, ir, Repr::Int);
                let got = self.gen_expr(body, rhs)?;
                self.clone_as_necessary(body, got);
                self.box_as_necessary(body, got);
                body.emit(Instruction::ArraySet);
                Ok(())
            }
            ExprKind::FieldAccess { src, field } => {
                let sr = self.gen_expr(body, src)?;
                self.coerce(body, sr, Repr::Record);
                let got = self.gen_expr(body, rhs)?;
                self.clone_as_necessary(body, got);
                self.box_as_necessary(body, got);
                body.emit(Instruction::RecordPut(field.clone()));
                Ok(())
            }
            _ => Err(CodegenError::Invariant(
                "assignment target survived parsing without being an lvalue".to_string(),
            )),
        }
    }

    fn gen_switch(
        &mut self,
        body: &mut Body,
        subject: &Expr,
        cases: &[crate::ast::Case],
    ) -> Result<(), CodegenError> {
        let sr = self.gen_expr(body, subject)?;
        let tmp = body.alloc_temp();
        body.emit(Instruction::Store(tmp));

        let exit = self.fresh_label();
        let labels: Vec<Label> = cases.iter().map(|_| self.fresh_label()).collect();
        let mut has_default = false;

        for (case, &label) in cases.iter().zip(&labels) {
            let Some(guard) = &case.value else {
                // The default arm dispatches unconditionally from its
                // source position; tests after it are unreachable, and
                // a subject matching a later case still enters the
                // default body first.
                body.emit(Instruction::Goto(label));
                has_default = true;
                continue;
            };
            let ExprKind::Literal(constant) = &guard.kind else {
                return Err(CodegenError::Invariant(
                    "switch guard survived parsing without being folded".to_string(),
                ));
            };
            body.emit(Instruction::Load(tmp));
            if scalar_guard(sr, constant) {
                self.emit_value(body, constant);
                body.emit(Instruction::CmpBranch(CmpOp::Eq, label));
            } else {
                self.box_as_necessary(body, sr);
                let vr = self.emit_value(body, constant);
                self.box_as_necessary(body, vr);
                body.emit(Instruction::StructEq);
                body.emit(Instruction::BranchIfTrue(label));
            }
        }
        if !has_default {
            body.emit(Instruction::Goto(exit));
        }

        body.frames.push(Frame::Switch { exit });
        for (case, &label) in cases.iter().zip(&labels) {
            body.emit(Instruction::Mark(label));
            for s in &case.body {
                self.gen_stmt(body, s)?;
            }
            // Execution falls through to the following case.
        }
        body.frames.pop();
        body.emit(Instruction::Mark(exit));
        Ok(())
    }

    // ── Expressions ──────────────────────────────────────────────────

    /// Emit code leaving the expression's value on the stack; returns
    /// the representation of that value.
    fn gen_expr(&mut self, body: &mut Body, expr: &Expr) -> Result<Repr, CodegenError> {
        match &expr.kind {
            ExprKind::Literal(value) => Ok(self.emit_value(body, value)),
            ExprKind::Variable(name) => {
                let reg = body.reg(name)?;
                body.emit(Instruction::Load(reg));
                self.expr_repr(expr)
            }
            ExprKind::Binary { op, lhs, rhs } => self.gen_binary(body, *op, lhs, rhs),
            ExprKind::Unary { op, expr: operand } => match op {
                UnaryOp::Not => {
                    let r = self.gen_expr(body, operand)?;
                    self.coerce(body, r, Repr::Bool);
                    body.emit(Instruction::Not);
                    Ok(Repr::Bool)
                }
                UnaryOp::Neg => {
                    let r = self.gen_expr(body, operand)?;
                    self.coerce(body, r, Repr::Int);
                    body.emit(Instruction::Neg);
                    Ok(Repr::Int)
                }
                UnaryOp::LengthOf => {
                    let r = self.gen_expr(body, operand)?;
                    self.coerce(body, r, Repr::Array);
                    body.emit(Instruction::ArrayLength);
                    Ok(Repr::Int)
                }
            },
            ExprKind::IndexOf { src, index } => {
                let sr = self.gen_expr(body, src)?;
                self.coerce(body, sr, Repr::Array);
                let ir = self.gen_expr(body, index)?;
                self.coerce(body, ir, Repr::Int);
                body.emit(Instruction::ArrayGet);
                let elem = self.expr_repr(expr)?;
                self.read_conversion(body, elem);
                Ok(elem)
            }
            ExprKind::FieldAccess { src, field } => {
                let sr = self.gen_expr(body, src)?;
                self.coerce(body, sr, Repr::Record);
                body.emit(Instruction::RecordGet(field.clone()));
                let repr = self.expr_repr(expr)?;
                self.read_conversion(body, repr);
                Ok(repr)
            }
            ExprKind::RecordConstructor(fields) => {
                for (_, value) in fields {
                    let r = self.gen_expr(body, value)?;
                    self.clone_as_necessary(body, r);
                    self.box_as_necessary(body, r);
                }
                let names = fields.iter().map(|(n, _)| n.clone()).collect();
                body.emit(Instruction::NewRecord(names));
                Ok(Repr::Record)
            }
            ExprKind::ArrayInitialiser(elems) => {
                for elem in elems {
                    let r = self.gen_expr(body, elem)?;
                    self.clone_as_necessary(body, r);
                    self.box_as_necessary(body, r);
                }
                body.emit(Instruction::NewArray(elems.len() as u32));
                Ok(Repr::Array)
            }
            ExprKind::ArrayGenerator { value, size } => self.gen_array_generator(body, value, size),
            ExprKind::Invoke { name, args } => {
                let signature = self
                    .signatures
                    .get(name)
                    .cloned()
                    .ok_or_else(|| CodegenError::UnknownMethod(name.clone()))?;
                for (arg, want) in args.iter().zip(&signature.params) {
                    let got = self.gen_expr(body, arg)?;
                    self.clone_as_necessary(body, got);
                    self.coerce(body, got, *want);
                }
                let ret = signature.ret;
                body.emit(Instruction::Invoke {
                    name: name.clone(),
                    signature,
                });
                Ok(ret)
            }
            ExprKind::Is { expr: operand, test } => self.gen_is(body, operand, test),
            ExprKind::Cast { ty, expr: operand } => {
                let from = self.gen_expr(body, operand)?;
                let to = self.repr_of(ty)?;
                self.coerce(body, from, to);
                Ok(to)
            }
        }
    }

    fn gen_binary(
        &mut self,
        body: &mut Body,
        op: BinOp,
        lhs: &Expr,
        rhs: &Expr,
    ) -> Result<Repr, CodegenError> {
        match op {
            BinOp::Add | BinOp::Sub | BinOp::Mul | BinOp::Div | BinOp::Rem => {
                let lr = self.gen_expr(body, lhs)?;
                self.coerce(body, lr, Repr::Int);
                let rr = self.gen_expr(body, rhs)?;
                self.coerce(body, rr, Repr::Int);
                body.emit(match op {
                    BinOp::Add => Instruction::Add,
                    BinOp::Sub => Instruction::Sub,
                    BinOp::Mul => Instruction::Mul,
                    BinOp::Div => Instruction::Div,
                    _ => Instruction::Rem,
                });
                Ok(Repr::Int)
            }
            BinOp::And => {
                let l_rhs = self.fresh_label();
                let l_end = self.fresh_label();
                self.gen_condition(body, lhs)?;
                body.emit(Instruction::BranchIfTrue(l_rhs));
                body.emit(Instruction::Const(Constant::Bool(false)));
                body.emit(Instruction::Goto(l_end));
                body.emit(Instruction::Mark(l_rhs));
                self.gen_condition(body, rhs)?;
                body.emit(Instruction::Mark(l_end));
                Ok(Repr::Bool)
            }
            BinOp::Or => {
                let l_true = self.fresh_label();
                let l_end = self.fresh_label();
                self.gen_condition(body, lhs)?;
                body.emit(Instruction::BranchIfTrue(l_true));
                self.gen_condition(body, rhs)?;
                body.emit(Instruction::Goto(l_end));
                body.emit(Instruction::Mark(l_true));
                body.emit(Instruction::Const(Constant::Bool(true)));
                body.emit(Instruction::Mark(l_end));
                Ok(Repr::Bool)
            }
            BinOp::Eq | BinOp::Neq => self.gen_equality(body, op, lhs, rhs),
            BinOp::Lt | BinOp::LtEq | BinOp::Gt | BinOp::GtEq => {
                let cmp = match op {
                    BinOp::Lt => CmpOp::Lt,
                    BinOp::LtEq => CmpOp::LtEq,
                    BinOp::Gt => CmpOp::Gt,
                    _ => CmpOp::GtEq,
                };
                let lr = self.gen_expr(body, lhs)?;
                self.coerce_scalar(body, lr);
                let rr = self.gen_expr(body, rhs)?;
                self.coerce_scalar(body, rr);
                self.push_cmp(body, cmp);
                Ok(Repr::Bool)
            }
        }
    }

    fn gen_equality(
        &mut self,
        body: &mut Body,
        op: BinOp,
        lhs: &Expr,
        rhs: &Expr,
    ) -> Result<Repr, CodegenError> {
        let negate = op == BinOp::Neq;
        let lr = self.expr_repr(lhs)?;
        let rr = self.expr_repr(rhs)?;
        if lr.prim().is_some() && lr == rr {
            self.gen_expr(body, lhs)?;
            self.gen_expr(body, rhs)?;
            self.push_cmp(body, if negate { CmpOp::Neq } else { CmpOp::Eq });
        } else if lr.is_container() && rr.is_container() && lr != rr && lr != Repr::Ref && rr != Repr::Ref
        {
            // Statically different container kinds can never be equal,
            // but both operands are still evaluated for their effects.
            self.gen_expr(body, lhs)?;
            self.gen_expr(body, rhs)?;
            body.emit(Instruction::Pop);
            body.emit(Instruction::Pop);
            body.emit(Instruction::Const(Constant::Bool(negate)));
        } else {
            let got = self.gen_expr(body, lhs)?;
            self.box_as_necessary(body, got);
            let got = self.gen_expr(body, rhs)?;
            self.box_as_necessary(body, got);
            body.emit(Instruction::StructEq);
            if negate {
                body.emit(Instruction::Not);
            }
        }
        Ok(Repr::Bool)
    }

    /// `[value; size]` — evaluate the element once, then append a copy
    /// per iteration using two hidden counter registers.
    fn gen_array_generator(
        &mut self,
        body: &mut Body,
        value: &Expr,
        size: &Expr,
    ) -> Result<Repr, CodegenError> {
        let vr = self.gen_expr(body, value)?;
        let reg_value = body.alloc_temp();
        body.emit(Instruction::Store(reg_value));
        let sr = self.gen_expr(body, size)?;
        self.coerce(body, sr, Repr::Int);
        let reg_size = body.alloc_temp();
        body.emit(Instruction::Store(reg_size));
        let reg_index = body.alloc_temp();
        body.emit(Instruction::Const(Constant::Int(0)));
        body.emit(Instruction::Store(reg_index));

        let l_head = self.fresh_label();
        let l_end = self.fresh_label();
        body.emit(Instruction::NewArray(0));
        body.emit(Instruction::Mark(l_head));
        body.emit(Instruction::Load(reg_index));
        body.emit(Instruction::Load(reg_size));
        body.emit(Instruction::CmpBranch(CmpOp::GtEq, l_end));
        body.emit(Instruction::Load(reg_value));
        self.clone_as_necessary(body, vr);
        self.box_as_necessary(body, vr);
        body.emit(Instruction::ArrayAppend);
        body.emit(Instruction::Inc(reg_index, 1));
        body.emit(Instruction::Goto(l_head));
        body.emit(Instruction::Mark(l_end));
        Ok(Repr::Array)
    }

    fn gen_is(
        &mut self,
        body: &mut Body,
        operand: &Expr,
        test: &Type,
    ) -> Result<Repr, CodegenError> {
        let r = self.gen_expr(body, operand)?;
        self.box_as_necessary(body, r);
        let members = self.flatten_union(test)?;
        if members.len() == 1 {
            self.gen_kind_test(body, &members[0])?;
        } else {
            let tmp = body.alloc_temp();
            body.emit(Instruction::Store(tmp));
            let l_true = self.fresh_label();
            let l_end = self.fresh_label();
            for member in &members {
                body.emit(Instruction::Load(tmp));
                self.gen_kind_test(body, member)?;
                body.emit(Instruction::BranchIfTrue(l_true));
            }
            body.emit(Instruction::Const(Constant::Bool(false)));
            body.emit(Instruction::Goto(l_end));
            body.emit(Instruction::Mark(l_true));
            body.emit(Instruction::Const(Constant::Bool(true)));
            body.emit(Instruction::Mark(l_end));
        }
        Ok(Repr::Bool)
    }

    /// Pops a boxed value, pushes whether it has the given kind.
    fn gen_kind_test(&mut self, body: &mut Body, ty: &Type) -> Result<(), CodegenError> {
        let resolved = self.resolve(ty)?;
        if matches!(resolved, Type::Null) {
            body.emit(Instruction::Const(Constant::Null));
            body.emit(Instruction::StructEq);
            return Ok(());
        }
        match self.repr_of(&resolved)?.boxed() {
            Some(kind) => body.emit(Instruction::TestKind(kind)),
            None => {
                // A test against a type with no concrete kind (void or a
                // collapsed alias cycle) matches nothing.
                body.emit(Instruction::Pop);
                body.emit(Instruction::Const(Constant::Bool(false)));
            }
        }
        Ok(())
    }

    /// Push a constant value. Scalars are single instructions; string,
    /// array and record constants are built element by element.
    fn emit_value(&mut self, body: &mut Body, value: &Value) -> Repr {
        match value {
            Value::Null => {
                body.emit(Instruction::Const(Constant::Null));
                Repr::Ref
            }
            Value::Bool(b) => {
                body.emit(Instruction::Const(Constant::Bool(*b)));
                Repr::Bool
            }
            Value::Int(n) => {
                body.emit(Instruction::Const(Constant::Int(*n)));
                Repr::Int
            }
            Value::Char(c) => {
                body.emit(Instruction::Const(Constant::Char(*c)));
                Repr::Char
            }
            Value::Str(s) => {
                // A string is an array of character codes.
                let mut count = 0u32;
                for c in s.chars() {
                    body.emit(Instruction::Const(Constant::Int(c as i32)));
                    body.emit(Instruction::Box(crate::bytecode::Prim::Int));
                    count += 1;
                }
                body.emit(Instruction::NewArray(count));
                Repr::Array
            }
            Value::Array(elems) => {
                for elem in elems {
                    let r = self.emit_value(body, elem);
                    self.box_as_necessary(body, r);
                }
                body.emit(Instruction::NewArray(elems.len() as u32));
                Repr::Array
            }
            Value::Record(fields) => {
                for (_, v) in fields {
                    let r = self.emit_value(body, v);
                    self.box_as_necessary(body, r);
                }
                let names = fields.iter().map(|(n, _)| n.clone()).collect();
                body.emit(Instruction::NewRecord(names));
                Repr::Record
            }
        }
    }

    fn gen_condition(&mut self, body: &mut Body, expr: &Expr) -> Result<(), CodegenError> {
        let r = self.gen_expr(body, expr)?;
        self.coerce(body, r, Repr::Bool);
        Ok(())
    }

    /// Pops two scalars, pushes the comparison result as a bool.
    fn push_cmp(&mut self, body: &mut Body, op: CmpOp) {
        let l_true = self.fresh_label();
        let l_end = self.fresh_label();
        body.emit(Instruction::CmpBranch(op, l_true));
        body.emit(Instruction::Const(Constant::Bool(false)));
        body.emit(Instruction::Goto(l_end));
        body.emit(Instruction::Mark(l_true));
        body.emit(Instruction::Const(Constant::Bool(true)));
        body.emit(Instruction::Mark(l_end));
    }

    // ── Representation plumbing ──────────────────────────────────────

    /// Convert the value on top of the stack from one representation to
    /// another. Boxing into a `Ref` slot and reading back out of one are
    /// the only conversions that emit code.
    fn coerce(&self, body: &mut Body, from: Repr, to: Repr) {
        if from == to {
            return;
        }
        match (from, to) {
            (_, Repr::Ref) => self.box_as_necessary(body, from),
            (Repr::Ref, _) => self.read_conversion(body, to),
            _ => {}
        }
    }

    /// Order comparisons take ints or chars; boxed operands are assumed
    /// to hold ints.
    fn coerce_scalar(&self, body: &mut Body, from: Repr) {
        if from == Repr::Ref {
            self.read_conversion(body, Repr::Int);
        }
    }

    /// Two-step read out of a boxed slot: check the kind, then unbox
    /// primitives. A `Ref` target stays boxed.
    fn read_conversion(&self, body: &mut Body, to: Repr) {
        if let Some(kind) = to.boxed() {
            body.emit(Instruction::CheckCast(kind));
        }
        if let Some(prim) = to.prim() {
            body.emit(Instruction::Unbox(prim));
        }
    }

    fn box_as_necessary(&self, body: &mut Body, from: Repr) {
        if let Some(prim) = from.prim() {
            body.emit(Instruction::Box(prim));
        }
    }

    /// Containers have value semantics in the source language, so every
    /// store takes a copy.
    fn clone_as_necessary(&self, body: &mut Body, repr: Repr) {
        if repr.is_container() {
            body.emit(Instruction::Clone);
        }
    }

    fn expr_repr(&self, expr: &Expr) -> Result<Repr, CodegenError> {
        let ty = expr.ty.as_ref().ok_or(CodegenError::MissingTypeAnnotation(
            expr.span.start,
            expr.span.end,
        ))?;
        self.repr_of(ty)
    }

    fn repr_of(&self, ty: &Type) -> Result<Repr, CodegenError> {
        Ok(match self.resolve(ty)? {
            Type::Void => Repr::Void,
            Type::Null => Repr::Ref,
            Type::Bool => Repr::Bool,
            Type::Int => Repr::Int,
            Type::Char => Repr::Char,
            Type::Str | Type::Array(_) => Repr::Array,
            Type::Record(_) => Repr::Record,
            Type::Union(_) => Repr::Ref,
            // An alias cycle with no structure collapses to a generic
            // reference.
            Type::Named(_) => Repr::Ref,
        })
    }

    /// Resolve top-level alias indirections. A `Named` survives only if
    /// the alias chain is cyclic.
    fn resolve(&self, ty: &Type) -> Result<Type, CodegenError> {
        let mut seen = HashSet::new();
        let mut current = ty.clone();
        while let Type::Named(name) = &current {
            if !seen.insert(name.clone()) {
                return Ok(current);
            }
            current = self
                .aliases
                .get(name)
                .cloned()
                .ok_or_else(|| CodegenError::UnknownTypeName(name.clone()))?;
        }
        Ok(current)
    }

    fn flatten_union(&self, ty: &Type) -> Result<Vec<Type>, CodegenError> {
        match self.resolve(ty)? {
            Type::Union(alts) => {
                let mut members = Vec::new();
                for alt in alts {
                    members.extend(self.flatten_union(&alt)?);
                }
                Ok(members)
            }
            other => Ok(vec![other]),
        }
    }
}

fn scalar_guard(subject: Repr, constant: &Value) -> bool {
    matches!(
        (subject, constant),
        (Repr::Int, Value::Int(_)) | (Repr::Bool, Value::Bool(_)) | (Repr::Char, Value::Char(_))
    )
}

/// Whether every execution path through the statements ends in a return.
/// Only explicit returns and fully-returning if/else pairs count; loops
/// and switches are treated conservatively.
fn all_paths_return(stmts: &[Stmt]) -> bool {
    stmts.iter().any(|stmt| match &stmt.kind {
        StmtKind::Return(_) => true,
        StmtKind::IfElse {
            then_blk, else_blk, ..
        } => all_paths_return(then_blk) && all_paths_return(else_blk),
        _ => false,
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::bytecode::{Boxed, Prim};
    use crate::checker;
    use crate::lexer::Lexer;
    use crate::parser::Parser;

    fn compile(source: &str) -> Vec<CompiledMethod> {
        let tokens = Lexer::new(source).scan_tokens().expect("lexer error");
        let mut program = Parser::new(tokens).parse().expect("parse error");
        checker::check(&mut program).expect("type error");
        generate_program(&program).expect("codegen error")
    }

    fn method<'a>(methods: &'a [CompiledMethod], name: &str) -> &'a CompiledMethod {
        methods.iter().find(|m| m.name == name).expect("no such method")
    }

    #[test]
    fn test_simple_arithmetic() {
        let methods = compile("int f(int x) { return x + 1; }");
        assert_eq!(
            method(&methods, "f").code,
            vec![
                Instruction::Load(0),
                Instruction::Const(Constant::Int(1)),
                Instruction::Add,
                Instruction::Return(Some(Repr::Int)),
            ]
        );
    }

    #[test]
    fn test_parameters_occupy_low_registers() {
        let methods = compile("int f(int a, int b) { int c = a; return c + b; }");
        let m = method(&methods, "f");
        assert_eq!(m.register_count, 3);
        // c is the first local, so it stores into register 2.
        assert!(m.code.contains(&Instruction::Store(2)));
    }

    #[test]
    fn test_synthetic_void_return() {
        let methods = compile("void f() { }");
        assert_eq!(method(&methods, "f").code, vec![Instruction::Return(None)]);
    }

    #[test]
    fn test_no_duplicate_return_after_explicit() {
        let methods = compile("void f() { return; }");
        assert_eq!(method(&methods, "f").code, vec![Instruction::Return(None)]);
    }

    #[test]
    fn test_trailing_return_on_non_void_fall_off() {
        // The loop body returns, but the loop may run zero times, so
        // execution can still reach the end of the method.
        let methods = compile("int f(bool b) { while (b) { return 1; } }");
        let last = method(&methods, "f")
            .code
            .iter()
            .rev()
            .find(|i| !matches!(i, Instruction::Mark(_)))
            .expect("empty method body");
        assert!(matches!(last, Instruction::Return(_)));
    }

    #[test]
    fn test_clone_on_container_store() {
        let methods = compile("void f(int[] a) { int[] b = a; }");
        assert!(method(&methods, "f").code.contains(&Instruction::Clone));
    }

    #[test]
    fn test_no_clone_on_scalar_store() {
        let methods = compile("void f(int a) { int b = a; }");
        assert!(!method(&methods, "f").code.contains(&Instruction::Clone));
    }

    #[test]
    fn test_clone_on_index_store() {
        let methods = compile("void f(int[][] a, int[] b) { a[0] = b; }");
        assert!(method(&methods, "f").code.contains(&Instruction::Clone));
    }

    #[test]
    fn test_clone_on_call_argument() {
        let methods = compile(
            "int g(int[] xs) { return |xs|; }\n\
             int f(int[] a) { return g(a); }",
        );
        assert!(method(&methods, "f").code.contains(&Instruction::Clone));
    }

    #[test]
    fn test_read_conversion_on_array_read() {
        let methods = compile("int f(int[] a) { return a[0]; }");
        let code = &method(&methods, "f").code;
        let cast = code
            .iter()
            .position(|i| *i == Instruction::CheckCast(Boxed::Int))
            .expect("no CheckCast");
        assert_eq!(code[cast + 1], Instruction::Unbox(Prim::Int));
    }

    #[test]
    fn test_box_on_union_store() {
        let methods = compile("type t is int|null;\nvoid f() { t v = 1; }");
        assert!(method(&methods, "f")
            .code
            .contains(&Instruction::Box(Prim::Int)));
    }

    #[test]
    fn test_string_literal_is_char_code_array() {
        let methods = compile("void f() { print \"hi\"; }");
        let code = &method(&methods, "f").code;
        assert!(code.contains(&Instruction::Const(Constant::Int('h' as i32))));
        assert!(code.contains(&Instruction::Const(Constant::Int('i' as i32))));
        assert!(code.contains(&Instruction::NewArray(2)));
        assert!(code.contains(&Instruction::Print(Repr::Array)));
    }

    #[test]
    fn test_assert_lowering() {
        let methods = compile("void f(bool b) { assert b; }");
        let code = &method(&methods, "f").code;
        let branch = code
            .iter()
            .position(|i| matches!(i, Instruction::BranchIfTrue(_)))
            .expect("no branch");
        assert_eq!(code[branch + 1], Instruction::Fail);
    }

    #[test]
    fn test_short_circuit_and() {
        let methods = compile(
            "bool g(bool x) { return x; }\n\
             bool f(bool a) { return a && g(a); }",
        );
        let code = &method(&methods, "f").code;
        // The false path bypasses the call to g entirely.
        let branch = code
            .iter()
            .position(|i| matches!(i, Instruction::BranchIfTrue(_)))
            .expect("no branch");
        assert_eq!(code[branch + 1], Instruction::Const(Constant::Bool(false)));
        assert!(code.iter().any(|i| matches!(i, Instruction::Invoke { .. })));
    }

    #[test]
    fn test_short_circuit_or() {
        let methods = compile(
            "bool g(bool x) { return x; }\n\
             bool f(bool a) { return a || g(a); }",
        );
        let code = &method(&methods, "f").code;
        // The true path bypasses the call to g.
        assert!(code.contains(&Instruction::Const(Constant::Bool(true))));
        let branch = code
            .iter()
            .position(|i| matches!(i, Instruction::BranchIfTrue(_)))
            .expect("no branch");
        assert!(code[branch + 1..]
            .iter()
            .any(|i| matches!(i, Instruction::Invoke { .. })));
    }

    #[test]
    fn test_goto_elision_when_both_branches_return() {
        let methods = compile(
            "int f(bool b) {\n\
                 if (b) { return 1; } else { return 2; }\n\
             }",
        );
        let code = &method(&methods, "f").code;
        assert!(!code.iter().any(|i| matches!(i, Instruction::Goto(_))));
    }

    #[test]
    fn test_switch_fallthrough_order() {
        let methods = compile(
            "void f(int x) {\n\
                 switch (x) {\n\
                     case 1: print 10;\n\
                     case 2: print 20;\n\
                     default: print 30;\n\
                 }\n\
             }",
        );
        let code = &method(&methods, "f").code;
        // Bodies appear in source order with no jumps between them, so
        // the only Goto is the dispatch to the default arm.
        let gotos = code
            .iter()
            .filter(|i| matches!(i, Instruction::Goto(_)))
            .count();
        assert_eq!(gotos, 1);
        let prints: Vec<_> = code
            .iter()
            .enumerate()
            .filter(|(_, i)| matches!(i, Instruction::Print(_)))
            .map(|(pos, _)| pos)
            .collect();
        assert_eq!(prints.len(), 3);
        assert!(prints[0] < prints[1] && prints[1] < prints[2]);
    }

    #[test]
    fn test_default_dispatches_from_its_source_position() {
        // With the default arm first, a matching subject still enters
        // the default body (and falls through from there); the later
        // case test sits after the default's unconditional jump.
        let methods = compile(
            "void f(int x) {\n\
                 switch (x) {\n\
                     default: print 0;\n\
                     case 1: print 1;\n\
                 }\n\
             }",
        );
        let code = &method(&methods, "f").code;
        let goto = code
            .iter()
            .position(|i| matches!(i, Instruction::Goto(_)))
            .expect("no dispatch goto");
        let cmp = code
            .iter()
            .position(|i| matches!(i, Instruction::CmpBranch(_, _)))
            .expect("no case comparison");
        assert!(goto < cmp);
    }

    #[test]
    fn test_switch_without_default_dispatches_to_exit() {
        let methods = compile(
            "void f(int x) {\n\
                 switch (x) { case 1: print 1; }\n\
                 print 2;\n\
             }",
        );
        let code = &method(&methods, "f").code;
        // One test, then the fall-back jump to the exit mark.
        let cmp = code
            .iter()
            .position(|i| matches!(i, Instruction::CmpBranch(_, _)))
            .expect("no case comparison");
        assert!(matches!(code[cmp + 1], Instruction::Goto(_)));
    }

    #[test]
    fn test_continue_in_switch_targets_loop_head() {
        let methods = compile(
            "void f(int x) {\n\
                 while (x < 10) {\n\
                     switch (x) { case 1: continue; }\n\
                     x = x + 1;\n\
                 }\n\
             }",
        );
        let code = &method(&methods, "f").code;
        let Instruction::Mark(head) = code[0] else {
            panic!("loop does not start with its head mark");
        };
        let back_jumps = code
            .iter()
            .filter(|i| **i == Instruction::Goto(head))
            .count();
        // The loop's own back edge plus the continue.
        assert_eq!(back_jumps, 2);
    }

    #[test]
    fn test_break_targets_innermost_switch() {
        let methods = compile(
            "void f(int x) {\n\
                 while (x < 10) {\n\
                     switch (x) { case 1: break; }\n\
                     x = x + 1;\n\
                 }\n\
             }",
        );
        let code = &method(&methods, "f").code;
        let Instruction::Mark(head) = code[0] else {
            panic!("loop does not start with its head mark");
        };
        // break leaves the switch, not the loop: exactly one back edge.
        let back_jumps = code
            .iter()
            .filter(|i| **i == Instruction::Goto(head))
            .count();
        assert_eq!(back_jumps, 1);
    }

    #[test]
    fn test_collection_kind_mismatch_equality() {
        let methods = compile("bool f(int[] a, {int x} r) { return a == r; }");
        let code = &method(&methods, "f").code;
        let pops = code.iter().filter(|i| **i == Instruction::Pop).count();
        assert_eq!(pops, 2);
        assert!(code.contains(&Instruction::Const(Constant::Bool(false))));
        assert!(!code.contains(&Instruction::StructEq));
    }

    #[test]
    fn test_array_generator_lowering() {
        let methods = compile("void f() { int[] a = [0; 10]; }");
        let code = &method(&methods, "f").code;
        assert!(code.contains(&Instruction::ArrayAppend));
        assert!(code.iter().any(|i| matches!(i, Instruction::Inc(_, 1))));
        assert!(code.contains(&Instruction::NewArray(0)));
    }

    #[test]
    fn test_is_null_test() {
        let methods = compile(
            "type t is int|null;\n\
             bool f(t v) { return v is null; }",
        );
        let code = &method(&methods, "f").code;
        assert!(code.contains(&Instruction::Const(Constant::Null)));
        assert!(code.contains(&Instruction::StructEq));
    }

    #[test]
    fn test_is_kind_test_boxes_primitive() {
        let methods = compile("bool f(int x) { return x is int; }");
        let code = &method(&methods, "f").code;
        assert!(code.contains(&Instruction::Box(Prim::Int)));
        assert!(code.contains(&Instruction::TestKind(Boxed::Int)));
    }

    #[test]
    fn test_cast_out_of_union_reads_back() {
        let methods = compile(
            "type t is int|null;\n\
             int f(t v) { return (int) v; }",
        );
        let code = &method(&methods, "f").code;
        assert!(code.contains(&Instruction::CheckCast(Boxed::Int)));
        assert!(code.contains(&Instruction::Unbox(Prim::Int)));
    }

    #[test]
    fn test_labels_unique_across_methods() {
        let methods = compile(
            "void f(bool b) { if (b) { } }\n\
             void g(bool b) { if (b) { } }",
        );
        let labels = |m: &CompiledMethod| -> Vec<Label> {
            m.code
                .iter()
                .filter_map(|i| match i {
                    Instruction::Mark(l) => Some(*l),
                    _ => None,
                })
                .collect()
        };
        let f_labels = labels(method(&methods, "f"));
        let g_labels = labels(method(&methods, "g"));
        assert!(f_labels.iter().all(|l| !g_labels.contains(l)));
    }

    #[test]
    fn test_bare_invoke_pops_result() {
        let methods = compile(
            "int g() { return 1; }\n\
             void f() { g(); }",
        );
        assert!(method(&methods, "f").code.contains(&Instruction::Pop));
    }

    #[test]
    fn test_void_invoke_does_not_pop() {
        let methods = compile(
            "void g() { }\n\
             void f() { g(); }",
        );
        assert!(!method(&methods, "f").code.contains(&Instruction::Pop));
    }

    #[test]
    fn test_for_loop_shape() {
        let methods = compile(
            "int f() {\n\
                 int acc = 0;\n\
                 for (int i = 0; i < 3; i = i + 1) { acc = acc + i; }\n\
                 return acc;\n\
             }",
        );
        let code = &method(&methods, "f").code;
        // init store, then head mark, and one back edge to the head.
        let head = code
            .iter()
            .position(|i| matches!(i, Instruction::Mark(_)))
            .expect("no head mark");
        let Instruction::Mark(head_label) = code[head] else {
            unreachable!()
        };
        assert!(code.contains(&Instruction::Goto(head_label)));
    }
}
