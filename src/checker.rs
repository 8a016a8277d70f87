//! Type checker — annotates every expression with its resolved type.
//!
//! The code generator requires a fully type-annotated tree: value
//! representations, read conversions and cloning decisions are all driven
//! by the `ty` field on [`Expr`]. This pass walks each method bottom-up,
//! computes a type for every expression, and records it in place.
//!
//! The checker is deliberately permissive around unions: a value of a
//! union type may flow anywhere one of its members is accepted, and any
//! member may flow into the union. Narrowing is the programmer's job via
//! `is` tests and casts; what matters downstream is that the generator
//! can always tell a union-typed slot (boxed) from a concrete one.
//!
//! `string` is interchangeable with `int[]` throughout: string literals
//! lower to arrays of character codes, so the two denote one runtime type.

use crate::ast::{
    BinOp, Decl, Expr, ExprKind, MethodDecl, Program, Stmt, StmtKind, Type, UnaryOp, Value,
};
use crate::errors::TypeError;
use std::collections::{HashMap, HashSet};

pub fn check(program: &mut Program) -> Result<(), TypeError> {
    let mut checker = Checker::default();
    for decl in program.iter() {
        match decl {
            Decl::Type(td) => {
                checker.aliases.insert(td.name.clone(), td.ty.clone());
            }
            Decl::Method(md) => {
                let params = md.params.iter().map(|p| p.ty.clone()).collect();
                checker
                    .methods
                    .insert(md.name.clone(), (params, md.ret.clone()));
            }
        }
    }
    for decl in program.iter_mut() {
        if let Decl::Method(md) = decl {
            checker.check_method(md)?;
        }
    }
    Ok(())
}

#[derive(Default)]
struct Checker {
    aliases: HashMap<String, Type>,
    methods: HashMap<String, (Vec<Type>, Type)>,
}

type Env = HashMap<String, Type>;

impl Checker {
    fn check_method(&self, method: &mut MethodDecl) -> Result<(), TypeError> {
        let mut env: Env = method
            .params
            .iter()
            .map(|p| (p.name.clone(), p.ty.clone()))
            .collect();
        let ret = method.ret.clone();
        for stmt in &mut method.body {
            self.check_stmt(&mut env, &ret, stmt)?;
        }
        Ok(())
    }

    fn check_stmt(&self, env: &mut Env, ret: &Type, stmt: &mut Stmt) -> Result<(), TypeError> {
        let span = stmt.span;
        match &mut stmt.kind {
            StmtKind::VarDecl { ty, name, init } => {
                if let Some(init) = init {
                    let got = self.check_expr(env, init)?;
                    if !self.compatible(ty, &got) {
                        return Err(TypeError::new(
                            format!("cannot initialise '{}' ({}) with a value of type {}", name, ty, got),
                            init.span,
                        ));
                    }
                }
                env.insert(name.clone(), ty.clone());
                Ok(())
            }
            StmtKind::Assign { lhs, rhs } => {
                let target = self.check_expr(env, lhs)?;
                let got = self.check_expr(env, rhs)?;
                if !self.compatible(&target, &got) {
                    return Err(TypeError::new(
                        format!("cannot assign a value of type {} to a {} location", got, target),
                        rhs.span,
                    ));
                }
                Ok(())
            }
            StmtKind::IfElse {
                cond,
                then_blk,
                else_blk,
            } => {
                self.check_condition(env, cond)?;
                let mut then_env = env.clone();
                for s in then_blk {
                    self.check_stmt(&mut then_env, ret, s)?;
                }
                let mut else_env = env.clone();
                for s in else_blk {
                    self.check_stmt(&mut else_env, ret, s)?;
                }
                Ok(())
            }
            StmtKind::While { cond, body } => {
                self.check_condition(env, cond)?;
                let mut inner = env.clone();
                for s in body {
                    self.check_stmt(&mut inner, ret, s)?;
                }
                Ok(())
            }
            StmtKind::For {
                decl,
                cond,
                step,
                body,
            } => {
                let mut inner = env.clone();
                self.check_stmt(&mut inner, ret, decl)?;
                self.check_condition(&inner, cond)?;
                self.check_stmt(&mut inner, ret, step)?;
                for s in body {
                    self.check_stmt(&mut inner, ret, s)?;
                }
                Ok(())
            }
            StmtKind::Switch { subject, cases } => {
                self.check_expr(env, subject)?;
                for case in cases {
                    if let Some(guard) = &mut case.value {
                        self.check_expr(env, guard)?;
                    }
                    let mut inner = env.clone();
                    for s in &mut case.body {
                        self.check_stmt(&mut inner, ret, s)?;
                    }
                }
                Ok(())
            }
            StmtKind::Break | StmtKind::Continue => Ok(()),
            StmtKind::Return(value) => match value {
                Some(expr) => {
                    let got = self.check_expr(env, expr)?;
                    if matches!(self.resolve(ret), Type::Void) {
                        return Err(TypeError::new(
                            "void method cannot return a value",
                            expr.span,
                        ));
                    }
                    if !self.compatible(ret, &got) {
                        return Err(TypeError::new(
                            format!("returning {} from a method declared to return {}", got, ret),
                            expr.span,
                        ));
                    }
                    Ok(())
                }
                None => {
                    if !matches!(self.resolve(ret), Type::Void) {
                        return Err(TypeError::new(
                            format!("method must return a value of type {}", ret),
                            span,
                        ));
                    }
                    Ok(())
                }
            },
            StmtKind::Assert(expr) => self.check_condition(env, expr),
            StmtKind::Print(expr) => self.check_expr(env, expr).map(|_| ()),
            StmtKind::Invoke(expr) => self.check_expr(env, expr).map(|_| ()),
        }
    }

    fn check_condition(&self, env: &Env, cond: &mut Expr) -> Result<(), TypeError> {
        let got = self.check_expr(env, cond)?;
        if !self.compatible(&Type::Bool, &got) {
            return Err(TypeError::new(
                format!("condition must be bool, found {}", got),
                cond.span,
            ));
        }
        Ok(())
    }

    /// Compute and record the type of an expression.
    fn check_expr(&self, env: &Env, expr: &mut Expr) -> Result<Type, TypeError> {
        let span = expr.span;
        let ty = match &mut expr.kind {
            ExprKind::Literal(value) => type_of_value(value),
            ExprKind::Variable(name) => match env.get(name) {
                Some(t) => t.clone(),
                None => {
                    return Err(TypeError::new(
                        format!("variable '{}' is not in scope", name),
                        span,
                    ));
                }
            },
            ExprKind::Binary { op, lhs, rhs } => {
                let lt = self.check_expr(env, lhs)?;
                let rt = self.check_expr(env, rhs)?;
                match op {
                    BinOp::Add | BinOp::Sub | BinOp::Mul | BinOp::Div | BinOp::Rem => {
                        if !self.compatible(&Type::Int, &lt) || !self.compatible(&Type::Int, &rt) {
                            return Err(TypeError::new(
                                format!("arithmetic needs int operands, found {} and {}", lt, rt),
                                span,
                            ));
                        }
                        Type::Int
                    }
                    BinOp::And | BinOp::Or => {
                        if !self.compatible(&Type::Bool, &lt) || !self.compatible(&Type::Bool, &rt)
                        {
                            return Err(TypeError::new(
                                format!("logical operators need bool operands, found {} and {}", lt, rt),
                                span,
                            ));
                        }
                        Type::Bool
                    }
                    BinOp::Lt | BinOp::LtEq | BinOp::Gt | BinOp::GtEq => {
                        let ordered = |t: &Type| {
                            self.compatible(&Type::Int, t) || self.compatible(&Type::Char, t)
                        };
                        if !ordered(&lt) || !ordered(&rt) {
                            return Err(TypeError::new(
                                format!("comparison needs int or char operands, found {} and {}", lt, rt),
                                span,
                            ));
                        }
                        Type::Bool
                    }
                    BinOp::Eq | BinOp::Neq => Type::Bool,
                }
            }
            ExprKind::Unary { op, expr: operand } => {
                let ot = self.check_expr(env, operand)?;
                match op {
                    UnaryOp::Not => {
                        if !self.compatible(&Type::Bool, &ot) {
                            return Err(TypeError::new(
                                format!("'!' needs a bool operand, found {}", ot),
                                span,
                            ));
                        }
                        Type::Bool
                    }
                    UnaryOp::Neg => {
                        if !self.compatible(&Type::Int, &ot) {
                            return Err(TypeError::new(
                                format!("negation needs an int operand, found {}", ot),
                                span,
                            ));
                        }
                        Type::Int
                    }
                    UnaryOp::LengthOf => {
                        if self.element_type(&ot).is_none() {
                            return Err(TypeError::new(
                                format!("'|...|' needs an array operand, found {}", ot),
                                span,
                            ));
                        }
                        Type::Int
                    }
                }
            }
            ExprKind::IndexOf { src, index } => {
                let st = self.check_expr(env, src)?;
                let it = self.check_expr(env, index)?;
                if !self.compatible(&Type::Int, &it) {
                    return Err(TypeError::new(
                        format!("array index must be int, found {}", it),
                        index.span,
                    ));
                }
                match self.element_type(&st) {
                    Some(elem) => elem,
                    None => {
                        return Err(TypeError::new(
                            format!("cannot index into a value of type {}", st),
                            src.span,
                        ));
                    }
                }
            }
            ExprKind::FieldAccess { src, field } => {
                let st = self.check_expr(env, src)?;
                match self.field_type(&st, field) {
                    Some(t) => t,
                    None => {
                        return Err(TypeError::new(
                            format!("type {} has no field '{}'", st, field),
                            span,
                        ));
                    }
                }
            }
            ExprKind::RecordConstructor(fields) => {
                let mut field_types = Vec::with_capacity(fields.len());
                for (name, value) in fields.iter_mut() {
                    let t = self.check_expr(env, value)?;
                    field_types.push((t, name.clone()));
                }
                Type::Record(field_types)
            }
            ExprKind::ArrayInitialiser(elems) => {
                let mut elem_ty = Type::Void;
                for (i, e) in elems.iter_mut().enumerate() {
                    let t = self.check_expr(env, e)?;
                    if i == 0 {
                        elem_ty = t;
                    }
                }
                Type::Array(Box::new(elem_ty))
            }
            ExprKind::ArrayGenerator { value, size } => {
                let vt = self.check_expr(env, value)?;
                let st = self.check_expr(env, size)?;
                if !self.compatible(&Type::Int, &st) {
                    return Err(TypeError::new(
                        format!("array generator size must be int, found {}", st),
                        size.span,
                    ));
                }
                Type::Array(Box::new(vt))
            }
            ExprKind::Invoke { name, args } => {
                let (params, ret) = match self.methods.get(name) {
                    Some(sig) => sig.clone(),
                    None => {
                        return Err(TypeError::new(
                            format!("method '{}' is not declared", name),
                            span,
                        ));
                    }
                };
                for (arg, want) in args.iter_mut().zip(&params) {
                    let got = self.check_expr(env, arg)?;
                    if !self.compatible(want, &got) {
                        return Err(TypeError::new(
                            format!("argument of type {} where {} is expected", got, want),
                            arg.span,
                        ));
                    }
                }
                ret
            }
            ExprKind::Is { expr: operand, .. } => {
                self.check_expr(env, operand)?;
                Type::Bool
            }
            ExprKind::Cast { ty, expr: operand } => {
                self.check_expr(env, operand)?;
                ty.clone()
            }
        };
        expr.ty = Some(ty.clone());
        Ok(ty)
    }

    // ── Type relations ───────────────────────────────────────────────

    /// Resolve alias indirections at the top level only. Recursive
    /// aliases resolve one step at a time, so this always terminates.
    fn resolve(&self, ty: &Type) -> Type {
        let mut seen = HashSet::new();
        let mut current = ty.clone();
        while let Type::Named(name) = &current {
            if !seen.insert(name.clone()) {
                break;
            }
            match self.aliases.get(name) {
                Some(t) => current = t.clone(),
                None => break,
            }
        }
        current
    }

    /// May a value of type `got` occupy a location of type `want`?
    fn compatible(&self, want: &Type, got: &Type) -> bool {
        if want == got {
            return true;
        }
        let want = self.resolve(want);
        let got = self.resolve(got);
        if want == got {
            return true;
        }
        match (&want, &got) {
            // `void` as an element type means "unknown" (empty literal).
            (_, Type::Void) | (Type::Void, _) => true,
            (Type::Str, t) | (t, Type::Str) => {
                self.compatible(&Type::Array(Box::new(Type::Int)), t) || matches!(t, Type::Str)
            }
            (Type::Union(alts), g) => alts.iter().any(|a| self.compatible(a, g)),
            // Widening back out of a union is allowed; correctness of the
            // narrowing is the program's responsibility (via `is`/casts).
            (w, Type::Union(alts)) => alts.iter().any(|g| self.compatible(w, g)),
            (Type::Array(a), Type::Array(b)) => self.compatible(a, b),
            (Type::Record(a), Type::Record(b)) => {
                a.len() == b.len()
                    && a.iter().all(|(t, n)| {
                        b.iter().any(|(t2, n2)| n == n2 && self.compatible(t, t2))
                    })
            }
            _ => false,
        }
    }

    /// Element type of an array-like type, seeing through aliases,
    /// strings and unions of array types.
    fn element_type(&self, ty: &Type) -> Option<Type> {
        match self.resolve(ty) {
            Type::Array(elem) => Some(*elem),
            Type::Str => Some(Type::Int),
            Type::Union(alts) => alts.iter().find_map(|t| self.element_type(t)),
            _ => None,
        }
    }

    fn field_type(&self, ty: &Type, field: &str) -> Option<Type> {
        match self.resolve(ty) {
            Type::Record(fields) => fields
                .into_iter()
                .find(|(_, n)| n == field)
                .map(|(t, _)| t),
            Type::Union(alts) => alts.iter().find_map(|t| self.field_type(t, field)),
            _ => None,
        }
    }
}

fn type_of_value(value: &Value) -> Type {
    match value {
        Value::Null => Type::Null,
        Value::Bool(_) => Type::Bool,
        Value::Int(_) => Type::Int,
        Value::Char(_) => Type::Char,
        Value::Str(_) => Type::Str,
        Value::Array(elems) => {
            let elem = elems.first().map(type_of_value).unwrap_or(Type::Void);
            Type::Array(Box::new(elem))
        }
        Value::Record(fields) => Type::Record(
            fields
                .iter()
                .map(|(n, v)| (type_of_value(v), n.clone()))
                .collect(),
        ),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::lexer::Lexer;
    use crate::parser::Parser;

    fn parse(source: &str) -> Program {
        let tokens = Lexer::new(source).scan_tokens().expect("lexer error");
        Parser::new(tokens).parse().expect("parse error")
    }

    fn checked(source: &str) -> Program {
        let mut program = parse(source);
        check(&mut program).expect("type error");
        program
    }

    fn check_err(source: &str) -> TypeError {
        let mut program = parse(source);
        check(&mut program).expect_err("expected a type error")
    }

    fn assert_fully_annotated(expr: &Expr) {
        assert!(expr.ty.is_some(), "unannotated expression: {}", expr);
        match &expr.kind {
            ExprKind::Binary { lhs, rhs, .. } => {
                assert_fully_annotated(lhs);
                assert_fully_annotated(rhs);
            }
            ExprKind::Unary { expr, .. }
            | ExprKind::Is { expr, .. }
            | ExprKind::Cast { expr, .. } => assert_fully_annotated(expr),
            ExprKind::IndexOf { src, index } => {
                assert_fully_annotated(src);
                assert_fully_annotated(index);
            }
            ExprKind::FieldAccess { src, .. } => assert_fully_annotated(src),
            ExprKind::RecordConstructor(fields) => {
                fields.iter().for_each(|(_, e)| assert_fully_annotated(e))
            }
            ExprKind::ArrayInitialiser(elems) => elems.iter().for_each(assert_fully_annotated),
            ExprKind::ArrayGenerator { value, size } => {
                assert_fully_annotated(value);
                assert_fully_annotated(size);
            }
            ExprKind::Invoke { args, .. } => args.iter().for_each(assert_fully_annotated),
            ExprKind::Literal(_) | ExprKind::Variable(_) => {}
        }
    }

    #[test]
    fn test_every_expression_annotated() {
        let program = checked(
            "type point is {int x, int y};\n\
             int dist(point p, int[] road) {\n\
                 int acc = 0;\n\
                 for (int i = 0; i < |road|; i = i + 1) {\n\
                     acc = acc + road[i] * p.x;\n\
                 }\n\
                 return acc;\n\
             }",
        );
        for decl in &program {
            if let Decl::Method(m) = decl {
                for stmt in &m.body {
                    walk_stmt(stmt);
                }
            }
        }

        fn walk_stmt(stmt: &Stmt) {
            match &stmt.kind {
                StmtKind::VarDecl { init, .. } => {
                    if let Some(e) = init {
                        assert_fully_annotated(e);
                    }
                }
                StmtKind::Assign { lhs, rhs } => {
                    assert_fully_annotated(lhs);
                    assert_fully_annotated(rhs);
                }
                StmtKind::IfElse {
                    cond,
                    then_blk,
                    else_blk,
                } => {
                    assert_fully_annotated(cond);
                    then_blk.iter().for_each(walk_stmt);
                    else_blk.iter().for_each(walk_stmt);
                }
                StmtKind::While { cond, body } => {
                    assert_fully_annotated(cond);
                    body.iter().for_each(walk_stmt);
                }
                StmtKind::For {
                    decl,
                    cond,
                    step,
                    body,
                } => {
                    walk_stmt(decl);
                    assert_fully_annotated(cond);
                    walk_stmt(step);
                    body.iter().for_each(walk_stmt);
                }
                StmtKind::Switch { subject, cases } => {
                    assert_fully_annotated(subject);
                    for c in cases {
                        if let Some(g) = &c.value {
                            assert_fully_annotated(g);
                        }
                        c.body.iter().for_each(walk_stmt);
                    }
                }
                StmtKind::Return(Some(e))
                | StmtKind::Assert(e)
                | StmtKind::Print(e)
                | StmtKind::Invoke(e) => assert_fully_annotated(e),
                StmtKind::Return(None) | StmtKind::Break | StmtKind::Continue => {}
            }
        }
    }

    #[test]
    fn test_condition_must_be_bool() {
        let err = check_err("void f(int x) { if (x) { } }");
        assert!(err.message.contains("bool"));
    }

    #[test]
    fn test_arithmetic_rejects_bool() {
        check_err("int f(bool b) { return b + 1; }");
    }

    #[test]
    fn test_void_method_cannot_return_value() {
        check_err("void f() { return 1; }");
    }

    #[test]
    fn test_union_accepts_members() {
        checked(
            "type opt is int|null;\n\
             opt f(bool b) {\n\
                 if (b) { return 1; }\n\
                 return null;\n\
             }",
        );
    }

    #[test]
    fn test_union_member_extraction_via_cast() {
        checked(
            "type opt is int|null;\n\
             int f(opt v) {\n\
                 if (v is int) { return (int) v; }\n\
                 return 0;\n\
             }",
        );
    }

    #[test]
    fn test_string_interchangeable_with_int_array() {
        checked(
            "int first(int[] xs) { return xs[0]; }\n\
             int f() {\n\
                 string s = \"hi\";\n\
                 return first(s) + s[1];\n\
             }",
        );
    }

    #[test]
    fn test_record_field_order_insensitive() {
        checked(
            "type point is {int x, int y};\n\
             point f() { return {y: 2, x: 1}; }",
        );
    }

    #[test]
    fn test_unknown_field_rejected() {
        check_err(
            "type point is {int x, int y};\n\
             int f(point p) { return p.z; }",
        );
    }

    #[test]
    fn test_recursive_alias_field_access() {
        checked(
            "type list is null|{int data, list next};\n\
             int head(list l) {\n\
                 if (l is {int data, list next}) { return l.data; }\n\
                 return 0;\n\
             }",
        );
    }
}
