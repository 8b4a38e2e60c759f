//! 编译期常量求值
//!
//! 用于顶层 `const`、局部 `const`、`T[N]` 的长度以及等值 case 标签。

use std::collections::HashMap;
use std::rc::Rc;

use crate::compiler::ast::{
    Ast, BinaryOp, BraceInitKind, BraceKey, CompareOp, DeclId, DeclKind, ExprId, ExprKind,
    Literal, LogicalOp, UnaryOp,
};
use crate::compiler::types::{TypeId, TypeKind};
use crate::kit::SourceRange;

use super::{ModuleId, Resolver, ScopeEntry, Symbol};

#[derive(Debug, Clone, PartialEq)]
pub enum ConstValue {
    Int(i32),
    Float(f32),
    Bool(bool),
    String(String),
    Array { ty: TypeId, items: Vec<ConstValue> },
    Tuple { ty: TypeId, items: Vec<ConstValue> },
    Struct { ty: TypeId, fields: Vec<ConstValue> },
    Map {
        ty: TypeId,
        entries: Vec<(ConstValue, ConstValue)>,
    },
    Sum {
        ty: TypeId,
        tag: u32,
        payload: Option<Box<ConstValue>>,
    },
    Newtype { ty: TypeId, inner: Box<ConstValue> },
}

impl ConstValue {
    pub fn type_id(&self) -> TypeId {
        match self {
            ConstValue::Int(_) => TypeId::INT,
            ConstValue::Float(_) => TypeId::FLOAT,
            ConstValue::Bool(_) => TypeId::BOOL,
            ConstValue::String(_) => TypeId::STRING,
            ConstValue::Array { ty, .. }
            | ConstValue::Tuple { ty, .. }
            | ConstValue::Struct { ty, .. }
            | ConstValue::Map { ty, .. }
            | ConstValue::Sum { ty, .. }
            | ConstValue::Newtype { ty, .. } => *ty,
        }
    }

    pub fn as_int(&self) -> Option<i32> {
        match self {
            ConstValue::Int(v) => Some(*v),
            _ => None,
        }
    }

    fn display(&self) -> String {
        match self {
            ConstValue::Int(v) => v.to_string(),
            ConstValue::Float(v) => v.to_string(),
            ConstValue::Bool(v) => v.to_string(),
            ConstValue::String(s) => s.clone(),
            ConstValue::Newtype { inner, .. } => inner.display(),
            _ => String::from("<aggregate>"),
        }
    }
}

#[derive(Debug, Clone)]
pub(super) struct ConstError {
    pub range: SourceRange,
    pub message: String,
}

type ConstResult = Result<ConstValue, ConstError>;

fn not_const(range: SourceRange) -> ConstError {
    ConstError {
        range,
        message: "expression is not a compile-time constant".into(),
    }
}

fn fail(range: SourceRange, message: impl Into<String>) -> ConstError {
    ConstError {
        range,
        message: message.into(),
    }
}

/// 求值上下文：名字在哪个模块里查找，是否能看到函数体的局部常量
#[derive(Debug, Clone)]
pub(super) struct ConstScope {
    pub module: ModuleId,
    pub locals: bool,
    pub subst: HashMap<String, TypeId>,
}

impl ConstScope {
    pub fn top(module: ModuleId) -> Self {
        Self {
            module,
            locals: false,
            subst: HashMap::new(),
        }
    }
}

impl<'a> Resolver<'a> {
    /// 求值并在失败时报告
    pub(super) fn eval_const_reported(
        &mut self,
        id: ExprId,
        expected: Option<TypeId>,
        scope: &ConstScope,
        ast: &Rc<Ast>,
    ) -> Option<ConstValue> {
        match self.const_eval(id, expected, scope, ast) {
            Ok(v) => {
                if let Some(exp) = expected {
                    let got = v.type_id();
                    if got != exp && !exp.is_error() {
                        self.mismatch(ast.expr(id).range, exp, got);
                        return None;
                    }
                }
                Some(v)
            }
            Err(e) => {
                self.error(e.range, e.message);
                None
            }
        }
    }

    /// 当前函数体中的常量求值
    pub(super) fn eval_const_in_body(
        &mut self,
        id: ExprId,
        expected: Option<TypeId>,
    ) -> Option<ConstValue> {
        let scope = ConstScope {
            module: self.body.owner,
            locals: true,
            subst: self.body.subst.clone(),
        };
        let ast = self.body.ast.clone();
        self.eval_const_reported(id, expected, &scope, &ast)
    }

    /// 顶层常量，按需求值并写回符号表
    pub(super) fn evaluate_global_const(
        &mut self,
        decl: DeclId,
        index: usize,
    ) -> Option<(ConstValue, TypeId)> {
        let ast = self.ast.clone();
        let d = ast.decl(decl);
        let DeclKind::Var(var) = &d.kind else {
            return None;
        };
        let name = var.names.get(index)?.clone();
        if self.evaluating.contains(&decl) {
            self.error(
                name.range,
                format!("constant '{}' depends on itself", name.name),
            );
            return None;
        }
        self.evaluating.push(decl);
        let scope = ConstScope::top(self.module);
        let declared = var
            .ty
            .as_ref()
            .map(|t| self.resolve_type(t, self.module, &HashMap::new()));
        let result = if var.inits.len() == var.names.len() {
            self.eval_const_reported(var.inits[index], declared, &scope, &ast)
        } else if var.inits.len() == 1 {
            match self.const_eval(var.inits[0], None, &scope, &ast) {
                Ok(ConstValue::Tuple { items, .. }) if items.len() == var.names.len() => {
                    items.get(index).cloned()
                }
                Ok(_) => {
                    self.error(
                        d.range,
                        format!(
                            "cannot destructure initializer into {} constants",
                            var.names.len()
                        ),
                    );
                    None
                }
                Err(e) => {
                    self.error(e.range, e.message);
                    None
                }
            }
        } else {
            self.error(
                name.range,
                format!("constant '{}' requires an initializer", name.name),
            );
            None
        };
        self.evaluating.pop();

        let value = result?;
        let ty = value.type_id();
        self.out.symbols.insert(
            name.name.clone(),
            Symbol::Const {
                value: value.clone(),
                ty,
            },
        );
        Some((value, ty))
    }

    pub(super) fn const_eval(
        &mut self,
        id: ExprId,
        expected: Option<TypeId>,
        scope: &ConstScope,
        ast: &Rc<Ast>,
    ) -> ConstResult {
        let expr = ast.expr(id);
        let range = expr.range;
        match &expr.kind {
            ExprKind::Literal(lit) => Ok(match lit {
                Literal::Int(v) => ConstValue::Int(*v),
                Literal::Float(v) => ConstValue::Float(*v),
                Literal::Bool(v) => ConstValue::Bool(*v),
                Literal::String(s) => ConstValue::String(s.clone()),
            }),
            ExprKind::Grouping(inner) => self.const_eval(*inner, expected, scope, ast),
            ExprKind::Identifier(name) => self.const_name(name, range, expected, scope),
            ExprKind::Path { base, member } => {
                let base_id = ast.strip_grouping(*base);
                if let ExprKind::Identifier(base_name) = &ast.expr(base_id).kind {
                    if !self.shadowed_by_local(base_name, scope) {
                        match self.lookup_top(scope.module, base_name) {
                            Some((Symbol::Module(m), _)) => {
                                let sym = self.module_export(m, &member.name).ok_or_else(|| {
                                    fail(
                                        member.range,
                                        format!("module has no export '{}'", member.name),
                                    )
                                })?;
                                return self.const_symbol(sym, range, expected);
                            }
                            Some((Symbol::Type(ty), _)) => {
                                return self.const_variant_by_name(ty, &member.name, range);
                            }
                            _ => {}
                        }
                    }
                }
                let base_value = self.const_eval(*base, None, scope, ast)?;
                match &base_value {
                    ConstValue::Struct { ty, fields } => {
                        let idx = self
                            .types
                            .struct_def(*ty)
                            .and_then(|s| s.field_index(&member.name))
                            .ok_or_else(|| {
                                fail(member.range, format!("no field '{}'", member.name))
                            })?;
                        fields.get(idx).cloned().ok_or_else(|| not_const(range))
                    }
                    _ => Err(not_const(range)),
                }
            }
            ExprKind::Unary { op, operand } => {
                let v = self.const_eval(*operand, expected, scope, ast)?;
                match (op, v) {
                    (UnaryOp::Neg, ConstValue::Int(i)) => Ok(ConstValue::Int(i.wrapping_neg())),
                    (UnaryOp::Neg, ConstValue::Float(f)) => Ok(ConstValue::Float(-f)),
                    (UnaryOp::Not, ConstValue::Bool(b)) => Ok(ConstValue::Bool(!b)),
                    (UnaryOp::BitNot, ConstValue::Int(i)) => Ok(ConstValue::Int(!i)),
                    _ => Err(fail(range, "invalid operand for unary operator")),
                }
            }
            ExprKind::Binary { op, lhs, rhs } => {
                let l = self.const_eval(*lhs, None, scope, ast)?;
                let r = self.const_eval(*rhs, Some(l.type_id()), scope, ast)?;
                fold_binary(*op, l, r, range)
            }
            ExprKind::Logical { op, lhs, rhs } => {
                let l = self.const_eval(*lhs, Some(TypeId::BOOL), scope, ast)?;
                let ConstValue::Bool(lb) = l else {
                    return Err(fail(range, "logical operator requires bool operands"));
                };
                // 短路
                match (op, lb) {
                    (LogicalOp::And, false) => return Ok(ConstValue::Bool(false)),
                    (LogicalOp::Or, true) => return Ok(ConstValue::Bool(true)),
                    _ => {}
                }
                match self.const_eval(*rhs, Some(TypeId::BOOL), scope, ast)? {
                    ConstValue::Bool(rb) => Ok(ConstValue::Bool(rb)),
                    _ => Err(fail(range, "logical operator requires bool operands")),
                }
            }
            ExprKind::Comparison { op, lhs, rhs } => {
                let l = self.const_eval(*lhs, None, scope, ast)?;
                let r = self.const_eval(*rhs, Some(l.type_id()), scope, ast)?;
                fold_compare(*op, &l, &r, range)
            }
            ExprKind::Conditional {
                cond,
                then,
                otherwise,
            } => match self.const_eval(*cond, Some(TypeId::BOOL), scope, ast)? {
                ConstValue::Bool(true) => self.const_eval(*then, expected, scope, ast),
                ConstValue::Bool(false) => self.const_eval(*otherwise, expected, scope, ast),
                _ => Err(fail(range, "condition must be bool")),
            },
            ExprKind::Cast { expr: inner, ty } => {
                let target = self.resolve_type(ty, scope.module, &scope.subst);
                let v = self.const_eval(*inner, None, scope, ast)?;
                self.fold_cast(v, target, range)
            }
            ExprKind::TypeCheck { expr: inner, ty } => {
                let target = self.resolve_type(ty, scope.module, &scope.subst);
                let v = self.const_eval(*inner, None, scope, ast)?;
                Ok(ConstValue::Bool(v.type_id() == target))
            }
            ExprKind::Index { target, index } => {
                let t = self.const_eval(*target, None, scope, ast)?;
                let i = self.const_eval(*index, Some(TypeId::INT), scope, ast)?;
                let ConstValue::Int(i) = i else {
                    return Err(fail(range, "index must be int"));
                };
                match t {
                    ConstValue::Array { items, .. } | ConstValue::Tuple { items, .. } => {
                        if i < 0 || i as usize >= items.len() {
                            return Err(fail(
                                range,
                                format!("index {} out of bounds for length {}", i, items.len()),
                            ));
                        }
                        Ok(items[i as usize].clone())
                    }
                    _ => Err(not_const(range)),
                }
            }
            ExprKind::Tuple(items) => {
                let expected_items = expected
                    .and_then(|e| self.types.tuple_items(e).map(|s| s.to_vec()));
                let mut values = Vec::new();
                for (i, item) in items.iter().enumerate() {
                    let exp = expected_items.as_ref().and_then(|e| e.get(i).copied());
                    values.push(self.const_eval(*item, exp, scope, ast)?);
                }
                let ty = self
                    .types
                    .tuple_of(values.iter().map(|v| v.type_id()).collect());
                Ok(ConstValue::Tuple { ty, items: values })
            }
            ExprKind::BraceInit { ty, kind, items } => {
                let target = match ty {
                    Some(t) => Some(self.resolve_type(t, scope.module, &scope.subst)),
                    None => expected,
                };
                self.const_brace(target, *kind, items, range, scope, ast)
            }
            ExprKind::Call { callee, args } => {
                let callee_id = ast.strip_grouping(*callee);
                let sym = match &ast.expr(callee_id).kind {
                    ExprKind::Identifier(name) if !self.shadowed_by_local(name, scope) => {
                        self.lookup_top(scope.module, name).map(|s| s.0)
                    }
                    _ => None,
                };
                match sym {
                    Some(Symbol::Variant { sum, index }) => {
                        self.const_variant(sum, index, args, range, scope, ast)
                    }
                    Some(Symbol::VariantTemplate { .. }) => match expected {
                        Some(exp) if self.types.sum_def(exp).is_some() => {
                            let ExprKind::Identifier(name) = &ast.expr(callee_id).kind else {
                                return Err(not_const(range));
                            };
                            let idx = self
                                .types
                                .sum_def(exp)
                                .and_then(|s| s.variant_index(name))
                                .ok_or_else(|| not_const(range))?;
                            self.const_variant(exp, idx as u32, args, range, scope, ast)
                        }
                        _ => Err(fail(range, "cannot infer type arguments for variant")),
                    },
                    Some(Symbol::Type(ty)) if self.types.newtype_inner(ty).is_some() => {
                        let inner_ty = self.types.newtype_inner(ty);
                        if args.len() != 1 {
                            return Err(fail(range, "newtype constructor takes one argument"));
                        }
                        let v = self.const_eval(args[0], inner_ty, scope, ast)?;
                        Ok(ConstValue::Newtype {
                            ty,
                            inner: Box::new(v),
                        })
                    }
                    _ => Err(not_const(range)),
                }
            }
            _ => Err(not_const(range)),
        }
    }

    fn shadowed_by_local(&self, name: &str, scope: &ConstScope) -> bool {
        scope.locals
            && self
                .body
                .scopes
                .iter()
                .rev()
                .any(|s| s.contains_key(name))
    }

    fn const_name(
        &mut self,
        name: &str,
        range: SourceRange,
        expected: Option<TypeId>,
        scope: &ConstScope,
    ) -> ConstResult {
        if scope.locals {
            for s in self.body.scopes.iter().rev() {
                match s.get(name) {
                    Some(ScopeEntry::Const(v, _)) => return Ok(v.clone()),
                    Some(ScopeEntry::Local(_)) => return Err(not_const(range)),
                    None => {}
                }
            }
        }
        let sym = self
            .lookup_top(scope.module, name)
            .map(|s| s.0)
            .ok_or_else(|| fail(range, format!("unknown identifier '{}'", name)))?;
        self.const_symbol(sym, range, expected)
    }

    fn const_symbol(
        &mut self,
        sym: Symbol,
        range: SourceRange,
        expected: Option<TypeId>,
    ) -> ConstResult {
        match sym {
            Symbol::Const { value, .. } => Ok(value),
            Symbol::PendingConst { decl, index } => self
                .evaluate_global_const(decl, index)
                .map(|(v, _)| v)
                .ok_or_else(|| not_const(range)),
            Symbol::Variant { sum, index } => {
                let has_payload = self
                    .types
                    .sum_def(sum)
                    .and_then(|s| s.variants.get(index as usize))
                    .map(|v| v.payload.is_some())
                    .unwrap_or(false);
                if has_payload {
                    return Err(fail(range, "variant requires a payload"));
                }
                Ok(ConstValue::Sum {
                    ty: sum,
                    tag: index,
                    payload: None,
                })
            }
            Symbol::VariantTemplate { index, .. } => match expected {
                Some(exp) if self.types.sum_def(exp).is_some() => Ok(ConstValue::Sum {
                    ty: exp,
                    tag: index,
                    payload: None,
                }),
                _ => Err(fail(range, "cannot infer type arguments for variant")),
            },
            _ => Err(not_const(range)),
        }
    }

    fn const_variant_by_name(&mut self, sum: TypeId, name: &str, range: SourceRange) -> ConstResult {
        let idx = self
            .types
            .sum_def(sum)
            .and_then(|s| s.variant_index(name))
            .ok_or_else(|| fail(range, format!("no variant '{}'", name)))?;
        self.const_symbol(
            Symbol::Variant {
                sum,
                index: idx as u32,
            },
            range,
            None,
        )
    }

    fn const_variant(
        &mut self,
        sum: TypeId,
        index: u32,
        args: &[ExprId],
        range: SourceRange,
        scope: &ConstScope,
        ast: &Rc<Ast>,
    ) -> ConstResult {
        let payload_ty = self
            .types
            .sum_def(sum)
            .and_then(|s| s.variants.get(index as usize))
            .and_then(|v| v.payload);
        let Some(payload_ty) = payload_ty else {
            return Err(fail(range, "variant takes no payload"));
        };
        let payload = if args.len() == 1 {
            self.const_eval(args[0], Some(payload_ty), scope, ast)?
        } else {
            let item_types = self
                .types
                .tuple_items(payload_ty)
                .map(|s| s.to_vec())
                .unwrap_or_default();
            let mut items = Vec::new();
            for (i, a) in args.iter().enumerate() {
                items.push(self.const_eval(*a, item_types.get(i).copied(), scope, ast)?);
            }
            ConstValue::Tuple {
                ty: payload_ty,
                items,
            }
        };
        Ok(ConstValue::Sum {
            ty: sum,
            tag: index,
            payload: Some(Box::new(payload)),
        })
    }

    fn const_brace(
        &mut self,
        target: Option<TypeId>,
        kind: BraceInitKind,
        items: &[crate::compiler::ast::BraceItem],
        range: SourceRange,
        scope: &ConstScope,
        ast: &Rc<Ast>,
    ) -> ConstResult {
        let Some(target) = target else {
            // 无目标类型：按首元素推断数组
            if kind == BraceInitKind::List && !items.is_empty() {
                let first = self.const_eval(items[0].value, None, scope, ast)?;
                let elem = first.type_id();
                let mut values = vec![first];
                for item in &items[1..] {
                    values.push(self.const_eval(item.value, Some(elem), scope, ast)?);
                }
                let ty = self.types.array_of(elem);
                return Ok(ConstValue::Array { ty, items: values });
            }
            return Err(fail(range, "cannot infer the type of this initializer"));
        };
        match self.types.kind(target).clone() {
            TypeKind::Struct(def) => {
                let mut fields: Vec<Option<ConstValue>> = vec![None; def.fields.len()];
                for (pos, item) in items.iter().enumerate() {
                    let idx = match &item.key {
                        Some(BraceKey::Field(f)) => def.field_index(&f.name).ok_or_else(|| {
                            fail(f.range, format!("no field '{}'", f.name))
                        })?,
                        _ => pos,
                    };
                    let Some(field) = def.fields.get(idx) else {
                        return Err(fail(range, "too many initializers"));
                    };
                    fields[idx] = Some(self.const_eval(item.value, Some(field.ty), scope, ast)?);
                }
                let mut out = Vec::new();
                for (i, f) in fields.into_iter().enumerate() {
                    match f {
                        Some(v) => out.push(v),
                        None => out.push(self.zero_const(def.fields[i].ty, range)?),
                    }
                }
                Ok(ConstValue::Struct {
                    ty: target,
                    fields: out,
                })
            }
            TypeKind::Array(elem) => {
                let mut values = Vec::new();
                for item in items {
                    values.push(self.const_eval(item.value, Some(elem), scope, ast)?);
                }
                Ok(ConstValue::Array {
                    ty: target,
                    items: values,
                })
            }
            TypeKind::FixedArray { elem, len } => {
                if items.len() > len as usize {
                    return Err(fail(range, "too many initializers for fixed array"));
                }
                let mut values = Vec::new();
                for item in items {
                    values.push(self.const_eval(item.value, Some(elem), scope, ast)?);
                }
                while values.len() < len as usize {
                    values.push(self.zero_const(elem, range)?);
                }
                Ok(ConstValue::Array {
                    ty: target,
                    items: values,
                })
            }
            TypeKind::Map { key, value } => {
                let mut entries = Vec::new();
                for item in items {
                    let Some(BraceKey::Expr(k)) = &item.key else {
                        return Err(fail(range, "map initializer needs 'key: value' items"));
                    };
                    let kv = self.const_eval(*k, Some(key), scope, ast)?;
                    let vv = self.const_eval(item.value, Some(value), scope, ast)?;
                    entries.push((kv, vv));
                }
                Ok(ConstValue::Map {
                    ty: target,
                    entries,
                })
            }
            TypeKind::Tuple(item_types) => {
                if items.len() != item_types.len() {
                    return Err(fail(range, "tuple initializer arity mismatch"));
                }
                let mut values = Vec::new();
                for (item, ty) in items.iter().zip(item_types) {
                    values.push(self.const_eval(item.value, Some(ty), scope, ast)?);
                }
                Ok(ConstValue::Tuple {
                    ty: target,
                    items: values,
                })
            }
            _ => Err(not_const(range)),
        }
    }

    /// 类型的零值
    pub(super) fn zero_const(&mut self, ty: TypeId, range: SourceRange) -> ConstResult {
        match self.types.kind(ty).clone() {
            TypeKind::Int => Ok(ConstValue::Int(0)),
            TypeKind::Float => Ok(ConstValue::Float(0.0)),
            TypeKind::Bool => Ok(ConstValue::Bool(false)),
            TypeKind::String => Ok(ConstValue::String(String::new())),
            TypeKind::Array(_) => Ok(ConstValue::Array {
                ty,
                items: Vec::new(),
            }),
            TypeKind::Map { .. } => Ok(ConstValue::Map {
                ty,
                entries: Vec::new(),
            }),
            TypeKind::Struct(def) => {
                let mut fields = Vec::new();
                for f in def.fields {
                    fields.push(self.zero_const(f.ty, range)?);
                }
                Ok(ConstValue::Struct { ty, fields })
            }
            TypeKind::Tuple(items) => {
                let mut values = Vec::new();
                for t in items {
                    values.push(self.zero_const(t, range)?);
                }
                Ok(ConstValue::Tuple { ty, items: values })
            }
            TypeKind::FixedArray { elem, len } => {
                let mut values = Vec::new();
                for _ in 0..len {
                    values.push(self.zero_const(elem, range)?);
                }
                Ok(ConstValue::Array { ty, items: values })
            }
            TypeKind::Newtype(inner) => Ok(ConstValue::Newtype {
                ty,
                inner: Box::new(self.zero_const(inner, range)?),
            }),
            _ => Err(fail(
                range,
                format!("type {} has no constant zero value", self.types.name(ty)),
            )),
        }
    }

    fn fold_cast(&mut self, v: ConstValue, target: TypeId, range: SourceRange) -> ConstResult {
        if v.type_id() == target {
            return Ok(v);
        }
        if let Some(inner) = self.types.newtype_inner(target) {
            if v.type_id() == inner {
                return Ok(ConstValue::Newtype {
                    ty: target,
                    inner: Box::new(v),
                });
            }
        }
        match (v, target) {
            (ConstValue::Int(i), TypeId::FLOAT) => Ok(ConstValue::Float(i as f32)),
            (ConstValue::Float(f), TypeId::INT) => {
                if !f.is_finite() {
                    return Err(fail(range, "invalid cast of non-finite float to int"));
                }
                Ok(ConstValue::Int(f as i32))
            }
            (ConstValue::Newtype { inner, .. }, t) if inner.type_id() == t => Ok(*inner),
            (v @ (ConstValue::Int(_) | ConstValue::Float(_) | ConstValue::Bool(_)), TypeId::STRING) => {
                Ok(ConstValue::String(v.display()))
            }
            (v, t) => Err(fail(
                range,
                format!(
                    "invalid cast from {} to {}",
                    self.types.name(v.type_id()),
                    self.types.name(t)
                ),
            )),
        }
    }
}

fn fold_binary(op: BinaryOp, l: ConstValue, r: ConstValue, range: SourceRange) -> ConstResult {
    use ConstValue::*;
    match (l, r) {
        (Int(a), Int(b)) => {
            let v = match op {
                BinaryOp::Add => a.wrapping_add(b),
                BinaryOp::Sub => a.wrapping_sub(b),
                BinaryOp::Mul => a.wrapping_mul(b),
                BinaryOp::Div => {
                    if b == 0 {
                        return Err(fail(range, "division by zero in constant expression"));
                    }
                    a.wrapping_div(b)
                }
                BinaryOp::Mod => {
                    if b == 0 {
                        return Err(fail(range, "modulo by zero in constant expression"));
                    }
                    a.wrapping_rem(b)
                }
                BinaryOp::BitAnd => a & b,
                BinaryOp::BitOr => a | b,
                BinaryOp::BitXor => a ^ b,
                BinaryOp::Shl => a.wrapping_shl(b as u32),
                BinaryOp::Shr => a.wrapping_shr(b as u32),
            };
            Ok(Int(v))
        }
        (Float(a), Float(b)) => {
            let v = match op {
                BinaryOp::Add => a + b,
                BinaryOp::Sub => a - b,
                BinaryOp::Mul => a * b,
                BinaryOp::Div => {
                    if b == 0.0 {
                        return Err(fail(range, "division by zero in constant expression"));
                    }
                    a / b
                }
                BinaryOp::Mod => {
                    if b == 0.0 {
                        return Err(fail(range, "modulo by zero in constant expression"));
                    }
                    a % b
                }
                _ => return Err(fail(range, format!("operator '{}' requires int operands", op.symbol()))),
            };
            Ok(Float(v))
        }
        (String(a), String(b)) if op == BinaryOp::Add => Ok(String(a + &b)),
        (l, r) => Err(fail(
            range,
            format!(
                "operator '{}' cannot be applied to {} and {}",
                op.symbol(),
                const_kind(&l),
                const_kind(&r)
            ),
        )),
    }
}

fn fold_compare(op: CompareOp, l: &ConstValue, r: &ConstValue, range: SourceRange) -> ConstResult {
    use std::cmp::Ordering;
    if l.type_id() != r.type_id() {
        return Err(fail(range, "comparison operands must have the same type"));
    }
    let ord = match (l, r) {
        (ConstValue::Int(a), ConstValue::Int(b)) => a.partial_cmp(b),
        (ConstValue::Float(a), ConstValue::Float(b)) => a.partial_cmp(b),
        (ConstValue::String(a), ConstValue::String(b)) => a.partial_cmp(b),
        _ => None,
    };
    let v = match op {
        CompareOp::Eq => l == r,
        CompareOp::Ne => l != r,
        _ => {
            let Some(ord) = ord else {
                return Err(fail(range, "operands are not ordered"));
            };
            match op {
                CompareOp::Lt => ord == Ordering::Less,
                CompareOp::Le => ord != Ordering::Greater,
                CompareOp::Gt => ord == Ordering::Greater,
                CompareOp::Ge => ord != Ordering::Less,
                CompareOp::Eq | CompareOp::Ne => false,
            }
        }
    };
    Ok(ConstValue::Bool(v))
}

fn const_kind(v: &ConstValue) -> &'static str {
    match v {
        ConstValue::Int(_) => "int",
        ConstValue::Float(_) => "float",
        ConstValue::Bool(_) => "bool",
        ConstValue::String(_) => "string",
        _ => "aggregate",
    }
}

#[cfg(test)]
mod tests {
    use super::super::test_env::{messages, resolve_source};
    use super::super::Symbol;
    use super::*;

    fn const_of(source: &str, name: &str) -> ConstValue {
        let (resolved, ctx, _) = resolve_source(source);
        assert_eq!(ctx.errors(), 0, "{:?}", messages(&ctx));
        match resolved.symbols.get(name) {
            Some(Symbol::Const { value, .. }) => value.clone(),
            other => panic!("{} is not a constant: {:?}", name, other),
        }
    }

    #[test]
    fn test_arithmetic_and_forward_reference() {
        let v = const_of("const A = B * 2 + 1; const B = 20;", "A");
        assert_eq!(v, ConstValue::Int(41));
    }

    #[test]
    fn test_casts_and_comparisons() {
        assert_eq!(const_of("const F = 7 as float / 2.0;", "F"), ConstValue::Float(3.5));
        assert_eq!(const_of("const B = 3 < 4 && \"a\" != \"b\";", "B"), ConstValue::Bool(true));
        assert_eq!(const_of("const S = \"n=\" + 5 as string;", "S"), ConstValue::String("n=5".into()));
    }

    #[test]
    fn test_struct_and_array_constants() {
        let src = "type P { x, y: int; }\nconst ORIGIN: P = { x = 1 };\nconst X = ORIGIN.y;\nconst XS = {1, 2, 3};\nconst SECOND = XS[1];";
        assert_eq!(const_of(src, "X"), ConstValue::Int(0));
        assert_eq!(const_of(src, "SECOND"), ConstValue::Int(2));
    }

    #[test]
    fn test_division_by_zero_is_an_error() {
        let (_, ctx, _) = resolve_source("const X = 10 / 0;");
        assert_eq!(ctx.errors(), 1);
        assert!(messages(&ctx)[0].contains("division by zero"));
    }

    #[test]
    fn test_self_dependency_is_an_error() {
        let (_, ctx, _) = resolve_source("const A = A + 1;");
        assert!(messages(&ctx).iter().any(|m| m.contains("depends on itself")));
    }

    #[test]
    fn test_non_constant_initializer() {
        let (_, ctx, _) = resolve_source("fn f(): int { return 1; }\nconst X = f();");
        assert!(messages(&ctx)
            .iter()
            .any(|m| m.contains("not a compile-time constant")));
    }
}
