//! 运算符表与运算符解析
//!
//! 原始类型走内置表；其余类型查找 `[[operator(op)]]` 函数。
//! `>`、`>=`、`!=`、`<=` 由 `lt` / `eq` 合成，不能单独声明。

use serde::Serialize;

use crate::compiler::ast::{Annotation, AnnotationArg, BinaryOp, CompareOp, ExprId, UnaryOp};
use crate::compiler::types::{TypeId, TypeKind};
use crate::kit::SourceRange;

use super::{CalleeRef, OperatorImpl, Resolver};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize)]
pub enum OperatorKind {
    Add,
    Sub,
    Mul,
    Div,
    Mod,
    BitAnd,
    BitOr,
    BitXor,
    Shl,
    Shr,
    Neg,
    Not,
    BitNot,
    Eq,
    Lt,
    Hash,
}

impl OperatorKind {
    /// 按名字或符号解析
    pub fn parse(s: &str) -> Option<Self> {
        let op = match s {
            "add" | "+" => OperatorKind::Add,
            "sub" | "-" => OperatorKind::Sub,
            "mul" | "*" => OperatorKind::Mul,
            "div" | "/" => OperatorKind::Div,
            "mod" | "%" => OperatorKind::Mod,
            "band" | "&" => OperatorKind::BitAnd,
            "bor" | "|" => OperatorKind::BitOr,
            "bxor" | "^" => OperatorKind::BitXor,
            "shl" | "<<" => OperatorKind::Shl,
            "shr" | ">>" => OperatorKind::Shr,
            "neg" => OperatorKind::Neg,
            "not" | "!" => OperatorKind::Not,
            "bnot" | "~" => OperatorKind::BitNot,
            "eq" | "==" => OperatorKind::Eq,
            "lt" | "<" => OperatorKind::Lt,
            "hash" => OperatorKind::Hash,
            _ => return None,
        };
        Some(op)
    }

    pub fn from_binary(op: BinaryOp) -> Self {
        match op {
            BinaryOp::Add => OperatorKind::Add,
            BinaryOp::Sub => OperatorKind::Sub,
            BinaryOp::Mul => OperatorKind::Mul,
            BinaryOp::Div => OperatorKind::Div,
            BinaryOp::Mod => OperatorKind::Mod,
            BinaryOp::BitAnd => OperatorKind::BitAnd,
            BinaryOp::BitOr => OperatorKind::BitOr,
            BinaryOp::BitXor => OperatorKind::BitXor,
            BinaryOp::Shl => OperatorKind::Shl,
            BinaryOp::Shr => OperatorKind::Shr,
        }
    }

    pub fn from_unary(op: UnaryOp) -> Self {
        match op {
            UnaryOp::Neg => OperatorKind::Neg,
            UnaryOp::Not => OperatorKind::Not,
            UnaryOp::BitNot => OperatorKind::BitNot,
        }
    }

    pub fn is_unary(self) -> bool {
        matches!(
            self,
            OperatorKind::Neg | OperatorKind::Not | OperatorKind::BitNot | OperatorKind::Hash
        )
    }

    pub fn name(self) -> &'static str {
        match self {
            OperatorKind::Add => "add",
            OperatorKind::Sub => "sub",
            OperatorKind::Mul => "mul",
            OperatorKind::Div => "div",
            OperatorKind::Mod => "mod",
            OperatorKind::BitAnd => "band",
            OperatorKind::BitOr => "bor",
            OperatorKind::BitXor => "bxor",
            OperatorKind::Shl => "shl",
            OperatorKind::Shr => "shr",
            OperatorKind::Neg => "neg",
            OperatorKind::Not => "not",
            OperatorKind::BitNot => "bnot",
            OperatorKind::Eq => "eq",
            OperatorKind::Lt => "lt",
            OperatorKind::Hash => "hash",
        }
    }
}

/// 一个用户运算符
#[derive(Debug, Clone, PartialEq)]
pub struct OperatorEntry {
    pub op: OperatorKind,
    pub params: Vec<TypeId>,
    pub ret: TypeId,
    pub callee: CalleeRef,
    pub commutative: bool,
}

/// 映射键类型上声明的 `hash` 与 `eq`
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct KeyOperators {
    pub hash: CalleeRef,
    pub eq: CalleeRef,
}

/// 在运算符表中找 `hash(K): int` 与 `eq(K, K): bool`，两者都有才算数
pub fn key_operators<'e>(
    entries: impl IntoIterator<Item = &'e OperatorEntry>,
    key: TypeId,
) -> Option<KeyOperators> {
    let mut hash = None;
    let mut eq = None;
    for e in entries {
        match e.op {
            OperatorKind::Hash if e.params == [key] => hash = Some(e.callee),
            OperatorKind::Eq if e.params == [key, key] => eq = Some(e.callee),
            _ => {}
        }
    }
    Some(KeyOperators {
        hash: hash?,
        eq: eq?,
    })
}

/// 查找结果：被调函数、是否交换操作数、返回类型
#[derive(Debug, Clone, Copy)]
struct Found {
    callee: CalleeRef,
    swap: bool,
    ret: TypeId,
}

const SYNTHESIZED: &[&str] = &["ne", "!=", "gt", ">", "ge", ">=", "le", "<="];

impl<'a> Resolver<'a> {
    /// 校验 `[[operator(op[, commutative])]]` 并登记
    pub(super) fn register_operator(
        &mut self,
        annotation: &Annotation,
        params: &[TypeId],
        ret: TypeId,
        callee: CalleeRef,
    ) {
        let range = annotation.range;
        let name = match annotation.args.first() {
            Some(AnnotationArg::Ident(s)) | Some(AnnotationArg::Str(s)) => s.clone(),
            _ => {
                self.error(range, "operator annotation requires an operator name");
                return;
            }
        };
        if SYNTHESIZED.contains(&name.as_str()) {
            self.error(
                range,
                format!(
                    "operator '{}' is synthesized from 'lt' and 'eq' and cannot be declared",
                    name
                ),
            );
            return;
        }
        let Some(op) = OperatorKind::parse(&name) else {
            self.error(range, format!("unknown operator '{}'", name));
            return;
        };
        let mut commutative = false;
        for arg in &annotation.args[1..] {
            match arg {
                AnnotationArg::Ident(s) if s == "commutative" => commutative = true,
                _ => {
                    self.error(range, "unexpected operator annotation argument");
                    return;
                }
            }
        }

        let arity = if op.is_unary() { 1 } else { 2 };
        if params.len() != arity {
            self.error(
                range,
                format!(
                    "operator '{}' takes {} parameter(s), got {}",
                    op.name(),
                    arity,
                    params.len()
                ),
            );
            return;
        }
        if commutative && op.is_unary() {
            self.error(range, format!("unary operator '{}' cannot be commutative", op.name()));
            return;
        }
        if commutative && params[0] == params[1] {
            self.error(range, "commutative operator needs operands of different types");
            return;
        }
        match op {
            OperatorKind::Eq | OperatorKind::Lt if ret != TypeId::BOOL => {
                self.error(range, format!("operator '{}' must return bool", op.name()));
                return;
            }
            OperatorKind::Hash if ret != TypeId::INT => {
                self.error(range, "operator 'hash' must return int");
                return;
            }
            _ => {}
        }
        if params.iter().all(|p| self.types.is_primitive(*p)) {
            self.error(
                range,
                format!("cannot redefine operator '{}' for primitive types", op.name()),
            );
            return;
        }
        tracing::trace!(target: "smalls::resolver", op = op.name(), "registered operator");
        self.out.operators.push(OperatorEntry {
            op,
            params: params.to_vec(),
            ret,
            callee,
            commutative,
        });
    }

    // ===== 映射键 =====

    /// 声明收集完之后检查延后的映射键类型
    pub(super) fn check_pending_map_keys(&mut self) {
        let keys = std::mem::take(&mut self.map_keys);
        if keys.is_empty() {
            return;
        }
        let mut entries = self.env.operators();
        entries.extend(self.out.operators.iter().cloned());
        for (key, range) in keys {
            if self.key_is_hashable(key, &entries) {
                continue;
            }
            let name = self.type_name(key);
            let note = match self.wraps_object(key) {
                true => "map keys must not be object".to_string(),
                false => format!(
                    "declare [[operator(hash)]] and [[operator(eq)]] for {} to use it as a key",
                    name
                ),
            };
            self.error_with_notes(
                range,
                format!("type {} cannot be used as a map key", name),
                vec![note],
            );
        }
    }

    fn key_is_hashable(&self, key: TypeId, entries: &[OperatorEntry]) -> bool {
        match self.types.kind(key) {
            TypeKind::Int | TypeKind::Float | TypeKind::Bool | TypeKind::String => true,
            TypeKind::Any | TypeKind::Error => true,
            TypeKind::Object | TypeKind::Handle { .. } => false,
            TypeKind::Newtype(inner) => {
                let inner = *inner;
                self.key_is_hashable(inner, entries)
                    || (!self.wraps_object(inner) && key_operators(entries, key).is_some())
            }
            _ => key_operators(entries, key).is_some(),
        }
    }

    /// `object`、句柄类型以及包着它们的 newtype
    pub(super) fn wraps_object(&self, ty: TypeId) -> bool {
        match self.types.kind(ty) {
            TypeKind::Object | TypeKind::Handle { .. } => true,
            TypeKind::Newtype(inner) => self.wraps_object(*inner),
            _ => false,
        }
    }

    /// 查找匹配的用户运算符；多个匹配时报二义性错误并返回 Err
    fn find_operator(
        &mut self,
        op: OperatorKind,
        operands: &[TypeId],
        range: SourceRange,
    ) -> Result<Option<Found>, ()> {
        let mut entries = self.env.operators();
        entries.extend(self.out.operators.iter().cloned());

        let mut found: Vec<Found> = Vec::new();
        for e in entries.iter().filter(|e| e.op == op) {
            if e.params.as_slice() == operands {
                found.push(Found {
                    callee: e.callee,
                    swap: false,
                    ret: e.ret,
                });
            } else if e.commutative
                && operands.len() == 2
                && e.params[0] == operands[1]
                && e.params[1] == operands[0]
            {
                found.push(Found {
                    callee: e.callee,
                    swap: true,
                    ret: e.ret,
                });
            }
        }
        found.dedup_by(|a, b| a.callee == b.callee);
        match found.len() {
            0 => Ok(None),
            1 => Ok(found.pop()),
            _ => {
                let operand_names: Vec<String> = operands.iter().map(|t| self.type_name(*t)).collect();
                let notes = found
                    .iter()
                    .map(|f| {
                        format!(
                            "candidate: function #{} in module '{}'{}",
                            f.callee.index,
                            self.module_path_of(f.callee.module),
                            if f.swap { " (commutative)" } else { "" }
                        )
                    })
                    .collect();
                self.error_with_notes(
                    range,
                    format!(
                        "ambiguous operator '{}' for {}",
                        op.name(),
                        operand_names.join(" and ")
                    ),
                    notes,
                );
                Err(())
            }
        }
    }

    fn record_operator(&mut self, id: ExprId, imp: OperatorImpl) {
        self.body.info.operators.insert(id, imp);
    }

    pub(super) fn resolve_binary(
        &mut self,
        id: ExprId,
        op: BinaryOp,
        lhs: TypeId,
        rhs: TypeId,
        range: SourceRange,
    ) -> TypeId {
        if lhs.is_error() || rhs.is_error() {
            return TypeId::ERROR;
        }
        if lhs == rhs {
            let primitive = match (lhs, op) {
                (TypeId::INT, _) => Some(TypeId::INT),
                (
                    TypeId::FLOAT,
                    BinaryOp::Add | BinaryOp::Sub | BinaryOp::Mul | BinaryOp::Div | BinaryOp::Mod,
                ) => Some(TypeId::FLOAT),
                (TypeId::STRING, BinaryOp::Add) => Some(TypeId::STRING),
                _ => None,
            };
            if let Some(ty) = primitive {
                self.record_operator(id, OperatorImpl::Primitive);
                return ty;
            }
        }
        let kind = OperatorKind::from_binary(op);
        match self.find_operator(kind, &[lhs, rhs], range) {
            Ok(Some(f)) => {
                self.record_operator(
                    id,
                    OperatorImpl::Call {
                        callee: f.callee,
                        swap: f.swap,
                        negate: false,
                    },
                );
                self.add_dependency(f.callee.module);
                f.ret
            }
            Ok(None) => {
                let msg = format!(
                    "operator '{}' cannot be applied to {} and {}",
                    op.symbol(),
                    self.type_name(lhs),
                    self.type_name(rhs)
                );
                self.error(range, msg);
                TypeId::ERROR
            }
            Err(()) => TypeId::ERROR,
        }
    }

    pub(super) fn resolve_unary(
        &mut self,
        id: ExprId,
        op: UnaryOp,
        operand: TypeId,
        range: SourceRange,
    ) -> TypeId {
        if operand.is_error() {
            return TypeId::ERROR;
        }
        let primitive = match (op, operand) {
            (UnaryOp::Neg, TypeId::INT) | (UnaryOp::BitNot, TypeId::INT) => Some(TypeId::INT),
            (UnaryOp::Neg, TypeId::FLOAT) => Some(TypeId::FLOAT),
            (UnaryOp::Not, TypeId::BOOL) => Some(TypeId::BOOL),
            _ => None,
        };
        if let Some(ty) = primitive {
            self.record_operator(id, OperatorImpl::Primitive);
            return ty;
        }
        match self.find_operator(OperatorKind::from_unary(op), &[operand], range) {
            Ok(Some(f)) => {
                self.record_operator(
                    id,
                    OperatorImpl::Call {
                        callee: f.callee,
                        swap: false,
                        negate: false,
                    },
                );
                self.add_dependency(f.callee.module);
                f.ret
            }
            Ok(None) => {
                let sym = match op {
                    UnaryOp::Neg => "-",
                    UnaryOp::Not => "!",
                    UnaryOp::BitNot => "~",
                };
                let msg = format!(
                    "operator '{}' cannot be applied to {}",
                    sym,
                    self.type_name(operand)
                );
                self.error(range, msg);
                TypeId::ERROR
            }
            Err(()) => TypeId::ERROR,
        }
    }

    fn primitive_comparable(&self, ty: TypeId, op: CompareOp) -> bool {
        match self.types.kind(ty) {
            TypeKind::Int | TypeKind::Float | TypeKind::String => true,
            TypeKind::Bool | TypeKind::Object | TypeKind::Handle { .. } | TypeKind::Opaque => {
                matches!(op, CompareOp::Eq | CompareOp::Ne)
            }
            _ => false,
        }
    }

    fn structural_eq(&self, ty: TypeId) -> bool {
        matches!(
            self.types.kind(ty),
            TypeKind::Struct(_) | TypeKind::Sum(_) | TypeKind::Tuple(_)
        )
    }

    /// 比较运算的实现；失败时已报告错误并返回 None
    pub(super) fn comparison_impl(
        &mut self,
        op: CompareOp,
        lhs: TypeId,
        rhs: TypeId,
        range: SourceRange,
    ) -> Option<OperatorImpl> {
        if lhs == rhs && self.primitive_comparable(lhs, op) {
            return Some(OperatorImpl::Primitive);
        }
        let fail = |this: &mut Self| {
            let msg = format!(
                "operator '{}' cannot be applied to {} and {}",
                op.symbol(),
                this.type_name(lhs),
                this.type_name(rhs)
            );
            this.error(range, msg);
            None
        };
        match op {
            CompareOp::Eq | CompareOp::Ne => {
                let negate = op == CompareOp::Ne;
                match self.find_operator(OperatorKind::Eq, &[lhs, rhs], range) {
                    Ok(Some(f)) => Some(OperatorImpl::Call {
                        callee: f.callee,
                        swap: f.swap,
                        negate,
                    }),
                    Ok(None) if lhs == rhs && self.structural_eq(lhs) => {
                        Some(OperatorImpl::Structural { negate })
                    }
                    Ok(None) => fail(self),
                    Err(()) => None,
                }
            }
            CompareOp::Lt | CompareOp::Ge => {
                match self.find_operator(OperatorKind::Lt, &[lhs, rhs], range) {
                    Ok(Some(f)) => Some(OperatorImpl::Call {
                        callee: f.callee,
                        swap: f.swap,
                        negate: op == CompareOp::Ge,
                    }),
                    Ok(None) => fail(self),
                    Err(()) => None,
                }
            }
            CompareOp::Gt => match self.find_operator(OperatorKind::Lt, &[rhs, lhs], range) {
                Ok(Some(f)) => Some(OperatorImpl::Call {
                    callee: f.callee,
                    swap: !f.swap,
                    negate: false,
                }),
                Ok(None) => fail(self),
                Err(()) => None,
            },
            CompareOp::Le => {
                let lt = match self.find_operator(OperatorKind::Lt, &[lhs, rhs], range) {
                    Ok(Some(f)) => f,
                    Ok(None) => return fail(self),
                    Err(()) => return None,
                };
                let eq = match self.find_operator(OperatorKind::Eq, &[lhs, rhs], range) {
                    Ok(Some(f)) => f,
                    Ok(None) => {
                        let msg = format!(
                            "operator '<=' on {} requires both 'lt' and 'eq'",
                            self.type_name(lhs)
                        );
                        self.error(range, msg);
                        return None;
                    }
                    Err(()) => return None,
                };
                Some(OperatorImpl::LessOrEqual {
                    lt: lt.callee,
                    eq: eq.callee,
                    swap: lt.swap,
                })
            }
        }
    }

    pub(super) fn resolve_compare(
        &mut self,
        id: ExprId,
        op: CompareOp,
        lhs: TypeId,
        rhs: TypeId,
        range: SourceRange,
    ) -> TypeId {
        if lhs.is_error() || rhs.is_error() {
            return TypeId::BOOL;
        }
        if let Some(imp) = self.comparison_impl(op, lhs, rhs, range) {
            for callee in callees_of(&imp) {
                self.add_dependency(callee.module);
            }
            self.record_operator(id, imp);
        }
        TypeId::BOOL
    }
}

fn callees_of(imp: &OperatorImpl) -> Vec<CalleeRef> {
    match imp {
        OperatorImpl::Call { callee, .. } => vec![*callee],
        OperatorImpl::LessOrEqual { lt, eq, .. } => vec![*lt, *eq],
        _ => Vec::new(),
    }
}

#[cfg(test)]
mod tests {
    use super::super::test_env::{messages, resolve_source};
    use super::*;

    #[test]
    fn test_parse_names_and_symbols() {
        assert_eq!(OperatorKind::parse("add"), Some(OperatorKind::Add));
        assert_eq!(OperatorKind::parse("+"), Some(OperatorKind::Add));
        assert_eq!(OperatorKind::parse("bnot"), Some(OperatorKind::BitNot));
        assert_eq!(OperatorKind::parse("gt"), None);
        assert!(OperatorKind::Hash.is_unary());
    }

    const VEC: &str = "type V { x, y: int; }\n\
        [[operator(add)]] fn vadd(a: V, b: V): V { return { x = a.x + b.x, y = a.y + b.y }; }\n\
        [[operator(eq)]] fn veq(a: V, b: V): bool { return a.x == b.x && a.y == b.y; }\n\
        [[operator(lt)]] fn vlt(a: V, b: V): bool { return a.x < b.x; }\n";

    #[test]
    fn test_user_operators_and_synthesis() {
        let src = format!(
            "{}fn f(a: V, b: V): bool {{ var c = a + b; return c > a && a <= b && a != b && a >= b; }}",
            VEC
        );
        let (resolved, ctx, _) = resolve_source(&src);
        assert_eq!(ctx.errors(), 0, "{:?}", messages(&ctx));
        assert_eq!(resolved.operators.len(), 3);
        let info = &resolved.infos[resolved.functions[3].info as usize];
        assert!(info
            .operators
            .values()
            .any(|o| matches!(o, OperatorImpl::LessOrEqual { .. })));
        assert!(info
            .operators
            .values()
            .any(|o| matches!(o, OperatorImpl::Call { swap: true, negate: false, .. })));
    }

    #[test]
    fn test_synthesized_operator_cannot_be_declared() {
        let (_, ctx, _) = resolve_source(
            "type V { x: int; }\n[[operator(gt)]] fn g(a: V, b: V): bool { return true; }",
        );
        assert!(messages(&ctx).iter().any(|m| m.contains("synthesized")));
    }

    #[test]
    fn test_commutative_unary_rejected() {
        let (_, ctx, _) = resolve_source(
            "type V { x: int; }\n[[operator(neg, commutative)]] fn n(a: V): V { return a; }",
        );
        assert!(messages(&ctx).iter().any(|m| m.contains("cannot be commutative")));
    }

    #[test]
    fn test_ambiguous_commutative_operators() {
        let src = "type A { x: int; }\ntype B { y: int; }\n\
            [[operator(add, commutative)]] fn ab(a: A, b: B): int { return 1; }\n\
            [[operator(add, commutative)]] fn ba(b: B, a: A): int { return 2; }\n\
            fn f(a: A, b: B): int { return a + b; }";
        let (_, ctx, _) = resolve_source(src);
        assert!(messages(&ctx).iter().any(|m| m.contains("ambiguous operator")));
    }

    #[test]
    fn test_newtype_is_not_unwrapped() {
        let src = "type Meters(float);\nfn f(a: Meters, b: Meters): Meters { return a + b; }";
        let (_, ctx, _) = resolve_source(src);
        assert!(messages(&ctx)
            .iter()
            .any(|m| m.contains("operator '+' cannot be applied")));
    }

    #[test]
    fn test_less_or_equal_requires_eq() {
        let src = "type V { x: int; }\n\
            [[operator(lt)]] fn vlt(a: V, b: V): bool { return a.x < b.x; }\n\
            fn f(a: V, b: V): bool { return a <= b; }";
        let (_, ctx, _) = resolve_source(src);
        assert!(messages(&ctx)
            .iter()
            .any(|m| m.contains("requires both 'lt' and 'eq'")));
    }
}
