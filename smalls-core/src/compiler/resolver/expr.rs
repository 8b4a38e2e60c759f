//! 表达式类型检查
//!
//! 自底向上推导类型，写入当前函数体的 [`TypeInfo`](super::TypeInfo)。
//! `expected` 只用于向下传递上下文（空花括号、无载荷的泛型变体、元组字面量）。

use std::collections::HashMap;

use crate::compiler::ast::{
    BraceInitKind, BraceItem, BraceKey, ExprId, ExprKind, FStringPart, FnId, Ident, Literal,
    TypeExpr, TypeExprKind,
};
use crate::compiler::types::{TypeId, TypeKind};
use crate::kit::SourceRange;

use super::{
    Binding, CallKind, CalleeRef, Frame, FunctionInstance, InstanceKind, LocalId, LocalInfo,
    ModuleId, Resolver, ScopeEntry, SiteKey, Symbol, TypeCheckKind,
};

impl<'a> Resolver<'a> {
    fn set_type(&mut self, id: ExprId, ty: TypeId) -> TypeId {
        self.body.info.expr_types.insert(id, ty);
        ty
    }

    fn bind(&mut self, id: ExprId, binding: Binding) {
        self.body.info.bindings.insert(id, binding);
    }

    pub(super) fn assignable(&self, expected: TypeId, got: TypeId) -> bool {
        expected == got || expected.is_error() || got.is_error()
    }

    /// 检查并要求类型一致
    pub(super) fn check_expr_expect(&mut self, id: ExprId, expected: TypeId) -> TypeId {
        let got = self.check_expr(id, Some(expected));
        if !self.assignable(expected, got) {
            let range = self.body.ast.expr(id).range;
            self.mismatch(range, expected, got);
        }
        got
    }

    pub(super) fn current_instance(&self) -> u32 {
        self.body.frames.last().map(|f| f.instance).unwrap_or(0)
    }

    // ===== 局部变量 =====

    pub(super) fn push_scope(&mut self) {
        self.body.scopes.push(HashMap::new());
    }

    pub(super) fn pop_scope(&mut self) {
        self.body.scopes.pop();
    }

    pub(super) fn declare_local(
        &mut self,
        name: &Ident,
        ty: TypeId,
        mutable: bool,
        site: Option<SiteKey>,
    ) -> LocalId {
        let id = LocalId(self.body.info.locals.len() as u32);
        let function = self.current_instance();
        self.body.info.locals.push(LocalInfo {
            name: name.name.clone(),
            ty,
            function,
            captured: false,
            mutable,
        });
        if let Some(site) = site {
            self.body.info.sites.insert(site, id);
        }
        let duplicate = self
            .body
            .scopes
            .last()
            .map(|s| s.contains_key(&name.name))
            .unwrap_or(false);
        if duplicate {
            self.error(
                name.range,
                format!("'{}' is already declared in this scope", name.name),
            );
        }
        if let Some(scope) = self.body.scopes.last_mut() {
            scope.insert(name.name.clone(), ScopeEntry::Local(id));
        }
        id
    }

    pub(super) fn declare_local_const(
        &mut self,
        name: &Ident,
        value: super::ConstValue,
        ty: TypeId,
    ) {
        if let Some(scope) = self.body.scopes.last_mut() {
            scope.insert(name.name.clone(), ScopeEntry::Const(value, ty));
        }
    }

    fn lookup_local(&mut self, name: &str) -> Option<ScopeEntry> {
        let entry = self
            .body
            .scopes
            .iter()
            .rev()
            .find_map(|s| s.get(name).cloned())?;
        if let ScopeEntry::Local(id) = &entry {
            self.note_capture(*id);
        }
        Some(entry)
    }

    /// 外层函数的局部变量被闭包引用：沿闭包链登记 upvalue
    fn note_capture(&mut self, id: LocalId) {
        let owner = self.body.info.locals[id.0 as usize].function;
        let current = self.current_instance();
        if owner == current {
            return;
        }
        self.body.info.locals[id.0 as usize].captured = true;
        let chain: Vec<u32> = self
            .body
            .frames
            .iter()
            .rev()
            .map(|f| f.instance)
            .take_while(|i| *i != owner)
            .collect();
        for inst in chain {
            let caps = &mut self.out.functions[inst as usize].captures;
            if !caps.contains(&id) {
                caps.push(id);
            }
        }
    }

    fn is_local(&self, name: &str) -> bool {
        self.body.scopes.iter().rev().any(|s| s.contains_key(name))
    }

    fn warn_deprecated(&mut self, module: ModuleId, name: &str, range: SourceRange) {
        if self.is_deprecated(module, name) {
            self.warning(range, format!("'{}' is deprecated", name));
        }
    }

    /// 调用者位置上名字对应的顶层符号（局部变量优先，不在此处理）
    fn callee_symbol(&mut self, callee: ExprId) -> Option<(Symbol, String)> {
        let ast = self.body.ast.clone();
        let expr = ast.expr(callee);
        match &expr.kind {
            ExprKind::Identifier(name) if !self.is_local(name) => {
                let owner = self.body.owner;
                let (sym, m) = self.lookup_top(owner, name)?;
                self.warn_deprecated(m, name, expr.range);
                Some((sym, name.clone()))
            }
            ExprKind::Path { base, member } => {
                let base = ast.strip_grouping(*base);
                let ExprKind::Identifier(base_name) = &ast.expr(base).kind else {
                    return None;
                };
                if self.is_local(base_name) {
                    return None;
                }
                let owner = self.body.owner;
                match self.lookup_top(owner, base_name)? {
                    (Symbol::Module(m), _) => {
                        self.add_dependency(m);
                        let sym = self.module_export(m, &member.name)?;
                        self.warn_deprecated(m, &member.name, expr.range);
                        Some((sym, member.name.clone()))
                    }
                    _ => None,
                }
            }
            ExprKind::Grouping(inner) => self.callee_symbol(*inner),
            _ => None,
        }
    }

    // ===== 入口 =====

    pub(super) fn check_expr(&mut self, id: ExprId, expected: Option<TypeId>) -> TypeId {
        let ast = self.body.ast.clone();
        let expr = ast.expr(id);
        let range = expr.range;
        let ty = match &expr.kind {
            ExprKind::Literal(lit) => match lit {
                Literal::Int(_) => TypeId::INT,
                Literal::Float(_) => TypeId::FLOAT,
                Literal::Bool(_) => TypeId::BOOL,
                Literal::String(_) => TypeId::STRING,
            },
            ExprKind::Identifier(name) => self.check_identifier(id, name, range, expected),
            ExprKind::Path { base, member } => self.check_path(id, *base, member, range, expected),
            ExprKind::Binary { op, lhs, rhs } => {
                let lt = self.check_expr(*lhs, expected);
                let rt = self.check_expr(*rhs, Some(lt));
                self.resolve_binary(id, *op, lt, rt, range)
            }
            ExprKind::Logical { lhs, rhs, .. } => {
                self.check_expr_expect(*lhs, TypeId::BOOL);
                self.check_expr_expect(*rhs, TypeId::BOOL);
                TypeId::BOOL
            }
            ExprKind::Comparison { op, lhs, rhs } => {
                let lt = self.check_expr(*lhs, None);
                let rt = self.check_expr(*rhs, Some(lt));
                self.resolve_compare(id, *op, lt, rt, range)
            }
            ExprKind::Unary { op, operand } => {
                let t = self.check_expr(*operand, expected);
                self.resolve_unary(id, *op, t, range)
            }
            ExprKind::Conditional {
                cond,
                then,
                otherwise,
            } => {
                self.check_expr_expect(*cond, TypeId::BOOL);
                let t = self.check_expr(*then, expected);
                self.check_expr_expect(*otherwise, t);
                t
            }
            ExprKind::Assign { op, target, value } => {
                self.check_assign(id, *op, *target, *value, range);
                TypeId::VOID
            }
            ExprKind::Call { callee, args } => self.check_call(id, *callee, args, range, expected),
            ExprKind::Index { target, index } => self.check_index(*target, *index, range),
            ExprKind::Grouping(inner) => self.check_expr(*inner, expected),
            ExprKind::BraceInit { ty, kind, items } => {
                self.check_brace(ty.as_ref(), *kind, items, range, expected)
            }
            ExprKind::Tuple(items) => {
                let expected_items = expected
                    .and_then(|e| self.types.tuple_items(e).map(|s| s.to_vec()))
                    .filter(|e| e.len() == items.len());
                let mut types = Vec::new();
                for (i, item) in items.iter().enumerate() {
                    let exp = expected_items.as_ref().map(|e| e[i]);
                    let t = self.check_expr(*item, exp);
                    if t == TypeId::VOID {
                        self.error(ast.expr(*item).range, "void value in tuple");
                    }
                    types.push(t);
                }
                if types.iter().any(|t| t.is_error()) {
                    TypeId::ERROR
                } else {
                    self.types.tuple_of(types)
                }
            }
            ExprKind::FString(parts) => {
                for part in parts {
                    if let FStringPart::Expr(e) = part {
                        let t = self.check_expr(*e, None);
                        if t == TypeId::VOID {
                            self.error(ast.expr(*e).range, "cannot format a void value");
                        }
                    }
                }
                TypeId::STRING
            }
            ExprKind::Cast { expr: inner, ty } => self.check_cast(*inner, ty, range),
            ExprKind::TypeCheck { expr: inner, ty } => self.check_type_check(id, *inner, ty),
            ExprKind::Closure(fn_id) => self.check_closure(*fn_id),
            ExprKind::GenericInst { base, args } => self.check_generic_value(id, *base, args, range),
            ExprKind::Error => TypeId::ERROR,
        };
        self.set_type(id, ty)
    }

    // ===== 名字 =====

    fn check_identifier(
        &mut self,
        id: ExprId,
        name: &str,
        range: SourceRange,
        expected: Option<TypeId>,
    ) -> TypeId {
        match self.lookup_local(name) {
            Some(ScopeEntry::Local(local)) => {
                self.bind(id, Binding::Local(local));
                return self.body.info.locals[local.0 as usize].ty;
            }
            Some(ScopeEntry::Const(value, ty)) => {
                self.bind(id, Binding::Const(value));
                return ty;
            }
            None => {}
        }
        let owner = self.body.owner;
        let Some((sym, module)) = self.lookup_top(owner, name) else {
            self.error(range, format!("undefined name '{}'", name));
            return TypeId::ERROR;
        };
        self.warn_deprecated(module, name, range);
        self.symbol_value(id, sym, name, range, expected)
    }

    /// 顶层符号作为值使用
    fn symbol_value(
        &mut self,
        id: ExprId,
        sym: Symbol,
        name: &str,
        range: SourceRange,
        expected: Option<TypeId>,
    ) -> TypeId {
        match sym {
            Symbol::Function { callee, ty } => {
                self.add_dependency(callee.module);
                self.bind(id, Binding::Function(callee));
                ty
            }
            Symbol::Global { index, ty, .. } => match ty {
                Some(t) => {
                    self.bind(id, Binding::Global { index });
                    t
                }
                None => {
                    self.error(
                        range,
                        format!("global '{}' is used before its type is known", name),
                    );
                    TypeId::ERROR
                }
            },
            Symbol::Const { value, ty } => {
                self.bind(id, Binding::Const(value));
                ty
            }
            Symbol::PendingConst { decl, index } => match self.evaluate_global_const(decl, index) {
                Some((value, ty)) => {
                    self.bind(id, Binding::Const(value));
                    ty
                }
                None => TypeId::ERROR,
            },
            Symbol::Variant { sum, index } => self.variant_value(id, sum, index, name, range),
            Symbol::VariantTemplate { module, decl, index } => {
                match self.infer_variant_sum(module, decl, index, &[], expected, range) {
                    Some(sum) => self.variant_value(id, sum, index, name, range),
                    None => TypeId::ERROR,
                }
            }
            Symbol::Template { .. } => {
                self.error(
                    range,
                    format!(
                        "generic function '{}' needs explicit type arguments to be used as a value",
                        name
                    ),
                );
                TypeId::ERROR
            }
            Symbol::Native { .. } => {
                self.error(
                    range,
                    format!("native function '{}' cannot be used as a value", name),
                );
                TypeId::ERROR
            }
            Symbol::Type(_) | Symbol::TypeTemplate { .. } | Symbol::PendingAlias { .. } => {
                self.error(range, format!("'{}' is a type, not a value", name));
                TypeId::ERROR
            }
            Symbol::Module(_) => {
                self.error(range, format!("'{}' is a module, not a value", name));
                TypeId::ERROR
            }
        }
    }

    fn variant_value(
        &mut self,
        id: ExprId,
        sum: TypeId,
        tag: u32,
        name: &str,
        range: SourceRange,
    ) -> TypeId {
        let has_payload = self
            .types
            .sum_def(sum)
            .and_then(|s| s.variants.get(tag as usize))
            .map(|v| v.payload.is_some())
            .unwrap_or(false);
        if has_payload {
            self.error(range, format!("variant '{}' requires a payload", name));
            return TypeId::ERROR;
        }
        self.bind(id, Binding::Variant { sum, tag });
        sum
    }

    fn check_path(
        &mut self,
        id: ExprId,
        base: ExprId,
        member: &Ident,
        range: SourceRange,
        expected: Option<TypeId>,
    ) -> TypeId {
        let ast = self.body.ast.clone();
        let base_id = ast.strip_grouping(base);
        if let ExprKind::Identifier(base_name) = &ast.expr(base_id).kind {
            if !self.is_local(base_name) {
                let owner = self.body.owner;
                match self.lookup_top(owner, base_name) {
                    Some((Symbol::Module(m), _)) => {
                        self.add_dependency(m);
                        let Some(sym) = self.module_export(m, &member.name) else {
                            let path = self.module_path_of(m);
                            self.error(
                                member.range,
                                format!("module '{}' has no export '{}'", path, member.name),
                            );
                            return TypeId::ERROR;
                        };
                        self.warn_deprecated(m, &member.name, range);
                        return self.symbol_value(id, sym, &member.name, range, expected);
                    }
                    Some((Symbol::Type(t), _)) => {
                        let tag = self.types.sum_def(t).and_then(|s| s.variant_index(&member.name));
                        return match tag {
                            Some(tag) => self.variant_value(id, t, tag as u32, &member.name, range),
                            None => {
                                let msg = format!(
                                    "type {} has no variant '{}'",
                                    self.type_name(t),
                                    member.name
                                );
                                self.error(member.range, msg);
                                TypeId::ERROR
                            }
                        };
                    }
                    _ => {}
                }
            }
        }

        let bt = self.check_expr(base, None);
        if bt.is_error() {
            return TypeId::ERROR;
        }
        let field = self
            .types
            .struct_def(bt)
            .and_then(|s| s.field_index(&member.name).map(|i| (i, s.fields[i].ty)));
        match field {
            Some((index, ty)) => {
                self.bind(
                    id,
                    Binding::Field {
                        index: index as u32,
                    },
                );
                ty
            }
            None => {
                let msg = format!("type {} has no field '{}'", self.type_name(bt), member.name);
                self.error(member.range, msg);
                TypeId::ERROR
            }
        }
    }

    // ===== 赋值 =====

    fn check_assign(
        &mut self,
        id: ExprId,
        op: Option<crate::compiler::ast::BinaryOp>,
        target: ExprId,
        value: ExprId,
        range: SourceRange,
    ) {
        let ast = self.body.ast.clone();
        let target_id = ast.strip_grouping(target);
        if let ExprKind::Tuple(targets) = &ast.expr(target_id).kind {
            if op.is_some() {
                self.error(range, "compound assignment cannot destructure");
            }
            let types: Vec<TypeId> = targets.iter().map(|t| self.check_lvalue(*t)).collect();
            if types.iter().any(|t| t.is_error()) {
                self.check_expr(value, None);
                return;
            }
            let tuple = self.types.tuple_of(types);
            self.set_type(target_id, tuple);
            self.check_expr_expect(value, tuple);
            return;
        }

        let tt = self.check_lvalue(target);
        match op {
            None => {
                self.check_expr_expect(value, tt);
            }
            Some(op) => {
                let vt = self.check_expr(value, Some(tt));
                let result = self.resolve_binary(id, op, tt, vt, range);
                if !self.assignable(tt, result) {
                    self.mismatch(range, tt, result);
                }
            }
        }
    }

    /// 检查赋值目标，返回其类型
    fn check_lvalue(&mut self, target: ExprId) -> TypeId {
        let ast = self.body.ast.clone();
        let target = ast.strip_grouping(target);
        let expr = ast.expr(target);
        let ty = self.check_expr(target, None);
        if ty.is_error() {
            return ty;
        }
        match &expr.kind {
            ExprKind::Identifier(name) | ExprKind::Path { member: Ident { name, .. }, .. } => {
                match self.body.info.bindings.get(&target) {
                    Some(Binding::Local(l)) => {
                        if !self.body.info.locals[l.0 as usize].mutable {
                            self.error(expr.range, format!("cannot assign to '{}'", name));
                        }
                        ty
                    }
                    Some(Binding::Global { .. }) | Some(Binding::Field { .. }) => ty,
                    Some(Binding::Const(_)) => {
                        self.error(expr.range, format!("cannot assign to constant '{}'", name));
                        TypeId::ERROR
                    }
                    _ => {
                        self.error(expr.range, format!("cannot assign to '{}'", name));
                        TypeId::ERROR
                    }
                }
            }
            ExprKind::Index { target: base, .. } => {
                let bt = self.body.info.type_of(*base);
                if matches!(self.types.kind(bt), TypeKind::Tuple(_)) {
                    self.error(expr.range, "tuple elements cannot be assigned");
                    return TypeId::ERROR;
                }
                ty
            }
            _ => {
                self.error(expr.range, "invalid assignment target");
                TypeId::ERROR
            }
        }
    }

    // ===== 下标 =====

    fn check_index(&mut self, target: ExprId, index: ExprId, range: SourceRange) -> TypeId {
        let tt = self.check_expr(target, None);
        if tt.is_error() {
            self.check_expr(index, None);
            return TypeId::ERROR;
        }
        match self.types.kind(tt).clone() {
            TypeKind::Array(elem) | TypeKind::FixedArray { elem, .. } => {
                self.check_expr_expect(index, TypeId::INT);
                elem
            }
            TypeKind::Map { key, value } => {
                self.check_expr_expect(index, key);
                value
            }
            TypeKind::Tuple(items) => {
                let Some(v) = self.eval_const_in_body(index, Some(TypeId::INT)) else {
                    return TypeId::ERROR;
                };
                self.set_type(index, TypeId::INT);
                let i = v.as_int().unwrap_or(-1);
                if i < 0 || i as usize >= items.len() {
                    self.error(
                        range,
                        format!("tuple index {} out of range for {} elements", i, items.len()),
                    );
                    return TypeId::ERROR;
                }
                self.body.info.const_values.insert(index, v);
                items[i as usize]
            }
            _ => {
                self.check_expr(index, None);
                let msg = format!("type {} cannot be indexed", self.type_name(tt));
                self.error(range, msg);
                TypeId::ERROR
            }
        }
    }

    // ===== 花括号初始化 =====

    fn check_brace(
        &mut self,
        ty: Option<&TypeExpr>,
        kind: BraceInitKind,
        items: &[BraceItem],
        range: SourceRange,
        expected: Option<TypeId>,
    ) -> TypeId {
        let owner = self.body.owner;
        let target = match ty {
            Some(t) => {
                let subst = self.body.subst.clone();
                Some(self.resolve_type(t, owner, &subst))
            }
            None => expected.filter(|e| !matches!(*e, TypeId::ANY | TypeId::ANY_ARRAY | TypeId::ANY_MAP)),
        };
        let Some(target) = target else {
            return self.infer_brace(kind, items, range);
        };
        if target.is_error() {
            for item in items {
                self.check_expr(item.value, None);
            }
            return TypeId::ERROR;
        }

        match self.types.kind(target).clone() {
            TypeKind::Struct(def) => {
                match kind {
                    BraceInitKind::Field => {
                        let mut seen = Vec::new();
                        for item in items {
                            let Some(BraceKey::Field(f)) = &item.key else {
                                continue;
                            };
                            match def.field_index(&f.name) {
                                Some(i) => {
                                    if seen.contains(&i) {
                                        self.error(f.range, format!("field '{}' initialized twice", f.name));
                                    }
                                    seen.push(i);
                                    self.check_expr_expect(item.value, def.fields[i].ty);
                                }
                                None => {
                                    let msg = format!(
                                        "type {} has no field '{}'",
                                        self.type_name(target),
                                        f.name
                                    );
                                    self.error(f.range, msg);
                                    self.check_expr(item.value, None);
                                }
                            }
                        }
                    }
                    BraceInitKind::List => {
                        if items.len() > def.fields.len() {
                            self.error(range, "too many initializers");
                        }
                        for (i, item) in items.iter().enumerate() {
                            match def.fields.get(i) {
                                Some(f) => {
                                    self.check_expr_expect(item.value, f.ty);
                                }
                                None => {
                                    self.check_expr(item.value, None);
                                }
                            }
                        }
                    }
                    BraceInitKind::KeyValue => {
                        self.error(range, "struct initializer cannot use 'key: value' items");
                    }
                }
                target
            }
            TypeKind::Array(elem) => {
                self.expect_list(kind, range);
                for item in items {
                    self.check_expr_expect(item.value, elem);
                }
                target
            }
            TypeKind::FixedArray { elem, len } => {
                self.expect_list(kind, range);
                if items.len() > len as usize {
                    self.error(
                        range,
                        format!("too many initializers for {}", self.type_name(target)),
                    );
                }
                for item in items {
                    self.check_expr_expect(item.value, elem);
                }
                target
            }
            TypeKind::Map { key, value } => {
                if kind != BraceInitKind::KeyValue && !items.is_empty() {
                    self.error(range, "map initializer needs 'key: value' items");
                }
                for item in items {
                    if let Some(BraceKey::Expr(k)) = &item.key {
                        self.check_expr_expect(*k, key);
                    }
                    self.check_expr_expect(item.value, value);
                }
                target
            }
            TypeKind::Tuple(item_types) => {
                self.expect_list(kind, range);
                if items.len() != item_types.len() {
                    self.error(
                        range,
                        format!(
                            "tuple initializer expects {} values, got {}",
                            item_types.len(),
                            items.len()
                        ),
                    );
                }
                for (item, t) in items.iter().zip(item_types) {
                    self.check_expr_expect(item.value, t);
                }
                target
            }
            _ => {
                let msg = format!("type {} cannot be brace-initialized", self.type_name(target));
                self.error(range, msg);
                TypeId::ERROR
            }
        }
    }

    fn expect_list(&mut self, kind: BraceInitKind, range: SourceRange) {
        if kind != BraceInitKind::List {
            self.error(range, "expected a list initializer");
        }
    }

    /// 无类型的花括号：列表推断为数组，键值对推断为映射
    fn infer_brace(&mut self, kind: BraceInitKind, items: &[BraceItem], range: SourceRange) -> TypeId {
        if items.is_empty() || kind == BraceInitKind::Field {
            self.error(range, "cannot infer the type of this initializer");
            for item in items {
                self.check_expr(item.value, None);
            }
            return TypeId::ERROR;
        }
        match kind {
            BraceInitKind::KeyValue => {
                let (k0, v0) = match &items[0].key {
                    Some(BraceKey::Expr(k)) => {
                        let kt = self.check_expr(*k, None);
                        (kt, self.check_expr(items[0].value, None))
                    }
                    _ => return TypeId::ERROR,
                };
                for item in &items[1..] {
                    if let Some(BraceKey::Expr(k)) = &item.key {
                        self.check_expr_expect(*k, k0);
                    }
                    self.check_expr_expect(item.value, v0);
                }
                if k0.is_error() || v0.is_error() || !self.check_map_key(k0, range) {
                    return TypeId::ERROR;
                }
                self.types.map_of(k0, v0)
            }
            _ => {
                let first = self.check_expr(items[0].value, None);
                for item in &items[1..] {
                    self.check_expr_expect(item.value, first);
                }
                if first.is_error() {
                    return TypeId::ERROR;
                }
                if first == TypeId::VOID {
                    self.error(range, "array elements cannot be void");
                    return TypeId::ERROR;
                }
                self.types.array_of(first)
            }
        }
    }

    // ===== as / is =====

    fn check_cast(&mut self, inner: ExprId, ty: &TypeExpr, range: SourceRange) -> TypeId {
        let owner = self.body.owner;
        let subst = self.body.subst.clone();
        let target = self.resolve_type(ty, owner, &subst);
        let src = self.check_expr(inner, None);
        if src.is_error() || target.is_error() || src == target {
            return target;
        }
        let ok = match (src, target) {
            (TypeId::INT, TypeId::FLOAT) | (TypeId::FLOAT, TypeId::INT) => true,
            (TypeId::INT | TypeId::FLOAT | TypeId::BOOL, TypeId::STRING) => true,
            (TypeId::ANY, _) => true,
            _ => {
                self.types.newtype_inner(target) == Some(src)
                    || self.types.newtype_inner(src) == Some(target)
            }
        };
        if !ok {
            let msg = format!(
                "invalid cast from {} to {}",
                self.type_name(src),
                self.type_name(target)
            );
            self.error(range, msg);
            return TypeId::ERROR;
        }
        target
    }

    fn check_type_check(&mut self, id: ExprId, inner: ExprId, ty: &TypeExpr) -> TypeId {
        let src = self.check_expr(inner, None);
        if let TypeExprKind::Named { path, params } = &ty.kind {
            if path.len() == 1 && params.is_empty() {
                if let Some(tag) = self.types.sum_def(src).and_then(|s| s.variant_index(&path[0])) {
                    self.body
                        .info
                        .type_checks
                        .insert(id, TypeCheckKind::Variant(tag as u32));
                    return TypeId::BOOL;
                }
            }
        }
        let owner = self.body.owner;
        let subst = self.body.subst.clone();
        let target = self.resolve_type(ty, owner, &subst);
        self.body
            .info
            .type_checks
            .insert(id, TypeCheckKind::Type(target));
        TypeId::BOOL
    }

    // ===== 闭包 =====

    fn check_closure(&mut self, fn_id: FnId) -> TypeId {
        let ast = self.body.ast.clone();
        let f = ast.function(fn_id);
        let owner = self.body.owner;
        let subst = self.body.subst.clone();
        let params: Vec<TypeId> = f
            .params
            .iter()
            .map(|p| self.resolve_type(&p.ty, owner, &subst))
            .collect();
        let ret = match &f.ret {
            Some(r) => self.resolve_type(r, owner, &subst),
            None => TypeId::VOID,
        };
        let parent = self.current_instance();
        let info = self.out.functions[parent as usize].info;
        let name = format!("{}$closure", self.out.functions[parent as usize].name);
        let instance = self.push_instance(FunctionInstance {
            name,
            owner,
            kind: InstanceKind::Closure { fn_id, parent },
            info,
            params: params.clone(),
            ret,
            captures: Vec::new(),
            range: f.range,
        });
        self.body.info.closures.insert(fn_id, instance);

        self.body.frames.push(Frame {
            instance,
            ret,
            loops: 0,
            switches: 0,
        });
        self.push_scope();
        for (i, (p, ty)) in f.params.iter().zip(&params).enumerate() {
            self.declare_local(&p.name, *ty, true, Some(SiteKey::Param(fn_id, i)));
        }
        if let Some(body) = f.body {
            self.check_stmt(body);
            if ret != TypeId::VOID && !self.stmt_returns(body) {
                self.error(f.range, "closure does not return a value on every path");
            }
        }
        self.pop_scope();
        self.body.frames.pop();
        self.types.function_of(params, ret)
    }

    /// `name!(T)` 作为值：取泛型函数实例
    fn check_generic_value(
        &mut self,
        id: ExprId,
        base: ExprId,
        args: &[TypeExpr],
        range: SourceRange,
    ) -> TypeId {
        let Some((Symbol::Template { module, fn_id }, name)) = self.callee_symbol(base) else {
            self.error(range, "type arguments are only allowed on generic functions here");
            return TypeId::ERROR;
        };
        let explicit = self.resolve_type_args(args);
        let Some(subst) = self.infer_generic_call(module, fn_id, &[], &explicit, range) else {
            return TypeId::ERROR;
        };
        let Some(index) = self.instantiate_function(module, fn_id, subst, range) else {
            return TypeId::ERROR;
        };
        let inst = &self.out.functions[index as usize];
        let (params, ret) = (inst.params.clone(), inst.ret);
        tracing::trace!(target: "smalls::resolver", function = %name, "generic function as value");
        self.bind(
            id,
            Binding::Function(CalleeRef {
                module: self.module,
                index,
            }),
        );
        self.types.function_of(params, ret)
    }

    pub(super) fn resolve_type_args(&mut self, args: &[TypeExpr]) -> Vec<TypeId> {
        let owner = self.body.owner;
        let subst = self.body.subst.clone();
        args.iter()
            .map(|a| self.resolve_type(a, owner, &subst))
            .collect()
    }

    // ===== 调用 =====

    fn check_call(
        &mut self,
        id: ExprId,
        callee: ExprId,
        args: &[ExprId],
        range: SourceRange,
        expected: Option<TypeId>,
    ) -> TypeId {
        let ast = self.body.ast.clone();
        let callee_id = ast.strip_grouping(callee);

        if let ExprKind::GenericInst { base, args: type_args } = &ast.expr(callee_id).kind {
            return self.check_generic_call(id, callee_id, *base, type_args, args, range, expected);
        }

        if let Some((sym, name)) = self.callee_symbol(callee_id) {
            let is_value = matches!(
                sym,
                Symbol::Global { .. } | Symbol::Const { .. } | Symbol::PendingConst { .. }
            );
            if !is_value {
                return self.call_symbol(id, sym, &name, &[], args, range, expected);
            }
        }

        // 调用函数类型的值
        let ct = self.check_expr(callee, None);
        if ct.is_error() {
            for a in args {
                self.check_expr(*a, None);
            }
            return TypeId::ERROR;
        }
        let TypeKind::Function { params, ret } = self.types.kind(ct).clone() else {
            for a in args {
                self.check_expr(*a, None);
            }
            let msg = format!("type {} is not callable", self.type_name(ct));
            self.error(range, msg);
            return TypeId::ERROR;
        };
        self.check_args("closure", args, &params, range, false);
        self.body.info.calls.insert(id, CallKind::Closure);
        ret
    }

    #[allow(clippy::too_many_arguments)]
    fn check_generic_call(
        &mut self,
        id: ExprId,
        callee_id: ExprId,
        base: ExprId,
        type_args: &[TypeExpr],
        args: &[ExprId],
        range: SourceRange,
        expected: Option<TypeId>,
    ) -> TypeId {
        let ast = self.body.ast.clone();
        if let ExprKind::Identifier(name) = &ast.expr(base).kind {
            if !self.is_local(name) {
                match name.as_str() {
                    "array" | "map" if self.lookup_top(self.body.owner, name).is_none() => {
                        let targs = self.resolve_type_args(type_args);
                        let ty = match (name.as_str(), targs.as_slice()) {
                            ("array", [e]) if !e.is_error() => self.types.array_of(*e),
                            ("map", [k, v]) if !k.is_error() && !v.is_error() => {
                                if !self.check_map_key(*k, range) {
                                    return TypeId::ERROR;
                                }
                                self.types.map_of(*k, *v)
                            }
                            _ => {
                                self.error(range, format!("wrong number of type arguments for '{}'", name));
                                return TypeId::ERROR;
                            }
                        };
                        if !args.is_empty() {
                            self.error(range, format!("'{}!(..)()' takes no arguments", name));
                        }
                        self.set_type(callee_id, ty);
                        self.body.info.calls.insert(id, CallKind::EmptyContainer(ty));
                        return ty;
                    }
                    "get_propset" if self.lookup_top(self.body.owner, name).is_none() => {
                        return self.check_propset_call(id, type_args, args, range);
                    }
                    _ => {}
                }
            }
        }

        let Some((sym, name)) = self.callee_symbol(base) else {
            self.error(range, "type arguments are only allowed on generic functions and types");
            return TypeId::ERROR;
        };
        let explicit = self.resolve_type_args(type_args);
        if explicit.iter().any(|t| t.is_error()) {
            return TypeId::ERROR;
        }
        self.call_symbol(id, sym, &name, &explicit, args, range, expected)
    }

    fn check_propset_call(
        &mut self,
        id: ExprId,
        type_args: &[TypeExpr],
        args: &[ExprId],
        range: SourceRange,
    ) -> TypeId {
        let targs = self.resolve_type_args(type_args);
        let [target] = targs.as_slice() else {
            self.error(range, "get_propset!(T) takes exactly one type argument");
            return TypeId::ERROR;
        };
        let target = *target;
        if target.is_error() {
            return TypeId::ERROR;
        }
        if !self.types.get(target).propset {
            let msg = format!("type {} is not a [[propset]] struct", self.type_name(target));
            self.error(range, msg);
            return TypeId::ERROR;
        }
        if args.len() != 1 {
            self.error(range, "get_propset!(T) takes one object argument");
            return TypeId::ERROR;
        }
        let at = self.check_expr(args[0], None);
        let is_object = matches!(
            self.types.kind(at),
            TypeKind::Object | TypeKind::Handle { .. } | TypeKind::Error
        );
        if !is_object {
            let r = self.body.ast.expr(args[0]).range;
            self.mismatch(r, TypeId::OBJECT, at);
        }
        self.body.info.calls.insert(id, CallKind::Propset(target));
        target
    }

    /// 调用一个顶层符号
    #[allow(clippy::too_many_arguments)]
    fn call_symbol(
        &mut self,
        id: ExprId,
        sym: Symbol,
        name: &str,
        explicit: &[TypeId],
        args: &[ExprId],
        range: SourceRange,
        expected: Option<TypeId>,
    ) -> TypeId {
        match sym {
            Symbol::Function { callee, ty } => {
                if !explicit.is_empty() {
                    self.error(range, format!("function '{}' is not generic", name));
                }
                let TypeKind::Function { params, ret } = self.types.kind(ty).clone() else {
                    return TypeId::ERROR;
                };
                self.check_args(name, args, &params, range, false);
                self.add_dependency(callee.module);
                self.body.info.calls.insert(id, CallKind::Direct(callee));
                ret
            }
            Symbol::Template { module: tm, fn_id } => {
                let arg_types = self.check_generic_args(tm, fn_id, args);
                let Some(subst) =
                    self.infer_generic_call(tm, fn_id, &arg_types, explicit, range)
                else {
                    return TypeId::ERROR;
                };
                let Some(index) = self.instantiate_function(tm, fn_id, subst, range) else {
                    return TypeId::ERROR;
                };
                let inst = &self.out.functions[index as usize];
                let (params, ret) = (inst.params.clone(), inst.ret);
                self.compare_args(name, args, &arg_types, &params, range, false);
                self.body.info.calls.insert(
                    id,
                    CallKind::Direct(CalleeRef {
                        module: self.module,
                        index,
                    }),
                );
                ret
            }
            Symbol::Native {
                module: nm,
                fn_id,
                native,
                ty,
            } => {
                self.add_dependency(nm);
                match ty {
                    Some(ty) => {
                        let TypeKind::Function { params, ret } = self.types.kind(ty).clone() else {
                            return TypeId::ERROR;
                        };
                        self.check_args(name, args, &params, range, true);
                        let index = self.native_ref(native, ret);
                        self.body.info.calls.insert(id, CallKind::Native { index });
                        ret
                    }
                    None => {
                        let arg_types = self.check_generic_args(nm, fn_id, args);
                        let Some(subst) =
                            self.infer_generic_call(nm, fn_id, &arg_types, explicit, range)
                        else {
                            return TypeId::ERROR;
                        };
                        let (params, ret) = self.signature_with(nm, fn_id, &subst);
                        self.compare_args(name, args, &arg_types, &params, range, true);
                        let index = self.native_ref(native, ret);
                        self.body.info.calls.insert(id, CallKind::Native { index });
                        ret
                    }
                }
            }
            Symbol::Variant { sum, index } => self.call_variant(id, sum, index, name, args, range),
            Symbol::VariantTemplate {
                module: vm,
                decl,
                index,
            } => {
                let template_expected = match explicit.is_empty() {
                    true => expected,
                    false => Some(self.instantiate_type(vm, decl, explicit.to_vec(), range)),
                };
                let known = self.infer_variant_sum_from_expected(vm, decl, template_expected);
                match known {
                    Some(sum) => self.call_variant(id, sum, index, name, args, range),
                    None => {
                        let arg_types: Vec<TypeId> =
                            args.iter().map(|a| self.check_expr(*a, None)).collect();
                        let Some(sum) =
                            self.infer_variant_sum(vm, decl, index, &arg_types, None, range)
                        else {
                            return TypeId::ERROR;
                        };
                        let want = self.payload_types(sum, index, args.len());
                        match want {
                            Some(want) => self.compare_args(name, args, &arg_types, &want, range, false),
                            None => self.payload_arity_error(sum, index, name, args.len(), range),
                        }
                        self.body.info.calls.insert(id, CallKind::Variant { sum, tag: index });
                        sum
                    }
                }
            }
            Symbol::Type(t) => self.call_newtype(id, t, name, args, range),
            Symbol::TypeTemplate { module: tm, decl } => {
                let t = if !explicit.is_empty() {
                    self.instantiate_type(tm, decl, explicit.to_vec(), range)
                } else if let Some(exp) = expected.filter(|e| self.is_instance_of(*e, tm, decl)) {
                    exp
                } else {
                    self.infer_newtype_instance(tm, decl, args, range)
                };
                if t.is_error() {
                    return t;
                }
                self.call_newtype(id, t, name, args, range)
            }
            Symbol::Global { .. }
            | Symbol::Const { .. }
            | Symbol::PendingConst { .. }
            | Symbol::PendingAlias { .. }
            | Symbol::Module(_) => {
                for a in args {
                    self.check_expr(*a, None);
                }
                self.error(range, format!("'{}' is not callable here", name));
                TypeId::ERROR
            }
        }
    }

    fn is_instance_of(&mut self, ty: TypeId, module: ModuleId, decl: crate::compiler::ast::DeclId) -> bool {
        let Some(ast) = self.ast_of(module) else {
            return false;
        };
        let Some(name) = ast.decl(decl).name(&ast).map(|n| n.name.clone()) else {
            return false;
        };
        let template = format!("{}.{}", self.module_path_of(module), name);
        self.types.get(ty).template.as_deref() == Some(template.as_str())
    }

    fn infer_variant_sum_from_expected(
        &mut self,
        module: ModuleId,
        decl: crate::compiler::ast::DeclId,
        expected: Option<TypeId>,
    ) -> Option<TypeId> {
        let exp = expected?;
        self.is_instance_of(exp, module, decl).then_some(exp)
    }

    fn infer_newtype_instance(
        &mut self,
        module: ModuleId,
        decl: crate::compiler::ast::DeclId,
        args: &[ExprId],
        range: SourceRange,
    ) -> TypeId {
        let Some(ast) = self.ast_of(module) else {
            return TypeId::ERROR;
        };
        let crate::compiler::ast::DeclKind::Newtype {
            name,
            generic_params,
            wrapped,
        } = &ast.decl(decl).kind
        else {
            self.error(range, "generic type is not callable");
            return TypeId::ERROR;
        };
        if args.len() != 1 {
            self.error(range, format!("'{}' takes exactly one argument", name.name));
            return TypeId::ERROR;
        }
        let at = self.check_expr(args[0], None);
        let mut bindings = HashMap::new();
        if self.unify(wrapped, at, module, &mut bindings).is_err() {
            return TypeId::ERROR;
        }
        let mut targs = Vec::new();
        for p in generic_params {
            match bindings.get(p) {
                Some(t) => targs.push(*t),
                None => {
                    self.error(range, format!("could not infer type ${} for '{}'", p, name.name));
                    return TypeId::ERROR;
                }
            }
        }
        self.instantiate_type(module, decl, targs, range)
    }

    fn call_newtype(
        &mut self,
        id: ExprId,
        t: TypeId,
        name: &str,
        args: &[ExprId],
        range: SourceRange,
    ) -> TypeId {
        let Some(inner) = self.types.newtype_inner(t) else {
            for a in args {
                self.check_expr(*a, None);
            }
            self.error(range, format!("type '{}' is not callable", name));
            return TypeId::ERROR;
        };
        if args.len() != 1 {
            self.error(range, format!("'{}' takes exactly one argument", name));
            return TypeId::ERROR;
        }
        if self.body.info.expr_types.contains_key(&args[0]) {
            let got = self.body.info.type_of(args[0]);
            if !self.assignable(inner, got) {
                let r = self.body.ast.expr(args[0]).range;
                self.mismatch(r, inner, got);
            }
        } else {
            self.check_expr_expect(args[0], inner);
        }
        self.body.info.calls.insert(id, CallKind::Newtype(t));
        t
    }

    fn call_variant(
        &mut self,
        id: ExprId,
        sum: TypeId,
        tag: u32,
        name: &str,
        args: &[ExprId],
        range: SourceRange,
    ) -> TypeId {
        match self.payload_types(sum, tag, args.len()) {
            Some(want) => {
                for (a, w) in args.iter().zip(&want) {
                    self.check_expr_expect(*a, *w);
                }
            }
            None => {
                for a in args {
                    self.check_expr(*a, None);
                }
                self.payload_arity_error(sum, tag, name, args.len(), range);
            }
        }
        self.body.info.calls.insert(id, CallKind::Variant { sum, tag });
        sum
    }

    /// 按实参个数给出每个实参的期望类型；个数不合法时返回 None
    fn payload_types(&self, sum: TypeId, tag: u32, argc: usize) -> Option<Vec<TypeId>> {
        let payload = self
            .types
            .sum_def(sum)?
            .variants
            .get(tag as usize)?
            .payload;
        match payload {
            None => (argc == 0).then(Vec::new),
            Some(p) => {
                if argc == 1 {
                    return Some(vec![p]);
                }
                let items = self.types.tuple_items(p)?;
                (items.len() == argc).then(|| items.to_vec())
            }
        }
    }

    fn payload_arity_error(&mut self, sum: TypeId, tag: u32, name: &str, argc: usize, range: SourceRange) {
        let expected = match self
            .types
            .sum_def(sum)
            .and_then(|s| s.variants.get(tag as usize))
            .and_then(|v| v.payload)
        {
            None => 0,
            Some(p) => self.types.tuple_items(p).map(|i| i.len()).unwrap_or(1),
        };
        self.error(
            range,
            format!(
                "variant '{}' expects {} payload value(s), got {}",
                name, expected, argc
            ),
        );
    }

    /// 泛型调用前先检查实参；签名中不含泛型参数的形参提供期望类型
    fn check_generic_args(&mut self, module: ModuleId, fn_id: FnId, args: &[ExprId]) -> Vec<TypeId> {
        let Some(ast) = self.ast_of(module) else {
            return args.iter().map(|a| self.check_expr(*a, None)).collect();
        };
        let f = ast.function(fn_id);
        let empty = HashMap::new();
        let mut out = Vec::new();
        for (i, a) in args.iter().enumerate() {
            let expected = match f.params.get(i) {
                Some(p) if !p.ty.mentions_param() => {
                    self.native_signature = f.body.is_none();
                    let t = self.resolve_type(&p.ty, module, &empty);
                    self.native_signature = false;
                    Some(t).filter(|t| !matches!(*t, TypeId::ANY | TypeId::ANY_ARRAY | TypeId::ANY_MAP))
                }
                _ => None,
            };
            out.push(self.check_expr(*a, expected));
        }
        out
    }

    /// 在给定绑定下的函数签名
    fn signature_with(
        &mut self,
        module: ModuleId,
        fn_id: FnId,
        subst: &HashMap<String, TypeId>,
    ) -> (Vec<TypeId>, TypeId) {
        let Some(ast) = self.ast_of(module) else {
            return (Vec::new(), TypeId::ERROR);
        };
        let f = ast.function(fn_id);
        self.native_signature = f.body.is_none();
        let params = f
            .params
            .iter()
            .map(|p| self.resolve_type(&p.ty, module, subst))
            .collect();
        let ret = match &f.ret {
            Some(r) => self.resolve_type(r, module, subst),
            None => TypeId::VOID,
        };
        self.native_signature = false;
        (params, ret)
    }

    fn check_args(
        &mut self,
        name: &str,
        args: &[ExprId],
        params: &[TypeId],
        range: SourceRange,
        native: bool,
    ) {
        if args.len() != params.len() {
            self.error(
                range,
                format!(
                    "'{}' expects {} argument(s), got {}",
                    name,
                    params.len(),
                    args.len()
                ),
            );
        }
        for (i, a) in args.iter().enumerate() {
            match params.get(i) {
                Some(p) if native && matches!(*p, TypeId::ANY | TypeId::ANY_ARRAY | TypeId::ANY_MAP) => {
                    let got = self.check_expr(*a, None);
                    if !self.types.native_compatible(*p, got) {
                        let r = self.body.ast.expr(*a).range;
                        self.mismatch(r, *p, got);
                    }
                }
                Some(p) => {
                    self.check_expr_expect(*a, *p);
                }
                None => {
                    self.check_expr(*a, None);
                }
            }
        }
    }

    /// 实参已检查过，只比较类型
    fn compare_args(
        &mut self,
        name: &str,
        args: &[ExprId],
        got: &[TypeId],
        params: &[TypeId],
        range: SourceRange,
        native: bool,
    ) {
        if args.len() != params.len() {
            self.error(
                range,
                format!(
                    "'{}' expects {} argument(s), got {}",
                    name,
                    params.len(),
                    args.len()
                ),
            );
            return;
        }
        for ((a, g), p) in args.iter().zip(got).zip(params) {
            let ok = if native {
                self.types.native_compatible(*p, *g)
            } else {
                self.assignable(*p, *g)
            };
            if !ok {
                let r = self.body.ast.expr(*a).range;
                self.mismatch(r, *p, *g);
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::super::test_env::{messages, resolve_source};
    use super::super::{Binding, CallKind};

    fn errors_of(src: &str) -> Vec<String> {
        let (_, ctx, _) = resolve_source(src);
        messages(&ctx)
    }

    #[test]
    fn test_no_implicit_numeric_conversion() {
        let errs = errors_of("fn f(): float { var x = 1; return x + 2.0; }");
        assert!(errs
            .iter()
            .any(|m| m.contains("operator '+' cannot be applied to int and float")));
    }

    #[test]
    fn test_mismatch_has_expected_and_got() {
        let errs = errors_of("fn f() { var s: string = 5; }");
        assert_eq!(errs, vec!["type mismatch: expected string, got int"]);
    }

    #[test]
    fn test_closure_captures_are_recorded() {
        let src = "fn counter(): fn(): int {\n\
            var n = 0;\n\
            return fn(): int { n = n + 1; return n; };\n\
        }";
        let (resolved, ctx, _) = resolve_source(src);
        assert_eq!(ctx.errors(), 0, "{:?}", messages(&ctx));
        let closure = resolved
            .functions
            .iter()
            .find(|f| f.name.ends_with("$closure"))
            .expect("closure instance");
        assert_eq!(closure.captures.len(), 1);
        let info = &resolved.infos[closure.info as usize];
        assert!(info.local(closure.captures[0]).captured);
    }

    #[test]
    fn test_nested_closure_threads_upvalues() {
        let src = "fn outer(): int {\n\
            var x = 1;\n\
            var f = fn(): fn(): int { return fn(): int { return x; }; };\n\
            return f()();\n\
        }";
        let (resolved, ctx, _) = resolve_source(src);
        assert_eq!(ctx.errors(), 0, "{:?}", messages(&ctx));
        let closures: Vec<_> = resolved
            .functions
            .iter()
            .filter(|f| f.name.contains("$closure"))
            .collect();
        assert_eq!(closures.len(), 2);
        assert!(closures.iter().all(|c| c.captures.len() == 1));
    }

    #[test]
    fn test_brace_init_rules() {
        let src = "type P { x, y: int; }\n\
            fn f() {\n\
              var a: P = { x = 1 };\n\
              var b: int[3] = {1, 2};\n\
              var m = {\"a\": 1, \"b\": 2};\n\
              var xs = {1, 2, 3};\n\
              var t: (int, string) = {1, \"s\"};\n\
            }";
        assert!(errors_of(src).is_empty());

        let errs = errors_of("type P { x: int; }\nfn f() { var a: P = { z = 1 }; var e = {}; var q: int[1] = {1, 2}; }");
        assert_eq!(errs.len(), 3, "{:?}", errs);
    }

    #[test]
    fn test_casts() {
        assert!(errors_of("type M(float);\nfn f(): float { var m = 2.0 as M; return (m as float) + (3 as float); }").is_empty());
        let errs = errors_of("fn f(): bool { return \"x\" as bool; }");
        assert!(errs[0].contains("invalid cast from string to bool"));
    }

    #[test]
    fn test_tuple_index_and_destructuring() {
        let src = "fn pair(): (int, string) { return 1, \"a\"; }\n\
            fn f(): int { var t = pair(); var a = 1; var b = 2; a, b = b, a; return t[0] + a; }";
        let (resolved, ctx, _) = resolve_source(src);
        assert_eq!(ctx.errors(), 0, "{:?}", messages(&ctx));
        let info = &resolved.infos[resolved.functions[1].info as usize];
        assert_eq!(info.const_values.len(), 1);
        let errs = errors_of("fn f() { var t = (1, 2); t[2]; }");
        assert!(errs[0].contains("out of range"));
    }

    #[test]
    fn test_call_kinds() {
        let src = "type Meters(float);\n\
            type R = Ok(int) | Err;\n\
            fn g(x: int): int { return x; }\n\
            fn f() { var m = Meters(1.5); var r = Ok(1); var e = Err; var h = g; h(2); g(3); var xs = array!(int)(); }";
        let (resolved, ctx, _) = resolve_source(src);
        assert_eq!(ctx.errors(), 0, "{:?}", messages(&ctx));
        let info = &resolved.infos[resolved.functions[1].info as usize];
        let kinds: Vec<&CallKind> = info.calls.values().collect();
        assert!(kinds.iter().any(|k| matches!(k, CallKind::Newtype(_))));
        assert!(kinds.iter().any(|k| matches!(k, CallKind::Variant { tag: 0, .. })));
        assert!(kinds.iter().any(|k| matches!(k, CallKind::Closure)));
        assert!(kinds.iter().any(|k| matches!(k, CallKind::Direct(_))));
        assert!(kinds.iter().any(|k| matches!(k, CallKind::EmptyContainer(_))));
        assert!(info
            .bindings
            .values()
            .any(|b| matches!(b, Binding::Variant { tag: 1, .. })));
    }

    #[test]
    fn test_argument_count() {
        let errs = errors_of("fn g(x: int) {}\nfn f() { g(1, 2); }");
        assert!(errs[0].contains("expects 1 argument(s), got 2"));
    }

    #[test]
    fn test_propset_requires_annotation() {
        let errs = errors_of("type S { n: int; }\nfn f(o: object) { get_propset!(S)(o); }");
        assert!(errs[0].contains("not a [[propset]] struct"));
        assert!(errors_of("[[propset]] type S { n: int; }\nfn f(o: object): int { return get_propset!(S)(o).n; }").is_empty());
    }

    #[test]
    fn test_deprecated_use_warns() {
        let (_, ctx, _) = resolve_source("[[deprecated]] fn old() {}\nfn f() { old(); }");
        assert_eq!(ctx.errors(), 0);
        assert_eq!(ctx.warnings(), 1);
    }

    #[test]
    fn test_constants_cannot_be_assigned() {
        let errs = errors_of("const K = 1;\nfn f() { K = 2; }");
        assert!(errs[0].contains("cannot assign to constant 'K'"));
    }
}
