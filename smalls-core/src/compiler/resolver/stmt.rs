//! 语句与函数体检查

use std::collections::HashMap;
use std::mem;

use crate::compiler::ast::{
    CompareOp, DeclId, DeclKind, ExprId, ExprKind, ForBinder, Ident, JumpKind, LabelKind,
    StmtId, StmtKind, VarDecl,
};
use crate::compiler::types::{TypeId, TypeKind};
use crate::kit::SourceRange;

use super::{
    Body, ForEachInfo, ForEachKind, Frame, LabelInfo, PendingBody, Resolver, SiteKey, Symbol,
};

impl<'a> Resolver<'a> {
    // ===== 函数体 =====

    pub(super) fn check_function_body(&mut self, pending: PendingBody) {
        let inst = self.out.functions[pending.instance as usize].clone();
        let Some(ast) = self.ast_of(pending.owner) else {
            return;
        };
        let f = ast.function(pending.fn_id).clone();
        let Some(body) = f.body else {
            return;
        };
        tracing::trace!(target: "smalls::resolver", function = %inst.name, "checking body");

        let saved_trail = mem::replace(&mut self.trail, pending.trail);
        let saved_body = mem::replace(
            &mut self.body,
            Body::new(pending.owner, ast.clone(), pending.subst),
        );

        self.body.frames.push(Frame {
            instance: pending.instance,
            ret: inst.ret,
            loops: 0,
            switches: 0,
        });
        self.push_scope();
        for (i, (p, ty)) in f.params.iter().zip(&inst.params).enumerate() {
            self.declare_local(&p.name, *ty, true, Some(SiteKey::Param(pending.fn_id, i)));
        }
        self.check_stmt(body);
        if inst.ret != TypeId::VOID && !inst.ret.is_error() && !self.stmt_returns(body) {
            self.error(
                f.name.range,
                format!(
                    "function '{}' does not return a value on every path",
                    f.name.name
                ),
            );
        }
        self.pop_scope();
        self.body.frames.pop();

        let info = mem::take(&mut self.body.info);
        self.out.infos[inst.info as usize] = info;
        self.body = saved_body;
        self.trail = saved_trail;
    }

    /// 全局变量初始化，推断未声明类型的全局变量
    pub(super) fn check_global_initializers(&mut self) {
        let Some(init) = self.out.init else {
            return;
        };
        let ast = self.ast.clone();
        let saved = mem::replace(
            &mut self.body,
            Body::new(self.module, ast.clone(), HashMap::new()),
        );
        self.body.frames.push(Frame {
            instance: init,
            ret: TypeId::VOID,
            loops: 0,
            switches: 0,
        });
        self.push_scope();

        for &decl in &ast.items {
            let DeclKind::Var(var) = &ast.decl(decl).kind else {
                continue;
            };
            if var.is_const {
                continue;
            }
            let declared = self
                .out
                .globals
                .iter()
                .find(|g| g.decl == decl)
                .and_then(|g| g.ty);
            let types = self.check_var_initializers(var, declared, ast.decl(decl).range);
            for (name, ty) in var.names.iter().zip(types) {
                self.set_global_type(decl, name, ty);
            }
        }

        self.pop_scope();
        self.body.frames.pop();
        let info = mem::take(&mut self.body.info);
        let index = self.out.functions[init as usize].info;
        self.out.infos[index as usize] = info;
        self.body = saved;
    }

    fn set_global_type(&mut self, decl: DeclId, name: &Ident, ty: TypeId) {
        let Some(pos) = self
            .out
            .globals
            .iter()
            .position(|g| g.decl == decl && g.name == name.name)
        else {
            return;
        };
        self.out.globals[pos].ty = Some(ty);
        if let Some(Symbol::Global { ty: slot, .. }) = self.out.symbols.get_mut(&name.name) {
            *slot = Some(ty);
        }
    }

    /// 检查 `var` 的初始化表达式，返回每个名字的类型
    fn check_var_initializers(
        &mut self,
        var: &VarDecl,
        declared: Option<TypeId>,
        range: SourceRange,
    ) -> Vec<TypeId> {
        let n = var.names.len();
        if var.inits.is_empty() {
            return var
                .names
                .iter()
                .map(|name| match declared {
                    Some(t) => t,
                    None => {
                        self.error(
                            name.range,
                            format!("variable '{}' needs a type or an initializer", name.name),
                        );
                        TypeId::ERROR
                    }
                })
                .collect();
        }
        if var.inits.len() == n {
            return var
                .inits
                .iter()
                .map(|e| {
                    let t = match declared {
                        Some(d) => {
                            self.check_expr_expect(*e, d);
                            d
                        }
                        None => self.check_expr(*e, None),
                    };
                    if t == TypeId::VOID {
                        let r = self.body.ast.expr(*e).range;
                        self.error(r, "cannot initialize a variable with a void value");
                        return TypeId::ERROR;
                    }
                    t
                })
                .collect();
        }
        if var.inits.len() == 1 {
            // 元组解构
            let expected = declared.map(|d| self.types.tuple_of(vec![d; n]));
            let t = self.check_expr(var.inits[0], expected);
            if t.is_error() {
                return vec![TypeId::ERROR; n];
            }
            match self.types.tuple_items(t).map(|i| i.to_vec()) {
                Some(items) if items.len() == n => {
                    if let Some(d) = declared {
                        for it in &items {
                            if !self.assignable(d, *it) {
                                let r = self.body.ast.expr(var.inits[0]).range;
                                self.mismatch(r, d, *it);
                            }
                        }
                        return vec![d; n];
                    }
                    return items;
                }
                _ => {
                    let msg = format!(
                        "cannot destructure {} into {} variables",
                        self.type_name(t),
                        n
                    );
                    self.error(range, msg);
                    return vec![TypeId::ERROR; n];
                }
            }
        }
        self.error(
            range,
            format!("expected {} initializers, got {}", n, var.inits.len()),
        );
        for e in &var.inits {
            self.check_expr(*e, None);
        }
        vec![TypeId::ERROR; n]
    }

    // ===== 语句 =====

    pub(super) fn check_stmt(&mut self, id: StmtId) {
        let ast = self.body.ast.clone();
        let stmt = ast.stmt(id);
        match &stmt.kind {
            StmtKind::Block(stmts) => {
                self.push_scope();
                for s in stmts {
                    self.check_stmt(*s);
                }
                self.pop_scope();
            }
            StmtKind::Expr(e) => {
                self.check_expr(*e, None);
            }
            StmtKind::Decl(decl) => self.check_local_decl(*decl),
            StmtKind::If {
                cond,
                then,
                otherwise,
            } => {
                self.check_expr_expect(*cond, TypeId::BOOL);
                self.scoped(*then);
                if let Some(o) = otherwise {
                    self.scoped(*o);
                }
            }
            StmtKind::For {
                init,
                cond,
                step,
                body,
            } => {
                self.push_scope();
                if let Some(i) = init {
                    self.check_stmt(*i);
                }
                if let Some(c) = cond {
                    self.check_expr_expect(*c, TypeId::BOOL);
                }
                if let Some(s) = step {
                    self.check_expr(*s, None);
                }
                self.in_loop(*body);
                self.pop_scope();
            }
            StmtKind::ForEach {
                first,
                second,
                iterable,
                body,
            } => self.check_foreach(id, first, second.as_ref(), *iterable, *body),
            StmtKind::Switch { scrutinee, cases } => self.check_switch(*scrutinee, cases),
            StmtKind::Label { .. } => {
                self.error(stmt.range, "label statement not within switch");
            }
            StmtKind::Jump(jump) => self.check_jump(jump, stmt.range),
            StmtKind::Empty => {}
        }
    }

    fn scoped(&mut self, id: StmtId) {
        self.push_scope();
        self.check_stmt(id);
        self.pop_scope();
    }

    fn in_loop(&mut self, body: StmtId) {
        if let Some(f) = self.body.frames.last_mut() {
            f.loops += 1;
        }
        self.scoped(body);
        if let Some(f) = self.body.frames.last_mut() {
            f.loops -= 1;
        }
    }

    fn check_local_decl(&mut self, decl: DeclId) {
        let ast = self.body.ast.clone();
        let d = ast.decl(decl);
        let DeclKind::Var(var) = &d.kind else {
            self.error(d.range, "only variable declarations are allowed inside functions");
            return;
        };
        let owner = self.body.owner;
        let subst = self.body.subst.clone();
        let declared = var.ty.as_ref().map(|t| self.resolve_type(t, owner, &subst));

        if var.is_const {
            self.check_local_const(decl, var, declared);
            return;
        }
        let types = self.check_var_initializers(var, declared, d.range);
        for (i, (name, ty)) in var.names.iter().zip(types).enumerate() {
            self.declare_local(name, ty, true, Some(SiteKey::Var(decl, i)));
        }
    }

    fn check_local_const(&mut self, decl: DeclId, var: &VarDecl, declared: Option<TypeId>) {
        let n = var.names.len();
        let values = if var.inits.len() == n {
            var.inits
                .iter()
                .map(|e| self.eval_const_in_body(*e, declared))
                .collect::<Vec<_>>()
        } else if var.inits.len() == 1 && n > 1 {
            match self.eval_const_in_body(var.inits[0], None) {
                Some(super::ConstValue::Tuple { items, .. }) if items.len() == n => {
                    items.into_iter().map(Some).collect()
                }
                Some(_) => {
                    let range = self.body.ast.expr(var.inits[0]).range;
                    self.error(
                        range,
                        format!("cannot destructure initializer into {} constants", n),
                    );
                    vec![None; n]
                }
                None => vec![None; n],
            }
        } else {
            for name in &var.names {
                self.error(
                    name.range,
                    format!("constant '{}' requires an initializer", name.name),
                );
            }
            vec![None; n]
        };
        for (i, (name, value)) in var.names.iter().zip(values).enumerate() {
            match value {
                Some(v) => {
                    let ty = v.type_id();
                    self.body.info.local_consts.insert((decl, i), v.clone());
                    self.declare_local_const(name, v, ty);
                }
                None => {
                    // 失败的常量仍占位，避免后续引用报未定义
                    self.declare_local(name, TypeId::ERROR, false, Some(SiteKey::Var(decl, i)));
                }
            }
        }
    }

    // ===== foreach =====

    fn check_foreach(
        &mut self,
        id: StmtId,
        first: &ForBinder,
        second: Option<&ForBinder>,
        iterable: ExprId,
        body: StmtId,
    ) {
        let it = self.check_expr(iterable, None);
        let (kind, first_ty, second_ty) = match self.types.kind(it).clone() {
            TypeKind::Array(elem) | TypeKind::FixedArray { elem, .. } => match second {
                None => (ForEachKind::Array, elem, None),
                Some(_) => (ForEachKind::Array, TypeId::INT, Some(elem)),
            },
            TypeKind::Map { key, value } => (ForEachKind::Map, key, Some(value)),
            TypeKind::Error => (ForEachKind::Array, TypeId::ERROR, Some(TypeId::ERROR)),
            _ => {
                let range = self.body.ast.expr(iterable).range;
                let msg = format!("type {} is not iterable", self.type_name(it));
                self.error(range, msg);
                (ForEachKind::Array, TypeId::ERROR, Some(TypeId::ERROR))
            }
        };

        self.push_scope();
        let first_ty = self.binder_type(first, first_ty);
        let first_local = self.declare_local(&first.name, first_ty, true, None);
        let second_local = second.map(|b| {
            let t = self.binder_type(b, second_ty.unwrap_or(TypeId::ERROR));
            self.declare_local(&b.name, t, true, None)
        });
        self.body.info.foreach.insert(
            id,
            ForEachInfo {
                kind,
                first: first_local,
                second: second_local,
            },
        );
        self.in_loop(body);
        self.pop_scope();
    }

    fn binder_type(&mut self, binder: &ForBinder, actual: TypeId) -> TypeId {
        let Some(te) = &binder.ty else {
            return actual;
        };
        let owner = self.body.owner;
        let subst = self.body.subst.clone();
        let declared = self.resolve_type(te, owner, &subst);
        if !self.assignable(declared, actual) {
            self.mismatch(binder.name.range, declared, actual);
        }
        declared
    }

    // ===== switch =====

    fn check_switch(&mut self, scrutinee: ExprId, cases: &[StmtId]) {
        let ast = self.body.ast.clone();
        let st = self.check_expr(scrutinee, None);
        let is_sum = self.types.sum_def(st).is_some();

        if let Some(f) = self.body.frames.last_mut() {
            f.switches += 1;
        }
        let mut covered: Vec<u32> = Vec::new();
        let mut values: Vec<super::ConstValue> = Vec::new();
        let mut has_default = false;

        for &case in cases {
            let stmt = ast.stmt(case);
            let StmtKind::Label { kind, guard, body } = &stmt.kind else {
                self.error(stmt.range, "expected 'case' or 'default'");
                continue;
            };
            self.push_scope();
            let info = match kind {
                LabelKind::Default => {
                    if has_default {
                        self.error(stmt.range, "duplicate default label");
                    }
                    has_default = true;
                    Some(LabelInfo::Default)
                }
                LabelKind::Value(expr) => {
                    match self.variant_label(st, *expr) {
                        Some(tag) => {
                            self.body.info.expr_types.insert(*expr, st);
                            Some(LabelInfo::Variant {
                                tag,
                                bindings: Vec::new(),
                            })
                        }
                        None => self.equality_label(st, *expr, &mut values),
                    }
                }
                LabelKind::Pattern {
                    ctor,
                    bindings,
                    expr,
                } => match self.variant_label(st, *ctor) {
                    Some(tag) if is_sum => {
                        let locals = self.bind_pattern(st, tag, bindings, stmt.range);
                        Some(LabelInfo::Variant {
                            tag,
                            bindings: locals,
                        })
                    }
                    _ => self.equality_label(st, *expr, &mut values),
                },
            };

            if let Some(LabelInfo::Variant { tag, .. }) = &info {
                if guard.is_none() {
                    if covered.contains(tag) {
                        self.error(stmt.range, "duplicate case for the same variant");
                    }
                    covered.push(*tag);
                }
            }
            if let Some(info) = info {
                self.body.info.labels.insert(case, info);
            }
            if let Some(g) = guard {
                self.check_expr_expect(*g, TypeId::BOOL);
            }
            for s in body {
                self.check_stmt(*s);
            }
            self.pop_scope();
        }

        if let Some(f) = self.body.frames.last_mut() {
            f.switches -= 1;
        }

        if is_sum && !has_default {
            let missing: Vec<String> = self
                .types
                .sum_def(st)
                .map(|s| {
                    s.variants
                        .iter()
                        .filter(|v| !covered.contains(&v.tag))
                        .map(|v| v.name.clone())
                        .collect()
                })
                .unwrap_or_default();
            if !missing.is_empty() {
                let range = ast.expr(scrutinee).range;
                self.error(
                    range,
                    format!("switch is not exhaustive: missing {}", missing.join(", ")),
                );
            }
        }
    }

    /// 标签表达式是否命名了被匹配和类型的某个变体
    fn variant_label(&mut self, st: TypeId, expr: ExprId) -> Option<u32> {
        let ast = self.body.ast.clone();
        let expr = ast.strip_grouping(expr);
        let name = match &ast.expr(expr).kind {
            ExprKind::Identifier(name) => name.clone(),
            ExprKind::Path { member, .. } => member.name.clone(),
            _ => return None,
        };
        let sum = self.types.sum_def(st)?;
        sum.variant_index(&name).map(|i| i as u32)
    }

    fn bind_pattern(
        &mut self,
        st: TypeId,
        tag: u32,
        bindings: &[Ident],
        range: SourceRange,
    ) -> Vec<super::LocalId> {
        let payload = self
            .types
            .sum_def(st)
            .and_then(|s| s.variants.get(tag as usize))
            .and_then(|v| v.payload);
        let types: Vec<TypeId> = match payload {
            None if bindings.is_empty() => Vec::new(),
            Some(p) if bindings.len() == 1 => vec![p],
            Some(p) => match self.types.tuple_items(p) {
                Some(items) if items.len() == bindings.len() => items.to_vec(),
                _ => {
                    self.error(
                        range,
                        format!(
                            "pattern binds {} value(s) but the payload is {}",
                            bindings.len(),
                            self.type_name(p)
                        ),
                    );
                    vec![TypeId::ERROR; bindings.len()]
                }
            },
            None => {
                self.error(range, "this variant has no payload to bind");
                vec![TypeId::ERROR; bindings.len()]
            }
        };
        bindings
            .iter()
            .zip(types)
            .map(|(b, t)| self.declare_local(b, t, true, None))
            .collect()
    }

    fn equality_label(
        &mut self,
        st: TypeId,
        expr: ExprId,
        seen: &mut Vec<super::ConstValue>,
    ) -> Option<LabelInfo> {
        if st.is_error() {
            return None;
        }
        let range = self.body.ast.expr(expr).range;
        let value = match self.eval_const_in_body(expr, Some(st)) {
            Some(v) => v,
            None => return None,
        };
        if seen.contains(&value) {
            self.error(range, "duplicate case value");
        }
        seen.push(value.clone());
        let op = self.comparison_impl(CompareOp::Eq, st, st, range)?;
        for callee in match &op {
            super::OperatorImpl::Call { callee, .. } => vec![*callee],
            _ => Vec::new(),
        } {
            self.add_dependency(callee.module);
        }
        self.body.info.expr_types.insert(expr, st);
        Some(LabelInfo::Equal { value, op })
    }

    // ===== 跳转 =====

    fn check_jump(&mut self, jump: &JumpKind, range: SourceRange) {
        let Some(frame) = self.body.frames.last().cloned() else {
            self.error(range, "statement outside of a function");
            return;
        };
        match jump {
            JumpKind::Break => {
                if frame.loops == 0 && frame.switches == 0 {
                    self.error(range, "break outside loop or switch");
                }
            }
            JumpKind::Continue => {
                if frame.loops == 0 {
                    self.error(range, "continue outside loop");
                }
            }
            JumpKind::Return(values) => self.check_return(values, frame.ret, range),
        }
    }

    fn check_return(&mut self, values: &[ExprId], ret: TypeId, range: SourceRange) {
        match values.len() {
            0 => {
                if ret != TypeId::VOID && !ret.is_error() {
                    let msg = format!("return: expected {}, got void", self.type_name(ret));
                    self.error(range, msg);
                }
            }
            1 => {
                if ret == TypeId::VOID {
                    self.check_expr(values[0], None);
                    self.error(range, "void function cannot return a value");
                } else {
                    self.check_expr_expect(values[0], ret);
                }
            }
            n => {
                let items = self.types.tuple_items(ret).map(|i| i.to_vec());
                match items {
                    Some(items) if items.len() == n => {
                        for (v, t) in values.iter().zip(items) {
                            self.check_expr_expect(*v, t);
                        }
                    }
                    _ => {
                        for v in values {
                            self.check_expr(*v, None);
                        }
                        if !ret.is_error() {
                            let msg = format!(
                                "return: expected {}, got {} values",
                                self.type_name(ret),
                                n
                            );
                            self.error(range, msg);
                        }
                    }
                }
            }
        }
    }

    // ===== 返回路径分析 =====

    pub(super) fn stmt_returns(&self, id: StmtId) -> bool {
        let ast = &self.body.ast;
        match &ast.stmt(id).kind {
            StmtKind::Jump(JumpKind::Return(_)) => true,
            StmtKind::Block(stmts) => stmts.iter().any(|s| self.stmt_returns(*s)),
            StmtKind::If {
                then,
                otherwise: Some(o),
                ..
            } => self.stmt_returns(*then) && self.stmt_returns(*o),
            StmtKind::For {
                cond: None, body, ..
            } => !self.contains_break(*body),
            StmtKind::Switch { scrutinee, cases } => {
                let mut exhaustive = false;
                let mut covered = Vec::new();
                for case in cases {
                    let StmtKind::Label { guard, body, .. } = &ast.stmt(*case).kind else {
                        continue;
                    };
                    match self.body.info.labels.get(case) {
                        Some(LabelInfo::Default) => exhaustive = true,
                        Some(LabelInfo::Variant { tag, .. }) if guard.is_none() => {
                            covered.push(*tag)
                        }
                        _ => {}
                    }
                    let returns = body.iter().any(|s| self.stmt_returns(*s))
                        && !body.iter().any(|s| self.contains_break(*s));
                    if !returns {
                        return false;
                    }
                }
                let st = self.body.info.type_of(*scrutinee);
                if let Some(sum) = self.types.sum_def(st) {
                    exhaustive |= sum.variants.iter().all(|v| covered.contains(&v.tag));
                }
                exhaustive
            }
            _ => false,
        }
    }

    /// 是否存在跳出当前循环或 switch 的 break（不进入嵌套循环与 switch）
    fn contains_break(&self, id: StmtId) -> bool {
        let ast = &self.body.ast;
        match &ast.stmt(id).kind {
            StmtKind::Jump(JumpKind::Break) => true,
            StmtKind::Block(stmts) => stmts.iter().any(|s| self.contains_break(*s)),
            StmtKind::If {
                then, otherwise, ..
            } => {
                self.contains_break(*then)
                    || otherwise.map(|o| self.contains_break(o)).unwrap_or(false)
            }
            _ => false,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::super::test_env::{messages, resolve_source};
    use super::super::{ForEachKind, LabelInfo};
    use crate::compiler::types::TypeId;

    fn errors_of(src: &str) -> Vec<String> {
        let (_, ctx, _) = resolve_source(src);
        messages(&ctx)
    }

    #[test]
    fn test_missing_return() {
        let errs = errors_of("fn f(x: int): int { if (x > 0) { return 1; } }");
        assert_eq!(errs, vec!["function 'f' does not return a value on every path"]);
        assert!(errors_of("fn f(x: int): int { if (x > 0) { return 1; } else { return 2; } }").is_empty());
        assert!(errors_of("fn f(): int { for { } }").is_empty());
        assert!(!errors_of("fn f(): int { for { break; } }").is_empty());
    }

    #[test]
    fn test_switch_exhaustiveness() {
        let base = "type R = Ok(int) | Err | Pending;\n";
        let errs = errors_of(&format!(
            "{}fn f(r: R): int {{ switch (r) {{ case Ok(v): return v; case Err: return -1; }} return 0; }}",
            base
        ));
        assert_eq!(errs, vec!["switch is not exhaustive: missing Pending"]);

        let ok = format!(
            "{}fn f(r: R): int {{ switch (r) {{ case Ok(v): return v; case Err: return -1; case Pending: return 0; }} }}",
            base
        );
        assert!(errors_of(&ok).is_empty());

        let guarded = format!(
            "{}fn f(r: R): int {{ switch (r) {{ case Ok(v) if v > 0: return v; case Err: return -1; case Pending: return 0; }} return 1; }}",
            base
        );
        assert_eq!(errors_of(&guarded), vec!["switch is not exhaustive: missing Ok"]);
    }

    #[test]
    fn test_pattern_bindings_and_labels() {
        let src = "type Shape = Circle(float) | Rect(float, float);\n\
            fn area(s: Shape): float {\n\
              switch (s) { case Circle(r): return r * r; case Rect(w, h): return w * h; }\n\
            }\n\
            fn g(n: int): string { switch (n) { case 1: return \"one\"; case 2: break; default: return \"many\"; } return \"two\"; }";
        let (resolved, ctx, _) = resolve_source(src);
        assert_eq!(ctx.errors(), 0, "{:?}", messages(&ctx));
        let area = &resolved.infos[resolved.functions[0].info as usize];
        let binds: Vec<usize> = area
            .labels
            .values()
            .filter_map(|l| match l {
                LabelInfo::Variant { bindings, .. } => Some(bindings.len()),
                _ => None,
            })
            .collect();
        assert!(binds.contains(&1) && binds.contains(&2));
        let g = &resolved.infos[resolved.functions[1].info as usize];
        assert_eq!(
            g.labels
                .values()
                .filter(|l| matches!(l, LabelInfo::Equal { .. }))
                .count(),
            2
        );
    }

    #[test]
    fn test_duplicate_case_value() {
        let errs = errors_of("fn f(n: int) { switch (n) { case 1: break; case 1: break; } }");
        assert_eq!(errs, vec!["duplicate case value"]);
    }

    #[test]
    fn test_jump_placement() {
        let errs = errors_of("fn f() { break; continue; }");
        assert_eq!(errs, vec!["break outside loop or switch", "continue outside loop"]);
    }

    #[test]
    fn test_return_arity() {
        assert!(errors_of("fn f(): (int, string) { return 1, \"a\"; }").is_empty());
        let errs = errors_of("fn f(): (int, string) { return 1, \"a\", 2; }");
        assert!(errs[0].contains("got 3 values"));
        let errs = errors_of("fn f() { return 1; }");
        assert_eq!(errs, vec!["void function cannot return a value"]);
    }

    #[test]
    fn test_foreach_forms() {
        let src = "fn f(xs: int[], m: map!(string, float)): float {\n\
              var total = 0.0;\n\
              for (x in xs) { total = total + (x as float); }\n\
              for (i, x in xs) { total = total + (i as float); }\n\
              for (k, v in m) { total = total + v; }\n\
              return total;\n\
            }";
        let (resolved, ctx, _) = resolve_source(src);
        assert_eq!(ctx.errors(), 0, "{:?}", messages(&ctx));
        let info = &resolved.infos[resolved.functions[0].info as usize];
        assert_eq!(info.foreach.len(), 3);
        assert!(info.foreach.values().any(|f| f.kind == ForEachKind::Map));
    }

    #[test]
    fn test_local_const_and_destructuring() {
        let src = "fn pair(): (int, float) { return 1, 2.0; }\n\
            fn f(): int { const K = 2 * 3; var a, b = pair(); var c: int; return K + a + c; }";
        let (resolved, ctx, _) = resolve_source(src);
        assert_eq!(ctx.errors(), 0, "{:?}", messages(&ctx));
        let info = &resolved.infos[resolved.functions[1].info as usize];
        assert_eq!(info.local_consts.len(), 1);
        let b = info.locals.iter().find(|l| l.name == "b").map(|l| l.ty);
        assert_eq!(b, Some(TypeId::FLOAT));
    }

    #[test]
    fn test_global_types_are_inferred() {
        let src = "var counter = 10;\nvar name: string;\nfn f(): int { return counter; }";
        let (resolved, ctx, _) = resolve_source(src);
        assert_eq!(ctx.errors(), 0, "{:?}", messages(&ctx));
        assert_eq!(resolved.globals[0].ty, Some(TypeId::INT));
        assert_eq!(resolved.globals[1].ty, Some(TypeId::STRING));
        assert!(resolved.init.is_some());
        let errs = errors_of("var x;");
        assert_eq!(errs, vec!["variable 'x' needs a type or an initializer"]);
    }
}
