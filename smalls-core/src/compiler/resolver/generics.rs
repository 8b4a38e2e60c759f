//! 泛型：类型实参推断与单态化
//!
//! 函数模板的实例编译进发起调用的模块，函数体在模板所在模块的作用域中检查。
//! 实例按 `模块.名字!(实参)` 缓存，同一模块内只生成一次。

use std::collections::HashMap;

use crate::compiler::ast::{DeclId, DeclKind, FnId, TypeExpr, TypeExprKind};
use crate::compiler::types::{TypeId, TypeKind};
use crate::kit::SourceRange;

use super::{FunctionInstance, InstanceKind, ModuleId, PendingBody, Resolver, Symbol};

/// 同一个泛型参数被推断成两个不同的类型
#[derive(Debug, Clone)]
pub(super) struct Conflict {
    pub param: String,
    pub first: TypeId,
    pub second: TypeId,
}

impl<'a> Resolver<'a> {
    /// 将签名中的类型表达式与实际类型对齐，收集 `$T` 绑定
    pub(super) fn unify(
        &mut self,
        te: &TypeExpr,
        actual: TypeId,
        module: ModuleId,
        bindings: &mut HashMap<String, TypeId>,
    ) -> Result<(), Conflict> {
        if actual.is_error() {
            return Ok(());
        }
        match &te.kind {
            TypeExprKind::Param(name) => match bindings.get(name) {
                Some(bound) if *bound != actual => Err(Conflict {
                    param: name.clone(),
                    first: *bound,
                    second: actual,
                }),
                Some(_) => Ok(()),
                None => {
                    bindings.insert(name.clone(), actual);
                    Ok(())
                }
            },
            TypeExprKind::DynArray(elem) => match self.types.kind(actual).clone() {
                TypeKind::Array(e) => self.unify(elem, e, module, bindings),
                _ => Ok(()),
            },
            TypeExprKind::FixedArray { elem, .. } => match self.types.kind(actual).clone() {
                TypeKind::FixedArray { elem: e, .. } => self.unify(elem, e, module, bindings),
                _ => Ok(()),
            },
            TypeExprKind::Tuple(items) => match self.types.kind(actual).clone() {
                TypeKind::Tuple(actual_items) if actual_items.len() == items.len() => {
                    for (i, a) in items.iter().zip(actual_items) {
                        self.unify(i, a, module, bindings)?;
                    }
                    Ok(())
                }
                _ => Ok(()),
            },
            TypeExprKind::Function { params, ret } => match self.types.kind(actual).clone() {
                TypeKind::Function {
                    params: ap,
                    ret: ar,
                } if ap.len() == params.len() => {
                    for (p, a) in params.iter().zip(ap) {
                        self.unify(p, a, module, bindings)?;
                    }
                    if let Some(r) = ret {
                        self.unify(r, ar, module, bindings)?;
                    }
                    Ok(())
                }
                _ => Ok(()),
            },
            TypeExprKind::Named { path, params } => {
                if params.is_empty() || !te.mentions_param() {
                    return Ok(());
                }
                let kind = self.types.kind(actual).clone();
                match (path.len(), path[0].as_str(), kind) {
                    (1, "array", TypeKind::Array(e)) if params.len() == 1 => {
                        self.unify(&params[0], e, module, bindings)
                    }
                    (1, "map", TypeKind::Map { key, value }) if params.len() == 2 => {
                        self.unify(&params[0], key, module, bindings)?;
                        self.unify(&params[1], value, module, bindings)
                    }
                    _ => {
                        let Some(template) = self.template_name(path, module) else {
                            return Ok(());
                        };
                        let def = self.types.get(actual);
                        if def.template.as_deref() != Some(template.as_str()) {
                            return Ok(());
                        }
                        let args = def.type_params.clone();
                        for (p, a) in params.iter().zip(args) {
                            self.unify(p, a, module, bindings)?;
                        }
                        Ok(())
                    }
                }
            }
        }
    }

    /// 泛型类型模板的限定名
    fn template_name(&mut self, path: &[String], module: ModuleId) -> Option<String> {
        let sym = if path.len() == 1 {
            self.lookup_top(module, &path[0]).map(|s| s.0)
        } else {
            match self.lookup_top(module, &path[0]) {
                Some((Symbol::Module(m), _)) => self.module_export(m, &path[1]),
                _ => None,
            }
        };
        match sym? {
            Symbol::TypeTemplate { module: tm, decl } => self.qualified_decl_name(tm, decl),
            _ => None,
        }
    }

    fn qualified_decl_name(&mut self, module: ModuleId, decl: DeclId) -> Option<String> {
        let ast = self.ast_of(module)?;
        let name = ast.decl(decl).name(&ast)?.name.clone();
        Some(format!("{}.{}", self.module_path_of(module), name))
    }

    /// 用实参类型（以及可选的显式实参）推断函数模板的绑定；只出现在返回类型中的参数无法推断
    pub(super) fn infer_generic_call(
        &mut self,
        module: ModuleId,
        fn_id: FnId,
        arg_types: &[TypeId],
        explicit: &[TypeId],
        range: SourceRange,
    ) -> Option<HashMap<String, TypeId>> {
        let ast = self.ast_of(module)?;
        let f = ast.function(fn_id).clone();
        let mut bindings = HashMap::new();

        if !explicit.is_empty() {
            if explicit.len() > f.generic_params.len() {
                self.error(
                    range,
                    format!(
                        "'{}' takes {} type argument(s), got {}",
                        f.name.name,
                        f.generic_params.len(),
                        explicit.len()
                    ),
                );
                return None;
            }
            for (name, ty) in f.generic_params.iter().zip(explicit) {
                bindings.insert(name.clone(), *ty);
            }
        }

        let mut conflict: Option<Conflict> = None;
        for (param, actual) in f.params.iter().zip(arg_types) {
            if let Err(c) = self.unify(&param.ty, *actual, module, &mut bindings) {
                conflict = Some(c);
                break;
            }
        }

        if let Some(c) = conflict {
            let mut notes = Vec::new();
            for (i, (param, actual)) in f.params.iter().zip(arg_types).enumerate() {
                let expected = self.render_type_expr(&param.ty, &bindings);
                notes.push(format!(
                    "argument {}: expected {}, got {}",
                    i + 1,
                    expected,
                    self.type_name(*actual)
                ));
            }
            let msg = format!(
                "generic inference failed for '{}': '${}' bound to both {} and {}",
                f.name.name,
                c.param,
                self.type_name(c.first),
                self.type_name(c.second)
            );
            self.error_with_notes(range, msg, notes);
            return None;
        }

        let missing: Vec<&String> = f
            .generic_params
            .iter()
            .filter(|p| !bindings.contains_key(*p))
            .collect();
        if !missing.is_empty() {
            let names: Vec<String> = missing.iter().map(|m| format!("${}", m)).collect();
            let mut in_params = Vec::new();
            for param in &f.params {
                param.ty.collect_params(&mut in_params);
            }
            let notes: Vec<String> = missing
                .iter()
                .filter(|m| !in_params.iter().any(|p| p == **m))
                .map(|m| format!("'${}' appears only in the return type", m))
                .collect();
            self.error_with_notes(
                range,
                format!(
                    "could not infer type {} for call to '{}'",
                    names.join(", "),
                    f.name.name
                ),
                notes,
            );
            return None;
        }
        Some(bindings)
    }

    /// 诊断用：按当前绑定渲染签名中的类型
    fn render_type_expr(&self, te: &TypeExpr, bindings: &HashMap<String, TypeId>) -> String {
        match &te.kind {
            TypeExprKind::Param(name) => match bindings.get(name) {
                Some(t) => self.type_name(*t),
                None => format!("${}", name),
            },
            TypeExprKind::DynArray(e) => format!("{}[]", self.render_type_expr(e, bindings)),
            TypeExprKind::FixedArray { elem, .. } => {
                format!("{}[N]", self.render_type_expr(elem, bindings))
            }
            TypeExprKind::Tuple(items) => {
                let items: Vec<String> = items
                    .iter()
                    .map(|i| self.render_type_expr(i, bindings))
                    .collect();
                format!("({})", items.join(", "))
            }
            TypeExprKind::Function { params, ret } => {
                let ps: Vec<String> = params
                    .iter()
                    .map(|p| self.render_type_expr(p, bindings))
                    .collect();
                match ret {
                    Some(r) => format!("fn({}): {}", ps.join(", "), self.render_type_expr(r, bindings)),
                    None => format!("fn({})", ps.join(", ")),
                }
            }
            TypeExprKind::Named { path, params } => {
                if params.is_empty() {
                    path.join(".")
                } else {
                    let ps: Vec<String> = params
                        .iter()
                        .map(|p| self.render_type_expr(p, bindings))
                        .collect();
                    format!("{}!({})", path.join("."), ps.join(", "))
                }
            }
        }
    }

    /// 实例化函数模板，返回本模块中的实例下标
    pub(super) fn instantiate_function(
        &mut self,
        module: ModuleId,
        fn_id: FnId,
        subst: HashMap<String, TypeId>,
        range: SourceRange,
    ) -> Option<u32> {
        let ast = self.ast_of(module)?;
        let f = ast.function(fn_id);
        let args: Vec<String> = f
            .generic_params
            .iter()
            .map(|p| {
                subst
                    .get(p)
                    .map(|t| self.type_name(*t))
                    .unwrap_or_else(|| "?".into())
            })
            .collect();
        let display = format!("{}!({})", f.name.name, args.join(", "));
        let key = format!("{}.{}", self.module_path_of(module), display);
        if let Some(idx) = self.instances.get(&key) {
            return Some(*idx);
        }

        let params: Vec<TypeId> = f
            .params
            .iter()
            .map(|p| self.resolve_type(&p.ty, module, &subst))
            .collect();
        let ret = match &f.ret {
            Some(r) => self.resolve_type(r, module, &subst),
            None => TypeId::VOID,
        };
        let info = self.new_info();
        let idx = self.push_instance(FunctionInstance {
            name: display.clone(),
            owner: module,
            kind: InstanceKind::Function(fn_id),
            info,
            params,
            ret,
            captures: Vec::new(),
            range: f.range,
        });
        self.instances.insert(key, idx);
        self.add_dependency(module);

        let mut trail = self.trail.clone();
        trail.push(format!("instantiated as '{}' at {}", display, range));
        let instance_name = display.as_str();
        tracing::trace!(target: "smalls::resolver", instance = instance_name, "queued generic instance");
        self.queue.push_back(PendingBody {
            instance: idx,
            owner: module,
            fn_id,
            subst,
            trail,
        });
        Some(idx)
    }

    /// 实例化泛型类型（struct / sum / newtype / alias）
    pub(super) fn instantiate_type(
        &mut self,
        module: ModuleId,
        decl: DeclId,
        args: Vec<TypeId>,
        range: SourceRange,
    ) -> TypeId {
        let Some(ast) = self.ast_of(module) else {
            self.error(range, "generic type source is not available");
            return TypeId::ERROR;
        };
        let d = ast.decl(decl);
        let (name, params) = match &d.kind {
            DeclKind::Struct(s) => (&s.name, &s.generic_params),
            DeclKind::Sum(s) => (&s.name, &s.generic_params),
            DeclKind::Newtype {
                name,
                generic_params,
                ..
            }
            | DeclKind::Alias {
                name,
                generic_params,
                ..
            } => (name, generic_params),
            _ => {
                self.error(range, "not a generic type");
                return TypeId::ERROR;
            }
        };
        if params.len() != args.len() {
            self.error(
                range,
                format!(
                    "generic type '{}' takes {} type argument(s), got {}",
                    name.name,
                    params.len(),
                    args.len()
                ),
            );
            return TypeId::ERROR;
        }
        let subst: HashMap<String, TypeId> = params.iter().cloned().zip(args.iter().copied()).collect();

        if let DeclKind::Alias { target, .. } = &d.kind {
            return self.resolve_type(target, module, &subst);
        }

        let template = format!("{}.{}", self.module_path_of(module), name.name);
        if let Some(id) = self.types.instance(&template, &args) {
            return id;
        }
        let id = self.types.reserve_instance(&template, &args);
        match &d.kind {
            DeclKind::Struct(s) => {
                let mut fields = Vec::new();
                for list in &s.fields {
                    let ty = self.resolve_type(&list.ty, module, &subst);
                    for n in &list.names {
                        fields.push((n.name.clone(), ty));
                    }
                }
                self.types.define_struct(id, fields);
                if crate::compiler::ast::find_annotation(&d.annotations, "value_type").is_some() {
                    self.types.set_value_type(id, true);
                }
            }
            DeclKind::Sum(s) => {
                let mut variants = Vec::new();
                for v in &s.variants {
                    let payload = self.variant_payload(&v.payload, module, &subst);
                    variants.push((v.name.name.clone(), payload));
                }
                self.types.define_sum(id, variants);
            }
            DeclKind::Newtype { wrapped, .. } => {
                let inner = self.resolve_type(wrapped, module, &subst);
                self.types.define_newtype(id, inner);
            }
            _ => {}
        }
        tracing::trace!(target: "smalls::resolver", ty = self.types.name(id), "instantiated type");
        id
    }

    /// 变体载荷：无、单个类型或元组
    pub(super) fn variant_payload(
        &mut self,
        payload: &[TypeExpr],
        module: ModuleId,
        subst: &HashMap<String, TypeId>,
    ) -> Option<TypeId> {
        match payload.len() {
            0 => None,
            1 => Some(self.resolve_type(&payload[0], module, subst)),
            _ => {
                let items: Vec<TypeId> = payload
                    .iter()
                    .map(|p| self.resolve_type(p, module, subst))
                    .collect();
                Some(self.types.tuple_of(items))
            }
        }
    }

    /// `Some(5)` 之类的泛型变体构造：从期望类型或载荷推断和类型实例
    pub(super) fn infer_variant_sum(
        &mut self,
        module: ModuleId,
        decl: DeclId,
        index: u32,
        arg_types: &[TypeId],
        expected: Option<TypeId>,
        range: SourceRange,
    ) -> Option<TypeId> {
        let template = self.qualified_decl_name(module, decl)?;
        if let Some(exp) = expected {
            if self.types.get(exp).template.as_deref() == Some(template.as_str()) {
                return Some(exp);
            }
        }
        let ast = self.ast_of(module)?;
        let DeclKind::Sum(sum) = &ast.decl(decl).kind else {
            return None;
        };
        let variant = sum.variants.get(index as usize)?;
        let mut bindings = HashMap::new();
        for (te, actual) in variant.payload.iter().zip(arg_types) {
            if let Err(c) = self.unify(te, *actual, module, &mut bindings) {
                let msg = format!(
                    "generic inference failed for '{}': '${}' bound to both {} and {}",
                    variant.name.name,
                    c.param,
                    self.type_name(c.first),
                    self.type_name(c.second)
                );
                self.error(range, msg);
                return None;
            }
        }
        let mut args = Vec::new();
        for p in &sum.generic_params {
            match bindings.get(p) {
                Some(t) => args.push(*t),
                None => {
                    self.error(
                        range,
                        format!(
                            "could not infer type ${} for variant '{}'",
                            p, variant.name.name
                        ),
                    );
                    return None;
                }
            }
        }
        Some(self.instantiate_type(module, decl, args, range))
    }
}

#[cfg(test)]
mod tests {
    use super::super::test_env::{messages, resolve_source};
    use super::super::InstanceKind;

    #[test]
    fn test_instances_are_cached() {
        let src = "fn id(x: $T): $T { return x; }\n\
            fn f(): int { var a = id(1); var b = id(2); var s = id(\"s\"); return a + b; }";
        let (resolved, ctx, _) = resolve_source(src);
        assert_eq!(ctx.errors(), 0, "{:?}", messages(&ctx));
        let instances: Vec<&str> = resolved
            .functions
            .iter()
            .filter(|f| matches!(f.kind, InstanceKind::Function(_)) && f.name.contains('!'))
            .map(|f| f.name.as_str())
            .collect();
        assert_eq!(instances, vec!["id!(int)", "id!(string)"]);
        assert_eq!(resolved.template_count, 1);
    }

    #[test]
    fn test_conflicting_bindings_report_every_argument() {
        let src = "fn pick(a: $T, b: $T): $T { return a; }\nfn f() { pick(1, 2.0); }";
        let (_, ctx, _) = resolve_source(src);
        let diag = ctx
            .diagnostics()
            .iter()
            .find(|d| d.message.contains("generic inference failed"))
            .cloned();
        let diag = diag.expect("missing inference diagnostic");
        assert_eq!(diag.notes.len(), 2);
        assert!(diag.notes[1].contains("expected int, got float"));
    }

    #[test]
    fn test_return_only_param_cannot_be_inferred() {
        let src = "fn make(): $T { var x: $T; return x; }\nfn f() { make(); }";
        let (_, ctx, _) = resolve_source(src);
        assert!(messages(&ctx).iter().any(|m| m.contains("could not infer type $T")));
    }

    #[test]
    fn test_return_only_param_ignores_expected_type() {
        let src = "fn make(): $T { var x: $T; return x; }\nfn f(): int { var n: int = make(); return make(); }";
        let (_, ctx, _) = resolve_source(src);
        let hits: Vec<_> = ctx
            .diagnostics()
            .iter()
            .filter(|d| d.message.contains("could not infer type $T"))
            .collect();
        assert_eq!(hits.len(), 2, "{:?}", messages(&ctx));
        assert!(hits[0].notes[0].contains("only in the return type"));
    }

    #[test]
    fn test_explicit_args_cover_return_only_param() {
        let src = "fn make(): $T { var x: $T; return x; }\nfn f(): int { return make!(int)(); }";
        let (_, ctx, _) = resolve_source(src);
        assert_eq!(ctx.errors(), 0, "{:?}", messages(&ctx));
    }

    #[test]
    fn test_generic_types_and_variants() {
        let src = "type Option!($T) = Some($T) | None;\n\
            type Pair!($A, $B) { first: $A; second: $B; }\n\
            fn f(): int {\n\
              var o = Some(3);\n\
              var p: Pair!(int, string) = { first = 1, second = \"x\" };\n\
              var n: Option!(int) = None;\n\
              switch (o) { case Some(v): return v + p.first; case None: return 0; }\n\
            }";
        let (_, ctx, types) = resolve_source(src);
        assert_eq!(ctx.errors(), 0, "{:?}", messages(&ctx));
        assert!(types.lookup("test.Option!(int)").is_some());
        assert!(types.lookup("test.Pair!(int, string)").is_some());
    }

    #[test]
    fn test_errors_inside_instances_carry_trail() {
        let src = "fn neg(x: $T): $T { return -x; }\nfn f() { neg(\"s\"); }";
        let (_, ctx, _) = resolve_source(src);
        let diag = ctx
            .diagnostics()
            .iter()
            .find(|d| d.message.contains("operator '-'"))
            .cloned()
            .expect("missing operator diagnostic");
        assert!(diag.notes.iter().any(|n| n.contains("neg!(string)")));
    }
}
