//! 第一遍：收集顶层声明

use std::collections::HashMap;

use crate::compiler::ast::{
    find_annotation, Annotation, DeclId, DeclKind, FnId, Ident, TypeExpr, TypeExprKind,
};
use crate::compiler::types::TypeId;
use crate::kit::SourceRange;

use super::{CalleeRef, FunctionInstance, GlobalInfo, InstanceKind, Resolver, Symbol};

const FUNCTION_ANNOTATIONS: &[&str] = &["native", "deprecated", "operator"];
const STRUCT_ANNOTATIONS: &[&str] = &[
    "native",
    "value_type",
    "propset",
    "deprecated",
    "editor",
    "replicated",
];
const FIELD_ANNOTATIONS: &[&str] = &["replicated", "deprecated", "editor"];
const TYPE_ANNOTATIONS: &[&str] = &["deprecated"];

/// 已解析、等待写入类型表的用户类型
enum TypeBody {
    Struct(Vec<(String, TypeId)>),
    Sum(Vec<(String, Option<TypeId>)>),
    Newtype(TypeId),
}

impl<'a> Resolver<'a> {
    pub(super) fn collect_declarations(&mut self) {
        let ast = self.ast.clone();
        let items = ast.items.clone();

        // 导入
        for &decl in &items {
            self.collect_import(decl);
        }
        // 类型占位
        for &decl in &items {
            self.reserve_type(decl);
        }
        // 全局变量与常量（只登记，不求值）
        for &decl in &items {
            self.declare_globals(decl);
        }
        // 类型定义
        let mut bodies = Vec::new();
        for &decl in &items {
            if let Some(body) = self.resolve_type_body(decl) {
                bodies.push(body);
            }
        }
        // 被引用类型的布局可能在首轮时尚未确定，定义两轮
        for _ in 0..2 {
            for (id, body) in &bodies {
                match body {
                    TypeBody::Struct(fields) => self.types.define_struct(*id, fields.clone()),
                    TypeBody::Sum(variants) => self.types.define_sum(*id, variants.clone()),
                    TypeBody::Newtype(inner) => self.types.define_newtype(*id, *inner),
                }
            }
        }
        for &decl in &items {
            self.apply_type_annotations(decl);
        }
        for &decl in &items {
            if let DeclKind::Alias {
                generic_params, ..
            } = &ast.decl(decl).kind
            {
                if generic_params.is_empty() {
                    if let Some(Symbol::PendingAlias { decl }) = self.alias_symbol(decl) {
                        self.resolve_alias(decl);
                    }
                }
            }
        }
        // 函数签名
        for &decl in &items {
            if let DeclKind::Function(fn_id) = ast.decl(decl).kind {
                self.declare_function(fn_id);
            }
        }
        // 常量求值
        for &decl in &items {
            if let DeclKind::Var(v) = &ast.decl(decl).kind {
                if v.is_const {
                    for (i, name) in v.names.iter().enumerate() {
                        if let Some(Symbol::PendingConst { .. }) = self.out.symbols.get(&name.name) {
                            self.evaluate_global_const(decl, i);
                        }
                    }
                }
            }
        }
        if !self.out.globals.is_empty() {
            let info = self.new_info();
            let idx = self.push_instance(FunctionInstance {
                name: "__init".into(),
                owner: self.module,
                kind: InstanceKind::Init,
                info,
                params: Vec::new(),
                ret: TypeId::VOID,
                captures: Vec::new(),
                range: SourceRange::default(),
            });
            self.out.init = Some(idx);
        }
    }

    fn alias_symbol(&self, decl: DeclId) -> Option<Symbol> {
        let name = self.ast.decl(decl).name(&self.ast)?;
        self.out.symbols.get(&name.name).cloned()
    }

    /// 登记本模块声明的名字
    fn declare(&mut self, name: &Ident, sym: Symbol) {
        if self.out.symbols.contains_key(&name.name) {
            self.error(
                name.range,
                format!("duplicate declaration of '{}'", name.name),
            );
            return;
        }
        self.local_names.insert(name.name.clone());
        self.out.symbols.insert(name.name.clone(), sym);
    }

    fn declare_import(&mut self, name: &Ident, sym: Symbol) {
        if self.out.symbols.contains_key(&name.name) {
            self.error(
                name.range,
                format!("duplicate declaration of '{}'", name.name),
            );
            return;
        }
        self.out.symbols.insert(name.name.clone(), sym);
    }

    fn qualified(&self, name: &str) -> String {
        format!("{}.{}", self.out.path, name)
    }

    fn validate_annotations(&mut self, annotations: &[Annotation], allowed: &[&str], what: &str) {
        for a in annotations {
            if !allowed.contains(&a.name.as_str()) {
                self.error(
                    a.range,
                    format!("unknown annotation '{}' on {}", a.name, what),
                );
            }
        }
    }

    // ===== 导入 =====

    fn collect_import(&mut self, decl: DeclId) {
        let ast = self.ast.clone();
        let d = ast.decl(decl);
        match &d.kind {
            DeclKind::AliasedImport { path, alias } => {
                let path = path.join(".");
                match self.env.module_by_path(&path) {
                    Some(m) => {
                        self.add_dependency(m);
                        self.declare_import(alias, Symbol::Module(m));
                    }
                    None => self.error(d.range, format!("unknown module '{}'", path)),
                }
            }
            DeclKind::SelectiveImport { path, names } => {
                let path = path.join(".");
                let Some(m) = self.env.module_by_path(&path) else {
                    self.error(d.range, format!("unknown module '{}'", path));
                    return;
                };
                self.add_dependency(m);
                for name in names {
                    match self.module_export(m, &name.name) {
                        Some(sym) => {
                            if self.is_deprecated(m, &name.name) {
                                self.out.deprecated.insert(name.name.clone());
                            }
                            self.declare_import(name, sym);
                        }
                        None => self.error(
                            name.range,
                            format!("module '{}' has no export '{}'", path, name.name),
                        ),
                    }
                }
            }
            _ => {}
        }
    }

    // ===== 类型 =====

    fn reserve_type(&mut self, decl: DeclId) {
        let ast = self.ast.clone();
        let d = ast.decl(decl);
        let module = self.module;
        match &d.kind {
            DeclKind::Struct(s) => {
                self.validate_annotations(&d.annotations, STRUCT_ANNOTATIONS, "struct");
                if s.generic_params.is_empty() {
                    let qualified = self.qualified(&s.name.name);
                    let id = self.types.reserve(&qualified);
                    self.declare(&s.name, Symbol::Type(id));
                } else {
                    self.out.template_count += 1;
                    self.declare(&s.name, Symbol::TypeTemplate { module, decl });
                }
                for list in &s.fields {
                    self.validate_annotations(&list.annotations, FIELD_ANNOTATIONS, "field");
                }
            }
            DeclKind::Sum(s) => {
                self.validate_annotations(&d.annotations, TYPE_ANNOTATIONS, "sum type");
                if s.generic_params.is_empty() {
                    let qualified = self.qualified(&s.name.name);
                    let id = self.types.reserve(&qualified);
                    self.declare(&s.name, Symbol::Type(id));
                    for (i, v) in s.variants.iter().enumerate() {
                        self.declare(
                            &v.name,
                            Symbol::Variant {
                                sum: id,
                                index: i as u32,
                            },
                        );
                    }
                } else {
                    self.out.template_count += 1;
                    self.declare(&s.name, Symbol::TypeTemplate { module, decl });
                    for (i, v) in s.variants.iter().enumerate() {
                        self.declare(
                            &v.name,
                            Symbol::VariantTemplate {
                                module,
                                decl,
                                index: i as u32,
                            },
                        );
                    }
                }
            }
            DeclKind::Newtype {
                name,
                generic_params,
                ..
            } => {
                self.validate_annotations(&d.annotations, TYPE_ANNOTATIONS, "newtype");
                if generic_params.is_empty() {
                    let qualified = self.qualified(&name.name);
                    let id = self.types.reserve(&qualified);
                    self.declare(name, Symbol::Type(id));
                } else {
                    self.out.template_count += 1;
                    self.declare(name, Symbol::TypeTemplate { module, decl });
                }
            }
            DeclKind::Alias {
                name,
                generic_params,
                ..
            } => {
                self.validate_annotations(&d.annotations, TYPE_ANNOTATIONS, "type alias");
                if generic_params.is_empty() {
                    self.declare(name, Symbol::PendingAlias { decl });
                } else {
                    self.out.template_count += 1;
                    self.declare(name, Symbol::TypeTemplate { module, decl });
                }
            }
            DeclKind::Opaque { name } => {
                self.validate_annotations(&d.annotations, TYPE_ANNOTATIONS, "opaque type");
                let qualified = self.qualified(&name.name);
                // 宿主已注册（add_opaque_type / handle_type）时沿用其定义
                let id = match self.types.lookup(&qualified) {
                    Some(id) if !self.types.is_pending(id) => id,
                    _ => {
                        let id = self.types.reserve(&qualified);
                        self.types.define_opaque(id, 8, 4);
                        id
                    }
                };
                self.declare(name, Symbol::Type(id));
            }
            _ => {}
        }
        if let Some(name) = d.name(&ast) {
            if find_annotation(&d.annotations, "deprecated").is_some() {
                self.out.deprecated.insert(name.name.clone());
            }
        }
    }

    fn resolve_type_body(&mut self, decl: DeclId) -> Option<(TypeId, TypeBody)> {
        let ast = self.ast.clone();
        let d = ast.decl(decl);
        let empty = HashMap::new();
        let module = self.module;
        match &d.kind {
            DeclKind::Struct(s) if s.generic_params.is_empty() => {
                let Some(Symbol::Type(id)) = self.out.symbols.get(&s.name.name).cloned() else {
                    return None;
                };
                let mut fields: Vec<(String, TypeId)> = Vec::new();
                for list in &s.fields {
                    let ty = self.resolve_type(&list.ty, module, &empty);
                    if ty == id {
                        self.error(
                            list.ty.range,
                            format!("struct '{}' cannot contain itself", s.name.name),
                        );
                    }
                    for n in &list.names {
                        if fields.iter().any(|f| f.0 == n.name) {
                            self.error(n.range, format!("duplicate field '{}'", n.name));
                            continue;
                        }
                        fields.push((n.name.clone(), ty));
                    }
                }
                Some((id, TypeBody::Struct(fields)))
            }
            DeclKind::Sum(s) if s.generic_params.is_empty() => {
                let Some(Symbol::Type(id)) = self.out.symbols.get(&s.name.name).cloned() else {
                    return None;
                };
                let mut variants = Vec::new();
                for v in &s.variants {
                    let payload = self.variant_payload(&v.payload, module, &empty);
                    variants.push((v.name.name.clone(), payload));
                }
                Some((id, TypeBody::Sum(variants)))
            }
            DeclKind::Newtype {
                name,
                generic_params,
                wrapped,
            } if generic_params.is_empty() => {
                let Some(Symbol::Type(id)) = self.out.symbols.get(&name.name).cloned() else {
                    return None;
                };
                let inner = self.resolve_type(wrapped, module, &empty);
                Some((id, TypeBody::Newtype(inner)))
            }
            _ => None,
        }
    }

    /// `[[value_type]]`、`[[propset]]`、`[[native]]` 以及宿主布局校验
    fn apply_type_annotations(&mut self, decl: DeclId) {
        let ast = self.ast.clone();
        let d = ast.decl(decl);
        let DeclKind::Struct(s) = &d.kind else {
            return;
        };
        if !s.generic_params.is_empty() {
            return;
        }
        let Some(Symbol::Type(id)) = self.out.symbols.get(&s.name.name).cloned() else {
            return;
        };
        if find_annotation(&d.annotations, "value_type").is_some() {
            self.types.set_value_type(id, true);
        }
        if find_annotation(&d.annotations, "propset").is_some() {
            self.types.set_propset(id, true);
        }

        let qualified = self.qualified(&s.name.name);
        let is_native = find_annotation(&d.annotations, "native").is_some();
        let host = self.env.native_struct(&qualified);
        let Some(layout) = host else {
            if is_native {
                self.linking_error(
                    s.name.range,
                    format!("native struct '{}' is not registered by the host", qualified),
                );
            }
            return;
        };

        let (size, alignment) = {
            let def = self.types.get(id);
            (def.size, def.alignment)
        };
        if layout.value_type {
            self.types.set_value_type(id, true);
            if layout.size != size || layout.alignment != alignment {
                self.linking_error(
                    s.name.range,
                    format!(
                        "value type '{}' layout mismatch: host size {} align {}, script size {} align {}",
                        qualified, layout.size, layout.alignment, size, alignment
                    ),
                );
            }
        }
        if !is_native {
            return;
        }
        let fields = self
            .types
            .struct_def(id)
            .map(|s| s.fields.clone())
            .unwrap_or_default();
        if fields.len() != layout.fields.len() {
            self.linking_error(
                s.name.range,
                format!(
                    "native struct '{}' has {} fields on the host, {} in script",
                    qualified,
                    layout.fields.len(),
                    fields.len()
                ),
            );
            return;
        }
        for (i, (script, host)) in fields.iter().zip(&layout.fields).enumerate() {
            let script_size = self.types.get(script.ty).size;
            let mismatch = if script.name != host.name {
                Some(format!("expected name '{}', got '{}'", host.name, script.name))
            } else if script.ty != host.ty {
                Some(format!(
                    "expected type {}, got {}",
                    self.type_name(host.ty),
                    self.type_name(script.ty)
                ))
            } else if script.offset != host.offset {
                Some(format!(
                    "expected offset {}, got {}",
                    host.offset, script.offset
                ))
            } else if script_size != host.size {
                Some(format!("expected size {}, got {}", host.size, script_size))
            } else {
                None
            };
            if let Some(m) = mismatch {
                self.linking_error(
                    s.name.range,
                    format!("native struct '{}' field {}: {}", qualified, i + 1, m),
                );
            }
        }
    }

    // ===== 全局变量 =====

    fn declare_globals(&mut self, decl: DeclId) {
        let ast = self.ast.clone();
        let d = ast.decl(decl);
        let DeclKind::Var(v) = &d.kind else {
            return;
        };
        if v.is_const {
            for (index, name) in v.names.iter().enumerate() {
                self.declare(name, Symbol::PendingConst { decl, index });
            }
            return;
        }
        let ty = v
            .ty
            .as_ref()
            .map(|t| self.resolve_type(t, self.module, &HashMap::new()));
        for name in &v.names {
            let index = self.out.global_base + self.out.globals.len() as u32;
            self.out.globals.push(GlobalInfo {
                name: name.name.clone(),
                ty,
                decl,
                range: name.range,
            });
            self.declare(
                name,
                Symbol::Global {
                    index,
                    ty,
                    mutable: true,
                },
            );
        }
    }

    // ===== 函数 =====

    fn declare_function(&mut self, fn_id: FnId) {
        let ast = self.ast.clone();
        let f = ast.function(fn_id);
        self.validate_annotations(&f.annotations, FUNCTION_ANNOTATIONS, "function");
        if find_annotation(&f.annotations, "deprecated").is_some() {
            self.out.deprecated.insert(f.name.name.clone());
        }
        let operator = find_annotation(&f.annotations, "operator").cloned();
        let module = self.module;

        if f.is_generic() {
            if let Some(op) = &operator {
                self.error(op.range, "operator functions cannot be generic");
            }
            match f.body {
                Some(_) => {
                    self.out.template_count += 1;
                    self.declare(&f.name, Symbol::Template { module, fn_id });
                }
                None => {
                    if let Some(native) = self.link_native(fn_id) {
                        self.declare(
                            &f.name,
                            Symbol::Native {
                                module,
                                fn_id,
                                native,
                                ty: None,
                            },
                        );
                    }
                }
            }
            return;
        }

        let empty = HashMap::new();
        self.native_signature = f.body.is_none();
        let params: Vec<TypeId> = f
            .params
            .iter()
            .map(|p| self.resolve_type(&p.ty, module, &empty))
            .collect();
        let ret = match &f.ret {
            Some(r) => self.resolve_type(r, module, &empty),
            None => TypeId::VOID,
        };
        self.native_signature = false;
        let fn_ty = self.types.function_of(params.clone(), ret);

        if f.body.is_none() {
            if let Some(op) = &operator {
                self.error(op.range, "operator functions must have a body");
            }
            if let Some(native) = self.link_native(fn_id) {
                self.declare(
                    &f.name,
                    Symbol::Native {
                        module,
                        fn_id,
                        native,
                        ty: Some(fn_ty),
                    },
                );
            }
            return;
        }

        let info = self.new_info();
        let idx = self.push_instance(FunctionInstance {
            name: f.name.name.clone(),
            owner: module,
            kind: InstanceKind::Function(fn_id),
            info,
            params: params.clone(),
            ret,
            captures: Vec::new(),
            range: f.range,
        });
        let callee = CalleeRef { module, index: idx };
        self.declare(&f.name, Symbol::Function { callee, ty: fn_ty });
        if let Some(op) = operator {
            self.register_operator(&op, &params, ret, callee);
        }
    }

    /// 签名在 ABI 比较中使用的类型；泛型部分换成通配类型
    fn abi_type(&mut self, te: &TypeExpr) -> TypeId {
        if te.mentions_param() {
            return match &te.kind {
                TypeExprKind::DynArray(_) => TypeId::ANY_ARRAY,
                TypeExprKind::Named { path, .. } if path.len() == 1 && path[0] == "array" => {
                    TypeId::ANY_ARRAY
                }
                TypeExprKind::Named { path, .. } if path.len() == 1 && path[0] == "map" => {
                    TypeId::ANY_MAP
                }
                _ => TypeId::ANY,
            };
        }
        if matches!(te.kind, TypeExprKind::Function { .. }) {
            return TypeId::ANY;
        }
        self.native_signature = true;
        let ty = self.resolve_type(te, self.module, &HashMap::new());
        self.native_signature = false;
        ty
    }

    /// 把无函数体的声明绑定到宿主注册的原生函数
    fn link_native(&mut self, fn_id: FnId) -> Option<crate::runtime::native::NativeId> {
        let ast = self.ast.clone();
        let f = ast.function(fn_id);
        let path = self.out.path.clone();
        let Some(sig) = self.env.native_function(&path, &f.name.name) else {
            self.linking_error(
                f.name.range,
                format!("native function '{}.{}' is not registered", path, f.name.name),
            );
            return None;
        };
        if sig.params.len() != f.params.len() {
            self.linking_error(
                f.name.range,
                format!(
                    "native function '{}' takes {} parameter(s) on the host, {} in script",
                    f.name.name,
                    sig.params.len(),
                    f.params.len()
                ),
            );
            return None;
        }
        let mut ok = true;
        for (i, (param, host)) in f.params.iter().zip(&sig.params).enumerate() {
            let script = self.abi_type(&param.ty);
            if !self.abi_compatible(*host, script) {
                let msg = format!(
                    "native function '{}' parameter {}: expected {}, got {}",
                    f.name.name,
                    i + 1,
                    self.type_name(*host),
                    self.type_name(script)
                );
                self.linking_error(param.ty.range, msg);
                ok = false;
            }
        }
        let script_ret = match &f.ret {
            Some(r) => self.abi_type(r),
            None => TypeId::VOID,
        };
        if !self.abi_compatible(sig.ret, script_ret) {
            let msg = format!(
                "native function '{}' return type: expected {}, got {}",
                f.name.name,
                self.type_name(sig.ret),
                self.type_name(script_ret)
            );
            self.linking_error(f.name.range, msg);
            ok = false;
        }
        ok.then_some(sig.id)
    }

    fn abi_compatible(&self, host: TypeId, script: TypeId) -> bool {
        host == script || self.types.native_compatible(host, script) || script.is_error()
    }
}

#[cfg(test)]
mod tests {
    use super::super::test_env::{messages, resolve_source};
    use super::super::Symbol;
    use crate::compiler::types::TypeId;

    #[test]
    fn test_duplicate_declarations() {
        let (_, ctx, _) = resolve_source("fn f() {}\nvar f: int;");
        assert_eq!(ctx.errors(), 1);
        assert!(messages(&ctx)[0].contains("duplicate declaration of 'f'"));
    }

    #[test]
    fn test_mutually_referencing_types() {
        let src = "type Node { value: int; next: Link; }\ntype Link = Next(Node) | End;";
        let (resolved, ctx, types) = resolve_source(src);
        assert_eq!(ctx.errors(), 0, "{:?}", messages(&ctx));
        assert!(matches!(resolved.symbols.get("Next"), Some(Symbol::Variant { index: 0, .. })));
        let node = types.lookup("test.Node").unwrap();
        assert_eq!(types.struct_def(node).unwrap().fields.len(), 2);
    }

    #[test]
    fn test_annotations_are_validated() {
        let src = "[[value_type, propset]] type P { [[editor]] x: int; }\n[[fancy]] fn f() {}";
        let (_, ctx, types) = resolve_source(src);
        assert_eq!(ctx.errors(), 1);
        assert!(messages(&ctx)[0].contains("unknown annotation 'fancy'"));
        let p = types.lookup("test.P").unwrap();
        assert!(types.get(p).value_type);
        assert!(types.get(p).propset);
    }

    #[test]
    fn test_missing_native_is_a_linking_error() {
        let (_, ctx, _) = resolve_source("fn host_only(x: int): int;\n[[native]] type H { a: int; }");
        let diags = ctx.diagnostics();
        assert_eq!(diags.len(), 2);
        assert!(diags
            .iter()
            .all(|d| d.kind == crate::kit::DiagnosticKind::Linking));
    }

    #[test]
    fn test_globals_and_init_instance() {
        let src = "var a = 1;\nvar b, c: float;\nconst K = 3;";
        let (resolved, ctx, _) = resolve_source(src);
        assert_eq!(ctx.errors(), 0, "{:?}", messages(&ctx));
        assert_eq!(resolved.global_count(), 3);
        assert!(resolved.init.is_some());
        assert_eq!(resolved.globals[0].ty, Some(TypeId::INT));
        assert!(matches!(resolved.symbols.get("K"), Some(Symbol::Const { .. })));
    }

    #[test]
    fn test_exports_skip_private_names() {
        let (resolved, _, _) = resolve_source("fn visible() {}\nfn _hidden() {}");
        assert!(resolved.exports.contains_key("visible"));
        assert!(!resolved.exports.contains_key("_hidden"));
    }
}
