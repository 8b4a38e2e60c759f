//! 类型表达式解析

use std::collections::HashMap;

use crate::compiler::ast::{DeclKind, TypeExpr, TypeExprKind};
use crate::compiler::types::{TypeId, TypeKind};
use crate::kit::SourceRange;

use super::const_eval::{ConstScope, ConstValue};
use super::{ModuleId, Resolver, Symbol};

impl<'a> Resolver<'a> {
    /// 在 `module` 的作用域中解析类型，`subst` 提供泛型参数的绑定
    pub(super) fn resolve_type(
        &mut self,
        te: &TypeExpr,
        module: ModuleId,
        subst: &HashMap<String, TypeId>,
    ) -> TypeId {
        match &te.kind {
            TypeExprKind::Param(name) => match subst.get(name) {
                Some(t) => *t,
                None => {
                    self.error(te.range, format!("unbound type parameter '${}'", name));
                    TypeId::ERROR
                }
            },
            TypeExprKind::DynArray(elem) => {
                let e = self.resolve_type(elem, module, subst);
                if e.is_error() {
                    return e;
                }
                self.types.array_of(e)
            }
            TypeExprKind::FixedArray { elem, size } => {
                let e = self.resolve_type(elem, module, subst);
                let len = self.fixed_array_len(*size, module, subst);
                match (e.is_error(), len) {
                    (false, Some(n)) => self.types.fixed_array_of(e, n),
                    _ => TypeId::ERROR,
                }
            }
            TypeExprKind::Tuple(items) => {
                let items: Vec<TypeId> = items
                    .iter()
                    .map(|i| self.resolve_type(i, module, subst))
                    .collect();
                if items.iter().any(|t| t.is_error()) {
                    return TypeId::ERROR;
                }
                self.types.tuple_of(items)
            }
            TypeExprKind::Function { params, ret } => {
                let params: Vec<TypeId> = params
                    .iter()
                    .map(|p| self.resolve_type(p, module, subst))
                    .collect();
                let ret = match ret {
                    Some(r) => self.resolve_type(r, module, subst),
                    None => TypeId::VOID,
                };
                self.types.function_of(params, ret)
            }
            TypeExprKind::Named { path, params } => {
                self.resolve_named_type(path, params, te.range, module, subst)
            }
        }
    }

    fn fixed_array_len(
        &mut self,
        size: crate::compiler::ast::ExprId,
        module: ModuleId,
        subst: &HashMap<String, TypeId>,
    ) -> Option<u32> {
        let Some(ast) = self.ast_of(module) else {
            return None;
        };
        let scope = ConstScope {
            module,
            locals: module == self.body.owner && !self.body.frames.is_empty(),
            subst: subst.clone(),
        };
        let range = ast.expr(size).range;
        match self.eval_const_reported(size, Some(TypeId::INT), &scope, &ast)? {
            ConstValue::Int(n) if n > 0 => Some(n as u32),
            _ => {
                self.error(range, "fixed array size must be a positive int");
                None
            }
        }
    }

    fn resolve_named_type(
        &mut self,
        path: &[String],
        params: &[TypeExpr],
        range: SourceRange,
        module: ModuleId,
        subst: &HashMap<String, TypeId>,
    ) -> TypeId {
        let args: Vec<TypeId> = params
            .iter()
            .map(|p| self.resolve_type(p, module, subst))
            .collect();
        if args.iter().any(|a| a.is_error()) {
            return TypeId::ERROR;
        }

        if path.len() == 1 {
            if let Some(t) = self.builtin_type(&path[0], &args, range) {
                return t;
            }
        }

        let display = path.join(".");
        let sym = if path.len() == 1 {
            self.lookup_top(module, &path[0]).map(|s| s.0)
        } else {
            match self.lookup_top(module, &path[0]) {
                Some((Symbol::Module(m), _)) if path.len() == 2 => {
                    self.add_dependency(m);
                    self.module_export(m, &path[1])
                }
                _ => None,
            }
        };
        let Some(sym) = sym else {
            self.error(range, format!("unknown type '{}'", display));
            return TypeId::ERROR;
        };

        match sym {
            Symbol::Type(t) => {
                if !args.is_empty() {
                    self.error(range, format!("type '{}' is not generic", display));
                    return TypeId::ERROR;
                }
                t
            }
            Symbol::TypeTemplate { module: tm, decl } => {
                if args.is_empty() {
                    self.error(
                        range,
                        format!("generic type '{}' requires type arguments", display),
                    );
                    return TypeId::ERROR;
                }
                self.instantiate_type(tm, decl, args, range)
            }
            Symbol::PendingAlias { decl } => {
                if !args.is_empty() {
                    self.error(range, format!("type '{}' is not generic", display));
                    return TypeId::ERROR;
                }
                self.resolve_alias(decl)
            }
            _ => {
                self.error(range, format!("'{}' is not a type", display));
                TypeId::ERROR
            }
        }
    }

    fn builtin_type(&mut self, name: &str, args: &[TypeId], range: SourceRange) -> Option<TypeId> {
        let simple = match name {
            "int" => Some(TypeId::INT),
            "float" => Some(TypeId::FLOAT),
            "bool" => Some(TypeId::BOOL),
            "string" => Some(TypeId::STRING),
            "object" => Some(TypeId::OBJECT),
            "void" => Some(TypeId::VOID),
            "any" | "any_array" | "any_map" => {
                if !self.native_signature {
                    self.error(
                        range,
                        format!("'{}' is only allowed in native function signatures", name),
                    );
                    return Some(TypeId::ERROR);
                }
                Some(match name {
                    "any" => TypeId::ANY,
                    "any_array" => TypeId::ANY_ARRAY,
                    _ => TypeId::ANY_MAP,
                })
            }
            _ => None,
        };
        if let Some(t) = simple {
            if !args.is_empty() {
                self.error(range, format!("type '{}' takes no type arguments", name));
                return Some(TypeId::ERROR);
            }
            return Some(t);
        }
        match name {
            "array" => {
                if args.len() != 1 {
                    self.error(range, "array!(T) takes exactly one type argument");
                    return Some(TypeId::ERROR);
                }
                Some(self.types.array_of(args[0]))
            }
            "map" => {
                if args.len() != 2 {
                    self.error(range, "map!(K, V) takes exactly two type arguments");
                    return Some(TypeId::ERROR);
                }
                if !self.check_map_key(args[0], range) {
                    return Some(TypeId::ERROR);
                }
                Some(self.types.map_of(args[0], args[1]))
            }
            _ => None,
        }
    }

    /// 映射键必须可哈希：原始类型，或声明了 `hash` 与 `eq` 的类型；不能是 `object`
    ///
    /// 用户运算符可能在后面才声明，非原始类型记下来在解析结束前统一检查。
    pub(super) fn check_map_key(&mut self, key: TypeId, range: SourceRange) -> bool {
        let primitive = matches!(
            self.types.kind(key),
            TypeKind::Int
                | TypeKind::Float
                | TypeKind::Bool
                | TypeKind::String
                | TypeKind::Any
                | TypeKind::Error
        );
        if primitive {
            return true;
        }
        if self.wraps_object(key) {
            let msg = format!("type {} cannot be used as a map key", self.type_name(key));
            self.error_with_notes(range, msg, vec!["map keys must not be object".to_string()]);
            return false;
        }
        if !self.map_keys.iter().any(|(t, _)| *t == key) {
            self.map_keys.push((key, range));
        }
        true
    }

    /// 展开本模块的非泛型别名
    pub(super) fn resolve_alias(&mut self, decl: crate::compiler::ast::DeclId) -> TypeId {
        let ast = self.ast.clone();
        let d = ast.decl(decl);
        let DeclKind::Alias { name, target, .. } = &d.kind else {
            return TypeId::ERROR;
        };
        if self.evaluating.contains(&decl) {
            self.error(name.range, format!("type alias '{}' refers to itself", name.name));
            return TypeId::ERROR;
        }
        self.evaluating.push(decl);
        let ty = self.resolve_type(target, self.module, &HashMap::new());
        self.evaluating.pop();
        self.out.symbols.insert(name.name.clone(), Symbol::Type(ty));
        ty
    }
}

#[cfg(test)]
mod tests {
    use super::super::test_env::{messages, resolve_source};
    use super::*;

    #[test]
    fn test_builtin_and_structural_types() {
        let src = "var a: array!(int);\nvar m: map!(string, float[3]);\nvar t: (int, string);\nvar f: fn(int): bool;";
        let (resolved, ctx, types) = resolve_source(src);
        assert_eq!(ctx.errors(), 0, "{:?}", messages(&ctx));
        let names: Vec<String> = resolved
            .globals
            .iter()
            .map(|g| types.name(g.ty.unwrap_or(TypeId::ERROR)).to_string())
            .collect();
        assert_eq!(
            names,
            vec!["array!(int)", "map!(string, float[3])", "(int, string)", "fn(int): bool"]
        );
    }

    #[test]
    fn test_alias_and_forward_use() {
        let src = "type Ints = int[];\nvar xs: Ints;\ntype Grid = Row[2];\ntype Row = int[N];\nconst N = 4;\nvar g: Grid;";
        let (resolved, ctx, types) = resolve_source(src);
        assert_eq!(ctx.errors(), 0, "{:?}", messages(&ctx));
        let g = resolved.globals[1].ty.unwrap_or(TypeId::ERROR);
        assert_eq!(types.name(g), "int[4][2]");
    }

    #[test]
    fn test_invalid_map_keys() {
        let (_, ctx, _) = resolve_source("var m: map!(object, int);\nvar n: map!(int[], int);");
        assert_eq!(ctx.errors(), 2);
        assert!(messages(&ctx)[0].contains("cannot be used as a map key"));
    }

    #[test]
    fn test_wildcards_rejected_outside_natives() {
        let (_, ctx, _) = resolve_source("var x: any;");
        assert!(messages(&ctx)[0].contains("only allowed in native"));
    }

    #[test]
    fn test_alias_cycle() {
        let (_, ctx, _) = resolve_source("type A = B;\ntype B = A;");
        assert!(messages(&ctx).iter().any(|m| m.contains("refers to itself")));
    }
}
