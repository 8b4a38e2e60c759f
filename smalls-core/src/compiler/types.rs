//! 运行时类型表
//!
//! 所有模块共享一张表。原始类型预先注册；结构化类型（数组、映射、元组、
//! 函数）按结构键驻留；用户类型先 `reserve` 占位再 `define_*` 补全，
//! 以支持相互引用。泛型实例按 `(模板, 实参)` 缓存。

use std::collections::HashMap;
use std::fmt;

use serde::Serialize;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Default)]
pub struct TypeId(pub u32);

impl TypeId {
    pub const VOID: TypeId = TypeId(0);
    pub const INT: TypeId = TypeId(1);
    pub const FLOAT: TypeId = TypeId(2);
    pub const BOOL: TypeId = TypeId(3);
    pub const STRING: TypeId = TypeId(4);
    pub const OBJECT: TypeId = TypeId(5);
    pub const ANY: TypeId = TypeId(6);
    pub const ANY_ARRAY: TypeId = TypeId(7);
    pub const ANY_MAP: TypeId = TypeId(8);
    /// 出错表达式的类型，用于抑制级联错误
    pub const ERROR: TypeId = TypeId(9);

    pub fn index(self) -> usize {
        self.0 as usize
    }

    pub fn is_error(self) -> bool {
        self == TypeId::ERROR
    }
}

impl fmt::Display for TypeId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "#{}", self.0)
    }
}

#[derive(Debug, Clone, PartialEq)]
pub struct FieldDef {
    pub name: String,
    pub ty: TypeId,
    pub offset: u32,
}

#[derive(Debug, Clone, PartialEq, Default)]
pub struct StructDef {
    pub fields: Vec<FieldDef>,
}

impl StructDef {
    pub fn field_index(&self, name: &str) -> Option<usize> {
        self.fields.iter().position(|f| f.name == name)
    }
}

#[derive(Debug, Clone, PartialEq)]
pub struct VariantDef {
    pub name: String,
    pub tag: u32,
    /// 多个载荷时为元组类型
    pub payload: Option<TypeId>,
}

#[derive(Debug, Clone, PartialEq, Default)]
pub struct SumDef {
    pub variants: Vec<VariantDef>,
    pub union_offset: u32,
}

impl SumDef {
    pub fn variant_index(&self, name: &str) -> Option<usize> {
        self.variants.iter().position(|v| v.name == name)
    }
}

#[derive(Debug, Clone, PartialEq)]
pub enum TypeKind {
    Void,
    Int,
    Float,
    Bool,
    String,
    Object,
    Any,
    AnyArray,
    AnyMap,
    Error,
    Array(TypeId),
    FixedArray { elem: TypeId, len: u32 },
    Map { key: TypeId, value: TypeId },
    Tuple(Vec<TypeId>),
    Function { params: Vec<TypeId>, ret: TypeId },
    Struct(StructDef),
    Newtype(TypeId),
    Sum(SumDef),
    Opaque,
    /// 宿主句柄类型
    Handle { tag: u32 },
    /// 已占位、尚未定义
    Pending,
}

#[derive(Debug, Clone)]
pub struct TypeDef {
    /// 用户类型带模块前缀，原始类型不带
    pub name: String,
    pub kind: TypeKind,
    pub size: u32,
    pub alignment: u32,
    /// 泛型实例的实参
    pub type_params: Vec<TypeId>,
    /// 泛型实例所属模板（限定名）
    pub template: Option<String>,
    /// `[[value_type]]`：赋值与传参时复制
    pub value_type: bool,
    /// `[[propset]]`
    pub propset: bool,
    /// 是否含需要 GC 追踪的引用
    pub contains_heap_refs: bool,
}

impl TypeDef {
    fn new(name: impl Into<String>, kind: TypeKind, size: u32, alignment: u32) -> Self {
        Self {
            name: name.into(),
            kind,
            size,
            alignment,
            type_params: Vec::new(),
            template: None,
            value_type: false,
            propset: false,
            contains_heap_refs: false,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Hash)]
enum StructuralKey {
    Array(TypeId),
    FixedArray(TypeId, u32),
    Map(TypeId, TypeId),
    Tuple(Vec<TypeId>),
    Function(Vec<TypeId>, TypeId),
}

/// 堆引用（字符串、容器、闭包）的宽度
pub const HEAP_REF_SIZE: u32 = 4;
/// 对象句柄 `{id: u32, generation: u16, kind: u16}`
pub const OBJECT_HANDLE_SIZE: u32 = 8;

#[derive(Debug, Clone)]
pub struct TypeTable {
    types: Vec<TypeDef>,
    by_name: HashMap<String, TypeId>,
    structural: HashMap<StructuralKey, TypeId>,
    instances: HashMap<(String, Vec<TypeId>), TypeId>,
}

impl Default for TypeTable {
    fn default() -> Self {
        Self::new()
    }
}

fn align_to(offset: u32, align: u32) -> u32 {
    let align = align.max(1);
    (offset + align - 1) & !(align - 1)
}

impl TypeTable {
    pub fn new() -> Self {
        let mut table = Self {
            types: Vec::new(),
            by_name: HashMap::new(),
            structural: HashMap::new(),
            instances: HashMap::new(),
        };
        let builtins = [
            ("void", TypeKind::Void, 0, 1),
            ("int", TypeKind::Int, 4, 4),
            ("float", TypeKind::Float, 4, 4),
            ("bool", TypeKind::Bool, 1, 1),
            ("string", TypeKind::String, HEAP_REF_SIZE, 4),
            ("object", TypeKind::Object, OBJECT_HANDLE_SIZE, 4),
            ("any", TypeKind::Any, 8, 4),
            ("array!(?)", TypeKind::AnyArray, HEAP_REF_SIZE, 4),
            ("map!(?, ?)", TypeKind::AnyMap, HEAP_REF_SIZE, 4),
            ("<error>", TypeKind::Error, 0, 1),
        ];
        for (name, kind, size, align) in builtins {
            table.push(TypeDef::new(name, kind, size, align));
        }
        table
    }

    fn push(&mut self, def: TypeDef) -> TypeId {
        let id = TypeId(self.types.len() as u32);
        self.by_name.insert(def.name.clone(), id);
        self.types.push(def);
        id
    }

    pub fn len(&self) -> usize {
        self.types.len()
    }

    pub fn is_empty(&self) -> bool {
        self.types.is_empty()
    }

    pub fn get(&self, id: TypeId) -> &TypeDef {
        &self.types[id.index().min(self.types.len() - 1)]
    }

    pub fn try_get(&self, id: TypeId) -> Option<&TypeDef> {
        self.types.get(id.index())
    }

    pub fn kind(&self, id: TypeId) -> &TypeKind {
        &self.get(id).kind
    }

    pub fn name(&self, id: TypeId) -> &str {
        &self.get(id).name
    }

    pub fn lookup(&self, name: &str) -> Option<TypeId> {
        self.by_name.get(name).copied()
    }

    // ===== 结构化类型 =====

    fn intern_structural(&mut self, key: StructuralKey, def: impl FnOnce(&Self) -> TypeDef) -> TypeId {
        if let Some(id) = self.structural.get(&key) {
            return *id;
        }
        let def = def(self);
        let id = self.push(def);
        self.structural.insert(key, id);
        id
    }

    pub fn array_of(&mut self, elem: TypeId) -> TypeId {
        self.intern_structural(StructuralKey::Array(elem), |t| {
            let mut def = TypeDef::new(
                format!("array!({})", t.name(elem)),
                TypeKind::Array(elem),
                HEAP_REF_SIZE,
                4,
            );
            def.type_params = vec![elem];
            def.contains_heap_refs = true;
            def
        })
    }

    pub fn fixed_array_of(&mut self, elem: TypeId, len: u32) -> TypeId {
        self.intern_structural(StructuralKey::FixedArray(elem, len), |t| {
            let e = t.get(elem);
            let mut def = TypeDef::new(
                format!("{}[{}]", e.name, len),
                TypeKind::FixedArray { elem, len },
                e.size * len,
                e.alignment.max(1),
            );
            def.type_params = vec![elem];
            def.value_type = true;
            def.contains_heap_refs = t.is_heap_type(elem) || e.contains_heap_refs;
            def
        })
    }

    pub fn map_of(&mut self, key: TypeId, value: TypeId) -> TypeId {
        self.intern_structural(StructuralKey::Map(key, value), |t| {
            let mut def = TypeDef::new(
                format!("map!({}, {})", t.name(key), t.name(value)),
                TypeKind::Map { key, value },
                HEAP_REF_SIZE,
                4,
            );
            def.type_params = vec![key, value];
            def.contains_heap_refs = true;
            def
        })
    }

    pub fn tuple_of(&mut self, items: Vec<TypeId>) -> TypeId {
        self.intern_structural(StructuralKey::Tuple(items.clone()), |t| {
            let names: Vec<&str> = items.iter().map(|i| t.name(*i)).collect();
            let (size, align, heap) = t.aggregate_layout(&items).1;
            let mut def = TypeDef::new(
                format!("({})", names.join(", ")),
                TypeKind::Tuple(items.clone()),
                size,
                align,
            );
            def.type_params = items.clone();
            def.contains_heap_refs = heap;
            def
        })
    }

    pub fn function_of(&mut self, params: Vec<TypeId>, ret: TypeId) -> TypeId {
        self.intern_structural(StructuralKey::Function(params.clone(), ret), |t| {
            let names: Vec<&str> = params.iter().map(|i| t.name(*i)).collect();
            let name = if ret == TypeId::VOID {
                format!("fn({})", names.join(", "))
            } else {
                format!("fn({}): {}", names.join(", "), t.name(ret))
            };
            let mut def = TypeDef::new(
                name,
                TypeKind::Function {
                    params: params.clone(),
                    ret,
                },
                HEAP_REF_SIZE,
                4,
            );
            def.contains_heap_refs = true;
            def
        })
    }

    /// 按自然对齐排布一组成员，返回各偏移与 (size, align, 含堆引用)
    fn aggregate_layout(&self, members: &[TypeId]) -> (Vec<u32>, (u32, u32, bool)) {
        let mut offsets = Vec::with_capacity(members.len());
        let mut offset = 0u32;
        let mut align = 1u32;
        let mut heap = false;
        for m in members {
            let def = self.get(*m);
            let a = def.alignment.max(1);
            offset = align_to(offset, a);
            offsets.push(offset);
            offset += def.size;
            align = align.max(a);
            heap |= self.is_heap_type(*m) || def.contains_heap_refs;
        }
        (offsets, (align_to(offset, align), align, heap))
    }

    // ===== 名义类型 =====

    /// 为用户类型占位，名字重复时返回已有 id
    pub fn reserve(&mut self, qualified_name: &str) -> TypeId {
        if let Some(id) = self.lookup(qualified_name) {
            return id;
        }
        self.push(TypeDef::new(qualified_name, TypeKind::Pending, 0, 1))
    }

    pub fn is_pending(&self, id: TypeId) -> bool {
        matches!(self.kind(id), TypeKind::Pending)
    }

    pub fn define_struct(&mut self, id: TypeId, fields: Vec<(String, TypeId)>) {
        let members: Vec<TypeId> = fields.iter().map(|f| f.1).collect();
        let (offsets, (size, align, heap)) = self.aggregate_layout(&members);
        let fields = fields
            .into_iter()
            .zip(offsets)
            .map(|((name, ty), offset)| FieldDef { name, ty, offset })
            .collect();
        let def = &mut self.types[id.index()];
        def.kind = TypeKind::Struct(StructDef { fields });
        def.size = size;
        def.alignment = align;
        def.contains_heap_refs = heap;
    }

    pub fn define_newtype(&mut self, id: TypeId, wrapped: TypeId) {
        let (size, align, heap) = {
            let w = self.get(wrapped);
            (w.size, w.alignment, self.is_heap_type(wrapped) || w.contains_heap_refs)
        };
        let def = &mut self.types[id.index()];
        def.kind = TypeKind::Newtype(wrapped);
        def.size = size;
        def.alignment = align;
        def.contains_heap_refs = heap;
    }

    /// 和类型布局：u32 tag + 按最大载荷对齐的 union
    pub fn define_sum(&mut self, id: TypeId, variants: Vec<(String, Option<TypeId>)>) {
        let mut max_size = 0u32;
        let mut max_align = 4u32;
        let mut heap = false;
        for (_, payload) in &variants {
            if let Some(p) = payload {
                let d = self.get(*p);
                max_size = max_size.max(d.size);
                max_align = max_align.max(d.alignment.max(1));
                heap |= self.is_heap_type(*p) || d.contains_heap_refs;
            }
        }
        let union_offset = align_to(4, max_align);
        let size = align_to(union_offset + max_size, max_align);
        let variants = variants
            .into_iter()
            .enumerate()
            .map(|(i, (name, payload))| VariantDef {
                name,
                tag: i as u32,
                payload,
            })
            .collect();
        let def = &mut self.types[id.index()];
        def.kind = TypeKind::Sum(SumDef {
            variants,
            union_offset,
        });
        def.size = size;
        def.alignment = max_align;
        def.contains_heap_refs = heap;
    }

    pub fn define_opaque(&mut self, id: TypeId, size: u32, alignment: u32) {
        let def = &mut self.types[id.index()];
        def.kind = TypeKind::Opaque;
        def.size = size;
        def.alignment = alignment.max(1);
    }

    pub fn define_handle(&mut self, id: TypeId, tag: u32) {
        let def = &mut self.types[id.index()];
        def.kind = TypeKind::Handle { tag };
        def.size = 8;
        def.alignment = 4;
    }

    pub fn set_value_type(&mut self, id: TypeId, on: bool) {
        self.types[id.index()].value_type = on;
    }

    pub fn set_propset(&mut self, id: TypeId, on: bool) {
        self.types[id.index()].propset = on;
    }

    // ===== 泛型实例缓存 =====

    pub fn instance(&self, template: &str, args: &[TypeId]) -> Option<TypeId> {
        self.instances
            .get(&(template.to_string(), args.to_vec()))
            .copied()
    }

    /// 为泛型实例占位并登记缓存，名字形如 `main.Box!(int)`
    pub fn reserve_instance(&mut self, template: &str, args: &[TypeId]) -> TypeId {
        if let Some(id) = self.instance(template, args) {
            return id;
        }
        let names: Vec<&str> = args.iter().map(|a| self.name(*a)).collect();
        let name = format!("{}!({})", template, names.join(", "));
        let id = self.reserve(&name);
        let def = &mut self.types[id.index()];
        def.type_params = args.to_vec();
        def.template = Some(template.to_string());
        self.instances.insert((template.to_string(), args.to_vec()), id);
        id
    }

    pub fn instance_count(&self) -> usize {
        self.instances.len()
    }

    // ===== 查询 =====

    /// 值是否存放在 GC 堆上
    pub fn is_heap_type(&self, id: TypeId) -> bool {
        match self.kind(id) {
            TypeKind::String
            | TypeKind::Array(_)
            | TypeKind::FixedArray { .. }
            | TypeKind::Map { .. }
            | TypeKind::Tuple(_)
            | TypeKind::Function { .. }
            | TypeKind::Struct(_)
            | TypeKind::Sum(_)
            | TypeKind::AnyArray
            | TypeKind::AnyMap => true,
            TypeKind::Newtype(inner) => self.is_heap_type(*inner),
            _ => false,
        }
    }

    /// 绑定、赋值、传参时是否复制
    pub fn has_value_semantics(&self, id: TypeId) -> bool {
        let def = self.get(id);
        match &def.kind {
            TypeKind::FixedArray { .. } => true,
            TypeKind::Struct(_) => def.value_type,
            _ => false,
        }
    }

    pub fn is_numeric(&self, id: TypeId) -> bool {
        id == TypeId::INT || id == TypeId::FLOAT
    }

    pub fn is_primitive(&self, id: TypeId) -> bool {
        matches!(
            self.kind(id),
            TypeKind::Int | TypeKind::Float | TypeKind::Bool | TypeKind::String
        )
    }

    pub fn struct_def(&self, id: TypeId) -> Option<&StructDef> {
        match self.kind(id) {
            TypeKind::Struct(s) => Some(s),
            _ => None,
        }
    }

    pub fn sum_def(&self, id: TypeId) -> Option<&SumDef> {
        match self.kind(id) {
            TypeKind::Sum(s) => Some(s),
            _ => None,
        }
    }

    pub fn newtype_inner(&self, id: TypeId) -> Option<TypeId> {
        match self.kind(id) {
            TypeKind::Newtype(inner) => Some(*inner),
            _ => None,
        }
    }

    pub fn array_elem(&self, id: TypeId) -> Option<TypeId> {
        match self.kind(id) {
            TypeKind::Array(e) | TypeKind::FixedArray { elem: e, .. } => Some(*e),
            _ => None,
        }
    }

    pub fn tuple_items(&self, id: TypeId) -> Option<&[TypeId]> {
        match self.kind(id) {
            TypeKind::Tuple(items) => Some(items),
            _ => None,
        }
    }

    /// 原生签名中的通配匹配：`any` 匹配一切，`any_array` 匹配任意数组，
    /// `any_map` 匹配任意映射，其余要求完全一致
    pub fn native_compatible(&self, declared: TypeId, actual: TypeId) -> bool {
        if declared == actual || declared == TypeId::ANY || actual.is_error() {
            return true;
        }
        match (self.kind(declared), self.kind(actual)) {
            (TypeKind::AnyArray, TypeKind::Array(_)) => true,
            (TypeKind::AnyMap, TypeKind::Map { .. }) => true,
            _ => false,
        }
    }

    pub fn iter(&self) -> impl Iterator<Item = (TypeId, &TypeDef)> {
        self.types
            .iter()
            .enumerate()
            .map(|(i, t)| (TypeId(i as u32), t))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_primitives_registered() {
        let table = TypeTable::new();
        assert_eq!(table.lookup("int"), Some(TypeId::INT));
        assert_eq!(table.lookup("string"), Some(TypeId::STRING));
        assert_eq!(table.get(TypeId::INT).size, 4);
        assert_eq!(table.get(TypeId::OBJECT).size, 8);
    }

    #[test]
    fn test_structural_interning() {
        let mut table = TypeTable::new();
        let a = table.array_of(TypeId::INT);
        let b = table.array_of(TypeId::INT);
        assert_eq!(a, b);
        assert_eq!(table.name(a), "array!(int)");
        let m = table.map_of(TypeId::STRING, a);
        assert_eq!(table.name(m), "map!(string, array!(int))");
        let t = table.tuple_of(vec![TypeId::INT, TypeId::FLOAT]);
        assert_eq!(table.tuple_of(vec![TypeId::INT, TypeId::FLOAT]), t);
        assert_ne!(table.tuple_of(vec![TypeId::FLOAT, TypeId::INT]), t);
    }

    #[test]
    fn test_struct_layout_natural_alignment() {
        let mut table = TypeTable::new();
        let id = table.reserve("main.S");
        table.define_struct(
            id,
            vec![
                ("flag".into(), TypeId::BOOL),
                ("n".into(), TypeId::INT),
                ("b".into(), TypeId::BOOL),
            ],
        );
        let def = table.struct_def(id).unwrap();
        assert_eq!(def.fields[1].offset, 4);
        assert_eq!(def.fields[2].offset, 8);
        assert_eq!(table.get(id).size, 12);
        assert_eq!(table.get(id).alignment, 4);
    }

    #[test]
    fn test_sum_layout() {
        let mut table = TypeTable::new();
        let id = table.reserve("main.R");
        table.define_sum(
            id,
            vec![("Ok".into(), Some(TypeId::INT)), ("Err".into(), None)],
        );
        let def = table.sum_def(id).unwrap();
        assert_eq!(def.union_offset, 4);
        assert_eq!(def.variants[1].tag, 1);
        assert_eq!(table.get(id).size, 8);
    }

    #[test]
    fn test_generic_instance_cache() {
        let mut table = TypeTable::new();
        let a = table.reserve_instance("main.Box", &[TypeId::INT]);
        assert_eq!(table.name(a), "main.Box!(int)");
        assert_eq!(table.instance("main.Box", &[TypeId::INT]), Some(a));
        assert_eq!(table.reserve_instance("main.Box", &[TypeId::INT]), a);
        assert!(table.instance("main.Box", &[TypeId::FLOAT]).is_none());
    }

    #[test]
    fn test_native_wildcards() {
        let mut table = TypeTable::new();
        let arr = table.array_of(TypeId::STRING);
        let map = table.map_of(TypeId::INT, TypeId::INT);
        assert!(table.native_compatible(TypeId::ANY, TypeId::FLOAT));
        assert!(table.native_compatible(TypeId::ANY_ARRAY, arr));
        assert!(!table.native_compatible(TypeId::ANY_ARRAY, map));
        assert!(table.native_compatible(TypeId::ANY_MAP, map));
        assert!(!table.native_compatible(TypeId::INT, TypeId::FLOAT));
    }
}
