//! 原生函数桥
//!
//! 宿主通过 [`ModuleBuilder`] 注册函数、不透明类型、值类型、原生结构体与句柄类型。
//! 解析器在脚本声明 `fn name(...): T;` 时按 [`NativeSignature`] 做 ABI 校验，
//! VM 通过 `NATIVECALL` 调用 [`NativeFn`]。

mod builder;

pub use builder::{ModuleBuilder, StructBuilder};

use std::collections::HashMap;
use std::fmt;
use std::rc::Rc;

use serde::Serialize;

use crate::compiler::types::TypeId;
use crate::runtime::value::{HeapPtr, ObjectHandle, Value};
use crate::runtime::Runtime;

/// 原生函数：可以分配、调用闭包、再次进入 VM；返回 Err 时转为运行时错误
pub type NativeFn = Rc<dyn Fn(&mut Runtime, &NativeCall) -> Result<Value, String>>;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize)]
pub struct NativeId(pub u32);

impl NativeId {
    pub fn index(self) -> usize {
        self.0 as usize
    }
}

/// 解析器看到的原生函数签名
#[derive(Debug, Clone, PartialEq)]
pub struct NativeSignature {
    pub id: NativeId,
    pub params: Vec<TypeId>,
    pub ret: TypeId,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct NativeField {
    pub name: String,
    pub ty: TypeId,
    pub offset: u32,
    pub size: u32,
}

/// 宿主结构体布局，用于 `[[native]]` 结构体与值类型校验
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct NativeStructLayout {
    pub name: String,
    pub size: u32,
    pub alignment: u32,
    pub fields: Vec<NativeField>,
    pub value_type: bool,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct FunctionMetadata {
    pub name: String,
    pub params: Vec<TypeId>,
    pub ret: TypeId,
}

/// `finalize` 记录的模块接口
#[derive(Debug, Clone, PartialEq, Default, Serialize)]
pub struct ModuleInterface {
    pub name: String,
    pub functions: Vec<FunctionMetadata>,
    pub types: Vec<String>,
}

impl ModuleInterface {
    pub fn function(&self, name: &str) -> Option<&FunctionMetadata> {
        self.functions.iter().find(|f| f.name == name)
    }
}

// ==================== 调用参数 ====================

/// 一次原生调用的参数
#[derive(Debug, Clone)]
pub struct NativeCall {
    pub name: String,
    pub args: Vec<Value>,
    /// 调用点的静态返回类型（泛型原生函数据此分配结果）
    pub ret: TypeId,
}

impl NativeCall {
    pub fn new(name: impl Into<String>, args: Vec<Value>, ret: TypeId) -> Self {
        Self {
            name: name.into(),
            args,
            ret,
        }
    }

    pub fn argc(&self) -> usize {
        self.args.len()
    }

    pub fn arg(&self, i: usize) -> Result<Value, String> {
        self.args
            .get(i)
            .copied()
            .ok_or_else(|| format!("{}: missing argument {}", self.name, i + 1))
    }

    pub fn int(&self, i: usize) -> Result<i32, String> {
        self.arg(i)?
            .as_int()
            .ok_or_else(|| self.bad_arg(i, "int"))
    }

    pub fn float(&self, i: usize) -> Result<f32, String> {
        self.arg(i)?
            .as_float()
            .ok_or_else(|| self.bad_arg(i, "float"))
    }

    pub fn bool(&self, i: usize) -> Result<bool, String> {
        self.arg(i)?
            .as_bool()
            .ok_or_else(|| self.bad_arg(i, "bool"))
    }

    pub fn heap(&self, i: usize) -> Result<HeapPtr, String> {
        self.arg(i)?
            .as_heap()
            .ok_or_else(|| self.bad_arg(i, "a heap value"))
    }

    pub fn object(&self, i: usize) -> Result<ObjectHandle, String> {
        self.arg(i)?
            .as_object()
            .ok_or_else(|| self.bad_arg(i, "object"))
    }

    fn bad_arg(&self, i: usize, expected: &str) -> String {
        format!("{}: argument {} is not {}", self.name, i + 1, expected)
    }
}

// ==================== 注册表 ====================

pub struct NativeEntry {
    pub module: String,
    pub name: String,
    pub params: Vec<TypeId>,
    pub ret: TypeId,
    pub func: NativeFn,
}

impl fmt::Debug for NativeEntry {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("NativeEntry")
            .field("module", &self.module)
            .field("name", &self.name)
            .field("params", &self.params)
            .field("ret", &self.ret)
            .finish()
    }
}

#[derive(Debug, Default)]
pub struct NativeRegistry {
    entries: Vec<NativeEntry>,
    by_name: HashMap<(String, String), NativeId>,
    structs: HashMap<String, NativeStructLayout>,
    interfaces: HashMap<String, ModuleInterface>,
    /// 句柄标签 -> 句柄类型
    handle_types: HashMap<u32, TypeId>,
}

impl NativeRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// 登记原生函数；同名重复注册时替换实现并沿用原 id
    pub fn register(
        &mut self,
        module: &str,
        name: &str,
        params: Vec<TypeId>,
        ret: TypeId,
        func: NativeFn,
    ) -> NativeId {
        let key = (module.to_string(), name.to_string());
        let entry = NativeEntry {
            module: module.to_string(),
            name: name.to_string(),
            params,
            ret,
            func,
        };
        if let Some(id) = self.by_name.get(&key) {
            self.entries[id.index()] = entry;
            return *id;
        }
        let id = NativeId(self.entries.len() as u32);
        self.entries.push(entry);
        self.by_name.insert(key, id);
        id
    }

    pub fn signature(&self, module: &str, name: &str) -> Option<NativeSignature> {
        let id = *self
            .by_name
            .get(&(module.to_string(), name.to_string()))?;
        let e = &self.entries[id.index()];
        Some(NativeSignature {
            id,
            params: e.params.clone(),
            ret: e.ret,
        })
    }

    pub fn entry(&self, id: NativeId) -> Option<&NativeEntry> {
        self.entries.get(id.index())
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    pub fn register_struct(&mut self, layout: NativeStructLayout) {
        self.structs.insert(layout.name.clone(), layout);
    }

    pub fn struct_layout(&self, qualified: &str) -> Option<&NativeStructLayout> {
        self.structs.get(qualified)
    }

    pub fn struct_layout_mut(&mut self, qualified: &str) -> Option<&mut NativeStructLayout> {
        self.structs.get_mut(qualified)
    }

    /// 按类型名查找布局（`load_config` 使用）
    pub fn layout_for_type(&self, type_name: &str) -> Option<&NativeStructLayout> {
        self.structs.get(type_name)
    }

    pub fn set_interface(&mut self, interface: ModuleInterface) {
        self.interfaces.insert(interface.name.clone(), interface);
    }

    pub fn interface(&self, module: &str) -> Option<&ModuleInterface> {
        self.interfaces.get(module)
    }

    pub fn interfaces(&self) -> impl Iterator<Item = &ModuleInterface> {
        self.interfaces.values()
    }

    pub fn handle_type(&self, tag: u32) -> Option<TypeId> {
        self.handle_types.get(&tag).copied()
    }

    pub fn register_handle_type(&mut self, tag: u32, ty: TypeId) {
        self.handle_types.insert(tag, ty);
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn noop() -> NativeFn {
        Rc::new(|_, _| Ok(Value::VOID))
    }

    #[test]
    fn test_register_and_lookup() {
        let mut reg = NativeRegistry::new();
        let id = reg.register("core.math", "sqrt", vec![TypeId::FLOAT], TypeId::FLOAT, noop());
        let sig = reg.signature("core.math", "sqrt").unwrap();
        assert_eq!(sig.id, id);
        assert_eq!(sig.params, vec![TypeId::FLOAT]);
        assert!(reg.signature("core.math", "cbrt").is_none());
    }

    #[test]
    fn test_reregister_keeps_id() {
        let mut reg = NativeRegistry::new();
        let a = reg.register("m", "f", vec![], TypeId::VOID, noop());
        let b = reg.register("m", "f", vec![TypeId::INT], TypeId::INT, noop());
        assert_eq!(a, b);
        assert_eq!(reg.len(), 1);
        assert_eq!(reg.entry(a).unwrap().ret, TypeId::INT);
    }

    #[test]
    fn test_call_accessors() {
        let call = NativeCall::new("f", vec![Value::int(3), Value::bool(true)], TypeId::VOID);
        assert_eq!(call.int(0), Ok(3));
        assert_eq!(call.bool(1), Ok(true));
        assert!(call.float(0).unwrap_err().contains("argument 1 is not float"));
        assert!(call.arg(2).is_err());
    }
}
