//! 宿主模块构建器
//!
//! ```ignore
//! rt.module("game")
//!     .function("spawn", &[TypeId::INT], TypeId::OBJECT, spawn)
//!     .add_opaque_type::<Texture>("Texture")
//!     .native_struct::<Vec2>("Vec2")
//!     .field::<f32>("x", 0, TypeId::FLOAT)
//!     .field::<f32>("y", 4, TypeId::FLOAT)
//!     .end_struct()
//!     .value_type::<Vec2>("Vec2")
//!     .finalize()?;
//! ```

use std::mem;
use std::rc::Rc;

use tracing::debug;

use crate::compiler::types::{TypeId, TypeKind};
use crate::runtime::error::RuntimeError;
use crate::runtime::native::{
    FunctionMetadata, ModuleInterface, NativeCall, NativeField, NativeStructLayout,
};
use crate::runtime::value::Value;
use crate::runtime::Runtime;

pub struct ModuleBuilder<'rt> {
    rt: &'rt mut Runtime,
    interface: ModuleInterface,
    errors: Vec<String>,
}

impl<'rt> ModuleBuilder<'rt> {
    pub(crate) fn new(rt: &'rt mut Runtime, name: &str) -> Self {
        let interface = rt
            .natives
            .interface(name)
            .cloned()
            .unwrap_or_else(|| ModuleInterface {
                name: name.to_string(),
                ..Default::default()
            });
        Self {
            rt,
            interface,
            errors: Vec::new(),
        }
    }

    fn qualified(&self, name: &str) -> String {
        format!("{}.{}", self.interface.name, name)
    }

    /// 注册原生函数
    pub fn function<F>(mut self, name: &str, params: &[TypeId], ret: TypeId, f: F) -> Self
    where
        F: Fn(&mut Runtime, &NativeCall) -> Result<Value, String> + 'static,
    {
        self.rt.natives.register(
            &self.interface.name,
            name,
            params.to_vec(),
            ret,
            Rc::new(f),
        );
        self.interface.functions.retain(|m| m.name != name);
        self.interface.functions.push(FunctionMetadata {
            name: name.to_string(),
            params: params.to_vec(),
            ret,
        });
        self
    }

    /// 不透明类型：脚本只能传递，不能访问内部
    pub fn add_opaque_type<T>(mut self, name: &str) -> Self {
        let qualified = self.qualified(name);
        let id = self.rt.types.reserve(&qualified);
        self.rt
            .types
            .define_opaque(id, mem::size_of::<T>() as u32, mem::align_of::<T>() as u32);
        self.interface.types.push(qualified);
        self
    }

    /// 开始描述一个宿主结构体布局
    pub fn native_struct<T>(self, name: &str) -> StructBuilder<'rt> {
        let qualified = self.qualified(name);
        StructBuilder {
            layout: NativeStructLayout {
                name: qualified,
                size: mem::size_of::<T>() as u32,
                alignment: mem::align_of::<T>() as u32,
                fields: Vec::new(),
                value_type: false,
            },
            parent: self,
        }
    }

    /// 把已登记布局的结构体标记为值类型，并核对宿主类型的大小与对齐
    pub fn value_type<T>(mut self, name: &str) -> Self {
        let qualified = self.qualified(name);
        let size = mem::size_of::<T>() as u32;
        let align = mem::align_of::<T>() as u32;
        match self.rt.natives.struct_layout_mut(&qualified) {
            None => self
                .errors
                .push(format!("value type '{}' has no registered layout", qualified)),
            Some(layout) if layout.size != size || layout.alignment != align => {
                self.errors.push(format!(
                    "value type '{}' is {} bytes aligned to {}, layout says {} aligned to {}",
                    qualified, size, align, layout.size, layout.alignment
                ))
            }
            Some(layout) => layout.value_type = true,
        }
        self
    }

    /// 句柄类型；标签在整个运行时内唯一
    pub fn handle_type(mut self, name: &str, tag: u32) -> Self {
        let qualified = self.qualified(name);
        if let Some(existing) = self.rt.natives.handle_type(tag) {
            if self.rt.types.name(existing) != qualified {
                let owner = self.rt.types.name(existing).to_string();
                self.errors.push(format!(
                    "handle tag {} is already registered as '{}'",
                    tag, owner
                ));
                return self;
            }
        }
        let id = self.rt.types.reserve(&qualified);
        match self.rt.types.kind(id) {
            TypeKind::Pending | TypeKind::Handle { .. } => {
                self.rt.types.define_handle(id, tag);
                self.rt.natives.register_handle_type(tag, id);
                self.interface.types.push(qualified);
            }
            _ => self
                .errors
                .push(format!("'{}' is already defined as another type", qualified)),
        }
        self
    }

    /// 提交模块；累积的布局或冲突错误在这里一次性报告
    pub fn finalize(self) -> Result<ModuleInterface, RuntimeError> {
        if !self.errors.is_empty() {
            return Err(RuntimeError::Linking {
                module: self.interface.name,
                message: self.errors.join("; "),
            });
        }
        debug!(
            target: "smalls::runtime",
            "module {} registered: {} function(s), {} type(s)",
            self.interface.name,
            self.interface.functions.len(),
            self.interface.types.len()
        );
        self.rt.natives.set_interface(self.interface.clone());
        Ok(self.interface)
    }
}

pub struct StructBuilder<'rt> {
    parent: ModuleBuilder<'rt>,
    layout: NativeStructLayout,
}

impl<'rt> StructBuilder<'rt> {
    /// 字段：名称、宿主偏移、脚本类型；字段宽度取自 `F`
    pub fn field<F>(mut self, name: &str, offset: u32, ty: TypeId) -> Self {
        let size = mem::size_of::<F>() as u32;
        if offset + size > self.layout.size {
            self.parent.errors.push(format!(
                "field '{}' of '{}' ends at {} past struct size {}",
                name,
                self.layout.name,
                offset + size,
                self.layout.size
            ));
        }
        self.layout.fields.push(NativeField {
            name: name.to_string(),
            ty,
            offset,
            size,
        });
        self
    }

    pub fn end_struct(mut self) -> ModuleBuilder<'rt> {
        self.parent.interface.types.push(self.layout.name.clone());
        self.parent.rt.natives.register_struct(self.layout);
        self.parent
    }
}
