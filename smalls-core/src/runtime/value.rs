//! VM 层的值表示
//!
//! `Value` 由类型 id 与载荷组成。原始值与对象句柄直接内联，
//! 其余一律是指向托管堆的 `HeapPtr`。

use serde::Serialize;

use crate::compiler::types::TypeId;

/// 宿主对象句柄，`{id, generation, kind}`，共 8 字节
#[repr(C)]
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize)]
pub struct ObjectHandle {
    pub id: u32,
    pub generation: u16,
    pub kind: u16,
}

impl ObjectHandle {
    pub const INVALID: ObjectHandle = ObjectHandle {
        id: u32::MAX,
        generation: 0,
        kind: 0,
    };

    pub fn new(id: u32, generation: u16, kind: u16) -> Self {
        Self {
            id,
            generation,
            kind,
        }
    }

    pub fn is_valid(&self) -> bool {
        self.id != u32::MAX
    }
}

/// 托管堆中对象的索引
#[repr(transparent)]
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize)]
pub struct HeapPtr(pub u32);

impl HeapPtr {
    pub fn index(self) -> usize {
        self.0 as usize
    }
}

/// 存储方式
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Storage {
    Immediate,
    Heap,
}

#[derive(Debug, Clone, Copy, PartialEq)]
pub enum ValueData {
    Void,
    Int(i32),
    Float(f32),
    Bool(bool),
    Object(ObjectHandle),
    Heap(HeapPtr),
}

#[derive(Debug, Clone, Copy, PartialEq)]
pub struct Value {
    pub type_id: TypeId,
    pub data: ValueData,
}

impl Default for Value {
    fn default() -> Self {
        Value::VOID
    }
}

impl Value {
    pub const VOID: Value = Value {
        type_id: TypeId::VOID,
        data: ValueData::Void,
    };

    // ==================== 构造方法 ====================

    #[inline]
    pub fn int(v: i32) -> Self {
        Self {
            type_id: TypeId::INT,
            data: ValueData::Int(v),
        }
    }

    #[inline]
    pub fn float(v: f32) -> Self {
        Self {
            type_id: TypeId::FLOAT,
            data: ValueData::Float(v),
        }
    }

    #[inline]
    pub fn bool(v: bool) -> Self {
        Self {
            type_id: TypeId::BOOL,
            data: ValueData::Bool(v),
        }
    }

    pub fn object(handle: ObjectHandle) -> Self {
        Self {
            type_id: TypeId::OBJECT,
            data: ValueData::Object(handle),
        }
    }

    #[inline]
    pub fn heap(type_id: TypeId, ptr: HeapPtr) -> Self {
        Self {
            type_id,
            data: ValueData::Heap(ptr),
        }
    }

    /// 换一个静态类型（newtype 包装/解包）
    #[inline]
    pub fn with_type(self, type_id: TypeId) -> Self {
        Self {
            type_id,
            data: self.data,
        }
    }

    // ==================== 访问方法 ====================

    pub fn storage(&self) -> Storage {
        match self.data {
            ValueData::Heap(_) => Storage::Heap,
            _ => Storage::Immediate,
        }
    }

    pub fn is_void(&self) -> bool {
        matches!(self.data, ValueData::Void)
    }

    pub fn as_int(&self) -> Option<i32> {
        match self.data {
            ValueData::Int(v) => Some(v),
            _ => None,
        }
    }

    pub fn as_float(&self) -> Option<f32> {
        match self.data {
            ValueData::Float(v) => Some(v),
            _ => None,
        }
    }

    pub fn as_bool(&self) -> Option<bool> {
        match self.data {
            ValueData::Bool(v) => Some(v),
            _ => None,
        }
    }

    pub fn as_object(&self) -> Option<ObjectHandle> {
        match self.data {
            ValueData::Object(h) => Some(h),
            _ => None,
        }
    }

    pub fn as_heap(&self) -> Option<HeapPtr> {
        match self.data {
            ValueData::Heap(p) => Some(p),
            _ => None,
        }
    }

    /// 条件判断：只有 bool 有真值
    pub fn is_truthy(&self) -> bool {
        matches!(self.data, ValueData::Bool(true))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_immediates() {
        assert_eq!(Value::int(42).as_int(), Some(42));
        assert_eq!(Value::float(1.5).as_float(), Some(1.5));
        assert_eq!(Value::bool(true).as_bool(), Some(true));
        assert_eq!(Value::int(1).storage(), Storage::Immediate);
        assert!(Value::VOID.is_void());
    }

    #[test]
    fn test_heap_and_retag() {
        let v = Value::heap(TypeId::STRING, HeapPtr(3));
        assert_eq!(v.storage(), Storage::Heap);
        assert_eq!(v.as_heap(), Some(HeapPtr(3)));
        let t = Value::int(7).with_type(TypeId(42));
        assert_eq!(t.type_id, TypeId(42));
        assert_eq!(t.as_int(), Some(7));
    }

    #[test]
    fn test_object_handle_layout() {
        assert_eq!(std::mem::size_of::<ObjectHandle>(), 8);
        assert_eq!(std::mem::align_of::<ObjectHandle>(), 4);
        assert!(!ObjectHandle::INVALID.is_valid());
    }
}
