//! Propset 侧表：`(propset 类型, 对象句柄) -> 结构体`

use std::collections::HashMap;

use crate::compiler::types::TypeId;
use crate::runtime::value::{HeapPtr, ObjectHandle};

#[derive(Debug, Default)]
pub struct PropsetTable {
    tables: HashMap<TypeId, HashMap<ObjectHandle, HeapPtr>>,
}

impl PropsetTable {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn get(&self, ty: TypeId, obj: ObjectHandle) -> Option<HeapPtr> {
        self.tables.get(&ty).and_then(|t| t.get(&obj)).copied()
    }

    pub fn insert(&mut self, ty: TypeId, obj: ObjectHandle, ptr: HeapPtr) {
        self.tables.entry(ty).or_default().insert(obj, ptr);
    }

    /// 对象销毁时清掉它在所有表中的条目
    pub fn destroy_object(&mut self, obj: ObjectHandle) -> usize {
        self.tables
            .values_mut()
            .filter_map(|t| t.remove(&obj))
            .count()
    }

    pub fn roots(&self) -> impl Iterator<Item = HeapPtr> + '_ {
        self.tables.values().flat_map(|t| t.values().copied())
    }

    pub fn len(&self) -> usize {
        self.tables.values().map(|t| t.len()).sum()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_destroy_clears_every_table() {
        let mut table = PropsetTable::new();
        let obj = ObjectHandle::new(1, 0, 0);
        let other = ObjectHandle::new(2, 0, 0);
        table.insert(TypeId(20), obj, HeapPtr(1));
        table.insert(TypeId(21), obj, HeapPtr(2));
        table.insert(TypeId(20), other, HeapPtr(3));
        assert_eq!(table.get(TypeId(20), obj), Some(HeapPtr(1)));
        assert_eq!(table.destroy_object(obj), 2);
        assert!(table.get(TypeId(21), obj).is_none());
        assert_eq!(table.len(), 1);
    }
}
