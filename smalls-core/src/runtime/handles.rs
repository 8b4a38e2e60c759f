//! 宿主句柄注册表
//!
//! 把 `TypedHandle` 映射到托管堆上的句柄对象。ENGINE_OWNED 条目是 GC 根，
//! VM_OWNED 条目在对象不可达时被回收，并调用该类型登记的析构回调。
//! 所有权只能由宿主翻转。

use std::collections::HashMap;
use std::fmt;
use std::rc::Rc;

use serde::Serialize;

use crate::runtime::value::HeapPtr;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize)]
pub struct TypedHandle {
    /// `.handle_type("T", tag)` 注册的标签
    pub type_tag: u32,
    pub id: u32,
    pub generation: u32,
}

impl TypedHandle {
    pub fn new(type_tag: u32, id: u32, generation: u32) -> Self {
        Self {
            type_tag,
            id,
            generation,
        }
    }
}

impl fmt::Display for TypedHandle {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "handle({}:{}#{})", self.type_tag, self.id, self.generation)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub enum OwnershipMode {
    VmOwned,
    EngineOwned,
}

#[derive(Debug, Clone, Copy)]
pub struct HandleEntry {
    pub ptr: HeapPtr,
    pub mode: OwnershipMode,
}

pub type HandleDestructor = Rc<dyn Fn(TypedHandle)>;

#[derive(Default)]
pub struct HandleRegistry {
    entries: HashMap<TypedHandle, HandleEntry>,
    destructors: HashMap<u32, HandleDestructor>,
}

impl fmt::Debug for HandleRegistry {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("HandleRegistry")
            .field("entries", &self.entries.len())
            .field("destructors", &self.destructors.len())
            .finish()
    }
}

impl HandleRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn lookup(&self, handle: &TypedHandle) -> Option<HandleEntry> {
        self.entries.get(handle).copied()
    }

    pub fn insert(&mut self, handle: TypedHandle, ptr: HeapPtr, mode: OwnershipMode) {
        self.entries.insert(handle, HandleEntry { ptr, mode });
    }

    /// 翻转所有权，返回是否存在该条目
    pub fn set_ownership(&mut self, handle: &TypedHandle, mode: OwnershipMode) -> bool {
        match self.entries.get_mut(handle) {
            Some(e) => {
                e.mode = mode;
                true
            }
            None => false,
        }
    }

    pub fn register_destructor(&mut self, type_tag: u32, destructor: HandleDestructor) {
        self.destructors.insert(type_tag, destructor);
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    /// ENGINE_OWNED 条目指向的对象，作为 GC 根
    pub fn roots(&self) -> impl Iterator<Item = HeapPtr> + '_ {
        self.entries
            .values()
            .filter(|e| e.mode == OwnershipMode::EngineOwned)
            .map(|e| e.ptr)
    }

    /// GC 清扫后调用：移除条目并执行析构
    pub fn finalize(&mut self, freed: &[TypedHandle]) {
        for handle in freed {
            let Some(entry) = self.entries.remove(handle) else {
                continue;
            };
            if entry.mode != OwnershipMode::VmOwned {
                continue;
            }
            if let Some(d) = self.destructors.get(&handle.type_tag).cloned() {
                tracing::trace!(target: "smalls::gc", %handle, "finalizing handle");
                d(*handle);
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::cell::RefCell;

    #[test]
    fn test_roots_only_engine_owned() {
        let mut reg = HandleRegistry::new();
        let a = TypedHandle::new(1, 1, 0);
        let b = TypedHandle::new(1, 2, 0);
        reg.insert(a, HeapPtr(10), OwnershipMode::EngineOwned);
        reg.insert(b, HeapPtr(11), OwnershipMode::VmOwned);
        let roots: Vec<HeapPtr> = reg.roots().collect();
        assert_eq!(roots, vec![HeapPtr(10)]);

        assert!(reg.set_ownership(&b, OwnershipMode::EngineOwned));
        assert_eq!(reg.roots().count(), 2);
    }

    #[test]
    fn test_finalize_runs_destructor_for_vm_owned() {
        let log = Rc::new(RefCell::new(Vec::new()));
        let mut reg = HandleRegistry::new();
        let sink = log.clone();
        reg.register_destructor(3, Rc::new(move |h| sink.borrow_mut().push(h.id)));
        let h = TypedHandle::new(3, 99, 1);
        reg.insert(h, HeapPtr(0), OwnershipMode::VmOwned);
        reg.finalize(&[h]);
        assert_eq!(*log.borrow(), vec![99]);
        assert!(reg.lookup(&h).is_none());
    }
}
