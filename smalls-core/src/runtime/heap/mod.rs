//! 托管堆与分代三色标记清除 GC
//!
//! - 新对象进入年轻代；次要回收只清扫年轻代，存活者晋升老年代
//! - 对老年代对象的任何可变访问都会把它记入 remembered set（写屏障）
//! - 老年代增长超过阈值时做完整回收
//! - 分配只设置回收请求标志，真正的回收发生在 VM 的安全点

mod object;

pub use object::{ArrayObject, ClosureObject, HeapObject, MapEntry, MapObject, UpvalueState};

use std::collections::hash_map::DefaultHasher;
use std::collections::HashSet;
use std::hash::{Hash, Hasher};

use serde::Serialize;

use crate::compiler::types::TypeId;
use crate::runtime::handles::TypedHandle;
use crate::runtime::value::{HeapPtr, Value, ValueData};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Color {
    White,
    Gray,
    Black,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Generation {
    Young,
    Old,
}

#[derive(Debug, Clone, Copy)]
pub struct ObjectHeader {
    pub type_id: TypeId,
    pub size: u32,
    pub color: Color,
    pub generation: Generation,
}

#[derive(Debug, Clone)]
struct HeapSlot {
    header: ObjectHeader,
    object: HeapObject,
}

/// 单次回收的结果
#[derive(Debug, Clone, Default, Serialize)]
pub struct GcReport {
    pub full: bool,
    pub freed_objects: usize,
    pub freed_bytes: usize,
    pub live_objects: usize,
    pub live_bytes: usize,
    /// 被回收的句柄对象，交给句柄注册表做析构
    #[serde(skip)]
    pub finalized: Vec<TypedHandle>,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize)]
pub struct GcStats {
    pub minor_collections: u64,
    pub full_collections: u64,
    pub total_freed: u64,
}

#[derive(Debug)]
pub struct Heap {
    slots: Vec<Option<HeapSlot>>,
    free: Vec<u32>,
    remembered: HashSet<u32>,
    young_bytes: usize,
    old_bytes: usize,
    threshold: usize,
    collection_requested: bool,
    stats: GcStats,
}

impl Heap {
    pub fn new(threshold: usize) -> Self {
        Self {
            slots: Vec::new(),
            free: Vec::new(),
            remembered: HashSet::new(),
            young_bytes: 0,
            old_bytes: 0,
            threshold: threshold.max(1024),
            collection_requested: false,
            stats: GcStats::default(),
        }
    }

    // ===== 分配与访问 =====

    pub fn alloc(&mut self, type_id: TypeId, object: HeapObject) -> HeapPtr {
        let size = object.estimated_size();
        let slot = HeapSlot {
            header: ObjectHeader {
                type_id,
                size: size as u32,
                color: Color::White,
                generation: Generation::Young,
            },
            object,
        };
        self.young_bytes += size;
        if self.young_bytes + self.old_bytes > self.threshold {
            self.collection_requested = true;
        }
        match self.free.pop() {
            Some(idx) => {
                self.slots[idx as usize] = Some(slot);
                HeapPtr(idx)
            }
            None => {
                self.slots.push(Some(slot));
                HeapPtr(self.slots.len() as u32 - 1)
            }
        }
    }

    pub fn get(&self, ptr: HeapPtr) -> Option<&HeapObject> {
        self.slots
            .get(ptr.index())
            .and_then(|s| s.as_ref())
            .map(|s| &s.object)
    }

    /// 可变访问；老年代对象会被记入 remembered set
    pub fn get_mut(&mut self, ptr: HeapPtr) -> Option<&mut HeapObject> {
        let slot = self.slots.get_mut(ptr.index())?.as_mut()?;
        if slot.header.generation == Generation::Old {
            self.remembered.insert(ptr.0);
        }
        Some(&mut slot.object)
    }

    pub fn header(&self, ptr: HeapPtr) -> Option<&ObjectHeader> {
        self.slots
            .get(ptr.index())
            .and_then(|s| s.as_ref())
            .map(|s| &s.header)
    }

    pub fn contains(&self, ptr: HeapPtr) -> bool {
        self.header(ptr).is_some()
    }

    pub fn live_objects(&self) -> usize {
        self.slots.len() - self.free.len()
    }

    pub fn allocated_bytes(&self) -> usize {
        self.young_bytes + self.old_bytes
    }

    pub fn threshold(&self) -> usize {
        self.threshold
    }

    pub fn stats(&self) -> &GcStats {
        &self.stats
    }

    pub fn collection_requested(&self) -> bool {
        self.collection_requested
    }

    pub fn request_collection(&mut self) {
        self.collection_requested = true;
    }

    // ===== 便捷访问 =====

    pub fn string(&self, ptr: HeapPtr) -> Option<&str> {
        match self.get(ptr)? {
            HeapObject::String(s) => Some(s),
            _ => None,
        }
    }

    pub fn array(&self, ptr: HeapPtr) -> Option<&ArrayObject> {
        match self.get(ptr)? {
            HeapObject::Array(a) => Some(a),
            _ => None,
        }
    }

    pub fn array_mut(&mut self, ptr: HeapPtr) -> Option<&mut ArrayObject> {
        match self.get_mut(ptr)? {
            HeapObject::Array(a) => Some(a),
            _ => None,
        }
    }

    pub fn map(&self, ptr: HeapPtr) -> Option<&MapObject> {
        match self.get(ptr)? {
            HeapObject::Map(m) => Some(m),
            _ => None,
        }
    }

    pub fn map_mut(&mut self, ptr: HeapPtr) -> Option<&mut MapObject> {
        match self.get_mut(ptr)? {
            HeapObject::Map(m) => Some(m),
            _ => None,
        }
    }

    pub fn closure(&self, ptr: HeapPtr) -> Option<&ClosureObject> {
        match self.get(ptr)? {
            HeapObject::Closure(c) => Some(c),
            _ => None,
        }
    }

    /// 结构体或元组的字段
    pub fn fields(&self, ptr: HeapPtr) -> Option<&[Value]> {
        match self.get(ptr)? {
            HeapObject::Struct(f) | HeapObject::Tuple(f) => Some(f),
            _ => None,
        }
    }

    pub fn fields_mut(&mut self, ptr: HeapPtr) -> Option<&mut Vec<Value>> {
        match self.get_mut(ptr)? {
            HeapObject::Struct(f) | HeapObject::Tuple(f) => Some(f),
            _ => None,
        }
    }

    // ===== 相等与哈希（结构化） =====

    /// 结构化相等：字符串比内容，结构体/元组/和类型逐字段，其余比身份
    pub fn values_equal(&self, a: &Value, b: &Value) -> bool {
        match (a.data, b.data) {
            (ValueData::Heap(pa), ValueData::Heap(pb)) => {
                if pa == pb {
                    return true;
                }
                match (self.get(pa), self.get(pb)) {
                    (Some(HeapObject::String(x)), Some(HeapObject::String(y))) => x == y,
                    (Some(HeapObject::Struct(x)), Some(HeapObject::Struct(y)))
                    | (Some(HeapObject::Tuple(x)), Some(HeapObject::Tuple(y))) => {
                        a.type_id == b.type_id
                            && x.len() == y.len()
                            && x.iter().zip(y).all(|(l, r)| self.values_equal(l, r))
                    }
                    (
                        Some(HeapObject::Sum { tag: ta, payload: pa }),
                        Some(HeapObject::Sum { tag: tb, payload: pb }),
                    ) => {
                        ta == tb
                            && match (pa, pb) {
                                (Some(x), Some(y)) => self.values_equal(x, y),
                                (None, None) => true,
                                _ => false,
                            }
                    }
                    (Some(HeapObject::Array(x)), Some(HeapObject::Array(y))) if x.fixed && y.fixed => {
                        x.items.len() == y.items.len()
                            && x.items.iter().zip(&y.items).all(|(l, r)| self.values_equal(l, r))
                    }
                    _ => false,
                }
            }
            (x, y) => x == y,
        }
    }

    pub fn hash_value(&self, v: &Value) -> u64 {
        let mut hasher = DefaultHasher::new();
        self.hash_into(v, &mut hasher);
        hasher.finish()
    }

    fn hash_into(&self, v: &Value, hasher: &mut DefaultHasher) {
        match v.data {
            ValueData::Void => 0u8.hash(hasher),
            ValueData::Int(i) => i.hash(hasher),
            ValueData::Float(f) => f.to_bits().hash(hasher),
            ValueData::Bool(b) => b.hash(hasher),
            ValueData::Object(h) => h.hash(hasher),
            ValueData::Heap(p) => match self.get(p) {
                Some(HeapObject::String(s)) => s.hash(hasher),
                Some(HeapObject::Struct(f)) | Some(HeapObject::Tuple(f)) => {
                    for x in f {
                        self.hash_into(x, hasher);
                    }
                }
                Some(HeapObject::Sum { tag, payload }) => {
                    tag.hash(hasher);
                    if let Some(p) = payload {
                        self.hash_into(p, hasher);
                    }
                }
                _ => p.hash(hasher),
            },
        }
    }

    // ===== 回收 =====

    /// 执行一次回收。`full` 为 false 时只清扫年轻代。
    pub fn collect(&mut self, roots: &[HeapPtr], full: bool) -> GcReport {
        let before_objects = self.live_objects();
        let before_bytes = self.allocated_bytes();

        // 标记
        let mut gray: Vec<u32> = Vec::new();
        let shade = |heap: &mut Heap, p: u32, gray: &mut Vec<u32>| {
            if let Some(Some(slot)) = heap.slots.get_mut(p as usize) {
                if slot.header.color == Color::White
                    && (full || slot.header.generation == Generation::Young)
                {
                    slot.header.color = Color::Gray;
                    gray.push(p);
                }
            }
        };
        for r in roots {
            shade(self, r.0, &mut gray);
        }
        if !full {
            let remembered: Vec<u32> = self.remembered.iter().copied().collect();
            for owner in remembered {
                let mut children = Vec::new();
                if let Some(obj) = self.get(HeapPtr(owner)) {
                    obj.for_each_child(|c| children.push(c.0));
                }
                for c in children {
                    shade(self, c, &mut gray);
                }
            }
        }
        while let Some(p) = gray.pop() {
            let mut children = Vec::new();
            if let Some(Some(slot)) = self.slots.get_mut(p as usize) {
                slot.header.color = Color::Black;
                slot.object.for_each_child(|c| children.push(c.0));
            }
            for c in children {
                shade(self, c, &mut gray);
            }
        }

        // 清扫
        let mut report = GcReport {
            full,
            ..Default::default()
        };
        let mut old_bytes = 0usize;
        for idx in 0..self.slots.len() {
            let Some(slot) = self.slots[idx].as_mut() else {
                continue;
            };
            let in_scope = full || slot.header.generation == Generation::Young;
            if in_scope && slot.header.color == Color::White {
                let freed = self.slots[idx].take();
                if let Some(HeapSlot {
                    header,
                    object: HeapObject::Handle(handle),
                }) = freed
                {
                    report.finalized.push(handle);
                    report.freed_bytes += header.size as usize;
                } else if let Some(s) = freed {
                    report.freed_bytes += s.header.size as usize;
                }
                report.freed_objects += 1;
                self.free.push(idx as u32);
                continue;
            }
            slot.header.color = Color::White;
            slot.header.generation = Generation::Old;
            // 对象大小可能在分配后增长
            let size = slot.object.estimated_size();
            slot.header.size = size as u32;
            old_bytes += size;
        }
        self.young_bytes = 0;
        self.old_bytes = old_bytes;
        self.remembered.clear();
        self.collection_requested = false;

        report.live_objects = self.live_objects();
        report.live_bytes = self.allocated_bytes();
        if full {
            self.stats.full_collections += 1;
        } else {
            self.stats.minor_collections += 1;
        }
        self.stats.total_freed += report.freed_objects as u64;

        // 回收不足一半时放宽阈值
        if report.freed_bytes * 2 < before_bytes {
            self.threshold = self.threshold.saturating_mul(2);
        }
        tracing::debug!(
            target: "smalls::gc",
            full,
            before = before_objects,
            freed = report.freed_objects,
            live = report.live_objects,
            threshold = self.threshold,
            "collection finished"
        );
        report
    }

    /// 老年代是否大到需要完整回收
    pub fn wants_full_collection(&self) -> bool {
        self.old_bytes * 2 > self.threshold
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn string(heap: &mut Heap, s: &str) -> HeapPtr {
        heap.alloc(TypeId::STRING, HeapObject::String(s.into()))
    }

    #[test]
    fn test_alloc_and_get() {
        let mut heap = Heap::new(1 << 20);
        let p = string(&mut heap, "hello");
        assert_eq!(heap.string(p), Some("hello"));
        assert_eq!(heap.live_objects(), 1);
    }

    #[test]
    fn test_unreachable_objects_are_freed() {
        let mut heap = Heap::new(1 << 20);
        let keep = string(&mut heap, "keep");
        let _drop = string(&mut heap, "drop");
        let report = heap.collect(&[keep], false);
        assert_eq!(report.freed_objects, 1);
        assert!(heap.contains(keep));
        assert_eq!(heap.live_objects(), 1);
    }

    #[test]
    fn test_reachability_through_children() {
        let mut heap = Heap::new(1 << 20);
        let s = string(&mut heap, "inner");
        let arr = heap.alloc(
            TypeId::ANY_ARRAY,
            HeapObject::Array(ArrayObject {
                elem: TypeId::STRING,
                items: vec![Value::heap(TypeId::STRING, s)],
                fixed: false,
            }),
        );
        heap.collect(&[arr], true);
        assert_eq!(heap.string(s), Some("inner"));
    }

    #[test]
    fn test_write_barrier_keeps_young_child_of_old_owner() {
        let mut heap = Heap::new(1 << 20);
        let arr = heap.alloc(
            TypeId::ANY_ARRAY,
            HeapObject::Array(ArrayObject {
                elem: TypeId::STRING,
                items: Vec::new(),
                fixed: false,
            }),
        );
        // 晋升
        heap.collect(&[arr], false);
        assert_eq!(heap.header(arr).unwrap().generation, Generation::Old);

        let s = string(&mut heap, "young");
        heap.array_mut(arr)
            .unwrap()
            .items
            .push(Value::heap(TypeId::STRING, s));
        // 根中没有 arr，但老年代不会在次要回收中被清扫，屏障保住 s
        heap.collect(&[], false);
        assert_eq!(heap.string(s), Some("young"));

        // 完整回收清掉一切
        heap.collect(&[], true);
        assert!(!heap.contains(arr));
        assert!(!heap.contains(s));
    }

    #[test]
    fn test_handle_objects_are_reported_for_finalization() {
        let mut heap = Heap::new(1 << 20);
        let h = TypedHandle::new(1, 7, 0);
        heap.alloc(TypeId::OBJECT, HeapObject::Handle(h));
        let report = heap.collect(&[], true);
        assert_eq!(report.finalized, vec![h]);
    }

    #[test]
    fn test_structural_equality_and_hash() {
        let mut heap = Heap::new(1 << 20);
        let a = string(&mut heap, "k");
        let b = string(&mut heap, "k");
        let va = Value::heap(TypeId::STRING, a);
        let vb = Value::heap(TypeId::STRING, b);
        assert!(heap.values_equal(&va, &vb));
        assert_eq!(heap.hash_value(&va), heap.hash_value(&vb));
        assert!(!heap.values_equal(&Value::int(1), &Value::int(2)));
    }

    #[test]
    fn test_collection_request_on_threshold() {
        let mut heap = Heap::new(1024);
        assert!(!heap.collection_requested());
        for _ in 0..64 {
            string(&mut heap, "0123456789abcdef0123456789abcdef");
        }
        assert!(heap.collection_requested());
        heap.collect(&[], true);
        assert!(!heap.collection_requested());
    }
}
