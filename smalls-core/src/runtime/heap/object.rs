//! 托管堆对象

use crate::compiler::types::TypeId;
use crate::runtime::handles::TypedHandle;
use crate::runtime::value::{HeapPtr, Value};

#[derive(Debug, Clone)]
pub struct ArrayObject {
    pub elem: TypeId,
    pub items: Vec<Value>,
    /// 定长数组：不可 push/pop
    pub fixed: bool,
}

#[derive(Debug, Clone)]
pub struct ClosureObject {
    pub module: u32,
    pub function: u32,
    pub upvalues: Vec<HeapPtr>,
}

#[derive(Debug, Clone, Copy)]
pub enum UpvalueState {
    /// 指向仍然存活的栈槽（绝对下标）
    Open(usize),
    Closed(Value),
}

#[derive(Debug, Clone, Copy)]
pub struct MapEntry {
    pub hash: u64,
    pub key: Value,
    pub value: Value,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Slot {
    Empty,
    Deleted,
    Full(u32),
}

/// 开放寻址映射
///
/// 条目按插入顺序存放在 `entries` 中，`slots` 是线性探测表。
/// 键比较由调用方提供，以便支持用户定义的 `eq`。
#[derive(Debug, Clone)]
pub struct MapObject {
    pub key_type: TypeId,
    pub value_type: TypeId,
    entries: Vec<MapEntry>,
    slots: Vec<Slot>,
    deleted: usize,
}

impl MapObject {
    pub fn new(key_type: TypeId, value_type: TypeId) -> Self {
        Self {
            key_type,
            value_type,
            entries: Vec::new(),
            slots: vec![Slot::Empty; 8],
            deleted: 0,
        }
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    pub fn entries(&self) -> &[MapEntry] {
        &self.entries
    }

    pub fn entry(&self, idx: usize) -> Option<&MapEntry> {
        self.entries.get(idx)
    }

    pub fn set_value_at(&mut self, idx: usize, value: Value) {
        if let Some(e) = self.entries.get_mut(idx) {
            e.value = value;
        }
    }

    pub fn clear(&mut self) {
        self.entries.clear();
        self.slots = vec![Slot::Empty; 8];
        self.deleted = 0;
    }

    fn mask(&self) -> usize {
        self.slots.len() - 1
    }

    /// 哈希相同的条目下标（供外部做相等判定）
    pub fn candidates(&self, hash: u64) -> Vec<usize> {
        let mut out = Vec::new();
        let mut i = hash as usize & self.mask();
        loop {
            match self.slots[i] {
                Slot::Empty => return out,
                Slot::Full(e) if self.entries[e as usize].hash == hash => out.push(e as usize),
                _ => {}
            }
            i = (i + 1) & self.mask();
        }
    }

    pub fn find(&self, hash: u64, mut eq: impl FnMut(&Value) -> bool) -> Option<usize> {
        self.candidates(hash)
            .into_iter()
            .find(|&e| eq(&self.entries[e].key))
    }

    /// 追加一个确认不存在的键
    pub fn insert_new(&mut self, hash: u64, key: Value, value: Value) -> usize {
        if (self.entries.len() + self.deleted + 1) * 4 > self.slots.len() * 3 {
            self.rehash(self.slots.len() * 2);
        }
        let idx = self.entries.len();
        self.entries.push(MapEntry { hash, key, value });
        self.place(hash, idx as u32);
        idx
    }

    pub fn insert(
        &mut self,
        hash: u64,
        key: Value,
        value: Value,
        eq: impl FnMut(&Value) -> bool,
    ) -> bool {
        match self.find(hash, eq) {
            Some(idx) => {
                self.entries[idx].value = value;
                false
            }
            None => {
                self.insert_new(hash, key, value);
                true
            }
        }
    }

    /// 按条目下标删除；最后一个条目被挪到空位
    pub fn remove_at(&mut self, idx: usize) -> Option<MapEntry> {
        if idx >= self.entries.len() {
            return None;
        }
        let hash = self.entries[idx].hash;
        let slot = self.slot_of(hash, idx as u32)?;
        self.slots[slot] = Slot::Deleted;
        self.deleted += 1;
        let last = self.entries.len() - 1;
        if idx != last {
            let moved_hash = self.entries[last].hash;
            if let Some(s) = self.slot_of(moved_hash, last as u32) {
                self.slots[s] = Slot::Full(idx as u32);
            }
        }
        Some(self.entries.swap_remove(idx))
    }

    fn slot_of(&self, hash: u64, entry: u32) -> Option<usize> {
        let mut i = hash as usize & self.mask();
        loop {
            match self.slots[i] {
                Slot::Empty => return None,
                Slot::Full(e) if e == entry => return Some(i),
                _ => {}
            }
            i = (i + 1) & self.mask();
        }
    }

    fn place(&mut self, hash: u64, entry: u32) {
        let mut i = hash as usize & self.mask();
        loop {
            match self.slots[i] {
                Slot::Empty => break,
                Slot::Deleted => {
                    self.deleted -= 1;
                    break;
                }
                Slot::Full(_) => i = (i + 1) & self.mask(),
            }
        }
        self.slots[i] = Slot::Full(entry);
    }

    fn rehash(&mut self, capacity: usize) {
        let capacity = capacity.max(8).next_power_of_two();
        self.slots = vec![Slot::Empty; capacity];
        self.deleted = 0;
        for idx in 0..self.entries.len() {
            let hash = self.entries[idx].hash;
            self.place(hash, idx as u32);
        }
    }
}

#[derive(Debug, Clone)]
pub enum HeapObject {
    String(String),
    Array(ArrayObject),
    Map(MapObject),
    Struct(Vec<Value>),
    Tuple(Vec<Value>),
    Sum { tag: u32, payload: Option<Value> },
    Closure(ClosureObject),
    Upvalue(UpvalueState),
    Handle(TypedHandle),
}

impl HeapObject {
    pub fn kind_name(&self) -> &'static str {
        match self {
            HeapObject::String(_) => "string",
            HeapObject::Array(_) => "array",
            HeapObject::Map(_) => "map",
            HeapObject::Struct(_) => "struct",
            HeapObject::Tuple(_) => "tuple",
            HeapObject::Sum { .. } => "sum",
            HeapObject::Closure(_) => "closure",
            HeapObject::Upvalue(_) => "upvalue",
            HeapObject::Handle(_) => "handle",
        }
    }

    /// 粗略的字节估算，用于触发 GC
    pub fn estimated_size(&self) -> usize {
        let value = std::mem::size_of::<Value>();
        let base = std::mem::size_of::<HeapObject>();
        base + match self {
            HeapObject::String(s) => s.len(),
            HeapObject::Array(a) => a.items.capacity() * value,
            HeapObject::Map(m) => m.len() * (value * 2 + 8) + m.slots.len() * 8,
            HeapObject::Struct(f) | HeapObject::Tuple(f) => f.len() * value,
            HeapObject::Sum { .. } => value,
            HeapObject::Closure(c) => c.upvalues.len() * 4,
            HeapObject::Upvalue(_) => value,
            HeapObject::Handle(_) => 0,
        }
    }

    /// 遍历对象直接引用的堆指针
    pub fn for_each_child(&self, mut f: impl FnMut(HeapPtr)) {
        let mut visit = |v: &Value| {
            if let Some(p) = v.as_heap() {
                f(p)
            }
        };
        match self {
            HeapObject::String(_) | HeapObject::Handle(_) => {}
            HeapObject::Array(a) => a.items.iter().for_each(&mut visit),
            HeapObject::Map(m) => {
                for e in m.entries() {
                    visit(&e.key);
                    visit(&e.value);
                }
            }
            HeapObject::Struct(fields) | HeapObject::Tuple(fields) => {
                fields.iter().for_each(&mut visit)
            }
            HeapObject::Sum { payload, .. } => {
                if let Some(p) = payload {
                    visit(p)
                }
            }
            HeapObject::Closure(c) => {
                for p in &c.upvalues {
                    visit(&Value::heap(TypeId::VOID, *p));
                }
            }
            HeapObject::Upvalue(UpvalueState::Closed(v)) => visit(v),
            HeapObject::Upvalue(UpvalueState::Open(_)) => {}
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn key(v: i32) -> Value {
        Value::int(v)
    }

    #[test]
    fn test_map_insert_find_remove() {
        let mut m = MapObject::new(TypeId::INT, TypeId::INT);
        for i in 0..100 {
            let k = key(i);
            assert!(m.insert(i as u64 % 7, k, key(i * 10), |x| *x == k));
        }
        assert_eq!(m.len(), 100);
        let k = key(42);
        let idx = m.find(0, |x| *x == k).unwrap();
        assert_eq!(m.entry(idx).unwrap().value, key(420));

        let removed = m.remove_at(idx).unwrap();
        assert_eq!(removed.key, k);
        assert!(m.find(0, |x| *x == k).is_none());
        assert_eq!(m.len(), 99);

        // 被挪动的最后一个条目仍然可以找到
        let last = key(99);
        assert!(m.find(99 % 7, |x| *x == last).is_some());
    }

    #[test]
    fn test_map_overwrite_keeps_len() {
        let mut m = MapObject::new(TypeId::INT, TypeId::INT);
        let k = key(1);
        assert!(m.insert(1, k, key(1), |x| *x == k));
        assert!(!m.insert(1, k, key(2), |x| *x == k));
        assert_eq!(m.len(), 1);
        assert_eq!(m.entries()[0].value, key(2));
    }

    #[test]
    fn test_children() {
        let obj = HeapObject::Tuple(vec![
            Value::int(1),
            Value::heap(TypeId::STRING, HeapPtr(5)),
        ]);
        let mut seen = Vec::new();
        obj.for_each_child(|p| seen.push(p));
        assert_eq!(seen, vec![HeapPtr(5)]);
    }
}
