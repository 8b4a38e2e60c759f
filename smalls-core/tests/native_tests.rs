//! 宿主接口测试
//!
//! 原生函数、回调、句柄、propset、宿主类型与配置加载

mod common;
use std::cell::RefCell;
use std::rc::Rc;

use common::load;
use serde::Deserialize;
use smalls_core::runtime::handles::{OwnershipMode, TypedHandle};
use smalls_core::runtime::value::ObjectHandle;
use smalls_core::{load_config, Runtime, RuntimeError, TypeId, TypeKind, Value};

const CREATURE_TAG: u32 = 7;

// ===== 原生函数 =====

#[test]
fn test_native_function_bridge() {
    let mut rt = Runtime::new();
    rt.module("game")
        .function("damage", &[TypeId::INT, TypeId::FLOAT], TypeId::INT, |_, call| {
            let base = call.int(0)?;
            let scale = call.float(1)?;
            Ok(Value::int((base as f32 * scale) as i32))
        })
        .finalize()
        .unwrap();
    let id = load(
        &mut rt,
        "game",
        "extern fn damage(base: int, scale: float): int;\nfn hit(): int { return damage(10, 1.5) + 1; }",
    );
    assert_eq!(rt.execute_script(id, "hit", &[], 0).value.as_int(), Some(16));
}

#[test]
fn test_native_error_fails_script() {
    let mut rt = Runtime::new();
    rt.module("host")
        .function("explode", &[], TypeId::VOID, |_, _| Err("boom".to_string()))
        .finalize()
        .unwrap();
    let id = load(&mut rt, "host", "extern fn explode();\nfn main() { explode(); }");
    let res = rt.execute_script(id, "main", &[], 0);
    assert!(res.failed);
    assert!(res.error_message.contains("boom"), "{}", res.error_message);
}

#[test]
fn test_unregistered_native_is_a_linking_error() {
    let mut rt = Runtime::new();
    let err = rt
        .load_module_from_source("host", "extern fn nothing(): int;")
        .unwrap_err();
    assert!(
        err.to_string().contains("native function 'host.nothing' is not registered"),
        "{}",
        err
    );
}

#[test]
fn test_native_signature_mismatch() {
    let mut rt = Runtime::new();
    rt.module("host")
        .function("f", &[TypeId::INT], TypeId::INT, |_, call| Ok(Value::int(call.int(0)?)))
        .finalize()
        .unwrap();
    let err = rt
        .load_module_from_source("host", "extern fn f(x: float): int;")
        .unwrap_err();
    assert!(err.to_string().contains("parameter 1"), "{}", err);
}

#[test]
fn test_native_callback_reenters_vm() {
    let mut rt = Runtime::new();
    rt.module("host")
        .function("twice", &[TypeId::ANY], TypeId::INT, |rt, call| {
            let f = call.arg(0)?;
            let a = rt.call_value(f, &[Value::int(1)])?;
            let b = rt.call_value(f, &[Value::int(2)])?;
            Ok(Value::int(a.as_int().unwrap_or(0) + b.as_int().unwrap_or(0)))
        })
        .finalize()
        .unwrap();
    let id = load(
        &mut rt,
        "host",
        "extern fn twice(f: fn(int): int): int;\n\
         fn main(): int { var k = 10; return twice(fn(x: int): int { return x * k; }); }",
    );
    assert_eq!(rt.execute_script(id, "main", &[], 0).value.as_int(), Some(30));
}

#[test]
fn test_nested_execution_shares_globals() {
    let mut rt = Runtime::new();
    rt.module("host")
        .function("call_back", &[], TypeId::INT, |rt, _| {
            let id = rt.module_id("host").ok_or("no module")?;
            let res = rt.execute_script(id, "bump", &[], 0);
            res.into_result().map_err(|e| e.to_string())
        })
        .finalize()
        .unwrap();
    let id = load(
        &mut rt,
        "host",
        "extern fn call_back(): int;\nvar n = 0;\n\
         fn bump(): int { n = n + 1; return n; }\n\
         fn main(): int { call_back(); return call_back() + n; }",
    );
    assert_eq!(rt.execute_script(id, "main", &[], 0).value.as_int(), Some(4));
}

// ===== 句柄 =====

fn creature_runtime() -> Runtime {
    let mut rt = Runtime::new();
    rt.module("world")
        .handle_type("Creature", CREATURE_TAG)
        .finalize()
        .unwrap();
    rt
}

#[test]
fn test_intern_handle_identity() {
    let mut rt = creature_runtime();
    let h = TypedHandle::new(CREATURE_TAG, 1, 1);
    let a = rt.intern_handle(h, OwnershipMode::EngineOwned).unwrap();
    let b = rt.intern_handle(h, OwnershipMode::EngineOwned).unwrap();
    assert_eq!(a, b);
    assert_eq!(rt.lookup_handle(&h), Some(a));
    assert_eq!(rt.handle_of(&a), Some(h));
    assert_eq!(rt.type_name(a.type_id), "world.Creature");

    let unknown = TypedHandle::new(99, 1, 1);
    assert!(matches!(
        rt.intern_handle(unknown, OwnershipMode::VmOwned),
        Err(RuntimeError::Linking { .. })
    ));
}

#[test]
fn test_handle_tag_collision() {
    let mut rt = creature_runtime();
    let err = rt
        .module("items")
        .handle_type("Sword", CREATURE_TAG)
        .finalize()
        .unwrap_err();
    assert!(err.to_string().contains("already registered as 'world.Creature'"), "{}", err);
}

#[test]
fn test_vm_owned_handles_are_finalized() {
    let mut rt = creature_runtime();
    let freed = Rc::new(RefCell::new(Vec::new()));
    let log = freed.clone();
    rt.register_handle_destructor(CREATURE_TAG, move |h| log.borrow_mut().push(h.id));

    let vm_owned = TypedHandle::new(CREATURE_TAG, 1, 1);
    let engine_owned = TypedHandle::new(CREATURE_TAG, 2, 1);
    rt.intern_handle(vm_owned, OwnershipMode::VmOwned).unwrap();
    rt.intern_handle(engine_owned, OwnershipMode::EngineOwned).unwrap();

    rt.collect_garbage();
    assert_eq!(*freed.borrow(), vec![1]);
    assert!(rt.lookup_handle(&vm_owned).is_none());
    assert!(rt.lookup_handle(&engine_owned).is_some());

    // 所有权交还 VM 后才会被回收
    assert!(rt.set_handle_ownership(&engine_owned, OwnershipMode::VmOwned));
    rt.collect_garbage();
    assert_eq!(*freed.borrow(), vec![1, 2]);
}

#[test]
fn test_handles_flow_through_scripts() {
    let mut rt = creature_runtime();
    let ty = rt.type_id("world.Creature").unwrap();
    rt.module("world")
        .function("spawn", &[TypeId::INT], ty, |rt, call| {
            let h = TypedHandle::new(CREATURE_TAG, call.int(0)? as u32, 1);
            rt.intern_handle(h, OwnershipMode::EngineOwned)
                .map_err(|e| e.to_string())
        })
        .function("id_of", &[ty], TypeId::INT, |rt, call| {
            let h = rt.handle_of(&call.arg(0)?).ok_or("not a handle")?;
            Ok(Value::int(h.id as i32))
        })
        .finalize()
        .unwrap();
    let id = load(
        &mut rt,
        "world",
        "type Creature;\n\
         extern fn spawn(id: int): Creature;\n\
         extern fn id_of(c: Creature): int;\n\
         fn main(): int { var c = spawn(12); return id_of(c); }",
    );
    assert_eq!(rt.execute_script(id, "main", &[], 0).value.as_int(), Some(12));
}

// ===== propset =====

#[test]
fn test_propset_lifecycle() {
    let mut rt = Runtime::new();
    let id = load(
        &mut rt,
        "test",
        "[[propset]] type Stats { hp: int; }\n\
         fn hit(o: object): int { var s = get_propset!(Stats)(o); s.hp = s.hp + 5; return s.hp; }",
    );
    let obj = ObjectHandle::new(3, 1, 0);
    let arg = [Value::object(obj)];
    assert_eq!(rt.execute_script(id, "hit", &arg, 0).value.as_int(), Some(5));
    assert_eq!(rt.execute_script(id, "hit", &arg, 0).value.as_int(), Some(10));

    rt.collect_garbage();
    assert_eq!(rt.execute_script(id, "hit", &arg, 0).value.as_int(), Some(15));

    assert_eq!(rt.destroy_object(obj), 1);
    assert_eq!(rt.execute_script(id, "hit", &arg, 0).value.as_int(), Some(5));
}

// ===== 宿主类型 =====

#[test]
fn test_register_type() {
    let mut rt = Runtime::new();
    let ints = rt.register_type("", TypeKind::Array(TypeId::INT)).unwrap();
    assert_eq!(rt.type_name(ints), "array!(int)");
    assert_eq!(rt.register_type("", TypeKind::Array(TypeId::INT)).unwrap(), ints);

    let gold = rt.register_type("host.Gold", TypeKind::Newtype(TypeId::INT)).unwrap();
    assert_eq!(rt.register_type("host.Gold", TypeKind::Newtype(TypeId::INT)).unwrap(), gold);
    let err = rt
        .register_type("host.Gold", TypeKind::Newtype(TypeId::FLOAT))
        .unwrap_err();
    assert!(matches!(err, RuntimeError::Layout { .. }));
}

#[allow(dead_code)]
#[repr(C)]
struct Vec2 {
    x: f32,
    y: f32,
}

fn geo_runtime() -> Runtime {
    let mut rt = Runtime::new();
    rt.module("geo")
        .native_struct::<Vec2>("Vec2")
        .field::<f32>("x", 0, TypeId::FLOAT)
        .field::<f32>("y", 4, TypeId::FLOAT)
        .end_struct()
        .finalize()
        .unwrap();
    rt
}

#[test]
fn test_native_struct_layout() {
    let mut rt = geo_runtime();
    load(
        &mut rt,
        "geo",
        "[[native]] type Vec2 { x, y: float; }\nfn len2(v: Vec2): float { return v.x * v.x + v.y * v.y; }",
    );
    let layout = rt.natives().struct_layout("geo.Vec2").unwrap();
    assert_eq!(layout.size, 8);
    assert_eq!(layout.fields.len(), 2);

    let mut rt = geo_runtime();
    let err = rt
        .load_module_from_source("geo", "[[native]] type Vec2 { x: float; }")
        .unwrap_err();
    assert!(err.to_string().contains("geo.Vec2"), "{}", err);

    let err = rt
        .load_module_from_source("geo", "[[native]] type Missing { x: float; }")
        .unwrap_err();
    assert!(err.to_string().contains("not registered by the host"), "{}", err);
}

#[test]
fn test_native_struct_field_past_end() {
    let mut rt = Runtime::new();
    let bad = rt
        .module("geo")
        .native_struct::<Vec2>("Broken")
        .field::<f32>("x", 8, TypeId::FLOAT)
        .end_struct()
        .finalize();
    assert!(matches!(bad, Err(RuntimeError::Linking { .. })));
}

// ===== 配置 =====

#[derive(Debug, Deserialize, PartialEq)]
enum Faction {
    Neutral,
    Guild(String),
}

#[derive(Debug, Deserialize, PartialEq)]
struct Npc {
    name: String,
    level: i32,
    speed: f32,
    faction: Faction,
}

#[test]
fn test_load_config() {
    let mut rt = Runtime::new();
    load(
        &mut rt,
        "npc.types",
        "type Faction = Neutral | Guild(string);\n\
         type Npc { name: string; level: int; speed: float; faction: Faction; }",
    );
    let npc: Npc = load_config(
        &mut rt,
        "smith",
        "Npc",
        r#"{ name = "Smith", level = 2 * 3, speed = 1.25, faction = Guild("forge") }"#,
        Some("npc.types"),
    )
    .unwrap();
    assert_eq!(
        npc,
        Npc {
            name: "Smith".into(),
            level: 6,
            speed: 1.25,
            faction: Faction::Guild("forge".into()),
        }
    );

    let plain: Faction =
        load_config(&mut rt, "plain", "Faction", "Neutral", Some("npc.types")).unwrap();
    assert_eq!(plain, Faction::Neutral);
}

#[test]
fn test_load_config_reports_failures() {
    let mut rt = Runtime::new();
    let err = load_config::<i32>(&mut rt, "zero", "int", "1 / 0", None).unwrap_err();
    assert!(!err.to_string().is_empty());
    let err = load_config::<Vec<i32>>(&mut rt, "words", "string[]", r#"{"a"}"#, None).unwrap_err();
    assert!(matches!(err, RuntimeError::Config { .. }), "{:?}", err);
}
