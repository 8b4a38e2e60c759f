//! VM 执行测试
//!
//! 端到端测试：装载、编译并执行 Smalls 代码

mod common;
use common::{run_code, run_fn, run_with_gas};
use smalls_core::Value;

// ===== 基础运算 =====

#[test]
fn test_add() {
    let run = run_fn(
        "fn add(x:int,y:int):int { return x+y; }",
        "add",
        &[Value::int(10), Value::int(32)],
    );
    assert_eq!(run.int(), Some(42));
}

#[test]
fn test_operator_precedence() {
    let run = run_code("fn main(): int { return 2 + 3 * 4 - (8 - 6) * 2; }");
    assert_eq!(run.int(), Some(10));
}

#[test]
fn test_int_arithmetic_wraps() {
    let run = run_code("fn main(): int { var x = 2147483647; return x + 1; }");
    assert_eq!(run.int(), Some(i32::MIN));
}

#[test]
fn test_float_arithmetic() {
    let run = run_code("fn main(): float { var x = 1.5; return x * 4.0 - 0.5; }");
    assert_eq!(run.float(), Some(5.5));
}

#[test]
fn test_modulo_and_bits() {
    let run = run_code("fn main(): int { return (17 % 5) + (6 & 3) + (1 << 4); }");
    assert_eq!(run.int(), Some(2 + 2 + 16));
}

#[test]
fn test_short_circuit() {
    let src = r#"
        var calls = 0;
        fn touch(): bool { calls = calls + 1; return true; }
        fn main(): int {
            if (false && touch()) { return -1; }
            if (true || touch()) { return calls; }
            return -2;
        }
    "#;
    assert_eq!(run_code(src).int(), Some(0));
}

// ===== 控制流 =====

#[test]
fn test_sum_loop() {
    let run = run_fn(
        "fn sum(n:int):int { var t=0; for(var i=1;i<=n;i=i+1){t=t+i;} return t; }",
        "sum",
        &[Value::int(5)],
    );
    assert_eq!(run.int(), Some(15));
}

#[test]
fn test_recursion() {
    let run = run_fn(
        "fn fact(n:int):int { if (n<=1){return 1;} return n*fact(n-1); }",
        "fact",
        &[Value::int(5)],
    );
    assert_eq!(run.int(), Some(120));
}

#[test]
fn test_elif_chain() {
    let src = r#"
        fn grade(n: int): string {
            if (n >= 90) { return "A"; } elif (n >= 80) { return "B"; } else { return "C"; }
        }
    "#;
    assert_eq!(run_fn(src, "grade", &[Value::int(85)]).string().as_deref(), Some("B"));
    assert_eq!(run_fn(src, "grade", &[Value::int(12)]).string().as_deref(), Some("C"));
}

#[test]
fn test_break_and_continue() {
    let src = r#"
        fn main(): int {
            var n = 0;
            for (var i = 0; i < 10; i = i + 1) {
                if (i == 3) { continue; }
                if (i == 7) { break; }
                n = n + i;
            }
            return n;
        }
    "#;
    assert_eq!(run_code(src).int(), Some(0 + 1 + 2 + 4 + 5 + 6));
}

#[test]
fn test_foreach_array_and_map() {
    let src = r#"
        fn main(): int {
            var total = 0;
            for (x in {1, 2, 3}) { total = total + x; }
            var m = {"a": 10, "b": 20};
            for (k, v in m) { total = total + v; }
            return total;
        }
    "#;
    assert_eq!(run_code(src).int(), Some(36));
}

#[test]
fn test_deep_tail_recursion() {
    // 深度超过调用栈上限，只有尾调用能跑完
    let src = "fn down(n: int): int { if (n == 0) { return 7; } return down(n - 1); }";
    let run = run_fn(src, "down", &[Value::int(5000)]);
    assert_eq!(run.int(), Some(7));
}

// ===== 闭包 =====

#[test]
fn test_closure_counter() {
    let src = r#"
        fn counter(): fn(): int {
            var n = 0;
            return fn(): int { n = n + 1; return n; };
        }
        fn main(): int {
            var c = counter();
            var first = c();
            var second = c();
            return first * 10 + second;
        }
    "#;
    assert_eq!(run_code(src).int(), Some(12));
}

#[test]
fn test_closures_share_captured_variable() {
    let src = r#"
        fn main(): int {
            var x = 1;
            var inc = fn() { x = x + 1; };
            var get = fn(): int { return x; };
            inc();
            inc();
            return get();
        }
    "#;
    assert_eq!(run_code(src).int(), Some(3));
}

// ===== 字符串 =====

#[test]
fn test_format() {
    let src = r#"
        from core.string import { format };
        fn main(): string { return format("Point({}, {})", {10, 20}); }
    "#;
    assert_eq!(run_code(src).string().as_deref(), Some("Point(10, 20)"));
}

#[test]
fn test_fstring() {
    let src = r#"
        fn main(): string { var x = 42; return f"The answer is {x}"; }
    "#;
    assert_eq!(run_code(src).string().as_deref(), Some("The answer is 42"));
}

#[test]
fn test_string_concat_and_cast() {
    let src = r#"fn main(): string { return "n=" + (3 as string) + ", f=" + (2.5 as string); }"#;
    assert_eq!(run_code(src).string().as_deref(), Some("n=3, f=2.5"));
}

// ===== 复合类型 =====

#[test]
fn test_struct_fields() {
    let src = r#"
        type Point { x: int; y: int; }
        fn main(): int { var p: Point = { x=10, y=20 }; return p.x + p.y; }
    "#;
    assert_eq!(run_code(src).int(), Some(30));
}

#[test]
fn test_struct_field_assignment() {
    let src = r#"
        type Point { x, y: int; }
        fn main(): int { var p: Point = { x = 1, y = 2 }; p.y = 40; return p.x + p.y; }
    "#;
    assert_eq!(run_code(src).int(), Some(41));
}

#[test]
fn test_switch_on_sum() {
    let src = r#"
        type Res = Ok(int) | Err;
        fn pick(res: Res): int {
            switch (res) { case Ok(v): return v; case Err: return -1; }
        }
        fn with_err(): int { return pick(Err); }
        fn with_ok(): int { return pick(Ok(7)); }
    "#;
    assert_eq!(run_fn(src, "with_err", &[]).int(), Some(-1));
    assert_eq!(run_fn(src, "with_ok", &[]).int(), Some(7));
}

#[test]
fn test_switch_on_int_with_default() {
    let src = r#"
        fn name(n: int): string {
            switch (n) { case 1: return "one"; case 2: return "two"; default: return "many"; }
        }
    "#;
    assert_eq!(run_fn(src, "name", &[Value::int(2)]).string().as_deref(), Some("two"));
    assert_eq!(run_fn(src, "name", &[Value::int(9)]).string().as_deref(), Some("many"));
}

#[test]
fn test_tuples_and_multiple_returns() {
    let src = r#"
        fn divmod(a: int, b: int): (int, int) { return a / b, a % b; }
        fn main(): int { var q, r = divmod(17, 5); return q * 10 + r; }
    "#;
    assert_eq!(run_code(src).int(), Some(32));
}

#[test]
fn test_array_index_and_len() {
    let src = r#"
        fn main(): int {
            var xs = {4, 5, 6};
            xs[1] = 50;
            return xs[0] + xs[1] + array_len(xs);
        }
    "#;
    assert_eq!(run_code(src).int(), Some(57));
}

#[test]
fn test_newtype_cast() {
    let src = r#"
        type Meters(float);
        fn main(): float { var m = Meters(2.5); return (m as float) * 2.0; }
    "#;
    assert_eq!(run_code(src).float(), Some(5.0));
}

// ===== 用户运算符 =====

const ORDERED_V: &str = r#"
    type V { x, y: int; }
    [[operator(eq)]] fn veq(a: V, b: V): bool { return a.x == b.x; }
    [[operator(lt)]] fn vlt(a: V, b: V): bool { return a.x < b.x; }
"#;

#[test]
fn test_synthesized_comparisons_match_expansion() {
    let src = format!(
        "{}{}",
        ORDERED_V,
        r#"
        fn mismatches(a: V, b: V): int {
            var bad = 0;
            if ((a > b) != vlt(b, a)) { bad = bad + 1; }
            if ((a >= b) != !vlt(a, b)) { bad = bad + 10; }
            if ((a <= b) != (vlt(a, b) || veq(a, b))) { bad = bad + 100; }
            if ((a != b) != !veq(a, b)) { bad = bad + 1000; }
            return bad;
        }
        fn main(): int[] {
            var lo: V = { x = 1, y = 9 };
            var hi: V = { x = 2, y = 0 };
            var same: V = { x = 1, y = 5 };
            return { mismatches(lo, hi), mismatches(hi, lo), mismatches(lo, same), mismatches(same, same) };
        }
    "#
    );
    assert_eq!(run_code(&src).ints(), Some(vec![0, 0, 0, 0]));
}

#[test]
fn test_synthesized_comparison_results() {
    let src = format!(
        "{}{}",
        ORDERED_V,
        r#"
        fn flags(a: V, b: V): int {
            var out = 0;
            if (a > b) { out = out + 1; }
            if (a >= b) { out = out + 2; }
            if (a <= b) { out = out + 4; }
            if (a != b) { out = out + 8; }
            return out;
        }
        fn main(): int[] {
            var lo: V = { x = 1, y = 9 };
            var hi: V = { x = 2, y = 0 };
            var same: V = { x = 1, y = 5 };
            return { flags(lo, hi), flags(hi, lo), flags(lo, same) };
        }
    "#
    );
    assert_eq!(run_code(&src).ints(), Some(vec![4 + 8, 1 + 2 + 8, 2 + 4]));
}

#[test]
fn test_map_keys_use_user_hash_and_eq() {
    let src = r#"
        import core.map as maps;
        type Key { a: int; tag: string; }
        [[operator(hash)]] fn khash(k: Key): int { return k.a % 3; }
        [[operator(eq)]] fn keq(x: Key, y: Key): bool { return x.a == y.a; }
        fn main(): int[] {
            var k1: Key = { a = 4, tag = "first" };
            var k2: Key = { a = 4, tag = "second" };
            var k3: Key = { a = 7, tag = "other" };
            var m = map!(Key, int)();
            m[k1] = 10;
            m[k2] = m[k2] + 1;
            map_set(m, k3, 5);
            var same_a: Key = { a = 4, tag = "" };
            var absent: Key = { a = 1, tag = "" };
            var found = 0;
            if (maps.has_key(m, same_a)) { found = 1; }
            return { m[k1], map_get(m, k3), map_len(m), found, maps.get(m, absent, -1) };
        }
    "#;
    assert_eq!(run_code(src).ints(), Some(vec![11, 5, 2, 1, -1]));
}

// ===== 失败与额度 =====

#[test]
fn test_gas_limit() {
    let run = run_with_gas("fn main() { for {} }", 1000);
    assert!(!run.is_ok());
    assert_eq!(run.error(), "Script exceeded execution limit");
}

#[test]
fn test_division_by_zero() {
    let run = run_code("fn main(): int { return 10 / 0; }");
    assert!(run.result.failed);
    assert!(!run.error().is_empty());
}

#[test]
fn test_index_out_of_bounds() {
    let run = run_code("fn main(): int { var xs = {1, 2}; return xs[5]; }");
    assert!(!run.is_ok());
    assert!(run.error().contains("out of bounds"), "{}", run.error());
}

#[test]
fn test_stack_overflow() {
    let src = "fn f(n: int): int { return f(n + 1) + 1; }\nfn main(): int { return f(0); }";
    let run = run_code(src);
    assert!(!run.is_ok());
    assert_eq!(run.error(), "stack overflow");
}

#[test]
fn test_stack_trace_and_fault_line() {
    let src = "fn inner(d: int): int {\n  return 1 / d;\n}\nfn main(): int {\n  return inner(0) + 1;\n}";
    let run = run_code(src);
    assert!(!run.is_ok());
    let trace = &run.result.stack_trace;
    assert_eq!(trace.len(), 2, "{:?}", trace);
    assert_eq!(trace[0], "inner (test:2)");
    assert_eq!(trace[1], "main (test:5)");
    assert_eq!(run.result.error_module.as_deref(), Some("test"));
    assert_eq!(run.result.error_line, Some(2));
}

#[test]
fn test_runtime_recovers_after_failure() {
    let mut run = run_code("fn main(): int { var z = 0; return 1 / z; }\nfn ok(): int { return 5; }");
    assert!(run.rt.last_error().is_some());
    let id = run.rt.module_id("test").unwrap();
    let again = run.rt.execute_script(id, "ok", &[], 0);
    assert_eq!(again.value.as_int(), Some(5));
    run.rt.reset_error();
    assert!(run.rt.last_error().is_none());
}

#[test]
fn test_missing_entry() {
    let run = run_fn("fn f() {}", "g", &[]);
    assert!(!run.is_ok());
    assert!(run.error().contains("has no function 'g'"), "{}", run.error());
}

#[test]
fn test_wrong_argument_type() {
    let run = run_fn("fn f(x: int): int { return x; }", "f", &[Value::float(1.0)]);
    assert!(!run.is_ok());
    assert!(run.error().contains("expected int, got float"), "{}", run.error());
}

// ===== 全局变量 =====

#[test]
fn test_globals_are_initialized_once() {
    let src = r#"
        var hits = 0;
        var base = 40 + 2;
        fn bump(): int { hits = hits + 1; return base + hits; }
    "#;
    let mut run = run_fn(src, "bump", &[]);
    assert_eq!(run.int(), Some(43));
    let id = run.rt.module_id("test").unwrap();
    let again = run.rt.execute_script(id, "bump", &[], 0);
    assert_eq!(again.value.as_int(), Some(44));
    assert_eq!(run.rt.global(id, "hits").and_then(|v| v.as_int()), Some(2));
}
