//! 标准库测试
//!
//! prelude 内建函数与 core.* 模块

mod common;
use common::{capture_output, load, run_code};
use smalls_core::Runtime;

// ===== prelude =====

#[test]
fn test_print_and_println() {
    let mut rt = Runtime::new();
    let out = capture_output(&mut rt);
    let id = load(
        &mut rt,
        "test",
        r#"fn main() { print("a"); print(1); println(2.5); println({1, 2}); }"#,
    );
    assert!(rt.execute_script(id, "main", &[], 0).is_ok());
    assert_eq!(out.borrow().as_str(), "a12.5\n[1, 2]\n");
}

#[test]
fn test_assert_and_error() {
    let run = run_code("fn main() { assert(1 + 1 == 3); }");
    assert_eq!(run.error(), "Assertion failed");

    let run = run_code(r#"fn main() { error("bad input"); }"#);
    assert_eq!(run.error(), "bad input");

    let run = run_code(r#"fn main() { panic("lost"); }"#);
    assert_eq!(run.error(), "panic: lost");
}

#[test]
fn test_array_intrinsics() {
    let src = r#"
        fn main(): int[] {
            var xs = array!(int)();
            array_push(xs, 1);
            array_push(xs, 2);
            array_push(xs, 3);
            var last = array_pop(xs);
            array_set(xs, 0, array_get(xs, 0) + last * 10);
            array_push(xs, array_len(xs));
            return xs;
        }
    "#;
    assert_eq!(run_code(src).ints(), Some(vec![31, 2, 2]));
}

#[test]
fn test_array_get_out_of_bounds() {
    let run = run_code("fn main(): int { return array_get({1}, 3); }");
    assert_eq!(run.error(), "index 3 out of bounds for length 1");
}

#[test]
fn test_map_intrinsics() {
    let src = r#"
        fn main(): int {
            var m = {"a": 1, "b": 2};
            map_set(m, "c", 3);
            map_set(m, "a", 10);
            var removed = map_remove(m, "b");
            if (!removed || map_remove(m, "zzz")) { return -1; }
            return map_get(m, "a") + map_get(m, "c") + map_len(m);
        }
    "#;
    assert_eq!(run_code(src).int(), Some(15));
}

#[test]
fn test_map_get_missing_key() {
    let run = run_code(r#"fn main(): int { var m = {"a": 1}; return map_get(m, "b"); }"#);
    assert!(!run.is_ok());
    assert!(run.error().contains("not found"), "{}", run.error());
}

#[test]
fn test_string_intrinsics() {
    let src = r#"
        fn main(): string {
            var s = "Hello, World";
            var parts = string_split(s, ", ");
            var joined = string_join(parts, "|");
            return joined + " " + int_to_string(string_len(s))
                + " " + string_substr(s, 7, 5)
                + " " + int_to_string(string_find(s, "World"))
                + " " + string_to_upper("ab") + string_to_lower("CD")
                + " " + string_replace("a-b-c", "-", "+");
        }
    "#;
    assert_eq!(
        run_code(src).string().as_deref(),
        Some("Hello|World 12 World 7 ABcd a+b+c")
    );
}

#[test]
fn test_string_predicates() {
    let src = r#"
        fn main(): bool {
            return string_contains("smalls", "all")
                && string_starts_with("smalls", "sm")
                && string_ends_with("smalls", "ls")
                && !string_contains("smalls", "xyz");
        }
    "#;
    assert_eq!(run_code(src).bool(), Some(true));
}

#[test]
fn test_number_parsing() {
    let run = run_code(r#"fn main(): int { return string_to_int("41") + 1; }"#);
    assert_eq!(run.int(), Some(42));
    let run = run_code(r#"fn main(): float { return string_to_float("2.5") * 2.0; }"#);
    assert_eq!(run.float(), Some(5.0));
    let run = run_code(r#"fn main(): int { return string_to_int("forty"); }"#);
    assert_eq!(run.error(), "cannot parse 'forty' as int");
}

#[test]
fn test_generic_number_helpers() {
    let src = r#"
        fn main(): int { return abs(-4) + min(3, 9) + max(3, 9) + clamp(50, 0, 10); }
    "#;
    assert_eq!(run_code(src).int(), Some(4 + 3 + 9 + 10));
    let run = run_code("fn main(): float { return max(1.5, -2.0); }");
    assert_eq!(run.float(), Some(1.5));
}

// ===== core.array =====

#[test]
fn test_array_higher_order() {
    let src = r#"
        import core.array as arr;
        fn main(): int {
            var xs = {1, 2, 3, 4, 5};
            var doubled = arr.map(xs, fn(x: int): int { return x * 2; });
            var even = arr.filter(doubled, fn(x: int): bool { return x % 4 == 0; });
            return arr.reduce(even, 0, fn(acc: int, x: int): int { return acc + x; });
        }
    "#;
    assert_eq!(run_code(src).int(), Some(4 + 8));
}

#[test]
fn test_array_map_changes_element_type() {
    let src = r##"
        import core.array as arr;
        fn main(): string[] { return arr.map({1, 2}, fn(x: int): string { return f"#{x}"; }); }
    "##;
    let run = run_code(src);
    assert!(run.is_ok(), "{}", run.error());
    let items = run.rt.array_items(&run.value()).unwrap();
    let texts: Vec<&str> = items.iter().filter_map(|v| run.rt.get_string(v)).collect();
    assert_eq!(texts, vec!["#1", "#2"]);
}

#[test]
fn test_array_sort_is_stable() {
    let src = r#"
        import core.array as arr;
        type Item { key: int; tag: int; }
        fn main(): int[] {
            var items: Item[] = {{key = 2, tag = 0}, {key = 1, tag = 1}, {key = 2, tag = 2}, {key = 1, tag = 3}};
            arr.sort(items, fn(a: Item, b: Item): bool { return a.key < b.key; });
            return arr.map(items, fn(i: Item): int { return i.tag; });
        }
    "#;
    assert_eq!(run_code(src).ints(), Some(vec![1, 3, 0, 2]));
}

#[test]
fn test_array_find_reverse_slice() {
    let src = r#"
        import core.array as arr;
        fn main(): int[] {
            var xs = {5, 6, 7, 8};
            var at = arr.find(xs, fn(x: int): bool { return x == 7; });
            var none = arr.find(xs, fn(x: int): bool { return x > 100; });
            arr.reverse(xs);
            var tail = arr.slice(xs, -2, 100);
            arr.push(tail, at);
            arr.push(tail, none);
            return tail;
        }
    "#;
    assert_eq!(run_code(src).ints(), Some(vec![6, 5, 2, -1]));
}

// ===== core.map =====

#[test]
fn test_map_module() {
    let src = r#"
        import core.map as maps;
        import core.array as arr;
        fn main(): int {
            var m = {"x": 1, "y": 2, "z": 3};
            var ks = maps.keys(m);
            var vs = maps.values(m);
            var total = arr.reduce(vs, 0, fn(a: int, b: int): int { return a + b; });
            if (!maps.has_key(m, "y") || maps.has_key(m, "w")) { return -1; }
            return total * 100 + arr.len(ks) * 10 + maps.get(m, "w", 7);
        }
    "#;
    assert_eq!(run_code(src).int(), Some(637));
}

#[test]
fn test_map_keys_keep_insertion_order() {
    let src = r#"
        import core.map as maps;
        fn main(): string[] {
            var m = {"b": 1, "a": 2};
            map_set(m, "c", 3);
            return maps.keys(m);
        }
    "#;
    let run = run_code(src);
    assert!(run.is_ok(), "{}", run.error());
    let items = run.rt.array_items(&run.value()).unwrap();
    let keys: Vec<&str> = items.iter().filter_map(|v| run.rt.get_string(v)).collect();
    assert_eq!(keys, vec!["b", "a", "c"]);
}

// ===== core.string =====

#[test]
fn test_string_module() {
    let src = r#"
        from core.string import { pad_left, pad_right, last_index_of, count, trim, format };
        fn main(): string {
            return pad_left("7", 3, "0") + "|" + pad_right("ab", 4, ".")
                + "|" + (last_index_of("abcabc", "bc") as string)
                + "|" + (count("banana", "an") as string)
                + "|" + trim("  x  ")
                + "|" + format("{} + {} = {{sum}}", {1, 2});
        }
    "#;
    assert_eq!(
        run_code(src).string().as_deref(),
        Some("007|ab..|4|2|x|1 + 2 = {sum}")
    );
}

// ===== core.math =====

#[test]
fn test_math_module() {
    let src = r#"
        import core.math as math;
        fn main(): float { return math.sqrt(16.0) + math.pow(2.0, 3.0) + math.floor(2.7) + math.ceil(0.2); }
    "#;
    assert_eq!(run_code(src).float(), Some(4.0 + 8.0 + 2.0 + 1.0));
}

// ===== core.test =====

#[test]
fn test_test_module() {
    let mut rt = Runtime::new();
    let out = capture_output(&mut rt);
    let id = load(
        &mut rt,
        "test",
        r#"
        import core.test as t;
        fn main(): string {
            t.reset();
            t.test("adds", 1 + 1 == 2);
            t.test("breaks", 1 + 1 == 3);
            t.test("concat", "a" + "b" == "ab");
            return t.summary();
        }
        fn failed(): int { return t.failures() * 10 + t.count(); }
        "#,
    );
    let res = rt.execute_script(id, "main", &[], 0);
    assert!(res.is_ok(), "{}", res.error_message);
    assert_eq!(
        rt.get_string(&res.value),
        Some("Tests: 2 passed, 1 failed, 3 total")
    );
    assert_eq!(
        out.borrow().as_str(),
        "  PASS: adds\n  FAIL: breaks\n  PASS: concat\n"
    );
    assert_eq!(rt.execute_script(id, "failed", &[], 0).value.as_int(), Some(13));
}

// ===== GC =====

#[test]
fn test_gc_collect_keeps_live_values() {
    let src = r#"
        fn main(): int {
            var keep = {1, 2, 3};
            for (var i = 0; i < 200; i = i + 1) {
                var garbage = {i, i + 1};
                garbage[0] = i;
            }
            gc_collect();
            return keep[0] + keep[1] + keep[2];
        }
    "#;
    let run = run_code(src);
    assert_eq!(run.int(), Some(6));
    let stats = run.rt.stats();
    assert!(stats.gc.full_collections >= 1);
}
