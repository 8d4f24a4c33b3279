//! YX language programs run through the full pipeline

use yaoxiang_playground::Runner;

fn run_ok(source: &str) -> String {
    match Runner::new().run_source(source) {
        Ok(execution) => execution.output,
        Err(e) => panic!("program failed: {}\n{}", e, source),
    }
}

#[test]
fn test_control_flow() {
    let output = run_ok(
        r#"
        fn classify(n: Int) -> String {
            if n < 0 {
                return "negative";
            } elif n == 0 {
                return "zero";
            } else {
                return "positive";
            }
        }

        pub fn Main() {
            println(classify(-5), classify(0), classify(7));
            let mut i = 0;
            let mut evens = [];
            while true {
                i = i + 1;
                if i > 10 { break; }
                if i % 2 == 1 { continue; }
                evens.push(i);
            }
            println(evens);
        }
        "#,
    );
    assert_eq!(output, "negative zero positive\n[2, 4, 6, 8, 10]");
}

#[test]
fn test_types_and_methods() {
    let output = run_ok(
        r#"
        pub type Stack {
            items: List[Int]

            pub fn new() -> Stack {
                return Stack { items: [] };
            }

            fn push(self, x: Int) {
                self.items.push(x);
            }

            fn pop(self) -> Int {
                return self.items.pop();
            }

            fn size(self) -> Int {
                return len(self.items);
            }
        }

        pub fn Main() {
            let s = Stack.new();
            for x in [1, 2, 3] { s.push(x * 10); }
            let top = s.pop();
            println(top, s.size(), s);
        }
        "#,
    );
    assert_eq!(output, "30 2 Stack { items: [10, 20] }");
}

#[test]
fn test_static_method_resolution() {
    let output = run_ok(
        r#"
        fn helper() -> String { return "top-level"; }

        type Greeter {
            fn helper() -> String { return "own"; }
            pub fn Main() { println(helper()); }
        }

        type Other {
            pub fn Main() { println(helper()); }
        }
        "#,
    );
    assert_eq!(output, "own\ntop-level");
}

#[test]
fn test_strings_and_std_modules() {
    let output = run_ok(
        r#"
        use std.string;
        use std.math;
        use std.list;

        pub fn Main() {
            let words = string.split("a,b,c", ",");
            println(string.join(words, "-"), len(words));
            println("  Mixed ".trim().upper(), "ABC".lower().contains("b"));
            println(math.max(3, 9), math.abs(-4), math.pow(2, 10), math.sqrt(2.25));
            println(list.sum(list.range(1, 5)), list.reverse([1, 2, 3]));
            println(str(1.0) + "!", string.parse_int("42") + 1, string.repeat("ab", 3));
        }
        "#,
    );
    assert_eq!(
        output,
        "a-b-c 3\nMIXED true\n9 4 1024 1.5\n10 [3, 2, 1]\n1.0! 43 ababab"
    );
}

#[test]
fn test_aliasing_and_equality() {
    let output = run_ok(
        r#"
        type Box { value: Int }

        fn bump(b: Box) { b.value = b.value + 1; }

        pub fn Main() {
            let a = [1, 2];
            let b = a;
            b.push(3);
            println(a, a == [1, 2, 3], [1, [2]] == [1, [2]]);

            let x = Box { value: 1 };
            let y = Box { value: 1 };
            bump(x);
            println(x.value, x == x, x == y);
        }
        "#,
    );
    assert_eq!(output, "[1, 2, 3] true true\n2 true false");
}

#[test]
fn test_ranges_and_string_iteration() {
    let output = run_ok(
        r#"
        pub fn Main() {
            let mut acc = "";
            for ch in "yx" { acc = acc + ch + "."; }
            let mut n = 0;
            for i in 3..6 { n = n + i; }
            for _ in 5..1 { n = 0; }
            println(acc, n, 2..4, "héllo"[1]);
        }
        "#,
    );
    assert_eq!(output, "y.x. 12 2..4 é");
}

#[test]
fn test_short_circuit_and_numbers() {
    let output = run_ok(
        r#"
        fn boom() -> Bool { throw "evaluated"; }

        pub fn Main() {
            println(false && boom(), true || boom());
            println(7 / 2, -7 / 2, 7 % 3, 7.0 / 2, 1 + 0.5, 2.0 * 2);
            println(1 < 2 && 2.5 >= 2, "a" < "b", !(1 == 1.0));
        }
        "#,
    );
    assert_eq!(output, "false true\n3 -3 1 3.5 1.5 4.0\ntrue true false");
}

#[test]
fn test_benchmark_programs_run() {
    let dir = std::path::Path::new(env!("CARGO_MANIFEST_DIR")).join("benches/yx_benchmarks");
    let expected = [
        ("fibonacci.yx", "23416728348467685 6765"),
        ("list_ops.yx", "2000 1143 6001 5"),
        ("string_concat.yx", "1890 501"),
        ("objects.yx", "Vec2 { x: 500.0, y: 1500.0 }"),
    ];
    for (file, output) in expected {
        let source = std::fs::read_to_string(dir.join(file)).unwrap();
        assert_eq!(run_ok(&source), output, "{}", file);
    }
}
