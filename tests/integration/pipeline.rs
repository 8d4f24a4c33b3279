//! End-to-end behaviour of `Runner::compile_and_run`

use yaoxiang_playground::runner::{DispatchPolicy, PipelineError};
use yaoxiang_playground::{compile_and_run, CodeRequest, Compiler, Response, ResponseBody, Runner};

/// Output part of a success text
fn output_of(response: &Response) -> String {
    let ResponseBody::Text(text) = &response.body else {
        panic!("expected text, got {:?}", response);
    };
    let rest = text
        .strip_prefix("Output: ")
        .unwrap_or_else(|| panic!("not a success text: {}", text));
    let (output, measurements) = rest
        .rsplit_once(", Elapsed Time: ")
        .unwrap_or_else(|| panic!("no elapsed time: {}", text));
    assert!(measurements.contains("ms, Memory Usage: "), "{}", text);
    assert!(measurements.ends_with(" MB"), "{}", text);
    output.to_string()
}

#[test]
fn test_output_equals_printed_text_trimmed() {
    let response = compile_and_run(
        r#"
        pub fn Main() {
            println("");
            println("  first");
            print("second  ");
            println();
        }
        "#,
    );
    assert_eq!(response.status, 200);
    assert_eq!(output_of(&response), "first\nsecond");
}

#[test]
fn test_memory_figure_is_positive() {
    let response = compile_and_run("pub fn Main() { }");
    let ResponseBody::Text(text) = &response.body else {
        panic!("{:?}", response);
    };
    let mb: f64 = text
        .rsplit_once("Memory Usage: ")
        .and_then(|(_, rest)| rest.strip_suffix(" MB"))
        .and_then(|n| n.parse().ok())
        .unwrap();
    assert!(mb > 0.0);
}

#[test]
fn test_compile_error_lists_every_diagnostic_and_skips_dispatch() {
    let runner = Runner::new();
    let source = "pub fn Main() { let x = 1 }\nfn f() { g(); }\nfn h() { y; }";
    let response = runner.compile_and_run(&CodeRequest::new(source));
    assert_eq!(response.status, 200);

    let ResponseBody::Text(text) = &response.body else {
        panic!("{:?}", response);
    };
    let diagnostics = Compiler::new().compile(source).unwrap_err();
    assert!(diagnostics.len() >= 3);
    assert_eq!(text, &format!("Compilation Error: {}", diagnostics.joined()));
    for diagnostic in diagnostics.iter() {
        assert!(text.contains(&diagnostic.to_string()));
    }
    assert_eq!(runner.dispatch_count(), 0);
}

#[test]
fn test_zero_entry_points_is_empty_success() {
    for source in ["", "fn Main() { println(1); }", "type T { pub fn Main(self) { } }"] {
        let response = compile_and_run(source);
        assert_eq!(response.status, 200, "{}", source);
        assert_eq!(output_of(&response), "", "{}", source);
    }
}

#[test]
fn test_raising_entry_point_is_fault_without_output() {
    let response = compile_and_run(
        r#"
        type Checker {
            pub fn Main() {
                println("checking");
                throw "invariant violated: " + 3;
            }
        }
        "#,
    );
    assert_eq!(response.status, 500);
    assert_eq!(
        response.body,
        ResponseBody::Fault {
            error: "invariant violated: 3".to_string()
        }
    );
    assert!(!response.to_string().contains("checking"));
}

#[test]
fn test_runtime_errors_are_faults() {
    let cases = [
        ("pub fn Main() { println(1 / 0); }", "division by zero"),
        (
            "pub fn Main() { let xs = [1, 2]; println(xs[5]); }",
            "index 5 out of bounds for length 2",
        ),
        (
            "pub fn Main() { println(\"a\" - 1); }",
            "type error: cannot apply `-` to String and Int",
        ),
    ];
    for (source, message) in cases {
        let response = compile_and_run(source);
        assert_eq!(response.status, 500, "{}", source);
        assert_eq!(
            response.body,
            ResponseBody::Fault {
                error: message.to_string()
            },
            "{}",
            source
        );
    }
}

#[test]
fn test_idempotent_output() {
    let source = r#"
        fn square(n: Int) -> Int { return n * n; }
        pub fn Main() {
            let mut total = 0;
            for i in 0..10 { total = total + square(i); }
            println("total", total);
        }
    "#;
    let first = compile_and_run(source);
    let second = compile_and_run(source);
    assert_eq!(output_of(&first), output_of(&second));
    assert_eq!(output_of(&first), "total 285");
}

#[test]
fn test_all_entry_points_run() {
    let response = compile_and_run(
        r#"
        type First { pub fn Main() { println("first"); } }
        pub fn Main() { println("module"); }
        type Second { pub fn Main() { println("second"); } }
        "#,
    );
    let output = output_of(&response);
    let mut lines: Vec<_> = output.lines().collect();
    lines.sort_unstable();
    assert_eq!(lines, ["first", "module", "second"]);
}

#[test]
fn test_continue_on_error_still_reports_first_failure() {
    let runner = Runner::new().with_policy(DispatchPolicy::ContinueOnError);
    let source = r#"
        type A { pub fn Main() { throw "a"; } }
        type B { pub fn Main() { throw "b"; } }
        type C { pub fn Main() { println("c"); } }
    "#;
    match runner.run_source(source) {
        Err(PipelineError::Execution(err)) => assert_eq!(err.to_string(), "a"),
        other => panic!("unexpected {:?}", other),
    }
    let response = runner.compile_and_run(&CodeRequest::new(source));
    assert_eq!(
        response.body,
        ResponseBody::Fault {
            error: "a".to_string()
        }
    );
}

#[test]
fn test_compiled_images_always_load() {
    let programs = [
        "",
        "pub fn Main() { }",
        "use std.math; pub fn Main() { println(math.sqrt(16.0), math.pi()); }",
        "type P { x: Int, y: Int fn sum(self) -> Int { return self.x + self.y; } }
         pub fn Main() { let p = P { y: 2, x: 1 }; println(p.sum()); }",
        "pub fn Main() { let mut i = 0; while i < 3 { i = i + 1; if i == 2 { continue; } } }",
    ];
    for source in programs {
        let image = Compiler::new().compile(source).unwrap();
        let module = image.decode().unwrap();
        assert_eq!(module.to_bytes(), image.bytes(), "{}", source);
    }
}
