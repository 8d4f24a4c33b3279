//! Sandbox limits observed through the pipeline

use std::time::{Duration, Instant};

use yaoxiang_playground::vm::VMConfig;
use yaoxiang_playground::{compile_and_run, CodeRequest, Response, ResponseBody, Runner};

fn fault_message(response: &Response) -> &str {
    match &response.body {
        ResponseBody::Fault { error } => error,
        ResponseBody::Text(text) => panic!("expected a fault, got text: {}", text),
    }
}

#[test]
fn test_infinite_loop_hits_deadline() {
    let runner = Runner::new().with_vm_config(VMConfig {
        timeout: Duration::from_millis(100),
        max_instructions: u64::MAX,
        ..VMConfig::default()
    });
    let started = Instant::now();
    let response = runner.compile_and_run(&CodeRequest::new(
        "pub fn Main() { let mut n = 0; while true { n = n + 1; if n > 1000000 { n = 0; } } }",
    ));
    assert_eq!(response.status, 500);
    assert_eq!(fault_message(&response), "execution timed out after 100 ms");
    assert!(started.elapsed() < Duration::from_secs(10));
}

#[test]
fn test_infinite_loop_hits_instruction_budget() {
    let runner = Runner::new().with_vm_config(VMConfig {
        max_instructions: 100_000,
        ..VMConfig::default()
    });
    let response = runner.compile_and_run(&CodeRequest::new("pub fn Main() { while true { } }"));
    assert_eq!(response.status, 500);
    assert_eq!(
        fault_message(&response),
        "instruction budget of 100000 exhausted"
    );
}

#[test]
fn test_unbounded_recursion_is_a_fault() {
    let response = compile_and_run(
        r#"
        fn forever(n: Int) -> Int { return forever(n + 1) + 1; }
        pub fn Main() { println(forever(0)); }
        "#,
    );
    assert_eq!(response.status, 500);
    assert!(fault_message(&response).starts_with("call stack overflow"));

    // The process is still healthy
    let again = compile_and_run(r#"pub fn Main() { println("alive"); }"#);
    assert!(again.to_string().starts_with("Output: alive, "));
}

#[test]
fn test_allocation_budget() {
    let runner = Runner::new().with_vm_config(VMConfig {
        max_alloc_bytes: 1 << 20,
        ..VMConfig::default()
    });
    let response = runner.compile_and_run(&CodeRequest::new(
        r#"pub fn Main() { let xs = []; while true { xs.push("xxxxxxxxxxxxxxxx" + len(xs)); } }"#,
    ));
    assert_eq!(response.status, 500);
    assert_eq!(
        fault_message(&response),
        "allocation budget of 1048576 bytes exceeded"
    );
}

#[test]
fn test_output_cap() {
    let runner = Runner::new().with_max_output_bytes(1000);
    let response = runner.compile_and_run(&CodeRequest::new(
        r#"pub fn Main() { while true { println("spam"); } }"#,
    ));
    assert_eq!(fault_message(&response), "output limit of 1000 bytes exceeded");
}

#[test]
fn test_host_modules_are_unreachable() {
    for module in ["std.os", "std.net", "std.ffi", "std.fs"] {
        let response = compile_and_run(&format!("use {}; pub fn Main() {{ }}", module));
        assert_eq!(response.status, 200);
        let text = response.to_string();
        assert!(text.starts_with("Compilation Error: "), "{}", text);
        assert!(text.contains("E0210"), "{}", text);
    }
}

#[test]
fn test_unimported_module_is_rejected() {
    let response = compile_and_run("pub fn Main() { println(math.sqrt(4.0)); }");
    assert!(response.to_string().contains("E0211"));
}

#[test]
fn test_deeply_nested_source_is_a_compilation_error() {
    let depth = 2000;
    let response = compile_and_run(&format!(
        "pub fn Main() {{ println({}1{}); }}",
        "(".repeat(depth),
        ")".repeat(depth)
    ));
    assert_eq!(response.status, 200);
    let text = response.to_string();
    assert!(text.starts_with("Compilation Error: "), "{}", text);
    assert!(text.contains("error E0102: nesting too deep"), "{}", text);
}

#[test]
fn test_deeply_nested_list_is_released() {
    let runner = Runner::new().with_vm_config(VMConfig {
        timeout: Duration::from_secs(30),
        ..VMConfig::default()
    });
    let response = runner.compile_and_run(&CodeRequest::new(
        r#"pub fn Main() { let mut a = []; for i in 0..200000 { a = [a]; } println("done"); }"#,
    ));
    assert_eq!(response.status, 200);
    assert!(response.to_string().starts_with("Output: done, "));
}

#[test]
fn test_printing_a_self_referencing_list_is_bounded() {
    let started = Instant::now();
    let response = compile_and_run(
        "pub fn Main() { let a = [1]; a.push(a); a.push(a); println(a); }",
    );
    assert_eq!(response.status, 500);
    assert!(
        fault_message(&response).starts_with("output limit of "),
        "{}",
        fault_message(&response)
    );
    assert!(started.elapsed() < Duration::from_secs(10));
}

#[test]
fn test_shared_values_cannot_stall_the_vm() {
    let started = Instant::now();
    let runner = Runner::new().with_vm_config(VMConfig {
        max_alloc_bytes: 1 << 20,
        ..VMConfig::default()
    });
    let response = runner.compile_and_run(&CodeRequest::new(
        r#"pub fn Main() {
            let mut a = [1];
            for _ in 0..48 { a = [a, a]; }
            let s = str(a);
        }"#,
    ));
    assert_eq!(response.status, 500);
    assert!(
        fault_message(&response).starts_with("allocation budget of "),
        "{}",
        fault_message(&response)
    );

    let response = compile_and_run(
        r#"pub fn Main() {
            let mut a = [1];
            let mut b = [1];
            for _ in 0..48 { a = [a, a]; b = [b, b]; }
            println(a == b);
        }"#,
    );
    assert_eq!(fault_message(&response), "values too large to compare");
    assert!(started.elapsed() < Duration::from_secs(20));
}
