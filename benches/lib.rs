//! # YaoXiang Playground 性能基准测试
//!
//! 使用 Criterion.rs 进行性能基准测试。
//!
//! ## 基准测试分组
//! - `compiler`: 源码到镜像的编译效率
//! - `vm`: 已加载镜像的执行效率
//! - `pipeline`: 完整的 compile_and_run 流程
//!
//! ## 使用方法
//! ```bash
//! cargo bench            # 运行所有
//! cargo bench compiler   # 只运行编译器测试
//! ```

use criterion::{criterion_group, criterion_main, Criterion};
use yaoxiang_playground::runner::dispatch::{dispatch, DispatchPolicy};
use yaoxiang_playground::runner::OutputBuffer;
use yaoxiang_playground::std::ReferenceSet;
use yaoxiang_playground::vm::{LoadedImage, VMConfig};
use yaoxiang_playground::{CodeRequest, Compiler, Runner};

const PROGRAMS: &[&str] = &["fibonacci", "list_ops", "string_concat", "objects"];

fn read_program(name: &str) -> String {
    std::fs::read_to_string(format!("benches/yx_benchmarks/{}.yx", name))
        .unwrap_or_else(|e| panic!("Cannot read {}.yx: {}", name, e))
}

fn quiet_logs() {
    let _ = tracing_subscriber::fmt::Subscriber::builder()
        .with_max_level(tracing::Level::ERROR)
        .try_init();
}

// ============================================================================
// Compiler - 编译效率
// ============================================================================

fn bench_compile(c: &mut Criterion) {
    quiet_logs();
    let compiler = Compiler::new();
    for name in PROGRAMS {
        let source = read_program(name);
        c.bench_function(&format!("compile_{}", name), |b| {
            b.iter(|| compiler.compile(&source).expect("compilation failed"))
        });
    }
}

// ============================================================================
// VM - 执行效率
// ============================================================================

fn bench_execute(c: &mut Criterion) {
    quiet_logs();
    let refs = ReferenceSet::standard();
    let config = VMConfig::default();
    for name in PROGRAMS {
        let image = Compiler::new()
            .compile(&read_program(name))
            .expect("compilation failed");
        let loaded = LoadedImage::load(&image, refs).expect("load failed");
        c.bench_function(&format!("execute_{}", name), |b| {
            b.iter(|| {
                let mut output = OutputBuffer::new(1 << 20);
                let report = dispatch(&loaded, refs, &config, DispatchPolicy::FailFast, &mut output);
                assert!(report.first_failure().is_none());
                output
            })
        });
    }
}

// ============================================================================
// Pipeline - 完整流程
// ============================================================================

fn bench_pipeline(c: &mut Criterion) {
    quiet_logs();
    let runner = Runner::new();
    let request = CodeRequest::new(read_program("fibonacci"));
    c.bench_function("compile_and_run_fibonacci", |b| {
        b.iter(|| runner.compile_and_run(&request))
    });
}

// ============================================================================
// Criterion Groups
// ============================================================================

criterion_group!(
    name = compiler;
    config = Criterion::default().sample_size(50);
    targets = bench_compile
);

criterion_group!(
    name = vm;
    config = Criterion::default().sample_size(20);
    targets = bench_execute
);

criterion_group!(
    name = pipeline;
    config = Criterion::default().sample_size(10);
    targets = bench_pipeline
);

criterion_main!(compiler, vm, pipeline);
