//! YaoXiang Playground
//!
//! Compiles YX source text, runs every public static `Main` inside a
//! sandboxed bytecode VM and reports the captured output with timing and
//! memory figures.
//!
//! # Example
//!
//! ```rust
//! use yaoxiang_playground::{compile_and_run, ResponseBody};
//!
//! let response = compile_and_run(r#"pub fn Main() { println("Hello, YX!"); }"#);
//! assert_eq!(response.status, 200);
//! if let ResponseBody::Text(text) = &response.body {
//!     assert!(text.starts_with("Output: Hello, YX!, Elapsed Time: "));
//! }
//! ```
//!
//! # Layout
//!
//! - [`frontend`]: lexer, parser, resolver, [`Compiler`]
//! - [`middle`]: bytecode, code generation, binary image
//! - [`vm`]: sandboxed interpreter with deadline and budgets
//! - [`std`]: natives reachable from YX code
//! - [`runner`]: capture, dispatch, accounting, formatting
//! - [`service`]: JSON-lines TCP front end

#![warn(rust_2018_idioms)]

pub mod frontend;
pub mod middle;
pub mod runner;
pub mod service;
pub mod std;
pub mod util;
pub mod vm;

pub use frontend::Compiler;
pub use middle::image::CompiledImage;
pub use runner::{CodeRequest, Response, ResponseBody, Runner};
pub use util::diagnostic::Diagnostics;

use tracing::debug;

/// Crate version
pub const VERSION: &str = env!("CARGO_PKG_VERSION");

/// Product name
pub const NAME: &str = "YaoXiang Playground (爻象)";

/// Run source text through the full pipeline with default settings
pub fn compile_and_run(code: &str) -> Response {
    debug!("compile_and_run called ({} bytes)", code.len());
    Runner::new().compile_and_run(&CodeRequest::new(code))
}

/// Compile without running; `Ok` carries the warnings
pub fn check(source: &str) -> Result<Diagnostics, Diagnostics> {
    Compiler::new()
        .compile(source)
        .map(|image| image.warnings().clone())
}

/// Human-readable layout of the image compiled from `source`
pub fn dump(source: &str) -> Result<String, Diagnostics> {
    let (module, _) = Compiler::new().compile_module(source)?;
    Ok(format!(
        "Magic: 0x{:08X} (YXBC)\nVersion: {}\nSize: {} bytes\n\n{}",
        middle::image::MAGIC,
        middle::image::VERSION,
        module.to_bytes().len(),
        module
    ))
}
