//! Compile, load, execute and measure
//!
//! [`Runner::compile_and_run`] is the outer boundary of the pipeline: every
//! failure below it, panics included, comes back as a [`Response`].
//!
//! ```text
//! source ──compile──▶ CompiledImage ──load──▶ LoadedImage ──dispatch──▶ output
//!            │                          │                    │
//!       Diagnostics                ImageError             VMError
//!         (200)                      (500)                 (500)
//! ```

use std::panic::{self, AssertUnwindSafe};
use std::sync::atomic::{AtomicU64, Ordering};

use parking_lot::Mutex;
use serde::{Deserialize, Serialize};
use thiserror::Error;
use tracing::{debug, info, warn};

use crate::frontend::Compiler;
use crate::middle::image::ImageError;
use crate::util::config::PlaygroundConfig;
use crate::util::diagnostic::Diagnostics;
use crate::vm::{LoadedImage, VMConfig, VMError};

pub mod accountant;
pub mod capture;
pub mod dispatch;
pub mod format;

pub use accountant::{AccountingError, Measured};
pub use capture::{with_captured_output, OutputBuffer};
pub use dispatch::{DispatchPolicy, DispatchReport};
pub use format::{Response, ResponseBody};

/// One submission
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct CodeRequest {
    #[serde(alias = "Code")]
    pub code: String,
}

impl CodeRequest {
    pub fn new(code: impl Into<String>) -> Self {
        Self { code: code.into() }
    }
}

/// Failures outside the program's own control
#[derive(Debug, Error)]
pub enum UnhandledError {
    #[error("failed to load image: {0}")]
    Load(#[from] ImageError),

    #[error("resource accounting failed: {0}")]
    Accounting(#[from] AccountingError),

    #[error("internal error: {0}")]
    Panic(String),
}

/// Pipeline failure, by stage
#[derive(Debug, Error)]
pub enum PipelineError {
    #[error("Compilation Error: {0}")]
    Compilation(Diagnostics),

    #[error("{0}")]
    Execution(#[from] VMError),

    #[error("{0}")]
    Unhandled(#[from] UnhandledError),
}

impl From<AccountingError> for PipelineError {
    fn from(err: AccountingError) -> Self {
        PipelineError::Unhandled(UnhandledError::Accounting(err))
    }
}

impl From<ImageError> for PipelineError {
    fn from(err: ImageError) -> Self {
        PipelineError::Unhandled(UnhandledError::Load(err))
    }
}

/// A successful run
#[derive(Debug, Clone)]
pub struct Execution {
    /// Captured output, trimmed
    pub output: String,
    pub elapsed_ms: u64,
    pub memory_mb: f64,
    pub report: DispatchReport,
    /// Compiler warnings of the submission
    pub warnings: Diagnostics,
}

/// The pipeline, configured once and shared by every call
#[derive(Debug)]
pub struct Runner {
    compiler: Compiler,
    vm_config: VMConfig,
    max_output_bytes: usize,
    policy: DispatchPolicy,
    /// Held for a whole pipeline when executions must not overlap
    gate: Option<Mutex<()>>,
    dispatches: AtomicU64,
}

impl Default for Runner {
    fn default() -> Self {
        Self::from_config(&PlaygroundConfig::default())
    }
}

impl Runner {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn from_config(config: &PlaygroundConfig) -> Self {
        Self {
            compiler: Compiler::new(),
            vm_config: config.limits.vm_config(),
            max_output_bytes: config.limits.max_output_bytes,
            policy: config.dispatch.policy,
            gate: config.dispatch.exclusive.then(|| Mutex::new(())),
            dispatches: AtomicU64::new(0),
        }
    }

    pub fn with_vm_config(
        mut self,
        vm_config: VMConfig,
    ) -> Self {
        self.vm_config = vm_config;
        self
    }

    pub fn with_policy(
        mut self,
        policy: DispatchPolicy,
    ) -> Self {
        self.policy = policy;
        self
    }

    pub fn with_max_output_bytes(
        mut self,
        max_output_bytes: usize,
    ) -> Self {
        self.max_output_bytes = max_output_bytes;
        self
    }

    pub fn compiler(&self) -> &Compiler {
        &self.compiler
    }

    /// Times dispatch has started, across all calls
    pub fn dispatch_count(&self) -> u64 {
        self.dispatches.load(Ordering::Relaxed)
    }

    /// Run one submission and format the outcome
    pub fn compile_and_run(
        &self,
        request: &CodeRequest,
    ) -> Response {
        let result = panic::catch_unwind(AssertUnwindSafe(|| self.run_source(&request.code)))
            .unwrap_or_else(|payload| {
                Err(UnhandledError::Panic(panic_message(payload.as_ref())).into())
            });

        let response = match result {
            Ok(execution) => {
                info!(
                    "Executed {}/{} entry point(s) in {} ms",
                    execution.report.attempted(),
                    execution.report.entry_points,
                    execution.elapsed_ms
                );
                format::success(&execution.output, execution.elapsed_ms, execution.memory_mb)
            }
            Err(PipelineError::Compilation(diagnostics)) => {
                info!("Compilation failed with {} error(s)", diagnostics.error_count());
                format::compilation_failure(&diagnostics)
            }
            Err(err) => {
                warn!("Execution fault: {}", err);
                format::internal_fault(err.to_string())
            }
        };
        debug!("Responding with status {}", response.status);
        response
    }

    /// Run one submission without formatting
    pub fn run_source(
        &self,
        source: &str,
    ) -> Result<Execution, PipelineError> {
        let _exclusive = self.gate.as_ref().map(|gate| gate.lock());
        let measured = accountant::try_measure(|| self.execute(source))?;
        let (output, report, warnings) = measured.value;
        Ok(Execution {
            output,
            elapsed_ms: measured.elapsed_ms,
            memory_mb: measured.memory_mb,
            report,
            warnings,
        })
    }

    fn execute(
        &self,
        source: &str,
    ) -> Result<(String, DispatchReport, Diagnostics), PipelineError> {
        let image = self
            .compiler
            .compile(source)
            .map_err(PipelineError::Compilation)?;
        let refs = self.compiler.references();
        let loaded = LoadedImage::load(&image, refs)?;

        self.dispatches.fetch_add(1, Ordering::Relaxed);
        let (report, output) = with_captured_output(self.max_output_bytes, |out| {
            dispatch::dispatch(&loaded, refs, &self.vm_config, self.policy, out)
        });

        if report.entry_points == 0 {
            warn!("No public static `Main` found; nothing was executed");
        }
        if let Some(err) = report.first_failure() {
            return Err(PipelineError::Execution(err.clone()));
        }
        Ok((output, report, image.warnings().clone()))
    }
}

fn panic_message(payload: &(dyn std::any::Any + Send)) -> String {
    if let Some(s) = payload.downcast_ref::<&str>() {
        (*s).to_string()
    } else if let Some(s) = payload.downcast_ref::<String>() {
        s.clone()
    } else {
        "panic with a non-string payload".to_string()
    }
}
