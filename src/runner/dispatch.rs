//! Entry point dispatch
//!
//! Finds every `pub` static zero-argument `Main` in a loaded image and runs
//! each one in a single VM, so the deadline and budgets cover the whole call.

use std::fmt;

use serde::{Deserialize, Serialize};
use tracing::debug;

use crate::runner::capture::OutputBuffer;
use crate::std::ReferenceSet;
use crate::vm::{LoadedImage, VMConfig, VMError, VM};

/// What to do after an entry point fails
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum DispatchPolicy {
    /// Stop at the first failure; later entry points do not run
    #[default]
    FailFast,
    /// Run every entry point
    ContinueOnError,
}

/// One discovered entry point
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct EntryPoint {
    pub type_idx: usize,
    pub method_idx: usize,
    /// Declaring type, `<module>` for a top-level `Main`
    pub type_name: String,
}

impl fmt::Display for EntryPoint {
    fn fmt(
        &self,
        f: &mut fmt::Formatter<'_>,
    ) -> fmt::Result {
        write!(f, "{}.Main", self.type_name)
    }
}

/// Outcome of one attempted entry point
#[derive(Debug, Clone, PartialEq)]
pub struct EntryOutcome {
    pub entry: EntryPoint,
    pub result: Result<(), VMError>,
}

/// Per-entry results of one dispatch
#[derive(Debug, Clone, PartialEq, Default)]
pub struct DispatchReport {
    /// Entry points found in the image
    pub entry_points: usize,
    /// Entry points attempted, in run order
    pub outcomes: Vec<EntryOutcome>,
    /// Instructions executed across all entry points
    pub instructions: u64,
}

impl DispatchReport {
    pub fn attempted(&self) -> usize {
        self.outcomes.len()
    }

    pub fn succeeded(&self) -> usize {
        self.outcomes.iter().filter(|o| o.result.is_ok()).count()
    }

    pub fn first_failure(&self) -> Option<&VMError> {
        self.outcomes.iter().find_map(|o| o.result.as_ref().err())
    }

    /// Collapse to the first failure, if any
    pub fn into_result(self) -> Result<(), VMError> {
        match self.outcomes.into_iter().find_map(|o| o.result.err()) {
            Some(err) => Err(err),
            None => Ok(()),
        }
    }
}

/// Budgets shared by every entry point of a call; once spent nothing else can run
fn exhausts_call(err: &VMError) -> bool {
    matches!(
        err,
        VMError::Timeout(_)
            | VMError::InstructionBudget(_)
            | VMError::AllocationBudget(_)
            | VMError::OutputLimit(_)
    )
}

/// Entry points of an image in enumeration order
pub fn entry_points(image: &LoadedImage) -> Vec<EntryPoint> {
    let module = image.module();
    module
        .entry_points()
        .into_iter()
        .map(|(type_idx, method_idx)| EntryPoint {
            type_idx,
            method_idx,
            type_name: module.types[type_idx].name.clone(),
        })
        .collect()
}

/// Run the entry points of `image`, writing program output to `output`
pub fn dispatch(
    image: &LoadedImage,
    refs: &'static ReferenceSet,
    config: &VMConfig,
    policy: DispatchPolicy,
    output: &mut OutputBuffer,
) -> DispatchReport {
    let entries = entry_points(image);
    let mut report = DispatchReport {
        entry_points: entries.len(),
        ..DispatchReport::default()
    };

    let mut vm = VM::new(image, refs, config.clone());
    for entry in entries {
        debug!("Invoking {}", entry);
        let result = vm
            .invoke(entry.type_idx, entry.method_idx, Vec::new(), output)
            .map(|_| ());
        if let Err(e) = &result {
            debug!("{} failed: {}", entry, e);
        }
        let stop = match &result {
            Ok(()) => false,
            Err(e) => policy == DispatchPolicy::FailFast || exhausts_call(e),
        };
        report.outcomes.push(EntryOutcome { entry, result });
        if stop {
            break;
        }
    }

    report.instructions = vm.instructions_executed();
    debug!(
        "Dispatched {}/{} entry point(s), {} instructions",
        report.attempted(),
        report.entry_points,
        report.instructions
    );
    report
}
