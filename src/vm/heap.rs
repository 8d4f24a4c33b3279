//! Allocation accounting
//!
//! The VM does not manage memory itself (values are reference counted); it
//! charges every string, list and object it creates against a per-execution
//! budget so a program cannot grow the host process without bound.

use crate::vm::errors::{VMError, VMResult};

/// Running total of bytes allocated by one execution
#[derive(Debug, Clone)]
pub struct AllocMeter {
    used: usize,
    max: usize,
}

impl AllocMeter {
    pub fn new(max: usize) -> Self {
        Self { used: 0, max }
    }

    /// Charge `bytes`; fails once the budget is exceeded
    pub fn charge(
        &mut self,
        bytes: usize,
    ) -> VMResult<()> {
        self.used = self.used.saturating_add(bytes);
        if self.used > self.max {
            Err(VMError::AllocationBudget(self.max))
        } else {
            Ok(())
        }
    }

    pub fn used(&self) -> usize {
        self.used
    }

    pub fn limit(&self) -> usize {
        self.max
    }

    /// Bytes that can still be charged
    pub fn remaining(&self) -> usize {
        self.max.saturating_sub(self.used)
    }
}
