//! Call-scoped output capture
//!
//! Every execution owns one [`OutputBuffer`]. Natives that print write into
//! the buffer handed to the VM, never to the process stdout, so concurrent
//! pipelines cannot see each other's output.

use crate::vm::{VMError, VMResult};

/// Output sink for one execution, capped at `limit` bytes
#[derive(Debug)]
pub struct OutputBuffer {
    text: String,
    limit: usize,
}

impl OutputBuffer {
    pub fn new(limit: usize) -> Self {
        Self {
            text: String::new(),
            limit,
        }
    }

    /// Append text; fails once the cap would be exceeded
    pub fn write_str(
        &mut self,
        s: &str,
    ) -> VMResult<()> {
        if self.text.len() + s.len() > self.limit {
            return Err(VMError::OutputLimit(self.limit));
        }
        self.text.push_str(s);
        Ok(())
    }

    pub fn as_str(&self) -> &str {
        &self.text
    }

    pub fn len(&self) -> usize {
        self.text.len()
    }

    pub fn is_empty(&self) -> bool {
        self.text.is_empty()
    }

    pub fn limit(&self) -> usize {
        self.limit
    }

    /// Bytes that can still be written
    pub fn remaining(&self) -> usize {
        self.limit.saturating_sub(self.text.len())
    }

    /// Captured text without leading or trailing whitespace
    pub fn into_trimmed(self) -> String {
        let trimmed = self.text.trim();
        if trimmed.len() == self.text.len() {
            self.text
        } else {
            trimmed.to_string()
        }
    }
}

/// Run `f` with a fresh buffer and return its result with the trimmed output
///
/// The buffer lives in this frame, so it is released on return and while
/// unwinding from a panic alike.
pub fn with_captured_output<T, F>(
    limit: usize,
    f: F,
) -> (T, String)
where
    F: FnOnce(&mut OutputBuffer) -> T,
{
    let mut buffer = OutputBuffer::new(limit);
    let value = f(&mut buffer);
    (value, buffer.into_trimmed())
}
