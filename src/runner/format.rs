//! Result formatting
//!
//! Every pipeline outcome becomes a [`Response`]. Compilation failures and
//! successes are `200` text; execution and unhandled failures are `500`
//! faults serialised as `{"Error": "..."}`.

use std::fmt;

use serde::{Deserialize, Serialize};

use crate::util::diagnostic::Diagnostics;

pub const STATUS_OK: u16 = 200;
pub const STATUS_BAD_REQUEST: u16 = 400;
pub const STATUS_PAYLOAD_TOO_LARGE: u16 = 413;
pub const STATUS_INTERNAL_ERROR: u16 = 500;

/// Response body
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(untagged)]
pub enum ResponseBody {
    Text(String),
    Fault {
        #[serde(rename = "Error")]
        error: String,
    },
}

/// Pipeline response
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Response {
    pub status: u16,
    pub body: ResponseBody,
}

impl Response {
    pub fn text(text: impl Into<String>) -> Self {
        Self {
            status: STATUS_OK,
            body: ResponseBody::Text(text.into()),
        }
    }

    pub fn fault(
        status: u16,
        error: impl Into<String>,
    ) -> Self {
        Self {
            status,
            body: ResponseBody::Fault {
                error: error.into(),
            },
        }
    }

    pub fn is_fault(&self) -> bool {
        matches!(self.body, ResponseBody::Fault { .. })
    }

    /// Body as JSON, the way the service writes it
    pub fn body_json(&self) -> String {
        serde_json::to_string(&self.body).unwrap_or_else(|_| String::from("null"))
    }
}

impl fmt::Display for Response {
    fn fmt(
        &self,
        f: &mut fmt::Formatter<'_>,
    ) -> fmt::Result {
        match &self.body {
            ResponseBody::Text(text) => f.write_str(text),
            ResponseBody::Fault { .. } => f.write_str(&self.body_json()),
        }
    }
}

/// `200` text listing every diagnostic
pub fn compilation_failure(diagnostics: &Diagnostics) -> Response {
    Response::text(format!("Compilation Error: {}", diagnostics.joined()))
}

/// `500` fault for a failed execution or an unhandled error
pub fn internal_fault(message: impl Into<String>) -> Response {
    Response::fault(STATUS_INTERNAL_ERROR, message)
}

/// `200` text with the captured output and the measurements
pub fn success(
    output: &str,
    elapsed_ms: u64,
    memory_mb: f64,
) -> Response {
    Response::text(format!(
        "Output: {}, Elapsed Time: {}ms, Memory Usage: {} MB",
        output, elapsed_ms, memory_mb
    ))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::util::diagnostic::Diagnostic;
    use crate::util::span::{Position, Span};
    use quickcheck::quickcheck;

    #[test]
    fn test_success_text() {
        assert_eq!(
            success("Hello", 12, 45.5).to_string(),
            "Output: Hello, Elapsed Time: 12ms, Memory Usage: 45.5 MB"
        );
        assert_eq!(
            success("", 0, 45.0).to_string(),
            "Output: , Elapsed Time: 0ms, Memory Usage: 45 MB"
        );
        assert_eq!(success("x", 1, 45.25).status, STATUS_OK);
    }

    fn at(
        line: usize,
        column: usize,
        offset: usize,
    ) -> Span {
        let start = Position::with_offset(line, column, offset);
        Span::new(start, start)
    }

    #[test]
    fn test_compilation_failure_joins_diagnostics() {
        let mut diags = Diagnostics::default();
        diags.push(Diagnostic::error("E0201", "undefined variable `x`", at(1, 4, 3)));
        diags.push(Diagnostic::error("E0101", "expected `;`", at(2, 1, 9)));
        let response = compilation_failure(&diags);
        assert_eq!(response.status, STATUS_OK);
        assert_eq!(
            response.to_string(),
            "Compilation Error: (1,4): error E0201: undefined variable `x`, (2,1): error E0101: expected `;`"
        );
    }

    #[test]
    fn test_fault_json_shape() {
        let response = internal_fault("boom");
        assert_eq!(response.status, 500);
        assert!(response.is_fault());
        assert_eq!(response.body_json(), r#"{"Error":"boom"}"#);
        assert_eq!(
            serde_json::to_string(&response).unwrap(),
            r#"{"status":500,"body":{"Error":"boom"}}"#
        );
        assert_eq!(
            serde_json::to_string(&Response::text("ok")).unwrap(),
            r#"{"status":200,"body":"ok"}"#
        );
    }

    quickcheck! {
        fn prop_success_embeds_output(output: String, ms: u32) -> bool {
            let text = success(&output, ms as u64, 1.5).to_string();
            text.starts_with("Output: ")
                && text.contains(&output)
                && text.ends_with(&format!("Elapsed Time: {}ms, Memory Usage: 1.5 MB", ms))
        }

        fn prop_fault_round_trips(message: String) -> bool {
            let response = internal_fault(message.clone());
            let json = serde_json::to_string(&response).unwrap();
            let back: Response = serde_json::from_str(&json).unwrap();
            back == response && back.body == ResponseBody::Fault { error: message }
        }
    }
}
