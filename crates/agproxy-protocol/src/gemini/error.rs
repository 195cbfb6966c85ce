use serde::{Deserialize, Serialize};

/// `{"error":{"code":...,"message":...,"status":...}}`
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct GoogleErrorResponse {
    pub error: GoogleErrorBody,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct GoogleErrorBody {
    pub code: u16,
    pub message: String,
    pub status: String,
}

impl GoogleErrorResponse {
    pub fn new(code: u16, message: impl Into<String>) -> Self {
        Self {
            error: GoogleErrorBody {
                code,
                message: message.into(),
                status: google_status_name(code).to_string(),
            },
        }
    }
}

pub fn google_status_name(code: u16) -> &'static str {
    match code {
        400 => "INVALID_ARGUMENT",
        404 => "NOT_FOUND",
        429 => "RESOURCE_EXHAUSTED",
        500 => "INTERNAL",
        502 | 503 => "UNAVAILABLE",
        _ => "UNKNOWN",
    }
}
