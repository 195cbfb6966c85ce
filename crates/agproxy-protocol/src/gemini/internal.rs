//! `v1internal` envelope used by the Cloud Code (Antigravity) backend.

use serde::{Deserialize, Serialize};

use crate::gemini::generate_content::{GenerateContentRequestBody, GenerateContentResponse};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum InternalAction {
    GenerateContent,
    StreamGenerateContent,
    CountTokens,
}

impl InternalAction {
    pub fn as_str(&self) -> &'static str {
        match self {
            InternalAction::GenerateContent => "generateContent",
            InternalAction::StreamGenerateContent => "streamGenerateContent",
            InternalAction::CountTokens => "countTokens",
        }
    }

    pub fn parse(action: &str) -> Option<Self> {
        match action {
            "generateContent" => Some(InternalAction::GenerateContent),
            "streamGenerateContent" => Some(InternalAction::StreamGenerateContent),
            "countTokens" => Some(InternalAction::CountTokens),
            _ => None,
        }
    }

    pub fn for_stream(stream: bool) -> Self {
        if stream {
            InternalAction::StreamGenerateContent
        } else {
            InternalAction::GenerateContent
        }
    }

    pub fn is_stream(&self) -> bool {
        matches!(self, InternalAction::StreamGenerateContent)
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct V1InternalRequest<R = GenerateContentRequestBody> {
    pub project: String,
    pub request_id: String,
    pub user_agent: String,
    pub request_type: String,
    pub model: String,
    pub request: R,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct V1InternalResponse<R = GenerateContentResponse> {
    #[serde(skip_serializing_if = "Option::is_none")]
    pub response: Option<R>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub trace_id: Option<String>,
}
