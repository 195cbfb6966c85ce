use thiserror::Error;

#[derive(Debug, Error)]
pub enum TransformError {
    #[error("invalid request body: {0}")]
    InvalidRequest(#[from] serde_json::Error),
    #[error("missing model")]
    MissingModel,
    #[error("request body is empty")]
    EmptyBody,
    #[error("failed to parse upstream response: {0}")]
    InvalidResponse(String),
}
