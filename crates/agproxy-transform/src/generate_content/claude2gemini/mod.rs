pub mod request;
pub mod response;
pub mod stream;

pub use request::{
    DUMMY_THOUGHT_SIGNATURE, SignaturePolicy, ToolIdentityMap, TransformOptions,
    transform_request,
};
pub use response::{transform_response, transform_response_bytes};
pub use stream::ClaudeStreamTranscoder;
