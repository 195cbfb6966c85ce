pub mod account;
pub mod collab;
mod deadline;
pub mod error;
pub mod forward;
pub mod headers;
pub mod model_map;
pub mod retry;
pub mod sink;
pub mod stream;
pub mod upstream_client;

pub use account::Account;
pub use collab::{AccessTokenProvider, NoopRateLimitNotifier, RateLimitNotifier, TokenError};
pub use error::{ForwardError, StreamFailure, claude_error_for_status};
pub use forward::{ForwardOutcome, Forwarder};
pub use headers::Headers;
pub use model_map::{is_model_supported, resolve_model};
pub use retry::{RetryPolicy, is_failover_status, is_retryable_status};
pub use sink::{ResponseSink, WriterSink};
pub use stream::StreamReport;
pub use upstream_client::{
    UpstreamBody, UpstreamClient, UpstreamClientConfig, UpstreamFailure, UpstreamHttpRequest,
    UpstreamHttpResponse, UpstreamTransportErrorKind, WreqUpstreamClient,
};
