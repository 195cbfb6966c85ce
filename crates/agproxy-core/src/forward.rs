use std::future::Future;
use std::sync::Arc;
use std::time::{Duration, Instant};

use bytes::Bytes;
use serde_json::{Value as JsonValue, json};
use tracing::{info, warn};

use agproxy_common::ForwardConfig;
use agproxy_protocol::claude::create_message::request::CreateMessageRequestBody;
use agproxy_protocol::claude::error::ErrorResponse;
use agproxy_protocol::gemini::internal::InternalAction;
use agproxy_transform::generate_content::claude2gemini::{
    ClaudeStreamTranscoder, TransformOptions, transform_request, transform_response_bytes,
};
use agproxy_transform::generate_content::gemini_internal::{
    GeminiPassthroughTranscoder, extract_gemini_usage, unwrap_response_bytes, unwrap_response_value,
    wrap_request,
};
use agproxy_transform::tokens::estimate_gemini_request_tokens;
use agproxy_transform::{SchemaSanitizer, SseTranscoder, UsageSnapshot};

use crate::account::Account;
use crate::collab::{AccessTokenProvider, RateLimitNotifier};
use crate::deadline::{RequestDeadline, within};
use crate::error::{
    ForwardError, UPSTREAM_ERROR_TYPE, claude_error_bytes, claude_error_for_status,
    google_error_bytes,
};
use crate::headers::{
    Headers, REQUEST_ID_HEADER, header_get, header_set, json_response_headers,
    stream_response_headers,
};
use crate::model_map::resolve_model;
use crate::retry::{CapturedResponse, RetryContext, RetryOutcome, RetryPolicy, is_failover_status};
use crate::sink::ResponseSink;
use crate::stream::StreamReencoder;
use crate::upstream_client::{
    UpstreamBody, UpstreamClient, UpstreamHttpRequest, UpstreamHttpResponse, read_body_limited,
};

const CLAUDE_STREAM_CONTENT_TYPE: &str = "text/event-stream";
const GEMINI_STREAM_CONTENT_TYPE: &str = "text/event-stream; charset=utf-8";

/// Result of one successful forward call.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ForwardOutcome {
    /// Upstream `x-request-id`, empty when absent.
    pub request_id: String,
    pub usage: UsageSnapshot,
    /// Model the caller asked for, before resolution.
    pub model: String,
    pub stream: bool,
    pub duration: Duration,
    pub first_token_ms: Option<u64>,
}

/// Drives one request through model resolution, the upstream retry loop and
/// response re-encoding.
pub struct Forwarder {
    config: ForwardConfig,
    client: Arc<dyn UpstreamClient>,
    tokens: Arc<dyn AccessTokenProvider>,
    notifier: Arc<dyn RateLimitNotifier>,
    sanitizer: &'static SchemaSanitizer,
}

impl Forwarder {
    pub fn new(
        config: ForwardConfig,
        client: Arc<dyn UpstreamClient>,
        tokens: Arc<dyn AccessTokenProvider>,
        notifier: Arc<dyn RateLimitNotifier>,
    ) -> Self {
        Self {
            config,
            client,
            tokens,
            notifier,
            sanitizer: SchemaSanitizer::shared(),
        }
    }

    /// Claude Messages in, Claude Messages out.
    pub async fn forward(
        &self,
        account: &Account,
        body: &[u8],
        sink: &mut dyn ResponseSink,
    ) -> Result<ForwardOutcome, ForwardError> {
        let started = Instant::now();
        let deadline = RequestDeadline::start(self.config.request_deadline());

        let request: CreateMessageRequestBody = match serde_json::from_slice(body) {
            Ok(request) => request,
            Err(err) => {
                let message = format!("parse claude request: {err}");
                return Err(write_claude_invalid(sink, message).await);
            }
        };
        if request.model.trim().is_empty() {
            return Err(write_claude_invalid(sink, "missing model".to_string()).await);
        }

        let original_model = request.model.clone();
        let mapped_model = resolve_model(account, &original_model);
        if mapped_model != original_model {
            info!(
                event = "model_mapped",
                account = %account.name,
                from = %original_model,
                to = %mapped_model
            );
        }

        let (token, project) = before_deadline(deadline, self.credentials(account)).await??;

        let options = TransformOptions {
            identity_patch: self.identity_patch(),
            max_output_tokens: self.config.max_output_tokens,
        };
        let gemini_request = transform_request(&request, &mapped_model, &options, self.sanitizer);
        let envelope = wrap_request(&project, &mapped_model, gemini_request);
        let payload = serde_json::to_vec(&envelope).map_err(encode_error)?;

        let stream = request.is_stream();
        let action = InternalAction::for_stream(stream);
        let upstream_request = self.build_request(account, &token, action, stream, payload);
        let sent = before_deadline(deadline, self.retry(account).send(upstream_request)).await?;

        match sent {
            RetryOutcome::Unavailable { attempts, failure } => {
                warn!(
                    event = "upstream_unavailable",
                    account = %account.name,
                    attempts,
                    error = %failure
                );
                let error = ErrorResponse::custom(
                    UPSTREAM_ERROR_TYPE,
                    "Upstream request failed after retries",
                );
                write_json(sink, 502, &claude_error_bytes(&error), None).await?;
                Err(ForwardError::UpstreamUnavailable {
                    attempts,
                    source: failure,
                })
            }
            RetryOutcome::Failed(captured) => {
                self.notify(account, &captured);
                if is_failover_status(captured.status) {
                    warn!(event = "upstream_failover", account = %account.name, status = captured.status);
                    return Err(ForwardError::Failover {
                        status: captured.status,
                    });
                }
                warn!(
                    event = "upstream_error",
                    account = %account.name,
                    status = captured.status,
                    body = %String::from_utf8_lossy(&captured.body)
                );
                let (status, error) = claude_error_for_status(captured.status);
                write_json(sink, status, &claude_error_bytes(&error), None).await?;
                Err(ForwardError::Upstream {
                    status: captured.status,
                })
            }
            RetryOutcome::Success(resp) => {
                let request_id = response_request_id(&resp.headers);
                let report = if stream {
                    let headers =
                        stream_response_headers(CLAUDE_STREAM_CONTENT_TYPE, Some(&request_id));
                    let reencoder = self.reencoder(
                        ClaudeStreamTranscoder::new(original_model.clone()),
                        started,
                        deadline,
                    );
                    pump_stream(resp.body, 200, &headers, reencoder, sink).await
                } else {
                    self.claude_non_stream(resp, &original_model, &request_id, deadline, sink)
                        .await
                        .map(|usage| StreamOutput {
                            usage,
                            first_token_ms: None,
                            failure: None,
                        })
                }?;
                finish_outcome(request_id, original_model, stream, started, report)
            }
        }
    }

    async fn claude_non_stream(
        &self,
        resp: UpstreamHttpResponse,
        original_model: &str,
        request_id: &str,
        deadline: Option<RequestDeadline>,
        sink: &mut dyn ResponseSink,
    ) -> Result<UsageSnapshot, ForwardError> {
        let read = read_body_limited(resp.body, self.config.max_response_body_bytes);
        let body = match before_deadline(deadline, read).await? {
            Ok(body) => body,
            Err(err) => {
                let error =
                    ErrorResponse::custom(UPSTREAM_ERROR_TYPE, "Failed to read upstream response");
                write_json(sink, 502, &claude_error_bytes(&error), Some(request_id)).await?;
                return Err(ForwardError::InvalidResponse(err.to_string()));
            }
        };
        match transform_response_bytes(&body, original_model) {
            Ok((message, usage)) => {
                write_json(sink, 200, &Bytes::from(message), Some(request_id)).await?;
                Ok(usage)
            }
            Err(err) => {
                warn!(
                    event = "upstream_response_invalid",
                    error = %err,
                    body = %String::from_utf8_lossy(&body)
                );
                let error =
                    ErrorResponse::custom(UPSTREAM_ERROR_TYPE, "Failed to parse upstream response");
                write_json(sink, 502, &claude_error_bytes(&error), Some(request_id)).await?;
                Err(ForwardError::InvalidResponse(err.to_string()))
            }
        }
    }

    /// Native Gemini request for `model` and `action`, forwarded through the
    /// `v1internal` envelope.
    pub async fn forward_gemini(
        &self,
        account: &Account,
        model: &str,
        action: &str,
        stream: bool,
        body: &[u8],
        sink: &mut dyn ResponseSink,
    ) -> Result<ForwardOutcome, ForwardError> {
        let started = Instant::now();
        let deadline = RequestDeadline::start(self.config.request_deadline());

        if model.trim().is_empty() {
            return Err(write_google_invalid(sink, 400, "Missing model in URL").await);
        }
        if action.trim().is_empty() {
            return Err(write_google_invalid(sink, 400, "Missing action in URL").await);
        }
        if body.is_empty() {
            return Err(write_google_invalid(sink, 400, "Request body is empty").await);
        }
        let Some(action) = InternalAction::parse(action) else {
            let message = format!("Unsupported action: {action}");
            return Err(write_google_invalid(sink, 404, &message).await);
        };
        let request: JsonValue = match serde_json::from_slice(body) {
            Ok(request) => request,
            Err(err) => {
                let message = format!("Invalid JSON body: {err}");
                return Err(write_google_invalid(sink, 400, &message).await);
            }
        };

        let mapped_model = resolve_model(account, model);
        let (token, project) = before_deadline(deadline, self.credentials(account)).await??;
        let payload = serde_json::to_vec(&wrap_request(&project, &mapped_model, request))
            .map_err(encode_error)?;

        let upstream_action = if stream && action == InternalAction::GenerateContent {
            InternalAction::StreamGenerateContent
        } else {
            action
        };
        let streaming = upstream_action.is_stream();
        let upstream_request =
            self.build_request(account, &token, upstream_action, streaming, payload);
        let counting = action == InternalAction::CountTokens;
        let sent = before_deadline(deadline, self.retry(account).send(upstream_request)).await?;

        match sent {
            RetryOutcome::Unavailable { attempts, failure } => {
                warn!(
                    event = "upstream_unavailable",
                    account = %account.name,
                    attempts,
                    error = %failure
                );
                if counting {
                    return self
                        .estimate_tokens(body, String::new(), model, started, sink)
                        .await;
                }
                let error = google_error_bytes(502, "Upstream request failed after retries");
                write_json(sink, 502, &error, None).await?;
                Err(ForwardError::UpstreamUnavailable {
                    attempts,
                    source: failure,
                })
            }
            RetryOutcome::Failed(captured) => {
                let request_id = response_request_id(&captured.headers);
                self.notify(account, &captured);
                if counting {
                    return self
                        .estimate_tokens(body, request_id, model, started, sink)
                        .await;
                }
                if is_failover_status(captured.status) {
                    warn!(event = "upstream_failover", account = %account.name, status = captured.status);
                    return Err(ForwardError::Failover {
                        status: captured.status,
                    });
                }
                warn!(
                    event = "upstream_error",
                    account = %account.name,
                    status = captured.status,
                    body = %String::from_utf8_lossy(&captured.body)
                );
                let content_type = header_get(&captured.headers, "content-type")
                    .filter(|value| !value.is_empty())
                    .unwrap_or("application/json");
                let mut headers = json_response_headers(Some(&request_id));
                header_set(&mut headers, "content-type", content_type);
                let unwrapped = Bytes::from(unwrap_response_bytes(&captured.body));
                write_body(sink, captured.status, &headers, unwrapped).await?;
                Err(ForwardError::Upstream {
                    status: captured.status,
                })
            }
            RetryOutcome::Success(resp) => {
                let request_id = response_request_id(&resp.headers);
                let report = if streaming {
                    let content_type = header_get(&resp.headers, "content-type")
                        .filter(|value| !value.is_empty())
                        .unwrap_or(GEMINI_STREAM_CONTENT_TYPE)
                        .to_string();
                    let headers = stream_response_headers(&content_type, Some(&request_id));
                    let reencoder =
                        self.reencoder(GeminiPassthroughTranscoder::new(), started, deadline);
                    pump_stream(resp.body, resp.status, &headers, reencoder, sink).await?
                } else {
                    let usage = self
                        .gemini_non_stream(resp, &request_id, deadline, sink)
                        .await?;
                    StreamOutput {
                        usage,
                        first_token_ms: None,
                        failure: None,
                    }
                };
                finish_outcome(request_id, model.to_string(), stream, started, report)
            }
        }
    }

    async fn gemini_non_stream(
        &self,
        resp: UpstreamHttpResponse,
        request_id: &str,
        deadline: Option<RequestDeadline>,
        sink: &mut dyn ResponseSink,
    ) -> Result<UsageSnapshot, ForwardError> {
        let read = read_body_limited(resp.body, self.config.max_response_body_bytes);
        let body = match before_deadline(deadline, read).await? {
            Ok(body) => body,
            Err(err) => {
                let error = google_error_bytes(502, "Failed to read upstream response");
                write_json(sink, 502, &error, Some(request_id)).await?;
                return Err(ForwardError::InvalidResponse(err.to_string()));
            }
        };
        let (unwrapped, usage) = match unwrap_response_value(&body) {
            Ok(value) => {
                let usage = extract_gemini_usage(&value).unwrap_or_default();
                let bytes = serde_json::to_vec(&value)
                    .map(Bytes::from)
                    .unwrap_or_else(|_| body.clone());
                (bytes, usage)
            }
            Err(_) => (body, UsageSnapshot::default()),
        };
        write_json(sink, resp.status, &unwrapped, Some(request_id)).await?;
        Ok(usage)
    }

    /// Local estimate returned when `countTokens` cannot be served upstream.
    async fn estimate_tokens(
        &self,
        body: &[u8],
        request_id: String,
        model: &str,
        started: Instant,
        sink: &mut dyn ResponseSink,
    ) -> Result<ForwardOutcome, ForwardError> {
        let estimated = estimate_gemini_request_tokens(body);
        info!(event = "count_tokens_estimated", model = %model, total_tokens = estimated);
        let payload = serde_json::to_vec(&json!({ "totalTokens": estimated }))
            .map(Bytes::from)
            .unwrap_or_default();
        write_json(sink, 200, &payload, Some(&request_id)).await?;
        Ok(ForwardOutcome {
            request_id,
            usage: UsageSnapshot::default(),
            model: model.to_string(),
            stream: false,
            duration: started.elapsed(),
            first_token_ms: None,
        })
    }

    fn reencoder<T: SseTranscoder>(
        &self,
        transcoder: T,
        started: Instant,
        deadline: Option<RequestDeadline>,
    ) -> StreamReencoder<T> {
        // One SSE line may carry a whole response, so it gets the response body cap.
        StreamReencoder::new(transcoder, started, self.config.max_response_body_bytes)
            .with_deadline(deadline)
    }

    async fn credentials(&self, account: &Account) -> Result<(String, String), ForwardError> {
        let token = self.tokens.access_token(account).await?;
        if token.trim().is_empty() {
            return Err(ForwardError::Precondition(format!(
                "empty access token for account {}",
                account.name
            )));
        }
        let project = account.project_id().ok_or_else(|| {
            ForwardError::Precondition("project_id not found in credentials".to_string())
        })?;
        Ok((token, project.to_string()))
    }

    fn identity_patch(&self) -> Option<String> {
        if !self.config.identity_patch {
            return None;
        }
        Some(
            self.config
                .identity_patch_text
                .clone()
                .unwrap_or_default(),
        )
    }

    fn build_request(
        &self,
        account: &Account,
        token: &str,
        action: InternalAction,
        stream: bool,
        payload: Vec<u8>,
    ) -> UpstreamHttpRequest {
        let mut url = self.config.endpoint(action.as_str());
        if stream {
            url.push_str("?alt=sse");
        }
        UpstreamHttpRequest {
            url,
            headers: vec![
                ("content-type".to_string(), "application/json".to_string()),
                ("authorization".to_string(), format!("Bearer {token}")),
                ("user-agent".to_string(), self.config.user_agent.clone()),
            ],
            body: Bytes::from(payload),
            is_stream: stream,
            proxy: account.proxy().map(str::to_string),
        }
    }

    fn retry<'a>(&'a self, account: &'a Account) -> RetryContext<'a> {
        RetryContext {
            client: self.client.as_ref(),
            notifier: self.notifier.as_ref(),
            account,
            policy: RetryPolicy::from_config(&self.config),
        }
    }

    fn notify(&self, account: &Account, captured: &CapturedResponse) {
        self.notifier.handle_upstream_error(
            account,
            captured.status,
            &captured.headers,
            &captured.body,
        );
    }
}

async fn pump_stream<T: SseTranscoder>(
    body: UpstreamBody,
    status: u16,
    headers: &Headers,
    reencoder: StreamReencoder<T>,
    sink: &mut dyn ResponseSink,
) -> Result<StreamOutput, ForwardError> {
    sink.send_head(status, headers).await?;
    sink.flush().await?;
    let mut upstream = body.into_receiver();
    let (report, failure) = reencoder.run(&mut upstream, sink).await;
    Ok(StreamOutput {
        usage: report.usage,
        first_token_ms: report.first_token_ms,
        failure,
    })
}

struct StreamOutput {
    usage: UsageSnapshot,
    first_token_ms: Option<u64>,
    failure: Option<crate::error::StreamFailure>,
}

fn finish_outcome(
    request_id: String,
    model: String,
    stream: bool,
    started: Instant,
    output: StreamOutput,
) -> Result<ForwardOutcome, ForwardError> {
    let outcome = ForwardOutcome {
        request_id,
        usage: output.usage,
        model,
        stream,
        duration: started.elapsed(),
        first_token_ms: output.first_token_ms,
    };
    match output.failure {
        Some(source) => Err(ForwardError::StreamInterrupted {
            outcome: Box::new(outcome),
            source,
        }),
        None => Ok(outcome),
    }
}

/// Bounds a phase that runs before the client has seen any bytes.
async fn before_deadline<F: Future>(
    deadline: Option<RequestDeadline>,
    call: F,
) -> Result<F::Output, ForwardError> {
    within(deadline, call)
        .await
        .map_err(ForwardError::DeadlineExceeded)
}

fn encode_error(err: serde_json::Error) -> ForwardError {
    ForwardError::Precondition(format!("encode upstream request: {err}"))
}

fn response_request_id(headers: &Headers) -> String {
    header_get(headers, REQUEST_ID_HEADER)
        .unwrap_or_default()
        .to_string()
}

async fn write_body(
    sink: &mut dyn ResponseSink,
    status: u16,
    headers: &Headers,
    body: Bytes,
) -> Result<(), ForwardError> {
    sink.send_head(status, headers).await?;
    sink.send_chunk(body).await?;
    sink.flush().await?;
    Ok(())
}

async fn write_json(
    sink: &mut dyn ResponseSink,
    status: u16,
    body: &Bytes,
    request_id: Option<&str>,
) -> Result<(), ForwardError> {
    write_body(sink, status, &json_response_headers(request_id), body.clone()).await
}

/// Writes a 400 Claude error and returns the matching input error.
async fn write_claude_invalid(sink: &mut dyn ResponseSink, message: String) -> ForwardError {
    let (status, mut error) = claude_error_for_status(400);
    error.error.message = message.clone();
    if let Err(err) = write_json(sink, status, &claude_error_bytes(&error), None).await {
        return err;
    }
    ForwardError::InvalidRequest(message)
}

async fn write_google_invalid(sink: &mut dyn ResponseSink, code: u16, message: &str) -> ForwardError {
    if let Err(err) = write_json(sink, code, &google_error_bytes(code, message), None).await {
        return err;
    }
    ForwardError::InvalidRequest(message.to_string())
}
