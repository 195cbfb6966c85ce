use agproxy_protocol::claude::create_message::response::{
    ContentBlock as ClaudeContentBlock, CreateMessageResponse, MessageType,
};
use agproxy_protocol::claude::create_message::stream::{
    ContentBlockDelta, MessageDelta, StreamEvent, StreamUsage,
};
use agproxy_protocol::claude::types::{MessageRole, StopReason, Usage as ClaudeUsage};
use agproxy_protocol::gemini::generate_content::response::GenerateContentResponse;
use agproxy_protocol::gemini::generate_content::types::UsageMetadata;
use agproxy_protocol::gemini::types::{FunctionCall as GeminiFunctionCall, Part as GeminiPart};
use agproxy_protocol::sse::encode_named_event;
use tracing::debug;

use crate::generate_content::claude2gemini::response::{
    generate_tool_use_id, map_stop_reason, message_id,
};
use crate::generate_content::gemini_internal::unwrap_response_value;
use crate::transcoder::{Emitted, SseTranscoder};
use crate::usage::{UsageSnapshot, observation_from_claude_event};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum OpenBlock {
    Text(u32),
    Thinking(u32),
}

/// Re-encodes Gemini stream chunks as Claude Messages stream events.
#[derive(Debug, Clone)]
pub struct ClaudeStreamTranscoder {
    model: String,
    message_started: bool,
    next_block_index: u32,
    open_block: Option<OpenBlock>,
    saw_tool_use: bool,
    last_usage: Option<UsageMetadata>,
    finished: bool,
}

impl ClaudeStreamTranscoder {
    /// `original_model` is echoed in `message_start`, not the backend model.
    pub fn new(original_model: impl Into<String>) -> Self {
        Self {
            model: original_model.into(),
            message_started: false,
            next_block_index: 0,
            open_block: None,
            saw_tool_use: false,
            last_usage: None,
            finished: false,
        }
    }

    pub fn transform_response(&mut self, response: GenerateContentResponse) -> Vec<StreamEvent> {
        if self.finished {
            return Vec::new();
        }
        if let Some(usage) = response.usage_metadata.clone() {
            self.last_usage = Some(usage);
        }

        let mut events = self.ensure_message_start(response.response_id.as_deref());

        if let Some(candidate) = response.candidates.into_iter().next() {
            for part in candidate.content.parts {
                self.handle_part(part, &mut events);
            }
            if candidate.finish_reason.is_some() {
                let stop_reason = map_stop_reason(candidate.finish_reason, self.saw_tool_use);
                self.finalize(stop_reason, &mut events);
            }
        }

        events
    }

    /// Events still owed to the client when the upstream ends without a finish reason.
    pub fn finish_events(&mut self) -> Vec<StreamEvent> {
        if self.finished {
            return Vec::new();
        }
        let mut events = self.ensure_message_start(None);
        let stop_reason = map_stop_reason(None, self.saw_tool_use);
        self.finalize(stop_reason, &mut events);
        events
    }

    fn ensure_message_start(&mut self, response_id: Option<&str>) -> Vec<StreamEvent> {
        if self.message_started {
            return Vec::new();
        }
        self.message_started = true;
        let usage = self
            .last_usage
            .as_ref()
            .map(UsageSnapshot::from_gemini)
            .unwrap_or_default();
        vec![StreamEvent::MessageStart {
            message: CreateMessageResponse {
                id: message_id(response_id),
                r#type: MessageType::Message,
                role: MessageRole::Assistant,
                content: Vec::new(),
                model: self.model.clone(),
                stop_reason: None,
                stop_sequence: None,
                usage: ClaudeUsage {
                    input_tokens: usage.input_tokens,
                    output_tokens: 0,
                    cache_creation_input_tokens: 0,
                    cache_read_input_tokens: usage.cache_read_input_tokens,
                },
            },
        }]
    }

    fn handle_part(&mut self, part: GeminiPart, events: &mut Vec<StreamEvent>) {
        let is_thought = part.is_thought();
        let GeminiPart {
            text,
            function_call,
            thought_signature,
            ..
        } = part;

        if let Some(call) = function_call {
            self.emit_tool_use(call, thought_signature, events);
            return;
        }

        if is_thought {
            let index = self.ensure_thinking_block(events);
            if let Some(text) = text.filter(|text| !text.is_empty()) {
                events.push(StreamEvent::ContentBlockDelta {
                    index,
                    delta: ContentBlockDelta::ThinkingDelta { thinking: text },
                });
            }
            if let Some(signature) = thought_signature.filter(|sig| !sig.is_empty()) {
                events.push(StreamEvent::ContentBlockDelta {
                    index,
                    delta: ContentBlockDelta::SignatureDelta { signature },
                });
            }
            return;
        }

        // A signature on a visible part belongs to the thinking block before it.
        if let Some(signature) = thought_signature.filter(|sig| !sig.is_empty())
            && let Some(OpenBlock::Thinking(index)) = self.open_block
        {
            events.push(StreamEvent::ContentBlockDelta {
                index,
                delta: ContentBlockDelta::SignatureDelta { signature },
            });
        }

        if let Some(text) = text.filter(|text| !text.is_empty()) {
            let index = self.ensure_text_block(events);
            events.push(StreamEvent::ContentBlockDelta {
                index,
                delta: ContentBlockDelta::TextDelta { text },
            });
        }
    }

    fn ensure_thinking_block(&mut self, events: &mut Vec<StreamEvent>) -> u32 {
        if let Some(OpenBlock::Thinking(index)) = self.open_block {
            return index;
        }
        self.close_open_block(events);
        let index = self.allocate_block();
        self.open_block = Some(OpenBlock::Thinking(index));
        events.push(StreamEvent::ContentBlockStart {
            index,
            content_block: ClaudeContentBlock::Thinking {
                thinking: String::new(),
                signature: String::new(),
            },
        });
        index
    }

    fn ensure_text_block(&mut self, events: &mut Vec<StreamEvent>) -> u32 {
        if let Some(OpenBlock::Text(index)) = self.open_block {
            return index;
        }
        self.close_open_block(events);
        let index = self.allocate_block();
        self.open_block = Some(OpenBlock::Text(index));
        events.push(StreamEvent::ContentBlockStart {
            index,
            content_block: ClaudeContentBlock::Text {
                text: String::new(),
            },
        });
        index
    }

    /// Gemini delivers function calls whole, so each one is a complete block.
    fn emit_tool_use(
        &mut self,
        call: GeminiFunctionCall,
        signature: Option<String>,
        events: &mut Vec<StreamEvent>,
    ) {
        self.close_open_block(events);
        self.saw_tool_use = true;
        let index = self.allocate_block();

        let id = call
            .id
            .filter(|id| !id.is_empty())
            .unwrap_or_else(generate_tool_use_id);
        let arguments = call
            .args
            .map(|args| args.to_string())
            .unwrap_or_else(|| "{}".to_string());

        events.push(StreamEvent::ContentBlockStart {
            index,
            content_block: ClaudeContentBlock::ToolUse {
                id,
                name: call.name,
                input: serde_json::json!({}),
                signature,
            },
        });
        events.push(StreamEvent::ContentBlockDelta {
            index,
            delta: ContentBlockDelta::InputJsonDelta {
                partial_json: arguments,
            },
        });
        events.push(StreamEvent::ContentBlockStop { index });
    }

    fn allocate_block(&mut self) -> u32 {
        let index = self.next_block_index;
        self.next_block_index += 1;
        index
    }

    fn close_open_block(&mut self, events: &mut Vec<StreamEvent>) {
        if let Some(block) = self.open_block.take() {
            let index = match block {
                OpenBlock::Text(index) | OpenBlock::Thinking(index) => index,
            };
            events.push(StreamEvent::ContentBlockStop { index });
        }
    }

    fn finalize(&mut self, stop_reason: StopReason, events: &mut Vec<StreamEvent>) {
        self.close_open_block(events);
        self.finished = true;
        events.push(StreamEvent::MessageDelta {
            delta: MessageDelta {
                stop_reason: Some(stop_reason),
                stop_sequence: None,
            },
            usage: self.stream_usage(),
        });
        events.push(StreamEvent::MessageStop);
    }

    fn stream_usage(&self) -> StreamUsage {
        let Some(usage) = self.last_usage.as_ref().map(UsageSnapshot::from_gemini) else {
            return StreamUsage::default();
        };
        StreamUsage {
            input_tokens: Some(usage.input_tokens),
            output_tokens: Some(usage.output_tokens),
            cache_creation_input_tokens: None,
            cache_read_input_tokens: (usage.cache_read_input_tokens > 0)
                .then_some(usage.cache_read_input_tokens),
        }
    }

    fn write_events(events: Vec<StreamEvent>, out: &mut Emitted) {
        for event in events {
            if let Some(observation) = observation_from_claude_event(&event) {
                out.usage.push(observation);
            }
            match serde_json::to_string(&event) {
                Ok(data) => out
                    .bytes
                    .extend_from_slice(&encode_named_event(event.event_name(), &data)),
                Err(err) => debug!(error = %err, "dropping unserializable stream event"),
            }
        }
    }
}

impl SseTranscoder for ClaudeStreamTranscoder {
    fn on_data(&mut self, payload: &str, out: &mut Emitted) {
        let response = unwrap_response_value(payload.as_bytes())
            .and_then(serde_json::from_value::<GenerateContentResponse>);
        match response {
            Ok(response) => {
                let events = self.transform_response(response);
                Self::write_events(events, out);
            }
            Err(err) => debug!(error = %err, "skipping unparsable upstream chunk"),
        }
    }

    /// Claude frames are self-delimited; upstream separators are not forwarded.
    fn on_other(&mut self, _line: &str, _out: &mut Emitted) {}

    fn on_done(&mut self, out: &mut Emitted) {
        let events = self.finish_events();
        Self::write_events(events, out);
    }

    fn finish(&mut self, out: &mut Emitted) {
        let events = self.finish_events();
        Self::write_events(events, out);
    }
}
