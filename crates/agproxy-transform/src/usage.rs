use serde::{Deserialize, Serialize};

use agproxy_protocol::claude::create_message::StreamEvent;
use agproxy_protocol::gemini::generate_content::UsageMetadata;

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct UsageSnapshot {
    pub input_tokens: u32,
    pub output_tokens: u32,
    pub cache_creation_input_tokens: u32,
    pub cache_read_input_tokens: u32,
}

impl UsageSnapshot {
    /// Gemini reports the cached prefix inside `promptTokenCount` and thoughts
    /// outside `candidatesTokenCount`.
    pub fn from_gemini(usage: &UsageMetadata) -> Self {
        let prompt = usage.prompt_token_count.unwrap_or(0);
        let cached = usage.cached_content_token_count.unwrap_or(0);
        let output = usage
            .candidates_token_count
            .unwrap_or(0)
            .saturating_add(usage.thoughts_token_count.unwrap_or(0));
        Self {
            input_tokens: prompt.saturating_sub(cached),
            output_tokens: output,
            cache_creation_input_tokens: 0,
            cache_read_input_tokens: cached,
        }
    }

    pub fn is_empty(&self) -> bool {
        *self == Self::default()
    }
}

/// One usage reading taken from a stream event.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum UsageObservation {
    /// `message_start` or equivalent; authoritative for input and cache counts.
    Start(UsageSnapshot),
    /// `message_delta` or equivalent; authoritative for output counts.
    Delta(UsageSnapshot),
}

/// Merges usage across a stream without summing.
///
/// Input and cache counts keep the first non-zero value seen. Output keeps the
/// last non-zero delta value. A zero never overwrites.
#[derive(Debug, Clone, Default)]
pub struct UsageAccumulator {
    usage: UsageSnapshot,
}

impl UsageAccumulator {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn observe(&mut self, observation: UsageObservation) {
        match observation {
            // message_start output counts are placeholders.
            UsageObservation::Start(usage) => self.fill_prompt_counts(&usage),
            UsageObservation::Delta(usage) => {
                self.fill_prompt_counts(&usage);
                if usage.output_tokens != 0 {
                    self.usage.output_tokens = usage.output_tokens;
                }
            }
        }
    }

    fn fill_prompt_counts(&mut self, incoming: &UsageSnapshot) {
        fill_if_zero(&mut self.usage.input_tokens, incoming.input_tokens);
        fill_if_zero(
            &mut self.usage.cache_creation_input_tokens,
            incoming.cache_creation_input_tokens,
        );
        fill_if_zero(
            &mut self.usage.cache_read_input_tokens,
            incoming.cache_read_input_tokens,
        );
    }

    pub fn snapshot(&self) -> UsageSnapshot {
        self.usage
    }
}

/// Usage carried by a Claude stream event, if any.
pub fn observation_from_claude_event(event: &StreamEvent) -> Option<UsageObservation> {
    match event {
        StreamEvent::MessageStart { message } => {
            let usage = message.usage;
            Some(UsageObservation::Start(UsageSnapshot {
                input_tokens: usage.input_tokens,
                output_tokens: usage.output_tokens,
                cache_creation_input_tokens: usage.cache_creation_input_tokens,
                cache_read_input_tokens: usage.cache_read_input_tokens,
            }))
        }
        StreamEvent::MessageDelta { usage, .. } => Some(UsageObservation::Delta(UsageSnapshot {
            input_tokens: usage.input_tokens.unwrap_or(0),
            output_tokens: usage.output_tokens.unwrap_or(0),
            cache_creation_input_tokens: usage.cache_creation_input_tokens.unwrap_or(0),
            cache_read_input_tokens: usage.cache_read_input_tokens.unwrap_or(0),
        })),
        _ => None,
    }
}

fn fill_if_zero(slot: &mut u32, value: u32) {
    if *slot == 0 && value != 0 {
        *slot = value;
    }
}
