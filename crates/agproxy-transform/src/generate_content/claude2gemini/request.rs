use std::collections::HashMap;

use agproxy_protocol::claude::create_message::request::{
    ContentBlockParam as ClaudeContentBlockParam, CreateMessageRequestBody,
    ImageSource as ClaudeImageSource, MessageContent as ClaudeMessageContent,
    MessageParam as ClaudeMessageParam, SystemPrompt as ClaudeSystemPrompt,
    ThinkingConfigParam as ClaudeThinkingConfigParam, ToolParam as ClaudeTool,
};
use agproxy_protocol::claude::types::MessageRole as ClaudeMessageRole;
use agproxy_protocol::gemini::generate_content::request::GenerateContentRequestBody;
use agproxy_protocol::gemini::generate_content::types::{
    EnhancedContent, FunctionCallingConfig, FunctionCallingMode, FunctionDeclaration,
    GenerationConfig, GoogleSearch, HarmBlockThreshold, HarmCategory, ImageSearch,
    SafetySetting, ThinkingConfig, Tool as GeminiTool, ToolConfig,
};
use agproxy_protocol::gemini::types::{
    Blob as GeminiBlob, Content as GeminiContent, ContentRole as GeminiContentRole,
    FunctionCall as GeminiFunctionCall, FunctionResponse as GeminiFunctionResponse,
    Part as GeminiPart,
};
use serde_json::{Value as JsonValue, json};
use tracing::warn;

use crate::schema::SchemaSanitizer;

/// Signature accepted by Gemini-family backends in place of a real one.
pub const DUMMY_THOUGHT_SIGNATURE: &str = "skip_thought_signature_validator";
pub const NO_CONTENT_PLACEHOLDER: &str = "(no content)";
pub const TOOL_RESULT_EMPTY_SUCCESS: &str = "Command executed successfully.";
pub const TOOL_RESULT_EMPTY_ERROR: &str = "Tool execution failed with no output.";
pub const SYNTHETIC_THINKING_TEXT: &str = "Thinking...";
pub const WEB_SEARCH_TOOL_NAME: &str = "web_search";
pub const DEFAULT_MAX_OUTPUT_TOKENS: u32 = 64_000;
pub const FLASH_THINKING_BUDGET_CAP: u32 = 24_576;
pub const DEFAULT_STOP_SEQUENCES: &[&str] = &[
    "<|user|>",
    "<|bot|>",
    "<|context_request|>",
    "<|endoftext|>",
    "<|end_of_turn|>",
];
/// Persona preamble for the Antigravity backend. Line breaks are literal `\n` escapes, as the
/// backend has always received them.
pub const DEFAULT_IDENTITY_PATCH: &str = r#"<identity>\nYou are Antigravity, a powerful agentic AI coding assistant designed by the Google Deepmind team working on Advanced Agentic Coding.\nYou are pair programming with a USER to solve their coding task. The task may require creating a new codebase, modifying or debugging an existing codebase, or simply answering a question.\nThe USER will send you requests, which you must always prioritize addressing. Along with each USER request, we will attach additional metadata about their current state, such as what files they have open and where their cursor is.\nThis information may or may not be relevant to the coding task, it is up for you to decide.\n</identity>\n\n<tool_calling>\nCall tools as you normally would. The following list provides additional guidance to help you avoid errors:\n  - **Absolute paths only**. When using tools that accept file path arguments, ALWAYS use the absolute file path.\n</tool_calling>\n\n<web_application_development>\n## Technology Stack,\nYour web applications should be built using the following technologies:,\n1. **Core**: Use HTML for structure and Javascript for logic.\n2. **Styling (CSS)**: Use Vanilla CSS for maximum flexibility and control. Avoid using TailwindCSS unless the USER explicitly requests it; in this case, first confirm which TailwindCSS version to use.\n3. **Web App**: If the USER specifies that they want a more complex web app, use a framework like Next.js or Vite. Only do this if the USER explicitly requests a web app.\n4. **New Project Creation**: If you need to use a framework for a new app, use `npx` with the appropriate script, but there are some rules to follow:,\n   - Use `npx -y` to automatically install the script and its dependencies\n   - You MUST run the command with `--help` flag to see all available options first, \n   - Initialize the app in the current directory with `./` (example: `npx -y create-vite-app@latest ./`),\n   - You should run in non-interactive mode so that the user doesn't need to input anything,\n5. **Running Locally**: When running locally, use `npm run dev` or equivalent dev server. Only build the production bundle if the USER explicitly requests it or you are validating the code for correctness.\n\n# Design Aesthetics,\n1. **Use Rich Aesthetics**: The USER should be wowed at first glance by the design. Use best practices in modern web design (e.g. vibrant colors, dark modes, glassmorphism, and dynamic animations) to create a stunning first impression. Failure to do this is UNACCEPTABLE.\n2. **Prioritize Visual Excellence**: Implement designs that will WOW the user and feel extremely premium:\n\t\t- Avoid generic colors (plain red, blue, green). Use curated, harmonious color palettes (e.g., HSL tailored colors, sleek dark modes).\n   - Using modern typography (e.g., from Google Fonts like Inter, Roboto, or Outfit) instead of browser defaults.\n\t\t- Use smooth gradients,\n\t\t- Add subtle micro-animations for enhanced user experience,\n3. **Use a Dynamic Design**: An interface that feels responsive and alive encourages interaction. Achieve this with hover effects and interactive elements. Micro-animations, in particular, are highly effective for improving user engagement.\n4. **Premium Designs**. Make a design that feels premium and state of the art. Avoid creating simple minimum viable products.\n4. **Don't use placeholders**. If you need an image, use your generate_image tool to create a working demonstration.,\n\n## Implementation Workflow,\nFollow this systematic approach when building web applications:,\n1. **Plan and Understand**:,\n\t\t- Fully understand the user's requirements,\n\t\t- Draw inspiration from modern, beautiful, and dynamic web designs,\n\t\t- Outline the features needed for the initial version,\n2. **Build the Foundation**:,\n\t\t- Start by creating/modifying `index.css`,\n\t\t- Implement the core design system with all tokens and utilities,\n3. **Create Components**:,\n\t\t- Build necessary components using your design system,\n\t\t- Ensure all components use predefined styles, not ad-hoc utilities,\n\t\t- Keep components focused and reusable,\n4. **Assemble Pages**:,\n\t\t- Update the main application to incorporate your design and components,\n\t\t- Ensure proper routing and navigation,\n\t\t- Implement responsive layouts,\n5. **Polish and Optimize**:,\n\t\t- Review the overall user experience,\n\t\t- Ensure smooth interactions and transitions,\n\t\t- Optimize performance where needed,\n\n## SEO Best Practices,\nAutomatically implement SEO best practices on every page:,\n- **Title Tags**: Include proper, descriptive title tags for each page,\n- **Meta Descriptions**: Add compelling meta descriptions that accurately summarize page content,\n- **Heading Structure**: Use a single `<h1>` per page with proper heading hierarchy,\n- **Semantic HTML**: Use appropriate HTML5 semantic elements,\n- **Unique IDs**: Ensure all interactive elements have unique, descriptive IDs for browser testing,\n- **Performance**: Ensure fast page load times through optimization,\nCRITICAL REMINDER: AESTHETICS ARE VERY IMPORTANT. If your web app looks simple and basic then you have FAILED!\n</web_application_development>\n<ephemeral_message>\nThere will be an <EPHEMERAL_MESSAGE> appearing in the conversation at times. This is not coming from the user, but instead injected by the system as important information to pay attention to. \nDo not respond to nor acknowledge those messages, but do follow them strictly.\n</ephemeral_message>\n\n\n<communication_style>\n- **Formatting**. Format your responses in github-style markdown to make your responses easier for the USER to parse. For example, use headers to organize your responses and bolded or italicized text to highlight important keywords. Use backticks to format file, directory, function, and class names. If providing a URL to the user, format this in markdown as well, for example `[label](example.com)`.\n- **Proactiveness**. As an agent, you are allowed to be proactive, but only in the course of completing the user's task. For example, if the user asks you to add a new component, you can edit the code, verify build and test statuses, and take any other obvious follow-up actions, such as performing additional research. However, avoid surprising the user. For example, if the user asks HOW to approach something, you should answer their question and instead of jumping into editing a file.\n- **Helpfulness**. Respond like a helpful software engineer who is explaining your work to a friendly collaborator on the project. Acknowledge mistakes or any backtracking you do as a result of new information.\n- **Ask for clarification**. If you are unsure about the USER's intent, always ask for clarification rather than making assumptions.\n</communication_style>"#;

/// How thought signatures are produced for the resolved backend model.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SignaturePolicy {
    /// Gemini engines skip verification when given [`DUMMY_THOUGHT_SIGNATURE`].
    Synthetic,
    /// Claude engines only accept signatures they issued.
    Genuine,
}

impl SignaturePolicy {
    pub fn for_model(mapped_model: &str) -> Self {
        if mapped_model.starts_with("gemini-") {
            SignaturePolicy::Synthetic
        } else {
            SignaturePolicy::Genuine
        }
    }
}

/// `tool_use.id -> tool_use.name` for one request.
#[derive(Debug, Default)]
pub struct ToolIdentityMap {
    names: HashMap<String, String>,
}

impl ToolIdentityMap {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn record(&mut self, id: &str, name: &str) {
        if !id.is_empty() && !name.is_empty() {
            self.names.insert(id.to_string(), name.to_string());
        }
    }

    pub fn name_for(&self, id: &str) -> Option<&str> {
        self.names.get(id).map(String::as_str)
    }
}

#[derive(Debug, Clone)]
pub struct TransformOptions {
    /// Identity preamble placed before the caller's system prompt; `None` disables it.
    pub identity_patch: Option<String>,
    pub max_output_tokens: u32,
}

impl Default for TransformOptions {
    fn default() -> Self {
        Self {
            identity_patch: Some(DEFAULT_IDENTITY_PATCH.to_string()),
            max_output_tokens: DEFAULT_MAX_OUTPUT_TOKENS,
        }
    }
}

/// Convert a Claude create-message request into the Gemini request body sent
/// inside the `v1internal` envelope.
pub fn transform_request(
    request: &CreateMessageRequestBody,
    mapped_model: &str,
    options: &TransformOptions,
    sanitizer: &SchemaSanitizer,
) -> GenerateContentRequestBody {
    let thinking_requested = request.thinking_enabled();
    let policy = SignaturePolicy::for_model(mapped_model);

    let mut tool_ids = ToolIdentityMap::new();
    let mapped = map_messages_to_contents(
        &request.messages,
        thinking_requested,
        policy,
        &mut tool_ids,
    );
    let thinking_active = thinking_requested && !mapped.thinking_downgraded;

    let system_instruction = map_system_to_content(request.system.as_ref(), options);
    let generation_config =
        map_generation_config(request, mapped_model, thinking_active, options);
    let tools = map_tools(request.tools.as_deref(), sanitizer);
    let tool_config = tools.as_ref().map(|_| ToolConfig {
        function_calling_config: FunctionCallingConfig {
            mode: FunctionCallingMode::Validated,
        },
    });
    let session_id = request
        .metadata
        .as_ref()
        .and_then(|metadata| metadata.user_id.clone())
        .filter(|user_id| !user_id.trim().is_empty());

    GenerateContentRequestBody {
        contents: mapped.contents,
        system_instruction,
        generation_config: Some(generation_config),
        tools,
        tool_config,
        safety_settings: Some(default_safety_settings()),
        session_id,
    }
}

struct MappedContents {
    contents: Vec<GeminiContent>,
    thinking_downgraded: bool,
}

fn map_messages_to_contents(
    messages: &[ClaudeMessageParam],
    thinking_requested: bool,
    policy: SignaturePolicy,
    tool_ids: &mut ToolIdentityMap,
) -> MappedContents {
    let mut contents = Vec::with_capacity(messages.len());
    let mut thinking_downgraded = false;
    let last_index = messages.len().saturating_sub(1);

    for (index, message) in messages.iter().enumerate() {
        let role = match message.role {
            ClaudeMessageRole::User => GeminiContentRole::User,
            ClaudeMessageRole::Assistant => GeminiContentRole::Model,
        };
        let mut parts =
            map_message_content(&message.content, policy, tool_ids, &mut thinking_downgraded);

        // Prefill only the trailing assistant turn; unsigned thoughts in history are rejected.
        if index == last_index
            && role == GeminiContentRole::Model
            && thinking_requested
            && policy == SignaturePolicy::Synthetic
            && !parts.is_empty()
            && !parts.iter().any(GeminiPart::is_thought)
        {
            parts.insert(
                0,
                GeminiPart::thought(
                    SYNTHETIC_THINKING_TEXT,
                    Some(DUMMY_THOUGHT_SIGNATURE.to_string()),
                ),
            );
        }

        if parts.is_empty() {
            continue;
        }
        contents.push(GeminiContent {
            parts,
            role: Some(role),
        });
    }

    MappedContents {
        contents,
        thinking_downgraded,
    }
}

fn map_message_content(
    content: &ClaudeMessageContent,
    policy: SignaturePolicy,
    tool_ids: &mut ToolIdentityMap,
    thinking_downgraded: &mut bool,
) -> Vec<GeminiPart> {
    match content {
        ClaudeMessageContent::Text(text) => {
            let text = text.trim();
            if is_placeholder_text(text) {
                Vec::new()
            } else {
                vec![GeminiPart::text(text)]
            }
        }
        ClaudeMessageContent::Blocks(blocks) => blocks
            .iter()
            .filter_map(|block| map_block_to_part(block, policy, tool_ids, thinking_downgraded))
            .collect(),
    }
}

fn map_block_to_part(
    block: &ClaudeContentBlockParam,
    policy: SignaturePolicy,
    tool_ids: &mut ToolIdentityMap,
    thinking_downgraded: &mut bool,
) -> Option<GeminiPart> {
    match block {
        ClaudeContentBlockParam::Text { text } => {
            (!is_placeholder_text(text)).then(|| GeminiPart::text(text.clone()))
        }
        ClaudeContentBlockParam::Thinking {
            thinking,
            signature,
        } => {
            let genuine = signature
                .as_deref()
                .filter(|signature| !signature.is_empty() && *signature != DUMMY_THOUGHT_SIGNATURE);
            match (genuine, policy) {
                (Some(signature), _) => Some(GeminiPart::thought(
                    thinking.clone(),
                    Some(signature.to_string()),
                )),
                (None, SignaturePolicy::Synthetic) => Some(GeminiPart::thought(
                    thinking.clone(),
                    Some(DUMMY_THOUGHT_SIGNATURE.to_string()),
                )),
                (None, SignaturePolicy::Genuine) => {
                    *thinking_downgraded = true;
                    (!thinking.trim().is_empty()).then(|| GeminiPart::text(thinking.clone()))
                }
            }
        }
        ClaudeContentBlockParam::Image { source } => match source {
            ClaudeImageSource::Base64 { media_type, data } => Some(GeminiPart {
                inline_data: Some(GeminiBlob {
                    mime_type: media_type.clone(),
                    data: data.clone(),
                }),
                ..GeminiPart::default()
            }),
            ClaudeImageSource::Unsupported => None,
        },
        ClaudeContentBlockParam::ToolUse {
            id,
            name,
            input,
            signature,
        } => {
            tool_ids.record(id, name);
            let thought_signature = match policy {
                SignaturePolicy::Synthetic => Some(DUMMY_THOUGHT_SIGNATURE.to_string()),
                SignaturePolicy::Genuine => signature
                    .clone()
                    .filter(|signature| {
                        !signature.is_empty() && signature != DUMMY_THOUGHT_SIGNATURE
                    }),
            };
            let args = if input.is_null() { json!({}) } else { input.clone() };
            Some(GeminiPart {
                function_call: Some(GeminiFunctionCall {
                    id: (!id.is_empty()).then(|| id.clone()),
                    name: name.clone(),
                    args: Some(args),
                }),
                thought_signature,
                ..GeminiPart::default()
            })
        }
        ClaudeContentBlockParam::ToolResult {
            tool_use_id,
            name,
            content,
            is_error,
        } => {
            let function_name = name
                .as_deref()
                .filter(|name| !name.is_empty())
                .or_else(|| tool_ids.name_for(tool_use_id))
                .unwrap_or(tool_use_id.as_str())
                .to_string();
            let text = tool_result_text(content.as_ref(), *is_error);
            Some(GeminiPart {
                function_response: Some(GeminiFunctionResponse {
                    id: (!tool_use_id.is_empty()).then(|| tool_use_id.clone()),
                    name: function_name,
                    response: json!({ "result": text }),
                }),
                ..GeminiPart::default()
            })
        }
        ClaudeContentBlockParam::Unsupported => None,
    }
}

fn is_placeholder_text(text: &str) -> bool {
    let trimmed = text.trim();
    trimmed.is_empty() || trimmed == NO_CONTENT_PLACEHOLDER
}

/// Reduces tool_result content to one text blob, substituting a fixed
/// sentence when nothing printable is left.
pub fn tool_result_text(content: Option<&JsonValue>, is_error: bool) -> String {
    let text = match content {
        None | Some(JsonValue::Null) => String::new(),
        Some(JsonValue::String(text)) => text.clone(),
        Some(JsonValue::Array(items)) => items
            .iter()
            .filter_map(|item| match item {
                JsonValue::String(text) => Some(text.as_str()),
                other => other.get("text").and_then(JsonValue::as_str),
            })
            .collect::<Vec<_>>()
            .join("\n"),
        Some(other) => other.to_string(),
    };
    if !text.trim().is_empty() {
        return text;
    }
    if is_error {
        TOOL_RESULT_EMPTY_ERROR.to_string()
    } else {
        TOOL_RESULT_EMPTY_SUCCESS.to_string()
    }
}

fn map_system_to_content(
    system: Option<&ClaudeSystemPrompt>,
    options: &TransformOptions,
) -> Option<GeminiContent> {
    let mut parts = Vec::new();
    if let Some(patch) = options.identity_patch.as_deref() {
        let patch = match patch.trim() {
            "" => DEFAULT_IDENTITY_PATCH,
            trimmed => trimmed,
        };
        parts.push(GeminiPart::text(patch));
    }

    match system {
        Some(ClaudeSystemPrompt::Text(text)) if !text.trim().is_empty() => {
            parts.push(GeminiPart::text(text.clone()));
        }
        Some(ClaudeSystemPrompt::Blocks(blocks)) => {
            for block in blocks {
                if block.r#type == "text" && !block.text.trim().is_empty() {
                    parts.push(GeminiPart::text(block.text.clone()));
                }
            }
        }
        _ => {}
    }

    if parts.is_empty() {
        return None;
    }
    Some(GeminiContent {
        parts,
        role: Some(GeminiContentRole::User),
    })
}

fn map_generation_config(
    request: &CreateMessageRequestBody,
    mapped_model: &str,
    thinking_active: bool,
    options: &TransformOptions,
) -> GenerationConfig {
    let thinking_config = if thinking_active {
        Some(map_thinking_config(request.thinking.as_ref(), mapped_model))
    } else {
        None
    };

    GenerationConfig {
        max_output_tokens: Some(options.max_output_tokens),
        stop_sequences: Some(
            DEFAULT_STOP_SEQUENCES
                .iter()
                .map(|stop| stop.to_string())
                .collect(),
        ),
        temperature: request.temperature,
        top_p: request.top_p,
        top_k: request.top_k,
        thinking_config,
    }
}

fn map_thinking_config(
    thinking: Option<&ClaudeThinkingConfigParam>,
    mapped_model: &str,
) -> ThinkingConfig {
    let budget = match thinking {
        Some(ClaudeThinkingConfigParam::Enabled { budget_tokens }) if *budget_tokens > 0 => {
            let mut budget = *budget_tokens;
            if mapped_model.contains("gemini-2.5-flash") {
                budget = budget.min(FLASH_THINKING_BUDGET_CAP);
            }
            Some(budget)
        }
        _ => None,
    };
    ThinkingConfig {
        include_thoughts: true,
        thinking_budget: budget,
    }
}

fn map_tools(tools: Option<&[ClaudeTool]>, sanitizer: &SchemaSanitizer) -> Option<Vec<GeminiTool>> {
    let tools = tools?;
    if tools.is_empty() {
        return None;
    }

    // Search grounding cannot be combined with function declarations.
    if tools.iter().any(|tool| tool.name == WEB_SEARCH_TOOL_NAME) {
        return Some(vec![GeminiTool {
            function_declarations: None,
            google_search: Some(GoogleSearch {
                enhanced_content: Some(EnhancedContent {
                    image_search: Some(ImageSearch {
                        max_result_count: 5,
                    }),
                }),
            }),
        }]);
    }

    let mut declarations = Vec::with_capacity(tools.len());
    for tool in tools {
        if tool.name.trim().is_empty() {
            warn!("skipping tool with empty name");
            continue;
        }
        let Some((description, schema)) = resolve_tool_spec(tool) else {
            warn!(tool = %tool.name, "skipping custom tool without input_schema");
            continue;
        };
        let parameters = match schema {
            Some(schema) if !schema.is_null() => sanitizer.clean(schema),
            _ => json!({ "type": "OBJECT", "properties": {} }),
        };
        declarations.push(FunctionDeclaration {
            name: tool.name.clone(),
            description,
            parameters: Some(parameters),
        });
    }

    if declarations.is_empty() {
        return None;
    }
    Some(vec![GeminiTool {
        function_declarations: Some(declarations),
        google_search: None,
    }])
}

/// Description and schema from either the top-level fields or the `custom` object.
fn resolve_tool_spec(tool: &ClaudeTool) -> Option<(String, Option<&JsonValue>)> {
    if let Some(custom) = &tool.custom {
        let schema = custom.input_schema.as_ref()?;
        let description = custom
            .description
            .clone()
            .or_else(|| tool.description.clone())
            .unwrap_or_default();
        return Some((description, Some(schema)));
    }
    if tool.r#type.as_deref() == Some("custom") && tool.input_schema.is_none() {
        return None;
    }
    Some((
        tool.description.clone().unwrap_or_default(),
        tool.input_schema.as_ref(),
    ))
}

fn default_safety_settings() -> Vec<SafetySetting> {
    [
        HarmCategory::Harassment,
        HarmCategory::HateSpeech,
        HarmCategory::SexuallyExplicit,
        HarmCategory::DangerousContent,
        HarmCategory::CivicIntegrity,
    ]
    .into_iter()
    .map(|category| SafetySetting {
        category,
        threshold: HarmBlockThreshold::Off,
    })
    .collect()
}
