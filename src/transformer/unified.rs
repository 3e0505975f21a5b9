//! Unified Internal Format (UIF).
//!
//! The protocol-neutral representation every transformer converts to and
//! from. Requests, responses, content blocks, and stream chunks all pass
//! through these types; no transformer ever sees another protocol's wire
//! shapes directly.

use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::collections::HashMap;

// ============================================================================
// Protocol
// ============================================================================

/// Supported LLM API protocols.
///
/// `GcpVertex` carries the Anthropic wire shape under a distinct tag; the
/// difference (URL construction) is the dispatcher's concern.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize, Default)]
#[serde(rename_all = "snake_case")]
pub enum Protocol {
    #[default]
    OpenAI,
    Anthropic,
    ResponseApi,
    Gemini,
    GcpVertex,
}

impl std::fmt::Display for Protocol {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let tag = match self {
            Protocol::OpenAI => "openai",
            Protocol::Anthropic => "anthropic",
            Protocol::ResponseApi => "response_api",
            Protocol::Gemini => "gemini",
            Protocol::GcpVertex => "gcp_vertex",
        };
        f.write_str(tag)
    }
}

impl std::str::FromStr for Protocol {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_lowercase().as_str() {
            "openai" => Ok(Protocol::OpenAI),
            "anthropic" | "claude" => Ok(Protocol::Anthropic),
            "response_api" | "response" | "response-api" | "responses" => Ok(Protocol::ResponseApi),
            "gemini" => Ok(Protocol::Gemini),
            "gcp_vertex" | "gcp-vertex" | "vertex" => Ok(Protocol::GcpVertex),
            _ => Err(format!("Unknown protocol: {}", s)),
        }
    }
}

// ============================================================================
// Roles
// ============================================================================

/// Message author role.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, Default)]
#[serde(rename_all = "lowercase")]
pub enum Role {
    System,
    #[default]
    User,
    Assistant,
    Tool,
}

impl std::fmt::Display for Role {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let tag = match self {
            Role::System => "system",
            Role::User => "user",
            Role::Assistant => "assistant",
            Role::Tool => "tool",
        };
        f.write_str(tag)
    }
}

impl std::str::FromStr for Role {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_lowercase().as_str() {
            "system" => Ok(Role::System),
            "user" => Ok(Role::User),
            "assistant" => Ok(Role::Assistant),
            "tool" | "function" => Ok(Role::Tool),
            _ => Err(format!("Unknown role: {}", s)),
        }
    }
}

// ============================================================================
// Content blocks
// ============================================================================

/// A single content block inside a message or response.
///
/// Tagged variant; translation is a match over the discriminator.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum UnifiedContent {
    /// Plain text.
    Text { text: String },

    /// Image, either base64-encoded or by URL.
    Image {
        source_type: String, // "base64" | "url"
        media_type: String,
        data: String,
    },

    /// Tool invocation requested by the assistant.
    ToolUse {
        id: String,
        name: String,
        input: Value,
    },

    /// Result of a tool execution.
    ToolResult {
        tool_use_id: String,
        content: Value,
        #[serde(default)]
        is_error: bool,
    },

    /// Extended-thinking content. A block with empty `text` and a present
    /// `signature` is a signature-only block that decorates the preceding
    /// block when re-emitted; signatures are opaque and preserved
    /// byte-for-byte.
    Thinking {
        text: String,
        #[serde(skip_serializing_if = "Option::is_none")]
        signature: Option<String>,
    },

    /// File reference (Response API).
    File {
        file_id: String,
        #[serde(skip_serializing_if = "Option::is_none")]
        filename: Option<String>,
    },

    /// Audio content.
    Audio { data: String, format: String },

    /// Model declined to respond.
    Refusal { reason: String },

    /// Partial tool-input JSON. Stream-only; never appears in buffered
    /// content.
    ToolInputDelta { index: usize, partial_json: String },
}

impl UnifiedContent {
    pub fn text(text: impl Into<String>) -> Self {
        UnifiedContent::Text { text: text.into() }
    }

    pub fn tool_use(id: impl Into<String>, name: impl Into<String>, input: Value) -> Self {
        UnifiedContent::ToolUse {
            id: id.into(),
            name: name.into(),
            input,
        }
    }

    pub fn tool_result(tool_use_id: impl Into<String>, content: Value, is_error: bool) -> Self {
        UnifiedContent::ToolResult {
            tool_use_id: tool_use_id.into(),
            content,
            is_error,
        }
    }

    pub fn image_base64(media_type: impl Into<String>, data: impl Into<String>) -> Self {
        UnifiedContent::Image {
            source_type: "base64".to_string(),
            media_type: media_type.into(),
            data: data.into(),
        }
    }

    pub fn image_url(url: impl Into<String>) -> Self {
        UnifiedContent::Image {
            source_type: "url".to_string(),
            media_type: String::new(),
            data: url.into(),
        }
    }

    pub fn thinking(text: impl Into<String>, signature: Option<String>) -> Self {
        UnifiedContent::Thinking {
            text: text.into(),
            signature,
        }
    }

    pub fn tool_input_delta(index: usize, partial_json: impl Into<String>) -> Self {
        UnifiedContent::ToolInputDelta {
            index,
            partial_json: partial_json.into(),
        }
    }

    /// Discriminator name of this block.
    pub fn content_type(&self) -> &'static str {
        match self {
            UnifiedContent::Text { .. } => "text",
            UnifiedContent::Image { .. } => "image",
            UnifiedContent::ToolUse { .. } => "tool_use",
            UnifiedContent::ToolResult { .. } => "tool_result",
            UnifiedContent::Thinking { .. } => "thinking",
            UnifiedContent::File { .. } => "file",
            UnifiedContent::Audio { .. } => "audio",
            UnifiedContent::Refusal { .. } => "refusal",
            UnifiedContent::ToolInputDelta { .. } => "tool_input_delta",
        }
    }

    pub fn as_text(&self) -> Option<&str> {
        match self {
            UnifiedContent::Text { text } => Some(text),
            _ => None,
        }
    }

    /// True for a Thinking block with empty text and a signature.
    pub fn is_signature_only(&self) -> bool {
        matches!(
            self,
            UnifiedContent::Thinking { text, signature }
                if text.is_empty() && signature.is_some()
        )
    }
}

// ============================================================================
// Tools
// ============================================================================

/// Tool kind. Non-`Function` kinds are Response-API builtins that round-trip
/// through UIF unchanged so a Response-API client gets them back intact.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, Default)]
#[serde(rename_all = "snake_case")]
pub enum ToolType {
    #[default]
    Function,
    ComputerUsePreview,
    WebSearchPreview,
    FileSearch,
}

impl ToolType {
    pub fn as_str(&self) -> &'static str {
        match self {
            ToolType::Function => "function",
            ToolType::ComputerUsePreview => "computer_use_preview",
            ToolType::WebSearchPreview => "web_search_preview",
            ToolType::FileSearch => "file_search",
        }
    }
}

/// Tool definition offered to the model.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct UnifiedTool {
    pub name: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub description: Option<String>,
    pub input_schema: Value,
    #[serde(default)]
    pub tool_type: ToolType,
}

impl UnifiedTool {
    pub fn function(
        name: impl Into<String>,
        description: Option<String>,
        input_schema: Value,
    ) -> Self {
        UnifiedTool {
            name: name.into(),
            description,
            input_schema,
            tool_type: ToolType::Function,
        }
    }
}

/// A tool call made by the assistant, denormalized from `ToolUse` content.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct UnifiedToolCall {
    pub id: String,
    pub name: String,
    pub arguments: Value,
}

// ============================================================================
// Messages
// ============================================================================

/// A conversation message. Content ordering is significant.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct UnifiedMessage {
    pub role: Role,
    pub content: Vec<UnifiedContent>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub name: Option<String>,
    /// Tool calls for assistant messages (OpenAI keeps these outside
    /// content; Anthropic inlines them as blocks — both feed here).
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub tool_calls: Vec<UnifiedToolCall>,
    /// Tool call ID for tool-role messages.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub tool_call_id: Option<String>,
}

impl UnifiedMessage {
    pub fn new(role: Role, text: impl Into<String>) -> Self {
        UnifiedMessage {
            role,
            content: vec![UnifiedContent::text(text)],
            name: None,
            tool_calls: vec![],
            tool_call_id: None,
        }
    }

    pub fn user(text: impl Into<String>) -> Self {
        Self::new(Role::User, text)
    }

    pub fn assistant(text: impl Into<String>) -> Self {
        Self::new(Role::Assistant, text)
    }

    pub fn with_content(role: Role, content: Vec<UnifiedContent>) -> Self {
        UnifiedMessage {
            role,
            content,
            name: None,
            tool_calls: vec![],
            tool_call_id: None,
        }
    }

    pub fn tool_result(tool_call_id: impl Into<String>, content: Value, is_error: bool) -> Self {
        let id = tool_call_id.into();
        UnifiedMessage {
            role: Role::Tool,
            content: vec![UnifiedContent::tool_result(&id, content, is_error)],
            name: None,
            tool_calls: vec![],
            tool_call_id: Some(id),
        }
    }

    /// Concatenated text of all text blocks.
    pub fn text_content(&self) -> String {
        self.content
            .iter()
            .filter_map(UnifiedContent::as_text)
            .collect()
    }

    /// Whether any block is tool-related content.
    pub fn has_tool_content(&self) -> bool {
        self.content.iter().any(|c| {
            matches!(
                c,
                UnifiedContent::ToolUse { .. } | UnifiedContent::ToolResult { .. }
            )
        })
    }
}

// ============================================================================
// Parameters / Request
// ============================================================================

/// Sampling and control parameters. Keys a protocol does not recognize
/// travel in `extra` and are re-emitted verbatim on the provider leg.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct UnifiedParameters {
    #[serde(skip_serializing_if = "Option::is_none")]
    pub temperature: Option<f64>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub max_tokens: Option<i32>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub top_p: Option<f64>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub top_k: Option<i32>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub stop_sequences: Option<Vec<String>>,
    #[serde(default)]
    pub stream: bool,
    #[serde(default, skip_serializing_if = "HashMap::is_empty")]
    pub extra: HashMap<String, Value>,
}

/// A request in unified form.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct UnifiedRequest {
    /// Model name as the client sent it.
    pub model: String,
    pub messages: Vec<UnifiedMessage>,
    /// System prompt, hoisted out of the message list.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub system: Option<String>,
    #[serde(default)]
    pub parameters: UnifiedParameters,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub tools: Vec<UnifiedTool>,
    /// Normalized form: `{type: auto|none|any|tool, name?}`.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub tool_choice: Option<Value>,
    /// Request ID for tracing.
    #[serde(default)]
    pub request_id: String,
    #[serde(default)]
    pub client_protocol: Protocol,
    #[serde(default, skip_serializing_if = "HashMap::is_empty")]
    pub metadata: HashMap<String, Value>,
}

impl UnifiedRequest {
    pub fn new(model: impl Into<String>, messages: Vec<UnifiedMessage>) -> Self {
        UnifiedRequest {
            model: model.into(),
            messages,
            system: None,
            parameters: UnifiedParameters::default(),
            tools: vec![],
            tool_choice: None,
            request_id: uuid::Uuid::new_v4().to_string(),
            client_protocol: Protocol::default(),
            metadata: HashMap::new(),
        }
    }

    pub fn with_system(mut self, system: impl Into<String>) -> Self {
        self.system = Some(system.into());
        self
    }

    pub fn with_stream(mut self, stream: bool) -> Self {
        self.parameters.stream = stream;
        self
    }

    pub fn with_max_tokens(mut self, max_tokens: i32) -> Self {
        self.parameters.max_tokens = Some(max_tokens);
        self
    }

    pub fn with_client_protocol(mut self, protocol: Protocol) -> Self {
        self.client_protocol = protocol;
        self
    }

    pub fn is_streaming(&self) -> bool {
        self.parameters.stream
    }
}

// ============================================================================
// Responses
// ============================================================================

/// Why generation stopped.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, Default)]
#[serde(rename_all = "snake_case")]
pub enum StopReason {
    #[default]
    EndTurn,
    MaxTokens,
    /// OpenAI-style length limit; folds into `MaxTokens` on emission to
    /// protocols that lack the distinction.
    Length,
    StopSequence,
    ToolUse,
    ContentFilter,
}

/// Token accounting for a completed turn.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct UnifiedUsage {
    pub input_tokens: i32,
    pub output_tokens: i32,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub cache_read_tokens: Option<i32>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub cache_write_tokens: Option<i32>,
}

impl UnifiedUsage {
    pub fn new(input_tokens: i32, output_tokens: i32) -> Self {
        UnifiedUsage {
            input_tokens,
            output_tokens,
            cache_read_tokens: None,
            cache_write_tokens: None,
        }
    }

    pub fn total_tokens(&self) -> i32 {
        self.input_tokens + self.output_tokens
    }

    pub fn is_zero(&self) -> bool {
        self.input_tokens == 0 && self.output_tokens == 0
    }
}

/// A response in unified form.
///
/// `tool_calls` is a denormalized projection of the `ToolUse` blocks in
/// `content`; the two agree on id/name/arguments.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct UnifiedResponse {
    pub id: String,
    pub model: String,
    pub content: Vec<UnifiedContent>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub stop_reason: Option<StopReason>,
    #[serde(default)]
    pub usage: UnifiedUsage,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub tool_calls: Vec<UnifiedToolCall>,
}

impl UnifiedResponse {
    pub fn new(
        id: impl Into<String>,
        model: impl Into<String>,
        content: Vec<UnifiedContent>,
        stop_reason: Option<StopReason>,
        usage: UnifiedUsage,
    ) -> Self {
        let tool_calls = extract_tool_calls(&content);
        UnifiedResponse {
            id: id.into(),
            model: model.into(),
            content,
            stop_reason,
            usage,
            tool_calls,
        }
    }

    pub fn text(
        id: impl Into<String>,
        model: impl Into<String>,
        text: impl Into<String>,
        usage: UnifiedUsage,
    ) -> Self {
        Self::new(
            id,
            model,
            vec![UnifiedContent::text(text)],
            Some(StopReason::EndTurn),
            usage,
        )
    }

    /// Concatenated text of all text blocks.
    pub fn text_content(&self) -> String {
        self.content
            .iter()
            .filter_map(UnifiedContent::as_text)
            .collect()
    }
}

/// Project `ToolUse` blocks into denormalized tool calls.
pub fn extract_tool_calls(content: &[UnifiedContent]) -> Vec<UnifiedToolCall> {
    content
        .iter()
        .filter_map(|c| match c {
            UnifiedContent::ToolUse { id, name, input } => Some(UnifiedToolCall {
                id: id.clone(),
                name: name.clone(),
                arguments: input.clone(),
            }),
            _ => None,
        })
        .collect()
}

// ============================================================================
// Streaming
// ============================================================================

/// Kind of a unified stream chunk. `Display` yields the Anthropic event
/// grammar names, which double as the normal-form vocabulary.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ChunkType {
    MessageStart,
    ContentBlockStart,
    ContentBlockDelta,
    ContentBlockStop,
    MessageDelta,
    MessageStop,
    Ping,
}

impl std::fmt::Display for ChunkType {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let tag = match self {
            ChunkType::MessageStart => "message_start",
            ChunkType::ContentBlockStart => "content_block_start",
            ChunkType::ContentBlockDelta => "content_block_delta",
            ChunkType::ContentBlockStop => "content_block_stop",
            ChunkType::MessageDelta => "message_delta",
            ChunkType::MessageStop => "message_stop",
            ChunkType::Ping => "ping",
        };
        f.write_str(tag)
    }
}

/// A unified stream chunk. Which fields are populated depends on
/// `chunk_type`.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct UnifiedStreamChunk {
    pub chunk_type: ChunkType,
    #[serde(default)]
    pub index: usize,
    /// Full message for `MessageStart`.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub message: Option<UnifiedResponse>,
    /// Opening block for `ContentBlockStart`.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub content_block: Option<UnifiedContent>,
    /// Delta payload for `ContentBlockDelta`.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub delta: Option<UnifiedContent>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub stop_reason: Option<StopReason>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub usage: Option<UnifiedUsage>,
}

impl UnifiedStreamChunk {
    fn bare(chunk_type: ChunkType, index: usize) -> Self {
        UnifiedStreamChunk {
            chunk_type,
            index,
            message: None,
            content_block: None,
            delta: None,
            stop_reason: None,
            usage: None,
        }
    }

    pub fn message_start(message: UnifiedResponse) -> Self {
        let mut chunk = Self::bare(ChunkType::MessageStart, 0);
        chunk.usage = Some(message.usage.clone());
        chunk.message = Some(message);
        chunk
    }

    pub fn content_block_start(index: usize, content_block: UnifiedContent) -> Self {
        let mut chunk = Self::bare(ChunkType::ContentBlockStart, index);
        chunk.content_block = Some(content_block);
        chunk
    }

    pub fn content_block_delta(index: usize, delta: UnifiedContent) -> Self {
        let mut chunk = Self::bare(ChunkType::ContentBlockDelta, index);
        chunk.delta = Some(delta);
        chunk
    }

    pub fn content_block_stop(index: usize) -> Self {
        Self::bare(ChunkType::ContentBlockStop, index)
    }

    pub fn message_delta(stop_reason: StopReason, usage: UnifiedUsage) -> Self {
        let mut chunk = Self::bare(ChunkType::MessageDelta, 0);
        chunk.stop_reason = Some(stop_reason);
        chunk.usage = Some(usage);
        chunk
    }

    pub fn message_stop() -> Self {
        Self::bare(ChunkType::MessageStop, 0)
    }

    pub fn ping() -> Self {
        Self::bare(ChunkType::Ping, 0)
    }
}

// ============================================================================
// Tests
// ============================================================================
