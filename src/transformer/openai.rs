//! OpenAI Chat Completions transformer.
//!
//! Beyond the plain message mapping, this protocol carries extended
//! thinking over four redundant channels (`reasoning_content`,
//! `thinking_blocks`, `provider_specific_fields.thought_signatures`, and
//! signatures encoded into tool-call ids). All four are written on
//! emission for downstream-client compatibility; parsing stops at the
//! first populated channel.

use super::{
    ChunkType, Protocol, Role, StopReason, StreamDecoder, StreamEncoder, Transformer,
    UnifiedContent, UnifiedMessage, UnifiedParameters, UnifiedRequest, UnifiedResponse,
    UnifiedStreamChunk, UnifiedTool, UnifiedToolCall, UnifiedUsage,
};
use crate::core::error::{ProxyError, Result};
use crate::transformer::unified::ToolType;
use bytes::Bytes;
use serde::{Deserialize, Serialize};
use serde_json::{json, Value};
use std::collections::HashMap;

/// Separator used to smuggle a thought signature inside a tool-call id.
pub const THOUGHT_SIGNATURE_SEPARATOR: &str = "__thought__";

/// Split a tool-call id into (base id, optional signature).
fn split_tool_call_id(id: &str) -> (&str, Option<&str>) {
    match id.split_once(THOUGHT_SIGNATURE_SEPARATOR) {
        Some((base, sig)) if !sig.is_empty() => (base, Some(sig)),
        Some((base, _)) => (base, None),
        None => (id, None),
    }
}

// ============================================================================
// Wire types
// ============================================================================

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct ChatMessage {
    pub role: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub content: Option<ChatContent>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub reasoning_content: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub thinking_blocks: Option<Vec<Value>>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub provider_specific_fields: Option<Value>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub name: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub tool_calls: Option<Vec<ChatToolCall>>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub tool_call_id: Option<String>,
}

/// Message content: plain string or multimodal parts.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(untagged)]
pub enum ChatContent {
    Text(String),
    Parts(Vec<ChatContentPart>),
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum ChatContentPart {
    Text { text: String },
    ImageUrl { image_url: ChatImageUrl },
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ChatImageUrl {
    pub url: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub detail: Option<String>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ChatToolCall {
    pub id: String,
    #[serde(rename = "type")]
    pub call_type: String,
    pub function: ChatFunctionCall,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub provider_specific_fields: Option<Value>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ChatFunctionCall {
    pub name: String,
    pub arguments: String,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ChatTool {
    #[serde(rename = "type")]
    pub tool_type: String,
    pub function: ChatFunction,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ChatFunction {
    pub name: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub description: Option<String>,
    pub parameters: Value,
}

#[derive(Debug, Clone, Deserialize)]
pub struct ChatRequest {
    pub model: String,
    pub messages: Vec<ChatMessage>,
    pub temperature: Option<f64>,
    pub max_tokens: Option<i32>,
    /// Newer alias for `max_tokens`.
    pub max_completion_tokens: Option<i32>,
    pub top_p: Option<f64>,
    pub stop: Option<Vec<String>>,
    pub stream: Option<bool>,
    pub tools: Option<Vec<ChatTool>>,
    pub tool_choice: Option<Value>,
    #[serde(flatten)]
    pub extra: HashMap<String, Value>,
}

#[derive(Debug, Clone, Deserialize)]
pub struct ChatResponse {
    pub id: String,
    pub model: String,
    pub choices: Vec<ChatChoice>,
    pub usage: Option<ChatUsage>,
}

#[derive(Debug, Clone, Deserialize)]
pub struct ChatChoice {
    pub message: ChatMessage,
    pub finish_reason: Option<String>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ChatUsage {
    pub prompt_tokens: i32,
    pub completion_tokens: i32,
    pub total_tokens: i32,
}

#[derive(Debug, Clone, Deserialize)]
struct ChatStreamChunk {
    #[serde(default)]
    choices: Vec<ChatStreamChoice>,
    usage: Option<ChatUsage>,
}

#[derive(Debug, Clone, Deserialize)]
struct ChatStreamChoice {
    delta: ChatDelta,
    finish_reason: Option<String>,
}

#[derive(Debug, Clone, Default, Deserialize)]
struct ChatDelta {
    content: Option<String>,
    reasoning_content: Option<String>,
    thinking_blocks: Option<Vec<Value>>,
    provider_specific_fields: Option<Value>,
    tool_calls: Option<Vec<ChatDeltaToolCall>>,
}

#[derive(Debug, Clone, Deserialize)]
struct ChatDeltaToolCall {
    index: i64,
    id: Option<String>,
    function: Option<ChatDeltaFunction>,
}

#[derive(Debug, Clone, Deserialize)]
struct ChatDeltaFunction {
    name: Option<String>,
    arguments: Option<String>,
}

// ============================================================================
// Transformer
// ============================================================================

pub struct OpenAITransformer;

impl OpenAITransformer {
    pub fn new() -> Self {
        OpenAITransformer
    }

    fn finish_reason_to_stop_reason(reason: &str) -> StopReason {
        match reason {
            "stop" => StopReason::EndTurn,
            "length" => StopReason::MaxTokens,
            "tool_calls" => StopReason::ToolUse,
            "content_filter" => StopReason::ContentFilter,
            _ => StopReason::EndTurn,
        }
    }

    fn stop_reason_to_finish_reason(reason: StopReason) -> &'static str {
        match reason {
            StopReason::EndTurn | StopReason::StopSequence => "stop",
            StopReason::MaxTokens | StopReason::Length => "length",
            StopReason::ToolUse => "tool_calls",
            StopReason::ContentFilter => "content_filter",
        }
    }

    /// Parse a content value into UIF blocks. Data URLs become base64
    /// images; everything else keeps its URL.
    fn content_to_unified(content: &ChatContent) -> Vec<UnifiedContent> {
        match content {
            ChatContent::Text(text) => vec![UnifiedContent::text(text)],
            ChatContent::Parts(parts) => parts
                .iter()
                .map(|part| match part {
                    ChatContentPart::Text { text } => UnifiedContent::text(text),
                    ChatContentPart::ImageUrl { image_url } => Self::parse_image_url(&image_url.url),
                })
                .collect(),
        }
    }

    fn parse_image_url(url: &str) -> UnifiedContent {
        if let Some(rest) = url.strip_prefix("data:") {
            if let Some((header, data)) = rest.split_once(',') {
                let media_type = header.split(';').next().unwrap_or("image/jpeg");
                return UnifiedContent::image_base64(media_type, data);
            }
        }
        UnifiedContent::image_url(url)
    }

    /// Parse one wire message to UIF, recovering thinking content and
    /// signatures from whichever channel is populated first:
    /// `thinking_blocks` signatures, then
    /// `provider_specific_fields.thought_signatures`, then signatures
    /// carried in tool-call ids / per-call provider fields.
    fn message_to_unified(msg: &ChatMessage) -> UnifiedMessage {
        let role = msg.role.parse().unwrap_or(Role::User);

        let mut content = msg
            .content
            .as_ref()
            .map(Self::content_to_unified)
            .unwrap_or_default();

        // Thinking text: reasoning_content first, thinking_blocks otherwise.
        if let Some(ref reasoning) = msg.reasoning_content {
            if !reasoning.is_empty() {
                content.insert(0, UnifiedContent::thinking(reasoning, None));
            }
        } else if let Some(ref blocks) = msg.thinking_blocks {
            let mut offset = 0;
            for block in blocks {
                if block.get("type").and_then(Value::as_str) != Some("thinking") {
                    continue;
                }
                if let Some(text) = block.get("thinking").and_then(Value::as_str) {
                    if !text.is_empty() {
                        content.insert(offset, UnifiedContent::thinking(text, None));
                        offset += 1;
                    }
                }
            }
        }

        // Signatures: first populated channel wins.
        let mut signatures: Vec<String> = msg
            .thinking_blocks
            .iter()
            .flatten()
            .filter_map(|b| b.get("signature").and_then(Value::as_str))
            .map(String::from)
            .collect();
        if signatures.is_empty() {
            if let Some(sigs) = msg
                .provider_specific_fields
                .as_ref()
                .and_then(|psf| psf.get("thought_signatures"))
                .and_then(Value::as_array)
            {
                signatures = sigs
                    .iter()
                    .filter_map(Value::as_str)
                    .map(String::from)
                    .collect();
            }
        }

        // Tool calls; ids may carry an encoded signature.
        let mut tool_call_signatures: Vec<String> = Vec::new();
        let tool_calls: Vec<UnifiedToolCall> = msg
            .tool_calls
            .iter()
            .flatten()
            .map(|tc| {
                if let Some(sig) = tc
                    .provider_specific_fields
                    .as_ref()
                    .and_then(|psf| psf.get("thought_signature"))
                    .and_then(Value::as_str)
                {
                    if !tool_call_signatures.iter().any(|s| s == sig) {
                        tool_call_signatures.push(sig.to_string());
                    }
                }
                let (base_id, id_sig) = split_tool_call_id(&tc.id);
                if let Some(sig) = id_sig {
                    if !tool_call_signatures.iter().any(|s| s == sig) {
                        tool_call_signatures.push(sig.to_string());
                    }
                }
                UnifiedToolCall {
                    id: base_id.to_string(),
                    name: tc.function.name.clone(),
                    arguments: serde_json::from_str(&tc.function.arguments).unwrap_or(json!({})),
                }
            })
            .collect();
        if signatures.is_empty() {
            signatures = tool_call_signatures;
        }

        for sig in signatures {
            content.push(UnifiedContent::thinking("", Some(sig)));
        }

        // Tool-result messages may carry the encoded id too.
        let tool_call_id = msg
            .tool_call_id
            .as_ref()
            .map(|id| split_tool_call_id(id).0.to_string());

        UnifiedMessage {
            role,
            content,
            name: msg.name.clone(),
            tool_calls,
            tool_call_id,
        }
    }

    fn unified_to_content_part(content: &UnifiedContent) -> Option<ChatContentPart> {
        match content {
            UnifiedContent::Text { text } => Some(ChatContentPart::Text { text: text.clone() }),
            UnifiedContent::Image {
                source_type,
                media_type,
                data,
            } => {
                let url = if source_type == "base64" {
                    format!("data:{};base64,{}", media_type, data)
                } else {
                    data.clone()
                };
                Some(ChatContentPart::ImageUrl {
                    image_url: ChatImageUrl { url, detail: None },
                })
            }
            _ => None,
        }
    }

    fn unified_to_message(msg: &UnifiedMessage) -> ChatMessage {
        let parts: Vec<ChatContentPart> = msg
            .content
            .iter()
            .filter_map(Self::unified_to_content_part)
            .collect();

        let content = match (parts.len(), msg.content.first()) {
            (0, _) => None,
            (1, Some(UnifiedContent::Text { .. })) if msg.content.len() == 1 => {
                match parts.into_iter().next() {
                    Some(ChatContentPart::Text { text }) => Some(ChatContent::Text(text)),
                    _ => None,
                }
            }
            _ => Some(ChatContent::Parts(parts)),
        };

        let tool_calls = if msg.tool_calls.is_empty() {
            None
        } else {
            Some(
                msg.tool_calls
                    .iter()
                    .map(|tc| ChatToolCall {
                        id: tc.id.clone(),
                        call_type: "function".to_string(),
                        function: ChatFunctionCall {
                            name: tc.name.clone(),
                            arguments: serde_json::to_string(&tc.arguments).unwrap_or_default(),
                        },
                        provider_specific_fields: None,
                    })
                    .collect(),
            )
        };

        ChatMessage {
            role: msg.role.to_string(),
            content,
            name: msg.name.clone(),
            tool_calls,
            tool_call_id: msg.tool_call_id.clone(),
            ..Default::default()
        }
    }

    /// Flatten tool-result content to the single string OpenAI accepts.
    fn tool_result_to_string(content: &Value, is_error: bool) -> String {
        let text = match content {
            Value::String(s) => s.clone(),
            Value::Null => String::new(),
            Value::Array(blocks) => blocks
                .iter()
                .filter_map(|b| b.get("text").and_then(Value::as_str))
                .collect::<Vec<_>>()
                .join("\n"),
            other => serde_json::to_string(other).unwrap_or_default(),
        };
        if is_error && !text.is_empty() {
            format!("[Error] {}", text)
        } else {
            text
        }
    }

    /// Normalize OpenAI `tool_choice` to the UIF form
    /// `{type: auto|none|any|tool, name?}`.
    fn tool_choice_to_uif(tool_choice: Option<Value>) -> Option<Value> {
        tool_choice.map(|tc| {
            if let Some(s) = tc.as_str() {
                match s {
                    "required" => json!({"type": "any"}),
                    other => json!({"type": other}),
                }
            } else if tc.get("type").and_then(Value::as_str) == Some("function") {
                let name = tc
                    .get("function")
                    .and_then(|f| f.get("name"))
                    .and_then(Value::as_str)
                    .map(String::from);
                match name {
                    Some(name) => json!({"type": "tool", "name": name}),
                    None => tc,
                }
            } else {
                tc
            }
        })
    }

    /// UIF `tool_choice` back to OpenAI's wire form.
    fn tool_choice_from_uif(tool_choice: &Value) -> Value {
        match tool_choice.get("type").and_then(Value::as_str) {
            Some("auto") => json!("auto"),
            Some("none") => json!("none"),
            Some("any") => json!("required"),
            Some("tool") => match tool_choice.get("name").and_then(Value::as_str) {
                Some(name) => json!({"type": "function", "function": {"name": name}}),
                None => tool_choice.clone(),
            },
            _ => tool_choice.clone(),
        }
    }

    fn stream_frame(body: Value) -> String {
        format!("data: {}\n\n", body)
    }

    fn stream_chunk_envelope(choices: Value) -> Value {
        json!({
            "id": "chatcmpl-stream",
            "object": "chat.completion.chunk",
            "created": chrono::Utc::now().timestamp(),
            "model": "model",
            "choices": choices,
        })
    }
}

impl Default for OpenAITransformer {
    fn default() -> Self {
        Self::new()
    }
}

impl Transformer for OpenAITransformer {
    fn protocol(&self) -> Protocol {
        Protocol::OpenAI
    }

    fn endpoint(&self) -> &'static str {
        "/v1/chat/completions"
    }

    fn transform_request_out(&self, raw: Value) -> Result<UnifiedRequest> {
        let request: ChatRequest =
            serde_json::from_value(raw).map_err(|e| ProxyError::InvalidRequest(e.to_string()))?;

        let all_messages: Vec<UnifiedMessage> = request
            .messages
            .iter()
            .map(Self::message_to_unified)
            .collect();

        // System prompt is inline in OpenAI; hoist it to the top level.
        let system = all_messages
            .iter()
            .find(|m| m.role == Role::System)
            .map(UnifiedMessage::text_content);
        let messages: Vec<UnifiedMessage> = all_messages
            .into_iter()
            .filter(|m| m.role != Role::System)
            .collect();

        let tools: Vec<UnifiedTool> = request
            .tools
            .unwrap_or_default()
            .into_iter()
            .map(|t| UnifiedTool {
                name: t.function.name,
                description: t.function.description,
                input_schema: t.function.parameters,
                tool_type: ToolType::Function,
            })
            .collect();

        Ok(UnifiedRequest {
            model: request.model,
            messages,
            system,
            parameters: UnifiedParameters {
                temperature: request.temperature,
                max_tokens: request.max_tokens.or(request.max_completion_tokens),
                top_p: request.top_p,
                top_k: None,
                stop_sequences: request.stop,
                stream: request.stream.unwrap_or(false),
                extra: request.extra,
            },
            tools,
            tool_choice: Self::tool_choice_to_uif(request.tool_choice),
            request_id: uuid::Uuid::new_v4().to_string(),
            client_protocol: Protocol::OpenAI,
            metadata: HashMap::new(),
        })
    }

    fn transform_request_in(&self, unified: &UnifiedRequest) -> Result<Value> {
        let mut messages: Vec<ChatMessage> = Vec::with_capacity(unified.messages.len() + 1);

        if let Some(ref system) = unified.system {
            messages.push(ChatMessage {
                role: "system".to_string(),
                content: Some(ChatContent::Text(system.clone())),
                ..Default::default()
            });
        }

        for msg in &unified.messages {
            let has_tool_results = msg
                .content
                .iter()
                .any(|c| matches!(c, UnifiedContent::ToolResult { .. }));

            if !has_tool_results {
                messages.push(Self::unified_to_message(msg));
                continue;
            }

            // One UIF message may bundle several tool results (the
            // Anthropic shape). Each becomes its own tool message, emitted
            // BEFORE any remaining user content so the
            // assistant(tool_calls) → tool(result) adjacency that strict
            // providers require survives.
            for content in &msg.content {
                if let UnifiedContent::ToolResult {
                    tool_use_id,
                    content,
                    is_error,
                } = content
                {
                    messages.push(ChatMessage {
                        role: "tool".to_string(),
                        content: Some(ChatContent::Text(Self::tool_result_to_string(
                            content, *is_error,
                        ))),
                        tool_call_id: Some(tool_use_id.clone()),
                        ..Default::default()
                    });
                }
            }

            let leftover: Vec<ChatContentPart> = msg
                .content
                .iter()
                .filter(|c| !matches!(c, UnifiedContent::ToolResult { .. }))
                .filter_map(Self::unified_to_content_part)
                .collect();
            if !leftover.is_empty() {
                messages.push(ChatMessage {
                    role: "user".to_string(),
                    content: Some(ChatContent::Parts(leftover)),
                    name: msg.name.clone(),
                    ..Default::default()
                });
            }
        }

        let mut request = json!({
            "model": unified.model,
            "messages": messages,
        });

        if let Some(temperature) = unified.parameters.temperature {
            request["temperature"] = json!(temperature);
        }
        if let Some(max_tokens) = unified.parameters.max_tokens {
            request["max_tokens"] = json!(max_tokens);
        }
        if let Some(top_p) = unified.parameters.top_p {
            request["top_p"] = json!(top_p);
        }
        if let Some(ref stop) = unified.parameters.stop_sequences {
            request["stop"] = json!(stop);
        }
        if unified.parameters.stream {
            request["stream"] = json!(true);
        }
        if !unified.tools.is_empty() {
            let tools: Vec<ChatTool> = unified
                .tools
                .iter()
                .map(|t| {
                    if t.tool_type != ToolType::Function {
                        // Response-API builtin lowered to an OpenAI client;
                        // it cannot invoke these, but stripping would lose
                        // the round-trip.
                        tracing::warn!(
                            tool = %t.name,
                            tool_type = t.tool_type.as_str(),
                            "emitting non-function tool type to OpenAI wire"
                        );
                    }
                    ChatTool {
                        tool_type: t.tool_type.as_str().to_string(),
                        function: ChatFunction {
                            name: t.name.clone(),
                            description: t.description.clone(),
                            parameters: t.input_schema.clone(),
                        },
                    }
                })
                .collect();
            request["tools"] = json!(tools);
        }
        if let Some(ref tool_choice) = unified.tool_choice {
            request["tool_choice"] = Self::tool_choice_from_uif(tool_choice);
        }
        for (key, value) in &unified.parameters.extra {
            request[key] = value.clone();
        }

        Ok(request)
    }

    fn transform_response_in(&self, raw: Value, original_model: &str) -> Result<UnifiedResponse> {
        let response: ChatResponse =
            serde_json::from_value(raw).map_err(|e| ProxyError::Decode(e.to_string()))?;

        let choice = response
            .choices
            .first()
            .ok_or_else(|| ProxyError::Decode("no choices in response".to_string()))?;

        let unified_msg = Self::message_to_unified(&choice.message);
        let stop_reason = choice
            .finish_reason
            .as_deref()
            .map(Self::finish_reason_to_stop_reason);
        let usage = response
            .usage
            .map(|u| UnifiedUsage::new(u.prompt_tokens, u.completion_tokens))
            .unwrap_or_default();

        Ok(UnifiedResponse {
            id: response.id,
            model: original_model.to_string(),
            content: unified_msg.content,
            stop_reason,
            usage,
            tool_calls: unified_msg.tool_calls,
        })
    }

    fn transform_response_out(
        &self,
        unified: &UnifiedResponse,
        _client_protocol: Protocol,
    ) -> Result<Value> {
        let mut text_parts: Vec<ChatContentPart> = Vec::new();
        let mut reasoning_content: Option<String> = None;
        let mut thinking_blocks: Vec<Value> = Vec::new();
        let mut thought_signatures: Vec<String> = Vec::new();

        for block in &unified.content {
            match block {
                UnifiedContent::Text { text } => {
                    text_parts.push(ChatContentPart::Text { text: text.clone() });
                }
                UnifiedContent::Thinking { text, signature } => {
                    if block.is_signature_only() {
                        let sig = signature.clone().unwrap_or_default();
                        // Signature-only blocks decorate the preceding
                        // thinking block if it has none yet.
                        if let Some(last) = thinking_blocks
                            .iter_mut()
                            .rev()
                            .find(|b| b.get("signature").is_none())
                        {
                            last["signature"] = json!(sig);
                        }
                        thought_signatures.push(sig);
                    } else {
                        match reasoning_content {
                            Some(ref mut existing) => existing.push_str(text),
                            None => reasoning_content = Some(text.clone()),
                        }
                        let mut tb = json!({"type": "thinking", "thinking": text});
                        if let Some(sig) = signature {
                            tb["signature"] = json!(sig);
                            thought_signatures.push(sig.clone());
                        }
                        thinking_blocks.push(tb);
                    }
                }
                UnifiedContent::ToolUse { .. } => {} // covered by tool_calls
                other => {
                    tracing::debug!(
                        content_type = other.content_type(),
                        "dropping content block with no OpenAI response representation"
                    );
                }
            }
        }

        let content = match text_parts.len() {
            0 => None,
            1 => match &text_parts[0] {
                ChatContentPart::Text { text } => Some(ChatContent::Text(text.clone())),
                _ => Some(ChatContent::Parts(text_parts)),
            },
            _ => Some(ChatContent::Parts(text_parts)),
        };

        // Last signature rides on every tool call, both in the id and in
        // the per-call provider fields.
        let last_signature = thought_signatures.last().cloned();
        let tool_calls: Option<Vec<ChatToolCall>> = if unified.tool_calls.is_empty() {
            None
        } else {
            Some(
                unified
                    .tool_calls
                    .iter()
                    .map(|tc| {
                        let (id, psf) = match last_signature {
                            Some(ref sig) => (
                                format!("{}{}{}", tc.id, THOUGHT_SIGNATURE_SEPARATOR, sig),
                                Some(json!({"thought_signature": sig})),
                            ),
                            None => (tc.id.clone(), None),
                        };
                        ChatToolCall {
                            id,
                            call_type: "function".to_string(),
                            function: ChatFunctionCall {
                                name: tc.name.clone(),
                                arguments: serde_json::to_string(&tc.arguments)
                                    .unwrap_or_default(),
                            },
                            provider_specific_fields: psf,
                        }
                    })
                    .collect(),
            )
        };

        let message = ChatMessage {
            role: "assistant".to_string(),
            content,
            reasoning_content,
            thinking_blocks: (!thinking_blocks.is_empty()).then_some(thinking_blocks),
            provider_specific_fields: (!thought_signatures.is_empty())
                .then(|| json!({"thought_signatures": thought_signatures})),
            tool_calls,
            ..Default::default()
        };

        Ok(json!({
            "id": unified.id,
            "object": "chat.completion",
            "created": chrono::Utc::now().timestamp(),
            "model": unified.model,
            "choices": [{
                "index": 0,
                "message": message,
                "finish_reason": unified.stop_reason.map(Self::stop_reason_to_finish_reason),
            }],
            "usage": {
                "prompt_tokens": unified.usage.input_tokens,
                "completion_tokens": unified.usage.output_tokens,
                "total_tokens": unified.usage.total_tokens(),
            },
        }))
    }

    fn transform_stream_chunk_in(
        &self,
        _decoder: &mut StreamDecoder,
        chunk: &Bytes,
    ) -> Result<Vec<UnifiedStreamChunk>> {
        let chunk_str = std::str::from_utf8(chunk)
            .map_err(|e| ProxyError::Decode(format!("invalid UTF-8 in frame: {}", e)))?;

        let mut chunks = vec![];

        for line in chunk_str.lines() {
            let line = line.trim();
            let Some(data) = line.strip_prefix("data: ") else {
                continue;
            };
            if data == "[DONE]" {
                chunks.push(UnifiedStreamChunk::message_stop());
                continue;
            }

            let frame: ChatStreamChunk =
                serde_json::from_str(data).map_err(|e| ProxyError::Decode(e.to_string()))?;

            let mut emitted_message_delta = false;
            for choice in &frame.choices {
                // Text rides at the reserved index 0.
                if let Some(ref text) = choice.delta.content {
                    chunks.push(UnifiedStreamChunk::content_block_delta(
                        0,
                        UnifiedContent::text(text),
                    ));
                }
                if let Some(ref reasoning) = choice.delta.reasoning_content {
                    chunks.push(UnifiedStreamChunk::content_block_delta(
                        0,
                        UnifiedContent::thinking(reasoning, None),
                    ));
                }
                for block in choice.delta.thinking_blocks.iter().flatten() {
                    if block.get("type").and_then(Value::as_str) != Some("thinking") {
                        continue;
                    }
                    if let Some(text) = block.get("thinking").and_then(Value::as_str) {
                        if !text.is_empty() {
                            chunks.push(UnifiedStreamChunk::content_block_delta(
                                0,
                                UnifiedContent::thinking(text, None),
                            ));
                        }
                    }
                    if let Some(sig) = block.get("signature").and_then(Value::as_str) {
                        chunks.push(UnifiedStreamChunk::content_block_delta(
                            0,
                            UnifiedContent::thinking("", Some(sig.to_string())),
                        ));
                    }
                }
                if let Some(sigs) = choice
                    .delta
                    .provider_specific_fields
                    .as_ref()
                    .and_then(|psf| psf.get("thought_signatures"))
                    .and_then(Value::as_array)
                {
                    for sig in sigs.iter().filter_map(Value::as_str) {
                        chunks.push(UnifiedStreamChunk::content_block_delta(
                            0,
                            UnifiedContent::thinking("", Some(sig.to_string())),
                        ));
                    }
                }

                // Tool calls shift up by one: index 0 belongs to text.
                // Negative indices from lax providers clamp to block 1.
                for tc in choice.delta.tool_calls.iter().flatten() {
                    let block_index = if tc.index < 0 {
                        1
                    } else {
                        (tc.index as usize).saturating_add(1)
                    };

                    if let Some(ref id) = tc.id {
                        let name = tc
                            .function
                            .as_ref()
                            .and_then(|f| f.name.clone())
                            .unwrap_or_default();
                        chunks.push(UnifiedStreamChunk::content_block_start(
                            block_index,
                            UnifiedContent::tool_use(id.clone(), name, json!({})),
                        ));
                    }
                    if let Some(args) = tc.function.as_ref().and_then(|f| f.arguments.as_deref()) {
                        if !args.is_empty() {
                            chunks.push(UnifiedStreamChunk::content_block_delta(
                                block_index,
                                UnifiedContent::tool_input_delta(block_index, args),
                            ));
                        }
                    }
                }

                if let Some(ref reason) = choice.finish_reason {
                    let usage = frame
                        .usage
                        .as_ref()
                        .map(|u| UnifiedUsage::new(u.prompt_tokens, u.completion_tokens))
                        .unwrap_or_default();
                    chunks.push(UnifiedStreamChunk::message_delta(
                        Self::finish_reason_to_stop_reason(reason),
                        usage,
                    ));
                    emitted_message_delta = true;
                }
            }

            // stream_options-style trailing usage chunk: no choices, usage
            // only. Surface it so accounting is not lost.
            if !emitted_message_delta {
                if let Some(ref usage) = frame.usage {
                    chunks.push(UnifiedStreamChunk::message_delta(
                        StopReason::EndTurn,
                        UnifiedUsage::new(usage.prompt_tokens, usage.completion_tokens),
                    ));
                }
            }
        }

        Ok(chunks)
    }

    fn transform_stream_chunk_out(
        &self,
        _encoder: &mut StreamEncoder,
        chunk: &UnifiedStreamChunk,
        _client_protocol: Protocol,
    ) -> Result<String> {
        match chunk.chunk_type {
            ChunkType::ContentBlockStart => {
                if let Some(UnifiedContent::ToolUse { id, name, .. }) = chunk.content_block.as_ref()
                {
                    let body = Self::stream_chunk_envelope(json!([{
                        "index": 0,
                        "delta": {
                            "tool_calls": [{
                                "index": chunk.index.saturating_sub(1),
                                "id": id,
                                "type": "function",
                                "function": {"name": name, "arguments": ""},
                            }]
                        },
                        "finish_reason": null,
                    }]));
                    return Ok(Self::stream_frame(body));
                }
                Ok(String::new())
            }
            ChunkType::ContentBlockDelta => {
                let Some(ref delta) = chunk.delta else {
                    return Ok(String::new());
                };
                let body = match delta {
                    UnifiedContent::Text { text } => Self::stream_chunk_envelope(json!([{
                        "index": 0,
                        "delta": {"content": text},
                        "finish_reason": null,
                    }])),
                    UnifiedContent::Thinking { text, signature } => {
                        if delta.is_signature_only() {
                            Self::stream_chunk_envelope(json!([{
                                "index": 0,
                                "delta": {
                                    "provider_specific_fields": {
                                        "thought_signatures": [signature.clone().unwrap_or_default()]
                                    }
                                },
                                "finish_reason": null,
                            }]))
                        } else {
                            Self::stream_chunk_envelope(json!([{
                                "index": 0,
                                "delta": {"reasoning_content": text},
                                "finish_reason": null,
                            }]))
                        }
                    }
                    UnifiedContent::ToolInputDelta { partial_json, .. } => {
                        Self::stream_chunk_envelope(json!([{
                            "index": 0,
                            "delta": {
                                "tool_calls": [{
                                    "index": chunk.index.saturating_sub(1),
                                    "function": {"arguments": partial_json},
                                }]
                            },
                            "finish_reason": null,
                        }]))
                    }
                    _ => return Ok(String::new()),
                };
                Ok(Self::stream_frame(body))
            }
            ChunkType::MessageDelta => {
                let mut body = Self::stream_chunk_envelope(json!([{
                    "index": 0,
                    "delta": {},
                    "finish_reason": chunk.stop_reason.map(Self::stop_reason_to_finish_reason),
                }]));
                if let Some(ref usage) = chunk.usage {
                    body["usage"] = json!({
                        "prompt_tokens": usage.input_tokens,
                        "completion_tokens": usage.output_tokens,
                        "total_tokens": usage.total_tokens(),
                    });
                }
                Ok(Self::stream_frame(body))
            }
            ChunkType::MessageStop => Ok("data: [DONE]\n\n".to_string()),
            _ => Ok(String::new()),
        }
    }

    fn can_handle(&self, raw: &Value) -> bool {
        // Plain messages array with no Anthropic-flavored typed blocks and
        // no top-level system.
        let has_anthropic_blocks = raw
            .get("messages")
            .and_then(Value::as_array)
            .is_some_and(|msgs| {
                msgs.iter().any(|msg| {
                    msg.get("content")
                        .and_then(Value::as_array)
                        .is_some_and(|blocks| {
                            blocks.iter().any(|block| {
                                matches!(
                                    block.get("type").and_then(Value::as_str),
                                    Some("tool_use") | Some("tool_result")
                                )
                            })
                        })
                })
            });
        raw.get("messages").is_some() && raw.get("system").is_none() && !has_anthropic_blocks
    }
}

// ============================================================================
// Tests
// ============================================================================
