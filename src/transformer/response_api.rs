//! OpenAI Response API transformer.
//!
//! Requests use `input` items and `instructions`; responses are a list of
//! typed `output` items. Builtin tool kinds (computer use, web search, file
//! search) round-trip through UIF as distinct tool types so a Response-API
//! client gets them back intact.

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

// ============================================================================
// Wire types
// ============================================================================

/// `input`: bare string or typed items.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(untagged)]
pub enum ResponseInput {
    Text(String),
    Items(Vec<ResponseInputItem>),
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum ResponseInputItem {
    Message {
        role: String,
        content: ResponseContent,
    },
    /// Reference to a stored item; nothing to translate.
    ItemReference { id: String },
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(untagged)]
pub enum ResponseContent {
    Text(String),
    Parts(Vec<ResponseContentPart>),
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum ResponseContentPart {
    InputText { text: String },
    OutputText { text: String },
    InputImage { image_url: String },
    InputFile { file_id: String },
    ToolUse { id: String, name: String, arguments: String },
    ToolResult { tool_use_id: String, output: String },
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum ResponseTool {
    Function {
        name: String,
        #[serde(skip_serializing_if = "Option::is_none")]
        description: Option<String>,
        parameters: Value,
    },
    ComputerUsePreview {
        #[serde(skip_serializing_if = "Option::is_none")]
        display_width: Option<i32>,
        #[serde(skip_serializing_if = "Option::is_none")]
        display_height: Option<i32>,
    },
    WebSearchPreview {},
    FileSearch {
        #[serde(skip_serializing_if = "Option::is_none")]
        vector_store_ids: Option<Vec<String>>,
    },
}

#[derive(Debug, Clone, Deserialize)]
pub struct ResponseApiRequest {
    pub model: String,
    pub input: Option<ResponseInput>,
    pub instructions: Option<String>,
    pub max_output_tokens: Option<i32>,
    pub temperature: Option<f64>,
    pub top_p: Option<f64>,
    pub tools: Option<Vec<ResponseTool>>,
    pub tool_choice: Option<Value>,
    #[serde(default)]
    pub stream: bool,
    #[serde(flatten)]
    pub extra: HashMap<String, Value>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum ResponseOutputItem {
    Message {
        id: String,
        role: String,
        content: Vec<ResponseOutputContent>,
        status: String,
    },
    FunctionCall {
        id: String,
        call_id: String,
        name: String,
        arguments: String,
        status: String,
    },
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum ResponseOutputContent {
    OutputText { text: String },
    Refusal { refusal: String },
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct ResponseUsage {
    pub input_tokens: i32,
    pub output_tokens: i32,
    pub total_tokens: i32,
}

#[derive(Debug, Clone, Deserialize)]
pub struct ResponseApiResponse {
    pub id: String,
    pub output: Vec<ResponseOutputItem>,
    pub status: String,
    #[serde(default)]
    pub usage: ResponseUsage,
}

// ============================================================================
// Transformer
// ============================================================================

pub struct ResponseApiTransformer;

impl ResponseApiTransformer {
    pub fn new() -> Self {
        ResponseApiTransformer
    }

    fn status_to_stop_reason(status: &str) -> StopReason {
        match status {
            "incomplete" => StopReason::MaxTokens,
            "failed" => StopReason::ContentFilter,
            _ => StopReason::EndTurn,
        }
    }

    fn stop_reason_to_status(reason: StopReason) -> &'static str {
        match reason {
            StopReason::MaxTokens | StopReason::Length => "incomplete",
            StopReason::ContentFilter => "failed",
            _ => "completed",
        }
    }

    fn input_to_messages(input: &Option<ResponseInput>) -> Vec<UnifiedMessage> {
        match input {
            None => vec![],
            Some(ResponseInput::Text(text)) => vec![UnifiedMessage::user(text)],
            Some(ResponseInput::Items(items)) => items
                .iter()
                .filter_map(|item| match item {
                    ResponseInputItem::Message { role, content } => {
                        Some(UnifiedMessage::with_content(
                            role.parse().unwrap_or(Role::User),
                            Self::content_to_unified(content),
                        ))
                    }
                    ResponseInputItem::ItemReference { .. } => None,
                })
                .collect(),
        }
    }

    fn content_to_unified(content: &ResponseContent) -> Vec<UnifiedContent> {
        match content {
            ResponseContent::Text(text) => vec![UnifiedContent::text(text)],
            ResponseContent::Parts(parts) => parts
                .iter()
                .map(|part| match part {
                    ResponseContentPart::InputText { text }
                    | ResponseContentPart::OutputText { text } => UnifiedContent::text(text),
                    ResponseContentPart::InputImage { image_url } => {
                        UnifiedContent::image_url(image_url)
                    }
                    ResponseContentPart::InputFile { file_id } => UnifiedContent::File {
                        file_id: file_id.clone(),
                        filename: None,
                    },
                    ResponseContentPart::ToolUse {
                        id,
                        name,
                        arguments,
                    } => UnifiedContent::tool_use(
                        id,
                        name,
                        serde_json::from_str(arguments).unwrap_or(json!({})),
                    ),
                    ResponseContentPart::ToolResult {
                        tool_use_id,
                        output,
                    } => UnifiedContent::tool_result(tool_use_id, json!(output), false),
                })
                .collect(),
        }
    }

    fn unified_to_content(content: &[UnifiedContent]) -> ResponseContent {
        if let [only] = content {
            if let Some(text) = only.as_text() {
                return ResponseContent::Text(text.to_string());
            }
        }
        let parts: Vec<ResponseContentPart> = content
            .iter()
            .filter_map(|c| match c {
                UnifiedContent::Text { text } => {
                    Some(ResponseContentPart::InputText { text: text.clone() })
                }
                UnifiedContent::Image { data, .. } => Some(ResponseContentPart::InputImage {
                    image_url: data.clone(),
                }),
                UnifiedContent::File { file_id, .. } => Some(ResponseContentPart::InputFile {
                    file_id: file_id.clone(),
                }),
                UnifiedContent::ToolUse { id, name, input } => Some(ResponseContentPart::ToolUse {
                    id: id.clone(),
                    name: name.clone(),
                    arguments: serde_json::to_string(input).unwrap_or_default(),
                }),
                UnifiedContent::ToolResult {
                    tool_use_id,
                    content,
                    ..
                } => Some(ResponseContentPart::ToolResult {
                    tool_use_id: tool_use_id.clone(),
                    output: match content {
                        Value::String(s) => s.clone(),
                        other => serde_json::to_string(other).unwrap_or_default(),
                    },
                }),
                _ => None,
            })
            .collect();
        ResponseContent::Parts(parts)
    }

    fn tool_to_unified(tool: &ResponseTool) -> UnifiedTool {
        match tool {
            ResponseTool::Function {
                name,
                description,
                parameters,
            } => UnifiedTool {
                name: name.clone(),
                description: description.clone(),
                input_schema: parameters.clone(),
                tool_type: ToolType::Function,
            },
            ResponseTool::ComputerUsePreview { .. } => UnifiedTool {
                name: "computer_use".to_string(),
                description: Some("Computer use capability".to_string()),
                input_schema: json!({}),
                tool_type: ToolType::ComputerUsePreview,
            },
            ResponseTool::WebSearchPreview {} => UnifiedTool {
                name: "web_search".to_string(),
                description: Some("Web search capability".to_string()),
                input_schema: json!({}),
                tool_type: ToolType::WebSearchPreview,
            },
            ResponseTool::FileSearch { .. } => UnifiedTool {
                name: "file_search".to_string(),
                description: Some("File search capability".to_string()),
                input_schema: json!({}),
                tool_type: ToolType::FileSearch,
            },
        }
    }

    fn unified_to_tool(tool: &UnifiedTool) -> ResponseTool {
        match tool.tool_type {
            ToolType::ComputerUsePreview => ResponseTool::ComputerUsePreview {
                display_width: None,
                display_height: None,
            },
            ToolType::WebSearchPreview => ResponseTool::WebSearchPreview {},
            ToolType::FileSearch => ResponseTool::FileSearch {
                vector_store_ids: None,
            },
            ToolType::Function => ResponseTool::Function {
                name: tool.name.clone(),
                description: tool.description.clone(),
                parameters: tool.input_schema.clone(),
            },
        }
    }

    fn output_to_unified(
        output: &[ResponseOutputItem],
    ) -> (Vec<UnifiedContent>, Vec<UnifiedToolCall>) {
        let mut content = vec![];
        let mut tool_calls = vec![];

        for item in output {
            match item {
                ResponseOutputItem::Message {
                    content: parts, ..
                } => {
                    for part in parts {
                        match part {
                            ResponseOutputContent::OutputText { text } => {
                                content.push(UnifiedContent::text(text));
                            }
                            ResponseOutputContent::Refusal { refusal } => {
                                content.push(UnifiedContent::Refusal {
                                    reason: refusal.clone(),
                                });
                            }
                        }
                    }
                }
                ResponseOutputItem::FunctionCall {
                    call_id,
                    name,
                    arguments,
                    ..
                } => {
                    let args: Value = serde_json::from_str(arguments).unwrap_or(json!({}));
                    content.push(UnifiedContent::tool_use(call_id, name, args.clone()));
                    tool_calls.push(UnifiedToolCall {
                        id: call_id.clone(),
                        name: name.clone(),
                        arguments: args,
                    });
                }
            }
        }
        (content, tool_calls)
    }

    fn parse_stream_event(event: &Value) -> Vec<UnifiedStreamChunk> {
        let mut chunks = vec![];
        let Some(event_type) = event.get("type").and_then(Value::as_str) else {
            return chunks;
        };

        match event_type {
            "response.created" | "response.in_progress" => {
                let response = event.get("response").cloned().unwrap_or(json!({}));
                chunks.push(UnifiedStreamChunk::message_start(UnifiedResponse {
                    id: response
                        .get("id")
                        .and_then(Value::as_str)
                        .unwrap_or("resp_stream")
                        .to_string(),
                    model: response
                        .get("model")
                        .and_then(Value::as_str)
                        .unwrap_or("")
                        .to_string(),
                    content: vec![],
                    stop_reason: None,
                    usage: UnifiedUsage::default(),
                    tool_calls: vec![],
                }));
            }
            "response.output_item.added" => {
                let index = event
                    .get("output_index")
                    .and_then(Value::as_u64)
                    .unwrap_or(0) as usize;
                let item = event.get("item").cloned().unwrap_or(json!({}));
                match item.get("type").and_then(Value::as_str) {
                    Some("message") => {
                        chunks.push(UnifiedStreamChunk::content_block_start(
                            index,
                            UnifiedContent::text(""),
                        ));
                    }
                    Some("function_call") => {
                        chunks.push(UnifiedStreamChunk::content_block_start(
                            index,
                            UnifiedContent::tool_use(
                                item.get("call_id").and_then(Value::as_str).unwrap_or(""),
                                item.get("name").and_then(Value::as_str).unwrap_or(""),
                                json!({}),
                            ),
                        ));
                    }
                    _ => {}
                }
            }
            "response.content_part.added" => {
                let index = event
                    .get("output_index")
                    .and_then(Value::as_u64)
                    .unwrap_or(0) as usize;
                if event
                    .get("part")
                    .and_then(|p| p.get("type"))
                    .and_then(Value::as_str)
                    == Some("output_text")
                {
                    chunks.push(UnifiedStreamChunk::content_block_start(
                        index,
                        UnifiedContent::text(""),
                    ));
                }
            }
            "response.output_text.delta" => {
                let index = event
                    .get("output_index")
                    .and_then(Value::as_u64)
                    .unwrap_or(0) as usize;
                if let Some(delta) = event.get("delta").and_then(Value::as_str) {
                    chunks.push(UnifiedStreamChunk::content_block_delta(
                        index,
                        UnifiedContent::text(delta),
                    ));
                }
            }
            "response.function_call_arguments.delta" => {
                let index = event
                    .get("output_index")
                    .and_then(Value::as_u64)
                    .unwrap_or(0) as usize;
                if let Some(delta) = event.get("delta").and_then(Value::as_str) {
                    chunks.push(UnifiedStreamChunk::content_block_delta(
                        index,
                        UnifiedContent::tool_input_delta(index, delta),
                    ));
                }
            }
            "response.output_item.done" => {
                let index = event
                    .get("output_index")
                    .and_then(Value::as_u64)
                    .unwrap_or(0) as usize;
                chunks.push(UnifiedStreamChunk::content_block_stop(index));
            }
            "response.completed" => {
                let usage = event
                    .get("response")
                    .and_then(|r| r.get("usage"))
                    .map(|u| {
                        UnifiedUsage::new(
                            u.get("input_tokens").and_then(Value::as_i64).unwrap_or(0) as i32,
                            u.get("output_tokens").and_then(Value::as_i64).unwrap_or(0) as i32,
                        )
                    })
                    .unwrap_or_default();
                chunks.push(UnifiedStreamChunk::message_delta(StopReason::EndTurn, usage));
                chunks.push(UnifiedStreamChunk::message_stop());
            }
            "response.done" => {
                chunks.push(UnifiedStreamChunk::message_stop());
            }
            _ => {}
        }

        chunks
    }
}

impl Default for ResponseApiTransformer {
    fn default() -> Self {
        Self::new()
    }
}

impl Transformer for ResponseApiTransformer {
    fn protocol(&self) -> Protocol {
        Protocol::ResponseApi
    }

    fn endpoint(&self) -> &'static str {
        "/v1/responses"
    }

    fn transform_request_out(&self, raw: Value) -> Result<UnifiedRequest> {
        let request: ResponseApiRequest =
            serde_json::from_value(raw).map_err(|e| ProxyError::InvalidRequest(e.to_string()))?;

        let messages = Self::input_to_messages(&request.input);
        let tools: Vec<UnifiedTool> = request
            .tools
            .iter()
            .flatten()
            .map(Self::tool_to_unified)
            .collect();

        Ok(UnifiedRequest {
            model: request.model,
            messages,
            system: request.instructions,
            parameters: UnifiedParameters {
                temperature: request.temperature,
                max_tokens: request.max_output_tokens,
                top_p: request.top_p,
                top_k: None,
                stop_sequences: None,
                stream: request.stream,
                extra: request.extra,
            },
            tools,
            tool_choice: request.tool_choice,
            request_id: uuid::Uuid::new_v4().to_string(),
            client_protocol: Protocol::ResponseApi,
            metadata: HashMap::new(),
        })
    }

    fn transform_request_in(&self, unified: &UnifiedRequest) -> Result<Value> {
        let mut request = json!({"model": unified.model});

        if !unified.messages.is_empty() {
            let items: Vec<ResponseInputItem> = unified
                .messages
                .iter()
                .map(|msg| ResponseInputItem::Message {
                    role: msg.role.to_string(),
                    content: Self::unified_to_content(&msg.content),
                })
                .collect();
            request["input"] = json!(ResponseInput::Items(items));
        }
        if let Some(ref system) = unified.system {
            request["instructions"] = json!(system);
        }
        if let Some(max_tokens) = unified.parameters.max_tokens {
            request["max_output_tokens"] = json!(max_tokens);
        }
        if let Some(temperature) = unified.parameters.temperature {
            request["temperature"] = json!(temperature);
        }
        if let Some(top_p) = unified.parameters.top_p {
            request["top_p"] = json!(top_p);
        }
        if !unified.tools.is_empty() {
            let tools: Vec<ResponseTool> =
                unified.tools.iter().map(Self::unified_to_tool).collect();
            request["tools"] = json!(tools);
        }
        if let Some(ref tool_choice) = unified.tool_choice {
            request["tool_choice"] = tool_choice.clone();
        }
        if unified.parameters.stream {
            request["stream"] = json!(true);
        }
        for (key, value) in &unified.parameters.extra {
            request[key] = value.clone();
        }

        Ok(request)
    }

    fn transform_response_in(&self, raw: Value, original_model: &str) -> Result<UnifiedResponse> {
        let response: ResponseApiResponse =
            serde_json::from_value(raw).map_err(|e| ProxyError::Decode(e.to_string()))?;

        let (content, tool_calls) = Self::output_to_unified(&response.output);

        Ok(UnifiedResponse {
            id: response.id,
            model: original_model.to_string(),
            content,
            stop_reason: Some(Self::status_to_stop_reason(&response.status)),
            usage: UnifiedUsage::new(response.usage.input_tokens, response.usage.output_tokens),
            tool_calls,
        })
    }

    fn transform_response_out(
        &self,
        unified: &UnifiedResponse,
        _client_protocol: Protocol,
    ) -> Result<Value> {
        let mut output: Vec<ResponseOutputItem> = vec![];

        let message_content: Vec<ResponseOutputContent> = unified
            .content
            .iter()
            .filter_map(|c| match c {
                UnifiedContent::Text { text } => {
                    Some(ResponseOutputContent::OutputText { text: text.clone() })
                }
                UnifiedContent::Refusal { reason } => Some(ResponseOutputContent::Refusal {
                    refusal: reason.clone(),
                }),
                _ => None,
            })
            .collect();
        if !message_content.is_empty() {
            output.push(ResponseOutputItem::Message {
                id: format!("msg_{}", uuid::Uuid::new_v4().simple()),
                role: "assistant".to_string(),
                content: message_content,
                status: "completed".to_string(),
            });
        }

        for tc in &unified.tool_calls {
            output.push(ResponseOutputItem::FunctionCall {
                id: format!("fc_{}", uuid::Uuid::new_v4().simple()),
                call_id: tc.id.clone(),
                name: tc.name.clone(),
                arguments: serde_json::to_string(&tc.arguments).unwrap_or_default(),
                status: "completed".to_string(),
            });
        }

        let status = unified
            .stop_reason
            .map(Self::stop_reason_to_status)
            .unwrap_or("completed");

        Ok(json!({
            "id": unified.id,
            "object": "response",
            "created_at": chrono::Utc::now().timestamp(),
            "model": unified.model,
            "output": output,
            "status": status,
            "usage": ResponseUsage {
                input_tokens: unified.usage.input_tokens,
                output_tokens: unified.usage.output_tokens,
                total_tokens: unified.usage.total_tokens(),
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
            let event: Value =
                serde_json::from_str(data).map_err(|e| ProxyError::Decode(e.to_string()))?;
            chunks.extend(Self::parse_stream_event(&event));
        }
        Ok(chunks)
    }

    fn transform_stream_chunk_out(
        &self,
        _encoder: &mut StreamEncoder,
        chunk: &UnifiedStreamChunk,
        _client_protocol: Protocol,
    ) -> Result<String> {
        let event = match chunk.chunk_type {
            ChunkType::MessageStart => {
                let Some(ref message) = chunk.message else {
                    return Ok(String::new());
                };
                json!({
                    "type": "response.created",
                    "response": {
                        "id": message.id,
                        "object": "response",
                        "model": message.model,
                        "status": "in_progress",
                    }
                })
            }
            ChunkType::ContentBlockStart => match chunk.content_block {
                Some(UnifiedContent::Text { .. }) => json!({
                    "type": "response.output_item.added",
                    "output_index": chunk.index,
                    "item": {
                        "type": "message",
                        "id": format!("item_{}", chunk.index),
                        "role": "assistant",
                        "content": [],
                        "status": "in_progress",
                    }
                }),
                Some(UnifiedContent::ToolUse { ref id, ref name, .. }) => json!({
                    "type": "response.output_item.added",
                    "output_index": chunk.index,
                    "item": {
                        "type": "function_call",
                        "id": format!("fc_{}", chunk.index),
                        "call_id": id,
                        "name": name,
                        "arguments": "",
                        "status": "in_progress",
                    }
                }),
                _ => return Ok(String::new()),
            },
            ChunkType::ContentBlockDelta => match chunk.delta {
                Some(UnifiedContent::Text { ref text }) => json!({
                    "type": "response.output_text.delta",
                    "item_id": format!("item_{}", chunk.index),
                    "output_index": chunk.index,
                    "delta": text,
                }),
                Some(UnifiedContent::ToolInputDelta { ref partial_json, .. }) => json!({
                    "type": "response.function_call_arguments.delta",
                    "item_id": format!("fc_{}", chunk.index),
                    "output_index": chunk.index,
                    "delta": partial_json,
                }),
                _ => return Ok(String::new()),
            },
            ChunkType::ContentBlockStop => json!({
                "type": "response.output_item.done",
                "output_index": chunk.index,
            }),
            ChunkType::MessageDelta => json!({
                "type": "response.completed",
                "response": {
                    "status": "completed",
                    "usage": chunk.usage.as_ref().map(|u| json!({
                        "input_tokens": u.input_tokens,
                        "output_tokens": u.output_tokens,
                        "total_tokens": u.total_tokens(),
                    })),
                }
            }),
            ChunkType::MessageStop => return Ok("data: [DONE]\n\n".to_string()),
            ChunkType::Ping => return Ok(String::new()),
        };

        Ok(format!("data: {}\n\n", event))
    }

    fn can_handle(&self, raw: &Value) -> bool {
        raw.get("input").is_some()
            || (raw.get("instructions").is_some() && raw.get("messages").is_none())
            || (raw.get("max_output_tokens").is_some() && raw.get("max_tokens").is_none())
    }
}

// ============================================================================
// Tests
// ============================================================================
