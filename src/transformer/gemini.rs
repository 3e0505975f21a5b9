//! Google Gemini transformer.
//!
//! The least grammar-rich of the four wires: no message-start event, no
//! per-block framing, roles limited to user/model, and tool results keyed
//! by function name instead of call id. The decode side synthesizes the
//! missing grammar; the encode side re-attaches `thoughtSignature` to the
//! part it signs, which requires one part of lookahead (held in the
//! session's [`StreamEncoder`]).

use super::{
    ChunkType, Protocol, Role, StopReason, StreamDecoder, StreamEncoder, Transformer,
    UnifiedContent, UnifiedMessage, UnifiedParameters, UnifiedRequest, UnifiedResponse,
    UnifiedStreamChunk, UnifiedTool, UnifiedToolCall, UnifiedUsage,
};
use crate::core::error::{ProxyError, Result};
use crate::transformer::unified::ToolType;
use bytes::Bytes;
use serde_json::{json, Value};

pub struct GeminiTransformer;

impl GeminiTransformer {
    pub fn new() -> Self {
        GeminiTransformer
    }

    fn fresh_call_id() -> String {
        format!("call_{}", uuid::Uuid::new_v4().simple())
    }

    // -- Parts ↔ UIF --

    /// One Gemini part can yield up to two UIF blocks: the content itself
    /// plus a signature-only Thinking block when `thoughtSignature` rides
    /// on it.
    fn part_to_unified(part: &Value) -> Vec<UnifiedContent> {
        let signature_block = part
            .get("thoughtSignature")
            .and_then(Value::as_str)
            .map(|sig| UnifiedContent::thinking("", Some(sig.to_string())));

        if let Some(text) = part.get("text").and_then(Value::as_str) {
            if part.get("thought").and_then(Value::as_bool).unwrap_or(false) {
                // Thought parts carry no signatures on this wire.
                return vec![UnifiedContent::thinking(text, None)];
            }
            let mut out = vec![UnifiedContent::text(text)];
            out.extend(signature_block);
            return out;
        }
        if let Some(fc) = part.get("functionCall") {
            let name = fc.get("name").and_then(Value::as_str).unwrap_or("");
            let args = fc.get("args").cloned().unwrap_or(json!({}));
            let mut out = vec![UnifiedContent::tool_use(Self::fresh_call_id(), name, args)];
            out.extend(signature_block);
            return out;
        }
        if let Some(fr) = part.get("functionResponse") {
            let name = fr.get("name").and_then(Value::as_str).unwrap_or("");
            let response = fr.get("response").cloned().unwrap_or(Value::Null);
            return vec![UnifiedContent::tool_result(name, response, false)];
        }
        if let Some(inline) = part.get("inlineData") {
            let mime = inline.get("mimeType").and_then(Value::as_str).unwrap_or("");
            let data = inline.get("data").and_then(Value::as_str).unwrap_or("");
            let mut out = vec![UnifiedContent::image_base64(mime, data)];
            out.extend(signature_block);
            return out;
        }
        vec![]
    }

    fn unified_to_part(content: &UnifiedContent) -> Option<Value> {
        match content {
            UnifiedContent::Text { text } => Some(json!({"text": text})),
            UnifiedContent::Thinking { text, .. } if !content.is_signature_only() => {
                Some(json!({"thought": true, "text": text}))
            }
            UnifiedContent::ToolUse { name, input, .. } => {
                Some(json!({"functionCall": {"name": name, "args": input}}))
            }
            UnifiedContent::Image {
                media_type, data, ..
            } => Some(json!({"inlineData": {"mimeType": media_type, "data": data}})),
            _ => None,
        }
    }

    /// Lower a UIF block sequence to parts, folding each signature-only
    /// Thinking block into the part before it.
    fn contents_to_parts(
        contents: &[UnifiedContent],
        resolve_tool_name: impl Fn(&str) -> Option<String>,
    ) -> Vec<Value> {
        let mut parts: Vec<Value> = Vec::new();
        for content in contents {
            match content {
                UnifiedContent::Thinking {
                    signature: Some(sig),
                    ..
                } if content.is_signature_only() => {
                    if let Some(last) = parts.last_mut() {
                        last["thoughtSignature"] = json!(sig);
                    }
                }
                UnifiedContent::ToolResult {
                    tool_use_id,
                    content: result,
                    ..
                } => {
                    // This wire keys results by function name; recover it
                    // from the originating tool_use where possible.
                    let name =
                        resolve_tool_name(tool_use_id).unwrap_or_else(|| tool_use_id.clone());
                    parts.push(json!({
                        "functionResponse": {"name": name, "response": result}
                    }));
                }
                other => {
                    if let Some(part) = Self::unified_to_part(other) {
                        parts.push(part);
                    }
                }
            }
        }
        parts
    }

    // -- Messages --

    fn content_entry_to_unified(entry: &Value) -> UnifiedMessage {
        let role = match entry.get("role").and_then(Value::as_str) {
            Some("model") => Role::Assistant,
            _ => Role::User,
        };

        let mut content = Vec::new();
        let mut tool_calls = Vec::new();
        let mut tool_call_id = None;

        for part in entry
            .get("parts")
            .and_then(Value::as_array)
            .into_iter()
            .flatten()
        {
            for block in Self::part_to_unified(part) {
                match &block {
                    UnifiedContent::ToolUse { id, name, input } => {
                        tool_calls.push(UnifiedToolCall {
                            id: id.clone(),
                            name: name.clone(),
                            arguments: input.clone(),
                        });
                    }
                    UnifiedContent::ToolResult { tool_use_id, .. } => {
                        tool_call_id = Some(tool_use_id.clone());
                    }
                    _ => {}
                }
                content.push(block);
            }
        }

        // A user entry that is nothing but function responses is a tool
        // turn.
        let role = if role == Role::User
            && tool_call_id.is_some()
            && content
                .iter()
                .all(|c| matches!(c, UnifiedContent::ToolResult { .. }))
        {
            Role::Tool
        } else {
            role
        };

        UnifiedMessage {
            role,
            content,
            name: None,
            tool_calls,
            tool_call_id,
        }
    }

    fn find_tool_name(tool_use_id: &str, messages: &[UnifiedMessage]) -> Option<String> {
        for msg in messages {
            for content in &msg.content {
                if let UnifiedContent::ToolUse { id, name, .. } = content {
                    if id == tool_use_id {
                        return Some(name.clone());
                    }
                }
            }
            if let Some(tc) = msg.tool_calls.iter().find(|tc| tc.id == tool_use_id) {
                return Some(tc.name.clone());
            }
        }
        None
    }

    fn message_to_parts(msg: &UnifiedMessage, all_messages: &[UnifiedMessage]) -> Vec<Value> {
        let mut parts =
            Self::contents_to_parts(&msg.content, |id| Self::find_tool_name(id, all_messages));

        // Tool-role messages from the OpenAI shape have no ToolResult
        // block, just text plus tool_call_id.
        if msg.role == Role::Tool && parts.iter().all(|p| p.get("functionResponse").is_none()) {
            if let Some(ref id) = msg.tool_call_id {
                let name = Self::find_tool_name(id, all_messages).unwrap_or_else(|| id.clone());
                let text = msg.text_content();
                return vec![json!({
                    "functionResponse": {"name": name, "response": {"result": text}}
                })];
            }
        }

        // Denormalized tool calls not present as content blocks.
        let existing: Vec<&str> = msg
            .content
            .iter()
            .filter_map(|c| match c {
                UnifiedContent::ToolUse { id, .. } => Some(id.as_str()),
                _ => None,
            })
            .collect();
        for tc in &msg.tool_calls {
            if !existing.contains(&tc.id.as_str()) {
                parts.push(json!({"functionCall": {"name": tc.name, "args": tc.arguments}}));
            }
        }

        parts
    }

    // -- Stop reasons / usage --

    fn finish_reason_to_unified(reason: &str) -> StopReason {
        match reason {
            "STOP" => StopReason::EndTurn,
            "MAX_TOKENS" => StopReason::MaxTokens,
            "SAFETY" | "RECITATION" | "BLOCKLIST" | "PROHIBITED_CONTENT" | "SPII" => {
                StopReason::ContentFilter
            }
            _ => StopReason::EndTurn,
        }
    }

    fn finish_reason_from_unified(reason: StopReason) -> &'static str {
        match reason {
            StopReason::MaxTokens | StopReason::Length => "MAX_TOKENS",
            StopReason::ContentFilter => "SAFETY",
            _ => "STOP",
        }
    }

    fn parse_usage(meta: &Value) -> UnifiedUsage {
        UnifiedUsage {
            input_tokens: meta
                .get("promptTokenCount")
                .and_then(Value::as_i64)
                .unwrap_or(0) as i32,
            output_tokens: meta
                .get("candidatesTokenCount")
                .and_then(Value::as_i64)
                .unwrap_or(0) as i32,
            cache_read_tokens: meta
                .get("cachedContentTokenCount")
                .and_then(Value::as_i64)
                .map(|v| v as i32),
            cache_write_tokens: None,
        }
    }

    /// Emit `part`, routing it through the pending-part buffer so a
    /// signature can still attach. Returns any frame that became final.
    fn encode_part(encoder: &mut StreamEncoder, part: Value) -> String {
        let flushed = encoder.flush();
        encoder.pending_part = Some(part);
        match flushed {
            Some(ready) => Self::part_frame(ready),
            None => String::new(),
        }
    }

    fn flush_encoder(encoder: &mut StreamEncoder) -> String {
        match encoder.flush() {
            Some(ready) => Self::part_frame(ready),
            None => String::new(),
        }
    }

    fn part_frame(part: Value) -> String {
        let body = json!({
            "candidates": [{"content": {"role": "model", "parts": [part]}}]
        });
        format!("data: {}\n\n", body)
    }
}

impl Default for GeminiTransformer {
    fn default() -> Self {
        Self::new()
    }
}

impl Transformer for GeminiTransformer {
    fn protocol(&self) -> Protocol {
        Protocol::Gemini
    }

    fn endpoint(&self) -> &'static str {
        "/v1/projects"
    }

    fn transform_request_out(&self, raw: Value) -> Result<UnifiedRequest> {
        let contents = raw
            .get("contents")
            .and_then(Value::as_array)
            .ok_or_else(|| ProxyError::InvalidRequest("missing 'contents' field".into()))?;

        let messages: Vec<UnifiedMessage> = contents
            .iter()
            .map(Self::content_entry_to_unified)
            .collect();

        let system = raw
            .get("systemInstruction")
            .and_then(|si| si.get("parts"))
            .and_then(Value::as_array)
            .map(|parts| {
                parts
                    .iter()
                    .filter_map(|p| p.get("text").and_then(Value::as_str))
                    .collect::<Vec<_>>()
                    .join("\n")
            });

        let gen_config = raw.get("generationConfig").cloned().unwrap_or(json!({}));
        let parameters = UnifiedParameters {
            temperature: gen_config.get("temperature").and_then(Value::as_f64),
            max_tokens: gen_config
                .get("maxOutputTokens")
                .and_then(Value::as_i64)
                .map(|v| v as i32),
            top_p: gen_config.get("topP").and_then(Value::as_f64),
            top_k: gen_config
                .get("topK")
                .and_then(Value::as_i64)
                .map(|v| v as i32),
            stop_sequences: gen_config.get("stopSequences").and_then(Value::as_array).map(
                |seq| {
                    seq.iter()
                        .filter_map(Value::as_str)
                        .map(String::from)
                        .collect()
                },
            ),
            stream: false,
            extra: Default::default(),
        };

        let tools: Vec<UnifiedTool> = raw
            .get("tools")
            .and_then(Value::as_array)
            .into_iter()
            .flatten()
            .flat_map(|group| {
                group
                    .get("functionDeclarations")
                    .and_then(Value::as_array)
                    .cloned()
                    .unwrap_or_default()
            })
            .map(|decl| UnifiedTool {
                name: decl
                    .get("name")
                    .and_then(Value::as_str)
                    .unwrap_or("")
                    .to_string(),
                description: decl
                    .get("description")
                    .and_then(Value::as_str)
                    .map(String::from),
                input_schema: decl.get("parameters").cloned().unwrap_or(json!({})),
                tool_type: ToolType::Function,
            })
            .collect();

        let tool_choice = raw
            .get("toolConfig")
            .and_then(|tc| tc.get("functionCallingConfig"))
            .and_then(|fcc| {
                let mode = fcc.get("mode").and_then(Value::as_str)?;
                match mode {
                    "AUTO" => Some(json!({"type": "auto"})),
                    "NONE" => Some(json!({"type": "none"})),
                    "ANY" => {
                        if let Some([name]) = fcc
                            .get("allowedFunctionNames")
                            .and_then(Value::as_array)
                            .map(Vec::as_slice)
                        {
                            Some(json!({"type": "tool", "name": name}))
                        } else {
                            Some(json!({"type": "any"}))
                        }
                    }
                    _ => None,
                }
            });

        // The model name rides in the URL, not the body; pass through
        // whatever the router put there.
        let model = raw
            .get("model")
            .and_then(Value::as_str)
            .unwrap_or("")
            .to_string();

        Ok(UnifiedRequest {
            model,
            messages,
            system,
            parameters,
            tools,
            tool_choice,
            request_id: uuid::Uuid::new_v4().to_string(),
            client_protocol: Protocol::Gemini,
            metadata: Default::default(),
        })
    }

    fn transform_request_in(&self, unified: &UnifiedRequest) -> Result<Value> {
        // Alternating user/model entries; consecutive same-role messages
        // merge their parts.
        let mut contents: Vec<Value> = Vec::new();
        let mut pending_role: Option<&str> = None;
        let mut pending_parts: Vec<Value> = Vec::new();

        for msg in &unified.messages {
            let role = match msg.role {
                Role::Assistant => "model",
                _ => "user",
            };
            let parts = Self::message_to_parts(msg, &unified.messages);

            if pending_role == Some(role) {
                pending_parts.extend(parts);
            } else {
                if let (Some(prev), false) = (pending_role, pending_parts.is_empty()) {
                    contents.push(json!({"role": prev, "parts": pending_parts}));
                }
                pending_role = Some(role);
                pending_parts = parts;
            }
        }
        if let (Some(role), false) = (pending_role, pending_parts.is_empty()) {
            contents.push(json!({"role": role, "parts": pending_parts}));
        }

        let mut request = json!({"contents": contents});

        if let Some(ref system) = unified.system {
            request["systemInstruction"] = json!({"parts": [{"text": system}]});
        }

        let mut gen_config = json!({});
        if let Some(temperature) = unified.parameters.temperature {
            gen_config["temperature"] = json!(temperature);
        }
        if let Some(max_tokens) = unified.parameters.max_tokens {
            gen_config["maxOutputTokens"] = json!(max_tokens);
        }
        if let Some(top_p) = unified.parameters.top_p {
            gen_config["topP"] = json!(top_p);
        }
        if let Some(top_k) = unified.parameters.top_k {
            gen_config["topK"] = json!(top_k);
        }
        if let Some(ref stop) = unified.parameters.stop_sequences {
            gen_config["stopSequences"] = json!(stop);
        }
        if gen_config.as_object().is_some_and(|o| !o.is_empty()) {
            request["generationConfig"] = gen_config;
        }

        if !unified.tools.is_empty() {
            let decls: Vec<Value> = unified
                .tools
                .iter()
                .map(|t| {
                    let mut decl = json!({
                        "name": t.name,
                        "parameters": t.input_schema,
                    });
                    if let Some(ref desc) = t.description {
                        decl["description"] = json!(desc);
                    }
                    decl
                })
                .collect();
            request["tools"] = json!([{"functionDeclarations": decls}]);
        }

        if let Some(ref tc) = unified.tool_choice {
            let mode = tc.get("type").and_then(Value::as_str).unwrap_or("auto");
            let gemini_mode = match mode {
                "none" => "NONE",
                "any" | "required" | "tool" => "ANY",
                _ => "AUTO",
            };
            let mut fcc = json!({"mode": gemini_mode});
            if mode == "tool" {
                if let Some(name) = tc.get("name").and_then(Value::as_str) {
                    fcc["allowedFunctionNames"] = json!([name]);
                }
            }
            request["toolConfig"] = json!({"functionCallingConfig": fcc});
        }

        Ok(request)
    }

    fn transform_response_in(&self, raw: Value, original_model: &str) -> Result<UnifiedResponse> {
        let candidate = raw
            .get("candidates")
            .and_then(Value::as_array)
            .and_then(|c| c.first())
            .ok_or_else(|| ProxyError::Decode("missing 'candidates' in response".into()))?;

        let mut content = Vec::new();
        let mut tool_calls = Vec::new();
        for part in candidate
            .get("content")
            .and_then(|c| c.get("parts"))
            .and_then(Value::as_array)
            .into_iter()
            .flatten()
        {
            for block in Self::part_to_unified(part) {
                if let UnifiedContent::ToolUse { id, name, input } = &block {
                    tool_calls.push(UnifiedToolCall {
                        id: id.clone(),
                        name: name.clone(),
                        arguments: input.clone(),
                    });
                }
                content.push(block);
            }
        }

        let stop_reason = candidate
            .get("finishReason")
            .and_then(Value::as_str)
            .map(Self::finish_reason_to_unified);
        let usage = raw
            .get("usageMetadata")
            .map(Self::parse_usage)
            .unwrap_or_default();
        let id = match raw.get("responseId").and_then(Value::as_str) {
            Some(id) if !id.is_empty() => id.to_string(),
            _ => uuid::Uuid::new_v4().to_string(),
        };

        Ok(UnifiedResponse {
            id,
            model: original_model.to_string(),
            content,
            stop_reason,
            usage,
            tool_calls,
        })
    }

    fn transform_response_out(
        &self,
        unified: &UnifiedResponse,
        _client_protocol: Protocol,
    ) -> Result<Value> {
        let mut parts = Self::contents_to_parts(&unified.content, |_| None);

        let existing: Vec<&str> = unified
            .content
            .iter()
            .filter_map(|c| match c {
                UnifiedContent::ToolUse { id, .. } => Some(id.as_str()),
                _ => None,
            })
            .collect();
        for tc in &unified.tool_calls {
            if !existing.contains(&tc.id.as_str()) {
                parts.push(json!({"functionCall": {"name": tc.name, "args": tc.arguments}}));
            }
        }

        let finish_reason = unified
            .stop_reason
            .map(Self::finish_reason_from_unified)
            .unwrap_or("STOP");

        Ok(json!({
            "candidates": [{
                "content": {"role": "model", "parts": parts},
                "finishReason": finish_reason,
            }],
            "usageMetadata": {
                "promptTokenCount": unified.usage.input_tokens,
                "candidatesTokenCount": unified.usage.output_tokens,
                "totalTokenCount": unified.usage.total_tokens(),
            },
            "modelVersion": unified.model,
        }))
    }

    fn transform_stream_chunk_in(
        &self,
        decoder: &mut StreamDecoder,
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
            let frame: Value =
                serde_json::from_str(data).map_err(|e| ProxyError::Decode(e.to_string()))?;

            // No message_start on this wire; synthesize one from the first
            // frame and open the reserved text block.
            if !decoder.first_chunk_seen {
                decoder.first_chunk_seen = true;
                chunks.push(UnifiedStreamChunk::message_start(UnifiedResponse {
                    id: frame
                        .get("responseId")
                        .and_then(Value::as_str)
                        .unwrap_or("")
                        .to_string(),
                    model: frame
                        .get("modelVersion")
                        .and_then(Value::as_str)
                        .unwrap_or("")
                        .to_string(),
                    content: vec![],
                    stop_reason: None,
                    usage: frame
                        .get("usageMetadata")
                        .map(Self::parse_usage)
                        .unwrap_or_default(),
                    tool_calls: vec![],
                }));
                chunks.push(UnifiedStreamChunk::content_block_start(
                    0,
                    UnifiedContent::text(""),
                ));
                decoder.content_block_index = 1;
                decoder.active_text_block = true;
            }

            let candidate = frame.get("candidates").and_then(Value::as_array).and_then(|c| c.first());

            for part in candidate
                .and_then(|c| c.get("content"))
                .and_then(|c| c.get("parts"))
                .and_then(Value::as_array)
                .into_iter()
                .flatten()
            {
                if let Some(text) = part.get("text").and_then(Value::as_str) {
                    if part.get("thought").and_then(Value::as_bool).unwrap_or(false) {
                        chunks.push(UnifiedStreamChunk::content_block_delta(
                            0,
                            UnifiedContent::thinking(text, None),
                        ));
                    } else {
                        chunks.push(UnifiedStreamChunk::content_block_delta(
                            0,
                            UnifiedContent::text(text),
                        ));
                        if let Some(sig) = part.get("thoughtSignature").and_then(Value::as_str) {
                            chunks.push(UnifiedStreamChunk::content_block_delta(
                                0,
                                UnifiedContent::thinking("", Some(sig.to_string())),
                            ));
                        }
                    }
                } else if let Some(fc) = part.get("functionCall") {
                    // A function call closes the running text block and
                    // claims the next index for itself.
                    if decoder.active_text_block {
                        chunks.push(UnifiedStreamChunk::content_block_stop(0));
                        decoder.active_text_block = false;
                    }
                    let idx = decoder.next_block_index();
                    let name = fc.get("name").and_then(Value::as_str).unwrap_or("");
                    let args = fc.get("args").cloned().unwrap_or(json!({}));

                    chunks.push(UnifiedStreamChunk::content_block_start(
                        idx,
                        UnifiedContent::tool_use(Self::fresh_call_id(), name, args.clone()),
                    ));
                    // Arguments arrive whole, not incrementally.
                    chunks.push(UnifiedStreamChunk::content_block_delta(
                        idx,
                        UnifiedContent::tool_input_delta(
                            idx,
                            serde_json::to_string(&args).unwrap_or_default(),
                        ),
                    ));
                    if let Some(sig) = part.get("thoughtSignature").and_then(Value::as_str) {
                        chunks.push(UnifiedStreamChunk::content_block_delta(
                            idx,
                            UnifiedContent::thinking("", Some(sig.to_string())),
                        ));
                    }
                    chunks.push(UnifiedStreamChunk::content_block_stop(idx));
                }
            }

            if let Some(reason) = candidate
                .and_then(|c| c.get("finishReason"))
                .and_then(Value::as_str)
            {
                if decoder.active_text_block {
                    chunks.push(UnifiedStreamChunk::content_block_stop(0));
                    decoder.active_text_block = false;
                }
                chunks.push(UnifiedStreamChunk::message_delta(
                    Self::finish_reason_to_unified(reason),
                    frame
                        .get("usageMetadata")
                        .map(Self::parse_usage)
                        .unwrap_or_default(),
                ));
                chunks.push(UnifiedStreamChunk::message_stop());
            }
        }

        Ok(chunks)
    }

    fn transform_stream_chunk_out(
        &self,
        encoder: &mut StreamEncoder,
        chunk: &UnifiedStreamChunk,
        _client_protocol: Protocol,
    ) -> Result<String> {
        match chunk.chunk_type {
            // The first data frame doubles as the start; nothing to emit.
            ChunkType::MessageStart | ChunkType::ContentBlockStart | ChunkType::Ping => {
                Ok(String::new())
            }
            ChunkType::ContentBlockDelta => {
                let Some(ref delta) = chunk.delta else {
                    return Ok(String::new());
                };
                match delta {
                    UnifiedContent::Text { text } => {
                        Ok(Self::encode_part(encoder, json!({"text": text})))
                    }
                    UnifiedContent::Thinking { text, signature } => {
                        if delta.is_signature_only() {
                            // Attach to the withheld part and release it.
                            let sig = signature.clone().unwrap_or_default();
                            match encoder.flush() {
                                Some(mut part) => {
                                    part["thoughtSignature"] = json!(sig);
                                    Ok(Self::part_frame(part))
                                }
                                None => Ok(Self::part_frame(
                                    json!({"text": "", "thoughtSignature": sig}),
                                )),
                            }
                        } else {
                            Ok(Self::encode_part(
                                encoder,
                                json!({"thought": true, "text": text}),
                            ))
                        }
                    }
                    UnifiedContent::ToolInputDelta { partial_json, .. } => {
                        match serde_json::from_str::<Value>(partial_json) {
                            Ok(args) => Ok(Self::encode_part(
                                encoder,
                                json!({"functionCall": {"name": "", "args": args}}),
                            )),
                            // Partial JSON cannot be represented as a
                            // functionCall part; skip.
                            Err(_) => Ok(String::new()),
                        }
                    }
                    _ => Ok(String::new()),
                }
            }
            ChunkType::ContentBlockStop => Ok(Self::flush_encoder(encoder)),
            ChunkType::MessageDelta => {
                let mut out = Self::flush_encoder(encoder);
                let finish_reason = chunk
                    .stop_reason
                    .map(Self::finish_reason_from_unified)
                    .unwrap_or("STOP");
                let usage = chunk.usage.as_ref().map(|u| {
                    json!({
                        "promptTokenCount": u.input_tokens,
                        "candidatesTokenCount": u.output_tokens,
                        "totalTokenCount": u.total_tokens(),
                    })
                });
                let body = json!({
                    "candidates": [{
                        "content": {"role": "model", "parts": []},
                        "finishReason": finish_reason,
                    }],
                    "usageMetadata": usage,
                });
                out.push_str(&format!("data: {}\n\n", body));
                Ok(out)
            }
            ChunkType::MessageStop => Ok(Self::flush_encoder(encoder)),
        }
    }

    fn can_handle(&self, raw: &Value) -> bool {
        raw.get("contents").is_some()
            || (raw.get("generationConfig").is_some() && raw.get("messages").is_none())
    }
}

// ============================================================================
// Tests
// ============================================================================

#[cfg(test)]
mod tests {
    use super::*;
    use assert_matches::assert_matches;
    use pretty_assertions::assert_eq;

    fn transformer() -> GeminiTransformer {
        GeminiTransformer::new()
    }

    #[test]
    fn test_request_out_basic() {
        let unified = transformer()
            .transform_request_out(json!({
                "contents": [
                    {"role": "user", "parts": [{"text": "Hello"}]},
                    {"role": "model", "parts": [{"text": "Hi there!"}]}
                ],
                "systemInstruction": {"parts": [{"text": "Be helpful."}]},
                "generationConfig": {
                    "temperature": 0.7,
                    "maxOutputTokens": 1024,
                    "topP": 0.9,
                    "topK": 40,
                    "stopSequences": ["END"]
                }
            }))
            .unwrap();

        assert_eq!(unified.messages.len(), 2);
        assert_eq!(unified.messages[1].role, Role::Assistant);
        assert_eq!(unified.system.as_deref(), Some("Be helpful."));
        assert_eq!(unified.parameters.max_tokens, Some(1024));
        assert_eq!(unified.parameters.top_k, Some(40));
        assert_eq!(
            unified.parameters.stop_sequences,
            Some(vec!["END".to_string()])
        );
    }

    #[test]
    fn test_request_out_missing_contents_is_invalid() {
        let err = transformer()
            .transform_request_out(json!({"model": "gemini-pro"}))
            .unwrap_err();
        assert_matches!(err, ProxyError::InvalidRequest(_));
    }

    #[test]
    fn test_function_response_turn_becomes_tool_role() {
        let unified = transformer()
            .transform_request_out(json!({
                "contents": [{
                    "role": "user",
                    "parts": [{"functionResponse": {"name": "lookup", "response": {"result": 42}}}]
                }]
            }))
            .unwrap();
        assert_eq!(unified.messages[0].role, Role::Tool);
        assert_eq!(unified.messages[0].tool_call_id.as_deref(), Some("lookup"));
    }

    #[test]
    fn test_request_in_merges_consecutive_roles() {
        let unified = UnifiedRequest::new(
            "gemini-pro",
            vec![
                UnifiedMessage::user("Hello"),
                UnifiedMessage::tool_result("call_1", json!("result"), false),
            ],
        );
        let raw = transformer().transform_request_in(&unified).unwrap();
        let contents = raw["contents"].as_array().unwrap();
        assert_eq!(contents.len(), 1);
        assert_eq!(contents[0]["role"], "user");
        assert_eq!(contents[0]["parts"].as_array().unwrap().len(), 2);
    }

    #[test]
    fn test_request_in_resolves_tool_names() {
        let unified = UnifiedRequest::new(
            "gemini-pro",
            vec![
                UnifiedMessage::with_content(
                    Role::Assistant,
                    vec![UnifiedContent::tool_use("call_9", "get_weather", json!({}))],
                ),
                UnifiedMessage::tool_result("call_9", json!({"temp": 20}), false),
            ],
        );
        let raw = transformer().transform_request_in(&unified).unwrap();
        let contents = raw["contents"].as_array().unwrap();
        let response_part = &contents[1]["parts"][0];
        assert_eq!(response_part["functionResponse"]["name"], "get_weather");
    }

    #[test]
    fn test_request_in_tools_and_choice() {
        let mut unified = UnifiedRequest::new("gemini-pro", vec![UnifiedMessage::user("w?")]);
        unified.tools = vec![UnifiedTool::function(
            "get_weather",
            Some("Get weather".into()),
            json!({"type": "object"}),
        )];
        unified.tool_choice = Some(json!({"type": "tool", "name": "get_weather"}));

        let raw = transformer().transform_request_in(&unified).unwrap();
        assert_eq!(
            raw["tools"][0]["functionDeclarations"][0]["name"],
            "get_weather"
        );
        assert_eq!(raw["toolConfig"]["functionCallingConfig"]["mode"], "ANY");
        assert_eq!(
            raw["toolConfig"]["functionCallingConfig"]["allowedFunctionNames"][0],
            "get_weather"
        );
    }

    #[test]
    fn test_tool_choice_out_mapping() {
        let unified = transformer()
            .transform_request_out(json!({
                "contents": [{"role": "user", "parts": [{"text": "x"}]}],
                "toolConfig": {"functionCallingConfig": {"mode": "ANY", "allowedFunctionNames": ["f"]}}
            }))
            .unwrap();
        assert_eq!(unified.tool_choice, Some(json!({"type": "tool", "name": "f"})));
    }

    #[test]
    fn test_response_in_thinking_and_signature() {
        let unified = transformer()
            .transform_response_in(
                json!({
                    "candidates": [{
                        "content": {
                            "role": "model",
                            "parts": [
                                {"thought": true, "text": "Let me think..."},
                                {"text": "The answer is 42.", "thoughtSignature": "sig_abc"}
                            ]
                        },
                        "finishReason": "STOP"
                    }],
                    "usageMetadata": {"promptTokenCount": 10, "candidatesTokenCount": 20}
                }),
                "gemini-pro",
            )
            .unwrap();

        assert_eq!(unified.content.len(), 3);
        assert_matches!(
            &unified.content[0],
            UnifiedContent::Thinking { text, signature: None } if text == "Let me think..."
        );
        assert_matches!(
            &unified.content[1],
            UnifiedContent::Text { text } if text == "The answer is 42."
        );
        assert!(unified.content[2].is_signature_only());
    }

    #[test]
    fn test_response_in_function_call_gets_id() {
        let unified = transformer()
            .transform_response_in(
                json!({
                    "candidates": [{
                        "content": {
                            "role": "model",
                            "parts": [{"functionCall": {"name": "get_weather", "args": {"city": "SF"}}}]
                        },
                        "finishReason": "STOP"
                    }]
                }),
                "gemini-pro",
            )
            .unwrap();
        assert_eq!(unified.tool_calls.len(), 1);
        assert!(unified.tool_calls[0].id.starts_with("call_"));
        assert_eq!(unified.tool_calls[0].name, "get_weather");
    }

    #[test]
    fn test_response_out_reattaches_signature() {
        let unified = UnifiedResponse::new(
            "r1",
            "gemini-pro",
            vec![
                UnifiedContent::thinking("Let me think...", None),
                UnifiedContent::text("Answer"),
                UnifiedContent::thinking("", Some("sig_xyz".into())),
            ],
            Some(StopReason::EndTurn),
            UnifiedUsage::new(10, 20),
        );
        let raw = transformer()
            .transform_response_out(&unified, Protocol::Gemini)
            .unwrap();

        let parts = raw["candidates"][0]["content"]["parts"].as_array().unwrap();
        assert_eq!(parts.len(), 2);
        assert_eq!(parts[0]["thought"], true);
        assert!(parts[0].get("thoughtSignature").is_none());
        assert_eq!(parts[1]["text"], "Answer");
        assert_eq!(parts[1]["thoughtSignature"], "sig_xyz");
    }

    #[test]
    fn test_stream_in_first_chunk_synthesizes_start() {
        let mut decoder = StreamDecoder::new();
        let chunks = transformer()
            .transform_stream_chunk_in(
                &mut decoder,
                &Bytes::from(
                    "data: {\"candidates\":[{\"content\":{\"role\":\"model\",\"parts\":[{\"text\":\"Hello\"}]}}],\"modelVersion\":\"gemini-pro\",\"responseId\":\"r1\"}\n\n",
                ),
            )
            .unwrap();

        assert_eq!(chunks[0].chunk_type, ChunkType::MessageStart);
        assert_eq!(chunks[1].chunk_type, ChunkType::ContentBlockStart);
        assert_eq!(chunks[2].chunk_type, ChunkType::ContentBlockDelta);
        assert_eq!(chunks[0].message.as_ref().unwrap().model, "gemini-pro");

        // Subsequent chunks skip the preamble.
        let chunks = transformer()
            .transform_stream_chunk_in(
                &mut decoder,
                &Bytes::from(
                    "data: {\"candidates\":[{\"content\":{\"role\":\"model\",\"parts\":[{\"text\":\" World\"}]}}]}\n\n",
                ),
            )
            .unwrap();
        assert_eq!(chunks.len(), 1);
    }

    #[test]
    fn test_stream_in_leading_function_call() {
        // First part is a functionCall: text block 0 opens and closes
        // empty, tool block takes index 1.
        let mut decoder = StreamDecoder::new();
        let chunks = transformer()
            .transform_stream_chunk_in(
                &mut decoder,
                &Bytes::from(
                    "data: {\"candidates\":[{\"content\":{\"role\":\"model\",\"parts\":[{\"functionCall\":{\"name\":\"f\",\"args\":{\"a\":1}}}]}}]}\n\n",
                ),
            )
            .unwrap();

        let kinds: Vec<ChunkType> = chunks.iter().map(|c| c.chunk_type).collect();
        assert_eq!(
            kinds,
            vec![
                ChunkType::MessageStart,
                ChunkType::ContentBlockStart,
                ChunkType::ContentBlockStop,
                ChunkType::ContentBlockStart,
                ChunkType::ContentBlockDelta,
                ChunkType::ContentBlockStop,
            ]
        );
        assert_eq!(chunks[2].index, 0);
        assert_eq!(chunks[3].index, 1);
        assert_matches!(
            &chunks[4].delta,
            Some(UnifiedContent::ToolInputDelta { partial_json, .. })
                if partial_json == "{\"a\":1}"
        );
    }

    #[test]
    fn test_stream_in_thought_signature() {
        let mut decoder = StreamDecoder::new();
        transformer()
            .transform_stream_chunk_in(
                &mut decoder,
                &Bytes::from(
                    "data: {\"candidates\":[{\"content\":{\"role\":\"model\",\"parts\":[{\"thought\":true,\"text\":\"hmm\"}]}}]}\n\n",
                ),
            )
            .unwrap();
        let chunks = transformer()
            .transform_stream_chunk_in(
                &mut decoder,
                &Bytes::from(
                    "data: {\"candidates\":[{\"content\":{\"role\":\"model\",\"parts\":[{\"text\":\"ans\",\"thoughtSignature\":\"sig_s\"}]}}]}\n\n",
                ),
            )
            .unwrap();
        assert_eq!(chunks.len(), 2);
        assert_matches!(&chunks[0].delta, Some(UnifiedContent::Text { text }) if text == "ans");
        assert!(chunks[1].delta.as_ref().unwrap().is_signature_only());
    }

    #[test]
    fn test_stream_in_finish_closes_text_block() {
        let mut decoder = StreamDecoder::new();
        let chunks = transformer()
            .transform_stream_chunk_in(
                &mut decoder,
                &Bytes::from(
                    "data: {\"candidates\":[{\"content\":{\"role\":\"model\",\"parts\":[{\"text\":\"!\"}]},\"finishReason\":\"STOP\"}],\"usageMetadata\":{\"promptTokenCount\":5,\"candidatesTokenCount\":3}}\n\n",
                ),
            )
            .unwrap();
        let kinds: Vec<ChunkType> = chunks.iter().map(|c| c.chunk_type).collect();
        assert!(kinds.contains(&ChunkType::ContentBlockStop));
        assert!(kinds.contains(&ChunkType::MessageDelta));
        assert!(kinds.contains(&ChunkType::MessageStop));
        let delta = chunks
            .iter()
            .find(|c| c.chunk_type == ChunkType::MessageDelta)
            .unwrap();
        assert_eq!(delta.usage.as_ref().unwrap().input_tokens, 5);
    }

    #[test]
    fn test_stream_out_signature_merges_into_pending_part() {
        // Text("A") followed by Thinking("","SIG") emits one part
        // carrying both the text and the signature.
        let t = transformer();
        let mut encoder = StreamEncoder::new();

        let first = t
            .transform_stream_chunk_out(
                &mut encoder,
                &UnifiedStreamChunk::content_block_delta(0, UnifiedContent::text("A")),
                Protocol::Gemini,
            )
            .unwrap();
        assert!(first.is_empty());

        let second = t
            .transform_stream_chunk_out(
                &mut encoder,
                &UnifiedStreamChunk::content_block_delta(
                    0,
                    UnifiedContent::thinking("", Some("SIG".into())),
                ),
                Protocol::Gemini,
            )
            .unwrap();
        let body: Value = serde_json::from_str(second.trim_start_matches("data: ").trim()).unwrap();
        let parts = body["candidates"][0]["content"]["parts"].as_array().unwrap();
        assert_eq!(parts.len(), 1);
        assert_eq!(parts[0]["text"], "A");
        assert_eq!(parts[0]["thoughtSignature"], "SIG");
    }

    #[test]
    fn test_stream_out_consecutive_text_flushes() {
        let t = transformer();
        let mut encoder = StreamEncoder::new();

        assert!(t
            .transform_stream_chunk_out(
                &mut encoder,
                &UnifiedStreamChunk::content_block_delta(0, UnifiedContent::text("A")),
                Protocol::Gemini,
            )
            .unwrap()
            .is_empty());
        let out = t
            .transform_stream_chunk_out(
                &mut encoder,
                &UnifiedStreamChunk::content_block_delta(0, UnifiedContent::text("B")),
                Protocol::Gemini,
            )
            .unwrap();
        assert!(out.contains("\"A\""));

        // Message delta flushes the trailing pending part, then emits the
        // finish frame.
        let out = t
            .transform_stream_chunk_out(
                &mut encoder,
                &UnifiedStreamChunk::message_delta(StopReason::EndTurn, UnifiedUsage::new(1, 2)),
                Protocol::Gemini,
            )
            .unwrap();
        assert!(out.contains("\"B\""));
        assert!(out.contains("\"finishReason\":\"STOP\""));
        assert!(out.contains("\"promptTokenCount\":1"));
    }

    #[test]
    fn test_finish_reason_mapping() {
        assert_eq!(
            GeminiTransformer::finish_reason_to_unified("MAX_TOKENS"),
            StopReason::MaxTokens
        );
        assert_eq!(
            GeminiTransformer::finish_reason_to_unified("RECITATION"),
            StopReason::ContentFilter
        );
        assert_eq!(
            GeminiTransformer::finish_reason_from_unified(StopReason::ToolUse),
            "STOP"
        );
    }

    #[test]
    fn test_can_handle() {
        let t = transformer();
        assert!(t.can_handle(&json!({"contents": []})));
        assert!(t.can_handle(&json!({"generationConfig": {}})));
        assert!(!t.can_handle(&json!({"messages": [], "generationConfig": {}})));
        assert!(!t.can_handle(&json!({"model": "gpt-4", "messages": []})));
    }
}
