//! Streaming machinery: SSE framing, per-session decode state, and the
//! cross-protocol chunk-grammar bridge.
//!
//! The UIF chunk grammar is the normal form every protocol projects through:
//!
//! ```text
//! MessageStart
//!   (ContentBlockStart · ContentBlockDelta* · ContentBlockStop)+
//! MessageDelta(stop_reason, usage)
//! MessageStop
//! ```
//!
//! with `Ping` allowed anywhere. Index 0 is reserved for the initial text
//! block; later blocks get monotonically increasing indices.

use std::collections::{HashMap, HashSet};

use super::unified::{
    ChunkType, StopReason, UnifiedContent, UnifiedResponse, UnifiedStreamChunk, UnifiedUsage,
};

// ============================================================================
// SSE parsing
// ============================================================================

/// One parsed server-sent event.
#[derive(Debug, Clone, Default)]
pub struct SseEvent {
    pub event: Option<String>,
    pub data: Option<String>,
    pub id: Option<String>,
    pub retry: Option<u64>,
}

/// Incremental SSE frame splitter. Bytes may arrive cut anywhere; partial
/// frames stay buffered until their terminating blank line shows up.
#[derive(Default)]
pub struct SseParser {
    buffer: String,
}

impl SseParser {
    pub fn new() -> Self {
        Self::default()
    }

    /// Feed bytes, get back every event completed so far.
    pub fn parse(&mut self, chunk: &[u8]) -> Vec<SseEvent> {
        let chunk_str = match std::str::from_utf8(chunk) {
            Ok(s) => s,
            Err(_) => return vec![],
        };
        self.buffer.push_str(chunk_str);

        let mut events = vec![];
        while let Some(pos) = self.buffer.find("\n\n") {
            let block = self.buffer[..pos].to_string();
            self.buffer.drain(..pos + 2);

            let mut event = SseEvent::default();
            for line in block.lines() {
                if line.is_empty() || line.starts_with(':') {
                    continue;
                }
                let (field, value) = match line.split_once(':') {
                    Some((f, v)) => (f, v.strip_prefix(' ').unwrap_or(v)),
                    None => (line, ""),
                };
                match field {
                    "event" => event.event = Some(value.to_string()),
                    "data" => match event.data {
                        Some(ref mut data) => {
                            data.push('\n');
                            data.push_str(value);
                        }
                        None => event.data = Some(value.to_string()),
                    },
                    "id" => event.id = Some(value.to_string()),
                    "retry" => event.retry = value.parse().ok(),
                    _ => {}
                }
            }
            if event.data.is_some() || event.event.is_some() {
                events.push(event);
            }
        }
        events
    }

    /// Unconsumed partial frame, if any.
    pub fn remaining(&self) -> &str {
        &self.buffer
    }
}

/// Format an SSE event with an explicit event name (Anthropic style).
pub fn format_sse_event(event: Option<&str>, data: &str) -> String {
    let mut out = String::new();
    if let Some(name) = event {
        out.push_str("event: ");
        out.push_str(name);
        out.push('\n');
    }
    for line in data.lines() {
        out.push_str("data: ");
        out.push_str(line);
        out.push('\n');
    }
    out.push('\n');
    out
}

/// Format a data-only SSE event (OpenAI/Gemini style).
pub fn format_sse_data(data: &str) -> String {
    format!("data: {}\n\n", data)
}

/// OpenAI-family stream terminator.
pub fn format_sse_done() -> String {
    "data: [DONE]\n\n".to_string()
}

// ============================================================================
// Per-session decode state
// ============================================================================

/// Ephemeral decode state for one streaming session.
///
/// Shared transformer instances must stay stateless, so anything a decoder
/// needs to remember between chunks lives here. The pipeline constructs one
/// per session; it is never shared. Gemini is the main consumer (it has no
/// message_start event and multiplexes blocks); other decoders ignore most
/// fields.
#[derive(Debug, Default)]
pub struct StreamDecoder {
    /// Whether the first provider chunk has been seen.
    pub first_chunk_seen: bool,
    /// Next content block index to hand out (0 is the initial text block).
    pub content_block_index: usize,
    /// Whether the index-0 text block is open.
    pub active_text_block: bool,
}

impl StreamDecoder {
    pub fn new() -> Self {
        Self::default()
    }

    /// Reserve the next block index.
    pub fn next_block_index(&mut self) -> usize {
        let idx = self.content_block_index;
        self.content_block_index += 1;
        idx
    }
}

/// Ephemeral encode state for one streaming session.
///
/// The Gemini wire attaches `thoughtSignature` to the part it signs, so the
/// encoder holds one part back until it knows whether a signature-only
/// delta follows. Other encoders are stateless and ignore this.
#[derive(Debug, Default)]
pub struct StreamEncoder {
    /// Part withheld pending a possible trailing signature.
    pub pending_part: Option<serde_json::Value>,
}

impl StreamEncoder {
    pub fn new() -> Self {
        Self::default()
    }

    /// Take the withheld part, if any.
    pub fn flush(&mut self) -> Option<serde_json::Value> {
        self.pending_part.take()
    }
}

// ============================================================================
// Cross-protocol bridge
// ============================================================================

/// Cached identity of a tool block, for synthesizing `ContentBlockStart`
/// when the source grammar never sent one.
#[derive(Debug, Clone)]
struct ToolBlockInfo {
    id: String,
    name: String,
}

/// State machine that normalizes any incoming chunk sequence to the full UIF
/// grammar.
///
/// Incremental grammars (OpenAI, Gemini) omit events the richer grammars
/// require: no `message_start`, no per-block start/stop. The bridge fills
/// the gaps — it synthesizes `MessageStart` (followed by a `ping`, matching
/// the Anthropic wire), opens blocks for orphan deltas, closes every open
/// block before `MessageDelta`/`MessageStop`, and folds the provider's
/// `message_start` input-token count into the final usage when the
/// `message_delta` arrives without one.
#[derive(Debug)]
pub struct StreamBridge {
    message_started: bool,
    ping_emitted: bool,
    message_delta_emitted: bool,
    message_stopped: bool,
    started_blocks: HashSet<usize>,
    stopped_blocks: HashSet<usize>,
    tool_blocks: HashMap<usize, ToolBlockInfo>,
    /// Input tokens reported in the provider's message_start (Anthropic
    /// reports them there, not in message_delta).
    provider_input_tokens: Option<i32>,
    model: String,
    message_id: String,
}

impl StreamBridge {
    pub fn new(model: impl Into<String>) -> Self {
        Self {
            message_started: false,
            ping_emitted: false,
            message_delta_emitted: false,
            message_stopped: false,
            started_blocks: HashSet::new(),
            stopped_blocks: HashSet::new(),
            tool_blocks: HashMap::new(),
            provider_input_tokens: None,
            model: model.into(),
            message_id: format!(
                "msg_{}",
                &uuid::Uuid::new_v4().simple().to_string()[..24]
            ),
        }
    }

    pub fn message_stopped(&self) -> bool {
        self.message_stopped
    }

    /// Normalize a batch of decoded chunks.
    pub fn process(&mut self, chunks: Vec<UnifiedStreamChunk>) -> Vec<UnifiedStreamChunk> {
        let mut out = Vec::with_capacity(chunks.len());

        for chunk in chunks {
            self.remember_tool_block(&chunk);

            if !self.message_started && Self::needs_message_start(&chunk) {
                out.push(self.synthetic_message_start());
                self.mark_started(&mut out);
            }

            match chunk.chunk_type {
                ChunkType::MessageStart => {
                    if self.message_started {
                        // Duplicate start from upstream; drop it.
                        continue;
                    }
                    if let Some(ref msg) = chunk.message {
                        self.model = msg.model.clone();
                        self.message_id = msg.id.clone();
                        if msg.usage.input_tokens > 0 {
                            self.provider_input_tokens = Some(msg.usage.input_tokens);
                        }
                    }
                    out.push(chunk);
                    self.mark_started(&mut out);
                }
                ChunkType::ContentBlockStart => {
                    self.started_blocks.insert(chunk.index);
                    out.push(chunk);
                }
                ChunkType::ContentBlockDelta => {
                    if !self.started_blocks.contains(&chunk.index) {
                        out.push(self.synthetic_block_start(chunk.index, &chunk));
                        self.started_blocks.insert(chunk.index);
                    }
                    out.push(chunk);
                }
                ChunkType::ContentBlockStop => {
                    self.stopped_blocks.insert(chunk.index);
                    out.push(chunk);
                }
                ChunkType::MessageDelta => {
                    self.close_open_blocks(&mut out);
                    let mut chunk = chunk;
                    if let (Some(ref mut usage), Some(input)) =
                        (&mut chunk.usage, self.provider_input_tokens)
                    {
                        if usage.input_tokens == 0 {
                            usage.input_tokens = input;
                        }
                    }
                    self.message_delta_emitted = true;
                    out.push(chunk);
                }
                ChunkType::MessageStop => {
                    if self.message_stopped {
                        continue;
                    }
                    self.close_open_blocks(&mut out);
                    self.message_stopped = true;
                    out.push(chunk);
                }
                ChunkType::Ping => out.push(chunk),
            }
        }

        out
    }

    /// Closing events owed to the client when the upstream ends — normally
    /// or by abort. After an abort this produces the synthetic
    /// `MessageDelta(EndTurn)` + `MessageStop` that lets the client's state
    /// machine close cleanly.
    pub fn finalize(&mut self) -> Vec<UnifiedStreamChunk> {
        let mut out = Vec::new();
        if !self.message_started {
            return out;
        }

        self.close_open_blocks(&mut out);

        if !self.message_delta_emitted {
            let mut usage = UnifiedUsage::default();
            if let Some(input) = self.provider_input_tokens {
                usage.input_tokens = input;
            }
            out.push(UnifiedStreamChunk::message_delta(StopReason::EndTurn, usage));
            self.message_delta_emitted = true;
        }
        if !self.message_stopped {
            out.push(UnifiedStreamChunk::message_stop());
            self.message_stopped = true;
        }
        out
    }

    fn mark_started(&mut self, out: &mut Vec<UnifiedStreamChunk>) {
        self.message_started = true;
        if !self.ping_emitted {
            out.push(UnifiedStreamChunk::ping());
            self.ping_emitted = true;
        }
    }

    fn needs_message_start(chunk: &UnifiedStreamChunk) -> bool {
        matches!(
            chunk.chunk_type,
            ChunkType::ContentBlockStart | ChunkType::ContentBlockDelta | ChunkType::MessageDelta
        )
    }

    fn remember_tool_block(&mut self, chunk: &UnifiedStreamChunk) {
        if chunk.chunk_type == ChunkType::ContentBlockStart {
            if let Some(UnifiedContent::ToolUse { id, name, .. }) = chunk.content_block.as_ref() {
                self.tool_blocks.insert(
                    chunk.index,
                    ToolBlockInfo {
                        id: id.clone(),
                        name: name.clone(),
                    },
                );
            }
        }
    }

    fn close_open_blocks(&mut self, out: &mut Vec<UnifiedStreamChunk>) {
        let mut open: Vec<usize> = self
            .started_blocks
            .iter()
            .filter(|idx| !self.stopped_blocks.contains(idx))
            .copied()
            .collect();
        open.sort_unstable();
        for idx in open {
            out.push(UnifiedStreamChunk::content_block_stop(idx));
            self.stopped_blocks.insert(idx);
        }
    }

    fn synthetic_message_start(&self) -> UnifiedStreamChunk {
        UnifiedStreamChunk::message_start(UnifiedResponse {
            id: self.message_id.clone(),
            model: self.model.clone(),
            content: vec![],
            stop_reason: None,
            usage: UnifiedUsage::default(),
            tool_calls: vec![],
        })
    }

    fn synthetic_block_start(
        &self,
        index: usize,
        delta_chunk: &UnifiedStreamChunk,
    ) -> UnifiedStreamChunk {
        if let Some(info) = self.tool_blocks.get(&index) {
            return UnifiedStreamChunk::content_block_start(
                index,
                UnifiedContent::tool_use(&info.id, &info.name, serde_json::json!({})),
            );
        }

        let block = match delta_chunk.delta {
            Some(UnifiedContent::ToolInputDelta { .. }) => UnifiedContent::tool_use(
                format!("toolu_{}", &uuid::Uuid::new_v4().simple().to_string()[..24]),
                "unknown_tool",
                serde_json::json!({}),
            ),
            Some(UnifiedContent::Thinking { .. }) => UnifiedContent::thinking("", None),
            _ => UnifiedContent::text(""),
        };
        UnifiedStreamChunk::content_block_start(index, block)
    }
}

// ============================================================================
// Stream session
// ============================================================================

/// Everything one streaming translation needs, bundled. Constructed fresh by
/// the pipeline per session; never shared across sessions.
pub struct StreamSession {
    pub decoder: StreamDecoder,
    pub encoder: StreamEncoder,
    pub bridge: StreamBridge,
    pub sse: SseParser,
}

impl StreamSession {
    pub fn new(model: impl Into<String>) -> Self {
        Self {
            decoder: StreamDecoder::new(),
            encoder: StreamEncoder::new(),
            bridge: StreamBridge::new(model),
            sse: SseParser::new(),
        }
    }
}

// ============================================================================
// Tests
// ============================================================================
