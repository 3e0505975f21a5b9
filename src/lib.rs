//! Cross-protocol transformation core for LLM API proxying.
//!
//! This library translates inference requests and responses between the four
//! major LLM wire formats (OpenAI Chat Completions, Anthropic Messages,
//! OpenAI Response API, Google Gemini), for both buffered JSON and SSE
//! streams. A proxy server embeds it between its HTTP layer and its upstream
//! dispatcher.
//!
//! # Architecture
//!
//! - [`core`]: error types, error-envelope constants, logging helpers
//! - [`transformer`]: the Unified Internal Format (UIF), per-protocol
//!   transformers, protocol detection, the rectifier, feature transformers,
//!   streaming state machine, and the [`transformer::pipeline::TransformPipeline`]
//!   orchestrator
//! - [`scripting`]: the interface to an external per-provider scripting
//!   runtime invoked on raw JSON payloads
//!
//! The HTTP listener, provider selection, credential storage, and the
//! concrete scripting runtime live outside this crate; the pipeline reaches
//! them through the [`transformer::pipeline::Dispatcher`] and
//! [`scripting::ScriptRuntime`] traits.

pub mod core;
pub mod scripting;
pub mod transformer;

pub use crate::core::{ProxyError, Result};
pub use transformer::pipeline::{DispatchReply, Dispatcher, TransformPipeline};
pub use transformer::{
    Protocol, Transformer, TransformerRegistry, UnifiedRequest, UnifiedResponse,
    UnifiedStreamChunk,
};
