//! Protocol detection for incoming requests.
//!
//! Signals in priority order: explicit `x-protocol` header, endpoint path,
//! request structure. Structure alone is ambiguous (OpenAI requests may
//! carry `max_tokens`, Anthropic clients may omit `system`), so the
//! heuristics require combined indicators before leaving the OpenAI
//! default.

use super::Protocol;
use http::HeaderMap;
use serde_json::Value;

/// Stateless protocol detector.
pub struct ProtocolDetector;

impl ProtocolDetector {
    /// Full-priority detection: header, then path, then structure.
    pub fn detect_with_headers(request: &Value, headers: &HeaderMap, path: &str) -> Protocol {
        if let Some(protocol) = Self::detect_from_header(headers) {
            return protocol;
        }
        if let Some(protocol) = Self::detect_from_path(path) {
            return protocol;
        }
        Self::detect(request)
    }

    /// Explicit `x-protocol` header.
    ///
    /// Accepted values: `openai`, `anthropic`/`claude`,
    /// `response`/`response-api`, `gemini`.
    pub fn detect_from_header(headers: &HeaderMap) -> Option<Protocol> {
        headers
            .get("x-protocol")
            .and_then(|v| v.to_str().ok())
            .and_then(|s| match s.to_lowercase().as_str() {
                "openai" => Some(Protocol::OpenAI),
                "anthropic" | "claude" => Some(Protocol::Anthropic),
                "response" | "response-api" => Some(Protocol::ResponseApi),
                "gemini" => Some(Protocol::Gemini),
                _ => None,
            })
    }

    /// Endpoint-path detection. Returns `None` when the path says nothing.
    pub fn detect_from_path(path: &str) -> Option<Protocol> {
        let path = path.to_lowercase();

        if path.contains("/chat/completions") {
            Some(Protocol::OpenAI)
        } else if path.contains("/messages") && !path.contains("/responses") {
            Some(Protocol::Anthropic)
        } else if path.contains("/responses") {
            Some(Protocol::ResponseApi)
        } else if Self::is_gemini_path(&path) {
            Some(Protocol::Gemini)
        } else if path.contains("/completions") && !path.contains("/chat/") {
            // Legacy completions endpoint.
            Some(Protocol::OpenAI)
        } else {
            None
        }
    }

    /// Gemini paths: `/v1/projects/<p>/.../models/<m>` or the
    /// `:generateContent` / `:streamGenerateContent` method suffix.
    fn is_gemini_path(path: &str) -> bool {
        path.contains(":generatecontent")
            || path.contains(":streamgeneratecontent")
            || (path.contains("/projects/") && path.contains("/models/"))
    }

    /// Structural heuristic over the payload. Falls back to OpenAI.
    pub fn detect(request: &Value) -> Protocol {
        if Self::is_anthropic_shape(request) {
            return Protocol::Anthropic;
        }
        if Self::is_response_api_shape(request) {
            return Protocol::ResponseApi;
        }
        if Self::is_gemini_shape(request) {
            return Protocol::Gemini;
        }
        Protocol::OpenAI
    }

    /// Anthropic iff (`system` AND `max_tokens`), or `max_tokens` plus a
    /// typed content block of an Anthropic kind somewhere in the messages.
    fn is_anthropic_shape(request: &Value) -> bool {
        let has_max_tokens = request.get("max_tokens").is_some();
        if !has_max_tokens {
            return false;
        }
        if request.get("system").is_some() {
            return true;
        }

        request
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
                                    Some("text") | Some("image") | Some("tool_use")
                                        | Some("tool_result")
                                )
                            })
                        })
                })
            })
    }

    /// Response API iff `input` present, or `instructions` without
    /// `messages`, or `max_output_tokens` without `max_tokens`.
    fn is_response_api_shape(request: &Value) -> bool {
        if request.get("input").is_some() {
            return true;
        }
        let has_messages = request.get("messages").is_some();
        if request.get("instructions").is_some() && !has_messages {
            return true;
        }
        request.get("max_output_tokens").is_some() && request.get("max_tokens").is_none()
    }

    /// Gemini iff `contents` present, or `generationConfig` without
    /// `messages`.
    fn is_gemini_shape(request: &Value) -> bool {
        request.get("contents").is_some()
            || (request.get("generationConfig").is_some() && request.get("messages").is_none())
    }
}

// ============================================================================
// Tests
// ============================================================================

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn headers_with_protocol(value: &str) -> HeaderMap {
        let mut headers = HeaderMap::new();
        headers.insert("x-protocol", value.parse().unwrap());
        headers
    }

    #[test]
    fn test_detect_openai_default() {
        let request = json!({
            "model": "gpt-4",
            "messages": [{"role": "user", "content": "Hello!"}]
        });
        assert_eq!(ProtocolDetector::detect(&request), Protocol::OpenAI);
    }

    #[test]
    fn test_detect_anthropic_system_plus_max_tokens() {
        let request = json!({
            "model": "claude-3-opus",
            "max_tokens": 1024,
            "system": "Be helpful.",
            "messages": [{"role": "user", "content": "Hello!"}]
        });
        assert_eq!(ProtocolDetector::detect(&request), Protocol::Anthropic);
    }

    #[test]
    fn test_detect_anthropic_content_blocks() {
        let request = json!({
            "model": "claude-3-opus",
            "max_tokens": 1024,
            "messages": [{
                "role": "user",
                "content": [{"type": "tool_result", "tool_use_id": "t1", "content": "42"}]
            }]
        });
        assert_eq!(ProtocolDetector::detect(&request), Protocol::Anthropic);
    }

    #[test]
    fn test_openai_with_max_tokens_stays_openai() {
        // String content, no system: not enough evidence for Anthropic.
        let request = json!({
            "model": "gpt-4",
            "max_tokens": 1024,
            "messages": [{"role": "user", "content": "Hello!"}]
        });
        assert_eq!(ProtocolDetector::detect(&request), Protocol::OpenAI);
    }

    #[test]
    fn test_system_without_max_tokens_is_openai() {
        let request = json!({
            "model": "gpt-4",
            "system": "Be helpful.",
            "messages": [{"role": "user", "content": "Hello"}]
        });
        assert_eq!(ProtocolDetector::detect(&request), Protocol::OpenAI);
    }

    #[test]
    fn test_detect_response_api_input() {
        let request = json!({"model": "gpt-4", "input": "What is the weather?"});
        assert_eq!(ProtocolDetector::detect(&request), Protocol::ResponseApi);
    }

    #[test]
    fn test_detect_response_api_instructions_without_messages() {
        let request = json!({"model": "gpt-4", "instructions": "Be helpful."});
        assert_eq!(ProtocolDetector::detect(&request), Protocol::ResponseApi);
    }

    #[test]
    fn test_detect_response_api_max_output_tokens() {
        let request = json!({"model": "gpt-4", "max_output_tokens": 100, "input": []});
        assert_eq!(ProtocolDetector::detect(&request), Protocol::ResponseApi);
    }

    #[test]
    fn test_detect_gemini_contents() {
        let request = json!({
            "contents": [{"role": "user", "parts": [{"text": "hi"}]}]
        });
        assert_eq!(ProtocolDetector::detect(&request), Protocol::Gemini);
    }

    #[test]
    fn test_detect_gemini_generation_config() {
        let request = json!({"generationConfig": {"temperature": 0.5}});
        assert_eq!(ProtocolDetector::detect(&request), Protocol::Gemini);
    }

    #[test]
    fn test_generation_config_with_messages_is_not_gemini() {
        let request = json!({
            "generationConfig": {},
            "messages": [{"role": "user", "content": "hi"}]
        });
        assert_eq!(ProtocolDetector::detect(&request), Protocol::OpenAI);
    }

    #[test]
    fn test_detect_from_path() {
        assert_eq!(
            ProtocolDetector::detect_from_path("/v1/chat/completions"),
            Some(Protocol::OpenAI)
        );
        assert_eq!(
            ProtocolDetector::detect_from_path("/v1/messages"),
            Some(Protocol::Anthropic)
        );
        assert_eq!(
            ProtocolDetector::detect_from_path("/v1/responses"),
            Some(Protocol::ResponseApi)
        );
        assert_eq!(
            ProtocolDetector::detect_from_path(
                "/v1/projects/p1/locations/us/models/gemini-pro:streamGenerateContent"
            ),
            Some(Protocol::Gemini)
        );
        assert_eq!(ProtocolDetector::detect_from_path("/v1/models"), None);
    }

    #[test]
    fn test_legacy_completions_path() {
        assert_eq!(
            ProtocolDetector::detect_from_path("/v1/completions"),
            Some(Protocol::OpenAI)
        );
    }

    #[test]
    fn test_header_beats_path_and_structure() {
        let request = json!({
            "model": "gpt-4",
            "messages": [{"role": "user", "content": "hi"}]
        });
        let headers = headers_with_protocol("anthropic");
        assert_eq!(
            ProtocolDetector::detect_with_headers(&request, &headers, "/v1/chat/completions"),
            Protocol::Anthropic
        );
    }

    #[test]
    fn test_header_aliases() {
        assert_eq!(
            ProtocolDetector::detect_from_header(&headers_with_protocol("claude")),
            Some(Protocol::Anthropic)
        );
        assert_eq!(
            ProtocolDetector::detect_from_header(&headers_with_protocol("response-api")),
            Some(Protocol::ResponseApi)
        );
        assert_eq!(
            ProtocolDetector::detect_from_header(&headers_with_protocol("GEMINI")),
            Some(Protocol::Gemini)
        );
        assert_eq!(
            ProtocolDetector::detect_from_header(&headers_with_protocol("smoke-signals")),
            None
        );
    }

    #[test]
    fn test_path_beats_structure() {
        let request = json!({
            "model": "x",
            "max_tokens": 10,
            "system": "s",
            "messages": []
        });
        assert_eq!(
            ProtocolDetector::detect_with_headers(
                &request,
                &HeaderMap::new(),
                "/v1/chat/completions"
            ),
            Protocol::OpenAI
        );
    }

    #[test]
    fn test_structure_fallback_when_path_unknown() {
        let request = json!({
            "model": "x",
            "max_tokens": 10,
            "system": "s",
            "messages": []
        });
        assert_eq!(
            ProtocolDetector::detect_with_headers(&request, &HeaderMap::new(), "/v1/unknown"),
            Protocol::Anthropic
        );
    }
}
