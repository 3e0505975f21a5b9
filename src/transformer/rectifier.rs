//! Structural sanitizer for provider-bound payloads.
//!
//! Runs once after `transform_request_in`, repairing cross-protocol
//! combinations that providers reject outright. Policy: repair, never
//! reject.

use serde_json::{json, Value};

/// Sanitize a provider payload in place.
///
/// - drops `thinking`/`redacted_thinking` content blocks,
/// - strips `signature` from surviving blocks,
/// - replaces blank text blocks with `"."`,
/// - replaces emptied-out assistant content with a single `"."` text block,
/// - drops the top-level `thinking` config on tool-use continuations
///   (decided against the incoming payload, so a continuation that properly
///   begins with a thinking block keeps its config).
pub fn sanitize_provider_payload(payload: &mut Value) {
    let drop_thinking_config = should_remove_top_level_thinking(payload);

    if let Some(messages) = payload.get_mut("messages").and_then(Value::as_array_mut) {
        for msg in messages {
            let is_assistant = msg.get("role").and_then(Value::as_str) == Some("assistant");
            let Some(content) = msg.get_mut("content").and_then(Value::as_array_mut) else {
                continue;
            };

            content.retain(|block| {
                !matches!(
                    block.get("type").and_then(Value::as_str),
                    Some("thinking") | Some("redacted_thinking")
                )
            });

            for block in content.iter_mut() {
                if let Some(obj) = block.as_object_mut() {
                    obj.remove("signature");
                }
                if block.get("type").and_then(Value::as_str) == Some("text") {
                    if let Some(text) = block.get("text").and_then(Value::as_str) {
                        if text.trim().is_empty() {
                            block["text"] = json!(".");
                        }
                    }
                }
            }

            if content.is_empty() && is_assistant {
                content.push(json!({"type": "text", "text": "."}));
            }
        }
    }

    if drop_thinking_config {
        if let Some(obj) = payload.as_object_mut() {
            obj.remove("thinking");
        }
    }
}

/// Enabled thinking is dropped when the last assistant message does not
/// begin with a thinking block yet contains tool use. Providers reject
/// enabled thinking on continuations that begin with tool output.
fn should_remove_top_level_thinking(payload: &Value) -> bool {
    let enabled = payload
        .get("thinking")
        .and_then(|t| t.get("type"))
        .and_then(Value::as_str)
        == Some("enabled");
    if !enabled {
        return false;
    }

    let Some(messages) = payload.get("messages").and_then(Value::as_array) else {
        return false;
    };

    let Some(content) = messages
        .iter()
        .rev()
        .find(|msg| msg.get("role").and_then(Value::as_str) == Some("assistant"))
        .and_then(|msg| msg.get("content"))
        .and_then(Value::as_array)
        .filter(|content| !content.is_empty())
    else {
        return false;
    };

    let first_type = content
        .first()
        .and_then(|block| block.get("type"))
        .and_then(Value::as_str);
    if matches!(first_type, Some("thinking") | Some("redacted_thinking")) {
        return false;
    }

    content
        .iter()
        .any(|block| block.get("type").and_then(Value::as_str) == Some("tool_use"))
}

// ============================================================================
// Tests
// ============================================================================
