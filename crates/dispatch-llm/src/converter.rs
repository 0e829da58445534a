use serde_json::{json, Value};

use dispatch_core::messages::coalesce_turns;
use dispatch_core::CompletionRequest;

/// Build the Messages API request body. Turns are coalesced first: the API
/// rejects consecutive same-role messages and a leading assistant turn.
pub fn build_request_body(request: &CompletionRequest) -> Value {
    let messages: Vec<Value> = coalesce_turns(&request.messages)
        .iter()
        .map(|turn| json!({"role": turn.role.as_str(), "content": turn.content}))
        .collect();

    let mut body = json!({
        "model": request.model,
        "max_tokens": request.max_tokens,
        "messages": messages,
        "stream": true,
    });
    if !request.system.trim().is_empty() {
        body["system"] = Value::String(request.system.clone());
    }
    body
}

#[cfg(test)]
mod tests {
    use super::*;
    use dispatch_core::ChatTurn;

    fn request(messages: Vec<ChatTurn>) -> CompletionRequest {
        CompletionRequest {
            model: "claude-haiku-4-5-20251001".into(),
            max_tokens: 1024,
            system: "You are the operations assistant.".into(),
            messages,
        }
    }

    #[test]
    fn body_has_model_limits_and_stream_flag() {
        let body = build_request_body(&request(vec![ChatTurn::user("hi")]));
        assert_eq!(body["model"], "claude-haiku-4-5-20251001");
        assert_eq!(body["max_tokens"], 1024);
        assert_eq!(body["stream"], true);
        assert_eq!(body["system"], "You are the operations assistant.");
        assert_eq!(body["messages"], json!([{"role": "user", "content": "hi"}]));
    }

    #[test]
    fn consecutive_roles_are_merged() {
        let body = build_request_body(&request(vec![
            ChatTurn::user("first"),
            ChatTurn::user("second"),
            ChatTurn::assistant("reply"),
            ChatTurn::user("third"),
        ]));
        let messages = body["messages"].as_array().unwrap();
        assert_eq!(messages.len(), 3);
        assert_eq!(messages[0]["content"], "first\n\nsecond");
        assert_eq!(messages[1]["role"], "assistant");
    }

    #[test]
    fn blank_system_prompt_is_omitted() {
        let mut req = request(vec![ChatTurn::user("hi")]);
        req.system = "  ".into();
        assert!(build_request_body(&req).get("system").is_none());
    }
}
