use serde::{Deserialize, Serialize};

#[derive(Clone, Copy, Debug, Serialize, Deserialize, PartialEq, Eq, Hash)]
#[serde(rename_all = "snake_case")]
pub enum ChatRole {
    User,
    Assistant,
}

impl ChatRole {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::User => "user",
            Self::Assistant => "assistant",
        }
    }
}

/// One turn of conversation history, as sent by the chat panel.
#[derive(Clone, Debug, Serialize, Deserialize, PartialEq, Eq)]
pub struct ChatTurn {
    pub role: ChatRole,
    pub content: String,
}

impl ChatTurn {
    pub fn user(content: impl Into<String>) -> Self {
        Self {
            role: ChatRole::User,
            content: content.into(),
        }
    }

    pub fn assistant(content: impl Into<String>) -> Self {
        Self {
            role: ChatRole::Assistant,
            content: content.into(),
        }
    }
}

/// Collapse adjacent turns with the same role into one turn and drop empty
/// ones. Providers that require strict user/assistant alternation accept the
/// result as long as it starts with a user turn, which is also enforced here
/// by dropping leading assistant turns.
pub fn coalesce_turns(turns: &[ChatTurn]) -> Vec<ChatTurn> {
    let mut out: Vec<ChatTurn> = Vec::with_capacity(turns.len());
    for turn in turns {
        if turn.content.trim().is_empty() {
            continue;
        }
        if out.is_empty() && turn.role == ChatRole::Assistant {
            continue;
        }
        match out.last_mut() {
            Some(last) if last.role == turn.role => {
                last.content.push_str("\n\n");
                last.content.push_str(&turn.content);
            }
            _ => out.push(turn.clone()),
        }
    }
    out
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn turn_serializes_with_lowercase_role() {
        let json = serde_json::to_value(ChatTurn::user("hello")).unwrap();
        assert_eq!(json["role"], "user");
        assert_eq!(json["content"], "hello");
    }

    #[test]
    fn unknown_role_is_rejected() {
        let parsed = serde_json::from_str::<ChatTurn>(r#"{"role":"wizard","content":"x"}"#);
        assert!(parsed.is_err());
    }

    #[test]
    fn coalesce_merges_same_role_neighbours() {
        let turns = vec![
            ChatTurn::user("summary of earlier"),
            ChatTurn::user("latest question"),
            ChatTurn::assistant("answer"),
        ];
        let merged = coalesce_turns(&turns);
        assert_eq!(merged.len(), 2);
        assert_eq!(merged[0].content, "summary of earlier\n\nlatest question");
        assert_eq!(merged[1].role, ChatRole::Assistant);
    }

    #[test]
    fn coalesce_drops_leading_assistant_and_empty_turns() {
        let turns = vec![
            ChatTurn::assistant("hi, how can I help?"),
            ChatTurn::user("   "),
            ChatTurn::user("question"),
        ];
        let merged = coalesce_turns(&turns);
        assert_eq!(merged, vec![ChatTurn::user("question")]);
    }
}
