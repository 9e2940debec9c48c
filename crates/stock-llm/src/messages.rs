//! Chat messages exchanged with a model

use serde::{Deserialize, Serialize};

/// Who authored a message
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Role {
    User,
    Assistant,
    System,
}

/// Plain-text chat message. Analysis prompts never carry images or tool
/// calls, so the content is a single string.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Message {
    pub role: Role,
    pub content: String,
}

impl Message {
    pub fn new(role: Role, content: impl Into<String>) -> Self {
        Self {
            role,
            content: content.into(),
        }
    }

    pub fn user(content: impl Into<String>) -> Self {
        Self::new(Role::User, content)
    }

    pub fn assistant(content: impl Into<String>) -> Self {
        Self::new(Role::Assistant, content)
    }

    pub fn system(content: impl Into<String>) -> Self {
        Self::new(Role::System, content)
    }

    pub fn text(&self) -> &str {
        &self.content
    }

    /// True when the model returned nothing but whitespace
    pub fn is_blank(&self) -> bool {
        self.content.trim().is_empty()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_constructors_set_role() {
        assert_eq!(Message::user("600519?").role, Role::User);
        assert_eq!(Message::assistant("HOLD").text(), "HOLD");
        assert!(Message::assistant(" \n").is_blank());
    }

    #[test]
    fn test_wire_format() {
        let json = serde_json::to_string(&Message::system("Be brief")).unwrap();
        assert_eq!(json, r#"{"role":"system","content":"Be brief"}"#);
    }
}
