use serde::Deserialize;
use serde::Serialize;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Role {
    System,
    User,
    Assistant,
    /// An observation fed back from an executed instruction.
    Tool,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Message {
    pub role: Role,
    pub content: String,
}

/// Ordered role-tagged history owned by one controller run. Serializable so
/// the embedding application's model client can put it on the wire; no
/// pruning or summarization happens here (context-window management is the
/// embedder's problem).
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct Conversation {
    messages: Vec<Message>,
}

impl Conversation {
    pub fn with_system(prompt: impl Into<String>) -> Self {
        let mut conversation = Self::default();
        conversation.push(Role::System, prompt);
        conversation
    }

    pub fn push(&mut self, role: Role, content: impl Into<String>) {
        self.messages.push(Message {
            role,
            content: content.into(),
        });
    }

    pub fn push_user(&mut self, content: impl Into<String>) {
        self.push(Role::User, content);
    }

    pub fn push_assistant(&mut self, content: impl Into<String>) {
        self.push(Role::Assistant, content);
    }

    /// Appends an executed instruction's output as the next turn, in the
    /// `Observation:` framing the step protocol expects.
    pub fn push_observation(&mut self, output: &str) {
        self.push(Role::Tool, format!("Observation:\n{output}"));
    }

    pub fn messages(&self) -> &[Message] {
        &self.messages
    }

    pub fn len(&self) -> usize {
        self.messages.len()
    }

    pub fn is_empty(&self) -> bool {
        self.messages.is_empty()
    }
}
