//! Ordered, role-tagged message log consumed by the model backends.

use crate::errors::{SuitegenError, SuitegenResult};
use crate::models::{ChatMessage, ChatRole, Platform};

/// Append-only chat log. It never truncates itself; context-window limits
/// are enforced by the model accessor.
#[derive(Clone, Debug)]
pub struct ChatSession {
    platforms: Vec<Platform>,
    messages: Vec<ChatMessage>,
}

impl ChatSession {
    pub fn new(platforms: impl IntoIterator<Item = Platform>) -> Self {
        let mut compatible: Vec<Platform> = Vec::new();
        for platform in platforms {
            if !compatible.contains(&platform) {
                compatible.push(platform);
            }
        }
        Self {
            platforms: compatible,
            messages: Vec::new(),
        }
    }

    /// A session every known platform accepts.
    pub fn universal() -> Self {
        Self::new(Platform::ALL)
    }

    pub fn platforms(&self) -> &[Platform] {
        &self.platforms
    }

    pub fn supports(&self, platform: Platform) -> bool {
        self.platforms.contains(&platform)
    }

    pub fn clear(&mut self) {
        self.messages.clear();
    }

    pub fn set_system_prompt(&mut self, text: &str) -> SuitegenResult<()> {
        if !self.messages.is_empty() {
            return Err(SuitegenError::ChatNotEmpty(self.messages.len()));
        }
        self.push(ChatRole::System, text)
    }

    pub fn add_prompt(&mut self, text: &str) -> SuitegenResult<()> {
        self.push(ChatRole::User, text)
    }

    pub fn add_response(&mut self, text: &str) -> SuitegenResult<()> {
        self.push(ChatRole::Assistant, text)
    }

    /// Most recent user message, or `""` when there is none.
    pub fn get_last_prompt(&self) -> &str {
        self.last_of(ChatRole::User)
    }

    /// Most recent assistant message, or `""` when there is none.
    pub fn get_last_response(&self) -> &str {
        self.last_of(ChatRole::Assistant)
    }

    pub fn messages(&self) -> &[ChatMessage] {
        &self.messages
    }

    pub fn len(&self) -> usize {
        self.messages.len()
    }

    pub fn is_empty(&self) -> bool {
        self.messages.is_empty()
    }

    /// Drop the trailing message if it has `role`. Used by the accessor to
    /// roll back a prompt whose round trip failed.
    pub(crate) fn pop_if(&mut self, role: ChatRole) -> Option<ChatMessage> {
        match self.messages.last() {
            Some(last) if last.role == role => self.messages.pop(),
            _ => None,
        }
    }

    fn push(&mut self, role: ChatRole, text: &str) -> SuitegenResult<()> {
        if text.trim().is_empty() {
            return Err(SuitegenError::Validation(format!(
                "refusing to add an empty {role:?} message"
            )));
        }
        self.messages.push(ChatMessage::new(role, text));
        Ok(())
    }

    fn last_of(&self, role: ChatRole) -> &str {
        self.messages
            .iter()
            .rev()
            .find(|m| m.role == role)
            .map(|m| m.content.as_str())
            .unwrap_or("")
    }
}
