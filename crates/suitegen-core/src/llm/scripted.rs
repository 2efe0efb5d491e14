//! Deterministic backend that replays a queue of canned replies.
//!
//! Used for offline dry runs and throughout the test suite. Clones share the
//! same queue and request log, so a handle kept by the caller can inspect
//! what the accessor sent after the backend was boxed.

use std::collections::VecDeque;
use std::sync::Arc;
use std::time::Duration;

use parking_lot::Mutex;
use serde_json::{Map, Value};

use crate::errors::{SuitegenError, SuitegenResult};
use crate::llm::backend::{ChatBackend, ChatReply, ChatRequest, Usage};
use crate::models::{ChatMessage, Platform};

/// A request as the scripted backend received it.
#[derive(Clone, Debug)]
pub struct RecordedRequest {
    pub model: String,
    pub messages: Vec<ChatMessage>,
    pub options: Map<String, Value>,
    pub root: Map<String, Value>,
    pub stream: bool,
    pub timeout: Duration,
}

#[derive(Default)]
struct Script {
    replies: VecDeque<SuitegenResult<ChatReply>>,
    requests: Vec<RecordedRequest>,
}

#[derive(Clone)]
pub struct ScriptedBackend {
    platform: Platform,
    script: Arc<Mutex<Script>>,
}

impl ScriptedBackend {
    pub fn new(platform: Platform) -> Self {
        Self {
            platform,
            script: Arc::new(Mutex::new(Script::default())),
        }
    }

    /// Queue a reply without usage counters.
    pub fn push_reply(&self, content: impl Into<String>) -> &Self {
        self.push(Ok(ChatReply {
            content: content.into(),
            usage: None,
        }))
    }

    pub fn push_reply_with_usage(&self, content: impl Into<String>, usage: Usage) -> &Self {
        self.push(Ok(ChatReply {
            content: content.into(),
            usage: Some(usage),
        }))
    }

    pub fn push_error(&self, err: SuitegenError) -> &Self {
        self.push(Err(err))
    }

    pub fn push(&self, reply: SuitegenResult<ChatReply>) -> &Self {
        self.script.lock().replies.push_back(reply);
        self
    }

    pub fn pending(&self) -> usize {
        self.script.lock().replies.len()
    }

    /// Number of round trips performed so far.
    pub fn calls(&self) -> usize {
        self.script.lock().requests.len()
    }

    pub fn requests(&self) -> Vec<RecordedRequest> {
        self.script.lock().requests.clone()
    }
}

impl ChatBackend for ScriptedBackend {
    fn platform(&self) -> Platform {
        self.platform
    }

    fn send(&self, request: &ChatRequest<'_>, timeout: Duration) -> SuitegenResult<ChatReply> {
        let mut script = self.script.lock();
        script.requests.push(RecordedRequest {
            model: request.model.to_string(),
            messages: request.messages.to_vec(),
            options: request.options.clone(),
            root: request.root.clone(),
            stream: request.stream,
            timeout,
        });
        script.replies.pop_front().unwrap_or_else(|| {
            Err(SuitegenError::NotExists(
                "scripted backend has no reply queued".to_string(),
            ))
        })
    }
}
