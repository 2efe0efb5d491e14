//! Shared typed models used across the model-access, storage, checking and
//! pipeline layers.

use std::fmt;

use serde::{Deserialize, Serialize};

use crate::errors::{SuitegenError, SuitegenResult};

// ---------------------------------------------------------------------------
// 1. Platform
// ---------------------------------------------------------------------------

/// An LLM backend platform. Chat sessions, model specs and accessors each
/// declare which platforms they are compatible with.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Platform {
    Ollama,
    #[serde(rename = "openai")]
    OpenAi,
}

impl Platform {
    pub const ALL: [Platform; 2] = [Platform::Ollama, Platform::OpenAi];

    pub fn as_str(&self) -> &'static str {
        match self {
            Platform::Ollama => "ollama",
            Platform::OpenAi => "openai",
        }
    }

    pub fn parse(value: &str) -> SuitegenResult<Self> {
        match value.trim().to_ascii_lowercase().as_str() {
            "ollama" => Ok(Platform::Ollama),
            "openai" | "open-ai" | "open_ai" => Ok(Platform::OpenAi),
            other => Err(SuitegenError::Config(format!("unknown platform: {other}"))),
        }
    }
}

impl fmt::Display for Platform {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

// ---------------------------------------------------------------------------
// 2. ChatRole / ChatMessage
// ---------------------------------------------------------------------------

#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ChatRole {
    User,
    Assistant,
    System,
    Tool,
}

/// One role-tagged message. Serializes to the `{"role", "content"}` shape
/// both supported backends accept.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct ChatMessage {
    pub role: ChatRole,
    pub content: String,
}

impl ChatMessage {
    pub fn new(role: ChatRole, content: impl Into<String>) -> Self {
        Self {
            role,
            content: content.into(),
        }
    }
}

// ---------------------------------------------------------------------------
// 3. Diagnostic
// ---------------------------------------------------------------------------

/// 1-based source position reported by a checker.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct Position {
    pub line: u32,
    pub column: u32,
}

impl Position {
    /// Parse the `line;col` encoding used by the lint sandbox.
    pub fn parse(encoded: &str) -> Option<Self> {
        let (line, column) = encoded.trim().split_once(';')?;
        Some(Self {
            line: line.trim().parse().ok()?,
            column: column.trim().parse().ok()?,
        })
    }
}

impl fmt::Display for Position {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{};{}", self.line, self.column)
    }
}

/// A single verification failure. Checkers return `Option<Diagnostic>`;
/// `None` means the artifact is clean.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct Diagnostic {
    pub name: String,
    pub message: String,
    pub position: Option<Position>,
}

impl Diagnostic {
    pub fn new(name: impl Into<String>, message: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            message: message.into(),
            position: None,
        }
    }

    pub fn at(mut self, position: Position) -> Self {
        self.position = Some(position);
        self
    }
}

impl fmt::Display for Diagnostic {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self.position {
            Some(pos) => write!(f, "{} at {}: {}", self.name, pos, self.message),
            None => write!(f, "{}: {}", self.name, self.message),
        }
    }
}

// ---------------------------------------------------------------------------
// 4. CacheKey
// ---------------------------------------------------------------------------

/// Identity of one stored model exchange. At most one artifact is ever
/// stored per key.
#[derive(Clone, Debug, PartialEq, Eq, Hash)]
pub struct CacheKey {
    pub project: String,
    pub prompt: String,
    pub model: String,
    pub attempt: u32,
}

impl CacheKey {
    pub fn new(
        project: impl Into<String>,
        prompt: impl Into<String>,
        model: impl Into<String>,
        attempt: u32,
    ) -> Self {
        Self {
            project: project.into(),
            prompt: prompt.into(),
            model: model.into(),
            attempt,
        }
    }
}

// ---------------------------------------------------------------------------
// 5. AttemptState
// ---------------------------------------------------------------------------

/// Progress of one generation or correction session.
///
/// Values are never mutated in place: every transition returns a new state
/// which the owner swaps in.
#[derive(Clone, Debug, Default, PartialEq, Eq)]
pub struct AttemptState {
    pub in_progress: bool,
    pub times_tried: u32,
    pub succeeded: bool,
    pub last_artifact: Option<String>,
}

impl AttemptState {
    pub fn started(artifact: Option<String>) -> Self {
        Self {
            in_progress: true,
            times_tried: 0,
            succeeded: false,
            last_artifact: artifact,
        }
    }

    /// One more attempt was consumed; `artifact` replaces the current one
    /// when present.
    pub fn tried(&self, artifact: Option<String>) -> Self {
        Self {
            in_progress: self.in_progress,
            times_tried: self.times_tried + 1,
            succeeded: false,
            last_artifact: artifact.or_else(|| self.last_artifact.clone()),
        }
    }

    pub fn succeeded(&self) -> Self {
        Self {
            in_progress: false,
            times_tried: self.times_tried,
            succeeded: true,
            last_artifact: self.last_artifact.clone(),
        }
    }

    /// Terminal failure. The artifact is discarded.
    pub fn failed(&self) -> Self {
        Self {
            in_progress: false,
            times_tried: self.times_tried,
            succeeded: false,
            last_artifact: None,
        }
    }
}

// ---------------------------------------------------------------------------
// 6. Entity
// ---------------------------------------------------------------------------

#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum EntityKind {
    Function,
    Method,
}

/// A function or class method that is the unit of test generation.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct Entity {
    /// Dotted module name, e.g. `pkg.utils`.
    pub module: String,
    pub name: String,
    pub class_name: Option<String>,
    pub kind: EntityKind,
    pub source: String,
    pub start_line: u32,
    pub end_line: u32,
}

impl Entity {
    /// `Class.method` for methods, the bare name for functions.
    pub fn qualified_name(&self) -> String {
        match &self.class_name {
            Some(class) => format!("{class}.{}", self.name),
            None => self.name.clone(),
        }
    }
}
