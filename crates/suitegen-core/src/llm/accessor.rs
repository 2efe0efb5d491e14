//! Model accessor: binds a chat session, a model and a hyperparameter set to
//! one backend and performs single bounded round trips.
//!
//! Lifecycle: `Uninitialized --init--> Initialized --select_model--> Ready`.
//! The accessor never retries; retry policy lives in the generator and the
//! correctors.

use std::time::Duration;

use indexmap::IndexMap;
use serde_json::Map;
use tracing::{debug, info, warn};

use crate::config::LlmConfig;
use crate::errors::{ResponseFailure, SuitegenError, SuitegenResult};
use crate::llm::backend::{ChatBackend, ChatRequest, Usage};
use crate::llm::catalog::{known_model, ModelSpec};
use crate::llm::chat::ChatSession;
use crate::llm::hyperparams::{hyperparam_for, HyperParam, HyperParamId, WireSlot};
use crate::llm::ollama::OllamaBackend;
use crate::llm::openai::OpenAiBackend;
use crate::llm::tokenizer::estimate_tokens;
use crate::models::{ChatRole, Platform};

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum AccessorState {
    Uninitialized,
    Initialized,
    Ready,
}

pub struct ModelAccessor {
    backend: Box<dyn ChatBackend>,
    chat: Option<ChatSession>,
    model: Option<ModelSpec>,
    hyperparams: IndexMap<&'static str, HyperParam>,
    stream: bool,
    last_usage: Option<Usage>,
}

impl ModelAccessor {
    pub fn new(backend: Box<dyn ChatBackend>) -> Self {
        Self {
            backend,
            chat: None,
            model: None,
            hyperparams: IndexMap::new(),
            stream: false,
            last_usage: None,
        }
    }

    /// Build the accessor registered for `platform`.
    pub fn for_platform(platform: Platform, config: &LlmConfig) -> SuitegenResult<Self> {
        let backend: Box<dyn ChatBackend> = match platform {
            Platform::Ollama => Box::new(OllamaBackend::new(config.base_url.as_deref())?),
            Platform::OpenAi => Box::new(OpenAiBackend::new(
                config.base_url.as_deref(),
                config.api_key(),
            )?),
        };
        let mut accessor = Self::new(backend);
        accessor.set_stream(config.stream);
        Ok(accessor)
    }

    /// Build, initialize and select the configured model in one go.
    pub fn from_config(config: &LlmConfig) -> SuitegenResult<Self> {
        let mut accessor = Self::for_platform(config.platform, config)?;
        accessor.init(ChatSession::new([config.platform]))?;
        accessor.select_model(config.model_spec()?)?;
        for (name, value) in &config.hyperparams {
            accessor.set_hyperparam_value(name, value)?;
        }
        if let Some(system) = config.system_prompt.as_deref() {
            accessor.set_system_prompt(system)?;
        }
        Ok(accessor)
    }

    pub fn platform(&self) -> Platform {
        self.backend.platform()
    }

    pub fn state(&self) -> AccessorState {
        match (&self.chat, &self.model) {
            (None, _) => AccessorState::Uninitialized,
            (Some(_), None) => AccessorState::Initialized,
            (Some(_), Some(_)) => AccessorState::Ready,
        }
    }

    pub fn set_stream(&mut self, stream: bool) {
        self.stream = stream;
    }

    // -- binding --------------------------------------------------------------

    /// Bind `chat`. Any messages it already holds are cleared.
    pub fn init(&mut self, mut chat: ChatSession) -> SuitegenResult<()> {
        let platform = self.platform();
        if !chat.supports(platform) {
            return Err(SuitegenError::IncompatibleApi(format!(
                "chat session does not support platform {platform}"
            )));
        }
        chat.clear();
        self.chat = Some(chat);
        debug!("accessor for {platform} bound a chat session");
        Ok(())
    }

    /// Select `spec`, resetting the hyperparameter set and the chat.
    pub fn select_model(&mut self, spec: ModelSpec) -> SuitegenResult<()> {
        let platform = self.platform();
        if !spec.runs_on(platform) {
            return Err(SuitegenError::IncompatibleApi(format!(
                "model {} does not run on platform {platform}",
                spec.name()
            )));
        }
        let chat = self
            .chat
            .as_mut()
            .ok_or_else(|| SuitegenError::NotReady("init() must bind a chat first".into()))?;
        chat.clear();
        self.hyperparams.clear();
        self.last_usage = None;
        info!(
            "selected model {} on {platform} (context window {})",
            spec.name(),
            spec.context_window()
        );
        self.model = Some(spec);
        Ok(())
    }

    pub fn model(&self) -> Option<&ModelSpec> {
        self.model.as_ref()
    }

    fn require_model(&self) -> SuitegenResult<&ModelSpec> {
        self.model
            .as_ref()
            .ok_or_else(|| SuitegenError::NotReady("no model selected".into()))
    }

    // -- hyperparameters ------------------------------------------------------

    pub fn add_hyperparam(&mut self, param: HyperParam) -> SuitegenResult<()> {
        let model = self.require_model()?;
        let id = param.id();
        if !model.supports(id) {
            return Err(SuitegenError::IncompatibleHyperparam {
                id: id.id().to_string(),
                model: model.name().to_string(),
            });
        }
        if self.hyperparams.contains_key(id.id()) {
            return Err(SuitegenError::AlreadyExists(format!("hyperparameter {id}")));
        }
        self.hyperparams.insert(id.id(), param);
        Ok(())
    }

    pub fn remove_hyperparam(&mut self, id: HyperParamId) -> SuitegenResult<HyperParam> {
        self.require_model()?;
        self.hyperparams
            .shift_remove(id.id())
            .ok_or_else(|| SuitegenError::NotExists(format!("hyperparameter {id}")))
    }

    /// Resolve `logical` through the platform factory, validate `value` and
    /// add the parameter, replacing any earlier value.
    pub fn set_hyperparam_value(&mut self, logical: &str, value: &str) -> SuitegenResult<()> {
        let mut param = hyperparam_for(self.platform(), logical)?;
        param.set_value(value)?;
        if self.hyperparams.contains_key(param.id().id()) {
            self.remove_hyperparam(param.id())?;
        }
        self.add_hyperparam(param)
    }

    pub fn hyperparam(&self, id: HyperParamId) -> Option<&HyperParam> {
        self.hyperparams.get(id.id())
    }

    pub fn hyperparams(&self) -> impl Iterator<Item = &HyperParam> {
        self.hyperparams.values()
    }

    // -- chat -----------------------------------------------------------------

    pub fn chat(&self) -> Option<&ChatSession> {
        self.chat.as_ref()
    }

    fn require_chat(&mut self) -> SuitegenResult<&mut ChatSession> {
        self.chat
            .as_mut()
            .ok_or_else(|| SuitegenError::NotReady("init() must bind a chat first".into()))
    }

    pub fn clear_chat(&mut self) -> SuitegenResult<()> {
        self.require_chat()?.clear();
        Ok(())
    }

    pub fn set_system_prompt(&mut self, text: &str) -> SuitegenResult<()> {
        self.require_chat()?.set_system_prompt(text)
    }

    /// Append an exchange that was answered from storage instead of the
    /// backend, keeping the chat identical to a live run.
    pub fn record_exchange(&mut self, prompt: &str, response: &str) -> SuitegenResult<()> {
        self.require_model()?;
        let chat = self.require_chat()?;
        chat.add_prompt(prompt)?;
        if let Err(e) = chat.add_response(response) {
            chat.pop_if(ChatRole::User);
            return Err(e);
        }
        Ok(())
    }

    pub fn last_usage(&self) -> Option<Usage> {
        self.last_usage
    }

    // -- round trip -----------------------------------------------------------

    /// Send `text` as a user message and return the assistant reply.
    ///
    /// The chat is left untouched when the round trip fails.
    pub fn prompt(&mut self, text: &str, timeout: Duration) -> SuitegenResult<String> {
        if self.state() != AccessorState::Ready {
            return Err(SuitegenError::NotReady(
                "prompt() requires a bound chat and a selected model".into(),
            ));
        }
        if text.trim().is_empty() {
            return Err(SuitegenError::InvalidPrompt("prompt text is empty".into()));
        }

        let mut options = Map::new();
        let mut root = Map::new();
        for param in self.hyperparams.values() {
            let value = param.to_effective_value()?.to_json();
            match param.slot() {
                WireSlot::Options => options.insert(param.id().id().to_string(), value),
                WireSlot::Root => root.insert(param.id().id().to_string(), value),
            };
        }

        let (Some(model), Some(chat)) = (self.model.as_ref(), self.chat.as_mut()) else {
            return Err(SuitegenError::NotReady("accessor is not ready".into()));
        };
        chat.add_prompt(text)?;

        let sent = {
            let request = ChatRequest {
                model: model.name(),
                messages: chat.messages(),
                options,
                root,
                stream: self.stream,
            };
            self.backend.send(&request, timeout)
        };
        let reply = match sent {
            Ok(reply) => reply,
            Err(e) => {
                chat.pop_if(ChatRole::User);
                return Err(e);
            }
        };

        let usage = reply.usage.unwrap_or_else(|| Usage {
            prompt_tokens: chat
                .messages()
                .iter()
                .map(|m| estimate_tokens(&m.content))
                .sum(),
            response_tokens: estimate_tokens(&reply.content),
        });
        self.last_usage = Some(usage);

        // Backends do not flag runaway generations; a reply that fills the
        // whole window is treated as one.
        let window = u64::from(model.context_window());
        if usage.total() >= window {
            chat.pop_if(ChatRole::User);
            warn!(
                "model {} saturated its context window ({} >= {window} tokens)",
                model.name(),
                usage.total()
            );
            return Err(SuitegenError::SaturatedContextWindow {
                used: usage.total(),
                window,
            });
        }

        if reply.content.trim().is_empty() {
            chat.pop_if(ChatRole::User);
            return Err(SuitegenError::Response {
                kind: ResponseFailure::Unknown,
                message: format!("model {} returned an empty reply", model.name()),
            });
        }
        chat.add_response(&reply.content)?;
        Ok(reply.content)
    }
}

/// Resolve a model name against the catalog, falling back to a custom spec
/// supporting every parameter the platform knows.
pub(crate) fn resolve_model(
    platform: Platform,
    name: &str,
    context_window: Option<u32>,
) -> SuitegenResult<ModelSpec> {
    match known_model(name) {
        Ok(spec) => match context_window {
            Some(window) => Ok(ModelSpec::new(
                spec.name(),
                spec.supported().iter().copied(),
                window,
                spec.platforms().iter().copied(),
            )),
            None => Ok(spec),
        },
        Err(_) => {
            let window = context_window.ok_or_else(|| {
                SuitegenError::Config(format!(
                    "model {name} is not built in; set llm.context_window"
                ))
            })?;
            let supported = crate::llm::catalog::models_for(platform)
                .into_iter()
                .flat_map(|m| m.supported().to_vec())
                .collect::<Vec<_>>();
            Ok(ModelSpec::new(name, supported, window, [platform]))
        }
    }
}
