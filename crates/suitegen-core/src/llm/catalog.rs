//! Model variant descriptions and the built-in model table.

use crate::errors::{SuitegenError, SuitegenResult};
use crate::llm::hyperparams::{ids, HyperParamId};
use crate::models::Platform;

/// Immutable description of one LLM variant.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct ModelSpec {
    name: String,
    supported: Vec<HyperParamId>,
    context_window: u32,
    platforms: Vec<Platform>,
}

impl ModelSpec {
    pub fn new(
        name: impl Into<String>,
        supported: impl IntoIterator<Item = HyperParamId>,
        context_window: u32,
        platforms: impl IntoIterator<Item = Platform>,
    ) -> Self {
        let mut ids: Vec<HyperParamId> = Vec::new();
        for id in supported {
            if !ids.contains(&id) {
                ids.push(id);
            }
        }
        let mut plats: Vec<Platform> = Vec::new();
        for p in platforms {
            if !plats.contains(&p) {
                plats.push(p);
            }
        }
        Self {
            name: name.into(),
            supported: ids,
            context_window,
            platforms: plats,
        }
    }

    /// Wire-format model identifier.
    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn supported(&self) -> &[HyperParamId] {
        &self.supported
    }

    pub fn supports(&self, id: HyperParamId) -> bool {
        self.supported.contains(&id)
    }

    /// Token budget shared by prompt and response.
    pub fn context_window(&self) -> u32 {
        self.context_window
    }

    pub fn platforms(&self) -> &[Platform] {
        &self.platforms
    }

    pub fn runs_on(&self, platform: Platform) -> bool {
        self.platforms.contains(&platform)
    }
}

// ---------------------------------------------------------------------------
// Built-in table
// ---------------------------------------------------------------------------

const OLLAMA_SAMPLING: &[HyperParamId] = &[
    ids::TEMPERATURE,
    ids::TOP_K,
    ids::TOP_P,
    ids::SEED,
    ids::CONTEXT_WINDOW,
    ids::NUM_PREDICT,
    ids::REPEAT_PENALTY,
];

const OPENAI_SAMPLING: &[HyperParamId] = &[
    ids::TEMPERATURE,
    ids::TOP_P,
    ids::SEED,
    ids::MAX_TOKENS,
    ids::PRESENCE_PENALTY,
    ids::FREQUENCY_PENALTY,
];

/// (name, context window, thinking support, platform)
const KNOWN_MODELS: &[(&str, u32, bool, Platform)] = &[
    ("llama3.1:8b", 131_072, false, Platform::Ollama),
    ("llama3.2:3b", 131_072, false, Platform::Ollama),
    ("qwen2.5-coder:7b", 32_768, false, Platform::Ollama),
    ("qwen2.5-coder:14b", 32_768, false, Platform::Ollama),
    ("codellama:7b", 16_384, false, Platform::Ollama),
    ("deepseek-r1:8b", 131_072, true, Platform::Ollama),
    ("qwen3:8b", 40_960, true, Platform::Ollama),
    ("gpt-4o-mini", 128_000, false, Platform::OpenAi),
    ("gpt-4o", 128_000, false, Platform::OpenAi),
    ("gpt-4.1-mini", 1_047_576, false, Platform::OpenAi),
];

fn build(name: &str, window: u32, think: bool, platform: Platform) -> ModelSpec {
    let base = match platform {
        Platform::Ollama => OLLAMA_SAMPLING,
        Platform::OpenAi => OPENAI_SAMPLING,
    };
    let mut supported = base.to_vec();
    if think {
        supported.push(ids::THINK);
    }
    ModelSpec::new(name, supported, window, [platform])
}

/// Look up a built-in model by its wire name.
pub fn known_model(name: &str) -> SuitegenResult<ModelSpec> {
    KNOWN_MODELS
        .iter()
        .find(|(n, ..)| *n == name)
        .map(|&(n, window, think, platform)| build(n, window, think, platform))
        .ok_or_else(|| SuitegenError::NotExists(format!("unknown model: {name}")))
}

/// All built-in models that run on `platform`.
pub fn models_for(platform: Platform) -> Vec<ModelSpec> {
    KNOWN_MODELS
        .iter()
        .filter(|(.., p)| *p == platform)
        .map(|&(n, window, think, p)| build(n, window, think, p))
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_known_model_lookup() {
        let spec = known_model("qwen2.5-coder:7b").unwrap();
        assert_eq!(spec.context_window(), 32_768);
        assert!(spec.runs_on(Platform::Ollama));
        assert!(!spec.runs_on(Platform::OpenAi));
        assert!(spec.supports(ids::TOP_K));
        assert!(!spec.supports(ids::THINK));
    }

    #[test]
    fn test_thinking_models_support_think() {
        assert!(known_model("deepseek-r1:8b").unwrap().supports(ids::THINK));
    }

    #[test]
    fn test_unknown_model() {
        assert!(matches!(
            known_model("nope"),
            Err(SuitegenError::NotExists(_))
        ));
    }

    #[test]
    fn test_models_for_platform() {
        let openai = models_for(Platform::OpenAi);
        assert!(!openai.is_empty());
        assert!(openai.iter().all(|m| m.runs_on(Platform::OpenAi)));
        assert!(openai.iter().all(|m| !m.supports(ids::TOP_K)));
    }

    #[test]
    fn test_new_deduplicates() {
        let spec = ModelSpec::new(
            "custom",
            [ids::SEED, ids::SEED],
            100,
            [Platform::Ollama, Platform::Ollama],
        );
        assert_eq!(spec.supported().len(), 1);
        assert_eq!(spec.platforms().len(), 1);
    }
}
