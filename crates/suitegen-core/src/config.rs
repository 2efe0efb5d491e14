//! Run configuration, loaded from a TOML file.
//!
//! Every section and field has a default, so an empty file (or no file at
//! all) yields a usable configuration pointing at a local Ollama server.

use std::collections::BTreeMap;
use std::path::{Path, PathBuf};
use std::time::Duration;

use serde::{Deserialize, Serialize};

use crate::errors::{SuitegenError, SuitegenResult};
use crate::llm::accessor::resolve_model;
use crate::llm::catalog::ModelSpec;
use crate::models::Platform;

#[derive(Clone, Debug, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct SuitegenConfig {
    pub llm: LlmConfig,
    pub generation: GenerationConfig,
    pub cache: CacheConfig,
    pub lint: LintConfig,
    pub skip_log: SkipLogConfig,
}

impl SuitegenConfig {
    pub fn from_toml_str(content: &str) -> SuitegenResult<Self> {
        Ok(toml::from_str(content)?)
    }

    pub fn load(path: &Path) -> SuitegenResult<Self> {
        let content = std::fs::read_to_string(path).map_err(|e| {
            SuitegenError::Config(format!("failed to read {}: {e}", path.display()))
        })?;
        Self::from_toml_str(&content)
    }
}

// ---------------------------------------------------------------------------
// [llm]
// ---------------------------------------------------------------------------

#[derive(Clone, Debug, Serialize, Deserialize)]
#[serde(default)]
pub struct LlmConfig {
    pub platform: Platform,
    pub base_url: Option<String>,
    pub model: String,
    /// Required for models missing from the built-in table; overrides the
    /// table otherwise.
    pub context_window: Option<u32>,
    /// Environment variable holding the API key, if the backend needs one.
    pub api_key_env: Option<String>,
    pub request_timeout_secs: u64,
    pub stream: bool,
    /// Logical hyperparameter name -> value, e.g. `temperature = "0.2"`.
    pub hyperparams: BTreeMap<String, String>,
    pub system_prompt: Option<String>,
}

impl Default for LlmConfig {
    fn default() -> Self {
        Self {
            platform: Platform::Ollama,
            base_url: None,
            model: "qwen2.5-coder:7b".to_string(),
            context_window: None,
            api_key_env: None,
            request_timeout_secs: 300,
            stream: false,
            hyperparams: BTreeMap::new(),
            system_prompt: None,
        }
    }
}

impl LlmConfig {
    pub fn api_key(&self) -> Option<String> {
        let var = self.api_key_env.as_deref()?;
        std::env::var(var).ok().filter(|k| !k.trim().is_empty())
    }

    pub fn request_timeout(&self) -> Duration {
        Duration::from_secs(self.request_timeout_secs)
    }

    pub fn model_spec(&self) -> SuitegenResult<ModelSpec> {
        resolve_model(self.platform, &self.model, self.context_window)
    }
}

// ---------------------------------------------------------------------------
// [generation]
// ---------------------------------------------------------------------------

#[derive(Clone, Debug, Serialize, Deserialize)]
#[serde(default)]
pub struct GenerationConfig {
    /// Attempts the generator may spend obtaining a first artifact.
    pub max_tries: u32,
    /// Repair attempts allowed to the syntactic corrector.
    pub syntax_tries: u32,
    /// Repair attempts allowed to the lint corrector.
    pub lint_tries: u32,
    /// Skip entities whose names start with `_`.
    pub skip_private: bool,
}

impl Default for GenerationConfig {
    fn default() -> Self {
        Self {
            max_tries: 3,
            syntax_tries: 3,
            lint_tries: 3,
            skip_private: true,
        }
    }
}

// ---------------------------------------------------------------------------
// [cache]
// ---------------------------------------------------------------------------

#[derive(Clone, Debug, Serialize, Deserialize)]
#[serde(default)]
pub struct CacheConfig {
    pub path: PathBuf,
}

impl Default for CacheConfig {
    fn default() -> Self {
        Self {
            path: PathBuf::from(".suitegen/cache.db"),
        }
    }
}

// ---------------------------------------------------------------------------
// [lint]
// ---------------------------------------------------------------------------

#[derive(Clone, Debug, Serialize, Deserialize)]
#[serde(default)]
pub struct LintConfig {
    /// Command run inside the sandbox; `{file}` is replaced by the path of
    /// the artifact under test.
    pub command: Vec<String>,
    pub timeout_secs: u64,
    /// Directory inside the sandbox where artifacts are written.
    pub path_prefix: String,
    pub sandbox_image: Option<String>,
}

impl Default for LintConfig {
    fn default() -> Self {
        Self {
            command: vec![
                "python3".to_string(),
                "/opt/suitegen/lint_check.py".to_string(),
                "{file}".to_string(),
            ],
            timeout_secs: 120,
            path_prefix: "tests/suitegen".to_string(),
            sandbox_image: None,
        }
    }
}

impl LintConfig {
    pub fn timeout(&self) -> Duration {
        Duration::from_secs(self.timeout_secs)
    }
}

// ---------------------------------------------------------------------------
// [skip_log]
// ---------------------------------------------------------------------------

#[derive(Clone, Debug, Serialize, Deserialize)]
#[serde(default)]
pub struct SkipLogConfig {
    pub path: PathBuf,
}

impl Default for SkipLogConfig {
    fn default() -> Self {
        Self {
            path: PathBuf::from(".suitegen/skipped.jsonl"),
        }
    }
}
