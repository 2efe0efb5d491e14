//! First-artifact generation for one entity.
//!
//! `idle --generate--> generating --> {succeeded, skipped}`. Transport
//! failures consume an attempt and loop; a reply in the wrong format is a
//! configuration problem and propagates at once.

use std::time::Duration;

use tracing::{debug, info, warn};

use crate::errors::{SuitegenError, SuitegenResult};
use crate::llm::accessor::ModelAccessor;
use crate::models::{AttemptState, CacheKey};
use crate::pipeline::envelope::ResponseEnvelope;
use crate::pipeline::exchange::{fetch_artifact, model_name, ExchangeContext};
use crate::store::cache::CacheAccessor;

pub struct EntitySuiteGenerator<'a> {
    model: &'a mut ModelAccessor,
    cache: &'a CacheAccessor,
    envelope: ResponseEnvelope,
    project: String,
    max_tries: u32,
    state: Option<AttemptState>,
    result_key: Option<CacheKey>,
}

impl<'a> EntitySuiteGenerator<'a> {
    pub fn new(
        model: &'a mut ModelAccessor,
        cache: &'a CacheAccessor,
        project: impl Into<String>,
        max_tries: u32,
    ) -> Self {
        Self {
            model,
            cache,
            envelope: ResponseEnvelope::default(),
            project: project.into(),
            max_tries,
            state: None,
            result_key: None,
        }
    }

    pub fn with_envelope(mut self, envelope: ResponseEnvelope) -> Self {
        self.envelope = envelope;
        self
    }

    /// Obtain an artifact for `prompt` in at most `max_tries` round trips.
    ///
    /// Returns whether one was obtained. When an earlier run already stored
    /// an artifact for this prompt, generation resumes at that attempt and
    /// replays it instead of re-querying the model.
    pub fn generate(&mut self, prompt: &str, timeout: Duration) -> SuitegenResult<bool> {
        let model = model_name(self.model)?;
        self.result_key = None;
        let mut state = AttemptState::started(None);

        let resume_at = self
            .cache
            .entries_for_prompt(&self.project, prompt, &model)?
            .into_iter()
            .map(|(attempt, _)| attempt)
            .find(|attempt| (1..=self.max_tries).contains(attempt));
        if let Some(attempt) = resume_at {
            debug!("resuming generation for {} at attempt {attempt}", self.project);
            for _ in 1..attempt {
                state = state.tried(None);
            }
        }
        self.state = Some(state.clone());

        let ctx = ExchangeContext {
            cache: self.cache,
            envelope: &self.envelope,
            project: &self.project,
        };
        while state.times_tried < self.max_tries {
            let attempt = state.times_tried + 1;
            match fetch_artifact(self.model, ctx, prompt, attempt, timeout) {
                Ok(fetched) => {
                    state = state.tried(Some(fetched.artifact)).succeeded();
                    self.result_key = Some(fetched.key);
                    self.state = Some(state);
                    return Ok(true);
                }
                Err(e) if e.is_transient() => {
                    warn!(
                        "generation attempt {attempt}/{} for {} failed: {e}",
                        self.max_tries, self.project
                    );
                    state = state.tried(None);
                    self.state = Some(state.clone());
                }
                Err(e) => {
                    self.state = Some(state.failed());
                    return Err(e);
                }
            }
        }

        info!(
            "generation for {} skipped after {} attempts",
            self.project, state.times_tried
        );
        self.state = Some(state.failed());
        Ok(false)
    }

    fn require_state(&self) -> SuitegenResult<&AttemptState> {
        self.state
            .as_ref()
            .ok_or(SuitegenError::InvalidPreviousGeneration)
    }

    pub fn state(&self) -> SuitegenResult<&AttemptState> {
        self.require_state()
    }

    pub fn has_succeeded(&self) -> SuitegenResult<bool> {
        Ok(self.require_state()?.succeeded)
    }

    pub fn get_result(&self) -> SuitegenResult<Option<String>> {
        Ok(self.require_state()?.last_artifact.clone())
    }

    pub fn times_tried(&self) -> SuitegenResult<u32> {
        Ok(self.require_state()?.times_tried)
    }

    /// Cache key of the artifact returned by `get_result`.
    pub fn result_key(&self) -> Option<&CacheKey> {
        self.result_key.as_ref()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::errors::{ConnectionFailure, ResponseFailure};
    use crate::llm::catalog::known_model;
    use crate::llm::chat::ChatSession;
    use crate::llm::scripted::ScriptedBackend;
    use crate::models::Platform;

    const TIMEOUT: Duration = Duration::from_secs(5);
    const MODEL: &str = "qwen2.5-coder:7b";

    fn setup() -> (tempfile::TempDir, CacheAccessor, ModelAccessor, ScriptedBackend) {
        let dir = tempfile::tempdir().unwrap();
        let cache = CacheAccessor::open(dir.path().join("cache.db")).unwrap();
        cache.create_project_space("proj").unwrap();
        let backend = ScriptedBackend::new(Platform::Ollama);
        let mut model = ModelAccessor::new(Box::new(backend.clone()));
        model.init(ChatSession::new([Platform::Ollama])).unwrap();
        model.select_model(known_model(MODEL).unwrap()).unwrap();
        (dir, cache, model, backend)
    }

    fn timeout_error() -> SuitegenError {
        SuitegenError::ResponseTimedOut("no reply".into())
    }

    #[test]
    fn test_queries_before_generation_fail() {
        let (_dir, cache, mut model, _backend) = setup();
        let generator = EntitySuiteGenerator::new(&mut model, &cache, "proj", 3);
        assert!(matches!(
            generator.has_succeeded(),
            Err(SuitegenError::InvalidPreviousGeneration)
        ));
        assert!(matches!(
            generator.get_result(),
            Err(SuitegenError::InvalidPreviousGeneration)
        ));
        assert!(generator.times_tried().is_err());
        assert!(generator.state().is_err());
    }

    #[test]
    fn test_first_attempt_succeeds() {
        let (_dir, cache, mut model, backend) = setup();
        backend.push_reply("```python\ndef test_foo():\n    assert True\n```");
        let mut generator = EntitySuiteGenerator::new(&mut model, &cache, "proj", 3);
        assert!(generator.generate("test foo", TIMEOUT).unwrap());
        assert!(generator.has_succeeded().unwrap());
        assert_eq!(generator.times_tried().unwrap(), 1);
        assert_eq!(
            generator.get_result().unwrap().unwrap(),
            "def test_foo():\n    assert True\n"
        );
        assert_eq!(generator.result_key().unwrap().attempt, 1);
        assert!(!generator.state().unwrap().in_progress);
    }

    #[test]
    fn test_transient_errors_are_retried_up_to_bound() {
        let (_dir, cache, mut model, backend) = setup();
        backend
            .push_error(timeout_error())
            .push_error(SuitegenError::Connection {
                kind: ConnectionFailure::Timeout,
                message: "slow".into(),
            })
            .push_error(SuitegenError::Response {
                kind: ResponseFailure::Unknown,
                message: "500".into(),
            })
            .push_reply("```\nnever = 1\n```");
        let mut generator = EntitySuiteGenerator::new(&mut model, &cache, "proj", 3);
        assert!(!generator.generate("p", TIMEOUT).unwrap());
        assert_eq!(generator.times_tried().unwrap(), 3);
        assert!(!generator.has_succeeded().unwrap());
        assert_eq!(generator.get_result().unwrap(), None);
        drop(generator);
        assert_eq!(backend.calls(), 3);
        assert_eq!(backend.pending(), 1);
    }

    #[test]
    fn test_success_after_transient_failure() {
        let (_dir, cache, mut model, backend) = setup();
        backend
            .push_error(timeout_error())
            .push_reply("```\nok = 1\n```");
        let mut generator = EntitySuiteGenerator::new(&mut model, &cache, "proj", 3);
        assert!(generator.generate("p", TIMEOUT).unwrap());
        assert_eq!(generator.times_tried().unwrap(), 2);
        assert_eq!(generator.result_key().unwrap().attempt, 2);
        assert!(cache.exists("proj", "p", MODEL, 2).unwrap());
    }

    #[test]
    fn test_wrong_format_is_not_retried() {
        let (_dir, cache, mut model, backend) = setup();
        backend.push_reply("no code here").push_reply("```\nok = 1\n```");
        let mut generator = EntitySuiteGenerator::new(&mut model, &cache, "proj", 3);
        assert!(matches!(
            generator.generate("p", TIMEOUT),
            Err(SuitegenError::WrongResponseFormat(_))
        ));
        assert!(!generator.has_succeeded().unwrap());
        drop(generator);
        assert_eq!(backend.calls(), 1);
    }

    #[test]
    fn test_rerun_is_served_from_cache() {
        let (_dir, cache, mut model, backend) = setup();
        backend
            .push_error(timeout_error())
            .push_reply("```\nok = 1\n```");
        {
            let mut generator = EntitySuiteGenerator::new(&mut model, &cache, "proj", 3);
            assert!(generator.generate("p", TIMEOUT).unwrap());
        }
        let mut generator = EntitySuiteGenerator::new(&mut model, &cache, "proj", 3);
        assert!(generator.generate("p", TIMEOUT).unwrap());
        assert_eq!(generator.get_result().unwrap().unwrap(), "ok = 1\n");
        assert_eq!(generator.times_tried().unwrap(), 2);
        drop(generator);
        assert_eq!(backend.calls(), 2);
        assert_eq!(cache.count("proj").unwrap(), 1);
    }

    #[test]
    fn test_zero_budget_skips_without_calls() {
        let (_dir, cache, mut model, backend) = setup();
        let mut generator = EntitySuiteGenerator::new(&mut model, &cache, "proj", 0);
        assert!(!generator.generate("p", TIMEOUT).unwrap());
        assert_eq!(generator.times_tried().unwrap(), 0);
        drop(generator);
        assert_eq!(backend.calls(), 0);
    }
}
