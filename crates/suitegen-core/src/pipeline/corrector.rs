//! Check-and-repair loop shared by the syntactic and lint passes.
//!
//! ```text
//! idle --start_new_correction--> correcting --perform_one_try*--> {succeeded, failed}
//! ```
//!
//! Each try re-checks the current artifact; a clean verdict ends the session,
//! otherwise a repair prompt carrying the artifact and its diagnostic is sent
//! and the reply becomes the new artifact. After `max_tries` repairs the
//! session fails and the artifact is discarded. The checker's resources are
//! released exactly once per session, when it terminates.

use std::time::Duration;

use tracing::{debug, info, warn};

use crate::check::lint::LintChecker;
use crate::check::syntax::SyntacticChecker;
use crate::check::Checker;
use crate::errors::{SuitegenError, SuitegenResult};
use crate::llm::accessor::ModelAccessor;
use crate::models::{AttemptState, CacheKey, Diagnostic};
use crate::pipeline::envelope::ResponseEnvelope;
use crate::pipeline::exchange::{fetch_artifact, model_name, ExchangeContext};
use crate::pipeline::prompt::PromptTemplate;
use crate::store::cache::CacheAccessor;

const UNKNOWN_POSITION: &str = "unknown";

const SYNTAX_REPAIR_TEXT: &str = "The following Python test module does not parse.\n\n\
```python\n{{code}}\n```\n\n\
{{error_name}} at line {{error_line}}, column {{error_column}}: {{error_message}}\n\n\
Fix the syntax error and return the complete corrected module in a single ```python block.";

const LINT_REPAIR_TEXT: &str = "The following Python test module fails static analysis.\n\n\
```python\n{{code}}\n```\n\n\
{{error_name}} at line {{error_line}}, column {{error_column}}: {{error_message}}\n\n\
Fix the reported problem without removing tests and return the complete corrected module \
in a single ```python block.";

/// Builds the repair prompt from an artifact and its diagnostic.
#[derive(Clone, Debug)]
pub struct RepairTemplate {
    template: PromptTemplate,
}

impl RepairTemplate {
    pub const PLACEHOLDERS: [&'static str; 5] = [
        "code",
        "error_name",
        "error_message",
        "error_line",
        "error_column",
    ];

    pub fn new(text: impl Into<String>) -> SuitegenResult<Self> {
        let template = PromptTemplate::new(text);
        if let Some(unknown) = template
            .placeholders()
            .into_iter()
            .find(|p| !Self::PLACEHOLDERS.contains(&p.as_str()))
        {
            return Err(SuitegenError::Config(format!(
                "repair template uses unknown placeholder {unknown}"
            )));
        }
        Ok(Self { template })
    }

    pub fn syntax() -> Self {
        Self {
            template: PromptTemplate::new(SYNTAX_REPAIR_TEXT),
        }
    }

    pub fn lint() -> Self {
        Self {
            template: PromptTemplate::new(LINT_REPAIR_TEXT),
        }
    }

    pub fn render(&self, artifact: &str, diagnostic: &Diagnostic) -> SuitegenResult<String> {
        let (line, column) = match diagnostic.position {
            Some(pos) => (pos.line.to_string(), pos.column.to_string()),
            None => (UNKNOWN_POSITION.to_string(), UNKNOWN_POSITION.to_string()),
        };
        let mut template = self.template.clone();
        template
            .set("code", artifact.trim_end())
            .set("error_name", diagnostic.name.as_str())
            .set("error_message", diagnostic.message.as_str())
            .set("error_line", line)
            .set("error_column", column);
        template.build()
    }
}

pub struct Corrector<'a, C: Checker> {
    model: &'a mut ModelAccessor,
    cache: &'a CacheAccessor,
    checker: &'a mut C,
    template: RepairTemplate,
    envelope: ResponseEnvelope,
    project: String,
    max_tries: u32,
    timeout: Duration,
    state: Option<AttemptState>,
    /// Verdict for the current artifact, when it is already known.
    fresh_verdict: Option<Option<Diagnostic>>,
    result_key: Option<CacheKey>,
    released: bool,
}

pub type SyntacticCorrector<'a> = Corrector<'a, SyntacticChecker>;
pub type LintCorrector<'a> = Corrector<'a, LintChecker>;

impl<'a, C: Checker> Corrector<'a, C> {
    pub fn new(
        model: &'a mut ModelAccessor,
        cache: &'a CacheAccessor,
        checker: &'a mut C,
        template: RepairTemplate,
        project: impl Into<String>,
        max_tries: u32,
    ) -> Self {
        Self {
            model,
            cache,
            checker,
            template,
            envelope: ResponseEnvelope::default(),
            project: project.into(),
            max_tries,
            timeout: Duration::ZERO,
            state: None,
            fresh_verdict: None,
            result_key: None,
            released: true,
        }
    }

    pub fn with_envelope(mut self, envelope: ResponseEnvelope) -> Self {
        self.envelope = envelope;
        self
    }

    /// Open a session on `artifact` and check it once.
    pub fn start_new_correction(&mut self, artifact: &str, timeout: Duration) -> SuitegenResult<()> {
        if self.state.as_ref().is_some_and(|s| s.in_progress) {
            return Err(SuitegenError::InProgress);
        }
        self.timeout = timeout;
        self.result_key = None;
        self.released = false;
        self.state = Some(AttemptState::started(Some(artifact.to_string())));
        debug!("{} correction started for {}", self.checker.kind(), self.project);

        match self.checker.check(artifact) {
            Ok(verdict) => {
                self.fresh_verdict = Some(verdict);
                Ok(())
            }
            Err(e) if e.is_transient() => {
                warn!("{} check failed, will retry: {e}", self.checker.kind());
                self.fresh_verdict = None;
                Ok(())
            }
            Err(e) => {
                self.abort();
                Err(e)
            }
        }
    }

    /// Advance the open session by one step.
    pub fn perform_one_try(&mut self) -> SuitegenResult<()> {
        let state = match &self.state {
            None => return Err(SuitegenError::NeverPerformed),
            Some(s) if !s.in_progress => {
                return Err(SuitegenError::NotReady(
                    "no correction session is open".into(),
                ))
            }
            Some(s) => s.clone(),
        };
        let artifact = state.last_artifact.clone().unwrap_or_default();

        let verdict = match self.fresh_verdict.take() {
            Some(verdict) => verdict,
            None => match self.checker.check(&artifact) {
                Ok(verdict) => verdict,
                Err(e) if e.is_transient() => {
                    warn!("{} check failed: {e}", self.checker.kind());
                    let next = state.tried(None);
                    if next.times_tried >= self.max_tries {
                        return self.finish(next.failed());
                    }
                    self.state = Some(next);
                    return Ok(());
                }
                Err(e) => {
                    self.abort();
                    return Err(e);
                }
            },
        };

        let Some(diagnostic) = verdict else {
            info!(
                "{} correction for {} succeeded after {} repairs",
                self.checker.kind(),
                self.project,
                state.times_tried
            );
            return self.finish(state.succeeded());
        };
        if state.times_tried >= self.max_tries {
            info!(
                "{} correction for {} exhausted: {diagnostic}",
                self.checker.kind(),
                self.project
            );
            return self.finish(state.failed());
        }

        let next = state.times_tried + 1;
        let prepared = self
            .template
            .render(&artifact, &diagnostic)
            .and_then(|prompt| Ok((self.resume_attempt(&prompt, next)?, prompt)));
        let (attempt, prompt) = match prepared {
            Ok(prepared) => prepared,
            Err(e) => {
                self.abort();
                return Err(e);
            }
        };
        if attempt > next {
            debug!(
                "{} repair for {} resumes at stored attempt {attempt}",
                self.checker.kind(),
                self.project
            );
        }
        let state = (next..attempt).fold(state, |s, _| s.tried(None));
        let ctx = ExchangeContext {
            cache: self.cache,
            envelope: &self.envelope,
            project: &self.project,
        };
        match fetch_artifact(self.model, ctx, &prompt, attempt, self.timeout) {
            Ok(fetched) => {
                debug!(
                    "{} repair {attempt}/{} for {}",
                    self.checker.kind(),
                    self.max_tries,
                    self.project
                );
                self.result_key = Some(fetched.key);
                self.state = Some(state.tried(Some(fetched.artifact)));
                Ok(())
            }
            Err(e) if e.is_transient() => {
                warn!(
                    "{} repair {attempt}/{} for {} failed: {e}",
                    self.checker.kind(),
                    self.max_tries,
                    self.project
                );
                // The artifact is unchanged, so its diagnostic still holds.
                self.fresh_verdict = Some(Some(diagnostic));
                self.state = Some(state.tried(None));
                Ok(())
            }
            Err(e) => {
                self.abort();
                Err(e)
            }
        }
    }

    /// Start on `artifact` and try until the session terminates. Returns
    /// whether it succeeded.
    pub fn correct(&mut self, artifact: &str, timeout: Duration) -> SuitegenResult<bool> {
        self.start_new_correction(artifact, timeout)?;
        while !self.has_terminated()? {
            self.perform_one_try()?;
        }
        self.has_succeeded()
    }

    fn finish(&mut self, state: AttemptState) -> SuitegenResult<()> {
        self.state = Some(state);
        self.fresh_verdict = None;
        self.release()
    }

    /// End the session as a failure after a propagated error. A release
    /// failure is logged so the caller still sees the original error.
    fn abort(&mut self) {
        let failed = self
            .state
            .as_ref()
            .map(AttemptState::failed)
            .unwrap_or_default();
        if let Err(e) = self.finish(failed) {
            warn!(
                "{} resources for {} not released: {e}",
                self.checker.kind(),
                self.project
            );
        }
    }

    /// The attempt to fetch `prompt` at. Normally `next`; when an earlier
    /// run stored this prompt only at later attempts (its first tries
    /// failed transiently), the lowest of those within budget.
    fn resume_attempt(&self, prompt: &str, next: u32) -> SuitegenResult<u32> {
        let model = model_name(self.model)?;
        if self.cache.exists(&self.project, prompt, &model, next)? {
            return Ok(next);
        }
        let stored = self
            .cache
            .entries_for_prompt(&self.project, prompt, &model)?
            .into_iter()
            .map(|(attempt, _)| attempt)
            .find(|attempt| (next..=self.max_tries).contains(attempt));
        Ok(stored.unwrap_or(next))
    }

    fn release(&mut self) -> SuitegenResult<()> {
        if self.released {
            return Ok(());
        }
        self.released = true;
        self.checker.clear_resources()
    }

    // -- queries --------------------------------------------------------------

    pub fn has_terminated(&self) -> SuitegenResult<bool> {
        let state = self.state.as_ref().ok_or(SuitegenError::NeverPerformed)?;
        Ok(!state.in_progress)
    }

    fn terminated_state(&self) -> SuitegenResult<&AttemptState> {
        let state = self.state.as_ref().ok_or(SuitegenError::NeverPerformed)?;
        if state.in_progress {
            return Err(SuitegenError::InProgress);
        }
        Ok(state)
    }

    pub fn has_succeeded(&self) -> SuitegenResult<bool> {
        Ok(self.terminated_state()?.succeeded)
    }

    /// The corrected artifact, or `None` after a failed session.
    pub fn get_result(&self) -> SuitegenResult<Option<String>> {
        Ok(self.terminated_state()?.last_artifact.clone())
    }

    /// Attempts consumed by the current or last session: repair round trips
    /// plus checks that failed transiently during a try.
    pub fn times_tried(&self) -> SuitegenResult<u32> {
        Ok(self
            .state
            .as_ref()
            .ok_or(SuitegenError::NeverPerformed)?
            .times_tried)
    }

    /// Cache key of the last repaired artifact. `None` when the session did
    /// not change the artifact it started with.
    pub fn result_key(&self) -> Option<&CacheKey> {
        self.result_key.as_ref()
    }
}
