//! Per-entity composition of generation, syntax repair and lint repair.
//!
//! An entity that exhausts any stage is written to the skip log and the run
//! moves on; configuration errors (wrong response format, unsupported
//! parameters, misuse of a stage) still propagate.

use std::sync::Arc;
use std::time::Duration;

use rayon::prelude::*;
use tracing::{debug, info};

use crate::check::lint::LintChecker;
use crate::check::syntax::SyntacticChecker;
use crate::config::{GenerationConfig, SuitegenConfig};
use crate::errors::{SuitegenError, SuitegenResult};
use crate::llm::accessor::ModelAccessor;
use crate::models::{CacheKey, Entity, EntityKind};
use crate::pipeline::corrector::{Corrector, RepairTemplate};
use crate::pipeline::envelope::ResponseEnvelope;
use crate::pipeline::generator::EntitySuiteGenerator;
use crate::pipeline::prompt::PromptTemplate;
use crate::pipeline::skip::{SkipLog, SkipRecord, SkipStage};
use crate::store::cache::CacheAccessor;

pub const DEFAULT_ENTITY_PROMPT: &str = "Write a pytest test module for the Python {{kind}} \
`{{entity}}` defined in module `{{module}}` (enclosing class: {{class_name}}).\n\n\
```python\n{{source}}\n```\n\n\
Import what you test from `{{module}}`. Cover normal behaviour and edge cases. \
Return only the test module, in a single ```python block.";

const NO_CLASS: &str = "none";

/// Everything one thread needs to process entities: its own chat, model
/// binding and checkers.
pub struct PipelineWorker {
    pub model: ModelAccessor,
    pub syntax: SyntacticChecker,
    /// Lint repair is skipped when no checker is bound.
    pub lint: Option<LintChecker>,
}

impl PipelineWorker {
    pub fn new(model: ModelAccessor, lint: Option<LintChecker>) -> SuitegenResult<Self> {
        Ok(Self {
            model,
            syntax: SyntacticChecker::new()?,
            lint,
        })
    }
}

#[derive(Clone, Debug, PartialEq, Eq)]
pub enum EntityStatus {
    /// `attempts` sums the budget consumed across stages: model round
    /// trips, failed ones included, plus checker runs that timed out
    /// during a correction try.
    Generated {
        artifact: String,
        attempts: u32,
    },
    Skipped {
        stage: SkipStage,
        reason: String,
        attempts: u32,
    },
}

#[derive(Clone, Debug, PartialEq, Eq)]
pub struct EntityOutcome {
    /// Qualified entity name, `Class.method` for methods.
    pub entity: String,
    pub module: String,
    pub status: EntityStatus,
}

impl EntityOutcome {
    pub fn artifact(&self) -> Option<&str> {
        match &self.status {
            EntityStatus::Generated { artifact, .. } => Some(artifact),
            EntityStatus::Skipped { .. } => None,
        }
    }

    pub fn attempts(&self) -> u32 {
        match &self.status {
            EntityStatus::Generated { attempts, .. } | EntityStatus::Skipped { attempts, .. } => {
                *attempts
            }
        }
    }
}

pub struct PipelineDriver {
    cache: CacheAccessor,
    project: String,
    generation: GenerationConfig,
    timeout: Duration,
    prompt: PromptTemplate,
    envelope: ResponseEnvelope,
    skip_log: Option<Arc<SkipLog>>,
}

impl PipelineDriver {
    /// Create a driver for `project`, making sure its cache space exists.
    pub fn new(
        cache: CacheAccessor,
        project: impl Into<String>,
        generation: GenerationConfig,
        timeout: Duration,
    ) -> SuitegenResult<Self> {
        let project = project.into();
        cache.create_project_space(&project)?;
        Ok(Self {
            cache,
            project,
            generation,
            timeout,
            prompt: PromptTemplate::new(DEFAULT_ENTITY_PROMPT),
            envelope: ResponseEnvelope::default(),
            skip_log: None,
        })
    }

    pub fn from_config(config: &SuitegenConfig, project: impl Into<String>) -> SuitegenResult<Self> {
        let cache = CacheAccessor::open(&config.cache.path)?;
        let driver = Self::new(
            cache,
            project,
            config.generation.clone(),
            config.llm.request_timeout(),
        )?;
        Ok(driver.with_skip_log(Arc::new(SkipLog::new(&config.skip_log.path))))
    }

    pub fn with_prompt(mut self, prompt: PromptTemplate) -> Self {
        self.prompt = prompt;
        self
    }

    pub fn with_envelope(mut self, envelope: ResponseEnvelope) -> Self {
        self.envelope = envelope;
        self
    }

    pub fn with_skip_log(mut self, log: Arc<SkipLog>) -> Self {
        self.skip_log = Some(log);
        self
    }

    pub fn cache(&self) -> &CacheAccessor {
        &self.cache
    }

    pub fn project(&self) -> &str {
        &self.project
    }

    pub fn entity_prompt(&self, entity: &Entity) -> SuitegenResult<String> {
        let kind = match entity.kind {
            EntityKind::Function => "function",
            EntityKind::Method => "method",
        };
        let mut prompt = self.prompt.clone();
        prompt
            .set("kind", kind)
            .set("entity", entity.qualified_name())
            .set("module", entity.module.as_str())
            .set("class_name", entity.class_name.as_deref().unwrap_or(NO_CLASS))
            .set("source", entity.source.trim_end());
        prompt.build()
    }

    fn skipped(
        &self,
        entity: &Entity,
        stage: SkipStage,
        reason: String,
        attempts: u32,
    ) -> SuitegenResult<EntityOutcome> {
        let name = entity.qualified_name();
        if let Some(log) = &self.skip_log {
            log.append(&SkipRecord::new(
                &self.project,
                format!("{}.{name}", entity.module),
                stage,
                reason.as_str(),
                attempts,
            ))?;
        }
        Ok(EntityOutcome {
            entity: name,
            module: entity.module.clone(),
            status: EntityStatus::Skipped {
                stage,
                reason,
                attempts,
            },
        })
    }

    /// Run all three stages for `entity`.
    ///
    /// `attempts` in the outcome counts every attempt consumed across stages,
    /// see [`EntityStatus`].
    /// On success the cache entry holding the final artifact is marked as
    /// the entity's terminal result.
    pub fn process_entity(
        &self,
        worker: &mut PipelineWorker,
        entity: &Entity,
    ) -> SuitegenResult<EntityOutcome> {
        let prompt = self.entity_prompt(entity)?;
        let g = &self.generation;
        debug!("processing {}.{}", entity.module, entity.qualified_name());

        let mut generator =
            EntitySuiteGenerator::new(&mut worker.model, &self.cache, &self.project, g.max_tries)
                .with_envelope(self.envelope.clone());
        let generated = generator.generate(&prompt, self.timeout)?;
        let mut attempts = generator.times_tried()?;
        let mut final_key: Option<CacheKey> = generator.result_key().cloned();
        let artifact = match (generated, generator.get_result()?) {
            (true, Some(artifact)) => artifact,
            _ => {
                return self.skipped(
                    entity,
                    SkipStage::Generation,
                    format!("no artifact after {attempts} attempts"),
                    attempts,
                )
            }
        };

        let mut syntax = Corrector::new(
            &mut worker.model,
            &self.cache,
            &mut worker.syntax,
            RepairTemplate::syntax(),
            &self.project,
            g.syntax_tries,
        )
        .with_envelope(self.envelope.clone());
        let clean = syntax.correct(&artifact, self.timeout)?;
        attempts += syntax.times_tried()?;
        if let Some(key) = syntax.result_key() {
            final_key = Some(key.clone());
        }
        let mut artifact = match (clean, syntax.get_result()?) {
            (true, Some(artifact)) => artifact,
            _ => {
                return self.skipped(
                    entity,
                    SkipStage::SyntaxCorrection,
                    format!("still unparseable after {} repairs", g.syntax_tries),
                    attempts,
                )
            }
        };

        if let Some(lint) = worker.lint.as_mut() {
            let mut linter = Corrector::new(
                &mut worker.model,
                &self.cache,
                lint,
                RepairTemplate::lint(),
                &self.project,
                g.lint_tries,
            )
            .with_envelope(self.envelope.clone());
            let clean = linter.correct(&artifact, self.timeout)?;
            attempts += linter.times_tried()?;
            if let Some(key) = linter.result_key() {
                final_key = Some(key.clone());
            }
            artifact = match (clean, linter.get_result()?) {
                (true, Some(artifact)) => artifact,
                _ => {
                    return self.skipped(
                        entity,
                        SkipStage::LintCorrection,
                        format!("lint failures remain after {} repairs", g.lint_tries),
                        attempts,
                    )
                }
            };
        }

        if let Some(key) = final_key {
            self.cache.mark_consumed(&key)?;
        }
        info!(
            "generated suite for {}.{} in {attempts} attempts",
            entity.module,
            entity.qualified_name()
        );
        Ok(EntityOutcome {
            entity: entity.qualified_name(),
            module: entity.module.clone(),
            status: EntityStatus::Generated { artifact, attempts },
        })
    }

    /// Process `entities` in order on one worker.
    pub fn run(
        &self,
        worker: &mut PipelineWorker,
        entities: &[Entity],
    ) -> SuitegenResult<Vec<EntityOutcome>> {
        entities
            .iter()
            .map(|entity| self.process_entity(worker, entity))
            .collect()
    }

    /// Process `entities` in parallel, one worker per rayon thread. Results
    /// keep the input order; an error affects only its own entity.
    pub fn run_batch<F>(&self, entities: &[Entity], make_worker: F) -> Vec<SuitegenResult<EntityOutcome>>
    where
        F: Fn() -> SuitegenResult<PipelineWorker> + Sync + Send,
    {
        entities
            .par_iter()
            .map_init(&make_worker, |worker, entity| match worker {
                Ok(worker) => self.process_entity(worker, entity),
                Err(e) => Err(SuitegenError::Config(format!("worker setup failed: {e}"))),
            })
            .collect()
    }
}
