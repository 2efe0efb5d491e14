//! Suitegen core library: LLM-driven unit-test generation for Python projects.
//!
//! The crate indexes a project into focal entities (functions and methods),
//! asks a model for a test module per entity and pushes every candidate
//! through a syntax oracle and a lint oracle, feeding diagnostics back to the
//! model until the suite is clean or the retry budget runs out. Every
//! extracted artifact is stored in a write-once SQLite cache, so reruns
//! replay earlier exchanges instead of querying the model again.

pub mod check;
pub mod config;
pub mod errors;
pub mod indexer;
pub mod llm;
pub mod models;
pub mod pipeline;
pub mod store;

pub use errors::{SuitegenError, SuitegenResult};
pub use pipeline::driver::{EntityOutcome, EntityStatus, PipelineDriver, PipelineWorker};
pub use store::cache::CacheAccessor;
