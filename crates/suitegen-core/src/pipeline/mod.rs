//! Generation, verification and repair for code entities.
//!
//! [`driver::PipelineDriver`] runs, per entity, an
//! [`generator::EntitySuiteGenerator`] followed by a syntactic and a lint
//! [`corrector::Corrector`]. Every model exchange goes through
//! [`exchange::fetch_artifact`] and is therefore cached.

pub mod corrector;
pub mod driver;
pub mod envelope;
pub mod exchange;
pub mod generator;
pub mod prompt;
pub mod skip;
