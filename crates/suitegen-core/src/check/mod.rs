//! Verification oracles.
//!
//! A checker never treats a broken artifact as an error: the verdict is
//! `Ok(Some(diagnostic))`. `Err` is reserved for the oracle itself failing
//! (sandbox unavailable, timed out, misconfigured).

pub mod lint;
pub mod sandbox;
pub mod syntax;

use std::fmt;

use crate::errors::SuitegenResult;
use crate::models::Diagnostic;

#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub enum CheckerKind {
    Syntax,
    Lint,
}

impl CheckerKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            CheckerKind::Syntax => "syntax",
            CheckerKind::Lint => "lint",
        }
    }
}

impl fmt::Display for CheckerKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

pub trait Checker: Send {
    fn kind(&self) -> CheckerKind;

    /// First failure found in `artifact`, or `None` when it is clean.
    fn check(&mut self, artifact: &str) -> SuitegenResult<Option<Diagnostic>>;

    /// Release temp files and sandbox state accumulated by `check`.
    fn clear_resources(&mut self) -> SuitegenResult<()>;
}
