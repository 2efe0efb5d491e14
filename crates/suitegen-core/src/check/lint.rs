//! Sandboxed lint oracle.
//!
//! The artifact is written under the binding's path prefix, the configured
//! command runs inside the sandbox, and the last JSON line of its stdout is
//! read back as `{except_name, except_mess, except_pos: "line;col"}`.

use std::process;
use std::sync::atomic::{AtomicU64, Ordering};
use std::time::Duration;

use serde::Deserialize;
use tracing::{debug, warn};

use crate::check::sandbox::{ProjectBinding, Sandbox, SandboxProvisioner};
use crate::check::{Checker, CheckerKind};
use crate::config::LintConfig;
use crate::errors::{SuitegenError, SuitegenResult};
use crate::models::{Diagnostic, Position};

/// Placeholder replaced by the artifact path in each command argument.
pub const FILE_PLACEHOLDER: &str = "{file}";

static NEXT_FILE_ID: AtomicU64 = AtomicU64::new(0);

#[derive(Debug, Default, Deserialize)]
struct LintRecord {
    except_name: Option<String>,
    except_mess: Option<String>,
    except_pos: Option<String>,
}

impl LintRecord {
    fn into_diagnostic(self) -> Option<Diagnostic> {
        let name = self.except_name.filter(|n| !n.trim().is_empty())?;
        let diagnostic = Diagnostic::new(name, self.except_mess.unwrap_or_default());
        Some(match self.except_pos.as_deref().and_then(Position::parse) {
            Some(pos) => diagnostic.at(pos),
            None => diagnostic,
        })
    }
}

/// Last stdout line that is a JSON object. Tools print progress before the
/// record, so earlier lines are ignored.
fn parse_record(stdout: &str) -> Option<LintRecord> {
    stdout
        .lines()
        .rev()
        .map(str::trim)
        .filter(|l| l.starts_with('{'))
        .find_map(|l| serde_json::from_str::<LintRecord>(l).ok())
}

struct BoundProject {
    binding: ProjectBinding,
    sandbox: Box<dyn Sandbox>,
}

pub struct LintChecker {
    provisioner: Box<dyn SandboxProvisioner>,
    command: Vec<String>,
    timeout: Duration,
    bound: Option<BoundProject>,
    written: Vec<String>,
}

impl LintChecker {
    pub fn new(provisioner: Box<dyn SandboxProvisioner>, config: &LintConfig) -> Self {
        Self {
            provisioner,
            command: config.command.clone(),
            timeout: config.timeout(),
            bound: None,
            written: Vec::new(),
        }
    }

    /// Bind the checker to one focal project. Any previous binding is
    /// released first.
    pub fn bind_project(&mut self, binding: ProjectBinding) -> SuitegenResult<()> {
        if self.command.is_empty() {
            return Err(SuitegenError::Config("lint command is empty".into()));
        }
        self.unbind()?;
        let sandbox = self.provisioner.provision(&binding)?;
        debug!("lint checker bound to {}", binding.name);
        self.bound = Some(BoundProject { binding, sandbox });
        Ok(())
    }

    pub fn unbind(&mut self) -> SuitegenResult<()> {
        self.clear_resources()?;
        if let Some(mut bound) = self.bound.take() {
            bound.sandbox.shutdown()?;
            debug!("lint checker released {}", bound.binding.name);
        }
        Ok(())
    }

    pub fn binding(&self) -> Option<&ProjectBinding> {
        self.bound.as_ref().map(|b| &b.binding)
    }

    /// Files written since the last `clear_resources`, relative to the root.
    pub fn written_files(&self) -> &[String] {
        &self.written
    }

    fn next_relative_path(prefix: &str) -> String {
        let id = NEXT_FILE_ID.fetch_add(1, Ordering::Relaxed);
        let name = format!("test_suitegen_{}_{id}.py", process::id());
        let prefix = prefix.trim_matches('/');
        if prefix.is_empty() {
            name
        } else {
            format!("{prefix}/{name}")
        }
    }
}

impl Checker for LintChecker {
    fn kind(&self) -> CheckerKind {
        CheckerKind::Lint
    }

    fn check(&mut self, artifact: &str) -> SuitegenResult<Option<Diagnostic>> {
        let bound = self
            .bound
            .as_mut()
            .ok_or_else(|| SuitegenError::NotReady("lint checker has no project bound".into()))?;

        let relative = Self::next_relative_path(&bound.binding.path_prefix);
        let path = bound.sandbox.put_file(&relative, artifact)?;
        self.written.push(relative);

        let command: Vec<String> = self
            .command
            .iter()
            .map(|arg| arg.replace(FILE_PLACEHOLDER, &path))
            .collect();
        let output = bound.sandbox.run(&command, self.timeout)?;
        if output.timed_out {
            warn!("lint command timed out after {:?}", self.timeout);
            return Err(SuitegenError::SandboxTimedOut(self.timeout.as_millis()));
        }

        match parse_record(&output.stdout) {
            Some(record) => Ok(record.into_diagnostic()),
            None => Err(SuitegenError::Sandbox(format!(
                "lint command produced no JSON record (exit {:?}): {}",
                output.exit_code,
                output.stderr.trim()
            ))),
        }
    }

    fn clear_resources(&mut self) -> SuitegenResult<()> {
        let Some(bound) = self.bound.as_mut() else {
            self.written.clear();
            return Ok(());
        };
        for relative in self.written.drain(..) {
            bound.sandbox.remove_file(&relative)?;
        }
        Ok(())
    }
}

impl Drop for LintChecker {
    fn drop(&mut self) {
        let _ = self.unbind();
    }
}
