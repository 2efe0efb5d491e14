//! Discovery of focal Python modules under a project root.

use std::path::{Path, PathBuf};

use ignore::WalkBuilder;
use tracing::warn;

use crate::errors::{SuitegenError, SuitegenResult};

/// Project-local ignore file, read in addition to `.gitignore`.
pub const IGNORE_FILE_NAME: &str = ".suitegenignore";

const IMPLICIT_IGNORED_DIRS: &[&str] = &[
    ".git",
    ".suitegen",
    "__pycache__",
    ".venv",
    "venv",
    ".tox",
    "node_modules",
];

/// Leading directories that are not part of the import path.
const SOURCE_ROOTS: &[&str] = &["src", "lib"];

#[derive(Clone, Debug, PartialEq, Eq)]
pub struct FocalModule {
    pub path: PathBuf,
    /// `/`-separated path relative to the project root.
    pub relative: String,
    /// Dotted import name, e.g. `pkg.utils`.
    pub module: String,
}

/// Test modules and pytest plumbing are never focal.
pub fn is_test_file(file_name: &str) -> bool {
    file_name == "conftest.py"
        || (file_name.starts_with("test_") && file_name.ends_with(".py"))
        || file_name.ends_with("_test.py")
}

/// Convert a relative file path to a dotted module name.
///
/// The extension is dropped, a trailing `__init__` names its package and a
/// leading `src/` or `lib/` is not part of the name.
pub fn to_module_name(relative: &str) -> String {
    let without_ext = Path::new(relative).with_extension("");
    let mut parts: Vec<&str> = without_ext
        .components()
        .filter_map(|c| match c {
            std::path::Component::Normal(os) => os.to_str(),
            _ => None,
        })
        .filter(|s| !s.is_empty())
        .collect();
    if parts.len() > 1 && SOURCE_ROOTS.contains(&parts[0]) {
        parts.remove(0);
    }
    if parts.len() > 1 && parts.last() == Some(&"__init__") {
        parts.pop();
    }
    parts.join(".")
}

/// All non-test `.py` files under `root`, honouring `.gitignore` and
/// [`IGNORE_FILE_NAME`], sorted by relative path.
pub fn discover_modules(root: &Path) -> SuitegenResult<Vec<FocalModule>> {
    if !root.is_dir() {
        return Err(SuitegenError::NotExists(format!(
            "project root {}",
            root.display()
        )));
    }

    let walker = WalkBuilder::new(root)
        .hidden(true)
        .git_ignore(true)
        .require_git(false)
        .add_custom_ignore_filename(IGNORE_FILE_NAME)
        .filter_entry(|entry| {
            let is_dir = entry.file_type().is_some_and(|t| t.is_dir());
            !(is_dir
                && IMPLICIT_IGNORED_DIRS
                    .iter()
                    .any(|d| entry.file_name() == std::ffi::OsStr::new(d)))
        })
        .build();

    let mut modules = Vec::new();
    for entry in walker {
        let entry = match entry {
            Ok(entry) => entry,
            Err(e) => {
                warn!("skipping unreadable path under {}: {e}", root.display());
                continue;
            }
        };
        if !entry.file_type().is_some_and(|t| t.is_file()) {
            continue;
        }
        let path = entry.path();
        if path.extension().and_then(|e| e.to_str()) != Some("py") {
            continue;
        }
        let file_name = entry.file_name().to_string_lossy();
        if is_test_file(&file_name) {
            continue;
        }
        let relative = path
            .strip_prefix(root)
            .unwrap_or(path)
            .to_string_lossy()
            .replace('\\', "/");
        if relative.split('/').any(|part| part == "tests") {
            continue;
        }
        modules.push(FocalModule {
            path: path.to_path_buf(),
            module: to_module_name(&relative),
            relative,
        });
    }
    modules.sort_by(|a, b| a.relative.cmp(&b.relative));
    Ok(modules)
}
