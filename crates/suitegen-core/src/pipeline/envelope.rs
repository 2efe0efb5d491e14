//! Extraction of the artifact from a model reply.

use std::sync::LazyLock;

use regex::Regex;

use crate::errors::{SuitegenError, SuitegenResult};

/// A complete fenced block: an opening fence with an optional info string
/// and a closing fence, both on lines of their own.
static FENCED_BLOCK_RE: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r"(?ms)^[ \t]*```[ \t]*([^\n`]*?)[ \t]*\r?\n(.*?)^[ \t]*```[ \t]*\r?$").unwrap()
});

/// An opening python or untagged fence whose closing fence may trail the
/// last line of code.
static OPEN_FENCE_RE: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r"(?ms)^[ \t]*```(?:python3?|py)?[ \t]*\r?\n(.*?)```").unwrap()
});

const PYTHON_TAGS: &[&str] = &["python", "python3", "py"];

const PREVIEW_LIMIT: usize = 80;

#[derive(Clone, Debug)]
enum Matcher {
    /// Markdown fences, preferring python-tagged blocks over untagged ones.
    Fenced,
    /// Exactly one capture group holding the artifact.
    Pattern(Regex),
}

/// Locates the artifact inside a model reply.
#[derive(Clone, Debug)]
pub struct ResponseEnvelope {
    matcher: Matcher,
}

impl Default for ResponseEnvelope {
    fn default() -> Self {
        Self {
            matcher: Matcher::Fenced,
        }
    }
}

/// The code of the first python block, else of the first untagged block.
/// Text after the last complete block may still hold a block closed on
/// its final code line.
fn fenced_artifact(response: &str) -> Option<&str> {
    let mut untagged = None;
    let mut tail_start = 0;
    for caps in FENCED_BLOCK_RE.captures_iter(response) {
        let (Some(whole), Some(tag), Some(body)) = (caps.get(0), caps.get(1), caps.get(2)) else {
            continue;
        };
        tail_start = whole.end();
        let tag = tag.as_str().split_whitespace().next().unwrap_or_default();
        if PYTHON_TAGS.iter().any(|t| tag.eq_ignore_ascii_case(t)) {
            return Some(body.as_str());
        }
        if tag.is_empty() && untagged.is_none() {
            untagged = Some(body.as_str());
        }
    }
    untagged.or_else(|| {
        let tail = response.get(tail_start..)?;
        OPEN_FENCE_RE
            .captures(tail)
            .and_then(|c| c.get(1))
            .map(|m| m.as_str())
    })
}

impl ResponseEnvelope {
    pub fn new(pattern: &str) -> SuitegenResult<Self> {
        let pattern = Regex::new(pattern)?;
        if pattern.captures_len() != 2 {
            return Err(SuitegenError::Config(format!(
                "response envelope needs exactly one capture group, got {}",
                pattern.captures_len() - 1
            )));
        }
        Ok(Self {
            matcher: Matcher::Pattern(pattern),
        })
    }

    pub fn pattern(&self) -> &str {
        match &self.matcher {
            Matcher::Fenced => FENCED_BLOCK_RE.as_str(),
            Matcher::Pattern(re) => re.as_str(),
        }
    }

    /// The captured block, trimmed. A reply without a match, or with an
    /// empty block, is a `WrongResponseFormat`.
    pub fn extract(&self, response: &str) -> SuitegenResult<String> {
        let captured = match &self.matcher {
            Matcher::Fenced => fenced_artifact(response),
            Matcher::Pattern(re) => re
                .captures(response)
                .and_then(|c| c.get(1))
                .map(|m| m.as_str()),
        };
        match captured.map(str::trim).filter(|s| !s.is_empty()) {
            Some(code) => Ok(format!("{code}\n")),
            None => {
                let preview: String = response.chars().take(PREVIEW_LIMIT).collect();
                Err(SuitegenError::WrongResponseFormat(format!(
                    "no artifact matched {} in reply starting {preview:?}",
                    self.pattern()
                )))
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_extracts_tagged_fence() {
        let reply = "Here you go:\n```python\ndef test_foo():\n    assert foo() == 1\n```\nDone.";
        assert_eq!(
            ResponseEnvelope::default().extract(reply).unwrap(),
            "def test_foo():\n    assert foo() == 1\n"
        );
    }

    #[test]
    fn test_python_block_preferred_over_untagged() {
        let reply = "```\nfirst = 1\n```\n```python\nsecond = 2\n```";
        assert_eq!(ResponseEnvelope::default().extract(reply).unwrap(), "second = 2\n");
    }

    #[test]
    fn test_untagged_fence_used_without_python_block() {
        let reply = "```\nfirst = 1\n```\n```\nsecond = 2\n```";
        assert_eq!(ResponseEnvelope::default().extract(reply).unwrap(), "first = 1\n");
    }

    #[test]
    fn test_other_language_block_is_skipped() {
        let reply = "Install first:\n```bash\npip install pytest\n```\nThen the tests:\n\
                     ```python\ndef test_x():\n    assert True\n```\n";
        assert_eq!(
            ResponseEnvelope::default().extract(reply).unwrap(),
            "def test_x():\n    assert True\n"
        );
    }

    #[test]
    fn test_block_closed_on_code_line_after_other_block() {
        let reply = "```bash\npip install pytest\n```\nThen:\n```python\ndef test_x(): ...```";
        assert_eq!(
            ResponseEnvelope::default().extract(reply).unwrap(),
            "def test_x(): ...\n"
        );
    }

    #[test]
    fn test_only_other_language_blocks_is_wrong_format() {
        let reply = "```bash\npip install pytest\n```\nno tests here";
        assert!(matches!(
            ResponseEnvelope::default().extract(reply),
            Err(SuitegenError::WrongResponseFormat(_))
        ));
    }

    #[test]
    fn test_missing_fence_is_wrong_format() {
        let err = ResponseEnvelope::default()
            .extract("def test_foo(): pass")
            .unwrap_err();
        assert!(matches!(err, SuitegenError::WrongResponseFormat(_)));
        assert!(!err.is_transient());
    }

    #[test]
    fn test_empty_block_is_wrong_format() {
        assert!(ResponseEnvelope::default().extract("```python\n\n```").is_err());
    }

    #[test]
    fn test_custom_pattern_needs_one_group() {
        assert!(ResponseEnvelope::new(r"<code>(.*)</code>").is_ok());
        assert!(matches!(
            ResponseEnvelope::new(r"<code>.*</code>"),
            Err(SuitegenError::Config(_))
        ));
        let envelope = ResponseEnvelope::new(r"(?s)<code>(.*?)</code>").unwrap();
        assert_eq!(envelope.extract("<code>x = 1</code>").unwrap(), "x = 1\n");
    }
}
