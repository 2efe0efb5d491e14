//! `{{name}}` placeholder substitution for prompt texts.

use std::collections::BTreeMap;
use std::sync::LazyLock;

use regex::{Captures, Regex};

use crate::errors::{SuitegenError, SuitegenResult};

static PLACEHOLDER_RE: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"\{\{\s*([A-Za-z_][A-Za-z0-9_]*)\s*\}\}").unwrap());

#[derive(Clone, Debug, PartialEq, Eq)]
pub struct PromptTemplate {
    text: String,
    values: BTreeMap<String, String>,
}

impl PromptTemplate {
    pub fn new(text: impl Into<String>) -> Self {
        Self {
            text: text.into(),
            values: BTreeMap::new(),
        }
    }

    pub fn text(&self) -> &str {
        &self.text
    }

    /// Placeholder names in order of first appearance.
    pub fn placeholders(&self) -> Vec<String> {
        let mut seen = Vec::new();
        for caps in PLACEHOLDER_RE.captures_iter(&self.text) {
            let name = caps[1].to_string();
            if !seen.contains(&name) {
                seen.push(name);
            }
        }
        seen
    }

    pub fn set(&mut self, name: &str, value: impl Into<String>) -> &mut Self {
        self.values.insert(name.to_string(), value.into());
        self
    }

    /// Forget all values, keeping the text.
    pub fn reset(&mut self) {
        self.values.clear();
    }

    /// Substitute every placeholder in one pass. Values are inserted
    /// verbatim and never rescanned.
    pub fn build(&self) -> SuitegenResult<String> {
        if let Some(missing) = self
            .placeholders()
            .into_iter()
            .find(|name| !self.values.contains_key(name))
        {
            return Err(SuitegenError::UnsetPlaceholder(missing));
        }
        let built = PLACEHOLDER_RE.replace_all(&self.text, |caps: &Captures<'_>| {
            self.values.get(&caps[1]).cloned().unwrap_or_default()
        });
        Ok(built.into_owned())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_build_substitutes_all() {
        let mut template = PromptTemplate::new("Test {{entity}} in {{ module }}. Again: {{entity}}");
        template.set("entity", "foo").set("module", "pkg.mod");
        assert_eq!(template.build().unwrap(), "Test foo in pkg.mod. Again: foo");
        assert_eq!(template.placeholders(), vec!["entity", "module"]);
    }

    #[test]
    fn test_unset_placeholder_is_named() {
        let mut template = PromptTemplate::new("{{a}} {{b}} {{c}}");
        template.set("a", "1");
        match template.build() {
            Err(SuitegenError::UnsetPlaceholder(name)) => assert_eq!(name, "b"),
            other => panic!("unexpected {other:?}"),
        }
    }

    #[test]
    fn test_values_are_not_rescanned() {
        let mut template = PromptTemplate::new("code: {{code}}");
        template.set("code", "x = '{{entity}}'");
        assert_eq!(template.build().unwrap(), "code: x = '{{entity}}'");
    }

    #[test]
    fn test_reset_clears_values() {
        let mut template = PromptTemplate::new("{{a}}");
        template.set("a", "1");
        template.reset();
        assert!(template.build().is_err());
        assert_eq!(PromptTemplate::new("plain").build().unwrap(), "plain");
    }
}
