//! Prompt template model and content helpers.
//!
//! A [`Template`] is the unit of optimization: text with `{{variable}}`
//! placeholders plus descriptive metadata. Templates are immutable once
//! handed to the pipeline; the store owns their lifecycle.

pub mod store;

pub use store::{FsTemplateStore, TemplateInfo, TemplateStore};

use regex::Regex;
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::sync::OnceLock;

/// Declared type of a template variable.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum VariableType {
    String,
    Number,
    Boolean,
    List,
}

/// A prompt template with `{{variable}}` placeholders.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Template {
    /// Stable identifier used for cache invalidation and baselines.
    pub id: String,
    /// Human-readable name.
    pub name: String,
    /// Template text containing `{{variable}}` placeholders.
    pub content: String,
    /// Declared variables (name -> type).
    #[serde(default)]
    pub variables: HashMap<String, VariableType>,
    /// Grouping category (also keyed into quality baselines).
    pub category: String,
    /// Template version string.
    pub version: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub author: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub description: Option<String>,
}

impl Template {
    /// Create a template with the given id, content and category.
    ///
    /// Variables are extracted from the content automatically and
    /// default to the string type.
    pub fn new(
        id: impl Into<String>,
        content: impl Into<String>,
        category: impl Into<String>,
    ) -> Self {
        let id = id.into();
        let content = content.into();
        let variables = extract_variables(&content)
            .into_iter()
            .map(|name| (name, VariableType::String))
            .collect();
        Self {
            name: id.clone(),
            id,
            content,
            variables,
            category: category.into(),
            version: "1.0.0".to_string(),
            author: None,
            description: None,
        }
    }

    /// Set the display name.
    pub fn with_name(mut self, name: impl Into<String>) -> Self {
        self.name = name.into();
        self
    }

    /// Set the version string.
    pub fn with_version(mut self, version: impl Into<String>) -> Self {
        self.version = version.into();
        self
    }

    /// Set the author.
    pub fn with_author(mut self, author: impl Into<String>) -> Self {
        self.author = Some(author.into());
        self
    }

    /// Set the description.
    pub fn with_description(mut self, description: impl Into<String>) -> Self {
        self.description = Some(description.into());
        self
    }

    /// Names of the variables referenced in the content, in order of
    /// first occurrence.
    pub fn variable_names(&self) -> Vec<String> {
        extract_variables(&self.content)
    }

    /// Names of sub-templates referenced via `{{> name}}` includes.
    pub fn include_names(&self) -> Vec<String> {
        extract_includes(&self.content)
    }
}

fn variable_regex() -> &'static Regex {
    static RE: OnceLock<Regex> = OnceLock::new();
    RE.get_or_init(|| {
        Regex::new(r"\{\{\s*([A-Za-z_][A-Za-z0-9_.]*)\s*\}\}")
            .expect("variable regex is valid")
    })
}

fn include_regex() -> &'static Regex {
    static RE: OnceLock<Regex> = OnceLock::new();
    RE.get_or_init(|| {
        Regex::new(r"\{\{>\s*([A-Za-z_][A-Za-z0-9_./-]*)\s*\}\}")
            .expect("include regex is valid")
    })
}

/// Extract `{{variable}}` names from template text.
///
/// Returns names in order of first occurrence, deduplicated. Include
/// references (`{{> name}}`) are not variables and are skipped.
pub fn extract_variables(content: &str) -> Vec<String> {
    let mut seen = Vec::new();
    for cap in variable_regex().captures_iter(content) {
        let name = cap[1].to_string();
        if !seen.contains(&name) {
            seen.push(name);
        }
    }
    seen
}

/// Extract `{{> name}}` sub-template references from template text.
///
/// Returns names in order of first occurrence, deduplicated.
pub fn extract_includes(content: &str) -> Vec<String> {
    let mut seen = Vec::new();
    for cap in include_regex().captures_iter(content) {
        let name = cap[1].to_string();
        if !seen.contains(&name) {
            seen.push(name);
        }
    }
    seen
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_extract_variables_order_and_dedup() {
        let vars = extract_variables("Hello {{name}}, {{task}} for {{name}} is {{ status }}");
        assert_eq!(vars, vec!["name", "task", "status"]);
    }

    #[test]
    fn test_extract_variables_ignores_includes() {
        let vars = extract_variables("{{> header}} Hello {{name}}");
        assert_eq!(vars, vec!["name"]);
    }

    #[test]
    fn test_extract_includes() {
        let includes = extract_includes("{{> header}} body {{>footer}} {{> header}}");
        assert_eq!(includes, vec!["header", "footer"]);
    }

    #[test]
    fn test_template_new_extracts_variables() {
        let template = Template::new("greet", "Hi {{name}}, your {{task}} is ready", "general");

        assert_eq!(template.id, "greet");
        assert_eq!(template.variables.len(), 2);
        assert_eq!(template.variables.get("name"), Some(&VariableType::String));
        assert_eq!(template.variable_names(), vec!["name", "task"]);
    }

    #[test]
    fn test_template_builders() {
        let template = Template::new("t1", "content", "misc")
            .with_name("Template One")
            .with_version("2.1.0")
            .with_author("alice")
            .with_description("a test template");

        assert_eq!(template.name, "Template One");
        assert_eq!(template.version, "2.1.0");
        assert_eq!(template.author.as_deref(), Some("alice"));
        assert_eq!(template.description.as_deref(), Some("a test template"));
    }
}
