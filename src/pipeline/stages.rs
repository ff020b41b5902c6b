//! Individual pipeline stage computations.
//!
//! These are the pure parts of the pipeline: metadata extraction before
//! the engine call, and local post-processing after it. Keeping them
//! free of I/O makes them directly testable.

use std::collections::HashMap;

use serde::{Deserialize, Serialize};

use crate::template::{extract_includes, extract_variables, Template};
use crate::types::{estimate_tokens, readability_score, TemplateComparison};

/// Structural facts derived from the template before optimization.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TemplateMetadata {
    /// Estimated token count of the original content.
    pub estimated_tokens: u32,
    /// Structural complexity in [0, 1].
    pub complexity_score: f64,
    /// Variables referenced in the content.
    pub variables: Vec<String>,
    /// Sub-templates referenced via `{{> name}}` includes.
    pub includes: Vec<String>,
}

/// Derive structural metadata from a template.
///
/// Complexity combines variable count, include count, line count and
/// raw length, each scaled against a rough ceiling and weighted.
pub fn extract_metadata(template: &Template) -> TemplateMetadata {
    let variables = extract_variables(&template.content);
    let includes = extract_includes(&template.content);
    let lines = template.content.lines().count();
    let estimated_tokens = estimate_tokens(&template.content);

    let variable_component = (variables.len() as f64 / 10.0).min(1.0);
    let include_component = (includes.len() as f64 / 5.0).min(1.0);
    let line_component = (lines as f64 / 50.0).min(1.0);
    let length_component = (template.content.len() as f64 / 4000.0).min(1.0);

    let complexity_score = variable_component * 0.35
        + include_component * 0.25
        + line_component * 0.2
        + length_component * 0.2;

    TemplateMetadata {
        estimated_tokens,
        complexity_score,
        variables,
        includes,
    }
}

/// Normalize optimized prompt text returned by the engine.
///
/// Trims the ends, collapses runs of blank lines to one, and strips
/// trailing whitespace per line. Placeholder syntax is untouched.
pub fn normalize_prompt(text: &str) -> String {
    let mut out = String::with_capacity(text.len());
    let mut blank_run = 0;
    for line in text.lines() {
        let line = line.trim_end();
        if line.is_empty() {
            blank_run += 1;
            if blank_run > 1 {
                continue;
            }
        } else {
            blank_run = 0;
        }
        if !out.is_empty() {
            out.push('\n');
        }
        out.push_str(line);
    }
    out.trim().to_string()
}

/// Recompute comparison metrics locally from the two texts.
///
/// The engine reports its own numbers; these are derived independently
/// so a misbehaving engine cannot inflate them.
pub fn build_comparison(
    original: &str,
    optimized: &str,
    improvements: HashMap<String, String>,
) -> TemplateComparison {
    let original_tokens = estimate_tokens(original);
    let optimized_tokens = estimate_tokens(optimized);
    let readability_delta = readability_score(optimized) - readability_score(original);

    TemplateComparison {
        improvements,
        original_tokens,
        optimized_tokens,
        readability_delta,
    }
}

/// Token reduction percentage, positive when the optimized text is
/// smaller. Zero when the original estimates to zero tokens.
pub fn token_reduction_percent(original_tokens: u32, optimized_tokens: u32) -> f64 {
    if original_tokens == 0 {
        return 0.0;
    }
    (original_tokens as f64 - optimized_tokens as f64) / original_tokens as f64 * 100.0
}
