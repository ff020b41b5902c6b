//! Template store interface and filesystem implementation.
//!
//! The store is a consumed dependency: the orchestrator only needs to
//! look templates up by name and load them by path. Templates are
//! stored as JSON files; richer formats are out of scope.

use serde::{Deserialize, Serialize};
use std::fs;
use std::path::{Path, PathBuf};

use super::Template;
use crate::error::TemplateError;

/// Listing entry for a stored template.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TemplateInfo {
    pub id: String,
    pub name: String,
    pub category: String,
    pub path: PathBuf,
}

/// Lookup and load access to stored templates.
pub trait TemplateStore: Send + Sync {
    /// Resolve a template name to its path, if it exists.
    fn find_template(&self, name: &str) -> Option<PathBuf>;

    /// Load and parse the template at the given path.
    fn load_template(&self, path: &Path) -> Result<Template, TemplateError>;

    /// List all templates in the store.
    fn list_templates(&self) -> Result<Vec<TemplateInfo>, TemplateError>;
}

/// Filesystem-backed template store reading `<name>.json` files from a
/// single directory.
pub struct FsTemplateStore {
    root: PathBuf,
}

impl FsTemplateStore {
    pub fn new(root: impl Into<PathBuf>) -> Self {
        Self { root: root.into() }
    }

    /// Root directory this store reads from.
    pub fn root(&self) -> &Path {
        &self.root
    }
}

impl TemplateStore for FsTemplateStore {
    fn find_template(&self, name: &str) -> Option<PathBuf> {
        let path = self.root.join(format!("{name}.json"));
        path.is_file().then_some(path)
    }

    fn load_template(&self, path: &Path) -> Result<Template, TemplateError> {
        let raw = fs::read_to_string(path)?;
        serde_json::from_str(&raw).map_err(|e| TemplateError::Parse {
            path: path.display().to_string(),
            message: e.to_string(),
        })
    }

    fn list_templates(&self) -> Result<Vec<TemplateInfo>, TemplateError> {
        let mut entries = Vec::new();
        for entry in fs::read_dir(&self.root)? {
            let entry = entry?;
            let path = entry.path();
            if path.extension().is_some_and(|ext| ext == "json") {
                match self.load_template(&path) {
                    Ok(template) => entries.push(TemplateInfo {
                        id: template.id,
                        name: template.name,
                        category: template.category,
                        path,
                    }),
                    Err(e) => {
                        tracing::warn!(path = %path.display(), error = %e, "Skipping unreadable template");
                    }
                }
            }
        }
        entries.sort_by(|a, b| a.id.cmp(&b.id));
        Ok(entries)
    }
}
