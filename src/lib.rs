//! promptforge: Prompt template optimization orchestration and quality
//! validation.
//!
//! This library coordinates template optimization through a remote
//! optimization engine: content-addressed result caching, a priority
//! job queue with bounded workers, a staged optimization pipeline, and
//! statistical quality validation of optimized templates.

// Core modules
pub mod cache;
pub mod cli;
pub mod config;
pub mod engine;
pub mod error;
pub mod events;
pub mod orchestrator;
pub mod pipeline;
pub mod quality;
pub mod scheduler;
pub mod template;
pub mod types;

// Re-export commonly used error types
pub use error::{CacheError, EngineError, OrchestratorError, PipelineError, TemplateError};
