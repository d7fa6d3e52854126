//! Shared types, error model, and configuration for the dossier pipeline.
//!
//! This crate is the foundation depended on by all other dossier crates.
//! It provides:
//! - [`DossierError`] and [`GraphError`], the unified error types
//! - Domain types ([`Message`], [`StageId`], [`SearchHit`], [`CompanyRecord`])
//! - Configuration ([`AppConfig`], config loading)

pub mod config;
pub mod error;
pub mod types;

// Re-export public API at crate root for ergonomic imports.
pub use config::{
    AppConfig, DefaultsConfig, OpenRouterConfig, PipelineConfig, StorageBackend, StorageConfig,
    TavilyConfig, config_dir, config_file_path, init_config, load_config, load_config_from,
    resolve_secret, validate_api_key,
};
pub use error::{DossierError, GraphError, Result};
pub use types::{
    CompanyRecord, Message, MessageContent, MessageKind, SearchHit, StageId, UpsertAction,
};
