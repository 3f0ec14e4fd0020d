//! # Blast Core
//!
//! Core engine for blast pipelines: the in-memory data model, the pipeline
//! builder with its two task loaders, query extraction and rendering, and
//! materialization of SELECT-shaped queries into DDL/DML.

pub mod builder;
pub mod comments;
pub mod config;
pub mod definition;
pub mod fs;
pub mod materializer;
pub mod pipeline;
pub mod query;

// Re-export commonly used types
pub use builder::{Builder, BuilderConfig};
pub use config::{Config, Connection, Environment};
pub use fs::{CachingFileSystem, FileSystem, OsFileSystem};
pub use materializer::materialize;
pub use pipeline::{
    Asset, Column, ColumnTest, DefinitionFile, DefinitionKind, ExecutableFile, Materialization,
    MaterializationStrategy, MaterializationType, Pipeline,
};
pub use query::{Extractor, JinjaRenderer, Renderer, SimpleRenderer};

/// Result type for core operations
pub type Result<T> = std::result::Result<T, Error>;

/// Error types for core operations
#[derive(Debug, thiserror::Error)]
pub enum Error {
    #[error("Path does not exist: {0}")]
    PathNotFound(std::path::PathBuf),

    #[error("I/O error on {path}: {source}")]
    Io {
        path: std::path::PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("Invalid definition in {path}: {message}")]
    Definition {
        path: std::path::PathBuf,
        message: String,
    },

    #[error("Template error: {0}")]
    Template(String),

    #[error("Materialization error: {0}")]
    Materialization(String),

    #[error("Configuration error: {0}")]
    Config(String),
}
