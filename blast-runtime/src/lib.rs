//! # Blast Runtime
//!
//! Executes a built pipeline: the scheduler materializes task instances
//! and emits ready work through a bounded queue, the executor's worker
//! pool runs each instance through its typed operator, and results feed
//! back into the scheduler until every instance is terminal.

pub mod executor;
pub mod instance;
pub mod operators;
pub mod scheduler;

pub use executor::{Executor, OperatorMap, Sequential, StatusListener};
pub use instance::{InstanceKind, Status, TaskExecutionResult, TaskInstance};
pub use operators::{NoOpOperator, Operator, PythonOperator, QueryOperator, QueryRunner};
pub use scheduler::{Scheduler, WORK_QUEUE_CAPACITY};

/// Result type for runtime operations
pub type Result<T> = std::result::Result<T, Error>;

/// Error types for runtime operations
#[derive(Debug, thiserror::Error)]
pub enum Error {
    #[error("Execution of task '{task}' failed: {message}")]
    Execution { task: String, message: String },

    #[error("No operator registered for task type '{0}'")]
    UnknownTaskType(String),

    #[error(transparent)]
    Core(#[from] blast_core::Error),
}
