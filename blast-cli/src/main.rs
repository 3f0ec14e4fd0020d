//! blast CLI tool

use clap::{Parser, Subcommand};
use std::path::PathBuf;

mod commands;
mod errors;

#[derive(Parser)]
#[command(name = "blast")]
#[command(author, version, about = "Build, validate and run data pipelines", long_about = None)]
struct Cli {
    #[command(subcommand)]
    command: Commands,

    /// Enable verbose logging
    #[arg(short, long)]
    verbose: bool,
}

#[derive(Subcommand)]
enum Commands {
    /// Validate every pipeline under a path
    Validate {
        /// Directory to search for pipelines
        root: PathBuf,

        /// Number of query-validation workers (0 skips query validation)
        #[arg(long, default_value = "4")]
        workers: usize,
    },

    /// Run a pipeline to completion
    Run {
        /// Pipeline directory (or its definition file)
        path: PathBuf,

        /// Number of worker tasks
        #[arg(long, default_value = "8")]
        workers: usize,

        /// Connection environment to load from the config file
        #[arg(long)]
        environment: Option<String>,
    },

    /// Run a single task within its pipeline context
    RunTask {
        /// Path to the task's definition or executable file
        path: PathBuf,

        /// Number of worker tasks
        #[arg(long, default_value = "8")]
        workers: usize,
    },

    /// Print the rendered, materialized SQL for one asset
    Render {
        /// Path to the task's definition or executable file
        path: PathBuf,
    },
}

#[tokio::main]
async fn main() {
    let cli = Cli::parse();

    // Setup logging
    let log_level = if cli.verbose { "debug" } else { "info" };
    tracing_subscriber::fmt().with_env_filter(log_level).init();

    let outcome = match cli.command {
        Commands::Validate { root, workers } => commands::validate::execute(&root, workers).await,
        Commands::Run {
            path,
            workers,
            environment,
        } => commands::run::execute(&path, workers, environment.as_deref()).await,
        Commands::RunTask { path, workers } => commands::run_task::execute(&path, workers).await,
        Commands::Render { path } => commands::render::execute(&path).await.map(|()| true),
    };

    match outcome {
        Ok(true) => {}
        Ok(false) => std::process::exit(1),
        Err(error) => {
            eprintln!("{}", errors::format_error_chain(&error));
            std::process::exit(1);
        }
    }
}
