// SPDX-License-Identifier: MIT
// SPDX-FileCopyrightText: 2025 Jonathan D. A. Jewell <hyperpolymath>

//! pixsort: classify, rename and archive a batch of images from the shell

use clap::{Parser, Subcommand};
use std::path::{Path, PathBuf};
use std::sync::Arc;
use tokio::signal;
use tokio_util::sync::CancellationToken;
use tracing::{error, info, warn};
use walkdir::WalkDir;

use pixsort::classifier::{self, ollama::OllamaClassifier};
use pixsort::config::{AppConfig, FailurePolicy, OutputFormat};
use pixsort::pipeline::{Pipeline, RunOptions};
use pixsort::renamer::class_tag;
use pixsort::session::RejectedUpload;
use pixsort::workspace::{IngestOptions, Workspace};
use pixsort::{PixsortError, Result};

/// pixsort CLI - classify, rename and archive images
#[derive(Parser, Debug)]
#[command(name = "pixsort")]
#[command(author = "Jonathan D. A. Jewell <hyperpolymath>")]
#[command(version)]
#[command(about = "Classify images, rename them by class and pack them into a ZIP", long_about = None)]
#[command(propagate_version = true)]
struct Cli {
    /// Path to configuration file (JSON format)
    #[arg(short, long, default_value = "config.json", global = true)]
    config: PathBuf,

    /// Enable verbose logging (debug level)
    #[arg(short, long, global = true)]
    verbose: bool,

    /// Enable trace logging (most verbose)
    #[arg(long, global = true)]
    trace: bool,

    /// Output format for results
    #[arg(long, global = true, default_value = "text", value_parser = ["text", "json"])]
    format: String,

    /// Suppress non-essential output (quiet mode)
    #[arg(short, long, global = true)]
    quiet: bool,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand, Debug)]
enum Commands {
    /// Classify, rename and archive a batch of images
    Run {
        /// Image files or directories
        #[arg(required = true)]
        inputs: Vec<PathBuf>,

        /// Archive to write (default: archive.file_name from config)
        #[arg(short, long)]
        output: Option<PathBuf>,

        /// What to do when one image cannot be classified (abort, skip)
        #[arg(long)]
        on_failure: Option<FailurePolicy>,

        /// Format stored for each image (jpeg, original)
        #[arg(long)]
        output_format: Option<OutputFormat>,

        /// Descend into subdirectories of input directories
        #[arg(short, long)]
        recursive: bool,

        /// Skip classifier health check on startup
        #[arg(long)]
        skip_health_check: bool,
    },

    /// Classify a single image and print its label
    Classify {
        /// Image to classify
        file: PathBuf,
    },

    /// Show classifier status
    Status,

    /// Configuration management
    Config {
        #[command(subcommand)]
        action: ConfigCommands,
    },
}

#[derive(Subcommand, Debug)]
enum ConfigCommands {
    /// Show current configuration
    Show,

    /// Generate default configuration file
    Generate {
        /// Output file path
        #[arg(short, long, default_value = "config.json")]
        output: PathBuf,

        /// Overwrite an existing file
        #[arg(long)]
        force: bool,
    },

    /// Validate configuration file
    Validate,
}

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();

    // Initialize tracing
    let filter = if cli.trace {
        "trace"
    } else if cli.verbose {
        "debug"
    } else if cli.quiet {
        "warn"
    } else {
        "info"
    };

    tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_target(false)
        .init();

    let config = AppConfig::load(&cli.config)?;

    match cli.command {
        Commands::Run { inputs, output, on_failure, output_format, recursive, skip_health_check } => {
            let mut config = config;
            if let Some(policy) = on_failure {
                config.rules.on_failure = policy;
            }
            if let Some(format) = output_format {
                config.rules.output_format = format;
            }
            let output = output.unwrap_or_else(|| PathBuf::from(&config.archive.file_name));
            run_batch(config, inputs, output, recursive, skip_health_check, &cli.format, cli.quiet).await
        }
        Commands::Classify { file } => run_classify(config, file, &cli.format).await,
        Commands::Status => run_status(config).await,
        Commands::Config { action } => run_config_command(config, action, &cli.config),
    }
}

/// Expand inputs to a sorted list of candidate files
fn gather_inputs(inputs: &[PathBuf], recursive: bool) -> Result<Vec<PathBuf>> {
    let mut files = Vec::new();

    for input in inputs {
        if input.is_dir() {
            let depth = if recursive { usize::MAX } else { 1 };
            for entry in WalkDir::new(input).max_depth(depth) {
                let entry = entry.map_err(|e| PixsortError::Config(format!("Cannot read {:?}: {}", input, e)))?;
                let hidden = entry.file_name().to_string_lossy().starts_with('.');
                if entry.file_type().is_file() && !hidden {
                    files.push(entry.into_path());
                }
            }
        } else if input.is_file() {
            files.push(input.clone());
        } else {
            return Err(PixsortError::Config(format!("Input not found: {:?}", input)));
        }
    }

    files.sort();
    Ok(files)
}

/// Cancel the token on Ctrl+C
fn cancel_on_ctrl_c(cancel: CancellationToken) {
    tokio::spawn(async move {
        if signal::ctrl_c().await.is_ok() {
            warn!("Received Ctrl+C, stopping after the current image...");
            cancel.cancel();
        }
    });
}

/// Run one batch from the command line
async fn run_batch(
    config: AppConfig,
    inputs: Vec<PathBuf>,
    output: PathBuf,
    recursive: bool,
    skip_health_check: bool,
    format: &str,
    quiet: bool,
) -> Result<()> {
    let classifier = classifier::from_config(&config.classifier)?;

    if !skip_health_check {
        info!("Checking {} classifier...", classifier.name());
        classifier.health_check().await.map_err(|e| {
            PixsortError::OllamaUnavailable(format!("{}. Is `ollama serve` running?", e))
        })?;
    }

    let opts = IngestOptions::from_rules(&config.rules);
    let workspace = Workspace::create()?;
    let mut rejected = Vec::new();

    for path in gather_inputs(&inputs, recursive)? {
        match workspace.ingest_path(&path, &opts) {
            Ok(_) => {}
            Err(PixsortError::UnreadableInput { file, reason }) => {
                warn!("Skipping {}: {}", path.display(), reason);
                rejected.push(RejectedUpload { file, reason });
            }
            Err(e) => return Err(e),
        }
    }

    if workspace.is_empty()? && !rejected.is_empty() {
        let names: Vec<&str> = rejected.iter().map(|r| r.file.as_str()).collect();
        return Err(PixsortError::UnreadableInput {
            file: names.join(", "),
            reason: "no readable images in batch".to_string(),
        });
    }

    let pipeline = Pipeline::new(classifier, RunOptions::from_config(&config));
    let cancel = CancellationToken::new();
    cancel_on_ctrl_c(cancel.clone());

    let show_progress = format == "text" && !quiet;
    let progress = move |processed: usize, total: usize| {
        if show_progress {
            println!("Processed {}/{}", processed, total);
        }
    };

    let outcome = pipeline.run(workspace, &progress, &cancel).await?;
    std::fs::write(&output, &outcome.archive.bytes)?;

    match format {
        "json" => {
            let result = serde_json::json!({
                "archive": output.to_string_lossy(),
                "entries": outcome.archive.entry_count,
                "report": outcome.report,
                "rejected": rejected,
            });
            println!("{}", serde_json::to_string_pretty(&result)?);
        }
        _ => {
            if !quiet {
                println!("\n{}", outcome.report.summary());
                for failed in &outcome.report.failed {
                    println!("  kept {}: {}", failed.file, failed.reason);
                }
                for r in &rejected {
                    println!("  rejected {}: {}", r.file, r.reason);
                }
                println!("Wrote {} ({} files)", output.display(), outcome.archive.entry_count);
            }
        }
    }

    Ok(())
}

/// Classify one file without renaming it
async fn run_classify(config: AppConfig, file: PathBuf, format: &str) -> Result<()> {
    let classifier = classifier::from_config(&config.classifier)?;
    let label = classifier.classify(&file).await?;
    let tag = class_tag(&label);

    if format == "json" {
        let result = serde_json::json!({
            "path": file.to_string_lossy(),
            "label": label,
            "tag": tag,
        });
        println!("{}", serde_json::to_string_pretty(&result)?);
    } else {
        println!("{}: {} (tag: {})", file.display(), label, tag);
    }
    Ok(())
}

/// Run status check
async fn run_status(config: AppConfig) -> Result<()> {
    println!("pixsort v{} Status", env!("CARGO_PKG_VERSION"));
    println!("======================");

    if config.classifier.backend.eq_ignore_ascii_case("ollama") {
        let client = OllamaClassifier::new(&config.classifier)?;

        match pixsort::classifier::Classifier::health_check(&client).await {
            Ok(()) => println!("Ollama: Running"),
            Err(e) => println!("Ollama: Error - {}", e),
        }

        match client.list_models().await {
            Ok(models) => {
                println!("\nAvailable models:");
                for m in &models {
                    let marker = if m.starts_with(client.model()) { "→" } else { " " };
                    println!("  {} {}", marker, m);
                }
                match client.model_available().await {
                    Ok(true) => {}
                    Ok(false) => println!("\nModel '{}' is not installed. Try: ollama pull {}", client.model(), client.model()),
                    Err(e) => error!("Failed to check model: {}", e),
                }
            }
            Err(e) => println!("  Error listing models: {}", e),
        }
    } else {
        println!("Classifier backend: {}", config.classifier.backend);
    }

    println!("\nConfiguration:");
    println!("  Model: {}", config.classifier.model);
    if config.classifier.labels.is_empty() {
        println!("  Labels: (any)");
    } else {
        println!("  Labels: {}", config.classifier.labels.join(", "));
    }
    println!("  On failure: {:?}", config.rules.on_failure);
    println!("  Output format: {:?}", config.rules.output_format);
    println!("  Archive: {}", config.archive.file_name);

    Ok(())
}

/// Run config commands
fn run_config_command(config: AppConfig, action: ConfigCommands, config_path: &Path) -> Result<()> {
    match action {
        ConfigCommands::Show => {
            let json = serde_json::to_string_pretty(&config)?;
            println!("{}", json);
        }
        ConfigCommands::Generate { output, force } => {
            if output.exists() && !force {
                return Err(PixsortError::Config(format!(
                    "{:?} already exists. Use --force to overwrite",
                    output
                )));
            }
            AppConfig::default().save(&output)?;
            println!("Generated config at {:?}", output);
        }
        ConfigCommands::Validate => {
            config.validate()?;
            println!("Configuration at {:?} is valid", config_path);
            println!("  Backend: {}", config.classifier.backend);
            println!("  Model: {}", config.classifier.model);
            println!("  Labels: {}", config.classifier.labels.len());
        }
    }

    Ok(())
}
