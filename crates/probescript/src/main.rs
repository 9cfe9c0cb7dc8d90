//! probescript CLI
//!
//! Exercises a Lua plugin setup without running an analysis: loads the
//! configuration, starts the interpreter, creates and initializes every
//! plugin listed in `engine.plugins` and reports what got registered.
//!
//! # Exit status
//!
//! - `0`: every configured plugin was created
//! - `1`: at least one plugin could not be found, or setup failed
//! - `255`: a Lua error escaped a plugin

use anyhow::{Context, Result};
use clap::{Parser, Subcommand};
use probescript_core::config::ConfigFile;
use probescript_core::engine::{CORE_EVENTS, Engine};
use probescript_core::logging::{LogConfig, LogFormat, init_logging};
use probescript_core::plugin::PluginRegistration;
use probescript_core::{Interpreter, InterpreterOptions};
use std::path::{Path, PathBuf};
use std::process::ExitCode;
use std::sync::Arc;

/// Lua plugin host for the analysis engine
#[derive(Parser, Debug)]
#[command(name = "probescript")]
#[command(version, about, long_about = None)]
struct Cli {
    /// Log level: trace, debug, info, warn, error (overrides [logging].level)
    #[arg(long, global = true, env = "PROBESCRIPT_LOG_LEVEL")]
    log_level: Option<String>,

    /// Log format: pretty or json
    #[arg(long, global = true, value_name = "FORMAT")]
    log_format: Option<String>,

    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand, Debug)]
enum Command {
    /// Create and initialize the configured plugins, then list them
    Check {
        /// Engine configuration file (TOML)
        #[arg(short, long, value_name = "PATH")]
        config: PathBuf,

        /// Print the registry as JSON
        #[arg(long)]
        json: bool,
    },
    /// List the core events scripts can connect to
    Events {
        /// Print the table as JSON
        #[arg(long)]
        json: bool,
    },
}

fn log_config(cli: &Cli, file: Option<&ConfigFile>) -> Result<LogConfig> {
    let mut config = match file {
        Some(file) => file.log_config().context("reading [logging]")?,
        None => LogConfig::default(),
    };
    if let Some(level) = &cli.log_level {
        config.level.clone_from(level);
    }
    if let Some(format) = &cli.log_format {
        config.format = format
            .parse::<LogFormat>()
            .map_err(anyhow::Error::msg)
            .context("--log-format")?;
    }
    Ok(config)
}

fn print_registry(registrations: &[PluginRegistration], json: bool) -> Result<()> {
    if json {
        println!("{}", serde_json::to_string_pretty(registrations)?);
        return Ok(());
    }
    for reg in registrations {
        let deps = if reg.dependencies.is_empty() {
            "-".to_string()
        } else {
            reg.dependencies.join(",")
        };
        println!(
            "{}\t{}\t{}\tdeps: {}",
            reg.name,
            reg.creator.kind(),
            reg.description,
            deps
        );
    }
    Ok(())
}

fn check(cli: &Cli, path: &Path, json: bool) -> Result<ExitCode> {
    let config = Arc::new(
        ConfigFile::load(path).with_context(|| format!("loading {}", path.display()))?,
    );
    init_logging(&log_config(cli, Some(&*config))?).context("initializing logging")?;

    let engine = Arc::new(Engine::new(Arc::clone(&config)));
    let interp = Interpreter::new(Arc::clone(&engine), InterpreterOptions::from_config(&config))
        .context("starting the Lua interpreter")?;

    let mut missing = Vec::new();
    let mut created = Vec::new();
    for name in config.engine_plugins() {
        match interp
            .create_plugin(&name)
            .with_context(|| format!("creating plugin {name}"))?
        {
            Some(plugin) => created.push(plugin.info().name.clone()),
            None => missing.push(name),
        }
    }
    for name in &created {
        interp
            .initialize_plugin(name)
            .with_context(|| format!("initializing plugin {name}"))?;
    }
    tracing::info!(created = created.len(), missing = missing.len(), "plugins set up");

    print_registry(&interp.registry().snapshot(), json)?;
    engine.shutdown();

    if missing.is_empty() {
        Ok(ExitCode::SUCCESS)
    } else {
        eprintln!("missing plugins: {}", missing.join(", "));
        Ok(ExitCode::FAILURE)
    }
}

fn events(json: bool) -> Result<ExitCode> {
    if json {
        println!("{}", serde_json::to_string_pretty(CORE_EVENTS)?);
    } else {
        for event in CORE_EVENTS {
            let marker = if event.decision { " -> bool" } else { "" };
            println!("on_{}({}){}", event.name, event.args, marker);
        }
    }
    Ok(ExitCode::SUCCESS)
}

fn main() -> ExitCode {
    let cli = Cli::parse();
    let result = match &cli.command {
        Command::Check { config, json } => check(&cli, config, *json),
        Command::Events { json } => {
            log_config(&cli, None)
                .and_then(|cfg| init_logging(&cfg).map_err(Into::into))
                .and_then(|()| events(*json))
        }
    };
    match result {
        Ok(code) => code,
        Err(err) => {
            eprintln!("error: {err:#}");
            ExitCode::FAILURE
        }
    }
}
