//! toolhost CLI: run configured MCP tool servers and call their tools.

use anyhow::{Context, Result};
use clap::{Parser, Subcommand};
use std::io;
use std::path::PathBuf;
use std::process::ExitCode;
use toolhost_mcp::McpAdapter;

#[derive(Parser)]
#[command(name = "toolhost", version, about = "Run stdio MCP tool servers")]
struct Cli {
    /// Configuration file (overrides TOOLHOST_CONFIG and the default locations)
    #[arg(long)]
    config: Option<PathBuf>,

    /// Enable verbose/debug logging
    #[arg(long)]
    verbose: bool,

    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand)]
enum Command {
    /// Print the published tool specs as JSON
    Tools,
    /// Show each server's state and tool count
    Servers,
    /// Print the qualified `server:tool` name behind an exposed name
    Resolve { name: String },
    /// Call a tool and print its normalized result
    Call {
        name: String,
        /// Tool arguments as a JSON object
        #[arg(default_value = "{}")]
        arguments: String,
    },
}

fn main() -> Result<ExitCode> {
    let cli = Cli::parse();

    // Set up logging
    let log_level = if cli.verbose { "debug" } else { "warn" };
    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_env("TOOLHOST_LOG")
                .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new(log_level)),
        )
        .with_writer(io::stderr)
        .init();

    let loaded = toolhost_config::load(cli.config.as_deref())
        .map_err(|e| anyhow::anyhow!("{e}"))?;
    match &loaded.source {
        Some(path) => tracing::info!("Using configuration {}", path.display()),
        None => eprintln!("Warning: no configuration file found; no servers configured"),
    }

    // Parse arguments before anything is spawned.
    let arguments = match &cli.command {
        Command::Call { arguments, .. } => Some(
            serde_json::from_str::<serde_json::Value>(arguments)
                .context("Tool arguments must be valid JSON")?,
        ),
        _ => None,
    };

    let adapter = McpAdapter::from_config(&loaded.config);
    adapter.start().map_err(|e| anyhow::anyhow!("{e}"))?;
    let specs = adapter.build_tool_specs();

    let code = match cli.command {
        Command::Tools => {
            println!("{}", serde_json::to_string_pretty(&specs)?);
            ExitCode::SUCCESS
        }
        Command::Servers => {
            for status in adapter.server_summary() {
                println!("{:<24} {:<14} {} tools", status.name, status.state, status.tools);
            }
            ExitCode::SUCCESS
        }
        Command::Resolve { name } => match adapter.resolve(&name) {
            Some(qualified) => {
                println!("{qualified}");
                ExitCode::SUCCESS
            }
            None => {
                eprintln!("Unknown tool {name}");
                ExitCode::FAILURE
            }
        },
        Command::Call { name, .. } => {
            let arguments = arguments.unwrap_or_else(|| serde_json::json!({}));
            match adapter.call_tool(&name, arguments) {
                Ok(value) => {
                    println!("{}", render(&value)?);
                    ExitCode::SUCCESS
                }
                Err(e) => {
                    println!("{}", serde_json::to_string_pretty(&e.to_error_value())?);
                    ExitCode::FAILURE
                }
            }
        }
    };

    adapter.shutdown();
    Ok(code)
}

/// Print strings bare and everything else as pretty JSON.
fn render(value: &serde_json::Value) -> Result<String> {
    Ok(match value {
        serde_json::Value::String(text) => text.clone(),
        other => serde_json::to_string_pretty(other)?,
    })
}
