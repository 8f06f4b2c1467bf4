//! todo-mcp - markdown todo tool server
//!
//! Speaks newline-delimited JSON-RPC on stdin/stdout. Logs go to stderr.

use anyhow::Context;
use clap::{ArgAction, Parser, Subcommand};
use colored::Colorize;
use std::path::PathBuf;
use std::sync::Arc;
use tracing::{error, info};
use tracing_subscriber::EnvFilter;

use todo_mcp::server::{serve, tool_specs};
use todo_mcp::{FileIndexFactory, ManagerFactory, ServerConfig, TodoServer};

#[derive(Parser)]
#[command(name = "todo-mcp")]
#[command(version)]
#[command(about = "Tool server for markdown todos with sections, hierarchies, search and archival", long_about = None)]
#[command(propagate_version = true)]
struct Cli {
    /// Default working directory (defaults to current directory)
    #[arg(short, long, global = true, env = "TODO_MCP_WORKING_DIR")]
    working_dir: Option<PathBuf>,

    /// Template folder used instead of <working dir>/.claude/templates
    #[arg(long, global = true, env = "TODO_MCP_TEMPLATE_DIR")]
    template_dir: Option<PathBuf>,

    /// Archive todos as soon as they are completed (true/false)
    #[arg(long, global = true, env = "TODO_MCP_AUTO_ARCHIVE", action = ArgAction::Set)]
    auto_archive: Option<bool>,

    /// Log filter, e.g. "info" or "todo_mcp=debug"
    #[arg(long, global = true, env = "TODO_MCP_LOG_LEVEL")]
    log_level: Option<String>,

    /// Configuration file (defaults to <working dir>/.claude/todo-mcp.toml)
    #[arg(short, long, global = true, env = "TODO_MCP_CONFIG")]
    config: Option<PathBuf>,

    /// Verbose logging
    #[arg(short, long, global = true)]
    verbose: bool,

    /// Emit logs as JSON lines
    #[arg(long, global = true, env = "TODO_MCP_LOG_JSON")]
    log_json: bool,

    #[command(subcommand)]
    command: Option<Commands>,
}

#[derive(Subcommand)]
enum Commands {
    /// Serve tool calls on stdin/stdout (default)
    Serve,

    /// Print the tool catalogue as JSON
    Tools,

    /// Print the effective configuration as TOML
    Config,
}

fn fail(message: impl std::fmt::Display) -> ! {
    eprintln!("{} {}", "Error:".red().bold(), message);
    std::process::exit(1);
}

fn init_tracing(level: &str, verbose: bool, json: bool) {
    let filter = if verbose {
        EnvFilter::new("todo_mcp=debug,info")
    } else {
        EnvFilter::try_new(level).unwrap_or_else(|_| EnvFilter::new("info"))
    };
    let builder = tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_target(false)
        .with_writer(std::io::stderr);
    if json {
        builder.json().init();
    } else {
        builder.init();
    }
}

fn resolve_config(cli: &Cli) -> anyhow::Result<ServerConfig> {
    let cwd = std::env::current_dir().context("Failed to read current directory")?;
    let base = cli.working_dir.clone().unwrap_or(cwd);

    let mut config = ServerConfig::load_or_default(cli.config.as_deref(), &base)?;
    if cli.working_dir.is_some() {
        config = config.with_working_dir(base);
    }
    if let Some(dir) = &cli.template_dir {
        config = config.with_template_dir(dir);
    }
    if let Some(enabled) = cli.auto_archive {
        config = config.with_auto_archive(enabled);
    }
    if let Some(level) = &cli.log_level {
        config = config.with_log_level(level);
    }
    if let Ok(dir) = config.default_working_dir.canonicalize() {
        config.default_working_dir = dir;
    }
    Ok(config)
}

async fn run_server(config: ServerConfig) -> anyhow::Result<()> {
    let factory = ManagerFactory::new(&config, Arc::new(FileIndexFactory))
        .await
        .context("Failed to initialise managers")?;
    factory.start_sweeper();

    let server = TodoServer::new(factory.clone(), &config);
    info!(
        dir = %config.default_working_dir.display(),
        auto_archive = config.auto_archive,
        "todo-mcp {} ready",
        env!("CARGO_PKG_VERSION")
    );

    let result = tokio::select! {
        result = serve(server, tokio::io::stdin(), tokio::io::stdout()) => result,
        _ = tokio::signal::ctrl_c() => {
            info!("Interrupted, shutting down");
            Ok(())
        }
    };

    factory.shutdown().await;
    result
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let cli = Cli::parse();

    let config = match resolve_config(&cli) {
        Ok(config) => config,
        Err(e) => fail(format!("{e:#}")),
    };
    init_tracing(&config.log_level, cli.verbose, cli.log_json);

    if let Err(e) = config.validate() {
        error!("Invalid configuration: {}", e);
        fail(e);
    }

    match cli.command.unwrap_or(Commands::Serve) {
        Commands::Serve => run_server(config).await,
        Commands::Tools => {
            println!("{}", serde_json::to_string_pretty(&tool_specs())?);
            Ok(())
        }
        Commands::Config => {
            println!("{}", toml::to_string_pretty(&config)?);
            Ok(())
        }
    }
}
