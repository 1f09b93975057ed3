//! Toolmux CLI - chat with a model that can call tools from many MCP servers
//!
//! Runs an interactive REPL by default, a single prompt with `--one-shot`,
//! or an HTTP API with `serve`.

mod repl;
mod server;

use std::path::{Path, PathBuf};
use std::sync::Arc;

use clap::{Parser, Subcommand};
use console::style;
use tracing_appender::non_blocking::WorkerGuard;
use tracing_subscriber::layer::SubscriberExt;
use tracing_subscriber::util::SubscriberInitExt;
use tracing_subscriber::{EnvFilter, Layer, fmt};

use toolmux_core::{
    Agent, AnthropicBackend, AuditSink, Config, ConfigManager, JsonlAudit, NoopAudit,
    ProviderConfig, SessionRegistry, StdioLauncher, ToolDescriptor,
};

#[derive(Parser)]
#[command(name = "toolmux")]
#[command(version = env!("CARGO_PKG_VERSION"))]
#[command(about = "Chat with a model that can use tools from many MCP servers", long_about = None)]
struct Cli {
    #[command(subcommand)]
    command: Option<Commands>,

    /// Config file (defaults to the user config directory)
    #[arg(short, long, global = true)]
    config: Option<PathBuf>,

    /// Verbose output
    #[arg(short, long, global = true)]
    verbose: bool,

    /// Also write logs to a daily rolling file in this directory
    #[arg(long, global = true)]
    log_dir: Option<PathBuf>,

    /// Model to use (overrides config and MODEL_NAME)
    #[arg(short, long, global = true)]
    model: Option<String>,

    /// Execute a single prompt and exit (non-interactive mode)
    #[arg(long)]
    one_shot: Option<String>,
}

#[derive(Subcommand)]
enum Commands {
    /// Interactive chat mode
    Chat,

    /// Connect to every provider and list their tools
    Tools,

    /// Show or initialize configuration
    Config {
        #[command(subcommand)]
        action: Option<ConfigCommands>,
    },

    /// Serve the chat API over HTTP
    Serve {
        /// Address to bind
        #[arg(long, default_value = "127.0.0.1")]
        host: String,

        /// Port to listen on
        #[arg(short, long, default_value_t = 8000)]
        port: u16,
    },
}

#[derive(Subcommand)]
enum ConfigCommands {
    /// Print the effective configuration
    Show,

    /// Write a starter config file
    Init {
        /// Overwrite an existing file
        #[arg(long)]
        force: bool,
    },
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let cli = Cli::parse();

    // Keep the guard alive so buffered file logs are flushed on exit
    let _log_guard = init_logging(cli.verbose, cli.log_dir.as_deref())?;

    if let Some(Commands::Config { action: Some(ConfigCommands::Init { force }) }) = &cli.command {
        return init_config(cli.config.clone(), *force);
    }

    let manager = match &cli.config {
        Some(path) => ConfigManager::with_path(path.clone())?,
        None => ConfigManager::new()?,
    };
    let config_path = manager.path().to_path_buf();
    let mut config = manager.into_config();
    config.apply_env_overrides();
    if let Some(model) = &cli.model {
        config.model.model = model.clone();
    }
    config.validate()?;

    if let Some(prompt) = cli.one_shot {
        return run_one_shot(&config, &prompt).await;
    }

    match cli.command {
        Some(Commands::Tools) => show_tools(&config).await,
        Some(Commands::Config { .. }) => {
            show_config(&config, &config_path);
            Ok(())
        }
        Some(Commands::Serve { host, port }) => {
            let agent = start_agent(&config).await?;
            server::serve(agent, &host, port).await
        }
        Some(Commands::Chat) | None => {
            if config.model.get_api_key().is_none() {
                show_setup_instructions(&config);
                return Ok(());
            }
            let agent = start_agent(&config).await?;
            repl::run(agent).await
        }
    }
}

/// Install the stderr logger and, with `--log-dir`, a daily rolling file.
///
/// `RUST_LOG` wins over the verbosity flag.
fn init_logging(verbose: bool, log_dir: Option<&Path>) -> anyhow::Result<Option<WorkerGuard>> {
    // Use warn level by default to avoid interfering with the prompt
    let default_filter = if verbose { "info,toolmux_core=debug" } else { "warn" };
    let filter =
        || EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(default_filter));

    let stderr = fmt::layer().with_writer(std::io::stderr).with_filter(filter());

    match log_dir {
        Some(dir) => {
            std::fs::create_dir_all(dir)?;
            let appender = tracing_appender::rolling::daily(dir, "toolmux.log");
            let (writer, guard) = tracing_appender::non_blocking(appender);
            let file = fmt::layer()
                .with_ansi(false)
                .with_writer(writer)
                .with_filter(filter());
            tracing_subscriber::registry().with(stderr).with(file).init();
            Ok(Some(guard))
        }
        None => {
            tracing_subscriber::registry().with(stderr).init();
            Ok(None)
        }
    }
}

/// Build the model backend and audit sink, then connect every provider
async fn start_agent(config: &Config) -> anyhow::Result<Arc<Agent>> {
    let api_key = config.require_api_key()?;
    let backend = AnthropicBackend::from_config(&config.model, api_key)?;

    let audit: Arc<dyn AuditSink> = if config.audit.enabled {
        let audit = JsonlAudit::create(&config.audit.log_dir)?;
        tracing::info!(path = %audit.path().display(), "Writing audit log");
        Arc::new(audit)
    } else {
        Arc::new(NoopAudit)
    };

    let agent = Agent::start(config, Arc::new(backend), audit, Arc::new(StdioLauncher)).await;

    for (name, outcome) in agent.startup_report() {
        match outcome {
            Ok(server) => eprintln!(
                "  {} {} {}",
                style("✓").green(),
                style(name).cyan(),
                style(format!("({} {})", server.name, server.version)).dim()
            ),
            Err(e) => eprintln!(
                "  {} {} {}",
                style("✗").red(),
                style(name).cyan(),
                style(e).dim()
            ),
        }
    }

    Ok(Arc::new(agent))
}

/// Run a single prompt non-interactively (for scripting/testing)
async fn run_one_shot(config: &Config, prompt: &str) -> anyhow::Result<()> {
    let agent = start_agent(config).await?;

    let result = agent.chat(prompt).await;
    agent.shutdown().await;

    let reply = result?;
    println!("{}: {}", style("Assistant").bold().green(), reply);
    Ok(())
}

/// Connect providers without a model and print what they offer
async fn show_tools(config: &Config) -> anyhow::Result<()> {
    let registry = SessionRegistry::new(Arc::new(StdioLauncher));
    let results = registry.connect_all(&config.providers).await;

    println!("{}", style("Available Tools:").bold());
    println!();

    if results.is_empty() {
        println!("  {}", style("No providers configured").dim());
    }

    let tools = registry.refresh_catalog().await;
    for (name, outcome) in &results {
        match outcome {
            Ok(_) => {
                println!("  {}", style(name).bold());
                let own: Vec<&ToolDescriptor> =
                    tools.iter().filter(|t| &t.provider == name).collect();
                if own.is_empty() {
                    println!("    {}", style("(no tools)").dim());
                }
                for tool in own {
                    print_tool(tool);
                }
            }
            Err(e) => println!(
                "  {} {}",
                style(name).bold(),
                style(format!("unavailable: {}", e)).red()
            ),
        }
    }

    registry.disconnect_all().await;
    Ok(())
}

pub(crate) fn print_tool(tool: &ToolDescriptor) {
    println!(
        "    {:<40} {}",
        style(tool.namespaced_name()).cyan(),
        style(tool.description.as_deref().unwrap_or("")).dim()
    );
}

fn show_config(config: &Config, path: &Path) {
    println!("{}", style("Configuration:").bold());
    println!();
    println!("  Config file: {}", style(path.display()).green());
    println!("  Model:       {}", style(&config.model.model).green());
    println!("  Max tokens:  {}", config.model.max_tokens);
    println!("  Temperature: {}", config.model.temperature);
    println!(
        "  API key:     {}",
        if config.model.get_api_key().is_some() {
            style("configured").green()
        } else {
            style("missing").red()
        }
    );
    println!("  Iterations:  {}", config.agent.max_iterations);
    println!(
        "  Audit log:   {}",
        if config.audit.enabled {
            style(config.audit.log_dir.display().to_string()).green()
        } else {
            style("disabled".to_string()).dim()
        }
    );
    println!();
    println!("{}", style("Providers:").bold());
    if config.providers.is_empty() {
        println!("  {}", style("None").dim());
    }
    for provider in &config.providers {
        let state = if provider.enabled {
            style("enabled").green()
        } else {
            style("disabled").red()
        };
        println!(
            "  {} {} {} [{}]",
            style("•").cyan(),
            style(&provider.name).bold(),
            style(format!("{} {}", provider.command, provider.args.join(" "))).dim(),
            state
        );
    }
}

fn init_config(path: Option<PathBuf>, force: bool) -> anyhow::Result<()> {
    let path = match path {
        Some(path) => path,
        None => ConfigManager::default_config_path()?,
    };
    if path.exists() && !force {
        anyhow::bail!("{} already exists (use --force to overwrite)", path.display());
    }

    let mut manager = ConfigManager::with_path(path.clone())?;
    let config = manager.config_mut();
    *config = Config::default();
    config.providers.push(
        ProviderConfig::new("filesystem", "npx").with_args(vec![
            "-y".to_string(),
            "@modelcontextprotocol/server-filesystem".to_string(),
            ".".to_string(),
        ]),
    );
    manager.save()?;

    println!("{} {}", style("Wrote").green(), style(path.display()).cyan());
    Ok(())
}

/// Show setup instructions when no API key is configured
fn show_setup_instructions(config: &Config) {
    let env_var = config.model.api_key_env.as_deref().unwrap_or("ANTHROPIC_API_KEY");

    println!("{}", style("Welcome to Toolmux!").bold().cyan());
    println!();
    println!("{}", style("Setup Required").bold().yellow());
    println!("No API key configured. Please set one up before chatting.");
    println!();

    println!("{}", style("Option 1: Environment Variable (Quick)").bold());
    println!("  export {}=\"your-api-key-here\"", style(env_var).cyan());
    println!();

    println!("{}", style("Option 2: Config File (Persistent)").bold());
    let config_path = ConfigManager::default_config_path()
        .map(|p| p.display().to_string())
        .unwrap_or_else(|_| "~/.config/toolmux/config.toml".to_string());
    println!(
        "  Run {} then edit {}",
        style("toolmux config init").cyan(),
        style(&config_path).cyan()
    );
    println!();
    println!("  Example config:");
    println!("  {}", style("─".repeat(50)).dim());
    println!(r#"  [model]
  model = "claude-3-5-sonnet-20241022"
  api_key = "your-api-key-here"

  [[providers]]
  name = "filesystem"
  command = "npx"
  args = ["-y", "@modelcontextprotocol/server-filesystem", "."]"#);
    println!("  {}", style("─".repeat(50)).dim());
    println!();
    println!("For more help: {}", style("toolmux --help").cyan());
}
