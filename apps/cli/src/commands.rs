//! CLI command definitions, routing, and tracing setup.

use std::io::Read;
use std::path::PathBuf;
use std::sync::Arc;

use clap::{Parser, Subcommand};
use color_eyre::eyre::{Result, eyre};
use dossier_core::{FlowEvent, FlowSettings, OpenRouterClient, TeamServices};
use dossier_search::TavilyClient;
use dossier_shared::{
    AppConfig, Message, MessageKind, init_config, load_config, validate_api_key,
};
use dossier_storage::Storage;
use indicatif::{ProgressBar, ProgressStyle};
use tracing::info;

// ---------------------------------------------------------------------------
// CLI structure
// ---------------------------------------------------------------------------

/// Dossier — research companies and industries from the web.
#[derive(Parser)]
#[command(
    name = "dossier",
    version,
    about = "Research companies and industries: search, extract, store, and answer.",
    long_about = None,
)]
pub(crate) struct Cli {
    /// Log format: text (default) or json.
    #[arg(long, default_value = "text", global = true)]
    pub log_format: LogFormat,

    /// Verbosity level (-v, -vv, -vvv).
    #[arg(short, long, action = clap::ArgAction::Count, global = true)]
    pub verbose: u8,

    #[command(subcommand)]
    pub command: Command,
}

/// Log output format.
#[derive(Clone, Debug, clap::ValueEnum)]
pub(crate) enum LogFormat {
    Text,
    Json,
}

#[derive(Subcommand)]
pub(crate) enum Command {
    /// Run the dossier team on a question and print the answer.
    Ask {
        /// The question, e.g. "Compare Tesla and Ford revenue".
        query: String,

        /// Print every intermediate message as it is produced.
        #[arg(long)]
        stream: bool,
    },

    /// Search stored companies by name or industry (case-insensitive).
    Lookup {
        /// Substring to match.
        query: String,
    },

    /// Run the extraction engine on raw search output.
    Extract {
        /// File with search output (JSON or plain text), or `-` for stdin.
        input: String,
    },

    /// Company database management.
    Db {
        #[command(subcommand)]
        action: DbAction,
    },

    /// Configuration management.
    Config {
        /// Config subcommand.
        #[command(subcommand)]
        action: ConfigAction,
    },
}

#[derive(Subcommand)]
pub(crate) enum DbAction {
    /// Create the database schema if missing.
    Init,
}

/// Config subcommands.
#[derive(Subcommand)]
pub(crate) enum ConfigAction {
    /// Initialize config file with defaults.
    Init,
    /// Show resolved configuration.
    Show,
}

// ---------------------------------------------------------------------------
// Tracing setup
// ---------------------------------------------------------------------------

/// Initialize tracing based on CLI flags.
pub(crate) fn init_tracing(cli: &Cli) {
    use tracing_subscriber::{EnvFilter, fmt};

    let filter = match cli.verbose {
        0 => "dossier=info",
        1 => "dossier=debug",
        _ => "dossier=trace",
    };

    let env_filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(filter));

    match cli.log_format {
        LogFormat::Text => {
            fmt()
                .with_env_filter(env_filter)
                .with_target(false)
                .with_writer(std::io::stderr)
                .init();
        }
        LogFormat::Json => {
            fmt()
                .json()
                .with_env_filter(env_filter)
                .with_writer(std::io::stderr)
                .init();
        }
    }
}

// ---------------------------------------------------------------------------
// Command dispatch
// ---------------------------------------------------------------------------

/// Run the CLI command.
pub(crate) async fn run(cli: Cli) -> Result<()> {
    match cli.command {
        Command::Ask { query, stream } => cmd_ask(&query, stream).await,
        Command::Lookup { query } => cmd_lookup(&query).await,
        Command::Extract { input } => cmd_extract(&input),
        Command::Db { action } => match action {
            DbAction::Init => cmd_db_init().await,
        },
        Command::Config { action } => match action {
            ConfigAction::Init => cmd_config_init(),
            ConfigAction::Show => cmd_config_show(),
        },
    }
}

// ---------------------------------------------------------------------------
// Handlers
// ---------------------------------------------------------------------------

async fn open_storage(config: &AppConfig) -> Result<Arc<Storage>> {
    let storage = Storage::open(&config.storage).await?;
    storage.initialize().await?;
    Ok(Arc::new(storage))
}

async fn cmd_ask(query: &str, stream: bool) -> Result<()> {
    let config = load_config()?;
    validate_api_key(&config)?;

    let storage = open_storage(&config).await?;
    let services = TeamServices {
        completion: Arc::new(OpenRouterClient::from_config(&config.openrouter)?),
        search: Arc::new(TavilyClient::from_config(&config.tavily)?),
        storage: Arc::clone(&storage),
        max_results: config.defaults.max_results,
    };
    let flow = dossier_core::dossier_flow(&services, FlowSettings::from(&config.pipeline))?;

    info!(query, model = %config.openrouter.default_model, "asking dossier team");

    let spinner = spinner()?;
    let result = flow
        .run_observed(query, |event| match event {
            FlowEvent::StageStarted { stage } => spinner.set_message(format!("{stage}...")),
            FlowEvent::Message(message) if stream => spinner.suspend(|| print_message(message)),
            FlowEvent::Completed(outcome) => {
                info!(run_id = %outcome.run_id, messages = outcome.messages, "run finished");
            }
            FlowEvent::Message(_) => {}
        })
        .await;
    spinner.finish_and_clear();
    storage.shutdown().await;

    println!("{}", result?);
    Ok(())
}

fn print_message(message: &Message) {
    let label = match message.kind {
        MessageKind::Text => "text",
        MessageKind::ToolCall => "tool call",
        MessageKind::ToolResult => "tool result",
        MessageKind::Thought => "thought",
    };
    println!(
        "[{:>3}] {} ({label}): {}",
        message.sequence,
        message.source,
        message.content.to_text()
    );
}

fn spinner() -> Result<ProgressBar> {
    let spinner = ProgressBar::new_spinner();
    spinner.set_style(
        ProgressStyle::with_template("{spinner:.cyan} {msg}")?
            .tick_strings(&["⠋", "⠙", "⠹", "⠸", "⠼", "⠴", "⠦", "⠧", "⠇", "⠏"]),
    );
    spinner.enable_steady_tick(std::time::Duration::from_millis(80));
    Ok(spinner)
}

async fn cmd_lookup(query: &str) -> Result<()> {
    let config = load_config()?;
    let storage = open_storage(&config).await?;
    let result = storage.try_query(query).await;
    storage.shutdown().await;

    let records = result?;
    if records.is_empty() {
        println!("No companies match '{query}'.");
        return Ok(());
    }

    for record in &records {
        println!();
        println!("  {}", record.name);
        println!("  Industry: {}", record.industry);
        println!("  Updated:  {}", record.last_updated.format("%Y-%m-%d %H:%M:%S UTC"));
        if let Some(summary) = record.data.get("summary").and_then(|s| s.as_str()) {
            println!("  {summary}");
        }
    }
    println!();
    Ok(())
}

fn cmd_extract(input: &str) -> Result<()> {
    let raw = if input == "-" {
        let mut buf = String::new();
        std::io::stdin().read_to_string(&mut buf)?;
        buf
    } else {
        let path = PathBuf::from(input);
        std::fs::read_to_string(&path).map_err(|e| eyre!("cannot read '{}': {e}", path.display()))?
    };

    let extraction = dossier_extraction::extract_raw(&raw);
    println!("{}", serde_json::to_string_pretty(&extraction)?);
    Ok(())
}

async fn cmd_db_init() -> Result<()> {
    let config = load_config()?;
    let storage = open_storage(&config).await?;
    storage.shutdown().await;

    match storage.backend() {
        dossier_shared::StorageBackend::Local => {
            println!("Database ready at: {}", config.storage.resolved_path()?.display());
        }
        backend => println!("Database ready ({backend:?} backend)."),
    }
    Ok(())
}

fn cmd_config_init() -> Result<()> {
    let path = init_config()?;
    println!("Config initialized at: {}", path.display());
    Ok(())
}

fn cmd_config_show() -> Result<()> {
    let config: AppConfig = load_config()?;
    let toml_str = toml::to_string_pretty(&config)?;
    println!("{toml_str}");
    Ok(())
}
