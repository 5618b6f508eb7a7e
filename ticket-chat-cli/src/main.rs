use clap::{Parser, Subcommand};
use colored::Colorize;
use std::process::ExitCode;
use ticket_chat_core::{ChatConfig, ChatError, CliErrorDisplay, Database, DatabaseConfig, LoggingConfig};
use tracing_subscriber::{fmt, layer::SubscriberExt, util::SubscriberInitExt, EnvFilter};

mod commands;

use commands::{
    handle_messages_command, handle_ocr_command, handle_sessions_command, MessagesCommand,
    OcrCommand, SessionsCommand,
};

const VERSION: &str = env!("CARGO_PKG_VERSION");
const NAME: &str = env!("CARGO_PKG_NAME");

#[derive(Parser)]
#[command(name = "ticket-chat")]
#[command(version = VERSION)]
#[command(about = "Ticket chat - issue-scoped chat sessions with OCR enrichment")]
#[command(long_about = r#"
Ticket chat manages the chat sessions attached to issues: who takes part in
which session, the message history of each session, and the OCR pipeline that
extracts text from uploaded files.

Use 'ticket-chat init' to create the tables, then 'ticket-chat sessions create'
to open a session on an issue.
"#)]
struct Cli {
    #[command(subcommand)]
    command: Commands,

    #[arg(short, long, global = true)]
    verbose: bool,
}

#[derive(Subcommand)]
enum Commands {
    #[command(about = "Initialize the database and run migrations")]
    Init,

    #[command(about = "Create sessions and manage their participants")]
    Sessions {
        #[command(subcommand)]
        action: SessionsCommand,
    },

    #[command(about = "Send, edit, list and export chat messages")]
    Messages {
        #[command(subcommand)]
        action: MessagesCommand,
    },

    #[command(about = "Re-trigger OCR requests and apply OCR results")]
    Ocr {
        #[command(subcommand)]
        action: OcrCommand,
    },

    #[command(about = "Show version information")]
    Version {
        #[arg(short, long)]
        detailed: bool,
    },
}

#[tokio::main]
async fn main() -> ExitCode {
    let cli = Cli::parse();

    let config = match ChatConfig::load() {
        Ok(config) => config,
        Err(e) => {
            eprintln!("{}: {}", "Error".red().bold(), e);
            return ExitCode::FAILURE;
        }
    };

    init_logging(cli.verbose, &config.logging);

    match run(cli, config).await {
        Ok(_) => ExitCode::SUCCESS,
        Err(e) => {
            match e.downcast_ref::<ChatError>() {
                Some(chat_error) => {
                    eprint!("{}: {}", "Error".red().bold(), CliErrorDisplay::new(chat_error))
                }
                None => eprintln!("{}: {}", "Error".red().bold(), e),
            }
            ExitCode::FAILURE
        }
    }
}

fn init_logging(verbose: bool, logging: &LoggingConfig) {
    let filter = if verbose {
        EnvFilter::new("debug")
    } else {
        EnvFilter::try_new(&logging.level).unwrap_or_else(|_| EnvFilter::new("warn"))
    };

    // stdout is reserved for command output
    let json = logging.json_format;
    tracing_subscriber::registry()
        .with(json.then(|| fmt::layer().json().with_writer(std::io::stderr)))
        .with((!json).then(|| fmt::layer().with_target(false).with_writer(std::io::stderr)))
        .with(filter)
        .init();
}

async fn run(cli: Cli, config: ChatConfig) -> anyhow::Result<()> {
    match cli.command {
        Commands::Init => cmd_init(&config).await,
        Commands::Sessions { action } => handle_sessions_command(action, &config).await,
        Commands::Messages { action } => handle_messages_command(action, &config).await,
        Commands::Ocr { action } => handle_ocr_command(action, &config).await,
        Commands::Version { detailed } => cmd_version(detailed, &config),
    }
}

async fn cmd_init(config: &ChatConfig) -> anyhow::Result<()> {
    println!("{}", "Initializing ticket chat...".cyan().bold());
    println!();

    println!(
        "  {} Database URL: {}",
        "→".blue(),
        mask_password(config.database_url())
    );

    println!("  {} Connecting to database...", "→".blue());
    let db = Database::connect(&DatabaseConfig::from(&config.database)).await?;

    println!("  {} Running migrations...", "→".blue());
    db.run_migrations().await?;

    println!("  {} Verifying connection...", "→".blue());
    db.health_check().await?;

    db.close().await;

    println!();
    println!(
        "{} {}",
        "✓".green().bold(),
        "Database initialized successfully!".green()
    );

    Ok(())
}

fn cmd_version(detailed: bool, config: &ChatConfig) -> anyhow::Result<()> {
    if detailed {
        println!("{}", "Ticket Chat Version Information".cyan().bold());
        println!("{}", "═".repeat(40).dimmed());
        println!("  {:<15} {}", "Version:".bold(), VERSION);
        println!("  {:<15} {}", "Name:".bold(), NAME);
        println!("  {:<15} Apache-2.0", "License:".bold());
        println!();
        println!("  {}", "Configuration:".bold());
        println!("    Database:       {}", mask_password(config.database_url()));
        println!(
            "    Content limit:  {} characters",
            config.max_content_length()
        );
        println!(
            "    OCR:            {}",
            if config.ocr.enabled {
                "enabled".green()
            } else {
                "disabled".yellow()
            }
        );
        println!("    Request topic:  {}", config.ocr.request_topic);
        println!("    Result topic:   {}", config.ocr.result_topic);
        println!(
            "    Broker:         {}",
            if config.ocr.uses_external_broker() {
                config.ocr.broker_url.as_str()
            } else {
                "none, OCR inactive"
            }
        );
        println!();
        println!("  {}", "Build Information:".bold());
        println!("    Rust Edition: 2021");
        #[cfg(debug_assertions)]
        println!("    Build:        Debug");
        #[cfg(not(debug_assertions))]
        println!("    Build:        Release");
    } else {
        println!("ticket-chat {}", VERSION);
    }

    Ok(())
}

fn mask_password(url: &str) -> String {
    if let Some(at_pos) = url.find('@') {
        if let Some(proto_end) = url.find("://") {
            let before_auth = &url[..proto_end + 3];
            let after_at = &url[at_pos..];
            if let Some(colon_pos) = url[proto_end + 3..at_pos].find(':') {
                let user = &url[proto_end + 3..proto_end + 3 + colon_pos];
                return format!("{}{}:****{}", before_auth, user, after_at);
            }
        }
    }
    url.to_string()
}
