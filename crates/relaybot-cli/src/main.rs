use anyhow::{Context, Result, anyhow, bail};
use clap::{Parser, Subcommand};
use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;
use tokio::signal;
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info, warn};
use tracing_subscriber::EnvFilter;

use relaybot_channels::DiscordGateway;
use relaybot_core::{MessageRouter, OpenAiClient, ResponseResolver};
use relaybot_health::HealthServer;

mod config;

use config::RelayConfig;

#[derive(Parser)]
#[command(name = "relaybot")]
#[command(version)]
#[command(about = "relaybot - relays Discord messages to an OpenAI model")]
struct Cli {
    /// Path to config file
    #[arg(short, long, global = true)]
    config: Option<PathBuf>,

    /// Enable debug logging
    #[arg(short, long, global = true)]
    debug: bool,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Connect to Discord and relay messages until Ctrl+C
    Start,

    /// Send a one-shot prompt through the configured models
    Ask {
        /// The prompt to send
        message: String,
    },

    /// Write the default config to ~/.relaybot/config.toml
    Init,

    /// Show the effective configuration, with secrets masked
    Config,
}

#[tokio::main]
async fn main() -> Result<()> {
    // Secrets may come from a .env file in the working directory
    let dotenv = dotenvy::dotenv();

    let cli = Cli::parse();

    // Set up logging
    let filter = if cli.debug { "debug" } else { "info" };
    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::new(filter))
        .init();

    if let Ok(path) = dotenv {
        debug!("Loaded environment from {}", path.display());
    }

    match cli.command {
        Commands::Init => cmd_init().await,
        Commands::Config => cmd_config(&cli.config).await,
        Commands::Start => cmd_start(&cli.config).await,
        Commands::Ask { message } => cmd_ask(&cli.config, &message).await,
    }
}

async fn cmd_init() -> Result<()> {
    let config_dir = config::config_dir();
    tokio::fs::create_dir_all(&config_dir)
        .await
        .with_context(|| format!("Failed to create config dir: {}", config_dir.display()))?;

    let config_path = config_dir.join("config.toml");
    if config_path.exists() {
        warn!("Config already exists at {}", config_path.display());
    } else {
        tokio::fs::write(&config_path, config::DEFAULT_CONFIG).await?;
        #[cfg(unix)]
        {
            use std::os::unix::fs::PermissionsExt;
            tokio::fs::set_permissions(&config_path, std::fs::Permissions::from_mode(0o600)).await?;
        }
        info!("Created default config at {}", config_path.display());
    }

    println!("relaybot initialized at {}", config_dir.display());
    println!(
        "Set DISCORD_TOKEN and OPENAI_API_KEY in your environment or a .env file, or edit {}.",
        config_path.display()
    );
    Ok(())
}

async fn cmd_config(config_path: &Option<PathBuf>) -> Result<()> {
    let cfg = RelayConfig::load(config_path)?;
    println!("{}", toml::to_string_pretty(&cfg.redacted())?);
    Ok(())
}

fn build_resolver(cfg: &RelayConfig) -> ResponseResolver {
    let client = OpenAiClient::new(cfg.openai.api_key.clone(), cfg.openai.base_url.clone())
        .with_endpoint(cfg.openai.endpoint)
        .with_timeout(Duration::from_secs(cfg.openai.timeout_secs));
    ResponseResolver::new(Arc::new(client)).with_params(cfg.openai.generation_params())
}

async fn cmd_start(config_path: &Option<PathBuf>) -> Result<()> {
    let cfg = RelayConfig::load(config_path)?;
    cfg.validate()?;

    let token = cfg.discord.token.trim().to_string();
    if token.is_empty() {
        error!("Discord token is not set. Set DISCORD_TOKEN or discord.token in the config.");
        bail!("Discord token is not set");
    }
    if cfg.openai.api_key.trim().is_empty() {
        warn!("OpenAI API key is not set; every request will fail authentication");
    }

    info!("Starting relaybot...");

    let resolver = build_resolver(&cfg);
    info!(
        "OpenAI client initialized (endpoint: {}, models: {})",
        cfg.openai.endpoint,
        cfg.openai.models.join(", ")
    );

    let discord = DiscordGateway::new(token);
    let router = Arc::new(
        MessageRouter::new(resolver, discord.sender(), cfg.openai.models.clone())
            .with_private_prefix(cfg.discord.private_prefix),
    );

    let cancel = CancellationToken::new();

    let health = if cfg.health.enabled {
        let addr = cfg.health.socket_addr()?;
        Some(HealthServer::new(addr).spawn(cancel.clone()))
    } else {
        info!("Health endpoint disabled");
        None
    };

    let discord_task = discord.start(router, cancel.clone());

    println!("relaybot is running. Press Ctrl+C to stop.");

    let outcome = run_until_shutdown(discord_task, signal::ctrl_c(), &cancel).await;

    if let Some(handle) = health {
        match handle.await {
            Ok(Ok(())) => {}
            Ok(Err(e)) => error!("Health server error: {:#}", e),
            Err(e) => error!("Health server task failed: {}", e),
        }
    }

    println!("relaybot stopped.");
    outcome
}

/// Wait for `shutdown`, or for the gateway task to end on its own, then cancel
/// everything. A gateway that stops before shutdown is reported as an error.
async fn run_until_shutdown(
    mut discord_task: JoinHandle<()>,
    shutdown: impl Future<Output = std::io::Result<()>>,
    cancel: &CancellationToken,
) -> Result<()> {
    let outcome = tokio::select! {
        result = shutdown => {
            info!("Received Ctrl+C, shutting down...");
            cancel.cancel();
            if let Err(e) = (&mut discord_task).await {
                error!("Discord gateway task failed: {}", e);
            }
            result.context("Failed to listen for Ctrl+C")
        }
        result = &mut discord_task => {
            if let Err(e) = result {
                error!("Discord gateway task failed: {}", e);
            }
            Err(anyhow!("Discord gateway stopped unexpectedly"))
        }
    };
    cancel.cancel();
    outcome
}

async fn cmd_ask(config_path: &Option<PathBuf>, message: &str) -> Result<()> {
    let cfg = RelayConfig::load(config_path)?;
    cfg.validate()?;

    let resolver = build_resolver(&cfg);
    let reply = resolver.resolve(message, &cfg.openai.models).await;
    println!("{}", reply);
    Ok(())
}
