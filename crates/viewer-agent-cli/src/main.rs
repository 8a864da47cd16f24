//! Command-line surface: single-shot questions and key management.

use anyhow::{bail, Context, Result};
use clap::{Parser, Subcommand, ValueEnum};
use tracing::debug;
use tracing_subscriber::EnvFilter;

use viewer_agent::credentials::store::scrub_secret;
use viewer_agent::credentials::{CredentialResolver, KeySource, ProviderKind};
use viewer_agent::gateway::GatewayClient;
use viewer_agent::providers::OpenRouterProvider;
use viewer_agent::supervisor::SessionSupervisor;

#[derive(Parser)]
#[command(name = "viewer-agent", version, about = "Molecular viewer AI assistant")]
struct Cli {
    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand)]
enum Command {
    /// Ask a single question without the tool loop
    Ask {
        /// The question, given as trailing words
        #[arg(required = true, trailing_var_arg = true)]
        prompt: Vec<String>,
    },
    /// Inspect and manage stored API keys
    Key {
        #[command(subcommand)]
        command: KeyCommand,
    },
}

#[derive(Subcommand)]
enum KeyCommand {
    /// Show presence and provenance for both providers
    Status,
    /// Save a key into the OS secure store
    Save {
        #[arg(value_enum)]
        provider: ProviderArg,
        key: String,
    },
    /// Remove the stored key
    Clear {
        #[arg(value_enum)]
        provider: ProviderArg,
    },
    /// Check the configured key against the live service
    Test {
        #[arg(value_enum)]
        provider: ProviderArg,
    },
}

#[derive(Debug, Clone, Copy, ValueEnum)]
enum ProviderArg {
    Openrouter,
    Openbio,
}

impl From<ProviderArg> for ProviderKind {
    fn from(arg: ProviderArg) -> Self {
        match arg {
            ProviderArg::Openrouter => ProviderKind::OpenRouter,
            ProviderArg::Openbio => ProviderKind::OpenBio,
        }
    }
}

fn source_label(source: KeySource) -> &'static str {
    match source {
        KeySource::Environment => "environment",
        KeySource::SecureStore => "secure store",
        KeySource::Unset => "not set",
    }
}

#[tokio::main]
async fn main() -> Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::from_default_env())
        .with_writer(std::io::stderr)
        .init();

    let cli = Cli::parse();
    match cli.command {
        Command::Ask { prompt } => ask(prompt.join(" ")).await,
        Command::Key { command } => key(command).await,
    }
}

async fn ask(prompt: String) -> Result<()> {
    let supervisor = SessionSupervisor::new();
    debug!(mode = ?supervisor.mode(), chars = prompt.len(), "single-shot ask");
    let answer = supervisor
        .ask_fallback(&prompt)
        .await
        .context("request failed")?;
    println!("{}", answer);
    Ok(())
}

async fn key(command: KeyCommand) -> Result<()> {
    let resolver = CredentialResolver::new();
    match command {
        KeyCommand::Status => {
            for provider in [ProviderKind::OpenRouter, ProviderKind::OpenBio] {
                let status = resolver.status(provider);
                let shown = if status.has_key {
                    status.masked_key
                } else {
                    "-".to_string()
                };
                println!(
                    "{:?}: {} ({})",
                    provider,
                    shown,
                    source_label(status.source)
                );
                if !status.store_available {
                    println!("  warning: the OS secure store is unavailable");
                }
            }
        }
        KeyCommand::Save { provider, key } => {
            let provider: ProviderKind = provider.into();
            resolver
                .save_key(provider, &key)
                .context("failed to save key")?;
            println!("saved key for {:?}", provider);
        }
        KeyCommand::Clear { provider } => {
            let provider: ProviderKind = provider.into();
            let env_cleared = resolver
                .clear_saved_key(provider)
                .context("failed to clear key")?;
            println!(
                "cleared stored key for {:?}{}",
                provider,
                if env_cleared {
                    " (and its loaded environment value)"
                } else {
                    ""
                }
            );
        }
        KeyCommand::Test { provider } => test_key(&resolver, provider.into()).await?,
    }
    Ok(())
}

async fn test_key(resolver: &CredentialResolver, provider: ProviderKind) -> Result<()> {
    let config = resolver.resolve_config();
    match provider {
        ProviderKind::OpenRouter | ProviderKind::Anthropic => {
            let Some(secret) = config.routing.value.clone() else {
                bail!("no routing key configured");
            };
            if let Err(err) = OpenRouterProvider::from_config(&config)?.validate_key().await {
                bail!(
                    "key check failed: {}",
                    scrub_secret(&err.to_string(), secret.expose())
                );
            }
        }
        ProviderKind::OpenBio => {
            let Some(secret) = config.gateway.value.clone() else {
                bail!("no gateway key configured");
            };
            if let Err(err) = GatewayClient::from_config(&config)?.validate_key().await {
                bail!(
                    "key check failed: {}",
                    scrub_secret(&err.to_string(), secret.expose())
                );
            }
        }
    }
    println!("key for {:?} is valid", provider);
    Ok(())
}
