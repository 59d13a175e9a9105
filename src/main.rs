//! genproxy - one stream protocol in front of many generative-AI APIs
//!
//! A local proxy that forwards generation requests to OpenAI, Azure OpenAI
//! or Gemini and streams the results back as `\r`-delimited frames.

use std::io::Write as _;
use std::time::Duration;

use clap::{Parser, Subcommand};
use tokio::io::{AsyncBufReadExt, BufReader};
use tokio_util::sync::CancellationToken;
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

use genproxy::client::{ChatApi, ChatSession, TurnEvent, TurnOutcome, SAMPLE_RATE};
use genproxy::config::{Config, KeySource};
use genproxy::proxy::run_server;
use genproxy::router::AUTO_PROVIDER;

#[derive(Parser)]
#[command(name = "genproxy")]
#[command(about = "One stream protocol in front of many generative-AI APIs")]
#[command(version)]
struct Cli {
    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Start the proxy server
    Serve {
        /// Path to configuration file
        #[arg(short, long, default_value = "config.toml")]
        config: String,

        /// Override listen address
        #[arg(short, long)]
        listen: Option<String>,
    },

    /// Validate configuration file
    Check {
        /// Path to configuration file
        #[arg(short, long, default_value = "config.toml")]
        config: String,
    },

    /// Show configured providers and their models
    Providers {
        /// Path to configuration file
        #[arg(short, long, default_value = "config.toml")]
        config: String,
    },

    /// Chat with a model through a running proxy
    Chat {
        /// Model name
        #[arg(short, long)]
        model: String,

        /// Proxy base URL
        #[arg(short, long, default_value = "http://127.0.0.1:3000")]
        url: String,

        /// Provider name, or `auto` to route by model
        #[arg(short, long, default_value = AUTO_PROVIDER)]
        provider: String,

        /// Use the responses API instead of chat completions
        #[arg(long)]
        responses: bool,
    },
}

fn init_tracing(level: &str) {
    let default_filter = format!("genproxy={level},tower_http={level}");
    tracing_subscriber::registry()
        .with(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| default_filter.into()),
        )
        .with(tracing_subscriber::fmt::layer())
        .init();
}

fn log_key_sources(key_sources: &[(String, KeySource)]) {
    for (provider, source) in key_sources {
        match source {
            KeySource::None => {
                tracing::warn!(provider = %provider, "No API key configured")
            }
            _ => tracing::info!(provider = %provider, source = %source, "API key resolved"),
        }
    }
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let cli = Cli::parse();

    match cli.command {
        Commands::Serve { config, listen } => {
            let (mut loaded, key_sources) = Config::from_file_with_env(&config)?;
            init_tracing(&loaded.logging.level);
            tracing::info!(config = %config, "Loaded configuration");
            log_key_sources(&key_sources);

            if let Some(addr) = listen {
                tracing::info!(listen = %addr, "Override listen address");
                loaded.server.listen = addr;
            }
            if !loaded.streaming.enabled {
                tracing::info!("Streaming disabled, responses are sent in one piece");
            }

            run_server(loaded).await
        }

        Commands::Check { config } => {
            init_tracing("info");
            tracing::info!(config = %config, "Checking configuration");
            let (loaded, key_sources) = Config::from_file_with_env(&config)?;
            log_key_sources(&key_sources);
            tracing::info!(
                providers = loaded.providers.len(),
                capabilities = loaded.capabilities.len(),
                "Configuration is valid"
            );
            Ok(())
        }

        Commands::Providers { config } => {
            init_tracing("warn");
            let (loaded, key_sources) = Config::from_file_with_env(&config)?;
            for provider in &loaded.providers {
                let source = key_sources
                    .iter()
                    .find(|(name, _)| name == &provider.name)
                    .map(|(_, source)| source.to_string())
                    .unwrap_or_else(|| KeySource::None.to_string());
                println!(
                    "{}{} [{}] {}",
                    provider.name,
                    if provider.default { " (default)" } else { "" },
                    provider.kind.as_str(),
                    provider.effective_url().unwrap_or("<no url>"),
                );
                println!("  key: {}", source);
                if provider.models.is_empty() {
                    println!("  models: any");
                } else {
                    println!("  models: {}", provider.models.join(", "));
                }
            }
            Ok(())
        }

        Commands::Chat {
            model,
            url,
            provider,
            responses,
        } => {
            init_tracing("warn");
            let api = if responses {
                ChatApi::Responses
            } else {
                ChatApi::Chat
            };
            run_chat(url, provider, model, api).await
        }
    }
}

/// Interactive loop: one turn per input line, Ctrl-C cancels the reply.
async fn run_chat(url: String, provider: String, model: String, api: ChatApi) -> anyhow::Result<()> {
    let http = reqwest::Client::builder()
        .connect_timeout(Duration::from_secs(10))
        .build()?;
    let mut session = ChatSession::new(http, url, model)
        .with_provider(provider)
        .with_api(api);

    eprintln!(
        "Chatting with {}. Ctrl-C cancels a reply, /clear resets the conversation, Ctrl-D exits.",
        session.model()
    );

    let mut lines = BufReader::new(tokio::io::stdin()).lines();
    loop {
        print!("> ");
        std::io::stdout().flush()?;

        let Some(line) = lines.next_line().await? else {
            break;
        };
        let prompt = line.trim();
        if prompt.is_empty() {
            continue;
        }
        if prompt == "/clear" {
            session.clear();
            continue;
        }

        let cancel = CancellationToken::new();
        let watcher = tokio::spawn({
            let cancel = cancel.clone();
            async move {
                if tokio::signal::ctrl_c().await.is_ok() {
                    cancel.cancel();
                }
            }
        });

        let mut stdout = std::io::stdout();
        let outcome = session
            .send(prompt, &cancel, |event| match event {
                TurnEvent::Thinking => eprint!("(thinking) "),
                TurnEvent::Text(text) => {
                    let _ = write!(stdout, "{}", text);
                    let _ = stdout.flush();
                }
                TurnEvent::Audio(_) => {}
            })
            .await;
        watcher.abort();
        println!();

        match outcome {
            Ok(TurnOutcome::Completed { audio, .. }) => {
                if !audio.is_empty() {
                    eprintln!(
                        "[{:.1}s of audio]",
                        audio.len() as f32 / SAMPLE_RATE as f32
                    );
                }
            }
            Ok(TurnOutcome::Failed(detail)) => eprintln!("Error: {}", detail),
            Ok(TurnOutcome::Cancelled) => eprintln!("[cancelled]"),
            Err(e) => eprintln!("Error: {}", e),
        }
    }

    Ok(())
}
