//! Scout CLI entry point

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;

use anyhow::Result;
use clap::{Parser, Subcommand};
use tokio_util::sync::CancellationToken;
use tracing_subscriber::EnvFilter;

use scout::adapters::cli::CliChannel;
use scout::adapters::remote::{ReconnectPolicy, RemoteClient};
use scout::adapters::websocket::WebSocketChannel;
use scout::adapters::{Channel, ChatSettings};
use scout::agent::{AgentLoop, OpenAiClient};
use scout::config::{self, Config};
use scout::history::ConversationStore;
use scout::tools::{TavilyClient, ToolRegistry, WebSearchTool};
use scout::ui;

#[derive(Parser)]
#[command(name = "scout")]
#[command(about = "🔎 Scout - chat assistant with web search")]
#[command(version)]
struct Cli {
    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Create or update the configuration
    Onboard,

    /// Run the WebSocket chat server
    Serve {
        /// Address to bind
        #[arg(long)]
        host: Option<String>,

        /// Port to listen on
        #[arg(short, long)]
        port: Option<u16>,
    },

    /// Chat with the agent in this terminal
    Chat {
        /// Message to send; omit for interactive mode
        #[arg(short, long)]
        message: Option<String>,

        /// Conversation to continue
        #[arg(short, long)]
        conversation: Option<String>,
    },

    /// Chat through a running server
    Connect {
        /// Server URL; defaults to the configured host and port
        #[arg(long)]
        url: Option<String>,

        /// Conversation to continue
        #[arg(short, long)]
        conversation: Option<String>,
    },

    /// Inspect stored conversations
    History {
        #[command(subcommand)]
        action: HistoryAction,
    },

    /// Show Scout status
    Status,
}

#[derive(Subcommand)]
enum HistoryAction {
    /// List conversations, newest first
    List,
    /// Delete every stored conversation
    Clear,
}

#[tokio::main]
async fn main() -> Result<()> {
    dotenvy::dotenv().ok();

    // Initialize logging
    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::from_default_env())
        .init();

    let cli = Cli::parse();

    match cli.command {
        Commands::Onboard => {
            config::onboard()?;
            println!("\nNext steps:");
            println!("  1. Start the server: scout serve");
            println!("  2. Or chat here:     scout chat -m \"Hello!\"");
        }

        Commands::Serve { host, port } => {
            let mut config = config::load()?;
            if let Some(host) = host {
                config.server.host = host;
            }
            if let Some(port) = port {
                config.server.port = port;
            }
            config.validate()?;

            let shutdown = CancellationToken::new();
            install_ctrlc(shutdown.clone());

            ui::print_header("server", &format!("ws://{}", config.bind_address()));
            let channel = WebSocketChannel::new(
                build_agent(&config)?,
                ChatSettings::from_config(&config),
                config.bind_address(),
            )
            .with_shutdown(shutdown);
            channel.start().await?;
        }

        Commands::Chat { message, conversation } => {
            let config = config::load()?;
            config.validate()?;

            let store = ConversationStore::open(config::history_path())?;
            let channel = CliChannel::new(
                build_agent(&config)?,
                ChatSettings::from_config(&config),
                store,
                conversation,
            );

            if let Some(msg) = message {
                channel.run_once(&msg).await?;
            } else {
                ui::print_header("chat", &format!("conversation {}", channel.conversation_id().await));
                channel.start().await?;
            }
        }

        Commands::Connect { url, conversation } => {
            let config = config::load()?;
            let url = url.unwrap_or_else(|| format!("ws://{}", config.bind_address()));

            ui::print_header("remote", &url);
            let store = ConversationStore::open(config::history_path())?;
            let mut client = RemoteClient::new(
                url,
                ReconnectPolicy::default(),
                config.chat.history_depth,
                store,
                conversation,
            );
            client.run_interactive().await?;
        }

        Commands::History { action } => {
            let mut store = ConversationStore::open(config::history_path())?;
            match action {
                HistoryAction::List => {
                    if store.is_empty() {
                        println!("No conversations yet.");
                    }
                    for record in store.list() {
                        println!(
                            "{}  {}  {} messages  {}",
                            record.id,
                            record.updated_at.format("%Y-%m-%d %H:%M"),
                            record.messages.len(),
                            record.title()
                        );
                    }
                }
                HistoryAction::Clear => {
                    let count = store.len();
                    store.clear();
                    store.save()?;
                    ui::print_success(&format!("Removed {} conversations", count));
                }
            }
        }

        Commands::Status => {
            let config = config::load()?;
            println!("🔎 Scout Status\n");
            println!("Config: {:?}", config::config_path());
            println!("Model: {} ({})", config.llm.model, config.llm.base_url);
            println!("LLM API key: {}", if config.llm.api_key.is_empty() { "not set" } else { "✓" });
            println!("Search API key: {}", if config.search.api_key.is_empty() { "not set" } else { "✓" });
            println!("Server: ws://{}", config.bind_address());
            println!("Reply mode: {:?}", config.chat.reply_mode);
            println!("Max rounds: {}", config.max_rounds);
        }
    }

    Ok(())
}

/// Model client and search tool wired into an agent loop
fn build_agent(config: &Config) -> scout::Result<AgentLoop<OpenAiClient>> {
    let client = OpenAiClient::new(&config.llm.api_key, &config.llm.model, &config.llm.base_url)?;

    let mut tools = ToolRegistry::new();
    tools.register(WebSearchTool::new(TavilyClient::new(
        &config.search.api_key,
        config.search.max_results,
    )));

    Ok(AgentLoop::new(client, tools, config.max_rounds).with_options(config.completion_options()))
}

/// First Ctrl+C cancels `shutdown`, a second one exits
fn install_ctrlc(shutdown: CancellationToken) {
    let pressed = Arc::new(AtomicBool::new(false));

    ctrlc::set_handler(move || {
        if interrupt(&pressed, &shutdown) {
            println!("\n👋 Bye!");
            std::process::exit(0);
        }
        println!("\n⚠️  Shutting down, press Ctrl+C again to exit");
    })
    .ok();
}

/// Handle one Ctrl+C press; returns true when the process should exit now
fn interrupt(pressed: &AtomicBool, shutdown: &CancellationToken) -> bool {
    if pressed.swap(true, Ordering::SeqCst) {
        return true;
    }
    shutdown.cancel();
    false
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_first_interrupt_cancels_second_exits() {
        let pressed = AtomicBool::new(false);
        let shutdown = CancellationToken::new();

        assert!(!interrupt(&pressed, &shutdown));
        assert!(shutdown.is_cancelled());
        assert!(interrupt(&pressed, &shutdown));
    }

    #[test]
    fn test_cli_parses_serve_overrides() {
        let cli = Cli::try_parse_from(["scout", "serve", "--host", "0.0.0.0", "-p", "9000"]).unwrap();
        assert!(matches!(
            cli.command,
            Commands::Serve { host: Some(ref h), port: Some(9000) } if h == "0.0.0.0"
        ));
    }
}
