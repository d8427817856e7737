//! Configuration management
//!
//! Settings come from `~/.scout/config.json` (every field optional) and are
//! then overridden by environment variables, which may themselves come from a
//! `.env` file loaded by the binary.

use serde::{Deserialize, Serialize};
use std::path::PathBuf;
use std::time::Duration;
use crate::Result;
use crate::agent::{CompletionOptions, RelayOptions, ReplyMode, DEFAULT_MAX_ROUNDS};
use crate::agent::llm::{DEFAULT_MAX_TOKENS, DEFAULT_TEMPERATURE};
use crate::error::Error;

/// Main configuration structure
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Config {
    /// Chat-completion backend
    #[serde(default)]
    pub llm: LlmConfig,

    /// Web search provider
    #[serde(default)]
    pub search: SearchConfig,

    /// WebSocket server
    #[serde(default)]
    pub server: ServerConfig,

    /// Conversation handling
    #[serde(default)]
    pub chat: ChatConfig,

    /// Maximum tool rounds per answer
    #[serde(default = "default_max_rounds")]
    pub max_rounds: usize,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct LlmConfig {
    #[serde(default)]
    pub api_key: String,

    #[serde(default = "default_model")]
    pub model: String,

    /// Base URL of an OpenAI-compatible API
    #[serde(default = "default_base_url")]
    pub base_url: String,

    #[serde(default = "default_temperature")]
    pub temperature: f32,

    #[serde(default = "default_max_tokens")]
    pub max_tokens: u32,

    /// Prepended to every conversation when set
    #[serde(default)]
    pub system_prompt: Option<String>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SearchConfig {
    /// Tavily API key
    #[serde(default)]
    pub api_key: String,

    #[serde(default = "default_max_results")]
    pub max_results: usize,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ServerConfig {
    #[serde(default = "default_host")]
    pub host: String,

    #[serde(default = "default_port")]
    pub port: u16,

    #[serde(default = "default_welcome")]
    pub welcome_message: String,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ChatConfig {
    /// Prior messages kept when building a conversation
    #[serde(default = "default_history_depth")]
    pub history_depth: usize,

    #[serde(default)]
    pub reply_mode: ReplyMode,

    #[serde(default = "default_typing_delay_ms")]
    pub typing_delay_ms: u64,
}

fn default_model() -> String {
    "gpt-4o-mini".to_string()
}

fn default_base_url() -> String {
    "https://api.openai.com/v1".to_string()
}

fn default_temperature() -> f32 {
    DEFAULT_TEMPERATURE
}

fn default_max_tokens() -> u32 {
    DEFAULT_MAX_TOKENS
}

fn default_max_results() -> usize {
    5
}

fn default_host() -> String {
    "127.0.0.1".to_string()
}

fn default_port() -> u16 {
    3001
}

fn default_welcome() -> String {
    "Welcome to the Scout chat server".to_string()
}

fn default_history_depth() -> usize {
    20
}

fn default_typing_delay_ms() -> u64 {
    5
}

fn default_max_rounds() -> usize {
    DEFAULT_MAX_ROUNDS
}

impl Default for Config {
    fn default() -> Self {
        Self {
            llm: LlmConfig::default(),
            search: SearchConfig::default(),
            server: ServerConfig::default(),
            chat: ChatConfig::default(),
            max_rounds: default_max_rounds(),
        }
    }
}

impl Default for LlmConfig {
    fn default() -> Self {
        Self {
            api_key: String::new(),
            model: default_model(),
            base_url: default_base_url(),
            temperature: default_temperature(),
            max_tokens: default_max_tokens(),
            system_prompt: None,
        }
    }
}

impl Default for SearchConfig {
    fn default() -> Self {
        Self {
            api_key: String::new(),
            max_results: default_max_results(),
        }
    }
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            host: default_host(),
            port: default_port(),
            welcome_message: default_welcome(),
        }
    }
}

impl Default for ChatConfig {
    fn default() -> Self {
        Self {
            history_depth: default_history_depth(),
            reply_mode: ReplyMode::default(),
            typing_delay_ms: default_typing_delay_ms(),
        }
    }
}

impl Config {
    /// Apply overrides from an environment lookup
    pub fn apply_env<F>(&mut self, lookup: F) -> Result<()>
    where
        F: Fn(&str) -> Option<String>,
    {
        if let Some(v) = lookup("LLM_API_KEY") {
            self.llm.api_key = v;
        }
        if let Some(v) = lookup("LLM_MODEL") {
            self.llm.model = v;
        }
        if let Some(v) = lookup("LLM_BASE_URL") {
            self.llm.base_url = v;
        }
        if let Some(v) = lookup("TAVILY_API_KEY") {
            self.search.api_key = v;
        }
        if let Some(v) = lookup("SCOUT_HOST") {
            self.server.host = v;
        }
        if let Some(v) = lookup("PORT") {
            self.server.port = v.parse()
                .map_err(|_| Error::Config(format!("PORT must be a port number, got {:?}", v)))?;
        }
        Ok(())
    }

    /// Check the settings needed to talk to the model
    pub fn validate(&self) -> Result<()> {
        if self.llm.api_key.is_empty() {
            return Err(Error::Config(
                "No LLM API key. Set LLM_API_KEY or run 'scout onboard'.".to_string(),
            ));
        }
        if self.max_rounds == 0 {
            return Err(Error::Config("max_rounds must be at least 1".to_string()));
        }
        Ok(())
    }

    pub fn completion_options(&self) -> CompletionOptions {
        CompletionOptions {
            temperature: self.llm.temperature,
            max_tokens: self.llm.max_tokens,
            ..Default::default()
        }
    }

    pub fn relay_options(&self) -> RelayOptions {
        RelayOptions {
            mode: self.chat.reply_mode,
            typing_delay: Duration::from_millis(self.chat.typing_delay_ms),
        }
    }

    /// `host:port` the server binds to
    pub fn bind_address(&self) -> String {
        format!("{}:{}", self.server.host, self.server.port)
    }
}

/// Get the config directory path
pub fn config_dir() -> PathBuf {
    dirs::home_dir()
        .unwrap_or_else(|| PathBuf::from("."))
        .join(".scout")
}

/// Get the config file path
pub fn config_path() -> PathBuf {
    config_dir().join("config.json")
}

/// Default location of the conversation store
pub fn history_path() -> PathBuf {
    config_dir().join("conversations.json")
}

/// Load configuration from file (if present) and the process environment
pub fn load() -> Result<Config> {
    let mut config = load_file()?;
    config.apply_env(|key| std::env::var(key).ok().filter(|v| !v.is_empty()))?;
    Ok(config)
}

/// Load the config file alone, without environment overrides
fn load_file() -> Result<Config> {
    let path = config_path();
    if !path.exists() {
        return Ok(Config::default());
    }

    let content = std::fs::read_to_string(&path)?;
    serde_json::from_str(&content)
        .map_err(|e| Error::Config(format!("Invalid config at {:?}: {}", path, e)))
}

/// Save configuration to file
pub fn save(config: &Config) -> Result<()> {
    let path = config_path();

    // Create parent directory
    if let Some(parent) = path.parent() {
        std::fs::create_dir_all(parent)?;
    }

    let content = serde_json::to_string_pretty(config)?;
    std::fs::write(&path, content)?;
    Ok(())
}

/// Interactive setup wizard
pub fn onboard() -> Result<()> {
    use crate::ui;
    use inquire::{Confirm, Password, Select, Text};

    let prompt_err = |e: inquire::InquireError| Error::Config(format!("Prompt failed: {}", e));

    ui::print_header("Setup Wizard", "local");
    println!("  Let's get Scout configured.\n");

    let mut config = load_file()?;

    // 1. Model backend
    config.llm.base_url = Text::new("Chat-completion API base URL:")
        .with_default(&config.llm.base_url)
        .prompt()
        .map_err(prompt_err)?;

    config.llm.model = Text::new("Model:")
        .with_default(&config.llm.model)
        .prompt()
        .map_err(prompt_err)?;

    let key = Password::new("API key (leave empty to use LLM_API_KEY):")
        .without_confirmation()
        .prompt()
        .map_err(prompt_err)?;
    if !key.is_empty() {
        config.llm.api_key = key;
    }

    // 2. Search
    let use_search = Confirm::new("Enable web search (Tavily)?")
        .with_default(true)
        .prompt()
        .map_err(prompt_err)?;
    if use_search {
        let key = Password::new("Tavily API key (leave empty to use TAVILY_API_KEY):")
            .without_confirmation()
            .prompt()
            .map_err(prompt_err)?;
        if !key.is_empty() {
            config.search.api_key = key;
        }
    }

    // 3. Reply style
    let modes = vec!["Typewriter (answer replayed after tools finish)", "Live (tokens as they arrive)"];
    let mode = Select::new("How should answers stream?", modes).prompt().map_err(prompt_err)?;
    config.chat.reply_mode = if mode.starts_with("Live") { ReplyMode::Live } else { ReplyMode::Typewriter };

    // 4. Save
    ui::print_thinking("Saving configuration");
    save(&config)?;

    println!();
    ui::print_success(&format!("Saved to {:?}", config_path()));
    ui::print_step("Run 'scout serve' to start the server or 'scout chat' to talk locally.");

    Ok(())
}
