use anyhow::{bail, Context, Result};
use serde::{Deserialize, Serialize};
use std::collections::HashSet;
use std::path::{Path, PathBuf};

#[derive(Debug, Deserialize, Serialize, Clone, PartialEq, Default)]
#[serde(rename_all = "lowercase")]
pub enum LlmProvider {
    #[default]
    Openai,
    Openrouter,
    Ollama,
}

impl std::fmt::Display for LlmProvider {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            LlmProvider::Openai => write!(f, "openai"),
            LlmProvider::Openrouter => write!(f, "openrouter"),
            LlmProvider::Ollama => write!(f, "ollama"),
        }
    }
}

#[derive(Debug, Deserialize, Clone)]
pub struct LlmConfig {
    #[serde(default)]
    pub provider: LlmProvider,
    #[serde(default)]
    pub model: String,
    #[serde(default)]
    pub base_url: String,
    #[serde(default)]
    pub api_key: String,
    #[serde(default = "default_max_tokens")]
    pub max_tokens: u32,
    #[serde(default = "default_system_prompt")]
    pub system_prompt: String,
    #[serde(default = "default_timeout_secs")]
    pub timeout_secs: u64,
}

impl Default for LlmConfig {
    fn default() -> Self {
        Self {
            provider: LlmProvider::default(),
            model: String::new(),
            base_url: String::new(),
            api_key: String::new(),
            max_tokens: default_max_tokens(),
            system_prompt: default_system_prompt(),
            timeout_secs: default_timeout_secs(),
        }
    }
}

impl LlmConfig {
    /// Returns the effective base_url: if the stored value is empty,
    /// fall back to the canonical URL for the configured provider.
    pub fn effective_base_url(&self) -> &str {
        let url = if !self.base_url.is_empty() {
            self.base_url.as_str()
        } else {
            match self.provider {
                LlmProvider::Openai => "https://api.openai.com/v1",
                LlmProvider::Openrouter => "https://openrouter.ai/api/v1",
                LlmProvider::Ollama => "http://localhost:11434/v1",
            }
        };
        url.trim_end_matches('/')
    }
}

#[derive(Debug, Deserialize, Clone, Default)]
pub struct DiscordConfig {
    #[serde(default)]
    pub bot_token: String,
}

/// Which rolling buffer a translation reads its context from.
#[derive(Debug, Deserialize, Serialize, Clone, Copy, PartialEq, Eq, Default)]
#[serde(rename_all = "snake_case")]
pub enum ContextScope {
    /// One buffer for every channel pairing.
    #[default]
    Shared,
    /// One buffer per source channel.
    PerChannel,
}

#[derive(Debug, Deserialize, Clone)]
pub struct ContextConfig {
    #[serde(default = "default_context_capacity")]
    pub capacity: usize,
    #[serde(default)]
    pub scope: ContextScope,
}

impl Default for ContextConfig {
    fn default() -> Self {
        Self {
            capacity: default_context_capacity(),
            scope: ContextScope::default(),
        }
    }
}

#[derive(Debug, Deserialize, Clone)]
pub struct RelayConfig {
    /// Re-post join/pin/boost notices in their own channel.
    #[serde(default)]
    pub mirror_system_messages: bool,
    #[serde(default = "default_embed_color")]
    pub embed_color: u32,
}

impl Default for RelayConfig {
    fn default() -> Self {
        Self {
            mirror_system_messages: false,
            embed_color: default_embed_color(),
        }
    }
}

#[derive(Debug, Deserialize, Serialize, Clone, PartialEq, Eq)]
pub struct ChannelLanguage {
    pub name: String,
    pub language: String,
}

/// Channel name to language code table. Every channel is a translation
/// target for every other channel, in declaration order.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ChannelLanguageMap {
    entries: Vec<ChannelLanguage>,
}

impl ChannelLanguageMap {
    pub fn new(entries: Vec<ChannelLanguage>) -> Result<Self> {
        if entries.len() < 2 {
            bail!("At least two relay channels are required, got {}", entries.len());
        }
        let mut seen = HashSet::new();
        for entry in &entries {
            if entry.name.trim().is_empty() || entry.language.trim().is_empty() {
                bail!("Relay channel entries need a name and a language");
            }
            if !seen.insert(entry.name.as_str()) {
                bail!("Duplicate relay channel: {}", entry.name);
            }
        }
        Ok(Self { entries })
    }

    pub fn language_of(&self, channel_name: &str) -> Option<&str> {
        self.entries
            .iter()
            .find(|e| e.name == channel_name)
            .map(|e| e.language.as_str())
    }

    /// Every configured channel except `source`.
    pub fn targets<'a>(&'a self, source: &'a str) -> impl Iterator<Item = &'a ChannelLanguage> {
        self.entries.iter().filter(move |e| e.name != source)
    }

    pub fn entries(&self) -> &[ChannelLanguage] {
        &self.entries
    }
}

impl Default for ChannelLanguageMap {
    fn default() -> Self {
        Self {
            entries: default_channels(),
        }
    }
}

#[derive(Debug, Clone)]
pub struct Config {
    pub discord: DiscordConfig,
    pub llm: LlmConfig,
    pub context: ContextConfig,
    pub relay: RelayConfig,
    pub channels: ChannelLanguageMap,
}

/// On-disk shape of the optional TOML file.
#[derive(Debug, Deserialize, Default)]
struct FileConfig {
    #[serde(default)]
    discord: DiscordConfig,
    #[serde(default)]
    llm: LlmConfig,
    #[serde(default)]
    context: ContextConfig,
    #[serde(default)]
    relay: RelayConfig,
    #[serde(default)]
    channels: Vec<ChannelLanguage>,
}

fn default_max_tokens() -> u32 {
    1024
}

fn default_system_prompt() -> String {
    "You are a gaming-specialized translator. \
     Translate Discord gaming chat accurately, preserving tone and context. \
     Use appropriate gaming terminology. \
     Correct typos and handle slang/abbreviations. \
     Prioritize gaming terms over literal translations. \
     Clarify unclear concepts concisely if needed. \
     NEVER translate emojis, special characters, or formatting (like *bold* or _italics_). \
     Leave them exactly as they appear in the original text. \
     Reply with translated text only, keeping all non-text elements unchanged."
        .to_string()
}

fn default_timeout_secs() -> u64 {
    60
}

fn default_context_capacity() -> usize {
    12
}

fn default_embed_color() -> u32 {
    0x3498db
}

fn default_channels() -> Vec<ChannelLanguage> {
    [("中文", "zh"), ("日本語", "ja"), ("한국인", "ko")]
        .into_iter()
        .map(|(name, language)| ChannelLanguage {
            name: name.to_string(),
            language: language.to_string(),
        })
        .collect()
}

impl Config {
    /// Build the configuration from the process environment, reading the
    /// TOML file named by `RELAY_CONFIG` first when it is set.
    pub fn from_env() -> Result<Self> {
        let path = std::env::var_os("RELAY_CONFIG").map(PathBuf::from);
        Self::load(path.as_deref(), |key| std::env::var(key).ok())
    }

    /// Layer environment values over an optional config file.
    pub fn load(path: Option<&Path>, env: impl Fn(&str) -> Option<String>) -> Result<Self> {
        let file = match path {
            Some(path) => {
                let content = std::fs::read_to_string(path)
                    .with_context(|| format!("Failed to read config file: {}", path.display()))?;
                Self::parse_file(&content)
                    .with_context(|| format!("Failed to parse config file: {}", path.display()))?
            }
            None => FileConfig::default(),
        };

        let env = |key: &str| env(key).filter(|v| !v.trim().is_empty());

        let mut discord = file.discord;
        if let Some(token) = env("DISCORD_BOT_TOKEN") {
            discord.bot_token = token;
        }

        let mut llm = file.llm;
        if let Some(key) = env("OPENAI_API_KEY") {
            llm.api_key = key;
        }
        if let Some(base_url) = env("OPENAI_API_BASE") {
            llm.base_url = base_url;
        }
        if let Some(model) = env("OPENAI_MODEL_NAME") {
            llm.model = model;
        }

        let channels = if file.channels.is_empty() {
            ChannelLanguageMap::default()
        } else {
            ChannelLanguageMap::new(file.channels)?
        };

        let config = Config {
            discord,
            llm,
            context: file.context,
            relay: file.relay,
            channels,
        };
        config.validate()?;
        Ok(config)
    }

    fn parse_file(content: &str) -> Result<FileConfig> {
        Ok(toml::from_str(content)?)
    }

    fn validate(&self) -> Result<()> {
        if self.discord.bot_token.is_empty() {
            bail!("DISCORD_BOT_TOKEN is not set");
        }
        if self.llm.model.is_empty() {
            bail!("OPENAI_MODEL_NAME is not set");
        }
        if self.llm.api_key.is_empty() && self.llm.provider != LlmProvider::Ollama {
            bail!("OPENAI_API_KEY is not set");
        }
        if self.context.capacity == 0 {
            bail!("context.capacity must be at least 1");
        }
        Ok(())
    }
}
