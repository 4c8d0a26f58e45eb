use std::collections::BTreeMap;
use std::env;
use std::fs;
use std::path::Path;
use std::time::Duration;

use anyhow::{Context, Result, anyhow};
use serde::{Deserialize, Serialize};

/// Location of the settings file, relative to the workspace root.
pub const SETTINGS_PATH: &str = "config/assistant.toml";

/// Top-level assistant settings, usually loaded from `config/assistant.toml`.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct AssistantSettings {
    #[serde(default)]
    pub classifier: ClassifierConfig,
    #[serde(default)]
    pub agent: AgentConfig,
    /// User-facing texts shown in place of an answer.
    #[serde(default)]
    pub messages: FallbackMessages,
    /// What happens to already streamed text when the stream breaks.
    #[serde(default)]
    pub partial_content: PartialContentPolicy,
    /// Connect timeout of the shared HTTP client, in seconds.
    #[serde(default)]
    pub connect_timeout_secs: Option<u64>,
}

impl AssistantSettings {
    /// Reads the settings of the given workspace.
    ///
    /// A missing settings file is not an error: defaults are used instead and the
    /// classifier URL is expected to come from the environment.
    pub fn load(workspace_root: &Path) -> Result<Self> {
        let config_path = workspace_root.join(SETTINGS_PATH);
        if !config_path.exists() {
            return Ok(Self::default());
        }
        let raw = fs::read_to_string(&config_path)
            .with_context(|| format!("failed to read {}", config_path.display()))?;
        Self::from_toml(&raw).with_context(|| format!("failed to parse {}", config_path.display()))
    }

    pub fn from_toml(raw: &str) -> Result<Self> {
        Ok(toml::from_str(raw)?)
    }

    pub fn connect_timeout(&self) -> Option<Duration> {
        self.connect_timeout_secs.map(Duration::from_secs)
    }
}

/// Where and how to reach the classification service.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ClassifierConfig {
    /// Endpoint URL. Takes precedence over `url_env`.
    #[serde(default)]
    pub url: Option<String>,
    /// Name of an environment variable holding the endpoint URL.
    #[serde(default = "default_classifier_url_env")]
    pub url_env: Option<String>,
    #[serde(default)]
    pub extra_headers: BTreeMap<String, String>,
}

impl Default for ClassifierConfig {
    fn default() -> Self {
        Self {
            url: None,
            url_env: default_classifier_url_env(),
            extra_headers: BTreeMap::new(),
        }
    }
}

impl ClassifierConfig {
    /// Resolves the endpoint URL from the settings file or the environment.
    pub fn resolved_url(&self) -> Result<String> {
        if let Some(url) = self.url.as_ref().filter(|url| !url.trim().is_empty()) {
            return Ok(url.trim().to_string());
        }
        if let Some(var) = &self.url_env
            && let Ok(value) = env::var(var)
            && !value.trim().is_empty()
        {
            return Ok(value.trim().to_string());
        }
        Err(anyhow!(
            "no classifier endpoint configured: set classifier.url in {} or the {} environment variable",
            SETTINGS_PATH,
            self.url_env.as_deref().unwrap_or("ASSISTANT_CLASSIFIER_URL")
        ))
    }
}

fn default_classifier_url_env() -> Option<String> {
    Some(String::from("ASSISTANT_CLASSIFIER_URL"))
}

/// Settings applied to every agent endpoint the classifier redirects to.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct AgentConfig {
    #[serde(default)]
    pub extra_headers: BTreeMap<String, String>,
}

/// Fixed texts that settle a turn when no answer can be shown.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct FallbackMessages {
    /// The classifier answered directly but with an empty answer.
    pub no_answer: String,
    /// The classification stage failed.
    pub connection_failure: String,
    /// The agent endpoint returned an error status without a body.
    pub agent_unavailable: String,
    /// The agent stream broke while being read.
    pub stream_failure: String,
    /// The submission was cancelled before anything arrived.
    pub cancelled: String,
}

impl Default for FallbackMessages {
    fn default() -> Self {
        Self {
            no_answer: String::from("I could not find an answer to that question."),
            connection_failure: String::from(
                "Sorry, I could not reach the assistant service. Please try again.",
            ),
            agent_unavailable: String::from(
                "The assistant agent is not available right now. Please try again later.",
            ),
            stream_failure: String::from(
                "The connection was interrupted while receiving the answer. Please try again.",
            ),
            cancelled: String::from("Request cancelled."),
        }
    }
}

/// Fate of partially streamed text when the agent stream fails mid-way.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum PartialContentPolicy {
    /// Replace everything with the failure message.
    #[default]
    Discard,
    /// Keep what arrived and append the failure message after it.
    Keep,
}
