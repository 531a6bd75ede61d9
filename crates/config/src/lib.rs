//! Configuration loading, validation, and management for coplan.
//!
//! Loads configuration from `coplan.toml` (or the file named by
//! `COPLAN_CONFIG`) with environment variable overrides. Validates all
//! settings at startup.

use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::path::{Path, PathBuf};

/// The root configuration structure.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AppConfig {
    /// Number of cooperating agents
    #[serde(default = "default_agent_num")]
    pub agent_num: usize,

    /// Step policy selection and stage tuning
    #[serde(default)]
    pub policy: PolicyConfig,

    /// Post-episode reflection
    #[serde(default)]
    pub reflexion: ReflexionConfig,

    /// History window used for per-step prompts
    #[serde(default)]
    pub history: HistoryWindow,

    /// History window used for reflection prompts
    #[serde(default)]
    pub reflexion_history: HistoryWindow,

    /// Message window forced open for theory-of-mind prompts
    #[serde(default = "default_tom_message_history_size")]
    pub tom_message_history_size: usize,

    /// Image input
    #[serde(default)]
    pub vision: VisionConfig,
}

fn default_agent_num() -> usize {
    1
}
fn default_tom_message_history_size() -> usize {
    50
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PolicyConfig {
    /// Registered policy name (e.g. "simple", "subgoal", "interval_conversation")
    #[serde(default = "default_policy_name")]
    pub name: String,

    /// Steps between conversations for gated policies
    #[serde(default = "default_one")]
    pub communication_interval: usize,

    /// Speaking turns per agent in a conversation
    #[serde(default = "default_conversation_turns")]
    pub conversation_turns: usize,

    /// Ask for JSON-structured conversation replies
    #[serde(default)]
    pub structured_conversation: bool,

    /// How the achievement judge inspects the plan
    #[serde(default)]
    pub judge_mode: JudgeMode,

    /// Upper bound on subgoal refinements per agent per step
    #[serde(default = "default_max_refinements")]
    pub max_refinements: usize,
}

fn default_policy_name() -> String {
    "simple".into()
}
fn default_one() -> usize {
    1
}
fn default_conversation_turns() -> usize {
    2
}
fn default_max_refinements() -> usize {
    3
}

impl Default for PolicyConfig {
    fn default() -> Self {
        Self {
            name: default_policy_name(),
            communication_interval: 1,
            conversation_turns: default_conversation_turns(),
            structured_conversation: false,
            judge_mode: JudgeMode::default(),
            max_refinements: default_max_refinements(),
        }
    }
}

/// How the achievement judge inspects the plan.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum JudgeMode {
    /// Yes/no on the current subgoal only (default)
    #[default]
    Cursor,
    /// Yes/no list over the whole active plan
    Chain,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ReflexionConfig {
    #[serde(default)]
    pub kind: ReflectionKind,

    #[serde(default)]
    pub mode: ReflectionMode,

    /// Reflection notes kept per agent across episodes
    #[serde(default = "default_memory_size")]
    pub memory_size: usize,

    /// Rounds of discussion in group mode
    #[serde(default = "default_discussion_rounds")]
    pub discussion_rounds: usize,
}

fn default_memory_size() -> usize {
    3
}
fn default_discussion_rounds() -> usize {
    4
}

impl Default for ReflexionConfig {
    fn default() -> Self {
        Self {
            kind: ReflectionKind::default(),
            mode: ReflectionMode::default(),
            memory_size: default_memory_size(),
            discussion_rounds: default_discussion_rounds(),
        }
    }
}

/// What a reflection prompt asks about.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ReflectionKind {
    /// Reflection disabled
    None,
    /// Strategy in general (default)
    #[default]
    General,
    /// Subgoal planning, citing achieved and failed subgoals
    Subgoal,
}

/// Who reflects.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ReflectionMode {
    /// Each agent reflects alone (default)
    #[default]
    Individual,
    /// Agents discuss, then share one summarized strategy
    Group,
}

/// Which history entries a prompt sees.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct HistoryWindow {
    /// Most recent entries kept per label (absent = unlimited)
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub size: Option<usize>,

    /// Allowed labels (empty = all)
    #[serde(default)]
    pub labels: Vec<String>,

    /// Per-label overrides of `size`
    #[serde(default)]
    pub labels_len: BTreeMap<String, usize>,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct VisionConfig {
    /// Attach rendered views to model calls
    #[serde(default)]
    pub enabled: bool,

    /// Per-agent override of `enabled`, indexed by agent id
    #[serde(default)]
    pub agents: Vec<bool>,
}

impl VisionConfig {
    /// Whether `agent_id` receives images.
    pub fn uses_vision(&self, agent_id: usize) -> bool {
        self.agents.get(agent_id).copied().unwrap_or(self.enabled)
    }

    /// Whether any of the first `agent_num` agents receives images.
    pub fn any(&self, agent_num: usize) -> bool {
        (0..agent_num).any(|i| self.uses_vision(i))
    }
}

impl AppConfig {
    /// Load configuration from `$COPLAN_CONFIG`, falling back to
    /// `./coplan.toml`.
    ///
    /// Environment variable overrides:
    /// - `COPLAN_POLICY`: policy name
    /// - `COPLAN_AGENT_NUM`: agent count
    pub fn load() -> Result<Self, ConfigError> {
        let path = std::env::var("COPLAN_CONFIG")
            .map(PathBuf::from)
            .unwrap_or_else(|_| PathBuf::from("coplan.toml"));
        let mut config = Self::load_from(&path)?;

        if let Ok(policy) = std::env::var("COPLAN_POLICY") {
            config.policy.name = policy;
        }

        if let Ok(raw) = std::env::var("COPLAN_AGENT_NUM") {
            config.agent_num = raw.trim().parse().map_err(|_| {
                ConfigError::ValidationError(format!(
                    "COPLAN_AGENT_NUM must be a positive integer, got '{raw}'"
                ))
            })?;
        }

        config.validate()?;
        Ok(config)
    }

    /// Load configuration from a specific file path.
    pub fn load_from(path: &Path) -> Result<Self, ConfigError> {
        if !path.exists() {
            tracing::info!("No config file found at {}, using defaults", path.display());
            return Ok(Self::default());
        }

        let content = std::fs::read_to_string(path).map_err(|e| ConfigError::ReadError {
            path: path.to_path_buf(),
            reason: e.to_string(),
        })?;

        let config: Self = toml::from_str(&content).map_err(|e| ConfigError::ParseError {
            path: path.to_path_buf(),
            reason: e.to_string(),
        })?;

        config.validate()?;
        Ok(config)
    }

    /// Validate the configuration.
    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.agent_num == 0 {
            return Err(ConfigError::ValidationError(
                "agent_num must be at least 1".into(),
            ));
        }

        if self.policy.communication_interval == 0 {
            return Err(ConfigError::ValidationError(
                "policy.communication_interval must be at least 1".into(),
            ));
        }

        if self.policy.conversation_turns == 0 {
            return Err(ConfigError::ValidationError(
                "policy.conversation_turns must be at least 1".into(),
            ));
        }

        if self.reflexion.mode == ReflectionMode::Group && self.reflexion.discussion_rounds == 0 {
            return Err(ConfigError::ValidationError(
                "reflexion.discussion_rounds must be at least 1 in group mode".into(),
            ));
        }

        if self.vision.agents.len() > self.agent_num {
            return Err(ConfigError::ValidationError(format!(
                "vision.agents has {} entries but agent_num is {}",
                self.vision.agents.len(),
                self.agent_num
            )));
        }

        Ok(())
    }

    /// Generate a default config TOML string.
    pub fn default_toml() -> String {
        let config = Self::default();
        toml::to_string_pretty(&config).unwrap_or_default()
    }
}

impl Default for AppConfig {
    fn default() -> Self {
        Self {
            agent_num: default_agent_num(),
            policy: PolicyConfig::default(),
            reflexion: ReflexionConfig::default(),
            history: HistoryWindow::default(),
            reflexion_history: HistoryWindow::default(),
            tom_message_history_size: default_tom_message_history_size(),
            vision: VisionConfig::default(),
        }
    }
}

/// Configuration errors.
#[derive(Debug, thiserror::Error)]
pub enum ConfigError {
    #[error("Failed to read config file at {path}: {reason}")]
    ReadError { path: PathBuf, reason: String },

    #[error("Failed to parse config file at {path}: {reason}")]
    ParseError { path: PathBuf, reason: String },

    #[error("Configuration validation failed: {0}")]
    ValidationError(String),
}
