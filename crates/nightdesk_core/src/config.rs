//! Runtime configuration from the environment.
//!
//! # Responsibility
//! - Read credentials, parent page id, state file and logging settings.
//! - Reject missing or malformed values before any store call.
//!
//! # Invariants
//! - Identifiers are normalized to hyphenated UUIDs.
//! - Errors name the offending variable and value.

use crate::model::resource::ResourceId;
use crate::state::DEFAULT_STATE_FILE;
use once_cell::sync::Lazy;
use regex::Regex;
use std::error::Error;
use std::fmt::{Display, Formatter};
use std::path::PathBuf;
use uuid::Uuid;

pub const ENV_NOTION_TOKEN: &str = "NOTION_TOKEN";
pub const ENV_PARENT_PAGE_ID: &str = "PARENT_PAGE_ID";
pub const ENV_STATE_FILE: &str = "NIGHTDESK_STATE_FILE";
pub const ENV_LOG_LEVEL: &str = "NIGHTDESK_LOG_LEVEL";
pub const ENV_LOG_DIR: &str = "NIGHTDESK_LOG_DIR";

static URL_TRAILING_ID: Lazy<Regex> =
    Lazy::new(|| Regex::new(r"([0-9a-fA-F]{32})(?:[?#].*)?$").expect("valid id regex"));

/// Configuration errors. Always fatal.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ConfigError {
    /// Required variable unset or blank.
    Missing(&'static str),
    /// Variable set but not a usable identifier.
    InvalidId { key: &'static str, value: String },
}

impl Display for ConfigError {
    fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Missing(key) => write!(f, "required configuration `{key}` is not set"),
            Self::InvalidId { key, value } => {
                write!(f, "configuration `{key}` is not a valid id: `{value}`")
            }
        }
    }
}

impl Error for ConfigError {}

/// Resolved runtime configuration.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Config {
    pub notion_token: Option<String>,
    pub parent_page_id: Option<ResourceId>,
    pub state_file: PathBuf,
    pub log_level: Option<String>,
    pub log_dir: Option<PathBuf>,
}

impl Config {
    /// Reads configuration from process environment variables.
    pub fn from_env() -> Result<Self, ConfigError> {
        Self::from_lookup(|key| std::env::var(key).ok())
    }

    /// Reads configuration through `lookup`.
    ///
    /// # Errors
    /// - Returns `ConfigError::InvalidId` when `PARENT_PAGE_ID` is set but
    ///   malformed. Absence is only checked by `require_parent_page_id`.
    pub fn from_lookup(lookup: impl Fn(&str) -> Option<String>) -> Result<Self, ConfigError> {
        let value = |key: &str| {
            lookup(key)
                .map(|raw| raw.trim().to_string())
                .filter(|raw| !raw.is_empty())
        };

        let parent_page_id = value(ENV_PARENT_PAGE_ID)
            .map(|raw| parse_resource_id(ENV_PARENT_PAGE_ID, &raw))
            .transpose()?;

        Ok(Self {
            notion_token: value(ENV_NOTION_TOKEN),
            parent_page_id,
            state_file: value(ENV_STATE_FILE)
                .map(PathBuf::from)
                .unwrap_or_else(|| PathBuf::from(DEFAULT_STATE_FILE)),
            log_level: value(ENV_LOG_LEVEL),
            log_dir: value(ENV_LOG_DIR).map(PathBuf::from),
        })
    }

    pub fn require_notion_token(&self) -> Result<&str, ConfigError> {
        self.notion_token
            .as_deref()
            .ok_or(ConfigError::Missing(ENV_NOTION_TOKEN))
    }

    pub fn require_parent_page_id(&self) -> Result<ResourceId, ConfigError> {
        self.parent_page_id
            .ok_or(ConfigError::Missing(ENV_PARENT_PAGE_ID))
    }
}

/// Parses a store id given as a UUID, 32 hex digits, or a page URL ending in
/// the id.
pub fn parse_resource_id(key: &'static str, raw: &str) -> Result<ResourceId, ConfigError> {
    let trimmed = raw.trim();
    if let Ok(id) = Uuid::parse_str(trimmed) {
        return Ok(id);
    }
    URL_TRAILING_ID
        .captures(trimmed)
        .and_then(|captures| captures.get(1))
        .and_then(|hex| Uuid::parse_str(hex.as_str()).ok())
        .ok_or_else(|| ConfigError::InvalidId {
            key,
            value: trimmed.to_string(),
        })
}
