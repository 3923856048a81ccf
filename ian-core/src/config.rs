//! Store configuration (`<root>/.config.toml`) and per-instance options.

use std::collections::BTreeMap;
use std::path::{Path, PathBuf};
use std::time::Duration;

use chrono_tz::Tz;
use serde::{Deserialize, Serialize};

use crate::constants::{CONFIG_FILE_NAME, DEFAULT_ROOT_DIR_NAME};
use crate::error::{IanError, IanResult};
use crate::event::check_calendar;
use crate::sources::CalendarSource;
use crate::sync::Hook;

/// Everything declared in the store's configuration file.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct StoreConfig {
    #[serde(default, skip_serializing_if = "BTreeMap::is_empty")]
    pub calendars: BTreeMap<String, CalendarConfig>,

    #[serde(default, skip_serializing_if = "BTreeMap::is_empty")]
    pub sources: BTreeMap<String, CalendarSource>,

    #[serde(default, skip_serializing_if = "BTreeMap::is_empty")]
    pub hooks: BTreeMap<String, Hook>,
}

/// Display settings for one calendar directory.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct CalendarConfig {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub color: Option<String>,
}

impl StoreConfig {
    pub fn path(root: &Path) -> PathBuf {
        root.join(CONFIG_FILE_NAME)
    }

    /// Load the configuration; a missing file is an empty configuration.
    pub fn load(root: &Path) -> IanResult<Self> {
        let path = Self::path(root);

        if !path.exists() {
            return Ok(Self::default());
        }

        let content = std::fs::read_to_string(&path)?;
        Self::parse(&content)
            .map_err(|e| IanError::Config(format!("{}: {e}", path.display())))
    }

    pub fn parse(content: &str) -> IanResult<Self> {
        let config: Self = toml::from_str(content).map_err(|e| IanError::Config(e.to_string()))?;
        for name in config.sources.keys() {
            check_source_name(name)?;
        }
        Ok(config)
    }

    pub fn save(&self, root: &Path) -> IanResult<()> {
        let content =
            toml::to_string_pretty(self).map_err(|e| IanError::Config(e.to_string()))?;
        std::fs::create_dir_all(root)?;
        std::fs::write(Self::path(root), content)?;
        Ok(())
    }

    /// Register a source, replacing any source already using `name`.
    pub fn add_source(&mut self, name: &str, source: CalendarSource) -> IanResult<()> {
        check_source_name(name)?;
        self.sources.insert(name.to_string(), source);
        Ok(())
    }
}

/// Source names become directories under the cache, so they follow calendar naming rules.
pub(crate) fn check_source_name(name: &str) -> IanResult<()> {
    check_calendar(name).map_err(|e| IanError::Config(format!("source '{name}': {e}")))
}

/// Per-invocation settings threaded through the store.
#[derive(Debug, Clone, PartialEq)]
pub struct InstanceOptions {
    /// Zone used for floating times, all-day detection and recurrence evaluation.
    pub timezone: Tz,
    /// Accept events that fail validation. Only meant for repairing broken data.
    pub skip_validation: bool,
    /// Upper bound on a single source download.
    pub fetch_timeout: Duration,
}

impl Default for InstanceOptions {
    fn default() -> Self {
        InstanceOptions {
            timezone: Tz::UTC,
            skip_validation: false,
            fetch_timeout: Duration::from_secs(30),
        }
    }
}

/// `~/.ian`, when a home directory is known.
pub fn default_root() -> IanResult<PathBuf> {
    dirs::home_dir()
        .map(|home| home.join(DEFAULT_ROOT_DIR_NAME))
        .ok_or_else(|| IanError::Config("Could not determine home directory".into()))
}

/// Expand a leading `~` in a user-supplied root.
pub fn expand_root(root: &str) -> PathBuf {
    PathBuf::from(shellexpand::tilde(root).into_owned())
}

/// Parse a human duration such as `2h`, `10m` or `1h 30m`. Negative durations are rejected.
pub fn parse_duration(input: &str) -> IanResult<Duration> {
    let trimmed = input.trim();
    if trimmed.starts_with('-') {
        return Err(IanError::Duration {
            input: input.to_string(),
            reason: "cannot be negative".into(),
        });
    }
    humantime::parse_duration(trimmed).map_err(|e| IanError::Duration {
        input: input.to_string(),
        reason: e.to_string(),
    })
}

/// Serde adapter storing optional durations as human-readable text.
/// Pair with `default` and `skip_serializing_if = "Option::is_none"`.
pub(crate) mod duration_text {
    use std::time::Duration;

    use serde::{Deserialize, Deserializer, Serializer, de::Error};

    pub fn serialize<S: Serializer>(value: &Option<Duration>, serializer: S) -> Result<S::Ok, S::Error> {
        match value {
            Some(d) => serializer.serialize_str(&humantime::format_duration(*d).to_string()),
            None => serializer.serialize_none(),
        }
    }

    pub fn deserialize<'de, D: Deserializer<'de>>(deserializer: D) -> Result<Option<Duration>, D::Error> {
        let text: Option<String> = Option::deserialize(deserializer)?;
        match text.as_deref().map(str::trim) {
            None | Some("") => Ok(None),
            Some(s) => super::parse_duration(s).map(Some).map_err(D::Error::custom),
        }
    }
}
