//! The persisted payload of an event.

use chrono::{DateTime, Duration, TimeZone, Timelike, Utc};
use chrono_tz::Tz;
use serde::{Deserialize, Serialize};

use crate::constants::MAX_NAME_BYTES;
use crate::error::{IanError, IanResult};
use crate::period::Period;

/// Optional repetition of an event, as RFC 5545 text. Empty means "none of that kind".
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct Recurrence {
    #[serde(default, skip_serializing_if = "String::is_empty")]
    pub rrule: String,
    #[serde(default, skip_serializing_if = "String::is_empty")]
    pub rdate: String,
    #[serde(default, skip_serializing_if = "String::is_empty")]
    pub exdate: String,
}

impl Recurrence {
    pub fn is_recurring(&self) -> bool {
        !self.rrule.is_empty() || !self.rdate.is_empty()
    }

    pub fn is_empty(&self) -> bool {
        self.rrule.is_empty() && self.rdate.is_empty() && self.exdate.is_empty()
    }
}

/// Everything stored in an event file.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct EventProperties {
    pub uid: String,

    pub summary: String,
    #[serde(default, skip_serializing_if = "String::is_empty")]
    pub description: String,
    #[serde(default, skip_serializing_if = "String::is_empty")]
    pub location: String,
    #[serde(default, skip_serializing_if = "String::is_empty")]
    pub url: String,

    /// Inclusive.
    pub start: DateTime<Utc>,
    /// Exclusive.
    pub end: DateTime<Utc>,

    pub created: DateTime<Utc>,
    pub modified: DateTime<Utc>,

    #[serde(default, skip_serializing_if = "Recurrence::is_empty")]
    pub recurrence: Recurrence,
}

/// A fresh random UID.
pub fn generate_uid() -> String {
    uuid::Uuid::new_v4().to_string()
}

impl EventProperties {
    /// New properties with a generated uid, created/modified set to `now`.
    pub fn new(summary: &str, start: DateTime<Utc>, end: DateTime<Utc>, now: DateTime<Utc>) -> Self {
        EventProperties {
            uid: generate_uid(),
            summary: summary.to_string(),
            description: String::new(),
            location: String::new(),
            url: String::new(),
            start,
            end,
            created: now,
            modified: now,
            recurrence: Recurrence::default(),
        }
    }

    pub fn validate(&self) -> IanResult<()> {
        if self.uid.is_empty() {
            return Err(IanError::Validation("uid cannot be empty".into()));
        }
        if self.summary.is_empty() {
            return Err(IanError::Validation("summary cannot be empty".into()));
        }
        if self.start > self.end {
            return Err(IanError::Validation(
                "start cannot be chronologically after end".into(),
            ));
        }
        if self.created > self.modified {
            return Err(IanError::Validation(
                "created cannot be chronologically after modified".into(),
            ));
        }
        Ok(())
    }

    /// The event's span. Only meaningful after validation.
    pub fn period(&self) -> Period {
        Period {
            from: self.start,
            to: self.end,
        }
    }

    /// A filesystem-safe default file name derived from the summary.
    ///
    /// This is only a suggestion for new events; it never identifies one.
    pub fn format_name(&self) -> String {
        format_name(&self.summary)
    }

    /// Start and end both sit on a local midnight in `tz`, with a non-empty span.
    pub fn is_all_day(&self, tz: Tz) -> bool {
        self.end > self.start && is_local_midnight(self.start, tz) && is_local_midnight(self.end, tz)
    }

    /// Rewrite a legacy all-day end (`next midnight - 1s`) to the exclusive next midnight.
    pub fn normalize_legacy_all_day(&mut self, tz: Tz) {
        let end = self.end + Duration::seconds(1);
        if end > self.start && is_local_midnight(self.start, tz) && is_local_midnight(end, tz) {
            self.end = end;
        }
    }

    /// Decode an event file.
    ///
    /// Native TOML datetimes are accepted alongside RFC 3339 strings.
    pub fn from_toml(content: &str) -> IanResult<Self> {
        let mut table: toml::Table =
            toml::from_str(content).map_err(|e| IanError::Serialization(e.to_string()))?;

        for (_, value) in table.iter_mut() {
            if let toml::Value::Datetime(dt) = value {
                *value = toml::Value::String(dt.to_string());
            }
        }

        toml::Value::Table(table)
            .try_into()
            .map_err(|e: toml::de::Error| IanError::Serialization(e.to_string()))
    }

    pub fn to_toml(&self) -> IanResult<String> {
        toml::to_string(self).map_err(|e| IanError::Serialization(e.to_string()))
    }
}

pub fn format_name(summary: &str) -> String {
    let name: String = summary
        .chars()
        .map(|c| match c {
            '/' | '\\' => '-',
            '.' => '_',
            c if c.is_control() => ' ',
            c => c,
        })
        .collect();
    let name = name.trim();

    let mut end = name.len().min(MAX_NAME_BYTES);
    while !name.is_char_boundary(end) {
        end -= 1;
    }
    name[..end].trim_end().to_string()
}

fn is_local_midnight(t: DateTime<Utc>, tz: Tz) -> bool {
    let local = tz.from_utc_datetime(&t.naive_utc());
    local.hour() == 0 && local.minute() == 0 && local.second() == 0
}
