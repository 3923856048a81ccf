//! Traversal-safe event addresses.

use std::fmt;
use std::path::{Path, PathBuf};

use crate::constants::{CACHE_DIR_NAME, MAX_FREE_NAME_ATTEMPTS};
use crate::error::{IanError, IanResult};

/// Where an event file lives, relative to the store root.
///
/// Regular events live at `<calendar>/<name>`. Cached source events live at
/// `.cache/<source>/<name>` and carry the source name as their calendar.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct EventPath {
    calendar: String,
    name: String,
    cached: bool,
}

impl EventPath {
    /// Validate a (calendar, name) pair. Surrounding whitespace is trimmed from `name`.
    pub fn new(calendar: &str, name: &str) -> IanResult<Self> {
        check_calendar(calendar)?;
        let name = name.trim();
        check_name(name)?;

        Ok(EventPath {
            calendar: calendar.to_string(),
            name: name.to_string(),
            cached: false,
        })
    }

    /// Address of an event cached from the source `source`.
    pub fn cached(source: &str, name: &str) -> IanResult<Self> {
        let mut path = Self::new(source, name)?;
        path.cached = true;
        Ok(path)
    }

    /// Parse `calendar/name` or `.cache/source/name`.
    pub fn parse(input: &str) -> IanResult<Self> {
        let parts: Vec<&str> = input.split('/').collect();
        match parts.as_slice() {
            [calendar, name] => Self::new(calendar, name),
            [marker, source, name] if *marker == CACHE_DIR_NAME => Self::cached(source, name),
            _ => Err(IanError::InvalidPath(format!(
                "'{input}' is not of the form calendar/name"
            ))),
        }
    }

    /// Path of the `index`th generated occurrence of this event.
    ///
    /// The dot prefix keeps it from ever naming a real file picked up by a scan.
    pub(crate) fn occurrence(&self, index: usize) -> Self {
        EventPath {
            calendar: self.calendar.clone(),
            name: format!(".{}_{}", self.name, index),
            cached: self.cached,
        }
    }

    pub fn calendar(&self) -> &str {
        &self.calendar
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn is_cached(&self) -> bool {
        self.cached
    }

    /// The path relative to the store root.
    pub fn relative(&self) -> PathBuf {
        let base = if self.cached {
            PathBuf::from(CACHE_DIR_NAME)
        } else {
            PathBuf::new()
        };
        base.join(&self.calendar).join(&self.name)
    }

    /// The file this path addresses under `root`.
    pub fn resolve(&self, root: &Path) -> PathBuf {
        root.join(self.relative())
    }

    /// Return this path, or the first `<name>_N` variant not already taken under `root`.
    pub fn first_free(self, root: &Path) -> IanResult<Self> {
        if !self.resolve(root).exists() {
            return Ok(self);
        }

        for n in 2..=MAX_FREE_NAME_ATTEMPTS {
            let candidate = EventPath {
                name: format!("{}_{}", self.name, n),
                ..self.clone()
            };
            if !candidate.resolve(root).exists() {
                return Ok(candidate);
            }
        }

        Err(IanError::NoFreeName(self.to_string()))
    }
}

impl fmt::Display for EventPath {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        if self.cached {
            write!(f, "{}/", CACHE_DIR_NAME)?;
        }
        write!(f, "{}/{}", self.calendar, self.name)
    }
}

fn is_separator(c: char) -> bool {
    c == '/' || c == '\\' || std::path::is_separator(c)
}

pub(crate) fn check_calendar(calendar: &str) -> IanResult<()> {
    if calendar.is_empty() {
        return Err(IanError::InvalidPath("calendar cannot be empty".into()));
    }
    if calendar.starts_with('.')
        || calendar
            .chars()
            .any(|c| is_separator(c) || c.is_whitespace() || c.is_control())
    {
        return Err(IanError::InvalidPath(format!(
            "calendar '{calendar}' contains illegal characters"
        )));
    }
    Ok(())
}

fn check_name(name: &str) -> IanResult<()> {
    if name.is_empty() {
        return Err(IanError::InvalidPath("name cannot be empty".into()));
    }
    if name.starts_with('.') || name.chars().any(|c| is_separator(c) || c.is_control()) {
        return Err(IanError::InvalidPath(format!(
            "name '{name}' contains illegal characters"
        )));
    }
    Ok(())
}
