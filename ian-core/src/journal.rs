//! Small persisted `name -> timestamp` maps used to throttle periodic work.
//!
//! Both the source cache and the hook dispatcher keep one. The file is always
//! rewritten whole, and reading it is tolerant: entries that don't decode are
//! logged and dropped instead of failing the caller.

use std::collections::BTreeMap;
use std::path::{Path, PathBuf};

use chrono::{DateTime, Utc};
use tracing::warn;

use crate::error::{IanError, IanResult};

#[derive(Debug, Clone)]
pub struct Journal {
    path: PathBuf,
    section: &'static str,
    entries: BTreeMap<String, DateTime<Utc>>,
    changed: bool,
}

impl Journal {
    /// Read the journal at `path`, keeping the entries of table `section`.
    pub fn load(path: &Path, section: &'static str) -> IanResult<Self> {
        let mut journal = Journal {
            path: path.to_path_buf(),
            section,
            entries: BTreeMap::new(),
            changed: false,
        };

        let content = match std::fs::read_to_string(path) {
            Ok(content) => content,
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => return Ok(journal),
            Err(e) => return Err(e.into()),
        };

        let table: toml::Table = match toml::from_str(&content) {
            Ok(table) => table,
            Err(e) => {
                warn!(journal = %path.display(), error = %e, "unreadable journal, starting empty");
                return Ok(journal);
            }
        };

        let Some(entries) = table.get(section).and_then(|v| v.as_table()) else {
            return Ok(journal);
        };

        for (name, value) in entries {
            match decode_timestamp(value) {
                Some(t) => {
                    journal.entries.insert(name.clone(), t);
                }
                None => warn!(
                    journal = %path.display(),
                    entry = %name,
                    "ignoring journal entry with an invalid timestamp"
                ),
            }
        }

        Ok(journal)
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    pub fn get(&self, name: &str) -> Option<DateTime<Utc>> {
        self.entries.get(name).copied()
    }

    pub fn set(&mut self, name: &str, at: DateTime<Utc>) {
        if self.entries.insert(name.to_string(), at) != Some(at) {
            self.changed = true;
        }
    }

    pub fn names(&self) -> impl Iterator<Item = &str> {
        self.entries.keys().map(String::as_str)
    }

    pub fn is_changed(&self) -> bool {
        self.changed
    }

    /// Rewrite the whole file, with a leading note that it is machine-managed.
    pub fn save(&mut self, now: DateTime<Utc>) -> IanResult<()> {
        let mut section = toml::Table::new();
        for (name, at) in &self.entries {
            section.insert(name.clone(), toml::Value::String(at.to_rfc3339()));
        }
        let mut root = toml::Table::new();
        root.insert(self.section.to_string(), toml::Value::Table(section));

        let body = toml::to_string(&root).map_err(|e| IanError::Serialization(e.to_string()))?;
        let content = format!(
            "# This file is automatically generated and managed.\n# Last change: {}\n\n{}",
            now.to_rfc3339(),
            body
        );

        if let Some(parent) = self.path.parent() {
            std::fs::create_dir_all(parent)?;
        }
        let temp = self.path.with_extension("toml.tmp");
        std::fs::write(&temp, content)?;
        std::fs::rename(&temp, &self.path)?;

        self.changed = false;
        Ok(())
    }

    /// Save only when an entry actually changed since loading.
    pub fn save_if_changed(&mut self, now: DateTime<Utc>) -> IanResult<bool> {
        if !self.changed {
            return Ok(false);
        }
        self.save(now)?;
        Ok(true)
    }
}

fn decode_timestamp(value: &toml::Value) -> Option<DateTime<Utc>> {
    match value {
        toml::Value::String(s) => DateTime::parse_from_rfc3339(s)
            .ok()
            .map(|t| t.with_timezone(&Utc)),
        toml::Value::Datetime(dt) => DateTime::parse_from_rfc3339(&dt.to_string())
            .ok()
            .map(|t| t.with_timezone(&Utc)),
        _ => None,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::TimeZone;

    #[test]
    fn test_missing_journal_is_empty() {
        let dir = tempfile::tempdir().unwrap();
        let journal = Journal::load(&dir.path().join("j.toml"), "sources").unwrap();
        assert_eq!(journal.names().count(), 0);
        assert!(!journal.is_changed());
    }

    #[test]
    fn test_save_and_reload() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("nested/j.toml");
        let at = Utc.with_ymd_and_hms(2024, 1, 1, 12, 0, 0).unwrap();

        let mut journal = Journal::load(&path, "sources").unwrap();
        journal.set("holidays", at);
        assert!(journal.save_if_changed(at).unwrap());
        assert!(!journal.save_if_changed(at).unwrap());

        let content = std::fs::read_to_string(&path).unwrap();
        assert!(content.starts_with("# This file is automatically generated"));

        let reloaded = Journal::load(&path, "sources").unwrap();
        assert_eq!(reloaded.get("holidays"), Some(at));
    }

    #[test]
    fn test_setting_same_value_is_not_a_change() {
        let dir = tempfile::tempdir().unwrap();
        let at = Utc.with_ymd_and_hms(2024, 1, 1, 12, 0, 0).unwrap();
        let mut journal = Journal::load(&dir.path().join("j.toml"), "cooldowns").unwrap();
        journal.set("git", at);
        journal.save(at).unwrap();
        journal.set("git", at);
        assert!(!journal.is_changed());
    }

    #[test]
    fn test_bad_entries_are_skipped() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("j.toml");
        std::fs::write(
            &path,
            "[sources]\ngood = \"2024-01-01T12:00:00Z\"\nbad = \"yesterday\"\nworse = 3\n",
        )
        .unwrap();

        let journal = Journal::load(&path, "sources").unwrap();
        assert_eq!(journal.names().collect::<Vec<_>>(), vec!["good"]);
    }

    #[test]
    fn test_garbage_file_starts_empty() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("j.toml");
        std::fs::write(&path, "this is = = not toml").unwrap();
        let journal = Journal::load(&path, "sources").unwrap();
        assert_eq!(journal.names().count(), 0);
    }
}
