//! External calendar sources and their on-disk cache.
//!
//! Each configured source is imported into `.cache/<name>/` as read-only
//! events. `.cache/.cache-journal.toml` records when every source was last
//! refreshed so a source is only fetched again once its lifetime has passed.

use std::collections::{BTreeMap, HashSet};
use std::fmt;
use std::path::{Path, PathBuf};
use std::time::Duration;

use chrono::{DateTime, TimeDelta, Utc};
use chrono_tz::Tz;
use serde::{Deserialize, Serialize};
use tracing::{debug, info, warn};
use url::Url;

use crate::config::check_source_name;
use crate::constants::{CACHE_DIR_NAME, CACHE_JOURNAL_FILE_NAME, DEFAULT_CACHE_LIFETIME};
use crate::error::{IanError, IanResult};
use crate::event::{EventProperties, format_name};
use crate::ics;
use crate::journal::Journal;

const JOURNAL_SECTION: &str = "sources";

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum SourceType {
    /// Another ian store.
    Native,
    Caldav,
    /// A static iCalendar document served over HTTP.
    Ical,
}

impl fmt::Display for SourceType {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        match self {
            SourceType::Native => write!(f, "native"),
            SourceType::Caldav => write!(f, "caldav"),
            SourceType::Ical => write!(f, "ical"),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CalendarSource {
    #[serde(rename = "type")]
    pub kind: SourceType,
    pub source: String,
    /// How long an import stays fresh. Defaults to two hours.
    #[serde(
        default,
        with = "crate::config::duration_text",
        skip_serializing_if = "Option::is_none"
    )]
    pub lifetime: Option<Duration>,
}

impl CalendarSource {
    pub fn lifetime(&self) -> Duration {
        self.lifetime.unwrap_or(DEFAULT_CACHE_LIFETIME)
    }

    /// Fetch and decode the source's events.
    pub fn import(&self, fetcher: &dyn SourceFetcher, tz: Tz) -> IanResult<Vec<EventProperties>> {
        match self.kind {
            SourceType::Ical => {
                debug!(url = %self.source, "downloading iCalendar");
                let body = fetcher.fetch(&self.source)?;
                ics::from_ical(&body, tz)
            }
            SourceType::Native | SourceType::Caldav => {
                Err(IanError::UnsupportedSource(self.kind.to_string()))
            }
        }
    }
}

/// Downloads a source document.
pub trait SourceFetcher {
    fn fetch(&self, url: &str) -> IanResult<String>;
}

/// Blocking HTTP(S) fetcher.
pub struct HttpFetcher {
    client: reqwest::blocking::Client,
}

impl HttpFetcher {
    pub fn new(timeout: Duration) -> IanResult<Self> {
        let client = reqwest::blocking::Client::builder()
            .timeout(timeout)
            .user_agent(concat!("ian/", env!("CARGO_PKG_VERSION")))
            .build()
            .map_err(|e| IanError::Fetch {
                url: String::new(),
                message: e.to_string(),
            })?;
        Ok(HttpFetcher { client })
    }
}

impl SourceFetcher for HttpFetcher {
    fn fetch(&self, url: &str) -> IanResult<String> {
        let fail = |message: String| IanError::Fetch {
            url: url.to_string(),
            message,
        };

        let parsed = Url::parse(url).map_err(|e| fail(e.to_string()))?;
        if !matches!(parsed.scheme(), "http" | "https") {
            return Err(fail(format!("unsupported scheme '{}'", parsed.scheme())));
        }

        let response = self
            .client
            .get(parsed)
            .send()
            .map_err(|e| fail(e.to_string()))?;
        if !response.status().is_success() {
            return Err(fail(format!("HTTP {}", response.status())));
        }
        response.text().map_err(|e| fail(e.to_string()))
    }
}

/// Outcome of one maintenance pass over the sources.
#[derive(Debug, Default)]
pub struct RefreshReport {
    pub refreshed: Vec<String>,
    pub failed: Vec<(String, IanError)>,
}

impl RefreshReport {
    pub fn is_clean(&self) -> bool {
        self.failed.is_empty()
    }
}

pub fn cache_dir(root: &Path) -> PathBuf {
    root.join(CACHE_DIR_NAME)
}

pub fn journal_path(root: &Path) -> PathBuf {
    cache_dir(root).join(CACHE_JOURNAL_FILE_NAME)
}

pub fn load_journal(root: &Path) -> IanResult<Journal> {
    Journal::load(&journal_path(root), JOURNAL_SECTION)
}

/// Whether a source last refreshed at `last` has outlived `lifetime`.
pub fn is_due(last: Option<DateTime<Utc>>, lifetime: Duration, now: DateTime<Utc>) -> bool {
    let Some(last) = last else {
        return true;
    };
    TimeDelta::from_std(lifetime)
        .ok()
        .and_then(|d| last.checked_add_signed(d))
        .is_some_and(|expires| expires <= now)
}

/// Names of the sources due for a refresh. Journal entries for unknown sources are reported.
pub fn refresh_due(
    sources: &BTreeMap<String, CalendarSource>,
    journal: &Journal,
    now: DateTime<Utc>,
) -> Vec<String> {
    for name in journal.names() {
        if !sources.contains_key(name) {
            warn!(
                journal = %journal.path().display(),
                source = name,
                "cache journal mentions a source that is not configured"
            );
        }
    }

    sources
        .iter()
        .filter(|(name, source)| is_due(journal.get(name), source.lifetime(), now))
        .map(|(name, _)| name.clone())
        .collect()
}

/// Import `source` and replace its whole cache directory with the result.
///
/// The new events are written to a staging directory first; the existing
/// cache is only swapped out once the import fully succeeded.
pub fn refresh_and_cache(
    root: &Path,
    name: &str,
    source: &CalendarSource,
    fetcher: &dyn SourceFetcher,
    tz: Tz,
) -> IanResult<usize> {
    check_source_name(name)?;
    let events = source.import(fetcher, tz)?;

    let cache = cache_dir(root);
    let target = cache.join(name);
    let staging = cache.join(format!(".{name}.staging"));
    let retired = cache.join(format!(".{name}.old"));

    remove_dir_if_exists(&staging)?;
    std::fs::create_dir_all(&staging)?;

    if let Err(e) = write_staged(&staging, &events) {
        remove_dir_if_exists(&staging)?;
        return Err(e);
    }

    remove_dir_if_exists(&retired)?;
    let had_previous = target.exists();
    if had_previous {
        std::fs::rename(&target, &retired)?;
    }
    if let Err(e) = std::fs::rename(&staging, &target) {
        if had_previous {
            std::fs::rename(&retired, &target)?;
        }
        return Err(e.into());
    }
    remove_dir_if_exists(&retired)?;

    info!(source = name, events = events.len(), "source cached");
    Ok(events.len())
}

fn write_staged(dir: &Path, events: &[EventProperties]) -> IanResult<()> {
    let mut taken = HashSet::new();

    for props in events {
        let base = match format_name(&props.summary) {
            n if n.is_empty() => format_name(&props.uid),
            n => n,
        };
        let base = if base.is_empty() { "event".to_string() } else { base };

        let mut file_name = base.clone();
        let mut n = 2;
        while !taken.insert(file_name.clone()) {
            file_name = format!("{base}_{n}");
            n += 1;
        }

        std::fs::write(dir.join(&file_name), props.to_toml()?)?;
    }

    Ok(())
}

fn remove_dir_if_exists(dir: &Path) -> IanResult<()> {
    match std::fs::remove_dir_all(dir) {
        Ok(()) => Ok(()),
        Err(e) if e.kind() == std::io::ErrorKind::NotFound => Ok(()),
        Err(e) => Err(e.into()),
    }
}

/// Refresh every due source, recording successes in the cache journal.
///
/// A failing source is reported and keeps its old cache; the others still refresh.
pub fn update_sources(
    root: &Path,
    sources: &BTreeMap<String, CalendarSource>,
    fetcher: &dyn SourceFetcher,
    tz: Tz,
    now: DateTime<Utc>,
) -> IanResult<RefreshReport> {
    let mut journal = load_journal(root)?;
    let mut report = RefreshReport::default();

    for name in refresh_due(sources, &journal, now) {
        let Some(source) = sources.get(&name) else {
            continue;
        };

        if journal.get(&name).is_none() {
            debug!(source = %name, "source missing from journal, importing");
        }

        match refresh_and_cache(root, &name, source, fetcher, tz) {
            Ok(_) => {
                journal.set(&name, now);
                report.refreshed.push(name);
            }
            Err(e) => {
                warn!(source = %name, error = %e, "source refresh failed, keeping the previous cache");
                report.failed.push((name, e));
            }
        }
    }

    journal.save_if_changed(now)?;
    Ok(report)
}

/// Remove the cache sub-tree, journal included.
pub fn delete_cache(root: &Path) -> IanResult<()> {
    remove_dir_if_exists(&cache_dir(root))
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::cell::Cell;

    use chrono::TimeZone;

    const FEED: &str = "BEGIN:VCALENDAR\r\n\
VERSION:2.0\r\n\
PRODID:TEST\r\n\
BEGIN:VEVENT\r\n\
UID:h1\r\n\
SUMMARY:New Year\r\n\
DTSTART;VALUE=DATE:20240101\r\n\
DTEND;VALUE=DATE:20240102\r\n\
END:VEVENT\r\n\
BEGIN:VEVENT\r\n\
UID:h2\r\n\
SUMMARY:New Year\r\n\
DTSTART;VALUE=DATE:20250101\r\n\
DTEND;VALUE=DATE:20250102\r\n\
END:VEVENT\r\n\
END:VCALENDAR\r\n";

    struct StaticFetcher {
        body: Option<&'static str>,
        calls: Cell<usize>,
    }

    impl StaticFetcher {
        fn ok() -> Self {
            StaticFetcher { body: Some(FEED), calls: Cell::new(0) }
        }

        fn failing() -> Self {
            StaticFetcher { body: None, calls: Cell::new(0) }
        }
    }

    impl SourceFetcher for StaticFetcher {
        fn fetch(&self, url: &str) -> IanResult<String> {
            self.calls.set(self.calls.get() + 1);
            self.body.map(String::from).ok_or_else(|| IanError::Fetch {
                url: url.to_string(),
                message: "connection refused".into(),
            })
        }
    }

    fn now() -> DateTime<Utc> {
        Utc.with_ymd_and_hms(2024, 1, 1, 12, 0, 0).unwrap()
    }

    fn ical_source(lifetime_hours: Option<u64>) -> CalendarSource {
        CalendarSource {
            kind: SourceType::Ical,
            source: "https://example.org/holidays.ics".into(),
            lifetime: lifetime_hours.map(|h| Duration::from_secs(h * 3600)),
        }
    }

    #[test]
    fn test_is_due_respects_lifetime() {
        let last = Some(now() - TimeDelta::hours(3));
        assert!(is_due(last, Duration::from_secs(2 * 3600), now()));
        assert!(!is_due(last, Duration::from_secs(4 * 3600), now()));
        assert!(is_due(None, Duration::from_secs(4 * 3600), now()));
    }

    #[test]
    fn test_refresh_due_uses_default_lifetime() {
        let dir = tempfile::tempdir().unwrap();
        let mut sources = BTreeMap::new();
        sources.insert("fresh".to_string(), ical_source(None));
        sources.insert("stale".to_string(), ical_source(None));
        sources.insert("new".to_string(), ical_source(None));

        let mut journal = load_journal(dir.path()).unwrap();
        journal.set("fresh", now() - TimeDelta::hours(1));
        journal.set("stale", now() - TimeDelta::hours(3));
        journal.set("removed", now());

        assert_eq!(refresh_due(&sources, &journal, now()), vec!["new", "stale"]);
    }

    #[test]
    fn test_update_sources_caches_and_journals() {
        let dir = tempfile::tempdir().unwrap();
        let mut sources = BTreeMap::new();
        sources.insert("holidays".to_string(), ical_source(Some(2)));

        let fetcher = StaticFetcher::ok();
        let report = update_sources(dir.path(), &sources, &fetcher, chrono_tz::UTC, now()).unwrap();
        assert_eq!(report.refreshed, vec!["holidays"]);
        assert!(report.is_clean());

        let cached = cache_dir(dir.path()).join("holidays");
        assert!(cached.join("New Year").exists());
        assert!(cached.join("New Year_2").exists());
        assert_eq!(load_journal(dir.path()).unwrap().get("holidays"), Some(now()));

        // Within the lifetime nothing is fetched again.
        update_sources(dir.path(), &sources, &fetcher, chrono_tz::UTC, now() + TimeDelta::hours(1))
            .unwrap();
        assert_eq!(fetcher.calls.get(), 1);
    }

    #[test]
    fn test_failed_refresh_keeps_previous_cache() {
        let dir = tempfile::tempdir().unwrap();
        let mut sources = BTreeMap::new();
        sources.insert("holidays".to_string(), ical_source(Some(2)));

        update_sources(dir.path(), &sources, &StaticFetcher::ok(), chrono_tz::UTC, now()).unwrap();

        let later = now() + TimeDelta::hours(3);
        let report =
            update_sources(dir.path(), &sources, &StaticFetcher::failing(), chrono_tz::UTC, later)
                .unwrap();
        assert_eq!(report.failed.len(), 1);
        assert!(matches!(report.failed[0].1, IanError::Fetch { .. }));

        assert!(cache_dir(dir.path()).join("holidays/New Year").exists());
        assert_eq!(load_journal(dir.path()).unwrap().get("holidays"), Some(now()));
    }

    #[test]
    fn test_one_failing_source_does_not_stop_others() {
        let dir = tempfile::tempdir().unwrap();
        let mut sources = BTreeMap::new();
        sources.insert("holidays".to_string(), ical_source(None));
        sources.insert(
            "team".to_string(),
            CalendarSource {
                kind: SourceType::Caldav,
                source: "https://dav.example.org/team".into(),
                lifetime: None,
            },
        );

        let report =
            update_sources(dir.path(), &sources, &StaticFetcher::ok(), chrono_tz::UTC, now()).unwrap();
        assert_eq!(report.refreshed, vec!["holidays"]);
        assert_eq!(report.failed.len(), 1);
        assert_eq!(report.failed[0].0, "team");
        assert!(matches!(report.failed[0].1, IanError::UnsupportedSource(_)));
    }

    #[test]
    fn test_unsafe_source_name_never_leaves_cache() {
        let dir = tempfile::tempdir().unwrap();
        let mut sources = BTreeMap::new();
        sources.insert("../hijack".to_string(), ical_source(None));

        let fetcher = StaticFetcher::ok();
        let report = update_sources(dir.path(), &sources, &fetcher, chrono_tz::UTC, now()).unwrap();
        assert!(report.refreshed.is_empty());
        assert!(matches!(report.failed[0].1, IanError::Config(_)));
        assert_eq!(fetcher.calls.get(), 0);
        assert!(!dir.path().join("hijack").exists());
    }

    #[test]
    fn test_long_summary_is_cached_under_a_short_name() {
        struct LongFeed;
        impl SourceFetcher for LongFeed {
            fn fetch(&self, _url: &str) -> IanResult<String> {
                Ok(FEED.replacen("SUMMARY:New Year", &format!("SUMMARY:{}", "ä".repeat(400)), 1))
            }
        }

        let dir = tempfile::tempdir().unwrap();
        let count = refresh_and_cache(dir.path(), "holidays", &ical_source(None), &LongFeed, chrono_tz::UTC)
            .unwrap();
        assert_eq!(count, 2);

        let names: Vec<_> = std::fs::read_dir(cache_dir(dir.path()).join("holidays"))
            .unwrap()
            .map(|entry| entry.unwrap().file_name().into_string().unwrap())
            .collect();
        assert_eq!(names.len(), 2);
        assert!(names.iter().all(|n| n.len() <= crate::constants::MAX_NAME_BYTES));
    }

    #[test]
    fn test_refresh_replaces_whole_directory() {
        let dir = tempfile::tempdir().unwrap();
        let source = ical_source(None);
        let target = cache_dir(dir.path()).join("holidays");
        std::fs::create_dir_all(&target).unwrap();
        std::fs::write(target.join("Leftover"), "stale").unwrap();

        let count =
            refresh_and_cache(dir.path(), "holidays", &source, &StaticFetcher::ok(), chrono_tz::UTC)
                .unwrap();
        assert_eq!(count, 2);
        assert!(!target.join("Leftover").exists());
        assert!(!cache_dir(dir.path()).join(".holidays.staging").exists());
        assert!(!cache_dir(dir.path()).join(".holidays.old").exists());
    }

    #[test]
    fn test_http_fetcher_rejects_non_http_urls() {
        let fetcher = HttpFetcher::new(Duration::from_secs(1)).unwrap();
        assert!(matches!(
            fetcher.fetch("file:///etc/passwd"),
            Err(IanError::Fetch { .. })
        ));
        assert!(matches!(fetcher.fetch("not a url"), Err(IanError::Fetch { .. })));
    }
}
