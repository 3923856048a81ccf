//! The event store rooted at one directory.
//!
//! Layout under the root:
//!
//! ```text
//! .config.toml               store configuration
//! .cooldown-journal.toml     last run of each hook with a cooldown
//! .cache/                    imported source events (constant)
//!   .cache-journal.toml
//!   <source>/<event>
//! <calendar>/<event>         one TOML file per event
//! ```
//!
//! The store takes no locks. A host serving concurrent requests must
//! serialize mutations to one root itself.

use std::path::{Path, PathBuf};

use chrono::Utc;
use chrono_tz::Tz;
use tracing::{debug, warn};

use crate::collision::{CollisionPolicy, CollisionReport};
use crate::config::{InstanceOptions, StoreConfig};
use crate::constants::CACHE_DIR_NAME;
use crate::error::{IanError, IanResult};
use crate::event::{Event, EventKind, EventPath, EventProperties, get_event};
use crate::ics;
use crate::period::{Period, overlaps};
use crate::recurrence;
use crate::sources::{self, HttpFetcher, RefreshReport, SourceFetcher};
use crate::sync::{HookRunner, ShellRunner, SyncDispatcher, SyncEvent};

/// What a windowed read produced.
#[derive(Debug, Clone, Default)]
pub struct ReadResult {
    pub events: Vec<Event>,
    /// Recurring events with further occurrences after the window.
    pub unsatisfied: Vec<Event>,
}

pub struct Instance {
    root: PathBuf,
    config: StoreConfig,
    options: InstanceOptions,
    fetcher: Box<dyn SourceFetcher>,
    runner: Box<dyn HookRunner>,
}

impl Instance {
    /// Open the store at `root`, creating the directory if needed.
    ///
    /// No maintenance runs; see [`Instance::open_and_work`].
    pub fn open(root: impl Into<PathBuf>, options: InstanceOptions) -> IanResult<Self> {
        let root = root.into();
        std::fs::create_dir_all(&root)?;
        let config = StoreConfig::load(&root)?;
        let fetcher = HttpFetcher::new(options.fetch_timeout)?;

        debug!(
            root = %root.display(),
            sources = config.sources.len(),
            hooks = config.hooks.len(),
            "store opened"
        );

        Ok(Instance {
            root,
            config,
            options,
            fetcher: Box::new(fetcher),
            runner: Box::new(ShellRunner),
        })
    }

    /// Open the store and refresh whichever sources are due.
    pub fn open_and_work(
        root: impl Into<PathBuf>,
        options: InstanceOptions,
    ) -> IanResult<(Self, RefreshReport)> {
        let instance = Self::open(root, options)?;
        let report = instance.work()?;
        Ok((instance, report))
    }

    pub fn with_fetcher(mut self, fetcher: impl SourceFetcher + 'static) -> Self {
        self.fetcher = Box::new(fetcher);
        self
    }

    pub fn with_runner(mut self, runner: impl HookRunner + 'static) -> Self {
        self.runner = Box::new(runner);
        self
    }

    /// Maintenance run after opening.
    pub fn work(&self) -> IanResult<RefreshReport> {
        self.update_sources()
    }

    pub fn root(&self) -> &Path {
        &self.root
    }

    pub fn config(&self) -> &StoreConfig {
        &self.config
    }

    pub fn config_mut(&mut self) -> &mut StoreConfig {
        &mut self.config
    }

    pub fn save_config(&self) -> IanResult<()> {
        self.config.save(&self.root)
    }

    pub fn options(&self) -> &InstanceOptions {
        &self.options
    }

    pub fn timezone(&self) -> Tz {
        self.options.timezone
    }

    // -- Reading --

    /// Every event, with recurrences expanded, optionally limited to `window`.
    ///
    /// Without a window, recurrences are expanded over the span from the
    /// earliest start to the latest end among the stored events. With one,
    /// the result is filtered to events overlapping it after expansion, so a
    /// recurring event that starts before the window still contributes its
    /// occurrences inside it.
    pub fn read_events(&self, window: Option<&Period>) -> IanResult<ReadResult> {
        let mut stored = self.scan_calendars()?;
        stored.extend(self.scan_cache()?);

        let span = match window {
            Some(w) => Some(*w),
            None => implicit_window(&stored),
        };

        let mut events = Vec::with_capacity(stored.len());
        let mut unsatisfied = Vec::new();
        let tz = self.timezone();

        for base in stored {
            let recurring = base.props.recurrence.is_recurring();
            let Some(span) = span.filter(|_| recurring) else {
                events.push(base);
                continue;
            };

            match recurrence::expand(&base, &span, tz) {
                Ok(expanded) => {
                    if recurrence::has_more_after(&base.props, &span, tz)? {
                        unsatisfied.push(base.clone());
                    }
                    events.extend(expanded);
                }
                Err(e) => {
                    warn!(
                        event = %base.path,
                        error = %e,
                        "invalid recurrence, occurrences ignored"
                    );
                    events.push(base);
                }
            }
        }

        if let Some(window) = window {
            events.retain(|e| e.period().is_valid() && overlaps(&e.period(), window));
        }

        events.sort_by(|a, b| {
            a.props
                .start
                .cmp(&b.props.start)
                .then_with(|| a.path.cmp(&b.path))
        });

        Ok(ReadResult {
            events,
            unsatisfied,
        })
    }

    /// Read the one stored event at `path`.
    pub fn read_event(&self, path: &EventPath) -> IanResult<Event> {
        let kind = if path.is_cached() {
            EventKind::Cache
        } else {
            EventKind::Normal
        };
        let file = path.resolve(&self.root);
        if !file.is_file() {
            return Err(IanError::NotFound(path.to_string()));
        }
        self.load_event(&file, path.clone(), kind)
    }

    /// Look `path` up among all events, generated occurrences included.
    pub fn get_by_path(&self, path: &EventPath) -> IanResult<Event> {
        let result = self.read_events(None)?;
        get_event(&result.events, path).cloned()
    }

    /// Events in `window` (or all) matching `predicate`.
    pub fn query<F>(&self, window: Option<&Period>, predicate: F) -> IanResult<Vec<Event>>
    where
        F: Fn(&Event) -> bool,
    {
        let mut events = self.read_events(window)?.events;
        events.retain(|e| predicate(e));
        Ok(events)
    }

    fn scan_calendars(&self) -> IanResult<Vec<Event>> {
        let mut events = Vec::new();

        for (name, path) in visible_entries(&self.root)? {
            if !path.is_dir() {
                warn!(file = %path.display(), "file outside any calendar ignored");
                continue;
            }
            events.extend(self.scan_dir(&path, &name, EventKind::Normal)?);
        }

        Ok(events)
    }

    fn scan_cache(&self) -> IanResult<Vec<Event>> {
        let cache = self.root.join(CACHE_DIR_NAME);
        if !cache.is_dir() {
            return Ok(Vec::new());
        }

        let mut events = Vec::new();
        for (name, path) in visible_entries(&cache)? {
            if path.is_dir() {
                events.extend(self.scan_dir(&path, &name, EventKind::Cache)?);
            }
        }
        Ok(events)
    }

    fn scan_dir(&self, dir: &Path, calendar: &str, kind: EventKind) -> IanResult<Vec<Event>> {
        let mut events = Vec::new();

        for (name, file) in visible_entries(dir)? {
            if file.is_dir() {
                warn!(dir = %file.display(), "nested directory ignored");
                continue;
            }

            let path = match kind {
                EventKind::Cache => EventPath::cached(calendar, &name),
                _ => EventPath::new(calendar, &name),
            };
            let path = match path {
                Ok(path) if path.name() == name => path,
                Ok(_) => {
                    warn!(file = %file.display(), "event file name has surrounding whitespace, ignored");
                    continue;
                }
                Err(e) => {
                    warn!(file = %file.display(), error = %e, "event ignored");
                    continue;
                }
            };

            match self.load_event(&file, path, kind) {
                Ok(event) => events.push(event),
                Err(e) => warn!(file = %file.display(), error = %e, "event ignored"),
            }
        }

        Ok(events)
    }

    fn load_event(&self, file: &Path, path: EventPath, kind: EventKind) -> IanResult<Event> {
        let content = std::fs::read_to_string(file)?;
        let mut props = EventProperties::from_toml(&content)?;
        props.normalize_legacy_all_day(self.timezone());

        if self.options.skip_validation {
            Ok(Event::unchecked(path, props, kind))
        } else {
            Event::build(path, props, kind)
        }
    }

    // -- Mutation --

    /// Store `props` as a new event in `calendar` under a free name derived from its summary.
    ///
    /// Hooks are not run; wrap the call in [`Instance::sync`].
    pub fn create_event(&self, props: EventProperties, calendar: &str) -> IanResult<Event> {
        if !self.options.skip_validation {
            props.validate()?;
        }

        let path = EventPath::new(calendar, &props.format_name())?.first_free(&self.root)?;
        let event = Event::unchecked(path, props, EventKind::Normal);
        self.write_event(&event)?;

        debug!(event = %event.path, "event created");
        Ok(event)
    }

    /// Write `event` to its file. Constant events are refused.
    pub fn write_event(&self, event: &Event) -> IanResult<()> {
        event.ensure_mutable()?;
        if !self.options.skip_validation {
            event.props.validate()?;
        }

        let file = event.path.resolve(&self.root);
        if let Some(parent) = file.parent() {
            std::fs::create_dir_all(parent)?;
        }

        let content = event.props.to_toml()?;
        let temp = file.with_file_name(format!(".{}.tmp", event.path.name()));
        std::fs::write(&temp, content)?;
        std::fs::rename(&temp, &file)?;

        Ok(())
    }

    /// Remove `event`'s file. Constant events are refused.
    pub fn delete_event(&self, event: &Event) -> IanResult<()> {
        event.ensure_mutable()?;

        match std::fs::remove_file(event.path.resolve(&self.root)) {
            Ok(()) => {
                debug!(event = %event.path, "event deleted");
                Ok(())
            }
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => {
                Err(IanError::NotFound(event.path.to_string()))
            }
            Err(e) => Err(e.into()),
        }
    }

    /// Apply `policy` to `candidate` against the events around it.
    pub fn check_collision(
        &self,
        candidate: &EventProperties,
        policy: &CollisionPolicy,
    ) -> IanResult<CollisionReport> {
        let window = Period::new(candidate.start, candidate.end)?;
        let existing = self.read_events(Some(&window))?.events;
        policy.check(&existing, candidate)
    }

    /// Run `action` between the pre- and post-commands of the matching hooks.
    pub fn sync<F>(&self, action: F, event: &SyncEvent, ignore_cooldowns: bool) -> IanResult<()>
    where
        F: FnOnce() -> IanResult<()>,
    {
        SyncDispatcher::new(&self.root, &self.config.hooks, self.runner.as_ref()).notify(
            event,
            ignore_cooldowns,
            Utc::now(),
            action,
        )
    }

    // -- Sources --

    pub fn update_sources(&self) -> IanResult<RefreshReport> {
        sources::update_sources(
            &self.root,
            &self.config.sources,
            self.fetcher.as_ref(),
            self.timezone(),
            Utc::now(),
        )
    }

    /// Drop the whole cache, journal included, and import every source again.
    pub fn clean_sources(&self) -> IanResult<RefreshReport> {
        self.delete_cache()?;
        self.update_sources()
    }

    pub fn delete_cache(&self) -> IanResult<()> {
        sources::delete_cache(&self.root)
    }

    // -- Migration --

    /// Store every VEVENT in `content` as a regular event in `calendar`.
    pub fn import_ical(&self, content: &str, calendar: &str) -> IanResult<Vec<Event>> {
        ics::from_ical(content, self.timezone())?
            .into_iter()
            .map(|props| self.create_event(props, calendar))
            .collect()
    }

    pub fn export_ical(&self, events: &[Event], calendar_name: Option<&str>) -> String {
        ics::to_ical(events, calendar_name, self.timezone())
    }
}

/// Non-dot entries of `dir`, sorted by name.
fn visible_entries(dir: &Path) -> IanResult<Vec<(String, PathBuf)>> {
    let mut entries = Vec::new();

    for entry in std::fs::read_dir(dir)? {
        let entry = entry?;
        let Some(name) = entry.file_name().to_str().map(String::from) else {
            warn!(path = %entry.path().display(), "non UTF-8 file name ignored");
            continue;
        };
        if name.starts_with('.') {
            continue;
        }
        entries.push((name, entry.path()));
    }

    entries.sort();
    Ok(entries)
}

fn implicit_window(events: &[Event]) -> Option<Period> {
    let from = events.iter().map(|e| e.props.start).min()?;
    let to = events.iter().map(|e| e.props.end).max()?;
    Period::new(from, to).ok()
}
