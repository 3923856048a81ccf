//! Events as the store hands them out.
//!
//! An [`Event`] pairs the persisted [`EventProperties`] with where the event
//! came from. Cached and recurrence-generated events are `constant`: they are
//! rebuilt on every query and can't be written or deleted directly.

mod path;
mod properties;

pub use path::EventPath;
pub(crate) use path::check_calendar;
pub use properties::{EventProperties, Recurrence, format_name, generate_uid};

use std::fmt;

use crate::error::{IanError, IanResult};
use crate::period::Period;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum EventKind {
    /// A regular event file under a calendar directory.
    Normal,
    /// Imported from a calendar source into the cache.
    Cache,
    /// Generated from a recurring event for one query.
    Recurrence,
}

#[derive(Debug, Clone, PartialEq)]
pub struct Event {
    pub path: EventPath,
    pub props: EventProperties,
    pub kind: EventKind,
    pub constant: bool,
    /// For recurrence-generated events, the path of the stored event they came from.
    pub parent: Option<EventPath>,
}

impl Event {
    /// Validate `props` and wrap them. `constant` follows from `kind`.
    pub fn build(path: EventPath, props: EventProperties, kind: EventKind) -> IanResult<Self> {
        props.validate()?;
        Ok(Self::unchecked(path, props, kind))
    }

    /// Wrap without validating, for stores running with validation disabled.
    pub fn unchecked(path: EventPath, props: EventProperties, kind: EventKind) -> Self {
        Event {
            path,
            props,
            kind,
            constant: kind != EventKind::Normal,
            parent: None,
        }
    }

    pub fn period(&self) -> Period {
        self.props.period()
    }

    pub fn calendar(&self) -> &str {
        self.path.calendar()
    }

    pub(crate) fn ensure_mutable(&self) -> IanResult<()> {
        if self.constant {
            return Err(IanError::ConstantEvent(self.path.to_string()));
        }
        Ok(())
    }

    /// One-line rendering for messages and warnings.
    pub fn describe(&self) -> String {
        format!(
            "'{}' ({}) {} -> {}",
            self.props.summary,
            self.path,
            self.props.start.format("%Y-%m-%d %H:%M"),
            self.props.end.format("%Y-%m-%d %H:%M"),
        )
    }
}

impl fmt::Display for Event {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        write!(f, "{}", self.path)
    }
}

/// Exact lookup by path.
pub fn get_event<'a>(events: &'a [Event], path: &EventPath) -> IanResult<&'a Event> {
    events
        .iter()
        .find(|e| &e.path == path)
        .ok_or_else(|| IanError::NotFound(path.to_string()))
}

/// Linear filter.
pub fn filter_events<F>(events: &[Event], filter: F) -> Vec<Event>
where
    F: Fn(&Event) -> bool,
{
    events.iter().filter(|e| filter(e)).cloned().collect()
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::{Duration, TimeZone, Utc};

    fn make_event(calendar: &str, name: &str) -> Event {
        let start = Utc.with_ymd_and_hms(2024, 1, 1, 9, 0, 0).unwrap();
        let props = EventProperties::new(name, start, start + Duration::hours(1), start);
        Event::build(EventPath::new(calendar, name).unwrap(), props, EventKind::Normal).unwrap()
    }

    #[test]
    fn test_build_sets_constant_from_kind() {
        let event = make_event("work", "standup");
        assert!(!event.constant);

        let cached = Event::build(
            EventPath::cached("holidays", "x").unwrap(),
            event.props.clone(),
            EventKind::Cache,
        )
        .unwrap();
        assert!(cached.constant);
        assert!(matches!(cached.ensure_mutable(), Err(IanError::ConstantEvent(_))));
    }

    #[test]
    fn test_build_rejects_invalid_props() {
        let mut event = make_event("work", "standup");
        event.props.summary.clear();
        assert!(Event::build(event.path, event.props, EventKind::Normal).is_err());
    }

    #[test]
    fn test_get_and_filter() {
        let events = vec![make_event("work", "standup"), make_event("home", "dinner")];
        let path = EventPath::new("home", "dinner").unwrap();
        assert_eq!(get_event(&events, &path).unwrap().props.summary, "dinner");
        assert!(get_event(&events, &EventPath::new("home", "nope").unwrap()).is_err());

        let work = filter_events(&events, |e| e.calendar() == "work");
        assert_eq!(work.len(), 1);
    }
}
