//! ICS generation.

use chrono::{DateTime, Utc};
use chrono_tz::Tz;
use icalendar::{Calendar, Component, EventLike, Property, ValueType};

use crate::event::{Event, EventProperties};

const PRODUCT_ID: &str = "-//ian//ian calendar";

/// One VCALENDAR holding a VEVENT per event, optionally named `calendar_name`.
pub fn to_ical(events: &[Event], calendar_name: Option<&str>, tz: Tz) -> String {
    render(events.iter().map(|e| &e.props), calendar_name, tz)
}

/// A VCALENDAR holding just `props`.
pub fn event_to_ical(props: &EventProperties, tz: Tz) -> String {
    render(std::iter::once(props), None, tz)
}

fn render<'a>(
    events: impl Iterator<Item = &'a EventProperties>,
    calendar_name: Option<&str>,
    tz: Tz,
) -> String {
    let mut cal = Calendar::new();
    if let Some(name) = calendar_name {
        cal.append_property(Property::new("X-WR-NAME", name));
    }

    for props in events {
        cal.push(build_vevent(props, tz));
    }

    strip_ics_bloat(&cal.done().to_string())
}

fn build_vevent(props: &EventProperties, tz: Tz) -> icalendar::Event {
    let mut ics_event = icalendar::Event::new();
    ics_event.uid(&props.uid);
    ics_event.summary(&props.summary);

    // DTSTAMP is required; the modification time keeps output deterministic.
    ics_event.add_property("DTSTAMP", utc_stamp(props.modified));
    ics_event.add_property("CREATED", utc_stamp(props.created));
    ics_event.add_property("LAST-MODIFIED", utc_stamp(props.modified));

    if props.is_all_day(tz) {
        add_date_property(&mut ics_event, "DTSTART", props.start, tz);
        add_date_property(&mut ics_event, "DTEND", props.end, tz);
    } else {
        ics_event.add_property("DTSTART", utc_stamp(props.start));
        ics_event.add_property("DTEND", utc_stamp(props.end));
    }

    if !props.description.is_empty() {
        ics_event.description(&props.description);
    }
    if !props.location.is_empty() {
        ics_event.location(&props.location);
    }
    if !props.url.is_empty() {
        ics_event.add_property("URL", &props.url);
    }

    let recurrence = &props.recurrence;
    if !recurrence.rrule.is_empty() {
        ics_event.add_property("RRULE", &recurrence.rrule);
    }
    add_date_list(&mut ics_event, "RDATE", &recurrence.rdate);
    add_date_list(&mut ics_event, "EXDATE", &recurrence.exdate);

    ics_event.done()
}

fn utc_stamp(t: DateTime<Utc>) -> String {
    t.format("%Y%m%dT%H%M%SZ").to_string()
}

fn add_date_property(ics_event: &mut icalendar::Event, name: &str, t: DateTime<Utc>, tz: Tz) {
    let date = t.with_timezone(&tz).date_naive();
    let mut prop = Property::new(name, date.format("%Y%m%d").to_string());
    prop.append_parameter(ValueType::Date);
    ics_event.append_property(prop);
}

/// Stored RDATE/EXDATE text may start with `TZID=<zone>:`, which becomes a parameter.
/// Each listed value is written as its own property.
fn add_date_list(ics_event: &mut icalendar::Event, name: &str, text: &str) {
    let text = text.trim();
    if text.is_empty() {
        return;
    }

    let (tzid, values) = match text.strip_prefix("TZID=").and_then(|rest| rest.split_once(':')) {
        Some((tzid, values)) => (Some(tzid), values),
        None => (None, text),
    };

    for value in values.split(',').map(str::trim).filter(|v| !v.is_empty()) {
        let mut prop = Property::new(name, value);
        if let Some(tzid) = tzid {
            prop.add_parameter("TZID", tzid);
        } else if !value.contains('T') {
            prop.append_parameter(ValueType::Date);
        }
        ics_event.append_multi_property(prop);
    }
}

/// Clean up ICS output from the icalendar crate
/// - Replace PRODID with our own
/// - Remove CALSCALE:GREGORIAN (it's the default)
fn strip_ics_bloat(ics: &str) -> String {
    let mut result = String::with_capacity(ics.len());

    for line in ics.lines() {
        if line.starts_with("PRODID:") {
            result.push_str("PRODID:");
            result.push_str(PRODUCT_ID);
            result.push_str("\r\n");
            continue;
        }

        if line == "CALSCALE:GREGORIAN" {
            continue;
        }

        result.push_str(line);
        result.push_str("\r\n");
    }

    result
}
