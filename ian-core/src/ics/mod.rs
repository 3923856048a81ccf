//! iCalendar (RFC 5545) encoding and decoding of event properties.
//!
//! Used for remote source imports and for migrating whole calendars in and
//! out of the store.

mod generate;
mod parse;

pub use generate::{event_to_ical, to_ical};
pub use parse::{event_from_ical, from_ical};

#[cfg(test)]
mod tests {
    use super::*;
    use crate::event::{Event, EventKind, EventPath, EventProperties};
    use chrono::{Duration, TimeZone, Utc};

    fn make_props() -> EventProperties {
        let start = Utc.with_ymd_and_hms(2024, 3, 20, 15, 0, 0).unwrap();
        let created = Utc.with_ymd_and_hms(2024, 3, 1, 8, 30, 0).unwrap();
        let mut props = EventProperties::new("Planning", start, start + Duration::hours(1), created);
        props.uid = "planning-123@ian".into();
        props.description = "Quarterly planning".into();
        props.location = "Room 4".into();
        props.url = "https://example.org/meet".into();
        props.modified = Utc.with_ymd_and_hms(2024, 3, 2, 10, 0, 0).unwrap();
        props.recurrence.rrule = "FREQ=DAILY;INTERVAL=3;COUNT=12".into();
        props
    }

    #[test]
    fn test_roundtrip_preserves_every_field() {
        let props = make_props();
        let ics = event_to_ical(&props, chrono_tz::UTC);
        let parsed = event_from_ical(&ics, chrono_tz::UTC).unwrap();
        assert_eq!(parsed, props, "Roundtrip changed the event. ICS:\n{}", ics);
    }

    #[test]
    fn test_roundtrip_with_exdate_and_rdate() {
        let mut props = make_props();
        props.recurrence.exdate = "20240323T150000Z,20240326T150000Z".into();
        props.recurrence.rdate = "TZID=Europe/Stockholm:20240420T160000".into();

        let ics = event_to_ical(&props, chrono_tz::UTC);
        assert!(
            ics.contains("RDATE;TZID=Europe/Stockholm:20240420T160000"),
            "RDATE should carry its TZID parameter. ICS:\n{}",
            ics
        );

        let parsed = event_from_ical(&ics, chrono_tz::UTC).unwrap();
        assert_eq!(parsed.recurrence, props.recurrence);
    }

    #[test]
    fn test_all_day_roundtrip_in_zone() {
        let tz = chrono_tz::Europe::Stockholm;
        let start = tz.with_ymd_and_hms(2024, 6, 21, 0, 0, 0).unwrap().with_timezone(&Utc);
        let end = tz.with_ymd_and_hms(2024, 6, 22, 0, 0, 0).unwrap().with_timezone(&Utc);
        let props = EventProperties::new("Midsummer", start, end, start);

        let ics = event_to_ical(&props, tz);
        assert!(
            ics.contains("DTSTART;VALUE=DATE:20240621"),
            "All-day start should be a date. ICS:\n{}",
            ics
        );
        assert!(ics.contains("DTEND;VALUE=DATE:20240622"), "ICS:\n{}", ics);

        let parsed = event_from_ical(&ics, tz).unwrap();
        assert_eq!(parsed.start, start);
        assert_eq!(parsed.end, end);
    }

    #[test]
    fn test_to_ical_names_calendar_and_holds_every_event() {
        let first = make_props();
        let mut second = make_props();
        second.uid = "other@ian".into();
        second.summary = "Retro".into();

        let events: Vec<Event> = [first, second]
            .into_iter()
            .map(|p| {
                let name = p.format_name();
                Event::build(EventPath::new("work", &name).unwrap(), p, EventKind::Normal).unwrap()
            })
            .collect();

        let ics = to_ical(&events, Some("work"), chrono_tz::UTC);
        assert!(ics.contains("X-WR-NAME:work"), "ICS:\n{}", ics);
        assert!(ics.contains("PRODID:-//ian//ian calendar"), "ICS:\n{}", ics);
        assert_eq!(ics.matches("BEGIN:VEVENT").count(), 2);

        let parsed = from_ical(&ics, chrono_tz::UTC).unwrap();
        assert_eq!(parsed.len(), 2);
        assert_eq!(parsed[1].summary, "Retro");
    }
}
