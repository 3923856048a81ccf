//! RRULE/RDATE/EXDATE expansion bounded to a query window.
//!
//! The stored event is always the first instance of its series. Expansion
//! yields it unchanged followed by one constant child per further instance
//! inside the window.

use chrono::{DateTime, Duration, NaiveDate, NaiveDateTime, TimeZone, Utc};
use chrono_tz::Tz;
use rrule::{RRule, RRuleSet, Unvalidated};
use tracing::warn;

use crate::constants::MAX_OCCURRENCES;
use crate::error::{IanError, IanResult, RecurrenceField};
use crate::event::{Event, EventKind, EventProperties};
use crate::period::Period;

/// Parse the event's recurrence text into a rule set anchored at its start.
///
/// Each of the three fields is parsed on its own so a failure names the field it came from.
pub fn build_recurrence_set(props: &EventProperties, tz: Tz) -> IanResult<RRuleSet> {
    let rtz: rrule::Tz = tz.into();
    let dt_start = props.start.with_timezone(&rtz);
    let recurrence = &props.recurrence;

    let mut set = if recurrence.rrule.is_empty() {
        // Without a rule the start is not generated by anything, so add it explicitly.
        RRuleSet::new(dt_start).rdate(dt_start)
    } else {
        let rrule_text = normalize_until(&recurrence.rrule, tz);
        let rule: RRule<Unvalidated> =
            rrule_text.parse().map_err(|e: rrule::RRuleError| IanError::Recurrence {
                field: RecurrenceField::RRule,
                message: e.to_string(),
            })?;
        rule.build(dt_start).map_err(|e| IanError::Recurrence {
            field: RecurrenceField::RRule,
            message: e.to_string(),
        })?
    };

    for rdate in parse_date_list(&recurrence.rdate, tz, RecurrenceField::RDate)? {
        set = set.rdate(rdate.with_timezone(&rtz));
    }
    for exdate in parse_date_list(&recurrence.exdate, tz, RecurrenceField::ExDate)? {
        set = set.exdate(exdate.with_timezone(&rtz));
    }

    Ok(set)
}

/// The base event followed by every generated occurrence inside `window` (ends inclusive).
///
/// Non-recurring events expand to just themselves.
pub fn expand(base: &Event, window: &Period, tz: Tz) -> IanResult<Vec<Event>> {
    if !base.props.recurrence.is_recurring() {
        return Ok(vec![base.clone()]);
    }

    let set = build_recurrence_set(&base.props, tz)?;
    let instants = instants_between(set, window, &base.path.to_string());
    let duration = base.props.end - base.props.start;

    let mut events = vec![base.clone()];
    let children = instants
        .into_iter()
        .filter(|t| *t != base.props.start)
        .enumerate()
        .map(|(index, start)| {
            let mut props = base.props.clone();
            props.start = start;
            props.end = start + duration;
            Event {
                path: base.path.occurrence(index),
                props,
                kind: EventKind::Recurrence,
                constant: true,
                parent: Some(base.path.clone()),
            }
        });
    events.extend(children);

    Ok(events)
}

/// Whether the series has at least one instance strictly after `window.to`.
pub fn has_more_after(props: &EventProperties, window: &Period, tz: Tz) -> IanResult<bool> {
    if !props.recurrence.is_recurring() {
        return Ok(false);
    }

    let set = build_recurrence_set(props, tz)?;
    let rtz: rrule::Tz = tz.into();
    let result = set.after(window.to.with_timezone(&rtz)).all(2);

    Ok(result
        .dates
        .iter()
        .any(|t| t.with_timezone(&Utc) > window.to))
}

fn instants_between(set: RRuleSet, window: &Period, label: &str) -> Vec<DateTime<Utc>> {
    let rtz: rrule::Tz = Utc.into();
    // Widen by a second on each side; the exact bounds are applied below.
    let after = (window.from - Duration::seconds(1)).with_timezone(&rtz);
    let before = (window.to + Duration::seconds(1)).with_timezone(&rtz);

    let result = set.after(after).before(before).all(MAX_OCCURRENCES);
    if result.limited {
        warn!(
            event = label,
            limit = MAX_OCCURRENCES,
            "recurrence truncated to the occurrence limit"
        );
    }

    result
        .dates
        .iter()
        .map(|t| t.with_timezone(&Utc))
        .filter(|t| *t >= window.from && *t <= window.to)
        .collect()
}

/// Rewrite a floating or date-only `UNTIL` as a UTC instant in `tz`.
///
/// A date-only `UNTIL` includes that whole local day. Anything unparsable is
/// left as is for the rule parser to report.
fn normalize_until(rrule: &str, tz: Tz) -> String {
    rrule
        .split(';')
        .map(|part| {
            let Some((key, value)) = part.split_once('=') else {
                return part.to_string();
            };
            if !key.trim().eq_ignore_ascii_case("UNTIL") || value.ends_with('Z') {
                return part.to_string();
            }

            let until = match NaiveDate::parse_from_str(value, "%Y%m%d") {
                Ok(date) => date
                    .succ_opt()
                    .and_then(|next| parse_date_value(&next.format("%Y%m%d").to_string(), tz))
                    .map(|midnight| midnight - Duration::seconds(1)),
                Err(_) => parse_date_value(value, tz),
            };
            match until {
                Some(until) => format!("{key}={}", until.format("%Y%m%dT%H%M%SZ")),
                None => part.to_string(),
            }
        })
        .collect::<Vec<_>>()
        .join(";")
}

/// Parse a comma-separated RDATE/EXDATE value.
///
/// Accepts an optional `TZID=<zone>:` prefix and values of the forms
/// `20240108T100000Z` (UTC), `20240108T100000` (local to the zone) and
/// `20240108` (local midnight).
fn parse_date_list(
    text: &str,
    tz: Tz,
    field: RecurrenceField,
) -> IanResult<Vec<DateTime<Utc>>> {
    let text = text.trim();
    if text.is_empty() {
        return Ok(Vec::new());
    }

    let fail = |message: String| IanError::Recurrence { field, message };

    let (zone, values) = match text.strip_prefix("TZID=") {
        Some(rest) => {
            let (name, values) = rest
                .split_once(':')
                .ok_or_else(|| fail(format!("missing ':' after TZID in '{text}'")))?;
            let zone: Tz = name
                .parse()
                .map_err(|_| fail(format!("unknown time zone '{name}'")))?;
            (zone, values)
        }
        None => (tz, text),
    };

    values
        .split(',')
        .map(str::trim)
        .filter(|s| !s.is_empty())
        .map(|s| parse_date_value(s, zone).ok_or_else(|| fail(format!("invalid date '{s}'"))))
        .collect()
}

pub(crate) fn parse_date_value(s: &str, tz: Tz) -> Option<DateTime<Utc>> {
    if let Some(utc) = s.strip_suffix('Z') {
        return NaiveDateTime::parse_from_str(utc, "%Y%m%dT%H%M%S")
            .ok()
            .map(|dt| dt.and_utc());
    }

    let naive = NaiveDateTime::parse_from_str(s, "%Y%m%dT%H%M%S")
        .ok()
        .or_else(|| {
            NaiveDate::parse_from_str(s, "%Y%m%d")
                .ok()
                .and_then(|d| d.and_hms_opt(0, 0, 0))
        });

    match naive {
        Some(naive) => tz
            .from_local_datetime(&naive)
            .earliest()
            .map(|dt| dt.with_timezone(&Utc)),
        None => DateTime::parse_from_rfc3339(s)
            .ok()
            .map(|dt| dt.with_timezone(&Utc)),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::event::EventPath;

    fn daily_event(rrule: &str) -> Event {
        let start = Utc.with_ymd_and_hms(2024, 1, 1, 9, 0, 0).unwrap();
        let mut props = EventProperties::new("Standup", start, start + Duration::minutes(30), start);
        props.recurrence.rrule = rrule.to_string();
        Event::build(EventPath::new("work", "Standup").unwrap(), props, EventKind::Normal).unwrap()
    }

    fn window(from: (u32, u32), to: (u32, u32)) -> Period {
        Period::new(
            Utc.with_ymd_and_hms(2024, from.0, from.1, 0, 0, 0).unwrap(),
            Utc.with_ymd_and_hms(2024, to.0, to.1, 0, 0, 0).unwrap(),
        )
        .unwrap()
    }

    #[test]
    fn test_expand_full_series() {
        let event = daily_event("FREQ=DAILY;COUNT=5");
        let w = window((1, 1), (2, 1));

        let events = expand(&event, &w, chrono_tz::UTC).unwrap();
        assert_eq!(events.len(), 5);
        assert_eq!(events[0], event);
        for pair in events.windows(2) {
            assert_eq!(pair[1].props.start - pair[0].props.start, Duration::hours(24));
        }
        for child in &events[1..] {
            assert!(child.constant);
            assert_eq!(child.kind, EventKind::Recurrence);
            assert_eq!(child.parent.as_ref(), Some(&event.path));
            assert_eq!(child.props.end - child.props.start, Duration::minutes(30));
        }
        assert!(!has_more_after(&event.props, &w, chrono_tz::UTC).unwrap());
    }

    #[test]
    fn test_expand_partial_window_flags_more() {
        let event = daily_event("FREQ=DAILY;COUNT=5");
        let w = window((1, 1), (1, 3));

        let events = expand(&event, &w, chrono_tz::UTC).unwrap();
        assert_eq!(events.len(), 2);
        assert!(has_more_after(&event.props, &w, chrono_tz::UTC).unwrap());
    }

    #[test]
    fn test_expand_is_stable() {
        let event = daily_event("FREQ=DAILY;COUNT=5");
        let w = window((1, 1), (2, 1));
        let first = expand(&event, &w, chrono_tz::UTC).unwrap();
        let second = expand(&event, &w, chrono_tz::UTC).unwrap();
        assert_eq!(first, second);
        assert_eq!(first[1].path.to_string(), "work/.Standup_0");
    }

    #[test]
    fn test_window_after_base_keeps_every_instance() {
        let event = daily_event("FREQ=DAILY;COUNT=5");
        let w = window((1, 3), (1, 4));

        let events = expand(&event, &w, chrono_tz::UTC).unwrap();
        // The base plus the instances on the 3rd (09:00) only; the 4th starts after midnight.
        assert_eq!(events.len(), 2);
        assert_eq!(
            events[1].props.start,
            Utc.with_ymd_and_hms(2024, 1, 3, 9, 0, 0).unwrap()
        );
    }

    #[test]
    fn test_exdate_and_rdate() {
        let mut event = daily_event("FREQ=DAILY;COUNT=5");
        event.props.recurrence.exdate = "20240102T090000Z,20240103T090000Z".into();
        event.props.recurrence.rdate = "20240110T090000Z".into();
        let w = window((1, 1), (2, 1));

        let events = expand(&event, &w, chrono_tz::UTC).unwrap();
        let starts: Vec<_> = events.iter().map(|e| e.props.start.format("%d").to_string()).collect();
        assert_eq!(starts, vec!["01", "04", "05", "10"]);
    }

    #[test]
    fn test_rdate_only_event() {
        let mut event = daily_event("");
        event.props.recurrence.rdate = "20240105T090000Z".into();
        let w = window((1, 1), (2, 1));

        let events = expand(&event, &w, chrono_tz::UTC).unwrap();
        assert_eq!(events.len(), 2);
        assert_eq!(events[1].props.start, Utc.with_ymd_and_hms(2024, 1, 5, 9, 0, 0).unwrap());
    }

    #[test]
    fn test_date_only_until_includes_last_day() {
        let event = daily_event("FREQ=DAILY;UNTIL=20240105");
        let w = window((1, 1), (2, 1));

        let events = expand(&event, &w, chrono_tz::UTC).unwrap();
        assert_eq!(events.len(), 5);
        assert_eq!(
            events[4].props.start,
            Utc.with_ymd_and_hms(2024, 1, 5, 9, 0, 0).unwrap()
        );
        assert!(has_more_after(&event.props, &window((1, 1), (1, 3)), chrono_tz::UTC).unwrap());
    }

    #[test]
    fn test_floating_until_in_zone() {
        let tz = chrono_tz::Europe::Stockholm;
        assert_eq!(
            normalize_until("FREQ=DAILY;UNTIL=20240105T100000;BYHOUR=9", tz),
            "FREQ=DAILY;UNTIL=20240105T090000Z;BYHOUR=9"
        );
        assert_eq!(
            normalize_until("FREQ=WEEKLY;UNTIL=20240105", tz),
            "FREQ=WEEKLY;UNTIL=20240105T225959Z"
        );
        assert_eq!(
            normalize_until("FREQ=DAILY;UNTIL=20240105T090000Z", tz),
            "FREQ=DAILY;UNTIL=20240105T090000Z"
        );

        let mut event = daily_event("FREQ=DAILY;UNTIL=20240103T100000");
        event.props.start = Utc.with_ymd_and_hms(2024, 1, 1, 8, 0, 0).unwrap();
        event.props.end = event.props.start + Duration::minutes(30);
        let events = expand(&event, &window((1, 1), (2, 1)), tz).unwrap();
        assert_eq!(events.len(), 3);
    }

    #[test]
    fn test_non_recurring_expands_to_itself() {
        let event = daily_event("");
        let events = expand(&event, &window((1, 1), (2, 1)), chrono_tz::UTC).unwrap();
        assert_eq!(events, vec![event]);
    }

    #[test]
    fn test_parse_failure_names_field() {
        let mut event = daily_event("FREQ=SOMETIMES");
        let err = build_recurrence_set(&event.props, chrono_tz::UTC).unwrap_err();
        assert!(matches!(
            err,
            IanError::Recurrence { field: RecurrenceField::RRule, .. }
        ));

        event.props.recurrence.rrule = "FREQ=DAILY".into();
        event.props.recurrence.exdate = "yesterday".into();
        let err = build_recurrence_set(&event.props, chrono_tz::UTC).unwrap_err();
        assert!(matches!(
            err,
            IanError::Recurrence { field: RecurrenceField::ExDate, .. }
        ));
    }

    #[test]
    fn test_parse_date_list_forms() {
        let tz = chrono_tz::Europe::Stockholm;
        let dates = parse_date_list(
            "20240601T120000Z, 20240601T120000,20240601",
            tz,
            RecurrenceField::RDate,
        )
        .unwrap();
        assert_eq!(dates[0], Utc.with_ymd_and_hms(2024, 6, 1, 12, 0, 0).unwrap());
        assert_eq!(dates[1], Utc.with_ymd_and_hms(2024, 6, 1, 10, 0, 0).unwrap());
        assert_eq!(dates[2], Utc.with_ymd_and_hms(2024, 5, 31, 22, 0, 0).unwrap());

        let zoned =
            parse_date_list("TZID=America/New_York:20240108T100000", tz, RecurrenceField::ExDate)
                .unwrap();
        assert_eq!(zoned[0], Utc.with_ymd_and_hms(2024, 1, 8, 15, 0, 0).unwrap());
    }
}
