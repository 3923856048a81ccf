//! ICS parsing using the icalendar crate's parser.

use chrono::{DateTime, Days, NaiveDate, NaiveDateTime, TimeZone, Timelike, Utc};
use chrono_tz::Tz;
use icalendar::{
    CalendarDateTime, DatePerhapsTime,
    parser::{Component, Property, read_calendar, unfold},
};
use tracing::warn;

use crate::error::{IanError, IanResult};
use crate::event::{EventProperties, Recurrence, generate_uid};

/// Decode every VEVENT in `content`. Floating and date-only values are read in `tz`.
pub fn from_ical(content: &str, tz: Tz) -> IanResult<Vec<EventProperties>> {
    let unfolded = unfold(content);
    let calendar = read_calendar(&unfolded).map_err(|e| IanError::IcsParse(e.to_string()))?;

    let mut vevents = Vec::new();
    collect_vevents(&calendar.components, &mut vevents);

    vevents.into_iter().map(|vevent| parse_vevent(vevent, tz)).collect()
}

/// Decode the first VEVENT in `content`.
pub fn event_from_ical(content: &str, tz: Tz) -> IanResult<EventProperties> {
    from_ical(content, tz)?
        .into_iter()
        .next()
        .ok_or_else(|| IanError::IcsParse("no VEVENT found".into()))
}

fn collect_vevents<'a, 'b>(components: &'b [Component<'a>], out: &mut Vec<&'b Component<'a>>) {
    for component in components {
        if component.name == "VEVENT" {
            out.push(component);
        } else {
            collect_vevents(&component.components, out);
        }
    }
}

fn parse_vevent(vevent: &Component, tz: Tz) -> IanResult<EventProperties> {
    let uid = vevent
        .find_prop("UID")
        .map(|p| p.val.to_string())
        .unwrap_or_else(generate_uid);
    let summary = vevent
        .find_prop("SUMMARY")
        .map(|p| p.val.to_string())
        .unwrap_or_else(|| "(No title)".to_string());

    let start = vevent
        .find_prop("DTSTART")
        .and_then(|p| read_time(p, tz))
        .ok_or_else(|| IanError::IcsParse(format!("event '{uid}' has no valid DTSTART")))?;
    let mut end = vevent
        .find_prop("DTEND")
        .and_then(|p| read_time(p, tz))
        .unwrap_or(start);

    // Some feeds mark all-day events with a zero-length span at midnight.
    if start == end {
        let local = start.with_timezone(&tz);
        if local.num_seconds_from_midnight() == 0 {
            end = local_midnight(local.date_naive() + Days::new(1), tz).unwrap_or(end);
        }
    }

    let text = |name: &str| {
        vevent
            .find_prop(name)
            .map(|p| p.val.to_string())
            .unwrap_or_default()
    };

    let modified = vevent
        .find_prop("LAST-MODIFIED")
        .or_else(|| vevent.find_prop("DTSTAMP"))
        .and_then(|p| read_time(p, tz));
    let created = vevent.find_prop("CREATED").and_then(|p| read_time(p, tz));
    let (created, modified) = match (created, modified) {
        (Some(c), Some(m)) => (c, m),
        (Some(c), None) => (c, c),
        (None, Some(m)) => (m, m),
        (None, None) => {
            let now = Utc::now();
            (now, now)
        }
    };

    Ok(EventProperties {
        uid,
        summary,
        description: text("DESCRIPTION"),
        location: text("LOCATION"),
        url: text("URL"),
        start,
        end,
        created,
        modified,
        recurrence: Recurrence {
            rrule: text("RRULE"),
            rdate: join_date_list(vevent, "RDATE", tz),
            exdate: join_date_list(vevent, "EXDATE", tz),
        },
    })
}

fn read_time(prop: &Property, tz: Tz) -> Option<DateTime<Utc>> {
    match DatePerhapsTime::try_from(prop).ok()? {
        DatePerhapsTime::Date(d) => local_midnight(d, tz),
        DatePerhapsTime::DateTime(cal_dt) => match cal_dt {
            CalendarDateTime::Utc(dt) => Some(dt),
            CalendarDateTime::Floating(naive) => local_time(&naive, tz),
            CalendarDateTime::WithTimezone { date_time, tzid } => {
                let zone = tzid.parse::<Tz>().unwrap_or_else(|_| {
                    warn!(tzid = %tzid, "unknown TZID, using the configured time zone");
                    tz
                });
                local_time(&date_time, zone)
            }
        },
    }
}

fn local_time(naive: &NaiveDateTime, tz: Tz) -> Option<DateTime<Utc>> {
    tz.from_local_datetime(naive)
        .earliest()
        .map(|t| t.with_timezone(&Utc))
}

fn local_midnight(date: NaiveDate, tz: Tz) -> Option<DateTime<Utc>> {
    local_time(&date.and_hms_opt(0, 0, 0)?, tz)
}

/// Join every RDATE/EXDATE property into one comma-separated value.
///
/// When all values share one TZID it is kept as a `TZID=<zone>:` prefix;
/// mixed zones are converted to UTC.
fn join_date_list(vevent: &Component, name: &str, tz: Tz) -> String {
    let props: Vec<&Property> = vevent.properties.iter().filter(|p| p.name == name).collect();
    if props.is_empty() {
        return String::new();
    }

    let tzid_of = |prop: &Property| -> Option<String> {
        prop.params
            .iter()
            .find(|p| p.key == "TZID")
            .and_then(|p| p.val.as_ref().map(|v| v.to_string()))
    };

    let first_tzid = tzid_of(props[0]);
    let shared = props.iter().all(|p| tzid_of(p) == first_tzid);

    if shared {
        let values: Vec<String> = props.iter().map(|p| p.val.to_string()).collect();
        return match first_tzid {
            Some(tzid) => format!("TZID={tzid}:{}", values.join(",")),
            None => values.join(","),
        };
    }

    let mut values = Vec::new();
    for prop in props {
        let zone = tzid_of(prop)
            .and_then(|id| id.parse::<Tz>().ok())
            .unwrap_or(tz);
        for value in prop.val.as_ref().split(',').map(str::trim).filter(|v| !v.is_empty()) {
            match crate::recurrence::parse_date_value(value, zone) {
                Some(t) => values.push(t.format("%Y%m%dT%H%M%SZ").to_string()),
                None => warn!(property = name, value, "dropping unreadable date"),
            }
        }
    }
    values.join(",")
}
