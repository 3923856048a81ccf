//! Time periods and the interval predicates used by queries and collision checks.
//!
//! A period is half-open: `from` is inclusive and `to` is exclusive. The
//! predicates below treat the *other* period's end as inclusive, so two
//! periods that only touch at an endpoint still meet.

use chrono::{DateTime, Duration, NaiveDate, TimeZone, Utc};
use chrono_tz::Tz;

use crate::error::{IanError, IanResult};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct Period {
    pub from: DateTime<Utc>,
    pub to: DateTime<Utc>,
}

impl Period {
    /// Build a period, rejecting `from > to`.
    pub fn new(from: DateTime<Utc>, to: DateTime<Utc>) -> IanResult<Self> {
        if from > to {
            return Err(IanError::Validation(format!(
                "period start {} is after its end {}",
                from.to_rfc3339(),
                to.to_rfc3339()
            )));
        }
        Ok(Period { from, to })
    }

    /// The whole calendar day `date` in `tz`, midnight to next midnight.
    pub fn day(date: NaiveDate, tz: Tz) -> IanResult<Self> {
        let from = local_midnight(date, tz)?;
        let to = local_midnight(date + Duration::days(1), tz)?;
        Period::new(from, to)
    }

    pub fn duration(&self) -> Duration {
        self.to - self.from
    }

    pub fn is_valid(&self) -> bool {
        self.from <= self.to
    }
}

/// `t` lies within `p`, both ends inclusive.
pub fn within(t: DateTime<Utc>, p: &Period) -> bool {
    t >= p.from && t <= p.to
}

/// Both endpoints of `inner` lie within `outer`.
pub fn confined(inner: &Period, outer: &Period) -> bool {
    within(inner.from, outer) && within(inner.to, outer)
}

/// True iff any endpoint of either period lies within the other, or the periods are identical.
///
/// # Panics
///
/// Panics if either period has `from > to`.
pub fn overlaps(a: &Period, b: &Period) -> bool {
    assert!(a.is_valid(), "invalid period: {a:?}");
    assert!(b.is_valid(), "invalid period: {b:?}");

    a == b
        || within(a.from, b)
        || within(a.to, b)
        || within(b.from, a)
        || within(b.to, a)
}

fn local_midnight(date: NaiveDate, tz: Tz) -> IanResult<DateTime<Utc>> {
    let naive = date.and_hms_opt(0, 0, 0).ok_or_else(|| {
        IanError::Validation(format!("no midnight on {date}"))
    })?;
    tz.from_local_datetime(&naive)
        .earliest()
        .map(|dt| dt.with_timezone(&Utc))
        .ok_or_else(|| IanError::Validation(format!("midnight on {date} does not exist in {tz}")))
}
