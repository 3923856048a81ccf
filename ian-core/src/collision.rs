//! Overlap checks run before an event is created or edited.

use tracing::warn;

use crate::error::{IanError, IanResult};
use crate::event::{Event, EventProperties};
use crate::period::overlaps;

/// Events in `existing` whose period overlaps the candidate's.
///
/// The candidate itself (same uid) and events in the `exceptions` calendars are ignored.
pub fn check_collision<'a>(
    existing: &'a [Event],
    candidate: &EventProperties,
    exceptions: &[String],
) -> Vec<&'a Event> {
    let period = candidate.period();

    existing
        .iter()
        .filter(|e| e.props.uid != candidate.uid)
        .filter(|e| !exceptions.iter().any(|c| c == e.calendar()))
        .filter(|e| overlaps(&e.period(), &period))
        .collect()
}

/// How a mutation reacts to collisions. Both flags may be set at once.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct CollisionPolicy {
    /// Log every collision as a warning.
    pub warn: bool,
    /// Refuse the mutation when anything collides.
    pub block: bool,
    /// Calendars whose events never count as collisions.
    pub exceptions: Vec<String>,
}

#[derive(Debug, Clone, Default)]
pub struct CollisionReport {
    pub matches: Vec<Event>,
}

impl CollisionReport {
    pub fn is_empty(&self) -> bool {
        self.matches.is_empty()
    }

    pub fn len(&self) -> usize {
        self.matches.len()
    }
}

impl CollisionPolicy {
    pub fn warn() -> Self {
        CollisionPolicy {
            warn: true,
            ..Default::default()
        }
    }

    pub fn block() -> Self {
        CollisionPolicy {
            block: true,
            ..Default::default()
        }
    }

    pub fn with_exceptions(mut self, calendars: impl IntoIterator<Item = impl Into<String>>) -> Self {
        self.exceptions = calendars.into_iter().map(Into::into).collect();
        self
    }

    /// Apply the policy to `candidate`. Warnings come first, then the block.
    pub fn check(&self, events: &[Event], candidate: &EventProperties) -> IanResult<CollisionReport> {
        let matches: Vec<Event> = check_collision(events, candidate, &self.exceptions)
            .into_iter()
            .cloned()
            .collect();

        if self.warn {
            for event in &matches {
                warn!(
                    candidate = %candidate.summary,
                    collides_with = %event.describe(),
                    "event collision"
                );
            }
        }

        if self.block && !matches.is_empty() {
            return Err(IanError::Collision(
                matches.iter().map(|e| e.path.to_string()).collect(),
            ));
        }

        Ok(CollisionReport { matches })
    }
}
