//! Core of the ian calendar: a personal event store kept as a directory tree.
//!
//! Every event is one TOML file under `<root>/<calendar>/`. On top of that
//! the crate provides:
//! - [`period`] interval predicates used for windowed queries and collision checks
//! - [`recurrence`] expansion of RRULE/RDATE/EXDATE bounded to a window
//! - [`sources`] a cache of external iCalendar feeds with a refresh journal
//! - [`sync`] shell hooks run around mutations, throttled by per-hook cooldowns
//!
//! [`Instance`] ties these together for one store root.

pub mod collision;
pub mod config;
pub mod constants;
pub mod datetime;
pub mod error;
pub mod event;
pub mod ics;
pub mod instance;
pub mod journal;
pub mod period;
pub mod recurrence;
pub mod sources;
pub mod sync;

pub use collision::{CollisionPolicy, CollisionReport, check_collision};
pub use config::{InstanceOptions, StoreConfig};
pub use error::{IanError, IanResult};
pub use event::{Event, EventKind, EventPath, EventProperties, Recurrence};
pub use instance::{Instance, ReadResult};
pub use period::Period;
pub use sources::{CalendarSource, RefreshReport, SourceType};
pub use sync::{Hook, HookFilter, SyncEvent, SyncKind};
