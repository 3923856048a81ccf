//! File names and defaults shared across the store.

use std::time::Duration;

/// Reserved directory (relative to the store root) holding cached source events.
pub const CACHE_DIR_NAME: &str = ".cache";

/// Last-refresh journal for calendar sources, inside the cache directory.
pub const CACHE_JOURNAL_FILE_NAME: &str = ".cache-journal.toml";

/// Last-fire journal for sync hooks, at the store root.
pub const COOLDOWN_JOURNAL_FILE_NAME: &str = ".cooldown-journal.toml";

/// Store configuration, at the store root.
pub const CONFIG_FILE_NAME: &str = ".config.toml";

/// Used when a source does not declare its own lifetime.
pub const DEFAULT_CACHE_LIFETIME: Duration = Duration::from_secs(2 * 60 * 60);

/// Highest numeric suffix tried when looking for a free event file name.
pub const MAX_FREE_NAME_ATTEMPTS: u32 = 50;

/// Longest suggested file name, in bytes. Leaves room for `_n` suffixes and
/// the hidden staging prefixes under the usual 255-byte limit.
pub const MAX_NAME_BYTES: usize = 200;

/// Upper bound on occurrences materialized for one recurring event per query.
pub const MAX_OCCURRENCES: u16 = 10_000;

/// Default conventional store directory, relative to the home directory.
pub const DEFAULT_ROOT_DIR_NAME: &str = ".ian";
