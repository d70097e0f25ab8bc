//! Default constants for forebear configuration.
//!
//! All magic numbers are centralized here with documentation.

// =============================================================================
// Request Queue Defaults
// =============================================================================

/// Interval between retries of a throttled operation (milliseconds)
/// Matches the pacing the genealogy service tolerates for a single client.
pub const DEFAULT_TICK_INTERVAL_MS: u64 = 5_000;

/// Throttled operations are retried without limit unless a cap is configured.
pub const DEFAULT_MAX_THROTTLE_RETRIES: Option<u32> = None;

// =============================================================================
// Tree Builder Defaults
// =============================================================================

/// Persons born before this year are not ascended further.
pub const DEFAULT_BIRTH_YEAR_CUTOFF: i32 = 1500;

// =============================================================================
// Storage Defaults
// =============================================================================

/// Directory holding the store snapshot and root lists
pub const DEFAULT_DATA_DIR: &str = "forebear-data";

/// File name of the full store snapshot inside the data directory
pub const SNAPSHOT_FILE_NAME: &str = "persons.json";

/// File name recording the currently selected root set
pub const CURRENT_SET_FILE_NAME: &str = "current-set";

/// Prefix of per-set root list files
pub const ROOT_SET_FILE_PREFIX: &str = "profile-set-";

// =============================================================================
// Synthetic Tree Defaults
// =============================================================================

/// Probability that a child inherits each of a parent's markers
pub const DEFAULT_MARKER_INHERIT_PROBABILITY: f64 = 0.45;
