//! Runtime logging configuration.
//!
//! Engines record structured lifecycle events (see [`crate::log`]). How much
//! they keep is controlled per instance by a [`LogConfig`], or, for instances
//! built without one, by two environment variables read once per process:
//! - `HMALLOC_LOG`: minimum level (`trace`, `debug`, `info`, `warn`, `error`,
//!   `off`). Defaults to `warn`.
//! - `HMALLOC_LOG_CAPACITY`: maximum retained records per instance. Defaults
//!   to 1024.

use std::sync::atomic::{AtomicU8, AtomicUsize, Ordering};

use serde::Serialize;

use crate::log::AllocatorLogLevel;

/// Retained records per instance when nothing else is configured.
pub const DEFAULT_LOG_CAPACITY: usize = 1024;

/// Minimum level an instance keeps, or nothing at all.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize)]
pub enum LogThreshold {
    /// Keep records at or above this level.
    Level(AllocatorLogLevel),
    /// Keep nothing.
    Off,
}

impl LogThreshold {
    /// Parse from string (case-insensitive). Unknown input yields `Warn`.
    #[must_use]
    pub fn from_str_loose(s: &str) -> Self {
        match s.trim().to_ascii_lowercase().as_str() {
            "trace" | "all" | "verbose" => Self::Level(AllocatorLogLevel::Trace),
            "debug" => Self::Level(AllocatorLogLevel::Debug),
            "info" => Self::Level(AllocatorLogLevel::Info),
            "error" | "fatal" => Self::Level(AllocatorLogLevel::Error),
            "off" | "none" | "disabled" | "0" => Self::Off,
            _ => Self::Level(AllocatorLogLevel::Warn),
        }
    }

    /// Returns true if a record at `level` passes this threshold.
    #[must_use]
    pub fn admits(self, level: AllocatorLogLevel) -> bool {
        match self {
            Self::Level(min) => level >= min,
            Self::Off => false,
        }
    }
}

impl Default for LogThreshold {
    fn default() -> Self {
        Self::Level(AllocatorLogLevel::Warn)
    }
}

/// Per-instance logging configuration.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub struct LogConfig {
    pub threshold: LogThreshold,
    pub capacity: usize,
}

impl LogConfig {
    /// Keep everything, up to `capacity` records.
    #[must_use]
    pub const fn verbose(capacity: usize) -> Self {
        Self {
            threshold: LogThreshold::Level(AllocatorLogLevel::Trace),
            capacity,
        }
    }

    /// Keep nothing.
    #[must_use]
    pub const fn silent() -> Self {
        Self {
            threshold: LogThreshold::Off,
            capacity: 0,
        }
    }

    /// Configuration resolved from the environment (cached after first read).
    #[must_use]
    pub fn from_env() -> Self {
        Self {
            threshold: log_threshold(),
            capacity: log_capacity(),
        }
    }
}

impl Default for LogConfig {
    fn default() -> Self {
        Self {
            threshold: LogThreshold::default(),
            capacity: DEFAULT_LOG_CAPACITY,
        }
    }
}

// Atomic cache: 0=unresolved, 1..=5 = Trace..Error, 6=Off, 255=resolving.
// Non-blocking on purpose: a reentrant call while the environment is being
// read sees RESOLVING and gets the default instead of deadlocking.
static CACHED_THRESHOLD: AtomicU8 = AtomicU8::new(0);
static CACHED_CAPACITY: AtomicUsize = AtomicUsize::new(usize::MAX);

const THRESHOLD_UNRESOLVED: u8 = 0;
const THRESHOLD_OFF: u8 = 6;
const THRESHOLD_RESOLVING: u8 = 255;

fn threshold_to_u8(threshold: LogThreshold) -> u8 {
    match threshold {
        LogThreshold::Level(AllocatorLogLevel::Trace) => 1,
        LogThreshold::Level(AllocatorLogLevel::Debug) => 2,
        LogThreshold::Level(AllocatorLogLevel::Info) => 3,
        LogThreshold::Level(AllocatorLogLevel::Warn) => 4,
        LogThreshold::Level(AllocatorLogLevel::Error) => 5,
        LogThreshold::Off => THRESHOLD_OFF,
    }
}

fn u8_to_threshold(v: u8) -> LogThreshold {
    match v {
        1 => LogThreshold::Level(AllocatorLogLevel::Trace),
        2 => LogThreshold::Level(AllocatorLogLevel::Debug),
        3 => LogThreshold::Level(AllocatorLogLevel::Info),
        5 => LogThreshold::Level(AllocatorLogLevel::Error),
        THRESHOLD_OFF => LogThreshold::Off,
        _ => LogThreshold::default(),
    }
}

/// Get the configured log threshold (reads `HMALLOC_LOG` on first call).
#[must_use]
pub fn log_threshold() -> LogThreshold {
    resolve_threshold(&CACHED_THRESHOLD, || {
        std::env::var("HMALLOC_LOG")
            .map(|v| LogThreshold::from_str_loose(&v))
            .unwrap_or_default()
    })
}

/// Runs the resolve state machine over `cache`, calling `read` at most once.
fn resolve_threshold(cache: &AtomicU8, read: impl FnOnce() -> LogThreshold) -> LogThreshold {
    let cached = cache.load(Ordering::Relaxed);
    if cached != THRESHOLD_UNRESOLVED && cached != THRESHOLD_RESOLVING {
        return u8_to_threshold(cached);
    }
    if cached == THRESHOLD_RESOLVING {
        return LogThreshold::default();
    }

    if cache
        .compare_exchange(
            THRESHOLD_UNRESOLVED,
            THRESHOLD_RESOLVING,
            Ordering::SeqCst,
            Ordering::Relaxed,
        )
        .is_err()
    {
        let v = cache.load(Ordering::Relaxed);
        return if v != THRESHOLD_UNRESOLVED && v != THRESHOLD_RESOLVING {
            u8_to_threshold(v)
        } else {
            LogThreshold::default()
        };
    }

    let threshold = read();
    cache.store(threshold_to_u8(threshold), Ordering::Release);
    threshold
}

/// Get the configured per-instance record capacity (reads
/// `HMALLOC_LOG_CAPACITY` on first call).
#[must_use]
pub fn log_capacity() -> usize {
    let cached = CACHED_CAPACITY.load(Ordering::Relaxed);
    if cached != usize::MAX {
        return cached;
    }
    let capacity = std::env::var("HMALLOC_LOG_CAPACITY")
        .ok()
        .and_then(|v| v.trim().parse::<usize>().ok())
        .filter(|&n| n != usize::MAX)
        .unwrap_or(DEFAULT_LOG_CAPACITY);
    CACHED_CAPACITY.store(capacity, Ordering::Relaxed);
    capacity
}
