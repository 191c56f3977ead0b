//! Structured allocator lifecycle records.
//!
//! Every engine instance owns one [`LifecycleLog`]. Records are filtered by
//! the instance's [`LogConfig`] before any formatting happens, and the ring
//! evicts the oldest record once `capacity` is reached.

use std::collections::VecDeque;
use std::fmt;

use serde::Serialize;

use crate::config::LogConfig;

/// Allocator lifecycle log level.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize)]
pub enum AllocatorLogLevel {
    Trace,
    Debug,
    Info,
    Warn,
    Error,
}

/// Structured allocator lifecycle record.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct AllocatorLogRecord {
    /// Monotonic decision/event id, unique per instance.
    pub decision_id: u64,
    /// Correlation id (`<scope>::<symbol>::<decision_id hex>`).
    pub trace_id: String,
    /// Severity level.
    pub level: AllocatorLogLevel,
    /// API symbol (`allocate`, `free`, `reallocate`, `opt_malloc`, ...).
    pub symbol: &'static str,
    /// Event kind (`alloc`, `coalesce`, `bin_init`, ...).
    pub event: &'static str,
    /// Payload or block address involved in the event.
    pub ptr: Option<usize>,
    /// Size value involved in the event.
    pub size: Option<usize>,
    /// Size-class bin, when one applies.
    pub bin: Option<usize>,
    /// Machine-readable outcome label.
    pub outcome: &'static str,
    /// Free-form details for debugging.
    pub details: String,
}

/// Bounded ring of lifecycle records.
#[derive(Debug)]
pub struct LifecycleLog {
    scope: &'static str,
    /// `None` until first use; then resolved from the environment.
    config: Option<LogConfig>,
    next_decision_id: u64,
    records: VecDeque<AllocatorLogRecord>,
}

impl LifecycleLog {
    /// Log whose configuration is read from the environment on first record.
    #[must_use]
    pub const fn from_env(scope: &'static str) -> Self {
        Self {
            scope,
            config: None,
            next_decision_id: 1,
            records: VecDeque::new(),
        }
    }

    /// Log with an explicit configuration.
    #[must_use]
    pub const fn with_config(scope: &'static str, config: LogConfig) -> Self {
        Self {
            scope,
            config: Some(config),
            next_decision_id: 1,
            records: VecDeque::new(),
        }
    }

    fn config(&mut self) -> LogConfig {
        *self.config.get_or_insert_with(LogConfig::from_env)
    }

    /// Returns true if a record at `level` would be kept.
    pub fn enabled(&mut self, level: AllocatorLogLevel) -> bool {
        let config = self.config();
        config.capacity > 0 && config.threshold.admits(level)
    }

    #[allow(clippy::too_many_arguments)]
    pub fn record(
        &mut self,
        level: AllocatorLogLevel,
        symbol: &'static str,
        event: &'static str,
        ptr: Option<usize>,
        size: Option<usize>,
        bin: Option<usize>,
        outcome: &'static str,
        details: fmt::Arguments<'_>,
    ) {
        if !self.enabled(level) {
            return;
        }
        let capacity = self.config().capacity;
        let decision_id = self.next_decision_id;
        self.next_decision_id = self.next_decision_id.wrapping_add(1);
        while self.records.len() >= capacity {
            self.records.pop_front();
        }
        self.records.push_back(AllocatorLogRecord {
            decision_id,
            trace_id: format!("{}::{}::{:016x}", self.scope, symbol, decision_id),
            level,
            symbol,
            event,
            ptr,
            size,
            bin,
            outcome,
            details: details.to_string(),
        });
    }

    /// Returns a view of retained records, oldest first.
    pub fn records(&self) -> impl Iterator<Item = &AllocatorLogRecord> {
        self.records.iter()
    }

    /// Drains retained records, oldest first.
    pub fn drain(&mut self) -> Vec<AllocatorLogRecord> {
        self.records.drain(..).collect()
    }

    pub fn len(&self) -> usize {
        self.records.len()
    }

    pub fn is_empty(&self) -> bool {
        self.records.is_empty()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::LogThreshold;

    fn trace(log: &mut LifecycleLog, event: &'static str) {
        log.record(
            AllocatorLogLevel::Trace,
            "allocate",
            event,
            None,
            Some(8),
            None,
            "success",
            format_args!("n={}", 1),
        );
    }

    #[test]
    fn records_carry_scoped_trace_ids() {
        let mut log = LifecycleLog::with_config("coalesce", LogConfig::verbose(16));
        trace(&mut log, "alloc");
        trace(&mut log, "alloc");
        let records = log.drain();
        assert_eq!(records.len(), 2);
        assert_eq!(records[0].decision_id, 1);
        assert_eq!(records[1].decision_id, 2);
        assert_eq!(records[0].trace_id, "coalesce::allocate::0000000000000001");
        assert_eq!(records[1].details, "n=1");
        assert!(log.is_empty());
    }

    #[test]
    fn ring_evicts_oldest_past_capacity() {
        let mut log = LifecycleLog::with_config("segregated", LogConfig::verbose(3));
        for _ in 0..5 {
            trace(&mut log, "alloc");
        }
        let ids: Vec<u64> = log.records().map(|r| r.decision_id).collect();
        assert_eq!(ids, vec![3, 4, 5]);
    }

    #[test]
    fn threshold_filters_before_recording() {
        let mut log = LifecycleLog::with_config(
            "coalesce",
            LogConfig {
                threshold: LogThreshold::Level(AllocatorLogLevel::Warn),
                capacity: 8,
            },
        );
        trace(&mut log, "alloc");
        log.record(
            AllocatorLogLevel::Error,
            "free",
            "unmap_failed",
            Some(0x1000),
            None,
            None,
            "ignored",
            format_args!("errno=22"),
        );
        assert_eq!(log.len(), 1);
        let record = log.records().next().expect("error record kept");
        assert_eq!(record.event, "unmap_failed");
        // Filtered records do not consume decision ids.
        assert_eq!(record.decision_id, 1);
    }

    #[test]
    fn silent_config_keeps_nothing() {
        let mut log = LifecycleLog::with_config("coalesce", LogConfig::silent());
        trace(&mut log, "alloc");
        assert!(log.is_empty());
    }
}
