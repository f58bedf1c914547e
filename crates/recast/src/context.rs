//! Build context for one pipeline run
//!
//! Collects log entries and stage timings for a single tile build, forwards
//! every message to the `log` facade, and carries the shared cancellation
//! flag the pipeline polls between stages.

use recast_common::{Error, Result};
use std::collections::HashMap;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::Duration;
use web_time::Instant;

/// Log level for context messages
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord)]
pub enum LogLevel {
    Debug = 0,
    Info = 1,
    Warning = 2,
    Error = 3,
}

impl From<LogLevel> for log::Level {
    fn from(level: LogLevel) -> Self {
        match level {
            LogLevel::Debug => log::Level::Debug,
            LogLevel::Info => log::Level::Info,
            LogLevel::Warning => log::Level::Warn,
            LogLevel::Error => log::Level::Error,
        }
    }
}

/// Pipeline stages that get timed
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub enum TimerCategory {
    /// Whole tile build
    Total,
    Rasterization,
    Filtering,
    CompactHeightfield,
    Erosion,
    AreaMarking,
    Layers,
    /// Layer compression and decompression
    LayerCodec,
    Regions,
    Contours,
    Clusters,
    PolyMesh,
    DetailMesh,
    /// Tile blob encoding
    Encoding,
    Custom(String),
}

/// Log entry containing message and metadata
#[derive(Debug, Clone)]
pub struct LogEntry {
    pub level: LogLevel,
    pub timestamp: Instant,
    pub message: String,
}

/// Accumulated timing for one category
#[derive(Debug, Clone, Default)]
pub struct TimerEntry {
    pub total: Duration,
    pub count: usize,
}

/// Context for a single build providing logging, profiling and cancellation
#[derive(Debug)]
pub struct RecastContext {
    logs: Vec<LogEntry>,
    active_timers: HashMap<TimerCategory, Instant>,
    timers: HashMap<TimerCategory, TimerEntry>,
    min_log_level: LogLevel,
    enable_timing: bool,
    max_log_entries: usize,
    /// Prefix added to forwarded log lines, usually the tile coordinate
    label: Option<String>,
    abort: Option<Arc<AtomicBool>>,
}

impl Default for RecastContext {
    fn default() -> Self {
        Self::new()
    }
}

impl RecastContext {
    pub fn new() -> Self {
        Self {
            logs: Vec::new(),
            active_timers: HashMap::new(),
            timers: HashMap::new(),
            min_log_level: LogLevel::Info,
            enable_timing: true,
            max_log_entries: 256,
            label: None,
            abort: None,
        }
    }

    /// Creates a context labelled with a tile coordinate that observes `abort`
    pub fn for_tile(tile_x: i32, tile_y: i32, abort: Arc<AtomicBool>) -> Self {
        let mut ctx = Self::new();
        ctx.label = Some(format!("tile ({}, {})", tile_x, tile_y));
        ctx.abort = Some(abort);
        ctx
    }

    pub fn set_log_level(&mut self, level: LogLevel) {
        self.min_log_level = level;
    }

    pub fn set_timing_enabled(&mut self, enabled: bool) {
        self.enable_timing = enabled;
    }

    pub fn log_debug(&mut self, message: impl Into<String>) {
        self.log(LogLevel::Debug, message);
    }

    pub fn log_info(&mut self, message: impl Into<String>) {
        self.log(LogLevel::Info, message);
    }

    pub fn log_warning(&mut self, message: impl Into<String>) {
        self.log(LogLevel::Warning, message);
    }

    pub fn log_error(&mut self, message: impl Into<String>) {
        self.log(LogLevel::Error, message);
    }

    fn log(&mut self, level: LogLevel, message: impl Into<String>) {
        let message = message.into();
        match &self.label {
            Some(label) => log::log!(target: "recast", log::Level::from(level), "{}: {}", label, message),
            None => log::log!(target: "recast", log::Level::from(level), "{}", message),
        }

        if level >= self.min_log_level {
            self.logs.push(LogEntry {
                level,
                timestamp: Instant::now(),
                message,
            });
            if self.logs.len() > self.max_log_entries {
                self.logs.remove(0);
            }
        }
    }

    /// True once the owning generator asked every build to stop
    pub fn is_aborted(&self) -> bool {
        self.abort
            .as_ref()
            .is_some_and(|flag| flag.load(Ordering::Relaxed))
    }

    /// Stage boundary check. Returns [`Error::Aborted`] when cancellation was requested.
    pub fn check_abort(&self) -> Result<()> {
        if self.is_aborted() {
            Err(Error::Aborted)
        } else {
            Ok(())
        }
    }

    pub fn start_timer(&mut self, category: TimerCategory) {
        if self.enable_timing {
            self.active_timers.insert(category, Instant::now());
        }
    }

    pub fn stop_timer(&mut self, category: TimerCategory) {
        if !self.enable_timing {
            return;
        }
        if let Some(start) = self.active_timers.remove(&category) {
            let entry = self.timers.entry(category).or_default();
            entry.total += start.elapsed();
            entry.count += 1;
        }
    }

    /// Runs `f` inside a start/stop timer pair
    pub fn timed<T>(&mut self, category: TimerCategory, f: impl FnOnce(&mut Self) -> T) -> T {
        self.start_timer(category.clone());
        let result = f(self);
        self.stop_timer(category);
        result
    }

    pub fn timer_duration(&self, category: &TimerCategory) -> Option<Duration> {
        self.timers.get(category).map(|entry| entry.total)
    }

    pub fn timer_count(&self, category: &TimerCategory) -> usize {
        self.timers.get(category).map_or(0, |entry| entry.count)
    }

    pub fn logs(&self) -> &[LogEntry] {
        &self.logs
    }

    pub fn logs_by_level(&self, level: LogLevel) -> impl Iterator<Item = &LogEntry> {
        self.logs.iter().filter(move |entry| entry.level == level)
    }

    pub fn reset(&mut self) {
        self.logs.clear();
        self.active_timers.clear();
        self.timers.clear();
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_log_level_filtering() {
        let mut ctx = RecastContext::new();
        ctx.set_log_level(LogLevel::Warning);
        ctx.log_info("skipped");
        ctx.log_warning("kept");
        ctx.log_error("kept too");
        assert_eq!(ctx.logs().len(), 2);
        assert_eq!(ctx.logs_by_level(LogLevel::Error).count(), 1);
    }

    #[test]
    fn test_timed_accumulates() {
        let mut ctx = RecastContext::new();
        let v = ctx.timed(TimerCategory::Regions, |_| 42);
        ctx.timed(TimerCategory::Regions, |_| ());
        assert_eq!(v, 42);
        assert_eq!(ctx.timer_count(&TimerCategory::Regions), 2);
        assert!(ctx.timer_duration(&TimerCategory::Regions).is_some());
        assert_eq!(ctx.timer_count(&TimerCategory::Contours), 0);
    }

    #[test]
    fn test_disabled_timing_records_nothing() {
        let mut ctx = RecastContext::new();
        ctx.set_timing_enabled(false);
        ctx.timed(TimerCategory::Contours, |_| ());
        assert_eq!(ctx.timer_count(&TimerCategory::Contours), 0);
    }

    #[test]
    fn test_abort_flag() {
        let flag = Arc::new(AtomicBool::new(false));
        let ctx = RecastContext::for_tile(3, 4, flag.clone());
        assert!(ctx.check_abort().is_ok());
        flag.store(true, Ordering::Relaxed);
        assert!(matches!(ctx.check_abort(), Err(Error::Aborted)));
    }
}
