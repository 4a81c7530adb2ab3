//! Process-wide leveled logging for the sync core.
//!
//! Records go to stderr as text or JSON lines. A bounded in-memory ring can
//! also keep them, so callers and tests can see what was logged without
//! scraping stderr.

use std::collections::VecDeque;
use std::fmt;
use std::io::{self, Write};
use std::sync::atomic::{AtomicBool, AtomicU8, Ordering};
use std::sync::Mutex;
use std::time::{Duration, SystemTime, UNIX_EPOCH};

use serde_json::json;

#[derive(Clone, Copy, Debug, Eq, PartialEq, Ord, PartialOrd)]
pub enum Level {
    Error = 1,
    Warn = 2,
    Info = 3,
    Debug = 4,
    Trace = 5,
}

impl Level {
    pub fn as_str(self) -> &'static str {
        match self {
            Self::Error => "ERROR",
            Self::Warn => "WARN",
            Self::Info => "INFO",
            Self::Debug => "DEBUG",
            Self::Trace => "TRACE",
        }
    }

    pub fn parse(raw: &str) -> Option<Self> {
        match raw.trim().to_ascii_lowercase().as_str() {
            "error" => Some(Self::Error),
            "warn" | "warning" => Some(Self::Warn),
            "info" => Some(Self::Info),
            "debug" => Some(Self::Debug),
            "trace" => Some(Self::Trace),
            _ => None,
        }
    }

    fn from_u8(raw: u8) -> Self {
        match raw {
            1 => Self::Error,
            2 => Self::Warn,
            3 => Self::Info,
            4 => Self::Debug,
            _ => Self::Trace,
        }
    }
}

#[derive(Clone, Copy, Debug, Eq, PartialEq)]
pub enum Format {
    Text = 0,
    Json = 1,
}

impl Format {
    pub fn parse(raw: &str) -> Option<Self> {
        match raw.trim().to_ascii_lowercase().as_str() {
            "text" => Some(Self::Text),
            "json" => Some(Self::Json),
            _ => None,
        }
    }
}

#[derive(Clone, Copy, Debug, Eq, PartialEq)]
pub struct LogConfig {
    pub level: Level,
    pub format: Format,
    pub timestamps: bool,
}

impl Default for LogConfig {
    fn default() -> Self {
        Self {
            level: Level::Info,
            format: Format::Text,
            timestamps: true,
        }
    }
}

#[derive(Clone, Debug)]
pub struct CapturedLog {
    pub ts_ms: u64,
    pub level: Level,
    pub target: &'static str,
    pub msg: String,
}

struct Settings {
    level: AtomicU8,
    json: AtomicBool,
    timestamps: AtomicBool,
    stderr: AtomicBool,
}

static SETTINGS: Settings = Settings {
    level: AtomicU8::new(Level::Info as u8),
    json: AtomicBool::new(false),
    timestamps: AtomicBool::new(true),
    stderr: AtomicBool::new(true),
};

struct Ring {
    capacity: usize,
    records: VecDeque<CapturedLog>,
}

static CAPTURE: Mutex<Option<Ring>> = Mutex::new(None);

pub fn init(config: LogConfig) {
    SETTINGS.level.store(config.level as u8, Ordering::Relaxed);
    SETTINGS
        .json
        .store(config.format == Format::Json, Ordering::Relaxed);
    SETTINGS
        .timestamps
        .store(config.timestamps, Ordering::Relaxed);
}

pub fn current_level() -> Level {
    Level::from_u8(SETTINGS.level.load(Ordering::Relaxed))
}

pub fn set_stderr_enabled(enabled: bool) {
    SETTINGS.stderr.store(enabled, Ordering::Relaxed);
}

/// Keeps the most recent `capacity` records in memory; 0 turns capture off.
/// Re-enabling keeps what is already held, trimmed to the new capacity.
pub fn enable_capture(capacity: usize) {
    let Ok(mut capture) = CAPTURE.lock() else {
        return;
    };
    if capacity == 0 {
        *capture = None;
        return;
    }
    let ring = capture.get_or_insert_with(|| Ring {
        capacity,
        records: VecDeque::with_capacity(capacity.min(4096)),
    });
    ring.capacity = capacity;
    while ring.records.len() > capacity {
        ring.records.pop_front();
    }
}

/// Up to `limit` of the most recent captured records, oldest first.
pub fn capture_snapshot(limit: usize) -> Vec<CapturedLog> {
    let Ok(capture) = CAPTURE.lock() else {
        return Vec::new();
    };
    let Some(ring) = capture.as_ref() else {
        return Vec::new();
    };
    let skip = ring.records.len().saturating_sub(limit);
    ring.records.iter().skip(skip).cloned().collect()
}

pub fn enabled(level: Level) -> bool {
    level as u8 <= SETTINGS.level.load(Ordering::Relaxed)
}

struct Record<'a> {
    since_epoch: Duration,
    level: Level,
    target: &'static str,
    file: &'static str,
    line: u32,
    msg: &'a str,
}

impl Record<'_> {
    fn ts_ms(&self) -> u64 {
        self.since_epoch.as_millis().try_into().unwrap_or(u64::MAX)
    }

    fn render(&self, format: Format, timestamps: bool) -> String {
        match format {
            Format::Text if timestamps => format!(
                "{} {} {}: {}",
                Timestamp(self.since_epoch),
                self.level.as_str(),
                self.target,
                self.msg
            ),
            Format::Text => format!("{} {}: {}", self.level.as_str(), self.target, self.msg),
            Format::Json => json!({
                "ts_ms": self.ts_ms(),
                "level": self.level.as_str(),
                "target": self.target,
                "file": self.file,
                "line": self.line,
                "msg": self.msg,
            })
            .to_string(),
        }
    }
}

pub fn log(
    level: Level,
    target: &'static str,
    file: &'static str,
    line: u32,
    args: fmt::Arguments<'_>,
) {
    if !enabled(level) {
        return;
    }

    let msg = args.to_string();
    let record = Record {
        since_epoch: SystemTime::now()
            .duration_since(UNIX_EPOCH)
            .unwrap_or_default(),
        level,
        target,
        file,
        line,
        msg: &msg,
    };

    if SETTINGS.stderr.load(Ordering::Relaxed) {
        let format = if SETTINGS.json.load(Ordering::Relaxed) {
            Format::Json
        } else {
            Format::Text
        };
        let rendered = record.render(format, SETTINGS.timestamps.load(Ordering::Relaxed));
        let _ = writeln!(io::stderr().lock(), "{rendered}");
    }

    let ts_ms = record.ts_ms();
    if let Ok(mut capture) = CAPTURE.lock() {
        if let Some(ring) = capture.as_mut() {
            ring.records.push_back(CapturedLog {
                ts_ms,
                level,
                target,
                msg,
            });
            while ring.records.len() > ring.capacity {
                ring.records.pop_front();
            }
        }
    }
}

#[macro_export]
macro_rules! log_at {
    ($level:expr, $($arg:tt)*) => {{
        if $crate::enabled($level) {
            $crate::log($level, module_path!(), file!(), line!(), format_args!($($arg)*));
        }
    }};
}

#[macro_export]
macro_rules! log_error {
    ($($arg:tt)*) => {{
        $crate::log_at!($crate::Level::Error, $($arg)*);
    }};
}

#[macro_export]
macro_rules! log_warn {
    ($($arg:tt)*) => {{
        $crate::log_at!($crate::Level::Warn, $($arg)*);
    }};
}

#[macro_export]
macro_rules! log_info {
    ($($arg:tt)*) => {{
        $crate::log_at!($crate::Level::Info, $($arg)*);
    }};
}

#[macro_export]
macro_rules! log_debug {
    ($($arg:tt)*) => {{
        $crate::log_at!($crate::Level::Debug, $($arg)*);
    }};
}

#[macro_export]
macro_rules! log_trace {
    ($($arg:tt)*) => {{
        $crate::log_at!($crate::Level::Trace, $($arg)*);
    }};
}

/// UTC wall-clock time, `YYYY-MM-DDTHH:MM:SS.mmmZ`.
struct Timestamp(Duration);

impl fmt::Display for Timestamp {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let secs = self.0.as_secs();
        let (year, month, day) = civil_from_days((secs / 86_400) as i64);
        let secs_of_day = secs % 86_400;
        write!(
            f,
            "{year:04}-{month:02}-{day:02}T{:02}:{:02}:{:02}.{:03}Z",
            secs_of_day / 3600,
            (secs_of_day % 3600) / 60,
            secs_of_day % 60,
            self.0.subsec_millis()
        )
    }
}

// Howard Hinnant's days-to-civil conversion (public domain).
fn civil_from_days(days: i64) -> (i32, u32, u32) {
    let z = days + 719_468;
    let era = if z >= 0 { z } else { z - 146_096 } / 146_097;
    let doe = (z - era * 146_097) as u32;
    let yoe = (doe - doe / 1460 + doe / 36_524 - doe / 146_096) / 365;
    let doy = doe - (365 * yoe + yoe / 4 - yoe / 100);
    let mp = (5 * doy + 2) / 153;
    let day = doy - (153 * mp + 2) / 5 + 1;
    let month = if mp < 10 { mp + 3 } else { mp - 9 };
    let year = yoe as i32 + era as i32 * 400 + i32::from(month <= 2);
    (year, month, day)
}
