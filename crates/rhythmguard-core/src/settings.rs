//! Rhythm tunables and the store they are read from.
//!
//! Settings are owned by the surrounding system. This crate only reads them,
//! and reads them fresh for every decision: a session freezes what it needs
//! (its planned length) at start time.

use std::path::PathBuf;

use chrono::{DateTime, Duration, FixedOffset, NaiveDate, NaiveTime, Offset, TimeZone, Utc};
use serde::{Deserialize, Serialize};

use crate::error::{ConfigError, Result};
use crate::storage::Config;

/// The `[rhythm]` section of the configuration.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Settings {
    #[serde(default = "default_session_minutes")]
    pub default_session_minutes: u32,
    #[serde(default = "default_short_break")]
    pub short_break_minutes: u32,
    #[serde(default = "default_long_break")]
    pub long_break_minutes: u32,
    /// Completed non-gated sessions per long break.
    #[serde(default = "default_long_break_every")]
    pub long_break_every: u32,
    /// Local wall-clock time after which no session may start.
    #[serde(default = "default_evening_cutoff", with = "hhmm")]
    pub evening_cutoff: NaiveTime,
    #[serde(default = "default_daily_cap")]
    pub daily_session_cap: u32,
    /// Offset of the user's local time from UTC. Defines the calendar day.
    #[serde(default)]
    pub utc_offset_minutes: i32,
    /// Whether gated sessions advance (and can earn) the long break.
    #[serde(default)]
    pub gated_counts_toward_long_break: bool,
}

fn default_session_minutes() -> u32 {
    25
}
fn default_short_break() -> u32 {
    5
}
fn default_long_break() -> u32 {
    15
}
fn default_long_break_every() -> u32 {
    4
}
fn default_evening_cutoff() -> NaiveTime {
    NaiveTime::from_hms_opt(21, 0, 0).unwrap_or(NaiveTime::MIN)
}
fn default_daily_cap() -> u32 {
    8
}

impl Default for Settings {
    fn default() -> Self {
        Self {
            default_session_minutes: default_session_minutes(),
            short_break_minutes: default_short_break(),
            long_break_minutes: default_long_break(),
            long_break_every: default_long_break_every(),
            evening_cutoff: default_evening_cutoff(),
            daily_session_cap: default_daily_cap(),
            utc_offset_minutes: 0,
            gated_counts_toward_long_break: false,
        }
    }
}

impl Settings {
    /// Reject values the state machine cannot work with.
    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.default_session_minutes == 0 {
            return Err(invalid("rhythm.default_session_minutes", "must be positive"));
        }
        if self.short_break_minutes == 0 || self.long_break_minutes == 0 {
            return Err(invalid("rhythm.short_break_minutes", "break lengths must be positive"));
        }
        if self.long_break_every == 0 {
            return Err(invalid("rhythm.long_break_every", "must be at least 1"));
        }
        if self.utc_offset_minutes.abs() > 14 * 60 {
            return Err(invalid("rhythm.utc_offset_minutes", "must be within +/-14h"));
        }
        Ok(())
    }

    pub fn offset(&self) -> FixedOffset {
        FixedOffset::east_opt(self.utc_offset_minutes * 60).unwrap_or_else(|| Utc.fix())
    }

    /// The user's local calendar day at `now`.
    pub fn local_date(&self, now: DateTime<Utc>) -> NaiveDate {
        now.with_timezone(&self.offset()).date_naive()
    }

    /// UTC instant at which the local day containing `now` began.
    pub fn day_start(&self, now: DateTime<Utc>) -> DateTime<Utc> {
        let midnight = self.local_date(now).and_time(NaiveTime::MIN);
        self.offset()
            .from_local_datetime(&midnight)
            .single()
            .map(|dt| dt.with_timezone(&Utc))
            .unwrap_or(now)
    }

    pub fn is_past_cutoff(&self, now: DateTime<Utc>) -> bool {
        now.with_timezone(&self.offset()).time() >= self.evening_cutoff
    }

    pub fn short_break(&self) -> Duration {
        Duration::minutes(i64::from(self.short_break_minutes))
    }

    pub fn long_break(&self) -> Duration {
        Duration::minutes(i64::from(self.long_break_minutes))
    }
}

fn invalid(key: &str, message: &str) -> ConfigError {
    ConfigError::InvalidValue {
        key: key.to_string(),
        message: message.to_string(),
    }
}

/// Where the state machine reads settings from.
pub trait SettingsSource: Send + Sync {
    fn current(&self) -> Result<Settings>;
}

/// Re-reads the `[rhythm]` section of a config file on every call.
#[derive(Debug, Clone)]
pub struct FileSettings {
    path: PathBuf,
}

impl FileSettings {
    pub fn new(path: impl Into<PathBuf>) -> Self {
        Self { path: path.into() }
    }
}

impl SettingsSource for FileSettings {
    fn current(&self) -> Result<Settings> {
        let config = Config::load_from(&self.path)?;
        Ok(config.rhythm)
    }
}

/// Fixed settings, swappable at runtime. Used by tests and embedders.
#[derive(Debug, Default)]
pub struct StaticSettings {
    inner: std::sync::RwLock<Settings>,
}

impl StaticSettings {
    pub fn new(settings: Settings) -> Self {
        Self {
            inner: std::sync::RwLock::new(settings),
        }
    }

    pub fn replace(&self, settings: Settings) {
        *self.inner.write().unwrap_or_else(|e| e.into_inner()) = settings;
    }
}

impl SettingsSource for StaticSettings {
    fn current(&self) -> Result<Settings> {
        Ok(self.inner.read().unwrap_or_else(|e| e.into_inner()).clone())
    }
}

/// `"HH:MM"` (de)serialization for the evening cutoff.
mod hhmm {
    use chrono::NaiveTime;
    use serde::{Deserialize, Deserializer, Serializer};

    const FORMAT: &str = "%H:%M";

    pub fn serialize<S: Serializer>(time: &NaiveTime, s: S) -> Result<S::Ok, S::Error> {
        s.serialize_str(&time.format(FORMAT).to_string())
    }

    pub fn deserialize<'de, D: Deserializer<'de>>(d: D) -> Result<NaiveTime, D::Error> {
        let raw = String::deserialize(d)?;
        NaiveTime::parse_from_str(&raw, FORMAT)
            .or_else(|_| NaiveTime::parse_from_str(&raw, "%H:%M:%S"))
            .map_err(serde::de::Error::custom)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn at(s: &str) -> DateTime<Utc> {
        DateTime::parse_from_rfc3339(s).unwrap().with_timezone(&Utc)
    }

    #[test]
    fn cutoff_uses_local_offset() {
        let settings = Settings {
            utc_offset_minutes: 9 * 60,
            ..Settings::default()
        };
        // 12:30 UTC is 21:30 at +09:00.
        assert!(settings.is_past_cutoff(at("2026-03-01T12:30:00Z")));
        assert!(!settings.is_past_cutoff(at("2026-03-01T11:59:00Z")));
    }

    #[test]
    fn day_start_is_local_midnight() {
        let settings = Settings {
            utc_offset_minutes: -5 * 60,
            ..Settings::default()
        };
        let start = settings.day_start(at("2026-03-01T03:00:00Z"));
        assert_eq!(start, at("2026-02-28T05:00:00Z"));
    }

    #[test]
    fn validate_rejects_zero_long_break_every() {
        let settings = Settings {
            long_break_every: 0,
            ..Settings::default()
        };
        assert!(settings.validate().is_err());
        assert!(Settings::default().validate().is_ok());
    }

    #[test]
    fn cutoff_parses_from_toml() {
        let settings: Settings = toml::from_str("evening_cutoff = \"22:15\"").unwrap();
        assert_eq!(settings.evening_cutoff, NaiveTime::from_hms_opt(22, 15, 0).unwrap());
        assert_eq!(settings.daily_session_cap, 8);
    }

    #[test]
    fn static_settings_can_be_replaced() {
        let source = StaticSettings::new(Settings::default());
        source.replace(Settings {
            default_session_minutes: 50,
            ..Settings::default()
        });
        assert_eq!(source.current().unwrap().default_session_minutes, 50);
    }
}
