//! Retraining schedule configuration

use chrono::{DateTime, Datelike, Duration, NaiveTime, Utc, Weekday};
use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;

/// Schedule record consulted by the scheduler adapter
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ScheduleConfig {
    #[serde(default)]
    pub enabled: bool,
    /// Overrides the adapter's default cadence when present
    #[serde(default)]
    pub cadence: Option<Cadence>,
}

/// Weekly firing time, always in UTC
///
/// Deserialization goes through [`Cadence::weekly`], so a stored record
/// cannot carry an out-of-range time of day.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(try_from = "RawCadence")]
pub struct Cadence {
    pub weekday: Weekday,
    pub hour: u32,
    pub minute: u32,
}

#[derive(Deserialize)]
struct RawCadence {
    weekday: Weekday,
    hour: u32,
    minute: u32,
}

impl TryFrom<RawCadence> for Cadence {
    type Error = String;

    fn try_from(raw: RawCadence) -> Result<Self, Self::Error> {
        Cadence::weekly(raw.weekday, raw.hour, raw.minute)
    }
}

impl Cadence {
    pub fn weekly(weekday: Weekday, hour: u32, minute: u32) -> Result<Self, String> {
        if hour > 23 || minute > 59 {
            return Err(format!("invalid time of day {:02}:{:02}", hour, minute));
        }
        Ok(Self {
            weekday,
            hour,
            minute,
        })
    }

    /// First firing time strictly after `now`
    pub fn next_after(&self, now: DateTime<Utc>) -> DateTime<Utc> {
        let time = NaiveTime::from_hms_opt(self.hour, self.minute, 0).unwrap_or(NaiveTime::MIN);
        let days_ahead = (self.weekday.num_days_from_monday() + 7
            - now.weekday().num_days_from_monday())
            % 7;

        let candidate = (now.date_naive() + Duration::days(days_ahead as i64))
            .and_time(time)
            .and_utc();

        if candidate > now {
            candidate
        } else {
            candidate + Duration::days(7)
        }
    }
}

impl Default for Cadence {
    /// Sundays at 02:00 UTC
    fn default() -> Self {
        Self {
            weekday: Weekday::Sun,
            hour: 2,
            minute: 0,
        }
    }
}

impl FromStr for Cadence {
    type Err = String;

    /// Parses `"<weekday> HH:MM"`, e.g. `"sun 02:00"`
    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let mut parts = s.split_whitespace();
        let (Some(day), Some(time), None) = (parts.next(), parts.next(), parts.next()) else {
            return Err(format!("expected '<weekday> HH:MM', got '{}'", s));
        };

        let weekday = day
            .parse::<Weekday>()
            .map_err(|_| format!("unknown weekday '{}'", day))?;

        let (hour, minute) = time
            .split_once(':')
            .ok_or_else(|| format!("expected HH:MM, got '{}'", time))?;
        let hour = hour
            .parse::<u32>()
            .map_err(|_| format!("invalid hour '{}'", hour))?;
        let minute = minute
            .parse::<u32>()
            .map_err(|_| format!("invalid minute '{}'", minute))?;

        Cadence::weekly(weekday, hour, minute)
    }
}

impl fmt::Display for Cadence {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{} {:02}:{:02} UTC", self.weekday, self.hour, self.minute)
    }
}
