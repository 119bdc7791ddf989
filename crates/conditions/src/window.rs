//! Recurring wall-clock windows. Used as a standalone condition and as the
//! campaign-level sending window.

use chrono::{DateTime, Datelike, Duration, NaiveTime, TimeZone, Utc, Weekday};
use chrono_tz::Tz;
use serde::{Deserialize, Serialize};

/// A daily time window in a named timezone, optionally restricted to
/// certain weekdays. Windows may wrap midnight (`start > end`); bounds are
/// inclusive. Day membership is checked against the current local day.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TimeWindow {
    #[serde(with = "hhmm")]
    pub start: NaiveTime,
    #[serde(with = "hhmm")]
    pub end: NaiveTime,
    #[serde(default)]
    pub days_of_week: Vec<Weekday>,
    /// IANA zone name. Unparseable zones fall back to UTC at evaluation;
    /// campaign validation rejects them up front.
    #[serde(default = "default_timezone")]
    pub timezone: String,
}

fn default_timezone() -> String {
    "UTC".to_string()
}

impl TimeWindow {
    pub fn contains(&self, now: DateTime<Utc>) -> bool {
        let local = now.with_timezone(&self.tz());
        if !self.day_allowed(local.weekday()) {
            return false;
        }
        let current = local.time();
        if self.start <= self.end {
            current >= self.start && current <= self.end
        } else {
            current >= self.start || current <= self.end
        }
    }

    /// Earliest instant at or after `now` when the window is open.
    pub fn next_open(&self, now: DateTime<Utc>) -> DateTime<Utc> {
        if self.contains(now) {
            return now;
        }
        let tz = self.tz();
        let local_now = now.with_timezone(&tz);
        for day_offset in 0..=7 {
            let date = local_now.date_naive() + Duration::days(day_offset);
            if !self.day_allowed(date.weekday()) {
                continue;
            }
            let candidate = match tz.from_local_datetime(&date.and_time(self.start)).earliest() {
                Some(dt) => dt.with_timezone(&Utc),
                // DST gap, try the next day
                None => continue,
            };
            if candidate > now {
                return candidate;
            }
        }
        // No allowed day within a week: treat the window as always open
        now
    }

    pub fn timezone_is_valid(&self) -> bool {
        self.timezone.parse::<Tz>().is_ok()
    }

    fn tz(&self) -> Tz {
        self.timezone.parse().unwrap_or(Tz::UTC)
    }

    fn day_allowed(&self, day: Weekday) -> bool {
        self.days_of_week.is_empty() || self.days_of_week.contains(&day)
    }
}

/// "HH:MM" serde for window bounds; "HH:MM:SS" is accepted on input.
pub mod hhmm {
    use chrono::NaiveTime;
    use serde::{de, Deserialize, Deserializer, Serializer};

    pub fn serialize<S>(time: &NaiveTime, serializer: S) -> Result<S::Ok, S::Error>
    where
        S: Serializer,
    {
        serializer.serialize_str(&time.format("%H:%M").to_string())
    }

    pub fn deserialize<'de, D>(deserializer: D) -> Result<NaiveTime, D::Error>
    where
        D: Deserializer<'de>,
    {
        let raw = String::deserialize(deserializer)?;
        parse(&raw).ok_or_else(|| de::Error::custom(format!("invalid time of day: {raw}")))
    }

    pub fn parse(raw: &str) -> Option<NaiveTime> {
        NaiveTime::parse_from_str(raw, "%H:%M")
            .or_else(|_| NaiveTime::parse_from_str(raw, "%H:%M:%S"))
            .ok()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::NaiveTime;

    fn window(start: &str, end: &str, tz: &str) -> TimeWindow {
        TimeWindow {
            start: hhmm::parse(start).unwrap(),
            end: hhmm::parse(end).unwrap(),
            days_of_week: vec![],
            timezone: tz.to_string(),
        }
    }

    fn utc(s: &str) -> DateTime<Utc> {
        s.parse().unwrap()
    }

    #[test]
    fn test_contains_simple_window() {
        let w = window("09:00", "17:00", "UTC");
        assert!(w.contains(utc("2026-03-02T09:00:00Z")));
        assert!(w.contains(utc("2026-03-02T12:30:00Z")));
        assert!(w.contains(utc("2026-03-02T17:00:00Z")));
        assert!(!w.contains(utc("2026-03-02T08:59:00Z")));
        assert!(!w.contains(utc("2026-03-02T17:01:00Z")));
    }

    #[test]
    fn test_contains_wraps_midnight() {
        let w = window("22:00", "02:00", "UTC");
        assert!(w.contains(utc("2026-03-02T23:00:00Z")));
        assert!(w.contains(utc("2026-03-02T01:30:00Z")));
        assert!(!w.contains(utc("2026-03-02T12:00:00Z")));
    }

    #[test]
    fn test_contains_respects_timezone() {
        // 09:00-17:00 in New York is 14:00-22:00 UTC in March (EST, UTC-5)
        let w = window("09:00", "17:00", "America/New_York");
        assert!(w.contains(utc("2026-03-02T15:00:00Z")));
        assert!(!w.contains(utc("2026-03-02T10:00:00Z")));
    }

    #[test]
    fn test_day_filter() {
        let mut w = window("09:00", "17:00", "UTC");
        w.days_of_week = vec![Weekday::Mon, Weekday::Tue];
        // 2026-03-02 is a Monday
        assert!(w.contains(utc("2026-03-02T10:00:00Z")));
        // 2026-03-04 is a Wednesday
        assert!(!w.contains(utc("2026-03-04T10:00:00Z")));
    }

    #[test]
    fn test_next_open_same_day() {
        let w = window("09:00", "17:00", "UTC");
        assert_eq!(
            w.next_open(utc("2026-03-02T06:00:00Z")),
            utc("2026-03-02T09:00:00Z")
        );
        // Already open returns now unchanged
        let now = utc("2026-03-02T10:00:00Z");
        assert_eq!(w.next_open(now), now);
    }

    #[test]
    fn test_next_open_rolls_to_allowed_day() {
        let mut w = window("09:00", "17:00", "UTC");
        w.days_of_week = vec![Weekday::Mon];
        // Monday evening rolls a full week forward
        assert_eq!(
            w.next_open(utc("2026-03-02T18:00:00Z")),
            utc("2026-03-09T09:00:00Z")
        );
        // Wednesday rolls to next Monday
        assert_eq!(
            w.next_open(utc("2026-03-04T10:00:00Z")),
            utc("2026-03-09T09:00:00Z")
        );
    }

    #[test]
    fn test_invalid_timezone_falls_back_to_utc() {
        let w = window("09:00", "17:00", "Mars/Olympus_Mons");
        assert!(!w.timezone_is_valid());
        assert!(w.contains(utc("2026-03-02T12:00:00Z")));
    }

    #[test]
    fn test_hhmm_serde() {
        let w = window("22:00", "02:30", "UTC");
        let json = serde_json::to_string(&w).unwrap();
        assert!(json.contains("\"22:00\""));
        let back: TimeWindow = serde_json::from_str(&json).unwrap();
        assert_eq!(back.start, NaiveTime::from_hms_opt(22, 0, 0).unwrap());
        assert_eq!(back.end, NaiveTime::from_hms_opt(2, 30, 0).unwrap());

        let with_seconds: TimeWindow =
            serde_json::from_str(r#"{"start":"09:00:00","end":"17:30:00"}"#).unwrap();
        assert_eq!(with_seconds.timezone, "UTC");
        assert_eq!(with_seconds.end, NaiveTime::from_hms_opt(17, 30, 0).unwrap());
    }
}
