//! Quiet-hours window — no proactive sends at night.
//!
//! Parsed from `"HH:MM-HH:MM"`. Windows may wrap midnight (the default
//! `20:00-08:00` does).

use chrono::{DateTime, Duration, NaiveTime, TimeZone, Timelike, Utc};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct QuietHours {
    pub start: NaiveTime,
    pub end: NaiveTime,
}

impl QuietHours {
    pub fn parse(s: &str) -> Result<Self, String> {
        let (start, end) = s
            .split_once('-')
            .ok_or_else(|| format!("quiet hours must be HH:MM-HH:MM, got {s:?}"))?;
        let parse_one = |t: &str| {
            NaiveTime::parse_from_str(t.trim(), "%H:%M")
                .map_err(|e| format!("bad time {t:?} in quiet hours: {e}"))
        };
        Ok(Self {
            start: parse_one(start)?,
            end: parse_one(end)?,
        })
    }

    /// Is `at` inside the quiet window?
    pub fn contains(&self, at: DateTime<Utc>) -> bool {
        let t = at.time();
        if self.start <= self.end {
            t >= self.start && t < self.end
        } else {
            // Wraps midnight: quiet if after start OR before end.
            t >= self.start || t < self.end
        }
    }

    /// The next instant at/after `at` when the window opens (quiet ends).
    ///
    /// If `at` is not inside the window, `at` itself is returned.
    pub fn next_opening(&self, at: DateTime<Utc>) -> DateTime<Utc> {
        if !self.contains(at) {
            return at;
        }
        let date = at.date_naive();
        let opening = if self.start <= self.end || at.time() < self.end {
            // Non-wrapped window, or the early-morning side of a wrapped one:
            // the window ends later today.
            date.and_time(self.end)
        } else {
            // Evening side of a wrapped window: the end is tomorrow.
            (date + Duration::days(1)).and_time(self.end)
        };
        Utc.from_utc_datetime(&opening)
    }
}

impl Default for QuietHours {
    fn default() -> Self {
        Self {
            start: NaiveTime::from_hms_opt(20, 0, 0).unwrap(),
            end: NaiveTime::from_hms_opt(8, 0, 0).unwrap(),
        }
    }
}

impl std::fmt::Display for QuietHours {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(
            f,
            "{:02}:{:02}-{:02}:{:02}",
            self.start.hour(),
            self.start.minute(),
            self.end.hour(),
            self.end.minute()
        )
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::TimeZone;

    fn at(h: u32, m: u32) -> DateTime<Utc> {
        Utc.with_ymd_and_hms(2025, 6, 10, h, m, 0).unwrap()
    }

    #[test]
    fn parse_round_trip() {
        let q = QuietHours::parse("20:00-08:00").unwrap();
        assert_eq!(q.to_string(), "20:00-08:00");
    }

    #[test]
    fn parse_rejects_garbage() {
        assert!(QuietHours::parse("late-early").is_err());
        assert!(QuietHours::parse("20:00").is_err());
    }

    #[test]
    fn wrapped_window_contains_night_not_day() {
        let q = QuietHours::default();
        assert!(q.contains(at(22, 30)));
        assert!(q.contains(at(3, 0)));
        assert!(q.contains(at(20, 0)));
        assert!(!q.contains(at(8, 0)));
        assert!(!q.contains(at(12, 0)));
    }

    #[test]
    fn next_opening_from_evening_is_tomorrow_morning() {
        let q = QuietHours::default();
        let opening = q.next_opening(at(22, 30));
        assert_eq!(
            opening,
            Utc.with_ymd_and_hms(2025, 6, 11, 8, 0, 0).unwrap()
        );
    }

    #[test]
    fn next_opening_from_early_morning_is_same_day() {
        let q = QuietHours::default();
        let opening = q.next_opening(at(6, 15));
        assert_eq!(opening, Utc.with_ymd_and_hms(2025, 6, 10, 8, 0, 0).unwrap());
    }

    #[test]
    fn next_opening_outside_window_is_identity() {
        let q = QuietHours::default();
        assert_eq!(q.next_opening(at(12, 0)), at(12, 0));
    }

    #[test]
    fn non_wrapped_window() {
        let q = QuietHours::parse("12:00-14:00").unwrap();
        assert!(q.contains(at(13, 0)));
        assert!(!q.contains(at(11, 0)));
        assert_eq!(q.next_opening(at(13, 0)), at(14, 0));
    }
}
