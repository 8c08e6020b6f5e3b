use chrono::{Datelike, Timelike, Weekday};
use serde::{Deserialize, Serialize};

pub const SECONDS_PER_MINUTE: u32 = 60;
pub const SECONDS_PER_HOUR: u32 = 60 * SECONDS_PER_MINUTE;
pub const SECONDS_PER_DAY: u32 = 24 * SECONDS_PER_HOUR;
pub const SECONDS_PER_WEEK: u32 = 7 * SECONDS_PER_DAY;

/// Weekday indexed the way the schedule stores it: Sunday is day zero.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum DayOfWeek {
    #[serde(alias = "sun")]
    Sunday,
    #[serde(alias = "mon")]
    Monday,
    #[serde(alias = "tue")]
    Tuesday,
    #[serde(alias = "wed")]
    Wednesday,
    #[serde(alias = "thu")]
    Thursday,
    #[serde(alias = "fri")]
    Friday,
    #[serde(alias = "sat")]
    Saturday,
}

impl DayOfWeek {
    pub const ALL: [DayOfWeek; 7] = [
        Self::Sunday,
        Self::Monday,
        Self::Tuesday,
        Self::Wednesday,
        Self::Thursday,
        Self::Friday,
        Self::Saturday,
    ];

    pub fn index(self) -> usize {
        match self {
            Self::Sunday => 0,
            Self::Monday => 1,
            Self::Tuesday => 2,
            Self::Wednesday => 3,
            Self::Thursday => 4,
            Self::Friday => 5,
            Self::Saturday => 6,
        }
    }

    pub fn from_index(index: usize) -> Self {
        Self::ALL[index % 7]
    }

    pub fn from_chrono(weekday: Weekday) -> Self {
        Self::from_index(weekday.num_days_from_sunday() as usize)
    }

    pub fn next(self) -> Self {
        Self::from_index(self.index() + 1)
    }

    pub fn previous(self) -> Self {
        Self::from_index(self.index() + 6)
    }

    pub fn as_str(self) -> &'static str {
        match self {
            Self::Sunday => "sunday",
            Self::Monday => "monday",
            Self::Tuesday => "tuesday",
            Self::Wednesday => "wednesday",
            Self::Thursday => "thursday",
            Self::Friday => "friday",
            Self::Saturday => "saturday",
        }
    }
}

pub const fn hms(hours: u32, minutes: u32, seconds: u32) -> u32 {
    hours * SECONDS_PER_HOUR + minutes * SECONDS_PER_MINUTE + seconds
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct WeekTime {
    pub day: DayOfWeek,
    pub time_of_day: u32,
}

impl WeekTime {
    /// `time_of_day` must be below [`SECONDS_PER_DAY`]; see [`WeekTime::checked`].
    pub fn new(day: DayOfWeek, time_of_day: u32) -> Self {
        debug_assert!(
            time_of_day < SECONDS_PER_DAY,
            "time of day {time_of_day}s is outside of a day"
        );
        Self {
            day,
            time_of_day: time_of_day.min(SECONDS_PER_DAY - 1),
        }
    }

    pub fn checked(day: DayOfWeek, time_of_day: u32) -> Option<Self> {
        (time_of_day < SECONDS_PER_DAY).then_some(Self { day, time_of_day })
    }

    pub fn from_datetime<T: Datelike + Timelike>(value: &T) -> Self {
        Self {
            day: DayOfWeek::from_chrono(value.weekday()),
            time_of_day: value.num_seconds_from_midnight() % SECONDS_PER_DAY,
        }
    }

    pub fn from_time_of_week(time_of_week: u32) -> Self {
        let time_of_week = time_of_week % SECONDS_PER_WEEK;
        Self {
            day: DayOfWeek::from_index((time_of_week / SECONDS_PER_DAY) as usize),
            time_of_day: time_of_week % SECONDS_PER_DAY,
        }
    }

    pub fn time_of_week(&self) -> u32 {
        self.day.index() as u32 * SECONDS_PER_DAY + self.time_of_day
    }
}

/// Forward distance from `from` to `to` inside the weekly cycle.
///
/// A non-positive naive difference means `to` lies in the following week,
/// so a full week is added. Equal points are therefore a full week apart.
pub fn week_span(from: u32, to: u32) -> u32 {
    let from = from % SECONDS_PER_WEEK;
    let to = to % SECONDS_PER_WEEK;
    if to > from {
        to - from
    } else {
        to + SECONDS_PER_WEEK - from
    }
}

/// Time elapsed since `since`, wrapping backwards across the week start.
/// Zero when both points coincide.
pub fn week_elapsed(since: u32, now: u32) -> u32 {
    let since = since % SECONDS_PER_WEEK;
    let now = now % SECONDS_PER_WEEK;
    if now >= since {
        now - since
    } else {
        now + SECONDS_PER_WEEK - since
    }
}

#[cfg(test)]
mod tests {
    use chrono::{FixedOffset, TimeZone};

    use super::*;

    #[test]
    fn day_navigation_wraps() {
        assert_eq!(DayOfWeek::Saturday.next(), DayOfWeek::Sunday);
        assert_eq!(DayOfWeek::Sunday.previous(), DayOfWeek::Saturday);
        assert_eq!(DayOfWeek::Wednesday.previous(), DayOfWeek::Tuesday);
        assert_eq!(DayOfWeek::from_index(9), DayOfWeek::Tuesday);
    }

    #[test]
    fn week_time_from_chrono() {
        // Jan 5, 2026 is a Monday.
        let now = FixedOffset::east_opt(3600)
            .unwrap()
            .with_ymd_and_hms(2026, 1, 5, 10, 45, 30)
            .unwrap();
        let time = WeekTime::from_datetime(&now);

        assert_eq!(time.day, DayOfWeek::Monday);
        assert_eq!(time.time_of_day, hms(10, 45, 30));
        assert_eq!(time.time_of_week(), SECONDS_PER_DAY + hms(10, 45, 30));
    }

    #[test]
    fn spans_across_week_boundary() {
        let saturday_late = WeekTime::new(DayOfWeek::Saturday, hms(23, 0, 0)).time_of_week();
        let sunday_early = WeekTime::new(DayOfWeek::Sunday, hms(1, 0, 0)).time_of_week();

        assert_eq!(week_span(saturday_late, sunday_early), 2 * SECONDS_PER_HOUR);
        assert_eq!(week_elapsed(saturday_late, sunday_early), 2 * SECONDS_PER_HOUR);
        assert_eq!(week_span(sunday_early, sunday_early), SECONDS_PER_WEEK);
        assert_eq!(week_elapsed(sunday_early, sunday_early), 0);
    }

    #[test]
    fn checked_rejects_time_outside_day() {
        assert_eq!(WeekTime::checked(DayOfWeek::Monday, SECONDS_PER_DAY), None);
        assert_eq!(
            WeekTime::checked(DayOfWeek::Monday, hms(23, 59, 59)),
            Some(WeekTime::new(DayOfWeek::Monday, hms(23, 59, 59)))
        );
    }

    #[test]
    fn parses_short_day_names() {
        let day: DayOfWeek = serde_json::from_str("\"tue\"").unwrap();
        assert_eq!(day, DayOfWeek::Tuesday);
        assert_eq!(serde_json::to_string(&DayOfWeek::Friday).unwrap(), "\"friday\"");
    }
}
