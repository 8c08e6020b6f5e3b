use serde::{Deserialize, Serialize};
use tracing::debug;

use crate::{
    schedule::{ChannelEvent, DaySearch, WeekSchedule},
    time::{week_elapsed, week_span, WeekTime, SECONDS_PER_WEEK},
};

pub trait ChannelValue: Copy + PartialEq + std::fmt::Debug {
    /// Value `factor` (0..=1) of the way from `self` to `target`.
    fn interpolate(self, target: Self, factor: f32) -> Self;
}

impl ChannelValue for f32 {
    fn interpolate(self, target: Self, factor: f32) -> Self {
        self + (target - self) * factor
    }
}

impl ChannelValue for f64 {
    fn interpolate(self, target: Self, factor: f32) -> Self {
        self + (target - self) * f64::from(factor)
    }
}

macro_rules! impl_integer_channel_value {
    ($($ty:ty),*) => {
        $(
            impl ChannelValue for $ty {
                fn interpolate(self, target: Self, factor: f32) -> Self {
                    let start = self as f32;
                    (start + (target as f32 - start) * factor).round() as $ty
                }
            }
        )*
    };
}

impl_integer_channel_value!(u8, u16, u32, i16, i32);

/// How discrete schedule events turn into a continuous channel value.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum TransitionMode {
    /// Keep the value of the event in effect.
    #[default]
    #[serde(alias = "action_hold")]
    Hold,
    /// Report each event once, until the channel time is advanced past it.
    #[serde(alias = "action")]
    SingleShot,
    /// Blend linearly from the current event towards the next one.
    #[serde(alias = "interpolate")]
    Interpolation,
}

impl TransitionMode {
    pub fn as_str(self) -> &'static str {
        match self {
            Self::Hold => "hold",
            Self::SingleShot => "single_shot",
            Self::Interpolation => "interpolation",
        }
    }

    pub(crate) fn channel_value<V: ChannelValue>(self, data: &TrackingData<V>) -> Option<V> {
        match self {
            Self::Hold => Some(data.current.value),
            Self::SingleShot => single_shot_value(data),
            Self::Interpolation => interpolated_value(data),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq)]
pub(crate) struct TrackingData<V> {
    pub current: ChannelEvent<V>,
    pub next: Option<ChannelEvent<V>>,
    pub channel_time: Option<u32>,
    pub now: u32,
}

fn single_shot_value<V: ChannelValue>(data: &TrackingData<V>) -> Option<V> {
    let current = &data.current;
    // An event later in the week than `now` was found by wrapping back.
    let event_of_last_week = current.time_of_week > data.now;

    let Some(channel_time) = data.channel_time else {
        return (!event_of_last_week).then_some(current.value);
    };
    let channel_time_of_last_week = channel_time > data.now;

    if channel_time_of_last_week == event_of_last_week && channel_time < current.time_of_week {
        return Some(current.value);
    }

    if channel_time_of_last_week && !event_of_last_week {
        return Some(current.value);
    }

    None
}

fn interpolated_value<V: ChannelValue>(data: &TrackingData<V>) -> Option<V> {
    let current = &data.current;
    let next = data.next.as_ref()?;

    let elapsed = week_elapsed(current.time_of_week, data.now);
    if elapsed == 0 {
        return Some(current.value);
    }

    let span = week_span(current.time_of_week, next.time_of_week);
    let factor = (elapsed as f32 / span as f32).clamp(0.0, 1.0);
    Some(current.value.interpolate(next.value, factor))
}

/// Per-channel evaluation state for `N` output channels.
///
/// The schedule is borrowed for each evaluation instead of being stored, so
/// it can be edited between calls.
#[derive(Debug, Clone, PartialEq)]
pub struct ScheduleTracker<const N: usize> {
    mode: TransitionMode,
    channel_times: [Option<u32>; N],
}

impl<const N: usize> Default for ScheduleTracker<N> {
    fn default() -> Self {
        Self::new(TransitionMode::default())
    }
}

impl<const N: usize> ScheduleTracker<N> {
    pub fn new(mode: TransitionMode) -> Self {
        debug!("using {} tracker", mode.as_str());
        Self {
            mode,
            channel_times: [None; N],
        }
    }

    pub fn mode(&self) -> TransitionMode {
        self.mode
    }

    /// Swaps the policy; channel times are kept.
    pub fn set_mode(&mut self, mode: TransitionMode) {
        if self.mode != mode {
            debug!("switching tracker from {} to {}", self.mode.as_str(), mode.as_str());
            self.mode = mode;
        }
    }

    pub fn current_channel_values<V, const C: usize, const P: usize>(
        &self,
        schedule: &WeekSchedule<V, C, P>,
        now: WeekTime,
    ) -> [Option<V>; N]
    where
        V: ChannelValue,
    {
        std::array::from_fn(|channel| self.current_channel_value(schedule, channel, now))
    }

    pub fn current_channel_value<V, const C: usize, const P: usize>(
        &self,
        schedule: &WeekSchedule<V, C, P>,
        channel: usize,
        now: WeekTime,
    ) -> Option<V>
    where
        V: ChannelValue,
    {
        let channel_time = *self.channel_times.get(channel)?;

        let Some(current) = schedule.find_current_time_point(channel, now, DaySearch::AllDays)
        else {
            debug!("no current event for channel {channel}");
            return None;
        };
        let next = schedule.find_next_time_point(channel, now, DaySearch::AllDays);

        let data = TrackingData {
            current,
            next,
            channel_time,
            now: now.time_of_week(),
        };
        self.mode.channel_value(&data)
    }

    pub fn update_channel_time(&mut self, channel: usize, now: WeekTime) -> bool {
        match self.channel_times.get_mut(channel) {
            Some(time) => {
                *time = Some(now.time_of_week());
                true
            }
            None => false,
        }
    }

    pub fn update_all_channel_times(&mut self, now: WeekTime) {
        self.channel_times = [Some(now.time_of_week()); N];
    }

    pub fn channel_times(&self) -> &[Option<u32>; N] {
        &self.channel_times
    }

    /// Restores previously saved channel times. Times outside the week are
    /// dropped, missing channels are reset.
    pub fn set_channel_times(&mut self, times: &[Option<u32>]) {
        for (channel, slot) in self.channel_times.iter_mut().enumerate() {
            *slot = times
                .get(channel)
                .copied()
                .flatten()
                .filter(|time| *time < SECONDS_PER_WEEK);
        }
    }

    pub fn reset_channel_times(&mut self) {
        self.channel_times = [None; N];
    }
}

#[cfg(test)]
mod tests {
    use pretty_assertions::assert_eq;

    use super::*;
    use crate::time::{hms, DayOfWeek, SECONDS_PER_DAY};

    type TestSchedule = WeekSchedule<f32, 2, 10>;

    fn single(value: f32) -> [Option<f32>; 2] {
        [Some(value), None]
    }

    fn fixture() -> TestSchedule {
        let mut schedule = TestSchedule::new();
        for (day, time, value) in [
            (DayOfWeek::Monday, hms(10, 0, 0), 1.0),
            (DayOfWeek::Monday, hms(10, 30, 0), 2.0),
            (DayOfWeek::Monday, hms(11, 30, 0), 3.0),
            (DayOfWeek::Tuesday, hms(9, 0, 0), 10.0),
            (DayOfWeek::Tuesday, hms(11, 30, 0), 20.0),
            (DayOfWeek::Tuesday, hms(12, 30, 0), 30.0),
        ] {
            schedule.insert_time_point(day, time, single(value)).unwrap();
        }
        schedule
    }

    fn monday(hours: u32, minutes: u32) -> WeekTime {
        WeekTime::new(DayOfWeek::Monday, hms(hours, minutes, 0))
    }

    #[test]
    fn single_shot_reports_event_once() {
        let schedule = fixture();
        let mut tracker = ScheduleTracker::<4>::new(TransitionMode::SingleShot);
        let now = monday(10, 5);

        assert_eq!(tracker.current_channel_value(&schedule, 0, now), Some(1.0));
        assert_eq!(
            tracker.current_channel_values(&schedule, now),
            [Some(1.0), None, None, None]
        );

        tracker.update_all_channel_times(now);
        assert_eq!(tracker.current_channel_value(&schedule, 0, now), None);

        // The next event becomes current and fires once more.
        assert_eq!(tracker.current_channel_value(&schedule, 0, monday(10, 31)), Some(2.0));
    }

    #[test]
    fn single_shot_fires_again_next_week() {
        let schedule = fixture();
        let mut tracker = ScheduleTracker::<2>::new(TransitionMode::SingleShot);

        tracker.update_channel_time(0, WeekTime::new(DayOfWeek::Tuesday, hms(13, 0, 0)));
        assert_eq!(tracker.current_channel_value(&schedule, 0, monday(10, 5)), Some(1.0));
    }

    #[test]
    fn single_shot_ignores_stale_event_before_first_run() {
        let schedule = fixture();
        let tracker = ScheduleTracker::<2>::new(TransitionMode::SingleShot);

        // Nothing before Monday 09:00 this week; the current event wraps back
        // to last Tuesday.
        assert_eq!(tracker.current_channel_value(&schedule, 0, monday(9, 0)), None);
    }

    #[test]
    fn single_shot_after_week_wraparound() {
        let data = TrackingData {
            current: ChannelEvent {
                time_of_week: hms(1, 0, 0),
                value: 1,
            },
            next: None,
            channel_time: Some(6 * SECONDS_PER_DAY + hms(23, 0, 0)),
            now: hms(2, 0, 0),
        };

        assert_eq!(TransitionMode::SingleShot.channel_value(&data), Some(1));
    }

    #[test]
    fn hold_keeps_value_within_event_span() {
        let schedule = fixture();
        let mut tracker = ScheduleTracker::<4>::new(TransitionMode::Hold);
        let now = monday(10, 35);

        assert_eq!(tracker.current_channel_value(&schedule, 0, now), Some(2.0));
        assert_eq!(tracker.current_channel_value(&schedule, 1, now), None);

        tracker.update_all_channel_times(now);
        assert_eq!(tracker.current_channel_value(&schedule, 0, now), Some(2.0));
        assert_eq!(tracker.current_channel_value(&schedule, 0, monday(11, 29)), Some(2.0));
        assert_eq!(tracker.current_channel_value(&schedule, 0, monday(11, 30)), Some(3.0));
    }

    #[test]
    fn interpolates_between_events() {
        let schedule = fixture();
        let tracker = ScheduleTracker::<4>::new(TransitionMode::Interpolation);

        let value = tracker
            .current_channel_value(&schedule, 0, monday(10, 45))
            .unwrap();
        assert!((value - 2.25).abs() < 1e-6);

        let values = tracker.current_channel_values(&schedule, monday(10, 45));
        assert_eq!(values[1], None);
        assert_eq!(values[3], None);
    }

    #[test]
    fn interpolates_quarter_span() {
        let mut schedule = TestSchedule::new();
        schedule
            .insert_time_point(DayOfWeek::Thursday, hms(10, 30, 0), single(4.0))
            .unwrap();
        schedule
            .insert_time_point(DayOfWeek::Thursday, hms(11, 30, 0), single(8.0))
            .unwrap();
        let tracker = ScheduleTracker::<2>::new(TransitionMode::Interpolation);
        let now = WeekTime::new(DayOfWeek::Thursday, hms(10, 45, 0));

        let value = tracker.current_channel_value(&schedule, 0, now).unwrap();
        assert!((value - 5.0).abs() < 1e-6);
    }

    #[test]
    fn interpolation_at_event_time_returns_event_value() {
        let schedule = fixture();
        let tracker = ScheduleTracker::<2>::new(TransitionMode::Interpolation);

        assert_eq!(tracker.current_channel_value(&schedule, 0, monday(10, 30)), Some(2.0));
    }

    #[test]
    fn interpolation_needs_next_event() {
        let data = TrackingData {
            current: ChannelEvent {
                time_of_week: hms(1, 0, 0),
                value: 4.0_f32,
            },
            next: None,
            channel_time: None,
            now: hms(2, 0, 0),
        };

        assert_eq!(TransitionMode::Interpolation.channel_value(&data), None);
    }

    #[test]
    fn interpolates_across_week_start() {
        let mut schedule = TestSchedule::new();
        schedule
            .insert_time_point(DayOfWeek::Saturday, hms(22, 0, 0), single(0.0))
            .unwrap();
        schedule
            .insert_time_point(DayOfWeek::Sunday, hms(2, 0, 0), single(4.0))
            .unwrap();
        let tracker = ScheduleTracker::<2>::new(TransitionMode::Interpolation);

        let midnight = WeekTime::new(DayOfWeek::Sunday, 0);
        let value = tracker.current_channel_value(&schedule, 0, midnight).unwrap();
        assert!((value - 2.0).abs() < 1e-6);
    }

    #[test]
    fn integer_values_round() {
        assert_eq!(10_u8.interpolate(20, 0.26), 13);
        assert_eq!(100_i32.interpolate(0, 0.5), 50);
    }

    #[test]
    fn out_of_range_channel_is_absent() {
        let schedule = fixture();
        let mut tracker = ScheduleTracker::<4>::new(TransitionMode::Hold);

        assert_eq!(tracker.current_channel_value(&schedule, 5, monday(10, 0)), None);
        assert!(!tracker.update_channel_time(5, monday(10, 0)));
    }

    #[test]
    fn mode_switch_keeps_channel_times() {
        let mut tracker = ScheduleTracker::<2>::new(TransitionMode::SingleShot);
        tracker.update_channel_time(1, monday(8, 0));

        tracker.set_mode(TransitionMode::Interpolation);

        assert_eq!(tracker.mode(), TransitionMode::Interpolation);
        assert_eq!(tracker.channel_times(), &[None, Some(SECONDS_PER_DAY + hms(8, 0, 0))]);
    }

    #[test]
    fn restores_saved_channel_times() {
        let mut tracker = ScheduleTracker::<3>::new(TransitionMode::SingleShot);
        tracker.set_channel_times(&[Some(120), Some(SECONDS_PER_WEEK)]);

        assert_eq!(tracker.channel_times(), &[Some(120), None, None]);
    }

    #[test]
    fn parses_legacy_mode_names() {
        let mode: TransitionMode = serde_json::from_str("\"interpolate\"").unwrap();
        assert_eq!(mode, TransitionMode::Interpolation);
        let mode: TransitionMode = serde_json::from_str("\"action\"").unwrap();
        assert_eq!(mode, TransitionMode::SingleShot);
    }
}
