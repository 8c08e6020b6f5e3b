use serde::{Deserialize, Serialize};
use tracing::debug;

use crate::{
    error::ScheduleError,
    slots::OptionalSlots,
    time::{DayOfWeek, WeekTime, SECONDS_PER_DAY, SECONDS_PER_MINUTE},
};

/// Sort key of an empty slot; later than any valid time of day.
pub const INVALID_TIME: u32 = SECONDS_PER_DAY + SECONDS_PER_MINUTE;

/// Day steps a week search may take: the six other days, the origin day one
/// week back or ahead, plus one spare step.
const MAX_DAY_STEPS: usize = 8;

/// One scheduled event: the values it sets, per channel. Channels not
/// driven by the event are `None`.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct TimePoint<V, const C: usize> {
    pub time_of_day: u32,
    pub channels: [Option<V>; C],
}

/// A single channel's view of a [`TimePoint`] within a day.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct DayEvent<V> {
    pub time_of_day: u32,
    pub value: V,
}

/// A single channel's event located in the week.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct ChannelEvent<V> {
    pub time_of_week: u32,
    pub value: V,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum DaySearch {
    /// Only look at the requested day.
    OnlyThisDay,
    /// Walk into neighbouring days (and around the week) when the requested
    /// day has nothing.
    #[default]
    AllDays,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum EventSelection {
    Current,
    Next,
}

/// Up to `P` time points of one day, ordered by time of day.
#[derive(Debug, Clone, PartialEq)]
pub struct DaySchedule<V, const C: usize, const P: usize> {
    points: OptionalSlots<TimePoint<V, C>, P>,
}

impl<V: Copy, const C: usize, const P: usize> Default for DaySchedule<V, C, P> {
    fn default() -> Self {
        Self::new()
    }
}

impl<V: Copy, const C: usize, const P: usize> DaySchedule<V, C, P> {
    pub fn new() -> Self {
        Self {
            points: OptionalSlots::new(),
        }
    }

    pub fn insert_time_point(
        &mut self,
        time_of_day: u32,
        channels: [Option<V>; C],
    ) -> Result<(), ScheduleError> {
        if time_of_day >= SECONDS_PER_DAY {
            return Err(ScheduleError::InvalidTime(time_of_day));
        }

        if self.points.is_full() {
            return Err(ScheduleError::DayFull);
        }

        if self.find_slot_with_time(time_of_day).is_some() {
            return Err(ScheduleError::DuplicateTime(time_of_day));
        }

        self.points.append(TimePoint {
            time_of_day,
            channels,
        });
        self.reorder();
        Ok(())
    }

    pub fn remove_time_point(&mut self, time_of_day: u32) -> Result<(), ScheduleError> {
        let index = self
            .points
            .position(|point| point.time_of_day == time_of_day)
            .ok_or(ScheduleError::TimeNotFound(time_of_day))?;

        self.points.erase(index);
        self.reorder();
        Ok(())
    }

    pub fn find_slot_with_time(&self, time_of_day: u32) -> Option<&[Option<V>; C]> {
        self.points
            .iter()
            .find(|point| point.time_of_day == time_of_day)
            .map(|point| &point.channels)
    }

    pub fn find_slot_with_time_mut(&mut self, time_of_day: u32) -> Option<&mut [Option<V>; C]> {
        self.points
            .iter_mut()
            .find(|point| point.time_of_day == time_of_day)
            .map(|point| &mut point.channels)
    }

    pub fn first_time_point(&self, channel: usize) -> Option<DayEvent<V>> {
        self.points
            .iter()
            .find_map(|point| channel_event(point, channel))
    }

    pub fn last_time_point(&self, channel: usize) -> Option<DayEvent<V>> {
        self.points
            .iter()
            .rev()
            .find_map(|point| channel_event(point, channel))
    }

    /// Latest event for `channel` at or before `time_of_day`.
    pub fn current_time_point(&self, channel: usize, time_of_day: u32) -> Option<DayEvent<V>> {
        self.points
            .iter()
            .rev()
            .filter(|point| point.time_of_day <= time_of_day)
            .find_map(|point| channel_event(point, channel))
    }

    /// Earliest event for `channel` strictly after `time_of_day`.
    pub fn next_time_point(&self, channel: usize, time_of_day: u32) -> Option<DayEvent<V>> {
        self.points
            .iter()
            .filter(|point| point.time_of_day > time_of_day)
            .find_map(|point| channel_event(point, channel))
    }

    pub fn iter(&self) -> impl DoubleEndedIterator<Item = &TimePoint<V, C>> + '_ {
        self.points.iter()
    }

    pub fn len(&self) -> usize {
        self.points.count()
    }

    pub fn is_empty(&self) -> bool {
        self.points.is_empty()
    }

    pub fn is_full(&self) -> bool {
        self.points.is_full()
    }

    pub fn clear(&mut self) {
        self.points.clear();
    }

    fn reorder(&mut self) {
        self.points.sort_by_key(|point| point.time_of_day);
    }

    #[cfg(test)]
    fn slot_times(&self) -> Vec<u32> {
        (0..P)
            .map(|index| {
                self.points
                    .get(index)
                    .map_or(INVALID_TIME, |point| point.time_of_day)
            })
            .collect()
    }
}

fn channel_event<V: Copy, const C: usize>(
    point: &TimePoint<V, C>,
    channel: usize,
) -> Option<DayEvent<V>> {
    point
        .channels
        .get(channel)
        .copied()
        .flatten()
        .map(|value| DayEvent {
            time_of_day: point.time_of_day,
            value,
        })
}

#[derive(Debug, Clone, Copy, PartialEq)]
pub struct EventStatus<V, const C: usize> {
    pub current: [Option<ChannelEvent<V>>; C],
    pub next: [Option<ChannelEvent<V>>; C],
}

/// Flat persistence form of a single channel value in the week.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct ScheduleEntry<V> {
    pub day: DayOfWeek,
    #[serde(rename = "timeOfDay")]
    pub time_of_day: u32,
    pub channel: usize,
    pub value: V,
}

#[derive(Debug, Clone, PartialEq)]
pub struct WeekSchedule<V, const C: usize, const P: usize> {
    days: [DaySchedule<V, C, P>; 7],
}

impl<V: Copy, const C: usize, const P: usize> Default for WeekSchedule<V, C, P> {
    fn default() -> Self {
        Self::new()
    }
}

impl<V: Copy, const C: usize, const P: usize> WeekSchedule<V, C, P> {
    pub const CHANNELS: usize = C;
    pub const TIME_POINTS_PER_DAY: usize = P;

    pub fn new() -> Self {
        Self {
            days: std::array::from_fn(|_| DaySchedule::new()),
        }
    }

    pub fn day(&self, day: DayOfWeek) -> &DaySchedule<V, C, P> {
        &self.days[day.index()]
    }

    pub fn day_mut(&mut self, day: DayOfWeek) -> &mut DaySchedule<V, C, P> {
        &mut self.days[day.index()]
    }

    pub fn set_day_schedule(&mut self, day: DayOfWeek, schedule: DaySchedule<V, C, P>) -> &mut Self {
        self.days[day.index()] = schedule;
        self
    }

    pub fn insert_time_point(
        &mut self,
        day: DayOfWeek,
        time_of_day: u32,
        channels: [Option<V>; C],
    ) -> Result<(), ScheduleError> {
        self.day_mut(day)
            .insert_time_point(time_of_day, channels)
            .map_err(|err| err.on_day(day))
    }

    pub fn remove_time_point(&mut self, day: DayOfWeek, time_of_day: u32) -> Result<(), ScheduleError> {
        self.day_mut(day)
            .remove_time_point(time_of_day)
            .map_err(|err| err.on_day(day))
    }

    pub fn find_current_time_point(
        &self,
        channel: usize,
        now: WeekTime,
        search: DaySearch,
    ) -> Option<ChannelEvent<V>> {
        self.find_event(EventSelection::Current, channel, now, search)
    }

    pub fn find_next_time_point(
        &self,
        channel: usize,
        now: WeekTime,
        search: DaySearch,
    ) -> Option<ChannelEvent<V>> {
        self.find_event(EventSelection::Next, channel, now, search)
    }

    pub fn current_event_status(&self, now: WeekTime, search: DaySearch) -> EventStatus<V, C> {
        EventStatus {
            current: std::array::from_fn(|channel| {
                self.find_current_time_point(channel, now, search)
            }),
            next: std::array::from_fn(|channel| self.find_next_time_point(channel, now, search)),
        }
    }

    pub fn is_empty(&self) -> bool {
        self.days.iter().all(DaySchedule::is_empty)
    }

    pub fn clear(&mut self) {
        for day in &mut self.days {
            day.clear();
        }
    }

    /// Every channel value, ordered by day, time of day and channel.
    pub fn entries(&self) -> Vec<ScheduleEntry<V>> {
        let mut entries = Vec::new();
        for day in DayOfWeek::ALL {
            for point in self.day(day).iter() {
                for (channel, value) in point.channels.iter().enumerate() {
                    if let Some(value) = value {
                        entries.push(ScheduleEntry {
                            day,
                            time_of_day: point.time_of_day,
                            channel,
                            value: *value,
                        });
                    }
                }
            }
        }
        entries
    }

    /// Rebuilds a schedule from [`entries`](Self::entries) output. Entries
    /// sharing a day and time merge into one time point; a repeated channel
    /// keeps the last value.
    pub fn from_entries<I>(entries: I) -> Result<Self, ScheduleError>
    where
        I: IntoIterator<Item = ScheduleEntry<V>>,
    {
        let mut schedule = Self::new();
        for entry in entries {
            if entry.channel >= C {
                return Err(ScheduleError::InvalidChannel(entry.channel).on_day(entry.day));
            }

            if let Some(channels) = schedule.day_mut(entry.day).find_slot_with_time_mut(entry.time_of_day) {
                channels[entry.channel] = Some(entry.value);
                continue;
            }

            let mut channels = [None; C];
            channels[entry.channel] = Some(entry.value);
            schedule.insert_time_point(entry.day, entry.time_of_day, channels)?;
        }
        Ok(schedule)
    }

    fn find_event(
        &self,
        selection: EventSelection,
        channel: usize,
        now: WeekTime,
        search: DaySearch,
    ) -> Option<ChannelEvent<V>> {
        if channel >= C {
            return None;
        }

        let mut day = now.day;
        let mut found = match selection {
            EventSelection::Current => self.day(day).current_time_point(channel, now.time_of_day),
            EventSelection::Next => self.day(day).next_time_point(channel, now.time_of_day),
        };

        if search == DaySearch::AllDays {
            let mut steps = 0;
            while found.is_none() && steps < MAX_DAY_STEPS {
                found = match selection {
                    EventSelection::Current => {
                        day = day.previous();
                        self.day(day).last_time_point(channel)
                    }
                    EventSelection::Next => {
                        day = day.next();
                        self.day(day).first_time_point(channel)
                    }
                };
                steps += 1;
            }
        }

        match found {
            Some(event) => Some(ChannelEvent {
                time_of_week: day.index() as u32 * SECONDS_PER_DAY + event.time_of_day,
                value: event.value,
            }),
            None => {
                debug!("no {selection:?} event for channel {channel}");
                None
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use pretty_assertions::assert_eq;

    use super::*;
    use crate::time::hms;

    type TestDay = DaySchedule<i32, 4, 5>;
    type TestWeek = WeekSchedule<i32, 4, 5>;

    fn only(channel: usize, value: i32) -> [Option<i32>; 4] {
        let mut channels = [None; 4];
        channels[channel] = Some(value);
        channels
    }

    fn monday_schedule() -> TestWeek {
        let mut week = TestWeek::new();
        let monday = week.day_mut(DayOfWeek::Monday);
        monday.insert_time_point(3600, only(0, 1)).unwrap();
        monday.insert_time_point(7200, only(0, 2)).unwrap();
        monday.insert_time_point(10800, only(0, 3)).unwrap();
        week
    }

    #[test]
    fn keeps_slots_sorted_with_empty_last() {
        let mut day = TestDay::new();
        day.insert_time_point(hms(12, 0, 0), only(0, 1)).unwrap();
        day.insert_time_point(hms(8, 0, 0), only(0, 2)).unwrap();
        day.insert_time_point(hms(20, 0, 0), only(0, 3)).unwrap();

        assert_eq!(
            day.slot_times(),
            vec![hms(8, 0, 0), hms(12, 0, 0), hms(20, 0, 0), INVALID_TIME, INVALID_TIME]
        );

        day.remove_time_point(hms(8, 0, 0)).unwrap();
        assert_eq!(
            day.slot_times(),
            vec![hms(12, 0, 0), hms(20, 0, 0), INVALID_TIME, INVALID_TIME, INVALID_TIME]
        );
    }

    #[test]
    fn duplicate_insert_leaves_day_unchanged() {
        let mut day = TestDay::new();
        day.insert_time_point(hms(9, 30, 0), only(1, 5)).unwrap();
        assert_eq!(day.find_slot_with_time(hms(9, 30, 0)), Some(&only(1, 5)));

        let before = day.clone();
        assert_eq!(
            day.insert_time_point(hms(9, 30, 0), only(1, 6)),
            Err(ScheduleError::DuplicateTime(hms(9, 30, 0)))
        );
        assert_eq!(day, before);
    }

    #[test]
    fn full_day_rejects_insert() {
        let mut day = TestDay::new();
        for hour in 0..5 {
            day.insert_time_point(hms(hour, 0, 0), only(0, hour as i32)).unwrap();
        }
        assert!(day.is_full());

        let before = day.clone();
        assert_eq!(
            day.insert_time_point(hms(23, 0, 0), only(0, 9)),
            Err(ScheduleError::DayFull)
        );
        assert_eq!(day, before);
    }

    #[test]
    fn remove_missing_time_fails() {
        let mut day = TestDay::new();
        day.insert_time_point(hms(6, 0, 0), only(0, 1)).unwrap();

        assert_eq!(
            day.remove_time_point(hms(7, 0, 0)),
            Err(ScheduleError::TimeNotFound(hms(7, 0, 0)))
        );
        day.remove_time_point(hms(6, 0, 0)).unwrap();
        assert_eq!(day.find_slot_with_time(hms(6, 0, 0)), None);
        assert!(day.is_empty());
    }

    #[test]
    fn rejects_time_outside_day() {
        let mut day = TestDay::new();
        assert_eq!(
            day.insert_time_point(SECONDS_PER_DAY, only(0, 1)),
            Err(ScheduleError::InvalidTime(SECONDS_PER_DAY))
        );
    }

    #[test]
    fn day_queries_skip_other_channels() {
        let mut day = TestDay::new();
        day.insert_time_point(hms(6, 0, 0), only(0, 1)).unwrap();
        day.insert_time_point(hms(9, 0, 0), only(1, 10)).unwrap();
        day.insert_time_point(hms(12, 0, 0), only(0, 2)).unwrap();
        day.insert_time_point(hms(18, 0, 0), only(1, 20)).unwrap();

        let event = |time_of_day, value| Some(DayEvent { time_of_day, value });

        assert_eq!(day.first_time_point(1), event(hms(9, 0, 0), 10));
        assert_eq!(day.last_time_point(0), event(hms(12, 0, 0), 2));
        assert_eq!(day.current_time_point(0, hms(11, 0, 0)), event(hms(6, 0, 0), 1));
        assert_eq!(day.current_time_point(1, hms(18, 0, 0)), event(hms(18, 0, 0), 20));
        assert_eq!(day.next_time_point(0, hms(6, 0, 0)), event(hms(12, 0, 0), 2));
        assert_eq!(day.next_time_point(1, hms(18, 0, 0)), None);
        assert_eq!(day.current_time_point(1, hms(8, 0, 0)), None);
        assert_eq!(day.first_time_point(3), None);
        assert_eq!(day.first_time_point(7), None);
    }

    #[test]
    fn finds_events_within_single_day() {
        let week = monday_schedule();
        let at = |seconds| WeekTime::new(DayOfWeek::Monday, seconds);

        let current = week.find_current_time_point(0, at(5000), DaySearch::OnlyThisDay);
        assert_eq!(current.map(|event| event.value), Some(1));

        let current = week.find_current_time_point(0, at(20000), DaySearch::OnlyThisDay);
        assert_eq!(current.map(|event| event.value), Some(3));

        let next = week.find_next_time_point(0, at(5000), DaySearch::OnlyThisDay);
        assert_eq!(next.map(|event| event.value), Some(2));

        assert_eq!(week.find_next_time_point(0, at(20000), DaySearch::OnlyThisDay), None);
        assert_eq!(week.find_current_time_point(0, at(1000), DaySearch::OnlyThisDay), None);
    }

    #[test]
    fn current_wraps_back_to_previous_day() {
        let mut week = TestWeek::new();
        week.insert_time_point(DayOfWeek::Monday, hms(1, 0, 0), only(0, 7))
            .unwrap();

        let tuesday = WeekTime::new(DayOfWeek::Tuesday, hms(0, 30, 0));
        let current = week.find_current_time_point(0, tuesday, DaySearch::AllDays);

        assert_eq!(
            current,
            Some(ChannelEvent {
                time_of_week: SECONDS_PER_DAY + hms(1, 0, 0),
                value: 7,
            })
        );
        assert_eq!(week.find_current_time_point(0, tuesday, DaySearch::OnlyThisDay), None);
    }

    #[test]
    fn searches_straddle_week_boundary() {
        let mut week = TestWeek::new();
        week.insert_time_point(DayOfWeek::Saturday, hms(23, 50, 0), only(2, 40))
            .unwrap();
        week.insert_time_point(DayOfWeek::Sunday, hms(8, 0, 0), only(2, 50))
            .unwrap();

        let sunday_night = WeekTime::new(DayOfWeek::Sunday, hms(0, 10, 0));
        let current = week.find_current_time_point(2, sunday_night, DaySearch::AllDays);
        assert_eq!(
            current,
            Some(ChannelEvent {
                time_of_week: 6 * SECONDS_PER_DAY + hms(23, 50, 0),
                value: 40,
            })
        );

        let saturday_late = WeekTime::new(DayOfWeek::Saturday, hms(23, 55, 0));
        let next = week.find_next_time_point(2, saturday_late, DaySearch::AllDays);
        assert_eq!(
            next,
            Some(ChannelEvent {
                time_of_week: hms(8, 0, 0),
                value: 50,
            })
        );
    }

    #[test]
    fn single_event_is_both_current_and_next() {
        let mut week = TestWeek::new();
        week.insert_time_point(DayOfWeek::Wednesday, hms(12, 0, 0), only(0, 3))
            .unwrap();

        let now = WeekTime::new(DayOfWeek::Wednesday, hms(13, 0, 0));
        let status = week.current_event_status(now, DaySearch::AllDays);
        let expected = Some(ChannelEvent {
            time_of_week: 3 * SECONDS_PER_DAY + hms(12, 0, 0),
            value: 3,
        });

        assert_eq!(status.current[0], expected);
        assert_eq!(status.next[0], expected);
        assert_eq!(status.current[1], None);
        assert_eq!(status.next[3], None);
    }

    #[test]
    fn rebuilds_from_flat_entries() {
        let mut week = TestWeek::new();
        week.insert_time_point(DayOfWeek::Friday, hms(7, 0, 0), [Some(1), None, Some(3), None])
            .unwrap();
        week.insert_time_point(DayOfWeek::Sunday, hms(22, 15, 0), only(3, 9))
            .unwrap();

        let entries = week.entries();
        assert_eq!(
            entries,
            vec![
                ScheduleEntry {
                    day: DayOfWeek::Sunday,
                    time_of_day: hms(22, 15, 0),
                    channel: 3,
                    value: 9,
                },
                ScheduleEntry {
                    day: DayOfWeek::Friday,
                    time_of_day: hms(7, 0, 0),
                    channel: 0,
                    value: 1,
                },
                ScheduleEntry {
                    day: DayOfWeek::Friday,
                    time_of_day: hms(7, 0, 0),
                    channel: 2,
                    value: 3,
                },
            ]
        );

        assert_eq!(TestWeek::from_entries(entries).unwrap(), week);
    }

    #[test]
    fn from_entries_rejects_unknown_channel() {
        let result = TestWeek::from_entries([ScheduleEntry {
            day: DayOfWeek::Monday,
            time_of_day: 0,
            channel: 4,
            value: 1,
        }]);

        let err = result.unwrap_err();
        assert_eq!(err.kind(), &ScheduleError::InvalidChannel(4));
    }
}
