use thiserror::Error;

use crate::time::DayOfWeek;

#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum ScheduleError {
    #[error("no free time point slot left")]
    DayFull,
    #[error("a time point already exists at {0}s")]
    DuplicateTime(u32),
    #[error("no time point at {0}s")]
    TimeNotFound(u32),
    #[error("time of day {0}s is outside of a day")]
    InvalidTime(u32),
    #[error("channel {0} does not exist")]
    InvalidChannel(usize),
    #[error("{day:?}: {source}")]
    Day {
        day: DayOfWeek,
        #[source]
        source: Box<ScheduleError>,
    },
}

impl ScheduleError {
    pub(crate) fn on_day(self, day: DayOfWeek) -> Self {
        match self {
            Self::Day { .. } => self,
            other => Self::Day {
                day,
                source: Box::new(other),
            },
        }
    }

    /// The underlying failure, without the day it happened on.
    pub fn kind(&self) -> &ScheduleError {
        match self {
            Self::Day { source, .. } => source.kind(),
            other => other,
        }
    }
}
