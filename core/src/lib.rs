pub mod config;
pub mod error;
pub mod sample;
pub mod schedule;
pub mod slots;
pub mod task_pool;
pub mod time;
pub mod tracker;

pub use config::{RuntimeConfig, ScheduleConfig, SensorConfig, TaskPoolConfig};
pub use error::ScheduleError;
pub use sample::{SampleContainer, SampleContainerSettings, SampleValue};
pub use schedule::{
    ChannelEvent, DayEvent, DaySchedule, DaySearch, EventStatus, ScheduleEntry, TimePoint,
    WeekSchedule,
};
pub use slots::OptionalSlots;
pub use task_pool::{
    TaskDescription, TaskHandle, TaskId, TaskInfo, TaskPool, TaskPoolTiming, TaskPoolWorker,
};
pub use time::{DayOfWeek, WeekTime};
pub use tracker::{ChannelValue, ScheduleTracker, TransitionMode};
