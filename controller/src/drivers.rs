use std::{
    f32::consts::TAU,
    time::{Duration, Instant},
};

use serde::Serialize;
use thiserror::Error;
use tracing::{debug, info, warn};

use smartaq_core::{
    DayOfWeek, SampleContainer, SampleContainerSettings, ScheduleError, ScheduleTracker,
    TransitionMode, WeekSchedule, WeekTime,
};

pub const OUTPUT_CHANNELS: usize = 4;
pub const TIME_POINTS_PER_DAY: usize = 12;

pub type LightSchedule = WeekSchedule<f32, OUTPUT_CHANNELS, TIME_POINTS_PER_DAY>;
pub type LightTracker = ScheduleTracker<OUTPUT_CHANNELS>;

#[derive(Debug, Error, PartialEq)]
pub enum DriverError {
    #[error("{device} rejected outlier reading {value}")]
    OutlierRejected { device: &'static str, value: f32 },
    #[error("local time is not available yet")]
    NoClock,
    #[error("output channel {0} does not exist")]
    InvalidChannel(usize),
}

/// Point in time a driver update runs at.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Tick {
    pub at: Instant,
    /// Wall clock position in the week; `None` until the clock is set.
    pub local_time: Option<WeekTime>,
}

/// Hardware that produces raw readings.
pub trait ReadingSource<T>: Send {
    fn read(&mut self, at: Instant) -> Result<T, DriverError>;
}

/// Hardware that takes channel values.
pub trait OutputSink: Send {
    fn apply(&mut self, channel: usize, value: f32) -> Result<(), DriverError>;
}

pub trait Driver {
    fn update(&mut self, tick: &Tick) -> Result<(), DriverError>;
    fn read(&self) -> DeviceReading;
}

/// Sine wave standing in for a real sensor, with an optional spike every
/// `spike_every` readings.
#[derive(Debug, Clone)]
pub struct Waveform {
    pub base: f32,
    pub amplitude: f32,
    pub period: Duration,
    pub spike_every: Option<u32>,
    pub spike: f32,
    started: Instant,
    reads: u32,
}

impl Waveform {
    pub fn new(base: f32, amplitude: f32, period: Duration) -> Self {
        Self {
            base,
            amplitude,
            period,
            spike_every: None,
            spike: 0.0,
            started: Instant::now(),
            reads: 0,
        }
    }

    pub fn with_spikes(mut self, every: u32, spike: f32) -> Self {
        self.spike_every = Some(every).filter(|every| *every > 0);
        self.spike = spike;
        self
    }

    fn sample(&mut self, at: Instant) -> f32 {
        self.reads = self.reads.wrapping_add(1);

        let period = self.period.as_secs_f32();
        let phase = if period > 0.0 {
            at.saturating_duration_since(self.started).as_secs_f32() / period
        } else {
            0.0
        };
        let value = self.base + self.amplitude * (TAU * phase).sin();

        match self.spike_every {
            Some(every) if self.reads % every == 0 => value + self.spike,
            _ => value,
        }
    }
}

impl ReadingSource<f32> for Waveform {
    fn read(&mut self, at: Instant) -> Result<f32, DriverError> {
        Ok(self.sample(at))
    }
}

impl ReadingSource<i32> for Waveform {
    fn read(&mut self, at: Instant) -> Result<i32, DriverError> {
        Ok(self.sample(at).round() as i32)
    }
}

/// PWM outputs kept in memory, duty cycle in percent.
#[derive(Debug, Clone, Default)]
pub struct SimulatedPwm {
    duty: [Option<f32>; OUTPUT_CHANNELS],
}

impl SimulatedPwm {
    pub fn duty(&self) -> &[Option<f32>; OUTPUT_CHANNELS] {
        &self.duty
    }
}

impl OutputSink for SimulatedPwm {
    fn apply(&mut self, channel: usize, value: f32) -> Result<(), DriverError> {
        let slot = self
            .duty
            .get_mut(channel)
            .ok_or(DriverError::InvalidChannel(channel))?;
        *slot = Some(value.clamp(0.0, 100.0));
        Ok(())
    }
}

#[derive(Debug, Clone, Serialize, PartialEq)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum DeviceReading {
    Temperature {
        celsius: Option<f32>,
        #[serde(rename = "stdDeviation")]
        std_deviation: f32,
        samples: usize,
    },
    Weight {
        grams: Option<f32>,
        raw: Option<i32>,
        samples: usize,
    },
    Outputs {
        mode: TransitionMode,
        channels: Vec<ChannelOutput>,
    },
}

#[derive(Debug, Clone, Serialize, PartialEq)]
pub struct ChannelOutput {
    pub name: String,
    pub value: Option<f32>,
    #[serde(rename = "lastApplied")]
    pub last_applied: Option<u32>,
}

pub struct TemperatureProbe {
    source: Box<dyn ReadingSource<f32>>,
    samples: SampleContainer<f32>,
}

impl TemperatureProbe {
    pub fn new(source: impl ReadingSource<f32> + 'static, settings: SampleContainerSettings) -> Self {
        Self {
            source: Box::new(source),
            samples: SampleContainer::with_settings(settings),
        }
    }
}

impl Driver for TemperatureProbe {
    fn update(&mut self, tick: &Tick) -> Result<(), DriverError> {
        let value = self.source.read(tick.at)?;
        if !self.samples.put_sample(value, tick.at) {
            return Err(DriverError::OutlierRejected {
                device: "temperature",
                value,
            });
        }
        debug!("temperature {value:.2}C, average {:.2}C", self.samples.average());
        Ok(())
    }

    fn read(&self) -> DeviceReading {
        DeviceReading::Temperature {
            celsius: (!self.samples.is_empty()).then(|| self.samples.average()),
            std_deviation: self.samples.std_deviation(),
            samples: self.samples.size(),
        }
    }
}

/// Raw load cell counts to grams: `(raw - offset) / scale`.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct ScaleCalibration {
    pub offset: i32,
    pub scale: f32,
}

impl Default for ScaleCalibration {
    fn default() -> Self {
        Self {
            offset: 0,
            scale: 1.0,
        }
    }
}

impl ScaleCalibration {
    pub fn to_grams(&self, raw: f32) -> f32 {
        if self.scale == 0.0 {
            return 0.0;
        }
        (raw - self.offset as f32) / self.scale
    }
}

pub struct LoadCell {
    source: Box<dyn ReadingSource<i32>>,
    calibration: ScaleCalibration,
    samples: SampleContainer<i32>,
}

impl LoadCell {
    pub fn new(
        source: impl ReadingSource<i32> + 'static,
        calibration: ScaleCalibration,
        settings: SampleContainerSettings,
    ) -> Self {
        Self {
            source: Box::new(source),
            calibration,
            samples: SampleContainer::with_settings(settings),
        }
    }
}

impl Driver for LoadCell {
    fn update(&mut self, tick: &Tick) -> Result<(), DriverError> {
        let raw = self.source.read(tick.at)?;
        if !self.samples.put_sample(raw, tick.at) {
            return Err(DriverError::OutlierRejected {
                device: "scale",
                value: raw as f32,
            });
        }
        debug!(
            "scale raw {raw}, {:.1}g",
            self.calibration.to_grams(self.samples.average())
        );
        Ok(())
    }

    fn read(&self) -> DeviceReading {
        DeviceReading::Weight {
            grams: (!self.samples.is_empty())
                .then(|| self.calibration.to_grams(self.samples.average())),
            raw: self.samples.last(),
            samples: self.samples.size(),
        }
    }
}

pub struct ScheduledOutputs {
    schedule: LightSchedule,
    tracker: LightTracker,
    sink: Box<dyn OutputSink>,
    channel_names: Vec<String>,
    applied: [Option<f32>; OUTPUT_CHANNELS],
    state_dirty: bool,
}

impl ScheduledOutputs {
    pub fn new(
        schedule: LightSchedule,
        mode: TransitionMode,
        sink: impl OutputSink + 'static,
        channel_names: Vec<String>,
    ) -> Self {
        Self {
            schedule,
            tracker: LightTracker::new(mode),
            sink: Box::new(sink),
            channel_names,
            applied: [None; OUTPUT_CHANNELS],
            state_dirty: false,
        }
    }

    pub fn schedule(&self) -> &LightSchedule {
        &self.schedule
    }

    pub fn replace_schedule(&mut self, schedule: LightSchedule) {
        info!("schedule replaced");
        self.schedule = schedule;
    }

    pub fn insert_time_point(
        &mut self,
        day: DayOfWeek,
        time_of_day: u32,
        channels: [Option<f32>; OUTPUT_CHANNELS],
    ) -> Result<(), ScheduleError> {
        self.schedule.insert_time_point(day, time_of_day, channels)
    }

    pub fn remove_time_point(&mut self, day: DayOfWeek, time_of_day: u32) -> Result<(), ScheduleError> {
        self.schedule.remove_time_point(day, time_of_day)
    }

    pub fn mode(&self) -> TransitionMode {
        self.tracker.mode()
    }

    pub fn set_mode(&mut self, mode: TransitionMode) {
        self.tracker.set_mode(mode);
    }

    pub fn channel_times(&self) -> Vec<Option<u32>> {
        self.tracker.channel_times().to_vec()
    }

    pub fn restore_channel_times(&mut self, times: &[Option<u32>]) {
        self.tracker.set_channel_times(times);
    }

    /// Channel times changed since the last call, if any.
    pub fn take_dirty_channel_times(&mut self) -> Option<Vec<Option<u32>>> {
        if !std::mem::take(&mut self.state_dirty) {
            return None;
        }
        Some(self.channel_times())
    }
}

impl Driver for ScheduledOutputs {
    fn update(&mut self, tick: &Tick) -> Result<(), DriverError> {
        let now = tick.local_time.ok_or(DriverError::NoClock)?;
        let values = self.tracker.current_channel_values(&self.schedule, now);

        for (channel, value) in values.into_iter().enumerate() {
            let Some(value) = value else {
                continue;
            };

            if let Err(err) = self.sink.apply(channel, value) {
                warn!("failed to apply {value} to channel {channel}: {err}");
                continue;
            }

            debug!("channel {channel} set to {value}");
            self.applied[channel] = Some(value);
            self.tracker.update_channel_time(channel, now);
            self.state_dirty = true;
        }

        Ok(())
    }

    fn read(&self) -> DeviceReading {
        let times = self.tracker.channel_times();
        let channels = (0..OUTPUT_CHANNELS)
            .map(|channel| ChannelOutput {
                name: self
                    .channel_names
                    .get(channel)
                    .cloned()
                    .unwrap_or_else(|| format!("channel{channel}")),
                value: self.applied[channel],
                last_applied: times[channel],
            })
            .collect();

        DeviceReading::Outputs {
            mode: self.tracker.mode(),
            channels,
        }
    }
}

pub enum Device {
    TemperatureProbe(TemperatureProbe),
    Scale(LoadCell),
    ScheduledOutputs(ScheduledOutputs),
}

impl Device {
    pub fn name(&self) -> &'static str {
        match self {
            Self::TemperatureProbe(_) => "temperature",
            Self::Scale(_) => "scale",
            Self::ScheduledOutputs(_) => "lights",
        }
    }

    pub fn as_outputs(&self) -> Option<&ScheduledOutputs> {
        match self {
            Self::ScheduledOutputs(outputs) => Some(outputs),
            _ => None,
        }
    }

    pub fn as_outputs_mut(&mut self) -> Option<&mut ScheduledOutputs> {
        match self {
            Self::ScheduledOutputs(outputs) => Some(outputs),
            _ => None,
        }
    }
}

impl Driver for Device {
    fn update(&mut self, tick: &Tick) -> Result<(), DriverError> {
        match self {
            Self::TemperatureProbe(driver) => driver.update(tick),
            Self::Scale(driver) => driver.update(tick),
            Self::ScheduledOutputs(driver) => driver.update(tick),
        }
    }

    fn read(&self) -> DeviceReading {
        match self {
            Self::TemperatureProbe(driver) => driver.read(),
            Self::Scale(driver) => driver.read(),
            Self::ScheduledOutputs(driver) => driver.read(),
        }
    }
}
