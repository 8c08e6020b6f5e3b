use std::time::Duration;

use serde::{Deserialize, Serialize};

use crate::{
    sample::SampleContainerSettings,
    task_pool::{TaskPoolTiming, DEFAULT_IDLE_WAIT, DEFAULT_MAX_WAIT},
    tracker::TransitionMode,
};

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
#[serde(default)]
pub struct TaskPoolConfig {
    pub idle_wait_ms: u64,
    pub max_wait_ms: u64,
}

impl Default for TaskPoolConfig {
    fn default() -> Self {
        Self {
            idle_wait_ms: DEFAULT_IDLE_WAIT.as_millis() as u64,
            max_wait_ms: DEFAULT_MAX_WAIT.as_millis() as u64,
        }
    }
}

impl TaskPoolConfig {
    pub fn timing(&self) -> TaskPoolTiming {
        TaskPoolTiming {
            idle_wait: Duration::from_millis(self.idle_wait_ms),
            max_wait: Duration::from_millis(self.max_wait_ms),
        }
    }

    pub fn sanitize(&mut self) {
        self.max_wait_ms = self.max_wait_ms.clamp(100, 60_000);
        self.idle_wait_ms = self.idle_wait_ms.clamp(10, self.max_wait_ms);
    }
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(default)]
pub struct SensorConfig {
    pub enabled: bool,
    pub interval_ms: u64,
    pub sample: SampleContainerSettings,
}

impl Default for SensorConfig {
    fn default() -> Self {
        Self {
            enabled: true,
            interval_ms: 5_000,
            sample: SampleContainerSettings::default(),
        }
    }
}

impl SensorConfig {
    pub fn interval(&self) -> Duration {
        Duration::from_millis(self.interval_ms)
    }

    pub fn sanitize(&mut self) {
        self.interval_ms = self.interval_ms.clamp(100, 3_600_000);
        self.sample.sanitize();
    }
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(default)]
pub struct ScheduleConfig {
    pub interval_ms: u64,
    pub transition: TransitionMode,
    pub channel_names: Vec<String>,
    pub state_save_interval_ms: u64,
}

impl Default for ScheduleConfig {
    fn default() -> Self {
        Self {
            interval_ms: 5_000,
            transition: TransitionMode::Interpolation,
            channel_names: ["white", "blue", "red", "uv"]
                .into_iter()
                .map(str::to_string)
                .collect(),
            state_save_interval_ms: 60_000,
        }
    }
}

impl ScheduleConfig {
    pub fn interval(&self) -> Duration {
        Duration::from_millis(self.interval_ms)
    }

    pub fn sanitize(&mut self, channels: usize) {
        self.interval_ms = self.interval_ms.clamp(100, 3_600_000);
        self.state_save_interval_ms = self.state_save_interval_ms.max(1_000);
        self.channel_names.truncate(channels);
        while self.channel_names.len() < channels {
            self.channel_names
                .push(format!("channel{}", self.channel_names.len()));
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct RuntimeConfig {
    pub timezone: String,
    pub http_port: u16,
    #[serde(default)]
    pub task_pool: TaskPoolConfig,
    #[serde(default)]
    pub temperature: SensorConfig,
    #[serde(default = "default_scale")]
    pub scale: SensorConfig,
    #[serde(default)]
    pub schedule: ScheduleConfig,
}

fn default_scale() -> SensorConfig {
    SensorConfig {
        interval_ms: 1_000,
        sample: SampleContainerSettings {
            min_rate_of_change: 1.0,
            ..SampleContainerSettings::default()
        },
        ..SensorConfig::default()
    }
}

impl Default for RuntimeConfig {
    fn default() -> Self {
        Self {
            timezone: "Europe/Berlin".to_string(),
            http_port: 8080,
            task_pool: TaskPoolConfig::default(),
            temperature: SensorConfig::default(),
            scale: default_scale(),
            schedule: ScheduleConfig::default(),
        }
    }
}

impl RuntimeConfig {
    /// Clamps every field into its usable range. `channels` is the number of
    /// schedule output channels the host drives.
    pub fn sanitize(&mut self, channels: usize) {
        if self.timezone.trim().is_empty() {
            self.timezone = Self::default().timezone;
        }
        if self.http_port == 0 {
            self.http_port = Self::default().http_port;
        }
        self.task_pool.sanitize();
        self.temperature.sanitize();
        self.scale.sanitize();
        self.schedule.sanitize(channels);
    }
}
