use std::time::Instant;

use heapless::Deque;
use serde::{Deserialize, Serialize};
use tracing::{debug, warn};

pub trait SampleValue: Copy + PartialEq + std::fmt::Debug {
    fn to_f32(self) -> f32;
}

macro_rules! impl_sample_value {
    ($($ty:ty),*) => {
        $(
            impl SampleValue for $ty {
                fn to_f32(self) -> f32 {
                    self as f32
                }
            }
        )*
    };
}

impl_sample_value!(f32, f64, i16, i32, u16, u32);

#[derive(Debug, Clone, Copy, PartialEq)]
pub struct Sample<T> {
    pub value: T,
    pub timestamp: Instant,
}

pub const DEFAULT_MIN_RATE_OF_CHANGE: f32 = 0.1;

/// Outlier filter tuning.
///
/// The accepted rate of change (units per second) is either the fixed
/// `max_rate_of_change` or, when that is unset, learned from the stored
/// samples as `rate_multiplier * mean_rate` but never below
/// `min_rate_of_change`. The floor keeps a flat history from rejecting
/// every later change.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct SampleContainerSettings {
    pub max_rate_of_change: Option<f32>,
    pub rate_multiplier: f32,
    pub min_rate_of_change: f32,
    /// Consecutive rejections after which the next sample reseeds the
    /// container. Zero disables reseeding.
    pub max_consecutive_rejections: u32,
}

impl Default for SampleContainerSettings {
    fn default() -> Self {
        Self {
            max_rate_of_change: None,
            rate_multiplier: 2.0,
            min_rate_of_change: DEFAULT_MIN_RATE_OF_CHANGE,
            max_consecutive_rejections: 10,
        }
    }
}

impl SampleContainerSettings {
    pub fn fixed(max_rate_of_change: f32) -> Self {
        Self {
            max_rate_of_change: Some(max_rate_of_change),
            ..Self::default()
        }
    }

    pub fn sanitize(&mut self) {
        self.max_rate_of_change = self
            .max_rate_of_change
            .filter(|rate| rate.is_finite() && *rate >= 0.0);

        if !self.rate_multiplier.is_finite() || self.rate_multiplier < 1.0 {
            self.rate_multiplier = 1.0;
        }

        if !self.min_rate_of_change.is_finite() || self.min_rate_of_change < 0.0 {
            self.min_rate_of_change = 0.0;
        }
    }
}

/// Ring of the last `N` accepted samples with running statistics.
///
/// Not synchronized; share it behind a lock.
#[derive(Debug, Clone)]
pub struct SampleContainer<T, const N: usize = 10> {
    settings: SampleContainerSettings,
    samples: Deque<Sample<T>, N>,
    average: f32,
    variance: f32,
    mean_rate_of_change: f32,
    consecutive_rejections: u32,
}

impl<T: SampleValue, const N: usize> Default for SampleContainer<T, N> {
    fn default() -> Self {
        Self::new()
    }
}

impl<T: SampleValue, const N: usize> SampleContainer<T, N> {
    pub fn new() -> Self {
        Self::with_settings(SampleContainerSettings::default())
    }

    pub fn with_settings(mut settings: SampleContainerSettings) -> Self {
        settings.sanitize();
        Self {
            settings,
            samples: Deque::new(),
            average: 0.0,
            variance: 0.0,
            mean_rate_of_change: 0.0,
            consecutive_rejections: 0,
        }
    }

    pub fn settings(&self) -> &SampleContainerSettings {
        &self.settings
    }

    /// Offers a reading. Returns `false` when it was rejected as an outlier,
    /// in which case nothing observable changes.
    pub fn put_sample(&mut self, value: T, timestamp: Instant) -> bool {
        if !value.to_f32().is_finite() {
            warn!("dropping non-finite sample {value:?}");
            return false;
        }

        let sample = Sample { value, timestamp };

        if self.accepts(&sample) {
            self.consecutive_rejections = 0;
            self.push(sample);
            self.recalculate();
            return true;
        }

        let limit = self.settings.max_consecutive_rejections;
        if limit > 0 && self.consecutive_rejections >= limit {
            debug!(
                "{} consecutive samples rejected, reseeding with {value:?}",
                self.consecutive_rejections
            );
            self.samples.clear();
            self.consecutive_rejections = 0;
            self.push(sample);
            self.recalculate();
            return true;
        }

        self.consecutive_rejections += 1;
        debug!(
            "rejected sample {value:?}: rate exceeds {} per second",
            self.max_rate_of_change()
        );
        false
    }

    pub fn average(&self) -> f32 {
        self.average
    }

    /// Sample variance (`n - 1` denominator); zero for fewer than two samples.
    pub fn variance(&self) -> f32 {
        self.variance
    }

    pub fn std_deviation(&self) -> f32 {
        self.variance.sqrt()
    }

    pub fn last(&self) -> Option<T> {
        self.samples.back().map(|sample| sample.value)
    }

    pub fn last_timestamp(&self) -> Option<Instant> {
        self.samples.back().map(|sample| sample.timestamp)
    }

    pub fn size(&self) -> usize {
        self.samples.len()
    }

    pub fn is_empty(&self) -> bool {
        self.samples.is_empty()
    }

    pub const fn capacity(&self) -> usize {
        N
    }

    /// Highest rate of change (per second) the next sample may show.
    pub fn max_rate_of_change(&self) -> f32 {
        self.settings.max_rate_of_change.unwrap_or_else(|| {
            (self.mean_rate_of_change * self.settings.rate_multiplier)
                .max(self.settings.min_rate_of_change)
        })
    }

    fn warmup_len() -> usize {
        (N / 2).max(2)
    }

    fn accepts(&self, sample: &Sample<T>) -> bool {
        if self.samples.len() < Self::warmup_len() {
            return true;
        }

        let Some(last) = self.samples.back() else {
            return true;
        };

        let elapsed = seconds_between(sample.timestamp, last.timestamp);
        let rate = (sample.value.to_f32() - last.value.to_f32()).abs() / elapsed;

        rate <= self.max_rate_of_change()
    }

    fn push(&mut self, sample: Sample<T>) {
        if self.samples.is_full() {
            self.samples.pop_front();
        }
        // A slot is free at this point.
        let _ = self.samples.push_back(sample);
    }

    fn recalculate(&mut self) {
        let count = self.samples.len();
        if count == 0 {
            self.average = 0.0;
            self.variance = 0.0;
            self.mean_rate_of_change = 0.0;
            return;
        }

        let sum: f32 = self.samples.iter().map(|sample| sample.value.to_f32()).sum();
        self.average = sum / count as f32;

        if count < 2 {
            self.variance = 0.0;
            self.mean_rate_of_change = 0.0;
            return;
        }

        let squares: f32 = self
            .samples
            .iter()
            .map(|sample| {
                let delta = sample.value.to_f32() - self.average;
                delta * delta
            })
            .sum();
        self.variance = squares / (count - 1) as f32;

        let mut total_rate = 0.0_f32;
        let mut previous: Option<&Sample<T>> = None;
        for sample in self.samples.iter() {
            if let Some(previous) = previous {
                let elapsed = seconds_between(sample.timestamp, previous.timestamp);
                total_rate += (sample.value.to_f32() - previous.value.to_f32()).abs() / elapsed;
            }
            previous = Some(sample);
        }
        self.mean_rate_of_change = total_rate / (count - 1) as f32;
    }
}

/// Whole-second resolution with a one second floor, so bursts of readings
/// cannot inflate the rate.
fn seconds_between(lhs: Instant, rhs: Instant) -> f32 {
    let elapsed = if lhs >= rhs {
        lhs.duration_since(rhs)
    } else {
        rhs.duration_since(lhs)
    };
    elapsed.as_secs_f32().max(1.0)
}
