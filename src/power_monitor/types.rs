use std::fmt;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use super::config::MonitorConfig;
use super::error::{EngineError, Result};

pub const MIN_BOARD_SAMPLES: usize = 10;

pub const PHASE_CORRECTION_MIN: f64 = 0.0;
pub const PHASE_CORRECTION_MAX: f64 = 2.0;

/// Identifier of one CT input on the board.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Default, Serialize, Deserialize)]
#[serde(transparent)]
pub struct Channel(pub u8);

impl fmt::Display for Channel {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "ct{}", self.0)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ChannelRole {
    #[default]
    Consumption,
    Production,
}

impl ChannelRole {
    pub fn as_str(&self) -> &'static str {
        match self {
            ChannelRole::Consumption => "consumption",
            ChannelRole::Production => "production",
        }
    }
}

fn default_unity() -> f64 {
    1.0
}

/// Static calibration record of one CT input.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ChannelConfig {
    pub id: Channel,
    #[serde(default = "default_unity")]
    pub phase_correction: f64, // Fractional-sample shift factor, 1.0 leaves the voltage untouched
    #[serde(default = "default_unity")]
    pub accuracy_factor: f64, // Multiplicative trim applied after scaling
    #[serde(default)]
    pub role: ChannelRole,
}

impl ChannelConfig {
    pub fn new(id: u8) -> Self {
        Self {
            id: Channel(id),
            phase_correction: 1.0,
            accuracy_factor: 1.0,
            role: ChannelRole::Consumption,
        }
    }
}

/// Per-channel scale into amps. Derived per batch, never stored.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct ChannelScale {
    pub channel: Channel,
    pub ct_scale: f64,
}

/// Scale factors shared by every channel of one batch.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct BatchScales {
    pub board_voltage: f64,
    pub v_ref: f64,   // Volts per ADC code
    pub v_scale: f64, // ADC code to grid volts
}

/// One round-robin capture: a current sequence per channel plus the shared voltage sequence.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RawSampleBatch {
    currents: Vec<Vec<i32>>,
    voltage: Vec<i32>,
    captured_at: DateTime<Utc>,
}

impl RawSampleBatch {
    pub fn new(currents: Vec<Vec<i32>>, voltage: Vec<i32>, captured_at: DateTime<Utc>) -> Result<Self> {
        let batch = Self {
            currents,
            voltage,
            captured_at,
        };
        batch.validate()?;
        Ok(batch)
    }

    /*
     * @brief Check the batch invariants.
     * @note Deserialized batches bypass `new`, so captures call this after loading.
     */
    pub fn validate(&self) -> Result<()> {
        if self.voltage.is_empty() {
            return Err(EngineError::InvalidInput("batch holds no voltage samples".into()));
        }
        for (index, current) in self.currents.iter().enumerate() {
            if current.len() != self.voltage.len() {
                return Err(EngineError::InvalidInput(format!(
                    "current sequence {} holds {} samples, voltage holds {}",
                    index,
                    current.len(),
                    self.voltage.len()
                )));
            }
        }
        Ok(())
    }

    pub fn len(&self) -> usize {
        self.voltage.len()
    }

    pub fn is_empty(&self) -> bool {
        self.voltage.is_empty()
    }

    pub fn channel_count(&self) -> usize {
        self.currents.len()
    }

    pub fn current(&self, index: usize) -> Option<&[i32]> {
        self.currents.get(index).map(Vec::as_slice)
    }

    pub fn voltage(&self) -> &[i32] {
        &self.voltage
    }

    pub fn captured_at(&self) -> DateTime<Utc> {
        self.captured_at
    }

    pub fn restamped(mut self, captured_at: DateTime<Utc>) -> Self {
        self.captured_at = captured_at;
        self
    }

    /// Keep only the first `size` samples of every sequence.
    pub fn truncated(mut self, size: usize) -> Self {
        self.voltage.truncate(size);
        for current in self.currents.iter_mut() {
            current.truncate(size);
        }
        self
    }
}

/// Current sequence of one channel paired with the voltage rebuilt for it.
#[derive(Debug, Clone, PartialEq)]
pub struct ReconstructedWaveform<'a> {
    pub channel: Channel,
    pub current: &'a [i32],
    pub voltage: Vec<f64>,
}

#[derive(Debug, Clone, Copy, PartialEq, Default, Serialize, Deserialize)]
pub struct PowerResult {
    pub real_power: f64,  // Watts, negative when the channel exports
    pub rms_current: f64, // Amps
    pub rms_voltage: f64, // Volts
    pub power_factor: f64,
}

impl PowerResult {
    pub fn apparent_power(&self) -> f64 {
        self.rms_voltage * self.rms_current
    }
}

#[derive(Debug, Clone, Copy, PartialEq)]
pub struct ChannelResult {
    pub channel: Channel,
    pub role: ChannelRole,
    pub power: PowerResult,
}

/// Everything computed from one batch, in channel-table order.
#[derive(Debug, Clone, PartialEq)]
pub struct BatchResults {
    pub captured_at: DateTime<Utc>,
    pub scales: BatchScales,
    pub channels: Vec<ChannelResult>,
}

impl BatchResults {
    pub fn channel(&self, channel: Channel) -> Option<&ChannelResult> {
        self.channels.iter().find(|result| result.channel == channel)
    }

    /// RMS voltage seen by the first channel, reported as the board's voltage input 0.
    pub fn voltage(&self) -> f64 {
        self.channels.first().map(|c| c.power.rms_voltage).unwrap_or(0.0)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum NetStatus {
    Producing,
    Consuming,
    NoData,
}

impl NetStatus {
    pub fn from_power(power: f64) -> Self {
        if power < 0.0 {
            NetStatus::Producing
        } else if power > 0.0 {
            NetStatus::Consuming
        } else {
            NetStatus::NoData
        }
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            NetStatus::Producing => "Producing",
            NetStatus::Consuming => "Consuming",
            NetStatus::NoData => "No data",
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Default, Serialize, Deserialize)]
pub struct ChannelAverage {
    pub channel: Channel,
    pub role: ChannelRole,
    pub real_power: f64,
    pub rms_current: f64,
    pub power_factor: f64,
}

#[derive(Debug, Clone, Copy, PartialEq, Default, Serialize, Deserialize)]
pub struct Totals {
    pub power: f64,
    pub current: f64,
}

#[derive(Debug, Clone, Copy, PartialEq, Default, Serialize, Deserialize)]
pub struct ProductionTotals {
    pub power: f64,
    pub current: f64,
    pub power_factor: f64,
}

/// Window average handed to the persistence collaborator.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct AggregatedRecord {
    pub captured_at: DateTime<Utc>,
    pub batches: usize,
    pub channels: Vec<ChannelAverage>,
    pub voltage: f64,
    pub home_consumption: Totals,
    pub production: ProductionTotals,
    pub net: Totals,
    pub net_status: NetStatus,
}

/// The power engine: a channel-calibration table plus the board constants it scales with.
#[derive(Debug, Clone)]
pub struct PowerMonitor {
    pub config: MonitorConfig,
}
