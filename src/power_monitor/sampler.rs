use chrono::Utc;

use super::config::AdcConfig;
use super::error::{EngineError, Result};
use super::types::{RawSampleBatch, MIN_BOARD_SAMPLES};

/// Source of synchronized raw captures. Reading blocks until the whole batch is in.
pub trait Sampler {
    fn read_batch(&mut self, size: usize) -> Result<RawSampleBatch>;
}

/// Averaged reading of the board supply.
pub trait BoardVoltageSensor {
    fn read(&mut self) -> Result<f64>;
}

impl<S: Sampler + ?Sized> Sampler for &mut S {
    fn read_batch(&mut self, size: usize) -> Result<RawSampleBatch> {
        (**self).read_batch(size)
    }
}

impl<B: BoardVoltageSensor + ?Sized> BoardVoltageSensor for &mut B {
    fn read(&mut self) -> Result<f64> {
        (**self).read()
    }
}

impl<S: Sampler + ?Sized> Sampler for Box<S> {
    fn read_batch(&mut self, size: usize) -> Result<RawSampleBatch> {
        (**self).read_batch(size)
    }
}

impl<B: BoardVoltageSensor + ?Sized> BoardVoltageSensor for Box<B> {
    fn read(&mut self) -> Result<f64> {
        (**self).read()
    }
}

/*
* @brief Board voltage from raw readings of the reference channel.
* @param readings Raw codes, at least MIN_BOARD_SAMPLES of them
* @param adc ADC constants of the board
* @return Board supply voltage in volts
*/
pub fn board_voltage_from_readings(readings: &[i32], adc: &AdcConfig) -> Result<f64> {
    if readings.len() < MIN_BOARD_SAMPLES {
        return Err(EngineError::Acquisition(format!(
            "board voltage needs {} readings, got {}",
            MIN_BOARD_SAMPLES,
            readings.len()
        )));
    }

    let average = readings.iter().map(|&r| r as f64).sum::<f64>() / readings.len() as f64;

    Ok((average / adc.full_scale) * adc.board_reference_voltage * adc.board_divider)
}

/// Board voltage known up front, e.g. stored alongside a capture.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct FixedBoardVoltage(pub f64);

impl BoardVoltageSensor for FixedBoardVoltage {
    fn read(&mut self) -> Result<f64> {
        Ok(self.0)
    }
}

/// Plays captured batches back in a loop.
pub struct ReplaySampler {
    batches: Vec<RawSampleBatch>,
    next: usize,
}

impl ReplaySampler {
    pub fn new(batches: Vec<RawSampleBatch>) -> Result<Self> {
        if batches.is_empty() {
            return Err(EngineError::InvalidInput("nothing to replay".into()));
        }
        for batch in &batches {
            batch.validate()?;
        }

        Ok(Self { batches, next: 0 })
    }
}

impl Sampler for ReplaySampler {
    fn read_batch(&mut self, size: usize) -> Result<RawSampleBatch> {
        let batch = &self.batches[self.next];
        self.next = (self.next + 1) % self.batches.len();

        if size > batch.len() {
            return Err(EngineError::Acquisition(format!(
                "capture holds {} samples per channel, {} requested",
                batch.len(),
                size
            )));
        }

        Ok(batch.clone().truncated(size).restamped(Utc::now()))
    }
}
