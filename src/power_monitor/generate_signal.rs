use chrono::Utc;
use ndarray::Array1;
use rand::rngs::ThreadRng;
use rand::Rng;
use std::f64::consts::PI;
use std::time::Duration;

use super::config::{AdcConfig, MonitorConfig, SimulationConfig};
use super::error::Result;
use super::sampler::{board_voltage_from_readings, BoardVoltageSensor, Sampler};
use super::types::{Channel, RawSampleBatch};

fn offset(deg: f64) -> f64 {
    deg * 2.0 * PI / 360.0
}

/// Synthetic round-robin capture of one voltage input and N CTs.
pub struct SimulatedSampler {
    sim: SimulationConfig,
    adc: AdcConfig,
    channels: Vec<Channel>,
    elapsed: usize, // Cycles already produced, keeps consecutive batches continuous
    rng: ThreadRng,
}

impl SimulatedSampler {
    pub fn new(config: &MonitorConfig) -> Self {
        let mut sim = config.simulation.clone();
        sim.voltage_slot = sim.voltage_slot.min(config.channels.len());

        Self {
            sim,
            adc: config.adc.clone(),
            channels: config.channels.iter().map(|c| c.id).collect(),
            elapsed: 0,
            rng: rand::thread_rng(),
        }
    }

    fn slots(&self) -> f64 {
        (self.channels.len() + 1) as f64
    }

    /// Read position of the channel inside one sampling cycle.
    fn slot(&self, index: usize) -> usize {
        if index < self.sim.voltage_slot {
            index
        } else {
            index + 1
        }
    }

    /*
    * @brief How far after the CT read the shared voltage read lands, in samples.
    * @param index Position of the channel in the table
    * @note Negative when the voltage is read first.
    */
    pub fn voltage_skew(&self, index: usize) -> f64 {
        (self.sim.voltage_slot as f64 - self.slot(index) as f64) / self.slots()
    }

    fn mid_code(&self) -> f64 {
        self.adc.full_scale / 2.0
    }

    fn to_code(&self, value: f64) -> i32 {
        value.round().clamp(0.0, self.adc.full_scale - 1.0) as i32
    }

    fn noise(&mut self) -> f64 {
        if self.sim.noise > 0.0 {
            self.rng.gen_range(-self.sim.noise..=self.sim.noise)
        } else {
            0.0
        }
    }

    fn wave(&mut self, samples: &Array1<f64>, slot: usize, amplitude: f64, phase_deg: f64) -> Vec<i32> {
        let omega = 2.0 * PI * self.sim.frequency / self.sim.sample_rate;
        let slot_offset = slot as f64 / self.slots();
        let mid = self.mid_code();

        samples
            .iter()
            .map(|&s| {
                let value = mid + amplitude * (omega * (s + slot_offset) - offset(phase_deg)).sin() + self.noise();
                self.to_code(value)
            })
            .collect()
    }
}

impl Sampler for SimulatedSampler {
    fn read_batch(&mut self, size: usize) -> Result<RawSampleBatch> {
        let captured_at = Utc::now();
        let start = self.elapsed as f64;
        let samples = Array1::range(start, start + size as f64, 1.0);

        let voltage = self.wave(&samples, self.sim.voltage_slot, self.sim.voltage_amplitude, 0.0);

        let mut currents = Vec::with_capacity(self.channels.len());
        for index in 0..self.channels.len() {
            let amplitude = if self.sim.reversed.contains(&self.channels[index]) {
                -self.sim.current_amplitude
            } else {
                self.sim.current_amplitude
            };
            let slot = self.slot(index);
            let phase = self.sim.load_phase_deg;
            currents.push(self.wave(&samples, slot, amplitude, phase));
        }

        self.elapsed += size;

        if self.sim.realtime {
            spin_sleep::sleep(Duration::from_secs_f64(size as f64 / self.sim.sample_rate));
        }

        RawSampleBatch::new(currents, voltage, captured_at)
    }
}

/// Reference channel of the simulated board, read through the same averaging as real hardware.
pub struct SimulatedBoard {
    board_voltage: f64,
    noise: f64,
    adc: AdcConfig,
    rng: ThreadRng,
}

impl SimulatedBoard {
    pub fn new(config: &MonitorConfig) -> Self {
        Self {
            board_voltage: config.simulation.board_voltage,
            noise: config.simulation.noise,
            adc: config.adc.clone(),
            rng: rand::thread_rng(),
        }
    }
}

impl BoardVoltageSensor for SimulatedBoard {
    fn read(&mut self) -> Result<f64> {
        let code = self.board_voltage / (self.adc.board_reference_voltage * self.adc.board_divider) * self.adc.full_scale;

        let mut readings = Vec::with_capacity(self.adc.board_samples);
        for _ in 0..self.adc.board_samples {
            let noise = if self.noise > 0.0 {
                self.rng.gen_range(-self.noise..=self.noise)
            } else {
                0.0
            };
            readings.push((code + noise).round().clamp(0.0, self.adc.full_scale - 1.0) as i32);
        }

        board_voltage_from_readings(&readings, &self.adc)
    }
}
