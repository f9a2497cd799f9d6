pub mod aggregation;
pub mod calibration;
pub mod capture;
pub mod config;
pub mod error;
pub mod generate_signal;
pub mod persistence;
pub mod power;
pub mod print;
mod processing;
pub mod sampler;
pub mod session;
pub mod source;
pub mod types;
pub mod waveform;

pub use aggregation::{AggregationLoop, Aggregator, LoopStats};
pub use calibration::{calibrate_channel, check_phase_correction, ChannelSamples, PhaseCalibration, PhaseSearch};
pub use config::MonitorConfig;
pub use error::{EngineError, Result};
pub use persistence::{LineProtocolWriter, Persistence};
pub use sampler::{BoardVoltageSensor, FixedBoardVoltage, ReplaySampler, Sampler};
pub use session::{CalibrationSession, Operator};
pub use types::*;
