use std::path::Path;

use super::capture;
use super::config::MonitorConfig;
use super::error::{EngineError, Result};
use super::generate_signal::{SimulatedBoard, SimulatedSampler};
use super::sampler::{BoardVoltageSensor, FixedBoardVoltage, ReplaySampler, Sampler};

/// Where batches come from when no ADC is attached.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, clap::ValueEnum)]
pub enum SourceKind {
    #[default]
    Simulate,
    Replay,
}

pub struct Source {
    pub sampler: Box<dyn Sampler>,
    pub board: Box<dyn BoardVoltageSensor>,
}

/*
* @brief Open the sampler and board sensor for a run.
* @param config Monitor configuration
* @param kind Simulated board or replay of a capture
* @param capture Capture file, required for replay
*/
pub fn open(config: &MonitorConfig, kind: SourceKind, capture: Option<&Path>) -> Result<Source> {
    match kind {
        SourceKind::Simulate => {
            log::info!("Simulating {} channel(s)", config.channels.len());
            Ok(Source {
                sampler: Box::new(SimulatedSampler::new(config)),
                board: Box::new(SimulatedBoard::new(config)),
            })
        }
        SourceKind::Replay => {
            let path = capture.ok_or_else(|| EngineError::Config("replay needs a capture file".into()))?;
            let capture = capture::load(path)?;
            log::info!(
                "Replaying {} ({} samples per channel)",
                path.display(),
                capture.batch.len()
            );
            Ok(Source {
                sampler: Box::new(ReplaySampler::new(vec![capture.batch])?),
                board: Box::new(FixedBoardVoltage(capture.board_voltage)),
            })
        }
    }
}
