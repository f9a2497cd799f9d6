use serde::{Deserialize, Serialize};
use std::fs::{self, File};
use std::io::{BufReader, BufWriter};
use std::path::Path;

use super::error::Result;
use super::types::RawSampleBatch;

/// A raw batch saved for diagnostics and for later calibration runs.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Capture {
    pub board_voltage: f64,
    pub sample_rate: Option<f64>, // Achieved samples per second, all channels
    pub batch: RawSampleBatch,
}

pub fn save(capture: &Capture, path: impl AsRef<Path>) -> Result<()> {
    let path = path.as_ref();
    if let Some(dir) = path.parent() {
        if !dir.as_os_str().is_empty() {
            fs::create_dir_all(dir)?;
        }
    }

    let writer = BufWriter::new(File::create(path)?);
    serde_json::to_writer(writer, capture)?;
    log::debug!("Capture written to {}", path.display());
    Ok(())
}

pub fn load(path: impl AsRef<Path>) -> Result<Capture> {
    let reader = BufReader::new(File::open(path.as_ref())?);
    let capture: Capture = serde_json::from_reader(reader)?;
    capture.batch.validate()?;
    Ok(capture)
}
