use std::fs::{self, File, OpenOptions};
use std::io::{BufWriter, Write};
use std::path::{Path, PathBuf};

use super::error::{EngineError, Result};
use super::types::AggregatedRecord;

/// Sink for aggregated records.
pub trait Persistence {
    fn write(&mut self, record: &AggregatedRecord) -> Result<()>;

    /// Flush and release. Writes after close fail fatally.
    fn close(&mut self) -> Result<()>;
}

impl<P: Persistence + ?Sized> Persistence for &mut P {
    fn write(&mut self, record: &AggregatedRecord) -> Result<()> {
        (**self).write(record)
    }

    fn close(&mut self) -> Result<()> {
        (**self).close()
    }
}

impl<P: Persistence + ?Sized> Persistence for Box<P> {
    fn write(&mut self, record: &AggregatedRecord) -> Result<()> {
        (**self).write(record)
    }

    fn close(&mut self) -> Result<()> {
        (**self).close()
    }
}

fn escape_tag(value: &str) -> String {
    let mut escaped = String::with_capacity(value.len());
    for ch in value.chars() {
        if matches!(ch, ',' | '=' | ' ') {
            escaped.push('\\');
        }
        escaped.push(ch);
    }
    escaped
}

/*
* @brief Render one record as line-protocol points.
* @param record Window average to render
* @return One line per point, sharing the record's millisecond timestamp
*/
pub fn to_lines(record: &AggregatedRecord) -> Vec<String> {
    let ts = record.captured_at.timestamp_millis();
    let mut lines = Vec::with_capacity(record.channels.len() + 4);

    lines.push(format!(
        "home_load current={},power={} {}",
        record.home_consumption.current, record.home_consumption.power, ts
    ));
    lines.push(format!(
        "solar current={},power={},pf={} {}",
        record.production.current, record.production.power, record.production.power_factor, ts
    ));
    lines.push(format!(
        "net,status={} current={},power={} {}",
        escape_tag(record.net_status.as_str()),
        record.net.current,
        record.net.power,
        ts
    ));
    for channel in &record.channels {
        lines.push(format!(
            "raw_cts,ct={} current={},power={},pf={} {}",
            channel.channel.0, channel.rms_current, channel.real_power, channel.power_factor, ts
        ));
    }
    lines.push(format!("voltages,v_input=0 voltage={} {}", record.voltage, ts));

    lines
}

fn write_error(err: std::io::Error) -> EngineError {
    EngineError::Write {
        reason: err.to_string(),
        fatal: false,
    }
}

/// Appends records as InfluxDB line protocol to a file.
pub struct LineProtocolWriter {
    path: PathBuf,
    writer: Option<BufWriter<File>>,
}

impl LineProtocolWriter {
    pub fn open(path: impl AsRef<Path>) -> Result<Self> {
        let path = path.as_ref().to_path_buf();
        if let Some(dir) = path.parent() {
            if !dir.as_os_str().is_empty() {
                fs::create_dir_all(dir)?;
            }
        }

        let file = OpenOptions::new().create(true).append(true).open(&path)?;
        log::info!("Writing records to {}", path.display());

        Ok(Self {
            path,
            writer: Some(BufWriter::new(file)),
        })
    }

    pub fn path(&self) -> &Path {
        &self.path
    }
}

impl Persistence for LineProtocolWriter {
    fn write(&mut self, record: &AggregatedRecord) -> Result<()> {
        let Some(writer) = self.writer.as_mut() else {
            return Err(EngineError::Write {
                reason: format!("{} is already closed", self.path.display()),
                fatal: true,
            });
        };

        let mut payload = to_lines(record).join("\n");
        payload.push('\n');
        writer.write_all(payload.as_bytes()).map_err(write_error)?;
        writer.flush().map_err(write_error)
    }

    fn close(&mut self) -> Result<()> {
        if let Some(mut writer) = self.writer.take() {
            writer.flush().map_err(write_error)?;
            log::debug!("Closed {}", self.path.display());
        }
        Ok(())
    }
}

impl Drop for LineProtocolWriter {
    fn drop(&mut self) {
        if let Err(err) = self.close() {
            log::error!("Failed to flush {}: {}", self.path.display(), err);
        }
    }
}
