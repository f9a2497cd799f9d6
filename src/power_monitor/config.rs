use serde::{Deserialize, Serialize};
use std::collections::BTreeSet;
use std::path::PathBuf;
use std::{fs, path::Path};

use super::error::{EngineError, Result};
use super::types::{Channel, ChannelConfig, ChannelRole, MIN_BOARD_SAMPLES};

pub const DEFAULT_CONFIG_PATH: &str = "power-monitor.yaml";

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct MonitorConfig {
    #[serde(default)]
    pub adc: AdcConfig,
    #[serde(default)]
    pub grid: GridConfig,
    #[serde(default)]
    pub sampling: SamplingConfig,
    #[serde(default = "default_channels")]
    pub channels: Vec<ChannelConfig>,
    #[serde(default)]
    pub production: ProductionConfig,
    #[serde(default)]
    pub output: OutputConfig,
    #[serde(default)]
    pub simulation: SimulationConfig,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct AdcConfig {
    /// Converter resolution in codes, 1024 for a 10-bit MCP3008
    #[serde(default = "default_full_scale")]
    pub full_scale: f64,
    /// Voltage of the rail the reference channel reads
    #[serde(default = "default_board_reference_voltage")]
    pub board_reference_voltage: f64,
    /// Divider in front of the reference channel
    #[serde(default = "default_board_divider")]
    pub board_divider: f64,
    /// Readings averaged per board-voltage measurement
    #[serde(default = "default_board_samples")]
    pub board_samples: usize,
}

fn default_full_scale() -> f64 {
    1024.0
}
fn default_board_reference_voltage() -> f64 {
    3.31
}
fn default_board_divider() -> f64 {
    2.0
}
fn default_board_samples() -> usize {
    11
}

impl Default for AdcConfig {
    fn default() -> Self {
        Self {
            full_scale: default_full_scale(),
            board_reference_voltage: default_board_reference_voltage(),
            board_divider: default_board_divider(),
            board_samples: default_board_samples(),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct GridConfig {
    #[serde(default = "default_grid_voltage")]
    pub grid_voltage: f64,
    /// Secondary voltage of the AC transformer feeding the voltage channel
    #[serde(default = "default_transformer_output_voltage")]
    pub transformer_output_voltage: f64,
    #[serde(default = "default_accuracy")]
    pub ac_accuracy_factor: f64,
}

fn default_grid_voltage() -> f64 {
    124.2
}
fn default_transformer_output_voltage() -> f64 {
    10.2
}
fn default_accuracy() -> f64 {
    1.0
}

impl Default for GridConfig {
    fn default() -> Self {
        Self {
            grid_voltage: default_grid_voltage(),
            transformer_output_voltage: default_transformer_output_voltage(),
            ac_accuracy_factor: default_accuracy(),
        }
    }
}

impl GridConfig {
    /// Rough transformation ratio of the voltage sensor (divider included).
    pub fn ac_voltage_ratio(&self) -> f64 {
        (self.grid_voltage / self.transformer_output_voltage) * 11.0
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SamplingConfig {
    #[serde(default = "default_batch_size")]
    pub batch_size: usize,
    /// Batches averaged into one persisted record
    #[serde(default = "default_average_window")]
    pub average_window: usize,
}

fn default_batch_size() -> usize {
    2000
}
fn default_average_window() -> usize {
    2
}

impl Default for SamplingConfig {
    fn default() -> Self {
        Self {
            batch_size: default_batch_size(),
            average_window: default_average_window(),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ProductionConfig {
    /// Production below this is reported as zero
    #[serde(default = "default_threshold_watts")]
    pub threshold_watts: f64,
}

fn default_threshold_watts() -> f64 {
    20.0
}

impl Default for ProductionConfig {
    fn default() -> Self {
        Self {
            threshold_watts: default_threshold_watts(),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct OutputConfig {
    #[serde(default = "default_output_path")]
    pub path: PathBuf,
    #[serde(default = "default_capture_dir")]
    pub capture_dir: PathBuf,
    /// Records kept for retry after a failed write
    #[serde(default = "default_max_pending")]
    pub max_pending: usize,
}

fn default_output_path() -> PathBuf {
    PathBuf::from("power-monitor.lp")
}
fn default_capture_dir() -> PathBuf {
    PathBuf::from("data/samples")
}
fn default_max_pending() -> usize {
    10
}

impl Default for OutputConfig {
    fn default() -> Self {
        Self {
            path: default_output_path(),
            capture_dir: default_capture_dir(),
            max_pending: default_max_pending(),
        }
    }
}

/// Parameters of the simulated round-robin capture.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SimulationConfig {
    #[serde(default = "default_frequency")]
    pub frequency: f64, // Grid frequency (Hz)
    #[serde(default = "default_sample_rate")]
    pub sample_rate: f64, // Round-robin cycles per second
    #[serde(default = "default_voltage_slot")]
    pub voltage_slot: usize, // Position of the voltage read inside a cycle, past the end means last
    #[serde(default = "default_voltage_amplitude")]
    pub voltage_amplitude: f64, // Peak, in ADC codes
    #[serde(default = "default_current_amplitude")]
    pub current_amplitude: f64, // Peak, in ADC codes
    #[serde(default)]
    pub load_phase_deg: f64, // True phase of the load current, 0 for resistive
    #[serde(default = "default_noise")]
    pub noise: f64, // Peak uniform noise, in ADC codes
    #[serde(default = "default_board_voltage")]
    pub board_voltage: f64,
    #[serde(default)]
    pub reversed: Vec<Channel>,
    #[serde(default)]
    pub realtime: bool, // Sleep for the time a real capture would take
}

fn default_frequency() -> f64 {
    60.0
}
fn default_sample_rate() -> f64 {
    4000.0
}
fn default_voltage_slot() -> usize {
    3
}
fn default_voltage_amplitude() -> f64 {
    300.0
}
fn default_current_amplitude() -> f64 {
    200.0
}
fn default_noise() -> f64 {
    1.0
}
fn default_board_voltage() -> f64 {
    3.3
}

impl Default for SimulationConfig {
    fn default() -> Self {
        Self {
            frequency: default_frequency(),
            sample_rate: default_sample_rate(),
            voltage_slot: default_voltage_slot(),
            voltage_amplitude: default_voltage_amplitude(),
            current_amplitude: default_current_amplitude(),
            load_phase_deg: 0.0,
            noise: default_noise(),
            board_voltage: default_board_voltage(),
            reversed: Vec::new(),
            realtime: false,
        }
    }
}

fn default_channels() -> Vec<ChannelConfig> {
    (0..6).map(ChannelConfig::new).collect()
}

impl Default for MonitorConfig {
    fn default() -> Self {
        Self {
            adc: AdcConfig::default(),
            grid: GridConfig::default(),
            sampling: SamplingConfig::default(),
            channels: default_channels(),
            production: ProductionConfig::default(),
            output: OutputConfig::default(),
            simulation: SimulationConfig::default(),
        }
    }
}

impl MonitorConfig {
    /// Load YAML from disk and validate it.
    /// If POWER_MONITOR_OUTPUT is set, it overrides `output.path`.
    pub fn load(path: impl AsRef<Path>) -> Result<Self> {
        let raw = fs::read_to_string(path)?;
        let mut cfg: Self = serde_yaml::from_str(&raw)?;

        if let Ok(output) = std::env::var("POWER_MONITOR_OUTPUT") {
            cfg.output.path = PathBuf::from(output);
        }

        cfg.validate()?;
        Ok(cfg)
    }

    pub fn validate(&self) -> Result<()> {
        ensure(!self.channels.is_empty(), "config must include at least one channel")?;

        let mut seen = BTreeSet::new();
        for channel in &self.channels {
            ensure(seen.insert(channel.id), &format!("channel {} is listed twice", channel.id))?;
            ensure(
                channel.phase_correction.is_finite(),
                &format!("channel {} phase_correction must be a finite number", channel.id),
            )?;
            ensure(
                channel.accuracy_factor.is_finite(),
                &format!("channel {} accuracy_factor must be a finite number", channel.id),
            )?;
        }

        ensure(self.sampling.batch_size > 0, "sampling.batch_size must be at least 1")?;
        ensure(self.sampling.average_window > 0, "sampling.average_window must be at least 1")?;
        ensure(self.adc.full_scale > 0.0, "adc.full_scale must be positive")?;
        ensure(
            self.adc.board_samples >= MIN_BOARD_SAMPLES,
            &format!("adc.board_samples must be at least {}", MIN_BOARD_SAMPLES),
        )?;
        ensure(
            self.grid.transformer_output_voltage > 0.0,
            "grid.transformer_output_voltage must be positive",
        )?;
        ensure(
            self.simulation.sample_rate.is_finite() && self.simulation.sample_rate > 0.0,
            "simulation.sample_rate must be a positive number",
        )?;
        Ok(())
    }

    /// Write the config back out as YAML.
    pub fn save(&self, path: impl AsRef<Path>) -> Result<()> {
        let path = path.as_ref();
        if let Some(dir) = path.parent() {
            if !dir.as_os_str().is_empty() {
                fs::create_dir_all(dir)?;
            }
        }
        fs::write(path, serde_yaml::to_string(self)?)?;
        Ok(())
    }

    /// Copy of the config with one channel's coefficient replaced.
    pub fn with_phase_correction(&self, id: Channel, phase_correction: f64) -> Result<Self> {
        let mut cfg = self.clone();
        let channel = cfg
            .channels
            .iter_mut()
            .find(|c| c.id == id)
            .ok_or_else(|| EngineError::Config(format!("channel {} is not configured", id)))?;
        channel.phase_correction = phase_correction;
        Ok(cfg)
    }

    pub fn channel(&self, id: Channel) -> Option<&ChannelConfig> {
        self.channels.iter().find(|c| c.id == id)
    }

    pub fn channel_index(&self, id: Channel) -> Option<usize> {
        self.channels.iter().position(|c| c.id == id)
    }

    pub fn production_channels(&self) -> impl Iterator<Item = &ChannelConfig> {
        self.channels.iter().filter(|c| c.role == ChannelRole::Production)
    }
}

fn ensure(condition: bool, message: &str) -> Result<()> {
    if condition {
        Ok(())
    } else {
        Err(EngineError::Config(message.to_string()))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use pretty_assertions::assert_eq;

    #[test]
    fn empty_yaml_takes_defaults() {
        let cfg: MonitorConfig = serde_yaml::from_str("{}").unwrap();
        assert_eq!(cfg, MonitorConfig::default());
        cfg.validate().unwrap();
        assert_eq!(cfg.channels.len(), 6);
        assert_eq!(cfg.sampling.batch_size, 2000);
        assert_eq!(cfg.sampling.average_window, 2);
    }

    #[test]
    fn channel_table_parses_with_defaults() {
        let yaml = r#"
channels:
  - id: 0
    phase_correction: 0.95
  - id: 3
    accuracy_factor: 1.02
    role: production
sampling:
  batch_size: 500
"#;
        let cfg: MonitorConfig = serde_yaml::from_str(yaml).unwrap();
        cfg.validate().unwrap();

        assert_eq!(cfg.channels[0].phase_correction, 0.95);
        assert_eq!(cfg.channels[0].accuracy_factor, 1.0);
        assert_eq!(cfg.channels[1].role, ChannelRole::Production);
        assert_eq!(cfg.sampling.batch_size, 500);
        assert_eq!(cfg.sampling.average_window, 2);
        assert_eq!(cfg.channel_index(Channel(3)), Some(1));
        assert_eq!(cfg.production_channels().count(), 1);
    }

    #[test]
    fn duplicate_channels_are_rejected() {
        let mut cfg = MonitorConfig::default();
        cfg.channels.push(ChannelConfig::new(0));
        assert!(matches!(cfg.validate(), Err(EngineError::Config(_))));
    }

    #[test]
    fn too_few_board_samples_are_rejected() {
        let mut cfg = MonitorConfig::default();
        cfg.adc.board_samples = 4;
        assert!(matches!(cfg.validate(), Err(EngineError::Config(_))));
    }

    #[test]
    fn non_positive_sample_rate_is_rejected() {
        for rate in [0.0, -4000.0, f64::NAN] {
            let mut cfg = MonitorConfig::default();
            cfg.simulation.sample_rate = rate;
            assert!(matches!(cfg.validate(), Err(EngineError::Config(_))));
        }

        let parsed: Result<MonitorConfig> =
            serde_yaml::from_str::<MonitorConfig>("simulation:\n  sample_rate: 0\n  realtime: true\n")
                .map_err(EngineError::from)
                .and_then(|cfg| cfg.validate().map(|()| cfg));
        assert!(matches!(parsed, Err(EngineError::Config(_))));
    }

    #[test]
    fn load_reads_file_from_disk() {
        let yaml = "channels:\n  - id: 7\n    phase_correction: 1.1\n";
        let path = std::env::temp_dir().join(format!("power-monitor-config-{}.yaml", std::process::id()));
        std::fs::write(&path, yaml).unwrap();

        let cfg = MonitorConfig::load(&path).unwrap();
        assert_eq!(cfg.channels, vec![ChannelConfig { phase_correction: 1.1, ..ChannelConfig::new(7) }]);

        std::fs::remove_file(&path).ok();
    }

    #[test]
    fn suggested_config_saves_and_reloads() {
        let cfg = MonitorConfig::default().with_phase_correction(Channel(2), 0.87654321).unwrap();
        assert_eq!(cfg.channel(Channel(2)).unwrap().phase_correction, 0.87654321);
        assert!(MonitorConfig::default().with_phase_correction(Channel(9), 1.0).is_err());

        let path = std::env::temp_dir().join(format!("power-monitor-suggested-{}.yaml", std::process::id()));
        cfg.save(&path).unwrap();
        let reloaded: MonitorConfig = serde_yaml::from_str(&std::fs::read_to_string(&path).unwrap()).unwrap();
        assert_eq!(reloaded, cfg);

        std::fs::remove_file(&path).ok();
    }

    #[test]
    fn ac_voltage_ratio_follows_transformer() {
        let grid = GridConfig {
            grid_voltage: 120.0,
            transformer_output_voltage: 12.0,
            ac_accuracy_factor: 1.0,
        };
        assert!((grid.ac_voltage_ratio() - 110.0).abs() < 1e-12);
    }
}
