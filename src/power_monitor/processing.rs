use crate::power_monitor::{
    config::MonitorConfig,
    error::{EngineError, Result},
    power,
    print::print_batch_results,
    types::*,
    waveform,
};

impl PowerMonitor {
    pub fn new(config: MonitorConfig) -> Result<Self> {
        config.validate()?;
        Ok(Self { config })
    }

    pub fn scales(&self, board_voltage: f64) -> BatchScales {
        BatchScales::new(board_voltage, &self.config.adc, &self.config.grid)
    }

    /*
    * @brief Compute every channel of one batch.
    * @param batch Raw capture, one current sequence per configured channel in table order
    * @param board_voltage Board supply measured for this batch
    * @return Per-channel results sharing one voltage scale
    * @note Each channel gets its own voltage wave rebuilt from the shared raw voltage.
    */
    pub fn process_batch(&self, batch: &RawSampleBatch, board_voltage: f64) -> Result<BatchResults> {
        batch.validate()?;

        if batch.channel_count() != self.config.channels.len() {
            return Err(EngineError::InvalidInput(format!(
                "batch holds {} current sequences, {} channels are configured",
                batch.channel_count(),
                self.config.channels.len()
            )));
        }

        let scales = self.scales(board_voltage);
        let waves = waveform::rebuild_waves(batch, &self.config.channels)?;

        let channels = self
            .config
            .channels
            .iter()
            .zip(waves.iter())
            .map(|(channel, wave)| {
                let power = power::compute(wave.current, &wave.voltage, scales.channel(channel), scales.v_scale)?;
                Ok(ChannelResult {
                    channel: channel.id,
                    role: channel.role,
                    power,
                })
            })
            .collect::<Result<Vec<_>>>()?;

        Ok(BatchResults {
            captured_at: batch.captured_at(),
            scales,
            channels,
        })
    }

    pub fn print_results(&self, results: &BatchResults) {
        print_batch_results(results);
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::Utc;

    fn monitor(channels: usize) -> PowerMonitor {
        let config = MonitorConfig {
            channels: (0..channels as u8).map(ChannelConfig::new).collect(),
            ..MonitorConfig::default()
        };
        PowerMonitor::new(config).unwrap()
    }

    #[test]
    fn every_channel_gets_a_result() {
        let voltage = vec![412, 512, 612, 512];
        let batch = RawSampleBatch::new(
            vec![vec![412, 512, 612, 512], vec![10, 10, 10, 10], vec![612, 512, 412, 512]],
            voltage,
            Utc::now(),
        )
        .unwrap();

        let results = monitor(3).process_batch(&batch, 3.3).unwrap();

        assert_eq!(results.channels.len(), 3);
        assert!((results.channels[0].power.power_factor - 1.0).abs() < 1e-9);
        assert_eq!(results.channels[1].power.power_factor, 0.0);
        assert!((results.channels[2].power.power_factor + 1.0).abs() < 1e-9);
        assert_eq!(results.captured_at, batch.captured_at());
        assert_eq!(results.channel(Channel(2)).unwrap().channel, Channel(2));
    }

    #[test]
    fn channel_count_must_match_table() {
        let batch = RawSampleBatch::new(vec![vec![1, 2]], vec![1, 2], Utc::now()).unwrap();
        assert!(matches!(
            monitor(2).process_batch(&batch, 3.3),
            Err(EngineError::InvalidInput(_))
        ));
    }

    #[test]
    fn accuracy_factor_scales_only_its_channel() {
        let mut config = MonitorConfig {
            channels: vec![ChannelConfig::new(0), ChannelConfig::new(1)],
            ..MonitorConfig::default()
        };
        config.channels[1].accuracy_factor = 2.0;
        let monitor = PowerMonitor::new(config).unwrap();

        let wave = vec![412, 512, 612, 512];
        let batch = RawSampleBatch::new(vec![wave.clone(), wave.clone()], wave, Utc::now()).unwrap();
        let results = monitor.process_batch(&batch, 3.3).unwrap();

        let (a, b) = (results.channels[0].power, results.channels[1].power);
        assert!((b.real_power - 2.0 * a.real_power).abs() < 1e-9);
        assert!((b.rms_current - 2.0 * a.rms_current).abs() < 1e-9);
        assert_eq!(a.rms_voltage, b.rms_voltage);
    }
}
