use super::error::{EngineError, Result};
use super::types::{ChannelConfig, RawSampleBatch, ReconstructedWaveform};

/*
* @brief Rebuild the voltage wave seen by one CT.
* @param raw_voltage Raw voltage codes, shared by every channel of the batch
* @param phase_correction Fractional-sample shift factor of the channel
* @return Corrected voltage wave, same length as the input
* @note Each point moves from the previous corrected point towards the next raw point:
*       v[i] = v[i-1] + k * (raw[i] - v[i-1]). The first point is kept as is.
* @note k < 1 delays the wave, k > 1 advances it, k = 1 returns the raw wave.
*/
pub fn reconstruct(raw_voltage: &[i32], phase_correction: f64) -> Vec<f64> {
    let mut wave = Vec::with_capacity(raw_voltage.len());

    let Some((&first, rest)) = raw_voltage.split_first() else {
        return wave;
    };

    let mut previous = first as f64;
    wave.push(previous);

    for &raw in rest {
        let point = previous + phase_correction * (raw as f64 - previous);
        wave.push(point);
        previous = point;
    }

    wave
}

/*
* @brief Pair the current of one channel with its own corrected voltage.
* @param batch Raw batch
* @param index Position of the channel in the batch
* @param channel Calibration record of the channel
*/
pub fn reconstruct_channel<'a>(
    batch: &'a RawSampleBatch,
    index: usize,
    channel: &ChannelConfig,
) -> Result<ReconstructedWaveform<'a>> {
    let current = batch.current(index).ok_or_else(|| {
        EngineError::InvalidInput(format!(
            "batch holds {} current sequences, {} has none",
            batch.channel_count(),
            channel.id
        ))
    })?;

    Ok(ReconstructedWaveform {
        channel: channel.id,
        current,
        voltage: reconstruct(batch.voltage(), channel.phase_correction),
    })
}

/// One corrected voltage wave per configured channel, all from the same raw voltage.
pub fn rebuild_waves<'a>(
    batch: &'a RawSampleBatch,
    channels: &[ChannelConfig],
) -> Result<Vec<ReconstructedWaveform<'a>>> {
    channels
        .iter()
        .enumerate()
        .map(|(index, channel)| reconstruct_channel(batch, index, channel))
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::Utc;
    use std::f64::consts::PI;

    fn sine(len: usize, samples_per_cycle: f64) -> Vec<i32> {
        (0..len)
            .map(|i| (512.0 + 300.0 * (2.0 * PI * i as f64 / samples_per_cycle).sin()).round() as i32)
            .collect()
    }

    #[test]
    fn unity_coefficient_is_identity() {
        let raw = sine(500, 33.3);
        let wave = reconstruct(&raw, 1.0);
        let expected: Vec<f64> = raw.iter().map(|&v| v as f64).collect();
        assert_eq!(wave, expected);
    }

    #[test]
    fn first_point_is_never_corrected() {
        let raw = vec![700, 100, 900, 20];
        for k in [0.0, 0.3, 0.97, 1.0, 1.4, 2.0] {
            let wave = reconstruct(&raw, k);
            assert_eq!(wave.len(), raw.len());
            assert_eq!(wave[0], 700.0);
        }
    }

    #[test]
    fn correction_feeds_forward() {
        let wave = reconstruct(&[0, 100, 100], 0.5);
        assert_eq!(wave, vec![0.0, 50.0, 75.0]);
    }

    #[test]
    fn empty_input_gives_empty_wave() {
        assert!(reconstruct(&[], 0.8).is_empty());
    }

    #[test]
    fn zero_coefficient_holds_first_sample() {
        let wave = reconstruct(&[10, 20, 30, 40], 0.0);
        assert!(wave.iter().all(|&v| v == 10.0));
    }

    #[test]
    fn each_channel_gets_its_own_wave() {
        let voltage = sine(200, 40.0);
        let batch = RawSampleBatch::new(vec![voltage.clone(), voltage.clone()], voltage, Utc::now()).unwrap();
        let channels = vec![
            ChannelConfig::new(0),
            ChannelConfig {
                phase_correction: 0.8,
                ..ChannelConfig::new(1)
            },
        ];

        let waves = rebuild_waves(&batch, &channels).unwrap();
        assert_eq!(waves.len(), 2);
        assert_eq!(waves[0].voltage[5], batch.voltage()[5] as f64);
        assert_ne!(waves[1].voltage[5], batch.voltage()[5] as f64);
        assert_eq!(waves[1].current, batch.current(1).unwrap());
    }

    #[test]
    fn missing_current_sequence_is_invalid_input() {
        let batch = RawSampleBatch::new(vec![vec![1, 2, 3]], vec![4, 5, 6], Utc::now()).unwrap();
        let channels = vec![ChannelConfig::new(0), ChannelConfig::new(1)];
        assert!(matches!(
            rebuild_waves(&batch, &channels),
            Err(EngineError::InvalidInput(_))
        ));
    }
}
