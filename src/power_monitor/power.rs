use super::config::{AdcConfig, GridConfig};
use super::error::{EngineError, Result};
use super::types::{BatchScales, Channel, ChannelConfig, ChannelScale, PowerResult};

/* ----------------- Scale Factors ------------------ */

/*
* @brief Volts per ADC code for this batch.
* @param board_voltage Measured board supply voltage
* @param adc_full_scale Converter resolution in codes
*/
pub fn reference_voltage(board_voltage: f64, adc_full_scale: f64) -> f64 {
    board_voltage / adc_full_scale
}

pub fn ct_scaling_factor(v_ref: f64, accuracy_factor: f64) -> f64 {
    v_ref * 100.0 * accuracy_factor
}

pub fn voltage_scaling_factor(v_ref: f64, ac_voltage_ratio: f64, ac_accuracy_factor: f64) -> f64 {
    v_ref * ac_voltage_ratio * ac_accuracy_factor
}

impl BatchScales {
    pub fn new(board_voltage: f64, adc: &AdcConfig, grid: &GridConfig) -> Self {
        let v_ref = reference_voltage(board_voltage, adc.full_scale);
        Self {
            board_voltage,
            v_ref,
            v_scale: voltage_scaling_factor(v_ref, grid.ac_voltage_ratio(), grid.ac_accuracy_factor),
        }
    }

    pub fn channel(&self, channel: &ChannelConfig) -> ChannelScale {
        ChannelScale {
            channel: channel.id,
            ct_scale: ct_scaling_factor(self.v_ref, channel.accuracy_factor),
        }
    }
}

/* ----------------- Power Functions ------------------ */

pub fn apparent_power(rms_voltage: f64, rms_current: f64) -> f64 {
    rms_voltage * rms_current
}

/*
* @brief Power factor from real and apparent power.
* @note Zero apparent power gives a power factor of exactly 0, never NaN.
* @note Rounding can push the ratio a hair past ±1, it is clamped back.
*/
pub fn power_factor(real_power: f64, apparent_power: f64) -> f64 {
    if apparent_power == 0.0 {
        return 0.0;
    }

    (real_power / apparent_power).clamp(-1.0, 1.0)
}

/*
* @brief RMS of the AC component from the mean square and the mean.
* @note Cancellation can leave the radicand slightly negative when the AC content is near zero.
*       That is clamped to 0 here and never reported upwards.
*/
fn ac_rms(mean_square: f64, mean: f64, channel: Channel, quantity: &str) -> f64 {
    let radicand = mean_square - mean * mean;

    if radicand < 0.0 {
        log::debug!("{}: negative {} RMS radicand {:e} clamped to 0", channel, quantity, radicand);
        return 0.0;
    }

    radicand.sqrt()
}

#[derive(Debug, Default)]
struct RunningSums {
    current: f64,
    voltage: f64,
    instant_power: f64,
    current_squared: f64,
    voltage_squared: f64,
}

/*
* @brief Real power, RMS current, RMS voltage and power factor of one channel.
* @param current Raw current codes of the channel
* @param voltage Voltage wave rebuilt for the channel
* @param scale Scale of the channel's CT
* @param v_scale Scale of the voltage input, shared by every channel
* @return PowerResult, or InvalidInput when the sequences are empty or differ in length
* @note Means are removed before multiplying, which cancels the ADC mid-code offset.
*/
pub fn compute(current: &[i32], voltage: &[f64], scale: ChannelScale, v_scale: f64) -> Result<PowerResult> {
    if current.len() != voltage.len() {
        return Err(EngineError::InvalidInput(format!(
            "current holds {} samples, voltage holds {}",
            current.len(),
            voltage.len()
        )));
    }
    if current.is_empty() {
        return Err(EngineError::InvalidInput("no samples to compute power from".into()));
    }

    let sums = current
        .iter()
        .zip(voltage.iter())
        .fold(RunningSums::default(), |mut sums, (&i, &v)| {
            let i = i as f64;
            sums.current += i;
            sums.voltage += v;
            sums.instant_power += i * v;
            sums.current_squared += i * i;
            sums.voltage_squared += v * v;
            sums
        });

    let length = current.len() as f64;
    let mean_current = sums.current / length;
    let mean_voltage = sums.voltage / length;

    let real_power = ((sums.instant_power / length) - mean_current * mean_voltage) * scale.ct_scale * v_scale;
    let rms_current = ac_rms(sums.current_squared / length, mean_current, scale.channel, "current") * scale.ct_scale;
    let rms_voltage = ac_rms(sums.voltage_squared / length, mean_voltage, scale.channel, "voltage") * v_scale;

    let apparent = apparent_power(rms_voltage, rms_current);

    Ok(PowerResult {
        real_power,
        rms_current,
        rms_voltage,
        power_factor: power_factor(real_power, apparent),
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::f64::consts::PI;

    const UNIT: ChannelScale = ChannelScale {
        channel: Channel(0),
        ct_scale: 1.0,
    };

    fn scaled(ct_scale: f64) -> ChannelScale {
        ChannelScale {
            channel: Channel(0),
            ct_scale,
        }
    }

    fn wave(len: usize, offset: f64, amplitude: f64, samples_per_cycle: f64, phase: f64) -> Vec<f64> {
        (0..len)
            .map(|i| offset + amplitude * (2.0 * PI * i as f64 / samples_per_cycle + phase).sin())
            .collect()
    }

    fn codes(wave: &[f64]) -> Vec<i32> {
        wave.iter().map(|v| v.round() as i32).collect()
    }

    #[test]
    fn flat_signals_give_all_zeros() {
        let result = compute(&[10, 10, 10, 10], &[512.0, 512.0, 512.0, 512.0], UNIT, 1.0).unwrap();
        assert_eq!(
            result,
            PowerResult {
                real_power: 0.0,
                rms_current: 0.0,
                rms_voltage: 0.0,
                power_factor: 0.0,
            }
        );
    }

    #[test]
    fn in_phase_square_wave_is_resistive() {
        let current = [412, 512, 612, 512];
        let voltage = [412.0, 512.0, 612.0, 512.0];
        let result = compute(&current, &voltage, scaled(0.3), 2.0).unwrap();

        assert!(result.real_power > 0.0);
        assert!((result.power_factor - 1.0).abs() < 1e-9);
        // variance is 5000 codes², scaled by 0.3 * 2.0
        assert!((result.real_power - 5000.0 * 0.6).abs() < 1e-6);
    }

    #[test]
    fn constant_voltage_is_not_a_domain_error() {
        let current = codes(&wave(400, 512.0, 100.0, 40.0, 0.0));
        let voltage = vec![600.0; 400];
        let result = compute(&current, &voltage, UNIT, 1.0).unwrap();

        assert_eq!(result.rms_voltage, 0.0);
        assert_eq!(result.power_factor, 0.0);
        assert!(result.rms_current > 0.0);
        assert!(result.real_power.abs() < 1e-9);
    }

    #[test]
    fn cancelling_radicand_is_clamped_to_zero() {
        // 0.1 + 0.2 squares to just under the square of its own mean.
        let voltage = vec![0.1 + 0.2; 7];
        let radicand = voltage.iter().map(|v| v * v).sum::<f64>() / 7.0 - (voltage.iter().sum::<f64>() / 7.0).powi(2);
        assert!(radicand < 0.0);

        let result = compute(&[3; 7], &voltage, UNIT, 1.0).unwrap();

        assert_eq!(result.rms_voltage, 0.0);
        assert_eq!(result.rms_current, 0.0);
        assert_eq!(result.power_factor, 0.0);
        assert_eq!(ac_rms(-1e-17, 0.0, Channel(4), "voltage"), 0.0);
    }

    #[test]
    fn resistive_load_matches_apparent_power() {
        let voltage = wave(2000, 512.0, 300.0, 40.0, 0.0);
        let current: Vec<i32> = voltage.iter().map(|v| (512.0 + (v - 512.0) * 0.5) as i32).collect();
        let result = compute(&current, &voltage, scaled(0.32), 0.43).unwrap();

        assert!((result.power_factor - 1.0).abs() < 1e-4);
        assert!((result.real_power - result.apparent_power()).abs() / result.real_power < 1e-4);
    }

    #[test]
    fn quadrature_load_has_no_real_power() {
        let voltage = wave(2000, 512.0, 300.0, 40.0, 0.0);
        let current = codes(&wave(2000, 512.0, 200.0, 40.0, PI / 2.0));
        let result = compute(&current, &voltage, UNIT, 1.0).unwrap();

        assert!(result.power_factor.abs() < 1e-2);
        assert!(result.real_power.abs() < 0.01 * result.apparent_power());
        assert!(result.rms_current > 100.0);
        assert!(result.rms_voltage > 200.0);
    }

    #[test]
    fn reversed_current_gives_negative_power() {
        let voltage = wave(2000, 512.0, 300.0, 40.0, 0.0);
        let current = codes(&wave(2000, 512.0, -150.0, 40.0, 0.0));
        let result = compute(&current, &voltage, UNIT, 1.0).unwrap();

        assert!(result.real_power < 0.0);
        assert!(result.power_factor < -0.999);
    }

    #[test]
    fn rms_removes_offset() {
        let voltage = wave(4000, 512.0, 300.0, 40.0, 0.0);
        let current = codes(&voltage);
        let result = compute(&current, &voltage, UNIT, 1.0).unwrap();

        let expected = 300.0 / 2f64.sqrt();
        assert!((result.rms_voltage - expected).abs() < 0.5);
        assert!((result.rms_current - expected).abs() < 0.5);
    }

    #[test]
    fn mismatched_lengths_are_invalid_input() {
        let err = compute(&[1, 2, 3], &[1.0, 2.0], UNIT, 1.0).unwrap_err();
        assert!(matches!(err, EngineError::InvalidInput(_)));
    }

    #[test]
    fn empty_sequences_are_invalid_input() {
        let err = compute(&[], &[], UNIT, 1.0).unwrap_err();
        assert!(matches!(err, EngineError::InvalidInput(_)));
    }

    #[test]
    fn power_factor_policy_at_zero_apparent_power() {
        assert_eq!(power_factor(0.0, 0.0), 0.0);
        assert_eq!(power_factor(5.0, 0.0), 0.0);
        assert_eq!(power_factor(1.0000001, 1.0), 1.0);
    }

    #[test]
    fn scales_follow_board_voltage() {
        let adc = AdcConfig::default();
        let grid = GridConfig::default();
        let scales = BatchScales::new(3.3, &adc, &grid);
        let channel = ChannelConfig {
            accuracy_factor: 1.5,
            ..ChannelConfig::new(2)
        };

        assert!((scales.v_ref - 3.3 / 1024.0).abs() < 1e-15);
        assert!((scales.channel(&channel).ct_scale - scales.v_ref * 150.0).abs() < 1e-12);
        assert_eq!(scales.channel(&channel).channel, Channel(2));
        assert!((scales.v_scale - scales.v_ref * grid.ac_voltage_ratio()).abs() < 1e-12);
    }
}
