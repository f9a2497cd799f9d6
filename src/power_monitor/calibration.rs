use serde::Serialize;

use super::error::{EngineError, Result};
use super::power;
use super::types::{
    Channel, ChannelScale, PowerMonitor, PowerResult, RawSampleBatch, PHASE_CORRECTION_MAX, PHASE_CORRECTION_MIN,
};
use super::waveform;

/// Sweep parameters of the coefficient search.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct PhaseSearch {
    pub initial: f64,
    pub bound: f64,          // Half-width of the swept range around `initial`
    pub step: f64,           // Fine step
    pub coarse_factor: usize, // Coarse step is `step * coarse_factor`
    pub rounding_digits: i32, // PF precision used to decide ties
}

impl Default for PhaseSearch {
    fn default() -> Self {
        Self {
            initial: 1.0,
            bound: 0.5,
            step: 0.001,
            coarse_factor: 10,
            rounding_digits: 3,
        }
    }
}

impl PhaseSearch {
    /// Search centred on `initial`, pulled into the usable coefficient domain.
    pub fn around(initial: f64) -> Self {
        let clamped = if initial.is_finite() {
            initial.clamp(PHASE_CORRECTION_MIN, PHASE_CORRECTION_MAX)
        } else {
            Self::default().initial
        };
        if clamped != initial {
            log::debug!("Coefficient {} is outside the search domain, starting at {}", initial, clamped);
        }

        Self {
            initial: clamped,
            ..Self::default()
        }
    }

    fn validate(&self) -> Result<()> {
        let usable = self.initial.is_finite()
            && (PHASE_CORRECTION_MIN..=PHASE_CORRECTION_MAX).contains(&self.initial)
            && self.bound.is_finite()
            && self.bound > 0.0
            && self.step.is_finite()
            && self.step > 0.0
            && self.coarse_factor > 0;
        if usable {
            Ok(())
        } else {
            Err(EngineError::InvalidInput(format!("unusable phase search {:?}", self)))
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Serialize)]
pub struct PhaseCandidate {
    pub coefficient: f64,
    pub power_factor: f64,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct PhaseCalibration {
    pub channel: Channel,
    pub initial_power_factor: f64,
    pub recommended: f64, // Mean of the tied candidates
    pub candidates: Vec<PhaseCandidate>,
}

/// Raw samples of one channel and the shared voltage input.
#[derive(Debug, Clone, Copy)]
pub struct ChannelSamples<'a> {
    pub channel: Channel,
    pub current: &'a [i32],
    pub voltage: &'a [i32],
}

impl<'a> ChannelSamples<'a> {
    pub fn from_batch(batch: &'a RawSampleBatch, index: usize, channel: Channel) -> Result<Self> {
        let current = batch
            .current(index)
            .ok_or_else(|| EngineError::InvalidInput(format!("batch holds no current sequence for {}", channel)))?;
        Ok(Self {
            channel,
            current,
            voltage: batch.voltage(),
        })
    }
}

/*
* @brief Power figures of one channel with its voltage rebuilt at a given coefficient.
* @param current Raw current codes
* @param raw_voltage Raw voltage codes captured alongside
* @param coefficient Phase correction to try
* @param scale Current scale of the channel
* @param v_scale Voltage scale of the batch
*/
pub fn check_phase_correction(
    current: &[i32],
    raw_voltage: &[i32],
    coefficient: f64,
    scale: ChannelScale,
    v_scale: f64,
) -> Result<PowerResult> {
    let voltage = waveform::reconstruct(raw_voltage, coefficient);
    power::compute(current, &voltage, scale, v_scale)
}

const MAX_ROUNDING_DIGITS: i32 = 15;
const TIE_SLACK: f64 = 1e-9;

fn round_to(value: f64, digits: i32) -> f64 {
    let factor = 10f64.powi(digits);
    (value * factor).round() / factor
}

fn span(candidates: &[PhaseCandidate]) -> f64 {
    let (low, high) = bounds(candidates);
    high - low
}

fn bounds(candidates: &[PhaseCandidate]) -> (f64, f64) {
    candidates
        .iter()
        .fold((f64::INFINITY, f64::NEG_INFINITY), |(low, high), c| {
            (low.min(c.coefficient), high.max(c.coefficient))
        })
}

/// Candidates whose PF rounded to `digits` sits closest to unity.
fn ties(candidates: &[PhaseCandidate], digits: i32) -> Vec<PhaseCandidate> {
    let tolerance = 0.5 * 10f64.powi(-digits);
    let distance = |c: &PhaseCandidate| (1.0 - round_to(c.power_factor, digits)).abs();

    let best = candidates.iter().map(distance).fold(f64::INFINITY, f64::min);
    candidates
        .iter()
        .filter(|c| distance(c) <= best + tolerance)
        .copied()
        .collect()
}

/*
* @brief Tie set no wider than `max_span`.
* @param candidates Every evaluated coefficient of one sweep
* @param digits Rounding precision to start from
* @note Coarse rounding leaves a wide plateau that is lopsided around the optimum,
*       so digits are added until the ties cluster at the peak.
*/
fn narrow_ties(candidates: &[PhaseCandidate], digits: i32, max_span: f64) -> Vec<PhaseCandidate> {
    let mut digits = digits;
    let mut tied = ties(candidates, digits);

    while span(&tied) > max_span && digits < MAX_ROUNDING_DIGITS {
        digits += 1;
        tied = ties(candidates, digits);
    }

    tied
}

struct Sweep<'a> {
    samples: ChannelSamples<'a>,
    scale: ChannelScale,
    v_scale: f64,
}

impl Sweep<'_> {
    /// Every coefficient of `[start, end]` at `step`, with its PF.
    fn evaluate(&self, start: f64, end: f64, step: f64) -> Result<Vec<PhaseCandidate>> {
        let count = ((end - start) / step).round().max(0.0) as usize;

        (0..=count)
            .map(|k| {
                let coefficient = (start + k as f64 * step).min(end);
                let result = check_phase_correction(
                    self.samples.current,
                    self.samples.voltage,
                    coefficient,
                    self.scale,
                    self.v_scale,
                )?;
                Ok(PhaseCandidate {
                    coefficient,
                    power_factor: result.power_factor,
                })
            })
            .collect()
    }
}

/*
* @brief Coefficients that bring the channel closest to unity power factor.
* @param samples Raw capture of the channel under a resistive load
* @param scale Current scale of the channel
* @param v_scale Voltage scale of the batch
* @param search Sweep parameters
* @return The tied candidates of the fine sweep, spanning at most two fine steps
* @note A coarse sweep over the whole range narrows the window, then a fine sweep settles it.
*/
pub fn search_phase_correction(
    samples: ChannelSamples<'_>,
    scale: ChannelScale,
    v_scale: f64,
    search: &PhaseSearch,
) -> Result<Vec<PhaseCandidate>> {
    search.validate()?;

    let sweep = Sweep {
        samples,
        scale,
        v_scale,
    };

    let coarse_step = search.step * search.coarse_factor as f64;
    let start = (search.initial - search.bound).max(PHASE_CORRECTION_MIN);
    let end = (search.initial + search.bound).min(PHASE_CORRECTION_MAX);

    let coarse = narrow_ties(
        &sweep.evaluate(start, end, coarse_step)?,
        search.rounding_digits,
        2.0 * coarse_step + TIE_SLACK,
    );
    let (low, high) = bounds(&coarse);
    log::debug!(
        "{}: coarse sweep tied {} candidate(s) in [{:.4}, {:.4}]",
        samples.channel,
        coarse.len(),
        low,
        high
    );

    let fine_start = (low - coarse_step).max(start);
    let fine_end = (high + coarse_step).min(end);
    let fine = sweep.evaluate(fine_start, fine_end, search.step)?;

    Ok(narrow_ties(&fine, search.rounding_digits, 2.0 * search.step + TIE_SLACK))
}

/*
* @brief Recommend a phase correction coefficient for one channel.
* @param samples Raw capture of the channel
* @param resistive_load Whether the operator confirmed a purely resistive load
* @param scale Current scale of the channel
* @param v_scale Voltage scale of the batch
* @param search Sweep parameters, `initial` being the coefficient in use
* @note A negative PF at the coefficient in use means the CT is clamped backwards.
*/
pub fn calibrate_channel(
    samples: ChannelSamples<'_>,
    resistive_load: bool,
    scale: ChannelScale,
    v_scale: f64,
    search: &PhaseSearch,
) -> Result<PhaseCalibration> {
    if !resistive_load {
        return Err(EngineError::InvalidInput(format!(
            "{} needs a purely resistive load to calibrate",
            samples.channel
        )));
    }

    let initial = check_phase_correction(samples.current, samples.voltage, search.initial, scale, v_scale)?;
    if initial.apparent_power() == 0.0 {
        return Err(EngineError::InvalidInput(format!("{} carries no current", samples.channel)));
    }
    if initial.power_factor < 0.0 {
        return Err(EngineError::ReversedPolarity {
            channel: samples.channel,
        });
    }

    let candidates = search_phase_correction(samples, scale, v_scale, search)?;
    let recommended = candidates.iter().map(|c| c.coefficient).sum::<f64>() / candidates.len() as f64;

    log::debug!(
        "{}: PF {:.4} at {:.4}, {} tied candidate(s), recommending {:.8}",
        samples.channel,
        initial.power_factor,
        search.initial,
        candidates.len(),
        recommended
    );

    Ok(PhaseCalibration {
        channel: samples.channel,
        initial_power_factor: initial.power_factor,
        recommended,
        candidates,
    })
}

impl PowerMonitor {
    /// Calibrate one configured channel from a batch, sweeping around its current coefficient.
    pub fn calibrate(
        &self,
        batch: &RawSampleBatch,
        channel: Channel,
        board_voltage: f64,
        resistive_load: bool,
    ) -> Result<PhaseCalibration> {
        let index = self
            .config
            .channel_index(channel)
            .ok_or_else(|| EngineError::InvalidInput(format!("{} is not configured", channel)))?;
        let config = &self.config.channels[index];

        let scales = self.scales(board_voltage);
        let samples = ChannelSamples::from_batch(batch, index, channel)?;

        calibrate_channel(
            samples,
            resistive_load,
            scales.channel(config),
            scales.v_scale,
            &PhaseSearch::around(config.phase_correction),
        )
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::f64::consts::PI;

    const TRUE_COEFFICIENT: f64 = 0.9;
    const STEP: f64 = 0.001;

    fn scale() -> ChannelScale {
        ChannelScale {
            channel: Channel(0),
            ct_scale: 0.3,
        }
    }

    fn voltage(len: usize) -> Vec<i32> {
        sine(len, 20.0)
    }

    fn sine(len: usize, samples_per_cycle: f64) -> Vec<i32> {
        (0..len)
            .map(|i| (512.0 + 300.0 * (2.0 * PI * i as f64 / samples_per_cycle).sin()).round() as i32)
            .collect()
    }

    /// Current in phase with the voltage as rebuilt at `coefficient`.
    fn resistive_current(voltage: &[i32], coefficient: f64, sign: f64) -> Vec<i32> {
        waveform::reconstruct(voltage, coefficient)
            .iter()
            .map(|v| (512.0 + sign * 0.9 * (v - 512.0)).round() as i32)
            .collect()
    }

    fn samples<'a>(current: &'a [i32], voltage: &'a [i32]) -> ChannelSamples<'a> {
        ChannelSamples {
            channel: Channel(0),
            current,
            voltage,
        }
    }

    #[test]
    fn identity_coefficient_matches_plain_computation() {
        let v = voltage(400);
        let c = resistive_current(&v, 1.0, 1.0);
        let checked = check_phase_correction(&c, &v, 1.0, scale(), 0.5).unwrap();
        let direct: Vec<f64> = v.iter().map(|&x| x as f64).collect();
        assert_eq!(checked, power::compute(&c, &direct, scale(), 0.5).unwrap());
    }

    #[test]
    fn fine_rounding_recovers_the_coefficient() {
        let v = voltage(2000);
        let c = resistive_current(&v, TRUE_COEFFICIENT, 1.0);
        let search = PhaseSearch {
            rounding_digits: 5,
            ..PhaseSearch::default()
        };

        let calibration = calibrate_channel(samples(&c, &v), true, scale(), 0.5, &search).unwrap();

        assert!(calibration.initial_power_factor < 0.9999);
        assert!((calibration.recommended - TRUE_COEFFICIENT).abs() < 0.005);
        assert!(calibration.candidates.iter().all(|c| c.power_factor > 0.9999));
    }

    #[test]
    fn default_rounding_lands_near_the_coefficient() {
        let v = voltage(2000);
        let c = resistive_current(&v, TRUE_COEFFICIENT, 1.0);

        let calibration = calibrate_channel(samples(&c, &v), true, scale(), 0.5, &PhaseSearch::default()).unwrap();

        assert!(!calibration.candidates.is_empty());
        assert!((calibration.recommended - TRUE_COEFFICIENT).abs() <= 3.0 * STEP);
        let (low, high) = bounds(&calibration.candidates);
        assert!(high - low <= 2.0 * STEP + TIE_SLACK);
    }

    #[test]
    fn slow_skew_is_found_within_a_few_steps() {
        // 66 samples per cycle flattens the PF curve into a wide 3-digit plateau.
        let v = sine(4000, 66.0);
        let c = resistive_current(&v, 0.95, 1.0);

        let calibration = calibrate_channel(samples(&c, &v), true, scale(), 0.5, &PhaseSearch::default()).unwrap();

        assert!((calibration.recommended - 0.95).abs() <= 5.0 * STEP);
    }

    #[test]
    fn coefficient_above_identity_is_found() {
        let v = sine(4000, 40.0);
        let c = resistive_current(&v, 1.1, 1.0);

        let calibration = calibrate_channel(samples(&c, &v), true, scale(), 0.5, &PhaseSearch::default()).unwrap();

        assert!((calibration.recommended - 1.1).abs() <= 5.0 * STEP);
    }

    #[test]
    fn ties_are_narrowed_to_the_peak() {
        // Symmetric plateau at 3 digits, single peak at 5.
        let candidates: Vec<PhaseCandidate> = [0.99951, 0.99990, 0.99999, 0.99996, 0.99970, 0.99950]
            .iter()
            .enumerate()
            .map(|(i, &power_factor)| PhaseCandidate {
                coefficient: 0.8 + i as f64 * 0.01,
                power_factor,
            })
            .collect();

        assert_eq!(ties(&candidates, 3).len(), 6);

        let narrowed = narrow_ties(&candidates, 3, 0.02 + TIE_SLACK);
        assert!(narrowed.len() < 6);
        assert!(narrowed.iter().all(|c| (0.81..=0.83 + TIE_SLACK).contains(&c.coefficient)));
        assert!(narrowed.iter().any(|c| (c.coefficient - 0.82).abs() < 1e-12));
    }

    #[test]
    fn out_of_domain_start_is_clamped() {
        assert_eq!(PhaseSearch::around(2.2).initial, PHASE_CORRECTION_MAX);
        assert_eq!(PhaseSearch::around(-0.4).initial, PHASE_CORRECTION_MIN);
        assert_eq!(PhaseSearch::around(f64::NAN).initial, 1.0);
    }

    #[test]
    fn negative_initial_pf_reports_reversed_polarity() {
        let v = voltage(2000);
        let c = resistive_current(&v, TRUE_COEFFICIENT, -1.0);

        let err = calibrate_channel(samples(&c, &v), true, scale(), 0.5, &PhaseSearch::default()).unwrap_err();
        assert!(matches!(err, EngineError::ReversedPolarity { channel: Channel(0) }));
    }

    #[test]
    fn refuses_unconfirmed_load() {
        let v = voltage(200);
        let c = resistive_current(&v, 1.0, 1.0);
        assert!(matches!(
            calibrate_channel(samples(&c, &v), false, scale(), 0.5, &PhaseSearch::default()),
            Err(EngineError::InvalidInput(_))
        ));
    }

    #[test]
    fn refuses_idle_channel() {
        let v = voltage(200);
        let c = vec![512; 200];
        assert!(matches!(
            calibrate_channel(samples(&c, &v), true, scale(), 0.5, &PhaseSearch::default()),
            Err(EngineError::InvalidInput(_))
        ));
    }

    #[test]
    fn sweep_stays_inside_the_domain() {
        let v = voltage(1000);
        let c = resistive_current(&v, 1.0, 1.0);
        let search = PhaseSearch::around(1.9);

        let candidates = search_phase_correction(samples(&c, &v), scale(), 0.5, &search).unwrap();
        assert!(!candidates.is_empty());
        assert!(candidates
            .iter()
            .all(|c| (1.4..=PHASE_CORRECTION_MAX).contains(&c.coefficient)));
    }

    #[test]
    fn monitor_calibrates_a_configured_channel() {
        use crate::power_monitor::config::MonitorConfig;
        use crate::power_monitor::types::ChannelConfig;
        use chrono::Utc;

        let config = MonitorConfig {
            channels: vec![ChannelConfig::new(0), ChannelConfig::new(1)],
            ..MonitorConfig::default()
        };
        let monitor = PowerMonitor::new(config).unwrap();

        let v = voltage(2000);
        let c = resistive_current(&v, TRUE_COEFFICIENT, 1.0);
        let batch = RawSampleBatch::new(vec![vec![512; 2000], c], v, Utc::now()).unwrap();

        let calibration = monitor.calibrate(&batch, Channel(1), 3.3, true).unwrap();
        assert_eq!(calibration.channel, Channel(1));
        assert!((calibration.recommended - TRUE_COEFFICIENT).abs() <= 3.0 * STEP);

        assert!(monitor.calibrate(&batch, Channel(7), 3.3, true).is_err());
    }

    #[test]
    fn configured_coefficient_past_the_domain_still_calibrates() {
        use crate::power_monitor::config::MonitorConfig;
        use crate::power_monitor::types::ChannelConfig;
        use chrono::Utc;

        let mut channel = ChannelConfig::new(0);
        channel.phase_correction = 2.2;
        let monitor = PowerMonitor::new(MonitorConfig {
            channels: vec![channel],
            ..MonitorConfig::default()
        })
        .unwrap();

        let v = voltage(2000);
        let c = resistive_current(&v, 1.6, 1.0);
        let batch = RawSampleBatch::new(vec![c], v, Utc::now()).unwrap();

        let calibration = monitor.calibrate(&batch, Channel(0), 3.3, true).unwrap();
        assert!((calibration.recommended - 1.6).abs() <= 3.0 * STEP);
    }
}
