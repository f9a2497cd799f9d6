use serde::Serialize;

use super::calibration::{calibrate_channel, check_phase_correction, ChannelSamples, PhaseCalibration, PhaseSearch};
use super::config::MonitorConfig;
use super::error::{EngineError, Result};
use super::sampler::{BoardVoltageSensor, Sampler};
use super::types::{Channel, PowerMonitor, PowerResult};
use super::waveform;

#[derive(Debug, Clone, PartialEq)]
pub enum CalibrationState {
    SelectChannel,
    VerifyLoad,
    MeasureInitialPf,
    PromptReversePolarity,
    ReMeasure,
    SearchCoefficient,
    ReportAndPersistSuggestion,
    BuildVerificationWaveform,
    Done,
    Abort(String),
}

impl CalibrationState {
    pub fn is_terminal(&self) -> bool {
        matches!(self, CalibrationState::Done | CalibrationState::Abort(_))
    }
}

/// What the operator is told once a coefficient is found.
#[derive(Debug, Clone, PartialEq)]
pub struct Suggestion {
    pub calibration: PhaseCalibration,
    pub config_line: String,
    pub config: MonitorConfig, // Current config with the recommended coefficient swapped in
}

/// Fresh capture rebuilt with the recommended coefficient.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct Verification {
    pub channel: Channel,
    pub coefficient: f64,
    pub result: PowerResult,
    pub current: Vec<i32>,
    pub voltage: Vec<f64>,
}

#[derive(Debug, Clone, PartialEq)]
pub struct CalibrationOutcome {
    pub suggestion: Suggestion,
    pub verification: Verification,
}

/// The person at the panel, asked to act or confirm between steps.
pub trait Operator {
    fn confirm_resistive_load(&mut self, channel: Channel) -> Result<bool>;

    /// Ask for the CT to be flipped. Returns once it has been.
    fn request_reversal(&mut self, channel: Channel) -> Result<()>;

    fn report(&mut self, suggestion: &Suggestion) -> Result<()>;
}

impl<O: Operator + ?Sized> Operator for &mut O {
    fn confirm_resistive_load(&mut self, channel: Channel) -> Result<bool> {
        (**self).confirm_resistive_load(channel)
    }

    fn request_reversal(&mut self, channel: Channel) -> Result<()> {
        (**self).request_reversal(channel)
    }

    fn report(&mut self, suggestion: &Suggestion) -> Result<()> {
        (**self).report(suggestion)
    }
}

pub fn config_line(channel: Channel, coefficient: f64) -> String {
    format!("- {{ id: {}, phase_correction: {:.8} }}", channel.0, coefficient)
}

/// One interactive calibration run for a single channel.
pub struct CalibrationSession<'a, S, B, O> {
    monitor: &'a PowerMonitor,
    sampler: S,
    board: B,
    operator: O,
    channel: Channel,
    state: CalibrationState,
    history: Vec<CalibrationState>,
}

impl<'a, S: Sampler, B: BoardVoltageSensor, O: Operator> CalibrationSession<'a, S, B, O> {
    pub fn new(monitor: &'a PowerMonitor, sampler: S, board: B, operator: O, channel: Channel) -> Self {
        Self {
            monitor,
            sampler,
            board,
            operator,
            channel,
            state: CalibrationState::SelectChannel,
            history: Vec::new(),
        }
    }

    pub fn state(&self) -> &CalibrationState {
        &self.state
    }

    /// Every state entered so far, in order.
    pub fn history(&self) -> &[CalibrationState] {
        &self.history
    }

    fn enter(&mut self, state: CalibrationState) {
        log::debug!("{}: {:?}", self.channel, state);
        self.history.push(state.clone());
        self.state = state;
    }

    fn abort<T>(&mut self, err: EngineError) -> Result<T> {
        self.enter(CalibrationState::Abort(err.to_string()));
        Err(err)
    }

    /// Capture a batch and return the channel's PF at `coefficient`.
    fn measure(&mut self, index: usize, coefficient: f64) -> Result<f64> {
        let board_voltage = self.board.read()?;
        let batch = self.sampler.read_batch(self.monitor.config.sampling.batch_size)?;
        let samples = ChannelSamples::from_batch(&batch, index, self.channel)?;

        let scales = self.monitor.scales(board_voltage);
        let scale = scales.channel(&self.monitor.config.channels[index]);
        let result = check_phase_correction(samples.current, samples.voltage, coefficient, scale, scales.v_scale)?;

        log::info!("{}: PF {:.4} at coefficient {:.4}", self.channel, result.power_factor, coefficient);
        Ok(result.power_factor)
    }

    /*
    * @brief Drive the session to a terminal state.
    * @return The suggestion and its verification once Done
    * @note Any error moves the session to Abort before it is returned.
    */
    pub fn run(&mut self) -> Result<CalibrationOutcome> {
        match self.drive() {
            Ok(outcome) => Ok(outcome),
            Err(err) if !self.state.is_terminal() => self.abort(err),
            Err(err) => Err(err),
        }
    }

    fn drive(&mut self) -> Result<CalibrationOutcome> {
        self.enter(CalibrationState::SelectChannel);
        let index = match self.monitor.config.channel_index(self.channel) {
            Some(index) => index,
            None => {
                let err = EngineError::InvalidInput(format!("{} is not configured", self.channel));
                return self.abort(err);
            }
        };
        let mut coefficient = self.monitor.config.channels[index].phase_correction;

        self.enter(CalibrationState::VerifyLoad);
        if !self.operator.confirm_resistive_load(self.channel)? {
            let err = EngineError::Aborted(format!("no resistive load confirmed on {}", self.channel));
            return self.abort(err);
        }

        self.enter(CalibrationState::MeasureInitialPf);
        if self.measure(index, coefficient)? < 0.0 {
            self.enter(CalibrationState::PromptReversePolarity);
            log::warn!("{}: negative power factor, the CT is probably clamped backwards", self.channel);
            self.operator.request_reversal(self.channel)?;

            self.enter(CalibrationState::ReMeasure);
            coefficient = 1.0;
            if self.measure(index, coefficient)? < 0.0 {
                let err = EngineError::ReversedPolarity { channel: self.channel };
                return self.abort(err);
            }
        }

        self.enter(CalibrationState::SearchCoefficient);
        let board_voltage = self.board.read()?;
        let batch = self.sampler.read_batch(self.monitor.config.sampling.batch_size)?;
        let scales = self.monitor.scales(board_voltage);
        let scale = scales.channel(&self.monitor.config.channels[index]);
        let calibration = calibrate_channel(
            ChannelSamples::from_batch(&batch, index, self.channel)?,
            true,
            scale,
            scales.v_scale,
            &PhaseSearch::around(coefficient),
        )?;

        self.enter(CalibrationState::ReportAndPersistSuggestion);
        let suggestion = Suggestion {
            config_line: config_line(self.channel, calibration.recommended),
            config: self
                .monitor
                .config
                .with_phase_correction(self.channel, calibration.recommended)?,
            calibration,
        };
        self.operator.report(&suggestion)?;

        self.enter(CalibrationState::BuildVerificationWaveform);
        let board_voltage = self.board.read()?;
        let batch = self.sampler.read_batch(self.monitor.config.sampling.batch_size)?;
        let samples = ChannelSamples::from_batch(&batch, index, self.channel)?;
        let scales = self.monitor.scales(board_voltage);
        let recommended = suggestion.calibration.recommended;
        let result = check_phase_correction(
            samples.current,
            samples.voltage,
            recommended,
            scales.channel(&self.monitor.config.channels[index]),
            scales.v_scale,
        )?;
        let verification = Verification {
            channel: self.channel,
            coefficient: recommended,
            result,
            current: samples.current.to_vec(),
            voltage: waveform::reconstruct(samples.voltage, recommended),
        };

        self.enter(CalibrationState::Done);
        Ok(CalibrationOutcome {
            suggestion,
            verification,
        })
    }
}
