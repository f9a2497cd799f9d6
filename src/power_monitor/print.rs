use crate::power_monitor::{
    calibration::PhaseCalibration,
    session::Verification,
    types::{AggregatedRecord, BatchResults, ChannelResult},
};

/*
* @brief Print the figures of one channel.
* @param result Channel result of one batch
*/
pub fn print_channel_result(result: &ChannelResult) {
    log::info!("{} ({}):", result.channel, result.role.as_str());
    log::info!("  Real power: {:.3} W", result.power.real_power);
    log::info!("  Current: {:.3} A", result.power.rms_current);
    log::info!("  Voltage: {:.3} V", result.power.rms_voltage);
    log::info!("  Power factor: {:.4}", result.power.power_factor);
}

/*
* @brief Print every channel of one batch.
* @param results Batch results in channel-table order
* @note Scales go to debug, they only matter when checking the board.
*/
pub fn print_batch_results(results: &BatchResults) {
    log::debug!(
        "Board: {:.3} V, v_ref {:.6} V/code, v_scale {:.6}",
        results.scales.board_voltage,
        results.scales.v_ref,
        results.scales.v_scale
    );
    for result in &results.channels {
        print_channel_result(result);
    }
}

/*
* @brief Print one averaged record as a table.
* @param record Window average
*/
pub fn print_record(record: &AggregatedRecord) {
    log::info!("Record at {} ({} batches):", record.captured_at, record.batches);
    log::info!("  {:<6} {:>10} {:>8} {:>7}", "", "Watts", "Amps", "PF");
    for channel in &record.channels {
        log::info!(
            "  {:<6} {:>10.2} {:>8.3} {:>7.4}",
            channel.channel.to_string(),
            channel.real_power,
            channel.rms_current,
            channel.power_factor
        );
    }
    log::info!(
        "  {:<6} {:>10.2} {:>8.3}",
        "home",
        record.home_consumption.power,
        record.home_consumption.current
    );
    log::info!(
        "  {:<6} {:>10.2} {:>8.3} {:>7.4}",
        "solar",
        record.production.power,
        record.production.current,
        record.production.power_factor
    );
    log::info!("  Net: {:.2} W ({})", record.net.power, record.net_status.as_str());
    log::info!("  Voltage: {:.2} V\n", record.voltage);
}

pub fn print_calibration(calibration: &PhaseCalibration) {
    log::info!("Calibration of {}:", calibration.channel);
    log::info!("  Initial power factor: {:.4}", calibration.initial_power_factor);
    for candidate in &calibration.candidates {
        log::debug!("  Candidate {:.4}: PF {:.6}", candidate.coefficient, candidate.power_factor);
    }
    log::info!("  Tied candidates: {}", calibration.candidates.len());
    log::info!("  Recommended coefficient: {:.8}\n", calibration.recommended);
}

pub fn print_verification(verification: &Verification) {
    log::info!("Verification of {} at {:.8}:", verification.channel, verification.coefficient);
    log::info!("  Real power: {:.3} W", verification.result.real_power);
    log::info!("  Current: {:.3} A", verification.result.rms_current);
    log::info!("  Voltage: {:.3} V", verification.result.rms_voltage);
    log::info!("  Power factor: {:.4}\n", verification.result.power_factor);
}
