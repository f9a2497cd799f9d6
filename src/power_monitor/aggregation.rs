use std::collections::VecDeque;
use std::sync::atomic::{AtomicBool, Ordering};

use super::error::{EngineError, Result};
use super::persistence::Persistence;
use super::print::{print_batch_results, print_record};
use super::sampler::{BoardVoltageSensor, Sampler};
use super::types::*;

/// Collects batch results until a window is full, then averages them.
#[derive(Debug, Clone)]
pub struct Aggregator {
    window: usize,
    threshold_watts: f64,
    results: Vec<BatchResults>,
}

impl Aggregator {
    pub fn new(window: usize, threshold_watts: f64) -> Self {
        Self {
            window: window.max(1),
            threshold_watts,
            results: Vec::with_capacity(window.max(1)),
        }
    }

    pub fn len(&self) -> usize {
        self.results.len()
    }

    pub fn is_empty(&self) -> bool {
        self.results.is_empty()
    }

    /// Add one batch. Returns the averaged record when this batch completes the window.
    pub fn push(&mut self, results: BatchResults) -> Option<AggregatedRecord> {
        self.results.push(results);
        if self.results.len() < self.window {
            return None;
        }

        let record = average(&self.results, self.threshold_watts);
        self.results.clear();
        Some(record)
    }
}

fn mean(values: impl Iterator<Item = f64>) -> f64 {
    let (sum, count) = values.fold((0.0, 0usize), |(sum, count), v| (sum + v, count + 1));
    if count == 0 {
        0.0
    } else {
        sum / count as f64
    }
}

/// RMS current carrying the direction of the channel's power flow.
fn signed_current(channel: &ChannelAverage) -> f64 {
    if channel.real_power < 0.0 {
        -channel.rms_current
    } else {
        channel.rms_current
    }
}

/*
* @brief Average a full window of batch results into one record.
* @param window Batch results in capture order, all from the same channel table
* @param threshold_watts Production below this is reported as zero
* @note The record carries the timestamp of the first batch.
* @note Home and net current are summed with the sign of each channel's power, exporting CTs subtract.
*/
pub fn average(window: &[BatchResults], threshold_watts: f64) -> AggregatedRecord {
    let Some(first) = window.first() else {
        return AggregatedRecord {
            captured_at: chrono::Utc::now(),
            batches: 0,
            channels: Vec::new(),
            voltage: 0.0,
            home_consumption: Totals::default(),
            production: ProductionTotals::default(),
            net: Totals::default(),
            net_status: NetStatus::NoData,
        };
    };

    let channels: Vec<ChannelAverage> = first
        .channels
        .iter()
        .enumerate()
        .map(|(index, channel)| {
            let samples = || window.iter().filter_map(move |batch| batch.channels.get(index));
            ChannelAverage {
                channel: channel.channel,
                role: channel.role,
                real_power: mean(samples().map(|c| c.power.real_power)),
                rms_current: mean(samples().map(|c| c.power.rms_current)),
                power_factor: mean(samples().map(|c| c.power.power_factor)),
            }
        })
        .collect();

    let home_consumption = Totals {
        power: channels.iter().map(|c| c.real_power).sum(),
        current: channels.iter().map(signed_current).sum(),
    };

    let producers: Vec<&ChannelAverage> = channels.iter().filter(|c| c.role == ChannelRole::Production).collect();
    let mut production = ProductionTotals {
        power: producers.iter().map(|c| c.real_power).sum(),
        current: producers.iter().map(|c| c.rms_current).sum(),
        power_factor: mean(producers.iter().map(|c| c.power_factor)),
    };
    if production.power < threshold_watts {
        production = ProductionTotals::default();
    } else if production.power > 0.0 {
        production.current = -production.current;
    }

    AggregatedRecord {
        captured_at: first.captured_at,
        batches: window.len(),
        voltage: mean(window.iter().map(BatchResults::voltage)),
        net: home_consumption,
        net_status: NetStatus::from_power(home_consumption.power),
        home_consumption,
        production,
        channels,
    }
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct LoopStats {
    pub iterations: u64,
    pub batches: u64,
    pub acquisition_errors: u64,
    pub records_written: u64,
    pub records_dropped: u64,
}

/// Steady-state loop: sample, compute, average, persist.
pub struct AggregationLoop<'a, S, B, P> {
    monitor: &'a PowerMonitor,
    sampler: S,
    board: B,
    persistence: P,
    aggregator: Aggregator,
    pending: VecDeque<AggregatedRecord>,
    max_pending: usize,
    report: bool,
    stats: LoopStats,
}

impl<'a, S: Sampler, B: BoardVoltageSensor, P: Persistence> AggregationLoop<'a, S, B, P> {
    pub fn new(monitor: &'a PowerMonitor, sampler: S, board: B, persistence: P) -> Self {
        let config = &monitor.config;
        Self {
            monitor,
            sampler,
            board,
            persistence,
            aggregator: Aggregator::new(config.sampling.average_window, config.production.threshold_watts),
            pending: VecDeque::new(),
            max_pending: config.output.max_pending.max(1),
            report: false,
            stats: LoopStats::default(),
        }
    }

    /// Log every batch and every record as they are produced.
    pub fn with_report(mut self, report: bool) -> Self {
        self.report = report;
        self
    }

    pub fn stats(&self) -> LoopStats {
        self.stats
    }

    pub fn pending(&self) -> usize {
        self.pending.len()
    }

    /// Batches of the window still being filled.
    pub fn buffered(&self) -> usize {
        self.aggregator.len()
    }

    pub fn into_persistence(self) -> P {
        self.persistence
    }

    /*
    * @brief Run until shutdown is raised, `max_batches` iterations pass, or a fatal error occurs.
    * @param shutdown Checked between batches
    * @param max_batches Optional iteration limit
    * @return Loop counters, after persistence has been closed
    * @note Persistence is closed on every exit path.
    */
    pub fn run(&mut self, shutdown: &AtomicBool, max_batches: Option<u64>) -> Result<LoopStats> {
        let outcome = self.drive(shutdown, max_batches);

        if !self.aggregator.is_empty() {
            log::warn!(
                "Discarding {} batch(es) of an incomplete averaging window",
                self.aggregator.len()
            );
        }
        if !self.pending.is_empty() {
            log::error!("Shutting down with {} unwritten record(s)", self.pending.len());
        }
        let closed = self.persistence.close();

        outcome?;
        closed?;
        Ok(self.stats)
    }

    fn drive(&mut self, shutdown: &AtomicBool, max_batches: Option<u64>) -> Result<()> {
        while !shutdown.load(Ordering::Relaxed) {
            if max_batches.is_some_and(|max| self.stats.iterations >= max) {
                break;
            }
            self.stats.iterations += 1;

            match self.step() {
                Ok(()) => {}
                Err(err) if !err.is_fatal() => {
                    self.stats.acquisition_errors += 1;
                    log::warn!("{}; skipping batch", err);
                }
                Err(err) => return Err(err),
            }
        }

        if shutdown.load(Ordering::Relaxed) {
            log::info!("Shutdown requested, stopping after {} batch(es)", self.stats.batches);
        }
        Ok(())
    }

    /// One iteration. Only acquisition failures come back non-fatal.
    fn step(&mut self) -> Result<()> {
        let board_voltage = self.board.read()?;
        let batch = self.sampler.read_batch(self.monitor.config.sampling.batch_size)?;

        let results = self.monitor.process_batch(&batch, board_voltage)?;
        self.stats.batches += 1;
        if self.report {
            print_batch_results(&results);
        }

        if let Some(record) = self.aggregator.push(results) {
            if self.report {
                print_record(&record);
            }
            self.persist(record)?;
        }
        Ok(())
    }

    /// Queue the record behind anything still pending and flush in order.
    fn persist(&mut self, record: AggregatedRecord) -> Result<()> {
        self.pending.push_back(record);

        while let Some(next) = self.pending.front() {
            match self.persistence.write(next) {
                Ok(()) => {
                    self.pending.pop_front();
                    self.stats.records_written += 1;
                }
                Err(err @ EngineError::Write { fatal: true, .. }) => return Err(err),
                Err(err) => {
                    log::error!("{}; {} record(s) pending", err, self.pending.len());
                    break;
                }
            }
        }

        while self.pending.len() > self.max_pending {
            if let Some(dropped) = self.pending.pop_front() {
                self.stats.records_dropped += 1;
                log::error!(
                    "Dropped record captured at {} after repeated write failures",
                    dropped.captured_at
                );
            }
        }
        Ok(())
    }
}
