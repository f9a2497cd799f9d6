use std::path::{Path, PathBuf};
use std::sync::atomic::AtomicBool;
use std::sync::Arc;
use std::time::Instant;

use anyhow::Context;
use clap::{Parser, Subcommand};
use signal_hook::consts::signal::{SIGINT, SIGTERM};

use power_monitor::capture::{self, Capture};
use power_monitor::config::DEFAULT_CONFIG_PATH;
use power_monitor::source::{self, Source, SourceKind};
use power_monitor::{AggregationLoop, LineProtocolWriter, MonitorConfig, PowerMonitor};

/// Power monitor CLI
#[derive(Parser, Debug)]
#[command(author, version, about = "CT power monitor", long_about = None)]
struct Args {
    /// YAML configuration, defaults apply when the file is missing
    #[arg(short, long, default_value = DEFAULT_CONFIG_PATH)]
    config: PathBuf,

    /// Where batches come from
    #[arg(short, long, value_enum, default_value_t = SourceKind::Simulate)]
    source: SourceKind,

    /// Capture file to replay
    #[arg(long)]
    capture: Option<PathBuf>,

    /// Log at debug level
    #[arg(short, long)]
    verbose: bool,

    #[command(subcommand)]
    mode: Option<Mode>,
}

#[derive(Subcommand, Debug, Clone, PartialEq)]
enum Mode {
    /// Sample, average and persist until interrupted
    Run {
        /// Stop after this many batches
        #[arg(long)]
        max_batches: Option<u64>,
    },
    /// Like run, also logging a results table every window
    Terminal {
        #[arg(long)]
        max_batches: Option<u64>,
    },
    /// Capture one batch for diagnostics and report the sample rate
    Debug {
        #[arg(short, long, default_value = "last-debug")]
        title: String,
    },
}

fn load_config(path: &Path) -> anyhow::Result<MonitorConfig> {
    if path.exists() {
        MonitorConfig::load(path).with_context(|| format!("loading {}", path.display()))
    } else {
        log::warn!("{} not found, using the default 6-channel board", path.display());
        Ok(MonitorConfig::default())
    }
}

/*
* @brief Capture one batch, report it and save it for later replay.
* @param title File stem of the capture inside the capture directory
*/
fn debug_capture(monitor: &PowerMonitor, source: &mut Source, title: &str) -> anyhow::Result<()> {
    let size = monitor.config.sampling.batch_size;
    let board_voltage = source.board.read()?;

    let start = Instant::now();
    let batch = source.sampler.read_batch(size)?;
    let elapsed = start.elapsed().as_secs_f64();

    let reads = size * (batch.channel_count() + 1);
    let sample_rate = (elapsed > 0.0).then(|| reads as f64 / elapsed);
    match sample_rate {
        Some(rate) => log::info!("Captured {} reads in {:.4} s ({:.0} samples/s)", reads, elapsed, rate),
        None => log::info!("Captured {} reads", reads),
    }

    let results = monitor.process_batch(&batch, board_voltage)?;
    monitor.print_results(&results);

    let path = monitor.config.output.capture_dir.join(format!("{}.json", title));
    let capture = Capture {
        board_voltage,
        sample_rate,
        batch,
    };
    capture::save(&capture, &path).with_context(|| format!("writing {}", path.display()))?;
    log::info!("Capture saved to {}", path.display());
    Ok(())
}

fn steady_loop(monitor: &PowerMonitor, source: &mut Source, max_batches: Option<u64>, report: bool) -> anyhow::Result<()> {
    let shutdown = Arc::new(AtomicBool::new(false));
    for signal in [SIGINT, SIGTERM] {
        signal_hook::flag::register(signal, Arc::clone(&shutdown)).context("registering shutdown signals")?;
    }

    let path = &monitor.config.output.path;
    let writer = LineProtocolWriter::open(path).with_context(|| format!("opening {}", path.display()))?;

    let mut steady = AggregationLoop::new(monitor, &mut source.sampler, &mut source.board, writer).with_report(report);
    let stats = steady.run(&shutdown, max_batches)?;

    log::info!(
        "Processed {} batch(es), wrote {} record(s), dropped {}, {} acquisition error(s)",
        stats.batches,
        stats.records_written,
        stats.records_dropped,
        stats.acquisition_errors
    );
    Ok(())
}

fn main() -> anyhow::Result<()> {
    let args = Args::parse();

    let level = if args.verbose { "debug" } else { "info" };
    env_logger::Builder::from_env(env_logger::Env::default().default_filter_or(level)).init();

    let config = load_config(&args.config)?;
    let monitor = PowerMonitor::new(config).context("invalid configuration")?;
    let mut source = source::open(&monitor.config, args.source, args.capture.as_deref())?;

    match args.mode.unwrap_or(Mode::Run { max_batches: None }) {
        Mode::Run { max_batches } => steady_loop(&monitor, &mut source, max_batches, false),
        Mode::Terminal { max_batches } => steady_loop(&monitor, &mut source, max_batches, true),
        Mode::Debug { title } => debug_capture(&monitor, &mut source, &title),
    }
}
