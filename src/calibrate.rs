use std::io::{self, BufRead, Write};
use std::path::{Path, PathBuf};

use anyhow::Context;
use clap::Parser;

use power_monitor::config::DEFAULT_CONFIG_PATH;
use power_monitor::print::{print_calibration, print_verification};
use power_monitor::session::{CalibrationSession, Operator, Suggestion};
use power_monitor::source::{self, SourceKind};
use power_monitor::{Channel, EngineError, MonitorConfig, PowerMonitor};

/// Phase calibration of one CT channel
#[derive(Parser, Debug)]
#[command(author, version, about = "Find the phase correction of one CT", long_about = None)]
struct Args {
    #[arg(short, long, default_value = DEFAULT_CONFIG_PATH)]
    config: PathBuf,

    #[arg(short, long, value_enum, default_value_t = SourceKind::Simulate)]
    source: SourceKind,

    /// Capture file to replay
    #[arg(long)]
    capture: Option<PathBuf>,

    /// Channel to calibrate, asked for when omitted
    #[arg(long)]
    channel: Option<u8>,

    /// Assume a purely resistive load is connected
    #[arg(short, long)]
    yes: bool,

    #[arg(short, long)]
    verbose: bool,
}

/// Operator at the terminal.
struct Terminal {
    assume_resistive: bool,
    suggestion_path: PathBuf,
}

impl Terminal {
    fn ask(&self, question: &str) -> Result<String, EngineError> {
        print!("{} ", question);
        io::stdout().flush()?;

        let mut answer = String::new();
        io::stdin().lock().read_line(&mut answer)?;
        Ok(answer.trim().to_string())
    }
}

impl Operator for Terminal {
    fn confirm_resistive_load(&mut self, channel: Channel) -> Result<bool, EngineError> {
        if self.assume_resistive {
            return Ok(true);
        }
        println!("Calibration needs a purely resistive load on {} (kettle, heater, incandescent bulb).", channel);
        let answer = self.ask("Is one running now? [y/N]")?;
        Ok(matches!(answer.to_lowercase().as_str(), "y" | "yes"))
    }

    fn request_reversal(&mut self, channel: Channel) -> Result<(), EngineError> {
        println!("The power factor on {} is negative: the CT is clamped backwards.", channel);
        self.ask("Flip the CT on the wire, then press Enter.")?;
        Ok(())
    }

    fn report(&mut self, suggestion: &Suggestion) -> Result<(), EngineError> {
        print_calibration(&suggestion.calibration);
        suggestion.config.save(&self.suggestion_path)?;

        println!("Update the channel table with:");
        println!("    {}", suggestion.config_line);
        println!("A full config with the new value was written to {}", self.suggestion_path.display());
        Ok(())
    }
}

fn pick_channel(config: &MonitorConfig, requested: Option<u8>) -> anyhow::Result<Channel> {
    if let Some(id) = requested {
        return Ok(Channel(id));
    }

    let ids: Vec<String> = config.channels.iter().map(|c| c.id.0.to_string()).collect();
    print!("Channel to calibrate ({}): ", ids.join(", "));
    io::stdout().flush()?;

    let mut answer = String::new();
    io::stdin().lock().read_line(&mut answer)?;
    let id = answer
        .trim()
        .parse::<u8>()
        .with_context(|| format!("'{}' is not a channel number", answer.trim()))?;
    Ok(Channel(id))
}

fn suggestion_path(config: &Path) -> PathBuf {
    config.with_extension("suggested.yaml")
}

fn main() -> anyhow::Result<()> {
    let args = Args::parse();

    let level = if args.verbose { "debug" } else { "info" };
    env_logger::Builder::from_env(env_logger::Env::default().default_filter_or(level)).init();

    let config = if args.config.exists() {
        MonitorConfig::load(&args.config).with_context(|| format!("loading {}", args.config.display()))?
    } else {
        log::warn!("{} not found, using the default 6-channel board", args.config.display());
        MonitorConfig::default()
    };
    let monitor = PowerMonitor::new(config).context("invalid configuration")?;
    let source = source::open(&monitor.config, args.source, args.capture.as_deref())?;

    let channel = pick_channel(&monitor.config, args.channel)?;
    let operator = Terminal {
        assume_resistive: args.yes,
        suggestion_path: suggestion_path(&args.config),
    };

    let mut session = CalibrationSession::new(&monitor, source.sampler, source.board, operator, channel);
    let outcome = session.run().with_context(|| format!("calibrating {}", channel))?;

    print_verification(&outcome.verification);
    let path = monitor
        .config
        .output
        .capture_dir
        .join(format!("verification-{}.json", channel));
    if let Some(dir) = path.parent() {
        std::fs::create_dir_all(dir)?;
    }
    std::fs::write(&path, serde_json::to_string(&outcome.verification)?)
        .with_context(|| format!("writing {}", path.display()))?;
    log::info!("Verification waveform saved to {}", path.display());

    Ok(())
}
