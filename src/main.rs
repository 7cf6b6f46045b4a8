use std::path::{Path, PathBuf};
use std::process::ExitCode;
use std::sync::Mutex;
use std::time::{Duration, Instant};

use clap::{Parser, Subcommand};
use tracing_subscriber::EnvFilter;
use tracing_subscriber::layer::SubscriberExt;
use tracing_subscriber::util::SubscriberInitExt;

use voxpanel::config::{CONFIG_ENV, default_config_path};
use voxpanel::display::{ConsoleSink, hardware_state, shutdown_sink};
use voxpanel::voice::{ChannelSource, LineSource, ProcessSource, TranscriberEnv};
use voxpanel::{
    Action, Config, Dispatcher, DispatcherHandle, DisplayFrame, Error, SignalEvent, Signals,
    TranscriptSource, select_sink,
};

/// voxpanel - voice-activated command dispatcher for small displays
#[derive(Parser)]
#[command(name = "voxpanel", version, about)]
struct Cli {
    /// Configuration file (JSON or TOML)
    #[arg(short, long, env = CONFIG_ENV)]
    config: Option<PathBuf>,

    /// Increase verbosity (-v, -vv, -vvv)
    #[arg(short, long, action = clap::ArgAction::Count)]
    verbose: u8,

    #[command(subcommand)]
    command: Option<Command>,
}

#[derive(Subcommand)]
enum Command {
    /// Listen for voice commands (default)
    Run,
    /// Validate the configuration and list its commands
    CheckConfig,
    /// Probe for display hardware and report what was found
    Probe,
    /// Show up to two lines on the display
    Show {
        /// First line
        line1: String,
        /// Second line
        line2: Option<String>,
        /// Seconds to keep the text up
        #[arg(long, default_value = "5")]
        hold: f64,
    },
    /// Dispatch one utterance as if it had been heard, printing to the console
    Dispatch {
        /// Utterance, including the wake word
        text: String,
    },
}

#[tokio::main]
async fn main() -> ExitCode {
    let cli = Cli::parse();
    let path = cli.config.clone().unwrap_or_else(default_config_path);

    // The file log is a config option, so load before logging is up
    let config = Config::load_or_default(&path);
    let log_file = config
        .as_ref()
        .ok()
        .filter(|c| c.advanced.enable_logging)
        .map(|c| c.advanced.log_file.clone());
    init_tracing(cli.verbose, log_file.as_deref());

    let config = match config {
        Ok(config) => config,
        Err(Error::Validation(errors)) => {
            tracing::error!(path = %path.display(), "invalid configuration");
            for error in errors.errors() {
                tracing::error!("  {error}");
            }
            return ExitCode::FAILURE;
        }
        Err(e) => {
            tracing::error!(path = %path.display(), "fatal: {e}");
            return ExitCode::FAILURE;
        }
    };

    match run(cli.command.unwrap_or(Command::Run), config).await {
        Ok(()) => ExitCode::SUCCESS,
        Err(e) => {
            tracing::error!("fatal: {e}");
            ExitCode::FAILURE
        }
    }
}

fn init_tracing(verbose: u8, log_file: Option<&Path>) {
    let filter = match verbose {
        0 => "info,voxpanel=info",
        1 => "info,voxpanel=debug",
        2 => "debug",
        _ => "trace",
    };
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(filter));

    let file_layer = log_file.and_then(|path| {
        match std::fs::OpenOptions::new().create(true).append(true).open(path) {
            Ok(file) => Some(
                tracing_subscriber::fmt::layer()
                    .with_ansi(false)
                    .with_writer(Mutex::new(file)),
            ),
            Err(e) => {
                eprintln!("cannot open log file {}: {e}", path.display());
                None
            }
        }
    });

    tracing_subscriber::registry()
        .with(filter)
        .with(tracing_subscriber::fmt::layer())
        .with(file_layer)
        .init();
}

async fn run(command: Command, config: Config) -> anyhow::Result<()> {
    match command {
        Command::Run => cmd_run(config).await,
        Command::CheckConfig => {
            cmd_check_config(&config);
            Ok(())
        }
        Command::Probe => cmd_probe(&config).await,
        Command::Show { line1, line2, hold } => cmd_show(&config, line1, line2, hold).await,
        Command::Dispatch { text } => cmd_dispatch(config, text).await,
    }
}

async fn cmd_run(config: Config) -> anyhow::Result<()> {
    tracing::info!(
        config = ?config.source,
        commands = config.commands.len(),
        "starting voxpanel"
    );
    let mut signals = Signals::install();

    let source: Box<dyn TranscriptSource> = match &config.voice.transcriber {
        Some(command) => Box::new(ProcessSource::spawn(
            command.as_str(),
            TranscriberEnv {
                model_path: config.voice.model_path.clone(),
                sample_rate: Some(config.voice.audio_sample_rate),
                chunk_size: Some(config.voice.audio_chunk_size),
            },
        )?),
        None => {
            tracing::info!("no transcriber configured, reading transcripts from stdin");
            Box::new(LineSource::stdin())
        }
    };

    // Dropping the probe releases any service lease it took
    let sink = tokio::select! {
        sink = select_sink(&config.hardware, &config.display) => sink,
        () = signals.shutdown() => {
            tracing::info!("shutdown requested while probing the display");
            return Ok(());
        }
    };
    let (dispatcher, handle) = Dispatcher::new(&config, sink)?;

    let signals = tokio::spawn(watch_signals(signals, handle, config.advanced.reload_on_sighup));
    dispatcher.run(source).await;
    signals.abort();

    Ok(())
}

/// Shut down on SIGINT/SIGTERM, reload commands on SIGHUP
async fn watch_signals(mut signals: Signals, handle: DispatcherHandle, reload_on_sighup: bool) {
    loop {
        match signals.recv().await {
            SignalEvent::Shutdown => break,
            SignalEvent::Reload if !reload_on_sighup => {
                tracing::debug!("SIGHUP ignored, reload disabled");
            }
            SignalEvent::Reload => match handle.reload_file() {
                Ok(()) => tracing::info!("configuration reloaded"),
                Err(e) => tracing::warn!(error = %e, "reload failed"),
            },
        }
    }

    handle.shutdown();
}

fn cmd_check_config(config: &Config) {
    match &config.source {
        Some(path) => println!("Configuration: {}", path.display()),
        None => println!("Configuration: defaults (no file)"),
    }
    println!("Wake words: {}", config.voice.wake_words.join(", "));
    println!();

    println!("Commands ({}):", config.commands.len());
    for command in config.commands.iter() {
        let aliases = if command.aliases.is_empty() {
            String::new()
        } else {
            format!(" (aliases: {})", command.aliases.join(", "))
        };
        println!("  {:<20} {}{aliases}", command.name, command.action.kind());
    }

    let mut programs: Vec<(&str, String)> = Vec::new();
    if let Some(driver) = &config.hardware.lcd_driver {
        programs.push(("lcd_driver", driver.clone()));
    }
    if let Some(driver) = &config.hardware.oled_driver {
        programs.push(("oled_driver", driver.clone()));
    }
    if let Some(transcriber) = &config.voice.transcriber {
        programs.push(("transcriber", transcriber.clone()));
    }
    for command in config.commands.iter() {
        if let Action::RunCommand(spec) = &command.action {
            programs.push(("run_command", spec.command.clone()));
        }
    }

    let missing: Vec<_> = programs
        .iter()
        .filter_map(|(what, line)| {
            let program = line.split_whitespace().next()?;
            which::which(program).is_err().then_some((what, program))
        })
        .collect();

    if !missing.is_empty() {
        println!();
        println!("Programs not found on PATH:");
        for (what, program) in missing {
            println!("  {what}: {program}");
        }
    }
}

async fn cmd_probe(config: &Config) -> anyhow::Result<()> {
    let mut signals = Signals::install();
    let sink = tokio::select! {
        sink = select_sink(&config.hardware, &config.display) => sink,
        () = signals.shutdown() => return Ok(()),
    };
    match hardware_state() {
        Some(variant) => println!("Display: {variant}"),
        None => println!("Display: {} (not recorded)", sink.variant()),
    }
    shutdown_sink(sink).await?;
    Ok(())
}

async fn cmd_show(
    config: &Config,
    line1: String,
    line2: Option<String>,
    hold: f64,
) -> anyhow::Result<()> {
    let hold = Duration::try_from_secs_f64(hold)
        .map_err(|_| anyhow::anyhow!("hold must be a non-negative number of seconds"))?;
    let mut signals = Signals::install();

    let mut sink = tokio::select! {
        sink = select_sink(&config.hardware, &config.display) => sink,
        () = signals.shutdown() => return Ok(()),
    };
    let frame = DisplayFrame::new(std::iter::once(line1).chain(line2)).with_hold(hold);
    sink.render(frame, Instant::now())?;

    let mut ticker = tokio::time::interval(Duration::from_millis(50));
    let until = Instant::now() + hold;
    while Instant::now() < until {
        tokio::select! {
            _ = ticker.tick() => sink.tick(Instant::now())?,
            () = signals.shutdown() => {
                tracing::info!("interrupted, clearing display");
                break;
            }
        }
    }

    shutdown_sink(sink).await?;
    Ok(())
}

async fn cmd_dispatch(config: Config, text: String) -> anyhow::Result<()> {
    let signals = Signals::install();
    let (dispatcher, handle) = Dispatcher::new(&config, Box::new(ConsoleSink::stdout()))?;
    let signals = tokio::spawn(watch_signals(signals, handle, false));

    let (sender, source) = ChannelSource::pair();
    sender.send(text).await?;
    drop(sender);

    // The source ends after the one utterance; run returns once its action is done
    dispatcher.run(Box::new(source)).await;
    signals.abort();
    Ok(())
}
