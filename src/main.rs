use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;

use anyhow::{bail, Context, Result};
use clap::Parser;

use filly_core::clock::{TempoEvent, TickGenerator};
use filly_core::config::EngineConfig;
use filly_core::engine::Engine;
use filly_core::engine::driver::{FrameLoop, MidiPump};
use filly_core::host::{BmpHeaderDecoder, CountingRenderer, DirectoryLoader, SystemPlaybackClock};
use filly_core::logger::{Logger, Severity};
use filly_core::vm::opcode::Program;
use filly_core::vm::runner::{RunOutcome, Runner};
use filly_core::{log_error, log_info, log_warn};

#[derive(Parser, Debug)]
#[command(
    version,
    about = "FILLY: runs compiled FILLY scripts.",
    long_about = "Runs a compiled FILLY program (JSON instruction stream) on the tick-driven engine,\n\
    either headless as fast as possible or in real time at the configured frame rate."
)]
struct Cli {
    /// Compiled program (JSON)
    #[arg(value_name = "PROGRAM")]
    program: PathBuf,

    /// Engine configuration (TOML)
    #[arg(short, long, value_name = "FILE")]
    config: Option<PathBuf>,

    /// Tempo map of the MIDI playback (JSON list of {tick, micros_per_beat})
    #[arg(short, long, value_name = "FILE")]
    tempo_map: Option<PathBuf>,

    /// Directory pictures and sounds are loaded from
    #[arg(short, long, value_name = "DIR")]
    assets: Option<PathBuf>,

    /// Tick as fast as possible instead of in real time
    #[arg(long)]
    headless: bool,

    /// Frame limit in headless mode
    #[arg(long, default_value_t = 36_000)]
    max_frames: u64,

    /// Stop after this many milliseconds
    #[arg(long, value_name = "MS")]
    timeout: Option<u64>,

    /// Length of the simulated MIDI playback in milliseconds (real-time mode)
    #[arg(long, value_name = "MS")]
    midi_length: Option<u64>,

    /// Minimum severity to log (fatal, error, warn, info, debug)
    #[arg(short, long)]
    log_level: Option<Severity>,

    /// Also write logs to the rotating log file
    #[arg(long)]
    log_file: bool,
}

fn main() -> Result<()> {
    let cli = Cli::parse();

    let mut config = match &cli.config {
        Some(path) => EngineConfig::load(path)?,
        None => EngineConfig::default(),
    };
    if let Some(ms) = cli.timeout {
        config.timeout_ms = Some(ms);
    }
    if let Some(level) = cli.log_level {
        config.log_level = level;
    }

    let logger = if cli.log_file {
        Logger::new_full(config.log_dir.clone())
    } else {
        Logger::new_standalone()
    }
    .with_level(config.log_level);

    let text = std::fs::read_to_string(&cli.program)
        .with_context(|| format!("unable to read {}", cli.program.display()))?;
    let program: Program = serde_json::from_str(&text)
        .with_context(|| format!("{} is not a compiled program", cli.program.display()))?;

    let midi = match &cli.tempo_map {
        Some(path) => {
            let text = std::fs::read_to_string(path)
                .with_context(|| format!("unable to read {}", path.display()))?;
            let map: Vec<TempoEvent> = serde_json::from_str(&text)
                .with_context(|| format!("{} is not a tempo map", path.display()))?;
            Some(TickGenerator::new(config.ppq, map)?)
        }
        None => None,
    };

    let engine = Engine::new(config.clone(), logger.clone());
    if let Some(dir) = &cli.assets {
        engine.set_asset_loader(Arc::new(DirectoryLoader::new(dir)));
        engine.set_image_decoder(Arc::new(BmpHeaderDecoder));
    }
    engine.load_program(program);

    if cli.headless {
        run_headless(&cli, engine, midi, &logger)
    } else {
        run_real_time(&cli, engine, midi, &logger)
    }
}

fn run_headless(cli: &Cli, engine: Engine, midi: Option<TickGenerator>, logger: &Logger) -> Result<()> {
    let mut runner = Runner::new().max_frames(cli.max_frames);
    if let Some(generator) = midi {
        runner = runner.midi(generator);
    }
    let result = runner.drive(&engine);
    for fault in &result.faults {
        log_error!(logger, "[!] {}", fault);
    }
    log_info!(
        logger,
        "[-] {:?} after {} frame tick(s), {} MIDI tick(s), {} drawing operation(s)",
        result.outcome,
        result.frame_ticks,
        result.midi_ticks,
        result.draw_ops
    );
    match result.outcome {
        RunOutcome::Completed | RunOutcome::FrameLimit => Ok(()),
        RunOutcome::Terminated(reason) => bail!("engine terminated: {}", reason),
    }
}

fn run_real_time(cli: &Cli, engine: Engine, midi: Option<TickGenerator>, logger: &Logger) -> Result<()> {
    let engine = Arc::new(engine);
    let pump = match midi {
        Some(generator) => {
            engine.start_midi(generator);
            let clock = SystemPlaybackClock::start(cli.midi_length.map(Duration::from_millis));
            Some(MidiPump::spawn(engine.clone(), clock).context("unable to start the MIDI pump")?)
        }
        None => None,
    };
    engine.start();
    let frame_loop = FrameLoop::spawn(engine.clone(), true).context("unable to start the frame loop")?;

    let mut renderer = CountingRenderer::default();
    let interval = engine.config().frame_interval();
    while !frame_loop.is_finished() {
        std::thread::sleep(interval);
        if let Err(e) = engine.render(&mut renderer, &mut ()) {
            log_warn!(logger, "[!] {}", e);
        }
        for fault in engine.drain_faults() {
            log_error!(logger, "[!] {}", fault);
        }
        for request in engine.drain_audio_requests() {
            log_info!(logger, "[~] {:?} playback requested: {}", request.kind, request.path);
        }
    }
    let status = frame_loop.join();
    if pump.is_some() {
        // The pump only stops on its own at the end of playback.
        engine.terminate();
    }
    if let Some(pump) = pump {
        pump.join();
    }
    log_info!(
        logger,
        "[-] Stopped after {} frame tick(s), {} drawing operation(s) rendered",
        status.frame_tick,
        renderer.draw_ops
    );
    match status.terminated {
        Some(reason) if !status.complete => bail!("engine terminated: {}", reason),
        _ => Ok(()),
    }
}
