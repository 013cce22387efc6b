use std::fs;
use std::path::PathBuf;
use std::time::Duration;

use anyhow::{bail, Context, Result};
use clap::{Args, Parser, Subcommand, ValueEnum};
use crossbeam_channel::{after, select, tick};
use engine_core::{AudioSystem, EngineConfig, PassThrough, RateRatio, SubsystemConfig};
use io_backends::{
    make, AggregatedBackend, AudioDeviceBackend, BackendKind, DeviceInfo, FileBackedBackend, NonRealTimeBackend,
    Pacing, SignalSource, VirtualDevice,
};
use serde::Serialize;
use tracing_subscriber::EnvFilter;

fn main() -> Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::from_default_env())
        .with_writer(std::io::stderr)
        .try_init()
        .ok();

    let cli = Cli::parse();
    match cli.command {
        Commands::Devices(args) => list_devices(args),
        Commands::Run(args) => run(args),
    }
}

#[derive(Parser)]
#[command(author, version, about = "Real-time audio I/O engine tools")]
struct Cli {
    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// List the devices a backend offers.
    Devices(BackendArgs),
    /// Run pass-through sub-systems and print status reports as JSON lines.
    Run(RunArgs),
}

#[derive(Args)]
struct BackendArgs {
    #[arg(long, value_enum, default_value_t = BackendArg::Nrt)]
    backend: BackendArg,
    /// WAV file played as an input device (file and aggregated backends).
    #[arg(long)]
    input_wav: Vec<PathBuf>,
    /// Loop input files instead of ending the device at end of file.
    #[arg(long)]
    looped: bool,
    /// WAV file recorded from an output device (file and aggregated backends).
    #[arg(long)]
    output_wav: Vec<PathBuf>,
    /// Channels of each output file.
    #[arg(long, default_value_t = 2)]
    output_channels: usize,
    /// Sample rate of each output file.
    #[arg(long, default_value_t = 48_000)]
    output_rate: u32,
    /// Signal played by the virtual device (nrt and aggregated backends).
    #[arg(long, value_enum, default_value_t = SourceArg::Sine)]
    source: SourceArg,
}

#[derive(Args)]
struct RunArgs {
    #[command(flatten)]
    backend: BackendArgs,
    /// Engine configuration (JSON). Without sub-systems, one pass-through
    /// sub-system is created for `--device`.
    #[arg(long)]
    config: Option<PathBuf>,
    #[arg(long, default_value_t = 0)]
    device: usize,
    /// Seconds to run.
    #[arg(long, default_value_t = 2.0)]
    duration: f64,
    /// DSP frames per block.
    #[arg(long)]
    block: Option<usize>,
    /// Device frames per callback.
    #[arg(long)]
    cycle_frames: Option<usize>,
    /// Device cycles held by each buffer.
    #[arg(long)]
    cycles: Option<usize>,
    /// Signed rate-conversion ratio: N > 1 decimates, N < -1 interpolates.
    #[arg(long, allow_hyphen_values = true)]
    ratio: Option<i32>,
    #[arg(long)]
    meter_ms: Option<u32>,
    /// Milliseconds between host-queue polls.
    #[arg(long, default_value_t = 50)]
    poll_ms: u64,
}

#[derive(Clone, Copy, Debug, ValueEnum)]
enum BackendArg {
    Coreaudio,
    Alsa,
    File,
    Aggregated,
    Nrt,
}

impl From<BackendArg> for BackendKind {
    fn from(arg: BackendArg) -> Self {
        match arg {
            BackendArg::Coreaudio => BackendKind::CoreAudio,
            BackendArg::Alsa => BackendKind::Alsa,
            BackendArg::File => BackendKind::FileBacked,
            BackendArg::Aggregated => BackendKind::Aggregated,
            BackendArg::Nrt => BackendKind::NonRealTime,
        }
    }
}

#[derive(Clone, Copy, Debug, ValueEnum)]
enum SourceArg {
    Silence,
    Sine,
    Ramp,
    Noise,
}

impl From<SourceArg> for SignalSource {
    fn from(arg: SourceArg) -> Self {
        match arg {
            SourceArg::Silence => SignalSource::Silence,
            SourceArg::Sine => SignalSource::default(),
            SourceArg::Ramp => SignalSource::Ramp,
            SourceArg::Noise => SignalSource::Noise {
                amplitude: 0.25,
                seed: 0,
            },
        }
    }
}

fn file_backend(args: &BackendArgs) -> Result<FileBackedBackend> {
    let mut backend = FileBackedBackend::new().with_pacing(Pacing::Realtime);
    for path in &args.input_wav {
        backend
            .add_input(path, args.looped)
            .with_context(|| format!("failed to load {}", path.display()))?;
    }
    for path in &args.output_wav {
        backend.add_output(path, args.output_channels, args.output_rate);
    }
    Ok(backend)
}

fn virtual_backend(args: &BackendArgs) -> NonRealTimeBackend {
    NonRealTimeBackend::new(vec![VirtualDevice::new("virtual").with_source(args.source.into())])
}

fn build_backend(args: &BackendArgs) -> Result<Box<dyn AudioDeviceBackend>> {
    let backend: Box<dyn AudioDeviceBackend> = match args.backend {
        BackendArg::Nrt => Box::new(virtual_backend(args)),
        BackendArg::File => Box::new(file_backend(args)?),
        BackendArg::Aggregated => Box::new(
            AggregatedBackend::new()
                .with_member(Box::new(virtual_backend(args)))
                .with_member(Box::new(file_backend(args)?)),
        ),
        hardware => make(hardware.into()),
    };
    Ok(backend)
}

fn list_devices(args: BackendArgs) -> Result<()> {
    let backend = build_backend(&args)?;
    let devices = backend.devices().context("failed to enumerate devices")?;
    if devices.is_empty() {
        println!("No devices reported by the {} backend ({}).", backend.kind().label(), backend.name());
        return Ok(());
    }
    println!("Devices of the {} backend:", backend.kind().label());
    for device in devices {
        println!(
            "  [{}] {} - {} in / {} out, {} Hz, {} frames",
            device.index,
            device.name,
            device.input_channels,
            device.output_channels,
            device.sample_rate,
            device.cycle_frames
        );
    }
    Ok(())
}

/// Pass-through sub-system matching what `info` offers.
fn subsystem_for(info: &DeviceInfo) -> SubsystemConfig {
    let mut subsystem = SubsystemConfig::default()
        .with_sample_rate(info.sample_rate)
        .with_cycle(info.cycle_frames, SubsystemConfig::default().cycle_count);
    if info.input_channels > 0 {
        subsystem = subsystem.with_input(info.index);
    }
    if info.output_channels > 0 {
        subsystem = subsystem.with_output(info.index);
    }
    subsystem
}

fn apply_overrides(config: &mut EngineConfig, args: &RunArgs) {
    if let Some(meter_ms) = args.meter_ms {
        config.meter_ms = meter_ms;
    }
    for subsystem in &mut config.subsystems {
        if let Some(block) = args.block {
            subsystem.dsp_block_frames = block;
        }
        if let Some(frames) = args.cycle_frames {
            subsystem.device_cycle_frames = frames;
        }
        if let Some(cycles) = args.cycles {
            subsystem.cycle_count = cycles;
        }
        if let Some(ratio) = args.ratio {
            subsystem.rate_ratio = RateRatio::from(ratio);
        }
    }
}

#[derive(Serialize)]
struct FinalStats {
    subsystem: usize,
    #[serde(flatten)]
    stats: engine_core::SubsystemStats,
}

fn run(args: RunArgs) -> Result<()> {
    let backend = build_backend(&args.backend)?;
    let mut config = match &args.config {
        Some(path) => {
            let data = fs::read_to_string(path)
                .with_context(|| format!("failed to read configuration {}", path.display()))?;
            serde_json::from_str::<EngineConfig>(&data)
                .with_context(|| format!("{} is not a valid engine configuration", path.display()))?
        }
        None => EngineConfig::default(),
    };
    if config.subsystems.is_empty() {
        let info = backend
            .device(args.device)
            .with_context(|| format!("device {} is not available", args.device))?;
        config.subsystems.push(subsystem_for(&info));
    }
    apply_overrides(&mut config, &args);
    if !(args.duration.is_finite() && args.duration > 0.0) {
        bail!("duration must be a positive number of seconds");
    }

    let mut system = AudioSystem::new(backend);
    system
        .configure(config, |_| Box::new(PassThrough))
        .context("failed to configure the audio system")?;
    for index in 0..system.subsystem_count() {
        system
            .enable(index)
            .with_context(|| format!("failed to enable sub-system {index}"))?;
    }

    tracing::info!(
        subsystems = system.subsystem_count(),
        duration = args.duration,
        "engine running"
    );
    let poll = tick(Duration::from_millis(args.poll_ms.max(1)));
    let deadline = after(Duration::from_secs_f64(args.duration));
    let print = |system: &AudioSystem| -> Result<()> {
        let mut lines = Vec::new();
        system.drain(|message| lines.push(message));
        for message in lines {
            println!("{}", serde_json::to_string(&message)?);
        }
        Ok(())
    };
    loop {
        select! {
            recv(poll) -> _ => print(&system)?,
            recv(deadline) -> _ => break,
        }
    }

    for index in 0..system.subsystem_count() {
        system.disable(index)?;
    }
    print(&system)?;
    for index in 0..system.subsystem_count() {
        let stats = FinalStats {
            subsystem: index,
            stats: system.stats(index)?,
        };
        println!("{}", serde_json::to_string(&stats)?);
    }
    system.finalize();
    Ok(())
}
