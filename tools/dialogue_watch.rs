/// Dialogue watch: poll the emulator's dialogue buffer and rewrite it live.
///
/// Usage: dialogue_watch [--memory-file <path>] [--config <file.ron>] [--once [--dump] [--write]]
///
/// Watch mode (default) runs until Ctrl-C. One-shot mode reads the current
/// dialogue and prints it; with --write it also generates a new line and
/// writes it back.
use std::path::{Path, PathBuf};
use std::process::ExitCode;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;

use clap::Parser;
use tracing::{error, info, warn};

use dialogue_engine::bridge::capture::LatestFileCapture;
use dialogue_engine::bridge::chat::ChatBackend;
use dialogue_engine::bridge::generator::{self, GenerationRequest, Generator};
use dialogue_engine::bridge::transport::{read_until_marker, FileTransport, Transport};
use dialogue_engine::config::{BackendConfig, WatchConfig, MAX_READ_SIZE};
use dialogue_engine::core::codec;
use dialogue_engine::core::orchestrator::{Orchestrator, TickReport, WatchError};
use dialogue_engine::schema::glyph::PREFIX_BYTE;
use dialogue_engine::schema::gossip::RumorMill;
use dialogue_engine::schema::persona::{self, PersonaRegistry};
use dialogue_engine::telemetry;

const ONE_SHOT_CHUNK: usize = 256;

#[derive(Parser, Debug)]
#[command(author, version, about, long_about = None)]
struct Cli {
    /// Increase log verbosity.
    #[arg(short, long, action = clap::ArgAction::Count)]
    verbose: u8,
    /// Emulator RAM file (defaults to the first /dev/shm/dolphin-emu.* found).
    #[arg(long, env = "DOLPHIN_MEM_FILE", value_name = "PATH")]
    memory_file: Option<PathBuf>,
    /// Guest address the RAM file starts at.
    #[arg(long, value_parser = parse_address, default_value = "0x80000000")]
    base: u32,
    /// RON watch configuration.
    #[arg(long, value_name = "FILE")]
    config: Option<PathBuf>,
    /// Addresses to watch (hex or decimal).
    #[arg(long, num_args = 1.., value_parser = parse_address)]
    addresses: Vec<u32>,
    /// Seconds between polls.
    #[arg(long)]
    interval: Option<f64>,
    /// Bytes read per poll.
    #[arg(long)]
    size: Option<usize>,
    /// Report every tick, not only changes.
    #[arg(long)]
    print_all: bool,
    /// Generate on the poll thread instead of a worker.
    #[arg(long)]
    inline: bool,
    /// Directory an external tool drops screenshots into.
    #[arg(long, value_name = "DIR")]
    screenshots: Option<PathBuf>,
    /// villagers.json with persona profiles.
    #[arg(long, value_name = "FILE")]
    villagers: Option<PathBuf>,
    /// Read and print the current dialogue once, then exit.
    #[arg(long)]
    once: bool,
    /// With --once, hex dump the raw bytes.
    #[arg(long, requires = "once")]
    dump: bool,
    /// With --once, generate a new line and write it back.
    #[arg(short, long, requires = "once")]
    write: bool,
}

fn parse_address(raw: &str) -> Result<u32, String> {
    let raw = raw.trim();
    let parsed = match raw.strip_prefix("0x").or_else(|| raw.strip_prefix("0X")) {
        Some(hex) => u32::from_str_radix(hex, 16),
        None => raw.parse(),
    };
    parsed.map_err(|err| format!("bad address {raw:?}: {err}"))
}

fn main() -> ExitCode {
    let cli = Cli::parse();
    if let Err(err) = telemetry::init(cli.verbose) {
        eprintln!("logging setup failed: {err}");
    }
    match run(cli) {
        Ok(()) => ExitCode::SUCCESS,
        Err(err) => {
            error!(%err, "dialogue watch failed");
            ExitCode::FAILURE
        }
    }
}

fn run(cli: Cli) -> Result<(), WatchError> {
    let config = watch_config(&cli)?;
    let memory_file = cli
        .memory_file
        .clone()
        .or_else(find_dolphin_shm)
        .ok_or(WatchError::Missing("memory file (pass --memory-file)"))?;
    info!(path = %memory_file.display(), "using emulator memory");
    let transport: Arc<dyn Transport> = Arc::new(FileTransport::new(memory_file, cli.base));

    let backend = BackendConfig::from_process_env()?;
    let personas = load_personas(cli.villagers.as_deref().or(backend.villagers_json.as_deref()))?;
    let generator: Arc<dyn Generator> = Arc::new(ChatBackend::new(backend, personas)?);

    if cli.once {
        return one_shot(&cli, &config, transport.as_ref(), generator.as_ref());
    }

    let mut builder = Orchestrator::builder()
        .config(config)
        .transport(transport)
        .generator(generator)
        .gossip(Arc::new(RumorMill::new(rand::random())));
    if let Some(dir) = &cli.screenshots {
        builder = builder.screenshots(Arc::new(LatestFileCapture::new(dir)));
    }
    let mut orchestrator = builder.build()?;

    let running = Arc::new(AtomicBool::new(true));
    let flag = Arc::clone(&running);
    if let Err(err) = ctrlc::set_handler(move || flag.store(false, Ordering::SeqCst)) {
        warn!(%err, "could not install Ctrl-C handler");
    }
    orchestrator.run(&running, print_report)
}

fn watch_config(cli: &Cli) -> Result<WatchConfig, WatchError> {
    let mut config = match &cli.config {
        Some(path) => WatchConfig::load_from_ron(path)?,
        None => WatchConfig::default(),
    }
    .with_process_env()?;
    if !cli.addresses.is_empty() {
        config.addresses = cli.addresses.clone();
    }
    if let Some(secs) = cli.interval {
        config.poll_interval_ms = (secs.max(0.0) * 1000.0) as u64;
    }
    if let Some(size) = cli.size {
        config.read_size = size;
    }
    if cli.print_all {
        config.print_all = true;
    }
    if cli.inline {
        config.background_generation = false;
    }
    if cli.screenshots.is_some() {
        config.enable_screenshot = true;
    }
    Ok(config.validated()?)
}

fn load_personas(path: Option<&Path>) -> Result<PersonaRegistry, WatchError> {
    let mut registry = PersonaRegistry::new();
    let default = Path::new("villagers.json");
    match path {
        Some(path) => registry.load_from_json(path)?,
        None if default.exists() => registry.load_from_json(default)?,
        None => warn!("villagers.json not found; every speaker uses a neutral persona"),
    }
    Ok(registry)
}

fn find_dolphin_shm() -> Option<PathBuf> {
    std::fs::read_dir("/dev/shm")
        .ok()?
        .filter_map(Result::ok)
        .map(|entry| entry.path())
        .find(|path| {
            path.file_name()
                .and_then(|name| name.to_str())
                .is_some_and(|name| name.starts_with("dolphin-emu."))
        })
}

fn print_report(report: &TickReport) {
    println!("Did generate: {}", report.did_generate());
    let mut header = format!("Address 0x{:08X}", report.address);
    if let Some(speaker) = &report.speaker {
        header.push_str(&format!(" | Speaker: {speaker}"));
    }
    println!("\n--- {header} ---");
    println!("{}", report.text);
}

fn one_shot(
    cli: &Cli,
    config: &WatchConfig,
    transport: &dyn Transport,
    generator: &dyn Generator,
) -> Result<(), WatchError> {
    let address = config.addresses[0];
    transport.connect()?;
    println!("Reading from address 0x{address:08X} until end marker is found...");

    let markers: [&[u8]; 2] = [&[PREFIX_BYTE, 0x00], &[PREFIX_BYTE, 0x0D]];
    let raw = read_until_marker(transport, address, MAX_READ_SIZE, ONE_SHOT_CHUNK, &markers);
    if raw.is_empty() {
        println!("Failed to read memory.");
        return Ok(());
    }
    if cli.dump {
        print_hex_dump(address, &raw);
    }
    let current = codec::decode(&raw);
    println!("\nCurrent dialogue:\n{current}");
    if !cli.write {
        return Ok(());
    }

    let speaker = config
        .speaker_address
        .and_then(|addr| transport.read(addr, config.speaker_read_size).ok())
        .and_then(|raw| persona::parse_speaker(&raw));
    let request = GenerationRequest::new(speaker.as_deref());
    let line = match generator.generate(&request) {
        Ok(line) => line,
        Err(err) => {
            warn!(%err, "generation failed, using a fallback line");
            generator::fallback_line(&mut rand::thread_rng()).to_string()
        }
    };
    println!("\nGenerated ({}):\n{line}", request.speaker);

    transport.write(address, &codec::encode(&line))?;
    println!("\nWrote new dialogue to 0x{address:08X}.");
    Ok(())
}

fn print_hex_dump(address: u32, data: &[u8]) {
    for (row, chunk) in data.chunks(16).enumerate() {
        let hex: Vec<String> = chunk.iter().map(|b| format!("{b:02X}")).collect();
        println!("0x{:08X}: {}", address as usize + row * 16, hex.join(" "));
    }
}
