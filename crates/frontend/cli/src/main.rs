use anyhow::{Context, Result};
use clap::Parser;
use emu_apple1::keyboard::{keys_from_text, HostKey};
use emu_apple1::rom::{BASIC_ROM_SIZE, MONITOR_ROM_SIZE};
use emu_apple1::{Apple1Config, Apple1System, SystemClock, Terminal};
use emu_core::logging::{LogConfig, LogLevel};
use emu_core::System;
use log::{info, warn};
use std::collections::VecDeque;
use std::fs;
use std::io::{self, Write};
use std::path::PathBuf;
use std::thread;
use std::time::{Duration, Instant};

/// Host time covered by one tick (60 Hz)
const TICK_PERIOD: Duration = Duration::from_micros(16_667);

#[derive(Parser)]
#[command(name = "apple1", about = "Headless Apple-1 emulator")]
struct Args {
    /// Woz monitor ROM image (256 bytes)
    #[arg(long)]
    monitor: Option<PathBuf>,

    /// Integer BASIC ROM image (4096 bytes)
    #[arg(long)]
    basic: Option<PathBuf>,

    /// RAM size in bytes (overrides --config)
    #[arg(long)]
    ram: Option<usize>,

    /// JSON machine configuration
    #[arg(long)]
    config: Option<PathBuf>,

    /// Load a binary into RAM before starting, as hex ADDR:FILE (repeatable)
    #[arg(long, value_parser = parse_load)]
    load: Vec<(u16, PathBuf)>,

    /// Save RAM after the run, as hex START:END:FILE (END inclusive)
    #[arg(long, value_parser = parse_save)]
    save: Option<(u16, u16, PathBuf)>,

    /// Number of ticks to run
    #[arg(long, default_value_t = 600)]
    ticks: u32,

    /// Text to type, one key per tick; \n is Return and ESC presses reset
    #[arg(long)]
    input: Option<String>,

    /// Pace ticks to real time instead of running flat out
    #[arg(long, default_value_t = false)]
    realtime: bool,

    /// Core log level: off, error, warn, info, debug, trace
    #[arg(long, default_value = "off")]
    log_level: LogLevel,

    /// Send core log output to this file instead of stderr
    #[arg(long)]
    log_file: Option<PathBuf>,

    /// Dump a JSON save-state to this file after the run
    #[arg(long)]
    state: Option<PathBuf>,
}

fn parse_hex_addr(s: &str) -> Result<u16, String> {
    let digits = s.trim_start_matches('$').trim_start_matches("0x");
    u16::from_str_radix(digits, 16).map_err(|e| format!("bad address '{}': {}", s, e))
}

fn parse_load(s: &str) -> Result<(u16, PathBuf), String> {
    let (addr, file) = s
        .split_once(':')
        .ok_or_else(|| format!("expected ADDR:FILE, got '{}'", s))?;
    Ok((parse_hex_addr(addr)?, PathBuf::from(file)))
}

fn parse_save(s: &str) -> Result<(u16, u16, PathBuf), String> {
    let mut parts = s.splitn(3, ':');
    match (parts.next(), parts.next(), parts.next()) {
        (Some(start), Some(end), Some(file)) => Ok((
            parse_hex_addr(start)?,
            parse_hex_addr(end)?,
            PathBuf::from(file),
        )),
        _ => Err(format!("expected START:END:FILE, got '{}'", s)),
    }
}

/// Writes terminal output straight to stdout
struct StdoutTerminal {
    out: io::Stdout,
}

impl Terminal for StdoutTerminal {
    fn put_char(&mut self, ch: u8) {
        let mut out = self.out.lock();
        let _ = out.write_all(&[ch]);
        let _ = out.flush();
    }

    fn new_line(&mut self) {
        let mut out = self.out.lock();
        let _ = out.write_all(b"\n");
        let _ = out.flush();
    }
}

fn read_rom(path: Option<&PathBuf>, size: usize, name: &str) -> Result<Vec<u8>> {
    match path {
        Some(path) => {
            fs::read(path).with_context(|| format!("reading {} ROM {}", name, path.display()))
        }
        None => {
            warn!("No {} ROM given, mapping {} zero bytes", name, size);
            Ok(vec![0; size])
        }
    }
}

fn main() -> Result<()> {
    env_logger::init();
    let args = Args::parse();

    let log_config = LogConfig::global();
    log_config.set_global_level(args.log_level);
    if let Some(path) = args.log_file.as_ref() {
        log_config
            .set_log_file(path.clone())
            .with_context(|| format!("opening log file {}", path.display()))?;
    }

    let mut config = match args.config.as_ref() {
        Some(path) => {
            let json = fs::read_to_string(path)
                .with_context(|| format!("reading config {}", path.display()))?;
            Apple1Config::from_json(&json)?
        }
        None => Apple1Config::default(),
    };
    if let Some(ram) = args.ram {
        config.ram_size = ram;
    }

    let monitor = read_rom(args.monitor.as_ref(), MONITOR_ROM_SIZE, "monitor")?;
    let basic = read_rom(args.basic.as_ref(), BASIC_ROM_SIZE, "BASIC")?;
    let terminal = StdoutTerminal { out: io::stdout() };

    let mut sys = Apple1System::from_images(
        config.clone(),
        monitor,
        basic,
        terminal,
        SystemClock::new(),
    )?;
    println!("{}K RAM", config.ram_kib());

    for (addr, path) in &args.load {
        let image = fs::read(path).with_context(|| format!("reading {}", path.display()))?;
        sys.load_ram_image(*addr, &image)?;
        info!("Loaded {} ({} bytes) at {:04X}", path.display(), image.len(), addr);
    }

    let mut keys: VecDeque<HostKey> = args
        .input
        .as_deref()
        .map(keys_from_text)
        .unwrap_or_default()
        .into();

    let started = Instant::now();
    for tick in 0..args.ticks {
        if !sys.bus().key_pending() {
            if let Some(key) = keys.pop_front() {
                if sys.handle_key(key).is_none() {
                    warn!("Dropped key {:?}", key);
                }
            }
        }

        sys.step_tick()?;

        if args.realtime {
            let due = started + TICK_PERIOD * (tick + 1);
            if let Some(wait) = due.checked_duration_since(Instant::now()) {
                thread::sleep(wait);
            }
        }
    }
    println!();

    let debug = sys.debug_info();
    info!(
        "Ran {} ticks, {} cycles, PC={:04X}",
        args.ticks, debug.cycles, debug.registers.pc
    );

    if let Some((start, end, path)) = args.save.as_ref() {
        let data = sys.save_ram_region(*start, *end)?;
        fs::write(path, &data).with_context(|| format!("writing {}", path.display()))?;
        info!("Saved {:04X}-{:04X} to {}", start, end, path.display());
    }

    if let Some(path) = args.state.as_ref() {
        let state = sys.save_state();
        let mut f = fs::File::create(path)?;
        write!(f, "{}", serde_json::to_string_pretty(&state)?)?;
    }

    Ok(())
}
