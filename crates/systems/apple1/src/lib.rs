//! Apple-1 system implementation

#![allow(clippy::upper_case_acronyms)]

pub mod bus;
pub mod clock;
pub mod config;
pub mod keyboard;
pub mod pia;
pub mod rom;
pub mod terminal;

use emu_core::cpu_6502::{Cpu6502, Memory6502, Registers6502};
use emu_core::logging::{log, LogCategory, LogLevel};
use emu_core::System;
use serde_json::Value;
use thiserror::Error;

pub use bus::{Apple1Bus, MAX_RAM_SIZE};
pub use clock::{Clock, ManualClock, SystemClock};
pub use config::Apple1Config;
pub use keyboard::{host_key_to_apple, HostKey, KeyAction};
pub use rom::{RomError, RomImages};
pub use terminal::{NullTerminal, RecordingTerminal, Terminal, TerminalEvent};

const SAVE_STATE_VERSION: u64 = 1;
const SAVE_STATE_SYSTEM: &str = "apple1";

/// Largest tick budget; the headroom keeps the last instruction's overrun inside `u32`
pub const MAX_CYCLES_PER_TICK: u32 = u32::MAX - 7;

#[derive(Debug, Error)]
pub enum Apple1Error {
    #[error("RAM size {requested:#X} exceeds maximum {max:#X}")]
    RamTooLarge { requested: usize, max: usize },
    #[error("ROM error: {0}")]
    Rom(#[from] RomError),
    #[error("Cycles per tick must be non-zero")]
    ZeroTickBudget,
    #[error("Cycles per tick {requested} exceeds maximum {max}")]
    TickBudgetTooLarge { requested: u32, max: u32 },
    #[error("Address {addr:04X} is outside RAM ({ram_size:#X} bytes)")]
    OutsideRam { addr: u16, ram_size: usize },
    #[error("Image of {len} bytes at {addr:04X} does not fit in RAM ({ram_size:#X} bytes)")]
    ImageTooLarge {
        addr: u16,
        len: usize,
        ram_size: usize,
    },
    #[error("Region {start:04X}-{end:04X} is empty")]
    EmptyRegion { start: u16, end: u16 },
    #[error("Invalid save state: {0}")]
    InvalidState(String),
}

/// Apple-1 system
pub struct Apple1System<T: Terminal = NullTerminal, C: Clock = SystemClock> {
    cpu: Cpu6502<Apple1Bus<T, C>>,
    config: Apple1Config,
}

impl<T: Terminal, C: Clock> Apple1System<T, C> {
    /// Build the machine and reset it, so the CPU starts at the monitor entry point.
    pub fn new(
        config: Apple1Config,
        roms: RomImages,
        terminal: T,
        clock: C,
    ) -> Result<Self, Apple1Error> {
        if config.cycles_per_tick == 0 {
            return Err(Apple1Error::ZeroTickBudget);
        }
        if config.cycles_per_tick > MAX_CYCLES_PER_TICK {
            return Err(Apple1Error::TickBudgetTooLarge {
                requested: config.cycles_per_tick,
                max: MAX_CYCLES_PER_TICK,
            });
        }

        let bus = Apple1Bus::new(config.ram_size, roms, terminal, clock)?;
        let mut cpu = Cpu6502::new(bus);
        cpu.set_decimal_enabled(config.decimal_mode);

        let mut system = Self { cpu, config };
        system.reset();
        Ok(system)
    }

    /// Same as [`Apple1System::new`], validating raw ROM images first.
    pub fn from_images(
        config: Apple1Config,
        monitor: Vec<u8>,
        basic: Vec<u8>,
        terminal: T,
        clock: C,
    ) -> Result<Self, Apple1Error> {
        let roms = RomImages::new(monitor, basic)?;
        Self::new(config, roms, terminal, clock)
    }

    pub fn config(&self) -> &Apple1Config {
        &self.config
    }

    pub fn cpu(&self) -> &Cpu6502<Apple1Bus<T, C>> {
        &self.cpu
    }

    pub fn cpu_mut(&mut self) -> &mut Cpu6502<Apple1Bus<T, C>> {
        &mut self.cpu
    }

    pub fn bus(&self) -> &Apple1Bus<T, C> {
        &self.cpu.memory
    }

    pub fn bus_mut(&mut self) -> &mut Apple1Bus<T, C> {
        &mut self.cpu.memory
    }

    /// Total cycles executed since the last reset
    pub fn cycles(&self) -> u64 {
        self.cpu.cycles
    }

    /// Execute one instruction (or interrupt entry) and return its cycles.
    pub fn step(&mut self) -> u32 {
        self.cpu.step()
    }

    /// Step until at least `budget` cycles have run; returns the cycles actually run.
    pub fn run_cycles(&mut self, budget: u32) -> u32 {
        let mut executed = 0u32;
        while executed < budget {
            executed = executed.saturating_add(self.step());
        }
        executed
    }

    /// Latch a raw key code into the keyboard PIA
    pub fn press_key(&mut self, ch: u8) {
        self.bus_mut().set_pending_key(ch);
    }

    /// Apply a host key: latch it, or reset on Escape.
    ///
    /// Returns the action taken, `None` if the key has no Apple-1 equivalent.
    pub fn handle_key(&mut self, key: HostKey) -> Option<KeyAction> {
        let action = host_key_to_apple(key)?;
        match action {
            KeyAction::Key(code) => self.press_key(code),
            KeyAction::Reset => self.reset(),
        }
        Some(action)
    }

    pub fn set_irq(&mut self, active: bool) {
        self.cpu.set_irq(active);
    }

    pub fn nmi(&mut self) {
        self.cpu.nmi();
    }

    /// Bus read with full side effects (a KBD peek consumes the key)
    pub fn peek(&self, addr: u16) -> u8 {
        self.bus().read(addr)
    }

    pub fn poke(&mut self, addr: u16, val: u8) {
        self.bus_mut().write(addr, val);
    }

    /// Copy `image` into RAM starting at `addr`.
    pub fn load_ram_image(&mut self, addr: u16, image: &[u8]) -> Result<(), Apple1Error> {
        let ram_size = self.bus().ram_size();
        let start = addr as usize;
        if start >= ram_size {
            return Err(Apple1Error::OutsideRam { addr, ram_size });
        }
        let end = start + image.len();
        if end > ram_size {
            return Err(Apple1Error::ImageTooLarge {
                addr,
                len: image.len(),
                ram_size,
            });
        }

        self.bus_mut().ram_mut()[start..end].copy_from_slice(image);
        log(LogCategory::Bus, LogLevel::Info, || {
            format!("Loaded {} bytes at {:04X}", image.len(), addr)
        });
        Ok(())
    }

    /// Copy RAM from `start` to `end` inclusive.
    pub fn save_ram_region(&self, start: u16, end: u16) -> Result<Vec<u8>, Apple1Error> {
        if end <= start {
            return Err(Apple1Error::EmptyRegion { start, end });
        }
        let ram_size = self.bus().ram_size();
        if end as usize >= ram_size {
            return Err(Apple1Error::OutsideRam {
                addr: end,
                ram_size,
            });
        }
        Ok(self.bus().ram()[start as usize..=end as usize].to_vec())
    }

    /// Get debug information
    pub fn debug_info(&self) -> DebugInfo {
        DebugInfo {
            registers: self.cpu.registers(),
            cycles: self.cpu.cycles,
            ram_size: self.bus().ram_size(),
            key_pending: self.bus().key_pending(),
            display_busy: self.bus().display_busy(),
        }
    }
}

#[derive(Debug, Clone)]
pub struct DebugInfo {
    pub registers: Registers6502,
    pub cycles: u64,
    pub ram_size: usize,
    pub key_pending: bool,
    pub display_busy: bool,
}

fn invalid_state(err: serde_json::Error) -> Apple1Error {
    Apple1Error::InvalidState(err.to_string())
}

impl<T: Terminal, C: Clock> System for Apple1System<T, C> {
    type Error = Apple1Error;

    /// The reset button: CPU only. RAM, ROM and the keyboard latch are untouched.
    fn reset(&mut self) {
        self.cpu.reset();
    }

    fn step_tick(&mut self) -> Result<u32, Self::Error> {
        Ok(self.run_cycles(self.config.cycles_per_tick))
    }

    /// Display timing is wall-clock relative and is not saved; the display reads ready
    /// after a load.
    fn save_state(&self) -> Value {
        serde_json::json!({
            "version": SAVE_STATE_VERSION,
            "system": SAVE_STATE_SYSTEM,
            "cycles": self.cpu.cycles,
            "cpu": self.cpu.registers(),
            "irq": self.cpu.irq_line(),
            "ram": self.bus().ram(),
            "key": self.bus().pending_key(),
        })
    }

    fn load_state(&mut self, v: &Value) -> Result<(), Self::Error> {
        let version = v["version"].as_u64().unwrap_or(0);
        if version != SAVE_STATE_VERSION {
            return Err(Apple1Error::InvalidState(format!(
                "unsupported version {}",
                version
            )));
        }

        let system = v["system"].as_str().unwrap_or("");
        if system != SAVE_STATE_SYSTEM {
            return Err(Apple1Error::InvalidState(format!(
                "state is for system '{}'",
                system
            )));
        }

        let cycles: u64 = serde_json::from_value(v["cycles"].clone()).map_err(invalid_state)?;
        let irq: bool = serde_json::from_value(v["irq"].clone()).map_err(invalid_state)?;
        let registers: Registers6502 =
            serde_json::from_value(v["cpu"].clone()).map_err(invalid_state)?;
        let ram: Vec<u8> = serde_json::from_value(v["ram"].clone()).map_err(invalid_state)?;
        if ram.len() != self.bus().ram_size() {
            return Err(Apple1Error::InvalidState(format!(
                "RAM size {:#X} does not match machine ({:#X})",
                ram.len(),
                self.bus().ram_size()
            )));
        }
        let key: Option<u8> = serde_json::from_value(v["key"].clone()).map_err(invalid_state)?;

        self.cpu.set_registers(registers);
        self.cpu.cycles = cycles;
        self.cpu.set_irq(irq);
        self.bus_mut().ram_mut().copy_from_slice(&ram);
        self.bus_mut().restore_pending_key(key);
        Ok(())
    }

    fn supports_save_states(&self) -> bool {
        true
    }
}
