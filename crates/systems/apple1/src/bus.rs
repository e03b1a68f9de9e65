//! Apple-1 memory bus implementation
//!
//! Decode order, first match wins:
//! $0000-(ram_size-1): RAM (at most $D00F bytes, so it never reaches the PIA)
//! $D010-$D013: PIA keyboard/display registers
//! $E000-$EFFF: Integer BASIC ROM
//! $FF00-$FFFB: Woz monitor ROM
//! $FFFC-$FFFD: reset vector, hardwired to $FF00
//! everything else: open bus, reads 0 and ignores writes

use emu_core::cpu_6502::Memory6502;
use emu_core::logging::{log, LogCategory, LogLevel};

use crate::clock::Clock;
use crate::pia::{Pia, DSPCR, KBD};
use crate::rom::RomImages;
use crate::terminal::Terminal;
use crate::Apple1Error;

/// Largest RAM that still ends below the PIA window
pub const MAX_RAM_SIZE: usize = 0xD00F;

pub const BASIC_BASE: u16 = 0xE000;
pub const BASIC_END: u16 = 0xEFFF;
pub const MONITOR_BASE: u16 = 0xFF00;
pub const MONITOR_END: u16 = 0xFFFB;

/// Where the hardwired reset vector points
pub const RESET_TARGET: u16 = 0xFF00;
const RESET_VECTOR_LO: u16 = 0xFFFC;
const RESET_VECTOR_HI: u16 = 0xFFFD;

const OPEN_BUS: u8 = 0x00;

/// Apple-1 memory bus
#[derive(Debug)]
pub struct Apple1Bus<T: Terminal, C: Clock> {
    ram: Vec<u8>,
    pia: Pia,
    roms: RomImages,
    terminal: T,
    clock: C,
}

impl<T: Terminal, C: Clock> Apple1Bus<T, C> {
    /// Create a bus with `ram_size` bytes of zeroed RAM.
    pub fn new(
        ram_size: usize,
        roms: RomImages,
        terminal: T,
        clock: C,
    ) -> Result<Self, Apple1Error> {
        if ram_size > MAX_RAM_SIZE {
            return Err(Apple1Error::RamTooLarge {
                requested: ram_size,
                max: MAX_RAM_SIZE,
            });
        }
        Ok(Self {
            ram: vec![0; ram_size],
            pia: Pia::new(),
            roms,
            terminal,
            clock,
        })
    }

    /// Raw RAM, bypassing address decoding
    pub fn ram(&self) -> &[u8] {
        &self.ram
    }

    pub fn ram_mut(&mut self) -> &mut [u8] {
        &mut self.ram
    }

    pub fn ram_size(&self) -> usize {
        self.ram.len()
    }

    pub fn roms(&self) -> &RomImages {
        &self.roms
    }

    /// Forward a keypress from the host. Lossy: an unread key is replaced.
    pub fn set_pending_key(&mut self, ch: u8) {
        self.pia.set_pending_key(ch);
    }

    pub fn key_pending(&self) -> bool {
        self.pia.key_pending()
    }

    /// The buffered key without consuming it
    pub fn pending_key(&self) -> Option<u8> {
        self.pia.pending_key()
    }

    pub(crate) fn restore_pending_key(&mut self, key: Option<u8>) {
        self.pia.restore_key(key);
    }

    pub fn display_busy(&self) -> bool {
        self.pia.display_busy(self.clock.now())
    }

    pub fn terminal(&self) -> &T {
        &self.terminal
    }

    pub fn terminal_mut(&mut self) -> &mut T {
        &mut self.terminal
    }

    pub fn clock(&self) -> &C {
        &self.clock
    }
}

impl<T: Terminal, C: Clock> Memory6502 for Apple1Bus<T, C> {
    fn read(&self, addr: u16) -> u8 {
        if (addr as usize) < self.ram.len() {
            return self.ram[addr as usize];
        }

        match addr {
            KBD..=DSPCR => self.pia.read(addr, self.clock.now()),
            BASIC_BASE..=BASIC_END => self.roms.basic()[(addr - BASIC_BASE) as usize],
            MONITOR_BASE..=MONITOR_END => self.roms.monitor()[(addr - MONITOR_BASE) as usize],
            RESET_VECTOR_LO => RESET_TARGET as u8,
            RESET_VECTOR_HI => (RESET_TARGET >> 8) as u8,
            _ => OPEN_BUS,
        }
    }

    fn write(&mut self, addr: u16, val: u8) {
        if (addr as usize) < self.ram.len() {
            self.ram[addr as usize] = val;
            return;
        }

        match addr {
            KBD..=DSPCR => {
                let now = self.clock.now();
                self.pia.write(addr, val, now, &mut self.terminal);
            }
            // ROM and open bus
            _ => log(LogCategory::Bus, LogLevel::Trace, || {
                format!("Bus: discarded write {:02X} to {:04X}", val, addr)
            }),
        }
    }
}
