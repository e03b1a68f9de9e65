//! 6820 PIA as wired on the Apple-1: ASCII keyboard on port A, terminal on port B
//!
//! ```text
//! $D010  KBD    read: key code with bit 7 set, consumes the key; 0 if none
//! $D011  KBDCR  read: bit 7 set while a key is waiting
//! $D012  DSP    read: bit 7 set while the display is busy
//!               write: 7-bit character to the terminal
//! $D013  DSPCR  read: same busy bit as DSP
//! ```
//!
//! Only the behavior the Woz monitor and BASIC depend on is modelled. Data direction
//! and control register writes are accepted and ignored.
//!
//! The keyboard latch holds a single key. A new keypress replaces an unread one, the
//! same way the real latch does when the operator types faster than software polls.

use std::cell::Cell;
use std::time::Duration;

use emu_core::logging::{log, LogCategory, LogLevel};

use crate::terminal::Terminal;

pub const KBD: u16 = 0xD010;
pub const KBDCR: u16 = 0xD011;
pub const DSP: u16 = 0xD012;
pub const DSPCR: u16 = 0xD013;

/// Bit 7 flags "key ready" on KBDCR and "busy" on DSP/DSPCR
const STATUS_BIT: u8 = 0x80;

/// Carriage return as the monitor sends it (after masking bit 7)
pub const CARRIAGE_RETURN: u8 = 0x0D;

/// The terminal only has glyphs for upper-case ASCII
const PRINTABLE: std::ops::RangeInclusive<u8> = 0x20..=0x5F;

/// How long the display stays busy after a character is written
pub const DISPLAY_BUSY: Duration = Duration::from_nanos(1_700);

#[derive(Debug, Default)]
pub struct Pia {
    /// Pending 7-bit key code; reads are `&self`, so the latch lives in a Cell
    key: Cell<Option<u8>>,
    /// The display reports busy until strictly after this instant
    display_ready_at: Option<Duration>,
}

impl Pia {
    pub fn new() -> Self {
        Self::default()
    }

    /// Latch a key from the host, replacing any key software has not read yet.
    pub fn set_pending_key(&mut self, ch: u8) {
        let code = ch & 0x7F;
        if let Some(lost) = self.key.replace(Some(code)) {
            log(LogCategory::Pia, LogLevel::Trace, || {
                format!("PIA: key {:02X} overwritten by {:02X}", lost, code)
            });
        }
    }

    pub fn key_pending(&self) -> bool {
        self.key.get().is_some()
    }

    pub fn pending_key(&self) -> Option<u8> {
        self.key.get()
    }

    /// Put the latch back exactly as a save state recorded it
    pub fn restore_key(&mut self, key: Option<u8>) {
        self.key.set(key.map(|code| code & 0x7F));
    }

    pub fn display_busy(&self, now: Duration) -> bool {
        self.display_ready_at.is_some_and(|ready| now <= ready)
    }

    /// Register read. Reading KBD consumes the pending key.
    pub fn read(&self, addr: u16, now: Duration) -> u8 {
        match addr {
            KBD => match self.key.take() {
                Some(code) => {
                    log(LogCategory::Pia, LogLevel::Trace, || {
                        format!("PIA: KBD read {:02X}", code | STATUS_BIT)
                    });
                    code | STATUS_BIT
                }
                None => 0x00,
            },
            KBDCR => {
                if self.key_pending() {
                    STATUS_BIT
                } else {
                    0x00
                }
            }
            DSP | DSPCR => {
                if self.display_busy(now) {
                    STATUS_BIT
                } else {
                    0x00
                }
            }
            _ => 0x00,
        }
    }

    /// Register write. Only DSP has an effect.
    pub fn write<T: Terminal>(&mut self, addr: u16, val: u8, now: Duration, terminal: &mut T) {
        if addr != DSP {
            log(LogCategory::Pia, LogLevel::Trace, || {
                format!("PIA: ignored write {:02X} to {:04X}", val, addr)
            });
            return;
        }

        let ch = val & 0x7F;
        if ch == CARRIAGE_RETURN {
            terminal.new_line();
        } else if PRINTABLE.contains(&ch) {
            terminal.put_char(ch);
        }

        // A waiting key shortens the busy period to nothing
        let busy_for = if self.key_pending() {
            Duration::ZERO
        } else {
            DISPLAY_BUSY
        };
        self.display_ready_at = Some(now + busy_for);
        log(LogCategory::Pia, LogLevel::Trace, || {
            format!("PIA: DSP write {:02X}, busy for {:?}", ch, busy_for)
        });
    }
}
