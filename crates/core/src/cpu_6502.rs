//! MOS 6502 CPU core implementation
//!
//! An instruction-level interpreter: every call to [`Cpu6502::step`] runs one whole
//! instruction (or one interrupt entry) and reports the cycles it consumed, including the
//! page-crossing and branch-taken penalties of the NMOS part. Any machine built around the
//! 6502 plugs in by implementing the [`Memory6502`] trait.

use serde::{Deserialize, Serialize};

use crate::logging::{log, LogCategory, LogLevel};

/// Memory interface trait for the 6502 CPU
///
/// Systems using the 6502 must implement this trait to provide memory access.
/// Both operations are infallible: unmapped addresses are the implementor's business.
pub trait Memory6502 {
    /// Read a byte from memory at the given address
    fn read(&self, addr: u16) -> u8;

    /// Write a byte to memory at the given address
    fn write(&mut self, addr: u16, val: u8);
}

/// Status register bits (NV-BDIZC)
pub const FLAG_CARRY: u8 = 0x01;
pub const FLAG_ZERO: u8 = 0x02;
pub const FLAG_IRQ_DISABLE: u8 = 0x04;
pub const FLAG_DECIMAL: u8 = 0x08;
pub const FLAG_BREAK: u8 = 0x10;
pub const FLAG_UNUSED: u8 = 0x20;
pub const FLAG_OVERFLOW: u8 = 0x40;
pub const FLAG_NEGATIVE: u8 = 0x80;

pub const NMI_VECTOR: u16 = 0xFFFA;
pub const RESET_VECTOR: u16 = 0xFFFC;
pub const IRQ_VECTOR: u16 = 0xFFFE;

const STACK_PAGE: u16 = 0x0100;
const POWER_ON_SP: u8 = 0xFD;
const POWER_ON_STATUS: u8 = FLAG_UNUSED | FLAG_IRQ_DISABLE;

/// Cycles charged for an IRQ or NMI entry sequence.
pub const INTERRUPT_CYCLES: u32 = 7;

/// Undefined opcodes execute as a one-byte NOP of this cost.
pub const UNDEFINED_OPCODE_CYCLES: u32 = 2;

/// Operand addressing modes
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum AddrMode {
    Implied,
    Accumulator,
    Immediate,
    ZeroPage,
    ZeroPageX,
    ZeroPageY,
    Absolute,
    AbsoluteX,
    AbsoluteY,
    /// Only used by `JMP ($nnnn)`
    Indirect,
    /// `($zz,X)`
    IndirectX,
    /// `($zz),Y`
    IndirectY,
    Relative,
}

impl AddrMode {
    /// Number of operand bytes following the opcode
    pub const fn operand_len(self) -> u16 {
        match self {
            AddrMode::Implied | AddrMode::Accumulator => 0,
            AddrMode::Absolute
            | AddrMode::AbsoluteX
            | AddrMode::AbsoluteY
            | AddrMode::Indirect => 2,
            _ => 1,
        }
    }
}

/// Documented NMOS 6502 instructions
#[allow(clippy::upper_case_acronyms)]
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Instr {
    ADC,
    AND,
    ASL,
    BCC,
    BCS,
    BEQ,
    BIT,
    BMI,
    BNE,
    BPL,
    BRK,
    BVC,
    BVS,
    CLC,
    CLD,
    CLI,
    CLV,
    CMP,
    CPX,
    CPY,
    DEC,
    DEX,
    DEY,
    EOR,
    INC,
    INX,
    INY,
    JMP,
    JSR,
    LDA,
    LDX,
    LDY,
    LSR,
    NOP,
    ORA,
    PHA,
    PHP,
    PLA,
    PLP,
    ROL,
    ROR,
    RTI,
    RTS,
    SBC,
    SEC,
    SED,
    SEI,
    STA,
    STX,
    STY,
    TAX,
    TAY,
    TSX,
    TXA,
    TXS,
    TYA,
}

/// A decoded opcode: operation, addressing mode and base cycle cost
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Opcode {
    pub instr: Instr,
    pub mode: AddrMode,
    /// Base cost before page-crossing and branch penalties
    pub cycles: u8,
}

/// Decode one opcode byte. Returns `None` for the 105 undefined opcodes.
pub const fn decode(op: u8) -> Option<Opcode> {
    use AddrMode::*;
    use Instr::*;

    let (instr, mode, cycles) = match op {
        0x00 => (BRK, Implied, 7),
        0x01 => (ORA, IndirectX, 6),
        0x05 => (ORA, ZeroPage, 3),
        0x06 => (ASL, ZeroPage, 5),
        0x08 => (PHP, Implied, 3),
        0x09 => (ORA, Immediate, 2),
        0x0A => (ASL, Accumulator, 2),
        0x0D => (ORA, Absolute, 4),
        0x0E => (ASL, Absolute, 6),
        0x10 => (BPL, Relative, 2),
        0x11 => (ORA, IndirectY, 5),
        0x15 => (ORA, ZeroPageX, 4),
        0x16 => (ASL, ZeroPageX, 6),
        0x18 => (CLC, Implied, 2),
        0x19 => (ORA, AbsoluteY, 4),
        0x1D => (ORA, AbsoluteX, 4),
        0x1E => (ASL, AbsoluteX, 7),
        0x20 => (JSR, Absolute, 6),
        0x21 => (AND, IndirectX, 6),
        0x24 => (BIT, ZeroPage, 3),
        0x25 => (AND, ZeroPage, 3),
        0x26 => (ROL, ZeroPage, 5),
        0x28 => (PLP, Implied, 4),
        0x29 => (AND, Immediate, 2),
        0x2A => (ROL, Accumulator, 2),
        0x2C => (BIT, Absolute, 4),
        0x2D => (AND, Absolute, 4),
        0x2E => (ROL, Absolute, 6),
        0x30 => (BMI, Relative, 2),
        0x31 => (AND, IndirectY, 5),
        0x35 => (AND, ZeroPageX, 4),
        0x36 => (ROL, ZeroPageX, 6),
        0x38 => (SEC, Implied, 2),
        0x39 => (AND, AbsoluteY, 4),
        0x3D => (AND, AbsoluteX, 4),
        0x3E => (ROL, AbsoluteX, 7),
        0x40 => (RTI, Implied, 6),
        0x41 => (EOR, IndirectX, 6),
        0x45 => (EOR, ZeroPage, 3),
        0x46 => (LSR, ZeroPage, 5),
        0x48 => (PHA, Implied, 3),
        0x49 => (EOR, Immediate, 2),
        0x4A => (LSR, Accumulator, 2),
        0x4C => (JMP, Absolute, 3),
        0x4D => (EOR, Absolute, 4),
        0x4E => (LSR, Absolute, 6),
        0x50 => (BVC, Relative, 2),
        0x51 => (EOR, IndirectY, 5),
        0x55 => (EOR, ZeroPageX, 4),
        0x56 => (LSR, ZeroPageX, 6),
        0x58 => (CLI, Implied, 2),
        0x59 => (EOR, AbsoluteY, 4),
        0x5D => (EOR, AbsoluteX, 4),
        0x5E => (LSR, AbsoluteX, 7),
        0x60 => (RTS, Implied, 6),
        0x61 => (ADC, IndirectX, 6),
        0x65 => (ADC, ZeroPage, 3),
        0x66 => (ROR, ZeroPage, 5),
        0x68 => (PLA, Implied, 4),
        0x69 => (ADC, Immediate, 2),
        0x6A => (ROR, Accumulator, 2),
        0x6C => (JMP, Indirect, 5),
        0x6D => (ADC, Absolute, 4),
        0x6E => (ROR, Absolute, 6),
        0x70 => (BVS, Relative, 2),
        0x71 => (ADC, IndirectY, 5),
        0x75 => (ADC, ZeroPageX, 4),
        0x76 => (ROR, ZeroPageX, 6),
        0x78 => (SEI, Implied, 2),
        0x79 => (ADC, AbsoluteY, 4),
        0x7D => (ADC, AbsoluteX, 4),
        0x7E => (ROR, AbsoluteX, 7),
        0x81 => (STA, IndirectX, 6),
        0x84 => (STY, ZeroPage, 3),
        0x85 => (STA, ZeroPage, 3),
        0x86 => (STX, ZeroPage, 3),
        0x88 => (DEY, Implied, 2),
        0x8A => (TXA, Implied, 2),
        0x8C => (STY, Absolute, 4),
        0x8D => (STA, Absolute, 4),
        0x8E => (STX, Absolute, 4),
        0x90 => (BCC, Relative, 2),
        0x91 => (STA, IndirectY, 6),
        0x94 => (STY, ZeroPageX, 4),
        0x95 => (STA, ZeroPageX, 4),
        0x96 => (STX, ZeroPageY, 4),
        0x98 => (TYA, Implied, 2),
        0x99 => (STA, AbsoluteY, 5),
        0x9A => (TXS, Implied, 2),
        0x9D => (STA, AbsoluteX, 5),
        0xA0 => (LDY, Immediate, 2),
        0xA1 => (LDA, IndirectX, 6),
        0xA2 => (LDX, Immediate, 2),
        0xA4 => (LDY, ZeroPage, 3),
        0xA5 => (LDA, ZeroPage, 3),
        0xA6 => (LDX, ZeroPage, 3),
        0xA8 => (TAY, Implied, 2),
        0xA9 => (LDA, Immediate, 2),
        0xAA => (TAX, Implied, 2),
        0xAC => (LDY, Absolute, 4),
        0xAD => (LDA, Absolute, 4),
        0xAE => (LDX, Absolute, 4),
        0xB0 => (BCS, Relative, 2),
        0xB1 => (LDA, IndirectY, 5),
        0xB4 => (LDY, ZeroPageX, 4),
        0xB5 => (LDA, ZeroPageX, 4),
        0xB6 => (LDX, ZeroPageY, 4),
        0xB8 => (CLV, Implied, 2),
        0xB9 => (LDA, AbsoluteY, 4),
        0xBA => (TSX, Implied, 2),
        0xBC => (LDY, AbsoluteX, 4),
        0xBD => (LDA, AbsoluteX, 4),
        0xBE => (LDX, AbsoluteY, 4),
        0xC0 => (CPY, Immediate, 2),
        0xC1 => (CMP, IndirectX, 6),
        0xC4 => (CPY, ZeroPage, 3),
        0xC5 => (CMP, ZeroPage, 3),
        0xC6 => (DEC, ZeroPage, 5),
        0xC8 => (INY, Implied, 2),
        0xC9 => (CMP, Immediate, 2),
        0xCA => (DEX, Implied, 2),
        0xCC => (CPY, Absolute, 4),
        0xCD => (CMP, Absolute, 4),
        0xCE => (DEC, Absolute, 6),
        0xD0 => (BNE, Relative, 2),
        0xD1 => (CMP, IndirectY, 5),
        0xD5 => (CMP, ZeroPageX, 4),
        0xD6 => (DEC, ZeroPageX, 6),
        0xD8 => (CLD, Implied, 2),
        0xD9 => (CMP, AbsoluteY, 4),
        0xDD => (CMP, AbsoluteX, 4),
        0xDE => (DEC, AbsoluteX, 7),
        0xE0 => (CPX, Immediate, 2),
        0xE1 => (SBC, IndirectX, 6),
        0xE4 => (CPX, ZeroPage, 3),
        0xE5 => (SBC, ZeroPage, 3),
        0xE6 => (INC, ZeroPage, 5),
        0xE8 => (INX, Implied, 2),
        0xE9 => (SBC, Immediate, 2),
        0xEA => (NOP, Implied, 2),
        0xEC => (CPX, Absolute, 4),
        0xED => (SBC, Absolute, 4),
        0xEE => (INC, Absolute, 6),
        0xF0 => (BEQ, Relative, 2),
        0xF1 => (SBC, IndirectY, 5),
        0xF5 => (SBC, ZeroPageX, 4),
        0xF6 => (INC, ZeroPageX, 6),
        0xF8 => (SED, Implied, 2),
        0xF9 => (SBC, AbsoluteY, 4),
        0xFD => (SBC, AbsoluteX, 4),
        0xFE => (INC, AbsoluteX, 7),
        _ => return None,
    };
    Some(Opcode {
        instr,
        mode,
        cycles,
    })
}

/// Base cycle cost of an opcode, penalties excluded.
pub fn base_cycles(op: u8) -> u32 {
    decode(op).map_or(UNDEFINED_OPCODE_CYCLES, |o| o.cycles as u32)
}

/// Snapshot of the architectural registers, used for save states and debuggers
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct Registers6502 {
    pub a: u8,
    pub x: u8,
    pub y: u8,
    pub sp: u8,
    pub status: u8,
    pub pc: u16,
}

/// MOS 6502 CPU state and execution engine
///
/// This is a generic, reusable 6502 CPU implementation that works with any
/// system through the `Memory6502` trait.
#[derive(Debug)]
pub struct Cpu6502<M: Memory6502> {
    /// Accumulator register
    pub a: u8,
    /// X index register
    pub x: u8,
    /// Y index register
    pub y: u8,
    /// Stack pointer (points to 0x0100 + sp)
    pub sp: u8,
    /// Status register (NV-BDIZC)
    pub status: u8,
    /// Program counter
    pub pc: u16,
    /// Total cycles executed
    pub cycles: u64,
    /// Memory interface
    pub memory: M,
    /// Level of the IRQ input line
    irq_line: bool,
    /// Latched NMI edge, consumed by the next step
    nmi_pending: bool,
    /// Honor the D flag in ADC/SBC
    decimal_enabled: bool,
}

impl<M: Memory6502> Cpu6502<M> {
    /// Create a new 6502 CPU with the given memory interface.
    ///
    /// Decimal arithmetic is off until [`Cpu6502::set_decimal_enabled`] opts in.
    pub fn new(memory: M) -> Self {
        Self {
            a: 0,
            x: 0,
            y: 0,
            sp: POWER_ON_SP,
            status: POWER_ON_STATUS,
            pc: 0,
            cycles: 0,
            memory,
            irq_line: false,
            nmi_pending: false,
            decimal_enabled: false,
        }
    }

    /// Reset the CPU to initial state (preserves memory and the IRQ line level)
    pub fn reset(&mut self) {
        self.a = 0;
        self.x = 0;
        self.y = 0;
        self.sp = POWER_ON_SP;
        self.status = POWER_ON_STATUS;
        self.cycles = 0;
        self.nmi_pending = false;

        self.pc = self.read_u16(RESET_VECTOR);
        log(LogCategory::CPU, LogLevel::Debug, || {
            format!("CPU: reset, PC={:04X}", self.pc)
        });
    }

    /// Enable BCD correction of ADC/SBC while the D flag is set
    pub fn set_decimal_enabled(&mut self, enabled: bool) {
        self.decimal_enabled = enabled;
    }

    pub fn decimal_enabled(&self) -> bool {
        self.decimal_enabled
    }

    /// Drive the level-sensitive IRQ line.
    ///
    /// While asserted and the I flag is clear, the next `step` enters the IRQ handler
    /// instead of executing an instruction.
    pub fn set_irq(&mut self, active: bool) {
        self.irq_line = active;
    }

    pub fn irq_line(&self) -> bool {
        self.irq_line
    }

    /// Latch a non-maskable interrupt, serviced once on the next `step`.
    pub fn nmi(&mut self) {
        self.nmi_pending = true;
    }

    pub fn nmi_pending(&self) -> bool {
        self.nmi_pending
    }

    pub fn registers(&self) -> Registers6502 {
        Registers6502 {
            a: self.a,
            x: self.x,
            y: self.y,
            sp: self.sp,
            status: self.status,
            pc: self.pc,
        }
    }

    pub fn set_registers(&mut self, regs: Registers6502) {
        self.a = regs.a;
        self.x = regs.x;
        self.y = regs.y;
        self.sp = regs.sp;
        self.status = regs.status | FLAG_UNUSED;
        self.pc = regs.pc;
    }

    /// Read a byte from memory
    #[inline]
    fn read(&self, addr: u16) -> u8 {
        self.memory.read(addr)
    }

    /// Write a byte to memory
    #[inline]
    fn write(&mut self, addr: u16, val: u8) {
        self.memory.write(addr, val);
    }

    fn read_u16(&self, addr: u16) -> u16 {
        let lo = self.read(addr) as u16;
        let hi = self.read(addr.wrapping_add(1)) as u16;
        (hi << 8) | lo
    }

    /// Read a pointer from page zero; the high byte wraps to $00 after $FF.
    #[inline]
    fn read_zero_page_u16(&self, zp: u8) -> u16 {
        let lo = self.read(zp as u16) as u16;
        let hi = self.read(zp.wrapping_add(1) as u16) as u16;
        (hi << 8) | lo
    }

    #[inline]
    fn fetch_u8(&mut self) -> u8 {
        let v = self.read(self.pc);
        self.pc = self.pc.wrapping_add(1);
        v
    }

    #[inline]
    fn fetch_u16(&mut self) -> u16 {
        let lo = self.fetch_u8() as u16;
        let hi = self.fetch_u8() as u16;
        (hi << 8) | lo
    }

    /// Add an index to a base address, reporting whether the high byte changed.
    #[inline]
    fn indexed(base: u16, index: u8) -> (u16, bool) {
        let addr = base.wrapping_add(index as u16);
        (addr, (base ^ addr) & 0xFF00 != 0)
    }

    /// Read a 16-bit pointer for JMP (indirect) with the 6502 page-wrapping bug.
    #[inline]
    fn read_indirect_u16_bug(&self, addr: u16) -> u16 {
        let lo = self.read(addr) as u16;
        let hi_addr = (addr & 0xFF00) | ((addr.wrapping_add(1)) & 0x00FF);
        let hi = self.read(hi_addr) as u16;
        (hi << 8) | lo
    }

    /// Resolve the effective address of the current instruction's operand.
    ///
    /// Immediate operands resolve to the operand byte's own address. The flag is true when
    /// indexing crossed a page boundary.
    fn operand_address(&mut self, mode: AddrMode) -> (u16, bool) {
        match mode {
            AddrMode::Immediate => {
                let addr = self.pc;
                self.pc = self.pc.wrapping_add(1);
                (addr, false)
            }
            AddrMode::ZeroPage => (self.fetch_u8() as u16, false),
            AddrMode::ZeroPageX => (self.fetch_u8().wrapping_add(self.x) as u16, false),
            AddrMode::ZeroPageY => (self.fetch_u8().wrapping_add(self.y) as u16, false),
            AddrMode::Absolute => (self.fetch_u16(), false),
            AddrMode::AbsoluteX => {
                let base = self.fetch_u16();
                Self::indexed(base, self.x)
            }
            AddrMode::AbsoluteY => {
                let base = self.fetch_u16();
                Self::indexed(base, self.y)
            }
            AddrMode::Indirect => {
                let ptr = self.fetch_u16();
                (self.read_indirect_u16_bug(ptr), false)
            }
            AddrMode::IndirectX => {
                let zp = self.fetch_u8().wrapping_add(self.x);
                (self.read_zero_page_u16(zp), false)
            }
            AddrMode::IndirectY => {
                let zp = self.fetch_u8();
                let base = self.read_zero_page_u16(zp);
                Self::indexed(base, self.y)
            }
            // No memory operand
            AddrMode::Implied | AddrMode::Accumulator | AddrMode::Relative => (0, false),
        }
    }

    /// Fetch a read operand; the extra cycle is charged on a page crossing.
    #[inline]
    fn load(&mut self, mode: AddrMode) -> (u8, u32) {
        let (addr, crossed) = self.operand_address(mode);
        (self.read(addr), crossed as u32)
    }

    #[inline]
    fn store(&mut self, mode: AddrMode, val: u8) {
        let (addr, _) = self.operand_address(mode);
        self.write(addr, val);
    }

    /// Read-modify-write on the accumulator or a memory operand.
    fn modify(&mut self, mode: AddrMode, op: fn(&mut Self, u8) -> u8) {
        if mode == AddrMode::Accumulator {
            let a = self.a;
            self.a = op(self, a);
        } else {
            let (addr, _) = self.operand_address(mode);
            let val = self.read(addr);
            let result = op(self, val);
            self.write(addr, result);
        }
    }

    #[inline]
    fn push_u8(&mut self, v: u8) {
        let addr = STACK_PAGE | self.sp as u16;
        self.write(addr, v);
        self.sp = self.sp.wrapping_sub(1);
    }

    #[inline]
    fn pop_u8(&mut self) -> u8 {
        self.sp = self.sp.wrapping_add(1);
        let addr = STACK_PAGE | self.sp as u16;
        self.read(addr)
    }

    #[inline]
    fn push_u16(&mut self, v: u16) {
        self.push_u8((v >> 8) as u8);
        self.push_u8(v as u8);
    }

    #[inline]
    fn pop_u16(&mut self) -> u16 {
        let lo = self.pop_u8() as u16;
        let hi = self.pop_u8() as u16;
        (hi << 8) | lo
    }

    #[inline]
    fn set_flag(&mut self, flag: u8, on: bool) {
        if on {
            self.status |= flag;
        } else {
            self.status &= !flag;
        }
    }

    #[inline]
    fn flag(&self, flag: u8) -> bool {
        self.status & flag != 0
    }

    fn set_zero_and_negative(&mut self, v: u8) {
        self.set_flag(FLAG_ZERO, v == 0);
        self.set_flag(FLAG_NEGATIVE, v & 0x80 != 0);
    }

    /// Push PC and status (B clear) and jump through `vector`.
    fn enter_interrupt(&mut self, vector: u16) {
        self.push_u16(self.pc);
        self.push_u8((self.status & !FLAG_BREAK) | FLAG_UNUSED);
        self.status |= FLAG_IRQ_DISABLE;
        let from = self.pc;
        self.pc = self.read_u16(vector);
        log(LogCategory::Interrupts, LogLevel::Trace, || {
            format!(
                "CPU: {} at PC={:04X}, handler {:04X}",
                if vector == NMI_VECTOR { "NMI" } else { "IRQ" },
                from,
                self.pc
            )
        });
    }

    /// Take a pending interrupt at the instruction boundary, if any.
    fn service_interrupts(&mut self) -> Option<u32> {
        if self.nmi_pending {
            self.nmi_pending = false;
            self.enter_interrupt(NMI_VECTOR);
            return Some(INTERRUPT_CYCLES);
        }
        if self.irq_line && !self.flag(FLAG_IRQ_DISABLE) {
            self.enter_interrupt(IRQ_VECTOR);
            return Some(INTERRUPT_CYCLES);
        }
        None
    }

    /// Execute one instruction and return cycles used.
    pub fn step(&mut self) -> u32 {
        let cycles = match self.service_interrupts() {
            Some(cycles) => cycles,
            None => {
                let op = self.fetch_u8();
                match decode(op) {
                    Some(opcode) => opcode.cycles as u32 + self.execute(opcode),
                    None => {
                        // Undefined opcode: one-byte NOP
                        log(LogCategory::Stubs, LogLevel::Debug, || {
                            format!(
                                "CPU: undefined opcode {:02X} at PC={:04X} a={:02X} x={:02X} y={:02X} sp={:02X} p={:02X}",
                                op,
                                self.pc.wrapping_sub(1),
                                self.a,
                                self.x,
                                self.y,
                                self.sp,
                                self.status
                            )
                        });
                        UNDEFINED_OPCODE_CYCLES
                    }
                }
            }
        };
        self.cycles = self.cycles.wrapping_add(cycles as u64);
        cycles
    }

    /// Run a decoded instruction; returns the penalty cycles on top of the base cost.
    fn execute(&mut self, opcode: Opcode) -> u32 {
        let mode = opcode.mode;
        match opcode.instr {
            Instr::LDA => {
                let (v, extra) = self.load(mode);
                self.a = v;
                self.set_zero_and_negative(v);
                extra
            }
            Instr::LDX => {
                let (v, extra) = self.load(mode);
                self.x = v;
                self.set_zero_and_negative(v);
                extra
            }
            Instr::LDY => {
                let (v, extra) = self.load(mode);
                self.y = v;
                self.set_zero_and_negative(v);
                extra
            }
            Instr::STA => {
                self.store(mode, self.a);
                0
            }
            Instr::STX => {
                self.store(mode, self.x);
                0
            }
            Instr::STY => {
                self.store(mode, self.y);
                0
            }
            Instr::ORA => {
                let (v, extra) = self.load(mode);
                self.a |= v;
                self.set_zero_and_negative(self.a);
                extra
            }
            Instr::AND => {
                let (v, extra) = self.load(mode);
                self.a &= v;
                self.set_zero_and_negative(self.a);
                extra
            }
            Instr::EOR => {
                let (v, extra) = self.load(mode);
                self.a ^= v;
                self.set_zero_and_negative(self.a);
                extra
            }
            Instr::ADC => {
                let (v, extra) = self.load(mode);
                self.adc(v);
                extra
            }
            Instr::SBC => {
                let (v, extra) = self.load(mode);
                self.sbc(v);
                extra
            }
            Instr::CMP => {
                let (v, extra) = self.load(mode);
                self.compare(self.a, v);
                extra
            }
            Instr::CPX => {
                let (v, _) = self.load(mode);
                self.compare(self.x, v);
                0
            }
            Instr::CPY => {
                let (v, _) = self.load(mode);
                self.compare(self.y, v);
                0
            }
            Instr::BIT => {
                let (v, _) = self.load(mode);
                self.set_flag(FLAG_ZERO, self.a & v == 0);
                self.set_flag(FLAG_NEGATIVE, v & 0x80 != 0);
                self.set_flag(FLAG_OVERFLOW, v & 0x40 != 0);
                0
            }
            Instr::ASL => {
                self.modify(mode, Self::asl);
                0
            }
            Instr::LSR => {
                self.modify(mode, Self::lsr);
                0
            }
            Instr::ROL => {
                self.modify(mode, Self::rol);
                0
            }
            Instr::ROR => {
                self.modify(mode, Self::ror);
                0
            }
            Instr::INC => {
                self.modify(mode, |cpu, v| {
                    let r = v.wrapping_add(1);
                    cpu.set_zero_and_negative(r);
                    r
                });
                0
            }
            Instr::DEC => {
                self.modify(mode, |cpu, v| {
                    let r = v.wrapping_sub(1);
                    cpu.set_zero_and_negative(r);
                    r
                });
                0
            }
            Instr::INX => {
                self.x = self.x.wrapping_add(1);
                self.set_zero_and_negative(self.x);
                0
            }
            Instr::INY => {
                self.y = self.y.wrapping_add(1);
                self.set_zero_and_negative(self.y);
                0
            }
            Instr::DEX => {
                self.x = self.x.wrapping_sub(1);
                self.set_zero_and_negative(self.x);
                0
            }
            Instr::DEY => {
                self.y = self.y.wrapping_sub(1);
                self.set_zero_and_negative(self.y);
                0
            }
            Instr::TAX => {
                self.x = self.a;
                self.set_zero_and_negative(self.x);
                0
            }
            Instr::TAY => {
                self.y = self.a;
                self.set_zero_and_negative(self.y);
                0
            }
            Instr::TXA => {
                self.a = self.x;
                self.set_zero_and_negative(self.a);
                0
            }
            Instr::TYA => {
                self.a = self.y;
                self.set_zero_and_negative(self.a);
                0
            }
            Instr::TSX => {
                self.x = self.sp;
                self.set_zero_and_negative(self.x);
                0
            }
            Instr::TXS => {
                // TXS leaves the flags alone
                self.sp = self.x;
                0
            }
            Instr::PHA => {
                self.push_u8(self.a);
                0
            }
            Instr::PLA => {
                self.a = self.pop_u8();
                self.set_zero_and_negative(self.a);
                0
            }
            Instr::PHP => {
                // B and bit 5 are set in the pushed copy only
                self.push_u8(self.status | FLAG_BREAK | FLAG_UNUSED);
                0
            }
            Instr::PLP => {
                let s = self.pop_u8();
                self.status = (s | FLAG_UNUSED) & !FLAG_BREAK;
                0
            }
            Instr::CLC => {
                self.status &= !FLAG_CARRY;
                0
            }
            Instr::SEC => {
                self.status |= FLAG_CARRY;
                0
            }
            Instr::CLI => {
                self.status &= !FLAG_IRQ_DISABLE;
                0
            }
            Instr::SEI => {
                self.status |= FLAG_IRQ_DISABLE;
                0
            }
            Instr::CLD => {
                self.status &= !FLAG_DECIMAL;
                0
            }
            Instr::SED => {
                self.status |= FLAG_DECIMAL;
                0
            }
            Instr::CLV => {
                self.status &= !FLAG_OVERFLOW;
                0
            }
            Instr::BPL => self.branch(!self.flag(FLAG_NEGATIVE)),
            Instr::BMI => self.branch(self.flag(FLAG_NEGATIVE)),
            Instr::BVC => self.branch(!self.flag(FLAG_OVERFLOW)),
            Instr::BVS => self.branch(self.flag(FLAG_OVERFLOW)),
            Instr::BCC => self.branch(!self.flag(FLAG_CARRY)),
            Instr::BCS => self.branch(self.flag(FLAG_CARRY)),
            Instr::BNE => self.branch(!self.flag(FLAG_ZERO)),
            Instr::BEQ => self.branch(self.flag(FLAG_ZERO)),
            Instr::JMP => {
                let (addr, _) = self.operand_address(mode);
                self.pc = addr;
                0
            }
            Instr::JSR => {
                let addr = self.fetch_u16();
                let ret = self.pc.wrapping_sub(1);
                self.push_u16(ret);
                self.pc = addr;
                0
            }
            Instr::RTS => {
                let ret = self.pop_u16();
                self.pc = ret.wrapping_add(1);
                0
            }
            Instr::RTI => {
                let s = self.pop_u8();
                self.status = (s | FLAG_UNUSED) & !FLAG_BREAK;
                self.pc = self.pop_u16();
                0
            }
            Instr::BRK => {
                // BRK is a 2-byte instruction; the padding byte is skipped on return.
                let brk_pc = self.pc.wrapping_sub(1);
                let pc_to_push = self.pc.wrapping_add(1);
                self.push_u16(pc_to_push);
                self.push_u8(self.status | FLAG_BREAK | FLAG_UNUSED);
                self.status |= FLAG_IRQ_DISABLE;
                self.pc = self.read_u16(IRQ_VECTOR);
                log(LogCategory::CPU, LogLevel::Trace, || {
                    format!("CPU: BRK at PC={:04X}, handler {:04X}", brk_pc, self.pc)
                });
                0
            }
            Instr::NOP => 0,
        }
    }

    /// Relative branch; taken costs one cycle, two if the target is on another page.
    fn branch(&mut self, taken: bool) -> u32 {
        let offset = self.fetch_u8() as i8;
        if !taken {
            return 0;
        }
        let target = self.pc.wrapping_add(offset as i16 as u16);
        let extra = if (target ^ self.pc) & 0xFF00 != 0 { 2 } else { 1 };
        self.pc = target;
        extra
    }

    fn compare(&mut self, reg: u8, val: u8) {
        self.set_flag(FLAG_CARRY, reg >= val);
        self.set_zero_and_negative(reg.wrapping_sub(val));
    }

    fn asl(&mut self, v: u8) -> u8 {
        self.set_flag(FLAG_CARRY, v & 0x80 != 0);
        let r = v << 1;
        self.set_zero_and_negative(r);
        r
    }

    fn lsr(&mut self, v: u8) -> u8 {
        self.set_flag(FLAG_CARRY, v & 0x01 != 0);
        let r = v >> 1;
        self.set_zero_and_negative(r);
        r
    }

    fn rol(&mut self, v: u8) -> u8 {
        let carry_in = self.status & FLAG_CARRY;
        self.set_flag(FLAG_CARRY, v & 0x80 != 0);
        let r = (v << 1) | carry_in;
        self.set_zero_and_negative(r);
        r
    }

    fn ror(&mut self, v: u8) -> u8 {
        let carry_in = (self.status & FLAG_CARRY) << 7;
        self.set_flag(FLAG_CARRY, v & 0x01 != 0);
        let r = (v >> 1) | carry_in;
        self.set_zero_and_negative(r);
        r
    }

    fn adc(&mut self, val: u8) {
        if self.decimal_enabled && self.flag(FLAG_DECIMAL) {
            self.adc_decimal(val);
        } else {
            self.adc_binary(val);
        }
    }

    fn sbc(&mut self, val: u8) {
        if self.decimal_enabled && self.flag(FLAG_DECIMAL) {
            self.sbc_decimal(val);
        } else {
            // A - M - !C == A + !M + C
            self.adc_binary(!val);
        }
    }

    fn adc_binary(&mut self, val: u8) {
        let carry_in = (self.status & FLAG_CARRY) as u16;
        let sum = self.a as u16 + val as u16 + carry_in;
        let result = sum as u8;
        self.set_flag(FLAG_CARRY, sum > 0xFF);
        self.set_flag(
            FLAG_OVERFLOW,
            (!(self.a ^ val) & (self.a ^ result) & 0x80) != 0,
        );
        self.a = result;
        self.set_zero_and_negative(result);
    }

    /// NMOS BCD addition: Z follows the binary sum, N and V the intermediate high digit.
    fn adc_decimal(&mut self, val: u8) {
        let a = self.a as u16;
        let v = val as u16;
        let carry_in = (self.status & FLAG_CARRY) as u16;

        let binary = (a + v + carry_in) as u8;
        let mut lo = (a & 0x0F) + (v & 0x0F) + carry_in;
        if lo > 0x09 {
            lo += 0x06;
        }
        let mut hi = (a >> 4) + (v >> 4) + u16::from(lo > 0x0F);
        let intermediate = ((hi << 4) | (lo & 0x0F)) as u8;

        self.set_flag(FLAG_ZERO, binary == 0);
        self.set_flag(FLAG_NEGATIVE, intermediate & 0x80 != 0);
        self.set_flag(
            FLAG_OVERFLOW,
            (!(self.a ^ val) & (self.a ^ intermediate) & 0x80) != 0,
        );
        if hi > 0x09 {
            hi += 0x06;
        }
        self.set_flag(FLAG_CARRY, hi > 0x0F);
        self.a = ((hi << 4) | (lo & 0x0F)) as u8;
    }

    /// NMOS BCD subtraction: flags come from the binary difference.
    fn sbc_decimal(&mut self, val: u8) {
        let a = self.a;
        let borrow = 1 - (self.status & FLAG_CARRY) as i16;
        self.adc_binary(!val);

        let mut lo = (a & 0x0F) as i16 - (val & 0x0F) as i16 - borrow;
        let mut hi = (a >> 4) as i16 - (val >> 4) as i16;
        if lo < 0 {
            lo -= 0x06;
            hi -= 1;
        }
        if hi < 0 {
            hi -= 0x06;
        }
        self.a = ((hi << 4) | (lo & 0x0F)) as u8;
    }
}

impl<M: Memory6502> crate::Cpu for Cpu6502<M> {
    fn reset(&mut self) {
        Cpu6502::reset(self);
    }

    fn step(&mut self) -> u32 {
        Cpu6502::step(self)
    }
}

/// Simple array-based memory implementation for testing
#[derive(Debug)]
pub struct ArrayMemory {
    pub data: Box<[u8; 0x10000]>,
}

impl ArrayMemory {
    pub fn new() -> Self {
        Self {
            data: Box::new([0; 0x10000]),
        }
    }

    /// Load a program into memory and set reset vector
    pub fn load_program(&mut self, offset: u16, data: &[u8]) {
        let off = offset as usize;
        self.data[off..off + data.len()].copy_from_slice(data);
        let [lo, hi] = offset.to_le_bytes();
        self.data[RESET_VECTOR as usize] = lo;
        self.data[RESET_VECTOR as usize + 1] = hi;
    }

    /// Point an interrupt vector at `target`
    pub fn set_vector(&mut self, vector: u16, target: u16) {
        let [lo, hi] = target.to_le_bytes();
        self.data[vector as usize] = lo;
        self.data[vector.wrapping_add(1) as usize] = hi;
    }
}

impl Default for ArrayMemory {
    fn default() -> Self {
        Self::new()
    }
}

impl Memory6502 for ArrayMemory {
    fn read(&self, addr: u16) -> u8 {
        self.data[addr as usize]
    }

    fn write(&mut self, addr: u16, val: u8) {
        self.data[addr as usize] = val;
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn cpu_with(program: &[u8]) -> Cpu6502<ArrayMemory> {
        let mut cpu = Cpu6502::new(ArrayMemory::new());
        cpu.memory.load_program(0x8000, program);
        cpu.reset();
        cpu
    }

    #[test]
    fn reset_loads_vector_and_power_on_state() {
        let mut cpu = cpu_with(&[0xEA]);
        cpu.a = 0x12;
        cpu.sp = 0x00;
        cpu.reset();
        assert_eq!(cpu.pc, 0x8000);
        assert_eq!(cpu.sp, 0xFD);
        assert_eq!(cpu.status, 0x24);
        assert_eq!(cpu.a, 0);
        assert_eq!(cpu.cycles, 0);
    }

    #[test]
    fn lda_immediate_sets_a_and_flags() {
        let mut cpu = cpu_with(&[0xA9, 0x05, 0xEA]);
        assert_eq!(cpu.step(), 2);
        assert_eq!(cpu.a, 5);
        assert_eq!(cpu.status & FLAG_ZERO, 0);
        assert_eq!(cpu.step(), 2);
        assert_eq!(cpu.pc, 0x8003);
    }

    #[test]
    fn lda_zero_and_negative_flags() {
        let mut cpu = cpu_with(&[0xA9, 0x00, 0xA9, 0x80]);
        cpu.step();
        assert_eq!(cpu.status & FLAG_ZERO, FLAG_ZERO);
        assert_eq!(cpu.status & FLAG_NEGATIVE, 0);
        cpu.step();
        assert_eq!(cpu.status & FLAG_ZERO, 0);
        assert_eq!(cpu.status & FLAG_NEGATIVE, FLAG_NEGATIVE);
    }

    #[test]
    fn every_opcode_costs_its_table_cycles() {
        // NMOS cycle counts from the MOS datasheet; 0 marks an undefined opcode
        #[rustfmt::skip]
        const NMOS_CYCLES: [u8; 256] = [
            7, 6, 0, 0, 0, 3, 5, 0, 3, 2, 2, 0, 0, 4, 6, 0, // 0x
            2, 5, 0, 0, 0, 4, 6, 0, 2, 4, 0, 0, 0, 4, 7, 0, // 1x
            6, 6, 0, 0, 3, 3, 5, 0, 4, 2, 2, 0, 4, 4, 6, 0, // 2x
            2, 5, 0, 0, 0, 4, 6, 0, 2, 4, 0, 0, 0, 4, 7, 0, // 3x
            6, 6, 0, 0, 0, 3, 5, 0, 3, 2, 2, 0, 3, 4, 6, 0, // 4x
            2, 5, 0, 0, 0, 4, 6, 0, 2, 4, 0, 0, 0, 4, 7, 0, // 5x
            6, 6, 0, 0, 0, 3, 5, 0, 4, 2, 2, 0, 5, 4, 6, 0, // 6x
            2, 5, 0, 0, 0, 4, 6, 0, 2, 4, 0, 0, 0, 4, 7, 0, // 7x
            0, 6, 0, 0, 3, 3, 3, 0, 2, 0, 2, 0, 4, 4, 4, 0, // 8x
            2, 6, 0, 0, 4, 4, 4, 0, 2, 5, 2, 0, 0, 5, 0, 0, // 9x
            2, 6, 2, 0, 3, 3, 3, 0, 2, 2, 2, 0, 4, 4, 4, 0, // Ax
            2, 5, 0, 0, 4, 4, 4, 0, 2, 4, 2, 0, 4, 4, 4, 0, // Bx
            2, 6, 0, 0, 3, 3, 5, 0, 2, 2, 2, 0, 4, 4, 6, 0, // Cx
            2, 5, 0, 0, 0, 4, 6, 0, 2, 4, 0, 0, 0, 4, 7, 0, // Dx
            2, 6, 0, 0, 3, 3, 5, 0, 2, 2, 2, 0, 4, 4, 6, 0, // Ex
            2, 5, 0, 0, 0, 4, 6, 0, 2, 4, 0, 0, 0, 4, 7, 0, // Fx
        ];

        assert_eq!(NMOS_CYCLES.iter().filter(|&&c| c != 0).count(), 151);
        for op in 0..=0xFFu8 {
            let listed = NMOS_CYCLES[op as usize];
            assert_eq!(decode(op).is_some(), listed != 0, "opcode {:02X}", op);

            let mut cpu = cpu_with(&[op, 0x00, 0x00]);
            // Flags after reset: N, V, C, Z clear, so these four branches are taken
            // to the next instruction (same page, +1).
            let taken = matches!(op, 0x10 | 0x50 | 0x90 | 0xD0);
            let base = if listed == 0 {
                UNDEFINED_OPCODE_CYCLES
            } else {
                listed as u32
            };
            assert_eq!(base_cycles(op), base, "opcode {:02X}", op);
            assert_eq!(cpu.step(), base + taken as u32, "opcode {:02X}", op);
        }
    }

    #[test]
    fn undefined_opcodes_are_one_byte_nops() {
        let undefined: Vec<u8> = (0..=0xFFu8).filter(|op| decode(*op).is_none()).collect();
        assert_eq!(undefined.len(), 105);
        for op in undefined {
            let mut cpu = cpu_with(&[op, 0xA9, 0x33]);
            let before = cpu.registers();
            assert_eq!(cpu.step(), UNDEFINED_OPCODE_CYCLES);
            assert_eq!(cpu.pc, 0x8001, "opcode {:02X}", op);
            assert_eq!(cpu.a, before.a);
            assert_eq!(cpu.status, before.status);
        }
    }

    #[test]
    fn operand_lengths_advance_pc() {
        for op in 0..=0xFFu8 {
            let Some(opcode) = decode(op) else { continue };
            if matches!(
                opcode.instr,
                Instr::JMP
                    | Instr::JSR
                    | Instr::RTS
                    | Instr::RTI
                    | Instr::BRK
                    | Instr::BPL
                    | Instr::BVC
                    | Instr::BCC
                    | Instr::BNE
            ) {
                continue;
            }
            let mut cpu = cpu_with(&[op, 0x00, 0x00]);
            cpu.step();
            assert_eq!(
                cpu.pc,
                0x8001 + opcode.mode.operand_len(),
                "opcode {:02X}",
                op
            );
        }
    }

    #[test]
    fn indexed_reads_pay_for_page_crossing() {
        // LDA $20F0,X with X=0x20 -> $2110
        let mut cpu = cpu_with(&[0xBD, 0xF0, 0x20]);
        cpu.x = 0x20;
        cpu.memory.write(0x2110, 0x77);
        assert_eq!(cpu.step(), 5);
        assert_eq!(cpu.a, 0x77);

        // Same instruction without a crossing
        let mut cpu = cpu_with(&[0xBD, 0x00, 0x20]);
        cpu.x = 0x20;
        assert_eq!(cpu.step(), 4);

        // LDX $20FF,Y crosses
        let mut cpu = cpu_with(&[0xBE, 0xFF, 0x20]);
        cpu.y = 0x01;
        assert_eq!(cpu.step(), 5);

        // LDA ($40),Y with base $30FF + 1
        let mut cpu = cpu_with(&[0xB1, 0x40]);
        cpu.memory.write(0x0040, 0xFF);
        cpu.memory.write(0x0041, 0x30);
        cpu.memory.write(0x3100, 0x5A);
        cpu.y = 1;
        assert_eq!(cpu.step(), 6);
        assert_eq!(cpu.a, 0x5A);
    }

    #[test]
    fn stores_and_rmw_never_pay_page_penalty() {
        // STA $20FF,X
        let mut cpu = cpu_with(&[0x9D, 0xFF, 0x20]);
        cpu.x = 1;
        cpu.a = 0x42;
        assert_eq!(cpu.step(), 5);
        assert_eq!(cpu.memory.read(0x2100), 0x42);

        // INC $20FF,X
        let mut cpu = cpu_with(&[0xFE, 0xFF, 0x20]);
        cpu.x = 1;
        assert_eq!(cpu.step(), 7);
        assert_eq!(cpu.memory.read(0x2100), 1);
    }

    #[test]
    fn branch_penalties() {
        // BEQ not taken
        let mut cpu = cpu_with(&[0xF0, 0x10]);
        assert_eq!(cpu.step(), 2);
        assert_eq!(cpu.pc, 0x8002);

        // BNE taken, same page
        let mut cpu = cpu_with(&[0xD0, 0x10]);
        assert_eq!(cpu.step(), 3);
        assert_eq!(cpu.pc, 0x8012);

        // BNE taken backwards across a page: $8002 - 4 = $7FFE
        let mut cpu = cpu_with(&[0xD0, 0xFC]);
        assert_eq!(cpu.step(), 4);
        assert_eq!(cpu.pc, 0x7FFE);
    }

    #[test]
    fn branch_crossing_forward_from_page_end() {
        let mut cpu = Cpu6502::new(ArrayMemory::new());
        cpu.memory.load_program(0x80FC, &[0xEA, 0xB0, 0x04]); // NOP; BCS +4
        cpu.reset();
        cpu.status |= FLAG_CARRY;
        cpu.step();
        // next instruction at $80FF, target $8103
        assert_eq!(cpu.step(), 4);
        assert_eq!(cpu.pc, 0x8103);
    }

    #[test]
    fn beq_branches_when_zero() {
        // LDA #0; BEQ +2; LDA #1; LDA #2
        let mut cpu = cpu_with(&[0xA9, 0x00, 0xF0, 0x02, 0xA9, 0x01, 0xA9, 0x02]);
        assert_eq!(cpu.step(), 2);
        assert_eq!(cpu.step(), 3);
        assert_eq!(cpu.step(), 2);
        assert_eq!(cpu.a, 2);
    }

    #[test]
    fn adc_carry_and_overflow() {
        let mut cpu = cpu_with(&[0x69, 0x10]);
        cpu.a = 0x50;
        assert_eq!(cpu.step(), 2);
        assert_eq!(cpu.a, 0x60);
        assert_eq!(cpu.status & FLAG_OVERFLOW, 0);

        let mut cpu = cpu_with(&[0x69, 0x01]);
        cpu.a = 0xFF;
        cpu.status |= FLAG_CARRY;
        cpu.step();
        assert_eq!(cpu.a, 0x01);
        assert_eq!(cpu.status & FLAG_CARRY, FLAG_CARRY);

        // 0x50 + 0x50 overflows into the sign bit
        let mut cpu = cpu_with(&[0x69, 0x50]);
        cpu.a = 0x50;
        cpu.step();
        assert_eq!(cpu.a, 0xA0);
        assert_eq!(cpu.status & FLAG_OVERFLOW, FLAG_OVERFLOW);
        assert_eq!(cpu.status & FLAG_NEGATIVE, FLAG_NEGATIVE);
        assert_eq!(cpu.status & FLAG_CARRY, 0);
    }

    #[test]
    fn sbc_borrow_and_overflow() {
        let mut cpu = cpu_with(&[0xE9, 0x01]);
        cpu.a = 0x10;
        cpu.status |= FLAG_CARRY;
        cpu.step();
        assert_eq!(cpu.a, 0x0F);
        assert_eq!(cpu.status & FLAG_CARRY, FLAG_CARRY);

        // 0x00 - 0x01 borrows
        let mut cpu = cpu_with(&[0xE9, 0x01]);
        cpu.status |= FLAG_CARRY;
        cpu.step();
        assert_eq!(cpu.a, 0xFF);
        assert_eq!(cpu.status & FLAG_CARRY, 0);

        // 0x80 - 0x01 = 0x7F signed overflow
        let mut cpu = cpu_with(&[0xE9, 0x01]);
        cpu.a = 0x80;
        cpu.status |= FLAG_CARRY;
        cpu.step();
        assert_eq!(cpu.a, 0x7F);
        assert_eq!(cpu.status & FLAG_OVERFLOW, FLAG_OVERFLOW);
    }

    #[test]
    fn decimal_flag_ignored_unless_enabled() {
        let mut cpu = cpu_with(&[0xF8, 0x69, 0x01]); // SED; ADC #$01
        cpu.a = 0x09;
        cpu.step();
        cpu.step();
        assert_eq!(cpu.a, 0x0A);
    }

    #[test]
    fn decimal_adc_and_sbc() {
        let mut cpu = cpu_with(&[0xF8, 0x69, 0x01, 0x69, 0x01]);
        cpu.set_decimal_enabled(true);
        cpu.a = 0x09;
        cpu.step();
        cpu.step();
        assert_eq!(cpu.a, 0x10);
        assert_eq!(cpu.status & FLAG_CARRY, 0);

        cpu.a = 0x99;
        cpu.step();
        assert_eq!(cpu.a, 0x00);
        assert_eq!(cpu.status & FLAG_CARRY, FLAG_CARRY);

        // SED; SEC; SBC #$01 on 0x10 -> 0x09
        let mut cpu = cpu_with(&[0xF8, 0x38, 0xE9, 0x01]);
        cpu.set_decimal_enabled(true);
        cpu.a = 0x10;
        cpu.step();
        cpu.step();
        cpu.step();
        assert_eq!(cpu.a, 0x09);
        assert_eq!(cpu.status & FLAG_CARRY, FLAG_CARRY);

        // 0x00 - 0x01 -> 0x99 with borrow
        let mut cpu = cpu_with(&[0xF8, 0x38, 0xE9, 0x01]);
        cpu.set_decimal_enabled(true);
        cpu.step();
        cpu.step();
        cpu.step();
        assert_eq!(cpu.a, 0x99);
        assert_eq!(cpu.status & FLAG_CARRY, 0);
    }

    #[test]
    fn decimal_flags_follow_nmos_rules() {
        // SED; SEC; ADC #$00: 79 + 00 + 1 = 80. N and V come from the binary
        // intermediate, which is also 80 after the low-digit adjust.
        let mut cpu = cpu_with(&[0xF8, 0x38, 0x69, 0x00]);
        cpu.set_decimal_enabled(true);
        cpu.a = 0x79;
        cpu.step();
        cpu.step();
        assert_eq!(cpu.step(), 2);
        assert_eq!(cpu.a, 0x80);
        assert_eq!(cpu.status, 0xEC);

        // SED; ADC #$01: 99 + 01 = 00 carry out. The binary sum is 9A, so Z stays
        // clear and N is set.
        let mut cpu = cpu_with(&[0xF8, 0x69, 0x01]);
        cpu.set_decimal_enabled(true);
        cpu.a = 0x99;
        cpu.step();
        cpu.step();
        assert_eq!(cpu.a, 0x00);
        assert_eq!(cpu.status & FLAG_ZERO, 0);
        assert_eq!(cpu.status & FLAG_NEGATIVE, FLAG_NEGATIVE);
        assert_eq!(cpu.status & FLAG_OVERFLOW, 0);
        assert_eq!(cpu.status & FLAG_CARRY, FLAG_CARRY);
        assert_eq!(cpu.status, 0xAD);
    }

    #[test]
    fn compare_leaves_register_alone() {
        let mut cpu = cpu_with(&[0xC9, 0x20, 0xE0, 0x05, 0xC0, 0x04]);
        cpu.a = 0x10;
        cpu.x = 0x05;
        cpu.y = 0x03;
        cpu.step();
        assert_eq!(cpu.a, 0x10);
        assert_eq!(cpu.status & FLAG_CARRY, 0);
        assert_eq!(cpu.status & FLAG_NEGATIVE, FLAG_NEGATIVE);
        cpu.step();
        assert_eq!(cpu.status & (FLAG_ZERO | FLAG_CARRY), FLAG_ZERO | FLAG_CARRY);
        cpu.step();
        assert_eq!(cpu.status & FLAG_CARRY, 0);
        assert_eq!(cpu.y, 0x03);
    }

    #[test]
    fn bit_copies_operand_bits() {
        let mut cpu = cpu_with(&[0x24, 0x10]);
        cpu.memory.write(0x0010, 0xC0);
        cpu.a = 0x01;
        assert_eq!(cpu.step(), 3);
        assert_eq!(
            cpu.status & (FLAG_NEGATIVE | FLAG_OVERFLOW | FLAG_ZERO),
            FLAG_NEGATIVE | FLAG_OVERFLOW | FLAG_ZERO
        );
        assert_eq!(cpu.a, 0x01);
    }

    #[test]
    fn shift_and_rotate_through_carry() {
        // ASL A; ROL A; LSR A; ROR A
        let mut cpu = cpu_with(&[0x0A, 0x2A, 0x4A, 0x6A]);
        cpu.a = 0x81;
        cpu.step();
        assert_eq!(cpu.a, 0x02);
        assert_eq!(cpu.status & FLAG_CARRY, FLAG_CARRY);
        cpu.step();
        assert_eq!(cpu.a, 0x05);
        assert_eq!(cpu.status & FLAG_CARRY, 0);
        cpu.step();
        assert_eq!(cpu.a, 0x02);
        assert_eq!(cpu.status & FLAG_CARRY, FLAG_CARRY);
        cpu.step();
        assert_eq!(cpu.a, 0x81);
        assert_eq!(cpu.status & FLAG_NEGATIVE, FLAG_NEGATIVE);
        assert_eq!(cpu.status & FLAG_CARRY, 0);
    }

    #[test]
    fn rmw_memory_modes() {
        // ASL $10,X ; ROR $2000,X
        let mut cpu = cpu_with(&[0x16, 0x10, 0x7E, 0x00, 0x20]);
        cpu.x = 0x05;
        cpu.memory.write(0x0015, 0x40);
        cpu.memory.write(0x2005, 0x02);
        assert_eq!(cpu.step(), 6);
        assert_eq!(cpu.memory.read(0x0015), 0x80);
        assert_eq!(cpu.status & FLAG_NEGATIVE, FLAG_NEGATIVE);
        assert_eq!(cpu.step(), 7);
        assert_eq!(cpu.memory.read(0x2005), 0x01);
    }

    #[test]
    fn zero_page_indexing_wraps() {
        // LDA $F0,X with X=0x20 reads $0010, not $0110
        let mut cpu = cpu_with(&[0xB5, 0xF0]);
        cpu.x = 0x20;
        cpu.memory.write(0x0010, 0x11);
        cpu.memory.write(0x0110, 0x22);
        cpu.step();
        assert_eq!(cpu.a, 0x11);

        // LDA ($FF,X) with X=0 takes the high byte from $0000
        let mut cpu = cpu_with(&[0xA1, 0xFF]);
        cpu.memory.write(0x00FF, 0x34);
        cpu.memory.write(0x0000, 0x12);
        cpu.memory.write(0x1234, 0x99);
        assert_eq!(cpu.step(), 6);
        assert_eq!(cpu.a, 0x99);
    }

    #[test]
    fn jmp_indirect_page_wrap_bug() {
        let mut cpu = Cpu6502::new(ArrayMemory::new());
        cpu.memory.load_program(0x8100, &[0x6C, 0xFF, 0x80]);
        cpu.memory.write(0x80FF, 0x34);
        cpu.memory.write(0x8000, 0x12);
        cpu.reset();
        assert_eq!(cpu.step(), 5);
        assert_eq!(cpu.pc, 0x1234);
    }

    #[test]
    fn pha_pla_roundtrip() {
        let mut cpu = cpu_with(&[0x48, 0xA9, 0x00, 0x68]);
        cpu.a = 0x7F;
        assert_eq!(cpu.step(), 3);
        assert_eq!(cpu.step(), 2);
        assert_eq!(cpu.step(), 4);
        assert_eq!(cpu.a, 0x7F);
        assert_eq!(cpu.sp, 0xFD);
    }

    #[test]
    fn stack_wraps_within_page_one() {
        let mut cpu = cpu_with(&[0x48, 0x68]);
        cpu.sp = 0x00;
        cpu.a = 0xAB;
        cpu.step();
        assert_eq!(cpu.memory.read(0x0100), 0xAB);
        assert_eq!(cpu.sp, 0xFF);
        cpu.a = 0;
        cpu.step();
        assert_eq!(cpu.sp, 0x00);
        assert_eq!(cpu.a, 0xAB);
    }

    #[test]
    fn php_plp_handle_break_bit() {
        let mut cpu = cpu_with(&[0x08, 0x28]);
        cpu.step();
        assert_eq!(cpu.memory.read(0x01FD), 0x24 | FLAG_BREAK);
        cpu.step();
        assert_eq!(cpu.status, 0x24);
    }

    #[test]
    fn jsr_rts_returns() {
        let mut cpu = cpu_with(&[0x20, 0x10, 0x80, 0xA9, 0x01]);
        cpu.memory.write(0x8010, 0x60);
        assert_eq!(cpu.step(), 6);
        assert_eq!(cpu.memory.read(0x01FD), 0x80);
        assert_eq!(cpu.memory.read(0x01FC), 0x02);
        assert_eq!(cpu.step(), 6);
        assert_eq!(cpu.step(), 2);
        assert_eq!(cpu.a, 1);
    }

    #[test]
    fn brk_and_rti() {
        let mut cpu = cpu_with(&[0x00, 0xFF, 0xA9, 0x07]);
        cpu.memory.set_vector(IRQ_VECTOR, 0x9000);
        cpu.memory.write(0x9000, 0x40); // RTI
        cpu.status &= !FLAG_IRQ_DISABLE;
        assert_eq!(cpu.step(), 7);
        assert_eq!(cpu.pc, 0x9000);
        assert_eq!(cpu.status & FLAG_IRQ_DISABLE, FLAG_IRQ_DISABLE);
        assert_eq!(cpu.memory.read(0x01FB) & FLAG_BREAK, FLAG_BREAK);
        assert_eq!(cpu.step(), 6);
        assert_eq!(cpu.pc, 0x8002);
        assert_eq!(cpu.status & FLAG_IRQ_DISABLE, 0);
        cpu.step();
        assert_eq!(cpu.a, 0x07);
    }

    #[test]
    fn irq_ignored_while_disabled() {
        let mut cpu = cpu_with(&[0xEA, 0x58, 0xEA]); // NOP; CLI; NOP
        cpu.memory.set_vector(IRQ_VECTOR, 0x9000);
        cpu.set_irq(true);
        assert_eq!(cpu.step(), 2);
        assert_eq!(cpu.pc, 0x8001);
        assert_eq!(cpu.step(), 2); // CLI
        assert_eq!(cpu.step(), INTERRUPT_CYCLES);
        assert_eq!(cpu.pc, 0x9000);
        assert_eq!(cpu.status & FLAG_IRQ_DISABLE, FLAG_IRQ_DISABLE);
        // return address and status with B clear
        assert_eq!(cpu.memory.read(0x01FD), 0x80);
        assert_eq!(cpu.memory.read(0x01FC), 0x02);
        assert_eq!(cpu.memory.read(0x01FB) & (FLAG_BREAK | FLAG_UNUSED), FLAG_UNUSED);
    }

    #[test]
    fn irq_is_level_sensitive() {
        let mut cpu = cpu_with(&[0x58, 0xEA]);
        cpu.memory.set_vector(IRQ_VECTOR, 0x9000);
        cpu.memory.write(0x9000, 0x58); // CLI inside handler
        cpu.step(); // CLI
        cpu.set_irq(true);
        assert_eq!(cpu.step(), INTERRUPT_CYCLES);
        assert_eq!(cpu.step(), 2); // handler's CLI
        // line still asserted: taken again
        assert_eq!(cpu.step(), INTERRUPT_CYCLES);
        cpu.set_irq(false);
        cpu.status &= !FLAG_IRQ_DISABLE;
        cpu.pc = 0x8001;
        assert_eq!(cpu.step(), 2);
    }

    #[test]
    fn nmi_fires_once_even_with_interrupts_disabled() {
        let mut cpu = cpu_with(&[0xEA, 0xEA]);
        cpu.memory.set_vector(NMI_VECTOR, 0xA000);
        cpu.memory.write(0xA000, 0xEA);
        cpu.memory.write(0xA001, 0xEA);
        assert_eq!(cpu.status & FLAG_IRQ_DISABLE, FLAG_IRQ_DISABLE);
        cpu.nmi();
        assert!(cpu.nmi_pending());
        assert_eq!(cpu.step(), INTERRUPT_CYCLES);
        assert_eq!(cpu.pc, 0xA000);
        assert!(!cpu.nmi_pending());
        assert_eq!(cpu.step(), 2);
        assert_eq!(cpu.pc, 0xA001);
    }

    #[test]
    fn nmi_wins_over_irq() {
        let mut cpu = cpu_with(&[0xEA]);
        cpu.memory.set_vector(NMI_VECTOR, 0xA000);
        cpu.memory.set_vector(IRQ_VECTOR, 0x9000);
        cpu.status &= !FLAG_IRQ_DISABLE;
        cpu.set_irq(true);
        cpu.nmi();
        cpu.step();
        assert_eq!(cpu.pc, 0xA000);
    }

    #[test]
    fn cycle_counter_accumulates() {
        let mut cpu = cpu_with(&[0xA9, 0x01, 0x8D, 0x00, 0x02]);
        cpu.step();
        cpu.step();
        assert_eq!(cpu.cycles, 6);
    }

    #[test]
    fn registers_snapshot_roundtrip() {
        let mut cpu = cpu_with(&[0xEA]);
        let regs = Registers6502 {
            a: 1,
            x: 2,
            y: 3,
            sp: 0x80,
            status: 0x81,
            pc: 0x1234,
        };
        cpu.set_registers(regs);
        assert_eq!(cpu.registers().status, 0x81 | FLAG_UNUSED);
        assert_eq!(cpu.registers().pc, 0x1234);
        assert_eq!(cpu.x, 2);
    }
}
