//! Core emulator primitives and traits.

pub mod cpu_6502;
pub mod logging;

use serde_json::Value;

/// A CPU-like component that can be stepped; returns cycles consumed.
pub trait Cpu {
    fn reset(&mut self);
    fn step(&mut self) -> u32;
}

/// A high-level System trait tying components together.
///
/// Machines are driven in ticks: a fixed budget of CPU cycles representing one slice of
/// real time. The host decides how often to call `step_tick`.
pub trait System {
    type Error: std::error::Error + Send + Sync + 'static;

    /// Reset to initial power-on state
    fn reset(&mut self);

    /// Run one timing tick and return the cycles actually executed.
    ///
    /// The last instruction may overrun the budget; the overrun is not carried over.
    fn step_tick(&mut self) -> Result<u32, Self::Error>;

    /// Return a JSON-serializable save state.
    /// Save states hold machine state (CPU, RAM), never ROM images.
    fn save_state(&self) -> Value;

    /// Load a JSON save state produced by `save_state`.
    fn load_state(&mut self, v: &Value) -> Result<(), Self::Error>;

    /// Check if this system supports save/load state functionality
    fn supports_save_states(&self) -> bool {
        false
    }
}
