//! Machine configuration

use serde::{Deserialize, Serialize};

/// One tick is a 60 Hz slice of the ~1.023 MHz clock
pub const DEFAULT_CYCLES_PER_TICK: u32 = 17_050;

/// 16K: the common expanded configuration (4K stock plus a 12K card)
pub const DEFAULT_RAM_SIZE: usize = 16 * 1024;

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct Apple1Config {
    /// Bytes of RAM mapped from $0000
    pub ram_size: usize,
    /// CPU cycle budget for one `step_tick`
    pub cycles_per_tick: u32,
    /// Honor the D flag in ADC/SBC. Integer BASIC never sets it, but user programs do.
    pub decimal_mode: bool,
}

impl Default for Apple1Config {
    fn default() -> Self {
        Self {
            ram_size: DEFAULT_RAM_SIZE,
            cycles_per_tick: DEFAULT_CYCLES_PER_TICK,
            decimal_mode: true,
        }
    }
}

impl Apple1Config {
    pub fn from_json(json: &str) -> Result<Self, serde_json::Error> {
        serde_json::from_str(json)
    }

    pub fn to_json(&self) -> Result<String, serde_json::Error> {
        serde_json::to_string_pretty(self)
    }

    /// RAM size in whole kilobytes, as shown in the startup banner
    pub fn ram_kib(&self) -> usize {
        self.ram_size / 1024
    }
}
