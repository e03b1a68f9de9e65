//! Host keyboard to Apple-1 key code mapping
//!
//! The Apple-1 keyboard produces 7-bit upper-case ASCII only. Lower-case letters are
//! folded, Return becomes CR, and Escape is reserved by the host for the reset button.

/// A key as the host delivers it
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum HostKey {
    Char(char),
    Return,
    Backspace,
    Escape,
}

/// What the host should do with a mapped key
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum KeyAction {
    /// Latch this 7-bit code into the PIA
    Key(u8),
    /// Press the reset button
    Reset,
}

pub const KEY_RETURN: u8 = 0x0D;
pub const KEY_BACKSPACE: u8 = 0x08;

/// Map a host key; `None` for keys the Apple-1 keyboard cannot produce.
pub fn host_key_to_apple(key: HostKey) -> Option<KeyAction> {
    match key {
        HostKey::Return => Some(KeyAction::Key(KEY_RETURN)),
        HostKey::Backspace => Some(KeyAction::Key(KEY_BACKSPACE)),
        HostKey::Escape => Some(KeyAction::Reset),
        HostKey::Char(c) if c.is_ascii() => Some(KeyAction::Key(c.to_ascii_uppercase() as u8)),
        HostKey::Char(_) => None,
    }
}

/// Split typed text into host keys.
///
/// `\n` and `\r` are Return, ESC is Escape, BS and DEL are Backspace. `\r\n` counts once.
pub fn keys_from_text(text: &str) -> Vec<HostKey> {
    let mut keys = Vec::with_capacity(text.len());
    let mut chars = text.chars().peekable();
    while let Some(c) = chars.next() {
        let key = match c {
            '\r' => {
                if chars.peek() == Some(&'\n') {
                    chars.next();
                }
                HostKey::Return
            }
            '\n' => HostKey::Return,
            '\x1B' => HostKey::Escape,
            '\x08' | '\x7F' => HostKey::Backspace,
            c => HostKey::Char(c),
        };
        keys.push(key);
    }
    keys
}
