//! Host-side display collaborator
//!
//! The PIA hands every printable character and carriage return written to the display
//! register to a [`Terminal`]. Rendering is entirely the host's business.

/// Receives display output from the emulated machine
pub trait Terminal {
    /// A printable 7-bit code in `0x20..=0x5F`
    fn put_char(&mut self, ch: u8);

    /// Carriage return: move to the start of the next line
    fn new_line(&mut self);
}

impl<T: Terminal + ?Sized> Terminal for Box<T> {
    fn put_char(&mut self, ch: u8) {
        (**self).put_char(ch);
    }

    fn new_line(&mut self) {
        (**self).new_line();
    }
}

/// Discards all output
#[derive(Debug, Default, Clone, Copy)]
pub struct NullTerminal;

impl Terminal for NullTerminal {
    fn put_char(&mut self, _ch: u8) {}

    fn new_line(&mut self) {}
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TerminalEvent {
    Char(u8),
    NewLine,
}

/// Records output events in order; used by tests and headless tooling
#[derive(Debug, Default, Clone)]
pub struct RecordingTerminal {
    events: Vec<TerminalEvent>,
}

impl RecordingTerminal {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn events(&self) -> &[TerminalEvent] {
        &self.events
    }

    pub fn take_events(&mut self) -> Vec<TerminalEvent> {
        std::mem::take(&mut self.events)
    }

    /// The recorded output as text, newlines as `\n`
    pub fn text(&self) -> String {
        self.events
            .iter()
            .map(|event| match event {
                TerminalEvent::Char(ch) => *ch as char,
                TerminalEvent::NewLine => '\n',
            })
            .collect()
    }
}

impl Terminal for RecordingTerminal {
    fn put_char(&mut self, ch: u8) {
        self.events.push(TerminalEvent::Char(ch));
    }

    fn new_line(&mut self) {
        self.events.push(TerminalEvent::NewLine);
    }
}
