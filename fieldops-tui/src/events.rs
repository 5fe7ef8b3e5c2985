//! Event types for the TUI event loop.

use crossterm::event::KeyEvent;
use fieldops_core::{ChatMessage, LapChange};

#[derive(Debug, Clone)]
pub enum TuiEvent {
    Input(KeyEvent),
    Tick,
    Resize { width: u16, height: u16 },
    /// Lap row changed for the active vehicle.
    LapChange(LapChange),
    /// Chat message inserted for the active vehicle.
    Chat(ChatMessage),
}
