//! conductor-vt: terminal emulation for conductor's PTY driver.
//!
//! Raw PTY output is full of cursor movement, colour and redraw sequences.
//! Feeding it through `alacritty_terminal` gives us the screen the way a
//! human would see it, which is what the response scraper and the approval
//! detector need to read.

pub mod screen;
pub mod terminal;

pub use screen::ScreenView;
pub use terminal::VtTerminal;
