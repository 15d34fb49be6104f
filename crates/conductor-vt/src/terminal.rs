use std::sync::{Arc, Mutex};

use alacritty_terminal::event::{Event, EventListener};
use alacritty_terminal::grid::Dimensions;
use alacritty_terminal::term::{Config, Term};
use alacritty_terminal::vte::ansi;

use crate::screen::ScreenView;

/// Lines kept behind the visible screen. Long replies scroll past the top
/// before the scraper reads them.
pub const SCROLLBACK_LINES: usize = 2_000;

/// Collects replies the emulator wants sent back to the child.
///
/// `Term` requires a `Clone` listener, so the queue is shared.
#[derive(Clone, Default)]
pub struct EventProxy {
    pty_writes: Arc<Mutex<Vec<String>>>,
}

impl EventListener for EventProxy {
    fn send_event(&self, event: Event) {
        if let Event::PtyWrite(data) = event {
            self.pty_writes
                .lock()
                .unwrap_or_else(|e| e.into_inner())
                .push(data);
        }
    }
}

struct TermSize {
    columns: usize,
    screen_lines: usize,
}

impl Dimensions for TermSize {
    fn total_lines(&self) -> usize {
        self.screen_lines
    }

    fn screen_lines(&self) -> usize {
        self.screen_lines
    }

    fn columns(&self) -> usize {
        self.columns
    }
}

/// Terminal emulator fed with raw PTY bytes.
///
/// Wraps `alacritty_terminal::Term` and a VTE parser; callers read the
/// rendered text back through [`ScreenView`].
pub struct VtTerminal {
    term: Term<EventProxy>,
    parser: ansi::Processor,
    events: EventProxy,
}

impl VtTerminal {
    pub fn new(cols: u16, rows: u16) -> Self {
        let config = Config {
            scrolling_history: SCROLLBACK_LINES,
            ..Config::default()
        };
        let size = TermSize {
            columns: cols as usize,
            screen_lines: rows as usize,
        };
        let events = EventProxy::default();
        let term = Term::new(config, &size, events.clone());

        Self {
            term,
            parser: ansi::Processor::new(),
            events,
        }
    }

    /// Feed raw PTY output bytes into the terminal.
    pub fn write(&mut self, bytes: &[u8]) {
        self.parser.advance(&mut self.term, bytes);
    }

    /// Read-only view of the screen and its scrollback.
    pub fn screen(&self) -> ScreenView<'_> {
        ScreenView::new(&self.term)
    }

    /// Drain replies to terminal queries such as cursor position reports.
    /// Interactive CLIs stall until they get them.
    pub fn take_pty_writes(&mut self) -> Vec<String> {
        let mut queue = self.events.pty_writes.lock().unwrap_or_else(|e| e.into_inner());
        std::mem::take(&mut *queue)
    }
}
