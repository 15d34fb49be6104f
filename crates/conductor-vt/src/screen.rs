use alacritty_terminal::grid::Dimensions;
use alacritty_terminal::index::{Column, Line};
use alacritty_terminal::term::cell::Flags;
use alacritty_terminal::term::Term;

use crate::terminal::EventProxy;

/// A read-only view into the terminal screen and its scrollback.
pub struct ScreenView<'a> {
    term: &'a Term<EventProxy>,
}

impl<'a> ScreenView<'a> {
    pub(crate) fn new(term: &'a Term<EventProxy>) -> Self {
        Self { term }
    }

    /// The last `n` logical lines of output, oldest first.
    ///
    /// Soft-wrapped rows are joined back into one line, trailing whitespace
    /// is dropped, and the blank rows below the last output are skipped.
    pub fn last_lines(&self, n: usize) -> Vec<String> {
        let grid = self.term.grid();
        let mut lines: Vec<String> = Vec::new();
        let mut current = String::new();

        let top = grid.topmost_line().0;
        let bottom = grid.bottommost_line().0;
        for line in top..=bottom {
            let (text, wrapped) = self.raw_row(Line(line));
            current.push_str(&text);
            if !wrapped {
                lines.push(current.trim_end().to_string());
                current.clear();
            }
        }
        if !current.is_empty() {
            lines.push(current.trim_end().to_string());
        }

        while lines.last().is_some_and(|l| l.is_empty()) {
            lines.pop();
        }
        let skip = lines.len().saturating_sub(n);
        lines.split_off(skip)
    }

    /// Row characters plus whether the row soft-wraps into the next one.
    fn raw_row(&self, line: Line) -> (String, bool) {
        let grid = self.term.grid();
        if line < grid.topmost_line() || line > grid.bottommost_line() {
            return (String::new(), false);
        }

        let row = &grid[line];
        let cols = self.term.columns();
        let mut text = String::with_capacity(cols);
        for col in 0..cols {
            let cell = &row[Column(col)];
            if cell
                .flags
                .intersects(Flags::WIDE_CHAR_SPACER | Flags::LEADING_WIDE_CHAR_SPACER)
            {
                continue;
            }
            text.push(cell.c);
        }

        let wrapped = cols > 0 && row[Column(cols - 1)].flags.contains(Flags::WRAPLINE);
        (text, wrapped)
    }
}
