//! Terminal renderer using crossterm
//!
//! Draws the session grid to the local console. Only cells whose change
//! flag is set are redrawn, so a quiet screen costs nothing per frame.

use std::io::{self, Write};

use crossterm::{
    cursor::{Hide, MoveTo, Show},
    execute, queue,
    style::{Attribute, ResetColor, SetAttribute, SetBackgroundColor, SetForegroundColor},
    terminal::{self, Clear, ClearType, DisableLineWrap, EnableLineWrap, EnterAlternateScreen, LeaveAlternateScreen},
};

use crate::core::term::{CellAttrs, Color, Cursor, TerminalGrid};

/// Console colour for a grid colour
pub fn to_crossterm(color: Color) -> crossterm::style::Color {
    use crossterm::style::Color as Ct;
    match color {
        Color::Black => Ct::Black,
        Color::Red => Ct::DarkRed,
        Color::Green => Ct::DarkGreen,
        Color::Yellow => Ct::DarkYellow,
        Color::Blue => Ct::DarkBlue,
        Color::Magenta => Ct::DarkMagenta,
        Color::Cyan => Ct::DarkCyan,
        Color::White => Ct::Grey,
    }
}

/// A run of adjacent changed cells sharing attributes
struct Run {
    col: u16,
    row: u16,
    attrs: CellAttrs,
    text: String,
}

/// Terminal renderer
pub struct Renderer {
    last_cursor: Option<Cursor>,
    /// Whether the terminal has been initialized
    initialized: bool,
    full_redraw: bool,
    /// Console size; cells outside it are skipped
    size: (u16, u16),
}

impl Default for Renderer {
    fn default() -> Self {
        Self::new()
    }
}

impl Renderer {
    pub fn new() -> Self {
        Self {
            last_cursor: None,
            initialized: false,
            full_redraw: true,
            size: (u16::MAX, u16::MAX),
        }
    }

    /// Initialize the terminal for rendering
    pub fn init(&mut self) -> io::Result<()> {
        terminal::enable_raw_mode()?;

        let mut stdout = io::stdout();
        execute!(
            stdout,
            EnterAlternateScreen,
            DisableLineWrap,
            Clear(ClearType::All),
            MoveTo(0, 0)
        )?;

        self.size = terminal::size()?;
        self.initialized = true;
        self.full_redraw = true;
        Ok(())
    }

    /// Cleanup the terminal
    pub fn cleanup(&mut self) -> io::Result<()> {
        if !self.initialized {
            return Ok(());
        }
        self.initialized = false;

        let mut stdout = io::stdout();
        let _ = execute!(stdout, ResetColor, SetAttribute(Attribute::Reset));
        let _ = execute!(stdout, Show);
        let _ = execute!(stdout, EnableLineWrap);
        let _ = execute!(stdout, LeaveAlternateScreen);
        let _ = stdout.flush();

        terminal::disable_raw_mode()?;
        println!();
        Ok(())
    }

    /// Redraw the whole grid on the next frame
    pub fn invalidate(&mut self, size: (u16, u16)) {
        self.size = size;
        self.full_redraw = true;
    }

    /// Draw whatever changed since the last frame
    pub fn render(&mut self, grid: &mut TerminalGrid) -> io::Result<()> {
        let changed = grid.take_display_changed() || self.full_redraw;
        let cursor = grid.cursor();
        if !changed && self.last_cursor == Some(cursor) {
            return Ok(());
        }

        let stdout = io::stdout();
        let mut stdout = io::BufWriter::with_capacity(65536, stdout.lock());
        queue!(stdout, Hide)?;

        if changed {
            if self.full_redraw {
                queue!(stdout, ResetColor, SetAttribute(Attribute::Reset), Clear(ClearType::All))?;
            }
            self.render_cells(&mut stdout, grid)?;
        }

        queue!(stdout, MoveTo(cursor.col, cursor.row), Show)?;
        stdout.flush()?;

        self.last_cursor = Some(cursor);
        Ok(())
    }

    fn render_cells<W: Write>(&mut self, out: &mut W, grid: &mut TerminalGrid) -> io::Result<()> {
        let full = std::mem::take(&mut self.full_redraw);
        let (max_cols, max_rows) = self.size;
        let mut run: Option<Run> = None;

        for y in 0..grid.height() {
            for x in 0..grid.width() {
                let dirty = grid.take_cell_changed(x, y);
                if !(dirty || full) || x >= max_cols || y >= max_rows {
                    Self::flush_run(out, run.take())?;
                    continue;
                }

                let cell = match grid.cell(x, y) {
                    Some(cell) => *cell,
                    None => continue,
                };

                match run.as_mut() {
                    Some(r) if r.attrs == cell.attrs => r.text.push(cell.display_char()),
                    _ => {
                        Self::flush_run(out, run.take())?;
                        run = Some(Run {
                            col: x,
                            row: y,
                            attrs: cell.attrs,
                            text: cell.display_char().to_string(),
                        });
                    }
                }
            }
            Self::flush_run(out, run.take())?;
        }

        queue!(out, ResetColor, SetAttribute(Attribute::Reset))?;
        Ok(())
    }

    fn flush_run<W: Write>(out: &mut W, run: Option<Run>) -> io::Result<()> {
        if let Some(run) = run {
            queue!(out, MoveTo(run.col, run.row))?;
            Self::apply_attrs(out, &run.attrs)?;
            write!(out, "{}", run.text)?;
        }
        Ok(())
    }

    /// Apply cell attributes
    fn apply_attrs<W: Write>(out: &mut W, attrs: &CellAttrs) -> io::Result<()> {
        queue!(out, SetAttribute(Attribute::Reset))?;

        if attrs.bold() {
            queue!(out, SetAttribute(Attribute::Bold))?;
        }
        if attrs.underlined() {
            queue!(out, SetAttribute(Attribute::Underlined))?;
        }
        if attrs.inverse() {
            queue!(out, SetAttribute(Attribute::Reverse))?;
        }
        if attrs.invisible() {
            queue!(out, SetAttribute(Attribute::Hidden))?;
        }

        queue!(
            out,
            SetForegroundColor(to_crossterm(attrs.fg)),
            SetBackgroundColor(to_crossterm(attrs.bg))
        )?;
        Ok(())
    }
}

impl Drop for Renderer {
    fn drop(&mut self) {
        let _ = self.cleanup();
    }
}

/// Plain-text renderer used for dumps and tests
pub struct DebugRenderer;

impl DebugRenderer {
    /// Render the grid to a string
    pub fn render(grid: &TerminalGrid) -> String {
        let cursor = grid.cursor();
        let mut output = String::new();

        output.push_str(&format!("=== Terminal {}x{} ===\n", grid.width(), grid.height()));
        output.push_str(&format!("Cursor: ({}, {})\n", cursor.col, cursor.row));
        output.push_str("─".repeat(grid.width() as usize).as_str());
        output.push('\n');

        for (row_idx, row) in grid.rows().iter().enumerate() {
            let indicator = if row_idx == cursor.row as usize { '>' } else { ' ' };
            output.push(indicator);
            output.push_str(row.text().trim_end());
            output.push('\n');
        }

        output.push_str("─".repeat(grid.width() as usize).as_str());
        output.push('\n');

        output
    }
}
