//! Character grid
//!
//! A fixed-size array of cells, the write cursor and the change flags a
//! renderer polls for partial redraws. The grid knows nothing about telnet
//! or escape sequences; the state machines above it call these methods.

use tracing::{debug, warn};

use super::attr::{CellAttrs, Color};
use crate::core::error::TermError;

/// Largest width or height a grid may have
pub const MAX_DIMENSION: u16 = 254;

/// A single cell
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct Cell {
    pub ch: u8,
    pub attrs: CellAttrs,
    /// Server-suggested tile active when the cell was written
    pub tile: Option<u32>,
}

impl Default for Cell {
    fn default() -> Self {
        Self::blank(CellAttrs::default())
    }
}

impl Cell {
    pub fn blank(attrs: CellAttrs) -> Self {
        Self {
            ch: b' ',
            attrs,
            tile: None,
        }
    }

    pub fn is_blank(&self) -> bool {
        self.ch == b' ' && self.attrs.is_default() && self.tile.is_none()
    }

    /// Display character (control and high bytes show as their Latin-1 code point)
    pub fn display_char(&self) -> char {
        match self.ch {
            0x20..=0x7E | 0xA0..=0xFF => self.ch as char,
            _ => ' ',
        }
    }
}

/// A single row
#[derive(Clone, Debug)]
pub struct Row {
    pub cells: Vec<Cell>,
    changed: Vec<bool>,
}

impl Row {
    pub fn new(cols: u16, attrs: CellAttrs) -> Self {
        Self {
            cells: vec![Cell::blank(attrs); cols as usize],
            changed: vec![true; cols as usize],
        }
    }

    fn set(&mut self, col: usize, cell: Cell) {
        if let Some(slot) = self.cells.get_mut(col) {
            *slot = cell;
            self.changed[col] = true;
        }
    }

    fn clear(&mut self, attrs: CellAttrs) {
        for cell in &mut self.cells {
            *cell = Cell::blank(attrs);
        }
        self.mark_all_changed();
    }

    fn mark_all_changed(&mut self) {
        self.changed.iter_mut().for_each(|c| *c = true);
    }

    /// Row contents as text, trailing blanks included
    pub fn text(&self) -> String {
        self.cells.iter().map(Cell::display_char).collect()
    }
}

/// Write cursor, 0-based
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
pub struct Cursor {
    pub col: u16,
    pub row: u16,
}

/// The terminal's visible contents
pub struct TerminalGrid {
    cols: u16,
    rows: u16,
    lines: Vec<Row>,
    cursor: Cursor,
    /// Attributes newly written cells inherit
    pub current_attrs: CellAttrs,
    write_tile: Option<u32>,
    display_changed: bool,
    allow_erase_all: bool,
    first_erase_all: bool,
    bounds_reported: bool,
    bounds_pending: Option<(i32, i32)>,
}

impl TerminalGrid {
    pub fn new(cols: u16, rows: u16) -> Result<Self, TermError> {
        if cols == 0 || rows == 0 || cols > MAX_DIMENSION || rows > MAX_DIMENSION {
            return Err(TermError::InvalidSize {
                width: cols,
                height: rows,
            });
        }

        Ok(Self {
            cols,
            rows,
            lines: (0..rows).map(|_| Row::new(cols, CellAttrs::default())).collect(),
            cursor: Cursor::default(),
            current_attrs: CellAttrs::default(),
            write_tile: None,
            display_changed: true,
            allow_erase_all: true,
            first_erase_all: true,
            bounds_reported: false,
            bounds_pending: None,
        })
    }

    /// Blank every cell with default attributes and home the cursor.
    /// The erase-all gate is left as it is.
    pub fn reset(&mut self) {
        for line in &mut self.lines {
            line.clear(CellAttrs::default());
        }
        self.cursor = Cursor::default();
        self.current_attrs = CellAttrs::default();
        self.write_tile = None;
        self.display_changed = true;
        self.bounds_reported = false;
        self.bounds_pending = None;
    }

    pub fn width(&self) -> u16 {
        self.cols
    }

    pub fn height(&self) -> u16 {
        self.rows
    }

    pub fn cursor(&self) -> Cursor {
        self.cursor
    }

    pub fn cursor_x(&self) -> u16 {
        self.cursor.col
    }

    pub fn cursor_y(&self) -> u16 {
        self.cursor.row
    }

    pub fn rows(&self) -> &[Row] {
        &self.lines
    }

    pub fn cell(&self, x: u16, y: u16) -> Option<&Cell> {
        self.lines.get(y as usize).and_then(|row| row.cells.get(x as usize))
    }

    /// Character at (x, y); out-of-range coordinates are clamped to the grid
    pub fn byte_at(&self, x: u16, y: u16) -> u8 {
        self.clamped_cell(x, y).ch
    }

    /// Attributes at (x, y); out-of-range coordinates are clamped to the grid
    pub fn attributes_at(&self, x: u16, y: u16) -> CellAttrs {
        self.clamped_cell(x, y).attrs
    }

    fn clamped_cell(&self, x: u16, y: u16) -> &Cell {
        if x >= self.cols || y >= self.rows {
            debug!("Grid read at ({}, {}) clamped to {}x{}", x, y, self.cols, self.rows);
        }
        let x = x.min(self.cols - 1) as usize;
        let y = y.min(self.rows - 1) as usize;
        &self.lines[y].cells[x]
    }

    /// Write a character at the cursor and advance, wrapping at the right edge
    pub fn write_byte(&mut self, byte: u8) {
        let cell = Cell {
            ch: byte,
            attrs: self.current_attrs,
            tile: self.write_tile,
        };
        let (col, row) = (self.cursor.col as usize, self.cursor.row as usize);
        self.lines[row].set(col, cell);

        self.cursor.col += 1;
        if self.cursor.col >= self.cols {
            self.cursor.col = 0;
            self.cursor.row += 1;

            if self.cursor.row >= self.rows {
                self.cursor.row = self.rows - 1;
                self.report_bounds(0, self.rows as i32);
            }
        }

        self.display_changed = true;
    }

    /// Erase the whole screen, subject to the erase-all gate
    pub fn erase_all(&mut self) {
        if !(self.allow_erase_all || self.first_erase_all) {
            debug!("Erase all suppressed while awaiting a keystroke");
            return;
        }
        self.first_erase_all = false;

        for line in &mut self.lines {
            line.clear(CellAttrs::default());
        }
        self.display_changed = true;
    }

    /// Blank the cursor column from the cursor row to the bottom.
    ///
    /// Only the cursor's column is touched, not the full rectangle below the
    /// cursor line. Servers written against this client depend on it.
    pub fn erase_below(&mut self) {
        let col = self.cursor.col as usize;
        let blank = Cell::blank(self.current_attrs);
        for row in self.cursor.row as usize..self.rows as usize {
            self.lines[row].set(col, blank);
        }
        self.display_changed = true;
    }

    /// Blank the cursor row from the cursor column to the right edge
    pub fn erase_to_right(&mut self) {
        let blank = Cell::blank(self.current_attrs);
        let line = &mut self.lines[self.cursor.row as usize];
        for col in self.cursor.col as usize..self.cols as usize {
            line.set(col, blank);
        }
        self.display_changed = true;
    }

    /// Shift the cursor row left `n` times, starting right of the cursor
    pub fn delete_characters(&mut self, n: u32) {
        let start = self.cursor.col as usize + 1;
        let cols = self.cols as usize;
        if start >= cols {
            return;
        }

        let blank = Cell::blank(self.current_attrs);
        let passes = (n as usize).min(cols - start);
        let line = &mut self.lines[self.cursor.row as usize];
        for _ in 0..passes {
            line.cells.remove(start);
            line.cells.push(blank);
        }
        for col in start..cols {
            line.changed[col] = true;
        }
        self.display_changed = true;
    }

    /// Delete `n` lines at the cursor: the rows below shift up over the cursor
    /// row and a blank row is exposed at the bottom on each pass.
    pub fn delete_lines(&mut self, n: u32) {
        let row = self.cursor.row as usize;
        let rows = self.rows as usize;

        let passes = (n as usize).min(rows - row);
        for _ in 0..passes {
            self.lines.remove(row);
            self.lines.push(Row::new(self.cols, self.current_attrs));
        }
        for line in &mut self.lines[row..] {
            line.mark_all_changed();
        }
        self.display_changed = true;
    }

    /// Set the cursor column from a 1-based position
    pub fn set_cursor_x(&mut self, pos: u32) {
        if pos == 0 {
            debug!("Cursor column 0 ignored, positions are 1-based");
            return;
        }
        let col = pos - 1;
        if col >= self.cols as u32 {
            self.cursor.col = self.cols - 1;
            self.report_bounds(col as i32, self.cursor.row as i32);
        } else {
            self.cursor.col = col as u16;
        }
    }

    /// Set the cursor row from a 1-based position
    pub fn set_cursor_y(&mut self, pos: u32) {
        if pos == 0 {
            debug!("Cursor row 0 ignored, positions are 1-based");
            return;
        }
        let row = pos - 1;
        if row >= self.rows as u32 {
            self.cursor.row = self.rows - 1;
            self.report_bounds(self.cursor.col as i32, row as i32);
        } else {
            self.cursor.row = row as u16;
        }
    }

    /// Move the cursor horizontally, clamping at both edges
    pub fn move_cursor_x(&mut self, delta: i32) {
        let target = self.cursor.col as i32 + delta;
        self.cursor.col = target.clamp(0, self.cols as i32 - 1) as u16;
    }

    /// Move the cursor vertically; running off the bottom is reported
    pub fn move_cursor_y(&mut self, delta: i32) {
        let target = self.cursor.row as i32 + delta;
        if target < 0 {
            self.cursor.row = 0;
        } else if target >= self.rows as i32 {
            self.cursor.row = self.rows - 1;
            self.report_bounds(self.cursor.col as i32, target);
        } else {
            self.cursor.row = target as u16;
        }
    }

    pub fn set_default_attribute(&mut self) {
        self.current_attrs.reset();
    }

    pub fn set_bold(&mut self) {
        self.current_attrs.apply_sgr(1);
    }

    pub fn set_underlined(&mut self) {
        self.current_attrs.apply_sgr(4);
    }

    pub fn set_inverse(&mut self) {
        self.current_attrs.apply_sgr(7);
    }

    pub fn set_invisible(&mut self) {
        self.current_attrs.apply_sgr(8);
    }

    pub fn clear_bold(&mut self) {
        self.current_attrs.apply_sgr(22);
    }

    pub fn clear_underlined(&mut self) {
        self.current_attrs.apply_sgr(24);
    }

    pub fn clear_inverse(&mut self) {
        self.current_attrs.apply_sgr(27);
    }

    pub fn clear_invisible(&mut self) {
        self.current_attrs.apply_sgr(28);
    }

    pub fn set_foreground(&mut self, color: Color) {
        self.current_attrs.fg = color;
    }

    pub fn set_background(&mut self, color: Color) {
        self.current_attrs.bg = color;
    }

    /// Tile id stamped onto subsequently written cells
    pub fn set_write_tile(&mut self, tile: Option<u32>) {
        self.write_tile = tile;
    }

    /// While disabled, only the first erase-all after disabling executes
    pub fn enable_erase_all(&mut self, enabled: bool) {
        self.allow_erase_all = enabled;
        if !enabled {
            self.first_erase_all = true;
        }
    }

    /// Returns and clears the global change flag
    pub fn take_display_changed(&mut self) -> bool {
        std::mem::take(&mut self.display_changed)
    }

    /// Returns and clears the change flag of one cell
    pub fn take_cell_changed(&mut self, x: u16, y: u16) -> bool {
        self.lines
            .get_mut(y as usize)
            .and_then(|row| row.changed.get_mut(x as usize))
            .map(std::mem::take)
            .unwrap_or(false)
    }

    /// Pending boundary notification, raised at most once until the next reset
    pub fn take_bounds_exceeded(&mut self) -> Option<(i32, i32)> {
        self.bounds_pending.take()
    }

    fn report_bounds(&mut self, x: i32, y: i32) {
        let err = TermError::Bounds {
            x,
            y,
            width: self.cols,
            height: self.rows,
        };
        debug!("{}, clamped", err);
        if !self.bounds_reported {
            warn!("Received data outside the display, contents may be inaccurate: {}", err);
            self.bounds_reported = true;
            self.bounds_pending = Some((x, y));
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use proptest::prelude::*;

    fn grid_with_text(cols: u16, rows: u16, lines: &[&str]) -> TerminalGrid {
        let mut grid = TerminalGrid::new(cols, rows).unwrap();
        for (y, text) in lines.iter().enumerate() {
            grid.set_cursor_x(1);
            grid.set_cursor_y(y as u32 + 1);
            for b in text.bytes() {
                grid.write_byte(b);
            }
        }
        grid.set_cursor_x(1);
        grid.set_cursor_y(1);
        grid
    }

    #[test]
    fn test_invalid_size() {
        assert!(TerminalGrid::new(0, 24).is_err());
        assert!(TerminalGrid::new(80, 0).is_err());
        assert!(TerminalGrid::new(255, 24).is_err());
        assert!(TerminalGrid::new(254, 254).is_ok());
    }

    #[test]
    fn test_new_grid_is_blank() {
        let grid = TerminalGrid::new(10, 4).unwrap();
        for y in 0..4 {
            for x in 0..10 {
                assert!(grid.cell(x, y).unwrap().is_blank());
            }
        }
        assert_eq!((grid.cursor_x(), grid.cursor_y()), (0, 0));
    }

    #[test]
    fn test_write_wraps_without_bounds_notice() {
        let mut grid = TerminalGrid::new(5, 3).unwrap();
        for b in b"abcde" {
            grid.write_byte(*b);
        }
        assert_eq!((grid.cursor_x(), grid.cursor_y()), (0, 1));
        assert_eq!(grid.take_bounds_exceeded(), None);
        assert_eq!(grid.rows()[0].text(), "abcde");
    }

    #[test]
    fn test_bounds_notice_is_one_shot() {
        let mut grid = TerminalGrid::new(3, 2).unwrap();
        grid.set_cursor_y(2);
        for b in b"xyz" {
            grid.write_byte(*b);
        }
        assert_eq!((grid.cursor_x(), grid.cursor_y()), (0, 1));
        assert!(grid.take_bounds_exceeded().is_some());

        for b in b"xyzxyz" {
            grid.write_byte(*b);
        }
        assert_eq!(grid.take_bounds_exceeded(), None);

        grid.reset();
        grid.set_cursor_y(2);
        for b in b"xyz" {
            grid.write_byte(*b);
        }
        assert!(grid.take_bounds_exceeded().is_some());
    }

    #[test]
    fn test_write_uses_current_attributes() {
        let mut grid = TerminalGrid::new(4, 2).unwrap();
        grid.write_byte(b'a');
        grid.set_foreground(Color::Red);
        grid.set_bold();
        grid.write_byte(b'b');

        assert_eq!(grid.attributes_at(0, 0), CellAttrs::default());
        let attrs = grid.attributes_at(1, 0);
        assert_eq!(attrs.fg, Color::Red);
        assert!(attrs.bold());
    }

    #[test]
    fn test_style_mutators_touch_only_current_attribute() {
        let mut grid = TerminalGrid::new(4, 1).unwrap();
        grid.set_underlined();
        grid.set_inverse();
        grid.set_invisible();
        grid.write_byte(b'a');
        let attrs = grid.current_attrs;
        assert!(attrs.underlined() && attrs.inverse() && attrs.invisible());

        grid.clear_bold();
        grid.clear_underlined();
        grid.clear_inverse();
        grid.clear_invisible();
        assert!(grid.current_attrs.is_default());
        assert_eq!(grid.attributes_at(0, 0), attrs);
    }

    #[test]
    fn test_write_tile_is_stamped() {
        let mut grid = TerminalGrid::new(4, 2).unwrap();
        grid.set_write_tile(Some(412));
        grid.write_byte(b'@');
        grid.set_write_tile(None);
        grid.write_byte(b'.');
        assert_eq!(grid.cell(0, 0).unwrap().tile, Some(412));
        assert_eq!(grid.cell(1, 0).unwrap().tile, None);
    }

    #[test]
    fn test_erase_all_gate() {
        let mut grid = grid_with_text(4, 2, &["abcd", "efgh"]);
        grid.enable_erase_all(false);

        grid.erase_all();
        assert_eq!(grid.rows()[0].text(), "    ");

        for b in b"zz" {
            grid.write_byte(*b);
        }
        grid.erase_all();
        assert_eq!(grid.rows()[0].text(), "zz  ");

        grid.enable_erase_all(true);
        grid.erase_all();
        assert_eq!(grid.rows()[0].text(), "    ");
    }

    #[test]
    fn test_erase_all_uses_default_attributes() {
        let mut grid = grid_with_text(3, 2, &["abc"]);
        grid.set_background(Color::Blue);
        grid.erase_all();
        assert!(grid.cell(1, 0).unwrap().is_blank());
    }

    #[test]
    fn test_erase_below_only_cursor_column() {
        let mut grid = grid_with_text(3, 3, &["abc", "def", "ghi"]);
        grid.set_cursor_x(2);
        grid.set_cursor_y(2);
        grid.erase_below();

        assert_eq!(grid.rows()[0].text(), "abc");
        assert_eq!(grid.rows()[1].text(), "d f");
        assert_eq!(grid.rows()[2].text(), "g i");
    }

    #[test]
    fn test_erase_to_right() {
        let mut grid = grid_with_text(5, 2, &["hello", "world"]);
        grid.set_cursor_x(3);
        grid.erase_to_right();
        assert_eq!(grid.rows()[0].text(), "he   ");
        assert_eq!(grid.rows()[1].text(), "world");
    }

    #[test]
    fn test_delete_characters() {
        let mut grid = grid_with_text(6, 1, &["abcdef"]);
        grid.set_cursor_x(2);
        grid.delete_characters(2);
        assert_eq!(grid.rows()[0].text(), "abef  ");
    }

    #[test]
    fn test_delete_characters_at_right_edge() {
        let mut grid = grid_with_text(3, 1, &["abc"]);
        grid.set_cursor_x(3);
        grid.delete_characters(5);
        assert_eq!(grid.rows()[0].text(), "abc");
    }

    #[test]
    fn test_delete_lines() {
        let mut grid = grid_with_text(2, 4, &["aa", "bb", "cc", "dd"]);
        grid.set_foreground(Color::Green);
        grid.set_default_attribute();
        grid.set_cursor_y(2);
        for y in 0..4 {
            for x in 0..2 {
                grid.take_cell_changed(x, y);
            }
        }
        grid.delete_lines(1);

        let text: Vec<String> = grid.rows().iter().map(Row::text).collect();
        assert_eq!(text, vec!["aa", "cc", "dd", "  "]);
        assert!(grid.cell(0, 3).unwrap().is_blank());
        assert!(grid.take_cell_changed(0, 1));
        assert!(!grid.take_cell_changed(0, 0));
    }

    #[test]
    fn test_delete_lines_more_than_available() {
        let mut grid = grid_with_text(2, 3, &["aa", "bb", "cc"]);
        grid.set_cursor_y(2);
        grid.delete_lines(10);
        let text: Vec<String> = grid.rows().iter().map(Row::text).collect();
        assert_eq!(text, vec!["aa", "  ", "  "]);
    }

    #[test]
    fn test_delete_lines_on_last_row() {
        let mut grid = grid_with_text(2, 2, &["aa", "bb"]);
        grid.set_cursor_y(2);
        grid.delete_lines(1);
        assert_eq!(grid.rows()[0].text(), "aa");
        assert_eq!(grid.rows()[1].text(), "  ");
    }

    #[test]
    fn test_set_cursor_is_one_based_and_clamped() {
        let mut grid = TerminalGrid::new(10, 5).unwrap();
        grid.set_cursor_x(4);
        grid.set_cursor_y(2);
        assert_eq!((grid.cursor_x(), grid.cursor_y()), (3, 1));

        grid.set_cursor_x(0);
        assert_eq!(grid.cursor_x(), 3);

        grid.set_cursor_x(50);
        assert_eq!(grid.cursor_x(), 9);
        assert_eq!(grid.take_bounds_exceeded(), Some((49, 1)));
    }

    #[test]
    fn test_move_cursor_clamps() {
        let mut grid = TerminalGrid::new(10, 5).unwrap();
        grid.move_cursor_x(-3);
        grid.move_cursor_y(-3);
        assert_eq!((grid.cursor_x(), grid.cursor_y()), (0, 0));
        assert_eq!(grid.take_bounds_exceeded(), None);

        grid.move_cursor_x(30);
        assert_eq!(grid.cursor_x(), 9);
        assert_eq!(grid.take_bounds_exceeded(), None);

        grid.move_cursor_y(30);
        assert_eq!(grid.cursor_y(), 4);
        assert!(grid.take_bounds_exceeded().is_some());
    }

    #[test]
    fn test_change_tracking() {
        let mut grid = TerminalGrid::new(3, 2).unwrap();
        assert!(grid.take_display_changed());
        for y in 0..2 {
            for x in 0..3 {
                grid.take_cell_changed(x, y);
            }
        }
        assert!(!grid.take_display_changed());

        grid.set_cursor_x(2);
        grid.write_byte(b'q');
        assert!(grid.take_display_changed());
        assert!(!grid.take_display_changed());
        assert!(grid.take_cell_changed(1, 0));
        assert!(!grid.take_cell_changed(1, 0));
        assert!(!grid.take_cell_changed(0, 0));
        assert!(!grid.take_cell_changed(7, 7));
    }

    #[test]
    fn test_reset_blanks_everything() {
        let mut grid = grid_with_text(3, 2, &["abc", "def"]);
        grid.set_foreground(Color::Cyan);
        grid.set_cursor_y(2);
        grid.reset();

        for y in 0..2 {
            for x in 0..3 {
                assert_eq!(grid.byte_at(x, y), b' ');
                assert_eq!(grid.attributes_at(x, y), CellAttrs::default());
            }
        }
        assert_eq!((grid.cursor_x(), grid.cursor_y()), (0, 0));
        assert!(grid.current_attrs.is_default());
    }

    #[test]
    fn test_accessors_clamp() {
        let grid = grid_with_text(3, 2, &["abc", "def"]);
        assert_eq!(grid.byte_at(10, 10), b'f');
        assert_eq!(grid.attributes_at(5, 0), CellAttrs::default());
        assert!(grid.cell(3, 0).is_none());
        assert_eq!(grid.cell(2, 1).unwrap().ch, b'f');
    }

    proptest! {
        #[test]
        fn prop_cursor_stays_in_bounds(
            cols in 1u16..=20,
            rows in 1u16..=10,
            bytes in proptest::collection::vec(any::<u8>(), 0..400),
        ) {
            let mut grid = TerminalGrid::new(cols, rows).unwrap();
            for b in bytes {
                grid.write_byte(b);
                prop_assert!(grid.cursor_x() < cols);
                prop_assert!(grid.cursor_y() < rows);
            }
        }
    }
}
