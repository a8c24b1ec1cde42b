//! Escape sequence parser
//!
//! Consumes the bytes following an ESC (the session strips the ESC itself)
//! and applies the recognised subset of xterm commands to a [`TerminalGrid`].
//! Parameters are kept as raw digit strings until the final byte arrives, so
//! a malformed parameter is reported instead of silently read as zero.

use tracing::{debug, info, trace};

use super::grid::TerminalGrid;
use crate::core::error::TermError;

/// Parser state
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub enum EscapeState {
    #[default]
    Start,
    G0CharSet,
    G1CharSet,
    Csi,
    CsiDec,
    CsiParam,
    Osc,
    OscParam,
    Error,
}

/// Outcome of feeding one byte
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Progress {
    /// More bytes are needed to complete the sequence
    Pending,
    /// The sequence is complete and has been applied
    Resolved,
}

const BEL: u8 = 0x07;
const ESC: u8 = 0x1B;

/// Longest numeric parameter, in digits
const MAX_DIGITS: usize = 16;
/// Longest OSC text parameter, in bytes
const MAX_TEXT_LEN: usize = 256;
/// Most parameters a single sequence may carry
const MAX_PARAMS: usize = 16;

/// Character set designators accepted after `ESC (` and `ESC )`
const CHARSETS: &[u8] = b"BA012";

/// Tile hint sub-commands (`CSI n ; ... z`)
const TILE_START_GLYPH: u32 = 0;
const TILE_END_GLYPH: u32 = 1;
const TILE_SET_WINDOW: u32 = 2;
const TILE_FRAME_COMPLETE: u32 = 3;

pub struct EscapeParser {
    state: EscapeState,
    params: Vec<Vec<u8>>,
    /// 1-based column and row
    saved_cursor: (u32, u32),
    scroll_region: Option<(u32, u32)>,
    alternate_buffer: bool,
    server_tiles: bool,
    use_tile: bool,
    tile: u32,
    frame_complete: bool,
    title_logged: bool,
    set_window_logged: bool,
}

impl EscapeParser {
    pub fn new(server_tiles: bool) -> Self {
        Self {
            state: EscapeState::Start,
            params: Vec::with_capacity(4),
            saved_cursor: (1, 1),
            scroll_region: None,
            alternate_buffer: false,
            server_tiles,
            use_tile: false,
            tile: 0,
            frame_complete: false,
            title_logged: false,
            set_window_logged: false,
        }
    }

    /// Return to the initial state, forgetting everything learned this connection
    pub fn reset(&mut self) {
        *self = Self::new(self.server_tiles);
    }

    pub fn state(&self) -> EscapeState {
        self.state
    }

    /// Whether cells written now should use the server-suggested tile
    pub fn use_tile_number(&self) -> bool {
        self.use_tile
    }

    pub fn tile_number(&self) -> u32 {
        self.tile
    }

    pub fn alternate_buffer(&self) -> bool {
        self.alternate_buffer
    }

    /// Scrolling region as last requested; not enforced
    pub fn scroll_region(&self) -> Option<(u32, u32)> {
        self.scroll_region
    }

    /// Returns and clears the frame-complete notification
    pub fn take_frame_complete(&mut self) -> bool {
        std::mem::take(&mut self.frame_complete)
    }

    /// Feed one byte of an escape sequence
    pub fn advance(&mut self, byte: u8, grid: &mut TerminalGrid) -> Result<Progress, TermError> {
        if matches!(self.state, EscapeState::Start | EscapeState::Error) {
            self.state = EscapeState::Start;
            self.params.clear();
        }
        trace!("escape {:?} <- {:#04x}", self.state, byte);

        let result = match self.state {
            EscapeState::Start | EscapeState::Error => self.start(byte, grid),
            EscapeState::G0CharSet | EscapeState::G1CharSet => self.charset(byte),
            EscapeState::Csi => self.csi(byte, grid),
            EscapeState::CsiDec => self.csi_dec(byte, grid),
            EscapeState::CsiParam => self.csi_param(byte, grid),
            EscapeState::Osc => self.osc(byte),
            EscapeState::OscParam => self.osc_param(byte),
        };

        match &result {
            Ok(Progress::Resolved) => {
                self.state = EscapeState::Start;
                self.params.clear();
            }
            Ok(Progress::Pending) => {}
            Err(err) => {
                debug!("Escape sequence rejected: {}", err);
                self.state = EscapeState::Error;
                self.params.clear();
            }
        }
        result
    }

    fn unexpected(&self, byte: u8) -> TermError {
        TermError::Escape {
            state: self.state,
            byte,
        }
    }

    fn start(&mut self, byte: u8, grid: &mut TerminalGrid) -> Result<Progress, TermError> {
        match byte {
            b'(' => self.state = EscapeState::G0CharSet,
            b')' => self.state = EscapeState::G1CharSet,
            b'[' => self.state = EscapeState::Csi,
            b']' => {
                self.params.push(Vec::new());
                self.state = EscapeState::Osc;
            }
            b'7' => {
                self.save_cursor(grid);
                return Ok(Progress::Resolved);
            }
            b'8' => {
                self.restore_cursor(grid);
                return Ok(Progress::Resolved);
            }
            b'=' => {
                debug!("Application keypad mode requested (ignored)");
                return Ok(Progress::Resolved);
            }
            b'>' => {
                debug!("Normal keypad mode requested (ignored)");
                return Ok(Progress::Resolved);
            }
            _ => return Err(self.unexpected(byte)),
        }
        Ok(Progress::Pending)
    }

    fn charset(&mut self, byte: u8) -> Result<Progress, TermError> {
        if !CHARSETS.contains(&byte) {
            return Err(self.unexpected(byte));
        }
        let slot = if self.state == EscapeState::G0CharSet { "G0" } else { "G1" };
        debug!("{} character set {} designated (ignored)", slot, byte as char);
        Ok(Progress::Resolved)
    }

    fn csi(&mut self, byte: u8, grid: &mut TerminalGrid) -> Result<Progress, TermError> {
        match byte {
            b'?' => {
                self.state = EscapeState::CsiDec;
                return Ok(Progress::Pending);
            }
            b'0'..=b'9' => {
                self.state = EscapeState::CsiParam;
                self.params.push(Vec::new());
                return self.csi_param(byte, grid);
            }
            b'm' => grid.set_default_attribute(),
            b'H' => {
                grid.set_cursor_y(1);
                grid.set_cursor_x(1);
            }
            b'K' => grid.erase_to_right(),
            b'C' => grid.move_cursor_x(1),
            b'A' => grid.move_cursor_y(-1),
            b'D' => grid.move_cursor_x(-1),
            b'J' => grid.erase_below(),
            b'M' => grid.delete_lines(1),
            _ => return Err(self.unexpected(byte)),
        }
        Ok(Progress::Resolved)
    }

    /// Append a byte to the last parameter, or start a new parameter on `;`
    fn accumulate(&mut self, byte: u8, command: &'static str, limit: usize) -> Result<(), TermError> {
        if byte == b';' {
            if self.params.len() >= MAX_PARAMS {
                return Err(TermError::parameter(command, "too many parameters"));
            }
            self.params.push(Vec::new());
            return Ok(());
        }

        match self.params.last_mut() {
            Some(last) if last.len() >= limit => {
                Err(TermError::parameter(command, format!("parameter longer than {} bytes", limit)))
            }
            Some(last) => {
                last.push(byte);
                Ok(())
            }
            None => {
                self.params.push(vec![byte]);
                Ok(())
            }
        }
    }

    fn numeric_params(&self, command: &'static str) -> Result<Vec<u32>, TermError> {
        self.params
            .iter()
            .map(|raw| {
                std::str::from_utf8(raw)
                    .ok()
                    .and_then(|s| s.parse::<u32>().ok())
                    .ok_or_else(|| {
                        TermError::parameter(
                            command,
                            format!("invalid parameter {:?}", String::from_utf8_lossy(raw)),
                        )
                    })
            })
            .collect()
    }

    fn csi_param(&mut self, byte: u8, grid: &mut TerminalGrid) -> Result<Progress, TermError> {
        match byte {
            b'0'..=b'9' | b';' => {
                self.accumulate(byte, "CSI", MAX_DIGITS)?;
                Ok(Progress::Pending)
            }
            b'A' => {
                let n = self.distance("CUU")?;
                grid.move_cursor_y(-n);
                Ok(Progress::Resolved)
            }
            b'B' => {
                let n = self.distance("CUD")?;
                grid.move_cursor_y(n);
                Ok(Progress::Resolved)
            }
            b'd' => {
                let params = self.numeric_params("VPA")?;
                expect_count("VPA", &params, &[1])?;
                grid.set_cursor_y(params[0]);
                Ok(Progress::Resolved)
            }
            b'G' => {
                let params = self.numeric_params("CHA")?;
                expect_count("CHA", &params, &[0, 1])?;
                grid.set_cursor_x(params.first().copied().unwrap_or(1));
                Ok(Progress::Resolved)
            }
            b'H' => {
                let params = self.numeric_params("CUP")?;
                expect_count("CUP", &params, &[0, 2])?;
                let (row, col) = match params.as_slice() {
                    [row, col] => (*row, *col),
                    _ => (1, 1),
                };
                grid.set_cursor_y(row);
                grid.set_cursor_x(col);
                Ok(Progress::Resolved)
            }
            b'J' => {
                let params = self.numeric_params("ED")?;
                expect_count("ED", &params, &[0, 1])?;
                match params.first().copied().unwrap_or(0) {
                    0 => grid.erase_below(),
                    2 => grid.erase_all(),
                    other => {
                        return Err(TermError::Unsupported {
                            command: "ED",
                            value: other,
                        })
                    }
                }
                Ok(Progress::Resolved)
            }
            b'K' => {
                let params = self.numeric_params("EL")?;
                expect_count("EL", &params, &[0, 1])?;
                match params.first().copied().unwrap_or(0) {
                    0 => grid.erase_to_right(),
                    other => {
                        return Err(TermError::Unsupported {
                            command: "EL",
                            value: other,
                        })
                    }
                }
                Ok(Progress::Resolved)
            }
            b'l' => {
                self.reset_mode()?;
                Ok(Progress::Resolved)
            }
            b'm' => {
                for code in self.numeric_params("SGR")? {
                    if !grid.current_attrs.apply_sgr(code) {
                        return Err(TermError::Unsupported {
                            command: "SGR",
                            value: code,
                        });
                    }
                }
                Ok(Progress::Resolved)
            }
            b'P' | b'X' => {
                let params = self.numeric_params("DCH")?;
                expect_count("DCH", &params, &[0, 1])?;
                grid.delete_characters(params.first().copied().unwrap_or(1));
                Ok(Progress::Resolved)
            }
            b'r' => {
                let params = self.numeric_params("DECSTBM")?;
                expect_count("DECSTBM", &params, &[2])?;
                debug!("Scrolling region {}..{} requested (not enforced)", params[0], params[1]);
                self.scroll_region = Some((params[0], params[1]));
                Ok(Progress::Resolved)
            }
            b'z' => {
                self.tile_hint(grid)?;
                Ok(Progress::Resolved)
            }
            _ => Err(self.unexpected(byte)),
        }
    }

    /// Relative cursor distance: one without a parameter, otherwise the parameter
    fn distance(&self, command: &'static str) -> Result<i32, TermError> {
        let params = self.numeric_params(command)?;
        expect_count(command, &params, &[0, 1])?;
        let n = params.first().copied().unwrap_or(1);
        Ok(n.min(i32::MAX as u32) as i32)
    }

    fn reset_mode(&self) -> Result<(), TermError> {
        if self.params.len() != 1 || self.params[0].len() != 1 {
            return Err(TermError::parameter("RM", "expected one single-digit parameter"));
        }
        match self.numeric_params("RM")?[0] {
            2 => debug!("Reset keyboard action mode (ignored)"),
            4 => debug!("Reset insert mode (ignored)"),
            other => {
                return Err(TermError::Unsupported {
                    command: "RM",
                    value: other,
                })
            }
        }
        Ok(())
    }

    fn csi_dec(&mut self, byte: u8, grid: &mut TerminalGrid) -> Result<Progress, TermError> {
        match byte {
            b'0'..=b'9' | b';' => {
                self.accumulate(byte, "DECSET", MAX_DIGITS)?;
                Ok(Progress::Pending)
            }
            b'h' | b'l' => {
                let set = byte == b'h';
                let codes = self.numeric_params("DECSET")?;
                if codes.is_empty() {
                    if set {
                        return Err(TermError::parameter("DECSET", "no mode given"));
                    }
                    debug!("DEC private mode reset without a mode (ignored)");
                    return Ok(Progress::Resolved);
                }
                for code in codes {
                    self.private_mode(code, set, grid)?;
                }
                Ok(Progress::Resolved)
            }
            _ => Err(self.unexpected(byte)),
        }
    }

    fn private_mode(&mut self, code: u32, set: bool, grid: &mut TerminalGrid) -> Result<(), TermError> {
        match (code, set) {
            (1, _) => debug!("Cursor key mode {} (ignored)", on_off(set)),
            (7, _) => debug!("Wraparound mode {} (ignored)", on_off(set)),
            (47, _) => self.alternate_buffer = set,
            (1047, true) => self.alternate_buffer = true,
            (1047, false) => {
                if self.alternate_buffer {
                    grid.erase_all();
                }
                self.alternate_buffer = false;
            }
            (1048, true) => self.save_cursor(grid),
            (1048, false) => self.restore_cursor(grid),
            (1049, true) => {
                self.save_cursor(grid);
                grid.erase_all();
                self.alternate_buffer = true;
            }
            (1049, false) => {
                if self.alternate_buffer {
                    grid.erase_all();
                }
                self.alternate_buffer = false;
                self.restore_cursor(grid);
            }
            (other, _) => {
                return Err(TermError::Unsupported {
                    command: if set { "DECSET" } else { "DECRST" },
                    value: other,
                })
            }
        }
        Ok(())
    }

    fn save_cursor(&mut self, grid: &TerminalGrid) {
        self.saved_cursor = (grid.cursor_x() as u32 + 1, grid.cursor_y() as u32 + 1);
    }

    fn restore_cursor(&mut self, grid: &mut TerminalGrid) {
        let (col, row) = self.saved_cursor;
        grid.set_cursor_x(col);
        grid.set_cursor_y(row);
    }

    fn osc(&mut self, byte: u8) -> Result<Progress, TermError> {
        match byte {
            b'0'..=b'9' => {
                self.accumulate(byte, "OSC", MAX_DIGITS)?;
                Ok(Progress::Pending)
            }
            b';' => {
                self.accumulate(byte, "OSC", MAX_DIGITS)?;
                self.state = EscapeState::OscParam;
                Ok(Progress::Pending)
            }
            _ => Err(self.unexpected(byte)),
        }
    }

    fn osc_param(&mut self, byte: u8) -> Result<Progress, TermError> {
        match byte {
            BEL => {
                self.execute_osc()?;
                Ok(Progress::Resolved)
            }
            ESC => Err(self.unexpected(byte)),
            _ => {
                self.accumulate(byte, "OSC", MAX_TEXT_LEN)?;
                Ok(Progress::Pending)
            }
        }
    }

    fn execute_osc(&mut self) -> Result<(), TermError> {
        if self.params.len() < 2 {
            return Err(TermError::parameter("OSC", "expected a command and a value"));
        }
        let command = std::str::from_utf8(&self.params[0])
            .ok()
            .and_then(|s| s.parse::<u32>().ok())
            .ok_or_else(|| TermError::parameter("OSC", "invalid command type"))?;

        match command {
            2 => {
                if !self.title_logged {
                    info!("Window title: {}", String::from_utf8_lossy(&self.params[1]));
                    self.title_logged = true;
                }
                Ok(())
            }
            other => Err(TermError::Unsupported {
                command: "OSC",
                value: other,
            }),
        }
    }

    fn tile_hint(&mut self, grid: &mut TerminalGrid) -> Result<(), TermError> {
        let params = self.numeric_params("tile hint")?;
        if params.is_empty() {
            return Err(TermError::parameter("tile hint", "missing sub-command"));
        }

        if !self.server_tiles {
            self.use_tile = false;
            grid.set_write_tile(None);
            return Ok(());
        }

        match params[0] {
            TILE_START_GLYPH => {
                expect_count("tile hint", &params, &[2])?;
                self.use_tile = true;
                self.tile = params[1];
                grid.set_write_tile(Some(self.tile));
            }
            TILE_END_GLYPH => {
                expect_count("tile hint", &params, &[1])?;
                self.use_tile = false;
                grid.set_write_tile(None);
            }
            TILE_SET_WINDOW => {
                if !self.set_window_logged {
                    debug!("Tile hint set-window not handled");
                    self.set_window_logged = true;
                }
            }
            TILE_FRAME_COMPLETE => self.frame_complete = true,
            other => {
                return Err(TermError::Unsupported {
                    command: "tile hint",
                    value: other,
                })
            }
        }
        Ok(())
    }
}

fn expect_count(command: &'static str, params: &[u32], allowed: &[usize]) -> Result<(), TermError> {
    if allowed.contains(&params.len()) {
        Ok(())
    } else {
        Err(TermError::parameter(
            command,
            format!("expected {:?} parameters, got {}", allowed, params.len()),
        ))
    }
}

fn on_off(set: bool) -> &'static str {
    if set {
        "on"
    } else {
        "off"
    }
}
