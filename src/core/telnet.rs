//! Telnet session
//!
//! The outermost state machine. Consumes the raw server byte stream, answers
//! option negotiation, hands escape sequences to the [`EscapeParser`] and
//! writes everything else into the [`TerminalGrid`]. Replies and keystrokes
//! collect in an outbound queue that the transport drains on its own cadence.

use std::io::{self, ErrorKind as IoErrorKind, Write};

use bitflags::bitflags;
use tracing::{debug, info, trace, warn};

use super::error::TermError;
use super::term::{EscapeParser, Progress, TerminalGrid};

/// Interpret As Command
pub const IAC: u8 = 255;
pub const DONT: u8 = 254;
pub const DO: u8 = 253;
pub const WONT: u8 = 252;
pub const WILL: u8 = 251;
/// Sub-negotiation begin
pub const SB: u8 = 250;
pub const DATA_MARK: u8 = 242;
/// Sub-negotiation end
pub const SE: u8 = 240;

/// Sub-negotiation verbs
pub const IS: u8 = 0;
pub const SEND: u8 = 1;

/// NEW-ENVIRON field markers
const ENV_VAR: u8 = 0;
const ENV_VALUE: u8 = 1;

/// Telnet option numbers understood by the session
pub mod opt {
    pub const ECHO: u8 = 1;
    pub const SGA: u8 = 3;
    pub const STATUS: u8 = 5;
    pub const TTYPE: u8 = 24;
    pub const NAWS: u8 = 31;
    pub const TSPEED: u8 = 32;
    pub const TOGGLE_FLOW: u8 = 33;
    pub const XDISPLOC: u8 = 35;
    pub const NEW_ENVIRON: u8 = 39;

    pub fn name(option: u8) -> &'static str {
        match option {
            ECHO => "ECHO",
            SGA => "SUPPRESS-GO-AHEAD",
            STATUS => "STATUS",
            TTYPE => "TERMINAL-TYPE",
            NAWS => "NAWS",
            TSPEED => "TERMINAL-SPEED",
            TOGGLE_FLOW => "TOGGLE-FLOW-CONTROL",
            XDISPLOC => "X-DISPLAY-LOCATION",
            NEW_ENVIRON => "NEW-ENVIRON",
            _ => "UNKNOWN",
        }
    }
}

const NUL: u8 = 0x00;
const BEL: u8 = 0x07;
const BS: u8 = 0x08;
const LF: u8 = 0x0A;
const CR: u8 = 0x0D;
const SO: u8 = 0x0E;
const SI: u8 = 0x0F;
const ESC: u8 = 0x1B;

const TERMINAL_TYPE: &[u8] = b"xterm";
const TERMINAL_SPEED: &[u8] = b"38400,38400";

/// Session state
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TelnetState {
    Disconnected,
    Start,
    Iac,
    IacDo,
    IacWill,
    IacDont,
    IacSb,
    IacSbTermSpeed,
    IacSbXDisplay,
    IacSbNewEnviron,
    IacSbTermType,
    IacSbToggleFlow,
    Esc,
    Error,
}

bitflags! {
    /// Options this side agreed to
    #[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
    pub struct NegotiatedOptions: u8 {
        const ECHO                = 0b0000_0001;
        const TERMINAL_TYPE       = 0b0000_0010;
        const TERMINAL_SPEED      = 0b0000_0100;
        const X_DISPLAY_LOCATION  = 0b0000_1000;
        const NEW_ENVIRON         = 0b0001_0000;
        const TOGGLE_FLOW_CONTROL = 0b0010_0000;
        const NAWS                = 0b0100_0000;
    }
}

/// Notifications for the layers above the session
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum TermEvent {
    Bell,
    /// Output ran past the grid; raised once until the next connect
    BoundsExceeded { x: i32, y: i32 },
    /// First malformed sequence of this connection
    Diagnostic(TermError),
    /// Server finished a full redraw (tile hint 3)
    FrameComplete,
    Disconnected,
}

/// Settings threaded into a session at construction
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SessionConfig {
    pub width: u16,
    pub height: u16,
    pub server_tiles: bool,
    /// Reported for X-DISPLAY-LOCATION and the NEW-ENVIRON DISPLAY variable
    pub display_location: String,
}

impl Default for SessionConfig {
    fn default() -> Self {
        Self {
            width: 80,
            height: 24,
            server_tiles: true,
            display_location: "ebonterm:0.0".to_string(),
        }
    }
}

pub struct TelnetSession {
    state: TelnetState,
    prev_state: TelnetState,
    /// Byte counter inside the active sub-negotiation
    sub_step: u8,
    flow_mode: u8,
    options: NegotiatedOptions,
    grid: TerminalGrid,
    escape: EscapeParser,
    display_location: String,
    outbound: Vec<u8>,
    events: Vec<TermEvent>,
    diagnostic_reported: bool,
}

impl TelnetSession {
    /// Create a session ready to receive data
    pub fn new(config: SessionConfig) -> Result<Self, TermError> {
        let grid = TerminalGrid::new(config.width, config.height)?;

        Ok(Self {
            state: TelnetState::Start,
            prev_state: TelnetState::Start,
            sub_step: 0,
            flow_mode: 0,
            options: NegotiatedOptions::empty(),
            grid,
            escape: EscapeParser::new(config.server_tiles),
            display_location: config.display_location,
            outbound: Vec::new(),
            events: Vec::new(),
            diagnostic_reported: false,
        })
    }

    /// Start a fresh connection: every state machine and the grid return to
    /// their initial state
    pub fn connect(&mut self) {
        self.state = TelnetState::Start;
        self.prev_state = TelnetState::Start;
        self.sub_step = 0;
        self.options = NegotiatedOptions::empty();
        self.escape.reset();
        self.grid.reset();
        self.grid.enable_erase_all(false);
        self.outbound.clear();
        self.diagnostic_reported = false;
        info!("Session connected ({}x{})", self.grid.width(), self.grid.height());
    }

    /// The transport went away; further input is refused until `connect`
    pub fn disconnect(&mut self) {
        if self.state == TelnetState::Disconnected {
            return;
        }
        self.state = TelnetState::Disconnected;
        self.prev_state = TelnetState::Disconnected;
        self.grid.reset();
        self.outbound.clear();
        self.events.push(TermEvent::Disconnected);
        info!("Session disconnected");
    }

    pub fn state(&self) -> TelnetState {
        self.state
    }

    pub fn is_connected(&self) -> bool {
        self.state != TelnetState::Disconnected
    }

    pub fn options(&self) -> NegotiatedOptions {
        self.options
    }

    pub fn grid(&self) -> &TerminalGrid {
        &self.grid
    }

    pub fn grid_mut(&mut self) -> &mut TerminalGrid {
        &mut self.grid
    }

    pub fn escape(&self) -> &EscapeParser {
        &self.escape
    }

    /// Drain pending notifications
    pub fn take_events(&mut self) -> Vec<TermEvent> {
        std::mem::take(&mut self.events)
    }

    /// Process bytes received from the server
    pub fn feed(&mut self, bytes: &[u8]) -> Result<(), TermError> {
        if self.state == TelnetState::Disconnected {
            debug!("Dropping {} bytes received while disconnected", bytes.len());
            return Err(TermError::Disconnected);
        }

        for &byte in bytes {
            self.step(byte);
        }
        Ok(())
    }

    fn step(&mut self, byte: u8) {
        trace!("telnet {:?} <- {}", self.state, byte);

        if self.prev_state != self.state {
            self.prev_state = self.state;
            self.sub_step = 0;
        }

        let result = match self.state {
            TelnetState::Disconnected => Ok(()),
            TelnetState::Start => {
                self.start(byte);
                Ok(())
            }
            TelnetState::Error => {
                self.state = TelnetState::Start;
                self.start(byte);
                Ok(())
            }
            TelnetState::Esc => self.esc(byte),
            TelnetState::Iac => self.iac(byte),
            TelnetState::IacDo => self.iac_do(byte),
            TelnetState::IacWill => self.iac_will(byte),
            TelnetState::IacDont => self.iac_dont(byte),
            TelnetState::IacSb => self.iac_sb(byte),
            TelnetState::IacSbTermType => self.sb_request(byte, opt::TTYPE),
            TelnetState::IacSbTermSpeed => self.sb_request(byte, opt::TSPEED),
            TelnetState::IacSbXDisplay => self.sb_request(byte, opt::XDISPLOC),
            TelnetState::IacSbNewEnviron => self.sb_request(byte, opt::NEW_ENVIRON),
            TelnetState::IacSbToggleFlow => self.sb_toggle_flow(byte),
        };

        if let Err(err) = result {
            self.fail(err);
        }
        self.collect_notices();
    }

    fn fail(&mut self, err: TermError) {
        warn!("Unexpected server data in {:?}: {}", self.state, err);
        self.state = TelnetState::Error;
        if !self.diagnostic_reported {
            self.diagnostic_reported = true;
            self.events.push(TermEvent::Diagnostic(err));
        }
    }

    fn collect_notices(&mut self) {
        if let Some((x, y)) = self.grid.take_bounds_exceeded() {
            self.events.push(TermEvent::BoundsExceeded { x, y });
        }
        if self.escape.take_frame_complete() {
            self.events.push(TermEvent::FrameComplete);
        }
    }

    fn unexpected(&self, byte: u8) -> TermError {
        TermError::Protocol {
            state: self.state,
            byte,
        }
    }

    fn start(&mut self, byte: u8) {
        match byte {
            IAC => self.state = TelnetState::Iac,
            CR => self.grid.set_cursor_x(1),
            LF => self.grid.move_cursor_y(1),
            BS => self.grid.move_cursor_x(-1),
            BEL => self.events.push(TermEvent::Bell),
            NUL | SO | SI => {}
            ESC => self.state = TelnetState::Esc,
            _ => self.grid.write_byte(byte),
        }
    }

    fn esc(&mut self, byte: u8) -> Result<(), TermError> {
        match self.escape.advance(byte, &mut self.grid)? {
            Progress::Resolved => self.state = TelnetState::Start,
            Progress::Pending => {}
        }
        Ok(())
    }

    fn iac(&mut self, byte: u8) -> Result<(), TermError> {
        self.state = match byte {
            SB => TelnetState::IacSb,
            DO => TelnetState::IacDo,
            WILL => TelnetState::IacWill,
            DONT => TelnetState::IacDont,
            DATA_MARK => TelnetState::Start,
            _ => return Err(self.unexpected(byte)),
        };
        Ok(())
    }

    fn iac_do(&mut self, option: u8) -> Result<(), TermError> {
        let flag = match option {
            opt::ECHO => NegotiatedOptions::ECHO,
            opt::TTYPE => NegotiatedOptions::TERMINAL_TYPE,
            opt::TSPEED => NegotiatedOptions::TERMINAL_SPEED,
            opt::XDISPLOC => NegotiatedOptions::X_DISPLAY_LOCATION,
            opt::NEW_ENVIRON => NegotiatedOptions::NEW_ENVIRON,
            opt::TOGGLE_FLOW => NegotiatedOptions::TOGGLE_FLOW_CONTROL,
            opt::NAWS => NegotiatedOptions::NAWS,
            _ => return Err(self.unexpected(option)),
        };

        debug!("IAC DO {}, replying WILL", opt::name(option));
        self.queue(&[IAC, WILL, option]);

        if option == opt::NAWS {
            // both dimensions are at most 254, so neither byte needs IAC doubling
            let (width, height) = (self.grid.width() as u8, self.grid.height() as u8);
            debug!("Reporting window size {}x{}", width, height);
            self.queue(&[IAC, SB, opt::NAWS, 0, width, 0, height, IAC, SE]);
        }

        self.options |= flag;
        self.state = TelnetState::Start;
        Ok(())
    }

    fn iac_will(&mut self, option: u8) -> Result<(), TermError> {
        match option {
            opt::SGA | opt::STATUS => {
                debug!("IAC WILL {}, replying DO", opt::name(option));
                self.queue(&[IAC, DO, option]);
            }
            opt::ECHO => debug!("IAC WILL ECHO, server echoes input"),
            _ => return Err(self.unexpected(option)),
        }
        self.state = TelnetState::Start;
        Ok(())
    }

    fn iac_dont(&mut self, option: u8) -> Result<(), TermError> {
        match option {
            opt::ECHO => {
                debug!("IAC DONT ECHO, replying WONT");
                self.queue(&[IAC, WONT, opt::ECHO]);
                self.options.remove(NegotiatedOptions::ECHO);
            }
            _ => return Err(self.unexpected(option)),
        }
        self.state = TelnetState::Start;
        Ok(())
    }

    fn iac_sb(&mut self, option: u8) -> Result<(), TermError> {
        self.state = match option {
            opt::TTYPE => TelnetState::IacSbTermType,
            opt::TSPEED => TelnetState::IacSbTermSpeed,
            opt::XDISPLOC => TelnetState::IacSbXDisplay,
            opt::NEW_ENVIRON => TelnetState::IacSbNewEnviron,
            opt::TOGGLE_FLOW => TelnetState::IacSbToggleFlow,
            _ => return Err(self.unexpected(option)),
        };
        Ok(())
    }

    /// `IAC SB <option>` has been seen; expects `SEND IAC SE`, then answers
    fn sb_request(&mut self, byte: u8, option: u8) -> Result<(), TermError> {
        let expected = match self.sub_step {
            0 => SEND,
            1 => IAC,
            _ => SE,
        };
        if byte != expected {
            return Err(self.unexpected(byte));
        }

        self.sub_step += 1;
        if self.sub_step < 3 {
            return Ok(());
        }

        let payload = match option {
            opt::TTYPE => TERMINAL_TYPE.to_vec(),
            opt::TSPEED => TERMINAL_SPEED.to_vec(),
            opt::XDISPLOC => self.display_location.as_bytes().to_vec(),
            _ => {
                let mut env = vec![ENV_VAR];
                env.extend_from_slice(b"DISPLAY");
                env.push(ENV_VALUE);
                env.extend_from_slice(self.display_location.as_bytes());
                env
            }
        };

        debug!(
            "IAC SB {} SEND, replying IS {}",
            opt::name(option),
            String::from_utf8_lossy(&payload)
        );
        let mut reply = vec![IAC, SB, option, IS];
        reply.extend_from_slice(&payload);
        reply.extend_from_slice(&[IAC, SE]);
        self.queue(&reply);

        self.state = TelnetState::Start;
        Ok(())
    }

    /// `IAC SB TOGGLE-FLOW-CONTROL <mode> IAC SE`
    fn sb_toggle_flow(&mut self, byte: u8) -> Result<(), TermError> {
        match self.sub_step {
            0 if byte <= 3 => self.flow_mode = byte,
            1 if byte == IAC => {}
            2 if byte == SE => {
                let mode = match self.flow_mode {
                    0 => "OFF",
                    1 => "ON",
                    2 => "RESTART-ANY",
                    _ => "RESTART-XON",
                };
                debug!("IAC SB TOGGLE-FLOW-CONTROL {} IAC SE", mode);
                self.state = TelnetState::Start;
                return Ok(());
            }
            _ => return Err(self.unexpected(byte)),
        }
        self.sub_step += 1;
        Ok(())
    }

    /// Queue a single keystroke for the server
    pub fn send_keystroke(&mut self, key: u8) {
        self.grid.enable_erase_all(true);
        self.queue(&[key]);
    }

    /// Queue a command string for the server
    pub fn send_command(&mut self, command: &str) {
        self.grid.enable_erase_all(true);
        self.queue(command.as_bytes());
    }

    fn queue(&mut self, bytes: &[u8]) {
        self.outbound.extend_from_slice(bytes);
    }

    pub fn pending_output(&self) -> &[u8] {
        &self.outbound
    }

    /// Write as much of the outbound queue as `writer` accepts.
    /// Whatever could not be written stays queued, in order.
    pub fn flush<W: Write>(&mut self, writer: &mut W) -> io::Result<usize> {
        let mut written = 0;
        let mut failure = None;

        while written < self.outbound.len() {
            match writer.write(&self.outbound[written..]) {
                Ok(0) => break,
                Ok(n) => written += n,
                Err(e)
                    if matches!(
                        e.kind(),
                        IoErrorKind::WouldBlock | IoErrorKind::TimedOut | IoErrorKind::Interrupted
                    ) =>
                {
                    break
                }
                Err(e) => {
                    failure = Some(e);
                    break;
                }
            }
        }

        self.outbound.drain(..written);
        if written > 0 {
            trace!("Sent {} bytes, {} still queued", written, self.outbound.len());
        }

        match failure {
            Some(e) => Err(e),
            None => Ok(written),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::core::error::ErrorKind;
    use crate::core::term::{CellAttrs, Color, EscapeState};

    fn session() -> TelnetSession {
        TelnetSession::new(SessionConfig::default()).unwrap()
    }

    fn row_text(session: &TelnetSession, y: usize) -> String {
        session.grid().rows()[y].text()
    }

    #[test]
    fn test_invalid_size_rejected() {
        let config = SessionConfig {
            width: 0,
            ..SessionConfig::default()
        };
        assert!(TelnetSession::new(config).is_err());
    }

    #[test]
    fn test_plain_text() {
        let mut s = session();
        s.feed(b"Hello\r\nWorld").unwrap();
        assert_eq!(&row_text(&s, 0)[..5], "Hello");
        assert_eq!(&row_text(&s, 1)[..5], "World");
        assert_eq!((s.grid().cursor_x(), s.grid().cursor_y()), (5, 1));
    }

    #[test]
    fn test_backspace_and_ignored_controls() {
        let mut s = session();
        s.feed(b"ab\x08c\x00\x0e\x0f").unwrap();
        assert_eq!(&row_text(&s, 0)[..3], "ac ");
    }

    #[test]
    fn test_bell_event() {
        let mut s = session();
        s.feed(b"\x07").unwrap();
        assert_eq!(s.take_events(), vec![TermEvent::Bell]);
        assert!(s.take_events().is_empty());
    }

    #[test]
    fn test_do_echo_replies_will_echo() {
        let mut s = session();
        s.grid_mut().take_display_changed();
        s.feed(&[IAC, DO, opt::ECHO]).unwrap();

        assert_eq!(s.pending_output(), &[IAC, WILL, opt::ECHO]);
        assert!(s.options().contains(NegotiatedOptions::ECHO));
        assert!(!s.grid_mut().take_display_changed());
        assert_eq!(s.state(), TelnetState::Start);
    }

    #[test]
    fn test_will_sga_replies_do_sga() {
        let mut s = session();
        s.feed(&[IAC, WILL, opt::SGA]).unwrap();
        assert_eq!(s.pending_output(), &[IAC, DO, opt::SGA]);
    }

    #[test]
    fn test_will_status_and_echo() {
        let mut s = session();
        s.feed(&[IAC, WILL, opt::ECHO, IAC, WILL, opt::STATUS]).unwrap();
        assert_eq!(s.pending_output(), &[IAC, DO, opt::STATUS]);
    }

    #[test]
    fn test_dont_echo_replies_wont() {
        let mut s = session();
        s.feed(&[IAC, DO, opt::ECHO, IAC, DONT, opt::ECHO]).unwrap();
        assert_eq!(s.pending_output(), &[IAC, WILL, opt::ECHO, IAC, WONT, opt::ECHO]);
        assert!(!s.options().contains(NegotiatedOptions::ECHO));
    }

    #[test]
    fn test_do_naws_reports_size() {
        let mut s = session();
        s.feed(&[IAC, DO, opt::NAWS]).unwrap();
        assert_eq!(
            s.pending_output(),
            &[IAC, WILL, opt::NAWS, IAC, SB, opt::NAWS, 0, 80, 0, 24, IAC, SE]
        );
        assert!(s.options().contains(NegotiatedOptions::NAWS));
    }

    #[test]
    fn test_terminal_type_subnegotiation() {
        let mut s = session();
        s.feed(&[IAC, DO, opt::TTYPE]).unwrap();
        s.feed(&[IAC, SB, opt::TTYPE, SEND, IAC, SE]).unwrap();

        let mut expected = vec![IAC, WILL, opt::TTYPE, IAC, SB, opt::TTYPE, IS];
        expected.extend_from_slice(b"xterm");
        expected.extend_from_slice(&[IAC, SE]);
        assert_eq!(s.pending_output(), expected.as_slice());
        assert_eq!(s.state(), TelnetState::Start);
    }

    #[test]
    fn test_terminal_speed_subnegotiation() {
        let mut s = session();
        s.feed(&[IAC, SB, opt::TSPEED, SEND, IAC, SE]).unwrap();

        let mut expected = vec![IAC, SB, opt::TSPEED, IS];
        expected.extend_from_slice(b"38400,38400");
        expected.extend_from_slice(&[IAC, SE]);
        assert_eq!(s.pending_output(), expected.as_slice());
    }

    #[test]
    fn test_display_location_subnegotiations() {
        let config = SessionConfig {
            display_location: "host:1.0".to_string(),
            ..SessionConfig::default()
        };
        let mut s = TelnetSession::new(config).unwrap();
        s.feed(&[IAC, SB, opt::XDISPLOC, SEND, IAC, SE]).unwrap();
        s.feed(&[IAC, SB, opt::NEW_ENVIRON, SEND, IAC, SE]).unwrap();

        let mut expected = vec![IAC, SB, opt::XDISPLOC, IS];
        expected.extend_from_slice(b"host:1.0");
        expected.extend_from_slice(&[IAC, SE, IAC, SB, opt::NEW_ENVIRON, IS, 0]);
        expected.extend_from_slice(b"DISPLAY");
        expected.push(1);
        expected.extend_from_slice(b"host:1.0");
        expected.extend_from_slice(&[IAC, SE]);
        assert_eq!(s.pending_output(), expected.as_slice());
    }

    #[test]
    fn test_toggle_flow_has_no_reply() {
        let mut s = session();
        s.feed(&[IAC, SB, opt::TOGGLE_FLOW, 1, IAC, SE]).unwrap();
        assert!(s.pending_output().is_empty());
        assert_eq!(s.state(), TelnetState::Start);
        assert!(s.take_events().is_empty());
    }

    #[test]
    fn test_toggle_flow_mode_out_of_range() {
        let mut s = session();
        s.feed(&[IAC, SB, opt::TOGGLE_FLOW, 4]).unwrap();
        assert_eq!(s.state(), TelnetState::Error);
        assert_eq!(
            s.take_events(),
            vec![TermEvent::Diagnostic(TermError::Protocol {
                state: TelnetState::IacSbToggleFlow,
                byte: 4
            })]
        );
        assert!(s.pending_output().is_empty());
    }

    #[test]
    fn test_do_sga_and_do_status_rejected() {
        for option in [opt::SGA, opt::STATUS] {
            let mut s = session();
            s.feed(&[IAC, DO, option]).unwrap();
            assert_eq!(s.state(), TelnetState::Error);
            assert!(s.pending_output().is_empty());
            assert!(s.options().is_empty());
            assert_eq!(
                s.take_events(),
                vec![TermEvent::Diagnostic(TermError::Protocol {
                    state: TelnetState::IacDo,
                    byte: option
                })]
            );
        }
    }

    #[test]
    fn test_negotiation_split_across_chunks() {
        let mut s = session();
        s.feed(&[IAC]).unwrap();
        s.feed(&[SB, opt::TTYPE]).unwrap();
        s.feed(&[SEND]).unwrap();
        s.feed(&[IAC, SE]).unwrap();
        assert!(s.pending_output().ends_with(&[IAC, SE]));
        assert_eq!(s.state(), TelnetState::Start);
    }

    #[test]
    fn test_unknown_option_recovers() {
        let mut s = session();
        s.feed(&[IAC, DO, 99, b'A']).unwrap();

        assert_eq!(s.grid().byte_at(0, 0), b'A');
        assert!(s.pending_output().is_empty());
        let events = s.take_events();
        assert_eq!(
            events,
            vec![TermEvent::Diagnostic(TermError::Protocol {
                state: TelnetState::IacDo,
                byte: 99
            })]
        );
    }

    #[test]
    fn test_diagnostic_once_per_connection() {
        let mut s = session();
        s.feed(&[IAC, 17, b'x']).unwrap();
        s.feed(b"\x1b[99m").unwrap();
        s.feed(&[IAC, SB, opt::TTYPE, 7]).unwrap();
        let diagnostics = s
            .take_events()
            .into_iter()
            .filter(|e| matches!(e, TermEvent::Diagnostic(_)))
            .count();
        assert_eq!(diagnostics, 1);

        s.connect();
        s.feed(b"\x1bQ").unwrap();
        match s.take_events().as_slice() {
            [TermEvent::Diagnostic(err)] => assert_eq!(err.kind(), ErrorKind::Escape),
            other => panic!("unexpected events {:?}", other),
        }
    }

    #[test]
    fn test_malformed_subnegotiation() {
        let mut s = session();
        s.feed(&[IAC, SB, opt::TTYPE, SEND, b'z']).unwrap();
        assert_eq!(s.state(), TelnetState::Error);
        assert!(s.pending_output().is_empty());

        // the byte after the error is handled as fresh input
        s.feed(b"ok").unwrap();
        assert_eq!(&row_text(&s, 0)[..2], "ok");
        assert_eq!(s.state(), TelnetState::Start);
    }

    #[test]
    fn test_delete_line_pulls_rows_over_cursor_row() {
        let config = SessionConfig {
            width: 2,
            height: 4,
            ..SessionConfig::default()
        };
        let mut s = TelnetSession::new(config).unwrap();
        s.feed(b"aabbccdd").unwrap();
        s.feed(b"\x1b[2;1H\x1b[M").unwrap();

        let rows: Vec<String> = (0..4).map(|y| row_text(&s, y)).collect();
        assert_eq!(rows, vec!["aa", "cc", "dd", "  "]);
    }

    #[test]
    fn test_counted_cursor_forward_is_diagnosed() {
        let mut s = session();
        s.feed(b"\x1b[5C").unwrap();
        assert_eq!(s.grid().cursor_x(), 0);
        match s.take_events().as_slice() {
            [TermEvent::Diagnostic(err)] => assert_eq!(err.kind(), ErrorKind::Escape),
            other => panic!("unexpected events {:?}", other),
        }
    }

    #[test]
    fn test_erase_all_sequence() {
        let mut s = session();
        s.feed(b"\x1b[32mjunk\r\nmore junk").unwrap();
        s.feed(b"\x1b[2J").unwrap();
        for y in 0..24 {
            for x in 0..80 {
                assert_eq!(s.grid().byte_at(x, y), b' ');
                assert_eq!(s.grid().attributes_at(x, y), CellAttrs::default());
            }
        }
    }

    #[test]
    fn test_sgr_color_through_session() {
        let mut s = session();
        s.feed(b"B\x1b[31mA").unwrap();
        assert_eq!(s.grid().attributes_at(0, 0).fg, Color::White);
        assert_eq!(s.grid().attributes_at(1, 0).fg, Color::Red);
        assert_eq!(s.grid().byte_at(1, 0), b'A');
    }

    #[test]
    fn test_erase_all_gate_after_connect() {
        let mut s = session();
        s.connect();
        s.feed(b"first\x1b[2J").unwrap();
        assert_eq!(&row_text(&s, 0)[..5], "     ");

        s.feed(b"\x1b[Hsecond\x1b[2J").unwrap();
        assert_eq!(&row_text(&s, 0)[..6], "second");

        s.send_keystroke(b'k');
        s.feed(b"\x1b[2J").unwrap();
        assert_eq!(&row_text(&s, 0)[..6], "      ");
        assert_eq!(s.pending_output(), b"k");
    }

    #[test]
    fn test_bounds_event_is_one_shot() {
        let mut s = session();
        s.feed(b"\x1b[24;1H").unwrap();
        s.feed(b"\n").unwrap();
        s.feed(b"\n\n").unwrap();
        let bounds: Vec<_> = s
            .take_events()
            .into_iter()
            .filter(|e| matches!(e, TermEvent::BoundsExceeded { .. }))
            .collect();
        assert_eq!(bounds, vec![TermEvent::BoundsExceeded { x: 0, y: 24 }]);
        assert_eq!(s.grid().cursor_y(), 23);
    }

    #[test]
    fn test_frame_complete_event() {
        let mut s = session();
        s.feed(b"\x1b[0;12z@\x1b[1z\x1b[3z").unwrap();
        assert_eq!(s.take_events(), vec![TermEvent::FrameComplete]);
        assert_eq!(s.grid().cell(0, 0).unwrap().tile, Some(12));
    }

    #[test]
    fn test_disconnect_and_reconnect() {
        let mut s = session();
        s.feed(b"\x1b[1;33mhello\x1b[5;5H\x1b[?1049h").unwrap();
        s.feed(&[IAC, DO, opt::ECHO]).unwrap();
        s.feed(b"\x1b[1").unwrap();

        s.disconnect();
        assert_eq!(s.state(), TelnetState::Disconnected);
        assert_eq!(s.feed(b"ignored"), Err(TermError::Disconnected));
        assert_eq!(s.take_events().last(), Some(&TermEvent::Disconnected));

        s.connect();
        assert_eq!(s.state(), TelnetState::Start);
        assert_eq!(s.escape().state(), EscapeState::Start);
        assert!(!s.escape().alternate_buffer());
        assert!(s.options().is_empty());
        for y in 0..24 {
            for x in 0..80 {
                assert_eq!(s.grid().byte_at(x, y), b' ');
                assert_eq!(s.grid().attributes_at(x, y), CellAttrs::default());
            }
        }
        assert_eq!((s.grid().cursor_x(), s.grid().cursor_y()), (0, 0));
    }

    /// Accepts a fixed number of bytes per call, then blocks
    struct ChokedWriter {
        accepted: Vec<u8>,
        per_call: usize,
        calls_left: usize,
    }

    impl Write for ChokedWriter {
        fn write(&mut self, buf: &[u8]) -> io::Result<usize> {
            if self.calls_left == 0 {
                return Err(io::Error::new(IoErrorKind::WouldBlock, "full"));
            }
            self.calls_left -= 1;
            let n = buf.len().min(self.per_call);
            self.accepted.extend_from_slice(&buf[..n]);
            Ok(n)
        }

        fn flush(&mut self) -> io::Result<()> {
            Ok(())
        }
    }

    #[test]
    fn test_partial_flush_keeps_order() {
        let mut s = session();
        s.send_command("search");
        s.send_keystroke(b'\r');

        let mut writer = ChokedWriter {
            accepted: Vec::new(),
            per_call: 2,
            calls_left: 2,
        };
        assert_eq!(s.flush(&mut writer).unwrap(), 4);
        assert_eq!(s.pending_output(), b"ch\r");

        writer.calls_left = 10;
        assert_eq!(s.flush(&mut writer).unwrap(), 3);
        assert_eq!(writer.accepted, b"search\r");
        assert!(s.pending_output().is_empty());
    }

    #[test]
    fn test_flush_propagates_hard_errors() {
        struct Broken;
        impl Write for Broken {
            fn write(&mut self, _buf: &[u8]) -> io::Result<usize> {
                Err(io::Error::new(IoErrorKind::BrokenPipe, "gone"))
            }
            fn flush(&mut self) -> io::Result<()> {
                Ok(())
            }
        }

        let mut s = session();
        s.send_keystroke(b'i');
        assert!(s.flush(&mut Broken).is_err());
        assert_eq!(s.pending_output(), b"i");
    }
}
