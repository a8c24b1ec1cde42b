//! Core protocol and terminal emulation components.
//!
//! - **error**: error taxonomy shared by the state machines
//! - **term**: character grid, display attributes and the xterm escape parser
//! - **telnet**: telnet session state machine and outbound queue
//! - **connection**: TCP transport feeding a session from a reader thread
//!
//! # Architecture
//!
//! ```text
//! Connection
//! ├── TcpStream (reader thread -> channel)
//! └── TelnetSession
//!     ├── option negotiation + outbound queue
//!     ├── EscapeParser (bytes after ESC)
//!     └── TerminalGrid (cells, cursor, change flags)
//! ```

pub mod connection;
pub mod error;
pub mod telnet;
pub mod term;
