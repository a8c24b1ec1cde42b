//! Terminal emulation: attributes, the character grid and the escape parser

pub mod attr;
pub mod escape;
pub mod grid;

pub use attr::{AttrFlags, CellAttrs, Color};
pub use escape::{EscapeParser, EscapeState, Progress};
pub use grid::{Cell, Cursor, Row, TerminalGrid};
