//! ebonterm - a telnet client for roguelike game servers
//!
//! The library holds the protocol and terminal emulation pieces so they can
//! be driven without a console; the `ebonterm` binary wires them to a TCP
//! connection and a crossterm screen.

pub mod config;
pub mod core;
pub mod ui;
