//! User interface rendering and input handling.
//!
//! - **keymapper**: keyboard input to outbound keystroke bytes
//! - **renderer**: crossterm screen renderer and a plain-text dump

pub mod keymapper;
pub mod renderer;

pub use keymapper::*;
pub use renderer::*;
