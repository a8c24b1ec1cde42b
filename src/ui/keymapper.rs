//! Key mapping for game input
//!
//! Converts key events to the keystrokes the game expects. Arrow and
//! navigation keys become the eight movement commands.

use bitflags::bitflags;
use crossterm::event::{KeyCode, KeyEvent, KeyModifiers};

bitflags! {
    /// Modifier keys
    #[derive(Clone, Copy, Debug, Default, PartialEq)]
    pub struct Modifiers: u8 {
        const SHIFT = 0b0001;
        const CTRL  = 0b0010;
        const ALT   = 0b0100;
    }
}

impl From<KeyModifiers> for Modifiers {
    fn from(mods: KeyModifiers) -> Self {
        let mut result = Modifiers::empty();
        if mods.contains(KeyModifiers::SHIFT) {
            result |= Modifiers::SHIFT;
        }
        if mods.contains(KeyModifiers::CONTROL) {
            result |= Modifiers::CTRL;
        }
        if mods.contains(KeyModifiers::ALT) {
            result |= Modifiers::ALT;
        }
        result
    }
}

/// Movement directions
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum Direction {
    Up,
    Down,
    Left,
    Right,
    UpLeft,
    DownLeft,
    UpRight,
    DownRight,
}

impl Direction {
    /// Keystroke for this direction, vi keys or number pad digits
    pub fn key(self, number_pad: bool) -> u8 {
        let (vi, numpad) = match self {
            Direction::Up => (b'k', b'8'),
            Direction::Down => (b'j', b'2'),
            Direction::Left => (b'h', b'4'),
            Direction::Right => (b'l', b'6'),
            Direction::UpLeft => (b'y', b'7'),
            Direction::DownLeft => (b'b', b'1'),
            Direction::UpRight => (b'u', b'9'),
            Direction::DownRight => (b'n', b'3'),
        };
        if number_pad {
            numpad
        } else {
            vi
        }
    }
}

/// Key mapper for converting key events to bytes
pub struct KeyMapper {
    number_pad: bool,
}

impl KeyMapper {
    pub fn new(number_pad: bool) -> Self {
        Self { number_pad }
    }

    /// Map a crossterm KeyEvent to bytes for the server
    pub fn map(&self, event: &KeyEvent) -> Option<Vec<u8>> {
        let mods = Modifiers::from(event.modifiers);

        match event.code {
            KeyCode::Char(ch) => Some(Self::map_char(ch, mods)),
            KeyCode::Enter => Some(vec![0x0D]),
            KeyCode::Backspace => Some(vec![0x08]),
            KeyCode::Tab => Some(vec![0x09]),
            KeyCode::Esc => Some(vec![0x1B]),
            KeyCode::Delete => Some(vec![0x7F]),

            KeyCode::Up => Some(self.movement(Direction::Up)),
            KeyCode::Down => Some(self.movement(Direction::Down)),
            KeyCode::Left => Some(self.movement(Direction::Left)),
            KeyCode::Right => Some(self.movement(Direction::Right)),
            KeyCode::Home => Some(self.movement(Direction::UpLeft)),
            KeyCode::End => Some(self.movement(Direction::DownLeft)),
            KeyCode::PageUp => Some(self.movement(Direction::UpRight)),
            KeyCode::PageDown => Some(self.movement(Direction::DownRight)),

            _ => None,
        }
    }

    fn movement(&self, direction: Direction) -> Vec<u8> {
        vec![direction.key(self.number_pad)]
    }

    /// Map a character with modifiers
    fn map_char(ch: char, mods: Modifiers) -> Vec<u8> {
        // Ctrl + letter = control character
        if mods.contains(Modifiers::CTRL) && !mods.contains(Modifiers::ALT) {
            if ch.is_ascii_alphabetic() {
                return vec![(ch.to_ascii_lowercase() as u8) - b'a' + 1];
            }
            match ch {
                '@' | ' ' => return vec![0x00],
                '[' => return vec![0x1B],
                '\\' => return vec![0x1C],
                ']' => return vec![0x1D],
                '^' => return vec![0x1E],
                '_' => return vec![0x1F],
                _ => {}
            }
        }

        // Alt + key = ESC + key
        if mods.contains(Modifiers::ALT) && !mods.contains(Modifiers::CTRL) {
            let mut bytes = vec![0x1B];
            bytes.extend(ch.to_string().as_bytes());
            return bytes;
        }

        ch.to_string().into_bytes()
    }
}
