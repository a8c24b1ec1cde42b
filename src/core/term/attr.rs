//! Display attributes
//!
//! The eight-colour palette, the style flags and the SGR code table that
//! mutates them.

use bitflags::bitflags;

/// Colour definition
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub enum Color {
    Black = 0,
    Red = 1,
    Green = 2,
    Yellow = 3,
    Blue = 4,
    Magenta = 5,
    Cyan = 6,
    White = 7,
}

impl Color {
    pub const ALL: [Color; 8] = [
        Color::Black,
        Color::Red,
        Color::Green,
        Color::Yellow,
        Color::Blue,
        Color::Magenta,
        Color::Cyan,
        Color::White,
    ];

    /// Colour for an SGR offset (0-7), as in `30 + n` / `40 + n`
    pub fn from_index(n: u32) -> Option<Self> {
        Self::ALL.get(n as usize).copied()
    }
}

bitflags! {
    #[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Hash)]
    pub struct AttrFlags: u8 {
        const BOLD      = 0b0000_0001;
        const UNDERLINE = 0b0000_0010;
        const INVERSE   = 0b0000_0100;
        const INVISIBLE = 0b0000_1000;
    }
}

/// Cell attributes
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub struct CellAttrs {
    pub fg: Color,
    pub bg: Color,
    pub flags: AttrFlags,
}

impl Default for CellAttrs {
    fn default() -> Self {
        Self {
            fg: Color::White,
            bg: Color::Black,
            flags: AttrFlags::empty(),
        }
    }
}

impl CellAttrs {
    pub fn reset(&mut self) {
        *self = Self::default();
    }

    pub fn is_default(&self) -> bool {
        *self == Self::default()
    }

    pub fn bold(&self) -> bool {
        self.flags.contains(AttrFlags::BOLD)
    }

    pub fn underlined(&self) -> bool {
        self.flags.contains(AttrFlags::UNDERLINE)
    }

    pub fn inverse(&self) -> bool {
        self.flags.contains(AttrFlags::INVERSE)
    }

    pub fn invisible(&self) -> bool {
        self.flags.contains(AttrFlags::INVISIBLE)
    }

    /// Apply one SGR code. Returns false when the code is not in the table,
    /// leaving the attributes untouched.
    pub fn apply_sgr(&mut self, code: u32) -> bool {
        match code {
            0 => self.reset(),
            // blink renders as bold
            1 | 5 => self.flags |= AttrFlags::BOLD,
            4 => self.flags |= AttrFlags::UNDERLINE,
            7 => self.flags |= AttrFlags::INVERSE,
            8 => self.flags |= AttrFlags::INVISIBLE,

            22 | 25 => self.flags &= !AttrFlags::BOLD,
            24 => self.flags &= !AttrFlags::UNDERLINE,
            27 => self.flags &= !AttrFlags::INVERSE,
            28 => self.flags &= !AttrFlags::INVISIBLE,

            30..=37 => {
                if let Some(color) = Color::from_index(code - 30) {
                    self.fg = color;
                }
            }
            39 => self.fg = Color::White,

            40..=47 => {
                if let Some(color) = Color::from_index(code - 40) {
                    self.bg = color;
                }
            }
            // the default background is white in this table, not black
            49 => self.bg = Color::White,

            _ => return false,
        }
        true
    }
}
