//! Pixel color model.
//!
//! Channels are stored as `u8`, so a `Color` can never hold an out-of-range
//! value. Conversions from wider integers saturate instead of failing; the
//! strict path for untrusted input lives in [`crate::validation`].

use serde::{Deserialize, Serialize};

/// One pixel of the strip.
///
/// # Rust concept: `Copy` types
/// Three bytes are cheaper to copy than to borrow, so `Color` derives `Copy`
/// and is passed around by value everywhere.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Hash, Serialize, Deserialize, utoipa::ToSchema)]
pub struct Color {
    pub red: u8,
    pub green: u8,
    pub blue: u8,
}

impl Color {
    pub const BLACK: Self = Self::new(0, 0, 0);

    pub const fn new(red: u8, green: u8, blue: u8) -> Self {
        Self { red, green, blue }
    }

    /// Build a color from arbitrary integers, saturating each channel into 0-255.
    pub fn saturating(red: i64, green: i64, blue: i64) -> Self {
        Self::new(
            clamp_channel(red),
            clamp_channel(green),
            clamp_channel(blue),
        )
    }

    /// Largest of the three channels.
    pub fn peak(self) -> u8 {
        self.red.max(self.green).max(self.blue)
    }

    pub fn is_black(self) -> bool {
        self.peak() == 0
    }

    /// Position on a red → green → blue → red color wheel.
    ///
    /// 0 is pure red, 85 pure green and 170 pure blue.
    pub fn wheel(position: u8) -> Self {
        let position = 255 - position;
        match position {
            0..=84 => Self::new(255 - position * 3, 0, position * 3),
            85..=169 => {
                let p = position - 85;
                Self::new(0, p * 3, 255 - p * 3)
            }
            _ => {
                let p = position - 170;
                Self::new(p * 3, 255 - p * 3, 0)
            }
        }
    }

    /// The three channels in wire order.
    pub fn to_bytes(self) -> [u8; 3] {
        [self.red, self.green, self.blue]
    }
}

/// Saturate an integer into the 0-255 channel range.
pub fn clamp_channel(value: i64) -> u8 {
    // Lossless after the clamp.
    value.clamp(0, 255) as u8
}

impl From<(i32, i32, i32)> for Color {
    fn from((red, green, blue): (i32, i32, i32)) -> Self {
        Self::saturating(red.into(), green.into(), blue.into())
    }
}

impl From<[u8; 3]> for Color {
    fn from([red, green, blue]: [u8; 3]) -> Self {
        Self::new(red, green, blue)
    }
}
