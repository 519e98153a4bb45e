//! Global brightness and the transform applied when a wire buffer is built.
//!
//! Brightness never touches the logical strip. The pending and displayed
//! strips keep the colors callers asked for; only the bytes sent to the bus
//! are adjusted.

use crate::color::Color;
use serde::{Deserialize, Deserializer, Serialize, Serializer};
use std::fmt;
use std::str::FromStr;

/// Either no adjustment (`auto`) or a level from 0 to 100.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
pub enum Brightness {
    #[default]
    Auto,
    Level(u8),
}

/// Rejected brightness input. Out-of-range numbers and unknown strings
/// produce the same error.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
#[error("brightness must be \"auto\" or an integer from 0 to 100, got {input}")]
pub struct BrightnessError {
    pub input: String,
}

impl BrightnessError {
    fn new(input: impl fmt::Display) -> Self {
        Self {
            input: input.to_string(),
        }
    }
}

impl Brightness {
    pub const MAX: u8 = 100;

    /// The scale factor this brightness applies to a pixel's peak channel,
    /// or `None` for `auto`.
    fn ceiling(self) -> Option<f32> {
        match self {
            Self::Auto => None,
            Self::Level(level) => Some(f32::from(level) * 255.0 / 100.0),
        }
    }
}

impl fmt::Display for Brightness {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Auto => f.write_str("auto"),
            Self::Level(level) => write!(f, "{level}"),
        }
    }
}

// ── Fallible construction ───────────────────────────────────────────

impl TryFrom<i64> for Brightness {
    type Error = BrightnessError;

    fn try_from(value: i64) -> Result<Self, Self::Error> {
        match u8::try_from(value) {
            Ok(level) if level <= Self::MAX => Ok(Self::Level(level)),
            _ => Err(BrightnessError::new(value)),
        }
    }
}

/// Forward the narrower integer types to the `i64` rules.
macro_rules! brightness_from_int {
    ($($ty:ty),*) => {
        $(
            impl TryFrom<$ty> for Brightness {
                type Error = BrightnessError;

                fn try_from(value: $ty) -> Result<Self, Self::Error> {
                    Self::try_from(i64::from(value))
                }
            }
        )*
    };
}

brightness_from_int!(i32, u8, u32);

impl FromStr for Brightness {
    type Err = BrightnessError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        if s == "auto" {
            return Ok(Self::Auto);
        }
        s.parse::<i64>()
            .map_err(|_| BrightnessError::new(format!("{s:?}")))
            .and_then(Self::try_from)
    }
}

impl TryFrom<&str> for Brightness {
    type Error = BrightnessError;

    fn try_from(value: &str) -> Result<Self, Self::Error> {
        value.parse()
    }
}

impl TryFrom<&serde_json::Value> for Brightness {
    type Error = BrightnessError;

    fn try_from(value: &serde_json::Value) -> Result<Self, Self::Error> {
        match value {
            serde_json::Value::String(s) if s == "auto" => Ok(Self::Auto),
            serde_json::Value::Number(n) => whole_number(n)
                .ok_or_else(|| BrightnessError::new(n))
                .and_then(Self::try_from),
            other => Err(BrightnessError::new(other)),
        }
    }
}

/// Integers, and floats without a fractional part such as `50.0`.
fn whole_number(n: &serde_json::Number) -> Option<i64> {
    if let Some(int) = n.as_i64() {
        return Some(int);
    }
    let float = n.as_f64()?;
    // Anything beyond i64 is out of range either way.
    (float.fract() == 0.0 && float.abs() < 1e18).then_some(float as i64)
}

// ── Serde ───────────────────────────────────────────────────────────
// On the wire brightness is either the string "auto" or a bare integer.

impl Serialize for Brightness {
    fn serialize<S: Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        match self {
            Self::Auto => serializer.serialize_str("auto"),
            Self::Level(level) => serializer.serialize_u8(*level),
        }
    }
}

impl<'de> Deserialize<'de> for Brightness {
    fn deserialize<D: Deserializer<'de>>(deserializer: D) -> Result<Self, D::Error> {
        let raw = serde_json::Value::deserialize(deserializer)?;
        Self::try_from(&raw).map_err(serde::de::Error::custom)
    }
}

// ── Transform ───────────────────────────────────────────────────────

/// Map a logical color to the color actually sent to the strip.
///
/// With a level set, the pixel's peak channel is normalized to
/// `level / 100 * 255` and the other channels keep their ratio to it.
/// Black stays black at every level.
pub fn adjust(color: Color, brightness: Brightness) -> Color {
    let Some(ceiling) = brightness.ceiling() else {
        return color;
    };
    if color.is_black() {
        return Color::BLACK;
    }

    let peak = f32::from(color.peak());
    // Every intermediate stays within 0.0..=255.0, so the cast cannot wrap.
    let scale = |channel: u8| (f32::from(channel) * ceiling / peak).round() as u8;
    Color::new(scale(color.red), scale(color.green), scale(color.blue))
}

/// Serialize a strip into the bytes written to the bus: three bytes per
/// pixel in red, green, blue order, brightness applied.
pub fn build_wire_buffer(strip: &[Color], brightness: Brightness) -> Vec<u8> {
    strip
        .iter()
        .flat_map(|&color| adjust(color, brightness).to_bytes())
        .collect()
}
