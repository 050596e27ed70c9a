//! color.rs
//! Color descriptors carried by signal events and the similarity test used to pair them.
//!
//! Colors arrive from the page probe as `"r,g,b,a"` strings; only the first three
//! channels take part in comparisons.

use std::{fmt, str::FromStr};

use crate::error::ParseColorError;

/// Maximum Euclidean distance (RGB space) for two colors to count as the same.
/// Absorbs encoder noise while keeping the marker colors apart.
pub const MAX_DISTANCE: f64 = 60.0;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct Color {
    pub r: u8,
    pub g: u8,
    pub b: u8,
}

impl Color {
    /// Synchronization marker both streams must show before measuring.
    pub const SYNC_MARKER: Color = Color::new(0, 255, 0);
    pub const RED: Color = Color::new(255, 0, 0);
    pub const BLUE: Color = Color::new(0, 0, 255);
    pub const WHITE: Color = Color::new(255, 255, 255);

    pub const fn new(r: u8, g: u8, b: u8) -> Self {
        Self { r, g, b }
    }

    pub fn distance(&self, other: &Color) -> f64 {
        let dr = i32::from(self.r) - i32::from(other.r);
        let dg = i32::from(self.g) - i32::from(other.g);
        let db = i32::from(self.b) - i32::from(other.b);
        f64::from(dr * dr + dg * dg + db * db).sqrt()
    }

    #[inline]
    pub fn is_similar(&self, other: &Color) -> bool {
        similar(self, other)
    }
}

/// True iff the two colors are within `MAX_DISTANCE` of each other.
#[inline]
pub fn similar(a: &Color, b: &Color) -> bool {
    a.distance(b) <= MAX_DISTANCE
}

impl fmt::Display for Color {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{},{},{}", self.r, self.g, self.b)
    }
}

impl FromStr for Color {
    type Err = ParseColorError;

    /// Parses `"r,g,b"` or `"r,g,b,a"`; the alpha channel is ignored.
    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let parts: Vec<&str> = s.split(',').map(str::trim).collect();
        if parts.len() < 3 {
            return Err(ParseColorError::MissingChannels(parts.len()));
        }
        let channel = |raw: &str| {
            raw.parse::<u8>()
                .map_err(|_| ParseColorError::InvalidChannel(raw.to_string()))
        };
        Ok(Color::new(channel(parts[0])?, channel(parts[1])?, channel(parts[2])?))
    }
}
