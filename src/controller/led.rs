//! Sphere LED colours.

use serde::{Deserialize, Serialize};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Hash, Serialize, Deserialize)]
pub struct RgbColor {
    pub r: u8,
    pub g: u8,
    pub b: u8,
}

impl RgbColor {
    pub const OFF: Self = Self::new(0, 0, 0);

    pub const fn new(r: u8, g: u8, b: u8) -> Self {
        Self { r, g, b }
    }

    /// Unknown names map to [`RgbColor::OFF`].
    pub fn from_name(name: &str) -> Self {
        COLOR_TABLE
            .iter()
            .find(|(n, _)| *n == name)
            .map(|(_, rgb)| *rgb)
            .unwrap_or(Self::OFF)
    }

    pub fn names() -> impl Iterator<Item = &'static str> {
        COLOR_TABLE.iter().map(|(n, _)| *n)
    }

    pub fn to_array(self) -> [u8; 3] {
        [self.r, self.g, self.b]
    }
}

pub const COLOR_TABLE: [(&str, RgbColor); 8] = [
    ("cyan", RgbColor::new(0, 255, 255)),
    ("purple", RgbColor::new(255, 0, 255)),
    ("red", RgbColor::new(255, 0, 0)),
    ("blue", RgbColor::new(25, 25, 255)),
    ("green", RgbColor::new(10, 255, 10)),
    ("yellow", RgbColor::new(255, 255, 0)),
    ("white", RgbColor::new(255, 255, 255)),
    ("off", RgbColor::OFF),
];

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_lookup_by_name() {
        assert_eq!(RgbColor::from_name("blue"), RgbColor::new(25, 25, 255));
        assert_eq!(RgbColor::from_name("magenta"), RgbColor::OFF);
        assert_eq!(RgbColor::names().count(), 8);
    }
}
