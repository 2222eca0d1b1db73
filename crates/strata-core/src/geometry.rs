// MapGeometry — side length and channel count of a flattened feature map
//
// A flattened tensor carries no shape of its own. The layer that owns it knows
// the square side length `s` and the channel count `c`; MapGeometry bundles the
// two so they can be passed around and checked together:
//
//   index(ch, row, col) = ch * s * s + row * s + col
//   len                 = c * s * s
//
// Channels are outermost, then rows, then columns.

use std::fmt;

/// Geometry of a square, multi-channel feature map stored channel-major.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct MapGeometry {
    pub side: usize,
    pub channels: usize,
}

impl MapGeometry {
    pub fn new(side: usize, channels: usize) -> Self {
        MapGeometry { side, channels }
    }

    /// Number of elements in one channel (`side²`).
    pub fn plane(&self) -> usize {
        self.side * self.side
    }

    /// Total number of elements (`channels * side²`).
    pub fn len(&self) -> usize {
        self.channels * self.plane()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Flat index of `[channel][row][col]`.
    pub fn index(&self, channel: usize, row: usize, col: usize) -> usize {
        channel * self.plane() + row * self.side + col
    }

    /// Check that a flattened tensor matches this geometry.
    pub fn check(&self, context: &'static str, data: &[f64]) -> crate::Result<()> {
        crate::error::ensure_len(context, self.len(), data.len())
    }
}

impl fmt::Display for MapGeometry {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "[{}x{}x{}]", self.channels, self.side, self.side)
    }
}

impl From<(usize, usize)> for MapGeometry {
    /// `(side, channels)`
    fn from((side, channels): (usize, usize)) -> Self {
        MapGeometry::new(side, channels)
    }
}
