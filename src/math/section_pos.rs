//! Hierarchical quad-tree section addressing.
//!
//! A [`SectionPos`] names a square region of the world whose side is `2^detail` base units (blocks).
//! Coordinates are expressed in units of that side, so detail 0 addresses single blocks and each
//! increment of detail halves the coordinates. Every section has exactly one parent and four children,
//! computed purely from arithmetic.

use std::fmt;
use std::str::FromStr;

use crate::core::error::Error;
use crate::core::types::Result;

/// Largest detail level a position may take; keeps widths inside `i64` with room to spare.
pub const MAX_DETAIL: u8 = 32;

/// Quad-tree address: detail level plus x/z in units of `2^detail` blocks.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct SectionPos {
    pub detail: u8,
    pub x: i32,
    pub z: i32,
}

impl SectionPos {
    pub fn new(detail: u8, x: i32, z: i32) -> Self {
        debug_assert!(detail <= MAX_DETAIL);
        Self { detail, x, z }
    }

    /// The section at `detail` that contains the given block.
    pub fn from_block_pos(detail: u8, block_x: i32, block_z: i32) -> Self {
        Self::new(0, block_x, block_z).convert_to_detail(detail)
    }

    /// Re-express this position at another detail level.
    ///
    /// Coarsening floor-divides (so negative coordinates round toward negative infinity); refining
    /// multiplies and yields the minimum-corner descendant.
    pub fn convert_to_detail(self, target: u8) -> Self {
        if target >= self.detail {
            let shift = (target - self.detail) as u32;
            Self::new(target, shr_floor(self.x, shift), shr_floor(self.z, shift))
        } else {
            let shift = (self.detail - target) as u32;
            Self::new(target, self.x << shift, self.z << shift)
        }
    }

    pub fn parent(self) -> Self {
        self.convert_to_detail(self.detail + 1)
    }

    /// Child `index` in `0..4`: bit 0 selects the x offset, bit 1 the z offset.
    ///
    /// # Panics
    /// At detail 0 (there is nothing finer) or for an index outside `0..4`.
    pub fn child(self, index: u8) -> Self {
        assert!(self.detail > 0, "section {} has no children", self);
        assert!(index < 4, "child index {} out of range", index);
        Self::new(
            self.detail - 1,
            self.x * 2 + (index & 1) as i32,
            self.z * 2 + ((index >> 1) & 1) as i32,
        )
    }

    pub fn children(self) -> [Self; 4] {
        [self.child(0), self.child(1), self.child(2), self.child(3)]
    }

    /// Which child of [`parent`](Self::parent) this position is.
    pub fn child_index_of_parent(self) -> u8 {
        ((self.x & 1) | ((self.z & 1) << 1)) as u8
    }

    /// Side length in blocks.
    pub fn width(self) -> i64 {
        1i64 << self.detail
    }

    /// Minimum corner in blocks.
    pub fn min_corner(self) -> (i64, i64) {
        (self.x as i64 * self.width(), self.z as i64 * self.width())
    }

    /// Center in blocks, rounded down.
    pub fn center(self) -> (i64, i64) {
        let (x, z) = self.min_corner();
        let half = self.width() / 2;
        (x + half, z + half)
    }

    /// Whether `other` lies entirely inside this section.
    pub fn contains(self, other: SectionPos) -> bool {
        let (ax, az) = self.min_corner();
        let (bx, bz) = other.min_corner();
        let (aw, bw) = (self.width(), other.width());
        bx >= ax && bz >= az && bx + bw <= ax + aw && bz + bw <= az + aw
    }

    /// Whether the two squares share any area.
    pub fn overlaps(self, other: SectionPos) -> bool {
        let (ax, az) = self.min_corner();
        let (bx, bz) = other.min_corner();
        let (aw, bw) = (self.width(), other.width());
        ax < bx + bw && bx < ax + aw && az < bz + bw && bz < az + aw
    }

    /// Squared distance in blocks from this section's center to a block position.
    pub fn squared_distance_to(self, block_x: i64, block_z: i64) -> i64 {
        let (cx, cz) = self.center();
        let (dx, dz) = (cx - block_x, cz - block_z);
        dx * dx + dz * dz
    }

    /// Compact tagged form `[detail,x,z]`.
    pub fn serialize(self) -> String {
        format!("[{},{},{}]", self.detail, self.x, self.z)
    }

    /// Parse the form produced by [`serialize`](Self::serialize).
    pub fn deserialize(text: &str) -> Result<Self> {
        let inner = text
            .trim()
            .strip_prefix('[')
            .and_then(|s| s.strip_suffix(']'))
            .ok_or_else(|| Error::Format(format!("section position not bracketed: {:?}", text)))?;

        let mut parts = inner.split(',').map(str::trim);
        let bad = || Error::Format(format!("malformed section position: {:?}", text));
        let detail: u8 = parts.next().and_then(|s| s.parse().ok()).ok_or_else(bad)?;
        let x: i32 = parts.next().and_then(|s| s.parse().ok()).ok_or_else(bad)?;
        let z: i32 = parts.next().and_then(|s| s.parse().ok()).ok_or_else(bad)?;
        if parts.next().is_some() || detail > MAX_DETAIL {
            return Err(bad());
        }
        Ok(Self::new(detail, x, z))
    }
}

impl fmt::Display for SectionPos {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "[{},{},{}]", self.detail, self.x, self.z)
    }
}

impl FromStr for SectionPos {
    type Err = Error;

    fn from_str(s: &str) -> Result<Self> {
        Self::deserialize(s)
    }
}

/// Floor division by `2^shift`.
fn shr_floor(value: i32, shift: u32) -> i32 {
    if shift >= 32 {
        if value < 0 { -1 } else { 0 }
    } else {
        value >> shift
    }
}
