//! Columns of packed vertical data points.

use bytemuck::{Pod, Zeroable};

use crate::core::error::Error;
use crate::core::types::Result;

/// Vertical span heights and bottoms are 12-bit values relative to the source's minimum Y.
pub const MAX_SPAN: u32 = (1 << 12) - 1;

/// How far world generation got for a column. Ordered by priority: a later step wins.
#[repr(u8)]
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub enum GenerationStep {
    #[default]
    Empty = 0,
    Biomes = 1,
    Noise = 2,
    Surface = 3,
    Features = 4,
    Light = 5,
}

impl GenerationStep {
    pub fn from_u8(value: u8) -> Option<Self> {
        Some(match value {
            0 => Self::Empty,
            1 => Self::Biomes,
            2 => Self::Noise,
            3 => Self::Surface,
            4 => Self::Features,
            5 => Self::Light,
            _ => return None,
        })
    }
}

/// One vertical span of a single material - exactly 8 bytes.
///
/// Layout (low to high): id (32 bits), height (12), bottom (12), sky light (4), block light (4).
#[repr(transparent)]
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Hash, Pod, Zeroable)]
pub struct DataPoint(pub u64);

impl DataPoint {
    /// Pack a span. `bottom` is relative to the owning source's minimum Y.
    pub fn new(id: u32, height: u32, bottom: u32, sky_light: u8, block_light: u8) -> Self {
        debug_assert!(height <= MAX_SPAN && bottom <= MAX_SPAN);
        debug_assert!(sky_light < 16 && block_light < 16);
        Self(
            id as u64
                | ((height as u64 & 0xFFF) << 32)
                | ((bottom as u64 & 0xFFF) << 44)
                | ((sky_light as u64 & 0xF) << 56)
                | ((block_light as u64 & 0xF) << 60),
        )
    }

    /// Index into the owning source's [`IdMap`](crate::data::IdMap).
    pub fn id(self) -> u32 {
        self.0 as u32
    }

    pub fn height(self) -> u32 {
        ((self.0 >> 32) & 0xFFF) as u32
    }

    pub fn bottom(self) -> u32 {
        ((self.0 >> 44) & 0xFFF) as u32
    }

    /// One past the highest covered Y, relative to the minimum Y.
    pub fn top(self) -> u32 {
        self.bottom() + self.height()
    }

    pub fn sky_light(self) -> u8 {
        ((self.0 >> 56) & 0xF) as u8
    }

    pub fn block_light(self) -> u8 {
        ((self.0 >> 60) & 0xF) as u8
    }

    pub fn with_id(self, id: u32) -> Self {
        Self((self.0 & !0xFFFF_FFFF) | id as u64)
    }
}

/// The vertical stack of spans at one (x, z), ordered top-down.
#[derive(Clone, Debug, Default, PartialEq, Eq, Hash)]
pub struct Column {
    pub step: GenerationStep,
    pub points: Vec<DataPoint>,
}

impl Column {
    pub fn new(step: GenerationStep, points: Vec<DataPoint>) -> Self {
        Self { step, points }
    }

    /// A column nothing has been generated for yet.
    pub fn empty() -> Self {
        Self::default()
    }

    /// Whether nothing has been generated here. A generated column of pure air has no points but
    /// is not empty.
    pub fn is_empty(&self) -> bool {
        self.step == GenerationStep::Empty
    }

    /// Top of the highest span, if any.
    pub fn top(&self) -> Option<u32> {
        self.points.iter().map(|p| p.top()).max()
    }

    /// Whether `incoming` should replace `self`. Equal steps overwrite, so the newest data wins.
    pub fn is_overwritten_by(&self, incoming: &Column) -> bool {
        !incoming.is_empty() && incoming.step >= self.step
    }

    /// Copy with every id passed through `remap` (indexed by the old id). An id outside `remap`
    /// means the column does not belong to the map the table was built from.
    pub fn remapped(&self, remap: &[u32]) -> Result<Column> {
        let points = self
            .points
            .iter()
            .map(|p| match remap.get(p.id() as usize) {
                Some(&id) => Ok(p.with_id(id)),
                None => Err(Error::Format(format!(
                    "data point id {} outside id map of {}",
                    p.id(),
                    remap.len()
                ))),
            })
            .collect::<Result<Vec<_>>>()?;
        Ok(Column {
            step: self.step,
            points,
        })
    }

    /// Re-express span bottoms against a minimum Y lower by `delta` blocks (negative moves it up).
    /// Spans pushed below the new floor are cut; spans pushed past the top are dropped.
    pub fn rebased(&self, delta: i32) -> Column {
        if delta == 0 {
            return self.clone();
        }
        let points = self
            .points
            .iter()
            .filter_map(|p| {
                let bottom = p.bottom() as i32 + delta;
                let top = p.top() as i32 + delta;
                if top <= 0 || bottom > MAX_SPAN as i32 {
                    return None;
                }
                let bottom = bottom.max(0);
                let height = (top - bottom).min(MAX_SPAN as i32 - bottom);
                Some(DataPoint::new(
                    p.id(),
                    height as u32,
                    bottom as u32,
                    p.sky_light(),
                    p.block_light(),
                ))
            })
            .collect();
        Column::new(self.step, points)
    }

    /// Reduce a block of finer columns to one coarse column.
    ///
    /// The result copies the column with the highest top (first in `children` order on ties) and
    /// takes the lowest generation step among non-empty children. Depends only on `children`, so
    /// repeating a downsample gives identical output.
    pub fn downsample_from<'a>(children: impl IntoIterator<Item = &'a Column>) -> Column {
        let mut step: Option<GenerationStep> = None;
        let mut best: Option<&Column> = None;
        for child in children {
            if child.is_empty() {
                continue;
            }
            step = Some(step.map_or(child.step, |s| s.min(child.step)));
            let better = match best {
                None => true,
                Some(current) => child.top() > current.top(),
            };
            if better {
                best = Some(child);
            }
        }
        match (step, best) {
            (Some(step), Some(best)) => Column::new(step, best.points.clone()),
            _ => Column::empty(),
        }
    }
}
