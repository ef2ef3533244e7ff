//! The data source abstraction shared by every storage variant.

use crate::core::config::LodConfig;
use crate::core::error::Error;
use crate::core::types::Result;
use crate::data::column::{Column, GenerationStep};
use crate::data::complete::CompleteSource;
use crate::data::id_map::IdMap;
use crate::data::incomplete::IncompleteSource;
use crate::data::sparse::SparseSource;
use crate::math::SectionPos;

/// Geometry and bookkeeping common to every data source.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct SourceMeta {
    pub pos: SectionPos,
    /// Each column covers `2^data_detail` blocks per side.
    pub data_detail: u8,
    /// Columns per side, as a power of two.
    pub width_log2: u8,
    pub min_y: i32,
    /// Bumped on every change that alters a column.
    pub data_version: u64,
}

impl SourceMeta {
    pub fn new(pos: SectionPos, data_detail: u8, width_log2: u8, min_y: i32) -> Result<Self> {
        if data_detail.checked_add(width_log2) != Some(pos.detail) {
            return Err(Error::Format(format!(
                "section {} cannot hold {} columns at data detail {}",
                pos,
                1u32 << width_log2,
                data_detail
            )));
        }
        Ok(Self {
            pos,
            data_detail,
            width_log2,
            min_y,
            data_version: 0,
        })
    }

    pub fn width(&self) -> u32 {
        1 << self.width_log2
    }

    /// The column of this source covering a block position, if inside.
    pub fn column_of_block(&self, block_x: i64, block_z: i64) -> Option<(u32, u32)> {
        let (min_x, min_z) = self.pos.min_corner();
        let (dx, dz) = (block_x - min_x, block_z - min_z);
        let side = self.pos.width();
        if dx < 0 || dz < 0 || dx >= side || dz >= side {
            return None;
        }
        Some(((dx >> self.data_detail) as u32, (dz >> self.data_detail) as u32))
    }
}

/// Read/write access to the columns of one section at one data detail.
///
/// Column ids always refer to the source's own [`IdMap`].
pub trait FullDataSource: Send + Sync {
    fn meta(&self) -> &SourceMeta;
    fn meta_mut(&mut self) -> &mut SourceMeta;
    fn id_map(&self) -> &IdMap;
    fn id_map_mut(&mut self) -> &mut IdMap;

    /// The stored column, or `None` where storage is absent (an unallocated sparse block).
    fn column(&self, x: u32, z: u32) -> Option<&Column>;

    /// Storage for a column, allocating it if needed.
    fn column_slot(&mut self, x: u32, z: u32) -> &mut Column;

    fn pos(&self) -> SectionPos {
        self.meta().pos
    }

    fn data_detail(&self) -> u8 {
        self.meta().data_detail
    }

    fn width(&self) -> u32 {
        self.meta().width()
    }

    fn min_y(&self) -> i32 {
        self.meta().min_y
    }

    fn data_version(&self) -> u64 {
        self.meta().data_version
    }

    /// Apply `incoming` under the generation priority rule. Returns whether the column changed.
    fn write_column(&mut self, x: u32, z: u32, incoming: Column) -> bool {
        if incoming.is_empty() {
            return false;
        }
        let slot = self.column_slot(x, z);
        if !slot.is_overwritten_by(&incoming) || *slot == incoming {
            return false;
        }
        *slot = incoming;
        self.meta_mut().data_version += 1;
        true
    }

    /// Store `column` regardless of generation priority. Returns whether the column changed.
    fn replace_column(&mut self, x: u32, z: u32, column: Column) -> bool {
        let slot = self.column_slot(x, z);
        if *slot == column {
            return false;
        }
        *slot = column;
        self.meta_mut().data_version += 1;
        true
    }

    /// Lowest step across all columns; [`GenerationStep::Empty`] if any column is missing.
    fn generation_step(&self) -> GenerationStep {
        let width = self.width();
        let mut lowest = GenerationStep::Light;
        for z in 0..width {
            for x in 0..width {
                match self.column(x, z) {
                    Some(c) if !c.is_empty() => lowest = lowest.min(c.step),
                    _ => return GenerationStep::Empty,
                }
            }
        }
        lowest
    }

    fn is_empty(&self) -> bool {
        let width = self.width();
        (0..width).all(|z| (0..width).all(|x| self.column(x, z).is_none_or(Column::is_empty)))
    }
}

/// Which storage variant a source uses.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub enum SourceKind {
    Complete,
    Sparse,
    Incomplete,
}

/// A data source of any variant.
#[derive(Clone, Debug, PartialEq)]
pub enum DataSource {
    Complete(CompleteSource),
    Sparse(SparseSource),
    Incomplete(IncompleteSource),
}

impl DataSource {
    /// An empty source for `pos`, with the variant its data detail calls for.
    pub fn new_for(pos: SectionPos, config: &LodConfig) -> Result<Self> {
        let width_log2 = config.section_width_log2;
        if pos.detail < config.min_section_detail() || pos.detail > config.max_section_detail() {
            return Err(Error::OutOfBounds(format!(
                "section {} outside detail range {}..={}",
                pos,
                config.min_section_detail(),
                config.max_section_detail()
            )));
        }
        let data_detail = pos.detail - width_log2;
        Ok(if data_detail == 0 {
            DataSource::Complete(CompleteSource::new(pos, data_detail, width_log2, config.min_y)?)
        } else if data_detail <= config.sparse_max_data_detail {
            DataSource::Sparse(SparseSource::new(
                pos,
                data_detail,
                width_log2,
                config.sparse_unit_detail,
                config.min_y,
            )?)
        } else {
            DataSource::Incomplete(IncompleteSource::new(pos, data_detail, width_log2, config.min_y)?)
        })
    }

    pub fn kind(&self) -> SourceKind {
        match self {
            DataSource::Complete(_) => SourceKind::Complete,
            DataSource::Sparse(_) => SourceKind::Sparse,
            DataSource::Incomplete(_) => SourceKind::Incomplete,
        }
    }

    fn inner(&self) -> &dyn FullDataSource {
        match self {
            DataSource::Complete(s) => s,
            DataSource::Sparse(s) => s,
            DataSource::Incomplete(s) => s,
        }
    }

    fn inner_mut(&mut self) -> &mut dyn FullDataSource {
        match self {
            DataSource::Complete(s) => s,
            DataSource::Sparse(s) => s,
            DataSource::Incomplete(s) => s,
        }
    }

    /// Promote an incomplete source whose columns are all populated. Other variants, and incomplete
    /// sources with gaps, come back unchanged.
    pub fn try_promoting_to_complete(self) -> DataSource {
        match self {
            DataSource::Incomplete(s) => s.try_promoting_to_complete(),
            other => other,
        }
    }
}

impl FullDataSource for DataSource {
    fn meta(&self) -> &SourceMeta {
        self.inner().meta()
    }

    fn meta_mut(&mut self) -> &mut SourceMeta {
        self.inner_mut().meta_mut()
    }

    fn id_map(&self) -> &IdMap {
        self.inner().id_map()
    }

    fn id_map_mut(&mut self) -> &mut IdMap {
        self.inner_mut().id_map_mut()
    }

    fn column(&self, x: u32, z: u32) -> Option<&Column> {
        self.inner().column(x, z)
    }

    fn column_slot(&mut self, x: u32, z: u32) -> &mut Column {
        self.inner_mut().column_slot(x, z)
    }

    fn generation_step(&self) -> GenerationStep {
        self.inner().generation_step()
    }

    fn is_empty(&self) -> bool {
        self.inner().is_empty()
    }
}
