//! Explicitly partial storage for coarse levels, promoted once every column is known.

use crate::core::types::Result;
use crate::data::column::Column;
use crate::data::complete::CompleteSource;
use crate::data::downsample::sample_from;
use crate::data::grid::ColumnGrid;
use crate::data::id_map::IdMap;
use crate::data::source::{DataSource, FullDataSource, SourceMeta};
use crate::math::SectionPos;

#[derive(Clone, Debug, PartialEq)]
pub struct IncompleteSource {
    meta: SourceMeta,
    grid: ColumnGrid,
    id_map: IdMap,
}

impl IncompleteSource {
    pub fn new(pos: SectionPos, data_detail: u8, width_log2: u8, min_y: i32) -> Result<Self> {
        let meta = SourceMeta::new(pos, data_detail, width_log2, min_y)?;
        Ok(Self::from_parts(meta, ColumnGrid::new(meta.width()), IdMap::new()))
    }

    pub(crate) fn from_parts(meta: SourceMeta, grid: ColumnGrid, id_map: IdMap) -> Self {
        debug_assert_eq!(grid.width(), meta.width());
        Self { meta, grid, id_map }
    }

    pub fn grid(&self) -> &ColumnGrid {
        &self.grid
    }

    /// Overlay the non-empty columns of an equal-or-finer source. Returns how many columns changed.
    pub fn sample_from(&mut self, other: &dyn FullDataSource) -> Result<usize> {
        sample_from(self, other)
    }

    /// Number of populated columns.
    pub fn populated(&self) -> usize {
        self.grid.count_present(&self.grid.full_view())
    }

    /// A complete source with the same contents if no column is missing, otherwise `self`.
    pub fn try_promoting_to_complete(self) -> DataSource {
        if self.grid.is_all_present() {
            log::debug!("promoting {} to complete", self.meta.pos);
            DataSource::Complete(CompleteSource::from_parts(self.meta, self.grid, self.id_map))
        } else {
            DataSource::Incomplete(self)
        }
    }
}

impl FullDataSource for IncompleteSource {
    fn meta(&self) -> &SourceMeta {
        &self.meta
    }

    fn meta_mut(&mut self) -> &mut SourceMeta {
        &mut self.meta
    }

    fn id_map(&self) -> &IdMap {
        &self.id_map
    }

    fn id_map_mut(&mut self) -> &mut IdMap {
        &mut self.id_map
    }

    fn column(&self, x: u32, z: u32) -> Option<&Column> {
        Some(self.grid.get(x, z))
    }

    fn column_slot(&mut self, x: u32, z: u32) -> &mut Column {
        self.grid.get_mut(x, z)
    }

    fn is_empty(&self) -> bool {
        self.grid.is_all_empty()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::data::column::{DataPoint, GenerationStep};
    use crate::data::id_map::IdEntry;
    use crate::data::source::SourceKind;

    fn finer_with(pos: SectionPos, step: GenerationStep) -> CompleteSource {
        let mut source = CompleteSource::new(pos, pos.detail - 2, 2, 0).unwrap();
        let id = source.id_map_mut().add_if_not_present_and_get_id(IdEntry::new("hills", "stone"));
        for z in 0..4 {
            for x in 0..4 {
                source.write_column(x, z, Column::new(step, vec![DataPoint::new(id, 8 + x, 0, 15, 0)]));
            }
        }
        source
    }

    #[test]
    fn test_promotion_only_when_full() {
        // 4x4 columns at data detail 5, covering four 4x4 sources at data detail 4
        let mut coarse = IncompleteSource::new(SectionPos::new(7, 0, 0), 5, 2, 0).unwrap();
        coarse.sample_from(&finer_with(SectionPos::new(6, 0, 0), GenerationStep::Light)).unwrap();
        assert_eq!(coarse.populated(), 4);

        let coarse = match coarse.try_promoting_to_complete() {
            DataSource::Incomplete(s) => s,
            other => panic!("promoted too early: {:?}", other.kind()),
        };

        let mut coarse = coarse;
        for (x, z) in [(1, 0), (0, 1), (1, 1)] {
            coarse
                .sample_from(&finer_with(SectionPos::new(6, x, z), GenerationStep::Surface))
                .unwrap();
        }
        assert_eq!(coarse.populated(), 16);
        let promoted = coarse.try_promoting_to_complete();
        assert_eq!(promoted.kind(), SourceKind::Complete);
        assert_eq!(promoted.generation_step(), GenerationStep::Surface);
        assert_eq!(promoted.id_map().len(), 1);
    }

    #[test]
    fn test_sample_from_equal_detail_copies() {
        let pos = SectionPos::new(6, 1, 1);
        let source = finer_with(pos, GenerationStep::Features);
        let mut target = IncompleteSource::new(pos, 4, 2, 0).unwrap();
        assert_eq!(target.sample_from(&source).unwrap(), 16);
        assert_eq!(target.column(3, 2), source.column(3, 2));
        assert_eq!(target.sample_from(&source).unwrap(), 0);
    }
}
