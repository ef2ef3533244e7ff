//! Fully addressable storage: one column for every (x, z).

use crate::core::types::Result;
use crate::data::column::Column;
use crate::data::downsample::sample_from;
use crate::data::grid::{ColumnGrid, GridView};
use crate::data::id_map::IdMap;
use crate::data::source::{FullDataSource, SourceMeta};
use crate::math::SectionPos;

#[derive(Clone, Debug, PartialEq)]
pub struct CompleteSource {
    meta: SourceMeta,
    grid: ColumnGrid,
    id_map: IdMap,
}

impl CompleteSource {
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

    /// Replace the columns a finer (or equal-detail) patch covers, downsampling as needed.
    /// Returns how many columns changed.
    pub fn update(&mut self, patch: &dyn FullDataSource) -> Result<usize> {
        sample_from(self, patch)
    }

    /// The minimal set of sections a generator must fill to complete this source.
    ///
    /// Granularities are section detail levels. Each quadrant of the footprint is skipped if fully
    /// populated, reported whole if empty (split down to `max_gen` when coarser than that), and
    /// otherwise quartered again. A mixed quadrant that reaches `min_gen` is reported whole.
    pub fn ungenerated_positions(&self, min_gen: u8, max_gen: u8) -> Vec<SectionPos> {
        let min_gen = min_gen.max(self.meta.data_detail);
        let max_gen = max_gen.max(min_gen);
        let mut out = Vec::new();
        self.scan(self.meta.pos, self.grid.full_view(), min_gen, max_gen, &mut out);
        out
    }

    fn scan(&self, pos: SectionPos, view: GridView, min_gen: u8, max_gen: u8, out: &mut Vec<SectionPos>) {
        let total = (view.width * view.width) as usize;
        let present = self.grid.count_present(&view);
        if present == total {
            return;
        }
        if present == 0 {
            split_down(pos, max_gen, out);
            return;
        }
        if pos.detail <= min_gen {
            out.push(pos);
            return;
        }
        for (child, quadrant) in pos.children().into_iter().zip(view.quadrants()) {
            self.scan(child, quadrant, min_gen, max_gen, out);
        }
    }
}

/// Push `pos`, or all its descendants at `max_detail` if it is coarser.
fn split_down(pos: SectionPos, max_detail: u8, out: &mut Vec<SectionPos>) {
    if pos.detail <= max_detail {
        out.push(pos);
        return;
    }
    for child in pos.children() {
        split_down(child, max_detail, out);
    }
}

impl FullDataSource for CompleteSource {
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
    use crate::data::patch::ChunkPatch;

    fn filled_patch(chunk_x: i32, chunk_z: i32) -> ChunkPatch {
        let mut patch = ChunkPatch::empty(chunk_x, chunk_z, 0);
        let stone = patch.id_map_mut().add_if_not_present_and_get_id(IdEntry::new("plains", "stone"));
        for z in 0..16 {
            for x in 0..16 {
                patch.write_column(
                    x,
                    z,
                    Column::new(GenerationStep::Light, vec![DataPoint::new(stone, 64, 0, 15, 0)]),
                );
            }
        }
        patch
    }

    fn area(positions: &[SectionPos]) -> i64 {
        positions.iter().map(|p| p.width() * p.width()).sum()
    }

    #[test]
    fn test_empty_source_reports_itself() {
        let source = CompleteSource::new(SectionPos::new(6, 2, -3), 0, 6, 0).unwrap();
        assert_eq!(source.ungenerated_positions(0, 6), vec![SectionPos::new(6, 2, -3)]);

        let split = source.ungenerated_positions(0, 5);
        assert_eq!(split, SectionPos::new(6, 2, -3).children().to_vec());
    }

    #[test]
    fn test_scan_after_one_corner_patch() {
        let mut source = CompleteSource::new(SectionPos::new(6, 0, 0), 0, 6, 0).unwrap();
        let changed = source.update(&filled_patch(0, 0)).unwrap();
        assert_eq!(changed, 256);

        let coarse = source.ungenerated_positions(0, 6);
        assert_eq!(
            coarse,
            vec![
                SectionPos::new(4, 1, 0),
                SectionPos::new(4, 0, 1),
                SectionPos::new(4, 1, 1),
                SectionPos::new(5, 1, 0),
                SectionPos::new(5, 0, 1),
                SectionPos::new(5, 1, 1),
            ]
        );
        assert_eq!(area(&coarse), 64 * 64 - 16 * 16);

        let fine = source.ungenerated_positions(0, 0);
        assert_eq!(fine.len(), 64 * 64 - 16 * 16);
        assert!(fine.iter().all(|p| p.detail == 0 && !SectionPos::new(4, 0, 0).contains(*p)));

        let chunks = source.ungenerated_positions(4, 4);
        assert_eq!(chunks.len(), 15);
    }

    #[test]
    fn test_scan_is_empty_iff_complete() {
        let mut source = CompleteSource::new(SectionPos::new(6, 0, 0), 0, 6, 0).unwrap();
        for cz in 0..4 {
            for cx in 0..4 {
                assert!(!source.ungenerated_positions(0, 6).is_empty());
                source.update(&filled_patch(cx, cz)).unwrap();
            }
        }
        assert!(source.ungenerated_positions(0, 6).is_empty());
        assert_eq!(source.generation_step(), GenerationStep::Light);
    }

    #[test]
    fn test_mixed_quadrant_at_min_granularity_is_reported_whole() {
        let mut source = CompleteSource::new(SectionPos::new(6, 0, 0), 0, 6, 0).unwrap();
        source.write_column(
            0,
            0,
            Column::new(GenerationStep::Surface, vec![DataPoint::new(0, 1, 0, 0, 0)]),
        );
        let out = source.ungenerated_positions(4, 6);
        assert!(out.contains(&SectionPos::new(4, 0, 0)));
        assert_eq!(area(&out), 64 * 64);
    }
}
