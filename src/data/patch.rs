//! Full-resolution columns built from one host chunk.

use crate::data::column::{Column, DataPoint, GenerationStep, MAX_SPAN};
use crate::data::grid::ColumnGrid;
use crate::data::id_map::{IdEntry, IdMap};
use crate::data::source::{FullDataSource, SourceMeta};
use crate::math::SectionPos;

/// Blocks per chunk side.
pub const CHUNK_WIDTH: u32 = 16;
pub const CHUNK_WIDTH_LOG2: u8 = 4;

/// Read-only view of a host world chunk. Local coordinates are in `0..16`.
pub trait ChunkSource {
    fn chunk_x(&self) -> i32;
    fn chunk_z(&self) -> i32;
    /// Lowest block Y in the chunk.
    fn min_y(&self) -> i32;
    /// One above the highest non-air block in the column, or `min_y` if it is all air.
    fn height_at(&self, x: u32, z: u32) -> i32;
    /// Material name of a block, `None` for air.
    fn material_at(&self, x: u32, y: i32, z: u32) -> Option<&str>;
    fn biome_at(&self, x: u32, z: u32) -> &str;
    fn sky_light_at(&self, x: u32, y: i32, z: u32) -> u8;
    fn block_light_at(&self, x: u32, y: i32, z: u32) -> u8;

    fn generation_step(&self) -> GenerationStep {
        GenerationStep::Light
    }
}

/// A 16x16 data detail 0 source covering exactly one chunk.
#[derive(Clone, Debug, PartialEq)]
pub struct ChunkPatch {
    meta: SourceMeta,
    grid: ColumnGrid,
    id_map: IdMap,
}

impl ChunkPatch {
    /// An all-empty patch. Spans are stored relative to `min_y`.
    pub fn empty(chunk_x: i32, chunk_z: i32, min_y: i32) -> Self {
        let meta = SourceMeta {
            pos: SectionPos::new(CHUNK_WIDTH_LOG2, chunk_x, chunk_z),
            data_detail: 0,
            width_log2: CHUNK_WIDTH_LOG2,
            min_y,
            data_version: 0,
        };
        Self {
            meta,
            grid: ColumnGrid::new(CHUNK_WIDTH),
            id_map: IdMap::new(),
        }
    }

    /// Scan every column of `chunk` top-down into runs of equal material.
    ///
    /// Air is skipped; spans are split at the 12-bit height limit. Blocks below `min_y` are dropped.
    pub fn from_chunk(chunk: &impl ChunkSource, min_y: i32) -> Self {
        let mut patch = Self::empty(chunk.chunk_x(), chunk.chunk_z(), min_y);
        let step = chunk.generation_step();
        for z in 0..CHUNK_WIDTH {
            for x in 0..CHUNK_WIDTH {
                let points = patch.scan_column(chunk, x, z);
                *patch.grid.get_mut(x, z) = Column::new(step, points);
            }
        }
        patch
    }

    fn scan_column(&mut self, chunk: &impl ChunkSource, x: u32, z: u32) -> Vec<DataPoint> {
        let floor = chunk.min_y().max(self.meta.min_y);
        let biome = chunk.biome_at(x, z);
        let mut points = Vec::new();
        let mut y = chunk.height_at(x, z).min(self.meta.min_y + MAX_SPAN as i32) - 1;
        while y >= floor {
            let Some(material) = chunk.material_at(x, y, z) else {
                y -= 1;
                continue;
            };
            let top = y;
            let mut bottom = y;
            while bottom > floor
                && top - (bottom - 1) < MAX_SPAN as i32
                && chunk.material_at(x, bottom - 1, z) == Some(material)
            {
                bottom -= 1;
            }
            let id = self
                .id_map
                .add_if_not_present_and_get_id(IdEntry::new(biome, material));
            // light is taken from the block above the span, where it is exposed
            let sky = chunk.sky_light_at(x, top + 1, z).min(15);
            let block = chunk.block_light_at(x, top + 1, z).min(15);
            points.push(DataPoint::new(
                id,
                (top - bottom + 1) as u32,
                (bottom - self.meta.min_y) as u32,
                sky,
                block,
            ));
            y = bottom - 1;
        }
        points
    }
}

impl FullDataSource for ChunkPatch {
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
}

#[cfg(test)]
pub(crate) mod tests {
    use super::*;

    /// Layered test chunk: stone up to `stone_top`, dirt to `dirt_top`, then air, with a cave.
    pub(crate) struct LayeredChunk {
        pub chunk_x: i32,
        pub chunk_z: i32,
        pub stone_top: i32,
        pub dirt_top: i32,
        pub cave: Option<(i32, i32)>,
    }

    impl LayeredChunk {
        pub(crate) fn flat(chunk_x: i32, chunk_z: i32) -> Self {
            Self {
                chunk_x,
                chunk_z,
                stone_top: 60,
                dirt_top: 64,
                cave: None,
            }
        }
    }

    impl ChunkSource for LayeredChunk {
        fn chunk_x(&self) -> i32 {
            self.chunk_x
        }
        fn chunk_z(&self) -> i32 {
            self.chunk_z
        }
        fn min_y(&self) -> i32 {
            0
        }
        fn height_at(&self, _x: u32, _z: u32) -> i32 {
            self.dirt_top
        }
        fn material_at(&self, _x: u32, y: i32, _z: u32) -> Option<&str> {
            if let Some((lo, hi)) = self.cave {
                if y >= lo && y < hi {
                    return None;
                }
            }
            if y < self.stone_top {
                Some("stone")
            } else if y < self.dirt_top {
                Some("dirt")
            } else {
                None
            }
        }
        fn biome_at(&self, x: u32, _z: u32) -> &str {
            if x < 8 { "plains" } else { "forest" }
        }
        fn sky_light_at(&self, _x: u32, y: i32, _z: u32) -> u8 {
            if y >= self.dirt_top { 15 } else { 0 }
        }
        fn block_light_at(&self, _x: u32, _y: i32, _z: u32) -> u8 {
            0
        }
    }

    #[test]
    fn test_runs_are_top_down() {
        let chunk = LayeredChunk {
            cave: Some((10, 20)),
            ..LayeredChunk::flat(3, -2)
        };
        let patch = ChunkPatch::from_chunk(&chunk, 0);
        assert_eq!(patch.pos(), SectionPos::new(4, 3, -2));

        let column = patch.column(0, 0).unwrap();
        assert_eq!(column.step, GenerationStep::Light);
        let spans: Vec<(u32, u32)> = column.points.iter().map(|p| (p.bottom(), p.height())).collect();
        assert_eq!(spans, vec![(60, 4), (20, 40), (0, 10)]);
        assert_eq!(column.points[0].sky_light(), 15);
        assert_eq!(column.points[1].sky_light(), 0);
    }

    #[test]
    fn test_ids_are_interned_per_biome() {
        let patch = ChunkPatch::from_chunk(&LayeredChunk::flat(0, 0), 0);
        assert_eq!(patch.id_map().len(), 4);
        let left = patch.column(0, 5).unwrap().points[0].id();
        let right = patch.column(15, 5).unwrap().points[0].id();
        assert_eq!(patch.id_map().get(left), Some(&IdEntry::new("plains", "dirt")));
        assert_eq!(patch.id_map().get(right), Some(&IdEntry::new("forest", "dirt")));
    }

    #[test]
    fn test_min_y_offsets_and_clips() {
        let patch = ChunkPatch::from_chunk(&LayeredChunk::flat(0, 0), 30);
        let column = patch.column(1, 1).unwrap();
        let spans: Vec<(u32, u32)> = column.points.iter().map(|p| (p.bottom(), p.height())).collect();
        assert_eq!(spans, vec![(30, 4), (0, 30)]);
    }
}
