//! Block-partitioned storage where only touched blocks are allocated.

use crate::core::error::Error;
use crate::core::types::Result;
use crate::data::column::Column;
use crate::data::grid::ColumnGrid;
use crate::data::id_map::IdMap;
use crate::data::source::{FullDataSource, SourceMeta};
use crate::math::SectionPos;

/// Bitmap of which sparse blocks are allocated.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct BlockPresenceMask {
    bits: Vec<u64>,
    len: usize,
}

impl BlockPresenceMask {
    pub fn new(len: usize) -> Self {
        Self {
            bits: vec![0; len.div_ceil(64)],
            len,
        }
    }

    pub fn len(&self) -> usize {
        self.len
    }

    pub fn is_empty(&self) -> bool {
        self.len == 0
    }

    pub fn is_present(&self, index: usize) -> bool {
        debug_assert!(index < self.len);
        (self.bits[index / 64] & (1 << (index % 64))) != 0
    }

    pub fn set_present(&mut self, index: usize, present: bool) {
        debug_assert!(index < self.len);
        let word = index / 64;
        let bit = index % 64;
        if present {
            self.bits[word] |= 1 << bit;
        } else {
            self.bits[word] &= !(1 << bit);
        }
    }

    pub fn count(&self) -> u32 {
        self.bits.iter().map(|w| w.count_ones()).sum()
    }

    /// Bytes in block order, least significant bit first.
    pub fn to_bytes(&self) -> Vec<u8> {
        (0..self.len.div_ceil(8))
            .map(|i| (self.bits[i / 8] >> ((i % 8) * 8)) as u8)
            .collect()
    }

    pub fn from_bytes(len: usize, bytes: &[u8]) -> Result<Self> {
        if bytes.len() != len.div_ceil(8) {
            return Err(Error::Format(format!(
                "presence bitset of {} bytes for {} blocks",
                bytes.len(),
                len
            )));
        }
        let mut mask = Self::new(len);
        for (i, &byte) in bytes.iter().enumerate() {
            mask.bits[i / 8] |= (byte as u64) << ((i % 8) * 8);
        }
        if (len..bytes.len() * 8).any(|i| mask.bits[i / 64] & (1 << (i % 64)) != 0) {
            return Err(Error::Format("presence bits set past the last block".into()));
        }
        Ok(mask)
    }
}

#[derive(Clone, Debug, PartialEq)]
pub struct SparseSource {
    meta: SourceMeta,
    unit_detail: u8,
    blocks_per_side_log2: u8,
    blocks: Vec<Option<ColumnGrid>>,
    presence: BlockPresenceMask,
    id_map: IdMap,
}

impl SparseSource {
    /// `unit_detail` is the block side in block-space detail; it is clamped to the section.
    pub fn new(pos: SectionPos, data_detail: u8, width_log2: u8, unit_detail: u8, min_y: i32) -> Result<Self> {
        let meta = SourceMeta::new(pos, data_detail, width_log2, min_y)?;
        Ok(Self::with_meta(meta, unit_detail, IdMap::new()))
    }

    pub(crate) fn with_meta(meta: SourceMeta, unit_detail: u8, id_map: IdMap) -> Self {
        let unit_detail = unit_detail.clamp(meta.data_detail, meta.pos.detail);
        let blocks_per_side_log2 = meta.pos.detail - unit_detail;
        let count = 1usize << (2 * blocks_per_side_log2);
        Self {
            meta,
            unit_detail,
            blocks_per_side_log2,
            blocks: vec![None; count],
            presence: BlockPresenceMask::new(count),
            id_map,
        }
    }

    pub fn unit_detail(&self) -> u8 {
        self.unit_detail
    }

    pub fn blocks_per_side(&self) -> u32 {
        1 << self.blocks_per_side_log2
    }

    /// Columns per block side.
    pub fn block_width(&self) -> u32 {
        1 << (self.unit_detail - self.meta.data_detail)
    }

    pub fn block_count(&self) -> usize {
        self.blocks.len()
    }

    pub fn presence(&self) -> &BlockPresenceMask {
        &self.presence
    }

    pub fn block(&self, index: usize) -> Option<&ColumnGrid> {
        self.blocks[index].as_ref()
    }

    /// Install a decoded block.
    pub(crate) fn insert_block(&mut self, index: usize, block: ColumnGrid) -> Result<()> {
        if block.width() != self.block_width() {
            return Err(Error::Format(format!(
                "sparse block width {} does not match {}",
                block.width(),
                self.block_width()
            )));
        }
        self.presence.set_present(index, true);
        self.blocks[index] = Some(block);
        Ok(())
    }

    fn locate(&self, x: u32, z: u32) -> (usize, u32, u32) {
        let shift = self.unit_detail - self.meta.data_detail;
        let mask = (1 << shift) - 1;
        let index = (x >> shift) as usize + ((z >> shift) as usize) * self.blocks_per_side() as usize;
        (index, x & mask, z & mask)
    }
}

impl FullDataSource for SparseSource {
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
        let (index, lx, lz) = self.locate(x, z);
        self.blocks[index].as_ref().map(|b| b.get(lx, lz))
    }

    fn column_slot(&mut self, x: u32, z: u32) -> &mut Column {
        let (index, lx, lz) = self.locate(x, z);
        let block_width = self.block_width();
        self.presence.set_present(index, true);
        self.blocks[index]
            .get_or_insert_with(|| ColumnGrid::new(block_width))
            .get_mut(lx, lz)
    }

    fn is_empty(&self) -> bool {
        self.blocks.iter().flatten().all(ColumnGrid::is_all_empty)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::data::column::{DataPoint, GenerationStep};

    #[test]
    fn test_block_geometry() {
        // data detail 1, 64 columns: 128 blocks per side, 16-block units -> 8 columns per block
        let source = SparseSource::new(SectionPos::new(7, 0, 0), 1, 6, 4, 0).unwrap();
        assert_eq!(source.block_width(), 8);
        assert_eq!(source.blocks_per_side(), 8);
        assert_eq!(source.block_count(), 64);

        // unit finer than the data detail is raised to it
        let coarse = SparseSource::new(SectionPos::new(11, 0, 0), 5, 6, 4, 0).unwrap();
        assert_eq!(coarse.unit_detail(), 5);
        assert_eq!(coarse.block_width(), 1);
    }

    #[test]
    fn test_writes_allocate_only_touched_blocks() {
        let mut source = SparseSource::new(SectionPos::new(7, 0, 0), 1, 6, 4, 0).unwrap();
        assert!(source.column(9, 17).is_none());
        assert!(source.is_empty());

        let column = Column::new(GenerationStep::Surface, vec![DataPoint::new(0, 3, 0, 15, 0)]);
        assert!(source.write_column(9, 17, column.clone()));
        assert_eq!(source.presence().count(), 1);
        assert!(source.presence().is_present(1 + 2 * 8));
        assert_eq!(source.column(9, 17), Some(&column));
        assert_eq!(source.column(8, 16), Some(&Column::empty()));
        assert!(source.column(0, 0).is_none());
        assert!(!source.is_empty());
    }

    #[test]
    fn test_presence_bytes() {
        let mut mask = BlockPresenceMask::new(12);
        mask.set_present(0, true);
        mask.set_present(9, true);
        let bytes = mask.to_bytes();
        assert_eq!(bytes, vec![0b0000_0001, 0b0000_0010]);
        assert_eq!(BlockPresenceMask::from_bytes(12, &bytes).unwrap(), mask);

        assert!(BlockPresenceMask::from_bytes(12, &[0]).is_err());
        assert!(BlockPresenceMask::from_bytes(12, &[0, 0b0001_0000]).is_err());
    }
}
