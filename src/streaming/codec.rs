//! Payload encodings for each data source kind, dispatched through a write-once registry.

use std::collections::HashMap;
use std::io::Write;

use crate::core::cancel::CancelToken;
use crate::core::error::Error;
use crate::core::types::Result;
use crate::core::wire::{GUARD, ReadBe, WriteBe};
use crate::data::column::{Column, DataPoint, GenerationStep};
use crate::data::complete::CompleteSource;
use crate::data::grid::ColumnGrid;
use crate::data::id_map::IdMap;
use crate::data::incomplete::IncompleteSource;
use crate::data::source::{DataSource, FullDataSource, SourceKind, SourceMeta};
use crate::data::sparse::{BlockPresenceMask, SparseSource};
use crate::streaming::container::{Compression, Container, ContainerHeader};

pub const PAYLOAD_COMPLETE: u32 = 1;
pub const PAYLOAD_SPARSE: u32 = 2;
pub const PAYLOAD_INCOMPLETE: u32 = 3;
pub const PAYLOAD_VERSION: u16 = 1;

const NO_DATA: u32 = 0x0000_0001;
const HAS_DATA: u32 = GUARD;

/// Decodes one payload kind at one format version.
pub type DecodeFn = fn(&ContainerHeader, &mut &[u8], &CancelToken) -> Result<DataSource>;

#[derive(Default)]
pub struct PayloadRegistryBuilder {
    decoders: HashMap<(u32, u16), DecodeFn>,
}

impl PayloadRegistryBuilder {
    pub fn new() -> Self {
        Self::default()
    }

    /// Register a decoder. Each (type, version) pair may be registered once.
    pub fn register(mut self, payload_type: u32, version: u16, decode: DecodeFn) -> Result<Self> {
        if self.decoders.insert((payload_type, version), decode).is_some() {
            return Err(Error::Config(format!(
                "payload type {} version {} registered twice",
                payload_type, version
            )));
        }
        Ok(self)
    }

    pub fn build(self) -> PayloadRegistry {
        PayloadRegistry {
            decoders: self.decoders,
        }
    }
}

/// Immutable (type, version) -> decoder table.
pub struct PayloadRegistry {
    decoders: HashMap<(u32, u16), DecodeFn>,
}

impl PayloadRegistry {
    /// The decoders for every kind this crate writes.
    pub fn standard() -> Result<Self> {
        Ok(PayloadRegistryBuilder::new()
            .register(PAYLOAD_COMPLETE, PAYLOAD_VERSION, decode_complete)?
            .register(PAYLOAD_SPARSE, PAYLOAD_VERSION, decode_sparse)?
            .register(PAYLOAD_INCOMPLETE, PAYLOAD_VERSION, decode_incomplete)?
            .build())
    }

    pub fn decode(&self, container: &Container, cancel: &CancelToken) -> Result<DataSource> {
        let header = &container.header;
        let decode = self
            .decoders
            .get(&(header.payload_type, header.payload_version))
            .ok_or_else(|| {
                Error::Format(format!(
                    "no decoder for payload type {} version {}",
                    header.payload_type, header.payload_version
                ))
            })?;
        let mut input = container.payload.as_slice();
        let source = decode(header, &mut input, cancel)?;
        if !input.is_empty() {
            return Err(Error::Format(format!("{} trailing payload bytes", input.len())));
        }
        Ok(source)
    }
}

pub fn payload_type_of(kind: SourceKind) -> u32 {
    match kind {
        SourceKind::Complete => PAYLOAD_COMPLETE,
        SourceKind::Sparse => PAYLOAD_SPARSE,
        SourceKind::Incomplete => PAYLOAD_INCOMPLETE,
    }
}

/// Header describing `source`; the checksum is filled in on write.
pub fn header_for(source: &DataSource, compression: Compression) -> ContainerHeader {
    ContainerHeader {
        pos: source.pos(),
        checksum: 0,
        data_detail: source.data_detail(),
        generation_step: source.generation_step() as u8,
        payload_type: payload_type_of(source.kind()),
        payload_version: PAYLOAD_VERSION,
        data_version: source.data_version(),
        compression,
    }
}

pub fn encode(source: &DataSource, w: &mut dyn Write) -> Result<()> {
    match source {
        DataSource::Complete(s) => encode_grid(s, s.grid(), w),
        DataSource::Incomplete(s) => encode_grid(s, s.grid(), w),
        DataSource::Sparse(s) => encode_sparse(s, w),
    }
}

fn write_column(w: &mut dyn Write, column: &Column) -> Result<()> {
    let count = u16::try_from(column.points.len()).map_err(|_| {
        Error::Format(format!("column of {} points exceeds the u16 point count", column.points.len()))
    })?;
    w.put_u8(column.step as u8)?;
    w.put_u16(count)?;
    for p in &column.points {
        w.put_u64(p.0)?;
    }
    Ok(())
}

fn read_column(r: &mut &[u8]) -> Result<Column> {
    let step = r.take_u8()?;
    let step = GenerationStep::from_u8(step)
        .ok_or_else(|| Error::Format(format!("unknown generation step {}", step)))?;
    let count = r.take_u16()? as usize;
    let mut points = Vec::with_capacity(count);
    for _ in 0..count {
        points.push(DataPoint(r.take_u64()?));
    }
    Ok(Column::new(step, points))
}

fn encode_grid(source: &dyn FullDataSource, grid: &ColumnGrid, w: &mut dyn Write) -> Result<()> {
    w.put_u16(source.data_detail() as u16)?;
    w.put_u32(source.width())?;
    w.put_i32(source.min_y())?;
    if source.is_empty() {
        return w.put_u32(NO_DATA);
    }
    w.put_u32(HAS_DATA)?;
    for column in grid.columns() {
        write_column(w, column)?;
    }
    w.put_guard()?;
    source.id_map().write_to(w)?;
    w.put_guard()
}

fn encode_sparse(source: &SparseSource, w: &mut dyn Write) -> Result<()> {
    w.put_u16(source.data_detail() as u16)?;
    w.put_u16(source.unit_detail() as u16)?;
    w.put_u32(source.width())?;
    w.put_i32(source.min_y())?;
    if source.is_empty() {
        return w.put_u32(NO_DATA);
    }
    w.put_u32(HAS_DATA)?;

    let bitset = source.presence().to_bytes();
    w.put_u32(bitset.len() as u32)?;
    w.write_all(&bitset)?;
    w.put_guard()?;

    let mut blocks = Vec::new();
    for index in 0..source.block_count() {
        if let Some(block) = source.block(index) {
            let mut buf = Vec::new();
            for column in block.columns() {
                write_column(&mut buf, column)?;
            }
            blocks.push(buf);
        }
    }
    for block in &blocks {
        w.put_u32(block.len() as u32)?;
    }
    w.put_guard()?;
    for block in &blocks {
        w.write_all(block)?;
    }
    w.put_guard()?;
    source.id_map().write_to(w)?;
    w.put_guard()
}

/// Geometry fields shared by every payload, checked against the header.
fn read_meta(header: &ContainerHeader, data_detail: u16, width: u32, min_y: i32) -> Result<SourceMeta> {
    if data_detail != header.data_detail as u16 {
        return Err(Error::Format(format!(
            "payload data detail {} disagrees with header {}",
            data_detail, header.data_detail
        )));
    }
    if !width.is_power_of_two() || width > 1 << 12 {
        return Err(Error::Format(format!("invalid section width {}", width)));
    }
    let mut meta = SourceMeta::new(header.pos, header.data_detail, width.trailing_zeros() as u8, min_y)?;
    meta.data_version = header.data_version;
    Ok(meta)
}

fn check_ids(columns: &[Column], id_map: &IdMap) -> Result<()> {
    let len = id_map.len() as u32;
    match columns.iter().flat_map(|c| &c.points).find(|p| p.id() >= len) {
        Some(p) => Err(Error::Format(format!("data point id {} outside id map of {}", p.id(), len))),
        None => Ok(()),
    }
}

fn decode_grid(header: &ContainerHeader, r: &mut &[u8], cancel: &CancelToken) -> Result<(SourceMeta, ColumnGrid, IdMap)> {
    let data_detail = r.take_u16()?;
    let width = r.take_u32()?;
    let min_y = r.take_i32()?;
    let meta = read_meta(header, data_detail, width, min_y)?;
    let mut grid = ColumnGrid::new(meta.width());
    match r.take_u32()? {
        NO_DATA => return Ok((meta, grid, IdMap::new())),
        HAS_DATA => {}
        other => return Err(Error::Format(format!("unknown data sentinel {:#010x}", other))),
    }
    for z in 0..meta.width() {
        cancel.check("payload decode")?;
        for x in 0..meta.width() {
            *grid.get_mut(x, z) = read_column(r)?;
        }
    }
    r.expect_guard("columns")?;
    let id_map = IdMap::read_from(r)?;
    r.expect_guard("id map")?;
    check_ids(grid.columns(), &id_map)?;
    Ok((meta, grid, id_map))
}

fn decode_complete(header: &ContainerHeader, r: &mut &[u8], cancel: &CancelToken) -> Result<DataSource> {
    let (meta, grid, id_map) = decode_grid(header, r, cancel)?;
    Ok(DataSource::Complete(CompleteSource::from_parts(meta, grid, id_map)))
}

fn decode_incomplete(header: &ContainerHeader, r: &mut &[u8], cancel: &CancelToken) -> Result<DataSource> {
    let (meta, grid, id_map) = decode_grid(header, r, cancel)?;
    Ok(DataSource::Incomplete(IncompleteSource::from_parts(meta, grid, id_map)))
}

fn decode_sparse(header: &ContainerHeader, r: &mut &[u8], cancel: &CancelToken) -> Result<DataSource> {
    let data_detail = r.take_u16()?;
    let unit_detail = r.take_u16()?;
    let width = r.take_u32()?;
    let min_y = r.take_i32()?;
    let meta = read_meta(header, data_detail, width, min_y)?;
    if unit_detail < data_detail || unit_detail > header.pos.detail as u16 {
        return Err(Error::Format(format!(
            "sparse unit detail {} outside {}..={}",
            unit_detail, data_detail, header.pos.detail
        )));
    }
    let mut source = SparseSource::with_meta(meta, unit_detail as u8, IdMap::new());
    match r.take_u32()? {
        NO_DATA => return Ok(DataSource::Sparse(source)),
        HAS_DATA => {}
        other => return Err(Error::Format(format!("unknown data sentinel {:#010x}", other))),
    }

    let bitset_len = r.take_u32()? as usize;
    let presence = BlockPresenceMask::from_bytes(source.block_count(), &r.take_bytes(bitset_len)?)?;
    r.expect_guard("presence bitset")?;

    let present: Vec<usize> = (0..presence.len()).filter(|&i| presence.is_present(i)).collect();
    let mut lengths = Vec::with_capacity(present.len());
    for _ in &present {
        lengths.push(r.take_u32()? as usize);
    }
    r.expect_guard("block length table")?;

    let block_width = source.block_width();
    let mut columns = Vec::new();
    for (&index, &len) in present.iter().zip(&lengths) {
        cancel.check("payload decode")?;
        let block_bytes = r.take_bytes(len)?;
        let mut input = block_bytes.as_slice();
        let mut block = ColumnGrid::new(block_width);
        for column in block.columns_mut() {
            *column = read_column(&mut input)?;
        }
        if !input.is_empty() {
            return Err(Error::Format(format!("sparse block {} length mismatch", index)));
        }
        columns.extend_from_slice(block.columns());
        source.insert_block(index, block)?;
    }
    r.expect_guard("block data")?;
    let id_map = IdMap::read_from(r)?;
    r.expect_guard("id map")?;
    check_ids(&columns, &id_map)?;
    *source.id_map_mut() = id_map;
    Ok(DataSource::Sparse(source))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::core::config::LodConfig;
    use crate::data::id_map::IdEntry;
    use crate::math::SectionPos;

    fn populated(pos: SectionPos, cells: &[(u32, u32)]) -> DataSource {
        let mut source = DataSource::new_for(pos, &LodConfig::default()).unwrap();
        let id = source.id_map_mut().add_if_not_present_and_get_id(IdEntry::new("taiga", "snow"));
        for &(x, z) in cells {
            source.write_column(
                x,
                z,
                Column::new(GenerationStep::Features, vec![DataPoint::new(id, 3 + x, z, 15, 2)]),
            );
        }
        source
    }

    fn to_container(source: &DataSource) -> Container {
        let mut payload = Vec::new();
        encode(source, &mut payload).unwrap();
        Container {
            header: header_for(source, Compression::None),
            payload,
        }
    }

    #[test]
    fn test_every_kind_decodes_to_the_same_source() {
        let registry = PayloadRegistry::standard().unwrap();
        let cancel = CancelToken::new();
        for (detail, kind) in [(6, SourceKind::Complete), (8, SourceKind::Sparse), (12, SourceKind::Incomplete)] {
            let source = populated(SectionPos::new(detail, 1, -1), &[(0, 0), (9, 17), (63, 63)]);
            assert_eq!(source.kind(), kind);
            let back = registry.decode(&to_container(&source), &cancel).unwrap();
            assert_eq!(back, source, "kind {:?}", kind);
        }
    }

    #[test]
    fn test_sparse_writes_only_present_blocks() {
        let sparse = populated(SectionPos::new(7, 0, 0), &[(0, 0)]);
        let more = populated(SectionPos::new(7, 0, 0), &[(0, 0), (40, 40)]);
        let one = to_container(&sparse).payload.len();
        let two = to_container(&more).payload.len();
        // one extra block of 8x8 empty columns (3 bytes each) plus its 4-byte length entry
        assert_eq!(two - one, 8 * 8 * 3 + 8 + 4);
    }

    #[test]
    fn test_empty_source_uses_no_data_sentinel() {
        let empty = DataSource::new_for(SectionPos::new(6, 0, 0), &LodConfig::default()).unwrap();
        let container = to_container(&empty);
        assert_eq!(container.payload.len(), 2 + 4 + 4 + 4);
        assert_eq!(&container.payload[10..], &[0, 0, 0, 1]);
        assert_eq!(container.header.generation_step, 0);
        let back = PayloadRegistry::standard()
            .unwrap()
            .decode(&container, &CancelToken::new())
            .unwrap();
        assert!(back.is_empty());
    }

    #[test]
    fn test_corruptions_are_format_errors() {
        let registry = PayloadRegistry::standard().unwrap();
        let cancel = CancelToken::new();
        let source = populated(SectionPos::new(6, 0, 0), &[(1, 1)]);
        let good = to_container(&source);

        let mut bad_guard = Container { header: good.header, payload: good.payload.clone() };
        let guard_at = 14 + 64 * 64 * 3 + 8;
        assert_eq!(&bad_guard.payload[guard_at..guard_at + 4], &[0xFF; 4]);
        bad_guard.payload[guard_at] = 0;
        assert!(registry.decode(&bad_guard, &cancel).unwrap_err().is_format());

        let mut bad_detail = Container { header: good.header, payload: good.payload.clone() };
        bad_detail.header.data_detail = 1;
        assert!(registry.decode(&bad_detail, &cancel).unwrap_err().is_format());

        let mut unknown = Container { header: good.header, payload: good.payload.clone() };
        unknown.header.payload_version = 9;
        assert!(registry.decode(&unknown, &cancel).unwrap_err().is_format());

        let mut truncated = Container { header: good.header, payload: good.payload.clone() };
        truncated.payload.truncate(100);
        assert!(registry.decode(&truncated, &cancel).unwrap_err().is_format());
    }

    #[test]
    fn test_oversized_column_is_rejected_on_encode() {
        for pos in [SectionPos::new(6, 0, 0), SectionPos::new(7, 0, 0)] {
            let mut source = DataSource::new_for(pos, &LodConfig::default()).unwrap();
            let points = vec![DataPoint::new(0, 1, 0, 0, 0); u16::MAX as usize + 1];
            source.write_column(2, 2, Column::new(GenerationStep::Light, points));

            let mut payload = Vec::new();
            let err = encode(&source, &mut payload).unwrap_err();
            assert!(err.is_format(), "{}", err);
        }
    }

    #[test]
    fn test_cancelled_decode_is_interrupted() {
        let source = populated(SectionPos::new(6, 0, 0), &[(1, 1)]);
        let cancel = CancelToken::new();
        cancel.cancel();
        let err = PayloadRegistry::standard()
            .unwrap()
            .decode(&to_container(&source), &cancel)
            .unwrap_err();
        assert!(err.is_interrupted());
    }

    #[test]
    fn test_duplicate_registration_is_rejected() {
        let result = PayloadRegistryBuilder::new()
            .register(PAYLOAD_COMPLETE, 1, decode_complete)
            .and_then(|b| b.register(PAYLOAD_COMPLETE, 1, decode_incomplete));
        assert!(matches!(result, Err(Error::Config(_))));
    }
}
