//! Crash-safe container files: a fixed 64-byte header followed by a checksummed payload.
//!
//! Header layout (big-endian):
//!
//! | offset | size | field |
//! |--------|------|-------|
//! | 0  | 4 | magic `LODC` |
//! | 4  | 1 | position detail |
//! | 5  | 4 | position x |
//! | 9  | 4 | position z |
//! | 13 | 4 | CRC-32 of every byte after the header |
//! | 17 | 1 | section detail |
//! | 18 | 1 | data detail |
//! | 19 | 1 | generation step |
//! | 20 | 4 | payload type id |
//! | 24 | 2 | payload format version |
//! | 26 | 8 | data version |
//! | 34 | 1 | compression filter id |
//! | 35 | 29 | reserved, zero |
//!
//! Writes go to `<file>.tmp` and are renamed over the destination only once complete and synced, so
//! a crash never leaves a half-written destination behind.

use std::ffi::OsString;
use std::fs::File;
use std::io::{self, BufWriter, Read, Seek, SeekFrom, Write};
use std::path::{Path, PathBuf};

use serde::{Deserialize, Serialize};

use crate::core::error::Error;
use crate::core::types::Result;
use crate::math::SectionPos;
use crate::math::section_pos::MAX_DETAIL;

pub const MAGIC: [u8; 4] = *b"LODC";
pub const HEADER_LEN: usize = 64;

/// Stream filter applied to the payload before checksumming.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Compression {
    None,
    #[default]
    Lz4,
}

impl Compression {
    pub fn id(self) -> u8 {
        match self {
            Compression::None => 0,
            Compression::Lz4 => 1,
        }
    }

    pub fn from_id(id: u8) -> Result<Self> {
        match id {
            0 => Ok(Compression::None),
            1 => Ok(Compression::Lz4),
            other => Err(Error::Format(format!("unknown compression filter {}", other))),
        }
    }
}

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct ContainerHeader {
    pub pos: SectionPos,
    pub checksum: u32,
    pub data_detail: u8,
    pub generation_step: u8,
    pub payload_type: u32,
    pub payload_version: u16,
    pub data_version: u64,
    pub compression: Compression,
}

impl ContainerHeader {
    pub fn to_bytes(&self) -> [u8; HEADER_LEN] {
        let mut b = [0u8; HEADER_LEN];
        b[0..4].copy_from_slice(&MAGIC);
        b[4] = self.pos.detail;
        b[5..9].copy_from_slice(&self.pos.x.to_be_bytes());
        b[9..13].copy_from_slice(&self.pos.z.to_be_bytes());
        b[13..17].copy_from_slice(&self.checksum.to_be_bytes());
        b[17] = self.pos.detail;
        b[18] = self.data_detail;
        b[19] = self.generation_step;
        b[20..24].copy_from_slice(&self.payload_type.to_be_bytes());
        b[24..26].copy_from_slice(&self.payload_version.to_be_bytes());
        b[26..34].copy_from_slice(&self.data_version.to_be_bytes());
        b[34] = self.compression.id();
        b
    }

    /// Parse a header whose magic has already been checked.
    pub fn from_bytes(b: &[u8; HEADER_LEN]) -> Result<Self> {
        if b[0..4] != MAGIC {
            return Err(Error::Format(format!("bad magic {:02x?}", &b[0..4])));
        }
        let be_i32 = |at: usize| i32::from_be_bytes([b[at], b[at + 1], b[at + 2], b[at + 3]]);
        let be_u32 = |at: usize| u32::from_be_bytes([b[at], b[at + 1], b[at + 2], b[at + 3]]);
        // the header is outside the checksum, so its detail bytes are untrusted
        if b[4] > MAX_DETAIL || b[18] > b[4] {
            return Err(Error::Format(format!(
                "header detail {} with data detail {} out of range",
                b[4], b[18]
            )));
        }
        let pos = SectionPos::new(b[4], be_i32(5), be_i32(9));
        if b[17] != pos.detail {
            return Err(Error::Format(format!(
                "section detail {} does not match position {}",
                b[17], pos
            )));
        }
        if b[35..].iter().any(|&byte| byte != 0) {
            return Err(Error::Format("reserved header bytes are not zero".into()));
        }
        let mut version = [0u8; 8];
        version.copy_from_slice(&b[26..34]);
        Ok(Self {
            pos,
            checksum: be_u32(13),
            data_detail: b[18],
            generation_step: b[19],
            payload_type: be_u32(20),
            payload_version: u16::from_be_bytes([b[24], b[25]]),
            data_version: u64::from_be_bytes(version),
            compression: Compression::from_id(b[34])?,
        })
    }
}

/// Passes bytes through while accumulating their CRC-32.
pub struct ChecksumWriter<W> {
    inner: W,
    hasher: crc32fast::Hasher,
}

impl<W: Write> ChecksumWriter<W> {
    pub fn new(inner: W) -> Self {
        Self {
            inner,
            hasher: crc32fast::Hasher::new(),
        }
    }

    pub fn finish(self) -> (W, u32) {
        (self.inner, self.hasher.finalize())
    }
}

impl<W: Write> Write for ChecksumWriter<W> {
    fn write(&mut self, buf: &[u8]) -> io::Result<usize> {
        let n = self.inner.write(buf)?;
        self.hasher.update(&buf[..n]);
        Ok(n)
    }

    fn flush(&mut self) -> io::Result<()> {
        self.inner.flush()
    }
}

/// A validated container, payload already decompressed.
#[derive(Debug)]
pub struct Container {
    pub header: ContainerHeader,
    pub payload: Vec<u8>,
}

/// `path` with `suffix` appended to its file name.
pub fn with_suffix(path: &Path, suffix: &str) -> PathBuf {
    let mut name = OsString::from(path.as_os_str());
    name.push(suffix);
    PathBuf::from(name)
}

/// Write a container atomically. `header.checksum` is ignored and computed from the payload.
pub fn write_atomic(
    path: &Path,
    header: ContainerHeader,
    write_payload: impl FnOnce(&mut dyn Write) -> Result<()>,
) -> Result<()> {
    let dir = path.parent().filter(|p| !p.as_os_str().is_empty());
    if let Some(dir) = dir {
        std::fs::create_dir_all(dir)?;
    }
    let tmp_path = with_suffix(path, ".tmp");
    let result = write_tmp(&tmp_path, header, write_payload);
    if let Err(err) = result {
        let _ = std::fs::remove_file(&tmp_path);
        return Err(err);
    }
    std::fs::rename(&tmp_path, path)?;
    if let Some(dir) = dir {
        fsync_directory(dir);
    }
    Ok(())
}

fn write_tmp(
    tmp_path: &Path,
    mut header: ContainerHeader,
    write_payload: impl FnOnce(&mut dyn Write) -> Result<()>,
) -> Result<()> {
    let mut writer = BufWriter::new(File::create(tmp_path)?);
    writer.write_all(&[0u8; HEADER_LEN])?;

    let mut sink = ChecksumWriter::new(writer);
    match header.compression {
        Compression::None => write_payload(&mut sink)?,
        Compression::Lz4 => {
            let mut encoder = lz4_flex::frame::FrameEncoder::new(&mut sink);
            write_payload(&mut encoder)?;
            encoder.finish().map_err(io::Error::other)?;
        }
    }
    let (writer, checksum) = sink.finish();
    header.checksum = checksum;

    let mut file = writer.into_inner().map_err(|e| e.into_error())?;
    file.seek(SeekFrom::Start(0))?;
    file.write_all(&header.to_bytes())?;
    file.sync_all()?;
    Ok(())
}

/// Read and validate a container. `Ok(None)` if no file exists.
///
/// A file without the magic is renamed aside to `<file>.corrupt`. Any other header or checksum
/// mismatch fails with [`Error::Format`] and leaves the file where it is.
pub fn read(path: &Path) -> Result<Option<Container>> {
    let bytes = match std::fs::read(path) {
        Ok(bytes) => bytes,
        Err(e) if e.kind() == io::ErrorKind::NotFound => return Ok(None),
        Err(e) => return Err(e.into()),
    };

    if bytes.len() < HEADER_LEN || bytes[0..4] != MAGIC {
        let aside = with_suffix(path, ".corrupt");
        log::warn!(
            "{} is not a container file, moving it to {}",
            path.display(),
            aside.display()
        );
        std::fs::rename(path, &aside)?;
        return Err(Error::Format(format!("bad magic in {}", path.display())));
    }

    let mut raw = [0u8; HEADER_LEN];
    raw.copy_from_slice(&bytes[..HEADER_LEN]);
    let header = ContainerHeader::from_bytes(&raw)?;

    let body = &bytes[HEADER_LEN..];
    let actual = crc32fast::hash(body);
    if actual != header.checksum {
        return Err(Error::Format(format!(
            "checksum mismatch in {}: header {:#010x}, payload {:#010x}",
            path.display(),
            header.checksum,
            actual
        )));
    }

    let payload = match header.compression {
        Compression::None => body.to_vec(),
        Compression::Lz4 => {
            let mut out = Vec::new();
            lz4_flex::frame::FrameDecoder::new(body)
                .read_to_end(&mut out)
                .map_err(|e| Error::Format(format!("corrupt LZ4 frame: {}", e)))?;
            out
        }
    };
    Ok(Some(Container { header, payload }))
}

/// Read only the header, for inspection.
pub fn read_header(path: &Path) -> Result<ContainerHeader> {
    let mut raw = [0u8; HEADER_LEN];
    File::open(path)?
        .read_exact(&mut raw)
        .map_err(|e| Error::from_payload_io(e, "container header"))?;
    ContainerHeader::from_bytes(&raw)
}

fn fsync_directory(path: &Path) {
    if let Ok(dir) = File::open(path) {
        let _ = dir.sync_all();
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn header(compression: Compression) -> ContainerHeader {
        ContainerHeader {
            pos: SectionPos::new(7, -3, 12),
            checksum: 0,
            data_detail: 1,
            generation_step: 5,
            payload_type: 2,
            payload_version: 1,
            data_version: 0x0102_0304_0506_0708,
            compression,
        }
    }

    #[test]
    fn test_header_is_bit_exact() {
        let h = ContainerHeader { checksum: 0xAABB_CCDD, ..header(Compression::Lz4) };
        let b = h.to_bytes();
        assert_eq!(&b[0..4], b"LODC");
        assert_eq!(b[4], 7);
        assert_eq!(&b[5..9], &[0xFF, 0xFF, 0xFF, 0xFD]);
        assert_eq!(&b[9..13], &[0, 0, 0, 12]);
        assert_eq!(&b[13..17], &[0xAA, 0xBB, 0xCC, 0xDD]);
        assert_eq!(b[17], 7);
        assert_eq!(b[18], 1);
        assert_eq!(b[19], 5);
        assert_eq!(&b[20..24], &[0, 0, 0, 2]);
        assert_eq!(&b[24..26], &[0, 1]);
        assert_eq!(&b[26..34], &[1, 2, 3, 4, 5, 6, 7, 8]);
        assert_eq!(b[34], 1);
        assert!(b[35..].iter().all(|&x| x == 0));
        assert_eq!(ContainerHeader::from_bytes(&b).unwrap(), h);
    }

    #[test]
    fn test_write_then_read() {
        let dir = tempfile::tempdir().unwrap();
        for compression in [Compression::None, Compression::Lz4] {
            let path = dir.path().join("nested").join(format!("{:?}.lod", compression));
            let payload: Vec<u8> = (0..5000u32).map(|i| (i % 7) as u8).collect();
            write_atomic(&path, header(compression), |w| {
                w.write_all(&payload)?;
                Ok(())
            })
            .unwrap();

            assert!(!with_suffix(&path, ".tmp").exists());
            let container = read(&path).unwrap().unwrap();
            assert_eq!(container.payload, payload);
            assert_eq!(container.header.pos, SectionPos::new(7, -3, 12));
            assert_eq!(read_header(&path).unwrap(), container.header);
        }
    }

    #[test]
    fn test_missing_file_is_none() {
        let dir = tempfile::tempdir().unwrap();
        assert!(read(&dir.path().join("absent.lod")).unwrap().is_none());
    }

    #[test]
    fn test_corrupt_payload_leaves_file_untouched() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("a.lod");
        write_atomic(&path, header(Compression::None), |w| {
            w.write_all(b"column data column data")?;
            Ok(())
        })
        .unwrap();

        let mut bytes = std::fs::read(&path).unwrap();
        bytes[HEADER_LEN + 3] ^= 0x40;
        std::fs::write(&path, &bytes).unwrap();

        let err = read(&path).unwrap_err();
        assert!(err.is_format(), "{}", err);
        assert_eq!(std::fs::read(&path).unwrap(), bytes);
        assert!(!with_suffix(&path, ".corrupt").exists());
    }

    #[test]
    fn test_out_of_range_detail_is_format_error() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("d.lod");
        write_atomic(&path, header(Compression::None), |w| {
            w.write_all(b"payload")?;
            Ok(())
        })
        .unwrap();
        let original = std::fs::read(&path).unwrap();

        let mut bytes = original.clone();
        bytes[4] = 200;
        bytes[17] = 200;
        std::fs::write(&path, &bytes).unwrap();
        assert!(read(&path).unwrap_err().is_format());
        assert!(read_header(&path).unwrap_err().is_format());
        assert_eq!(std::fs::read(&path).unwrap(), bytes);

        // data detail coarser than the section itself
        let mut bytes = original;
        bytes[18] = 8;
        std::fs::write(&path, &bytes).unwrap();
        assert!(read(&path).unwrap_err().is_format());
        assert!(!with_suffix(&path, ".corrupt").exists());
    }

    #[test]
    fn test_bad_magic_is_moved_aside() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("b.lod");
        std::fs::write(&path, b"definitely not a container").unwrap();

        assert!(read(&path).unwrap_err().is_format());
        assert!(!path.exists());
        assert!(with_suffix(&path, ".corrupt").exists());
    }

    #[test]
    fn test_failed_write_keeps_destination() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("c.lod");
        write_atomic(&path, header(Compression::Lz4), |w| {
            w.write_all(b"first")?;
            Ok(())
        })
        .unwrap();

        let err = write_atomic(&path, header(Compression::Lz4), |w| {
            w.write_all(b"partial")?;
            Err(Error::Interrupted("encode".into()))
        })
        .unwrap_err();
        assert!(err.is_interrupted());
        assert!(!with_suffix(&path, ".tmp").exists());
        assert_eq!(read(&path).unwrap().unwrap().payload, b"first");
    }
}
