//! Engine configuration, loadable from JSON.

use std::path::{Path, PathBuf};

use serde::{Deserialize, Serialize};

use crate::core::error::Error;
use crate::core::types::Result;
use crate::data::patch::CHUNK_WIDTH_LOG2;
use crate::streaming::container::Compression;

/// Worker pool sizes.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct ThreadConfig {
    /// Threads building columns from chunks and promoting sources
    pub transform: usize,
    /// Threads doing container file reads and writes
    pub io: usize,
    /// Threads running downsampling reductions
    pub merge: usize,
}

impl Default for ThreadConfig {
    fn default() -> Self {
        Self {
            transform: 2,
            io: 2,
            merge: 2,
        }
    }
}

/// Configuration for the LOD store.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct LodConfig {
    /// Directory holding the container files
    pub data_dir: PathBuf,
    /// Columns per section side, as a power of two (6 = 64 columns)
    pub section_width_log2: u8,
    /// Coarsest data detail level kept (each column spans 2^detail blocks)
    pub max_data_detail: u8,
    /// Data details in `1..=sparse_max_data_detail` are stored sparse
    pub sparse_max_data_detail: u8,
    /// Side of one sparse block, as a block-space detail level
    pub sparse_unit_detail: u8,
    /// Bottom of the world in blocks; data point spans are stored relative to it
    pub min_y: i32,
    /// Side of the square tracked around the reference point, in blocks
    pub view_diameter_blocks: u32,
    /// Filter applied to container payloads
    pub compression: Compression,
    pub threads: ThreadConfig,
}

impl Default for LodConfig {
    fn default() -> Self {
        Self {
            data_dir: PathBuf::from("lod_data"),
            section_width_log2: 6,
            max_data_detail: 10,
            sparse_max_data_detail: 3,
            sparse_unit_detail: 4,
            min_y: -64,
            view_diameter_blocks: 8192,
            compression: Compression::Lz4,
            threads: ThreadConfig::default(),
        }
    }
}

impl LodConfig {
    /// Load a configuration from a JSON file. Missing fields take their defaults.
    pub fn from_json_file(path: impl AsRef<Path>) -> Result<Self> {
        let text = std::fs::read_to_string(path.as_ref())?;
        let config: LodConfig = serde_json::from_str(&text)?;
        config.validate()?;
        Ok(config)
    }

    /// Save as pretty JSON.
    pub fn save_json_file(&self, path: impl AsRef<Path>) -> Result<()> {
        let text = serde_json::to_string_pretty(self)?;
        std::fs::write(path.as_ref(), text)?;
        Ok(())
    }

    /// Check cross-field constraints.
    pub fn validate(&self) -> Result<()> {
        // a chunk patch must fit inside one finest section
        if self.section_width_log2 < CHUNK_WIDTH_LOG2 || self.section_width_log2 > 10 {
            return Err(Error::Config(format!(
                "section_width_log2 must be in {}..=10, got {}",
                CHUNK_WIDTH_LOG2, self.section_width_log2
            )));
        }
        if self.max_data_detail as u32 + self.section_width_log2 as u32 > 30 {
            return Err(Error::Config(format!(
                "max_data_detail {} too large for section width 2^{}",
                self.max_data_detail, self.section_width_log2
            )));
        }
        if self.sparse_max_data_detail > self.max_data_detail {
            return Err(Error::Config(format!(
                "sparse_max_data_detail {} exceeds max_data_detail {}",
                self.sparse_max_data_detail, self.max_data_detail
            )));
        }
        if self.sparse_unit_detail > self.section_width_log2 {
            return Err(Error::Config(format!(
                "sparse_unit_detail {} must not exceed the section width exponent {}",
                self.sparse_unit_detail, self.section_width_log2
            )));
        }
        if self.threads.transform == 0 || self.threads.io == 0 || self.threads.merge == 0 {
            return Err(Error::Config("every worker pool needs at least one thread".into()));
        }
        Ok(())
    }

    /// Columns per section side.
    pub fn section_width(&self) -> u32 {
        1 << self.section_width_log2
    }

    /// Finest section detail (a section of data detail 0).
    pub fn min_section_detail(&self) -> u8 {
        self.section_width_log2
    }

    /// Coarsest section detail.
    pub fn max_section_detail(&self) -> u8 {
        self.section_width_log2 + self.max_data_detail
    }
}
