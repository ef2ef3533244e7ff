//! Multi-resolution column storage and downsampling

pub mod column;
pub mod id_map;
pub mod grid;
pub mod source;
pub mod complete;
pub mod sparse;
pub mod incomplete;
pub mod patch;
pub mod downsample;

pub use column::{Column, DataPoint, GenerationStep};
pub use id_map::{IdEntry, IdMap};
pub use grid::{ColumnGrid, GridView};
pub use source::{DataSource, FullDataSource, SourceKind, SourceMeta};
pub use complete::CompleteSource;
pub use sparse::{BlockPresenceMask, SparseSource};
pub use incomplete::IncompleteSource;
pub use patch::{ChunkPatch, ChunkSource};
pub use downsample::{Downsampler, SectionProvider};
