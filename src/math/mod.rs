//! Spatial addressing

pub mod section_pos;

pub use section_pos::SectionPos;
