//! lodstore - multi-resolution terrain data storage for distant-region rendering

pub mod core;
pub mod math;
pub mod index;
pub mod data;
pub mod streaming;
