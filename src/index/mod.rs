//! Sliding-window spatial indexes

pub mod ring_list;
pub mod quad_tree;

pub use ring_list::MovableGridRingList;
pub use quad_tree::QuadTree;
