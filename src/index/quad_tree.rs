//! Lazily-built quad tree over a moving window of root sections.
//!
//! The top level is a [`MovableGridRingList`] of root branches at the maximum detail level. Each branch
//! holds its nodes in a map keyed by position, so parent/child relations come from [`SectionPos`]
//! arithmetic alone. Nodes are created on demand down to the minimum detail level, and when the
//! window moves whole root subtrees are evicted together.

use std::collections::HashMap;

use glam::IVec2;
use parking_lot::RwLock;

use crate::core::error::Error;
use crate::core::types::Result;
use crate::index::ring_list::MovableGridRingList;
use crate::math::SectionPos;

/// One resident root and its lazily created descendants.
///
/// A node exists iff its position is a key; its value may still be `None`. Every existing node's
/// ancestors up to the root exist as well.
pub struct QuadBranch<T> {
    root: SectionPos,
    nodes: HashMap<SectionPos, Option<T>>,
}

impl<T> QuadBranch<T> {
    fn new(root: SectionPos) -> Self {
        let mut nodes = HashMap::new();
        nodes.insert(root, None);
        Self { root, nodes }
    }

    pub fn root(&self) -> SectionPos {
        self.root
    }

    /// Create `pos` and every missing node between it and the root.
    fn ensure_path(&mut self, pos: SectionPos) {
        let mut cursor = pos;
        while cursor.detail < self.root.detail && !self.nodes.contains_key(&cursor) {
            self.nodes.insert(cursor, None);
            cursor = cursor.parent();
        }
    }

    fn existing_children(&self, pos: SectionPos) -> impl Iterator<Item = SectionPos> + '_ {
        let children = if pos.detail == 0 { None } else { Some(pos.children()) };
        children
            .into_iter()
            .flatten()
            .filter(move |c| self.nodes.contains_key(c))
    }

    /// Remove `pos` and its subtree, handing every stored value to `sink`.
    fn remove_subtree(&mut self, pos: SectionPos, sink: &mut impl FnMut(SectionPos, T)) {
        let mut stack = vec![pos];
        while let Some(p) = stack.pop() {
            if let Some(slot) = self.nodes.remove(&p) {
                if p.detail > 0 {
                    stack.extend(p.children().into_iter().filter(|c| self.nodes.contains_key(c)));
                }
                if let Some(value) = slot {
                    sink(p, value);
                }
            }
        }
    }

    /// Node positions, parents before children, children in index order.
    fn positions_top_down(&self) -> Vec<SectionPos> {
        let mut out = Vec::with_capacity(self.nodes.len());
        let mut stack = vec![self.root];
        while let Some(p) = stack.pop() {
            out.push(p);
            let mut children: Vec<SectionPos> = self.existing_children(p).collect();
            children.reverse();
            stack.extend(children);
        }
        out
    }

    fn drain(mut self, sink: &mut impl FnMut(SectionPos, T)) {
        let root = self.root;
        self.remove_subtree(root, sink);
    }
}

/// Quad tree index keyed by [`SectionPos`] over a square tracked around a center block position.
pub struct QuadTree<T> {
    min_detail: u8,
    max_detail: u8,
    /// Side of the tracked square in blocks
    diameter: i64,
    center: RwLock<IVec2>,
    roots: MovableGridRingList<QuadBranch<T>>,
}

impl<T> QuadTree<T> {
    /// Track a `diameter_blocks` wide square around `center_block`, with nodes from `min_detail`
    /// up to roots at `max_detail`.
    pub fn new(diameter_blocks: u32, center_block: IVec2, min_detail: u8, max_detail: u8) -> Result<Self> {
        if min_detail > max_detail || max_detail > 30 {
            return Err(Error::Config(format!(
                "invalid quad tree detail range {}..={}",
                min_detail, max_detail
            )));
        }
        if diameter_blocks == 0 {
            return Err(Error::Config("quad tree diameter must be positive".into()));
        }

        let root_width = 1i64 << max_detail;
        let half_span = (diameter_blocks as i64 / 2 + root_width - 1) / root_width;
        let ring_width = (2 * half_span + 1).max(3) as u32;
        let root_center = Self::root_coord(center_block, max_detail);

        Ok(Self {
            min_detail,
            max_detail,
            diameter: diameter_blocks as i64,
            center: RwLock::new(center_block),
            roots: MovableGridRingList::new(ring_width, root_center),
        })
    }

    fn root_coord(block: IVec2, max_detail: u8) -> IVec2 {
        let root = SectionPos::from_block_pos(max_detail, block.x, block.y);
        IVec2::new(root.x, root.z)
    }

    pub fn min_detail(&self) -> u8 {
        self.min_detail
    }

    pub fn max_detail(&self) -> u8 {
        self.max_detail
    }

    pub fn center_block_pos(&self) -> IVec2 {
        *self.center.read()
    }

    /// Root branches per side of the resident window.
    pub fn ring_width(&self) -> u32 {
        self.roots.width()
    }

    /// Tracked square as (min x, min z, side) in blocks.
    fn tracked_square(&self) -> (i64, i64, i64) {
        let center = *self.center.read();
        let half = self.diameter / 2;
        (center.x as i64 - half, center.y as i64 - half, self.diameter)
    }

    /// Detail in range and the section's square overlaps the tracked square.
    pub fn is_section_pos_in_bounds(&self, pos: SectionPos) -> bool {
        if pos.detail < self.min_detail || pos.detail > self.max_detail {
            return false;
        }
        let (tx, tz, tw) = self.tracked_square();
        let (px, pz) = pos.min_corner();
        let pw = pos.width();
        px < tx + tw && tx < px + pw && pz < tz + tw && tz < pz + pw
    }

    fn check_bounds(&self, pos: SectionPos) -> Result<()> {
        if self.is_section_pos_in_bounds(pos) {
            return Ok(());
        }
        let (tx, tz, tw) = self.tracked_square();
        Err(Error::OutOfBounds(format!(
            "section {} outside quad tree (details {}..={}, blocks [{}, {})x[{}, {}))",
            pos, self.min_detail, self.max_detail, tx, tx + tw, tz, tz + tw
        )))
    }

    fn root_of(&self, pos: SectionPos) -> SectionPos {
        pos.convert_to_detail(self.max_detail)
    }

    /// Run `f` on the branch owning `pos`, creating the root lazily.
    fn with_branch<R>(&self, pos: SectionPos, f: impl FnOnce(&mut QuadBranch<T>) -> R) -> Result<R> {
        self.check_bounds(pos)?;
        let root = self.root_of(pos);
        self.roots.with_mut(IVec2::new(root.x, root.z), |slot| {
            let branch = slot.get_or_insert_with(|| QuadBranch::new(root));
            f(branch)
        })
    }

    /// Run `f` on the branch owning `pos` only if it is resident.
    fn with_existing_branch<R>(&self, pos: SectionPos, f: impl FnOnce(&QuadBranch<T>) -> R) -> Option<R> {
        if !self.is_section_pos_in_bounds(pos) {
            return None;
        }
        let root = self.root_of(pos);
        self.roots.with(IVec2::new(root.x, root.z), |slot| slot.map(f))
    }

    /// Create the node at `pos` (and its ancestors) if missing.
    pub fn ensure_node(&self, pos: SectionPos) -> Result<()> {
        self.with_branch(pos, |branch| branch.ensure_path(pos))
    }

    pub fn contains_node(&self, pos: SectionPos) -> bool {
        self.with_existing_branch(pos, |b| b.nodes.contains_key(&pos)).unwrap_or(false)
    }

    /// Clone the value stored at `pos`. Never creates nodes.
    pub fn get_value(&self, pos: SectionPos) -> Result<Option<T>>
    where
        T: Clone,
    {
        self.check_bounds(pos)?;
        Ok(self
            .with_existing_branch(pos, |b| b.nodes.get(&pos).cloned().flatten())
            .flatten())
    }

    /// Store `value` at `pos`, creating the node path lazily. Returns the previous value.
    pub fn set_value(&self, pos: SectionPos, value: T) -> Result<Option<T>> {
        self.with_branch(pos, |branch| {
            branch.ensure_path(pos);
            branch.nodes.insert(pos, Some(value)).flatten()
        })
    }

    /// Take the value at `pos`, leaving the node in place.
    pub fn take_value(&self, pos: SectionPos) -> Result<Option<T>> {
        self.with_branch(pos, |branch| branch.nodes.get_mut(&pos).and_then(Option::take))
    }

    /// Delete the node at `pos` and its whole subtree, returning the values that were stored there.
    pub fn remove_node(&self, pos: SectionPos) -> Result<Vec<(SectionPos, T)>> {
        let root = self.root_of(pos);
        if pos == root {
            self.check_bounds(pos)?;
            let mut removed = Vec::new();
            if let Some(branch) = self.roots.remove(IVec2::new(root.x, root.z)) {
                branch.drain(&mut |p, v| removed.push((p, v)));
            }
            return Ok(removed);
        }
        self.with_branch(pos, |branch| {
            let mut removed = Vec::new();
            branch.remove_subtree(pos, &mut |p, v| removed.push((p, v)));
            removed
        })
    }

    /// Move the tracked square; evicted root subtrees hand each of their values to `on_evict`.
    pub fn set_center_block_pos(&self, center_block: IVec2, mut on_evict: impl FnMut(SectionPos, T)) {
        *self.center.write() = center_block;
        let root_center = Self::root_coord(center_block, self.max_detail);
        self.roots.move_to(root_center, |_, branch| branch.drain(&mut on_evict));
    }

    /// Resident root positions, nearest to the center first.
    pub fn root_positions(&self) -> Vec<SectionPos> {
        let mut out = Vec::new();
        self.roots.for_each_nearest_first(|_, branch| out.push(branch.root));
        out
    }

    /// Every node position: roots nearest-first, each subtree top-down.
    pub fn node_positions(&self) -> Vec<SectionPos> {
        let mut out = Vec::new();
        self.roots
            .for_each_nearest_first(|_, branch| out.extend(branch.positions_top_down()));
        out
    }

    /// Node positions without child nodes.
    pub fn leaf_positions(&self) -> Vec<SectionPos> {
        let mut out = Vec::new();
        self.roots.for_each_nearest_first(|_, branch| {
            out.extend(
                branch
                    .positions_top_down()
                    .into_iter()
                    .filter(|p| branch.existing_children(*p).next().is_none()),
            );
        });
        out
    }

    /// Visit every stored value, roots nearest-first, subtrees top-down.
    pub fn for_each_value(&self, mut f: impl FnMut(SectionPos, &T)) {
        self.roots.for_each_nearest_first(|_, branch| {
            for pos in branch.positions_top_down() {
                if let Some(Some(value)) = branch.nodes.get(&pos) {
                    f(pos, value);
                }
            }
        });
    }

    /// Walk every node top-down; returning `false` deletes that node and its whole subtree
    /// (descendants are not visited). Removed values are dropped.
    pub fn retain(&self, mut f: impl FnMut(SectionPos, &mut Option<T>) -> bool) {
        let mut emptied_roots = Vec::new();
        self.roots.for_each_mut(|cell, slot| {
            let Some(branch) = slot.as_mut() else { return };
            let mut stack = vec![branch.root];
            while let Some(pos) = stack.pop() {
                let keep = match branch.nodes.get_mut(&pos) {
                    Some(value) => f(pos, value),
                    None => continue,
                };
                if keep {
                    let mut children: Vec<SectionPos> = branch.existing_children(pos).collect();
                    children.reverse();
                    stack.extend(children);
                } else {
                    branch.remove_subtree(pos, &mut |_, _| {});
                }
            }
            if branch.nodes.is_empty() {
                emptied_roots.push(cell);
            }
        });
        for cell in emptied_roots {
            self.roots.remove(cell);
        }
    }

    /// Number of stored values.
    pub fn value_count(&self) -> usize {
        let mut count = 0;
        self.roots.for_each(|_, branch| {
            count += branch.nodes.values().filter(|v| v.is_some()).count();
        });
        count
    }

    /// Number of existing nodes, with or without values.
    pub fn node_count(&self) -> usize {
        let mut count = 0;
        self.roots.for_each(|_, branch| count += branch.nodes.len());
        count
    }
}
