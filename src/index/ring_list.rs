//! Movable grid ring list - a fixed-size square window of cells around a movable center.
//!
//! Cells are stored in a flat buffer addressed by `pos.rem_euclid(width)`, so recentering never moves
//! storage: only the minimum corner changes, and cells that fall out of the window are evicted.

use std::sync::atomic::{AtomicI32, Ordering};

use glam::IVec2;
use parking_lot::RwLock;

use crate::core::error::Error;
use crate::core::types::Result;

struct RingState<T> {
    /// Authoritative minimum corner
    min: IVec2,
    cells: Vec<Option<T>>,
}

/// Square sliding-window container keyed by integer grid positions.
///
/// All operations take `&self`; a read/write lock guards the cells. The minimum corner is mirrored
/// into atomics so out-of-window lookups can be rejected without taking the lock, but every access
/// re-checks under the lock because the window may move in between.
pub struct MovableGridRingList<T> {
    width: i32,
    min_x: AtomicI32,
    min_y: AtomicI32,
    state: RwLock<RingState<T>>,
    /// Offsets from the center, sorted by squared distance
    nearest_offsets: Vec<IVec2>,
}

impl<T> MovableGridRingList<T> {
    /// Create an empty window of `width × width` cells centered on `center`.
    ///
    /// The center cell sits at `min + width / 2`, so odd widths are symmetric.
    pub fn new(width: u32, center: IVec2) -> Self {
        assert!(width > 0, "ring list width must be positive");
        let width = width as i32;
        let min = center - IVec2::splat(width / 2);

        let mut cells = Vec::with_capacity((width * width) as usize);
        cells.resize_with((width * width) as usize, || None);

        let half = width / 2;
        let mut nearest_offsets: Vec<IVec2> = (0..width)
            .flat_map(|y| (0..width).map(move |x| IVec2::new(x - half, y - half)))
            .collect();
        // Stable sort keeps row-major order among equal distances.
        nearest_offsets.sort_by_key(|o| o.length_squared());

        Self {
            width,
            min_x: AtomicI32::new(min.x),
            min_y: AtomicI32::new(min.y),
            state: RwLock::new(RingState { min, cells }),
            nearest_offsets,
        }
    }

    pub fn width(&self) -> u32 {
        self.width as u32
    }

    /// Current minimum corner.
    pub fn min_pos(&self) -> IVec2 {
        self.state.read().min
    }

    pub fn center(&self) -> IVec2 {
        self.min_pos() + IVec2::splat(self.width / 2)
    }

    /// Whether `pos` is inside the current window.
    pub fn in_range(&self, pos: IVec2) -> bool {
        self.in_window(self.state.read().min, pos)
    }

    fn in_window(&self, min: IVec2, pos: IVec2) -> bool {
        pos.x >= min.x && pos.y >= min.y && pos.x < min.x + self.width && pos.y < min.y + self.width
    }

    /// Lock-free pre-check against the mirrored corner. May be stale; callers re-check under the lock.
    fn maybe_in_range(&self, pos: IVec2) -> bool {
        let min = IVec2::new(self.min_x.load(Ordering::Acquire), self.min_y.load(Ordering::Acquire));
        self.in_window(min, pos)
    }

    fn index(&self, pos: IVec2) -> usize {
        let x = pos.x.rem_euclid(self.width);
        let y = pos.y.rem_euclid(self.width);
        (x + y * self.width) as usize
    }

    fn out_of_range(&self, pos: IVec2, min: IVec2) -> Error {
        Error::OutOfBounds(format!(
            "grid position ({}, {}) outside ring window [{}, {})x[{}, {})",
            pos.x,
            pos.y,
            min.x,
            min.x + self.width,
            min.y,
            min.y + self.width
        ))
    }

    /// Clone the value at `pos`. Out-of-window positions read as `None`.
    pub fn get(&self, pos: IVec2) -> Option<T>
    where
        T: Clone,
    {
        self.with(pos, |slot| slot.cloned())
    }

    /// Borrow the cell at `pos` under the read lock. Out-of-window positions see `None`.
    pub fn with<R>(&self, pos: IVec2, f: impl FnOnce(Option<&T>) -> R) -> R {
        if !self.maybe_in_range(pos) {
            return f(None);
        }
        let state = self.state.read();
        if !self.in_window(state.min, pos) {
            return f(None);
        }
        f(state.cells[self.index(pos)].as_ref())
    }

    /// Mutably borrow the cell at `pos` under the write lock.
    pub fn with_mut<R>(&self, pos: IVec2, f: impl FnOnce(&mut Option<T>) -> R) -> Result<R> {
        if !self.maybe_in_range(pos) {
            return Err(self.out_of_range(pos, self.min_pos()));
        }
        let mut state = self.state.write();
        if !self.in_window(state.min, pos) {
            return Err(self.out_of_range(pos, state.min));
        }
        let index = self.index(pos);
        Ok(f(&mut state.cells[index]))
    }

    /// Store `value` at `pos`, returning the previous value.
    pub fn set(&self, pos: IVec2, value: T) -> Result<Option<T>> {
        self.swap(pos, Some(value))
    }

    /// Replace the cell at `pos` with `value` (which may be `None`), returning the previous value.
    pub fn swap(&self, pos: IVec2, value: Option<T>) -> Result<Option<T>> {
        self.with_mut(pos, |slot| std::mem::replace(slot, value))
    }

    /// Take the value at `pos`. Out-of-window positions yield `None`.
    pub fn remove(&self, pos: IVec2) -> Option<T> {
        self.with_mut(pos, Option::take).ok().flatten()
    }

    /// Number of occupied cells.
    pub fn len(&self) -> usize {
        self.state.read().cells.iter().filter(|c| c.is_some()).count()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Recenter the window on `new_center`.
    ///
    /// Every value whose position leaves the window is passed exactly once to `on_evict`. When the
    /// shift on either axis is at least the window width nothing survives, so everything is evicted.
    pub fn move_to(&self, new_center: IVec2, mut on_evict: impl FnMut(IVec2, T)) {
        let mut state = self.state.write();
        let new_min = new_center - IVec2::splat(self.width / 2);
        let old_min = state.min;
        if new_min == old_min {
            return;
        }

        let shift = (new_min - old_min).abs();
        for y in 0..self.width {
            for x in 0..self.width {
                let pos = old_min + IVec2::new(x, y);
                let keep = shift.x < self.width
                    && shift.y < self.width
                    && self.in_window(new_min, pos);
                if !keep {
                    let index = self.index(pos);
                    if let Some(value) = state.cells[index].take() {
                        on_evict(pos, value);
                    }
                }
            }
        }

        state.min = new_min;
        self.min_x.store(new_min.x, Ordering::Release);
        self.min_y.store(new_min.y, Ordering::Release);
    }

    /// Evict everything, keeping the window where it is.
    pub fn clear(&self, mut on_evict: impl FnMut(IVec2, T)) {
        let mut state = self.state.write();
        let min = state.min;
        for y in 0..self.width {
            for x in 0..self.width {
                let pos = min + IVec2::new(x, y);
                let index = self.index(pos);
                if let Some(value) = state.cells[index].take() {
                    on_evict(pos, value);
                }
            }
        }
    }

    /// Visit occupied cells in storage order.
    pub fn for_each(&self, mut f: impl FnMut(IVec2, &T)) {
        let state = self.state.read();
        for y in 0..self.width {
            for x in 0..self.width {
                let pos = state.min + IVec2::new(x, y);
                if let Some(value) = &state.cells[self.index(pos)] {
                    f(pos, value);
                }
            }
        }
    }

    /// Visit occupied cells mutably in storage order.
    pub fn for_each_mut(&self, mut f: impl FnMut(IVec2, &mut Option<T>)) {
        let mut state = self.state.write();
        let min = state.min;
        for y in 0..self.width {
            for x in 0..self.width {
                let pos = min + IVec2::new(x, y);
                let index = self.index(pos);
                if state.cells[index].is_some() {
                    f(pos, &mut state.cells[index]);
                }
            }
        }
    }

    /// Visit occupied cells, nearest to the center first.
    pub fn for_each_nearest_first(&self, mut f: impl FnMut(IVec2, &T)) {
        let state = self.state.read();
        let center = state.min + IVec2::splat(self.width / 2);
        for offset in &self.nearest_offsets {
            let pos = center + *offset;
            if let Some(value) = &state.cells[self.index(pos)] {
                f(pos, value);
            }
        }
    }

    /// All window positions (occupied or not), nearest to the center first.
    pub fn positions_nearest_first(&self) -> Vec<IVec2> {
        let center = self.center();
        self.nearest_offsets.iter().map(|o| center + *o).collect()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::HashMap;
    use std::sync::Arc;

    fn filled(width: u32, center: IVec2) -> MovableGridRingList<(i32, i32)> {
        let list = MovableGridRingList::new(width, center);
        let min = list.min_pos();
        for y in 0..width as i32 {
            for x in 0..width as i32 {
                let p = min + IVec2::new(x, y);
                list.set(p, (p.x, p.y)).unwrap();
            }
        }
        list
    }

    #[test]
    fn test_get_set_swap() {
        let list = MovableGridRingList::new(5, IVec2::ZERO);
        assert_eq!(list.min_pos(), IVec2::new(-2, -2));
        assert_eq!(list.set(IVec2::new(1, -2), 7).unwrap(), None);
        assert_eq!(list.get(IVec2::new(1, -2)), Some(7));
        assert_eq!(list.swap(IVec2::new(1, -2), Some(8)).unwrap(), Some(7));
        assert_eq!(list.remove(IVec2::new(1, -2)), Some(8));
        assert!(list.is_empty());
    }

    #[test]
    fn test_out_of_window_rejected() {
        let list = MovableGridRingList::new(3, IVec2::ZERO);
        assert!(matches!(list.set(IVec2::new(2, 0), 1), Err(Error::OutOfBounds(_))));
        // Aliased slot of (2, 0) is (-1, 0); it must stay untouched.
        assert_eq!(list.get(IVec2::new(-1, 0)), None);
        assert_eq!(list.get(IVec2::new(2, 0)), None);
    }

    #[test]
    fn test_small_move_keeps_overlap_and_evicts_rest_once() {
        let width = 5;
        let list = filled(width, IVec2::ZERO);
        let before: HashMap<IVec2, (i32, i32)> = {
            let mut m = HashMap::new();
            list.for_each(|p, v| {
                m.insert(p, *v);
            });
            m
        };

        let mut evicted = Vec::new();
        list.move_to(IVec2::new(2, -1), |p, v| evicted.push((p, v)));

        for (pos, value) in &before {
            if list.in_range(*pos) {
                assert_eq!(list.get(*pos), Some(*value), "kept cell changed at {:?}", pos);
            } else {
                assert_eq!(evicted.iter().filter(|(p, _)| p == pos).count(), 1);
                assert_eq!(list.get(*pos), None);
            }
        }
        // Newly exposed cells start empty.
        assert_eq!(list.get(IVec2::new(4, 0)), None);
        assert_eq!(evicted.len() + list.len(), before.len());
        for (p, v) in evicted {
            assert_eq!((p.x, p.y), v);
        }
    }

    #[test]
    fn test_large_move_clears_everything() {
        let list = filled(3, IVec2::ZERO);
        let mut count = 0;
        list.move_to(IVec2::new(0, 3), |_, _| count += 1);
        assert_eq!(count, 9);
        assert!(list.is_empty());
        assert_eq!(list.center(), IVec2::new(0, 3));
    }

    #[test]
    fn test_nearest_first_order() {
        let list = filled(5, IVec2::new(10, 10));
        let mut order = Vec::new();
        list.for_each_nearest_first(|p, _| order.push(p));
        assert_eq!(order.len(), 25);
        assert_eq!(order[0], IVec2::new(10, 10));
        let dists: Vec<i32> = order.iter().map(|p| (*p - IVec2::new(10, 10)).length_squared()).collect();
        assert!(dists.windows(2).all(|w| w[0] <= w[1]));
    }

    #[test]
    fn test_concurrent_readers_and_mover() {
        let list = Arc::new(filled(9, IVec2::ZERO));
        let mover = {
            let list = list.clone();
            std::thread::spawn(move || {
                for step in 0..50 {
                    list.move_to(IVec2::new(step % 4, step % 3), |_, _| {});
                }
            })
        };
        let reader = {
            let list = list.clone();
            std::thread::spawn(move || {
                for i in 0..2000 {
                    let p = IVec2::new(i % 13 - 6, i % 11 - 5);
                    // Whatever survives a move keeps its original value.
                    if let Some(v) = list.get(p) {
                        assert_eq!(v, (p.x, p.y));
                    }
                }
            })
        };
        mover.join().unwrap();
        reader.join().unwrap();
    }
}
