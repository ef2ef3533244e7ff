//! Square column buffers and rectangular views into them.

use crate::data::column::Column;

/// A square sub-region of a [`ColumnGrid`], described by index arithmetic over the shared buffer.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct GridView {
    pub offset: usize,
    pub stride: usize,
    pub width: u32,
}

impl GridView {
    /// Buffer index of (x, z) relative to the view.
    pub fn index(&self, x: u32, z: u32) -> usize {
        debug_assert!(x < self.width && z < self.width);
        self.offset + x as usize + z as usize * self.stride
    }

    /// View of the `width` square starting at (x, z) of this view.
    pub fn sub_view(&self, x: u32, z: u32, width: u32) -> GridView {
        debug_assert!(x + width <= self.width && z + width <= self.width);
        GridView {
            offset: self.index(x, z),
            stride: self.stride,
            width,
        }
    }

    /// The four quadrants in child-index order (bit 0 = x, bit 1 = z).
    pub fn quadrants(&self) -> [GridView; 4] {
        let half = self.width / 2;
        [
            self.sub_view(0, 0, half),
            self.sub_view(half, 0, half),
            self.sub_view(0, half, half),
            self.sub_view(half, half, half),
        ]
    }
}

/// Row-major `width x width` columns owned in one buffer.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct ColumnGrid {
    width: u32,
    columns: Vec<Column>,
}

impl ColumnGrid {
    pub fn new(width: u32) -> Self {
        Self {
            width,
            columns: vec![Column::empty(); (width * width) as usize],
        }
    }

    pub fn width(&self) -> u32 {
        self.width
    }

    pub fn full_view(&self) -> GridView {
        GridView {
            offset: 0,
            stride: self.width as usize,
            width: self.width,
        }
    }

    pub fn get(&self, x: u32, z: u32) -> &Column {
        &self.columns[(x + z * self.width) as usize]
    }

    pub fn get_mut(&mut self, x: u32, z: u32) -> &mut Column {
        &mut self.columns[(x + z * self.width) as usize]
    }

    pub fn get_in(&self, view: &GridView, x: u32, z: u32) -> &Column {
        &self.columns[view.index(x, z)]
    }

    pub fn get_in_mut(&mut self, view: &GridView, x: u32, z: u32) -> &mut Column {
        &mut self.columns[view.index(x, z)]
    }

    /// Columns of `view` in row-major order.
    pub fn view_columns<'a>(&'a self, view: &GridView) -> impl Iterator<Item = &'a Column> + 'a {
        let view = *view;
        (0..view.width).flat_map(move |z| (0..view.width).map(move |x| self.get_in(&view, x, z)))
    }

    /// Number of non-empty columns in `view`.
    pub fn count_present(&self, view: &GridView) -> usize {
        self.view_columns(view).filter(|c| !c.is_empty()).count()
    }

    pub fn columns(&self) -> &[Column] {
        &self.columns
    }

    pub fn columns_mut(&mut self) -> &mut [Column] {
        &mut self.columns
    }

    pub fn is_all_empty(&self) -> bool {
        self.columns.iter().all(Column::is_empty)
    }

    pub fn is_all_present(&self) -> bool {
        self.columns.iter().all(|c| !c.is_empty())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::data::column::{DataPoint, GenerationStep};

    fn marked(id: u32) -> Column {
        Column::new(GenerationStep::Surface, vec![DataPoint::new(id, 1, 0, 0, 0)])
    }

    #[test]
    fn test_views_alias_the_same_buffer() {
        let mut grid = ColumnGrid::new(8);
        let quads = grid.full_view().quadrants();
        *grid.get_in_mut(&quads[3], 1, 2) = marked(42);

        assert_eq!(grid.get(5, 6).points[0].id(), 42);
        let inner = quads[3].sub_view(0, 2, 2);
        assert_eq!(grid.get_in(&inner, 1, 0).points[0].id(), 42);
        assert_eq!(grid.count_present(&quads[3]), 1);
        assert_eq!(grid.count_present(&quads[0]), 0);
    }

    #[test]
    fn test_view_iteration_order() {
        let mut grid = ColumnGrid::new(4);
        for z in 0..4 {
            for x in 0..4 {
                *grid.get_mut(x, z) = marked(x + z * 4);
            }
        }
        let view = grid.full_view().sub_view(2, 2, 2);
        let ids: Vec<u32> = grid.view_columns(&view).map(|c| c.points[0].id()).collect();
        assert_eq!(ids, vec![10, 11, 14, 15]);
        assert!(grid.is_all_present());
    }
}
