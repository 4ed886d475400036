/// A square, bounds-checked 2D sample grid over a flat backing buffer.
///
/// Tiles index their elevation samples through this, and the coverage
/// buffers reuse it for their mask/signal bytes. The first index runs
/// along latitude (row 0 at the tile's south edge), the second along
/// longitude (column 0 at the tile's eastern edge, since longitudes are
/// west-positive), row-major.
#[derive(Debug, Clone, PartialEq)]
pub struct Grid<T> {
    size: usize,
    cells: Vec<T>,
}

impl<T: Copy> Grid<T> {
    pub fn filled(size: usize, value: T) -> Self {
        Self {
            size,
            cells: vec![value; size * size],
        }
    }

    /// Wraps an existing buffer. Returns `None` if the length is not `size²`.
    pub fn from_vec(size: usize, cells: Vec<T>) -> Option<Self> {
        if cells.len() != size * size {
            return None;
        }
        Some(Self { size, cells })
    }

    pub fn size(&self) -> usize {
        self.size
    }

    pub fn get(&self, x: usize, y: usize) -> Option<T> {
        if x >= self.size || y >= self.size {
            return None;
        }
        Some(self.cells[x * self.size + y])
    }

    /// Stores `value` at (x, y). Returns false if out of bounds.
    pub fn set(&mut self, x: usize, y: usize, value: T) -> bool {
        if x >= self.size || y >= self.size {
            return false;
        }
        self.cells[x * self.size + y] = value;
        true
    }

    /// Applies `f` to the cell at (x, y). Returns false if out of bounds.
    pub fn update(&mut self, x: usize, y: usize, f: impl FnOnce(T) -> T) -> bool {
        if x >= self.size || y >= self.size {
            return false;
        }
        let idx = x * self.size + y;
        self.cells[idx] = f(self.cells[idx]);
        true
    }

    pub fn as_slice(&self) -> &[T] {
        &self.cells
    }

    pub(crate) fn as_mut_slice(&mut self) -> &mut [T] {
        &mut self.cells
    }
}

#[cfg(test)]
mod tests {
    use super::Grid;

    #[test]
    fn out_of_bounds_is_rejected() {
        let mut g = Grid::filled(4, 0u8);
        assert_eq!(g.get(3, 3), Some(0));
        assert_eq!(g.get(4, 0), None);
        assert!(!g.set(0, 4, 1));
        assert!(g.set(1, 2, 7));
        assert_eq!(g.get(1, 2), Some(7));
    }

    #[test]
    fn from_vec_checks_length() {
        assert!(Grid::from_vec(3, vec![0i16; 9]).is_some());
        assert!(Grid::from_vec(3, vec![0i16; 8]).is_none());
    }
}
