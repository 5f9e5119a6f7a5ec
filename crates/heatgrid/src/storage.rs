//! Field storage.
//!
//! A field is one contiguous row-major block of `size * size` values. Rows are plain slices into
//! that block, so row access is O(1) and an edge row can be handed to the transport without
//! gathering. Columns are strided and are copied out on demand.

use std::fmt;

use heatgrid_core::error::{HeatGridError, Result};

/// A square `size × size` scalar field owned by one worker.
#[derive(Clone, PartialEq)]
pub struct Field {
    size: usize,
    data: Box<[f32]>,
}

impl fmt::Debug for Field {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Field")
            .field("size", &self.size)
            .field("bytes", &self.size_bytes())
            .finish()
    }
}

impl Field {
    /// Allocate a zeroed field.
    ///
    /// Fails with [`HeatGridError::OutOfMemory`] if `size * size` overflows or the block cannot
    /// be reserved.
    pub fn zeroed(size: usize) -> Result<Self> {
        if size == 0 {
            return Err(HeatGridError::config("field size must be at least 1"));
        }

        let len = size.checked_mul(size).ok_or(HeatGridError::OutOfMemory {
            size: usize::MAX,
        })?;
        let bytes = len.saturating_mul(std::mem::size_of::<f32>());

        let mut data: Vec<f32> = Vec::new();
        data.try_reserve_exact(len)
            .map_err(|_| HeatGridError::OutOfMemory { size: bytes })?;
        data.resize(len, 0.0);

        Ok(Self {
            size,
            data: data.into_boxed_slice(),
        })
    }

    /// Build a field from rows. Every row must be `rows.len()` long.
    pub fn from_rows(rows: &[Vec<f32>]) -> Result<Self> {
        let mut field = Self::zeroed(rows.len())?;
        for (i, row) in rows.iter().enumerate() {
            if row.len() != field.size {
                return Err(HeatGridError::DimensionMismatch {
                    expected: field.size,
                    actual: row.len(),
                });
            }
            field.row_mut(i).copy_from_slice(row);
        }
        Ok(field)
    }

    /// Side length.
    #[inline]
    pub fn size(&self) -> usize {
        self.size
    }

    /// Size of the block in bytes.
    pub fn size_bytes(&self) -> usize {
        self.data.len() * std::mem::size_of::<f32>()
    }

    #[inline(always)]
    fn idx(&self, row: usize, col: usize) -> usize {
        debug_assert!(row < self.size && col < self.size);
        row * self.size + col
    }

    /// Value at `(row, col)`.
    #[inline]
    pub fn value_at(&self, row: usize, col: usize) -> f32 {
        self.data[self.idx(row, col)]
    }

    /// Set the value at `(row, col)`.
    #[inline]
    pub fn set(&mut self, row: usize, col: usize, value: f32) {
        let idx = self.idx(row, col);
        self.data[idx] = value;
    }

    /// Row `i` as a slice.
    #[inline]
    pub fn row(&self, i: usize) -> &[f32] {
        let start = i * self.size;
        &self.data[start..start + self.size]
    }

    /// Row `i` as a mutable slice.
    #[inline]
    pub fn row_mut(&mut self, i: usize) -> &mut [f32] {
        let start = i * self.size;
        &mut self.data[start..start + self.size]
    }

    /// Iterate rows top to bottom.
    pub fn rows(&self) -> std::slice::ChunksExact<'_, f32> {
        self.data.chunks_exact(self.size)
    }

    /// Copy of column `j`.
    pub fn column(&self, j: usize) -> Vec<f32> {
        (0..self.size).map(|i| self.value_at(i, j)).collect()
    }

    /// Overwrite column `j`.
    pub fn set_column(&mut self, j: usize, values: &[f32]) {
        for (i, &v) in values.iter().enumerate().take(self.size) {
            self.set(i, j, v);
        }
    }

    /// The whole block, row-major.
    pub fn as_slice(&self) -> &[f32] {
        &self.data
    }

    /// The whole block, row-major, mutable.
    pub fn as_mut_slice(&mut self) -> &mut [f32] {
        &mut self.data
    }

    /// Set every cell to `value`.
    pub fn fill(&mut self, value: f32) {
        self.data.fill(value);
    }

    /// Copy another field of the same size into this one.
    pub fn copy_from(&mut self, other: &Field) -> Result<()> {
        if other.size != self.size {
            return Err(HeatGridError::DimensionMismatch {
                expected: self.size,
                actual: other.size,
            });
        }
        self.data.copy_from_slice(&other.data);
        Ok(())
    }

    /// Copy out as nested rows.
    pub fn to_rows(&self) -> Vec<Vec<f32>> {
        self.rows().map(<[f32]>::to_vec).collect()
    }
}

/// Allocation seam for field buffers.
pub trait GridStorage: Send + Sync {
    /// Allocate a zeroed `size × size` field.
    fn allocate(&self, size: usize) -> Result<Field>;

    /// Release a field. Ownership moves in, so a field cannot be released twice.
    fn release(&self, field: Field);
}

impl<S: GridStorage + ?Sized> GridStorage for std::sync::Arc<S> {
    fn allocate(&self, size: usize) -> Result<Field> {
        (**self).allocate(size)
    }

    fn release(&self, field: Field) {
        (**self).release(field)
    }
}

/// Plain heap storage.
#[derive(Debug, Clone, Copy, Default)]
pub struct HeapStorage;

impl GridStorage for HeapStorage {
    fn allocate(&self, size: usize) -> Result<Field> {
        Field::zeroed(size)
    }

    fn release(&self, field: Field) {
        drop(field);
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_allocate_zeroed() {
        let field = HeapStorage.allocate(5).unwrap();
        assert_eq!(field.size(), 5);
        assert_eq!(field.as_slice().len(), 25);
        assert!(field.as_slice().iter().all(|&v| v == 0.0));
        assert_eq!(field.size_bytes(), 100);
    }

    #[test]
    fn test_zero_size_rejected() {
        assert!(matches!(
            Field::zeroed(0),
            Err(HeatGridError::InvalidConfig(_))
        ));
    }

    #[test]
    fn test_overflowing_size_is_out_of_memory() {
        let err = Field::zeroed(usize::MAX).unwrap_err();
        assert!(matches!(err, HeatGridError::OutOfMemory { .. }));
    }

    #[test]
    fn test_huge_allocation_is_out_of_memory() {
        // 2^31 squared f32 values is far beyond any address space we run on.
        let err = Field::zeroed(1 << 31).unwrap_err();
        assert!(matches!(err, HeatGridError::OutOfMemory { .. }));
    }

    #[test]
    fn test_write_read_back_then_release() {
        let storage = HeapStorage;
        let mut field = storage.allocate(4).unwrap();

        for i in 0..4 {
            for j in 0..4 {
                field.set(i, j, (i * 10 + j) as f32);
            }
        }
        for i in 0..4 {
            for j in 0..4 {
                assert_eq!(field.value_at(i, j), (i * 10 + j) as f32);
            }
        }
        assert_eq!(field.row(2), &[20.0, 21.0, 22.0, 23.0]);
        assert_eq!(field.column(3), vec![3.0, 13.0, 23.0, 33.0]);

        storage.release(field);
    }

    #[test]
    fn test_rows_are_contiguous() {
        let mut field = Field::zeroed(3).unwrap();
        field.row_mut(1).copy_from_slice(&[1.0, 2.0, 3.0]);
        assert_eq!(&field.as_slice()[3..6], &[1.0, 2.0, 3.0]);
        assert_eq!(field.rows().count(), 3);
    }

    #[test]
    fn test_set_column() {
        let mut field = Field::zeroed(3).unwrap();
        field.set_column(0, &[7.0, 8.0, 9.0]);
        assert_eq!(field.column(0), vec![7.0, 8.0, 9.0]);
        assert_eq!(field.row(0), &[7.0, 0.0, 0.0]);
    }

    #[test]
    fn test_from_rows_and_copy() {
        let rows = vec![vec![1.0, 2.0], vec![3.0, 4.0]];
        let field = Field::from_rows(&rows).unwrap();
        assert_eq!(field.to_rows(), rows);

        let mut other = Field::zeroed(2).unwrap();
        other.copy_from(&field).unwrap();
        assert_eq!(other, field);

        let mut wrong = Field::zeroed(3).unwrap();
        assert!(wrong.copy_from(&field).is_err());
        assert!(Field::from_rows(&[vec![1.0], vec![2.0, 3.0]]).is_err());
    }
}
