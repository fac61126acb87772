//! Flat row-major tensors for the coefficient arrays.
//!
//! The table stores its coefficient arrays as nested sequences of up to seven
//! levels. Here they live in one contiguous buffer with explicit extents;
//! on-disk order is row-major (last index fastest), which is exactly the
//! buffer order.
//!
//! [`BinTensor`] covers arrays whose inner extents depend on the observable
//! bin (the x-index extent of `SigmaTilde`): one rectangular block per bin,
//! all blocks packed back to back.

use crate::error::{Result, TableError};
use crate::text::{Scalar, TextBuffer, TextWriter};

/// Highest tensor rank used by the table format.
pub const MAX_RANK: usize = 7;

/// Validated tensor extents with precomputed row-major strides.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Shape {
    dims: Vec<usize>,
    strides: Vec<usize>,
}

impl Shape {
    /// Build a shape from signed extents as read from a table.
    ///
    /// Every extent must be strictly positive: an empty leading dimension
    /// means a corrupt or unsupported table, never an empty tensor.
    pub fn new(field: &'static str, extents: &[i64]) -> Result<Self> {
        if extents.is_empty() || extents.len() > MAX_RANK {
            return Err(TableError::InvalidDimension {
                field,
                index: extents.len(),
                value: extents.len() as i64,
            });
        }
        let mut dims = Vec::with_capacity(extents.len());
        for (index, &value) in extents.iter().enumerate() {
            if value <= 0 {
                log::error!("cannot size {}: extent {} is {}", field, index, value);
                return Err(TableError::InvalidDimension { field, index, value });
            }
            dims.push(value as usize);
        }
        let mut strides = vec![1usize; dims.len()];
        for k in (0..dims.len() - 1).rev() {
            strides[k] = strides[k + 1].checked_mul(dims[k + 1]).ok_or_else(|| {
                TableError::ShapeMismatch(format!("{field}: extents {dims:?} overflow"))
            })?;
        }
        strides[0].checked_mul(dims[0]).ok_or_else(|| {
            TableError::ShapeMismatch(format!("{field}: extents {dims:?} overflow"))
        })?;
        Ok(Self { dims, strides })
    }

    /// Build a shape from unsigned extents.
    pub fn from_dims(field: &'static str, dims: &[usize]) -> Result<Self> {
        let extents: Vec<i64> = dims.iter().map(|&d| d.min(i64::MAX as usize) as i64).collect();
        Self::new(field, &extents)
    }

    /// Number of dimensions.
    #[inline]
    pub fn rank(&self) -> usize {
        self.dims.len()
    }

    /// Extents.
    #[inline]
    pub fn dims(&self) -> &[usize] {
        &self.dims
    }

    /// Total number of elements.
    #[inline]
    pub fn len(&self) -> usize {
        self.dims[0] * self.strides[0]
    }

    /// Always `false`: shapes have strictly positive extents.
    #[inline]
    pub fn is_empty(&self) -> bool {
        false
    }

    /// Flat offset of a multi-index, or `None` if out of range.
    pub fn offset(&self, index: &[usize]) -> Option<usize> {
        if index.len() != self.dims.len() {
            return None;
        }
        let mut off = 0;
        for ((&i, &d), &s) in index.iter().zip(&self.dims).zip(&self.strides) {
            if i >= d {
                return None;
            }
            off += i * s;
        }
        Some(off)
    }

    /// Multi-index of a flat offset.
    pub fn unravel(&self, mut offset: usize) -> Option<Vec<usize>> {
        if offset >= self.len() {
            return None;
        }
        let mut index = Vec::with_capacity(self.dims.len());
        for &s in &self.strides {
            index.push(offset / s);
            offset %= s;
        }
        Some(index)
    }
}

/// Read-only view of one rectangular block.
#[derive(Debug, Clone, Copy)]
pub struct TensorView<'a, T> {
    shape: &'a Shape,
    data: &'a [T],
}

impl<'a, T: Copy> TensorView<'a, T> {
    /// Shape of the block.
    pub fn shape(&self) -> &'a Shape {
        self.shape
    }

    /// Element at `index`.
    pub fn get(&self, index: &[usize]) -> Option<T> {
        self.shape.offset(index).map(|o| self.data[o])
    }

    /// Flat row-major data.
    pub fn as_slice(&self) -> &'a [T] {
        self.data
    }
}

/// A rectangular tensor in one flat buffer.
#[derive(Debug, Clone, PartialEq)]
pub struct Tensor<T> {
    shape: Shape,
    data: Vec<T>,
}

impl<T: Scalar> Tensor<T> {
    /// Zero-filled tensor of the given shape.
    pub fn zeros(shape: Shape) -> Self {
        let data = vec![T::default(); shape.len()];
        Self { shape, data }
    }

    /// Shape of the tensor.
    pub fn shape(&self) -> &Shape {
        &self.shape
    }

    /// Element at `index`.
    pub fn get(&self, index: &[usize]) -> Option<T> {
        self.shape.offset(index).map(|o| self.data[o])
    }

    /// Mutable element at `index`.
    pub fn get_mut(&mut self, index: &[usize]) -> Option<&mut T> {
        let o = self.shape.offset(index)?;
        Some(&mut self.data[o])
    }

    /// Flat row-major data.
    pub fn as_slice(&self) -> &[T] {
        &self.data
    }

    /// Mutable flat row-major data.
    pub fn as_mut_slice(&mut self) -> &mut [T] {
        &mut self.data
    }

    /// View of the whole tensor.
    pub fn view(&self) -> TensorView<'_, T> {
        TensorView { shape: &self.shape, data: &self.data }
    }

    /// Contiguous data of leading index `i`.
    pub fn outer(&self, i: usize) -> Option<&[T]> {
        let n = self.shape.strides[0];
        self.data.get(i * n..(i + 1) * n)
    }

    /// Drop leading index `i`; the leading extent must stay positive.
    pub fn remove_outer(&mut self, field: &'static str, i: usize) -> Result<()> {
        let n = self.shape.dims[0];
        if i >= n || n == 1 {
            return Err(TableError::ShapeMismatch(format!(
                "{field}: cannot remove index {i} of leading extent {n}"
            )));
        }
        let mut dims = self.shape.dims.clone();
        dims[0] -= 1;
        let shape = Shape::from_dims(field, &dims)?;
        let s = self.shape.strides[0];
        self.data.drain(i * s..(i + 1) * s);
        self.shape = shape;
        Ok(())
    }

    /// Append one leading index holding `block`.
    pub fn push_outer(&mut self, field: &'static str, block: &[T]) -> Result<()> {
        let s = self.shape.strides[0];
        if block.len() != s {
            return Err(TableError::ShapeMismatch(format!(
                "{field}: block of {} values, expected {s}",
                block.len()
            )));
        }
        let mut dims = self.shape.dims.clone();
        dims[0] += 1;
        self.shape = Shape::from_dims(field, &dims)?;
        self.data.extend_from_slice(block);
        Ok(())
    }

    /// Size a tensor from table extents and fill it from the stream.
    ///
    /// Returns the tensor and the number of tokens consumed.
    pub fn read(
        r: &mut TextBuffer,
        field: &'static str,
        extents: &[i64],
        scale: f64,
    ) -> Result<(Self, usize)> {
        let shape = Shape::new(field, extents)?;
        r.ensure_tokens(shape.len(), field)?;
        let mut t = Self::zeros(shape);
        let n = crate::codec::read_fixed(r, &mut t.data, scale, field)?;
        Ok((t, n))
    }

    /// Write all elements in row-major order.
    pub fn write(&self, w: &mut TextWriter) {
        crate::codec::write_fixed(w, &self.data);
    }
}

/// Per-bin rectangular blocks packed into one buffer.
#[derive(Debug, Clone, PartialEq)]
pub struct BinTensor<T> {
    shapes: Vec<Shape>,
    offsets: Vec<usize>,
    data: Vec<T>,
}

impl<T: Scalar> BinTensor<T> {
    /// Zero-filled storage for the given per-bin shapes.
    pub fn zeros(shapes: Vec<Shape>) -> Self {
        let mut offsets = Vec::with_capacity(shapes.len() + 1);
        let mut total = 0usize;
        offsets.push(0);
        for s in &shapes {
            total += s.len();
            offsets.push(total);
        }
        Self { shapes, offsets, data: vec![T::default(); total] }
    }

    /// Size from per-bin table extents and fill from the stream.
    pub fn read(
        r: &mut TextBuffer,
        field: &'static str,
        extents: &[Vec<i64>],
        scale: f64,
    ) -> Result<(Self, usize)> {
        if extents.is_empty() {
            return Err(TableError::InvalidDimension { field, index: 0, value: 0 });
        }
        let shapes =
            extents.iter().map(|e| Shape::new(field, e)).collect::<Result<Vec<Shape>>>()?;
        let total = shapes.iter().fold(0usize, |acc, s| acc.saturating_add(s.len()));
        r.ensure_tokens(total, field)?;
        let mut t = Self::zeros(shapes);
        let n = crate::codec::read_fixed(r, &mut t.data, scale, field)?;
        Ok((t, n))
    }

    /// Number of bins.
    pub fn n_bins(&self) -> usize {
        self.shapes.len()
    }

    /// Shapes of all bins.
    pub fn shapes(&self) -> &[Shape] {
        &self.shapes
    }

    /// View of one bin's block.
    pub fn bin(&self, bin: usize) -> Option<TensorView<'_, T>> {
        let shape = self.shapes.get(bin)?;
        Some(TensorView { shape, data: &self.data[self.offsets[bin]..self.offsets[bin + 1]] })
    }

    /// Mutable flat data of one bin's block.
    pub fn bin_mut(&mut self, bin: usize) -> Option<&mut [T]> {
        if bin >= self.shapes.len() {
            return None;
        }
        Some(&mut self.data[self.offsets[bin]..self.offsets[bin + 1]])
    }

    /// Remove one bin's block; at least one bin must remain.
    pub fn remove_bin(&mut self, field: &'static str, bin: usize) -> Result<()> {
        let n = self.shapes.len();
        if bin >= n || n == 1 {
            return Err(TableError::ShapeMismatch(format!("{field}: cannot remove bin {bin} of {n}")));
        }
        let (start, end) = (self.offsets[bin], self.offsets[bin + 1]);
        self.data.drain(start..end);
        self.shapes.remove(bin);
        self.offsets.remove(bin + 1);
        for o in &mut self.offsets[bin + 1..] {
            *o -= end - start;
        }
        Ok(())
    }

    /// Append a bin with the given shape and data.
    pub fn push_bin(&mut self, field: &'static str, shape: Shape, block: &[T]) -> Result<()> {
        if block.len() != shape.len() {
            return Err(TableError::ShapeMismatch(format!(
                "{field}: block of {} values for extents {:?}",
                block.len(),
                shape.dims()
            )));
        }
        self.data.extend_from_slice(block);
        self.offsets.push(self.data.len());
        self.shapes.push(shape);
        Ok(())
    }

    /// Element at `index` within `bin`.
    pub fn get(&self, bin: usize, index: &[usize]) -> Option<T> {
        self.bin(bin)?.get(index)
    }

    /// Mutable element at `index` within `bin`.
    pub fn get_mut(&mut self, bin: usize, index: &[usize]) -> Option<&mut T> {
        let off = self.shapes.get(bin)?.offset(index)?;
        Some(&mut self.data[self.offsets[bin] + off])
    }

    /// Flat data of all bins.
    pub fn as_slice(&self) -> &[T] {
        &self.data
    }

    /// Mutable flat data of all bins.
    pub fn as_mut_slice(&mut self) -> &mut [T] {
        &mut self.data
    }

    /// Write all bins in order.
    pub fn write(&self, w: &mut TextWriter) {
        crate::codec::write_fixed(w, &self.data);
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn shape_rejects_non_positive_extents() {
        assert!(matches!(
            Shape::new("ScaleNode", &[3, 1, 0, 4]),
            Err(TableError::InvalidDimension { index: 2, value: 0, .. })
        ));
        assert!(Shape::new("x", &[-1]).is_err());
        assert!(Shape::new("x", &[]).is_err());
        assert!(Shape::new("x", &[1; 8]).is_err());
        assert!(Shape::new("x", &[1; 7]).is_ok());
    }

    #[test]
    fn row_major_offsets() {
        let s = Shape::new("t", &[2, 3, 4]).unwrap();
        assert_eq!(s.len(), 24);
        assert_eq!(s.offset(&[0, 0, 1]), Some(1));
        assert_eq!(s.offset(&[0, 1, 0]), Some(4));
        assert_eq!(s.offset(&[1, 0, 0]), Some(12));
        assert_eq!(s.offset(&[1, 2, 3]), Some(23));
        assert_eq!(s.offset(&[2, 0, 0]), None);
        assert_eq!(s.unravel(23), Some(vec![1, 2, 3]));
        assert_eq!(s.unravel(24), None);
    }

    #[test]
    fn tensor_reads_last_index_fastest() {
        let mut r = TextBuffer::new(b"1 2 3\n4 5 6\n");
        let (t, n) = Tensor::<f64>::read(&mut r, "t", &[2, 3], 1.0).unwrap();
        assert_eq!(n, 6);
        assert_eq!(t.get(&[0, 2]), Some(3.0));
        assert_eq!(t.get(&[1, 0]), Some(4.0));
    }

    #[test]
    fn bin_tensor_blocks_have_independent_extents() {
        let mut r = TextBuffer::new(b"1 2 3 4 5 6 7 8 9 10");
        let extents = vec![vec![1, 2], vec![2, 4]];
        let (t, n) = BinTensor::<f64>::read(&mut r, "SigmaTilde", &extents, 2.0).unwrap();
        assert_eq!(n, 10);
        assert_eq!(t.n_bins(), 2);
        assert_eq!(t.get(0, &[0, 1]), Some(4.0));
        assert_eq!(t.get(1, &[0, 0]), Some(6.0));
        assert_eq!(t.get(1, &[1, 3]), Some(20.0));
        assert_eq!(t.bin(1).unwrap().as_slice().len(), 8);
        assert!(t.bin(2).is_none());
    }

    #[test]
    fn leading_index_can_be_removed_and_appended() {
        let mut r = TextBuffer::new(b"1 2 3 4 5 6");
        let (mut t, _) = Tensor::<f64>::read(&mut r, "ScaleNode", &[3, 1, 2], 1.0).unwrap();
        assert_eq!(t.outer(1), Some(&[3.0, 4.0][..]));
        t.remove_outer("ScaleNode", 1).unwrap();
        assert_eq!(t.shape().dims(), &[2, 1, 2]);
        assert_eq!(t.as_slice(), &[1.0, 2.0, 5.0, 6.0]);
        assert!(t.push_outer("ScaleNode", &[7.0]).is_err());
        t.push_outer("ScaleNode", &[7.0, 8.0]).unwrap();
        assert_eq!(t.get(&[2, 0, 1]), Some(8.0));

        let (mut single, _) =
            Tensor::<f64>::read(&mut TextBuffer::new(b"1"), "ScaleNode", &[1], 1.0).unwrap();
        assert!(single.remove_outer("ScaleNode", 0).is_err());
    }

    #[test]
    fn bins_can_be_removed_and_appended() {
        let mut r = TextBuffer::new(b"1 2 3 4 5 6 7 8 9 10");
        let extents = vec![vec![1, 2], vec![2, 4]];
        let (mut t, _) = BinTensor::<f64>::read(&mut r, "SigmaTilde", &extents, 1.0).unwrap();
        t.remove_bin("SigmaTilde", 0).unwrap();
        assert_eq!(t.n_bins(), 1);
        assert_eq!(t.get(0, &[1, 3]), Some(10.0));
        assert!(t.remove_bin("SigmaTilde", 0).is_err());

        let shape = Shape::new("SigmaTilde", &[1, 2]).unwrap();
        assert!(t.push_bin("SigmaTilde", shape.clone(), &[1.0]).is_err());
        t.push_bin("SigmaTilde", shape, &[11.0, 12.0]).unwrap();
        assert_eq!(t.bin(1).unwrap().as_slice(), &[11.0, 12.0]);
        assert_eq!(t.as_slice().len(), 10);
    }

    #[test]
    fn oversized_extents_fail_before_allocation() {
        let mut r = TextBuffer::new(b"1 2 3");
        let err = Tensor::<f64>::read(&mut r, "ScaleNode", &[1000, 1000, 1000], 1.0).unwrap_err();
        assert!(matches!(err, TableError::TruncatedStream { field: "ScaleNode", .. }));
    }
}
