//! Jagged nested sequences with offsets per nesting level.
//!
//! Flexible vectors nest up to [`MAX_RANK`](crate::tensor::MAX_RANK) levels
//! and every level may carry its own length. Values are kept in one flat
//! buffer; `offsets[k]` holds the start of every level-`k` item in level
//! `k + 1` (or in the value buffer for the innermost level), plus one
//! trailing end offset. Depth 1 is a plain sequence with no offsets.

use crate::error::{Result, TableError};
use crate::tensor::MAX_RANK;
use crate::text::Scalar;

/// A jagged sequence of nesting depth `offsets.len() + 1`.
#[derive(Debug, Clone, PartialEq)]
pub struct Jagged<T> {
    values: Vec<T>,
    offsets: Vec<Vec<usize>>,
}

impl<T: Scalar> Jagged<T> {
    /// Empty sequence of the given depth (clamped to `1..=MAX_RANK`).
    pub fn empty(depth: usize) -> Self {
        let depth = depth.clamp(1, MAX_RANK);
        Self { values: Vec::new(), offsets: vec![vec![0]; depth - 1] }
    }

    /// Depth-2 sequence from explicit rows.
    pub fn from_rows<R: AsRef<[T]>>(rows: &[R]) -> Self {
        let mut out = Self::empty(2);
        for row in rows {
            out.push_row(row.as_ref());
        }
        out
    }

    /// Append one row to a depth-2 sequence.
    pub fn push_row(&mut self, row: &[T]) {
        debug_assert_eq!(self.depth(), 2);
        self.values.extend_from_slice(row);
        self.offsets[0].push(self.values.len());
    }

    /// Remove top-level row `index` of a depth-2 sequence.
    pub fn remove_row(&mut self, index: usize) -> Option<Vec<T>> {
        debug_assert_eq!(self.depth(), 2);
        let range = self.leaf_range(0, index)?;
        let n = range.len();
        let removed = self.values.drain(range).collect();
        let offsets = &mut self.offsets[0];
        offsets.remove(index + 1);
        for o in &mut offsets[index + 1..] {
            *o -= n;
        }
        Some(removed)
    }

    /// Remove element `column` from every row of a depth-2 sequence.
    ///
    /// Fails without modifying anything unless every row is long enough.
    pub fn remove_column(&mut self, column: usize, field: &str) -> Result<()> {
        let lengths = self.lengths(0);
        if let Some(row) = lengths.iter().position(|&n| column >= n) {
            return Err(TableError::ShapeMismatch(format!(
                "{field}: row {row} has {} entries, cannot remove entry {column}",
                lengths[row]
            )));
        }
        let rows: Vec<Vec<T>> = self
            .rows()
            .map(|r| r.iter().enumerate().filter(|&(i, _)| i != column).map(|(_, &v)| v).collect())
            .collect();
        *self = Self::from_rows(&rows);
        Ok(())
    }

    /// Append one element to every row of a depth-2 sequence.
    pub fn push_column(&mut self, column: &[T], field: &str) -> Result<()> {
        if column.len() != self.len() {
            return Err(TableError::ShapeMismatch(format!(
                "{field}: {} rows, got {} new entries",
                self.len(),
                column.len()
            )));
        }
        let rows: Vec<Vec<T>> = self
            .rows()
            .zip(column)
            .map(|(r, &v)| r.iter().copied().chain(std::iter::once(v)).collect())
            .collect();
        *self = Self::from_rows(&rows);
        Ok(())
    }

    /// Nesting depth.
    #[inline]
    pub fn depth(&self) -> usize {
        self.offsets.len() + 1
    }

    /// Number of top-level items.
    pub fn len(&self) -> usize {
        match self.offsets.first() {
            Some(o) => o.len() - 1,
            None => self.values.len(),
        }
    }

    /// Whether there are no top-level items.
    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// All leaf values in on-disk order.
    pub fn values(&self) -> &[T] {
        &self.values
    }

    /// Mutable leaf values; the nesting structure cannot change.
    pub fn values_mut(&mut self) -> &mut [T] {
        &mut self.values
    }

    /// Lengths of all items at nesting `level` (0 = outermost).
    pub fn lengths(&self, level: usize) -> Vec<usize> {
        match self.offsets.get(level) {
            Some(o) => o.windows(2).map(|w| w[1] - w[0]).collect(),
            None => Vec::new(),
        }
    }

    /// Range of leaf values under item `index` of `level`.
    pub fn leaf_range(&self, level: usize, index: usize) -> Option<std::ops::Range<usize>> {
        let o = self.offsets.get(level)?;
        if index + 1 >= o.len() {
            return None;
        }
        let (mut start, mut end) = (o[index], o[index + 1]);
        for deeper in &self.offsets[level + 1..] {
            start = deeper[start];
            end = deeper[end];
        }
        Some(start..end)
    }

    /// Leaf values of top-level item `index` (its whole subtree, flattened).
    pub fn row(&self, index: usize) -> Option<&[T]> {
        self.leaf_range(0, index).map(|r| &self.values[r])
    }

    /// Mutable leaf values of top-level item `index`.
    pub fn row_mut(&mut self, index: usize) -> Option<&mut [T]> {
        let r = self.leaf_range(0, index)?;
        Some(&mut self.values[r])
    }

    /// Iterate over top-level rows.
    pub fn rows(&self) -> impl Iterator<Item = &[T]> + '_ {
        (0..self.len()).filter_map(move |i| self.row(i))
    }

    /// Whether `other` has identical nesting and extents at every level.
    pub fn same_shape<U: Scalar>(&self, other: &Jagged<U>) -> bool {
        self.offsets == other.offsets && self.values.len() == other.values.len()
    }

    /// Reset every value to zero, keeping the shape.
    pub fn zero(&mut self) {
        self.values.fill(T::default());
    }

    /// Elementwise accumulate `other` into `self`.
    pub fn accumulate(&mut self, other: &Jagged<T>, field: &str) -> Result<()> {
        if !self.same_shape(other) {
            return Err(TableError::ShapeMismatch(format!(
                "{field}: extents {:?} vs {:?}",
                self.lengths(0),
                other.lengths(0)
            )));
        }
        for (a, &b) in self.values.iter_mut().zip(&other.values) {
            a.accumulate(b);
        }
        Ok(())
    }

    pub(crate) fn from_parts(values: Vec<T>, offsets: Vec<Vec<usize>>) -> Self {
        Self { values, offsets }
    }

    pub(crate) fn offsets(&self) -> &[Vec<usize>] {
        &self.offsets
    }
}
