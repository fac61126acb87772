//! Cursor-based reader and line writer for the fastNLO text layout.
//!
//! A table interleaves whitespace-delimited numeric tokens with
//! newline-delimited text lines. `TextBuffer` exposes both access patterns
//! over one cursor:
//!
//! - token reads skip leading whitespace (newlines included) and stop right
//!   after the token, leaving the line terminator unread;
//! - line reads consume everything up to and including the next `\n`.
//!
//! After a token read the next line read therefore returns the (usually empty)
//! remainder of the token's line. Callers that expect a text line after a
//! count discard that residual first.

use std::fmt::Write as _;

use crate::error::{Result, TableError};

/// A numeric element type that can appear as a table token.
pub trait Scalar: Copy + Default + PartialEq + std::fmt::Debug {
    /// Parse one token. Returns `None` if the token is not a valid number of
    /// this type.
    fn parse_token(token: &str) -> Option<Self>;

    /// Multiply by a floating-point scale factor.
    ///
    /// Returns `None` when the product is not representable in `Self`.
    fn scaled(self, factor: f64) -> Option<Self>;

    /// Value as `f64` (for finiteness checks and diagnostics).
    fn to_f64(self) -> f64;

    /// Elementwise accumulation used by statistics merges.
    fn accumulate(&mut self, other: Self);

    /// Append the canonical token text.
    fn write_token(self, out: &mut String);
}

impl Scalar for f64 {
    fn parse_token(token: &str) -> Option<Self> {
        token.parse::<f64>().ok()
    }

    #[inline]
    fn scaled(self, factor: f64) -> Option<Self> {
        Some(self * factor)
    }

    #[inline]
    fn to_f64(self) -> f64 {
        self
    }

    #[inline]
    fn accumulate(&mut self, other: Self) {
        *self += other;
    }

    fn write_token(self, out: &mut String) {
        // Both forms are shortest round-trip representations; plain notation
        // is kept for the common magnitudes so tables stay readable.
        let a = self.abs();
        if a == 0.0 || (1e-5..1e16).contains(&a) {
            let _ = write!(out, "{self}");
        } else {
            let _ = write!(out, "{self:e}");
        }
    }
}

impl Scalar for u64 {
    fn parse_token(token: &str) -> Option<Self> {
        if let Ok(v) = token.parse::<u64>() {
            return Some(v);
        }
        // Event counts are occasionally written in floating-point notation.
        let v = token.parse::<f64>().ok()?;
        if v.is_finite() && v >= 0.0 && v.fract() == 0.0 && v <= u64::MAX as f64 {
            Some(v as u64)
        } else {
            None
        }
    }

    fn scaled(self, factor: f64) -> Option<Self> {
        if factor == 1.0 {
            return Some(self);
        }
        let v = self as f64 * factor;
        (v.is_finite() && v >= 0.0 && v.fract() == 0.0 && v < u64::MAX as f64).then_some(v as u64)
    }

    #[inline]
    fn to_f64(self) -> f64 {
        self as f64
    }

    #[inline]
    fn accumulate(&mut self, other: Self) {
        *self = self.saturating_add(other);
    }

    fn write_token(self, out: &mut String) {
        let _ = write!(out, "{self}");
    }
}

impl Scalar for i32 {
    fn parse_token(token: &str) -> Option<Self> {
        token.parse::<i32>().ok()
    }

    fn scaled(self, factor: f64) -> Option<Self> {
        if factor == 1.0 {
            return Some(self);
        }
        let v = self as f64 * factor;
        (v.fract() == 0.0 && (i32::MIN as f64..=i32::MAX as f64).contains(&v)).then_some(v as i32)
    }

    #[inline]
    fn to_f64(self) -> f64 {
        self as f64
    }

    #[inline]
    fn accumulate(&mut self, other: Self) {
        *self = self.saturating_add(other);
    }

    fn write_token(self, out: &mut String) {
        let _ = write!(out, "{self}");
    }
}

/// A cursor over the bytes of a text table.
pub struct TextBuffer<'a> {
    data: &'a [u8],
    pos: usize,
}

impl<'a> TextBuffer<'a> {
    /// Create a new reader over the given bytes.
    pub fn new(data: &'a [u8]) -> Self {
        Self { data, pos: 0 }
    }

    /// Current read position.
    #[inline]
    pub fn pos(&self) -> usize {
        self.pos
    }

    /// Set read position absolutely (clamped to the buffer length).
    pub fn set_pos(&mut self, pos: usize) {
        self.pos = pos.min(self.data.len());
    }

    /// Remaining bytes from current position.
    #[inline]
    pub fn remaining(&self) -> usize {
        self.data.len().saturating_sub(self.pos)
    }

    /// Whether the cursor sits at the end of the buffer.
    #[inline]
    pub fn is_eof(&self) -> bool {
        self.pos >= self.data.len()
    }

    /// Move the cursor back by `n` bytes.
    pub fn unget(&mut self, n: usize) {
        self.pos = self.pos.saturating_sub(n);
    }

    /// Read the next whitespace-delimited token.
    pub fn read_token(&mut self, field: &'static str) -> Result<&'a str> {
        while self.pos < self.data.len() && self.data[self.pos].is_ascii_whitespace() {
            self.pos += 1;
        }
        if self.is_eof() {
            return Err(TableError::TruncatedStream { field, offset: self.pos });
        }
        let start = self.pos;
        while self.pos < self.data.len() && !self.data[self.pos].is_ascii_whitespace() {
            self.pos += 1;
        }
        let raw = &self.data[start..self.pos];
        std::str::from_utf8(raw).map_err(|_| TableError::InvalidToken {
            field,
            token: String::from_utf8_lossy(raw).into_owned(),
            offset: start,
        })
    }

    /// Read one token and parse it as `T`.
    ///
    /// Floating-point values must be finite.
    pub fn read_scalar<T: Scalar>(&mut self, field: &'static str) -> Result<T> {
        let start = self.pos;
        let token = self.read_token(field)?;
        let Some(value) = T::parse_token(token) else {
            if let Ok(v) = token.parse::<f64>()
                && !v.is_finite()
            {
                return Err(TableError::NonFiniteValue { field, value: v, offset: self.pos });
            }
            return Err(TableError::InvalidToken { field, token: token.to_string(), offset: start });
        };
        if !value.to_f64().is_finite() {
            return Err(TableError::NonFiniteValue { field, value: value.to_f64(), offset: self.pos });
        }
        Ok(value)
    }

    /// Read a 32-bit integer token.
    pub fn read_i32(&mut self, field: &'static str) -> Result<i32> {
        self.read_scalar(field)
    }

    /// Read a finite floating-point token.
    pub fn read_f64(&mut self, field: &'static str) -> Result<f64> {
        self.read_scalar(field)
    }

    /// Read an unsigned 64-bit counter token.
    pub fn read_u64(&mut self, field: &'static str) -> Result<u64> {
        self.read_scalar(field)
    }

    /// Read a count token that must be non-negative.
    pub fn read_count(&mut self, field: &'static str) -> Result<usize> {
        let n = self.read_i32(field)?;
        usize::try_from(n)
            .map_err(|_| TableError::InvalidDimension { field, index: 0, value: n as i64 })
    }

    /// Read the rest of the current line, consuming its terminator.
    ///
    /// A trailing `\r` is dropped.
    pub fn read_line(&mut self, field: &'static str) -> Result<String> {
        if self.is_eof() {
            return Err(TableError::TruncatedStream { field, offset: self.pos });
        }
        let start = self.pos;
        let end = self.data[start..]
            .iter()
            .position(|&b| b == b'\n')
            .map_or(self.data.len(), |i| start + i);
        self.pos = (end + 1).min(self.data.len());
        let mut raw = &self.data[start..end];
        if let Some((&b'\r', rest)) = raw.split_last() {
            raw = rest;
        }
        Ok(String::from_utf8_lossy(raw).into_owned())
    }

    /// Fail early when `n` more tokens cannot possibly fit in the buffer.
    ///
    /// Every token needs at least one character plus a separator, so this
    /// bounds allocations driven by corrupt extents.
    pub fn ensure_tokens(&self, n: usize, field: &'static str) -> Result<()> {
        if n.saturating_mul(2) > self.remaining() + 1 {
            return Err(TableError::TruncatedStream { field, offset: self.pos });
        }
        Ok(())
    }
}

/// Line-oriented writer producing the one-value-per-line table layout.
#[derive(Debug, Default)]
pub struct TextWriter {
    out: String,
}

impl TextWriter {
    /// Create an empty writer.
    pub fn new() -> Self {
        Self::default()
    }

    /// Write one numeric value on its own line.
    pub fn value<T: Scalar>(&mut self, v: T) {
        v.write_token(&mut self.out);
        self.out.push('\n');
    }

    /// Write a count on its own line.
    pub fn count(&mut self, n: usize) {
        let _ = writeln!(self.out, "{n}");
    }

    /// Write a raw text line (a token or a free-text description).
    pub fn line(&mut self, s: &str) {
        self.out.push_str(s);
        self.out.push('\n');
    }

    /// Bytes written so far.
    pub fn len(&self) -> usize {
        self.out.len()
    }

    /// Whether nothing has been written yet.
    pub fn is_empty(&self) -> bool {
        self.out.is_empty()
    }

    /// View the text written so far.
    pub fn as_str(&self) -> &str {
        &self.out
    }

    /// Consume the writer and return the table text.
    pub fn into_string(self) -> String {
        self.out
    }
}
