//! Fixed-length, flexible-length and unused-section codecs.
//!
//! Token counts returned by the readers include inline length tokens, so a
//! flexible vector `3 1.0 2.0 3.0` reports four tokens.

use serde::{Deserialize, Serialize};

use crate::error::{Result, TableError};
use crate::framing::MAGIC_NUMBER;
use crate::jagged::Jagged;
use crate::tensor::MAX_RANK;
use crate::text::{Scalar, TextBuffer, TextWriter};

/// Fill `v` with exactly `v.len()` tokens, each multiplied by `scale`.
///
/// `scale` turns stored per-event quantities back into absolute sums.
/// Returns the number of tokens consumed.
pub fn read_fixed<T: Scalar>(
    r: &mut TextBuffer,
    v: &mut [T],
    scale: f64,
    field: &'static str,
) -> Result<usize> {
    for slot in v.iter_mut() {
        let raw = r.read_scalar::<T>(field)?;
        match raw.scaled(scale) {
            Some(value) if value.to_f64().is_finite() => *slot = value,
            scaled => {
                let value = scaled.map_or(raw.to_f64() * scale, Scalar::to_f64);
                log::error!("non-finite or unrepresentable number read for {}: {:?} x {}", field, raw, scale);
                return Err(TableError::NonFiniteValue { field, value, offset: r.pos() });
            }
        }
    }
    Ok(v.len())
}

/// Write every element of `v` on its own line.
pub fn write_fixed<T: Scalar>(w: &mut TextWriter, v: &[T]) {
    for &x in v {
        w.value(x);
    }
}

/// Read a sequence whose length is `length_hint`, or an inline count token
/// when the hint is zero.
///
/// Returns the values and the number of tokens consumed.
pub fn read_flexible<T: Scalar>(
    r: &mut TextBuffer,
    length_hint: usize,
    scale: f64,
    field: &'static str,
) -> Result<(Vec<T>, usize)> {
    let (n, mut consumed) = match length_hint {
        0 => (r.read_count(field)?, 1),
        n => (n, 0),
    };
    r.ensure_tokens(n, field)?;
    let mut v = vec![T::default(); n];
    consumed += read_fixed(r, &mut v, scale, field)?;
    Ok((v, consumed))
}

/// Write a sequence; the count is omitted when the reader will be given a
/// length hint.
pub fn write_flexible<T: Scalar>(w: &mut TextWriter, v: &[T], with_count: bool) {
    if with_count {
        w.count(v.len());
    }
    write_fixed(w, v);
}

/// Read a sequence of text lines.
///
/// After an inline count the residual of the count's line is discarded
/// before the first element; every element is then one full line, possibly
/// empty. Returns the lines and the number of tokens/lines consumed
/// (excluding the discarded residual).
pub fn read_flexible_lines(
    r: &mut TextBuffer,
    length_hint: usize,
    field: &'static str,
) -> Result<(Vec<String>, usize)> {
    let (n, mut consumed) = match length_hint {
        0 => {
            let n = r.read_count(field)?;
            if n > 0 {
                r.read_line(field)?;
            }
            (n, 1)
        }
        n => (n, 0),
    };
    // Lines may be empty, so only the remaining byte count bounds them.
    let mut lines = Vec::with_capacity(n.min(r.remaining()));
    for _ in 0..n {
        lines.push(r.read_line(field)?);
    }
    consumed += n;
    Ok((lines, consumed))
}

/// Write a sequence of text lines preceded by its count.
pub fn write_flexible_lines(w: &mut TextWriter, lines: &[String]) {
    w.count(lines.len());
    for l in lines {
        w.line(l);
    }
}

/// Read a nested flexible sequence of the given depth.
///
/// Every level but the innermost carries an inline count. The innermost
/// level uses `length_hint` when non-zero (a shared subprocess count, for
/// instance), otherwise its own inline count.
pub fn read_flexible_nested<T: Scalar>(
    r: &mut TextBuffer,
    depth: usize,
    length_hint: usize,
    scale: f64,
    field: &'static str,
) -> Result<(Jagged<T>, usize)> {
    if depth == 0 || depth > MAX_RANK {
        return Err(TableError::InvalidDimension { field, index: 0, value: depth as i64 });
    }
    let mut values = Vec::new();
    let mut offsets = vec![vec![0usize]; depth - 1];
    let consumed = read_level(r, 0, depth, length_hint, scale, field, &mut values, &mut offsets)?;
    Ok((Jagged::from_parts(values, offsets), consumed))
}

#[allow(clippy::too_many_arguments)]
fn read_level<T: Scalar>(
    r: &mut TextBuffer,
    level: usize,
    depth: usize,
    length_hint: usize,
    scale: f64,
    field: &'static str,
    values: &mut Vec<T>,
    offsets: &mut [Vec<usize>],
) -> Result<usize> {
    if level + 1 == depth {
        let (leaf, consumed) = read_flexible::<T>(r, length_hint, scale, field)?;
        values.extend_from_slice(&leaf);
        return Ok(consumed);
    }
    let n = r.read_count(field)?;
    r.ensure_tokens(n, field)?;
    let mut consumed = 1;
    for _ in 0..n {
        consumed += read_level(r, level + 1, depth, length_hint, scale, field, values, offsets)?;
        let end = if level + 2 == depth { values.len() } else { offsets[level + 1].len() - 1 };
        offsets[level].push(end);
    }
    Ok(consumed)
}

/// Write a nested flexible sequence; the innermost counts are omitted when
/// `with_leaf_count` is false.
pub fn write_flexible_nested<T: Scalar>(w: &mut TextWriter, v: &Jagged<T>, with_leaf_count: bool) {
    if v.depth() == 1 {
        write_flexible(w, v.values(), with_leaf_count);
        return;
    }
    write_level(w, v, 0, 0..v.len(), with_leaf_count);
}

fn write_level<T: Scalar>(
    w: &mut TextWriter,
    v: &Jagged<T>,
    level: usize,
    items: std::ops::Range<usize>,
    with_leaf_count: bool,
) {
    let offsets = v.offsets();
    w.count(items.len());
    for i in items {
        let (start, end) = (offsets[level][i], offsets[level][i + 1]);
        if level + 2 == v.depth() {
            write_flexible(w, &v.values()[start..end], with_leaf_count);
        } else {
            write_level(w, v, level + 1, start..end, with_leaf_count);
        }
    }
}

/// Lines of a section this reader does not interpret, kept verbatim so the
/// writer can reproduce them.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct UnusedSection {
    /// Raw lines.
    pub lines: Vec<String>,
}

/// Read a forward-compatibility section: a line count followed by that many
/// lines.
///
/// A count equal to the magic number means the stream is desynchronised and
/// is rejected before any further line is consumed. A negative count is
/// rejected as [`TableError::InvalidDimension`] instead of being read as an
/// empty section.
pub fn read_unused(r: &mut TextBuffer, field: &'static str) -> Result<UnusedSection> {
    let start = r.pos();
    let n = r.read_i32(field)?;
    if n == MAGIC_NUMBER {
        log::error!("number of unused lines in {} equals the magic number", field);
        return Err(TableError::Framing {
            section: field,
            offset: start,
            message: "unused-section line count equals the magic number".to_string(),
        });
    }
    let n = usize::try_from(n)
        .map_err(|_| TableError::InvalidDimension { field, index: 0, value: n as i64 })?;
    if n == 0 {
        return Ok(UnusedSection::default());
    }
    r.read_line(field)?;
    let (lines, _) = read_flexible_lines(r, n, field)?;
    Ok(UnusedSection { lines })
}

/// Write an unused section.
pub fn write_unused(w: &mut TextWriter, section: &UnusedSection) {
    write_flexible_lines(w, &section.lines);
}
