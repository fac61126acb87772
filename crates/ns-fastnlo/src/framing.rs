//! Magic-number framing between table sections.
//!
//! Top-level sections carry no length prefix; a line holding the magic number
//! is the only synchronisation point. Every boundary is re-validated and a
//! mismatch is fatal: there is no way to resynchronise a desynchronised
//! token stream.
//!
//! ```text
//! 1234567890      <- header
//! 25000
//! ...
//! 1234567890      <- scenario (peeked by the header, consumed here)
//! ...
//! 1234567890      <- each coefficient block
//! ...
//! 1234567890      <- end of table
//! ```

use crate::error::{Result, TableError};
use crate::text::{TextBuffer, TextWriter};

/// Sentinel written on its own line between table sections.
pub const MAGIC_NUMBER: i32 = 1_234_567_890;

/// Number of decimal digits in [`MAGIC_NUMBER`].
pub const fn magic_digit_count() -> usize {
    let mut n = MAGIC_NUMBER;
    let mut digits = 0;
    while n > 0 {
        n /= 10;
        digits += 1;
    }
    digits
}

/// Read one line and check that it holds the magic number.
///
/// An empty line is skipped first: it is the residual terminator left behind
/// by a preceding token read.
pub fn read_magic_number(r: &mut TextBuffer, section: &'static str) -> Result<()> {
    if r.is_eof() {
        return Err(TableError::TruncatedStream { field: section, offset: r.pos() });
    }
    let mut line = r.read_line(section)?;
    if line.trim().is_empty() {
        line = r.read_line(section)?;
    }
    match line.trim().parse::<i64>() {
        Ok(v) if v == MAGIC_NUMBER as i64 => Ok(()),
        _ => Err(TableError::Framing {
            section,
            offset: r.pos(),
            message: format!("found '{}' instead of magic number {}", line, MAGIC_NUMBER),
        }),
    }
}

/// Move the cursor back over the magic-number line just read.
///
/// Backs up by the digit count plus the newline, so the next
/// [`read_magic_number`] observes the same sentinel again.
pub fn put_back_magic_number(r: &mut TextBuffer) {
    r.unget(magic_digit_count() + 1);
}

/// Check that the next section boundary is present without consuming it.
pub fn peek_magic_number(r: &mut TextBuffer, section: &'static str) -> Result<()> {
    read_magic_number(r, section)?;
    put_back_magic_number(r);
    Ok(())
}

/// Write a section boundary.
pub fn write_magic_number(w: &mut TextWriter) {
    w.value(MAGIC_NUMBER);
}
