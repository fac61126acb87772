//! Error types for fastNLO table decoding.
//!
//! Every variant is unrecoverable for the table being read: once a read fails
//! the stream cursor can no longer be trusted, so readers never return a
//! partially populated table. Callers decide whether that aborts the whole
//! process or only the current load.

use thiserror::Error;

/// Errors produced while reading, writing or combining fastNLO tables.
#[derive(Error, Debug)]
pub enum TableError {
    /// Underlying I/O failure.
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    /// A section boundary did not carry the expected magic number.
    #[error("framing error in {section} at offset {offset}: {message}")]
    Framing {
        /// Section being read.
        section: &'static str,
        /// Byte offset of the cursor when the check failed.
        offset: usize,
        /// What was found instead.
        message: String,
    },

    /// The stream ended before `field` could be read.
    #[error("truncated stream: reached end of table while reading {field} (offset {offset})")]
    TruncatedStream {
        /// Field being read.
        field: &'static str,
        /// Byte offset of the cursor.
        offset: usize,
    },

    /// Table version is not in the supported set.
    #[error("unsupported table version {version} (supported: {supported:?})")]
    UnsupportedVersion {
        /// Version declared by the table.
        version: i32,
        /// Versions this reader understands.
        supported: Vec<i32>,
    },

    /// A decoded numeric value was NaN or infinite, or an integer no longer
    /// fit its type after scaling.
    #[error("non-finite or unrepresentable value {value} read for {field} at offset {offset}")]
    NonFiniteValue {
        /// Field being read.
        field: &'static str,
        /// Decoded value.
        value: f64,
        /// Byte offset just past the offending token.
        offset: usize,
    },

    /// A token did not parse as the numeric type the layout requires.
    #[error("invalid token '{token}' for {field} at offset {offset}")]
    InvalidToken {
        /// Field being read.
        field: &'static str,
        /// Raw token text (lossy UTF-8).
        token: String,
        /// Byte offset of the token start.
        offset: usize,
    },

    /// A tensor or sequence extent was not strictly positive.
    #[error("invalid dimension for {field}: extent {index} is {value}")]
    InvalidDimension {
        /// Tensor or sequence being sized.
        field: &'static str,
        /// Position of the offending extent.
        index: usize,
        /// Offending value.
        value: i64,
    },

    /// Two structures that must agree in shape do not.
    #[error("shape mismatch: {0}")]
    ShapeMismatch(String),

    /// `IDataFlag`/`IAddMultFlag` do not name a known contribution kind.
    #[error("unknown contribution type: IDataFlag={data_flag}, IAddMultFlag={add_mult_flag}")]
    UnknownContributionType {
        /// `IDataFlag` as read.
        data_flag: i32,
        /// `IAddMultFlag` as read.
        add_mult_flag: i32,
    },

    /// The layout is recognised but not implemented by this reader.
    #[error("unimplemented configuration: {0}")]
    UnimplementedConfiguration(String),
}

/// Coarse error category, matching the table-format error taxonomy.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ErrorKind {
    /// Magic-number mismatch or premature end of stream.
    Framing,
    /// Table version outside the supported set.
    UnsupportedVersion,
    /// NaN or infinite numeric token.
    NonFiniteValue,
    /// Extents disagree or are not positive.
    ShapeMismatch,
    /// Unrecognised contribution flags.
    UnknownContributionType,
    /// Recognised but unsupported layout.
    UnimplementedConfiguration,
    /// Token that is not a number of the expected type.
    Syntax,
    /// Underlying I/O failure.
    Io,
}

impl TableError {
    /// Category of this error.
    pub fn kind(&self) -> ErrorKind {
        match self {
            TableError::Io(_) => ErrorKind::Io,
            TableError::Framing { .. } | TableError::TruncatedStream { .. } => ErrorKind::Framing,
            TableError::UnsupportedVersion { .. } => ErrorKind::UnsupportedVersion,
            TableError::NonFiniteValue { .. } => ErrorKind::NonFiniteValue,
            TableError::InvalidToken { .. } => ErrorKind::Syntax,
            TableError::InvalidDimension { .. } | TableError::ShapeMismatch(_) => {
                ErrorKind::ShapeMismatch
            }
            TableError::UnknownContributionType { .. } => ErrorKind::UnknownContributionType,
            TableError::UnimplementedConfiguration(_) => ErrorKind::UnimplementedConfiguration,
        }
    }
}

/// Result type alias for fastNLO table operations.
pub type Result<T> = std::result::Result<T, TableError>;
