//! # ns-fastnlo
//!
//! Reader and writer for fastNLO coefficient tables.
//!
//! Decodes the versioned text format (v2.0 to v2.5) into typed header,
//! scenario, binning and coefficient-block structures, re-encodes them
//! byte-for-byte, and combines statistically independent tables of the same
//! observable.
//!
//! ## Example
//!
//! ```no_run
//! use ns_fastnlo::{FastNloTable, MergeWeighting};
//!
//! let mut t = FastNloTable::open("InclJets_nlo_run1.tab").unwrap();
//! let other = FastNloTable::open("InclJets_nlo_run2.tab").unwrap();
//! t.merge(&other, MergeWeighting::Merge).unwrap();
//! for c in t.additive() {
//!     println!("Npow={} NSubproc={} Nevt={}", c.npow(), c.n_subproc(), c.nevt());
//! }
//! t.write_file("InclJets_nlo.tab").unwrap();
//! ```

#![warn(missing_docs)]
#![warn(clippy::all)]

pub mod codec;
pub mod coeff;
pub mod error;
pub mod framing;
pub mod jagged;
pub mod merge;
pub mod scenario;
pub mod source;
pub mod summary;
pub mod table;
pub mod tensor;
pub mod text;
pub mod version;
pub mod wgt_stat;

pub use coeff::{
    CoeffAdd, CoeffBase, CoeffData, CoeffMult, Contribution, ContributionKind, NevtEncoding,
};
pub use error::{ErrorKind, Result, TableError};
pub use jagged::Jagged;
pub use merge::MergeWeighting;
pub use scenario::{BinGroup, ObservableBinning, Scenario, TableHeader};
pub use source::DataSource;
pub use summary::TableSummary;
pub use table::{Diagnostic, Diagnostics, FastNloTable, ReadOptions, read_from};
pub use tensor::{BinTensor, Shape, Tensor};
pub use version::{SUPPORTED_VERSIONS, TableLayout, check_version};
pub use wgt_stat::WgtStat;
