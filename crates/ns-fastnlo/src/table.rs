//! Whole-table reader and writer.
//!
//! A table is read in one forward pass: header, scenario, `Ncontrib + Ndata`
//! coefficient blocks and a closing magic number. Any error aborts the load;
//! a [`FastNloTable`] only exists once every block has been decoded.

use std::fs;
use std::io::{self, BufWriter, Write};
use std::path::Path;

use serde::{Deserialize, Serialize};

use crate::coeff::{BlockContext, CoeffAdd, Contribution, ContributionKind, check_erasable};
use crate::error::{Result, TableError};
use crate::framing::{read_magic_number, write_magic_number};
use crate::merge::MergeWeighting;
use crate::scenario::{ObservableBinning, Scenario, TableHeader};
use crate::source::DataSource;
use crate::text::{TextBuffer, TextWriter};
use crate::version::{SUPPORTED_VERSIONS, TableLayout};

/// Options controlling how tables are read.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct ReadOptions {
    /// Reject additive blocks that do not use half-matrix x storage.
    /// Default: `false`.
    pub require_half_matrix: bool,
    /// Record a diagnostic when `INormFlag != 0`. Default: `true`.
    pub warn_on_norm_flag: bool,
    /// Restrict the accepted versions. Versions outside the statically known
    /// set are rejected regardless. Default: all known versions.
    pub supported_versions: Option<Vec<i32>>,
}

impl Default for ReadOptions {
    fn default() -> Self {
        Self { require_half_matrix: false, warn_on_norm_flag: true, supported_versions: None }
    }
}

impl ReadOptions {
    /// Options for the conversion path, which only handles half-matrix
    /// x storage.
    pub fn conversion() -> Self {
        Self { require_half_matrix: true, ..Self::default() }
    }

    /// Parse options from JSON; missing keys take their defaults.
    pub fn from_json_str(s: &str) -> serde_json::Result<Self> {
        serde_json::from_str(s)
    }

    /// Versions the gate accepts.
    pub fn allowed_versions(&self) -> &[i32] {
        self.supported_versions.as_deref().unwrap_or(&SUPPORTED_VERSIONS)
    }
}

/// A tolerated anomaly found while reading a table.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Diagnostic {
    /// Field the anomaly concerns.
    pub field: String,
    /// Human-readable description.
    pub message: String,
}

/// Sink for tolerated anomalies, returned with the parsed table.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct Diagnostics {
    entries: Vec<Diagnostic>,
}

impl Diagnostics {
    /// Record a warning and forward it to the log.
    pub fn warn(&mut self, field: &str, message: impl Into<String>) {
        let message = message.into();
        log::warn!("{}: {}", field, message);
        self.entries.push(Diagnostic { field: field.to_string(), message });
    }

    /// All recorded entries in order.
    pub fn entries(&self) -> &[Diagnostic] {
        &self.entries
    }

    /// Whether an entry concerns `field`.
    pub fn mentions(&self, field: &str) -> bool {
        self.entries.iter().any(|d| d.field == field)
    }

    /// Number of entries.
    pub fn len(&self) -> usize {
        self.entries.len()
    }

    /// Whether nothing was recorded.
    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }
}

/// A fully decoded fastNLO table.
#[derive(Debug, Clone, PartialEq)]
pub struct FastNloTable {
    header: TableHeader,
    scenario: Scenario,
    contributions: Vec<Contribution>,
    diagnostics: Diagnostics,
}

impl FastNloTable {
    /// Open and parse a table file using memory mapping.
    pub fn open(path: impl AsRef<Path>) -> Result<Self> {
        Self::open_with(path, &ReadOptions::default())
    }

    /// Open and parse a table file with explicit options.
    pub fn open_with(path: impl AsRef<Path>, options: &ReadOptions) -> Result<Self> {
        let path = path.as_ref();
        log::debug!("opening fastNLO table {}", path.display());
        let data = DataSource::open(path)?;
        Self::read_with(&data, options)
    }

    /// Parse a table held in a string.
    pub fn read_str(text: &str) -> Result<Self> {
        Self::read_bytes(text.as_bytes())
    }

    /// Parse a table from raw bytes.
    pub fn read_bytes(data: &[u8]) -> Result<Self> {
        Self::read_with(data, &ReadOptions::default())
    }

    /// Parse a table from raw bytes with explicit options.
    pub fn read_with(data: &[u8], options: &ReadOptions) -> Result<Self> {
        let mut r = TextBuffer::new(data);
        let header = TableHeader::read(&mut r, options.allowed_versions())?;
        let scenario = Scenario::read(&mut r)?;

        let mut diagnostics = Diagnostics::default();
        if scenario.inorm_flag != 0 && options.warn_on_norm_flag {
            diagnostics.warn(
                "INormFlag",
                format!(
                    "INormFlag={} requests normalisation to a denominator table, which is not applied",
                    scenario.inorm_flag
                ),
            );
        }

        let ctx = BlockContext {
            layout: header.layout(),
            n_obs_bins: scenario.n_obs_bins(),
            require_half_matrix: options.require_half_matrix,
        };
        let n_blocks = header.n_blocks();
        let mut contributions = Vec::with_capacity(n_blocks.min(64));
        for i in 0..n_blocks {
            log::debug!("coefficient block {} of {}", i + 1, n_blocks);
            contributions.push(Contribution::read(&mut r, &ctx)?);
        }
        read_magic_number(&mut r, "end of table")?;

        let count = |kind: ContributionKind| contributions.iter().filter(|c| c.kind() == kind).count();
        let (n_data, n_mult) = (count(ContributionKind::Data), count(ContributionKind::Multiplicative));
        if n_data != header.ndata {
            diagnostics.warn(
                "Ndata",
                format!("header declares {} data blocks, found {}", header.ndata, n_data),
            );
        }
        if usize::try_from(header.nmult).ok() != Some(n_mult) {
            diagnostics.warn(
                "Nmult",
                format!("header declares {} multiplicative blocks, found {}", header.nmult, n_mult),
            );
        }

        log::debug!(
            "read table '{}' v{}: {} bins, {} contributions",
            header.scenario_name,
            header.version,
            scenario.n_obs_bins(),
            contributions.len()
        );
        Ok(Self { header, scenario, contributions, diagnostics })
    }

    /// Encode the table in the on-disk text layout.
    pub fn write_string(&self) -> String {
        let mut w = TextWriter::new();
        self.header.write(&mut w);
        self.scenario.write(&mut w);
        let layout = self.layout();
        for c in &self.contributions {
            c.write(&mut w, layout);
        }
        write_magic_number(&mut w);
        w.into_string()
    }

    /// Write the encoded table to `out`.
    pub fn write_to(&self, mut out: impl Write) -> Result<()> {
        out.write_all(self.write_string().as_bytes())?;
        out.flush()?;
        Ok(())
    }

    /// Write the encoded table to a file, replacing it if it exists.
    pub fn write_file(&self, path: impl AsRef<Path>) -> Result<()> {
        let file = fs::File::create(path.as_ref())?;
        self.write_to(BufWriter::new(file))
    }

    /// Header section.
    pub fn header(&self) -> &TableHeader {
        &self.header
    }

    /// Scenario section.
    pub fn scenario(&self) -> &Scenario {
        &self.scenario
    }

    /// Declared table version.
    pub fn version(&self) -> i32 {
        self.header.version
    }

    /// Layout family of the coefficient blocks.
    pub fn layout(&self) -> TableLayout {
        self.header.layout()
    }

    /// Observable binning.
    pub fn binning(&self) -> &ObservableBinning {
        &self.scenario.binning
    }

    /// Number of observable bins.
    pub fn n_obs_bins(&self) -> usize {
        self.scenario.n_obs_bins()
    }

    /// All coefficient blocks in file order.
    pub fn contributions(&self) -> &[Contribution] {
        &self.contributions
    }

    /// Mutable coefficient blocks.
    pub fn contributions_mut(&mut self) -> &mut [Contribution] {
        &mut self.contributions
    }

    /// Additive contributions in file order.
    pub fn additive(&self) -> impl Iterator<Item = &CoeffAdd> + '_ {
        self.contributions.iter().filter_map(Contribution::as_additive)
    }

    /// Anomalies tolerated while reading.
    pub fn diagnostics(&self) -> &Diagnostics {
        &self.diagnostics
    }

    /// Check that `other` describes the same observable and contributions.
    pub fn check_compatible(&self, other: &FastNloTable) -> Result<()> {
        let (a, b) = (&self.scenario, &other.scenario);
        if self.header.version != other.header.version {
            return Err(TableError::ShapeMismatch(format!(
                "table versions differ: {} vs {}",
                self.header.version, other.header.version
            )));
        }
        if a.ipubl_units != b.ipubl_units
            || a.ecms != b.ecms
            || a.ilo_ord != b.ilo_ord
            || a.binning != b.binning
            || a.bin_size != b.bin_size
        {
            return Err(TableError::ShapeMismatch(
                "scenarios differ in units, energy, order or binning".to_string(),
            ));
        }
        if self.contributions.len() != other.contributions.len() {
            return Err(TableError::ShapeMismatch(format!(
                "tables hold {} and {} contributions",
                self.contributions.len(),
                other.contributions.len()
            )));
        }
        for (i, (x, y)) in self.contributions.iter().zip(&other.contributions).enumerate() {
            match (x, y) {
                (Contribution::Additive(p), Contribution::Additive(q)) => p.check_compatible(q)?,
                _ if x.kind() == y.kind() && x.base().is_compatible(y.base()) => {}
                _ => {
                    return Err(TableError::ShapeMismatch(format!(
                        "contribution {} differs: {:?} vs {:?}",
                        i,
                        x.kind(),
                        y.kind()
                    )));
                }
            }
        }
        Ok(())
    }

    /// Whether `other` can be merged into this table.
    pub fn is_compatible(&self, other: &FastNloTable) -> bool {
        self.check_compatible(other).is_ok()
    }

    /// Merge the additive contributions of `other` pairwise into this table.
    ///
    /// Multiplicative and data blocks are kept from `self`. Nothing is
    /// modified unless every pair can be merged.
    pub fn merge(&mut self, other: &FastNloTable, weighting: MergeWeighting) -> Result<()> {
        self.check_compatible(other)?;
        for (x, y) in self.contributions.iter().zip(&other.contributions) {
            if let (Some(p), Some(q)) = (x.as_additive(), y.as_additive()) {
                p.check_merge(q, weighting)?;
            }
        }
        for (x, y) in self.contributions.iter_mut().zip(&other.contributions) {
            if let (Some(p), Some(q)) = (x.as_additive_mut(), y.as_additive()) {
                p.merge(q, weighting)?;
            }
        }
        log::debug!("merged table '{}' with option '{}'", other.header.scenario_name, weighting);
        Ok(())
    }

    /// Remove observable bin `bin` from the binning and every contribution.
    ///
    /// Nothing is modified unless every contribution can drop the bin.
    pub fn erase_bin(&mut self, bin: usize) -> Result<()> {
        check_erasable(bin, self.n_obs_bins())?;
        for c in &self.contributions {
            c.check_erase_bin(bin)?;
        }
        self.scenario.binning.erase_bin(bin)?;
        if bin < self.scenario.bin_size.len() {
            self.scenario.bin_size.remove(bin);
        }
        for c in &mut self.contributions {
            c.erase_bin(bin)?;
        }
        log::debug!("erased observable bin {} ({} left)", bin, self.n_obs_bins());
        Ok(())
    }

    /// Append observable bin `bin` of `other` to this table.
    ///
    /// Both tables must share the binning dimensions and hold matching
    /// contributions in the same order. Nothing is modified unless every
    /// contribution can take the bin.
    pub fn cat_bin(&mut self, other: &FastNloTable, bin: usize) -> Result<()> {
        let Some(bounds) = other.binning().bin(bin) else {
            return Err(TableError::ShapeMismatch(format!(
                "observable bin {bin} out of range ({} bins)",
                other.n_obs_bins()
            )));
        };
        if !self.binning().same_dimensions(other.binning()) {
            return Err(TableError::ShapeMismatch(format!(
                "binning dimensions differ: {:?} vs {:?}",
                self.binning().labels(),
                other.binning().labels()
            )));
        }
        if self.contributions.len() != other.contributions.len() {
            return Err(TableError::ShapeMismatch(format!(
                "tables hold {} and {} contributions",
                self.contributions.len(),
                other.contributions.len()
            )));
        }
        for (x, y) in self.contributions.iter().zip(&other.contributions) {
            x.check_cat_bin(y, bin)?;
        }
        self.scenario.binning.push_bin(bounds)?;
        if let Some(&size) = other.scenario.bin_size.get(bin) {
            self.scenario.bin_size.push(size);
        }
        for (x, y) in self.contributions.iter_mut().zip(&other.contributions) {
            x.cat_bin(y, bin)?;
        }
        log::debug!("appended bin {} of '{}'", bin, other.header.scenario_name);
        Ok(())
    }
}

impl std::str::FromStr for FastNloTable {
    type Err = TableError;

    fn from_str(s: &str) -> Result<Self> {
        Self::read_str(s)
    }
}

/// Read a table from any reader into memory and parse it.
pub fn read_from(mut input: impl io::Read, options: &ReadOptions) -> Result<FastNloTable> {
    let mut data = Vec::new();
    input.read_to_end(&mut data)?;
    FastNloTable::read_with(&DataSource::Owned(data), options)
}
