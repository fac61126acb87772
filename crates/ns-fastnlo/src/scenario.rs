//! Table header, scenario description and observable binning.
//!
//! Both sections are framed by magic numbers. The header peeks the
//! scenario's opening sentinel and the scenario peeks the first coefficient
//! block's, so every section reader starts by consuming its own boundary.

use crate::codec::{
    UnusedSection, read_flexible, read_flexible_lines, read_unused, write_flexible,
    write_flexible_lines, write_unused,
};
use crate::error::{Result, TableError};
use crate::framing::{peek_magic_number, read_magic_number, write_magic_number};
use crate::text::{TextBuffer, TextWriter};
use crate::version::{TableLayout, check_version_in};

/// Leading section of a table.
#[derive(Debug, Clone, PartialEq)]
pub struct TableHeader {
    /// Declared table version.
    pub version: i32,
    /// Scenario name (a single token).
    pub scenario_name: String,
    /// Number of theory contributions (additive and multiplicative).
    pub ncontrib: usize,
    /// Number of multiplicative contributions. Legacy, informational only.
    pub nmult: i32,
    /// Number of data contributions.
    pub ndata: usize,
    /// `NuserString` section.
    pub user_strings: UnusedSection,
    /// `NuserInt` section.
    pub user_ints: UnusedSection,
    /// `NuserFloat` section.
    pub user_floats: UnusedSection,
    /// `Imachine` section.
    pub imachine: UnusedSection,
}

impl TableHeader {
    /// Read the header, gating the version against `allowed`.
    pub fn read(r: &mut TextBuffer, allowed: &[i32]) -> Result<Self> {
        read_magic_number(r, "header")?;
        let version = r.read_i32("tabversion")?;
        check_version_in(version, allowed)?;
        let scenario_name = r.read_token("ScenName")?.to_string();
        let ncontrib = r.read_count("Ncontrib")?;
        let nmult = r.read_i32("Nmult")?;
        let ndata = r.read_count("Ndata")?;
        let user_strings = read_unused(r, "NuserString")?;
        let user_ints = read_unused(r, "NuserInt")?;
        let user_floats = read_unused(r, "NuserFloat")?;
        let imachine = read_unused(r, "Imachine")?;
        peek_magic_number(r, "scenario")?;
        log::debug!(
            "header: version {} scenario '{}' Ncontrib={} Nmult={} Ndata={}",
            version,
            scenario_name,
            ncontrib,
            nmult,
            ndata
        );
        Ok(Self {
            version,
            scenario_name,
            ncontrib,
            nmult,
            ndata,
            user_strings,
            user_ints,
            user_floats,
            imachine,
        })
    }

    /// Layout family selected by the version.
    pub fn layout(&self) -> TableLayout {
        TableLayout::for_version(self.version)
    }

    /// Number of coefficient blocks that follow the scenario.
    pub fn n_blocks(&self) -> usize {
        self.ncontrib + self.ndata
    }

    /// Write the header section.
    pub fn write(&self, w: &mut TextWriter) {
        write_magic_number(w);
        w.value(self.version);
        w.line(&self.scenario_name);
        w.count(self.ncontrib);
        w.value(self.nmult);
        w.count(self.ndata);
        write_unused(w, &self.user_strings);
        write_unused(w, &self.user_ints);
        write_unused(w, &self.user_floats);
        write_unused(w, &self.imachine);
    }
}

/// Observable bins and their boundaries in every dimension.
///
/// Dimension 0 is the outermost observable (the one written last on disk).
/// Point-wise differential dimensions (`IDiffBin == 1`) store only a lower
/// boundary; their upper boundary equals the lower one.
#[derive(Debug, Clone, PartialEq)]
pub struct ObservableBinning {
    labels: Vec<String>,
    idiff_bin: Vec<i32>,
    /// `(lower, upper)` per `[bin][dim]`, flattened.
    bounds: Vec<(f64, f64)>,
}

/// Consecutive bins sharing every boundary but the innermost one.
#[derive(Debug, Clone, PartialEq)]
pub struct BinGroup {
    /// `"Dim1: lo - hi Dim2: ..."` over the outer dimensions.
    pub label: String,
    /// Observable bin indices in the group.
    pub bins: Vec<usize>,
    /// Innermost-dimension boundaries of each bin.
    pub bounds: Vec<(f64, f64)>,
}

impl ObservableBinning {
    /// Build a binning from labels, `IDiffBin` flags and per-bin bounds.
    pub fn new(labels: Vec<String>, idiff_bin: Vec<i32>, bins: &[Vec<(f64, f64)>]) -> Result<Self> {
        let ndim = labels.len();
        if ndim == 0 || idiff_bin.len() != ndim {
            return Err(TableError::ShapeMismatch(format!(
                "binning has {} labels and {} IDiffBin flags",
                ndim,
                idiff_bin.len()
            )));
        }
        let mut bounds = Vec::with_capacity(bins.len() * ndim);
        for (i, b) in bins.iter().enumerate() {
            if b.len() != ndim {
                return Err(TableError::ShapeMismatch(format!(
                    "bin {} has {} dimensions, expected {}",
                    i,
                    b.len(),
                    ndim
                )));
            }
            bounds.extend_from_slice(b);
        }
        Ok(Self { labels, idiff_bin, bounds })
    }

    /// Number of observable bins.
    pub fn n_bins(&self) -> usize {
        self.bounds.len() / self.labels.len().max(1)
    }

    /// Number of binning dimensions.
    pub fn n_dim(&self) -> usize {
        self.labels.len()
    }

    /// Dimension labels, outermost first.
    pub fn labels(&self) -> &[String] {
        &self.labels
    }

    /// `IDiffBin` flag per dimension.
    pub fn idiff_bin(&self) -> &[i32] {
        &self.idiff_bin
    }

    /// Whether dimension `dim` is point-wise differential.
    pub fn is_point_wise(&self, dim: usize) -> bool {
        self.idiff_bin.get(dim) == Some(&1)
    }

    /// `(lower, upper)` of `bin` in `dim`.
    pub fn bin_bounds(&self, bin: usize, dim: usize) -> Option<(f64, f64)> {
        if dim >= self.n_dim() {
            return None;
        }
        self.bounds.get(bin * self.n_dim() + dim).copied()
    }

    /// Lower boundary of `bin` in `dim`.
    pub fn lower(&self, bin: usize, dim: usize) -> Option<f64> {
        self.bin_bounds(bin, dim).map(|b| b.0)
    }

    /// Upper boundary of `bin` in `dim`.
    pub fn upper(&self, bin: usize, dim: usize) -> Option<f64> {
        self.bin_bounds(bin, dim).map(|b| b.1)
    }

    /// All boundaries of one bin.
    pub fn bin(&self, bin: usize) -> Option<&[(f64, f64)]> {
        let n = self.n_dim();
        self.bounds.get(bin * n..(bin + 1) * n)
    }

    /// Whether `other` uses the same dimensions and `IDiffBin` flags.
    pub fn same_dimensions(&self, other: &ObservableBinning) -> bool {
        self.labels == other.labels && self.idiff_bin == other.idiff_bin
    }

    /// Remove observable bin `bin`; at least one bin must remain.
    pub fn erase_bin(&mut self, bin: usize) -> Result<()> {
        let (n, ndim) = (self.n_bins(), self.n_dim());
        if bin >= n || n == 1 {
            return Err(TableError::ShapeMismatch(format!("cannot remove bin {bin} of {n}")));
        }
        self.bounds.drain(bin * ndim..(bin + 1) * ndim);
        Ok(())
    }

    /// Append a bin with the given boundaries, one pair per dimension.
    pub fn push_bin(&mut self, bounds: &[(f64, f64)]) -> Result<()> {
        if bounds.len() != self.n_dim() {
            return Err(TableError::ShapeMismatch(format!(
                "bin has {} dimensions, expected {}",
                bounds.len(),
                self.n_dim()
            )));
        }
        self.bounds.extend_from_slice(bounds);
        Ok(())
    }

    /// Group consecutive bins that agree in all but the innermost dimension.
    ///
    /// A one-dimensional binning yields a single group with an empty label.
    pub fn group_by_outer_dims(&self) -> Vec<BinGroup> {
        let n = self.n_dim();
        let mut groups: Vec<BinGroup> = Vec::new();
        for bin in 0..self.n_bins() {
            let Some(bounds) = self.bin(bin) else { continue };
            let mut label = String::new();
            for (j, (lo, hi)) in bounds[..n - 1].iter().enumerate() {
                label.push_str(&format!("Dim{}: {} - {} ", j + 1, lo, hi));
            }
            let inner = bounds[n - 1];
            match groups.last_mut() {
                Some(g) if g.label == label => {
                    g.bins.push(bin);
                    g.bounds.push(inner);
                }
                _ => groups.push(BinGroup { label, bins: vec![bin], bounds: vec![inner] }),
            }
        }
        groups
    }

    fn read(r: &mut TextBuffer, nobs: usize, ndim: usize) -> Result<Self> {
        // Residual of the NDim line, then labels innermost-first.
        r.read_line("DimLabel")?;
        let mut labels = vec![String::new(); ndim];
        for slot in labels.iter_mut().rev() {
            *slot = r.read_line("DimLabel")?;
        }
        let mut idiff_bin = vec![0i32; ndim];
        for slot in idiff_bin.iter_mut().rev() {
            *slot = r.read_i32("IDiffBin")?;
        }
        r.ensure_tokens(nobs.saturating_mul(ndim), "Bin")?;
        let mut bounds = vec![(0.0, 0.0); nobs * ndim];
        for bin in bounds.chunks_mut(ndim) {
            for j in (0..ndim).rev() {
                let lo = r.read_f64("Bin")?;
                let hi = match idiff_bin[j] {
                    0 | 2 => r.read_f64("Bin")?,
                    _ => lo,
                };
                bin[j] = (lo, hi);
            }
        }
        Ok(Self { labels, idiff_bin, bounds })
    }

    fn write(&self, w: &mut TextWriter) {
        for l in self.labels.iter().rev() {
            w.line(l);
        }
        for &f in self.idiff_bin.iter().rev() {
            w.value(f);
        }
        let n = self.n_dim();
        for bin in self.bounds.chunks(n) {
            for j in (0..n).rev() {
                let (lo, hi) = bin[j];
                w.value(lo);
                if matches!(self.idiff_bin[j], 0 | 2) {
                    w.value(hi);
                }
            }
        }
    }
}

/// Scenario section: physics setup and observable binning.
#[derive(Debug, Clone, PartialEq)]
pub struct Scenario {
    /// Cross sections are published in units of `10^-Ipublunits` barn.
    pub ipubl_units: i32,
    /// Free-text scenario description.
    pub description: Vec<String>,
    /// Centre-of-mass energy in GeV.
    pub ecms: f64,
    /// Power of alpha_s of the leading-order process.
    pub ilo_ord: i32,
    /// Observable binning.
    pub binning: ObservableBinning,
    /// Bin widths (normalisation divisor per bin).
    pub bin_size: Vec<f64>,
    /// Normalisation flag; non-zero values are not interpreted.
    pub inorm_flag: i32,
}

impl Scenario {
    /// Read the scenario section.
    pub fn read(r: &mut TextBuffer) -> Result<Self> {
        read_magic_number(r, "scenario")?;
        let ipubl_units = r.read_i32("Ipublunits")?;
        let (description, _) = read_flexible_lines(r, 0, "ScDescript")?;
        let ecms = r.read_f64("Ecms")?;
        let ilo_ord = r.read_i32("ILOord")?;
        let nobs = positive(r, "NObsBin")?;
        let ndim = positive(r, "NDim")?;
        let binning = ObservableBinning::read(r, nobs, ndim)?;
        let (bin_size, _) = read_flexible::<f64>(r, nobs, 1.0, "BinSize")?;
        let inorm_flag = r.read_i32("INormFlag")?;
        peek_magic_number(r, "coefficient block")?;
        log::debug!("scenario: {} bins in {} dimensions, Ecms={}", nobs, ndim, ecms);
        Ok(Self { ipubl_units, description, ecms, ilo_ord, binning, bin_size, inorm_flag })
    }

    /// Number of observable bins.
    pub fn n_obs_bins(&self) -> usize {
        self.binning.n_bins()
    }

    /// Write the scenario section.
    pub fn write(&self, w: &mut TextWriter) {
        write_magic_number(w);
        w.value(self.ipubl_units);
        write_flexible_lines(w, &self.description);
        w.value(self.ecms);
        w.value(self.ilo_ord);
        w.count(self.binning.n_bins());
        w.count(self.binning.n_dim());
        self.binning.write(w);
        write_flexible(w, &self.bin_size, false);
        w.value(self.inorm_flag);
    }
}

fn positive(r: &mut TextBuffer, field: &'static str) -> Result<usize> {
    let n = r.read_count(field)?;
    if n == 0 {
        return Err(TableError::InvalidDimension { field, index: 0, value: 0 });
    }
    Ok(n)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::version::SUPPORTED_VERSIONS;

    const HEADER: &str = "1234567890\n23600\nInclJets\n1\n0\n0\n0\n0\n0\n1\nx86_64\n1234567890\n";

    const SCENARIO: &str = "1234567890\n-12\n2\nCMS inclusive jets\n\n7000\n2\n3\n2\nR_jet\npT_[GeV]\n0\n2\n0\n0.5\n100\n200\n0\n0.5\n200\n300\n0.5\n1\n100\n200\n100\n100\n100\n0\n1234567890\n";

    #[test]
    fn header_reads_counts_and_unused_sections() {
        let mut r = TextBuffer::new(HEADER.as_bytes());
        let h = TableHeader::read(&mut r, &SUPPORTED_VERSIONS).unwrap();
        assert_eq!(h.version, 23600);
        assert_eq!(h.scenario_name, "InclJets");
        assert_eq!(h.n_blocks(), 1);
        assert_eq!(h.imachine.lines, vec!["x86_64".to_string()]);
        assert_eq!(h.layout(), TableLayout::Legacy);
        // The scenario sentinel is still pending.
        read_magic_number(&mut r, "scenario").unwrap();
        assert!(r.is_eof());

        let mut w = TextWriter::new();
        h.write(&mut w);
        assert_eq!(format!("{}1234567890\n", w.as_str()), HEADER);
    }

    #[test]
    fn header_rejects_unknown_version() {
        let text = HEADER.replace("23600", "19000");
        let err = TableHeader::read(&mut TextBuffer::new(text.as_bytes()), &SUPPORTED_VERSIONS)
            .unwrap_err();
        assert!(matches!(err, TableError::UnsupportedVersion { version: 19000, .. }));
    }

    #[test]
    fn scenario_reads_reversed_dimensions() {
        let mut r = TextBuffer::new(SCENARIO.as_bytes());
        let s = Scenario::read(&mut r).unwrap();
        assert_eq!(s.ipubl_units, -12);
        assert_eq!(s.description, vec!["CMS inclusive jets".to_string(), String::new()]);
        assert_eq!(s.n_obs_bins(), 3);
        let b = &s.binning;
        // First label on disk belongs to the innermost dimension.
        assert_eq!(b.labels(), &["pT_[GeV]".to_string(), "R_jet".to_string()]);
        assert_eq!(b.idiff_bin(), &[2, 0]);
        assert!(!b.is_point_wise(0));
        assert_eq!(b.bin_bounds(0, 0), Some((100.0, 200.0)));
        assert_eq!(b.bin_bounds(0, 1), Some((0.0, 0.5)));
        assert_eq!(b.bin_bounds(2, 0), Some((100.0, 200.0)));
        assert_eq!(b.bin_bounds(2, 1), Some((0.5, 1.0)));
        assert_eq!(b.bin_bounds(3, 0), None);
        assert_eq!(s.bin_size, vec![100.0, 100.0, 100.0]);

        let mut w = TextWriter::new();
        s.write(&mut w);
        assert_eq!(format!("{}1234567890\n", w.as_str()), SCENARIO);
    }

    #[test]
    fn point_wise_dimension_copies_lower_bound() {
        let mut r = TextBuffer::new(b"\nx\n1\n1\n2\n3\n");
        let b = ObservableBinning::read(&mut r, 3, 1).unwrap();
        assert!(b.is_point_wise(0));
        assert_eq!(b.bin_bounds(1, 0), Some((2.0, 2.0)));
        assert_eq!(b.upper(2, 0), Some(3.0));
    }

    #[test]
    fn zero_bins_are_rejected() {
        let text = SCENARIO.replacen("\n3\n2\nR_jet", "\n0\n2\nR_jet", 1);
        let err = Scenario::read(&mut TextBuffer::new(text.as_bytes())).unwrap_err();
        assert!(matches!(err, TableError::InvalidDimension { field: "NObsBin", .. }));
    }

    #[test]
    fn groups_follow_outer_dimensions() {
        let bins = vec![
            vec![(0.0, 0.5), (100.0, 200.0)],
            vec![(0.0, 0.5), (200.0, 300.0)],
            vec![(0.5, 1.0), (100.0, 200.0)],
        ];
        let b =
            ObservableBinning::new(vec!["y".into(), "pT".into()], vec![2, 2], &bins).unwrap();
        let groups = b.group_by_outer_dims();
        assert_eq!(groups.len(), 2);
        assert_eq!(groups[0].label, "Dim1: 0 - 0.5 ");
        assert_eq!(groups[0].bins, vec![0, 1]);
        assert_eq!(groups[0].bounds, vec![(100.0, 200.0), (200.0, 300.0)]);
        assert_eq!(groups[1].label, "Dim1: 0.5 - 1 ");
    }

    #[test]
    fn bins_can_be_erased_and_appended() {
        let bins = vec![vec![(0.0, 0.5), (100.0, 200.0)], vec![(0.5, 1.0), (100.0, 200.0)]];
        let mut b =
            ObservableBinning::new(vec!["y".into(), "pT".into()], vec![2, 2], &bins).unwrap();
        b.erase_bin(0).unwrap();
        assert_eq!(b.n_bins(), 1);
        assert_eq!(b.bin_bounds(0, 0), Some((0.5, 1.0)));
        assert!(b.erase_bin(0).is_err());

        assert!(b.push_bin(&[(1.0, 1.5)]).is_err());
        b.push_bin(&[(1.0, 1.5), (200.0, 300.0)]).unwrap();
        assert_eq!(b.upper(1, 1), Some(300.0));

        let other = ObservableBinning::new(vec!["y".into(), "pT".into()], vec![2, 0], &bins).unwrap();
        assert!(!b.same_dimensions(&other));
    }

    #[test]
    fn one_dimensional_binning_is_one_group() {
        let bins = vec![vec![(1.0, 2.0)], vec![(2.0, 3.0)]];
        let b = ObservableBinning::new(vec!["Q2".into()], vec![2], &bins).unwrap();
        let groups = b.group_by_outer_dims();
        assert_eq!(groups.len(), 1);
        assert_eq!(groups[0].label, "");
        assert_eq!(groups[0].bins, vec![0, 1]);
    }
}
