//! Multiplicative and data contributions.
//!
//! Both carry named uncorrelated and correlated uncertainty sources with an
//! asymmetric `(lo, hi)` pair per observable bin. Multiplicative blocks add
//! one correction factor per bin; data blocks add the measured point and
//! optional full error matrices.

use crate::codec::{read_flexible_lines, write_flexible_lines};
use crate::coeff::{CoeffBase, bin_out_of_range, check_erasable};
use crate::error::{Result, TableError};
use crate::tensor::{Shape, Tensor};
use crate::text::{TextBuffer, TextWriter};

/// Names of the uncertainty sources of a block.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct Systematics {
    /// Uncorrelated source descriptions.
    pub uncorrelated: Vec<String>,
    /// Correlated source descriptions.
    pub correlated: Vec<String>,
}

impl Systematics {
    fn read(r: &mut TextBuffer) -> Result<Self> {
        let (uncorrelated, _) = read_flexible_lines(r, 0, "UncDescr")?;
        let (correlated, _) = read_flexible_lines(r, 0, "CorDescr")?;
        Ok(Self { uncorrelated, correlated })
    }

    fn write(&self, w: &mut TextWriter) {
        write_flexible_lines(w, &self.uncorrelated);
        write_flexible_lines(w, &self.correlated);
    }
}

/// `(lo, hi)` uncertainty pairs per `[bin][source]`.
///
/// The number of bins and sources is fixed once read; only the values can be
/// changed from outside the crate.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct SourcePairs {
    n_sources: usize,
    n_bins: usize,
    pairs: Vec<(f64, f64)>,
}

impl SourcePairs {
    fn with_sources(n_sources: usize, n_bins: usize) -> Self {
        Self { n_sources, n_bins: 0, pairs: Vec::with_capacity(n_sources * n_bins) }
    }

    /// Number of sources.
    pub fn n_sources(&self) -> usize {
        self.n_sources
    }

    /// Number of observable bins.
    pub fn n_bins(&self) -> usize {
        self.n_bins
    }

    /// Pair of `source` in `bin`.
    pub fn get(&self, bin: usize, source: usize) -> Option<(f64, f64)> {
        self.bin(bin)?.get(source).copied()
    }

    /// All pairs of one bin.
    pub fn bin(&self, bin: usize) -> Option<&[(f64, f64)]> {
        if bin >= self.n_bins {
            return None;
        }
        self.pairs.get(bin * self.n_sources..(bin + 1) * self.n_sources)
    }

    /// Mutable pairs of one bin.
    pub fn bin_mut(&mut self, bin: usize) -> Option<&mut [(f64, f64)]> {
        if bin >= self.n_bins {
            return None;
        }
        self.pairs.get_mut(bin * self.n_sources..(bin + 1) * self.n_sources)
    }

    fn read_bin(&mut self, r: &mut TextBuffer, field: &'static str) -> Result<()> {
        for _ in 0..self.n_sources {
            let lo = r.read_f64(field)?;
            let hi = r.read_f64(field)?;
            self.pairs.push((lo, hi));
        }
        self.n_bins += 1;
        Ok(())
    }

    fn write_bin(&self, w: &mut TextWriter, bin: usize) {
        for &(lo, hi) in self.bin(bin).unwrap_or_default() {
            w.value(lo);
            w.value(hi);
        }
    }

    fn erase_bin(&mut self, bin: usize) {
        if bin < self.n_bins {
            self.pairs.drain(bin * self.n_sources..(bin + 1) * self.n_sources);
            self.n_bins -= 1;
        }
    }

    fn push_bin(&mut self, pairs: &[(f64, f64)]) {
        debug_assert_eq!(pairs.len(), self.n_sources);
        self.pairs.extend_from_slice(pairs);
        self.n_bins += 1;
    }
}

/// Multiplicative correction factors with their uncertainties.
#[derive(Debug, Clone, PartialEq)]
pub struct CoeffMult {
    /// Common base fields.
    pub base: CoeffBase,
    systematics: Systematics,
    fact: Vec<f64>,
    uncorrelated: SourcePairs,
    correlated: SourcePairs,
}

impl CoeffMult {
    pub(crate) fn read(r: &mut TextBuffer, base: CoeffBase, n_obs_bins: usize) -> Result<Self> {
        let systematics = Systematics::read(r)?;
        let (nu, nc) = (systematics.uncorrelated.len(), systematics.correlated.len());
        r.ensure_tokens(n_obs_bins.saturating_mul(1 + 2 * (nu + nc)), "fact")?;
        let mut fact = Vec::with_capacity(n_obs_bins);
        let mut uncorrelated = SourcePairs::with_sources(nu, n_obs_bins);
        let mut correlated = SourcePairs::with_sources(nc, n_obs_bins);
        for _ in 0..n_obs_bins {
            fact.push(r.read_f64("fact")?);
            uncorrelated.read_bin(r, "UncorLo/UncorHi")?;
            correlated.read_bin(r, "CorrLo/CorrHi")?;
        }
        Ok(Self { base, systematics, fact, uncorrelated, correlated })
    }

    pub(crate) fn write(&self, w: &mut TextWriter) {
        self.base.write(w);
        self.systematics.write(w);
        for (bin, &f) in self.fact.iter().enumerate() {
            w.value(f);
            self.uncorrelated.write_bin(w, bin);
            self.correlated.write_bin(w, bin);
        }
    }

    /// Number of observable bins.
    pub fn n_obs_bins(&self) -> usize {
        self.fact.len()
    }

    /// Source names.
    pub fn systematics(&self) -> &Systematics {
        &self.systematics
    }

    /// Correction factor per observable bin.
    pub fn fact(&self) -> &[f64] {
        &self.fact
    }

    /// Mutable correction factors; the bin count cannot change.
    pub fn fact_mut(&mut self) -> &mut [f64] {
        &mut self.fact
    }

    /// Uncorrelated uncertainties.
    pub fn uncorrelated(&self) -> &SourcePairs {
        &self.uncorrelated
    }

    /// Mutable uncorrelated uncertainties.
    pub fn uncorrelated_mut(&mut self) -> &mut SourcePairs {
        &mut self.uncorrelated
    }

    /// Correlated uncertainties.
    pub fn correlated(&self) -> &SourcePairs {
        &self.correlated
    }

    /// Mutable correlated uncertainties.
    pub fn correlated_mut(&mut self) -> &mut SourcePairs {
        &mut self.correlated
    }

    /// Remove observable bin `bin`.
    pub fn erase_bin(&mut self, bin: usize) -> Result<()> {
        check_erasable(bin, self.n_obs_bins())?;
        self.fact.remove(bin);
        self.uncorrelated.erase_bin(bin);
        self.correlated.erase_bin(bin);
        Ok(())
    }

    /// Check that bin `bin` of `other` can be appended.
    pub fn check_cat_bin(&self, other: &CoeffMult, bin: usize) -> Result<()> {
        check_same_sources(&self.base, &self.systematics, &other.base, &other.systematics)?;
        if bin >= other.n_obs_bins() {
            return Err(bin_out_of_range(bin, other.n_obs_bins()));
        }
        Ok(())
    }

    /// Append bin `bin` of `other`.
    pub fn cat_bin(&mut self, other: &CoeffMult, bin: usize) -> Result<()> {
        self.check_cat_bin(other, bin)?;
        self.fact.push(other.fact[bin]);
        self.uncorrelated.push_bin(other.uncorrelated.bin(bin).unwrap_or_default());
        self.correlated.push_bin(other.correlated.bin(bin).unwrap_or_default());
        Ok(())
    }
}

/// Measured data points with their uncertainties.
#[derive(Debug, Clone, PartialEq)]
pub struct CoeffData {
    /// Common base fields.
    pub base: CoeffBase,
    systematics: Systematics,
    x_center: Vec<f64>,
    value: Vec<f64>,
    uncorrelated: SourcePairs,
    correlated: SourcePairs,
    /// Full `NObsBin × NObsBin` error matrices.
    err_matrices: Vec<Tensor<f64>>,
}

impl CoeffData {
    pub(crate) fn read(r: &mut TextBuffer, base: CoeffBase, n_obs_bins: usize) -> Result<Self> {
        let systematics = Systematics::read(r)?;
        let (nu, nc) = (systematics.uncorrelated.len(), systematics.correlated.len());
        r.ensure_tokens(n_obs_bins.saturating_mul(2 + 2 * (nu + nc)), "Value")?;
        let mut x_center = Vec::with_capacity(n_obs_bins);
        let mut value = Vec::with_capacity(n_obs_bins);
        let mut uncorrelated = SourcePairs::with_sources(nu, n_obs_bins);
        let mut correlated = SourcePairs::with_sources(nc, n_obs_bins);
        for _ in 0..n_obs_bins {
            x_center.push(r.read_f64("Xcenter")?);
            value.push(r.read_f64("Value")?);
            uncorrelated.read_bin(r, "UncorLo/UncorHi")?;
            correlated.read_bin(r, "CorrLo/CorrHi")?;
        }
        let n_matrices = r.read_count("NErrMatrix")?;
        let n = n_obs_bins as i64;
        let mut err_matrices = Vec::new();
        for _ in 0..n_matrices {
            err_matrices.push(Tensor::read(r, "MatrixElement", &[n, n], 1.0)?.0);
        }
        Ok(Self { base, systematics, x_center, value, uncorrelated, correlated, err_matrices })
    }

    pub(crate) fn write(&self, w: &mut TextWriter) {
        self.base.write(w);
        self.systematics.write(w);
        for (bin, (&x, &v)) in self.x_center.iter().zip(&self.value).enumerate() {
            w.value(x);
            w.value(v);
            self.uncorrelated.write_bin(w, bin);
            self.correlated.write_bin(w, bin);
        }
        w.count(self.err_matrices.len());
        for m in &self.err_matrices {
            m.write(w);
        }
    }

    /// Number of observable bins.
    pub fn n_obs_bins(&self) -> usize {
        self.value.len()
    }

    /// Source names.
    pub fn systematics(&self) -> &Systematics {
        &self.systematics
    }

    /// Bin centre per observable bin.
    pub fn x_center(&self) -> &[f64] {
        &self.x_center
    }

    /// Mutable bin centres; the bin count cannot change.
    pub fn x_center_mut(&mut self) -> &mut [f64] {
        &mut self.x_center
    }

    /// Measured value per observable bin.
    pub fn value(&self) -> &[f64] {
        &self.value
    }

    /// Mutable measured values; the bin count cannot change.
    pub fn value_mut(&mut self) -> &mut [f64] {
        &mut self.value
    }

    /// Uncorrelated uncertainties.
    pub fn uncorrelated(&self) -> &SourcePairs {
        &self.uncorrelated
    }

    /// Mutable uncorrelated uncertainties.
    pub fn uncorrelated_mut(&mut self) -> &mut SourcePairs {
        &mut self.uncorrelated
    }

    /// Correlated uncertainties.
    pub fn correlated(&self) -> &SourcePairs {
        &self.correlated
    }

    /// Mutable correlated uncertainties.
    pub fn correlated_mut(&mut self) -> &mut SourcePairs {
        &mut self.correlated
    }

    /// Full `NObsBin × NObsBin` error matrices.
    pub fn err_matrices(&self) -> &[Tensor<f64>] {
        &self.err_matrices
    }

    /// Remove observable bin `bin`, including its row and column in every
    /// error matrix.
    pub fn erase_bin(&mut self, bin: usize) -> Result<()> {
        check_erasable(bin, self.n_obs_bins())?;
        let matrices =
            self.err_matrices.iter().map(|m| without_row_col(m, bin)).collect::<Result<Vec<_>>>()?;
        self.x_center.remove(bin);
        self.value.remove(bin);
        self.uncorrelated.erase_bin(bin);
        self.correlated.erase_bin(bin);
        self.err_matrices = matrices;
        Ok(())
    }

    /// Check that bin `bin` of `other` can be appended.
    pub fn check_cat_bin(&self, other: &CoeffData, bin: usize) -> Result<()> {
        check_same_sources(&self.base, &self.systematics, &other.base, &other.systematics)?;
        if bin >= other.n_obs_bins() {
            return Err(bin_out_of_range(bin, other.n_obs_bins()));
        }
        if self.err_matrices.len() != other.err_matrices.len() {
            return Err(TableError::ShapeMismatch(format!(
                "data blocks hold {} and {} error matrices",
                self.err_matrices.len(),
                other.err_matrices.len()
            )));
        }
        Ok(())
    }

    /// Append bin `bin` of `other`.
    ///
    /// Each error matrix grows by one row and column; the new diagonal entry
    /// comes from `other` and the new off-diagonal entries are zero.
    pub fn cat_bin(&mut self, other: &CoeffData, bin: usize) -> Result<()> {
        self.check_cat_bin(other, bin)?;
        let matrices = self
            .err_matrices
            .iter()
            .zip(&other.err_matrices)
            .map(|(m, o)| with_row_col(m, o.get(&[bin, bin]).unwrap_or(0.0)))
            .collect::<Result<Vec<_>>>()?;
        self.x_center.push(other.x_center[bin]);
        self.value.push(other.value[bin]);
        self.uncorrelated.push_bin(other.uncorrelated.bin(bin).unwrap_or_default());
        self.correlated.push_bin(other.correlated.bin(bin).unwrap_or_default());
        self.err_matrices = matrices;
        Ok(())
    }
}

fn check_same_sources(a: &CoeffBase, sa: &Systematics, b: &CoeffBase, sb: &Systematics) -> Result<()> {
    if !a.is_compatible(b) {
        return Err(TableError::ShapeMismatch("contribution flags or units differ".to_string()));
    }
    if sa != sb {
        return Err(TableError::ShapeMismatch(format!(
            "uncertainty sources differ: {}+{} vs {}+{}",
            sa.uncorrelated.len(),
            sa.correlated.len(),
            sb.uncorrelated.len(),
            sb.correlated.len()
        )));
    }
    Ok(())
}

fn without_row_col(m: &Tensor<f64>, skip: usize) -> Result<Tensor<f64>> {
    let n = m.shape().dims()[0];
    let mut out = Tensor::zeros(Shape::from_dims("MatrixElement", &[n - 1, n - 1])?);
    let kept: Vec<usize> = (0..n).filter(|&i| i != skip).collect();
    for (i, &row) in kept.iter().enumerate() {
        for (j, &col) in kept.iter().enumerate() {
            if let (Some(slot), Some(v)) = (out.get_mut(&[i, j]), m.get(&[row, col])) {
                *slot = v;
            }
        }
    }
    Ok(out)
}

fn with_row_col(m: &Tensor<f64>, diagonal: f64) -> Result<Tensor<f64>> {
    let n = m.shape().dims()[0];
    let mut out = Tensor::zeros(Shape::from_dims("MatrixElement", &[n + 1, n + 1])?);
    for i in 0..n {
        for j in 0..n {
            if let (Some(slot), Some(v)) = (out.get_mut(&[i, j]), m.get(&[i, j])) {
                *slot = v;
            }
        }
    }
    if let Some(slot) = out.get_mut(&[n, n]) {
        *slot = diagonal;
    }
    Ok(out)
}
