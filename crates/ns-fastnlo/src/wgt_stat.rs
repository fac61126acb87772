//! Weight and event statistics of an additive contribution.
//!
//! `WgtStat` holds the sufficient statistics a generator run accumulates:
//! normalisation counts, sums of weights and sums of squares, globally and
//! per (subprocess, observable bin). Statistics of independent runs combine
//! by plain addition, which is what [`WgtStat::add`] does.
//!
//! The four per-(process, bin) arrays always share one shape. Merging two
//! statistics blocks of different shape is refused: they come from
//! incompatible tables.

use crate::codec::{read_flexible_nested, write_flexible_nested};
use crate::error::{Result, TableError};
use crate::jagged::Jagged;
use crate::text::{Scalar, TextBuffer, TextWriter};

/// Event and weight counts of one additive contribution.
#[derive(Debug, Clone, PartialEq)]
pub struct WgtStat {
    /// Normalisation as suggested by the generator ("number of events").
    pub wgt_nevt: f64,
    /// Number of source tables folded into this one.
    pub num_table: i32,
    /// Number of entries.
    pub wgt_num_ev: u64,
    /// Sum of all weight².
    pub wgt_sum_w2: f64,
    /// Sum of all sigma² (`(wgt·alpha·pdf)²`).
    pub sig_sum_w2: f64,
    /// Sum of all sigma.
    pub sig_sum: f64,
    /// Weight² sums per `[proc][obs]`.
    pub wgt_obs_sum_w2: Jagged<f64>,
    /// Sigma² sums per `[proc][obs]`.
    pub sig_obs_sum_w2: Jagged<f64>,
    /// Sigma sums per `[proc][obs]`.
    pub sig_obs_sum: Jagged<f64>,
    /// Entry counts per `[proc][obs]`.
    pub wgt_obs_num_ev: Jagged<u64>,
}

impl Default for WgtStat {
    fn default() -> Self {
        Self {
            wgt_nevt: 0.0,
            num_table: 1,
            wgt_num_ev: 0,
            wgt_sum_w2: 0.0,
            sig_sum_w2: 0.0,
            sig_sum: 0.0,
            wgt_obs_sum_w2: Jagged::empty(2),
            sig_obs_sum_w2: Jagged::empty(2),
            sig_obs_sum: Jagged::empty(2),
            wgt_obs_num_ev: Jagged::empty(2),
        }
    }
}

impl WgtStat {
    /// Zero every field and reset `num_table` to 1.
    ///
    /// The per-bin arrays keep their shape.
    pub fn erase(&mut self) {
        self.wgt_nevt = 0.0;
        self.num_table = 1;
        self.wgt_num_ev = 0;
        self.wgt_sum_w2 = 0.0;
        self.sig_sum_w2 = 0.0;
        self.sig_sum = 0.0;
        self.wgt_obs_sum_w2.zero();
        self.sig_obs_sum_w2.zero();
        self.sig_obs_sum.zero();
        self.wgt_obs_num_ev.zero();
    }

    /// Number of subprocesses covered by the per-bin arrays.
    pub fn n_proc(&self) -> usize {
        self.wgt_obs_num_ev.len()
    }

    /// Whether the per-bin arrays are present.
    pub fn has_bin_statistics(&self) -> bool {
        !self.wgt_obs_num_ev.is_empty()
    }

    /// Check that the four per-(process, bin) arrays share one shape.
    pub fn check_shape(&self) -> Result<()> {
        let reference = &self.wgt_obs_num_ev;
        let consistent = reference.same_shape(&self.wgt_obs_sum_w2)
            && reference.same_shape(&self.sig_obs_sum_w2)
            && reference.same_shape(&self.sig_obs_sum);
        if !consistent {
            return Err(TableError::ShapeMismatch(format!(
                "WgtStat arrays disagree: WgtObsNumEv {:?}, WgtObsSumW2 {:?}, SigObsSumW2 {:?}, SigObsSum {:?}",
                reference.lengths(0),
                self.wgt_obs_sum_w2.lengths(0),
                self.sig_obs_sum_w2.lengths(0),
                self.sig_obs_sum.lengths(0),
            )));
        }
        Ok(())
    }

    /// Check that `other` can be added to `self`.
    pub fn check_compatible(&self, other: &WgtStat) -> Result<()> {
        self.check_shape()?;
        other.check_shape()?;
        let (a, b) = (&self.wgt_obs_num_ev, &other.wgt_obs_num_ev);
        if a.len() != b.len() {
            return Err(TableError::ShapeMismatch(format!(
                "WgtObsNumEv has {} processes vs {}",
                a.len(),
                b.len()
            )));
        }
        if !a.same_shape(b) {
            return Err(TableError::ShapeMismatch(format!(
                "WgtObsNumEv bin extents {:?} vs {:?}",
                a.lengths(0),
                b.lengths(0)
            )));
        }
        Ok(())
    }

    /// Add `other` into `self`.
    ///
    /// Scalars and per-bin arrays are summed; `num_table` is summed too, so
    /// repeated merges count every contributing table. Fails without
    /// modifying `self` when the shapes differ.
    pub fn add(&mut self, other: &WgtStat) -> Result<()> {
        if let Err(e) = self.check_compatible(other) {
            log::error!("refusing to merge statistics: {}", e);
            return Err(e);
        }
        self.wgt_nevt += other.wgt_nevt;
        self.num_table = self.num_table.saturating_add(other.num_table);
        self.wgt_num_ev = self.wgt_num_ev.saturating_add(other.wgt_num_ev);
        self.wgt_sum_w2 += other.wgt_sum_w2;
        self.sig_sum_w2 += other.sig_sum_w2;
        self.sig_sum += other.sig_sum;
        self.wgt_obs_sum_w2.accumulate(&other.wgt_obs_sum_w2, "WgtObsSumW2")?;
        self.sig_obs_sum_w2.accumulate(&other.sig_obs_sum_w2, "SigObsSumW2")?;
        self.sig_obs_sum.accumulate(&other.sig_obs_sum, "SigObsSum")?;
        self.wgt_obs_num_ev.accumulate(&other.wgt_obs_num_ev, "WgtObsNumEv")?;
        Ok(())
    }

    /// Check that the per-bin arrays hold `n_obs_bins` entries per process.
    pub fn check_bin_layout(&self, n_obs_bins: usize) -> Result<()> {
        self.check_shape()?;
        let lengths = self.wgt_obs_num_ev.lengths(0);
        if lengths.iter().any(|&n| n != n_obs_bins) {
            return Err(TableError::ShapeMismatch(format!(
                "WgtObsNumEv extents {lengths:?} do not match {n_obs_bins} observable bins"
            )));
        }
        Ok(())
    }

    /// Remove observable bin `bin` from the per-bin arrays.
    ///
    /// Global counters are kept. Blocks without per-bin statistics are left
    /// untouched.
    pub fn erase_bin(&mut self, bin: usize, n_obs_bins: usize) -> Result<()> {
        if !self.has_bin_statistics() {
            return Ok(());
        }
        self.check_bin_layout(n_obs_bins)?;
        if bin >= n_obs_bins {
            return Err(TableError::ShapeMismatch(format!(
                "WgtStat: bin {bin} out of range ({n_obs_bins} bins)"
            )));
        }
        self.wgt_obs_sum_w2.remove_column(bin, "WgtObsSumW2")?;
        self.sig_obs_sum_w2.remove_column(bin, "SigObsSumW2")?;
        self.sig_obs_sum.remove_column(bin, "SigObsSum")?;
        self.wgt_obs_num_ev.remove_column(bin, "WgtObsNumEv")
    }

    /// Check that bin `bin` of `other` can be appended with
    /// [`cat_bin`](Self::cat_bin).
    pub fn check_cat_bin(&self, other: &WgtStat, bin: usize, n_obs_bins: usize) -> Result<()> {
        match (self.has_bin_statistics(), other.has_bin_statistics()) {
            (false, false) => return Ok(()),
            (true, true) => {}
            _ => {
                return Err(TableError::ShapeMismatch(
                    "only one block carries per-bin statistics".to_string(),
                ));
            }
        }
        self.check_bin_layout(n_obs_bins)?;
        other.check_shape()?;
        if other.n_proc() != self.n_proc() {
            return Err(TableError::ShapeMismatch(format!(
                "WgtObsNumEv has {} processes vs {}",
                self.n_proc(),
                other.n_proc()
            )));
        }
        if other.wgt_obs_num_ev.lengths(0).iter().any(|&n| bin >= n) {
            return Err(TableError::ShapeMismatch(format!("WgtStat: source has no bin {bin}")));
        }
        Ok(())
    }

    /// Append the per-bin statistics of bin `bin` of `other`.
    ///
    /// Global counters of `self` are kept.
    pub fn cat_bin(&mut self, other: &WgtStat, bin: usize, n_obs_bins: usize) -> Result<()> {
        self.check_cat_bin(other, bin, n_obs_bins)?;
        if !self.has_bin_statistics() {
            return Ok(());
        }
        self.wgt_obs_sum_w2.push_column(&column(&other.wgt_obs_sum_w2, bin), "WgtObsSumW2")?;
        self.sig_obs_sum_w2.push_column(&column(&other.sig_obs_sum_w2, bin), "SigObsSumW2")?;
        self.sig_obs_sum.push_column(&column(&other.sig_obs_sum, bin), "SigObsSum")?;
        self.wgt_obs_num_ev.push_column(&column(&other.wgt_obs_num_ev, bin), "WgtObsNumEv")
    }

    /// Read the four per-(process, bin) arrays in on-disk order.
    pub(crate) fn read_bin_arrays(&mut self, r: &mut TextBuffer) -> Result<()> {
        self.wgt_obs_sum_w2 = read_flexible_nested(r, 2, 0, 1.0, "WgtObsSumW2")?.0;
        self.sig_obs_sum_w2 = read_flexible_nested(r, 2, 0, 1.0, "SigObsSumW2")?.0;
        self.sig_obs_sum = read_flexible_nested(r, 2, 0, 1.0, "SigObsSum")?.0;
        self.wgt_obs_num_ev = read_flexible_nested(r, 2, 0, 1.0, "WgtObsNumEv")?.0;
        self.check_shape()
    }

    /// Write the four per-(process, bin) arrays.
    pub(crate) fn write_bin_arrays(&self, w: &mut TextWriter) {
        write_flexible_nested(w, &self.wgt_obs_sum_w2, true);
        write_flexible_nested(w, &self.sig_obs_sum_w2, true);
        write_flexible_nested(w, &self.sig_obs_sum, true);
        write_flexible_nested(w, &self.wgt_obs_num_ev, true);
    }
}

fn column<T: Scalar>(rows: &Jagged<T>, bin: usize) -> Vec<T> {
    rows.rows().filter_map(|r| r.get(bin).copied()).collect()
}

impl std::ops::Add<&WgtStat> for WgtStat {
    type Output = Result<WgtStat>;

    /// Chainable merge: `((a + &b)? + &c)?`.
    fn add(mut self, rhs: &WgtStat) -> Result<WgtStat> {
        WgtStat::add(&mut self, rhs)?;
        Ok(self)
    }
}
