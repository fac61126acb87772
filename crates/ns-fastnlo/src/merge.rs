//! Weighting options for combining additive contributions.
//!
//! Independent generator runs of one contribution are combined either by
//! summing (`Add`, `Merge`) or by a weighted mean of their per-event
//! normalised coefficients. Weighted means use a global or a
//! per-(bin, subprocess) weight taken from each run's statistics block.

use std::fmt;
use std::str::FromStr;

use serde::{Deserialize, Serialize};

use crate::error::{Result, TableError};
use crate::jagged::Jagged;
use crate::wgt_stat::WgtStat;

/// How two compatible additive contributions are combined.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum MergeWeighting {
    /// Plain sum of coefficients; `Nevt` is left unchanged.
    Add,
    /// Sum of coefficients and of `Nevt` (runs with equal per-event weights).
    Merge,
    /// Unweighted mean of the normalised coefficients.
    Unweighted,
    /// Mean weighted by `WgtNevt`.
    WgtNevt,
    /// Mean weighted by the number of entries.
    NumEvent,
    /// Mean weighted by the sum of weight².
    SumW2,
    /// Mean weighted by the sum of sigma².
    SumSig2,
    /// Mean weighted by the number of entries per bin and subprocess.
    NumEventBinProc,
    /// Mean weighted by the sum of weight² per bin and subprocess.
    SumW2BinProc,
    /// Mean weighted by the sum of sigma² per bin and subprocess.
    SumSig2BinProc,
}

impl MergeWeighting {
    /// All options, in declaration order.
    pub const ALL: [MergeWeighting; 10] = [
        MergeWeighting::Add,
        MergeWeighting::Merge,
        MergeWeighting::Unweighted,
        MergeWeighting::WgtNevt,
        MergeWeighting::NumEvent,
        MergeWeighting::SumW2,
        MergeWeighting::SumSig2,
        MergeWeighting::NumEventBinProc,
        MergeWeighting::SumW2BinProc,
        MergeWeighting::SumSig2BinProc,
    ];

    /// Whether this option forms a weighted mean of normalised coefficients.
    pub fn is_mean(self) -> bool {
        !matches!(self, MergeWeighting::Add | MergeWeighting::Merge)
    }

    /// Whether the weight depends on bin and subprocess.
    pub fn is_bin_proc(self) -> bool {
        matches!(
            self,
            MergeWeighting::NumEventBinProc
                | MergeWeighting::SumW2BinProc
                | MergeWeighting::SumSig2BinProc
        )
    }

    /// Canonical option name.
    pub fn name(self) -> &'static str {
        match self {
            MergeWeighting::Add => "add",
            MergeWeighting::Merge => "merge",
            MergeWeighting::Unweighted => "unweighted",
            MergeWeighting::WgtNevt => "wgtnevt",
            MergeWeighting::NumEvent => "numevent",
            MergeWeighting::SumW2 => "sumw2",
            MergeWeighting::SumSig2 => "sumsig2",
            MergeWeighting::NumEventBinProc => "numeventbinproc",
            MergeWeighting::SumW2BinProc => "sumw2binproc",
            MergeWeighting::SumSig2BinProc => "sumsig2binproc",
        }
    }

    /// Check that `stat` provides what this option reads for a block with
    /// `n_subproc` subprocesses and `n_obs_bins` bins.
    pub fn check_statistics(self, stat: &WgtStat, n_subproc: usize, n_obs_bins: usize) -> Result<()> {
        if !self.is_bin_proc() {
            return Ok(());
        }
        let lengths = stat.wgt_obs_num_ev.lengths(0);
        if lengths.len() != n_subproc || lengths.iter().any(|&l| l != n_obs_bins) {
            return Err(TableError::ShapeMismatch(format!(
                "merge option '{}' needs per-bin statistics [{}][{}], found extents {:?}",
                self.name(),
                n_subproc,
                n_obs_bins,
                lengths
            )));
        }
        Ok(())
    }

    /// Weight of `stat` for `(bin, proc)`.
    ///
    /// Bin-process options assume [`check_statistics`](Self::check_statistics)
    /// has passed; out-of-range indices weigh zero.
    pub fn weight(self, stat: &WgtStat, bin: usize, proc: usize) -> f64 {
        let per_bin = |j: &Jagged<f64>| {
            j.row(proc).and_then(|row| row.get(bin)).copied().unwrap_or(0.0)
        };
        match self {
            MergeWeighting::Add | MergeWeighting::Merge | MergeWeighting::Unweighted => 1.0,
            MergeWeighting::WgtNevt => stat.wgt_nevt,
            MergeWeighting::NumEvent => stat.wgt_num_ev as f64,
            MergeWeighting::SumW2 => stat.wgt_sum_w2,
            MergeWeighting::SumSig2 => stat.sig_sum_w2,
            MergeWeighting::NumEventBinProc => stat
                .wgt_obs_num_ev
                .row(proc)
                .and_then(|row| row.get(bin))
                .map_or(0.0, |&n| n as f64),
            MergeWeighting::SumW2BinProc => per_bin(&stat.wgt_obs_sum_w2),
            MergeWeighting::SumSig2BinProc => per_bin(&stat.sig_obs_sum_w2),
        }
    }
}

impl fmt::Display for MergeWeighting {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.name())
    }
}

impl FromStr for MergeWeighting {
    type Err = TableError;

    fn from_str(s: &str) -> Result<Self> {
        let key: String = s.chars().filter(|c| *c != '_' && *c != '-').collect();
        let key = key.to_ascii_lowercase();
        MergeWeighting::ALL.into_iter().find(|m| m.name() == key).ok_or_else(|| {
            TableError::UnimplementedConfiguration(format!("unknown merge option '{s}'"))
        })
    }
}

/// Weighted mean of two per-event normalised values.
///
/// Falls back to the unweighted mean when both weights vanish.
pub(crate) fn weighted_mean(x1: f64, w1: f64, x2: f64, w2: f64) -> f64 {
    let wsum = w1 + w2;
    if wsum == 0.0 { 0.5 * (x1 + x2) } else { (w1 * x1 + w2 * x2) / wsum }
}
