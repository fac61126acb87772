//! Serializable overview of a table for tooling.

use serde::{Deserialize, Serialize};

use crate::coeff::{Contribution, ContributionKind};
use crate::table::{Diagnostic, FastNloTable};
use crate::version::TableLayout;
use crate::wgt_stat::WgtStat;

/// Scalar part of a [`WgtStat`].
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct WgtStatSummary {
    /// `WgtNevt`.
    pub wgt_nevt: f64,
    /// `NumTable`.
    pub num_table: i32,
    /// `WgtNumEv`.
    pub wgt_num_ev: u64,
    /// `WgtSumW2`.
    pub wgt_sum_w2: f64,
    /// `SigSumW2`.
    pub sig_sum_w2: f64,
    /// `SigSum`.
    pub sig_sum: f64,
    /// Whether per-(process, bin) arrays are present.
    pub has_bin_statistics: bool,
}

impl From<&WgtStat> for WgtStatSummary {
    fn from(w: &WgtStat) -> Self {
        Self {
            wgt_nevt: w.wgt_nevt,
            num_table: w.num_table,
            wgt_num_ev: w.wgt_num_ev,
            wgt_sum_w2: w.wgt_sum_w2,
            sig_sum_w2: w.sig_sum_w2,
            sig_sum: w.sig_sum,
            has_bin_statistics: w.has_bin_statistics(),
        }
    }
}

/// One coefficient block.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ContributionSummary {
    /// Block kind.
    pub kind: ContributionKind,
    /// Contribution description lines.
    pub description: Vec<String>,
    /// `IContrFlag1`.
    pub icontr_flag1: i32,
    /// `IContrFlag2`.
    pub icontr_flag2: i32,
    /// Power of alpha_s (additive only).
    pub npow: Option<i32>,
    /// x storage scheme (additive only).
    pub npdf_dim: Option<i32>,
    /// Number of subprocesses (additive only).
    pub n_subproc: Option<usize>,
    /// Event normalisation (additive only).
    pub nevt: Option<f64>,
    /// Statistics (additive only).
    pub wgt_stat: Option<WgtStatSummary>,
    /// Number of uncertainty sources (multiplicative and data only).
    pub n_sources: Option<usize>,
}

impl From<&Contribution> for ContributionSummary {
    fn from(c: &Contribution) -> Self {
        let base = c.base();
        let mut s = Self {
            kind: c.kind(),
            description: base.ctrb_descript.clone(),
            icontr_flag1: base.icontr_flag1,
            icontr_flag2: base.icontr_flag2,
            npow: None,
            npdf_dim: None,
            n_subproc: None,
            nevt: None,
            wgt_stat: None,
            n_sources: None,
        };
        match c {
            Contribution::Additive(a) => {
                s.npow = Some(a.npow());
                s.npdf_dim = Some(a.npdf_dim());
                s.n_subproc = Some(a.n_subproc());
                s.nevt = Some(a.nevt());
                s.wgt_stat = Some(a.wgt_stat().into());
            }
            Contribution::Multiplicative(m) => {
                s.n_sources = Some(m.uncorrelated().n_sources() + m.correlated().n_sources());
            }
            Contribution::Data(d) => {
                s.n_sources = Some(d.uncorrelated().n_sources() + d.correlated().n_sources());
            }
        }
        s
    }
}

/// Overview of a whole table.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TableSummary {
    /// Table version.
    pub version: i32,
    /// Layout family.
    pub layout: TableLayout,
    /// Scenario name.
    pub scenario_name: String,
    /// Centre-of-mass energy in GeV.
    pub ecms: f64,
    /// Leading order power of alpha_s.
    pub ilo_ord: i32,
    /// Number of observable bins.
    pub n_obs_bins: usize,
    /// Dimension labels, outermost first.
    pub dim_labels: Vec<String>,
    /// Coefficient blocks in file order.
    pub contributions: Vec<ContributionSummary>,
    /// Anomalies tolerated while reading.
    pub diagnostics: Vec<Diagnostic>,
}

impl TableSummary {
    /// Summarise `table`.
    pub fn new(table: &FastNloTable) -> Self {
        let scenario = table.scenario();
        Self {
            version: table.version(),
            layout: table.layout(),
            scenario_name: table.header().scenario_name.clone(),
            ecms: scenario.ecms,
            ilo_ord: scenario.ilo_ord,
            n_obs_bins: table.n_obs_bins(),
            dim_labels: table.binning().labels().to_vec(),
            contributions: table.contributions().iter().map(ContributionSummary::from).collect(),
            diagnostics: table.diagnostics().entries().to_vec(),
        }
    }

    /// Pretty-printed JSON.
    pub fn to_json_pretty(&self) -> serde_json::Result<String> {
        serde_json::to_string_pretty(self)
    }
}

impl From<&FastNloTable> for TableSummary {
    fn from(table: &FastNloTable) -> Self {
        Self::new(table)
    }
}
