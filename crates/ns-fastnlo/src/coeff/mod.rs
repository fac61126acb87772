//! Coefficient blocks.
//!
//! Every block opens with a magic number and a common base (units, flags and
//! descriptions). `IDataFlag`/`IAddMultFlag` then select one of three
//! mutually exclusive bodies:
//!
//! | IDataFlag | IAddMultFlag | body                  |
//! |-----------|--------------|-----------------------|
//! | 0         | 0            | [`CoeffAdd`]          |
//! | 0         | 1            | [`CoeffMult`]         |
//! | 1         | 0            | [`CoeffData`]         |

mod add;
mod layout;
mod systematics;

pub use add::{CoeffAdd, PdfDefinition, ScaleDefinition, nxmax, x_index};
pub use layout::{AddPreamble, NevtEncoding};
pub use systematics::{CoeffData, CoeffMult, SourcePairs, Systematics};

use serde::{Deserialize, Serialize};

use crate::codec::{read_flexible_lines, write_flexible_lines};
use crate::error::{Result, TableError};
use crate::framing::{read_magic_number, write_magic_number};
use crate::text::{TextBuffer, TextWriter};
use crate::version::TableLayout;

/// Kind of a coefficient block.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum ContributionKind {
    /// Additive fixed-order contribution.
    Additive,
    /// Multiplicative correction factors.
    Multiplicative,
    /// Measured data points.
    Data,
}

impl ContributionKind {
    /// Classify a block from its discriminator flags.
    pub fn classify(data_flag: i32, add_mult_flag: i32) -> Result<Self> {
        match (data_flag, add_mult_flag) {
            (0, 0) => Ok(ContributionKind::Additive),
            (0, 1) => Ok(ContributionKind::Multiplicative),
            (1, 0) => Ok(ContributionKind::Data),
            _ => {
                log::error!(
                    "could not identify coefficient table: IDataFlag={}, IAddMultFlag={}",
                    data_flag,
                    add_mult_flag
                );
                Err(TableError::UnknownContributionType { data_flag, add_mult_flag })
            }
        }
    }
}

/// Fields shared by every coefficient block.
#[derive(Debug, Clone, PartialEq)]
pub struct CoeffBase {
    /// Cross sections stored in units of `10^-IXsectUnits` barn.
    pub ixsect_units: i32,
    /// `IDataFlag`.
    pub idata_flag: i32,
    /// `IAddMultFlag`.
    pub iadd_mult_flag: i32,
    /// `IContrFlag1` (1: fixed order).
    pub icontr_flag1: i32,
    /// `IContrFlag2` (1: LO, 2: NLO, 3: NNLO).
    pub icontr_flag2: i32,
    /// `NScaleDep`.
    pub nscale_dep: i32,
    /// Contribution description.
    pub ctrb_descript: Vec<String>,
    /// Generator code description.
    pub code_descript: Vec<String>,
}

impl CoeffBase {
    /// Read the base fields following a block's magic number.
    pub fn read(r: &mut TextBuffer) -> Result<Self> {
        let ixsect_units = r.read_i32("IXsectUnits")?;
        let idata_flag = r.read_i32("IDataFlag")?;
        let iadd_mult_flag = r.read_i32("IAddMultFlag")?;
        let icontr_flag1 = r.read_i32("IContrFlag1")?;
        let icontr_flag2 = r.read_i32("IContrFlag2")?;
        let nscale_dep = r.read_i32("NScaleDep")?;
        let (ctrb_descript, _) = read_flexible_lines(r, 0, "CtrbDescript")?;
        let (code_descript, _) = read_flexible_lines(r, 0, "CodeDescript")?;
        Ok(Self {
            ixsect_units,
            idata_flag,
            iadd_mult_flag,
            icontr_flag1,
            icontr_flag2,
            nscale_dep,
            ctrb_descript,
            code_descript,
        })
    }

    /// Kind selected by the discriminator flags.
    pub fn kind(&self) -> Result<ContributionKind> {
        ContributionKind::classify(self.idata_flag, self.iadd_mult_flag)
    }

    /// Whether `other` describes the same kind of contribution.
    pub fn is_compatible(&self, other: &CoeffBase) -> bool {
        self.ixsect_units == other.ixsect_units
            && self.idata_flag == other.idata_flag
            && self.iadd_mult_flag == other.iadd_mult_flag
            && self.icontr_flag1 == other.icontr_flag1
            && self.icontr_flag2 == other.icontr_flag2
            && self.nscale_dep == other.nscale_dep
    }

    /// Write the base fields (without the opening magic number).
    pub fn write(&self, w: &mut TextWriter) {
        w.value(self.ixsect_units);
        w.value(self.idata_flag);
        w.value(self.iadd_mult_flag);
        w.value(self.icontr_flag1);
        w.value(self.icontr_flag2);
        w.value(self.nscale_dep);
        write_flexible_lines(w, &self.ctrb_descript);
        write_flexible_lines(w, &self.code_descript);
    }
}

/// Table-wide facts a block body needs while being read.
#[derive(Debug, Clone, Copy)]
pub struct BlockContext {
    /// Layout family of the table.
    pub layout: TableLayout,
    /// Number of observable bins.
    pub n_obs_bins: usize,
    /// Reject any x-interpolation storage other than the half matrix.
    pub require_half_matrix: bool,
}

pub(crate) fn bin_out_of_range(bin: usize, n: usize) -> TableError {
    TableError::ShapeMismatch(format!("observable bin {bin} out of range ({n} bins)"))
}

/// `bin` must exist and must not be the only remaining bin.
pub(crate) fn check_erasable(bin: usize, n: usize) -> Result<()> {
    if bin >= n {
        return Err(bin_out_of_range(bin, n));
    }
    if n == 1 {
        return Err(TableError::ShapeMismatch("cannot erase the only observable bin".to_string()));
    }
    Ok(())
}

/// One decoded coefficient block.
#[derive(Debug, Clone, PartialEq)]
pub enum Contribution {
    /// Additive contribution.
    Additive(CoeffAdd),
    /// Multiplicative contribution.
    Multiplicative(CoeffMult),
    /// Data contribution.
    Data(CoeffData),
}

impl Contribution {
    /// Read one complete block, magic number included.
    pub fn read(r: &mut TextBuffer, ctx: &BlockContext) -> Result<Self> {
        read_magic_number(r, "coefficient block")?;
        let base = CoeffBase::read(r)?;
        let kind = base.kind()?;
        log::debug!("reading {:?} contribution '{}'", kind, base.ctrb_descript.join(" "));
        Ok(match kind {
            ContributionKind::Additive => Contribution::Additive(CoeffAdd::read(r, base, ctx)?),
            ContributionKind::Multiplicative => {
                Contribution::Multiplicative(CoeffMult::read(r, base, ctx.n_obs_bins)?)
            }
            ContributionKind::Data => Contribution::Data(CoeffData::read(r, base, ctx.n_obs_bins)?),
        })
    }

    /// Write the block, magic number included.
    pub fn write(&self, w: &mut TextWriter, layout: TableLayout) {
        write_magic_number(w);
        match self {
            Contribution::Additive(c) => c.write(w, layout),
            Contribution::Multiplicative(c) => c.write(w),
            Contribution::Data(c) => c.write(w),
        }
    }

    /// Common base fields.
    pub fn base(&self) -> &CoeffBase {
        match self {
            Contribution::Additive(c) => &c.base,
            Contribution::Multiplicative(c) => &c.base,
            Contribution::Data(c) => &c.base,
        }
    }

    /// Kind of the block.
    pub fn kind(&self) -> ContributionKind {
        match self {
            Contribution::Additive(_) => ContributionKind::Additive,
            Contribution::Multiplicative(_) => ContributionKind::Multiplicative,
            Contribution::Data(_) => ContributionKind::Data,
        }
    }

    /// The additive body, if this is an additive block.
    pub fn as_additive(&self) -> Option<&CoeffAdd> {
        match self {
            Contribution::Additive(c) => Some(c),
            _ => None,
        }
    }

    /// Mutable additive body.
    pub fn as_additive_mut(&mut self) -> Option<&mut CoeffAdd> {
        match self {
            Contribution::Additive(c) => Some(c),
            _ => None,
        }
    }

    /// Check that [`erase_bin`](Self::erase_bin) would succeed.
    pub fn check_erase_bin(&self, bin: usize) -> Result<()> {
        match self {
            Contribution::Additive(c) => c.check_erase_bin(bin),
            Contribution::Multiplicative(c) => check_erasable(bin, c.n_obs_bins()),
            Contribution::Data(c) => check_erasable(bin, c.n_obs_bins()),
        }
    }

    /// Remove observable bin `bin`.
    pub fn erase_bin(&mut self, bin: usize) -> Result<()> {
        match self {
            Contribution::Additive(c) => c.erase_bin(bin),
            Contribution::Multiplicative(c) => c.erase_bin(bin),
            Contribution::Data(c) => c.erase_bin(bin),
        }
    }

    /// Check that bin `bin` of `other` can be appended with
    /// [`cat_bin`](Self::cat_bin).
    pub fn check_cat_bin(&self, other: &Contribution, bin: usize) -> Result<()> {
        match (self, other) {
            (Contribution::Additive(a), Contribution::Additive(b)) => a.check_cat_bin(b, bin),
            (Contribution::Multiplicative(a), Contribution::Multiplicative(b)) => a.check_cat_bin(b, bin),
            (Contribution::Data(a), Contribution::Data(b)) => a.check_cat_bin(b, bin),
            _ => Err(TableError::ShapeMismatch(format!(
                "cannot append a {:?} bin to a {:?} contribution",
                other.kind(),
                self.kind()
            ))),
        }
    }

    /// Append bin `bin` of `other` as a new last observable bin.
    pub fn cat_bin(&mut self, other: &Contribution, bin: usize) -> Result<()> {
        self.check_cat_bin(other, bin)?;
        match (self, other) {
            (Contribution::Additive(a), Contribution::Additive(b)) => a.cat_bin(b, bin),
            (Contribution::Multiplicative(a), Contribution::Multiplicative(b)) => a.cat_bin(b, bin),
            (Contribution::Data(a), Contribution::Data(b)) => a.cat_bin(b, bin),
            _ => Ok(()),
        }
    }
}
