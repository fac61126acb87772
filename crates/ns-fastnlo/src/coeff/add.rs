//! Additive fixed-order contributions.
//!
//! An additive block stores the coefficient tensor
//! `SigmaTilde[bin][scalevar][scalenode][x][subproc]` together with the
//! interpolation nodes it is defined on. The x extent depends on the bin and
//! on how the two PDF momentum fractions are stored:
//!
//! | NPDFDim | storage      | nxmax         | index of `(ix1, ix2)`     |
//! |---------|--------------|---------------|---------------------------|
//! | 0       | linear       | `n1`          | `ix1`                     |
//! | 1       | half matrix  | `(n1²+n1)/2`  | `ix1 + ix2·(ix2+1)/2`     |
//! | 2       | full matrix  | `n1·n2`       | `ix1 + ix2·n1`            |

use crate::codec::{UnusedSection, read_fixed, read_flexible, read_flexible_lines, write_fixed, write_flexible, write_flexible_lines};
use crate::coeff::layout::{AddPreamble, NevtEncoding};
use crate::coeff::{BlockContext, CoeffBase, bin_out_of_range, check_erasable};
use crate::error::{Result, TableError};
use crate::jagged::Jagged;
use crate::merge::{MergeWeighting, weighted_mean};
use crate::tensor::{BinTensor, Tensor};
use crate::text::{TextBuffer, TextWriter};
use crate::version::TableLayout;
use crate::wgt_stat::WgtStat;

/// Relative tolerance for comparing node coordinates of two tables.
const NODE_TOLERANCE: f64 = 1e-8;

/// Number of x entries of one bin for the given storage scheme.
///
/// Returns 0 for an unknown scheme.
pub fn nxmax(npdf_dim: i32, n1: usize, n2: usize) -> usize {
    match npdf_dim {
        0 => n1,
        1 => (n1 * n1 + n1) / 2,
        2 => n1 * n2,
        _ => 0,
    }
}

/// Position of the node pair `(ix1, ix2)` in the x dimension.
///
/// The half matrix stores only `ix1 <= ix2`; linear storage only `ix2 == 0`.
pub fn x_index(npdf_dim: i32, n1: usize, n2: usize, ix1: usize, ix2: usize) -> Option<usize> {
    match npdf_dim {
        0 if ix1 < n1 && ix2 == 0 => Some(ix1),
        1 if ix1 <= ix2 && ix2 < n1 => Some(ix1 + ix2 * (ix2 + 1) / 2),
        2 if ix1 < n1 && ix2 < n2 => Some(ix1 + ix2 * n1),
        _ => None,
    }
}

/// PDF and subprocess definition of an additive block.
#[derive(Debug, Clone, PartialEq)]
pub struct PdfDefinition {
    /// PDG codes of the incoming hadrons.
    pub npdf_pdg: Vec<i32>,
    /// x storage scheme (`NPDFDim`).
    pub npdf_dim: i32,
    /// Number of fragmentation functions; always 0 here.
    pub nfrag_func: i32,
    /// `NFFDim`.
    pub nff_dim: i32,
    /// Number of partonic subprocesses.
    pub nsubproc: usize,
    /// `IPDFdef1`, `IPDFdef2`, `IPDFdef3`.
    pub ipdf_def: [i32; 3],
}

impl PdfDefinition {
    fn read(r: &mut TextBuffer, require_half_matrix: bool) -> Result<Self> {
        let npdf = r.read_count("NPDF")?;
        r.ensure_tokens(npdf, "NPDFPDG")?;
        let mut npdf_pdg = vec![0i32; npdf];
        read_fixed(r, &mut npdf_pdg, 1.0, "NPDFPDG")?;
        let npdf_dim = r.read_i32("NPDFDim")?;
        if !(0..=2).contains(&npdf_dim) || (require_half_matrix && npdf_dim != 1) {
            log::error!("NPDFDim={} (x-interpolation storage) is not supported", npdf_dim);
            return Err(TableError::UnimplementedConfiguration(format!(
                "NPDFDim={npdf_dim}: x-interpolation storage other than {}",
                if require_half_matrix { "the half matrix" } else { "linear, half or full matrix" }
            )));
        }
        let nfrag_func = r.read_i32("NFragFunc")?;
        if nfrag_func > 0 {
            log::error!("NFragFunc={} > 0 is not implemented", nfrag_func);
            return Err(TableError::UnimplementedConfiguration(format!(
                "fragmentation functions (NFragFunc={nfrag_func})"
            )));
        }
        let nff_dim = r.read_i32("NFFDim")?;
        let nsubproc = r.read_count("NSubproc")?;
        if nsubproc == 0 {
            return Err(TableError::InvalidDimension { field: "NSubproc", index: 0, value: 0 });
        }
        let ipdf_def = [r.read_i32("IPDFdef1")?, r.read_i32("IPDFdef2")?, r.read_i32("IPDFdef3")?];
        if ipdf_def[0] == 0 || ipdf_def[1] == 0 {
            log::error!("IPDFdef1={} IPDFdef2={} is not implemented", ipdf_def[0], ipdf_def[1]);
            return Err(TableError::UnimplementedConfiguration(format!(
                "explicit PDF coefficient lists (IPDFdef1={}, IPDFdef2={})",
                ipdf_def[0], ipdf_def[1]
            )));
        }
        Ok(Self { npdf_pdg, npdf_dim, nfrag_func, nff_dim, nsubproc, ipdf_def })
    }

    fn write(&self, w: &mut TextWriter) {
        write_flexible(w, &self.npdf_pdg, true);
        w.value(self.npdf_dim);
        w.value(self.nfrag_func);
        w.value(self.nff_dim);
        w.count(self.nsubproc);
        for &d in &self.ipdf_def {
            w.value(d);
        }
    }
}

/// Scale definition of an additive block.
///
/// Only one scale dimension is supported, so every per-dimension vector has
/// exactly one entry.
#[derive(Debug, Clone, PartialEq)]
pub struct ScaleDefinition {
    /// `Iscale` (one entry per scale, not interpreted).
    pub iscale: Vec<i32>,
    /// Description lines per scale dimension.
    pub descript: Vec<Vec<String>>,
    /// Sections that v2.4+ stores after the descriptions.
    pub extras: Option<[UnusedSection; 2]>,
    /// Number of scale variations per dimension.
    pub nscalevar: Vec<usize>,
    /// Number of scale nodes per dimension.
    pub nscalenode: Vec<usize>,
    /// Scale factors per dimension.
    pub scale_fac: Vec<Vec<f64>>,
}

impl ScaleDefinition {
    fn read(r: &mut TextBuffer, layout: TableLayout) -> Result<Self> {
        let nscales = r.read_count("NScales")?;
        let nscale_dim = r.read_count("NScaleDim")?;
        if nscale_dim == 0 {
            return Err(TableError::InvalidDimension { field: "NScaleDim", index: 0, value: 0 });
        }
        if nscale_dim > 1 {
            log::error!("NScaleDim={} > 1 is not implemented", nscale_dim);
            return Err(TableError::UnimplementedConfiguration(format!(
                "flexible-scale layout (NScaleDim={nscale_dim})"
            )));
        }
        r.ensure_tokens(nscales, "Iscale")?;
        let mut iscale = vec![0i32; nscales];
        read_fixed(r, &mut iscale, 1.0, "Iscale")?;
        let mut descript = Vec::with_capacity(nscale_dim);
        for _ in 0..nscale_dim {
            descript.push(read_flexible_lines(r, 0, "ScaleDescript")?.0);
        }
        let extras = layout.read_scale_extras(r)?;
        let (mut nscalevar, mut nscalenode) = (Vec::new(), Vec::new());
        for d in 0..nscale_dim {
            for (field, out) in [("Nscalevar", &mut nscalevar), ("Nscalenode", &mut nscalenode)] {
                let n = r.read_count(field)?;
                if n == 0 {
                    return Err(TableError::InvalidDimension { field, index: d, value: 0 });
                }
                out.push(n);
            }
        }
        let mut scale_fac = Vec::with_capacity(nscale_dim);
        for &n in &nscalevar {
            scale_fac.push(read_flexible::<f64>(r, n, 1.0, "ScaleFac")?.0);
        }
        Ok(Self { iscale, descript, extras, nscalevar, nscalenode, scale_fac })
    }

    fn write(&self, w: &mut TextWriter, layout: TableLayout) {
        w.count(self.iscale.len());
        w.count(self.descript.len());
        write_fixed(w, &self.iscale);
        for d in &self.descript {
            write_flexible_lines(w, d);
        }
        layout.write_scale_extras(w, self.extras.as_ref());
        for (&v, &n) in self.nscalevar.iter().zip(&self.nscalenode) {
            w.count(v);
            w.count(n);
        }
        for f in &self.scale_fac {
            write_flexible(w, f, false);
        }
    }

    /// Number of scale dimensions.
    pub fn n_scale_dim(&self) -> usize {
        self.descript.len()
    }

    /// Product of the scale-variation counts of all dimensions.
    pub fn total_scalevars(&self) -> usize {
        self.nscalevar.iter().product()
    }
}

/// An additive fixed-order contribution.
#[derive(Debug, Clone, PartialEq)]
pub struct CoeffAdd {
    /// Common base fields.
    pub base: CoeffBase,
    preamble: Option<AddPreamble>,
    iref: i32,
    iscale_dep: i32,
    nevt: f64,
    nevt_encoding: NevtEncoding,
    wgt: WgtStat,
    npow: i32,
    pdf: PdfDefinition,
    xnode1: Jagged<f64>,
    xnode2: Option<Jagged<f64>>,
    scales: ScaleDefinition,
    /// `[bin][1][scalevar][scalenode]`.
    scale_node: Tensor<f64>,
    sigma_tilde: BinTensor<f64>,
}

impl CoeffAdd {
    pub(crate) fn read(r: &mut TextBuffer, base: CoeffBase, ctx: &BlockContext) -> Result<Self> {
        let layout = ctx.layout;
        let nobs = ctx.n_obs_bins;
        let preamble = layout.read_add_preamble(r)?;
        let iref = r.read_i32("IRef")?;
        let iscale_dep = r.read_i32("IScaleDep")?;
        let mut wgt = WgtStat::default();
        let (nevt, nevt_encoding) = layout.read_event_counts(r, &mut wgt)?;
        let npow = r.read_i32("Npow")?;
        let pdf = PdfDefinition::read(r, ctx.require_half_matrix)?;

        let xnode1 = read_x_nodes(r, nobs, "XNode1")?;
        let xnode2 =
            if pdf.npdf_dim == 2 { Some(read_x_nodes(r, nobs, "XNode2")?) } else { None };

        let scales = ScaleDefinition::read(r, layout)?;
        let (nsv, nsn) = (scales.nscalevar[0] as i64, scales.nscalenode[0] as i64);
        let (scale_node, _) = Tensor::read(r, "ScaleNode", &[nobs as i64, 1, nsv, nsn], 1.0)?;

        let total_scalevars = scales.total_scalevars() as i64;
        let extents: Vec<Vec<i64>> = (0..nobs)
            .map(|bin| {
                let n1 = xnode1.row(bin).map_or(0, <[f64]>::len);
                let n2 = xnode2.as_ref().and_then(|x| x.row(bin)).map_or(0, <[f64]>::len);
                let nx = nxmax(pdf.npdf_dim, n1, n2) as i64;
                vec![total_scalevars, nsn, nx, pdf.nsubproc as i64]
            })
            .collect();
        let (sigma_tilde, n_read) = BinTensor::read(r, "SigmaTilde", &extents, 1.0)?;
        log::debug!(
            "additive block: Npow={} NSubproc={} Nevt={} ({} coefficients)",
            npow,
            pdf.nsubproc,
            nevt,
            n_read
        );

        Ok(Self {
            base,
            preamble,
            iref,
            iscale_dep,
            nevt,
            nevt_encoding,
            wgt,
            npow,
            pdf,
            xnode1,
            xnode2,
            scales,
            scale_node,
            sigma_tilde,
        })
    }

    pub(crate) fn write(&self, w: &mut TextWriter, layout: TableLayout) {
        self.base.write(w);
        layout.write_add_preamble(w, self.preamble.as_ref());
        w.value(self.iref);
        w.value(self.iscale_dep);
        layout.write_event_counts(w, self.nevt, self.nevt_encoding, &self.wgt);
        w.value(self.npow);
        self.pdf.write(w);
        write_x_nodes(w, &self.xnode1);
        if let Some(x2) = &self.xnode2 {
            write_x_nodes(w, x2);
        }
        self.scales.write(w, layout);
        self.scale_node.write(w);
        self.sigma_tilde.write(w);
    }

    /// Number of observable bins.
    pub fn n_obs_bins(&self) -> usize {
        self.sigma_tilde.n_bins()
    }

    /// `[IPDFdef1, IPDFdef2, IPDFdef3]`.
    pub fn ipdf_def(&self) -> [i32; 3] {
        self.pdf.ipdf_def
    }

    /// PDG codes of the incoming hadrons.
    pub fn npdf_pdg(&self) -> &[i32] {
        &self.pdf.npdf_pdg
    }

    /// x storage scheme.
    pub fn npdf_dim(&self) -> i32 {
        self.pdf.npdf_dim
    }

    /// PDF and subprocess definition.
    pub fn pdf_definition(&self) -> &PdfDefinition {
        &self.pdf
    }

    /// Number of partonic subprocesses.
    pub fn n_subproc(&self) -> usize {
        self.pdf.nsubproc
    }

    /// Power of alpha_s.
    pub fn npow(&self) -> i32 {
        self.npow
    }

    /// `IRef` flag.
    pub fn iref(&self) -> i32 {
        self.iref
    }

    /// Whether this is a reference contribution.
    pub fn is_reference(&self) -> bool {
        self.iref > 0
    }

    /// `IScaleDep` flag.
    pub fn iscale_dep(&self) -> i32 {
        self.iscale_dep
    }

    /// Event-count normalisation of the coefficients.
    pub fn nevt(&self) -> f64 {
        self.nevt
    }

    /// How `Nevt` is stored on disk.
    pub fn nevt_encoding(&self) -> NevtEncoding {
        self.nevt_encoding
    }

    /// First-PDF x nodes of `bin`.
    pub fn x_nodes1(&self, bin: usize) -> Option<&[f64]> {
        self.xnode1.row(bin)
    }

    /// Second-PDF x nodes of `bin` (full-matrix storage only).
    pub fn x_nodes2(&self, bin: usize) -> Option<&[f64]> {
        self.xnode2.as_ref()?.row(bin)
    }

    /// Number of first-PDF x nodes in `bin`.
    pub fn nxtot1(&self, bin: usize) -> usize {
        self.x_nodes1(bin).map_or(0, <[f64]>::len)
    }

    /// Number of second-PDF x nodes in `bin`, if stored.
    pub fn nxtot2(&self, bin: usize) -> Option<usize> {
        self.x_nodes2(bin).map(<[f64]>::len)
    }

    /// x extent of the coefficient tensor in `bin`.
    pub fn nxmax(&self, bin: usize) -> usize {
        nxmax(self.pdf.npdf_dim, self.nxtot1(bin), self.nxtot2(bin).unwrap_or(0))
    }

    /// Position of `(ix1, ix2)` in the x dimension of `bin`.
    pub fn x_index(&self, bin: usize, ix1: usize, ix2: usize) -> Option<usize> {
        x_index(self.pdf.npdf_dim, self.nxtot1(bin), self.nxtot2(bin).unwrap_or(0), ix1, ix2)
    }

    /// Node pairs `(ix1, ix2)` of `bin` in storage order.
    pub fn x_index_pairs(&self, bin: usize) -> Vec<(usize, usize)> {
        let n1 = self.nxtot1(bin);
        let mut pairs = Vec::with_capacity(self.nxmax(bin));
        match self.pdf.npdf_dim {
            0 => pairs.extend((0..n1).map(|i| (i, 0))),
            1 => {
                for ix2 in 0..n1 {
                    pairs.extend((0..=ix2).map(|ix1| (ix1, ix2)));
                }
            }
            _ => {
                for ix2 in 0..self.nxtot2(bin).unwrap_or(0) {
                    pairs.extend((0..n1).map(|ix1| (ix1, ix2)));
                }
            }
        }
        pairs
    }

    /// Scale definition.
    pub fn scales(&self) -> &ScaleDefinition {
        &self.scales
    }

    /// Scale-node tensor `[bin][1][scalevar][scalenode]`.
    pub fn scale_nodes(&self) -> &Tensor<f64> {
        &self.scale_node
    }

    /// Scale node `inode` of variation `ivar` in `bin`.
    pub fn scale_node(&self, bin: usize, ivar: usize, inode: usize) -> Option<f64> {
        self.scale_node.get(&[bin, 0, ivar, inode])
    }

    /// Scale factors of the first scale dimension.
    pub fn scale_factors(&self) -> &[f64] {
        self.scales.scale_fac.first().map_or(&[], Vec::as_slice)
    }

    /// Index of the scale variation with factor 1.
    pub fn central_scale_index(&self) -> Option<usize> {
        self.scale_factors().iter().position(|f| (f - 1.0).abs() < 1e-5)
    }

    /// Coefficient tensor `[bin][scalevar][scalenode][x][subproc]`.
    pub fn sigma_tilde(&self) -> &BinTensor<f64> {
        &self.sigma_tilde
    }

    /// Weight and event statistics.
    pub fn wgt_stat(&self) -> &WgtStat {
        &self.wgt
    }

    /// Mutable weight and event statistics.
    pub fn wgt_stat_mut(&mut self) -> &mut WgtStat {
        &mut self.wgt
    }

    /// Zero all coefficients and event counters.
    pub fn clear(&mut self) {
        self.sigma_tilde.as_mut_slice().fill(0.0);
        self.nevt = 0.0;
        self.wgt.erase();
    }

    /// Rescale coefficients so that `Nevt == wgt`.
    pub fn normalize_coefficients(&mut self, wgt: f64) -> Result<()> {
        if self.nevt == 0.0 {
            return Err(TableError::UnimplementedConfiguration(
                "cannot normalise coefficients of a contribution with Nevt = 0".to_string(),
            ));
        }
        let f = wgt / self.nevt;
        self.multiply_coefficients(f);
        self.nevt = wgt;
        Ok(())
    }

    /// Multiply all coefficients by `f`.
    pub fn multiply_coefficients(&mut self, f: f64) {
        for s in self.sigma_tilde.as_mut_slice() {
            *s *= f;
        }
    }

    /// Multiply the coefficients of one observable bin by `f`.
    pub fn multiply_bin(&mut self, bin: usize, f: f64) -> Result<()> {
        let n = self.n_obs_bins();
        let block = self.sigma_tilde.bin_mut(bin).ok_or_else(|| bin_out_of_range(bin, n))?;
        for s in block {
            *s *= f;
        }
        Ok(())
    }

    /// Multiply the coefficients of one subprocess in one bin by `f`.
    pub fn multiply_bin_proc(&mut self, bin: usize, proc: usize, f: f64) -> Result<()> {
        let nsub = self.pdf.nsubproc;
        if proc >= nsub {
            return Err(TableError::ShapeMismatch(format!(
                "subprocess {proc} out of range ({nsub} subprocesses)"
            )));
        }
        let n = self.n_obs_bins();
        let block = self.sigma_tilde.bin_mut(bin).ok_or_else(|| bin_out_of_range(bin, n))?;
        for s in block.iter_mut().skip(proc).step_by(nsub) {
            *s *= f;
        }
        Ok(())
    }

    /// Check that `other` has the same order, PDF, subprocess and scale
    /// definitions, ignoring the grid.
    pub fn check_same_definition(&self, other: &CoeffAdd) -> Result<()> {
        let mismatch = |what: &str| Err(TableError::ShapeMismatch(format!("additive contributions differ in {what}")));
        if !self.base.is_compatible(&other.base) {
            return mismatch("contribution flags or units");
        }
        if self.npow != other.npow || self.iref != other.iref {
            return mismatch("Npow or IRef");
        }
        if self.pdf.npdf_pdg != other.pdf.npdf_pdg
            || self.pdf.npdf_dim != other.pdf.npdf_dim
            || self.pdf.nsubproc != other.pdf.nsubproc
            || self.pdf.ipdf_def != other.pdf.ipdf_def
        {
            return mismatch("PDF or subprocess definition");
        }
        if self.scales.nscalevar != other.scales.nscalevar
            || self.scales.nscalenode != other.scales.nscalenode
            || !all_close(self.scale_factors(), other.scale_factors())
        {
            return mismatch("scale variations");
        }
        Ok(())
    }

    /// Check that `other` is the same contribution on the same grid.
    pub fn check_compatible(&self, other: &CoeffAdd) -> Result<()> {
        self.check_same_definition(other)?;
        let mismatch = |what: &str| Err(TableError::ShapeMismatch(format!("additive contributions differ in {what}")));
        if !self.xnode1.same_shape(&other.xnode1)
            || !all_close(self.xnode1.values(), other.xnode1.values())
        {
            return mismatch("XNode1");
        }
        match (&self.xnode2, &other.xnode2) {
            (None, None) => {}
            (Some(a), Some(b)) if a.same_shape(b) && all_close(a.values(), b.values()) => {}
            _ => return mismatch("XNode2"),
        }
        if self.scale_node.shape() != other.scale_node.shape()
            || !all_close(self.scale_node.as_slice(), other.scale_node.as_slice())
        {
            return mismatch("scale nodes");
        }
        if self.sigma_tilde.shapes() != other.sigma_tilde.shapes() {
            return mismatch("SigmaTilde extents");
        }
        Ok(())
    }

    /// Whether `other` can be merged into this contribution.
    pub fn is_compatible(&self, other: &CoeffAdd) -> bool {
        self.check_compatible(other).is_ok()
    }

    /// Check every precondition of [`merge`](Self::merge) without modifying
    /// anything.
    pub fn check_merge(&self, other: &CoeffAdd, weighting: MergeWeighting) -> Result<()> {
        self.check_compatible(other)?;
        self.wgt.check_compatible(&other.wgt)?;
        if weighting.is_mean() {
            let (nsub, nobs) = (self.pdf.nsubproc, self.n_obs_bins());
            weighting.check_statistics(&self.wgt, nsub, nobs)?;
            weighting.check_statistics(&other.wgt, nsub, nobs)?;
            if self.nevt <= 0.0 || other.nevt <= 0.0 {
                return Err(TableError::UnimplementedConfiguration(format!(
                    "merge option '{}' needs Nevt > 0 (found {} and {})",
                    weighting, self.nevt, other.nevt
                )));
            }
        }
        Ok(())
    }

    /// Combine `other` into this contribution.
    ///
    /// Statistics are always summed. Every precondition is checked before
    /// anything is modified.
    pub fn merge(&mut self, other: &CoeffAdd, weighting: MergeWeighting) -> Result<()> {
        self.check_merge(other, weighting)?;
        let nsub = self.pdf.nsubproc;
        let nobs = self.n_obs_bins();
        match weighting {
            MergeWeighting::Add | MergeWeighting::Merge => {
                for (a, &b) in
                    self.sigma_tilde.as_mut_slice().iter_mut().zip(other.sigma_tilde.as_slice())
                {
                    *a += b;
                }
                if weighting == MergeWeighting::Merge {
                    self.nevt += other.nevt;
                }
            }
            _ => {
                let (n1, n2) = (self.nevt, other.nevt);
                for bin in 0..nobs {
                    let (Some(a), Some(b)) = (self.sigma_tilde.bin_mut(bin), other.sigma_tilde.bin(bin))
                    else {
                        continue;
                    };
                    for (k, (s1, &s2)) in a.iter_mut().zip(b.as_slice()).enumerate() {
                        let proc = k % nsub;
                        let w1 = weighting.weight(&self.wgt, bin, proc);
                        let w2 = weighting.weight(&other.wgt, bin, proc);
                        *s1 = weighted_mean(*s1 / n1, w1, s2 / n2, w2);
                    }
                }
                self.nevt = 1.0;
            }
        }
        self.wgt.add(&other.wgt)
    }

    /// Remove observable bin `bin` from the x nodes, scale nodes,
    /// coefficients and per-bin statistics.
    pub fn erase_bin(&mut self, bin: usize) -> Result<()> {
        self.check_erase_bin(bin)?;
        let nobs = self.n_obs_bins();
        self.wgt.erase_bin(bin, nobs)?;
        self.scale_node.remove_outer("ScaleNode", bin)?;
        self.sigma_tilde.remove_bin("SigmaTilde", bin)?;
        self.xnode1.remove_row(bin);
        if let Some(x2) = &mut self.xnode2 {
            x2.remove_row(bin);
        }
        log::debug!("erased observable bin {} ({} left)", bin, self.n_obs_bins());
        Ok(())
    }

    /// Check that [`erase_bin`](Self::erase_bin) would succeed.
    pub fn check_erase_bin(&self, bin: usize) -> Result<()> {
        let nobs = self.n_obs_bins();
        check_erasable(bin, nobs)?;
        if self.wgt.has_bin_statistics() {
            self.wgt.check_bin_layout(nobs)?;
        }
        Ok(())
    }

    /// Check that bin `bin` of `other` can be appended with
    /// [`cat_bin`](Self::cat_bin).
    pub fn check_cat_bin(&self, other: &CoeffAdd, bin: usize) -> Result<()> {
        self.check_same_definition(other)?;
        if bin >= other.n_obs_bins() {
            return Err(bin_out_of_range(bin, other.n_obs_bins()));
        }
        if self.nevt != other.nevt && (self.nevt <= 0.0 || other.nevt <= 0.0) {
            return Err(TableError::UnimplementedConfiguration(format!(
                "cannot rescale coefficients between Nevt={} and Nevt={}",
                other.nevt, self.nevt
            )));
        }
        self.wgt.check_cat_bin(&other.wgt, bin, self.n_obs_bins())
    }

    /// Append bin `bin` of `other` as a new last observable bin.
    ///
    /// The appended coefficients are rescaled to this block's `Nevt`; the
    /// global event counters are kept.
    pub fn cat_bin(&mut self, other: &CoeffAdd, bin: usize) -> Result<()> {
        self.check_cat_bin(other, bin)?;
        let (Some(x1), Some(nodes), Some(block)) =
            (other.xnode1.row(bin), other.scale_node.outer(bin), other.sigma_tilde.bin(bin))
        else {
            return Err(bin_out_of_range(bin, other.n_obs_bins()));
        };
        let f = if self.nevt == other.nevt { 1.0 } else { self.nevt / other.nevt };
        let coeffs: Vec<f64> = block.as_slice().iter().map(|&s| s * f).collect();

        let nobs = self.n_obs_bins();
        self.wgt.cat_bin(&other.wgt, bin, nobs)?;
        self.scale_node.push_outer("ScaleNode", nodes)?;
        self.sigma_tilde.push_bin("SigmaTilde", block.shape().clone(), &coeffs)?;
        self.xnode1.push_row(x1);
        if let (Some(x2), Some(row)) = (&mut self.xnode2, other.x_nodes2(bin)) {
            x2.push_row(row);
        }
        Ok(())
    }
}

fn read_x_nodes(r: &mut TextBuffer, nobs: usize, field: &'static str) -> Result<Jagged<f64>> {
    let mut nodes = Jagged::empty(2);
    for bin in 0..nobs {
        let (row, _) = read_flexible::<f64>(r, 0, 1.0, field)?;
        if row.is_empty() {
            return Err(TableError::InvalidDimension { field, index: bin, value: 0 });
        }
        nodes.push_row(&row);
    }
    Ok(nodes)
}

fn write_x_nodes(w: &mut TextWriter, nodes: &Jagged<f64>) {
    for row in nodes.rows() {
        write_flexible(w, row, true);
    }
}

fn all_close(a: &[f64], b: &[f64]) -> bool {
    a.len() == b.len()
        && a.iter().zip(b).all(|(&x, &y)| (x - y).abs() <= NODE_TOLERANCE * x.abs().max(y.abs()))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::error::ErrorKind;
    use approx::assert_relative_eq;

    const FIELDS: &[(&str, &str)] = &[
        ("IRef", "0"),
        ("IScaleDep", "0"),
        ("marker", "-2"),
        ("Nevt", "100"),
        ("WgtNevt", "100"),
        ("NumTable", "1"),
        ("WgtNumEv", "50"),
        ("WgtSumW2", "2"),
        ("SigSumW2", "3"),
        ("SigSum", "4"),
        ("WgtObsSumW2", "1\n1\n0.5"),
        ("SigObsSumW2", "1\n1\n0.25"),
        ("SigObsSum", "1\n1\n2"),
        ("WgtObsNumEv", "1\n1\n50"),
        ("Npow", "2"),
        ("NPDF", "2\n2212\n2212"),
        ("NPDFDim", "1"),
        ("NFragFunc", "0"),
        ("NFFDim", "0"),
        ("NSubproc", "1"),
        ("IPDFdef", "3\n1\n1"),
        ("XNode1", "2\n0.1\n0.5"),
        ("NScales", "1"),
        ("NScaleDim", "1"),
        ("Iscale", "0"),
        ("ScaleDescript", "1\npT_jet"),
        ("Nscalevar", "1\n2"),
        ("ScaleFac", "1"),
        ("ScaleNode", "100\n200"),
        ("SigmaTilde", "1\n2\n3\n4\n5\n6"),
    ];

    fn body(overrides: &[(&str, &str)]) -> String {
        let mut out = String::new();
        for (key, value) in FIELDS {
            let v = overrides.iter().find(|(k, _)| k == key).map_or(*value, |(_, v)| *v);
            out.push_str(v);
            out.push('\n');
        }
        out
    }

    fn base() -> CoeffBase {
        CoeffBase {
            ixsect_units: 12,
            idata_flag: 0,
            iadd_mult_flag: 0,
            icontr_flag1: 1,
            icontr_flag2: 2,
            nscale_dep: 0,
            ctrb_descript: vec!["NLO".to_string()],
            code_descript: vec![],
        }
    }

    fn ctx() -> BlockContext {
        BlockContext { layout: TableLayout::Legacy, n_obs_bins: 1, require_half_matrix: false }
    }

    fn read(overrides: &[(&str, &str)]) -> Result<CoeffAdd> {
        let text = body(overrides);
        CoeffAdd::read(&mut TextBuffer::new(text.as_bytes()), base(), &ctx())
    }

    #[test]
    fn nxmax_per_storage_scheme() {
        assert_eq!(nxmax(0, 4, 0), 4);
        assert_eq!(nxmax(1, 4, 0), 10);
        assert_eq!(nxmax(2, 4, 3), 12);
        assert_eq!(nxmax(3, 4, 3), 0);
    }

    #[test]
    fn half_matrix_pairs_match_index() {
        let c = read(&[("XNode1", "4\n0.01\n0.1\n0.3\n0.7"), ("SigmaTilde", "0\n".repeat(20).trim_end())])
            .unwrap();
        let pairs = c.x_index_pairs(0);
        assert_eq!(pairs.len(), 10);
        assert_eq!(&pairs[..4], &[(0, 0), (0, 1), (1, 1), (0, 2)]);
        for (k, &(ix1, ix2)) in pairs.iter().enumerate() {
            assert_eq!(c.x_index(0, ix1, ix2), Some(k));
        }
        assert_eq!(c.x_index(0, 2, 1), None);
        assert_eq!(c.x_index(0, 0, 4), None);
    }

    #[test]
    fn full_matrix_index_is_ix1_fastest() {
        assert_eq!(x_index(2, 4, 3, 3, 0), Some(3));
        assert_eq!(x_index(2, 4, 3, 0, 1), Some(4));
        assert_eq!(x_index(2, 4, 3, 3, 2), Some(11));
        assert_eq!(x_index(2, 4, 3, 4, 0), None);
        assert_eq!(x_index(0, 4, 0, 3, 0), Some(3));
        assert_eq!(x_index(0, 4, 0, 3, 1), None);
    }

    #[test]
    fn reads_and_rewrites_block() {
        let c = read(&[]).unwrap();
        assert_eq!(c.npdf_pdg(), &[2212, 2212]);
        assert_eq!(c.ipdf_def(), [3, 1, 1]);
        assert_eq!(c.nevt(), 100.0);
        assert_eq!(c.nevt_encoding(), NevtEncoding::Marked { marker: -2.0 });
        assert_eq!(c.wgt_stat().wgt_num_ev, 50);
        assert_eq!(c.nxtot1(0), 2);
        assert_eq!(c.nxtot2(0), None);
        assert_eq!(c.nxmax(0), 3);
        assert_eq!(c.scale_node(0, 0, 1), Some(200.0));
        assert_eq!(c.central_scale_index(), Some(0));
        assert_eq!(c.sigma_tilde().shapes()[0].dims(), &[1, 2, 3, 1]);
        assert_eq!(c.sigma_tilde().get(0, &[0, 1, 2, 0]), Some(6.0));

        let mut w = TextWriter::new();
        c.write(&mut w, TableLayout::Legacy);
        let mut expect = TextWriter::new();
        base().write(&mut expect);
        assert_eq!(w.as_str(), format!("{}{}", expect.as_str(), body(&[])));
    }

    #[test]
    fn full_matrix_reads_second_node_set() {
        let c = read(&[
            ("NPDFDim", "2"),
            ("XNode1", "2\n0.1\n0.5\n3\n0.2\n0.4\n0.6"),
            ("SigmaTilde", "1\n".repeat(12).trim_end()),
        ])
        .unwrap();
        assert_eq!(c.nxtot2(0), Some(3));
        assert_eq!(c.nxmax(0), 6);
        assert_eq!(c.x_index_pairs(0).last(), Some(&(1, 2)));
    }

    #[test]
    fn unsupported_configurations() {
        let cases: &[(&str, &str, ErrorKind)] = &[
            ("NFragFunc", "1", ErrorKind::UnimplementedConfiguration),
            ("IPDFdef", "0\n1\n1", ErrorKind::UnimplementedConfiguration),
            ("IPDFdef", "3\n0\n1", ErrorKind::UnimplementedConfiguration),
            ("NPDFDim", "3", ErrorKind::UnimplementedConfiguration),
            ("NScaleDim", "2", ErrorKind::UnimplementedConfiguration),
            ("NScaleDim", "0", ErrorKind::ShapeMismatch),
            ("NSubproc", "0", ErrorKind::ShapeMismatch),
            ("XNode1", "0", ErrorKind::ShapeMismatch),
            ("Nscalevar", "0\n2", ErrorKind::ShapeMismatch),
            ("SigmaTilde", "1\n2\nnan\n4\n5\n6", ErrorKind::NonFiniteValue),
        ];
        for &(field, value, kind) in cases {
            let err = read(&[(field, value)]).unwrap_err();
            assert_eq!(err.kind(), kind, "{field}={value}: {err}");
        }
    }

    #[test]
    fn half_matrix_requirement() {
        let text = body(&[("NPDFDim", "0"), ("SigmaTilde", "1\n2\n3\n4")]);
        let strict = BlockContext { require_half_matrix: true, ..ctx() };
        let err = CoeffAdd::read(&mut TextBuffer::new(text.as_bytes()), base(), &strict).unwrap_err();
        assert_eq!(err.kind(), ErrorKind::UnimplementedConfiguration);
        let c = CoeffAdd::read(&mut TextBuffer::new(text.as_bytes()), base(), &ctx()).unwrap();
        assert_eq!(c.nxmax(0), 2);
    }

    #[test]
    fn normalisation_and_scaling() {
        let mut c = read(&[]).unwrap();
        c.normalize_coefficients(1.0).unwrap();
        assert_eq!(c.nevt(), 1.0);
        assert_relative_eq!(c.sigma_tilde().as_slice()[5], 0.06, epsilon = 1e-15);
        c.multiply_bin(0, 10.0).unwrap();
        assert_relative_eq!(c.sigma_tilde().as_slice()[0], 0.1, epsilon = 1e-15);
        assert!(c.multiply_bin(1, 2.0).is_err());

        c.clear();
        assert!(c.sigma_tilde().as_slice().iter().all(|&s| s == 0.0));
        assert_eq!(c.wgt_stat().num_table, 1);
        assert_eq!(c.normalize_coefficients(1.0).unwrap_err().kind(), ErrorKind::UnimplementedConfiguration);
    }

    #[test]
    fn multiply_single_subprocess() {
        let mut c = read(&[("NSubproc", "2"), ("SigmaTilde", "1\n2\n3\n4\n5\n6\n7\n8\n9\n10\n11\n12")])
            .unwrap();
        c.multiply_bin_proc(0, 1, 0.0).unwrap();
        assert_eq!(c.sigma_tilde().as_slice(), &[1.0, 0.0, 3.0, 0.0, 5.0, 0.0, 7.0, 0.0, 9.0, 0.0, 11.0, 0.0]);
        assert!(c.multiply_bin_proc(0, 2, 1.0).is_err());
    }

    #[test]
    fn add_and_merge_sum_coefficients() {
        let other = read(&[("Nevt", "300")]).unwrap();

        let mut a = read(&[]).unwrap();
        a.merge(&other, MergeWeighting::Add).unwrap();
        assert_eq!(a.nevt(), 100.0);
        assert_eq!(a.sigma_tilde().as_slice()[2], 6.0);
        assert_eq!(a.wgt_stat().num_table, 2);

        let mut m = read(&[]).unwrap();
        m.merge(&other, MergeWeighting::Merge).unwrap();
        assert_eq!(m.nevt(), 400.0);
        assert_eq!(m.wgt_stat().wgt_num_ev, 100);
    }

    #[test]
    fn weighted_merge_averages_normalised_coefficients() {
        // Per-event values: a = S/100, b = 3S/300 = S/100, so every mean is S/100.
        let other = read(&[("Nevt", "300"), ("WgtNumEv", "150"), ("SigmaTilde", "3\n6\n9\n12\n15\n18")])
            .unwrap();
        for option in [MergeWeighting::Unweighted, MergeWeighting::NumEvent, MergeWeighting::NumEventBinProc] {
            let mut a = read(&[]).unwrap();
            a.merge(&other, option).unwrap();
            assert_eq!(a.nevt(), 1.0);
            assert_relative_eq!(a.sigma_tilde().as_slice()[3], 0.04, epsilon = 1e-15);
        }

        // Weights 50 and 150 for per-event values 0.01 and 0.03.
        let other = read(&[("Nevt", "100"), ("WgtNumEv", "150"), ("SigmaTilde", "3\n6\n9\n12\n15\n18")])
            .unwrap();
        let mut a = read(&[]).unwrap();
        a.merge(&other, MergeWeighting::NumEvent).unwrap();
        assert_relative_eq!(a.sigma_tilde().as_slice()[0], 0.025, epsilon = 1e-15);
    }

    fn sequence(n: usize) -> String {
        (1..=n).map(|i| i.to_string()).collect::<Vec<_>>().join("\n")
    }

    #[test]
    fn appended_bin_carries_its_own_grid() {
        let coeffs = sequence(12);
        let wide = read(&[("XNode1", "3\n0.1\n0.3\n0.5"), ("ScaleNode", "300\n400"), ("SigmaTilde", coeffs.as_str())])
            .unwrap();
        let mut a = read(&[]).unwrap();
        a.cat_bin(&wide, 0).unwrap();
        assert_eq!(a.n_obs_bins(), 2);
        assert_eq!(a.nxtot1(1), 3);
        assert_eq!(a.nxmax(1), 6);
        assert_eq!(a.scale_node(1, 0, 1), Some(400.0));
        assert_eq!(a.scale_nodes().shape().dims(), &[2, 1, 1, 2]);
        assert_eq!(a.sigma_tilde().get(1, &[0, 1, 5, 0]), Some(12.0));
        assert_eq!(a.wgt_stat().wgt_obs_num_ev.row(0), Some(&[50u64, 50][..]));
        assert_eq!(a.wgt_stat().wgt_num_ev, 50);

        let mut w = TextWriter::new();
        a.write(&mut w, TableLayout::Legacy);
        let mut r = TextBuffer::new(w.as_str().as_bytes());
        let b = CoeffBase::read(&mut r).unwrap();
        let two = BlockContext { n_obs_bins: 2, ..ctx() };
        assert_eq!(CoeffAdd::read(&mut r, b, &two).unwrap(), a);

        a.erase_bin(0).unwrap();
        assert_eq!(a, wide);
        assert!(a.erase_bin(0).is_err());
    }

    #[test]
    fn appended_coefficients_follow_receiver_normalisation() {
        let mut a = read(&[]).unwrap();
        a.cat_bin(&read(&[("Nevt", "200")]).unwrap(), 0).unwrap();
        assert_eq!(a.nevt(), 100.0);
        assert_eq!(a.sigma_tilde().bin(1).unwrap().as_slice(), &[0.5, 1.0, 1.5, 2.0, 2.5, 3.0]);

        let mut cleared = read(&[]).unwrap();
        cleared.clear();
        let err = a.cat_bin(&cleared, 0).unwrap_err();
        assert_eq!(err.kind(), ErrorKind::UnimplementedConfiguration);
    }

    #[test]
    fn full_matrix_bins_move_both_node_sets() {
        let ones = "1\n".repeat(12);
        let mut c = read(&[
            ("NPDFDim", "2"),
            ("XNode1", "2\n0.1\n0.5\n3\n0.2\n0.4\n0.6"),
            ("SigmaTilde", ones.trim_end()),
        ])
        .unwrap();
        let copy = c.clone();
        c.cat_bin(&copy, 0).unwrap();
        assert_eq!(c.nxtot2(1), Some(3));
        assert_eq!(c.nxmax(1), 6);
        c.erase_bin(1).unwrap();
        assert_eq!(c, copy);
    }

    #[test]
    fn rejected_bin_edits_leave_block_untouched() {
        let mut a = read(&[]).unwrap();
        let before = a.clone();
        let coeffs = sequence(12);
        let other = read(&[("NSubproc", "2"), ("SigmaTilde", coeffs.as_str())]).unwrap();
        assert_eq!(a.cat_bin(&other, 0).unwrap_err().kind(), ErrorKind::ShapeMismatch);
        assert_eq!(a.cat_bin(&before, 1).unwrap_err().kind(), ErrorKind::ShapeMismatch);
        assert_eq!(a.erase_bin(1).unwrap_err().kind(), ErrorKind::ShapeMismatch);
        assert_eq!(a.erase_bin(0).unwrap_err().kind(), ErrorKind::ShapeMismatch);
        assert_eq!(a, before);
    }

    #[test]
    fn incompatible_merge_leaves_receiver_untouched() {
        let other = read(&[("XNode1", "2\n0.1\n0.6")]).unwrap();
        let mut a = read(&[]).unwrap();
        let before = a.clone();
        let err = a.merge(&other, MergeWeighting::Merge).unwrap_err();
        assert_eq!(err.kind(), ErrorKind::ShapeMismatch);
        assert_eq!(a, before);
        assert!(!a.is_compatible(&other));

        let mut zero = read(&[]).unwrap();
        zero.clear();
        let before = zero.clone();
        assert!(zero.merge(&read(&[]).unwrap(), MergeWeighting::SumW2).is_err());
        assert_eq!(zero, before);
    }
}
