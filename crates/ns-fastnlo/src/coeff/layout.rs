//! Version-specific pieces of the additive block layout.
//!
//! The two layout families differ in three places only: a tagged preamble,
//! the event-count/statistics block and two extra sections around the scale
//! definitions. Each difference is one read/write pair on [`TableLayout`],
//! selected once per table.

use serde::{Deserialize, Serialize};

use crate::codec::{UnusedSection, read_unused, write_unused};
use crate::error::Result;
use crate::text::{TextBuffer, TextWriter};
use crate::version::TableLayout;
use crate::wgt_stat::WgtStat;

/// Leading `"fastNLO_CoeffAddBase"` tag of a v2.4+ additive block.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct AddPreamble {
    /// Tag token, kept verbatim.
    pub tag: String,
    /// Section following the tag.
    pub unused: UnusedSection,
}

impl Default for AddPreamble {
    fn default() -> Self {
        Self { tag: "fastNLO_CoeffAddBase".to_string(), unused: UnusedSection::default() }
    }
}

/// How the event count of an additive block is stored.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub enum NevtEncoding {
    /// v2.0: a single positive `Nevt`, no statistics block.
    Plain,
    /// v2.3: a non-positive marker, then `Nevt` and the statistics block.
    /// `NumTable` is present only when the marker is `<= -2`.
    Marked {
        /// Marker value as read.
        marker: f64,
    },
    /// v2.4+: `Nevt` followed by the complete statistics block.
    Explicit,
}

impl TableLayout {
    /// Read the tagged preamble of an additive block, if this layout has one.
    pub(crate) fn read_add_preamble(self, r: &mut TextBuffer) -> Result<Option<AddPreamble>> {
        match self {
            TableLayout::Legacy => Ok(None),
            TableLayout::V24 => {
                let tag = r.read_token("CoeffAddBase tag")?.to_string();
                let unused = read_unused(r, "CoeffAddBase")?;
                Ok(Some(AddPreamble { tag, unused }))
            }
        }
    }

    pub(crate) fn write_add_preamble(self, w: &mut TextWriter, preamble: Option<&AddPreamble>) {
        if self == TableLayout::V24 {
            let default = AddPreamble::default();
            let p = preamble.unwrap_or(&default);
            w.line(&p.tag);
            write_unused(w, &p.unused);
        }
    }

    /// Read `Nevt` and, where present, the statistics block into `wgt`.
    pub(crate) fn read_event_counts(
        self,
        r: &mut TextBuffer,
        wgt: &mut WgtStat,
    ) -> Result<(f64, NevtEncoding)> {
        let first = r.read_f64("Nevt")?;
        let encoding = match self {
            TableLayout::V24 => NevtEncoding::Explicit,
            TableLayout::Legacy if first > 0.0 => return Ok((first, NevtEncoding::Plain)),
            TableLayout::Legacy => NevtEncoding::Marked { marker: first },
        };
        let nevt = match encoding {
            NevtEncoding::Marked { .. } => r.read_f64("Nevt")?,
            _ => first,
        };
        wgt.wgt_nevt = r.read_f64("WgtNevt")?;
        if !matches!(encoding, NevtEncoding::Marked { marker } if marker > -2.0) {
            wgt.num_table = r.read_i32("NumTable")?;
        }
        wgt.wgt_num_ev = r.read_u64("WgtNumEv")?;
        wgt.wgt_sum_w2 = r.read_f64("WgtSumW2")?;
        wgt.sig_sum_w2 = r.read_f64("SigSumW2")?;
        wgt.sig_sum = r.read_f64("SigSum")?;
        wgt.read_bin_arrays(r)?;
        Ok((nevt, encoding))
    }

    /// Write `Nevt` and the statistics block.
    ///
    /// A v2.0 block whose `Nevt` is no longer positive cannot be represented
    /// as such and is written with a `-2` marker instead.
    pub(crate) fn write_event_counts(
        self,
        w: &mut TextWriter,
        nevt: f64,
        encoding: NevtEncoding,
        wgt: &WgtStat,
    ) {
        let marker = match (self, encoding) {
            (TableLayout::V24, _) => None,
            (TableLayout::Legacy, NevtEncoding::Plain) if nevt > 0.0 => {
                w.value(nevt);
                return;
            }
            (TableLayout::Legacy, NevtEncoding::Marked { marker }) => Some(marker),
            (TableLayout::Legacy, _) => Some(-2.0),
        };
        if let Some(m) = marker {
            w.value(m);
        }
        w.value(nevt);
        w.value(wgt.wgt_nevt);
        if marker.is_none_or(|m| m <= -2.0) {
            w.value(wgt.num_table);
        }
        w.value(wgt.wgt_num_ev);
        w.value(wgt.wgt_sum_w2);
        w.value(wgt.sig_sum_w2);
        w.value(wgt.sig_sum);
        wgt.write_bin_arrays(w);
    }

    /// Read the sections that v2.4+ places after the scale descriptions.
    pub(crate) fn read_scale_extras(self, r: &mut TextBuffer) -> Result<Option<[UnusedSection; 2]>> {
        match self {
            TableLayout::Legacy => Ok(None),
            TableLayout::V24 => {
                let a = read_unused(r, "ScaleDescript extra")?;
                let b = read_unused(r, "ScaleDescript extra")?;
                Ok(Some([a, b]))
            }
        }
    }

    pub(crate) fn write_scale_extras(self, w: &mut TextWriter, extras: Option<&[UnusedSection; 2]>) {
        if self == TableLayout::V24 {
            let empty = [UnusedSection::default(), UnusedSection::default()];
            for s in extras.unwrap_or(&empty) {
                write_unused(w, s);
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    const STATS: &str = "3.5\n1\n10\n2.5\n1.5\n0.5\n1\n1\n4\n1\n1\n5\n1\n1\n6\n1\n1\n7\n";

    #[test]
    fn legacy_positive_nevt_is_plain() {
        let mut r = TextBuffer::new(b"1000\n9\n");
        let mut wgt = WgtStat::default();
        let (nevt, enc) = TableLayout::Legacy.read_event_counts(&mut r, &mut wgt).unwrap();
        assert_eq!(nevt, 1000.0);
        assert_eq!(enc, NevtEncoding::Plain);
        assert_eq!(wgt, WgtStat::default());
        assert_eq!(r.read_i32("Npow").unwrap(), 9);
    }

    #[test]
    fn legacy_marker_minus_two_reads_num_table() {
        let text = format!("-2\n100\n{STATS}");
        let mut r = TextBuffer::new(text.as_bytes());
        let mut wgt = WgtStat::default();
        let (nevt, enc) = TableLayout::Legacy.read_event_counts(&mut r, &mut wgt).unwrap();
        assert_eq!(nevt, 100.0);
        assert_eq!(enc, NevtEncoding::Marked { marker: -2.0 });
        assert_eq!(wgt.wgt_nevt, 3.5);
        assert_eq!(wgt.num_table, 1);
        assert_eq!(wgt.wgt_num_ev, 10);
        assert_eq!(wgt.wgt_obs_num_ev.values(), &[7]);
        assert!(r.read_token("next").is_err());

        let mut w = TextWriter::new();
        TableLayout::Legacy.write_event_counts(&mut w, nevt, enc, &wgt);
        assert_eq!(w.as_str(), text);
    }

    #[test]
    fn legacy_marker_zero_has_no_num_table() {
        // Without NumTable the next token (10) is WgtNumEv.
        let text = "0\n100\n3.5\n10\n2.5\n1.5\n0.5\n0\n0\n0\n0\n";
        let mut r = TextBuffer::new(text.as_bytes());
        let mut wgt = WgtStat::default();
        let (_, enc) = TableLayout::Legacy.read_event_counts(&mut r, &mut wgt).unwrap();
        assert_eq!(enc, NevtEncoding::Marked { marker: 0.0 });
        assert_eq!(wgt.num_table, 1);
        assert_eq!(wgt.wgt_num_ev, 10);
        assert!(!wgt.has_bin_statistics());

        let mut w = TextWriter::new();
        TableLayout::Legacy.write_event_counts(&mut w, 100.0, enc, &wgt);
        assert_eq!(w.as_str(), text);
    }

    #[test]
    fn v24_reads_explicit_block() {
        let text = format!("250\n{STATS}");
        let mut r = TextBuffer::new(text.as_bytes());
        let mut wgt = WgtStat::default();
        let (nevt, enc) = TableLayout::V24.read_event_counts(&mut r, &mut wgt).unwrap();
        assert_eq!((nevt, enc), (250.0, NevtEncoding::Explicit));
        assert_eq!(wgt.sig_sum, 0.5);
        assert!(r.read_token("next").is_err());
    }

    #[test]
    fn plain_block_with_cleared_nevt_gets_a_marker() {
        let mut w = TextWriter::new();
        TableLayout::Legacy.write_event_counts(&mut w, 0.0, NevtEncoding::Plain, &WgtStat::default());
        let mut r = TextBuffer::new(w.as_str().as_bytes());
        let mut wgt = WgtStat::default();
        let (nevt, enc) = TableLayout::Legacy.read_event_counts(&mut r, &mut wgt).unwrap();
        assert_eq!(nevt, 0.0);
        assert_eq!(enc, NevtEncoding::Marked { marker: -2.0 });
        assert!(r.read_token("next").is_err());
    }

    #[test]
    fn preamble_only_in_v24() {
        let mut r = TextBuffer::new(b"fastNLO_CoeffAddBase\n0\n5\n");
        assert!(TableLayout::Legacy.read_add_preamble(&mut r).unwrap().is_none());
        let p = TableLayout::V24.read_add_preamble(&mut r).unwrap().unwrap();
        assert_eq!(p, AddPreamble::default());
        assert_eq!(r.read_i32("IRef").unwrap(), 5);

        let mut w = TextWriter::new();
        TableLayout::V24.write_add_preamble(&mut w, Some(&p));
        TableLayout::Legacy.write_add_preamble(&mut w, Some(&p));
        assert_eq!(w.as_str(), "fastNLO_CoeffAddBase\n0\n");
    }

    #[test]
    fn scale_extras_round_trip() {
        let text = "1\nmu_r choice\n0\n";
        let mut r = TextBuffer::new(text.as_bytes());
        let extras = TableLayout::V24.read_scale_extras(&mut r).unwrap().unwrap();
        assert_eq!(extras[0].lines, vec!["mu_r choice".to_string()]);
        let mut w = TextWriter::new();
        TableLayout::V24.write_scale_extras(&mut w, Some(&extras));
        assert_eq!(w.as_str(), text);
    }
}
