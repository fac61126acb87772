//! Synthetic table generator shared by the integration tests.

#![allow(dead_code)]

use std::fmt::Display;
use std::path::PathBuf;

pub fn fixture_path(name: &str) -> PathBuf {
    PathBuf::from(env!("CARGO_MANIFEST_DIR")).join("tests/fixtures").join(name)
}

/// Shape and statistics of a generated single-contribution table.
#[derive(Debug, Clone)]
pub struct Synthetic {
    pub version: i32,
    pub n_bins: usize,
    pub n_x: usize,
    pub n_subproc: usize,
    pub nevt: f64,
    pub wgt_num_ev: u64,
    /// Coefficients are `scale * (k + 1)` in storage order.
    pub scale: f64,
}

impl Default for Synthetic {
    fn default() -> Self {
        Self { version: 23600, n_bins: 3, n_x: 4, n_subproc: 2, nevt: 1000.0, wgt_num_ev: 5000, scale: 0.5 }
    }
}

struct Lines(String);

impl Lines {
    fn push(&mut self, v: impl Display) {
        self.0.push_str(&v.to_string());
        self.0.push('\n');
    }

    fn magic(&mut self) {
        self.push(1234567890);
    }
}

impl Synthetic {
    pub fn with_version(version: i32) -> Self {
        Self { version, ..Self::default() }
    }

    pub fn nxmax(&self) -> usize {
        (self.n_x * self.n_x + self.n_x) / 2
    }

    pub fn n_coefficients(&self) -> usize {
        self.n_bins * 2 * self.nxmax() * self.n_subproc
    }

    /// Render the table text in the canonical one-value-per-line form.
    pub fn render(&self) -> String {
        let v24 = self.version >= 24000;
        let mut l = Lines(String::new());

        l.magic();
        l.push(self.version);
        l.push("SyntheticJets");
        for n in [1, 0, 0, 0, 0, 0, 0] {
            l.push(n);
        }

        l.magic();
        l.push(-12);
        l.push(1);
        l.push("synthetic inclusive jets");
        l.push(13000);
        l.push(2);
        l.push(self.n_bins);
        l.push(1);
        l.push("pT_[GeV]");
        l.push(2);
        for b in 0..self.n_bins {
            l.push(100 + 50 * b);
            l.push(150 + 50 * b);
        }
        for _ in 0..self.n_bins {
            l.push(50);
        }
        l.push(0);

        l.magic();
        for f in [12, 0, 0, 1, 2, 0] {
            l.push(f);
        }
        l.push(1);
        l.push("NLO");
        l.push(1);
        l.push("synthetic generator");
        if v24 {
            l.push("fastNLO_CoeffAddBase");
            l.push(0);
        }
        l.push(0);
        l.push(0);
        if !v24 {
            l.push(-2);
        }
        l.push(self.nevt);
        l.push(self.nevt);
        l.push(1);
        l.push(self.wgt_num_ev);
        l.push(2.5);
        l.push(1.5);
        l.push(3.5);
        let per_bin_ev = self.wgt_num_ev / (self.n_bins * self.n_subproc) as u64;
        for value in ["0.5".to_string(), "0.25".to_string(), "2".to_string(), per_bin_ev.to_string()] {
            l.push(self.n_subproc);
            for _ in 0..self.n_subproc {
                l.push(self.n_bins);
                for _ in 0..self.n_bins {
                    l.push(&value);
                }
            }
        }

        l.push(2);
        l.push(2);
        l.push(2212);
        l.push(2212);
        l.push(1);
        l.push(0);
        l.push(0);
        l.push(self.n_subproc);
        l.push(3);
        l.push(1);
        l.push(1);
        for _ in 0..self.n_bins {
            l.push(self.n_x);
            for k in 0..self.n_x {
                l.push((k + 1) as f64 / (self.n_x + 1) as f64);
            }
        }

        l.push(1);
        l.push(1);
        l.push(0);
        l.push(1);
        l.push("pT_jet");
        if v24 {
            l.push(0);
            l.push(0);
        }
        l.push(1);
        l.push(2);
        l.push(1);
        for b in 0..self.n_bins {
            l.push(100 + 50 * b);
            l.push(150 + 50 * b);
        }
        for k in 0..self.n_coefficients() {
            l.push(self.scale * (k + 1) as f64);
        }

        l.magic();
        l.0
    }
}
