//! Integration tests: decode and re-encode fastNLO tables.

mod common;

use common::{Synthetic, fixture_path};
use ns_fastnlo::{
    Contribution, ContributionKind, ErrorKind, FastNloTable, NevtEncoding, ReadOptions,
    SUPPORTED_VERSIONS, TableLayout, TableSummary,
};

#[derive(serde::Deserialize)]
struct ExpectedAdditive {
    npow: i32,
    n_subproc: usize,
    nevt: f64,
    x_nodes1: Vec<Vec<f64>>,
    scale_nodes: Vec<f64>,
    sigma_tilde: Vec<f64>,
}

#[derive(serde::Deserialize)]
struct ExpectedTable {
    version: i32,
    scenario_name: String,
    ecms: f64,
    n_obs_bins: usize,
    bin_bounds: Vec<(f64, f64)>,
    kinds: Vec<ContributionKind>,
    additive: ExpectedAdditive,
    mult_fact: Vec<f64>,
    data_value: Vec<f64>,
}

#[test]
fn fixture_matches_expectations() {
    let expected: ExpectedTable = serde_json::from_str(
        &std::fs::read_to_string(fixture_path("minimal_v23600_expected.json")).unwrap(),
    )
    .unwrap();
    let t = FastNloTable::open(fixture_path("minimal_v23600.tab")).expect("failed to open table");

    assert_eq!(t.version(), expected.version);
    assert_eq!(t.header().scenario_name, expected.scenario_name);
    assert_eq!(t.scenario().ecms, expected.ecms);
    assert_eq!(t.n_obs_bins(), expected.n_obs_bins);
    for (bin, &bounds) in expected.bin_bounds.iter().enumerate() {
        assert_eq!(t.binning().bin_bounds(bin, 0), Some(bounds));
    }
    let kinds: Vec<ContributionKind> = t.contributions().iter().map(Contribution::kind).collect();
    assert_eq!(kinds, expected.kinds);
    assert!(t.diagnostics().is_empty(), "{:?}", t.diagnostics());

    let add = t.additive().next().unwrap();
    let exp = &expected.additive;
    assert_eq!(add.npow(), exp.npow);
    assert_eq!(add.n_subproc(), exp.n_subproc);
    assert_eq!(add.nevt(), exp.nevt);
    assert_eq!(add.nevt_encoding(), NevtEncoding::Marked { marker: -2.0 });
    for (bin, nodes) in exp.x_nodes1.iter().enumerate() {
        assert_eq!(add.x_nodes1(bin), Some(nodes.as_slice()));
    }
    assert_eq!(add.scale_nodes().as_slice(), exp.scale_nodes.as_slice());
    assert_eq!(add.sigma_tilde().as_slice(), exp.sigma_tilde.as_slice());
    assert_eq!(add.ipdf_def(), [3, 1, 1]);
    assert_eq!(add.wgt_stat().wgt_obs_num_ev.row(1), Some(&[25u64, 25][..]));

    let Contribution::Multiplicative(m) = &t.contributions()[1] else { panic!("expected mult") };
    assert_eq!(m.fact(), expected.mult_fact.as_slice());
    assert_eq!(m.correlated().get(1, 0), Some((-0.015, 0.02)));
    let Contribution::Data(d) = &t.contributions()[2] else { panic!("expected data") };
    assert_eq!(d.value(), expected.data_value.as_slice());
    assert!(d.err_matrices().is_empty());
}

#[test]
fn fixture_round_trips_byte_for_byte() {
    let path = fixture_path("minimal_v23600.tab");
    let original = std::fs::read_to_string(&path).unwrap();
    let t = FastNloTable::open(&path).unwrap();
    assert_eq!(t.write_string(), original);
}

#[test]
fn fixture_bins_can_be_erased_and_restored() {
    let path = fixture_path("minimal_v23600.tab");
    let original = FastNloTable::open(&path).unwrap();
    let mut t = original.clone();
    t.erase_bin(0).unwrap();
    assert_eq!(t.n_obs_bins(), 1);

    let reread = FastNloTable::read_str(&t.write_string()).unwrap();
    assert_eq!(reread, t);
    let Contribution::Multiplicative(m) = &reread.contributions()[1] else { panic!("expected mult") };
    assert_eq!(m.fact(), &[1.02]);
    assert_eq!(m.correlated().get(0, 0), Some((-0.015, 0.02)));
    let Contribution::Data(d) = &reread.contributions()[2] else { panic!("expected data") };
    assert_eq!(d.value(), &[0.8]);
    let add = reread.additive().next().unwrap();
    assert_eq!(add.x_nodes1(0), Some(&[0.2, 0.6][..]));
    assert_eq!(add.wgt_stat().wgt_obs_num_ev.lengths(0), vec![1, 1]);

    let mut restored = original.clone();
    restored.erase_bin(1).unwrap();
    restored.cat_bin(&original, 1).unwrap();
    assert_eq!(restored.write_string(), std::fs::read_to_string(&path).unwrap());
}

#[test]
fn every_supported_version_round_trips() {
    for version in SUPPORTED_VERSIONS {
        let synth = Synthetic::with_version(version);
        let text = synth.render();
        let t = FastNloTable::read_str(&text)
            .unwrap_or_else(|e| panic!("version {version} failed to read: {e}"));
        let expected_layout =
            if version >= 24000 { TableLayout::V24 } else { TableLayout::Legacy };
        assert_eq!(t.layout(), expected_layout);

        let add = t.additive().next().unwrap();
        assert_eq!(add.nxmax(0), synth.nxmax());
        assert_eq!(add.sigma_tilde().as_slice().len(), synth.n_coefficients());
        assert_eq!(add.wgt_stat().wgt_num_ev, synth.wgt_num_ev);
        assert_eq!(t.write_string(), text, "version {version} did not round-trip");
    }
}

#[test]
fn v24_blocks_carry_tag_and_explicit_statistics() {
    let t = FastNloTable::read_str(&Synthetic::with_version(25000).render()).unwrap();
    let add = t.additive().next().unwrap();
    assert_eq!(add.nevt_encoding(), NevtEncoding::Explicit);
    assert_eq!(add.nevt(), 1000.0);
    assert_eq!(add.wgt_stat().num_table, 1);
    assert!(add.scales().extras.is_some());
    assert_eq!(add.central_scale_index(), Some(0));
}

#[test]
fn sigma_tilde_follows_storage_order() {
    let synth = Synthetic::default();
    let t = FastNloTable::read_str(&synth.render()).unwrap();
    let add = t.additive().next().unwrap();
    let nsub = synth.n_subproc;
    let nx = synth.nxmax();
    // [bin][scalevar][scalenode][x][subproc], last index fastest.
    let bin = 1;
    let (inode, ix, proc) = (1, add.x_index(bin, 1, 2).unwrap(), 1);
    let flat = bin * 2 * nx * nsub + inode * nx * nsub + ix * nsub + proc;
    let got = add.sigma_tilde().get(bin, &[0, inode, ix, proc]).unwrap();
    assert_eq!(got, synth.scale * (flat + 1) as f64);
    assert_eq!(add.x_index_pairs(bin)[ix], (1, 2));
}

#[test]
fn truncated_tables_are_rejected() {
    let text = Synthetic { n_bins: 1, n_x: 2, n_subproc: 1, ..Synthetic::default() }.render();
    for end in 0..text.len() - 1 {
        assert!(FastNloTable::read_str(&text[..end]).is_err(), "prefix of {end} bytes decoded");
    }
}

#[test]
fn non_finite_coefficient_aborts() {
    let synth = Synthetic::default();
    let text = synth.render();
    let last = format!("\n{}\n1234567890\n", synth.scale * synth.n_coefficients() as f64);
    let corrupt = text.replace(&last, "\nnan\n1234567890\n");
    assert_ne!(corrupt, text);
    let err = FastNloTable::read_str(&corrupt).unwrap_err();
    assert_eq!(err.kind(), ErrorKind::NonFiniteValue);
}

#[test]
fn framing_and_version_errors() {
    let text = Synthetic::default().render();

    let err = FastNloTable::read_str(&text.replacen("23600", "23700", 1)).unwrap_err();
    assert_eq!(err.kind(), ErrorKind::UnsupportedVersion);

    // Second sentinel (scenario) corrupted.
    let parts: Vec<&str> = text.splitn(3, "1234567890\n").collect();
    let corrupt = format!("1234567890\n{}9999\n{}", parts[1], parts[2]);
    let err = FastNloTable::read_str(&corrupt).unwrap_err();
    assert_eq!(err.kind(), ErrorKind::Framing);

    let unknown = text.replacen("12\n0\n0\n1\n2\n0\n", "12\n1\n1\n1\n2\n0\n", 1);
    let err = FastNloTable::read_str(&unknown).unwrap_err();
    assert_eq!(err.kind(), ErrorKind::UnknownContributionType);
}

#[test]
fn conversion_options_reject_linear_storage() {
    let text = Synthetic { n_x: 3, ..Synthetic::default() }.render();
    // NPDFDim sits right after the two PDG codes.
    let linear = text.replacen("2212\n2212\n1\n", "2212\n2212\n0\n", 1);
    assert_ne!(linear, text);
    let err = FastNloTable::read_with(linear.as_bytes(), &ReadOptions::conversion()).unwrap_err();
    assert_eq!(err.kind(), ErrorKind::UnimplementedConfiguration);
}

#[test]
fn summary_serializes_to_json() {
    let t = FastNloTable::open(fixture_path("minimal_v23600.tab")).unwrap();
    let summary = TableSummary::new(&t);
    assert_eq!(summary.contributions.len(), 3);
    assert_eq!(summary.contributions[0].n_subproc, Some(2));
    assert_eq!(summary.contributions[1].n_sources, Some(2));

    let json = summary.to_json_pretty().unwrap();
    let back: TableSummary = serde_json::from_str(&json).unwrap();
    assert_eq!(back, summary);
    let value: serde_json::Value = serde_json::from_str(&json).unwrap();
    assert_eq!(value["layout"], "Legacy");
    assert_eq!(value["contributions"][0]["wgt_stat"]["wgt_num_ev"], 50);
}

#[test]
fn write_file_then_open() {
    let t = FastNloTable::read_str(&Synthetic::with_version(24000).render()).unwrap();
    let path = std::env::temp_dir().join(format!("ns_fastnlo_write_{}.tab", std::process::id()));
    t.write_file(&path).unwrap();
    let back = FastNloTable::open(&path).unwrap();
    std::fs::remove_file(&path).ok();
    assert_eq!(back, t);
}
