//! End-to-end pipeline tests on synthetic columnar batches.

use approx::assert_relative_eq;
use mt_analysis::histograms::CategoryKey;
use mt_analysis::{
    AnalysisProcessor, CalibrationBundle, EventBatch, JaggedTable, Lookup1d, XsecTable, Year,
    YearTable,
};

const MET_FILTERS: &[&str] = &[
    "Flag_goodVertices",
    "Flag_globalSuperTightHalo2016Filter",
    "Flag_HBHENoiseFilter",
    "Flag_HBHENoiseIsoFilter",
    "Flag_EcalDeadCellTriggerPrimitiveFilter",
    "Flag_BadPFMuonFilter",
];

fn jagged(counts: &[usize], cols: &[(&str, Vec<f64>)]) -> JaggedTable {
    let mut offsets = vec![0usize];
    for c in counts {
        offsets.push(offsets.last().unwrap() + c);
    }
    JaggedTable::new(offsets, cols.iter().map(|(n, v)| (n.to_string(), v.clone()))).unwrap()
}

fn muon_table(counts: &[usize], pt: Vec<f64>, eta: Vec<f64>, phi: Vec<f64>) -> JaggedTable {
    let n = pt.len();
    jagged(
        counts,
        &[
            ("pt", pt),
            ("eta", eta),
            ("phi", phi),
            ("mass", vec![0.105; n]),
            ("pfRelIso04_all", vec![0.05; n]),
            ("looseId", vec![1.0; n]),
            ("tightId", vec![1.0; n]),
        ],
    )
}

fn electron_table(counts: &[usize], pt: Vec<f64>, eta: Vec<f64>, phi: Vec<f64>) -> JaggedTable {
    let n = pt.len();
    jagged(
        counts,
        &[
            ("pt", pt),
            ("eta", eta),
            ("phi", phi),
            ("mass", vec![0.000511; n]),
            ("dxy", vec![0.01; n]),
            ("dz", vec![0.01; n]),
            ("cutBased", vec![1.0; n]),
        ],
    )
}

fn btag_jet_table(counts: &[usize], pt: Vec<f64>, eta: Vec<f64>, phi: Vec<f64>) -> JaggedTable {
    let n = pt.len();
    jagged(
        counts,
        &[
            ("pt", pt),
            ("eta", eta),
            ("phi", phi),
            ("jetId", vec![2.0; n]),
            ("neHEF", vec![0.1; n]),
            ("neEmEF", vec![0.1; n]),
            ("chHEF", vec![0.5; n]),
            ("chEmEF", vec![0.1; n]),
            ("btagDeepB", vec![0.5; n]),
            ("btagDeepFlavB", vec![0.5; n]),
            ("hadronFlavour", vec![5.0; n]),
        ],
    )
}

fn all_true(n: usize) -> Vec<bool> {
    vec![true; n]
}

fn key(dataset: &str, region: &str, systematic: &str) -> CategoryKey {
    CategoryKey {
        dataset: dataset.to_string(),
        region: region.to_string(),
        systematic: systematic.to_string(),
    }
}

/// Three synthetic events: one tight muon, zero leptons, one loose dielectron
/// pair at mass 91 and pair pt 250. Each lepton event also carries one clean
/// b-tagged jet so the region prerequisites hold.
fn three_event_batch(dataset: &str, gen_weight: Option<Vec<f64>>) -> EventBatch {
    // Two same-phi massless-ish legs of pt 200 and 50: pair pt is exactly
    // 250 and the eta gap is tuned for an invariant mass of 91.
    let electrons = electron_table(
        &[0, 0, 2],
        vec![200.0, 50.0],
        vec![0.0, 0.8812],
        vec![0.0, 0.0],
    );
    let muons = muon_table(&[1, 0, 0], vec![50.0], vec![0.1], vec![0.3]);
    let jets = btag_jet_table(&[1, 0, 1], vec![100.0; 2], vec![0.5; 2], vec![2.5, 3.0]);

    let mut flags: Vec<(String, Vec<bool>)> =
        MET_FILTERS.iter().map(|f| (f.to_string(), all_true(3))).collect();
    flags.push(("HLT_IsoMu24".to_string(), vec![true, false, false]));
    flags.push(("HLT_Ele32_WPTight_Gsf".to_string(), vec![false, false, true]));

    EventBatch::new(
        dataset,
        3,
        [
            ("MET_pt".to_string(), vec![150.0, 200.0, 120.0]),
            ("MET_phi".to_string(), vec![1.0, -2.0, 2.5]),
            ("CaloMET_pt".to_string(), vec![140.0, 190.0, 110.0]),
            ("PV_npvs".to_string(), vec![10.0, 10.0, 10.0]),
        ],
        flags,
        [
            ("Electron".to_string(), electrons),
            ("Muon".to_string(), muons),
            ("Jet".to_string(), jets),
        ],
        gen_weight,
    )
    .unwrap()
}

fn processor(xsec: XsecTable) -> AnalysisProcessor {
    AnalysisProcessor::new(Year::Y2018, CalibrationBundle::identity(), xsec).unwrap()
}

#[test]
fn three_event_scenario_routes_events_to_their_regions() {
    let batch = three_event_batch("TTJets_sync", Some(vec![2.0, 3.0, 5.0]));
    let proc = processor(XsecTable::new([("TTJets_sync".to_string(), -1.0)]));
    let acc = proc.process(&batch).unwrap();

    assert_relative_eq!(acc.sumw["TTJets_sync"], 10.0);

    // Event 1 lands in the single-muon signal region at its genWeight (all
    // calibration tables are identity): MET 150 falls in bin 7 of 30x20.
    let met_srm = acc.histograms["met"].get(&key("TTJets_sync", "srm", "nominal")).unwrap();
    assert_relative_eq!(met_srm.integral(), 2.0);
    assert_relative_eq!(met_srm.bin_content()[7], 2.0);

    // No event has a tight electron, so the electron signal region is empty;
    // event 2 (zero leptons) shows up in no lepton region at all.
    let met_sre = acc.histograms["met"].get(&key("TTJets_sync", "sre", "nominal")).unwrap();
    assert_relative_eq!(met_sre.integral(), 0.0);

    // Event 3's pair mass sits in the [90, 95) bin of the dielectron-mass
    // histogram for the dielectron control region, at the event's weight.
    let mass = acc.histograms["dielemass"]
        .get(&key("TTJets_sync", "dilepe", "nominal"))
        .unwrap();
    assert_relative_eq!(mass.integral(), 5.0);
    assert_relative_eq!(mass.bin_content()[18], 5.0);

    // The dimuon control region saw no pair.
    let dimu = acc.histograms["dimumass"]
        .get(&key("TTJets_sync", "dilepm", "nominal"))
        .unwrap();
    assert_relative_eq!(dimu.integral(), 0.0);

    // Simulated batches carry the b-tag variations alongside the nominal.
    assert!(acc.histograms["met"].get(&key("TTJets_sync", "srm", "btagUp")).is_some());
    assert!(acc.histograms["met"].get(&key("TTJets_sync", "srm", "btagDown")).is_some());
}

#[test]
fn data_batch_fills_nominal_only_at_unit_weight() {
    let batch = three_event_batch("SingleMuon_sync", None);
    let proc = processor(XsecTable::new([("SingleMuon_sync".to_string(), -1.0)]));
    let acc = proc.process(&batch).unwrap();

    assert_relative_eq!(acc.sumw["SingleMuon_sync"], 1.0);

    let met_srm = acc.histograms["met"].get(&key("SingleMuon_sync", "srm", "nominal")).unwrap();
    assert_relative_eq!(met_srm.integral(), 1.0);
    assert!(acc.histograms["met"].get(&key("SingleMuon_sync", "srm", "btagUp")).is_none());

    // SingleMuon routes only to muon-flavor regions.
    assert!(acc.histograms["met"].get(&key("SingleMuon_sync", "sre", "nominal")).is_none());
}

#[test]
fn flavor_split_duplicates_sumw_and_partitions_fills() {
    // Two single-muon events; the first has a hard-process b quark, the
    // second only a soft Z boson.
    let hard_final = ((1u64 << 8) | (1u64 << 13)) as f64;
    let gen = jagged(
        &[1, 1],
        &[
            ("pt", vec![40.0, 50.0]),
            ("pdgId", vec![5.0, 23.0]),
            ("statusFlags", vec![hard_final, hard_final]),
        ],
    );
    let muons = muon_table(&[1, 1], vec![50.0, 60.0], vec![0.1, -0.2], vec![0.3, 1.0]);
    let jets = btag_jet_table(&[1, 1], vec![100.0; 2], vec![0.5; 2], vec![2.5, 3.0]);

    let mut flags: Vec<(String, Vec<bool>)> =
        MET_FILTERS.iter().map(|f| (f.to_string(), all_true(2))).collect();
    flags.push(("HLT_IsoMu24".to_string(), all_true(2)));

    let batch = EventBatch::new(
        "DYJets_sync",
        2,
        [
            ("MET_pt".to_string(), vec![100.0, 300.0]),
            ("MET_phi".to_string(), vec![1.0, -2.0]),
            ("CaloMET_pt".to_string(), vec![90.0, 290.0]),
            ("PV_npvs".to_string(), vec![10.0, 10.0]),
        ],
        flags,
        [
            ("Muon".to_string(), muons),
            ("Jet".to_string(), jets),
            ("GenPart".to_string(), gen),
        ],
        Some(vec![2.0, 3.0]),
    )
    .unwrap();

    let proc = processor(XsecTable::new([("DYJets_sync".to_string(), -1.0)]));
    let acc = proc.process(&batch).unwrap();

    // Both flavor tags record the full batch's generated-weight sum.
    assert_relative_eq!(acc.sumw["HF--DYJets_sync"], 5.0);
    assert_relative_eq!(acc.sumw["LF--DYJets_sync"], 5.0);
    assert!(!acc.sumw.contains_key("DYJets_sync"));

    // Observables split by the flavor indicator: MET 100 (bin 5) goes to the
    // heavy-flavor tag, MET 300 (bin 15) to the light-flavor tag.
    let hf = acc.histograms["met"].get(&key("HF--DYJets_sync", "srm", "nominal")).unwrap();
    assert_relative_eq!(hf.integral(), 2.0);
    assert_relative_eq!(hf.bin_content()[5], 2.0);

    let lf = acc.histograms["met"].get(&key("LF--DYJets_sync", "srm", "nominal")).unwrap();
    assert_relative_eq!(lf.integral(), 3.0);
    assert_relative_eq!(lf.bin_content()[15], 3.0);
}

#[test]
fn sentinel_xsec_leaves_histograms_untouched() {
    let batch = three_event_batch("TTJets_sync", Some(vec![2.0, 3.0, 5.0]));
    let proc = processor(XsecTable::new([("TTJets_sync".to_string(), -1.0)]));
    let mut acc = proc.process(&batch).unwrap();

    let before = acc.histograms["met"]
        .get(&key("TTJets_sync", "srm", "nominal"))
        .unwrap()
        .clone();
    proc.postprocess(&mut acc).unwrap();
    let after = acc.histograms["met"].get(&key("TTJets_sync", "srm", "nominal")).unwrap();
    assert_eq!(&before, after);
    assert_relative_eq!(acc.sumw["TTJets_sync"], 10.0);
}

#[test]
fn postprocess_applies_lumi_xsec_over_sumw() {
    let batch = three_event_batch("TTJets_sync", Some(vec![2.0, 3.0, 5.0]));
    let proc = processor(XsecTable::new([("TTJets_sync".to_string(), 100.0)]));
    let mut acc = proc.process(&batch).unwrap();
    proc.postprocess(&mut acc).unwrap();

    // 2018 luminosity 59740 pb^-1, xsec 100 pb, sumw 10.
    let factor = 59740.0 * 100.0 / 10.0;
    let met_srm = acc.histograms["met"].get(&key("TTJets_sync", "srm", "nominal")).unwrap();
    assert_relative_eq!(met_srm.bin_content()[7], 2.0 * factor);
    // The sumw bookkeeping itself is never rescaled.
    assert_relative_eq!(acc.sumw["TTJets_sync"], 10.0);
}

#[test]
fn batch_merge_is_order_independent() {
    let batch = three_event_batch("TTJets_sync", Some(vec![2.0, 3.0, 5.0]));
    let proc = processor(XsecTable::new([("TTJets_sync".to_string(), -1.0)]));
    let a = proc.process(&batch).unwrap();
    let b = proc.process(&batch).unwrap();

    let mut ab = a.clone();
    ab.merge(&b).unwrap();
    let mut ba = b.clone();
    ba.merge(&a).unwrap();

    let k = key("TTJets_sync", "srm", "nominal");
    assert_eq!(ab.histograms["met"].get(&k), ba.histograms["met"].get(&k));
    assert_relative_eq!(ab.sumw["TTJets_sync"], 20.0);
}

#[test]
fn nan_vertex_count_clamps_instead_of_crashing() {
    // A corrupt vertex count must not take the whole batch down; the binned
    // pileup lookup clamps NaN to its first bin like any below-range input.
    let muons = muon_table(&[1], vec![50.0], vec![0.1], vec![0.3]);
    let jets = btag_jet_table(&[1], vec![100.0], vec![0.5], vec![2.5]);
    let mut flags: Vec<(String, Vec<bool>)> =
        MET_FILTERS.iter().map(|f| (f.to_string(), all_true(1))).collect();
    flags.push(("HLT_IsoMu24".to_string(), vec![true]));
    let batch = EventBatch::new(
        "TTJets_sync",
        1,
        [
            ("MET_pt".to_string(), vec![150.0]),
            ("MET_phi".to_string(), vec![1.0]),
            ("CaloMET_pt".to_string(), vec![140.0]),
            ("PV_npvs".to_string(), vec![f64::NAN]),
        ],
        flags,
        [("Muon".to_string(), muons), ("Jet".to_string(), jets)],
        Some(vec![2.0]),
    )
    .unwrap();

    let mut calib = CalibrationBundle::identity();
    calib.pileup = YearTable::new([(
        Year::Y2018,
        Lookup1d::new(vec![0.0, 20.0, 40.0], vec![0.8, 1.2]).unwrap(),
    )]);
    let proc = AnalysisProcessor::new(
        Year::Y2018,
        calib,
        XsecTable::new([("TTJets_sync".to_string(), -1.0)]),
    )
    .unwrap();
    let acc = proc.process(&batch).unwrap();

    // First pileup bin, so the event fills at genWeight 2.0 times 0.8.
    let met_srm = acc.histograms["met"].get(&key("TTJets_sync", "srm", "nominal")).unwrap();
    assert_relative_eq!(met_srm.integral(), 1.6);
}

#[test]
fn missing_quality_flag_is_an_error() {
    let muons = muon_table(&[1], vec![50.0], vec![0.1], vec![0.3]);
    let batch = EventBatch::new(
        "TTJets_sync",
        1,
        [
            ("MET_pt".to_string(), vec![150.0]),
            ("MET_phi".to_string(), vec![1.0]),
            ("CaloMET_pt".to_string(), vec![140.0]),
            ("PV_npvs".to_string(), vec![10.0]),
        ],
        [],
        [("Muon".to_string(), muons)],
        Some(vec![1.0]),
    )
    .unwrap();
    let proc = processor(XsecTable::new([("TTJets_sync".to_string(), -1.0)]));
    let err = proc.process(&batch).unwrap_err();
    assert!(err.to_string().contains("Flag_goodVertices"));
}
