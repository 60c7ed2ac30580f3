//! Object selection: loose/tight/clean classification, per-event counts,
//! leading-object and dilepton-pair extraction.
//!
//! All derived quantities are computed fresh per batch and never mutate the
//! input columns. Flags are flat boolean columns parallel to the jagged
//! object tables; "leading" selections are `Option`-valued per event so an
//! event with zero objects of a type propagates as `None` rather than a
//! panic.

use crate::corrections::BtagWorkingPoints;
use crate::event::{EventBatch, JaggedTable};
use crate::ids::IdBundle;
use mt_core::{delta_r, FourVector, Result};

/// Cleaning radius for taus and photons against loose leptons.
const LEPTON_CLEAN_DR: f64 = 0.5;
/// Cleaning radius for jets against loose leptons and clean photons.
const JET_CLEAN_DR: f64 = 0.4;

/// Resolved kinematics of one selected object.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct ObjectKinematics {
    /// Transverse momentum.
    pub pt: f64,
    /// Pseudorapidity.
    pub eta: f64,
    /// Azimuthal angle.
    pub phi: f64,
}

/// A leading same-flavor dilepton pair.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct DileptonPair {
    /// Invariant mass of the pair.
    pub mass: f64,
    /// Transverse momentum of the pair.
    pub pt: f64,
    /// Azimuthal angle of the pair momentum.
    pub phi: f64,
    /// Higher-index leg kinematics (first of the pair as stored).
    pub leg0: ObjectKinematics,
    /// Second leg kinematics.
    pub leg1: ObjectKinematics,
}

/// Flags and per-event counts for one object type.
#[derive(Debug, Clone, Default)]
pub struct FlagSummary {
    /// Loose flag per object (flat, parallel to the jagged table).
    pub isloose: Vec<bool>,
    /// Tight flag per object.
    pub istight: Vec<bool>,
    /// Cleaning flag per object (all-true for types that are not cleaned).
    pub isclean: Vec<bool>,
    /// Total objects per event.
    pub n_total: Vec<usize>,
    /// Loose (and clean, where cleaning applies) objects per event.
    pub n_loose: Vec<usize>,
    /// Tight (and clean) objects per event.
    pub n_tight: Vec<usize>,
}

/// Everything the region classifier and weight composer need about the
/// batch's physics objects.
#[derive(Debug, Clone)]
pub struct SelectedObjects {
    /// Electron flags/counts.
    pub ele: FlagSummary,
    /// Muon flags/counts.
    pub mu: FlagSummary,
    /// Tau flags/counts (loose only; taus have no tight tier here).
    pub tau: FlagSummary,
    /// Photon flags/counts.
    pub pho: FlagSummary,
    /// Jet table (kinematics + discriminants), cloned from the batch.
    pub jet_table: JaggedTable,
    /// Jet passes good-jet ID and cleaning, per object.
    pub jet_keep: Vec<bool>,
    /// Clean good jets per event.
    pub n_clean_jets: Vec<usize>,
    /// Clean jets passing the deepCSV loose working point, per event.
    pub n_dcsv_loose: Vec<usize>,
    /// Clean jets passing the deepFlavor loose working point, per event.
    pub n_dflv_loose: Vec<usize>,
    /// HEM-sector jets per event.
    pub n_hem_jets: Vec<usize>,
    /// Leading tight electron per event.
    pub leading_ele: Vec<Option<ObjectKinematics>>,
    /// Leading tight muon per event.
    pub leading_mu: Vec<Option<ObjectKinematics>>,
    /// Leading clean tight photon per event.
    pub leading_pho: Vec<Option<ObjectKinematics>>,
    /// Leading good clean jet per event.
    pub leading_jet: Vec<Option<ObjectKinematics>>,
    /// Leading loose-dielectron pair per event.
    pub diele: Vec<Option<DileptonPair>>,
    /// Leading loose-dimuon pair per event.
    pub dimu: Vec<Option<DileptonPair>>,
}

/// A required attribute column, tolerating tables with zero objects (a batch
/// with no objects of a type carries no columns for it).
fn col_or_empty(table: &JaggedTable, name: &str) -> Result<Vec<f64>> {
    if table.n_objects() == 0 {
        return Ok(Vec::new());
    }
    Ok(table.column(name)?.to_vec())
}

/// (eta, phi) positions of flagged objects, grouped per event, used as
/// cleaning references.
fn flagged_positions(
    table: &JaggedTable,
    keep: &[bool],
) -> Result<Vec<Vec<(f64, f64)>>> {
    let eta = col_or_empty(table, "eta")?;
    let phi = col_or_empty(table, "phi")?;
    let mut out = Vec::with_capacity(table.n_events());
    for ev in 0..table.n_events() {
        let mut positions = Vec::new();
        for i in table.range(ev) {
            if keep[i] {
                positions.push((eta[i], phi[i]));
            }
        }
        out.push(positions);
    }
    Ok(out)
}

/// True when (eta, phi) lies within `dr` of any reference position.
fn matched(eta: f64, phi: f64, refs: &[(f64, f64)], dr: f64) -> bool {
    refs.iter().any(|&(e, p)| delta_r(eta, phi, e, p) < dr)
}

/// Per-event count of objects with both flags set.
fn count_flagged(table: &JaggedTable, a: &[bool], b: &[bool]) -> Vec<usize> {
    (0..table.n_events()).map(|ev| table.range(ev).filter(|&i| a[i] && b[i]).count()).collect()
}

/// Index of the highest-pt object per event, kept only if it passes `keep`.
///
/// Mirrors the leading-object convention of the selection: the leading
/// candidate is the hardest object of the type, and it is dropped (not
/// replaced by the next-hardest) when it fails its own flags.
fn leading_filtered(
    table: &JaggedTable,
    pt: &[f64],
    keep: &[bool],
) -> Vec<Option<usize>> {
    (0..table.n_events())
        .map(|ev| {
            let best = table
                .range(ev)
                .max_by(|&a, &b| pt[a].partial_cmp(&pt[b]).unwrap_or(std::cmp::Ordering::Equal));
            best.filter(|&i| keep[i])
        })
        .collect()
}

fn kinematics_at(table: &JaggedTable, idx: Option<usize>) -> Result<Option<ObjectKinematics>> {
    let pt = col_or_empty(table, "pt")?;
    let eta = col_or_empty(table, "eta")?;
    let phi = col_or_empty(table, "phi")?;
    Ok(idx.map(|i| ObjectKinematics { pt: pt[i], eta: eta[i], phi: phi[i] }))
}

/// Leading same-flavor pair of loose leptons per event, ranked by pair pt.
fn leading_pairs(table: &JaggedTable, isloose: &[bool]) -> Result<Vec<Option<DileptonPair>>> {
    let pt = table.column("pt")?;
    let eta = table.column("eta")?;
    let phi = table.column("phi")?;
    let mass = table.column("mass")?;

    let mut out = Vec::with_capacity(table.n_events());
    for ev in 0..table.n_events() {
        let loose: Vec<usize> = table.range(ev).filter(|&i| isloose[i]).collect();
        let mut best: Option<DileptonPair> = None;
        for (a, &i) in loose.iter().enumerate() {
            for &j in &loose[a + 1..] {
                let p4 = FourVector::from_ptetaphim(pt[i], eta[i], phi[i], mass[i])
                    + FourVector::from_ptetaphim(pt[j], eta[j], phi[j], mass[j]);
                let pair = DileptonPair {
                    mass: p4.mass(),
                    pt: p4.pt(),
                    phi: p4.phi(),
                    leg0: ObjectKinematics { pt: pt[i], eta: eta[i], phi: phi[i] },
                    leg1: ObjectKinematics { pt: pt[j], eta: eta[j], phi: phi[j] },
                };
                if best.as_ref().map_or(true, |b| pair.pt > b.pt) {
                    best = Some(pair);
                }
            }
        }
        out.push(best);
    }
    Ok(out)
}

/// Classify all physics objects of a batch.
///
/// Cleaning priority: loose leptons clean taus and photons (ΔR < 0.5), then
/// loose leptons and clean loose photons clean jets (ΔR < 0.4).
pub fn select_objects(
    batch: &EventBatch,
    ids: &IdBundle,
    wps: &BtagWorkingPoints,
) -> Result<SelectedObjects> {
    let n_events = batch.n_events();

    // ── Electrons ──
    let e = batch.objects("Electron");
    let e_pt = col_or_empty(&e, "pt")?;
    let e_eta = col_or_empty(&e, "eta")?;
    let e_dxy = col_or_empty(&e, "dxy")?;
    let e_dz = col_or_empty(&e, "dz")?;
    let e_id = col_or_empty(&e, "cutBased")?;
    let e_loose: Vec<bool> = (0..e.n_objects())
        .map(|i| ids.is_loose_electron(e_pt[i], e_eta[i], e_dxy[i], e_dz[i], e_id[i]))
        .collect();
    let e_tight: Vec<bool> = (0..e.n_objects())
        .map(|i| ids.is_tight_electron(e_pt[i], e_eta[i], e_dxy[i], e_dz[i], e_id[i]))
        .collect();

    // ── Muons ──
    let m = batch.objects("Muon");
    let m_pt = col_or_empty(&m, "pt")?;
    let m_eta = col_or_empty(&m, "eta")?;
    let m_iso = col_or_empty(&m, "pfRelIso04_all")?;
    let m_loose_id = col_or_empty(&m, "looseId")?;
    let m_tight_id = col_or_empty(&m, "tightId")?;
    let m_loose: Vec<bool> = (0..m.n_objects())
        .map(|i| ids.is_loose_muon(m_pt[i], m_eta[i], m_iso[i], m_loose_id[i] != 0.0))
        .collect();
    let m_tight: Vec<bool> = (0..m.n_objects())
        .map(|i| ids.is_tight_muon(m_pt[i], m_eta[i], m_iso[i], m_tight_id[i] != 0.0))
        .collect();

    let loose_ele_pos = flagged_positions(&e, &e_loose)?;
    let loose_mu_pos = flagged_positions(&m, &m_loose)?;

    // ── Taus: cleaned against loose leptons ──
    let t = batch.objects("Tau");
    let t_clean: Vec<bool> = {
        let eta = col_or_empty(&t, "eta")?;
        let phi = col_or_empty(&t, "phi")?;
        let mut clean = vec![true; t.n_objects()];
        for ev in 0..n_events {
            for i in t.range(ev) {
                clean[i] = !matched(eta[i], phi[i], &loose_ele_pos[ev], LEPTON_CLEAN_DR)
                    && !matched(eta[i], phi[i], &loose_mu_pos[ev], LEPTON_CLEAN_DR);
            }
        }
        clean
    };
    let t_loose: Vec<bool> = if t.n_objects() == 0 {
        Vec::new()
    } else {
        let pt = t.column("pt")?;
        let eta = t.column("eta")?;
        let dm = t.column("idDecayMode")?;
        let mva = t.column("idMVAoldDM2017v2")?;
        (0..t.n_objects())
            .map(|i| ids.is_loose_tau(pt[i], eta[i], dm[i] != 0.0, mva[i]))
            .collect()
    };

    // ── Photons: cleaned against loose leptons ──
    let p = batch.objects("Photon");
    let p_clean: Vec<bool> = {
        let eta = col_or_empty(&p, "eta")?;
        let phi = col_or_empty(&p, "phi")?;
        let mut clean = vec![true; p.n_objects()];
        for ev in 0..n_events {
            for i in p.range(ev) {
                clean[i] = !matched(eta[i], phi[i], &loose_ele_pos[ev], LEPTON_CLEAN_DR)
                    && !matched(eta[i], phi[i], &loose_mu_pos[ev], LEPTON_CLEAN_DR);
            }
        }
        clean
    };
    let (p_loose, p_tight): (Vec<bool>, Vec<bool>) = if p.n_objects() == 0 {
        (Vec::new(), Vec::new())
    } else {
        let pt = p.column("pt")?;
        let eta = p.column("eta")?;
        let id_bits = p.column(ids.photon_id_column())?;
        (
            (0..p.n_objects()).map(|i| ids.is_loose_photon(pt[i], eta[i], id_bits[i])).collect(),
            (0..p.n_objects()).map(|i| ids.is_tight_photon(pt[i], eta[i], id_bits[i])).collect(),
        )
    };
    let p_loose_clean: Vec<bool> =
        p_loose.iter().zip(&p_clean).map(|(&l, &c)| l && c).collect();
    let clean_pho_pos = flagged_positions(&p, &p_loose_clean)?;

    // ── Jets: cleaned against loose leptons and clean loose photons ──
    let j = batch.objects("Jet");
    let j_good: Vec<bool>;
    let j_hem: Vec<bool>;
    let j_clean: Vec<bool>;
    let mut j_dcsv = vec![false; j.n_objects()];
    let mut j_dflv = vec![false; j.n_objects()];
    if j.n_objects() == 0 {
        j_good = Vec::new();
        j_hem = Vec::new();
        j_clean = Vec::new();
    } else {
        let pt = j.column("pt")?;
        let eta = j.column("eta")?;
        let phi = j.column("phi")?;
        let jet_id = j.column("jetId")?;
        let ne_hef = j.column("neHEF")?;
        let ne_em = j.column("neEmEF")?;
        let ch_hef = j.column("chHEF")?;
        let ch_em = j.column("chEmEF")?;
        let dcsv = j.column("btagDeepB")?;
        let dflv = j.column("btagDeepFlavB")?;

        j_good = (0..j.n_objects())
            .map(|i| {
                ids.is_good_jet(
                    pt[i], eta[i], jet_id[i], ne_hef[i], ne_em[i], ch_hef[i], ch_em[i],
                )
            })
            .collect();
        j_hem = (0..j.n_objects()).map(|i| ids.is_hem_jet(pt[i], eta[i], phi[i])).collect();

        let mut clean = vec![true; j.n_objects()];
        for ev in 0..n_events {
            for i in j.range(ev) {
                clean[i] = !matched(eta[i], phi[i], &loose_ele_pos[ev], JET_CLEAN_DR)
                    && !matched(eta[i], phi[i], &loose_mu_pos[ev], JET_CLEAN_DR)
                    && !matched(eta[i], phi[i], &clean_pho_pos[ev], JET_CLEAN_DR);
            }
        }
        j_clean = clean;

        for i in 0..j.n_objects() {
            j_dcsv[i] = dcsv[i] > wps.deepcsv_loose;
            j_dflv[i] = dflv[i] > wps.deepflav_loose;
        }
    }
    let jet_keep: Vec<bool> = j_good.iter().zip(&j_clean).map(|(&g, &c)| g && c).collect();
    let jet_dcsv_keep: Vec<bool> = jet_keep.iter().zip(&j_dcsv).map(|(&k, &b)| k && b).collect();
    let jet_dflv_keep: Vec<bool> = jet_keep.iter().zip(&j_dflv).map(|(&k, &b)| k && b).collect();

    // ── Summaries, leading objects, pairs ──
    let all_true = |n: usize| vec![true; n];

    let ele = FlagSummary {
        n_total: (0..n_events).map(|ev| e.count(ev)).collect(),
        n_loose: count_flagged(&e, &e_loose, &all_true(e.n_objects())),
        n_tight: count_flagged(&e, &e_tight, &all_true(e.n_objects())),
        isloose: e_loose.clone(),
        istight: e_tight.clone(),
        isclean: all_true(e.n_objects()),
    };
    let mu = FlagSummary {
        n_total: (0..n_events).map(|ev| m.count(ev)).collect(),
        n_loose: count_flagged(&m, &m_loose, &all_true(m.n_objects())),
        n_tight: count_flagged(&m, &m_tight, &all_true(m.n_objects())),
        isloose: m_loose.clone(),
        istight: m_tight.clone(),
        isclean: all_true(m.n_objects()),
    };
    let tau = FlagSummary {
        n_total: (0..n_events).map(|ev| t.count(ev)).collect(),
        n_loose: count_flagged(&t, &t_loose, &t_clean),
        n_tight: vec![0; n_events],
        isloose: t_loose,
        istight: vec![false; t.n_objects()],
        isclean: t_clean,
    };
    let pho = FlagSummary {
        n_total: (0..n_events).map(|ev| p.count(ev)).collect(),
        n_loose: count_flagged(&p, &p_loose, &p_clean),
        n_tight: count_flagged(&p, &p_tight, &p_clean),
        isloose: p_loose,
        istight: p_tight.clone(),
        isclean: p_clean.clone(),
    };

    let leading_ele_idx = leading_filtered(&e, &e_pt, &e_tight);
    let leading_mu_idx = leading_filtered(&m, &m_pt, &m_tight);
    let p_tight_clean: Vec<bool> = p_tight.iter().zip(&p_clean).map(|(&t, &c)| t && c).collect();
    let leading_pho_idx = if p.n_objects() == 0 {
        vec![None; n_events]
    } else {
        leading_filtered(&p, p.column("pt")?, &p_tight_clean)
    };
    let leading_jet_idx = if j.n_objects() == 0 {
        vec![None; n_events]
    } else {
        leading_filtered(&j, j.column("pt")?, &jet_keep)
    };

    let leading_ele = leading_ele_idx
        .into_iter()
        .map(|i| kinematics_at(&e, i))
        .collect::<Result<Vec<_>>>()?;
    let leading_mu = leading_mu_idx
        .into_iter()
        .map(|i| kinematics_at(&m, i))
        .collect::<Result<Vec<_>>>()?;
    let leading_pho = leading_pho_idx
        .into_iter()
        .map(|i| if p.n_objects() == 0 { Ok(None) } else { kinematics_at(&p, i) })
        .collect::<Result<Vec<_>>>()?;
    let leading_jet = leading_jet_idx
        .into_iter()
        .map(|i| if j.n_objects() == 0 { Ok(None) } else { kinematics_at(&j, i) })
        .collect::<Result<Vec<_>>>()?;

    let diele = if e.n_objects() == 0 { vec![None; n_events] } else { leading_pairs(&e, &e_loose)? };
    let dimu = if m.n_objects() == 0 { vec![None; n_events] } else { leading_pairs(&m, &m_loose)? };

    let n_clean_jets = (0..n_events).map(|ev| j.range(ev).filter(|&i| jet_keep[i]).count()).collect();
    let n_dcsv_loose =
        (0..n_events).map(|ev| j.range(ev).filter(|&i| jet_dcsv_keep[i]).count()).collect();
    let n_dflv_loose =
        (0..n_events).map(|ev| j.range(ev).filter(|&i| jet_dflv_keep[i]).count()).collect();
    let n_hem_jets = (0..n_events).map(|ev| j.range(ev).filter(|&i| j_hem[i]).count()).collect();

    Ok(SelectedObjects {
        ele,
        mu,
        tau,
        pho,
        jet_table: j,
        jet_keep,
        n_clean_jets,
        n_dcsv_loose,
        n_dflv_loose,
        n_hem_jets,
        leading_ele,
        leading_mu,
        leading_pho,
        leading_jet,
        diele,
        dimu,
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::metadata::Year;
    use approx::assert_relative_eq;
    use std::f64::consts::PI;

    fn table(counts: &[usize], cols: &[(&str, Vec<f64>)]) -> JaggedTable {
        let mut offsets = vec![0usize];
        for c in counts {
            offsets.push(offsets.last().unwrap() + c);
        }
        JaggedTable::new(
            offsets,
            cols.iter().map(|(n, v)| (n.to_string(), v.clone())),
        )
        .unwrap()
    }

    fn electron_table(counts: &[usize], pt: Vec<f64>, eta: Vec<f64>, phi: Vec<f64>, id: Vec<f64>) -> JaggedTable {
        let n = pt.len();
        table(
            counts,
            &[
                ("pt", pt),
                ("eta", eta),
                ("phi", phi),
                ("mass", vec![0.000511; n]),
                ("dxy", vec![0.01; n]),
                ("dz", vec![0.01; n]),
                ("cutBased", id),
            ],
        )
    }

    #[test]
    fn leading_on_empty_event_is_none() {
        let e = electron_table(&[0, 1], vec![50.0], vec![0.1], vec![0.2], vec![4.0]);
        let batch = EventBatch::new("TTJets", 2, [], [], [("Electron".to_string(), e)], None)
            .unwrap();
        let objs = select_objects(
            &batch,
            &IdBundle::new(Year::Y2018),
            &BtagWorkingPoints::for_year(Year::Y2018),
        )
        .unwrap();
        assert!(objs.leading_ele[0].is_none());
        let lead = objs.leading_ele[1].unwrap();
        assert_relative_eq!(lead.pt, 50.0);
        assert_eq!(objs.ele.n_tight, vec![0, 1]);
        assert_eq!(objs.ele.n_loose, vec![0, 1]);
    }

    #[test]
    fn leading_dropped_when_hardest_fails_tight() {
        // Hardest electron only passes loose; leading must be None, not the
        // second-hardest tight one.
        let e = electron_table(
            &[2],
            vec![80.0, 50.0],
            vec![0.1, 0.2],
            vec![0.0, 1.0],
            vec![1.0, 4.0],
        );
        let batch =
            EventBatch::new("TTJets", 1, [], [], [("Electron".to_string(), e)], None).unwrap();
        let objs = select_objects(
            &batch,
            &IdBundle::new(Year::Y2018),
            &BtagWorkingPoints::for_year(Year::Y2018),
        )
        .unwrap();
        assert!(objs.leading_ele[0].is_none());
        assert_eq!(objs.ele.n_tight, vec![1]);
    }

    #[test]
    fn tau_cleaned_by_loose_electron() {
        let e = electron_table(&[1], vec![30.0], vec![1.0], vec![1.0], vec![1.0]);
        let t = table(
            &[2],
            &[
                ("pt", vec![40.0, 40.0]),
                ("eta", vec![1.0, -1.0]),
                ("phi", vec![1.05, 1.0]),
                ("idDecayMode", vec![1.0, 1.0]),
                ("idMVAoldDM2017v2", vec![15.0, 15.0]),
            ],
        );
        let batch = EventBatch::new(
            "TTJets",
            1,
            [],
            [],
            [("Electron".to_string(), e), ("Tau".to_string(), t)],
            None,
        )
        .unwrap();
        let objs = select_objects(
            &batch,
            &IdBundle::new(Year::Y2018),
            &BtagWorkingPoints::for_year(Year::Y2018),
        )
        .unwrap();
        // First tau overlaps the electron, second is far away in eta.
        assert_eq!(objs.tau.isclean, vec![false, true]);
        assert_eq!(objs.tau.n_loose, vec![1]);
    }

    #[test]
    fn dilepton_pair_picks_highest_pair_pt() {
        // Three loose electrons; the (0,1) pair is back-to-back (low pair pt),
        // (0,2) is aligned (high pair pt).
        let e = electron_table(
            &[3],
            vec![100.0, 100.0, 50.0],
            vec![0.0, 0.0, 0.0],
            vec![0.0, PI, 0.1],
            vec![1.0, 1.0, 1.0],
        );
        let batch =
            EventBatch::new("DY", 1, [], [], [("Electron".to_string(), e)], None).unwrap();
        let objs = select_objects(
            &batch,
            &IdBundle::new(Year::Y2018),
            &BtagWorkingPoints::for_year(Year::Y2018),
        )
        .unwrap();
        let pair = objs.diele[0].unwrap();
        assert!(pair.pt > 140.0, "expected aligned pair, got pt={}", pair.pt);
        assert_relative_eq!(pair.leg0.pt, 100.0);
        assert_relative_eq!(pair.leg1.pt, 50.0);
    }

    #[test]
    fn single_lepton_yields_no_pair() {
        let e = electron_table(&[1], vec![50.0], vec![0.0], vec![0.0], vec![4.0]);
        let batch =
            EventBatch::new("DY", 1, [], [], [("Electron".to_string(), e)], None).unwrap();
        let objs = select_objects(
            &batch,
            &IdBundle::new(Year::Y2018),
            &BtagWorkingPoints::for_year(Year::Y2018),
        )
        .unwrap();
        assert!(objs.diele[0].is_none());
    }
}
