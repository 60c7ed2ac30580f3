//! The per-batch analysis processor.
//!
//! One [`AnalysisProcessor`] is built per year from validated configuration;
//! [`AnalysisProcessor::process`] is then pure per batch and safe to call
//! concurrently on independent batches, returning a fresh accumulator each
//! time. [`AnalysisProcessor::postprocess`] applies the final
//! luminosity-times-cross-section normalization to a merged accumulator.

use crate::corrections::{BtagWorkingPoints, CalibrationBundle};
use crate::event::EventBatch;
use crate::gen::{wants_flavor_split, GenSummary};
use crate::histograms::{Accumulator, CategoryKey};
use crate::ids::IdBundle;
use crate::metadata::{XsecTable, Year, YearMetadata};
use crate::objects::SelectedObjects;
use crate::regions::{RegionTable, REGISTERED_MASKS};
use crate::selection::SelectionSet;
use crate::weights::{
    standard_rules, validate_rules, RecoilRule, RegionWeightRule, WeightComposer, Weights,
};
use mt_core::{Error, Result, Vec2};
use std::collections::BTreeMap;

/// Systematic variations filled for simulated batches, besides the nominal.
const SYSTEMATICS: &[Option<&str>] = &[None, Some("btagUp"), Some("btagDown")];

/// Year-bound, validated processor for one analysis configuration.
#[derive(Debug)]
pub struct AnalysisProcessor {
    year: Year,
    metadata: YearMetadata,
    ids: IdBundle,
    wps: BtagWorkingPoints,
    calib: CalibrationBundle,
    xsec: XsecTable,
    regions: RegionTable,
    rules: BTreeMap<String, RegionWeightRule>,
}

impl AnalysisProcessor {
    /// Build with the standard region and weight-rule tables.
    ///
    /// All configuration is validated here: the calibration bundle must
    /// cover `year`, every region must reference only registered selection
    /// masks, and every region must have a weight rule.
    pub fn new(year: Year, calib: CalibrationBundle, xsec: XsecTable) -> Result<Self> {
        Self::with_tables(year, calib, xsec, RegionTable::standard()?, standard_rules())
    }

    /// Build with custom region and weight-rule tables, applying the same
    /// eager validation as [`AnalysisProcessor::new`].
    pub fn with_tables(
        year: Year,
        calib: CalibrationBundle,
        xsec: XsecTable,
        regions: RegionTable,
        rules: BTreeMap<String, RegionWeightRule>,
    ) -> Result<Self> {
        calib.validate(year)?;
        regions.validate_against(REGISTERED_MASKS)?;
        validate_rules(&rules, &regions)?;
        tracing::info!(%year, n_regions = regions.names().count(), "processor configured");
        Ok(Self {
            year,
            metadata: YearMetadata::for_year(year),
            ids: IdBundle::new(year),
            wps: BtagWorkingPoints::for_year(year),
            calib,
            xsec,
            regions,
            rules,
        })
    }

    /// The year this processor was built for.
    pub fn year(&self) -> Year {
        self.year
    }

    /// Register all standard selection masks for one batch.
    fn build_selection(
        &self,
        batch: &EventBatch,
        objs: &SelectedObjects,
    ) -> Result<SelectionSet> {
        let n = batch.n_events();
        let mut sel = SelectionSet::new(n);

        // Data-quality filters: every flag must be present and set.
        let mut met_filters = vec![true; n];
        for flag in &self.metadata.met_filter_flags {
            let col = batch.flag(flag).ok_or_else(|| {
                Error::Validation(format!("missing data-quality flag column '{flag}'"))
            })?;
            for (m, &f) in met_filters.iter_mut().zip(col) {
                *m &= f;
            }
        }
        sel.add("met_filters", met_filters)?;

        // Trigger masks: OR over the year's paths; paths absent from the
        // batch contribute nothing.
        let trigger_or = |paths: &[&str]| -> Vec<bool> {
            let mut mask = vec![false; n];
            for path in paths {
                if let Some(col) = batch.flag(path) {
                    for (m, &f) in mask.iter_mut().zip(col) {
                        *m |= f;
                    }
                }
            }
            mask
        };
        sel.add("met_triggers", trigger_or(&self.metadata.met_triggers))?;
        sel.add(
            "singleelectron_triggers",
            trigger_or(&self.metadata.single_electron_triggers),
        )?;
        sel.add("singlemuon_triggers", trigger_or(&self.metadata.single_muon_triggers))?;
        sel.add(
            "singlephoton_triggers",
            trigger_or(&self.metadata.single_photon_triggers),
        )?;

        // Lepton-counting masks, mutually exclusive by construction.
        let e_nloose = &objs.ele.n_loose;
        let e_ntight = &objs.ele.n_tight;
        let mu_nloose = &objs.mu.n_loose;
        let mu_ntight = &objs.mu.n_tight;
        let tau_nloose = &objs.tau.n_loose;
        let pho_nloose = &objs.pho.n_loose;
        let pho_ntight = &objs.pho.n_tight;

        sel.add(
            "iszeroL",
            (0..n)
                .map(|i| {
                    e_nloose[i] == 0 && mu_nloose[i] == 0 && tau_nloose[i] == 0 && pho_nloose[i] == 0
                })
                .collect(),
        )?;
        sel.add(
            "isoneE",
            (0..n)
                .map(|i| {
                    e_ntight[i] == 1 && mu_nloose[i] == 0 && tau_nloose[i] == 0 && pho_nloose[i] == 0
                })
                .collect(),
        )?;
        sel.add(
            "isoneM",
            (0..n)
                .map(|i| {
                    e_nloose[i] == 0 && mu_ntight[i] == 1 && tau_nloose[i] == 0 && pho_nloose[i] == 0
                })
                .collect(),
        )?;
        sel.add(
            "istwoE",
            (0..n)
                .map(|i| {
                    e_nloose[i] == 2
                        && mu_nloose[i] == 0
                        && tau_nloose[i] == 0
                        && pho_nloose[i] == 0
                        && objs.diele[i].map_or(false, |p| {
                            p.mass > 60.0 && p.mass < 120.0 && p.pt > 200.0
                        })
                })
                .collect(),
        )?;
        sel.add(
            "istwoM",
            (0..n)
                .map(|i| {
                    e_nloose[i] == 0
                        && mu_nloose[i] == 2
                        && tau_nloose[i] == 0
                        && pho_nloose[i] == 0
                        && objs.dimu[i].map_or(false, |p| {
                            p.mass > 60.0 && p.mass < 120.0 && p.pt > 200.0
                        })
                })
                .collect(),
        )?;
        sel.add(
            "isoneA",
            (0..n)
                .map(|i| {
                    e_nloose[i] == 0 && mu_nloose[i] == 0 && tau_nloose[i] == 0 && pho_ntight[i] == 1
                })
                .collect(),
        )?;

        sel.add("onebjet", objs.n_dflv_loose.iter().map(|&c| c >= 1).collect())?;

        // The HEM veto only applies to 2018 data-taking.
        let no_hem = if self.year == Year::Y2018 {
            objs.n_hem_jets.iter().map(|&c| c == 0).collect()
        } else {
            vec![true; n]
        };
        sel.add("noHEMj", no_hem)?;

        Ok(sel)
    }

    /// The recoil vector per event for one region rule: MET plus the
    /// region's characteristic object (absent object contributes nothing).
    fn recoil(
        &self,
        batch: &EventBatch,
        objs: &SelectedObjects,
        rule: RecoilRule,
    ) -> Result<Vec<Vec2>> {
        let met_pt = batch.scalar("MET_pt")?;
        let met_phi = batch.scalar("MET_phi")?;
        let n = batch.n_events();

        let mut out = Vec::with_capacity(n);
        for ev in 0..n {
            let met = Vec2::from_polar(met_pt[ev], met_phi[ev]);
            let obj = match rule {
                RecoilRule::MetOnly => None,
                RecoilRule::LeadingElectron => {
                    objs.leading_ele[ev].map(|l| Vec2::from_polar(l.pt, l.phi))
                }
                RecoilRule::LeadingMuon => {
                    objs.leading_mu[ev].map(|l| Vec2::from_polar(l.pt, l.phi))
                }
                RecoilRule::LeadingDielectron => {
                    objs.diele[ev].map(|p| Vec2::from_polar(p.pt, p.phi))
                }
                RecoilRule::LeadingDimuon => {
                    objs.dimu[ev].map(|p| Vec2::from_polar(p.pt, p.phi))
                }
            };
            out.push(match obj {
                Some(o) => met + o,
                None => met,
            });
        }
        Ok(out)
    }

    /// Process one batch into a fresh accumulator.
    pub fn process(&self, batch: &EventBatch) -> Result<Accumulator> {
        let mut acc = Accumulator::standard()?;
        let objs = crate::objects::select_objects(batch, &self.ids, &self.wps)?;
        let selection = self.build_selection(batch, &objs)?;

        let selected_regions = self.regions.regions_for_dataset(&batch.dataset);
        tracing::debug!(
            dataset = %batch.dataset,
            n_events = batch.n_events(),
            n_regions = selected_regions.len(),
            is_data = batch.is_data(),
            "processing batch"
        );

        // Observables shared across regions; recoil-derived ones are
        // computed per region from its recoil rule.
        let simple = self.simple_observables(batch, &objs)?;

        if batch.is_data() {
            acc.add_sumw(&batch.dataset, 1.0);
            let unit = vec![1.0; batch.n_events()];
            for region in &selected_regions {
                let cut = self.regions.mask(region, &selection)?;
                let regional = self.recoil_observables(batch, &objs, self.rule(region)?.recoil)?;
                fill_cell(
                    &mut acc,
                    &simple,
                    &regional,
                    &batch.dataset,
                    region,
                    "nominal",
                    &unit,
                    &cut,
                )?;
            }
            return Ok(acc);
        }

        // Simulation: compose weights per region, then fill each requested
        // systematic, splitting V+jets samples by generator heavy flavor.
        let gen = GenSummary::from_batch(batch)?;
        let composer = WeightComposer::new(batch, &objs, &gen, &self.calib, self.year)?;
        let mut region_weights: BTreeMap<&str, Weights> = BTreeMap::new();
        for region in &selected_regions {
            let rule = self.rule(region)?;
            region_weights.insert(region.as_str(), composer.compose(rule)?);
        }

        let genw_sum: f64 = batch.gen_weight().unwrap_or(&[]).iter().sum();
        let split = wants_flavor_split(&batch.dataset);
        let tags: Vec<(String, Option<Vec<f64>>)> = if split {
            vec![
                (format!("HF--{}", batch.dataset), Some(gen.heavy_flavor.clone())),
                (format!("LF--{}", batch.dataset), Some(gen.light_flavor())),
            ]
        } else {
            vec![(batch.dataset.clone(), None)]
        };

        for (tag, _) in &tags {
            acc.add_sumw(tag, genw_sum);
        }

        for region in &selected_regions {
            let cut = self.regions.mask(region, &selection)?;
            let regional = self.recoil_observables(batch, &objs, self.rule(region)?.recoil)?;
            let weights = &region_weights[region.as_str()];
            for systematic in SYSTEMATICS {
                let w = weights.weight(*systematic)?;
                let sname = systematic.unwrap_or("nominal");
                for (tag, indicator) in &tags {
                    let w_tagged: Vec<f64> = match indicator {
                        Some(ind) => w.iter().zip(ind).map(|(&a, &b)| a * b).collect(),
                        None => w.clone(),
                    };
                    fill_cell(&mut acc, &simple, &regional, tag, region, sname, &w_tagged, &cut)?;
                }
            }
        }

        Ok(acc)
    }

    fn rule(&self, region: &str) -> Result<&RegionWeightRule> {
        self.rules
            .get(region)
            .ok_or_else(|| Error::Configuration(format!("region '{region}' has no weight rule")))
    }

    /// Observables that do not depend on the region.
    fn simple_observables(
        &self,
        batch: &EventBatch,
        objs: &SelectedObjects,
    ) -> Result<BTreeMap<&'static str, Vec<f64>>> {
        let met_pt = batch.scalar("MET_pt")?.to_vec();

        let opt = |v: &[Option<crate::objects::ObjectKinematics>],
                   f: fn(&crate::objects::ObjectKinematics) -> f64|
         -> Vec<f64> {
            v.iter().map(|o| o.as_ref().map_or(f64::NAN, f)).collect()
        };
        let pair = |v: &[Option<crate::objects::DileptonPair>],
                    f: fn(&crate::objects::DileptonPair) -> f64|
         -> Vec<f64> {
            v.iter().map(|o| o.as_ref().map_or(f64::NAN, f)).collect()
        };
        let counts = |v: &[usize]| -> Vec<f64> { v.iter().map(|&c| c as f64).collect() };

        let mut out: BTreeMap<&'static str, Vec<f64>> = BTreeMap::new();
        out.insert("met", met_pt);
        out.insert("j1pt", opt(&objs.leading_jet, |o| o.pt));
        out.insert("j1eta", opt(&objs.leading_jet, |o| o.eta));
        out.insert("j1phi", opt(&objs.leading_jet, |o| o.phi));
        out.insert("e1pt", opt(&objs.leading_ele, |o| o.pt));
        out.insert("e1eta", opt(&objs.leading_ele, |o| o.eta));
        out.insert("e1phi", opt(&objs.leading_ele, |o| o.phi));
        out.insert("mu1pt", opt(&objs.leading_mu, |o| o.pt));
        out.insert("mu1eta", opt(&objs.leading_mu, |o| o.eta));
        out.insert("mu1phi", opt(&objs.leading_mu, |o| o.phi));
        out.insert("dielemass", pair(&objs.diele, |p| p.mass));
        out.insert("dielept", pair(&objs.diele, |p| p.pt));
        out.insert("dimumass", pair(&objs.dimu, |p| p.mass));
        out.insert("dimupt", pair(&objs.dimu, |p| p.pt));
        out.insert("njets", counts(&objs.n_clean_jets));
        out.insert("ndcsvL", counts(&objs.n_dcsv_loose));
        out.insert("ndflvL", counts(&objs.n_dflv_loose));
        Ok(out)
    }

    /// Observables derived from a region's recoil vector.
    fn recoil_observables(
        &self,
        batch: &EventBatch,
        objs: &SelectedObjects,
        rule: RecoilRule,
    ) -> Result<BTreeMap<&'static str, Vec<f64>>> {
        let n = batch.n_events();
        let u = self.recoil(batch, objs, rule)?;
        let recoil_mag: Vec<f64> = u.iter().map(|v| v.mag()).collect();

        let met_pt = batch.scalar("MET_pt")?;
        let calo_pt = batch.scalar("CaloMET_pt")?;
        let calo_minus_pf: Vec<f64> = (0..n)
            .map(|ev| (calo_pt[ev] - met_pt[ev]).abs() / recoil_mag[ev])
            .collect();

        // Minimum azimuthal distance between the recoil and any clean jet;
        // undefined (NaN) when the event has no clean jets.
        let jet_pt = if objs.jet_table.n_objects() == 0 {
            Vec::new()
        } else {
            objs.jet_table.column("pt")?.to_vec()
        };
        let jet_phi = if objs.jet_table.n_objects() == 0 {
            Vec::new()
        } else {
            objs.jet_table.column("phi")?.to_vec()
        };
        let mindphi: Vec<f64> = (0..n)
            .map(|ev| {
                objs.jet_table
                    .range(ev)
                    .filter(|&i| objs.jet_keep[i])
                    .map(|i| {
                        let jet = Vec2::from_polar(jet_pt[i], jet_phi[i]);
                        u[ev].delta_phi(&jet).abs()
                    })
                    .fold(f64::NAN, f64::min)
            })
            .collect();

        let mut out: BTreeMap<&'static str, Vec<f64>> = BTreeMap::new();
        out.insert("recoil", recoil_mag);
        out.insert("CaloMinusPfOverRecoil", calo_minus_pf);
        out.insert("mindphi", mindphi);
        Ok(out)
    }

    /// Rescale a fully merged accumulator: each dataset tag's histograms are
    /// multiplied by luminosity x cross-section / generated-weight sum. The
    /// cross-section sentinel `-1` leaves a dataset untouched, and the sumw
    /// bookkeeping is never rescaled.
    pub fn postprocess(&self, acc: &mut Accumulator) -> Result<()> {
        let mut scale: BTreeMap<String, f64> = BTreeMap::new();
        for (tag, &sumw) in &acc.sumw {
            let dataset = tag.strip_prefix("HF--").or_else(|| tag.strip_prefix("LF--")).unwrap_or(tag);
            let xsec = self.xsec.get(dataset)?;
            let factor = if xsec == -1.0 {
                1.0
            } else {
                if sumw == 0.0 {
                    return Err(Error::Computation(format!(
                        "dataset '{tag}' has zero generated-weight sum; cannot rescale"
                    )));
                }
                self.metadata.lumi_pb * xsec / sumw
            };
            tracing::info!(dataset = %tag, factor, "rescaling");
            scale.insert(tag.clone(), factor);
        }

        for hist in acc.histograms.values_mut() {
            for (tag, &factor) in &scale {
                if factor != 1.0 {
                    hist.scale_dataset(tag, factor);
                }
            }
        }
        Ok(())
    }
}

/// Fill every observable histogram for one (dataset tag, region, systematic)
/// cell, masking the weight by the region cut.
#[allow(clippy::too_many_arguments)]
fn fill_cell(
    acc: &mut Accumulator,
    simple: &BTreeMap<&'static str, Vec<f64>>,
    regional: &BTreeMap<&'static str, Vec<f64>>,
    dataset: &str,
    region: &str,
    systematic: &str,
    weight: &[f64],
    cut: &[bool],
) -> Result<()> {
    let key = CategoryKey {
        dataset: dataset.to_string(),
        region: region.to_string(),
        systematic: systematic.to_string(),
    };
    let masked: Vec<f64> =
        weight.iter().zip(cut).map(|(&w, &c)| if c { w } else { 0.0 }).collect();
    for (name, values) in simple.iter().chain(regional) {
        acc.histogram_mut(name)?.fill(&key, values, &masked)?;
    }
    Ok(())
}
