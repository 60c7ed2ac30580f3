//! Per-event weight composition for simulated samples.
//!
//! A [`Weights`] container holds an ordered set of named multiplicative
//! factors, each optionally carrying up/down systematic variations. The
//! total weight is the product of central values; a systematic modifier
//! substitutes exactly one factor's variation and leaves the rest central.
//!
//! Which correction applies in which region is declared once, exhaustively,
//! in the [`RegionWeightRule`] table and validated for completeness at setup.

use crate::corrections::{
    ttbar_weight, BtagTable, CalibrationBundle, JetFlavor, KFACTOR_MIN_BOSON_PT,
};
use crate::event::EventBatch;
use crate::gen::GenSummary;
use crate::metadata::Year;
use crate::objects::SelectedObjects;
use crate::regions::RegionTable;
use mt_core::{Error, Result};
use std::collections::BTreeMap;

/// One named multiplicative factor.
#[derive(Debug, Clone)]
struct Factor {
    name: String,
    central: Vec<f64>,
    up: Option<Vec<f64>>,
    down: Option<Vec<f64>>,
}

/// Ordered collection of named per-event weight factors.
#[derive(Debug, Clone)]
pub struct Weights {
    n_events: usize,
    factors: Vec<Factor>,
}

impl Weights {
    /// An empty container for `n_events` events.
    pub fn new(n_events: usize) -> Self {
        Self { n_events, factors: Vec::new() }
    }

    fn check(&self, name: &str, v: &[f64]) -> Result<()> {
        if v.len() != self.n_events {
            return Err(Error::Validation(format!(
                "weight factor '{}' length mismatch: expected {}, got {}",
                name,
                self.n_events,
                v.len()
            )));
        }
        if self.factors.iter().any(|f| f.name == name) {
            return Err(Error::Configuration(format!(
                "weight factor '{name}' is already registered"
            )));
        }
        Ok(())
    }

    /// Register a factor with no systematic variations.
    pub fn add(&mut self, name: impl Into<String>, central: Vec<f64>) -> Result<()> {
        let name = name.into();
        self.check(&name, &central)?;
        self.factors.push(Factor { name, central, up: None, down: None });
        Ok(())
    }

    /// Register a factor with up/down systematic variations.
    pub fn add_with_variations(
        &mut self,
        name: impl Into<String>,
        central: Vec<f64>,
        up: Vec<f64>,
        down: Vec<f64>,
    ) -> Result<()> {
        let name = name.into();
        self.check(&name, &central)?;
        if up.len() != self.n_events || down.len() != self.n_events {
            return Err(Error::Validation(format!(
                "variations of weight factor '{name}' length mismatch"
            )));
        }
        self.factors.push(Factor { name, central, up: Some(up), down: Some(down) });
        Ok(())
    }

    /// Modifier names accepted by [`Weights::weight`] (besides `None`).
    pub fn modifiers(&self) -> Vec<String> {
        let mut out = Vec::new();
        for f in &self.factors {
            if f.up.is_some() {
                out.push(format!("{}Up", f.name));
                out.push(format!("{}Down", f.name));
            }
        }
        out
    }

    /// The composed per-event weight.
    ///
    /// With `modifier = Some("xUp")` the factor `x` contributes its up
    /// variation; all other factors stay central. An unknown modifier, or a
    /// modifier naming a factor without variations, is a configuration error.
    pub fn weight(&self, modifier: Option<&str>) -> Result<Vec<f64>> {
        let swap = match modifier {
            None => None,
            Some(m) => {
                let (name, up) = if let Some(n) = m.strip_suffix("Up") {
                    (n, true)
                } else if let Some(n) = m.strip_suffix("Down") {
                    (n, false)
                } else {
                    return Err(Error::Configuration(format!(
                        "systematic modifier '{m}' must end in 'Up' or 'Down'"
                    )));
                };
                let factor = self.factors.iter().find(|f| f.name == name).ok_or_else(|| {
                    Error::Configuration(format!("unknown weight factor '{name}' in modifier '{m}'"))
                })?;
                let varied = if up { factor.up.as_ref() } else { factor.down.as_ref() };
                let varied = varied.ok_or_else(|| {
                    Error::Configuration(format!(
                        "weight factor '{name}' has no registered systematic variations"
                    ))
                })?;
                Some((name, varied))
            }
        };

        let mut total = vec![1.0; self.n_events];
        for f in &self.factors {
            let values = match &swap {
                Some((name, varied)) if *name == f.name => varied.as_slice(),
                _ => f.central.as_slice(),
            };
            for (t, &v) in total.iter_mut().zip(values) {
                *t *= v;
            }
        }
        Ok(total)
    }
}

/// Trigger-efficiency rule for a region.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TriggerRule {
    /// Leading tight electron.
    SingleElectron,
    /// Leading tight muon.
    SingleMuon,
    /// Leading loose dielectron pair, combined as `1-(1-p1)(1-p2)`.
    DiElectron,
    /// Leading loose dimuon pair, combined as `1-(1-p1)(1-p2)`.
    DiMuon,
}

/// Identification scale-factor rule for a region.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum IdRule {
    /// Tight electron SF for the leading electron.
    TightElectron,
    /// Tight muon SF for the leading muon.
    TightMuon,
    /// Product of loose electron SFs for both pair legs.
    LooseDiElectron,
    /// Product of loose muon SFs for both pair legs.
    LooseDiMuon,
}

/// Reconstruction scale-factor rule (electrons only).
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RecoRule {
    /// Leading electron reco SF.
    SingleElectron,
    /// Product of both dielectron legs' reco SFs.
    DiElectron,
    /// Factor 1 (muon regions).
    Identity,
}

/// Isolation scale-factor rule (muons only).
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum IsoRule {
    /// Tight muon isolation SF for the leading muon.
    TightMuon,
    /// Product of loose muon isolation SFs for both pair legs.
    LooseDiMuon,
    /// Factor 1 (electron regions).
    Identity,
}

/// B-tag reweighting rule.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum BtagRule {
    /// Apply the deepFlavor loose-WP weight with correlated shift direction.
    Nominal,
    /// Apply it with the anti-correlated shift direction (top-pair-like
    /// regions, where the b-tag requirement is inverted relative to W+jets).
    AntiCorrelated,
    /// Factor 1 with no systematic spread (regions without b-tagging).
    Identity,
}

/// Which reconstructed object is vector-summed with MET to form the region's
/// hadronic recoil.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RecoilRule {
    /// MET alone.
    MetOnly,
    /// MET plus the leading tight electron.
    LeadingElectron,
    /// MET plus the leading tight muon.
    LeadingMuon,
    /// MET plus the leading dielectron pair.
    LeadingDielectron,
    /// MET plus the leading dimuon pair.
    LeadingDimuon,
}

/// The complete per-region weighting configuration.
#[derive(Debug, Clone, Copy)]
pub struct RegionWeightRule {
    /// Trigger-efficiency rule.
    pub trigger: TriggerRule,
    /// ID scale-factor rule.
    pub id: IdRule,
    /// Reconstruction scale-factor rule.
    pub reco: RecoRule,
    /// Isolation scale-factor rule.
    pub iso: IsoRule,
    /// B-tag reweighting rule.
    pub btag: BtagRule,
    /// Recoil definition.
    pub recoil: RecoilRule,
}

/// The standard rule table covering all eight regions.
pub fn standard_rules() -> BTreeMap<String, RegionWeightRule> {
    // Signal regions keep MET alone as the recoil proxy; the lepton control
    // regions add their characteristic lepton (or pair) back in.
    let ele_single = |btag, recoil| RegionWeightRule {
        trigger: TriggerRule::SingleElectron,
        id: IdRule::TightElectron,
        reco: RecoRule::SingleElectron,
        iso: IsoRule::Identity,
        btag,
        recoil,
    };
    let mu_single = |btag, recoil| RegionWeightRule {
        trigger: TriggerRule::SingleMuon,
        id: IdRule::TightMuon,
        reco: RecoRule::Identity,
        iso: IsoRule::TightMuon,
        btag,
        recoil,
    };

    let mut rules = BTreeMap::new();
    rules.insert("sre".to_string(), ele_single(BtagRule::Nominal, RecoilRule::MetOnly));
    rules.insert("srm".to_string(), mu_single(BtagRule::Nominal, RecoilRule::MetOnly));
    rules.insert(
        "wjete".to_string(),
        ele_single(BtagRule::Nominal, RecoilRule::LeadingElectron),
    );
    rules.insert(
        "wjetm".to_string(),
        mu_single(BtagRule::Nominal, RecoilRule::LeadingMuon),
    );
    rules.insert(
        "ttbare".to_string(),
        ele_single(BtagRule::AntiCorrelated, RecoilRule::LeadingElectron),
    );
    rules.insert(
        "ttbarm".to_string(),
        mu_single(BtagRule::AntiCorrelated, RecoilRule::LeadingMuon),
    );
    rules.insert(
        "dilepe".to_string(),
        RegionWeightRule {
            trigger: TriggerRule::DiElectron,
            id: IdRule::LooseDiElectron,
            reco: RecoRule::DiElectron,
            iso: IsoRule::Identity,
            btag: BtagRule::Identity,
            recoil: RecoilRule::LeadingDielectron,
        },
    );
    rules.insert(
        "dilepm".to_string(),
        RegionWeightRule {
            trigger: TriggerRule::DiMuon,
            id: IdRule::LooseDiMuon,
            reco: RecoRule::Identity,
            iso: IsoRule::LooseDiMuon,
            btag: BtagRule::Identity,
            recoil: RecoilRule::LeadingDimuon,
        },
    );
    rules
}

/// Every region in the table must have a weight rule; a region silently
/// falling through to an undefined rule is exactly the defect this check
/// exists to prevent.
pub fn validate_rules(
    rules: &BTreeMap<String, RegionWeightRule>,
    regions: &RegionTable,
) -> Result<()> {
    for region in regions.names() {
        if !rules.contains_key(region) {
            return Err(Error::Configuration(format!(
                "region '{region}' has no weight rule"
            )));
        }
    }
    Ok(())
}

/// Muon scale factors are keyed by |eta| except in 2016, where the tables
/// are binned in signed eta.
fn mu_eta(year: Year, eta: f64) -> f64 {
    match year {
        Year::Y2016 => eta,
        _ => eta.abs(),
    }
}

/// Composer for the full factor stack of one batch.
pub struct WeightComposer<'a> {
    batch: &'a EventBatch,
    objs: &'a SelectedObjects,
    gen: &'a GenSummary,
    bundle: &'a CalibrationBundle,
    year: Year,
}

impl<'a> WeightComposer<'a> {
    /// Bind the composer to one simulated batch.
    pub fn new(
        batch: &'a EventBatch,
        objs: &'a SelectedObjects,
        gen: &'a GenSummary,
        bundle: &'a CalibrationBundle,
        year: Year,
    ) -> Result<Self> {
        if batch.is_data() {
            return Err(Error::Validation(
                "weight composition requested for a real-data batch".into(),
            ));
        }
        Ok(Self { batch, objs, gen, bundle, year })
    }

    /// Theory k-factor for the batch's process category: geometric-mean top
    /// reweighting for top pair, NNLO/NLO boson-pt k-factor for V+jets with
    /// identity below the pt threshold, identity for everything else.
    fn kfactor(&self) -> (Vec<f64>, Vec<f64>) {
        let n = self.batch.n_events();
        let dataset = self.batch.dataset.as_str();
        let mut nlo = vec![1.0; n];
        let mut nnlo_nlo = vec![1.0; n];

        if dataset.contains("TT") {
            for (ev, tops) in self.gen.top_pts.iter().enumerate() {
                if tops.len() >= 2 {
                    nlo[ev] = (ttbar_weight(tops[0]) * ttbar_weight(tops[1])).sqrt();
                }
            }
        } else if dataset.contains("WJets") {
            for ev in 0..n {
                let pt = self.gen.max_w_pt[ev];
                if pt > KFACTOR_MIN_BOSON_PT {
                    nnlo_nlo[ev] = self.bundle.kfactors.w.eval(pt);
                }
            }
        } else if dataset.contains("DY") {
            for ev in 0..n {
                let pt = self.gen.max_z_pt[ev];
                if pt > KFACTOR_MIN_BOSON_PT {
                    nnlo_nlo[ev] = self.bundle.kfactors.dy.eval(pt);
                }
            }
        } else if dataset.contains("ZJets") {
            for ev in 0..n {
                let pt = self.gen.max_z_pt[ev];
                if pt > KFACTOR_MIN_BOSON_PT {
                    nnlo_nlo[ev] = self.bundle.kfactors.z.eval(pt);
                }
            }
        }
        (nlo, nnlo_nlo)
    }

    fn trigger(&self, rule: TriggerRule) -> Result<Vec<f64>> {
        let n = self.batch.n_events();
        let mut out = vec![1.0; n];
        match rule {
            TriggerRule::SingleElectron => {
                let t = self.bundle.ele_trig.get(self.year)?;
                for (ev, lead) in self.objs.leading_ele.iter().enumerate() {
                    if let Some(l) = lead {
                        out[ev] = t.eval(l.eta, l.pt);
                    }
                }
            }
            TriggerRule::SingleMuon => {
                let t = self.bundle.mu_trig.get(self.year)?;
                for (ev, lead) in self.objs.leading_mu.iter().enumerate() {
                    if let Some(l) = lead {
                        out[ev] = t.eval(mu_eta(self.year, l.eta), l.pt);
                    }
                }
            }
            TriggerRule::DiElectron => {
                let t = self.bundle.ele_trig.get(self.year)?;
                for (ev, pair) in self.objs.diele.iter().enumerate() {
                    if let Some(p) = pair {
                        let p1 = t.eval(p.leg0.eta, p.leg0.pt);
                        let p2 = t.eval(p.leg1.eta, p.leg1.pt);
                        // At least one leg fires.
                        out[ev] = 1.0 - (1.0 - p1) * (1.0 - p2);
                    }
                }
            }
            TriggerRule::DiMuon => {
                let t = self.bundle.mu_trig.get(self.year)?;
                for (ev, pair) in self.objs.dimu.iter().enumerate() {
                    if let Some(p) = pair {
                        let p1 = t.eval(mu_eta(self.year, p.leg0.eta), p.leg0.pt);
                        let p2 = t.eval(mu_eta(self.year, p.leg1.eta), p.leg1.pt);
                        out[ev] = 1.0 - (1.0 - p1) * (1.0 - p2);
                    }
                }
            }
        }
        Ok(out)
    }

    fn id_sf(&self, rule: IdRule) -> Result<Vec<f64>> {
        let n = self.batch.n_events();
        let mut out = vec![1.0; n];
        match rule {
            IdRule::TightElectron => {
                let t = self.bundle.ele_tight_id.get(self.year)?;
                for (ev, lead) in self.objs.leading_ele.iter().enumerate() {
                    if let Some(l) = lead {
                        out[ev] = t.eval(l.eta, l.pt);
                    }
                }
            }
            IdRule::TightMuon => {
                let t = self.bundle.mu_tight_id.get(self.year)?;
                for (ev, lead) in self.objs.leading_mu.iter().enumerate() {
                    if let Some(l) = lead {
                        out[ev] = t.eval(mu_eta(self.year, l.eta), l.pt);
                    }
                }
            }
            IdRule::LooseDiElectron => {
                let t = self.bundle.ele_loose_id.get(self.year)?;
                for (ev, pair) in self.objs.diele.iter().enumerate() {
                    if let Some(p) = pair {
                        out[ev] = t.eval(p.leg0.eta, p.leg0.pt) * t.eval(p.leg1.eta, p.leg1.pt);
                    }
                }
            }
            IdRule::LooseDiMuon => {
                let t = self.bundle.mu_loose_id.get(self.year)?;
                for (ev, pair) in self.objs.dimu.iter().enumerate() {
                    if let Some(p) = pair {
                        out[ev] = t.eval(mu_eta(self.year, p.leg0.eta), p.leg0.pt)
                            * t.eval(mu_eta(self.year, p.leg1.eta), p.leg1.pt);
                    }
                }
            }
        }
        Ok(out)
    }

    fn reco_sf(&self, rule: RecoRule) -> Result<Vec<f64>> {
        let n = self.batch.n_events();
        let mut out = vec![1.0; n];
        match rule {
            RecoRule::Identity => {}
            RecoRule::SingleElectron => {
                let t = self.bundle.ele_reco.get(self.year)?;
                for (ev, lead) in self.objs.leading_ele.iter().enumerate() {
                    if let Some(l) = lead {
                        out[ev] = t.eval(l.eta, l.pt);
                    }
                }
            }
            RecoRule::DiElectron => {
                let t = self.bundle.ele_reco.get(self.year)?;
                for (ev, pair) in self.objs.diele.iter().enumerate() {
                    if let Some(p) = pair {
                        out[ev] = t.eval(p.leg0.eta, p.leg0.pt) * t.eval(p.leg1.eta, p.leg1.pt);
                    }
                }
            }
        }
        Ok(out)
    }

    fn iso_sf(&self, rule: IsoRule) -> Result<Vec<f64>> {
        let n = self.batch.n_events();
        let mut out = vec![1.0; n];
        match rule {
            IsoRule::Identity => {}
            IsoRule::TightMuon => {
                let t = self.bundle.mu_tight_iso.get(self.year)?;
                for (ev, lead) in self.objs.leading_mu.iter().enumerate() {
                    if let Some(l) = lead {
                        out[ev] = t.eval(mu_eta(self.year, l.eta), l.pt);
                    }
                }
            }
            IsoRule::LooseDiMuon => {
                let t = self.bundle.mu_loose_iso.get(self.year)?;
                for (ev, pair) in self.objs.dimu.iter().enumerate() {
                    if let Some(p) = pair {
                        out[ev] = t.eval(mu_eta(self.year, p.leg0.eta), p.leg0.pt)
                            * t.eval(mu_eta(self.year, p.leg1.eta), p.leg1.pt);
                    }
                }
            }
        }
        Ok(out)
    }

    /// Per-event (central, up, down) b-tag weight: product over the clean
    /// good jets of the per-jet scale factor.
    fn btag(&self, table: &BtagTable, anti: bool) -> Result<(Vec<f64>, Vec<f64>, Vec<f64>)> {
        let n = self.batch.n_events();
        let jets = &self.objs.jet_table;
        let mut central = vec![1.0; n];
        let mut up = vec![1.0; n];
        let mut down = vec![1.0; n];
        if jets.n_objects() == 0 {
            return Ok((central, up, down));
        }

        let pt = jets.column("pt")?;
        let eta = jets.column("eta")?;
        let flav = jets.column("hadronFlavour")?;
        for ev in 0..n {
            for i in jets.range(ev) {
                if !self.objs.jet_keep[i] {
                    continue;
                }
                let (c, u, d) = table.eval(pt[i], eta[i], JetFlavor::from_hadron_flavour(flav[i]));
                central[ev] *= c;
                if anti {
                    up[ev] *= d;
                    down[ev] *= u;
                } else {
                    up[ev] *= u;
                    down[ev] *= d;
                }
            }
        }
        Ok((central, up, down))
    }

    /// Compose the full factor stack for one region.
    pub fn compose(&self, rule: &RegionWeightRule) -> Result<Weights> {
        let n = self.batch.n_events();
        let mut weights = Weights::new(n);

        let genw = self
            .batch
            .gen_weight()
            .ok_or_else(|| Error::Validation("simulated batch without genWeight".into()))?;
        weights.add("genw", genw.to_vec())?;

        let (nlo, nnlo_nlo) = self.kfactor();
        weights.add("nlo", nlo)?;
        weights.add("nnlo_nlo", nnlo_nlo)?;

        let npv = self.batch.scalar("PV_npvs")?;
        let pu_table = self.bundle.pileup.get(self.year)?;
        weights.add("pileup", npv.iter().map(|&v| pu_table.eval(v)).collect())?;

        weights.add("trig", self.trigger(rule.trigger)?)?;
        weights.add("ids", self.id_sf(rule.id)?)?;
        weights.add("reco", self.reco_sf(rule.reco)?)?;
        weights.add("isolation", self.iso_sf(rule.iso)?)?;

        match rule.btag {
            BtagRule::Identity => {
                // Factor 1 with no spread; variations are registered anyway so
                // the btag systematic is requestable uniformly across regions.
                weights.add_with_variations(
                    "btag",
                    vec![1.0; n],
                    vec![1.0; n],
                    vec![1.0; n],
                )?;
            }
            BtagRule::Nominal | BtagRule::AntiCorrelated => {
                let table = self.bundle.btag_deepflav.get(self.year)?;
                let anti = rule.btag == BtagRule::AntiCorrelated;
                let (c, u, d) = self.btag(table, anti)?;
                weights.add_with_variations("btag", c, u, d)?;
            }
        }

        Ok(weights)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use approx::assert_relative_eq;

    #[test]
    fn product_is_order_independent() {
        let mut a = Weights::new(2);
        a.add("x", vec![2.0, 3.0]).unwrap();
        a.add("y", vec![0.5, 2.0]).unwrap();

        let mut b = Weights::new(2);
        b.add("y", vec![0.5, 2.0]).unwrap();
        b.add("x", vec![2.0, 3.0]).unwrap();

        assert_eq!(a.weight(None).unwrap(), b.weight(None).unwrap());
        assert_eq!(a.weight(None).unwrap(), vec![1.0, 6.0]);
    }

    #[test]
    fn modifier_swaps_exactly_one_factor() {
        let mut w = Weights::new(1);
        w.add("genw", vec![2.0]).unwrap();
        w.add_with_variations("btag", vec![1.0], vec![1.1], vec![0.9]).unwrap();

        assert_relative_eq!(w.weight(None).unwrap()[0], 2.0);
        assert_relative_eq!(w.weight(Some("btagUp")).unwrap()[0], 2.2);
        assert_relative_eq!(w.weight(Some("btagDown")).unwrap()[0], 1.8);
    }

    #[test]
    fn unknown_modifier_is_configuration_error() {
        let mut w = Weights::new(1);
        w.add("genw", vec![1.0]).unwrap();
        assert!(matches!(w.weight(Some("puUp")), Err(Error::Configuration(_))));
        assert!(matches!(w.weight(Some("genw")), Err(Error::Configuration(_))));
        // A factor without variations cannot be shifted.
        assert!(matches!(w.weight(Some("genwUp")), Err(Error::Configuration(_))));
    }

    #[test]
    fn duplicate_factor_rejected() {
        let mut w = Weights::new(1);
        w.add("x", vec![1.0]).unwrap();
        assert!(matches!(w.add("x", vec![1.0]), Err(Error::Configuration(_))));
    }

    #[test]
    fn modifiers_lists_varied_factors_only() {
        let mut w = Weights::new(1);
        w.add("genw", vec![1.0]).unwrap();
        w.add_with_variations("btag", vec![1.0], vec![1.1], vec![0.9]).unwrap();
        assert_eq!(w.modifiers(), vec!["btagUp".to_string(), "btagDown".to_string()]);
    }

    #[test]
    fn standard_rules_cover_standard_regions() {
        let rules = standard_rules();
        let table = RegionTable::standard().unwrap();
        validate_rules(&rules, &table).unwrap();
    }

    #[test]
    fn missing_rule_fails_fast() {
        let mut rules = standard_rules();
        rules.remove("wjetm");
        let table = RegionTable::standard().unwrap();
        let err = validate_rules(&rules, &table).unwrap_err();
        assert!(err.to_string().contains("wjetm"));
    }

    #[test]
    fn mu_eta_signed_only_in_2016() {
        assert_relative_eq!(mu_eta(Year::Y2016, -1.5), -1.5);
        assert_relative_eq!(mu_eta(Year::Y2018, -1.5), 1.5);
    }
}
