//! Calibration bundle: binned lookup tables for pileup, trigger-efficiency,
//! identification / reconstruction / isolation scale factors, b-tag
//! reweighting, and theory k-factors.
//!
//! The bundle is a value type with named fields; every year-keyed table is
//! validated eagerly at construction so a missing year or malformed table
//! fails before any batch is processed, never on first lookup.

use crate::metadata::Year;
use mt_core::{Error, Result};
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;

/// A 1D binned lookup with clamped edge behavior.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Lookup1d {
    edges: Vec<f64>,
    values: Vec<f64>,
}

impl Lookup1d {
    /// Build from bin edges (sorted, length = n_bins + 1) and per-bin values.
    pub fn new(edges: Vec<f64>, values: Vec<f64>) -> Result<Self> {
        if edges.len() < 2 || values.len() != edges.len() - 1 {
            return Err(Error::Configuration(format!(
                "lookup1d shape mismatch: {} edges, {} values",
                edges.len(),
                values.len()
            )));
        }
        if edges.windows(2).any(|w| w[1] <= w[0]) {
            return Err(Error::Configuration("lookup1d edges must be strictly increasing".into()));
        }
        Ok(Self { edges, values })
    }

    /// A single-bin table returning `value` everywhere.
    pub fn constant(value: f64) -> Self {
        Self { edges: vec![f64::MIN, f64::MAX], values: vec![value] }
    }

    /// Evaluate; out-of-range and NaN arguments clamp to the first/last bin.
    pub fn eval(&self, x: f64) -> f64 {
        let n = self.values.len();
        if x.is_nan() || x < self.edges[0] {
            return self.values[0];
        }
        if x >= self.edges[n] {
            return self.values[n - 1];
        }
        let bin = match self.edges.binary_search_by(|e| e.total_cmp(&x)) {
            Ok(i) => i.min(n - 1),
            Err(i) => i - 1,
        };
        self.values[bin]
    }
}

/// A 2D binned lookup with clamped edge behavior, row-major in x.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Lookup2d {
    x_edges: Vec<f64>,
    y_edges: Vec<f64>,
    values: Vec<f64>,
}

impl Lookup2d {
    /// Build from edges and row-major values (len = (nx)·(ny) bins).
    pub fn new(x_edges: Vec<f64>, y_edges: Vec<f64>, values: Vec<f64>) -> Result<Self> {
        let nx = x_edges.len().saturating_sub(1);
        let ny = y_edges.len().saturating_sub(1);
        if nx == 0 || ny == 0 || values.len() != nx * ny {
            return Err(Error::Configuration(format!(
                "lookup2d shape mismatch: {}x{} bins, {} values",
                nx,
                ny,
                values.len()
            )));
        }
        for edges in [&x_edges, &y_edges] {
            if edges.windows(2).any(|w| w[1] <= w[0]) {
                return Err(Error::Configuration(
                    "lookup2d edges must be strictly increasing".into(),
                ));
            }
        }
        Ok(Self { x_edges, y_edges, values })
    }

    /// A single-bin table returning `value` everywhere.
    pub fn constant(value: f64) -> Self {
        Self {
            x_edges: vec![f64::MIN, f64::MAX],
            y_edges: vec![f64::MIN, f64::MAX],
            values: vec![value],
        }
    }

    fn bin(edges: &[f64], x: f64) -> usize {
        let n = edges.len() - 1;
        if x.is_nan() || x < edges[0] {
            return 0;
        }
        if x >= edges[n] {
            return n - 1;
        }
        match edges.binary_search_by(|e| e.total_cmp(&x)) {
            Ok(i) => i.min(n - 1),
            Err(i) => i - 1,
        }
    }

    /// Evaluate at (x, y); out-of-range and NaN arguments clamp.
    pub fn eval(&self, x: f64, y: f64) -> f64 {
        let ix = Self::bin(&self.x_edges, x);
        let iy = Self::bin(&self.y_edges, y);
        let ny = self.y_edges.len() - 1;
        self.values[ix * ny + iy]
    }
}

/// A table keyed by data-taking year, validated for completeness up front.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct YearTable<T> {
    entries: BTreeMap<Year, T>,
}

impl<T> YearTable<T> {
    /// Build from (year, value) pairs.
    pub fn new(entries: impl IntoIterator<Item = (Year, T)>) -> Self {
        Self { entries: entries.into_iter().collect() }
    }

    /// Build with the same value for every supported year.
    pub fn uniform(value: T) -> Self
    where
        T: Clone,
    {
        Self { entries: Year::ALL.iter().map(|&y| (y, value.clone())).collect() }
    }

    /// Value for one year; absence is a configuration error.
    pub fn get(&self, year: Year) -> Result<&T> {
        self.entries
            .get(&year)
            .ok_or_else(|| Error::Configuration(format!("no calibration entry for year {year}")))
    }

    /// Ensure an entry exists for `year`, naming the table in the error.
    pub fn require(&self, year: Year, table_name: &str) -> Result<()> {
        if self.entries.contains_key(&year) {
            Ok(())
        } else {
            Err(Error::Configuration(format!(
                "calibration table '{table_name}' has no entry for year {year}"
            )))
        }
    }
}

/// B-tag discriminant thresholds for one year.
///
/// The selection only cuts at the loose working points; the medium and tight
/// thresholds are carried so the table stays the single source for all three
/// tiers.
#[derive(Debug, Clone, Copy, Serialize, Deserialize)]
pub struct BtagWorkingPoints {
    /// deepCSV loose threshold.
    pub deepcsv_loose: f64,
    /// deepCSV medium threshold.
    pub deepcsv_medium: f64,
    /// deepCSV tight threshold.
    pub deepcsv_tight: f64,
    /// deepFlavor loose threshold.
    pub deepflav_loose: f64,
    /// deepFlavor medium threshold.
    pub deepflav_medium: f64,
    /// deepFlavor tight threshold.
    pub deepflav_tight: f64,
}

impl BtagWorkingPoints {
    /// Run-2 working points.
    pub fn for_year(year: Year) -> Self {
        match year {
            Year::Y2016 => Self {
                deepcsv_loose: 0.2217,
                deepcsv_medium: 0.6321,
                deepcsv_tight: 0.8953,
                deepflav_loose: 0.0614,
                deepflav_medium: 0.3093,
                deepflav_tight: 0.7221,
            },
            Year::Y2017 => Self {
                deepcsv_loose: 0.1522,
                deepcsv_medium: 0.4941,
                deepcsv_tight: 0.8001,
                deepflav_loose: 0.0521,
                deepflav_medium: 0.3033,
                deepflav_tight: 0.7489,
            },
            Year::Y2018 => Self {
                deepcsv_loose: 0.1241,
                deepcsv_medium: 0.4184,
                deepcsv_tight: 0.7527,
                deepflav_loose: 0.0494,
                deepflav_medium: 0.2770,
                deepflav_tight: 0.7264,
            },
        }
    }
}

/// Jet flavor classes for b-tag scale factors.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum JetFlavor {
    /// Generator-matched b jets (hadronFlavour 5).
    Bottom,
    /// Generator-matched c jets (hadronFlavour 4).
    Charm,
    /// Everything else.
    Light,
}

impl JetFlavor {
    /// Classify a nanoAOD `hadronFlavour` value.
    pub fn from_hadron_flavour(f: f64) -> Self {
        match f as i64 {
            5 => JetFlavor::Bottom,
            4 => JetFlavor::Charm,
            _ => JetFlavor::Light,
        }
    }
}

/// Per-jet b-tag scale-factor tables (central/up/down) for one working point,
/// split by jet flavor, binned in (pt, |eta|).
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct BtagTable {
    bottom: [Lookup2d; 3],
    charm: [Lookup2d; 3],
    light: [Lookup2d; 3],
}

impl BtagTable {
    /// Build from per-flavor `[central, up, down]` tables.
    pub fn new(bottom: [Lookup2d; 3], charm: [Lookup2d; 3], light: [Lookup2d; 3]) -> Self {
        Self { bottom, charm, light }
    }

    /// Identity table: factor 1 with no systematic spread.
    pub fn identity() -> Self {
        let one = || [Lookup2d::constant(1.0), Lookup2d::constant(1.0), Lookup2d::constant(1.0)];
        Self { bottom: one(), charm: one(), light: one() }
    }

    /// Per-jet `(central, up, down)` scale factor.
    pub fn eval(&self, pt: f64, eta: f64, flavor: JetFlavor) -> (f64, f64, f64) {
        let t = match flavor {
            JetFlavor::Bottom => &self.bottom,
            JetFlavor::Charm => &self.charm,
            JetFlavor::Light => &self.light,
        };
        let a = eta.abs();
        (t[0].eval(pt, a), t[1].eval(pt, a), t[2].eval(pt, a))
    }
}

/// NNLO-over-NLO k-factor tables keyed by process category.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct KFactorTables {
    /// W+jets, keyed by generator W pt.
    pub w: Lookup1d,
    /// Drell-Yan, keyed by generator Z pt.
    pub dy: Lookup1d,
    /// Z+jets (neutrino channel), keyed by generator Z pt.
    pub z: Lookup1d,
}

impl KFactorTables {
    /// Identity k-factors.
    pub fn identity() -> Self {
        Self {
            w: Lookup1d::constant(1.0),
            dy: Lookup1d::constant(1.0),
            z: Lookup1d::constant(1.0),
        }
    }
}

/// Boson-pt threshold below which the V+jets k-factor falls back to 1.
pub const KFACTOR_MIN_BOSON_PT: f64 = 100.0;

/// Top-pair NLO reweighting for one top quark.
///
/// Standard CMS parameterization; the per-event factor is the geometric mean
/// of the two tops' weights, with the pt argument capped.
pub fn ttbar_weight(top_pt: f64) -> f64 {
    (0.0615 - 0.0005 * top_pt.min(800.0)).exp()
}

/// The full calibration bundle consumed by the weight composer.
///
/// Construct with [`CalibrationBundle::validate`] (or load from JSON, which
/// validates too) before handing it to the processor.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CalibrationBundle {
    /// Pileup weight keyed by reconstructed-primary-vertex count.
    pub pileup: YearTable<Lookup1d>,
    /// Electron trigger efficiency keyed by (eta, pt).
    pub ele_trig: YearTable<Lookup2d>,
    /// Muon trigger efficiency keyed by (|eta|, pt).
    pub mu_trig: YearTable<Lookup2d>,
    /// Tight electron ID scale factor keyed by (eta, pt).
    pub ele_tight_id: YearTable<Lookup2d>,
    /// Loose electron ID scale factor keyed by (eta, pt).
    pub ele_loose_id: YearTable<Lookup2d>,
    /// Tight muon ID scale factor keyed by (|eta|, pt).
    pub mu_tight_id: YearTable<Lookup2d>,
    /// Loose muon ID scale factor keyed by (|eta|, pt).
    pub mu_loose_id: YearTable<Lookup2d>,
    /// Electron reconstruction scale factor keyed by (eta, pt).
    pub ele_reco: YearTable<Lookup2d>,
    /// Tight muon isolation scale factor keyed by (|eta|, pt).
    pub mu_tight_iso: YearTable<Lookup2d>,
    /// Loose muon isolation scale factor keyed by (|eta|, pt).
    pub mu_loose_iso: YearTable<Lookup2d>,
    /// NNLO/NLO theory k-factors (shared across years).
    pub kfactors: KFactorTables,
    /// deepFlavor loose-working-point b-tag scale factors.
    pub btag_deepflav: YearTable<BtagTable>,
}

impl CalibrationBundle {
    /// An all-identity bundle covering every year. Useful as a test fixture
    /// and as a template for real bundles.
    pub fn identity() -> Self {
        Self {
            pileup: YearTable::uniform(Lookup1d::constant(1.0)),
            ele_trig: YearTable::uniform(Lookup2d::constant(1.0)),
            mu_trig: YearTable::uniform(Lookup2d::constant(1.0)),
            ele_tight_id: YearTable::uniform(Lookup2d::constant(1.0)),
            ele_loose_id: YearTable::uniform(Lookup2d::constant(1.0)),
            mu_tight_id: YearTable::uniform(Lookup2d::constant(1.0)),
            mu_loose_id: YearTable::uniform(Lookup2d::constant(1.0)),
            ele_reco: YearTable::uniform(Lookup2d::constant(1.0)),
            mu_tight_iso: YearTable::uniform(Lookup2d::constant(1.0)),
            mu_loose_iso: YearTable::uniform(Lookup2d::constant(1.0)),
            kfactors: KFactorTables::identity(),
            btag_deepflav: YearTable::uniform(BtagTable::identity()),
        }
    }

    /// Load from JSON and validate for `year`.
    pub fn from_json_file(path: impl AsRef<std::path::Path>, year: Year) -> Result<Self> {
        let bytes = std::fs::read(path)?;
        let bundle: CalibrationBundle = serde_json::from_slice(&bytes)?;
        bundle.validate(year)?;
        Ok(bundle)
    }

    /// Check that every table has an entry for `year`.
    pub fn validate(&self, year: Year) -> Result<()> {
        self.pileup.require(year, "pileup")?;
        self.ele_trig.require(year, "ele_trig")?;
        self.mu_trig.require(year, "mu_trig")?;
        self.ele_tight_id.require(year, "ele_tight_id")?;
        self.ele_loose_id.require(year, "ele_loose_id")?;
        self.mu_tight_id.require(year, "mu_tight_id")?;
        self.mu_loose_id.require(year, "mu_loose_id")?;
        self.ele_reco.require(year, "ele_reco")?;
        self.mu_tight_iso.require(year, "mu_tight_iso")?;
        self.mu_loose_iso.require(year, "mu_loose_iso")?;
        self.btag_deepflav.require(year, "btag_deepflav")?;
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use approx::assert_relative_eq;

    #[test]
    fn lookup1d_bins_and_clamps() {
        let l = Lookup1d::new(vec![0.0, 10.0, 20.0], vec![1.1, 0.9]).unwrap();
        assert_relative_eq!(l.eval(5.0), 1.1);
        assert_relative_eq!(l.eval(10.0), 0.9);
        assert_relative_eq!(l.eval(-3.0), 1.1);
        assert_relative_eq!(l.eval(50.0), 0.9);
    }

    #[test]
    fn lookup1d_nan_clamps_to_first_bin() {
        let l = Lookup1d::new(vec![0.0, 10.0, 20.0], vec![1.1, 0.9]).unwrap();
        assert_relative_eq!(l.eval(f64::NAN), 1.1);
    }

    #[test]
    fn lookup2d_nan_clamps_to_first_bin() {
        let l = Lookup2d::new(
            vec![0.0, 1.0, 2.0],
            vec![0.0, 10.0, 20.0],
            vec![1.0, 2.0, 3.0, 4.0],
        )
        .unwrap();
        assert_relative_eq!(l.eval(f64::NAN, 5.0), 1.0);
        assert_relative_eq!(l.eval(1.5, f64::NAN), 3.0);
    }

    #[test]
    fn lookup1d_rejects_bad_shape() {
        assert!(Lookup1d::new(vec![0.0, 1.0], vec![1.0, 2.0]).is_err());
        assert!(Lookup1d::new(vec![1.0, 0.0], vec![1.0]).is_err());
    }

    #[test]
    fn lookup2d_rowmajor() {
        let l = Lookup2d::new(
            vec![0.0, 1.0, 2.0],
            vec![0.0, 10.0, 20.0],
            vec![1.0, 2.0, 3.0, 4.0],
        )
        .unwrap();
        assert_relative_eq!(l.eval(0.5, 5.0), 1.0);
        assert_relative_eq!(l.eval(0.5, 15.0), 2.0);
        assert_relative_eq!(l.eval(1.5, 5.0), 3.0);
        assert_relative_eq!(l.eval(1.5, 15.0), 4.0);
        // Clamping.
        assert_relative_eq!(l.eval(-1.0, 100.0), 2.0);
    }

    #[test]
    fn year_table_missing_year() {
        let t = YearTable::new([(Year::Y2017, 1.0)]);
        assert!(t.get(Year::Y2017).is_ok());
        let err = t.require(Year::Y2018, "pileup").unwrap_err();
        assert!(err.to_string().contains("pileup"));
        assert!(err.to_string().contains("2018"));
    }

    #[test]
    fn identity_bundle_validates_for_all_years() {
        let b = CalibrationBundle::identity();
        for y in Year::ALL {
            b.validate(y).unwrap();
        }
    }

    #[test]
    fn btag_flavor_classes() {
        assert_eq!(JetFlavor::from_hadron_flavour(5.0), JetFlavor::Bottom);
        assert_eq!(JetFlavor::from_hadron_flavour(4.0), JetFlavor::Charm);
        assert_eq!(JetFlavor::from_hadron_flavour(0.0), JetFlavor::Light);
    }

    #[test]
    fn ttbar_weight_caps_pt() {
        assert_relative_eq!(ttbar_weight(900.0), ttbar_weight(800.0));
        assert!(ttbar_weight(0.0) > 1.0);
    }
}
