//! Histogram accumulation keyed by (dataset, region, systematic).
//!
//! Bin contents and sum-of-weights-squared follow the usual weighted-fill
//! convention; under/overflow is tracked separately. Accumulators merge
//! associatively and commutatively so batch processing order never affects
//! the result.

use mt_core::{Error, Result};
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::fmt;

/// Bin-edge definition for one observable.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Binning {
    edges: Vec<f64>,
}

impl Binning {
    /// `n` uniform bins over `[lo, hi)`.
    pub fn uniform(n: usize, lo: f64, hi: f64) -> Result<Self> {
        if n == 0 || !(lo < hi) {
            return Err(Error::Configuration(format!(
                "invalid uniform binning: n={n}, range=({lo}, {hi})"
            )));
        }
        let w = (hi - lo) / n as f64;
        let edges = (0..=n).map(|i| lo + w * i as f64).collect();
        Ok(Self { edges })
    }

    /// Explicit bin edges (sorted, length = n_bins + 1).
    pub fn variable(edges: Vec<f64>) -> Result<Self> {
        if edges.len() < 2 || edges.windows(2).any(|w| w[1] <= w[0]) {
            return Err(Error::Configuration(
                "variable binning edges must be strictly increasing with >= 2 entries".into(),
            ));
        }
        Ok(Self { edges })
    }

    /// Number of bins (excluding under/overflow).
    pub fn n_bins(&self) -> usize {
        self.edges.len() - 1
    }

    /// Bin edges.
    pub fn edges(&self) -> &[f64] {
        &self.edges
    }

    /// Bin index for a value; `None` for under/overflow (or NaN).
    pub fn find_bin(&self, val: f64) -> Option<usize> {
        let edges = &self.edges;
        if val.is_nan() || val < edges[0] || val >= edges[edges.len() - 1] {
            return None;
        }
        match edges.binary_search_by(|e| e.partial_cmp(&val).unwrap()) {
            Ok(i) => {
                if i >= edges.len() - 1 {
                    None
                } else {
                    Some(i)
                }
            }
            Err(i) => {
                if i == 0 || i >= edges.len() {
                    None
                } else {
                    Some(i - 1)
                }
            }
        }
    }
}

/// A 1D weighted histogram.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Histogram1d {
    binning: Binning,
    bin_content: Vec<f64>,
    sumw2: Vec<f64>,
    underflow: f64,
    overflow: f64,
    entries: u64,
}

impl Histogram1d {
    /// An empty histogram with the given binning.
    pub fn new(binning: Binning) -> Self {
        let n = binning.n_bins();
        Self {
            binning,
            bin_content: vec![0.0; n],
            sumw2: vec![0.0; n],
            underflow: 0.0,
            overflow: 0.0,
            entries: 0,
        }
    }

    /// Fill one value with a weight.
    ///
    /// A NaN value is an undefined observable: it contributes nothing (a
    /// zero-weight entry, never a wrong bin). Zero-weight fills are skipped
    /// outright.
    pub fn fill(&mut self, value: f64, weight: f64) {
        if value.is_nan() || weight == 0.0 {
            return;
        }
        match self.binning.find_bin(value) {
            Some(b) => {
                self.bin_content[b] += weight;
                self.sumw2[b] += weight * weight;
                self.entries += 1;
            }
            None => {
                if value < self.binning.edges()[0] {
                    self.underflow += weight;
                } else {
                    self.overflow += weight;
                }
            }
        }
    }

    /// Add another histogram's contents into this one.
    pub fn merge(&mut self, other: &Histogram1d) -> Result<()> {
        if self.binning != other.binning {
            return Err(Error::Validation("histogram merge with mismatched binning".into()));
        }
        for (a, b) in self.bin_content.iter_mut().zip(&other.bin_content) {
            *a += b;
        }
        for (a, b) in self.sumw2.iter_mut().zip(&other.sumw2) {
            *a += b;
        }
        self.underflow += other.underflow;
        self.overflow += other.overflow;
        self.entries += other.entries;
        Ok(())
    }

    /// Multiply every bin (and the flows) by a constant.
    pub fn scale(&mut self, factor: f64) {
        for b in &mut self.bin_content {
            *b *= factor;
        }
        for s in &mut self.sumw2 {
            *s *= factor * factor;
        }
        self.underflow *= factor;
        self.overflow *= factor;
    }

    /// Bin contents (excluding flows).
    pub fn bin_content(&self) -> &[f64] {
        &self.bin_content
    }

    /// Per-bin sum of squared weights.
    pub fn sumw2(&self) -> &[f64] {
        &self.sumw2
    }

    /// Sum of all in-range bin contents.
    pub fn integral(&self) -> f64 {
        self.bin_content.iter().sum()
    }

    /// Number of in-range fills.
    pub fn entries(&self) -> u64 {
        self.entries
    }
}

/// The categorical axes of one histogram cell.
#[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct CategoryKey {
    /// Dataset tag, possibly `HF--`/`LF--` prefixed.
    pub dataset: String,
    /// Analysis region name.
    pub region: String,
    /// Systematic variation name (`"nominal"` for the central fill).
    pub systematic: String,
}

impl fmt::Display for CategoryKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}/{}/{}", self.dataset, self.region, self.systematic)
    }
}

impl CategoryKey {
    /// Parse a `dataset/region/systematic` string.
    pub fn parse(s: &str) -> Result<Self> {
        let mut parts = s.splitn(3, '/');
        match (parts.next(), parts.next(), parts.next()) {
            (Some(d), Some(r), Some(sy)) => Ok(Self {
                dataset: d.to_string(),
                region: r.to_string(),
                systematic: sy.to_string(),
            }),
            _ => Err(Error::Validation(format!("malformed category key '{s}'"))),
        }
    }
}

/// One observable's histograms across all (dataset, region, systematic)
/// cells. Cells are created lazily on first fill.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CategoryHistogram {
    /// Axis label for the observable.
    pub label: String,
    binning: Binning,
    // Keyed by "dataset/region/systematic" so the structure serializes as a
    // plain JSON object.
    bins: BTreeMap<String, Histogram1d>,
}

impl CategoryHistogram {
    /// An empty categorical histogram.
    pub fn new(label: impl Into<String>, binning: Binning) -> Self {
        Self { label: label.into(), binning, bins: BTreeMap::new() }
    }

    /// Fill values for one (dataset, region, systematic) cell.
    ///
    /// `values` and `weights` run over events; entries with zero weight or
    /// NaN value contribute nothing.
    pub fn fill(&mut self, key: &CategoryKey, values: &[f64], weights: &[f64]) -> Result<()> {
        if values.len() != weights.len() {
            return Err(Error::Validation(format!(
                "fill length mismatch for '{key}': {} values, {} weights",
                values.len(),
                weights.len()
            )));
        }
        let hist = self
            .bins
            .entry(key.to_string())
            .or_insert_with(|| Histogram1d::new(self.binning.clone()));
        for (&v, &w) in values.iter().zip(weights) {
            hist.fill(v, w);
        }
        Ok(())
    }

    /// The histogram for one cell, if filled.
    pub fn get(&self, key: &CategoryKey) -> Option<&Histogram1d> {
        self.bins.get(&key.to_string())
    }

    /// All filled cells.
    pub fn cells(&self) -> impl Iterator<Item = (Result<CategoryKey>, &Histogram1d)> {
        self.bins.iter().map(|(k, h)| (CategoryKey::parse(k), h))
    }

    /// Merge another categorical histogram into this one.
    pub fn merge(&mut self, other: &CategoryHistogram) -> Result<()> {
        if self.binning != other.binning {
            return Err(Error::Validation(format!(
                "merge with mismatched binning for '{}'",
                self.label
            )));
        }
        for (key, hist) in &other.bins {
            match self.bins.get_mut(key) {
                Some(h) => h.merge(hist)?,
                None => {
                    self.bins.insert(key.clone(), hist.clone());
                }
            }
        }
        Ok(())
    }

    /// Rescale every cell of a dataset by a factor.
    pub fn scale_dataset(&mut self, dataset: &str, factor: f64) {
        for (key, hist) in self.bins.iter_mut() {
            if key.split('/').next() == Some(dataset) {
                hist.scale(factor);
            }
        }
    }

    /// Dataset tags appearing in any cell.
    pub fn datasets(&self) -> Vec<String> {
        let mut out: Vec<String> =
            self.bins.keys().filter_map(|k| k.split('/').next().map(str::to_string)).collect();
        out.dedup();
        out
    }
}

/// The full per-batch output: generated-weight sums plus all observable
/// histograms. Supports associative merge across batches.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Accumulator {
    /// Sum of generator weights per dataset tag.
    pub sumw: BTreeMap<String, f64>,
    /// Observable name → categorical histogram.
    pub histograms: BTreeMap<String, CategoryHistogram>,
}

impl Accumulator {
    /// The standard observable set with its binnings.
    pub fn standard() -> Result<Self> {
        let pt_edges = vec![
            30.0, 60.0, 90.0, 120.0, 150.0, 180.0, 210.0, 250.0, 280.0, 310.0, 340.0, 370.0,
            400.0, 430.0, 470.0, 510.0, 550.0, 590.0, 640.0, 690.0, 740.0, 790.0, 840.0, 900.0,
            960.0, 1020.0, 1090.0, 1160.0, 1250.0,
        ];
        let recoil_edges = vec![
            250.0, 280.0, 310.0, 340.0, 370.0, 400.0, 430.0, 470.0, 510.0, 550.0, 590.0, 640.0,
            690.0, 740.0, 790.0, 840.0, 900.0, 960.0, 1020.0, 1090.0, 1160.0, 1250.0,
        ];

        let mut histograms = BTreeMap::new();
        let mut add = |name: &str, label: &str, binning: Binning| {
            histograms.insert(name.to_string(), CategoryHistogram::new(label, binning));
        };

        add("met", "MET", Binning::uniform(30, 0.0, 600.0)?);
        add("recoil", "Hadronic Recoil", Binning::variable(recoil_edges)?);
        add(
            "CaloMinusPfOverRecoil",
            "Calo - Pf / Recoil",
            Binning::uniform(35, 0.0, 1.0)?,
        );
        add("mindphi", "Min dPhi(MET,AK4s)", Binning::uniform(30, 0.0, 3.5)?);
        add("j1pt", "AK4 Leading Jet Pt", Binning::variable(pt_edges.clone())?);
        add("j1eta", "AK4 Leading Jet Eta", Binning::uniform(35, -3.5, 3.5)?);
        add("j1phi", "AK4 Leading Jet Phi", Binning::uniform(35, -3.5, 3.5)?);
        add("njets", "AK4 Number of Jets", Binning::uniform(6, -0.5, 5.5)?);
        add("ndcsvL", "AK4 Number of deepCSV Loose Jets", Binning::uniform(6, -0.5, 5.5)?);
        add("ndflvL", "AK4 Number of deepFlavor Loose Jets", Binning::uniform(6, -0.5, 5.5)?);
        add("e1pt", "Leading Electron Pt", Binning::variable(pt_edges.clone())?);
        add("e1eta", "Leading Electron Eta", Binning::uniform(48, -2.4, 2.4)?);
        add("e1phi", "Leading Electron Phi", Binning::uniform(64, -3.2, 3.2)?);
        add("dielemass", "Dielectron mass", Binning::uniform(100, 0.0, 500.0)?);
        add("dielept", "Dielectron Pt", Binning::uniform(150, 0.0, 800.0)?);
        add("mu1pt", "Leading Muon Pt", Binning::variable(pt_edges)?);
        add("mu1eta", "Leading Muon Eta", Binning::uniform(48, -2.4, 2.4)?);
        add("mu1phi", "Leading Muon Phi", Binning::uniform(64, -3.2, 3.2)?);
        add("dimumass", "Dimuon mass", Binning::uniform(100, 0.0, 500.0)?);
        add("dimupt", "Dimuon Pt", Binning::uniform(150, 0.0, 800.0)?);

        Ok(Self { sumw: BTreeMap::new(), histograms })
    }

    /// Record a dataset's generated-weight sum.
    pub fn add_sumw(&mut self, dataset: &str, value: f64) {
        *self.sumw.entry(dataset.to_string()).or_insert(0.0) += value;
    }

    /// One observable's categorical histogram (mutable).
    pub fn histogram_mut(&mut self, name: &str) -> Result<&mut CategoryHistogram> {
        self.histograms
            .get_mut(name)
            .ok_or_else(|| Error::Configuration(format!("unknown histogram '{name}'")))
    }

    /// Merge another accumulator into this one.
    pub fn merge(&mut self, other: &Accumulator) -> Result<()> {
        for (dataset, w) in &other.sumw {
            *self.sumw.entry(dataset.clone()).or_insert(0.0) += w;
        }
        for (name, hist) in &other.histograms {
            match self.histograms.get_mut(name) {
                Some(h) => h.merge(hist)?,
                None => {
                    self.histograms.insert(name.clone(), hist.clone());
                }
            }
        }
        Ok(())
    }

    /// Write as pretty JSON.
    pub fn to_json_file(&self, path: impl AsRef<std::path::Path>) -> Result<()> {
        let bytes = serde_json::to_vec_pretty(self)?;
        std::fs::write(path, bytes)?;
        Ok(())
    }
}
