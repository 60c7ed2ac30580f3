//! Analysis regions: a named conjunction of selection masks plus the routing
//! table deciding which datasets fill which regions.
//!
//! The region table is validated eagerly against the list of masks the
//! processor registers; a region referencing an unregistered mask fails at
//! construction, before any batch is touched.

use crate::selection::SelectionSet;
use mt_core::{Error, Result};
use std::collections::BTreeMap;

/// Region name → set of selection-mask names (conjunction).
#[derive(Debug, Clone)]
pub struct RegionTable {
    regions: BTreeMap<String, Vec<String>>,
    samples: BTreeMap<String, Vec<&'static str>>,
}

/// Mask names the processor registers for every batch; the region table is
/// validated against this list at setup time.
pub const REGISTERED_MASKS: &[&str] = &[
    "iszeroL",
    "isoneE",
    "isoneM",
    "istwoE",
    "istwoM",
    "isoneA",
    "onebjet",
    "noHEMj",
    "met_filters",
    "met_triggers",
    "singleelectron_triggers",
    "singlemuon_triggers",
    "singlephoton_triggers",
];

impl RegionTable {
    /// The standard eight-region table: single-lepton signal regions plus
    /// top-pair, W+jets, and dilepton control regions, per lepton flavor.
    pub fn standard() -> Result<Self> {
        let ele = ["onebjet", "noHEMj", "met_filters", "singleelectron_triggers"];
        let mu = ["onebjet", "noHEMj", "met_filters", "singlemuon_triggers"];

        let mut regions: BTreeMap<String, Vec<String>> = BTreeMap::new();
        let mut add = |name: &str, count: &str, tail: &[&str]| {
            let mut masks = vec![count.to_string()];
            masks.extend(tail.iter().map(|s| s.to_string()));
            regions.insert(name.to_string(), masks);
        };
        add("sre", "isoneE", &ele);
        add("srm", "isoneM", &mu);
        add("ttbare", "isoneE", &ele);
        add("ttbarm", "isoneM", &mu);
        add("wjete", "isoneE", &ele);
        add("wjetm", "isoneM", &mu);
        add("dilepe", "istwoE", &ele);
        add("dilepm", "istwoM", &mu);

        let mc: &[&str] = &["WJets", "DY", "TT", "ST", "WW", "WZ", "ZZ", "QCD"];
        let with_data = |data: &'static str| -> Vec<&'static str> {
            mc.iter().copied().chain([data]).collect()
        };
        let mut samples = BTreeMap::new();
        for r in ["sre", "ttbare", "wjete", "dilepe"] {
            samples.insert(r.to_string(), with_data("SingleElectron"));
        }
        for r in ["srm", "ttbarm", "wjetm", "dilepm"] {
            samples.insert(r.to_string(), with_data("SingleMuon"));
        }

        let table = Self { regions, samples };
        table.validate_against(REGISTERED_MASKS)?;
        Ok(table)
    }

    /// Build a custom table. Every region must have a sample list.
    pub fn new(
        regions: BTreeMap<String, Vec<String>>,
        samples: BTreeMap<String, Vec<&'static str>>,
    ) -> Result<Self> {
        for name in regions.keys() {
            if !samples.contains_key(name) {
                return Err(Error::Configuration(format!(
                    "region '{name}' has no sample routing entry"
                )));
            }
        }
        Ok(Self { regions, samples })
    }

    /// Fail fast if any region references a mask name outside `known`.
    pub fn validate_against(&self, known: &[&str]) -> Result<()> {
        for (region, masks) in &self.regions {
            for mask in masks {
                if !known.contains(&mask.as_str()) {
                    return Err(Error::Configuration(format!(
                        "region '{region}' references unregistered selection '{mask}'"
                    )));
                }
            }
        }
        Ok(())
    }

    /// Region names in stable order.
    pub fn names(&self) -> impl Iterator<Item = &str> {
        self.regions.keys().map(|s| s.as_str())
    }

    /// The mask names defining one region.
    pub fn masks(&self, region: &str) -> Result<&[String]> {
        self.regions
            .get(region)
            .map(|m| m.as_slice())
            .ok_or_else(|| Error::Configuration(format!("unknown region '{region}'")))
    }

    /// The per-event admission mask for one region.
    pub fn mask(&self, region: &str, selection: &SelectionSet) -> Result<Vec<bool>> {
        selection.all(self.masks(region)?.iter().map(|s| s.as_str()))
    }

    /// Regions a dataset participates in, by substring match against the
    /// region's sample list.
    pub fn regions_for_dataset(&self, dataset: &str) -> Vec<String> {
        self.samples
            .iter()
            .filter(|(_, samples)| samples.iter().any(|s| dataset.contains(s)))
            .map(|(region, _)| region.clone())
            .collect()
    }
}
