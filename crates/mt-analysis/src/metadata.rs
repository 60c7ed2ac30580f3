//! Per-year run metadata: luminosity, data-quality filter flags, trigger
//! path lists, and jet-correction calibration-set identifiers.
//!
//! Values follow the CMS Run-2 PdmV summary tables.

use mt_core::{Error, Result};
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::fmt;
use std::str::FromStr;

/// Data-taking year.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
pub enum Year {
    /// 2016 dataset.
    #[serde(rename = "2016")]
    Y2016,
    /// 2017 dataset.
    #[serde(rename = "2017")]
    Y2017,
    /// 2018 dataset.
    #[serde(rename = "2018")]
    Y2018,
}

impl Year {
    /// All supported years.
    pub const ALL: [Year; 3] = [Year::Y2016, Year::Y2017, Year::Y2018];
}

impl fmt::Display for Year {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            Year::Y2016 => "2016",
            Year::Y2017 => "2017",
            Year::Y2018 => "2018",
        };
        f.write_str(s)
    }
}

impl FromStr for Year {
    type Err = Error;

    fn from_str(s: &str) -> Result<Self> {
        match s {
            "2016" => Ok(Year::Y2016),
            "2017" => Ok(Year::Y2017),
            "2018" => Ok(Year::Y2018),
            other => Err(Error::Configuration(format!("unsupported year '{other}'"))),
        }
    }
}

/// Static per-year metadata consumed by the processor.
#[derive(Debug, Clone)]
pub struct YearMetadata {
    /// The year this metadata describes.
    pub year: Year,
    /// Integrated luminosity in inverse picobarns.
    pub lumi_pb: f64,
    /// Required data-quality filter flag names (ANDed per event).
    pub met_filter_flags: Vec<&'static str>,
    /// MET trigger paths (ORed per event).
    pub met_triggers: Vec<&'static str>,
    /// Single-electron trigger paths.
    pub single_electron_triggers: Vec<&'static str>,
    /// Single-muon trigger paths.
    pub single_muon_triggers: Vec<&'static str>,
    /// Single-photon trigger paths.
    pub single_photon_triggers: Vec<&'static str>,
    /// Jet energy correction calibration-set identifiers.
    pub jec: Vec<&'static str>,
    /// Jet energy correction uncertainty set identifiers.
    pub junc: Vec<&'static str>,
    /// Jet pt-resolution set identifiers.
    pub jer: Vec<&'static str>,
    /// Jet resolution scale-factor set identifiers.
    pub jersf: Vec<&'static str>,
}

impl YearMetadata {
    /// Metadata for one year. Luminosities are converted from fb^-1.
    pub fn for_year(year: Year) -> Self {
        let met_filter_flags = vec![
            "Flag_goodVertices",
            "Flag_globalSuperTightHalo2016Filter",
            "Flag_HBHENoiseFilter",
            "Flag_HBHENoiseIsoFilter",
            "Flag_EcalDeadCellTriggerPrimitiveFilter",
            "Flag_BadPFMuonFilter",
        ];
        match year {
            Year::Y2016 => Self {
                year,
                lumi_pb: 1000.0 * 35.92,
                met_filter_flags,
                met_triggers: vec!["HLT_PFMETNoMu120_PFMHTNoMu120_IDTight"],
                single_electron_triggers: vec![
                    "HLT_Ele27_WPTight_Gsf",
                    "HLT_Ele115_CaloIdVT_GsfTrkIdT",
                    "HLT_Photon175",
                ],
                single_muon_triggers: vec![
                    "HLT_IsoMu24",
                    "HLT_IsoTkMu24",
                    "HLT_Mu50",
                    "HLT_TkMu50",
                ],
                single_photon_triggers: vec!["HLT_Photon175", "HLT_Photon165_HE10"],
                jec: vec![
                    "Summer16_07Aug2017_V11_MC_L1FastJet_AK4PFPuppi",
                    "Summer16_07Aug2017_V11_MC_L2L3Residual_AK4PFPuppi",
                    "Summer16_07Aug2017_V11_MC_L2Relative_AK4PFPuppi",
                    "Summer16_07Aug2017_V11_MC_L2Residual_AK4PFPuppi",
                    "Summer16_07Aug2017_V11_MC_L3Absolute_AK4PFPuppi",
                ],
                junc: vec!["Summer16_07Aug2017_V11_MC_Uncertainty_AK4PFPuppi"],
                jer: vec!["Summer16_25nsV1b_MC_PtResolution_AK4PFPuppi"],
                jersf: vec!["Summer16_25nsV1b_MC_SF_AK4PFPuppi"],
            },
            Year::Y2017 => Self {
                year,
                lumi_pb: 1000.0 * 41.53,
                met_filter_flags,
                met_triggers: vec![
                    "HLT_PFMETNoMu120_PFMHTNoMu120_IDTight_PFHT60",
                    "HLT_PFMETNoMu120_PFMHTNoMu120_IDTight",
                ],
                single_electron_triggers: vec![
                    "HLT_Ele32_WPTight_Gsf",
                    "HLT_Ele115_CaloIdVT_GsfTrkIdT",
                    "HLT_Photon200",
                ],
                single_muon_triggers: vec![
                    "HLT_IsoMu27",
                    "HLT_Mu50",
                    "HLT_OldMu100",
                    "HLT_TkMu100",
                ],
                single_photon_triggers: vec!["HLT_Photon200"],
                jec: vec![
                    "Fall17_17Nov2017_V32_MC_L1FastJet_AK4PFPuppi",
                    "Fall17_17Nov2017_V32_MC_L2L3Residual_AK4PFPuppi",
                    "Fall17_17Nov2017_V32_MC_L2Relative_AK4PFPuppi",
                    "Fall17_17Nov2017_V32_MC_L2Residual_AK4PFPuppi",
                    "Fall17_17Nov2017_V32_MC_L3Absolute_AK4PFPuppi",
                ],
                junc: vec!["Fall17_17Nov2017_V32_MC_Uncertainty_AK4PFPuppi"],
                jer: vec!["Fall17_V3b_MC_PtResolution_AK4PFPuppi"],
                jersf: vec!["Fall17_V3b_MC_SF_AK4PFPuppi"],
            },
            Year::Y2018 => Self {
                year,
                lumi_pb: 1000.0 * 59.74,
                met_filter_flags,
                met_triggers: vec![
                    "HLT_PFMETNoMu120_PFMHTNoMu120_IDTight_PFHT60",
                    "HLT_PFMETNoMu120_PFMHTNoMu120_IDTight",
                ],
                single_electron_triggers: vec![
                    "HLT_Ele32_WPTight_Gsf",
                    "HLT_Ele115_CaloIdVT_GsfTrkIdT",
                    "HLT_Photon200",
                ],
                single_muon_triggers: vec![
                    "HLT_IsoMu24",
                    "HLT_Mu50",
                    "HLT_OldMu100",
                    "HLT_TkMu100",
                ],
                single_photon_triggers: vec!["HLT_Photon200"],
                jec: vec![
                    "Autumn18_V19_MC_L1FastJet_AK4PFPuppi",
                    "Autumn18_V19_MC_L2L3Residual_AK4PFPuppi",
                    "Autumn18_V19_MC_L2Relative_AK4PFPuppi",
                    "Autumn18_V19_MC_L2Residual_AK4PFPuppi",
                    "Autumn18_V19_MC_L3Absolute_AK4PFPuppi",
                ],
                junc: vec!["Autumn18_V19_MC_Uncertainty_AK4PFPuppi"],
                jer: vec!["Autumn18_V7b_MC_PtResolution_AK4PFPuppi"],
                jersf: vec!["Autumn18_V7b_MC_SF_AK4PFPuppi"],
            },
        }
    }
}

/// Per-dataset cross sections in picobarns.
///
/// The sentinel value `-1` means "do not rescale this dataset" and is passed
/// through untouched by post-processing.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct XsecTable {
    xsec: BTreeMap<String, f64>,
}

impl XsecTable {
    /// Build from (dataset, cross-section) pairs.
    pub fn new(entries: impl IntoIterator<Item = (String, f64)>) -> Self {
        Self { xsec: entries.into_iter().collect() }
    }

    /// Load from a JSON object mapping dataset name to cross section.
    pub fn from_json_file(path: impl AsRef<std::path::Path>) -> Result<Self> {
        let bytes = std::fs::read(path)?;
        let xsec: BTreeMap<String, f64> = serde_json::from_slice(&bytes)?;
        Ok(Self { xsec })
    }

    /// Cross section for a dataset. Missing datasets are a configuration error.
    pub fn get(&self, dataset: &str) -> Result<f64> {
        self.xsec.get(dataset).copied().ok_or_else(|| {
            Error::Configuration(format!("no cross section registered for dataset '{dataset}'"))
        })
    }
}
