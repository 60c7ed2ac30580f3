//! Object-identification predicates, parameterized by year.
//!
//! Each predicate classifies one object from its kinematics and quality
//! bits. Tight criteria are strict supersets of the loose ones for the same
//! object type: every object passing tight also passes loose.

use crate::metadata::Year;

/// Bundle of per-object-type identification predicates.
#[derive(Debug, Clone, Copy)]
pub struct IdBundle {
    year: Year,
}

impl IdBundle {
    /// Predicates for one data-taking year.
    pub fn new(year: Year) -> Self {
        Self { year }
    }

    /// The year this bundle was built for.
    pub fn year(&self) -> Year {
        self.year
    }

    fn electron_vertex_ok(eta: f64, dxy: f64, dz: f64) -> bool {
        // Barrel/endcap boundary at |eta| = 1.479.
        if eta.abs() < 1.479 {
            dxy.abs() < 0.05 && dz.abs() < 0.10
        } else {
            dxy.abs() < 0.10 && dz.abs() < 0.20
        }
    }

    /// Loose electron: cut-based ID at the veto working point or better.
    pub fn is_loose_electron(&self, pt: f64, eta: f64, dxy: f64, dz: f64, cut_based: f64) -> bool {
        pt > 10.0 && eta.abs() < 2.5 && cut_based >= 1.0 && Self::electron_vertex_ok(eta, dxy, dz)
    }

    /// Tight electron: cut-based ID at the tight working point.
    pub fn is_tight_electron(&self, pt: f64, eta: f64, dxy: f64, dz: f64, cut_based: f64) -> bool {
        pt > 40.0 && eta.abs() < 2.5 && cut_based >= 4.0 && Self::electron_vertex_ok(eta, dxy, dz)
    }

    /// Loose muon: loose cut-based ID plus loose relative isolation.
    pub fn is_loose_muon(&self, pt: f64, eta: f64, iso: f64, loose_id: bool) -> bool {
        pt > 10.0 && eta.abs() < 2.4 && iso < 0.25 && loose_id
    }

    /// Tight muon: tight cut-based ID plus tight relative isolation.
    pub fn is_tight_muon(&self, pt: f64, eta: f64, iso: f64, tight_id: bool) -> bool {
        pt > 30.0 && eta.abs() < 2.4 && iso < 0.15 && tight_id
    }

    /// Loose tau: decay-mode finding plus the loose MVA isolation bit.
    pub fn is_loose_tau(&self, pt: f64, eta: f64, decay_mode: bool, mva_id: f64) -> bool {
        // idMVAoldDM2017v2 is a bitmap; bit 3 (value 8) is the loose WP.
        pt > 18.0 && eta.abs() < 2.3 && decay_mode && (mva_id as u64) & 8 != 0
    }

    /// Loose photon: cut-based loose working point.
    pub fn is_loose_photon(&self, pt: f64, eta: f64, id_bits: f64) -> bool {
        pt > 15.0 && eta.abs() < 2.5 && id_bits >= 1.0
    }

    /// Tight photon: cut-based tight working point, barrel only, high pt.
    pub fn is_tight_photon(&self, pt: f64, eta: f64, id_bits: f64) -> bool {
        pt > 230.0 && eta.abs() < 1.4442 && id_bits >= 3.0
    }

    /// Good AK4 jet: kinematics, tight jet ID, and energy-fraction cuts
    /// against detector noise.
    #[allow(clippy::too_many_arguments)]
    pub fn is_good_jet(
        &self,
        pt: f64,
        eta: f64,
        jet_id: f64,
        ne_hef: f64,
        ne_em_ef: f64,
        ch_hef: f64,
        ch_em_ef: f64,
    ) -> bool {
        pt > 30.0
            && eta.abs() < 2.4
            && jet_id >= 2.0
            && ne_hef < 0.8
            && ne_em_ef < 0.99
            && ch_hef > 0.1
            && ch_em_ef < 0.99
    }

    /// Jet pointing into the 2018 HEM-failure sector.
    pub fn is_hem_jet(&self, pt: f64, eta: f64, phi: f64) -> bool {
        pt > 30.0 && (-3.0..-1.3).contains(&eta) && (-1.57..-0.87).contains(&phi)
    }

    /// Which photon ID column this year uses.
    ///
    /// 2016 nanoAOD stores the cut-based photon ID in `cutBased`; later years
    /// in `cutBasedBitmap`.
    pub fn photon_id_column(&self) -> &'static str {
        match self.year {
            Year::Y2016 => "cutBased",
            _ => "cutBasedBitmap",
        }
    }
}
