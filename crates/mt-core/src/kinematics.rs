//! Transverse-plane and four-vector kinematics.
//!
//! Physics objects are carried through the pipeline as (pt, eta, phi, mass)
//! tuples; this module provides the small amount of vector algebra the
//! pipeline needs: transverse 2-vectors for recoil sums, azimuthal and
//! angular distances for object cleaning, and four-vector addition for
//! dilepton invariant masses.

use serde::{Deserialize, Serialize};
use std::f64::consts::PI;

/// A 2-vector in the transverse plane.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct Vec2 {
    /// x component.
    pub px: f64,
    /// y component.
    pub py: f64,
}

impl Vec2 {
    /// Build from polar coordinates (pt, phi).
    pub fn from_polar(pt: f64, phi: f64) -> Self {
        Self { px: pt * phi.cos(), py: pt * phi.sin() }
    }

    /// Magnitude (transverse momentum).
    pub fn mag(&self) -> f64 {
        self.px.hypot(self.py)
    }

    /// Azimuthal angle in (-pi, pi].
    pub fn phi(&self) -> f64 {
        self.py.atan2(self.px)
    }

    /// Azimuthal distance to another vector, wrapped into [-pi, pi).
    pub fn delta_phi(&self, other: &Vec2) -> f64 {
        delta_phi(self.phi(), other.phi())
    }
}

impl std::ops::Add for Vec2 {
    type Output = Vec2;

    fn add(self, rhs: Vec2) -> Vec2 {
        Vec2 { px: self.px + rhs.px, py: self.py + rhs.py }
    }
}

/// Difference of azimuthal angles wrapped into [-pi, pi).
pub fn delta_phi(phi1: f64, phi2: f64) -> f64 {
    let mut d = phi1 - phi2;
    while d >= PI {
        d -= 2.0 * PI;
    }
    while d < -PI {
        d += 2.0 * PI;
    }
    d
}

/// Angular distance in eta-phi space.
pub fn delta_r(eta1: f64, phi1: f64, eta2: f64, phi2: f64) -> f64 {
    let deta = eta1 - eta2;
    let dphi = delta_phi(phi1, phi2);
    (deta * deta + dphi * dphi).sqrt()
}

/// A four-vector in (px, py, pz, E) representation.
///
/// Used for dilepton-pair sums; construction goes through
/// [`FourVector::from_ptetaphim`] so callers stay in collider coordinates.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct FourVector {
    /// x component of the momentum.
    pub px: f64,
    /// y component of the momentum.
    pub py: f64,
    /// z component of the momentum.
    pub pz: f64,
    /// Energy.
    pub e: f64,
}

impl FourVector {
    /// Build from collider coordinates (pt, eta, phi, mass).
    pub fn from_ptetaphim(pt: f64, eta: f64, phi: f64, mass: f64) -> Self {
        let px = pt * phi.cos();
        let py = pt * phi.sin();
        let pz = pt * eta.sinh();
        let e = (px * px + py * py + pz * pz + mass * mass).sqrt();
        Self { px, py, pz, e }
    }

    /// Transverse momentum.
    pub fn pt(&self) -> f64 {
        self.px.hypot(self.py)
    }

    /// Azimuthal angle.
    pub fn phi(&self) -> f64 {
        self.py.atan2(self.px)
    }

    /// Invariant mass. Clamped at zero against rounding of light-like sums.
    pub fn mass(&self) -> f64 {
        let m2 = self.e * self.e - self.px * self.px - self.py * self.py - self.pz * self.pz;
        m2.max(0.0).sqrt()
    }

    /// Projection onto the transverse plane.
    pub fn transverse(&self) -> Vec2 {
        Vec2 { px: self.px, py: self.py }
    }
}

impl std::ops::Add for FourVector {
    type Output = FourVector;

    fn add(self, rhs: FourVector) -> FourVector {
        FourVector {
            px: self.px + rhs.px,
            py: self.py + rhs.py,
            pz: self.pz + rhs.pz,
            e: self.e + rhs.e,
        }
    }
}
