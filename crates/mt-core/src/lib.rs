//! # mt-core
//!
//! Core types shared across the mtop analysis pipeline: the common error
//! type and transverse-plane / four-vector kinematics used by the object
//! selector and the recoil computation.

#![warn(missing_docs)]
#![warn(clippy::all)]

pub mod error;
pub mod kinematics;

pub use error::{Error, Result};
pub use kinematics::{delta_phi, delta_r, FourVector, Vec2};
