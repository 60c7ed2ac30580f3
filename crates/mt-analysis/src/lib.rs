//! # mt-analysis
//!
//! Batch-oriented CMS event-processing pipeline. A batch of events arrives as
//! columnar data (scalar per-event columns plus jagged per-object columns);
//! the pipeline classifies physics objects into loose/tight/clean subsets,
//! combines named boolean selections into analysis regions, composes
//! per-event correction weights for simulated samples, and fills a fixed set
//! of histograms keyed by (dataset, region, systematic).
//!
//! Batches are independent: [`processor::AnalysisProcessor::process`] takes a
//! batch and returns a fresh [`histograms::Accumulator`]; accumulators merge
//! associatively so batch order never affects the result.

#![warn(missing_docs)]
#![warn(clippy::all)]

pub mod corrections;
pub mod event;
pub mod gen;
pub mod histograms;
pub mod ids;
pub mod metadata;
pub mod objects;
pub mod processor;
pub mod regions;
pub mod selection;
pub mod weights;

pub use corrections::{BtagTable, CalibrationBundle, Lookup1d, Lookup2d, YearTable};
pub use event::{EventBatch, JaggedTable};
pub use histograms::{Accumulator, Binning, CategoryHistogram, CategoryKey, Histogram1d};
pub use ids::IdBundle;
pub use metadata::{XsecTable, Year, YearMetadata};
pub use objects::{DileptonPair, ObjectKinematics, SelectedObjects};
pub use processor::AnalysisProcessor;
pub use regions::RegionTable;
pub use selection::SelectionSet;
pub use weights::{RegionWeightRule, Weights};
