//! Columnar event batch (Structure-of-Arrays).
//!
//! A batch holds N events. Per-event quantities are scalar columns of length
//! N; per-object quantities (electron pt, jet eta, ...) are jagged columns:
//! one shared offsets array per object type plus flat value arrays. Whether a
//! batch is real data or simulation is decided solely by the presence of the
//! generator-weight column.

use mt_core::{Error, Result};
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;

/// Jagged per-object columns for one object type.
///
/// All attribute columns share `offsets` (length N+1); attribute values for
/// event `i` live at `values[offsets[i]..offsets[i + 1]]`.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct JaggedTable {
    offsets: Vec<usize>,
    columns: BTreeMap<String, Vec<f64>>,
}

impl JaggedTable {
    /// Build a jagged table from shared offsets and named flat columns.
    pub fn new(
        offsets: Vec<usize>,
        columns: impl IntoIterator<Item = (String, Vec<f64>)>,
    ) -> Result<Self> {
        if offsets.is_empty() {
            return Err(Error::Validation("jagged offsets must have length n_events + 1".into()));
        }
        if offsets[0] != 0 || offsets.windows(2).any(|w| w[1] < w[0]) {
            return Err(Error::Validation(
                "jagged offsets must start at 0 and be non-decreasing".into(),
            ));
        }
        let total = *offsets.last().unwrap_or(&0);
        let mut cols = BTreeMap::new();
        for (name, col) in columns {
            if col.len() != total {
                return Err(Error::Validation(format!(
                    "jagged column '{}' length mismatch: expected {}, got {}",
                    name,
                    total,
                    col.len()
                )));
            }
            cols.insert(name, col);
        }
        Ok(Self { offsets, columns: cols })
    }

    /// An empty table for `n_events` events (zero objects everywhere).
    pub fn empty(n_events: usize) -> Self {
        Self { offsets: vec![0; n_events + 1], columns: BTreeMap::new() }
    }

    /// Number of events.
    pub fn n_events(&self) -> usize {
        self.offsets.len() - 1
    }

    /// Total number of objects across all events.
    pub fn n_objects(&self) -> usize {
        *self.offsets.last().unwrap_or(&0)
    }

    /// Object count for one event.
    pub fn count(&self, event: usize) -> usize {
        self.offsets[event + 1] - self.offsets[event]
    }

    /// Flat index range for one event.
    pub fn range(&self, event: usize) -> std::ops::Range<usize> {
        self.offsets[event]..self.offsets[event + 1]
    }

    /// A full flat attribute column.
    pub fn column(&self, name: &str) -> Result<&[f64]> {
        self.columns
            .get(name)
            .map(|c| c.as_slice())
            .ok_or_else(|| Error::Validation(format!("missing object column '{name}'")))
    }

    /// Attribute values for one event.
    pub fn slice(&self, name: &str, event: usize) -> Result<&[f64]> {
        Ok(&self.column(name)?[self.range(event)])
    }
}

/// A columnar batch of events.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct EventBatch {
    /// Dataset identifier this batch belongs to (e.g. `"TTJets_2018"`).
    pub dataset: String,
    n_events: usize,
    scalars: BTreeMap<String, Vec<f64>>,
    flags: BTreeMap<String, Vec<bool>>,
    objects: BTreeMap<String, JaggedTable>,
    gen_weight: Option<Vec<f64>>,
}

impl EventBatch {
    /// Assemble a batch from columns, validating that every column spans the
    /// same number of events.
    pub fn new(
        dataset: impl Into<String>,
        n_events: usize,
        scalars: impl IntoIterator<Item = (String, Vec<f64>)>,
        flags: impl IntoIterator<Item = (String, Vec<bool>)>,
        objects: impl IntoIterator<Item = (String, JaggedTable)>,
        gen_weight: Option<Vec<f64>>,
    ) -> Result<Self> {
        let mut scalar_map = BTreeMap::new();
        for (name, col) in scalars {
            if col.len() != n_events {
                return Err(Error::Validation(format!(
                    "scalar column '{}' length mismatch: expected {}, got {}",
                    name,
                    n_events,
                    col.len()
                )));
            }
            scalar_map.insert(name, col);
        }

        let mut flag_map = BTreeMap::new();
        for (name, col) in flags {
            if col.len() != n_events {
                return Err(Error::Validation(format!(
                    "flag column '{}' length mismatch: expected {}, got {}",
                    name,
                    n_events,
                    col.len()
                )));
            }
            flag_map.insert(name, col);
        }

        let mut object_map = BTreeMap::new();
        for (name, table) in objects {
            if table.n_events() != n_events {
                return Err(Error::Validation(format!(
                    "object table '{}' spans {} events, expected {}",
                    name,
                    table.n_events(),
                    n_events
                )));
            }
            object_map.insert(name, table);
        }

        if let Some(gw) = &gen_weight {
            if gw.len() != n_events {
                return Err(Error::Validation(format!(
                    "genWeight length mismatch: expected {}, got {}",
                    n_events,
                    gw.len()
                )));
            }
        }

        Ok(Self {
            dataset: dataset.into(),
            n_events,
            scalars: scalar_map,
            flags: flag_map,
            objects: object_map,
            gen_weight,
        })
    }

    /// Load a batch from a JSON file.
    pub fn from_json_file(path: impl AsRef<std::path::Path>) -> Result<Self> {
        let bytes = std::fs::read(path)?;
        let batch: EventBatch = serde_json::from_slice(&bytes)?;
        // Re-run construction checks: serde accepts any well-formed shape.
        EventBatch::new(
            batch.dataset,
            batch.n_events,
            batch.scalars,
            batch.flags,
            batch.objects,
            batch.gen_weight,
        )
    }

    /// Number of events.
    pub fn n_events(&self) -> usize {
        self.n_events
    }

    /// A batch is real data exactly when the generator-weight column is absent.
    pub fn is_data(&self) -> bool {
        self.gen_weight.is_none()
    }

    /// Per-event generator weights (simulation only).
    pub fn gen_weight(&self) -> Option<&[f64]> {
        self.gen_weight.as_deref()
    }

    /// A required per-event scalar column.
    pub fn scalar(&self, name: &str) -> Result<&[f64]> {
        self.scalars
            .get(name)
            .map(|c| c.as_slice())
            .ok_or_else(|| Error::Validation(format!("missing scalar column '{name}'")))
    }

    /// A per-event boolean column (trigger path or data-quality filter bit).
    ///
    /// Returns `None` when absent; trigger paths legitimately differ between
    /// years, so the caller decides whether absence is an error.
    pub fn flag(&self, name: &str) -> Option<&[bool]> {
        self.flags.get(name).map(|c| c.as_slice())
    }

    /// The jagged table for one object type, or an empty table if the batch
    /// carries no objects of that type.
    pub fn objects(&self, name: &str) -> JaggedTable {
        self.objects.get(name).cloned().unwrap_or_else(|| JaggedTable::empty(self.n_events))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn jagged(counts: &[usize], col: (&str, Vec<f64>)) -> JaggedTable {
        let mut offsets = vec![0usize];
        for c in counts {
            offsets.push(offsets.last().unwrap() + c);
        }
        JaggedTable::new(offsets, [(col.0.to_string(), col.1)]).unwrap()
    }

    #[test]
    fn jagged_slicing() {
        let t = jagged(&[2, 0, 1], ("pt", vec![10.0, 20.0, 30.0]));
        assert_eq!(t.n_events(), 3);
        assert_eq!(t.count(0), 2);
        assert_eq!(t.count(1), 0);
        assert_eq!(t.slice("pt", 0).unwrap(), &[10.0, 20.0]);
        assert!(t.slice("pt", 1).unwrap().is_empty());
        assert_eq!(t.slice("pt", 2).unwrap(), &[30.0]);
    }

    #[test]
    fn jagged_rejects_length_mismatch() {
        let err = JaggedTable::new(vec![0, 2], [("pt".to_string(), vec![1.0])]).unwrap_err();
        assert!(err.to_string().contains("length mismatch"));
    }

    #[test]
    fn jagged_rejects_bad_offsets() {
        assert!(JaggedTable::new(vec![1, 2], []).is_err());
        assert!(JaggedTable::new(vec![0, 3, 1], []).is_err());
    }

    #[test]
    fn batch_data_vs_mc() {
        let data = EventBatch::new("SingleMuon", 2, [], [], [], None).unwrap();
        assert!(data.is_data());

        let mc =
            EventBatch::new("TTJets", 2, [], [], [], Some(vec![1.0, -0.5])).unwrap();
        assert!(!mc.is_data());
        assert_eq!(mc.gen_weight().unwrap(), &[1.0, -0.5]);
    }

    #[test]
    fn batch_rejects_scalar_mismatch() {
        let err = EventBatch::new(
            "TTJets",
            3,
            [("MET_pt".to_string(), vec![1.0, 2.0])],
            [],
            [],
            None,
        )
        .unwrap_err();
        assert!(err.to_string().contains("MET_pt"));
    }

    #[test]
    fn missing_object_table_is_empty_not_error() {
        let b = EventBatch::new("TTJets", 2, [], [], [], None).unwrap();
        let t = b.objects("Tau");
        assert_eq!(t.n_events(), 2);
        assert_eq!(t.count(0), 0);
    }
}
