//! Named selection-mask registry.
//!
//! Boolean per-event masks are registered once under a name and are immutable
//! for the rest of the batch; composite selections are the logical AND of a
//! named subset. Referencing an unregistered name is a configuration error,
//! never a silent all-false mask.

use mt_core::{Error, Result};
use std::collections::BTreeMap;

/// Registry of named per-event boolean masks for one batch.
#[derive(Debug, Clone)]
pub struct SelectionSet {
    n_events: usize,
    masks: BTreeMap<String, Vec<bool>>,
}

impl SelectionSet {
    /// An empty registry for a batch of `n_events` events.
    pub fn new(n_events: usize) -> Self {
        Self { n_events, masks: BTreeMap::new() }
    }

    /// Register a mask. Re-registering a name or registering a mask of the
    /// wrong length is an error.
    pub fn add(&mut self, name: impl Into<String>, mask: Vec<bool>) -> Result<()> {
        let name = name.into();
        if mask.len() != self.n_events {
            return Err(Error::Validation(format!(
                "selection '{}' length mismatch: expected {}, got {}",
                name,
                self.n_events,
                mask.len()
            )));
        }
        if self.masks.contains_key(&name) {
            return Err(Error::Configuration(format!(
                "selection '{name}' is already registered"
            )));
        }
        self.masks.insert(name, mask);
        Ok(())
    }

    /// Whether a mask with this name is registered.
    pub fn contains(&self, name: &str) -> bool {
        self.masks.contains_key(name)
    }

    /// Registered mask names.
    pub fn names(&self) -> impl Iterator<Item = &str> {
        self.masks.keys().map(|s| s.as_str())
    }

    /// A single registered mask.
    pub fn get(&self, name: &str) -> Result<&[bool]> {
        self.masks
            .get(name)
            .map(|m| m.as_slice())
            .ok_or_else(|| Error::Configuration(format!("unknown selection '{name}'")))
    }

    /// Logical AND of the named masks.
    pub fn all<'a>(&self, names: impl IntoIterator<Item = &'a str>) -> Result<Vec<bool>> {
        let mut out = vec![true; self.n_events];
        for name in names {
            let mask = self.get(name)?;
            for (o, &m) in out.iter_mut().zip(mask) {
                *o &= m;
            }
        }
        Ok(out)
    }
}
