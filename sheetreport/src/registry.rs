//! Band <-> range registry
//!
//! Two one-directional maps kept in sync: band -> template range and
//! band <-> result range. A result range belongs to exactly one band.

use crate::band::BandId;
use crate::range::Range;
use std::collections::HashMap;

#[derive(Debug, Clone, Default)]
pub struct BandsForRanges {
    templates: HashMap<BandId, Range>,
    results: HashMap<BandId, Range>,
    bands_by_result: HashMap<Range, BandId>,
}

impl BandsForRanges {
    pub fn new() -> Self {
        Self::default()
    }

    /// Register the ranges a band was rendered from and into.
    ///
    /// Re-registering a band replaces its previous result; a result range
    /// already owned by another band is handed over to `band`.
    pub fn add(&mut self, band: BandId, template: &Range, result: &Range) {
        if let Some(previous) = self.results.insert(band, result.clone()) {
            self.bands_by_result.remove(&previous);
        }
        if let Some(owner) = self.bands_by_result.insert(result.clone(), band)
            && owner != band
        {
            self.results.remove(&owner);
        }
        self.templates.insert(band, template.clone());
    }

    pub fn template_for_band(&self, band: BandId) -> Option<&Range> {
        self.templates.get(&band)
    }

    pub fn result_for_band(&self, band: BandId) -> Option<&Range> {
        self.results.get(&band)
    }

    pub fn band_for_result(&self, result: &Range) -> Option<BandId> {
        self.bands_by_result.get(result).copied()
    }

    pub fn contains(&self, band: BandId) -> bool {
        self.results.contains_key(&band)
    }
}
