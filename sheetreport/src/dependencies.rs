//! Template range to result range tracking
//!
//! One template range expands into zero, one or many result ranges: zero when
//! its band never rendered, many when the band repeats.

use crate::range::Range;
use std::collections::{BTreeMap, HashMap};

/// Multimap template range -> result ranges, with the reverse lookup
#[derive(Debug, Clone, Default)]
pub struct RangeDependencies {
    template_to_results: BTreeMap<Range, Vec<Range>>,
    result_to_template: HashMap<Range, Range>,
}

impl RangeDependencies {
    pub fn new() -> Self {
        Self::default()
    }

    /// Record that `template` was rendered into `result`
    pub fn add_dependency(&mut self, template: &Range, result: &Range) {
        self.template_to_results
            .entry(template.clone())
            .or_default()
            .push(result.clone());
        self.result_to_template
            .insert(result.clone(), template.clone());
    }

    /// Result ranges of a template range, in render order (empty if never rendered)
    pub fn results_for_template(&self, template: &Range) -> &[Range] {
        self.template_to_results
            .get(template)
            .map(|results| results.as_slice())
            .unwrap_or(&[])
    }

    /// Template range a result range was rendered from
    pub fn template_for_result(&self, result: &Range) -> Option<&Range> {
        self.result_to_template.get(result)
    }

    /// Every template range that rendered at least once
    pub fn templates(&self) -> impl Iterator<Item = &Range> {
        self.template_to_results.keys()
    }

    /// Every result range
    pub fn results(&self) -> impl Iterator<Item = &Range> {
        self.template_to_results.values().flatten()
    }

    /// Smallest range covering every expansion of `template`
    pub fn footprint(&self, template: &Range) -> Option<Range> {
        let results = self.results_for_template(template);
        let first = results.first()?;
        Some(results.iter().skip(1).fold(first.clone(), |acc, r| acc.union(r)))
    }

    pub fn is_empty(&self) -> bool {
        self.template_to_results.is_empty()
    }
}
