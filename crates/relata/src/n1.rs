//! Lazy-load (N+1) detection.
//!
//! Reading a relation that was not eager-loaded issues one query per model.
//! Doing that in a loop over a result set is the N+1 pattern: N relation
//! queries where one eager load (`Query::with`) would have done. The tracker
//! counts lazy loads per `(model type, relation)` and warns once a pair
//! reaches the threshold.
//!
//! ```ignore
//! // Warns after the third iteration:
//! for person in &people {
//!     person.related("team")?;
//! }
//!
//! // One extra query for the whole batch:
//! let people = Person::query().with("team").execute()?;
//! ```

use std::collections::HashMap;
use std::panic::Location;
use std::time::Instant;

/// Default number of lazy loads of one relation before warning.
pub const DEFAULT_THRESHOLD: usize = 3;

/// Counts lazy relation loads.
#[derive(Debug)]
pub struct LazyLoadTracker {
    /// (model type, relation) -> loads
    counts: HashMap<(String, String), usize>,
    threshold: usize,
    enabled: bool,
    call_sites: Vec<CallSite>,
}

impl Default for LazyLoadTracker {
    fn default() -> Self {
        Self::new()
    }
}

/// Where a lazy load was triggered.
#[derive(Debug, Clone)]
pub struct CallSite {
    pub model: String,
    pub relation: String,
    pub file: &'static str,
    pub line: u32,
    pub timestamp: Instant,
}

/// Summary of recorded lazy loads.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct LazyLoadStats {
    pub total_loads: usize,
    /// Distinct (model type, relation) pairs loaded lazily.
    pub relations_loaded: usize,
    /// Pairs at or above the threshold.
    pub potential_n1: usize,
}

impl LazyLoadTracker {
    pub fn new() -> Self {
        Self {
            counts: HashMap::new(),
            threshold: DEFAULT_THRESHOLD,
            enabled: true,
            call_sites: Vec::new(),
        }
    }

    pub fn with_threshold(mut self, threshold: usize) -> Self {
        self.threshold = threshold;
        self
    }

    pub fn set_threshold(&mut self, threshold: usize) {
        self.threshold = threshold;
    }

    pub fn threshold(&self) -> usize {
        self.threshold
    }

    pub fn is_enabled(&self) -> bool {
        self.enabled
    }

    pub fn disable(&mut self) {
        self.enabled = false;
    }

    pub fn enable(&mut self) {
        self.enabled = true;
    }

    /// Records one lazy load triggered at `caller`.
    pub fn record_load(&mut self, model: &str, relation: &str, caller: &'static Location<'static>) {
        if !self.enabled {
            return;
        }

        let count = self
            .counts
            .entry((model.to_string(), relation.to_string()))
            .or_insert(0);
        *count += 1;
        let count = *count;

        self.call_sites.push(CallSite {
            model: model.to_string(),
            relation: relation.to_string(),
            file: caller.file(),
            line: caller.line(),
            timestamp: Instant::now(),
        });

        if count == self.threshold {
            self.emit_warning(model, relation, count);
        }
    }

    fn emit_warning(&self, model: &str, relation: &str, count: usize) {
        tracing::warn!(
            target: "relata::n1",
            model = model,
            relation = relation,
            queries = count,
            threshold = self.threshold,
            "N+1 query pattern detected; eager-load the relation with Query::with()"
        );

        let sites = self
            .call_sites
            .iter()
            .filter(|s| s.model == model && s.relation == relation)
            .take(5);
        for (i, site) in sites.enumerate() {
            tracing::debug!(
                target: "relata::n1",
                index = i,
                file = site.file,
                line = site.line,
                "  [{}] {}:{}",
                i,
                site.file,
                site.line
            );
        }
    }

    /// Clears counts and call sites, e.g. at the start of a request.
    pub fn reset(&mut self) {
        self.counts.clear();
        self.call_sites.clear();
    }

    pub fn count_for(&self, model: &str, relation: &str) -> usize {
        self.counts
            .get(&(model.to_string(), relation.to_string()))
            .copied()
            .unwrap_or(0)
    }

    pub fn stats(&self) -> LazyLoadStats {
        LazyLoadStats {
            total_loads: self.counts.values().sum(),
            relations_loaded: self.counts.len(),
            potential_n1: self
                .counts
                .values()
                .filter(|&&c| c >= self.threshold)
                .count(),
        }
    }

    pub fn call_sites(&self) -> &[CallSite] {
        &self.call_sites
    }
}
