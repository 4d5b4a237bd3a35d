//! Derived statistics for managed services.
//!
//! Services that scrape a counter protocol usually want to expose a curated
//! set of names rather than the raw dump. A [`StatsTable`] declares each
//! exported name as a [`Metric`]: a pure function of the raw sample.
//!
//! ```
//! use minion_service::stats::{Metric, StatsTable, parse_pairs};
//!
//! let table = StatsTable::new()
//!     .with("objects", Metric::Identity)
//!     .with("read_err", Metric::sum([
//!         Metric::get("stat_read_errs_notfound"),
//!         Metric::get("stat_read_errs_other"),
//!     ]));
//!
//! let raw = parse_pairs("objects=10;stat_read_errs_notfound=2;stat_read_errs_other=3");
//! let stats = table.apply(&raw);
//! assert_eq!(stats["objects"], 10);
//! assert_eq!(stats["read_err"], 5);
//! ```

use std::collections::HashMap;

use crate::sdk::Params;

/// Raw integer counters, keyed by the name the source protocol uses.
pub type RawSample = HashMap<String, i64>;

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Metric {
    /// The raw counter with the same name as the exported metric.
    Identity,
    /// The raw counter with a different name.
    Get(String),
    /// Sum of other metrics.
    Sum(Vec<Metric>),
}

impl Metric {
    pub fn get(key: impl Into<String>) -> Self {
        Metric::Get(key.into())
    }

    pub fn sum(parts: impl IntoIterator<Item = Metric>) -> Self {
        Metric::Sum(parts.into_iter().collect())
    }

    /// Evaluate against `raw`. Missing counters read as zero.
    pub fn eval(&self, name: &str, raw: &RawSample) -> i64 {
        match self {
            Metric::Identity => raw.get(name).copied().unwrap_or(0),
            Metric::Get(key) => raw.get(key).copied().unwrap_or(0),
            Metric::Sum(parts) => parts.iter().map(|m| m.eval(name, raw)).sum(),
        }
    }
}

/// Declarative table of exported metric names.
#[derive(Debug, Clone, Default)]
pub struct StatsTable {
    entries: Vec<(String, Metric)>,
}

impl StatsTable {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with(mut self, name: impl Into<String>, metric: Metric) -> Self {
        self.entries.push((name.into(), metric));
        self
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    pub fn apply(&self, raw: &RawSample) -> Params {
        self.entries
            .iter()
            .map(|(name, metric)| (name.clone(), metric.eval(name, raw).into()))
            .collect()
    }
}

/// Parse a `key=value;key=value` counter dump.
///
/// Pairs without `=` or with a non-integer value are skipped.
pub fn parse_pairs(text: &str) -> RawSample {
    text.trim()
        .split(';')
        .filter_map(|pair| {
            let (key, value) = pair.split_once('=')?;
            let value = value.trim().parse::<i64>().ok()?;
            Some((key.trim().to_string(), value))
        })
        .collect()
}
