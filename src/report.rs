//! Attempt counter reporting
//!
//! Read-only views over the blocked-attempt and token-request stores, either
//! the kernel maps (via the loader) or the in-process stores used by
//! `inspect`. Reports never write back to a store.

use chrono::{DateTime, Utc};
use colored::Colorize;
use serde::{Deserialize, Serialize};
use std::fmt;
use std::net::Ipv4Addr;

use crate::counter_store::BoundedCounterStore;

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SourceCount {
    pub source: Ipv4Addr,
    pub count: u64,
}

/// Contents of one counter store.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct StoreReport {
    pub name: String,
    pub capacity: usize,
    /// Sorted by descending count, then ascending address.
    pub entries: Vec<SourceCount>,
    /// Sum of all counts.
    pub total: u64,
}

impl StoreReport {
    pub fn new<I>(name: &str, capacity: usize, entries: I) -> Self
    where
        I: IntoIterator<Item = (Ipv4Addr, u64)>,
    {
        let mut entries: Vec<SourceCount> = entries
            .into_iter()
            .map(|(source, count)| SourceCount { source, count })
            .collect();
        entries.sort_by(|a, b| b.count.cmp(&a.count).then(a.source.cmp(&b.source)));
        let total = entries.iter().map(|e| e.count).sum();

        Self {
            name: name.to_string(),
            capacity,
            entries,
            total,
        }
    }

    pub fn from_store(store: &BoundedCounterStore) -> Self {
        Self::new(store.name(), store.capacity(), store.snapshot())
    }

    pub fn distinct_sources(&self) -> usize {
        self.entries.len()
    }

    /// Once saturated, attempts from new sources are no longer counted.
    pub fn is_saturated(&self) -> bool {
        self.entries.len() >= self.capacity
    }

    pub fn count_for(&self, source: Ipv4Addr) -> Option<u64> {
        self.entries
            .iter()
            .find(|e| e.source == source)
            .map(|e| e.count)
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AttemptReport {
    pub generated_at: DateTime<Utc>,
    pub blocked: StoreReport,
    pub allowed: StoreReport,
}

impl AttemptReport {
    pub fn new(blocked: StoreReport, allowed: StoreReport) -> Self {
        Self {
            generated_at: Utc::now(),
            blocked,
            allowed,
        }
    }

    pub fn from_stores(blocked: &BoundedCounterStore, allowed: &BoundedCounterStore) -> Self {
        Self::new(
            StoreReport::from_store(blocked),
            StoreReport::from_store(allowed),
        )
    }

    pub fn to_json(&self) -> serde_json::Result<String> {
        serde_json::to_string_pretty(self)
    }

    /// Human-readable table for terminal output.
    pub fn render(&self) -> String {
        self.to_string()
    }
}

impl fmt::Display for AttemptReport {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let rule = "═══════════════════════════════════════════════════".bright_cyan();
        writeln!(f, "{}", rule)?;
        writeln!(
            f,
            "{}",
            "        Metadata Service Access Report".bright_cyan().bold()
        )?;
        writeln!(f, "{}", rule)?;
        writeln!(
            f,
            "  Generated: {}",
            self.generated_at.format("%Y-%m-%d %H:%M:%S UTC")
        )?;
        render_store(f, "Blocked attempts", &self.blocked, true)?;
        render_store(f, "Allowed token requests", &self.allowed, false)
    }
}

fn render_store(
    f: &mut fmt::Formatter<'_>,
    title: &str,
    store: &StoreReport,
    blocked: bool,
) -> fmt::Result {
    writeln!(f)?;
    let heading = format!(
        "{} ({} sources, {} total)",
        title,
        store.distinct_sources(),
        store.total
    );
    if blocked {
        writeln!(f, "{}", heading.bright_red().bold())?;
    } else {
        writeln!(f, "{}", heading.bright_green().bold())?;
    }

    if store.entries.is_empty() {
        writeln!(f, "  {}", "(none)".dimmed())?;
    }
    for entry in &store.entries {
        writeln!(f, "  {:<18} {:>12}", entry.source.to_string(), entry.count)?;
    }
    if store.is_saturated() {
        writeln!(
            f,
            "  {}",
            format!(
                "⚠ store full ({} entries): new sources are not counted",
                store.capacity
            )
            .yellow()
        )?;
    }
    Ok(())
}
