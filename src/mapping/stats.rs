//! # Mapping Statistics
//!
//! `Mapping::stats()` walks every row id once, collects the distinct payload
//! pages each layer references and asks each page for its utilization. The
//! result is plain data plus a `Display` rendering for logs and tooling:
//!
//! ```text
//! entries: 1200 live, 31 tombstoned, 0 released (max row id 1231)
//! layer 0: 14 pages, 1180 payloads, fill 71.2%, payload len n=1180 min=1 mean=3.4 max=40, ...
//! layer 1: ...
//! all layers: ...
//! trie: 9 pages, 1231 items (1231 bound, 31 deleted), fill 64.0%, 2 subtrees relocated
//! catalog: 1231 records of 24 bytes on 73 pages (10 free slots, 0 relocated)
//! ```

use std::fmt;

use crate::info::PageUsage;
use crate::records::RecordStats;
use crate::trie::TrieStats;
use crate::RowId;

/// Count, extremes and sum of a series of non-negative samples.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct Distribution {
    pub count: u64,
    pub min: u64,
    pub max: u64,
    pub total: u64,
}

impl Distribution {
    pub fn record(&mut self, value: u64) {
        if self.count == 0 {
            self.min = value;
            self.max = value;
        } else {
            self.min = self.min.min(value);
            self.max = self.max.max(value);
        }
        self.count += 1;
        self.total += value;
    }

    pub fn merge(&mut self, other: &Distribution) {
        if other.count == 0 {
            return;
        }
        if self.count == 0 {
            *self = *other;
            return;
        }
        self.min = self.min.min(other.min);
        self.max = self.max.max(other.max);
        self.count += other.count;
        self.total += other.total;
    }

    pub fn mean(&self) -> f64 {
        if self.count == 0 {
            0.0
        } else {
            self.total as f64 / self.count as f64
        }
    }
}

impl fmt::Display for Distribution {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "n={} min={} mean={:.1} max={}",
            self.count,
            self.min,
            self.mean(),
            self.max
        )
    }
}

/// Utilization of the payload pages of one layer, or of all layers.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct LayerStats {
    /// `None` for the totals over all layers.
    pub layer: Option<usize>,
    pub pages: u64,
    pub payload_lengths: Distribution,
    pub payloads_per_page: Distribution,
    fill_sum: f64,
}

impl LayerStats {
    pub fn new(layer: Option<usize>) -> Self {
        Self {
            layer,
            ..Self::default()
        }
    }

    pub(crate) fn add_page(&mut self, usage: &PageUsage) {
        self.pages += 1;
        self.fill_sum += usage.fill_factor;
        self.payloads_per_page.record(usage.entries as u64);
        for &len in &usage.payload_lengths {
            self.payload_lengths.record(len as u64);
        }
    }

    fn merge(&mut self, other: &LayerStats) {
        self.pages += other.pages;
        self.fill_sum += other.fill_sum;
        self.payload_lengths.merge(&other.payload_lengths);
        self.payloads_per_page.merge(&other.payloads_per_page);
    }

    pub fn payloads(&self) -> u64 {
        self.payload_lengths.count
    }

    pub fn items(&self) -> u64 {
        self.payload_lengths.total
    }

    /// Mean fill factor of the referenced pages.
    pub fn fill_factor(&self) -> f64 {
        if self.pages == 0 {
            0.0
        } else {
            self.fill_sum / self.pages as f64
        }
    }
}

impl fmt::Display for LayerStats {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self.layer {
            Some(layer) => write!(f, "layer {}: ", layer)?,
            None => write!(f, "all layers: ")?,
        }
        write!(
            f,
            "{} pages, {} payloads, {} items, fill {:.1}%, payload len {}, payloads/page {}",
            self.pages,
            self.payloads(),
            self.items(),
            self.fill_factor() * 100.0,
            self.payload_lengths,
            self.payloads_per_page
        )
    }
}

#[derive(Debug, Clone, PartialEq)]
pub struct MappingStats {
    pub max_row_id: RowId,
    pub live_entries: u64,
    pub tombstoned_entries: u64,
    /// Row ids whose record was released (rolled-back creations).
    pub released_entries: u64,
    pub layers: Vec<LayerStats>,
    pub overall: LayerStats,
    pub trie: TrieStats,
    pub records: RecordStats,
}

impl MappingStats {
    pub(crate) fn new(max_row_id: RowId, layer_count: usize) -> Self {
        Self {
            max_row_id,
            live_entries: 0,
            tombstoned_entries: 0,
            released_entries: 0,
            layers: (0..layer_count).map(|l| LayerStats::new(Some(l))).collect(),
            overall: LayerStats::new(None),
            trie: TrieStats::default(),
            records: RecordStats::default(),
        }
    }

    pub(crate) fn finish(&mut self, trie: TrieStats, records: RecordStats) {
        let mut overall = LayerStats::new(None);
        for layer in &self.layers {
            overall.merge(layer);
        }
        self.overall = overall;
        self.trie = trie;
        self.records = records;
    }
}

impl fmt::Display for MappingStats {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        writeln!(
            f,
            "entries: {} live, {} tombstoned, {} released (max row id {})",
            self.live_entries, self.tombstoned_entries, self.released_entries, self.max_row_id
        )?;
        for layer in &self.layers {
            writeln!(f, "{}", layer)?;
        }
        writeln!(f, "{}", self.overall)?;
        writeln!(f, "trie: {}", self.trie)?;
        write!(f, "catalog: {}", self.records)
    }
}
