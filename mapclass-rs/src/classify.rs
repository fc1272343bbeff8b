//! Mapping classes of one read's alignments.
//!
//! Every alignment of a read (or of one mate) is ranked against the others by
//! its error count: the lowest count marks the best matches, zero marks
//! perfect ones, and a read with a single alignment gets the unique variant.
//! The per-read summary is kept in a `ClassificationMap` for the pair stage.

use crate::record::AlignmentRecord;
use crate::types::{HashMap, HashMapExt};

/// Quality tier of one mapping relative to the other mappings of its read.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Tier {
    /// Minimum error count and no errors.
    Perfect,
    /// Minimum error count, at least one error.
    BestMatch,
    /// More errors than the best mapping of the read.
    Common,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
#[allow(clippy::enum_variant_names)]
pub enum MappingClass {
    PerfectMatch = 1,
    BestMatch = 2,
    CommonMatch = 3,
    SinglePerfectMatch = 4,
    SingleBestMatch = 5,
}

impl MappingClass {
    pub fn id(self) -> u8 {
        self as u8
    }

    pub fn from_id(id: u8) -> Option<Self> {
        match id {
            1 => Some(Self::PerfectMatch),
            2 => Some(Self::BestMatch),
            3 => Some(Self::CommonMatch),
            4 => Some(Self::SinglePerfectMatch),
            5 => Some(Self::SingleBestMatch),
            _ => None,
        }
    }

    pub fn tier(self) -> Tier {
        match self {
            Self::PerfectMatch | Self::SinglePerfectMatch => Tier::Perfect,
            Self::BestMatch | Self::SingleBestMatch => Tier::BestMatch,
            Self::CommonMatch => Tier::Common,
        }
    }

    pub fn is_unique(self) -> bool {
        matches!(self, Self::SinglePerfectMatch | Self::SingleBestMatch)
    }

    /// Class of a mapping with `errors` among `map_count` mappings whose best
    /// has `min_errors`.
    pub fn of(errors: u32, min_errors: u32, map_count: u32) -> Self {
        if errors > min_errors {
            return Self::CommonMatch;
        }
        match (errors == 0, map_count == 1) {
            (true, true) => Self::SinglePerfectMatch,
            (true, false) => Self::PerfectMatch,
            (false, true) => Self::SingleBestMatch,
            (false, false) => Self::BestMatch,
        }
    }
}

/// What is known about all mappings of one read (or one mate).
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Classification {
    pub min_mismatches: u32,
    pub map_count: u32,
}

impl Classification {
    pub fn is_perfect(&self) -> bool {
        self.min_mismatches == 0
    }

    pub fn is_unique(&self) -> bool {
        self.map_count == 1
    }

    /// Whether a mapping with `errors` is one of the read's best mappings.
    pub fn is_best(&self, errors: u32) -> bool {
        errors <= self.min_mismatches
    }
}

/// Read name (pair-tag suffixed for mates) -> classification.
#[derive(Debug, Default, Clone)]
pub struct ClassificationMap {
    entries: HashMap<String, Classification>,
}

impl ClassificationMap {
    pub fn new() -> Self {
        Self { entries: HashMap::new() }
    }

    pub fn get(&self, key: &str) -> Option<&Classification> {
        self.entries.get(key)
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    pub fn iter(&self) -> impl Iterator<Item = (&String, &Classification)> {
        self.entries.iter()
    }

    /// Record the mappings seen for `key`. An existing minimum is only ever
    /// lowered, never raised.
    pub fn update(&mut self, key: &str, min_mismatches: u32, map_count: u32) -> Classification {
        let entry = self
            .entries
            .entry(key.to_string())
            .or_insert(Classification { min_mismatches, map_count });
        entry.min_mismatches = entry.min_mismatches.min(min_mismatches);
        entry.map_count = map_count;
        *entry
    }
}

/// Classify every record of one read-name group.
///
/// Records must carry their error count. Mates are classified separately
/// (they have different classification keys). Sets `map_count` and
/// `classification` on each record and updates `map`.
pub fn classify_group(records: &mut [AlignmentRecord], map: &mut ClassificationMap) {
    let mut by_key: Vec<(String, Vec<usize>)> = Vec::new();
    for (idx, record) in records.iter().enumerate() {
        let key = record.classification_key();
        match by_key.iter_mut().find(|(k, _)| *k == key) {
            Some((_, indices)) => indices.push(idx),
            None => by_key.push((key, vec![idx])),
        }
    }

    for (key, indices) in by_key {
        let Some(min_errors) = indices.iter().filter_map(|&i| records[i].error_count).min() else {
            continue;
        };
        let map_count = indices.len() as u32;
        map.update(&key, min_errors, map_count);

        for i in indices {
            let record = &mut records[i];
            let errors = record.error_count.unwrap_or(u32::MAX);
            record.map_count = Some(map_count);
            record.classification = Some(MappingClass::of(errors, min_errors, map_count).id());
        }
    }
}
