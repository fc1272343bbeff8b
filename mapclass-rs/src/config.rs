//! Settings for one track import and the insert-size window derived from them.

use crate::errors::{PipelineError, Result};
use std::path::PathBuf;

/// Expected relative orientation of the two mates of a pair.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum Orientation {
    /// `-> <-`: leftmost mate forward, rightmost mate reverse.
    #[default]
    Fr,
    /// `<- ->`: leftmost mate reverse, rightmost mate forward.
    Rf,
    /// `-> ->` or `<- <-`: both mates on the same strand.
    FfRr,
}

impl Orientation {
    /// Small-integer encoding shared with the import configuration surface.
    pub fn from_code(code: u8) -> Option<Self> {
        match code {
            1 => Some(Self::Fr),
            2 => Some(Self::Rf),
            3 => Some(Self::FfRr),
            _ => None,
        }
    }

    pub fn code(self) -> u8 {
        match self {
            Self::Fr => 1,
            Self::Rf => 2,
            Self::FfRr => 3,
        }
    }
}

impl std::str::FromStr for Orientation {
    type Err = String;

    fn from_str(s: &str) -> std::result::Result<Self, Self::Err> {
        match s.to_ascii_lowercase().as_str() {
            "fr" | "1" => Ok(Self::Fr),
            "rf" | "2" => Ok(Self::Rf),
            "ff" | "rr" | "ff/rr" | "3" => Ok(Self::FfRr),
            other => Err(format!("unknown orientation '{other}' (expected fr, rf or ff)")),
        }
    }
}

/// Accepted insert-size window `[min, max]`.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct InsertSizeWindow {
    pub min: i64,
    pub max: i64,
}

impl InsertSizeWindow {
    /// `dist ± dist / 100 * deviation` with integer division. The truncation
    /// happens before the multiplication, so 250 at 10% yields 20, not 25.
    pub fn new(distance: u32, deviation_percent: u32) -> Self {
        let distance = i64::from(distance);
        let delta = distance / 100 * i64::from(deviation_percent);
        Self { min: distance - delta, max: distance + delta }
    }

    pub fn contains(&self, distance: i64) -> bool {
        distance >= self.min && distance <= self.max
    }
}

#[derive(Debug, Clone)]
pub struct PipelineConfig {
    pub paired: bool,
    pub orientation: Orientation,
    /// Nominal insert size.
    pub distance: u32,
    /// Allowed deviation from `distance` in percent (1-100).
    pub deviation_percent: u32,
    /// Consumed by downstream SNP detection, not by this crate.
    pub min_varying_bases: u32,
    /// Consumed by downstream SNP detection, not by this crate.
    pub min_percentage: u32,
    /// Records held in memory per sort chunk before spilling to disk.
    pub sort_chunk_records: usize,
    pub temp_dir: Option<PathBuf>,
    /// Upper bound on records kept for a single read name.
    pub max_group_size: usize,
    /// Individual per-record error messages emitted before summarising.
    pub max_reported_errors: usize,
    /// Emit a progress event every this many records.
    pub progress_interval: u64,
    /// Reference window cached by the sequence fetcher.
    pub reference_window: usize,
    /// Records handed to the statistics accumulator per chunk.
    pub stats_chunk_records: usize,
    pub read_length_buckets: usize,
    /// Defaults to three times the maximum accepted insert size.
    pub insert_size_buckets: Option<usize>,
}

impl Default for PipelineConfig {
    fn default() -> Self {
        Self {
            paired: false,
            orientation: Orientation::Fr,
            distance: 300,
            deviation_percent: 10,
            min_varying_bases: 5,
            min_percentage: 90,
            sort_chunk_records: 500_000,
            temp_dir: None,
            max_group_size: 100_000,
            max_reported_errors: 100,
            progress_interval: 100_000,
            reference_window: 100_000,
            stats_chunk_records: 10_000,
            read_length_buckets: 400,
            insert_size_buckets: None,
        }
    }
}

impl PipelineConfig {
    pub fn insert_size_window(&self) -> InsertSizeWindow {
        InsertSizeWindow::new(self.distance, self.deviation_percent)
    }

    pub fn insert_size_bucket_count(&self) -> usize {
        self.insert_size_buckets.unwrap_or_else(|| {
            let max = self.insert_size_window().max.max(1) as usize;
            max.saturating_mul(3)
        })
    }

    pub fn validate(&self) -> Result<()> {
        if !(1..=100).contains(&self.deviation_percent) {
            let reason = format!("{} is not within 1-100", self.deviation_percent);
            return Err(invalid("deviation", reason));
        }
        if self.paired && self.distance == 0 {
            return Err(invalid("distance", "must be > 0 for paired data".to_string()));
        }
        if self.sort_chunk_records == 0 {
            return Err(invalid("sort-chunk-records", "must be >= 1".to_string()));
        }
        if self.max_group_size == 0 {
            return Err(invalid("max-group-size", "must be >= 1".to_string()));
        }
        if self.stats_chunk_records == 0 || self.read_length_buckets == 0 {
            return Err(invalid("buckets", "chunk and bucket sizes must be >= 1".to_string()));
        }
        Ok(())
    }
}

fn invalid(parameter: &str, reason: String) -> PipelineError {
    PipelineError::InvalidParameter { parameter: parameter.to_string(), reason }
}
