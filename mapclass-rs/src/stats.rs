//! Streaming track statistics over a coordinate-sorted BAM.
//!
//! Records arrive in bounded chunks. Coverage intervals that are still open
//! when a chunk ends are parked as temp intervals and picked up again by the
//! next chunk, so an interval spanning a chunk boundary is never split.

use crate::bam_io::{BamInput, is_truncation};
use crate::classify::MappingClass;
use crate::config::PipelineConfig;
use crate::errors::{PipelineError, Result};
use crate::events::CancellationFlag;
use crate::pairs::PairStatistics;
use crate::record::{AlignmentRecord, read_span};
use crate::types::{HashSet, HashSetExt};
use noodles::sam::alignment::RecordBuf;
use std::path::Path;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum StrandMode {
    Forward,
    Reverse,
    Both,
}

impl StrandMode {
    pub const ALL: [StrandMode; 3] = [StrandMode::Forward, StrandMode::Reverse, StrandMode::Both];

    fn accepts(self, is_reverse: bool) -> bool {
        match self {
            StrandMode::Forward => !is_reverse,
            StrandMode::Reverse => is_reverse,
            StrandMode::Both => true,
        }
    }

    fn index(self) -> usize {
        self as usize
    }
}

/// Contiguous covered run `[start, stop]` (1-based, inclusive).
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CoverageInterval {
    pub chromosome: String,
    pub start: usize,
    pub stop: usize,
    /// Sum of bases covered by the records merged into this interval.
    pub coverage: u64,
}

impl CoverageInterval {
    pub fn len(&self) -> usize {
        self.stop + 1 - self.start
    }

    pub fn is_empty(&self) -> bool {
        self.stop < self.start
    }

    pub fn mean_coverage(&self) -> f64 {
        self.coverage as f64 / self.len() as f64
    }
}

#[derive(Debug, Default)]
struct CoverageTracker {
    open: Option<CoverageInterval>,
    temp: Option<CoverageInterval>,
    sealed: Vec<CoverageInterval>,
}

impl CoverageTracker {
    fn add(&mut self, chromosome: &str, start: usize, stop: usize) {
        let covered = (stop + 1 - start) as u64;
        let current = self.open.take().or_else(|| self.temp.take());
        match current {
            Some(mut interval)
                if interval.chromosome == chromosome && start <= interval.stop + 1 =>
            {
                interval.stop = interval.stop.max(stop);
                interval.coverage += covered;
                self.open = Some(interval);
            }
            other => {
                self.sealed.extend(other);
                self.open = Some(CoverageInterval {
                    chromosome: chromosome.to_string(),
                    start,
                    stop,
                    coverage: covered,
                });
            }
        }
    }

    fn end_chunk(&mut self) {
        if let Some(open) = self.open.take() {
            self.temp = Some(open);
        }
    }

    fn finish(mut self) -> Vec<CoverageInterval> {
        self.sealed.extend(self.temp.take());
        self.sealed.extend(self.open.take());
        self.sealed
    }
}

/// Histogram over `0..buckets`; larger values land in the last bucket.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DiscreteCountingDistribution {
    counts: Vec<u64>,
}

impl DiscreteCountingDistribution {
    pub fn new(buckets: usize) -> Self {
        Self { counts: vec![0; buckets.max(1)] }
    }

    pub fn add(&mut self, value: usize) {
        let last = self.counts.len() - 1;
        self.counts[value.min(last)] += 1;
    }

    pub fn get(&self, bucket: usize) -> u64 {
        self.counts.get(bucket).copied().unwrap_or(0)
    }

    pub fn buckets(&self) -> usize {
        self.counts.len()
    }

    pub fn counts(&self) -> &[u64] {
        &self.counts
    }

    pub fn total(&self) -> u64 {
        self.counts.iter().sum()
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum MappingCounter {
    Perfect,
    Best,
    Common,
    UniquePerfect,
    UniqueBest,
    Unique,
}

/// Counters incremented for one mapping of class `class`. A perfect mapping
/// is also a best and a common mapping; a best mapping is also common.
pub fn counters_for(class: MappingClass) -> &'static [MappingCounter] {
    use MappingCounter::*;
    match class {
        MappingClass::PerfectMatch => &[Perfect, Best, Common],
        MappingClass::BestMatch => &[Best, Common],
        MappingClass::CommonMatch => &[Common],
        MappingClass::SinglePerfectMatch => {
            &[Perfect, Best, Common, UniquePerfect, UniqueBest, Unique]
        }
        MappingClass::SingleBestMatch => &[Best, Common, UniqueBest, Unique],
    }
}

#[derive(Debug, Default, Clone, Copy, PartialEq, Eq)]
pub struct MappingCounts {
    pub total: u64,
    pub perfect: u64,
    pub best: u64,
    pub common: u64,
    pub unique_perfect: u64,
    pub unique_best: u64,
    pub unique: u64,
    /// Mappings without a classification tag.
    pub unclassified: u64,
}

impl MappingCounts {
    fn count(&mut self, class: Option<MappingClass>) {
        self.total += 1;
        let Some(class) = class else {
            self.unclassified += 1;
            return;
        };
        for counter in counters_for(class) {
            let slot = match counter {
                MappingCounter::Perfect => &mut self.perfect,
                MappingCounter::Best => &mut self.best,
                MappingCounter::Common => &mut self.common,
                MappingCounter::UniquePerfect => &mut self.unique_perfect,
                MappingCounter::UniqueBest => &mut self.unique_best,
                MappingCounter::Unique => &mut self.unique,
            };
            *slot += 1;
        }
    }
}

#[derive(Debug, Clone, PartialEq)]
pub struct CoverageIntervals {
    pub forward: Vec<CoverageInterval>,
    pub reverse: Vec<CoverageInterval>,
    pub both: Vec<CoverageInterval>,
}

impl CoverageIntervals {
    pub fn get(&self, mode: StrandMode) -> &[CoverageInterval] {
        match mode {
            StrandMode::Forward => &self.forward,
            StrandMode::Reverse => &self.reverse,
            StrandMode::Both => &self.both,
        }
    }
}

#[derive(Debug, Clone)]
pub struct TrackStatistics {
    pub coverage: CoverageIntervals,
    pub mappings: MappingCounts,
    /// Distinct reads (mates counted separately).
    pub total_reads: u64,
    pub read_lengths: DiscreteCountingDistribution,
    /// Present for paired tracks.
    pub pairs: Option<PairStatistics>,
}

pub struct StatsAccumulator {
    trackers: [CoverageTracker; 3],
    mappings: MappingCounts,
    reads_seen: HashSet<String>,
    read_lengths: DiscreteCountingDistribution,
}

impl StatsAccumulator {
    pub fn new(read_length_buckets: usize) -> Self {
        Self {
            trackers: Default::default(),
            mappings: MappingCounts::default(),
            reads_seen: HashSet::new(),
            read_lengths: DiscreteCountingDistribution::new(read_length_buckets),
        }
    }

    /// Consume one chunk of coordinate-sorted records.
    pub fn process_chunk(&mut self, records: &[AlignmentRecord]) {
        for record in records.iter().filter(|r| r.is_mapped()) {
            let reverse = record.is_reverse();
            for mode in StrandMode::ALL {
                if mode.accepts(reverse) {
                    let tracker = &mut self.trackers[mode.index()];
                    tracker.add(&record.reference_name, record.start, record.stop);
                }
            }

            self.mappings.count(record.classification.and_then(MappingClass::from_id));
            self.reads_seen.insert(record.classification_key());

            let length = if record.sequence.is_empty() {
                read_span(&record.cigar)
            } else {
                record.sequence.len()
            };
            self.read_lengths.add(length);
        }

        for tracker in &mut self.trackers {
            tracker.end_chunk();
        }
    }

    pub fn finish_analysis(self) -> TrackStatistics {
        let [forward, reverse, both] = self.trackers;
        TrackStatistics {
            coverage: CoverageIntervals {
                forward: forward.finish(),
                reverse: reverse.finish(),
                both: both.finish(),
            },
            mappings: self.mappings,
            total_reads: self.reads_seen.len() as u64,
            read_lengths: self.read_lengths,
            pairs: None,
        }
    }
}

/// Run the statistics pass over a coordinate-sorted BAM in chunks of
/// `config.stats_chunk_records`.
pub fn collect_statistics(
    path: &Path,
    config: &PipelineConfig,
    cancel: &CancellationFlag,
) -> Result<TrackStatistics> {
    let mut bam = BamInput::open(path)?;
    let mut accumulator = StatsAccumulator::new(config.read_length_buckets);
    let mut chunk: Vec<AlignmentRecord> = Vec::with_capacity(config.stats_chunk_records);
    let mut buf = RecordBuf::default();
    let mut records = 0u64;

    loop {
        if cancel.is_cancelled() {
            return Err(PipelineError::Cancelled { records });
        }
        match bam.read_next(&mut buf) {
            Ok(true) => {}
            Ok(false) => break,
            Err(e) if is_truncation(&e) => {
                tracing::warn!(records, "truncated record ends statistics pass: {e}");
                break;
            }
            Err(e) => return Err(e.into()),
        }
        records += 1;
        chunk.push(AlignmentRecord::from_record_buf(&buf, &bam.header));
        if chunk.len() >= config.stats_chunk_records {
            accumulator.process_chunk(&chunk);
            chunk.clear();
        }
    }
    if !chunk.is_empty() {
        accumulator.process_chunk(&chunk);
    }

    let stats = accumulator.finish_analysis();
    tracing::info!(
        records,
        reads = stats.total_reads,
        intervals = stats.coverage.both.len(),
        "statistics complete"
    );
    Ok(stats)
}
