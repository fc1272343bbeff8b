//! Read-pair reconciliation.
//!
//! Each read-name group of a classified, paired track is split into its
//! mate1 and mate2 records. A group with one record per side is typed
//! directly. Otherwise every mate1 x mate2 candidate on a shared reference
//! is typed and bucketed, and the buckets are flushed in a fixed priority
//! order; a record is claimed by at most one pairing. Whatever is left is
//! written as an unpaired single.

use crate::bam_io::{BamInput, is_truncation, write_index};
use crate::classify::ClassificationMap;
use crate::config::{InsertSizeWindow, Orientation, PipelineConfig};
use crate::diff::record_error_count;
use crate::errors::{PipelineError, RecordError, Result};
use crate::events::{CancellationFlag, ErrorLimiter, EventSink, PipelineEvent};
use crate::pipeline::scratch_dir;
use crate::record::{AlignmentRecord, PairTag};
use crate::reference::{ReferenceSource, SequenceFetcher};
use crate::sort::{ExternalSorter, SortOrder, SortingWriter};
use crate::stats::DiscreteCountingDistribution;
use crate::types::PairId;
use noodles::sam::alignment::RecordBuf;
use noodles::sam::alignment::record::Flags;
use std::path::{Path, PathBuf};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub enum PairType {
    Perfect = 1,
    DistSmall = 2,
    DistLarge = 3,
    OrientWrong = 4,
    OrDistSmall = 5,
    OrDistLarge = 6,
    PerfectUnq = 7,
    DistSmallUnq = 8,
    DistLargeUnq = 9,
    OrientWrongUnq = 10,
    OrDistSmallUnq = 11,
    OrDistLargeUnq = 12,
    Unpaired = 13,
}

impl PairType {
    pub const ALL: [PairType; 13] = [
        PairType::Perfect,
        PairType::DistSmall,
        PairType::DistLarge,
        PairType::OrientWrong,
        PairType::OrDistSmall,
        PairType::OrDistLarge,
        PairType::PerfectUnq,
        PairType::DistSmallUnq,
        PairType::DistLargeUnq,
        PairType::OrientWrongUnq,
        PairType::OrDistSmallUnq,
        PairType::OrDistLargeUnq,
        PairType::Unpaired,
    ];

    pub fn id(self) -> u8 {
        self as u8
    }

    pub fn from_id(id: u8) -> Option<Self> {
        Self::ALL.get(usize::from(id).checked_sub(1)?).copied()
    }

    /// Variant used when both mates map exactly once.
    pub fn unq_variant(self) -> Self {
        match self {
            PairType::Perfect => PairType::PerfectUnq,
            PairType::DistSmall => PairType::DistSmallUnq,
            PairType::DistLarge => PairType::DistLargeUnq,
            PairType::OrientWrong => PairType::OrientWrongUnq,
            PairType::OrDistSmall => PairType::OrDistSmallUnq,
            PairType::OrDistLarge => PairType::OrDistLargeUnq,
            other => other,
        }
    }

    /// Pairs that get the proper-pair flag.
    pub fn is_proper(self) -> bool {
        matches!(self, PairType::Perfect | PairType::PerfectUnq)
    }
}

/// Fragment length covered by two mates on the same reference.
pub fn pair_distance(a: &AlignmentRecord, b: &AlignmentRecord) -> i64 {
    let start = a.start.min(b.start) as i64;
    let stop = a.stop.max(b.stop) as i64;
    stop - start + 1
}

fn orientation_matches(
    orientation: Orientation,
    mate1: &AlignmentRecord,
    mate2: &AlignmentRecord,
) -> bool {
    let (left, right) = if mate1.start <= mate2.start { (mate1, mate2) } else { (mate2, mate1) };
    let same_start = mate1.start == mate2.start;
    match orientation {
        Orientation::Fr if same_start => left.is_reverse() != right.is_reverse(),
        Orientation::Fr => !left.is_reverse() && right.is_reverse(),
        Orientation::Rf if same_start => left.is_reverse() != right.is_reverse(),
        Orientation::Rf => left.is_reverse() && !right.is_reverse(),
        Orientation::FfRr => left.is_reverse() == right.is_reverse(),
    }
}

/// Type of a candidate pair on one reference, before the unique upgrade.
pub fn classify_pair(
    orientation: Orientation,
    window: &InsertSizeWindow,
    mate1: &AlignmentRecord,
    mate2: &AlignmentRecord,
) -> (PairType, i64) {
    let distance = pair_distance(mate1, mate2);
    let oriented = orientation_matches(orientation, mate1, mate2);
    let pair_type = match (oriented, distance < window.min, distance > window.max) {
        (true, true, _) => PairType::DistSmall,
        (true, _, true) => PairType::DistLarge,
        (true, false, false) => PairType::Perfect,
        (false, true, _) => PairType::OrDistSmall,
        (false, _, true) => PairType::OrDistLarge,
        (false, false, false) => PairType::OrientWrong,
    };
    (pair_type, distance)
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PairStatistics {
    counts: [u64; 13],
    pub insert_sizes: DiscreteCountingDistribution,
}

impl PairStatistics {
    pub fn new(insert_size_buckets: usize) -> Self {
        Self {
            counts: [0; 13],
            insert_sizes: DiscreteCountingDistribution::new(insert_size_buckets),
        }
    }

    pub fn count(&self, pair_type: PairType) -> u64 {
        self.counts[usize::from(pair_type.id()) - 1]
    }

    /// Emitted pairings, excluding unpaired singles.
    pub fn pairs(&self) -> u64 {
        PairType::ALL.iter().filter(|t| **t != PairType::Unpaired).map(|t| self.count(*t)).sum()
    }

    fn record_pair(&mut self, pair_type: PairType, distance: i64) {
        self.counts[usize::from(pair_type.id()) - 1] += 1;
        self.insert_sizes.add(distance.max(0) as usize);
    }

    fn record_single(&mut self) {
        self.counts[usize::from(PairType::Unpaired.id()) - 1] += 1;
    }
}

#[derive(Debug, Clone, Copy)]
struct Candidate {
    mate1: usize,
    mate2: usize,
    pair_type: PairType,
    distance: i64,
}

/// Candidate list that only accepts a candidate longer than every one
/// accepted before it. Shorter earlier candidates are kept.
#[derive(Debug, Default)]
struct SmallDistanceBucket {
    pairs: Vec<Candidate>,
    max_distance: i64,
}

impl SmallDistanceBucket {
    fn offer(&mut self, candidate: Candidate) {
        if candidate.distance > self.max_distance {
            self.max_distance = candidate.distance;
            self.pairs.push(candidate);
        }
    }
}

#[derive(Debug, Default)]
struct CandidateBuckets {
    pot_small_best: SmallDistanceBucket,
    unor_best: Vec<Candidate>,
    unor_small_best: SmallDistanceBucket,
    perfect_potential: Vec<Candidate>,
    pot_pot_small: SmallDistanceBucket,
    pot_unor_small: SmallDistanceBucket,
}

/// Pairs up the records of one read-name group at a time.
pub struct PairResolver<'m> {
    orientation: Orientation,
    window: InsertSizeWindow,
    map: &'m ClassificationMap,
    next_pair_id: PairId,
    stats: PairStatistics,
}

impl<'m> PairResolver<'m> {
    pub fn new(config: &PipelineConfig, map: &'m ClassificationMap) -> Self {
        Self {
            orientation: config.orientation,
            window: config.insert_size_window(),
            map,
            next_pair_id: 1,
            stats: PairStatistics::new(config.insert_size_bucket_count()),
        }
    }

    pub fn stats(&self) -> &PairStatistics {
        &self.stats
    }

    pub fn into_stats(self) -> PairStatistics {
        self.stats
    }

    fn next_id(&mut self) -> PairId {
        let id = self.next_pair_id;
        self.next_pair_id += 1;
        id
    }

    fn is_unique(&self, record: &AlignmentRecord) -> bool {
        self.map.get(&record.classification_key()).is_some_and(|c| c.is_unique())
    }

    /// Annotate every record of `group` and return them all.
    ///
    /// `error_count` supplies the current error count of a record for the
    /// combinatorial path; candidates it fails for, or whose classification
    /// is missing, are skipped and described in `problems`.
    pub fn resolve<F>(
        &mut self,
        group: Vec<AlignmentRecord>,
        mut error_count: F,
        problems: &mut Vec<String>,
    ) -> Vec<AlignmentRecord>
    where
        F: FnMut(&AlignmentRecord) -> std::result::Result<u32, RecordError>,
    {
        let mut mate1 = Vec::new();
        let mut mate2 = Vec::new();
        let mut untagged = Vec::new();
        for mut record in group {
            record.clear_pairing();
            match record.pair_tag() {
                Some(PairTag::First) => mate1.push(record),
                Some(PairTag::Second) => mate2.push(record),
                None => untagged.push(record),
            }
        }

        for record in &mut untagged {
            self.emit_single(record, None);
        }

        if mate1.is_empty() || mate2.is_empty() {
            for record in mate1.iter_mut().chain(mate2.iter_mut()) {
                self.emit_single(record, None);
            }
        } else if mate1.len() == 1 && mate2.len() == 1 {
            self.resolve_single_pair(&mut mate1[0], &mut mate2[0]);
        } else {
            self.resolve_combinations(&mut mate1, &mut mate2, &mut error_count, problems);
        }

        mate1.into_iter().chain(mate2).chain(untagged).collect()
    }

    fn resolve_single_pair(&mut self, mate1: &mut AlignmentRecord, mate2: &mut AlignmentRecord) {
        if mate1.reference_id != mate2.reference_id {
            let anchor1 = Anchor::of(mate1);
            let anchor2 = Anchor::of(mate2);
            self.emit_single(mate1, Some(anchor2));
            self.emit_single(mate2, Some(anchor1));
            return;
        }
        let (mut pair_type, distance) = classify_pair(self.orientation, &self.window, mate1, mate2);
        if self.is_unique(mate1) && self.is_unique(mate2) {
            pair_type = pair_type.unq_variant();
        }
        self.emit_pair(mate1, mate2, pair_type, distance);
    }

    fn resolve_combinations<F>(
        &mut self,
        mate1: &mut [AlignmentRecord],
        mate2: &mut [AlignmentRecord],
        error_count: &mut F,
        problems: &mut Vec<String>,
    ) where
        F: FnMut(&AlignmentRecord) -> std::result::Result<u32, RecordError>,
    {
        let mut used1 = vec![false; mate1.len()];
        let mut used2 = vec![false; mate2.len()];
        let mut buckets = CandidateBuckets::default();

        let errors1 = collect_errors(mate1, error_count, problems);
        let errors2 = collect_errors(mate2, error_count, problems);

        for i in 0..mate1.len() {
            for j in 0..mate2.len() {
                if used1[i] || used2[j] || mate1[i].reference_id != mate2[j].reference_id {
                    continue;
                }
                let (Some(e1), Some(e2)) = (errors1[i], errors2[j]) else {
                    continue;
                };
                let key1 = mate1[i].classification_key();
                let key2 = mate2[j].classification_key();
                let (Some(c1), Some(c2)) = (self.map.get(&key1), self.map.get(&key2)) else {
                    problems.push(format!(
                        "No classification for candidate pair {key1} / {key2}, skipping"
                    ));
                    continue;
                };

                let (mut pair_type, distance) =
                    classify_pair(self.orientation, &self.window, &mate1[i], &mate2[j]);
                if c1.is_unique() && c2.is_unique() {
                    pair_type = pair_type.unq_variant();
                }
                let best = c1.is_best(e1) && c2.is_best(e2);
                let candidate = Candidate { mate1: i, mate2: j, pair_type, distance };

                use PairType::*;
                match (best, pair_type) {
                    (true, Perfect | PerfectUnq) => {
                        used1[i] = true;
                        used2[j] = true;
                        self.emit_pair(&mut mate1[i], &mut mate2[j], pair_type, distance);
                    }
                    (true, DistSmall | DistSmallUnq) => buckets.pot_small_best.offer(candidate),
                    (true, OrientWrong | OrientWrongUnq) => buckets.unor_best.push(candidate),
                    (true, OrDistSmall | OrDistSmallUnq) => buckets.unor_small_best.offer(candidate),
                    (false, Perfect | PerfectUnq) => buckets.perfect_potential.push(candidate),
                    (false, DistSmall | DistSmallUnq) => buckets.pot_pot_small.offer(candidate),
                    (false, OrDistSmall | OrDistSmallUnq) => buckets.pot_unor_small.offer(candidate),
                    // long pairs and wrongly oriented potential pairs are never chosen
                    _ => {}
                }
            }
        }

        let ordered = [
            buckets.pot_small_best.pairs,
            buckets.unor_best,
            buckets.unor_small_best.pairs,
            buckets.perfect_potential,
            buckets.pot_pot_small.pairs,
            buckets.pot_unor_small.pairs,
        ];
        for candidate in ordered.iter().flatten() {
            let (i, j) = (candidate.mate1, candidate.mate2);
            if used1[i] || used2[j] {
                continue;
            }
            used1[i] = true;
            used2[j] = true;
            self.emit_pair(&mut mate1[i], &mut mate2[j], candidate.pair_type, candidate.distance);
        }

        let anchor1 = Anchor::of(&mate1[0]);
        let anchor2 = Anchor::of(&mate2[0]);
        for (record, _) in mate1.iter_mut().zip(&used1).filter(|(_, used)| !**used) {
            self.emit_single(record, Some(anchor2));
        }
        for (record, _) in mate2.iter_mut().zip(&used2).filter(|(_, used)| !**used) {
            self.emit_single(record, Some(anchor1));
        }
    }

    fn emit_pair(
        &mut self,
        a: &mut AlignmentRecord,
        b: &mut AlignmentRecord,
        pair_type: PairType,
        distance: i64,
    ) {
        let id = self.next_id();
        let tlen = i32::try_from(distance).unwrap_or(i32::MAX);
        let a_leftmost = a.start <= b.start;
        let (a_anchor, b_anchor) = (Anchor::of(a), Anchor::of(b));
        link_mate(a, b_anchor, pair_type, id, if a_leftmost { tlen } else { -tlen });
        link_mate(b, a_anchor, pair_type, id, if a_leftmost { -tlen } else { tlen });
        self.stats.record_pair(pair_type, distance);
    }

    fn emit_single(&mut self, record: &mut AlignmentRecord, mate: Option<Anchor>) {
        let id = self.next_id();
        record.pair_type = Some(PairType::Unpaired.id());
        record.pair_id = Some(id);
        if let Some(mate) = mate {
            record.mate_reference_id = mate.reference_id;
            record.mate_start = Some(mate.start);
        }
        self.stats.record_single();
    }
}

/// Position of a mate that another record is linked to.
#[derive(Debug, Clone, Copy)]
struct Anchor {
    reference_id: Option<usize>,
    start: usize,
    is_reverse: bool,
}

impl Anchor {
    fn of(record: &AlignmentRecord) -> Self {
        Self {
            reference_id: record.reference_id,
            start: record.start,
            is_reverse: record.is_reverse(),
        }
    }
}

fn link_mate(
    record: &mut AlignmentRecord,
    mate: Anchor,
    pair_type: PairType,
    id: PairId,
    tlen: i32,
) {
    record.pair_type = Some(pair_type.id());
    record.pair_id = Some(id);
    record.mate_reference_id = mate.reference_id;
    record.mate_start = Some(mate.start);
    record.template_length = tlen;
    record.flags.insert(Flags::SEGMENTED);
    record.flags.remove(Flags::MATE_UNMAPPED);
    record.flags.set(Flags::MATE_REVERSE_COMPLEMENTED, mate.is_reverse);
    record.flags.set(Flags::PROPERLY_SEGMENTED, pair_type.is_proper());
}

fn collect_errors<F>(
    records: &[AlignmentRecord],
    error_count: &mut F,
    problems: &mut Vec<String>,
) -> Vec<Option<u32>>
where
    F: FnMut(&AlignmentRecord) -> std::result::Result<u32, RecordError>,
{
    records
        .iter()
        .map(|record| match error_count(record) {
            Ok(errors) => Some(errors),
            Err(e) => {
                problems.push(format!("Skipping pair candidates of {}: {e}", record.name));
                None
            }
        })
        .collect()
}

#[derive(Debug, Clone)]
pub struct ReconcileOutcome {
    pub stats: PairStatistics,
    pub groups: u64,
    pub records_written: u64,
    pub index: PathBuf,
}

/// Pairs the mates of a classified track and writes the annotated,
/// coordinate-sorted, indexed result.
pub struct ReadPairReconciler<'a, S> {
    config: &'a PipelineConfig,
    fetcher: &'a mut SequenceFetcher<S>,
    sink: &'a mut dyn EventSink,
    cancel: CancellationFlag,
    limiter: ErrorLimiter,
}

impl<'a, S: ReferenceSource> ReadPairReconciler<'a, S> {
    pub fn new(
        config: &'a PipelineConfig,
        fetcher: &'a mut SequenceFetcher<S>,
        sink: &'a mut dyn EventSink,
    ) -> Self {
        Self {
            config,
            fetcher,
            sink,
            cancel: CancellationFlag::new(),
            limiter: ErrorLimiter::new(config.max_reported_errors),
        }
    }

    #[must_use]
    pub fn with_cancellation(mut self, cancel: CancellationFlag) -> Self {
        self.cancel = cancel;
        self
    }

    pub fn run(
        &mut self,
        input: &Path,
        output: &Path,
        map: &ClassificationMap,
    ) -> Result<ReconcileOutcome> {
        let result = self.reconcile(input, output, map);
        self.limiter.finish(&mut *self.sink);
        result
    }

    fn reconcile(
        &mut self,
        input: &Path,
        output: &Path,
        map: &ClassificationMap,
    ) -> Result<ReconcileOutcome> {
        let scratch = scratch_dir(self.config.temp_dir.as_deref())?;
        let sorted = scratch.path().join("pair_sorted.bam");
        ExternalSorter::new(SortOrder::Queryname)
            .chunk_records(self.config.sort_chunk_records)
            .temp_dir(Some(scratch.path().to_path_buf()))
            .sort(input, &sorted)?;

        let mut bam = BamInput::open(&sorted)?;
        let mut writer = SortingWriter::new(
            SortOrder::Coordinate,
            &bam.header,
            self.config.sort_chunk_records,
            Some(scratch.path()),
        )?;

        let mut resolver = PairResolver::new(self.config, map);
        let mut current_name: Option<String> = None;
        let mut group: Vec<AlignmentRecord> = Vec::new();
        let mut groups = 0u64;
        let mut records = 0u64;
        let mut written = 0u64;
        let mut buf = RecordBuf::default();

        loop {
            match bam.read_next(&mut buf) {
                Ok(true) => {}
                Ok(false) => break,
                Err(e) if is_truncation(&e) => {
                    let msg = format!("Truncated record after {records} records: {e}");
                    self.limiter.report(&mut *self.sink, msg);
                    break;
                }
                Err(e) => return Err(e.into()),
            }
            records += 1;
            if self.config.progress_interval > 0 && records % self.config.progress_interval == 0 {
                self.sink.emit(PipelineEvent::Progress(records));
            }

            let record = AlignmentRecord::from_record_buf(&buf, &bam.header);
            let name = record.base_name().to_string();
            if current_name.as_deref().is_some_and(|curr| curr != name) {
                if self.cancel.is_cancelled() {
                    return Err(PipelineError::Cancelled { records });
                }
                groups += 1;
                let finished = std::mem::take(&mut group);
                written += self.flush_group(&mut resolver, finished, &mut writer)?;
            }
            current_name = Some(name);
            group.push(record);
        }

        if !group.is_empty() {
            groups += 1;
            written += self.flush_group(&mut resolver, group, &mut writer)?;
        }

        writer.finish(output)?;
        let index = write_index(output)?;
        let stats = resolver.into_stats();
        tracing::info!(
            groups,
            written,
            pairs = stats.pairs(),
            unpaired = stats.count(PairType::Unpaired),
            "pair reconciliation complete"
        );
        Ok(ReconcileOutcome { stats, groups, records_written: written, index })
    }

    fn flush_group(
        &mut self,
        resolver: &mut PairResolver<'_>,
        group: Vec<AlignmentRecord>,
        writer: &mut SortingWriter,
    ) -> Result<u64> {
        let mut problems = Vec::new();
        let fetcher = &mut *self.fetcher;
        // Records without bases fall back to the NM written by classification.
        let resolved = resolver.resolve(
            group,
            |record| record_error_count(record, &[], fetcher),
            &mut problems,
        );
        for problem in problems {
            self.limiter.report(&mut *self.sink, problem);
        }
        for record in &resolved {
            writer.push(record.to_record_buf())?;
        }
        Ok(resolved.len() as u64)
    }
}
