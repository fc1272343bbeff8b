use mapclass_rs::stats::{MappingCounter, counters_for};
use mapclass_rs::{
    AlignmentRecord, CoverageInterval, DiscreteCountingDistribution, MappingClass,
    StatsAccumulator, StrandMode,
};
use noodles::sam::alignment::record::Flags;
use noodles::sam::alignment::record::cigar::Op;
use noodles::sam::alignment::record::cigar::op::Kind as CigarKind;

fn mapped(name: &str, chromosome: usize, start: usize, len: usize, reverse: bool) -> AlignmentRecord {
    let mut record = AlignmentRecord::new(
        name,
        chromosome,
        format!("chr{}", chromosome + 1),
        start,
        vec![Op::new(CigarKind::Match, len)],
        vec![b'C'; len],
    );
    if reverse {
        record.flags = Flags::REVERSE_COMPLEMENTED;
    }
    record.classification = Some(MappingClass::SinglePerfectMatch.id());
    record
}

fn spans(intervals: &[CoverageInterval]) -> Vec<(&str, usize, usize)> {
    intervals.iter().map(|i| (i.chromosome.as_str(), i.start, i.stop)).collect()
}

fn assert_sorted_and_disjoint(intervals: &[CoverageInterval]) {
    for pair in intervals.windows(2) {
        let (a, b) = (&pair[0], &pair[1]);
        assert!(a.start <= a.stop && b.start <= b.stop);
        if a.chromosome == b.chromosome {
            assert!(a.stop < b.start, "{a:?} overlaps or precedes {b:?}");
        }
    }
}

#[test]
fn adjacent_records_extend_and_gaps_close() {
    let records = vec![
        mapped("r1", 0, 1, 10, false),
        mapped("r2", 0, 11, 10, false),
        mapped("r3", 0, 15, 10, false),
        mapped("r4", 0, 40, 5, false),
        mapped("r5", 1, 1, 5, false),
    ];
    let mut acc = StatsAccumulator::new(400);
    acc.process_chunk(&records);
    let stats = acc.finish_analysis();

    let both = &stats.coverage.both;
    assert_eq!(spans(both), vec![("chr1", 1, 24), ("chr1", 40, 44), ("chr2", 1, 5)]);
    assert_eq!(both[0].coverage, 30);
    assert!((both[0].mean_coverage() - 1.25).abs() < 1e-9);
    assert_sorted_and_disjoint(both);
}

#[test]
fn strand_modes_track_separately() {
    let records = vec![
        mapped("r1", 0, 1, 10, false),
        mapped("r2", 0, 5, 10, true),
        mapped("r3", 0, 30, 10, false),
    ];
    let mut acc = StatsAccumulator::new(400);
    acc.process_chunk(&records);
    let stats = acc.finish_analysis();

    assert_eq!(spans(stats.coverage.get(StrandMode::Forward)), vec![("chr1", 1, 10), ("chr1", 30, 39)]);
    assert_eq!(spans(stats.coverage.get(StrandMode::Reverse)), vec![("chr1", 5, 14)]);
    assert_eq!(spans(stats.coverage.get(StrandMode::Both)), vec![("chr1", 1, 14), ("chr1", 30, 39)]);
}

#[test]
fn interval_spanning_chunk_boundary_is_not_split() {
    let records = vec![
        mapped("r1", 0, 1, 10, false),
        mapped("r2", 0, 8, 10, false),
        mapped("r3", 0, 18, 10, false),
        mapped("r4", 0, 100, 10, false),
        mapped("r5", 0, 105, 10, false),
    ];

    let mut whole = StatsAccumulator::new(400);
    whole.process_chunk(&records);
    let whole = whole.finish_analysis();

    for chunk_size in 1..=records.len() {
        let mut chunked = StatsAccumulator::new(400);
        for chunk in records.chunks(chunk_size) {
            chunked.process_chunk(chunk);
        }
        let chunked = chunked.finish_analysis();
        assert_eq!(chunked.coverage, whole.coverage, "chunk size {chunk_size}");
    }
    assert_eq!(spans(&whole.coverage.both), vec![("chr1", 1, 27), ("chr1", 100, 114)]);
}

#[test]
fn temp_interval_survives_empty_chunks() {
    let mut acc = StatsAccumulator::new(400);
    acc.process_chunk(&[mapped("r1", 0, 1, 10, true)]);
    acc.process_chunk(&[mapped("r2", 0, 50, 10, false)]);
    acc.process_chunk(&[mapped("r3", 0, 11, 5, true)]);
    let stats = acc.finish_analysis();
    assert_eq!(spans(&stats.coverage.reverse), vec![("chr1", 1, 15)]);
}

#[test]
fn distribution_clamps_to_last_bucket() {
    let mut dist = DiscreteCountingDistribution::new(10);
    dist.add(3);
    dist.add(9);
    dist.add(10);
    dist.add(10_000);
    assert_eq!(dist.buckets(), 10);
    assert_eq!(dist.get(3), 1);
    assert_eq!(dist.get(9), 3);
    assert_eq!(dist.total(), 4);
}

#[test]
fn counters_follow_tier_lists() {
    use MappingCounter::*;
    assert_eq!(counters_for(MappingClass::PerfectMatch), &[Perfect, Best, Common]);
    assert_eq!(counters_for(MappingClass::BestMatch), &[Best, Common]);
    assert_eq!(counters_for(MappingClass::CommonMatch), &[Common]);
    assert!(counters_for(MappingClass::SinglePerfectMatch).contains(&UniquePerfect));
    assert!(counters_for(MappingClass::SingleBestMatch).contains(&UniqueBest));
    assert!(!counters_for(MappingClass::SingleBestMatch).contains(&Perfect));
}

#[test]
fn mapping_counts_and_distinct_reads() {
    let mut common = mapped("r1", 0, 200, 10, false);
    common.classification = Some(MappingClass::CommonMatch.id());
    let mut best = mapped("r1", 0, 100, 10, false);
    best.classification = Some(MappingClass::BestMatch.id());
    let records = vec![
        mapped("r0", 0, 1, 10, false),
        best,
        common,
        mapped("r2", 0, 300, 500, false),
    ];

    let mut acc = StatsAccumulator::new(400);
    acc.process_chunk(&records);
    let stats = acc.finish_analysis();

    assert_eq!(stats.total_reads, 3);
    let m = stats.mappings;
    assert_eq!(m.total, 4);
    assert_eq!(m.perfect, 2);
    assert_eq!(m.best, 3);
    assert_eq!(m.common, 4);
    assert_eq!(m.unique_perfect, 2);
    assert_eq!(m.unique, 2);
    assert_eq!(stats.read_lengths.get(10), 3);
    assert_eq!(stats.read_lengths.get(399), 1);
}
