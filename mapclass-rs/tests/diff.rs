use mapclass_rs::diff::{
    GAP_BASE, borrowed_sequence, complement, compute_diffs_and_gaps, record_diffs,
    record_error_count,
};
use mapclass_rs::{
    AlignmentRecord, ClassificationMap, DiffError, FastaDb, MappingClass, RecordError,
    SequenceFetcher, classify_group,
};
use noodles::sam::alignment::record::Flags;
use noodles::sam::alignment::record::cigar::Op;
use noodles::sam::alignment::record::cigar::op::Kind as CigarKind;

fn ops(list: &[(CigarKind, usize)]) -> Vec<Op> {
    list.iter().map(|(kind, len)| Op::new(*kind, *len)).collect()
}

#[test]
fn single_substitution_reported_at_reference_position() {
    let reference = b"ACGTACGTAC";
    let read = b"ACGTTCGTAC";
    let cigar = ops(&[(CigarKind::Match, 10)]);

    let result = compute_diffs_and_gaps(&cigar, read, reference, 101, false).unwrap();
    assert_eq!(result.error_count, 1);
    assert!(result.gaps.is_empty());
    assert_eq!(result.diffs.len(), 1);
    assert_eq!(result.diffs[0].position, 105);
    assert_eq!(result.diffs[0].base, b'T');
    assert!(result.diffs[0].is_forward);
}

#[test]
fn reverse_strand_complements_reported_base() {
    let reference = b"ACGTACGTAC";
    let read = b"ACGTTCGTAC";
    let cigar = ops(&[(CigarKind::Match, 10)]);

    let forward = compute_diffs_and_gaps(&cigar, read, reference, 1, false).unwrap();
    let reverse = compute_diffs_and_gaps(&cigar, read, reference, 1, true).unwrap();
    assert_eq!(reverse.error_count, 1);
    assert_eq!(reverse.diffs[0].position, forward.diffs[0].position);
    assert_eq!(reverse.diffs[0].base, complement(forward.diffs[0].base));
    assert_eq!(reverse.diffs[0].base, b'A');
    assert!(!reverse.diffs[0].is_forward);
}

#[test]
fn comparison_ignores_case() {
    let result = compute_diffs_and_gaps(
        &ops(&[(CigarKind::Match, 4)]),
        b"acgt",
        b"ACGT",
        1,
        false,
    )
    .unwrap();
    assert_eq!(result.error_count, 0);
}

#[test]
fn insertion_gaps_carry_order_within_run() {
    // 3M 2I 3M: the inserted bases sit before reference position 4
    let reference = b"AAACCC";
    let read = b"AAAGTCCC";
    let cigar = ops(&[(CigarKind::Match, 3), (CigarKind::Insertion, 2), (CigarKind::Match, 3)]);

    let result = compute_diffs_and_gaps(&cigar, read, reference, 1, false).unwrap();
    assert!(result.diffs.is_empty());
    assert_eq!(result.gaps.len(), 2);
    assert_eq!((result.gaps[0].position, result.gaps[0].base, result.gaps[0].order), (4, b'G', 0));
    assert_eq!((result.gaps[1].position, result.gaps[1].base, result.gaps[1].order), (4, b'T', 1));
    assert_eq!(result.error_count, 2);
}

#[test]
fn deletion_reports_gap_base_per_deleted_position() {
    let reference = b"AAAGGCCC";
    let read = b"AAACCC";
    let cigar = ops(&[(CigarKind::Match, 3), (CigarKind::Deletion, 2), (CigarKind::Match, 3)]);

    let result = compute_diffs_and_gaps(&cigar, read, reference, 10, false).unwrap();
    let positions: Vec<_> = result.diffs.iter().map(|d| (d.position, d.base)).collect();
    assert_eq!(positions, vec![(13, GAP_BASE), (14, GAP_BASE)]);
    assert_eq!(result.error_count, 2);
}

#[test]
fn skips_and_clips_are_not_errors() {
    // 2S 3M 4N 3M 1H
    let reference = b"ACGTTTTACG";
    let read = b"NNACGACG";
    let cigar = ops(&[
        (CigarKind::SoftClip, 2),
        (CigarKind::Match, 3),
        (CigarKind::Skip, 4),
        (CigarKind::Match, 3),
        (CigarKind::HardClip, 1),
    ]);
    let result = compute_diffs_and_gaps(&cigar, read, reference, 1, false).unwrap();
    assert_eq!(result.error_count, 0);
}

#[test]
fn explicit_match_and_mismatch_ops() {
    let cigar = ops(&[(CigarKind::SequenceMatch, 2), (CigarKind::SequenceMismatch, 1)]);
    let result = compute_diffs_and_gaps(&cigar, b"ACT", b"ACG", 1, false).unwrap();
    assert_eq!(result.diffs.len(), 1);
    assert_eq!(result.diffs[0].position, 3);
}

#[test]
fn cigar_and_sequence_length_mismatch_is_rejected() {
    let err = compute_diffs_and_gaps(&ops(&[(CigarKind::Match, 5)]), b"ACGT", b"ACGTA", 1, false)
        .unwrap_err();
    assert_eq!(err, DiffError::LengthMismatch { cigar: 5, sequence: 4 });
}

#[test]
fn short_reference_is_rejected() {
    let err = compute_diffs_and_gaps(&ops(&[(CigarKind::Match, 5)]), b"ACGTA", b"ACG", 1, false)
        .unwrap_err();
    assert_eq!(err, DiffError::ReferenceLength { span: 5, available: 3 });
}

#[test]
fn identical_input_gives_identical_output() {
    let cigar = ops(&[(CigarKind::Match, 2), (CigarKind::Insertion, 1), (CigarKind::Match, 3)]);
    let a = compute_diffs_and_gaps(&cigar, b"ATGCAT", b"ACCTT", 7, true).unwrap();
    let b = compute_diffs_and_gaps(&cigar, b"ATGCAT", b"ACCTT", 7, true).unwrap();
    assert_eq!(a, b);
}

#[test]
fn record_diffs_fetches_reference_slice() {
    let mut fetcher = SequenceFetcher::new(
        FastaDb::from_sequences([("chr1", "NNNNACGTACGTNN")]),
        8,
    );
    let mut record = AlignmentRecord::new(
        "r1",
        0,
        "chr1",
        5,
        ops(&[(CigarKind::Match, 8)]),
        b"ACGAACGT".to_vec(),
    );
    record.flags = Flags::REVERSE_COMPLEMENTED;

    let result = record_diffs(&record, &mut fetcher).unwrap();
    assert_eq!(result.error_count, 1);
    assert_eq!(result.diffs[0].position, 8);
    assert_eq!(result.diffs[0].base, b'T');
}

#[test]
fn record_diffs_reports_range_errors() {
    let mut fetcher = SequenceFetcher::new(FastaDb::from_sequences([("chr1", "ACGT")]), 100);
    let record = AlignmentRecord::new("r1", 0, "chr1", 3, ops(&[(CigarKind::Match, 4)]), b"GTAA".to_vec());
    assert!(matches!(record_diffs(&record, &mut fetcher), Err(RecordError::Range(_))));
}

// ── records stored without bases ──

const PRIMARY_READ: &[u8] = b"ACGTACGTAA";

/// `A` everywhere except 100-109 (`PRIMARY_READ` with its last base changed),
/// 300-309 (reverse complement of `PRIMARY_READ`) and 500-509 (all `T`).
fn seqless_fetcher() -> SequenceFetcher<FastaDb> {
    let mut chr1 = vec![b'A'; 600];
    chr1[99..109].copy_from_slice(b"ACGTACGTAC");
    chr1[299..309].copy_from_slice(b"TTACGTACGT");
    chr1[499..509].copy_from_slice(b"TTTTTTTTTT");
    SequenceFetcher::new(FastaDb::from_sequences([("chr1", chr1)]), 1000)
}

fn alignment(start: usize, sequence: &[u8], flags: Flags) -> AlignmentRecord {
    let mut record = AlignmentRecord::new(
        "read1",
        0,
        "chr1",
        start,
        ops(&[(CigarKind::Match, 10)]),
        sequence.to_vec(),
    );
    record.flags = flags;
    record
}

fn classify_with_error_counts(
    group: &mut Vec<AlignmentRecord>,
    fetcher: &mut SequenceFetcher<FastaDb>,
) -> Vec<(usize, u32, MappingClass)> {
    let members: &[AlignmentRecord] = group;
    let errors: Vec<u32> = members
        .iter()
        .map(|record| record_error_count(record, members, fetcher).unwrap())
        .collect();
    for (record, errors) in group.iter_mut().zip(errors) {
        record.error_count = Some(errors);
    }
    classify_group(group, &mut ClassificationMap::new());
    group
        .iter()
        .map(|r| {
            let class = MappingClass::from_id(r.classification.unwrap()).unwrap();
            (r.start, r.error_count.unwrap(), class)
        })
        .collect()
}

#[test]
fn empty_sequence_is_a_length_mismatch() {
    let err = compute_diffs_and_gaps(&ops(&[(CigarKind::Match, 4)]), b"", b"ACGT", 1, false)
        .unwrap_err();
    assert_eq!(err, DiffError::LengthMismatch { cigar: 4, sequence: 0 });
}

#[test]
fn secondary_without_bases_borrows_primary_sequence() {
    let mut fetcher = seqless_fetcher();
    let mut group = vec![
        alignment(100, PRIMARY_READ, Flags::empty()),
        alignment(500, b"", Flags::SECONDARY),
    ];

    let classes = classify_with_error_counts(&mut group, &mut fetcher);
    assert_eq!(
        classes,
        vec![(100, 1, MappingClass::BestMatch), (500, 8, MappingClass::CommonMatch)]
    );
}

#[test]
fn borrowed_sequence_is_reverse_complemented_across_strands() {
    let mut fetcher = seqless_fetcher();
    let mut group = vec![
        alignment(300, b"", Flags::SECONDARY | Flags::REVERSE_COMPLEMENTED),
        alignment(100, PRIMARY_READ, Flags::empty()),
    ];
    assert_eq!(borrowed_sequence(&group[0], &group).unwrap(), b"TTACGTACGT");

    let classes = classify_with_error_counts(&mut group, &mut fetcher);
    assert_eq!(
        classes,
        vec![(300, 0, MappingClass::PerfectMatch), (100, 1, MappingClass::CommonMatch)]
    );
}

#[test]
fn bases_are_not_borrowed_from_the_other_mate() {
    let mate1 = alignment(100, PRIMARY_READ, Flags::SEGMENTED | Flags::FIRST_SEGMENT);
    let mate2 = alignment(300, b"", Flags::SEGMENTED | Flags::LAST_SEGMENT);
    assert_eq!(borrowed_sequence(&mate2, &[mate1, mate2.clone()]), None);
}

#[test]
fn record_without_bases_or_donor_keeps_input_edit_distance() {
    let mut fetcher = seqless_fetcher();
    let mut lone = alignment(500, b"", Flags::SECONDARY);
    lone.error_count = Some(3);
    assert_eq!(record_error_count(&lone, &[], &mut fetcher), Ok(3));

    lone.error_count = None;
    assert_eq!(
        record_error_count(&lone, &[], &mut fetcher),
        Err(RecordError::Diff(DiffError::MissingSequence))
    );
}
