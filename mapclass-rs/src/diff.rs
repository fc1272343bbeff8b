//! Differences between an aligned read and the reference.
//!
//! Walks the CIGAR of one record against the reference slice it covers and
//! collects single-base differences (mismatches and deleted reference bases)
//! and reference gaps (bases inserted in the read). The error count drives
//! mapping classification, so identical input must always give identical
//! output.

use crate::errors::{DiffError, RecordError};
use crate::record::{AlignmentRecord, read_span, reference_span};
use crate::reference::{ReferenceSource, SequenceFetcher};
use noodles::sam::alignment::record::cigar::Op;
use noodles::sam::alignment::record::cigar::op::Kind as CigarKind;

/// Base reported for a reference position deleted from the read.
pub const GAP_BASE: u8 = b'-';

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Diff {
    /// 1-based reference position.
    pub position: usize,
    pub base: u8,
    pub is_forward: bool,
}

/// A read base with no counterpart in the reference.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ReferenceGap {
    /// 1-based reference position the inserted base precedes.
    pub position: usize,
    pub base: u8,
    /// Index of the base within its insertion run.
    pub order: usize,
    pub is_forward: bool,
}

#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct DiffAndGapResult {
    pub diffs: Vec<Diff>,
    pub gaps: Vec<ReferenceGap>,
    pub error_count: u32,
}

pub fn complement(base: u8) -> u8 {
    match base {
        b'A' | b'a' => b'T',
        b'T' | b't' => b'A',
        b'C' | b'c' => b'G',
        b'G' | b'g' => b'C',
        GAP_BASE => GAP_BASE,
        _ => b'N',
    }
}

/// Compare one record's bases to `reference`, the uppercase reference slice
/// starting at 1-based `reference_start` and covering the record's span.
pub fn compute_diffs_and_gaps(
    ops: &[Op],
    read_sequence: &[u8],
    reference: &[u8],
    reference_start: usize,
    is_reverse: bool,
) -> Result<DiffAndGapResult, DiffError> {
    let consumed = read_span(ops);
    if consumed != read_sequence.len() {
        return Err(DiffError::LengthMismatch { cigar: consumed, sequence: read_sequence.len() });
    }
    let span = reference_span(ops);
    if reference.len() < span {
        return Err(DiffError::ReferenceLength { span, available: reference.len() });
    }

    let strand_base = |base: u8| {
        let base = base.to_ascii_uppercase();
        if is_reverse { complement(base) } else { base }
    };

    let mut result = DiffAndGapResult::default();
    let mut read_pos = 0usize;
    let mut ref_pos = 0usize;

    for op in ops {
        let len = op.len();
        match op.kind() {
            CigarKind::Match | CigarKind::SequenceMismatch => {
                let always_diff = op.kind() == CigarKind::SequenceMismatch;
                for i in 0..len {
                    let read_base = read_sequence[read_pos + i];
                    if always_diff || !read_base.eq_ignore_ascii_case(&reference[ref_pos + i]) {
                        result.diffs.push(Diff {
                            position: reference_start + ref_pos + i,
                            base: strand_base(read_base),
                            is_forward: !is_reverse,
                        });
                    }
                }
                read_pos += len;
                ref_pos += len;
            }
            CigarKind::SequenceMatch => {
                read_pos += len;
                ref_pos += len;
            }
            CigarKind::Insertion => {
                for order in 0..len {
                    let base = read_sequence[read_pos + order];
                    result.gaps.push(ReferenceGap {
                        position: reference_start + ref_pos,
                        base: strand_base(base),
                        order,
                        is_forward: !is_reverse,
                    });
                }
                read_pos += len;
            }
            CigarKind::Deletion => {
                for i in 0..len {
                    result.diffs.push(Diff {
                        position: reference_start + ref_pos + i,
                        base: GAP_BASE,
                        is_forward: !is_reverse,
                    });
                }
                ref_pos += len;
            }
            CigarKind::Skip => ref_pos += len,
            CigarKind::SoftClip => read_pos += len,
            CigarKind::HardClip | CigarKind::Pad => {}
        }
    }

    result.error_count = (result.diffs.len() + result.gaps.len()) as u32;
    Ok(result)
}

/// Diffs and gaps of a mapped record against the reference it maps to.
pub fn record_diffs<S: ReferenceSource>(
    record: &AlignmentRecord,
    fetcher: &mut SequenceFetcher<S>,
) -> Result<DiffAndGapResult, RecordError> {
    diffs_with_sequence(record, &record.sequence, fetcher)
}

fn diffs_with_sequence<S: ReferenceSource>(
    record: &AlignmentRecord,
    sequence: &[u8],
    fetcher: &mut SequenceFetcher<S>,
) -> Result<DiffAndGapResult, RecordError> {
    let reference = fetcher.sub_sequence(&record.reference_name, record.start, record.stop)?;
    let result = compute_diffs_and_gaps(
        &record.cigar,
        sequence,
        &reference,
        record.start,
        record.is_reverse(),
    )?;
    Ok(result)
}

/// Bases for a record stored without them (SAM `*`, usual for secondary
/// alignments), taken from another record of the same read or mate in
/// `group`. Primary records are preferred; the bases are reverse-complemented
/// when the two records lie on different strands.
pub fn borrowed_sequence(record: &AlignmentRecord, group: &[AlignmentRecord]) -> Option<Vec<u8>> {
    let key = record.classification_key();
    let needed = read_span(&record.cigar);
    let matches = |donor: &&AlignmentRecord| {
        donor.sequence.len() == needed && donor.classification_key() == key
    };
    let is_primary = |donor: &&AlignmentRecord| {
        !donor.flags.is_secondary() && !donor.flags.is_supplementary()
    };
    let donor = group
        .iter()
        .filter(matches)
        .find(is_primary)
        .or_else(|| group.iter().find(matches))?;
    if donor.is_reverse() == record.is_reverse() {
        Some(donor.sequence.clone())
    } else {
        Some(donor.sequence.iter().rev().map(|&base| complement(base)).collect())
    }
}

/// Error count of one record of a read-name group.
///
/// A record without bases is compared using bases borrowed from `group`
/// (see [`borrowed_sequence`]). Failing that, the edit distance it was read
/// with (`NM`) is kept; a record with neither is rejected.
pub fn record_error_count<S: ReferenceSource>(
    record: &AlignmentRecord,
    group: &[AlignmentRecord],
    fetcher: &mut SequenceFetcher<S>,
) -> Result<u32, RecordError> {
    if !record.sequence.is_empty() || read_span(&record.cigar) == 0 {
        return Ok(record_diffs(record, fetcher)?.error_count);
    }
    if let Some(sequence) = borrowed_sequence(record, group) {
        return Ok(diffs_with_sequence(record, &sequence, fetcher)?.error_count);
    }
    record.error_count.ok_or(RecordError::Diff(DiffError::MissingSequence))
}
