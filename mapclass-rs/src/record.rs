//! The alignment record handled by every pipeline stage.
//!
//! Records are read from BAM as noodles `RecordBuf`s and converted into
//! `AlignmentRecord`, which exposes the fields the classifier needs with
//! 1-based inclusive coordinates. Annotation tags are written back on the
//! way out; all other auxiliary fields pass through untouched.

use crate::types::{PairId, RefId};
use bstr::BString;
use noodles::core::Position;
use noodles::sam;
use noodles::sam::alignment::RecordBuf;
use noodles::sam::alignment::record::Flags;
use noodles::sam::alignment::record::MappingQuality;
use noodles::sam::alignment::record::cigar::Op;
use noodles::sam::alignment::record::cigar::op::Kind as CigarKind;
use noodles::sam::alignment::record::data::field::Tag;
use noodles::sam::alignment::record_buf::data::field::Value;
use noodles::sam::alignment::record_buf::{Cigar, Data, QualityScores, Sequence};

/// Number of alignments of the read (`NH`).
pub const MAP_COUNT: Tag = Tag::ALIGNMENT_HIT_COUNT;
/// Diff + gap count against the reference (`NM`).
pub const ERROR_COUNT: Tag = Tag::EDIT_DISTANCE;
/// Mapping classification id.
pub const CLASSIFICATION: Tag = Tag::new(b'Y', b'c');
/// Read-pair type id.
pub const PAIR_TYPE: Tag = Tag::new(b'Y', b't');
/// Read-pair id.
pub const PAIR_ID: Tag = Tag::new(b'Y', b'i');

/// Distinguishes the two ends of a read pair.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub enum PairTag {
    First,
    Second,
}

impl PairTag {
    pub fn suffix(self) -> &'static str {
        match self {
            PairTag::First => "/1",
            PairTag::Second => "/2",
        }
    }
}

/// Read name with a trailing `/1` or `/2` removed.
pub fn base_name(name: &str) -> &str {
    match name.len().checked_sub(2).map(|i| name.split_at(i)) {
        Some((base, "/1" | "/2")) => base,
        _ => name,
    }
}

/// Pair tag encoded as a `/1` / `/2` read-name suffix.
fn suffix_pair_tag(name: &str) -> Option<PairTag> {
    if name.ends_with("/1") {
        Some(PairTag::First)
    } else if name.ends_with("/2") {
        Some(PairTag::Second)
    } else {
        None
    }
}

#[derive(Debug, Clone, PartialEq)]
pub struct AlignmentRecord {
    pub name: String,
    pub flags: Flags,
    pub reference_id: Option<RefId>,
    pub reference_name: String,
    /// 1-based inclusive.
    pub start: usize,
    /// 1-based inclusive.
    pub stop: usize,
    pub mapping_quality: Option<u8>,
    pub cigar: Vec<Op>,
    pub sequence: Vec<u8>,
    pub quality_scores: Vec<u8>,
    pub mate_reference_id: Option<RefId>,
    pub mate_start: Option<usize>,
    pub template_length: i32,
    pub map_count: Option<u32>,
    pub error_count: Option<u32>,
    pub classification: Option<u8>,
    pub pair_type: Option<u8>,
    pub pair_id: Option<PairId>,
    data: Data,
}

impl AlignmentRecord {
    /// Minimal mapped record; used to build records outside of BAM input.
    pub fn new(
        name: impl Into<String>,
        reference_id: RefId,
        reference_name: impl Into<String>,
        start: usize,
        cigar: Vec<Op>,
        sequence: impl Into<Vec<u8>>,
    ) -> Self {
        let sequence = sequence.into();
        let span = reference_span(&cigar);
        Self {
            name: name.into(),
            flags: Flags::empty(),
            reference_id: Some(reference_id),
            reference_name: reference_name.into(),
            start,
            stop: (start + span).saturating_sub(1).max(start),
            mapping_quality: None,
            cigar,
            quality_scores: Vec::new(),
            sequence,
            mate_reference_id: None,
            mate_start: None,
            template_length: 0,
            map_count: None,
            error_count: None,
            classification: None,
            pair_type: None,
            pair_id: None,
            data: Data::default(),
        }
    }

    pub fn from_record_buf(record: &RecordBuf, header: &sam::Header) -> Self {
        let name = record.name().map(|n| n.to_string()).unwrap_or_default();
        let reference_id = record.reference_sequence_id();
        let reference_name = reference_id
            .and_then(|id| header.reference_sequences().get_index(id))
            .map(|(name, _)| name.to_string())
            .unwrap_or_default();
        let cigar: Vec<Op> = record.cigar().as_ref().to_vec();
        let start = record.alignment_start().map(usize::from).unwrap_or(0);
        let span = reference_span(&cigar);
        let stop = if span == 0 { start } else { start + span - 1 };

        let mut data = record.data().clone();
        let map_count = take_int(&mut data, MAP_COUNT).map(|v| v as u32);
        let error_count = take_int(&mut data, ERROR_COUNT).map(|v| v as u32);
        let classification = take_int(&mut data, CLASSIFICATION).map(|v| v as u8);
        let pair_type = take_int(&mut data, PAIR_TYPE).map(|v| v as u8);
        let pair_id = take_int(&mut data, PAIR_ID).map(|v| v as PairId);

        Self {
            name,
            flags: record.flags(),
            reference_id,
            reference_name,
            start,
            stop,
            mapping_quality: record.mapping_quality().map(|mq| mq.get()),
            cigar,
            sequence: record.sequence().as_ref().to_vec(),
            quality_scores: record.quality_scores().as_ref().to_vec(),
            mate_reference_id: record.mate_reference_sequence_id(),
            mate_start: record.mate_alignment_start().map(usize::from),
            template_length: record.template_length(),
            map_count,
            error_count,
            classification,
            pair_type,
            pair_id,
            data,
        }
    }

    pub fn to_record_buf(&self) -> RecordBuf {
        let mut builder = RecordBuf::builder()
            .set_flags(self.flags)
            .set_cigar(Cigar::from(self.cigar.clone()))
            .set_sequence(Sequence::from(self.sequence.clone()))
            .set_quality_scores(QualityScores::from(self.quality_scores.clone()))
            .set_template_length(self.template_length);

        // An empty name is written as `*`.
        if !self.name.is_empty() {
            builder = builder.set_name(BString::from(self.name.as_str()));
        }
        if let Some(id) = self.reference_id {
            builder = builder.set_reference_sequence_id(id);
        }
        if let Some(start) = Position::new(self.start) {
            builder = builder.set_alignment_start(start);
        }
        if let Some(mq) = self.mapping_quality.and_then(MappingQuality::new) {
            builder = builder.set_mapping_quality(mq);
        }
        if let Some(id) = self.mate_reference_id {
            builder = builder.set_mate_reference_sequence_id(id);
        }
        if let Some(start) = self.mate_start.and_then(Position::new) {
            builder = builder.set_mate_alignment_start(start);
        }

        let mut data = self.data.clone();
        if let Some(v) = self.map_count {
            data.insert(MAP_COUNT, Value::from(v as i32));
        }
        if let Some(v) = self.error_count {
            data.insert(ERROR_COUNT, Value::from(v as i32));
        }
        if let Some(v) = self.classification {
            data.insert(CLASSIFICATION, Value::from(i32::from(v)));
        }
        if let Some(v) = self.pair_type {
            data.insert(PAIR_TYPE, Value::from(i32::from(v)));
        }
        if let Some(v) = self.pair_id {
            data.insert(PAIR_ID, Value::from(v));
        }

        builder.set_data(data).build()
    }

    pub fn is_reverse(&self) -> bool {
        self.flags.is_reverse_complemented()
    }

    pub fn is_mapped(&self) -> bool {
        !self.flags.is_unmapped() && self.reference_id.is_some() && self.start > 0
    }

    pub fn len(&self) -> usize {
        self.stop + 1 - self.start
    }

    pub fn is_empty(&self) -> bool {
        self.stop < self.start
    }

    /// Name without its `/1` or `/2` suffix; the read-name group key.
    pub fn base_name(&self) -> &str {
        base_name(&self.name)
    }

    /// Mate tag from the segment flags, falling back to the name suffix.
    pub fn pair_tag(&self) -> Option<PairTag> {
        if self.flags.is_segmented() {
            if self.flags.is_first_segment() {
                return Some(PairTag::First);
            }
            if self.flags.is_last_segment() {
                return Some(PairTag::Second);
            }
        }
        suffix_pair_tag(&self.name)
    }

    /// Key into the classification map: the base name, suffixed with the
    /// pair tag when the record is one end of a pair.
    pub fn classification_key(&self) -> String {
        match self.pair_tag() {
            Some(tag) => format!("{}{}", self.base_name(), tag.suffix()),
            None => self.name.clone(),
        }
    }

    /// Clear the pair annotation so a re-run of the reconciler starts fresh.
    pub fn clear_pairing(&mut self) {
        self.pair_type = None;
        self.pair_id = None;
        self.mate_reference_id = None;
        self.mate_start = None;
        self.template_length = 0;
        self.flags.remove(Flags::PROPERLY_SEGMENTED | Flags::MATE_REVERSE_COMPLEMENTED);
    }
}

pub fn consumes_read(kind: CigarKind) -> bool {
    matches!(
        kind,
        CigarKind::Match
            | CigarKind::Insertion
            | CigarKind::SoftClip
            | CigarKind::SequenceMatch
            | CigarKind::SequenceMismatch
    )
}

pub fn consumes_reference(kind: CigarKind) -> bool {
    matches!(
        kind,
        CigarKind::Match
            | CigarKind::Deletion
            | CigarKind::Skip
            | CigarKind::SequenceMatch
            | CigarKind::SequenceMismatch
    )
}

/// Reference bases consumed by a CIGAR.
pub fn reference_span(ops: &[Op]) -> usize {
    ops.iter()
        .filter(|op| consumes_reference(op.kind()))
        .map(|op| op.len())
        .sum()
}

/// Read bases consumed by a CIGAR.
pub fn read_span(ops: &[Op]) -> usize {
    ops.iter()
        .filter(|op| consumes_read(op.kind()))
        .map(|op| op.len())
        .sum()
}

fn take_int(data: &mut Data, tag: Tag) -> Option<i64> {
    data.remove(&tag).and_then(|(_, value)| value.as_int())
}
