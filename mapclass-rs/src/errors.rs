//! Error types for the classification pipeline.
//!
//! `PipelineError` is fatal for a track run. `SequenceRangeError` and
//! `DiffError` (wrapped in `RecordError`) only ever affect a single record
//! and are reported through the `ErrorLimiter`.

use std::io;
use std::path::PathBuf;
use thiserror::Error;

/// Result type alias for pipeline operations.
pub type Result<T> = std::result::Result<T, PipelineError>;

/// Fatal errors that abort the pipeline run for a track.
#[derive(Error, Debug)]
pub enum PipelineError {
    /// External sort failed (temp space, corrupt input).
    #[error("Sorting '{path}' failed: {source}")]
    Sort {
        /// The file being sorted
        path: PathBuf,
        /// Underlying I/O failure
        #[source]
        source: io::Error,
    },

    /// Reading or writing an alignment file failed.
    #[error("I/O error: {0}")]
    Io(#[from] io::Error),

    /// The reference sequence could not be opened or read.
    #[error("Reference '{path}' unreadable: {reason}")]
    Reference {
        /// Path to the reference
        path: PathBuf,
        /// Explanation of the problem
        reason: String,
    },

    /// Invalid parameter value provided.
    #[error("Invalid parameter '{parameter}': {reason}")]
    InvalidParameter {
        /// The parameter name
        parameter: String,
        /// Explanation of why it's invalid
        reason: String,
    },

    /// The run was cancelled between records.
    #[error("Pipeline cancelled after {records} records")]
    Cancelled {
        /// Records processed before the flag was observed
        records: u64,
    },
}

/// A sub-sequence request outside the bounds of the reference.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum SequenceRangeError {
    #[error("Reference sequence '{0}' not found")]
    UnknownChromosome(String),

    #[error("Requested region {chromosome}:{start}-{stop} outside 1-{length}")]
    OutOfRange { chromosome: String, start: usize, stop: usize, length: usize },

    #[error("Reading reference window for '{chromosome}' failed: {reason}")]
    Read { chromosome: String, reason: String },
}

/// A record whose CIGAR cannot be walked against its sequence and reference.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum DiffError {
    #[error("CIGAR consumes {cigar} read bases but sequence has {sequence}")]
    LengthMismatch { cigar: usize, sequence: usize },

    #[error("CIGAR spans {span} reference bases but only {available} were supplied")]
    ReferenceLength { span: usize, available: usize },

    #[error("record stores no bases and carries no NM tag")]
    MissingSequence,
}

/// Anything that makes a single record unusable for classification.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum RecordError {
    #[error(transparent)]
    Diff(#[from] DiffError),

    #[error(transparent)]
    Range(#[from] SequenceRangeError),
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_sort_error_message() {
        let error = PipelineError::Sort {
            path: PathBuf::from("/tmp/in.bam"),
            source: io::Error::other("No space left on device"),
        };
        let msg = format!("{error}");
        assert!(msg.contains("Sorting '/tmp/in.bam' failed"));
        assert!(msg.contains("No space left"));
    }

    #[test]
    fn test_out_of_range_message() {
        let error = SequenceRangeError::OutOfRange {
            chromosome: "chr1".to_string(),
            start: 90,
            stop: 120,
            length: 100,
        };
        assert_eq!(format!("{error}"), "Requested region chr1:90-120 outside 1-100");
    }
}
