//! mapclass-rs: classify read mappings against a reference and reconcile
//! read pairs, streaming over BAM files.
//!
//! # Library usage
//!
//! ```no_run
//! use mapclass_rs::{CancellationFlag, PipelineConfig, TracingSink, import_track};
//! use std::path::Path;
//!
//! let config = PipelineConfig { paired: true, distance: 250, ..PipelineConfig::default() };
//! let track = import_track(
//!     Path::new("reads.bam"),
//!     Path::new("genome.fa"),
//!     Path::new("classified.bam"),
//!     &config,
//!     &mut TracingSink,
//!     &CancellationFlag::new(),
//! )?;
//! println!("{} reads", track.statistics.total_reads);
//! # Ok::<(), mapclass_rs::PipelineError>(())
//! ```

pub mod bam_io;
pub mod classify;
pub mod config;
pub mod diff;
pub mod errors;
pub mod events;
pub mod pairs;
pub mod pipeline;
pub mod record;
pub mod reference;
pub mod sort;
pub mod stats;
pub mod track;
pub mod types;

// Flat re-exports for the most commonly used public types.
pub use classify::{Classification, ClassificationMap, MappingClass, classify_group};
pub use config::{InsertSizeWindow, Orientation, PipelineConfig};
pub use diff::{DiffAndGapResult, compute_diffs_and_gaps};
pub use errors::{DiffError, PipelineError, RecordError, SequenceRangeError};
pub use events::{
    CallbackSink, CancellationFlag, CollectingSink, ErrorLimiter, EventSink, PipelineEvent,
    TracingSink,
};
pub use pairs::{PairResolver, PairStatistics, PairType, ReadPairReconciler};
pub use pipeline::{ClassificationOutcome, ClassificationPipeline};
pub use record::AlignmentRecord;
pub use reference::{FastaDb, IndexedFasta, SequenceFetcher};
pub use stats::{
    CoverageInterval, DiscreteCountingDistribution, StatsAccumulator, StrandMode, TrackStatistics,
};
pub use track::{TrackResult, import_track};
