//! One track import: classification, pair reconciliation for paired data,
//! then the statistics pass over the final file.

use crate::bam_io::index_path;
use crate::classify::ClassificationMap;
use crate::config::PipelineConfig;
use crate::errors::Result;
use crate::events::{CancellationFlag, EventSink};
use crate::pairs::ReadPairReconciler;
use crate::pipeline::{ClassificationCounts, ClassificationPipeline, scratch_dir};
use crate::reference::{SequenceFetcher, open_reference};
use crate::stats::{TrackStatistics, collect_statistics};
use std::path::{Path, PathBuf};

#[derive(Debug, Clone)]
pub struct TrackResult {
    pub output: PathBuf,
    pub index: PathBuf,
    pub classification: ClassificationMap,
    pub counts: ClassificationCounts,
    pub statistics: TrackStatistics,
}

/// Import `input` against `reference` into `output` (+ `.bai`).
///
/// On failure the output and its index are removed before the error is
/// returned; intermediate files live in a scratch directory that is
/// always removed.
pub fn import_track(
    input: &Path,
    reference: &Path,
    output: &Path,
    config: &PipelineConfig,
    sink: &mut dyn EventSink,
    cancel: &CancellationFlag,
) -> Result<TrackResult> {
    config.validate()?;
    let result = run_track(input, reference, output, config, sink, cancel);
    if let Err(e) = &result {
        tracing::error!(output = %output.display(), "track import failed: {e}");
        for path in [output.to_path_buf(), index_path(output)] {
            if path.exists()
                && let Err(remove) = std::fs::remove_file(&path)
            {
                tracing::warn!(path = %path.display(), "could not remove partial output: {remove}");
            }
        }
    }
    result
}

fn run_track(
    input: &Path,
    reference: &Path,
    output: &Path,
    config: &PipelineConfig,
    sink: &mut dyn EventSink,
    cancel: &CancellationFlag,
) -> Result<TrackResult> {
    let source = open_reference(reference)?;
    let mut fetcher = SequenceFetcher::new(source, config.reference_window);

    if !config.paired {
        let outcome = ClassificationPipeline::new(config, &mut fetcher, &mut *sink)
            .with_cancellation(cancel.clone())
            .run(input, output)?;
        let statistics = collect_statistics(output, config, cancel)?;
        return Ok(TrackResult {
            output: output.to_path_buf(),
            index: outcome.index,
            classification: outcome.map,
            counts: outcome.counts,
            statistics,
        });
    }

    let scratch = scratch_dir(config.temp_dir.as_deref())?;
    let classified = scratch.path().join("classified.bam");
    let outcome = ClassificationPipeline::new(config, &mut fetcher, &mut *sink)
        .with_cancellation(cancel.clone())
        .run(input, &classified)?;

    let reconciled = ReadPairReconciler::new(config, &mut fetcher, &mut *sink)
        .with_cancellation(cancel.clone())
        .run(&classified, output, &outcome.map)?;
    drop(scratch);

    let mut statistics = collect_statistics(output, config, cancel)?;
    statistics.pairs = Some(reconciled.stats);
    Ok(TrackResult {
        output: output.to_path_buf(),
        index: reconciled.index,
        classification: outcome.map,
        counts: outcome.counts,
        statistics,
    })
}
