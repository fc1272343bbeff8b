//! Classification stage of a track import.
//!
//! `ClassificationPipeline` name-sorts the input, streams it one read-name
//! group at a time, computes every record's error count against the
//! reference, classifies the group and hands the tagged records to a
//! coordinate-sorting writer. The result is an indexed BAM plus the
//! classification map consumed by pair reconciliation.

use crate::bam_io::{BamInput, is_truncation, write_index};
use crate::classify::{ClassificationMap, classify_group};
use crate::config::PipelineConfig;
use crate::diff::record_error_count;
use crate::errors::{PipelineError, Result};
use crate::events::{CancellationFlag, ErrorLimiter, EventSink, PipelineEvent};
use crate::record::AlignmentRecord;
use crate::reference::{ReferenceSource, SequenceFetcher};
use crate::sort::{ExternalSorter, SortOrder, SortingWriter};
use noodles::sam::alignment::RecordBuf;
use std::path::{Path, PathBuf};
use tempfile::TempDir;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PipelineState {
    Idle,
    Sorting,
    Streaming,
    Finalizing,
    Success,
    Failed,
}

#[derive(Debug, Default, Clone, PartialEq, Eq)]
pub struct ClassificationCounts {
    pub records_read: u64,
    pub records_written: u64,
    pub read_groups: u64,
    pub unmapped: u64,
    pub unknown_reference: u64,
    /// Records without a read name (`*`); they cannot be grouped.
    pub nameless: u64,
    /// Records dropped because their diffs could not be computed.
    pub rejected: u64,
    /// Records dropped because their group exceeded `max_group_size`.
    pub over_group_limit: u64,
    pub truncated_input: bool,
}

#[derive(Debug, Clone)]
pub struct ClassificationOutcome {
    pub map: ClassificationMap,
    pub counts: ClassificationCounts,
    pub index: PathBuf,
}

/// Sort by read name, classify each read-name group against the reference
/// and write a coordinate-sorted, annotated, indexed BAM.
pub struct ClassificationPipeline<'a, S> {
    config: &'a PipelineConfig,
    fetcher: &'a mut SequenceFetcher<S>,
    sink: &'a mut dyn EventSink,
    cancel: CancellationFlag,
    limiter: ErrorLimiter,
    state: PipelineState,
}

impl<'a, S: ReferenceSource> ClassificationPipeline<'a, S> {
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
            state: PipelineState::Idle,
        }
    }

    #[must_use]
    pub fn with_cancellation(mut self, cancel: CancellationFlag) -> Self {
        self.cancel = cancel;
        self
    }

    pub fn state(&self) -> PipelineState {
        self.state
    }

    pub fn run(&mut self, input: &Path, output: &Path) -> Result<ClassificationOutcome> {
        let result = self.run_states(input, output);
        self.limiter.finish(&mut *self.sink);
        self.enter(if result.is_ok() { PipelineState::Success } else { PipelineState::Failed });
        result
    }

    fn enter(&mut self, state: PipelineState) {
        tracing::debug!(from = ?self.state, to = ?state, "classification state");
        self.state = state;
    }

    fn run_states(&mut self, input: &Path, output: &Path) -> Result<ClassificationOutcome> {
        self.enter(PipelineState::Sorting);
        let scratch = scratch_dir(self.config.temp_dir.as_deref())?;
        let sorted = scratch.path().join("name_sorted.bam");
        let sort_stats = ExternalSorter::new(SortOrder::Queryname)
            .chunk_records(self.config.sort_chunk_records)
            .temp_dir(Some(scratch.path().to_path_buf()))
            .sort(input, &sorted)?;

        self.enter(PipelineState::Streaming);
        let mut bam = BamInput::open(&sorted)?;
        let mut writer = SortingWriter::new(
            SortOrder::Coordinate,
            &bam.header,
            self.config.sort_chunk_records,
            Some(scratch.path()),
        )?;

        let mut map = ClassificationMap::new();
        let mut counts = ClassificationCounts::default();
        if sort_stats.truncated {
            let msg = format!("Input truncated after {} records", sort_stats.records);
            self.limiter.report(&mut *self.sink, msg);
            counts.truncated_input = true;
        }
        let mut current_name: Option<String> = None;
        let mut group: Vec<AlignmentRecord> = Vec::new();
        let mut group_limit_warned = false;
        let mut buf = RecordBuf::default();

        loop {
            if self.cancel.is_cancelled() {
                return Err(PipelineError::Cancelled { records: counts.records_read });
            }
            match bam.read_next(&mut buf) {
                Ok(true) => {}
                Ok(false) => break,
                Err(e) if is_truncation(&e) => {
                    let msg = format!("Truncated record after {} records: {e}", counts.records_read);
                    self.limiter.report(&mut *self.sink, msg);
                    counts.truncated_input = true;
                    break;
                }
                Err(e) => return Err(e.into()),
            }

            counts.records_read += 1;
            let interval = self.config.progress_interval;
            if interval > 0 && counts.records_read % interval == 0 {
                self.sink.emit(PipelineEvent::Progress(counts.records_read));
            }

            let record = AlignmentRecord::from_record_buf(&buf, &bam.header);
            if !record.is_mapped() {
                counts.unmapped += 1;
                continue;
            }
            if self.fetcher.chromosome_length(&record.reference_name).is_none() {
                counts.unknown_reference += 1;
                continue;
            }
            if record.name.is_empty() {
                counts.nameless += 1;
                continue;
            }

            let name = record.base_name().to_string();
            match &current_name {
                Some(curr) if *curr == name => {}
                Some(_) => {
                    self.close_group(&mut group, &mut map, &mut writer, &mut counts)?;
                    current_name = Some(name);
                    group_limit_warned = false;
                }
                None => current_name = Some(name),
            }

            if group.len() >= self.config.max_group_size {
                counts.over_group_limit += 1;
                if !group_limit_warned {
                    self.sink.emit(PipelineEvent::Warning(format!(
                        "Read {} has more than {} mappings, ignoring the rest",
                        record.base_name(),
                        self.config.max_group_size
                    )));
                    group_limit_warned = true;
                }
                continue;
            }
            group.push(record);
        }

        self.enter(PipelineState::Finalizing);
        self.close_group(&mut group, &mut map, &mut writer, &mut counts)?;
        writer.finish(output)?;
        let index = write_index(output)?;

        tracing::info!(
            records = counts.records_read,
            written = counts.records_written,
            groups = counts.read_groups,
            unmapped = counts.unmapped,
            nameless = counts.nameless,
            rejected = counts.rejected,
            "classification complete"
        );
        Ok(ClassificationOutcome { map, counts, index })
    }

    fn close_group(
        &mut self,
        group: &mut Vec<AlignmentRecord>,
        map: &mut ClassificationMap,
        writer: &mut SortingWriter,
        counts: &mut ClassificationCounts,
    ) -> Result<()> {
        if group.is_empty() {
            return Ok(());
        }
        counts.read_groups += 1;

        let members: &[AlignmentRecord] = group;
        let errors: Vec<_> = members
            .iter()
            .map(|record| record_error_count(record, members, &mut *self.fetcher))
            .collect();
        let mut kept = Vec::with_capacity(group.len());
        for (mut record, errors) in group.drain(..).zip(errors) {
            match errors {
                Ok(errors) => {
                    record.error_count = Some(errors);
                    kept.push(record);
                }
                Err(e) => {
                    counts.rejected += 1;
                    let msg = format!("Skipping record {}: {e}", record.name);
                    self.limiter.report(&mut *self.sink, msg);
                }
            }
        }

        classify_group(&mut kept, map);
        for record in &kept {
            writer.push(record.to_record_buf())?;
            counts.records_written += 1;
        }
        Ok(())
    }
}

/// Scratch directory for intermediate files, removed when dropped.
pub(crate) fn scratch_dir(parent: Option<&Path>) -> Result<TempDir> {
    let dir = match parent {
        Some(base) => {
            std::fs::create_dir_all(base)?;
            tempfile::Builder::new().prefix("mapclass-").tempdir_in(base)?
        }
        None => tempfile::Builder::new().prefix("mapclass-").tempdir()?,
    };
    Ok(dir)
}
