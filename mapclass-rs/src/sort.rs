//! External merge sort for BAM records.
//!
//! Records are buffered up to a fixed count, sorted in memory and spilled
//! to BAM chunks in a temp directory; `finish` k-way merges the chunks
//! with a binary heap. Ties on the sort key keep input order (stable sort
//! inside a chunk, chunk index across chunks), so the same input always
//! produces byte-identical output.

use crate::bam_io::{BamInput, BamOutput, is_truncation, with_sort_order};
use crate::errors::PipelineError;
use crate::record::base_name;
use noodles::sam;
use noodles::sam::alignment::RecordBuf;
use std::cmp::{Ordering, Reverse};
use std::collections::BinaryHeap;
use std::io;
use std::path::{Path, PathBuf};
use tempfile::TempDir;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SortOrder {
    /// By read name with the pair-tag suffix stripped, so mates interleave.
    Queryname,
    Coordinate,
}

impl SortOrder {
    fn header_value(self) -> &'static str {
        match self {
            SortOrder::Queryname => "queryname",
            SortOrder::Coordinate => "coordinate",
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord)]
enum SortKey {
    Name { name: Vec<u8>, segment: u8 },
    /// Unmapped records (no reference) sort last.
    Coordinate { ref_id: usize, start: usize, reverse: bool, name: Vec<u8> },
}

impl SortKey {
    fn of(order: SortOrder, record: &RecordBuf) -> Self {
        let full: &[u8] = record.name().map(|n| &**n).unwrap_or(&[]);
        match order {
            SortOrder::Queryname => {
                let name = String::from_utf8_lossy(full);
                let flags = record.flags();
                let segment = if flags.is_first_segment() {
                    1
                } else if flags.is_last_segment() {
                    2
                } else {
                    0
                };
                Self::Name { name: base_name(&name).as_bytes().to_vec(), segment }
            }
            SortOrder::Coordinate => Self::Coordinate {
                ref_id: record.reference_sequence_id().unwrap_or(usize::MAX),
                start: record.alignment_start().map(usize::from).unwrap_or(usize::MAX),
                reverse: record.flags().is_reverse_complemented(),
                name: full.to_vec(),
            },
        }
    }
}

#[derive(Debug, Default, Clone, Copy, PartialEq, Eq)]
pub struct SortStats {
    pub records: u64,
    pub chunks_written: usize,
    /// Input ended in the middle of a record; everything before it was sorted.
    pub truncated: bool,
}

/// Accepts records in any order and writes them sorted on `finish`.
pub struct SortingWriter {
    order: SortOrder,
    header: sam::Header,
    chunk_records: usize,
    temp_dir: TempDir,
    chunks: Vec<PathBuf>,
    buffer: Vec<(SortKey, RecordBuf)>,
    stats: SortStats,
}

impl SortingWriter {
    pub fn new(
        order: SortOrder,
        header: &sam::Header,
        chunk_records: usize,
        temp_parent: Option<&Path>,
    ) -> io::Result<Self> {
        let temp_dir = match temp_parent {
            Some(base) => {
                std::fs::create_dir_all(base)?;
                TempDir::new_in(base)?
            }
            None => TempDir::new()?,
        };
        Ok(Self {
            order,
            header: header.clone(),
            chunk_records: chunk_records.max(1),
            temp_dir,
            chunks: Vec::new(),
            buffer: Vec::new(),
            stats: SortStats::default(),
        })
    }

    pub fn push(&mut self, record: RecordBuf) -> io::Result<()> {
        let key = SortKey::of(self.order, &record);
        self.buffer.push((key, record));
        self.stats.records += 1;
        if self.buffer.len() >= self.chunk_records {
            self.spill()?;
        }
        Ok(())
    }

    fn spill(&mut self) -> io::Result<()> {
        let path = self.temp_dir.path().join(format!("chunk_{:04}.bam", self.chunks.len()));
        self.buffer.sort_by(|(a, _), (b, _)| a.cmp(b));
        let mut writer = BamOutput::create(&path, &self.header)?;
        for (_, record) in self.buffer.drain(..) {
            writer.write(&record)?;
        }
        writer.finish()?;
        tracing::debug!(chunk = %path.display(), "spilled sort chunk");
        self.chunks.push(path);
        self.stats.chunks_written += 1;
        Ok(())
    }

    /// Write all records, sorted, to `output`.
    pub fn finish(mut self, output: &Path) -> io::Result<SortStats> {
        let out_header = with_sort_order(&self.header, self.order.header_value())?;
        let mut writer = BamOutput::create(output, &out_header)?;

        if self.chunks.is_empty() {
            self.buffer.sort_by(|(a, _), (b, _)| a.cmp(b));
            for (_, record) in &self.buffer {
                writer.write(record)?;
            }
            writer.finish()?;
            return Ok(self.stats);
        }

        if !self.buffer.is_empty() {
            self.spill()?;
        }

        let mut readers = self
            .chunks
            .iter()
            .map(|path| BamInput::open(path))
            .collect::<io::Result<Vec<_>>>()?;

        let mut heap: BinaryHeap<Reverse<HeapEntry>> = BinaryHeap::with_capacity(readers.len());
        for (chunk_idx, reader) in readers.iter_mut().enumerate() {
            if let Some(entry) = next_entry(reader, self.order, chunk_idx)? {
                heap.push(Reverse(entry));
            }
        }

        while let Some(Reverse(entry)) = heap.pop() {
            writer.write(&entry.record)?;
            let chunk_idx = entry.chunk_idx;
            if let Some(next) = next_entry(&mut readers[chunk_idx], self.order, chunk_idx)? {
                heap.push(Reverse(next));
            }
        }

        writer.finish()?;
        Ok(self.stats)
    }
}

fn next_entry(
    reader: &mut BamInput,
    order: SortOrder,
    chunk_idx: usize,
) -> io::Result<Option<HeapEntry>> {
    let mut record = RecordBuf::default();
    if !reader.read_next(&mut record)? {
        return Ok(None);
    }
    Ok(Some(HeapEntry { key: SortKey::of(order, &record), record, chunk_idx }))
}

struct HeapEntry {
    key: SortKey,
    record: RecordBuf,
    chunk_idx: usize,
}

impl PartialEq for HeapEntry {
    fn eq(&self, other: &Self) -> bool {
        self.cmp(other) == Ordering::Equal
    }
}

impl Eq for HeapEntry {}

impl PartialOrd for HeapEntry {
    fn partial_cmp(&self, other: &Self) -> Option<Ordering> {
        Some(self.cmp(other))
    }
}

impl Ord for HeapEntry {
    fn cmp(&self, other: &Self) -> Ordering {
        self.key.cmp(&other.key).then(self.chunk_idx.cmp(&other.chunk_idx))
    }
}

/// Sorts a whole BAM file into a new one.
#[derive(Debug, Clone)]
pub struct ExternalSorter {
    order: SortOrder,
    chunk_records: usize,
    temp_dir: Option<PathBuf>,
}

impl ExternalSorter {
    pub fn new(order: SortOrder) -> Self {
        Self { order, chunk_records: 500_000, temp_dir: None }
    }

    #[must_use]
    pub fn chunk_records(mut self, records: usize) -> Self {
        self.chunk_records = records;
        self
    }

    #[must_use]
    pub fn temp_dir(mut self, path: Option<PathBuf>) -> Self {
        self.temp_dir = path;
        self
    }

    pub fn sort(&self, input: &Path, output: &Path) -> Result<SortStats, PipelineError> {
        let sort_error = |source: io::Error| PipelineError::Sort {
            path: input.to_path_buf(),
            source,
        };

        tracing::info!(input = %input.display(), order = ?self.order, "sorting");
        let mut reader = BamInput::open(input).map_err(sort_error)?;
        let mut sorter = SortingWriter::new(
            self.order,
            &reader.header,
            self.chunk_records,
            self.temp_dir.as_deref(),
        )
        .map_err(sort_error)?;

        let mut record = RecordBuf::default();
        let mut truncated = false;
        loop {
            match reader.read_next(&mut record) {
                Ok(true) => sorter.push(std::mem::take(&mut record)).map_err(sort_error)?,
                Ok(false) => break,
                Err(e) if is_truncation(&e) => {
                    tracing::warn!(input = %input.display(), "input ends in a truncated record: {e}");
                    truncated = true;
                    break;
                }
                Err(e) => return Err(sort_error(e)),
            }
        }

        let mut stats = sorter.finish(output).map_err(sort_error)?;
        stats.truncated = truncated;
        tracing::info!(records = stats.records, chunks = stats.chunks_written, "sort complete");
        Ok(stats)
    }
}
