//! Reference sequence access for diff computation.
//!
//! `SequenceFetcher` serves 1-based inclusive sub-sequence requests from a
//! single cached window so that the many small lookups made while
//! classifying a name-sorted stream do not re-read the reference each time.

use crate::errors::{PipelineError, SequenceRangeError};
use crate::types::{HashMap, HashMapExt};
use needletail::parse_fastx_file;
use noodles::fasta::fai;
use std::fs::File;
use std::io::{Read, Seek, SeekFrom};
use std::path::{Path, PathBuf};

/// A source of raw reference bases, addressed 0-based half-open.
pub trait ReferenceSource {
    /// Names and lengths of all sequences, in file order.
    fn sequences(&self) -> Vec<(String, usize)>;

    fn sequence_length(&self, name: &str) -> Option<usize>;

    /// Read bases `[start, end)` of `name`. Callers guarantee the bounds.
    fn read_window(&mut self, name: &str, start: usize, end: usize) -> std::io::Result<Vec<u8>>;
}

/// All sequences held in memory.
#[derive(Debug, Default)]
pub struct FastaDb {
    names: Vec<String>,
    seqs: HashMap<String, Vec<u8>>,
}

impl FastaDb {
    pub fn load(path: &Path) -> Result<Self, PipelineError> {
        let reference_error = |reason: String| PipelineError::Reference {
            path: path.to_path_buf(),
            reason,
        };
        let mut reader = parse_fastx_file(path).map_err(|e| reference_error(e.to_string()))?;
        let mut db = Self::default();

        while let Some(result) = reader.next() {
            let record = result.map_err(|e| reference_error(e.to_string()))?;
            // FASTA ids run up to the first whitespace
            let id = String::from_utf8_lossy(record.id()).to_string();
            let name = id.split_whitespace().next().unwrap_or("").to_string();
            db.insert(name, record.seq().to_vec());
        }

        Ok(db)
    }

    pub fn from_sequences<I, N, S>(sequences: I) -> Self
    where
        I: IntoIterator<Item = (N, S)>,
        N: Into<String>,
        S: AsRef<[u8]>,
    {
        let mut db = Self::default();
        for (name, seq) in sequences {
            db.insert(name.into(), seq.as_ref().to_vec());
        }
        db
    }

    fn insert(&mut self, name: String, seq: Vec<u8>) {
        if !self.seqs.contains_key(&name) {
            self.names.push(name.clone());
        }
        self.seqs.insert(name, seq);
    }
}

impl ReferenceSource for FastaDb {
    fn sequences(&self) -> Vec<(String, usize)> {
        self.names
            .iter()
            .map(|name| (name.clone(), self.seqs.get(name).map_or(0, |s| s.len())))
            .collect()
    }

    fn sequence_length(&self, name: &str) -> Option<usize> {
        self.seqs.get(name).map(|s| s.len())
    }

    fn read_window(&mut self, name: &str, start: usize, end: usize) -> std::io::Result<Vec<u8>> {
        self.seqs
            .get(name)
            .and_then(|seq| seq.get(start..end))
            .map(|s| s.to_vec())
            .ok_or_else(|| std::io::Error::other(format!("{name}:{start}-{end} not available")))
    }
}

/// A FASTA file read window by window through its `.fai` index.
pub struct IndexedFasta {
    file: File,
    records: Vec<fai::Record>,
    by_name: HashMap<String, usize>,
}

impl IndexedFasta {
    pub fn open(fasta_path: &Path, fai_path: &Path) -> Result<Self, PipelineError> {
        let reference_error = |reason: String| PipelineError::Reference {
            path: fasta_path.to_path_buf(),
            reason,
        };
        let index = fai::fs::read(fai_path).map_err(|e| reference_error(e.to_string()))?;
        let records: Vec<fai::Record> = index.as_ref().to_vec();
        let file = File::open(fasta_path).map_err(|e| reference_error(e.to_string()))?;

        let mut by_name = HashMap::with_capacity(records.len());
        for (i, record) in records.iter().enumerate() {
            let name = String::from_utf8_lossy(record.name().as_ref()).into_owned();
            by_name.insert(name, i);
        }

        Ok(Self { file, records, by_name })
    }

    /// Byte offset of 0-based base `pos` within the record's line layout.
    fn byte_offset(record: &fai::Record, pos: usize) -> u64 {
        let line_bases = record.line_bases().max(1);
        let line_width = record.line_width();
        let pos = pos as u64;
        record.offset() + (pos / line_bases) * line_width + pos % line_bases
    }
}

impl ReferenceSource for IndexedFasta {
    fn sequences(&self) -> Vec<(String, usize)> {
        self.records
            .iter()
            .map(|r| (String::from_utf8_lossy(r.name().as_ref()).into_owned(), r.length() as usize))
            .collect()
    }

    fn sequence_length(&self, name: &str) -> Option<usize> {
        self.by_name.get(name).map(|&i| self.records[i].length() as usize)
    }

    fn read_window(&mut self, name: &str, start: usize, end: usize) -> std::io::Result<Vec<u8>> {
        let idx = *self
            .by_name
            .get(name)
            .ok_or_else(|| std::io::Error::other(format!("{name} not in index")))?;
        let record = &self.records[idx];
        if start >= end {
            return Ok(Vec::new());
        }

        let first = Self::byte_offset(record, start);
        let last = Self::byte_offset(record, end - 1);
        let mut raw = vec![0u8; (last - first + 1) as usize];
        self.file.seek(SeekFrom::Start(first))?;
        self.file.read_exact(&mut raw)?;

        raw.retain(|b| *b != b'\n' && *b != b'\r');
        Ok(raw)
    }
}

/// Open a reference, preferring the `.fai`-indexed window reader.
pub fn open_reference(path: &Path) -> Result<Box<dyn ReferenceSource>, PipelineError> {
    match find_fai_path(path) {
        Some(fai_path) => {
            tracing::debug!(fai = %fai_path.display(), "using indexed reference");
            Ok(Box::new(IndexedFasta::open(path, &fai_path)?))
        }
        None => {
            tracing::debug!(
                fasta = %path.display(),
                "no .fai index, loading reference into memory"
            );
            Ok(Box::new(FastaDb::load(path)?))
        }
    }
}

fn find_fai_path(fasta_path: &Path) -> Option<PathBuf> {
    let appended = PathBuf::from(format!("{}.fai", fasta_path.display()));
    if appended.exists() {
        return Some(appended);
    }
    let replaced = fasta_path.with_extension("fai");
    replaced.exists().then_some(replaced)
}

#[derive(Debug)]
struct Window {
    chromosome: String,
    /// 0-based offset of `bases[0]`.
    start: usize,
    bases: Vec<u8>,
}

/// Window-caching front end over a `ReferenceSource`.
pub struct SequenceFetcher<S> {
    source: S,
    window_size: usize,
    window: Option<Window>,
    lengths: HashMap<String, usize>,
}

impl<S: ReferenceSource> SequenceFetcher<S> {
    pub fn new(source: S, window_size: usize) -> Self {
        let lengths = source.sequences().into_iter().collect();
        Self { source, window_size: window_size.max(1), window: None, lengths }
    }

    /// Chromosome name -> length, used to filter records to known references.
    pub fn chromosome_length(&self, chromosome: &str) -> Option<usize> {
        self.lengths.get(chromosome).copied()
    }

    /// Uppercase bases `start..=stop` (1-based, inclusive) of `chromosome`.
    pub fn sub_sequence(
        &mut self,
        chromosome: &str,
        start: usize,
        stop: usize,
    ) -> Result<Vec<u8>, SequenceRangeError> {
        let length = self
            .chromosome_length(chromosome)
            .ok_or_else(|| SequenceRangeError::UnknownChromosome(chromosome.to_string()))?;
        if start == 0 || stop < start || stop > length {
            return Err(SequenceRangeError::OutOfRange {
                chromosome: chromosome.to_string(),
                start,
                stop,
                length,
            });
        }

        let (from, to) = (start - 1, stop);
        let cached = self.window.as_ref().is_some_and(|w| {
            w.chromosome == chromosome && w.start <= from && to <= w.start + w.bases.len()
        });
        if !cached {
            let window_end = length.min(from + self.window_size.max(to - from));
            let bases = self
                .source
                .read_window(chromosome, from, window_end)
                .map_err(|e| SequenceRangeError::Read {
                    chromosome: chromosome.to_string(),
                    reason: e.to_string(),
                })?;
            self.window = Some(Window { chromosome: chromosome.to_string(), start: from, bases });
        }

        let window = self.window.as_ref().ok_or_else(|| SequenceRangeError::Read {
            chromosome: chromosome.to_string(),
            reason: "window missing".to_string(),
        })?;
        let offset = from - window.start;
        window
            .bases
            .get(offset..offset + (to - from))
            .map(|s| s.to_ascii_uppercase())
            .ok_or_else(|| SequenceRangeError::Read {
                chromosome: chromosome.to_string(),
                reason: "short window read".to_string(),
            })
    }
}

impl<S: ReferenceSource + ?Sized> ReferenceSource for Box<S> {
    fn sequences(&self) -> Vec<(String, usize)> {
        (**self).sequences()
    }

    fn sequence_length(&self, name: &str) -> Option<usize> {
        (**self).sequence_length(name)
    }

    fn read_window(&mut self, name: &str, start: usize, end: usize) -> std::io::Result<Vec<u8>> {
        (**self).read_window(name, start, end)
    }
}
