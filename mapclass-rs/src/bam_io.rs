//! BAM reader/writer creation, header rewriting and indexing.

use bstr::BString;
use noodles::bam;
use noodles::bam::bai;
use noodles::sam;
use noodles::sam::alignment::RecordBuf;
use noodles::sam::alignment::io::Write as _;
use noodles::sam::header::record::value::Map;
use noodles::sam::header::record::value::map::header::tag as header_tag;
use std::fs::File;
use std::io;
use std::path::{Path, PathBuf};

pub type BamReader = bam::io::Reader<noodles::bgzf::io::Reader<File>>;

/// Sequential BAM input with its header.
pub struct BamInput {
    pub header: sam::Header,
    reader: BamReader,
}

impl BamInput {
    pub fn open(path: &Path) -> io::Result<Self> {
        let file = File::open(path)?;
        let mut reader = bam::io::Reader::new(file);
        let header = reader.read_header()?;
        Ok(Self { header, reader })
    }

    /// Read the next record into `record`. Returns `false` at end of file.
    pub fn read_next(&mut self, record: &mut RecordBuf) -> io::Result<bool> {
        Ok(self.reader.read_record_buf(&self.header, record)? != 0)
    }
}

/// BAM output that finishes its BGZF stream on `finish`.
pub struct BamOutput {
    header: sam::Header,
    writer: bam::io::Writer<noodles::bgzf::io::Writer<File>>,
}

impl BamOutput {
    pub fn create(path: &Path, header: &sam::Header) -> io::Result<Self> {
        let file = File::create(path)?;
        let mut writer = bam::io::Writer::new(file);
        writer.write_header(header)?;
        Ok(Self { header: header.clone(), writer })
    }

    pub fn write(&mut self, record: &RecordBuf) -> io::Result<()> {
        self.writer.write_alignment_record(&self.header, record)
    }

    pub fn finish(mut self) -> io::Result<()> {
        self.writer.try_finish()
    }
}

/// A read whose final record was cut short by a truncated file.
pub fn is_truncation(error: &io::Error) -> bool {
    error.kind() == io::ErrorKind::UnexpectedEof
}

/// Copy of `header` whose `@HD SO` field is `sort_order`.
pub fn with_sort_order(header: &sam::Header, sort_order: &str) -> io::Result<sam::Header> {
    let mut builder = sam::Header::builder();

    for (name, seq) in header.reference_sequences() {
        builder = builder.add_reference_sequence(name.as_slice(), seq.clone());
    }
    for (id, rg) in header.read_groups() {
        builder = builder.add_read_group(id.as_slice(), rg.clone());
    }
    for (id, pg) in header.programs().as_ref() {
        builder = builder.add_program(id.as_slice(), pg.clone());
    }
    for comment in header.comments() {
        builder = builder.add_comment(comment.clone());
    }

    let hd = Map::<sam::header::record::value::map::Header>::builder()
        .insert(header_tag::SORT_ORDER, BString::from(sort_order))
        .build()
        .map_err(io::Error::other)?;

    Ok(builder.set_header(hd).build())
}

pub fn index_path(bam_path: &Path) -> PathBuf {
    PathBuf::from(format!("{}.bai", bam_path.display()))
}

/// Build a BAI index over a coordinate-sorted BAM and write it next to it.
pub fn write_index(bam_path: &Path) -> io::Result<PathBuf> {
    let index = bam::fs::index(bam_path)?;
    let path = index_path(bam_path);
    let mut writer = bai::io::Writer::new(File::create(&path)?);
    writer.write_index(&index)?;
    Ok(path)
}
