use clap::Parser;
use mapclass_rs::{Orientation, PipelineConfig};
use std::path::PathBuf;

#[derive(Parser, Debug)]
#[command(
    name = "mapclass-rs",
    about = "Classify read mappings against a reference and reconcile read pairs",
    version
)]
pub struct Args {
    /// Input BAM (any sort order)
    pub in_bam: PathBuf,

    /// Reference FASTA; a .fai next to it is used when present
    #[arg(short = 'r', long = "reference", value_name = "FASTA")]
    pub reference: PathBuf,

    /// Output BAM path (coordinate-sorted, indexed)
    #[arg(short = 'o', long = "out", value_name = "BAM")]
    pub out_bam: PathBuf,

    /// Input is paired-end; reconcile mates after classification
    #[arg(long)]
    pub paired: bool,

    /// Expected mate orientation: fr, rf or ff
    #[arg(long, default_value = "fr", value_name = "ORIENTATION")]
    pub orientation: Orientation,

    /// Nominal insert size
    #[arg(long, default_value_t = 300)]
    pub distance: u32,

    /// Allowed insert size deviation in percent (1-100)
    #[arg(long, default_value_t = 10)]
    pub deviation: u32,

    /// Directory for sort chunks and intermediate files
    #[arg(long, value_name = "DIR")]
    pub tmp_dir: Option<PathBuf>,

    /// Records held in memory per sort chunk
    #[arg(long, default_value_t = 500_000)]
    pub sort_chunk_records: usize,

    /// Individual record errors reported before summarising
    #[arg(long = "max-errors", default_value_t = 100)]
    pub max_errors: usize,

    /// Suppress progress messages and set logging level to WARN
    #[arg(short = 'q', long)]
    pub quiet: bool,
}

impl Args {
    pub fn pipeline_config(&self) -> PipelineConfig {
        PipelineConfig {
            paired: self.paired,
            orientation: self.orientation,
            distance: self.distance,
            deviation_percent: self.deviation,
            sort_chunk_records: self.sort_chunk_records,
            temp_dir: self.tmp_dir.clone(),
            max_reported_errors: self.max_errors,
            ..PipelineConfig::default()
        }
    }
}
