mod cli;

use anyhow::{Context, Result};
use clap::Parser;
use crossfire::mpmc;
use mapclass_rs::{CallbackSink, CancellationFlag, PipelineEvent, StrandMode, import_track};
use mimalloc::MiMalloc;
use std::thread;
use tracing_subscriber::EnvFilter;

#[global_allocator]
static GLOBAL: MiMalloc = MiMalloc;

const EVENT_QUEUE: usize = 256;

fn main() -> Result<()> {
    let args = cli::Args::parse();

    // Initialize tracing subscriber
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| {
        if args.quiet {
            EnvFilter::new("warn")
        } else {
            EnvFilter::new("info")
        }
    });
    tracing_subscriber::fmt().with_env_filter(filter).init();

    let config = args.pipeline_config();
    let cancel = CancellationFlag::new();

    crossfire::detect_backoff_cfg();
    let (tx_events, rx_events) = mpmc::bounded_blocking::<PipelineEvent>(EVENT_QUEUE);
    let quiet = args.quiet;
    let reporter = thread::spawn(move || {
        while let Ok(event) = rx_events.recv() {
            match event {
                PipelineEvent::Progress(n) if !quiet => tracing::info!(records = n, "progress"),
                PipelineEvent::Progress(_) => {}
                PipelineEvent::Warning(msg) => tracing::warn!("{msg}"),
                PipelineEvent::Error(msg) => tracing::error!("{msg}"),
            }
        }
    });

    let mut sink = CallbackSink(move |event: PipelineEvent| {
        let _ = tx_events.send(event);
    });
    let result = import_track(
        &args.in_bam,
        &args.reference,
        &args.out_bam,
        &config,
        &mut sink,
        &cancel,
    );
    drop(sink);
    let _ = reporter.join();

    let track = result.with_context(|| format!("importing {}", args.in_bam.display()))?;
    let stats = &track.statistics;
    tracing::info!(
        total_reads = stats.total_reads,
        mappings = stats.mappings.total,
        perfect = stats.mappings.perfect,
        best = stats.mappings.best,
        unique = stats.mappings.unique,
        unmapped = track.counts.unmapped,
        nameless = track.counts.nameless,
        rejected = track.counts.rejected,
        "mapping classes"
    );
    for mode in StrandMode::ALL {
        tracing::info!(
            strand = ?mode,
            intervals = stats.coverage.get(mode).len(),
            "coverage"
        );
    }
    if let Some(pairs) = &stats.pairs {
        tracing::info!(
            pairs = pairs.pairs(),
            unpaired = pairs.count(mapclass_rs::PairType::Unpaired),
            "read pairs"
        );
    }
    tracing::info!(
        output = %track.output.display(),
        index = %track.index.display(),
        "mapclass-rs: processing complete"
    );
    Ok(())
}
