//! Progress and error notifications emitted by the pipeline.
//!
//! The pipeline never talks to a UI. It pushes `PipelineEvent`s into an
//! `EventSink`; the surrounding application decides where they go (the
//! binary forwards them over a `crossfire` channel to a reporter thread).

use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum PipelineEvent {
    /// Number of records processed so far in the current stage.
    Progress(u64),
    Warning(String),
    Error(String),
}

pub trait EventSink {
    fn emit(&mut self, event: PipelineEvent);
}

/// Sink that forwards every event to `tracing`.
#[derive(Debug, Default, Clone, Copy)]
pub struct TracingSink;

impl EventSink for TracingSink {
    fn emit(&mut self, event: PipelineEvent) {
        match event {
            PipelineEvent::Progress(n) => tracing::debug!(records = n, "progress"),
            PipelineEvent::Warning(msg) => tracing::warn!("{msg}"),
            PipelineEvent::Error(msg) => tracing::error!("{msg}"),
        }
    }
}

/// Sink backed by a closure, e.g. a channel sender.
pub struct CallbackSink<F>(pub F);

impl<F: FnMut(PipelineEvent)> EventSink for CallbackSink<F> {
    fn emit(&mut self, event: PipelineEvent) {
        (self.0)(event)
    }
}

/// Collects events in memory.
#[derive(Debug, Default)]
pub struct CollectingSink {
    pub events: Vec<PipelineEvent>,
}

impl EventSink for CollectingSink {
    fn emit(&mut self, event: PipelineEvent) {
        self.events.push(event);
    }
}

impl<S: EventSink + ?Sized> EventSink for &mut S {
    fn emit(&mut self, event: PipelineEvent) {
        (**self).emit(event)
    }
}

/// Caps the number of per-record error messages for one pipeline run.
///
/// After `max_reported` messages only the count grows; `finish` emits a
/// single summary for the suppressed rest.
#[derive(Debug, Clone)]
pub struct ErrorLimiter {
    max_reported: usize,
    seen: usize,
}

impl ErrorLimiter {
    pub fn new(max_reported: usize) -> Self {
        Self { max_reported, seen: 0 }
    }

    pub fn report(&mut self, sink: &mut dyn EventSink, message: impl Into<String>) {
        self.seen += 1;
        if self.seen <= self.max_reported {
            sink.emit(PipelineEvent::Error(message.into()));
        }
    }

    pub fn seen(&self) -> usize {
        self.seen
    }

    pub fn suppressed(&self) -> usize {
        self.seen.saturating_sub(self.max_reported)
    }

    pub fn finish(&mut self, sink: &mut dyn EventSink) {
        let suppressed = self.suppressed();
        if suppressed > 0 {
            sink.emit(PipelineEvent::Warning(format!("{suppressed} more errors occurred")));
        }
    }
}

/// Shared cancellation flag, checked by the pipeline between records.
#[derive(Debug, Clone, Default)]
pub struct CancellationFlag(Arc<AtomicBool>);

impl CancellationFlag {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn cancel(&self) {
        self.0.store(true, Ordering::Relaxed);
    }

    pub fn is_cancelled(&self) -> bool {
        self.0.load(Ordering::Relaxed)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_limiter_caps_messages_and_summarises() {
        let mut sink = CollectingSink::default();
        let mut limiter = ErrorLimiter::new(2);
        for i in 0..5 {
            limiter.report(&mut sink, format!("bad record {i}"));
        }
        limiter.finish(&mut sink);

        assert_eq!(limiter.seen(), 5);
        assert_eq!(
            sink.events,
            vec![
                PipelineEvent::Error("bad record 0".to_string()),
                PipelineEvent::Error("bad record 1".to_string()),
                PipelineEvent::Warning("3 more errors occurred".to_string()),
            ]
        );
    }

    #[test]
    fn test_limiter_silent_finish_when_under_cap() {
        let mut sink = CollectingSink::default();
        let mut limiter = ErrorLimiter::new(100);
        limiter.report(&mut sink, "one");
        limiter.finish(&mut sink);
        assert_eq!(sink.events.len(), 1);
    }

    #[test]
    fn test_cancellation_is_shared() {
        let flag = CancellationFlag::new();
        let clone = flag.clone();
        assert!(!flag.is_cancelled());
        clone.cancel();
        assert!(flag.is_cancelled());
    }
}
