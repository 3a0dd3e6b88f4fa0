//! # Sink
//!
//! Delivery endpoints for serialized Embedded Metric Format documents

use super::context::MetricsContext;
use std::io::Write;
use std::sync::{Mutex, PoisonError};
use tracing::error;

/// Receives one serialized document per flush
///
/// The context is the state the document was written from, before the flush reset it.
/// Implementations own their delivery, a [MetricsLogger](super::MetricsLogger) neither
/// retries nor batches on their behalf.
pub trait Sink: Send + Sync {
    fn accept(&self, event: &str, context: &MetricsContext);
}

/// Writes each document as one line on stdout, where CloudWatch Logs picks it up in
/// Lambda and container log drivers
#[derive(Clone, Copy, Debug, Default)]
pub struct ConsoleSink;

impl Sink for ConsoleSink {
    fn accept(&self, event: &str, _context: &MetricsContext) {
        let mut stdout = std::io::stdout().lock();
        if let Err(e) = writeln!(stdout, "{event}") {
            error!("Failed to write metrics document to stdout: {e}");
        }
    }
}

/// Writes each document as one line to an implementation of [std::io::Write]
pub struct WriterSink<W> {
    writer: Mutex<W>,
}

impl<W: Write + Send> WriterSink<W> {
    pub fn new(writer: W) -> Self {
        Self {
            writer: Mutex::new(writer),
        }
    }

    /// Consumes the sink, returning the wrapped writer
    pub fn into_inner(self) -> W {
        self.writer.into_inner().unwrap_or_else(PoisonError::into_inner)
    }
}

impl<W: Write + Send> Sink for WriterSink<W> {
    fn accept(&self, event: &str, _context: &MetricsContext) {
        let mut writer = self.writer.lock().unwrap_or_else(PoisonError::into_inner);
        if let Err(e) = writeln!(writer, "{event}").and_then(|_| writer.flush()) {
            error!("Failed to write metrics document: {e}");
        }
    }
}

/// Keeps every document and a copy of the context it came from
///
/// Meant for tests asserting on what a logger emitted.
#[derive(Default)]
pub struct CapturingSink {
    captured: Mutex<Vec<(String, MetricsContext)>>,
}

impl CapturingSink {
    pub fn new() -> Self {
        Self::default()
    }

    /// All documents received so far, oldest first
    pub fn events(&self) -> Vec<String> {
        self.lock().iter().map(|(event, _)| event.clone()).collect()
    }

    pub fn last_event(&self) -> Option<String> {
        self.lock().last().map(|(event, _)| event.clone())
    }

    pub fn last_context(&self) -> Option<MetricsContext> {
        self.lock().last().map(|(_, context)| context.clone())
    }

    pub fn len(&self) -> usize {
        self.lock().len()
    }

    pub fn is_empty(&self) -> bool {
        self.lock().is_empty()
    }

    fn lock(&self) -> std::sync::MutexGuard<'_, Vec<(String, MetricsContext)>> {
        self.captured.lock().unwrap_or_else(PoisonError::into_inner)
    }
}

impl Sink for CapturingSink {
    fn accept(&self, event: &str, context: &MetricsContext) {
        self.lock().push((event.to_owned(), context.clone()));
    }
}
