//! Fixed-capacity batching of data lines and throughput reporting.

use std::{fmt::Display, io::Write, time::Duration};

use observability_deps::tracing::info;
use tokio::time::Instant;

use crate::{session::ImportSession, transport::Transport, writer::BatchWriter};

/// Number of lines sent to the server in a single write.
pub const DEFAULT_BATCH_SIZE: usize = 5_000;

/// A throughput sample is logged each time the processed count crosses a multiple of this.
pub const DEFAULT_REPORT_INTERVAL: u64 = 100_000;

/// An ordered, capacity-bounded buffer of raw data lines.
#[derive(Debug, Clone)]
pub struct Batch {
    lines: Vec<Vec<u8>>,
    capacity: usize,
}

impl Batch {
    /// Create an empty batch; a `capacity` of `0` is treated as `1`.
    pub fn new(capacity: usize) -> Self {
        let capacity = capacity.max(1);
        Self {
            lines: Vec::with_capacity(capacity),
            capacity,
        }
    }

    /// Append a line, returning `true` once the batch is full.
    pub fn push(&mut self, line: Vec<u8>) -> bool {
        self.lines.push(line);
        self.is_full()
    }

    pub fn is_full(&self) -> bool {
        self.lines.len() >= self.capacity
    }

    pub fn is_empty(&self) -> bool {
        self.lines.is_empty()
    }

    pub fn len(&self) -> usize {
        self.lines.len()
    }

    pub fn capacity(&self) -> usize {
        self.capacity
    }

    pub fn lines(&self) -> &[Vec<u8>] {
        &self.lines
    }

    /// The newline-delimited write body for the buffered lines.
    pub fn body(&self) -> Vec<u8> {
        self.lines.join(&b'\n')
    }

    /// Empty the batch, keeping its allocation.
    pub fn clear(&mut self) {
        self.lines.clear();
    }
}

/// Processed-line throughput at a point in the run.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ThroughputSample {
    pub processed: u64,
    pub elapsed: Duration,
}

impl ThroughputSample {
    pub fn points_per_second(&self) -> u64 {
        let secs = self.elapsed.as_secs_f64();
        if secs > 0.0 {
            (self.processed as f64 / secs) as u64
        } else {
            self.processed
        }
    }
}

impl Display for ThroughputSample {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(
            f,
            "Processed {} lines.  Time elapsed: {}.  Points per second (PPS): {}",
            self.processed,
            humantime::format_duration(self.elapsed),
            self.points_per_second()
        )
    }
}

/// Produces a [`ThroughputSample`] each time the processed count crosses a multiple of the
/// reporting interval.
#[derive(Debug, Clone, Copy)]
pub struct ThroughputReporter {
    interval: u64,
    reported: u64,
    start: Instant,
}

impl ThroughputReporter {
    pub fn new(start: Instant, interval: u64) -> Self {
        Self {
            interval: interval.max(1),
            reported: 0,
            start,
        }
    }

    /// Restart the clock that throughput is measured against.
    pub fn restart(&mut self, start: Instant) {
        self.start = start;
    }

    pub fn observe(&mut self, processed: u64, now: Instant) -> Option<ThroughputSample> {
        let crossed = processed / self.interval;
        if crossed <= self.reported {
            return None;
        }
        self.reported = crossed;
        Some(ThroughputSample {
            processed,
            elapsed: now.saturating_duration_since(self.start),
        })
    }
}

/// Buffers data lines into the session's batch and hands full batches to the writer.
#[derive(Debug, Clone, Copy)]
pub struct BatchAccumulator {
    reporter: ThroughputReporter,
}

impl BatchAccumulator {
    pub fn new(start: Instant, report_interval: u64) -> Self {
        Self {
            reporter: ThroughputReporter::new(start, report_interval),
        }
    }

    /// Mark the start of the data section; throughput is measured from here.
    pub fn start(&mut self, now: Instant) {
        self.reporter.restart(now);
    }

    /// Add a line to the batch, flushing it through `writer` once it is full.
    pub async fn accept<T, W>(
        &mut self,
        line: Vec<u8>,
        session: &mut ImportSession,
        writer: &mut BatchWriter<'_, T, W>,
    ) where
        T: Transport,
        W: Write + Send,
    {
        if !session.batch_mut().push(line) {
            return;
        }
        writer.flush(session).await;
        session.batch_mut().clear();

        if let Some(sample) = self
            .reporter
            .observe(session.counters().processed(), Instant::now())
        {
            info!("{sample}");
        }
    }

    /// Flush whatever is buffered, even an empty batch, at the end of the stream.
    pub async fn finish<T, W>(
        &mut self,
        session: &mut ImportSession,
        writer: &mut BatchWriter<'_, T, W>,
    ) where
        T: Transport,
        W: Write + Send,
    {
        writer.flush(session).await;
        session.batch_mut().clear();
    }
}
