//! Rate-throttled writes of a session's batch.

use std::io::{self, Write};

use influxdb_client::{Consistency, Precision};
use observability_deps::tracing::{debug, error};
use tokio::time::Instant;

use crate::{
    batch::Batch,
    session::ImportSession,
    throttle::{Admission, RateWindow},
    transport::Transport,
};

/// Sends batches through a [`Transport`], never faster than the configured rate.
///
/// Lines from a batch the server rejects are written verbatim to the capture sink so they can
/// be imported again on their own.
pub struct BatchWriter<'a, T, W> {
    transport: &'a T,
    capture: &'a mut W,
    window: RateWindow,
    precision: Option<Precision>,
    consistency: Option<Consistency>,
    flushes: u64,
}

impl<T: std::fmt::Debug, W> std::fmt::Debug for BatchWriter<'_, T, W> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("BatchWriter")
            .field("transport", &self.transport)
            .field("window", &self.window)
            .field("precision", &self.precision)
            .field("consistency", &self.consistency)
            .field("flushes", &self.flushes)
            .finish_non_exhaustive()
    }
}

impl<'a, T, W> BatchWriter<'a, T, W>
where
    T: Transport,
    W: Write + Send,
{
    pub fn new(
        transport: &'a T,
        capture: &'a mut W,
        points_per_second: u64,
        precision: Option<Precision>,
        consistency: Option<Consistency>,
    ) -> Self {
        Self {
            transport,
            capture,
            window: RateWindow::new(points_per_second, Instant::now()),
            precision,
            consistency,
            flushes: 0,
        }
    }

    /// Number of flushes requested so far, including empty ones.
    pub fn flushes(&self) -> u64 {
        self.flushes
    }

    pub fn window(&self) -> &RateWindow {
        &self.window
    }

    /// Start measuring the write rate from `now`.
    pub fn prime(&mut self, now: Instant) {
        self.window.reset(now);
    }

    /// Write the session's current batch and record the outcome in its counters.
    ///
    /// Waits while writing the batch now would exceed the rate limit. The batch itself is
    /// left in place for the caller to clear.
    pub async fn flush(&mut self, session: &mut ImportSession) {
        self.flushes += 1;
        let len = session.batch().len();
        if len == 0 {
            self.window.reset(Instant::now());
            return;
        }

        loop {
            match self.window.admit(len, Instant::now()) {
                Admission::Proceed => break,
                Admission::Wait(wait) => {
                    debug!(?wait, points = len, "throttling batch write");
                    tokio::time::sleep(wait).await;
                }
            }
        }

        let result = self
            .transport
            .write_batch(
                session.batch().body(),
                session.target_database().unwrap_or_default(),
                session.target_retention_policy(),
                self.precision,
                self.consistency,
            )
            .await;

        match result {
            Ok(()) => session.record_inserted(len),
            Err(e) => {
                error!(error = %e, points = len, "error writing batch");
                if let Err(e) = capture_lines(&mut *self.capture, session.batch()) {
                    error!(error = %e, "unable to record lines of the failed batch");
                }
                session.record_failed(len);
            }
        }

        self.window.reset(Instant::now());
    }
}

fn capture_lines<W: Write>(capture: &mut W, batch: &Batch) -> io::Result<()> {
    for line in batch.lines() {
        capture.write_all(line)?;
        capture.write_all(b"\n")?;
    }
    capture.flush()
}
