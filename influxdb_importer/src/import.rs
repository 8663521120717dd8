//! Drives an import run from the dump to the server.

use std::io::{self, BufRead, Write};

use observability_deps::tracing::{debug, error, info, warn};
use tokio::time::Instant;

use crate::{
    Error, Result,
    batch::BatchAccumulator,
    config::ImportConfig,
    directive::{Directive, DirectiveScanner, ScanState},
    input,
    session::{ImportCounters, ImportSession},
    transport::Transport,
    writer::BatchWriter,
};

/// Imports a dump through a [`Transport`].
///
/// Lines of batches the server rejects are written to the capture sink, which is stdout unless
/// another one is supplied with [`Importer::with_capture`].
pub struct Importer<T, W = io::Stdout> {
    config: ImportConfig,
    transport: T,
    capture: W,
}

impl<T: std::fmt::Debug, W> std::fmt::Debug for Importer<T, W> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Importer")
            .field("config", &self.config)
            .field("transport", &self.transport)
            .finish_non_exhaustive()
    }
}

impl<T: Transport> Importer<T> {
    pub fn new(config: ImportConfig, transport: T) -> Self {
        Self {
            config,
            transport,
            capture: io::stdout(),
        }
    }
}

impl<T, W> Importer<T, W>
where
    T: Transport,
    W: Write + Send,
{
    /// Replace the sink that lines of failed batches are written to.
    pub fn with_capture<C: Write + Send>(self, capture: C) -> Importer<T, C> {
        Importer {
            config: self.config,
            transport: self.transport,
            capture,
        }
    }

    pub fn transport(&self) -> &T {
        &self.transport
    }

    pub fn capture(&self) -> &W {
        &self.capture
    }

    /// Check the server is reachable, then import the configured dump file.
    pub async fn run(&mut self) -> Result<ImportCounters> {
        self.transport.ping().await.map_err(Error::Connect)?;
        debug!("server is reachable");

        let path = self.config.path.clone().ok_or(Error::MissingPath)?;
        let reader = input::open(&path, self.config.compressed)?;
        info!(path = %path.display(), compressed = self.config.compressed, "importing");
        self.import(reader).await
    }

    /// Import the dump read from `reader`.
    ///
    /// Every data line is attempted exactly once. A failed batch does not stop the import;
    /// once the dump is exhausted the number of points that could not be written is returned
    /// as [`Error::PointsNotInserted`]. A read error ends the import early, after the lines
    /// already buffered are written.
    ///
    /// Lines are not required to be UTF-8; data lines are written exactly as read.
    pub async fn import<R: BufRead + Send>(&mut self, mut reader: R) -> Result<ImportCounters> {
        let Self {
            config,
            transport,
            capture,
        } = self;

        let mut pipeline = Pipeline {
            transport: &*transport,
            scanner: DirectiveScanner::default(),
            session: ImportSession::new(config.overrides(), config.batch_size),
            writer: BatchWriter::new(
                &*transport,
                capture,
                config.points_per_second,
                config.precision,
                config.consistency,
            ),
            accumulator: BatchAccumulator::new(Instant::now(), config.report_interval),
        };

        let mut read_error = None;
        loop {
            let mut line = Vec::new();
            match reader.read_until(b'\n', &mut line) {
                Ok(0) => break,
                Ok(_) => {
                    strip_line_ending(&mut line);
                    pipeline.process(line).await;
                }
                Err(e) => {
                    read_error = Some(e);
                    break;
                }
            }
        }

        if read_error.is_none() && pipeline.scanner.state() == ScanState::Schema {
            warn!("no data section marker found in the dump");
            pipeline.begin_data().await;
        }
        pipeline
            .accumulator
            .finish(&mut pipeline.session, &mut pipeline.writer)
            .await;

        let counters = pipeline.session.counters();
        if counters.processed() > 0 {
            info!("{counters}");
        }

        if let Some(e) = read_error {
            return Err(Error::Read(e));
        }
        if counters.failed_inserts > 0 {
            return Err(Error::PointsNotInserted {
                count: counters.failed_inserts,
            });
        }
        Ok(counters)
    }
}

/// State threaded through a single pass over the dump.
struct Pipeline<'a, T, W> {
    transport: &'a T,
    scanner: DirectiveScanner,
    session: ImportSession,
    writer: BatchWriter<'a, T, W>,
    accumulator: BatchAccumulator,
}

impl<T, W> Pipeline<'_, T, W>
where
    T: Transport,
    W: Write + Send,
{
    async fn process(&mut self, line: Vec<u8>) {
        match self.scanner.classify(&line) {
            Directive::Blank | Directive::Comment => {}
            Directive::SchemaCommand(command) => self
                .session
                .set_schema_command(&String::from_utf8_lossy(command)),
            Directive::DataSection => self.begin_data().await,
            Directive::ContextDatabase(db) => {
                let db = String::from_utf8_lossy(db);
                if self.session.set_context_database(&db) {
                    debug!(%db, "switched target database");
                }
            }
            Directive::ContextRetentionPolicy(rp) => {
                let rp = String::from_utf8_lossy(rp);
                if self.session.set_context_retention_policy(&rp) {
                    debug!(%rp, "switched target retention policy");
                }
            }
            Directive::Data(_) => {
                self.accumulator
                    .accept(line, &mut self.session, &mut self.writer)
                    .await
            }
        }
    }

    /// Apply overrides and create the destination before any data is written.
    async fn begin_data(&mut self) {
        self.session.apply_overrides();

        match self.session.schema_command().map(ToOwned::to_owned) {
            Some(command) => {
                self.session.record_command();
                let database = self.session.target_database().map(ToOwned::to_owned);
                match self.transport.query(&command, database.as_deref()).await {
                    Ok(()) => info!(%command, "schema command succeeded"),
                    Err(e) => error!(error = %e, %command, "schema command failed"),
                }
            }
            None => warn!("no schema command found before the data section"),
        }

        let now = Instant::now();
        self.writer.prime(now);
        self.accumulator.start(now);
    }
}

/// Drop a trailing `\n` or `\r\n`.
fn strip_line_ending(line: &mut Vec<u8>) {
    if line.last() == Some(&b'\n') {
        line.pop();
        if line.last() == Some(&b'\r') {
            line.pop();
        }
    }
}

#[cfg(test)]
mod tests {
    use std::io::Read;

    use super::*;
    use crate::transport::mock::MockTransport;

    const DUMP: &str = "\
# DDL
CREATE DATABASE foo WITH NAME autogen

# DML
# CONTEXT-DATABASE: foo
# CONTEXT-RETENTION-POLICY: autogen
cpu,host=a usage=1 1
cpu,host=b usage=2 2
cpu,host=c usage=3 3
";

    fn importer(
        config: ImportConfig,
        transport: MockTransport,
    ) -> Importer<MockTransport, Vec<u8>> {
        Importer::new(config, transport).with_capture(Vec::new())
    }

    fn captured(importer: &Importer<MockTransport, Vec<u8>>) -> &str {
        std::str::from_utf8(importer.capture()).unwrap()
    }

    #[tokio::test]
    async fn imports_into_the_dump_context() {
        let mut importer = importer(ImportConfig::default(), MockTransport::default());

        let counters = importer.import(DUMP.as_bytes()).await.unwrap();

        assert_eq!(
            counters,
            ImportCounters {
                total_commands: 1,
                total_inserts: 3,
                failed_inserts: 0,
            }
        );
        let transport = importer.transport();
        assert_eq!(
            transport.queries()[0].command,
            "CREATE DATABASE foo WITH NAME autogen"
        );
        let writes = transport.writes();
        assert_eq!(writes.len(), 1);
        assert_eq!(writes[0].database, "foo");
        assert_eq!(writes[0].retention_policy.as_deref(), Some("autogen"));
        assert_eq!(
            writes[0].lines(),
            [
                "cpu,host=a usage=1 1",
                "cpu,host=b usage=2 2",
                "cpu,host=c usage=3 3"
            ]
        );
        assert!(captured(&importer).is_empty());
    }

    #[tokio::test]
    async fn trailing_partial_batch_is_flushed_at_end_of_input() {
        let dump = "# DDL\nCREATE DATABASE foo\n# DML\n# CONTEXT-DATABASE: foo\nm,t=1 v=1 0\n";
        let mut importer = importer(ImportConfig::default(), MockTransport::default());

        let counters = importer.import(dump.as_bytes()).await.unwrap();

        assert_eq!(counters.total_inserts, 1);
        assert_eq!(importer.transport().queries()[0].command, "CREATE DATABASE foo");
        let writes = importer.transport().writes();
        assert_eq!(writes.len(), 1);
        assert_eq!(writes[0].database, "foo");
        assert_eq!(writes[0].retention_policy, None);
        assert_eq!(writes[0].lines(), ["m,t=1 v=1 0"]);
    }

    #[tokio::test]
    async fn repeated_schema_section_yields_the_same_command() {
        let dump = "# DDL\nCREATE DATABASE foo\n# DDL\nCREATE DATABASE foo\n# DML\n";
        let mut importer = importer(ImportConfig::default(), MockTransport::default());

        importer.import(dump.as_bytes()).await.unwrap();

        let queries = importer.transport().queries();
        assert_eq!(queries.len(), 1);
        assert_eq!(queries[0].command, "CREATE DATABASE foo");
        assert_eq!(queries[0].database, None);
    }

    #[tokio::test]
    async fn database_override() {
        let config = ImportConfig {
            database: Some("bar".to_string()),
            ..Default::default()
        };
        let mut importer = importer(config, MockTransport::default());

        importer.import(DUMP.as_bytes()).await.unwrap();

        let transport = importer.transport();
        let queries = transport.queries();
        assert_eq!(queries[0].command, "CREATE DATABASE bar");
        assert_eq!(queries[0].database.as_deref(), Some("bar"));
        let writes = transport.writes();
        assert_eq!(writes[0].database, "bar");
        assert_eq!(writes[0].retention_policy.as_deref(), Some("autogen"));
    }

    #[tokio::test]
    async fn retention_policy_override() {
        let config = ImportConfig {
            retention_policy: Some("one_week".to_string()),
            ..Default::default()
        };
        let mut importer = importer(config, MockTransport::default());

        importer.import(DUMP.as_bytes()).await.unwrap();

        let transport = importer.transport();
        assert_eq!(
            transport.queries()[0].command,
            "CREATE DATABASE foo WITH NAME autogen"
        );
        let writes = transport.writes();
        assert_eq!(writes[0].database, "foo");
        assert_eq!(writes[0].retention_policy.as_deref(), Some("one_week"));
    }

    #[tokio::test]
    async fn full_batches_are_flushed_in_order() {
        let config = ImportConfig {
            batch_size: 2,
            ..Default::default()
        };
        let mut importer = importer(config, MockTransport::default());

        let counters = importer.import(DUMP.as_bytes()).await.unwrap();

        assert_eq!(counters.total_inserts, 3);
        let writes = importer.transport().writes();
        assert_eq!(writes.len(), 2);
        assert_eq!(
            writes[0].lines(),
            ["cpu,host=a usage=1 1", "cpu,host=b usage=2 2"]
        );
        assert_eq!(writes[1].lines(), ["cpu,host=c usage=3 3"]);
    }

    #[tokio::test]
    async fn failed_batch_is_captured_and_reported() {
        let mut importer = importer(
            ImportConfig::default(),
            MockTransport::default().with_failing_write(0),
        );

        let err = importer.import(DUMP.as_bytes()).await.unwrap_err();

        assert_eq!(err.to_string(), "3 points were not inserted");
        assert_eq!(
            captured(&importer),
            "cpu,host=a usage=1 1\ncpu,host=b usage=2 2\ncpu,host=c usage=3 3\n"
        );
    }

    #[tokio::test]
    async fn single_failed_point() {
        let config = ImportConfig {
            batch_size: 2,
            ..Default::default()
        };
        let mut importer = importer(config, MockTransport::default().with_failing_write(1));

        let err = importer.import(DUMP.as_bytes()).await.unwrap_err();

        assert!(matches!(err, Error::PointsNotInserted { count: 1 }), "{err}");
        assert_eq!(err.to_string(), "1 point was not inserted");
        assert_eq!(captured(&importer), "cpu,host=c usage=3 3\n");
    }

    #[tokio::test]
    async fn every_line_is_attempted_once() {
        let mut dump = String::from("CREATE DATABASE foo\n# DML\n# CONTEXT-DATABASE: foo\n");
        for i in 0..10 {
            dump.push_str(&format!("m v={i} {i}\n"));
        }
        let config = ImportConfig {
            batch_size: 3,
            ..Default::default()
        };
        let mut importer = importer(config, MockTransport::default().with_failing_write(1));

        let err = importer.import(dump.as_bytes()).await.unwrap_err();

        assert!(matches!(err, Error::PointsNotInserted { count: 3 }), "{err}");
        let writes = importer.transport().writes();
        assert_eq!(writes.len(), 4);
        let written: Vec<String> = writes
            .iter()
            .flat_map(|w| w.lines())
            .collect();
        let expected: Vec<String> = (0..10).map(|i| format!("m v={i} {i}")).collect();
        assert_eq!(written, expected);
        assert_eq!(captured(&importer), "m v=3 3\nm v=4 4\nm v=5 5\n");
    }

    #[tokio::test]
    async fn context_switches_apply_to_later_batches() {
        let dump = "\
# DML
# CONTEXT-DATABASE: foo
# CONTEXT-RETENTION-POLICY: autogen
m v=1 1
# CONTEXT-DATABASE: baz
# CONTEXT-RETENTION-POLICY: one_week
m v=2 2
";
        let config = ImportConfig {
            batch_size: 1,
            ..Default::default()
        };
        let mut importer = importer(config, MockTransport::default());

        let counters = importer.import(dump.as_bytes()).await.unwrap();

        // nothing before the marker, so no schema command was issued
        assert_eq!(counters.total_commands, 0);
        assert!(importer.transport().queries().is_empty());
        let writes = importer.transport().writes();
        assert_eq!(writes.len(), 2);
        assert_eq!(writes[0].database, "foo");
        assert_eq!(writes[0].retention_policy.as_deref(), Some("autogen"));
        assert_eq!(writes[1].database, "baz");
        assert_eq!(writes[1].retention_policy.as_deref(), Some("one_week"));
    }

    #[tokio::test]
    async fn last_schema_command_wins() {
        let dump = "CREATE DATABASE a\n\nCREATE DATABASE b\n# DML\n";
        let mut importer = importer(ImportConfig::default(), MockTransport::default());

        let counters = importer.import(dump.as_bytes()).await.unwrap();

        assert_eq!(counters.total_commands, 1);
        let queries = importer.transport().queries();
        assert_eq!(queries.len(), 1);
        assert_eq!(queries[0].command, "CREATE DATABASE b");
        assert!(importer.transport().writes().is_empty());
    }

    #[tokio::test]
    async fn missing_marker() {
        let dump = "CREATE DATABASE foo\ncpu v=1 1\n";
        let mut importer = importer(ImportConfig::default(), MockTransport::default());

        let counters = importer.import(dump.as_bytes()).await.unwrap();

        // every line before a marker is a schema candidate, so nothing is written
        assert_eq!(counters.total_inserts, 0);
        assert!(importer.transport().writes().is_empty());
        assert_eq!(importer.transport().queries()[0].command, "cpu v=1 1");
    }

    #[tokio::test]
    async fn failed_schema_command_does_not_stop_the_import() {
        let mut importer = importer(
            ImportConfig::default(),
            MockTransport::default().with_failing_queries(),
        );

        let counters = importer.import(DUMP.as_bytes()).await.unwrap();

        assert_eq!(counters.total_commands, 1);
        assert_eq!(counters.total_inserts, 3);
    }

    #[tokio::test]
    async fn lines_that_are_not_utf8_are_forwarded() {
        let dump = b"CREATE DATABASE foo\n# DML\n# CONTEXT-DATABASE: foo\n\
m,city=M\xfcnchen v=1 1\nm v=2 2\r\nm v=3 3\n";
        let mut importer = importer(ImportConfig::default(), MockTransport::default());

        let counters = importer.import(&dump[..]).await.unwrap();

        assert_eq!(counters.total_inserts, 3);
        let writes = importer.transport().writes();
        assert_eq!(writes.len(), 1);
        assert_eq!(writes[0].body, b"m,city=M\xfcnchen v=1 1\nm v=2 2\nm v=3 3");
    }

    #[tokio::test]
    async fn lines_that_are_not_utf8_are_captured_when_rejected() {
        let dump = b"# DML\n# CONTEXT-DATABASE: foo\nm,city=M\xfcnchen v=1 1\nm v=2 2\n";
        let mut importer = importer(
            ImportConfig::default(),
            MockTransport::default().with_failing_write(0),
        );

        let err = importer.import(&dump[..]).await.unwrap_err();

        assert!(matches!(err, Error::PointsNotInserted { count: 2 }), "{err}");
        assert_eq!(importer.capture(), b"m,city=M\xfcnchen v=1 1\nm v=2 2\n");
    }

    /// Yields `data`, then fails every read.
    struct FailingReader<'a> {
        data: &'a [u8],
    }

    impl Read for FailingReader<'_> {
        fn read(&mut self, buf: &mut [u8]) -> io::Result<usize> {
            if self.data.is_empty() {
                return Err(io::Error::other("connection reset"));
            }
            self.data.read(buf)
        }
    }

    #[tokio::test]
    async fn read_error_after_buffered_lines_are_written() {
        let reader = io::BufReader::new(FailingReader {
            data: b"# DML\n# CONTEXT-DATABASE: foo\nm v=1 1\nm v=2",
        });
        let mut importer = importer(ImportConfig::default(), MockTransport::default());

        let err = importer.import(reader).await.unwrap_err();

        assert!(matches!(err, Error::Read(_)), "{err}");
        let writes = importer.transport().writes();
        assert_eq!(writes.len(), 1);
        assert_eq!(writes[0].lines(), ["m v=1 1"]);
    }

    #[tokio::test]
    async fn unreachable_server() {
        let config = ImportConfig {
            path: Some("/does/not/matter".into()),
            ..Default::default()
        };
        let mut importer = importer(config, MockTransport::unreachable());

        let err = importer.run().await.unwrap_err();

        assert!(matches!(err, Error::Connect(_)), "{err}");
        assert!(importer.transport().queries().is_empty());
    }

    #[tokio::test]
    async fn path_required() {
        let mut importer = importer(ImportConfig::default(), MockTransport::default());

        let err = importer.run().await.unwrap_err();

        assert!(matches!(err, Error::MissingPath), "{err}");
        assert_eq!(err.to_string(), "file argument required");
    }
}
