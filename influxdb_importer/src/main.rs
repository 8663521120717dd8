//! Entrypoint of the influxdb_importer binary
#![deny(rustdoc::broken_intra_doc_links, rustdoc::bare_urls, rust_2018_idioms)]
#![warn(
    missing_debug_implementations,
    clippy::explicit_iter_loop,
    clippy::use_self,
    clippy::clone_on_ref_ptr,
    clippy::future_not_send
)]

use dotenvy::dotenv;
use influxdb_importer::{Error, Importer, ImporterConfig};
use observability_deps::tracing::warn;
use trogging::{
    TroggingGuard,
    cli::LoggingConfigBuilderExt,
    tracing_subscriber::{Registry, prelude::*},
};

enum ReturnCode {
    Failure = 1,
}

#[derive(Debug, clap::Parser)]
#[clap(
    name = "influxdb_importer",
    version,
    about = "Import a line protocol dump into a running InfluxDB server",
    long_about = r#"Import a line protocol dump into a running InfluxDB server

The dump starts with the schema command creating the destination, followed by a
`# DML` line and the data section. `# CONTEXT-DATABASE:` and
`# CONTEXT-RETENTION-POLICY:` lines in the data section select where the lines
after them are written.

Examples:
    # Import a dump into the databases it names
    influxdb_importer --path dump.txt

    # Import a compressed dump into the `bar` database at 10000 points per second
    influxdb_importer --path dump.txt.gz --compressed -d bar --pps 10000

    # Keep lines the server rejects for a later retry
    influxdb_importer --path dump.txt --failed-lines-file failed.txt
"#
)]
struct Config {
    #[clap(flatten)]
    importer_config: ImporterConfig,

    #[clap(flatten)]
    logging_config: trogging::cli::LoggingConfig,
}

fn main() -> Result<(), std::io::Error> {
    // load all environment variables from .env before doing anything
    load_dotenv();

    let config: Config = clap::Parser::parse();

    let tokio_runtime = tokio::runtime::Builder::new_current_thread()
        .enable_all()
        .build()?;

    tokio_runtime.block_on(async move {
        let _tracing_guard = match init_logs_and_tracing(&config.logging_config) {
            Ok(guard) => guard,
            Err(e) => {
                eprintln!("Initializing logs failed: {e}");
                std::process::exit(ReturnCode::Failure as _);
            }
        };

        if let Err(e) = command(config.importer_config).await {
            eprintln!("Import failed: {e}");
            std::process::exit(ReturnCode::Failure as _)
        }
    });

    Ok(())
}

async fn command(config: ImporterConfig) -> Result<(), Error> {
    let client = config.create_client()?;
    let capture = config.capture_sink()?;
    let mut importer = Importer::new(config.import_config(), client).with_capture(capture);
    let counters = importer.run().await?;
    if counters.processed() == 0 {
        warn!("no points were imported");
    }
    Ok(())
}

/// Source the .env file before initialising the Config struct - this sets
/// any envs in the file, which the Config struct then uses.
///
/// Precedence is given to existing env variables.
fn load_dotenv() {
    match dotenv() {
        Ok(_) => {}
        Err(dotenvy::Error::Io(err)) if err.kind() == std::io::ErrorKind::NotFound => {
            // a missing env file is not an error
        }
        Err(e) => {
            eprintln!("FATAL Error loading config from: {e}");
            eprintln!("Aborting");
            std::process::exit(ReturnCode::Failure as _);
        }
    };
}

fn init_logs_and_tracing(
    config: &trogging::cli::LoggingConfig,
) -> Result<TroggingGuard, trogging::Error> {
    let log_layer = trogging::Builder::new()
        .with_default_log_filter("info")
        .with_logging_config(config)
        .build()?;

    let subscriber = Registry::default().with(log_layer);
    trogging::install_global(subscriber)
}
