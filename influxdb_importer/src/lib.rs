//! Imports an InfluxDB line protocol dump into a running server.
//!
//! A dump starts with a schema section holding the command that creates the destination,
//! followed by a `# DML` marker and the data section. Data lines are written in batches,
//! optionally throttled to a points-per-second limit, to the database and retention policy
//! named by the most recent context directives.

use std::path::PathBuf;

pub mod batch;
pub mod config;
pub mod directive;
pub mod import;
pub mod input;
pub mod session;
pub mod throttle;
pub mod transport;
pub mod writer;

pub use config::{ImportConfig, ImporterConfig};
pub use import::Importer;
pub use session::ImportCounters;

#[derive(Debug, thiserror::Error)]
pub enum Error {
    #[error("failed to connect to the server: {0}")]
    Connect(#[source] influxdb_client::Error),

    #[error("unable to create the client: {0}")]
    Client(#[source] influxdb_client::Error),

    #[error("file argument required")]
    MissingPath,

    #[error("unable to open {}: {source}", .path.display())]
    OpenInput {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("unable to decompress {}: {source}", .path.display())]
    Decompress {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("unable to create failed lines file {}: {source}", .path.display())]
    CaptureFile {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("reading input: {0}")]
    Read(#[source] std::io::Error),

    #[error("{count} point{} not inserted", plural(.count))]
    PointsNotInserted { count: u64 },
}

fn plural(count: &u64) -> &'static str {
    if *count == 1 { " was" } else { "s were" }
}

pub type Result<T, E = Error> = std::result::Result<T, E>;
