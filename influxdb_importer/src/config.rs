//! Configuration for an import run.

use std::{
    fs::OpenOptions,
    io::{self, BufWriter, Write},
    num::NonZeroUsize,
    path::PathBuf,
};

use clap::Parser;
use influxdb_client::{Client, Consistency, Precision};
use secrecy::{ExposeSecret, Secret};
use url::Url;

use crate::{
    Error, Result,
    batch::{DEFAULT_BATCH_SIZE, DEFAULT_REPORT_INTERVAL},
    session::Overrides,
};

/// The `User-Agent` the importer identifies itself with.
pub const USER_AGENT: &str = concat!("influxdb importer/", env!("CARGO_PKG_VERSION"));

const DEFAULT_BATCH: NonZeroUsize = match NonZeroUsize::new(DEFAULT_BATCH_SIZE) {
    Some(n) => n,
    None => panic!("default batch size is zero"),
};

#[derive(Debug, Parser)]
pub struct ImporterConfig {
    /// The host URL of the running InfluxDB server
    #[clap(
        short = 'H',
        long = "host",
        env = "INFLUXDB_HOST_URL",
        default_value = "http://127.0.0.1:8086"
    )]
    pub host_url: Url,

    /// The token for authentication with the InfluxDB server
    #[clap(long = "token", env = "INFLUXDB_AUTH_TOKEN")]
    pub auth_token: Option<Secret<String>>,

    /// Username for basic authentication, ignored when a token is given
    #[clap(long = "username", env = "INFLUXDB_USERNAME", requires = "password")]
    pub username: Option<String>,

    /// Password for basic authentication
    #[clap(long = "password", env = "INFLUXDB_PASSWORD")]
    pub password: Option<Secret<String>>,

    /// Path to the dump file to import
    #[clap(short = 'f', long = "path", env = "INFLUXDB_IMPORT_PATH")]
    pub path: Option<PathBuf>,

    /// The dump file is gzip compressed
    #[clap(long = "compressed", default_value_t = false)]
    pub compressed: bool,

    /// Maximum number of points written per second, `0` for no limit
    #[clap(long = "pps", env = "INFLUXDB_IMPORT_PPS", default_value_t = 0)]
    pub points_per_second: u64,

    /// Import into this database instead of the ones named in the dump
    ///
    /// The dump's schema command is replaced with `CREATE DATABASE <database>`.
    #[clap(short = 'd', long = "database", env = "INFLUXDB_IMPORT_DATABASE")]
    pub database: Option<String>,

    /// Import into this retention policy instead of the ones named in the dump
    #[clap(long = "retention", env = "INFLUXDB_IMPORT_RETENTION_POLICY")]
    pub retention_policy: Option<String>,

    /// Precision of the timestamps in the dump: ns, u, ms, s, m, or h
    #[clap(long = "precision")]
    pub precision: Option<Precision>,

    /// Write consistency level: any, one, quorum, or all
    #[clap(long = "consistency")]
    pub consistency: Option<Consistency>,

    /// Number of lines sent in each write request
    #[clap(
        long = "batch-size",
        env = "INFLUXDB_IMPORT_BATCH_SIZE",
        default_value_t = DEFAULT_BATCH
    )]
    pub batch_size: NonZeroUsize,

    /// File that lines from failed writes are appended to
    ///
    /// If not specified, failed lines are written to stdout.
    #[clap(long = "failed-lines-file", env = "INFLUXDB_IMPORT_FAILED_LINES_FILE")]
    pub failed_lines_file: Option<PathBuf>,
}

impl ImporterConfig {
    /// Create the client used for every request of the run.
    pub fn create_client(&self) -> Result<Client> {
        let mut client = Client::new(self.host_url.clone())
            .and_then(|c| c.with_user_agent(USER_AGENT))
            .map_err(Error::Client)?;
        if let Some(t) = &self.auth_token {
            client = client.with_auth_token(t.expose_secret());
        } else if let (Some(u), Some(p)) = (&self.username, &self.password) {
            client = client.with_basic_auth(u, p.expose_secret());
        }
        Ok(client)
    }

    /// Open the sink that lines of failed batches are written to.
    ///
    /// The failed lines file is appended to, so lines from earlier runs are kept. Without one,
    /// failed lines go to stdout.
    pub fn capture_sink(&self) -> Result<Box<dyn Write + Send>> {
        let Some(path) = &self.failed_lines_file else {
            return Ok(Box::new(io::stdout()));
        };
        let file = OpenOptions::new()
            .create(true)
            .append(true)
            .open(path)
            .map_err(|source| Error::CaptureFile {
                path: path.clone(),
                source,
            })?;
        Ok(Box::new(BufWriter::new(file)))
    }

    pub fn import_config(&self) -> ImportConfig {
        ImportConfig {
            path: self.path.clone(),
            compressed: self.compressed,
            points_per_second: self.points_per_second,
            database: self.database.clone(),
            retention_policy: self.retention_policy.clone(),
            precision: self.precision,
            consistency: self.consistency,
            batch_size: self.batch_size.get(),
            report_interval: DEFAULT_REPORT_INTERVAL,
        }
    }
}

/// Settings the [`Importer`][crate::Importer] runs with.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ImportConfig {
    pub path: Option<PathBuf>,
    pub compressed: bool,
    /// `0` disables throttling
    pub points_per_second: u64,
    /// Destination database override
    pub database: Option<String>,
    /// Destination retention policy override
    pub retention_policy: Option<String>,
    pub precision: Option<Precision>,
    pub consistency: Option<Consistency>,
    pub batch_size: usize,
    pub report_interval: u64,
}

impl Default for ImportConfig {
    fn default() -> Self {
        Self {
            path: None,
            compressed: false,
            points_per_second: 0,
            database: None,
            retention_policy: None,
            precision: None,
            consistency: None,
            batch_size: DEFAULT_BATCH_SIZE,
            report_interval: DEFAULT_REPORT_INTERVAL,
        }
    }
}

impl ImportConfig {
    pub fn overrides(&self) -> Overrides {
        Overrides {
            database: self.database.clone(),
            retention_policy: self.retention_policy.clone(),
        }
    }
}
