//! The server-facing side of the importer.

use std::fmt::Debug;

use async_trait::async_trait;
use influxdb_client::{Client, Consistency, Error, Precision};

/// Issues schema commands and batched writes to the destination server.
///
/// Each call is attempted at most once; the importer never retries a failed request.
#[async_trait]
pub trait Transport: Debug + Send + Sync {
    /// Check that the server is reachable.
    async fn ping(&self) -> Result<(), Error>;

    /// Run `command`, failing if the server reports an error for it.
    async fn query(&self, command: &str, database: Option<&str>) -> Result<(), Error>;

    /// Write a newline-delimited line protocol `body`.
    async fn write_batch(
        &self,
        body: Vec<u8>,
        database: &str,
        retention_policy: Option<&str>,
        precision: Option<Precision>,
        consistency: Option<Consistency>,
    ) -> Result<(), Error>;
}

#[async_trait]
impl Transport for Client {
    async fn ping(&self) -> Result<(), Error> {
        Self::ping(self).await.map(|_| ())
    }

    async fn query(&self, command: &str, database: Option<&str>) -> Result<(), Error> {
        let mut builder = Self::query(self, command);
        if let Some(db) = database {
            builder = builder.database(db);
        }
        let response = builder.send().await?;
        match response.error() {
            Some(message) => Err(Error::Query {
                message: message.to_owned(),
            }),
            None => Ok(()),
        }
    }

    async fn write_batch(
        &self,
        body: Vec<u8>,
        database: &str,
        retention_policy: Option<&str>,
        precision: Option<Precision>,
        consistency: Option<Consistency>,
    ) -> Result<(), Error> {
        let mut builder = self.write(database);
        if let Some(rp) = retention_policy {
            builder = builder.retention_policy(rp);
        }
        if let Some(precision) = precision {
            builder = builder.precision(precision);
        }
        if let Some(consistency) = consistency {
            builder = builder.consistency(consistency);
        }
        builder.body(body).send().await
    }
}
