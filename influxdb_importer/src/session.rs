//! Per-run import state: destination targets, the pending schema command, counters, and the
//! current batch.

use std::fmt::Display;

use crate::batch::Batch;

/// Counts gathered over an import run.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct ImportCounters {
    /// Schema commands issued to the server
    pub total_commands: u64,
    /// Points written successfully
    pub total_inserts: u64,
    /// Points in batches the server rejected
    pub failed_inserts: u64,
}

impl ImportCounters {
    /// Points that have been sent to the server, successfully or not.
    pub fn processed(&self) -> u64 {
        self.total_inserts + self.failed_inserts
    }
}

impl Display for ImportCounters {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(
            f,
            "Processed {} commands, {} inserts, failed {} inserts",
            self.total_commands, self.total_inserts, self.failed_inserts
        )
    }
}

/// Destination targets supplied by the operator, taking precedence over the dump's own.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct Overrides {
    pub database: Option<String>,
    pub retention_policy: Option<String>,
}

/// Mutable state for a single import run.
#[derive(Debug)]
pub struct ImportSession {
    overrides: Overrides,
    target_database: Option<String>,
    target_retention_policy: Option<String>,
    schema_command: Option<String>,
    counters: ImportCounters,
    batch: Batch,
}

impl ImportSession {
    pub fn new(overrides: Overrides, batch_size: usize) -> Self {
        Self {
            overrides,
            target_database: None,
            target_retention_policy: None,
            schema_command: None,
            counters: ImportCounters::default(),
            batch: Batch::new(batch_size),
        }
    }

    pub fn target_database(&self) -> Option<&str> {
        self.target_database.as_deref()
    }

    pub fn target_retention_policy(&self) -> Option<&str> {
        self.target_retention_policy.as_deref()
    }

    pub fn schema_command(&self) -> Option<&str> {
        self.schema_command.as_deref()
    }

    pub fn counters(&self) -> ImportCounters {
        self.counters
    }

    pub fn batch(&self) -> &Batch {
        &self.batch
    }

    pub fn batch_mut(&mut self) -> &mut Batch {
        &mut self.batch
    }

    /// Remember `command` as the statement creating the destination; the last one wins.
    pub fn set_schema_command(&mut self, command: &str) {
        self.schema_command = Some(command.to_owned());
    }

    /// Apply the operator's overrides ahead of the data section.
    ///
    /// A database override replaces the schema command with `CREATE DATABASE <override>`.
    pub fn apply_overrides(&mut self) {
        if let Some(db) = &self.overrides.database {
            self.schema_command = Some(format!("CREATE DATABASE {db}"));
            self.target_database = Some(db.clone());
        }
        if let Some(rp) = &self.overrides.retention_policy {
            self.target_retention_policy = Some(rp.clone());
        }
    }

    /// Switch the target database from a context directive, unless it is overridden.
    ///
    /// Returns whether the target changed.
    pub fn set_context_database(&mut self, db: &str) -> bool {
        if self.overrides.database.is_some() {
            return false;
        }
        self.target_database = Some(db.to_owned());
        true
    }

    /// Switch the target retention policy from a context directive, unless it is overridden.
    ///
    /// Returns whether the target changed.
    pub fn set_context_retention_policy(&mut self, rp: &str) -> bool {
        if self.overrides.retention_policy.is_some() {
            return false;
        }
        self.target_retention_policy = Some(rp.to_owned());
        true
    }

    pub fn record_command(&mut self) {
        self.counters.total_commands += 1;
    }

    pub fn record_inserted(&mut self, points: usize) {
        self.counters.total_inserts += points as u64;
    }

    pub fn record_failed(&mut self, points: usize) {
        self.counters.failed_inserts += points as u64;
    }
}
