// ABOUTME: Deletes archived rows in bounded batches until the predicate matches nothing
// ABOUTME: Refuses to run without a predicate; partial progress is kept and reported on failure

use anyhow::{Context, Result};
use async_trait::async_trait;
use sqlx::mysql::{MySqlConnectOptions, MySqlPool, MySqlPoolOptions};

use crate::error::ArchiverError;
use crate::registry::ConnectionProfile;

/// One bounded delete: `DELETE FROM `table` WHERE <predicate> LIMIT <limit>`.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PurgeStatement {
    pub table: String,
    pub predicate: String,
    pub limit: u64,
}

impl PurgeStatement {
    /// SQL text with the limit left as a bind parameter.
    pub fn sql(&self) -> String {
        format!(
            "DELETE FROM {} WHERE {} LIMIT ?",
            quote_identifier(&self.table),
            self.predicate
        )
    }
}

/// Backtick-quote a MySQL identifier, doubling embedded backticks.
pub fn quote_identifier(name: &str) -> String {
    format!("`{}`", name.replace('`', "``"))
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct PurgeProgress {
    pub rows_deleted: u64,
    pub batches: u64,
}

#[async_trait]
pub trait RowDeleter: Send + Sync {
    /// Execute one bounded delete and return the affected row count.
    async fn delete_batch(&self, statement: &PurgeStatement) -> Result<u64>;
}

/// Opens a deleter against one database of a connection profile.
#[async_trait]
pub trait PurgeConnector: Send + Sync {
    async fn connect(
        &self,
        profile: &ConnectionProfile,
        database: &str,
    ) -> Result<Box<dyn RowDeleter>>;
}

#[derive(Debug, Clone, Copy, Default)]
pub struct MySqlConnector;

#[async_trait]
impl PurgeConnector for MySqlConnector {
    async fn connect(
        &self,
        profile: &ConnectionProfile,
        database: &str,
    ) -> Result<Box<dyn RowDeleter>> {
        let options = MySqlConnectOptions::new()
            .host(&profile.host)
            .port(profile.port)
            .username(&profile.username)
            .password(&profile.password)
            .database(database)
            .charset("utf8mb4");

        let pool = MySqlPoolOptions::new()
            .max_connections(1)
            .connect_with(options)
            .await
            .with_context(|| {
                format!(
                    "Failed to connect to {}:{}/{} as {}. Check host, port and credentials",
                    profile.host, profile.port, database, profile.username
                )
            })?;

        Ok(Box::new(MySqlDeleter { pool }))
    }
}

pub struct MySqlDeleter {
    pool: MySqlPool,
}

#[async_trait]
impl RowDeleter for MySqlDeleter {
    async fn delete_batch(&self, statement: &PurgeStatement) -> Result<u64> {
        let result = sqlx::query(&statement.sql())
            .bind(statement.limit)
            .execute(&self.pool)
            .await
            .with_context(|| format!("Failed to execute {}", statement.sql()))?;
        Ok(result.rows_affected())
    }
}

/// Repeat bounded deletes until one affects zero rows; returns the total deleted.
///
/// Batches are independent statements. A failure stops the loop and reports how many
/// rows were already deleted; those deletions stay committed.
pub async fn purge(
    deleter: &dyn RowDeleter,
    table: &str,
    predicate: &str,
    batch_limit: u64,
) -> Result<u64, ArchiverError> {
    if predicate.trim().is_empty() {
        tracing::error!(table, "Purge predicate is empty, refusing to delete");
        return Err(ArchiverError::Unscoped(format!(
            "purge of table '{}' has an empty predicate",
            table
        )));
    }
    if table.trim().is_empty() {
        tracing::error!("Purge table is empty, refusing to delete");
        return Err(ArchiverError::Unscoped(
            "purge requires a table name; whole-database jobs cannot be purged".to_string(),
        ));
    }
    if batch_limit == 0 {
        return Err(ArchiverError::Unscoped(format!(
            "purge of table '{}' has a batch limit of 0",
            table
        )));
    }

    let statement = PurgeStatement {
        table: table.to_string(),
        predicate: predicate.to_string(),
        limit: batch_limit,
    };
    tracing::info!(sql = %statement.sql(), limit = batch_limit, "Starting purge");

    let mut progress = PurgeProgress::default();
    loop {
        let affected = match deleter.delete_batch(&statement).await {
            Ok(affected) => affected,
            Err(err) => {
                tracing::error!(
                    deleted = progress.rows_deleted,
                    batches = progress.batches,
                    error = %format!("{:#}", err),
                    "Purge batch failed"
                );
                return Err(ArchiverError::Purge {
                    deleted: progress.rows_deleted,
                    message: format!("{:#}", err),
                });
            }
        };

        progress.batches += 1;
        progress.rows_deleted += affected;
        tracing::debug!(affected, total = progress.rows_deleted, "Purge batch finished");

        if affected == 0 {
            break;
        }
    }

    tracing::info!(
        deleted = progress.rows_deleted,
        batches = progress.batches,
        "Purge completed"
    );
    Ok(progress.rows_deleted)
}
