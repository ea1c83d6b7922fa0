//! PostgreSQL declarative partitioning driver

use async_trait::async_trait;
use bon::Builder;
use sqlx::PgPool;
use sqlx::postgres::PgPoolOptions;
use std::collections::BTreeSet;
use std::time::Duration;
use tracing::debug;

use super::{CreatePartitionInfo, Driver, DriverError, Result};

const SQLSTATE_DUPLICATE_TABLE: &str = "42P07";
const SQLSTATE_UNDEFINED_TABLE: &str = "42P01";

// $1 is the quoted parent identifier so case and schema resolve exactly as in the DDL
const LIST_PARTITIONS_SQL: &str = "SELECT n.nspname::text, c.relname::text \
     FROM pg_catalog.pg_inherits i \
     JOIN pg_catalog.pg_class c ON c.oid = i.inhrelid \
     JOIN pg_catalog.pg_namespace n ON n.oid = c.relnamespace \
     WHERE i.inhparent = $1::text::regclass";

#[derive(Debug, Clone, Builder)]
pub struct PostgresOptions {
    #[builder(into)]
    pub url: String,
    #[builder(default = 4)]
    pub max_connections: u32,
    #[builder(default = Duration::from_secs(10))]
    pub acquire_timeout: Duration,
    /// Report "already exists" on create and "doesn't exist" on drop as success
    #[builder(default)]
    pub tolerate_existing: bool,
}

#[derive(Debug, Clone)]
pub struct PostgresDriver {
    pool: PgPool,
    tolerate_existing: bool,
}

impl PostgresDriver {
    pub async fn connect(options: &PostgresOptions) -> Result<Self> {
        let pool = PgPoolOptions::new()
            .max_connections(options.max_connections)
            .acquire_timeout(options.acquire_timeout)
            .connect(&options.url)
            .await?;

        Ok(Self::from_pool(pool, options.tolerate_existing))
    }

    pub fn from_pool(pool: PgPool, tolerate_existing: bool) -> Self {
        Self {
            pool,
            tolerate_existing,
        }
    }

    async fn execute(&self, sql: &str, name: &str) -> Result<()> {
        match sqlx::query(sql).execute(&self.pool).await {
            Ok(_) => Ok(()),
            Err(e) => match classify(e, name) {
                err @ (DriverError::AlreadyExists(_) | DriverError::NotFound(_))
                    if self.tolerate_existing =>
                {
                    debug!(partition = name, error = %err, "Ignoring existence conflict");
                    Ok(())
                }
                err => Err(err),
            },
        }
    }
}

#[async_trait]
impl Driver for PostgresDriver {
    async fn list_existing_partitions(&self, table: &str) -> Result<BTreeSet<String>> {
        let rows: Vec<(String, String)> = sqlx::query_as(LIST_PARTITIONS_SQL)
            .bind(quote_identifier(table)?)
            .fetch_all(&self.pool)
            .await?;

        Ok(rows
            .into_iter()
            .map(|(schema, relname)| listed_name(table, &schema, &relname))
            .collect())
    }

    async fn create_partition(&self, info: &CreatePartitionInfo) -> Result<()> {
        let sql = create_partition_sql(info)?;
        self.execute(&sql, &info.name).await
    }

    async fn drop_partition(&self, name: &str) -> Result<()> {
        let sql = format!("DROP TABLE {}", quote_identifier(name)?);
        self.execute(&sql, name).await
    }
}

/// Bounds can't be bind parameters in partition DDL, so they're inlined as
/// RFC 3339 literals. Both are generated timestamps, never user input.
fn create_partition_sql(info: &CreatePartitionInfo) -> Result<String> {
    Ok(format!(
        "CREATE TABLE {} PARTITION OF {} FOR VALUES FROM ('{}') TO ('{}')",
        quote_identifier(&info.name)?,
        quote_identifier(&info.parent_table)?,
        info.from_date.to_rfc3339(),
        info.to_date.to_rfc3339(),
    ))
}

/// Quote a possibly schema-qualified identifier: `a.b` -> `"a"."b"`
fn quote_identifier(name: &str) -> Result<String> {
    if name.is_empty() || name.contains('\0') {
        return Err(DriverError::InvalidIdentifier(name.to_string()));
    }

    let parts: Vec<String> = name
        .split('.')
        .map(|part| format!("\"{}\"", part.replace('"', "\"\"")))
        .collect();
    Ok(parts.join("."))
}

/// Spell a listed partition the way the partitioner names it: qualified by
/// schema exactly when the parent table is
fn listed_name(parent_table: &str, schema: &str, relname: &str) -> String {
    if parent_table.contains('.') {
        format!("{}.{}", schema, relname)
    } else {
        relname.to_string()
    }
}

fn classify(err: sqlx::Error, name: &str) -> DriverError {
    if let sqlx::Error::Database(db) = &err {
        match db.code().as_deref() {
            Some(SQLSTATE_DUPLICATE_TABLE) => return DriverError::AlreadyExists(name.to_string()),
            Some(SQLSTATE_UNDEFINED_TABLE) => return DriverError::NotFound(name.to_string()),
            _ => {}
        }
    }
    DriverError::Sqlx(err)
}
