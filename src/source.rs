//! Relational row sources feeding the indexer.

use crate::normalizer::RelationalRow;
use async_trait::async_trait;
use thiserror::Error;
use tokio_postgres::{Client, NoTls, Row};
use tracing::{debug, error, warn};

/// Tables read when none are configured.
pub const DEFAULT_TABLES: [&str; 5] = [
    "news",
    "notice",
    "departmental",
    "schoolenterprise",
    "specialsubject",
];

/// Failures loading rows. Fatal to that source's load.
#[derive(Debug, Error)]
pub enum SourceError {
    /// No tables, or an unusable table name.
    #[error("invalid table configuration: {0}")]
    Config(String),
    /// Connecting or querying failed.
    #[error("postgres error: {0}")]
    Postgres(#[from] tokio_postgres::Error),
}

/// Anything that yields [`RelationalRow`]s.
#[async_trait]
pub trait RowSource: Send + Sync {
    /// Loads every row the source exposes.
    async fn load(&self) -> Result<Vec<RelationalRow>, SourceError>;
}

/// Optionally schema-qualified table reference.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TableName {
    schema: Option<String>,
    table: String,
}

impl TableName {
    /// Parses `table` or `schema.table`.
    pub fn parse(input: &str) -> Result<Self, SourceError> {
        let input = input.trim();
        let (schema, table) = match input.split_once('.') {
            Some((schema, table)) => (Some(schema.trim().to_string()), table.trim()),
            None => (None, input),
        };
        if table.is_empty() || schema.as_deref().is_some_and(str::is_empty) {
            return Err(SourceError::Config(format!("invalid table name {input:?}")));
        }
        Ok(Self {
            schema,
            table: table.to_string(),
        })
    }

    /// Quoted identifier usable in SQL.
    pub fn qualified(&self) -> String {
        match &self.schema {
            Some(schema) => format!("{}.{}", quote_ident(schema), quote_ident(&self.table)),
            None => quote_ident(&self.table),
        }
    }
}

/// Quotes Postgres identifiers, escaping embedded quotes.
pub fn quote_ident(input: &str) -> String {
    format!("\"{}\"", input.replace('"', "\"\""))
}

/// `UNION` of the four indexed columns across `tables`, every column as text.
pub fn union_sql(tables: &[TableName]) -> Result<String, SourceError> {
    if tables.is_empty() {
        return Err(SourceError::Config("at least one table is required".into()));
    }
    let selects: Vec<String> = tables
        .iter()
        .map(|table| {
            format!(
                "SELECT title::text AS title, content::text AS content, url::text AS url, \"date\"::text AS \"date\" FROM {}",
                table.qualified()
            )
        })
        .collect();
    Ok(selects.join(" UNION "))
}

/// Reads rows from a set of Postgres tables sharing the `title, content, url, date` shape.
pub struct PostgresSource {
    client: Client,
    sql: String,
}

impl PostgresSource {
    /// Connects and prepares the union query over `tables`.
    pub async fn connect(database_url: &str, tables: &[String]) -> Result<Self, SourceError> {
        let tables = tables
            .iter()
            .map(|table| TableName::parse(table))
            .collect::<Result<Vec<_>, _>>()?;
        let sql = union_sql(&tables)?;
        let (client, connection) = tokio_postgres::connect(database_url, NoTls).await?;
        tokio::spawn(async move {
            if let Err(err) = connection.await {
                error!(error = %err, "postgres connection error");
            }
        });
        Ok(Self { client, sql })
    }
}

fn decode_row(row: &Row) -> Result<RelationalRow, tokio_postgres::Error> {
    Ok(RelationalRow {
        title: row.try_get("title")?,
        content: row.try_get("content")?,
        url: row.try_get("url")?,
        date: row.try_get("date")?,
    })
}

#[async_trait]
impl RowSource for PostgresSource {
    async fn load(&self) -> Result<Vec<RelationalRow>, SourceError> {
        let rows = self.client.query(self.sql.as_str(), &[]).await?;
        debug!(rows = rows.len(), "loaded relational rows");
        let mut decoded = Vec::with_capacity(rows.len());
        for (position, row) in rows.iter().enumerate() {
            match decode_row(row) {
                Ok(row) => decoded.push(row),
                Err(err) => warn!(position, error = %err, "skipping undecodable row"),
            }
        }
        Ok(decoded)
    }
}
