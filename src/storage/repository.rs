use anyhow::{Context, Result};
use async_trait::async_trait;
use serde_json::Value;
use sqlx::query::Query;
use sqlx::sqlite::{Sqlite, SqliteArguments, SqliteRow};
use sqlx::{Row, SqlitePool};
use tracing::debug;

use crate::domain::{ColumnSpec, ColumnType, EntityKind, Record};

use super::{MIGRATION_001_REMOTE_SCHEMA, RemoteQuery, RemoteStore, StoreError};

type SqliteQuery<'q> = Query<'q, Sqlite, SqliteArguments<'q>>;

/// SQLite-backed remote store: one table per entity kind.
pub struct SqliteRemoteStore {
    pool: SqlitePool,
}

impl SqliteRemoteStore {
    /// Create a new store with the given SQLite connection pool.
    pub fn new(pool: SqlitePool) -> Self {
        Self { pool }
    }

    /// Connect to a SQLite database at the given URL.
    pub async fn connect(database_url: &str) -> Result<Self> {
        let pool = SqlitePool::connect(database_url)
            .await
            .context("Failed to connect to remote database")?;
        Ok(Self::new(pool))
    }

    /// Run database migrations.
    pub async fn migrate(&self) -> Result<()> {
        sqlx::query(MIGRATION_001_REMOTE_SCHEMA)
            .execute(&self.pool)
            .await
            .context("Failed to run migration 001")?;
        Ok(())
    }

    /// Initialize a new database (connect + migrate).
    pub async fn init(database_url: &str) -> Result<Self> {
        let store = Self::connect(database_url).await?;
        store.migrate().await?;
        Ok(store)
    }

    fn column(kind: EntityKind, name: &str) -> Result<&'static ColumnSpec, StoreError> {
        kind.column(name).ok_or_else(|| StoreError::UnknownColumn {
            table: kind.table().to_string(),
            column: name.to_string(),
        })
    }

    /// Build ` WHERE ...` for the query's filters. Null filters become
    /// `IS NULL` and take no bind slot.
    fn where_clause(query: &RemoteQuery) -> Result<String, StoreError> {
        let mut predicates = Vec::with_capacity(query.filters.len());
        for (name, value) in &query.filters {
            let spec = Self::column(query.kind, name)?;
            if value.is_null() {
                predicates.push(format!("{} IS NULL", spec.name));
            } else {
                predicates.push(format!("{} = ?", spec.name));
            }
        }

        if predicates.is_empty() {
            Ok(String::new())
        } else {
            Ok(format!(" WHERE {}", predicates.join(" AND ")))
        }
    }

    fn bind_filters<'q>(mut sql_query: SqliteQuery<'q>, query: &RemoteQuery) -> SqliteQuery<'q> {
        for (_, value) in query.filters.iter().filter(|(_, v)| !v.is_null()) {
            sql_query = bind_value(sql_query, value);
        }
        sql_query
    }

    fn column_list(kind: EntityKind) -> String {
        kind.columns()
            .iter()
            .map(|c| c.name)
            .collect::<Vec<_>>()
            .join(", ")
    }

    fn row_to_record(kind: EntityKind, row: &SqliteRow) -> Result<Record> {
        let mut record = Record::new();
        for spec in kind.columns() {
            let value = match spec.ty {
                ColumnType::Text => row
                    .try_get::<Option<String>, _>(spec.name)
                    .with_context(|| format!("Invalid {}.{}", kind.table(), spec.name))?
                    .map(Value::String),
                ColumnType::Real | ColumnType::Money => row
                    .try_get::<Option<f64>, _>(spec.name)
                    .with_context(|| format!("Invalid {}.{}", kind.table(), spec.name))?
                    .and_then(serde_json::Number::from_f64)
                    .map(Value::Number),
                ColumnType::Integer => row
                    .try_get::<Option<i64>, _>(spec.name)
                    .with_context(|| format!("Invalid {}.{}", kind.table(), spec.name))?
                    .map(Value::from),
                ColumnType::Bool => row
                    .try_get::<Option<bool>, _>(spec.name)
                    .with_context(|| format!("Invalid {}.{}", kind.table(), spec.name))?
                    .map(Value::Bool),
            };
            record.insert(spec.name.to_string(), value.unwrap_or(Value::Null));
        }
        Ok(record)
    }

    async fn fetch(&self, sql: &str, query: &RemoteQuery) -> Result<Vec<SqliteRow>> {
        Self::bind_filters(sqlx::query(sql), query)
            .fetch_all(&self.pool)
            .await
            .with_context(|| format!("Failed to query {}", query.kind.table()))
    }
}

#[async_trait]
impl RemoteStore for SqliteRemoteStore {
    async fn select(&self, query: &RemoteQuery) -> Result<Vec<Record>, StoreError> {
        let mut sql = format!(
            "SELECT {} FROM {}{}",
            Self::column_list(query.kind),
            query.kind.table(),
            Self::where_clause(query)?
        );

        if let Some(order) = &query.order_by {
            let spec = Self::column(query.kind, &order.column)?;
            let direction = if order.ascending { "ASC" } else { "DESC" };
            sql.push_str(&format!(" ORDER BY {} {}", spec.name, direction));
        }
        if let Some(limit) = query.limit {
            sql.push_str(&format!(" LIMIT {}", limit));
        }

        let rows = self.fetch(&sql, query).await.map_err(StoreError::read)?;
        rows.iter()
            .map(|row| Self::row_to_record(query.kind, row))
            .collect::<Result<Vec<_>>>()
            .map_err(StoreError::read)
    }

    async fn count(&self, query: &RemoteQuery) -> Result<u64, StoreError> {
        let sql = format!(
            "SELECT COUNT(*) as count FROM {}{}",
            query.kind.table(),
            Self::where_clause(query)?
        );

        let row = Self::bind_filters(sqlx::query(&sql), query)
            .fetch_one(&self.pool)
            .await
            .with_context(|| format!("Failed to count {}", query.kind.table()))
            .map_err(StoreError::read)?;

        let count: i64 = row.get("count");
        Ok(count.max(0) as u64)
    }

    async fn upsert(&self, kind: EntityKind, record: &Record) -> Result<Record, StoreError> {
        if !record.get("id").is_some_and(Value::is_string) {
            return Err(StoreError::Write(format!(
                "{} record has no string id",
                kind.table()
            )));
        }

        let mut columns = Vec::with_capacity(record.len());
        for name in record.keys() {
            columns.push(Self::column(kind, name)?.name);
        }

        let placeholders = vec!["?"; columns.len()].join(", ");
        let updates = columns
            .iter()
            .filter(|c| !matches!(**c, "id" | "created_at"))
            .map(|c| format!("{c} = excluded.{c}"))
            .collect::<Vec<_>>()
            .join(", ");
        let conflict = if updates.is_empty() {
            "DO NOTHING".to_string()
        } else {
            format!("DO UPDATE SET {updates}")
        };

        let sql = format!(
            "INSERT INTO {} ({}) VALUES ({}) ON CONFLICT(id) {}",
            kind.table(),
            columns.join(", "),
            placeholders,
            conflict
        );

        let mut sql_query = sqlx::query(&sql);
        for value in record.values() {
            sql_query = bind_value(sql_query, value);
        }

        sql_query
            .execute(&self.pool)
            .await
            .with_context(|| format!("Failed to upsert into {}", kind.table()))
            .map_err(StoreError::write)?;

        debug!(table = kind.table(), id = ?record.get("id"), "upserted row");
        Ok(record.clone())
    }

    async fn delete(&self, query: &RemoteQuery) -> Result<u64, StoreError> {
        // An unfiltered delete would wipe the table; refuse it.
        if query.filters.is_empty() {
            return Err(StoreError::Write(format!(
                "refusing unfiltered delete on {}",
                query.kind.table()
            )));
        }

        let sql = format!(
            "DELETE FROM {}{}",
            query.kind.table(),
            Self::where_clause(query)?
        );

        let result = Self::bind_filters(sqlx::query(&sql), query)
            .execute(&self.pool)
            .await
            .with_context(|| format!("Failed to delete from {}", query.kind.table()))
            .map_err(StoreError::write)?;

        Ok(result.rows_affected())
    }
}

fn bind_value<'q>(query: SqliteQuery<'q>, value: &Value) -> SqliteQuery<'q> {
    match value {
        Value::Null => query.bind(None::<String>),
        Value::Bool(b) => query.bind(*b),
        Value::Number(n) => match n.as_i64() {
            Some(i) => query.bind(i),
            None => query.bind(n.as_f64().unwrap_or_default()),
        },
        Value::String(s) => query.bind(s.clone()),
        other => query.bind(other.to_string()),
    }
}
