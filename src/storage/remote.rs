use async_trait::async_trait;
use serde_json::Value;

use crate::domain::{EntityKind, Record};

use super::StoreError;

/// Column ordering for a remote read.
#[derive(Debug, Clone, PartialEq)]
pub struct Ordering {
    pub column: String,
    pub ascending: bool,
}

/// A table read: equality predicates, optional ordering and limit.
#[derive(Debug, Clone, PartialEq)]
pub struct RemoteQuery {
    pub kind: EntityKind,
    pub filters: Vec<(String, Value)>,
    pub order_by: Option<Ordering>,
    pub limit: Option<usize>,
}

impl RemoteQuery {
    pub fn new(kind: EntityKind) -> Self {
        Self {
            kind,
            filters: Vec::new(),
            order_by: None,
            limit: None,
        }
    }

    /// Point lookup of one entity scoped to its owner.
    pub fn by_id(kind: EntityKind, id: &str, owner_id: &str) -> Self {
        Self::new(kind).eq("id", id).eq("user_id", owner_id)
    }

    pub fn eq(mut self, column: impl Into<String>, value: impl Into<Value>) -> Self {
        self.filters.push((column.into(), value.into()));
        self
    }

    pub fn order_by(mut self, column: impl Into<String>, ascending: bool) -> Self {
        self.order_by = Some(Ordering {
            column: column.into(),
            ascending,
        });
        self
    }

    pub fn limit(mut self, limit: usize) -> Self {
        self.limit = Some(limit);
        self
    }

    /// Human-readable predicate list for messages and logs.
    pub fn describe_filters(&self) -> String {
        if self.filters.is_empty() {
            return "(all rows)".to_string();
        }
        self.filters
            .iter()
            .map(|(column, value)| format!("{column}={value}"))
            .collect::<Vec<_>>()
            .join(", ")
    }
}

/// The relational store holding the authoritative copy of every entity.
#[async_trait]
pub trait RemoteStore: Send + Sync {
    async fn select(&self, query: &RemoteQuery) -> Result<Vec<Record>, StoreError>;

    async fn count(&self, query: &RemoteQuery) -> Result<u64, StoreError>;

    /// Insert-or-replace keyed by `id`. Repeating the call with the same
    /// identifier never creates a second row.
    async fn upsert(&self, kind: EntityKind, record: &Record) -> Result<Record, StoreError>;

    /// Delete every row matching the query's filters; returns rows removed.
    async fn delete(&self, query: &RemoteQuery) -> Result<u64, StoreError>;

    /// Exactly one row, or `NotFound` / `MultipleRows`.
    async fn select_single(&self, query: &RemoteQuery) -> Result<Record, StoreError> {
        let probe = query.clone().limit(2);
        let mut rows = self.select(&probe).await?;
        match rows.len() {
            0 => Err(StoreError::NotFound {
                table: query.kind.table().to_string(),
                filters: query.describe_filters(),
            }),
            1 => Ok(rows.remove(0)),
            count => Err(StoreError::MultipleRows {
                table: query.kind.table().to_string(),
                count,
            }),
        }
    }
}
