use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};

use super::identifier;

/// A row as exchanged with the remote store: column name -> primitive value.
pub type Record = Map<String, Value>;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum EntityKind {
    Asset,
    Transaction,
    Liability,
    Account,
}

/// How a kind is removed from the remote store.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DeleteMode {
    /// Row is removed.
    Hard,
    /// Row is kept with `is_active = false`.
    Soft,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ColumnType {
    Text,
    Real,
    /// Monetary amount, never null; coalesced from `ColumnSpec::fallbacks`.
    Money,
    Integer,
    Bool,
}

/// One column of a kind's remote schema.
#[derive(Debug, Clone, Copy)]
pub struct ColumnSpec {
    pub name: &'static str,
    pub ty: ColumnType,
    /// Ordered alternatives consulted when the column's own field is absent.
    /// The column itself is always the first entry.
    pub fallbacks: &'static [&'static str],
}

const fn col(name: &'static str, ty: ColumnType) -> ColumnSpec {
    ColumnSpec {
        name,
        ty,
        fallbacks: &[],
    }
}

const fn money(name: &'static str, fallbacks: &'static [&'static str]) -> ColumnSpec {
    ColumnSpec {
        name,
        ty: ColumnType::Money,
        fallbacks,
    }
}

use ColumnType::{Bool, Integer, Real, Text};

const ASSET_COLUMNS: &[ColumnSpec] = &[
    col("id", Text),
    col("user_id", Text),
    col("name", Text),
    col("type", Text),
    money("current_value", &["current_value", "value", "amount"]),
    money("cost_basis", &["cost_basis", "current_value", "value"]),
    col("quantity", Real),
    col("stock_code", Text),
    col("exchange_rate", Real),
    col("area", Real),
    col("price_per_ping", Real),
    col("currency", Text),
    col("purchase_date", Text),
    col("created_at", Text),
    col("updated_at", Text),
];

const TRANSACTION_COLUMNS: &[ColumnSpec] = &[
    col("id", Text),
    col("user_id", Text),
    col("type", Text),
    money("amount", &["amount", "value"]),
    col("description", Text),
    col("category", Text),
    col("account", Text),
    col("from_account", Text),
    col("to_account", Text),
    col("date", Text),
    col("is_recurring", Bool),
    col("recurring_frequency", Text),
    col("created_at", Text),
    col("updated_at", Text),
];

const LIABILITY_COLUMNS: &[ColumnSpec] = &[
    col("id", Text),
    col("user_id", Text),
    col("name", Text),
    col("type", Text),
    money("balance", &["balance", "amount", "current_value"]),
    money("original_amount", &["original_amount", "balance", "amount"]),
    col("interest_rate", Real),
    money("monthly_payment", &["monthly_payment", "payment_amount"]),
    col("payment_day", Integer),
    col("due_date", Text),
    col("created_at", Text),
    col("updated_at", Text),
];

const ACCOUNT_COLUMNS: &[ColumnSpec] = &[
    col("id", Text),
    col("user_id", Text),
    col("name", Text),
    col("type", Text),
    money("balance", &["balance", "current_value", "amount"]),
    col("currency", Text),
    col("is_active", Bool),
    col("created_at", Text),
    col("updated_at", Text),
];

impl EntityKind {
    pub const ALL: [EntityKind; 4] = [
        EntityKind::Transaction,
        EntityKind::Account,
        EntityKind::Asset,
        EntityKind::Liability,
    ];

    pub fn as_str(&self) -> &'static str {
        match self {
            EntityKind::Asset => "asset",
            EntityKind::Transaction => "transaction",
            EntityKind::Liability => "liability",
            EntityKind::Account => "account",
        }
    }

    pub fn from_str(s: &str) -> Option<Self> {
        match s.to_lowercase().as_str() {
            "asset" | "assets" => Some(EntityKind::Asset),
            "transaction" | "transactions" => Some(EntityKind::Transaction),
            "liability" | "liabilities" => Some(EntityKind::Liability),
            "account" | "accounts" => Some(EntityKind::Account),
            _ => None,
        }
    }

    /// Remote table holding this kind.
    pub fn table(&self) -> &'static str {
        match self {
            EntityKind::Asset => "assets",
            EntityKind::Transaction => "transactions",
            EntityKind::Liability => "liabilities",
            EntityKind::Account => "accounts",
        }
    }

    /// Key under which the local collection is persisted. Always contains
    /// `as_str()` so the default-data probe can find it.
    pub fn storage_key(&self) -> String {
        format!("finance_{}_list", self.as_str())
    }

    /// Remote column carrying the entity's display name.
    pub fn name_column(&self) -> &'static str {
        match self {
            EntityKind::Transaction => "description",
            _ => "name",
        }
    }

    pub fn delete_mode(&self) -> DeleteMode {
        match self {
            EntityKind::Account => DeleteMode::Soft,
            _ => DeleteMode::Hard,
        }
    }

    pub fn columns(&self) -> &'static [ColumnSpec] {
        match self {
            EntityKind::Asset => ASSET_COLUMNS,
            EntityKind::Transaction => TRANSACTION_COLUMNS,
            EntityKind::Liability => LIABILITY_COLUMNS,
            EntityKind::Account => ACCOUNT_COLUMNS,
        }
    }

    pub fn column(&self, name: &str) -> Option<&'static ColumnSpec> {
        self.columns().iter().find(|c| c.name == name)
    }

    /// The headline monetary column (value of an asset, amount of a transaction...).
    pub fn primary_money_column(&self) -> &'static ColumnSpec {
        let name = match self {
            EntityKind::Asset => "current_value",
            EntityKind::Transaction => "amount",
            EntityKind::Liability | EntityKind::Account => "balance",
        };
        self.column(name)
            .unwrap_or(&self.columns()[self.columns().len() - 1])
    }
}

impl std::fmt::Display for EntityKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.as_str())
    }
}

/// An asset, transaction, liability or account as held in the local cache.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct FinancialEntity {
    /// May be a legacy, non-conformant key until the entity is first synced.
    pub id: String,
    pub kind: EntityKind,
    /// Display name (`description` for transactions).
    pub name: String,
    /// Kind discriminator, e.g. "cash", "stock", "expense", "mortgage".
    pub entity_type: String,
    pub owner_id: Option<String>,
    /// Every other field, keyed by remote column name where one exists.
    #[serde(default)]
    pub fields: Record,
    pub created_at: Option<DateTime<Utc>>,
    /// Shipped as example data rather than entered by the user.
    #[serde(default)]
    pub seeded: bool,
}

impl FinancialEntity {
    pub fn new(kind: EntityKind, name: impl Into<String>, entity_type: impl Into<String>) -> Self {
        let mut fields = Record::new();
        if kind == EntityKind::Account {
            fields.insert("is_active".into(), Value::Bool(true));
        }
        Self {
            id: identifier::generate(),
            kind,
            name: name.into(),
            entity_type: entity_type.into(),
            owner_id: None,
            fields,
            created_at: Some(Utc::now()),
            seeded: false,
        }
    }

    pub fn with_id(mut self, id: impl Into<String>) -> Self {
        self.id = id.into();
        self
    }

    pub fn with_field(mut self, name: impl Into<String>, value: impl Into<Value>) -> Self {
        self.fields.insert(name.into(), value.into());
        self
    }

    pub fn with_owner(mut self, owner_id: impl Into<String>) -> Self {
        self.owner_id = Some(owner_id.into());
        self
    }

    pub fn mark_seeded(mut self) -> Self {
        self.seeded = true;
        self
    }

    /// Value of the kind's headline monetary column after coalescing.
    pub fn primary_amount(&self) -> f64 {
        coalesce_money(&self.fields, self.kind.primary_money_column())
    }

    pub fn text_field(&self, name: &str) -> Option<&str> {
        self.fields.get(name).and_then(Value::as_str)
    }

    /// Map to the remote schema. Every column is written; absent optionals
    /// become explicit nulls and money columns are coalesced to numbers.
    pub fn to_remote_record(&self, owner_id: &str) -> Record {
        let now = Utc::now().to_rfc3339();
        let name_column = self.kind.name_column();

        self.kind
            .columns()
            .iter()
            .map(|spec| {
                let value = match spec.name {
                    "id" => Value::String(self.id.clone()),
                    "user_id" => Value::String(owner_id.to_string()),
                    "type" => Value::String(self.entity_type.clone()),
                    "created_at" => Value::String(
                        self.created_at
                            .map(|dt| dt.to_rfc3339())
                            .unwrap_or_else(|| now.clone()),
                    ),
                    "updated_at" => Value::String(now.clone()),
                    "is_active" => Value::Bool(
                        self.fields
                            .get("is_active")
                            .and_then(coerce_bool)
                            .unwrap_or(true),
                    ),
                    n if n == name_column => Value::String(self.name.clone()),
                    _ => match spec.ty {
                        ColumnType::Money => number(coalesce_money(&self.fields, spec)),
                        ty => self
                            .fields
                            .get(spec.name)
                            .map(|v| coerce(v, ty))
                            .unwrap_or(Value::Null),
                    },
                };
                (spec.name.to_string(), value)
            })
            .collect()
    }

    /// Rebuild an entity from a remote row.
    pub fn from_remote_record(kind: EntityKind, record: &Record) -> Self {
        let text = |name: &str| match record.get(name) {
            Some(Value::String(s)) => Some(s.clone()),
            Some(Value::Null) | None => None,
            Some(other) => Some(other.to_string()),
        };
        let name_column = kind.name_column();

        let fields = record
            .iter()
            .filter(|(k, v)| {
                !v.is_null()
                    && !matches!(
                        k.as_str(),
                        "id" | "user_id" | "type" | "created_at" | "updated_at"
                    )
                    && k.as_str() != name_column
            })
            .map(|(k, v)| (k.clone(), v.clone()))
            .collect();

        Self {
            id: text("id").unwrap_or_default(),
            kind,
            name: text(name_column).unwrap_or_default(),
            entity_type: text("type").unwrap_or_default(),
            owner_id: text("user_id"),
            fields,
            created_at: text("created_at")
                .and_then(|s| DateTime::parse_from_rfc3339(&s).ok())
                .map(|dt| dt.with_timezone(&Utc)),
            seeded: false,
        }
    }
}

/// Fallback-coalescing rule for money: first present alternative, else 0.
pub fn coalesce_money(fields: &Record, spec: &ColumnSpec) -> f64 {
    let own = [spec.name];
    let candidates: &[&str] = if spec.fallbacks.is_empty() {
        &own
    } else {
        spec.fallbacks
    };
    candidates
        .iter()
        .find_map(|name| fields.get(*name).and_then(coerce_f64))
        .unwrap_or(0.0)
}

fn number(n: f64) -> Value {
    serde_json::Number::from_f64(n)
        .map(Value::Number)
        .unwrap_or(Value::Null)
}

fn coerce_f64(value: &Value) -> Option<f64> {
    match value {
        Value::Number(n) => n.as_f64(),
        Value::String(s) => s.trim().parse::<f64>().ok().filter(|n| n.is_finite()),
        _ => None,
    }
}

fn coerce_bool(value: &Value) -> Option<bool> {
    match value {
        Value::Bool(b) => Some(*b),
        Value::Number(n) => n.as_f64().map(|n| n != 0.0),
        Value::String(s) => match s.to_lowercase().as_str() {
            "true" | "1" => Some(true),
            "false" | "0" => Some(false),
            _ => None,
        },
        _ => None,
    }
}

fn coerce(value: &Value, ty: ColumnType) -> Value {
    match ty {
        ColumnType::Text => match value {
            Value::String(_) | Value::Null => value.clone(),
            other => Value::String(other.to_string()),
        },
        ColumnType::Real | ColumnType::Money => coerce_f64(value).map(number).unwrap_or(Value::Null),
        ColumnType::Integer => coerce_f64(value)
            .map(|n| Value::from(n.trunc() as i64))
            .unwrap_or(Value::Null),
        ColumnType::Bool => coerce_bool(value).map(Value::Bool).unwrap_or(Value::Null),
    }
}
