//! Fixtures a fresh installation ships with, and the heuristic that tells
//! them apart from user data.
//!
//! The heuristic is content based and therefore lossy: a user transaction
//! whose text and amount happen to equal a seed fixture is classified as
//! seed data and will be pruned. Entities created with an explicit
//! `seeded` flag are matched on that flag instead.

use super::{EntityKind, FinancialEntity};

/// Identifiers used by the bundled example records.
pub const SEED_IDENTIFIERS: &[&str] = &[
    "1",
    "2",
    "3",
    "4",
    "5",
    "default_cash",
    "default_bank",
    "default_credit_card",
    "sample_asset_1",
    "sample_asset_2",
    "sample_liability_1",
];

/// Display names used by the bundled example assets, liabilities and accounts.
pub const SEED_NAMES: &[&str] = &[
    "現金",
    "銀行存款",
    "信用卡",
    "房貸",
    "台積電",
    "Default Cash",
    "Default Bank Account",
];

/// Bundled example transactions as (description or category, amount).
pub const SEED_TRANSACTIONS: &[(&str, f64)] = &[
    ("薪水", 80000.0),
    ("餐飲", 5000.0),
    ("交通", 3000.0),
    ("房租", 15000.0),
    ("娛樂", 2000.0),
    ("獎金", 10000.0),
];

/// Default-data marker. Evaluated at prune time only, never persisted.
pub fn is_default_data(entity: &FinancialEntity) -> bool {
    if entity.seeded || SEED_IDENTIFIERS.contains(&entity.id.as_str()) {
        return true;
    }

    match entity.kind {
        EntityKind::Transaction => matches_seed_transaction(entity),
        _ => SEED_NAMES.contains(&entity.name.as_str()),
    }
}

fn matches_seed_transaction(entity: &FinancialEntity) -> bool {
    let amount = entity.primary_amount();
    let texts = [Some(entity.name.as_str()), entity.text_field("category")];

    SEED_TRANSACTIONS.iter().any(|(text, seed_amount)| {
        amount == *seed_amount && texts.iter().flatten().any(|t| t == text)
    })
}
