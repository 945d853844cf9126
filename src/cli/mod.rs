use anyhow::{Context, Result, anyhow};
use clap::{Parser, Subcommand};
use serde_json::Value;

use crate::application::{
    AppError, DEFAULT_LOCAL_DATABASE, DEFAULT_REMOTE_DATABASE, DomainService, FinanceSync,
    SyncConfig, SyncOutcome, Verdict,
};
use crate::domain::{EntityKind, FinancialEntity};

/// Finsync - verified sync for a personal finance tracker
#[derive(Parser)]
#[command(name = "finsync")]
#[command(about = "Sync assets, transactions, liabilities and accounts to a remote store, verifying every write")]
#[command(version)]
pub struct Cli {
    /// Remote store database file path
    #[arg(long, env = "FINSYNC_REMOTE_DB", default_value = DEFAULT_REMOTE_DATABASE)]
    pub remote_db: String,

    /// Local key-value store database file path
    #[arg(long, env = "FINSYNC_LOCAL_DB", default_value = DEFAULT_LOCAL_DATABASE)]
    pub local_db: String,

    /// Signed-in user id (omit to work offline, unauthenticated)
    #[arg(short, long, env = "FINSYNC_USER")]
    pub user: Option<String>,

    /// Signed-in user email
    #[arg(long, env = "FINSYNC_EMAIL")]
    pub email: Option<String>,

    /// Enable verbose output
    #[arg(short, long, global = true)]
    pub verbose: bool,

    #[command(subcommand)]
    pub command: Commands,
}

#[derive(Subcommand)]
pub enum Commands {
    /// Create both databases
    Init,

    /// Create or update an entity, then verify it reached the remote store
    Upsert {
        /// Entity kind: asset, transaction, liability, account
        kind: String,

        /// Display name (description for transactions)
        name: String,

        /// Identifier; legacy or malformed ids are replaced
        #[arg(long)]
        id: Option<String>,

        /// Kind discriminator, e.g. cash, stock, expense, mortgage
        #[arg(short = 't', long = "type", default_value = "other")]
        entity_type: String,

        /// Headline amount (current value, amount or balance)
        #[arg(short, long)]
        amount: Option<f64>,

        /// Extra field as key=value (repeatable, values parsed as JSON when possible)
        #[arg(short, long = "field")]
        fields: Vec<String>,

        /// Update the existing entity with this --id rather than create one
        #[arg(long, requires = "id")]
        update: bool,
    },

    /// Delete an entity (accounts are deactivated)
    Delete {
        kind: String,
        id: String,
    },

    /// Read the remote store to confirm an entity exists (or is gone)
    Verify {
        kind: String,
        id: String,

        /// Confirm absence instead of presence
        #[arg(long)]
        absent: bool,
    },

    /// List locally cached entities
    List {
        /// Entity kind (omit for all kinds)
        kind: Option<String>,
    },

    /// Push every cached entity to the remote store
    Push {
        /// Entity kind (omit for all kinds)
        kind: Option<String>,
    },

    /// Show local counts and whether financial data remains
    Status,

    /// Clear all local data (platform keys are kept)
    Reset {
        /// Do not ask for confirmation
        #[arg(long)]
        yes: bool,
    },

    /// Remove bundled example data only
    Prune,
}

impl Cli {
    pub fn config(&self) -> SyncConfig {
        SyncConfig {
            remote_database: self.remote_db.clone(),
            local_database: self.local_db.clone(),
            user_id: self.user.clone(),
            email: self.email.clone(),
        }
    }

    pub async fn run(self) -> Result<()> {
        let app = FinanceSync::open(&self.config()).await?;

        if self.verbose {
            app.bus.subscribe(crate::application::events::SYNC_ERROR, |event| {
                eprintln!("[sync] {:?}", event);
                Ok(())
            });
        }

        let result = run_command(&app, self.command).await;
        app.shutdown().await;
        result
    }
}

async fn run_command(app: &FinanceSync, command: Commands) -> Result<()> {
    match command {
        Commands::Init => {
            println!("Databases initialized.");
        }

        Commands::Upsert {
            kind,
            name,
            id,
            entity_type,
            amount,
            fields,
            update,
        } => {
            let kind = parse_kind(&kind)?;
            let mut entity = FinancialEntity::new(kind, name, entity_type);
            if let Some(id) = id {
                entity = entity.with_id(id);
            }
            if let Some(amount) = amount {
                entity = entity.with_field(kind.primary_money_column().name, amount);
            }
            for field in &fields {
                let (key, value) = parse_field(field)?;
                entity = entity.with_field(key, value);
            }

            let service = app.service(kind);
            let outcome = if update {
                service.update(entity).await
            } else {
                service.add(entity).await
            };
            print_outcome(&outcome)?;
        }

        Commands::Delete { kind, id } => {
            let kind = parse_kind(&kind)?;
            let outcome = app.service(kind).remove(&id).await;
            print_outcome(&outcome)?;
        }

        Commands::Verify { kind, id, absent } => {
            let kind = parse_kind(&kind)?;
            let verdict = if absent {
                app.coordinator.verify_deletion(kind, &id).await
            } else {
                app.coordinator.verify_presence(kind, &id).await
            };
            print_verdict(&verdict)?;
        }

        Commands::List { kind } => {
            for kind in kinds(kind.as_deref())? {
                let entities = app.service(kind).get_all();
                println!("{} ({})", kind.table(), entities.len());
                if entities.is_empty() {
                    continue;
                }
                println!("  {:<36} {:<24} {:<12} {:>14}", "ID", "NAME", "TYPE", "AMOUNT");
                println!("  {}", "-".repeat(89));
                for entity in entities {
                    println!(
                        "  {:<36} {:<24} {:<12} {:>14.2}",
                        entity.id,
                        truncate(&entity.name, 24),
                        truncate(&entity.entity_type, 12),
                        entity.primary_amount()
                    );
                }
            }
        }

        Commands::Push { kind } => {
            for kind in kinds(kind.as_deref())? {
                let result = app.service(kind).push_all().await;
                println!(
                    "{}: {} synced, {} failed",
                    kind.table(),
                    result.success_count,
                    result.failed_count
                );
                for error in &result.errors {
                    println!("  ✗ {}", error);
                }
            }
        }

        Commands::Status => {
            let status = app.status().await;
            for (kind, count) in &status.local_counts {
                println!("{:<14} {}", kind.table(), count);
            }
            println!(
                "Financial data stored locally: {}",
                if status.has_default_data { "yes" } else { "no" }
            );
        }

        Commands::Reset { yes } => {
            if !yes {
                return Err(anyhow!(
                    "Reset removes all local financial data. Re-run with --yes to confirm."
                ));
            }
            let report = app.reset.reset_all().await.map_err(AppError::from)?;
            println!(
                "Reset complete: {} key(s) removed, {} collection(s) cleared",
                report.removed_keys, report.cleared_collections
            );
        }

        Commands::Prune => {
            let report = app.reset.prune_defaults_only().await;
            for count in &report.counts {
                println!(
                    "{:<14} removed {} of {}",
                    count.kind.table(),
                    count.removed,
                    count.before
                );
            }
            for failure in &report.failures {
                println!("  ✗ {}", failure);
            }
            if !report.success() {
                return Err(anyhow!("Prune finished with {} failure(s)", report.failures.len()));
            }
        }
    }

    Ok(())
}

fn parse_kind(kind: &str) -> Result<EntityKind> {
    EntityKind::from_str(kind).ok_or_else(|| AppError::UnknownKind(kind.to_string()).into())
}

fn kinds(kind: Option<&str>) -> Result<Vec<EntityKind>> {
    match kind {
        Some(kind) => Ok(vec![parse_kind(kind)?]),
        None => Ok(EntityKind::ALL.to_vec()),
    }
}

fn parse_field(field: &str) -> Result<(String, Value)> {
    let (key, raw) = field
        .split_once('=')
        .with_context(|| format!("Invalid field '{}'. Use key=value", field))?;
    let value = serde_json::from_str(raw).unwrap_or_else(|_| Value::String(raw.to_string()));
    Ok((key.trim().to_string(), value))
}

fn print_outcome(outcome: &SyncOutcome) -> Result<()> {
    if outcome.success {
        println!("✓ {}", outcome.message);
        Ok(())
    } else {
        Err(anyhow!("✗ {}", outcome.message))
    }
}

fn print_verdict(verdict: &Verdict) -> Result<()> {
    if verdict.success {
        println!("✓ {}", verdict.message);
        if let Some(payload) = &verdict.payload {
            println!("{}", serde_json::to_string_pretty(payload)?);
        }
        Ok(())
    } else {
        Err(anyhow!("✗ {} ({:?})", verdict.message, verdict.cause))
    }
}

fn truncate(s: &str, max_len: usize) -> String {
    if s.chars().count() <= max_len {
        s.to_string()
    } else {
        let cut: String = s.chars().take(max_len.saturating_sub(3)).collect();
        format!("{}...", cut)
    }
}
