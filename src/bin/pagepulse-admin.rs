use anyhow::{bail, Context, Result};
use chrono::Utc;
use clap::{Parser, Subcommand};
use pagepulse::config::{Config, DatabaseBackend};
use pagepulse::store::{AggregateStore, PostgresAggregateStore, SqliteAggregateStore};
use pagepulse::tracking::models::{day_range, window_bounds, AccessTier};
use pagepulse::tracking::reports;
use std::sync::Arc;

#[derive(Parser)]
#[command(name = "pagepulse-admin")]
#[command(about = "PagePulse entity management CLI", long_about = None)]
struct Cli {
    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Register an entity under a public slug
    Register {
        /// Public slug used in beacon calls
        slug: String,
        /// Stable entity id (generated when omitted)
        #[arg(long)]
        entity_id: Option<String>,
        /// Access tier (none, basic, premium, demo)
        #[arg(long, default_value = "none")]
        tier: String,
    },
    /// Change an entity's access tier
    SetTier {
        slug: String,
        /// Access tier (none, basic, premium, demo)
        tier: String,
    },
    /// List registered entities
    List,
    /// Print a summary fold for an entity
    Show {
        entity_id: String,
        #[arg(long, default_value_t = 7)]
        range_days: u32,
    },
}

fn parse_tier(raw: &str) -> Result<AccessTier> {
    match AccessTier::from_str(&raw.to_lowercase()) {
        Some(tier) => Ok(tier),
        None => bail!("unknown tier '{raw}', expected one of: none, basic, premium, demo"),
    }
}

fn generate_entity_id() -> String {
    use rand::Rng;
    let bytes: [u8; 8] = rand::rng().random();
    hex::encode(bytes)
}

#[tokio::main]
async fn main() -> Result<()> {
    tracing_subscriber::fmt::init();

    let cli = Cli::parse();
    let config = Config::from_env()?;

    let store: Arc<dyn AggregateStore> = match config.database.backend {
        DatabaseBackend::Sqlite => Arc::new(
            SqliteAggregateStore::new(&config.database.url, config.database.max_connections)
                .await?,
        ),
        DatabaseBackend::Postgres => {
            Arc::new(PostgresAggregateStore::new(&config.database.url).await?)
        }
    };

    // Ensure database is initialized
    store.init().await?;

    match cli.command {
        Commands::Register {
            slug,
            entity_id,
            tier,
        } => {
            let tier = parse_tier(&tier)?;
            let entity_id = entity_id.unwrap_or_else(generate_entity_id);
            let record = store
                .register_entity(&slug, &entity_id, tier)
                .await
                .context("failed to register entity")?;
            println!(
                "✓ Registered slug '{}' -> entity '{}' (tier: {})",
                record.slug,
                record.entity_id,
                record.tier.as_str()
            );
        }
        Commands::SetTier { slug, tier } => {
            let tier = parse_tier(&tier)?;
            if store.set_tier(&slug, tier).await? {
                println!("✓ Set tier of '{}' to {}", slug, tier.as_str());
            } else {
                println!("⚠ No entity registered under slug '{}'", slug);
            }
        }
        Commands::List => {
            let entities = store.list_entities(100, 0).await?;
            if entities.is_empty() {
                println!("No entities registered.");
            } else {
                println!("{:<24} {:<20} {}", "Slug", "Entity ID", "Tier");
                println!("{}", "-".repeat(56));
                for entity in entities {
                    println!(
                        "{:<24} {:<20} {}",
                        entity.slug,
                        entity.entity_id,
                        entity.tier.as_str()
                    );
                }
            }
        }
        Commands::Show {
            entity_id,
            range_days,
        } => {
            let today = Utc::now().date_naive();
            let (from, to) = window_bounds(today, range_days);
            let records = store.read_range(&entity_id, &from, &to).await?;
            let keys = day_range(today, range_days);
            let report = reports::summary(&records, &keys, range_days);

            println!("Entity {} ({} to {})", entity_id, from, to);
            println!("{:<12} {:>8} {:>8} {:>8}", "Day", "Views", "Clicks", "Unique");
            for day in &report.days {
                let unique = day
                    .unique_visitors
                    .map(|u| u.to_string())
                    .unwrap_or_else(|| "-".to_string());
                println!(
                    "{:<12} {:>8} {:>8} {:>8}",
                    day.day, day.views, day.clicks, unique
                );
            }
            println!(
                "Totals: {} views, {} clicks",
                report.totals.views, report.totals.clicks
            );
        }
    }

    Ok(())
}
