//! Academy progression maintenance tool
//!
//! ```text
//! academy-progression migrate
//! academy-progression replay <student_id>
//! academy-progression leaderboard <organization_id> [limit]
//! academy-progression risk <student_id>
//! academy-progression seed-achievements <organization_id>
//! academy-progression seed-challenges <course_id>
//! ```
//!
//! Environment: `DATABASE_URL`, `PG_MAX_CONNECTIONS` (default 5),
//! `PROGRESSION_CONFIG` (default `config/progression.json`),
//! `ACADEMY_LOG_LEVEL`, `ACADEMY_SQL_LOG_LEVEL`, `RUST_LOG`.

use std::path::Path;

use anyhow::{bail, Context, Result};
use tracing::{debug, info, warn};

use academy_core::logging::{init_tracing, LoggingSnapshot, TracingConfig};
use academy_core::{EngineConfig, ProgressionEngine};
use academy_store::storage;

const USAGE: &str = "usage: academy-progression <migrate | replay <student> | leaderboard <org> [limit] | \
risk <student> | seed-achievements <org> | seed-challenges <course>>";

fn load_config() -> Result<EngineConfig> {
    let path = std::env::var("PROGRESSION_CONFIG").unwrap_or_else(|_| "config/progression.json".to_string());
    if Path::new(&path).exists() {
        let config = EngineConfig::load(&path).with_context(|| format!("loading {}", path))?;
        info!("Engine config loaded from {}", path);
        Ok(config)
    } else {
        warn!("Config file {} not found, using built-in defaults", path);
        Ok(EngineConfig::default())
    }
}

fn arg(args: &[String], i: usize) -> Result<&str> {
    args.get(i)
        .map(String::as_str)
        .with_context(|| format!("missing argument\n{}", USAGE))
}

fn print_json<T: serde::Serialize>(value: &T) -> Result<()> {
    println!("{}", serde_json::to_string_pretty(value)?);
    Ok(())
}

#[tokio::main]
async fn main() -> Result<()> {
    let tracing_config = TracingConfig::from_env();
    init_tracing(&tracing_config);
    let rust_log = std::env::var("RUST_LOG").ok();
    debug!(
        logging = %LoggingSnapshot::capture(&tracing_config, rust_log.as_deref()).to_json(),
        "Logging configured"
    );

    let args: Vec<String> = std::env::args().skip(1).collect();
    let Some(command) = args.first().map(String::as_str) else {
        bail!(USAGE);
    };

    let database_url = std::env::var("DATABASE_URL").context("DATABASE_URL must be set")?;
    let max_connections: u32 = std::env::var("PG_MAX_CONNECTIONS")
        .ok()
        .and_then(|s| s.parse().ok())
        .unwrap_or(5);

    let pg = storage::postgres::PostgresStore::new(&database_url, max_connections)
        .await
        .context("connecting to PostgreSQL")?;

    if command == "migrate" {
        let applied = pg.run_migrations().await?;
        info!("Schema up to date ({} migrations applied now)", applied);
        return Ok(());
    }

    let engine = ProgressionEngine::new(
        storage::storage_manager(std::sync::Arc::new(pg)),
        load_config()?,
    );

    match command {
        "replay" => {
            let report = engine.replay(arg(&args, 1)?).await?;
            if report.repaired {
                warn!(
                    "Projection for {} repaired: {} -> {}",
                    report.student_id, report.projected_total, report.ledger_total
                );
            }
            print_json(&report)?;
        }
        "leaderboard" => {
            let limit = match args.get(2) {
                Some(raw) => Some(raw.parse::<usize>().with_context(|| format!("invalid limit: {}", raw))?),
                None => None,
            };
            print_json(&engine.leaderboard(arg(&args, 1)?, limit).await?)?;
        }
        "risk" => print_json(&engine.estimate_risk(arg(&args, 1)?).await?)?,
        "seed-achievements" => {
            let count = engine.seed_default_achievements(arg(&args, 1)?).await?;
            info!("Seeded {} achievements", count);
        }
        "seed-challenges" => {
            let count = engine.seed_weekly_challenges(arg(&args, 1)?).await?;
            info!("Seeded {} weekly challenges", count);
        }
        other => bail!("unknown command: {}\n{}", other, USAGE),
    }

    Ok(())
}
