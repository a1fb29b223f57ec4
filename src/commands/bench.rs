// ABOUTME: Bench command - measures how column type affects insert and sync time
// ABOUTME: Seeds VARCHAR and TEXT log tables, then syncs each variant in process

use anyhow::{bail, Context, Result};
use clap::Args;
use indicatif::{ProgressBar, ProgressStyle};
use mysql_async::prelude::*;
use mysql_async::{Pool, Value};
use std::sync::Arc;
use std::time::{Duration, Instant};

use super::{open_mutation_log, ConfigArgs, Connections};
use crate::config::{ConnectionConfig, RunConfig};
use crate::mysql::{close_pool, connect_with_retry};
use crate::syncer::Statement;
use crate::utils::quote_mysql_ident;

const SLAVE_MESSAGE: &str = "hello world";

#[derive(Args, Clone, Debug)]
pub struct BenchArgs {
    #[command(flatten)]
    pub config: ConfigArgs,
    /// Rows seeded into every table
    #[arg(long, default_value_t = 10_000)]
    pub rows: u64,
    /// Rows per seeding INSERT
    #[arg(long, default_value_t = 1_000)]
    pub batch_size: u64,
    /// Length of the master log message
    #[arg(long, default_value_t = 5_000)]
    pub message_length: usize,
    /// Prefix for the four benchmark schemas
    #[arg(long, default_value = "syncer_bench")]
    pub schema_prefix: String,
}

/// One column-type variant under test.
struct Variant {
    name: &'static str,
    table: &'static str,
    message_type: &'static str,
    master_db: String,
    slave_db: String,
}

impl Variant {
    fn create_table_sql(&self) -> String {
        format!(
            "CREATE TABLE {} (
    `id` int unsigned NOT NULL AUTO_INCREMENT,
    `message` {} NOT NULL,
    `creation_time` int unsigned NOT NULL,
    PRIMARY KEY (`id`)
) ENGINE=InnoDB DEFAULT CHARSET=utf8mb4",
            quote_mysql_ident(self.table),
            self.message_type
        )
    }
}

fn variants(prefix: &str) -> Vec<Variant> {
    vec![
        Variant {
            name: "varchar",
            table: "logs_varchar",
            message_type: "varchar(6000)",
            master_db: format!("{}_master_varchar", prefix),
            slave_db: format!("{}_slave_varchar", prefix),
        },
        Variant {
            name: "text",
            table: "logs_textfield",
            message_type: "TEXT",
            master_db: format!("{}_master_text", prefix),
            slave_db: format!("{}_slave_text", prefix),
        },
    ]
}

/// Generated master message: repeated lowercase alphabet.
fn master_message(length: usize) -> String {
    (b'a'..=b'z').cycle().take(length).map(char::from).collect()
}

fn seed_rows(ids: std::ops::RangeInclusive<u64>, message: &str, creation_time: i64) -> Vec<Vec<Value>> {
    ids.map(|id| {
        vec![
            Value::UInt(id),
            Value::from(message),
            Value::Int(creation_time),
        ]
    })
    .collect()
}

pub async fn bench(args: &BenchArgs) -> Result<()> {
    if args.rows == 0 || args.batch_size == 0 {
        bail!("--rows and --batch-size must be greater than 0");
    }
    let mut base = RunConfig::load(&args.config.config)?;
    args.config.apply(&mut base);
    if base.master.url.is_some() {
        bail!("bench needs host/user/password fields in [master], not a url");
    }

    let variants = variants(&args.schema_prefix);
    let admin = connect_with_retry("master", &base.master, 1)
        .await
        .context("Failed to connect to benchmark server")?;
    prepare_schemas(&admin, &variants).await?;

    let mut master_pools = Vec::new();
    let mut slave_pools = Vec::new();
    for variant in &variants {
        master_pools.push(connect_schema(&base.master, &variant.master_db).await?);
        slave_pools.push(connect_schema(&base.master, &variant.slave_db).await?);
    }
    close_pool(admin).await;

    let message = master_message(args.message_length);
    let creation_time = chrono::Utc::now().timestamp();

    println!("Inserting master logs...");
    let insert_times = seed(args, &variants, &master_pools, &message, creation_time, true).await?;
    println!("Inserting slave logs...");
    seed(args, &variants, &slave_pools, SLAVE_MESSAGE, creation_time, false).await?;

    for pool in master_pools.into_iter().chain(slave_pools) {
        close_pool(pool).await;
    }

    let mut sync_times = Vec::new();
    for variant in &variants {
        println!("Syncing {} tables", variant.name);
        let config = Arc::new(RunConfig {
            master: base.master.with_database(&variant.master_db),
            slave: base.master.with_database(&variant.slave_db),
            ..base.clone()
        });
        config.validate()?;

        let log = open_mutation_log(&config).await?;
        let connections = Connections::open(&config, log.clone()).await?;
        let started = Instant::now();
        let result = connections
            .synchronizer(config.clone(), log)
            .sync_database()
            .await;
        let elapsed = started.elapsed();
        connections.disconnect().await;

        let summary = result.with_context(|| format!("Sync of {} variant failed", variant.name))?;
        tracing::info!(
            "{} variant: {} rows changed",
            variant.name,
            summary.totals().rows_changed()
        );
        sync_times.push(elapsed);
    }

    println!();
    println!("========================================");
    println!("Benchmark results ({} rows)", args.rows);
    println!("========================================");
    println!("{:<24} {:>14}", "OPERATION", "SECONDS");
    for (variant, elapsed) in variants.iter().zip(&insert_times) {
        println!("{:<24} {:>14.3}", format!("insert_{}", variant.table), elapsed.as_secs_f64());
    }
    for (variant, elapsed) in variants.iter().zip(&sync_times) {
        println!("{:<24} {:>14.3}", format!("sync_test_{}", variant.name), elapsed.as_secs_f64());
    }
    println!();
    Ok(())
}

async fn prepare_schemas(admin: &Pool, variants: &[Variant]) -> Result<()> {
    let mut conn = admin.get_conn().await?;
    for variant in variants {
        for db in [&variant.master_db, &variant.slave_db] {
            let sql = format!("CREATE DATABASE IF NOT EXISTS {}", quote_mysql_ident(db));
            conn.query_drop(sql.as_str())
                .await
                .with_context(|| format!("Failed to execute query:\n{}", sql))?;

            for sql in [
                format!(
                    "DROP TABLE IF EXISTS {}.{}",
                    quote_mysql_ident(db),
                    quote_mysql_ident(variant.table)
                ),
                format!("USE {}", quote_mysql_ident(db)),
                variant.create_table_sql(),
            ] {
                conn.query_drop(sql.as_str())
                    .await
                    .with_context(|| format!("Failed to execute query:\n{}", sql))?;
            }
        }
    }
    Ok(())
}

async fn connect_schema(server: &ConnectionConfig, database: &str) -> Result<Pool> {
    connect_with_retry("bench", &server.with_database(database), 1)
        .await
        .with_context(|| format!("Failed to connect to {}", database))
}

/// Insert ids `1..=rows` into each variant's table, `batch_size` rows per
/// statement. Returns the accumulated insert time per variant when `timed`.
async fn seed(
    args: &BenchArgs,
    variants: &[Variant],
    pools: &[Pool],
    message: &str,
    creation_time: i64,
    timed: bool,
) -> Result<Vec<Duration>> {
    let progress = ProgressBar::new(args.rows);
    progress.set_style(
        ProgressStyle::default_bar()
            .template("{spinner:.green} [{elapsed_precise}] [{bar:40.cyan/blue}] {pos}/{len} ({eta})")
            .context("Invalid progress bar template")?
            .progress_chars("#>-"),
    );

    let mut conns = Vec::new();
    for pool in pools {
        conns.push(pool.get_conn().await?);
    }
    let mut elapsed = vec![Duration::ZERO; variants.len()];

    let mut first = 1u64;
    while first <= args.rows {
        let last = (first + args.batch_size - 1).min(args.rows);
        let rows = seed_rows(first..=last, message, creation_time);

        for (i, variant) in variants.iter().enumerate() {
            let sql = Statement::Insert {
                table: variant.table.to_string(),
                columns: vec![
                    "id".to_string(),
                    "message".to_string(),
                    "creation_time".to_string(),
                ],
                rows: rows.clone(),
            }
            .to_sql();

            let started = Instant::now();
            conns[i]
                .query_drop(sql.as_str())
                .await
                .with_context(|| format!("Failed to insert batch of logs into {}", variant.table))?;
            if timed {
                elapsed[i] += started.elapsed();
            }
        }

        progress.set_position(last);
        first = last + 1;
    }
    progress.finish();
    Ok(elapsed)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_variant_tables() {
        let variants = variants("b");
        assert_eq!(variants[0].master_db, "b_master_varchar");
        assert!(variants[0].create_table_sql().contains("`message` varchar(6000) NOT NULL"));
        assert_eq!(variants[1].table, "logs_textfield");
        assert!(variants[1].create_table_sql().contains("`message` TEXT NOT NULL"));
    }

    #[test]
    fn test_master_message_length() {
        let message = master_message(60);
        assert_eq!(message.len(), 60);
        assert!(message.starts_with("abcdefghijklmnopqrstuvwxyzabcd"));
    }

    #[test]
    fn test_seed_rows_cover_range() {
        let rows = seed_rows(3..=5, "m", 100);
        assert_eq!(rows.len(), 3);
        assert_eq!(rows[0][0], Value::UInt(3));
        assert_eq!(rows[2][0], Value::UInt(5));
    }
}
