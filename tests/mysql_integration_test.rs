// ABOUTME: Integration tests against live MySQL servers
// ABOUTME: Run with TEST_MASTER_URL, TEST_SLAVE_URL and TEST_SYNC_URL set and --ignored

use mysql_async::prelude::*;
use mysql_async::Pool;
use mysql_syncer::config::{ConnectionConfig, RunConfig};
use mysql_syncer::mysql::{connect, MySqlDatabase, MySqlHashStore};
use mysql_syncer::syncer::{MutationLog, Synchronizer};
use std::collections::BTreeMap;
use std::env;
use std::sync::Arc;

/// Helper to get test database URLs from environment
fn get_test_urls() -> Option<(String, String, String)> {
    let master = env::var("TEST_MASTER_URL").ok()?;
    let slave = env::var("TEST_SLAVE_URL").ok()?;
    let sync = env::var("TEST_SYNC_URL").ok()?;
    Some((master, slave, sync))
}

fn url_config(url: &str) -> ConnectionConfig {
    ConnectionConfig {
        url: Some(url.to_string()),
        ..ConnectionConfig::default()
    }
}

struct Live {
    master: Pool,
    slave: Pool,
    sync: Pool,
    config: RunConfig,
}

impl Live {
    async fn connect() -> Option<Self> {
        let (master_url, slave_url, sync_url) = get_test_urls()?;
        let config = RunConfig {
            master: url_config(&master_url),
            slave: url_config(&slave_url),
            sync: url_config(&sync_url),
            chunk_size: 3,
            ..RunConfig::default()
        };
        Some(Self {
            master: connect("master", &config.master, 4).await.ok()?,
            slave: connect("slave", &config.slave, 4).await.ok()?,
            sync: connect("sync", &config.sync, 4).await.ok()?,
            config,
        })
    }

    fn synchronizer(&self, config: RunConfig) -> Synchronizer {
        let log = Arc::new(MutationLog::disabled());
        Synchronizer::new(
            Arc::new(MySqlDatabase::new("master", self.master.clone())),
            Arc::new(MySqlDatabase::new("slave", self.slave.clone())),
            Arc::new(MySqlHashStore::new(self.sync.clone(), log.clone())),
            Arc::new(config),
            log,
        )
    }

    async fn both(&self, sql: &str) -> anyhow::Result<()> {
        self.master.get_conn().await?.query_drop(sql).await?;
        self.slave.get_conn().await?.query_drop(sql).await?;
        Ok(())
    }

    async fn rows(pool: &Pool, table: &str) -> anyhow::Result<Vec<(u32, Option<u32>, String)>> {
        let mut conn = pool.get_conn().await?;
        let rows = conn
            .query(format!(
                "SELECT id, site_id, body FROM `{}` ORDER BY id",
                table
            ))
            .await?;
        Ok(rows)
    }

    async fn disconnect(self) {
        let _ = self.master.disconnect().await;
        let _ = self.slave.disconnect().await;
        let _ = self.sync.disconnect().await;
    }
}

async fn setup_table(live: &Live, table: &str) -> anyhow::Result<()> {
    live.both(&format!("DROP TABLE IF EXISTS `{}`", table)).await?;
    live.both(&format!(
        "CREATE TABLE `{}` (
            id INT UNSIGNED NOT NULL,
            site_id INT UNSIGNED NULL,
            body VARCHAR(255) NOT NULL,
            PRIMARY KEY (id)
        ) ENGINE=InnoDB DEFAULT CHARSET=utf8mb4",
        table
    ))
    .await
}

#[tokio::test]
#[ignore]
async fn test_live_sync_converges() {
    let Some(live) = Live::connect().await else {
        eprintln!("Skipping test: TEST_MASTER_URL, TEST_SLAVE_URL or TEST_SYNC_URL not set");
        return;
    };
    let table = "syncer_test_converge";
    setup_table(&live, table).await.unwrap();

    live.master
        .get_conn()
        .await
        .unwrap()
        .query_drop(format!(
            "INSERT INTO `{}` VALUES (1, 1, 'a'), (2, 1, 'b'), (3, NULL, 'ünïcode'), (4, 2, 'd')",
            table
        ))
        .await
        .unwrap();
    live.slave
        .get_conn()
        .await
        .unwrap()
        .query_drop(format!(
            "INSERT INTO `{}` VALUES (2, 1, 'stale'), (5, 3, 'gone')",
            table
        ))
        .await
        .unwrap();

    let config = live.config.clone();
    let summary = live.synchronizer(config.clone()).sync_database().await.unwrap();
    let totals = summary.table(table).unwrap().rows;
    assert_eq!(totals.inserted, 3);
    assert_eq!(totals.updated, 1);
    assert_eq!(totals.deleted, 1);

    let master_rows = Live::rows(&live.master, table).await.unwrap();
    let slave_rows = Live::rows(&live.slave, table).await.unwrap();
    assert_eq!(master_rows, slave_rows);

    let second = live.synchronizer(config).sync_database().await.unwrap();
    assert_eq!(second.table(table).unwrap().rows.rows_changed(), 0);

    live.both(&format!("DROP TABLE IF EXISTS `{}`", table))
        .await
        .unwrap();
    live.disconnect().await;
}

#[tokio::test]
#[ignore]
async fn test_live_partitioned_sync_converges() {
    let Some(live) = Live::connect().await else {
        eprintln!("Skipping test: TEST_MASTER_URL, TEST_SLAVE_URL or TEST_SYNC_URL not set");
        return;
    };
    let table = "syncer_test_partitioned";
    setup_table(&live, table).await.unwrap();

    live.master
        .get_conn()
        .await
        .unwrap()
        .query_drop(format!(
            "INSERT INTO `{}` VALUES (1, 1, 'a'), (2, 2, 'b'), (3, NULL, 'c')",
            table
        ))
        .await
        .unwrap();
    live.slave
        .get_conn()
        .await
        .unwrap()
        .query_drop(format!(
            "INSERT INTO `{}` VALUES (1, 1, 'a'), (4, 9, 'x')",
            table
        ))
        .await
        .unwrap();

    let mut partitions = BTreeMap::new();
    partitions.insert(table.to_string(), "site_id".to_string());
    let config = RunConfig {
        partitioned_tables: partitions,
        use_multi_processing: true,
        workers: Some(3),
        ..live.config.clone()
    };
    let summary = live.synchronizer(config).sync_database().await.unwrap();

    assert!(summary.failed_units.is_empty());
    let table_summary = summary.table(table).unwrap();
    assert_eq!(table_summary.units, 4);
    assert_eq!(
        Live::rows(&live.master, table).await.unwrap(),
        Live::rows(&live.slave, table).await.unwrap()
    );

    live.both(&format!("DROP TABLE IF EXISTS `{}`", table))
        .await
        .unwrap();
    live.disconnect().await;
}

#[tokio::test]
#[ignore]
async fn test_live_case_variant_keys_converge() {
    let Some(live) = Live::connect().await else {
        eprintln!("Skipping test: TEST_MASTER_URL, TEST_SLAVE_URL or TEST_SYNC_URL not set");
        return;
    };
    let table = "syncer_test_collation";
    live.both(&format!("DROP TABLE IF EXISTS `{}`", table))
        .await
        .unwrap();
    live.both(&format!(
        "CREATE TABLE `{}` (
            code VARCHAR(32) NOT NULL,
            label VARCHAR(32) NOT NULL,
            PRIMARY KEY (code)
        ) ENGINE=InnoDB DEFAULT CHARSET=utf8mb4 COLLATE=utf8mb4_general_ci",
        table
    ))
    .await
    .unwrap();
    live.master
        .get_conn()
        .await
        .unwrap()
        .query_drop(format!("INSERT INTO `{}` VALUES ('ABC', 'x'), ('Zürich', 'y')", table))
        .await
        .unwrap();
    live.slave
        .get_conn()
        .await
        .unwrap()
        .query_drop(format!("INSERT INTO `{}` VALUES ('abc', 'x'), ('zurich', 'y')", table))
        .await
        .unwrap();

    let summary = live
        .synchronizer(live.config.clone())
        .sync_database()
        .await
        .unwrap();
    assert!(summary.failed_units.is_empty());
    assert_eq!(summary.table(table).unwrap().rows.deleted, 0);

    let select = format!("SELECT code, label FROM `{}` ORDER BY BINARY code", table);
    let master_rows: Vec<(String, String)> =
        live.master.get_conn().await.unwrap().query(select.as_str()).await.unwrap();
    let slave_rows: Vec<(String, String)> =
        live.slave.get_conn().await.unwrap().query(select.as_str()).await.unwrap();
    assert_eq!(master_rows, slave_rows);

    live.both(&format!("DROP TABLE IF EXISTS `{}`", table))
        .await
        .unwrap();
    live.disconnect().await;
}
