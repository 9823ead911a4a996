//! SQLite implementation of the ConfigRepository.

use async_trait::async_trait;
use chrono::Utc;
use sqlx::SqlitePool;

use super::format_datetime;
use crate::domain::errors::DomainResult;
use crate::domain::models::OrchestrationConfig;
use crate::domain::ports::ConfigRepository;

#[derive(Clone)]
pub struct SqliteConfigRepository {
    pool: SqlitePool,
}

impl SqliteConfigRepository {
    pub fn new(pool: SqlitePool) -> Self {
        Self { pool }
    }
}

#[async_trait]
impl ConfigRepository for SqliteConfigRepository {
    async fn get(&self) -> DomainResult<OrchestrationConfig> {
        let row: Option<ConfigRow> = sqlx::query_as(
            r#"SELECT pool_max_sandboxes, pool_idle_timeout_secs, default_snapshot, trigger_enabled,
                      trigger_poll_interval_secs, execution_timeout_secs, max_retries,
                      retry_base_delay_secs, retry_max_delay_secs
               FROM orchestration_config WHERE id = 1"#,
        )
        .fetch_optional(&self.pool)
        .await?;

        Ok(row.map(Into::into).unwrap_or_default())
    }

    async fn seed(&self, config: &OrchestrationConfig) -> DomainResult<OrchestrationConfig> {
        self.write(config, "INSERT OR IGNORE").await?;
        self.get().await
    }

    async fn save(&self, config: &OrchestrationConfig) -> DomainResult<()> {
        self.write(config, "INSERT OR REPLACE").await
    }
}

impl SqliteConfigRepository {
    async fn write(&self, config: &OrchestrationConfig, verb: &str) -> DomainResult<()> {
        let query = format!(
            r#"{verb} INTO orchestration_config (id, pool_max_sandboxes, pool_idle_timeout_secs,
                   default_snapshot, trigger_enabled, trigger_poll_interval_secs,
                   execution_timeout_secs, max_retries, retry_base_delay_secs,
                   retry_max_delay_secs, updated_at)
               VALUES (1, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?)"#
        );
        sqlx::query(&query)
            .bind(i64::from(config.pool_max_sandboxes))
            .bind(i64::try_from(config.pool_idle_timeout_secs).unwrap_or(i64::MAX))
            .bind(&config.default_snapshot)
            .bind(config.trigger_enabled)
            .bind(i64::try_from(config.trigger_poll_interval_secs).unwrap_or(i64::MAX))
            .bind(i64::try_from(config.execution_timeout_secs).unwrap_or(i64::MAX))
            .bind(i64::from(config.max_retries))
            .bind(i64::try_from(config.retry_base_delay_secs).unwrap_or(i64::MAX))
            .bind(i64::try_from(config.retry_max_delay_secs).unwrap_or(i64::MAX))
            .bind(format_datetime(Utc::now()))
            .execute(&self.pool)
            .await?;
        Ok(())
    }
}

#[derive(sqlx::FromRow)]
struct ConfigRow {
    pool_max_sandboxes: i64,
    pool_idle_timeout_secs: i64,
    default_snapshot: String,
    trigger_enabled: bool,
    trigger_poll_interval_secs: i64,
    execution_timeout_secs: i64,
    max_retries: i64,
    retry_base_delay_secs: i64,
    retry_max_delay_secs: i64,
}

impl From<ConfigRow> for OrchestrationConfig {
    fn from(row: ConfigRow) -> Self {
        Self {
            pool_max_sandboxes: u32::try_from(row.pool_max_sandboxes).unwrap_or(1),
            pool_idle_timeout_secs: u64::try_from(row.pool_idle_timeout_secs).unwrap_or_default(),
            default_snapshot: row.default_snapshot,
            trigger_enabled: row.trigger_enabled,
            trigger_poll_interval_secs: u64::try_from(row.trigger_poll_interval_secs).unwrap_or(1),
            execution_timeout_secs: u64::try_from(row.execution_timeout_secs).unwrap_or_default(),
            max_retries: u32::try_from(row.max_retries).unwrap_or_default(),
            retry_base_delay_secs: u64::try_from(row.retry_base_delay_secs).unwrap_or_default(),
            retry_max_delay_secs: u64::try_from(row.retry_max_delay_secs).unwrap_or_default(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::adapters::sqlite::create_migrated_test_pool;

    async fn setup_test_repo() -> SqliteConfigRepository {
        SqliteConfigRepository::new(create_migrated_test_pool().await.unwrap())
    }

    #[tokio::test]
    async fn test_get_defaults_when_unset() {
        let repo = setup_test_repo().await;
        assert_eq!(repo.get().await.unwrap(), OrchestrationConfig::default());
    }

    #[tokio::test]
    async fn test_seed_does_not_overwrite() {
        let repo = setup_test_repo().await;
        let first = OrchestrationConfig { pool_max_sandboxes: 2, ..Default::default() };
        let second = OrchestrationConfig { pool_max_sandboxes: 9, ..Default::default() };

        assert_eq!(repo.seed(&first).await.unwrap().pool_max_sandboxes, 2);
        assert_eq!(repo.seed(&second).await.unwrap().pool_max_sandboxes, 2);
    }

    #[tokio::test]
    async fn test_save_replaces() {
        let repo = setup_test_repo().await;
        repo.seed(&OrchestrationConfig::default()).await.unwrap();
        let edited = OrchestrationConfig {
            trigger_enabled: false,
            max_retries: 0,
            retry_base_delay_secs: 2,
            retry_max_delay_secs: 30,
            ..Default::default()
        };
        repo.save(&edited).await.unwrap();
        assert_eq!(repo.get().await.unwrap(), edited);
    }
}
