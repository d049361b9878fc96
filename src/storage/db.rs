//! SQLite pool setup and schema migrations.

use std::str::FromStr;

use sqlx::sqlite::{SqliteConnectOptions, SqliteJournalMode, SqlitePool, SqlitePoolOptions};

use crate::{config::DatabaseConfig, error::AppResult};

/// Open the pool described by `config`: WAL journal, enforced foreign keys,
/// and a busy timeout so concurrent writers wait instead of failing.
pub async fn connect(config: &DatabaseConfig) -> AppResult<SqlitePool> {
    let options = SqliteConnectOptions::from_str(&config.url)?
        .journal_mode(SqliteJournalMode::Wal)
        .foreign_keys(true)
        .busy_timeout(config.busy_timeout)
        .create_if_missing(true);

    let pool = SqlitePoolOptions::new()
        .max_connections(config.max_connections)
        .connect_with(options)
        .await?;

    Ok(pool)
}

pub async fn migrate(pool: &SqlitePool) -> AppResult<()> {
    sqlx::migrate!("./migrations").run(pool).await?;
    Ok(())
}

/// A migrated in-memory database on a single pinned connection.
///
/// Every SQLite in-memory connection is its own database, so the pool never
/// opens a second one or recycles the first.
pub async fn connect_in_memory() -> AppResult<SqlitePool> {
    let options = SqliteConnectOptions::from_str("sqlite::memory:")?.foreign_keys(true);

    let pool = SqlitePoolOptions::new()
        .max_connections(1)
        .min_connections(1)
        .idle_timeout(None)
        .max_lifetime(None)
        .connect_with(options)
        .await?;

    migrate(&pool).await?;
    Ok(pool)
}

#[cfg(test)]
pub(crate) async fn seed_user(pool: &SqlitePool, first_name: &str, last_name: &str) -> i64 {
    let email = format!(
        "{}.{}@example.com",
        first_name.to_lowercase(),
        last_name.to_lowercase()
    );
    let (id,): (i64,) = sqlx::query_as(
        "INSERT INTO users (first_name, last_name, email, verified) VALUES (?, ?, ?, 1) RETURNING id",
    )
    .bind(first_name)
    .bind(last_name)
    .bind(email)
    .fetch_one(pool)
    .await
    .unwrap();
    id
}

/// A migrated on-disk pool with several connections, for tests that need
/// real write contention.
#[cfg(test)]
pub(crate) async fn connect_file(dir: &std::path::Path) -> SqlitePool {
    let config = DatabaseConfig {
        url: format!("sqlite://{}", dir.join("chat.db").display()),
        max_connections: 8,
        busy_timeout: std::time::Duration::from_secs(5),
    };
    let pool = connect(&config).await.unwrap();
    migrate(&pool).await.unwrap();
    pool
}
