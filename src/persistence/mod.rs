//! Persistence Layer
//!
//! SQLite storage for the paper-trading ledger via sqlx. Every write the order
//! path makes goes through one transaction; the repositories therefore take a
//! `&mut SqliteConnection` so they can run on a pooled connection or inside a
//! `Transaction` alike.
//!
//! # Database Schema
//!
//! ## portfolios
//! - agent_id: owner, primary key
//! - cash_balance: decimal TEXT
//! - starting_balance: decimal TEXT, written once
//! - created_at / updated_at
//!
//! ## positions
//! - (agent_id, symbol): primary key
//! - shares: decimal TEXT, always > 0 (rows are deleted, never zeroed)
//! - avg_cost: decimal TEXT, weighted average cost basis
//! - created_at / updated_at
//!
//! ## trades (append-only)
//! - id, agent_id, symbol, side ("buy" | "sell")
//! - shares, price, total_value: decimal TEXT frozen at execution
//! - reasoning: optional free text
//! - created_at
//!
//! ## portfolio_snapshots (append-only)
//! - id, agent_id, total_value, created_at
//!
//! Decimals are stored as TEXT so no value ever round-trips through a float.

pub mod models;
pub mod repository;

use sqlx::pool::PoolConnection;
use sqlx::sqlite::{
    SqliteConnectOptions, SqliteConnection, SqliteJournalMode, SqlitePool, SqlitePoolOptions,
};
use sqlx::{ConnectOptions, Sqlite};
use std::path::Path;
use std::str::FromStr;
use std::time::Duration;
use tracing::{debug, error, info, warn};

/// Database connection pool
pub type DbPool = SqlitePool;

/// Database error
#[derive(Debug, thiserror::Error)]
pub enum DatabaseError {
    #[error("Database connection error: {0}")]
    ConnectionError(#[from] sqlx::Error),

    #[error("Migration error: {0}")]
    MigrationError(String),

    #[error("Query error: {0}")]
    QueryError(String),

    /// Lock contention or a lost compare-and-set; the unit of work may be retried
    #[error("Write conflict: {0}")]
    Conflict(String),

    #[error("Corrupt value in {column}: {value:?}")]
    Corrupt { column: &'static str, value: String },
}

impl DatabaseError {
    /// Classifies a failed statement: busy/locked becomes [`DatabaseError::Conflict`]
    pub fn from_query(context: &str, e: sqlx::Error) -> Self {
        if is_contention(&e) {
            debug!("{} hit lock contention: {}", context, e);
            return DatabaseError::Conflict(format!("{}: {}", context, e));
        }
        error!("{}: {}", context, e);
        DatabaseError::QueryError(format!("{}: {}", context, e))
    }
}

/// SQLITE_BUSY / SQLITE_LOCKED (any extended variant) or an exhausted pool
fn is_contention(e: &sqlx::Error) -> bool {
    match e {
        sqlx::Error::Database(db) => db
            .code()
            .and_then(|code| code.parse::<i32>().ok())
            .map(|code| matches!(code & 0xff, 5 | 6))
            .unwrap_or(false),
        sqlx::Error::PoolTimedOut => true,
        _ => false,
    }
}

/// Database configuration
#[derive(Debug, Clone)]
pub struct DatabaseConfig {
    /// Database URL (e.g., "sqlite://data/clawtrade.db")
    pub url: String,

    /// Maximum number of connections in the pool
    pub max_connections: u32,

    /// Enable query logging
    pub log_queries: bool,

    /// How long a statement waits on a locked database before failing busy
    pub busy_timeout: Duration,
}

impl Default for DatabaseConfig {
    fn default() -> Self {
        Self {
            url: "sqlite://data/clawtrade.db".to_string(),
            max_connections: 5,
            log_queries: cfg!(debug_assertions),
            busy_timeout: Duration::from_secs(5),
        }
    }
}

impl DatabaseConfig {
    /// Private in-memory database, used by tests and dry runs
    pub fn in_memory() -> Self {
        Self {
            url: "sqlite::memory:".to_string(),
            max_connections: 1,
            log_queries: false,
            busy_timeout: Duration::from_secs(5),
        }
    }

    /// Load from environment variables
    pub fn from_env() -> Self {
        let defaults = Self::default();

        let url = std::env::var("DATABASE_URL").unwrap_or(defaults.url);

        let max_connections = std::env::var("DATABASE_MAX_CONNECTIONS")
            .ok()
            .and_then(|s| s.parse().ok())
            .filter(|n: &u32| *n > 0)
            .unwrap_or(defaults.max_connections);

        let log_queries = std::env::var("DATABASE_LOG_QUERIES")
            .ok()
            .and_then(|s| s.parse().ok())
            .unwrap_or(defaults.log_queries);

        let busy_timeout = std::env::var("DATABASE_BUSY_TIMEOUT_MILLISECONDS")
            .ok()
            .and_then(|s| s.parse().ok())
            .map(Duration::from_millis)
            .unwrap_or(defaults.busy_timeout);

        Self {
            url,
            max_connections,
            log_queries,
            busy_timeout,
        }
    }

    fn is_in_memory(&self) -> bool {
        self.url.contains(":memory:") || self.url.contains("mode=memory")
    }
}

/// Initialize the database connection pool
///
/// File databases get WAL journaling and a busy timeout. An in-memory
/// database lives and dies with its connection, so it is pinned to a single
/// connection that is never recycled.
///
/// # Errors
/// Returns error if database connection fails or migrations fail
pub async fn init_database(config: &DatabaseConfig) -> Result<DbPool, DatabaseError> {
    info!("Initializing database: {}", config.url);

    // Ensure data directory exists
    if let Some(db_path) = config.url.strip_prefix("sqlite://") {
        if let Some(parent) = Path::new(db_path).parent() {
            if !parent.as_os_str().is_empty() {
                std::fs::create_dir_all(parent).map_err(|e| {
                    DatabaseError::ConnectionError(sqlx::Error::Configuration(Box::new(e)))
                })?;
            }
        }
    }

    let mut options = SqliteConnectOptions::from_str(&config.url)?
        .create_if_missing(true)
        .foreign_keys(true)
        .busy_timeout(config.busy_timeout);

    options = if config.log_queries {
        options.log_statements(tracing::log::LevelFilter::Debug)
    } else {
        options.disable_statement_logging()
    };

    let pool_options = if config.is_in_memory() {
        SqlitePoolOptions::new()
            .max_connections(1)
            .idle_timeout(None)
            .max_lifetime(None)
    } else {
        options = options.journal_mode(SqliteJournalMode::Wal);
        SqlitePoolOptions::new().max_connections(config.max_connections)
    };

    let pool = pool_options.connect_with(options).await?;

    run_migrations(&pool).await?;

    info!("✓ Database initialized successfully");

    Ok(pool)
}

/// Transaction opened with `BEGIN IMMEDIATE`.
///
/// The write lock is taken up front, so concurrent writers wait on the busy
/// timeout instead of failing when a read lock is upgraded. Finish with
/// [`commit`](Self::commit) or [`rollback`](Self::rollback); a transaction
/// dropped while open closes its connection, which rolls it back.
pub struct WriteTransaction {
    conn: Option<PoolConnection<Sqlite>>,
}

impl WriteTransaction {
    pub async fn begin(pool: &DbPool) -> Result<Self, DatabaseError> {
        let mut conn = pool
            .acquire()
            .await
            .map_err(|e| DatabaseError::from_query("Failed to acquire connection", e))?;
        sqlx::query("BEGIN IMMEDIATE")
            .execute(&mut *conn)
            .await
            .map_err(|e| DatabaseError::from_query("Failed to begin write transaction", e))?;
        Ok(Self { conn: Some(conn) })
    }

    pub fn connection(&mut self) -> Result<&mut SqliteConnection, DatabaseError> {
        self.conn
            .as_deref_mut()
            .ok_or_else(|| DatabaseError::QueryError("write transaction already finished".to_string()))
    }

    pub async fn commit(mut self) -> Result<(), DatabaseError> {
        let Some(mut conn) = self.conn.take() else {
            return Ok(());
        };
        if let Err(e) = sqlx::query("COMMIT").execute(&mut *conn).await {
            if let Err(rollback) = sqlx::query("ROLLBACK").execute(&mut *conn).await {
                warn!("Rollback after failed commit failed: {}", rollback);
                drop(conn.detach());
            }
            return Err(DatabaseError::from_query("Failed to commit", e));
        }
        Ok(())
    }

    pub async fn rollback(mut self) -> Result<(), DatabaseError> {
        let Some(mut conn) = self.conn.take() else {
            return Ok(());
        };
        if let Err(e) = sqlx::query("ROLLBACK").execute(&mut *conn).await {
            drop(conn.detach());
            return Err(DatabaseError::from_query("Failed to roll back", e));
        }
        Ok(())
    }
}

impl Drop for WriteTransaction {
    fn drop(&mut self) {
        if let Some(conn) = self.conn.take() {
            warn!("Write transaction dropped while open, closing its connection");
            drop(conn.detach());
        }
    }
}

/// Create tables and indexes if they do not exist
async fn run_migrations(pool: &DbPool) -> Result<(), DatabaseError> {
    info!("Running database migrations...");

    sqlx::query(
        r#"
        CREATE TABLE IF NOT EXISTS portfolios (
            agent_id TEXT PRIMARY KEY,
            cash_balance TEXT NOT NULL,
            starting_balance TEXT NOT NULL,
            created_at DATETIME NOT NULL,
            updated_at DATETIME NOT NULL
        )
        "#,
    )
    .execute(pool)
    .await
    .map_err(|e| {
        DatabaseError::MigrationError(format!("Failed to create portfolios table: {}", e))
    })?;

    sqlx::query(
        r#"
        CREATE TABLE IF NOT EXISTS positions (
            agent_id TEXT NOT NULL,
            symbol TEXT NOT NULL,
            shares TEXT NOT NULL,
            avg_cost TEXT NOT NULL,
            created_at DATETIME NOT NULL,
            updated_at DATETIME NOT NULL,
            PRIMARY KEY (agent_id, symbol),
            FOREIGN KEY (agent_id) REFERENCES portfolios(agent_id)
        )
        "#,
    )
    .execute(pool)
    .await
    .map_err(|e| {
        DatabaseError::MigrationError(format!("Failed to create positions table: {}", e))
    })?;

    sqlx::query(
        r#"
        CREATE TABLE IF NOT EXISTS trades (
            id TEXT PRIMARY KEY,
            agent_id TEXT NOT NULL,
            symbol TEXT NOT NULL,
            side TEXT NOT NULL CHECK(side IN ('buy', 'sell')),
            shares TEXT NOT NULL,
            price TEXT NOT NULL,
            total_value TEXT NOT NULL,
            reasoning TEXT,
            created_at DATETIME NOT NULL,
            FOREIGN KEY (agent_id) REFERENCES portfolios(agent_id)
        )
        "#,
    )
    .execute(pool)
    .await
    .map_err(|e| DatabaseError::MigrationError(format!("Failed to create trades table: {}", e)))?;

    sqlx::query(
        r#"
        CREATE TABLE IF NOT EXISTS portfolio_snapshots (
            id TEXT PRIMARY KEY,
            agent_id TEXT NOT NULL,
            total_value TEXT NOT NULL,
            created_at DATETIME NOT NULL,
            FOREIGN KEY (agent_id) REFERENCES portfolios(agent_id)
        )
        "#,
    )
    .execute(pool)
    .await
    .map_err(|e| {
        DatabaseError::MigrationError(format!(
            "Failed to create portfolio_snapshots table: {}",
            e
        ))
    })?;

    sqlx::query("CREATE INDEX IF NOT EXISTS idx_trades_agent_time ON trades(agent_id, created_at)")
        .execute(pool)
        .await
        .map_err(|e| DatabaseError::MigrationError(format!("Failed to create index: {}", e)))?;

    sqlx::query("CREATE INDEX IF NOT EXISTS idx_trades_created_at ON trades(created_at)")
        .execute(pool)
        .await
        .map_err(|e| DatabaseError::MigrationError(format!("Failed to create index: {}", e)))?;

    sqlx::query(
        "CREATE INDEX IF NOT EXISTS idx_snapshots_agent_time ON portfolio_snapshots(agent_id, created_at)",
    )
    .execute(pool)
    .await
    .map_err(|e| DatabaseError::MigrationError(format!("Failed to create index: {}", e)))?;

    info!("✓ Database migrations completed successfully");

    Ok(())
}
