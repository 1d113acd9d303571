//! Throwaway Postgres databases for tests that need a real server.
//!
//! The server is located through the `TESTS_DATABASE_*` environment variables. When
//! `TESTS_DATABASE_HOST` is unset the spawn functions return `None` and the calling test is
//! skipped, so the suite also runs where no Postgres is available.

use config::shared::{IntoConnectOptions, PgConnectionConfig, TlsConfig};
use sqlx::{Connection, Executor, PgConnection, PgPool};
use uuid::Uuid;

use crate::migrations::apply_migrations;
use crate::store::create_database_pool;

const TESTS_DATABASE_HOST_ENV: &str = "TESTS_DATABASE_HOST";

/// Connection settings for a fresh, uniquely named database on the test server.
///
/// Reads `TESTS_DATABASE_HOST`, `TESTS_DATABASE_PORT` (default 5432), `TESTS_DATABASE_USERNAME`
/// (default `postgres`) and the optional `TESTS_DATABASE_PASSWORD`.
fn local_pg_connection_config() -> Option<PgConnectionConfig> {
    let host = std::env::var(TESTS_DATABASE_HOST_ENV).ok()?;
    let port = std::env::var("TESTS_DATABASE_PORT")
        .ok()
        .map(|port| {
            port.parse()
                .expect("TESTS_DATABASE_PORT must be a valid port number")
        })
        .unwrap_or(5432);

    Some(PgConnectionConfig {
        host,
        port,
        name: Uuid::new_v4().to_string(),
        username: std::env::var("TESTS_DATABASE_USERNAME")
            .unwrap_or_else(|_| "postgres".to_string()),
        password: std::env::var("TESTS_DATABASE_PASSWORD")
            .ok()
            .map(Into::into),
        tls: TlsConfig {
            trusted_root_certs: String::new(),
            enabled: false,
        },
    })
}

/// A database created for one test.
pub struct TestDatabase {
    pub config: PgConnectionConfig,
    pub pool: PgPool,
}

impl TestDatabase {
    /// Runs `sql` as a batch of statements.
    pub async fn execute(&self, sql: &str) {
        sqlx::raw_sql(sql)
            .execute(&self.pool)
            .await
            .unwrap_or_else(|err| panic!("failed to execute test statement: {err}"));
    }

    /// Closes the pool and drops the database, logging rather than failing on errors.
    pub async fn drop_database(self) {
        self.pool.close().await;

        let mut connection = match PgConnection::connect_with(&self.config.without_db()).await {
            Ok(connection) => connection,
            Err(err) => {
                eprintln!("warning: failed to connect to Postgres for cleanup: {err}");
                return;
            }
        };

        let statement = format!(
            r#"drop database if exists "{}" with (force);"#,
            self.config.name
        );
        if let Err(err) = connection.execute(statement.as_str()).await {
            eprintln!(
                "warning: failed to drop database {}: {err}",
                self.config.name
            );
        }
    }
}

/// Creates an empty database, or returns `None` when no test server is configured.
///
/// # Panics
///
/// Panics if the server is configured but the database cannot be created.
pub async fn spawn_test_database() -> Option<TestDatabase> {
    let Some(config) = local_pg_connection_config() else {
        eprintln!("skipping: {TESTS_DATABASE_HOST_ENV} is not set");
        return None;
    };

    let mut connection = PgConnection::connect_with(&config.without_db())
        .await
        .expect("Failed to connect to Postgres");
    connection
        .execute(format!(r#"create database "{}";"#, config.name).as_str())
        .await
        .expect("Failed to create database");

    let pool = create_database_pool(&config, 4);

    Some(TestDatabase { config, pool })
}

/// Like [`spawn_test_database`], with the cursor table migrations applied.
pub async fn spawn_test_database_with_migrations() -> Option<TestDatabase> {
    let database = spawn_test_database().await?;
    apply_migrations(&database.config)
        .await
        .expect("Failed to apply sync cursor migrations");

    Some(database)
}
