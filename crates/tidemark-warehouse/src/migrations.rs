use ::duckdb::{Connection, ToSql};

struct Migration {
    version: &'static str,
    sql: &'static str,
}

const MIGRATIONS: &[Migration] = &[
    Migration {
        version: "0001_fact_tables",
        sql: r#"
CREATE TABLE IF NOT EXISTS crypto_price (
    price_date DATE NOT NULL,
    hour INTEGER NOT NULL CHECK (hour BETWEEN 0 AND 23),
    source TEXT NOT NULL,
    open DOUBLE,
    high DOUBLE,
    low DOUBLE,
    close DOUBLE,
    volume BIGINT,
    ingested_at TIMESTAMP
);

CREATE TABLE IF NOT EXISTS crypto_news (
    coin_tag TEXT NOT NULL,
    title TEXT,
    description TEXT,
    content TEXT,
    published_at TIMESTAMP NOT NULL,
    news_date DATE NOT NULL,
    source_name TEXT,
    url TEXT NOT NULL,
    ingested_at TIMESTAMP
);
"#,
    },
    Migration {
        version: "0002_audit_tables",
        sql: r#"
CREATE TABLE IF NOT EXISTS ingestion_watermark (
    source TEXT PRIMARY KEY,
    last_success TIMESTAMP NOT NULL,
    updated_at TIMESTAMP NOT NULL
);

CREATE TABLE IF NOT EXISTS ingestion_log (
    source TEXT NOT NULL,
    status TEXT NOT NULL,
    message TEXT,
    rows_inserted BIGINT NOT NULL DEFAULT 0,
    started_at TIMESTAMP NOT NULL,
    finished_at TIMESTAMP NOT NULL
);

CREATE TABLE IF NOT EXISTS data_quality_issue (
    source TEXT NOT NULL,
    issue_type TEXT NOT NULL,
    issue_detail TEXT,
    detected_at TIMESTAMP NOT NULL
);
"#,
    },
    Migration {
        version: "0003_bulk_staging",
        sql: r#"
CREATE TABLE IF NOT EXISTS crypto_price_staging (
    price_date DATE NOT NULL,
    hour INTEGER NOT NULL CHECK (hour BETWEEN 0 AND 23),
    source TEXT NOT NULL,
    open DOUBLE,
    high DOUBLE,
    low DOUBLE,
    close DOUBLE,
    volume BIGINT,
    ingested_at TIMESTAMP
);
"#,
    },
];

/// Apply every migration that is not yet recorded in `schema_migrations`.
pub fn apply_migrations(connection: &Connection) -> Result<(), ::duckdb::Error> {
    connection.execute_batch(
        r#"
CREATE TABLE IF NOT EXISTS schema_migrations (
    version TEXT PRIMARY KEY,
    applied_at TIMESTAMP NOT NULL DEFAULT CURRENT_TIMESTAMP
);
"#,
    )?;

    for migration in MIGRATIONS {
        let params: [&dyn ToSql; 1] = [&migration.version];
        let applied_count: i64 = connection.query_row(
            "SELECT COUNT(*) FROM schema_migrations WHERE version = ?",
            params.as_slice(),
            |row| row.get(0),
        )?;

        if applied_count == 0 {
            connection.execute_batch(migration.sql)?;
            connection.execute(
                "INSERT INTO schema_migrations (version) VALUES (?)",
                params.as_slice(),
            )?;
        }
    }

    Ok(())
}

/// Versions applied so far, oldest first.
pub fn applied_versions(connection: &Connection) -> Result<Vec<String>, ::duckdb::Error> {
    let mut statement =
        connection.prepare("SELECT version FROM schema_migrations ORDER BY version")?;
    let versions = statement
        .query_map([], |row| row.get::<_, String>(0))?
        .collect::<Result<Vec<_>, _>>()?;
    Ok(versions)
}
