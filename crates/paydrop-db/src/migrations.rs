use anyhow::Result;
use rusqlite::Connection;
use tracing::info;

pub fn run(conn: &Connection) -> Result<()> {
    conn.execute_batch(
        "CREATE TABLE IF NOT EXISTS schema_version (version INTEGER NOT NULL);",
    )?;

    let version: i64 = conn.query_row(
        "SELECT COALESCE(MAX(version), 0) FROM schema_version",
        [],
        |r| r.get(0),
    )?;

    if version < 1 {
        info!("Lifecycle DB: running migration v1 (initial schema)");
        conn.execute_batch(
            "
            CREATE TABLE files (
                id                  TEXT PRIMARY KEY,
                filename            TEXT NOT NULL,
                original_filename   TEXT NOT NULL,
                filepath            TEXT NOT NULL,
                file_size           INTEGER NOT NULL,
                mime_type           TEXT,
                duration_days       INTEGER NOT NULL,
                price_usd           TEXT NOT NULL,
                share_link          TEXT NOT NULL UNIQUE,
                expiry_date         TEXT NOT NULL,
                payment_status      TEXT NOT NULL DEFAULT 'pending',
                created_at          TEXT NOT NULL,
                updated_at          TEXT NOT NULL
            );

            CREATE TABLE payments (
                id                  TEXT PRIMARY KEY,
                file_id             TEXT NOT NULL REFERENCES files(id) ON DELETE CASCADE,
                amount_usd          TEXT NOT NULL,
                payment_status      TEXT NOT NULL DEFAULT 'pending',
                transaction_hash    TEXT,
                payment_data        TEXT,
                paid_at             TEXT,
                created_at          TEXT NOT NULL
            );

            CREATE TABLE transactions (
                id                  TEXT PRIMARY KEY,
                file_id             TEXT NOT NULL REFERENCES files(id) ON DELETE CASCADE,
                payment_id          TEXT REFERENCES payments(id) ON DELETE CASCADE,
                event_type          TEXT NOT NULL,
                event_data          TEXT,
                created_at          TEXT NOT NULL
            );

            CREATE INDEX idx_files_expiry_date ON files(expiry_date);
            CREATE INDEX idx_files_share_link ON files(share_link);
            CREATE INDEX idx_files_payment_status ON files(payment_status);
            CREATE INDEX idx_payments_file_id ON payments(file_id);
            CREATE INDEX idx_transactions_file_id ON transactions(file_id);

            INSERT INTO schema_version (version) VALUES (1);
            ",
        )?;
    }

    Ok(())
}
