use anyhow::Result;
use rusqlite::Connection;
use tracing::info;

pub fn run(conn: &Connection) -> Result<()> {
    conn.execute_batch(
        "
        CREATE TABLE IF NOT EXISTS kv (
            key         TEXT PRIMARY KEY,
            value       TEXT NOT NULL,
            updated_at  TEXT NOT NULL DEFAULT (datetime('now'))
        );

        CREATE TABLE IF NOT EXISTS messages (
            id          TEXT PRIMARY KEY,
            user        TEXT NOT NULL,
            content     TEXT NOT NULL,
            timestamp   TEXT NOT NULL,
            color       TEXT NOT NULL DEFAULT '#ffffff'
        );

        CREATE INDEX IF NOT EXISTS idx_messages_timestamp
            ON messages(timestamp);

        CREATE TABLE IF NOT EXISTS directmessages (
            id          INTEGER PRIMARY KEY,
            username    TEXT NOT NULL,
            usermsg     TEXT NOT NULL,
            deviceid    TEXT,
            devicename  TEXT,
            istablet    INTEGER NOT NULL DEFAULT 0,
            sysver      TEXT,
            created_at  TEXT NOT NULL DEFAULT (strftime('%Y-%m-%dT%H:%M:%fZ', 'now')),
            adminmsg    TEXT,
            admintime   TEXT
        );

        CREATE INDEX IF NOT EXISTS idx_directmessages_created
            ON directmessages(created_at);
        ",
    )?;

    info!("Database migrations complete");
    Ok(())
}
