use crate::models::{DirectMessageRow, MessageRow, NewDirectMessageRow, RowKey};
use crate::Database;
use anyhow::Result;
use rusqlite::types::{ToSql, Value};
use rusqlite::{Connection, Row};

const DIRECT_MESSAGE_COLUMNS: &str =
    "id, username, usermsg, deviceid, devicename, istablet, sysver, created_at, adminmsg, admintime";

impl Database {
    // -- Key-value cache --

    pub fn kv_get(&self, key: &str) -> Result<Option<String>> {
        self.with_conn(|conn| {
            conn.query_row("SELECT value FROM kv WHERE key = ?1", [key], |row| row.get(0))
                .optional()
        })
    }

    pub fn kv_set(&self, key: &str, value: &str) -> Result<()> {
        self.with_conn(|conn| {
            conn.execute(
                "INSERT INTO kv (key, value) VALUES (?1, ?2)
                 ON CONFLICT(key) DO UPDATE SET value = excluded.value, updated_at = datetime('now')",
                (key, value),
            )?;
            Ok(())
        })
    }

    pub fn kv_remove(&self, key: &str) -> Result<()> {
        self.with_conn(|conn| {
            conn.execute("DELETE FROM kv WHERE key = ?1", [key])?;
            Ok(())
        })
    }

    // -- Messages --

    pub fn insert_message(
        &self,
        id: &str,
        user: &str,
        content: &str,
        timestamp: &str,
        color: &str,
    ) -> Result<MessageRow> {
        self.with_conn(|conn| {
            let row = conn.query_row(
                "INSERT INTO messages (id, user, content, timestamp, color) VALUES (?1, ?2, ?3, ?4, ?5)
                 RETURNING id, user, content, timestamp, color",
                rusqlite::params![id, user, content, timestamp, color],
                message_from_row,
            )?;
            Ok(row)
        })
    }

    /// Oldest-first, capped at `limit` rows.
    pub fn get_messages(&self, limit: u32) -> Result<Vec<MessageRow>> {
        self.with_conn(|conn| query_messages(conn, limit))
    }

    /// Delete every message. Returns the number of rows removed.
    pub fn delete_all_messages(&self) -> Result<usize> {
        self.with_conn(|conn| Ok(conn.execute("DELETE FROM messages", [])?))
    }

    // -- Direct messages --

    /// Insert a direct message. When `id` is `None` SQLite assigns the next rowid.
    pub fn insert_direct_message(&self, new: &NewDirectMessageRow<'_>) -> Result<DirectMessageRow> {
        self.with_conn(|conn| {
            let sql = format!(
                "INSERT INTO directmessages (id, username, usermsg, deviceid, devicename, istablet, sysver)
                 VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7)
                 RETURNING {}",
                DIRECT_MESSAGE_COLUMNS
            );
            let row = conn.query_row(
                &sql,
                rusqlite::params![
                    new.id,
                    new.username,
                    new.usermsg,
                    new.deviceid,
                    new.devicename,
                    new.istablet,
                    new.sysver,
                ],
                direct_message_from_row,
            )?;
            Ok(row)
        })
    }

    /// Batch-fetch direct messages for a mixed set of integer and text keys.
    /// Row order is unspecified.
    pub fn get_direct_messages(&self, keys: &[RowKey]) -> Result<Vec<DirectMessageRow>> {
        if keys.is_empty() {
            return Ok(vec![]);
        }

        self.with_conn(|conn| {
            let placeholders: Vec<String> = (1..=keys.len()).map(|i| format!("?{}", i)).collect();
            let sql = format!(
                "SELECT {} FROM directmessages WHERE id IN ({})",
                DIRECT_MESSAGE_COLUMNS,
                placeholders.join(", ")
            );

            let values: Vec<Value> = keys
                .iter()
                .map(|key| match key {
                    RowKey::Integer(n) => Value::Integer(*n),
                    RowKey::Text(s) => Value::Text(s.clone()),
                })
                .collect();
            let params: Vec<&dyn ToSql> = values.iter().map(|v| v as &dyn ToSql).collect();

            let mut stmt = conn.prepare(&sql)?;
            let rows = stmt
                .query_map(params.as_slice(), direct_message_from_row)?
                .collect::<std::result::Result<Vec<_>, _>>()?;

            Ok(rows)
        })
    }

    /// Newest-first, capped at `limit` rows.
    pub fn recent_direct_messages(&self, limit: u32) -> Result<Vec<DirectMessageRow>> {
        self.with_conn(|conn| {
            let sql = format!(
                "SELECT {} FROM directmessages ORDER BY created_at DESC, id DESC LIMIT ?1",
                DIRECT_MESSAGE_COLUMNS
            );
            let mut stmt = conn.prepare(&sql)?;
            let rows = stmt
                .query_map([limit], direct_message_from_row)?
                .collect::<std::result::Result<Vec<_>, _>>()?;
            Ok(rows)
        })
    }

    /// Attach an admin reply to a direct message. Returns false if no row matched.
    pub fn set_admin_reply(&self, id: i64, reply: &str, replied_at: &str) -> Result<bool> {
        self.with_conn(|conn| {
            let changed = conn.execute(
                "UPDATE directmessages SET adminmsg = ?1, admintime = ?2 WHERE id = ?3",
                rusqlite::params![reply, replied_at, id],
            )?;
            Ok(changed > 0)
        })
    }
}

fn query_messages(conn: &Connection, limit: u32) -> Result<Vec<MessageRow>> {
    let mut stmt = conn.prepare(
        "SELECT id, user, content, timestamp, color
         FROM messages
         ORDER BY timestamp ASC
         LIMIT ?1",
    )?;

    let rows = stmt
        .query_map([limit], message_from_row)?
        .collect::<std::result::Result<Vec<_>, _>>()?;

    Ok(rows)
}

fn message_from_row(row: &Row<'_>) -> rusqlite::Result<MessageRow> {
    Ok(MessageRow {
        id: row.get(0)?,
        user: row.get(1)?,
        content: row.get(2)?,
        timestamp: row.get(3)?,
        color: row.get(4)?,
    })
}

fn direct_message_from_row(row: &Row<'_>) -> rusqlite::Result<DirectMessageRow> {
    Ok(DirectMessageRow {
        id: row.get(0)?,
        username: row.get(1)?,
        usermsg: row.get(2)?,
        deviceid: row.get(3)?,
        devicename: row.get(4)?,
        istablet: row.get(5)?,
        sysver: row.get(6)?,
        created_at: row.get(7)?,
        adminmsg: row.get(8)?,
        admintime: row.get(9)?,
    })
}

/// Extension trait for optional query results
trait OptionalExt<T> {
    fn optional(self) -> Result<Option<T>>;
}

impl<T> OptionalExt<T> for std::result::Result<T, rusqlite::Error> {
    fn optional(self) -> Result<Option<T>> {
        match self {
            Ok(val) => Ok(Some(val)),
            Err(rusqlite::Error::QueryReturnedNoRows) => Ok(None),
            Err(e) => Err(e.into()),
        }
    }
}
