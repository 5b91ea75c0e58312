//! Row types as they come out of SQLite. Kept separate from the
//! ringside-types records so this crate depends on nothing but rusqlite.

pub struct MessageRow {
    pub id: String,
    pub user: String,
    pub content: String,
    pub timestamp: String,
    pub color: String,
}

pub struct DirectMessageRow {
    pub id: i64,
    pub username: String,
    pub usermsg: String,
    pub deviceid: Option<String>,
    pub devicename: Option<String>,
    pub istablet: bool,
    pub sysver: Option<String>,
    pub created_at: String,
    pub adminmsg: Option<String>,
    pub admintime: Option<String>,
}

/// Column values for a direct message insert.
pub struct NewDirectMessageRow<'a> {
    pub id: Option<i64>,
    pub username: &'a str,
    pub usermsg: &'a str,
    pub deviceid: &'a str,
    pub devicename: &'a str,
    pub istablet: bool,
    pub sysver: &'a str,
}

/// One element of an `id IN (...)` filter. Text values are compared under the
/// column's integer affinity, so `'12'` still matches row 12.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum RowKey {
    Integer(i64),
    Text(String),
}
