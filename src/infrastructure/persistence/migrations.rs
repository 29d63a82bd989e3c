use rusqlite::Connection;

/// Initialize the database schema, creating tables if they don't exist.
///
/// # Errors
/// Returns `rusqlite::Error` if any SQL statement fails.
pub fn initialize_schema(conn: &Connection) -> Result<(), rusqlite::Error> {
    conn.execute_batch(
        "CREATE TABLE IF NOT EXISTS kv (
            key    TEXT PRIMARY KEY,
            value  TEXT NOT NULL
        );

        CREATE TABLE IF NOT EXISTS set_members (
            key     TEXT NOT NULL,
            member  TEXT NOT NULL,
            PRIMARY KEY (key, member)
        );

        CREATE TABLE IF NOT EXISTS hash_fields (
            key    TEXT NOT NULL,
            field  TEXT NOT NULL,
            value  TEXT NOT NULL,
            PRIMARY KEY (key, field)
        );

        CREATE TABLE IF NOT EXISTS list_items (
            id     INTEGER PRIMARY KEY AUTOINCREMENT,
            key    TEXT NOT NULL,
            value  TEXT NOT NULL
        );

        CREATE INDEX IF NOT EXISTS idx_list_items_key ON list_items(key, id);",
    )?;
    Ok(())
}
