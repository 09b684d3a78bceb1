//! Offline asset table, keyed by cache version and application path.

use rusqlite::Connection;

pub fn up(conn: &Connection) -> rusqlite::Result<()> {
    conn.execute_batch(
        "CREATE TABLE IF NOT EXISTS cached_assets (
             cache_name   TEXT    NOT NULL,
             url          TEXT    NOT NULL,
             status       INTEGER NOT NULL,
             content_type TEXT,
             body         BLOB    NOT NULL,
             stored_at    TEXT    NOT NULL,
             PRIMARY KEY (cache_name, url)
         );
         CREATE INDEX IF NOT EXISTS idx_cached_assets_cache
             ON cached_assets(cache_name);",
    )
}
