use chrono::{DateTime, Utc};
use rusqlite::{params, OptionalExtension};

use crate::database::Database;
use crate::error::Result;
use crate::models::CachedAsset;

impl Database {
    /// Insert or replace a cache entry.
    pub fn put_asset(&self, asset: &CachedAsset) -> Result<()> {
        self.conn().execute(
            "INSERT OR REPLACE INTO cached_assets (cache_name, url, status, content_type, body, stored_at)
             VALUES (?1, ?2, ?3, ?4, ?5, ?6)",
            params![
                asset.cache_name,
                asset.url,
                asset.status,
                asset.content_type,
                asset.body,
                asset.stored_at.to_rfc3339(),
            ],
        )?;
        Ok(())
    }

    pub fn get_asset(&self, cache_name: &str, url: &str) -> Result<Option<CachedAsset>> {
        let asset = self
            .conn()
            .query_row(
                "SELECT cache_name, url, status, content_type, body, stored_at
                 FROM cached_assets
                 WHERE cache_name = ?1 AND url = ?2",
                params![cache_name, url],
                row_to_asset,
            )
            .optional()?;
        Ok(asset)
    }

    pub fn list_assets(&self, cache_name: &str) -> Result<Vec<CachedAsset>> {
        let mut stmt = self.conn().prepare(
            "SELECT cache_name, url, status, content_type, body, stored_at
             FROM cached_assets
             WHERE cache_name = ?1
             ORDER BY url ASC",
        )?;

        let rows = stmt.query_map(params![cache_name], row_to_asset)?;

        let mut assets = Vec::new();
        for row in rows {
            assets.push(row?);
        }
        Ok(assets)
    }

    /// Distinct cache names present in the store.
    pub fn cache_names(&self) -> Result<Vec<String>> {
        let mut stmt = self
            .conn()
            .prepare("SELECT DISTINCT cache_name FROM cached_assets ORDER BY cache_name ASC")?;
        let rows = stmt.query_map([], |row| row.get::<_, String>(0))?;

        let mut names = Vec::new();
        for row in rows {
            names.push(row?);
        }
        Ok(names)
    }

    /// Delete every entry not belonging to `keep`. Returns rows removed.
    pub fn purge_other_caches(&self, keep: &str) -> Result<usize> {
        let affected = self
            .conn()
            .execute("DELETE FROM cached_assets WHERE cache_name != ?1", params![keep])?;
        Ok(affected)
    }

    pub fn delete_cache(&self, cache_name: &str) -> Result<usize> {
        let affected = self.conn().execute(
            "DELETE FROM cached_assets WHERE cache_name = ?1",
            params![cache_name],
        )?;
        Ok(affected)
    }
}

fn row_to_asset(row: &rusqlite::Row<'_>) -> rusqlite::Result<CachedAsset> {
    let cache_name: String = row.get(0)?;
    let url: String = row.get(1)?;
    let status: u16 = row.get(2)?;
    let content_type: Option<String> = row.get(3)?;
    let body: Vec<u8> = row.get(4)?;
    let stored_str: String = row.get(5)?;

    let stored_at: DateTime<Utc> = DateTime::parse_from_rfc3339(&stored_str)
        .map(|dt| dt.with_timezone(&Utc))
        .map_err(|e| rusqlite::Error::FromSqlConversionFailure(5, rusqlite::types::Type::Text, Box::new(e)))?;

    Ok(CachedAsset {
        cache_name,
        url,
        status,
        content_type,
        body,
        stored_at,
    })
}

#[cfg(test)]
mod tests {
    use super::*;

    fn asset(cache: &str, url: &str, body: &[u8]) -> CachedAsset {
        CachedAsset::new(cache, url, Some("text/html".into()), body.to_vec())
    }

    #[test]
    fn test_put_get_replace() {
        let db = Database::open_in_memory().unwrap();
        db.put_asset(&asset("umrah-cache-v1", "/offline.html", b"old")).unwrap();
        db.put_asset(&asset("umrah-cache-v1", "/offline.html", b"new")).unwrap();

        let found = db.get_asset("umrah-cache-v1", "/offline.html").unwrap().unwrap();
        assert_eq!(found.body, b"new");
        assert_eq!(found.status, 200);
        assert_eq!(db.list_assets("umrah-cache-v1").unwrap().len(), 1);
        assert!(db.get_asset("umrah-cache-v1", "/missing").unwrap().is_none());
    }

    #[test]
    fn test_purge_keeps_current_version() {
        let dir = tempfile::tempdir().unwrap();
        let db = Database::open_at(&dir.path().join("cache.db")).unwrap();
        db.put_asset(&asset("umrah-cache-v0", "/", b"a")).unwrap();
        db.put_asset(&asset("umrah-cache-v0", "/offline.html", b"b")).unwrap();
        db.put_asset(&asset("umrah-cache-v1", "/", b"c")).unwrap();

        assert_eq!(db.cache_names().unwrap(), vec!["umrah-cache-v0", "umrah-cache-v1"]);
        assert_eq!(db.purge_other_caches("umrah-cache-v1").unwrap(), 2);
        assert_eq!(db.cache_names().unwrap(), vec!["umrah-cache-v1"]);
        assert_eq!(db.delete_cache("umrah-cache-v1").unwrap(), 1);
    }
}
