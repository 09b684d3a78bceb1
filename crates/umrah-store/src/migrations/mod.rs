//! Schema steps, applied in order and tracked through `user_version`.

pub mod v001_initial;

use rusqlite::Connection;

use crate::error::{Result, StoreError};

type Step = fn(&Connection) -> rusqlite::Result<()>;

/// Position in this list (1-based) is the schema version the step produces.
const STEPS: &[(&str, Step)] = &[("v001_initial", v001_initial::up)];

pub fn schema_version(conn: &Connection) -> Result<u32> {
    Ok(conn.pragma_query_value(None, "user_version", |row| row.get(0))?)
}

/// Bring the schema up to date. Returns the number of steps applied.
pub fn run_migrations(conn: &Connection) -> Result<usize> {
    let from = schema_version(conn)? as usize;
    let pending = STEPS.iter().enumerate().skip(from);

    let mut applied = 0;
    for (index, (step, up)) in pending {
        tracing::info!(step, "Applying cache schema step");
        up(conn).map_err(|source| StoreError::Migration { step, source })?;
        conn.pragma_update(None, "user_version", (index + 1) as u32)?;
        applied += 1;
    }
    if applied == 0 {
        tracing::debug!(version = from, "Cache schema up to date");
    }
    Ok(applied)
}
