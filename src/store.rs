//! Store adapter: the thin wrapper over the embedded SQL engine (spec.md §4.1).
//!
//! Grounded in `disk_driver`'s trait-over-a-concrete-backend shape
//! (`DiskDriver::ddriver_open`/`ddriver_close` wrapping a raw file handle);
//! here the "device" is a SQLite database file opened through `rusqlite`.
//! The prepared-statement cache that the original C keeps as a
//! macro-numbered array (`sqlfs_t.stmts[200]`) is replaced by
//! `rusqlite::Connection`'s own `prepare_cached`, which is exactly the
//! keyed-map substitution spec.md §9 calls for.

use std::path::Path;

use rusqlite::Connection;

use crate::error::{Result, SqlfsError};
use crate::types::{BUSY_TIMEOUT_MS, STATEMENT_CACHE_SLOTS};

// Columns besides `key` are nullable on purpose: `meta::set_attr`'s upsert
// does `INSERT OR IGNORE INTO meta_data (key) VALUES (?1)` before the
// `UPDATE` that fills every other column, and a `NOT NULL` constraint here
// would make `OR IGNORE` silently drop that bare-key row (original_source/
// sqlfs.c's own schema, e.g. line 3103, declares them nullable for the same
// reason).
const SCHEMA: &str = "
create table if not exists meta_data (
    key text primary key,
    type text,
    inode integer,
    uid integer,
    gid integer,
    mode integer,
    acl text,
    attribute text,
    atime integer,
    mtime integer,
    ctime integer,
    size integer,
    block_size integer
);
create table if not exists value_data (
    key text not null,
    block_no integer not null,
    data_block blob,
    unique(key, block_no)
);
create index if not exists meta_index on meta_data(key);
create index if not exists value_index on value_data(key, block_no);
";

/// A raw key, rendered as the hex-escape literal SQLite's keying pragma
/// expects (`x'...'`), per spec.md §4.1 "Key lifecycle".
pub fn render_raw_key(raw: &[u8]) -> String {
    let mut s = String::with_capacity(raw.len() * 2 + 3);
    s.push_str("x'");
    for b in raw {
        s.push_str(&format!("{:02x}", b));
    }
    s.push('\'');
    s
}

pub enum Keying<'a> {
    None,
    Password(&'a str),
    RawKey(&'a [u8; 32]),
}

/// Opens the database file, applies the fixed pragma sequence from
/// spec.md §4.1, and ensures the schema exists.
pub fn open(path: &Path, keying: Keying<'_>) -> Result<Connection> {
    let conn = Connection::open(path)?;
    apply_keying(&conn, keying)?;
    conn.set_prepared_statement_cache_capacity(STATEMENT_CACHE_SLOTS);
    conn.pragma_update(None, "journal_mode", "WAL")?;
    let limit = journal_size_limit(path);
    conn.pragma_update(None, "journal_size_limit", limit as i64)?;
    conn.pragma_update(None, "synchronous", "NORMAL")?;
    conn.busy_timeout(std::time::Duration::from_millis(BUSY_TIMEOUT_MS))?;
    conn.execute_batch(SCHEMA)?;
    Ok(conn)
}

fn apply_keying(conn: &Connection, keying: Keying<'_>) -> Result<()> {
    match keying {
        Keying::None => Ok(()),
        Keying::Password(pw) => {
            if pw.len() > crate::types::MAX_PASSWORD_LENGTH {
                return Err(SqlfsError::Invalid);
            }
            conn.pragma_update(None, "key", pw)?;
            Ok(())
        }
        Keying::RawKey(raw) => {
            let literal = render_raw_key(raw.as_slice());
            conn.execute_batch(&format!("PRAGMA key = \"{}\";", literal))?;
            Ok(())
        }
    }
}

/// `max(10 MiB, 10% of bytes available on the hosting filesystem)`,
/// spec.md §4.1 and §6. Falls back to the 10 MiB floor if free-space
/// cannot be queried (e.g. the database is `:memory:`).
fn journal_size_limit(path: &Path) -> u64 {
    const FLOOR: u64 = 10 * 1024 * 1024;
    let dir = path.parent().filter(|p| !p.as_os_str().is_empty()).unwrap_or(Path::new("."));
    match fs2::available_space(dir) {
        Ok(avail) => std::cmp::max(FLOOR, avail / 10),
        Err(e) => {
            log::warn!("could not query free space for {}: {}", dir.display(), e);
            FLOOR
        }
    }
}

/// Seeds the process-wide inode counter from `max(inode)` once per mount,
/// per spec.md invariant 4.
pub fn max_inode(conn: &Connection) -> Result<i64> {
    let v: Option<i64> = conn.query_row("select max(inode) from meta_data", [], |r| r.get(0))?;
    Ok(v.unwrap_or(0))
}

/// Offline key change: requires zero live sessions (spec.md §4.1).
pub fn rekey(path: &Path, old: Keying<'_>, new: Keying<'_>) -> Result<()> {
    let conn = open(path, old)?;
    match new {
        Keying::None => {}
        Keying::Password(pw) => conn.pragma_update(None, "rekey", pw)?,
        Keying::RawKey(raw) => {
            let literal = render_raw_key(raw.as_slice());
            conn.execute_batch(&format!("PRAGMA rekey = \"{}\";", literal))?;
        }
    }
    Ok(())
}
