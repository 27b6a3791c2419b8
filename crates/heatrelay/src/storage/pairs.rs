//! Rows of the `pairs` table.

use chrono::{DateTime, Utc};
use rusqlite::{params, Connection, OptionalExtension, Row};

use crate::error::Result;
use crate::pairing::{Pair, PairStatus};

use super::{decode_opt_ts, decode_ts, encode_ts};

const COLUMNS: &str =
    "id, short_code_hash, elder_code, community_code, status, created_at, last_active_at";

/// Insert a new active pair.
///
/// # Errors
///
/// Returns an error if the insert violates a uniqueness constraint or the
/// database operation fails.
pub fn insert(
    conn: &Connection,
    short_code_hash: &str,
    elder_code: &str,
    community_code: &str,
    now: DateTime<Utc>,
) -> Result<Pair> {
    conn.execute(
        r"
        INSERT INTO pairs (short_code_hash, elder_code, community_code, status, created_at)
        VALUES (?1, ?2, ?3, ?4, ?5)
        ",
        params![
            short_code_hash,
            elder_code,
            community_code,
            PairStatus::Active.as_str(),
            encode_ts(now),
        ],
    )?;

    Ok(Pair {
        id: conn.last_insert_rowid(),
        short_code_hash: short_code_hash.to_string(),
        elder_code: elder_code.to_string(),
        community_code: community_code.to_string(),
        status: PairStatus::Active,
        created_at: now,
        last_active_at: None,
    })
}

/// Get a pair by id, whatever its status.
///
/// # Errors
///
/// Returns an error if the database operation fails.
pub fn get(conn: &Connection, id: i64) -> Result<Option<Pair>> {
    let sql = format!("SELECT {COLUMNS} FROM pairs WHERE id = ?1");
    Ok(conn.query_row(&sql, [id], row_to_pair).optional()?)
}

/// Get the active pair holding a short code digest.
///
/// # Errors
///
/// Returns an error if the database operation fails.
pub fn find_active_by_code_hash(conn: &Connection, short_code_hash: &str) -> Result<Option<Pair>> {
    let sql = format!("SELECT {COLUMNS} FROM pairs WHERE short_code_hash = ?1 AND status = 'active'");
    Ok(conn
        .query_row(&sql, [short_code_hash], row_to_pair)
        .optional()?)
}

/// Whether any pair, active or not, holds this short code digest.
///
/// # Errors
///
/// Returns an error if the database operation fails.
pub fn code_hash_exists(conn: &Connection, short_code_hash: &str) -> Result<bool> {
    let count: i64 = conn.query_row(
        "SELECT COUNT(*) FROM pairs WHERE short_code_hash = ?1",
        [short_code_hash],
        |row| row.get(0),
    )?;
    Ok(count > 0)
}

/// Whether any pair already uses this elder code.
///
/// # Errors
///
/// Returns an error if the database operation fails.
pub fn elder_code_exists(conn: &Connection, elder_code: &str) -> Result<bool> {
    let count: i64 = conn.query_row(
        "SELECT COUNT(*) FROM pairs WHERE elder_code = ?1",
        [elder_code],
        |row| row.get(0),
    )?;
    Ok(count > 0)
}

/// Record that the pair was just used.
///
/// # Errors
///
/// Returns an error if the database operation fails.
pub fn touch_last_active(conn: &Connection, id: i64, now: DateTime<Utc>) -> Result<()> {
    conn.execute(
        "UPDATE pairs SET last_active_at = ?1 WHERE id = ?2",
        params![encode_ts(now), id],
    )?;
    Ok(())
}

/// Change a pair's status. Returns `true` if the row changed.
///
/// # Errors
///
/// Returns an error if the database operation fails.
pub fn set_status(conn: &Connection, id: i64, status: PairStatus) -> Result<bool> {
    let affected = conn.execute(
        "UPDATE pairs SET status = ?1 WHERE id = ?2 AND status <> ?1",
        params![status.as_str(), id],
    )?;
    Ok(affected > 0)
}

/// All active pairs, ordered by id.
///
/// # Errors
///
/// Returns an error if the database operation fails.
pub fn list_active(conn: &Connection) -> Result<Vec<Pair>> {
    let sql = format!("SELECT {COLUMNS} FROM pairs WHERE status = 'active' ORDER BY id");
    let mut stmt = conn.prepare(&sql)?;
    let pairs = stmt
        .query_map([], row_to_pair)?
        .collect::<std::result::Result<Vec<_>, _>>()?;
    Ok(pairs)
}

/// Number of active pairs in a community.
///
/// # Errors
///
/// Returns an error if the database operation fails.
pub fn count_active_in(conn: &Connection, community_code: &str) -> Result<u32> {
    let count: u32 = conn.query_row(
        "SELECT COUNT(*) FROM pairs WHERE community_code = ?1 AND status = 'active'",
        [community_code],
        |row| row.get(0),
    )?;
    Ok(count)
}

fn row_to_pair(row: &Row) -> rusqlite::Result<Pair> {
    let status: String = row.get(4)?;
    let created_at: String = row.get(5)?;
    Ok(Pair {
        id: row.get(0)?,
        short_code_hash: row.get(1)?,
        elder_code: row.get(2)?,
        community_code: row.get(3)?,
        status: PairStatus::from_db(&status),
        created_at: decode_ts(5, &created_at)?,
        last_active_at: decode_opt_ts(6, row.get(6)?)?,
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::storage::Storage;

    #[test]
    fn test_insert_and_get() {
        let storage = Storage::open_in_memory().unwrap();
        let conn = storage.connection();
        let now = Utc::now();

        let pair = insert(conn, "hash", "elder", "harbor", now).unwrap();
        let loaded = get(conn, pair.id).unwrap().unwrap();
        assert_eq!(loaded.elder_code, "elder");
        assert_eq!(loaded.status, PairStatus::Active);
        assert!(get(conn, pair.id + 1).unwrap().is_none());
    }

    #[test]
    fn test_elder_code_is_unique() {
        let storage = Storage::open_in_memory().unwrap();
        let conn = storage.connection();

        insert(conn, "hash-a", "elder", "harbor", Utc::now()).unwrap();
        assert!(insert(conn, "hash-b", "elder", "harbor", Utc::now()).is_err());
        assert!(elder_code_exists(conn, "elder").unwrap());
    }

    #[test]
    fn test_inactive_pairs_are_hidden_from_lookup() {
        let storage = Storage::open_in_memory().unwrap();
        let conn = storage.connection();

        let pair = insert(conn, "hash", "elder", "harbor", Utc::now()).unwrap();
        assert!(set_status(conn, pair.id, PairStatus::Inactive).unwrap());
        assert!(!set_status(conn, pair.id, PairStatus::Inactive).unwrap());

        assert!(find_active_by_code_hash(conn, "hash").unwrap().is_none());
        assert!(code_hash_exists(conn, "hash").unwrap());
        assert_eq!(count_active_in(conn, "harbor").unwrap(), 0);
        assert!(list_active(conn).unwrap().is_empty());
    }
}
