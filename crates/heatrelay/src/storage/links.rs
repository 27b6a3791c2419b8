//! Rows of the `pair_links` table.

use chrono::{DateTime, Utc};
use rusqlite::{params, Connection, OptionalExtension, Row};

use crate::error::Result;
use crate::pairing::{LinkStatus, PairLink};

use super::{decode_opt_ts, decode_ts, encode_ts};

const COLUMNS: &str = "id, short_code_hash, token_hash, community_code, status, expires_at, \
                       redeemed_at, pair_id, created_at";

/// Insert a freshly issued link and return its id.
///
/// # Errors
///
/// Returns an error if the insert violates a uniqueness constraint or the
/// database operation fails.
pub fn insert(
    conn: &Connection,
    short_code_hash: &str,
    token_hash: &str,
    community_code: &str,
    expires_at: DateTime<Utc>,
    now: DateTime<Utc>,
) -> Result<i64> {
    conn.execute(
        r"
        INSERT INTO pair_links
            (short_code_hash, token_hash, community_code, status, expires_at, created_at)
        VALUES (?1, ?2, ?3, ?4, ?5, ?6)
        ",
        params![
            short_code_hash,
            token_hash,
            community_code,
            LinkStatus::Active.as_str(),
            encode_ts(expires_at),
            encode_ts(now),
        ],
    )?;
    Ok(conn.last_insert_rowid())
}

/// Get the link holding a short code digest, whatever its status.
///
/// # Errors
///
/// Returns an error if the database operation fails.
pub fn find_by_code_hash(conn: &Connection, short_code_hash: &str) -> Result<Option<PairLink>> {
    let sql = format!("SELECT {COLUMNS} FROM pair_links WHERE short_code_hash = ?1");
    Ok(conn
        .query_row(&sql, [short_code_hash], row_to_link)
        .optional()?)
}

/// Get a link by id.
///
/// # Errors
///
/// Returns an error if the database operation fails.
pub fn get(conn: &Connection, id: i64) -> Result<Option<PairLink>> {
    let sql = format!("SELECT {COLUMNS} FROM pair_links WHERE id = ?1");
    Ok(conn.query_row(&sql, [id], row_to_link).optional()?)
}

/// Whether any link holds this short code digest.
///
/// # Errors
///
/// Returns an error if the database operation fails.
pub fn code_hash_exists(conn: &Connection, short_code_hash: &str) -> Result<bool> {
    let count: i64 = conn.query_row(
        "SELECT COUNT(*) FROM pair_links WHERE short_code_hash = ?1",
        [short_code_hash],
        |row| row.get(0),
    )?;
    Ok(count > 0)
}

/// Mark an active link expired. Returns `true` if the row changed.
///
/// # Errors
///
/// Returns an error if the database operation fails.
pub fn mark_expired(conn: &Connection, id: i64) -> Result<bool> {
    let affected = conn.execute(
        "UPDATE pair_links SET status = 'expired' WHERE id = ?1 AND status = 'active'",
        [id],
    )?;
    Ok(affected > 0)
}

/// Move an active link to `redeemed` and bind it to a pair.
///
/// Returns `false` when the link was no longer active, so a link can only
/// ever be redeemed once.
///
/// # Errors
///
/// Returns an error if the database operation fails.
pub fn mark_redeemed(
    conn: &Connection,
    id: i64,
    pair_id: i64,
    now: DateTime<Utc>,
) -> Result<bool> {
    let affected = conn.execute(
        r"
        UPDATE pair_links
        SET status = 'redeemed', redeemed_at = COALESCE(redeemed_at, ?1), pair_id = ?2
        WHERE id = ?3 AND status = 'active'
        ",
        params![encode_ts(now), pair_id, id],
    )?;
    Ok(affected > 0)
}

fn row_to_link(row: &Row) -> rusqlite::Result<PairLink> {
    let status: String = row.get(4)?;
    let expires_at: String = row.get(5)?;
    let created_at: String = row.get(8)?;
    Ok(PairLink {
        id: row.get(0)?,
        short_code_hash: row.get(1)?,
        token_hash: row.get(2)?,
        community_code: row.get(3)?,
        status: LinkStatus::from_db(&status),
        expires_at: decode_ts(5, &expires_at)?,
        redeemed_at: decode_opt_ts(6, row.get(6)?)?,
        pair_id: row.get(7)?,
        created_at: decode_ts(8, &created_at)?,
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::storage::{pairs, Storage};
    use chrono::Duration;

    #[test]
    fn test_redeem_only_once() {
        let storage = Storage::open_in_memory().unwrap();
        let conn = storage.connection();
        let now = Utc::now();

        let id = insert(conn, "code", "token", "harbor", now + Duration::days(3), now).unwrap();
        let pair = pairs::insert(conn, "code", "elder", "harbor", now).unwrap();

        assert!(mark_redeemed(conn, id, pair.id, now).unwrap());
        assert!(!mark_redeemed(conn, id, pair.id, now).unwrap());

        let link = get(conn, id).unwrap().unwrap();
        assert_eq!(link.status, LinkStatus::Redeemed);
        assert_eq!(link.pair_id, Some(pair.id));
        assert!(link.redeemed_at.is_some());
    }

    #[test]
    fn test_expire_only_active() {
        let storage = Storage::open_in_memory().unwrap();
        let conn = storage.connection();
        let now = Utc::now();

        let id = insert(conn, "code", "token", "harbor", now, now).unwrap();
        assert!(mark_expired(conn, id).unwrap());
        assert!(!mark_expired(conn, id).unwrap());
        assert_eq!(
            find_by_code_hash(conn, "code").unwrap().unwrap().status,
            LinkStatus::Expired
        );
    }

    #[test]
    fn test_code_hash_is_unique() {
        let storage = Storage::open_in_memory().unwrap();
        let conn = storage.connection();
        let now = Utc::now();

        insert(conn, "code", "t1", "harbor", now, now).unwrap();
        assert!(insert(conn, "code", "t2", "harbor", now, now).is_err());
        assert!(code_hash_exists(conn, "code").unwrap());
        assert!(!code_hash_exists(conn, "other").unwrap());
    }
}
