//! Rows of the `short_code_attempts` table.

use rusqlite::{params, Connection, OptionalExtension, Row};

use crate::error::Result;
use crate::lockout::ShortCodeAttempt;

use super::{decode_opt_ts, encode_ts};

/// Get the counter for an actor key.
///
/// # Errors
///
/// Returns an error if the database operation fails.
pub fn find(conn: &Connection, key_hash: &str) -> Result<Option<ShortCodeAttempt>> {
    Ok(conn
        .query_row(
            r"
            SELECT key_hash, failed_count, first_failed_at, last_failed_at, locked_until
            FROM short_code_attempts WHERE key_hash = ?1
            ",
            [key_hash],
            row_to_attempt,
        )
        .optional()?)
}

/// Insert or overwrite the counter for an actor key.
///
/// # Errors
///
/// Returns an error if the database operation fails.
pub fn upsert(conn: &Connection, attempt: &ShortCodeAttempt) -> Result<()> {
    conn.execute(
        r"
        INSERT INTO short_code_attempts
            (key_hash, failed_count, first_failed_at, last_failed_at, locked_until)
        VALUES (?1, ?2, ?3, ?4, ?5)
        ON CONFLICT(key_hash) DO UPDATE SET
            failed_count = excluded.failed_count,
            first_failed_at = excluded.first_failed_at,
            last_failed_at = excluded.last_failed_at,
            locked_until = excluded.locked_until
        ",
        params![
            attempt.key_hash,
            attempt.failed_count,
            attempt.first_failed_at.map(encode_ts),
            attempt.last_failed_at.map(encode_ts),
            attempt.locked_until.map(encode_ts),
        ],
    )?;
    Ok(())
}

/// Forget an actor's failures. Returns `true` if a row was removed.
///
/// # Errors
///
/// Returns an error if the database operation fails.
pub fn delete(conn: &Connection, key_hash: &str) -> Result<bool> {
    let affected = conn.execute(
        "DELETE FROM short_code_attempts WHERE key_hash = ?1",
        [key_hash],
    )?;
    Ok(affected > 0)
}

fn row_to_attempt(row: &Row) -> rusqlite::Result<ShortCodeAttempt> {
    Ok(ShortCodeAttempt {
        key_hash: row.get(0)?,
        failed_count: row.get(1)?,
        first_failed_at: decode_opt_ts(2, row.get(2)?)?,
        last_failed_at: decode_opt_ts(3, row.get(3)?)?,
        locked_until: decode_opt_ts(4, row.get(4)?)?,
    })
}
