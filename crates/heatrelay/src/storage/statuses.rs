//! Rows of the `daily_statuses` table.

use chrono::{DateTime, NaiveDate, Utc};
use rusqlite::types::ToSql;
use rusqlite::{params, Connection, OptionalExtension, Row};

use crate::daily::{DailyStatus, RelayStage};
use crate::error::Result;

use super::{decode_date, decode_json, decode_opt_ts, decode_ts, encode_date, encode_ts};

const COLUMNS: &str = "id, pair_id, status_date, community_code, risk_level, confirmed_at, \
                       help_flag, relay_stage, actions_done_count, caregiver_actions, \
                       caregiver_note, created_at, updated_at";

/// Get the row for a pair on a date.
///
/// # Errors
///
/// Returns an error if the database operation fails.
pub fn find(conn: &Connection, pair_id: i64, date: NaiveDate) -> Result<Option<DailyStatus>> {
    let sql = format!("SELECT {COLUMNS} FROM daily_statuses WHERE pair_id = ?1 AND status_date = ?2");
    Ok(conn
        .query_row(&sql, params![pair_id, encode_date(date)], row_to_status)
        .optional()?)
}

/// Whether a pair already has a row with a risk snapshot on a date.
///
/// # Errors
///
/// Returns an error if the database operation fails.
pub fn has_risk_snapshot(conn: &Connection, pair_id: i64, date: NaiveDate) -> Result<bool> {
    let count: i64 = conn.query_row(
        r"
        SELECT COUNT(*) FROM daily_statuses
        WHERE pair_id = ?1 AND status_date = ?2 AND risk_level IS NOT NULL
        ",
        params![pair_id, encode_date(date)],
        |row| row.get(0),
    )?;
    Ok(count > 0)
}

/// Insert a new row and return its id.
///
/// # Errors
///
/// Returns an error if a row already exists for the pair and date, or the
/// database operation fails.
pub fn insert(conn: &Connection, status: &DailyStatus) -> Result<i64> {
    conn.execute(
        r"
        INSERT INTO daily_statuses
            (pair_id, status_date, community_code, risk_level, confirmed_at, help_flag,
             relay_stage, actions_done_count, caregiver_actions, caregiver_note,
             created_at, updated_at)
        VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9, ?10, ?11, ?12)
        ",
        params![
            status.pair_id,
            encode_date(status.status_date),
            status.community_code,
            status.risk_level,
            status.confirmed_at.map(encode_ts),
            status.help_flag,
            status.relay_stage,
            status.actions_done_count,
            serde_json::to_string(&status.caregiver_actions)?,
            status.caregiver_note,
            encode_ts(status.created_at),
            encode_ts(status.updated_at),
        ],
    )?;
    Ok(conn.last_insert_rowid())
}

/// Insert an empty row unless one already exists. Returns `true` if inserted.
///
/// # Errors
///
/// Returns an error if the database operation fails.
pub fn insert_if_absent(conn: &Connection, status: &DailyStatus) -> Result<bool> {
    let affected = conn.execute(
        r"
        INSERT OR IGNORE INTO daily_statuses
            (pair_id, status_date, community_code, risk_level, relay_stage,
             created_at, updated_at)
        VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7)
        ",
        params![
            status.pair_id,
            encode_date(status.status_date),
            status.community_code,
            status.risk_level,
            status.relay_stage,
            encode_ts(status.created_at),
            encode_ts(status.updated_at),
        ],
    )?;
    Ok(affected > 0)
}

/// Write back every mutable field of an existing row.
///
/// # Errors
///
/// Returns an error if the database operation fails.
pub fn save(conn: &Connection, status: &DailyStatus) -> Result<()> {
    conn.execute(
        r"
        UPDATE daily_statuses
        SET risk_level = ?1, confirmed_at = ?2, help_flag = ?3, relay_stage = ?4,
            actions_done_count = ?5, caregiver_actions = ?6, caregiver_note = ?7,
            updated_at = ?8
        WHERE id = ?9
        ",
        params![
            status.risk_level,
            status.confirmed_at.map(encode_ts),
            status.help_flag,
            status.relay_stage,
            status.actions_done_count,
            serde_json::to_string(&status.caregiver_actions)?,
            status.caregiver_note,
            encode_ts(status.updated_at),
            status.id,
        ],
    )?;
    Ok(())
}

/// Rows for a pair between two dates inclusive, oldest first.
///
/// # Errors
///
/// Returns an error if the database operation fails.
pub fn range(
    conn: &Connection,
    pair_id: i64,
    start: NaiveDate,
    end: NaiveDate,
) -> Result<Vec<DailyStatus>> {
    let sql = format!(
        "SELECT {COLUMNS} FROM daily_statuses \
         WHERE pair_id = ?1 AND status_date >= ?2 AND status_date <= ?3 \
         ORDER BY status_date"
    );
    let mut stmt = conn.prepare(&sql)?;
    let rows = stmt
        .query_map(
            params![pair_id, encode_date(start), encode_date(end)],
            row_to_status,
        )?
        .collect::<std::result::Result<Vec<_>, _>>()?;
    Ok(rows)
}

/// A day's rows in a community, limited to pairs that are still active.
///
/// # Errors
///
/// Returns an error if the database operation fails.
pub fn for_community(
    conn: &Connection,
    community_code: &str,
    date: NaiveDate,
) -> Result<Vec<DailyStatus>> {
    let columns = COLUMNS
        .split(", ")
        .map(|c| format!("d.{}", c.trim()))
        .collect::<Vec<_>>()
        .join(", ");
    let sql = format!(
        "SELECT {columns} FROM daily_statuses d JOIN pairs p ON p.id = d.pair_id \
         WHERE d.community_code = ?1 AND d.status_date = ?2 AND p.status = 'active' \
         ORDER BY d.id"
    );
    let mut stmt = conn.prepare(&sql)?;
    let rows = stmt
        .query_map(params![community_code, encode_date(date)], row_to_status)?
        .collect::<std::result::Result<Vec<_>, _>>()?;
    Ok(rows)
}

/// Rows on `date` that are unconfirmed, older than `cutoff` and below `target`.
///
/// Returns `(id, community_code)` pairs.
///
/// # Errors
///
/// Returns an error if the database operation fails.
pub fn overdue(
    conn: &Connection,
    date: NaiveDate,
    cutoff: DateTime<Utc>,
    target: RelayStage,
) -> Result<Vec<(i64, String)>> {
    let lower = target.below();
    if lower.is_empty() {
        return Ok(Vec::new());
    }
    let sql = format!(
        "SELECT id, community_code FROM daily_statuses \
         WHERE status_date = ? AND confirmed_at IS NULL AND created_at < ? \
         AND relay_stage IN ({}) ORDER BY id",
        placeholders(lower.len())
    );
    let date = encode_date(date);
    let cutoff = encode_ts(cutoff);
    let mut values: Vec<&dyn ToSql> = vec![&date, &cutoff];
    values.extend(lower.iter().map(|s| s as &dyn ToSql));

    let mut stmt = conn.prepare(&sql)?;
    let rows = stmt
        .query_map(values.as_slice(), |row| Ok((row.get(0)?, row.get(1)?)))?
        .collect::<std::result::Result<Vec<_>, _>>()?;
    Ok(rows)
}

/// Promote one row to `target` if it is still unconfirmed and below it.
///
/// Returns `true` if this call changed the row; a concurrent writer that got
/// there first leaves it `false`.
///
/// # Errors
///
/// Returns an error if the database operation fails.
pub fn promote_if_below(
    conn: &Connection,
    id: i64,
    target: RelayStage,
    now: DateTime<Utc>,
) -> Result<bool> {
    let lower = target.below();
    if lower.is_empty() {
        return Ok(false);
    }
    let sql = format!(
        "UPDATE daily_statuses SET relay_stage = ?, updated_at = ? \
         WHERE id = ? AND confirmed_at IS NULL AND relay_stage IN ({})",
        placeholders(lower.len())
    );
    let now = encode_ts(now);
    let mut values: Vec<&dyn ToSql> = vec![&target, &now, &id];
    values.extend(lower.iter().map(|s| s as &dyn ToSql));

    let affected = conn.execute(&sql, values.as_slice())?;
    Ok(affected > 0)
}

fn placeholders(n: usize) -> String {
    vec!["?"; n].join(", ")
}

fn row_to_status(row: &Row) -> rusqlite::Result<DailyStatus> {
    let status_date: String = row.get(2)?;
    let caregiver_actions: String = row.get(9)?;
    let created_at: String = row.get(11)?;
    let updated_at: String = row.get(12)?;
    Ok(DailyStatus {
        id: row.get(0)?,
        pair_id: row.get(1)?,
        status_date: decode_date(2, &status_date)?,
        community_code: row.get(3)?,
        risk_level: row.get(4)?,
        confirmed_at: decode_opt_ts(5, row.get(5)?)?,
        help_flag: row.get(6)?,
        relay_stage: row.get(7)?,
        actions_done_count: row.get(8)?,
        caregiver_actions: decode_json(9, &caregiver_actions)?,
        caregiver_note: row.get(10)?,
        created_at: decode_ts(11, &created_at)?,
        updated_at: decode_ts(12, &updated_at)?,
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::risk::RiskLevel;
    use crate::storage::{pairs, Storage};
    use chrono::{Duration, TimeZone};

    fn today() -> NaiveDate {
        NaiveDate::from_ymd_opt(2025, 7, 1).unwrap()
    }

    #[test]
    fn test_insert_find_save() {
        let storage = Storage::open_in_memory().unwrap();
        let conn = storage.connection();
        let now = Utc::now();
        let pair = pairs::insert(conn, "h", "e", "harbor", now).unwrap();

        let mut status = DailyStatus::new(&pair, today(), Some(RiskLevel::High), now);
        status.id = insert(conn, &status).unwrap();
        assert!(insert(conn, &status).is_err());

        status.help_flag = true;
        status.relay_stage = RelayStage::Caregiver;
        save(conn, &status).unwrap();

        let loaded = find(conn, pair.id, today()).unwrap().unwrap();
        assert!(loaded.help_flag);
        assert_eq!(loaded.relay_stage, RelayStage::Caregiver);
        assert_eq!(loaded.risk_level, Some(RiskLevel::High));
        assert!(has_risk_snapshot(conn, pair.id, today()).unwrap());
    }

    #[test]
    fn test_insert_if_absent() {
        let storage = Storage::open_in_memory().unwrap();
        let conn = storage.connection();
        let now = Utc::now();
        let pair = pairs::insert(conn, "h", "e", "harbor", now).unwrap();
        let status = DailyStatus::new(&pair, today(), None, now);

        assert!(insert_if_absent(conn, &status).unwrap());
        assert!(!insert_if_absent(conn, &status).unwrap());
        assert!(!has_risk_snapshot(conn, pair.id, today()).unwrap());
    }

    #[test]
    fn test_overdue_and_promote() {
        let storage = Storage::open_in_memory().unwrap();
        let conn = storage.connection();
        let created = Utc.with_ymd_and_hms(2025, 7, 1, 1, 0, 0).unwrap();
        let pair = pairs::insert(conn, "h", "e", "harbor", created).unwrap();
        let mut status = DailyStatus::new(&pair, today(), None, created);
        status.id = insert(conn, &status).unwrap();

        let early = overdue(conn, today(), created, RelayStage::Backup).unwrap();
        assert!(early.is_empty());

        let cutoff = created + Duration::minutes(1);
        let due = overdue(conn, today(), cutoff, RelayStage::Backup).unwrap();
        assert_eq!(due, vec![(status.id, "harbor".to_string())]);

        assert!(promote_if_below(conn, status.id, RelayStage::Backup, cutoff).unwrap());
        assert!(!promote_if_below(conn, status.id, RelayStage::Backup, cutoff).unwrap());
        assert!(overdue(conn, today(), cutoff, RelayStage::Backup)
            .unwrap()
            .is_empty());
    }

    #[test]
    fn test_for_community_skips_inactive_pairs() {
        let storage = Storage::open_in_memory().unwrap();
        let conn = storage.connection();
        let now = Utc::now();
        let kept = pairs::insert(conn, "h1", "e1", "harbor", now).unwrap();
        let gone = pairs::insert(conn, "h2", "e2", "harbor", now).unwrap();
        insert(conn, &DailyStatus::new(&kept, today(), None, now)).unwrap();
        insert(conn, &DailyStatus::new(&gone, today(), None, now)).unwrap();
        pairs::set_status(conn, gone.id, crate::pairing::PairStatus::Inactive).unwrap();

        let rows = for_community(conn, "harbor", today()).unwrap();
        assert_eq!(rows.len(), 1);
        assert_eq!(rows[0].pair_id, kept.id);
    }
}
