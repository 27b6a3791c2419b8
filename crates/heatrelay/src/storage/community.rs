//! Rows of the `community_daily` table.

use chrono::NaiveDate;
use rusqlite::{params, Connection, OptionalExtension, Row};

use crate::error::Result;
use crate::rollup::CommunityDaily;

use super::{decode_date, decode_json, decode_ts, encode_date, encode_ts};

/// Insert or replace the rollup for its community and date.
///
/// # Errors
///
/// Returns an error if the database operation fails.
pub fn upsert(conn: &Connection, record: &CommunityDaily) -> Result<()> {
    conn.execute(
        r"
        INSERT INTO community_daily
            (community_code, date, total_people, confirmed_count, help_count,
             escalation_count, confirm_rate, escalation_rate, help_rate,
             risk_distribution, outreach_summary, updated_at)
        VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9, ?10, ?11, ?12)
        ON CONFLICT(community_code, date) DO UPDATE SET
            total_people = excluded.total_people,
            confirmed_count = excluded.confirmed_count,
            help_count = excluded.help_count,
            escalation_count = excluded.escalation_count,
            confirm_rate = excluded.confirm_rate,
            escalation_rate = excluded.escalation_rate,
            help_rate = excluded.help_rate,
            risk_distribution = excluded.risk_distribution,
            outreach_summary = excluded.outreach_summary,
            updated_at = excluded.updated_at
        ",
        params![
            record.community_code,
            encode_date(record.date),
            record.total_people,
            record.confirmed_count,
            record.help_count,
            record.escalation_count,
            record.confirm_rate,
            record.escalation_rate,
            record.help_rate,
            serde_json::to_string(&record.risk_distribution)?,
            record.outreach_summary,
            encode_ts(record.updated_at),
        ],
    )?;
    Ok(())
}

/// Get the stored rollup for a community and date.
///
/// # Errors
///
/// Returns an error if the database operation fails.
pub fn find(
    conn: &Connection,
    community_code: &str,
    date: NaiveDate,
) -> Result<Option<CommunityDaily>> {
    Ok(conn
        .query_row(
            r"
            SELECT community_code, date, total_people, confirmed_count, help_count,
                   escalation_count, confirm_rate, escalation_rate, help_rate,
                   risk_distribution, outreach_summary, updated_at
            FROM community_daily WHERE community_code = ?1 AND date = ?2
            ",
            params![community_code, encode_date(date)],
            row_to_record,
        )
        .optional()?)
}

fn row_to_record(row: &Row) -> rusqlite::Result<CommunityDaily> {
    let date: String = row.get(1)?;
    let total_people: u32 = row.get(2)?;
    let confirmed_count: u32 = row.get(3)?;
    let risk_distribution: String = row.get(9)?;
    let updated_at: String = row.get(11)?;
    Ok(CommunityDaily {
        community_code: row.get(0)?,
        date: decode_date(1, &date)?,
        total_people,
        confirmed_count,
        help_count: row.get(4)?,
        escalation_count: row.get(5)?,
        pending_count: total_people.saturating_sub(confirmed_count),
        confirm_rate: row.get(6)?,
        escalation_rate: row.get(7)?,
        help_rate: row.get(8)?,
        risk_distribution: decode_json(9, &risk_distribution)?,
        outreach_summary: row.get(10)?,
        updated_at: decode_ts(11, &updated_at)?,
    })
}
