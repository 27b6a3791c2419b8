//! `SQLite` schema definitions for heatrelay.
//!
//! Plaintext short codes and tokens have no column anywhere in this schema;
//! only their peppered digests are stored.

/// SQL statement to create the pair links table.
pub const CREATE_PAIR_LINKS_TABLE: &str = r"
CREATE TABLE IF NOT EXISTS pair_links (
    id INTEGER PRIMARY KEY AUTOINCREMENT,
    short_code_hash TEXT NOT NULL UNIQUE,
    token_hash TEXT NOT NULL,
    community_code TEXT NOT NULL,
    status TEXT NOT NULL DEFAULT 'active',
    expires_at TEXT NOT NULL,
    redeemed_at TEXT,
    pair_id INTEGER REFERENCES pairs(id),
    created_at TEXT NOT NULL
)
";

/// SQL statement to create the pairs table.
pub const CREATE_PAIRS_TABLE: &str = r"
CREATE TABLE IF NOT EXISTS pairs (
    id INTEGER PRIMARY KEY AUTOINCREMENT,
    short_code_hash TEXT NOT NULL UNIQUE,
    elder_code TEXT NOT NULL UNIQUE,
    community_code TEXT NOT NULL,
    status TEXT NOT NULL DEFAULT 'active',
    created_at TEXT NOT NULL,
    last_active_at TEXT
)
";

/// SQL statement to create an index for counting active pairs per community.
pub const CREATE_PAIRS_COMMUNITY_INDEX: &str = r"
CREATE INDEX IF NOT EXISTS idx_pairs_community ON pairs(community_code, status)
";

/// SQL statement to create the daily statuses table.
pub const CREATE_DAILY_STATUSES_TABLE: &str = r"
CREATE TABLE IF NOT EXISTS daily_statuses (
    id INTEGER PRIMARY KEY AUTOINCREMENT,
    pair_id INTEGER NOT NULL REFERENCES pairs(id),
    status_date TEXT NOT NULL,
    community_code TEXT NOT NULL,
    risk_level TEXT,
    confirmed_at TEXT,
    help_flag INTEGER NOT NULL DEFAULT 0,
    relay_stage TEXT NOT NULL DEFAULT 'none',
    actions_done_count INTEGER NOT NULL DEFAULT 0,
    caregiver_actions TEXT NOT NULL DEFAULT '[]',
    caregiver_note TEXT,
    created_at TEXT NOT NULL,
    updated_at TEXT NOT NULL,
    UNIQUE (pair_id, status_date)
)
";

/// SQL statement to create an index for per-community daily scans.
pub const CREATE_DAILY_COMMUNITY_INDEX: &str = r"
CREATE INDEX IF NOT EXISTS idx_daily_community_date ON daily_statuses(community_code, status_date)
";

/// SQL statement to create the community rollup table.
pub const CREATE_COMMUNITY_DAILY_TABLE: &str = r"
CREATE TABLE IF NOT EXISTS community_daily (
    id INTEGER PRIMARY KEY AUTOINCREMENT,
    community_code TEXT NOT NULL,
    date TEXT NOT NULL,
    total_people INTEGER NOT NULL DEFAULT 0,
    confirmed_count INTEGER NOT NULL DEFAULT 0,
    help_count INTEGER NOT NULL DEFAULT 0,
    escalation_count INTEGER NOT NULL DEFAULT 0,
    confirm_rate REAL NOT NULL DEFAULT 0,
    escalation_rate REAL NOT NULL DEFAULT 0,
    help_rate REAL NOT NULL DEFAULT 0,
    risk_distribution TEXT NOT NULL,
    outreach_summary TEXT NOT NULL,
    updated_at TEXT NOT NULL,
    UNIQUE (community_code, date)
)
";

/// SQL statement to create the short code attempts table.
pub const CREATE_SHORT_CODE_ATTEMPTS_TABLE: &str = r"
CREATE TABLE IF NOT EXISTS short_code_attempts (
    id INTEGER PRIMARY KEY AUTOINCREMENT,
    key_hash TEXT NOT NULL UNIQUE,
    failed_count INTEGER NOT NULL DEFAULT 0,
    first_failed_at TEXT,
    last_failed_at TEXT,
    locked_until TEXT
)
";

/// SQL statement to create the metadata table for storing key-value pairs.
pub const CREATE_METADATA_TABLE: &str = r"
CREATE TABLE IF NOT EXISTS metadata (
    key TEXT PRIMARY KEY,
    value TEXT NOT NULL
)
";

/// All schema creation statements in order.
pub const SCHEMA_STATEMENTS: &[&str] = &[
    CREATE_PAIRS_TABLE,
    CREATE_PAIRS_COMMUNITY_INDEX,
    CREATE_PAIR_LINKS_TABLE,
    CREATE_DAILY_STATUSES_TABLE,
    CREATE_DAILY_COMMUNITY_INDEX,
    CREATE_COMMUNITY_DAILY_TABLE,
    CREATE_SHORT_CODE_ATTEMPTS_TABLE,
    CREATE_METADATA_TABLE,
];
